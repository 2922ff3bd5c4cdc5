//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

pub mod config;
pub mod northbound;
