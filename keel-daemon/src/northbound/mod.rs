//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod core;
pub mod error;
pub mod netconf;
pub mod session;
pub mod stream;

pub use self::core::Northbound;
pub use self::error::{Error, Result};
