//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Resolved YANG types: a base type plus the facets accumulated through the
//! typedef derivation chain (RFC 7950 section 9).

use enum_as_inner::EnumAsInner;
use regex::Regex;

use crate::schema::{Context, IdentityId, ModuleId, SnodeId};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BaseType {
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Decimal64,
    String,
    Boolean,
    Enumeration,
    Bits,
    Binary,
    Empty,
    Union,
    Leafref,
    Identityref,
    InstanceIdentifier,
}

/// A fully resolved type: base type and merged facets. Interned on the leaf
/// schema node once during module load.
#[derive(Clone, Debug, Default)]
pub struct TypeSpec {
    pub base: Option<BaseType>,
    // Numeric restriction; decimal64 bounds are scaled by 10^fraction_digits.
    pub ranges: Vec<(i128, i128)>,
    pub fraction_digits: u8,
    pub lengths: Vec<(u64, u64)>,
    pub patterns: Vec<Pattern>,
    pub enums: Vec<(String, i32)>,
    pub bits: Vec<(String, u32)>,
    pub union_types: Vec<TypeSpec>,
    pub leafref_path: Option<String>,
    pub leafref_target: Option<SnodeId>,
    // Type of the leafref target, used to parse values of this leaf.
    pub leafref_type: Option<Box<TypeSpec>>,
    pub identity_base: Option<IdentityId>,
    pub require_instance: bool,
}

#[derive(Clone, Debug)]
pub struct Pattern {
    pub source: String,
    pub regex: Regex,
    pub invert: bool,
}

/// A parsed leaf body.
#[derive(Clone, Debug, PartialEq)]
#[derive(EnumAsInner)]
pub enum Value {
    Int(i64),
    Uint(u64),
    // Scaled integer representation: value * 10^fraction_digits.
    Decimal { value: i128, fraction_digits: u8 },
    Bool(bool),
    String(String),
    Enum { name: String, value: i32 },
    Bits(Vec<String>),
    Binary(Vec<u8>),
    Empty,
    Identity(IdentityId),
    InstanceId(String),
}

// ===== impl BaseType =====

impl BaseType {
    pub fn from_name(name: &str) -> Option<BaseType> {
        let base = match name {
            "int8" => BaseType::Int8,
            "int16" => BaseType::Int16,
            "int32" => BaseType::Int32,
            "int64" => BaseType::Int64,
            "uint8" => BaseType::Uint8,
            "uint16" => BaseType::Uint16,
            "uint32" => BaseType::Uint32,
            "uint64" => BaseType::Uint64,
            "decimal64" => BaseType::Decimal64,
            "string" => BaseType::String,
            "boolean" => BaseType::Boolean,
            "enumeration" => BaseType::Enumeration,
            "bits" => BaseType::Bits,
            "binary" => BaseType::Binary,
            "empty" => BaseType::Empty,
            "union" => BaseType::Union,
            "leafref" => BaseType::Leafref,
            "identityref" => BaseType::Identityref,
            "instance-identifier" => BaseType::InstanceIdentifier,
            _ => return None,
        };
        Some(base)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            BaseType::Int8
                | BaseType::Int16
                | BaseType::Int32
                | BaseType::Int64
                | BaseType::Uint8
                | BaseType::Uint16
                | BaseType::Uint32
                | BaseType::Uint64
        )
    }

    /// Built-in value bounds of the integer types.
    pub fn integer_bounds(&self) -> Option<(i128, i128)> {
        let bounds = match self {
            BaseType::Int8 => (i8::MIN as i128, i8::MAX as i128),
            BaseType::Int16 => (i16::MIN as i128, i16::MAX as i128),
            BaseType::Int32 => (i32::MIN as i128, i32::MAX as i128),
            BaseType::Int64 => (i64::MIN as i128, i64::MAX as i128),
            BaseType::Uint8 => (0, u8::MAX as i128),
            BaseType::Uint16 => (0, u16::MAX as i128),
            BaseType::Uint32 => (0, u32::MAX as i128),
            BaseType::Uint64 => (0, u64::MAX as i128),
            _ => return None,
        };
        Some(bounds)
    }
}

// ===== impl TypeSpec =====

impl TypeSpec {
    /// Base type with leafref indirection followed to the target's type.
    pub fn effective_base(&self) -> Option<BaseType> {
        match self.base {
            Some(BaseType::Leafref) => self
                .leafref_type
                .as_ref()
                .and_then(|typ| typ.effective_base())
                .or(Some(BaseType::Leafref)),
            base => base,
        }
    }

    /// Parses and checks a leaf body against the type. The returned value is
    /// in canonical form.
    ///
    /// `module` is the module of the leaf, used to resolve prefixes inside
    /// identityref values.
    pub fn parse_value(
        &self,
        ctx: &Context,
        module: ModuleId,
        text: &str,
    ) -> Result<Value, String> {
        let base = self.base.ok_or("untyped leaf")?;
        match base {
            BaseType::Int8
            | BaseType::Int16
            | BaseType::Int32
            | BaseType::Int64 => {
                let value = text
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| format!("invalid integer value: {}", text))?;
                self.check_range(base, value as i128)?;
                Ok(Value::Int(value))
            }
            BaseType::Uint8
            | BaseType::Uint16
            | BaseType::Uint32
            | BaseType::Uint64 => {
                let value = text
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| format!("invalid integer value: {}", text))?;
                self.check_range(base, value as i128)?;
                Ok(Value::Uint(value))
            }
            BaseType::Decimal64 => {
                let value = parse_decimal64(text.trim(), self.fraction_digits)?;
                self.check_range(base, value)?;
                Ok(Value::Decimal {
                    value,
                    fraction_digits: self.fraction_digits,
                })
            }
            BaseType::String => {
                self.check_length(text.chars().count() as u64)?;
                self.check_patterns(text)?;
                Ok(Value::String(text.to_owned()))
            }
            BaseType::Boolean => match text.trim() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(format!("invalid boolean value: {}", text)),
            },
            BaseType::Enumeration => {
                let text = text.trim();
                self.enums
                    .iter()
                    .find(|(name, _)| name == text)
                    .map(|(name, value)| Value::Enum {
                        name: name.clone(),
                        value: *value,
                    })
                    .ok_or_else(|| format!("invalid enum value: {}", text))
            }
            BaseType::Bits => {
                let mut set = vec![];
                for bit in text.split_ascii_whitespace() {
                    if !self.bits.iter().any(|(name, _)| name == bit) {
                        return Err(format!("unknown bit: {}", bit));
                    }
                    if !set.contains(&bit.to_owned()) {
                        set.push(bit.to_owned());
                    }
                }
                // Canonical order is bit position order.
                set.sort_by_key(|bit| {
                    self.bits
                        .iter()
                        .find(|(name, _)| name == bit)
                        .map(|(_, pos)| *pos)
                });
                Ok(Value::Bits(set))
            }
            BaseType::Binary => {
                let bytes = base64_decode(text.trim())
                    .ok_or_else(|| format!("invalid base64 value: {}", text))?;
                self.check_length(bytes.len() as u64)?;
                Ok(Value::Binary(bytes))
            }
            BaseType::Empty => {
                if text.is_empty() {
                    Ok(Value::Empty)
                } else {
                    Err("empty leaf cannot carry a value".to_owned())
                }
            }
            BaseType::Union => {
                // First-match semantics in declaration order.
                for member in &self.union_types {
                    if let Ok(value) = member.parse_value(ctx, module, text) {
                        return Ok(value);
                    }
                }
                Err(format!("no union member type matches: {}", text))
            }
            BaseType::Leafref => match &self.leafref_type {
                Some(target) => target.parse_value(ctx, module, text),
                None => Ok(Value::String(text.to_owned())),
            },
            BaseType::Identityref => {
                let base_id =
                    self.identity_base.ok_or("identityref without base")?;
                let identity = ctx
                    .find_identity(module, text.trim())
                    .ok_or_else(|| format!("unknown identity: {}", text))?;
                if !ctx.identity_derived_from(identity, base_id) {
                    return Err(format!(
                        "identity {} is not derived from {}",
                        text,
                        ctx.identity(base_id).name
                    ));
                }
                Ok(Value::Identity(identity))
            }
            BaseType::InstanceIdentifier => {
                Ok(Value::InstanceId(text.trim().to_owned()))
            }
        }
    }

    fn check_range(&self, base: BaseType, value: i128) -> Result<(), String> {
        if self.ranges.is_empty() {
            if let Some((min, max)) = base.integer_bounds()
                && (value < min || value > max)
            {
                return Err(format!("value {} out of range", value));
            }
            return Ok(());
        }
        if !self
            .ranges
            .iter()
            .any(|(min, max)| value >= *min && value <= *max)
        {
            return Err(format!("value {} out of range", value));
        }
        Ok(())
    }

    fn check_length(&self, len: u64) -> Result<(), String> {
        if !self.lengths.is_empty()
            && !self
                .lengths
                .iter()
                .any(|(min, max)| len >= *min && len <= *max)
        {
            return Err(format!("length {} out of range", len));
        }
        Ok(())
    }

    fn check_patterns(&self, text: &str) -> Result<(), String> {
        for pattern in &self.patterns {
            if pattern.regex.is_match(text) == pattern.invert {
                return Err(format!(
                    "value does not match pattern: {}",
                    pattern.source
                ));
            }
        }
        Ok(())
    }
}

// ===== impl Value =====

impl Value {
    /// Canonical textual representation (RFC 7950 section 9).
    pub fn canonical(&self, ctx: &Context, module: ModuleId) -> String {
        match self {
            Value::Int(value) => value.to_string(),
            Value::Uint(value) => value.to_string(),
            Value::Decimal {
                value,
                fraction_digits,
            } => format_decimal64(*value, *fraction_digits),
            Value::Bool(value) => value.to_string(),
            Value::String(value) => value.clone(),
            Value::Enum { name, .. } => name.clone(),
            Value::Bits(bits) => bits.join(" "),
            Value::Binary(bytes) => base64_encode(bytes),
            Value::Empty => String::new(),
            Value::Identity(id) => {
                let identity = ctx.identity(*id);
                if identity.module == module {
                    identity.name.clone()
                } else {
                    format!(
                        "{}:{}",
                        ctx.module(identity.module).name,
                        identity.name
                    )
                }
            }
            Value::InstanceId(path) => path.clone(),
        }
    }

    /// Numeric interpretation, used by XPath comparisons and `enum-value()`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(value) => Some(*value as f64),
            Value::Uint(value) => Some(*value as f64),
            Value::Decimal {
                value,
                fraction_digits,
            } => Some(*value as f64 / 10f64.powi(*fraction_digits as i32)),
            _ => None,
        }
    }
}

// ===== helper functions =====

pub(crate) fn parse_decimal64(
    text: &str,
    fraction_digits: u8,
) -> Result<i128, String> {
    let err = || format!("invalid decimal64 value: {}", text);
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, f),
        None => (text, ""),
    };
    if frac_part.len() > fraction_digits as usize {
        return Err(err());
    }
    let negative = int_part.starts_with('-');
    let int = int_part.parse::<i128>().map_err(|_| err())?;
    let mut frac = 0i128;
    if !frac_part.is_empty() {
        frac = frac_part.parse::<i128>().map_err(|_| err())?;
        frac *= 10i128.pow((fraction_digits as usize - frac_part.len()) as u32);
    }
    let scale = 10i128.pow(fraction_digits as u32);
    let value = if negative {
        int * scale - frac
    } else {
        int * scale + frac
    };
    // decimal64 value space is an i64 of scaled units.
    if value < i64::MIN as i128 || value > i64::MAX as i128 {
        return Err(err());
    }
    Ok(value)
}

fn format_decimal64(value: i128, fraction_digits: u8) -> String {
    let scale = 10i128.pow(fraction_digits as u32);
    let int = value / scale;
    let frac = (value % scale).abs();
    let sign = if value < 0 && int == 0 { "-" } else { "" };
    format!(
        "{}{}.{:0width$}",
        sign,
        int,
        frac,
        width = fraction_digits as usize
    )
}

const BASE64_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn base64_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().div_ceil(3) * 4);
    for chunk in bytes.chunks(3) {
        let b = [
            chunk[0],
            chunk.get(1).copied().unwrap_or(0),
            chunk.get(2).copied().unwrap_or(0),
        ];
        let idx = [
            b[0] >> 2,
            (b[0] << 4 | b[1] >> 4) & 0x3f,
            (b[1] << 2 | b[2] >> 6) & 0x3f,
            b[2] & 0x3f,
        ];
        out.push(BASE64_ALPHABET[idx[0] as usize] as char);
        out.push(BASE64_ALPHABET[idx[1] as usize] as char);
        out.push(if chunk.len() > 1 {
            BASE64_ALPHABET[idx[2] as usize] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            BASE64_ALPHABET[idx[3] as usize] as char
        } else {
            '='
        });
    }
    out
}

fn base64_decode(text: &str) -> Option<Vec<u8>> {
    let mut out = vec![];
    let mut acc = 0u32;
    let mut bits = 0;
    for ch in text.bytes() {
        if ch == b'=' || ch.is_ascii_whitespace() {
            continue;
        }
        let value = BASE64_ALPHABET.iter().position(|&c| c == ch)? as u32;
        acc = acc << 6 | value;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal64_scaling() {
        assert_eq!(parse_decimal64("3.14", 2).unwrap(), 314);
        assert_eq!(parse_decimal64("-0.5", 2).unwrap(), -50);
        assert_eq!(parse_decimal64("7", 2).unwrap(), 700);
        assert!(parse_decimal64("3.141", 2).is_err());
        assert_eq!(format_decimal64(314, 2), "3.14");
        assert_eq!(format_decimal64(-50, 2), "-0.50");
    }

    #[test]
    fn base64_roundtrip() {
        for input in [&b""[..], b"f", b"fo", b"foo", b"foobar"] {
            let encoded = base64_encode(input);
            assert_eq!(base64_decode(&encoded).unwrap(), input);
        }
        assert_eq!(base64_encode(b"foobar"), "Zm9vYmFy");
    }
}
