use std::io::Read;

use chrono::{DateTime, Utc};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::reader::CimRead;

pub const INDEX_PAGE_SIZE: usize = 0x2000;
pub const DATA_PAGE_SIZE: usize = 0x2000;

pub const MAPPING_SIGNATURE: u32 = 0xABCD;
pub const MAPPING_FOOTER_SIGNATURE: u32 = 0xDCBA;
pub const MAPPING_PAGE_ID_MASK: u32 = 0x3FFF_FFFF;
pub const UNMAPPED_PAGE_VALUE: u32 = 0x3FFF_FFFF;

pub const INDEX_PAGE_INVALID: u32 = 0xFFFF_FFFF;
pub const INDEX_PAGE_INVALID2: u32 = 0x0000_0000;

pub const ROOT_NAMESPACE_NAME: &str = "root";
pub const SYSTEM_NAMESPACE_NAME: &str = "__SystemClass";
pub const NAMESPACE_CLASS_NAME: &str = "__namespace";

/// Seconds between 1601-01-01 (FILETIME epoch) and 1970-01-01.
const FILETIME_EPOCH_OFFSET: i64 = 11_644_473_600;

/// On-disk repository layout, fixed once at session construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CimVariant {
    /// Windows XP: 4-dword mapping headers, MD5 key digests,
    /// 0x20-wide-char instance name hashes.
    Xp,
    /// Vista and later: 6-dword mapping headers, SHA-256 key digests,
    /// 0x40-wide-char instance name hashes.
    Modern,
}

impl CimVariant {
    pub fn is_xp(self) -> bool {
        matches!(self, CimVariant::Xp)
    }
}

/// CIM primitive type ids as stored on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u8)]
pub enum CimTypeKind {
    Int16 = 0x2,
    Int32 = 0x3,
    Real32 = 0x4,
    Real64 = 0x5,
    String = 0x8,
    Boolean = 0xB,
    Object = 0xD,
    Int8 = 0x10,
    UInt8 = 0x11,
    UInt16 = 0x12,
    UInt32 = 0x13,
    Int64 = 0x14,
    UInt64 = 0x15,
    DateTime = 0x65,
    Reference = 0x66,
    Char16 = 0x67,
}

pub const ARRAY_STATE_ARRAY: u8 = 0x20;

pub const BOOLEAN_TRUE: u16 = 0xFFFF;
pub const BOOLEAN_FALSE: u16 = 0x0000;

pub const DYNPROPS_NONE: u8 = 0x1;
pub const DYNPROPS_PRESENT: u8 = 0x2;

/// A `{type, array_state, unk}` type tuple (4 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CimType {
    pub kind: CimTypeKind,
    pub is_array: bool,
}

impl CimType {
    pub(crate) fn read<I: Read>(input: &mut I) -> Result<Self> {
        let raw_kind = input.read_u8()?;
        let kind = CimTypeKind::try_from(raw_kind)
            .map_err(|_| Error::invalid(format!("unknown CIM type id {raw_kind:#x}")))?;
        let array_state = input.read_u8()?;
        let _unk = input.read_u16()?;
        Ok(CimType {
            kind,
            is_array: array_state == ARRAY_STATE_ARRAY,
        })
    }

    pub(crate) fn scalar(self) -> Self {
        CimType {
            kind: self.kind,
            is_array: false,
        }
    }

    /// Width of the value slot this type occupies in a TOC or
    /// default-values table.
    pub fn carrier_len(self) -> usize {
        if self.is_array {
            return 4;
        }
        match self.kind {
            CimTypeKind::Int8 | CimTypeKind::UInt8 => 1,
            CimTypeKind::Int16
            | CimTypeKind::UInt16
            | CimTypeKind::Boolean
            | CimTypeKind::Char16 => 2,
            CimTypeKind::Int32
            | CimTypeKind::UInt32
            | CimTypeKind::Real32
            | CimTypeKind::String
            | CimTypeKind::Object
            | CimTypeKind::DateTime
            | CimTypeKind::Reference => 4,
            CimTypeKind::Int64 | CimTypeKind::UInt64 | CimTypeKind::Real64 => 8,
        }
    }

    /// Read the raw value slot for this type. Arrays and the
    /// offset-typed primitives carry a data-region offset; everything
    /// else is inline.
    pub(crate) fn read_carrier<I: Read>(self, input: &mut I) -> Result<Carrier> {
        if self.is_array {
            return Ok(Carrier::Offset(input.read_u32()?));
        }
        Ok(match self.kind {
            CimTypeKind::Int8 => Carrier::I8(input.read_i8()?),
            CimTypeKind::UInt8 => Carrier::U8(input.read_u8()?),
            CimTypeKind::Int16 => Carrier::I16(input.read_i16()?),
            CimTypeKind::UInt16 => Carrier::U16(input.read_u16()?),
            CimTypeKind::Int32 => Carrier::I32(input.read_i32()?),
            CimTypeKind::UInt32 => Carrier::U32(input.read_u32()?),
            CimTypeKind::Int64 => Carrier::I64(input.read_i64()?),
            CimTypeKind::UInt64 => Carrier::U64(input.read_u64()?),
            CimTypeKind::Real32 => Carrier::F32(input.read_f32()?),
            CimTypeKind::Real64 => Carrier::F64(input.read_f64()?),
            CimTypeKind::Boolean => Carrier::Bool(input.read_u16()?),
            CimTypeKind::Char16 => Carrier::Char(input.read_u16()?),
            CimTypeKind::String
            | CimTypeKind::Object
            | CimTypeKind::DateTime
            | CimTypeKind::Reference => Carrier::Offset(input.read_u32()?),
        })
    }
}

/// Raw value slot, prior to data-region resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Carrier {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    /// Raw boolean encoding, `0x0000` or `0xFFFF`.
    Bool(u16),
    /// UTF-16 code unit.
    Char(u16),
    /// Offset into the owning data region.
    Offset(u32),
}

/// A fully resolved property or qualifier value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Array(Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::I8(v) => write!(f, "{v}"),
            Value::U8(v) => write!(f, "{v}"),
            Value::I16(v) => write!(f, "{v}"),
            Value::U16(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::String(v) => f.write_str(v),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i != 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Builtin qualifier keys, referenced by id when the high bit of the
/// key reference is set.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u32)]
pub enum BuiltinQualifier {
    PropQualifierKey = 0x1,
    PropQualifierReadAccess = 0x3,
    ClassQualifierProvider = 0x6,
    ClassQualifierDynamic = 0x7,
    PropQualifierType = 0xA,
}

impl BuiltinQualifier {
    pub fn name(self) -> &'static str {
        match self {
            BuiltinQualifier::PropQualifierKey => "PROP_QUALIFIER_KEY",
            BuiltinQualifier::PropQualifierReadAccess => "PROP_QUALIFIER_READ_ACCESS",
            BuiltinQualifier::ClassQualifierProvider => "CLASS_QUALIFIER_PROVIDER",
            BuiltinQualifier::ClassQualifierDynamic => "CLASS_QUALIFIER_DYNAMIC",
            BuiltinQualifier::PropQualifierType => "PROP_QUALIFIER_TYPE",
        }
    }
}

/// Builtin property names, referenced by id when the high bit of the
/// name offset is set.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u32)]
pub enum BuiltinProperty {
    PrimaryKey = 0x1,
    Read = 0x2,
    Write = 0x3,
    Volatile = 0x4,
    Provider = 0x6,
    Dynamic = 0x7,
    Type = 0xA,
}

impl BuiltinProperty {
    pub fn name(self) -> &'static str {
        match self {
            BuiltinProperty::PrimaryKey => "PRIMARY_KEY",
            BuiltinProperty::Read => "READ",
            BuiltinProperty::Write => "WRITE",
            BuiltinProperty::Volatile => "VOLATILE",
            BuiltinProperty::Provider => "PROVIDER",
            BuiltinProperty::Dynamic => "DYNAMIC",
            BuiltinProperty::Type => "TYPE",
        }
    }
}

/// Convert a 64-bit Windows FILETIME (100ns ticks since 1601) into a
/// UTC timestamp.
pub fn wintimestamp(filetime: u64) -> Result<DateTime<Utc>> {
    let secs = (filetime / 10_000_000) as i64 - FILETIME_EPOCH_OFFSET;
    let nanos = (filetime % 10_000_000) as u32 * 100;
    DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| Error::invalid(format!("FILETIME out of range: {filetime:#x}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cim_type_rejects_unknown_ids() {
        let mut input = std::io::Cursor::new([0x42u8, 0x00, 0x00, 0x00]);
        assert!(CimType::read(&mut input).is_err());
    }

    #[test]
    fn carrier_len_matches_wire_widths() {
        let ty = |kind| CimType {
            kind,
            is_array: false,
        };
        assert_eq!(ty(CimTypeKind::UInt8).carrier_len(), 1);
        assert_eq!(ty(CimTypeKind::Boolean).carrier_len(), 2);
        assert_eq!(ty(CimTypeKind::String).carrier_len(), 4);
        assert_eq!(ty(CimTypeKind::Real64).carrier_len(), 8);
        let array = CimType {
            kind: CimTypeKind::UInt64,
            is_array: true,
        };
        assert_eq!(array.carrier_len(), 4);
    }

    #[test]
    fn wintimestamp_epoch() {
        // 1970-01-01 in FILETIME ticks
        let unix_epoch = 116_444_736_000_000_000u64;
        let ts = wintimestamp(unix_epoch).unwrap();
        assert_eq!(ts.timestamp(), 0);
    }
}
