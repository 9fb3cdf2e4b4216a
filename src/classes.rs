use std::io::{Cursor, Read, Seek};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::format::{
    wintimestamp, BuiltinProperty, BuiltinQualifier, Carrier, CimType, CimTypeKind,
    CimVariant, Value, BOOLEAN_TRUE, DYNPROPS_NONE, DYNPROPS_PRESENT,
};
use crate::reader::CimRead;

/// A length-prefixed blob holding strings and out-of-line values,
/// addressed by offsets from property and qualifier records.
#[derive(Debug, Clone)]
pub struct DataRegion {
    size: u32,
    data: Vec<u8>,
}

impl DataRegion {
    pub(crate) fn read<I: Read>(input: &mut I) -> Result<Self> {
        // top bit is a flag, not part of the length
        let size = input.read_u32()? & 0x7FFF_FFFF;
        let data = input.read_exact_vec(size as usize)?;
        Ok(DataRegion { size, data })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Decode the string at `offset`: an encoding flag byte (`0x00`
    /// Latin-1, `0x01` UTF-16LE) followed by a NUL-terminated payload.
    pub fn get_string(&self, offset: u32) -> Result<String> {
        let offset = offset as usize;
        let flag = *self
            .data
            .get(offset)
            .ok_or_else(|| Error::invalid("string offset out of data region"))?;
        let tail = &self.data[offset + 1..];

        match flag {
            0x00 => {
                let end = tail
                    .iter()
                    .position(|b| *b == 0)
                    .ok_or_else(|| Error::invalid("unterminated Latin-1 string"))?;
                Ok(tail[..end].iter().map(|&b| b as char).collect())
            }
            0x01 => {
                let mut units = Vec::new();
                for chunk in tail.chunks_exact(2) {
                    let unit = u16::from_le_bytes([chunk[0], chunk[1]]);
                    if unit == 0 {
                        return String::from_utf16(&units)
                            .map_err(|_| Error::invalid("invalid UTF-16 string"));
                    }
                    units.push(unit);
                }
                Err(Error::invalid("unterminated UTF-16 string"))
            }
            other => Err(Error::invalid(format!(
                "invalid encoding flag encountered ({other:#x})"
            ))),
        }
    }

    /// Decode the array at `offset`: a u32 element count followed by
    /// that many elements of the scalar item type.
    pub fn get_array(&self, offset: u32, item_type: CimType) -> Result<Value> {
        let item_type = item_type.scalar();
        let mut input = Cursor::new(self.data.as_slice());
        input.set_position(u64::from(offset));
        let count = input.read_u32().map_err(array_bounds)?;

        let mut items = Vec::new();
        for _ in 0..count {
            let carrier = item_type.read_carrier(&mut input).map_err(array_bounds)?;
            items.push(self.get_value(carrier, item_type)?);
        }
        Ok(Value::Array(items))
    }

    /// Resolve a raw value slot against this data region.
    pub fn get_value(&self, carrier: Carrier, value_type: CimType) -> Result<Value> {
        if value_type.is_array {
            let Carrier::Offset(offset) = carrier else {
                return Err(Error::invalid("array value without an offset carrier"));
            };
            return self.get_array(offset, value_type);
        }

        match (value_type.kind, carrier) {
            (
                CimTypeKind::String | CimTypeKind::Reference | CimTypeKind::DateTime,
                Carrier::Offset(offset),
            ) => Ok(Value::String(self.get_string(offset)?)),
            (CimTypeKind::Boolean, Carrier::Bool(raw)) => {
                Ok(Value::Bool(raw == BOOLEAN_TRUE))
            }
            (CimTypeKind::Char16, Carrier::Char(unit)) => {
                let c = std::char::decode_utf16([unit])
                    .next()
                    .transpose()
                    .map_err(|_| Error::invalid("lone surrogate in CHAR16 value"))?
                    .ok_or_else(|| Error::invalid("empty CHAR16 value"))?;
                Ok(Value::String(c.to_string()))
            }
            (CimTypeKind::Object, _) => Err(Error::Unsupported("OBJECT")),
            (CimTypeKind::Int8, Carrier::I8(v)) => Ok(Value::I8(v)),
            (CimTypeKind::UInt8, Carrier::U8(v)) => Ok(Value::U8(v)),
            (CimTypeKind::Int16, Carrier::I16(v)) => Ok(Value::I16(v)),
            (CimTypeKind::UInt16, Carrier::U16(v)) => Ok(Value::U16(v)),
            (CimTypeKind::Int32, Carrier::I32(v)) => Ok(Value::I32(v)),
            (CimTypeKind::UInt32, Carrier::U32(v)) => Ok(Value::U32(v)),
            (CimTypeKind::Int64, Carrier::I64(v)) => Ok(Value::I64(v)),
            (CimTypeKind::UInt64, Carrier::U64(v)) => Ok(Value::U64(v)),
            (CimTypeKind::Real32, Carrier::F32(v)) => Ok(Value::F32(v)),
            (CimTypeKind::Real64, Carrier::F64(v)) => Ok(Value::F64(v)),
            (kind, carrier) => Err(Error::invalid(format!(
                "value carrier {carrier:?} does not match type {kind:?}"
            ))),
        }
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }
}

fn array_bounds(err: Error) -> Error {
    match err {
        Error::Io(_) => Error::invalid("array offset out of data region"),
        other => other,
    }
}

/// Reference to a qualifier: a key (builtin id or string offset), a
/// type, and the inline value slot.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QualifierReference {
    pub key_reference: u32,
    pub value_type: CimType,
    pub carrier: Carrier,
}

impl QualifierReference {
    fn read(input: &mut Cursor<&[u8]>) -> Result<Self> {
        let key_reference = input.read_u32()?;
        let _unk = input.read_u8()?;
        let value_type = CimType::read(input)?;
        let carrier = value_type.read_carrier(input)?;
        Ok(QualifierReference {
            key_reference,
            value_type,
            carrier,
        })
    }

    /// The list is framed by a u32 byte length; entries are parsed
    /// while at least one fixed-size header still fits.
    pub(crate) fn read_list(input: &mut Cursor<&[u8]>) -> Result<Vec<Self>> {
        let length = input.read_u32()?;
        let end = input.stream_position()? + u64::from(length);
        let mut refs = Vec::new();
        while input.stream_position()? + 9 <= end {
            refs.push(Self::read(input)?);
        }
        Ok(refs)
    }

    pub fn is_builtin_key(&self) -> bool {
        self.key_reference & 0x8000_0000 > 0
    }

    pub fn key(&self) -> u32 {
        self.key_reference & 0x7FFF_FFFF
    }
}

/// A resolved qualifier: key name plus value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Qualifier {
    pub key: String,
    pub value: Value,
}

impl Qualifier {
    pub(crate) fn resolve(data: &DataRegion, reference: &QualifierReference) -> Result<Self> {
        let key = if reference.is_builtin_key() {
            BuiltinQualifier::try_from(reference.key())
                .map_err(|_| {
                    Error::invalid(format!(
                        "unknown builtin qualifier {:#x}",
                        reference.key()
                    ))
                })?
                .name()
                .to_owned()
        } else {
            data.get_string(reference.key())?
        };
        let value = data.get_value(reference.carrier, reference.value_type)?;
        Ok(Qualifier { key, value })
    }
}

pub(crate) fn resolve_qualifiers(
    data: &DataRegion,
    references: &[QualifierReference],
) -> Result<IndexMap<String, Qualifier>> {
    let mut qualifiers = IndexMap::new();
    for reference in references {
        let qualifier = Qualifier::resolve(data, reference)?;
        qualifiers.insert(qualifier.key.clone(), qualifier);
    }
    Ok(qualifiers)
}

/// Reference to a property: a name (builtin id or string offset) and
/// the offset of the property record in the property data region.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PropertyReference {
    pub name_offset: u32,
    pub property_offset: u32,
}

impl PropertyReference {
    pub(crate) fn read_list(input: &mut Cursor<&[u8]>) -> Result<Vec<Self>> {
        let count = input.read_u32()?;
        (0..count)
            .map(|_| {
                let raw: (u32, u32) = bincode::deserialize_from(&mut *input)?;
                Ok(PropertyReference {
                    name_offset: raw.0,
                    property_offset: raw.1,
                })
            })
            .collect()
    }

    pub fn is_builtin_property(&self) -> bool {
        self.name_offset & 0x8000_0000 > 0
    }

    pub fn builtin_property_name(&self) -> Result<&'static str> {
        if !self.is_builtin_property() {
            return Err(Error::invalid("property name is not a builtin"));
        }
        let key = self.name_offset & 0x7FFF_FFFF;
        Ok(BuiltinProperty::try_from(key)
            .map_err(|_| Error::invalid(format!("unknown builtin property {key:#x}")))?
            .name())
    }
}

/// Class-definition view of a property state pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClassDefinitionPropertyState {
    pub is_inherited: bool,
    pub has_default_value: bool,
}

/// Class-instance view of a property state pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClassInstancePropertyState {
    pub use_default_value: bool,
    pub is_initialized: bool,
}

/// Two bits per property, four properties per byte, LSB pair first.
#[derive(Debug, Clone)]
pub struct PropertyStates {
    entries: Vec<u8>,
    num_properties: usize,
}

impl PropertyStates {
    pub(crate) fn read<I: Read>(input: &mut I, num_properties: usize) -> Result<Self> {
        let entries = input.read_exact_vec(Self::length(num_properties))?;
        Ok(PropertyStates {
            entries,
            num_properties,
        })
    }

    pub(crate) fn length(num_properties: usize) -> usize {
        (2 * num_properties).div_ceil(8)
    }

    fn flags(&self, idx: usize) -> Result<u8> {
        if idx > self.num_properties {
            return Err(Error::invalid(format!("invalid property index {idx}")));
        }
        let byte = self
            .entries
            .get(idx / 4)
            .ok_or_else(|| Error::invalid(format!("invalid property index {idx}")))?;
        Ok((byte >> (2 * (idx % 4))) & 0x3)
    }

    pub fn definition_state(&self, idx: usize) -> Result<ClassDefinitionPropertyState> {
        let flags = self.flags(idx)?;
        Ok(ClassDefinitionPropertyState {
            is_inherited: flags & 0b10 > 0,
            has_default_value: flags & 0b01 == 0,
        })
    }

    pub fn instance_state(&self, idx: usize) -> Result<ClassInstancePropertyState> {
        let flags = self.flags(idx)?;
        Ok(ClassInstancePropertyState {
            use_default_value: flags & 0b10 > 0,
            is_initialized: flags & 0b01 == 0,
        })
    }
}

/// The default-values blob of a class definition: a state table and
/// one value slot per resolved property, in index order.
#[derive(Debug, Clone)]
pub struct PropertyDefaultValues {
    pub states: PropertyStates,
    values: Vec<(u16, Carrier)>,
}

impl PropertyDefaultValues {
    /// `slots` must be the resolved property set sorted by ascending
    /// index; slot widths depend on the property types.
    pub(crate) fn read<I: Read>(input: &mut I, slots: &[(u16, CimType)]) -> Result<Self> {
        let states = PropertyStates::read(input, slots.len())?;
        let values = slots
            .iter()
            .map(|&(index, value_type)| Ok((index, value_type.read_carrier(input)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(PropertyDefaultValues { states, values })
    }

    pub fn carrier(&self, index: u16) -> Result<Carrier> {
        self.values
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, carrier)| *carrier)
            .ok_or_else(|| Error::invalid(format!("no default slot for property {index}")))
    }
}

/// A parsed property record of a class definition.
#[derive(Debug, Clone)]
pub struct ClassDefinitionProperty {
    pub name: String,
    pub value_type: CimType,
    pub index: u16,
    pub offset: u32,
    pub level: u32,
    pub qualifiers: IndexMap<String, Qualifier>,
}

impl ClassDefinitionProperty {
    pub(crate) fn read(data: &DataRegion, reference: &PropertyReference) -> Result<Self> {
        let mut input = Cursor::new(data.data());
        input.set_position(u64::from(reference.property_offset));

        let value_type = CimType::read(&mut input)?;
        let index = input.read_u16()?;
        let offset = input.read_u32()?;
        let level = input.read_u32()?;
        let qualifier_references = QualifierReference::read_list(&mut input)?;

        let name = if reference.is_builtin_property() {
            reference.builtin_property_name()?.to_owned()
        } else {
            data.get_string(reference.name_offset)?
        };

        Ok(ClassDefinitionProperty {
            name,
            value_type,
            index,
            offset,
            level,
            qualifiers: resolve_qualifiers(data, &qualifier_references)?,
        })
    }
}

/// A parsed class definition record.
#[derive(Debug, Clone)]
pub struct ClassDefinition {
    pub super_class_name: String,
    /// Raw FILETIME, see [`ClassDefinition::timestamp`].
    pub timestamp_raw: u64,
    pub data_len: u32,
    pub class_name_offset: u32,
    pub default_values_metadata_size: u32,
    pub qualifier_references: Vec<QualifierReference>,
    pub property_references: Vec<PropertyReference>,
    default_values_data: Vec<u8>,
    pub property_data: DataRegion,
    pub method_data: DataRegion,
}

impl ClassDefinition {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut input = Cursor::new(buf);

        let super_class_name_size = input.read_u32()?;
        let super_class_name = input.read_wide_string(super_class_name_size as usize)?;
        let timestamp_raw = input.read_u64()?;
        let data_len = input.read_u32()?;
        let _unk0 = input.read_u8()?;
        let class_name_offset = input.read_u32()?;
        let default_values_metadata_size = input.read_u32()?;

        // class-name record; the usable name lives in the property
        // data region at class_name_offset
        let record_size = input.read_u32()?;
        let record_len = record_size
            .checked_sub(4)
            .ok_or_else(|| Error::invalid("class name record shorter than its header"))?;
        let _class_name_record = input.read_exact_vec(record_len as usize)?;

        let qualifier_references = QualifierReference::read_list(&mut input)?;
        let property_references = PropertyReference::read_list(&mut input)?;
        let default_values_data =
            input.read_exact_vec(default_values_metadata_size as usize)?;
        let property_data = DataRegion::read(&mut input)?;
        let method_data = DataRegion::read(&mut input)?;

        Ok(ClassDefinition {
            super_class_name,
            timestamp_raw,
            data_len,
            class_name_offset,
            default_values_metadata_size,
            qualifier_references,
            property_references,
            default_values_data,
            property_data,
            method_data,
        })
    }

    pub fn class_name(&self) -> Result<String> {
        self.property_data.get_string(self.class_name_offset)
    }

    pub fn timestamp(&self) -> Result<DateTime<Utc>> {
        wintimestamp(self.timestamp_raw)
    }

    pub fn qualifiers(&self) -> Result<IndexMap<String, Qualifier>> {
        resolve_qualifiers(&self.property_data, &self.qualifier_references)
    }

    /// Properties declared by this class only, in reference order.
    pub fn properties(&self) -> Result<Vec<ClassDefinitionProperty>> {
        self.property_references
            .iter()
            .map(|reference| ClassDefinitionProperty::read(&self.property_data, reference))
            .collect()
    }

    /// Names of the properties carrying a true `PROP_QUALIFIER_KEY`
    /// qualifier; these form the instance key.
    pub fn key_property_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for property in self.properties()? {
            for (key, qualifier) in &property.qualifiers {
                if key == BuiltinQualifier::PropQualifierKey.name()
                    && qualifier.value == Value::Bool(true)
                {
                    names.push(property.name.clone());
                }
            }
        }
        Ok(names)
    }

    /// Parse the default-values blob against the resolved property
    /// slots (sorted by index).
    pub fn default_values(&self, slots: &[(u16, CimType)]) -> Result<PropertyDefaultValues> {
        let mut input = Cursor::new(self.default_values_data.as_slice());
        PropertyDefaultValues::read(&mut input, slots)
    }
}

/// Dynamic-properties marker of an instance. The contents are carried
/// opaquely.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Dynprops {
    pub dynprops: Option<(u32, u32)>,
}

impl Dynprops {
    fn read(input: &mut Cursor<&[u8]>) -> Result<Self> {
        let state = input.read_u8()?;
        match state {
            DYNPROPS_NONE => Ok(Dynprops { dynprops: None }),
            DYNPROPS_PRESENT => {
                let a = input.read_u32()?;
                let b = input.read_u32()?;
                Ok(Dynprops {
                    dynprops: Some((a, b)),
                })
            }
            other => Err(Error::invalid(format!(
                "invalid dynprops state {other:#x}"
            ))),
        }
    }

    pub fn has_dynprops(&self) -> bool {
        self.dynprops.is_some()
    }
}

/// A parsed class instance record.
#[derive(Debug, Clone)]
pub struct ClassInstance {
    pub name_hash: String,
    pub ts1: DateTime<Utc>,
    pub ts2: DateTime<Utc>,
    pub class_name_offset: u32,
    pub states: PropertyStates,
    toc: Vec<(u16, Carrier)>,
    pub qualifier_references: Vec<QualifierReference>,
    pub dynprops: Dynprops,
    pub data: DataRegion,
}

impl ClassInstance {
    /// `slots` must be the resolved property set of the instance's
    /// class, sorted by ascending index: the state table and TOC are
    /// sized and typed by it.
    pub fn parse(
        variant: CimVariant,
        slots: &[(u16, CimType)],
        buf: &[u8],
    ) -> Result<Self> {
        let mut input = Cursor::new(buf);

        let hash_chars = match variant {
            CimVariant::Modern => 0x40,
            CimVariant::Xp => 0x20,
        };
        let name_hash = input.read_wide_string(hash_chars)?;
        let ts1 = wintimestamp(input.read_u64()?)?;
        let ts2 = wintimestamp(input.read_u64()?)?;
        let data_size = input.read_u32()?;
        let class_name_offset = input.read_u32()?;
        let _unk0 = input.read_u8()?;

        // data_size covers itself, the class name offset and the
        // opcode byte
        let remaining_len = data_size
            .checked_sub(9)
            .ok_or_else(|| Error::invalid("instance data size too small"))?;
        let remaining = input.read_exact_vec(remaining_len as usize)?;
        let mut input = Cursor::new(remaining.as_slice());

        let states = PropertyStates::read(&mut input, slots.len())?;
        let toc = slots
            .iter()
            .map(|&(index, value_type)| Ok((index, value_type.read_carrier(&mut input)?)))
            .collect::<Result<Vec<_>>>()?;
        let qualifier_references = QualifierReference::read_list(&mut input)?;
        let dynprops = Dynprops::read(&mut input)?;
        let data = DataRegion::read(&mut input)?;

        Ok(ClassInstance {
            name_hash,
            ts1,
            ts2,
            class_name_offset,
            states,
            toc,
            qualifier_references,
            dynprops,
            data,
        })
    }

    pub fn class_name(&self) -> Result<String> {
        self.data.get_string(0)
    }

    pub fn qualifiers(&self) -> Result<IndexMap<String, Qualifier>> {
        resolve_qualifiers(&self.data, &self.qualifier_references)
    }

    pub(crate) fn toc_carrier(&self, index: u16) -> Result<Carrier> {
        self.toc
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, carrier)| *carrier)
            .ok_or_else(|| Error::invalid(format!("no TOC slot for property {index}")))
    }
}

/// The key of an instance: the values of its class's key properties,
/// in property-enumeration order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstanceKey(Vec<(String, Value)>);

impl InstanceKey {
    pub fn new() -> Self {
        InstanceKey(Vec::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl PartialEq for InstanceKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().all(|(n, v)| other.get(n) == Some(v))
    }
}

impl std::fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return f.write_str("default");
        }
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i != 0 {
                f.write_str(";")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_region(bytes: &[u8]) -> DataRegion {
        let mut buf = (bytes.len() as u32).to_le_bytes().to_vec();
        buf.extend_from_slice(bytes);
        DataRegion::read(&mut Cursor::new(buf.as_slice())).unwrap()
    }

    #[test]
    fn state_table_length_is_two_bits_per_property() {
        for n in 0..=1024usize {
            assert_eq!(PropertyStates::length(n), (2 * n).div_ceil(8));
        }
        assert_eq!(PropertyStates::length(0), 0);
        assert_eq!(PropertyStates::length(4), 1);
        assert_eq!(PropertyStates::length(5), 2);
    }

    #[test]
    fn state_bits_are_lsb_pair_first() {
        // property 0: flags 0b01, property 1: 0b10, property 2: 0b11
        let entries = [0b00_11_10_01u8];
        let states = PropertyStates {
            entries: entries.to_vec(),
            num_properties: 3,
        };
        let s0 = states.definition_state(0).unwrap();
        assert!(!s0.is_inherited);
        assert!(!s0.has_default_value);
        let s1 = states.definition_state(1).unwrap();
        assert!(s1.is_inherited);
        assert!(s1.has_default_value);
        let i2 = states.instance_state(2).unwrap();
        assert!(i2.use_default_value);
        assert!(!i2.is_initialized);
        assert!(states.definition_state(9).is_err());
    }

    #[test]
    fn strings_decode_both_encodings() {
        let mut bytes = vec![0x00];
        bytes.extend_from_slice(b"caf\xe9\x00");
        bytes.push(0x01);
        bytes.extend_from_slice(&[b'H', 0, b'i', 0, 0, 0]);
        let region = data_region(&bytes);
        assert_eq!(region.get_string(0).unwrap(), "café");
        assert_eq!(region.get_string(6).unwrap(), "Hi");
    }

    #[test]
    fn unknown_encoding_flag_is_fatal() {
        let region = data_region(&[0x02, b'x', 0]);
        assert!(region.get_string(0).is_err());
    }

    #[test]
    fn booleans_use_the_wire_encoding() {
        let region = data_region(&[]);
        let bool_type = CimType {
            kind: CimTypeKind::Boolean,
            is_array: false,
        };
        assert_eq!(
            region.get_value(Carrier::Bool(0xFFFF), bool_type).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            region.get_value(Carrier::Bool(0x0000), bool_type).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn arrays_resolve_elements() {
        // count 3, then three u32 values
        let mut bytes = 3u32.to_le_bytes().to_vec();
        for v in [10u32, 20, 30] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let region = data_region(&bytes);
        let array_type = CimType {
            kind: CimTypeKind::UInt32,
            is_array: true,
        };
        let value = region.get_value(Carrier::Offset(0), array_type).unwrap();
        assert_eq!(
            value,
            Value::Array(vec![Value::U32(10), Value::U32(20), Value::U32(30)])
        );
    }

    #[test]
    fn object_values_are_unsupported() {
        let region = data_region(&[]);
        let object_type = CimType {
            kind: CimTypeKind::Object,
            is_array: false,
        };
        assert!(matches!(
            region.get_value(Carrier::Offset(0), object_type),
            Err(Error::Unsupported("OBJECT"))
        ));
    }

    #[test]
    fn instance_key_display() {
        let mut key = InstanceKey::new();
        assert_eq!(key.to_string(), "default");
        key.insert("Name", Value::String("Beep".to_owned()));
        key.insert("Index", Value::U32(2));
        assert_eq!(key.to_string(), "Name=Beep;Index=2");
    }

    #[test]
    fn instance_key_equality_ignores_order() {
        let mut a = InstanceKey::new();
        a.insert("A", Value::U32(1));
        a.insert("B", Value::U32(2));
        let mut b = InstanceKey::new();
        b.insert("B", Value::U32(2));
        b.insert("A", Value::U32(1));
        assert_eq!(a, b);
        b.insert("A", Value::U32(9));
        assert_ne!(a, b);
    }

    #[test]
    fn dynprops_marker_is_validated() {
        let buf = [0x03u8];
        assert!(Dynprops::read(&mut Cursor::new(&buf[..])).is_err());
        let buf = [0x01u8];
        let dynprops = Dynprops::read(&mut Cursor::new(&buf[..])).unwrap();
        assert!(!dynprops.has_dynprops());
        let buf = [0x02u8, 5, 0, 0, 0, 6, 0, 0, 0];
        let dynprops = Dynprops::read(&mut Cursor::new(&buf[..])).unwrap();
        assert_eq!(dynprops.dynprops, Some((5, 6)));
    }
}
