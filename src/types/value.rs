//! The dynamic value domain: what an `any`-typed read resolves to.

use std::io;

use bytes::Bytes;

use super::{FieldKind, Pack, Unpack};
use crate::{error::Error, marker::PackType, reader::PackReader, writer::PackWriter};

/// A dynamically typed value.
///
/// Dynamic reads widen every integer to `i64` and every float to `f64`;
/// fixed-width information is not preserved through this type. Map
/// entries are kept in an insertion-ordered pair list: entry counts are
/// small in practice, document order matters, and duplicate keys in a
/// hostile stream stay observable instead of silently collapsing.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bin(Bytes),
    Array(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bin(&self) -> Option<&Bytes> {
        match self {
            Value::Bin(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Looks up the first entry under `key` in a map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Value {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Value {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Value {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Value {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Value {
        Value::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Value {
        Value::Str(value)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Value {
        Value::Bin(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Value {
        Value::Array(values)
    }
}

impl Pack for Value {
    fn pack<W: io::Write>(&self, writer: &mut PackWriter<W>) -> Result<(), Error> {
        match self {
            Value::Nil => writer.write_nil(),
            Value::Bool(value) => writer.write_bool(*value),
            Value::Int(value) => writer.write_int(*value),
            Value::Float(value) => writer.write_f64(*value),
            Value::Str(value) => writer.write_str(value),
            Value::Bin(value) => writer.write_bin(value),
            Value::Array(values) => {
                writer.write_array_header(values.len())?;
                for value in values {
                    value.pack(writer)?;
                }
                Ok(())
            }
            Value::Map(entries) => {
                writer.write_map_header(entries.len())?;
                for (key, value) in entries {
                    writer.write_key(key)?;
                    value.pack(writer)?;
                }
                Ok(())
            }
        }
    }
}

impl Unpack for Value {
    const KIND: FieldKind = FieldKind::Any;

    /// The "peek type, decide, dispatch" loop. Counted and unbounded
    /// collections both resolve; struct encodings resolve to maps.
    fn unpack<R: io::Read>(reader: &mut PackReader<R>) -> Result<Self, Error> {
        loop {
            match reader.next_type()? {
                PackType::Nil => {
                    reader.read_nil()?;
                    return Ok(Value::Nil);
                }
                PackType::Boolean => return Ok(Value::Bool(reader.read_bool()?)),
                PackType::Integer => return Ok(Value::Int(reader.read_int()?)),
                PackType::Float => return Ok(Value::Float(reader.read_f64()?)),
                PackType::String | PackType::Key => return Ok(Value::Str(reader.read_str()?)),
                PackType::Binary => return Ok(Value::Bin(Bytes::from(reader.read_bin()?))),
                PackType::Array => {
                    reader.enter()?;
                    let mut values = Vec::new();
                    match reader.read_array_header()? {
                        Some(count) => {
                            values.reserve(count.min(4096));
                            for _ in 0..count {
                                values.push(Value::unpack(reader)?);
                            }
                        }
                        None => {
                            while reader.next_type()? != PackType::End {
                                values.push(Value::unpack(reader)?);
                            }
                            reader.read_end()?;
                        }
                    }
                    reader.leave();
                    return Ok(Value::Array(values));
                }
                PackType::Map => {
                    reader.enter()?;
                    let mut entries = Vec::new();
                    match reader.read_map_header()? {
                        Some(count) => {
                            entries.reserve(count.min(4096));
                            for _ in 0..count {
                                let key = reader.read_key()?;
                                entries.push((key, Value::unpack(reader)?));
                            }
                        }
                        None => {
                            while reader.next_type()? != PackType::End {
                                let key = reader.read_key()?;
                                entries.push((key, Value::unpack(reader)?));
                            }
                            reader.read_end()?;
                        }
                    }
                    reader.leave();
                    return Ok(Value::Map(entries));
                }
                PackType::Struct => {
                    let header = reader.read_struct_header()?;
                    if !header.values_follow {
                        // template definition; the value follows
                        continue;
                    }
                    reader.enter()?;
                    let mut entries = Vec::with_capacity(header.fields.len());
                    for name in header.fields.iter() {
                        entries.push((name.clone(), Value::unpack(reader)?));
                    }
                    reader.leave();
                    return Ok(Value::Map(entries));
                }
                PackType::End => {
                    return Err(Error::InvalidNesting("END in value position".into()))
                }
                PackType::EndOfStream => return Err(Error::Truncated),
                PackType::Command => continue,
                PackType::Unknown => {
                    return Err(Error::MalformedToken(
                        "reserved marker in value position".into(),
                    ))
                }
            }
        }
    }
}
