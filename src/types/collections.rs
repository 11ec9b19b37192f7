//! `Pack`/`Unpack` for options and the counted collection targets.
//!
//! Counted targets (`Vec`, maps) refuse unbounded wire forms: a
//! BEGIN-framed collection has no length to size the container by, and
//! must be consumed through the low-level reader or the dynamic
//! [`Value`](super::Value) path.

use std::collections::{BTreeMap, HashMap};
use std::io;

use super::{FieldKind, Pack, Unpack};
use crate::{error::Error, marker::PackType, reader::PackReader, writer::PackWriter};

impl<T: Pack> Pack for Option<T> {
    fn pack<W: io::Write>(&self, writer: &mut PackWriter<W>) -> Result<(), Error> {
        match self {
            Some(value) => value.pack(writer),
            None => writer.write_nil(),
        }
    }
}

impl<T: Unpack> Unpack for Option<T> {
    const KIND: FieldKind = FieldKind::Optional(&T::KIND);

    fn unpack<R: io::Read>(reader: &mut PackReader<R>) -> Result<Self, Error> {
        if reader.next_type()? == PackType::Nil {
            reader.read_nil()?;
            return Ok(None);
        }
        Ok(Some(T::unpack(reader)?))
    }
}

impl<T: Pack> Pack for Vec<T> {
    fn pack<W: io::Write>(&self, writer: &mut PackWriter<W>) -> Result<(), Error> {
        writer.write_array_header(self.len())?;
        for element in self {
            element.pack(writer)?;
        }
        Ok(())
    }
}

impl<T: Unpack> Unpack for Vec<T> {
    const KIND: FieldKind = FieldKind::Array;

    fn unpack<R: io::Read>(reader: &mut PackReader<R>) -> Result<Self, Error> {
        reader.enter()?;
        let count = match reader.read_array_header()? {
            Some(count) => count,
            None => {
                return Err(Error::InvalidNesting(
                    "unbounded array into a counted collection target".into(),
                ))
            }
        };
        // claimed counts are not trusted for preallocation
        let mut out = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            out.push(T::unpack(reader)?);
        }
        reader.leave();
        Ok(out)
    }
}

impl<T: Pack> Pack for HashMap<String, T> {
    fn pack<W: io::Write>(&self, writer: &mut PackWriter<W>) -> Result<(), Error> {
        writer.write_map_header(self.len())?;
        for (key, value) in self {
            writer.write_key(key)?;
            value.pack(writer)?;
        }
        Ok(())
    }
}

impl<T: Unpack> Unpack for HashMap<String, T> {
    const KIND: FieldKind = FieldKind::Map;

    fn unpack<R: io::Read>(reader: &mut PackReader<R>) -> Result<Self, Error> {
        reader.enter()?;
        let count = counted_map_header(reader)?;
        let mut out = HashMap::with_capacity(count.min(4096));
        for _ in 0..count {
            let key = reader.read_key()?;
            out.insert(key, T::unpack(reader)?);
        }
        reader.leave();
        Ok(out)
    }
}

impl<T: Pack> Pack for BTreeMap<String, T> {
    fn pack<W: io::Write>(&self, writer: &mut PackWriter<W>) -> Result<(), Error> {
        writer.write_map_header(self.len())?;
        for (key, value) in self {
            writer.write_key(key)?;
            value.pack(writer)?;
        }
        Ok(())
    }
}

impl<T: Unpack> Unpack for BTreeMap<String, T> {
    const KIND: FieldKind = FieldKind::Map;

    fn unpack<R: io::Read>(reader: &mut PackReader<R>) -> Result<Self, Error> {
        reader.enter()?;
        let count = counted_map_header(reader)?;
        let mut out = BTreeMap::new();
        for _ in 0..count {
            let key = reader.read_key()?;
            out.insert(key, T::unpack(reader)?);
        }
        reader.leave();
        Ok(out)
    }
}

fn counted_map_header<R: io::Read>(reader: &mut PackReader<R>) -> Result<usize, Error> {
    match reader.read_map_header()? {
        Some(count) => Ok(count),
        None => Err(Error::InvalidNesting(
            "unbounded map into a counted collection target".into(),
        )),
    }
}
