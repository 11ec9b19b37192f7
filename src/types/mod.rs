//! The binding layer: traits mapping in-memory values onto the wire
//! format, the schema-drift compatibility table, and the public
//! serialize/deserialize entry points.

use std::io;

use crate::{
    error::Error,
    marker::PackType,
    options::{ReaderLimits, SerializerOptions},
    reader::PackReader,
    writer::PackWriter,
};

mod collections;
pub mod record;
mod scalars;
pub mod table;
pub mod value;

pub use record::{FieldDescriptor, Record, TypeDescriptor, TypeDescriptorBuilder};
pub use record::{read_record, write_record};
pub use table::{RowReader, RowWriter, Table, TableSet};
pub use value::Value;

/// A trait for values that can be serialized onto a [`PackWriter`].
///
/// Implementations exist for the primitive universe, the canonical
/// scalar mappings (moments, durations, UUIDs, decimals), collections,
/// the dynamic [`Value`], and — via [`Record`] — declared record types.
///
/// # Example
/// ```
/// use keypack::types::to_bytes;
///
/// let bytes = to_bytes(&42i32).unwrap();
/// assert_eq!(bytes, vec![42]);
/// ```
pub trait Pack {
    /// Writes `self` as one logical value.
    fn pack<W>(&self, writer: &mut PackWriter<W>) -> Result<(), Error>
    where
        W: io::Write;
}

/// A trait for values that can be deserialized from a [`PackReader`].
///
/// `KIND` names the compatibility family the record binder consults
/// before dispatching a field read; see [`compatible`].
pub trait Unpack: Sized {
    /// The compatibility family of this type's wire shape.
    const KIND: FieldKind;

    /// Reads one logical value.
    fn unpack<R>(reader: &mut PackReader<R>) -> Result<Self, Error>
    where
        R: io::Read;
}

/// Declared-type families used by the record binder's tolerance check.
///
/// A field whose peeked wire type is incompatible with its declared
/// family is skipped (the field keeps its default) instead of aborting
/// the record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Boolean,
    Integer,
    Float,
    Decimal,
    String,
    Binary,
    Uuid,
    Moment,
    OffsetMoment,
    Duration,
    Enum,
    Array,
    Map,
    Record,
    /// Dynamically typed; accepts every value shape.
    Any,
    /// A nullable wrapper: nil, or anything the inner family accepts.
    Optional(&'static FieldKind),
}

/// The wire-to-declared compatibility table driving schema-drift
/// tolerance.
pub fn compatible(wire: PackType, kind: FieldKind) -> bool {
    match kind {
        FieldKind::Optional(inner) => wire == PackType::Nil || compatible(wire, *inner),
        FieldKind::Any => !matches!(
            wire,
            PackType::Command | PackType::End | PackType::EndOfStream | PackType::Unknown
        ),
        FieldKind::Boolean => wire == PackType::Boolean,
        FieldKind::Integer | FieldKind::Enum | FieldKind::Duration => wire == PackType::Integer,
        FieldKind::Moment | FieldKind::OffsetMoment => {
            matches!(wire, PackType::Integer | PackType::String | PackType::Key)
        }
        FieldKind::Float => wire == PackType::Float,
        FieldKind::Decimal => {
            matches!(wire, PackType::Float | PackType::String | PackType::Key)
        }
        FieldKind::String => matches!(wire, PackType::String | PackType::Key),
        FieldKind::Binary | FieldKind::Uuid => wire == PackType::Binary,
        FieldKind::Array => wire == PackType::Array,
        FieldKind::Map | FieldKind::Record => {
            matches!(wire, PackType::Map | PackType::Struct)
        }
    }
}

// ------------------------------------------------------------------------------------
// entry points
// ------------------------------------------------------------------------------------

/// Serializes a value into a byte vector under default options.
///
/// # Parameters
/// - `value`: The value to serialize.
///
/// # Returns
/// - `Ok(Vec<u8>)`: The encoded byte stream.
/// - `Err(Error)`: If the value cannot be expressed on the wire.
///
/// # Example
/// ```
/// use keypack::types::{from_bytes, to_bytes};
///
/// let bytes = to_bytes(&String::from("hi")).unwrap();
/// let back: String = from_bytes(&bytes).unwrap();
/// assert_eq!(back, "hi");
/// ```
pub fn to_bytes<T>(value: &T) -> Result<Vec<u8>, Error>
where
    T: Pack,
{
    to_bytes_with_options(value, SerializerOptions::default())
}

/// Serializes a value into a byte vector under explicit options.
pub fn to_bytes_with_options<T>(value: &T, options: SerializerOptions) -> Result<Vec<u8>, Error>
where
    T: Pack,
{
    let mut buf = Vec::new();
    let mut writer = PackWriter::with_options(&mut buf, options);
    value.pack(&mut writer)?;
    Ok(buf)
}

/// Serializes a value onto an already-open byte sink.
///
/// The stream is borrowed, so it stays open after the call; nothing is
/// buffered and no flush is issued. Inputs must be acyclic — the
/// encoder recurses over the value graph and performs no cycle
/// detection.
pub fn transfer_to<W, T>(value: &T, writer: &mut W) -> Result<(), Error>
where
    W: io::Write,
    T: Pack,
{
    transfer_to_with_options(value, writer, SerializerOptions::default())
}

/// Serializes a value onto an already-open byte sink under explicit
/// options.
pub fn transfer_to_with_options<W, T>(
    value: &T,
    writer: &mut W,
    options: SerializerOptions,
) -> Result<(), Error>
where
    W: io::Write,
    T: Pack,
{
    let mut writer = PackWriter::with_options(writer, options);
    value.pack(&mut writer)
}

/// Deserializes a value from a byte slice under default limits.
///
/// # Example
/// ```
/// use keypack::types::from_bytes;
///
/// let answer: i64 = from_bytes(&[42]).unwrap();
/// assert_eq!(answer, 42);
/// ```
pub fn from_bytes<T>(data: &[u8]) -> Result<T, Error>
where
    T: Unpack,
{
    from_bytes_with_limits(data, ReaderLimits::default())
}

/// Deserializes a value from a byte slice under explicit limits.
pub fn from_bytes_with_limits<T>(data: &[u8], limits: ReaderLimits) -> Result<T, Error>
where
    T: Unpack,
{
    let mut data = data;
    let mut reader = PackReader::with_limits(&mut data, limits);
    T::unpack(&mut reader)
}

/// Deserializes a value from an already-open byte source.
///
/// The source is borrowed and left open; the cursor stops after the
/// value's final byte, so consecutive top-level values can be read with
/// consecutive calls.
pub fn from_stream<R, T>(reader: &mut R) -> Result<T, Error>
where
    R: io::Read,
    T: Unpack,
{
    from_stream_with_options(reader, ReaderLimits::default(), SerializerOptions::default())
}

/// Deserializes a value from an already-open byte source under explicit
/// limits and decode options.
pub fn from_stream_with_options<R, T>(
    reader: &mut R,
    limits: ReaderLimits,
    options: SerializerOptions,
) -> Result<T, Error>
where
    R: io::Read,
    T: Unpack,
{
    let mut reader = PackReader::with_options(reader, limits, options);
    T::unpack(&mut reader)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatibility_families() {
        assert!(compatible(PackType::Boolean, FieldKind::Boolean));
        assert!(!compatible(PackType::Integer, FieldKind::Boolean));

        assert!(compatible(PackType::Integer, FieldKind::Enum));
        assert!(compatible(PackType::Integer, FieldKind::Duration));
        assert!(!compatible(PackType::Float, FieldKind::Integer));

        assert!(compatible(PackType::String, FieldKind::Moment));
        assert!(compatible(PackType::Integer, FieldKind::Moment));
        assert!(compatible(PackType::Float, FieldKind::Decimal));
        assert!(compatible(PackType::String, FieldKind::Decimal));

        assert!(compatible(PackType::Binary, FieldKind::Uuid));
        assert!(!compatible(PackType::String, FieldKind::Uuid));

        assert!(compatible(PackType::Struct, FieldKind::Record));
        assert!(compatible(PackType::Map, FieldKind::Record));
        assert!(!compatible(PackType::Array, FieldKind::Record));
    }

    #[test]
    fn optional_accepts_nil_and_inner() {
        const KIND: FieldKind = FieldKind::Optional(&FieldKind::Integer);
        assert!(compatible(PackType::Nil, KIND));
        assert!(compatible(PackType::Integer, KIND));
        assert!(!compatible(PackType::String, KIND));
    }

    #[test]
    fn any_rejects_structural_noise() {
        assert!(compatible(PackType::Map, FieldKind::Any));
        assert!(compatible(PackType::Nil, FieldKind::Any));
        assert!(!compatible(PackType::End, FieldKind::Any));
        assert!(!compatible(PackType::EndOfStream, FieldKind::Any));
    }
}
