//! Low-level encoder: markers, length-prefixed payloads, big-endian
//! numerics, and the in-stream commands.

use std::collections::HashMap;
use std::io;

use byteorder::{BigEndian, WriteBytesExt};

use crate::{
    error::Error,
    marker,
    options::SerializerOptions,
    util::write_varint,
};

/// Streaming encoder over any [`io::Write`] sink.
///
/// The writer owns the encoder side of the two symbol tables (key table,
/// struct-template table) and keeps them in lock-step with the commands
/// it emits. It performs no structural validation: matching a header's
/// count to the elements actually written is the caller's (usually the
/// binding layer's) responsibility, and nothing is buffered across
/// calls.
///
/// Constructing over `&mut S` leaves the underlying stream open when the
/// writer is dropped; constructing over an owned sink transfers
/// ownership, recoverable via [`into_inner`](PackWriter::into_inner).
///
/// # Example
/// ```
/// use keypack::writer::PackWriter;
///
/// let mut buf = Vec::new();
/// let mut writer = PackWriter::new(&mut buf);
/// writer.write_map_header(1).unwrap();
/// writer.write_key("answer").unwrap();
/// writer.write_int(42).unwrap();
/// ```
pub struct PackWriter<W: io::Write> {
    sink: W,
    options: SerializerOptions,
    key_ids: HashMap<String, u32>,
    next_key_id: u32,
    next_struct_id: u32,
}

impl<W: io::Write> PackWriter<W> {
    /// Creates a writer with default [`SerializerOptions`].
    pub fn new(sink: W) -> PackWriter<W> {
        PackWriter::with_options(sink, SerializerOptions::default())
    }

    /// Creates a writer with explicit options.
    pub fn with_options(sink: W, options: SerializerOptions) -> PackWriter<W> {
        PackWriter {
            sink,
            options,
            key_ids: HashMap::new(),
            next_key_id: 0,
            next_struct_id: 0,
        }
    }

    /// Returns the options this writer encodes under.
    pub fn options(&self) -> &SerializerOptions {
        &self.options
    }

    /// Consumes the writer, returning the underlying sink.
    pub fn into_inner(self) -> W {
        self.sink
    }

    /// Flushes the underlying sink.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.sink.flush()?;
        Ok(())
    }

    // ------------------------------------------------------------------------------------
    // scalar tokens
    // ------------------------------------------------------------------------------------

    pub fn write_nil(&mut self) -> Result<(), Error> {
        self.sink.write_u8(marker::NIL)?;
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), Error> {
        self.sink
            .write_u8(if value { marker::TRUE } else { marker::FALSE })?;
        Ok(())
    }

    /// Writes a signed integer using the smallest marker whose domain
    /// contains the value: positive fixint, negative fixint, then
    /// int8/int16/int32/int64. The signed path never borrows unsigned
    /// markers, so `128` encodes as int16 rather than uint8.
    pub fn write_int(&mut self, value: i64) -> Result<(), Error> {
        if (0..=0x7F).contains(&value) {
            self.sink.write_u8(value as u8)?;
        } else if (-16..0).contains(&value) {
            self.sink.write_u8(marker::NEG_FIXINT | (value + 16) as u8)?;
        } else if i8::try_from(value).is_ok() {
            self.sink.write_u8(marker::INT8)?;
            self.sink.write_i8(value as i8)?;
        } else if i16::try_from(value).is_ok() {
            self.sink.write_u8(marker::INT16)?;
            self.sink.write_i16::<BigEndian>(value as i16)?;
        } else if i32::try_from(value).is_ok() {
            self.sink.write_u8(marker::INT32)?;
            self.sink.write_i32::<BigEndian>(value as i32)?;
        } else {
            self.sink.write_u8(marker::INT64)?;
            self.sink.write_i64::<BigEndian>(value)?;
        }
        Ok(())
    }

    /// Writes an unsigned integer using the smallest of positive fixint,
    /// uint8/uint16/uint32/uint64.
    pub fn write_uint(&mut self, value: u64) -> Result<(), Error> {
        if value <= 0x7F {
            self.sink.write_u8(value as u8)?;
        } else if u8::try_from(value).is_ok() {
            self.sink.write_u8(marker::UINT8)?;
            self.sink.write_u8(value as u8)?;
        } else if u16::try_from(value).is_ok() {
            self.sink.write_u8(marker::UINT16)?;
            self.sink.write_u16::<BigEndian>(value as u16)?;
        } else if u32::try_from(value).is_ok() {
            self.sink.write_u8(marker::UINT32)?;
            self.sink.write_u32::<BigEndian>(value as u32)?;
        } else {
            self.sink.write_u8(marker::UINT64)?;
            self.sink.write_u64::<BigEndian>(value)?;
        }
        Ok(())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<(), Error> {
        self.sink.write_u8(marker::FLOAT32)?;
        self.sink.write_f32::<BigEndian>(value)?;
        Ok(())
    }

    pub fn write_f64(&mut self, value: f64) -> Result<(), Error> {
        self.sink.write_u8(marker::FLOAT64)?;
        self.sink.write_f64::<BigEndian>(value)?;
        Ok(())
    }

    /// Writes a string token with the smallest length class (fixstr,
    /// str8, str16, str32). The prefix counts UTF-8 bytes, not
    /// codepoints.
    pub fn write_str(&mut self, value: &str) -> Result<(), Error> {
        let bytes = value.as_bytes();
        match bytes.len() {
            0..=31 => self.sink.write_u8(marker::FIXSTR | bytes.len() as u8)?,
            32..=0xFF => {
                self.sink.write_u8(marker::STR8)?;
                self.sink.write_u8(bytes.len() as u8)?;
            }
            0x100..=0xFFFF => {
                self.sink.write_u8(marker::STR16)?;
                self.sink.write_u16::<BigEndian>(bytes.len() as u16)?;
            }
            _ => {
                let length = u32::try_from(bytes.len()).map_err(|_| {
                    Error::UnsupportedTarget(format!(
                        "string of {} bytes exceeds the 32-bit length prefix",
                        bytes.len()
                    ))
                })?;
                self.sink.write_u8(marker::STR32)?;
                self.sink.write_u32::<BigEndian>(length)?;
            }
        }
        self.sink.write_all(bytes)?;
        Ok(())
    }

    /// Writes a binary token (bin8, bin16, bin32).
    pub fn write_bin(&mut self, value: &[u8]) -> Result<(), Error> {
        match value.len() {
            0..=0xFF => {
                self.sink.write_u8(marker::BIN8)?;
                self.sink.write_u8(value.len() as u8)?;
            }
            0x100..=0xFFFF => {
                self.sink.write_u8(marker::BIN16)?;
                self.sink.write_u16::<BigEndian>(value.len() as u16)?;
            }
            _ => {
                let length = u32::try_from(value.len()).map_err(|_| {
                    Error::UnsupportedTarget(format!(
                        "binary of {} bytes exceeds the 32-bit length prefix",
                        value.len()
                    ))
                })?;
                self.sink.write_u8(marker::BIN32)?;
                self.sink.write_u32::<BigEndian>(length)?;
            }
        }
        self.sink.write_all(value)?;
        Ok(())
    }

    // ------------------------------------------------------------------------------------
    // collection headers and framing
    // ------------------------------------------------------------------------------------

    /// Writes a counted array header; `count` elements must follow.
    pub fn write_array_header(&mut self, count: usize) -> Result<(), Error> {
        match count {
            0..=15 => self.sink.write_u8(marker::FIXARRAY | count as u8)?,
            16..=0xFFFF => {
                self.sink.write_u8(marker::ARRAY16)?;
                self.sink.write_u16::<BigEndian>(count as u16)?;
            }
            _ => {
                let count = u32::try_from(count).map_err(|_| {
                    Error::UnsupportedTarget(format!(
                        "array of {} elements exceeds the 32-bit count prefix",
                        count
                    ))
                })?;
                self.sink.write_u8(marker::ARRAY32)?;
                self.sink.write_u32::<BigEndian>(count)?;
            }
        }
        Ok(())
    }

    /// Writes a counted map header; `count` key/value pairs must follow.
    pub fn write_map_header(&mut self, count: usize) -> Result<(), Error> {
        match count {
            0..=15 => self.sink.write_u8(marker::FIXMAP | count as u8)?,
            16..=0xFFFF => {
                self.sink.write_u8(marker::MAP16)?;
                self.sink.write_u16::<BigEndian>(count as u16)?;
            }
            _ => {
                let count = u32::try_from(count).map_err(|_| {
                    Error::UnsupportedTarget(format!(
                        "map of {} pairs exceeds the 32-bit count prefix",
                        count
                    ))
                })?;
                self.sink.write_u8(marker::MAP32)?;
                self.sink.write_u32::<BigEndian>(count)?;
            }
        }
        Ok(())
    }

    /// Opens an unbounded array; close it with [`write_end`](PackWriter::write_end).
    pub fn begin_array(&mut self) -> Result<(), Error> {
        self.sink.write_u8(marker::BEGIN_ARRAY)?;
        Ok(())
    }

    /// Opens an unbounded map; close it with [`write_end`](PackWriter::write_end).
    pub fn begin_map(&mut self) -> Result<(), Error> {
        self.sink.write_u8(marker::BEGIN_MAP)?;
        Ok(())
    }

    /// Closes the innermost open `BEGIN_*` frame.
    pub fn write_end(&mut self) -> Result<(), Error> {
        self.sink.write_u8(marker::END)?;
        Ok(())
    }

    // ------------------------------------------------------------------------------------
    // commands
    // ------------------------------------------------------------------------------------

    /// Writes a map key under the interning policy: the first occurrence
    /// of a string emits `SET_KEY` with a fresh id, later occurrences
    /// emit `USE_KEY`. With interning disabled the key is an inline
    /// string and the table is left untouched.
    pub fn write_key(&mut self, key: &str) -> Result<(), Error> {
        if !self.options.use_key_interning {
            return self.write_str(key);
        }
        match self.key_ids.get(key) {
            Some(&id) => self.use_key(id),
            None => {
                self.set_key(key)?;
                Ok(())
            }
        }
    }

    /// Emits `SET_KEY` with a freshly allocated id and returns that id.
    /// Ids are dense and monotonic from 0 until the next clear.
    pub fn set_key(&mut self, key: &str) -> Result<u32, Error> {
        let id = self.next_key_id;
        self.sink.write_u8(marker::SET_KEY)?;
        write_varint(&mut self.sink, id)?;
        self.write_str(key)?;
        self.next_key_id += 1;
        self.key_ids.insert(key.to_owned(), id);
        Ok(id)
    }

    /// Emits `USE_KEY(id)`. The id is not validated against the local
    /// table; referencing an id the consumer has never seen defined is a
    /// protocol violation it will reject.
    pub fn use_key(&mut self, id: u32) -> Result<(), Error> {
        self.sink.write_u8(marker::USE_KEY)?;
        write_varint(&mut self.sink, id)?;
        Ok(())
    }

    /// Emits `DEFINE_STRUCT` for the given field-name list and returns
    /// the allocated template id. Field names are themselves written
    /// through [`write_key`](PackWriter::write_key), so they intern like
    /// any other key. Templates are limited to 255 fields.
    pub fn define_struct<S>(&mut self, fields: &[S]) -> Result<u32, Error>
    where
        S: AsRef<str>,
    {
        let count = u8::try_from(fields.len()).map_err(|_| {
            Error::UnsupportedTarget(format!(
                "struct template with {} fields exceeds the 255-field limit",
                fields.len()
            ))
        })?;

        let id = self.next_struct_id;
        self.sink.write_u8(marker::DEFINE_STRUCT)?;
        write_varint(&mut self.sink, id)?;
        self.sink.write_u8(count)?;
        for field in fields {
            self.write_key(field.as_ref())?;
        }
        self.next_struct_id += 1;
        Ok(id)
    }

    /// Emits `USE_STRUCT(id)`; the caller must follow with exactly one
    /// value per template field, in declared order.
    pub fn use_struct(&mut self, id: u32) -> Result<(), Error> {
        self.sink.write_u8(marker::USE_STRUCT)?;
        write_varint(&mut self.sink, id)?;
        Ok(())
    }

    /// Emits `CLEAR_KEYS` and resets the local key table; the next key
    /// id is 0.
    pub fn clear_keys(&mut self) -> Result<(), Error> {
        self.sink.write_u8(marker::CLEAR_KEYS)?;
        self.key_ids.clear();
        self.next_key_id = 0;
        Ok(())
    }

    /// Emits `CLEAR_STRUCTS` and resets the template counter.
    pub fn clear_structs(&mut self) -> Result<(), Error> {
        self.sink.write_u8(marker::CLEAR_STRUCTS)?;
        self.next_struct_id = 0;
        Ok(())
    }

    /// Emits `CLEAR_ALL`, resetting both tables at once.
    pub fn clear_all(&mut self) -> Result<(), Error> {
        self.sink.write_u8(marker::CLEAR_ALL)?;
        self.key_ids.clear();
        self.next_key_id = 0;
        self.next_struct_id = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written(f: impl FnOnce(&mut PackWriter<&mut Vec<u8>>)) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut writer = PackWriter::new(&mut buf);
        f(&mut writer);
        buf
    }

    fn int_bytes(value: i64) -> Vec<u8> {
        written(|w| w.write_int(value).unwrap())
    }

    fn uint_bytes(value: u64) -> Vec<u8> {
        written(|w| w.write_uint(value).unwrap())
    }

    #[test]
    fn signed_compaction_boundaries() {
        assert_eq!(int_bytes(0), hex::decode("00").unwrap());
        assert_eq!(int_bytes(127), hex::decode("7f").unwrap());
        assert_eq!(int_bytes(128), hex::decode("cd0080").unwrap());
        assert_eq!(int_bytes(255), hex::decode("cd00ff").unwrap());
        assert_eq!(int_bytes(32767), hex::decode("cd7fff").unwrap());
        assert_eq!(int_bytes(32768), hex::decode("ce00008000").unwrap());
        assert_eq!(int_bytes(i64::from(i32::MAX)), hex::decode("ce7fffffff").unwrap());
        assert_eq!(
            int_bytes(i64::from(i32::MAX) + 1),
            hex::decode("cf0000000080000000").unwrap()
        );
        assert_eq!(int_bytes(i64::MAX), hex::decode("cf7fffffffffffffff").unwrap());
    }

    #[test]
    fn negative_compaction_boundaries() {
        assert_eq!(int_bytes(-1), hex::decode("ef").unwrap());
        assert_eq!(int_bytes(-16), hex::decode("e0").unwrap());
        assert_eq!(int_bytes(-17), hex::decode("ccef").unwrap());
        assert_eq!(int_bytes(-128), hex::decode("cc80").unwrap());
        assert_eq!(int_bytes(-129), hex::decode("cdff7f").unwrap());
        assert_eq!(int_bytes(-32768), hex::decode("cd8000").unwrap());
        assert_eq!(int_bytes(-32769), hex::decode("ceffff7fff").unwrap());
        assert_eq!(int_bytes(i64::MIN), hex::decode("cf8000000000000000").unwrap());
    }

    #[test]
    fn unsigned_compaction_boundaries() {
        assert_eq!(uint_bytes(127), hex::decode("7f").unwrap());
        assert_eq!(uint_bytes(128), hex::decode("c880").unwrap());
        assert_eq!(uint_bytes(255), hex::decode("c8ff").unwrap());
        assert_eq!(uint_bytes(256), hex::decode("c90100").unwrap());
        assert_eq!(uint_bytes(65535), hex::decode("c9ffff").unwrap());
        assert_eq!(uint_bytes(65536), hex::decode("ca00010000").unwrap());
        assert_eq!(uint_bytes(u64::from(u32::MAX)), hex::decode("caffffffff").unwrap());
        assert_eq!(uint_bytes(u64::MAX), hex::decode("cbffffffffffffffff").unwrap());
    }

    #[test]
    fn string_length_classes() {
        for (length, prefix) in [
            (31, vec![0xBFu8]),
            (32, vec![0xD0, 32]),
            (255, vec![0xD0, 255]),
            (256, vec![0xD1, 0x01, 0x00]),
            (65535, vec![0xD1, 0xFF, 0xFF]),
            (65536, vec![0xD2, 0x00, 0x01, 0x00, 0x00]),
        ] {
            let text = "a".repeat(length);
            let bytes = written(|w| w.write_str(&text).unwrap());
            assert_eq!(&bytes[..prefix.len()], &prefix[..], "length {}", length);
            assert_eq!(bytes.len(), prefix.len() + length);
        }
    }

    #[test]
    fn collection_header_classes() {
        assert_eq!(written(|w| w.write_array_header(15).unwrap()), vec![0x9F]);
        assert_eq!(
            written(|w| w.write_array_header(16).unwrap()),
            vec![0xD3, 0x00, 0x10]
        );
        assert_eq!(
            written(|w| w.write_array_header(65536).unwrap()),
            vec![0xD4, 0x00, 0x01, 0x00, 0x00]
        );
        assert_eq!(written(|w| w.write_map_header(15).unwrap()), vec![0x8F]);
        assert_eq!(
            written(|w| w.write_map_header(16).unwrap()),
            vec![0xD5, 0x00, 0x10]
        );
        assert_eq!(
            written(|w| w.write_map_header(65536).unwrap()),
            vec![0xD6, 0x00, 0x01, 0x00, 0x00]
        );
    }

    #[test]
    fn repeated_key_interns() {
        let bytes = written(|w| {
            w.write_key("name").unwrap();
            w.write_key("name").unwrap();
        });
        // SET_KEY id=0 "name", then USE_KEY id=0
        assert_eq!(bytes, hex::decode("f000a46e616d65f100").unwrap());
    }

    #[test]
    fn interning_disabled_writes_inline_strings() {
        let mut buf = Vec::new();
        let mut writer = PackWriter::with_options(
            &mut buf,
            SerializerOptions {
                use_key_interning: false,
                ..SerializerOptions::default()
            },
        );
        writer.write_key("name").unwrap();
        writer.write_key("name").unwrap();
        drop(writer);
        assert_eq!(buf, hex::decode("a46e616d65a46e616d65").unwrap());
    }

    #[test]
    fn define_struct_interns_field_names() {
        let bytes = written(|w| {
            let id = w.define_struct(&["a", "b"]).unwrap();
            assert_eq!(id, 0);
            let id = w.define_struct(&["a"]).unwrap();
            assert_eq!(id, 1);
        });
        // first define carries SET_KEYs, second reuses key id 0
        assert_eq!(
            bytes,
            hex::decode("f20002f000a161f001a162f20101f100").unwrap()
        );
    }

    #[test]
    fn clear_resets_id_allocation() {
        let bytes = written(|w| {
            w.write_key("k").unwrap();
            w.clear_all().unwrap();
            w.write_key("k").unwrap();
        });
        // both occurrences are SET_KEY id=0, separated by CLEAR_ALL
        assert_eq!(bytes, hex::decode("f000a16bf6f000a16b").unwrap());
    }

    #[test]
    fn oversized_struct_template_is_rejected() {
        let fields: Vec<String> = (0..256).map(|i| format!("f{}", i)).collect();
        let mut buf = Vec::new();
        let mut writer = PackWriter::new(&mut buf);
        assert!(matches!(
            writer.define_struct(&fields),
            Err(Error::UnsupportedTarget(_))
        ));
    }
}
