//! Low-level decoder: marker classification, typed reads, the
//! decoder-side symbol tables, and structural skip.

use std::collections::HashMap;
use std::io;
use std::rc::Rc;

use byteorder::{BigEndian, ReadBytesExt};

use crate::{
    error::Error,
    marker::{self, PackType},
    options::{ReaderLimits, SerializerOptions},
    util::{discard, read_varint},
};

/// A decoded `DEFINE_STRUCT` or `USE_STRUCT` header.
///
/// After a `DEFINE_STRUCT` the template is registered but **no values
/// follow** (`values_follow` is `false`); after a `USE_STRUCT` exactly
/// one value per field follows in declared order.
#[derive(Debug, Clone)]
pub struct StructHeader {
    /// Field names of the template, in declared order.
    pub fields: Rc<Vec<String>>,
    /// Whether the template's field values follow this header.
    pub values_follow: bool,
}

/// Streaming decoder over any [`io::Read`] source.
///
/// The reader keeps a one-byte lookahead cell so the next token can be
/// classified without consuming it, maintains the decoder side of the
/// key and struct-template tables, and enforces [`ReaderLimits`] before
/// allocating. Family mismatches in typed reads are detected from the
/// peeked marker, so a failed typed read leaves the cursor at the start
/// of the offending token.
///
/// Constructing over `&mut S` leaves the underlying stream open;
/// constructing over an owned source transfers ownership, recoverable
/// via [`into_inner`](PackReader::into_inner).
pub struct PackReader<R: io::Read> {
    src: R,
    peeked: Option<u8>,
    keys: HashMap<u32, String>,
    structs: HashMap<u32, Rc<Vec<String>>>,
    limits: ReaderLimits,
    options: SerializerOptions,
    open_frames: usize,
    depth: usize,
}

impl<R: io::Read> PackReader<R> {
    /// Creates a reader with default limits and options.
    pub fn new(src: R) -> PackReader<R> {
        PackReader::with_options(src, ReaderLimits::default(), SerializerOptions::default())
    }

    /// Creates a reader with explicit limits.
    pub fn with_limits(src: R, limits: ReaderLimits) -> PackReader<R> {
        PackReader::with_options(src, limits, SerializerOptions::default())
    }

    /// Creates a reader with explicit limits and decode-side options
    /// (the moment-format policy is the only option the decoder
    /// consults).
    pub fn with_options(
        src: R,
        limits: ReaderLimits,
        options: SerializerOptions,
    ) -> PackReader<R> {
        PackReader {
            src,
            peeked: None,
            keys: HashMap::new(),
            structs: HashMap::new(),
            limits,
            options,
            open_frames: 0,
            depth: 0,
        }
    }

    pub fn options(&self) -> &SerializerOptions {
        &self.options
    }

    pub fn limits(&self) -> &ReaderLimits {
        &self.limits
    }

    /// Consumes the reader, returning the underlying source. Any byte
    /// held in the lookahead cell is lost.
    pub fn into_inner(self) -> R {
        self.src
    }

    // ------------------------------------------------------------------------------------
    // lookahead
    // ------------------------------------------------------------------------------------

    fn peek_byte(&mut self) -> Result<Option<u8>, Error> {
        if let Some(byte) = self.peeked {
            return Ok(Some(byte));
        }
        let mut buf = [0u8; 1];
        loop {
            match self.src.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.peeked = Some(buf[0]);
                    return Ok(Some(buf[0]));
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn next_byte(&mut self) -> Result<u8, Error> {
        match self.peek_byte()? {
            Some(byte) => {
                self.peeked = None;
                Ok(byte)
            }
            None => Err(Error::Truncated),
        }
    }

    /// Classifies the next token without consuming anything.
    /// End-of-stream between top-level tokens reports
    /// [`PackType::EndOfStream`].
    pub fn peek_type(&mut self) -> Result<PackType, Error> {
        Ok(match self.peek_byte()? {
            Some(byte) => PackType::from(byte),
            None => PackType::EndOfStream,
        })
    }

    /// Consumes the leading marker byte and returns its classification.
    /// The token's payload (if any) is **not** consumed; prefer
    /// [`peek_type`](PackReader::peek_type) unless the token is known to
    /// be payload-free.
    pub fn read_type(&mut self) -> Result<PackType, Error> {
        if self.peek_byte()?.is_none() {
            return Ok(PackType::EndOfStream);
        }
        Ok(PackType::from(self.next_byte()?))
    }

    /// Applies any pending table-clearing commands, then classifies the
    /// next token. This is the peek the binding layer drives its
    /// dispatch loops with.
    pub fn next_type(&mut self) -> Result<PackType, Error> {
        loop {
            match self.peek_type()? {
                PackType::Command => self.read_command()?,
                other => return Ok(other),
            }
        }
    }

    fn mismatch(&mut self, expected: &str) -> Error {
        match self.peek_type() {
            Ok(found) => Error::TypeMismatch(format!("expected {}, found {}", expected, found)),
            Err(err) => err,
        }
    }

    // ------------------------------------------------------------------------------------
    // scalar tokens
    // ------------------------------------------------------------------------------------

    pub fn read_nil(&mut self) -> Result<(), Error> {
        match self.peek_byte()? {
            Some(marker::NIL) => {
                self.next_byte()?;
                Ok(())
            }
            _ => Err(self.mismatch("nil")),
        }
    }

    pub fn read_bool(&mut self) -> Result<bool, Error> {
        match self.peek_byte()? {
            Some(marker::FALSE) => {
                self.next_byte()?;
                Ok(false)
            }
            Some(marker::TRUE) => {
                self.next_byte()?;
                Ok(true)
            }
            _ => Err(self.mismatch("boolean")),
        }
    }

    /// Reads any integer token as `i64`. A `uint64` above `i64::MAX`
    /// cannot widen and fails with `TypeMismatch`.
    pub fn read_int(&mut self) -> Result<i64, Error> {
        let lead = match self.peek_byte()? {
            Some(byte) if PackType::from(byte) == PackType::Integer => self.next_byte()?,
            _ => return Err(self.mismatch("integer")),
        };
        let value = match lead {
            0x00..=0x7F => i64::from(lead),
            0xE0..=0xEF => i64::from(lead & 0x0F) - 16,
            marker::UINT8 => i64::from(self.src.read_u8()?),
            marker::UINT16 => i64::from(self.src.read_u16::<BigEndian>()?),
            marker::UINT32 => i64::from(self.src.read_u32::<BigEndian>()?),
            marker::UINT64 => {
                let wide = self.src.read_u64::<BigEndian>()?;
                i64::try_from(wide).map_err(|_| {
                    Error::TypeMismatch(format!("uint64 value {} is out of i64 range", wide))
                })?
            }
            marker::INT8 => i64::from(self.src.read_i8()?),
            marker::INT16 => i64::from(self.src.read_i16::<BigEndian>()?),
            marker::INT32 => i64::from(self.src.read_i32::<BigEndian>()?),
            _ => self.src.read_i64::<BigEndian>()?,
        };
        Ok(value)
    }

    /// Reads any non-negative integer token as `u64`.
    pub fn read_uint(&mut self) -> Result<u64, Error> {
        let lead = match self.peek_byte()? {
            Some(byte) if PackType::from(byte) == PackType::Integer => byte,
            _ => return Err(self.mismatch("unsigned integer")),
        };
        match lead {
            marker::UINT8 => {
                self.next_byte()?;
                Ok(u64::from(self.src.read_u8()?))
            }
            marker::UINT16 => {
                self.next_byte()?;
                Ok(u64::from(self.src.read_u16::<BigEndian>()?))
            }
            marker::UINT32 => {
                self.next_byte()?;
                Ok(u64::from(self.src.read_u32::<BigEndian>()?))
            }
            marker::UINT64 => {
                self.next_byte()?;
                Ok(self.src.read_u64::<BigEndian>()?)
            }
            _ => {
                let value = self.read_int()?;
                u64::try_from(value).map_err(|_| {
                    Error::TypeMismatch(format!("integer {} is negative", value))
                })
            }
        }
    }

    /// Reads a float token as `f32`; a float64 payload is narrowed.
    pub fn read_f32(&mut self) -> Result<f32, Error> {
        match self.peek_byte()? {
            Some(marker::FLOAT32) => {
                self.next_byte()?;
                Ok(self.src.read_f32::<BigEndian>()?)
            }
            Some(marker::FLOAT64) => {
                self.next_byte()?;
                Ok(self.src.read_f64::<BigEndian>()? as f32)
            }
            _ => Err(self.mismatch("float")),
        }
    }

    /// Reads a float token as `f64`; a float32 payload widens.
    pub fn read_f64(&mut self) -> Result<f64, Error> {
        match self.peek_byte()? {
            Some(marker::FLOAT32) => {
                self.next_byte()?;
                Ok(f64::from(self.src.read_f32::<BigEndian>()?))
            }
            Some(marker::FLOAT64) => {
                self.next_byte()?;
                Ok(self.src.read_f64::<BigEndian>()?)
            }
            _ => Err(self.mismatch("float")),
        }
    }

    /// Reads a string token. `SET_KEY` and `USE_KEY` are accepted here
    /// as well — producers are free to emit map keys through either the
    /// string or the key path, and a correct decoder takes both.
    pub fn read_str(&mut self) -> Result<String, Error> {
        match self.peek_byte()? {
            Some(marker::SET_KEY) | Some(marker::USE_KEY) => self.read_key(),
            Some(byte) if PackType::from(byte) == PackType::String => {
                self.next_byte()?;
                self.read_str_payload(byte)
            }
            _ => Err(self.mismatch("string")),
        }
    }

    /// Reads the length and UTF-8 payload of a string token whose marker
    /// has already been consumed.
    fn read_str_payload(&mut self, lead: u8) -> Result<String, Error> {
        let length = match lead {
            0xA0..=0xBF => usize::from(lead & 0x1F),
            marker::STR8 => usize::from(self.src.read_u8()?),
            marker::STR16 => usize::from(self.src.read_u16::<BigEndian>()?),
            _ => self.checked_u32_length()?,
        };
        if length > self.limits.max_string_length {
            return Err(Error::LimitExceeded(format!(
                "string of {} bytes exceeds the {}-byte limit",
                length, self.limits.max_string_length
            )));
        }
        let mut buf = vec![0u8; length];
        self.src.read_exact(&mut buf)?;
        String::from_utf8(buf)
            .map_err(|_| Error::MalformedToken("string payload is not valid UTF-8".into()))
    }

    /// Reads a binary token.
    pub fn read_bin(&mut self) -> Result<Vec<u8>, Error> {
        let lead = match self.peek_byte()? {
            Some(byte) if PackType::from(byte) == PackType::Binary => self.next_byte()?,
            _ => return Err(self.mismatch("binary")),
        };
        let length = match lead {
            marker::BIN8 => usize::from(self.src.read_u8()?),
            marker::BIN16 => usize::from(self.src.read_u16::<BigEndian>()?),
            _ => self.checked_u32_length()?,
        };
        if length > self.limits.max_binary_length {
            return Err(Error::LimitExceeded(format!(
                "binary of {} bytes exceeds the {}-byte limit",
                length, self.limits.max_binary_length
            )));
        }
        let mut buf = vec![0u8; length];
        self.src.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn checked_u32_length(&mut self) -> Result<usize, Error> {
        let length = self.src.read_u32::<BigEndian>()?;
        usize::try_from(length).map_err(|_| {
            Error::LimitExceeded(format!("length {} does not fit in usize", length))
        })
    }

    // ------------------------------------------------------------------------------------
    // collection headers and framing
    // ------------------------------------------------------------------------------------

    /// Reads an array header. `Some(n)` for a counted array, `None` for
    /// an unbounded one (`BEGIN_ARRAY`, terminated by `END`).
    pub fn read_array_header(&mut self) -> Result<Option<usize>, Error> {
        let lead = match self.peek_byte()? {
            Some(byte) if PackType::from(byte) == PackType::Array => self.next_byte()?,
            _ => return Err(self.mismatch("array")),
        };
        match lead {
            0x90..=0x9F => Ok(Some(usize::from(lead & 0x0F))),
            marker::ARRAY16 => Ok(Some(usize::from(self.src.read_u16::<BigEndian>()?))),
            marker::ARRAY32 => Ok(Some(self.checked_u32_length()?)),
            _ => {
                self.open_frames += 1;
                Ok(None)
            }
        }
    }

    /// Reads a map header. `Some(n)` for a counted map (n pairs), `None`
    /// for an unbounded one (`BEGIN_MAP`, terminated by `END`).
    pub fn read_map_header(&mut self) -> Result<Option<usize>, Error> {
        let lead = match self.peek_byte()? {
            Some(byte) if PackType::from(byte) == PackType::Map => self.next_byte()?,
            _ => return Err(self.mismatch("map")),
        };
        match lead {
            0x80..=0x8F => Ok(Some(usize::from(lead & 0x0F))),
            marker::MAP16 => Ok(Some(usize::from(self.src.read_u16::<BigEndian>()?))),
            marker::MAP32 => Ok(Some(self.checked_u32_length()?)),
            _ => {
                self.open_frames += 1;
                Ok(None)
            }
        }
    }

    /// Whether the next token closes the innermost unbounded frame.
    pub fn is_end(&mut self) -> Result<bool, Error> {
        Ok(self.peek_type()? == PackType::End)
    }

    /// Consumes the `END` of an unbounded frame.
    pub fn read_end(&mut self) -> Result<(), Error> {
        match self.peek_byte()? {
            Some(marker::END) => {
                if self.open_frames == 0 {
                    return Err(Error::InvalidNesting(
                        "END with no open BEGIN_ARRAY or BEGIN_MAP".into(),
                    ));
                }
                self.next_byte()?;
                self.open_frames -= 1;
                Ok(())
            }
            _ => Err(self.mismatch("end")),
        }
    }

    // ------------------------------------------------------------------------------------
    // commands
    // ------------------------------------------------------------------------------------

    /// Consumes one table-clearing command and applies it to the
    /// decoder-side tables.
    pub fn read_command(&mut self) -> Result<(), Error> {
        match self.peek_byte()? {
            Some(marker::CLEAR_KEYS) => {
                self.next_byte()?;
                self.keys.clear();
                Ok(())
            }
            Some(marker::CLEAR_STRUCTS) => {
                self.next_byte()?;
                self.structs.clear();
                Ok(())
            }
            Some(marker::CLEAR_ALL) => {
                self.next_byte()?;
                self.keys.clear();
                self.structs.clear();
                Ok(())
            }
            _ => Err(self.mismatch("command")),
        }
    }

    /// Reads a map key: dereferences `USE_KEY`, records and returns a
    /// `SET_KEY` definition, or takes an inline string. Table-clearing
    /// commands encountered in key position are applied transparently.
    ///
    /// A `SET_KEY` payload may itself be a key token; the chain is
    /// walked iteratively and every pending id ends up defined to the
    /// resolved string.
    pub fn read_key(&mut self) -> Result<String, Error> {
        let mut pending: Vec<u32> = Vec::new();
        loop {
            match self.peek_byte()? {
                Some(marker::SET_KEY) => {
                    self.next_byte()?;
                    pending.push(read_varint(&mut self.src)?);
                }
                Some(marker::USE_KEY) => {
                    self.next_byte()?;
                    let id = read_varint(&mut self.src)?;
                    let key = match self.keys.get(&id) {
                        Some(key) => key.clone(),
                        None => return Err(Error::UnknownKeyId(id)),
                    };
                    return self.finish_key(pending, key);
                }
                Some(byte) if PackType::from(byte) == PackType::String => {
                    self.next_byte()?;
                    let key = self.read_str_payload(byte)?;
                    return self.finish_key(pending, key);
                }
                Some(byte) if PackType::from(byte) == PackType::Command => {
                    self.read_command()?;
                }
                _ => return Err(self.mismatch("key or string")),
            }
        }
    }

    fn finish_key(&mut self, pending: Vec<u32>, key: String) -> Result<String, Error> {
        for id in pending {
            self.insert_key(id, key.clone())?;
        }
        Ok(key)
    }

    fn insert_key(&mut self, id: u32, key: String) -> Result<(), Error> {
        if !self.keys.contains_key(&id) && self.keys.len() >= self.limits.max_key_table_size {
            return Err(Error::LimitExceeded(format!(
                "key table would exceed {} entries",
                self.limits.max_key_table_size
            )));
        }
        self.keys.insert(id, key);
        Ok(())
    }

    /// Reads a `DEFINE_STRUCT` (registering the template) or a
    /// `USE_STRUCT` (lookup only). See [`StructHeader`] for the
    /// distinction consumers must make.
    pub fn read_struct_header(&mut self) -> Result<StructHeader, Error> {
        loop {
            match self.peek_byte()? {
                Some(marker::DEFINE_STRUCT) => {
                    self.next_byte()?;
                    let id = read_varint(&mut self.src)?;
                    let count = self.src.read_u8()?;
                    let mut fields = Vec::with_capacity(usize::from(count));
                    for _ in 0..count {
                        fields.push(self.read_key()?);
                    }
                    if !self.structs.contains_key(&id)
                        && self.structs.len() >= self.limits.max_struct_table_size
                    {
                        return Err(Error::LimitExceeded(format!(
                            "struct table would exceed {} entries",
                            self.limits.max_struct_table_size
                        )));
                    }
                    let fields = Rc::new(fields);
                    self.structs.insert(id, Rc::clone(&fields));
                    return Ok(StructHeader {
                        fields,
                        values_follow: false,
                    });
                }
                Some(marker::USE_STRUCT) => {
                    self.next_byte()?;
                    let id = read_varint(&mut self.src)?;
                    return match self.structs.get(&id) {
                        Some(fields) => Ok(StructHeader {
                            fields: Rc::clone(fields),
                            values_follow: true,
                        }),
                        None => Err(Error::UnknownStructId(id)),
                    };
                }
                Some(byte) if PackType::from(byte) == PackType::Command => {
                    self.read_command()?;
                }
                _ => return Err(self.mismatch("struct")),
            }
        }
    }

    // ------------------------------------------------------------------------------------
    // structural skip
    // ------------------------------------------------------------------------------------

    /// Consumes exactly one logical value and its whole subtree,
    /// including unbounded collections up to their matching `END`.
    /// Commands inside the subtree are framed over but **never applied**:
    /// skipping does not mutate the symbol tables. Iterative, so hostile
    /// nesting depth cannot exhaust the call stack.
    pub fn skip(&mut self) -> Result<(), Error> {
        enum Scope {
            Counted(u64),
            Unbounded,
        }

        let mut scopes = vec![Scope::Counted(1)];
        loop {
            match scopes.last_mut() {
                None => return Ok(()),
                Some(Scope::Counted(0)) => {
                    scopes.pop();
                    continue;
                }
                Some(Scope::Unbounded) => {
                    if self.peek_byte()? == Some(marker::END) {
                        self.next_byte()?;
                        scopes.pop();
                        continue;
                    }
                }
                Some(Scope::Counted(_)) => {}
            }

            // table clears occupy no value slot
            if let Some(byte) = self.peek_byte()? {
                if matches!(
                    byte,
                    marker::CLEAR_KEYS | marker::CLEAR_STRUCTS | marker::CLEAR_ALL
                ) {
                    self.next_byte()?;
                    continue;
                }
            }

            if let Some(Scope::Counted(remaining)) = scopes.last_mut() {
                *remaining -= 1;
            }

            let lead = self.next_byte()?;
            match lead {
                0x00..=0x7F | 0xE0..=0xEF | marker::NIL | marker::FALSE | marker::TRUE => {}
                0x80..=0x8F => scopes.push(Scope::Counted(2 * u64::from(lead & 0x0F))),
                0x90..=0x9F => scopes.push(Scope::Counted(u64::from(lead & 0x0F))),
                0xA0..=0xBF => discard(&mut self.src, u64::from(lead & 0x1F))?,
                marker::STR8 | marker::BIN8 => {
                    let length = u64::from(self.src.read_u8()?);
                    discard(&mut self.src, length)?;
                }
                marker::STR16 | marker::BIN16 => {
                    let length = u64::from(self.src.read_u16::<BigEndian>()?);
                    discard(&mut self.src, length)?;
                }
                marker::STR32 | marker::BIN32 => {
                    let length = u64::from(self.src.read_u32::<BigEndian>()?);
                    discard(&mut self.src, length)?;
                }
                marker::FLOAT32 => discard(&mut self.src, 4)?,
                marker::FLOAT64 => discard(&mut self.src, 8)?,
                marker::UINT8 | marker::INT8 => discard(&mut self.src, 1)?,
                marker::UINT16 | marker::INT16 => discard(&mut self.src, 2)?,
                marker::UINT32 | marker::INT32 => discard(&mut self.src, 4)?,
                marker::UINT64 | marker::INT64 => discard(&mut self.src, 8)?,
                marker::ARRAY16 => {
                    let count = u64::from(self.src.read_u16::<BigEndian>()?);
                    scopes.push(Scope::Counted(count));
                }
                marker::ARRAY32 => {
                    let count = u64::from(self.src.read_u32::<BigEndian>()?);
                    scopes.push(Scope::Counted(count));
                }
                marker::MAP16 => {
                    let count = u64::from(self.src.read_u16::<BigEndian>()?);
                    scopes.push(Scope::Counted(2 * count));
                }
                marker::MAP32 => {
                    let count = u64::from(self.src.read_u32::<BigEndian>()?);
                    scopes.push(Scope::Counted(2 * count));
                }
                marker::SET_KEY => {
                    read_varint(&mut self.src)?;
                    // the definition's string token follows
                    scopes.push(Scope::Counted(1));
                }
                marker::USE_KEY | marker::USE_STRUCT => {
                    read_varint(&mut self.src)?;
                }
                marker::DEFINE_STRUCT => {
                    read_varint(&mut self.src)?;
                    let count = self.src.read_u8()?;
                    scopes.push(Scope::Counted(u64::from(count)));
                }
                marker::BEGIN_ARRAY | marker::BEGIN_MAP => scopes.push(Scope::Unbounded),
                marker::END => {
                    return Err(Error::InvalidNesting(
                        "END with no open BEGIN_ARRAY or BEGIN_MAP".into(),
                    ))
                }
                _ => {
                    return Err(Error::MalformedToken(format!(
                        "reserved marker 0x{:02X}",
                        lead
                    )))
                }
            }
        }
    }

    // ------------------------------------------------------------------------------------
    // binder-driven depth accounting
    // ------------------------------------------------------------------------------------

    /// Enters one nesting level. Driven by the binding layer around each
    /// nested collection or record read; low-level reads never call it.
    pub fn enter(&mut self) -> Result<(), Error> {
        if self.depth >= self.limits.max_depth {
            return Err(Error::LimitExceeded(format!(
                "nesting depth exceeds {}",
                self.limits.max_depth
            )));
        }
        self.depth += 1;
        Ok(())
    }

    /// Leaves one nesting level.
    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::PackWriter;
    use std::io::Cursor;

    fn reader_over(bytes: Vec<u8>) -> PackReader<Cursor<Vec<u8>>> {
        PackReader::new(Cursor::new(bytes))
    }

    #[test]
    fn integer_widening_roundtrip() {
        let cases: Vec<i64> = vec![
            0, 1, 127, 128, 255, 256, 32767, 32768, 65535, 65536,
            i64::from(i32::MAX), i64::from(i32::MAX) + 1, i64::MAX,
            -1, -16, -17, -128, -129, -32768, -32769, i64::MIN,
        ];
        for value in cases {
            let mut buf = Vec::new();
            PackWriter::new(&mut buf).write_int(value).unwrap();
            assert_eq!(reader_over(buf).read_int().unwrap(), value, "value {}", value);
        }
    }

    #[test]
    fn uint_roundtrip_and_negative_rejection() {
        let mut buf = Vec::new();
        PackWriter::new(&mut buf).write_uint(u64::MAX).unwrap();
        assert_eq!(reader_over(buf).read_uint().unwrap(), u64::MAX);

        let mut buf = Vec::new();
        PackWriter::new(&mut buf).write_int(-5).unwrap();
        assert!(matches!(
            reader_over(buf).read_uint(),
            Err(Error::TypeMismatch(_))
        ));
    }

    #[test]
    fn typed_read_mismatch_leaves_cursor_at_token() {
        let mut buf = Vec::new();
        PackWriter::new(&mut buf).write_str("still here").unwrap();
        let mut reader = reader_over(buf);
        assert!(matches!(reader.read_int(), Err(Error::TypeMismatch(_))));
        assert_eq!(reader.read_str().unwrap(), "still here");
    }

    #[test]
    fn string_limit_enforced_before_allocation() {
        let mut buf = Vec::new();
        PackWriter::new(&mut buf)
            .write_str(&"x".repeat(20))
            .unwrap();
        let limits = ReaderLimits {
            max_string_length: 10,
            ..ReaderLimits::default()
        };
        let mut reader = PackReader::with_limits(Cursor::new(buf), limits);
        assert!(matches!(reader.read_str(), Err(Error::LimitExceeded(_))));
    }

    #[test]
    fn truncated_payload_reports_truncated() {
        let mut buf = Vec::new();
        PackWriter::new(&mut buf).write_str("truncate me").unwrap();
        buf.truncate(buf.len() - 3);
        assert!(matches!(reader_over(buf).read_str(), Err(Error::Truncated)));
    }

    #[test]
    fn use_key_without_definition_fails() {
        // USE_KEY id=5 with an empty table
        let mut reader = reader_over(vec![marker::USE_KEY, 0x05]);
        assert!(matches!(reader.read_key(), Err(Error::UnknownKeyId(5))));
    }

    #[test]
    fn set_key_then_use_key_resolves() {
        let mut buf = Vec::new();
        let mut writer = PackWriter::new(&mut buf);
        writer.write_key("city").unwrap();
        writer.write_key("city").unwrap();
        drop(writer);

        let mut reader = reader_over(buf);
        assert_eq!(reader.read_key().unwrap(), "city");
        assert_eq!(reader.read_key().unwrap(), "city");
    }

    #[test]
    fn read_str_accepts_interned_keys() {
        let mut buf = Vec::new();
        let mut writer = PackWriter::new(&mut buf);
        writer.write_key("city").unwrap();
        writer.write_key("city").unwrap();
        drop(writer);

        let mut reader = reader_over(buf);
        assert_eq!(reader.read_str().unwrap(), "city");
        assert_eq!(reader.read_str().unwrap(), "city");
    }

    #[test]
    fn clear_keys_resets_decoder_table() {
        let mut buf = Vec::new();
        let mut writer = PackWriter::new(&mut buf);
        writer.set_key("a").unwrap();
        writer.clear_keys().unwrap();
        writer.set_key("b").unwrap();
        writer.use_key(0).unwrap();
        drop(writer);

        let mut reader = reader_over(buf);
        assert_eq!(reader.read_key().unwrap(), "a");
        assert_eq!(reader.next_type().unwrap(), PackType::Key);
        assert_eq!(reader.read_key().unwrap(), "b");
        // id 0 now names "b", not "a"
        assert_eq!(reader.read_key().unwrap(), "b");
    }

    #[test]
    fn key_table_limit_enforced() {
        let mut buf = Vec::new();
        let mut writer = PackWriter::new(&mut buf);
        writer.set_key("one").unwrap();
        writer.set_key("two").unwrap();
        drop(writer);

        let limits = ReaderLimits {
            max_key_table_size: 1,
            ..ReaderLimits::default()
        };
        let mut reader = PackReader::with_limits(Cursor::new(buf), limits);
        assert_eq!(reader.read_key().unwrap(), "one");
        assert!(matches!(reader.read_key(), Err(Error::LimitExceeded(_))));
    }

    #[test]
    fn empty_unbounded_array() {
        let mut reader = reader_over(vec![marker::BEGIN_ARRAY, marker::END]);
        assert_eq!(reader.read_array_header().unwrap(), None);
        assert!(reader.is_end().unwrap());
        reader.read_end().unwrap();
        assert_eq!(reader.peek_type().unwrap(), PackType::EndOfStream);
    }

    #[test]
    fn end_without_open_frame_is_invalid() {
        let mut reader = reader_over(vec![marker::END]);
        assert!(matches!(
            reader.read_end(),
            Err(Error::InvalidNesting(_))
        ));
    }

    #[test]
    fn reserved_marker_fails_skip() {
        let mut reader = reader_over(vec![0xFA]);
        assert!(matches!(reader.skip(), Err(Error::MalformedToken(_))));
    }

    #[test]
    fn skip_is_byte_exact_over_subtrees() {
        let mut buf = Vec::new();
        let mut writer = PackWriter::new(&mut buf);
        // a nested subtree touching most token shapes
        writer.write_map_header(3).unwrap();
        writer.write_key("list").unwrap();
        writer.write_array_header(2).unwrap();
        writer.write_int(-300).unwrap();
        writer.write_str("abc").unwrap();
        writer.write_key("open").unwrap();
        writer.begin_map().unwrap();
        writer.write_key("list").unwrap();
        writer.write_bin(&[1, 2, 3]).unwrap();
        writer.write_end().unwrap();
        writer.write_key("f").unwrap();
        writer.write_f64(3.25).unwrap();
        // sentinel after the subtree
        writer.write_int(77).unwrap();
        drop(writer);

        let mut reader = reader_over(buf);
        reader.skip().unwrap();
        assert_eq!(reader.read_int().unwrap(), 77);
        assert_eq!(reader.peek_type().unwrap(), PackType::EndOfStream);
    }

    #[test]
    fn skip_over_struct_definitions_does_not_register_them() {
        let mut buf = Vec::new();
        let mut writer = PackWriter::new(&mut buf);
        writer.define_struct(&["a", "b"]).unwrap();
        writer.write_int(9).unwrap();
        writer.use_struct(0).unwrap();
        drop(writer);

        let mut reader = reader_over(buf);
        reader.skip().unwrap(); // frames over DEFINE_STRUCT without applying it
        assert_eq!(reader.read_int().unwrap(), 9);
        assert!(matches!(
            reader.read_struct_header(),
            Err(Error::UnknownStructId(0))
        ));
    }

    #[test]
    fn struct_define_then_use() {
        let mut buf = Vec::new();
        let mut writer = PackWriter::new(&mut buf);
        writer.define_struct(&["name", "age"]).unwrap();
        writer.use_struct(0).unwrap();
        writer.write_str("ada").unwrap();
        writer.write_int(36).unwrap();
        drop(writer);

        let mut reader = reader_over(buf);
        let header = reader.read_struct_header().unwrap();
        assert!(!header.values_follow);
        assert_eq!(*header.fields, vec!["name", "age"]);

        let header = reader.read_struct_header().unwrap();
        assert!(header.values_follow);
        assert_eq!(reader.read_str().unwrap(), "ada");
        assert_eq!(reader.read_int().unwrap(), 36);
    }

    #[test]
    fn depth_guard_trips_at_limit() {
        let limits = ReaderLimits {
            max_depth: 2,
            ..ReaderLimits::default()
        };
        let mut reader = PackReader::with_limits(Cursor::new(Vec::new()), limits);
        reader.enter().unwrap();
        reader.enter().unwrap();
        assert!(matches!(reader.enter(), Err(Error::LimitExceeded(_))));
        reader.leave();
        reader.enter().unwrap();
    }
}
