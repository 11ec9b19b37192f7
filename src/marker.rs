//! The wire alphabet: one leading marker byte classifies every token.
//!
//! ## Layout
//! ```text
//! +-------------+---------------------+--------------------------------------+
//! | marker      | meaning             | payload                              |
//! +=============+=====================+======================================+
//! | 0x00..0x7F  | positive fixint     | value is the marker itself           |
//! | 0x80..0x8F  | fixmap              | low 4 bits = pair count, pairs follow|
//! | 0x90..0x9F  | fixarray            | low 4 bits = element count           |
//! | 0xA0..0xBF  | fixstr              | low 5 bits = UTF-8 byte length       |
//! | 0xC0        | nil                 | -                                    |
//! | 0xC1 / 0xC2 | false / true        | -                                    |
//! | 0xC3..0xC5  | bin8/16/32          | uN length (big-endian), then bytes   |
//! | 0xC6 / 0xC7 | float32 / float64   | 4 / 8 bytes big-endian IEEE 754      |
//! | 0xC8..0xCB  | uint8/16/32/64      | N bytes big-endian                   |
//! | 0xCC..0xCF  | int8/16/32/64       | N bytes big-endian two's complement  |
//! | 0xD0..0xD2  | str8/16/32          | length, then UTF-8 bytes             |
//! | 0xD3 / 0xD4 | array16/32          | element count, then elements         |
//! | 0xD5 / 0xD6 | map16/32            | pair count, then pairs               |
//! | 0xE0..0xEF  | negative fixint     | value = (marker & 0x0F) - 16         |
//! | 0xF0..0xF9  | commands            | see the command constants below      |
//! | 0xFA..0xFF  | reserved            | decoder raises MalformedToken        |
//! ```
//!
//! Unassigned bytes in `0xD7..0xDF` are likewise reserved.

/// Highest positive fixint marker (values 0..=127 encode as themselves).
pub const POS_FIXINT_MAX: u8 = 0x7F;

/// Base marker for fixmap; low 4 bits carry the pair count (0..=15).
pub const FIXMAP: u8 = 0x80;
/// Base marker for fixarray; low 4 bits carry the element count (0..=15).
pub const FIXARRAY: u8 = 0x90;
/// Base marker for fixstr; low 5 bits carry the byte length (0..=31).
pub const FIXSTR: u8 = 0xA0;

pub const NIL: u8 = 0xC0;
pub const FALSE: u8 = 0xC1;
pub const TRUE: u8 = 0xC2;

pub const BIN8: u8 = 0xC3;
pub const BIN16: u8 = 0xC4;
pub const BIN32: u8 = 0xC5;

pub const FLOAT32: u8 = 0xC6;
pub const FLOAT64: u8 = 0xC7;

pub const UINT8: u8 = 0xC8;
pub const UINT16: u8 = 0xC9;
pub const UINT32: u8 = 0xCA;
pub const UINT64: u8 = 0xCB;

pub const INT8: u8 = 0xCC;
pub const INT16: u8 = 0xCD;
pub const INT32: u8 = 0xCE;
pub const INT64: u8 = 0xCF;

pub const STR8: u8 = 0xD0;
pub const STR16: u8 = 0xD1;
pub const STR32: u8 = 0xD2;

pub const ARRAY16: u8 = 0xD3;
pub const ARRAY32: u8 = 0xD4;

pub const MAP16: u8 = 0xD5;
pub const MAP32: u8 = 0xD6;

/// Base marker for negative fixint; value = `(marker & 0x0F) - 16`.
pub const NEG_FIXINT: u8 = 0xE0;

// --- commands (0xF0..0xF9) ---

/// `varint id` + string token: inserts `id -> s` into the key table.
pub const SET_KEY: u8 = 0xF0;
/// `varint id`: dereferences the key table.
pub const USE_KEY: u8 = 0xF1;
/// `varint id` + `u8 count` + `count` key tokens: registers a template.
pub const DEFINE_STRUCT: u8 = 0xF2;
/// `varint id`: the template's field values follow in declared order.
pub const USE_STRUCT: u8 = 0xF3;
pub const CLEAR_KEYS: u8 = 0xF4;
pub const CLEAR_STRUCTS: u8 = 0xF5;
pub const CLEAR_ALL: u8 = 0xF6;
/// Opens an unbounded array, closed by [`END`].
pub const BEGIN_ARRAY: u8 = 0xF7;
/// Closes the innermost open `BEGIN_*` frame.
pub const END: u8 = 0xF8;
/// Opens an unbounded map, closed by [`END`].
pub const BEGIN_MAP: u8 = 0xF9;

/// Classification of the next token, as reported by a non-consuming peek.
///
/// Framing commands classify as the collection they open (`BEGIN_ARRAY`
/// is an [`Array`](PackType::Array), `BEGIN_MAP` a [`Map`](PackType::Map))
/// so a peek-driven consumer dispatches on logical shape, not on framing.
/// Only the table-clearing commands surface as
/// [`Command`](PackType::Command).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PackType {
    Nil,
    Boolean,
    Integer,
    Float,
    String,
    Binary,
    Array,
    Map,
    /// `SET_KEY` or `USE_KEY` — an interned string.
    Key,
    /// `DEFINE_STRUCT` or `USE_STRUCT`.
    Struct,
    /// A table-clearing command (`CLEAR_KEYS`, `CLEAR_STRUCTS`, `CLEAR_ALL`).
    Command,
    /// The `END` of an unbounded collection.
    End,
    /// No further tokens; only produced between top-level tokens.
    EndOfStream,
    /// A reserved or unassigned marker.
    Unknown,
}

impl From<u8> for PackType {
    /// Classifies a marker byte. Reserved markers map to
    /// [`PackType::Unknown`]; the reader turns those into
    /// `MalformedToken` when actually consumed.
    fn from(marker: u8) -> Self {
        match marker {
            0x00..=0x7F => PackType::Integer,
            0x80..=0x8F => PackType::Map,
            0x90..=0x9F => PackType::Array,
            0xA0..=0xBF => PackType::String,
            NIL => PackType::Nil,
            FALSE | TRUE => PackType::Boolean,
            BIN8 | BIN16 | BIN32 => PackType::Binary,
            FLOAT32 | FLOAT64 => PackType::Float,
            UINT8..=UINT64 => PackType::Integer,
            INT8..=INT64 => PackType::Integer,
            STR8 | STR16 | STR32 => PackType::String,
            ARRAY16 | ARRAY32 => PackType::Array,
            MAP16 | MAP32 => PackType::Map,
            0xE0..=0xEF => PackType::Integer,
            SET_KEY | USE_KEY => PackType::Key,
            DEFINE_STRUCT | USE_STRUCT => PackType::Struct,
            CLEAR_KEYS | CLEAR_STRUCTS | CLEAR_ALL => PackType::Command,
            BEGIN_ARRAY => PackType::Array,
            BEGIN_MAP => PackType::Map,
            END => PackType::End,
            _ => PackType::Unknown,
        }
    }
}

impl std::fmt::Display for PackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PackType::Nil => "nil",
            PackType::Boolean => "boolean",
            PackType::Integer => "integer",
            PackType::Float => "float",
            PackType::String => "string",
            PackType::Binary => "binary",
            PackType::Array => "array",
            PackType::Map => "map",
            PackType::Key => "key",
            PackType::Struct => "struct",
            PackType::Command => "command",
            PackType::End => "end",
            PackType::EndOfStream => "end of stream",
            PackType::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fix_ranges_classify() {
        assert_eq!(PackType::from(0x00), PackType::Integer);
        assert_eq!(PackType::from(0x7F), PackType::Integer);
        assert_eq!(PackType::from(0x80), PackType::Map);
        assert_eq!(PackType::from(0x8F), PackType::Map);
        assert_eq!(PackType::from(0x90), PackType::Array);
        assert_eq!(PackType::from(0x9F), PackType::Array);
        assert_eq!(PackType::from(0xA0), PackType::String);
        assert_eq!(PackType::from(0xBF), PackType::String);
        assert_eq!(PackType::from(0xE0), PackType::Integer);
        assert_eq!(PackType::from(0xEF), PackType::Integer);
    }

    #[test]
    fn commands_classify_by_shape() {
        assert_eq!(PackType::from(BEGIN_ARRAY), PackType::Array);
        assert_eq!(PackType::from(BEGIN_MAP), PackType::Map);
        assert_eq!(PackType::from(END), PackType::End);
        assert_eq!(PackType::from(SET_KEY), PackType::Key);
        assert_eq!(PackType::from(USE_KEY), PackType::Key);
        assert_eq!(PackType::from(DEFINE_STRUCT), PackType::Struct);
        assert_eq!(PackType::from(USE_STRUCT), PackType::Struct);
        assert_eq!(PackType::from(CLEAR_KEYS), PackType::Command);
        assert_eq!(PackType::from(CLEAR_ALL), PackType::Command);
    }

    #[test]
    fn reserved_markers_are_unknown() {
        for marker in 0xFA..=0xFF {
            assert_eq!(PackType::from(marker), PackType::Unknown);
        }
        for marker in 0xD7..=0xDF {
            assert_eq!(PackType::from(marker), PackType::Unknown);
        }
    }
}
