//! `Pack`/`Unpack` for the primitive universe and the canonical
//! non-primitive scalars (decimal, moments, duration, UUID).

use std::io;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{FieldKind, Pack, Unpack};
use crate::{
    error::Error, marker::PackType, options::MomentFormat, reader::PackReader, writer::PackWriter,
};

/// Ticks (100 ns units) between 0001-01-01T00:00:00 and the Unix epoch.
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;
/// Mask selecting the tick payload of a binary-form moment.
const TICKS_MASK: i64 = 0x3FFF_FFFF_FFFF_FFFF;
/// Kind tag for UTC in the top two bits of a binary-form moment.
const KIND_UTC: i64 = 1 << 62;
const TICKS_PER_MICROSECOND: i64 = 10;

impl Pack for bool {
    fn pack<W: io::Write>(&self, writer: &mut PackWriter<W>) -> Result<(), Error> {
        writer.write_bool(*self)
    }
}

impl Unpack for bool {
    const KIND: FieldKind = FieldKind::Boolean;

    fn unpack<R: io::Read>(reader: &mut PackReader<R>) -> Result<Self, Error> {
        reader.read_bool()
    }
}

macro_rules! impl_signed {
    ($($ty:ty),*) => {$(
        impl Pack for $ty {
            fn pack<W: io::Write>(&self, writer: &mut PackWriter<W>) -> Result<(), Error> {
                writer.write_int(i64::from(*self))
            }
        }

        impl Unpack for $ty {
            const KIND: FieldKind = FieldKind::Integer;

            fn unpack<R: io::Read>(reader: &mut PackReader<R>) -> Result<Self, Error> {
                let value = reader.read_int()?;
                <$ty>::try_from(value).map_err(|_| {
                    Error::TypeMismatch(format!(
                        "integer {} is out of range for {}",
                        value,
                        stringify!($ty)
                    ))
                })
            }
        }
    )*};
}

macro_rules! impl_unsigned {
    ($($ty:ty),*) => {$(
        impl Pack for $ty {
            fn pack<W: io::Write>(&self, writer: &mut PackWriter<W>) -> Result<(), Error> {
                writer.write_uint(u64::from(*self))
            }
        }

        impl Unpack for $ty {
            const KIND: FieldKind = FieldKind::Integer;

            fn unpack<R: io::Read>(reader: &mut PackReader<R>) -> Result<Self, Error> {
                let value = reader.read_uint()?;
                <$ty>::try_from(value).map_err(|_| {
                    Error::TypeMismatch(format!(
                        "integer {} is out of range for {}",
                        value,
                        stringify!($ty)
                    ))
                })
            }
        }
    )*};
}

impl_signed!(i8, i16, i32, i64);
impl_unsigned!(u8, u16, u32, u64);

impl Pack for f32 {
    fn pack<W: io::Write>(&self, writer: &mut PackWriter<W>) -> Result<(), Error> {
        writer.write_f32(*self)
    }
}

impl Unpack for f32 {
    const KIND: FieldKind = FieldKind::Float;

    fn unpack<R: io::Read>(reader: &mut PackReader<R>) -> Result<Self, Error> {
        reader.read_f32()
    }
}

impl Pack for f64 {
    fn pack<W: io::Write>(&self, writer: &mut PackWriter<W>) -> Result<(), Error> {
        writer.write_f64(*self)
    }
}

impl Unpack for f64 {
    const KIND: FieldKind = FieldKind::Float;

    fn unpack<R: io::Read>(reader: &mut PackReader<R>) -> Result<Self, Error> {
        reader.read_f64()
    }
}

impl Pack for String {
    fn pack<W: io::Write>(&self, writer: &mut PackWriter<W>) -> Result<(), Error> {
        writer.write_str(self)
    }
}

impl Pack for &str {
    fn pack<W: io::Write>(&self, writer: &mut PackWriter<W>) -> Result<(), Error> {
        writer.write_str(self)
    }
}

impl Unpack for String {
    const KIND: FieldKind = FieldKind::String;

    fn unpack<R: io::Read>(reader: &mut PackReader<R>) -> Result<Self, Error> {
        reader.read_str()
    }
}

impl Pack for Bytes {
    fn pack<W: io::Write>(&self, writer: &mut PackWriter<W>) -> Result<(), Error> {
        writer.write_bin(self)
    }
}

impl Unpack for Bytes {
    const KIND: FieldKind = FieldKind::Binary;

    fn unpack<R: io::Read>(reader: &mut PackReader<R>) -> Result<Self, Error> {
        Ok(Bytes::from(reader.read_bin()?))
    }
}

/// A UUID is a 16-byte binary blob in RFC 4122 network byte order.
impl Pack for Uuid {
    fn pack<W: io::Write>(&self, writer: &mut PackWriter<W>) -> Result<(), Error> {
        writer.write_bin(self.as_bytes())
    }
}

impl Unpack for Uuid {
    const KIND: FieldKind = FieldKind::Uuid;

    fn unpack<R: io::Read>(reader: &mut PackReader<R>) -> Result<Self, Error> {
        let buf = reader.read_bin()?;
        Uuid::from_slice(&buf).map_err(|_| {
            Error::MalformedToken(format!("UUID blob of {} bytes, expected 16", buf.len()))
        })
    }
}

/// A decimal travels as the invariant string form of its literal; a
/// float64 payload is accepted on decode.
impl Pack for Decimal {
    fn pack<W: io::Write>(&self, writer: &mut PackWriter<W>) -> Result<(), Error> {
        writer.write_str(&self.to_string())
    }
}

impl Unpack for Decimal {
    const KIND: FieldKind = FieldKind::Decimal;

    fn unpack<R: io::Read>(reader: &mut PackReader<R>) -> Result<Self, Error> {
        match reader.next_type()? {
            PackType::String | PackType::Key => {
                let literal = reader.read_str()?;
                Decimal::from_str(&literal).map_err(|_| {
                    Error::MalformedToken(format!("'{}' is not a decimal literal", literal))
                })
            }
            PackType::Float => {
                let value = reader.read_f64()?;
                Decimal::try_from(value).map_err(|_| {
                    Error::MalformedToken(format!("float {} is not representable as decimal", value))
                })
            }
            other => Err(Error::TypeMismatch(format!(
                "expected decimal, found {}",
                other
            ))),
        }
    }
}

/// A moment-in-time encodes as `int64` under the writer's
/// [`MomentFormat`]: Unix milliseconds by default, or the source's
/// tick-based binary form. RFC 3339 strings are accepted on decode.
impl Pack for DateTime<Utc> {
    fn pack<W: io::Write>(&self, writer: &mut PackWriter<W>) -> Result<(), Error> {
        let value = match writer.options().moment_format {
            MomentFormat::UnixMillis => self.timestamp_millis(),
            MomentFormat::DotnetTicks => {
                let ticks = self
                    .timestamp_micros()
                    .checked_mul(TICKS_PER_MICROSECOND)
                    .and_then(|t| t.checked_add(UNIX_EPOCH_TICKS))
                    .ok_or_else(|| {
                        Error::UnsupportedTarget("moment exceeds the tick range".into())
                    })?;
                ticks | KIND_UTC
            }
        };
        writer.write_int(value)
    }
}

impl Unpack for DateTime<Utc> {
    const KIND: FieldKind = FieldKind::Moment;

    fn unpack<R: io::Read>(reader: &mut PackReader<R>) -> Result<Self, Error> {
        match reader.next_type()? {
            PackType::Integer => {
                let value = reader.read_int()?;
                match reader.options().moment_format {
                    MomentFormat::UnixMillis => DateTime::from_timestamp_millis(value)
                        .ok_or_else(|| {
                            Error::MalformedToken(format!("moment {} is out of range", value))
                        }),
                    MomentFormat::DotnetTicks => {
                        let ticks = value & TICKS_MASK;
                        let micros = (ticks - UNIX_EPOCH_TICKS) / TICKS_PER_MICROSECOND;
                        DateTime::from_timestamp_micros(micros).ok_or_else(|| {
                            Error::MalformedToken(format!("moment {} is out of range", value))
                        })
                    }
                }
            }
            PackType::String | PackType::Key => {
                let literal = reader.read_str()?;
                DateTime::parse_from_rfc3339(&literal)
                    .map(|parsed| parsed.with_timezone(&Utc))
                    .map_err(|_| {
                        Error::MalformedToken(format!("'{}' is not an RFC 3339 moment", literal))
                    })
            }
            other => Err(Error::TypeMismatch(format!(
                "expected moment, found {}",
                other
            ))),
        }
    }
}

/// An offset-moment always encodes as `int64` Unix milliseconds; the
/// offset itself is not preserved on the wire, so integer decode yields
/// UTC. RFC 3339 strings keep their offset.
impl Pack for DateTime<FixedOffset> {
    fn pack<W: io::Write>(&self, writer: &mut PackWriter<W>) -> Result<(), Error> {
        writer.write_int(self.timestamp_millis())
    }
}

impl Unpack for DateTime<FixedOffset> {
    const KIND: FieldKind = FieldKind::OffsetMoment;

    fn unpack<R: io::Read>(reader: &mut PackReader<R>) -> Result<Self, Error> {
        match reader.next_type()? {
            PackType::Integer => {
                let value = reader.read_int()?;
                DateTime::from_timestamp_millis(value)
                    .map(|moment| moment.fixed_offset())
                    .ok_or_else(|| {
                        Error::MalformedToken(format!("moment {} is out of range", value))
                    })
            }
            PackType::String | PackType::Key => {
                let literal = reader.read_str()?;
                DateTime::parse_from_rfc3339(&literal).map_err(|_| {
                    Error::MalformedToken(format!("'{}' is not an RFC 3339 moment", literal))
                })
            }
            other => Err(Error::TypeMismatch(format!(
                "expected offset moment, found {}",
                other
            ))),
        }
    }
}

/// A duration encodes as `int64` ticks (100 ns units).
impl Pack for TimeDelta {
    fn pack<W: io::Write>(&self, writer: &mut PackWriter<W>) -> Result<(), Error> {
        let ticks = match self.num_nanoseconds() {
            Some(nanos) => nanos / 100,
            None => self
                .num_microseconds()
                .and_then(|micros| micros.checked_mul(TICKS_PER_MICROSECOND))
                .ok_or_else(|| {
                    Error::UnsupportedTarget("duration exceeds the tick range".into())
                })?,
        };
        writer.write_int(ticks)
    }
}

impl Unpack for TimeDelta {
    const KIND: FieldKind = FieldKind::Duration;

    fn unpack<R: io::Read>(reader: &mut PackReader<R>) -> Result<Self, Error> {
        let ticks = reader.read_int()?;
        let delta = match ticks.checked_mul(100) {
            Some(nanos) => TimeDelta::nanoseconds(nanos),
            None => {
                TimeDelta::microseconds(ticks / TICKS_PER_MICROSECOND)
                    + TimeDelta::nanoseconds((ticks % TICKS_PER_MICROSECOND) * 100)
            }
        };
        Ok(delta)
    }
}

/// Implements `Pack`/`Unpack` for a fieldless enum as its `int64`
/// ordinal. Unknown ordinals fail decoding with `TypeMismatch`.
///
/// # Example
/// ```
/// #[derive(Debug, Copy, Clone, PartialEq)]
/// enum Color { Red, Green, Blue }
///
/// keypack::pack_enum!(Color { Red = 0, Green = 1, Blue = 2 });
///
/// let bytes = keypack::types::to_bytes(&Color::Green).unwrap();
/// assert_eq!(bytes, vec![1]);
/// ```
#[macro_export]
macro_rules! pack_enum {
    ($ty:ident { $($variant:ident = $ordinal:expr),+ $(,)? }) => {
        impl $crate::types::Pack for $ty {
            fn pack<W: std::io::Write>(
                &self,
                writer: &mut $crate::writer::PackWriter<W>,
            ) -> Result<(), $crate::error::Error> {
                let ordinal: i64 = match self {
                    $( $ty::$variant => $ordinal, )+
                };
                writer.write_int(ordinal)
            }
        }

        impl $crate::types::Unpack for $ty {
            const KIND: $crate::types::FieldKind = $crate::types::FieldKind::Enum;

            fn unpack<R: std::io::Read>(
                reader: &mut $crate::reader::PackReader<R>,
            ) -> Result<Self, $crate::error::Error> {
                let ordinal = reader.read_int()?;
                $( if ordinal == $ordinal { return Ok($ty::$variant); } )+
                Err($crate::error::Error::TypeMismatch(format!(
                    "{} is not a valid {} ordinal",
                    ordinal,
                    stringify!($ty)
                )))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SerializerOptions;
    use crate::types::{from_bytes, to_bytes, to_bytes_with_options};
    use crate::PackReader;

    #[test]
    fn integer_width_conversions() {
        let bytes = to_bytes(&300i32).unwrap();
        let wide: i64 = from_bytes(&bytes).unwrap();
        assert_eq!(wide, 300);
        assert!(matches!(
            from_bytes::<i8>(&bytes),
            Err(Error::TypeMismatch(_))
        ));

        let bytes = to_bytes(&200u8).unwrap();
        let value: u16 = from_bytes(&bytes).unwrap();
        assert_eq!(value, 200);
    }

    #[test]
    fn float_widening() {
        let bytes = to_bytes(&1.5f32).unwrap();
        let wide: f64 = from_bytes(&bytes).unwrap();
        assert_eq!(wide, 1.5);
    }

    #[test]
    fn uuid_roundtrip_and_length_check() {
        let id = Uuid::from_bytes([0x11; 16]);
        let bytes = to_bytes(&id).unwrap();
        // bin8 with 16 payload bytes, network byte order
        assert_eq!(bytes[..2], [0xC3, 16]);
        assert_eq!(from_bytes::<Uuid>(&bytes).unwrap(), id);

        let short = to_bytes(&Bytes::from_static(&[1, 2, 3])).unwrap();
        assert!(matches!(
            from_bytes::<Uuid>(&short),
            Err(Error::MalformedToken(_))
        ));
    }

    #[test]
    fn decimal_travels_as_invariant_literal() {
        let value = Decimal::from_str("-12345.6789").unwrap();
        let bytes = to_bytes(&value).unwrap();
        let back: Decimal = from_bytes(&bytes).unwrap();
        assert_eq!(back, value);
        // string payload, not a float token
        assert_eq!(bytes[0] & 0xE0, 0xA0);
    }

    #[test]
    fn decimal_accepts_float_payload() {
        let bytes = to_bytes(&2.5f64).unwrap();
        let back: Decimal = from_bytes(&bytes).unwrap();
        assert_eq!(back, Decimal::from_str("2.5").unwrap());
    }

    #[test]
    fn moment_unix_millis_roundtrip() {
        let moment = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let bytes = to_bytes(&moment).unwrap();
        let back: DateTime<Utc> = from_bytes(&bytes).unwrap();
        assert_eq!(back, moment);
    }

    #[test]
    fn moment_dotnet_ticks_roundtrip() {
        let options = SerializerOptions {
            moment_format: MomentFormat::DotnetTicks,
            ..SerializerOptions::default()
        };
        let moment = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let bytes = to_bytes_with_options(&moment, options).unwrap();

        let mut slice = bytes.as_slice();
        let mut reader =
            PackReader::with_options(&mut slice, crate::options::ReaderLimits::default(), options);
        let back = <DateTime<Utc> as Unpack>::unpack(&mut reader).unwrap();
        assert_eq!(back, moment);
    }

    #[test]
    fn moment_accepts_rfc3339_string() {
        let bytes = to_bytes(&"2023-11-14T22:13:20.123Z").unwrap();
        let back: DateTime<Utc> = from_bytes(&bytes).unwrap();
        assert_eq!(back.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn offset_moment_integer_decode_is_utc() {
        let moment = DateTime::parse_from_rfc3339("2023-11-14T22:13:20+05:00").unwrap();
        let bytes = to_bytes(&moment).unwrap();
        let back: DateTime<FixedOffset> = from_bytes(&bytes).unwrap();
        assert_eq!(back.timestamp_millis(), moment.timestamp_millis());
        assert_eq!(back.offset().local_minus_utc(), 0);
    }

    #[test]
    fn duration_tick_roundtrip() {
        let delta = TimeDelta::microseconds(1_234_567) + TimeDelta::nanoseconds(800);
        let bytes = to_bytes(&delta).unwrap();
        let back: TimeDelta = from_bytes(&bytes).unwrap();
        assert_eq!(back, delta);

        let negative = TimeDelta::microseconds(-42);
        let back: TimeDelta = from_bytes(&to_bytes(&negative).unwrap()).unwrap();
        assert_eq!(back, negative);
    }
}
