//! Record binding: descriptors, the `Record` trait, and the resilient
//! map/struct decode loops.
//!
//! A record's wire form is a map of `wire_name -> value` (or a struct
//! template carrying the same names). Decoding is tolerant of schema
//! drift: unknown keys are skipped, missing keys leave the freshly
//! constructed record's defaults in place, and a value whose wire type
//! is incompatible with the field's declared family is skipped without
//! aborting the record.

use std::io;

use super::{compatible, FieldKind, Unpack};
use crate::{error::Error, marker::PackType, reader::PackReader, writer::PackWriter};

/// One field of a [`TypeDescriptor`].
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    wire_name: &'static str,
    order: i32,
    ignored: bool,
    kind: FieldKind,
    index: usize,
}

impl FieldDescriptor {
    /// The name this field carries on the wire.
    pub fn wire_name(&self) -> &'static str {
        self.wire_name
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    /// Ignored fields appear in neither direction.
    pub fn is_ignored(&self) -> bool {
        self.ignored
    }

    /// The compatibility family consulted before a field read.
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// The declaration index used by
    /// [`Record::write_field`]/[`Record::read_field`] dispatch; stable
    /// under the `(order, wire_name)` emit sort.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// The declared shape of a record type: its fields, their wire names,
/// emit order, and compatibility families.
///
/// Descriptors are built once per type and cached behind a
/// `std::sync::OnceLock` (see the [`record!`](crate::record) macro), so
/// lookups are lock-free after the first build and safe for concurrent
/// readers.
#[derive(Debug)]
pub struct TypeDescriptor {
    name: &'static str,
    fields: Vec<FieldDescriptor>,
}

impl TypeDescriptor {
    pub fn builder(name: &'static str) -> TypeDescriptorBuilder {
        TypeDescriptorBuilder {
            name,
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Fields in emit order (`order` ascending, then wire name),
    /// ignored fields included.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Looks a field up by its wire name.
    pub fn field(&self, wire_name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.wire_name == wire_name)
    }

    /// The number of fields a record of this type emits.
    pub fn emit_count(&self) -> usize {
        self.fields.iter().filter(|field| !field.ignored).count()
    }
}

/// Builder for [`TypeDescriptor`]; field declaration order fixes the
/// indices that [`Record::write_field`]/[`Record::read_field`] dispatch
/// on.
pub struct TypeDescriptorBuilder {
    name: &'static str,
    fields: Vec<FieldDescriptor>,
}

impl TypeDescriptorBuilder {
    /// Declares a field with emit order 0.
    pub fn field<T: Unpack>(self, wire_name: &'static str) -> Self {
        self.field_at::<T>(wire_name, 0)
    }

    /// Declares a field with an explicit emit order.
    pub fn field_at<T: Unpack>(mut self, wire_name: &'static str, order: i32) -> Self {
        let index = self.fields.len();
        self.fields.push(FieldDescriptor {
            wire_name,
            order,
            ignored: false,
            kind: T::KIND,
            index,
        });
        self
    }

    /// Declares an ignored field: it occupies a dispatch index but is
    /// neither written nor read.
    pub fn ignored(mut self, wire_name: &'static str) -> Self {
        let index = self.fields.len();
        self.fields.push(FieldDescriptor {
            wire_name,
            order: 0,
            ignored: true,
            kind: FieldKind::Any,
            index,
        });
        self
    }

    /// Finalizes the descriptor, sorting fields into emit order.
    ///
    /// # Panics
    /// If two fields share a wire name; descriptors are built from
    /// static declarations, so a duplicate is a programming error.
    pub fn build(mut self) -> TypeDescriptor {
        self.fields
            .sort_by(|a, b| (a.order, a.wire_name).cmp(&(b.order, b.wire_name)));
        for pair in self.fields.windows(2) {
            assert!(
                pair[0].wire_name != pair[1].wire_name,
                "duplicate wire name '{}' in descriptor for {}",
                pair[0].wire_name,
                self.name
            );
        }
        TypeDescriptor {
            name: self.name,
            fields: self.fields,
        }
    }
}

/// The compile-time seam the binder works through: a cached descriptor
/// plus indexed accessors generated (or hand-written) per record type.
///
/// Implementations are usually produced by the
/// [`record!`](crate::record) macro; writing one by hand is the way to
/// reach the less common descriptor features (ignored fields, mixed
/// orders).
pub trait Record: Default {
    /// The cached descriptor for this type.
    fn descriptor() -> &'static TypeDescriptor;

    /// Writes the field at the given declaration index.
    fn write_field<W>(&self, index: usize, writer: &mut PackWriter<W>) -> Result<(), Error>
    where
        W: io::Write;

    /// Reads the field at the given declaration index.
    fn read_field<R>(&mut self, index: usize, reader: &mut PackReader<R>) -> Result<(), Error>
    where
        R: io::Read;
}

/// Writes a record as a counted map: one `write_key` + value per
/// non-ignored field, in descriptor emit order.
pub fn write_record<T, W>(value: &T, writer: &mut PackWriter<W>) -> Result<(), Error>
where
    T: Record,
    W: io::Write,
{
    let descriptor = T::descriptor();
    writer.write_map_header(descriptor.emit_count())?;
    for field in descriptor.fields() {
        if field.ignored {
            continue;
        }
        writer.write_key(field.wire_name)?;
        value.write_field(field.index, writer)?;
    }
    Ok(())
}

/// Reads a record from a counted map, an unbounded map, or a struct
/// encoding, applying the drift-tolerance rules.
pub fn read_record<T, R>(reader: &mut PackReader<R>) -> Result<T, Error>
where
    T: Record,
    R: io::Read,
{
    reader.enter()?;
    let mut out = T::default();
    loop {
        match reader.next_type()? {
            PackType::Map => {
                match reader.read_map_header()? {
                    Some(count) => {
                        for _ in 0..count {
                            let key = reader.read_key()?;
                            bind_field(&mut out, reader, &key)?;
                        }
                    }
                    None => {
                        while reader.next_type()? != PackType::End {
                            let key = reader.read_key()?;
                            bind_field(&mut out, reader, &key)?;
                        }
                        reader.read_end()?;
                    }
                }
                break;
            }
            PackType::Struct => {
                let header = reader.read_struct_header()?;
                if header.values_follow {
                    for name in header.fields.iter() {
                        bind_field(&mut out, reader, name)?;
                    }
                    break;
                }
                // template definition only; the record itself follows
            }
            other => {
                return Err(Error::TypeMismatch(format!(
                    "expected map or struct for record {}, found {}",
                    T::descriptor().name(),
                    other
                )))
            }
        }
    }
    reader.leave();
    Ok(out)
}

/// Binds one named value: unknown and ignored names are skipped, as is
/// any value whose peeked wire type fails the compatibility check.
fn bind_field<T, R>(out: &mut T, reader: &mut PackReader<R>, name: &str) -> Result<(), Error>
where
    T: Record,
    R: io::Read,
{
    let field = match T::descriptor().field(name) {
        Some(field) if !field.ignored => field,
        _ => return reader.skip(),
    };
    let wire = reader.next_type()?;
    if wire == PackType::EndOfStream {
        return Err(Error::Truncated);
    }
    if compatible(wire, field.kind) {
        out.read_field(field.index, reader)
    } else {
        reader.skip()
    }
}

/// Declares a record struct together with its [`Record`], `Pack`, and
/// `Unpack` implementations.
///
/// Each field may carry a wire-name override (`as "Name"`) and an emit
/// order (`@ n`); without them the wire name is the field name and the
/// order is 0, so fields emit alphabetically. The struct must derive
/// (or implement) `Default`. Ignored fields and other descriptor
/// features are reached by implementing [`Record`] by hand.
///
/// # Example
/// ```
/// keypack::record! {
///     #[derive(Debug, Default, PartialEq)]
///     pub struct User {
///         name: String as "Name",
///         age: i32 as "Age",
///     }
/// }
///
/// let user = User { name: "Ada".into(), age: 36 };
/// let bytes = keypack::types::to_bytes(&user).unwrap();
/// let back: User = keypack::types::from_bytes(&bytes).unwrap();
/// assert_eq!(back, user);
/// ```
#[macro_export]
macro_rules! record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $fname:ident : $fty:ty $( as $wire:literal $( @ $order:expr )? )?
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( $(#[$fmeta])* $fvis $fname : $fty, )*
        }

        impl $crate::types::Record for $name {
            fn descriptor() -> &'static $crate::types::TypeDescriptor {
                static DESCRIPTOR: std::sync::OnceLock<$crate::types::TypeDescriptor> =
                    std::sync::OnceLock::new();
                DESCRIPTOR.get_or_init(|| {
                    $crate::types::TypeDescriptor::builder(stringify!($name))
                        $(
                            .field_at::<$fty>(
                                $crate::__record_wire_name!($( $wire )? $fname),
                                $crate::__record_order!($( $( $order )? )?),
                            )
                        )*
                        .build()
                })
            }

            fn write_field<W: std::io::Write>(
                &self,
                index: usize,
                writer: &mut $crate::writer::PackWriter<W>,
            ) -> Result<(), $crate::error::Error> {
                let mut cursor = 0usize;
                $(
                    if index == cursor {
                        return $crate::types::Pack::pack(&self.$fname, writer);
                    }
                    cursor += 1;
                )*
                let _ = cursor;
                unreachable!("field index {} out of range", index)
            }

            fn read_field<R: std::io::Read>(
                &mut self,
                index: usize,
                reader: &mut $crate::reader::PackReader<R>,
            ) -> Result<(), $crate::error::Error> {
                let mut cursor = 0usize;
                $(
                    if index == cursor {
                        self.$fname = $crate::types::Unpack::unpack(reader)?;
                        return Ok(());
                    }
                    cursor += 1;
                )*
                let _ = cursor;
                unreachable!("field index {} out of range", index)
            }
        }

        impl $crate::types::Pack for $name {
            fn pack<W: std::io::Write>(
                &self,
                writer: &mut $crate::writer::PackWriter<W>,
            ) -> Result<(), $crate::error::Error> {
                $crate::types::write_record(self, writer)
            }
        }

        impl $crate::types::Unpack for $name {
            const KIND: $crate::types::FieldKind = $crate::types::FieldKind::Record;

            fn unpack<R: std::io::Read>(
                reader: &mut $crate::reader::PackReader<R>,
            ) -> Result<Self, $crate::error::Error> {
                $crate::types::read_record(reader)
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __record_wire_name {
    ($wire:literal $fname:ident) => {
        $wire
    };
    ($fname:ident) => {
        stringify!($fname)
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __record_order {
    ($order:expr) => {
        $order
    };
    () => {
        0
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{from_bytes, to_bytes, Pack, Value};

    crate::record! {
        #[derive(Debug, Default, PartialEq)]
        struct Point {
            x: i32,
            y: i32,
        }
    }

    crate::record! {
        #[derive(Debug, Default, PartialEq)]
        struct Labeled {
            label: String as "Label" @ 1,
            id: i64 as "Id" @ 0,
        }
    }

    #[test]
    fn descriptor_sorts_by_order_then_name() {
        let descriptor = <Labeled as Record>::descriptor();
        let names: Vec<&str> = descriptor
            .fields()
            .iter()
            .map(|field| field.wire_name())
            .collect();
        assert_eq!(names, vec!["Id", "Label"]);
        // declaration indices survive the sort
        assert_eq!(descriptor.field("Label").unwrap().index(), 0);
        assert_eq!(descriptor.field("Id").unwrap().index(), 1);
    }

    #[test]
    #[should_panic(expected = "duplicate wire name")]
    fn duplicate_wire_names_panic() {
        TypeDescriptor::builder("Broken")
            .field::<i32>("a")
            .field::<i64>("a")
            .build();
    }

    #[test]
    fn simple_roundtrip() {
        let point = Point { x: -3, y: 900 };
        let back: Point = from_bytes(&to_bytes(&point).unwrap()).unwrap();
        assert_eq!(back, point);
    }

    #[test]
    fn emit_order_follows_descriptor() {
        let value = Labeled {
            label: "L".into(),
            id: 7,
        };
        let back: Value = from_bytes(&to_bytes(&value).unwrap()).unwrap();
        let entries = back.as_map().unwrap();
        assert_eq!(entries[0].0, "Id");
        assert_eq!(entries[1].0, "Label");
    }

    #[test]
    fn unknown_keys_are_skipped_and_missing_keys_default() {
        let value = Value::Map(vec![
            ("y".into(), Value::Int(5)),
            ("extra".into(), Value::Array(vec![Value::Int(1)])),
        ]);
        let point: Point = from_bytes(&to_bytes(&value).unwrap()).unwrap();
        assert_eq!(point, Point { x: 0, y: 5 });
    }

    #[test]
    fn incompatible_value_is_skipped_without_aborting() {
        let value = Value::Map(vec![
            ("x".into(), Value::Str("not a number".into())),
            ("y".into(), Value::Int(9)),
        ]);
        let point: Point = from_bytes(&to_bytes(&value).unwrap()).unwrap();
        assert_eq!(point, Point { x: 0, y: 9 });
    }

    #[test]
    fn record_decodes_from_unbounded_map() {
        let mut buf = Vec::new();
        let mut writer = crate::PackWriter::new(&mut buf);
        writer.begin_map().unwrap();
        writer.write_key("x").unwrap();
        writer.write_int(1).unwrap();
        writer.write_key("y").unwrap();
        writer.write_int(2).unwrap();
        writer.write_end().unwrap();
        drop(writer);

        let point: Point = from_bytes(&buf).unwrap();
        assert_eq!(point, Point { x: 1, y: 2 });
    }

    #[test]
    fn record_decodes_from_struct_template() {
        let mut buf = Vec::new();
        let mut writer = crate::PackWriter::new(&mut buf);
        let id = writer.define_struct(&["x", "y"]).unwrap();
        writer.use_struct(id).unwrap();
        writer.write_int(4).unwrap();
        writer.write_int(5).unwrap();
        drop(writer);

        let point: Point = from_bytes(&buf).unwrap();
        assert_eq!(point, Point { x: 4, y: 5 });
    }

    // hand-written impl exercising an ignored field
    #[derive(Debug, Default, PartialEq)]
    struct Cached {
        key: String,
        cached_total: i64,
    }

    impl Record for Cached {
        fn descriptor() -> &'static TypeDescriptor {
            static DESCRIPTOR: std::sync::OnceLock<TypeDescriptor> = std::sync::OnceLock::new();
            DESCRIPTOR.get_or_init(|| {
                TypeDescriptor::builder("Cached")
                    .field::<String>("key")
                    .ignored("cached_total")
                    .build()
            })
        }

        fn write_field<W: io::Write>(
            &self,
            index: usize,
            writer: &mut PackWriter<W>,
        ) -> Result<(), Error> {
            match index {
                0 => self.key.pack(writer),
                _ => unreachable!("field index {} out of range", index),
            }
        }

        fn read_field<R: io::Read>(
            &mut self,
            index: usize,
            reader: &mut PackReader<R>,
        ) -> Result<(), Error> {
            match index {
                0 => {
                    self.key = Unpack::unpack(reader)?;
                    Ok(())
                }
                _ => unreachable!("field index {} out of range", index),
            }
        }
    }

    impl crate::types::Pack for Cached {
        fn pack<W: io::Write>(&self, writer: &mut PackWriter<W>) -> Result<(), Error> {
            write_record(self, writer)
        }
    }

    impl Unpack for Cached {
        const KIND: FieldKind = FieldKind::Record;

        fn unpack<R: io::Read>(reader: &mut PackReader<R>) -> Result<Self, Error> {
            read_record(reader)
        }
    }

    #[test]
    fn ignored_fields_appear_in_neither_direction() {
        let value = Cached {
            key: "k1".into(),
            cached_total: 99,
        };
        let bytes = to_bytes(&value).unwrap();

        let dynamic: Value = from_bytes(&bytes).unwrap();
        assert_eq!(dynamic.as_map().unwrap().len(), 1);

        // a stream that does carry the ignored name leaves it untouched
        let hostile = Value::Map(vec![
            ("key".into(), Value::Str("k2".into())),
            ("cached_total".into(), Value::Int(5)),
        ]);
        let back: Cached = from_bytes(&to_bytes(&hostile).unwrap()).unwrap();
        assert_eq!(back.key, "k2");
        assert_eq!(back.cached_total, 0);
    }
}
