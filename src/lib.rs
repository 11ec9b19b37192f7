//! Compact, self-describing binary serialization.
//!
//! The wire format is a MessagePack-like type-tagged byte stream
//! augmented with in-stream commands: repeated map keys can be interned
//! (`SET_KEY` / `USE_KEY`), homogeneous records can share a struct
//! template (`DEFINE_STRUCT` / `USE_STRUCT`), and collections of
//! unknown length frame with `BEGIN_ARRAY` / `BEGIN_MAP` / `END`.
//!
//! Three layers:
//! - [`writer::PackWriter`] / [`reader::PackReader`] — the low-level
//!   token codec, symbol tables, limits, and structural skip.
//! - [`types`] — the binding layer: [`types::Pack`] / [`types::Unpack`]
//!   for the value universe, record binding with schema-drift
//!   tolerance, and the dynamic [`types::Value`].
//! - [`types::table`] — row-of-map bridges for tabular data.
//!
//! ```
//! keypack::record! {
//!     #[derive(Debug, Default, PartialEq)]
//!     pub struct Event {
//!         name: String,
//!         attempts: i32,
//!     }
//! }
//!
//! let event = Event { name: "sync".into(), attempts: 3 };
//! let bytes = keypack::to_bytes(&event).unwrap();
//! let back: Event = keypack::from_bytes(&bytes).unwrap();
//! assert_eq!(back, event);
//! ```

pub mod error;
pub mod marker;
pub mod options;
pub mod reader;
pub mod types;
pub mod util;
pub mod writer;

pub use error::Error;
pub use marker::PackType;
pub use options::{MomentFormat, ReaderLimits, SerializerOptions};
pub use reader::{PackReader, StructHeader};
pub use types::{
    from_bytes, from_bytes_with_limits, from_stream, from_stream_with_options, to_bytes,
    to_bytes_with_options, transfer_to, transfer_to_with_options, FieldKind, Pack, Record,
    TypeDescriptor, Unpack, Value,
};
pub use writer::PackWriter;

/// Wire-compatibility label. The stream itself carries no header or
/// version; consumers relying on a specific revision rely on external
/// labelling.
pub const FORMAT_VERSION: &str = "1.2.0";
