//! Encoder options and decoder resource limits.

/// Wire encoding of a moment-in-time value.
///
/// The source format packs a 2-bit kind tag into the high bits of a
/// signed 64 holding ticks since 0001-01-01 ("binary form"). That layout
/// is not portable across hosts, so the default here is plain Unix
/// milliseconds in UTC. Streams written with one policy must be read
/// with the same policy; the format itself does not tag which was used.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum MomentFormat {
    /// `int64` milliseconds since the Unix epoch, UTC. Portable.
    #[default]
    UnixMillis,
    /// The source's native binary form: low 62 bits are 100 ns ticks
    /// since 0001-01-01T00:00:00, top 2 bits carry the UTC kind tag.
    DotnetTicks,
}

/// Options honored by the encoder and, for [`MomentFormat`], by the
/// decoder's moment interpretation.
#[derive(Debug, Copy, Clone)]
pub struct SerializerOptions {
    /// When `true` (the default), map keys are emitted through the key
    /// table (`SET_KEY` on first use, `USE_KEY` after). When `false`,
    /// keys are inline strings and the table stays empty.
    pub use_key_interning: bool,
    /// Encoding policy for moment-in-time values.
    pub moment_format: MomentFormat,
}

impl Default for SerializerOptions {
    fn default() -> SerializerOptions {
        SerializerOptions {
            use_key_interning: true,
            moment_format: MomentFormat::default(),
        }
    }
}

/// Decoder resource limits, enforced before any allocation.
///
/// Each limit caps what a hostile stream can make the decoder allocate
/// or retain. Exceeding any of them raises
/// [`Error::LimitExceeded`](crate::error::Error::LimitExceeded).
#[derive(Debug, Copy, Clone)]
pub struct ReaderLimits {
    /// Longest string payload, in bytes. Default 10 MiB.
    pub max_string_length: usize,
    /// Longest binary payload, in bytes. Default 100 MiB.
    pub max_binary_length: usize,
    /// Most entries the key table may hold. Default 10 000.
    pub max_key_table_size: usize,
    /// Most templates the struct table may hold. Default 1 000.
    pub max_struct_table_size: usize,
    /// Deepest nesting the binding layer will follow. Default 100.
    /// Tracked by the binder, not by low-level reads.
    pub max_depth: usize,
}

impl Default for ReaderLimits {
    fn default() -> ReaderLimits {
        ReaderLimits {
            max_string_length: 10 * 1024 * 1024,
            max_binary_length: 100 * 1024 * 1024,
            max_key_table_size: 10_000,
            max_struct_table_size: 1_000,
            max_depth: 100,
        }
    }
}
