//! Crate-wide defaults.

/// Default ring-buffer capacity (slots) when a port policy does not override it.
pub const DEFAULT_BUFFER_SIZE: usize = 200;

/// Minimum ring-buffer capacity, enforced after rounding up to a power of two.
pub const MIN_BUFFER_SIZE: usize = 2;

/// `threadpriority: -1` / `threadcore: -1` mean "inherit" / "unpinned".
pub const PRIORITY_NONE: i16 = -1;
pub const PRIORITY_MIN: i16 = 0;
pub const PRIORITY_MAX: i16 = 100;
pub const CORE_NOT_PINNED: i32 = -1;

/// High-water warning threshold: fraction of buffer_size at which backlog is logged.
pub const HIGH_WATER_FRACTION: f64 = 0.85;

/// Log the high-water warning at most once per this many retrieved messages.
pub const MAX_N_MESSAGES: u64 = 1000;

/// `time_out_us` sentinel meaning "wait forever".
pub const TIME_OUT_INFINITE: i64 = -1;
