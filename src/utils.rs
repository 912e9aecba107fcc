/// Utility functions for timestamps and byte formatting
use std::sync::OnceLock;

use time::{format_description, OffsetDateTime, UtcOffset};

static LOCAL_OFFSET: OnceLock<UtcOffset> = OnceLock::new();

/// The machine's UTC offset, resolved on first use and cached
///
/// On Linux the offset can only be read while the process has a single
/// thread, so call this before starting the async runtime. A first call
/// from a multi-threaded process settles on UTC.
pub fn local_offset() -> UtcOffset {
    *LOCAL_OFFSET.get_or_init(|| UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC))
}

/// Local wall-clock time used to stamp received values
pub fn observation_time() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(local_offset())
}

/// Format a timestamp as HH:MM:SS.fff for the RR export and log lines
///
/// Falls back to the default string representation if formatting fails.
pub fn format_clock_time(dt: &OffsetDateTime) -> String {
    let format = match format_description::parse("[hour]:[minute]:[second].[subsecond digits:3]") {
        Ok(format) => format,
        Err(_) => return dt.time().to_string(),
    };
    dt.format(&format).unwrap_or_else(|_| dt.to_string())
}

/// Lowercase hex rendering of a byte buffer, no separators
pub fn hex_string(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}
