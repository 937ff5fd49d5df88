//! Byte-unit conversion for memory metrics.

use thiserror::Error;

/// Memory units, each 1024 times the previous one.
pub const MEMORY_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Unit reported by CloudWatch for byte-valued metrics.
pub const BYTES_UNIT: &str = "Bytes";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum UnitError {
    #[error("forced memory unit must be one of B, KB, MB, GB, TB; got '{0}'")]
    InvalidSuffix(String),
}

/// Convert a byte count to `force_suffix`, or to the largest unit that keeps
/// the value at or above 1 (capped at TB).
pub fn convert_mem(value: f64, force_suffix: Option<&str>) -> Result<(f64, &'static str), UnitError> {
    if let Some(suffix) = force_suffix {
        let idx = MEMORY_UNITS
            .iter()
            .position(|u| *u == suffix)
            .ok_or_else(|| UnitError::InvalidSuffix(suffix.to_string()))?;
        return Ok((value / 1024f64.powi(idx as i32), MEMORY_UNITS[idx]));
    }

    let mut scaled = value;
    let mut idx = 0;
    while scaled >= 1024.0 && idx < MEMORY_UNITS.len() - 1 {
        scaled /= 1024.0;
        idx += 1;
    }
    Ok((scaled, MEMORY_UNITS[idx]))
}

/// Human readable byte count, e.g. "1.500 KB".
pub fn mem_to_str(value: f64, precision: usize) -> String {
    // Auto-selection never fails.
    let (scaled, suffix) = convert_mem(value, None).unwrap_or((value, MEMORY_UNITS[0]));
    format!("{:.*} {}", precision, scaled, suffix)
}

/// Whether a series holds byte-valued memory readings.
///
/// Memory metrics are recognised by their `mem` label prefix, and only count
/// when they were queried in Bytes. Without a unit filter the values may be
/// anything, e.g. `mem_used_percent`.
pub fn is_byte_series(label: &str, metric_unit: Option<&str>) -> bool {
    label.starts_with("mem") && metric_unit == Some(BYTES_UNIT)
}
