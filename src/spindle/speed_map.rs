//! Speed map: commanded spindle speed → device output value.
//!
//! The map is built from configuration (or a default) as a list of
//! `(speed, percent)` calibration points, then finalized against the
//! concrete device output range once the PWM period is known. Queries are
//! allocation-free and never fail: out-of-range speeds clamp to the first
//! (off) or last entry.

use heapless::Vec;
use serde::Deserialize;

use crate::error::ConfigError;

/// Maximum number of calibration points.
pub const MAX_SPEED_ENTRIES: usize = 16;

/// One configured calibration point.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SpeedEntry {
    /// Commanded speed [rpm].
    pub speed: u32,
    /// Output as a percentage of the device range.
    pub percent: f32,
}

/// A finalized point in device units.
#[derive(Debug, Clone, Copy)]
struct DevEntry {
    speed: u32,
    output: u32,
}

/// Calibration table translating commanded speed into a device output.
///
/// Owned by the spindle controller; rebuilt only at init time, never
/// mutated concurrently with `map_speed` queries.
#[derive(Debug, Default)]
pub struct SpeedMap {
    entries: Vec<SpeedEntry, MAX_SPEED_ENTRIES>,
    table: Vec<DevEntry, MAX_SPEED_ENTRIES>,
    device_max: u32,
}

impl SpeedMap {
    /// Build from configured calibration points. Entries beyond
    /// `MAX_SPEED_ENTRIES` are ignored with the table truncated; validation
    /// happens in [`finalize`](Self::finalize).
    pub fn from_entries(entries: &[SpeedEntry]) -> Self {
        let mut map = Self::default();
        for e in entries.iter().take(MAX_SPEED_ENTRIES) {
            // capacity checked by the take() above
            let _ = map.entries.push(*e);
        }
        map
    }

    /// Default two-point linear map: 0 → 0% and `max_speed` → `max_percent`.
    pub fn linear(max_speed: u32, max_percent: f32) -> Self {
        Self::from_entries(&[
            SpeedEntry {
                speed: 0,
                percent: 0.0,
            },
            SpeedEntry {
                speed: max_speed,
                percent: max_percent,
            },
        ])
    }

    /// Step map for relay-like devices: off output below `min_speed`, full
    /// output at and above it.
    pub fn shelf(min_speed: u32, max_speed: u32) -> Self {
        if min_speed == 0 {
            return Self::from_entries(&[
                SpeedEntry {
                    speed: 0,
                    percent: 100.0,
                },
                SpeedEntry {
                    speed: max_speed,
                    percent: 100.0,
                },
            ]);
        }
        Self::from_entries(&[
            SpeedEntry {
                speed: 0,
                percent: 0.0,
            },
            SpeedEntry {
                speed: min_speed - 1,
                percent: 0.0,
            },
            SpeedEntry {
                speed: min_speed,
                percent: 100.0,
            },
            SpeedEntry {
                speed: max_speed,
                percent: 100.0,
            },
        ])
    }

    /// Whether any calibration points are configured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Scale and validate all entries against the concrete device output
    /// range. Must run once before the first `map_speed` query.
    ///
    /// Validates: at least one entry, strictly ascending speeds, percents
    /// within [0, 100] and non-decreasing (required for the monotonicity
    /// guarantee of `map_speed`).
    pub fn finalize(&mut self, device_max: u32) -> Result<(), ConfigError> {
        if self.entries.is_empty() {
            return Err(ConfigError::Validation("speed map is empty".into()));
        }
        for e in &self.entries {
            if !(0.0..=100.0).contains(&e.percent) {
                return Err(ConfigError::Validation(format!(
                    "speed map percent out of range: {}",
                    e.percent
                )));
            }
        }
        for pair in self.entries.windows(2) {
            if pair[1].speed <= pair[0].speed {
                return Err(ConfigError::Validation(format!(
                    "speed map entries not ascending: {} after {}",
                    pair[1].speed, pair[0].speed
                )));
            }
            if pair[1].percent < pair[0].percent {
                return Err(ConfigError::Validation(format!(
                    "speed map percent decreasing at speed {}",
                    pair[1].speed
                )));
            }
        }

        self.device_max = device_max;
        self.table.clear();
        for e in &self.entries {
            let output = (f64::from(e.percent) / 100.0 * f64::from(device_max)).round() as u32;
            // capacity matches entries
            let _ = self.table.push(DevEntry {
                speed: e.speed,
                output: output.min(device_max),
            });
        }
        Ok(())
    }

    /// Map a commanded speed to a device output value.
    ///
    /// Clamps below the first entry to the off output and above the last to
    /// the last output; between bracketing entries performs piecewise-linear
    /// interpolation. Monotonic non-decreasing for any finalized table.
    /// Never rejects a speed.
    pub fn map_speed(&self, speed: u32) -> u32 {
        let Some(first) = self.table.first() else {
            return 0;
        };
        if speed <= first.speed {
            return first.output;
        }
        let last = self.table[self.table.len() - 1];
        if speed >= last.speed {
            return last.output;
        }
        // find the bracketing pair; tables are small, linear scan
        for pair in self.table.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if speed < b.speed {
                let span = u64::from(b.speed - a.speed);
                let rise = u64::from(b.output - a.output);
                let delta = u64::from(speed - a.speed);
                return a.output + ((delta * rise + span / 2) / span) as u32;
            }
        }
        last.output
    }

    /// Output value of the first ("off") entry.
    pub fn off_output(&self) -> u32 {
        self.table.first().map_or(0, |e| e.output)
    }

    /// Highest calibrated speed.
    pub fn max_speed(&self) -> u32 {
        self.table.last().map_or(0, |e| e.speed)
    }
}
