//! Simulated-time units.
//!
//! Simulated time is counted in integer core cycles ([`SimTime`]); the
//! duration of one cycle is the *time base*. Model descriptions carry
//! latencies and frequencies as strings with SI units (`"10ns"`,
//! `"2.5GHz"`); [`UnitValue`] parses them and [`TimeBase`] converts them to
//! cycle counts before simulation starts.

use serde::{Deserialize, Serialize};

/// Simulated time in core cycles.
pub type SimTime = u64;

/// The largest representable simulated time.
pub const MAX_SIM_TIME: SimTime = u64::MAX;

/// Errors from unit parsing and conversion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    /// The numeric portion did not parse.
    #[error("invalid number in unit value: '{0}'")]
    InvalidNumber(String),

    /// The unit suffix is not recognised.
    #[error("unknown unit in '{0}'")]
    UnknownUnit(String),

    /// A time was required but the value carries a non-time unit.
    #[error("'{0}' is not a time or frequency")]
    NotATime(String),

    /// The value is zero or negative where a positive duration is required.
    #[error("'{0}' is not a positive duration")]
    NonPositive(String),
}

/// Base unit of a [`UnitValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    /// Seconds.
    Seconds,
    /// Hertz.
    Hertz,
    /// Bytes.
    Bytes,
    /// Dimensionless count.
    Count,
}

/// A floating value with an SI-prefixed unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitValue {
    /// Value in the base unit (seconds, hertz, bytes, or a bare count).
    pub value: f64,
    /// Base unit.
    pub unit: Unit,
}

const SI_PREFIXES: &[(&str, f64)] = &[
    ("a", 1e-18),
    ("f", 1e-15),
    ("p", 1e-12),
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("K", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0f64 * 1024.0 * 1024.0 * 1024.0),
];

impl UnitValue {
    /// Construct a value in seconds.
    #[must_use]
    pub fn seconds(value: f64) -> Self {
        Self {
            value,
            unit: Unit::Seconds,
        }
    }

    /// Construct a value in bytes.
    #[must_use]
    pub fn bytes(value: f64) -> Self {
        Self {
            value,
            unit: Unit::Bytes,
        }
    }

    /// Returns `true` if the base unit matches `unit` (one of `"s"`, `"hz"`,
    /// `"B"`; case-insensitive for hertz).
    #[must_use]
    pub fn has_units(&self, unit: &str) -> bool {
        matches!(
            (self.unit, unit),
            (Unit::Seconds, "s") | (Unit::Hertz, "hz" | "Hz") | (Unit::Bytes, "B")
        )
    }

    /// The value as a duration in seconds; a frequency is inverted.
    ///
    /// # Errors
    ///
    /// [`TimeError::NotATime`] for byte or count values,
    /// [`TimeError::NonPositive`] for zero/negative input.
    pub fn to_seconds(&self) -> Result<f64, TimeError> {
        let secs = match self.unit {
            Unit::Seconds => self.value,
            Unit::Hertz => {
                if self.value <= 0.0 {
                    return Err(TimeError::NonPositive(self.to_string()));
                }
                1.0 / self.value
            }
            Unit::Bytes | Unit::Count => return Err(TimeError::NotATime(self.to_string())),
        };
        if secs <= 0.0 {
            return Err(TimeError::NonPositive(self.to_string()));
        }
        Ok(secs)
    }

    /// Render with the largest SI prefix that keeps the mantissa in
    /// [1, 1000).
    #[must_use]
    pub fn to_string_best_si(&self) -> String {
        let suffix = match self.unit {
            Unit::Seconds => "s",
            Unit::Hertz => "Hz",
            Unit::Bytes => "B",
            Unit::Count => "",
        };
        if self.value == 0.0 {
            return format!("0{suffix}");
        }
        let decades: &[(f64, &str)] = &[
            (1e18, "E"),
            (1e15, "P"),
            (1e12, "T"),
            (1e9, "G"),
            (1e6, "M"),
            (1e3, "k"),
            (1.0, ""),
            (1e-3, "m"),
            (1e-6, "u"),
            (1e-9, "n"),
            (1e-12, "p"),
            (1e-15, "f"),
            (1e-18, "a"),
        ];
        let mag = self.value.abs();
        for &(scale, prefix) in decades {
            if mag >= scale {
                return format!("{}{prefix}{suffix}", trim_float(self.value / scale));
            }
        }
        format!("{}{suffix}", trim_float(self.value))
    }
}

/// Format a float with up to three decimals, trailing zeros trimmed.
fn trim_float(v: f64) -> String {
    let s = format!("{v:.3}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    s.to_string()
}

impl std::fmt::Display for UnitValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_best_si())
    }
}

impl std::str::FromStr for UnitValue {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .char_indices()
            .find(|&(_, c)| c.is_alphabetic())
            .map_or(trimmed.len(), |(i, _)| i);
        let (num_part, unit_part) = trimmed.split_at(split);
        let number: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| TimeError::InvalidNumber(s.to_string()))?;

        let unit_part = unit_part.trim();
        if unit_part.is_empty() {
            return Ok(UnitValue {
                value: number,
                unit: Unit::Count,
            });
        }

        let (prefix_part, unit) = if let Some(p) = strip_base_unit(unit_part, "Hz") {
            (p, Unit::Hertz)
        } else if let Some(p) = unit_part.strip_suffix('s') {
            (p, Unit::Seconds)
        } else if let Some(p) = unit_part.strip_suffix('B') {
            (p, Unit::Bytes)
        } else {
            return Err(TimeError::UnknownUnit(s.to_string()));
        };

        let factor = if prefix_part.is_empty() {
            1.0
        } else {
            SI_PREFIXES
                .iter()
                .find(|(p, _)| *p == prefix_part)
                .map(|&(_, f)| f)
                .ok_or_else(|| TimeError::UnknownUnit(s.to_string()))?
        };

        Ok(UnitValue {
            value: number * factor,
            unit,
        })
    }
}

fn strip_base_unit<'a>(s: &'a str, base: &str) -> Option<&'a str> {
    if s.len() >= base.len() && s[s.len() - base.len()..].eq_ignore_ascii_case(base) {
        Some(&s[..s.len() - base.len()])
    } else {
        None
    }
}

/// The atomic time base of a run: the wall of one core cycle.
///
/// All latency strings are converted through the time base exactly once,
/// before simulation starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBase {
    period_seconds: f64,
    source: String,
}

impl TimeBase {
    /// Create a time base from a period or frequency string (e.g. `"1ps"`).
    ///
    /// # Errors
    ///
    /// Propagates unit-parse failures; rejects non-positive periods.
    pub fn new(period: &str) -> Result<Self, TimeError> {
        let uv: UnitValue = period.parse()?;
        Ok(Self {
            period_seconds: uv.to_seconds()?,
            source: period.to_string(),
        })
    }

    /// Convert a latency string to a whole number of core cycles, rounding
    /// to nearest.
    ///
    /// # Errors
    ///
    /// Propagates unit-parse failures; rejects values that are not times or
    /// frequencies.
    pub fn sim_cycles(&self, latency: &str) -> Result<SimTime, TimeError> {
        let uv: UnitValue = latency.parse()?;
        let secs = uv.to_seconds()?;
        Ok((secs / self.period_seconds).round() as SimTime)
    }

    /// Render a cycle count as a best-SI time string.
    #[must_use]
    pub fn format_cycles(&self, cycles: SimTime) -> String {
        UnitValue::seconds(cycles as f64 * self.period_seconds).to_string_best_si()
    }

    /// The specification string this time base was created from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_strings() {
        let v: UnitValue = "10ns".parse().unwrap();
        assert!(v.has_units("s"));
        assert!((v.value - 10e-9).abs() < 1e-18);

        let v: UnitValue = "2.5GHz".parse().unwrap();
        assert!(v.has_units("hz"));
        assert!((v.value - 2.5e9).abs() < 1.0);

        let v: UnitValue = "512KiB".parse().unwrap();
        assert!(v.has_units("B"));
        assert!((v.value - 512.0 * 1024.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("ns".parse::<UnitValue>().is_err());
        assert!("10xs".parse::<UnitValue>().is_err());
    }

    #[test]
    fn test_sim_cycles() {
        let tb = TimeBase::new("1ps").unwrap();
        assert_eq!(tb.sim_cycles("10ns").unwrap(), 10_000);
        assert_eq!(tb.sim_cycles("1GHz").unwrap(), 1_000);
        assert_eq!(tb.sim_cycles("1ps").unwrap(), 1);
    }

    #[test]
    fn test_zero_latency_rejected() {
        let tb = TimeBase::new("1ps").unwrap();
        assert!(tb.sim_cycles("0s").is_err());
    }

    #[test]
    fn test_best_si_formatting() {
        assert_eq!(UnitValue::seconds(10e-9).to_string_best_si(), "10ns");
        assert_eq!(UnitValue::seconds(1.5e-3).to_string_best_si(), "1.5ms");
        assert_eq!(UnitValue::bytes(2048.0).to_string_best_si(), "2.048kB");
        assert_eq!(UnitValue::seconds(0.0).to_string_best_si(), "0s");
    }

    #[test]
    fn test_format_cycles_roundtrip() {
        let tb = TimeBase::new("1ps").unwrap();
        assert_eq!(tb.format_cycles(10_000), "10ns");
    }
}
