use std::fmt;

use serde::{Serialize, Serializer};

use super::magnitude::Magnitude;
use super::reference::ReferenceRange;

/// Value markers that read as an abnormal (positive) qualitative result.
const POSITIVE_MARKERS: &[&str] = &["positive", "reactive", "detected", "present"];

/// Value markers that read as a normal (negative) qualitative result.
/// Checked after the positive markers.
const NEGATIVE_MARKERS: &[&str] = &["negative", "nonreactive", "notdetected"];

/// Clinical status of a lab value against its reference range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabStatus {
    Low,
    Normal,
    High,
    /// No opinion: value or reference could not be interpreted.
    Unknown,
}

impl LabStatus {
    /// Label written into the report. `Unknown` is the empty string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Normal => "Normal",
            Self::High => "High",
            Self::Unknown => "",
        }
    }
}

impl fmt::Display for LabStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for LabStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Classify a raw lab value against a raw reference range.
///
/// Pure and total: never panics, unclassifiable input yields
/// [`LabStatus::Unknown`]. Values without any number fall back to
/// qualitative keyword matching regardless of the reference.
pub fn classify(raw_value: &str, raw_reference: &str) -> LabStatus {
    match Magnitude::scan(raw_value) {
        Some(value) => classify_against(&value, &ReferenceRange::parse(raw_reference)),
        None => classify_qualitative(raw_value),
    }
}

/// Compare an exact value with a parsed reference range.
pub fn classify_against(value: &Magnitude, range: &ReferenceRange) -> LabStatus {
    match range {
        ReferenceRange::Interval { low, high } => {
            if value < low {
                LabStatus::Low
            } else if value > high {
                LabStatus::High
            } else {
                LabStatus::Normal
            }
        }
        ReferenceRange::UpperBound { max, inclusive } => {
            let exceeds = if *inclusive { value > max } else { value >= max };
            if exceeds {
                LabStatus::High
            } else {
                LabStatus::Normal
            }
        }
        ReferenceRange::LowerBound { min, inclusive } => {
            let below = if *inclusive { value < min } else { value <= min };
            if below {
                LabStatus::Low
            } else {
                LabStatus::Normal
            }
        }
        ReferenceRange::Unparseable => LabStatus::Unknown,
    }
}

/// Case-insensitive keyword matching for non-numeric results.
///
/// Positive markers win: `"Not Detected"` contains `detected` and is `High`.
fn classify_qualitative(raw_value: &str) -> LabStatus {
    let lowered = raw_value.to_lowercase();

    if POSITIVE_MARKERS.iter().any(|m| lowered.contains(m)) {
        LabStatus::High
    } else if NEGATIVE_MARKERS.iter().any(|m| lowered.contains(m)) {
        LabStatus::Normal
    } else {
        LabStatus::Unknown
    }
}
