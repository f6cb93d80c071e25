use super::magnitude::Magnitude;

/// Separators accepted between the two ends of an interval.
const RANGE_SEPARATORS: [char; 3] = ['-', '–', '—'];

/// Shape of a free-text reference range after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceRange {
    /// `low-high`, both ends inclusive.
    Interval { low: Magnitude, high: Magnitude },
    /// `<max` or `<=max`.
    UpperBound { max: Magnitude, inclusive: bool },
    /// `>min` or `>=min`.
    LowerBound { min: Magnitude, inclusive: bool },
    /// Empty, qualitative or otherwise not understood.
    Unparseable,
}

impl ReferenceRange {
    /// Parse a reference string such as `"4.0 - 6.0"`, `"<140"` or `"≥ 60"`.
    ///
    /// Whitespace is ignored. A hyphenated reference whose ends do not both
    /// parse falls through to the bound checks instead of failing, so
    /// `"<-5"` still reads as an upper bound of -5.
    pub fn parse(raw: &str) -> Self {
        let reference: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        if reference.is_empty() {
            return Self::Unparseable;
        }

        if let Some((left, right)) = reference.split_once(RANGE_SEPARATORS) {
            if let (Some(low), Some(high)) = (Magnitude::scan(left), Magnitude::scan(right)) {
                return Self::Interval { low, high };
            }
        }

        let bound = || Magnitude::scan(&reference);

        if reference.starts_with("<=") || reference.starts_with('≤') {
            return bound().map_or(Self::Unparseable, |max| Self::UpperBound {
                max,
                inclusive: true,
            });
        }
        if reference.starts_with('<') {
            return bound().map_or(Self::Unparseable, |max| Self::UpperBound {
                max,
                inclusive: false,
            });
        }
        if reference.starts_with(">=") || reference.starts_with('≥') {
            return bound().map_or(Self::Unparseable, |min| Self::LowerBound {
                min,
                inclusive: true,
            });
        }
        if reference.starts_with('>') {
            return bound().map_or(Self::Unparseable, |min| Self::LowerBound {
                min,
                inclusive: false,
            });
        }

        Self::Unparseable
    }
}
