//! Exact decimal magnitudes scanned out of free-text lab values.
//!
//! Lab values arrive as strings such as `"4.50"`, `"1,250"` or `"3.2 x10^3"`.
//! Comparisons must be exact (`4.50 == 4.5`, no binary rounding), so numbers
//! are kept as a normalized digit string plus a decimal exponent instead of
//! being converted to `f64`.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;

/// First numeric token: optional sign, digits, optional fraction, optional exponent.
static NUMBER_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[-+]?\d*\.?\d+(?:[eE][-+]?\d+)?").expect("static number pattern")
});

/// `x10^`, `X10^` and `×10^` (with optional spacing) rewritten to exponent form.
static TIMES_TEN_POWER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[xX×]\s*10\^").expect("static power pattern"));

/// An exact decimal number.
///
/// Normalized as `0.d1d2d3… × 10^exponent` with `d1 != 0` and no trailing
/// zeros, so two equal values always have equal representations. Zero has
/// no digits and is never negative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Magnitude {
    negative: bool,
    digits: Vec<u8>,
    exponent: i64,
}

impl Magnitude {
    /// Parse a complete numeric token (`-12.5`, `.5`, `3.2E3`).
    ///
    /// Returns `None` for anything that is not exactly one number, including
    /// exponents too large to represent.
    pub fn parse(token: &str) -> Option<Self> {
        let (negative, rest) = match token.as_bytes().first()? {
            b'-' => (true, &token[1..]),
            b'+' => (false, &token[1..]),
            _ => (false, token),
        };

        let (mantissa, exp) = match rest.find(['e', 'E']) {
            Some(idx) => (&rest[..idx], rest[idx + 1..].parse::<i64>().ok()?),
            None => (rest, 0),
        };

        let (int_part, frac_part) = match mantissa.split_once('.') {
            Some((int, frac)) => (int, frac),
            None => (mantissa, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }

        let mut digits: Vec<u8> = int_part
            .bytes()
            .chain(frac_part.bytes())
            .map(|b| b - b'0')
            .collect();
        let mut point = i64::try_from(int_part.len()).ok()?;

        let leading = digits.iter().take_while(|&&d| d == 0).count();
        digits.drain(..leading);
        point -= i64::try_from(leading).ok()?;
        while digits.last() == Some(&0) {
            digits.pop();
        }

        if digits.is_empty() {
            return Some(Self::zero());
        }

        Some(Self {
            negative,
            digits,
            exponent: point.checked_add(exp)?,
        })
    }

    /// Scan free text for the first number, normalizing thousands separators
    /// and `x10^N` notation first.
    pub fn scan(text: &str) -> Option<Self> {
        let without_commas = text.replace(',', "");
        let normalized = TIMES_TEN_POWER.replace_all(&without_commas, "E");
        let token = NUMBER_TOKEN.find(&normalized)?;
        Self::parse(token.as_str())
    }

    pub fn zero() -> Self {
        Self {
            negative: false,
            digits: Vec::new(),
            exponent: 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.digits.is_empty()
    }

    fn cmp_abs(&self, other: &Self) -> Ordering {
        match (self.is_zero(), other.is_zero()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self
                .exponent
                .cmp(&other.exponent)
                .then_with(|| self.digits.cmp(&other.digits)),
        }
    }
}

impl Ord for Magnitude {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.negative, other.negative) {
            (false, true) => Ordering::Greater,
            (true, false) => Ordering::Less,
            (false, false) => self.cmp_abs(other),
            (true, true) => other.cmp_abs(self),
        }
    }
}

impl PartialOrd for Magnitude {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
