//! Kind detection with a streaming accumulator.
//!
//! A [`KindDetector`] only counts what it has seen; the decision is made
//! once, in [`KindDetector::detect`]. Because the state is a set of counts
//! and format intersections, the result does not depend on sample order.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{Datum, Kind};

/// Characters that can appear in any recognised date or datetime layout.
/// Strings outside this alphabet skip the (slower) chrono parsing.
static TEMPORAL_CANDIDATE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9A-Za-z][0-9A-Za-z ,:/.+\-]{5,40}$").unwrap()
});

/// Recognised date layouts, in order of preference.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d %b %Y",
    "%d-%b-%Y",
    "%m-%d-%Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%a, %b %d, %Y",
    "%A, %B %d, %Y",
];

/// A recognised datetime layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatetimeFormat {
    Rfc3339,
    Rfc2822,
    /// A chrono pattern without zone information, read as UTC.
    Naive(&'static str),
}

impl DatetimeFormat {
    pub fn parse(self, s: &str) -> Option<NaiveDateTime> {
        match self {
            DatetimeFormat::Rfc3339 => DateTime::parse_from_rfc3339(s).ok().map(|t| t.naive_utc()),
            DatetimeFormat::Rfc2822 => DateTime::parse_from_rfc2822(s).ok().map(|t| t.naive_utc()),
            DatetimeFormat::Naive(fmt) => NaiveDateTime::parse_from_str(s, fmt).ok(),
        }
    }
}

/// Recognised datetime layouts, in order of preference.
const DATETIME_FORMATS: &[DatetimeFormat] = &[
    DatetimeFormat::Rfc3339,
    DatetimeFormat::Naive("%Y-%m-%dT%H:%M:%S"),
    DatetimeFormat::Naive("%Y-%m-%dT%H:%M:%S%.f"),
    DatetimeFormat::Naive("%Y-%m-%d %H:%M:%S"),
    DatetimeFormat::Naive("%Y-%m-%d %H:%M:%S%.f"),
    DatetimeFormat::Naive("%Y-%m-%d %H:%M"),
    DatetimeFormat::Rfc2822,
    DatetimeFormat::Naive("%a %b %e %H:%M:%S %Y"),
];

/// Converts an inserted value into its column kind's representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// Int values in a Float column.
    WidenToFloat,
    /// Text parsed with a date layout.
    ParseDate(&'static str),
    /// Text parsed with a datetime layout.
    ParseDatetime(DatetimeFormat),
    /// Text holding integers.
    ParseInt,
    /// Text holding numbers.
    ParseFloat,
    /// Text holding booleans.
    ParseBool,
    /// Non-text scalars in a Text column, rendered as text.
    Stringify,
}

impl Coercion {
    /// Apply the coercion. Nulls pass through. Empty strings become null
    /// for every parsing coercion.
    pub fn apply(&self, value: Datum) -> Result<Datum, String> {
        if value.is_null() {
            return Ok(value);
        }

        match (self, value) {
            (Coercion::WidenToFloat, Datum::Int(i)) => Ok(Datum::Float(i as f64)),
            (Coercion::WidenToFloat, v @ Datum::Float(_)) => Ok(v),

            (Coercion::ParseDate(_), Datum::Text(s)) if s.is_empty() => Ok(Datum::Null),
            (Coercion::ParseDate(fmt), Datum::Text(s)) => NaiveDate::parse_from_str(&s, fmt)
                .map(Datum::Date)
                .map_err(|e| format!("cannot parse {:?} as date with layout {:?}: {}", s, fmt, e)),
            (Coercion::ParseDate(_), v @ Datum::Date(_)) => Ok(v),

            (Coercion::ParseDatetime(_), Datum::Text(s)) if s.is_empty() => Ok(Datum::Null),
            (Coercion::ParseDatetime(fmt), Datum::Text(s)) => fmt
                .parse(&s)
                .map(Datum::Datetime)
                .ok_or_else(|| format!("cannot parse {:?} as datetime with layout {:?}", s, fmt)),
            (Coercion::ParseDatetime(_), v @ Datum::Datetime(_)) => Ok(v),

            (Coercion::ParseInt | Coercion::ParseFloat | Coercion::ParseBool, Datum::Text(s)) if s.is_empty() => {
                Ok(Datum::Null)
            }

            (Coercion::ParseInt, Datum::Text(s)) => parse_int(&s)
                .map(Datum::Int)
                .ok_or_else(|| format!("cannot parse {:?} as int", s)),
            (Coercion::ParseInt, v @ Datum::Int(_)) => Ok(v),

            (Coercion::ParseFloat, Datum::Text(s)) => parse_float(&s)
                .map(Datum::Float)
                .ok_or_else(|| format!("cannot parse {:?} as float", s)),
            (Coercion::ParseFloat, Datum::Int(i)) => Ok(Datum::Float(i as f64)),
            (Coercion::ParseFloat, v @ Datum::Float(_)) => Ok(v),

            (Coercion::ParseBool, Datum::Text(s)) => parse_bool(&s)
                .map(Datum::Bool)
                .ok_or_else(|| format!("cannot parse {:?} as bool", s)),
            (Coercion::ParseBool, v @ Datum::Bool(_)) => Ok(v),

            (Coercion::Stringify, v @ Datum::Text(_)) => Ok(v),
            (Coercion::Stringify, v) => Ok(Datum::Text(v.to_string())),

            (c, v) => Err(format!("cannot convert {} value {} ({:?})", v.type_name(), v, c)),
        }
    }
}

/// Per-field accumulator of sampled values.
#[derive(Debug, Clone, Default)]
pub struct KindDetector {
    nulls: usize,
    bools: usize,
    ints: usize,
    floats: usize,
    strings: usize,
    // Non-empty strings, and how many of them read as each scalar kind
    nonempty: usize,
    str_ints: usize,
    str_floats: usize,
    str_bools: usize,
    // Indices into DATE_FORMATS / DATETIME_FORMATS that parsed every
    // non-empty string so far. None until the first non-empty string.
    date_formats: Option<Vec<usize>>,
    datetime_formats: Option<Vec<usize>>,
}

impl KindDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of samples seen, nulls included.
    pub fn sample_count(&self) -> usize {
        self.nulls + self.bools + self.ints + self.floats + self.strings
    }

    /// Record one observation.
    pub fn sample(&mut self, value: &Datum) {
        match value {
            Datum::Null => self.nulls += 1,
            Datum::Bool(_) => self.bools += 1,
            Datum::Int(_) => self.ints += 1,
            Datum::Float(_) => self.floats += 1,
            Datum::Text(s) => self.sample_str(s),
            Datum::Date(d) => self.sample_str(&d.format("%Y-%m-%d").to_string()),
            Datum::Datetime(dt) => self.sample_str(&dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        }
    }

    fn sample_str(&mut self, s: &str) {
        self.strings += 1;
        if s.is_empty() {
            // Carries no format information
            return;
        }

        self.nonempty += 1;

        let is_int = parse_int(s).is_some();
        let is_float = parse_float(s).is_some();
        let is_bool = parse_bool(s).is_some();
        self.str_ints += usize::from(is_int);
        self.str_floats += usize::from(is_float);
        self.str_bools += usize::from(is_bool);

        // Scalars in disguise are never dates
        let candidate = !(is_int || is_float || is_bool)
            && TEMPORAL_CANDIDATE_REGEX.is_match(s)
            && s.bytes().any(|b| b.is_ascii_digit());

        let dates: Vec<usize> = if candidate {
            DATE_FORMATS
                .iter()
                .enumerate()
                .filter(|(_, f)| NaiveDate::parse_from_str(s, f).is_ok())
                .map(|(i, _)| i)
                .collect()
        } else {
            Vec::new()
        };
        intersect(&mut self.date_formats, dates);

        let datetimes: Vec<usize> = if candidate {
            DATETIME_FORMATS
                .iter()
                .enumerate()
                .filter(|(_, f)| f.parse(s).is_some())
                .map(|(i, _)| i)
                .collect()
        } else {
            Vec::new()
        };
        intersect(&mut self.datetime_formats, datetimes);
    }

    /// Decide the kind. Int and Float widen to Float; any other mix of
    /// kinds falls back to Text. All-null (or no samples) yields Null and
    /// the caller decides what to store.
    pub fn detect(&self) -> (Kind, Option<Coercion>) {
        let seen = (self.bools > 0, self.ints > 0, self.floats > 0, self.strings > 0);

        match seen {
            (false, false, false, false) => (Kind::Null, None),
            (true, false, false, false) => (Kind::Bool, None),
            (false, true, false, false) => (Kind::Int, None),
            (false, false, true, false) => (Kind::Float, None),
            (false, true, true, false) => (Kind::Float, Some(Coercion::WidenToFloat)),
            (false, false, false, true) => self.detect_string(),
            _ => (Kind::Text, Some(Coercion::Stringify)),
        }
    }

    fn detect_string(&self) -> (Kind, Option<Coercion>) {
        let n = self.nonempty;
        if n > 0 {
            if self.str_ints == n {
                return (Kind::Int, Some(Coercion::ParseInt));
            }
            if self.str_floats == n {
                return (Kind::Float, Some(Coercion::ParseFloat));
            }
            if self.str_bools == n {
                return (Kind::Bool, Some(Coercion::ParseBool));
            }
        }
        if let Some(&i) = self.date_formats.as_ref().and_then(|f| f.first()) {
            return (Kind::Date, Some(Coercion::ParseDate(DATE_FORMATS[i])));
        }
        if let Some(&i) = self.datetime_formats.as_ref().and_then(|f| f.first()) {
            return (Kind::Datetime, Some(Coercion::ParseDatetime(DATETIME_FORMATS[i])));
        }
        (Kind::Text, None)
    }
}

/// Integer text: optional sign and digits. A leading zero ("0042") marks
/// an identifier rather than a number.
fn parse_int(s: &str) -> Option<i64> {
    if s.contains(['.', 'e', 'E']) || has_leading_zero(s) {
        return None;
    }
    s.parse().ok()
}

/// Decimal or scientific notation. Words such as "inf" or "NaN" are text.
fn parse_float(s: &str) -> Option<f64> {
    let numeric = s.bytes().all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'));
    if !numeric || !s.bytes().any(|b| b.is_ascii_digit()) || has_leading_zero(s) {
        return None;
    }
    s.parse().ok()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn has_leading_zero(s: &str) -> bool {
    let digits = s.trim_start_matches(['+', '-']).as_bytes();
    digits.len() > 1 && digits[0] == b'0' && digits[1].is_ascii_digit()
}

fn intersect(acc: &mut Option<Vec<usize>>, found: Vec<usize>) {
    match acc {
        None => *acc = Some(found),
        Some(existing) => existing.retain(|i| found.contains(i)),
    }
}
