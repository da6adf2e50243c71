use chrono::{DateTime, Utc};
use serde::Serialize;

/// Offset between the Unix epoch and Bear's reference date (2001-01-01T00:00:00Z).
pub const REFERENCE_EPOCH_OFFSET: i64 = 978_307_200;

/// A non-trashed note as read from the Bear database.
#[derive(Debug, Clone, Serialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub body: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub tags: Vec<String>,
}

impl Note {
    /// Body cut down to `max_chars` characters for display.
    pub fn preview(&self, max_chars: usize) -> String {
        truncate(&self.body, max_chars)
    }
}

/// Row streamed to the index builder. Carries no tags.
#[derive(Debug, Clone)]
pub struct IndexableNote {
    pub id: String,
    pub title: String,
    pub body: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

/// Converts a Core Data timestamp (seconds since 2001-01-01 UTC) to a UTC date-time.
///
/// Fractional seconds are kept to nanosecond precision. Values outside chrono's
/// representable range clamp to the reference date.
pub fn from_reference_seconds(seconds: f64) -> DateTime<Utc> {
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round() as u32;
    let (whole, nanos) = if nanos >= 1_000_000_000 {
        (whole + 1.0, 0)
    } else {
        (whole, nanos)
    };

    if !whole.is_finite() || whole.abs() > (i64::MAX / 2) as f64 {
        return reference_date();
    }

    DateTime::from_timestamp(REFERENCE_EPOCH_OFFSET + whole as i64, nanos)
        .unwrap_or_else(reference_date)
}

pub fn reference_date() -> DateTime<Utc> {
    DateTime::from_timestamp(REFERENCE_EPOCH_OFFSET, 0).unwrap_or_default()
}

pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_reference_zero_is_2001() {
        let dt = from_reference_seconds(0.0);
        assert_eq!(dt.to_rfc3339(), "2001-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_one_year_later() {
        let dt = from_reference_seconds(31_536_000.0);
        assert_eq!(dt, Utc.with_ymd_and_hms(2002, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_fractional_and_negative_seconds() {
        let dt = from_reference_seconds(1.5);
        assert_eq!(dt.timestamp(), REFERENCE_EPOCH_OFFSET + 1);
        assert_eq!(dt.timestamp_subsec_millis(), 500);

        let before = from_reference_seconds(-86_400.0);
        assert_eq!(before, Utc.with_ymd_and_hms(2000, 12, 31, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_non_finite_clamps_to_reference() {
        assert_eq!(from_reference_seconds(f64::NAN), reference_date());
        assert_eq!(from_reference_seconds(f64::INFINITY), reference_date());
    }

    #[test]
    fn test_truncate_is_char_aware() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("한국어 테스트", 3), "한국어...");
    }
}
