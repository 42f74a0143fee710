use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Parse the timestamp keys the CCKP API emits into a naive UTC datetime.
///
/// Accepts `YYYY`, `YYYY-MM`, `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`,
/// `YYYY-MM-DDTHH:MM:SS` and full RFC 3339 strings.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    // every accepted shape is plain ASCII, so byte slicing below is safe
    if s.len() < 4 || !s.is_ascii() {
        return None;
    }

    match s.len() {
        // YYYY
        4 => {
            let year: i32 = s.parse().ok()?;
            NaiveDate::from_ymd_opt(year, 1, 1)?.and_hms_opt(0, 0, 0)
        }
        // YYYY-MM
        7 if s.as_bytes()[4] == b'-' => {
            let year: i32 = s[0..4].parse().ok()?;
            let month: u32 = s[5..7].parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
        }
        // YYYY-MM-DD
        10 => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()?
            .and_hms_opt(0, 0, 0),
        _ => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.naive_utc());
            }
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
                .ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn parses_every_supported_shape() {
        let cases = [
            ("1950", 1950, 1, 1),
            ("1950-07", 1950, 7, 1),
            ("1987-03-15", 1987, 3, 15),
            ("2001-12-31 18:00:00", 2001, 12, 31),
            ("2001-12-31T06:00:00", 2001, 12, 31),
            ("2020-06-01T00:00:00Z", 2020, 6, 1),
            ("2020-06-01T03:00:00+05:00", 2020, 5, 31),
        ];
        for (raw, y, m, d) in cases {
            let ts = parse_timestamp(raw).unwrap_or_else(|| panic!("failed on {raw}"));
            assert_eq!((ts.year(), ts.month(), ts.day()), (y, m, d), "{raw}");
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("abc").is_none());
        assert!(parse_timestamp("1950-13").is_none());
        assert!(parse_timestamp("1950/07/01").is_none());
        assert!(parse_timestamp("not-a-date-at-all").is_none());
        // multibyte characters where a separator is expected
        assert!(parse_timestamp("1950éx").is_none());
        assert!(parse_timestamp("195é-07").is_none());
        assert!(parse_timestamp("1950-07-0é").is_none());
    }
}
