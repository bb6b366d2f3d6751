use chrono::format::{self, Fixed, Item, Numeric, Parsed, StrftimeItems};
use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{Result, SnapshotError};

pub const DEFAULT_DATE_FORMAT: &str = "%Y%m%d";

/// Which calendar fields a date format carries; missing ones default to the
/// start of their period when parsing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct DateFields {
    month: bool,
    day: bool,
    ordinal: bool,
    hour: bool,
    hour12: bool,
    ampm: bool,
    minute: bool,
}

/// A file name template of the form `<prefix>{date:<strftime>}<postfix>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileTemplate {
    prefix: String,
    postfix: String,
    date_format: String,
    fields: DateFields,
}

impl FileTemplate {
    pub fn parse(template: &str) -> Result<Self> {
        let opens = template.matches('{').count();
        let closes = template.matches('}').count();
        if opens == 0 || closes == 0 {
            return Err(SnapshotError::config(format!(
                "file_template '{}' does not have a {{date}} placeholder",
                template
            )));
        }
        if opens > 1 || closes > 1 {
            return Err(SnapshotError::config(format!(
                "file_template '{}' can only contain one date placeholder",
                template
            )));
        }

        let (prefix, rest) = template.split_once('{').unwrap_or((template, ""));
        let (placeholder, postfix) = rest.split_once('}').ok_or_else(|| {
            SnapshotError::config(format!("file_template '{}' has an unterminated placeholder", template))
        })?;

        let (name, date_format) = match placeholder.split_once(':') {
            Some((name, fmt)) => (name, fmt),
            None => (placeholder, ""),
        };
        if name != "date" {
            return Err(SnapshotError::config(format!(
                "file_template '{}' does not have a {{date}} placeholder",
                template
            )));
        }
        let date_format = if date_format.is_empty() { DEFAULT_DATE_FORMAT } else { date_format };

        let tpl = Self {
            prefix: prefix.to_string(),
            postfix: postfix.to_string(),
            date_format: date_format.to_string(),
            fields: inspect_format(date_format)?,
        };
        tpl.check_round_trip()?;
        Ok(tpl)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn postfix(&self) -> &str {
        &self.postfix
    }

    pub fn date_format(&self) -> &str {
        &self.date_format
    }

    /// Length of the fixed text around the date; longer means more specific.
    pub fn specificity(&self) -> usize {
        self.prefix.len() + self.postfix.len()
    }

    /// File name without extension for a snapshot taken at `at`.
    pub fn file_stem(&self, at: &NaiveDateTime) -> String {
        format!("{}{}{}", self.prefix, at.format(&self.date_format), self.postfix)
    }

    /// Parse the date out of `file_name`, or None when the name does not
    /// belong to this template. Everything after the first `.` is ignored.
    pub fn match_file(&self, file_name: &str) -> Option<NaiveDateTime> {
        let stem = file_name.split('.').next().unwrap_or(file_name);
        let date_part = stem.strip_prefix(self.prefix.as_str())?.strip_suffix(self.postfix.as_str())?;
        if date_part.is_empty() {
            return None;
        }
        self.parse_date(date_part)
    }

    fn parse_date(&self, text: &str) -> Option<NaiveDateTime> {
        let mut parsed = Parsed::new();
        format::parse(&mut parsed, text, StrftimeItems::new(&self.date_format)).ok()?;

        let f = self.fields;
        if !f.ordinal {
            if !f.month {
                parsed.set_month(1).ok()?;
            }
            if !f.day {
                parsed.set_day(1).ok()?;
            }
        }
        if f.hour12 && !f.ampm {
            parsed.set_ampm(false).ok()?;
        }
        if !f.hour && !f.hour12 {
            parsed.set_hour(0).ok()?;
        }
        if !f.minute {
            parsed.set_minute(0).ok()?;
        }

        parsed.to_naive_datetime_with_offset(0).ok()
    }

    fn check_round_trip(&self) -> Result<()> {
        let reference = NaiveDate::from_ymd_opt(2024, 9, 13)
            .and_then(|d| d.and_hms_opt(14, 35, 27))
            .ok_or_else(|| SnapshotError::config("invalid reference date"))?;
        let name = format!("{}.sql", self.file_stem(&reference));
        let parsed = self.match_file(&name).ok_or_else(|| {
            SnapshotError::config(format!(
                "file name '{}' produced by template cannot be matched back to its date",
                name
            ))
        })?;
        if self.file_stem(&parsed) != self.file_stem(&reference) {
            return Err(SnapshotError::config(format!(
                "date format '{}' does not round-trip",
                self.date_format
            )));
        }
        Ok(())
    }
}

fn inspect_format(date_format: &str) -> Result<DateFields> {
    let mut fields = DateFields::default();
    for item in StrftimeItems::new(date_format) {
        match item {
            Item::Error => {
                return Err(SnapshotError::config(format!("invalid date format '{}'", date_format)));
            }
            Item::Numeric(
                Numeric::WeekFromSun
                | Numeric::WeekFromMon
                | Numeric::IsoWeek
                | Numeric::IsoYear
                | Numeric::IsoYearDiv100
                | Numeric::IsoYearMod100,
                _,
            ) => {
                return Err(SnapshotError::config(format!(
                    "week-based tokens in date format '{}' are not supported",
                    date_format
                )));
            }
            Item::Numeric(Numeric::Month, _) | Item::Fixed(Fixed::ShortMonthName | Fixed::LongMonthName) => {
                fields.month = true
            }
            Item::Numeric(Numeric::Day, _) => fields.day = true,
            Item::Numeric(Numeric::Ordinal, _) => fields.ordinal = true,
            Item::Numeric(Numeric::Hour, _) => fields.hour = true,
            Item::Numeric(Numeric::Hour12, _) => fields.hour12 = true,
            Item::Fixed(Fixed::LowerAmPm | Fixed::UpperAmPm) => fields.ampm = true,
            Item::Numeric(Numeric::Minute, _) => fields.minute = true,
            _ => {}
        }
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, s).unwrap()
    }

    #[test]
    fn test_parse_parts() {
        let tpl = FileTemplate::parse("db-snapshot-daily-{date:%Y%m%d}").unwrap();
        assert_eq!(tpl.prefix(), "db-snapshot-daily-");
        assert_eq!(tpl.postfix(), "");
        assert_eq!(tpl.date_format(), "%Y%m%d");
        assert_eq!(tpl.specificity(), 18);
    }

    #[test]
    fn test_default_format() {
        let tpl = FileTemplate::parse("db-snapshots-{date}").unwrap();
        assert_eq!(tpl.date_format(), DEFAULT_DATE_FORMAT);
        assert_eq!(tpl.match_file("db-snapshots-20240913.sql.gz"), Some(at(2024, 9, 13, 0, 0, 0)));
    }

    #[test]
    fn test_rejects_missing_or_extra_placeholders() {
        assert!(FileTemplate::parse("db-snapshots").unwrap_err().is_configuration());
        assert!(FileTemplate::parse("{date}-{date}").unwrap_err().is_configuration());
        assert!(FileTemplate::parse("snap-{time}").unwrap_err().is_configuration());
    }

    #[test]
    fn test_rejects_week_tokens() {
        for fmt in ["%Y%W", "%Y-%U", "%G%V"] {
            let err = FileTemplate::parse(&format!("snap-{{date:{}}}", fmt)).unwrap_err();
            assert!(err.is_configuration(), "{} should be rejected", fmt);
        }
    }

    #[test]
    fn test_rejects_formats_that_cannot_round_trip() {
        // the dot would be stripped as an extension
        assert!(FileTemplate::parse("snap-{date:%Y.%m.%d}").is_err());
    }

    #[test]
    fn test_round_trip_truncates_to_format_precision() {
        let t = at(2025, 3, 7, 16, 42, 9);
        let cases = [
            ("snap-{date:%Y%m%d}", at(2025, 3, 7, 0, 0, 0)),
            ("snap-{date:%Y%m%d%H}", at(2025, 3, 7, 16, 0, 0)),
            ("snap-{date:%Y%m%d%H%M}", at(2025, 3, 7, 16, 42, 0)),
            ("snap-{date:%Y%m%d-%H%M%S}-prod", t),
            ("{date:%Y-%m}-monthly", at(2025, 3, 1, 0, 0, 0)),
        ];
        for (template, expected) in cases {
            let tpl = FileTemplate::parse(template).unwrap();
            let name = format!("{}.sql.gz", tpl.file_stem(&t));
            assert_eq!(tpl.match_file(&name), Some(expected), "{}", template);
        }
    }

    #[test]
    fn test_hour_format_parses_hour() {
        let tpl = FileTemplate::parse("db-snapshot-hourly-{date:%Y%m%d%H}").unwrap();
        let parsed = tpl.match_file("db-snapshot-hourly-2024091318.sql.gz").unwrap();
        assert_eq!(parsed.hour(), 18);
    }

    #[test]
    fn test_boundary_mismatch_is_no_match() {
        let tpl = FileTemplate::parse("db-snapshot-daily-{date:%Y%m%d}").unwrap();
        assert_eq!(tpl.match_file("db-snapshot-daily-v8-20240913.sql.gz"), None);
        assert_eq!(tpl.match_file("other-20240913.sql.gz"), None);
        assert_eq!(tpl.match_file("db-snapshot-daily-.sql"), None);
        assert_eq!(tpl.match_file("db-snapshot-daily-20241313.sql"), None);
        assert_eq!(tpl.match_file("db-snapshot-daily-20240913extra.sql"), None);
    }

    #[test]
    fn test_postfix_only_and_both_sides() {
        let tpl = FileTemplate::parse("{date:%Y%m%d}-nightly").unwrap();
        assert_eq!(tpl.match_file("20240102-nightly.sql"), Some(at(2024, 1, 2, 0, 0, 0)));
        assert_eq!(tpl.match_file("20240102-weekly.sql"), None);

        let tpl = FileTemplate::parse("app-{date:%Y%m%d}-full").unwrap();
        assert_eq!(tpl.match_file("app-20240102-full.sql.gz"), Some(at(2024, 1, 2, 0, 0, 0)));
    }
}
