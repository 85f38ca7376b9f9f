// graph_ingest/src/transform/dates.rs
// Date detection and ISO-8601 normalization for source fields.
//
// A field is treated as a date when its column name contains one of
// `DATE_KEYWORDS` or its value has one of the `DATE_PATTERNS` shapes.
// Recognised fields are re-emitted as `YYYY-MM-DD` or `YYYY-MM-DDTHH:MM:SS`.
// A recognised field that cannot be parsed becomes `None`, never the raw text.

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use regex::Regex;

pub const DATE_KEYWORDS: [&str; 6] = ["date", "dt", "time", "created", "modified", "timestamp",];

const DATE_PATTERNS: [&str; 7] = [
    r"^\d{1,2}/\d{1,2}/\d{2,4}$",
    r"^\d{4}/\d{1,2}/\d{1,2}$",
    r"^\d{1,2}-\d{1,2}-\d{4}$",
    r"^\d{4}-\d{1,2}-\d{1,2}$",
    r"^\d{4}-\d{1,2}-\d{1,2}[T\s]\d{1,2}:\d{2}(:\d{2})?(\.\d+)?([+-]\d{2}:?\d{2}|Z)?$",
    r"^\d{1,2}/\d{1,2}/\d{2,4}\s+\d{1,2}:\d{2}(:\d{2})?(\s*[AaPp][Mm])?$",
    r"^\d{1,2}-\d{1,2}-\d{4}\s+\d{1,2}:\d{2}(:\d{2})?$",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq,)]
enum Kind {
    Date,
    DateTime,
}

const DATE_FORMATS: [(&str, Kind,); 15] = [
    ("%m/%d/%Y", Kind::Date,),
    ("%m/%d/%y", Kind::Date,),
    ("%d/%m/%Y", Kind::Date,),
    ("%d/%m/%y", Kind::Date,),
    ("%Y-%m-%d", Kind::Date,),
    ("%m-%d-%Y", Kind::Date,),
    ("%d-%m-%Y", Kind::Date,),
    ("%Y/%m/%d", Kind::Date,),
    ("%m/%d/%Y %I:%M %p", Kind::DateTime,),
    ("%m/%d/%Y %H:%M", Kind::DateTime,),
    ("%m/%d/%Y %H:%M:%S", Kind::DateTime,),
    ("%Y-%m-%d %H:%M:%S", Kind::DateTime,),
    ("%Y-%m-%dT%H:%M:%S", Kind::DateTime,),
    ("%Y-%m-%dT%H:%M:%SZ", Kind::DateTime,),
    ("%d-%m-%Y %H:%M:%S", Kind::DateTime,),
];

static COMPILED_PATTERNS: LazyLock<Vec<Regex,>,> = LazyLock::new(|| {
    DATE_PATTERNS
        .iter()
        .filter_map(|pattern| Regex::new(pattern,).ok(),)
        .collect()
},);

pub fn is_date_column(column: &str,) -> bool {
    let lowered = column.to_lowercase();
    DATE_KEYWORDS.iter().any(|keyword| lowered.contains(keyword,),)
}

pub fn looks_like_date(value: &str,) -> bool {
    COMPILED_PATTERNS.iter().any(|pattern| pattern.is_match(value,),)
}

/// `00..=68` are 2000s and `69..=99` are 1900s, the POSIX `strptime` pivot.
fn two_digit_century(year: i32,) -> i32 {
    let yy = year.rem_euclid(100,);
    if yy <= 68 { 2000 + yy } else { 1900 + yy }
}

/// Parse `value` against the known formats, in order, and format it as ISO-8601.
pub fn parse_and_format_date(value: &str,) -> Option<String,> {
    let value = value.trim();
    let has_time = value.contains('T',) || value.contains(':',);

    for (format, kind,) in DATE_FORMATS {
        let parsed = match kind {
            Kind::Date => NaiveDate::parse_from_str(value, format,)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0,),),
            Kind::DateTime => NaiveDateTime::parse_from_str(value, format,).ok(),
        };
        let Some(parsed,) = parsed else {
            continue;
        };
        // `%Y` must be a four-digit year, otherwise "01/15/24" would read as year 24.
        if format.contains("%Y",) && !(1000..=9999).contains(&parsed.year(),) {
            continue;
        }
        let parsed = if format.contains("%y",) {
            match parsed.with_year(two_digit_century(parsed.year(),),) {
                Some(parsed,) => parsed,
                None => continue,
            }
        } else {
            parsed
        };
        if kind == Kind::DateTime || has_time {
            return Some(parsed.format("%Y-%m-%dT%H:%M:%S",).to_string(),);
        }
        return Some(parsed.format("%Y-%m-%d",).to_string(),);
    }
    None
}

/// Normalize one field. Empty values pass through untouched.
pub fn format_field(column: &str, value: &str,) -> Option<String,> {
    if value.is_empty() {
        return Some(String::new(),);
    }
    let trimmed = value.trim();
    if is_date_column(column,) || looks_like_date(trimmed,) {
        return parse_and_format_date(trimmed,);
    }
    Some(value.to_string(),)
}

/// Normalize every date-like field of one record, keeping column order.
pub fn identify_and_format_dates<'a, I,>(record: I,) -> Vec<(String, Option<String,>,),>
where
    I: IntoIterator<Item = (&'a str, &'a str,),>,
{
    record
        .into_iter()
        .map(|(column, value,)| (column.to_string(), format_field(column, value,),),)
        .collect()
}
