use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Returned by [`DateNormalizer::parse_date`] when the input could not be
/// understood. Never a real timestamp: callers must check for it before using
/// the value.
pub const UNKNOWN_TIMESTAMP: i64 = 0;

/// Component order used when every date component is twelve or less and the
/// separator and clock style give no hint (`05/06/2024`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AmbiguousOrder {
    #[default]
    DayFirst,
    MonthFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComponentOrder {
    DayMonthYear,
    MonthDayYear,
    YearMonthDay,
}

static AT_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+at\s+").unwrap());
static MERIDIEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s*([ap])\.?\s?m\.?$").unwrap());

/// Canonicalizes locale-dependent date strings into UTC timestamps.
///
/// Inputs without an offset are taken to be UTC. Genuinely ambiguous inputs
/// such as `05/06/2024` resolve through fixed tie-breaks and may be wrong;
/// that is accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateNormalizer {
    ambiguous_order: AmbiguousOrder,
}

impl DateNormalizer {
    pub fn new(ambiguous_order: AmbiguousOrder) -> Self {
        Self { ambiguous_order }
    }

    /// Seconds since the Unix epoch, or [`UNKNOWN_TIMESTAMP`].
    pub fn parse_date(&self, input: &str) -> i64 {
        self.try_parse(input)
            .map(|dt| dt.timestamp())
            .unwrap_or(UNKNOWN_TIMESTAMP)
    }

    /// Canonical ISO-8601 form (`2024-06-28T22:34:21Z`), or `None` when the
    /// input is not a recognizable date.
    pub fn to_iso(&self, input: &str) -> Option<String> {
        self.try_parse(input)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn try_parse(&self, input: &str) -> Option<DateTime<Utc>> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Some(dt) = parse_iso(trimmed) {
            return Some(dt);
        }

        let normalized = normalize_input(trimmed);
        let (date_part, time_part) = match normalized.split_once(' ') {
            Some((date, time)) => (date, Some(time)),
            None => (normalized.as_str(), None),
        };

        let separator = ['/', '-', '.']
            .into_iter()
            .find(|sep| date_part.contains(*sep))?;

        let components: Vec<&str> = date_part.split(separator).collect();
        if components.len() != 3 {
            return None;
        }
        let mut numbers = [0u32; 3];
        for (idx, component) in components.iter().enumerate() {
            if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            numbers[idx] = component.parse().ok()?;
        }

        let is_twelve_hour = time_part.is_some_and(|t| t.ends_with(" AM") || t.ends_with(" PM"));
        let order = self.component_order(numbers, separator, is_twelve_hour)?;
        let year_digits = match order {
            ComponentOrder::YearMonthDay => components[0].len(),
            _ => components[2].len(),
        };
        let date_format = date_template(order, separator, year_digits <= 2);

        match time_part {
            None => {
                let date = NaiveDate::parse_from_str(date_part, &date_format).ok()?;
                Some(date.and_hms_opt(0, 0, 0)?.and_utc())
            }
            Some(time) => {
                let has_seconds = time.matches(':').count() >= 2;
                let value = format!("{} {}", date_part, time);
                let attempt = |seconds: bool| {
                    let format = format!(
                        "{} {}",
                        date_format,
                        time_template(is_twelve_hour, seconds)
                    );
                    NaiveDateTime::parse_from_str(&value, &format).ok()
                };
                attempt(has_seconds)
                    .or_else(|| attempt(false))
                    .map(|naive| naive.and_utc())
            }
        }
    }

    fn component_order(
        &self,
        [first, second, _year]: [u32; 3],
        separator: char,
        is_twelve_hour: bool,
    ) -> Option<ComponentOrder> {
        if first > 31 {
            return Some(ComponentOrder::YearMonthDay);
        }
        if second > 31 {
            return None;
        }

        // The year is last from here on, possibly two digits
        if first > 12 {
            return Some(ComponentOrder::DayMonthYear);
        }
        if second > 12 {
            return Some(ComponentOrder::MonthDayYear);
        }

        if separator == '.' {
            Some(ComponentOrder::DayMonthYear)
        } else if is_twelve_hour {
            Some(ComponentOrder::MonthDayYear)
        } else {
            Some(match self.ambiguous_order {
                AmbiguousOrder::DayFirst => ComponentOrder::DayMonthYear,
                AmbiguousOrder::MonthFirst => ComponentOrder::MonthDayYear,
            })
        }
    }
}

/// Strict ISO-8601 forms, with or without an offset.
fn parse_iso(input: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Collapse "at", commas and repeated whitespace, and rewrite any meridiem
/// marker as a trailing " AM"/" PM".
fn normalize_input(input: &str) -> String {
    let without_at = AT_WORD.replace_all(input, " ");
    let without_commas = without_at.replace(',', " ");
    let collapsed = without_commas.split_whitespace().collect::<Vec<_>>().join(" ");

    match MERIDIEM.captures(&collapsed) {
        Some(caps) if collapsed.contains(':') => {
            let marker = if caps[1].eq_ignore_ascii_case("a") {
                "AM"
            } else {
                "PM"
            };
            let start = caps.get(0).map(|m| m.start()).unwrap_or(collapsed.len());
            format!("{} {}", collapsed[..start].trim_end(), marker)
        }
        _ => collapsed,
    }
}

fn date_template(order: ComponentOrder, separator: char, short_year: bool) -> String {
    let year = if short_year { "%y" } else { "%Y" };
    let (a, b, c) = match order {
        ComponentOrder::DayMonthYear => ("%d", "%m", year),
        ComponentOrder::MonthDayYear => ("%m", "%d", year),
        ComponentOrder::YearMonthDay => (year, "%m", "%d"),
    };
    format!("{a}{separator}{b}{separator}{c}")
}

fn time_template(twelve_hour: bool, seconds: bool) -> &'static str {
    match (twelve_hour, seconds) {
        (true, true) => "%I:%M:%S %p",
        (true, false) => "%I:%M %p",
        (false, true) => "%H:%M:%S",
        (false, false) => "%H:%M",
    }
}
