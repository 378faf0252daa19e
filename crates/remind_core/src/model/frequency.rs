use crate::error::AppError;
use serde::{Serialize, Serializer};
use std::fmt;
use time::Weekday;

const WEEK: [Weekday; 7] = [
    Weekday::Monday,
    Weekday::Tuesday,
    Weekday::Wednesday,
    Weekday::Thursday,
    Weekday::Friday,
    Weekday::Saturday,
    Weekday::Sunday,
];

pub fn weekday_label(day: Weekday) -> &'static str {
    match day {
        Weekday::Monday => "MON",
        Weekday::Tuesday => "TUE",
        Weekday::Wednesday => "WED",
        Weekday::Thursday => "THU",
        Weekday::Friday => "FRI",
        Weekday::Saturday => "SAT",
        Weekday::Sunday => "SUN",
    }
}

pub fn parse_weekday(raw: &str) -> Option<Weekday> {
    let upper = raw.trim().to_ascii_uppercase();
    WEEK.into_iter().find(|day| {
        let label = weekday_label(*day);
        upper == label || (upper.len() > 3 && day.to_string().to_ascii_uppercase() == upper)
    })
}

/// Non-empty set of weekdays, stored as a Monday-first bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub fn from_days<I: IntoIterator<Item = Weekday>>(days: I) -> Option<Self> {
        let bits = days
            .into_iter()
            .fold(0u8, |bits, day| bits | (1 << day.number_days_from_monday()));
        if bits == 0 { None } else { Some(Self(bits)) }
    }

    /// Parses labels separated by commas or whitespace, e.g. `"MON, wed"`.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let mut days = Vec::new();
        for part in raw
            .split(|ch: char| ch == ',' || ch.is_whitespace())
            .filter(|part| !part.is_empty())
        {
            let day = parse_weekday(part)
                .ok_or_else(|| AppError::invalid_input(format!("unknown weekday '{part}'")))?;
            days.push(day);
        }
        Self::from_days(days).ok_or_else(|| AppError::invalid_input("at least one weekday is required"))
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.number_days_from_monday()) != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        WEEK.into_iter().filter(|day| self.contains(*day))
    }
}

impl fmt::Display for WeekdaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> = self.iter().map(weekday_label).collect();
        f.write_str(&labels.join(","))
    }
}

/// Recurrence rule attached to a task. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Once,
    EveryDay,
    Weekly,
    Monthly,
    SpecificWeekdays(WeekdaySet),
}

impl Frequency {
    pub const LABELS: [&'static str; 5] =
        ["ONCE", "EVERY_DAY", "WEEKLY", "MONTHLY", "SPECIFIC_WEEKDAYS"];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Once => "ONCE",
            Self::EveryDay => "EVERY_DAY",
            Self::Weekly => "WEEKLY",
            Self::Monthly => "MONTHLY",
            Self::SpecificWeekdays(_) => "SPECIFIC_WEEKDAYS",
        }
    }

    pub fn weekdays(&self) -> Option<WeekdaySet> {
        match self {
            Self::SpecificWeekdays(days) => Some(*days),
            _ => None,
        }
    }

    /// Whether the label alone selects `SPECIFIC_WEEKDAYS`, so callers know to
    /// ask for a weekday set before building the rule.
    pub fn needs_weekdays(label: &str) -> bool {
        canonical_label(label).as_deref() == Some("SPECIFIC_WEEKDAYS")
    }

    /// Builds a rule from user input. `days` is required for
    /// `SPECIFIC_WEEKDAYS` and rejected for every other label.
    pub fn parse(label: &str, days: Option<&str>) -> Result<Self, AppError> {
        let canonical = canonical_label(label)
            .ok_or_else(|| AppError::invalid_input(format!("unknown frequency '{}'", label.trim())))?;
        let days = days.map(str::trim).filter(|value| !value.is_empty());

        match (canonical.as_str(), days) {
            ("SPECIFIC_WEEKDAYS", Some(days)) => Ok(Self::SpecificWeekdays(WeekdaySet::parse(days)?)),
            ("SPECIFIC_WEEKDAYS", None) => Err(AppError::invalid_input(
                "weekdays are required for SPECIFIC_WEEKDAYS",
            )),
            (_, Some(_)) => Err(AppError::invalid_input(format!(
                "weekdays are only allowed for SPECIFIC_WEEKDAYS, not {canonical}"
            ))),
            ("ONCE", None) => Ok(Self::Once),
            ("EVERY_DAY", None) => Ok(Self::EveryDay),
            ("WEEKLY", None) => Ok(Self::Weekly),
            ("MONTHLY", None) => Ok(Self::Monthly),
            (other, None) => Err(AppError::invalid_input(format!("unknown frequency '{other}'"))),
        }
    }

    /// Rebuilds a rule from stored columns; violations are data corruption,
    /// not user mistakes.
    pub fn from_stored(label: &str, days: Option<&str>) -> Result<Self, AppError> {
        Self::parse(label, days)
            .map_err(|err| AppError::invalid_data(format!("stored frequency: {}", err.message())))
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpecificWeekdays(days) => write!(f, "{} ({})", self.label(), days),
            other => f.write_str(other.label()),
        }
    }
}

impl Serialize for Frequency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn canonical_label(raw: &str) -> Option<String> {
    let mut cleaned = String::new();
    let mut previous_underscore = false;

    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            cleaned.push(ch.to_ascii_uppercase());
            previous_underscore = false;
        } else if !previous_underscore && !cleaned.is_empty() {
            cleaned.push('_');
            previous_underscore = true;
        }
    }

    match cleaned.trim_matches('_') {
        "ONCE" => Some("ONCE".to_string()),
        "EVERY_DAY" | "EVERYDAY" | "DAILY" => Some("EVERY_DAY".to_string()),
        "WEEKLY" => Some("WEEKLY".to_string()),
        "MONTHLY" => Some("MONTHLY".to_string()),
        "SPECIFIC_WEEKDAYS" | "SPECIFIC_DAYS" => Some("SPECIFIC_WEEKDAYS".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{Frequency, WeekdaySet, parse_weekday};
    use time::Weekday;

    #[test]
    fn parse_accepts_aliases_and_case() {
        assert_eq!(Frequency::parse("daily", None).unwrap(), Frequency::EveryDay);
        assert_eq!(Frequency::parse("Every-Day", None).unwrap(), Frequency::EveryDay);
        assert_eq!(Frequency::parse(" weekly ", None).unwrap(), Frequency::Weekly);
        assert_eq!(Frequency::parse("once", None).unwrap(), Frequency::Once);
    }

    #[test]
    fn parse_rejects_unknown_label() {
        let err = Frequency::parse("EVERY_TWO_DAYS", None).unwrap_err();
        assert_eq!(err.code(), "invalid_input");
        assert!(err.message().contains("unknown frequency"));
    }

    #[test]
    fn specific_weekdays_requires_days() {
        let err = Frequency::parse("specific_days", None).unwrap_err();
        assert_eq!(err.code(), "invalid_input");

        let err = Frequency::parse("SPECIFIC_WEEKDAYS", Some(" , ")).unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn other_rules_reject_days() {
        let err = Frequency::parse("WEEKLY", Some("MON")).unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn weekday_set_parses_mixed_separators() {
        let frequency = Frequency::parse("SPECIFIC_WEEKDAYS", Some("fri, mon wednesday")).unwrap();
        let days = frequency.weekdays().unwrap();

        assert!(days.contains(Weekday::Monday));
        assert!(days.contains(Weekday::Wednesday));
        assert!(days.contains(Weekday::Friday));
        assert!(!days.contains(Weekday::Tuesday));
        assert_eq!(days.to_string(), "MON,WED,FRI");
        assert_eq!(frequency.to_string(), "SPECIFIC_WEEKDAYS (MON,WED,FRI)");
    }

    #[test]
    fn weekday_set_rejects_unknown_label() {
        let err = WeekdaySet::parse("MON,XYZ").unwrap_err();
        assert!(err.message().contains("XYZ"));
    }

    #[test]
    fn parse_weekday_accepts_full_names() {
        assert_eq!(parse_weekday("sunday"), Some(Weekday::Sunday));
        assert_eq!(parse_weekday("Tue"), Some(Weekday::Tuesday));
        assert_eq!(parse_weekday("tues"), None);
    }

    #[test]
    fn stored_rule_violations_are_invalid_data() {
        let err = Frequency::from_stored("SPECIFIC_WEEKDAYS", None).unwrap_err();
        assert_eq!(err.code(), "invalid_data");

        let err = Frequency::from_stored("MONTHLY", Some("MON")).unwrap_err();
        assert_eq!(err.code(), "invalid_data");
    }
}
