use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A billing month, the key type for `monthly_data` and `billing_data` maps.
///
/// Wire format is `YYYY-MM`, zero-padded. Ordering follows the calendar so
/// the key can be used directly in `BTreeMap`s and range checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) && (2000..=2999).contains(&year) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// The following calendar month.
    pub fn next(&self) -> MonthKey {
        if self.month == 12 {
            MonthKey {
                year: self.year + 1,
                month: 1,
            }
        } else {
            MonthKey {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Inclusive list of months from `start` to `end`, walking one calendar
    /// month at a time. Returns an empty list for an inverted range; callers
    /// must have rejected that case at the API boundary already.
    pub fn range(start: MonthKey, end: MonthKey) -> Vec<MonthKey> {
        let mut months = Vec::new();
        let mut current = start;
        while current <= end {
            months.push(current);
            current = current.next();
        }
        months
    }

    /// Two-digit year + two-digit month, used by the payment reference.
    pub fn yymm(&self) -> String {
        format!("{:02}{:02}", self.year % 100, self.month)
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (y, m) = s
            .split_once('-')
            .ok_or_else(|| format!("invalid month key '{}', expected YYYY-MM", s))?;
        let year: i32 = y
            .parse()
            .map_err(|_| format!("invalid year in month key '{}'", s))?;
        let month: u32 = m
            .parse()
            .map_err(|_| format!("invalid month in month key '{}'", s))?;
        MonthKey::new(year, month).ok_or_else(|| format!("month key '{}' out of range", s))
    }
}

impl Serialize for MonthKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MonthKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display_round_trip() {
        let key: MonthKey = "2024-01".parse().unwrap();
        assert_eq!(key.year(), 2024);
        assert_eq!(key.month(), 1);
        assert_eq!(key.to_string(), "2024-01");
    }

    #[test]
    fn test_rejects_malformed_keys() {
        assert!("2024".parse::<MonthKey>().is_err());
        assert!("2024-13".parse::<MonthKey>().is_err());
        assert!("2024-00".parse::<MonthKey>().is_err());
        assert!("24-01".parse::<MonthKey>().is_err());
        assert!("2024-1x".parse::<MonthKey>().is_err());
        assert!("".parse::<MonthKey>().is_err());
    }

    #[test]
    fn test_range_walks_calendar_months_inclusive() {
        let start: MonthKey = "2023-11".parse().unwrap();
        let end: MonthKey = "2024-02".parse().unwrap();
        let months: Vec<String> = MonthKey::range(start, end)
            .iter()
            .map(|m| m.to_string())
            .collect();
        assert_eq!(months, vec!["2023-11", "2023-12", "2024-01", "2024-02"]);
    }

    #[test]
    fn test_range_single_month() {
        let m: MonthKey = "2024-06".parse().unwrap();
        assert_eq!(MonthKey::range(m, m), vec![m]);
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let start: MonthKey = "2024-05".parse().unwrap();
        let end: MonthKey = "2024-04".parse().unwrap();
        assert!(MonthKey::range(start, end).is_empty());
    }

    #[test]
    fn test_ordering_matches_calendar() {
        let a: MonthKey = "2023-12".parse().unwrap();
        let b: MonthKey = "2024-01".parse().unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_yymm() {
        let key: MonthKey = "2024-03".parse().unwrap();
        assert_eq!(key.yymm(), "2403");
    }
}
