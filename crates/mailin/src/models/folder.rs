//! Date partition names

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};

use crate::error::MailinError;

/// Name of a dated partition, rendered as zero-padded `YYYY.MM.DD`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FolderName(NaiveDate);

impl FolderName {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Build from stored index columns; `None` if they don't form a real date
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn day(&self) -> u32 {
        self.0.day()
    }
}

impl From<NaiveDate> for FolderName {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl fmt::Display for FolderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}.{:02}.{:02}", self.year(), self.month(), self.day())
    }
}

impl FromStr for FolderName {
    type Err = MailinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MailinError::parse(format!("Invalid folder name '{}'", s));

        let mut parts = s.split('.');
        let (Some(y), Some(m), Some(d), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if y.len() != 4 || m.len() != 2 || d.len() != 2 {
            return Err(invalid());
        }

        let year = y.parse().map_err(|_| invalid())?;
        let month = m.parse().map_err(|_| invalid())?;
        let day = d.parse().map_err(|_| invalid())?;
        Self::from_ymd(year, month, day).ok_or_else(invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_zero_padded() {
        let folder = FolderName::from_ymd(2008, 10, 3).unwrap();
        assert_eq!(folder.to_string(), "2008.10.03");

        let early = FolderName::from_ymd(999, 1, 9).unwrap();
        assert_eq!(early.to_string(), "0999.01.09");
    }

    #[test]
    fn test_parse_valid_name() {
        let folder: FolderName = "2024.02.29".parse().unwrap();
        assert_eq!((folder.year(), folder.month(), folder.day()), (2024, 2, 29));
    }

    #[test]
    fn test_parse_rejects_bad_names() {
        for name in ["2023.02.29", "2008.1.03", "2008.10", "2008.10.03.1", "inbox", ""] {
            assert!(name.parse::<FolderName>().is_err(), "accepted {name:?}");
        }
    }

    #[test]
    fn test_from_ymd_rejects_impossible_dates() {
        assert!(FolderName::from_ymd(2008, 13, 1).is_none());
        assert!(FolderName::from_ymd(2008, 4, 31).is_none());
    }
}
