//! Date token parsing and sequential year resolution.
//!
//! Most reservation pages print only month and day. [`DateResolver`] carries a
//! year cursor through one enumeration and advances it when January 1st shows
//! up after other dates of the current year.

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateError {
    #[error("unrecognised date token {0:?}")]
    Unrecognised(String),

    #[error("no such date: {year:04}-{month:02}-{day:02}")]
    OutOfRange { year: i32, month: u32, day: u32 },
}

/// A date token with or without its year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateToken {
    Full(NaiveDate),
    MonthDay { month: u32, day: u32 },
}

impl DateToken {
    /// Accepts `YYYY-MM-DD`, `YYYY/M/D`, `YYYY年M月D日`, `M/D`, `MM-DD` and
    /// `M月D日`. Anything from an opening bracket on (`5/3(水)`) is ignored.
    pub fn parse(token: &str) -> Result<Self, DateError> {
        let unrecognised = || DateError::Unrecognised(token.to_string());

        let head = token
            .split(['(', '（'])
            .next()
            .unwrap_or_default()
            .trim();
        let parts: Vec<u32> = head
            .trim_end_matches('日')
            .split(['-', '/', '年', '月'])
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<_, _>>()
            .map_err(|_| unrecognised())?;

        match parts.as_slice() {
            &[year, month, day] => {
                let year = i32::try_from(year).map_err(|_| unrecognised())?;
                NaiveDate::from_ymd_opt(year, month, day)
                    .map(DateToken::Full)
                    .ok_or(DateError::OutOfRange { year, month, day })
            }
            &[month, day] => Ok(DateToken::MonthDay { month, day }),
            _ => Err(unrecognised()),
        }
    }
}

/// Extract the year from a page header such as `2023年 4月` or `2023 年`.
pub fn parse_year_header(header: &str) -> Option<i32> {
    let digits: String = header
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.len() != 4 {
        return None;
    }
    digits.parse().ok()
}

/// Stateful resolver for month/day sequences that may cross New Year.
///
/// Correctness depends on encounter order, so one resolver must only ever see
/// a single enumeration (one facility, one pass).
#[derive(Debug, Clone)]
pub struct DateResolver {
    year: i32,
    resolved_in_year: usize,
    last: Option<((u32, u32), NaiveDate)>,
}

impl DateResolver {
    pub fn new(initial_year: i32) -> Self {
        Self {
            year: initial_year,
            resolved_in_year: 0,
            last: None,
        }
    }

    /// Current year cursor.
    pub fn year(&self) -> i32 {
        self.year
    }

    /// Resolve a month/day pair against the cursor.
    ///
    /// `01-01` advances the cursor when any date has already been resolved in
    /// the current year; a sequence that starts on New Year's Day keeps it.
    /// Consecutive rows of the same date (one per division) resolve to the
    /// same day and never advance the cursor.
    pub fn resolve(&mut self, month: u32, day: u32) -> Result<NaiveDate, DateError> {
        if let Some((md, date)) = self.last
            && md == (month, day)
        {
            return Ok(date);
        }
        if (month, day) == (1, 1) && self.resolved_in_year > 0 {
            self.year += 1;
            self.resolved_in_year = 0;
        }
        let date = NaiveDate::from_ymd_opt(self.year, month, day).ok_or(DateError::OutOfRange {
            year: self.year,
            month,
            day,
        })?;
        self.resolved_in_year += 1;
        self.last = Some(((month, day), date));
        Ok(date)
    }

    /// Parse and resolve a token. Full dates are returned unchanged and do not
    /// move the cursor.
    pub fn resolve_token(&mut self, token: &str) -> Result<NaiveDate, DateError> {
        match DateToken::parse(token)? {
            DateToken::Full(date) => Ok(date),
            DateToken::MonthDay { month, day } => self.resolve(month, day),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn year_advances_once_at_new_year() {
        let mut resolver = DateResolver::new(2023);
        let resolved: Vec<NaiveDate> = ["12-30", "12-31", "01-01", "01-02"]
            .iter()
            .map(|t| resolver.resolve_token(t).unwrap())
            .collect();
        assert_eq!(
            resolved,
            vec![
                ymd(2023, 12, 30),
                ymd(2023, 12, 31),
                ymd(2024, 1, 1),
                ymd(2024, 1, 2)
            ]
        );
        assert_eq!(resolver.year(), 2024);
    }

    #[test]
    fn repeated_new_year_rows_share_one_date() {
        let mut resolver = DateResolver::new(2023);
        let resolved: Vec<NaiveDate> = ["12/31", "12/31", "1/1", "1/1", "1/1", "1/2"]
            .iter()
            .map(|t| resolver.resolve_token(t).unwrap())
            .collect();
        assert_eq!(
            resolved,
            vec![
                ymd(2023, 12, 31),
                ymd(2023, 12, 31),
                ymd(2024, 1, 1),
                ymd(2024, 1, 1),
                ymd(2024, 1, 1),
                ymd(2024, 1, 2)
            ]
        );
        assert_eq!(resolver.year(), 2024);
    }

    #[test]
    fn sequence_starting_on_new_year_keeps_year() {
        let mut resolver = DateResolver::new(2024);
        assert_eq!(resolver.resolve(1, 1).unwrap(), ymd(2024, 1, 1));
        assert_eq!(resolver.resolve(1, 2).unwrap(), ymd(2024, 1, 2));
    }

    #[test]
    fn two_rollovers() {
        let mut resolver = DateResolver::new(2023);
        resolver.resolve(12, 31).unwrap();
        assert_eq!(resolver.resolve(1, 1).unwrap(), ymd(2024, 1, 1));
        resolver.resolve(6, 1).unwrap();
        assert_eq!(resolver.resolve(1, 1).unwrap(), ymd(2025, 1, 1));
    }

    #[test]
    fn token_forms() {
        assert_eq!(
            DateToken::parse("2023/4/5").unwrap(),
            DateToken::Full(ymd(2023, 4, 5))
        );
        assert_eq!(
            DateToken::parse("2023年12月1日").unwrap(),
            DateToken::Full(ymd(2023, 12, 1))
        );
        assert_eq!(
            DateToken::parse("12月31日").unwrap(),
            DateToken::MonthDay { month: 12, day: 31 }
        );
        assert_eq!(
            DateToken::parse("5/3(水)").unwrap(),
            DateToken::MonthDay { month: 5, day: 3 }
        );
        assert!(matches!(
            DateToken::parse("tomorrow"),
            Err(DateError::Unrecognised(_))
        ));
    }

    #[test]
    fn impossible_dates_error_without_moving_the_cursor() {
        let mut resolver = DateResolver::new(2023);
        assert_eq!(
            resolver.resolve(2, 29),
            Err(DateError::OutOfRange {
                year: 2023,
                month: 2,
                day: 29
            })
        );
        // Nothing resolved yet, so New Year's Day keeps 2023.
        assert_eq!(resolver.resolve(1, 1).unwrap(), ymd(2023, 1, 1));
    }

    #[test]
    fn year_headers() {
        assert_eq!(parse_year_header("2023年 4月"), Some(2023));
        assert_eq!(parse_year_header("2024 年"), Some(2024));
        assert_eq!(parse_year_header("令和5年"), None);
    }
}
