//! Assertion operators
//!
//! Comparisons never fail on malformed input: a numeric operator applied to
//! text that is not a number simply evaluates to `false`.

use std::fmt;
use std::str::FromStr;

use crate::common::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Exists,
    True,
    False,
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "equals" | "eq" => Ok(Self::Equals),
            "not_equals" | "ne" => Ok(Self::NotEquals),
            "contains" => Ok(Self::Contains),
            "not_contains" => Ok(Self::NotContains),
            "starts_with" => Ok(Self::StartsWith),
            "ends_with" => Ok(Self::EndsWith),
            "gt" => Ok(Self::GreaterThan),
            "gte" => Ok(Self::GreaterOrEqual),
            "lt" => Ok(Self::LessThan),
            "lte" => Ok(Self::LessOrEqual),
            "exists" => Ok(Self::Exists),
            "true" => Ok(Self::True),
            "false" => Ok(Self::False),
            other => Err(Error::InvalidCommandArguments(format!(
                "unknown assertion operator '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::GreaterThan => "gt",
            Self::GreaterOrEqual => "gte",
            Self::LessThan => "lt",
            Self::LessOrEqual => "lte",
            Self::Exists => "exists",
            Self::True => "true",
            Self::False => "false",
        };
        f.write_str(name)
    }
}

impl Operator {
    /// Evaluate `actual <op> expected`
    pub fn evaluate(self, actual: &str, expected: &str) -> bool {
        match self {
            Self::Equals => equals_ignore_case(actual, expected),
            Self::NotEquals => !equals_ignore_case(actual, expected),
            Self::Contains => actual.contains(expected),
            Self::NotContains => !actual.contains(expected),
            Self::StartsWith => actual.starts_with(expected),
            Self::EndsWith => actual.ends_with(expected),
            Self::GreaterThan => compare_numbers(actual, expected, |a, b| a > b),
            Self::GreaterOrEqual => compare_numbers(actual, expected, |a, b| a >= b),
            Self::LessThan => compare_numbers(actual, expected, |a, b| a < b),
            Self::LessOrEqual => compare_numbers(actual, expected, |a, b| a <= b),
            Self::Exists | Self::True => parse_bool(actual) == Some(true),
            Self::False => parse_bool(actual) == Some(false),
        }
    }
}

fn equals_ignore_case(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

fn compare_numbers(actual: &str, expected: &str, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.trim().parse::<f64>(), expected.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => cmp(a, b),
        _ => false,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    value.trim().to_ascii_lowercase().parse().ok()
}
