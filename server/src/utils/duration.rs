//! Compact duration strings (`30s`, `15m`, `2h`, `7d`)

use std::fmt;
use std::time::Duration;

/// Unit suffix of a compact duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DurationUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl DurationUnit {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "ms" => Some(Self::Milliseconds),
            "s" => Some(Self::Seconds),
            "m" => Some(Self::Minutes),
            "h" => Some(Self::Hours),
            "d" => Some(Self::Days),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Milliseconds => "ms",
            Self::Seconds => "s",
            Self::Minutes => "m",
            Self::Hours => "h",
            Self::Days => "d",
        }
    }

    fn millis(&self) -> u64 {
        match self {
            Self::Milliseconds => 1,
            Self::Seconds => 1_000,
            Self::Minutes => 60_000,
            Self::Hours => 3_600_000,
            Self::Days => 86_400_000,
        }
    }
}

/// A parsed `<value><unit>` pair, kept in its original unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DurationSpec {
    pub value: u64,
    pub unit: DurationUnit,
}

impl DurationSpec {
    /// Parse `\d+\s*(ms|s|m|h|d)`, surrounding whitespace allowed.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let digits_end = s.find(|c: char| !c.is_ascii_digit())?;
        if digits_end == 0 {
            return None;
        }
        let value: u64 = s[..digits_end].parse().ok()?;
        let unit = DurationUnit::parse(s[digits_end..].trim_start())?;
        Some(Self { value, unit })
    }

    /// Hours and days are expressed in minutes; smaller units are kept.
    ///
    /// Two specs describing the same span (`1h`, `60m`) normalize to the same value.
    pub fn normalized(self) -> Self {
        match self.unit {
            DurationUnit::Hours | DurationUnit::Days => Self {
                value: self.value.saturating_mul(self.unit.millis() / 60_000),
                unit: DurationUnit::Minutes,
            },
            _ => self,
        }
    }

    pub fn as_millis(&self) -> u64 {
        self.value.saturating_mul(self.unit.millis())
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.as_millis())
    }
}

impl fmt::Display for DurationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.as_str())
    }
}

/// Parse a key lifetime string of the form `\d+[smhd]`.
///
/// Returns `None` for anything else, including a zero value.
pub fn parse_expires_in(s: &str) -> Option<Duration> {
    if s.contains(char::is_whitespace) {
        return None;
    }
    let spec = DurationSpec::parse(s)?;
    if spec.unit == DurationUnit::Milliseconds || spec.value == 0 {
        return None;
    }
    Some(spec.as_duration())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(
            DurationSpec::parse("250ms"),
            Some(DurationSpec {
                value: 250,
                unit: DurationUnit::Milliseconds
            })
        );
        assert_eq!(DurationSpec::parse("30s").unwrap().as_millis(), 30_000);
        assert_eq!(DurationSpec::parse("15m").unwrap().as_millis(), 900_000);
        assert_eq!(DurationSpec::parse("2h").unwrap().as_millis(), 7_200_000);
        assert_eq!(DurationSpec::parse("1d").unwrap().as_millis(), 86_400_000);
    }

    #[test]
    fn test_parse_allows_inner_whitespace() {
        let spec = DurationSpec::parse(" 10 m ").unwrap();
        assert_eq!(spec.value, 10);
        assert_eq!(spec.unit, DurationUnit::Minutes);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(DurationSpec::parse("").is_none());
        assert!(DurationSpec::parse("m").is_none());
        assert!(DurationSpec::parse("10").is_none());
        assert!(DurationSpec::parse("10w").is_none());
        assert!(DurationSpec::parse("-5m").is_none());
        assert!(DurationSpec::parse("1.5h").is_none());
    }

    #[test]
    fn test_normalized_hours_and_days() {
        let hour = DurationSpec::parse("1h").unwrap().normalized();
        let minutes = DurationSpec::parse("60m").unwrap().normalized();
        assert_eq!(hour, minutes);
        assert_eq!(hour.to_string(), "60m");

        let day = DurationSpec::parse("1d").unwrap().normalized();
        assert_eq!(day.to_string(), "1440m");

        let secs = DurationSpec::parse("90s").unwrap().normalized();
        assert_eq!(secs.to_string(), "90s");
    }

    #[test]
    fn test_parse_expires_in() {
        assert_eq!(parse_expires_in("30d"), Some(Duration::from_secs(30 * 86_400)));
        assert_eq!(parse_expires_in("12h"), Some(Duration::from_secs(12 * 3_600)));
        assert_eq!(parse_expires_in("45s"), Some(Duration::from_secs(45)));
        assert!(parse_expires_in("100ms").is_none());
        assert!(parse_expires_in("0d").is_none());
        assert!(parse_expires_in("30 d").is_none());
        assert!(parse_expires_in("forever").is_none());
    }
}
