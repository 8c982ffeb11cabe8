use serde::{Serialize, Serializer};
use std::fmt;

const DAY_SECONDS: i64 = 86_400;

/// Bar granularity. Anything shorter than a day is intraday; calendar-sized
/// bars (day, week) are bucketed on the dataset's local clock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Timeframe {
    pub label: String,
    pub step_seconds: i64,
}

impl Timeframe {
    pub fn daily() -> Self {
        Self {
            label: "1day".to_string(),
            step_seconds: DAY_SECONDS,
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        let normalized = value.trim().to_lowercase();
        let label = match normalized.as_str() {
            "1m" | "1min" => "1min",
            "5m" | "5min" => "5min",
            "15m" | "15min" => "15min",
            "30m" | "30min" => "30min",
            "1h" | "1hour" | "hourly" => "1hour",
            "4h" | "4hour" => "4hour",
            "1d" | "1day" | "daily" | "day" => "1day",
            "1w" | "1week" | "weekly" | "week" => "1week",
            _ => return Err(format!("unsupported timeframe: {value}")),
        };

        let step_seconds = parse_duration_like_seconds(label)?;
        Ok(Self {
            label: label.to_string(),
            step_seconds,
        })
    }

    pub fn is_intraday(&self) -> bool {
        self.step_seconds < DAY_SECONDS
    }

    /// True when `self` can be built by aggregating bars of `base`.
    pub fn is_multiple_of(&self, base: &Timeframe) -> bool {
        base.step_seconds > 0
            && self.step_seconds >= base.step_seconds
            && self.step_seconds % base.step_seconds == 0
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl Serialize for Timeframe {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label)
    }
}

pub fn parse_duration_like_seconds(value: &str) -> Result<i64, String> {
    let trimmed = value.trim().to_lowercase();
    if trimmed.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(seconds) = trimmed.parse::<i64>() {
        return Ok(seconds);
    }

    let (number_part, unit) = ["min", "hour", "day", "week"]
        .iter()
        .find_map(|unit| trimmed.strip_suffix(unit).map(|n| (n, *unit)))
        .unwrap_or_else(|| trimmed.split_at(trimmed.len().saturating_sub(1)));

    let multiplier = match unit {
        "s" => 1,
        "m" | "min" => 60,
        "h" | "hour" => 3600,
        "d" | "day" => DAY_SECONDS,
        "w" | "week" => 7 * DAY_SECONDS,
        _ => return Err(format!("unsupported duration unit: {unit}")),
    };

    let number: i64 = number_part
        .parse()
        .map_err(|_| format!("invalid duration: {value}"))?;
    Ok(number * multiplier)
}
