use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Timelike};

/// Banner timestamp layout, local time, whole seconds.
pub const BANNER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum TimeParseError {
    #[error("invalid timestamp `{text}`: {source}")]
    Format {
        text: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("timestamp `{text}` does not exist in the local time zone")]
    NonexistentLocalTime { text: String },
}

/// Current local time truncated to whole seconds.
pub fn now_second() -> DateTime<Local> {
    let now = Local::now();
    now.with_nanosecond(0).unwrap_or(now)
}

pub fn now_epoch() -> i64 {
    Local::now().timestamp()
}

pub fn format_local(time: DateTime<Local>) -> String {
    time.format(BANNER_TIME_FORMAT).to_string()
}

/// Parses a banner timestamp. Ambiguous local times (end of daylight saving
/// time) resolve to the earliest valid interpretation.
pub fn parse_local(text: &str) -> Result<DateTime<Local>, TimeParseError> {
    let naive = NaiveDateTime::parse_from_str(text.trim(), BANNER_TIME_FORMAT).map_err(|source| {
        TimeParseError::Format {
            text: text.to_string(),
            source,
        }
    })?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| TimeParseError::NonexistentLocalTime {
            text: text.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_timestamps_round_trip() {
        let now = now_second();
        let text = format_local(now);
        let parsed = parse_local(&text).expect("parse formatted timestamp");
        assert_eq!(parsed, now);
    }

    #[test]
    fn garbage_timestamp_is_rejected() {
        assert!(parse_local("not a time").is_err());
        assert!(parse_local("2024-13-40 99:99:99").is_err());
    }
}
