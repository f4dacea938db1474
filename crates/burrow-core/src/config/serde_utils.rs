//! Shared serde helpers for configuration

/// Durations written either as whole seconds or as a suffixed string
///
/// Serializes as seconds (u64). Deserializes `90`, `"90"`, `"90s"`, `"5m"`
/// or `"1h"`.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Config {
///     #[serde(with = "burrow_core::config::serde_utils::duration_secs")]
///     heartbeat_interval: Duration,
/// }
/// ```
pub mod duration_secs {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;
    use std::time::Duration;

    /// Serialize a Duration as seconds (u64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    /// Deserialize a Duration from seconds or a suffixed string
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(DurationVisitor)
    }

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("seconds as an integer, or a string like \"30s\", \"5m\", \"1h\"")
        }

        fn visit_u64<E: de::Error>(self, secs: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(secs))
        }

        fn visit_i64<E: de::Error>(self, secs: i64) -> Result<Duration, E> {
            u64::try_from(secs)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("duration must not be negative"))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
            parse(value).ok_or_else(|| E::invalid_value(de::Unexpected::Str(value), &self))
        }
    }

    /// Parse `<n>`, `<n>s`, `<n>m` or `<n>h`
    pub fn parse(value: &str) -> Option<Duration> {
        let value = value.trim();
        let (digits, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
            Some(idx) => value.split_at(idx),
            None => (value, "s"),
        };
        let n: u64 = digits.parse().ok()?;
        let secs = match unit {
            "s" => n,
            "m" => n.checked_mul(60)?,
            "h" => n.checked_mul(3600)?,
            _ => return None,
        };
        Some(Duration::from_secs(secs))
    }
}
