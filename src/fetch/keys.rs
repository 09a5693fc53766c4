use chrono::{DateTime, Local};

/// Format of the execution id and of the timestamp embedded in raw keys.
pub const EXECUTION_ID_FORMAT: &str = "%Y%m%d_%H%M%S";

/// How the raw (bronze) key of a fetched payload is chosen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawKeyTemplate {
    /// Always the same key; reruns overwrite.
    Fixed(String),
    /// `raw/<prefix>_<YYYYMMDD_HHMMSS>.csv`; reruns accumulate.
    Timestamped(String),
}

impl RawKeyTemplate {
    /// A value ending in `.csv` is a fixed key, anything else a prefix.
    pub fn parse(key_or_prefix: &str) -> Self {
        let trimmed = key_or_prefix.trim();
        if trimmed.ends_with(".csv") {
            RawKeyTemplate::Fixed(trimmed.to_string())
        } else {
            RawKeyTemplate::Timestamped(trimmed.trim_end_matches('_').to_string())
        }
    }

    pub fn key_for(&self, execution_id: &str) -> String {
        match self {
            RawKeyTemplate::Fixed(key) => key.clone(),
            RawKeyTemplate::Timestamped(prefix) => format!("raw/{}_{}.csv", prefix, execution_id),
        }
    }

    /// String prefix shared by every key this template can produce.
    pub fn listing_prefix(&self) -> String {
        match self {
            RawKeyTemplate::Fixed(key) => key.clone(),
            RawKeyTemplate::Timestamped(prefix) => format!("raw/{}_", prefix),
        }
    }
}

pub fn execution_id(now: DateTime<Local>) -> String {
    now.format(EXECUTION_ID_FORMAT).to_string()
}

/// Last path segment of a key.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_fixed_and_prefix() {
        assert_eq!(
            RawKeyTemplate::parse("raw/data.csv"),
            RawKeyTemplate::Fixed("raw/data.csv".into())
        );
        assert_eq!(
            RawKeyTemplate::parse("cdc_nutrition"),
            RawKeyTemplate::Timestamped("cdc_nutrition".into())
        );
    }

    #[test]
    fn test_timestamped_key() {
        let now = Local.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let id = execution_id(now);
        assert_eq!(id, "20250102_030405");

        let template = RawKeyTemplate::parse("cdc_nutrition");
        let key = template.key_for(&id);
        assert_eq!(key, "raw/cdc_nutrition_20250102_030405.csv");
        assert!(key.starts_with(&template.listing_prefix()));
        assert_eq!(file_name(&key), "cdc_nutrition_20250102_030405.csv");
    }

    #[test]
    fn test_fixed_key_ignores_execution_id() {
        let template = RawKeyTemplate::Fixed("raw/data.csv".into());
        assert_eq!(template.key_for("20250102_030405"), "raw/data.csv");
        assert_eq!(template.listing_prefix(), "raw/data.csv");
    }
}
