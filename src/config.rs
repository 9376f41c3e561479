//! Writer Configuration
//!
//! Options can be built in code, loaded from TOML, or read from flat
//! `gs.*` properties as handed over by a filesystem plugin host.

use crate::error::{WriterError, WriterResult};
use crate::storage::COMPOSE_MAX_BLOBS;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Property key for the scratch bucket holding temporary objects
pub const TEMPORARY_BUCKET_KEY: &str = "gs.writer.temporary.bucket.name";
/// Property key for the chunk size in bytes
pub const CHUNK_SIZE_KEY: &str = "gs.writer.chunk.size";
/// Property key enabling entropy injection in temporary names
pub const ENTROPY_KEY: &str = "gs.filesink.entropy.enabled";
/// Property key for the compose fan-in
pub const COMPOSE_GROUP_SIZE_KEY: &str = "gs.writer.compose.group.size";
/// Property key declaring that temporaries expire on their own
pub const TEMPORARY_OBJECTS_EXPIRE_KEY: &str = "gs.writer.temporary.objects.expire";
pub const RETRY_MAX_ATTEMPTS_KEY: &str = "gs.retry.max-attempt";
pub const RETRY_INITIAL_BACKOFF_KEY: &str = "gs.retry.init-rpc-timeout";
pub const RETRY_MULTIPLIER_KEY: &str = "gs.retry.rpc-timeout-multiplier";
pub const RETRY_MAX_BACKOFF_KEY: &str = "gs.retry.max-rpc-timeout";

/// Options for the recoverable writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    /// Bytes buffered before a chunk is flushed as a component (default: 8MB)
    pub chunk_size: usize,
    /// Scratch bucket for temporaries; the final bucket when unset
    pub temporary_bucket: Option<String>,
    /// Prefix temporary names with a random id to spread key ranges
    pub entropy_injection: bool,
    /// Sources per compose call (default: 32)
    pub compose_group_size: usize,
    /// Temporaries are removed by a bucket lifecycle rule
    pub temporary_objects_expire: bool,
    /// Per-call retry policy
    pub retry: RetryOptions,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            chunk_size: 8 * 1024 * 1024, // 8MB
            temporary_bucket: None,
            entropy_injection: false,
            compose_group_size: COMPOSE_MAX_BLOBS,
            temporary_objects_expire: false,
            retry: RetryOptions::default(),
        }
    }
}

impl WriterOptions {
    /// Configuration for tests (tiny chunks, fast retries)
    pub fn test() -> Self {
        WriterOptions {
            chunk_size: 16,
            retry: RetryOptions::test(),
            ..Self::default()
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_temporary_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.temporary_bucket = Some(bucket.into());
        self
    }

    pub fn with_entropy_injection(mut self, enabled: bool) -> Self {
        self.entropy_injection = enabled;
        self
    }

    pub fn with_compose_group_size(mut self, size: usize) -> Self {
        self.compose_group_size = size;
        self
    }

    /// Parse options from TOML, filling unset fields with defaults
    pub fn from_toml_str(s: &str) -> WriterResult<Self> {
        let options: WriterOptions =
            toml::from_str(s).map_err(|e| WriterError::Config(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Read options from flat `gs.*` properties; unknown keys are ignored
    pub fn from_properties(props: &HashMap<String, String>) -> WriterResult<Self> {
        let mut options = WriterOptions::default();

        if let Some(bucket) = props.get(TEMPORARY_BUCKET_KEY) {
            let bucket = bucket.trim();
            if !bucket.is_empty() {
                options.temporary_bucket = Some(bucket.to_string());
            }
        }
        if let Some(v) = props.get(CHUNK_SIZE_KEY) {
            options.chunk_size = parse_bytes(CHUNK_SIZE_KEY, v)?;
        }
        if let Some(v) = props.get(ENTROPY_KEY) {
            options.entropy_injection = parse_bool(ENTROPY_KEY, v)?;
        }
        if let Some(v) = props.get(COMPOSE_GROUP_SIZE_KEY) {
            options.compose_group_size = parse_num(COMPOSE_GROUP_SIZE_KEY, v)?;
        }
        if let Some(v) = props.get(TEMPORARY_OBJECTS_EXPIRE_KEY) {
            options.temporary_objects_expire = parse_bool(TEMPORARY_OBJECTS_EXPIRE_KEY, v)?;
        }
        if let Some(v) = props.get(RETRY_MAX_ATTEMPTS_KEY) {
            options.retry.max_attempts = parse_num(RETRY_MAX_ATTEMPTS_KEY, v)?;
        }
        if let Some(v) = props.get(RETRY_INITIAL_BACKOFF_KEY) {
            options.retry.initial_backoff = parse_duration(RETRY_INITIAL_BACKOFF_KEY, v)?;
        }
        if let Some(v) = props.get(RETRY_MULTIPLIER_KEY) {
            options.retry.backoff_multiplier = v
                .trim()
                .parse()
                .map_err(|_| invalid(RETRY_MULTIPLIER_KEY, v))?;
        }
        if let Some(v) = props.get(RETRY_MAX_BACKOFF_KEY) {
            options.retry.max_backoff = parse_duration(RETRY_MAX_BACKOFF_KEY, v)?;
        }

        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> WriterResult<()> {
        if self.chunk_size == 0 {
            return Err(WriterError::Config("chunk_size must be positive".into()));
        }
        if !(2..=COMPOSE_MAX_BLOBS).contains(&self.compose_group_size) {
            return Err(WriterError::Config(format!(
                "compose_group_size must be within 2..={}, got {}",
                COMPOSE_MAX_BLOBS, self.compose_group_size
            )));
        }
        if let Some(bucket) = &self.temporary_bucket {
            if bucket.trim().is_empty() || bucket.contains('/') {
                return Err(WriterError::Config(format!(
                    "invalid temporary bucket name: {:?}",
                    bucket
                )));
            }
        }
        self.retry.validate()
    }
}

/// Exponential backoff for individual storage calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Total attempts per call, including the first (1 disables retries)
    pub max_attempts: u32,
    #[serde(with = "duration_millis")]
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    #[serde(with = "duration_millis")]
    pub max_backoff: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        RetryOptions {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(32),
        }
    }
}

impl RetryOptions {
    pub fn test() -> Self {
        RetryOptions {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_millis(10),
        }
    }

    pub fn no_retry() -> Self {
        RetryOptions {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(retry.saturating_sub(1) as i32);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    pub fn validate(&self) -> WriterResult<()> {
        if self.max_attempts == 0 {
            return Err(WriterError::Config("retry max_attempts must be at least 1".into()));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(WriterError::Config(format!(
                "retry backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

fn invalid(key: &str, value: &str) -> WriterError {
    WriterError::Config(format!("invalid value for {}: {:?}", key, value))
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> WriterResult<T> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> WriterResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

/// Byte size with optional `b`, `kb`, `mb` or `gb` suffix (binary units)
fn parse_bytes(key: &str, value: &str) -> WriterResult<usize> {
    let lower = value.trim().to_ascii_lowercase();
    let (digits, unit) = split_unit(&lower);
    let multiplier: usize = match unit {
        "" | "b" => 1,
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        _ => return Err(invalid(key, value)),
    };
    let n: usize = digits.parse().map_err(|_| invalid(key, value))?;
    n.checked_mul(multiplier).ok_or_else(|| invalid(key, value))
}

/// Duration in milliseconds with optional `ms`, `s` or `min` suffix
fn parse_duration(key: &str, value: &str) -> WriterResult<Duration> {
    let lower = value.trim().to_ascii_lowercase();
    let (digits, unit) = split_unit(&lower);
    let n: u64 = digits.parse().map_err(|_| invalid(key, value))?;
    match unit {
        "" | "ms" => Ok(Duration::from_millis(n)),
        "s" => Ok(Duration::from_secs(n)),
        "min" => Ok(Duration::from_secs(n.saturating_mul(60))),
        _ => Err(invalid(key, value)),
    }
}

fn split_unit(s: &str) -> (&str, &str) {
    let idx = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    (s[..idx].trim(), s[idx..].trim())
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_options() {
        let options = WriterOptions::default();
        assert_eq!(options.chunk_size, 8 * 1024 * 1024);
        assert_eq!(options.compose_group_size, 32);
        assert!(options.temporary_bucket.is_none());
        assert!(!options.entropy_injection);
        assert!(options.validate().is_ok());
        assert!(WriterOptions::test().validate().is_ok());
    }

    #[test]
    fn test_options_json_roundtrip() {
        let options = WriterOptions::default().with_temporary_bucket("scratch");
        let json = serde_json::to_string(&options).unwrap();
        let parsed: WriterOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(options, parsed);
    }

    #[test]
    fn test_from_toml_partial() {
        let options = WriterOptions::from_toml_str(
            r#"
            chunk_size = 1024
            temporary_bucket = "scratch"

            [retry]
            max_attempts = 3
            initial_backoff = 250
            "#,
        )
        .unwrap();
        assert_eq!(options.chunk_size, 1024);
        assert_eq!(options.temporary_bucket.as_deref(), Some("scratch"));
        assert_eq!(options.compose_group_size, 32);
        assert_eq!(options.retry.max_attempts, 3);
        assert_eq!(options.retry.initial_backoff, Duration::from_millis(250));
        assert_eq!(options.retry.max_backoff, RetryOptions::default().max_backoff);
    }

    #[test]
    fn test_from_toml_rejects_bad_group_size() {
        let err = WriterOptions::from_toml_str("compose_group_size = 33").unwrap_err();
        assert!(matches!(err, WriterError::Config(_)));
        assert!(WriterOptions::from_toml_str("compose_group_size = 1").is_err());
    }

    #[test]
    fn test_from_properties() {
        let options = WriterOptions::from_properties(&props(&[
            (TEMPORARY_BUCKET_KEY, "scratch"),
            (CHUNK_SIZE_KEY, "4mb"),
            (ENTROPY_KEY, "TRUE"),
            (COMPOSE_GROUP_SIZE_KEY, "8"),
            (TEMPORARY_OBJECTS_EXPIRE_KEY, "true"),
            (RETRY_MAX_ATTEMPTS_KEY, "10"),
            (RETRY_INITIAL_BACKOFF_KEY, "2s"),
            (RETRY_MULTIPLIER_KEY, "1.5"),
            (RETRY_MAX_BACKOFF_KEY, "1min"),
            ("fs.unrelated", "x"),
        ]))
        .unwrap();

        assert_eq!(options.temporary_bucket.as_deref(), Some("scratch"));
        assert_eq!(options.chunk_size, 4 * 1024 * 1024);
        assert!(options.entropy_injection);
        assert_eq!(options.compose_group_size, 8);
        assert!(options.temporary_objects_expire);
        assert_eq!(options.retry.max_attempts, 10);
        assert_eq!(options.retry.initial_backoff, Duration::from_secs(2));
        assert_eq!(options.retry.backoff_multiplier, 1.5);
        assert_eq!(options.retry.max_backoff, Duration::from_secs(60));
    }

    #[test]
    fn test_from_properties_rejects_garbage() {
        assert!(WriterOptions::from_properties(&props(&[(CHUNK_SIZE_KEY, "lots")])).is_err());
        assert!(WriterOptions::from_properties(&props(&[(CHUNK_SIZE_KEY, "0")])).is_err());
        assert!(WriterOptions::from_properties(&props(&[(ENTROPY_KEY, "yes")])).is_err());
        assert!(WriterOptions::from_properties(&props(&[(RETRY_MAX_ATTEMPTS_KEY, "0")])).is_err());
    }

    #[test]
    fn test_blank_temporary_bucket_means_none() {
        let options =
            WriterOptions::from_properties(&props(&[(TEMPORARY_BUCKET_KEY, "  ")])).unwrap();
        assert!(options.temporary_bucket.is_none());
    }

    #[test]
    fn test_backoff_growth_is_capped() {
        let retry = RetryOptions {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(400));
        assert_eq!(retry.backoff(4), Duration::from_millis(500));
    }
}
