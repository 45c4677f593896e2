use std::time::Duration;

use trawl_core::AppError;

const DEFAULT_CLIENT_ID: &str = "trawl";
const DEFAULT_GROUP_ID: &str = "trawl";

/// Configuration for the Redis list-backed channel.
#[derive(Debug, Clone)]
pub struct RedisChannelConfig {
    /// Connection URL. Password and database index travel in the URL
    /// (`redis://:secret@host:6379/2`).
    pub url: String,
    /// List key holding pending messages.
    pub key: String,
    /// Name reported through `CLIENT SETNAME`.
    pub client_name: String,
    /// Server-side timeout of one blocking pop. Bounds how long a lease takes
    /// to notice cancellation.
    pub poll_window: Duration,
}

impl RedisChannelConfig {
    pub fn new(url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key: key.into(),
            client_name: DEFAULT_CLIENT_ID.to_string(),
            poll_window: Duration::from_secs(1),
        }
    }

    /// Read configuration from environment variables.
    ///
    /// - `REDIS_URL` (required)
    /// - `REDIS_KEY` (optional, defaults to `trawl`)
    /// - `TRAWL_CLIENT_ID` (optional, defaults to `trawl`)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let url = lookup("REDIS_URL").ok_or_else(|| {
            AppError::ConfigError("REDIS_URL not set. Required for the redis backend.".into())
        })?;
        let key = lookup("REDIS_KEY").unwrap_or_else(|| "trawl".to_string());
        let client_name = lookup("TRAWL_CLIENT_ID").unwrap_or_else(|| DEFAULT_CLIENT_ID.into());

        Ok(Self::new(url, key).with_client_name(client_name))
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn with_poll_window(mut self, window: Duration) -> Self {
        self.poll_window = window;
        self
    }
}

/// Configuration for the PostgreSQL log-backed channel.
#[derive(Debug, Clone)]
pub struct LogChannelConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// Logical log name.
    pub topic: String,
    /// Consumer group whose offsets this channel advances.
    pub group_id: String,
    /// Identity recorded on produced records and committed offsets.
    pub client_id: String,
    /// Number of partitions of the topic. Fixed at first use.
    pub partitions: u32,
    /// Fallback wake-up interval when no notification arrives.
    pub poll_interval: Duration,
}

impl LogChannelConfig {
    pub fn new(database_url: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 5,
            topic: topic.into(),
            group_id: DEFAULT_GROUP_ID.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            partitions: 1,
            poll_interval: Duration::from_secs(5),
        }
    }

    /// Read configuration from environment variables.
    ///
    /// - `DATABASE_URL` (required)
    /// - `DATABASE_MAX_CONNECTIONS` (optional, defaults to 5)
    /// - `TRAWL_TOPIC` (optional, defaults to `trawl`)
    /// - `TRAWL_GROUP_ID` (optional, defaults to `trawl`)
    /// - `TRAWL_CLIENT_ID` (optional, defaults to `trawl`)
    /// - `TRAWL_PARTITIONS` (optional, defaults to 1)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let database_url = lookup("DATABASE_URL").ok_or_else(|| {
            AppError::ConfigError("DATABASE_URL not set. Required for the log backend.".into())
        })?;
        let topic = lookup("TRAWL_TOPIC").unwrap_or_else(|| "trawl".to_string());

        let mut config = Self::new(database_url, topic);
        config.max_connections =
            parse_positive("DATABASE_MAX_CONNECTIONS", lookup("DATABASE_MAX_CONNECTIONS"), 5)?;
        config.partitions = parse_positive("TRAWL_PARTITIONS", lookup("TRAWL_PARTITIONS"), 1)?;
        if let Some(group_id) = lookup("TRAWL_GROUP_ID") {
            config.group_id = group_id;
        }
        if let Some(client_id) = lookup("TRAWL_CLIENT_ID") {
            config.client_id = client_id;
        }
        Ok(config)
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

fn parse_positive(name: &str, raw: Option<String>, default: u32) -> Result<u32, AppError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let parsed: u32 = raw.parse().map_err(|_| {
        AppError::ConfigError(format!("Invalid {name} '{raw}': must be a positive integer"))
    })?;
    if parsed == 0 {
        return Err(AppError::ConfigError(format!("{name} must be at least 1")));
    }
    Ok(parsed)
}
