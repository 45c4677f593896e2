pub mod config;
pub mod pg_log;
pub mod redis_list;

pub use config::{LogChannelConfig, RedisChannelConfig};
pub use pg_log::{LogLease, LogRecord, PgLogChannel};
pub use redis_list::RedisListChannel;
