use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

use trawl_channel::{LogChannelConfig, PgLogChannel, RedisChannelConfig, RedisListChannel};

/// Spins up a Redis container and returns a connected channel on `key`.
///
/// The `ContainerAsync` must be kept in scope for the test duration —
/// dropping it will stop the container.
pub async fn setup_redis(key: &str) -> (RedisListChannel, String, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("redis", "7")
        .with_exposed_port(ContainerPort::Tcp(6379))
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
        .start()
        .await
        .expect("Failed to start Redis container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get port");
    let url = format!("redis://{host}:{port}");

    let config = RedisChannelConfig::new(url.clone(), key)
        .with_client_name("trawl-test")
        .with_poll_window(Duration::from_millis(200));

    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let channel = loop {
        match RedisListChannel::connect(&config).await {
            Ok(channel) => break channel,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!("Failed to connect to Redis after {MAX_RETRIES} retries: {e}");
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    };

    (channel, url, container)
}

/// Spins up a PostgreSQL container and returns a connected pool.
pub async fn setup_test_db() -> (PgPool, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "trawl_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/trawl_test");

    // Retry connection until container is fully ready
    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(10)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!("Failed to connect to database after {MAX_RETRIES} retries: {e}");
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    };

    (pool, container)
}

/// A second pool on the same database with at most `size` connections.
pub async fn sized_pool(pool: &PgPool, size: u32) -> PgPool {
    PgPoolOptions::new()
        .max_connections(size)
        .acquire_timeout(Duration::from_secs(3))
        .connect_with((*pool.connect_options()).clone())
        .await
        .expect("Failed to open sized pool")
}

pub fn log_config(topic: &str) -> LogChannelConfig {
    LogChannelConfig::new("postgres://unused", topic)
        .with_client_id("trawl-test")
        .with_poll_interval(Duration::from_millis(200))
}

/// Build a migrated log channel over `pool`.
pub async fn log_channel(pool: &PgPool, config: &LogChannelConfig) -> PgLogChannel {
    let channel = PgLogChannel::from_pool(pool.clone(), config);
    channel.migrate().await.expect("Failed to run migrations");
    channel
}
