use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;

use trawl_channel::{LogChannelConfig, PgLogChannel, RedisChannelConfig, RedisListChannel};
use trawl_core::channel::Channel;
use trawl_core::error::AppError;
use trawl_core::pagination::{CursorToken, Pagination, SinglePage, TimeWindow};
use trawl_core::request::WindowedRequest;
use trawl_core::{
    DriveSummary, FileSink, MemoryChannel, NullSink, PageSink, PagedTask, TracingDriveReporter,
    drive,
};
use trawl_steam::{
    AppDetailsRequest, AppNewsRequest, DEFAULT_USER_AGENT, ReviewRequest, SteamFetcher,
    SteamRequest,
};

#[derive(Parser)]
#[command(name = "trawl", version, about = "Paginated scraper over a durable work channel")]
struct Cli {
    /// Channel backend carrying page requests
    #[arg(long, global = true, env = "TRAWL_BACKEND", value_enum, default_value_t = Backend::Memory)]
    backend: Backend,

    /// Prefix of per-resource channel names (`<prefix>:<kind>:<app id>`)
    #[arg(long, global = true, env = "TRAWL_CHANNEL_PREFIX", default_value = "trawl")]
    channel_prefix: String,

    /// Directory pages are written to
    #[arg(short, long, global = true, env = "TRAWL_OUT_DIR", default_value = "scrap_data")]
    out: PathBuf,

    /// Fetch and validate pages without saving them
    #[arg(long, global = true, default_value_t = false)]
    dry_run: bool,

    /// HTTP timeout in seconds
    #[arg(long, global = true, env = "TRAWL_HTTP_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// User-Agent header sent to Steam
    #[arg(long, global = true, env = "TRAWL_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    user_agent: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// In-process queue, lost on exit
    Memory,
    /// Redis list (REDIS_URL)
    Redis,
    /// PostgreSQL partitioned log (DATABASE_URL)
    Log,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape store app details (one page per app)
    Details {
        /// Steam app ids
        #[arg(short, long = "app-id", required = true, num_args = 1..)]
        app_ids: Vec<u32>,
    },

    /// Scrape app news, newest first, walking back in time
    News {
        #[arg(short, long = "app-id", required = true, num_args = 1..)]
        app_ids: Vec<u32>,

        /// Items per page (server default when 0)
        #[arg(long, default_value_t = 0)]
        count: u32,

        /// Truncate item contents to this many characters (full when 0)
        #[arg(long, default_value_t = 0)]
        max_length: u32,

        /// Only scrape items older than this unix timestamp
        #[arg(long)]
        end_date: Option<i64>,

        /// Restrict to these feed names
        #[arg(long, value_delimiter = ',')]
        feeds: Vec<String>,
    },

    /// Scrape user reviews by cursor
    Reviews {
        #[arg(short, long = "app-id", required = true, num_args = 1..)]
        app_ids: Vec<u32>,

        #[arg(long, default_value = "all")]
        language: String,

        /// Review ordering: recent, updated or all
        #[arg(long, default_value = "recent")]
        filter: String,

        #[arg(long, default_value_t = 100)]
        num_per_page: u32,
    },
}

impl Commands {
    fn kind(&self) -> &'static str {
        match self {
            Commands::Details { .. } => "details",
            Commands::News { .. } => "news",
            Commands::Reviews { .. } => "reviews",
        }
    }

    fn app_ids(&self) -> &[u32] {
        match self {
            Commands::Details { app_ids }
            | Commands::News { app_ids, .. }
            | Commands::Reviews { app_ids, .. } => app_ids,
        }
    }
}

/// Settings shared by every per-app scrape.
#[derive(Clone)]
struct RunContext {
    backend: Backend,
    channel_prefix: String,
    kind: &'static str,
    out: PathBuf,
    dry_run: bool,
    fetcher: SteamFetcher,
    cancel: CancellationToken,
}

impl RunContext {
    fn channel_name(&self, app_id: u32) -> String {
        format!("{}:{}:{}", self.channel_prefix, self.kind, app_id)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("trawl=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let fetcher = SteamFetcher::with_options(Duration::from_secs(cli.timeout), &cli.user_agent)
        .context("Failed to create HTTP client")?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let ctx = RunContext {
        backend: cli.backend,
        channel_prefix: cli.channel_prefix,
        kind: cli.command.kind(),
        out: cli.out,
        dry_run: cli.dry_run,
        fetcher,
        cancel,
    };

    let mut set = JoinSet::new();
    for &app_id in cli.command.app_ids() {
        let ctx = ctx.clone();
        let span = tracing::info_span!("scrape", kind = ctx.kind, app_id);
        match &cli.command {
            Commands::Details { .. } => {
                let request = AppDetailsRequest::new(app_id);
                set.spawn(async move { scrape(&ctx, app_id, request, SinglePage).await }.instrument(span));
            }
            Commands::News {
                count,
                max_length,
                end_date,
                feeds,
                ..
            } => {
                let request = AppNewsRequest::new(app_id)
                    .with_count(*count)
                    .with_max_length(*max_length)
                    .with_feeds(feeds.clone())
                    .with_watermark(*end_date);
                set.spawn(async move { scrape(&ctx, app_id, request, TimeWindow).await }.instrument(span));
            }
            Commands::Reviews {
                language,
                filter,
                num_per_page,
                ..
            } => {
                let request = ReviewRequest::new(app_id)
                    .with_language(language.clone())
                    .with_filter(filter.clone())
                    .with_num_per_page(*num_per_page);
                set.spawn(async move { scrape(&ctx, app_id, request, CursorToken).await }.instrument(span));
            }
        }
    }

    let total = set.len();
    let mut failed = 0usize;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((app_id, Ok(summary))) => {
                tracing::info!(app_id, cycles = summary.cycles, "Done");
            }
            Ok((app_id, Err(AppError::Cancelled))) => {
                tracing::warn!(app_id, "Cancelled; unfinished pages stay in the channel");
                failed += 1;
            }
            Ok((app_id, Err(e))) => {
                let hint = if e.is_transient() { " (transient, rerun to resume)" } else { "" };
                tracing::error!(app_id, error = %e, "Scrape failed{hint}");
                failed += 1;
            }
            Err(e) => {
                tracing::error!(error = %e, "Scrape task panicked");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {total} scrapes did not finish");
    }
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C handler");
        return;
    }
    tracing::info!("Shutdown signal received");
    cancel.cancel();
}

/// Open the configured channel for one app and drive its task to the end.
async fn scrape<R, P>(
    ctx: &RunContext,
    app_id: u32,
    request: R,
    pagination: P,
) -> (u32, Result<DriveSummary, AppError>)
where
    R: SteamRequest,
    P: Pagination<R> + 'static,
{
    let name = ctx.channel_name(app_id);
    let result = match ctx.backend {
        Backend::Memory => run(ctx, MemoryChannel::new(name), request, pagination).await,
        Backend::Redis => match open_redis(name).await {
            Ok(channel) => run(ctx, channel, request, pagination).await,
            Err(e) => Err(e),
        },
        Backend::Log => match open_log(name).await {
            Ok(channel) => run(ctx, channel, request, pagination).await,
            Err(e) => Err(e),
        },
    };
    (app_id, result)
}

async fn open_redis(key: String) -> Result<RedisListChannel, AppError> {
    let config = RedisChannelConfig::from_env()?.with_key(key);
    let channel = RedisListChannel::connect(&config).await?;
    // Leases stranded by a crashed run go back in line before we start.
    let recovered = channel.recover().await?;
    if recovered > 0 {
        tracing::warn!(%recovered, key = %config.key, "Recovered unacknowledged messages");
    }
    Ok(channel)
}

async fn open_log(topic: String) -> Result<PgLogChannel, AppError> {
    let config = LogChannelConfig::from_env()?.with_topic(topic);
    let channel = PgLogChannel::connect(&config).await?;
    channel.migrate().await?;
    Ok(channel)
}

async fn run<Q, R, P>(
    ctx: &RunContext,
    channel: Q,
    request: R,
    pagination: P,
) -> Result<DriveSummary, AppError>
where
    Q: Channel + 'static,
    R: SteamRequest,
    P: Pagination<R> + 'static,
{
    if ctx.dry_run {
        drive_with(ctx, channel, NullSink, request, pagination).await
    } else {
        let sink = FileSink::new(&ctx.out, ctx.kind);
        drive_with(ctx, channel, sink, request, pagination).await
    }
}

async fn drive_with<Q, S, R, P>(
    ctx: &RunContext,
    channel: Q,
    sink: S,
    request: R,
    pagination: P,
) -> Result<DriveSummary, AppError>
where
    Q: Channel + 'static,
    S: PageSink + 'static,
    R: SteamRequest,
    P: Pagination<R> + 'static,
{
    tracing::info!(channel = %channel.name(), "Starting scrape");
    let mut task = PagedTask::new(
        channel.clone(),
        ctx.fetcher.clone(),
        sink,
        pagination,
        request,
    )
    .with_cancellation(ctx.cancel.clone());

    let result = drive(&mut task, &ctx.cancel, &TracingDriveReporter).await;
    tracing::info!(pages = task.pages_saved(), "Pages saved");

    if let Err(e) = channel.close().await {
        tracing::warn!(error = %e, "Failed to close channel");
    }
    result
}
