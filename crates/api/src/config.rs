//! Process configuration: CLI flags, an optional TOML file, and the resolved
//! settings handed to the runtime.
//!
//! Precedence is CLI flag (or its `TRACKLANE_*` env var) > file > default.
//! Durations in the file are integer milliseconds (`*_ms` keys).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use tracklane_observability::LogFormat;
use tracklane_runtime::{
    EngineConfig, JobQueueConfig, PoolConfig, RateLimitConfig, RetryPolicy,
};
use tracklane_tracker::{DispatcherConfig, TrackerConfig};

const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

#[derive(Parser, Debug, Default)]
#[command(name = "tracklane", version, about = "Rate-limited job and operation runner for an issue tracker")]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, env = "TRACKLANE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address the admin API listens on.
    #[arg(long, env = "TRACKLANE_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Base URL of the upstream issue tracker.
    #[arg(long, env = "TRACKLANE_UPSTREAM_URL")]
    pub upstream_url: Option<String>,

    /// Bearer token sent to the upstream tracker.
    #[arg(long, env = "TRACKLANE_UPSTREAM_TOKEN", hide_env_values = true)]
    pub upstream_token: Option<String>,

    /// Log output: `json` or `pretty`.
    #[arg(long, env = "TRACKLANE_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub listen: Option<String>,
    pub log_format: Option<LogFormat>,

    pub upstream: Option<UpstreamSection>,
    pub rate_limit: Option<RateLimitSection>,
    pub retry: Option<RetrySection>,
    pub pool: Option<PoolSection>,
    pub job_queue: Option<JobQueueSection>,
    pub dispatcher: Option<DispatcherSection>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct UpstreamSection {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RateLimitSection {
    pub rate_per_sec: Option<f64>,
    pub burst: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub jitter: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PoolSection {
    pub max_size: Option<usize>,
    pub min_size: Option<usize>,
    pub acquire_timeout_ms: Option<u64>,
    pub max_lifetime_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
    pub health_check_interval_ms: Option<u64>,
    pub health_check_sample: Option<usize>,
    pub validate_on_get: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct JobQueueSection {
    pub workers: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub admission_timeout_ms: Option<u64>,
    pub result_capacity: Option<usize>,
    pub result_timeout_ms: Option<u64>,
    /// Per-attempt deadline for tracker jobs. `0` disables it.
    pub job_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DispatcherSection {
    pub workers: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub admission_timeout_ms: Option<u64>,
    /// `0` disables the default per-attempt deadline.
    pub default_timeout_ms: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {path:?}"))?;
        Self::parse(&content).with_context(|| format!("failed to parse config file: {path:?}"))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen: SocketAddr,
    pub log_format: LogFormat,
    pub tracker: TrackerConfig,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryPolicy,
    pub pool: PoolConfig,
    pub job_queue: JobQueueConfig,
    /// Per-attempt deadline applied by the tracker job handler.
    pub job_timeout: Option<Duration>,
    pub dispatcher: DispatcherConfig,
}

impl Settings {
    /// Read the file named by `--config` (if any) and resolve against it.
    pub fn load(cli: &Cli) -> Result<Self> {
        let file = cli.config.as_deref().map(FileConfig::load).transpose()?;
        Self::resolve(cli, file)
    }

    pub fn resolve(cli: &Cli, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let listen = match (cli.listen, file.listen.as_deref()) {
            (Some(addr), _) => addr,
            (None, Some(raw)) => raw
                .parse::<SocketAddr>()
                .with_context(|| format!("invalid listen address: {raw}"))?,
            (None, None) => DEFAULT_LISTEN.parse::<SocketAddr>()?,
        };
        let log_format = cli.log_format.or(file.log_format).unwrap_or_default();

        let upstream = file.upstream.unwrap_or_default();
        let base_url = cli
            .upstream_url
            .clone()
            .or(upstream.base_url)
            .ok_or_else(|| {
                anyhow::anyhow!("upstream url must be set via --upstream-url or [upstream].base_url")
            })?;
        let defaults = TrackerConfig::default();
        let tracker = TrackerConfig {
            base_url,
            token: cli.upstream_token.clone().or(upstream.token),
            request_timeout: millis_or(upstream.request_timeout_ms, defaults.request_timeout),
            connect_timeout: millis_or(upstream.connect_timeout_ms, defaults.connect_timeout),
        };

        let rl = file.rate_limit.unwrap_or_default();
        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            rate_per_sec: rl.rate_per_sec.unwrap_or(defaults.rate_per_sec),
            burst: rl.burst.unwrap_or(defaults.burst),
        };
        rate_limit.validate().context("invalid [rate_limit] section")?;

        let r = file.retry.unwrap_or_default();
        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: r.max_retries.unwrap_or(defaults.max_retries),
            base_delay: millis_or(r.base_delay_ms, defaults.base_delay),
            max_delay: millis_or(r.max_delay_ms, defaults.max_delay),
            multiplier: r.multiplier.unwrap_or(defaults.multiplier),
            jitter: r.jitter.unwrap_or(defaults.jitter),
        };
        retry.validate().context("invalid [retry] section")?;

        let p = file.pool.unwrap_or_default();
        let defaults = PoolConfig::default();
        let pool = PoolConfig {
            max_size: p.max_size.unwrap_or(defaults.max_size),
            min_size: p.min_size.unwrap_or(defaults.min_size),
            acquire_timeout: millis_or(p.acquire_timeout_ms, defaults.acquire_timeout),
            max_lifetime: millis_or(p.max_lifetime_ms, defaults.max_lifetime),
            idle_timeout: millis_or(p.idle_timeout_ms, defaults.idle_timeout),
            health_check_interval: millis_or(
                p.health_check_interval_ms,
                defaults.health_check_interval,
            ),
            health_check_sample: p.health_check_sample.unwrap_or(defaults.health_check_sample),
            validate_on_get: p.validate_on_get.unwrap_or(defaults.validate_on_get),
        };
        pool.validate().context("invalid [pool] section")?;

        let jq = file.job_queue.unwrap_or_default();
        let defaults = JobQueueConfig::default();
        let job_queue = JobQueueConfig {
            engine: engine(
                defaults.engine,
                jq.workers,
                jq.queue_capacity,
                jq.admission_timeout_ms,
            ),
            result_capacity: jq.result_capacity.unwrap_or(defaults.result_capacity),
            result_timeout: millis_or(jq.result_timeout_ms, defaults.result_timeout),
        };
        job_queue.validate().context("invalid [job_queue] section")?;
        let job_timeout = optional_millis(jq.job_timeout_ms, Some(tracker.request_timeout));

        let d = file.dispatcher.unwrap_or_default();
        let defaults = DispatcherConfig::default();
        let dispatcher = DispatcherConfig {
            engine: engine(
                defaults.engine,
                d.workers,
                d.queue_capacity,
                d.admission_timeout_ms,
            ),
            default_timeout: optional_millis(d.default_timeout_ms, defaults.default_timeout),
        };
        dispatcher
            .engine
            .validate()
            .context("invalid [dispatcher] section")?;

        Ok(Self {
            listen,
            log_format,
            tracker,
            rate_limit,
            retry,
            pool,
            job_queue,
            job_timeout,
            dispatcher,
        })
    }
}

fn engine(
    base: EngineConfig,
    workers: Option<usize>,
    queue_capacity: Option<usize>,
    admission_timeout_ms: Option<u64>,
) -> EngineConfig {
    EngineConfig {
        workers: workers.unwrap_or(base.workers),
        queue_capacity: queue_capacity.unwrap_or(base.queue_capacity),
        admission_timeout: millis_or(admission_timeout_ms, base.admission_timeout),
        ..base
    }
}

fn millis_or(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}

/// `Some(0)` switches the deadline off.
fn optional_millis(value: Option<u64>, default: Option<Duration>) -> Option<Duration> {
    match value {
        Some(0) => None,
        Some(ms) => Some(Duration::from_millis(ms)),
        None => default,
    }
}
