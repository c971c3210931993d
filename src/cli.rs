//! Command-line entry point
//!
//! One `clap` derive tree with two subcommands: `-v`/`-vv`/`-vvv` stack to pick
//! a verbosity level, and every `serve` flag is also settable via `clap(env)`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "cluster-gateway-console", version, about)]
pub struct Cli {
    /// Increase logging verbosity: -v info, -vv debug, -vvv trace.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Load environment variables from this file before anything else.
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Boot the control plane: wire the registry components and serve HTTP.
    Serve(ServeArgs),
    /// Load and validate a registration-seed file without serving.
    ValidateConfig(ValidateConfigArgs),
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to bind the HTTP server to.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    pub bind_addr: String,

    /// Port to bind the HTTP server to.
    #[arg(long, env = "PORT", default_value_t = 8443)]
    pub port: u16,

    /// Comma-separated list of allowed CORS origins. `*` is only honored
    /// when `--dev` is also passed.
    #[arg(long, env = "CORS_ORIGINS")]
    pub cors_origins: Option<String>,

    /// Permit the `*` CORS origin; refuse it otherwise.
    #[arg(long, env = "DEV_MODE", default_value_t = false)]
    pub dev: bool,

    /// Shared token agents must present in the `x-heartbeat-token` header.
    /// Omit to accept any heartbeat.
    #[arg(long, env = "HEARTBEAT_TOKEN")]
    pub heartbeat_token: Option<String>,

    /// Registration-seed file to load at startup (YAML or JSON).
    #[arg(long, env = "SEED_FILE")]
    pub seed_file: Option<PathBuf>,

    /// Health-check tick interval, in seconds.
    #[arg(long, env = "HEALTH_TICK_SECONDS", default_value_t = 30)]
    pub health_tick_seconds: u64,

    /// Interval between periodic `Pool.Sync()` safety-net passes, in seconds.
    #[arg(long, env = "POOL_SYNC_SECONDS", default_value_t = 60)]
    pub pool_sync_seconds: u64,

    /// Maximum number of clusters probed concurrently by the health checker.
    #[arg(long, env = "MAX_CONCURRENT_HEALTH_CHECKS", default_value_t = 10)]
    pub max_concurrent_health_checks: usize,

    /// Maximum number of clusters queried concurrently by the global aggregator.
    #[arg(long, env = "MAX_CONCURRENT_QUERIES", default_value_t = 16)]
    pub max_concurrent_queries: usize,

    /// Maximum accepted JSON request body size, in bytes (heartbeats have
    /// their own smaller, separately-enforced limit).
    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = 1024 * 1024)]
    pub max_body_bytes: usize,
}

#[derive(Parser, Debug)]
pub struct ValidateConfigArgs {
    /// Registration-seed file to validate.
    pub seed_file: PathBuf,
}
