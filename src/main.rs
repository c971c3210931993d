use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tower::limit::RequestBodyLimitLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cluster_gateway_console::cli::{Cli, Commands, ServeArgs, ValidateConfigArgs};
use cluster_gateway_console::config::load_seed_file;
use cluster_gateway_console::registry::credentials::CredentialStore;
use cluster_gateway_console::registry::health::{HealthChecker, HealthCheckerConfig};
use cluster_gateway_console::registry::pool::ClientPool;
use cluster_gateway_console::registry::store::RegistrationStore;
use cluster_gateway_console::registry::{create_registry_router, RegistryState};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Some(ref env_file) = cli.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            eprintln!("failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    } else {
        let _ = dotenvy::dotenv();
    }

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let result = match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::ValidateConfig(args) => run_validate_config(args).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
}

async fn run_serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(RegistrationStore::new());
    let credentials = Arc::new(CredentialStore::new());
    let pool = Arc::new(ClientPool::new(store.clone(), credentials.clone()));

    if let Some(ref seed_path) = args.seed_file {
        info!("loading registration seed file {}", seed_path.display());
        let seed = load_seed_file(seed_path).await?;
        for entry in seed.clusters {
            let name = entry.registration.name.clone();
            if let (false, Some(source)) = (entry.registration.is_local, &entry.credential_source) {
                let cred_name = entry
                    .registration
                    .credential_ref
                    .clone()
                    .unwrap_or_else(|| format!("{}-seed-cred", name));
                credentials.load(&cred_name, source).await?;
            }
            store.create(entry.registration)?;
            info!("seeded registration '{}'", name);
        }
    }

    pool.sync().await;

    let state = RegistryState::with_config(
        store.clone(),
        credentials.clone(),
        pool.clone(),
        args.heartbeat_token.clone(),
        cluster_gateway_console::registry::aggregator::AggregatorConfig {
            max_concurrent_queries: args.max_concurrent_queries,
            ..Default::default()
        },
    );

    let health_checker = Arc::new(HealthChecker::new(
        store.clone(),
        pool.clone(),
        HealthCheckerConfig {
            tick_interval: Duration::from_secs(args.health_tick_seconds),
            max_concurrent_checks: args.max_concurrent_health_checks,
            ..HealthCheckerConfig::default()
        },
    ));

    let shutdown = tokio_util::sync::CancellationToken::new();

    let health_cancel = shutdown.clone();
    let health_task = {
        let health_checker = health_checker.clone();
        tokio::spawn(async move { health_checker.run(health_cancel).await })
    };

    let sync_cancel = shutdown.clone();
    let sync_pool = pool.clone();
    let sync_interval = Duration::from_secs(args.pool_sync_seconds);
    let sync_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sync_interval);
        loop {
            tokio::select! {
                _ = sync_cancel.cancelled() => return,
                _ = ticker.tick() => sync_pool.sync().await,
            }
        }
    });

    let cors = build_cors_layer(args.cors_origins.as_deref(), args.dev);

    let app = create_registry_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(args.max_body_bytes))
        .layer(cors);

    let addr = format!("{}:{}", args.bind_addr, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("control plane listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    let _ = health_task.await;
    let _ = sync_task.await;

    Ok(())
}

async fn run_validate_config(args: ValidateConfigArgs) -> Result<(), Box<dyn std::error::Error>> {
    match load_seed_file(&args.seed_file).await {
        Ok(seed) => {
            println!("seed file is valid: {} cluster(s) declared", seed.clusters.len());
            for entry in &seed.clusters {
                println!(
                    "  - {} (isLocal={})",
                    entry.registration.name, entry.registration.is_local
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("seed file is invalid: {}", e);
            process::exit(1);
        }
    }
}

/// Build the CORS layer from a comma-separated origin list. `*` is only
/// honored in dev mode; in production an explicit `*` is downgraded to "no
/// origins allowed" with a warning.
fn build_cors_layer(origins: Option<&str>, dev: bool) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::HeaderName::from_static("x-cluster")]);

    match origins {
        Some("*") if dev => layer.allow_origin(tower_http::cors::Any),
        Some("*") => {
            warn!("CORS_ORIGINS=* ignored outside --dev; no cross-origin requests will be allowed");
            layer
        }
        Some(list) => {
            let parsed: Vec<axum::http::HeaderValue> = list
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            layer.allow_origin(parsed)
        }
        None => layer,
    }
}

async fn shutdown_signal(cancel: tokio_util::sync::CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    cancel.cancel();
}
