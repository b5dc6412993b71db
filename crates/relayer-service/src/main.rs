use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relayer_account::{create_account, AccountService};
use relayer_config::{Config, ConfigLoader};
use relayer_core::RelayerBuilder;
use relayer_delivery::create_delivery;
use relayer_discovery::create_discovery;
use relayer_evaluation::create_evaluator;
use relayer_storage::{create_storage, StorageService};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod rate_limit;

#[derive(Parser)]
#[command(name = "encrypted-order-relayer")]
#[command(about = "Relays encrypted swap orders to homomorphic evaluation and settles the results", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	/// Optional TOML configuration file; environment variables override it
	#[arg(short, long, value_name = "FILE", env = "RELAYER_CONFIG")]
	config: Option<PathBuf>,

	#[arg(long, env = "RELAYER_LOG_LEVEL", default_value = "info")]
	log_level: String,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the relayer
	Start,
	/// Validate the configuration and exit
	Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	setup_tracing(&cli.log_level);

	match cli.command {
		Some(Commands::Start) | None => start_relayer(cli).await,
		Some(Commands::Validate) => validate_config(cli).await,
	}
}

async fn load_config(cli: &Cli) -> Result<Config> {
	if let Some(path) = &cli.config {
		info!("Loading configuration from: {:?}", path);
	}

	ConfigLoader::new()
		.with_optional_file(cli.config.as_ref())
		.load()
		.await
		.context("Failed to load configuration")
}

async fn start_relayer(cli: Cli) -> Result<()> {
	let config = load_config(&cli).await?;
	info!(name = %config.relayer.name, "Starting relayer");

	let storage = Arc::new(StorageService::new(create_storage(&config.storage)));

	let account = AccountService::new(
		create_account(&config.account).context("Failed to load relayer account")?,
	);
	let address = account
		.get_address()
		.await
		.context("Failed to derive relayer address")?;
	info!(%address, "Relayer account loaded");

	let delivery =
		create_delivery(&config.chain, &account).context("Failed to create chain delivery")?;
	let evaluator =
		create_evaluator(&config.evaluator).context("Failed to create evaluation client")?;

	let engine = RelayerBuilder::new(config.clone())
		.with_storage(storage)
		.with_evaluator(evaluator)
		.with_delivery(delivery)
		.with_discovery_factory(create_discovery)
		.build()
		.context("Failed to build relayer")?;
	let engine = Arc::new(engine);

	engine.start().await.context("Failed to start relayer")?;

	let addr: SocketAddr = format!("{}:{}", config.health.host, config.health.port)
		.parse()
		.context("Invalid health server address")?;
	let (server_stop, server_stopped) = oneshot::channel::<()>();
	let mut server = tokio::spawn(api::serve(
		addr,
		engine.clone(),
		config.health.requests_per_second,
		async move {
			let _ = server_stopped.await;
		},
	));

	info!("Relayer running");

	let early_exit = tokio::select! {
		_ = shutdown_signal() => {
			info!("Shutdown signal received, stopping services...");
			None
		}
		result = &mut server => Some(result),
	};

	engine.shutdown().await;

	let server_result = match early_exit {
		Some(result) => result,
		None => {
			let _ = server_stop.send(());
			server.await
		}
	};
	server_result
		.context("Health server task failed")?
		.context("Health server failed")?;

	info!("Relayer stopped");
	Ok(())
}

async fn validate_config(cli: Cli) -> Result<()> {
	let config = load_config(&cli).await?;

	let account = AccountService::new(
		create_account(&config.account).context("Invalid relayer account")?,
	);
	let address = account.get_address().await?;

	info!("Configuration is valid");
	info!("  Relayer: {} ({})", config.relayer.name, address);
	if let Some(contract) = config.chain.contract_address {
		info!("  Contract: {}", contract);
	}
	info!(
		"  Worker: batch of {} every {}ms, {} attempts",
		config.worker.batch_size, config.worker.tick_interval_ms, config.worker.max_attempts
	);
	info!("  Storage: {:?} at {}", config.storage.backend, config.storage.path.display());
	if !config.evaluator.is_configured() {
		warn!("  Evaluator: not configured, orders will fail evaluation");
	}

	Ok(())
}

fn setup_tracing(log_level: &str) {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.init();
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = signal::ctrl_c().await {
			error!(error = %e, "Failed to listen for Ctrl+C");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut stream) => {
				stream.recv().await;
			}
			Err(e) => {
				error!(error = %e, "Failed to listen for SIGTERM");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
