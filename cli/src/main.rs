//! Command-line driver: parses `SOURCE DEST` plus the flags in §6, resolves
//! each side's alias against the config file, and runs the engine to
//! completion.

mod backend_factory;
mod config;
mod http_client;
mod progress;

use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use common::CancelSignal;
use config::{split_alias_path, Config};
use engine::{Engine, EngineConfig};
use tracing::info;

/// Cross-backend file transfer: copies from SOURCE to DEST, where both are
/// given as `ALIAS:/PATH` against the aliases defined in `--conf`.
#[derive(Debug, Parser)]
#[command(name = "ripglass", version, about = "Cross-backend file transfer engine")]
struct Cli {
	/// Source, as `ALIAS:/PATH`.
	source: String,
	/// Destination, as `ALIAS:/PATH`.
	dest: String,

	/// Dispatcher pacing (milliseconds) between submitting consecutive tasks.
	#[arg(long, default_value_t = 100)]
	interval: u64,

	/// Fallback throttle duration (seconds) used when a 429 response names
	/// no `Retry-After`.
	#[arg(long, default_value_t = 60)]
	client_sleep: u64,

	/// Worker pool size.
	#[arg(long, default_value_t = 8)]
	workers: usize,

	/// Upload/download chunk size in bytes.
	#[arg(long, default_value_t = 8 * 1024 * 1024)]
	chunk_size: usize,

	/// Progress-reporting sub-slice size in bytes; 0 means "same as chunk-size".
	#[arg(long, default_value_t = 0)]
	step_size: usize,

	/// Which progress renderer to use; "none" disables progress output.
	#[arg(long, default_value = "default")]
	bar: String,

	/// Path to the JSON configuration file (§6).
	#[arg(long, default_value = "config.json")]
	conf: String,

	/// Server-side copy: only valid when both SOURCE and DEST are Google Drive.
	#[arg(long)]
	copy: bool,

	/// Page size used when listing a remote directory.
	#[arg(long, default_value_t = 1000)]
	max_page_size: u32,
}

fn setup_logging() {
	use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
		.with(tracing_subscriber::fmt::layer().with_thread_ids(true))
		.init();
}

#[tokio::main]
async fn main() {
	if let Err(err) = run().await {
		eprintln!("{} {err:?}", "error:".red().bold());
		std::process::exit(1);
	}
}

async fn run() -> anyhow::Result<()> {
	let _ = dotenv::dotenv();
	setup_logging();
	let cli = Cli::parse();

	let config = Config::load(&cli.conf).await?;
	let (source_alias_name, source_path) = split_alias_path(&cli.source)?;
	let (dest_alias_name, dest_path) = split_alias_path(&cli.dest)?;
	let source_alias = config.alias(source_alias_name)?;
	let dest_alias = config.alias(dest_alias_name)?;

	let source = backend_factory::build_source(source_alias, source_path, cli.max_page_size, cli.copy).await?;
	let destination =
		backend_factory::build_destination(dest_alias, dest_path, cli.chunk_size, cli.step_size, cli.client_sleep)
			.await?;

	// §8 scenario 6: refuse --copy before any task runs unless the
	// destination can actually service a server-side copy from this source.
	if cli.copy && !destination.supports_copy_from(&source_alias.transfer) {
		anyhow::bail!("--copy is only supported when both SOURCE and DEST are Google Drive ('gd') configs");
	}

	let progress = progress::sink_for(&cli.bar);
	let engine_config = EngineConfig {
		workers: cli.workers,
		interval: Duration::from_millis(cli.interval),
		chunk_size: cli.chunk_size,
		..EngineConfig::default()
	};
	let cancel = CancelSignal::default();

	let cancel_on_ctrl_c = cancel.clone();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			cancel_on_ctrl_c.cancel();
		}
	});

	let engine = Engine::new(destination, progress, engine_config, cancel);
	let summary = engine.run(source).await;

	info!(
		success = summary.success,
		exists = summary.exists,
		dead_lettered = summary.dead_lettered,
		enumeration_errors = summary.enumeration_errors,
		"transfer run finished"
	);
	println!(
		"{} {} succeeded, {} already existed, {} dead-lettered, {} enumeration errors",
		"summary:".bold(),
		summary.success,
		summary.exists,
		summary.dead_lettered,
		summary.enumeration_errors,
	);

	if summary.dead_lettered > 0 {
		anyhow::bail!("{} task(s) were dead-lettered", summary.dead_lettered);
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use clap::CommandFactory;

	use super::Cli;

	#[test]
	fn cli_definition_is_valid() {
		Cli::command().debug_assert();
	}
}
