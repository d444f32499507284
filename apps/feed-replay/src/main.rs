use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use od_live_sync::SyncConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod replay;

use replay::{load_script, load_snapshot, parse_record_id, Replay, Report};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
	Human,
	Json,
}

/// Replays a recorded change feed against a snapshot and prints the resulting mirror.
#[derive(Parser, Debug)]
#[command(name = "od-feed-replay")]
struct Cli {
	/// Sync configuration (TOML), defaults apply when omitted
	#[arg(short, long, env = "OD_SYNC_CONFIG")]
	config: Option<PathBuf>,

	/// JSON array with the rows the persistence service starts with
	#[arg(short, long)]
	snapshot: Option<PathBuf>,

	/// Feed messages to replay, one JSON object per line
	script: PathBuf,

	/// Hold these records under edit for the whole replay
	#[arg(long = "editing", value_name = "ID")]
	editing: Vec<String>,

	/// How long to wait on the engine before giving up, in milliseconds
	#[arg(long, default_value_t = 10_000)]
	wait_ms: u64,

	/// Output format
	#[arg(long, value_enum, default_value = "human")]
	format: OutputFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.with_writer(std::io::stderr)
		.init();

	let cli = Cli::parse();

	let config = match &cli.config {
		Some(path) => SyncConfig::load(path)
			.with_context(|| format!("failed to load config <path='{}'>", path.display()))?,
		None => SyncConfig::default(),
	};

	let snapshot = match &cli.snapshot {
		Some(path) => load_snapshot(path, &config.topic.primary_key)?,
		None => Vec::new(),
	};
	let script = load_script(&cli.script)?;

	info!(
		table = %config.topic.table,
		rows = snapshot.len(),
		messages = script.len(),
		"Replaying change feed"
	);

	let report = Replay {
		config,
		snapshot,
		script,
		editing: cli.editing.iter().map(String::as_str).map(parse_record_id).collect(),
		wait: Duration::from_millis(cli.wait_ms),
	}
	.run()
	.await?;

	match cli.format {
		OutputFormat::Human => print_human(&report)?,
		OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
	}

	Ok(())
}

fn print_human(report: &Report) -> Result<()> {
	println!("Connection: {:?}", report.state);
	println!(
		"Events: {} dispatched ({} inserts, {} updates, {} deletes), {} discarded",
		report.stats.dispatched(),
		report.stats.inserts,
		report.stats.updates,
		report.stats.deletes,
		report.stats.discarded(),
	);

	if report.undelivered > 0 {
		println!("Undelivered messages: {}", report.undelivered);
	}

	if report.records.is_empty() {
		println!("No records");
	}

	for record in &report.records {
		let marker = if report.editing.contains(&record.id) {
			"*"
		} else {
			"-"
		};
		println!(
			"{marker} {} {}",
			record.id,
			serde_json::to_string(&record.fields)?
		);
	}

	Ok(())
}
