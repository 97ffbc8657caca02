mod output;

use clap::Parser;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use thiz_supervisor::{load_config, load_config_file, Supervisor, SupervisorHandle, WatchConfig};

#[derive(Debug, Parser)]
#[command(name = "thiz-dev", version, about = "Run a thiz dev server and restart it when sources or .env files change")]
struct Cli {
	/// Config file [default: ./thiz.toml when present]
	#[arg(long, short)]
	config: Option<PathBuf>,
	/// Server entry point
	#[arg(long, short)]
	entry: Option<PathBuf>,
	/// Program that runs the entry point [default: node]
	#[arg(long)]
	runner: Option<String>,
	/// Argument passed to the runner before the entry (repeatable)
	#[arg(long = "runner-arg", allow_hyphen_values = true)]
	runner_args: Vec<String>,
	/// Directory to watch (repeatable) [default: src]
	#[arg(long, short)]
	watch: Vec<PathBuf>,
	/// Glob to ignore (repeatable)
	#[arg(long, short)]
	ignore: Vec<String>,
	/// Extra environment variable for the server (repeatable)
	#[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_key_value)]
	env: Vec<(String, String)>,
	/// Debounce in milliseconds
	#[arg(long)]
	debounce: Option<u64>,
	/// Exits sooner than this many milliseconds count as crashes
	#[arg(long)]
	startup_timeout: Option<u64>,
	#[arg(long, short)]
	verbose: bool,
	/// Do not restart when .env files change
	#[arg(long)]
	no_env_reload: bool,
	/// Print status as JSON lines
	#[arg(long)]
	json: bool,
	/// Arguments passed to the server after the entry
	#[arg(last = true)]
	args: Vec<String>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
	match s.split_once('=') {
		Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
		_ => Err(format!("expected KEY=VALUE, got '{}'", s)),
	}
}

fn build_config(cli: &Cli) -> thiz_supervisor::Result<WatchConfig> {
	let root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
	let mut config = match &cli.config {
		Some(path) => {
			let mut config = load_config_file(path)?;
			config.resolve_root(&root);
			config
		}
		None => load_config(&root),
	};

	if let Some(entry) = &cli.entry {
		config.entry = entry.clone();
	}
	if let Some(runner) = &cli.runner {
		config.runner = runner.clone();
	}
	if !cli.runner_args.is_empty() {
		config.runner_args = cli.runner_args.clone();
	}
	if !cli.watch.is_empty() {
		config.watch = cli.watch.clone();
	}
	config.ignore.extend(cli.ignore.iter().cloned());
	config.env.extend(cli.env.iter().cloned());
	if let Some(ms) = cli.debounce {
		config.debounce_ms = ms;
	}
	if let Some(ms) = cli.startup_timeout {
		config.startup_timeout_ms = ms;
	}
	if !cli.args.is_empty() {
		config.args = cli.args.clone();
	}
	config.verbose |= cli.verbose;
	if cli.no_env_reload {
		config.restart_on_env_change = false;
	}
	Ok(config)
}

#[tokio::main]
async fn main() {
	let cli = Cli::parse();

	let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::WARN };
	tracing_subscriber::fmt()
		.with_max_level(level)
		.with_writer(std::io::stderr)
		.init();

	let config = match build_config(&cli) {
		Ok(c) => c,
		Err(e) => {
			eprintln!("{} {}", "error:".red().bold(), e);
			std::process::exit(1);
		}
	};

	let renderer = output::Renderer::new(cli.json, config.verbose);
	let sup = Supervisor::new(config);
	let printer = tokio::spawn(renderer.run(sup.subscribe()));
	tokio::spawn(forward_signals(sup.handle(), renderer));

	let _watchers = match sup.watch() {
		Ok(w) => w,
		Err(e) => {
			eprintln!("{} {}", "error:".red().bold(), e);
			std::process::exit(1);
		}
	};

	sup.run().await;
	let _ = printer.await;
}

async fn forward_signals(handle: SupervisorHandle, renderer: output::Renderer) {
	use tokio::signal::unix::{signal, SignalKind};

	let (mut interrupt, mut terminate) = match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
		(Ok(i), Ok(t)) => (i, t),
		(Err(e), _) | (_, Err(e)) => {
			tracing::error!("failed to install signal handlers: {}", e);
			return;
		}
	};

	// First signal shuts down gracefully, any further one kills the child outright.
	let mut graceful = true;
	loop {
		let name = tokio::select! {
			_ = interrupt.recv() => "SIGINT",
			_ = terminate.recv() => "SIGTERM",
		};
		renderer.signal_received(name, graceful);
		let delivered = if graceful { handle.shutdown() } else { handle.force_shutdown() };
		if !delivered {
			return;
		}
		graceful = false;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn key_value_parsing() {
		assert_eq!(parse_key_value("PORT=4000"), Ok(("PORT".into(), "4000".into())));
		assert_eq!(parse_key_value("URL=a=b"), Ok(("URL".into(), "a=b".into())));
		assert_eq!(parse_key_value("EMPTY="), Ok(("EMPTY".into(), "".into())));
		assert!(parse_key_value("=x").is_err());
		assert!(parse_key_value("PORT").is_err());
	}

	#[test]
	fn flags_override_config() {
		let cli = Cli::parse_from([
			"thiz-dev",
			"--config",
			"/nonexistent/thiz.toml",
		]);
		assert!(build_config(&cli).is_err());

		let cli = Cli::parse_from([
			"thiz-dev",
			"--entry",
			"app.js",
			"--watch",
			"lib",
			"--env",
			"PORT=4000",
			"--debounce",
			"300",
			"--no-env-reload",
			"--",
			"--port",
			"4000",
		]);
		let config = build_config(&cli).unwrap();
		assert_eq!(config.entry, PathBuf::from("app.js"));
		assert_eq!(config.watch, vec![PathBuf::from("lib")]);
		assert_eq!(config.env.get("PORT").map(String::as_str), Some("4000"));
		assert_eq!(config.debounce_ms, 300);
		assert!(!config.restart_on_env_change);
		assert_eq!(config.args, vec!["--port", "4000"]);
	}
}
