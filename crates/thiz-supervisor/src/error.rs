use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures that can stop the supervisor from being set up.
///
/// Everything that goes wrong once the supervisor is running (crashes, spawn
/// failures, watcher hiccups) is reported as a [`SupervisorEvent`](crate::SupervisorEvent)
/// instead.
#[derive(Error, Debug)]
pub enum Error {
	#[error("failed to read {path}: {source}")]
	ReadConfig {
		path: PathBuf,
		source: std::io::Error,
	},

	#[error("failed to parse {path}: {source}")]
	ParseConfig {
		path: PathBuf,
		source: toml::de::Error,
	},

	#[error("invalid ignore pattern '{pattern}': {source}")]
	Glob {
		pattern: String,
		source: globset::Error,
	},

	#[error("cannot watch {path}: {source}")]
	Watch {
		path: PathBuf,
		source: notify::Error,
	},

	#[error("watcher setup failed: {0}")]
	Notify(#[from] notify::Error),
}
