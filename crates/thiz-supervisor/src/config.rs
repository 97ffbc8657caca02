use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

pub const CONFIG_FILE: &str = "thiz.toml";
/// Upper bound for configured delays, so deadline arithmetic cannot overflow.
pub const MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

// ── thiz.toml ────────────────────────────────────────────────────────────────

/// Everything the supervisor needs to know about one watched target.
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
	/// Project root. Entry, watch paths and env files resolve against it.
	#[serde(default = "default_root")]
	pub root: PathBuf,
	#[serde(default = "default_entry")]
	pub entry: PathBuf,
	/// Program that runs the entry point.
	#[serde(default = "default_runner")]
	pub runner: String,
	/// Arguments placed between the runner and the entry (e.g. `--enable-source-maps`).
	#[serde(default)]
	pub runner_args: Vec<String>,
	/// Arguments placed after the entry.
	#[serde(default)]
	pub args: Vec<String>,
	#[serde(default = "default_watch")]
	pub watch: Vec<PathBuf>,
	#[serde(default = "default_ignore")]
	pub ignore: Vec<String>,
	#[serde(default)]
	pub env: HashMap<String, String>,
	#[serde(default = "default_debounce_ms")]
	pub debounce_ms: u64,
	#[serde(default = "default_startup_timeout_ms")]
	pub startup_timeout_ms: u64,
	#[serde(default)]
	pub verbose: bool,
	#[serde(default = "default_true")]
	pub restart_on_env_change: bool,
}

impl Default for WatchConfig {
	fn default() -> Self {
		Self {
			root: default_root(),
			entry: default_entry(),
			runner: default_runner(),
			runner_args: Vec::new(),
			args: Vec::new(),
			watch: default_watch(),
			ignore: default_ignore(),
			env: HashMap::new(),
			debounce_ms: default_debounce_ms(),
			startup_timeout_ms: default_startup_timeout_ms(),
			verbose: false,
			restart_on_env_change: true,
		}
	}
}

fn default_root() -> PathBuf { PathBuf::from(".") }
fn default_entry() -> PathBuf { PathBuf::from("src/server.js") }
fn default_runner() -> String { "node".into() }
fn default_watch() -> Vec<PathBuf> { vec![PathBuf::from("src")] }
pub fn default_ignore() -> Vec<String> {
	vec![
		"**/node_modules/**".into(),
		"**/.git/**".into(),
		"**/.cache/**".into(),
	]
}
fn default_debounce_ms() -> u64 { 150 }
fn default_startup_timeout_ms() -> u64 { 3000 }
fn default_true() -> bool { true }

impl WatchConfig {
	pub fn debounce(&self) -> Duration {
		Duration::from_millis(self.debounce_ms).min(MAX_DELAY)
	}

	pub fn startup_timeout(&self) -> Duration {
		Duration::from_millis(self.startup_timeout_ms).min(MAX_DELAY)
	}

	pub fn entry_path(&self) -> PathBuf {
		self.root.join(&self.entry)
	}

	pub fn watch_paths(&self) -> Vec<PathBuf> {
		self.watch.iter().map(|p| self.root.join(p)).collect()
	}

	/// Anchors a relative `root` (as written in thiz.toml) at `base`.
	pub fn resolve_root(&mut self, base: &Path) {
		if self.root == default_root() {
			self.root = base.to_path_buf();
		} else if self.root.is_relative() {
			self.root = base.join(&self.root);
		}
	}
}

/// Loads `<root>/thiz.toml`, falling back to defaults when it is missing or broken.
pub fn load_config(root: &Path) -> WatchConfig {
	let path = root.join(CONFIG_FILE);
	let mut config = if path.exists() {
		match load_config_file(&path) {
			Ok(config) => config,
			Err(e) => {
				tracing::warn!("{}; using defaults", e);
				WatchConfig::default()
			}
		}
	} else {
		WatchConfig::default()
	};
	config.resolve_root(root);
	config
}

/// Loads an explicitly requested config file. Unlike [`load_config`], failures are errors.
pub fn load_config_file(path: &Path) -> Result<WatchConfig> {
	let content = std::fs::read_to_string(path).map_err(|source| Error::ReadConfig {
		path: path.to_path_buf(),
		source,
	})?;
	toml::from_str(&content).map_err(|source| Error::ParseConfig {
		path: path.to_path_buf(),
		source,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_dev_server_layout() {
		let config = WatchConfig::default();
		assert_eq!(config.entry, PathBuf::from("src/server.js"));
		assert_eq!(config.runner, "node");
		assert_eq!(config.watch, vec![PathBuf::from("src")]);
		assert_eq!(config.debounce(), Duration::from_millis(150));
		assert_eq!(config.startup_timeout(), Duration::from_millis(3000));
		assert!(config.restart_on_env_change);
		assert!(!config.verbose);
	}

	#[test]
	fn partial_toml_keeps_defaults() {
		let config: WatchConfig = toml::from_str(
			r#"
entry = "app/main.js"
debounce_ms = 300
runner_args = ["--enable-source-maps"]

[env]
PORT = "4000"
"#,
		)
		.unwrap();
		assert_eq!(config.entry, PathBuf::from("app/main.js"));
		assert_eq!(config.debounce_ms, 300);
		assert_eq!(config.runner_args, vec!["--enable-source-maps"]);
		assert_eq!(config.env.get("PORT").map(String::as_str), Some("4000"));
		assert_eq!(config.startup_timeout_ms, 3000);
		assert_eq!(config.ignore, default_ignore());
	}

	#[test]
	fn delays_are_capped() {
		let config = WatchConfig {
			debounce_ms: u64::MAX,
			startup_timeout_ms: u64::MAX,
			..WatchConfig::default()
		};
		assert_eq!(config.debounce(), MAX_DELAY);
		assert_eq!(config.startup_timeout(), MAX_DELAY);
	}

	#[test]
	fn paths_resolve_against_root() {
		let config = WatchConfig {
			root: PathBuf::from("/srv/app"),
			watch: vec!["src".into(), "lib".into()],
			..WatchConfig::default()
		};
		assert_eq!(config.entry_path(), PathBuf::from("/srv/app/src/server.js"));
		assert_eq!(
			config.watch_paths(),
			vec![PathBuf::from("/srv/app/src"), PathBuf::from("/srv/app/lib")]
		);
	}

	#[test]
	fn relative_root_is_anchored() {
		let mut config = WatchConfig { root: "web".into(), ..WatchConfig::default() };
		config.resolve_root(Path::new("/srv"));
		assert_eq!(config.root, PathBuf::from("/srv/web"));

		let mut config = WatchConfig::default();
		config.resolve_root(Path::new("/srv"));
		assert_eq!(config.root, PathBuf::from("/srv"));

		let mut config = WatchConfig { root: "/opt/app".into(), ..WatchConfig::default() };
		config.resolve_root(Path::new("/srv"));
		assert_eq!(config.root, PathBuf::from("/opt/app"));
	}

	#[test]
	fn missing_config_file_is_an_error() {
		let err = load_config_file(Path::new("/nonexistent/thiz.toml")).unwrap_err();
		assert!(matches!(err, Error::ReadConfig { .. }));
	}

	#[test]
	fn load_config_without_file_uses_given_root() {
		let root = std::env::temp_dir().join("thiz-config-no-file");
		let config = load_config(&root);
		assert_eq!(config.root, root);
		assert_eq!(config.entry, PathBuf::from("src/server.js"));
	}
}
