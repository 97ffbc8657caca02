//! `.env` file loading.
//!
//! Files are read lowest priority first so that higher priority files win.
//! Line syntax (quotes, escapes, `export`) is whatever `dotenvy` accepts.

use std::collections::HashMap;
use std::path::Path;

/// Env files in priority order, highest first.
pub const ENV_FILES: [&str; 3] = [".env.local", ".env.development", ".env"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvLoad {
	pub vars: HashMap<String, String>,
	/// Files that were found, highest priority first.
	pub files: Vec<String>,
}

/// True for anything shaped like an env file (`.env`, `.env.local`, `.env.test`, ...).
pub fn is_env_file_name(name: &str) -> bool {
	name == ".env" || name.starts_with(".env.")
}

/// True only for the files the env watcher reloads.
pub fn is_watched_env_file(name: &str) -> bool {
	ENV_FILES.contains(&name)
}

pub fn load_env_files(root: &Path) -> EnvLoad {
	let mut load = EnvLoad::default();
	for file in ENV_FILES.iter().rev() {
		let path = root.join(file);
		if !path.is_file() {
			continue;
		}
		load.vars.extend(read_env_file(&path));
		load.files.push(file.to_string());
	}
	load.files.reverse();
	load
}

/// Reads one env file. Malformed lines are logged and skipped.
pub fn read_env_file(path: &Path) -> HashMap<String, String> {
	let mut vars = HashMap::new();
	let iter = match dotenvy::from_path_iter(path) {
		Ok(iter) => iter,
		Err(e) => {
			tracing::error!("failed to read {}: {}", path.display(), e);
			return vars;
		}
	};
	for item in iter {
		match item {
			Ok((key, value)) => {
				vars.insert(key, value);
			}
			Err(e) => tracing::warn!("skipping bad entry in {}: {}", path.display(), e),
		}
	}
	vars
}
