use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;

use crate::config::WatchConfig;
use crate::env::{is_watched_env_file, load_env_files};
use crate::error::{Error, Result};
use crate::filter::PathFilter;
use crate::supervisor::{Message, SupervisorHandle};
use crate::types::ChangeKind;

/// Keeps the filesystem watchers alive. Dropping it stops all notifications.
pub struct Watchers {
	_source: RecommendedWatcher,
	_env: Option<RecommendedWatcher>,
}

pub fn start_watchers(config: &WatchConfig, handle: SupervisorHandle) -> Result<Watchers> {
	let source = watch_sources(config, handle.clone())?;
	let env = if config.restart_on_env_change {
		Some(watch_env_files(&config.root, handle)?)
	} else {
		None
	};
	Ok(Watchers { _source: source, _env: env })
}

/// Recursive watch over the configured source roots.
pub fn watch_sources(config: &WatchConfig, handle: SupervisorHandle) -> Result<RecommendedWatcher> {
	let filter = PathFilter::new(&config.root, &config.ignore)?;

	let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
		Ok(event) => {
			let Some(kind) = change_kind(&event.kind) else {
				return;
			};
			for path in &event.paths {
				if let Some(relative) = filter.accept(path) {
					handle.send(Message::SourceChanged { kind, path: relative });
				}
			}
		}
		Err(e) => {
			handle.send(Message::WatcherFailed {
				watcher: "source".into(),
				message: e.to_string(),
			});
		}
	})?;

	for path in config.watch_paths() {
		if !path.exists() {
			tracing::warn!("watch path {} does not exist, skipping", path.display());
			continue;
		}
		let path = path.canonicalize().unwrap_or(path);
		watcher
			.watch(&path, RecursiveMode::Recursive)
			.map_err(|source| Error::Watch { path: path.clone(), source })?;
		tracing::debug!("watching {}", path.display());
	}
	Ok(watcher)
}

/// Watches the project root for the env files and reloads them on change.
pub fn watch_env_files(root: &Path, handle: SupervisorHandle) -> Result<RecommendedWatcher> {
	let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
	let reload_root = root.clone();

	let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
		Ok(event) => {
			let Some(kind) = change_kind(&event.kind) else {
				return;
			};
			for path in &event.paths {
				let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
					continue;
				};
				if !is_watched_env_file(name) {
					continue;
				}
				let message = match kind {
					ChangeKind::Remove => Message::EnvRemoved { file: name.to_string() },
					ChangeKind::Add | ChangeKind::Change => Message::EnvChanged {
						file: name.to_string(),
						created: kind == ChangeKind::Add,
						vars: load_env_files(&reload_root).vars,
					},
				};
				handle.send(message);
			}
		}
		Err(e) => {
			handle.send(Message::WatcherFailed {
				watcher: "env".into(),
				message: e.to_string(),
			});
		}
	})?;

	watcher
		.watch(&root, RecursiveMode::NonRecursive)
		.map_err(|source| Error::Watch { path: root.clone(), source })?;
	Ok(watcher)
}

fn change_kind(kind: &EventKind) -> Option<ChangeKind> {
	match kind {
		EventKind::Create(_) => Some(ChangeKind::Add),
		EventKind::Remove(_) => Some(ChangeKind::Remove),
		EventKind::Modify(ModifyKind::Metadata(_)) => None,
		EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(ChangeKind::Remove),
		EventKind::Modify(_) => Some(ChangeKind::Change),
		EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
	}
}
