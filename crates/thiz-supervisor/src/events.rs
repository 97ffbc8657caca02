use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::{ChangeKind, ExitClass, ExitStatusInfo};

const EVENT_CAPACITY: usize = 256;

/// Status updates published by the supervisor.
///
/// The CLI renders these as console lines; tests assert on them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SupervisorEvent {
	Watching { paths: Vec<String> },
	EnvLoaded { files: Vec<String> },
	Spawning { command: String },
	Started { pid: u32, generation: u64 },
	SpawnSkipped,
	SpawnFailed { message: String, crashes: u32 },
	Changed { kind: ChangeKind, path: String },
	Restarting { reason: String },
	RestartQueued { reason: String },
	Exited {
		pid: u32,
		generation: u64,
		status: ExitStatusInfo,
		#[serde(flatten)]
		class: ExitClass,
	},
	CrashLoop { crashes: u32, debounce_ms: u64 },
	Stable { pid: u32 },
	EnvReloaded { file: String, created: bool },
	EnvFileRemoved { file: String },
	WatcherError { watcher: String, message: String },
	ShuttingDown,
	Stopped,
}

impl SupervisorEvent {
	pub fn to_json(&self) -> String {
		serde_json::to_string(self).unwrap_or_else(|_| r#"{"event":"error"}"#.to_string())
	}
}

/// Fan-out of [`SupervisorEvent`]s to any number of subscribers.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<SupervisorEvent>,
}

impl EventBus {
	pub fn new() -> Self {
		let (sender, _) = broadcast::channel(EVENT_CAPACITY);
		Self { sender }
	}

	pub fn emit(&self, event: SupervisorEvent) {
		tracing::trace!(?event, "supervisor event");
		let _ = self.sender.send(event);
	}

	pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
		self.sender.subscribe()
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new()
	}
}
