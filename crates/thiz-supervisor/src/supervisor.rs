use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::coalescer::ChangeCoalescer;
use crate::config::WatchConfig;
use crate::env::load_env_files;
use crate::error::Result;
use crate::events::{EventBus, SupervisorEvent};
use crate::process::{
	CrashCounter, ExitNotice, KillOutcome, ProcessController, SpawnOutcome, CRASH_LOOP_THRESHOLD,
};
use crate::types::{ChangeKind, ExitClass, TerminationReason};
use crate::watch::{self, Watchers};

/// Pause between the old child going away and the new one starting, so ports get released.
pub const SETTLE_DELAY: Duration = Duration::from_millis(150);
/// Delay before running a restart that was queued while another one was in flight.
pub const PENDING_RESTART_DELAY: Duration = Duration::from_millis(100);

/// Input to the supervisor loop.
#[derive(Debug)]
pub enum Message {
	/// A source file changed. `path` is already filtered and root-relative.
	SourceChanged { kind: ChangeKind, path: PathBuf },
	EnvChanged {
		file: String,
		created: bool,
		vars: HashMap<String, String>,
	},
	EnvRemoved { file: String },
	Restart { reason: String },
	WatcherFailed { watcher: String, message: String },
	Shutdown,
	/// Shutdown that SIGKILLs the child right away.
	ForceShutdown,
}

/// Cheap, cloneable way to talk to a running [`Supervisor`].
#[derive(Clone, Debug)]
pub struct SupervisorHandle {
	tx: mpsc::UnboundedSender<Message>,
}

impl SupervisorHandle {
	/// Returns false once the supervisor has finished.
	pub fn send(&self, message: Message) -> bool {
		self.tx.send(message).is_ok()
	}

	pub fn restart(&self, reason: impl Into<String>) -> bool {
		self.send(Message::Restart { reason: reason.into() })
	}

	pub fn source_changed(&self, kind: ChangeKind, path: impl Into<PathBuf>) -> bool {
		self.send(Message::SourceChanged { kind, path: path.into() })
	}

	pub fn shutdown(&self) -> bool {
		self.send(Message::Shutdown)
	}

	pub fn force_shutdown(&self) -> bool {
		self.send(Message::ForceShutdown)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
	Idle,
	Debouncing,
	Restarting,
	/// Restarting, with a newer reason queued behind it.
	DebouncingWithPending,
	Stopping,
	Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
	Idle,
	Killing { generation: u64 },
	Settling { until: Instant },
	Stopping,
	Stopped,
}

#[derive(Debug)]
struct Debounce {
	reason: String,
	deadline: Instant,
}

enum Step {
	Exit(ExitNotice),
	Message(Message),
	Settled,
	DebounceElapsed,
	StartupElapsed,
}

/// Base debounce, doubled while the child is crash looping.
pub fn effective_debounce(base: Duration, crashes: CrashCounter) -> Duration {
	if crashes.in_crash_loop() {
		base * 2
	} else {
		base
	}
}

/// Keeps one child running and restarts it when watched inputs change.
///
/// All state lives here and is only touched from [`Supervisor::run`], which
/// consumes the supervisor; other tasks talk to it through a [`SupervisorHandle`].
pub struct Supervisor {
	config: Arc<WatchConfig>,
	controller: ProcessController,
	coalescer: ChangeCoalescer,
	events: EventBus,
	env_files: Vec<String>,
	phase: Phase,
	debounce: Option<Debounce>,
	pending: Option<String>,
	tx: mpsc::UnboundedSender<Message>,
	rx: mpsc::UnboundedReceiver<Message>,
	exit_rx: mpsc::UnboundedReceiver<ExitNotice>,
}

impl Supervisor {
	pub fn new(config: WatchConfig) -> Self {
		let config = Arc::new(config);
		let events = EventBus::new();
		let env = load_env_files(&config.root);
		let (tx, rx) = mpsc::unbounded_channel();
		let (exit_tx, exit_rx) = mpsc::unbounded_channel();
		let controller = ProcessController::new(Arc::clone(&config), env.vars, exit_tx, events.clone());

		Self {
			config,
			controller,
			coalescer: ChangeCoalescer::new(),
			events,
			env_files: env.files,
			phase: Phase::Idle,
			debounce: None,
			pending: None,
			tx,
			rx,
			exit_rx,
		}
	}

	pub fn config(&self) -> &WatchConfig {
		&self.config
	}

	pub fn handle(&self) -> SupervisorHandle {
		SupervisorHandle { tx: self.tx.clone() }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
		self.events.subscribe()
	}

	pub fn crashes(&self) -> CrashCounter {
		self.controller.crashes()
	}

	pub fn state(&self) -> CoordinatorState {
		match self.phase {
			Phase::Idle if self.debounce.is_some() => CoordinatorState::Debouncing,
			Phase::Idle => CoordinatorState::Idle,
			Phase::Killing { .. } | Phase::Settling { .. } if self.pending.is_some() => {
				CoordinatorState::DebouncingWithPending
			}
			Phase::Killing { .. } | Phase::Settling { .. } => CoordinatorState::Restarting,
			Phase::Stopping => CoordinatorState::Stopping,
			Phase::Stopped => CoordinatorState::Stopped,
		}
	}

	/// Starts the source watcher, plus the env watcher when env reloads are enabled.
	///
	/// The returned watchers stop delivering events when dropped.
	pub fn watch(&self) -> Result<Watchers> {
		let watchers = watch::start_watchers(&self.config, self.handle())?;
		self.events.emit(SupervisorEvent::Watching {
			paths: self.config.watch.iter().map(|p| p.display().to_string()).collect(),
		});
		Ok(watchers)
	}

	/// Spawns the first child and processes events until shutdown completes.
	pub async fn run(mut self) {
		if !self.env_files.is_empty() {
			tracing::info!("loaded env from {}", self.env_files.join(", "));
			self.events.emit(SupervisorEvent::EnvLoaded { files: self.env_files.clone() });
		}
		let outcome = self.controller.spawn();
		self.after_spawn(outcome);

		while self.phase != Phase::Stopped {
			let debounce_at = self.debounce.as_ref().map(|d| d.deadline);
			let settle_at = match self.phase {
				Phase::Settling { until } => Some(until),
				_ => None,
			};
			let stable_at = self.controller.stable_deadline();

			let step = tokio::select! {
				biased;
				Some(notice) = self.exit_rx.recv() => Step::Exit(notice),
				Some(message) = self.rx.recv() => Step::Message(message),
				_ = sleep_until(settle_at) => Step::Settled,
				_ = sleep_until(debounce_at) => Step::DebounceElapsed,
				_ = sleep_until(stable_at) => Step::StartupElapsed,
			};

			match step {
				Step::Exit(notice) => self.on_exit(notice),
				Step::Message(message) => self.on_message(message),
				Step::Settled => self.on_settled(),
				Step::DebounceElapsed => self.on_debounce_elapsed(),
				Step::StartupElapsed => self.controller.mark_stable(),
			}
		}

		tracing::info!("stopped");
		self.events.emit(SupervisorEvent::Stopped);
	}

	fn on_message(&mut self, message: Message) {
		match message {
			Message::SourceChanged { kind, path } => {
				if self.is_stopping() {
					return;
				}
				if !self.coalescer.record(&path, std::time::Instant::now()) {
					tracing::trace!("coalesced {} {}", kind, path.display());
					return;
				}
				if self.config.verbose {
					self.events.emit(SupervisorEvent::Changed {
						kind,
						path: path.display().to_string(),
					});
				}
				self.request_restart(format!("{} {}", kind, path.display()));
			}
			Message::EnvChanged { file, created, vars } => {
				if self.is_stopping() {
					return;
				}
				let reason = format!("{} {}", file, if created { "created" } else { "changed" });
				tracing::info!("{}, reloading env", reason);
				self.controller.merge_env(vars);
				self.events.emit(SupervisorEvent::EnvReloaded { file, created });
				if self.config.restart_on_env_change {
					self.request_restart(reason);
				}
			}
			Message::EnvRemoved { file } => {
				tracing::warn!("{} deleted, keeping existing env vars", file);
				self.events.emit(SupervisorEvent::EnvFileRemoved { file });
			}
			Message::Restart { reason } => self.request_restart(reason),
			Message::WatcherFailed { watcher, message } => {
				tracing::error!("{} watcher error: {}", watcher, message);
				self.events.emit(SupervisorEvent::WatcherError { watcher, message });
			}
			Message::Shutdown => self.begin_shutdown(),
			Message::ForceShutdown => {
				self.begin_shutdown();
				self.controller.force_kill();
			}
		}
	}

	fn request_restart(&mut self, reason: String) {
		if self.is_stopping() {
			return;
		}
		let delay = effective_debounce(self.config.debounce(), self.controller.crashes());
		if let Some(previous) = &self.debounce {
			tracing::trace!("superseding '{}'", previous.reason);
		}
		self.debounce = Some(Debounce {
			reason,
			deadline: Instant::now() + delay,
		});
	}

	fn on_debounce_elapsed(&mut self) {
		let Some(Debounce { reason, .. }) = self.debounce.take() else {
			return;
		};
		match self.phase {
			Phase::Idle => self.start_restart(reason),
			Phase::Killing { .. } | Phase::Settling { .. } => {
				tracing::debug!("restart in flight, queueing '{}'", reason);
				self.events.emit(SupervisorEvent::RestartQueued { reason: reason.clone() });
				self.pending = Some(reason);
			}
			Phase::Stopping | Phase::Stopped => {}
		}
	}

	fn start_restart(&mut self, reason: String) {
		tracing::info!("restarting: {}", reason);
		self.events.emit(SupervisorEvent::Restarting { reason });
		self.phase = match self.controller.graceful_kill(TerminationReason::Restart) {
			KillOutcome::NoProcess => Phase::Settling { until: Instant::now() + SETTLE_DELAY },
			KillOutcome::Pending { generation } => Phase::Killing { generation },
		};
	}

	fn on_exit(&mut self, notice: ExitNotice) {
		let generation = notice.generation;
		if let Some(ExitClass::FastCrash { crashes }) = self.controller.on_exit(notice) {
			self.report_crash_loop(crashes);
		}
		match self.phase {
			Phase::Killing { generation: killing } if killing == generation => {
				self.phase = Phase::Settling { until: Instant::now() + SETTLE_DELAY };
			}
			Phase::Stopping if self.controller.current().is_none() => {
				self.phase = Phase::Stopped;
			}
			_ => {}
		}
	}

	fn on_settled(&mut self) {
		self.phase = Phase::Idle;
		let outcome = self.controller.spawn();
		self.after_spawn(outcome);

		if let Some(reason) = self.pending.take() {
			if self.debounce.is_some() {
				// A newer trigger is already being debounced and will run instead.
				tracing::debug!("dropping queued '{}' for a newer change", reason);
			} else {
				self.debounce = Some(Debounce {
					reason,
					deadline: Instant::now() + PENDING_RESTART_DELAY,
				});
			}
		}
	}

	fn after_spawn(&mut self, outcome: SpawnOutcome) {
		if let SpawnOutcome::Failed { crashes } = outcome {
			self.report_crash_loop(crashes);
		}
	}

	fn report_crash_loop(&mut self, crashes: u32) {
		if crashes < CRASH_LOOP_THRESHOLD {
			return;
		}
		let debounce = effective_debounce(self.config.debounce(), self.controller.crashes());
		tracing::warn!(
			"crash loop: {} crashes in a row, debounce raised to {}ms",
			crashes,
			debounce.as_millis()
		);
		self.events.emit(SupervisorEvent::CrashLoop {
			crashes,
			debounce_ms: debounce.as_millis() as u64,
		});
	}

	fn begin_shutdown(&mut self) {
		if self.is_stopping() {
			return;
		}
		tracing::info!("shutting down");
		self.events.emit(SupervisorEvent::ShuttingDown);
		self.debounce = None;
		self.pending = None;
		self.controller.begin_shutdown();
		self.phase = match self.controller.graceful_kill(TerminationReason::Shutdown) {
			KillOutcome::NoProcess => Phase::Stopped,
			KillOutcome::Pending { .. } => Phase::Stopping,
		};
	}

	fn is_stopping(&self) -> bool {
		matches!(self.phase, Phase::Stopping | Phase::Stopped)
	}
}

async fn sleep_until(deadline: Option<Instant>) {
	match deadline {
		Some(deadline) => tokio::time::sleep_until(deadline).await,
		None => std::future::pending().await,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn quiet_config() -> WatchConfig {
		WatchConfig {
			root: std::env::temp_dir(),
			runner: "true".into(),
			..WatchConfig::default()
		}
	}

	#[test]
	fn debounce_doubles_in_crash_loop() {
		let base = Duration::from_millis(150);
		let mut crashes = CrashCounter::default();
		assert_eq!(effective_debounce(base, crashes), base);
		crashes.record_crash();
		crashes.record_crash();
		assert_eq!(effective_debounce(base, crashes), base);
		crashes.record_crash();
		assert_eq!(effective_debounce(base, crashes), Duration::from_millis(300));
	}

	#[tokio::test]
	async fn triggers_debounce_then_queue_while_restarting() {
		let mut sup = Supervisor::new(quiet_config());
		assert_eq!(sup.state(), CoordinatorState::Idle);

		sup.request_restart("change src/a.js".into());
		assert_eq!(sup.state(), CoordinatorState::Debouncing);

		sup.request_restart("change src/b.js".into());
		sup.on_debounce_elapsed();
		assert_eq!(sup.state(), CoordinatorState::Restarting);

		sup.request_restart("change src/c.js".into());
		sup.on_debounce_elapsed();
		assert_eq!(sup.state(), CoordinatorState::DebouncingWithPending);
		assert_eq!(sup.pending.as_deref(), Some("change src/c.js"));

		sup.request_restart("change src/d.js".into());
		sup.on_debounce_elapsed();
		assert_eq!(sup.pending.as_deref(), Some("change src/d.js"));
	}

	#[tokio::test]
	async fn shutdown_cancels_debounce() {
		let mut sup = Supervisor::new(quiet_config());
		sup.request_restart("change src/a.js".into());
		sup.begin_shutdown();
		assert_eq!(sup.state(), CoordinatorState::Stopped);
		assert!(sup.debounce.is_none());

		sup.request_restart("change src/b.js".into());
		assert!(sup.debounce.is_none());
	}

	#[tokio::test]
	async fn huge_debounce_does_not_overflow() {
		let mut sup = Supervisor::new(WatchConfig {
			debounce_ms: u64::MAX,
			startup_timeout_ms: u64::MAX,
			..quiet_config()
		});
		sup.request_restart("change src/a.js".into());
		assert_eq!(sup.state(), CoordinatorState::Debouncing);
		let outcome = sup.controller.spawn();
		assert!(matches!(outcome, SpawnOutcome::Started { .. }));
		assert!(sup.controller.stable_deadline().is_some());
	}

	#[tokio::test]
	async fn pending_yields_to_newer_debounce_after_settle() {
		let mut sup = Supervisor::new(quiet_config());
		sup.controller.begin_shutdown();
		sup.phase = Phase::Settling { until: Instant::now() };
		sup.pending = Some("change src/old.js".into());
		sup.request_restart("change src/new.js".into());

		sup.on_settled();
		assert!(sup.pending.is_none());
		assert_eq!(sup.debounce.as_ref().map(|d| d.reason.as_str()), Some("change src/new.js"));
	}
}
