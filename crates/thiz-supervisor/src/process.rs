use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::config::WatchConfig;
use crate::events::{EventBus, SupervisorEvent};
use crate::types::{ExitClass, ExitStatusInfo, TerminationReason};

/// Set in the child's environment so apps can tell they run under the dev supervisor.
pub const SUPERVISED_ENV: &str = "THIZ_DEV";
pub const FORCE_KILL_TIMEOUT: Duration = Duration::from_secs(2);
pub const CRASH_LOOP_THRESHOLD: u32 = 3;

/// Consecutive fast crashes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CrashCounter {
	count: u32,
}

impl CrashCounter {
	pub fn count(&self) -> u32 {
		self.count
	}

	pub fn record_crash(&mut self) -> u32 {
		self.count += 1;
		self.count
	}

	pub fn reset(&mut self) {
		self.count = 0;
	}

	pub fn in_crash_loop(&self) -> bool {
		self.count >= CRASH_LOOP_THRESHOLD
	}
}

/// Sorts an exit into requested / fast crash / plain exit and updates the counter.
pub fn classify(
	requested: Option<TerminationReason>,
	runtime: Duration,
	status: ExitStatusInfo,
	startup_timeout: Duration,
	crashes: &mut CrashCounter,
) -> ExitClass {
	if let Some(reason) = requested {
		crashes.reset();
		return ExitClass::Requested { reason };
	}
	if runtime < startup_timeout && !status.success() {
		return ExitClass::FastCrash { crashes: crashes.record_crash() };
	}
	crashes.reset();
	ExitClass::Exited
}

/// Posted by a child's waiter task once the child is gone.
#[derive(Debug)]
pub struct ExitNotice {
	pub pid: u32,
	pub generation: u64,
	pub status: ExitStatusInfo,
	pub requested: Option<TerminationReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
	Started { pid: u32, generation: u64 },
	/// Shutdown is in progress.
	Skipped,
	/// A child already exists; spawning would run two at once.
	AlreadyRunning,
	Failed { crashes: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
	/// Nothing to kill; the caller can continue right away.
	NoProcess,
	/// Done once the exit notice for `generation` arrives.
	Pending { generation: u64 },
}

pub struct ManagedProcess {
	pub pid: u32,
	pub generation: u64,
	pub started_at: Instant,
	stable: bool,
	kill: Option<oneshot::Sender<TerminationReason>>,
}

/// Owns the one child process and everything known about it.
pub struct ProcessController {
	config: Arc<WatchConfig>,
	file_env: HashMap<String, String>,
	current: Option<ManagedProcess>,
	crashes: CrashCounter,
	generation: u64,
	shutting_down: bool,
	exits: mpsc::UnboundedSender<ExitNotice>,
	events: EventBus,
}

impl ProcessController {
	pub fn new(
		config: Arc<WatchConfig>,
		file_env: HashMap<String, String>,
		exits: mpsc::UnboundedSender<ExitNotice>,
		events: EventBus,
	) -> Self {
		Self {
			config,
			file_env,
			current: None,
			crashes: CrashCounter::default(),
			generation: 0,
			shutting_down: false,
			exits,
			events,
		}
	}

	pub fn current(&self) -> Option<&ManagedProcess> {
		self.current.as_ref()
	}

	pub fn crashes(&self) -> CrashCounter {
		self.crashes
	}

	pub fn is_shutting_down(&self) -> bool {
		self.shutting_down
	}

	pub fn begin_shutdown(&mut self) {
		self.shutting_down = true;
	}

	/// Values from env files. Keys are only ever added or overwritten.
	pub fn merge_env(&mut self, vars: HashMap<String, String>) {
		self.file_env.extend(vars);
	}

	pub fn spawn(&mut self) -> SpawnOutcome {
		if self.shutting_down {
			tracing::info!("shutdown in progress, not spawning");
			self.events.emit(SupervisorEvent::SpawnSkipped);
			return SpawnOutcome::Skipped;
		}
		if let Some(process) = &self.current {
			tracing::warn!("pid {} still running, refusing to spawn another", process.pid);
			return SpawnOutcome::AlreadyRunning;
		}

		if self.config.verbose {
			self.events.emit(SupervisorEvent::Spawning { command: self.command_line() });
		}

		let child = match self.command().spawn() {
			Ok(c) => c,
			Err(e) => {
				let crashes = self.crashes.record_crash();
				tracing::error!("failed to spawn {}: {}", self.config.runner, e);
				self.events.emit(SupervisorEvent::SpawnFailed {
					message: format!("{}: {}", self.config.runner, e),
					crashes,
				});
				return SpawnOutcome::Failed { crashes };
			}
		};

		let pid = child.id().unwrap_or(0);
		self.generation += 1;
		let generation = self.generation;
		let (kill_tx, kill_rx) = oneshot::channel();
		let exits = self.exits.clone();
		tokio::spawn(async move {
			supervise_child(child, pid, generation, kill_rx, exits).await;
		});

		self.current = Some(ManagedProcess {
			pid,
			generation,
			started_at: Instant::now(),
			stable: false,
			kill: Some(kill_tx),
		});
		tracing::debug!("spawned pid {} (generation {})", pid, generation);
		self.events.emit(SupervisorEvent::Started { pid, generation });
		SpawnOutcome::Started { pid, generation }
	}

	/// Asks the child to stop: SIGTERM now, SIGKILL after [`FORCE_KILL_TIMEOUT`].
	pub fn graceful_kill(&mut self, reason: TerminationReason) -> KillOutcome {
		let Some(process) = self.current.as_mut() else {
			return KillOutcome::NoProcess;
		};
		if let Some(kill) = process.kill.take() {
			if kill.send(reason).is_err() {
				tracing::debug!("pid {} already exiting", process.pid);
			}
		}
		KillOutcome::Pending { generation: process.generation }
	}

	/// SIGKILL for the current child's group, without waiting out [`FORCE_KILL_TIMEOUT`].
	pub fn force_kill(&self) {
		if let Some(process) = &self.current {
			tracing::warn!("force killing pid {}", process.pid);
			signal_group(process.pid, nix::sys::signal::Signal::SIGKILL);
		}
	}

	/// Classifies an exit notice. Returns `None` for a notice about a child that is no longer current.
	pub fn on_exit(&mut self, notice: ExitNotice) -> Option<ExitClass> {
		match &self.current {
			Some(process) if process.generation == notice.generation => {}
			_ => {
				tracing::debug!("ignoring exit of stale generation {}", notice.generation);
				return None;
			}
		}
		let process = self.current.take()?;
		let class = classify(
			notice.requested,
			process.started_at.elapsed(),
			notice.status,
			self.config.startup_timeout(),
			&mut self.crashes,
		);

		match class {
			ExitClass::Requested { .. } => {
				tracing::debug!("pid {} stopped ({})", notice.pid, notice.status)
			}
			ExitClass::FastCrash { crashes } => {
				tracing::warn!("pid {} crashed on startup ({}), {} in a row", notice.pid, notice.status, crashes)
			}
			ExitClass::Exited => tracing::info!("pid {} exited ({})", notice.pid, notice.status),
		}
		self.events.emit(SupervisorEvent::Exited {
			pid: notice.pid,
			generation: notice.generation,
			status: notice.status,
			class,
		});
		Some(class)
	}

	/// When the running child passes its startup timeout.
	pub fn stable_deadline(&self) -> Option<Instant> {
		self.current
			.as_ref()
			.filter(|p| !p.stable)
			.map(|p| p.started_at + self.config.startup_timeout())
	}

	pub fn mark_stable(&mut self) {
		let Some(process) = self.current.as_mut() else {
			return;
		};
		if process.stable {
			return;
		}
		process.stable = true;
		self.crashes.reset();
		tracing::debug!("pid {} survived startup", process.pid);
		self.events.emit(SupervisorEvent::Stable { pid: process.pid });
	}

	fn command(&self) -> Command {
		let mut cmd = Command::new(&self.config.runner);
		cmd.args(&self.config.runner_args)
			.arg(self.config.entry_path())
			.args(&self.config.args)
			.current_dir(&self.config.root)
			.envs(&self.file_env)
			.envs(&self.config.env)
			.env(SUPERVISED_ENV, "1")
			// Reading the terminal from this background group stops the child
			// with SIGTTIN; `terminate` follows SIGTERM with SIGCONT for that case.
			.stdin(Stdio::inherit())
			.stdout(Stdio::inherit())
			.stderr(Stdio::inherit())
			.process_group(0);
		cmd
	}

	fn command_line(&self) -> String {
		let mut parts = vec![self.config.runner.clone()];
		parts.extend(self.config.runner_args.iter().cloned());
		parts.push(self.config.entry_path().display().to_string());
		parts.extend(self.config.args.iter().cloned());
		parts.join(" ")
	}
}

async fn supervise_child(
	mut child: Child,
	pid: u32,
	generation: u64,
	kill: oneshot::Receiver<TerminationReason>,
	exits: mpsc::UnboundedSender<ExitNotice>,
) {
	let (result, requested) = tokio::select! {
		status = child.wait() => (status, None),
		reason = kill => {
			// A dropped sender means the supervisor itself went away.
			let reason = reason.unwrap_or(TerminationReason::Shutdown);
			(terminate(&mut child, pid).await, Some(reason))
		}
	};

	let status = match result {
		Ok(status) => ExitStatusInfo::from_status(status),
		Err(e) => {
			tracing::error!("failed to wait for pid {}: {}", pid, e);
			ExitStatusInfo::default()
		}
	};
	let _ = exits.send(ExitNotice { pid, generation, status, requested });
}

async fn terminate(child: &mut Child, pid: u32) -> std::io::Result<std::process::ExitStatus> {
	use nix::sys::signal::Signal;

	signal_group(pid, Signal::SIGTERM);
	signal_group(pid, Signal::SIGCONT);
	match tokio::time::timeout(FORCE_KILL_TIMEOUT, child.wait()).await {
		Ok(status) => status,
		Err(_) => {
			tracing::warn!("pid {} ignored SIGTERM for {:?}, sending SIGKILL", pid, FORCE_KILL_TIMEOUT);
			signal_group(pid, Signal::SIGKILL);
			child.wait().await
		}
	}
}

fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
	use nix::errno::Errno;
	use nix::sys::signal::killpg;
	use nix::unistd::Pid;

	match killpg(Pid::from_raw(pid as i32), signal) {
		Ok(()) | Err(Errno::ESRCH) => {}
		Err(e) => tracing::debug!("{} to process group {} failed: {}", signal, pid, e),
	}
}
