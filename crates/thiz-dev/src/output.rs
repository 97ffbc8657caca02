use owo_colors::OwoColorize;
use thiz_supervisor::{ExitClass, SupervisorEvent};
use tokio::sync::broadcast::{self, error::RecvError};

const PREFIX: &str = "[THIZ-DEV]";

#[derive(Clone, Copy)]
pub struct Renderer {
	json: bool,
	verbose: bool,
}

impl Renderer {
	pub fn new(json: bool, verbose: bool) -> Self {
		Self { json, verbose }
	}

	pub async fn run(self, mut rx: broadcast::Receiver<SupervisorEvent>) {
		loop {
			match rx.recv().await {
				Ok(event) => self.render(&event),
				Err(RecvError::Lagged(n)) => tracing::warn!("dropped {} status lines", n),
				Err(RecvError::Closed) => break,
			}
		}
	}

	fn render(&self, event: &SupervisorEvent) {
		if self.json {
			println!("{}", event.to_json());
			return;
		}
		if let Some(line) = format_event(event, self.verbose) {
			println!("{} {}", PREFIX.bold(), line);
		}
	}

	pub fn signal_received(&self, name: &str, graceful: bool) {
		if !self.json {
			println!("\n{} {}", PREFIX.bold(), signal_line(name, graceful));
		}
	}
}

fn signal_line(name: &str, graceful: bool) -> String {
	if graceful {
		format!("{} received", name).yellow().to_string()
	} else {
		format!("{} received again, killing server", name).red().bold().to_string()
	}
}

pub fn format_event(event: &SupervisorEvent, verbose: bool) -> Option<String> {
	let line = match event {
		SupervisorEvent::Watching { paths } => format!("watching {}", paths.join(", ")).blue().to_string(),
		SupervisorEvent::EnvLoaded { files } => format!("loaded env from {}", files.join(", ")).green().to_string(),
		SupervisorEvent::Spawning { command } => format!("spawning {}", command).dimmed().to_string(),
		SupervisorEvent::Started { pid, .. } => format!("started server (pid {})", pid).green().to_string(),
		SupervisorEvent::SpawnSkipped => return None,
		SupervisorEvent::SpawnFailed { message, crashes } => {
			format!("failed to start server: {} ({} in a row)", message, crashes).red().to_string()
		}
		SupervisorEvent::Changed { kind, path } => format!("{} {}", kind, path).dimmed().to_string(),
		SupervisorEvent::Restarting { reason } => format!("restarting - {}", reason).cyan().to_string(),
		SupervisorEvent::RestartQueued { reason } if verbose => {
			format!("restart in progress, queued {}", reason).dimmed().to_string()
		}
		SupervisorEvent::RestartQueued { .. } => return None,
		SupervisorEvent::Exited { status, class, .. } => match class {
			ExitClass::Requested { .. } => return None,
			ExitClass::FastCrash { crashes } => format!(
				"server crashed during startup ({}), {} in a row - waiting for changes",
				status, crashes
			)
			.red()
			.to_string(),
			ExitClass::Exited => format!("server exited ({}) - waiting for changes", status)
				.yellow()
				.to_string(),
		},
		SupervisorEvent::CrashLoop { crashes, debounce_ms } => format!(
			"crash loop: {} crashes in a row, debounce now {}ms",
			crashes, debounce_ms
		)
		.red()
		.bold()
		.to_string(),
		SupervisorEvent::Stable { pid } if verbose => format!("server (pid {}) is up", pid).dimmed().to_string(),
		SupervisorEvent::Stable { .. } => return None,
		SupervisorEvent::EnvReloaded { file, created } => {
			let what = if *created { "created" } else { "changed" };
			format!("{} {} - reloading env", file, what).cyan().to_string()
		}
		SupervisorEvent::EnvFileRemoved { file } => {
			format!("{} deleted - keeping existing env vars", file).yellow().to_string()
		}
		SupervisorEvent::WatcherError { watcher, message } => {
			format!("{} watcher error: {}", watcher, message).red().to_string()
		}
		SupervisorEvent::ShuttingDown => "shutting down...".yellow().to_string(),
		SupervisorEvent::Stopped => "stopped".yellow().to_string(),
	};
	Some(line)
}

#[cfg(test)]
mod tests {
	use super::*;
	use thiz_supervisor::{ExitStatusInfo, TerminationReason};

	#[test]
	fn requested_exits_are_quiet() {
		let event = SupervisorEvent::Exited {
			pid: 7,
			generation: 1,
			status: ExitStatusInfo::signaled(15),
			class: ExitClass::Requested { reason: TerminationReason::Restart },
		};
		assert_eq!(format_event(&event, true), None);
	}

	#[test]
	fn crash_line_mentions_status_and_count() {
		let event = SupervisorEvent::Exited {
			pid: 7,
			generation: 1,
			status: ExitStatusInfo::exited(1),
			class: ExitClass::FastCrash { crashes: 2 },
		};
		let line = format_event(&event, false).unwrap();
		assert!(line.contains("code 1"));
		assert!(line.contains("2 in a row"));
	}

	#[test]
	fn repeated_signal_says_it_kills() {
		assert!(signal_line("SIGINT", true).contains("SIGINT received"));
		assert!(!signal_line("SIGINT", true).contains("killing"));
		assert!(signal_line("SIGINT", false).contains("killing server"));
	}

	#[test]
	fn queued_restarts_only_in_verbose() {
		let event = SupervisorEvent::RestartQueued { reason: "change src/a.js".into() };
		assert_eq!(format_event(&event, false), None);
		assert!(format_event(&event, true).unwrap().contains("change src/a.js"));
	}
}
