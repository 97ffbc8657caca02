use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
	Add,
	Change,
	Remove,
}

impl fmt::Display for ChangeKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ChangeKind::Add => write!(f, "add"),
			ChangeKind::Change => write!(f, "change"),
			ChangeKind::Remove => write!(f, "remove"),
		}
	}
}

/// Why the supervisor asked the child to stop.
///
/// Travels with the kill request and comes back on the exit notice, so an
/// exit can be told apart from a crash without any shared flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminationReason {
	Restart,
	Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ExitStatusInfo {
	pub code: Option<i32>,
	pub signal: Option<i32>,
}

impl ExitStatusInfo {
	pub fn from_status(status: std::process::ExitStatus) -> Self {
		use std::os::unix::process::ExitStatusExt;
		Self {
			code: status.code(),
			signal: status.signal(),
		}
	}

	pub fn exited(code: i32) -> Self {
		Self { code: Some(code), signal: None }
	}

	pub fn signaled(signal: i32) -> Self {
		Self { code: None, signal: Some(signal) }
	}

	/// Only an explicit exit code of 0 counts as success; signal deaths do not.
	pub fn success(&self) -> bool {
		self.code == Some(0)
	}
}

impl fmt::Display for ExitStatusInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match (self.code, self.signal) {
			(Some(code), _) => write!(f, "code {}", code),
			(None, Some(signal)) => write!(f, "signal {}", signal),
			(None, None) => write!(f, "unknown status"),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum ExitClass {
	/// The supervisor asked for this exit.
	Requested { reason: TerminationReason },
	/// Abnormal exit before the startup timeout.
	FastCrash { crashes: u32 },
	/// Any other exit. The child stays down until the next change.
	Exited,
}
