use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const COALESCE_WINDOW: Duration = Duration::from_millis(100);
const PRUNE_THRESHOLD: usize = 100;
const RETENTION: Duration = Duration::from_secs(10);

/// Drops repeat events for a path that was accepted moments ago.
///
/// Editors tend to produce several events per save (truncate, write, chmod,
/// rename), so the ledger remembers when each path last got through.
#[derive(Debug, Default)]
pub struct ChangeCoalescer {
	ledger: HashMap<PathBuf, Instant>,
}

impl ChangeCoalescer {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns true when the event should be acted on.
	pub fn record(&mut self, path: &Path, now: Instant) -> bool {
		if let Some(last) = self.ledger.get(path) {
			if now.saturating_duration_since(*last) < COALESCE_WINDOW {
				return false;
			}
		}
		self.ledger.insert(path.to_path_buf(), now);
		if self.ledger.len() > PRUNE_THRESHOLD {
			self.prune(now);
		}
		true
	}

	fn prune(&mut self, now: Instant) {
		self.ledger
			.retain(|_, last| now.saturating_duration_since(*last) < RETENTION);
	}

	pub fn len(&self) -> usize {
		self.ledger.len()
	}

	pub fn is_empty(&self) -> bool {
		self.ledger.is_empty()
	}
}
