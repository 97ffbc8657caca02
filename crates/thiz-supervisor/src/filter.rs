use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};

use crate::env::is_env_file_name;
use crate::error::{Error, Result};

const IGNORED_DIRS: [&str; 5] = ["node_modules", ".git", ".hg", ".svn", ".cache"];
const TEMP_SUFFIXES: [&str; 5] = ["~", ".swp", ".swo", ".swx", ".tmp"];

/// Decides which source-tree paths are worth a restart.
#[derive(Debug, Clone)]
pub struct PathFilter {
	root: PathBuf,
	ignore: GlobSet,
}

impl PathFilter {
	pub fn new(root: &Path, patterns: &[String]) -> Result<Self> {
		let mut builder = GlobSetBuilder::new();
		for pattern in patterns {
			let glob = Glob::new(pattern).map_err(|source| Error::Glob {
				pattern: pattern.clone(),
				source,
			})?;
			builder.add(glob);
		}
		let ignore = builder.build().map_err(|source| Error::Glob {
			pattern: patterns.join(", "),
			source,
		})?;
		let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
		Ok(Self { root, ignore })
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Root-relative form of `path`; paths outside the root are returned unchanged.
	pub fn relative(&self, path: &Path) -> PathBuf {
		path.strip_prefix(&self.root)
			.map(Path::to_path_buf)
			.unwrap_or_else(|_| path.to_path_buf())
	}

	/// Returns the normalized path if it should reach the coalescer.
	pub fn accept(&self, path: &Path) -> Option<PathBuf> {
		let relative = self.relative(path);
		if self.is_ignored(&relative) {
			None
		} else {
			Some(relative)
		}
	}

	pub fn is_ignored(&self, relative: &Path) -> bool {
		let in_ignored_dir = relative.components().any(|c| match c {
			Component::Normal(name) => name
				.to_str()
				.is_some_and(|name| IGNORED_DIRS.contains(&name)),
			_ => false,
		});
		if in_ignored_dir {
			return true;
		}

		if let Some(name) = relative.file_name().and_then(|n| n.to_str()) {
			if is_env_file_name(name) || is_temp_file_name(name) {
				return true;
			}
		}

		self.ignore.is_match(relative)
	}
}

fn is_temp_file_name(name: &str) -> bool {
	// 4913 is the probe file vim writes to test directory permissions.
	name == "4913" || name.starts_with(".#") || TEMP_SUFFIXES.iter().any(|s| name.ends_with(s))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::default_ignore;

	fn filter() -> PathFilter {
		PathFilter::new(Path::new("/nonexistent/project"), &default_ignore()).unwrap()
	}

	#[test]
	fn accepts_plain_sources() {
		let f = filter();
		assert_eq!(
			f.accept(Path::new("/nonexistent/project/src/routes/index.js")),
			Some(PathBuf::from("src/routes/index.js"))
		);
	}

	#[test]
	fn rejects_dependency_and_vcs_dirs() {
		let f = filter();
		assert!(f.is_ignored(Path::new("node_modules/express/index.js")));
		assert!(f.is_ignored(Path::new("src/node_modules/x.js")));
		assert!(f.is_ignored(Path::new(".git/HEAD")));
		assert!(f.is_ignored(Path::new(".hg/store")));
	}

	#[test]
	fn rejects_editor_temp_files() {
		let f = filter();
		assert!(f.is_ignored(Path::new("src/server.js~")));
		assert!(f.is_ignored(Path::new("src/.server.js.swp")));
		assert!(f.is_ignored(Path::new("src/.#server.js")));
		assert!(f.is_ignored(Path::new("src/4913")));
		assert!(f.is_ignored(Path::new("src/upload.tmp")));
	}

	#[test]
	fn rejects_env_files() {
		let f = filter();
		assert!(f.is_ignored(Path::new(".env")));
		assert!(f.is_ignored(Path::new("src/.env.local")));
		assert!(!f.is_ignored(Path::new("src/env.js")));
	}

	#[test]
	fn custom_globs_apply() {
		let f = PathFilter::new(Path::new("/p"), &["**/*.test.js".to_string()]).unwrap();
		assert!(f.is_ignored(Path::new("src/a.test.js")));
		assert!(!f.is_ignored(Path::new("src/a.js")));
	}

	#[test]
	fn bad_glob_is_an_error() {
		let err = PathFilter::new(Path::new("/p"), &["src/[".to_string()]).unwrap_err();
		assert!(matches!(err, Error::Glob { .. }));
	}
}
