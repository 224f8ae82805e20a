// SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
// Entry: the value type describing one filesystem entry, shared by every
// backend. Entries are plain data — equal by all fields, freely copied,
// never shared mutably.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Permission bits plus the directory flag. `permissions` holds the usual
/// Unix-style mode bits (e.g. `0o644`); `is_dir` is tracked separately
/// rather than folded into a single `os`-style mode word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode {
    pub permissions: u32,
    pub is_dir: bool,
}

impl Mode {
    pub fn file(permissions: u32) -> Self {
        Self {
            permissions,
            is_dir: false,
        }
    }

    pub fn dir(permissions: u32) -> Self {
        Self {
            permissions,
            is_dir: true,
        }
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::file(0o644)
    }
}

/// Backend-specific extras that don't fit the common contract. Carried
/// alongside an `Entry` but never consulted by the diff engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BackendMetadata {
    S3 { etag: Option<String> },
}

/// A single filesystem entry: a file or a directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Base name (last path component).
    pub name: String,
    /// Fully qualified path within the owning backend, `/`-separated.
    pub path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub mode: Mode,
    pub extra: Option<BackendMetadata>,
}

impl Entry {
    pub fn new(name: impl Into<String>, path: impl Into<String>, mode: Mode) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            size: 0,
            modified: Utc::now(),
            mode,
            extra: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode.is_dir
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = modified;
        self
    }

    pub fn with_extra(mut self, extra: BackendMetadata) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Derive an entry for the same name/mode/size/mtime but rooted at a
    /// different path — used when rewriting a source entry onto the
    /// destination's namespace during sync.
    pub fn rebased(&self, new_path: impl Into<String>) -> Self {
        Self {
            name: self.name.clone(),
            path: new_path.into(),
            size: self.size,
            modified: self.modified,
            mode: self.mode,
            extra: self.extra.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_with_identical_fields_are_equal() {
        let a = Entry::new("a.txt", "/src/a.txt", Mode::file(0o644));
        let b = Entry::new("a.txt", "/src/a.txt", Mode::file(0o644));
        assert_eq!(a, b);
    }

    #[test]
    fn rebased_preserves_everything_but_path() {
        let a = Entry::new("a.txt", "/src/a.txt", Mode::file(0o644)).with_size(5);
        let b = a.rebased("/dst/a.txt");
        assert_eq!(b.path, "/dst/a.txt");
        assert_eq!(b.name, a.name);
        assert_eq!(b.size, a.size);
        assert_eq!(b.mode, a.mode);
    }

    #[test]
    fn mode_dir_sets_is_dir() {
        let m = Mode::dir(0o755);
        assert!(m.is_dir);
        assert_eq!(m.permissions, 0o755);
    }
}
