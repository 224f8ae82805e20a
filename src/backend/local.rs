// SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
// Local filesystem backend. The straightforward case: every operation
// is a thin wrapper over `tokio::fs`, grounded directly in the
// teacher's synchronous `LocalBackend` (generalized to async).

use super::FileSystem;
use crate::entry::{Entry, Mode};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;

/// Create `path` and any missing parents with mode `0o755`, matching
/// spec.md §4.3/§4.4 ("Creates missing parent directories with mode
/// 0o755"). A no-op if `path` already exists.
async fn create_dir_all_0755(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    }
    Ok(())
}

pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }

    async fn entry_for(path: &Path) -> Result<Entry> {
        let meta = tokio::fs::metadata(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        let modified: DateTime<Utc> = meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());

        #[cfg(unix)]
        let permissions = {
            use std::os::unix::fs::PermissionsExt;
            meta.permissions().mode() & 0o777
        };
        #[cfg(not(unix))]
        let permissions = if meta.permissions().readonly() { 0o444 } else { 0o644 };

        let mode = if meta.is_dir() {
            Mode::dir(permissions)
        } else {
            Mode::file(permissions)
        };

        Ok(Entry::new(name, path.to_string_lossy().to_string(), mode)
            .with_size(meta.len())
            .with_modified(modified))
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for LocalBackend {
    fn backend_type(&self) -> &'static str {
        "local"
    }

    async fn stat(&self, path: &str) -> Result<Entry> {
        Self::entry_for(Path::new(path)).await
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<Entry>> {
        let mut out = Vec::new();
        let mut reader = tokio::fs::read_dir(path).await?;
        while let Some(child) = reader.next_entry().await? {
            out.push(Self::entry_for(&child.path()).await?);
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(path).await?)
    }

    async fn write(&self, entry: &Entry, data: &[u8]) -> Result<()> {
        if let Some(parent) = Path::new(&entry.path).parent() {
            create_dir_all_0755(parent).await?;
        }
        if entry.is_dir() {
            create_dir_all_0755(Path::new(&entry.path)).await?;
            return Ok(());
        }
        tokio::fs::write(&entry.path, data).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(entry.mode.permissions);
            tokio::fs::set_permissions(&entry.path, perms).await?;
        }
        Ok(())
    }

    async fn mkdir(&self, entry: &Entry) -> Result<()> {
        let path = Path::new(&entry.path);
        tokio::fs::create_dir_all(path).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(entry.mode.permissions)).await?;
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }
}
