// SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
// Sync engine: one-shot and watch-mode orchestration over two
// backends. A one-shot sync parallel-enumerates both sides, computes a
// one-way diff, and applies only the changes needed to bring the
// destination up to date; errors per entry are logged and skipped
// (spec.md §7). Watch mode keeps the destination live by feeding
// filesystem notifications into the same copy/delete primitives.

use crate::backend::FileSystem;
use crate::entry::Entry;
use crate::error::{MirrorError, Result};
use crate::tree::{diff, ModifiedComparator};
use notify::{RecursiveMode, Watcher};
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Rewrite a source-rooted path onto the destination's namespace,
/// preserving the relative structure below each root (grounded in the
/// original's `MkToFile`).
fn rebase_path(src_root: &str, dst_root: &str, src_path: &str) -> String {
    let relative = src_path.strip_prefix(src_root).unwrap_or(src_path).trim_start_matches('/');
    if relative.is_empty() {
        dst_root.to_string()
    } else {
        format!("{}/{}", dst_root.trim_end_matches('/'), relative)
    }
}

fn rebase_entry(src_root: &str, dst_root: &str, entry: &Entry) -> Entry {
    entry.rebased(rebase_path(src_root, dst_root, &entry.path))
}

fn is_excluded(relative_path: &str, excludes: &[Regex]) -> bool {
    excludes.iter().any(|re| re.is_match(relative_path))
}

/// Copy (or mkdir, for a directory entry) a single source path to the
/// destination, under the src/dst root rewriting rule.
pub async fn copy_single(
    src_fs: &dyn FileSystem,
    src_root: &str,
    src_path: &str,
    dst_fs: &dyn FileSystem,
    dst_root: &str,
) -> Result<()> {
    let entry = src_fs.stat(src_path).await?;
    let dst_entry = rebase_entry(src_root, dst_root, &entry);

    if entry.is_dir() {
        info!(from = src_path, to = %dst_entry.path, "mkdir");
        dst_fs.mkdir(&dst_entry).await
    } else {
        info!(from = src_path, to = %dst_entry.path, "copying file");
        let bytes = src_fs.read(src_path).await?;
        dst_fs.write(&dst_entry, &bytes).await
    }
}

/// Remove the destination-side counterpart of `src_path`.
pub async fn delete_single(
    dst_fs: &dyn FileSystem,
    src_root: &str,
    src_path: &str,
    dst_root: &str,
) -> Result<()> {
    let dst_path = rebase_path(src_root, dst_root, src_path);
    info!(path = %dst_path, "deleting");
    dst_fs.delete(&dst_path).await
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub excludes: Vec<Regex>,
}

/// Run a single one-shot sync: parallel-enumerate both sides, diff,
/// apply. Returns `Ok(())` as long as enumeration and diff succeeded —
/// per-entry failures are logged and skipped, not propagated. Checked
/// once per entry against `cancel`, per spec.md §5: a cancellation
/// request stops the loop at the next entry boundary rather than
/// mid-copy.
pub async fn sync(
    src_fs: Arc<dyn FileSystem>,
    src_root: &str,
    dst_fs: Arc<dyn FileSystem>,
    dst_root: &str,
    options: &SyncOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(MirrorError::Cancelled);
    }

    let root_entry = src_fs.stat(src_root).await?;

    if !root_entry.is_dir() {
        // Single-file sync: no enumeration needed.
        return copy_single(&*src_fs, src_root, src_root, &*dst_fs, dst_root).await;
    }

    let dst_root_entry = rebase_entry(src_root, dst_root, &root_entry);

    let (src_map_res, dst_map_res) = {
        let src_fs = src_fs.clone();
        let dst_fs = dst_fs.clone();
        let src_root_entry = root_entry.clone();
        tokio::join!(
            async move { src_fs.file_map(&src_root_entry).await },
            async move {
                match dst_fs.stat(&dst_root_entry.path).await {
                    Ok(entry) => dst_fs.file_map(&entry).await,
                    Err(_) => Ok(None),
                }
            },
        )
    };
    let src_map = src_map_res?
        .ok_or_else(|| MirrorError::Io(format!("{src_root} is not a directory")))?;
    // An empty or not-yet-existing destination (first sync) is not
    // fatal: treat it as an empty map rather than aborting the sync.
    let dst_map = dst_map_res.ok().flatten().unwrap_or_else(|| crate::tree::FileMap::new(dst_root));

    let pending = diff(&src_map, &dst_map, &[&ModifiedComparator]);

    for entry in pending {
        if cancel.is_cancelled() {
            return Err(MirrorError::Cancelled);
        }

        let relative = entry
            .path
            .strip_prefix(src_root)
            .unwrap_or(&entry.path)
            .trim_start_matches('/');
        if is_excluded(relative, &options.excludes) {
            continue;
        }

        let result = copy_single(&*src_fs, src_root, &entry.path, &*dst_fs, dst_root).await;
        if let Err(e) = result {
            error!(path = %entry.path, error = %e, "sync entry failed, skipping");
        }
    }

    Ok(())
}

/// Continuous watch-mode sync: after an initial one-shot pass, stream
/// filesystem events into the same copy/delete primitives. Runs until
/// `cancel` fires or the watcher channel closes, checking `cancel` once
/// per loop iteration (spec.md §5).
pub async fn watch(
    src_fs: Arc<dyn FileSystem>,
    src_root: String,
    dst_fs: Arc<dyn FileSystem>,
    dst_root: String,
    options: SyncOptions,
    cancel: CancellationToken,
) -> Result<()> {
    sync(
        src_fs.clone(),
        &src_root,
        dst_fs.clone(),
        &dst_root,
        &options,
        &cancel,
    )
    .await?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let _ = tx.send(res);
    })
    .map_err(|e| crate::error::MirrorError::Io(format!("failed to start watcher: {e}")))?;

    watcher
        .watch(Path::new(&src_root), RecursiveMode::Recursive)
        .map_err(|e| crate::error::MirrorError::Io(format!("failed to watch {src_root}: {e}")))?;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return Err(MirrorError::Cancelled),
            event = rx.recv() => event,
        };

        let Some(event) = event else {
            return Ok(());
        };

        if cancel.is_cancelled() {
            return Err(MirrorError::Cancelled);
        }

        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "watcher reported an error");
                continue;
            }
        };

        for path in &event.paths {
            let Some(path_str) = path.to_str() else { continue };
            let relative = path_str
                .strip_prefix(&src_root)
                .unwrap_or(path_str)
                .trim_start_matches('/');
            if is_excluded(relative, &options.excludes) {
                continue;
            }

            let result = if event.kind.is_remove() {
                delete_single(&*dst_fs, &src_root, path_str, &dst_root).await
            } else {
                copy_single(&*src_fs, &src_root, path_str, &*dst_fs, &dst_root).await
            };

            if let Err(e) = result {
                warn!(path = path_str, error = %e, "watch event handling failed, continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::local::LocalBackend;

    #[test]
    fn rebase_path_preserves_relative_structure() {
        let got = rebase_path("/tmp/src", "/tmp/dst", "/tmp/src/dir/a.txt");
        assert_eq!(got, "/tmp/dst/dir/a.txt");
    }

    #[test]
    fn rebase_path_root_maps_to_dst_root() {
        let got = rebase_path("/tmp/src", "/tmp/dst", "/tmp/src");
        assert_eq!(got, "/tmp/dst");
    }

    #[test]
    fn exclusion_matches_relative_path() {
        let excludes = vec![Regex::new(r"\.bin$").unwrap()];
        assert!(is_excluded("dir/b.bin", &excludes));
        assert!(!is_excluded("a.txt", &excludes));
    }

    #[tokio::test]
    async fn sync_copies_a_small_tree() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        tokio::fs::write(src_dir.path().join("a.txt"), b"hello\n").await.unwrap();
        tokio::fs::create_dir(src_dir.path().join("dir")).await.unwrap();
        tokio::fs::write(src_dir.path().join("dir/b.bin"), [0u8, 1, 2]).await.unwrap();

        let src_fs: Arc<dyn FileSystem> = Arc::new(LocalBackend::new());
        let dst_fs: Arc<dyn FileSystem> = Arc::new(LocalBackend::new());

        sync(
            src_fs,
            src_dir.path().to_str().unwrap(),
            dst_fs,
            dst_dir.path().to_str().unwrap(),
            &SyncOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let a = tokio::fs::read(dst_dir.path().join("a.txt")).await.unwrap();
        assert_eq!(a, b"hello\n");
        let b = tokio::fs::read(dst_dir.path().join("dir/b.bin")).await.unwrap();
        assert_eq!(b, [0u8, 1, 2]);
    }

    #[tokio::test]
    async fn sync_respects_exclusions() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        tokio::fs::write(src_dir.path().join("a.txt"), b"hello\n").await.unwrap();
        tokio::fs::create_dir(src_dir.path().join("dir")).await.unwrap();
        tokio::fs::write(src_dir.path().join("dir/b.bin"), [0u8, 1, 2]).await.unwrap();

        let src_fs: Arc<dyn FileSystem> = Arc::new(LocalBackend::new());
        let dst_fs: Arc<dyn FileSystem> = Arc::new(LocalBackend::new());
        let options = SyncOptions {
            excludes: vec![Regex::new(r"\.bin$").unwrap()],
        };

        sync(
            src_fs,
            src_dir.path().to_str().unwrap(),
            dst_fs,
            dst_dir.path().to_str().unwrap(),
            &options,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(dst_dir.path().join("a.txt").exists());
        assert!(!dst_dir.path().join("dir/b.bin").exists());
    }

    #[tokio::test]
    async fn incremental_sync_only_touches_changed_entries() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        tokio::fs::write(src_dir.path().join("a.txt"), b"hello\n").await.unwrap();
        tokio::fs::create_dir(src_dir.path().join("dir")).await.unwrap();
        tokio::fs::write(src_dir.path().join("dir/b.bin"), [0u8, 1, 2]).await.unwrap();

        let src_fs: Arc<dyn FileSystem> = Arc::new(LocalBackend::new());
        let dst_fs: Arc<dyn FileSystem> = Arc::new(LocalBackend::new());

        sync(
            src_fs.clone(),
            src_dir.path().to_str().unwrap(),
            dst_fs.clone(),
            dst_dir.path().to_str().unwrap(),
            &SyncOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        tokio::fs::write(src_dir.path().join("a.txt"), b"hello2\n").await.unwrap();

        sync(
            src_fs,
            src_dir.path().to_str().unwrap(),
            dst_fs,
            dst_dir.path().to_str().unwrap(),
            &SyncOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let a = tokio::fs::read(dst_dir.path().join("a.txt")).await.unwrap();
        assert_eq!(a, b"hello2\n");
        let b = tokio::fs::read(dst_dir.path().join("dir/b.bin")).await.unwrap();
        assert_eq!(b, [0u8, 1, 2]);
    }

    #[tokio::test]
    async fn sync_rejects_a_pre_cancelled_token() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        tokio::fs::write(src_dir.path().join("a.txt"), b"hello\n").await.unwrap();

        let src_fs: Arc<dyn FileSystem> = Arc::new(LocalBackend::new());
        let dst_fs: Arc<dyn FileSystem> = Arc::new(LocalBackend::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = sync(
            src_fs,
            src_dir.path().to_str().unwrap(),
            dst_fs,
            dst_dir.path().to_str().unwrap(),
            &SyncOptions::default(),
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, crate::error::MirrorError::Cancelled));
        assert!(!dst_dir.path().join("a.txt").exists());
    }

    /// Drives `watch` through create/modify/modify/remove and asserts
    /// destination convergence after each, covering the "watch event
    /// idempotence" property: two successive modify events leave the
    /// destination identical to the source either way.
    #[tokio::test]
    async fn watch_converges_destination_on_create_modify_remove() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let src_root = src_dir.path().to_str().unwrap().to_string();
        let dst_root = dst_dir.path().to_str().unwrap().to_string();

        let src_fs: Arc<dyn FileSystem> = Arc::new(LocalBackend::new());
        let dst_fs: Arc<dyn FileSystem> = Arc::new(LocalBackend::new());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(watch(
            src_fs,
            src_root.clone(),
            dst_fs,
            dst_root.clone(),
            SyncOptions::default(),
            cancel.clone(),
        ));

        let file_path = src_dir.path().join("a.txt");
        let dst_path = dst_dir.path().join("a.txt");

        tokio::fs::write(&file_path, b"one\n").await.unwrap();
        wait_until_content(&dst_path, b"one\n").await;

        tokio::fs::write(&file_path, b"two\n").await.unwrap();
        wait_until_content(&dst_path, b"two\n").await;

        // A second, identical-content modify must leave the destination
        // converged rather than erroring or diverging.
        tokio::fs::write(&file_path, b"two\n").await.unwrap();
        wait_until_content(&dst_path, b"two\n").await;

        tokio::fs::remove_file(&file_path).await.unwrap();
        wait_until_absent(&dst_path).await;

        cancel.cancel();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(crate::error::MirrorError::Cancelled)));
    }

    async fn wait_until_content(path: &std::path::Path, expected: &[u8]) {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            if let Ok(contents) = tokio::fs::read(path).await {
                if contents == expected {
                    return;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("destination never converged to expected content");
    }

    async fn wait_until_absent(path: &std::path::Path) {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            if !path.exists() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("destination entry was never removed");
    }
}
