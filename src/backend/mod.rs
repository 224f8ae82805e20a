// SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
// FileSystem: the async trait every backend (local, S3, remote-TLS)
// implements. Generalizes the teacher's synchronous `FileBackend` trait
// to async, since a remote backend's operations cross the network
// (spec.md §9, "Sync vs async backend trait").

pub mod local;
pub mod remote;
pub mod s3;

use crate::entry::Entry;
use crate::error::Result;
use crate::tree::{FileMap, FileTree, FileTreeBuilder};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;

/// Abstraction over filesystem operations for local, remote, and
/// object-store targets. Every method takes a root-relative or absolute
/// path string in the backend's own namespace; backends are responsible
/// for resolving that against whatever root they were constructed with.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Backend type identifier, used in logging and error messages.
    fn backend_type(&self) -> &'static str;

    /// Fetch metadata for a single path.
    async fn stat(&self, path: &str) -> Result<Entry>;

    /// List the immediate children of a directory.
    async fn read_dir(&self, path: &str) -> Result<Vec<Entry>>;

    /// Read a file's full contents.
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Write a file's contents, creating parent directories as needed.
    async fn write(&self, entry: &Entry, data: &[u8]) -> Result<()>;

    /// Create a directory (and any missing parents), applying `entry`'s
    /// mode bits to the created directory.
    async fn mkdir(&self, entry: &Entry) -> Result<()>;

    /// Remove a path. Directories are removed recursively.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Build a `FileTree` rooted at `root` by recursively walking
    /// `read_dir`. Returns `None` when `root` is not a directory
    /// (spec.md §4.3). Backends that can produce a tree more cheaply
    /// (e.g. an object store returning a flat key listing) may override
    /// this.
    async fn file_tree(&self, root: &Entry) -> Result<Option<FileTree>> {
        if !root.is_dir() {
            return Ok(None);
        }
        let mut builder = FileTreeBuilder::new();
        let root_idx = builder.add_root(root.clone());
        self.fill_tree(&root.path, root_idx, &mut builder).await?;
        Ok(Some(builder.finish()))
    }

    /// Flatten `file_tree(root)` into a `FileMap` rooted at `root`.
    /// `None` when `root` is not a directory, same as `file_tree`.
    async fn file_map(&self, root: &Entry) -> Result<Option<FileMap>> {
        match self.file_tree(root).await? {
            Some(tree) => Ok(Some(tree.flatten(&root.path))),
            None => Ok(None),
        }
    }

    /// Recursive helper backing the default `file_tree` implementation.
    /// Boxed because async fns can't recurse directly.
    fn fill_tree<'a>(
        &'a self,
        path: &'a str,
        parent_idx: usize,
        builder: &'a mut FileTreeBuilder,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let children = self.read_dir(path).await?;
            for child in children {
                let is_dir = child.is_dir();
                let child_path = child.path.clone();
                let idx = builder.add_child(parent_idx, child);
                if is_dir {
                    self.fill_tree(&child_path, idx, builder).await?;
                }
            }
            Ok(())
        })
    }
}
