// SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
// FileMap, FileTree, comparators, diff, and walk — the canonical
// diff-input data structures (spec.md §4.7).
//
// FileTree uses an arena (`Vec<Node>` + integer indices) rather than a
// reference-counted parent/child graph, so the parent back-reference
// never forms a cycle (spec.md §9, "Parent links and cycles"). FileMap
// is a `BTreeMap` keyed by relative path: lexicographic iteration order
// falls out of the data structure itself rather than needing separate
// bookkeeping, satisfying "stable and insertion-independent" for free.

use crate::entry::Entry;
use crate::url;
use std::collections::BTreeMap;

/// An ordered relative-path -> Entry mapping, rooted at a path prefix.
#[derive(Debug, Clone)]
pub struct FileMap {
    root_prefix: String,
    entries: BTreeMap<String, Entry>,
}

impl FileMap {
    pub fn new(root_prefix: &str) -> Self {
        Self {
            root_prefix: url::normalize(root_prefix),
            entries: BTreeMap::new(),
        }
    }

    /// Insert an entry, deriving its key by stripping the root prefix
    /// from its (normalized) path. An entry whose path equals the root
    /// prefix exactly maps to the empty key.
    pub fn insert_absolute(&mut self, entry: Entry) {
        let key = self.relative_key(&entry.path);
        self.entries.insert(key, entry);
    }

    fn relative_key(&self, path: &str) -> String {
        let path = url::normalize(path);
        let stripped = path
            .strip_prefix(&self.root_prefix)
            .unwrap_or(path.as_str());
        stripped.trim_start_matches('/').to_string()
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn root_prefix(&self) -> &str {
        &self.root_prefix
    }

    /// Consume the map, returning its entries in key order. Used by the
    /// remote daemon to serialize a `FileMap` onto the wire as a flat
    /// entry list (the client reconstructs the map by re-deriving keys
    /// from each entry's path against the root it asked for, exactly as
    /// `FileTree::flatten` does locally).
    pub fn into_entries(self) -> Vec<Entry> {
        self.entries.into_values().collect()
    }
}

struct Node {
    entry: Entry,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// A parent-linked n-ary tree of entries. The tree owns all nodes in a
/// flat arena; parent references are plain indices, so there is no
/// reference cycle to leak.
#[derive(Debug, Clone)]
pub struct FileTree {
    nodes: Vec<Node>,
    root: usize,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.entry.path)
            .field("parent", &self.parent)
            .field("children", &self.children.len())
            .finish()
    }
}

impl Clone for Node {
    fn clone(&self) -> Self {
        Node {
            entry: self.entry.clone(),
            parent: self.parent,
            children: self.children.clone(),
        }
    }
}

/// Incrementally constructs a `FileTree` one node at a time.
pub struct FileTreeBuilder {
    nodes: Vec<Node>,
}

impl FileTreeBuilder {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Add the root node (must be called exactly once, first).
    pub fn add_root(&mut self, entry: Entry) -> usize {
        self.nodes.push(Node {
            entry,
            parent: None,
            children: Vec::new(),
        });
        0
    }

    /// Add a child of `parent`, returning the new node's index.
    pub fn add_child(&mut self, parent: usize, entry: Entry) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(Node {
            entry,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(idx);
        idx
    }

    pub fn finish(self) -> FileTree {
        FileTree {
            nodes: self.nodes,
            root: 0,
        }
    }
}

impl Default for FileTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTree {
    pub fn root_entry(&self) -> &Entry {
        &self.nodes[self.root].entry
    }

    pub fn entry(&self, idx: usize) -> &Entry {
        &self.nodes[idx].entry
    }

    pub fn parent(&self, idx: usize) -> Option<usize> {
        self.nodes[idx].parent
    }

    pub fn children(&self, idx: usize) -> &[usize] {
        &self.nodes[idx].children
    }

    pub fn root_index(&self) -> usize {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Flatten this tree into a `FileMap` rooted at `root_prefix`.
    pub fn flatten(&self, root_prefix: &str) -> FileMap {
        let mut map = FileMap::new(root_prefix);
        for node in &self.nodes {
            map.insert_absolute(node.entry.clone());
        }
        map
    }

    /// Export this tree as a flat `(entry, parent index)` list in arena
    /// order, for the remote daemon to serialize onto the wire as a
    /// single `FileTree` response (spec.md §4.6's "one request type per
    /// backend operation").
    pub fn to_wire_nodes(&self) -> Vec<(Entry, Option<usize>)> {
        self.nodes
            .iter()
            .map(|n| (n.entry.clone(), n.parent))
            .collect()
    }

    /// Rebuild a `FileTree` from the flat list produced by
    /// `to_wire_nodes`. Children lists are recomputed from the parent
    /// indices; node 0 is always the root, matching how
    /// `FileTreeBuilder` numbers nodes.
    pub fn from_wire_nodes(nodes: Vec<(Entry, Option<usize>)>) -> Self {
        let mut built: Vec<Node> = nodes
            .into_iter()
            .map(|(entry, parent)| Node {
                entry,
                parent,
                children: Vec::new(),
            })
            .collect();
        for idx in 0..built.len() {
            if let Some(parent) = built[idx].parent {
                built[parent].children.push(idx);
            }
        }
        FileTree { nodes: built, root: 0 }
    }

    /// Top-down walk, invoking `visit` once per child node before
    /// descending into it. An error aborts the traversal and is
    /// returned to the caller.
    pub fn walk<F, E>(&self, visit: &mut F) -> std::result::Result<(), E>
    where
        F: FnMut(&Entry) -> std::result::Result<(), E>,
    {
        self.walk_from(self.root, visit)
    }

    fn walk_from<F, E>(&self, idx: usize, visit: &mut F) -> std::result::Result<(), E>
    where
        F: FnMut(&Entry) -> std::result::Result<(), E>,
    {
        for &child in &self.nodes[idx].children {
            visit(&self.nodes[child].entry)?;
            self.walk_from(child, visit)?;
        }
        Ok(())
    }
}

/// A pure predicate deciding whether a destination entry is stale
/// relative to its source counterpart. `dst` is `None` when the source
/// key is absent from the destination map.
pub trait Comparator: Send + Sync {
    fn is_stale(&self, src: &Entry, dst: Option<&Entry>) -> bool;
}

/// The default comparator: stale whenever the source is newer, or the
/// destination doesn't exist yet.
pub struct ModifiedComparator;

impl Comparator for ModifiedComparator {
    fn is_stale(&self, src: &Entry, dst: Option<&Entry>) -> bool {
        match dst {
            None => true,
            Some(dst) => src.modified > dst.modified,
        }
    }
}

/// A comparator provided for tests: stale iff the destination entry is
/// present and carries a nonempty name. Not intended for production use
/// (it ignores content staleness entirely).
pub struct ExistenceComparator;

impl Comparator for ExistenceComparator {
    fn is_stale(&self, _src: &Entry, dst: Option<&Entry>) -> bool {
        dst.map(|d| !d.name.is_empty()).unwrap_or(false)
    }
}

/// Diff `src` against `dst` using one or more comparators: the
/// destination is considered stale for a key if *any* comparator
/// reports it as stale. Runs in O(n) over the source map, preserving
/// its iteration (lexicographic) order. Returns the subset of source
/// entries that should be replicated; entries present only on the
/// destination are never produced here (see spec.md §4.7).
pub fn diff(src: &FileMap, dst: &FileMap, comparators: &[&dyn Comparator]) -> Vec<Entry> {
    let mut out = Vec::new();
    for (key, entry) in src.iter() {
        let dst_entry = dst.get(key);
        let stale = match dst_entry {
            None => true,
            Some(d) => comparators.iter().any(|c| c.is_stale(entry, Some(d))),
        };
        if stale {
            out.push(entry.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Mode;
    use chrono::{Duration, Utc};

    fn entry(path: &str, is_dir: bool, modified_offset_secs: i64) -> Entry {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        Entry::new(
            name,
            path,
            if is_dir {
                Mode::dir(0o755)
            } else {
                Mode::file(0o644)
            },
        )
        .with_modified(Utc::now() + Duration::seconds(modified_offset_secs))
    }

    fn sample_tree() -> (FileTree, usize) {
        let mut b = FileTreeBuilder::new();
        let root = b.add_root(entry("/src", true, 0));
        let dir = b.add_child(root, entry("/src/dir", true, 0));
        b.add_child(root, entry("/src/a.txt", false, 0));
        b.add_child(dir, entry("/src/dir/b.bin", false, 0));
        (b.finish(), root)
    }

    #[test]
    fn wire_nodes_round_trip_preserves_structure() {
        let (tree, _root) = sample_tree();
        let wire = tree.to_wire_nodes();
        let rebuilt = FileTree::from_wire_nodes(wire);

        assert_eq!(rebuilt.len(), tree.len());
        assert_eq!(rebuilt.root_entry().path, tree.root_entry().path);
        for idx in 0..tree.len() {
            assert_eq!(rebuilt.entry(idx).path, tree.entry(idx).path);
            assert_eq!(rebuilt.parent(idx), tree.parent(idx));
            assert_eq!(rebuilt.children(idx), tree.children(idx));
        }
    }

    #[test]
    fn map_tree_consistency() {
        let (tree, _root) = sample_tree();
        let map = tree.flatten("/src");
        let mut tree_paths: Vec<&str> = Vec::new();
        tree.walk::<_, ()>(&mut |e| {
            tree_paths.push(&e.path);
            Ok(())
        })
        .unwrap();
        tree_paths.push(&tree.root_entry().path);

        let map_paths: Vec<&str> = map.iter().map(|(_, e)| e.path.as_str()).collect();
        let mut a: Vec<&str> = tree_paths.clone();
        let mut b: Vec<&str> = map_paths.clone();
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[test]
    fn flatten_maps_root_to_empty_key() {
        let (tree, _) = sample_tree();
        let map = tree.flatten("/src");
        assert!(map.get("").is_some());
        assert!(map.get("a.txt").is_some());
        assert!(map.get("dir/b.bin").is_some());
    }

    #[test]
    fn diff_is_empty_for_identical_maps() {
        let (tree, _) = sample_tree();
        let src = tree.flatten("/src");
        let dst = tree.flatten("/src");
        let d = diff(&src, &dst, &[&ModifiedComparator]);
        assert!(d.is_empty());
    }

    #[test]
    fn diff_yields_keys_absent_from_destination() {
        let (tree, _) = sample_tree();
        let src = tree.flatten("/src");
        let dst = FileMap::new("/src");
        let d = diff(&src, &dst, &[&ModifiedComparator]);
        assert_eq!(d.len(), src.len());
    }

    #[test]
    fn diff_respects_source_iteration_order() {
        let (tree, _) = sample_tree();
        let src = tree.flatten("/src");
        let dst = FileMap::new("/src");
        let d = diff(&src, &dst, &[&ModifiedComparator]);
        let expected: Vec<&str> = src.iter().map(|(k, _)| k.as_str()).collect();
        let got: Vec<String> = d
            .iter()
            .map(|e| {
                let path = url::normalize(&e.path);
                path.strip_prefix("/src")
                    .unwrap_or(&path)
                    .trim_start_matches('/')
                    .to_string()
            })
            .collect();
        assert_eq!(expected, got);
    }

    #[test]
    fn modified_comparator_flags_newer_source() {
        let old = entry("/src/a.txt", false, -100);
        let newer = entry("/src/a.txt", false, 0);
        assert!(ModifiedComparator.is_stale(&newer, Some(&old)));
        assert!(!ModifiedComparator.is_stale(&old, Some(&newer)));
    }

    #[test]
    fn walk_visits_children_before_grandchildren_are_done() {
        let (tree, _) = sample_tree();
        let mut visited = Vec::new();
        tree.walk::<_, ()>(&mut |e| {
            visited.push(e.path.clone());
            Ok(())
        })
        .unwrap();
        assert_eq!(visited.len(), 3);
    }

    #[test]
    fn walk_aborts_on_visitor_error() {
        let (tree, _) = sample_tree();
        let mut seen = 0;
        let result = tree.walk::<_, &'static str>(&mut |_e| {
            seen += 1;
            Err("boom")
        });
        assert!(result.is_err());
        assert_eq!(seen, 1);
    }
}
