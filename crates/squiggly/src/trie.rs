//! Arena-backed path trie with wildcard lookup.
//!
//! Field paths such as `a.b[0].c` are split into segments and stored one
//! segment per node. Nodes live in a dense arena and refer to each other by
//! [`NodeId`], so parent links carry no ownership. A node stays in the arena
//! only while it holds at least one value or has at least one child; emptying
//! a node detaches it and repeats the check on its parent.
//!
//! # Example
//!
//! ```rust
//! use squiggly::trie::{TrieOptions, TrieRoot};
//!
//! let mut trie: TrieRoot<u64> = TrieRoot::new(TrieOptions::default());
//! let (b, _) = trie.add_node("a.b", |_| Vec::<((), _)>::new());
//! trie.insert_value(b, 1);
//! let (c, _) = trie.add_node("a.c", |_| Vec::<((), _)>::new());
//! trie.insert_value(c, 2);
//!
//! assert_eq!(trie.find("a.*").len(), 2);
//! assert_eq!(trie.find("a.b"), vec![b]);
//! ```

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::Hash;

use tracing::error;

use crate::error::{Result, SquigglyError};

/// Handle to a trie node.
///
/// Handles are generational: once a node is pruned its handle stops
/// resolving, even if the arena slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// Options shared by a trie and the temporary sub-tries it builds.
#[derive(Debug, Clone, PartialEq)]
pub struct TrieOptions {
    /// Replace numeric segments with `*` before indexing and searching.
    pub collapse_arrays: bool,
    /// Prefixes ordered first by [`TrieRoot::paths`].
    pub search_prefixes: Vec<String>,
}

impl Default for TrieOptions {
    fn default() -> Self {
        Self {
            collapse_arrays: true,
            search_prefixes: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Node<T> {
    /// Key under which the parent holds this node.
    segment: String,
    parent: Option<NodeId>,
    children: HashMap<String, NodeId>,
    /// Normalized path, set on nodes that terminate an indexed field.
    path: Option<String>,
    /// Raw field paths that normalize to this node.
    fields: BTreeSet<String>,
    values: HashSet<T>,
}

impl<T> Node<T> {
    fn new(segment: String, parent: Option<NodeId>) -> Self {
        Self {
            segment,
            parent,
            children: HashMap::new(),
            path: None,
            fields: BTreeSet::new(),
            values: HashSet::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.values.is_empty() && self.children.is_empty()
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    node: Option<Node<T>>,
}

/// Result of [`TrieRoot::add_node`]: the field's node and the links reported
/// by the new-branch callback, translated into this trie's handles.
pub type AddedNode<K> = (NodeId, Vec<(K, NodeId)>);

/// Root of a path trie holding a set of `T` per node.
#[derive(Debug)]
pub struct TrieRoot<T> {
    options: TrieOptions,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    /// Raw and normalized field paths to their node.
    lookup: HashMap<String, NodeId>,
    /// Normalized field paths.
    indexed: BTreeSet<String>,
}

impl<T: Eq + Hash> TrieRoot<T> {
    /// Creates an empty trie.
    pub fn new(options: TrieOptions) -> Self {
        Self {
            options,
            slots: vec![Slot {
                generation: 0,
                node: Some(Node::new(String::new(), None)),
            }],
            free: Vec::new(),
            lookup: HashMap::new(),
            indexed: BTreeSet::new(),
        }
    }

    /// Returns the handle of the root node.
    pub fn root(&self) -> NodeId {
        NodeId {
            index: 0,
            generation: 0,
        }
    }

    /// Returns the current options.
    pub fn options(&self) -> &TrieOptions {
        &self.options
    }

    /// Replaces the options. Already indexed fields keep their shape.
    pub fn update_options(&mut self, options: TrieOptions) {
        self.options = options;
    }

    /// Returns the number of live nodes, excluding the root.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count() - 1
    }

    /// Returns true if the trie holds nothing but its root.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `id` still refers to a node in this trie.
    pub fn is_live(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Splits a field path into reversed, normalized segments.
    ///
    /// `a.b[0][1]` becomes `["1", "0", "b", "a"]` (or `["*", "*", "b", "a"]`
    /// with array collapsing), so the next segment is always at the tail.
    pub fn tokenize(&self, field: &str) -> Vec<String> {
        let trimmed = field.strip_suffix(']').unwrap_or(field);
        let mut segments: Vec<String> = trimmed
            .split(['.', '[', ']'])
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if segments.is_empty() {
            segments.push(String::new());
        }
        self.normalize_path(&mut segments);
        segments.reverse();
        segments
    }

    /// Collapses numeric segments to `*` when array collapsing is enabled.
    pub fn normalize_path(&self, segments: &mut [String]) {
        if !self.options.collapse_arrays {
            return;
        }
        for segment in segments.iter_mut() {
            if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
                *segment = "*".to_string();
            }
        }
    }

    /// Indexes a field path, creating missing nodes.
    ///
    /// When the field's node does not exist yet, the branch is first built in
    /// an empty temporary trie and `on_new_branch` is called with it, so the
    /// caller can search only the new nodes. Handles in the returned links are
    /// translated into this trie after the temporary trie is merged in.
    /// Re-adding a known field only records the raw path.
    pub fn add_node<K, F>(&mut self, field: &str, on_new_branch: F) -> AddedNode<K>
    where
        F: FnOnce(&TrieRoot<T>) -> Vec<(K, NodeId)>,
    {
        if let Some(id) = self.lookup.get(field).copied() {
            if self.get(id).is_some_and(|n| n.fields.contains(field)) {
                return (id, Vec::new());
            }
        }

        let segments = self.tokenize(field);
        let normalized = if self.options.collapse_arrays {
            segments.iter().rev().cloned().collect::<Vec<_>>().join(".")
        } else {
            field.to_string()
        };

        let (id, links) = match self.lookup.get(&normalized).copied() {
            Some(id) if self.is_live(id) => (id, Vec::new()),
            _ => {
                let mut branch = TrieRoot::new(self.options.clone());
                let root = branch.root();
                let leaf = branch.get_or_create(root, segments);
                if let Some(node) = branch.get_mut(leaf) {
                    node.path = Some(normalized.clone());
                }
                let links = on_new_branch(&branch);
                let mapping = self.merge(branch);
                let id = mapping.get(&leaf).copied().unwrap_or_else(|| self.root());
                let links = links
                    .into_iter()
                    .filter_map(|(key, temp)| mapping.get(&temp).map(|&id| (key, id)))
                    .collect();
                self.lookup.insert(normalized.clone(), id);
                self.indexed.insert(normalized);
                (id, links)
            }
        };

        if let Some(node) = self.get_mut(id) {
            node.fields.insert(field.to_string());
        }
        self.lookup.insert(field.to_string(), id);
        (id, links)
    }

    /// Walks reversed `segments` from `from`, creating nodes as needed.
    fn get_or_create(&mut self, from: NodeId, mut segments: Vec<String>) -> NodeId {
        let mut current = from;
        while let Some(segment) = segments.pop() {
            let existing = self
                .get(current)
                .and_then(|n| n.children.get(&segment).copied());
            current = match existing {
                Some(child) => child,
                None => self.attach(current, segment),
            };
        }
        current
    }

    /// Returns every node matching `search`.
    ///
    /// `*` matches any single segment and `**` one or more segments. Each node
    /// appears at most once; order is unspecified.
    pub fn find(&self, search: &str) -> Vec<NodeId> {
        let segments = self.tokenize(search);
        let mut results = Vec::new();
        self.find_from(self.root(), &segments, &mut results);
        let mut seen = HashSet::new();
        results.retain(|id| seen.insert(*id));
        results
    }

    fn find_from(&self, id: NodeId, segments: &[String], results: &mut Vec<NodeId>) {
        let Some((next, rest)) = segments.split_last() else {
            results.push(id);
            return;
        };
        let Some(node) = self.get(id) else {
            return;
        };
        if next == "*" {
            for &child in node.children.values() {
                self.find_from(child, rest, results);
            }
            return;
        }
        if next == "**" {
            let mut descendants = Vec::new();
            self.descendants(id, &mut descendants);
            for descendant in descendants {
                self.find_from(descendant, rest, results);
            }
        }
        if let Some(&child) = node.children.get(next) {
            self.find_from(child, rest, results);
        }
    }

    /// Appends all descendants of `id` (excluding `id`) in depth-first order.
    pub fn descendants(&self, id: NodeId, out: &mut Vec<NodeId>) {
        if let Some(node) = self.get(id) {
            for &child in node.children.values() {
                out.push(child);
                self.descendants(child, out);
            }
        }
    }

    /// Returns the node registered for a raw or normalized field path.
    pub fn lookup(&self, field: &str) -> Option<NodeId> {
        self.lookup.get(field).copied().filter(|&id| self.is_live(id))
    }

    /// Returns the raw field paths recorded on a node.
    pub fn fields(&self, id: NodeId) -> impl Iterator<Item = &str> {
        self.get(id)
            .into_iter()
            .flat_map(|n| n.fields.iter().map(String::as_str))
    }

    /// Returns the normalized path of a node that terminates a field.
    pub fn path(&self, id: NodeId) -> Option<&str> {
        self.get(id).and_then(|n| n.path.as_deref())
    }

    /// Returns the parent of a node.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.parent)
    }

    /// Returns the `(segment, child)` pairs below a node.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = (&str, NodeId)> {
        self.get(id)
            .into_iter()
            .flat_map(|n| n.children.iter().map(|(s, &c)| (s.as_str(), c)))
    }

    /// Returns the values held by a node.
    pub fn values(&self, id: NodeId) -> Option<&HashSet<T>> {
        self.get(id).map(|n| &n.values)
    }

    /// Adds a value to a node. Returns false if the node is gone.
    pub fn insert_value(&mut self, id: NodeId, value: T) -> bool {
        match self.get_mut(id) {
            Some(node) => {
                node.values.insert(value);
                true
            }
            None => false,
        }
    }

    /// Removes a value from a node, pruning the node and any ancestors left
    /// empty.
    ///
    /// Returns the raw field paths that no longer have a node.
    ///
    /// # Errors
    ///
    /// Returns `SquigglyError::TrieInconsistency` if a parent does not hold
    /// the child being detached. The prune stops there; the rest of the trie
    /// is untouched.
    pub fn remove_value(&mut self, id: NodeId, value: &T) -> Result<Vec<String>> {
        let Some(node) = self.get_mut(id) else {
            return Ok(Vec::new());
        };
        node.values.remove(value);
        self.prune(id)
    }

    /// Detaches `id` and its ancestors for as long as they are empty.
    pub fn prune(&mut self, mut id: NodeId) -> Result<Vec<String>> {
        let mut orphaned = Vec::new();
        while id != self.root() {
            let Some(node) = self.get(id) else {
                break;
            };
            if !node.is_empty() {
                break;
            }
            let Some(parent) = node.parent else {
                let msg = format!("node {id:?} has no parent");
                error!("Trie assertion failed: {msg}");
                return Err(SquigglyError::TrieInconsistency(msg));
            };
            self.detach(parent, id)?;
            if let Some(node) = self.release(id) {
                for field in node.path.iter().chain(node.fields.iter()) {
                    if self.lookup.get(field) == Some(&id) {
                        self.lookup.remove(field);
                    }
                    self.indexed.remove(field);
                }
                orphaned.extend(node.fields);
            }
            id = parent;
        }
        Ok(orphaned)
    }

    /// Removes `child` from `parent`'s children.
    fn detach(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let segment = match self.get(child) {
            Some(node) => node.segment.clone(),
            None => return Ok(()),
        };
        let held = self
            .get(parent)
            .and_then(|p| p.children.get(&segment).copied());
        if held != Some(child) {
            let msg = format!("parent {parent:?} does not hold child {child:?} at {segment:?}");
            error!("Trie assertion failed: {msg}");
            return Err(SquigglyError::TrieInconsistency(msg));
        }
        if let Some(p) = self.get_mut(parent) {
            p.children.remove(&segment);
        }
        if let Some(c) = self.get_mut(child) {
            c.parent = None;
        }
        Ok(())
    }

    /// Merges another trie into this one.
    ///
    /// Children present on both sides are merged recursively; the rest are
    /// moved over. Returns a mapping from every node of `other` to the node
    /// of `self` that now holds its contents.
    pub fn merge(&mut self, mut other: TrieRoot<T>) -> HashMap<NodeId, NodeId> {
        let mut mapping = HashMap::new();
        let (dst, src) = (self.root(), other.root());
        self.merge_node(dst, &mut other, src, &mut mapping);
        mapping
    }

    fn merge_node(
        &mut self,
        dst: NodeId,
        other: &mut TrieRoot<T>,
        src: NodeId,
        mapping: &mut HashMap<NodeId, NodeId>,
    ) {
        mapping.insert(src, dst);
        let Some(node) = other.get_mut(src) else {
            return;
        };
        let fields = std::mem::take(&mut node.fields);
        let values = std::mem::take(&mut node.values);
        let path = node.path.take();
        let children: Vec<(String, NodeId)> = node.children.drain().collect();

        if let Some(target) = self.get_mut(dst) {
            target.fields.extend(fields);
            target.values.extend(values);
            if target.path.is_none() {
                target.path = path;
            }
        }
        for (segment, child) in children {
            let existing = self
                .get(dst)
                .and_then(|n| n.children.get(&segment).copied());
            let target = match existing {
                Some(id) => id,
                None => self.attach(dst, segment),
            };
            self.merge_node(target, other, child, mapping);
        }
    }

    /// Returns normalized field paths, search prefixes first, then sorted.
    pub fn paths(&self) -> Vec<String> {
        let prefixes = &self.options.search_prefixes;
        let mut paths: Vec<String> = self.indexed.iter().cloned().collect();
        paths.sort_by(|a, b| {
            for prefix in prefixes {
                match (a.starts_with(prefix.as_str()), b.starts_with(prefix.as_str())) {
                    (true, false) => return Ordering::Less,
                    (false, true) => return Ordering::Greater,
                    _ => {}
                }
            }
            a.cmp(b)
        });
        paths
    }

    fn attach(&mut self, parent: NodeId, segment: String) -> NodeId {
        let id = self.alloc(Node::new(segment.clone(), Some(parent)));
        if let Some(p) = self.get_mut(parent) {
            p.children.insert(segment, id);
        }
        id
    }

    fn alloc(&mut self, node: Node<T>) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    fn release(&mut self, id: NodeId) -> Option<Node<T>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(node)
    }

    fn get(&self, id: NodeId) -> Option<&Node<T>> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_ref())
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut Node<T>> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_links(_: &TrieRoot<u64>) -> Vec<((), NodeId)> {
        Vec::new()
    }

    fn index(trie: &mut TrieRoot<u64>, field: &str, value: u64) -> NodeId {
        let (id, _) = trie.add_node(field, no_links);
        trie.insert_value(id, value);
        id
    }

    fn sorted(mut ids: Vec<NodeId>) -> Vec<NodeId> {
        ids.sort();
        ids
    }

    #[test]
    fn test_tokenize() {
        let trie: TrieRoot<u64> = TrieRoot::new(TrieOptions {
            collapse_arrays: false,
            search_prefixes: vec![],
        });
        assert_eq!(trie.tokenize("a.b[0][1]"), vec!["1", "0", "b", "a"]);
        assert_eq!(trie.tokenize("a[0]c"), vec!["c", "0", "a"]);

        let trie: TrieRoot<u64> = TrieRoot::new(TrieOptions::default());
        assert_eq!(trie.tokenize("a.b[0][1]"), vec!["*", "*", "b", "a"]);
    }

    #[test]
    fn test_find_exact_and_wildcard() {
        let mut trie = TrieRoot::new(TrieOptions::default());
        let b = index(&mut trie, "a.b", 1);
        let c = index(&mut trie, "a.c", 1);

        assert_eq!(sorted(trie.find("a.*")), sorted(vec![b, c]));
        assert_eq!(trie.find("a.b"), vec![b]);
        assert!(trie.find("a.d").is_empty());
        assert_eq!(trie.find("a").len(), 1);
    }

    #[test]
    fn test_find_double_star() {
        let mut trie = TrieRoot::new(TrieOptions::default());
        let b = index(&mut trie, "a.b", 1);
        let deep = index(&mut trie, "a.x.y", 2);
        let x = trie.parent(deep).unwrap();

        assert_eq!(sorted(trie.find("a.**")), sorted(vec![b, x, deep]));
        assert_eq!(trie.find("a.**.y"), vec![deep]);
        assert_eq!(trie.find("**.y"), vec![deep]);
    }

    #[test]
    fn test_collapse_arrays_shares_node() {
        let mut trie = TrieRoot::new(TrieOptions::default());
        let first = index(&mut trie, "a[0]", 1);
        let second = index(&mut trie, "a[1]", 2);

        assert_eq!(first, second);
        let fields: Vec<&str> = trie.fields(first).collect();
        assert_eq!(fields, vec!["a[0]", "a[1]"]);
        assert_eq!(trie.path(first), Some("a.*"));
        assert_eq!(trie.lookup("a[1]"), Some(first));
        assert_eq!(trie.paths(), vec!["a.*".to_string()]);
    }

    #[test]
    fn test_readd_is_idempotent() {
        let mut trie = TrieRoot::new(TrieOptions::default());
        let first = index(&mut trie, "a.b", 1);
        let nodes = trie.len();
        let second = index(&mut trie, "a.b", 2);
        assert_eq!(first, second);
        assert_eq!(trie.len(), nodes);
        assert_eq!(trie.values(first).unwrap().len(), 2);
    }

    #[test]
    fn test_new_branch_callback_sees_only_new_nodes() {
        let mut trie = TrieRoot::new(TrieOptions::default());
        index(&mut trie, "a.b", 1);

        let (c, links) = trie.add_node("a.c", |branch| {
            branch
                .find("a.*")
                .into_iter()
                .map(|id| ("a.*", id))
                .collect()
        });
        assert_eq!(links, vec![("a.*", c)]);

        let (_, links) = trie.add_node("a.c", |_| vec![("never", c)]);
        assert!(links.is_empty());
    }

    #[test]
    fn test_prune_cascades_to_root() {
        let mut trie = TrieRoot::new(TrieOptions::default());
        let deep = index(&mut trie, "a.b.c", 7);
        let sibling = index(&mut trie, "x", 8);
        assert_eq!(trie.len(), 4);

        let orphaned = trie.remove_value(deep, &7).unwrap();
        assert_eq!(orphaned, vec!["a.b.c".to_string()]);
        assert!(!trie.is_live(deep));
        assert!(trie.find("a").is_empty());
        assert!(trie.lookup("a.b.c").is_none());
        assert_eq!(trie.len(), 1);
        assert!(trie.is_live(sibling));
    }

    #[test]
    fn test_prune_keeps_nodes_with_values_or_children() {
        let mut trie = TrieRoot::new(TrieOptions::default());
        let a = index(&mut trie, "a", 1);
        let b = index(&mut trie, "a.b", 2);

        trie.remove_value(a, &1).unwrap();
        assert!(trie.is_live(a));

        trie.remove_value(b, &2).unwrap();
        assert!(!trie.is_live(b));
        assert!(!trie.is_live(a));
        assert!(trie.is_empty());
    }

    #[test]
    fn test_stale_handle_after_slot_reuse() {
        let mut trie = TrieRoot::new(TrieOptions::default());
        let old = index(&mut trie, "old", 1);
        trie.remove_value(old, &1).unwrap();
        let new = index(&mut trie, "new", 2);

        assert!(!trie.is_live(old));
        assert!(trie.is_live(new));
        assert_eq!(trie.fields(old).count(), 0);
        assert!(!trie.insert_value(old, 3));
    }

    #[test]
    fn test_detach_missing_child_is_contained() {
        let mut trie = TrieRoot::new(TrieOptions::default());
        let b = index(&mut trie, "a.b", 1);
        let other = index(&mut trie, "z", 2);
        let a = trie.parent(b).unwrap();
        trie.get_mut(a).unwrap().children.clear();

        let err = trie.remove_value(b, &1).unwrap_err();
        assert!(matches!(err, SquigglyError::TrieInconsistency(_)));
        assert!(trie.is_live(other));
        assert_eq!(trie.find("z"), vec![other]);
    }

    #[test]
    fn test_merge_overlapping() {
        let mut main = TrieRoot::new(TrieOptions::default());
        let b = index(&mut main, "a.b", 1);

        let mut other = TrieRoot::new(TrieOptions::default());
        let other_b = index(&mut other, "a.b", 2);
        let other_c = index(&mut other, "a.c", 3);

        let mapping = main.merge(other);
        assert_eq!(mapping[&other_b], b);
        let c = mapping[&other_c];
        assert_eq!(main.parent(c), main.parent(b));
        assert_eq!(main.values(b).unwrap().len(), 2);
        assert!(main.values(c).unwrap().contains(&3));
    }

    #[test]
    fn test_paths_prefix_ordering() {
        let mut trie = TrieRoot::new(TrieOptions {
            collapse_arrays: true,
            search_prefixes: vec!["_".to_string()],
        });
        index(&mut trie, "b", 1);
        index(&mut trie, "_dir", 1);
        index(&mut trie, "a", 1);
        assert_eq!(trie.paths(), vec!["_dir", "a", "b"]);
    }
}
