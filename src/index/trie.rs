//! A 4-bit radix ("critnib") trie mapping keys to [`EntryHandle`]s.
//!
//! Internal nodes branch 16 ways, one per nibble value, at a specific
//! nibble position within a *comparison key*: the real key prefixed with
//! its own length, encoded big-endian. The length prefix guarantees that
//! one key being a byte-for-byte prefix of another can never put them on
//! the same leaf — `"foo"` and `"foobar"` diverge at the prefix itself
//! even though the shorter key's bytes are themselves a prefix of the
//! longer one.
//!
//! Insertion is the classic two-pass crit-bit construction: first find
//! any existing leaf to use as a comparison exemplar (every leaf
//! currently reachable below a given point in the trie shares the same
//! bits up to that point, so any one of them will do), locate the first
//! nibble at which the new key and the exemplar differ, then descend a
//! second time splicing a new branch in at that position.

use crate::entry::EntryHandle;
use crate::error::{Error, ErrorKind};

/// Keys at or below this length use a stack-allocated comparison buffer;
/// longer keys fall back to a heap allocation.
pub const LARGE_KEY_THRESHOLD: usize = 1024;

const LEN_PREFIX: usize = 4;
const STACK_CAP: usize = LARGE_KEY_THRESHOLD + LEN_PREFIX;

/// The byte string actually compared in the trie: a 4-byte big-endian
/// length prefix followed by the raw key.
enum CompareKey {
    Stack([u8; STACK_CAP], usize),
    Heap(Vec<u8>),
}

impl CompareKey {
    fn build(key: &[u8]) -> Self {
        let total = LEN_PREFIX + key.len();
        if total <= STACK_CAP {
            let mut buf = [0u8; STACK_CAP];
            buf[..LEN_PREFIX].copy_from_slice(&(key.len() as u32).to_be_bytes());
            buf[LEN_PREFIX..total].copy_from_slice(key);
            CompareKey::Stack(buf, total)
        } else {
            let mut buf = Vec::with_capacity(total);
            buf.extend_from_slice(&(key.len() as u32).to_be_bytes());
            buf.extend_from_slice(key);
            CompareKey::Heap(buf)
        }
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            CompareKey::Stack(buf, len) => &buf[..*len],
            CompareKey::Heap(buf) => buf,
        }
    }
}

#[inline]
fn nibble_at(compare_key: &[u8], nibble_index: usize) -> u8 {
    let byte_index = nibble_index / 2;
    match compare_key.get(byte_index) {
        None => 0,
        Some(&byte) => {
            if nibble_index % 2 == 0 {
                byte >> 4
            } else {
                byte & 0x0F
            }
        }
    }
}

fn first_differing_nibble(a: &[u8], b: &[u8]) -> Option<usize> {
    let max_nibbles = a.len().max(b.len()) * 2;
    (0..max_nibbles).find(|&i| nibble_at(a, i) != nibble_at(b, i))
}

enum Node {
    Leaf(EntryHandle),
    Branch {
        nibble_index: usize,
        children: Box<[Option<Box<Node>>; 16]>,
    },
}

fn empty_children() -> Box<[Option<Box<Node>>; 16]> {
    Box::new(std::array::from_fn(|_| None))
}

fn first_leaf_handle(node: &Node) -> EntryHandle {
    match node {
        Node::Leaf(handle) => *handle,
        Node::Branch { children, .. } => {
            for child in children.iter() {
                if let Some(child) = child {
                    return first_leaf_handle(child);
                }
            }
            unreachable!("a branch node always has at least one child")
        }
    }
}

/// Finds the best-match leaf for `compare_key` by descending the trie
/// along its own nibble path, taking whichever child is present when the
/// exact one is absent. Every leaf below the point where the path runs
/// out shares `compare_key`'s bits up to that point, so any of them is a
/// valid exemplar for locating the first nibble where `compare_key`
/// actually diverges from the trie.
fn find_exemplar(node: &Node, compare_key: &[u8]) -> EntryHandle {
    match node {
        Node::Leaf(handle) => *handle,
        Node::Branch { nibble_index, children } => {
            let idx = nibble_at(compare_key, *nibble_index) as usize;
            match children[idx].as_deref() {
                Some(child) => find_exemplar(child, compare_key),
                None => first_leaf_handle(node),
            }
        }
    }
}

fn splice(existing: Box<Node>, new_key: &[u8], new_handle: EntryHandle, diff: usize) -> Box<Node> {
    let exemplar = first_leaf_handle(&existing);
    let exemplar_key = CompareKey::build(exemplar.key());
    let existing_nibble = nibble_at(exemplar_key.as_slice(), diff);
    let new_nibble = nibble_at(new_key, diff);
    debug_assert_ne!(existing_nibble, new_nibble);

    let mut children = empty_children();
    children[existing_nibble as usize] = Some(existing);
    children[new_nibble as usize] = Some(Box::new(Node::Leaf(new_handle)));
    Box::new(Node::Branch {
        nibble_index: diff,
        children,
    })
}

fn insert_rec(node: Box<Node>, new_key: &[u8], new_handle: EntryHandle, diff: usize) -> Box<Node> {
    match *node {
        Node::Branch {
            nibble_index,
            mut children,
        } if nibble_index < diff => {
            let idx = nibble_at(new_key, nibble_index) as usize;
            // Invariant: since `nibble_index < diff`, the new key agrees
            // with every leaf under this branch up to `nibble_index`, so
            // it routes to the same child the exemplar used to find
            // `diff` in the first place — that child is always present.
            let child = children[idx]
                .take()
                .expect("child along the shared prefix must exist");
            children[idx] = Some(insert_rec(child, new_key, new_handle, diff));
            Box::new(Node::Branch {
                nibble_index,
                children,
            })
        }
        Node::Branch {
            nibble_index,
            mut children,
        } if nibble_index == diff => {
            // The new key's nibble here differs from every leaf already
            // routed through this branch (that's what made `diff` equal
            // to this branch's own position), but nibble branching is
            // 16-way, not binary: there's room for a new sibling child
            // directly, rather than wrapping the whole branch inside
            // another one at the same position.
            let idx = nibble_at(new_key, nibble_index) as usize;
            debug_assert!(children[idx].is_none(), "new key's nibble must not already be routed here");
            children[idx] = Some(Box::new(Node::Leaf(new_handle)));
            Box::new(Node::Branch {
                nibble_index,
                children,
            })
        }
        _ => splice(node, new_key, new_handle, diff),
    }
}

fn lookup_rec(node: &Node, key: &[u8]) -> Option<EntryHandle> {
    match node {
        Node::Leaf(handle) => {
            if handle.key() == key {
                Some(*handle)
            } else {
                None
            }
        }
        Node::Branch { nibble_index, children } => {
            let compare = CompareKey::build(key);
            let idx = nibble_at(compare.as_slice(), *nibble_index) as usize;
            children[idx].as_deref().and_then(|c| lookup_rec(c, key))
        }
    }
}

fn remove_rec(slot: &mut Option<Box<Node>>, key: &[u8]) -> Option<EntryHandle> {
    let node = slot.take()?;
    match *node {
        Node::Leaf(handle) => {
            if handle.key() == key {
                Some(handle)
            } else {
                *slot = Some(Box::new(Node::Leaf(handle)));
                None
            }
        }
        Node::Branch {
            nibble_index,
            mut children,
        } => {
            let compare = CompareKey::build(key);
            let idx = nibble_at(compare.as_slice(), nibble_index) as usize;
            let removed = remove_rec(&mut children[idx], key);
            if removed.is_some() {
                let remaining: Vec<usize> = children
                    .iter()
                    .enumerate()
                    .filter_map(|(i, c)| c.is_some().then_some(i))
                    .collect();
                if remaining.len() == 1 {
                    *slot = children[remaining[0]].take();
                } else {
                    *slot = Some(Box::new(Node::Branch { nibble_index, children }));
                }
            } else {
                *slot = Some(Box::new(Node::Branch { nibble_index, children }));
            }
            removed
        }
    }
}

/// A single radix trie mapping keys to entry handles.
#[derive(Default)]
pub struct Trie {
    root: Option<Box<Node>>,
}

impl std::fmt::Debug for Trie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trie").field("empty", &self.root.is_none()).finish()
    }
}

impl Trie {
    /// Creates an empty trie.
    pub fn new() -> Self {
        Trie { root: None }
    }

    /// Inserts `handle` under `key`. Fails with [`ErrorKind::AlreadyExists`]
    /// if `key` is already present.
    pub fn insert(&mut self, key: &[u8], handle: EntryHandle) -> Result<(), Error> {
        let Some(existing) = self.root.take() else {
            self.root = Some(Box::new(Node::Leaf(handle)));
            return Ok(());
        };
        let compare = CompareKey::build(key);
        let exemplar = find_exemplar(&existing, compare.as_slice());
        let exemplar_key = CompareKey::build(exemplar.key());
        match first_differing_nibble(exemplar_key.as_slice(), compare.as_slice()) {
            None => {
                self.root = Some(existing);
                Err(Error::new(ErrorKind::AlreadyExists, "key already present in index"))
            }
            Some(diff) => {
                self.root = Some(insert_rec(existing, compare.as_slice(), handle, diff));
                Ok(())
            }
        }
    }

    /// Looks up `key`, returning its handle if present.
    pub fn lookup(&self, key: &[u8]) -> Option<EntryHandle> {
        lookup_rec(self.root.as_deref()?, key)
    }

    /// Removes `key`, returning its handle if it was present.
    pub fn remove(&mut self, key: &[u8]) -> Option<EntryHandle> {
        remove_rec(&mut self.root, key)
    }

    /// Whether the trie currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Tears down the whole trie, returning every handle it held.
    /// Leaves the trie empty.
    pub fn drain(&mut self) -> Vec<EntryHandle> {
        let mut out = Vec::new();
        if let Some(root) = self.root.take() {
            collect_rec(root, &mut out);
        }
        out
    }
}

fn collect_rec(node: Box<Node>, out: &mut Vec<EntryHandle>) {
    match *node {
        Node::Leaf(handle) => out.push(handle),
        Node::Branch { mut children, .. } => {
            for slot in children.iter_mut() {
                if let Some(child) = slot.take() {
                    collect_rec(child, out);
                }
            }
        }
    }
}
