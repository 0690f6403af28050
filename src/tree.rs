//! The ordered name tree.
//!
//! An ordered map from domain names to nodes, iterated in DNSSEC canonical
//! order. Besides exact lookup it answers the prefix question the lookup
//! engine lives off: for a query name, which of its ancestors exist, and
//! where does the name sit between its neighbours.
//!
//! Keys are the canonical byte keys of [`Name::tree_key`], under which
//! lexicographic order equals canonical name order and ancestor keys are
//! strict prefixes of descendant keys.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::base::Name;

//------------ NameTree ------------------------------------------------------

/// An ordered map from names to shared values.
#[derive(Debug)]
pub struct NameTree<T> {
    map: BTreeMap<Vec<u8>, Entry<T>>,
}

#[derive(Debug)]
struct Entry<T> {
    name: Name,
    value: Arc<T>,
}

impl<T> NameTree<T> {
    pub fn new() -> Self {
        NameTree {
            map: BTreeMap::new(),
        }
    }

    /// Returns the number of names in the tree.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Inserts a value under `name`.
    pub fn insert(&mut self, name: &Name, value: Arc<T>) -> Result<(), TreeInsertError> {
        let key = name.tree_key();
        if self.map.contains_key(&key) {
            return Err(TreeInsertError::Exists);
        }
        self.map.insert(
            key,
            Entry {
                name: name.clone(),
                value,
            },
        );
        Ok(())
    }

    /// Returns the value stored under exactly `name`.
    pub fn get(&self, name: &Name) -> Option<&Arc<T>> {
        self.map.get(&name.tree_key()).map(|entry| &entry.value)
    }

    /// Looks up `name`, returning the deepest match and its surroundings.
    ///
    /// The result carries the deepest existing node that is `name` or an
    /// ancestor of it, the chain of all existing ancestors from shallowest
    /// to deepest (including the exact node when present), and an iterator
    /// positioned at the greatest existing name not after `name`.
    ///
    /// Returns `None` when no name in the tree is `name` or an ancestor.
    pub fn lookup(&self, name: &Name) -> Option<TreeLookup<'_, T>> {
        let key = name.tree_key();

        let mut chain: SmallVec<[(&Name, &Arc<T>); 12]> = SmallVec::new();
        for boundary in Boundaries::new(&key) {
            if let Some(entry) = self.map.get(&key[..boundary]) {
                chain.push((&entry.name, &entry.value));
            }
        }

        let exact = self.map.contains_key(&key);
        let (found_name, found) = chain.last().copied()?;

        let pos = self
            .map
            .range::<[u8], _>((
                Bound::Unbounded,
                Bound::Included(key.as_slice()),
            ))
            .next_back()
            .map(|(key, _)| key.clone());

        Some(TreeLookup {
            exact,
            name: found_name,
            node: found,
            chain,
            iter: TreeIter { tree: self, pos },
        })
    }

    /// Returns an iterator positioned before the first name.
    pub fn iter(&self) -> TreeIter<'_, T> {
        TreeIter {
            tree: self,
            pos: None,
        }
    }

    /// Returns the first name and value in canonical order.
    pub fn first(&self) -> Option<(&Name, &Arc<T>)> {
        self.map
            .values()
            .next()
            .map(|entry| (&entry.name, &entry.value))
    }

    /// Returns the last name and value in canonical order.
    pub fn last(&self) -> Option<(&Name, &Arc<T>)> {
        self.map
            .values()
            .next_back()
            .map(|entry| (&entry.name, &entry.value))
    }

    /// Returns an iterator positioned at the last name.
    pub fn iter_at_last(&self) -> TreeIter<'_, T> {
        TreeIter {
            tree: self,
            pos: self.map.keys().next_back().cloned(),
        }
    }

    /// Visits every value in canonical order.
    pub fn for_each(&self, mut op: impl FnMut(&Name, &Arc<T>)) {
        for entry in self.map.values() {
            op(&entry.name, &entry.value)
        }
    }
}

impl<T> Default for NameTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

//------------ TreeLookup ----------------------------------------------------

/// The result of [`NameTree::lookup`].
pub struct TreeLookup<'a, T> {
    /// Whether the query name itself is present.
    pub exact: bool,

    /// The name of the deepest match.
    pub name: &'a Name,

    /// The deepest existing node on the query name's ancestor path.
    pub node: &'a Arc<T>,

    /// Existing ancestors, shallowest first, deepest (the match) last.
    pub chain: SmallVec<[(&'a Name, &'a Arc<T>); 12]>,

    /// An iterator positioned at the greatest name not after the query.
    pub iter: TreeIter<'a, T>,
}

//------------ TreeIter ------------------------------------------------------

/// A canonical-order iterator over a tree.
///
/// The iterator has an explicit position which may also be "before the
/// first name"; stepping backwards off the tree parks it there. Callers
/// that need the NSEC3 wrap-around restart from [`NameTree::iter_at_last`].
#[derive(Debug)]
pub struct TreeIter<'a, T> {
    tree: &'a NameTree<T>,
    pos: Option<Vec<u8>>,
}

impl<'a, T> Clone for TreeIter<'a, T> {
    fn clone(&self) -> Self {
        TreeIter {
            tree: self.tree,
            pos: self.pos.clone(),
        }
    }
}

impl<'a, T> TreeIter<'a, T> {
    /// Returns the name and value at the current position.
    pub fn current(&self) -> Option<(&'a Name, &'a Arc<T>)> {
        let pos = self.pos.as_ref()?;
        self.tree
            .map
            .get(pos)
            .map(|entry| (&entry.name, &entry.value))
    }

    /// Steps to and returns the next name in canonical order.
    pub fn next(&mut self) -> Option<(&'a Name, &'a Arc<T>)> {
        let next = match &self.pos {
            None => self.tree.map.iter().next(),
            Some(pos) => self
                .tree
                .map
                .range::<[u8], _>((
                    Bound::Excluded(pos.as_slice()),
                    Bound::Unbounded,
                ))
                .next(),
        };
        let (key, entry) = next?;
        self.pos = Some(key.clone());
        Some((&entry.name, &entry.value))
    }

    /// Steps to and returns the previous name in canonical order.
    ///
    /// Stepping back off the first name parks the iterator before it and
    /// returns `None`.
    pub fn prev(&mut self) -> Option<(&'a Name, &'a Arc<T>)> {
        let pos = self.pos.as_ref()?;
        let prev = self
            .tree
            .map
            .range::<[u8], _>((
                Bound::Unbounded,
                Bound::Excluded(pos.as_slice()),
            ))
            .next_back();
        match prev {
            Some((key, entry)) => {
                self.pos = Some(key.clone());
                Some((&entry.name, &entry.value))
            }
            None => {
                self.pos = None;
                None
            }
        }
    }
}

//------------ Boundaries ----------------------------------------------------

/// Label-boundary prefix lengths of a tree key, shortest first.
///
/// Yields `0` (the root name) and the position after every label
/// terminator, ending with the full key length.
struct Boundaries<'a> {
    key: &'a [u8],
    pos: Option<usize>,
}

impl<'a> Boundaries<'a> {
    fn new(key: &'a [u8]) -> Self {
        Boundaries { key, pos: Some(0) }
    }
}

impl<'a> Iterator for Boundaries<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let pos = self.pos?;
        self.pos = self.key[pos..]
            .iter()
            .position(|&octet| octet == 0)
            .map(|offset| pos + offset + 1);
        Some(pos)
    }
}

//------------ TreeInsertError -----------------------------------------------

/// The name is already present in the tree.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TreeInsertError {
    Exists,
}

impl std::fmt::Display for TreeInsertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "name already present")
    }
}

impl std::error::Error for TreeInsertError {}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(names: &[&str]) -> NameTree<Name> {
        let mut tree = NameTree::new();
        for s in names {
            let name: Name = s.parse().unwrap();
            tree.insert(&name, Arc::new(name.clone())).unwrap();
        }
        tree
    }

    #[test]
    fn insert_and_get() {
        let mut tree = tree(&["example.", "a.example."]);
        let name: Name = "a.example.".parse().unwrap();
        assert!(tree.get(&name).is_some());
        assert!(tree.get(&"b.example.".parse().unwrap()).is_none());
        assert_eq!(
            tree.insert(&name, Arc::new(name.clone())),
            Err(TreeInsertError::Exists)
        );
    }

    #[test]
    fn lookup_exact_and_partial() {
        let tree = tree(&["example.", "b.example.", "a.b.example."]);

        let q: Name = "a.b.example.".parse().unwrap();
        let found = tree.lookup(&q).unwrap();
        assert!(found.exact);
        assert_eq!(found.name, &q);
        let chain: Vec<String> =
            found.chain.iter().map(|(n, _)| n.to_string()).collect();
        assert_eq!(chain, ["example.", "b.example.", "a.b.example."]);

        let q: Name = "x.y.b.example.".parse().unwrap();
        let found = tree.lookup(&q).unwrap();
        assert!(!found.exact);
        assert_eq!(found.name.to_string(), "b.example.");

        assert!(tree.lookup(&"other.".parse().unwrap()).is_none());
    }

    #[test]
    fn iteration_order() {
        let tree =
            tree(&["example.", "z.example.", "a.example.", "*.z.example."]);
        let mut iter = tree.iter();
        let mut seen = Vec::new();
        while let Some((name, _)) = iter.next() {
            seen.push(name.to_string());
        }
        assert_eq!(
            seen,
            ["example.", "a.example.", "z.example.", "*.z.example."]
        );
    }

    #[test]
    fn lookup_positions_iterator_at_predecessor() {
        let tree = tree(&["example.", "a.example.", "c.example."]);
        let found = tree.lookup(&"b.example.".parse().unwrap()).unwrap();
        let mut iter = found.iter;
        assert_eq!(iter.current().unwrap().0.to_string(), "a.example.");
        assert_eq!(iter.next().unwrap().0.to_string(), "c.example.");
    }

    #[test]
    fn prev_then_next_is_identity_off_boundaries() {
        let tree = tree(&["example.", "a.example.", "b.example."]);
        let found = tree.lookup(&"b.example.".parse().unwrap()).unwrap();
        let mut iter = found.iter;
        let here = iter.current().unwrap().0.clone();
        iter.prev().unwrap();
        assert_eq!(iter.next().unwrap().0, &here);
    }

    #[test]
    fn prev_at_first_parks_before_first() {
        let tree = tree(&["example.", "a.example."]);
        let found = tree.lookup(&"example.".parse().unwrap()).unwrap();
        let mut iter = found.iter;
        assert!(iter.prev().is_none());
        assert!(iter.current().is_none());
        // Wrap-around is the caller's move: restart from the last name.
        let mut wrapped = tree.iter_at_last();
        assert_eq!(wrapped.current().unwrap().0.to_string(), "a.example.");
    }
}
