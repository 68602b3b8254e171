//! Sorted registry of open positions.
//!
//! A doubly linked list threaded through an arena keyed by owner, ascending
//! by ICR from `head` (riskiest) to `tail`. Callers insert with a neighbour
//! hint that is verified against live ICRs before anything is relinked, so
//! the registry never sorts itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::utils::crypto::Address;

// ═══════════════════════════════════════════════════════════════════════════════
// ICR SOURCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Live ICR lookup used to verify neighbour hints
pub trait IcrSource {
    /// Current ICR of an open position, in micro-percent
    fn icr(&self, owner: &Address) -> Result<u64>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODES AND HINTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Claimed neighbours for an insertion. A missing side is the list boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NeighborHint {
    /// Node that should precede the new one (lower or equal ICR)
    pub prev: Option<Address>,
    /// Node that should follow the new one (higher or equal ICR)
    pub next: Option<Address>,
}

impl NeighborHint {
    /// Hint between two nodes
    pub fn new(prev: Option<Address>, next: Option<Address>) -> Self {
        Self { prev, next }
    }
}

/// Registry node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Previous (lower ICR) owner
    pub prev: Option<Address>,
    /// Next (higher ICR) owner
    pub next: Option<Address>,
    /// ICR observed when the node was last linked
    pub icr: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SORTED POSITIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Ascending-by-ICR list of open positions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortedPositions {
    nodes: BTreeMap<Address, Node>,
    head: Option<Address>,
    tail: Option<Address>,
    size: usize,
}

impl SortedPositions {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Lowest-ICR owner
    pub fn head(&self) -> Option<Address> {
        self.head
    }

    /// Highest-ICR owner
    pub fn tail(&self) -> Option<Address> {
        self.tail
    }

    /// Number of linked nodes
    pub fn len(&self) -> usize {
        self.size
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Check if an owner is linked
    pub fn contains(&self, owner: &Address) -> bool {
        self.nodes.contains_key(owner)
    }

    /// Node of an owner
    pub fn node(&self, owner: &Address) -> Option<&Node> {
        self.nodes.get(owner)
    }

    /// Owners from head to tail
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            registry: self,
            cursor: self.head,
        }
    }

    /// Successor of an owner
    pub fn next_of(&self, owner: &Address) -> Option<Address> {
        self.nodes.get(owner).and_then(|n| n.next)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MUTATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Link an owner at the position given by `hint`.
    ///
    /// `None` inserts at the current head.
    pub fn insert<S: IcrSource + ?Sized>(&mut self, owner: Address, hint: Option<NeighborHint>, source: &S) -> Result<()> {
        if self.contains(&owner) {
            return Err(Error::PositionAlreadyExists(owner.short()));
        }

        let icr = source.icr(&owner)?;
        let (prev, next) = match hint {
            Some(h) => (h.prev, h.next),
            None => (None, self.head),
        };

        if let Err(e) = self.verify(&owner, icr, prev, next, source) {
            warn!(owner = %owner.short(), icr, "Rejected neighbour hint");
            return Err(e);
        }

        self.link(owner, prev, next, icr);
        debug!(owner = %owner.short(), icr, size = self.size, "Linked position");
        Ok(())
    }

    /// Unlink an owner, returning its node
    pub fn remove(&mut self, owner: &Address) -> Result<Node> {
        let node = self
            .nodes
            .remove(owner)
            .ok_or_else(|| Error::PositionNotFound(owner.short()))?;

        match node.prev {
            Some(p) => self.set_next(&p, node.next),
            None => self.head = node.next,
        }
        match node.next {
            Some(n) => self.set_prev(&n, node.prev),
            None => self.tail = node.prev,
        }
        self.size -= 1;
        Ok(node)
    }

    /// Move an owner after its ICR changed. On a rejected hint the node stays where it was.
    pub fn reinsert_on_update<S: IcrSource + ?Sized>(
        &mut self,
        owner: Address,
        hint: Option<NeighborHint>,
        source: &S,
    ) -> Result<()> {
        let old = self.remove(&owner)?;
        if let Err(e) = self.insert(owner, hint, source) {
            self.link(owner, old.prev, old.next, old.icr);
            return Err(e);
        }
        Ok(())
    }

    /// Move an owner to its correct spot by walking from where it sits.
    ///
    /// Used after redistribution, where ICRs move but stay close to their
    /// neighbours.
    pub fn resettle<S: IcrSource + ?Sized>(&mut self, owner: Address, source: &S) -> Result<()> {
        let old = self.remove(&owner)?;
        let icr = source.icr(&owner)?;
        let (mut prev, mut next) = (old.prev, old.next);

        while let Some(p) = prev {
            if source.icr(&p)? <= icr {
                break;
            }
            next = Some(p);
            prev = self.nodes.get(&p).and_then(|n| n.prev);
        }
        while let Some(n) = next {
            if source.icr(&n)? >= icr {
                break;
            }
            prev = Some(n);
            next = self.nodes.get(&n).and_then(|node| node.next);
        }

        self.link(owner, prev, next, icr);
        if prev != old.prev {
            debug!(owner = %owner.short(), icr, "Resettled position");
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Hint a client should submit to insert `icr`, placed after equal ICRs.
    ///
    /// `exclude` skips the owner being moved, so the hint stays valid once it
    /// is unlinked.
    pub fn find_insert_position<S: IcrSource + ?Sized>(
        &self,
        icr: u64,
        exclude: Option<&Address>,
        source: &S,
    ) -> Result<NeighborHint> {
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(current) = cursor {
            let next = self.next_of(&current);
            if Some(&current) != exclude {
                if source.icr(&current)? > icr {
                    return Ok(NeighborHint::new(prev, Some(current)));
                }
                prev = Some(current);
            }
            cursor = next;
        }
        Ok(NeighborHint::new(prev, None))
    }

    /// Check that live ICRs ascend from head to tail
    pub fn is_sorted<S: IcrSource + ?Sized>(&self, source: &S) -> Result<bool> {
        let mut last = 0u64;
        for owner in self.iter() {
            let icr = source.icr(&owner)?;
            if icr < last {
                return Ok(false);
            }
            last = icr;
        }
        Ok(true)
    }

    /// Rebuild a registry from stored nodes. Links are validated.
    pub fn from_nodes(nodes: impl IntoIterator<Item = (Address, Node)>) -> Result<Self> {
        let nodes: BTreeMap<Address, Node> = nodes.into_iter().collect();
        let head = nodes.iter().find(|(_, n)| n.prev.is_none()).map(|(a, _)| *a);
        let tail = nodes.iter().find(|(_, n)| n.next.is_none()).map(|(a, _)| *a);
        let registry = Self {
            size: nodes.len(),
            nodes,
            head,
            tail,
        };
        registry.validate_links()?;
        Ok(registry)
    }

    /// Stored nodes in owner order
    pub fn nodes(&self) -> impl Iterator<Item = (&Address, &Node)> {
        self.nodes.iter()
    }

    /// Check link symmetry, boundaries and size
    pub fn validate_links(&self) -> Result<()> {
        let mut count = 0usize;
        let mut prev: Option<Address> = None;
        let mut cursor = self.head;
        while let Some(current) = cursor {
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| Error::InvariantViolation(format!("dangling link to {}", current.short())))?;
            if node.prev != prev {
                return Err(Error::InvariantViolation(format!(
                    "broken back link at {}",
                    current.short()
                )));
            }
            count += 1;
            if count > self.nodes.len() {
                return Err(Error::InvariantViolation("cycle in registry".into()));
            }
            prev = Some(current);
            cursor = node.next;
        }
        if prev != self.tail {
            return Err(Error::InvariantViolation("tail does not end the list".into()));
        }
        if count != self.size || count != self.nodes.len() {
            return Err(Error::InvariantViolation(format!(
                "registry size {} but {} nodes reachable",
                self.size, count
            )));
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNALS
    // ═══════════════════════════════════════════════════════════════════════════

    fn verify<S: IcrSource + ?Sized>(
        &self,
        owner: &Address,
        icr: u64,
        prev: Option<Address>,
        next: Option<Address>,
        source: &S,
    ) -> Result<()> {
        let stale = |reason: &str| -> Result<()> { Err(Error::StaleHint(format!("{}: {}", owner.short(), reason))) };

        if prev.as_ref() == Some(owner) || next.as_ref() == Some(owner) {
            return stale("hint names the position itself");
        }

        match (prev, next) {
            (None, None) => {
                if self.head.is_some() {
                    return stale("list is not empty");
                }
            }
            (None, Some(n)) => {
                if self.head != Some(n) {
                    return stale("next is not the head");
                }
            }
            (Some(p), None) => {
                if self.tail != Some(p) {
                    return stale("prev is not the tail");
                }
            }
            (Some(p), Some(n)) => {
                let (Some(p_node), Some(n_node)) = (self.nodes.get(&p), self.nodes.get(&n)) else {
                    return stale("neighbour not in registry");
                };
                if p_node.next != Some(n) || n_node.prev != Some(p) {
                    return stale("neighbours are not adjacent");
                }
            }
        }

        if let Some(p) = prev {
            if source.icr(&p)? > icr {
                return stale("prev has a higher ICR");
            }
        }
        if let Some(n) = next {
            if source.icr(&n)? < icr {
                return stale("next has a lower ICR");
            }
        }
        Ok(())
    }

    fn link(&mut self, owner: Address, prev: Option<Address>, next: Option<Address>, icr: u64) {
        match prev {
            Some(p) => self.set_next(&p, Some(owner)),
            None => self.head = Some(owner),
        }
        match next {
            Some(n) => self.set_prev(&n, Some(owner)),
            None => self.tail = Some(owner),
        }
        self.nodes.insert(owner, Node { prev, next, icr });
        self.size += 1;
    }

    fn set_next(&mut self, owner: &Address, next: Option<Address>) {
        if let Some(node) = self.nodes.get_mut(owner) {
            node.next = next;
        }
    }

    fn set_prev(&mut self, owner: &Address, prev: Option<Address>) {
        if let Some(node) = self.nodes.get_mut(owner) {
            node.prev = prev;
        }
    }
}

/// Head-to-tail iterator over owners
pub struct Iter<'a> {
    registry: &'a SortedPositions,
    cursor: Option<Address>,
}

impl Iterator for Iter<'_> {
    type Item = Address;

    fn next(&mut self) -> Option<Address> {
        let current = self.cursor?;
        self.cursor = self.registry.next_of(&current);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    struct Icrs(HashMap<Address, u64>);

    impl IcrSource for Icrs {
        fn icr(&self, owner: &Address) -> Result<u64> {
            self.0
                .get(owner)
                .copied()
                .ok_or_else(|| Error::PositionNotFound(owner.short()))
        }
    }

    fn addr(i: u8) -> Address {
        Address::new([i; 32])
    }

    fn build(icrs: &[(u8, u64)]) -> (SortedPositions, Icrs) {
        let source = Icrs(icrs.iter().map(|&(i, icr)| (addr(i), icr)).collect());
        let mut list = SortedPositions::new();
        for &(i, icr) in icrs {
            let hint = list.find_insert_position(icr, None, &source).unwrap();
            list.insert(addr(i), Some(hint), &source).unwrap();
        }
        (list, source)
    }

    #[test]
    fn test_insert_with_hints() {
        let (list, _) = build(&[(1, 200), (2, 150), (3, 300)]);
        let order: Vec<Address> = list.iter().collect();
        assert_eq!(order, vec![addr(2), addr(1), addr(3)]);
        assert_eq!(list.head(), Some(addr(2)));
        assert_eq!(list.tail(), Some(addr(3)));
        assert_eq!(list.len(), 3);
        list.validate_links().unwrap();
    }

    #[test]
    fn test_omitted_hint_inserts_at_head() {
        let (mut list, mut source) = build(&[(1, 200)]);
        source.0.insert(addr(2), 120);
        list.insert(addr(2), None, &source).unwrap();
        assert_eq!(list.head(), Some(addr(2)));

        // Higher than the head, so "insert at head" no longer holds
        source.0.insert(addr(3), 500);
        assert!(matches!(list.insert(addr(3), None, &source), Err(Error::StaleHint(_))));
    }

    #[test]
    fn test_stale_hint_leaves_registry_unchanged() {
        let (mut list, mut source) = build(&[(1, 100), (2, 200), (3, 300)]);
        let before = list.clone();
        source.0.insert(addr(4), 250);

        // Ordering violated: 250 does not belong between 100 and 200
        let bad = NeighborHint::new(Some(addr(1)), Some(addr(2)));
        assert!(matches!(list.insert(addr(4), Some(bad), &source), Err(Error::StaleHint(_))));
        assert_eq!(list, before);

        // Not adjacent
        let gap = NeighborHint::new(Some(addr(1)), Some(addr(3)));
        assert!(matches!(list.insert(addr(4), Some(gap), &source), Err(Error::StaleHint(_))));
        assert_eq!(list, before);

        // Boundary mismatch
        let wrong_tail = NeighborHint::new(Some(addr(2)), None);
        assert!(list.insert(addr(4), Some(wrong_tail), &source).is_err());
        assert_eq!(list, before);

        let good = NeighborHint::new(Some(addr(2)), Some(addr(3)));
        list.insert(addr(4), Some(good), &source).unwrap();
        assert_eq!(list.len(), 4);
    }

    #[test]
    fn test_equal_icr_goes_after_existing() {
        let (list, _) = build(&[(1, 150), (2, 150), (3, 150)]);
        let order: Vec<Address> = list.iter().collect();
        assert_eq!(order, vec![addr(1), addr(2), addr(3)]);
    }

    #[test]
    fn test_remove_relinks_neighbours() {
        let (mut list, _) = build(&[(1, 100), (2, 200), (3, 300)]);
        list.remove(&addr(2)).unwrap();
        assert_eq!(list.node(&addr(1)).unwrap().next, Some(addr(3)));
        assert_eq!(list.node(&addr(3)).unwrap().prev, Some(addr(1)));
        list.remove(&addr(1)).unwrap();
        list.remove(&addr(3)).unwrap();
        assert!(list.is_empty());
        assert_eq!(list.head(), None);
        assert_eq!(list.tail(), None);
        assert!(list.remove(&addr(3)).is_err());
    }

    #[test]
    fn test_reinsert_restores_on_stale_hint() {
        let (mut list, mut source) = build(&[(1, 100), (2, 200), (3, 300)]);
        let before = list.clone();
        source.0.insert(addr(1), 400);

        let stale = NeighborHint::new(Some(addr(2)), Some(addr(3)));
        assert!(list.reinsert_on_update(addr(1), Some(stale), &source).is_err());
        assert_eq!(list, before);

        let hint = list.find_insert_position(400, Some(&addr(1)), &source).unwrap();
        assert_eq!(hint, NeighborHint::new(Some(addr(3)), None));
        list.reinsert_on_update(addr(1), Some(hint), &source).unwrap();
        assert_eq!(list.tail(), Some(addr(1)));
        assert!(list.is_sorted(&source).unwrap());
    }

    #[test]
    fn test_resettle_walks_both_ways() {
        let (mut list, mut source) = build(&[(1, 100), (2, 200), (3, 300), (4, 400)]);
        source.0.insert(addr(3), 150);
        list.resettle(addr(3), &source).unwrap();
        assert!(list.is_sorted(&source).unwrap());

        source.0.insert(addr(1), 350);
        list.resettle(addr(1), &source).unwrap();
        let order: Vec<Address> = list.iter().collect();
        assert_eq!(order, vec![addr(3), addr(2), addr(1), addr(4)]);
        list.validate_links().unwrap();
    }

    proptest! {
        #[test]
        fn prop_registry_stays_sorted(
            icrs in proptest::collection::vec(0u64..1_000, 1..40),
            removals in proptest::collection::vec(any::<prop::sample::Index>(), 0..20),
        ) {
            let entries: Vec<(u8, u64)> = icrs.iter().enumerate().map(|(i, &icr)| (i as u8, icr)).collect();
            let (mut list, source) = build(&entries);
            prop_assert!(list.is_sorted(&source).unwrap());
            prop_assert_eq!(list.len(), entries.len());

            for index in removals {
                let owners: Vec<Address> = list.iter().collect();
                if owners.is_empty() {
                    break;
                }
                list.remove(&owners[index.index(owners.len())]).unwrap();
                prop_assert!(list.is_sorted(&source).unwrap());
                prop_assert!(list.validate_links().is_ok());
            }
        }
    }
}
