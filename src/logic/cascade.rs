use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::model::Id;

/// Breadth-first discovery of an item's descendants along `parent_id` edges.
///
/// The store drives the walk: it fetches the children of [`frontier`] and feeds
/// their ids to [`advance`] until the frontier is empty. Every item has a
/// single parent, so meeting an id twice means the parent links loop; the walk
/// stops with [`Error::CycleDetected`] instead of spinning.
///
/// [`frontier`]: DescendantWalk::frontier
/// [`advance`]: DescendantWalk::advance
#[derive(Debug)]
pub struct DescendantWalk {
    visited: HashSet<Id>,
    ids: Vec<Id>,
    frontier: Vec<Id>,
}

impl DescendantWalk {
    pub fn new(root: Id) -> Self {
        Self {
            visited: HashSet::from([root]),
            ids: vec![root],
            frontier: vec![root],
        }
    }

    pub fn frontier(&self) -> &[Id] {
        &self.frontier
    }

    pub fn is_done(&self) -> bool {
        self.frontier.is_empty()
    }

    pub fn advance(&mut self, children: impl IntoIterator<Item = Id>) -> Result<()> {
        let mut next = Vec::new();
        for child in children {
            if !self.visited.insert(child) {
                return Err(Error::CycleDetected(child));
            }
            self.ids.push(child);
            next.push(child);
        }
        self.frontier = next;
        Ok(())
    }

    /// Root first, then descendants level by level.
    pub fn into_ids(self) -> Vec<Id> {
        self.ids
    }
}
