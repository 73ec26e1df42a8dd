//! The population table (spec.md §3.3): a contiguous, tagged partition of
//! the `NodeId` space, plus the set of `(src_pop, dst_pop)` pairs a
//! projection is allowed to exist between.

use std::collections::HashSet;

use crate::error::Error;
use crate::ids::{NodeId, Pop};
use crate::Result;

/// A contiguous, half-open range of `NodeId`s tagged with a population.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopRange {
    pub start: NodeId,
    pub count: u32,
    pub pop: Pop,
}

impl PopRange {
    pub fn end(&self) -> NodeId {
        NodeId::new(self.start.get() + self.count)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        node >= self.start && node < self.end()
    }
}

/// The ordered, disjoint list of population ranges plus the admissible
/// `(src_pop, dst_pop)` pairs and the human-readable name of each `Pop`.
#[derive(Debug, Clone, Default)]
pub struct PopTable {
    ranges: Vec<PopRange>,
    names: Vec<(Pop, String)>,
    admissible_pairs: HashSet<(Pop, Pop)>,
}

impl PopTable {
    pub fn new() -> Self {
        PopTable::default()
    }

    /// Appends a range, validating spec.md §3.3's invariant (ranges
    /// disjoint and sorted by `start`) as it goes.
    pub fn push_range(&mut self, range: PopRange, name: impl Into<String>) -> Result<()> {
        if let Some(last) = self.ranges.last() {
            if range.start < last.end() {
                return Err(Error::invariant(format!(
                    "population range for pop {:?} starting at {} overlaps the previous \
                     range ending at {}",
                    range.pop,
                    range.start,
                    last.end()
                )));
            }
        }
        self.ranges.push(range);
        self.names.push((range.pop, name.into()));
        Ok(())
    }

    pub fn allow_pair(&mut self, src_pop: Pop, dst_pop: Pop) {
        self.admissible_pairs.insert((src_pop, dst_pop));
    }

    pub fn is_pair_admissible(&self, src_pop: Pop, dst_pop: Pop) -> bool {
        self.admissible_pairs.contains(&(src_pop, dst_pop))
    }

    /// Validates `(src_pop, dst_pop)` is admissible, returning
    /// `PopulationPairForbidden` otherwise (spec.md §4.E.2, "Admissibility
    /// check").
    pub fn check_pair(&self, src_pop: Pop, dst_pop: Pop) -> Result<()> {
        if self.is_pair_admissible(src_pop, dst_pop) {
            Ok(())
        } else {
            Err(Error::forbidden_pair(src_pop, dst_pop))
        }
    }

    pub fn name_of(&self, pop: Pop) -> Option<&str> {
        self.names.iter().find(|(p, _)| *p == pop).map(|(_, n)| n.as_str())
    }

    pub fn range_of(&self, pop: Pop) -> Option<PopRange> {
        self.ranges.iter().copied().find(|r| r.pop == pop)
    }

    /// The population owning `node`, if any (a binary search over the
    /// sorted, disjoint ranges).
    pub fn pop_of_node(&self, node: NodeId) -> Option<Pop> {
        let idx = self.ranges.partition_point(|r| r.end() <= node);
        self.ranges.get(idx).filter(|r| r.contains(node)).map(|r| r.pop)
    }

    pub fn ranges(&self) -> &[PopRange] {
        &self.ranges
    }
}
