//! Parent/child dependency resolution for termination ordering

use crate::scanner::ProcessRecord;
use std::collections::{HashMap, HashSet, VecDeque};

/// Parent and children maps built from a single snapshot. Rebuild per
/// snapshot; the process tree changes between scans.
#[derive(Debug, Clone, Default)]
pub struct DependencyIndex {
    parents: HashMap<u32, u32>,
    children: HashMap<u32, Vec<u32>>,
}

impl DependencyIndex {
    pub fn build(processes: &[ProcessRecord]) -> Self {
        Self::from_edges(processes.iter().map(|p| (p.pid, p.ppid)))
    }

    /// Build from `(pid, ppid)` pairs; children keep discovery order.
    pub fn from_edges<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (u32, u32)>,
    {
        let mut index = Self::default();
        for (pid, ppid) in edges {
            index.parents.insert(pid, ppid);
            index.children.entry(ppid).or_default().push(pid);
        }
        index
    }

    pub fn parent_of(&self, pid: u32) -> Option<u32> {
        self.parents.get(&pid).copied()
    }

    pub fn children_of(&self, pid: u32) -> &[u32] {
        self.children.get(&pid).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Breadth-first descendants, shallow before deep. `pid` itself is never
    /// included, even if a stale edge points back at it.
    pub fn descendants_of(&self, pid: u32) -> Vec<u32> {
        let mut result = Vec::new();
        let mut visited = HashSet::from([pid]);
        let mut queue: VecDeque<u32> = self.children_of(pid).iter().copied().collect();

        while let Some(child) = queue.pop_front() {
            if !visited.insert(child) {
                continue;
            }
            result.push(child);
            queue.extend(self.children_of(child));
        }
        result
    }

    /// Descendants deepest-first, then `pid` last.
    pub fn safe_termination_order(&self, pid: u32) -> Vec<u32> {
        let mut order = self.descendants_of(pid);
        order.reverse();
        order.push(pid);
        order
    }

    /// Direct children left without a parent if `pid` goes away.
    pub fn would_orphan(&self, pid: u32) -> &[u32] {
        self.children_of(pid)
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}
