//! Cycle detection over the local unit graph.

use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;

/// Tracks the visitation state of a node during cycle detection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum VisitState {
    Visiting,
    Visited,
}

/// Return the first cycle found, walking nodes in insertion order.
///
/// The cycle is rotated so that it starts at its smallest path and repeats
/// that path at the end.
pub(super) fn find_cycle(edges: &IndexMap<Utf8PathBuf, Vec<Utf8PathBuf>>) -> Option<Vec<Utf8PathBuf>> {
    let mut detector = CycleDetector::new(edges);
    for node in edges.keys() {
        if detector.is_visited(node) {
            continue;
        }
        if let Some(found) = detector.visit(node) {
            return Some(found);
        }
    }
    None
}

struct CycleDetector<'a> {
    edges: &'a IndexMap<Utf8PathBuf, Vec<Utf8PathBuf>>,
    stack: Vec<&'a Utf8Path>,
    states: HashMap<&'a Utf8Path, VisitState>,
}

impl<'a> CycleDetector<'a> {
    fn new(edges: &'a IndexMap<Utf8PathBuf, Vec<Utf8PathBuf>>) -> Self {
        Self {
            edges,
            stack: Vec::new(),
            states: HashMap::new(),
        }
    }

    fn is_visited(&self, node: &Utf8Path) -> bool {
        matches!(self.states.get(node), Some(VisitState::Visited))
    }

    fn visit(&mut self, node: &'a Utf8Path) -> Option<Vec<Utf8PathBuf>> {
        match self.states.get(node) {
            Some(VisitState::Visited) => return None,
            Some(VisitState::Visiting) => {
                let idx = self.stack.iter().position(|n| *n == node).unwrap_or(0);
                let mut cycle: Vec<Utf8PathBuf> = self
                    .stack
                    .iter()
                    .skip(idx)
                    .map(|n| (*n).to_owned())
                    .collect();
                cycle.push(node.to_owned());
                return Some(canonicalize_cycle(cycle));
            }
            None => {
                self.states.insert(node, VisitState::Visiting);
            }
        }

        self.stack.push(node);
        let edges = self.edges;
        if let Some(deps) = edges.get(node) {
            for dep in deps {
                if let Some(cycle) = self.visit(dep) {
                    return Some(cycle);
                }
            }
        }
        self.stack.pop();
        self.states.insert(node, VisitState::Visited);
        None
    }
}

fn canonicalize_cycle(mut cycle: Vec<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    if cycle.len() < 2 {
        return cycle;
    }
    let len = cycle.len() - 1;
    let start = cycle
        .iter()
        .take(len)
        .enumerate()
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .map_or(0, |(idx, _)| idx);
    let (prefix, suffix) = cycle.split_at_mut(len);
    prefix.rotate_left(start);
    if let (Some(first), Some(slot)) = (prefix.first().cloned(), suffix.first_mut()) {
        slot.clone_from(&first);
    }
    cycle
}
