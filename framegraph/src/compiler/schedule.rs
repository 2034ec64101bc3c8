//! Global pass ordering and per-queue partitions.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::error::CompileError;
use crate::graph::{DependencyEdge, PassId, PassNode, QueueType};

/// The passes one queue executes, in schedule order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePartition {
    queue: QueueType,
    passes: Vec<PassId>,
}

impl QueuePartition {
    /// The queue.
    pub fn queue(&self) -> QueueType {
        self.queue
    }

    /// Passes in submission order.
    pub fn passes(&self) -> &[PassId] {
        &self.passes
    }
}

/// Result of ordering the live passes.
#[derive(Debug, Clone)]
pub(crate) struct Schedule {
    /// Live passes in global order.
    pub order: Vec<PassId>,
    /// Scheduled position of every pass, `None` when culled.
    pub positions: Vec<Option<usize>>,
    /// Non-empty per-queue partitions.
    pub partitions: Vec<QueuePartition>,
}

impl Schedule {
    pub fn position(&self, pass: PassId) -> Option<usize> {
        self.positions.get(pass.index()).copied().flatten()
    }
}

/// Order the live passes topologically.
///
/// Kahn's algorithm; among ready passes the one declared first runs first, so
/// the result is a pure function of the declaration.
pub(crate) fn schedule(
    passes: &[PassNode],
    live: &[bool],
    edges: &[DependencyEdge],
) -> Result<Schedule, CompileError> {
    let n = passes.len();
    let mut in_degree = vec![0u32; n];
    let mut successors: Vec<Vec<PassId>> = vec![Vec::new(); n];
    for edge in edges {
        in_degree[edge.consumer.index()] += 1;
        successors[edge.producer.index()].push(edge.consumer);
    }

    let mut ready: BinaryHeap<Reverse<PassId>> = passes
        .iter()
        .filter(|p| live[p.id.index()] && in_degree[p.id.index()] == 0)
        .map(|p| Reverse(p.id))
        .collect();

    let live_count = live.iter().filter(|&&l| l).count();
    let mut order = Vec::with_capacity(live_count);
    let mut positions = vec![None; n];

    while let Some(Reverse(pass)) = ready.pop() {
        positions[pass.index()] = Some(order.len());
        order.push(pass);
        for &succ in &successors[pass.index()] {
            in_degree[succ.index()] -= 1;
            if in_degree[succ.index()] == 0 {
                ready.push(Reverse(succ));
            }
        }
    }

    if order.len() != live_count {
        let passes: Vec<String> = passes
            .iter()
            .filter(|p| live[p.id.index()] && positions[p.id.index()].is_none())
            .map(|p| p.name.clone())
            .collect();
        log::error!("FrameGraph: dependency cycle through {passes:?}");
        return Err(CompileError::CyclicDependency { passes });
    }

    let partitions = QueueType::ALL
        .iter()
        .map(|&queue| QueuePartition {
            queue,
            passes: order
                .iter()
                .copied()
                .filter(|p| passes[p.index()].queue == queue)
                .collect(),
        })
        .filter(|partition| !partition.passes.is_empty())
        .collect();

    Ok(Schedule {
        order,
        positions,
        partitions,
    })
}

/// Transitive "happens before" over the scheduled passes.
///
/// One ancestor bitset per pass, built in schedule order.
#[derive(Debug, Clone)]
pub(crate) struct Reachability {
    ancestors: Vec<Vec<u64>>,
}

impl Reachability {
    pub fn new(schedule: &Schedule, edges: &[DependencyEdge], pass_count: usize) -> Self {
        let words = pass_count.div_ceil(64).max(1);
        let mut predecessors: Vec<Vec<PassId>> = vec![Vec::new(); pass_count];
        for edge in edges {
            predecessors[edge.consumer.index()].push(edge.producer);
        }

        let mut ancestors = vec![vec![0u64; words]; pass_count];
        for &pass in &schedule.order {
            let mut bits = vec![0u64; words];
            for &pred in &predecessors[pass.index()] {
                for (word, pred_word) in bits.iter_mut().zip(&ancestors[pred.index()]) {
                    *word |= *pred_word;
                }
                bits[pred.index() / 64] |= 1 << (pred.index() % 64);
            }
            ancestors[pass.index()] = bits;
        }

        Self { ancestors }
    }

    /// Check if `from` is guaranteed to complete before `to` starts.
    pub fn reaches(&self, from: PassId, to: PassId) -> bool {
        if from == to {
            return true;
        }
        self.ancestors
            .get(to.index())
            .is_some_and(|bits| bits[from.index() / 64] & (1 << (from.index() % 64)) != 0)
    }
}
