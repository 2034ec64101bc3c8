//! Transient resource lifetimes and memory aliasing.
//!
//! Every transient resource lives from the first to the last scheduled pass
//! that touches it. Resources whose lifetimes do not overlap may share the
//! same memory block, provided the earlier one is guaranteed to be finished
//! on the GPU before the later one starts. Every pass that used the earlier
//! resource must either run on the queue of the later one's first pass, where
//! the aliasing barrier covers it, or reach that pass through a dependency
//! chain.
//!
//! Placement is greedy, in order of first use, largest first:
//!
//! 1. a compatible block of exactly the resource's size class,
//! 2. otherwise the smallest compatible block that fits,
//! 3. otherwise a new block of the size class, capped at the maximum block size.
//!
//! Resources larger than the maximum block size, or arriving once the block
//! limit is reached, get dedicated memory.

use crate::config::TransientLimits;
use crate::error::CompileError;
use crate::graph::{MemoryClass, PassId, PassNode, ResourceId, ResourceNode};

use super::schedule::{Reachability, Schedule};

/// Scheduled span of a transient resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifetime {
    /// Position of the first pass using the resource.
    pub first: usize,
    /// Position of the last pass using the resource.
    pub last: usize,
    /// First pass using the resource.
    pub first_pass: PassId,
    /// Last pass using the resource.
    pub last_pass: PassId,
}

impl Lifetime {
    /// Check if the two spans share any scheduled position.
    pub fn overlaps(&self, other: &Lifetime) -> bool {
        self.first <= other.last && other.first <= self.last
    }
}

/// Where a transient resource's memory comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// At offset zero of a shared block.
    Aliased { block: usize },
    /// Its own allocation.
    Dedicated,
}

/// A memory block shared by resources with disjoint lifetimes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBlock {
    /// Heap class of every resident.
    pub class: MemoryClass,
    /// Block size in bytes.
    pub size: u64,
    /// Alignment of the block.
    pub alignment: u64,
    /// Resources placed in the block, in order of first use.
    pub residents: Vec<ResourceId>,
}

/// Memory assignment for all transient resources of a graph.
#[derive(Debug, Clone, Default)]
pub struct AliasingPlan {
    lifetimes: Vec<Option<Lifetime>>,
    placements: Vec<Option<Placement>>,
    blocks: Vec<MemoryBlock>,
    predecessors: Vec<Vec<ResourceId>>,
    users: Vec<Vec<PassId>>,
    dedicated_bytes: u64,
    requested_bytes: u64,
}

impl AliasingPlan {
    /// Lifetime of a transient resource used by a live pass.
    pub fn lifetime(&self, resource: ResourceId) -> Option<Lifetime> {
        self.lifetimes.get(resource.index()).copied().flatten()
    }

    /// Placement of a transient resource used by a live pass.
    pub fn placement(&self, resource: ResourceId) -> Option<Placement> {
        self.placements.get(resource.index()).copied().flatten()
    }

    /// Shared memory blocks.
    pub fn blocks(&self) -> &[MemoryBlock] {
        &self.blocks
    }

    /// Live passes touching a transient, in schedule order.
    pub fn users(&self, resource: ResourceId) -> &[PassId] {
        self.users
            .get(resource.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Earlier residents of the block a resource was placed in.
    pub fn predecessors(&self, resource: ResourceId) -> &[ResourceId] {
        self.predecessors
            .get(resource.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Check if two resources were placed in the same block.
    pub fn shares_memory(&self, a: ResourceId, b: ResourceId) -> bool {
        matches!(
            (self.placement(a), self.placement(b)),
            (Some(Placement::Aliased { block: x }), Some(Placement::Aliased { block: y })) if x == y
        )
    }

    /// Bytes held by shared blocks.
    pub fn block_bytes(&self) -> u64 {
        self.blocks.iter().map(|b| b.size).sum()
    }

    /// Bytes held by dedicated allocations.
    pub fn dedicated_bytes(&self) -> u64 {
        self.dedicated_bytes
    }

    /// Total transient memory the graph needs.
    pub fn total_bytes(&self) -> u64 {
        self.block_bytes() + self.dedicated_bytes
    }

    /// Memory the graph would need without aliasing.
    pub fn requested_bytes(&self) -> u64 {
        self.requested_bytes
    }
}

/// Compute lifetimes of all used transients and assign their memory.
pub(crate) fn plan(
    resources: &[ResourceNode],
    passes: &[PassNode],
    schedule: &Schedule,
    reach: &Reachability,
    limits: &TransientLimits,
) -> Result<AliasingPlan, CompileError> {
    let mut plan = AliasingPlan {
        lifetimes: vec![None; resources.len()],
        placements: vec![None; resources.len()],
        predecessors: vec![Vec::new(); resources.len()],
        users: vec![Vec::new(); resources.len()],
        ..Default::default()
    };

    for (position, &pass) in schedule.order.iter().enumerate() {
        for access in &passes[pass.index()].accesses {
            if !resources[access.resource.index()].is_transient() {
                continue;
            }
            let users = &mut plan.users[access.resource.index()];
            if users.last() != Some(&pass) {
                users.push(pass);
            }
            let slot = &mut plan.lifetimes[access.resource.index()];
            match slot {
                Some(lifetime) => {
                    lifetime.last = position;
                    lifetime.last_pass = pass;
                }
                None => {
                    *slot = Some(Lifetime {
                        first: position,
                        last: position,
                        first_pass: pass,
                        last_pass: pass,
                    })
                }
            }
        }
    }

    let mut order: Vec<(ResourceId, Lifetime, u64)> = resources
        .iter()
        .filter_map(|r| {
            let lifetime = plan.lifetimes[r.id().index()]?;
            let req = r.memory_requirements()?;
            Some((r.id(), lifetime, req.size))
        })
        .collect();
    order.sort_by_key(|&(id, lifetime, size)| (lifetime.first, std::cmp::Reverse(size), id));

    for &(id, lifetime, _) in &order {
        let Some(req) = resources[id.index()].memory_requirements() else {
            continue;
        };
        plan.requested_bytes += req.size;

        if !limits.aliasing || req.size > limits.max_block_size {
            plan.dedicate(id, req.size);
            continue;
        }

        let queue = passes[lifetime.first_pass.index()].queue;
        let can_follow = |resident: ResourceId| {
            plan.lifetimes[resident.index()].is_some_and(|earlier| earlier.last < lifetime.first)
                && plan.users[resident.index()].iter().all(|&user| {
                    passes[user.index()].queue == queue || reach.reaches(user, lifetime.first_pass)
                })
        };
        let compatible: Vec<usize> = plan
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| {
                block.class == req.class
                    && block.size >= req.size
                    && block.alignment >= req.alignment
                    && block.residents.iter().all(|&r| can_follow(r))
            })
            .map(|(index, _)| index)
            .collect();

        let exact = compatible
            .iter()
            .copied()
            .find(|&b| plan.blocks[b].size.next_power_of_two() == req.size_class());
        let best = compatible
            .iter()
            .copied()
            .min_by_key(|&b| (plan.blocks[b].size, b));

        let block = match exact.or(best) {
            Some(block) => block,
            None if limits.max_blocks.is_some_and(|max| plan.blocks.len() >= max) => {
                log::debug!(
                    "FrameGraph: block limit reached, '{}' gets dedicated memory",
                    resources[id.index()].name()
                );
                plan.dedicate(id, req.size);
                continue;
            }
            None => {
                plan.blocks.push(MemoryBlock {
                    class: req.class,
                    size: req.size_class().min(limits.max_block_size).max(req.size),
                    alignment: req.alignment,
                    residents: Vec::new(),
                });
                plan.blocks.len() - 1
            }
        };

        plan.predecessors[id.index()] = plan.blocks[block].residents.clone();
        plan.blocks[block].residents.push(id);
        plan.placements[id.index()] = Some(Placement::Aliased { block });
    }

    let required = plan.total_bytes();
    if let Some(budget) = limits.memory_budget
        && required > budget
    {
        log::error!("FrameGraph: transient memory {required} exceeds budget {budget}");
        return Err(CompileError::TransientExhaustion { required, budget });
    }

    crate::profile_plot!("framegraph transient bytes", required);
    Ok(plan)
}

impl AliasingPlan {
    fn dedicate(&mut self, resource: ResourceId, size: u64) {
        self.placements[resource.index()] = Some(Placement::Dedicated);
        self.dedicated_bytes += size;
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::compiler::schedule::schedule;
    use crate::graph::{
        AccessType, DependencyEdge, Hazard, PassAccess, PassKind, QueueType, ResourceKind,
        ResourceOrigin, ResourceUsage, SyncKind,
    };
    use crate::types::{BufferDescriptor, BufferUsage};

    const KIB: u64 = 1024;

    fn buffer(id: u32, size: u64) -> ResourceNode {
        ResourceNode::new(
            ResourceId::new(id),
            format!("b{id}"),
            ResourceKind::Buffer(BufferDescriptor::new(size, BufferUsage::STORAGE)),
            ResourceOrigin::Transient,
            ResourceUsage::STORAGE,
        )
    }

    /// One compute pass per entry, touching the listed resources.
    fn chain(uses: &[&[u32]]) -> Vec<PassNode> {
        uses.iter()
            .enumerate()
            .map(|(i, resources)| {
                let mut node =
                    PassNode::new(PassId::new(i as u32), PassKind::Compute, format!("p{i}"));
                node.accesses = resources
                    .iter()
                    .map(|&r| PassAccess {
                        resource: ResourceId::new(r),
                        access: AccessType::StorageReadWrite,
                        via_group: None,
                    })
                    .collect();
                node
            })
            .collect()
    }

    fn ordering(producer: usize, consumer: usize) -> DependencyEdge {
        DependencyEdge {
            producer: PassId::new(producer as u32),
            consumer: PassId::new(consumer as u32),
            resource: None,
            hazard: Hazard::Ordering,
            producer_access: None,
            consumer_access: None,
            sync: SyncKind::Barrier,
        }
    }

    fn run(
        resources: &[ResourceNode],
        passes: &[PassNode],
        edges: &[DependencyEdge],
        limits: &TransientLimits,
    ) -> Result<AliasingPlan, CompileError> {
        let live = vec![true; passes.len()];
        let schedule = schedule(passes, &live, edges).unwrap();
        let reach = Reachability::new(&schedule, edges, passes.len());
        plan(resources, passes, &schedule, &reach, limits)
    }

    fn linear(n: usize) -> Vec<DependencyEdge> {
        (1..n).map(|i| ordering(i - 1, i)).collect()
    }

    #[test]
    fn test_disjoint_lifetimes_share_block() {
        let resources = vec![buffer(0, 4 * KIB), buffer(1, 4 * KIB)];
        let passes = chain(&[&[0], &[0], &[1]]);
        let plan = run(&resources, &passes, &linear(3), &TransientLimits::default()).unwrap();

        assert_eq!(plan.blocks().len(), 1);
        assert!(plan.shares_memory(ResourceId::new(0), ResourceId::new(1)));
        assert_eq!(plan.predecessors(ResourceId::new(1)), &[ResourceId::new(0)]);
        assert_eq!(plan.total_bytes(), 4 * KIB);
        assert_eq!(plan.requested_bytes(), 8 * KIB);
    }

    #[test]
    fn test_overlapping_lifetimes_never_share() {
        let resources = vec![buffer(0, 4 * KIB), buffer(1, 4 * KIB), buffer(2, 4 * KIB)];
        let passes = chain(&[&[0], &[0, 1], &[1], &[2]]);
        let plan = run(&resources, &passes, &linear(4), &TransientLimits::default()).unwrap();

        assert!(!plan.shares_memory(ResourceId::new(0), ResourceId::new(1)));
        for a in 0..3 {
            for b in (a + 1)..3 {
                let (a, b) = (ResourceId::new(a), ResourceId::new(b));
                if plan.shares_memory(a, b) {
                    let (la, lb) = (plan.lifetime(a).unwrap(), plan.lifetime(b).unwrap());
                    assert!(!la.overlaps(&lb));
                }
            }
        }
    }

    #[test]
    fn test_exact_size_class_preferred() {
        let resources = vec![
            buffer(0, 64 * KIB),
            buffer(1, 4 * KIB),
            buffer(2, 4 * KIB),
        ];
        let passes = chain(&[&[0, 1], &[2]]);
        let plan = run(&resources, &passes, &linear(2), &TransientLimits::default()).unwrap();

        // Both blocks could hold b2; the 4 KiB one matches its size class.
        assert!(plan.shares_memory(ResourceId::new(1), ResourceId::new(2)));
        assert!(!plan.shares_memory(ResourceId::new(0), ResourceId::new(2)));
    }

    #[test]
    fn test_unordered_queues_do_not_alias() {
        let resources = vec![buffer(0, 4 * KIB), buffer(1, 4 * KIB)];
        let mut passes = chain(&[&[0], &[1]]);
        passes[1].queue = QueueType::Compute;

        let plan = run(&resources, &passes, &[], &TransientLimits::default()).unwrap();
        assert!(!plan.shares_memory(ResourceId::new(0), ResourceId::new(1)));

        let limits = TransientLimits::default();
        let plan = run(&resources, &passes, &[ordering(0, 1)], &limits).unwrap();
        assert!(plan.shares_memory(ResourceId::new(0), ResourceId::new(1)));
    }

    #[test]
    fn test_every_reader_must_precede_alias() {
        // p0 writes b0, p1 (graphics) and p2 (compute) read it, p3 (compute) writes b1.
        let resources = vec![buffer(0, 4 * KIB), buffer(1, 4 * KIB)];
        let mut passes = chain(&[&[0], &[0], &[0], &[1]]);
        passes[1].queue = QueueType::Graphics;
        for i in [0, 2, 3] {
            passes[i].queue = QueueType::Compute;
        }
        let reads = [ordering(0, 1), ordering(0, 2)];

        let plan = run(&resources, &passes, &reads, &TransientLimits::default()).unwrap();
        assert_eq!(
            plan.users(ResourceId::new(0)),
            &[PassId::new(0), PassId::new(1), PassId::new(2)]
        );
        assert!(!plan.shares_memory(ResourceId::new(0), ResourceId::new(1)));

        let mut ordered = reads.to_vec();
        ordered.push(ordering(1, 3));
        let plan = run(&resources, &passes, &ordered, &TransientLimits::default()).unwrap();
        assert!(plan.shares_memory(ResourceId::new(0), ResourceId::new(1)));
    }

    #[rstest]
    #[case::aliasing_disabled(TransientLimits { aliasing: false, ..Default::default() })]
    #[case::oversized(TransientLimits { max_block_size: 2 * KIB, ..Default::default() })]
    #[case::no_blocks(TransientLimits { max_blocks: Some(0), ..Default::default() })]
    fn test_dedicated_fallback(#[case] limits: TransientLimits) {
        let resources = vec![buffer(0, 4 * KIB), buffer(1, 4 * KIB)];
        let passes = chain(&[&[0], &[1]]);
        let plan = run(&resources, &passes, &linear(2), &limits).unwrap();

        assert!(plan.blocks().is_empty());
        assert_eq!(plan.placement(ResourceId::new(0)), Some(Placement::Dedicated));
        assert_eq!(plan.dedicated_bytes(), 8 * KIB);
    }

    #[test]
    fn test_budget_exhaustion() {
        let resources = vec![buffer(0, 4 * KIB), buffer(1, 4 * KIB)];
        let passes = chain(&[&[0, 1]]);
        let limits = TransientLimits {
            memory_budget: Some(6 * KIB),
            ..Default::default()
        };
        let err = run(&resources, &passes, &[], &limits).unwrap_err();
        assert_eq!(
            err,
            CompileError::TransientExhaustion {
                required: 8 * KIB,
                budget: 6 * KIB,
            }
        );
    }

    #[test]
    fn test_unused_transient_has_no_lifetime() {
        let resources = vec![buffer(0, 4 * KIB), buffer(1, 4 * KIB)];
        let passes = chain(&[&[0]]);
        let plan = run(&resources, &passes, &[], &TransientLimits::default()).unwrap();
        assert!(plan.lifetime(ResourceId::new(1)).is_none());
        assert!(plan.placement(ResourceId::new(1)).is_none());
    }
}
