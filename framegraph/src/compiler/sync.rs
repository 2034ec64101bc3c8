//! Barrier, queue ownership and semaphore planning.
//!
//! The planner walks the schedule once, tracking for every resource the last
//! write, the stages that read it since, and its current layout and queue:
//!
//! - Same queue: a pipeline barrier before the consuming pass, only when a
//!   write must be made visible, a read must finish before an overwrite, or
//!   the layout changes. Reads in stages that already see the last write need
//!   nothing.
//! - Different queue: a release after the previous pass, a matching acquire
//!   before the consumer and a semaphore between them.
//! - First use: imported resources transition from their declared state;
//!   transients start undefined, or wait for everything the resources that
//!   used the same memory before them did on this queue.
//!
//! Presentation surfaces additionally wait for the acquire semaphore at their
//! first pass and end in [`ResourceState::PRESENT`] after their last.

use std::collections::HashMap;

use crate::graph::{
    AccessFlags, DependencyEdge, Hazard, ImageLayout, JourneyStep, PassId, PassNode,
    PipelineStages, QueueType, ResourceId, ResourceNode, ResourceState,
};

use super::lifetime::AliasingPlan;
use super::schedule::Schedule;

/// A semaphore between two passes on different queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SemaphoreId(u32);

impl SemaphoreId {
    /// Dense index into the graph's semaphores.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// A semaphore a submission waits on or signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemaphoreRef {
    /// Cross-queue dependency inside the graph.
    Graph(SemaphoreId),
    /// Signalled when the surface image is acquired.
    SurfaceAcquired(ResourceId),
    /// Signalled when rendering to the surface is done; presentation waits on it.
    RenderFinished(ResourceId),
}

/// Why a barrier exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierKind {
    /// Hazard or layout change between two uses of the same resource.
    Transition,
    /// First use of memory previously occupied by another resource.
    Aliasing,
    /// Transition to the presentable state.
    Present,
}

/// A memory barrier on one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Barrier {
    pub resource: ResourceId,
    pub kind: BarrierKind,
    pub src: ResourceState,
    pub dst: ResourceState,
}

/// Barriers recorded together in one pipeline barrier command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BarrierBatch {
    src_stages: PipelineStages,
    dst_stages: PipelineStages,
    barriers: Vec<Barrier>,
}

impl BarrierBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a barrier, merging it with an existing one on the same resource.
    pub fn add(&mut self, barrier: Barrier) {
        self.src_stages |= barrier.src.stages.or_top();
        self.dst_stages |= barrier.dst.stages.or_bottom();
        match self
            .barriers
            .iter_mut()
            .find(|b| b.resource == barrier.resource)
        {
            Some(existing) => {
                existing.src.access |= barrier.src.access;
                existing.src.stages |= barrier.src.stages;
                existing.dst.access |= barrier.dst.access;
                existing.dst.stages |= barrier.dst.stages;
                existing.dst.layout = barrier.dst.layout;
            }
            None => self.barriers.push(barrier),
        }
    }

    /// Union of the source stages.
    pub fn src_stages(&self) -> PipelineStages {
        self.src_stages
    }

    /// Union of the destination stages.
    pub fn dst_stages(&self) -> PipelineStages {
        self.dst_stages
    }

    pub fn barriers(&self) -> &[Barrier] {
        &self.barriers
    }

    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.barriers.len()
    }
}

/// Ownership transfer of a resource between queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueTransfer {
    pub resource: ResourceId,
    pub src_queue: QueueType,
    pub dst_queue: QueueType,
    /// Pass after which the source queue releases the resource.
    pub release_after: PassId,
    /// Pass before which the destination queue acquires it.
    pub acquire_before: PassId,
    pub src: ResourceState,
    pub dst: ResourceState,
    /// Semaphore ordering the release before the acquire.
    pub semaphore: SemaphoreId,
}

/// A semaphore wait and the stages it blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreWait {
    pub semaphore: SemaphoreRef,
    pub stages: PipelineStages,
}

/// Execution-only dependency for an explicit ordering on one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionBarrier {
    pub src_stages: PipelineStages,
    pub dst_stages: PipelineStages,
}

/// Synchronization around one scheduled pass.
///
/// Recorded in this order: acquires, barriers, execution barrier, the pass,
/// releases, trailing barriers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSync {
    /// Indices into [`SyncPlan::transfers`] acquired before the pass.
    pub acquires: Vec<usize>,
    pub barriers: BarrierBatch,
    pub execution: Option<ExecutionBarrier>,
    /// Indices into [`SyncPlan::transfers`] released after the pass.
    pub releases: Vec<usize>,
    pub trailing: BarrierBatch,
    /// Semaphores the pass's submission waits on.
    pub waits: Vec<SemaphoreWait>,
    /// Semaphores signalled once the pass completes.
    pub signals: Vec<SemaphoreRef>,
}

impl PassSync {
    fn wait(&mut self, semaphore: SemaphoreRef, stages: PipelineStages) {
        match self.waits.iter_mut().find(|w| w.semaphore == semaphore) {
            Some(wait) => wait.stages |= stages,
            None => self.waits.push(SemaphoreWait { semaphore, stages }),
        }
    }

    fn signal(&mut self, semaphore: SemaphoreRef) {
        if !self.signals.contains(&semaphore) {
            self.signals.push(semaphore);
        }
    }
}

/// Acquire and present bookkeeping for a presentation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfacePlan {
    pub resource: ResourceId,
    /// First pass touching the surface; waits on the acquire semaphore.
    pub first_pass: PassId,
    /// Last pass touching the surface; signals the render-finished semaphore.
    pub last_pass: PassId,
    /// Queue presenting the surface.
    pub queue: QueueType,
}

/// Consecutive passes of one queue recorded into one command buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionBatch {
    pub queue: QueueType,
    /// Scheduled positions, ascending.
    pub passes: Vec<usize>,
    pub waits: Vec<SemaphoreWait>,
    pub signals: Vec<SemaphoreRef>,
}

/// All synchronization of a compiled graph.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    passes: Vec<PassSync>,
    transfers: Vec<QueueTransfer>,
    semaphore_count: usize,
    surfaces: Vec<SurfacePlan>,
    submissions: Vec<SubmissionBatch>,
}

impl SyncPlan {
    /// Synchronization of the pass at a scheduled position.
    pub fn pass(&self, position: usize) -> Option<&PassSync> {
        self.passes.get(position)
    }

    pub fn passes(&self) -> &[PassSync] {
        &self.passes
    }

    pub fn transfers(&self) -> &[QueueTransfer] {
        &self.transfers
    }

    /// Number of cross-queue semaphores.
    pub fn semaphore_count(&self) -> usize {
        self.semaphore_count
    }

    pub fn surfaces(&self) -> &[SurfacePlan] {
        &self.surfaces
    }

    /// Submissions in the order they are issued.
    pub fn submissions(&self) -> &[SubmissionBatch] {
        &self.submissions
    }

    /// Total number of resource barriers, trailing ones included.
    pub fn barrier_count(&self) -> usize {
        self.passes
            .iter()
            .map(|p| p.barriers.len() + p.trailing.len())
            .sum()
    }
}

#[derive(Debug, Clone, Default)]
struct Tracked {
    owner: Option<QueueType>,
    layout: ImageLayout,
    last_write: Option<ResourceState>,
    /// Stages that read the resource since the last write.
    reads: PipelineStages,
    /// Stages the last write is visible to.
    visible: PipelineStages,
    first: Option<(PassId, usize, PipelineStages)>,
    last: Option<(PassId, usize, QueueType)>,
    /// Every access and stage the resource saw, per queue.
    used_on: [(AccessFlags, PipelineStages); 3],
}

impl Tracked {
    /// Everything a following barrier must wait for.
    fn pending(&self) -> ResourceState {
        ResourceState {
            access: self
                .last_write
                .map_or(AccessFlags::empty(), |w| w.access.writes()),
            stages: self
                .last_write
                .map_or(PipelineStages::empty(), |w| w.stages)
                | self.reads,
            layout: self.layout,
        }
    }

    fn after_write(&mut self, state: ResourceState) {
        self.last_write = Some(state);
        self.reads = PipelineStages::empty();
        self.visible = PipelineStages::empty();
    }
}

struct Planner<'a> {
    aliasing: &'a AliasingPlan,
    tracked: Vec<Tracked>,
    sync: Vec<PassSync>,
    transfers: Vec<QueueTransfer>,
    semaphores: HashMap<(PassId, PassId), SemaphoreId>,
}

impl Planner<'_> {
    fn semaphore(
        &mut self,
        (producer, producer_pos): (PassId, usize),
        (consumer, consumer_pos): (PassId, usize),
        stages: PipelineStages,
    ) -> SemaphoreId {
        let next = SemaphoreId(self.semaphores.len() as u32);
        let id = *self.semaphores.entry((producer, consumer)).or_insert(next);
        self.sync[producer_pos].signal(SemaphoreRef::Graph(id));
        self.sync[consumer_pos].wait(SemaphoreRef::Graph(id), stages);
        id
    }

    fn first_use(
        &mut self,
        node: &ResourceNode,
        position: usize,
        queue: QueueType,
        state: ResourceState,
    ) {
        let resource = node.id();
        let image = node.kind().is_image();

        let barrier = if node.is_transient() {
            let mut src = ResourceState::UNDEFINED;
            let mut aliased = false;
            for &previous in self.aliasing.predecessors(resource) {
                let (access, stages) = self.tracked[previous.index()].used_on[queue.index()];
                if !stages.is_empty() {
                    src.access |= access.writes();
                    src.stages |= stages;
                    aliased = true;
                }
            }
            if aliased {
                Some(Barrier {
                    resource,
                    kind: BarrierKind::Aliasing,
                    src,
                    dst: state,
                })
            } else if image && state.layout != ImageLayout::Undefined {
                Some(Barrier {
                    resource,
                    kind: BarrierKind::Transition,
                    src,
                    dst: state,
                })
            } else {
                None
            }
        } else {
            let initial = node.journey().initial();
            let needed = (image && initial.layout != state.layout)
                || initial.is_write()
                || (state.is_write() && !initial.stages.is_empty());
            needed.then_some(Barrier {
                resource,
                kind: BarrierKind::Transition,
                src: initial,
                dst: state,
            })
        };
        if let Some(barrier) = barrier {
            self.sync[position].barriers.add(barrier);
        }

        let tracked = &mut self.tracked[resource.index()];
        tracked.owner = Some(queue);
        tracked.layout = state.layout;
        if state.is_write() {
            tracked.after_write(state);
        } else {
            let initial = node.journey().initial();
            tracked.last_write = initial.is_write().then_some(initial);
            tracked.reads = state.stages;
            tracked.visible = state.stages;
        }
    }

    fn same_queue(
        &mut self,
        resource: ResourceId,
        position: usize,
        image: bool,
        state: ResourceState,
    ) {
        let tracked = &mut self.tracked[resource.index()];
        let layout_change = image && tracked.layout != state.layout;

        if state.is_write() || layout_change {
            let src = tracked.pending();
            if layout_change || !src.stages.is_empty() {
                self.sync[position].barriers.add(Barrier {
                    resource,
                    kind: BarrierKind::Transition,
                    src,
                    dst: state,
                });
            }
            tracked.layout = state.layout;
            if state.is_write() {
                tracked.after_write(state);
            } else {
                tracked.reads |= state.stages;
                tracked.visible = state.stages;
            }
            return;
        }

        if let Some(write) = tracked.last_write
            && !tracked.visible.contains(state.stages)
        {
            self.sync[position].barriers.add(Barrier {
                resource,
                kind: BarrierKind::Transition,
                src: ResourceState {
                    access: write.access.writes(),
                    stages: write.stages,
                    layout: tracked.layout,
                },
                dst: state,
            });
            tracked.visible |= state.stages;
        }
        tracked.reads |= state.stages;
    }

    fn transfer(
        &mut self,
        resource: ResourceId,
        (pass, position): (PassId, usize),
        queue: QueueType,
        state: ResourceState,
    ) {
        let tracked = &self.tracked[resource.index()];
        let (Some(src_queue), Some((previous, previous_pos, _))) = (tracked.owner, tracked.last)
        else {
            return;
        };
        let src = tracked.pending();

        let semaphore = self.semaphore((previous, previous_pos), (pass, position), state.stages);
        let index = self.transfers.len();
        self.transfers.push(QueueTransfer {
            resource,
            src_queue,
            dst_queue: queue,
            release_after: previous,
            acquire_before: pass,
            src,
            dst: state,
            semaphore,
        });
        self.sync[previous_pos].releases.push(index);
        self.sync[position].acquires.push(index);

        let tracked = &mut self.tracked[resource.index()];
        tracked.owner = Some(queue);
        tracked.layout = state.layout;
        if state.is_write() {
            tracked.after_write(state);
        } else {
            tracked.last_write = tracked.last_write.map(|w| ResourceState {
                stages: state.stages,
                ..w
            });
            tracked.reads = state.stages;
            tracked.visible = state.stages;
        }
    }
}

/// Combined state of every access a pass makes to each resource.
fn pass_states(resources: &[ResourceNode], pass: &PassNode) -> Vec<(ResourceId, ResourceState)> {
    let mut states: Vec<(ResourceId, ResourceState)> = Vec::new();
    for access in &pass.accesses {
        let image = resources[access.resource.index()].kind().is_image();
        let state = access.access.state(pass.kind, image);
        match states.iter_mut().find(|(r, _)| *r == access.resource) {
            Some((_, existing)) => {
                if let Some(merged) = existing.merge(state) {
                    *existing = merged;
                }
            }
            None => states.push((access.resource, state)),
        }
    }
    states
}

/// Plan all synchronization and record every resource's journey.
pub(crate) fn plan(
    resources: &mut [ResourceNode],
    passes: &[PassNode],
    schedule: &Schedule,
    edges: &[DependencyEdge],
    aliasing: &AliasingPlan,
) -> SyncPlan {
    let count = schedule.order.len();
    for resource in resources.iter_mut() {
        resource.journey_mut().reset(count);
    }

    let mut planner = Planner {
        aliasing,
        tracked: vec![Tracked::default(); resources.len()],
        sync: vec![PassSync::default(); count],
        transfers: Vec::new(),
        semaphores: HashMap::new(),
    };

    for (position, &pass) in schedule.order.iter().enumerate() {
        let node = &passes[pass.index()];
        let queue = node.queue;
        for (resource, state) in pass_states(resources, node) {
            let image = resources[resource.index()].kind().is_image();
            match planner.tracked[resource.index()].owner {
                None => planner.first_use(&resources[resource.index()], position, queue, state),
                Some(owner) if owner == queue => {
                    planner.same_queue(resource, position, image, state)
                }
                Some(_) => planner.transfer(resource, (pass, position), queue, state),
            }

            let tracked = &mut planner.tracked[resource.index()];
            if tracked.first.is_none() {
                tracked.first = Some((pass, position, state.stages));
            }
            tracked.last = Some((pass, position, queue));
            let used = &mut tracked.used_on[queue.index()];
            used.0 |= state.access;
            used.1 |= state.stages;
            resources[resource.index()]
                .journey_mut()
                .record(position, JourneyStep { pass, queue, state });
        }
    }

    for edge in edges.iter().filter(|e| e.hazard == Hazard::Ordering) {
        let (Some(producer_pos), Some(consumer_pos)) =
            (schedule.position(edge.producer), schedule.position(edge.consumer))
        else {
            continue;
        };
        if passes[edge.producer.index()].queue == passes[edge.consumer.index()].queue {
            planner.sync[consumer_pos].execution = Some(ExecutionBarrier {
                src_stages: PipelineStages::all(),
                dst_stages: PipelineStages::all(),
            });
        } else {
            planner.semaphore(
                (edge.producer, producer_pos),
                (edge.consumer, consumer_pos),
                PipelineStages::all(),
            );
        }
    }

    let mut surfaces = Vec::new();
    for resource in resources.iter_mut().filter(|r| r.is_swapchain()) {
        let tracked = &planner.tracked[resource.id().index()];
        let (Some((first_pass, first_pos, first_stages)), Some((last_pass, last_pos, queue))) =
            (tracked.first, tracked.last)
        else {
            continue;
        };

        planner.sync[last_pos].trailing.add(Barrier {
            resource: resource.id(),
            kind: BarrierKind::Present,
            src: tracked.pending(),
            dst: ResourceState::PRESENT,
        });
        planner.sync[first_pos].wait(SemaphoreRef::SurfaceAcquired(resource.id()), first_stages);
        planner.sync[last_pos].signal(SemaphoreRef::RenderFinished(resource.id()));
        resource.journey_mut().set_final_state(ResourceState::PRESENT);

        surfaces.push(SurfacePlan {
            resource: resource.id(),
            first_pass,
            last_pass,
            queue,
        });
    }

    let submissions = batch_submissions(passes, schedule, &planner.sync);
    SyncPlan {
        passes: planner.sync,
        transfers: planner.transfers,
        semaphore_count: planner.semaphores.len(),
        surfaces,
        submissions,
    }
}

/// Split each queue's passes into submissions.
///
/// A submission starts at a pass that waits on a semaphore and ends after a
/// pass that signals one, so every wait is preceded by its signal in issue order.
fn batch_submissions(
    passes: &[PassNode],
    schedule: &Schedule,
    sync: &[PassSync],
) -> Vec<SubmissionBatch> {
    let mut batches = Vec::new();
    for queue in QueueType::ALL {
        let mut current: Option<SubmissionBatch> = None;
        for (position, &pass) in schedule.order.iter().enumerate() {
            if passes[pass.index()].queue != queue {
                continue;
            }
            let pass_sync = &sync[position];
            if !pass_sync.waits.is_empty()
                && let Some(batch) = current.take()
            {
                batches.push(batch);
            }
            let batch = current.get_or_insert_with(|| SubmissionBatch {
                queue,
                passes: Vec::new(),
                waits: Vec::new(),
                signals: Vec::new(),
            });
            batch.passes.push(position);
            batch.waits.extend(pass_sync.waits.iter().copied());
            if !pass_sync.signals.is_empty() {
                batch.signals.extend(pass_sync.signals.iter().copied());
                batches.extend(current.take());
            }
        }
        batches.extend(current);
    }
    batches.sort_by_key(|batch: &SubmissionBatch| batch.passes.first().copied());
    batches
}
