//! Common utilities for frame graph integration tests.
//!
//! Provides a [`TestContext`] bundling a context with the dummy backend,
//! queue setups for parameterized tests, and checks shared by the property
//! tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use redlilium_framegraph::compiler::Placement;
use redlilium_framegraph::graph::{Hazard, SyncKind};
use redlilium_framegraph::{
    CacheKey, CompiledGraph, DummyBackend, DummyEvent, FrameGraphBuilder, FrameGraphConfig,
    FrameGraphContext, FrameGraphError, FrameStatus, GraphBegin, PassContext, PassId,
    QueueSupport, QueueType, ResourceId, SemaphoreRef,
};

/// Route log output through the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Queue Setups
// ============================================================================

/// Hardware queue configurations the tests run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queues {
    /// Everything on the graphics queue.
    GraphicsOnly,
    /// Graphics plus an async compute queue.
    AsyncCompute,
    /// Graphics, async compute and a dedicated transfer queue.
    All,
}

impl Queues {
    pub fn support(self) -> QueueSupport {
        match self {
            Queues::GraphicsOnly => QueueSupport::GRAPHICS_ONLY,
            Queues::AsyncCompute => QueueSupport {
                async_compute: true,
                dedicated_transfer: false,
            },
            Queues::All => QueueSupport::default(),
        }
    }

    pub fn config(self) -> FrameGraphConfig {
        FrameGraphConfig::default().with_queues(self.support())
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// A frame graph context driving the dummy backend.
pub struct TestContext {
    pub ctx: FrameGraphContext,
    pub backend: DummyBackend,
}

impl TestContext {
    pub fn new(config: FrameGraphConfig) -> Self {
        init_logging();
        Self {
            ctx: FrameGraphContext::new(config),
            backend: DummyBackend::new(),
        }
    }

    /// Begin `slot` under `key`, declaring with `declare` on a cache miss.
    ///
    /// Returns the graph and whether it came from the cache.
    pub fn graph<F>(
        &mut self,
        slot: &str,
        key: CacheKey,
        declare: F,
    ) -> Result<(Arc<CompiledGraph>, bool), FrameGraphError>
    where
        F: FnOnce(&mut FrameGraphBuilder<'_>),
    {
        match self.ctx.begin_graph(slot, key) {
            GraphBegin::Cached(graph) => Ok((graph, true)),
            GraphBegin::Declare(mut builder) => {
                declare(&mut builder);
                Ok((builder.end_graph()?, false))
            }
        }
    }

    /// Execute one frame with a unit payload.
    pub fn execute(&mut self, graph: &CompiledGraph) -> FrameStatus {
        self.ctx
            .execute(&mut self.backend, graph, &())
            .expect("dummy backend never fails unless told to")
    }
}

/// A task that records nothing.
pub fn noop(_: &mut PassContext<'_>) {}

/// A task that records a marker with the pass name.
pub fn mark(ctx: &mut PassContext<'_>) {
    let name = ctx.name();
    ctx.encoder().marker(name);
}

/// Names of the passes the backend saw, in recording order.
pub fn recorded_passes(events: &[DummyEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            DummyEvent::BeginPass { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Property Checks
// ============================================================================

/// Every edge goes from an earlier to a later scheduled pass.
pub fn assert_topological(graph: &CompiledGraph) {
    for edge in graph.edges() {
        let producer = graph.position(edge.producer).expect("edge producer is live");
        let consumer = graph.position(edge.consumer).expect("edge consumer is live");
        assert!(
            producer < consumer,
            "edge {:?} -> {:?} runs backwards ({producer} >= {consumer})",
            edge.producer,
            edge.consumer
        );
    }
}

/// Passes whose completion `pass` waits on through graph semaphores, transitively
/// along each queue's submission order.
fn semaphore_ancestors(graph: &CompiledGraph) -> HashMap<usize, HashSet<usize>> {
    let batches = graph.submissions();
    let mut signaller = HashMap::new();
    for batch in batches {
        for signal in &batch.signals {
            signaller.insert(*signal, batch);
        }
    }

    let mut ancestors: HashMap<usize, HashSet<usize>> = HashMap::new();
    let mut queue_prefix: HashMap<QueueType, HashSet<usize>> = HashMap::new();
    for batch in batches {
        let mut before = queue_prefix.get(&batch.queue).cloned().unwrap_or_default();
        for wait in &batch.waits {
            if let SemaphoreRef::Graph(_) = wait.semaphore {
                let producer = signaller
                    .get(&wait.semaphore)
                    .expect("every waited semaphore is signalled");
                for &position in &producer.passes {
                    before.insert(position);
                    before.extend(ancestors.get(&position).into_iter().flatten().copied());
                }
            }
        }
        for &position in &batch.passes {
            ancestors.insert(position, before.clone());
            before.insert(position);
        }
        queue_prefix.insert(batch.queue, before);
    }
    ancestors
}

/// Every edge is covered by planned synchronization: a barrier or an
/// ownership acquire in front of the consumer on the same queue, a semaphore
/// chain across queues.
pub fn assert_edges_synchronized(graph: &CompiledGraph) {
    let ancestors = semaphore_ancestors(graph);
    for edge in graph.edges() {
        let producer = graph.position(edge.producer).expect("live producer");
        let consumer = graph.position(edge.consumer).expect("live consumer");
        match edge.sync {
            SyncKind::Barrier => {
                let sync = graph.sync().pass(consumer).expect("sync for every pass");
                let covered = match edge.resource {
                    Some(resource) => {
                        synchronizes(graph, consumer, resource)
                            || edge.hazard == Hazard::ReadAfterWrite
                                && (producer + 1..consumer)
                                    .any(|position| synchronizes(graph, position, resource))
                    }
                    None => sync.execution.is_some(),
                };
                assert!(
                    covered,
                    "same-queue edge {:?} -> {:?} has no barrier",
                    edge.producer, edge.consumer
                );
            }
            SyncKind::QueueTransfer => {
                assert!(
                    ancestors[&consumer].contains(&producer),
                    "cross-queue edge {:?} -> {:?} is not ordered by semaphores",
                    edge.producer,
                    edge.consumer
                );
            }
        }
    }
}

/// Check if a barrier or ownership acquire for `resource` precedes the pass at `position`.
fn synchronizes(graph: &CompiledGraph, position: usize, resource: ResourceId) -> bool {
    graph.sync().pass(position).is_some_and(|sync| {
        sync.barriers.barriers().iter().any(|b| b.resource == resource)
            || sync
                .acquires
                .iter()
                .any(|&t| graph.sync().transfers()[t].resource == resource)
    })
}

/// Transients sharing a memory block never have overlapping lifetimes, and
/// every pass that used an earlier resident is ordered before the first use
/// of a later one: on the same queue, or through a semaphore chain.
pub fn assert_aliasing_disjoint(graph: &CompiledGraph) {
    let plan = graph.aliasing();
    let ancestors = semaphore_ancestors(graph);
    for block in plan.blocks() {
        for (i, &a) in block.residents.iter().enumerate() {
            for &b in &block.residents[i + 1..] {
                let la = plan.lifetime(a).expect("resident has a lifetime");
                let lb = plan.lifetime(b).expect("resident has a lifetime");
                assert!(
                    !la.overlaps(&lb),
                    "{a:?} {la:?} and {b:?} {lb:?} share a block while both alive"
                );

                let queue = graph.passes()[lb.first].queue();
                for &user in plan.users(a) {
                    let position = graph.position(user).expect("users are live");
                    let ordered = graph.passes()[position].queue() == queue
                        || ancestors[&lb.first].contains(&position);
                    assert!(
                        ordered,
                        "{user:?} touches {a:?} unordered before {b:?} reuses its memory"
                    );
                }
            }
        }
    }
    for resource in graph.resources() {
        if let Some(Placement::Aliased { block }) = plan.placement(resource.id()) {
            assert!(plan.blocks()[block].residents.contains(&resource.id()));
        }
    }
}

/// Handle of a resource by name.
pub fn resource_id(graph: &CompiledGraph, name: &str) -> ResourceId {
    graph
        .resources()
        .iter()
        .find(|r| r.name() == name)
        .map(|r| r.id())
        .unwrap_or_else(|| panic!("no resource named '{name}'"))
}

/// Scheduled position of a pass by name.
pub fn position_of(graph: &CompiledGraph, name: &str) -> Option<usize> {
    graph.passes().iter().position(|p| p.name() == name)
}

/// Handle of a live pass by name.
pub fn pass_id(graph: &CompiledGraph, name: &str) -> PassId {
    graph
        .passes()
        .iter()
        .find(|p| p.name() == name)
        .map(|p| p.id())
        .unwrap_or_else(|| panic!("no live pass named '{name}'"))
}
