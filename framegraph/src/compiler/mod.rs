//! Frame graph compilation.
//!
//! Turns a [`GraphDeclaration`] into an immutable [`CompiledGraph`] that can
//! be executed any number of times. Compilation runs in fixed stages:
//!
//! 1. **Culling** - passes no sink depends on are removed; disabled passes
//!    never survive. Every transient a live pass reads must have a live
//!    producer, and an unwritten presentation surface gets a clear pass.
//! 2. **Scheduling** - topological order over the surviving edges, ties
//!    broken by declaration order, then per-queue partitions.
//! 3. **Lifetimes and aliasing** - transient memory placement.
//! 4. **Synchronization** - barriers, queue ownership transfers, semaphores
//!    and submission batches, plus every resource's journey.
//!
//! The output depends only on the declaration and the configuration, which is
//! what makes caching compiled graphs by key sound.

mod cull;
mod lifetime;
mod schedule;
mod sync;

pub use lifetime::{AliasingPlan, Lifetime, MemoryBlock, Placement};
pub use schedule::QueuePartition;
pub use sync::{
    Barrier, BarrierBatch, BarrierKind, ExecutionBarrier, PassSync, QueueTransfer, SemaphoreId,
    SemaphoreRef, SemaphoreWait, SubmissionBatch, SurfacePlan, SyncPlan,
};

use crate::cache::CacheKey;
use crate::config::FrameGraphConfig;
use crate::error::CompileError;
use crate::graph::{
    DependencyEdge, GraphDeclaration, PassId, PassNode, ResourceGroup, ResourceId, ResourceNode,
    SyncKind,
};
use crate::profile_scope;

/// An executable frame graph.
///
/// Holds the scheduled passes with their tasks, the resources with their
/// journeys, and every plan the executor follows. Immutable once built.
#[derive(Debug)]
pub struct CompiledGraph {
    id: u64,
    name: String,
    key: CacheKey,
    passes: Vec<PassNode>,
    culled: Vec<PassNode>,
    resources: Vec<ResourceNode>,
    groups: Vec<ResourceGroup>,
    edges: Vec<DependencyEdge>,
    positions: Vec<Option<usize>>,
    partitions: Vec<QueuePartition>,
    aliasing: AliasingPlan,
    sync: SyncPlan,
}

static_assertions::assert_impl_all!(CompiledGraph: Send, Sync);

impl CompiledGraph {
    /// Unique id within the context that compiled it.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Graph name, also its cache slot.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key the graph was compiled under.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Live passes in execution order.
    pub fn passes(&self) -> &[PassNode] {
        &self.passes
    }

    /// Handles of the live passes in execution order.
    pub fn pass_order(&self) -> Vec<PassId> {
        self.passes.iter().map(PassNode::id).collect()
    }

    /// Names of the live passes in execution order.
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(PassNode::name).collect()
    }

    /// Number of live passes.
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Check if no pass survived culling.
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Scheduled position of a pass, `None` if it was culled.
    pub fn position(&self, pass: PassId) -> Option<usize> {
        self.positions.get(pass.index()).copied().flatten()
    }

    /// A pass by handle, live or culled.
    pub fn pass(&self, pass: PassId) -> Option<&PassNode> {
        match self.position(pass) {
            Some(position) => self.passes.get(position),
            None => self.culled.iter().find(|p| p.id() == pass),
        }
    }

    /// Passes removed by culling, in declaration order. Their tasks are dropped.
    pub fn culled_passes(&self) -> &[PassNode] {
        &self.culled
    }

    /// Resources with their journeys.
    pub fn resources(&self) -> &[ResourceNode] {
        &self.resources
    }

    /// A resource by handle.
    pub fn resource(&self, id: ResourceId) -> Option<&ResourceNode> {
        self.resources.get(id.index())
    }

    /// Declared resource groups.
    pub fn groups(&self) -> &[ResourceGroup] {
        &self.groups
    }

    /// Edges between live passes, with their synchronization kind resolved.
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Per-queue pass lists.
    pub fn queue_partitions(&self) -> &[QueuePartition] {
        &self.partitions
    }

    /// Transient memory plan.
    pub fn aliasing(&self) -> &AliasingPlan {
        &self.aliasing
    }

    /// Synchronization plan.
    pub fn sync(&self) -> &SyncPlan {
        &self.sync
    }

    /// Submissions in issue order.
    pub fn submissions(&self) -> &[SubmissionBatch] {
        self.sync.submissions()
    }
}

/// Compile a declaration.
///
/// `id` distinguishes the result from other graphs compiled by the same
/// context; the executor uses it to notice when its realized transients
/// belong to a different graph.
pub fn compile(
    declaration: GraphDeclaration,
    config: &FrameGraphConfig,
    id: u64,
) -> Result<CompiledGraph, CompileError> {
    profile_scope!("frame_graph_compile");

    let GraphDeclaration {
        name,
        key,
        mut resources,
        groups,
        mut passes,
        mut edges,
    } = declaration;

    let mut live = cull::live_passes(&resources, &passes, &edges);
    cull::check_producers(&resources, &passes, &edges, &live)?;
    cull::substitute_surface_writers(&resources, &mut passes, &mut edges, &mut live);

    for pass in &mut passes {
        pass.queue = config.queues.resolve(pass.kind);
    }

    edges.retain(|e| live[e.producer.index()] && live[e.consumer.index()]);
    for edge in &mut edges {
        edge.sync = if passes[edge.producer.index()].queue == passes[edge.consumer.index()].queue {
            SyncKind::Barrier
        } else {
            SyncKind::QueueTransfer
        };
    }

    let schedule = schedule::schedule(&passes, &live, &edges)?;
    let reach = schedule::Reachability::new(&schedule, &edges, passes.len());
    let aliasing = lifetime::plan(&resources, &passes, &schedule, &reach, &config.transient)?;
    let sync = sync::plan(&mut resources, &passes, &schedule, &edges, &aliasing);

    let mut slots: Vec<Option<PassNode>> = passes.into_iter().map(Some).collect();
    let mut scheduled = Vec::with_capacity(schedule.order.len());
    for (position, pass) in schedule.order.iter().enumerate() {
        if let Some(mut node) = slots[pass.index()].take() {
            node.order = Some(position);
            scheduled.push(node);
        }
    }
    let culled: Vec<PassNode> = slots
        .into_iter()
        .flatten()
        .map(|mut node| {
            node.culled = true;
            node.task = None;
            node
        })
        .collect();

    log::debug!(
        "FrameGraph '{name}' compiled: {} passes ({} culled), {} edges, {} barriers, \
         {} queue transfers, {} submissions, transient memory {} of {} bytes",
        scheduled.len(),
        culled.len(),
        edges.len(),
        sync.barrier_count(),
        sync.transfers().len(),
        sync.submissions().len(),
        aliasing.total_bytes(),
        aliasing.requested_bytes(),
    );

    Ok(CompiledGraph {
        id,
        name,
        key,
        passes: scheduled,
        culled,
        resources,
        groups,
        edges,
        positions: schedule.positions,
        partitions: schedule.partitions,
        aliasing,
        sync,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QueueSupport, TransientLimits};
    use crate::executor::PassContext;
    use crate::graph::{
        AccessType, DependencyBuilder, ExternalHandle, PassAccess, PassKind, QueueType,
        ResourceKind, ResourceOrigin, ResourceState, ResourceUsage,
    };
    use crate::types::{BufferDescriptor, BufferUsage, TextureFormat};

    fn declaration(
        resources: Vec<ResourceNode>,
        mut passes: Vec<PassNode>,
        orderings: &[(u32, u32)],
    ) -> GraphDeclaration {
        let mut deps = DependencyBuilder::new();
        for p in &mut passes {
            p.task = Some(Box::new(|_: &mut PassContext<'_>| {}));
            let reads: Vec<_> = p
                .accesses
                .iter()
                .filter(|a| a.access.is_read())
                .copied()
                .collect();
            let writes: Vec<_> = p
                .accesses
                .iter()
                .filter(|a| a.access.is_write())
                .copied()
                .collect();
            deps.add_pass(p.id, &reads, &writes).unwrap();
        }
        for &(before, after) in orderings {
            deps.add_ordering(PassId::new(before), PassId::new(after));
        }
        GraphDeclaration {
            name: "test".to_string(),
            key: CacheKey::from("k"),
            resources,
            groups: Vec::new(),
            passes,
            edges: deps.into_edges(),
        }
    }

    fn buffer(id: u32) -> ResourceNode {
        ResourceNode::new(
            ResourceId::new(id),
            format!("b{id}"),
            ResourceKind::Buffer(BufferDescriptor::new(1024, BufferUsage::STORAGE)),
            ResourceOrigin::Transient,
            ResourceUsage::STORAGE,
        )
    }

    fn surface(id: u32) -> ResourceNode {
        ResourceNode::new(
            ResourceId::new(id),
            "surface",
            ResourceKind::Swapchain {
                format: TextureFormat::Bgra8UnormSrgb,
                width: 32,
                height: 32,
            },
            ResourceOrigin::Imported {
                handle: ExternalHandle(1),
                initial: ResourceState::ACQUIRED,
            },
            ResourceUsage::RENDER_TARGET | ResourceUsage::STORAGE | ResourceUsage::PRESENT,
        )
    }

    fn pass(id: u32, kind: PassKind, accesses: &[(u32, AccessType)]) -> PassNode {
        let mut node = PassNode::new(PassId::new(id), kind, format!("p{id}"));
        node.accesses = accesses
            .iter()
            .map(|&(resource, access)| PassAccess {
                resource: ResourceId::new(resource),
                access,
                via_group: None,
            })
            .collect();
        node
    }

    #[test]
    fn test_compile_empty_graph() {
        let compiled = compile(
            declaration(Vec::new(), Vec::new(), &[]),
            &FrameGraphConfig::default(),
            1,
        )
        .unwrap();
        assert!(compiled.is_empty());
        assert!(compiled.submissions().is_empty());
        assert_eq!(compiled.id(), 1);
    }

    #[test]
    fn test_culled_pass_kept_for_inspection() {
        let resources = vec![buffer(0), buffer(1), surface(2)];
        let passes = vec![
            pass(0, PassKind::Compute, &[(0, AccessType::StorageWrite)]),
            pass(1, PassKind::Compute, &[(1, AccessType::StorageWrite)]),
            pass(
                2,
                PassKind::Render,
                &[(0, AccessType::StorageRead), (2, AccessType::ColorAttachmentWrite)],
            ),
        ];
        let compiled = compile(
            declaration(resources, passes, &[]),
            &FrameGraphConfig::default(),
            1,
        )
        .unwrap();

        assert_eq!(compiled.pass_names(), vec!["p0", "p2"]);
        let culled = compiled.pass(PassId::new(1)).unwrap();
        assert!(culled.is_culled());
        assert!(!culled.has_task());
        assert_eq!(compiled.position(PassId::new(2)), Some(1));
        assert_eq!(compiled.passes()[1].order(), Some(1));
    }

    #[test]
    fn test_queue_resolution_marks_cross_queue_edges() {
        let resources = vec![buffer(0), surface(1)];
        let passes = vec![
            pass(0, PassKind::Compute, &[(0, AccessType::StorageWrite)]),
            pass(
                1,
                PassKind::Render,
                &[(0, AccessType::StorageRead), (1, AccessType::ColorAttachmentWrite)],
            ),
        ];

        let compiled = compile(
            declaration(resources.clone(), passes, &[]),
            &FrameGraphConfig::default(),
            1,
        )
        .unwrap();
        assert_eq!(compiled.passes()[0].queue(), QueueType::Compute);
        assert_eq!(compiled.edges()[0].sync, SyncKind::QueueTransfer);

        let passes = vec![
            pass(0, PassKind::Compute, &[(0, AccessType::StorageWrite)]),
            pass(
                1,
                PassKind::Render,
                &[(0, AccessType::StorageRead), (1, AccessType::ColorAttachmentWrite)],
            ),
        ];
        let config = FrameGraphConfig::default().with_queues(QueueSupport::GRAPHICS_ONLY);
        let compiled = compile(declaration(resources, passes, &[]), &config, 2).unwrap();
        assert_eq!(compiled.passes()[0].queue(), QueueType::Graphics);
        assert_eq!(compiled.edges()[0].sync, SyncKind::Barrier);
        assert!(compiled.sync().transfers().is_empty());
    }

    #[test]
    fn test_cycle_from_explicit_dependency() {
        let resources = vec![buffer(0), surface(1)];
        let passes = vec![
            pass(0, PassKind::Compute, &[(0, AccessType::StorageWrite)]),
            pass(
                1,
                PassKind::Render,
                &[(0, AccessType::StorageRead), (1, AccessType::ColorAttachmentWrite)],
            ),
        ];
        let err = compile(
            declaration(resources, passes, &[(1, 0)]),
            &FrameGraphConfig::default(),
            1,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::CyclicDependency { .. }));
    }

    #[test]
    fn test_surface_without_writer_gets_clear_pass() {
        let resources = vec![surface(0)];
        let mut passes = vec![pass(0, PassKind::Render, &[(0, AccessType::ColorAttachmentWrite)])];
        passes[0].enabled = false;
        let compiled = compile(
            declaration(resources, passes, &[]),
            &FrameGraphConfig::default(),
            1,
        )
        .unwrap();

        assert_eq!(compiled.pass_count(), 1);
        assert!(compiled.passes()[0].is_substitute());
        assert_eq!(compiled.sync().surfaces().len(), 1);
    }

    #[test]
    fn test_exhaustion_reported() {
        let resources = vec![buffer(0), surface(1)];
        let passes = vec![
            pass(0, PassKind::Compute, &[(0, AccessType::StorageWrite)]),
            pass(
                1,
                PassKind::Render,
                &[(0, AccessType::StorageRead), (1, AccessType::ColorAttachmentWrite)],
            ),
        ];
        let config = FrameGraphConfig::default().with_transient_limits(TransientLimits {
            memory_budget: Some(512),
            ..Default::default()
        });
        let err = compile(declaration(resources, passes, &[]), &config, 1).unwrap_err();
        assert_eq!(
            err,
            CompileError::TransientExhaustion {
                required: 1024,
                budget: 512,
            }
        );
    }
}
