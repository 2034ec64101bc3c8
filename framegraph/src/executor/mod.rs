//! Frame execution.
//!
//! The [`FrameExecutor`] replays a [`CompiledGraph`] against a
//! [`GraphBackend`]: it binds physical resources, applies the planned
//! synchronization around every pass, invokes the pass tasks, submits each
//! queue's batches with their semaphores and presents the surfaces.
//!
//! # Frame Lifecycle
//!
//! ```text
//! wait slot fences ─► realize transients ─► acquire surfaces ─► record + submit ─► present
//!                     (only on graph change)    │
//!                                               └─ AcquireError: frame skipped
//! ```

mod physical;
mod sync;

pub use sync::{Fence, FenceStatus};

use std::any::Any;

use physical::RealizedTransients;

use crate::backend::{
    CommandEncoder, GraphBackend, PhysicalHandle, ResolvedBarrier, ResolvedTransfer, Submission,
};
use crate::compiler::{
    Barrier, CompiledGraph, PassSync, QueueTransfer, SemaphoreRef, SubmissionBatch,
};
use crate::error::{AcquireError, BackendError, FrameGraphError};
use crate::graph::{
    GroupId, PassKind, PassNode, QueueType, ResourceId, ResourceNode, ResourceOrigin,
    ResourceState,
};
use crate::{frame_mark, profile_scope};

/// Color a substitute pass clears an unwritten surface to.
pub const SUBSTITUTE_CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Outcome of executing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// All work was submitted; the graph has no presentation surface.
    Completed,
    /// All work was submitted and every surface presented.
    Presented,
    /// A surface could not be acquired; nothing was recorded or submitted.
    Skipped(AcquireError),
    /// All work was submitted but presenting failed, typically after a resize.
    Outdated(AcquireError),
}

impl FrameStatus {
    /// Check if the frame's work reached the GPU.
    pub fn is_submitted(&self) -> bool {
        !matches!(self, Self::Skipped(_))
    }

    /// The acquisition error, if the surface was unusable this frame.
    pub fn acquire_error(&self) -> Option<AcquireError> {
        match self {
            Self::Skipped(error) | Self::Outdated(error) => Some(*error),
            Self::Completed | Self::Presented => None,
        }
    }
}

/// Everything a pass task can see while it records.
///
/// Lives for one task invocation. The payload is the value passed to
/// [`FrameGraphContext::execute`](crate::FrameGraphContext::execute) for this
/// frame and is never retained.
pub struct PassContext<'a> {
    graph: &'a CompiledGraph,
    pass: &'a PassNode,
    position: usize,
    handles: &'a [Option<PhysicalHandle>],
    encoder: &'a mut dyn CommandEncoder,
    payload: &'a dyn Any,
    frame_index: u64,
}

impl<'a> PassContext<'a> {
    /// Name of the pass being recorded.
    pub fn name(&self) -> &'a str {
        self.pass.name()
    }

    /// Kind of the pass being recorded.
    pub fn kind(&self) -> PassKind {
        self.pass.kind()
    }

    /// Queue the pass is recorded for.
    pub fn queue(&self) -> QueueType {
        self.pass.queue()
    }

    /// Scheduled position of the pass.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of frames executed before this one.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// The graph being executed.
    pub fn graph(&self) -> &'a CompiledGraph {
        self.graph
    }

    /// A resource node of the graph.
    pub fn resource(&self, id: ResourceId) -> Option<&'a ResourceNode> {
        self.graph.resource(id)
    }

    /// Physical handle bound to a resource this frame.
    pub fn physical(&self, id: ResourceId) -> Option<PhysicalHandle> {
        self.handles.get(id.index()).copied().flatten()
    }

    /// Physical handle of a texture or surface.
    pub fn texture(&self, id: ResourceId) -> Option<PhysicalHandle> {
        self.resource(id)
            .filter(|r| r.kind().is_image())
            .and_then(|_| self.physical(id))
    }

    /// Physical handle of a buffer.
    pub fn buffer(&self, id: ResourceId) -> Option<PhysicalHandle> {
        self.resource(id)
            .filter(|r| !r.kind().is_image())
            .and_then(|_| self.physical(id))
    }

    /// Physical handles of a group's members, in binding order.
    pub fn group_targets(&self, group: GroupId) -> Vec<PhysicalHandle> {
        self.graph
            .groups()
            .get(group.index())
            .map(|group| {
                group
                    .members()
                    .iter()
                    .filter_map(|&member| self.physical(member))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// State a resource is in while this pass runs.
    pub fn state(&self, id: ResourceId) -> Option<ResourceState> {
        self.resource(id)?
            .journey()
            .get(self.position)
            .map(|step| step.state)
    }

    /// Command encoder of the submission the pass is recorded into.
    pub fn encoder(&mut self) -> &mut dyn CommandEncoder {
        &mut *self.encoder
    }

    /// The frame's payload, if it has type `T`.
    pub fn payload<T: Any>(&self) -> Option<&'a T> {
        self.payload.downcast_ref::<T>()
    }
}

/// Replays compiled graphs, frame after frame.
#[derive(Debug)]
pub struct FrameExecutor {
    slots: Vec<Vec<Fence>>,
    slot: usize,
    frame_index: u64,
    transients: Option<RealizedTransients>,
}

impl FrameExecutor {
    /// Create an executor keeping up to `frames_in_flight` frames on the GPU.
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            slots: vec![Vec::new(); frames_in_flight.max(1)],
            slot: 0,
            frame_index: 0,
            transients: None,
        }
    }

    /// Number of frames submitted so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Id of the graph whose transients are currently realized.
    pub fn realized_graph(&self) -> Option<u64> {
        self.transients.as_ref().map(RealizedTransients::graph_id)
    }

    /// Execute one frame of `graph`.
    ///
    /// Acquisition and presentation failures are reported through the
    /// returned [`FrameStatus`]; only backend failures are errors.
    pub fn execute(
        &mut self,
        backend: &mut dyn GraphBackend,
        graph: &CompiledGraph,
        payload: &dyn Any,
    ) -> Result<FrameStatus, FrameGraphError> {
        profile_scope!("frame_graph_execute");

        for fence in self.slots[self.slot].drain(..) {
            fence.wait();
        }

        if self.realized_graph() != Some(graph.id()) {
            self.release(backend);
            self.transients = Some(RealizedTransients::realize(backend, graph)?);
        }

        let mut handles = self.bind(graph);

        for surface in graph.sync().surfaces() {
            let Some(external) = graph
                .resource(surface.resource)
                .and_then(ResourceNode::external_handle)
            else {
                continue;
            };
            match backend.acquire_surface(external, SemaphoreRef::SurfaceAcquired(surface.resource))
            {
                Ok(image) => handles[surface.resource.index()] = Some(image),
                Err(error) => {
                    log::warn!(
                        "FrameGraph '{}': skipping frame {}, surface acquisition failed: {error}",
                        graph.name(),
                        self.frame_index
                    );
                    return Ok(FrameStatus::Skipped(error));
                }
            }
        }

        let submissions = graph.submissions();
        let mut last_batch = [None; QueueType::ALL.len()];
        for (index, batch) in submissions.iter().enumerate() {
            last_batch[batch.queue.index()] = Some(index);
        }

        let mut fences = Vec::new();
        let mut unfenced = false;
        for (index, batch) in submissions.iter().enumerate() {
            let last = last_batch[batch.queue.index()] == Some(index);
            let fence = last.then(Fence::new_unsignaled);
            if let Err(error) =
                self.submit_batch(backend, graph, batch, &handles, payload, fence.as_ref())
            {
                log::error!(
                    "FrameGraph '{}': frame {} failed after {index} of {} batches: {error}",
                    graph.name(),
                    self.frame_index,
                    submissions.len()
                );
                self.abandon(backend, fences, unfenced);
                return Err(error.into());
            }
            unfenced |= fence.is_none();
            fences.extend(fence);
        }
        log::trace!(
            "FrameGraph '{}': frame {} submitted in {} batches",
            graph.name(),
            self.frame_index,
            submissions.len()
        );

        let mut status = if graph.sync().surfaces().is_empty() {
            FrameStatus::Completed
        } else {
            FrameStatus::Presented
        };
        for surface in graph.sync().surfaces() {
            let Some(external) = graph
                .resource(surface.resource)
                .and_then(ResourceNode::external_handle)
            else {
                continue;
            };
            if let Err(error) = backend.present(
                external,
                surface.queue,
                SemaphoreRef::RenderFinished(surface.resource),
            ) {
                log::warn!("FrameGraph '{}': present failed: {error}", graph.name());
                status = FrameStatus::Outdated(error);
            }
        }

        self.slots[self.slot] = fences;
        self.slot = (self.slot + 1) % self.slots.len();
        self.frame_index += 1;
        frame_mark!();

        Ok(status)
    }

    /// Fences of submitted work not yet waited on.
    pub fn in_flight(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }

    /// Wait for every frame in flight, then for the device.
    pub fn wait_idle(&mut self, backend: &mut dyn GraphBackend) -> Result<(), BackendError> {
        self.wait_all();
        backend.wait_idle()
    }

    /// Destroy the realized transients, waiting for in-flight frames first.
    pub fn release(&mut self, backend: &mut dyn GraphBackend) {
        if let Some(transients) = self.transients.take() {
            self.wait_all();
            transients.destroy(backend);
        }
    }

    fn submit_batch(
        &self,
        backend: &mut dyn GraphBackend,
        graph: &CompiledGraph,
        batch: &SubmissionBatch,
        handles: &[Option<PhysicalHandle>],
        payload: &dyn Any,
        fence: Option<&Fence>,
    ) -> Result<(), BackendError> {
        let encoder = backend.begin_commands(batch.queue)?;
        self.record_batch(encoder, graph, batch, handles, payload);
        backend.submit(
            &Submission {
                queue: batch.queue,
                waits: &batch.waits,
                signals: &batch.signals,
            },
            fence,
        )
    }

    /// Keep tracking the work of a frame that failed partway through submission.
    ///
    /// Batches submitted without a fence are only covered by a later batch of
    /// their queue, which never went out, so the device is drained instead.
    fn abandon(&mut self, backend: &mut dyn GraphBackend, fences: Vec<Fence>, unfenced: bool) {
        self.slots[self.slot].extend(fences);
        if unfenced && let Err(error) = backend.wait_idle() {
            log::error!("FrameGraph: wait for abandoned frame failed: {error}");
        }
    }

    fn wait_all(&mut self) {
        for fence in self.slots.iter_mut().flat_map(|slot| slot.drain(..)) {
            fence.wait();
        }
    }

    /// Physical handles of every resource except acquired surfaces.
    fn bind(&self, graph: &CompiledGraph) -> Vec<Option<PhysicalHandle>> {
        graph
            .resources()
            .iter()
            .map(|resource| match resource.origin() {
                ResourceOrigin::Transient => self
                    .transients
                    .as_ref()
                    .and_then(|t| t.handle(resource.id())),
                ResourceOrigin::Imported { .. } if resource.is_swapchain() => None,
                ResourceOrigin::Imported { handle, .. } => Some(PhysicalHandle::from(handle)),
            })
            .collect()
    }

    fn record_batch(
        &self,
        encoder: &mut dyn CommandEncoder,
        graph: &CompiledGraph,
        batch: &SubmissionBatch,
        handles: &[Option<PhysicalHandle>],
        payload: &dyn Any,
    ) {
        let empty = PassSync::default();
        for &position in &batch.passes {
            let Some(pass) = graph.passes().get(position) else {
                continue;
            };
            let sync = graph.sync().pass(position).unwrap_or(&empty);

            for &transfer in &sync.acquires {
                if let Some(resolved) = resolve_transfer(graph, handles, transfer) {
                    encoder.acquire_ownership(&resolved);
                }
            }
            if !sync.barriers.is_empty() {
                let barriers = resolve_barriers(graph, handles, sync.barriers.barriers());
                encoder.pipeline_barrier(
                    sync.barriers.src_stages(),
                    sync.barriers.dst_stages(),
                    &barriers,
                );
            }
            if let Some(execution) = sync.execution {
                encoder.execution_barrier(execution.src_stages, execution.dst_stages);
            }

            log::trace!("FrameGraph: recording pass '{}'", pass.name());
            encoder.begin_pass(pass.name(), pass.kind());
            if pass.is_substitute() {
                for access in pass.accesses() {
                    if let Some(texture) = handles[access.resource.index()] {
                        encoder.clear_texture(texture, SUBSTITUTE_CLEAR_COLOR);
                    }
                }
            } else if let Some(task) = &pass.task {
                let mut ctx = PassContext {
                    graph,
                    pass,
                    position,
                    handles,
                    encoder: &mut *encoder,
                    payload,
                    frame_index: self.frame_index,
                };
                task(&mut ctx);
            }
            encoder.end_pass();

            for &transfer in &sync.releases {
                if let Some(resolved) = resolve_transfer(graph, handles, transfer) {
                    encoder.release_ownership(&resolved);
                }
            }
            if !sync.trailing.is_empty() {
                let barriers = resolve_barriers(graph, handles, sync.trailing.barriers());
                encoder.pipeline_barrier(
                    sync.trailing.src_stages(),
                    sync.trailing.dst_stages(),
                    &barriers,
                );
            }
        }
    }
}

fn is_image(graph: &CompiledGraph, resource: ResourceId) -> bool {
    graph
        .resource(resource)
        .is_some_and(|r| r.kind().is_image())
}

fn resolve_barriers(
    graph: &CompiledGraph,
    handles: &[Option<PhysicalHandle>],
    barriers: &[Barrier],
) -> Vec<ResolvedBarrier> {
    barriers
        .iter()
        .filter_map(|barrier| {
            let handle = handles.get(barrier.resource.index()).copied().flatten()?;
            Some(ResolvedBarrier {
                resource: barrier.resource,
                handle,
                is_image: is_image(graph, barrier.resource),
                kind: barrier.kind,
                src: barrier.src,
                dst: barrier.dst,
            })
        })
        .collect()
}

fn resolve_transfer(
    graph: &CompiledGraph,
    handles: &[Option<PhysicalHandle>],
    index: usize,
) -> Option<ResolvedTransfer> {
    let QueueTransfer {
        resource,
        src_queue,
        dst_queue,
        src,
        dst,
        ..
    } = *graph.sync().transfers().get(index)?;
    Some(ResolvedTransfer {
        resource,
        handle: handles.get(resource.index()).copied().flatten()?,
        is_image: is_image(graph, resource),
        src_queue,
        dst_queue,
        src,
        dst,
    })
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, DummyEvent};
    use crate::cache::CacheKey;
    use crate::config::FrameGraphConfig;
    use crate::context::{FrameGraphContext, GraphBegin};
    use crate::graph::{AccessType, ExternalHandle};
    use crate::types::{BufferDescriptor, BufferUsage, TextureFormat};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn present_graph(ctx: &mut FrameGraphContext, calls: Arc<AtomicU32>) -> Arc<CompiledGraph> {
        let GraphBegin::Declare(mut builder) = ctx.begin_graph("frame", CacheKey::from("k")) else {
            panic!("expected a fresh declaration");
        };
        let data = builder.declare_buffer("data", BufferDescriptor::new(256, BufferUsage::empty()));
        let format = TextureFormat::Bgra8Unorm;
        let surface = builder.import_swapchain("surface", ExternalHandle(99), format, 8, 8);

        let mut upload = builder.begin_pass(PassKind::Transfer, "upload");
        upload
            .connect_output(data, AccessType::TransferWrite)
            .unwrap();
        upload.set_task(|ctx: &mut PassContext<'_>| ctx.encoder().marker("upload"));
        upload.end_pass().unwrap();

        let mut draw = builder.begin_pass(PassKind::Render, "draw");
        draw.connect_input(data, AccessType::VertexBuffer).unwrap();
        draw.connect_output(surface, AccessType::ColorAttachmentWrite)
            .unwrap();
        draw.set_task(move |ctx: &mut PassContext<'_>| {
            assert!(ctx.texture(surface).is_some());
            assert!(ctx.buffer(data).is_some());
            assert_eq!(ctx.payload::<u32>(), Some(&7));
            calls.fetch_add(1, Ordering::Relaxed);
        });
        draw.end_pass().unwrap();

        builder.end_graph().unwrap()
    }

    #[test]
    fn test_frame_is_recorded_and_presented() {
        let mut ctx = FrameGraphContext::new(FrameGraphConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let graph = present_graph(&mut ctx, Arc::clone(&calls));

        let mut backend = DummyBackend::new();
        let mut executor = FrameExecutor::new(2);
        let status = executor.execute(&mut backend, &graph, &7u32).unwrap();

        assert_eq!(status, FrameStatus::Presented);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(executor.frame_index(), 1);

        let events = backend.events();
        let acquire = events
            .iter()
            .position(|e| matches!(e, DummyEvent::AcquireSurface { .. }))
            .unwrap();
        let first_submit = events
            .iter()
            .position(|e| matches!(e, DummyEvent::Submit { .. }))
            .unwrap();
        let present = events
            .iter()
            .position(|e| matches!(e, DummyEvent::Present { .. }))
            .unwrap();
        assert!(acquire < first_submit && first_submit < present);
        assert!(events.contains(&DummyEvent::Marker("upload".to_string())));
    }

    #[test]
    fn test_transients_realized_once_per_graph() {
        let mut ctx = FrameGraphContext::new(FrameGraphConfig::default());
        let graph = present_graph(&mut ctx, Arc::new(AtomicU32::new(0)));

        let mut backend = DummyBackend::new();
        let mut executor = FrameExecutor::new(2);
        for _ in 0..3 {
            executor.execute(&mut backend, &graph, &7u32).unwrap();
        }
        let created = backend
            .events()
            .iter()
            .filter(|e| matches!(e, DummyEvent::CreateBuffer { .. }))
            .count();
        assert_eq!(created, 1);
        assert_eq!(executor.realized_graph(), Some(graph.id()));

        executor.release(&mut backend);
        assert_eq!(backend.live_resource_count(), 0);
        assert_eq!(backend.live_memory_count(), 0);
    }

    #[test]
    fn test_acquire_failure_skips_frame() {
        let mut ctx = FrameGraphContext::new(FrameGraphConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let graph = present_graph(&mut ctx, Arc::clone(&calls));

        let mut backend = DummyBackend::new();
        backend.fail_next_acquire(AcquireError::OutOfDate);
        let mut executor = FrameExecutor::new(2);
        let status = executor.execute(&mut backend, &graph, &7u32).unwrap();

        assert_eq!(status, FrameStatus::Skipped(AcquireError::OutOfDate));
        assert!(!status.is_submitted());
        assert_eq!(calls.load(Ordering::Relaxed), 0);
        assert_eq!(executor.frame_index(), 0);
        assert!(
            !backend
                .events()
                .iter()
                .any(|e| matches!(e, DummyEvent::Submit { .. }))
        );
    }

    #[test]
    fn test_present_failure_reports_outdated() {
        let mut ctx = FrameGraphContext::new(FrameGraphConfig::default());
        let graph = present_graph(&mut ctx, Arc::new(AtomicU32::new(0)));

        let mut backend = DummyBackend::new();
        backend.fail_next_present(AcquireError::OutOfDate);
        let mut executor = FrameExecutor::new(1);
        let status = executor.execute(&mut backend, &graph, &7u32).unwrap();
        assert_eq!(status, FrameStatus::Outdated(AcquireError::OutOfDate));
        assert!(status.is_submitted());
    }

    #[test]
    fn test_submit_failure_keeps_earlier_fences() {
        let mut ctx = FrameGraphContext::new(FrameGraphConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let graph = present_graph(&mut ctx, Arc::clone(&calls));
        assert_eq!(graph.submissions().len(), 2);

        let mut backend = DummyBackend::new();
        backend.fail_submit_after(1);
        let mut executor = FrameExecutor::new(2);
        let err = executor.execute(&mut backend, &graph, &7u32).unwrap_err();

        assert!(matches!(err, FrameGraphError::Backend(BackendError::SubmissionFailed(_))));
        assert_eq!(executor.frame_index(), 0);
        // The upload batch went out with its fence; the executor still owns it.
        assert_eq!(executor.in_flight(), 1);
        assert!(!backend.events().contains(&DummyEvent::WaitIdle));

        executor.release(&mut backend);
        assert_eq!(executor.in_flight(), 0);
        assert_eq!(backend.live_resource_count(), 0);

        // The next frame runs normally.
        let status = executor.execute(&mut backend, &graph, &7u32).unwrap();
        assert_eq!(status, FrameStatus::Presented);
        assert_eq!(executor.in_flight(), 2);
    }

    #[test]
    fn test_allocation_failure_is_an_error() {
        let mut ctx = FrameGraphContext::new(FrameGraphConfig::default());
        let graph = present_graph(&mut ctx, Arc::new(AtomicU32::new(0)));

        let mut backend = DummyBackend::new();
        backend.fail_next_allocation();
        let mut executor = FrameExecutor::new(2);
        let err = executor.execute(&mut backend, &graph, &7u32).unwrap_err();
        assert!(matches!(err, FrameGraphError::Backend(_)));
        assert_eq!(executor.realized_graph(), None);
        assert_eq!(backend.live_resource_count(), 0);
    }
}
