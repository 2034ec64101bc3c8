//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. Every call is appended
//! to a shared event log, so tests can check exactly which barriers, transfers
//! and submissions the executor issued. Fences are signalled on submit.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    CommandEncoder, GraphBackend, MemoryHandle, PhysicalHandle, ResolvedBarrier,
    ResolvedTransfer, ResourcePlacement, Submission,
};
use crate::compiler::{SemaphoreRef, SemaphoreWait};
use crate::error::{AcquireError, BackendError};
use crate::executor::Fence;
use crate::graph::{ExternalHandle, MemoryClass, PassKind, PipelineStages, QueueType};
use crate::types::{BufferDescriptor, TextureDescriptor};

/// One call recorded by the [`DummyBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum DummyEvent {
    AllocateMemory {
        memory: MemoryHandle,
        class: MemoryClass,
        size: u64,
    },
    FreeMemory(MemoryHandle),
    CreateTexture {
        handle: PhysicalHandle,
        label: Option<String>,
        placement: ResourcePlacement,
    },
    CreateBuffer {
        handle: PhysicalHandle,
        label: Option<String>,
        placement: ResourcePlacement,
    },
    DestroyResource(PhysicalHandle),
    AcquireSurface {
        surface: ExternalHandle,
        image: PhysicalHandle,
        signal: SemaphoreRef,
    },
    BeginCommands(QueueType),
    BeginPass {
        name: String,
        kind: PassKind,
    },
    EndPass,
    PipelineBarrier {
        src_stages: PipelineStages,
        dst_stages: PipelineStages,
        barriers: Vec<ResolvedBarrier>,
    },
    ExecutionBarrier {
        src_stages: PipelineStages,
        dst_stages: PipelineStages,
    },
    ReleaseOwnership(ResolvedTransfer),
    AcquireOwnership(ResolvedTransfer),
    ClearTexture {
        texture: PhysicalHandle,
        color: [f32; 4],
    },
    Marker(String),
    Submit {
        queue: QueueType,
        waits: Vec<SemaphoreWait>,
        signals: Vec<SemaphoreRef>,
        fenced: bool,
    },
    Present {
        surface: ExternalHandle,
        queue: QueueType,
        wait: SemaphoreRef,
    },
    WaitIdle,
}

type EventLog = Arc<Mutex<Vec<DummyEvent>>>;

/// Command encoder of the [`DummyBackend`].
///
/// Tasks can reach it through [`CommandEncoder::as_any_mut`] to log extra
/// markers or inspect the queue they record for.
#[derive(Debug)]
pub struct DummyEncoder {
    queue: QueueType,
    events: EventLog,
}

impl DummyEncoder {
    /// Queue this encoder records for.
    pub fn queue(&self) -> QueueType {
        self.queue
    }

    fn push(&self, event: DummyEvent) {
        self.events.lock().push(event);
    }
}

impl CommandEncoder for DummyEncoder {
    fn begin_pass(&mut self, name: &str, kind: PassKind) {
        log::trace!("DummyBackend: begin pass '{name}' ({kind}) on {}", self.queue);
        self.push(DummyEvent::BeginPass {
            name: name.to_string(),
            kind,
        });
    }

    fn end_pass(&mut self) {
        self.push(DummyEvent::EndPass);
    }

    fn pipeline_barrier(
        &mut self,
        src_stages: PipelineStages,
        dst_stages: PipelineStages,
        barriers: &[ResolvedBarrier],
    ) {
        log::trace!(
            "DummyBackend: pipeline barrier {src_stages:?} -> {dst_stages:?} ({} resources)",
            barriers.len()
        );
        self.push(DummyEvent::PipelineBarrier {
            src_stages,
            dst_stages,
            barriers: barriers.to_vec(),
        });
    }

    fn execution_barrier(&mut self, src_stages: PipelineStages, dst_stages: PipelineStages) {
        self.push(DummyEvent::ExecutionBarrier {
            src_stages,
            dst_stages,
        });
    }

    fn release_ownership(&mut self, transfer: &ResolvedTransfer) {
        log::trace!(
            "DummyBackend: release {:?} {} -> {}",
            transfer.resource,
            transfer.src_queue,
            transfer.dst_queue
        );
        self.push(DummyEvent::ReleaseOwnership(*transfer));
    }

    fn acquire_ownership(&mut self, transfer: &ResolvedTransfer) {
        log::trace!(
            "DummyBackend: acquire {:?} {} -> {}",
            transfer.resource,
            transfer.src_queue,
            transfer.dst_queue
        );
        self.push(DummyEvent::AcquireOwnership(*transfer));
    }

    fn clear_texture(&mut self, texture: PhysicalHandle, color: [f32; 4]) {
        self.push(DummyEvent::ClearTexture { texture, color });
    }

    fn marker(&mut self, label: &str) {
        self.push(DummyEvent::Marker(label.to_string()));
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    events: EventLog,
    encoder: DummyEncoder,
    next_handle: u64,
    live_resources: HashSet<PhysicalHandle>,
    live_memory: HashSet<MemoryHandle>,
    acquire_failure: Option<AcquireError>,
    present_failure: Option<AcquireError>,
    allocation_failure: bool,
    submit_failure: Option<usize>,
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        let events: EventLog = Arc::default();
        Self {
            encoder: DummyEncoder {
                queue: QueueType::Graphics,
                events: Arc::clone(&events),
            },
            events,
            next_handle: 1,
            live_resources: HashSet::new(),
            live_memory: HashSet::new(),
            acquire_failure: None,
            present_failure: None,
            allocation_failure: false,
            submit_failure: None,
        }
    }

    /// Snapshot of every event recorded so far.
    pub fn events(&self) -> Vec<DummyEvent> {
        self.events.lock().clone()
    }

    /// Drain the event log.
    pub fn take_events(&self) -> Vec<DummyEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Make the next surface acquisition fail with `error`.
    pub fn fail_next_acquire(&mut self, error: AcquireError) {
        self.acquire_failure = Some(error);
    }

    /// Make the next present fail with `error`.
    pub fn fail_next_present(&mut self, error: AcquireError) {
        self.present_failure = Some(error);
    }

    /// Make the next memory or resource allocation fail.
    pub fn fail_next_allocation(&mut self) {
        self.allocation_failure = true;
    }

    /// Make a submit fail once `skip` more have succeeded.
    pub fn fail_submit_after(&mut self, skip: usize) {
        self.submit_failure = Some(skip);
    }

    /// Number of textures and buffers created and not yet destroyed.
    pub fn live_resource_count(&self) -> usize {
        self.live_resources.len()
    }

    /// Number of memory blocks allocated and not yet freed.
    pub fn live_memory_count(&self) -> usize {
        self.live_memory.len()
    }

    fn next_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn check_allocation(&mut self, what: &str) -> Result<(), BackendError> {
        if std::mem::take(&mut self.allocation_failure) {
            log::trace!("DummyBackend: injected failure creating {what}");
            return Err(BackendError::AllocationFailed(format!(
                "injected failure creating {what}"
            )));
        }
        Ok(())
    }

    fn push(&self, event: DummyEvent) {
        self.events.lock().push(event);
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBackend for DummyBackend {
    fn name(&self) -> &str {
        "Dummy Backend"
    }

    fn allocate_memory(
        &mut self,
        class: MemoryClass,
        size: u64,
        _alignment: u64,
    ) -> Result<MemoryHandle, BackendError> {
        self.check_allocation("memory block")?;
        let memory = MemoryHandle(self.next_handle());
        log::trace!("DummyBackend: allocating {size} bytes of {class:?} memory");
        self.live_memory.insert(memory);
        self.push(DummyEvent::AllocateMemory {
            memory,
            class,
            size,
        });
        Ok(memory)
    }

    fn free_memory(&mut self, memory: MemoryHandle) {
        self.live_memory.remove(&memory);
        self.push(DummyEvent::FreeMemory(memory));
    }

    fn create_texture(
        &mut self,
        descriptor: &TextureDescriptor,
        placement: ResourcePlacement,
    ) -> Result<PhysicalHandle, BackendError> {
        self.check_allocation("texture")?;
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{}x{})",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.size.depth
        );
        let handle = PhysicalHandle(self.next_handle());
        self.live_resources.insert(handle);
        self.push(DummyEvent::CreateTexture {
            handle,
            label: descriptor.label.clone(),
            placement,
        });
        Ok(handle)
    }

    fn create_buffer(
        &mut self,
        descriptor: &BufferDescriptor,
        placement: ResourcePlacement,
    ) -> Result<PhysicalHandle, BackendError> {
        self.check_allocation("buffer")?;
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        let handle = PhysicalHandle(self.next_handle());
        self.live_resources.insert(handle);
        self.push(DummyEvent::CreateBuffer {
            handle,
            label: descriptor.label.clone(),
            placement,
        });
        Ok(handle)
    }

    fn destroy_resource(&mut self, handle: PhysicalHandle) {
        self.live_resources.remove(&handle);
        self.push(DummyEvent::DestroyResource(handle));
    }

    fn acquire_surface(
        &mut self,
        surface: ExternalHandle,
        signal: SemaphoreRef,
    ) -> Result<PhysicalHandle, AcquireError> {
        if let Some(error) = self.acquire_failure.take() {
            log::trace!("DummyBackend: acquire of surface {surface:?} failed: {error}");
            return Err(error);
        }
        let image = PhysicalHandle::from(surface);
        self.push(DummyEvent::AcquireSurface {
            surface,
            image,
            signal,
        });
        Ok(image)
    }

    fn begin_commands(
        &mut self,
        queue: QueueType,
    ) -> Result<&mut dyn CommandEncoder, BackendError> {
        self.push(DummyEvent::BeginCommands(queue));
        self.encoder.queue = queue;
        Ok(&mut self.encoder)
    }

    fn submit(
        &mut self,
        submission: &Submission<'_>,
        fence: Option<&Fence>,
    ) -> Result<(), BackendError> {
        if let Some(remaining) = self.submit_failure.as_mut() {
            if *remaining == 0 {
                self.submit_failure = None;
                log::trace!("DummyBackend: injected failure submitting to {}", submission.queue);
                return Err(BackendError::SubmissionFailed(format!(
                    "injected failure submitting to {}",
                    submission.queue
                )));
            }
            *remaining -= 1;
        }
        log::trace!(
            "DummyBackend: submit to {} ({} waits, {} signals)",
            submission.queue,
            submission.waits.len(),
            submission.signals.len()
        );
        self.push(DummyEvent::Submit {
            queue: submission.queue,
            waits: submission.waits.to_vec(),
            signals: submission.signals.to_vec(),
            fenced: fence.is_some(),
        });
        // No GPU: the work is complete as soon as it is submitted.
        if let Some(fence) = fence {
            fence.signal();
        }
        Ok(())
    }

    fn present(
        &mut self,
        surface: ExternalHandle,
        queue: QueueType,
        wait: SemaphoreRef,
    ) -> Result<(), AcquireError> {
        if let Some(error) = self.present_failure.take() {
            return Err(error);
        }
        self.push(DummyEvent::Present {
            surface,
            queue,
            wait,
        });
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<(), BackendError> {
        self.push(DummyEvent::WaitIdle);
        Ok(())
    }
}
