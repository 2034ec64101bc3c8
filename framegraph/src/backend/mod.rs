//! GPU backend abstraction.
//!
//! The executor drives a [`GraphBackend`] through a fixed protocol each frame:
//! realize transient memory and resources when the graph changes, acquire
//! presentation surfaces, record every submission batch through a
//! [`CommandEncoder`], submit, and present.
//!
//! # Available Backends
//!
//! - `dummy` (default): records every call as a [`DummyEvent`](dummy::DummyEvent);
//!   used by the tests and benchmarks
//! - `vulkan`: conversions from the graph's synchronization vocabulary to `ash` types
//!
//! A backend maps the graph-local [`SemaphoreRef`]s to its own semaphores; the
//! same reference always names the same semaphore within one frame.

#[cfg(feature = "dummy")]
pub mod dummy;

#[cfg(feature = "vulkan")]
pub mod vulkan;

use std::any::Any;

use crate::compiler::{BarrierKind, SemaphoreRef, SemaphoreWait};
use crate::error::{AcquireError, BackendError};
use crate::executor::Fence;
use crate::graph::{
    ExternalHandle, MemoryClass, PassKind, PipelineStages, QueueType, ResourceId, ResourceState,
};
use crate::types::{BufferDescriptor, TextureDescriptor};

/// Backend handle to a realized texture, buffer or acquired surface image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysicalHandle(pub u64);

impl From<ExternalHandle> for PhysicalHandle {
    fn from(handle: ExternalHandle) -> Self {
        Self(handle.0)
    }
}

/// Backend handle to a memory block shared by aliased resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryHandle(pub u64);

/// Where a transient resource is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourcePlacement {
    /// Bound to its own allocation.
    Dedicated,
    /// Bound to a shared block.
    Aliased { memory: MemoryHandle, offset: u64 },
}

/// A planned barrier with its resource resolved to a backend handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedBarrier {
    pub resource: ResourceId,
    pub handle: PhysicalHandle,
    pub is_image: bool,
    pub kind: BarrierKind,
    pub src: ResourceState,
    pub dst: ResourceState,
}

/// A planned ownership transfer with its resource resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTransfer {
    pub resource: ResourceId,
    pub handle: PhysicalHandle,
    pub is_image: bool,
    pub src_queue: QueueType,
    pub dst_queue: QueueType,
    pub src: ResourceState,
    pub dst: ResourceState,
}

/// Commands recorded so far, ready to be submitted to one queue.
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    pub queue: QueueType,
    pub waits: &'a [SemaphoreWait],
    pub signals: &'a [SemaphoreRef],
}

/// Command recording for one submission.
pub trait CommandEncoder {
    /// Start recording a pass.
    fn begin_pass(&mut self, name: &str, kind: PassKind);

    /// Finish recording the current pass.
    fn end_pass(&mut self);

    /// Record one pipeline barrier covering all `barriers`.
    fn pipeline_barrier(
        &mut self,
        src_stages: PipelineStages,
        dst_stages: PipelineStages,
        barriers: &[ResolvedBarrier],
    );

    /// Record an execution dependency with no memory barrier.
    fn execution_barrier(&mut self, src_stages: PipelineStages, dst_stages: PipelineStages);

    /// Release ownership of a resource to another queue.
    fn release_ownership(&mut self, transfer: &ResolvedTransfer);

    /// Acquire ownership of a resource from another queue.
    fn acquire_ownership(&mut self, transfer: &ResolvedTransfer);

    /// Clear a color image.
    fn clear_texture(&mut self, texture: PhysicalHandle, color: [f32; 4]);

    /// Insert a debug label.
    fn marker(&mut self, label: &str);

    /// Access the concrete encoder, for tasks written against one backend.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A GPU backend able to execute compiled frame graphs.
pub trait GraphBackend {
    /// Backend name, for logging.
    fn name(&self) -> &str;

    /// Allocate a memory block for aliased transients.
    fn allocate_memory(
        &mut self,
        class: MemoryClass,
        size: u64,
        alignment: u64,
    ) -> Result<MemoryHandle, BackendError>;

    /// Free a memory block. Resources placed in it are destroyed first.
    fn free_memory(&mut self, memory: MemoryHandle);

    /// Create a texture.
    fn create_texture(
        &mut self,
        descriptor: &TextureDescriptor,
        placement: ResourcePlacement,
    ) -> Result<PhysicalHandle, BackendError>;

    /// Create a buffer.
    fn create_buffer(
        &mut self,
        descriptor: &BufferDescriptor,
        placement: ResourcePlacement,
    ) -> Result<PhysicalHandle, BackendError>;

    /// Destroy a texture or buffer created by this backend.
    fn destroy_resource(&mut self, handle: PhysicalHandle);

    /// Acquire the next image of a surface, signalling `signal` once it is usable.
    fn acquire_surface(
        &mut self,
        surface: ExternalHandle,
        signal: SemaphoreRef,
    ) -> Result<PhysicalHandle, AcquireError>;

    /// Start recording commands for `queue`.
    fn begin_commands(&mut self, queue: QueueType) -> Result<&mut dyn CommandEncoder, BackendError>;

    /// Submit the commands recorded since [`begin_commands`](Self::begin_commands).
    ///
    /// `fence` is signalled once the queue has finished the submission.
    fn submit(
        &mut self,
        submission: &Submission<'_>,
        fence: Option<&Fence>,
    ) -> Result<(), BackendError>;

    /// Present a surface image once `wait` is signalled.
    fn present(
        &mut self,
        surface: ExternalHandle,
        queue: QueueType,
        wait: SemaphoreRef,
    ) -> Result<(), AcquireError>;

    /// Block until the device is idle.
    fn wait_idle(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}
