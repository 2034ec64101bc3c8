//! Frame graph configuration.

use crate::graph::{PassKind, QueueType};

/// Which hardware queues are available besides the graphics queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueSupport {
    /// A separate compute queue runs compute passes asynchronously.
    pub async_compute: bool,
    /// A dedicated transfer queue runs transfer passes.
    pub dedicated_transfer: bool,
}

impl QueueSupport {
    /// Only a graphics queue: every pass runs on it.
    pub const GRAPHICS_ONLY: Self = Self {
        async_compute: false,
        dedicated_transfer: false,
    };

    /// Queue a pass of the given kind is submitted to.
    ///
    /// Transfer work falls back to the compute queue, then to graphics.
    pub fn resolve(&self, kind: PassKind) -> QueueType {
        match kind {
            PassKind::Render => QueueType::Graphics,
            PassKind::Compute if self.async_compute => QueueType::Compute,
            PassKind::Compute => QueueType::Graphics,
            PassKind::Transfer if self.dedicated_transfer => QueueType::Transfer,
            PassKind::Transfer if self.async_compute => QueueType::Compute,
            PassKind::Transfer => QueueType::Graphics,
        }
    }
}

impl Default for QueueSupport {
    fn default() -> Self {
        Self {
            async_compute: true,
            dedicated_transfer: true,
        }
    }
}

/// Limits on transient resource memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransientLimits {
    /// Let transient resources with disjoint lifetimes share memory.
    pub aliasing: bool,
    /// Largest aliasable memory block. Larger resources get dedicated memory.
    pub max_block_size: u64,
    /// Maximum number of aliasable blocks; overflow gets dedicated memory.
    pub max_blocks: Option<usize>,
    /// Total transient memory allowed, aliased and dedicated together.
    pub memory_budget: Option<u64>,
}

impl Default for TransientLimits {
    fn default() -> Self {
        Self {
            aliasing: true,
            max_block_size: 256 * 1024 * 1024,
            max_blocks: None,
            memory_budget: None,
        }
    }
}

/// Configuration of a [`FrameGraphContext`](crate::FrameGraphContext).
///
/// # Example
///
/// ```
/// use redlilium_framegraph::{FrameGraphConfig, QueueSupport};
///
/// let config = FrameGraphConfig::default()
///     .with_queues(QueueSupport::GRAPHICS_ONLY)
///     .with_memory_budget(512 * 1024 * 1024)
///     .with_frames_in_flight(3);
/// assert_eq!(config.frames_in_flight, 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameGraphConfig {
    /// Available queues.
    pub queues: QueueSupport,
    /// Transient memory limits.
    pub transient: TransientLimits,
    /// Number of frames the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
}

impl FrameGraphConfig {
    /// Set the available queues.
    pub fn with_queues(mut self, queues: QueueSupport) -> Self {
        self.queues = queues;
        self
    }

    /// Set the transient memory limits.
    pub fn with_transient_limits(mut self, limits: TransientLimits) -> Self {
        self.transient = limits;
        self
    }

    /// Enable or disable transient aliasing.
    pub fn with_aliasing(mut self, enabled: bool) -> Self {
        self.transient.aliasing = enabled;
        self
    }

    /// Set the total transient memory budget.
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.transient.memory_budget = Some(bytes);
        self
    }

    /// Set the number of frames in flight (at least one).
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames.max(1);
        self
    }
}

impl Default for FrameGraphConfig {
    fn default() -> Self {
        Self {
            queues: QueueSupport::default(),
            transient: TransientLimits::default(),
            frames_in_flight: 2,
        }
    }
}
