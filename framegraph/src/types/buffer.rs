//! Buffer descriptors and usage flags.

use bitflags::bitflags;

bitflags! {
    /// Ways a buffer may be bound.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        /// Read or written by shaders as a storage buffer.
        const STORAGE = 1 << 3;
        /// Source of indirect draw or dispatch arguments.
        const INDIRECT = 1 << 4;
        const COPY_SRC = 1 << 5;
        const COPY_DST = 1 << 6;
    }
}

/// Size and usage of a buffer resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Name given to the backend. Transients default to their resource name.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// For transient buffers the graph adds every usage implied by the
    /// accesses declared on it, so this may start empty.
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}
