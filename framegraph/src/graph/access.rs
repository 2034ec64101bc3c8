//! Resource access declarations and the synchronization vocabulary derived from them.
//!
//! A pass declares *how* it touches a resource with an [`AccessType`]. The
//! compiler turns each access into a [`ResourceState`] (access mask, pipeline
//! stages, image layout) and plans barriers between consecutive states.

use bitflags::bitflags;

use super::pass::PassKind;
use super::resource::ResourceUsage;

/// How a resource is accessed within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessType {
    /// Read as vertex buffer data.
    VertexBuffer,
    /// Read as index buffer data.
    IndexBuffer,
    /// Read as indirect draw/dispatch arguments.
    IndirectBuffer,
    /// Read as uniform buffer (constant data).
    UniformRead,
    /// Sampled in a shader (texture read).
    SampledRead,
    /// Read as storage buffer or storage image.
    StorageRead,
    /// Written as storage buffer or storage image, previous contents discarded.
    StorageWrite,
    /// Read and written as storage buffer or storage image.
    StorageReadWrite,
    /// Written as color render target, previous contents discarded (clear/don't care).
    ColorAttachmentWrite,
    /// Written as color render target on top of previous contents (load).
    ColorAttachmentReadWrite,
    /// Written as depth/stencil render target.
    DepthStencilWrite,
    /// Read-only depth/stencil (depth test without writes).
    DepthStencilRead,
    /// Source of a copy/transfer operation.
    TransferRead,
    /// Destination of a copy/transfer operation.
    TransferWrite,
}

/// Which kinds of resources an access applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessTarget {
    /// Only images (textures, swapchain surfaces).
    Image,
    /// Only buffers.
    Buffer,
    /// Both images and buffers.
    Any,
}

impl AccessType {
    /// Check if this access mode is a write operation.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::StorageWrite
                | Self::StorageReadWrite
                | Self::ColorAttachmentWrite
                | Self::ColorAttachmentReadWrite
                | Self::DepthStencilWrite
                | Self::TransferWrite
        )
    }

    /// Check if this access mode reads previous contents.
    pub fn is_read(self) -> bool {
        matches!(
            self,
            Self::VertexBuffer
                | Self::IndexBuffer
                | Self::IndirectBuffer
                | Self::UniformRead
                | Self::SampledRead
                | Self::StorageRead
                | Self::StorageReadWrite
                | Self::ColorAttachmentReadWrite
                | Self::DepthStencilRead
                | Self::TransferRead
        )
    }

    /// Resource kinds this access can be applied to.
    pub fn target(self) -> AccessTarget {
        match self {
            Self::VertexBuffer | Self::IndexBuffer | Self::IndirectBuffer | Self::UniformRead => {
                AccessTarget::Buffer
            }
            Self::SampledRead
            | Self::ColorAttachmentWrite
            | Self::ColorAttachmentReadWrite
            | Self::DepthStencilWrite
            | Self::DepthStencilRead => AccessTarget::Image,
            Self::StorageRead
            | Self::StorageWrite
            | Self::StorageReadWrite
            | Self::TransferRead
            | Self::TransferWrite => AccessTarget::Any,
        }
    }

    /// Check if a pass of the given kind may declare this access.
    ///
    /// Attachment and vertex-input accesses need the graphics pipeline; transfer
    /// passes may only copy.
    pub fn allowed_in(self, kind: PassKind) -> bool {
        match kind {
            PassKind::Render => true,
            PassKind::Compute => !matches!(
                self,
                Self::VertexBuffer
                    | Self::IndexBuffer
                    | Self::ColorAttachmentWrite
                    | Self::ColorAttachmentReadWrite
                    | Self::DepthStencilWrite
                    | Self::DepthStencilRead
            ),
            PassKind::Transfer => matches!(self, Self::TransferRead | Self::TransferWrite),
        }
    }

    /// Resource usage this access requires.
    pub fn required_usage(self) -> ResourceUsage {
        match self {
            Self::VertexBuffer => ResourceUsage::VERTEX,
            Self::IndexBuffer => ResourceUsage::INDEX,
            Self::IndirectBuffer => ResourceUsage::INDIRECT,
            Self::UniformRead => ResourceUsage::UNIFORM,
            Self::SampledRead => ResourceUsage::SAMPLED,
            Self::StorageRead | Self::StorageWrite | Self::StorageReadWrite => {
                ResourceUsage::STORAGE
            }
            Self::ColorAttachmentWrite | Self::ColorAttachmentReadWrite => {
                ResourceUsage::RENDER_TARGET
            }
            Self::DepthStencilWrite | Self::DepthStencilRead => ResourceUsage::DEPTH_STENCIL,
            Self::TransferRead => ResourceUsage::COPY_SRC,
            Self::TransferWrite => ResourceUsage::COPY_DST,
        }
    }

    /// Memory access flags for this access.
    pub fn access_flags(self) -> AccessFlags {
        match self {
            Self::VertexBuffer => AccessFlags::VERTEX_ATTRIBUTE_READ,
            Self::IndexBuffer => AccessFlags::INDEX_READ,
            Self::IndirectBuffer => AccessFlags::INDIRECT_COMMAND_READ,
            Self::UniformRead => AccessFlags::UNIFORM_READ,
            Self::SampledRead | Self::StorageRead => AccessFlags::SHADER_READ,
            Self::StorageWrite => AccessFlags::SHADER_WRITE,
            Self::StorageReadWrite => AccessFlags::SHADER_READ | AccessFlags::SHADER_WRITE,
            Self::ColorAttachmentWrite => AccessFlags::COLOR_ATTACHMENT_WRITE,
            Self::ColorAttachmentReadWrite => {
                AccessFlags::COLOR_ATTACHMENT_READ | AccessFlags::COLOR_ATTACHMENT_WRITE
            }
            Self::DepthStencilWrite => {
                AccessFlags::DEPTH_STENCIL_READ | AccessFlags::DEPTH_STENCIL_WRITE
            }
            Self::DepthStencilRead => AccessFlags::DEPTH_STENCIL_READ,
            Self::TransferRead => AccessFlags::TRANSFER_READ,
            Self::TransferWrite => AccessFlags::TRANSFER_WRITE,
        }
    }

    /// Pipeline stages that perform this access in a pass of the given kind.
    pub fn stages(self, kind: PassKind) -> PipelineStages {
        let shader = match kind {
            PassKind::Compute => PipelineStages::COMPUTE_SHADER,
            _ => PipelineStages::VERTEX_SHADER | PipelineStages::FRAGMENT_SHADER,
        };
        match self {
            Self::VertexBuffer | Self::IndexBuffer => PipelineStages::VERTEX_INPUT,
            Self::IndirectBuffer => PipelineStages::DRAW_INDIRECT,
            Self::UniformRead
            | Self::SampledRead
            | Self::StorageRead
            | Self::StorageWrite
            | Self::StorageReadWrite => shader,
            Self::ColorAttachmentWrite | Self::ColorAttachmentReadWrite => {
                PipelineStages::COLOR_ATTACHMENT_OUTPUT
            }
            Self::DepthStencilWrite | Self::DepthStencilRead => {
                PipelineStages::EARLY_FRAGMENT_TESTS | PipelineStages::LATE_FRAGMENT_TESTS
            }
            Self::TransferRead | Self::TransferWrite => PipelineStages::TRANSFER,
        }
    }

    /// Image layout required by this access.
    pub fn layout(self) -> ImageLayout {
        match self {
            Self::SampledRead => ImageLayout::ShaderReadOnly,
            Self::StorageRead | Self::StorageWrite | Self::StorageReadWrite => ImageLayout::General,
            Self::ColorAttachmentWrite | Self::ColorAttachmentReadWrite => {
                ImageLayout::ColorAttachment
            }
            Self::DepthStencilWrite => ImageLayout::DepthStencilAttachment,
            Self::DepthStencilRead => ImageLayout::DepthStencilReadOnly,
            Self::TransferRead => ImageLayout::TransferSrc,
            Self::TransferWrite => ImageLayout::TransferDst,
            Self::VertexBuffer | Self::IndexBuffer | Self::IndirectBuffer | Self::UniformRead => {
                ImageLayout::Undefined
            }
        }
    }

    /// Full resource state for this access in a pass of the given kind.
    ///
    /// Buffers carry no layout, so `is_image == false` always yields
    /// [`ImageLayout::Undefined`].
    pub fn state(self, kind: PassKind, is_image: bool) -> ResourceState {
        ResourceState {
            access: self.access_flags(),
            stages: self.stages(kind),
            layout: if is_image {
                self.layout()
            } else {
                ImageLayout::Undefined
            },
        }
    }
}

bitflags! {
    /// Memory access mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u32 {
        const INDIRECT_COMMAND_READ = 1 << 0;
        const INDEX_READ = 1 << 1;
        const VERTEX_ATTRIBUTE_READ = 1 << 2;
        const UNIFORM_READ = 1 << 3;
        const SHADER_READ = 1 << 4;
        const SHADER_WRITE = 1 << 5;
        const COLOR_ATTACHMENT_READ = 1 << 6;
        const COLOR_ATTACHMENT_WRITE = 1 << 7;
        const DEPTH_STENCIL_READ = 1 << 8;
        const DEPTH_STENCIL_WRITE = 1 << 9;
        const TRANSFER_READ = 1 << 10;
        const TRANSFER_WRITE = 1 << 11;
    }
}

impl AccessFlags {
    /// Every write bit.
    pub const WRITES: Self = Self::SHADER_WRITE
        .union(Self::COLOR_ATTACHMENT_WRITE)
        .union(Self::DEPTH_STENCIL_WRITE)
        .union(Self::TRANSFER_WRITE);

    /// The write bits of this mask.
    pub fn writes(self) -> Self {
        self & Self::WRITES
    }
}

bitflags! {
    /// Pipeline stage mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const DRAW_INDIRECT = 1 << 1;
        const VERTEX_INPUT = 1 << 2;
        const VERTEX_SHADER = 1 << 3;
        const FRAGMENT_SHADER = 1 << 4;
        const EARLY_FRAGMENT_TESTS = 1 << 5;
        const LATE_FRAGMENT_TESTS = 1 << 6;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 7;
        const COMPUTE_SHADER = 1 << 8;
        const TRANSFER = 1 << 9;
        const BOTTOM_OF_PIPE = 1 << 10;
    }
}

impl PipelineStages {
    /// Use as a barrier source scope: an empty mask waits on nothing.
    pub fn or_top(self) -> Self {
        if self.is_empty() { Self::TOP_OF_PIPE } else { self }
    }

    /// Use as a barrier destination scope: an empty mask blocks nothing.
    pub fn or_bottom(self) -> Self {
        if self.is_empty() {
            Self::BOTTOM_OF_PIPE
        } else {
            self
        }
    }
}

/// Image layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    /// Contents undefined; also used for every buffer state.
    #[default]
    Undefined,
    /// General layout (storage images).
    General,
    /// Color attachment.
    ColorAttachment,
    /// Depth/stencil attachment.
    DepthStencilAttachment,
    /// Read-only depth/stencil.
    DepthStencilReadOnly,
    /// Sampled in shaders.
    ShaderReadOnly,
    /// Copy source.
    TransferSrc,
    /// Copy destination.
    TransferDst,
    /// Ready for presentation.
    PresentSrc,
}

/// The synchronization-relevant state of a resource at one point of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceState {
    /// Memory accesses performed.
    pub access: AccessFlags,
    /// Pipeline stages performing them.
    pub stages: PipelineStages,
    /// Image layout ([`ImageLayout::Undefined`] for buffers).
    pub layout: ImageLayout,
}

impl ResourceState {
    /// No prior access, contents undefined.
    pub const UNDEFINED: Self = Self {
        access: AccessFlags::empty(),
        stages: PipelineStages::empty(),
        layout: ImageLayout::Undefined,
    };

    /// Presentable swapchain image.
    pub const PRESENT: Self = Self {
        access: AccessFlags::empty(),
        stages: PipelineStages::BOTTOM_OF_PIPE,
        layout: ImageLayout::PresentSrc,
    };

    /// A freshly acquired swapchain image, made available by the acquire semaphore.
    pub const ACQUIRED: Self = Self {
        access: AccessFlags::empty(),
        stages: PipelineStages::COLOR_ATTACHMENT_OUTPUT,
        layout: ImageLayout::Undefined,
    };

    /// Create a new state.
    pub const fn new(access: AccessFlags, stages: PipelineStages, layout: ImageLayout) -> Self {
        Self {
            access,
            stages,
            layout,
        }
    }

    /// Check if the state includes any write.
    pub fn is_write(&self) -> bool {
        !self.access.writes().is_empty()
    }

    /// Combine two accesses performed by the same pass.
    ///
    /// Returns `None` when they need different image layouts.
    pub fn merge(self, other: Self) -> Option<Self> {
        if self.layout != other.layout {
            return None;
        }
        Some(Self {
            access: self.access | other.access,
            stages: self.stages | other.stages,
            layout: self.layout,
        })
    }
}
