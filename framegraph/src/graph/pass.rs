//! Pass nodes and their resource connections.

use std::fmt;

use super::access::AccessType;
use super::dependency::PassAccess;
use super::resource::{GroupId, ResourceId};
use crate::executor::PassContext;

/// Handle to a pass in a frame graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(u32);

impl PassId {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    /// Index of the pass in declaration order.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// The kind of work a pass performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    /// Rasterization into attachments.
    Render,
    /// Compute dispatches.
    Compute,
    /// Copies and uploads.
    Transfer,
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Render => write!(f, "render"),
            Self::Compute => write!(f, "compute"),
            Self::Transfer => write!(f, "transfer"),
        }
    }
}

/// GPU queue family a pass is submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueType {
    /// Graphics queue (also capable of compute and transfer).
    Graphics,
    /// Asynchronous compute queue.
    Compute,
    /// Dedicated transfer queue.
    Transfer,
}

impl QueueType {
    /// All queue types, in partition order.
    pub const ALL: [QueueType; 3] = [Self::Graphics, Self::Compute, Self::Transfer];

    /// Dense index for per-queue tables.
    pub fn index(self) -> usize {
        match self {
            Self::Graphics => 0,
            Self::Compute => 1,
            Self::Transfer => 2,
        }
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graphics => write!(f, "graphics"),
            Self::Compute => write!(f, "compute"),
            Self::Transfer => write!(f, "transfer"),
        }
    }
}

/// What a connection points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionTarget {
    /// A single resource.
    Resource(ResourceId),
    /// Every member of a group, through the group's binding contract.
    Group(GroupId),
}

impl From<ResourceId> for ConnectionTarget {
    fn from(id: ResourceId) -> Self {
        Self::Resource(id)
    }
}

impl From<GroupId> for ConnectionTarget {
    fn from(id: GroupId) -> Self {
        Self::Group(id)
    }
}

/// A declared input or output of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection {
    /// Resource or group accessed.
    pub target: ConnectionTarget,
    /// How it is accessed.
    pub access: AccessType,
}

/// Callback recording a pass's commands.
///
/// Per-frame data reaches the callback through [`PassContext::payload`].
pub type PassTask = Box<dyn Fn(&mut PassContext<'_>) + Send + Sync>;

/// A pass in a frame graph.
pub struct PassNode {
    pub(crate) id: PassId,
    pub(crate) name: String,
    pub(crate) kind: PassKind,
    pub(crate) queue: QueueType,
    pub(crate) inputs: Vec<Connection>,
    pub(crate) outputs: Vec<Connection>,
    pub(crate) accesses: Vec<PassAccess>,
    pub(crate) task: Option<PassTask>,
    pub(crate) enabled: bool,
    pub(crate) side_effect: bool,
    pub(crate) substitute: bool,
    pub(crate) order: Option<usize>,
    pub(crate) culled: bool,
}

impl PassNode {
    pub(crate) fn new(id: PassId, kind: PassKind, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            queue: QueueType::Graphics,
            inputs: Vec::new(),
            outputs: Vec::new(),
            accesses: Vec::new(),
            task: None,
            enabled: true,
            side_effect: false,
            substitute: false,
            order: None,
            culled: false,
        }
    }

    /// Pass handle.
    pub fn id(&self) -> PassId {
        self.id
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pass kind.
    pub fn kind(&self) -> PassKind {
        self.kind
    }

    /// Queue the pass was assigned to. Meaningful after compilation.
    pub fn queue(&self) -> QueueType {
        self.queue
    }

    /// Declared inputs.
    pub fn inputs(&self) -> &[Connection] {
        &self.inputs
    }

    /// Declared outputs.
    pub fn outputs(&self) -> &[Connection] {
        &self.outputs
    }

    /// Per-resource accesses with group connections expanded, fixed when the pass ended.
    pub fn accesses(&self) -> &[PassAccess] {
        &self.accesses
    }

    /// Check if the pass has a task attached.
    pub fn has_task(&self) -> bool {
        self.task.is_some()
    }

    /// Check if the pass takes part in this frame.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Check if the pass is always kept alive by culling.
    pub fn has_side_effect(&self) -> bool {
        self.side_effect
    }

    /// Check if the pass was synthesized to produce an otherwise unwritten surface.
    pub fn is_substitute(&self) -> bool {
        self.substitute
    }

    /// Position in the global schedule, once compiled.
    pub fn order(&self) -> Option<usize> {
        self.order
    }

    /// Check if culling removed the pass.
    pub fn is_culled(&self) -> bool {
        self.culled
    }
}

impl fmt::Debug for PassNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("queue", &self.queue)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("has_task", &self.task.is_some())
            .field("enabled", &self.enabled)
            .field("order", &self.order)
            .field("culled", &self.culled)
            .finish()
    }
}

static_assertions::assert_impl_all!(PassNode: Send, Sync);
