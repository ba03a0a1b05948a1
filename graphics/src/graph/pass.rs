//! Pass declarations.

use crate::backend::{GpuCommandBuffer, GpuSemaphore, SemaphoreWaitInfo};
use crate::error::GraphicsError;
use crate::registry::ResourceHandle;
use crate::scheduler::CommandRecorder;
use crate::types::{PipelineStages, QueueType};

use super::resource_usage::{DeclaredAccess, ResourceAccess, UsageKind};

/// Work unit of a pass: records GPU commands into the pass's command buffer.
///
/// Runs on a recording worker, possibly concurrently with other passes that
/// have no dependency on it.
pub type PassWork =
    Box<dyn FnOnce(&mut CommandRecorder<'_>) -> Result<(), GraphicsError> + Send + 'static>;

/// A pass declared for the current frame.
///
/// Lists the resources the pass reads, writes and read-writes, plus how its
/// commands are produced: a work unit recorded this frame, or a persistent
/// command buffer recorded once with
/// [`FramePipeline::record_persistent_commands`]. Immutable once handed to
/// the frame graph builder.
///
/// [`FramePipeline::record_persistent_commands`]: crate::pipeline::FramePipeline::record_persistent_commands
///
/// # Example
///
/// ```
/// use cyclonite_graphics::graph::{PassDeclaration, ResourceAccess};
/// use cyclonite_graphics::registry::ResourceRegistry;
/// use cyclonite_graphics::types::{ImageDescriptor, ImageFormat};
///
/// let mut registry = ResourceRegistry::new();
/// let depth = registry.register_image(ImageDescriptor::new_2d(1024, 1024, ImageFormat::Depth32Float));
/// let color = registry.register_image(ImageDescriptor::new_2d(800, 600, ImageFormat::Rgba16Float));
///
/// let lighting = PassDeclaration::new("lighting")
///     .reads(depth, ResourceAccess::FragmentShaderRead)
///     .writes(color, ResourceAccess::ColorAttachmentWrite)
///     .with_work(|recorder| {
///         recorder.draw(3, 1)?;
///         Ok(())
///     });
/// assert_eq!(lighting.accesses().len(), 2);
/// ```
pub struct PassDeclaration {
    name: String,
    queue: QueueType,
    accesses: Vec<DeclaredAccess>,
    work: Option<PassWork>,
    persistent: Option<GpuCommandBuffer>,
    external_waits: Vec<SemaphoreWaitInfo>,
}

/// A declaration taken apart by the frame graph builder.
pub(crate) struct PassParts {
    pub name: String,
    pub queue: QueueType,
    pub accesses: Vec<DeclaredAccess>,
    pub work: Option<PassWork>,
    pub persistent: Option<GpuCommandBuffer>,
    pub external_waits: Vec<SemaphoreWaitInfo>,
}

impl PassDeclaration {
    /// Create a graphics-queue pass with no resources and no work.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: QueueType::Graphics,
            accesses: Vec::new(),
            work: None,
            persistent: None,
            external_waits: Vec::new(),
        }
    }

    fn with_access(mut self, resource: ResourceHandle, kind: UsageKind, access: ResourceAccess) -> Self {
        self.accesses.push(DeclaredAccess {
            resource,
            kind,
            access,
        });
        self
    }

    /// Declare a resource this pass reads.
    #[must_use]
    pub fn reads(self, resource: ResourceHandle, access: ResourceAccess) -> Self {
        self.with_access(resource, UsageKind::Read, access)
    }

    /// Declare a resource this pass writes without reading its prior contents.
    #[must_use]
    pub fn writes(self, resource: ResourceHandle, access: ResourceAccess) -> Self {
        self.with_access(resource, UsageKind::Write, access)
    }

    /// Declare a resource this pass both reads and writes.
    #[must_use]
    pub fn read_writes(self, resource: ResourceHandle, access: ResourceAccess) -> Self {
        self.with_access(resource, UsageKind::ReadWrite, access)
    }

    /// Request a queue. Ignored unless cross-queue submission is enabled.
    #[must_use]
    pub fn on_queue(mut self, queue: QueueType) -> Self {
        self.queue = queue;
        self
    }

    /// Attach the work unit that records this pass's commands. Replaces any
    /// persistent command buffer.
    #[must_use]
    pub fn with_work<F>(mut self, work: F) -> Self
    where
        F: FnOnce(&mut CommandRecorder<'_>) -> Result<(), GraphicsError> + Send + 'static,
    {
        self.work = Some(Box::new(work));
        self.persistent = None;
        self
    }

    /// Submit an already recorded command buffer instead of recording one
    /// this frame. Replaces any work unit.
    ///
    /// The buffer must have been recorded for the queue the pass ends up on.
    #[must_use]
    pub fn with_persistent_commands(mut self, commands: GpuCommandBuffer) -> Self {
        self.persistent = Some(commands);
        self.work = None;
        self
    }

    /// Wait on a semaphore signaled by work submitted outside the frame,
    /// such as a streaming upload, before `stages` of this pass run.
    #[must_use]
    pub fn waits_on(mut self, semaphore: GpuSemaphore, stages: PipelineStages) -> Self {
        match self
            .external_waits
            .iter_mut()
            .find(|w| w.semaphore == semaphore)
        {
            Some(wait) => wait.stages |= stages,
            None => self.external_waits.push(SemaphoreWaitInfo { semaphore, stages }),
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> QueueType {
        self.queue
    }

    pub fn accesses(&self) -> &[DeclaredAccess] {
        &self.accesses
    }

    /// Check if the pass has a work unit attached.
    pub fn has_work(&self) -> bool {
        self.work.is_some()
    }

    pub fn persistent_commands(&self) -> Option<GpuCommandBuffer> {
        self.persistent
    }

    pub fn external_waits(&self) -> &[SemaphoreWaitInfo] {
        &self.external_waits
    }

    pub(crate) fn into_parts(self) -> PassParts {
        PassParts {
            name: self.name,
            queue: self.queue,
            accesses: self.accesses,
            work: self.work,
            persistent: self.persistent,
            external_waits: self.external_waits,
        }
    }
}

impl std::fmt::Debug for PassDeclaration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassDeclaration")
            .field("name", &self.name)
            .field("queue", &self.queue)
            .field("accesses", &self.accesses)
            .field("has_work", &self.work.is_some())
            .field("persistent", &self.persistent)
            .field("external_waits", &self.external_waits)
            .finish()
    }
}
