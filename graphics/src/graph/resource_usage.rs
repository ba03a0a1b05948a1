//! Resource usage declarations for automatic barrier generation.
//!
//! A pass states *how* it touches each resource with a [`ResourceAccess`].
//! The access determines the layout, pipeline stages and memory access the
//! resource must be in while the pass runs, which is what the
//! synchronization manager compares between consecutive uses.

use crate::registry::ResourceHandle;
use crate::types::{
    AccessFlags, ImageLayout, PipelineStages, QueueType, ResourceKind, ResourceState,
};

/// How a resource is used within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceAccess {
    /// Written as color render target.
    ColorAttachmentWrite,
    /// Read and written as color render target (blending).
    ColorAttachmentReadWrite,
    /// Written as depth/stencil render target.
    DepthStencilWrite,
    /// Read-only depth testing.
    DepthStencilRead,
    /// Sampled or read in a fragment shader.
    FragmentShaderRead,
    /// Sampled or read in a compute shader.
    ComputeShaderRead,
    /// Written as storage image/buffer in a compute shader.
    ComputeShaderWrite,
    /// Read and written as storage image/buffer in a compute shader.
    ComputeShaderReadWrite,
    /// Source of a copy.
    TransferRead,
    /// Destination of a copy or clear.
    TransferWrite,
    /// Read as vertex buffer data.
    VertexBuffer,
    /// Read as index buffer data.
    IndexBuffer,
    /// Read as uniform buffer in vertex and fragment shaders.
    UniformRead,
    /// Read as indirect draw arguments.
    IndirectRead,
}

impl ResourceAccess {
    /// Check if this access writes the resource.
    pub fn is_write(self) -> bool {
        self.access().has_writes()
    }

    /// Check if this access reads the resource.
    pub fn is_read(self) -> bool {
        self.access().has_reads()
    }

    /// Image layout required by this access.
    pub fn layout(self) -> ImageLayout {
        match self {
            Self::ColorAttachmentWrite | Self::ColorAttachmentReadWrite => {
                ImageLayout::ColorAttachment
            }
            Self::DepthStencilWrite => ImageLayout::DepthStencilAttachment,
            Self::DepthStencilRead => ImageLayout::DepthStencilReadOnly,
            Self::FragmentShaderRead | Self::ComputeShaderRead => ImageLayout::ShaderReadOnly,
            Self::ComputeShaderWrite | Self::ComputeShaderReadWrite => ImageLayout::General,
            Self::TransferRead => ImageLayout::TransferSrc,
            Self::TransferWrite => ImageLayout::TransferDst,
            Self::VertexBuffer | Self::IndexBuffer | Self::UniformRead | Self::IndirectRead => {
                ImageLayout::Undefined
            }
        }
    }

    /// Pipeline stages at which the access happens.
    pub fn stages(self) -> PipelineStages {
        match self {
            Self::ColorAttachmentWrite | Self::ColorAttachmentReadWrite => {
                PipelineStages::COLOR_ATTACHMENT_OUTPUT
            }
            Self::DepthStencilWrite | Self::DepthStencilRead => {
                PipelineStages::EARLY_FRAGMENT_TESTS | PipelineStages::LATE_FRAGMENT_TESTS
            }
            Self::FragmentShaderRead => PipelineStages::FRAGMENT_SHADER,
            Self::ComputeShaderRead | Self::ComputeShaderWrite | Self::ComputeShaderReadWrite => {
                PipelineStages::COMPUTE_SHADER
            }
            Self::TransferRead | Self::TransferWrite => PipelineStages::TRANSFER,
            Self::VertexBuffer | Self::IndexBuffer => PipelineStages::VERTEX_INPUT,
            Self::UniformRead => PipelineStages::VERTEX_SHADER | PipelineStages::FRAGMENT_SHADER,
            Self::IndirectRead => PipelineStages::DRAW_INDIRECT,
        }
    }

    /// Memory access types performed.
    pub fn access(self) -> AccessFlags {
        match self {
            Self::ColorAttachmentWrite => AccessFlags::COLOR_ATTACHMENT_WRITE,
            Self::ColorAttachmentReadWrite => {
                AccessFlags::COLOR_ATTACHMENT_READ | AccessFlags::COLOR_ATTACHMENT_WRITE
            }
            Self::DepthStencilWrite => {
                AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            Self::DepthStencilRead => AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            Self::FragmentShaderRead | Self::ComputeShaderRead => AccessFlags::SHADER_READ,
            Self::ComputeShaderWrite => AccessFlags::SHADER_WRITE,
            Self::ComputeShaderReadWrite => AccessFlags::SHADER_READ | AccessFlags::SHADER_WRITE,
            Self::TransferRead => AccessFlags::TRANSFER_READ,
            Self::TransferWrite => AccessFlags::TRANSFER_WRITE,
            Self::VertexBuffer => AccessFlags::VERTEX_ATTRIBUTE_READ,
            Self::IndexBuffer => AccessFlags::INDEX_READ,
            Self::UniformRead => AccessFlags::UNIFORM_READ,
            Self::IndirectRead => AccessFlags::INDIRECT_COMMAND_READ,
        }
    }

    /// The state a resource of `kind` must be in for this access on `queue`.
    pub fn required_state(self, kind: ResourceKind, queue: QueueType) -> ResourceState {
        let layout = match kind {
            ResourceKind::Image => self.layout(),
            ResourceKind::Buffer => ImageLayout::Undefined,
        };
        ResourceState::new(layout, self.stages(), self.access()).on_queue(queue)
    }
}

/// Whether a pass reads, writes or reads and writes a resource.
///
/// This is the declared dependency role and is what frame-graph edges are
/// derived from. It is independent of the [`ResourceAccess`] memory flags:
/// a depth attachment written from scratch is declared as a write even
/// though depth testing reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageKind {
    Read,
    Write,
    ReadWrite,
}

impl UsageKind {
    pub fn reads(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn writes(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    /// Combine two declarations of the same resource by one pass.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        if self == other {
            self
        } else {
            Self::ReadWrite
        }
    }
}

/// A resource access as declared on a pass, before resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclaredAccess {
    pub resource: ResourceHandle,
    pub kind: UsageKind,
    pub access: ResourceAccess,
}

/// A resolved usage of one resource by one frame-graph node.
///
/// Multiple declarations of the same resource by a pass are merged into a
/// single usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceUsage {
    pub resource: ResourceHandle,
    pub resource_kind: ResourceKind,
    pub kind: UsageKind,
    /// State the resource must be in while the node executes.
    pub state: ResourceState,
}

impl ResourceUsage {
    pub(crate) fn new(declared: &DeclaredAccess, resource_kind: ResourceKind, queue: QueueType) -> Self {
        Self {
            resource: declared.resource,
            resource_kind,
            kind: declared.kind,
            state: declared.access.required_state(resource_kind, queue),
        }
    }

    /// Fold another declaration of the same resource into this usage.
    ///
    /// Conflicting image layouts fall back to [`ImageLayout::General`].
    pub(crate) fn merge(&mut self, other: &ResourceUsage) {
        debug_assert_eq!(self.resource, other.resource);
        self.kind = self.kind.merge(other.kind);
        if self.state.layout != other.state.layout {
            self.state.layout = match self.resource_kind {
                ResourceKind::Image => ImageLayout::General,
                ResourceKind::Buffer => ImageLayout::Undefined,
            };
        }
        self.state.stages |= other.state.stages;
        self.state.access |= other.state.access;
    }
}
