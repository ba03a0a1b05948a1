//! Barrier descriptions and batching.
//!
//! A [`ResourceBarrier`] describes one state transition of one resource. The
//! barriers a node needs before (or after) it runs are collected into a
//! [`BarrierBatch`] and recorded as a single pipeline barrier.

use crate::registry::ResourceHandle;
use crate::types::{
    AccessFlags, ImageFormat, PipelineStages, QueueType, ResourceKind, ResourceState,
};

/// Which half of a queue ownership transfer a barrier is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OwnershipTransfer {
    /// Plain same-queue barrier.
    #[default]
    None,
    /// Recorded on the source queue after the producer.
    Release,
    /// Recorded on the destination queue before the consumer.
    Acquire,
}

/// One state transition of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBarrier {
    pub resource: ResourceHandle,
    pub kind: ResourceKind,
    /// Backend object bound in the registry, 0 if none.
    pub native: u64,
    pub format: Option<ImageFormat>,
    pub old: ResourceState,
    pub new: ResourceState,
    pub ownership: OwnershipTransfer,
}

impl ResourceBarrier {
    pub fn is_layout_transition(&self) -> bool {
        self.kind == ResourceKind::Image && self.old.layout != self.new.layout
    }

    pub fn src_queue(&self) -> QueueType {
        self.old.queue
    }

    pub fn dst_queue(&self) -> QueueType {
        self.new.queue
    }

    /// Stages that must complete before the barrier.
    ///
    /// Ignored by the acquire half of an ownership transfer.
    pub fn src_stages(&self) -> PipelineStages {
        if self.ownership == OwnershipTransfer::Acquire || self.old.stages.is_empty() {
            PipelineStages::TOP_OF_PIPE
        } else {
            self.old.stages
        }
    }

    /// Writes that must be made available. Reads never need flushing.
    pub fn src_access(&self) -> AccessFlags {
        if self.ownership == OwnershipTransfer::Acquire {
            AccessFlags::empty()
        } else {
            self.old.access.writes()
        }
    }

    /// Stages that wait for the barrier.
    ///
    /// Ignored by the release half of an ownership transfer.
    pub fn dst_stages(&self) -> PipelineStages {
        if self.ownership == OwnershipTransfer::Release || self.new.stages.is_empty() {
            PipelineStages::BOTTOM_OF_PIPE
        } else {
            self.new.stages
        }
    }

    pub fn dst_access(&self) -> AccessFlags {
        if self.ownership == OwnershipTransfer::Release {
            AccessFlags::empty()
        } else {
            self.new.access
        }
    }
}

/// Barriers recorded together as one pipeline barrier.
///
/// Stage masks are the union over all barriers in the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BarrierBatch {
    barriers: Vec<ResourceBarrier>,
    src_stages: PipelineStages,
    dst_stages: PipelineStages,
}

impl BarrierBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a barrier. A second barrier for the same resource replaces the
    /// first one's destination state.
    pub fn add(&mut self, barrier: ResourceBarrier) {
        self.src_stages |= barrier.src_stages();
        self.dst_stages |= barrier.dst_stages();

        match self
            .barriers
            .iter_mut()
            .find(|b| b.resource == barrier.resource && b.ownership == barrier.ownership)
        {
            Some(existing) => existing.new = barrier.new,
            None => self.barriers.push(barrier),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceBarrier> {
        self.barriers.iter()
    }

    pub fn src_stages(&self) -> PipelineStages {
        self.src_stages
    }

    pub fn dst_stages(&self) -> PipelineStages {
        self.dst_stages
    }

    /// Number of image layout transitions in the batch.
    pub fn layout_transition_count(&self) -> usize {
        self.barriers
            .iter()
            .filter(|b| b.is_layout_transition())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageLayout;

    fn barrier(old: ResourceState, new: ResourceState) -> ResourceBarrier {
        ResourceBarrier {
            resource: ResourceHandle::new(0, 0),
            kind: ResourceKind::Image,
            native: 0,
            format: Some(ImageFormat::Depth32Float),
            old,
            new,
            ownership: OwnershipTransfer::None,
        }
    }

    fn depth_write() -> ResourceState {
        ResourceState::new(
            ImageLayout::DepthStencilAttachment,
            PipelineStages::EARLY_FRAGMENT_TESTS | PipelineStages::LATE_FRAGMENT_TESTS,
            AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
    }

    fn sampled() -> ResourceState {
        ResourceState::new(
            ImageLayout::ShaderReadOnly,
            PipelineStages::FRAGMENT_SHADER,
            AccessFlags::SHADER_READ,
        )
    }

    #[test]
    fn test_masks_from_states() {
        let b = barrier(depth_write(), sampled());
        assert!(b.is_layout_transition());
        assert_eq!(
            b.src_stages(),
            PipelineStages::EARLY_FRAGMENT_TESTS | PipelineStages::LATE_FRAGMENT_TESTS
        );
        assert_eq!(b.src_access(), AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE);
        assert_eq!(b.dst_stages(), PipelineStages::FRAGMENT_SHADER);
        assert_eq!(b.dst_access(), AccessFlags::SHADER_READ);
    }

    #[test]
    fn test_first_use_waits_on_top_of_pipe() {
        let b = barrier(ResourceState::UNDEFINED, depth_write());
        assert_eq!(b.src_stages(), PipelineStages::TOP_OF_PIPE);
        assert!(b.src_access().is_empty());
    }

    #[test]
    fn test_ownership_halves() {
        let mut release = barrier(depth_write(), sampled().on_queue(QueueType::Compute));
        release.ownership = OwnershipTransfer::Release;
        assert_eq!(release.dst_stages(), PipelineStages::BOTTOM_OF_PIPE);
        assert!(release.dst_access().is_empty());
        assert_eq!(release.dst_queue(), QueueType::Compute);

        let acquire = ResourceBarrier {
            ownership: OwnershipTransfer::Acquire,
            ..release
        };
        assert_eq!(acquire.src_stages(), PipelineStages::TOP_OF_PIPE);
        assert!(acquire.src_access().is_empty());
        assert_eq!(acquire.dst_access(), AccessFlags::SHADER_READ);
    }

    #[test]
    fn test_batch_unions_masks() {
        let mut batch = BarrierBatch::new();
        assert!(batch.is_empty());

        batch.add(barrier(ResourceState::UNDEFINED, depth_write()));
        let mut second = barrier(depth_write(), sampled());
        second.resource = ResourceHandle::new(1, 0);
        batch.add(second);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.layout_transition_count(), 2);
        assert!(batch.src_stages().contains(PipelineStages::TOP_OF_PIPE));
        assert!(batch.src_stages().contains(PipelineStages::LATE_FRAGMENT_TESTS));
        assert!(batch.dst_stages().contains(PipelineStages::FRAGMENT_SHADER));
    }

    #[test]
    fn test_batch_replaces_duplicate_resource() {
        let mut batch = BarrierBatch::new();
        batch.add(barrier(ResourceState::UNDEFINED, depth_write()));
        batch.add(barrier(depth_write(), sampled()));

        assert_eq!(batch.len(), 1);
        let only = batch.iter().next().unwrap();
        assert_eq!(only.old, ResourceState::UNDEFINED);
        assert_eq!(only.new, sampled());
    }
}
