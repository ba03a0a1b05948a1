//! Scene traversal: turns ECS renderables into frame passes.
//!
//! ```text
//! World ──extract──► ExtractedScene ──ScenePasses::declare──► FrameContext
//! ```
//!
//! A renderable is any entity holding a `Transform`, a `Mesh` and a
//! `Material`. Extraction happens once per frame on the calling thread; the
//! resulting snapshot is shared with the recording workers through an `Arc`.
//! [`SceneUploads`] moves the snapshot's instance data and draw arguments to
//! the GPU ahead of the passes that read them.

mod extracted;
mod passes;
mod uploads;

pub use extracted::{ExtractedScene, ExtractedView, InstanceData, RenderItem};
pub use passes::{SHADOW_MAP_SIZE, ScenePassIds, ScenePasses};
pub use uploads::{DrawIndexedIndirect, SceneUploads, UploadPassIds};
