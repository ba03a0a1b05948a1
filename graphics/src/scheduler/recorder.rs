//! Per-pass command recording handle.

use crate::backend::{GpuBackend, GpuCommandBuffer, MAX_UPDATE_BUFFER_SIZE};
use crate::error::GraphicsError;
use crate::types::QueueType;

/// Records GPU commands into the command buffer owned by one pass.
///
/// Handed to a pass's work unit. Each pass gets its own command buffer, so
/// recorders of different passes can be used concurrently.
pub struct CommandRecorder<'a> {
    backend: &'a dyn GpuBackend,
    command_buffer: GpuCommandBuffer,
    pass: &'a str,
    command_count: u32,
}

impl<'a> CommandRecorder<'a> {
    pub(crate) fn new(
        backend: &'a dyn GpuBackend,
        command_buffer: GpuCommandBuffer,
        pass: &'a str,
    ) -> Self {
        Self {
            backend,
            command_buffer,
            pass,
            command_count: 0,
        }
    }

    /// Record a non-indexed draw.
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) -> Result<(), GraphicsError> {
        self.backend
            .cmd_draw(self.command_buffer, vertex_count, instance_count)?;
        self.command_count += 1;
        Ok(())
    }

    /// Record a compute dispatch.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), GraphicsError> {
        self.backend.cmd_dispatch(self.command_buffer, x, y, z)?;
        self.command_count += 1;
        Ok(())
    }

    /// Write `data` into a buffer at `offset`, split into as many inline
    /// updates as its size needs.
    ///
    /// `buffer` is the native handle bound in the registry. `offset` and
    /// `data.len()` must be multiples of 4.
    pub fn update_buffer(
        &mut self,
        buffer: u64,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        for (index, chunk) in data.chunks(MAX_UPDATE_BUFFER_SIZE).enumerate() {
            let chunk_offset = offset + (index * MAX_UPDATE_BUFFER_SIZE) as u64;
            self.backend
                .cmd_update_buffer(self.command_buffer, buffer, chunk_offset, chunk)?;
            self.command_count += 1;
        }
        Ok(())
    }

    /// Raw command buffer, for backend-specific recording.
    pub fn command_buffer(&self) -> GpuCommandBuffer {
        self.command_buffer
    }

    pub fn backend(&self) -> &dyn GpuBackend {
        self.backend
    }

    pub fn queue(&self) -> QueueType {
        self.command_buffer.queue()
    }

    pub fn pass_name(&self) -> &str {
        self.pass
    }

    /// Number of commands recorded through this recorder.
    pub fn command_count(&self) -> u32 {
        self.command_count
    }
}

impl std::fmt::Debug for CommandRecorder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRecorder")
            .field("backend", &self.backend.name())
            .field("command_buffer", &self.command_buffer)
            .field("pass", &self.pass)
            .field("command_count", &self.command_count)
            .finish()
    }
}
