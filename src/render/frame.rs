//! Per-ring-slot synchronization objects and command buffers

use crate::backend::traits::*;

/// Everything one slot of the frames-in-flight ring owns
#[derive(Debug, Clone, Copy)]
pub struct FrameSync {
    /// Records the depth pre-pass, or the standalone shadow layout transition
    pub zprepass_cb: CommandBufferHandle,
    pub color_cb: CommandBufferHandle,
    pub image_available: SemaphoreHandle,
    pub zprepass_finished: SemaphoreHandle,
    pub render_finished: SemaphoreHandle,
    pub color_fence: FenceHandle,
    /// Fences the pre-pass or standalone transition submit
    pub depth_fence: FenceHandle,
}

impl FrameSync {
    /// Fences start signaled so the first wait on each slot returns at once
    pub fn create<D: RenderDevice>(device: &mut D) -> BackendResult<Self> {
        let zprepass_cb = device.allocate_command_buffer()?;
        let color_cb = device.allocate_command_buffer()?;
        let image_available = device.create_semaphore()?;
        let zprepass_finished = device.create_semaphore()?;
        let render_finished = device.create_semaphore()?;
        let color_fence = device.create_fence(true)?;
        let depth_fence = device.create_fence(true)?;
        Ok(Self {
            zprepass_cb,
            color_cb,
            image_available,
            zprepass_finished,
            render_finished,
            color_fence,
            depth_fence,
        })
    }

    /// Build the whole ring; on failure nothing is leaked
    pub fn create_ring<D: RenderDevice>(device: &mut D, frames: usize) -> BackendResult<Vec<Self>> {
        let mut ring = Vec::with_capacity(frames);
        for _ in 0..frames {
            match Self::create(device) {
                Ok(frame) => ring.push(frame),
                Err(e) => {
                    for frame in ring {
                        frame.destroy(device);
                    }
                    return Err(e);
                }
            }
        }
        Ok(ring)
    }

    pub fn destroy<D: RenderDevice>(self, device: &mut D) {
        device.destroy_fence(self.depth_fence);
        device.destroy_fence(self.color_fence);
        device.destroy_semaphore(self.render_finished);
        device.destroy_semaphore(self.zprepass_finished);
        device.destroy_semaphore(self.image_available);
        device.free_command_buffer(self.color_cb);
        device.free_command_buffer(self.zprepass_cb);
    }
}
