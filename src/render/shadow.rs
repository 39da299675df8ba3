//! Per-light shadow state
//!
//! Every shadow-casting light owns a depth image with its framebuffer, plus a
//! command buffer, fence and "finished" semaphore per frame in flight. The
//! image is created shader-readable; each frame it is moved to depth
//! attachment layout before its pass and back before the color pass samples it.

use crate::backend::types::*;
use crate::backend::traits::*;
use crate::scene::Light;
use glam::Mat4;
use std::sync::{Arc, Weak};

#[derive(Debug)]
pub struct ShadowState {
    light: Weak<Light>,
    light_id: u64,
    slot: usize,
    pub image: ImageHandle,
    pub framebuffer: FramebufferHandle,
    command_buffers: Vec<CommandBufferHandle>,
    fences: Vec<FenceHandle>,
    finished: Vec<SemaphoreHandle>,
}

impl ShadowState {
    pub fn create<D: RenderDevice>(
        device: &mut D,
        light: &Arc<Light>,
        slot: usize,
        resolution: u32,
        frames_in_flight: usize,
    ) -> BackendResult<Self> {
        let image = device.create_image(&ImageDescriptor::shadow_map(
            format!("shadow map '{}'", light.name()),
            resolution,
        ))?;
        let framebuffer = match device.create_shadow_framebuffer(image) {
            Ok(framebuffer) => framebuffer,
            Err(e) => {
                device.destroy_image(image);
                return Err(e);
            }
        };

        let mut state = Self {
            light: Arc::downgrade(light),
            light_id: light.id(),
            slot,
            image,
            framebuffer,
            command_buffers: Vec::with_capacity(frames_in_flight),
            fences: Vec::with_capacity(frames_in_flight),
            finished: Vec::with_capacity(frames_in_flight),
        };
        if let Err(e) = state.create_sync(device, frames_in_flight) {
            state.destroy(device);
            return Err(e);
        }

        log::info!(
            "Created {}x{} shadow map for light '{}' in slot {}",
            resolution,
            resolution,
            light.name(),
            slot
        );
        Ok(state)
    }

    fn create_sync<D: RenderDevice>(&mut self, device: &mut D, frames: usize) -> BackendResult<()> {
        for _ in 0..frames {
            self.command_buffers.push(device.allocate_command_buffer()?);
            self.fences.push(device.create_fence(true)?);
            self.finished.push(device.create_semaphore()?);
        }
        Ok(())
    }

    pub fn light_id(&self) -> u64 {
        self.light_id
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn light(&self) -> Option<Arc<Light>> {
        self.light.upgrade()
    }

    /// (view, proj) of the light, if it still exists
    pub fn view_projection(&self) -> Option<(Mat4, Mat4)> {
        self.light().map(|l| (l.view_matrix(), l.projection_matrix()))
    }

    pub fn command_buffer(&self, frame: usize) -> Option<CommandBufferHandle> {
        self.command_buffers.get(frame).copied()
    }

    pub fn fence(&self, frame: usize) -> Option<FenceHandle> {
        self.fences.get(frame).copied()
    }

    pub fn finished(&self, frame: usize) -> Option<SemaphoreHandle> {
        self.finished.get(frame).copied()
    }

    /// Block until every submission of this light has retired
    pub fn wait<D: RenderDevice>(&self, device: &mut D) -> BackendResult<()> {
        if self.fences.is_empty() {
            return Ok(());
        }
        device.wait_for_fences(&self.fences)
    }

    /// Free everything; the caller guarantees no frame still samples the image
    pub fn destroy<D: RenderDevice>(self, device: &mut D) {
        for semaphore in self.finished {
            device.destroy_semaphore(semaphore);
        }
        for fence in self.fences {
            device.destroy_fence(fence);
        }
        for command_buffer in self.command_buffers {
            device.free_command_buffer(command_buffer);
        }
        device.destroy_framebuffer(self.framebuffer);
        device.destroy_image(self.image);
        log::debug!("Destroyed shadow map of light {} (slot {})", self.light_id, self.slot);
    }
}
