//! Deferred destruction
//!
//! Meshes, batches, deferred lighting draws and shadow states that leave the frame loop may still be
//! read by frames in flight. They wait here, stamped with the frame number in
//! which they were retired, until every ring slot has passed its fence wait
//! since then.

use crate::backend::RenderDevice;
use crate::draw::{DeferredLighting, DrawBatch};
use crate::error::RenderResult;
use crate::render::ShadowState;
use crate::resources::{BufferManager, GpuMesh};
use std::collections::VecDeque;

/// Something waiting to be destroyed
pub enum Retired {
    Mesh(GpuMesh),
    Batch(DrawBatch),
    Lighting(DeferredLighting),
    Shadow(ShadowState),
}

impl Retired {
    fn destroy<D: RenderDevice>(self, device: &mut D, buffers: &mut BufferManager) -> RenderResult<()> {
        match self {
            Retired::Mesh(mesh) => mesh.destroy(device, buffers),
            Retired::Batch(batch) => batch.destroy(device, buffers),
            Retired::Lighting(lighting) => lighting.destroy(device, buffers),
            Retired::Shadow(shadow) => {
                shadow.wait(device)?;
                shadow.destroy(device);
                Ok(())
            }
        }
    }
}

pub struct RetireQueue {
    items: VecDeque<(u64, Retired)>,
    frames_in_flight: u64,
}

impl RetireQueue {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            items: VecDeque::new(),
            frames_in_flight: frames_in_flight as u64,
        }
    }

    /// Queue an item retired during frame `frame_number`
    pub fn push(&mut self, frame_number: u64, item: Retired) {
        self.items.push_back((frame_number, item));
    }

    /// Destroy items no frame in flight can reference any more
    ///
    /// Call after the current slot's fences were waited. Returns how many
    /// items were destroyed.
    pub fn release_ready<D: RenderDevice>(
        &mut self,
        device: &mut D,
        buffers: &mut BufferManager,
        frame_number: u64,
    ) -> RenderResult<usize> {
        let mut released = 0;
        while let Some(&(retired_at, _)) = self.items.front() {
            if frame_number < retired_at + self.frames_in_flight {
                break;
            }
            if let Some((_, item)) = self.items.pop_front() {
                item.destroy(device, buffers)?;
                released += 1;
            }
        }
        if released > 0 {
            log::debug!("Released {} retired resources at frame {}", released, frame_number);
        }
        Ok(released)
    }

    /// Destroy everything; the device must be idle
    pub fn release_all<D: RenderDevice>(&mut self, device: &mut D, buffers: &mut BufferManager) -> RenderResult<()> {
        let mut result = Ok(());
        while let Some((_, item)) = self.items.pop_front() {
            if let Err(e) = item.destroy(device, buffers) {
                result = Err(e);
            }
        }
        result
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyDevice, ResourceKind};
    use crate::scene::Light;
    use glam::Vec3;
    use std::sync::Arc;

    #[test]
    fn test_items_wait_a_full_ring() {
        let mut device = DummyDevice::new();
        let mut buffers = BufferManager::new();
        let light = Arc::new(Light::sun(1, "sun", Vec3::NEG_Y, Vec3::ONE, 1.0));
        let shadow = ShadowState::create(&mut device, &light, 0, 256, 2).unwrap();

        let mut queue = RetireQueue::new(2);
        queue.push(5, Retired::Shadow(shadow));

        assert_eq!(queue.release_ready(&mut device, &mut buffers, 5).unwrap(), 0);
        assert_eq!(queue.release_ready(&mut device, &mut buffers, 6).unwrap(), 0);
        assert_eq!(device.live_count(ResourceKind::Image), 1);

        assert_eq!(queue.release_ready(&mut device, &mut buffers, 7).unwrap(), 1);
        assert!(queue.is_empty());
        assert_eq!(device.live_count(ResourceKind::Image), 0);
        assert_eq!(device.live_count(ResourceKind::Fence), 0);
        assert!(device.violations().is_empty());
    }
}
