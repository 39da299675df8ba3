//! Shared uniform buffer pool
//!
//! Cameras, materials and light channels are referenced by many meshes and
//! batches at once. Each of them gets one uniform buffer per frame in flight,
//! created on first acquisition and destroyed when the last holder releases it.
//! Callers must only release once no frame in flight can read the buffers; the
//! renderer routes every release through its retire queue for that reason.

use crate::backend::{BufferDescriptor, BufferHandle, RenderDevice};
use crate::error::{RenderError, RenderResult, UniformKind};
use crate::resources::Material;
use crate::scene::{Camera, LightChannel};
use std::collections::HashMap;
use std::sync::Arc;

/// An entity whose parameters live in a shared uniform buffer
pub trait UniformSource: Send + Sync {
    /// Which pool the entity belongs to
    const KIND: UniformKind;

    /// Size of the parameter block in bytes
    const SIZE: u64;

    /// Stable key identifying the entity
    fn uniform_key(&self) -> u64;

    /// Current parameter block
    fn uniform_bytes(&self) -> Vec<u8>;
}

struct SharedEntry<S> {
    refcount: usize,
    buffers: Vec<BufferHandle>,
    source: Arc<S>,
}

/// Reference-counted uniform buffers for one kind of entity
pub struct UniformPool<S: UniformSource> {
    entries: HashMap<u64, SharedEntry<S>>,
}

impl<S: UniformSource> Default for UniformPool<S> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<S: UniformSource> UniformPool<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a reference to the entity's buffers, creating them on first use
    pub fn acquire<D: RenderDevice>(
        &mut self,
        device: &mut D,
        source: &Arc<S>,
        frames_in_flight: usize,
    ) -> RenderResult<Vec<BufferHandle>> {
        let key = source.uniform_key();
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.refcount += 1;
            return Ok(entry.buffers.clone());
        }

        let mut buffers = Vec::with_capacity(frames_in_flight);
        for frame in 0..frames_in_flight {
            let desc = BufferDescriptor::uniform(format!("{} {} frame {}", S::KIND, key, frame), S::SIZE);
            match device.create_buffer(&desc) {
                Ok(buffer) => buffers.push(buffer),
                Err(e) => {
                    for buffer in buffers {
                        device.destroy_buffer(buffer);
                    }
                    return Err(e.into());
                }
            }
        }

        // Seed every frame so the first draws never read garbage
        let bytes = source.uniform_bytes();
        for &buffer in &buffers {
            device.write_buffer(buffer, 0, &bytes)?;
        }

        log::debug!("Created shared {} uniform {}", S::KIND, key);
        self.entries.insert(
            key,
            SharedEntry {
                refcount: 1,
                buffers: buffers.clone(),
                source: Arc::clone(source),
            },
        );
        Ok(buffers)
    }

    /// Drop a reference; the last release destroys the buffers
    pub fn release<D: RenderDevice>(&mut self, device: &mut D, key: u64) -> RenderResult<()> {
        let Some(entry) = self.entries.get_mut(&key) else {
            log::error!("Double release of {} uniform {}", S::KIND, key);
            return Err(RenderError::DoubleRelease { kind: S::KIND, key });
        };

        entry.refcount -= 1;
        if entry.refcount == 0 {
            if let Some(entry) = self.entries.remove(&key) {
                for buffer in entry.buffers {
                    device.destroy_buffer(buffer);
                }
            }
            log::debug!("Destroyed shared {} uniform {}", S::KIND, key);
        }
        Ok(())
    }

    /// Buffers of a live entry
    pub fn buffers(&self, key: u64) -> Option<&[BufferHandle]> {
        self.entries.get(&key).map(|e| e.buffers.as_slice())
    }

    /// Buffer of a live entry for one ring slot
    pub fn buffer(&self, key: u64, frame: usize) -> Option<BufferHandle> {
        self.entries.get(&key).and_then(|e| e.buffers.get(frame).copied())
    }

    /// Outstanding acquisitions for a key (0 if absent)
    pub fn refcount(&self, key: u64) -> usize {
        self.entries.get(&key).map_or(0, |e| e.refcount)
    }

    pub fn contains(&self, key: u64) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write every entry's current parameters into its buffer for `frame`
    pub fn refresh<D: RenderDevice>(&self, device: &mut D, frame: usize) -> RenderResult<()> {
        for entry in self.entries.values() {
            if let Some(&buffer) = entry.buffers.get(frame) {
                device.write_buffer(buffer, 0, &entry.source.uniform_bytes())?;
            }
        }
        Ok(())
    }

    /// Destroy every entry regardless of refcount; returns how many leaked
    pub fn destroy_all<D: RenderDevice>(&mut self, device: &mut D) -> usize {
        let leaked = self.entries.len();
        for (key, entry) in self.entries.drain() {
            log::warn!(
                "Shared {} uniform {} still held {} times at teardown",
                S::KIND,
                key,
                entry.refcount
            );
            for buffer in entry.buffers {
                device.destroy_buffer(buffer);
            }
        }
        leaked
    }
}

/// The three shared uniform pools
#[derive(Default)]
pub struct BufferManager {
    pub cameras: UniformPool<Camera>,
    pub materials: UniformPool<Material>,
    pub light_channels: UniformPool<LightChannel>,
}

impl BufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh all shared entries for one ring slot
    pub fn refresh<D: RenderDevice>(&self, device: &mut D, frame: usize) -> RenderResult<()> {
        self.cameras.refresh(device, frame)?;
        self.materials.refresh(device, frame)?;
        self.light_channels.refresh(device, frame)
    }

    /// Total live entries across all pools
    pub fn len(&self) -> usize {
        self.cameras.len() + self.materials.len() + self.light_channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tear down whatever is left
    pub fn destroy_all<D: RenderDevice>(&mut self, device: &mut D) -> usize {
        self.cameras.destroy_all(device)
            + self.materials.destroy_all(device)
            + self.light_channels.destroy_all(device)
    }
}
