//! Mesh upload queue
//!
//! Producers on any thread enqueue mesh payloads; the render thread drains at
//! most one per frame so a burst of loads never stalls a frame for long. The
//! queue only holds weak references: a payload dropped by its producer before
//! upload is discarded.

use crate::error::RenderResult;
use crate::resources::MeshData;
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Result of handing one payload to the upload step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Uploaded,
    /// Dependencies (e.g. the material's shader list) are not loaded yet
    NotReady,
}

/// What a drain call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing was queued
    Idle,
    Uploaded,
    /// The item was not ready and went to the back of the queue
    Deferred,
    /// The payload had already been dropped by its producer
    Discarded,
    /// Another thread held the lock (only from `try_drain_one`)
    Busy,
}

#[derive(Debug, Default)]
pub struct UploadQueue {
    queue: Mutex<VecDeque<Weak<MeshData>>>,
    dirty: AtomicBool,
}

impl UploadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a payload for upload; callable from any thread
    pub fn enqueue(&self, mesh: &Arc<MeshData>) {
        let mut queue = self.queue.lock();
        queue.push_back(Arc::downgrade(mesh));
        self.dirty.store(true, Ordering::Release);
        log::debug!("Queued mesh '{}' for upload ({} pending)", mesh.name(), queue.len());
    }

    /// Whether anything is waiting
    pub fn has_pending(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pop and upload at most one payload, blocking on the lock
    ///
    /// The lock stays held while `upload` runs. An error from `upload` drops
    /// the item and is returned as is.
    pub fn drain_one<F>(&self, upload: F) -> RenderResult<DrainOutcome>
    where
        F: FnOnce(Arc<MeshData>) -> RenderResult<UploadStatus>,
    {
        if !self.has_pending() {
            return Ok(DrainOutcome::Idle);
        }
        let queue = self.queue.lock();
        self.drain_locked(queue, upload)
    }

    /// Like `drain_one`, but gives up immediately if the lock is taken
    pub fn try_drain_one<F>(&self, upload: F) -> RenderResult<DrainOutcome>
    where
        F: FnOnce(Arc<MeshData>) -> RenderResult<UploadStatus>,
    {
        if !self.has_pending() {
            return Ok(DrainOutcome::Idle);
        }
        match self.queue.try_lock() {
            Some(queue) => self.drain_locked(queue, upload),
            None => Ok(DrainOutcome::Busy),
        }
    }

    fn drain_locked<F>(
        &self,
        mut queue: MutexGuard<'_, VecDeque<Weak<MeshData>>>,
        upload: F,
    ) -> RenderResult<DrainOutcome>
    where
        F: FnOnce(Arc<MeshData>) -> RenderResult<UploadStatus>,
    {
        let Some(item) = queue.pop_front() else {
            self.dirty.store(false, Ordering::Release);
            return Ok(DrainOutcome::Idle);
        };

        let outcome = match item.upgrade() {
            None => DrainOutcome::Discarded,
            Some(mesh) if !mesh.is_alive() => {
                log::debug!("Dropping queued mesh '{}' destroyed before upload", mesh.name());
                DrainOutcome::Discarded
            }
            Some(mesh) => match upload(Arc::clone(&mesh)) {
                Ok(UploadStatus::Uploaded) => DrainOutcome::Uploaded,
                Ok(UploadStatus::NotReady) => {
                    queue.push_back(item);
                    DrainOutcome::Deferred
                }
                Err(e) => {
                    if queue.is_empty() {
                        self.dirty.store(false, Ordering::Release);
                    }
                    return Err(e);
                }
            },
        };

        if queue.is_empty() {
            self.dirty.store(false, Ordering::Release);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;

    fn mesh(name: &str) -> Arc<MeshData> {
        Arc::new(MeshData::plane(name, 1.0, 1.0, "ground"))
    }

    #[test]
    fn test_fifo_one_per_call() {
        let queue = UploadQueue::new();
        let (a, b) = (mesh("a"), mesh("b"));
        queue.enqueue(&a);
        queue.enqueue(&b);

        let mut seen = Vec::new();
        let outcome = queue
            .drain_one(|m| {
                seen.push(m.name().to_string());
                Ok(UploadStatus::Uploaded)
            })
            .unwrap();
        assert_eq!(outcome, DrainOutcome::Uploaded);
        assert_eq!(seen, ["a"]);
        assert!(queue.has_pending());

        queue
            .drain_one(|m| {
                seen.push(m.name().to_string());
                Ok(UploadStatus::Uploaded)
            })
            .unwrap();
        assert_eq!(seen, ["a", "b"]);
        assert!(!queue.has_pending());
        assert_eq!(queue.drain_one(|_| unreachable!()).unwrap(), DrainOutcome::Idle);
    }

    #[test]
    fn test_not_ready_is_retried_later() {
        let queue = UploadQueue::new();
        let (a, b) = (mesh("a"), mesh("b"));
        queue.enqueue(&a);
        queue.enqueue(&b);

        let outcome = queue.drain_one(|_| Ok(UploadStatus::NotReady)).unwrap();
        assert_eq!(outcome, DrainOutcome::Deferred);
        assert_eq!(queue.len(), 2);

        let mut seen = Vec::new();
        queue
            .drain_one(|m| {
                seen.push(m.name().to_string());
                Ok(UploadStatus::Uploaded)
            })
            .unwrap();
        assert_eq!(seen, ["b"]);
        assert!(queue.has_pending());
    }

    #[test]
    fn test_dropped_payload_is_discarded() {
        let queue = UploadQueue::new();
        queue.enqueue(&mesh("gone"));
        let outcome = queue.drain_one(|_| unreachable!()).unwrap();
        assert_eq!(outcome, DrainOutcome::Discarded);
        assert!(!queue.has_pending());
    }

    #[test]
    fn test_error_drops_item() {
        let queue = UploadQueue::new();
        let a = mesh("a");
        queue.enqueue(&a);
        let err = queue
            .drain_one(|_| Err(RenderError::PipelineSlotsExhausted { max: 10 }))
            .unwrap_err();
        assert!(matches!(err, RenderError::PipelineSlotsExhausted { .. }));
        assert!(queue.is_empty());
        assert!(!queue.has_pending());
    }

    #[test]
    fn test_try_drain_reports_contention() {
        let queue = UploadQueue::new();
        let a = mesh("a");
        queue.enqueue(&a);

        let guard = queue.queue.lock();
        assert_eq!(queue.try_drain_one(|_| unreachable!()).unwrap(), DrainOutcome::Busy);
        drop(guard);
        assert_eq!(
            queue.try_drain_one(|_| Ok(UploadStatus::Uploaded)).unwrap(),
            DrainOutcome::Uploaded
        );
    }

    #[test]
    fn test_producers_on_other_threads() {
        let queue = Arc::new(UploadQueue::new());
        let meshes: Vec<_> = (0..8).map(|i| mesh(&format!("m{}", i))).collect();

        std::thread::scope(|s| {
            for chunk in meshes.chunks(2) {
                let queue = Arc::clone(&queue);
                s.spawn(move || {
                    for m in chunk {
                        queue.enqueue(m);
                    }
                });
            }
        });

        let mut uploaded = 0;
        while queue.has_pending() {
            if queue.drain_one(|_| Ok(UploadStatus::Uploaded)).unwrap() == DrainOutcome::Uploaded {
                uploaded += 1;
            }
        }
        assert_eq!(uploaded, 8);
    }
}
