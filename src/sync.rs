//! Per-frame-in-flight synchronization objects.
//!
//! One (image-available, render-finished, in-flight) triple per slot. Fences
//! start signaled so the first pass over the slots never blocks.

use crate::backend::{BackendError, BackendResult, FenceHandle, GraphicsBackend, SemaphoreHandle};

/// Synchronization objects of one frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSyncObjects {
    pub image_available: SemaphoreHandle,
    pub render_finished: SemaphoreHandle,
    pub in_flight: FenceHandle,
}

/// N-buffered semaphore/fence sets, advanced once per frame.
#[derive(Debug, Default)]
pub struct FrameSync {
    slots: Vec<FrameSyncObjects>,
    current: usize,
}

impl FrameSync {
    /// Create `frame_count` independent slots. On failure every object
    /// created so far is destroyed before the error is returned.
    pub fn new(backend: &mut dyn GraphicsBackend, frame_count: u32) -> BackendResult<Self> {
        let mut sync = Self {
            slots: Vec::with_capacity(frame_count as usize),
            current: 0,
        };
        for _ in 0..frame_count {
            match Self::create_slot(backend) {
                Ok(slot) => sync.slots.push(slot),
                Err(e) => {
                    log::error!("Failed to create frame sync objects: {}", e);
                    sync.destroy(backend);
                    return Err(e);
                }
            }
        }
        log::debug!("Frame sync initialized with {} slots", frame_count);
        Ok(sync)
    }

    fn create_slot(backend: &mut dyn GraphicsBackend) -> BackendResult<FrameSyncObjects> {
        let image_available = backend.create_semaphore()?;
        let render_finished = match backend.create_semaphore() {
            Ok(s) => s,
            Err(e) => {
                backend.destroy_semaphore(image_available);
                return Err(e);
            }
        };
        let in_flight = match backend.create_fence(true) {
            Ok(f) => f,
            Err(e) => {
                backend.destroy_semaphore(image_available);
                backend.destroy_semaphore(render_finished);
                return Err(e);
            }
        };
        Ok(FrameSyncObjects {
            image_available,
            render_finished,
            in_flight,
        })
    }

    /// Block until the GPU has finished the frame that last used this slot.
    pub fn wait_for_fence(&self, backend: &mut dyn GraphicsBackend) -> BackendResult<()> {
        backend.wait_for_fence(self.current()?.in_flight)
    }

    pub fn reset_fence(&self, backend: &mut dyn GraphicsBackend) -> BackendResult<()> {
        backend.reset_fence(self.current()?.in_flight)
    }

    /// Move to the next slot, wrapping at the slot count.
    pub fn advance(&mut self) {
        if !self.slots.is_empty() {
            self.current = (self.current + 1) % self.slots.len();
        }
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Objects of the active slot. Fails once the set has been destroyed.
    pub fn current(&self) -> BackendResult<FrameSyncObjects> {
        self.slots
            .get(self.current)
            .copied()
            .ok_or_else(|| BackendError::InvalidHandle("frame sync has no slots".into()))
    }

    pub fn slot(&self, index: usize) -> Option<FrameSyncObjects> {
        self.slots.get(index).copied()
    }

    pub fn frame_count(&self) -> usize {
        self.slots.len()
    }

    /// Destroy every slot. Safe to call more than once.
    pub fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        for slot in self.slots.drain(..) {
            backend.destroy_semaphore(slot.image_available);
            backend.destroy_semaphore(slot.render_finished);
            backend.destroy_fence(slot.in_flight);
        }
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, DummyEvent};

    #[test]
    fn test_slots_cycle_modulo_count() {
        let mut backend = DummyBackend::new();
        let mut sync = FrameSync::new(&mut backend, 3).unwrap();

        let visited: Vec<usize> = (0..7)
            .map(|_| {
                let index = sync.current_index();
                sync.advance();
                index
            })
            .collect();
        assert_eq!(visited, vec![0, 1, 2, 0, 1, 2, 0]);

        sync.destroy(&mut backend);
    }

    #[test]
    fn test_first_round_does_not_block() {
        let mut backend = DummyBackend::new();
        let mut sync = FrameSync::new(&mut backend, 2).unwrap();
        for _ in 0..2 {
            sync.wait_for_fence(&mut backend).unwrap();
            sync.advance();
        }
        assert!(backend.hazards().is_empty());
        sync.destroy(&mut backend);
    }

    #[test]
    fn test_wait_targets_current_slot_fence() {
        let mut backend = DummyBackend::new();
        let mut sync = FrameSync::new(&mut backend, 2).unwrap();
        sync.advance();
        sync.wait_for_fence(&mut backend).unwrap();
        let expected = sync.slot(1).unwrap().in_flight;
        assert_eq!(backend.events().last(), Some(&DummyEvent::FenceWait(expected)));
        sync.destroy(&mut backend);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut backend = DummyBackend::new();
        let mut sync = FrameSync::new(&mut backend, 3).unwrap();
        assert_eq!(backend.live_resources().fences, 3);
        assert_eq!(backend.live_resources().semaphores, 6);

        sync.destroy(&mut backend);
        sync.destroy(&mut backend);

        assert_eq!(backend.live_resources().fences, 0);
        assert_eq!(backend.live_resources().semaphores, 0);
        assert!(backend.hazards().is_empty());
        assert_eq!(sync.frame_count(), 0);
    }

    #[test]
    fn test_destroyed_set_reports_errors() {
        let mut backend = DummyBackend::new();
        let mut sync = FrameSync::new(&mut backend, 2).unwrap();
        sync.advance();
        sync.destroy(&mut backend);

        assert!(matches!(sync.current(), Err(BackendError::InvalidHandle(_))));
        assert!(sync.wait_for_fence(&mut backend).is_err());
        assert!(sync.reset_fence(&mut backend).is_err());
        assert!(backend.hazards().is_empty());
    }
}
