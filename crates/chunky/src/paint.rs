use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::RgbaImage;

use crate::blend::{BlendMode, composite_onto};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Paint,
    Surface,
}

#[derive(Debug, Default)]
struct LedgerState {
    shutdown_started: bool,
    next_id: u64,
    live_by_kind: HashMap<ResourceKind, HashSet<u64>>,
}

/// Tracks every live paint and scratch surface so leaks show up in tests.
#[derive(Debug, Clone, Default)]
pub struct ResourceLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn live_count(&self) -> usize {
        self.lock().live_by_kind.values().map(HashSet::len).sum()
    }

    pub fn live_count_of(&self, kind: ResourceKind) -> usize {
        self.lock().live_by_kind.get(&kind).map_or(0, HashSet::len)
    }

    pub fn is_drained(&self) -> bool {
        self.live_count() == 0
    }

    pub fn is_shutdown_started(&self) -> bool {
        self.lock().shutdown_started
    }

    /// Releases already handed out stay valid; only new acquisitions are refused.
    pub fn begin_shutdown(&self) {
        self.lock().shutdown_started = true;
    }

    pub fn acquire_paint(&self, blend_mode: BlendMode, opacity: f32) -> Paint {
        Paint {
            blend_mode,
            opacity: opacity.clamp(0.0, 1.0),
            handle: Some(self.record_acquired(ResourceKind::Paint)),
        }
    }

    pub fn acquire_surface(&self, width: u32, height: u32) -> ScratchSurface {
        ScratchSurface {
            image: RgbaImage::new(width, height),
            handle: Some(self.record_acquired(ResourceKind::Surface)),
        }
    }

    fn record_acquired(&self, kind: ResourceKind) -> ResourceHandle {
        let mut state = self.lock();
        if state.shutdown_started {
            panic!("resource ledger rejects new {kind:?} acquisition after shutdown");
        }
        let id = state.next_id;
        state.next_id = state
            .next_id
            .checked_add(1)
            .expect("resource id overflow");
        state.live_by_kind.entry(kind).or_default().insert(id);
        ResourceHandle {
            ledger: self.clone(),
            kind,
            id,
        }
    }

    fn record_released(&self, kind: ResourceKind, id: u64) {
        let mut state = self.lock();
        let removed = state
            .live_by_kind
            .get_mut(&kind)
            .is_some_and(|live| live.remove(&id));
        if !removed {
            panic!("resource ledger released unknown {kind:?} id {id}");
        }
    }
}

#[derive(Debug)]
struct ResourceHandle {
    ledger: ResourceLedger,
    kind: ResourceKind,
    id: u64,
}

impl ResourceHandle {
    fn release(self) {
        self.ledger.record_released(self.kind, self.id);
    }
}

/// Blend mode plus opacity, owned through a [`ResourceLedger`].
#[derive(Debug)]
pub struct Paint {
    blend_mode: BlendMode,
    opacity: f32,
    handle: Option<ResourceHandle>,
}

impl Paint {
    pub fn blend_mode(&self) -> BlendMode {
        self.assert_live();
        self.blend_mode
    }

    pub fn opacity(&self) -> f32 {
        self.assert_live();
        self.opacity
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.assert_live();
        self.opacity = opacity.clamp(0.0, 1.0);
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }

    /// Idempotent.
    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.release();
        }
    }

    pub fn draw_image(&self, target: &mut RgbaImage, source: &RgbaImage, offset: (i32, i32)) {
        composite_onto(target, source, offset, self.blend_mode(), self.opacity());
    }

    fn assert_live(&self) {
        if self.handle.is_none() {
            panic!("paint used after release");
        }
    }
}

impl Drop for Paint {
    fn drop(&mut self) {
        self.release();
    }
}

/// Temporary full-size buffer used while compositing groups.
#[derive(Debug)]
pub struct ScratchSurface {
    image: RgbaImage,
    handle: Option<ResourceHandle>,
}

impl ScratchSurface {
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.release();
        }
        self.image = RgbaImage::new(0, 0);
    }
}

impl Drop for ScratchSurface {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_is_idempotent_and_drop_releases() {
        let ledger = ResourceLedger::new();
        let mut paint = ledger.acquire_paint(BlendMode::Normal, 1.0);
        let surface = ledger.acquire_surface(4, 4);
        assert_eq!(ledger.live_count(), 2);
        assert_eq!(ledger.live_count_of(ResourceKind::Surface), 1);

        paint.release();
        paint.release();
        assert!(paint.is_released());
        assert_eq!(ledger.live_count(), 1);

        drop(surface);
        drop(paint);
        assert!(ledger.is_drained());
    }

    #[test]
    fn opacity_is_clamped() {
        let ledger = ResourceLedger::new();
        let paint = ledger.acquire_paint(BlendMode::Normal, 3.0);
        assert_eq!(paint.opacity(), 1.0);
    }

    #[test]
    #[should_panic(expected = "paint used after release")]
    fn released_paint_cannot_be_used() {
        let ledger = ResourceLedger::new();
        let mut paint = ledger.acquire_paint(BlendMode::DstIn, 1.0);
        paint.release();
        let _ = paint.blend_mode();
    }

    #[test]
    #[should_panic(expected = "rejects new Paint acquisition after shutdown")]
    fn shutdown_rejects_new_paint() {
        let ledger = ResourceLedger::new();
        ledger.begin_shutdown();
        let _ = ledger.acquire_paint(BlendMode::Normal, 1.0);
    }

    #[test]
    fn shutdown_still_accepts_release() {
        let ledger = ResourceLedger::new();
        let paint = ledger.acquire_paint(BlendMode::Normal, 1.0);
        ledger.begin_shutdown();
        drop(paint);
        assert!(ledger.is_drained());
    }
}
