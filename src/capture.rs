//! Capture source seam.
//!
//! The real camera session lives outside this crate; the core only needs
//! the current frame, a focus side effect, and start/stop control. The
//! still-frame source stands in for a live camera in the CLI and in tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// A tap position in normalized image coordinates, both axes in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedPoint {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraPosition {
    Front,
    Back,
}

/// External camera collaborator. Frames are opaque encoded image buffers.
pub trait CaptureSource: Send + Sync {
    /// Latest frame, or `None` when the session has not produced one yet.
    fn current_frame(&self) -> Option<Vec<u8>>;

    /// Best-effort focus/metering at a normalized point.
    fn focus(&self, point: NormalizedPoint);

    fn position(&self) -> CameraPosition;

    fn start(&self);

    fn stop(&self);
}

/// Capture source backed by a fixed set of pre-encoded frames, cycling
/// through them on each read.
pub struct StillFrameSource {
    frames: Vec<Vec<u8>>,
    cursor: AtomicUsize,
    running: AtomicBool,
    last_focus: Mutex<Option<NormalizedPoint>>,
}

impl StillFrameSource {
    pub fn new(frames: Vec<Vec<u8>>) -> Self {
        StillFrameSource {
            frames,
            cursor: AtomicUsize::new(0),
            running: AtomicBool::new(true),
            last_focus: Mutex::new(None),
        }
    }

    pub fn last_focus(&self) -> Option<NormalizedPoint> {
        *self.last_focus.lock().unwrap()
    }

    pub fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }
}

impl CaptureSource for StillFrameSource {
    fn current_frame(&self) -> Option<Vec<u8>> {
        if !self.running.load(Ordering::Relaxed) || self.frames.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.frames.len();
        Some(self.frames[index].clone())
    }

    fn focus(&self, point: NormalizedPoint) {
        *self.last_focus.lock().unwrap() = Some(point);
    }

    fn position(&self) -> CameraPosition {
        CameraPosition::Back
    }

    fn start(&self) {
        self.running.store(true, Ordering::Relaxed);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_still_source_cycles_frames() {
        let source = StillFrameSource::new(vec![vec![1], vec![2]]);
        assert_eq!(source.current_frame(), Some(vec![1]));
        assert_eq!(source.current_frame(), Some(vec![2]));
        assert_eq!(source.current_frame(), Some(vec![1]));
    }

    #[test]
    fn test_stopped_source_yields_no_frames() {
        let source = StillFrameSource::new(vec![vec![1]]);
        source.stop();
        assert_eq!(source.current_frame(), None);
        source.start();
        assert!(source.current_frame().is_some());
    }

    #[test]
    fn test_focus_is_recorded() {
        let source = StillFrameSource::new(vec![]);
        assert!(source.last_focus().is_none());
        source.focus(NormalizedPoint { x: 0.25, y: 0.75 });
        assert_eq!(source.last_focus(), Some(NormalizedPoint { x: 0.25, y: 0.75 }));
    }
}
