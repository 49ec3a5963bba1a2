use image::RgbaImage;
use std::sync::Arc;

use crate::effects::Effect;

/// One captured still plus the effect that was active when it was taken.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    image: Arc<RgbaImage>,
    effect: Effect,
}

impl Frame {
    pub fn new(image: RgbaImage, effect: Effect) -> Self {
        Self {
            image: Arc::new(image),
            effect,
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Ordered, append-only frame collection bounded by the session's target count.
#[derive(Debug, Clone, Default)]
pub struct FrameStore {
    frames: Vec<Frame>,
    capacity: usize,
}

impl FrameStore {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame. Hands the frame back when the store is already full.
    pub fn push(&mut self, frame: Frame) -> Result<usize, Frame> {
        if self.is_full() {
            return Err(frame);
        }
        self.frames.push(frame);
        Ok(self.frames.len())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.frames.len())
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Clear and re-bound to a new target count.
    pub fn reset(&mut self, capacity: usize) {
        self.frames.clear();
        self.capacity = capacity;
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(effect: Effect) -> Frame {
        Frame::new(RgbaImage::new(4, 3), effect)
    }

    #[test]
    fn test_push_until_full() {
        let mut store = FrameStore::with_capacity(2);
        assert_eq!(store.push(frame(Effect::None)), Ok(1));
        assert_eq!(store.push(frame(Effect::Sepia)), Ok(2));
        assert!(store.is_full());
        assert!(store.push(frame(Effect::Invert)).is_err());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_insertion_order_is_kept() {
        let mut store = FrameStore::with_capacity(3);
        for effect in [Effect::Sepia, Effect::None, Effect::Invert] {
            store.push(frame(effect)).unwrap();
        }
        let effects: Vec<_> = store.frames().iter().map(Frame::effect).collect();
        assert_eq!(effects, vec![Effect::Sepia, Effect::None, Effect::Invert]);
    }

    #[test]
    fn test_reset_rebounds_capacity() {
        let mut store = FrameStore::with_capacity(2);
        store.push(frame(Effect::None)).unwrap();
        store.reset(4);
        assert!(store.is_empty());
        assert_eq!(store.capacity(), 4);
        assert_eq!(store.remaining(), 4);
    }
}
