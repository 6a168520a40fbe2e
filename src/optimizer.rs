use image::Rgb;

use crate::color::BLANK;

/// Decides when a colour escape is worth emitting.
///
/// The stored colour is the last one actually written to the terminal, not
/// the previous pixel, so a run of similar pixels keeps comparing against
/// the colour the terminal is still showing.
#[derive(Debug, Clone)]
pub struct ColorOptimizer {
    prev: Rgb<u8>,
    threshold: u8,
}

impl ColorOptimizer {
    pub fn new(threshold: u8) -> Self {
        Self { prev: Rgb([0, 0, 0]), threshold }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: u8) {
        self.threshold = threshold;
    }

    pub fn prev(&self) -> Rgb<u8> {
        self.prev
    }

    pub fn set_prev(&mut self, px: Rgb<u8>) {
        self.prev = px;
    }

    /// True when every channel differs from the last emitted colour by more
    /// than the threshold and `c` is visible.
    pub fn should_apply(&self, px: Rgb<u8>, c: u8) -> bool {
        if c == BLANK {
            return false;
        }
        let t = self.threshold;
        self.prev[0].abs_diff(px[0]) > t
            && self.prev[1].abs_diff(px[1]) > t
            && self.prev[2].abs_diff(px[2]) > t
    }

    /// [`should_apply`](Self::should_apply), recording `px` as emitted when
    /// it returns true.
    pub fn consider(&mut self, px: Rgb<u8>, c: u8) -> bool {
        let apply = self.should_apply(px, c);
        if apply {
            self.prev = px;
        }
        apply
    }

    /// Back to the start-of-stream state.
    pub fn reset(&mut self) {
        self.prev = Rgb([0, 0, 0]);
    }
}
