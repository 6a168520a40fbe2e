//! Pixel to character/colour mapping.
//!
//! Luminance is computed with integer weights so the result is the exact
//! truncation of the weighted sum, which keeps pure white at 255.

use image::Rgb;
use std::io::Write;

/// Longest true-colour sequence for one character: `ESC[38;2;255;255;255mX`.
pub const MAX_ANSI_COLOR_LEN: usize = 24;

/// Character treated as empty space by the renderer and optimizer.
pub const BLANK: u8 = b' ';

/// Terminals at or below this colour count get no palette quantization.
const BASELINE_COLOR_COUNT: u32 = 8;

/// Indexed colour escapes (`ESC[38;5;Nm`) address at most 256 entries.
pub const MAX_INDEXED_COLORS: u32 = 256;

/// Approximate relative luminance of a pixel, skipping linearisation.
///
/// With `force_average` the three channels are weighted equally.
pub fn luminance(px: Rgb<u8>, force_average: bool) -> u8 {
    let r = px[0] as u32;
    let g = px[1] as u32;
    let b = px[2] as u32;
    let l = if force_average {
        (r + g + b) / 3
    } else {
        (2126 * r + 7152 * g + 722 * b) / 10_000
    };
    l.min(255) as u8
}

/// Index into a ramp of `len` characters for a luminance value.
///
/// `floor(luma / 255 * len)`, clamped so that `luma == 255` maps to the
/// last character.
pub fn char_index(luma: u8, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let idx = (luma as usize * len) / 255;
    idx.min(len - 1)
}

pub fn char_for(luma: u8, ascii_chars: &[u8]) -> u8 {
    ascii_chars[char_index(luma, ascii_chars.len())]
}

/// Appends `c` preceded by a true-colour foreground escape.
///
/// Blank characters are written bare since their colour is invisible.
pub fn push_ansi_colored(out: &mut Vec<u8>, px: Rgb<u8>, c: u8) {
    if c == BLANK {
        out.push(c);
        return;
    }
    // Writing into a Vec cannot fail.
    let _ = write!(out, "\x1b[38;2;{};{};{}m", px[0], px[1], px[2]);
    out.push(c);
}

/// Largest `k` with `k^3 <= n`.
fn integer_cbrt(n: u32) -> u32 {
    let mut k: u32 = 0;
    while (k + 1).pow(3) <= n {
        k += 1;
    }
    k
}

/// Maps colours onto an evenly spaced `levels^3` cube of palette entries.
///
/// Each channel snaps to the nearest of `steps + 1` levels and the three
/// level indices are combined as mixed-radix digits `r, g, b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaletteQuantizer {
    steps: u32,
}

/// Most levels per channel whose cube still has every index in a `u16`.
const fn max_levels() -> u32 {
    let mut levels = 1;
    while (levels + 1) * (levels + 1) * (levels + 1) - 1 <= u16::MAX as u32 {
        levels += 1;
    }
    levels
}

/// Largest step count [`PaletteQuantizer`] accepts.
pub const MAX_PALETTE_STEPS: u32 = max_levels() - 1;

impl PaletteQuantizer {
    pub fn new(steps: u32) -> Self {
        Self { steps: steps.clamp(1, MAX_PALETTE_STEPS) }
    }

    /// Derives the step count from a terminal's advertised colour count.
    ///
    /// Returns `None` for baseline 8-colour terminals or terminals that
    /// cannot redefine their palette.
    pub fn from_capabilities(color_count: u32, can_redefine: bool) -> Option<Self> {
        if !can_redefine || color_count <= BASELINE_COLOR_COUNT {
            return None;
        }
        let steps = integer_cbrt(color_count.min(MAX_INDEXED_COLORS)).saturating_sub(1);
        if steps == 0 {
            return None;
        }
        Some(Self::new(steps))
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Levels per channel.
    pub fn levels(&self) -> u32 {
        self.steps + 1
    }

    /// Number of palette entries that must be registered.
    pub fn len(&self) -> usize {
        (self.levels() as usize).pow(3)
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    fn level_of(&self, channel: u8) -> u32 {
        // round(channel * steps / 255)
        (channel as u32 * self.steps * 2 + 255) / 510
    }

    fn channel_of(&self, level: u32) -> u8 {
        ((level * 255 * 2 + self.steps) / (self.steps * 2)) as u8
    }

    pub fn encode(&self, px: Rgb<u8>) -> u16 {
        let levels = self.levels();
        let r = self.level_of(px[0]);
        let g = self.level_of(px[1]);
        let b = self.level_of(px[2]);
        (r * levels * levels + g * levels + b) as u16
    }

    /// Colour registered for a palette entry.
    pub fn decode(&self, index: u16) -> Rgb<u8> {
        let levels = self.levels();
        let i = index as u32;
        let r = i / (levels * levels);
        let g = (i / levels) % levels;
        let b = i % levels;
        Rgb([self.channel_of(r), self.channel_of(g), self.channel_of(b)])
    }

    pub fn entries(&self) -> impl Iterator<Item = (u16, Rgb<u8>)> + '_ {
        (0..self.len() as u16).map(move |i| (i, self.decode(i)))
    }
}
