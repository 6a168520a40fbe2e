//! Fits decoded frames onto the terminal's character grid.

use image::imageops::{self, FilterType};
use image::RgbImage;

/// Character cells are roughly twice as tall as they are wide.
const CELL_ASPECT: f64 = 2.0;

/// Placement of the scaled picture inside the terminal grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TerminalGeometry {
    /// Terminal size in cells.
    pub width: u32,
    pub height: u32,
    /// Scaled picture size in cells.
    pub content_width: u32,
    pub content_height: u32,
    /// Blank columns left of the picture.
    pub padding_x: u32,
    /// Blank rows above the picture.
    pub padding_y: u32,
}

impl TerminalGeometry {
    /// Computes where a `frame_w x frame_h` picture lands on a
    /// `term_w x term_h` grid.
    ///
    /// With `force_aspect` the picture keeps its proportions and the spare
    /// space becomes padding; an odd remainder goes to the right/bottom.
    pub fn fit(frame_w: u32, frame_h: u32, term_w: u32, term_h: u32, force_aspect: bool) -> Self {
        let term_w = term_w.max(1);
        let term_h = term_h.max(1);
        let mut geometry = Self {
            width: term_w,
            height: term_h,
            content_width: term_w,
            content_height: term_h,
            padding_x: 0,
            padding_y: 0,
        };
        if !force_aspect || frame_w == 0 || frame_h == 0 {
            return geometry;
        }

        let video_aspect = frame_w as f64 / frame_h as f64;
        let terminal_aspect = term_w as f64 / (term_h as f64 * CELL_ASPECT);

        if video_aspect > terminal_aspect {
            let new_h = (term_w as f64 / (video_aspect * CELL_ASPECT)).min(term_h as f64).round() as u32;
            let new_h = new_h.clamp(1, term_h);
            geometry.content_height = new_h;
            geometry.padding_y = (term_h - new_h) / 2;
        } else if video_aspect < terminal_aspect {
            let new_w = (term_h as f64 * CELL_ASPECT * video_aspect).min(term_w as f64).round() as u32;
            let new_w = new_w.clamp(1, term_w);
            geometry.content_width = new_w;
            geometry.padding_x = (term_w - new_w) / 2;
        }
        geometry
    }

    pub fn padding_right(&self) -> u32 {
        self.width - self.content_width - self.padding_x
    }

    pub fn padding_bottom(&self) -> u32 {
        self.height - self.content_height - self.padding_y
    }

    /// Whether terminal row `row` shows picture content.
    pub fn is_content_row(&self, row: u32) -> bool {
        row >= self.padding_y && row < self.padding_y + self.content_height
    }
}

/// Resampling filter for the per-frame downscale.
const FILTER: FilterType = FilterType::Triangle;

/// Downscaler that keeps its target geometry until the source size or the
/// terminal size changes.
#[derive(Debug)]
pub struct FrameScaler {
    force_aspect: bool,
    term_size: (u32, u32),
    /// Source size and the geometry derived for it.
    cached: Option<((u32, u32), TerminalGeometry)>,
    out: RgbImage,
    rebuilds: u64,
}

impl FrameScaler {
    pub fn new(force_aspect: bool, term_w: u32, term_h: u32) -> Self {
        Self {
            force_aspect,
            term_size: (term_w, term_h),
            cached: None,
            out: RgbImage::new(1, 1),
            rebuilds: 0,
        }
    }

    /// Records a new terminal size; the geometry is recomputed on the next
    /// frame only if the size actually changed.
    pub fn set_terminal_size(&mut self, term_w: u32, term_h: u32) {
        if self.term_size != (term_w, term_h) {
            self.term_size = (term_w, term_h);
            self.cached = None;
        }
    }

    /// Geometry of the last scaled frame.
    pub fn geometry(&self) -> Option<TerminalGeometry> {
        self.cached.map(|(_, geometry)| geometry)
    }

    /// How many times the geometry was derived.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    pub fn scale(&mut self, frame: &RgbImage) -> (&RgbImage, TerminalGeometry) {
        let src = frame.dimensions();
        let geometry = match self.cached {
            Some((cached_src, geometry)) if cached_src == src => geometry,
            _ => {
                let geometry =
                    TerminalGeometry::fit(src.0, src.1, self.term_size.0, self.term_size.1, self.force_aspect);
                log::debug!(
                    "scaling {}x{} -> {}x{} (padding {}x{})",
                    src.0,
                    src.1,
                    geometry.content_width,
                    geometry.content_height,
                    geometry.padding_x,
                    geometry.padding_y
                );
                self.out = RgbImage::new(geometry.content_width, geometry.content_height);
                self.cached = Some((src, geometry));
                self.rebuilds += 1;
                geometry
            }
        };

        if src.0 > 0 && src.1 > 0 {
            self.out = if src == (geometry.content_width, geometry.content_height) {
                frame.clone()
            } else {
                imageops::resize(frame, geometry.content_width, geometry.content_height, FILTER)
            };
        }
        (&self.out, geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn wide_video_fits_width_and_pads_rows() {
        let g = TerminalGeometry::fit(1920, 1080, 100, 40, true);
        assert_eq!(g.content_width, 100);
        assert_eq!(g.content_height, 28);
        assert_eq!(g.padding_y, 6);
        assert_eq!(g.padding_x, 0);
        assert_eq!(g.padding_bottom(), 6);
    }

    #[test]
    fn narrow_video_fits_height_and_pads_columns() {
        // 4:3 on a 200x40 grid: terminal aspect 2.5 > 1.33
        let g = TerminalGeometry::fit(640, 480, 200, 40, true);
        assert_eq!(g.content_height, 40);
        assert_eq!(g.content_width, 107);
        assert_eq!(g.padding_x, 46);
        assert_eq!(g.padding_right(), 47);
    }

    #[test]
    fn without_aspect_the_grid_is_filled() {
        let g = TerminalGeometry::fit(1920, 1080, 100, 40, false);
        assert_eq!((g.content_width, g.content_height), (100, 40));
        assert_eq!((g.padding_x, g.padding_y), (0, 0));
    }

    #[test]
    fn matching_aspect_needs_no_padding() {
        let g = TerminalGeometry::fit(200, 50, 200, 25, true);
        assert_eq!((g.content_width, g.content_height), (200, 25));
        assert_eq!((g.padding_x, g.padding_y), (0, 0));
    }

    #[test]
    fn content_rows_skip_padding() {
        let g = TerminalGeometry::fit(1920, 1080, 100, 40, true);
        assert!(!g.is_content_row(5));
        assert!(g.is_content_row(6));
        assert!(g.is_content_row(33));
        assert!(!g.is_content_row(34));
    }

    #[test]
    fn uniform_frames_stay_uniform() {
        let frame = RgbImage::from_pixel(64, 36, Rgb([120, 60, 30]));
        let mut scaler = FrameScaler::new(false, 16, 9);
        let (out, g) = scaler.scale(&frame);
        assert_eq!((g.content_width, g.content_height), (16, 9));
        assert_eq!(out.dimensions(), (16, 9));
        assert!(out.pixels().all(|p| *p == Rgb([120, 60, 30])));
    }

    #[test]
    fn halves_keep_their_brightness() {
        let mut frame = RgbImage::new(8, 2);
        for y in 0..2 {
            for x in 4..8 {
                frame.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let mut scaler = FrameScaler::new(false, 2, 1);
        let (out, _) = scaler.scale(&frame);
        assert!(out.get_pixel(0, 0)[0] < 64);
        assert!(out.get_pixel(1, 0)[0] > 192);
    }

    #[test]
    fn same_size_frames_pass_through() {
        let mut frame = RgbImage::new(3, 2);
        frame.put_pixel(2, 1, Rgb([1, 2, 3]));
        let mut scaler = FrameScaler::new(false, 3, 2);
        let (out, _) = scaler.scale(&frame);
        assert_eq!(*out, frame);
    }

    #[test]
    fn upscaling_repeats_pixels() {
        let mut frame = RgbImage::new(1, 1);
        frame.put_pixel(0, 0, Rgb([9, 8, 7]));
        let mut scaler = FrameScaler::new(false, 3, 2);
        let (out, _) = scaler.scale(&frame);
        assert_eq!(out.dimensions(), (3, 2));
        assert!(out.pixels().all(|p| *p == Rgb([9, 8, 7])));
    }

    #[test]
    fn tables_rebuilt_only_on_geometry_change() {
        let frame = RgbImage::new(64, 36);
        let mut scaler = FrameScaler::new(true, 80, 24);
        scaler.scale(&frame);
        scaler.scale(&frame);
        scaler.set_terminal_size(80, 24);
        scaler.scale(&frame);
        assert_eq!(scaler.rebuilds(), 1);
        scaler.set_terminal_size(120, 30);
        let (_, g) = scaler.scale(&frame);
        assert_eq!(g.width, 120);
        assert_eq!(scaler.rebuilds(), 2);
    }
}
