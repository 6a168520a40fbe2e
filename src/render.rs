//! Frame-to-text rendering and the terminal capability backends.
//!
//! A backend turns one scaled frame into terminal output bytes. The
//! [`FrameRenderer`] owns the backend, times each frame and hands the whole
//! buffer to the terminal in a single write.

use std::io::{self, Write};

use crossterm::cursor::MoveTo;
use crossterm::queue;
use crossterm::style::{Color, SetForegroundColor};
use crossterm::terminal::{Clear, ClearType};
use image::{Rgb, RgbImage};
use rayon::prelude::*;

use crate::color::{self, PaletteQuantizer, BLANK};
use crate::error::PlayerError;
use crate::optimizer::ColorOptimizer;
use crate::perf::PerfStats;
use crate::scaler::TerminalGeometry;
use crate::terminal::{Terminal, TerminalCaps};
use crate::RenderConfig;

/// Luminance to character lookup shared by all backends.
#[derive(Debug, Clone)]
pub struct PixelMapper {
    chars: Vec<u8>,
    force_average: bool,
}

impl PixelMapper {
    pub fn new(chars: &str, force_average: bool) -> Self {
        let mut chars = chars.as_bytes().to_vec();
        if chars.is_empty() {
            chars.push(BLANK);
        }
        Self { chars, force_average }
    }

    pub fn from_config(config: &RenderConfig) -> Self {
        Self::new(&config.char_set, config.force_average_luminance)
    }

    pub fn char_at(&self, px: Rgb<u8>) -> u8 {
        color::char_for(color::luminance(px, self.force_average), &self.chars)
    }
}

fn move_to_row(out: &mut Vec<u8>, row: u32) {
    let _ = write!(out, "\x1b[{};1H", row + 1);
}

fn push_blanks(out: &mut Vec<u8>, n: u32) {
    out.extend(std::iter::repeat(BLANK).take(n as usize));
}

/// One way of getting a frame onto the terminal.
pub trait RenderBackend: Send {
    fn name(&self) -> &'static str;

    /// Written once before the first frame.
    fn prepare(&mut self, _out: &mut Vec<u8>) -> io::Result<()> {
        Ok(())
    }

    /// Called whenever the geometry differs from the previous frame's.
    fn resize(&mut self, _geometry: &TerminalGeometry) {}

    fn draw(&mut self, frame: &RgbImage, geometry: &TerminalGeometry, out: &mut Vec<u8>) -> io::Result<()>;

    /// Undoes anything `prepare` changed in the terminal.
    fn finish(&mut self, _out: &mut Vec<u8>) -> io::Result<()> {
        Ok(())
    }
}

/// Streams characters row by row, with true-colour escapes when colour is
/// on. Escapes are only emitted when the optimizer lets them through.
pub struct EscapeCodeBackend {
    mapper: PixelMapper,
    use_color: bool,
    optimizer: ColorOptimizer,
}

impl EscapeCodeBackend {
    pub fn new(mapper: PixelMapper, use_color: bool, color_threshold: u8) -> Self {
        Self { mapper, use_color, optimizer: ColorOptimizer::new(color_threshold) }
    }

    fn mono_row(&self, frame: &RgbImage, geometry: &TerminalGeometry, row: u32) -> Vec<u8> {
        let mut line = Vec::with_capacity(geometry.width as usize + 8);
        move_to_row(&mut line, row);
        if !geometry.is_content_row(row) {
            push_blanks(&mut line, geometry.width);
            return line;
        }
        let y = row - geometry.padding_y;
        push_blanks(&mut line, geometry.padding_x);
        for x in 0..geometry.content_width {
            line.push(self.mapper.char_at(*frame.get_pixel(x, y)));
        }
        push_blanks(&mut line, geometry.padding_right());
        line
    }
}

impl RenderBackend for EscapeCodeBackend {
    fn name(&self) -> &'static str {
        if self.use_color {
            "escape-code"
        } else {
            "monochrome"
        }
    }

    fn draw(&mut self, frame: &RgbImage, geometry: &TerminalGeometry, out: &mut Vec<u8>) -> io::Result<()> {
        if !self.use_color {
            // Rows are independent without colour state, so build them in parallel.
            let this = &*self;
            let rows: Vec<Vec<u8>> =
                (0..geometry.height).into_par_iter().map(|row| this.mono_row(frame, geometry, row)).collect();
            for row in rows {
                out.extend_from_slice(&row);
            }
            return Ok(());
        }

        for row in 0..geometry.height {
            move_to_row(out, row);
            if !geometry.is_content_row(row) {
                push_blanks(out, geometry.width);
                continue;
            }
            let y = row - geometry.padding_y;
            push_blanks(out, geometry.padding_x);
            for x in 0..geometry.content_width {
                let px = *frame.get_pixel(x, y);
                let c = self.mapper.char_at(px);
                if self.optimizer.consider(px, c) {
                    color::push_ansi_colored(out, px, c);
                } else {
                    out.push(c);
                }
            }
            push_blanks(out, geometry.padding_right());
        }
        Ok(())
    }
}

/// Writes palette indices on terminals with a bounded but redefinable
/// colour table. The quantized palette is registered before the first
/// frame and the terminal's defaults are restored afterwards.
pub struct PaletteBackend {
    mapper: PixelMapper,
    quantizer: PaletteQuantizer,
    base: u16,
    last_index: Option<u16>,
}

impl PaletteBackend {
    pub fn new(mapper: PixelMapper, quantizer: PaletteQuantizer, color_count: u32) -> Self {
        let color_count = color_count.min(color::MAX_INDEXED_COLORS) as usize;
        // Keep the 16 standard colours intact when the table has room.
        let base = 16usize.min(color_count.saturating_sub(quantizer.len())) as u16;
        Self { mapper, quantizer, base, last_index: None }
    }

    /// Terminal colour index used for a pixel.
    pub fn color_index(&self, px: Rgb<u8>) -> u16 {
        self.base + self.quantizer.encode(px)
    }
}

impl RenderBackend for PaletteBackend {
    fn name(&self) -> &'static str {
        "palette"
    }

    fn prepare(&mut self, out: &mut Vec<u8>) -> io::Result<()> {
        for (index, rgb) in self.quantizer.entries() {
            write!(out, "\x1b]4;{};rgb:{:02x}/{:02x}/{:02x}\x1b\\", self.base + index, rgb[0], rgb[1], rgb[2])?;
        }
        Ok(())
    }

    fn draw(&mut self, frame: &RgbImage, geometry: &TerminalGeometry, out: &mut Vec<u8>) -> io::Result<()> {
        for row in 0..geometry.height {
            move_to_row(out, row);
            if !geometry.is_content_row(row) {
                push_blanks(out, geometry.width);
                continue;
            }
            let y = row - geometry.padding_y;
            push_blanks(out, geometry.padding_x);
            for x in 0..geometry.content_width {
                let px = *frame.get_pixel(x, y);
                let c = self.mapper.char_at(px);
                if c != BLANK {
                    let index = self.color_index(px);
                    if self.last_index != Some(index) {
                        write!(out, "\x1b[38;5;{}m", index)?;
                        self.last_index = Some(index);
                    }
                }
                out.push(c);
            }
            push_blanks(out, geometry.padding_right());
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> io::Result<()> {
        out.extend_from_slice(b"\x1b]104\x1b\\");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cell {
    ch: u8,
    fg: Option<Rgb<u8>>,
}

const EMPTY_CELL: Cell = Cell { ch: BLANK, fg: None };

/// Double-buffered cell grid. Frames are written into the back buffer by
/// position and only cells that differ from the front buffer are sent.
pub struct DirectBufferBackend {
    mapper: PixelMapper,
    use_color: bool,
    width: u32,
    height: u32,
    front: Vec<Cell>,
    back: Vec<Cell>,
    full_redraw: bool,
    last_fg: Option<Rgb<u8>>,
}

impl DirectBufferBackend {
    pub fn new(mapper: PixelMapper, use_color: bool) -> Self {
        Self {
            mapper,
            use_color,
            width: 0,
            height: 0,
            front: Vec::new(),
            back: Vec::new(),
            full_redraw: true,
            last_fg: None,
        }
    }

    fn write_to_buffer(&mut self, row: u32, col: u32, cell: Cell) {
        let idx = (row * self.width + col) as usize;
        self.back[idx] = cell;
    }
}

impl RenderBackend for DirectBufferBackend {
    fn name(&self) -> &'static str {
        "direct-buffer"
    }

    fn resize(&mut self, geometry: &TerminalGeometry) {
        self.width = geometry.width;
        self.height = geometry.height;
        let cells = (self.width * self.height) as usize;
        self.front = vec![EMPTY_CELL; cells];
        self.back = vec![EMPTY_CELL; cells];
        self.full_redraw = true;
        self.last_fg = None;
    }

    fn draw(&mut self, frame: &RgbImage, geometry: &TerminalGeometry, out: &mut Vec<u8>) -> io::Result<()> {
        if geometry.width != self.width || geometry.height != self.height {
            self.resize(geometry);
        }

        for row in 0..self.height {
            for col in 0..self.width {
                let content = geometry.is_content_row(row)
                    && col >= geometry.padding_x
                    && col < geometry.padding_x + geometry.content_width;
                let cell = if content {
                    let px = *frame.get_pixel(col - geometry.padding_x, row - geometry.padding_y);
                    let ch = self.mapper.char_at(px);
                    let fg = (self.use_color && ch != BLANK).then_some(px);
                    Cell { ch, fg }
                } else {
                    EMPTY_CELL
                };
                self.write_to_buffer(row, col, cell);
            }
        }

        let mut cursor: Option<(u32, u32)> = None;
        for row in 0..self.height {
            for col in 0..self.width {
                let idx = (row * self.width + col) as usize;
                let cell = self.back[idx];
                if !self.full_redraw && self.front[idx] == cell {
                    continue;
                }
                if cursor != Some((row, col)) {
                    queue!(out, MoveTo(col as u16, row as u16))?;
                }
                if let Some(fg) = cell.fg {
                    if self.last_fg != Some(fg) {
                        queue!(out, SetForegroundColor(Color::Rgb { r: fg[0], g: fg[1], b: fg[2] }))?;
                        self.last_fg = Some(fg);
                    }
                }
                out.push(cell.ch);
                cursor = Some((row, col + 1));
            }
        }

        std::mem::swap(&mut self.front, &mut self.back);
        self.full_redraw = false;
        Ok(())
    }
}

/// Picks the backend for the probed terminal.
///
/// Colour on a terminal with neither true colour nor a usable palette falls
/// back to monochrome after logging a capability error.
pub fn select_backend(config: &RenderConfig, caps: &TerminalCaps, use_double_buffer: bool) -> Box<dyn RenderBackend> {
    let mapper = PixelMapper::from_config(config);
    if !config.use_color {
        return if use_double_buffer {
            Box::new(DirectBufferBackend::new(mapper, false))
        } else {
            Box::new(EscapeCodeBackend::new(mapper, false, config.color_threshold))
        };
    }

    if caps.truecolor {
        return if use_double_buffer {
            Box::new(DirectBufferBackend::new(mapper, true))
        } else {
            Box::new(EscapeCodeBackend::new(mapper, true, config.color_threshold))
        };
    }

    if caps.supports_color {
        if let Some(quantizer) = PaletteQuantizer::from_capabilities(caps.color_count, caps.can_redefine_colors) {
            log::info!(
                "using {}-entry palette ({} steps) on a {}-colour terminal",
                quantizer.len(),
                quantizer.steps(),
                caps.color_count
            );
            return Box::new(PaletteBackend::new(mapper, quantizer, caps.color_count));
        }
    }

    let err = PlayerError::TerminalCapabilityError(format!(
        "{} colours, redefinable: {}; continuing in monochrome",
        caps.color_count, caps.can_redefine_colors
    ));
    log::warn!("{}", err);
    Box::new(EscapeCodeBackend::new(mapper, false, config.color_threshold))
}

/// Renders frames through a backend and records how long each one took,
/// from the first pixel to the flushed write.
pub struct FrameRenderer {
    backend: Box<dyn RenderBackend>,
    perf: PerfStats,
    buf: Vec<u8>,
    prepared: bool,
    geometry: Option<TerminalGeometry>,
}

impl FrameRenderer {
    pub fn new(backend: Box<dyn RenderBackend>) -> Self {
        Self { backend, perf: PerfStats::new(), buf: Vec::new(), prepared: false, geometry: None }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn perf(&self) -> &PerfStats {
        &self.perf
    }

    pub fn perf_mut(&mut self) -> &mut PerfStats {
        &mut self.perf
    }

    pub fn render(&mut self, frame: &RgbImage, geometry: TerminalGeometry, term: &mut dyn Terminal) -> io::Result<()> {
        self.perf.start_frame_time();
        self.buf.clear();

        if !self.prepared {
            self.backend.prepare(&mut self.buf)?;
            self.prepared = true;
        }
        if self.geometry != Some(geometry) {
            queue!(self.buf, Clear(ClearType::All))?;
            self.backend.resize(&geometry);
            self.geometry = Some(geometry);
        }

        self.backend.draw(frame, &geometry, &mut self.buf)?;
        term.write_frame(&self.buf)?;
        self.perf.end_frame_time();
        Ok(())
    }

    /// Restores anything the backend changed.
    pub fn finish(&mut self, term: &mut dyn Terminal) -> io::Result<()> {
        if !self.prepared {
            return Ok(());
        }
        self.buf.clear();
        self.backend.finish(&mut self.buf)?;
        if !self.buf.is_empty() {
            term.write_frame(&self.buf)?;
        }
        Ok(())
    }
}
