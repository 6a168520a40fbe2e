//! Terminal primitives used by the player: size, cursor, title, colour mode,
//! capability probe and the raw/alternate-screen session.

use std::env;
use std::io::{self, Stdout, Write};

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::style::{Color, ResetColor, SetBackgroundColor, SetForegroundColor};
use crossterm::terminal::{
    self, disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen, SetTitle,
};
use crossterm::{execute, queue};

/// Cell grid size, with `resized` set when it differs from the previous
/// query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub width: u32,
    pub height: u32,
    pub resized: bool,
}

/// What the terminal can do with colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalCaps {
    pub supports_color: bool,
    pub truecolor: bool,
    pub can_redefine_colors: bool,
    pub color_count: u32,
}

impl TerminalCaps {
    pub const MONOCHROME: Self = Self { supports_color: false, truecolor: false, can_redefine_colors: false, color_count: 2 };

    /// Reads `TERM`, `COLORTERM` and `NO_COLOR` from the environment.
    pub fn probe() -> Self {
        let caps = Self::from_env(
            env::var("TERM").ok().as_deref(),
            env::var("COLORTERM").ok().as_deref(),
            env::var_os("NO_COLOR").is_some(),
        );
        log::debug!("terminal capabilities: {:?}", caps);
        caps
    }

    pub fn from_env(term: Option<&str>, colorterm: Option<&str>, no_color: bool) -> Self {
        let term = term.unwrap_or_default().to_ascii_lowercase();
        let colorterm = colorterm.unwrap_or_default().to_ascii_lowercase();
        if no_color || term.is_empty() || term == "dumb" {
            return Self::MONOCHROME;
        }

        let truecolor = colorterm.contains("truecolor") || colorterm.contains("24bit") || term.contains("-direct");
        let color_count = if truecolor {
            1 << 24
        } else if term.contains("256color") {
            256
        } else if term.contains("88color") {
            88
        } else if term.contains("16color") {
            16
        } else {
            8
        };

        // The Linux console and the vt family have fixed palettes.
        let fixed_palette = term == "linux" || term.starts_with("vt") || term == "ansi" || term.starts_with("cons");
        Self { supports_color: true, truecolor, can_redefine_colors: !fixed_palette, color_count }
    }
}

/// The terminal operations the playback loops need.
pub trait Terminal: Send {
    fn get_size(&mut self) -> io::Result<TerminalSize>;

    fn capabilities(&self) -> TerminalCaps;

    fn hide_cursor(&mut self) -> io::Result<()>;

    fn set_title(&mut self, title: &str) -> io::Result<()>;

    /// Colour mode draws on black with a white default foreground;
    /// monochrome draws black text on white.
    fn init_color_mode(&mut self, use_color: bool) -> io::Result<()>;

    /// Writes one assembled frame and flushes.
    fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// [`Terminal`] on standard output.
pub struct CrosstermTerminal {
    out: Stdout,
    caps: TerminalCaps,
    last_size: Option<(u32, u32)>,
}

impl CrosstermTerminal {
    pub fn new(caps: TerminalCaps) -> Self {
        Self { out: io::stdout(), caps, last_size: None }
    }
}

impl Terminal for CrosstermTerminal {
    fn get_size(&mut self) -> io::Result<TerminalSize> {
        let (w, h) = terminal::size()?;
        let size = (w.max(1) as u32, h.max(1) as u32);
        let resized = self.last_size.is_some_and(|last| last != size);
        self.last_size = Some(size);
        Ok(TerminalSize { width: size.0, height: size.1, resized })
    }

    fn capabilities(&self) -> TerminalCaps {
        self.caps
    }

    fn hide_cursor(&mut self) -> io::Result<()> {
        execute!(self.out, Hide)
    }

    fn set_title(&mut self, title: &str) -> io::Result<()> {
        execute!(self.out, SetTitle(title))
    }

    fn init_color_mode(&mut self, use_color: bool) -> io::Result<()> {
        let (fg, bg) = if use_color { (Color::White, Color::Black) } else { (Color::Black, Color::White) };
        queue!(self.out, SetForegroundColor(fg), SetBackgroundColor(bg), Clear(ClearType::All), MoveTo(0, 0))?;
        self.out.flush()
    }

    fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut lock = self.out.lock();
        lock.write_all(bytes)?;
        lock.flush()
    }
}

/// Raw mode plus alternate screen for the lifetime of the value.
///
/// Dropping it restores the terminal even when playback bails out early.
pub struct TerminalSession {
    active: bool,
}

impl TerminalSession {
    pub fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        if let Err(e) = execute!(stdout, EnterAlternateScreen, Hide) {
            let _ = disable_raw_mode();
            return Err(e);
        }
        Ok(Self { active: true })
    }

    pub fn restore(&mut self) -> io::Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        let mut stdout = io::stdout();
        let screen = execute!(stdout, ResetColor, Clear(ClearType::All), Show, LeaveAlternateScreen);
        let raw = disable_raw_mode();
        screen.and(raw)
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colorterm_enables_truecolor() {
        let caps = TerminalCaps::from_env(Some("xterm-256color"), Some("truecolor"), false);
        assert!(caps.truecolor);
        assert_eq!(caps.color_count, 1 << 24);
        assert!(TerminalCaps::from_env(Some("xterm"), Some("24bit"), false).truecolor);
    }

    #[test]
    fn term_name_gives_indexed_count() {
        let caps = TerminalCaps::from_env(Some("screen-256color"), None, false);
        assert!(caps.supports_color && !caps.truecolor);
        assert_eq!(caps.color_count, 256);
        assert!(caps.can_redefine_colors);
        assert_eq!(TerminalCaps::from_env(Some("rxvt-88color"), None, false).color_count, 88);
        assert_eq!(TerminalCaps::from_env(Some("xterm"), None, false).color_count, 8);
    }

    #[test]
    fn fixed_palette_consoles_cannot_redefine() {
        let caps = TerminalCaps::from_env(Some("linux"), None, false);
        assert!(caps.supports_color);
        assert!(!caps.can_redefine_colors);
        assert!(!TerminalCaps::from_env(Some("vt220"), None, false).can_redefine_colors);
    }

    #[test]
    fn no_color_and_dumb_terminals_are_monochrome() {
        assert_eq!(TerminalCaps::from_env(Some("xterm-256color"), Some("truecolor"), true), TerminalCaps::MONOCHROME);
        assert_eq!(TerminalCaps::from_env(Some("dumb"), None, false), TerminalCaps::MONOCHROME);
        assert_eq!(TerminalCaps::from_env(None, None, false), TerminalCaps::MONOCHROME);
    }
}
