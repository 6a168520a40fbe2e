//! Keyboard listener: seeks while Ctrl is held, quits on q / Esc / Ctrl+C.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::clock::SyncCoordinator;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Seek { backward: bool },
    Quit,
    Ignore,
}

pub fn action_for(key: &KeyEvent) -> KeyAction {
    if key.kind == KeyEventKind::Release {
        return KeyAction::Ignore;
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Left if ctrl => KeyAction::Seek { backward: true },
        KeyCode::Right if ctrl => KeyAction::Seek { backward: false },
        KeyCode::Char('c') if ctrl => KeyAction::Quit,
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => KeyAction::Quit,
        _ => KeyAction::Ignore,
    }
}

/// Applies a key to the coordinator. Returns false once the listener
/// should exit.
pub fn handle_key(key: &KeyEvent, sync: &SyncCoordinator) -> bool {
    match action_for(key) {
        KeyAction::Seek { backward } => {
            sync.seek(backward);
            true
        }
        KeyAction::Quit => {
            log::info!("quit requested");
            sync.request_stop();
            false
        }
        KeyAction::Ignore => true,
    }
}

fn listen(sync: &SyncCoordinator) -> io::Result<()> {
    while !sync.is_finished() && !sync.should_stop() {
        if !event::poll(POLL_INTERVAL)? {
            continue;
        }
        if let Event::Key(key) = event::read()? {
            if !handle_key(&key, sync) {
                break;
            }
        }
    }
    Ok(())
}

/// Starts the listener thread. It returns when playback finishes or a
/// quit key is pressed.
pub fn spawn_listener(sync: SyncCoordinator) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name("input".into()).spawn(move || {
        if let Err(e) = listen(&sync) {
            log::warn!("keyboard input unavailable: {}", e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::StreamClock;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn ctrl_arrows_seek() {
        assert_eq!(action_for(&key(KeyCode::Left, KeyModifiers::CONTROL)), KeyAction::Seek { backward: true });
        assert_eq!(action_for(&key(KeyCode::Right, KeyModifiers::CONTROL)), KeyAction::Seek { backward: false });
        assert_eq!(action_for(&key(KeyCode::Right, KeyModifiers::NONE)), KeyAction::Ignore);
    }

    #[test]
    fn quit_keys() {
        assert_eq!(action_for(&key(KeyCode::Char('q'), KeyModifiers::NONE)), KeyAction::Quit);
        assert_eq!(action_for(&key(KeyCode::Esc, KeyModifiers::NONE)), KeyAction::Quit);
        assert_eq!(action_for(&key(KeyCode::Char('c'), KeyModifiers::CONTROL)), KeyAction::Quit);
        assert_eq!(action_for(&key(KeyCode::Char('c'), KeyModifiers::NONE)), KeyAction::Ignore);
    }

    #[test]
    fn handled_keys_reach_the_coordinator() {
        let video = StreamClock::new();
        video.set_time(8000.0);
        let sync = SyncCoordinator::new(5000).with_video(video.clone());
        assert!(handle_key(&key(KeyCode::Left, KeyModifiers::CONTROL), &sync));
        assert_eq!(video.take_seek().map(|r| r.target_ms), Some(3000.0));
        assert!(!handle_key(&key(KeyCode::Char('q'), KeyModifiers::NONE), &sync));
        assert!(sync.should_stop());
    }
}
