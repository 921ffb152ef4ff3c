// SPDX-License-Identifier: GPL-2.0
//
// Interactive key listener. A detached thread blocks on terminal
// events and talks to the sample loop through a single-slot mailbox:
// last write wins, since only one view decision is taken per cycle.
// Anything outside the accepted alphabet asks the whole program to
// shut down cleanly.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::thread::JoinHandle;

use anyhow::Context;
use anyhow::Result;
use crossterm::event;
use crossterm::event::Event;
use crossterm::event::KeyCode;
use crossterm::event::KeyEventKind;
use crossterm::terminal;
use log::debug;

/// View change requested by a keystroke. Node existence is checked by
/// the sample loop against the topology it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewRequest {
    Totals,
    Node(usize),
}

enum KeyAction {
    View(ViewRequest),
    Cancel,
}

/// Single-slot, overwrite-on-write pending-key cell.
#[derive(Debug, Default)]
pub struct Mailbox {
    slot: Mutex<Option<ViewRequest>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, req: ViewRequest) {
        *self.slot.lock().unwrap() = Some(req);
    }

    /// Consume the pending request, if any. Called once per cycle.
    pub fn take(&self) -> Option<ViewRequest> {
        self.slot.lock().unwrap().take()
    }
}

fn action_for(code: KeyCode) -> KeyAction {
    match code {
        KeyCode::Char('t') => KeyAction::View(ViewRequest::Totals),
        KeyCode::Char(c) if c.is_ascii_digit() => {
            KeyAction::View(ViewRequest::Node(c as usize - '0' as usize))
        }
        _ => KeyAction::Cancel,
    }
}

/// Spawn the listener thread. It runs until it sees a key outside the
/// {0-9, t} alphabet or until the process exits; the loop never joins
/// it, the two only share @mailbox and @shutdown.
pub fn spawn_listener(mailbox: Arc<Mailbox>, shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
    thread::spawn(move || loop {
        let ev = match event::read() {
            Ok(ev) => ev,
            Err(_) => {
                shutdown.store(true, Ordering::Relaxed);
                break;
            }
        };
        let Event::Key(key) = ev else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match action_for(key.code) {
            KeyAction::View(req) => {
                debug!("input: view request {:?}", req);
                mailbox.post(req);
            }
            KeyAction::Cancel => {
                shutdown.store(true, Ordering::Relaxed);
                break;
            }
        }
    })
}

/// Silences the logger while held. Raw mode leaves stderr without
/// carriage returns, so diagnostics would staircase through the table.
struct LogMute {
    prev: log::LevelFilter,
}

impl LogMute {
    fn new() -> Self {
        let prev = log::max_level();
        log::set_max_level(log::LevelFilter::Off);
        Self { prev }
    }
}

impl Drop for LogMute {
    fn drop(&mut self) {
        log::set_max_level(self.prev);
    }
}

/// RAII raw-mode handle so the terminal is restored on every exit
/// path, fatal errors included. Logging is muted for the same scope.
pub struct RawModeGuard {
    _mute: LogMute,
}

impl RawModeGuard {
    pub fn new() -> Result<Self> {
        terminal::enable_raw_mode().context("Failed to enable raw mode")?;
        Ok(Self {
            _mute: LogMute::new(),
        })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}
