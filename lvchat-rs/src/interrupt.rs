//! Non-blocking check for a user interrupt during playback.
//!
//! The terminal is switched to raw mode only for the duration of one poll and
//! restored by a guard on every exit path. The signal is not latched: input
//! already waiting when a poll starts is discarded, so only a key pressed
//! while the poll is running counts.
//!
//! Raw mode turns Ctrl-C into an ordinary key event. A poll that sees one
//! reports an interrupt and fires the shutdown signal, since no SIGINT will
//! arrive for it.

use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

#[async_trait]
pub trait InterruptPoller: Send {
    /// Wait at most `timeout` for the interrupt key. Consumes at most one
    /// key press made during the wait.
    async fn poll(&mut self, timeout: Duration) -> bool;
}

/// What one poll saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyPoll {
    Quiet,
    Pressed,
    Shutdown,
}

/// Terminal input as seen by a poll.
trait EventSource {
    fn poll(&mut self, timeout: Duration) -> io::Result<bool>;
    fn read(&mut self) -> io::Result<Event>;
}

/// The process's controlling terminal.
struct TerminalEvents;

impl EventSource for TerminalEvents {
    fn poll(&mut self, timeout: Duration) -> io::Result<bool> {
        event::poll(timeout)
    }

    fn read(&mut self) -> io::Result<Event> {
        event::read()
    }
}

/// Raw mode for as long as the guard lives. Leaves the terminal alone if it
/// was already raw when acquired.
struct RawModeGuard {
    restore: bool,
}

impl RawModeGuard {
    fn acquire() -> io::Result<Self> {
        let already_raw = terminal::is_raw_mode_enabled()?;
        if !already_raw {
            terminal::enable_raw_mode()?;
        }
        Ok(Self {
            restore: !already_raw,
        })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.restore {
            if let Err(e) = terminal::disable_raw_mode() {
                warn!("Failed to restore terminal mode: {e}");
            }
        }
    }
}

/// Interrupt on a single key pressed in the controlling terminal.
pub struct KeyboardInterrupt {
    key: char,
    shutdown: Arc<Notify>,
}

impl KeyboardInterrupt {
    pub fn new(key: char) -> Self {
        Self {
            key,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn key(&self) -> char {
        self.key
    }

    /// Notified when Ctrl-C is pressed during a poll.
    pub fn shutdown_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }
}

#[async_trait]
impl InterruptPoller for KeyboardInterrupt {
    async fn poll(&mut self, timeout: Duration) -> bool {
        let key = self.key;
        match tokio::task::spawn_blocking(move || poll_terminal(key, timeout)).await {
            Ok(Ok(KeyPoll::Quiet)) => false,
            Ok(Ok(KeyPoll::Pressed)) => true,
            Ok(Ok(KeyPoll::Shutdown)) => {
                info!("Ctrl-C pressed during playback");
                self.shutdown.notify_one();
                true
            }
            Ok(Err(e)) => {
                debug!("Interrupt poll failed: {e}");
                false
            }
            Err(e) => {
                warn!("Interrupt poll task failed: {e}");
                false
            }
        }
    }
}

fn poll_terminal(key: char, timeout: Duration) -> io::Result<KeyPoll> {
    if !io::stdin().is_terminal() {
        return Ok(KeyPoll::Quiet);
    }

    let _raw = RawModeGuard::acquire()?;
    poll_key(&mut TerminalEvents, key, timeout)
}

fn is_ctrl_c(event: &Event) -> bool {
    matches!(
        event,
        Event::Key(KeyEvent {
            code: KeyCode::Char('c'),
            modifiers,
            kind: KeyEventKind::Press,
            ..
        }) if modifiers.contains(KeyModifiers::CONTROL)
    )
}

fn poll_key(events: &mut impl EventSource, key: char, timeout: Duration) -> io::Result<KeyPoll> {
    // Anything typed before this poll started is stale.
    while events.poll(Duration::ZERO)? {
        let stale = events.read()?;
        if is_ctrl_c(&stale) {
            return Ok(KeyPoll::Shutdown);
        }
    }

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if !events.poll(remaining)? {
            return Ok(KeyPoll::Quiet);
        }

        let event = events.read()?;
        if is_ctrl_c(&event) {
            return Ok(KeyPoll::Shutdown);
        }
        // Releases, repeats, resizes and mouse events don't count as a press.
        if let Event::Key(KeyEvent {
            code,
            kind: KeyEventKind::Press,
            ..
        }) = event
        {
            return Ok(if code == KeyCode::Char(key) {
                KeyPoll::Pressed
            } else {
                KeyPoll::Quiet
            });
        }
    }
}
