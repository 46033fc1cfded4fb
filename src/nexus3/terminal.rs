//! ESC-to-cancel monitoring and the pause/resume rendezvous.
//!
//! While a turn is in flight, a background task keeps the terminal in
//! character-at-a-time mode and watches for ESC, which fires the agent's
//! cancellation callback. When a confirmation prompt needs the terminal, it
//! must not race the monitor for keystrokes; the two coordinate through a
//! pair of [`Flag`]s instead of arbitrary sleeps:
//!
//! 1. The prompt clears `pause` to request a pause.
//! 2. The monitor restores cooked mode and sets `pause_ack`.
//! 3. The prompt waits for `pause_ack` (bounded), reads its line.
//! 4. The prompt sets `pause` again; a drop guard makes this happen even
//!    when the prompt errors, so the monitor cannot be wedged.
//! 5. The monitor clears `pause_ack` and re-enters cbreak mode.
//!
//! The testable property: between "pause requested" and "pause
//! acknowledged" the monitor has left cbreak mode, and no keystroke read by
//! the prompt is observed by the monitor.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

/// ESC key.
pub const ESC: char = '\u{1b}';
/// Default stdin polling interval for the monitor.
pub const CHECK_INTERVAL: Duration = Duration::from_millis(100);
/// How long a prompt waits for the monitor's acknowledgment.
pub const PAUSE_ACK_TIMEOUT: Duration = Duration::from_millis(500);

/// An awaitable boolean: settable, clearable, and waitable from any task.
#[derive(Clone)]
pub struct Flag {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

impl Flag {
    pub fn new(initially_set: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_set);
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the flag is set.
    pub async fn wait_set(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Wait until set, up to `timeout`. Returns whether the flag was set.
    pub async fn wait_set_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_set()).await.is_ok()
    }
}

/// Source of single keystrokes plus terminal-mode control.
///
/// The real terminal goes through crossterm; tests drive the monitor with a
/// scripted implementation.
#[async_trait]
pub trait InputSource: Send {
    fn enter_cbreak(&mut self) -> io::Result<()>;
    fn leave_cbreak(&mut self) -> io::Result<()>;
    /// Next keystroke, or `None` when `timeout` elapses first.
    async fn poll_key(&mut self, timeout: Duration) -> Option<char>;
}

/// Crossterm-backed input source for the real terminal.
pub struct CrosstermInput;

#[async_trait]
impl InputSource for CrosstermInput {
    fn enter_cbreak(&mut self) -> io::Result<()> {
        crossterm::terminal::enable_raw_mode()
    }

    fn leave_cbreak(&mut self) -> io::Result<()> {
        crossterm::terminal::disable_raw_mode()
    }

    async fn poll_key(&mut self, timeout: Duration) -> Option<char> {
        // crossterm polling is blocking; keep it off the async threads.
        tokio::task::spawn_blocking(move || {
            use crossterm::event::{poll, read, Event, KeyCode};
            if !poll(timeout).ok()? {
                return None;
            }
            match read().ok()? {
                Event::Key(key) => match key.code {
                    KeyCode::Esc => Some(ESC),
                    KeyCode::Char(c) => Some(c),
                    _ => None,
                },
                _ => None,
            }
        })
        .await
        .ok()
        .flatten()
    }
}

impl Drop for CrosstermInput {
    fn drop(&mut self) {
        // Never leave the terminal raw when the monitor task is cancelled.
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

/// Monitor keystrokes for ESC and honor the pause protocol.
///
/// Runs until its task is cancelled. On ESC the callback fires but the loop
/// keeps going; the caller decides when to cancel us. While `pause` is
/// clear the monitor sits in cooked mode with `pause_ack` set and reads
/// nothing.
pub async fn monitor_keys<I, F>(
    mut input: I,
    on_escape: F,
    pause: Flag,
    pause_ack: Flag,
    check_interval: Duration,
) -> io::Result<()>
where
    I: InputSource,
    F: Fn() + Send,
{
    input.enter_cbreak()?;
    loop {
        if !pause.is_set() {
            // Restore the terminal while paused so the prompt can read.
            input.leave_cbreak()?;
            pause_ack.set();
            pause.wait_set().await;
            pause_ack.clear();
            input.enter_cbreak()?;
            continue;
        }

        if let Some(key) = input.poll_key(check_interval).await {
            if key == ESC {
                debug!("ESC detected, firing cancellation callback");
                on_escape();
                // Keep monitoring; the caller cancels us.
            }
        }
        tokio::task::yield_now().await;
    }
}

/// Restores the monitor on drop, so an error inside the prompt cannot
/// leave it paused forever.
struct ResumeGuard {
    pause: Flag,
}

impl Drop for ResumeGuard {
    fn drop(&mut self) {
        self.pause.set();
    }
}

/// Reads one line of user input for a confirmation prompt.
#[async_trait]
pub trait LineReader: Send {
    async fn read_line(&mut self, prompt: &str) -> Option<String>;
}

/// Line reader over stdin for interactive use.
pub struct StdinLineReader;

#[async_trait]
impl LineReader for StdinLineReader {
    async fn read_line(&mut self, prompt: &str) -> Option<String> {
        eprint!("{} [y/N] ", prompt);
        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    }
}

/// Ask for a yes/no confirmation through the pause rendezvous.
///
/// Proceeds even when the acknowledgment times out: the worst case of an
/// unacknowledged pause is an input glitch, not a crash.
pub async fn confirm_action<R: LineReader>(
    prompt: &str,
    pause: Flag,
    pause_ack: Flag,
    reader: &mut R,
) -> bool {
    pause.clear();
    let _resume = ResumeGuard { pause };

    if !pause_ack.wait_set_timeout(PAUSE_ACK_TIMEOUT).await {
        debug!("pause not acknowledged within {:?}", PAUSE_ACK_TIMEOUT);
    }

    match reader.read_line(prompt).await {
        Some(line) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
        None => false,
    }
}
