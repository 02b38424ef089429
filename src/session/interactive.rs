//! Interactive (PTY) backend adapter.
//!
//! Spawns the interactive agent bound to the workspace directory with a
//! pseudo-terminal attached. A dedicated thread reads the combined output
//! stream and feeds an async pump that sanitizes, coalesces, and scans for
//! permission prompts before publishing events; a wait task watches for
//! process exit and reports the outcome to the registry.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::output::{Coalescer, PromptDetector, PromptEvent, Sanitizer};
use crate::output::coalescer::FLUSH_INTERVAL_MS;
use crate::session::registry::SessionRegistry;
use crate::session::ExitOutcome;

const PTY_ROWS: u16 = 30;
const PTY_COLS: u16 = 120;

/// Flush ticks with no output before a Running session is marked Idle
const IDLE_AFTER_TICKS: u32 = 25; // 25 × 80 ms = 2 s

pub struct InteractiveAdapter {
    /// Kept alive for the lifetime of the session; dropping it closes the
    /// terminal and lets the reader loop observe EOF.
    master: Mutex<Option<Box<dyn portable_pty::MasterPty + Send>>>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    child: Mutex<Box<dyn portable_pty::Child + Send>>,
    pid: Option<u32>,
}

impl InteractiveAdapter {
    /// Spawn the interactive agent under a fresh PTY, optionally resuming
    /// an existing session identity from history.
    pub fn spawn(
        bin: &str,
        workspace: &Path,
        resume: Option<&str>,
    ) -> Result<(Self, Box<dyn Read + Send>), String> {
        let pty_system = native_pty_system();
        let size = PtySize {
            rows: PTY_ROWS,
            cols: PTY_COLS,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system
            .openpty(size)
            .map_err(|e| format!("Failed to open pty: {e}"))?;

        let mut cmd = CommandBuilder::new(bin);
        cmd.cwd(workspace);
        if let Some(session_id) = resume {
            cmd.arg("--resume");
            cmd.arg(session_id);
        }
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| format!("Failed to spawn interactive agent: {e}"))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| format!("Failed to open pty reader: {e}"))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| format!("Failed to open pty writer: {e}"))?;

        let pid = child.process_id();
        info!(
            "[interactive] Spawned {} in {} (pid={:?}, resume={:?})",
            bin,
            workspace.display(),
            pid,
            resume
        );

        let adapter = Self {
            master: Mutex::new(Some(pair.master)),
            writer: Mutex::new(Some(writer)),
            child: Mutex::new(child),
            pid,
        };

        Ok((adapter, reader))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Write encoded keystrokes to the terminal's input side.
    pub async fn write(&self, data: &[u8]) -> Result<(), String> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or("Terminal is closed")?;
        writer
            .write_all(data)
            .map_err(|e| format!("Failed to write to pty: {e}"))?;
        writer
            .flush()
            .map_err(|e| format!("Failed to flush pty: {e}"))?;
        Ok(())
    }

    /// Graceful interrupt: ^C on the terminal.
    pub async fn interrupt(&self) -> Result<(), String> {
        self.write(b"\x03").await
    }

    pub async fn kill(&self) {
        let mut child = self.child.lock().await;
        let _ = child.kill();
    }

    pub async fn try_wait(&self) -> Option<Option<i32>> {
        let mut child = self.child.lock().await;
        match child.try_wait() {
            Ok(Some(status)) => Some(Some(status.exit_code() as i32)),
            Ok(None) => None,
            Err(_) => Some(None),
        }
    }

    /// Close the terminal handle so the reader loop observes EOF.
    pub async fn close(&self) {
        self.writer.lock().await.take();
        self.master.lock().await.take();
    }
}

/// Start the reader thread and output pump for a spawned session.
pub fn start_io(
    registry: Arc<SessionRegistry>,
    session_id: String,
    mut reader: Box<dyn Read + Send>,
) {
    let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();

    // PTY reads block until data or EOF, so they get their own thread
    std::thread::spawn(move || {
        let mut buffer = [0u8; 8192];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(count) => {
                    if tx.send(buffer[..count].to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    tokio::spawn(run_output_pump(registry, session_id, rx));
}

/// Start the process-wait task; it owns the exit path for the session.
pub fn start_wait(
    registry: Arc<SessionRegistry>,
    session_id: String,
    adapter: Arc<InteractiveAdapter>,
) {
    tokio::spawn(async move {
        loop {
            if let Some(exit_code) = adapter.try_wait().await {
                adapter.close().await;
                let cause = match exit_code {
                    Some(0) => None,
                    Some(code) => Some(format!("interactive agent exited with status {code}")),
                    None => Some("interactive agent terminated by signal".to_string()),
                };
                debug!(
                    "[interactive] Session {} process exited (code={:?})",
                    session_id, exit_code
                );
                registry
                    .handle_exit(&session_id, ExitOutcome { exit_code, cause })
                    .await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    });
}

/// Sanitize → coalesce → detect → publish, plus idle detection.
async fn run_output_pump(
    registry: Arc<SessionRegistry>,
    session_id: String,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let mut sanitizer = Sanitizer::new();
    let mut coalescer = Coalescer::new();
    let mut detector = PromptDetector::new();
    let mut raw_pending = String::new();
    let mut utf8_carry: Vec<u8> = Vec::new();
    let mut quiet_ticks = 0u32;

    let mut flush_tick = interval(Duration::from_millis(FLUSH_INTERVAL_MS));
    flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            chunk = rx.recv() => {
                match chunk {
                    Some(bytes) => {
                        quiet_ticks = 0;
                        let text = decode_chunk(&mut utf8_carry, bytes);
                        if text.is_empty() {
                            continue;
                        }
                        raw_pending.push_str(&text);
                        let clean = sanitizer.push(&text);
                        for batch in coalescer.push(&clean) {
                            emit_batch(
                                &registry,
                                &session_id,
                                &mut detector,
                                batch.text,
                                &mut raw_pending,
                            )
                            .await;
                        }
                    }
                    None => break,
                }
            }
            _ = flush_tick.tick() => {
                if let Some(batch) = coalescer.flush() {
                    quiet_ticks = 0;
                    emit_batch(
                        &registry,
                        &session_id,
                        &mut detector,
                        batch.text,
                        &mut raw_pending,
                    )
                    .await;
                } else {
                    quiet_ticks += 1;
                    if quiet_ticks == IDLE_AFTER_TICKS {
                        registry.mark_idle(&session_id).await;
                    }
                }
            }
        }
    }

    // EOF: drain whatever is still buffered
    let tail = sanitizer.finish();
    let mut final_text = String::new();
    for batch in coalescer.push(&tail) {
        final_text.push_str(&batch.text);
    }
    if let Some(batch) = coalescer.flush() {
        final_text.push_str(&batch.text);
    }
    if !final_text.is_empty() || !raw_pending.is_empty() {
        emit_batch(&registry, &session_id, &mut detector, final_text, &mut raw_pending).await;
    }
    debug!("[interactive] Output pump finished for {}", session_id);
}

async fn emit_batch(
    registry: &Arc<SessionRegistry>,
    session_id: &str,
    detector: &mut PromptDetector,
    text: String,
    raw_pending: &mut String,
) {
    for event in detector.observe(&text) {
        match event {
            PromptEvent::Permission(permission) => {
                registry.set_pending_permission(session_id, permission).await;
            }
            PromptEvent::Question(question) => {
                registry.set_waiting_question(session_id, question).await;
            }
            PromptEvent::ContextExhausted(notice) => {
                registry.publish_synthetic_message(session_id, notice).await;
            }
        }
    }

    let raw = std::mem::take(raw_pending);
    registry.publish_output(session_id, text, raw).await;
}

/// Decode a byte chunk, carrying incomplete UTF-8 tails to the next read.
fn decode_chunk(carry: &mut Vec<u8>, bytes: Vec<u8>) -> String {
    let mut data = std::mem::take(carry);
    data.extend_from_slice(&bytes);

    match String::from_utf8(data) {
        Ok(text) => text,
        Err(err) => {
            let valid_up_to = err.utf8_error().valid_up_to();
            let data = err.into_bytes();
            // Hold back at most one partial sequence; anything longer is
            // genuinely invalid and replaced.
            if data.len() - valid_up_to < 4 && err_is_incomplete(&data[valid_up_to..]) {
                *carry = data[valid_up_to..].to_vec();
                String::from_utf8_lossy(&data[..valid_up_to]).into_owned()
            } else {
                String::from_utf8_lossy(&data).into_owned()
            }
        }
    }
}

/// A byte tail that could still become valid UTF-8 with more input.
fn err_is_incomplete(tail: &[u8]) -> bool {
    std::str::from_utf8(tail)
        .err()
        .map(|e| e.error_len().is_none())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::decode_chunk;

    #[test]
    fn decode_carries_split_utf8() {
        let mut carry = Vec::new();
        // "é" = 0xC3 0xA9 split across chunks
        let first = decode_chunk(&mut carry, vec![b'a', 0xC3]);
        assert_eq!(first, "a");
        assert_eq!(carry, [0xC3]);
        let second = decode_chunk(&mut carry, vec![0xA9, b'b']);
        assert_eq!(second, "éb");
        assert!(carry.is_empty());
    }

    #[test]
    fn decode_replaces_truly_invalid_bytes() {
        let mut carry = Vec::new();
        let text = decode_chunk(&mut carry, vec![b'x', 0xFF, b'y']);
        assert!(text.starts_with('x') && text.ends_with('y'));
        assert!(carry.is_empty());
    }
}
