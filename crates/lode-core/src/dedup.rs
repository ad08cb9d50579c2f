//! Line-oriented output deduplication.
//!
//! Terminal output from coding assistants repeats heavily: progress
//! lines, spinner redraws, identical status messages. The deduplicator
//! suppresses lines that were already emitted within a trailing time
//! window before anything downstream buffers or persists them.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Sweep the digest map once it grows past this many entries.
const SWEEP_THRESHOLD: usize = 100;

/// Deduplicating line splitter over a raw byte stream.
///
/// Driven by a single caller; holds no lock of its own. `\r` discards
/// the accumulating partial line, modeling an in-place terminal
/// overwrite, so content later overwritten is never emitted.
pub struct OutputDeduplicator {
    window: Duration,
    partial: Vec<u8>,
    last_seen: HashMap<[u8; 32], Instant>,
    on_line: Box<dyn FnMut(&str) + Send>,
}

impl OutputDeduplicator {
    pub fn new(window: Duration, on_line: impl FnMut(&str) + Send + 'static) -> Self {
        Self {
            window,
            partial: Vec::new(),
            last_seen: HashMap::new(),
            on_line: Box::new(on_line),
        }
    }

    /// Feed raw bytes. Complete lines are checked against the window
    /// and emitted to the callback without their terminator.
    pub fn write(&mut self, data: &[u8]) {
        for &b in data {
            match b {
                b'\n' => self.complete_line(),
                b'\r' => self.partial.clear(),
                _ => self.partial.push(b),
            }
        }
    }

    /// Emit any trailing partial line. Called at stream end.
    pub fn flush(&mut self) {
        if !self.partial.is_empty() {
            self.complete_line();
        }
    }

    fn complete_line(&mut self) {
        if self.partial.is_empty() {
            (self.on_line)("");
            return;
        }

        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();

        let digest: [u8; 32] = Sha256::digest(line.as_bytes()).into();
        let now = Instant::now();

        if let Some(&seen) = self.last_seen.get(&digest) {
            if now.duration_since(seen) < self.window {
                tracing::trace!(target: "lode::dedup", "Suppressed repeated line ({} bytes)", line.len());
                return;
            }
        }

        self.last_seen.insert(digest, now);
        if self.last_seen.len() > SWEEP_THRESHOLD {
            self.sweep(now);
        }

        (self.on_line)(&line);
    }

    /// Drop digests not seen within twice the window.
    fn sweep(&mut self, now: Instant) {
        let horizon = self.window * 2;
        self.last_seen
            .retain(|_, seen| now.duration_since(*seen) <= horizon);
    }
}
