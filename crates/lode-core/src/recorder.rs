//! Session recording: turns a raw terminal byte stream into persisted
//! session state.
//!
//! The write path runs dedup and ANSI stripping inline, appends clean
//! lines to a shared buffer, and hands each line to a bounded channel
//! feeding a single extraction consumer so line order is preserved
//! without blocking on a slow backend. A periodic task persists the
//! current buffer length as best-effort telemetry.

use crate::dedup::OutputDeduplicator;
use crate::extract::ExtractionPipeline;
use crate::store::HistoryStore;
use crate::Result;
use chrono::Utc;
use lode_types::Session;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Capacity of the line channel into the extraction consumer.
const LINE_CHANNEL_CAPACITY: usize = 256;

/// Recorder settings supplied by the capture layer.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Assistant tool being recorded, e.g. "claude".
    pub tool: String,
    /// Full invoked command line.
    pub command: String,
    /// Working directory of the session.
    pub cwd: String,
    /// Dedup suppression window.
    pub dedup_window: Duration,
    /// Interval of the best-effort byte-count sync.
    pub sync_interval: Duration,
    /// Sessions older than this are deleted at stop. Zero disables.
    pub retention_days: i64,
    /// Database size budget enforced at stop. Zero disables.
    pub max_db_bytes: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            tool: "claude".to_string(),
            command: String::new(),
            cwd: String::new(),
            dedup_window: Duration::from_secs(2),
            sync_interval: Duration::from_secs(5),
            retention_days: 30,
            max_db_bytes: 0,
        }
    }
}

/// Strips ANSI escape sequences from a byte stream.
///
/// ESC enters escape mode; the first ASCII letter ends it. All bytes
/// seen while in escape mode are discarded.
#[derive(Default)]
struct AnsiStripper {
    in_escape: bool,
}

impl AnsiStripper {
    fn strip(&mut self, input: &str) -> String {
        let mut out = Vec::with_capacity(input.len());
        for &byte in input.as_bytes() {
            if self.in_escape {
                if byte.is_ascii_alphabetic() {
                    self.in_escape = false;
                }
            } else if byte == 0x1b {
                self.in_escape = true;
            } else {
                out.push(byte);
            }
        }
        String::from_utf8_lossy(&out).into_owned()
    }
}

/// Records one capture session. Owns its Session row from creation
/// until `stop`.
pub struct SessionRecorder {
    session_id: String,
    store: Arc<HistoryStore>,
    pipeline: Option<Arc<ExtractionPipeline>>,
    config: RecorderConfig,
    dedup: OutputDeduplicator,
    /// Clean transcript shared with the periodic sync task.
    buffer: Arc<Mutex<String>>,
    /// Lines emitted by the dedup callback since the last drain.
    emitted: Arc<Mutex<Vec<String>>>,
    line_tx: Option<mpsc::Sender<String>>,
    consumer: Option<JoinHandle<()>>,
    sync_task: JoinHandle<()>,
    raw_bytes: u64,
    stopped: bool,
}

impl SessionRecorder {
    /// Open a new session row and start the background tasks.
    pub fn start(
        store: Arc<HistoryStore>,
        pipeline: Option<Arc<ExtractionPipeline>>,
        config: RecorderConfig,
    ) -> Result<Self> {
        let session_id = Uuid::new_v4().to_string();
        store.create_session(&Session {
            id: session_id.clone(),
            tool: config.tool.clone(),
            command: config.command.clone(),
            cwd: config.cwd.clone(),
            started_at: Utc::now(),
            ended_at: None,
            output_bytes: 0,
        })?;
        tracing::info!(target: "lode::recorder", "Recording session {} for {}", session_id, config.tool);

        let buffer = Arc::new(Mutex::new(String::new()));
        let emitted = Arc::new(Mutex::new(Vec::new()));

        let dedup = {
            let buffer = Arc::clone(&buffer);
            let emitted = Arc::clone(&emitted);
            let mut stripper = AnsiStripper::default();
            OutputDeduplicator::new(config.dedup_window, move |line: &str| {
                let clean = stripper.strip(line);
                {
                    let mut buf = buffer.lock().unwrap();
                    buf.push_str(&clean);
                    buf.push('\n');
                }
                emitted.lock().unwrap().push(clean);
            })
        };

        let (line_tx, consumer) = match &pipeline {
            Some(pipeline) => {
                let (tx, mut rx) = mpsc::channel::<String>(LINE_CHANNEL_CAPACITY);
                let pipeline = Arc::clone(pipeline);
                let handle = tokio::spawn(async move {
                    while let Some(line) = rx.recv().await {
                        if let Err(e) = pipeline.process_chunk(&line).await {
                            tracing::warn!(target: "lode::recorder", "Extraction chunk failed: {}", e);
                        }
                    }
                });
                (Some(tx), Some(handle))
            }
            None => (None, None),
        };

        let sync_task = {
            let store = Arc::clone(&store);
            let buffer = Arc::clone(&buffer);
            let session_id = session_id.clone();
            let interval = config.sync_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let len = buffer.lock().unwrap().len() as u64;
                    if let Err(e) = store.update_session_sync(&session_id, len) {
                        tracing::warn!(target: "lode::recorder", "Session sync failed: {}", e);
                    }
                }
            })
        };

        Ok(Self {
            session_id,
            store,
            pipeline,
            config,
            dedup,
            buffer,
            emitted,
            line_tx,
            consumer,
            sync_task,
            raw_bytes: 0,
            stopped: false,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Raw bytes received pre-dedup, for diagnostics.
    pub fn raw_bytes(&self) -> u64 {
        self.raw_bytes
    }

    /// Feed raw terminal bytes. Never blocks on extraction; no-op
    /// once stopped.
    pub fn write(&mut self, data: &[u8]) {
        if self.stopped {
            return;
        }
        self.raw_bytes += data.len() as u64;
        self.dedup.write(data);
        self.dispatch_emitted();
    }

    /// Stop recording: flush, drain the extraction consumer, persist
    /// final state, and enforce retention. Every step is best-effort;
    /// failures are logged and the remaining steps still run.
    pub async fn stop(mut self) -> String {
        self.stopped = true;
        self.dedup.flush();
        self.sync_task.abort();
        self.dispatch_emitted();

        // Closing the channel lets the consumer drain and exit; the
        // join is the deterministic end of in-flight extraction.
        drop(self.line_tx.take());
        if let Some(consumer) = self.consumer.take() {
            if let Err(e) = consumer.await {
                tracing::warn!(target: "lode::recorder", "Extraction consumer aborted: {}", e);
            }
        }

        let output = self.buffer.lock().unwrap().clone();
        let output_bytes = output.len() as u64;

        if let Err(e) = self
            .store
            .finish_session(&self.session_id, Utc::now(), output_bytes)
        {
            tracing::warn!(target: "lode::recorder", "Failed to finish session: {}", e);
        }
        if let Err(e) = self.store.save_session_output(&self.session_id, &output) {
            tracing::warn!(target: "lode::recorder", "Failed to save session output: {}", e);
        }

        if let Some(pipeline) = &self.pipeline {
            match pipeline.finalize().await {
                Ok(gems) if !gems.is_empty() => {
                    tracing::info!(target: "lode::recorder", "Extracted {} pending gems", gems.len());
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(target: "lode::recorder", "Extraction finalize failed: {}", e);
                }
            }
        }

        self.enforce_retention();
        tracing::info!(
            target: "lode::recorder",
            "Session {} stopped ({} bytes deduplicated)",
            self.session_id,
            output_bytes
        );
        self.session_id
    }

    /// Forward lines captured by the dedup callback into the
    /// extraction channel, in emission order. A full channel means
    /// extraction has fallen behind; the line is dropped with a log
    /// rather than stalling the write path.
    fn dispatch_emitted(&mut self) {
        let lines: Vec<String> = {
            let mut emitted = self.emitted.lock().unwrap();
            emitted.drain(..).collect()
        };
        let Some(tx) = &self.line_tx else { return };
        for mut line in lines {
            line.push('\n');
            match tx.try_send(line) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(target: "lode::recorder", "Extraction queue full, dropping line");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::warn!(target: "lode::recorder", "Extraction consumer gone, dropping line");
                    break;
                }
            }
        }
    }

    fn enforce_retention(&self) {
        if self.config.retention_days > 0 {
            if let Err(e) = self.store.cleanup(self.config.retention_days) {
                tracing::warn!(target: "lode::recorder", "Retention cleanup failed: {}", e);
            }
        }
        if self.config.max_db_bytes > 0 {
            match self.store.enforce_size_limit(self.config.max_db_bytes) {
                Ok(evicted) if evicted > 0 => {
                    if let Err(e) = self.store.vacuum() {
                        tracing::warn!(target: "lode::recorder", "Vacuum failed: {}", e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(target: "lode::recorder", "Size limit enforcement failed: {}", e);
                }
            }
        }
    }
}
