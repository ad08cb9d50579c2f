//! Threshold-triggered extraction of gems from streaming transcript
//! text, with cross-chunk context carryover.

use crate::gems::GemStore;
use crate::summarizer::Summarizer;
use crate::Result;
use chrono::Utc;
use lode_types::Gem;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Tuning for the extraction pipeline.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Client identifier stamped onto extracted gems.
    pub client: String,
    /// Approximate token count that triggers an extraction pass.
    pub token_threshold: usize,
    /// Approximate tokens of previous-chunk tail carried as context.
    pub overlap_tokens: usize,
    /// Uncommitted VCS diff supplied by the caller, passed through to
    /// the backend for context.
    pub diff: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            client: "lode".to_string(),
            token_threshold: 4000,
            overlap_tokens: 500,
            diff: String::new(),
        }
    }
}

#[derive(Default)]
struct PipelineState {
    buffer: String,
    /// Tail of the previous chunk, prepended to the next extraction
    /// call so cross-chunk references survive.
    last_tail: String,
    /// Gems from a batch the backend flagged mid-thought, held for
    /// merging once a complete batch arrives.
    incomplete: Vec<Gem>,
    finalized: Vec<Gem>,
}

/// Accumulates transcript text and runs the summarizer once enough has
/// built up. One pipeline per recorder.
pub struct ExtractionPipeline {
    summarizer: Option<Arc<dyn Summarizer>>,
    gem_store: GemStore,
    config: ExtractionConfig,
    state: Mutex<PipelineState>,
}

impl ExtractionPipeline {
    /// `summarizer` of `None` puts the pipeline in no-op mode: text is
    /// accepted and discarded at each threshold crossing.
    pub fn new(
        summarizer: Option<Arc<dyn Summarizer>>,
        gem_store: GemStore,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            summarizer,
            gem_store,
            config,
            state: Mutex::new(PipelineState::default()),
        }
    }

    /// Append text to the pending buffer; run an extraction pass if
    /// the token estimate has reached the threshold.
    pub async fn process_chunk(&self, text: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.buffer.push_str(text);

        if estimate_tokens(&state.buffer) >= self.config.token_threshold {
            self.extract_locked(&mut state).await?;
        }
        Ok(())
    }

    /// Current approximate token count of the unextracted buffer.
    pub async fn buffered_tokens(&self) -> usize {
        estimate_tokens(&self.state.lock().await.buffer)
    }

    /// Drain the remaining buffer, merge held incomplete gems,
    /// dedupe by normalized title, and persist the survivors as
    /// pending gems. Individual persistence failures are logged, not
    /// propagated.
    pub async fn finalize(&self) -> Result<Vec<Gem>> {
        let mut state = self.state.lock().await;

        if !state.buffer.is_empty() {
            if let Err(e) = self.extract_locked(&mut state).await {
                tracing::warn!(target: "lode::extract", "Final extraction pass failed: {}", e);
            }
        }

        let residual: Vec<Gem> = state.incomplete.drain(..).collect();
        state.finalized.extend(residual);

        let mut seen = HashSet::new();
        let mut survivors = Vec::new();
        for gem in state.finalized.drain(..) {
            if seen.insert(gem.normalized_title()) {
                survivors.push(gem);
            }
        }

        for gem in &survivors {
            if let Err(e) = self.gem_store.add_pending_gem(gem.clone()) {
                tracing::warn!(
                    target: "lode::extract",
                    "Failed to persist pending gem '{}': {}",
                    gem.title,
                    e
                );
            }
        }

        Ok(survivors)
    }

    /// Run one extraction pass over the buffered text. Always resets
    /// the buffer and recomputes the context tail, even on backend
    /// error; the unextracted chunk is lost in that case.
    async fn extract_locked(&self, state: &mut PipelineState) -> Result<()> {
        let Some(summarizer) = &self.summarizer else {
            Self::advance(state, self.config.overlap_tokens);
            return Ok(());
        };

        let full_text = if state.last_tail.is_empty() {
            state.buffer.clone()
        } else {
            format!("{}\n{}", state.last_tail, state.buffer)
        };

        let result = summarizer
            .extract(&full_text, &self.config.diff, &state.finalized)
            .await;

        Self::advance(state, self.config.overlap_tokens);

        match result {
            Ok(extraction) => {
                let now = Utc::now();
                let gems = extraction.gems.into_iter().map(|mut gem| {
                    if gem.created.is_none() {
                        gem.created = Some(now);
                    }
                    gem.client = self.config.client.clone();
                    gem.model = summarizer.model_name().to_string();
                    gem
                });

                if extraction.incomplete {
                    state.incomplete.extend(gems);
                } else {
                    let held: Vec<Gem> = state.incomplete.drain(..).collect();
                    state.finalized.extend(held);
                    state.finalized.extend(gems);
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!(target: "lode::extract", "Extraction pass failed: {}", e);
                Err(e)
            }
        }
    }

    /// Replace the context tail with the end of the current buffer and
    /// reset the buffer.
    fn advance(state: &mut PipelineState, overlap_tokens: usize) {
        state.last_tail = tail_bytes(&state.buffer, overlap_tokens * 4);
        state.buffer.clear();
    }
}

/// Rough token estimate: four bytes per token.
fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// The last `max_bytes` of `text`, snapped forward to a char boundary.
fn tail_bytes(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
