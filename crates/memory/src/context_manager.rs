use crate::compactor::{
    render_for_summary, truncation_notice, CompactionConfig, CompactionError, CompactionPlan,
    Summarizer,
};
use crate::transcript::Transcript;
use crate::types::Message;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Outcome of one successful compaction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CompactionReport {
    pub generation: u64,
    pub summarized_messages: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
    /// True when the summarizer failed and the prefix was dropped instead.
    pub truncated: bool,
}

/// Owns the live transcript, its running token estimate and an append-only
/// archive of every message ever appended.
pub struct ContextManager {
    config: CompactionConfig,
    transcript: Transcript,
    archive: Vec<Message>,
    estimate: usize,
    reported_floor: usize,
}

impl ContextManager {
    pub fn new(config: CompactionConfig) -> Self {
        Self {
            config,
            transcript: Transcript::new(),
            archive: Vec::new(),
            estimate: 0,
            reported_floor: 0,
        }
    }

    pub fn with_system_prompt(config: CompactionConfig, prompt: impl Into<String>) -> Self {
        let mut manager = Self::new(config);
        manager.append(Message::system(prompt));
        manager
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    pub fn append(&mut self, message: Message) {
        self.estimate += message.estimated_tokens();
        self.archive.push(message.clone());
        self.transcript.append(message);
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn messages(&self) -> &[Message] {
        self.transcript.messages()
    }

    pub fn archive(&self) -> &[Message] {
        &self.archive
    }

    pub fn generation(&self) -> u64 {
        self.transcript.generation()
    }

    /// Running estimate for the live transcript. Provider-reported prompt
    /// sizes only ever raise it.
    pub fn estimate(&self) -> usize {
        self.estimate.max(self.reported_floor)
    }

    pub fn observe_prompt_tokens(&mut self, prompt_tokens: usize) {
        if prompt_tokens > self.reported_floor {
            debug!(
                "Provider reported {} prompt tokens (estimate {})",
                prompt_tokens, self.estimate
            );
            self.reported_floor = prompt_tokens;
        }
    }

    pub fn threshold(&self) -> usize {
        self.config.threshold()
    }

    pub fn needs_compaction(&self) -> bool {
        self.estimate() > self.threshold()
    }

    /// Compacts when over threshold. Summarizer failures fall back to
    /// truncation; returns `None` when nothing changed.
    pub async fn compact<S>(&mut self, summarizer: &S) -> Option<CompactionReport>
    where
        S: Summarizer + ?Sized,
    {
        if !self.needs_compaction() {
            return None;
        }

        let Some(plan) = CompactionPlan::for_transcript(&self.transcript, self.config.keep_recent)
        else {
            debug!("Over threshold but nothing left to compact");
            return None;
        };

        info!(
            "Compacting {} messages (estimate {} > threshold {})",
            plan.prefix.len(),
            self.estimate(),
            self.threshold()
        );

        match summarizer.summarize(&plan.prefix).await {
            Ok(text) => match self.apply_summary(&plan, &text) {
                Ok(report) => report,
                Err(e) => {
                    warn!("Discarding summary: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("Summarization failed, truncating instead: {}", e);
                self.truncate(&plan)
            }
        }
    }

    /// Replaces the planned prefix with `summary_text`. Rejects plans taken
    /// from an older transcript state. Returns `Ok(None)` when the result
    /// would not be smaller.
    pub fn apply_summary(
        &mut self,
        plan: &CompactionPlan,
        summary_text: &str,
    ) -> Result<Option<CompactionReport>, CompactionError> {
        plan.check_current(&self.transcript)?;
        let rebuilt = plan.rebuild(&self.transcript, summary_text);
        if rebuilt.estimate_tokens() > self.transcript.estimate_tokens() {
            warn!("Summary larger than the prefix it replaces, truncating instead");
            return Ok(self.truncate(plan));
        }
        Ok(Some(self.install(rebuilt, plan, false)))
    }

    /// Drops the planned prefix, leaving a marker summary.
    pub fn truncate(&mut self, plan: &CompactionPlan) -> Option<CompactionReport> {
        if plan.check_current(&self.transcript).is_err() {
            return None;
        }
        let rebuilt = plan.rebuild(&self.transcript, &truncation_notice(plan.prefix.len()));
        if rebuilt.estimate_tokens() > self.transcript.estimate_tokens() {
            warn!("Truncation would not shrink the transcript, leaving it unchanged");
            return None;
        }
        Some(self.install(rebuilt, plan, true))
    }

    fn install(&mut self, rebuilt: Transcript, plan: &CompactionPlan, truncated: bool) -> CompactionReport {
        let tokens_before = self.estimate();
        self.transcript = rebuilt;
        self.estimate = self.transcript.estimate_tokens();
        self.reported_floor = 0;

        let report = CompactionReport {
            generation: self.transcript.generation(),
            summarized_messages: plan.prefix.len(),
            tokens_before,
            tokens_after: self.estimate(),
            truncated,
        };
        info!(
            "Compaction generation {}: {} -> {} tokens",
            report.generation, report.tokens_before, report.tokens_after
        );
        report
    }

    /// Starts a fresh view holding only the pinned system prompt. The
    /// archive is kept.
    pub fn clear(&mut self) {
        let pinned = self.transcript.pinned_len();
        let kept = self.transcript.messages()[..pinned].to_vec();
        let generation = self.transcript.generation() + 1;
        self.transcript = Transcript::from_parts(kept, generation);
        self.estimate = self.transcript.estimate_tokens();
        self.reported_floor = 0;
    }

    /// Prompt text used for the dedicated summarization call.
    pub fn summary_request(prefix: &[Message]) -> String {
        format!(
            "Summarize the following conversation so it can replace the original messages. \
             Keep file paths, decisions, tool results and open tasks. Be concise.\n\n{}",
            render_for_summary(prefix)
        )
    }
}
