use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use synlogos_policy::ORCHESTRATE_TOOL;
use synlogos_tools::ToolResult;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ToolUsage {
    pub name: String,
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
}

impl ToolUsage {
    /// Percentage of successful calls.
    pub fn success_rate(&self) -> f64 {
        if self.calls == 0 {
            return 0.0;
        }
        self.successes as f64 / self.calls as f64 * 100.0
    }

    fn record(&mut self, success: bool, duration_ms: u64) {
        self.calls += 1;
        self.total_duration_ms += duration_ms;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
    }
}

/// Observational counters for one session. Updated synchronously by the
/// agent loop on each fold.
pub struct SessionMetrics {
    started_at: DateTime<Utc>,
    prompts: AtomicU64,
    direct_calls: AtomicU64,
    orchestrations: AtomicU64,
    rejections: AtomicU64,
    compactions: AtomicU64,
    provider_requests: AtomicU64,
    provider_failures: AtomicU64,
    tools: Mutex<HashMap<String, ToolUsage>>,
    warnings: Mutex<Vec<String>>,
}

impl SessionMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_prompt(&self) {
        self.prompts.fetch_add(1, Ordering::Relaxed);
    }

    /// A call dispatched directly by the model.
    pub fn record_direct(&self, result: &ToolResult) {
        self.direct_calls.fetch_add(1, Ordering::Relaxed);
        self.record_tool_result(result);
    }

    /// Any result folded into the conversation, including orchestrated and
    /// synthesized ones.
    pub fn record_tool_result(&self, result: &ToolResult) {
        self.record_tool(&result.tool_name, result.is_success(), result.duration_ms);
    }

    pub fn record_orchestration(&self, success: bool, duration_ms: u64) {
        self.orchestrations.fetch_add(1, Ordering::Relaxed);
        self.record_tool(ORCHESTRATE_TOOL, success, duration_ms);
    }

    fn record_tool(&self, name: &str, success: bool, duration_ms: u64) {
        self.tools
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| ToolUsage {
                name: name.to_string(),
                ..ToolUsage::default()
            })
            .record(success, duration_ms);
    }

    pub fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_request(&self) {
        self.provider_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_failure(&self) {
        self.provider_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_warning(&self, warning: impl Into<String>) {
        self.warnings.lock().push(warning.into());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut tools: Vec<ToolUsage> = self.tools.lock().values().cloned().collect();
        tools.sort_by(|a, b| b.calls.cmp(&a.calls).then_with(|| a.name.cmp(&b.name)));

        MetricsSnapshot {
            started_at: self.started_at,
            taken_at: Utc::now(),
            prompts: self.prompts.load(Ordering::Relaxed),
            direct_calls: self.direct_calls.load(Ordering::Relaxed),
            orchestrations: self.orchestrations.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
            provider_requests: self.provider_requests.load(Ordering::Relaxed),
            provider_failures: self.provider_failures.load(Ordering::Relaxed),
            tools,
            warnings: self.warnings.lock().clone(),
        }
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            prompts: AtomicU64::new(0),
            direct_calls: AtomicU64::new(0),
            orchestrations: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            compactions: AtomicU64::new(0),
            provider_requests: AtomicU64::new(0),
            provider_failures: AtomicU64::new(0),
            tools: Mutex::new(HashMap::new()),
            warnings: Mutex::new(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub started_at: DateTime<Utc>,
    pub taken_at: DateTime<Utc>,
    pub prompts: u64,
    pub direct_calls: u64,
    pub orchestrations: u64,
    pub rejections: u64,
    pub compactions: u64,
    pub provider_requests: u64,
    pub provider_failures: u64,
    /// Ordered by call count, busiest first.
    pub tools: Vec<ToolUsage>,
    pub warnings: Vec<String>,
}

impl MetricsSnapshot {
    pub fn tool(&self, name: &str) -> Option<&ToolUsage> {
        self.tools.iter().find(|usage| usage.name == name)
    }

    pub fn tool_success_rate(&self) -> f64 {
        let calls: u64 = self.tools.iter().map(|usage| usage.calls).sum();
        if calls == 0 {
            return 1.0;
        }
        let successes: u64 = self.tools.iter().map(|usage| usage.successes).sum();
        successes as f64 / calls as f64
    }

    pub fn provider_success_rate(&self) -> f64 {
        if self.provider_requests == 0 {
            return 1.0;
        }
        1.0 - (self.provider_failures as f64 / self.provider_requests as f64)
    }

    pub fn hybrid_ratio(&self) -> String {
        format!("{}:{}", self.direct_calls, self.orchestrations)
    }

    pub fn summary(&self) -> String {
        let rule = "=".repeat(60);
        let thin = "-".repeat(60);
        let elapsed = (self.taken_at - self.started_at).num_seconds().max(0);

        let mut out = String::new();
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "SESSION METRICS");
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(
            out,
            "Session duration: {}:{:02}:{:02}",
            elapsed / 3600,
            elapsed / 60 % 60,
            elapsed % 60
        );
        let _ = writeln!(out, "Total prompts: {}", self.prompts);
        let _ = writeln!(out, "Direct tool calls: {}", self.direct_calls);
        let _ = writeln!(out, "Orchestration calls: {}", self.orchestrations);
        if self.rejections > 0 {
            let _ = writeln!(out, "Guardrail rejections: {}", self.rejections);
        }
        if self.compactions > 0 {
            let _ = writeln!(out, "Compactions: {}", self.compactions);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "Tool Usage Breakdown:");
        let _ = writeln!(out, "{}", thin);
        for usage in &self.tools {
            let _ = writeln!(
                out,
                "  {:20} {:3} calls  {:5.1}% success",
                usage.name,
                usage.calls,
                usage.success_rate()
            );
        }
        let _ = writeln!(out, "{}", thin);
        for warning in &self.warnings {
            let _ = writeln!(out, "Warning: {}", warning);
        }
        let _ = writeln!(
            out,
            "Hybrid ratio: {} (direct:orchestrate)",
            self.hybrid_ratio()
        );
        out.push_str(&rule);
        out
    }
}
