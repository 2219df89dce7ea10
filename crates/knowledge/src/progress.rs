//! Structured progress reporting for batch analysis.
//!
//! Workers emit one event per step of each invoice: `judge`, `embed`,
//! `publish`, or `failed` / `cancelled`. Events arrive from concurrent
//! workers, so `current` counts finished items, not the position of the
//! item that emitted the event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Progress event emitted during batch analysis.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Step name: "judge", "embed", "publish", "failed", "cancelled"
    pub phase: String,

    /// Invoice the event is about
    pub invoice_id: String,

    /// Items finished so far
    pub current: u64,

    /// Items in the batch
    pub total: Option<u64>,

    /// Percentage complete (0.0 - 100.0)
    pub percentage: Option<f64>,

    /// Human-readable message
    pub message: String,

    /// Seconds since the reporter was created
    pub elapsed_secs: Option<f64>,
}

impl ProgressEvent {
    pub fn new(
        phase: impl Into<String>,
        invoice_id: impl Into<String>,
        current: u64,
        total: Option<u64>,
        message: impl Into<String>,
    ) -> Self {
        let percentage = total.map(|t| if t > 0 { (current as f64 / t as f64) * 100.0 } else { 0.0 });

        Self {
            phase: phase.into(),
            invoice_id: invoice_id.into(),
            current,
            total,
            percentage,
            message: message.into(),
            elapsed_secs: None,
        }
    }

    pub fn with_elapsed(mut self, elapsed_secs: f64) -> Self {
        self.elapsed_secs = Some(elapsed_secs);
        self
    }

    /// Format as a simple user-facing line.
    pub fn format_simple(&self) -> String {
        let progress = match self.total {
            Some(total) => format!("{}/{}", self.current, total),
            None => self.current.to_string(),
        };

        let pct = self
            .percentage
            .map(|p| format!(" ({:.0}%)", p))
            .unwrap_or_default();

        format!(
            "[{}] {}{} {} - {}",
            self.phase, progress, pct, self.invoice_id, self.message
        )
    }
}

/// Callback for progress events.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Progress reporter shared by every worker of one batch.
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    start_time: Arc<Instant>,
    finished: Arc<AtomicU64>,
    total: Option<u64>,
}

impl ProgressReporter {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
            start_time: Arc::new(Instant::now()),
            finished: Arc::new(AtomicU64::new(0)),
            total: None,
        }
    }

    /// Reporter that emits nothing.
    pub fn noop() -> Self {
        Self {
            callback: None,
            start_time: Arc::new(Instant::now()),
            finished: Arc::new(AtomicU64::new(0)),
            total: None,
        }
    }

    /// Copy of this reporter for a batch of `total` items, with a fresh counter.
    pub fn for_batch(&self, total: usize) -> Self {
        Self {
            callback: self.callback.clone(),
            start_time: Arc::new(Instant::now()),
            finished: Arc::new(AtomicU64::new(0)),
            total: Some(total as u64),
        }
    }

    fn emit(&self, phase: &str, invoice_id: &str, current: u64, message: String) {
        let Some(callback) = &self.callback else {
            return;
        };
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let event =
            ProgressEvent::new(phase, invoice_id, current, self.total, message).with_elapsed(elapsed);

        tracing::debug!(
            phase = %event.phase,
            invoice = %event.invoice_id,
            current = event.current,
            total = ?event.total,
            elapsed_secs = elapsed,
            "Progress event"
        );

        callback(event);
    }

    fn in_flight(&self, phase: &str, invoice_id: &str, message: String) {
        self.emit(phase, invoice_id, self.finished.load(Ordering::SeqCst), message);
    }

    fn finish(&self, phase: &str, invoice_id: &str, message: String) {
        let current = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
        self.emit(phase, invoice_id, current, message);
    }

    /// Judgment call started (`attempt` is 1-based).
    pub fn judge(&self, invoice_id: &str, attempt: u32) {
        self.in_flight("judge", invoice_id, format!("attempt {}", attempt));
    }

    pub fn embed(&self, invoice_id: &str, model: &str) {
        self.in_flight("embed", invoice_id, format!("model={}", model));
    }

    /// Record published; the item is finished.
    pub fn publish(&self, invoice_id: &str, status: &str) {
        self.finish("publish", invoice_id, format!("status={}", status));
    }

    pub fn failed(&self, invoice_id: &str, reason: &str) {
        self.finish("failed", invoice_id, reason.to_string());
    }

    pub fn cancelled(&self, invoice_id: &str) {
        self.finish("cancelled", invoice_id, "not analyzed".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_progress_event_format() {
        let event = ProgressEvent::new("publish", "hotel.txt", 5, Some(10), "status=Approved");
        let formatted = event.format_simple();
        assert!(formatted.contains("[publish]"));
        assert!(formatted.contains("5/10"));
        assert!(formatted.contains("50%"));
        assert!(formatted.contains("hotel.txt"));
    }

    #[test]
    fn test_finished_counter() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let reporter = ProgressReporter::new(Arc::new(move |event: ProgressEvent| {
            sink.lock().unwrap().push(event);
        }))
        .for_batch(2);

        reporter.judge("a", 1);
        reporter.publish("a", "Approved");
        reporter.failed("b", "malformed judgment");

        let captured = events.lock().unwrap();
        let phases: Vec<(&str, u64)> = captured.iter().map(|e| (e.phase.as_str(), e.current)).collect();
        assert_eq!(phases, vec![("judge", 0), ("publish", 1), ("failed", 2)]);
        assert_eq!(captured[2].percentage, Some(100.0));
    }

    #[test]
    fn test_noop_reporter() {
        ProgressReporter::noop().cancelled("x");
    }
}
