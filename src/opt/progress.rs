//! Progress reporting for the profile-guided search.
//!
//! The search loop only talks to [`SearchProgress`]; the CLI plugs in the
//! indicatif bar and tests use [`NoOpProgress`].

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// A fused pair that was measured and committed.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedStep {
    /// Committed fusion steps, this one included.
    pub step: usize,
    /// The fused pair, as `first + second`.
    pub candidate: String,
    pub latency: f64,
    /// Lowest latency measured so far, this step included.
    pub best: f64,
}

/// Summary handed to [`SearchProgress::finish`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSummary {
    pub elapsed: Duration,
    pub steps: usize,
    /// Pairs whose measurement failed and were left unfused.
    pub skipped: usize,
    pub best: Option<f64>,
}

/// Progress sink driven by the search loop.
///
/// ```ignore
/// use stencilg::opt::{CommittedStep, IndicatifProgress, SearchProgress};
///
/// let mut progress = IndicatifProgress::new();
/// progress.start(30);
/// progress.committed(&CommittedStep {
///     step: 1,
///     candidate: "conv_a + conv_b".into(),
///     latency: 1.25,
///     best: 1.25,
/// });
/// ```
pub trait SearchProgress: Send {
    /// Called once before the first measurement.
    fn start(&mut self, max_steps: usize);

    /// Called after a fused graph was measured and kept.
    fn committed(&mut self, step: &CommittedStep);

    /// Called when a fused pair failed to measure and was skipped.
    fn skipped(&mut self, candidate: &str, reason: &str);

    /// Called when the search ends normally.
    fn finish(&mut self, summary: &SearchSummary);

    /// Called when a failed measurement stops the search.
    fn abort(&mut self, candidate: &str);
}

/// Cargo-style progress bar:
///
/// ```text
///    Searching [======>                 ] 7/30 conv_a + conv_b 1.2500 (best 1.1000, 2 skipped)
/// ```
///
/// and on completion:
///
/// ```text
///     Finished fusion search in 12.40s (7 steps, 2 skipped, best 1.1000)
/// ```
pub struct IndicatifProgress {
    pb: Option<ProgressBar>,
    skipped: usize,
    best: Option<f64>,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self {
            pb: None,
            skipped: 0,
            best: None,
        }
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchProgress for IndicatifProgress {
    fn start(&mut self, max_steps: usize) {
        self.skipped = 0;
        self.best = None;

        let pb = ProgressBar::new(max_steps as u64);
        if let Ok(style) =
            ProgressStyle::with_template("{prefix:>12.cyan.bold} [{bar:24}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("=> "));
        }
        pb.set_prefix("Searching");
        self.pb = Some(pb);
    }

    fn committed(&mut self, step: &CommittedStep) {
        self.best = Some(step.best);
        if let Some(ref pb) = self.pb {
            pb.set_message(step_message(&step.candidate, step.latency, self.best, self.skipped));
            pb.set_position(step.step as u64);
        }
    }

    fn skipped(&mut self, candidate: &str, reason: &str) {
        self.skipped += 1;
        if let Some(ref pb) = self.pb {
            pb.println(format!("{:>12} {} ({})", "\x1b[1;33mSkipped\x1b[0m", candidate, reason));
            pb.set_message(skip_message(candidate, self.best, self.skipped));
        }
    }

    fn finish(&mut self, summary: &SearchSummary) {
        if let Some(pb) = self.pb.take() {
            pb.finish_and_clear();
            println!(
                "{:>12} fusion search in {} ({})",
                "\x1b[1;32mFinished\x1b[0m",
                format_duration(summary.elapsed),
                summary_tail(summary)
            );
        }
    }

    fn abort(&mut self, candidate: &str) {
        if let Some(pb) = self.pb.take() {
            pb.abandon_with_message(format!("aborted on {}", candidate));
        }
    }
}

/// Reports nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProgress;

impl NoOpProgress {
    pub fn new() -> Self {
        Self
    }
}

impl SearchProgress for NoOpProgress {
    fn start(&mut self, _max_steps: usize) {}
    fn committed(&mut self, _step: &CommittedStep) {}
    fn skipped(&mut self, _candidate: &str, _reason: &str) {}
    fn finish(&mut self, _summary: &SearchSummary) {}
    fn abort(&mut self, _candidate: &str) {}
}

/// `<pair> <latency> (best <best>, <n> skipped)`
fn step_message(candidate: &str, latency: f64, best: Option<f64>, skipped: usize) -> String {
    format!("{} {:.4} ({})", candidate, latency, standing(best, skipped))
}

fn skip_message(candidate: &str, best: Option<f64>, skipped: usize) -> String {
    format!("{} failed ({})", candidate, standing(best, skipped))
}

fn standing(best: Option<f64>, skipped: usize) -> String {
    match best {
        Some(best) => format!("best {:.4}, {} skipped", best, skipped),
        None => format!("{} skipped", skipped),
    }
}

fn summary_tail(summary: &SearchSummary) -> String {
    let mut tail = format!("{} steps, {} skipped", summary.steps, summary.skipped);
    if let Some(best) = summary.best {
        tail.push_str(&format!(", best {:.4}", best));
    }
    tail
}

/// `1.23s` above a second, `123ms` below.
fn format_duration(d: Duration) -> String {
    if d.as_secs() > 0 {
        format!("{:.2}s", d.as_secs_f64())
    } else {
        format!("{}ms", d.as_millis())
    }
}
