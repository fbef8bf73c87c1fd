//! Progress reporting for matching runs and index builds.
//!
//! Interactive runs get an indicatif bar per phase. With `--log-only` the
//! bars are hidden and each phase instead logs a line every 5% plus one on
//! completion, which reads well in `tail -f`.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

static LOG_ONLY: AtomicBool = AtomicBool::new(false);

/// Log lines per phase in log-only mode.
const LOG_STEPS: u64 = 20;

pub fn set_log_only(value: bool) {
    LOG_ONLY.store(value, Ordering::Relaxed);
}

pub fn is_log_only() -> bool {
    LOG_ONLY.load(Ordering::Relaxed)
}

/// "1.5s" below a minute, "2.3m" above.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}

/// One named phase of work: "Beatles Mix" while matching a playlist,
/// "Writing index" during `import-index`.
pub struct PhaseProgress {
    bar: ProgressBar,
    phase: String,
    total: u64,
    log_every: u64,
}

impl PhaseProgress {
    /// Counted phase over `total` items.
    pub fn bar(phase: &str, total: u64) -> Self {
        let bar = ProgressBar::new(total);
        if is_log_only() {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        } else {
            let style = ProgressStyle::default_bar()
                .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, ETA: {eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> ");
            bar.set_style(style);
        }
        bar.set_message(phase.to_string());
        Self {
            bar,
            phase: phase.to_string(),
            total,
            log_every: (total / LOG_STEPS).max(1),
        }
    }

    /// Phase of unknown length (FTS rebuild).
    pub fn spinner(phase: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        if is_log_only() {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        } else {
            let style = ProgressStyle::default_spinner()
                .template("{msg} {spinner} [{elapsed_precise}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            bar.set_style(style);
            bar.enable_steady_tick(Duration::from_millis(100));
        }
        bar.set_message(phase.to_string());
        Self {
            bar,
            phase: phase.to_string(),
            total: 0,
            log_every: 1,
        }
    }

    /// One item done. Safe to call from rayon workers.
    pub fn tick(&self) {
        self.bar.inc(1);
        let done = self.bar.position();
        if is_log_only() && self.should_log(done) {
            let pct = 100.0 * done as f64 / self.total as f64;
            info!("[{}] {}/{} ({:.1}%)", self.phase, done, self.total, pct);
        }
    }

    fn should_log(&self, done: u64) -> bool {
        self.total > 0 && (done % self.log_every == 0 || done == self.total)
    }

    pub fn finish(&self, message: String) {
        if is_log_only() {
            info!("[{}] {} in {}", self.phase, message, format_duration(self.bar.elapsed()));
        }
        self.bar.finish_with_message(message);
    }
}
