//! Terminal progress for a run: position, throughput and ETA.
//!
//! The total is an estimate when streaming. Once more records finish than
//! expected, the total follows the position.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::debug;

const TEMPLATE: &str =
    "[{elapsed_precise}] {bar:30.cyan/blue} {pos}/{len} ({percent}%) | {per_sec} | ETA: {eta}";

/// Progress of the records of one run. Cheap to clone; clones share one bar.
#[derive(Clone)]
pub struct RunProgress {
    bar: ProgressBar,
}

impl RunProgress {
    /// A bar on stderr, or a hidden one that only counts when `visible` is false.
    pub fn new(total: u64, visible: bool) -> Self {
        let target = if visible {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(total), target);
        match ProgressStyle::default_bar().template(TEMPLATE) {
            Ok(style) => bar.set_style(style.progress_chars("█▓░")),
            Err(e) => debug!("[PROGRESS] keeping the default style: {}", e),
        }
        Self { bar }
    }

    pub fn hidden() -> Self {
        Self::new(0, false)
    }

    /// Counts one finished record.
    pub fn inc(&self) {
        let position = self.bar.position() + 1;
        if self.bar.length().is_some_and(|total| position > total) {
            self.bar.set_length(position);
        }
        self.bar.set_position(position);
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn total(&self) -> u64 {
        self.bar.length().unwrap_or(0)
    }

    /// Runs `f` with the bar cleared so log lines are not drawn over it.
    pub fn suspend<R>(&self, f: impl FnOnce() -> R) -> R {
        self.bar.suspend(f)
    }

    /// Stops the bar at the number of records that actually finished.
    pub fn finish(&self) {
        self.bar.set_length(self.bar.position());
        self.bar.finish();
    }
}
