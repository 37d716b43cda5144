use std::sync::atomic::{AtomicUsize, Ordering};

use courier_core::TransferState;
use courier_progress::{InvalidationObserver, ProgressView};
use indicatif::{ProgressBar, ProgressStyle};

/// Resolution of the terminal bar; visual progress is a 0-1 float
const BAR_STEPS: u64 = 1000;

/// Redraws a terminal progress bar whenever the controller invalidates
pub struct BarObserver {
    bar: ProgressBar,
    redraws: AtomicUsize,
}

impl BarObserver {
    pub fn new(visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(BAR_STEPS)
        } else {
            ProgressBar::hidden()
        };
        let style = ProgressStyle::with_template(
            "[{elapsed_precise}] {bar:40.cyan/blue} {percent:>3}% {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        Self {
            bar,
            redraws: AtomicUsize::new(0),
        }
    }

    pub fn redraws(&self) -> usize {
        self.redraws.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(&self) {
        if !self.bar.is_finished() {
            self.bar.abandon();
        }
    }
}

fn describe(view: &ProgressView) -> String {
    let mut message = view.state.to_string();
    if view.failure_count > 0 {
        message.push_str(&format!(" (failures: {})", view.failure_count));
    }
    if view.streamed > 0.0 && view.state != TransferState::Completed {
        message.push_str(&format!(" | streamable {:.0}%", view.streamed * 100.0));
    }
    if view.playing {
        message.push_str(" | playing");
    }
    message
}

impl InvalidationObserver for BarObserver {
    fn on_invalidate(&self, view: &ProgressView) {
        self.redraws.fetch_add(1, Ordering::Relaxed);
        self.bar
            .set_position((view.visual * BAR_STEPS as f32).round() as u64);
        let message = describe(view);
        if view.state == TransferState::Completed {
            self.bar.finish_with_message(message);
        } else {
            self.bar.set_message(message);
        }
    }
}
