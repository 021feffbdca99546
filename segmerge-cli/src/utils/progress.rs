use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

fn percent_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {msg}\n[{elapsed_precise}] [{bar:40.green/white}] {pos:>3}%")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// One percent bar per request of a batch.
#[derive(Clone)]
pub struct ProgressManager {
    bars: Vec<ProgressBar>,
    disabled: bool,
}

impl ProgressManager {
    pub fn new(multi: &MultiProgress, labels: &[String]) -> Self {
        let bars = labels
            .iter()
            .map(|label| {
                let bar = multi.add(ProgressBar::new(100));
                bar.set_style(percent_style());
                bar.set_message(label.clone());
                bar.enable_steady_tick(Duration::from_millis(500));
                bar
            })
            .collect();

        Self {
            bars,
            disabled: false,
        }
    }

    pub fn new_disabled() -> Self {
        Self {
            bars: Vec::new(),
            disabled: true,
        }
    }

    /// Percentages only go backwards when a fallback URL restarts the request.
    pub fn update(&self, index: usize, percent: u8) {
        if self.disabled {
            return;
        }
        if let Some(bar) = self.bars.get(index) {
            bar.set_position(u64::from(percent.min(100)));
        }
    }

    pub fn finish(&self, index: usize, message: String) {
        if let Some(bar) = self.bars.get(index) {
            bar.finish_with_message(message);
        }
    }

    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }
}
