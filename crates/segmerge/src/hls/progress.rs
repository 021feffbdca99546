// Progress reporting: maps per-phase completion counts onto a single
// throttled, non-decreasing percentage.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Receives a percentage in `0..=100`.
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

pub const PARSED: u8 = 20;
pub const DOWNLOAD_END: u8 = 60;
pub const DECRYPT_END: u8 = 90;
pub const REMUXING: u8 = 95;
pub const FINISHED: u8 = 100;

struct State {
    last: u8,
    finished: bool,
}

pub struct ProgressAggregator {
    callback: Option<ProgressCallback>,
    batch_size: usize,
    state: Mutex<State>,
}

impl ProgressAggregator {
    pub fn new(callback: Option<ProgressCallback>, batch_size: usize) -> Self {
        Self {
            callback,
            batch_size: batch_size.max(1),
            state: Mutex::new(State {
                last: 0,
                finished: false,
            }),
        }
    }

    pub fn current(&self) -> u8 {
        self.state.lock().last
    }

    /// Reports `percent` if it moves the stream forward. Values at or above
    /// 100 are held back for [`finish`](Self::finish).
    pub fn report(&self, percent: u8) {
        let percent = percent.min(FINISHED - 1);
        // The lock is held across the callback so reports cannot overtake
        // each other.
        let mut state = self.state.lock();
        if state.finished || percent <= state.last {
            return;
        }
        state.last = percent;
        if let Some(callback) = &self.callback {
            callback(percent);
        }
    }

    /// Emits 100, once.
    pub fn finish(&self) {
        let mut state = self.state.lock();
        if state.finished {
            return;
        }
        state.finished = true;
        state.last = FINISHED;
        if let Some(callback) = &self.callback {
            callback(FINISHED);
        }
    }

    /// Starts the stream over at 0, used before trying a fallback playlist.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.last = 0;
        state.finished = false;
        if let Some(callback) = &self.callback {
            callback(0);
        }
    }

    /// Tracker for a phase mapping `total` completions onto `start..end`.
    pub fn phase(self: &Arc<Self>, start: u8, end: u8, total: usize) -> PhaseProgress {
        PhaseProgress {
            aggregator: Arc::clone(self),
            start,
            end: end.max(start),
            total: total.max(1),
            done: AtomicUsize::new(0),
        }
    }
}

pub struct PhaseProgress {
    aggregator: Arc<ProgressAggregator>,
    start: u8,
    end: u8,
    total: usize,
    done: AtomicUsize,
}

impl PhaseProgress {
    /// Counts one completed unit, reporting every `batch_size` completions
    /// and on the last one.
    pub fn complete_one(&self) {
        let done = self.done.fetch_add(1, Ordering::AcqRel) + 1;
        if done % self.aggregator.batch_size == 0 || done >= self.total {
            let span = usize::from(self.end - self.start);
            let offset = span * done.min(self.total) / self.total;
            self.aggregator.report(self.start + offset as u8);
        }
    }

    pub fn completed(&self) -> usize {
        self.done.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(batch_size: usize) -> (Arc<ProgressAggregator>, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |p| sink.lock().push(p));
        (
            Arc::new(ProgressAggregator::new(Some(callback), batch_size)),
            seen,
        )
    }

    #[test]
    fn test_phase_reports_are_batched() {
        let (progress, seen) = recording(5);
        progress.report(PARSED);
        let phase = progress.phase(PARSED, DOWNLOAD_END, 12);
        for _ in 0..12 {
            phase.complete_one();
        }
        assert_eq!(phase.completed(), 12);
        // 20 + 40*5/12, 20 + 40*10/12, and the final 60
        assert_eq!(*seen.lock(), vec![20, 36, 53, 60]);
    }

    #[test]
    fn test_values_never_decrease_and_finish_once() {
        let (progress, seen) = recording(1);
        progress.report(40);
        progress.report(30);
        progress.report(40);
        progress.report(150);
        progress.finish();
        progress.finish();
        progress.report(50);

        assert_eq!(*seen.lock(), vec![40, 99, 100]);
        assert_eq!(progress.current(), 100);
    }

    #[test]
    fn test_reset_restarts_the_stream() {
        let (progress, seen) = recording(1);
        progress.report(60);
        progress.reset();
        progress.report(20);
        progress.finish();
        assert_eq!(*seen.lock(), vec![60, 0, 20, 100]);
    }

    #[test]
    fn test_without_callback() {
        let progress = Arc::new(ProgressAggregator::new(None, 0));
        progress.phase(60, 90, 0).complete_one();
        assert_eq!(progress.current(), 90);
    }
}
