use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};

use super::board::SpectrumBoard;
use super::mailbox::Mailbox;
use super::spectrum::SpectrumAnalyzer;
use super::AnalyzerOptions;
use crate::attribute::AudioFrame;
use crate::error::EngineError;
use crate::fault::{self, FaultSite};

/// How long the worker sleeps when the mailbox is empty.
pub(crate) const IDLE_WAIT: Duration = Duration::from_millis(10);

/// A running analysis thread.
///
/// Stopping is cooperative: the thread checks its flag once per loop iteration. The
/// thread drops its end of `done` on the way out, which is what [`Worker::stop`] waits for.
pub(crate) struct Worker {
    running: Arc<AtomicBool>,
    done: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(
        series: String,
        options: AnalyzerOptions,
        mailbox: Arc<Mailbox<Arc<AudioFrame>>>,
        board: SpectrumBoard,
    ) -> Result<Self, EngineError> {
        let running = Arc::new(AtomicBool::new(true));
        let (done_tx, done) = bounded::<()>(1);

        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name(format!("nodedsp-analyzer-{series}"))
            .spawn(move || {
                let _done = done_tx;
                run(&series, options, &mailbox, &board, &flag);
            })?;

        Ok(Self {
            running,
            done,
            handle: Some(handle),
        })
    }

    /// Ask the thread to exit and wait up to `timeout` for it.
    ///
    /// Returns `false` if the thread did not finish in time; it is detached in that case.
    pub fn stop(mut self, timeout: Duration) -> bool {
        self.running.store(false, Ordering::Release);
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(?timeout, "analyzer worker did not stop in time, detaching");
                self.handle.take();
                false
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

fn run(series: &str, options: AnalyzerOptions, mailbox: &Mailbox<Arc<AudioFrame>>, board: &SpectrumBoard, running: &AtomicBool) {
    tracing::info!(series, "analyzer worker started");
    let mut analyzer = SpectrumAnalyzer::new(options.buffer_duration, options.smoothing);

    while running.load(Ordering::Acquire) {
        if !step(series, &mut analyzer, mailbox, board, running) {
            thread::sleep(IDLE_WAIT);
        }
    }

    tracing::info!(series, "analyzer worker stopped");
}

/// Claim at most one frame and run one pass over it. Returns `false` if the mailbox was empty.
///
/// Nothing is published once `running` is cleared, so a worker detached by a timed-out
/// stop cannot bring back a series its node already removed.
pub(super) fn step(
    series: &str,
    analyzer: &mut SpectrumAnalyzer,
    mailbox: &Mailbox<Arc<AudioFrame>>,
    board: &SpectrumBoard,
    running: &AtomicBool,
) -> bool {
    let Some(frame) = mailbox.claim() else {
        return false;
    };

    let pass = panic::catch_unwind(AssertUnwindSafe(|| {
        analyzer.push(&frame);
        if analyzer.is_ready() {
            analyzer.analyze().map(Some)
        } else {
            Ok(None)
        }
    }));

    match pass {
        Ok(Ok(Some(spectrum))) => {
            if running.load(Ordering::Acquire) {
                board.publish(series, spectrum);
            } else {
                tracing::debug!(series, "worker stopping, spectrum discarded");
            }
        }
        Ok(Ok(None)) => {}
        Ok(Err(err)) => fault::absorb(FaultSite::AnalysisPass { series }, &err),
        Err(payload) => {
            let message = fault::panic_message(payload.as_ref());
            fault::absorb(FaultSite::AnalysisPass { series }, &message);
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(len: usize) -> Arc<AudioFrame> {
        Arc::new(AudioFrame::new(vec![0.25; len], 48_000, len))
    }

    #[test]
    fn empty_mailbox_is_not_a_pass() {
        let mut analyzer = SpectrumAnalyzer::new(0.01, 0.0);
        let mailbox = Mailbox::new();
        let board = SpectrumBoard::new();

        assert!(!step("fft#0", &mut analyzer, &mailbox, &board, &AtomicBool::new(true)));
        assert_eq!(analyzer.buffered(), 0);
    }

    #[test]
    fn publishes_while_running() {
        let mut analyzer = SpectrumAnalyzer::new(0.01, 0.0);
        let mailbox = Mailbox::new();
        let board = SpectrumBoard::new();

        mailbox.deposit(frame(1024));
        assert!(step("fft#0", &mut analyzer, &mailbox, &board, &AtomicBool::new(true)));
        assert!(board.latest("fft#0").is_some());
    }

    #[test]
    fn stopped_worker_does_not_republish_a_removed_series() {
        let mut analyzer = SpectrumAnalyzer::new(0.01, 0.0);
        let mailbox = Mailbox::new();
        let board = SpectrumBoard::new();
        let running = AtomicBool::new(true);

        mailbox.deposit(frame(1024));
        step("fft#0", &mut analyzer, &mailbox, &board, &running);
        assert!(board.remove("fft#0").is_some());

        // teardown cleared the flag and removed the series while a pass was in flight
        running.store(false, Ordering::Release);
        mailbox.deposit(frame(1024));
        assert!(step("fft#0", &mut analyzer, &mailbox, &board, &running));
        assert!(board.latest("fft#0").is_none());
        assert!(board.keys().is_empty());
    }
}
