use gauntlet_core::{FuzzEvent, Observer, Outcome, Progress};
use std::any::Any;
use std::io::{self, Write};
use std::time::Instant;

/// Keeps a single status line updated on stderr while a corpus runs.
pub struct ConsoleObserver {
    started: Instant,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    fn status_line(&self, progress: &Progress<'_>) -> String {
        let elapsed = self.started.elapsed().as_secs_f32();
        let execs_per_sec = if elapsed > 0.0 {
            progress.processed as f32 / elapsed
        } else {
            0.0
        };
        format!(
            "\r{} / {}: {}/{}, Passed: {}, Failed: {}, Execs/sec: {:.2}   ",
            progress.target,
            progress.corpus,
            progress.processed,
            progress.total,
            progress.passed,
            progress.failed,
            execs_per_sec
        )
    }
}

impl Default for ConsoleObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl Observer for ConsoleObserver {
    fn name(&self) -> &'static str {
        "ConsoleObserver"
    }

    fn on_event(&mut self, event: &FuzzEvent<'_>) {
        match event {
            FuzzEvent::CorpusStarted { .. } => self.started = Instant::now(),
            FuzzEvent::CorpusFinished { .. } => eprintln!(),
            _ => {}
        }
    }

    fn on_progress(&mut self, progress: &Progress<'_>, _outcome: &Outcome) {
        let mut stderr = io::stderr().lock();
        // The status line is cosmetic; a closed stderr must not stop the run.
        stderr.write_all(self.status_line(progress).as_bytes()).ok();
        stderr.flush().ok();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
