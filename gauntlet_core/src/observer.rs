use crate::outcome::Outcome;
use std::any::Any;
use std::time::Duration;

/// Running counts for the (target, corpus) pair currently being fuzzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress<'a> {
    pub target: &'a str,
    pub corpus: &'a str,
    pub processed: usize,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

/// Run boundaries reported to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FuzzEvent<'a> {
    TargetStarted {
        target: &'a str,
        arity: usize,
        corpora: usize,
    },
    CorpusStarted {
        target: &'a str,
        corpus: &'a str,
        inputs: usize,
    },
    CorpusFinished {
        target: &'a str,
        corpus: &'a str,
        passed: usize,
        failed: usize,
        elapsed: Duration,
    },
    TargetFinished {
        target: &'a str,
        total: usize,
        passed: usize,
        failed: usize,
    },
}

/// An `Observer` watches a fuzzing run without taking part in it.
///
/// The runner calls [`Observer::on_progress`] after every processed item and the
/// orchestrator calls [`Observer::on_event`] at target and corpus boundaries.
/// Neither hook can fail or influence how an outcome is classified; observers
/// are for live reporting and logging only.
pub trait Observer: Send {
    /// Identifies the observer in diagnostics.
    fn name(&self) -> &'static str;

    fn on_event(&mut self, event: &FuzzEvent<'_>);

    /// Called once per item, after its outcome has been counted.
    fn on_progress(&mut self, progress: &Progress<'_>, outcome: &Outcome);

    /// Allows downcasting to the concrete observer once a run is over.
    fn as_any(&self) -> &dyn Any;
}

/// An observer that ignores everything.
#[derive(Default, Debug, Clone, Copy)]
pub struct NoOpObserver;

impl Observer for NoOpObserver {
    fn name(&self) -> &'static str {
        "NoOpObserver"
    }

    fn on_event(&mut self, _event: &FuzzEvent<'_>) {}

    fn on_progress(&mut self, _progress: &Progress<'_>, _outcome: &Outcome) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Forwards run boundaries and failing outcomes to `tracing`.
///
/// Boundaries are logged at `info`, every failing invocation at `debug` and
/// per-item progress at `trace`.
#[derive(Default, Debug, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn name(&self) -> &'static str {
        "TracingObserver"
    }

    fn on_event(&mut self, event: &FuzzEvent<'_>) {
        match event {
            FuzzEvent::TargetStarted {
                target,
                arity,
                corpora,
            } => tracing::info!(fuzz_target = target, arity, corpora, "fuzzing target"),
            FuzzEvent::CorpusStarted {
                target,
                corpus,
                inputs,
            } => tracing::info!(fuzz_target = target, corpus, inputs, "starting corpus"),
            FuzzEvent::CorpusFinished {
                target,
                corpus,
                passed,
                failed,
                elapsed,
            } => tracing::info!(
                fuzz_target = target,
                corpus,
                passed,
                failed,
                elapsed = ?elapsed,
                "finished corpus"
            ),
            FuzzEvent::TargetFinished {
                target,
                total,
                passed,
                failed,
            } => tracing::info!(fuzz_target = target, total, passed, failed, "finished target"),
        }
    }

    fn on_progress(&mut self, progress: &Progress<'_>, outcome: &Outcome) {
        if !outcome.is_pass() {
            let signature = outcome.signature();
            tracing::debug!(
                fuzz_target = progress.target,
                corpus = progress.corpus,
                item = progress.processed - 1,
                input = outcome.input_digest.as_deref().unwrap_or("-"),
                signature = signature.as_deref().unwrap_or("-"),
                "invocation failed"
            );
        }
        tracing::trace!(
            fuzz_target = progress.target,
            corpus = progress.corpus,
            processed = progress.processed,
            total = progress.total,
            passed = progress.passed,
            failed = progress.failed,
            "progress"
        );
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
