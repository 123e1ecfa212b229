use crate::config::ConfigError;
use crate::corpus::CorpusRegistry;
use crate::observer::{FuzzEvent, Observer};
use crate::outcome::{ErrorKind, Outcome};
use crate::runner::{CorpusSummary, FuzzRunner};
use crate::target::TargetDescriptor;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

/// Counts of error signatures and kinds seen across outcomes.
///
/// Every outcome that carries an error is counted, tolerated or not, so the
/// histogram shows what targets rejected as well as what broke them.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorHistogram {
    by_signature: BTreeMap<String, usize>,
    by_kind: BTreeMap<ErrorKind, usize>,
}

impl ErrorHistogram {
    pub fn record(&mut self, outcome: &Outcome) {
        let (Some(kind), Some(signature)) = (outcome.error_kind, outcome.signature()) else {
            return;
        };
        *self.by_signature.entry(signature).or_insert(0) += 1;
        *self.by_kind.entry(kind).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: &ErrorHistogram) {
        for (signature, count) in &other.by_signature {
            *self.by_signature.entry(signature.clone()).or_insert(0) += count;
        }
        for (kind, count) in &other.by_kind {
            *self.by_kind.entry(*kind).or_insert(0) += count;
        }
    }

    /// Signatures by descending count; equal counts are ordered by signature.
    pub fn sorted_desc(&self) -> Vec<(&str, usize)> {
        let mut entries: Vec<(&str, usize)> = self
            .by_signature
            .iter()
            .map(|(signature, count)| (signature.as_str(), *count))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        entries
    }

    /// Kinds by descending count; equal counts keep the kind order.
    pub fn kinds_sorted_desc(&self) -> Vec<(ErrorKind, usize)> {
        let mut entries: Vec<(ErrorKind, usize)> =
            self.by_kind.iter().map(|(kind, count)| (*kind, *count)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }

    pub fn count_of(&self, kind: ErrorKind) -> usize {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }

    pub fn by_kind(&self) -> &BTreeMap<ErrorKind, usize> {
        &self.by_kind
    }

    pub fn is_empty(&self) -> bool {
        self.by_signature.is_empty()
    }

    /// Total number of recorded errors.
    pub fn total(&self) -> usize {
        self.by_kind.values().sum()
    }
}

/// Aggregate of every corpus one target was fuzzed with in a single call.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub target_name: String,
    pub total_fuzzes: usize,
    pub total_pass: usize,
    pub total_fail: usize,
    /// In corpus registration order.
    pub per_corpus: Vec<CorpusSummary>,
    pub errors: ErrorHistogram,
}

impl RunSummary {
    fn new(target_name: &str) -> Self {
        Self {
            target_name: target_name.to_owned(),
            total_fuzzes: 0,
            total_pass: 0,
            total_fail: 0,
            per_corpus: Vec::new(),
            errors: ErrorHistogram::default(),
        }
    }

    fn absorb(&mut self, summary: CorpusSummary) {
        self.total_fuzzes += summary.total_inputs;
        self.total_pass += summary.total_pass;
        self.total_fail += summary.total_fail;
        for outcome in summary.errors() {
            self.errors.record(outcome);
        }
        self.per_corpus.push(summary);
    }
}

/// Lifetime counters for one target across every call that fuzzed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetTotals {
    pub name: String,
    pub total_run: usize,
    pub total_pass: usize,
    pub total_fail: usize,
    pub errors: ErrorHistogram,
}

impl TargetTotals {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            total_run: 0,
            total_pass: 0,
            total_fail: 0,
            errors: ErrorHistogram::default(),
        }
    }

    fn record(&mut self, run: &RunSummary) {
        self.total_run += run.total_fuzzes;
        self.total_pass += run.total_pass;
        self.total_fail += run.total_fail;
        self.errors.merge(&run.errors);
    }
}

/// Lifetime counters across every call on one orchestrator. Only ever grow.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub total_fuzzes_run: usize,
    pub total_fuzzes_passed: usize,
    pub total_fuzzes_failed: usize,
    pub errors: ErrorHistogram,
}

impl RunTotals {
    fn record(&mut self, run: &RunSummary) {
        self.total_fuzzes_run += run.total_fuzzes;
        self.total_fuzzes_passed += run.total_pass;
        self.total_fuzzes_failed += run.total_fail;
        self.errors.merge(&run.errors);
    }
}

/// Fuzzes targets against every registered corpus and keeps score.
pub struct FuzzOrchestrator {
    registry: CorpusRegistry,
    runner: FuzzRunner,
    observers: Vec<Box<dyn Observer>>,
    totals: RunTotals,
    per_target: Vec<TargetTotals>,
    target_slots: HashMap<String, usize>,
}

impl FuzzOrchestrator {
    pub fn new(registry: CorpusRegistry, runner: FuzzRunner) -> Self {
        Self {
            registry,
            runner,
            observers: Vec::new(),
            totals: RunTotals::default(),
            per_target: Vec::new(),
            target_slots: HashMap::new(),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn Observer>) -> Self {
        self.add_observer(observer);
        self
    }

    pub fn add_observer(&mut self, observer: Box<dyn Observer>) {
        tracing::debug!(observer = observer.name(), "observer attached");
        self.observers.push(observer);
    }

    pub fn observers(&self) -> &[Box<dyn Observer>] {
        &self.observers
    }

    pub fn registry(&self) -> &CorpusRegistry {
        &self.registry
    }

    /// Corpora registered here are picked up by the next run.
    pub fn registry_mut(&mut self) -> &mut CorpusRegistry {
        &mut self.registry
    }

    pub fn runner(&self) -> &FuzzRunner {
        &self.runner
    }

    /// Fuzzes each target against every registered corpus, in the order given.
    ///
    /// Target names must be unique within one call; a duplicate is rejected
    /// before anything runs. Every other problem is recorded as an outcome.
    pub fn run_all(
        &mut self,
        targets: &[TargetDescriptor],
    ) -> Result<Vec<RunSummary>, ConfigError> {
        let mut seen = HashSet::new();
        for target in targets {
            if !seen.insert(target.name()) {
                return Err(ConfigError::DuplicateTarget(target.name().to_owned()));
            }
        }

        tracing::info!(
            targets = targets.len(),
            corpora = self.registry.len(),
            invoker = self.runner.invoker_name(),
            timeout = ?self.runner.timeout(),
            "starting fuzzing run"
        );
        Ok(targets.iter().map(|target| self.run_target(target)).collect())
    }

    /// Fuzzes a single target against every registered corpus.
    pub fn run_target(&mut self, target: &TargetDescriptor) -> RunSummary {
        let started = Instant::now();
        let mut run = RunSummary::new(target.name());
        let mut observers: Vec<&mut dyn Observer> = self
            .observers
            .iter_mut()
            .map(|o| &mut **o as &mut dyn Observer)
            .collect();

        notify(
            &mut observers,
            &FuzzEvent::TargetStarted {
                target: target.name(),
                arity: target.arity(),
                corpora: self.registry.len(),
            },
        );

        for corpus in self.registry.all() {
            notify(
                &mut observers,
                &FuzzEvent::CorpusStarted {
                    target: target.name(),
                    corpus: corpus.name(),
                    inputs: corpus.len(),
                },
            );
            let summary = self.runner.run(target, corpus, &mut observers);
            notify(
                &mut observers,
                &FuzzEvent::CorpusFinished {
                    target: target.name(),
                    corpus: corpus.name(),
                    passed: summary.total_pass,
                    failed: summary.total_fail,
                    elapsed: summary.elapsed,
                },
            );
            run.absorb(summary);
        }

        notify(
            &mut observers,
            &FuzzEvent::TargetFinished {
                target: target.name(),
                total: run.total_fuzzes,
                passed: run.total_pass,
                failed: run.total_fail,
            },
        );
        drop(observers);

        self.totals.record(&run);
        let slot = match self.target_slots.get(target.name()) {
            Some(&slot) => slot,
            None => {
                let slot = self.per_target.len();
                self.per_target.push(TargetTotals::new(target.name()));
                self.target_slots.insert(target.name().to_owned(), slot);
                slot
            }
        };
        self.per_target[slot].record(&run);

        tracing::debug!(
            fuzz_target = target.name(),
            total = run.total_fuzzes,
            failed = run.total_fail,
            elapsed = ?started.elapsed(),
            "target run recorded"
        );
        run
    }

    pub fn totals(&self) -> &RunTotals {
        &self.totals
    }

    /// Lifetime counters per target, in the order targets were first fuzzed.
    pub fn target_totals(&self) -> &[TargetTotals] {
        &self.per_target
    }

    pub fn total_fuzzes_run(&self) -> usize {
        self.totals.total_fuzzes_run
    }

    pub fn total_fuzzes_passed(&self) -> usize {
        self.totals.total_fuzzes_passed
    }

    pub fn total_fuzzes_failed(&self) -> usize {
        self.totals.total_fuzzes_failed
    }
}

fn notify(observers: &mut [&mut dyn Observer], event: &FuzzEvent<'_>) {
    for observer in observers.iter_mut() {
        observer.on_event(event);
    }
}
