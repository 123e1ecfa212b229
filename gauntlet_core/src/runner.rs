use crate::corpus::Corpus;
use crate::invoker::Invoker;
use crate::observer::{Observer, Progress};
use crate::outcome::{ErrorKind, Outcome};
use crate::target::TargetDescriptor;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Lifecycle of a single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvocationState {
    Pending,
    Running,
    Completed,
    Crashed,
    TimedOut,
}

impl InvocationState {
    /// The terminal state an outcome corresponds to.
    pub fn settled(outcome: &Outcome) -> Self {
        match outcome.error_kind {
            Some(ErrorKind::Timeout) => InvocationState::TimedOut,
            Some(ErrorKind::Crash) | Some(ErrorKind::Isolation) => InvocationState::Crashed,
            _ => InvocationState::Completed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvocationState::Pending | InvocationState::Running)
    }
}

/// Everything observed while fuzzing one target with one corpus.
#[derive(Debug, Clone, Serialize)]
pub struct CorpusSummary {
    pub corpus_name: String,
    pub target_name: String,
    pub arity: usize,
    pub total_inputs: usize,
    pub total_pass: usize,
    pub total_fail: usize,
    /// One entry per corpus item, in corpus order.
    pub outcomes: Vec<Outcome>,
    pub elapsed: Duration,
}

impl CorpusSummary {
    fn empty(target: &TargetDescriptor, corpus: &Corpus) -> Self {
        Self {
            corpus_name: corpus.name().to_owned(),
            target_name: target.name().to_owned(),
            arity: target.arity(),
            total_inputs: corpus.len(),
            total_pass: 0,
            total_fail: 0,
            outcomes: Vec::with_capacity(corpus.len()),
            elapsed: Duration::ZERO,
        }
    }

    /// Outcomes that carried an error, whether tolerated or not.
    pub fn errors(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| o.error_kind.is_some())
    }
}

/// Drives one target through one corpus, one invocation at a time.
pub struct FuzzRunner {
    invoker: Box<dyn Invoker>,
    timeout: Duration,
}

impl FuzzRunner {
    pub fn new(invoker: Box<dyn Invoker>, timeout: Duration) -> Self {
        Self { invoker, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn invoker_name(&self) -> &'static str {
        self.invoker.name()
    }

    /// Feeds every item of `corpus` to `target`, in order.
    ///
    /// Each call gets the target's own timeout if it has one, else the
    /// runner's.
    ///
    /// Each item is passed to every parameter of the target. Items are
    /// independent of each other: a crash or timeout on one never affects the
    /// next. Observers hear about each outcome after it has been counted.
    pub fn run(
        &mut self,
        target: &TargetDescriptor,
        corpus: &Corpus,
        observers: &mut [&mut dyn Observer],
    ) -> CorpusSummary {
        let started = Instant::now();
        let timeout = target.timeout().unwrap_or(self.timeout);
        let mut summary = CorpusSummary::empty(target, corpus);

        for (index, item) in corpus.items().iter().enumerate() {
            let args = target.args_for(item);
            let mut state = InvocationState::Pending;
            tracing::trace!(fuzz_target = target.name(), item = index, state = ?state);

            state = InvocationState::Running;
            tracing::trace!(fuzz_target = target.name(), item = index, state = ?state);
            let outcome = self
                .invoker
                .invoke(target, &args, timeout)
                .for_input(item);

            state = InvocationState::settled(&outcome);
            tracing::trace!(
                fuzz_target = target.name(),
                item = index,
                state = ?state,
                elapsed = ?outcome.elapsed
            );

            if outcome.is_pass() {
                summary.total_pass += 1;
            } else {
                summary.total_fail += 1;
            }

            let progress = Progress {
                target: target.name(),
                corpus: corpus.name(),
                processed: index + 1,
                total: summary.total_inputs,
                passed: summary.total_pass,
                failed: summary.total_fail,
            };
            for observer in observers.iter_mut() {
                observer.on_progress(&progress, &outcome);
            }
            summary.outcomes.push(outcome);
        }

        summary.elapsed = started.elapsed();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::ThreadInvoker;
    use crate::observer::tests::RecordingObserver;
    use crate::outcome::Status;
    use crate::target::TargetError;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn runner() -> FuzzRunner {
        FuzzRunner::new(Box::new(ThreadInvoker::new()), Duration::from_secs(5))
    }

    fn picky(input: &str) -> Result<usize, TargetError> {
        match input {
            "" => Err(TargetError::Validation("empty".into())),
            "boom" => Err(TargetError::Other("unexpected boom".into())),
            other => Ok(other.len()),
        }
    }

    #[test]
    fn counts_pass_and_fail_per_item() {
        let target = TargetDescriptor::new("picky", picky).unwrap();
        let corpus = Corpus::new("mixed", strings(&["abc", "", "boom", "de"])).unwrap();

        let summary = runner().run(&target, &corpus, &mut []);
        assert_eq!(summary.corpus_name, "mixed");
        assert_eq!(summary.target_name, "picky");
        assert_eq!(summary.arity, 1);
        assert_eq!(summary.total_inputs, 4);
        assert_eq!(summary.total_pass, 3);
        assert_eq!(summary.total_fail, 1);
        assert_eq!(summary.outcomes.len(), 4);
        assert_eq!(summary.outcomes[2].status, Status::Fail);
        assert_eq!(summary.errors().count(), 2);
        assert!(summary.outcomes.iter().all(|o| o.input_digest.is_some()));
    }

    #[test]
    fn items_are_broadcast_to_every_parameter() {
        let target = TargetDescriptor::new("same", |a: &str, b: &str, c: &str| {
            if a == b && b == c {
                Ok(a.len())
            } else {
                Err(TargetError::Other(format!("{a:?} {b:?} {c:?}")))
            }
        })
        .unwrap();
        let corpus = Corpus::new("c", strings(&["x", "%n%n", ""])).unwrap();

        let summary = runner().run(&target, &corpus, &mut []);
        assert_eq!(summary.arity, 3);
        assert_eq!(summary.total_pass, 3);
        assert_eq!(summary.outcomes[1].result_value.as_deref(), Some("4"));
    }

    #[test]
    fn empty_corpus_produces_an_empty_summary() {
        let target = TargetDescriptor::new("picky", picky).unwrap();
        let corpus = Corpus::new("nothing", Vec::new()).unwrap();
        let mut recorder = RecordingObserver::default();

        let summary = runner().run(&target, &corpus, &mut [&mut recorder]);
        assert_eq!(summary.total_inputs, 0);
        assert_eq!(summary.total_pass + summary.total_fail, 0);
        assert!(summary.outcomes.is_empty());
        assert!(recorder.progress.is_empty());
    }

    #[test]
    fn observers_see_running_counts_in_order() {
        let target = TargetDescriptor::new("picky", picky).unwrap();
        let corpus = Corpus::new("mixed", strings(&["boom", "a", "boom"])).unwrap();
        let mut first = RecordingObserver::default();
        let mut second = RecordingObserver::default();

        runner().run(&target, &corpus, &mut [&mut first, &mut second]);
        let expected = vec![(1, 0, 1), (2, 1, 1), (3, 1, 2)];
        assert_eq!(first.progress, expected);
        assert_eq!(second.progress, expected);
    }

    #[test]
    fn invocation_states_follow_the_outcome() {
        assert_eq!(
            InvocationState::settled(&Outcome::pass("1".into())),
            InvocationState::Completed
        );
        assert_eq!(
            InvocationState::settled(&Outcome::fail(ErrorKind::Unexpected, "x")),
            InvocationState::Completed
        );
        assert_eq!(
            InvocationState::settled(&Outcome::timeout(Duration::from_secs(1))),
            InvocationState::TimedOut
        );
        assert_eq!(
            InvocationState::settled(&Outcome::fail(ErrorKind::Crash, "SIGSEGV")),
            InvocationState::Crashed
        );
        assert!(!InvocationState::Running.is_terminal());
        assert!(InvocationState::Crashed.is_terminal());
    }

    fn slow_echo(input: &str) -> Result<String, TargetError> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(input.to_owned())
    }

    #[test]
    fn target_timeout_overrides_the_runner_default() {
        let corpus = Corpus::new("one", strings(&["x"])).unwrap();
        let mut runner = runner();
        assert_eq!(runner.timeout(), Duration::from_secs(5));

        let strict = TargetDescriptor::new("slow_echo", slow_echo)
            .unwrap()
            .with_timeout(Duration::from_millis(50));
        assert_eq!(strict.timeout(), Some(Duration::from_millis(50)));
        let summary = runner.run(&strict, &corpus, &mut []);
        assert_eq!(summary.total_fail, 1);
        assert_eq!(summary.outcomes[0].error_kind, Some(ErrorKind::Timeout));
        assert!(summary.outcomes[0].elapsed < Duration::from_millis(300));

        let lenient = TargetDescriptor::new("slow_echo", slow_echo).unwrap();
        assert_eq!(lenient.timeout(), None);
        let summary = runner.run(&lenient, &corpus, &mut []);
        assert_eq!(summary.total_pass, 1);
        assert_eq!(summary.outcomes[0].result_value.as_deref(), Some("\"x\""));
    }
}
