pub mod config;
pub mod corpus;
pub mod invoker;
pub mod observer;
pub mod orchestrator;
pub mod outcome;
pub mod report;
pub mod runner;
pub mod target;

pub use config::{ConfigError, FuzzerSettings, GauntletConfig, IsolationKind};
pub use corpus::{Corpus, CorpusError, CorpusRegistry};
#[cfg(unix)]
pub use invoker::ProcessInvoker;
pub use invoker::{Invoker, ProcessInvokerConfig, ThreadInvoker};
pub use observer::{FuzzEvent, NoOpObserver, Observer, Progress, TracingObserver};
pub use orchestrator::{ErrorHistogram, FuzzOrchestrator, RunSummary, RunTotals, TargetTotals};
pub use outcome::{ErrorKind, InvocationReport, Outcome, Status};
pub use report::{ErrorCount, FuzzReport, KindCount, TargetReport};
pub use runner::{CorpusSummary, FuzzRunner, InvocationState};
pub use target::{TargetDescriptor, TargetError, TargetFn};
