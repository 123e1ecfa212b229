use crate::config::{FuzzerSettings, IsolationKind};
use crate::outcome::{ErrorKind, InvocationReport, Outcome};
use crate::target::TargetDescriptor;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// Runs a single invocation of a target behind some isolation boundary.
///
/// Implementations must never panic or return early with an error: every
/// failure mode, including the harness failing to isolate the call, comes back
/// as a `FAIL` outcome so one bad input cannot abort a run.
pub trait Invoker {
    fn name(&self) -> &'static str;

    fn invoke(&mut self, target: &TargetDescriptor, args: &[String], timeout: Duration) -> Outcome;
}

/// Builds the invoker the settings ask for.
pub fn from_settings(settings: &FuzzerSettings) -> Box<dyn Invoker> {
    match settings.isolation {
        #[cfg(unix)]
        IsolationKind::Process => Box::new(ProcessInvoker::new(ProcessInvokerConfig {
            scoped_workdir: settings.scoped_workdir,
            ..ProcessInvokerConfig::default()
        })),
        #[cfg(not(unix))]
        IsolationKind::Process => {
            tracing::warn!("process isolation needs fork(); falling back to thread isolation");
            Box::new(ThreadInvoker::new())
        }
        IsolationKind::Thread => {
            if settings.scoped_workdir {
                tracing::warn!("thread isolation cannot scope the working directory; ignoring");
            }
            Box::new(ThreadInvoker::new())
        }
    }
}

fn run_guarded(target: &TargetDescriptor, args: &[String]) -> InvocationReport {
    match catch_unwind(AssertUnwindSafe(|| target.call(args))) {
        Ok(result) => InvocationReport::from_result(result),
        Err(panic_payload) => InvocationReport::from_panic(panic_payload.as_ref()),
    }
}

/// Runs each invocation on a fresh thread inside the harness process.
///
/// Panics are contained and the deadline is enforced, but a hung call cannot be
/// killed: its thread is abandoned and keeps running in the background. Native
/// crashes (aborts, segfaults) take the whole harness down. Use
/// [`ProcessInvoker`] wherever `fork` is available.
#[derive(Debug, Default)]
pub struct ThreadInvoker {
    abandoned: usize,
}

impl ThreadInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timed-out calls whose threads are still out there.
    pub fn abandoned(&self) -> usize {
        self.abandoned
    }
}

impl Invoker for ThreadInvoker {
    fn name(&self) -> &'static str {
        "thread"
    }

    fn invoke(&mut self, target: &TargetDescriptor, args: &[String], timeout: Duration) -> Outcome {
        let started = Instant::now();
        let (result_tx, result_rx) = mpsc::sync_channel(1);
        let worker_target = target.clone();
        let worker_args = args.to_vec();

        let spawned = thread::Builder::new()
            .name("gauntlet-worker".into())
            .spawn(move || {
                let report = run_guarded(&worker_target, &worker_args);
                let _ = result_tx.send(report);
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                return Outcome::fail(
                    ErrorKind::Isolation,
                    format!("Failed to spawn worker thread: {e}"),
                )
                .with_elapsed(started.elapsed());
            }
        };

        let outcome = match result_rx.recv_timeout(timeout) {
            Ok(report) => {
                let _ = handle.join();
                Outcome::classify(report, target.tolerated())
            }
            Err(RecvTimeoutError::Timeout) => {
                self.abandoned += 1;
                tracing::warn!(
                    fuzz_target = target.name(),
                    abandoned = self.abandoned,
                    "worker thread timed out and was abandoned"
                );
                Outcome::timeout(timeout)
            }
            Err(RecvTimeoutError::Disconnected) => Outcome::fail(
                ErrorKind::Crash,
                "Worker thread exited without reporting a result",
            ),
        };
        outcome.with_elapsed(started.elapsed())
    }
}

#[derive(Debug, Clone)]
pub struct ProcessInvokerConfig {
    /// Run every call inside a throwaway working directory.
    pub scoped_workdir: bool,
    /// How long the parent sleeps between checks on the child.
    pub poll_interval: Duration,
}

impl Default for ProcessInvokerConfig {
    fn default() -> Self {
        Self {
            scoped_workdir: true,
            poll_interval: Duration::from_millis(2),
        }
    }
}

#[cfg(unix)]
pub use self::process::ProcessInvoker;

#[cfg(unix)]
mod process {
    use super::{Invoker, ProcessInvokerConfig, run_guarded};
    use crate::outcome::{ErrorKind, InvocationReport, Outcome};
    use crate::target::TargetDescriptor;
    use nix::errno::Errno;
    use nix::fcntl::{FcntlArg, OFlag, fcntl};
    use nix::sys::signal::{Signal, kill, killpg};
    use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
    use nix::unistd::{self, ForkResult, Pid};
    use std::fs::File;
    use std::io::{self, Read, Write};
    use std::os::fd::{AsRawFd, OwnedFd};
    use std::path::Path;
    use std::thread;
    use std::time::{Duration, Instant};

    const CHILD_REPORT_FAILED: i32 = 120;
    const CHILD_SETUP_FAILED: i32 = 121;

    #[derive(Debug)]
    enum ChildExit {
        Exited(i32),
        Signaled(Signal),
        TimedOut,
        WaitFailed(Errno),
    }

    /// Runs each invocation in a forked child process.
    ///
    /// The child gets its own process group, optionally a scratch working
    /// directory, and a pipe it writes its `InvocationReport` to exactly once.
    /// The parent polls the child and the pipe until the child exits or the
    /// deadline passes, in which case the whole process group is killed.
    ///
    /// The child is a fork of a possibly multi-threaded harness. Only the calling
    /// thread survives the fork, so a target that needs a lock some other harness
    /// thread held at fork time will hang and be reported as a timeout.
    #[derive(Debug, Default)]
    pub struct ProcessInvoker {
        config: ProcessInvokerConfig,
    }

    impl ProcessInvoker {
        pub fn new(config: ProcessInvokerConfig) -> Self {
            Self { config }
        }

        fn invoke_in(
            &self,
            target: &TargetDescriptor,
            args: &[String],
            timeout: Duration,
            workdir: Option<&Path>,
        ) -> Outcome {
            let (read_fd, write_fd) = match unistd::pipe() {
                Ok(fds) => fds,
                Err(e) => {
                    return Outcome::fail(
                        ErrorKind::Isolation,
                        format!("Failed to create result pipe: {e}"),
                    );
                }
            };
            if let Err(e) = fcntl(read_fd.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK)) {
                return Outcome::fail(
                    ErrorKind::Isolation,
                    format!("Failed to make result pipe non-blocking: {e}"),
                );
            }

            // SAFETY: the child only runs the target, writes one report to the
            // pipe and leaves through `_exit`, never returning into the caller's
            // stack or running the parent's exit handlers.
            match unsafe { unistd::fork() } {
                Err(e) => Outcome::fail(
                    ErrorKind::Isolation,
                    format!("Failed to fork isolated process: {e}"),
                ),
                Ok(ForkResult::Child) => {
                    drop(read_fd);
                    let code = child_main(target, args, workdir, write_fd);
                    // SAFETY: `_exit` is async-signal-safe and skips stdio flushing,
                    // so buffers inherited from the parent are not written twice.
                    unsafe { nix::libc::_exit(code) }
                }
                Ok(ForkResult::Parent { child }) => {
                    drop(write_fd);
                    let mut channel = File::from(read_fd);
                    let mut received = Vec::new();
                    let exit = self.wait_with_timeout(child, &mut channel, &mut received, timeout);
                    if let Err(e) = drain(&mut channel, &mut received) {
                        tracing::debug!(error = %e, "failed to drain result pipe");
                    }
                    tracing::debug!(
                        fuzz_target = target.name(),
                        pid = child.as_raw(),
                        exit = ?exit,
                        report_bytes = received.len(),
                        "isolated invocation finished"
                    );
                    conclude(exit, &received, target, timeout)
                }
            }
        }

        fn wait_with_timeout(
            &self,
            child: Pid,
            channel: &mut File,
            received: &mut Vec<u8>,
            timeout: Duration,
        ) -> ChildExit {
            let start_time = Instant::now();

            loop {
                if let Err(e) = drain(channel, received) {
                    tracing::debug!(error = %e, "failed to read from result pipe");
                }
                match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
                    Ok(WaitStatus::Exited(_, code)) => return ChildExit::Exited(code),
                    Ok(WaitStatus::Signaled(_, signal, _)) => return ChildExit::Signaled(signal),
                    Ok(_) => {
                        if start_time.elapsed() >= timeout {
                            terminate(child);
                            return ChildExit::TimedOut;
                        }
                        thread::sleep(self.config.poll_interval);
                    }
                    Err(Errno::EINTR) => continue,
                    Err(e) => {
                        terminate(child);
                        return ChildExit::WaitFailed(e);
                    }
                }
            }
        }
    }

    impl Invoker for ProcessInvoker {
        fn name(&self) -> &'static str {
            "process"
        }

        fn invoke(
            &mut self,
            target: &TargetDescriptor,
            args: &[String],
            timeout: Duration,
        ) -> Outcome {
            let started = Instant::now();
            let scratch = if self.config.scoped_workdir {
                match tempfile::Builder::new().prefix("gauntlet-").tempdir() {
                    Ok(dir) => Some(dir),
                    Err(e) => {
                        return Outcome::fail(
                            ErrorKind::Isolation,
                            format!("Failed to create scratch directory: {e}"),
                        )
                        .with_elapsed(started.elapsed());
                    }
                }
            } else {
                None
            };

            let outcome = self.invoke_in(target, args, timeout, scratch.as_ref().map(|d| d.path()));

            // A killed call may leave the directory half written; it goes either way.
            if let Some(dir) = scratch {
                let path = dir.path().to_path_buf();
                if let Err(e) = dir.close() {
                    tracing::warn!(path = ?path, error = %e, "failed to remove scratch directory");
                }
            }
            outcome.with_elapsed(started.elapsed())
        }
    }

    fn child_main(
        target: &TargetDescriptor,
        args: &[String],
        workdir: Option<&Path>,
        write_fd: OwnedFd,
    ) -> i32 {
        // Lets the parent kill anything the target spawns along with it.
        let _ = unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0));
        if let Some(dir) = workdir {
            if std::env::set_current_dir(dir).is_err() {
                return CHILD_SETUP_FAILED;
            }
        }

        let report = run_guarded(target, args);
        let mut channel = File::from(write_fd);
        match serde_json::to_vec(&report) {
            Ok(bytes) if channel.write_all(&bytes).is_ok() => 0,
            _ => CHILD_REPORT_FAILED,
        }
    }

    fn drain(channel: &mut File, received: &mut Vec<u8>) -> io::Result<()> {
        let mut chunk = [0u8; 8192];
        loop {
            match channel.read(&mut chunk) {
                Ok(0) => return Ok(()),
                Ok(n) => received.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn terminate(child: Pid) {
        // The child may not have reached setpgid yet, so signal it directly too.
        let _ = killpg(child, Signal::SIGKILL);
        let _ = kill(child, Signal::SIGKILL);
        loop {
            match waitpid(child, None) {
                Err(Errno::EINTR) => continue,
                _ => break,
            }
        }
    }

    fn conclude(
        exit: ChildExit,
        received: &[u8],
        target: &TargetDescriptor,
        timeout: Duration,
    ) -> Outcome {
        let report = if received.is_empty() {
            None
        } else {
            serde_json::from_slice::<InvocationReport>(received).ok()
        };

        match (exit, report) {
            (ChildExit::TimedOut, _) => Outcome::timeout(timeout),
            (ChildExit::Exited(_), Some(report)) => Outcome::classify(report, target.tolerated()),
            (ChildExit::Exited(CHILD_SETUP_FAILED), None) => Outcome::fail(
                ErrorKind::Isolation,
                "Isolated process could not enter its scratch directory",
            ),
            (ChildExit::Exited(code), None) => Outcome::fail(
                ErrorKind::Crash,
                format!("Exited with code {code} without reporting a result"),
            ),
            (ChildExit::Signaled(signal), _) => Outcome::fail(
                ErrorKind::Crash,
                format!("Terminated by signal {}", signal.as_str()),
            ),
            (ChildExit::WaitFailed(e), _) => Outcome::fail(
                ErrorKind::Isolation,
                format!("Failed to wait for isolated process: {e}"),
            ),
        }
    }
}

#[cfg(test)]
mod thread_invoker_tests {
    use super::*;
    use crate::outcome::Status;
    use crate::target::TargetError;

    fn length(input: &str) -> Result<usize, TargetError> {
        if input.is_empty() {
            return Err(TargetError::Validation("input must not be empty".into()));
        }
        Ok(input.len())
    }

    #[test]
    fn thread_invoker_runs_target() {
        let target = TargetDescriptor::new("length", length).unwrap();
        let mut invoker = ThreadInvoker::new();
        let outcome = invoker.invoke(&target, &["abc".into()], Duration::from_secs(5));
        assert_eq!(outcome.status, Status::Pass);
        assert_eq!(outcome.result_value.as_deref(), Some("3"));

        let rejected = invoker.invoke(&target, &["".into()], Duration::from_secs(5));
        assert_eq!(rejected.status, Status::Pass);
        assert_eq!(rejected.error_kind, Some(ErrorKind::Validation));
    }

    #[test]
    fn thread_invoker_catches_panic() {
        let target = TargetDescriptor::new("boom", |input: &str| -> Result<(), TargetError> {
            if input.starts_with('\u{ff}') {
                panic!("Boom!");
            }
            Ok(())
        })
        .unwrap();
        let mut invoker = ThreadInvoker::new();
        let outcome = invoker.invoke(&target, &["\u{ff}".into()], Duration::from_secs(5));
        assert_eq!(outcome.status, Status::Fail);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Unexpected));
        assert!(outcome.error_message.unwrap().contains("Boom!"));
    }

    #[test]
    fn thread_invoker_abandons_hung_calls() {
        let target = TargetDescriptor::new("sleepy", |_: &str| -> Result<(), TargetError> {
            thread::sleep(Duration::from_secs(2));
            Ok(())
        })
        .unwrap();
        let mut invoker = ThreadInvoker::new();
        let outcome = invoker.invoke(&target, &["x".into()], Duration::from_millis(50));
        assert_eq!(outcome.status, Status::Fail);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Timeout));
        assert!(outcome.elapsed < Duration::from_secs(2));
        assert_eq!(invoker.abandoned(), 1);
    }

    #[test]
    fn thread_invoker_accepts_any_valid_target_name() {
        let target = TargetDescriptor::new("%n%n\u{202e} ../x", length).unwrap();
        assert!(TargetDescriptor::from_slice_fn("a\0b", 0, |_: &[String]| Ok(String::new())).is_err());

        let outcome = ThreadInvoker::new().invoke(&target, &["ok".into()], Duration::from_secs(5));
        assert_eq!(outcome.status, Status::Pass);
        assert_eq!(outcome.result_value.as_deref(), Some("2"));
    }

    #[test]
    fn settings_pick_the_invoker() {
        let thread_settings = FuzzerSettings {
            isolation: IsolationKind::Thread,
            ..FuzzerSettings::default()
        };
        assert_eq!(from_settings(&thread_settings).name(), "thread");

        #[cfg(unix)]
        assert_eq!(from_settings(&FuzzerSettings::default()).name(), "process");
    }
}

#[cfg(all(test, unix))]
mod process_invoker_tests {
    use super::*;
    use crate::outcome::Status;
    use crate::target::TargetError;
    use std::path::PathBuf;

    fn invoker(scoped_workdir: bool) -> ProcessInvoker {
        ProcessInvoker::new(ProcessInvokerConfig {
            scoped_workdir,
            ..ProcessInvokerConfig::default()
        })
    }

    fn validating_length(input: &str) -> Result<usize, TargetError> {
        if input.is_empty() {
            return Err(TargetError::Validation("input must not be empty".into()));
        }
        if input == "io" {
            return Err(TargetError::Other("simulated I/O failure".into()));
        }
        Ok(input.len())
    }

    fn current_dir() -> Result<String, TargetError> {
        Ok(std::env::current_dir()?.to_string_lossy().into_owned())
    }

    fn unquote(rendered: &str) -> PathBuf {
        PathBuf::from(rendered.trim_matches('"'))
    }

    #[test]
    fn process_invoker_classifies_returns_and_errors() {
        let target = TargetDescriptor::new("length", validating_length).unwrap();
        let mut invoker = invoker(true);
        let timeout = Duration::from_secs(5);

        let ok = invoker.invoke(&target, &["abcd".into()], timeout);
        assert_eq!(ok.status, Status::Pass);
        assert_eq!(ok.result_value.as_deref(), Some("4"));

        let tolerated = invoker.invoke(&target, &["".into()], timeout);
        assert_eq!(tolerated.status, Status::Pass);
        assert_eq!(tolerated.error_kind, Some(ErrorKind::Validation));
        assert_eq!(
            tolerated.error_message.as_deref(),
            Some("input must not be empty")
        );

        let unexpected = invoker.invoke(&target, &["io".into()], timeout);
        assert_eq!(unexpected.status, Status::Fail);
        assert_eq!(unexpected.error_kind, Some(ErrorKind::Unexpected));
        assert_eq!(
            unexpected.error_message.as_deref(),
            Some("simulated I/O failure")
        );
    }

    #[test]
    fn process_invoker_contains_panics() {
        let target = TargetDescriptor::new("boom", |_: &str| -> Result<(), TargetError> {
            panic!("Boom!");
        })
        .unwrap();
        let outcome = invoker(false).invoke(&target, &["x".into()], Duration::from_secs(5));
        assert_eq!(outcome.status, Status::Fail);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Unexpected));
        assert!(outcome.error_message.unwrap().contains("Boom!"));
    }

    #[test]
    fn process_invoker_kills_on_timeout() {
        let target = TargetDescriptor::new("hang", |_: &str| -> Result<(), TargetError> {
            loop {
                thread::sleep(Duration::from_secs(60));
            }
        })
        .unwrap();
        let limit = Duration::from_millis(200);
        let outcome = invoker(true).invoke(&target, &["x".into()], limit);
        assert_eq!(outcome.status, Status::Fail);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Timeout));
        assert!(outcome.error_message.unwrap().contains("200ms"));
        assert!(outcome.elapsed >= limit);
        assert!(outcome.elapsed < Duration::from_secs(10));
    }

    #[test]
    fn process_invoker_survives_native_crashes() {
        let aborting = TargetDescriptor::new("abort", |_: &str| -> Result<(), TargetError> {
            std::process::abort();
        })
        .unwrap();
        let mut invoker = invoker(false);
        let outcome = invoker.invoke(&aborting, &["x".into()], Duration::from_secs(5));
        assert_eq!(outcome.status, Status::Fail);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Crash));
        assert!(outcome.error_message.unwrap().contains("SIGABRT"));

        let exiting = TargetDescriptor::new("exit", |_: &str| -> Result<(), TargetError> {
            std::process::exit(3);
        })
        .unwrap();
        let outcome = invoker.invoke(&exiting, &["x".into()], Duration::from_secs(5));
        assert_eq!(outcome.error_kind, Some(ErrorKind::Crash));
        assert!(outcome.error_message.unwrap().contains("code 3"));

        // The harness is still fine afterwards.
        let healthy = TargetDescriptor::new("len", validating_length).unwrap();
        let outcome = invoker.invoke(&healthy, &["ok".into()], Duration::from_secs(5));
        assert_eq!(outcome.status, Status::Pass);
    }

    #[test]
    fn scoped_workdir_contains_and_discards_side_effects() {
        let target = TargetDescriptor::new("writer", |name: &str| -> Result<String, TargetError> {
            std::fs::write(name, b"fuzz")?;
            current_dir()
        })
        .unwrap();
        let parent_dir = std::env::current_dir().unwrap();
        let file_name = "gauntlet-scoped-workdir-probe.txt";

        let outcome = invoker(true).invoke(&target, &[file_name.into()], Duration::from_secs(5));
        assert_eq!(outcome.status, Status::Pass, "{outcome:?}");

        let child_dir = unquote(outcome.result_value.as_deref().unwrap());
        assert_ne!(child_dir, parent_dir);
        assert!(!child_dir.exists(), "scratch directory should be removed");
        assert!(!parent_dir.join(file_name).exists());
        assert_eq!(std::env::current_dir().unwrap(), parent_dir);
    }

    #[test]
    fn unscoped_invocations_share_the_parent_directory() {
        let target = TargetDescriptor::new("cwd", |_: &str| current_dir()).unwrap();
        let outcome = invoker(false).invoke(&target, &["x".into()], Duration::from_secs(5));
        let child_dir = unquote(outcome.result_value.as_deref().unwrap());
        assert_eq!(child_dir, std::env::current_dir().unwrap());
    }
}
