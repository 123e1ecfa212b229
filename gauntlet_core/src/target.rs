use crate::config::ConfigError;
use crate::outcome::{DEFAULT_TOLERATED, ErrorKind, clip};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Highest parameter count a descriptor accepts.
pub const MAX_ARITY: usize = 4;

/// An error raised by a function under test.
///
/// Targets return these the way they would raise exceptions: `Validation` and
/// `TypeMismatch` signal a deliberate rejection of bad input, `Other` is
/// anything else.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    TypeMismatch(String),
    #[error("{0}")]
    Other(String),
}

impl TargetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TargetError::Validation(_) => ErrorKind::Validation,
            TargetError::TypeMismatch(_) => ErrorKind::TypeMismatch,
            TargetError::Other(_) => ErrorKind::Unexpected,
        }
    }

    pub(crate) fn clipped(self) -> Self {
        match self {
            TargetError::Validation(m) => TargetError::Validation(clip(&m)),
            TargetError::TypeMismatch(m) => TargetError::TypeMismatch(clip(&m)),
            TargetError::Other(m) => TargetError::Other(clip(&m)),
        }
    }
}

impl From<std::io::Error> for TargetError {
    fn from(err: std::io::Error) -> Self {
        TargetError::Other(format!("{}: {}", err.kind(), err))
    }
}

impl From<anyhow::Error> for TargetError {
    fn from(err: anyhow::Error) -> Self {
        TargetError::Other(format!("{err:#}"))
    }
}

/// A function that can be fuzzed with string inputs.
///
/// Implemented for every `Fn(&str, ...) -> Result<T, E>` with up to
/// [`MAX_ARITY`] parameters. `Marker` only exists to keep the per-arity impls
/// apart; callers never name it.
pub trait TargetFn<Marker>: Send + Sync + 'static {
    const ARITY: usize;

    fn call_with(&self, args: &[String]) -> Result<String, TargetError>;
}

fn check_arg_count(args: &[String], expected: usize) -> Result<(), TargetError> {
    if args.len() != expected {
        return Err(TargetError::TypeMismatch(format!(
            "takes {expected} positional arguments but {} were given",
            args.len()
        )));
    }
    Ok(())
}

fn render<T: fmt::Debug, E: Into<TargetError>>(result: Result<T, E>) -> Result<String, TargetError> {
    result.map(|value| format!("{value:?}")).map_err(Into::into)
}

impl<F, T, E> TargetFn<fn() -> Result<T, E>> for F
where
    F: Fn() -> Result<T, E> + Send + Sync + 'static,
    T: fmt::Debug,
    E: Into<TargetError>,
{
    const ARITY: usize = 0;

    fn call_with(&self, args: &[String]) -> Result<String, TargetError> {
        check_arg_count(args, 0)?;
        render(self())
    }
}

impl<F, T, E> TargetFn<fn(&str) -> Result<T, E>> for F
where
    F: Fn(&str) -> Result<T, E> + Send + Sync + 'static,
    T: fmt::Debug,
    E: Into<TargetError>,
{
    const ARITY: usize = 1;

    fn call_with(&self, args: &[String]) -> Result<String, TargetError> {
        check_arg_count(args, 1)?;
        render(self(args[0].as_str()))
    }
}

impl<F, T, E> TargetFn<fn(&str, &str) -> Result<T, E>> for F
where
    F: Fn(&str, &str) -> Result<T, E> + Send + Sync + 'static,
    T: fmt::Debug,
    E: Into<TargetError>,
{
    const ARITY: usize = 2;

    fn call_with(&self, args: &[String]) -> Result<String, TargetError> {
        check_arg_count(args, 2)?;
        render(self(args[0].as_str(), args[1].as_str()))
    }
}

impl<F, T, E> TargetFn<fn(&str, &str, &str) -> Result<T, E>> for F
where
    F: Fn(&str, &str, &str) -> Result<T, E> + Send + Sync + 'static,
    T: fmt::Debug,
    E: Into<TargetError>,
{
    const ARITY: usize = 3;

    fn call_with(&self, args: &[String]) -> Result<String, TargetError> {
        check_arg_count(args, 3)?;
        render(self(args[0].as_str(), args[1].as_str(), args[2].as_str()))
    }
}

impl<F, T, E> TargetFn<fn(&str, &str, &str, &str) -> Result<T, E>> for F
where
    F: Fn(&str, &str, &str, &str) -> Result<T, E> + Send + Sync + 'static,
    T: fmt::Debug,
    E: Into<TargetError>,
{
    const ARITY: usize = 4;

    fn call_with(&self, args: &[String]) -> Result<String, TargetError> {
        check_arg_count(args, 4)?;
        render(self(
            args[0].as_str(),
            args[1].as_str(),
            args[2].as_str(),
            args[3].as_str(),
        ))
    }
}

type CallFn = dyn Fn(&[String]) -> Result<String, TargetError> + Send + Sync;

/// A function under test plus everything the engine needs to drive it.
///
/// The arity is fixed when the descriptor is built and never changes.
/// Descriptors are cheap to clone; the callable is shared.
#[derive(Clone)]
pub struct TargetDescriptor {
    name: String,
    arity: usize,
    call: Arc<CallFn>,
    tolerated: Vec<ErrorKind>,
    timeout: Option<Duration>,
}

impl TargetDescriptor {
    /// Describes a statically typed target; the arity comes from its signature.
    ///
    /// ```ignore
    /// fn days_between(a: &str, b: &str) -> Result<i64, TargetError> { ... }
    /// let target = TargetDescriptor::new("days_between", days_between)?;
    /// assert_eq!(target.arity(), 2);
    /// ```
    pub fn new<M, F>(name: impl Into<String>, target: F) -> Result<Self, ConfigError>
    where
        F: TargetFn<M>,
    {
        let call = move |args: &[String]| target.call_with(args);
        Self::build(name.into(), F::ARITY, Arc::new(call))
    }

    /// Describes a target that takes its arguments as a slice. The caller
    /// vouches for `arity`.
    pub fn from_slice_fn<F>(
        name: impl Into<String>,
        arity: usize,
        call: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&[String]) -> Result<String, TargetError> + Send + Sync + 'static,
    {
        Self::build(name.into(), arity, Arc::new(call))
    }

    fn build(name: String, arity: usize, call: Arc<CallFn>) -> Result<Self, ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::EmptyTargetName);
        }
        if name.contains('\0') {
            return Err(ConfigError::NulInTargetName(name));
        }
        if arity > MAX_ARITY {
            return Err(ConfigError::UnsupportedArity {
                target: name,
                arity,
                max: MAX_ARITY,
            });
        }
        Ok(Self {
            name,
            arity,
            call,
            tolerated: DEFAULT_TOLERATED.to_vec(),
            timeout: None,
        })
    }

    /// Replaces the set of error kinds that still count as a pass.
    pub fn tolerating(mut self, kinds: &[ErrorKind]) -> Self {
        self.tolerated = kinds.to_vec();
        self
    }

    /// Gives this target its own per-call deadline instead of the runner's.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn tolerated(&self) -> &[ErrorKind] {
        &self.tolerated
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Broadcasts `item` to every parameter.
    pub fn args_for(&self, item: &str) -> Vec<String> {
        vec![item.to_owned(); self.arity]
    }

    /// Calls the target directly, with no isolation. Only invokers should do this.
    pub fn call(&self, args: &[String]) -> Result<String, TargetError> {
        (self.call)(args)
    }
}

impl fmt::Debug for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetDescriptor")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("tolerated", &self.tolerated)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
