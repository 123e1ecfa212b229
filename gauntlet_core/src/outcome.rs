use crate::target::TargetError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Longest rendering of a result value or error message kept in an `Outcome`.
/// Fuzz inputs can be hundreds of kilobytes and targets love echoing them back.
pub const MAX_DETAIL_CHARS: usize = 4096;

/// Error kinds a target is expected to raise on malformed input unless its
/// descriptor says otherwise.
pub const DEFAULT_TOLERATED: [ErrorKind; 2] = [ErrorKind::Validation, ErrorKind::TypeMismatch];

/// Whether an invocation counts towards the pass or the fail column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pass,
    Fail,
}

/// Classification of whatever went wrong during an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The target rejected its input as invalid.
    Validation,
    /// The target rejected its input as the wrong shape or type.
    TypeMismatch,
    /// Any other error or panic raised by the target.
    Unexpected,
    /// The invocation did not finish before its deadline and was killed.
    Timeout,
    /// The isolated process died without reporting (signal, abort, exit).
    Crash,
    /// The harness could not set up isolation for the call.
    Isolation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::TypeMismatch => "TypeMismatchError",
            ErrorKind::Unexpected => "Unexpected",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Crash => "Crash",
            ErrorKind::Isolation => "Isolation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the target did, as reported from inside the isolation boundary.
///
/// This is the only value that crosses from the isolated unit back to the
/// runner. Classification into pass/fail happens on the runner's side so the
/// isolated unit never needs to know the tolerance policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationReport {
    Returned { value: String },
    Raised { error: TargetError },
    Panicked { message: String },
}

impl InvocationReport {
    /// Converts a target's return into a report, clipping anything oversized.
    pub fn from_result(result: Result<String, TargetError>) -> Self {
        match result {
            Ok(value) => InvocationReport::Returned {
                value: clip(&value),
            },
            Err(error) => InvocationReport::Raised {
                error: error.clipped(),
            },
        }
    }

    /// Builds a report from a caught panic payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic type".to_string()
        };
        InvocationReport::Panicked {
            message: clip(&message),
        }
    }
}

/// The classified result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: Status,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    /// `Debug` rendering of the target's return value, if it returned.
    pub result_value: Option<String>,
    pub elapsed: Duration,
    /// MD5 hex digest of the fuzz item, filled in by the runner.
    pub input_digest: Option<String>,
}

impl Outcome {
    pub fn pass(value: String) -> Self {
        Self {
            status: Status::Pass,
            error_kind: None,
            error_message: None,
            result_value: Some(value),
            elapsed: Duration::ZERO,
            input_digest: None,
        }
    }

    pub fn tolerated(kind: ErrorKind, message: String) -> Self {
        Self {
            status: Status::Pass,
            error_kind: Some(kind),
            error_message: Some(message),
            result_value: None,
            elapsed: Duration::ZERO,
            input_digest: None,
        }
    }

    pub fn fail(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: Status::Fail,
            error_kind: Some(kind),
            error_message: Some(message.into()),
            result_value: None,
            elapsed: Duration::ZERO,
            input_digest: None,
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::fail(
            ErrorKind::Timeout,
            format!("invocation exceeded time limit ({limit:?})"),
        )
    }

    /// Applies the target's tolerance policy to what happened inside the
    /// isolation boundary.
    pub fn classify(report: InvocationReport, tolerated: &[ErrorKind]) -> Self {
        match report {
            InvocationReport::Returned { value } => Outcome::pass(value),
            InvocationReport::Raised { error } => {
                let kind = error.kind();
                if tolerated.contains(&kind) {
                    Outcome::tolerated(kind, error.to_string())
                } else {
                    Outcome::fail(ErrorKind::Unexpected, error.to_string())
                }
            }
            InvocationReport::Panicked { message } => {
                if tolerated.contains(&ErrorKind::Unexpected) {
                    Outcome::tolerated(ErrorKind::Unexpected, format!("panicked: {message}"))
                } else {
                    Outcome::fail(ErrorKind::Unexpected, format!("panicked: {message}"))
                }
            }
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn for_input(mut self, item: &str) -> Self {
        self.input_digest = Some(format!("{:x}", md5::compute(item.as_bytes())));
        self
    }

    pub fn is_pass(&self) -> bool {
        self.status == Status::Pass
    }

    /// `"<kind>: <message>"`, the key the error histogram groups by.
    pub fn signature(&self) -> Option<String> {
        let kind = self.error_kind?;
        Some(match &self.error_message {
            Some(message) => format!("{kind}: {message}"),
            None => kind.to_string(),
        })
    }
}

pub(crate) fn clip(text: &str) -> String {
    match text.char_indices().nth(MAX_DETAIL_CHARS) {
        Some((cut, _)) => format!("{}... [{} bytes total]", &text[..cut], text.len()),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returned_value_passes() {
        let outcome = Outcome::classify(
            InvocationReport::Returned { value: "42".into() },
            &DEFAULT_TOLERATED,
        );
        assert_eq!(outcome.status, Status::Pass);
        assert_eq!(outcome.result_value.as_deref(), Some("42"));
        assert!(outcome.error_kind.is_none());
        assert!(outcome.signature().is_none());
    }

    #[test]
    fn tolerated_errors_pass_with_detail() {
        for error in [
            TargetError::Validation("empty path".into()),
            TargetError::TypeMismatch("not a date".into()),
        ] {
            let kind = error.kind();
            let outcome = Outcome::classify(InvocationReport::Raised { error }, &DEFAULT_TOLERATED);
            assert!(outcome.is_pass());
            assert_eq!(outcome.error_kind, Some(kind));
            assert!(outcome.error_message.is_some());
        }
    }

    #[test]
    fn other_errors_and_panics_fail_as_unexpected() {
        let outcome = Outcome::classify(
            InvocationReport::Raised {
                error: TargetError::Other("disk on fire".into()),
            },
            &DEFAULT_TOLERATED,
        );
        assert_eq!(outcome.status, Status::Fail);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Unexpected));
        assert_eq!(outcome.error_message.as_deref(), Some("disk on fire"));
        assert_eq!(
            outcome.signature().as_deref(),
            Some("Unexpected: disk on fire")
        );

        let panicked = Outcome::classify(
            InvocationReport::Panicked {
                message: "index out of bounds".into(),
            },
            &DEFAULT_TOLERATED,
        );
        assert_eq!(panicked.status, Status::Fail);
        assert_eq!(
            panicked.error_message.as_deref(),
            Some("panicked: index out of bounds")
        );
    }

    #[test]
    fn tolerance_policy_is_per_call() {
        let error = TargetError::Validation("bad".into());
        let strict = Outcome::classify(InvocationReport::Raised { error: error.clone() }, &[]);
        assert_eq!(strict.status, Status::Fail);
        assert_eq!(strict.error_kind, Some(ErrorKind::Unexpected));

        let lenient = Outcome::classify(
            InvocationReport::Raised {
                error: TargetError::Other("io".into()),
            },
            &[ErrorKind::Unexpected],
        );
        assert!(lenient.is_pass());
    }

    #[test]
    fn timeout_message_names_the_limit() {
        let outcome = Outcome::timeout(Duration::from_secs(1));
        assert_eq!(outcome.status, Status::Fail);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Timeout));
        assert!(outcome.error_message.unwrap().contains("1s"));
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("Boom!");
        assert_eq!(
            InvocationReport::from_panic(boxed.as_ref()),
            InvocationReport::Panicked {
                message: "Boom!".into()
            }
        );
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(
            InvocationReport::from_panic(owned.as_ref()),
            InvocationReport::Panicked {
                message: "owned boom".into()
            }
        );
        let opaque: Box<dyn std::any::Any + Send> = Box::new(7u32);
        assert_eq!(
            InvocationReport::from_panic(opaque.as_ref()),
            InvocationReport::Panicked {
                message: "Unknown panic type".into()
            }
        );
    }

    #[test]
    fn oversized_details_are_clipped() {
        let long = "a".repeat(100_000);
        match InvocationReport::from_result(Ok(long)) {
            InvocationReport::Returned { value } => {
                assert!(value.len() < 5000);
                assert!(value.ends_with("[100000 bytes total]"));
            }
            other => panic!("Expected Returned, got {other:?}"),
        }
        assert_eq!(clip("short"), "short");
    }

    #[test]
    fn input_digest_is_md5_hex() {
        let outcome = Outcome::pass("0".into()).for_input("");
        assert_eq!(
            outcome.input_digest.as_deref(),
            Some("d41d8cd98f00b204e9800998ecf8427e")
        );
    }
}
