//! Top-level error type returned by [`crate::Vm::interpret`].

use thiserror::Error;

/// Either phase of running a script can fail; both carry an already
/// human-formatted message (matching the spec's `[line N] Error ...` /
/// stack-trace wire format), not a structured diagnostic, since there is
/// nothing downstream that needs to pattern-match on the cause.
#[derive(Debug, Error)]
pub enum CorvidError {
  /// One line per syntax error found during compilation.
  #[error("{}", .0.join("\n"))]
  Compile(Vec<String>),

  /// The already-formatted message plus stack trace of a failed run.
  #[error("{0}")]
  Runtime(String),
}

impl CorvidError {
  /// The process exit code the CLI reports for this error, per the spec's
  /// `0`/`65`/`70` convention.
  pub fn exit_code(&self) -> i32 {
    match self {
      CorvidError::Compile(_) => 65,
      CorvidError::Runtime(_) => 70,
    }
  }
}
