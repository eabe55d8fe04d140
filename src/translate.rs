//! Classification of raw interpreter failures into host-level script errors.
//!
//! A failure raised while a script runs may be wrapped several times on its
//! way out: native code called from the script throws, the call site wraps
//! that in a [`FailureKind::Target`] record, and outer call sites may wrap it
//! again. [`translate`] peels the wrappers off, picks a category from the
//! innermost failure and rebuilds a script-level traceback across every layer.

use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::diagnostics::{Failure, FailureKind, UNKNOWN_FILE, UNKNOWN_LINE, UNKNOWN_TEXT};

const SYNTAX_PREAMBLE: &str = "A parsing error occurred. The syntax of your script was incorrect. \
A typical problem is a missing operator (e.g. + * ,) or parenthesis. Sometimes the syntax \
problem may be located a line or two away from where the parser reported the error. Carefully \
check and correct the syntax and try again.";

const INTERNAL_PREAMBLE: &str = "The interpreter had an internal error. This is a bug in the \
interpreter, not in your script.";

const EVALUATION_PREAMBLE: &str = "An error occurred while the script was being evaluated. This \
type of error is usually caused by mistyping a variable or function name, by using an incorrect \
data type (a string where a number is required), or by passing the wrong number or type of \
arguments to a function. Correct your script and try again.";

const APPLICATION_PREAMBLE: &str = "An error occurred in the application software. This type of \
error is usually caused by incorrect dataset names or other invalid parameter values passed into \
application functions, or by invalid data in the input files. Correct your script or input data \
files and try again.";

const UNKNOWN_MESSAGE: &str = "An unexpected error has occurred while processing a script.";

/// Category of a translated failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptErrorKind {
    Syntax,
    Internal,
    Evaluation,
    Application,
    Unknown,
}

impl fmt::Display for ScriptErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScriptErrorKind::Syntax => "syntax error",
            ScriptErrorKind::Internal => "internal error",
            ScriptErrorKind::Evaluation => "evaluation error",
            ScriptErrorKind::Application => "application error",
            ScriptErrorKind::Unknown => "unknown error",
        };
        f.write_str(name)
    }
}

/// The one failure shape the host observes.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ScriptError {
    kind: ScriptErrorKind,
    message: String,
    traceback: String,
    #[source]
    cause: Option<Failure>,
}

impl ScriptError {
    pub fn new(kind: ScriptErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            traceback: String::new(),
            cause: None,
        }
    }

    pub fn kind(&self) -> ScriptErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Reconstructed script traceback, oldest location first.
    pub fn traceback(&self) -> &str {
        &self.traceback
    }

    /// The failure this error was translated from.
    pub fn cause(&self) -> Option<&Failure> {
        self.cause.as_ref()
    }

    pub fn into_cause(self) -> Option<Failure> {
        self.cause
    }
}

/// Classifies `failure` and composes the host-facing error. Never fails.
pub fn translate(failure: Failure) -> ScriptError {
    let traceback = tidy_trace(&failure);
    let outer_is_target = failure.is_target();
    let innermost = unwrap_targets(&failure);

    let (kind, message) = match innermost.kind() {
        FailureKind::Syntax => {
            let mut message = format!(
                "{SYNTAX_PREAMBLE}\n\nCaused by:\n   {}",
                innermost.message()
            );
            if outer_is_target {
                append_traceback(&mut message, &traceback);
            }
            (ScriptErrorKind::Syntax, message)
        }
        FailureKind::Internal => {
            let mut message = format!("{INTERNAL_PREAMBLE}\n\nCaused by:\n   {innermost}");
            if outer_is_target {
                append_traceback(&mut message, &traceback);
            }
            (ScriptErrorKind::Internal, message)
        }
        FailureKind::Evaluation | FailureKind::Target => {
            let mut message = format!(
                "{EVALUATION_PREAMBLE}\n\nCaused by:\n   {}",
                innermost.message()
            );
            append_traceback(&mut message, &traceback);
            (ScriptErrorKind::Evaluation, message)
        }
        FailureKind::Native { .. } if outer_is_target => {
            let mut message = format!(
                "{APPLICATION_PREAMBLE}\n\nCaused by:\n   {}",
                innermost.message()
            );
            append_traceback(&mut message, &traceback);
            (ScriptErrorKind::Application, message)
        }
        FailureKind::Native { .. } => (ScriptErrorKind::Unknown, UNKNOWN_MESSAGE.to_string()),
    };

    debug!(%kind, depth = chain_depth(&failure), "translated script failure");

    ScriptError {
        kind,
        message,
        traceback,
        cause: Some(failure),
    }
}

/// Follows application wrappers down to the first non-wrapper failure. A
/// wrapper without a cause is its own innermost failure.
fn unwrap_targets(failure: &Failure) -> &Failure {
    let mut current = failure;
    while current.is_target() {
        match current.cause() {
            Some(target) => current = target,
            None => break,
        }
    }
    current
}

fn chain_depth(failure: &Failure) -> usize {
    std::iter::successors(Some(failure), |f| f.cause()).count()
}

fn append_traceback(message: &mut String, traceback: &str) {
    message.push_str("\nScript traceback:");
    message.push_str(traceback);
    message.push('\n');
}

/// Renders the traceback of a wrapped failure chain, oldest entry first.
///
/// Only script-level records contribute. A level whose wrapped cause is
/// itself script-level leaves its own location out; the deeper record
/// already points at the same call.
pub fn tidy_trace(failure: &Failure) -> String {
    let mut levels = Vec::new();
    let mut current = Some(failure);
    while let Some(level) = current {
        if !level.kind().is_script_level() {
            break;
        }
        levels.push(level);
        current = if level.is_target() {
            level.cause()
        } else {
            None
        };
    }

    let mut out = String::new();
    for level in levels.iter().rev() {
        let superseded = level.is_target()
            && level
                .cause()
                .is_some_and(|cause| cause.kind().is_script_level());
        if !superseded {
            match level.location() {
                Some(loc) => push_at(&mut out, &loc.file, i64::from(loc.line), &loc.text),
                None => push_at(&mut out, UNKNOWN_FILE, UNKNOWN_LINE, UNKNOWN_TEXT),
            }
        }
        for frame in level.frames().iter().filter(|frame| frame.is_method) {
            if let Some(loc) = &frame.location {
                push_at(&mut out, &loc.file, i64::from(loc.line), &loc.text);
            }
        }
    }
    out
}

fn push_at(out: &mut String, file: &str, line: i64, text: &str) {
    out.push_str(&format!("\n    at {file}:{line} '{text}'"));
}
