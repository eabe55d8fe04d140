use std::fmt;

use thiserror::Error;

use crate::{bindings::BindingError, translate::ScriptError};

pub const UNKNOWN_FILE: &str = "<unknown file>";
pub const UNKNOWN_LINE: i64 = -1;
pub const UNKNOWN_TEXT: &str = "<unknown location>";

/// Position of a statement in a script, as reported by the interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub text: String,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32, text: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            text: text.into(),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// One activation record of the interpreter's call stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub name: String,
    pub is_method: bool,
    pub location: Option<SourceLocation>,
}

impl Frame {
    pub fn method(name: impl Into<String>, location: Option<SourceLocation>) -> Self {
        Self {
            name: name.into(),
            is_method: true,
            location,
        }
    }

    /// A non-method frame (global namespace, block scope). Never rendered in
    /// tracebacks.
    pub fn block(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_method: false,
            location: None,
        }
    }
}

/// Live call stack maintained by the interpreter, oldest frame first.
#[derive(Debug, Clone, Default)]
pub struct CallStack {
    frames: Vec<Frame>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }
}

/// Origin of a raw failure raised while a script runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The script could not be parsed.
    Syntax,
    /// A well-formed script failed at runtime.
    Evaluation,
    /// The interpreter itself hit an unrecoverable fault.
    Internal,
    /// Application-origin wrapper; the cause is the failure thrown by native
    /// code invoked from the script.
    Target,
    /// A failure raised by host or application code.
    Native { type_name: String },
}

impl FailureKind {
    /// Script-level failures take part in traceback reconstruction; native
    /// and internal failures end the chain.
    pub fn is_script_level(&self) -> bool {
        matches!(
            self,
            FailureKind::Syntax | FailureKind::Evaluation | FailureKind::Target
        )
    }
}

/// Raw failure record produced at the failure site.
///
/// The frame snapshot is copied once from the live [`CallStack`] and cannot
/// be changed afterwards. A record without a snapshot is distinct from one
/// whose captured stack was empty.
#[derive(Debug, Clone)]
pub struct Failure {
    kind: FailureKind,
    message: String,
    location: Option<SourceLocation>,
    cause: Option<Box<Failure>>,
    frames: Option<Box<[Frame]>>,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
            cause: None,
            frames: None,
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Syntax, message)
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Evaluation, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }

    pub fn native(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            FailureKind::Native {
                type_name: type_name.into(),
            },
            message,
        )
    }

    /// Wraps a failure thrown by application code called from the script.
    pub fn target(message: impl Into<String>, target: Failure) -> Self {
        Self::new(FailureKind::Target, message).caused_by(target)
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn caused_by(mut self, cause: Failure) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Freezes a copy of `stack` into this record.
    pub fn with_call_stack(mut self, stack: &CallStack) -> Self {
        self.frames = Some(stack.frames().to_vec().into_boxed_slice());
        self
    }

    /// Prepends `prefix : ` to the message, for layers that re-raise a
    /// failure with more context.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.message = if self.message.is_empty() {
            prefix.to_string()
        } else {
            format!("{prefix} : {}", self.message)
        };
        self
    }

    pub fn kind(&self) -> &FailureKind {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    pub fn cause(&self) -> Option<&Failure> {
        self.cause.as_deref()
    }

    /// Captured frames, oldest first. Empty when no stack was captured.
    pub fn frames(&self) -> &[Frame] {
        self.frames.as_deref().unwrap_or(&[])
    }

    pub fn has_call_stack(&self) -> bool {
        self.frames.is_some()
    }

    pub fn is_target(&self) -> bool {
        self.kind == FailureKind::Target
    }

    /// Innermost record of the cause chain.
    pub fn root_cause(&self) -> &Failure {
        let mut current = self;
        while let Some(next) = current.cause() {
            current = next;
        }
        current
    }

    pub fn error_text(&self) -> &str {
        self.location
            .as_ref()
            .map(|loc| loc.text.as_str())
            .unwrap_or("<unknown error>")
    }

    pub fn error_line(&self) -> i64 {
        self.location
            .as_ref()
            .map(|loc| i64::from(loc.line))
            .unwrap_or(UNKNOWN_LINE)
    }

    pub fn error_source_file(&self) -> &str {
        self.location
            .as_ref()
            .map(|loc| loc.file.as_str())
            .unwrap_or(UNKNOWN_FILE)
    }

    /// Method frames of the snapshot, newest first. `<Unknown>` when no
    /// stack was captured.
    pub fn script_stack_trace(&self) -> String {
        let Some(frames) = &self.frames else {
            return "<Unknown>".to_string();
        };
        let mut trace = String::new();
        for frame in frames.iter().rev().filter(|frame| frame.is_method) {
            trace.push_str("\nCalled from method: ");
            trace.push_str(&frame.name);
            if let Some(loc) = &frame.location {
                trace.push_str(&format!(
                    " : at Line: {} : in file: {} : {}",
                    loc.line, loc.file, loc.text
                ));
            }
        }
        trace
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let FailureKind::Native { type_name } = &self.kind {
            return write!(f, "{type_name}: {}", self.message);
        }
        write!(f, "{}", self.message)?;
        match &self.location {
            Some(loc) => write!(
                f,
                " : at Line: {} : in file: {} : {}",
                loc.line, loc.file, loc.text
            )?,
            None => write!(f, ": <at unknown location>")?,
        }
        if self.frames.is_some() {
            write!(f, "\n{}", self.script_stack_trace())?;
        }
        Ok(())
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

/// Unified error type for the embedding layer.
#[derive(Debug, Error)]
pub enum NarcissusError {
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("the engine scope of an execution context cannot be replaced")]
    EngineScopeLocked,
}

pub type Result<T> = std::result::Result<T, NarcissusError>;
