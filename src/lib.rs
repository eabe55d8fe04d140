//! Host embedding layer for the Narcissus runtime.
//!
//! Bridges an interpreter's internal state to a host execution context: a
//! two-level variable overlay (engine scope over a shared global store),
//! translation of raw interpreter failures into host diagnostics with a
//! reconstructed script traceback, and incremental decoding of the
//! interpreter's byte output into host text sinks.

pub mod bindings;
pub mod config;
pub mod diagnostics;
pub mod environment;
pub mod output;
pub mod runtime;
pub mod translate;
pub mod value;

pub use bindings::{BindingError, BindingKey, Bindings, EntrySet};
pub use config::{Charset, EngineConfig};
pub use diagnostics::{CallStack, Failure, FailureKind, Frame, NarcissusError, SourceLocation};
pub use environment::{EngineScope, GlobalStore, GlobalStoreRef, ScopeRef, Slot};
pub use output::{CharSink, OutputBridge, SharedBuffer, WriterSink};
pub use runtime::{EvalSession, ExecutionContext, Interpreter, ScopeKind, ScriptEngine};
pub use translate::{ScriptError, ScriptErrorKind, translate};
pub use value::{Value, ValueKind};
