use std::{cell::RefCell, io, rc::Rc};

use tracing::{debug, warn};

use crate::{
    bindings::Bindings,
    config::EngineConfig,
    diagnostics::{Failure, NarcissusError, Result},
    environment::{EngineScope, GlobalLink, GlobalStoreRef, ScopeRef},
    output::{CharSink, OutputBridge, WriterSink},
    translate::translate,
    value::Value,
};

pub type OutputChannel = OutputBridge<Box<dyn CharSink>>;

/// The two variable scopes a host can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Variables owned by the execution context.
    Engine,
    /// The host-managed store shared between contexts.
    Global,
}

/// What the interpreter sees of the host while it runs: the scope it reads
/// and writes, and its two byte output channels.
pub struct EvalSession<'a> {
    pub scope: &'a ScopeRef,
    pub out: &'a mut dyn io::Write,
    pub err: &'a mut dyn io::Write,
}

impl EvalSession<'_> {
    pub fn bindings(&self) -> Bindings {
        Bindings::new(Rc::clone(self.scope))
    }
}

/// Contract of the embedded evaluator. Parsing and evaluation live on the
/// other side of this trait; failures come back as raw records.
pub trait Interpreter {
    fn eval(
        &mut self,
        source: &str,
        session: &mut EvalSession<'_>,
    ) -> std::result::Result<Value, Failure>;

    fn invoke(
        &mut self,
        name: &str,
        args: &[Value],
        session: &mut EvalSession<'_>,
    ) -> std::result::Result<Value, Failure>;
}

/// Per-context state: the engine scope, the link to the host global store
/// and the bridged output channels.
pub struct ExecutionContext {
    config: EngineConfig,
    global: GlobalLink,
    scope: ScopeRef,
    stdout: OutputChannel,
    stderr: OutputChannel,
}

impl ExecutionContext {
    /// Context writing script output to the process stdout and stderr.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_sinks(
            config,
            WriterSink::new(io::stdout()),
            WriterSink::new(io::stderr()),
        )
    }

    pub fn with_sinks(
        config: EngineConfig,
        out: impl CharSink + 'static,
        err: impl CharSink + 'static,
    ) -> Self {
        let global: GlobalLink = Rc::new(RefCell::new(None));
        let scope = EngineScope::new(config.scope_name.clone(), Rc::clone(&global));
        let stdout = OutputBridge::with_capacity(
            Box::new(out) as Box<dyn CharSink>,
            config.charset,
            config.output_buffer_capacity,
        );
        let stderr = OutputBridge::with_capacity(
            Box::new(err) as Box<dyn CharSink>,
            config.charset,
            config.output_buffer_capacity,
        );
        Self {
            config,
            global,
            scope,
            stdout,
            stderr,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scope(&self) -> &ScopeRef {
        &self.scope
    }

    pub fn engine_bindings(&self) -> Bindings {
        Bindings::new(Rc::clone(&self.scope))
    }

    /// A fresh local scope over the same global store.
    pub fn new_scope(&self) -> ScopeRef {
        EngineScope::new(self.config.scope_name.clone(), Rc::clone(&self.global))
    }

    pub fn global_store(&self) -> Option<GlobalStoreRef> {
        self.global.borrow().as_ref().map(Rc::clone)
    }

    /// Replaces the host global store for every scope of this context.
    pub fn set_global_store(&mut self, store: Option<GlobalStoreRef>) {
        *self.global.borrow_mut() = store;
    }

    pub fn stdout_mut(&mut self) -> &mut OutputChannel {
        &mut self.stdout
    }

    pub fn stderr_mut(&mut self) -> &mut OutputChannel {
        &mut self.stderr
    }

    pub fn session(&mut self) -> EvalSession<'_> {
        EvalSession {
            scope: &self.scope,
            out: &mut self.stdout,
            err: &mut self.stderr,
        }
    }

    pub fn flush_output(&mut self) -> io::Result<()> {
        let out = self.stdout.flush();
        let err = self.stderr.flush();
        out.and(err)
    }

    pub fn close_output(&mut self) -> io::Result<()> {
        let out = self.stdout.close();
        let err = self.stderr.close();
        out.and(err)
    }
}

/// Host-facing engine: one interpreter bound to one execution context.
pub struct ScriptEngine<I: Interpreter> {
    interpreter: I,
    context: ExecutionContext,
}

impl<I: Interpreter> ScriptEngine<I> {
    pub fn new(interpreter: I, config: EngineConfig) -> Self {
        Self::with_context(interpreter, ExecutionContext::new(config))
    }

    pub fn with_context(interpreter: I, context: ExecutionContext) -> Self {
        Self {
            interpreter,
            context,
        }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ExecutionContext {
        &mut self.context
    }

    pub fn interpreter(&self) -> &I {
        &self.interpreter
    }

    pub fn interpreter_mut(&mut self) -> &mut I {
        &mut self.interpreter
    }

    /// Bindings of the context's engine scope.
    pub fn bindings(&self) -> Bindings {
        self.context.engine_bindings()
    }

    pub fn create_bindings(&self) -> Bindings {
        Bindings::new(self.context.new_scope())
    }

    /// Only the global store can be swapped; the engine scope belongs to the
    /// context for its whole lifetime.
    pub fn set_bindings(&mut self, kind: ScopeKind, store: Option<GlobalStoreRef>) -> Result<()> {
        match kind {
            ScopeKind::Engine => Err(NarcissusError::EngineScopeLocked),
            ScopeKind::Global => {
                self.context.set_global_store(store);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.bindings().get(name)?)
    }

    pub fn put(&self, name: &str, value: Value) -> Result<Option<Value>> {
        Ok(self.bindings().put(name, value)?)
    }

    pub fn eval(&mut self, source: &str) -> Result<Value> {
        debug!(scope = %self.context.config.scope_name, bytes = source.len(), "evaluating script");
        self.run(|interpreter, session| interpreter.eval(source, session))
    }

    pub fn eval_reader<R: io::Read>(&mut self, mut reader: R) -> Result<Value> {
        let mut source = String::new();
        reader.read_to_string(&mut source)?;
        self.eval(&source)
    }

    pub fn invoke_function(&mut self, name: &str, args: &[Value]) -> Result<Value> {
        debug!(function = name, args = args.len(), "invoking script function");
        self.run(|interpreter, session| interpreter.invoke(name, args, session))
    }

    fn run<F>(&mut self, call: F) -> Result<Value>
    where
        F: FnOnce(&mut I, &mut EvalSession<'_>) -> std::result::Result<Value, Failure>,
    {
        let outcome = {
            let mut session = self.context.session();
            call(&mut self.interpreter, &mut session)
        };
        let flushed = self.context.flush_output();
        match outcome {
            Ok(value) => {
                flushed?;
                Ok(value)
            }
            Err(failure) => {
                if let Err(err) = flushed {
                    warn!(%err, "could not flush script output after failure");
                }
                Err(translate(failure).into())
            }
        }
    }
}
