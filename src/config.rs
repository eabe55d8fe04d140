use std::fmt;

pub const DEFAULT_BUFFER_CAPACITY: usize = 100;
pub const DEFAULT_SCOPE_NAME: &str = "ScriptEngine";

/// Encoding the interpreter uses on its byte output channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Charset {
    #[default]
    Utf8,
    /// ISO-8859-1: every byte is one code point.
    Latin1,
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Charset::Utf8 => f.write_str("UTF-8"),
            Charset::Latin1 => f.write_str("ISO-8859-1"),
        }
    }
}

/// Settings fixed when an execution context is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub charset: Charset,
    pub output_buffer_capacity: usize,
    pub scope_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            charset: Charset::default(),
            output_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            scope_name: DEFAULT_SCOPE_NAME.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    /// Capacity of the output byte buffer. The bridge raises values below
    /// four, the longest UTF-8 sequence.
    pub fn with_output_buffer_capacity(mut self, capacity: usize) -> Self {
        self.output_buffer_capacity = capacity;
        self
    }

    pub fn with_scope_name(mut self, name: impl Into<String>) -> Self {
        self.scope_name = name.into();
        self
    }
}
