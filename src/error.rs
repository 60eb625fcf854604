//! Crate-wide error types.

use thiserror::Error;

/// Boxed cause of a failed module initialization.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum InitError {
    /// A confdict value was missing or could not be coerced.
    #[error("config error: {0}")]
    Config(String),

    /// Module initializations formed a cycle. Carries the module names
    /// along the cycle path, ending with the module that was re-entered.
    #[error("dependency loop: {}", .0.join(" -> "))]
    DependencyLoop(Vec<String>),

    /// A module's init hook failed.
    #[error("initialization of module '{module}' failed: {source}")]
    Module {
        module: String,
        #[source]
        source: BoxedError,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl InitError {
    /// Shorthand for [`InitError::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Wrap an arbitrary error as the failure of the named module.
    pub fn module(module: impl Into<String>, source: impl Into<BoxedError>) -> Self {
        Self::Module {
            module: module.into(),
            source: source.into(),
        }
    }
}
