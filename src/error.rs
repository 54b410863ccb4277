//! Error types used by proxies, dependency tracking and module bootstrap.
//!
//! This module defines the error taxonomy of the crate:
//!
//! - [`QueryError`] — a filter expression failed to parse.
//! - [`RegistryError`] — the registry rejected a call or is unavailable (never retried).
//! - [`ProxyError`] — a [`DynamicServiceProxy`](crate::DynamicServiceProxy) could not serve a call.
//! - [`ModuleError`] — a module hook (user code) failed.
//! - [`BootstrapError`] — a module bootstrap failed or timed out.
//! - [`RuntimeError`] — errors raised by the [`Bootstrapper`](crate::Bootstrapper) itself.
//!
//! All types provide helper methods (`as_label`, `as_message`) for logging/metrics.

use std::time::Duration;
use thiserror::Error;

/// # Malformed filter expression.
///
/// Raised once, when a [`ServiceQuery`](crate::ServiceQuery) is constructed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid filter at offset {position}: {reason}")]
pub struct QueryError {
    /// Byte offset in the filter text where parsing failed.
    pub position: usize,
    /// What the parser expected or found.
    pub reason: String,
}

impl QueryError {
    pub(crate) fn new(position: usize, reason: impl Into<String>) -> Self {
        Self {
            position,
            reason: reason.into(),
        }
    }
}

/// # Errors reported by a [`RegistryGateway`](crate::RegistryGateway).
///
/// These are surfaced immediately and never retried: retry only covers the
/// *absence* of a matching service, not a failing registry.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    /// The registry is shut down or otherwise not reachable.
    #[error("service registry unavailable")]
    Unavailable,

    /// The registry rejected the query.
    #[error("invalid query: {0}")]
    InvalidQuery(#[from] QueryError),

    /// Any other registry-side failure.
    #[error("registry fault: {error}")]
    Fault {
        /// The underlying error message.
        error: String,
    },
}

impl RegistryError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use tether::RegistryError;
    ///
    /// assert_eq!(RegistryError::Unavailable.as_label(), "registry_unavailable");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RegistryError::Unavailable => "registry_unavailable",
            RegistryError::InvalidQuery(_) => "registry_invalid_query",
            RegistryError::Fault { .. } => "registry_fault",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            RegistryError::Unavailable => "registry unavailable".to_string(),
            RegistryError::InvalidQuery(e) => format!("invalid query: {e}"),
            RegistryError::Fault { error } => format!("fault: {error}"),
        }
    }
}

/// # Errors produced by a dynamic service proxy.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ProxyError {
    /// A mandatory proxy could not bind within its retry budget at construction.
    #[error("mandatory service unavailable for {query} after {attempts} attempt(s)")]
    DependencyUnavailable {
        /// Compiled query of the proxy.
        query: String,
        /// Number of lookup attempts performed.
        attempts: u32,
    },

    /// No backing service was bound at call time, even after retrying.
    #[error("service unavailable for {query}")]
    ServiceUnavailable {
        /// Compiled query of the proxy.
        query: String,
    },

    /// The registry failed; not retried.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The wait was interrupted (proxy closed or caller cancelled).
    #[error("proxy wait cancelled")]
    Cancelled,
}

impl ProxyError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use tether::ProxyError;
    ///
    /// let err = ProxyError::ServiceUnavailable { query: "(objectClass=Clock)".into() };
    /// assert_eq!(err.as_label(), "proxy_service_unavailable");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ProxyError::DependencyUnavailable { .. } => "proxy_dependency_unavailable",
            ProxyError::ServiceUnavailable { .. } => "proxy_service_unavailable",
            ProxyError::Registry(_) => "proxy_registry_error",
            ProxyError::Cancelled => "proxy_cancelled",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            ProxyError::DependencyUnavailable { query, attempts } => {
                format!("no provider for {query} after {attempts} attempt(s)")
            }
            ProxyError::ServiceUnavailable { query } => format!("no provider for {query}"),
            ProxyError::Registry(e) => e.as_message(),
            ProxyError::Cancelled => "cancelled".to_string(),
        }
    }
}

/// # Failure raised by user code inside a [`Module`](crate::Module) hook.
#[derive(Error, Debug, Clone)]
#[error("{stage} failed: {error}")]
pub struct ModuleError {
    /// Hook that failed (`pre_initialize`, `complete_initialize`, ...).
    pub stage: &'static str,
    /// The underlying error message.
    pub error: String,
}

impl ModuleError {
    /// Creates a module error for the given hook.
    pub fn new(stage: &'static str, error: impl Into<String>) -> Self {
        Self {
            stage,
            error: error.into(),
        }
    }
}

/// # Errors produced while bootstrapping a module.
///
/// Every variant is reported only after the module was closed, so no
/// subscription or watchdog survives a failed bootstrap.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum BootstrapError {
    /// The watchdog fired before all mandatory dependencies appeared.
    #[error("bootstrap of '{module}' timed out after {timeout:?}; unsatisfied: {unsatisfied:?}")]
    Timeout {
        /// Module name.
        module: String,
        /// Configured wait.
        timeout: Duration,
        /// Dependencies still missing when the watchdog fired.
        unsatisfied: Vec<String>,
    },

    /// Dependency discovery or event handling hit a registry failure.
    #[error("bootstrap of '{module}' failed: {source}")]
    Registry {
        /// Module name.
        module: String,
        /// The registry error.
        #[source]
        source: RegistryError,
    },

    /// A module hook failed.
    #[error("bootstrap of '{module}' failed: {source}; unsatisfied: {unsatisfied:?}")]
    Module {
        /// Module name.
        module: String,
        /// The hook error.
        #[source]
        source: ModuleError,
        /// Dependencies still missing when the failure happened.
        unsatisfied: Vec<String>,
    },
}

impl BootstrapError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use tether::BootstrapError;
    /// use std::time::Duration;
    ///
    /// let err = BootstrapError::Timeout {
    ///     module: "billing".into(),
    ///     timeout: Duration::from_secs(1),
    ///     unsatisfied: vec![],
    /// };
    /// assert_eq!(err.as_label(), "bootstrap_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BootstrapError::Timeout { .. } => "bootstrap_timeout",
            BootstrapError::Registry { .. } => "bootstrap_registry_error",
            BootstrapError::Module { .. } => "bootstrap_module_error",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            BootstrapError::Timeout {
                timeout,
                unsatisfied,
                ..
            } => format!("timed out after {timeout:?}; unsatisfied={unsatisfied:?}"),
            BootstrapError::Registry { source, .. } => source.as_message(),
            BootstrapError::Module { source, .. } => source.to_string(),
        }
    }

    /// Dependencies that were still unsatisfied when the failure was reported.
    pub fn unsatisfied(&self) -> &[String] {
        match self {
            BootstrapError::Timeout { unsatisfied, .. }
            | BootstrapError::Module { unsatisfied, .. } => unsatisfied,
            BootstrapError::Registry { .. } => &[],
        }
    }
}

/// # Errors produced by the bootstrapper runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some modules did not finish closing.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of modules that were not closed in time.
        stuck: Vec<String>,
    },

    /// A module with the same name is already managed.
    #[error("module '{name}' already started")]
    ModuleExists {
        /// Module name.
        name: String,
    },

    /// No module with this name is managed.
    #[error("module '{name}' not found")]
    ModuleNotFound {
        /// Module name.
        name: String,
    },

    /// The module was rejected during bootstrap and has already been closed.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use tether::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::ModuleExists { .. } => "runtime_module_exists",
            RuntimeError::ModuleNotFound { .. } => "runtime_module_not_found",
            RuntimeError::Bootstrap(e) => e.as_label(),
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            RuntimeError::GraceExceeded { grace, stuck } => {
                format!("grace exceeded after {grace:?}; stuck modules={stuck:?}")
            }
            RuntimeError::ModuleExists { name } => format!("duplicate module: {name}"),
            RuntimeError::ModuleNotFound { name } => format!("unknown module: {name}"),
            RuntimeError::Bootstrap(e) => e.as_message(),
        }
    }
}
