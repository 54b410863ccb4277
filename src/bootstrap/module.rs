//! # Module contract.
//!
//! A [`Module`] is the unit the bootstrapper starts: its object graph is built
//! in two stages around the wait for its [`Dependency`]s.
//!
//! ```text
//! pre_initialize() ─► dependencies() ─► (wait) ─► complete_initialize() ─► ... ─► shutdown()
//!                                          └─ timeout / error ─► on_failure(&err)
//! ```
//!
//! All hooks run outside the executor's locks. `complete_initialize` runs on a
//! worker task unless every dependency was present at once.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{BootstrapError, ModuleError};
use crate::query::ServiceQuery;

/// External service a module needs.
#[derive(Clone)]
pub struct Dependency {
    query: ServiceQuery,
    label: Arc<str>,
    mandatory: bool,
}

impl Dependency {
    /// A dependency the module cannot start without.
    pub fn mandatory(label: impl Into<Arc<str>>, query: ServiceQuery) -> Self {
        Self {
            query,
            label: label.into(),
            mandatory: true,
        }
    }

    /// A dependency the module tolerates being absent (never waited for).
    pub fn optional(label: impl Into<Arc<str>>, query: ServiceQuery) -> Self {
        Self {
            query,
            label: label.into(),
            mandatory: false,
        }
    }

    /// Query selecting providers.
    pub fn query(&self) -> &ServiceQuery {
        &self.query
    }

    /// Name used in diagnostics.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// True if bootstrap waits for it.
    pub fn is_mandatory(&self) -> bool {
        self.mandatory
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("label", &self.label)
            .field("query", &self.query.as_str())
            .field("mandatory", &self.mandatory)
            .finish()
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.label, self.query)
    }
}

/// Object-graph builder of one module.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// Unique module name.
    fn name(&self) -> &str;

    /// First stage: build what does not need external services.
    async fn pre_initialize(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Services the module depends on; asked once, after `pre_initialize`.
    fn dependencies(&self) -> Vec<Dependency> {
        Vec::new()
    }

    /// Second stage: finish the graph once every mandatory dependency is present.
    async fn complete_initialize(&self) -> Result<(), ModuleError>;

    /// Tears down a started module.
    async fn shutdown(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Told about a failed bootstrap, after the module was closed.
    async fn on_failure(&self, error: &BootstrapError) {
        let _ = error;
    }
}
