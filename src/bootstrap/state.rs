use std::fmt;

/// Bootstrap state of one module.
///
/// ```text
/// Initialized ──► ResolvingDependencies ──► DependenciesResolved ──► Started ──► Stopped
///        │                 │                        │
///        └─────────────────┴────────────────────────┴──────────────► Interrupted
/// ```
///
/// `Stopped` and `Interrupted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootstrapState {
    /// Created, not refreshed yet.
    Initialized,
    /// Waiting for mandatory dependencies.
    ResolvingDependencies,
    /// All dependencies present; stage two scheduled.
    DependenciesResolved,
    /// Fully initialized.
    Started,
    /// Closed after it started.
    Stopped,
    /// Closed before it started (stop request, timeout or failure).
    Interrupted,
}

impl BootstrapState {
    /// True for the terminal states.
    pub fn is_down(&self) -> bool {
        matches!(self, BootstrapState::Stopped | BootstrapState::Interrupted)
    }

    /// True once every mandatory dependency was seen.
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            BootstrapState::DependenciesResolved | BootstrapState::Started | BootstrapState::Stopped
        )
    }

    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            BootstrapState::Initialized => "initialized",
            BootstrapState::ResolvingDependencies => "resolving_dependencies",
            BootstrapState::DependenciesResolved => "dependencies_resolved",
            BootstrapState::Started => "started",
            BootstrapState::Stopped => "stopped",
            BootstrapState::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}
