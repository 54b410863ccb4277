use crate::registry::Descriptor;

/// Observer of a proxy's binding changes.
///
/// Invoked synchronously on the thread that caused the change (often a
/// registry delivery thread), after the binding swap and outside the proxy
/// lock. Implementations must not block.
pub trait BindingListener: Send + Sync + 'static {
    /// The proxy is now backed by `descriptor`.
    fn bound(&self, descriptor: &Descriptor) {
        let _ = descriptor;
    }

    /// The proxy lost `descriptor`.
    fn unbound(&self, descriptor: &Descriptor) {
        let _ = descriptor;
    }
}
