//! # Service descriptors and instances.
//!
//! A [`Descriptor`] is the registry's handle for one published service: its id,
//! ranking, provider and the [`Properties`] that queries are evaluated against.
//! The core only observes descriptors; it never creates or invalidates them.
//!
//! A [`ServiceInstance`] is the bound object itself, type-erased so that a single
//! registry can hold services of any capability type. Consumers get the typed view
//! back with [`ServiceInstance::downcast`].

use std::any::Any;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Reserved property holding the capability type names of a service.
pub const OBJECT_CLASS: &str = "objectClass";
/// Reserved property holding the registry-assigned id.
pub const SERVICE_ID: &str = "service.id";
/// Reserved property holding the ranking.
pub const SERVICE_RANKING: &str = "service.ranking";

/// Registry-assigned, monotonically increasing service identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceId(pub u64);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Value of a single service property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyValue {
    /// Text value.
    Str(String),
    /// Integer value; ordering comparisons are numeric.
    Int(i64),
    /// Boolean value.
    Bool(bool),
    /// Multi-valued text; a comparison matches if any element matches.
    List(Vec<String>),
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Str(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Str(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Int(i64::from(v))
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(v: Vec<String>) -> Self {
        PropertyValue::List(v)
    }
}

impl From<Vec<&str>> for PropertyValue {
    fn from(v: Vec<&str>) -> Self {
        PropertyValue::List(v.into_iter().map(str::to_string).collect())
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Str(s) => f.write_str(s),
            PropertyValue::Int(i) => write!(f, "{i}"),
            PropertyValue::Bool(b) => write!(f, "{b}"),
            PropertyValue::List(l) => write!(f, "{l:?}"),
        }
    }
}

/// Service properties with case-insensitive keys.
///
/// The original key spelling is kept for display; lookups ignore ASCII case.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Properties {
    entries: BTreeMap<String, (String, PropertyValue)>,
}

impl Properties {
    /// Creates an empty property set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts or replaces a property.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        let key = key.into();
        self.entries
            .insert(key.to_ascii_lowercase(), (key, value.into()));
    }

    /// Looks up a property ignoring key case.
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(|(_, v)| v)
    }

    /// Removes a property ignoring key case.
    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.entries
            .remove(&key.to_ascii_lowercase())
            .map(|(_, v)| v)
    }

    /// True if the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_lowercase())
    }

    /// Iterates over `(key, value)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.values().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registry handle for one concrete backing service.
///
/// Cheap to clone. Two descriptors are equal iff their ids and properties are equal,
/// so a `MODIFIED` event yields a descriptor that compares unequal to the old one.
#[derive(Clone, PartialEq, Eq)]
pub struct Descriptor {
    id: ServiceId,
    ranking: i32,
    provider: Arc<str>,
    properties: Arc<Properties>,
}

impl Descriptor {
    /// Creates a descriptor; the reserved properties are (re)written from the arguments.
    pub fn new(
        id: ServiceId,
        ranking: i32,
        provider: impl Into<Arc<str>>,
        mut properties: Properties,
    ) -> Self {
        properties.insert(SERVICE_ID, id.0 as i64);
        properties.insert(SERVICE_RANKING, ranking);
        Self {
            id,
            ranking,
            provider: provider.into(),
            properties: Arc::new(properties),
        }
    }

    /// Registry-assigned id.
    pub fn id(&self) -> ServiceId {
        self.id
    }

    /// Ranking; higher wins when several services match.
    pub fn ranking(&self) -> i32 {
        self.ranking
    }

    /// Identity of the publishing module (for logs and tie-breaks).
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Properties the service was published with.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Returns a copy with replaced properties (used by registries on modification).
    pub fn with_properties(&self, properties: Properties) -> Self {
        Self::new(self.id, self.ranking, Arc::clone(&self.provider), properties)
    }

    /// Preference order between candidates: highest ranking first, then lowest
    /// provider, then lowest id. `Ordering::Less` means `self` is preferred.
    pub fn preference(&self, other: &Descriptor) -> Ordering {
        other
            .ranking
            .cmp(&self.ranking)
            .then_with(|| self.provider.cmp(&other.provider))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("id", &self.id)
            .field("ranking", &self.ranking)
            .field("provider", &self.provider)
            .finish()
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service {} from '{}'", self.id, self.provider)
    }
}

/// Type-erased shared handle to a bound service.
///
/// Wraps an `Arc<S>` (where `S` may be a trait object) so that typed consumers
/// can recover exactly the capability they were declared against.
#[derive(Clone)]
pub struct ServiceInstance(Arc<dyn Any + Send + Sync>);

impl ServiceInstance {
    /// Wraps a shared service.
    pub fn new<S>(service: Arc<S>) -> Self
    where
        S: ?Sized + Send + Sync + 'static,
    {
        Self(Arc::new(service))
    }

    /// Returns the typed view if the instance was published as `S`.
    pub fn downcast<S>(&self) -> Option<Arc<S>>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        self.0.downcast_ref::<Arc<S>>().cloned()
    }
}

impl fmt::Debug for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServiceInstance(..)")
    }
}
