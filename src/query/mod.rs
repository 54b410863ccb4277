//! # Service queries.
//!
//! A [`ServiceQuery`] selects registry services by capability type names plus an
//! optional [filter](self#filter-language). It is compiled once into a canonical
//! predicate string; two queries are equal iff their compiled strings are equal.
//!
//! ```text
//! types = [B, A], filter = (vendor=acme)
//!   → (&(objectClass=A)(objectClass=B)(vendor=acme))
//! ```
//!
//! ## Filter language
//! LDAP-style: `(attr=value)`, `(attr~=value)`, `(attr>=n)`, `(attr<=n)`,
//! `(attr=*)`, `(attr=pre*mid*)`, composed with `&`, `|` and `!`.

mod filter;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::QueryError;
use crate::registry::{Properties, OBJECT_CLASS};

use filter::Filter;

/// Compiled selector for registry services.
///
/// Cheap to clone; immutable after construction.
#[derive(Clone)]
pub struct ServiceQuery {
    filter: Arc<Filter>,
    compiled: Arc<str>,
}

impl ServiceQuery {
    /// Builds a query from capability type names and an optional filter.
    ///
    /// Type names are sorted and deduplicated so declaration order does not
    /// affect equality. Fails if the filter text is malformed.
    pub fn new<I, T>(types: I, filter: Option<&str>) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut names: Vec<String> = types.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();

        let mut terms: Vec<Filter> = names
            .into_iter()
            .map(|value| Filter::Equal {
                attr: OBJECT_CLASS.to_string(),
                value,
            })
            .collect();
        if let Some(text) = filter {
            terms.push(Filter::parse(text)?);
        }

        let filter = match terms.len() {
            0 => Filter::Present {
                attr: OBJECT_CLASS.to_string(),
            },
            1 => terms.remove(0),
            _ => Filter::And(terms),
        };
        Ok(Self::from_parsed(filter))
    }

    /// Query for services published under the Rust type name of `S`.
    pub fn of<S: ?Sized>() -> Self {
        Self::from_parsed(Filter::Equal {
            attr: OBJECT_CLASS.to_string(),
            value: std::any::type_name::<S>().to_string(),
        })
    }

    /// Query from a raw filter only, without type constraints.
    pub fn from_filter(filter: &str) -> Result<Self, QueryError> {
        Ok(Self::from_parsed(Filter::parse(filter)?))
    }

    /// Narrows this query with an additional filter.
    pub fn with_filter(&self, filter: &str) -> Result<Self, QueryError> {
        let extra = Filter::parse(filter)?;
        let mut terms = match self.filter.as_ref() {
            Filter::And(terms) => terms.clone(),
            other => vec![other.clone()],
        };
        terms.push(extra);
        Ok(Self::from_parsed(Filter::And(terms)))
    }

    /// Query matching a service that satisfies any of the given queries.
    ///
    /// Returns `None` for an empty input.
    pub fn any_of<'a>(queries: impl IntoIterator<Item = &'a ServiceQuery>) -> Option<Self> {
        let mut parts: Vec<Filter> = queries
            .into_iter()
            .map(|q| q.filter.as_ref().clone())
            .collect();
        match parts.len() {
            0 => None,
            1 => parts.pop().map(Self::from_parsed),
            _ => Some(Self::from_parsed(Filter::Or(parts))),
        }
    }

    /// True if a service with these properties is selected by the query.
    pub fn matches(&self, properties: &Properties) -> bool {
        self.filter.matches(properties)
    }

    /// Canonical predicate string.
    pub fn as_str(&self) -> &str {
        &self.compiled
    }

    fn from_parsed(filter: Filter) -> Self {
        let compiled: Arc<str> = filter.to_string().into();
        Self {
            filter: Arc::new(filter),
            compiled,
        }
    }
}

impl PartialEq for ServiceQuery {
    fn eq(&self, other: &Self) -> bool {
        self.compiled == other.compiled
    }
}

impl Eq for ServiceQuery {}

impl Hash for ServiceQuery {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.compiled.hash(state);
    }
}

impl fmt::Display for ServiceQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.compiled)
    }
}

impl fmt::Debug for ServiceQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ServiceQuery").field(&self.compiled).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Clock {}

    #[test]
    fn test_compiled_form_is_canonical() {
        let a = ServiceQuery::new(["B", "A"], Some("(vendor=acme)")).unwrap();
        let b = ServiceQuery::new(["A", "B", "A"], Some(" (vendor=acme) ")).unwrap();
        assert_eq!(
            a.as_str(),
            "(&(objectClass=A)(objectClass=B)(vendor=acme))"
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_term_has_no_conjunction() {
        let q = ServiceQuery::new(["A"], None).unwrap();
        assert_eq!(q.as_str(), "(objectClass=A)");
    }

    #[test]
    fn test_of_uses_type_name() {
        let q = ServiceQuery::of::<dyn Clock>();
        let props = Properties::new().with(OBJECT_CLASS, vec![std::any::type_name::<dyn Clock>()]);
        assert!(q.matches(&props));
        assert!(!q.matches(&Properties::new().with(OBJECT_CLASS, "other")));
    }

    #[test]
    fn test_any_of_and_with_filter() {
        let a = ServiceQuery::new(["A"], None).unwrap();
        let b = ServiceQuery::new(["B"], None).unwrap();
        let either = ServiceQuery::any_of([&a, &b]).unwrap();
        assert_eq!(either.as_str(), "(|(objectClass=A)(objectClass=B))");
        assert!(either.matches(&Properties::new().with(OBJECT_CLASS, "B")));
        assert!(ServiceQuery::any_of([]).is_none());

        let narrowed = a.with_filter("(port>=10)").unwrap();
        assert_eq!(narrowed.as_str(), "(&(objectClass=A)(port>=10))");
        assert!(narrowed.matches(&Properties::new().with(OBJECT_CLASS, "A").with("port", 12)));
        assert!(!narrowed.matches(&Properties::new().with(OBJECT_CLASS, "A").with("port", 2)));
    }

    #[test]
    fn test_malformed_filter_is_rejected() {
        let err = ServiceQuery::new(["A"], Some("(vendor=acme")).unwrap_err();
        assert_eq!(err.position, 12);
    }
}
