//! # Filter expressions.
//!
//! LDAP-style predicates over service [`Properties`]:
//!
//! ```text
//! filter     = "(" ( and | or | not | item ) ")"
//! and        = "&" filter+
//! or         = "|" filter+
//! not        = "!" filter
//! item       = attr ( "=" | "~=" | ">=" | "<=" ) value
//! value      = chars, "*" is a wildcard for "=", "\" escapes the next char
//! ```
//!
//! `(attr=*)` tests presence, `(attr=a*b*)` is a substring match.
//! Attribute names compare case-insensitively, text values case-sensitively
//! (except `~=`). Ordering operators are numeric against integer properties.
//!
//! A parsed [`Filter`] prints back in a normalized form, which is what query
//! equality is defined on.

use std::fmt::{self, Write as _};

use crate::error::QueryError;
use crate::registry::{Properties, PropertyValue};

/// Parsed filter expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equal { attr: String, value: String },
    Approx { attr: String, value: String },
    GreaterEq { attr: String, value: String },
    LessEq { attr: String, value: String },
    Present { attr: String },
    Substring {
        attr: String,
        initial: Option<String>,
        any: Vec<String>,
        last: Option<String>,
    },
}

impl Filter {
    /// Parses a complete filter expression.
    pub(crate) fn parse(src: &str) -> Result<Filter, QueryError> {
        let mut p = Parser { src, pos: 0 };
        p.skip_ws();
        let f = p.filter()?;
        p.skip_ws();
        if p.pos != src.len() {
            return Err(QueryError::new(p.pos, "trailing characters after filter"));
        }
        Ok(f)
    }

    /// Evaluates the filter against a property set.
    pub(crate) fn matches(&self, props: &Properties) -> bool {
        match self {
            Filter::And(fs) => fs.iter().all(|f| f.matches(props)),
            Filter::Or(fs) => fs.iter().any(|f| f.matches(props)),
            Filter::Not(f) => !f.matches(props),
            Filter::Present { attr } => props.contains(attr),
            Filter::Equal { attr, value } => {
                compare(props.get(attr), |v| match v {
                    Scalar::Text(s) => s == value.as_str(),
                    Scalar::Int(i) => value.trim().parse::<i64>() == Ok(i),
                    Scalar::Bool(b) => parse_bool(value) == Some(b),
                })
            }
            Filter::Approx { attr, value } => {
                let want = squash(value);
                compare(props.get(attr), |v| match v {
                    Scalar::Text(s) => squash(s) == want,
                    Scalar::Int(i) => value.trim().parse::<i64>() == Ok(i),
                    Scalar::Bool(b) => parse_bool(value) == Some(b),
                })
            }
            Filter::GreaterEq { attr, value } => {
                compare(props.get(attr), |v| match v {
                    Scalar::Text(s) => s >= value.as_str(),
                    Scalar::Int(i) => value.trim().parse::<i64>().is_ok_and(|w| i >= w),
                    Scalar::Bool(_) => false,
                })
            }
            Filter::LessEq { attr, value } => {
                compare(props.get(attr), |v| match v {
                    Scalar::Text(s) => s <= value.as_str(),
                    Scalar::Int(i) => value.trim().parse::<i64>().is_ok_and(|w| i <= w),
                    Scalar::Bool(_) => false,
                })
            }
            Filter::Substring {
                attr,
                initial,
                any,
                last,
            } => compare(props.get(attr), |v| match v {
                Scalar::Text(s) => substring_match(s, initial.as_deref(), any, last.as_deref()),
                _ => false,
            }),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(fs) => {
                f.write_str("(&")?;
                for c in fs {
                    write!(f, "{c}")?;
                }
                f.write_char(')')
            }
            Filter::Or(fs) => {
                f.write_str("(|")?;
                for c in fs {
                    write!(f, "{c}")?;
                }
                f.write_char(')')
            }
            Filter::Not(c) => write!(f, "(!{c})"),
            Filter::Equal { attr, value } => write!(f, "({attr}={})", Escaped(value)),
            Filter::Approx { attr, value } => write!(f, "({attr}~={})", Escaped(value)),
            Filter::GreaterEq { attr, value } => write!(f, "({attr}>={})", Escaped(value)),
            Filter::LessEq { attr, value } => write!(f, "({attr}<={})", Escaped(value)),
            Filter::Present { attr } => write!(f, "({attr}=*)"),
            Filter::Substring {
                attr,
                initial,
                any,
                last,
            } => {
                write!(f, "({attr}=")?;
                if let Some(s) = initial {
                    write!(f, "{}", Escaped(s))?;
                }
                for s in any {
                    write!(f, "*{}", Escaped(s))?;
                }
                f.write_char('*')?;
                if let Some(s) = last {
                    write!(f, "{}", Escaped(s))?;
                }
                f.write_char(')')
            }
        }
    }
}

struct Escaped<'a>(&'a str);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.0.chars() {
            if matches!(c, '\\' | '*' | '(' | ')') {
                f.write_char('\\')?;
            }
            f.write_char(c)?;
        }
        Ok(())
    }
}

/// Single comparable value (list properties are flattened into these).
enum Scalar<'a> {
    Text(&'a str),
    Int(i64),
    Bool(bool),
}

fn compare(value: Option<&PropertyValue>, mut pred: impl FnMut(Scalar<'_>) -> bool) -> bool {
    match value {
        None => false,
        Some(PropertyValue::Str(s)) => pred(Scalar::Text(s)),
        Some(PropertyValue::Int(i)) => pred(Scalar::Int(*i)),
        Some(PropertyValue::Bool(b)) => pred(Scalar::Bool(*b)),
        Some(PropertyValue::List(items)) => items.iter().any(|s| pred(Scalar::Text(s))),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Lowercased with whitespace removed, for `~=`.
fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn substring_match(s: &str, initial: Option<&str>, any: &[String], last: Option<&str>) -> bool {
    let mut rest = s;
    if let Some(pre) = initial {
        match rest.strip_prefix(pre) {
            Some(r) => rest = r,
            None => return false,
        }
    }
    for part in any {
        match rest.find(part.as_str()) {
            Some(at) => rest = &rest[at + part.len()..],
            None => return false,
        }
    }
    match last {
        Some(suf) => rest.ends_with(suf),
        None => true,
    }
}

/// Piece of a raw value: literal text or an unescaped `*`.
enum Piece {
    Text(String),
    Star,
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, want: u8) -> Result<(), QueryError> {
        match self.peek() {
            Some(b) if b == want => {
                self.pos += 1;
                Ok(())
            }
            Some(b) => Err(QueryError::new(
                self.pos,
                format!("expected '{}', found '{}'", want as char, b as char),
            )),
            None => Err(QueryError::new(
                self.pos,
                format!("expected '{}', found end of input", want as char),
            )),
        }
    }

    fn filter(&mut self) -> Result<Filter, QueryError> {
        self.skip_ws();
        self.expect(b'(')?;
        self.skip_ws();
        let f = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(QueryError::new(self.pos, "unexpected end of input")),
        };
        self.skip_ws();
        self.expect(b')')?;
        Ok(f)
    }

    fn list(&mut self) -> Result<Vec<Filter>, QueryError> {
        let start = self.pos;
        let mut out = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(b'(') {
                out.push(self.filter()?);
            } else {
                break;
            }
        }
        if out.is_empty() {
            return Err(QueryError::new(start, "composite filter without operands"));
        }
        Ok(out)
    }

    fn item(&mut self) -> Result<Filter, QueryError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b'=' | b'~' | b'<' | b'>' | b'(' | b')') {
                break;
            }
            self.pos += 1;
        }
        let attr = self.src[start..self.pos].trim().to_string();
        if attr.is_empty() {
            return Err(QueryError::new(start, "missing attribute name"));
        }

        let op = self.peek();
        match op {
            Some(b'=') => self.pos += 1,
            Some(b'~') | Some(b'<') | Some(b'>') => {
                self.pos += 1;
                self.expect(b'=')?;
            }
            _ => return Err(QueryError::new(self.pos, "expected comparison operator")),
        }

        let pieces = self.value()?;
        let filter = match op {
            Some(b'=') => Self::equality(attr, pieces),
            Some(b'~') => Filter::Approx {
                attr,
                value: literal(pieces),
            },
            Some(b'>') => Filter::GreaterEq {
                attr,
                value: literal(pieces),
            },
            _ => Filter::LessEq {
                attr,
                value: literal(pieces),
            },
        };
        Ok(filter)
    }

    fn value(&mut self) -> Result<Vec<Piece>, QueryError> {
        let mut pieces = Vec::new();
        let mut text = String::new();
        let rest = &self.src[self.pos..];
        let mut chars = rest.char_indices();

        while let Some((off, c)) = chars.next() {
            match c {
                ')' => {
                    self.pos += off;
                    if !text.is_empty() {
                        pieces.push(Piece::Text(text));
                    }
                    return Ok(pieces);
                }
                '(' => {
                    return Err(QueryError::new(self.pos + off, "unescaped '(' in value"));
                }
                '*' => {
                    if !text.is_empty() {
                        pieces.push(Piece::Text(std::mem::take(&mut text)));
                    }
                    pieces.push(Piece::Star);
                }
                '\\' => match chars.next() {
                    Some((_, escaped)) => text.push(escaped),
                    None => {
                        return Err(QueryError::new(self.pos + off, "dangling escape"));
                    }
                },
                other => text.push(other),
            }
        }
        Err(QueryError::new(self.src.len(), "unterminated value"))
    }

    fn equality(attr: String, pieces: Vec<Piece>) -> Filter {
        if !pieces.iter().any(|p| matches!(p, Piece::Star)) {
            return Filter::Equal {
                attr,
                value: literal(pieces),
            };
        }
        if pieces.len() == 1 {
            return Filter::Present { attr };
        }

        // split into the segments between stars; empty segments collapse
        let mut segments: Vec<String> = vec![String::new()];
        for p in pieces {
            match p {
                Piece::Text(t) => {
                    if let Some(seg) = segments.last_mut() {
                        seg.push_str(&t);
                    }
                }
                Piece::Star => segments.push(String::new()),
            }
        }
        let last_seg = segments.pop().filter(|s| !s.is_empty());
        let mut iter = segments.into_iter();
        let initial = iter.next().filter(|s| !s.is_empty());
        let any = iter.filter(|s| !s.is_empty()).collect();

        Filter::Substring {
            attr,
            initial,
            any,
            last: last_seg,
        }
    }
}

fn literal(pieces: Vec<Piece>) -> String {
    let mut out = String::new();
    for p in pieces {
        match p {
            Piece::Text(t) => out.push_str(&t),
            Piece::Star => out.push('*'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> Properties {
        Properties::new()
            .with("objectClass", vec!["app::Clock", "app::Ticker"])
            .with("vendor", "Acme Corp")
            .with("port", 8080)
            .with("secure", true)
    }

    #[test]
    fn test_parse_and_print_normalizes_whitespace() {
        let f = Filter::parse(" ( & (vendor=Acme Corp) ( port>=80) ) ").unwrap();
        assert_eq!(f.to_string(), "(&(vendor=Acme Corp)(port>=80))");
    }

    #[test]
    fn test_equality_and_lists() {
        let p = props();
        assert!(Filter::parse("(objectClass=app::Ticker)").unwrap().matches(&p));
        assert!(!Filter::parse("(objectClass=app::Other)").unwrap().matches(&p));
        assert!(Filter::parse("(port=8080)").unwrap().matches(&p));
        assert!(Filter::parse("(secure=TRUE)").unwrap().matches(&p));
        assert!(Filter::parse("(VENDOR=Acme Corp)").unwrap().matches(&p));
    }

    #[test]
    fn test_presence_substring_and_approx() {
        let p = props();
        assert!(Filter::parse("(vendor=*)").unwrap().matches(&p));
        assert!(!Filter::parse("(missing=*)").unwrap().matches(&p));
        assert!(Filter::parse("(vendor=Ac*Co*)").unwrap().matches(&p));
        assert!(Filter::parse("(vendor=*Corp)").unwrap().matches(&p));
        assert!(!Filter::parse("(vendor=*Inc)").unwrap().matches(&p));
        assert!(Filter::parse("(vendor~=acmecorp)").unwrap().matches(&p));
    }

    #[test]
    fn test_ordering_is_numeric_for_integers() {
        let p = props();
        assert!(Filter::parse("(port>=1000)").unwrap().matches(&p));
        assert!(!Filter::parse("(port<=999)").unwrap().matches(&p));
    }

    #[test]
    fn test_composites() {
        let p = props();
        assert!(Filter::parse("(|(port=1)(vendor=Acme Corp))").unwrap().matches(&p));
        assert!(!Filter::parse("(&(port=1)(vendor=Acme Corp))").unwrap().matches(&p));
        assert!(Filter::parse("(!(port=1))").unwrap().matches(&p));
    }

    #[test]
    fn test_escapes_round_trip() {
        let f = Filter::parse(r"(name=a\*b\(c\))").unwrap();
        assert_eq!(
            f,
            Filter::Equal {
                attr: "name".into(),
                value: "a*b(c)".into()
            }
        );
        assert_eq!(f.to_string(), r"(name=a\*b\(c\))");
        assert_eq!(Filter::parse(&f.to_string()).unwrap(), f);
    }

    #[test]
    fn test_substring_shape() {
        let f = Filter::parse("(name=ab*cd*)").unwrap();
        assert_eq!(
            f,
            Filter::Substring {
                attr: "name".into(),
                initial: Some("ab".into()),
                any: vec!["cd".into()],
                last: None,
            }
        );
        assert_eq!(f.to_string(), "(name=ab*cd*)");
    }

    #[test]
    fn test_malformed_filters_report_position() {
        for (src, pos) in [
            ("", 0),
            ("(port=80", 8),
            ("(=80)", 1),
            ("(port 80)", 8),
            ("(&)", 2),
            ("(port=80))", 9),
            ("(a=(b))", 3),
        ] {
            let err = Filter::parse(src).unwrap_err();
            assert_eq!(err.position, pos, "source {src:?}: {err}");
        }
    }
}
