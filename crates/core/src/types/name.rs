use std::fmt;

use crate::error::ValidationError;

/// A dotted hierarchical identifier.
///
/// Names are value types: case-sensitive, ordered, hashable, and used as
/// map keys throughout the catalogue tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Name {
    /// One segment, e.g. `vectors`.
    Simple(String),
    /// Fully qualified, e.g. `shop.products.embedding`.
    Fqn(Vec<String>),
    /// A qualified prefix with a trailing `*`, e.g. `shop.products.*`.
    Wildcard(Vec<String>),
}

impl Name {
    pub fn simple(segment: impl Into<String>) -> Self {
        Name::Simple(segment.into())
    }

    /// Parse a dotted name. A single segment is [`Name::Simple`]; a trailing
    /// `*` segment makes a [`Name::Wildcard`] over the preceding prefix.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let segments: Vec<&str> = s.split('.').collect();
        if segments.iter().any(|seg| seg.is_empty()) {
            return Err(ValidationError::InvalidName(s.to_owned()));
        }
        if segments.iter().rev().skip(1).any(|seg| *seg == "*") {
            return Err(ValidationError::InvalidName(s.to_owned()));
        }
        match segments.as_slice() {
            ["*"] => Err(ValidationError::InvalidName(s.to_owned())),
            [one] => Ok(Name::Simple((*one).to_owned())),
            [prefix @ .., "*"] => Ok(Name::Wildcard(
                prefix.iter().map(|s| (*s).to_owned()).collect(),
            )),
            all => Ok(Name::Fqn(all.iter().map(|s| (*s).to_owned()).collect())),
        }
    }

    pub fn is_simple(&self) -> bool {
        matches!(self, Name::Simple(_))
    }

    pub fn as_simple(&self) -> Option<&str> {
        match self {
            Name::Simple(s) => Some(s),
            _ => None,
        }
    }

    /// The last concrete segment.
    pub fn last(&self) -> &str {
        match self {
            Name::Simple(s) => s,
            Name::Fqn(segs) | Name::Wildcard(segs) => {
                segs.last().map(String::as_str).unwrap_or_default()
            }
        }
    }

    /// Whether `self`, if a wildcard, covers `other`; exact equality
    /// otherwise.
    pub fn matches(&self, other: &Name) -> bool {
        match (self, other) {
            (Name::Wildcard(prefix), Name::Fqn(segs)) => {
                segs.len() > prefix.len() && segs[..prefix.len()] == prefix[..]
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Name::Simple(s) => f.write_str(s),
            Name::Fqn(segs) => f.write_str(&segs.join(".")),
            Name::Wildcard(segs) => write!(f, "{}.*", segs.join(".")),
        }
    }
}
