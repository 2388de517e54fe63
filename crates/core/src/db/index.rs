use std::fmt;
use std::str::FromStr;

use crate::error::CatalogError;
use crate::types::{Name, Recordset, Value};

/// Secondary index kinds the DDL surface recognizes.
///
/// None of these has an execution path in this engine; queries always go
/// through the uniform scan (and the kNN operator on top of it). Creating
/// one is rejected at the DDL layer, but the kind names are kept so that
/// requests written against the full surface fail with a precise error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    Hash,
    BTree,
    Lucene,
    VaFile,
    Pq,
    Lsh,
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexType::Hash => "HASH",
            IndexType::BTree => "BTREE",
            IndexType::Lucene => "LUCENE",
            IndexType::VaFile => "VAF",
            IndexType::Pq => "PQ",
            IndexType::Lsh => "LSH",
        };
        f.write_str(name)
    }
}

impl FromStr for IndexType {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HASH" => Ok(IndexType::Hash),
            "BTREE" => Ok(IndexType::BTree),
            "LUCENE" => Ok(IndexType::Lucene),
            "VAF" => Ok(IndexType::VaFile),
            "PQ" => Ok(IndexType::Pq),
            "LSH" => Ok(IndexType::Lsh),
            other => Err(CatalogError::UnsupportedIndex(other.to_owned())),
        }
    }
}

/// Contract for a pluggable secondary index over one entity.
///
/// An implementation maintains its structure from the rows it is fed and
/// answers point lookups with the matching tuple ids. Maintenance on write
/// and consultation during planning would hang off this trait; the engine
/// itself ships no implementation.
pub trait Index: Send + Sync {
    fn name(&self) -> &Name;
    fn index_type(&self) -> IndexType;
    /// The columns the index covers, in order.
    fn columns(&self) -> &[Name];
    /// Rebuild the index from a full scan of its entity.
    fn rebuild(&mut self, rows: &Recordset) -> crate::error::Result<()>;
    /// Tuple ids whose indexed columns equal `key`.
    fn lookup(&self, key: &[Value]) -> crate::error::Result<Vec<i64>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_roundtrip() {
        for kind in [
            IndexType::Hash,
            IndexType::BTree,
            IndexType::Lucene,
            IndexType::VaFile,
            IndexType::Pq,
            IndexType::Lsh,
        ] {
            assert_eq!(kind.to_string().parse::<IndexType>().unwrap(), kind);
        }
        assert!(matches!(
            "vptree".parse::<IndexType>(),
            Err(CatalogError::UnsupportedIndex(_))
        ));
    }
}
