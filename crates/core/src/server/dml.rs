use std::sync::Arc;

use super::{Status, TidSource};
use crate::db::Catalogue;
use crate::types::Value;

/// Data-manipulation surface: row inserts, single or batched.
pub struct DmlService {
    catalogue: Arc<Catalogue>,
    tids: Arc<TidSource>,
}

impl DmlService {
    pub(super) fn new(catalogue: Arc<Catalogue>, tids: Arc<TidSource>) -> Self {
        Self { catalogue, tids }
    }

    /// Insert one row; returns its tuple id.
    pub fn insert(
        &self,
        schema: &str,
        entity: &str,
        values: Vec<Option<Value>>,
    ) -> Result<i64, Status> {
        Ok(self.insert_batch(schema, entity, vec![values])?[0])
    }

    /// Insert a batch of rows in one transaction; all or nothing.
    pub fn insert_batch(
        &self,
        schema: &str,
        entity: &str,
        rows: Vec<Vec<Option<Value>>>,
    ) -> Result<Vec<i64>, Status> {
        let entity = self.catalogue.schema(schema)?.entity(entity)?;
        let mut tx = entity.begin(false, self.tids.fresh())?;
        let mut tuple_ids = Vec::with_capacity(rows.len());
        for row in rows {
            match tx.insert(row) {
                Ok(tuple_id) => tuple_ids.push(tuple_id),
                Err(e) => {
                    if let Err(re) = tx.rollback() {
                        log::warn!("rollback after failed insert also failed: {re}");
                    }
                    return Err(e.into());
                }
            }
        }
        tx.commit()?;
        tx.close();
        Ok(tuple_ids)
    }
}
