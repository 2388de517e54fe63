use std::sync::Arc;

use super::{Status, TidSource};
use crate::db::{Catalogue, IndexType};
use crate::error::CatalogError;
use crate::types::{ColumnDef, Name};

/// Data-definition surface: schema and entity lifecycle, index DDL.
pub struct DdlService {
    catalogue: Arc<Catalogue>,
    tids: Arc<TidSource>,
}

/// Response of [`DdlService::entity_details`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDetails {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub rows: i64,
}

impl DdlService {
    pub(super) fn new(catalogue: Arc<Catalogue>, tids: Arc<TidSource>) -> Self {
        Self { catalogue, tids }
    }

    pub fn list_schemas(&self) -> Vec<String> {
        self.catalogue.schemas()
    }

    pub fn create_schema(&self, name: &str) -> Result<(), Status> {
        let name = Name::parse(name).map_err(crate::error::QuiverError::from)?;
        self.catalogue.create_schema(&name)?;
        Ok(())
    }

    pub fn drop_schema(&self, name: &str) -> Result<(), Status> {
        let name = Name::parse(name).map_err(crate::error::QuiverError::from)?;
        self.catalogue.drop_schema(&name)?;
        Ok(())
    }

    pub fn list_entities(&self, schema: &str) -> Result<Vec<String>, Status> {
        Ok(self.catalogue.schema(schema)?.entities())
    }

    pub fn create_entity(
        &self,
        schema: &str,
        name: &str,
        columns: &[ColumnDef],
    ) -> Result<(), Status> {
        self.catalogue.schema(schema)?.create_entity(name, columns)?;
        Ok(())
    }

    pub fn drop_entity(&self, schema: &str, name: &str) -> Result<(), Status> {
        self.catalogue.schema(schema)?.drop_entity(name)?;
        Ok(())
    }

    pub fn entity_details(&self, schema: &str, name: &str) -> Result<EntityDetails, Status> {
        let entity = self.catalogue.schema(schema)?.entity(name)?;
        let mut tx = entity.begin(true, self.tids.fresh())?;
        let rows = tx.count()?;
        tx.close();
        Ok(EntityDetails {
            name: name.to_owned(),
            columns: entity.columns().iter().map(|c| c.def().clone()).collect(),
            rows,
        })
    }

    /// Index DDL. Every kind the surface names is rejected here: the engine
    /// executes the uniform scan path only.
    pub fn create_index(
        &self,
        schema: &str,
        entity: &str,
        _name: &str,
        index_type: IndexType,
        _columns: &[String],
    ) -> Result<(), Status> {
        // Resolve first so a bad address reports NotFound, not the kind.
        self.catalogue.schema(schema)?.entity(entity)?;
        Err(crate::error::QuiverError::from(CatalogError::UnsupportedIndex(
            index_type.to_string(),
        ))
        .into())
    }

    pub fn drop_index(&self, schema: &str, entity: &str, name: &str) -> Result<(), Status> {
        self.catalogue.schema(schema)?.entity(entity)?;
        Err(Status::not_found(format!(
            "no index named `{name}` exists on `{schema}.{entity}`"
        )))
    }
}
