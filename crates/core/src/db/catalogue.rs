use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use quiverdb_recordstore::{RecordId, RecordStore, StoreOptions};

use super::schema::{register_child, unregister_child, Schema};
use super::{DescriptorCodec, DirectoryHeader, DirectoryHeaderCodec, Dbo, HEADER_RECID};
use crate::error::{CatalogError, QuiverError, Result, TxError, ValidationError};
use crate::types::Name;

const CATALOGUE_STORE: &str = "catalogue.db";

fn schema_dir_name(name: &str) -> String {
    format!("schema_{name}")
}

/// The persistent root of the object tree: a registry of schemas backed by
/// a record store under the data directory.
///
/// The in-memory registry is loaded eagerly at open and guarded by a
/// read-write lock: enumeration and lookup under the read side, create and
/// drop under the write side.
#[derive(Debug)]
pub struct Catalogue {
    name: Name,
    root: PathBuf,
    store: Mutex<RecordStore>,
    registry: RwLock<BTreeMap<String, (RecordId, Arc<Schema>)>>,
    options: StoreOptions,
    closed: AtomicBool,
}

impl Catalogue {
    /// Open (or initialize) the catalogue under `root`.
    ///
    /// Corruption discovered while loading — a dangling descriptor or a
    /// missing schema directory — is fatal: everything already opened is
    /// closed again and the error returned.
    #[tracing::instrument(skip_all, fields(root = %root.as_ref().display()))]
    pub fn open(root: impl AsRef<Path>, options: StoreOptions) -> Result<Arc<Self>> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        let mut store = RecordStore::open(root.join(CATALOGUE_STORE), options)?;

        let header = match store.get(HEADER_RECID, &DirectoryHeaderCodec)? {
            Some(header) => header,
            None => {
                let header = DirectoryHeader::new();
                let recid = store.put(&header, &DirectoryHeaderCodec)?;
                if recid != HEADER_RECID {
                    return Err(QuiverError::corruption(format!(
                        "catalogue store in {} is not fresh: header landed at record {recid}",
                        root.display()
                    )));
                }
                store.commit()?;
                header
            }
        };

        let mut registry = BTreeMap::new();
        let mut load = || -> Result<()> {
            for &recid in &header.child_recids {
                let schema_name = store.get(recid, &DescriptorCodec)?.ok_or_else(|| {
                    QuiverError::corruption(format!("dangling schema descriptor record {recid}"))
                })?;
                let dir = root.join(schema_dir_name(&schema_name));
                if !dir.is_dir() {
                    return Err(QuiverError::corruption(format!(
                        "schema directory missing: {}",
                        dir.display()
                    )));
                }
                let schema = Schema::open(&dir, &schema_name, options)?;
                registry.insert(schema_name, (recid, schema));
            }
            Ok(())
        };
        if let Err(e) = load() {
            for (_, schema) in registry.values() {
                schema.close();
            }
            let _ = store.close();
            return Err(e);
        }

        log::info!(
            "opened catalogue at {} with {} schemas",
            root.display(),
            registry.len()
        );
        Ok(Arc::new(Self {
            name: Name::simple("catalogue"),
            root: root.to_owned(),
            store: Mutex::new(store),
            registry: RwLock::new(registry),
            options,
            closed: AtomicBool::new(false),
        }))
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(TxError::DboClosed(self.name.to_string()).into());
        }
        Ok(())
    }

    /// Create a schema. The name must be simple (single-segment).
    ///
    /// On a storage failure the partially created directory is deleted and
    /// the catalogue store rolled back.
    pub fn create_schema(&self, name: &Name) -> Result<Arc<Schema>> {
        self.check_open()?;
        let Some(simple) = name.as_simple() else {
            return Err(ValidationError::SimpleNameRequired(name.to_string()).into());
        };

        let mut registry = self.registry.write();
        if registry.contains_key(simple) {
            return Err(CatalogError::SchemaAlreadyExists(simple.to_owned()).into());
        }

        let dir = self.root.join(schema_dir_name(simple));
        let created = (|| -> Result<(Arc<Schema>, RecordId)> {
            std::fs::create_dir_all(&dir)?;
            let schema = Schema::create(&dir, simple, self.options)?;
            let mut store = self.store.lock();
            match register_child(&mut store, simple) {
                Ok(recid) => Ok((schema, recid)),
                Err(e) => {
                    if let Err(re) = store.rollback() {
                        log::warn!("rollback after failed schema registration failed: {re}");
                    }
                    schema.close();
                    Err(e)
                }
            }
        })();

        match created {
            Ok((schema, recid)) => {
                registry.insert(simple.to_owned(), (recid, schema.clone()));
                log::debug!("created schema {simple}");
                Ok(schema)
            }
            Err(e) => {
                let _ = std::fs::remove_dir_all(&dir);
                Err(e)
            }
        }
    }

    /// Drop a schema: close it, unregister it, commit, delete its folder.
    pub fn drop_schema(&self, name: &Name) -> Result<()> {
        self.check_open()?;
        let mut registry = self.registry.write();
        let (recid, schema) = registry
            .get(name.last())
            .cloned()
            .ok_or_else(|| CatalogError::SchemaDoesNotExist(name.to_string()))?;

        schema.close();
        let mut store = self.store.lock();
        if let Err(e) = unregister_child(&mut store, recid) {
            if let Err(re) = store.rollback() {
                log::warn!("rollback after failed schema drop failed: {re}");
            }
            return Err(e);
        }
        drop(store);

        registry.remove(name.last());
        std::fs::remove_dir_all(self.root.join(schema_dir_name(name.last())))?;
        log::debug!("dropped schema {name}");
        Ok(())
    }

    /// Names of all registered schemas, sorted.
    pub fn schemas(&self) -> Vec<String> {
        self.registry.read().keys().cloned().collect()
    }

    pub fn schema(&self, name: &str) -> Result<Arc<Schema>> {
        self.check_open()?;
        self.registry
            .read()
            .get(name)
            .map(|(_, schema)| schema.clone())
            .ok_or_else(|| CatalogError::SchemaDoesNotExist(name.to_owned()).into())
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }
}

impl Dbo for Catalogue {
    fn name(&self) -> &Name {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.root
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for (_, schema) in self.registry.read().values() {
            schema.close();
        }
        if let Err(e) = self.store.lock().close() {
            log::warn!("error closing catalogue store: {e}");
        }
        log::info!("closed catalogue at {}", self.root.display());
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Catalogue {
    fn drop(&mut self) {
        if !self.is_closed() {
            log::warn!("catalogue dropped while still open; closing (resource leak)");
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuiverError;
    use crate::types::{ColumnDef, ColumnType};
    use pretty_assertions::assert_eq;
    use quiverdb_recordstore::StorageError;
    use tempfile::TempDir;

    fn open(tmp: &TempDir) -> Arc<Catalogue> {
        Catalogue::open(tmp.path(), StoreOptions::default()).unwrap()
    }

    #[test]
    fn create_drop_recreate_schema() {
        let tmp = TempDir::with_prefix("catalogue").unwrap();
        let catalogue = open(&tmp);
        let name = Name::simple("s1");

        catalogue.create_schema(&name).unwrap();
        assert_eq!(catalogue.schemas(), vec!["s1"]);

        catalogue.drop_schema(&name).unwrap();
        assert_eq!(catalogue.schemas(), Vec::<String>::new());
        assert!(!tmp.path().join("schema_s1").exists());

        // Recreation gets a fresh folder.
        catalogue.create_schema(&name).unwrap();
        assert_eq!(catalogue.schemas(), vec!["s1"]);
        assert!(tmp.path().join("schema_s1").is_dir());
        catalogue.close();
    }

    #[test]
    fn duplicate_schema_is_rejected() {
        let tmp = TempDir::with_prefix("catalogue").unwrap();
        let catalogue = open(&tmp);
        let name = Name::simple("s1");

        catalogue.create_schema(&name).unwrap();
        assert!(matches!(
            catalogue.create_schema(&name),
            Err(QuiverError::Catalog(CatalogError::SchemaAlreadyExists(_)))
        ));
        assert_eq!(catalogue.schemas().len(), 1);
        catalogue.close();
    }

    #[test]
    fn concurrent_creates_leave_exactly_one_schema() {
        let tmp = TempDir::with_prefix("catalogue").unwrap();
        let catalogue = open(&tmp);

        let results: Vec<bool> = std::thread::scope(|scope| {
            (0..2)
                .map(|_| {
                    let catalogue = catalogue.clone();
                    scope.spawn(move || catalogue.create_schema(&Name::simple("race")).is_ok())
                })
                .collect::<Vec<_>>()
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect()
        });

        assert_eq!(results.iter().filter(|ok| **ok).count(), 1);
        assert_eq!(catalogue.schemas(), vec!["race"]);
        catalogue.close();
    }

    #[test]
    fn fqn_schema_name_is_rejected() {
        let tmp = TempDir::with_prefix("catalogue").unwrap();
        let catalogue = open(&tmp);
        assert!(matches!(
            catalogue.create_schema(&Name::parse("a.b").unwrap()),
            Err(QuiverError::Validation(ValidationError::SimpleNameRequired(_)))
        ));
        catalogue.close();
    }

    #[test]
    fn tree_survives_reopen() {
        let tmp = TempDir::with_prefix("catalogue").unwrap();
        {
            let catalogue = open(&tmp);
            let schema = catalogue.create_schema(&Name::simple("shop")).unwrap();
            schema
                .create_entity(
                    "products",
                    &[
                        ColumnDef::new("id", ColumnType::Long, false),
                        ColumnDef::new("embedding", ColumnType::FloatVector(4), false),
                    ],
                )
                .unwrap();
            catalogue.close();
        }

        let catalogue = open(&tmp);
        assert_eq!(catalogue.schemas(), vec!["shop"]);
        let schema = catalogue.schema("shop").unwrap();
        assert_eq!(schema.entities(), vec!["products"]);
        let entity = schema.entity("products").unwrap();
        assert_eq!(entity.columns().len(), 2);
        assert_eq!(
            entity.columns()[1].def().ty,
            ColumnType::FloatVector(4)
        );
        catalogue.close();
    }

    #[test]
    fn missing_schema_folder_is_fatal_corruption() {
        let tmp = TempDir::with_prefix("catalogue").unwrap();
        {
            let catalogue = open(&tmp);
            catalogue.create_schema(&Name::simple("gone")).unwrap();
            catalogue.close();
        }
        std::fs::remove_dir_all(tmp.path().join("schema_gone")).unwrap();

        match Catalogue::open(tmp.path(), StoreOptions::default()) {
            Err(QuiverError::Storage(StorageError::Corruption(_))) => {}
            other => panic!("expected corruption, got {other:?}"),
        }
    }

    #[test]
    fn closed_catalogue_rejects_operations() {
        let tmp = TempDir::with_prefix("catalogue").unwrap();
        let catalogue = open(&tmp);
        catalogue.close();
        catalogue.close(); // idempotent
        assert!(catalogue.create_schema(&Name::simple("late")).is_err());
        assert!(catalogue.schema("late").is_err());
    }

    #[test]
    fn close_cascades_to_the_whole_tree() {
        let tmp = TempDir::with_prefix("catalogue").unwrap();
        let catalogue = open(&tmp);
        let schema = catalogue.create_schema(&Name::simple("s")).unwrap();
        let entity = schema
            .create_entity("e", &[ColumnDef::new("id", ColumnType::Long, false)])
            .unwrap();

        catalogue.close();
        assert!(schema.is_closed());
        assert!(entity.is_closed());
        assert!(entity.columns()[0].is_closed());
        assert!(entity.begin(true, 1).is_err());
    }

    #[test]
    fn dropped_entity_is_gone_after_reopen() {
        let tmp = TempDir::with_prefix("catalogue").unwrap();
        {
            let catalogue = open(&tmp);
            let schema = catalogue.create_schema(&Name::simple("s")).unwrap();
            schema
                .create_entity("keep", &[ColumnDef::new("id", ColumnType::Long, false)])
                .unwrap();
            schema
                .create_entity("drop", &[ColumnDef::new("id", ColumnType::Long, false)])
                .unwrap();
            schema.drop_entity("drop").unwrap();
            catalogue.close();
        }

        let catalogue = open(&tmp);
        let schema = catalogue.schema("s").unwrap();
        assert_eq!(schema.entities(), vec!["keep"]);
        assert!(matches!(
            schema.entity("drop"),
            Err(QuiverError::Catalog(CatalogError::EntityDoesNotExist(_)))
        ));
        catalogue.close();
    }
}
