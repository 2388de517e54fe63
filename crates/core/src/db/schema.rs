use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use quiverdb_recordstore::{RecordId, RecordStore, StoreOptions};

use super::entity::Entity;
use super::{now_micros, DescriptorCodec, DirectoryHeader, DirectoryHeaderCodec, Dbo, HEADER_RECID};
use crate::error::{CatalogError, QuiverError, Result, TxError, ValidationError};
use crate::types::{ColumnDef, Name};

const SCHEMA_STORE: &str = "catalogue.db";

/// A named container of entities, persisted in its own catalogue store.
///
/// The store's header record lists the record ids of the entity
/// descriptors; each descriptor names one entity whose data lives in a
/// sibling directory.
#[derive(Debug)]
pub struct Schema {
    name: Name,
    path: PathBuf,
    store: Mutex<RecordStore>,
    registry: RwLock<BTreeMap<String, (RecordId, Arc<Entity>)>>,
    options: StoreOptions,
    closed: AtomicBool,
}

impl Schema {
    /// Create a fresh schema store inside `dir`.
    pub(super) fn create(dir: &Path, name: &str, options: StoreOptions) -> Result<Arc<Self>> {
        let mut store = RecordStore::open(dir.join(SCHEMA_STORE), options)?;
        let recid = store.put(&DirectoryHeader::new(), &DirectoryHeaderCodec)?;
        if recid != HEADER_RECID {
            return Err(QuiverError::corruption(format!(
                "schema store in {} is not fresh: header landed at record {recid}",
                dir.display()
            )));
        }
        store.commit()?;
        Ok(Arc::new(Self {
            name: Name::simple(name),
            path: dir.to_owned(),
            store: Mutex::new(store),
            registry: RwLock::new(BTreeMap::new()),
            options,
            closed: AtomicBool::new(false),
        }))
    }

    /// Open an existing schema, loading every entity it lists. A listed
    /// entity whose directory is missing is corruption and fails the open.
    pub(super) fn open(dir: &Path, name: &str, options: StoreOptions) -> Result<Arc<Self>> {
        let store = RecordStore::open(dir.join(SCHEMA_STORE), options)?;
        let header = store
            .get(HEADER_RECID, &DirectoryHeaderCodec)?
            .ok_or_else(|| {
                QuiverError::corruption(format!(
                    "schema store in {} has no header record",
                    dir.display()
                ))
            })?;

        let mut registry = BTreeMap::new();
        for &recid in &header.child_recids {
            let entity_name = store.get(recid, &DescriptorCodec)?.ok_or_else(|| {
                QuiverError::corruption(format!("dangling entity descriptor record {recid}"))
            })?;
            let entity_dir = dir.join(&entity_name);
            if !entity_dir.is_dir() {
                return Err(QuiverError::corruption(format!(
                    "entity directory missing: {}",
                    entity_dir.display()
                )));
            }
            let entity = Entity::open(&entity_dir, &entity_name, options)?;
            registry.insert(entity_name, (recid, entity));
        }
        log::debug!("opened schema {name} with {} entities", registry.len());

        Ok(Arc::new(Self {
            name: Name::simple(name),
            path: dir.to_owned(),
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

    /// Create an entity with the given columns and register it.
    ///
    /// On a storage failure the partially created directory is deleted and
    /// the schema store rolled back.
    pub fn create_entity(&self, name: &str, defs: &[ColumnDef]) -> Result<Arc<Entity>> {
        self.check_open()?;
        if !Name::parse(name)?.is_simple() {
            return Err(ValidationError::SimpleNameRequired(name.to_owned()).into());
        }
        let mut registry = self.registry.write();
        if registry.contains_key(name) {
            return Err(CatalogError::EntityAlreadyExists(name.to_owned()).into());
        }

        let entity = Entity::create(&self.path, name, defs, self.options)?;
        let mut store = self.store.lock();
        let committed = register_child(&mut store, name);
        match committed {
            Ok(recid) => {
                registry.insert(name.to_owned(), (recid, entity.clone()));
                Ok(entity)
            }
            Err(e) => {
                if let Err(re) = store.rollback() {
                    log::warn!("rollback after failed entity registration failed: {re}");
                }
                entity.close();
                let _ = std::fs::remove_dir_all(self.path.join(name));
                Err(e)
            }
        }
    }

    /// Drop an entity: unregister it, commit, close it, delete its files.
    pub fn drop_entity(&self, name: &str) -> Result<()> {
        self.check_open()?;
        let mut registry = self.registry.write();
        let (recid, entity) = registry
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::EntityDoesNotExist(name.to_owned()))?;

        let mut store = self.store.lock();
        if let Err(e) = unregister_child(&mut store, recid) {
            if let Err(re) = store.rollback() {
                log::warn!("rollback after failed entity drop failed: {re}");
            }
            return Err(e);
        }
        drop(store);

        entity.close();
        registry.remove(name);
        std::fs::remove_dir_all(self.path.join(name))?;
        log::debug!("dropped entity {name} from schema {}", self.name);
        Ok(())
    }

    pub fn entities(&self) -> Vec<String> {
        self.registry.read().keys().cloned().collect()
    }

    pub fn entity(&self, name: &str) -> Result<Arc<Entity>> {
        self.check_open()?;
        self.registry
            .read()
            .get(name)
            .map(|(_, entity)| entity.clone())
            .ok_or_else(|| CatalogError::EntityDoesNotExist(name.to_owned()).into())
    }
}

impl Dbo for Schema {
    fn name(&self) -> &Name {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for (_, entity) in self.registry.read().values() {
            entity.close();
        }
        if let Err(e) = self.store.lock().close() {
            log::warn!("error closing schema store {}: {e}", self.path.display());
        }
        log::debug!("closed schema {}", self.name);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Schema {
    fn drop(&mut self) {
        if !self.is_closed() {
            log::warn!(
                "schema {} dropped while still open; closing (resource leak)",
                self.name
            );
            self.close();
        }
    }
}

/// Append a child descriptor and rewrite the header, as one commit.
pub(super) fn register_child(store: &mut RecordStore, name: &str) -> Result<RecordId> {
    let recid = store.put(&name.to_owned(), &DescriptorCodec)?;
    let mut header = store
        .get(HEADER_RECID, &DirectoryHeaderCodec)?
        .ok_or_else(|| QuiverError::corruption("directory header record missing"))?;
    header.count += 1;
    header.modified_micros = now_micros();
    header.child_recids.push(recid);
    store.update(HEADER_RECID, &header, &DirectoryHeaderCodec)?;
    store.commit()?;
    Ok(recid)
}

/// Remove a child descriptor and rewrite the header, as one commit.
pub(super) fn unregister_child(store: &mut RecordStore, recid: RecordId) -> Result<()> {
    store.delete(recid)?;
    let mut header = store
        .get(HEADER_RECID, &DirectoryHeaderCodec)?
        .ok_or_else(|| QuiverError::corruption("directory header record missing"))?;
    header.count -= 1;
    header.modified_micros = now_micros();
    header.child_recids.retain(|&id| id != recid);
    store.update(HEADER_RECID, &header, &DirectoryHeaderCodec)?;
    store.commit()?;
    Ok(())
}
