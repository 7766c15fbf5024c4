//! RocksDB persistence for trust records.

use std::path::Path;

use meshtrust_core::{PeerId, TrustRecord};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteOptions, DB};

use crate::backend::TrustBackend;
use crate::error::StoreError;

/// Column family holding one versioned JSON record per peer id.
const CF_TRUST: &str = "trust_records";

/// RocksDB-backed trust record storage.
pub struct RocksBackend {
    db: DB,
}

impl RocksBackend {
    /// Open or create a RocksDB database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = vec![ColumnFamilyDescriptor::new(CF_TRUST, Options::default())];
        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)?;

        tracing::debug!(path = %path.display(), "trust database opened");
        Ok(Self { db })
    }

    fn cf(&self) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(CF_TRUST)
            .ok_or_else(|| StoreError::Backend(format!("column family '{}' not found", CF_TRUST)))
    }

    fn sync_writes() -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        opts
    }
}

impl TrustBackend for RocksBackend {
    fn put(&self, record: &TrustRecord) -> Result<(), StoreError> {
        let cf = self.cf()?;
        let value = record.encode()?;
        self.db
            .put_cf_opt(&cf, record.peer_id.as_str().as_bytes(), value, &Self::sync_writes())?;
        Ok(())
    }

    fn delete(&self, peer_id: &PeerId) -> Result<(), StoreError> {
        let cf = self.cf()?;
        self.db
            .delete_cf_opt(&cf, peer_id.as_str().as_bytes(), &Self::sync_writes())?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<TrustRecord>, StoreError> {
        let cf = self.cf()?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_key, value) = item?;
            records.push(TrustRecord::decode(&value)?);
        }
        Ok(records)
    }
}
