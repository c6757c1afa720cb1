//! note storage using sled

use std::path::Path;

use sled::Db;
use tracing::info;

use crate::store::{NoteBackend, OwnerId};
use crate::Result;

pub struct SledBackend {
    db: Db,
}

impl SledBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("opening note storage at {}", path.as_ref().display());
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// owners with a stored record
    pub fn owners(&self) -> Result<Vec<String>> {
        let mut owners = Vec::new();
        for entry in self.db.scan_prefix(b"notes:") {
            let (key, _) = entry?;
            if let Ok(key) = std::str::from_utf8(&key) {
                owners.push(key.trim_start_matches("notes:").to_string());
            }
        }
        Ok(owners)
    }

    /// remember the last block a verified sync reached for this owner
    pub fn set_last_sync_height(&self, owner: &OwnerId, height: u64) -> Result<()> {
        let key = format!("sync:{}", owner);
        self.db.insert(key.as_bytes(), &height.to_le_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    pub fn last_sync_height(&self, owner: &OwnerId) -> Result<Option<u64>> {
        let key = format!("sync:{}", owner);
        match self.db.get(key.as_bytes())? {
            Some(bytes) if bytes.len() == 8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes);
                Ok(Some(u64::from_le_bytes(buf)))
            }
            _ => Ok(None),
        }
    }
}

impl NoteBackend for SledBackend {
    fn load(&self, owner: &OwnerId) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(owner.storage_key().as_bytes())?.map(|v| v.to_vec()))
    }

    fn save(&self, owner: &OwnerId, record: &[u8]) -> Result<()> {
        self.db.insert(owner.storage_key().as_bytes(), record)?;
        self.db.flush()?;
        Ok(())
    }
}
