use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use shepd_common::error::{Result, SupervisorError};
use shepd_common::types::ProcessRecord;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Durable process table. The registry file is the single source of truth
/// shared by the poller daemon and every CLI invocation, so each mutation
/// runs as load-modify-save under an exclusive advisory lock on a dedicated
/// lock file.
pub struct RegistryStore {
    registry_file: PathBuf,
    lock_file: PathBuf,
}

impl RegistryStore {
    pub fn new(registry_file: PathBuf, lock_file: PathBuf) -> Self {
        Self {
            registry_file,
            lock_file,
        }
    }

    /// A missing or empty file is an empty registry; unparseable content is
    /// `StoreCorrupt` for the caller to recover from.
    pub fn load(&self) -> Result<Vec<ProcessRecord>> {
        let raw = match fs::read_to_string(&self.registry_file) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).map_err(|source| SupervisorError::StoreCorrupt {
            path: self.registry_file.clone(),
            source,
        })
    }

    /// Recovery path: a corrupt registry is quarantined next to the original
    /// and treated as empty, so one bad write cannot brick every later
    /// command.
    fn load_or_recover(&self) -> Result<Vec<ProcessRecord>> {
        match self.load() {
            Err(SupervisorError::StoreCorrupt { path, source }) => {
                let quarantine = path.with_extension("json.corrupt");
                warn!(
                    registry = %path.display(),
                    quarantine = %quarantine.display(),
                    %source,
                    "registry is corrupt; quarantining and starting from an empty table"
                );
                let _ = fs::rename(&path, &quarantine);
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Full replacement of the registry contents. Write-then-rename, so a
    /// concurrent reader sees either the old collection or the new one,
    /// never a partial file.
    pub fn save(&self, records: &[ProcessRecord]) -> Result<()> {
        write_records(&self.registry_file, records)
    }

    /// Runs `f` over the registry with the advisory lock held for the whole
    /// load-modify-save sequence. An `Err` from `f` discards the mutation.
    /// The lock releases on drop, on every exit path.
    pub fn with_lock<T>(
        &self,
        f: impl FnOnce(&mut Vec<ProcessRecord>) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.acquire_exclusive()?;
        let mut records = self.load_or_recover()?;
        let out = f(&mut records)?;
        self.save(&records)?;
        Ok(out)
    }

    /// Read-only view under a shared lock.
    pub fn read(&self) -> Result<Vec<ProcessRecord>> {
        let file = self.open_lock_file()?;
        file.lock_shared()?;
        let records = self.load_or_recover();
        let _ = FileExt::unlock(&file);
        records
    }

    fn acquire_exclusive(&self) -> Result<LockGuard> {
        let file = self.open_lock_file()?;
        file.lock_exclusive()?;
        debug!(lock = %self.lock_file.display(), "acquired registry lock");
        Ok(LockGuard { file })
    }

    fn open_lock_file(&self) -> Result<File> {
        Ok(OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_file)?)
    }
}

struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Atomic pretty-printed JSON write, shared by the registry and snapshots.
pub fn write_records(path: &Path, records: &[ProcessRecord]) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        std::io::Error::new(ErrorKind::InvalidInput, "record file has no parent directory")
    })?;
    let body = serde_json::to_vec_pretty(records)
        .map_err(|err| std::io::Error::new(ErrorKind::InvalidData, err))?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&body)?;
    tmp.write_all(b"\n")?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

pub fn read_records(path: &Path) -> Result<Vec<ProcessRecord>> {
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|source| SupervisorError::StoreCorrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Lowest integer not currently in use, scanning from zero. Ids freed by
/// delete are reused.
pub fn allocate_id(records: &[ProcessRecord]) -> u32 {
    let mut id = 0;
    while records.iter().any(|r| r.id == id) {
        id += 1;
    }
    id
}
