//! Index schema versioning
//!
//! Layout history:
//! - v1: `mem:<id>` and `vec:<id>` records only, no version key
//! - v2: adds the `commit:`, `spec:` and `ts:` secondary keys
//!
//! The index is derived data. Layouts we know how to upgrade are migrated
//! in place; anything newer than this build understands is refused so the
//! caller can discard the index and rebuild it from the notes.

use rocksdb::{Direction, IteratorMode, WriteBatch, DB};

use crate::error::{MemoryError, Result};
use crate::memory::Memory;
use crate::storage::{secondary_keys, MEM_PREFIX};

/// Schema version stored in metadata
pub(crate) const SCHEMA_VERSION_KEY: &[u8] = b"meta:schema_version";
pub const CURRENT_VERSION: u32 = 2;

/// Bring the schema to [`CURRENT_VERSION`]. Idempotent.
///
/// Returns the version found before any migration ran.
pub fn migrate_if_needed(db: &DB) -> Result<u32> {
    let found = match read_version(db)? {
        Some(version) => version,
        None if has_records(db) => 1, // v1 had no version key
        None => {
            log::debug!("Fresh index, writing schema v{}", CURRENT_VERSION);
            write_version(db)?;
            return Ok(CURRENT_VERSION);
        }
    };

    if found > CURRENT_VERSION {
        return Err(MemoryError::index(format!(
            "index schema v{found} is newer than supported v{CURRENT_VERSION}; rebuild the index"
        )));
    }

    if found < CURRENT_VERSION {
        log::warn!(
            "Index needs migration from v{} to v{}",
            found,
            CURRENT_VERSION
        );
        perform_migration(db, found)?;
        write_version(db)?;
        log::info!("Migration completed successfully");
    }

    Ok(found)
}

fn read_version(db: &DB) -> Result<Option<u32>> {
    match db.get(SCHEMA_VERSION_KEY)? {
        Some(bytes) => {
            let version_bytes: [u8; 4] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| MemoryError::index("Invalid schema version format"))?;
            Ok(Some(u32::from_le_bytes(version_bytes)))
        }
        None => Ok(None),
    }
}

fn write_version(db: &DB) -> Result<()> {
    db.put(SCHEMA_VERSION_KEY, CURRENT_VERSION.to_le_bytes())?;
    Ok(())
}

fn has_records(db: &DB) -> bool {
    db.iterator(IteratorMode::From(MEM_PREFIX, Direction::Forward))
        .next()
        .and_then(|item| item.ok())
        .is_some_and(|(key, _)| key.starts_with(MEM_PREFIX))
}

/// Perform migration from old version to current
fn perform_migration(db: &DB, from_version: u32) -> Result<()> {
    match from_version {
        1 => migrate_v1_to_v2(db),
        _ => Err(MemoryError::index(format!(
            "Unknown index schema version: {from_version}"
        ))),
    }
}

/// Derive secondary keys for every stored memory
fn migrate_v1_to_v2(db: &DB) -> Result<()> {
    log::info!("Migrating index from v1 to v2...");

    let mut batch = WriteBatch::default();
    let mut migrated = 0usize;

    for item in db.iterator(IteratorMode::From(MEM_PREFIX, Direction::Forward)) {
        let (key, value) = item?;
        if !key.starts_with(MEM_PREFIX) {
            break;
        }

        match bincode::deserialize::<Memory>(&value) {
            Ok(memory) => {
                for (key, value) in secondary_keys(&memory) {
                    batch.put(key, value);
                }
                migrated += 1;
            }
            Err(e) => {
                // Skip corrupted entries rather than fail the whole migration
                log::error!(
                    "Failed to deserialize {}: {}. Skipping.",
                    String::from_utf8_lossy(&key),
                    e
                );
            }
        }
    }

    db.write(batch)?;
    log::info!("Derived secondary keys for {} memories", migrated);
    Ok(())
}
