//! Durable metadata store for distributed files.
//!
//! One row per distributed file. The connection is opened per operation by
//! the coordinator, never held across task lifetimes.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::debug;

use crate::error::{MeshError, MeshResult};

/// One record of the `files` table.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub name: String,
    pub file_size: u64,
    pub block_number: u64,
    pub duplication_level: u64,
    pub validation_level: u64,
    /// 16 random bytes; seed of the AES key. Never leaves the coordinator.
    pub key: Vec<u8>,
}

/// The key-free projection of a [`FileRecord`] published to UI subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub file_size: u64,
    pub block_number: u64,
    pub duplication_level: u64,
    pub validation_level: u64,
}

impl From<&FileRecord> for FileInfo {
    fn from(record: &FileRecord) -> Self {
        FileInfo {
            name: record.name.clone(),
            file_size: record.file_size,
            block_number: record.block_number,
            duplication_level: record.duplication_level,
            validation_level: record.validation_level,
        }
    }
}

/// Interface to the `files` table.
#[derive(Debug)]
pub struct MetaStore {
    conn: Connection,
}

impl MetaStore {
    /// Open the store, creating the schema if necessary.
    pub fn open(path: &Path) -> MeshResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS files
             (NAME TEXT UNIQUE,
              FILE_SIZE INT,
              BLOCK_NUMBER INT,
              DUPLICATION_LEVEL INT,
              VALIDATION_LEVEL INT,
              KEY BLOB)",
            [],
        )?;
        debug!("connected to metadata store at {:?}", path);
        Ok(MetaStore { conn })
    }

    /// Insert a new record. Fails with [`MeshError::StorageFailure`] when a
    /// record with the same name already exists.
    pub fn insert(&self, record: &FileRecord) -> MeshResult<()> {
        self.conn.execute(
            "INSERT INTO files VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.name,
                record.file_size as i64,
                record.block_number as i64,
                record.duplication_level as i64,
                record.validation_level as i64,
                record.key,
            ],
        )?;
        debug!("record for '{}' inserted", record.name);
        Ok(())
    }

    /// Look up a record by file name.
    pub fn query(&self, name: &str) -> MeshResult<Option<FileRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT NAME, FILE_SIZE, BLOCK_NUMBER, DUPLICATION_LEVEL, VALIDATION_LEVEL, KEY
             FROM files WHERE NAME = ?1",
        )?;
        let record = stmt
            .query_row(params![name], |row| Self::row_to_record(row))
            .optional()?;
        Ok(record)
    }

    /// All records, in insertion order.
    pub fn query_all(&self) -> MeshResult<Vec<FileRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT NAME, FILE_SIZE, BLOCK_NUMBER, DUPLICATION_LEVEL, VALIDATION_LEVEL, KEY
             FROM files",
        )?;
        let rows = stmt.query_map([], |row| Self::row_to_record(row))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Delete the record for `name`, if any.
    pub fn delete(&self, name: &str) -> MeshResult<()> {
        self.conn
            .execute("DELETE FROM files WHERE NAME = ?1", params![name])?;
        debug!("record for '{}' deleted", name);
        Ok(())
    }

    /// Delete every record.
    pub fn delete_all(&self) -> MeshResult<()> {
        self.conn.execute("DELETE FROM files", [])?;
        debug!("all records deleted");
        Ok(())
    }

    /// Close the connection explicitly.
    pub fn close(self) -> MeshResult<()> {
        self.conn
            .close()
            .map_err(|(_, e)| MeshError::StorageFailure(e.to_string()))
    }

    fn row_to_record(row: &Row) -> Result<FileRecord, rusqlite::Error> {
        Ok(FileRecord {
            name: row.get(0)?,
            file_size: row.get::<_, i64>(1)? as u64,
            block_number: row.get::<_, i64>(2)? as u64,
            duplication_level: row.get::<_, i64>(3)? as u64,
            validation_level: row.get::<_, i64>(4)? as u64,
            key: row.get(5)?,
        })
    }
}
