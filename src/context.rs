// 🧱 PipelineContext - staged database for one run
//
// Tables are written into `<published>.<run_id>.staging`, seeded with a copy
// of the published database. `publish` closes the connection and renames the
// staging file over the published one. Dropping an unpublished context
// removes the staging file.

use crate::error::{PipelineError, Result};
use crate::storage;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub struct PipelineContext {
    run_id: String,
    published_path: PathBuf,
    staging_path: PathBuf,
    conn: Option<Connection>,
}

impl PipelineContext {
    pub fn open(published_path: impl AsRef<Path>, run_id: &str) -> Result<Self> {
        let published_path = published_path.as_ref().to_path_buf();
        let mut staging_name = published_path.clone().into_os_string();
        staging_name.push(format!(".{}.staging", run_id));
        let staging_path = PathBuf::from(staging_name);

        if let Some(parent) = published_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        if published_path.exists() {
            fs::copy(&published_path, &staging_path)?;
            debug!(from = %published_path.display(), to = %staging_path.display(), "seeded staging database");
        }

        // Build the context before opening so Drop cleans up on any later failure
        let mut context = PipelineContext {
            run_id: run_id.to_string(),
            published_path,
            staging_path,
            conn: None,
        };

        let conn = Connection::open(&context.staging_path)?;
        // Single-file journal so the rename carries the whole database
        conn.pragma_update(None, "journal_mode", "DELETE")?;
        storage::setup_database(&conn)?;
        context.conn = Some(conn);

        Ok(context)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    pub fn published_path(&self) -> &Path {
        &self.published_path
    }

    pub fn connection(&mut self) -> Result<&mut Connection> {
        self.conn
            .as_mut()
            .ok_or_else(|| PipelineError::invalid("pipeline context", "staging connection is closed"))
    }

    /// Atomically replace the published database with the staged one
    pub fn publish(mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| e)?;
        }
        fs::rename(&self.staging_path, &self.published_path)?;
        info!(
            run_id = %self.run_id,
            path = %self.published_path.display(),
            "published database"
        );
        Ok(())
    }
}

impl Drop for PipelineContext {
    fn drop(&mut self) {
        drop(self.conn.take());
        if self.staging_path.exists() {
            match fs::remove_file(&self.staging_path) {
                Ok(()) => debug!(path = %self.staging_path.display(), "discarded staging database"),
                Err(e) => warn!(path = %self.staging_path.display(), error = %e, "could not remove staging database"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{Cell, FlatTable, PREDICTIONS};

    fn one_row(value: i64) -> FlatTable {
        let mut flat = FlatTable::new(PREDICTIONS, vec!["predicted_permits".to_string()]);
        flat.rows.push(vec![Cell::Integer(Some(value))]);
        flat
    }

    #[test]
    fn test_publish_swaps_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("market.db");

        let mut ctx = PipelineContext::open(&db, "run-1").unwrap();
        let staging = ctx.staging_path().to_path_buf();
        storage::replace_table(ctx.connection().unwrap(), &one_row(5)).unwrap();
        assert!(!db.exists());
        ctx.publish().unwrap();

        assert!(db.exists());
        assert!(!staging.exists());
        let conn = Connection::open(&db).unwrap();
        assert_eq!(storage::row_count(&conn, PREDICTIONS).unwrap(), 1);
    }

    #[test]
    fn test_drop_discards_staging() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("market.db");

        let staging = {
            let mut ctx = PipelineContext::open(&db, "run-2").unwrap();
            storage::replace_table(ctx.connection().unwrap(), &one_row(5)).unwrap();
            ctx.staging_path().to_path_buf()
        };
        assert!(!staging.exists());
        assert!(!db.exists());
    }

    #[test]
    fn test_staging_starts_from_published_copy() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("market.db");

        let mut first = PipelineContext::open(&db, "a").unwrap();
        storage::replace_table(first.connection().unwrap(), &one_row(1)).unwrap();
        first.publish().unwrap();

        let mut second = PipelineContext::open(&db, "b").unwrap();
        let values = storage::read_column(second.connection().unwrap(), PREDICTIONS, "predicted_permits").unwrap();
        assert_eq!(values, vec![rusqlite::types::Value::Integer(1)]);
    }
}
