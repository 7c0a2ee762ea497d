//! Bulk loading of mapped rows.
//!
//! A batch is staged as newline-delimited JSON in a temporary file, handed
//! to the warehouse as one load job, and the file is removed afterwards
//! whatever the outcome.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::{BufWriter, Write};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{error, info};

use crate::errors::LoadError;
use crate::warehouse::{LoadJob, TableRef, Warehouse, WriteMode};

/// Stages batches and submits them as load jobs.
#[derive(Clone)]
pub struct BulkLoader {
    warehouse: Arc<dyn Warehouse>,
}

impl std::fmt::Debug for BulkLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkLoader").finish_non_exhaustive()
    }
}

impl BulkLoader {
    /// Creates a loader for the given warehouse.
    #[must_use]
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self { warehouse }
    }

    /// The warehouse batches are loaded into.
    #[must_use]
    pub fn warehouse(&self) -> &dyn Warehouse {
        self.warehouse.as_ref()
    }

    /// Loads `rows` into `table` with the given mode.
    ///
    /// An empty batch is a no-op and returns `Ok(0)` without contacting the
    /// warehouse. On failure the table keeps its prior state.
    pub async fn load<R: Serialize + Sync>(
        &self,
        table: &TableRef,
        rows: &[R],
        mode: WriteMode,
    ) -> Result<u64, LoadError> {
        if rows.is_empty() {
            info!(table = %table, mode = %mode, "No rows to load");
            return Ok(0);
        }

        let (file, job_id) = stage(table, rows, mode)?;
        let job = LoadJob {
            table: table.clone(),
            mode,
            source: file.path().to_path_buf(),
            job_id,
            rows: rows.len(),
        };

        let result = self.warehouse.load(&job).await;
        // Dropping the handle deletes the staging file.
        drop(file);

        match &result {
            Ok(accepted) => info!(
                table = %table,
                mode = %mode,
                job_id = %job.job_id,
                rows = *accepted,
                "Loaded rows"
            ),
            Err(e) => error!(
                table = %table,
                mode = %mode,
                job_id = %job.job_id,
                rows = rows.len(),
                error = %e,
                "Load failed"
            ),
        }
        result
    }
}

fn stage<R: Serialize>(
    table: &TableRef,
    rows: &[R],
    mode: WriteMode,
) -> Result<(NamedTempFile, String), LoadError> {
    let staging_error = |message: String| LoadError::Staging {
        table: table.to_string(),
        rows: rows.len(),
        message,
    };

    let file = tempfile::Builder::new()
        .prefix("transitflow-")
        .suffix(".json")
        .tempfile()
        .map_err(|e| staging_error(e.to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(table.to_string().as_bytes());
    hasher.update(mode.disposition().as_bytes());

    {
        let mut writer = BufWriter::new(file.as_file());
        for row in rows {
            let line = serde_json::to_vec(row).map_err(|e| staging_error(e.to_string()))?;
            hasher.update(&line);
            writer
                .write_all(&line)
                .and_then(|()| writer.write_all(b"\n"))
                .map_err(|e| staging_error(e.to_string()))?;
        }
        writer.flush().map_err(|e| staging_error(e.to_string()))?;
    }

    let digest = hex::encode(hasher.finalize());
    let job_id = format!("transitflow_{}_{}_{}", table.slug(), mode, &digest[..32]);
    Ok((file, job_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::{InMemoryWarehouse, MockWarehouse};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::path::PathBuf;

    fn table() -> TableRef {
        TableRef::new("proj", "transit", "sptrans_posicoes")
    }

    #[tokio::test]
    async fn test_empty_batch_skips_warehouse() {
        let mut warehouse = MockWarehouse::new();
        warehouse.expect_load().times(0);
        let loader = BulkLoader::new(Arc::new(warehouse));

        let rows: Vec<serde_json::Value> = Vec::new();
        let loaded = loader.load(&table(), &rows, WriteMode::Truncate).await.unwrap();

        assert_eq!(loaded, 0);
    }

    #[tokio::test]
    async fn test_stages_ndjson_and_cleans_up() {
        let seen: Arc<Mutex<Option<(PathBuf, String)>>> = Arc::new(Mutex::new(None));
        let captured = seen.clone();

        let mut warehouse = MockWarehouse::new();
        warehouse.expect_load().times(1).returning(move |job| {
            let contents = std::fs::read_to_string(&job.source).unwrap();
            *captured.lock() = Some((job.source.clone(), contents));
            assert_eq!(job.mode, WriteMode::Append);
            assert!(job.job_id.starts_with("transitflow_proj_transit_sptrans_posicoes_append_"));
            Ok(job.rows as u64)
        });
        let loader = BulkLoader::new(Arc::new(warehouse));

        let rows = vec![json!({"line_c": "8000-10"}), json!({"line_c": "1012-10"})];
        let loaded = loader.load(&table(), &rows, WriteMode::Append).await.unwrap();

        assert_eq!(loaded, 2);
        let (path, contents) = seen.lock().clone().unwrap();
        assert_eq!(contents, "{\"line_c\":\"8000-10\"}\n{\"line_c\":\"1012-10\"}\n");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_staging_file_removed_on_failure() {
        let seen: Arc<Mutex<Option<PathBuf>>> = Arc::new(Mutex::new(None));
        let captured = seen.clone();

        let mut warehouse = MockWarehouse::new();
        warehouse.expect_load().returning(move |job| {
            *captured.lock() = Some(job.source.clone());
            Err(LoadError::job(job.table.to_string(), &job.job_id, "quota exceeded"))
        });
        let loader = BulkLoader::new(Arc::new(warehouse));

        let result = loader
            .load(&table(), &[json!({"cl": 1})], WriteMode::Truncate)
            .await;

        assert!(matches!(result, Err(LoadError::Job { .. })));
        let path = seen.lock().clone().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_job_id_is_content_derived() {
        let warehouse = Arc::new(InMemoryWarehouse::new());
        let loader = BulkLoader::new(warehouse.clone());
        let rows = vec![json!({"cl": 1})];

        loader.load(&table(), &rows, WriteMode::Append).await.unwrap();
        loader.load(&table(), &rows, WriteMode::Append).await.unwrap();
        loader
            .load(&table(), &[json!({"cl": 2})], WriteMode::Append)
            .await
            .unwrap();

        let loads = warehouse.loads();
        assert_eq!(loads.len(), 2);
        assert_ne!(loads[0].job_id, loads[1].job_id);
        assert_eq!(warehouse.rows(&table()).len(), 2);
    }
}
