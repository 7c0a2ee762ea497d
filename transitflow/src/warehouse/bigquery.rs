//! BigQuery over its REST API.
//!
//! Queries go through `jobs.query` and `getQueryResults`; loads are
//! multipart uploads of newline-delimited JSON. Job ids are supplied by the
//! caller, so resubmitting the same batch resolves to the existing job.
//!
//! Every request carries a bearer token from a [`TokenCache`]. A 401 drops
//! the cached token and the request is sent once more with a fresh one.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::credentials::{ServiceAccount, StaticToken, TokenCache, TokenSource};
use super::{LoadJob, QueryRow, ReadQuery, Warehouse, WriteMode};
use crate::config::WarehouseConfig;
use crate::errors::{ConfigError, LoadError, QueryError};
use crate::utils::{partition_suffix, Clock, SystemClock};

const API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
const UPLOAD_BASE: &str = "https://bigquery.googleapis.com/upload/bigquery/v2";
const BOUNDARY: &str = "transitflow_load_boundary";
const QUERY_WAIT_MS: u64 = 10_000;

/// [`Warehouse`] backed by Google BigQuery.
#[derive(Debug, Clone)]
pub struct BigQueryWarehouse {
    client: reqwest::Client,
    api_base: String,
    upload_base: String,
    project: String,
    tokens: Arc<TokenCache>,
    location: String,
    partition_decorator: bool,
    poll_interval: Duration,
    job_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl BigQueryWarehouse {
    /// Creates a client from warehouse configuration.
    ///
    /// A service-account key file is preferred; a fixed access token is
    /// accepted but stops working once it expires.
    pub fn new(config: &WarehouseConfig) -> Result<Self, ConfigError> {
        let source: Arc<dyn TokenSource> = if let Some(path) = config.resolve_credentials_file() {
            Arc::new(ServiceAccount::from_file(&path)?)
        } else if let Some(token) = config.resolve_access_token() {
            warn!("Using a fixed BigQuery access token; it cannot be renewed when it expires");
            Arc::new(StaticToken::new(token))
        } else {
            return Err(ConfigError::Invalid(format!(
                "bigquery backend needs bigquery.credentials_file, {}, bigquery.access_token or {}",
                crate::config::CREDENTIALS_ENV,
                crate::config::ACCESS_TOKEN_ENV
            )));
        };
        let client = reqwest::Client::builder()
            .user_agent(concat!("transitflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("could not build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: API_BASE.to_string(),
            upload_base: UPLOAD_BASE.to_string(),
            project: config.project_id.clone(),
            tokens: Arc::new(TokenCache::new(source)),
            location: config.location.clone(),
            partition_decorator: config.partition_decorator,
            poll_interval: config.job_poll_interval(),
            job_timeout: config.job_timeout(),
            clock: Arc::new(SystemClock),
        })
    }

    /// Points the client at different API roots.
    #[must_use]
    pub fn with_endpoints(mut self, api_base: impl Into<String>, upload_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.upload_base = upload_base.into();
        self
    }

    /// Replaces where access tokens come from.
    #[must_use]
    pub fn with_token_source(mut self, source: Arc<dyn TokenSource>) -> Self {
        self.tokens = Arc::new(TokenCache::new(source));
        self
    }

    /// Sets the clock used for partition decorators and token expiry.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn destination_table(&self, job: &LoadJob) -> String {
        if self.partition_decorator && job.mode == WriteMode::Truncate {
            format!(
                "{}${}",
                job.table.table,
                partition_suffix(self.clock.now().date_naive())
            )
        } else {
            job.table.table.clone()
        }
    }

    fn load_metadata(&self, job: &LoadJob) -> Value {
        json!({
            "jobReference": {
                "projectId": self.project,
                "jobId": job.job_id,
                "location": self.location,
            },
            "configuration": {
                "load": {
                    "destinationTable": {
                        "projectId": job.table.project,
                        "datasetId": job.table.dataset,
                        "tableId": self.destination_table(job),
                    },
                    "sourceFormat": "NEWLINE_DELIMITED_JSON",
                    "writeDisposition": job.mode.disposition(),
                    "autodetect": false,
                }
            }
        })
    }

    async fn send_json(&self, request: reqwest::RequestBuilder) -> Result<(u16, Value), String> {
        let replay = request.try_clone();
        let (status, value) = self.send_once(request).await?;

        match replay {
            Some(replay) if status == 401 => {
                warn!("BigQuery rejected the access token, fetching a new one");
                self.tokens.invalidate();
                self.send_once(replay).await
            }
            _ => Ok((status, value)),
        }
    }

    async fn send_once(&self, request: reqwest::RequestBuilder) -> Result<(u16, Value), String> {
        let token = self.tokens.token(self.clock.now()).await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| e.to_string())?;
        let value = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body).map_err(|e| format!("invalid JSON ({status}): {e}"))?
        };
        Ok((status, value))
    }

    async fn fetch_job(&self, job_id: &str) -> Result<(u16, Value), String> {
        let url = format!("{}/projects/{}/jobs/{}", self.api_base, self.project, job_id);
        self.send_json(self.client.get(url).query(&[("location", self.location.as_str())]))
            .await
    }

    async fn wait_for_job(&self, job: &LoadJob, mut status: Value) -> Result<u64, LoadError> {
        let table = job.table.to_string();
        let deadline = Instant::now() + self.job_timeout;

        loop {
            if status["status"]["state"].as_str() == Some("DONE") {
                if let Some(message) = status["status"]["errorResult"]["message"].as_str() {
                    return Err(LoadError::job(&table, &job.job_id, message));
                }
                return Ok(output_rows(&status).unwrap_or(job.rows as u64));
            }
            if Instant::now() >= deadline {
                return Err(LoadError::job(
                    &table,
                    &job.job_id,
                    format!("still running after {:?}", self.job_timeout),
                ));
            }

            tokio::time::sleep(self.poll_interval).await;
            let (code, body) = self
                .fetch_job(&job.job_id)
                .await
                .map_err(|e| LoadError::job(&table, &job.job_id, e))?;
            if code != 200 {
                return Err(LoadError::job(&table, &job.job_id, error_message(code, &body)));
            }
            status = body;
        }
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    async fn query(&self, query: &ReadQuery) -> Result<Vec<QueryRow>, QueryError> {
        let sql = query.to_sql();
        debug!(sql = %sql, "Submitting query");

        let url = format!("{}/projects/{}/queries", self.api_base, self.project);
        let body = json!({
            "query": sql,
            "useLegacySql": false,
            "location": self.location,
            "timeoutMs": QUERY_WAIT_MS,
        });
        let (code, mut page) = self
            .send_json(self.client.post(url).json(&body))
            .await
            .map_err(QueryError::Request)?;
        if code != 200 {
            return Err(QueryError::Failed(error_message(code, &page)));
        }

        let job_id = page["jobReference"]["jobId"]
            .as_str()
            .ok_or_else(|| QueryError::Decode("response has no job id".to_string()))?
            .to_string();
        let deadline = Instant::now() + self.job_timeout;
        let mut rows = Vec::new();

        loop {
            let complete = page["jobComplete"].as_bool().unwrap_or(false);
            if complete {
                rows.extend(decode_rows(&page)?);
            }
            let page_token = page["pageToken"].as_str().map(str::to_string);
            if complete && page_token.is_none() {
                break;
            }
            if Instant::now() >= deadline {
                return Err(QueryError::Failed(format!("query {job_id} timed out")));
            }

            let url = format!("{}/projects/{}/queries/{}", self.api_base, self.project, job_id);
            let timeout = QUERY_WAIT_MS.to_string();
            let mut params = vec![
                ("location", self.location.clone()),
                ("timeoutMs", timeout),
            ];
            if let Some(token) = page_token {
                params.push(("pageToken", token));
            }
            let (code, next) = self
                .send_json(self.client.get(url).query(&params))
                .await
                .map_err(QueryError::Request)?;
            if code != 200 {
                return Err(QueryError::Failed(error_message(code, &next)));
            }
            page = next;
        }

        Ok(rows)
    }

    async fn load(&self, job: &LoadJob) -> Result<u64, LoadError> {
        let table = job.table.to_string();
        let data = tokio::fs::read(&job.source).await.map_err(|e| LoadError::Staging {
            table: table.clone(),
            rows: job.rows,
            message: e.to_string(),
        })?;
        let body = multipart_body(&self.load_metadata(job), &data);

        let url = format!(
            "{}/projects/{}/jobs?uploadType=multipart",
            self.upload_base, self.project
        );
        let request = self
            .client
            .post(url)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={BOUNDARY}"),
            )
            .body(body);
        let (code, status) = self
            .send_json(request)
            .await
            .map_err(|e| LoadError::submit(&table, e))?;

        let status = match code {
            200 => status,
            409 => {
                warn!(job_id = %job.job_id, "Load job already exists, resuming");
                let (code, existing) = self
                    .fetch_job(&job.job_id)
                    .await
                    .map_err(|e| LoadError::submit(&table, e))?;
                if code != 200 {
                    return Err(LoadError::submit(&table, error_message(code, &existing)));
                }
                existing
            }
            _ => return Err(LoadError::submit(&table, error_message(code, &status))),
        };

        let accepted = self.wait_for_job(job, status).await?;
        info!(table = %table, job_id = %job.job_id, rows = accepted, "Load job done");
        Ok(accepted)
    }
}

fn multipart_body(metadata: &Value, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 512);
    body.extend_from_slice(
        format!("--{BOUNDARY}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n").as_bytes(),
    );
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(
        format!("\r\n--{BOUNDARY}\r\nContent-Type: application/octet-stream\r\n\r\n").as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn error_message(status: u16, body: &Value) -> String {
    body["error"]["message"]
        .as_str()
        .map_or_else(|| format!("HTTP {status}: {body}"), |m| format!("HTTP {status}: {m}"))
}

fn output_rows(job: &Value) -> Option<u64> {
    let rows = &job["statistics"]["load"]["outputRows"];
    rows.as_str()
        .and_then(|s| s.parse().ok())
        .or_else(|| rows.as_u64())
}

fn decode_rows(page: &Value) -> Result<Vec<QueryRow>, QueryError> {
    let fields = page["schema"]["fields"]
        .as_array()
        .ok_or_else(|| QueryError::Decode("result has no schema".to_string()))?;
    let Some(rows) = page["rows"].as_array() else {
        return Ok(Vec::new());
    };

    rows.iter()
        .map(|row| {
            let cells = row["f"]
                .as_array()
                .ok_or_else(|| QueryError::Decode(format!("malformed row {row}")))?;
            let mut out = Map::with_capacity(fields.len());
            for (field, cell) in fields.iter().zip(cells) {
                let name = field["name"].as_str().unwrap_or_default().to_string();
                let kind = field["type"].as_str().unwrap_or("STRING");
                out.insert(name, convert_cell(kind, &cell["v"]));
            }
            Ok(out)
        })
        .collect()
}

/// BigQuery returns every scalar as a string; restore the schema type.
fn convert_cell(kind: &str, value: &Value) -> Value {
    let Some(raw) = value.as_str() else {
        return value.clone();
    };
    match kind {
        "INTEGER" | "INT64" => raw.parse::<i64>().map_or_else(|_| value.clone(), Value::from),
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => {
            raw.parse::<f64>().map_or_else(|_| value.clone(), Value::from)
        }
        "BOOLEAN" | "BOOL" => Value::Bool(raw.eq_ignore_ascii_case("true")),
        _ => value.clone(),
    }
}
