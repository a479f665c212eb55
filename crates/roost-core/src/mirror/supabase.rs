//! Supabase (PostgREST) backend.
//!
//! Each mirrored table maps to the relation of the same name under
//! `/rest/v1/`. Requests carry the project key both as `apikey` and as a
//! bearer token.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use tracing::debug;

use super::backend::{CloudBackend, RemoteError, RemoteResult};
use crate::config::SyncConfig;
use crate::storage::{Record, Table};

/// Rows requested per page when reading a whole table
const PAGE_SIZE: usize = 1000;

/// Postgres "undefined_table"
const UNDEFINED_TABLE: &str = "42P01";
/// PostgREST "relation not in schema cache"
const SCHEMA_CACHE_MISS: &str = "PGRST205";

#[derive(Debug, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SupabaseBackend {
    client: Client,
    base_url: String,
    api_key: String,
}

impl SupabaseBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> RemoteResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Build from the mirror settings; `None` when URL or key is missing
    pub fn from_config(config: &SyncConfig) -> Option<RemoteResult<Self>> {
        let url = config.url.as_ref()?;
        let key = config.api_key.as_ref()?;
        Some(Self::new(
            url.clone(),
            key.clone(),
            Duration::from_secs(config.http_timeout_secs),
        ))
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table.name())
    }

    fn request(&self, method: Method, table: Table) -> RequestBuilder {
        self.client
            .request(method, self.table_url(table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    /// Turn a non-success response into the matching error
    async fn check(table: Table, response: Response) -> RemoteResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let parsed: Option<PostgrestError> = serde_json::from_str(&body).ok();
        let (code, message) = match parsed {
            Some(err) => (err.code, err.message.unwrap_or_else(|| body.clone())),
            None => (None, body.clone()),
        };

        let missing = matches!(code.as_deref(), Some(UNDEFINED_TABLE) | Some(SCHEMA_CACHE_MISS))
            || message.contains("does not exist");
        if missing {
            return Err(RemoteError::RelationMissing(table.name().to_string()));
        }

        Err(RemoteError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl CloudBackend for SupabaseBackend {
    fn name(&self) -> &'static str {
        "supabase"
    }

    async fn probe(&self) -> RemoteResult<()> {
        let response = self
            .request(Method::GET, Table::Users)
            .query(&[("select", "id"), ("limit", "1")])
            .send()
            .await?;
        Self::check(Table::Users, response).await?;
        Ok(())
    }

    async fn fetch_all(&self, table: Table) -> RemoteResult<Vec<Record>> {
        let mut rows = Vec::new();
        let mut offset = 0usize;

        loop {
            let response = self
                .request(Method::GET, table)
                .query(&[
                    ("select", "*".to_string()),
                    ("order", "id".to_string()),
                    ("limit", PAGE_SIZE.to_string()),
                    ("offset", offset.to_string()),
                ])
                .send()
                .await?;
            let page: Vec<Record> = Self::check(table, response).await?.json().await?;
            let fetched = page.len();
            rows.extend(page);

            if fetched < PAGE_SIZE {
                break;
            }
            offset += fetched;
        }

        debug!(table = %table, count = rows.len(), "fetched remote rows");
        Ok(rows)
    }

    async fn upsert(&self, table: Table, rows: &[Record]) -> RemoteResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let response = self
            .request(Method::POST, table)
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(rows)
            .send()
            .await?;
        Self::check(table, response).await?;
        Ok(())
    }

    async fn delete(&self, table: Table, ids: &[String]) -> RemoteResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let quoted: Vec<String> = ids
            .iter()
            .map(|id| format!("\"{}\"", id.replace('"', "\\\"")))
            .collect();
        let filter = format!("in.({})", quoted.join(","));
        let response = self
            .request(Method::DELETE, table)
            .query(&[("id", filter)])
            .send()
            .await?;
        Self::check(table, response).await?;
        Ok(())
    }
}
