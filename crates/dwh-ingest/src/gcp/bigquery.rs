//! BigQuery query results as rows
//!
//! Uses the `jobs.query` REST endpoint and follows `pageToken` through
//! `jobs.getQueryResults` until every row is read.

use crate::error::{IngestError, Result};
use crate::gcp::auth::AccessTokenProvider;
use chrono::NaiveDateTime;
use dwh_common::transforms::epoch_to_naive_utc0_datetime;
use dwh_common::{Row, Value};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    v: serde_json::Value,
}

/// Client for reading query results from one project
pub struct BigQueryClient {
    client: reqwest::Client,
    base_url: String,
    project: String,
    tokens: Box<dyn AccessTokenProvider>,
}

impl BigQueryClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        project: impl Into<String>,
        tokens: Box<dyn AccessTokenProvider>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            project: project.into(),
            tokens,
        }
    }

    fn queries_url(&self) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/queries",
            self.base_url.trim_end_matches('/'),
            self.project
        )
    }

    /// Run a standard SQL query and return every result row
    pub async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let url = self.queries_url();
        let token = self.tokens.access_token().await?;
        debug!(project = %self.project, "Submitting BigQuery query");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&json!({ "query": sql, "useLegacySql": false }))
            .send()
            .await?;
        let mut page = Self::decode(&url, response).await?;

        let job = page
            .job_reference
            .clone()
            .ok_or_else(|| IngestError::BigQuery("response has no jobReference".to_string()))?;

        // rows and schema are only present once the job is done
        while !page.job_complete {
            debug!(job_id = %job.job_id, "Waiting for BigQuery job");
            page = self.get_query_results(&job, &token, None).await?;
        }

        let schema = page
            .schema
            .clone()
            .ok_or_else(|| IngestError::BigQuery("completed job has no schema".to_string()))?;

        let mut rows = Vec::new();
        loop {
            for row in std::mem::take(&mut page.rows) {
                rows.push(convert_row(&schema, row)?);
            }
            match page.page_token.take() {
                Some(token_for_page) => {
                    page = self.get_query_results(&job, &token, Some(&token_for_page)).await?;
                },
                None => break,
            }
        }

        info!(job_id = %job.job_id, rows = rows.len(), "BigQuery query finished");
        Ok(rows)
    }

    async fn get_query_results(
        &self,
        job: &JobReference,
        token: &str,
        page_token: Option<&str>,
    ) -> Result<QueryResponse> {
        let url = format!("{}/{}", self.queries_url(), job.job_id);
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(location) = job.location.as_deref() {
            query.push(("location", location));
        }
        if let Some(page_token) = page_token {
            query.push(("pageToken", page_token));
        }
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&query)
            .send()
            .await?;
        Self::decode(&url, response).await
    }

    async fn decode(url: &str, response: reqwest::Response) -> Result<QueryResponse> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::BigQuery(format!("HTTP {status}: {body}")));
        }
        response.json().await.map_err(|e| IngestError::decode(url, e))
    }
}

fn convert_row(schema: &TableSchema, row: TableRow) -> Result<Row> {
    if row.f.len() != schema.fields.len() {
        return Err(IngestError::BigQuery(format!(
            "row has {} cells but schema has {} fields",
            row.f.len(),
            schema.fields.len()
        )));
    }
    schema
        .fields
        .iter()
        .zip(row.f)
        .map(|(field, cell)| Ok((field.name.clone(), convert_cell(&field.field_type, cell.v)?)))
        .collect()
}

fn convert_cell(field_type: &str, raw: serde_json::Value) -> Result<Value> {
    let text = match raw {
        serde_json::Value::Null => return Ok(Value::Null),
        serde_json::Value::String(text) => text,
        // RECORD and REPEATED fields come back as nested structures
        other => return Ok(Value::Text(other.to_string())),
    };
    let invalid = |e: &dyn std::fmt::Display| IngestError::BigQuery(format!("invalid {field_type} value '{text}': {e}"));
    let value = match field_type {
        "INTEGER" | "INT64" => Value::Int(text.parse().map_err(|e| invalid(&e))?),
        "FLOAT" | "FLOAT64" | "NUMERIC" => Value::Float(text.parse().map_err(|e| invalid(&e))?),
        "BOOLEAN" | "BOOL" => Value::Bool(text.eq_ignore_ascii_case("true")),
        "TIMESTAMP" => {
            let epoch: f64 = text.parse().map_err(|e| invalid(&e))?;
            Value::Timestamp(epoch_to_naive_utc0_datetime(epoch)?)
        },
        "DATETIME" => Value::Timestamp(
            NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f").map_err(|e| invalid(&e))?,
        ),
        _ => Value::Text(text),
    };
    Ok(value)
}
