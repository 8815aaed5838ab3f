//! OpenSearch `_bulk` client used by the log shipper.

use crate::core::config::ShipperConfig;
use crate::core::formatter::LogRecord;
use crate::core::shipper::{BulkBackend, BulkSummary, ShipperError};
use serde::Deserialize;
use serde_json::{json, Value};

/// Minimal HTTP client for the OpenSearch bulk API.
#[derive(Clone)]
pub struct OpenSearchClient {
    client: reqwest::Client,
    bulk_url: String,
    credentials: Option<(String, String)>,
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<Value>,
}

impl OpenSearchClient {
    pub fn new(config: &ShipperConfig) -> Result<Self, ShipperError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            bulk_url: format!("{}/_bulk", config.base_url().trim_end_matches('/')),
            credentials: config
                .credentials()
                .map(|(user, pass)| (user.to_string(), pass.to_string())),
        })
    }

    pub fn bulk_url(&self) -> &str {
        &self.bulk_url
    }
}

/// Encode records as an NDJSON bulk body: one action line and one document
/// line per record, newline-terminated.
pub fn bulk_body(index: &str, records: &[LogRecord]) -> Result<String, ShipperError> {
    let action = serde_json::to_string(&json!({ "index": { "_index": index } }))?;

    let mut body = String::with_capacity(records.len() * 256);
    for record in records {
        body.push_str(&action);
        body.push('\n');
        body.push_str(&serde_json::to_string(record)?);
        body.push('\n');
    }
    Ok(body)
}

/// Count documents the backend rejected inside an accepted bulk request.
fn count_item_failures(response: &BulkResponse) -> usize {
    if !response.errors {
        return 0;
    }
    response
        .items
        .iter()
        .filter(|item| {
            item.as_object()
                .and_then(|actions| actions.values().next())
                .map(|result| result.get("error").is_some())
                .unwrap_or(false)
        })
        .count()
}

impl BulkBackend for OpenSearchClient {
    async fn bulk(&self, index: &str, records: &[LogRecord]) -> Result<BulkSummary, ShipperError> {
        let body = bulk_body(index, records)?;

        let mut request = self
            .client
            .post(&self.bulk_url)
            .header("Content-Type", "application/x-ndjson")
            .body(body);
        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ShipperError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let failed = match response.json::<BulkResponse>().await {
            Ok(parsed) => count_item_failures(&parsed),
            Err(e) => {
                tracing::debug!("Unreadable bulk response body: {}", e);
                0
            }
        };

        Ok(BulkSummary {
            items: records.len(),
            failed,
        })
    }
}
