//! JSON-RPC ledger client — submits recording payloads to a remote ledger.
//!
//! One `submitRecord` request per call. Retrying is left to the caller (the
//! recording worker), so a failed or timed-out request is reported as-is and
//! never repeated here.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use co2_engine::{CommitPayload, LedgerClient, LedgerError};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    pub result: Option<SubmitResult>,
    pub error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitResult {
    #[serde(rename = "commitId")]
    pub commit_id: String,
}

// ─────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────

pub struct RpcLedgerClient {
    client: Client,
    rpc_url: String,
}

impl RpcLedgerClient {
    pub fn new(client: Client, rpc_url: impl Into<String>) -> Self {
        RpcLedgerClient {
            client,
            rpc_url: rpc_url.into(),
        }
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn submit(&self, payload: &CommitPayload) -> Result<String, LedgerError> {
        let request = build_request(payload)?;

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::Transport(format!("HTTP {status}")));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Malformed(e.to_string()))?;
        let commit_id = parse_response(body)?;

        debug!(
            project_id = payload.project_id,
            commit_id = %commit_id,
            "ledger accepted submission"
        );
        Ok(commit_id)
    }
}

fn build_request(payload: &CommitPayload) -> Result<Value, LedgerError> {
    let bytes = payload.canonical_bytes()?;
    Ok(json!({
        "jsonrpc": "2.0",
        "id": payload.project_id,
        "method": "submitRecord",
        "params": {
            "methodology": payload.methodology,
            "projectId": payload.project_id,
            "payload": BASE64.encode(bytes),
        }
    }))
}

fn parse_response(body: RpcResponse) -> Result<String, LedgerError> {
    if let Some(err) = body.error {
        return Err(LedgerError::Rejected {
            code: err.code,
            message: err.message,
        });
    }
    let result = body
        .result
        .ok_or_else(|| LedgerError::Malformed("empty result from submitRecord".to_string()))?;
    if result.commit_id.trim().is_empty() {
        return Err(LedgerError::Malformed("blank commitId".to_string()));
    }
    Ok(result.commit_id)
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
