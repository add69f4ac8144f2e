//! JSON-RPC adapter for the external download engine
//!
//! The engine speaks aria2-flavored JSON-RPC 2.0 over HTTP. All wire-format
//! details, including the `token:` secret convention and the engine's string
//! status vocabulary, stay inside this module; callers see only
//! [`EngineJobStatus`] values and classified [`EngineError`]s.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{DownloadEngine, EngineJobStatus};
use crate::error::EngineError;
use crate::types::DownloadStatus;

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Download engine client speaking JSON-RPC 2.0
#[derive(Debug, Clone)]
pub struct RpcDownloadEngine {
    client: reqwest::Client,
    endpoint: String,
    secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct TellStatusResult {
    gid: String,
    status: String,
    #[serde(rename = "totalLength", default)]
    total_length: String,
    #[serde(rename = "completedLength", default)]
    completed_length: String,
    #[serde(rename = "downloadSpeed", default)]
    download_speed: String,
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

impl TellStatusResult {
    fn into_status(self) -> EngineJobStatus {
        EngineJobStatus {
            handle: self.gid,
            status: DownloadStatus::from_engine_str(&self.status),
            total_length: self.total_length.parse().unwrap_or(0),
            completed_length: self.completed_length.parse().unwrap_or(0),
            speed: self.download_speed.parse().unwrap_or(0),
            error_code: self.error_code,
            error_message: self.error_message,
        }
    }
}

impl RpcDownloadEngine {
    /// Create a client against the engine's JSON-RPC endpoint
    pub fn new(endpoint: impl Into<String>, secret: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            secret,
        }
    }

    fn params(&self, rest: Vec<Value>) -> Vec<Value> {
        let mut params = Vec::with_capacity(rest.len() + 1);
        if let Some(secret) = &self.secret {
            params.push(json!(format!("token:{secret}")));
        }
        params.extend(rest);
        params
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, EngineError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": "dt",
            "method": method,
            "params": self.params(params),
        });
        debug!(method, "engine rpc call");

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let http_status = response.status().as_u16();
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::classify(Some(http_status), None, &text));
        }

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| EngineError::network(format!("malformed rpc response: {e}")))?;

        if let Some(error) = parsed.error {
            return Err(EngineError::classify(
                None,
                Some(&error.code.to_string()),
                &error.message,
            ));
        }
        parsed
            .result
            .ok_or_else(|| EngineError::network("rpc response missing result"))
    }
}

#[async_trait]
impl DownloadEngine for RpcDownloadEngine {
    async fn submit(&self, url: &str, dir: &Path, file_name: &str) -> Result<String, EngineError> {
        let options = json!({
            "dir": dir.to_string_lossy(),
            "out": file_name,
        });
        let result = self
            .call("aria2.addUri", vec![json!([url]), options])
            .await?;
        result
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| EngineError::network("addUri returned a non-string handle"))
    }

    async fn status(&self, handle: &str) -> Result<EngineJobStatus, EngineError> {
        let result = self.call("aria2.tellStatus", vec![json!(handle)]).await?;
        let status: TellStatusResult = serde_json::from_value(result)
            .map_err(|e| EngineError::network(format!("malformed tellStatus result: {e}")))?;
        Ok(status.into_status())
    }

    async fn batch_status(&self, handles: &[String]) -> Result<Vec<EngineJobStatus>, EngineError> {
        if handles.is_empty() {
            return Ok(Vec::new());
        }
        let calls: Vec<Value> = handles
            .iter()
            .map(|handle| {
                json!({
                    "methodName": "aria2.tellStatus",
                    "params": self.params(vec![json!(handle)]),
                })
            })
            .collect();

        let body = json!({
            "jsonrpc": "2.0",
            "id": "dt",
            "method": "system.multicall",
            "params": [calls],
        });
        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let http_status = response.status().as_u16();
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::classify(Some(http_status), None, &text));
        }
        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| EngineError::network(format!("malformed multicall response: {e}")))?;
        let results = parsed
            .result
            .and_then(|v| v.as_array().cloned())
            .ok_or_else(|| EngineError::network("multicall response missing result array"))?;

        // Each element is either [tellStatusResult] or a fault object for a
        // handle the engine has forgotten; forgotten handles are skipped.
        let mut statuses = Vec::with_capacity(results.len());
        for entry in results {
            let Some(inner) = entry.as_array().and_then(|a| a.first()).cloned() else {
                continue;
            };
            if let Ok(status) = serde_json::from_value::<TellStatusResult>(inner) {
                statuses.push(status.into_status());
            }
        }
        Ok(statuses)
    }

    async fn remove(&self, handle: &str) -> Result<(), EngineError> {
        self.call("aria2.remove", vec![json!(handle)]).await?;
        Ok(())
    }

    async fn force_remove(&self, handle: &str) -> Result<(), EngineError> {
        self.call("aria2.forceRemove", vec![json!(handle)]).await?;
        Ok(())
    }

    async fn purge_history(&self, handle: &str) -> Result<(), EngineError> {
        self.call("aria2.removeDownloadResult", vec![json!(handle)])
            .await?;
        Ok(())
    }

    async fn pause(&self, handle: &str) -> Result<(), EngineError> {
        self.call("aria2.pause", vec![json!(handle)]).await?;
        Ok(())
    }

    async fn unpause(&self, handle: &str) -> Result<(), EngineError> {
        self.call("aria2.unpause", vec![json!(handle)]).await?;
        Ok(())
    }
}
