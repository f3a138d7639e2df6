//! Statement gateway client

use crate::config::GatewayConfig;
use crate::Result;
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sluice_runtime::warehouse::{
    JobHandle, JobStatus, PollResponse, RawResult, WarehouseError, WarehouseService,
    WarehouseTarget,
};

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    sql: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DescribeResponse {
    status: JobStatus,
    #[serde(default)]
    error: Option<String>,
}

/// Warehouse service backed by an HTTP statement gateway
pub struct HttpWarehouse {
    endpoint: String,
    http_client: reqwest::Client,
}

impl HttpWarehouse {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        config.validate()?;

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    /// Attach the cluster, database and secret reference to a request
    fn with_target(&self, request: RequestBuilder, target: &WarehouseTarget) -> RequestBuilder {
        request
            .header("X-Warehouse-Cluster", &target.cluster_identifier)
            .header("X-Warehouse-Database", &target.database)
            .header("X-Warehouse-Secret-Arn", &target.secret_arn)
    }

    async fn send(&self, request: RequestBuilder) -> std::result::Result<Response, WarehouseError> {
        request.send().await.map_err(|e| {
            tracing::warn!(error = %e, "Statement gateway request failed");
            if e.is_timeout() || e.is_connect() || e.is_request() {
                WarehouseError::Transient(e.to_string())
            } else {
                WarehouseError::Protocol(e.to_string())
            }
        })
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> std::result::Result<T, WarehouseError> {
    response
        .json()
        .await
        .map_err(|e| WarehouseError::Protocol(format!("Failed to parse response: {}", e)))
}

/// Map a non-success status to an error. 429 and 5xx may clear up on
/// their own; any other status is final.
async fn classify(response: Response) -> WarehouseError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = error_message(status, &body);

    if status == StatusCode::TOO_MANY_REQUESTS {
        WarehouseError::Throttled(message)
    } else if status.is_server_error() {
        WarehouseError::Transient(message)
    } else if status == StatusCode::NOT_FOUND {
        WarehouseError::NotFound(message)
    } else if status.is_client_error() {
        WarehouseError::Rejected(message)
    } else {
        WarehouseError::Protocol(message)
    }
}

/// Prefer the gateway's `message` field over the raw body
fn error_message(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    if detail.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, detail)
    }
}

#[async_trait]
impl WarehouseService for HttpWarehouse {
    async fn submit_statement(
        &self,
        target: &WarehouseTarget,
        sql: &str,
    ) -> std::result::Result<JobHandle, WarehouseError> {
        let request = self
            .http_client
            .post(self.url("/statements"))
            .json(&SubmitRequest { sql });
        let response = self.send(self.with_target(request, target)).await?;

        if !response.status().is_success() {
            return Err(classify(response).await);
        }
        let submitted: SubmitResponse = decode(response).await?;
        tracing::debug!(statement_id = %submitted.id, "Statement accepted by gateway");
        Ok(JobHandle::new(submitted.id))
    }

    async fn poll_status(
        &self,
        target: &WarehouseTarget,
        handle: &JobHandle,
    ) -> std::result::Result<PollResponse, WarehouseError> {
        let request = self
            .http_client
            .get(self.url(&format!("/statements/{}", handle)));
        let response = self.send(self.with_target(request, target)).await?;

        // The gateway only lists a statement once it has a result cursor
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(PollResponse::TransientUnavailable);
        }
        if !response.status().is_success() {
            return Err(classify(response).await);
        }

        let described: DescribeResponse = decode(response).await?;
        Ok(PollResponse::Status {
            status: described.status,
            error: described.error,
        })
    }

    async fn fetch_result(
        &self,
        target: &WarehouseTarget,
        handle: &JobHandle,
    ) -> std::result::Result<RawResult, WarehouseError> {
        let request = self
            .http_client
            .get(self.url(&format!("/statements/{}/result", handle)));
        let response = self.send(self.with_target(request, target)).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(WarehouseError::Transient(format!(
                "result of {} is not available yet",
                handle
            )));
        }
        if !response.status().is_success() {
            return Err(classify(response).await);
        }
        decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_message_field() {
        let msg = error_message(StatusCode::BAD_REQUEST, r#"{"message": "syntax error at SELEC"}"#);
        assert_eq!(msg, "400 Bad Request: syntax error at SELEC");
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, "  "),
            "502 Bad Gateway"
        );
        assert_eq!(
            error_message(StatusCode::FORBIDDEN, "denied"),
            "403 Forbidden: denied"
        );
    }

    #[test]
    fn test_endpoint_trailing_slash_is_trimmed() {
        let client = HttpWarehouse::new(&GatewayConfig::new("http://localhost:9000/")).unwrap();
        assert_eq!(client.url("/statements"), "http://localhost:9000/statements");
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(HttpWarehouse::new(&GatewayConfig::new("localhost:9000")).is_err());
    }
}
