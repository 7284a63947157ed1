//! HTTP client for the visitor ledger endpoints.

use crate::ledger::{ListQuery, ListResponse, RecordResponse, StatusResponse, VisitPayload};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const VISITORS_PATH: &str = "api/v1/visitors";
const STATUS_PATH: &str = "api/v1/status";

#[derive(Debug, Error)]
pub enum ClientError {
    /// The ledger could not be reached or the request timed out.
    #[error("ledger unreachable: {0}")]
    Network(#[from] reqwest::Error),

    /// The ledger answered with a non-success status.
    #[error("ledger returned {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("unexpected ledger response: {0}")]
    Decode(String),

    #[error("invalid ledger URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Clone)]
pub struct LedgerClient {
    http: Client,
    base_url: Url,
}

impl LedgerClient {
    pub fn new(base_url: &str, timeout_secs: u64, user_agent: &str) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .user_agent(user_agent)
            .build()?;

        Self::with_http(http, base_url)
    }

    pub fn with_http(http: Client, base_url: &str) -> Result<Self, ClientError> {
        let normalized = format!("{}/", base_url.trim().trim_end_matches('/'));
        let base_url = Url::parse(&normalized).map_err(|error| ClientError::InvalidUrl {
            url: base_url.to_string(),
            reason: error.to_string(),
        })?;

        Ok(Self { http, base_url })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|error| ClientError::InvalidUrl {
                url: format!("{}{path}", self.base_url),
                reason: error.to_string(),
            })
    }

    pub async fn submit(&self, payload: &VisitPayload) -> Result<RecordResponse, ClientError> {
        let response = self
            .http
            .post(self.endpoint(VISITORS_PATH)?)
            .json(payload)
            .send()
            .await?;

        decode(response).await
    }

    pub async fn list(&self, query: ListQuery) -> Result<ListResponse, ClientError> {
        let mut url = self.endpoint(VISITORS_PATH)?;
        url.query_pairs_mut()
            .append_pair("limit", &query.limit.to_string())
            .append_pair("active", if query.active_only { "true" } else { "false" });

        let response = self.http.get(url).send().await?;
        let listing: ListResponse = decode(response).await?;

        if !listing.success {
            return Err(ClientError::Decode("listing reported success=false".to_string()));
        }

        Ok(listing)
    }

    pub async fn status(&self) -> Result<StatusResponse, ClientError> {
        let response = self.http.get(self.endpoint(STATUS_PATH)?).send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|parsed| parsed.error)
            .unwrap_or(body);
        return Err(ClientError::Status { status, message });
    }

    serde_json::from_str(&body).map_err(|error| ClientError::Decode(error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{ClientError, LedgerClient};
    use crate::ledger::{ListQuery, VisitPayload};
    use reqwest::StatusCode;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> LedgerClient {
        LedgerClient::new(&server.uri(), 5, "visitorhub-test").expect("client")
    }

    #[tokio::test]
    async fn submit_posts_camel_case_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/visitors"))
            .and(body_partial_json(json!({ "id": "a", "ip": "1.2.3.4", "batteryLevel": "85%" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "message": "New visitor saved",
                "visitCount": 1
            })))
            .expect(1)
            .mount(&server)
            .await;

        let payload = VisitPayload {
            id: Some("a".to_string()),
            ip: Some("1.2.3.4".to_string()),
            battery_level: Some("85%".to_string()),
            ..VisitPayload::default()
        };
        let response = client(&server).submit(&payload).await.expect("submit");

        assert!(response.success);
        assert_eq!(response.visit_count, Some(1));
    }

    #[tokio::test]
    async fn error_status_carries_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({ "error": "Missing required fields" })),
            )
            .mount(&server)
            .await;

        let error = client(&server)
            .submit(&VisitPayload::default())
            .await
            .expect_err("should fail");

        match error {
            ClientError::Status { status, message } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(message, "Missing required fields");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn list_sends_limit_and_active_flag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/visitors"))
            .and(query_param("limit", "25"))
            .and(query_param("active", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "visitors": [{
                    "id": "a",
                    "ip": "1.2.3.4",
                    "city": "-",
                    "country": "-",
                    "browser": "Chrome",
                    "os": "Windows",
                    "batteryLevel": "-",
                    "firstVisit": "2026-05-01T09:00:00Z",
                    "lastVisit": "2026-05-01T09:05:00Z",
                    "visitCount": 3
                }],
                "stats": { "total": 1, "active": 1, "today": 1 }
            })))
            .mount(&server)
            .await;

        let listing = client(&server)
            .list(ListQuery {
                limit: 25,
                active_only: true,
            })
            .await
            .expect("listing");

        assert_eq!(listing.visitors.len(), 1);
        assert_eq!(listing.visitors[0].visit_count, 3);
        assert_eq!(listing.stats.total, 1);
    }

    #[tokio::test]
    async fn base_url_with_path_prefix_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hub/api/v1/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "ok",
                "total": 4,
                "lastVisitAt": null
            })))
            .mount(&server)
            .await;

        let ledger = LedgerClient::new(&format!("{}/hub/", server.uri()), 5, "visitorhub-test")
            .expect("client");
        let status = ledger.status().await.expect("status");

        assert_eq!(status.total, 4);
        assert_eq!(status.last_visit_at, None);
    }

    #[tokio::test]
    async fn unreachable_ledger_is_a_network_error() {
        let ledger = LedgerClient::new("http://127.0.0.1:9", 1, "visitorhub-test").expect("client");

        let error = ledger.status().await.expect_err("nothing listens on port 9");
        assert!(matches!(error, ClientError::Network(_)));
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(matches!(
            LedgerClient::new("not a url", 5, "visitorhub-test"),
            Err(ClientError::InvalidUrl { .. })
        ));
    }
}
