//! Conference routing HTTP API
//!
//! Two endpoints are consumed:
//!
//! - `GET  {base}/conference/agent/{id}/resource-address` resolves the address
//!   the telephony client dials to enter the agent's personal conference
//! - `POST {base}/conference/{name}/dial-out` asks the server to place a call
//!   and bridge it into an existing conference
//! - `POST {base}/calls/{id}/end` hangs up a remote leg, used for customers
//!   bridged into the conference

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::call::CallContext;
use crate::error::{CoordinatorError, CoordinatorResult};

/// Response of the resource-address endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAddress {
    pub dial_address: String,
    pub conference_name: String,
    #[serde(default)]
    pub resource_address: Option<String>,
    #[serde(default)]
    pub conference_id: Option<i64>,
}

/// Body of a dial-out request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialOutRequest {
    pub phone_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub context: CallContext,
}

/// Response of the dial-out endpoint
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DialOutResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, deserialize_with = "string_or_number")]
    pub call_id: Option<String>,
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub conference_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

impl DialOutResponse {
    /// Identifier of the new call leg, preferring the carrier SID
    pub fn leg_id(&self) -> Option<&str> {
        self.call_sid.as_deref().or(self.call_id.as_deref())
    }
}

/// Response of the end-call endpoint
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EndCallResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, deserialize_with = "string_or_number")]
    pub call_id: Option<String>,
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: String,
}

/// Contract of the conference routing service
#[async_trait]
pub trait ConferenceApi: Send + Sync {
    async fn resource_address(&self, agent_id: &str) -> CoordinatorResult<ResourceAddress>;

    async fn dial_out(&self, conference_name: &str, request: &DialOutRequest) -> CoordinatorResult<DialOutResponse>;

    /// End a server-side call leg by carrier SID or backend id
    async fn end_call(&self, call_id: &str) -> CoordinatorResult<EndCallResponse>;
}

/// [`ConferenceApi`] over HTTP with `reqwest`
#[derive(Debug, Clone)]
pub struct HttpConferenceApi {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpConferenceApi {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> CoordinatorResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| CoordinatorError::config("api_base_url", e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(CoordinatorError::config("api_base_url", "must be a hierarchical URL"));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoordinatorError::config("http_client", e.to_string()))?;
        Ok(Self { client, base_url, token })
    }

    fn endpoint(&self, segments: &[&str]) -> CoordinatorResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CoordinatorError::config("api_base_url", "must be a hierarchical URL"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> CoordinatorResult<T> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            return Err(CoordinatorError::ConferenceApi {
                status: Some(status.as_u16()),
                message,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl ConferenceApi for HttpConferenceApi {
    async fn resource_address(&self, agent_id: &str) -> CoordinatorResult<ResourceAddress> {
        let url = self.endpoint(&["conference", "agent", agent_id, "resource-address"])?;
        debug!(url = %url, "Resolving conference resource address");
        self.send(self.client.get(url)).await
    }

    async fn dial_out(&self, conference_name: &str, request: &DialOutRequest) -> CoordinatorResult<DialOutResponse> {
        let url = self.endpoint(&["conference", conference_name, "dial-out"])?;
        debug!(url = %url, phone_number = %request.phone_number, "Requesting conference dial-out");
        self.send(self.client.post(url).json(request)).await
    }

    async fn end_call(&self, call_id: &str) -> CoordinatorResult<EndCallResponse> {
        let url = self.endpoint(&["calls", call_id, "end"])?;
        debug!(url = %url, "Ending remote call leg");
        self.send(self.client.post(url)).await
    }
}
