//! Operator metadata forwarder.
//!
//! Periodically reports what the operator is running to the Datadog
//! metadata intake. Sending is best effort: failures are logged and the
//! next tick tries again.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use kube::api::ListParams;
use kube::{Api, Client};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, InvalidHeaderValue};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::credentials::{CredentialError, CredentialManager};
use crate::crd::DatadogAgent;

pub const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");
const METADATA_PATH: &str = "api/v1/metadata";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("failed to list DatadogAgents: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to send metadata: {0}")]
    Http(#[from] reqwest::Error),

    #[error("metadata intake answered {0}")]
    Status(reqwest::StatusCode),

    #[error("API key is not a valid header value")]
    InvalidApiKey(#[from] InvalidHeaderValue),
}

/// Static facts about the operator process.
#[derive(Clone, Debug, Default)]
pub struct OperatorInfo {
    pub cluster_name: Option<String>,
    pub site: String,
    pub dd_url: Option<String>,
    pub profiles_enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OperatorMetadataPayload {
    pub hostname: String,
    pub timestamp: i64,
    #[serde(rename = "datadog_operator_metadata")]
    pub metadata: OperatorMetadata,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OperatorMetadata {
    pub operator_version: String,
    pub is_leader: bool,
    #[serde(rename = "datadogagent_enabled")]
    pub datadog_agent_enabled: bool,
    #[serde(rename = "datadogagentprofile_enabled")]
    pub datadog_agent_profile_enabled: bool,
    #[serde(rename = "datadogagent_count")]
    pub datadog_agent_count: usize,
    pub enabled_features: Vec<String>,
    pub cluster_name: String,
    #[serde(rename = "config_dd_url")]
    pub dd_url: String,
    #[serde(rename = "config_site")]
    pub site: String,
}

/// `DD_URL` when set, otherwise the metadata endpoint of `app.<site>`.
pub fn request_url(dd_url: Option<&str>, site: &str) -> String {
    match dd_url.filter(|u| !u.is_empty()) {
        Some(url) => format!("{}/{METADATA_PATH}", url.trim_end_matches('/')),
        None => format!("https://app.{site}/{METADATA_PATH}"),
    }
}

/// Build the payload from the DatadogAgents currently in the cluster.
pub fn build_payload(
    info: &OperatorInfo,
    hostname: &str,
    timestamp: i64,
    agents: &[DatadogAgent],
) -> OperatorMetadataPayload {
    let enabled_features: BTreeSet<String> = agents
        .iter()
        .filter_map(|dda| dda.status.as_ref())
        .flat_map(|status| status.enabled_features.iter().cloned())
        .collect();
    let cluster_name = info
        .cluster_name
        .clone()
        .or_else(|| {
            agents
                .iter()
                .find_map(|dda| dda.spec.global.cluster_name.clone())
        })
        .unwrap_or_default();

    OperatorMetadataPayload {
        hostname: hostname.to_string(),
        timestamp,
        metadata: OperatorMetadata {
            operator_version: OPERATOR_VERSION.to_string(),
            is_leader: true,
            datadog_agent_enabled: true,
            datadog_agent_profile_enabled: info.profiles_enabled,
            datadog_agent_count: agents.len(),
            enabled_features: enabled_features.into_iter().collect(),
            cluster_name,
            dd_url: info.dd_url.clone().unwrap_or_default(),
            site: info.site.clone(),
        },
    }
}

/// Request headers derived from the operator credentials.
///
/// Built on first use and dropped when the credentials rotate, so the next
/// request picks up the new API key.
#[derive(Clone, Debug, Default)]
pub struct HeaderCache(Arc<Mutex<Option<HeaderMap>>>);

impl HeaderCache {
    pub async fn get(&self, credentials: &CredentialManager) -> Result<HeaderMap, MetadataError> {
        let cached = self.lock().clone();
        if let Some(headers) = cached {
            return Ok(headers);
        }
        let creds = credentials.get().await?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut api_key = HeaderValue::from_str(&creds.api_key)?;
        api_key.set_sensitive(true);
        headers.insert("DD-API-KEY", api_key);
        *self.lock() = Some(headers.clone());
        Ok(headers)
    }

    pub fn invalidate(&self) {
        self.lock().take();
    }

    pub fn is_cached(&self) -> bool {
        self.lock().is_some()
    }

    /// Invalidate on every credential rotation.
    pub async fn subscribe(&self, credentials: &CredentialManager) {
        let cache = self.clone();
        credentials
            .register_callback(Box::new(move |_| {
                cache.invalidate();
                Ok(())
            }))
            .await;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<HeaderMap>> {
        // the map is replaced whole, a poisoned guard still holds a valid value
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct MetadataForwarder {
    kube: Client,
    http: reqwest::Client,
    credentials: Arc<CredentialManager>,
    headers: HeaderCache,
    info: OperatorInfo,
    url: String,
    hostname: String,
}

impl MetadataForwarder {
    pub fn new(
        kube: Client,
        credentials: Arc<CredentialManager>,
        info: OperatorInfo,
    ) -> Result<Self, MetadataError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(format!("datadog-operator/{OPERATOR_VERSION}"))
            .build()?;
        let hostname = std::env::var("DD_HOSTNAME")
            .ok()
            .filter(|h| !h.is_empty())
            .or_else(|| {
                hostname::get()
                    .ok()
                    .map(|h| h.to_string_lossy().to_string())
            })
            .unwrap_or_default();
        Ok(Self {
            url: request_url(info.dd_url.as_deref(), &info.site),
            kube,
            http,
            credentials,
            headers: HeaderCache::default(),
            info,
            hostname,
        })
    }

    /// Rebuild the request headers after the credentials rotate.
    pub async fn follow_credential_rotation(&self) {
        self.headers.subscribe(&self.credentials).await;
    }

    /// Send one payload.
    pub async fn send(&self) -> Result<(), MetadataError> {
        let headers = self.headers.get(&self.credentials).await?;
        let agents = Api::<DatadogAgent>::all(self.kube.clone())
            .list(&ListParams::default())
            .await?
            .items;
        let payload = build_payload(
            &self.info,
            &self.hostname,
            jiff::Timestamp::now().as_second(),
            &agents,
        );
        debug!(url = %self.url, agents = agents.len(), "Sending operator metadata");

        let response = self
            .http
            .post(&self.url)
            .headers(headers)
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MetadataError::Status(response.status()));
        }
        Ok(())
    }

    /// Send on a fixed interval until the task is aborted.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        info!(interval_secs = interval.as_secs(), "Starting metadata forwarder");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.send().await {
                    warn!(error = %e, "Failed to send operator metadata");
                }
            }
        })
    }
}
