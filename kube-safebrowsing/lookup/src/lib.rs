//! A client for the Google Safe Browsing v4 Lookup API.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use kube_safebrowsing_core::{DomainSet, LookupError, LookupThreats, ThreatStatus};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_ENDPOINT: &str = "https://safebrowsing.googleapis.com/v4/threatMatches:find";

const CLIENT_ID: &str = "kube-safebrowsing";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

const THREAT_TYPES: &[&str] = &[
    "MALWARE",
    "SOCIAL_ENGINEERING",
    "UNWANTED_SOFTWARE",
    "POTENTIALLY_HARMFUL_APPLICATION",
];
const PLATFORM_TYPES: &[&str] = &["ANY_PLATFORM"];
const THREAT_ENTRY_TYPES: &[&str] = &["URL"];

// Error bodies are only logged, so keep them short.
const MAX_ERROR_BODY: usize = 256;

#[derive(Clone, Debug)]
pub struct SafeBrowsing {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FindThreatMatchesRequest<'a> {
    client: ClientInfo,
    threat_info: ThreatInfo<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientInfo {
    client_id: &'static str,
    client_version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThreatInfo<'a> {
    threat_types: &'a [&'a str],
    platform_types: &'a [&'a str],
    threat_entry_types: &'a [&'a str],
    threat_entries: Vec<RequestEntry>,
}

#[derive(Debug, Serialize)]
struct RequestEntry {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindThreatMatchesResponse {
    #[serde(default)]
    pub matches: Vec<ThreatMatch>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatMatch {
    #[serde(default)]
    pub threat_type: String,

    #[serde(default)]
    pub platform_type: String,

    #[serde(default)]
    pub threat: ThreatEntry,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ThreatEntry {
    #[serde(default)]
    pub url: Option<String>,
}

// === impl SafeBrowsing ===

impl SafeBrowsing {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
            timeout,
        })
    }

    pub fn with_endpoint(self, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..self
        }
    }

    fn request_error(&self, error: reqwest::Error) -> LookupError {
        if error.is_timeout() {
            return LookupError::Timeout {
                operation: "looking up threat matches",
                timeout: self.timeout,
            };
        }
        // The request URL carries the API key.
        LookupError::Provider(error.without_url().into())
    }
}

#[async_trait::async_trait]
impl LookupThreats for SafeBrowsing {
    async fn lookup(&self, domains: &DomainSet) -> Result<ThreatStatus, LookupError> {
        if domains.is_empty() {
            return Ok(ThreatStatus::new());
        }

        debug!(domains = domains.len(), "Retrieving threat matches");
        let rsp = self
            .http
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&FindThreatMatchesRequest::new(domains))
            .send()
            .await
            .map_err(|error| self.request_error(error))?;

        let status = rsp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LookupError::Unauthorized {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = rsp.text().await.unwrap_or_default();
            return Err(LookupError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        let rsp = rsp
            .json::<FindThreatMatchesResponse>()
            .await
            .map_err(|error| match self.request_error(error) {
                LookupError::Provider(error) => LookupError::InvalidResponse(error.to_string()),
                error => error,
            })?;

        Ok(match_domains(domains, &rsp.matches))
    }
}

// === impl FindThreatMatchesRequest ===

impl<'a> FindThreatMatchesRequest<'a> {
    fn new(domains: &DomainSet) -> Self {
        Self {
            client: ClientInfo {
                client_id: CLIENT_ID,
                client_version: CLIENT_VERSION,
            },
            threat_info: ThreatInfo {
                threat_types: THREAT_TYPES,
                platform_types: PLATFORM_TYPES,
                threat_entry_types: THREAT_ENTRY_TYPES,
                threat_entries: domains
                    .iter()
                    .map(|domain| RequestEntry {
                        url: pattern(domain),
                    })
                    .collect(),
            },
        }
    }
}

/// Marks a domain as matched when the provider returned a threat for the
/// domain's root pattern, `<domain>/`.
///
/// The Lookup API echoes the submitted entry rather than the listed
/// expression, so a listing of a parent domain (e.g. `bad.com/` for a submitted
/// `sub.bad.com/`) is reported against the submitted domain. Entries that were
/// never submitted are ignored.
pub fn match_domains(domains: &DomainSet, matches: &[ThreatMatch]) -> ThreatStatus {
    domains
        .iter()
        .map(|domain| {
            let pattern = pattern(domain);
            let found = matches
                .iter()
                .find(|m| m.threat.url.as_deref() == Some(pattern.as_str()));
            if let Some(m) = found {
                info!(%domain, threat = %m.threat_type, platform = %m.platform_type, "Threat match found");
            }
            (domain.to_string(), found.is_some())
        })
        .collect()
}

fn pattern(domain: &str) -> String {
    format!("{domain}/")
}
