//! HTTP implementation of [`wslcb_store::pipeline::AddressValidator`].

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use wslcb_model::StandardizedAddress;
use wslcb_store::pipeline::AddressValidator;

use crate::config;

const BASE_URL: &str = "https://address-validator.exe.xyz:8000";
const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize, Default)]
struct StandardizeResponse {
    #[serde(default)]
    address_line_1: String,
    #[serde(default)]
    address_line_2: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    zip_code: String,
}

/// Blocking HTTP client for the address-validation service. One instance
/// is owned by a single ingest batch and closed when the batch finishes
/// (§5's shared-resource policy).
pub struct HttpAddressValidator {
    client: reqwest::blocking::Client,
    api_key: &'static str,
    base_url: String,
}

impl HttpAddressValidator {
    /// Build a client, resolving the API key from `env_file` (falling
    /// back to the `ADDRESS_VALIDATOR_API_KEY` environment variable).
    pub fn new(env_file: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::blocking::Client::builder()
                .timeout(TIMEOUT)
                .build()
                .expect("reqwest client built from static config"),
            api_key: config::api_key(&env_file.into()),
            base_url: BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(env_file: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::builder()
                .timeout(TIMEOUT)
                .build()
                .unwrap(),
            api_key: config::api_key(&env_file.into()),
            base_url: base_url.into(),
        }
    }
}

impl AddressValidator for HttpAddressValidator {
    fn standardize(&self, address: &str) -> Option<StandardizedAddress> {
        if self.api_key.is_empty() {
            return None;
        }

        let response = self
            .client
            .post(format!("{}/api/standardize", self.base_url))
            .header("X-API-Key", self.api_key)
            .json(&serde_json::json!({ "address": address }))
            .send();

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(address, error = %e, "address validation request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::warn!(
                address,
                status = response.status().as_u16(),
                "address validation API returned non-success status"
            );
            return None;
        }

        match response.json::<StandardizeResponse>() {
            Ok(body) => Some(StandardizedAddress {
                address_line_1: body.address_line_1,
                address_line_2: body.address_line_2,
                city: body.city,
                state: body.state,
                zip_code: body.zip_code,
            }),
            Err(e) => {
                tracing::warn!(address, error = %e, "malformed address validation response");
                None
            }
        }
    }
}
