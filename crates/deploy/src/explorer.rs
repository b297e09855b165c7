//! Etherscan-compatible verification client.

use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use url::Url;

use crate::{
    ApiKey, ExplorerClient, ExplorerResponse, ExplorerStatus, NetworkProfile, VerificationRequest,
    rpc,
};

/// Timeout of a single explorer HTTP request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How a submitted verification job is polled for its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPolling {
    pub attempts: usize,
    pub interval: Duration,
}

/// Envelope of every Etherscan API answer.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: serde_json::Value,
}

impl ApiResponse {
    fn ok(&self) -> bool {
        self.status == "1"
    }

    /// The human-readable part: `result` when it is a string, `message` otherwise.
    fn text(&self) -> String {
        match &self.result {
            serde_json::Value::String(s) if !s.is_empty() => s.clone(),
            _ => self.message.clone(),
        }
    }
}

/// Classify an explorer message.
pub fn classify_message(message: &str) -> ExplorerStatus {
    let lower = message.to_lowercase();

    if lower.contains("already verified") {
        ExplorerStatus::AlreadyVerified
    } else if lower.contains("pass - verified") {
        ExplorerStatus::Verified
    } else if lower.contains("unable to locate contractcode")
        || lower.contains("does not have bytecode")
    {
        ExplorerStatus::NotYetIndexed
    } else if lower.contains("pending in queue")
        || lower.contains("in progress")
        || lower.contains("rate limit")
        || lower.contains("try again later")
    {
        ExplorerStatus::Pending
    } else {
        ExplorerStatus::Rejected
    }
}

/// Client for the Etherscan v2 contract verification API.
#[derive(Debug, Clone)]
pub struct EtherscanClient {
    client: reqwest::Client,
    api_url: Url,
    api_key: ApiKey,
    chain_id: u64,
    polling: StatusPolling,
}

impl EtherscanClient {
    pub fn new(
        api_url: Url,
        api_key: ApiKey,
        chain_id: u64,
        polling: StatusPolling,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: rpc::create_client(REQUEST_TIMEOUT)?,
            api_url,
            api_key,
            chain_id,
            polling,
        })
    }

    /// Build a client for `profile`, or `None` when the profile does not verify.
    pub fn for_profile(
        profile: &NetworkProfile,
        polling: StatusPolling,
    ) -> anyhow::Result<Option<Self>> {
        if !profile.verification_enabled() {
            return Ok(None);
        }
        let Some(explorer) = profile.explorer() else {
            return Ok(None);
        };
        let Some(api_key) = explorer.api_key.clone() else {
            return Ok(None);
        };

        Self::new(explorer.api_url.clone(), api_key, profile.chain_id, polling).map(Some)
    }

    async fn send(&self, request: reqwest::RequestBuilder, action: &str) -> anyhow::Result<ApiResponse> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", action))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Explorer answered {} to {}", status, action);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", action))
    }

    /// Submit the source, returning the job id or an immediate verdict.
    async fn submit_source(&self, request: &VerificationRequest) -> anyhow::Result<Result<String, ExplorerResponse>> {
        let source_code = serde_json::to_string(&request.source.standard_json_input)
            .context("Failed to serialize standard JSON input")?;
        let constructor_args = hex::encode(&request.constructor_args_encoded);

        let form = [
            ("apikey", self.api_key.expose().to_string()),
            ("module", "contract".to_string()),
            ("action", "verifysourcecode".to_string()),
            ("contractaddress", request.address.to_string()),
            ("sourceCode", source_code),
            ("codeformat", "solidity-standard-json-input".to_string()),
            ("contractname", request.source.fully_qualified_name.clone()),
            ("compilerversion", request.source.compiler_version.clone()),
            // Etherscan's spelling.
            ("constructorArguements", constructor_args),
        ];

        let answer = self
            .send(
                self.client
                    .post(self.api_url.clone())
                    .query(&[("chainid", self.chain_id)])
                    .form(&form),
                "verifysourcecode",
            )
            .await?;

        let text = answer.text();
        if answer.ok() {
            return Ok(Ok(text));
        }

        Ok(Err(ExplorerResponse {
            status: classify_message(&text),
            message: text,
        }))
    }

    async fn check_status(&self, guid: &str) -> anyhow::Result<ExplorerResponse> {
        let answer = self
            .send(
                self.client.get(self.api_url.clone()).query(&[
                    ("chainid", self.chain_id.to_string().as_str()),
                    ("apikey", self.api_key.expose()),
                    ("module", "contract"),
                    ("action", "checkverifystatus"),
                    ("guid", guid),
                ]),
                "checkverifystatus",
            )
            .await?;

        let text = answer.text();
        Ok(ExplorerResponse {
            status: classify_message(&text),
            message: text,
        })
    }
}

impl ExplorerClient for EtherscanClient {
    async fn submit(&self, request: &VerificationRequest) -> anyhow::Result<ExplorerResponse> {
        if request.source.standard_json_input.is_null() {
            return Ok(ExplorerResponse {
                status: ExplorerStatus::Rejected,
                message: format!(
                    "artifact for {} carries no standard JSON input",
                    request.source.fully_qualified_name
                ),
            });
        }

        let guid = match self.submit_source(request).await? {
            Ok(guid) => guid,
            Err(verdict) => return Ok(verdict),
        };
        tracing::debug!(address = %request.address, guid = %guid, "Verification job queued");

        let mut last = ExplorerResponse {
            status: ExplorerStatus::Pending,
            message: "Pending in queue".to_string(),
        };

        for _ in 0..self.polling.attempts {
            tokio::time::sleep(self.polling.interval).await;

            last = self.check_status(&guid).await?;
            if last.status != ExplorerStatus::Pending {
                break;
            }
            tracing::trace!(guid = %guid, message = %last.message, "Verification job still queued");
        }

        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SourceMetadata;
    use alloy_core::primitives::{Address, Bytes};

    #[test]
    fn test_classify_message() {
        assert_eq!(
            classify_message("Contract source code already verified"),
            ExplorerStatus::AlreadyVerified
        );
        assert_eq!(classify_message("Already Verified"), ExplorerStatus::AlreadyVerified);
        assert_eq!(classify_message("Pass - Verified"), ExplorerStatus::Verified);
        assert_eq!(
            classify_message("Unable to locate ContractCode at 0x1234"),
            ExplorerStatus::NotYetIndexed
        );
        assert_eq!(
            classify_message("Address 0x1234 does not have bytecode"),
            ExplorerStatus::NotYetIndexed
        );
        assert_eq!(classify_message("Pending in queue"), ExplorerStatus::Pending);
        assert_eq!(
            classify_message("Max rate limit reached"),
            ExplorerStatus::Pending
        );
        assert_eq!(
            classify_message("Fail - Unable to verify. Compiled contract deployment bytecode does NOT match"),
            ExplorerStatus::Rejected
        );
        assert_eq!(classify_message("Invalid API Key"), ExplorerStatus::Rejected);
    }

    #[test]
    fn test_api_response_text_prefers_result() {
        let answer: ApiResponse = serde_json::from_value(serde_json::json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Pending in queue"
        }))
        .unwrap();
        assert!(!answer.ok());
        assert_eq!(answer.text(), "Pending in queue");

        let answer: ApiResponse = serde_json::from_value(serde_json::json!({
            "status": "0",
            "message": "NOTOK",
            "result": null
        }))
        .unwrap();
        assert_eq!(answer.text(), "NOTOK");
    }

    #[test]
    fn test_for_profile_requires_public_network_with_key() {
        let polling = StatusPolling {
            attempts: 1,
            interval: Duration::from_millis(1),
        };
        let explorer_url = Url::parse("https://api.etherscan.io/v2/api").unwrap();

        let local = NetworkProfile::local("hardhat", 31337, Url::parse("http://127.0.0.1:8545").unwrap())
            .with_explorer(explorer_url.clone(), ApiKey::new("key"));
        assert!(EtherscanClient::for_profile(&local, polling).unwrap().is_none());

        let rpc_url = Url::parse("https://rpc.sepolia.org").unwrap();
        let keyless = NetworkProfile::public("sepolia", 11155111, rpc_url.clone(), 6)
            .unwrap()
            .with_explorer(explorer_url.clone(), None);
        assert!(EtherscanClient::for_profile(&keyless, polling).unwrap().is_none());

        let sepolia = NetworkProfile::public("sepolia", 11155111, rpc_url, 6)
            .unwrap()
            .with_explorer(explorer_url, ApiKey::new("key"));
        let client = EtherscanClient::for_profile(&sepolia, polling).unwrap().unwrap();
        assert_eq!(client.chain_id, 11155111);
    }

    #[tokio::test]
    async fn test_missing_standard_json_is_rejected_without_network() {
        // Unroutable endpoint: any request would fail instead of returning a verdict.
        let client = EtherscanClient::new(
            Url::parse("http://127.0.0.1:9/api").unwrap(),
            ApiKey::new("key").unwrap(),
            1,
            StatusPolling {
                attempts: 1,
                interval: Duration::from_millis(1),
            },
        )
        .unwrap();

        let response = client
            .submit(&VerificationRequest {
                address: Address::ZERO,
                constructor_args_encoded: Bytes::new(),
                source: SourceMetadata {
                    fully_qualified_name: "contracts/Token.sol:Token".into(),
                    compiler_version: "v0.8.20+commit.a1b79de6".into(),
                    standard_json_input: serde_json::Value::Null,
                },
            })
            .await
            .unwrap();
        assert_eq!(response.status, ExplorerStatus::Rejected);
    }
}
