//! Sequencing of a deployment: resolve, submit, confirm, verify.

use alloy_core::primitives::{Address, Bytes, TxHash};
use serde::Serialize;

use crate::{
    ArtifactSource, CancelSignal, ChainReader, ConfirmationPolicy, ConfirmationWaiter,
    ConfirmedDeployment, DeployError, DeploymentRequest, ExplorerClient, ManifestStore,
    NetworkProfile, NetworkRegistry, PlannedDeployment, RetryPolicy, Signer, SignerHandle,
    SourceMetadata, Submitter, VerificationRequester, VerificationStatus,
};

/// Stage of a single deployment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeploymentStage {
    Start,
    Resolving,
    Submitting,
    Confirming,
    Verifying,
    Done,
    Failed,
}

impl DeploymentStage {
    /// Done or Failed. Terminal stages have no successors.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStage::Done | DeploymentStage::Failed)
    }

    /// Whether `next` may follow this stage.
    pub fn can_transition_to(&self, next: DeploymentStage) -> bool {
        use DeploymentStage::*;

        matches!(
            (self, next),
            (Start, Resolving)
                | (Resolving, Submitting)
                | (Resolving, Failed)
                | (Submitting, Confirming)
                | (Submitting, Failed)
                | (Confirming, Verifying)
                | (Confirming, Done)
                | (Confirming, Failed)
                | (Verifying, Done)
        )
    }
}

/// Machine-readable outcome of one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub contract_name: String,
    pub network: String,
    pub status: DeploymentStage,
    /// Contract address, known as soon as the creation transaction is broadcast.
    pub address: Option<Address>,
    pub transaction_hash: Option<TxHash>,
    /// Depth reached when the deployment was confirmed.
    pub confirmations: Option<u64>,
    /// `None` when the deployment failed before verification could be considered.
    pub verification_status: Option<VerificationStatus>,
    pub verification_attempts: usize,
    /// The deployment was taken from the manifest instead of being submitted.
    pub reused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeploymentRecord {
    fn new(contract_name: &str, network: &str) -> Self {
        Self {
            contract_name: contract_name.to_string(),
            network: network.to_string(),
            status: DeploymentStage::Start,
            address: None,
            transaction_hash: None,
            confirmations: None,
            verification_status: None,
            verification_attempts: 0,
            reused: false,
            error_kind: None,
            error: None,
        }
    }

    fn advance(&mut self, next: DeploymentStage) {
        debug_assert!(
            self.status.can_transition_to(next),
            "invalid transition {} -> {}",
            self.status,
            next
        );
        tracing::debug!(
            contract = %self.contract_name,
            network = %self.network,
            from = %self.status,
            to = %next,
            "Stage transition"
        );
        self.status = next;
    }

    fn confirmed(&mut self, deployment: &ConfirmedDeployment) {
        self.address = Some(deployment.contract_address);
        self.transaction_hash = Some(deployment.transaction_hash);
        self.confirmations = Some(deployment.confirmations());
    }

    /// The deployment itself failed. Verification outcomes do not count.
    pub fn is_failed(&self) -> bool {
        self.status == DeploymentStage::Failed
    }

    /// The explorer refused the source.
    pub fn verification_failed(&self) -> bool {
        self.verification_status
            .as_ref()
            .is_some_and(VerificationStatus::is_failure)
    }
}

/// Records of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub records: Vec<DeploymentRecord>,
}

impl RunReport {
    /// At least one deployment ended in [`DeploymentStage::Failed`].
    pub fn deployment_failed(&self) -> bool {
        self.records.iter().any(DeploymentRecord::is_failed)
    }

    /// Some explorer refused a source. Does not affect the exit code.
    pub fn verification_failed(&self) -> bool {
        self.records.iter().any(DeploymentRecord::verification_failed)
    }

    /// Process exit code: 1 when a deployment failed, 0 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.deployment_failed() { 1 } else { 0 }
    }
}

/// Drives deployments for one network.
pub struct Orchestrator<S, C, E, A> {
    registry: NetworkRegistry,
    network: String,
    signer: SignerHandle<S>,
    chain: C,
    explorer: Option<E>,
    artifacts: A,
    manifest: ManifestStore,
    confirmation: ConfirmationPolicy,
    retry: RetryPolicy,
    redeploy: bool,
    cancel: CancelSignal,
}

impl<S, C, E, A> Orchestrator<S, C, E, A>
where
    S: Signer,
    C: ChainReader,
    E: ExplorerClient,
    A: ArtifactSource,
{
    /// Create an orchestrator for `network`. Deployments are submitted fresh only
    /// when the manifest has no matching entry, and are never cancelled.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: NetworkRegistry,
        network: impl Into<String>,
        signer: S,
        chain: C,
        explorer: Option<E>,
        artifacts: A,
        manifest: ManifestStore,
        confirmation: ConfirmationPolicy,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            network: network.into(),
            signer: SignerHandle::new(signer),
            chain,
            explorer,
            artifacts,
            manifest,
            confirmation,
            retry,
            redeploy: false,
            cancel: CancelSignal::never(),
        }
    }

    /// Ignore the manifest and always submit fresh deployments.
    pub fn with_redeploy(mut self, redeploy: bool) -> Self {
        self.redeploy = redeploy;
        self
    }

    /// Stop in-flight deployments when `cancel` trips.
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Identifier of the network deployments target.
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Account every deployment is signed by.
    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    /// Store deployments are recorded in and reused from.
    pub fn manifest(&self) -> &ManifestStore {
        &self.manifest
    }

    /// Turn a plan entry into a request signed by the configured deployer.
    pub fn request_for(&self, planned: &PlannedDeployment) -> DeploymentRequest {
        DeploymentRequest {
            contract_name: planned.contract.clone(),
            constructor_args: planned.args.clone(),
            signer: self.signer.address(),
        }
    }

    /// Run one deployment to a terminal stage.
    pub async fn deploy(&self, request: DeploymentRequest) -> DeploymentRecord {
        let mut record = DeploymentRecord::new(&request.contract_name, &self.network);
        record.advance(DeploymentStage::Resolving);

        if let Err(e) = self.run(&request, &mut record).await {
            self.fail(&mut record, e);
        }
        record
    }

    /// Run several deployments concurrently. Submissions still take turns on the signer.
    pub async fn deploy_all(&self, requests: Vec<DeploymentRequest>) -> RunReport {
        tracing::info!(
            network = %self.network,
            count = requests.len(),
            "Starting deployments..."
        );

        let records =
            futures::future::join_all(requests.into_iter().map(|request| self.deploy(request)))
                .await;

        RunReport { records }
    }

    /// Verify a deployment already recorded in the manifest, without submitting anything.
    pub async fn verify_existing(&self, contract_name: &str) -> DeploymentRecord {
        let mut record = DeploymentRecord::new(contract_name, &self.network);
        record.advance(DeploymentStage::Resolving);

        if let Err(e) = self.run_verify_existing(contract_name, &mut record).await {
            self.fail(&mut record, e);
        }
        record
    }

    async fn run(
        &self,
        request: &DeploymentRequest,
        record: &mut DeploymentRecord,
    ) -> Result<(), DeployError> {
        let profile = self.registry.resolve(&self.network)?;
        record.advance(DeploymentStage::Submitting);

        let submitter = Submitter::new(&self.artifacts, &self.chain, profile.chain_id);
        let prepared = submitter.prepare(request).await?;
        let fingerprint = prepared.fingerprint();
        let source = prepared.artifact.source_metadata();

        let previous = if self.redeploy {
            None
        } else {
            self.manifest
                .find(&profile.network_id, &request.contract_name, &fingerprint)
                .await
                .map_err(DeployError::Manifest)?
        };

        let confirmed = match previous {
            Some(entry) => {
                tracing::info!(
                    contract = %request.contract_name,
                    network = %profile.network_id,
                    address = %entry.deployment.contract_address,
                    "Reusing deployment from manifest"
                );
                record.reused = true;
                record.advance(DeploymentStage::Confirming);
                entry.deployment
            }
            None => {
                if self.cancel.is_cancelled() {
                    return Err(DeployError::Cancelled);
                }

                let pending = submitter
                    .submit(&prepared, &self.signer, &self.cancel)
                    .await?;
                record.address = Some(pending.contract_address);
                record.transaction_hash = Some(pending.transaction_hash);
                record.advance(DeploymentStage::Confirming);

                let confirmed = ConfirmationWaiter::new(&self.chain, self.confirmation)
                    .await_confirmations(&pending, profile.required_confirmations(), &self.cancel)
                    .await?;

                if let Err(e) = self
                    .manifest
                    .record_confirmed(
                        &profile.network_id,
                        &confirmed,
                        &fingerprint,
                        &request.constructor_args,
                        &prepared.encoded_args,
                    )
                    .await
                {
                    tracing::error!(
                        contract = %confirmed.contract_name,
                        address = %confirmed.contract_address,
                        error = %format!("{:#}", e),
                        "Failed to record deployment in the manifest"
                    );
                }
                confirmed
            }
        };

        record.confirmed(&confirmed);
        self.verify_phase(&profile, &confirmed, &prepared.encoded_args, &source, record)
            .await;
        Ok(())
    }

    async fn run_verify_existing(
        &self,
        contract_name: &str,
        record: &mut DeploymentRecord,
    ) -> Result<(), DeployError> {
        let profile = self.registry.resolve(&self.network)?;
        record.advance(DeploymentStage::Submitting);

        let manifest = self.manifest.load().await.map_err(DeployError::Manifest)?;
        let entry = manifest
            .entry(&profile.network_id, contract_name)
            .cloned()
            .ok_or_else(|| {
                DeployError::Manifest(anyhow::anyhow!(
                    "no recorded deployment of {} on {}",
                    contract_name,
                    profile.network_id
                ))
            })?;

        let source = self
            .artifacts
            .artifact(contract_name)
            .await
            .map_err(|e| DeployError::Submission {
                contract: contract_name.to_string(),
                reason: format!("{:#}", e),
            })?
            .source_metadata();

        record.reused = true;
        record.advance(DeploymentStage::Confirming);
        record.confirmed(&entry.deployment);

        self.verify_phase(&profile, &entry.deployment, &entry.encoded_args, &source, record)
            .await;
        Ok(())
    }

    async fn verify_phase(
        &self,
        profile: &NetworkProfile,
        confirmed: &ConfirmedDeployment,
        encoded_args: &Bytes,
        source: &SourceMetadata,
        record: &mut DeploymentRecord,
    ) {
        let requester = VerificationRequester::new(self.explorer.as_ref(), self.retry);

        let Some(attempts) = requester.verify(confirmed, encoded_args, source, profile) else {
            record.verification_status = Some(VerificationStatus::Skipped);
            record.advance(DeploymentStage::Done);
            self.log_done(record);
            return;
        };

        record.advance(DeploymentStage::Verifying);
        let (status, count) = attempts.run(&self.cancel).await;
        record.verification_attempts = count;

        if status != VerificationStatus::Cancelled {
            if let Err(e) = self
                .manifest
                .record_verification(&profile.network_id, &confirmed.contract_name, &status)
                .await
            {
                tracing::warn!(
                    contract = %confirmed.contract_name,
                    error = %format!("{:#}", e),
                    "Failed to record verification status"
                );
            }
        }

        record.verification_status = Some(status);
        record.advance(DeploymentStage::Done);
        self.log_done(record);
    }

    fn log_done(&self, record: &DeploymentRecord) {
        tracing::info!(
            contract = %record.contract_name,
            network = %record.network,
            address = ?record.address,
            confirmations = ?record.confirmations,
            verification = ?record.verification_status,
            reused = record.reused,
            "Deployment done"
        );
    }

    fn fail(&self, record: &mut DeploymentRecord, error: DeployError) {
        if error.after_broadcast() || record.transaction_hash.is_some() {
            tracing::error!(
                contract = %record.contract_name,
                network = %record.network,
                tx_hash = ?record.transaction_hash,
                error = %error,
                "Deployment failed after broadcast; the transaction may still land, not resubmitting"
            );
        } else {
            tracing::error!(
                contract = %record.contract_name,
                network = %record.network,
                error = %error,
                "Deployment failed"
            );
        }

        record.error_kind = Some(error.kind());
        record.error = Some(error.to_string());
        record.advance(DeploymentStage::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_transitions() {
        use DeploymentStage::*;

        assert!(Start.can_transition_to(Resolving));
        assert!(Confirming.can_transition_to(Done));
        assert!(Confirming.can_transition_to(Verifying));
        assert!(Verifying.can_transition_to(Done));

        assert!(!Start.can_transition_to(Submitting));
        assert!(!Verifying.can_transition_to(Failed));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Resolving));
        assert!(Done.is_terminal() && Failed.is_terminal());
    }

    #[test]
    fn test_report_exit_code_ignores_verification() {
        let mut record = DeploymentRecord::new("Token", "sepolia");
        record.status = DeploymentStage::Done;
        record.verification_status = Some(VerificationStatus::Rejected("bytecode mismatch".into()));

        let report = RunReport {
            records: vec![record.clone()],
        };
        assert!(report.verification_failed());
        assert!(!report.deployment_failed());
        assert_eq!(report.exit_code(), 0);

        record.status = DeploymentStage::Failed;
        let report = RunReport {
            records: vec![record],
        };
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_record_json_shape() {
        let mut record = DeploymentRecord::new("Token", "hardhat");
        record.status = DeploymentStage::Done;
        record.confirmations = Some(1);
        record.verification_status = Some(VerificationStatus::Skipped);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["contractName"], "Token");
        assert_eq!(json["status"], "done");
        assert_eq!(json["confirmations"], 1);
        assert_eq!(json["verificationStatus"]["status"], "skipped");
        assert!(json.get("error").is_none());
    }
}
