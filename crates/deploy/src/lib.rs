//! hatch-deploy - Smart contract deployment and verification library.
//!
//! This crate submits compiled contracts to a network, waits for the confirmation depth
//! that network requires and, on public networks, verifies the sources with a block
//! explorer. Deployments are recorded in a manifest so re-runs are idempotent.

mod abi;
pub use abi::ConstructorArgs;

mod artifacts;
pub use artifacts::{Artifact, ArtifactSource, ArtifactStore, SourceMetadata};

mod builder;
pub use builder::{LiveOrchestrator, OrchestratorBuilder};

mod cancel;
pub use cancel::{CancelHandle, CancelSignal, cancel_pair};

mod chain;
pub use chain::{ChainReader, RpcChain, TransactionReceipt};

mod config;
pub use config::{
    ConfirmationConfig, DEFAULT_API_KEY_ENV, DEFAULT_PUBLIC_CONFIRMATIONS, HATCH_CONFIG_FILENAME,
    HatchConfig, NetworkConfig, PlannedDeployment, VerificationConfig,
};

mod confirmation;
pub use confirmation::{
    ConfirmationPolicy, ConfirmationWaiter, ConfirmedDeployment, confirmations_at,
};

mod error;
pub use error::DeployError;

mod explorer;
pub use explorer::{EtherscanClient, StatusPolling, classify_message};

mod manifest;
pub use manifest::{DeploymentManifest, MANIFEST_VERSION, ManifestEntry, ManifestStore};

mod network;
pub use network::{
    ApiKey, DeployerAccount, ExplorerEndpoint, NetworkProfile, NetworkRegistry, ProfileError,
    TrustLevel,
};

mod orchestrator;
pub use orchestrator::{DeploymentRecord, DeploymentStage, Orchestrator, RunReport};

pub mod rpc;

mod signer;
pub use signer::{DeployTransaction, NodeSigner, Signer, SignerHandle};

mod submitter;
pub use submitter::{DeploymentRequest, PendingDeployment, PreparedDeployment, Submitter};

mod verification;
pub use verification::{
    AttemptOutcome, ExplorerClient, ExplorerResponse, ExplorerStatus, RetryPolicy,
    VerificationAttempt, VerificationAttempts, VerificationRequest, VerificationRequester,
    VerificationStatus,
};
