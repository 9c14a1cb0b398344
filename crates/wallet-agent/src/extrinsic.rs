use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use wallet_core::RuntimeCall;
use wallet_types::AccountId;

use crate::error::{AgentError, AgentResult};
use crate::signer::{SigningOutcome, TransactionSigner};

/// Calls to put into one extrinsic
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtrinsicBuilder {
    calls: Vec<RuntimeCall>,
}

impl ExtrinsicBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn adding_call(mut self, call: RuntimeCall) -> Self {
        self.calls.push(call);
        self
    }

    pub fn calls(&self) -> &[RuntimeCall] {
        &self.calls
    }
}

/// Appends the caller's calls to a builder prepared by the extrinsic service
pub type ExtrinsicBuilderClosure = Arc<dyn Fn(ExtrinsicBuilder) -> AgentResult<ExtrinsicBuilder> + Send + Sync>;

/// Two-dimensional dispatch weight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Weight {
    pub ref_time: u64,
    pub proof_size: u64,
}

impl Weight {
    pub const fn zero() -> Self {
        Self { ref_time: 0, proof_size: 0 }
    }

    pub fn to_json(&self) -> Value {
        json!({ "ref_time": self.ref_time, "proof_size": self.proof_size })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtrinsicFee {
    pub amount: u128,
    /// Account paying the fee when it is not the sender
    pub payer: Option<AccountId>,
    pub weight: Weight,
}

/// Result of a submitted and monitored extrinsic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtrinsicSubmittedModel {
    pub tx_hash: String,
    pub sender: AccountId,
    pub block_hash: Option<String>,
}

/// Builds, signs and submits extrinsics for one chain and sender
#[async_trait]
pub trait ExtrinsicService: Send + Sync {
    async fn estimate_fee(&self, builder: ExtrinsicBuilderClosure) -> AgentResult<ExtrinsicFee>;

    async fn submit_and_monitor(
        &self,
        builder: ExtrinsicBuilderClosure,
        signer: Arc<dyn TransactionSigner>,
    ) -> AgentResult<ExtrinsicSubmittedModel>;

    /// Weight of an encoded call when dispatched on its own
    async fn estimate_call_weight(&self, call: &[u8]) -> AgentResult<Weight>;
}

/// Signature bytes of `outcome`. An acknowledged permissions flow is not a
/// signature and must never reach the network.
pub fn require_signature(outcome: SigningOutcome) -> AgentResult<Vec<u8>> {
    match outcome {
        SigningOutcome::Signed(signature) => Ok(signature),
        SigningOutcome::PermissionsAcknowledged => Err(AgentError::NotSigned),
    }
}
