use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use wallet_core::RuntimeCall;
use wallet_types::{AccountId, ChainAccount, ChainId, Delegation, MetaAccount};

/// A delegate that must sign for a delegated account
#[derive(Debug, Clone, PartialEq)]
pub struct DelegateResolution {
    /// The delegated (multisig or proxied) account the extrinsic is sent for
    pub delegated_account: ChainAccount,
    /// Wallet holding the delegate's keys
    pub delegate_wallet: MetaAccount,
    pub delegate_account_id: AccountId,
    pub delegation: Delegation,
    /// Calls the delegate is asked to wrap
    pub calls: Vec<RuntimeCall>,
    /// Whether the delegate's permissions cover every call
    pub can_sign_with_delegate: bool,
}

/// Who actually signs an extrinsic
#[derive(Debug, Clone, PartialEq)]
pub enum SenderResolution {
    /// The selected wallet signs for itself
    Current(ChainAccount),
    Delegate(DelegateResolution),
}

impl SenderResolution {
    pub fn is_delegated(&self) -> bool {
        matches!(self, SenderResolution::Delegate(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtrinsicSigningContext {
    pub chain_id: ChainId,
    pub sender_resolution: SenderResolution,
}

/// What is being signed; decides which signer can handle it
#[derive(Debug, Clone, PartialEq)]
pub enum SigningContext {
    SubstrateExtrinsic(ExtrinsicSigningContext),
    EvmTransaction { chain_id: ChainId },
    RawBytes,
}

/// Terminal result of a successful signing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningOutcome {
    Signed(Vec<u8>),
    /// The user acknowledged missing delegate permissions; nothing was signed
    PermissionsAcknowledged,
}

impl SigningOutcome {
    pub fn signature(&self) -> Option<&[u8]> {
        match self {
            SigningOutcome::Signed(signature) => Some(signature),
            SigningOutcome::PermissionsAcknowledged => None,
        }
    }
}

/// Why a signing request produced no outcome.
///
/// An approval flow that ends without a signature surfaces as one of two
/// cancellation outcomes: `Cancelled` when the user declined, `FlowClosed`
/// when the flow was torn down without reporting anything. Callers that do
/// not care about the difference can match both together.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("Signing context is not supported for {0} delegation")]
    UnsupportedContext(String),

    /// The sender is not delegated, so there are no keys here to sign with
    #[error("Wallet has no keys to sign with")]
    NoKeys,

    #[error("Delegation mismatch: {0}")]
    DelegationMismatch(String),

    /// The user declined the approval flow
    #[error("Signing was cancelled")]
    Cancelled,

    /// The approval flow went away without reporting a result
    #[error("Signing flow closed without a result")]
    FlowClosed,

    #[error("No signing decision after {0:?}")]
    Timeout(Duration),

    #[error("Signing failed: {0}")]
    Failed(String),
}

impl SigningError {
    /// Either cancellation outcome of an approval flow
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SigningError::Cancelled | SigningError::FlowClosed)
    }
}

pub type SigningResult<T> = Result<T, SigningError>;

#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign(&self, data: &[u8], context: &SigningContext) -> SigningResult<SigningOutcome>;
}
