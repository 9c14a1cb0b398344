//! Sender resolution, delegated signing, delayed execution rules, custom fee
//! support and the multisig operation interactors built on top of the
//! wallet's sync layer.

pub mod delayed;
pub mod delegated;
pub mod error;
pub mod extrinsic;
pub mod fee_support;
pub mod multisig_operation;
pub mod registry;
pub mod sender;
pub mod signer;

pub use delayed::{WalletDelayedExecVerifier, WalletDelayedExecutionProvider};
pub use delegated::{
    DelegatedSigningRequest, DelegatedSigningWrapper, DelegationKind, MultisigSigningWrapper, ProxySigningWrapper,
    SigningCompletion, SigningFlowResult, TransactionSigningPresenter,
};
pub use error::{AgentError, AgentResult};
pub use extrinsic::{
    require_signature, ExtrinsicBuilder, ExtrinsicBuilderClosure, ExtrinsicFee, ExtrinsicService,
    ExtrinsicSubmittedModel, Weight,
};
pub use fee_support::{
    AssetExchangeFeeSupportFetcher, AssetExchangeFeeSupportProvider, AssetHubFeeSupportFetcher, FeeSupportFetchers,
    HydrationFeeSupportFetcher,
};
pub use multisig_operation::{
    MultisigOperationConfirmInteractor, MultisigOperationDependencies, MultisigOperationError,
    MultisigOperationPresenter, MultisigOperationRejectInteractor, MultisigOperationState, MultisigRejectPresenter,
    SubmissionKind,
};
pub use registry::{ChainChange, ChainChangeHandler, ChainRegistry, LocalChainRegistry};
pub use sender::{required_proxy_type, ExtrinsicSenderResolver, ProxyGraph, ProxyPath};
pub use signer::{
    DelegateResolution, ExtrinsicSigningContext, SenderResolution, SigningContext, SigningError, SigningOutcome,
    SigningResult, TransactionSigner,
};

#[cfg(test)]
mod tests;
