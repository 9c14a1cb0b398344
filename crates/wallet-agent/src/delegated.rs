use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use wallet_core::config::SigningConfig;
use wallet_core::DispatchQueue;
use wallet_types::{ChainId, Delegation};

use crate::signer::{
    DelegateResolution, SenderResolution, SigningContext, SigningError, SigningOutcome, SigningResult,
    TransactionSigner,
};

/// Which delegate flow a wrapper drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DelegationKind {
    Multisig,
    Proxy,
}

impl DelegationKind {
    pub fn matches(&self, delegation: &Delegation) -> bool {
        matches!(
            (self, delegation),
            (DelegationKind::Multisig, Delegation::Multisig { .. })
                | (DelegationKind::Proxy, Delegation::Proxy { .. })
        )
    }
}

impl fmt::Display for DelegationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelegationKind::Multisig => f.write_str("multisig"),
            DelegationKind::Proxy => f.write_str("proxy"),
        }
    }
}

/// What an approval flow reports when it finishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningFlowResult {
    Signed(Vec<u8>),
    /// Only valid for the not-enough-permissions flow
    Acknowledged,
    Cancelled,
    Failed(String),
}

/// Completion handle passed to an approval flow. Dropping it without sending
/// counts as the flow being torn down.
pub type SigningCompletion = oneshot::Sender<SigningFlowResult>;

/// Everything an approval flow needs to show
#[derive(Debug, Clone, PartialEq)]
pub struct DelegatedSigningRequest {
    pub data: Vec<u8>,
    pub chain_id: ChainId,
    pub resolution: DelegateResolution,
}

/// UI side of delegated signing. Always invoked on the UI dispatch queue.
pub trait TransactionSigningPresenter: Send + Sync {
    /// Signatory and threshold confirmation
    fn present_multisig_flow(&self, request: DelegatedSigningRequest, completion: SigningCompletion);

    /// Proxy permission confirmation
    fn present_proxy_flow(&self, request: DelegatedSigningRequest, completion: SigningCompletion);

    fn present_not_enough_permissions_flow(&self, request: DelegatedSigningRequest, completion: SigningCompletion);
}

/// Signs on behalf of a delegated account by handing the decision to the UI.
///
/// The wrapper never holds keys itself: it only accepts substrate extrinsics
/// whose sender resolves to a delegate, presents the approval flow on the UI
/// queue and waits for the flow's single terminal result.
pub struct DelegatedSigningWrapper {
    kind: DelegationKind,
    presenter: Arc<dyn TransactionSigningPresenter>,
    ui_queue: DispatchQueue,
    approval_timeout: Option<Duration>,
}

impl DelegatedSigningWrapper {
    pub fn new(
        kind: DelegationKind,
        presenter: Arc<dyn TransactionSigningPresenter>,
        ui_queue: DispatchQueue,
        config: &SigningConfig,
    ) -> Self {
        Self {
            kind,
            presenter,
            ui_queue,
            approval_timeout: config.approval_timeout(),
        }
    }

    pub fn kind(&self) -> DelegationKind {
        self.kind
    }

    fn resolve<'a>(&self, context: &'a SigningContext) -> SigningResult<(&'a ChainId, &'a DelegateResolution)> {
        let SigningContext::SubstrateExtrinsic(extrinsic) = context else {
            return Err(SigningError::UnsupportedContext(self.kind.to_string()));
        };

        let resolution = match &extrinsic.sender_resolution {
            SenderResolution::Current(_) => {
                warn!("Delegated {} signer asked to sign for a non-delegated sender", self.kind);
                return Err(SigningError::NoKeys);
            }
            SenderResolution::Delegate(resolution) => resolution,
        };

        if !self.kind.matches(&resolution.delegation) {
            return Err(SigningError::DelegationMismatch(format!(
                "{} signer cannot sign for {:?}",
                self.kind, resolution.delegation
            )));
        }

        Ok((&extrinsic.chain_id, resolution))
    }

    async fn await_result(
        &self,
        receiver: oneshot::Receiver<SigningFlowResult>,
    ) -> SigningResult<SigningFlowResult> {
        let received = match self.approval_timeout {
            Some(timeout) => tokio::time::timeout(timeout, receiver)
                .await
                .map_err(|_| SigningError::Timeout(timeout))?,
            None => receiver.await,
        };

        received.map_err(|_| SigningError::FlowClosed)
    }
}

#[async_trait]
impl TransactionSigner for DelegatedSigningWrapper {
    async fn sign(&self, data: &[u8], context: &SigningContext) -> SigningResult<SigningOutcome> {
        let (chain_id, resolution) = self.resolve(context)?;
        let can_sign = resolution.can_sign_with_delegate;

        let request = DelegatedSigningRequest {
            data: data.to_vec(),
            chain_id: chain_id.clone(),
            resolution: resolution.clone(),
        };

        let (completion, receiver) = oneshot::channel();
        let presenter = self.presenter.clone();
        let kind = self.kind;

        debug!("Presenting {} signing flow on {}", kind, chain_id);
        self.ui_queue.dispatch(move || match (can_sign, kind) {
            (false, _) => presenter.present_not_enough_permissions_flow(request, completion),
            (true, DelegationKind::Multisig) => presenter.present_multisig_flow(request, completion),
            (true, DelegationKind::Proxy) => presenter.present_proxy_flow(request, completion),
        });

        let outcome = match (self.await_result(receiver).await?, can_sign) {
            (SigningFlowResult::Signed(signature), true) => SigningOutcome::Signed(signature),
            (SigningFlowResult::Acknowledged, false) => SigningOutcome::PermissionsAcknowledged,
            (SigningFlowResult::Cancelled, _) => return Err(SigningError::Cancelled),
            (SigningFlowResult::Failed(reason), _) => return Err(SigningError::Failed(reason)),
            (unexpected, _) => {
                return Err(SigningError::Failed(format!(
                    "Flow reported {:?} for a request it cannot complete that way",
                    unexpected
                )))
            }
        };

        info!("{} signing flow finished on {}", kind, chain_id);
        Ok(outcome)
    }
}

/// Signs as a multisig signatory
pub struct MultisigSigningWrapper(DelegatedSigningWrapper);

impl MultisigSigningWrapper {
    pub fn new(
        presenter: Arc<dyn TransactionSigningPresenter>,
        ui_queue: DispatchQueue,
        config: &SigningConfig,
    ) -> Self {
        Self(DelegatedSigningWrapper::new(DelegationKind::Multisig, presenter, ui_queue, config))
    }
}

#[async_trait]
impl TransactionSigner for MultisigSigningWrapper {
    async fn sign(&self, data: &[u8], context: &SigningContext) -> SigningResult<SigningOutcome> {
        self.0.sign(data, context).await
    }
}

/// Signs as the proxy of a proxied account
pub struct ProxySigningWrapper(DelegatedSigningWrapper);

impl ProxySigningWrapper {
    pub fn new(
        presenter: Arc<dyn TransactionSigningPresenter>,
        ui_queue: DispatchQueue,
        config: &SigningConfig,
    ) -> Self {
        Self(DelegatedSigningWrapper::new(DelegationKind::Proxy, presenter, ui_queue, config))
    }
}

#[async_trait]
impl TransactionSigner for ProxySigningWrapper {
    async fn sign(&self, data: &[u8], context: &SigningContext) -> SigningResult<SigningOutcome> {
        self.0.sign(data, context).await
    }
}
