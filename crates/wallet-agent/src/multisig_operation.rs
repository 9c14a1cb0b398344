use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};
use wallet_core::call_store::CallTicket;
use wallet_core::store::{confirms_operation, save_confirms_operation};
use wallet_core::{CallStore, CoreError, CoreResult, DispatchQueue, RuntimeCall, SettingsRepository, WalletRepository};
use wallet_sync::{PendingOperationChange, PendingOperationStore};
use wallet_types::{AccountId, ChainId, ChainModel, Delegation, MetaAccount, PendingOperation, PendingOperationKey};

use crate::error::{AgentError, AgentResult};
use crate::extrinsic::{ExtrinsicBuilder, ExtrinsicBuilderClosure, ExtrinsicFee, ExtrinsicService, ExtrinsicSubmittedModel, Weight};
use crate::signer::{SigningContext, SigningOutcome, SigningResult, TransactionSigner};

/// Lifecycle of a presented multisig operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MultisigOperationState {
    Initializing,
    SignatoriesLoaded,
    FeeEstimating,
    FeeReady,
    Submitting,
    Monitoring,
    Completed,
    Failed,
}

impl MultisigOperationState {
    fn is_submitting(&self) -> bool {
        matches!(
            self,
            MultisigOperationState::Submitting | MultisigOperationState::Monitoring | MultisigOperationState::Completed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmissionKind {
    Approve,
    Reject,
}

#[derive(Error, Debug, Clone)]
pub enum MultisigOperationError {
    #[error("Fee estimation failed: {0}")]
    FeeError(#[source] AgentError),

    #[error("Submission failed: {0}")]
    SubmissionError(#[source] AgentError),

    #[error("Failed to load signatories: {0}")]
    SignatoriesError(#[source] AgentError),

    #[error("No local wallet for signatory {0}")]
    SignatoryNotFound(AccountId),

    #[error("Wallet is not a multisig on {0}")]
    NotMultisig(ChainId),

    #[error("Pending operation not found")]
    OperationNotFound,

    #[error("Pending operation has no on-chain definition yet")]
    MissingDefinition,

    #[error("Only the depositor can reject the operation")]
    NotDepositor,

    #[error("Signatory already approved the operation")]
    AlreadyApproved,

    #[error("Failed to load settings: {0}")]
    SettingsError(#[source] CoreError),

    #[error("Confirmation setting is not loaded")]
    SettingsNotLoaded,
}

/// Callbacks of a multisig operation screen, always delivered on the UI queue
pub trait MultisigOperationPresenter: Send + Sync {
    fn did_change_state(&self, state: MultisigOperationState);

    fn did_receive_operation(&self, operation: Option<PendingOperation>);

    fn did_receive_signatory(&self, wallet: MetaAccount);

    fn did_receive_fee(&self, fee: ExtrinsicFee);

    fn did_complete_submission(&self, model: ExtrinsicSubmittedModel, kind: SubmissionKind);

    fn did_receive_error(&self, error: MultisigOperationError);
}

pub trait MultisigRejectPresenter: MultisigOperationPresenter {
    fn did_receive_confirms_operation(&self, confirms: bool);
}

/// Collaborators shared by the confirm and reject interactors
#[derive(Clone)]
pub struct MultisigOperationDependencies {
    pub chain: ChainModel,
    pub multisig_wallet: MetaAccount,
    pub operation_key: PendingOperationKey,
    pub pending_operations: Arc<PendingOperationStore>,
    pub wallet_repository: Arc<dyn WalletRepository>,
    /// Service of the signatory account; it signs and pays for the wrapper call
    pub extrinsic_service: Arc<dyn ExtrinsicService>,
    pub signer: Arc<dyn TransactionSigner>,
    pub ui_queue: DispatchQueue,
}

#[derive(Debug, Clone)]
struct MultisigParams {
    signatory: AccountId,
    threshold: u16,
    other_signatories: Vec<AccountId>,
}

impl MultisigParams {
    fn resolve(wallet: &MetaAccount, chain_id: &ChainId) -> Result<Self, MultisigOperationError> {
        match wallet.delegation(chain_id) {
            Some(Delegation::Multisig { signatory, threshold, other_signatories }) => Ok(Self {
                signatory: *signatory,
                threshold: *threshold,
                other_signatories: other_signatories.clone(),
            }),
            _ => Err(MultisigOperationError::NotMultisig(chain_id.clone())),
        }
    }
}

/// Builds `approve_as_multi` or `cancel_as_multi` for `operation`.
///
/// Both reference the operation by call hash and timepoint only; the call
/// itself is never re-encoded.
async fn build_call(
    kind: SubmissionKind,
    params: &MultisigParams,
    operation: &PendingOperation,
    service: &dyn ExtrinsicService,
) -> AgentResult<RuntimeCall> {
    let other_signatories: Vec<String> = params.other_signatories.iter().map(AccountId::to_hex).collect();
    let timepoint = operation.multisig_definition.as_ref().map(|definition| definition.timepoint);

    match kind {
        SubmissionKind::Approve => {
            let completes = match &operation.multisig_definition {
                Some(definition) => definition.is_final_approval(),
                None => usize::from(params.threshold) <= 1,
            };
            let max_weight = match (&operation.call, completes) {
                (Some(call), true) => service.estimate_call_weight(call).await?,
                _ => Weight::zero(),
            };

            Ok(RuntimeCall::new(
                "Multisig",
                "approve_as_multi",
                json!({
                    "threshold": params.threshold,
                    "other_signatories": other_signatories,
                    "maybe_timepoint": timepoint,
                    "call_hash": operation.call_hash.to_hex(),
                    "max_weight": max_weight.to_json(),
                }),
            ))
        }
        SubmissionKind::Reject => {
            let timepoint = timepoint
                .ok_or_else(|| AgentError::ExtrinsicError("Cannot cancel an operation without timepoint".to_string()))?;

            Ok(RuntimeCall::new(
                "Multisig",
                "cancel_as_multi",
                json!({
                    "threshold": params.threshold,
                    "other_signatories": other_signatories,
                    "timepoint": timepoint,
                    "call_hash": operation.call_hash.to_hex(),
                }),
            ))
        }
    }
}

fn builder_closure(call: RuntimeCall) -> ExtrinsicBuilderClosure {
    Arc::new(move |builder: ExtrinsicBuilder| Ok(builder.adding_call(call.clone())))
}

/// Reports the switch to monitoring once the signer produced a signature
struct MonitoringSigner {
    inner: Arc<dyn TransactionSigner>,
    core: Weak<MultisigOperationCore>,
}

#[async_trait]
impl TransactionSigner for MonitoringSigner {
    async fn sign(&self, data: &[u8], context: &SigningContext) -> SigningResult<SigningOutcome> {
        let outcome = self.inner.sign(data, context).await?;

        if let (SigningOutcome::Signed(_), Some(core)) = (&outcome, self.core.upgrade()) {
            core.did_sign();
        }

        Ok(outcome)
    }
}

/// Progress of the wallet's `confirmsOperation` setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettingLoad {
    NotRequired,
    Pending,
    Loaded(bool),
    Failed,
}

impl SettingLoad {
    fn is_settled(&self) -> bool {
        matches!(self, SettingLoad::NotRequired | SettingLoad::Loaded(_))
    }
}

struct OperationState {
    state: MultisigOperationState,
    operation: Option<PendingOperation>,
    signatory_wallet: Option<MetaAccount>,
    fee: Option<ExtrinsicFee>,
    confirms_operation: SettingLoad,
    listener: Option<AbortHandle>,
}

/// State machine shared by the confirm and reject interactors
struct MultisigOperationCore {
    kind: SubmissionKind,
    deps: MultisigOperationDependencies,
    params: MultisigParams,
    presenter: Arc<dyn MultisigOperationPresenter>,
    state: Mutex<OperationState>,
    fee_call: CallStore,
    self_ref: Weak<MultisigOperationCore>,
}

impl MultisigOperationCore {
    fn new(
        kind: SubmissionKind,
        deps: MultisigOperationDependencies,
        presenter: Arc<dyn MultisigOperationPresenter>,
    ) -> Result<Arc<Self>, MultisigOperationError> {
        let params = MultisigParams::resolve(&deps.multisig_wallet, &deps.chain.chain_id)?;
        let confirms_operation = match kind {
            SubmissionKind::Approve => SettingLoad::NotRequired,
            SubmissionKind::Reject => SettingLoad::Pending,
        };

        Ok(Arc::new_cyclic(|self_ref| Self {
            kind,
            deps,
            params,
            presenter,
            state: Mutex::new(OperationState {
                state: MultisigOperationState::Initializing,
                operation: None,
                signatory_wallet: None,
                fee: None,
                confirms_operation,
                listener: None,
            }),
            fee_call: CallStore::new(),
            self_ref: self_ref.clone(),
        }))
    }

    fn state(&self) -> MutexGuard<'_, OperationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report<F>(&self, callback: F)
    where
        F: FnOnce(&dyn MultisigOperationPresenter) + Send + 'static,
    {
        let presenter = self.presenter.clone();
        self.deps.ui_queue.dispatch(move || callback(presenter.as_ref()));
    }

    fn transition(&self, state: &mut OperationState, next: MultisigOperationState) {
        if state.state == next {
            return;
        }

        debug!("Multisig {:?} operation {:?} -> {:?}", self.kind, state.state, next);
        state.state = next;
        self.report(move |presenter| presenter.did_change_state(next));
    }

    fn fail(&self, error: MultisigOperationError) {
        warn!("Multisig {:?} operation error: {}", self.kind, error);
        self.report(move |presenter| presenter.did_receive_error(error));
    }

    fn setup(&self) {
        let mut state = self.state();
        if state.listener.is_some() {
            return;
        }

        // Subscribe before the first read so no change can slip in between
        let mut changes = self.deps.pending_operations.subscribe();
        let key = self.deps.operation_key.clone();
        let core = self.self_ref.clone();

        let listener = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) if change.key() == key => match core.upgrade() {
                        Some(core) => core.handle_change(change),
                        None => break,
                    },
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} pending operation changes, resyncing", skipped);
                        match core.upgrade() {
                            Some(core) => core.resync(),
                            None => break,
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        state.listener = Some(listener.abort_handle());

        let operation = self.deps.pending_operations.get(&self.deps.operation_key);
        state.operation = operation.clone();
        self.report(move |presenter| presenter.did_receive_operation(operation));
        drop(state);

        self.load_signatory();
    }

    fn load_signatory(&self) {
        let repository = self.deps.wallet_repository.clone();
        let chain_id = self.deps.chain.chain_id.clone();
        let multisig_meta_id = self.deps.multisig_wallet.meta_id.clone();
        let signatory = self.params.signatory;
        let core = self.self_ref.clone();

        tokio::spawn(async move {
            let result = repository
                .fetch_all_wallets()
                .await
                .map_err(|e| MultisigOperationError::SignatoriesError(e.into()))
                .and_then(|wallets| {
                    wallets
                        .into_iter()
                        .find(|wallet| {
                            wallet.meta_id != multisig_meta_id && wallet.account_id(&chain_id) == Some(signatory)
                        })
                        .ok_or(MultisigOperationError::SignatoryNotFound(signatory))
                });

            if let Some(core) = core.upgrade() {
                core.did_load_signatory(result);
            }
        });
    }

    fn did_load_signatory(&self, result: Result<MetaAccount, MultisigOperationError>) {
        match result {
            Ok(wallet) => {
                let mut state = self.state();
                state.signatory_wallet = Some(wallet.clone());
                if state.state == MultisigOperationState::Initializing {
                    self.transition(&mut state, MultisigOperationState::SignatoriesLoaded);
                }
                drop(state);

                info!("Signatory wallet {} loaded", wallet.name);
                self.report(move |presenter| presenter.did_receive_signatory(wallet));
                self.estimate_fee();
            }
            Err(e) => {
                let mut state = self.state();
                self.transition(&mut state, MultisigOperationState::Failed);
                drop(state);
                self.fail(e);
            }
        }
    }

    fn handle_change(&self, change: PendingOperationChange) {
        match change {
            PendingOperationChange::Updated(operation) => {
                let mut state = self.state();
                let definition_changed = state
                    .operation
                    .as_ref()
                    .map(|current| current.multisig_definition != operation.multisig_definition)
                    .unwrap_or(true);

                state.operation = Some(operation.clone());
                drop(state);

                self.report(move |presenter| presenter.did_receive_operation(Some(operation)));

                if definition_changed {
                    self.estimate_fee();
                }
            }
            PendingOperationChange::Removed(_) => {
                let mut state = self.state();
                state.operation = None;
                state.fee = None;
                self.fee_call.cancel();

                // A submission in flight decides the outcome on its own
                let abandoned = !state.state.is_submitting() && state.state != MultisigOperationState::Failed;
                if abandoned {
                    self.transition(&mut state, MultisigOperationState::Failed);
                }
                drop(state);

                info!("Pending operation {} is gone", self.deps.operation_key.call_hash);
                self.report(|presenter| presenter.did_receive_operation(None));
                if abandoned {
                    self.fail(MultisigOperationError::OperationNotFound);
                }
            }
        }
    }

    fn resync(&self) {
        let operation = self.deps.pending_operations.get(&self.deps.operation_key);

        match operation {
            Some(operation) => self.handle_change(PendingOperationChange::Updated(operation)),
            None => self.handle_change(PendingOperationChange::Removed(self.deps.operation_key.clone())),
        }
    }

    fn validate(&self, operation: Option<&PendingOperation>) -> Result<PendingOperation, MultisigOperationError> {
        let operation = operation.ok_or(MultisigOperationError::OperationNotFound)?;
        let signatory = &self.params.signatory;

        match (self.kind, operation.multisig_definition.as_ref()) {
            (SubmissionKind::Approve, Some(definition)) if definition.has_approved(signatory) => {
                Err(MultisigOperationError::AlreadyApproved)
            }
            (SubmissionKind::Approve, _) => Ok(operation.clone()),
            (SubmissionKind::Reject, None) => Err(MultisigOperationError::MissingDefinition),
            (SubmissionKind::Reject, Some(definition)) if &definition.depositor != signatory => {
                Err(MultisigOperationError::NotDepositor)
            }
            (SubmissionKind::Reject, Some(_)) => Ok(operation.clone()),
        }
    }

    /// Starts a fee estimation, cancelling the one in flight.
    /// Waits for the signatory and, when rejecting, for the confirmation setting.
    fn estimate_fee(&self) {
        let mut state = self.state();

        if state.signatory_wallet.is_none() || state.state.is_submitting() || !state.confirms_operation.is_settled() {
            return;
        }

        let operation = match self.validate(state.operation.as_ref()) {
            Ok(operation) => operation,
            Err(e) => {
                drop(state);
                self.fail(e);
                return;
            }
        };

        state.fee = None;
        self.transition(&mut state, MultisigOperationState::FeeEstimating);

        let ticket = self.fee_call.begin();
        let kind = self.kind;
        let params = self.params.clone();
        let service = self.deps.extrinsic_service.clone();
        let core = self.self_ref.clone();

        let handle = tokio::spawn(async move {
            let result = match build_call(kind, &params, &operation, service.as_ref()).await {
                Ok(call) => service.estimate_fee(builder_closure(call)).await,
                Err(e) => Err(e),
            };

            if let Some(core) = core.upgrade() {
                core.did_estimate_fee(ticket, result);
            }
        });

        self.fee_call.attach(ticket, handle.abort_handle());
    }

    fn did_estimate_fee(&self, ticket: CallTicket, result: AgentResult<ExtrinsicFee>) {
        let mut state = self.state();

        if !self.fee_call.finish(ticket) || state.state.is_submitting() {
            debug!("Discarding superseded fee estimation");
            return;
        }

        match result {
            Ok(fee) => {
                state.fee = Some(fee.clone());
                self.transition(&mut state, MultisigOperationState::FeeReady);
                drop(state);
                self.report(move |presenter| presenter.did_receive_fee(fee));
            }
            Err(e) => {
                self.transition(&mut state, MultisigOperationState::Failed);
                drop(state);
                self.fail(MultisigOperationError::FeeError(e));
            }
        }
    }

    fn submit(&self) {
        let mut state = self.state();

        if state.state.is_submitting() {
            debug!("Multisig {:?} submission already in progress", self.kind);
            return;
        }

        if state.signatory_wallet.is_none() {
            drop(state);
            self.fail(MultisigOperationError::SignatoryNotFound(self.params.signatory));
            return;
        }

        if !state.confirms_operation.is_settled() {
            drop(state);
            self.fail(MultisigOperationError::SettingsNotLoaded);
            return;
        }

        let operation = match self.validate(state.operation.as_ref()) {
            Ok(operation) => operation,
            Err(e) => {
                drop(state);
                self.fail(e);
                return;
            }
        };

        self.fee_call.cancel();
        self.transition(&mut state, MultisigOperationState::Submitting);
        drop(state);

        let kind = self.kind;
        let params = self.params.clone();
        let service = self.deps.extrinsic_service.clone();
        let signer: Arc<dyn TransactionSigner> = Arc::new(MonitoringSigner {
            inner: self.deps.signer.clone(),
            core: self.self_ref.clone(),
        });
        let core = self.self_ref.clone();

        info!("Submitting multisig {:?} for {}", kind, operation.call_hash);

        tokio::spawn(async move {
            let result = match build_call(kind, &params, &operation, service.as_ref()).await {
                Ok(call) => service.submit_and_monitor(builder_closure(call), signer).await,
                Err(e) => Err(e),
            };

            if let Some(core) = core.upgrade() {
                core.did_submit(result);
            }
        });
    }

    fn did_sign(&self) {
        let mut state = self.state();

        if state.state == MultisigOperationState::Submitting {
            self.transition(&mut state, MultisigOperationState::Monitoring);
        }
    }

    fn did_submit(&self, result: AgentResult<ExtrinsicSubmittedModel>) {
        let mut state = self.state();
        let kind = self.kind;

        match result {
            Ok(model) => {
                self.transition(&mut state, MultisigOperationState::Completed);
                drop(state);

                info!("Multisig {:?} included as {}", kind, model.tx_hash);
                self.report(move |presenter| presenter.did_complete_submission(model, kind));
            }
            Err(e) => {
                self.transition(&mut state, MultisigOperationState::Failed);
                drop(state);

                if matches!(&e, AgentError::SigningError(signing) if signing.is_cancellation()) {
                    info!("Multisig {:?} signing cancelled: {}", kind, e);
                } else {
                    error!("Multisig {:?} submission failed: {}", kind, e);
                }
                self.report(move |presenter| presenter.did_receive_error(MultisigOperationError::SubmissionError(e)));
            }
        }
    }

    fn did_load_confirms_operation(&self, result: CoreResult<bool>) -> Option<bool> {
        let mut state = self.state();

        match result {
            Ok(confirms) => {
                state.confirms_operation = SettingLoad::Loaded(confirms);
                drop(state);
                self.estimate_fee();
                Some(confirms)
            }
            Err(e) => {
                state.confirms_operation = SettingLoad::Failed;
                state.fee = None;
                self.fee_call.cancel();
                if !state.state.is_submitting() {
                    self.transition(&mut state, MultisigOperationState::Failed);
                }
                drop(state);
                self.fail(MultisigOperationError::SettingsError(e));
                None
            }
        }
    }

    fn current_state(&self) -> MultisigOperationState {
        self.state().state
    }

    fn current_operation(&self) -> Option<PendingOperation> {
        self.state().operation.clone()
    }

    fn current_fee(&self) -> Option<ExtrinsicFee> {
        self.state().fee.clone()
    }
}

impl Drop for MultisigOperationCore {
    fn drop(&mut self) {
        if let Some(listener) = self.state().listener.take() {
            listener.abort();
        }
        self.fee_call.cancel();
    }
}

/// Approves a pending multisig operation as the wallet's signatory
pub struct MultisigOperationConfirmInteractor {
    core: Arc<MultisigOperationCore>,
}

impl MultisigOperationConfirmInteractor {
    pub fn new(
        deps: MultisigOperationDependencies,
        presenter: Arc<dyn MultisigOperationPresenter>,
    ) -> Result<Self, MultisigOperationError> {
        Ok(Self { core: MultisigOperationCore::new(SubmissionKind::Approve, deps, presenter)? })
    }

    pub fn setup(&self) {
        self.core.setup();
    }

    pub fn estimate_fee(&self) {
        self.core.estimate_fee();
    }

    pub fn confirm(&self) {
        self.core.submit();
    }

    pub fn state(&self) -> MultisigOperationState {
        self.core.current_state()
    }

    pub fn operation(&self) -> Option<PendingOperation> {
        self.core.current_operation()
    }

    pub fn fee(&self) -> Option<ExtrinsicFee> {
        self.core.current_fee()
    }
}

/// Cancels a pending multisig operation; only its depositor may do so
pub struct MultisigOperationRejectInteractor {
    core: Arc<MultisigOperationCore>,
    settings: Arc<dyn SettingsRepository>,
    presenter: Arc<dyn MultisigRejectPresenter>,
}

impl MultisigOperationRejectInteractor {
    pub fn new<P>(
        deps: MultisigOperationDependencies,
        settings: Arc<dyn SettingsRepository>,
        presenter: Arc<P>,
    ) -> Result<Self, MultisigOperationError>
    where
        P: MultisigRejectPresenter + 'static,
    {
        let operation_presenter: Arc<dyn MultisigOperationPresenter> = presenter.clone();
        let core = MultisigOperationCore::new(SubmissionKind::Reject, deps, operation_presenter)?;

        Ok(Self { core, settings, presenter })
    }

    /// Also loads the wallet's confirmation setting, which re-runs fee estimation.
    /// `reject` is refused until the setting is loaded.
    pub fn setup(&self) {
        self.core.setup();

        let settings = self.settings.clone();
        let presenter = self.presenter.clone();
        let meta_id = self.core.deps.multisig_wallet.meta_id.clone();
        let queue = self.core.deps.ui_queue.clone();
        let core = Arc::downgrade(&self.core);

        tokio::spawn(async move {
            let result = confirms_operation(settings.as_ref(), &meta_id).await;
            let Some(core) = core.upgrade() else {
                return;
            };

            if let Some(confirms) = core.did_load_confirms_operation(result) {
                debug!("Wallet {} confirms operations: {}", meta_id, confirms);
                queue.dispatch(move || presenter.did_receive_confirms_operation(confirms));
            }
        });
    }

    pub fn estimate_fee(&self) {
        self.core.estimate_fee();
    }

    pub fn reject(&self) {
        self.core.submit();
    }

    pub async fn save_confirms_operation(&self, confirms: bool) -> CoreResult<()> {
        save_confirms_operation(self.settings.as_ref(), &self.core.deps.multisig_wallet.meta_id, confirms).await
    }

    pub fn state(&self) -> MultisigOperationState {
        self.core.current_state()
    }

    pub fn operation(&self) -> Option<PendingOperation> {
        self.core.current_operation()
    }

    pub fn fee(&self) -> Option<ExtrinsicFee> {
        self.core.current_fee()
    }
}
