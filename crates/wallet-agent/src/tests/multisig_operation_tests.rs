use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use wallet_core::{
    CoreError, CoreResult, DispatchQueue, MemorySettingsRepository, MemoryWalletRepository, SettingsRepository,
};
use wallet_sync::PendingOperationStore;
use wallet_types::{
    CallHash, ChainId, MetaAccount, MetaId, MultisigDefinition, PendingOperation, PendingOperationKey, Timepoint,
};

use super::mocks::{account, chain, multisig_wallet, secrets_wallet, FixedSigner, RecordingExtrinsicService};
use crate::error::AgentError;
use crate::extrinsic::{ExtrinsicFee, ExtrinsicService, ExtrinsicSubmittedModel};
use crate::multisig_operation::{
    MultisigOperationConfirmInteractor, MultisigOperationDependencies, MultisigOperationError,
    MultisigOperationPresenter, MultisigOperationRejectInteractor, MultisigOperationState, MultisigRejectPresenter,
    SubmissionKind,
};
use crate::signer::{SigningError, TransactionSigner};

#[derive(Debug, Clone)]
enum Event {
    State(MultisigOperationState),
    Operation(Option<PendingOperation>),
    Signatory(MetaId),
    Fee(ExtrinsicFee),
    Submitted(ExtrinsicSubmittedModel, SubmissionKind),
    Error(MultisigOperationError),
    ConfirmsOperation(bool),
}

#[derive(Default)]
struct RecordingPresenter {
    events: Mutex<Vec<Event>>,
}

impl RecordingPresenter {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn states(&self) -> Vec<MultisigOperationState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::State(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    fn errors(&self) -> Vec<MultisigOperationError> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Error(error) => Some(error),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl MultisigOperationPresenter for RecordingPresenter {
    fn did_change_state(&self, state: MultisigOperationState) {
        self.record(Event::State(state));
    }

    fn did_receive_operation(&self, operation: Option<PendingOperation>) {
        self.record(Event::Operation(operation));
    }

    fn did_receive_signatory(&self, wallet: MetaAccount) {
        self.record(Event::Signatory(wallet.meta_id));
    }

    fn did_receive_fee(&self, fee: ExtrinsicFee) {
        self.record(Event::Fee(fee));
    }

    fn did_complete_submission(&self, model: ExtrinsicSubmittedModel, kind: SubmissionKind) {
        self.record(Event::Submitted(model, kind));
    }

    fn did_receive_error(&self, error: MultisigOperationError) {
        self.record(Event::Error(error));
    }
}

impl MultisigRejectPresenter for RecordingPresenter {
    fn did_receive_confirms_operation(&self, confirms: bool) {
        self.record(Event::ConfirmsOperation(confirms));
    }
}

/// Settings storage whose reads never complete
struct StalledSettings;

#[async_trait]
impl SettingsRepository for StalledSettings {
    async fn fetch_setting(&self, _meta_id: &MetaId, _key: &str) -> CoreResult<Option<Value>> {
        std::future::pending().await
    }

    async fn save_setting(&self, _meta_id: &MetaId, _key: &str, _value: Value) -> CoreResult<()> {
        Ok(())
    }
}

struct BrokenSettings;

#[async_trait]
impl SettingsRepository for BrokenSettings {
    async fn fetch_setting(&self, _meta_id: &MetaId, _key: &str) -> CoreResult<Option<Value>> {
        Err(CoreError::StorageError("settings unavailable".into()))
    }

    async fn save_setting(&self, _meta_id: &MetaId, _key: &str, _value: Value) -> CoreResult<()> {
        Ok(())
    }
}

fn polkadot() -> ChainId {
    ChainId::new("polkadot")
}

fn operation_key() -> PendingOperationKey {
    PendingOperationKey {
        call_hash: CallHash::new([7; 32]),
        chain_id: polkadot(),
        multisig_account_id: account(100),
    }
}

fn definition(depositor: u8, approvals: &[u8]) -> MultisigDefinition {
    MultisigDefinition {
        timepoint: Timepoint { height: 4_200, index: 2 },
        threshold: 2,
        depositor: account(depositor),
        approvals: approvals.iter().copied().map(account).collect(),
    }
}

struct Fixture {
    store: Arc<PendingOperationStore>,
    service: Arc<RecordingExtrinsicService>,
    signer: Arc<FixedSigner>,
    presenter: Arc<RecordingPresenter>,
    ui_queue: DispatchQueue,
    deps: MultisigOperationDependencies,
}

impl Fixture {
    /// Multisig 100 with signatories 1, 2 and 3, threshold 2, viewed by signatory 1
    fn new(operation: Option<PendingOperation>, signer: FixedSigner) -> Self {
        Self::with_wallets(
            operation,
            signer,
            vec![secrets_wallet("signer", 1), multisig_wallet("ms", 100, 1, 2, &[2, 3])],
        )
    }

    fn with_wallets(
        operation: Option<PendingOperation>,
        signer: FixedSigner,
        wallets: Vec<MetaAccount>,
    ) -> Self {
        let store = Arc::new(PendingOperationStore::new());
        if let Some(operation) = operation {
            store.apply(operation);
        }

        let service = Arc::new(RecordingExtrinsicService::new(account(1)));
        let signer = Arc::new(signer);
        let presenter = Arc::new(RecordingPresenter::default());
        let ui_queue = DispatchQueue::new("ui");

        let deps = MultisigOperationDependencies {
            chain: chain("polkadot"),
            multisig_wallet: multisig_wallet("ms", 100, 1, 2, &[2, 3]),
            operation_key: operation_key(),
            pending_operations: store.clone(),
            wallet_repository: Arc::new(MemoryWalletRepository::new(wallets)),
            extrinsic_service: service.clone(),
            signer: signer.clone() as Arc<dyn TransactionSigner>,
            ui_queue: ui_queue.clone(),
        };

        Self { store, service, signer, presenter, ui_queue, deps }
    }

    fn confirm_interactor(&self) -> MultisigOperationConfirmInteractor {
        MultisigOperationConfirmInteractor::new(self.deps.clone(), self.presenter.clone()).unwrap()
    }

    fn reject_interactor(&self) -> MultisigOperationRejectInteractor {
        self.reject_interactor_with(Arc::new(MemorySettingsRepository::new()))
    }

    fn reject_interactor_with(&self, settings: Arc<dyn SettingsRepository>) -> MultisigOperationRejectInteractor {
        MultisigOperationRejectInteractor::new(self.deps.clone(), settings, self.presenter.clone()).unwrap()
    }

    async fn wait_for_state(&self, state: MultisigOperationState) {
        for _ in 0..200 {
            self.ui_queue.flush().await;
            if self.presenter.states().contains(&state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("state {:?} never reached, got {:?}", state, self.presenter.states());
    }

    async fn wait_for_error(&self) -> MultisigOperationError {
        for _ in 0..200 {
            self.ui_queue.flush().await;
            if let Some(error) = self.presenter.errors().into_iter().next() {
                return error;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no error reported, got {:?}", self.presenter.events());
    }
}

fn operation() -> PendingOperation {
    PendingOperation::new(operation_key(), Utc::now())
}

#[tokio::test]
async fn test_final_approval_estimates_with_call_weight() {
    let fixture = Fixture::new(
        Some(operation().with_call(vec![0x05, 0x00]).with_definition(definition(2, &[2]))),
        FixedSigner::signing(&[0xaa]),
    );
    let interactor = fixture.confirm_interactor();

    interactor.setup();
    fixture.wait_for_state(MultisigOperationState::FeeReady).await;

    let call = fixture.service.last_estimated().unwrap();
    assert_eq!(call.module, "Multisig");
    assert_eq!(call.function, "approve_as_multi");
    assert_eq!(call.args["threshold"], json!(2));
    assert_eq!(call.args["other_signatories"], json!([account(2).to_hex(), account(3).to_hex()]));
    assert_eq!(call.args["maybe_timepoint"], json!({ "height": 4_200, "index": 2 }));
    assert_eq!(call.args["call_hash"], json!(CallHash::new([7; 32]).to_hex()));
    assert_eq!(call.args["max_weight"], json!({ "ref_time": 250_000, "proof_size": 4_096 }));
    assert_eq!(*fixture.service.weighed.lock().unwrap(), vec![vec![0x05, 0x00]]);

    assert_eq!(interactor.fee().map(|fee| fee.amount), Some(1_000));
    assert!(fixture
        .presenter
        .events()
        .iter()
        .any(|event| matches!(event, Event::Signatory(meta_id) if meta_id == "signer")));
}

#[tokio::test]
async fn test_first_approval_uses_zero_weight() {
    let fixture = Fixture::new(Some(operation().with_call(vec![0x05])), FixedSigner::signing(&[0xaa]));
    let interactor = fixture.confirm_interactor();

    interactor.setup();
    fixture.wait_for_state(MultisigOperationState::FeeReady).await;

    let call = fixture.service.last_estimated().unwrap();
    assert_eq!(call.args["maybe_timepoint"], json!(null));
    assert_eq!(call.args["max_weight"], json!({ "ref_time": 0, "proof_size": 0 }));
    assert!(fixture.service.weighed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_confirm_submits_and_completes() {
    let fixture = Fixture::new(
        Some(operation().with_definition(definition(2, &[2]))),
        FixedSigner::signing(&[0xab, 0xcd]),
    );
    let interactor = fixture.confirm_interactor();

    interactor.setup();
    fixture.wait_for_state(MultisigOperationState::FeeReady).await;
    interactor.confirm();
    fixture.wait_for_state(MultisigOperationState::Completed).await;

    let states = fixture.presenter.states();
    let submitting = states.iter().position(|state| *state == MultisigOperationState::Submitting);
    let monitoring = states.iter().position(|state| *state == MultisigOperationState::Monitoring);
    assert!(submitting < monitoring);
    assert_eq!(interactor.state(), MultisigOperationState::Completed);
    assert_eq!(fixture.signer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.service.last_submitted().unwrap().function, "approve_as_multi");

    let submitted = fixture.presenter.events().into_iter().find_map(|event| match event {
        Event::Submitted(model, kind) => Some((model, kind)),
        _ => None,
    });
    let (model, kind) = submitted.unwrap();
    assert_eq!(kind, SubmissionKind::Approve);
    assert_eq!(model.tx_hash, "0xabcd");
}

#[tokio::test]
async fn test_signatory_that_approved_cannot_approve_again() {
    let fixture = Fixture::new(Some(operation().with_definition(definition(1, &[1]))), FixedSigner::signing(&[1]));
    let interactor = fixture.confirm_interactor();

    interactor.setup();
    let error = fixture.wait_for_error().await;

    assert!(matches!(error, MultisigOperationError::AlreadyApproved));
    assert!(fixture.service.estimated.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_signing_fails_submission() {
    let fixture = Fixture::new(
        Some(operation().with_definition(definition(2, &[2]))),
        FixedSigner::with(Err(SigningError::Cancelled)),
    );
    let interactor = fixture.confirm_interactor();

    interactor.setup();
    fixture.wait_for_state(MultisigOperationState::FeeReady).await;
    interactor.confirm();
    fixture.wait_for_state(MultisigOperationState::Failed).await;

    assert!(!fixture.presenter.states().contains(&MultisigOperationState::Monitoring));
    assert!(matches!(
        fixture.presenter.errors().as_slice(),
        [MultisigOperationError::SubmissionError(AgentError::SigningError(SigningError::Cancelled))]
    ));
}

#[tokio::test]
async fn test_fee_failure_is_reported() {
    let mut fixture = Fixture::new(Some(operation()), FixedSigner::signing(&[1]));
    let service: Arc<dyn ExtrinsicService> = Arc::new(
        RecordingExtrinsicService::new(account(1)).failing_fee(AgentError::ExtrinsicError("no funds".into())),
    );
    fixture.deps.extrinsic_service = service;
    let interactor = fixture.confirm_interactor();

    interactor.setup();
    let error = fixture.wait_for_error().await;

    assert!(matches!(error, MultisigOperationError::FeeError(AgentError::ExtrinsicError(_))));
    assert_eq!(interactor.state(), MultisigOperationState::Failed);
}

#[tokio::test]
async fn test_definition_change_reestimates_fee() {
    let fixture = Fixture::new(Some(operation().with_call(vec![0x01])), FixedSigner::signing(&[1]));
    let interactor = fixture.confirm_interactor();

    interactor.setup();
    fixture.wait_for_state(MultisigOperationState::FeeReady).await;
    let first = fixture.service.last_estimated().unwrap();

    fixture.store.apply(operation().with_definition(definition(2, &[2])));

    for _ in 0..200 {
        if fixture.service.estimated.lock().unwrap().len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let second = fixture.service.last_estimated().unwrap();
    assert_eq!(first.args["maybe_timepoint"], json!(null));
    assert_eq!(second.args["maybe_timepoint"], json!({ "height": 4_200, "index": 2 }));
    assert_eq!(second.args["max_weight"]["ref_time"], json!(250_000));
    assert_eq!(interactor.operation().unwrap().call, Some(vec![0x01]));
}

#[tokio::test]
async fn test_removed_operation_is_reported() {
    let fixture = Fixture::new(Some(operation()), FixedSigner::signing(&[1]));
    let interactor = fixture.confirm_interactor();

    interactor.setup();
    fixture.wait_for_state(MultisigOperationState::FeeReady).await;
    fixture.store.remove(&operation_key());

    let error = fixture.wait_for_error().await;

    assert!(matches!(error, MultisigOperationError::OperationNotFound));
    assert!(interactor.operation().is_none());
    assert!(interactor.fee().is_none());
    assert_eq!(interactor.state(), MultisigOperationState::Failed);
    assert!(fixture
        .presenter
        .events()
        .iter()
        .any(|event| matches!(event, Event::Operation(None))));

    interactor.confirm();
    fixture.ui_queue.flush().await;
    assert!(fixture.service.submitted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_signatory_wallet_fails() {
    let fixture = Fixture::with_wallets(
        Some(operation()),
        FixedSigner::signing(&[1]),
        vec![multisig_wallet("ms", 100, 1, 2, &[2, 3])],
    );
    let interactor = fixture.confirm_interactor();

    interactor.setup();
    let error = fixture.wait_for_error().await;

    assert!(matches!(error, MultisigOperationError::SignatoryNotFound(id) if id == account(1)));
    assert_eq!(interactor.state(), MultisigOperationState::Failed);
}

#[tokio::test]
async fn test_non_multisig_wallet_is_refused() {
    let mut fixture = Fixture::new(None, FixedSigner::signing(&[1]));
    fixture.deps.multisig_wallet = secrets_wallet("plain", 100);

    let result = MultisigOperationConfirmInteractor::new(fixture.deps.clone(), fixture.presenter.clone());

    assert!(matches!(result, Err(MultisigOperationError::NotMultisig(chain_id)) if chain_id == polkadot()));
}

#[tokio::test]
async fn test_depositor_rejects_with_cancel_call() {
    let fixture = Fixture::new(Some(operation().with_definition(definition(1, &[1]))), FixedSigner::signing(&[0x0f]));
    let interactor = fixture.reject_interactor();

    interactor.setup();
    fixture.wait_for_state(MultisigOperationState::FeeReady).await;

    let call = fixture.service.last_estimated().unwrap();
    assert_eq!(call.function, "cancel_as_multi");
    assert_eq!(call.args["timepoint"], json!({ "height": 4_200, "index": 2 }));
    assert!(call.args.get("max_weight").is_none());

    interactor.reject();
    fixture.wait_for_state(MultisigOperationState::Completed).await;

    let events = fixture.presenter.events();
    assert!(events.iter().any(|event| matches!(event, Event::ConfirmsOperation(true))));
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::Submitted(_, SubmissionKind::Reject))));
    assert_eq!(fixture.service.last_submitted().unwrap().function, "cancel_as_multi");
}

#[tokio::test]
async fn test_only_depositor_can_reject() {
    let fixture = Fixture::new(Some(operation().with_definition(definition(2, &[2]))), FixedSigner::signing(&[1]));
    let interactor = fixture.reject_interactor();

    interactor.setup();
    let error = fixture.wait_for_error().await;

    assert!(matches!(error, MultisigOperationError::NotDepositor));

    interactor.reject();
    fixture.ui_queue.flush().await;
    assert!(fixture.service.submitted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_reject_reports_saved_confirmation_setting() {
    let fixture = Fixture::new(Some(operation().with_definition(definition(1, &[1]))), FixedSigner::signing(&[1]));
    let settings = Arc::new(MemorySettingsRepository::new());
    let interactor =
        MultisigOperationRejectInteractor::new(fixture.deps.clone(), settings, fixture.presenter.clone()).unwrap();

    interactor.save_confirms_operation(false).await.unwrap();
    interactor.setup();
    fixture.wait_for_state(MultisigOperationState::FeeReady).await;

    for _ in 0..200 {
        fixture.ui_queue.flush().await;
        if fixture
            .presenter
            .events()
            .iter()
            .any(|event| matches!(event, Event::ConfirmsOperation(_)))
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(fixture
        .presenter
        .events()
        .iter()
        .any(|event| matches!(event, Event::ConfirmsOperation(false))));
}

#[tokio::test]
async fn test_reject_waits_for_confirmation_setting() {
    let fixture = Fixture::new(Some(operation().with_definition(definition(1, &[1]))), FixedSigner::signing(&[1]));
    let interactor = fixture.reject_interactor_with(Arc::new(StalledSettings));

    interactor.setup();
    fixture.wait_for_state(MultisigOperationState::SignatoriesLoaded).await;

    interactor.reject();
    let error = fixture.wait_for_error().await;

    assert!(matches!(error, MultisigOperationError::SettingsNotLoaded));
    assert_eq!(interactor.state(), MultisigOperationState::SignatoriesLoaded);
    assert!(fixture.service.estimated.lock().unwrap().is_empty());
    assert!(fixture.service.submitted.lock().unwrap().is_empty());
    assert_eq!(fixture.signer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_setting_failure_stops_reject() {
    let fixture = Fixture::new(Some(operation().with_definition(definition(1, &[1]))), FixedSigner::signing(&[1]));
    let interactor = fixture.reject_interactor_with(Arc::new(BrokenSettings));

    interactor.setup();
    let error = fixture.wait_for_error().await;
    assert!(matches!(error, MultisigOperationError::SettingsError(CoreError::StorageError(_))));

    // The signatory may load after the failure; the flow stays failed
    fixture.wait_for_state(MultisigOperationState::Failed).await;
    for _ in 0..20 {
        fixture.ui_queue.flush().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(interactor.state(), MultisigOperationState::Failed);

    interactor.reject();
    fixture.ui_queue.flush().await;

    assert!(matches!(
        fixture.presenter.errors().last(),
        Some(MultisigOperationError::SettingsNotLoaded)
    ));
    assert!(fixture.service.estimated.lock().unwrap().is_empty());
    assert!(fixture.service.submitted.lock().unwrap().is_empty());
    assert!(!fixture
        .presenter
        .events()
        .iter()
        .any(|event| matches!(event, Event::ConfirmsOperation(_))));
}
