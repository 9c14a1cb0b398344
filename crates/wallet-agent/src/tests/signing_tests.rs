use std::sync::Arc;

use wallet_core::config::SigningConfig;
use wallet_core::DispatchQueue;
use wallet_types::{ChainAccount, ChainId, Delegation, ProxyType};

use super::mocks::{account, multisig_wallet, secrets_wallet, PresentedFlow, ScriptedSigningPresenter};
use crate::delegated::{DelegatedSigningWrapper, DelegationKind, MultisigSigningWrapper, ProxySigningWrapper, SigningFlowResult};
use crate::error::AgentError;
use crate::extrinsic::require_signature;
use crate::signer::{
    DelegateResolution, ExtrinsicSigningContext, SenderResolution, SigningContext, SigningError, SigningOutcome,
    TransactionSigner,
};

fn proxy_delegation() -> Delegation {
    Delegation::Proxy { proxy: account(2), proxy_type: ProxyType::Any, delay: 0 }
}

fn multisig_delegation() -> Delegation {
    Delegation::Multisig { signatory: account(2), threshold: 2, other_signatories: vec![account(3)] }
}

fn delegated_context(delegation: Delegation, can_sign: bool) -> SigningContext {
    SigningContext::SubstrateExtrinsic(ExtrinsicSigningContext {
        chain_id: ChainId::new("polkadot"),
        sender_resolution: SenderResolution::Delegate(DelegateResolution {
            delegated_account: ChainAccount {
                chain_id: None,
                account_id: account(1),
                delegation: Some(delegation.clone()),
            },
            delegate_wallet: secrets_wallet("signer", 2),
            delegate_account_id: account(2),
            delegation,
            calls: Vec::new(),
            can_sign_with_delegate: can_sign,
        }),
    })
}

fn current_context() -> SigningContext {
    SigningContext::SubstrateExtrinsic(ExtrinsicSigningContext {
        chain_id: ChainId::new("polkadot"),
        sender_resolution: SenderResolution::Current(ChainAccount {
            chain_id: None,
            account_id: account(1),
            delegation: None,
        }),
    })
}

fn wrapper(kind: DelegationKind, presenter: Arc<ScriptedSigningPresenter>, config: &SigningConfig) -> DelegatedSigningWrapper {
    DelegatedSigningWrapper::new(kind, presenter, DispatchQueue::new("ui"), config)
}

#[tokio::test]
async fn test_proxy_flow_returns_signature() {
    let presenter = Arc::new(ScriptedSigningPresenter::answering(SigningFlowResult::Signed(vec![7, 7])));
    let signer = ProxySigningWrapper::new(presenter.clone(), DispatchQueue::new("ui"), &SigningConfig::default());

    let outcome = signer.sign(b"extrinsic", &delegated_context(proxy_delegation(), true)).await.unwrap();

    assert_eq!(outcome, SigningOutcome::Signed(vec![7, 7]));
    assert_eq!(presenter.flows(), vec![PresentedFlow::Proxy]);

    let presented = presenter.presented.lock().unwrap();
    assert_eq!(presented[0].1.data, b"extrinsic".to_vec());
    assert_eq!(presented[0].1.chain_id, ChainId::new("polkadot"));
}

#[tokio::test]
async fn test_multisig_flow_is_presented_for_multisig_delegation() {
    let presenter = Arc::new(ScriptedSigningPresenter::answering(SigningFlowResult::Signed(vec![1])));
    let signer = MultisigSigningWrapper::new(presenter.clone(), DispatchQueue::new("ui"), &SigningConfig::default());

    let outcome = signer.sign(b"call", &delegated_context(multisig_delegation(), true)).await.unwrap();

    assert_eq!(outcome.signature(), Some(&[1u8][..]));
    assert_eq!(presenter.flows(), vec![PresentedFlow::Multisig]);
}

#[tokio::test]
async fn test_missing_permissions_never_yield_a_signature() {
    let presenter = Arc::new(ScriptedSigningPresenter::answering(SigningFlowResult::Acknowledged));
    let signer = wrapper(DelegationKind::Proxy, presenter.clone(), &SigningConfig::default());

    let outcome = signer.sign(b"call", &delegated_context(proxy_delegation(), false)).await.unwrap();

    assert_eq!(outcome, SigningOutcome::PermissionsAcknowledged);
    assert_eq!(outcome.signature(), None);
    assert_eq!(presenter.flows(), vec![PresentedFlow::NotEnoughPermissions]);
    assert!(matches!(require_signature(outcome), Err(AgentError::NotSigned)));
}

#[tokio::test]
async fn test_signature_from_permissions_flow_is_rejected() {
    let presenter = Arc::new(ScriptedSigningPresenter::answering(SigningFlowResult::Signed(vec![9])));
    let signer = wrapper(DelegationKind::Proxy, presenter, &SigningConfig::default());

    let result = signer.sign(b"call", &delegated_context(proxy_delegation(), false)).await;

    assert!(matches!(result, Err(SigningError::Failed(_))));
}

#[tokio::test]
async fn test_non_delegated_sender_fails_without_ui() {
    let presenter = Arc::new(ScriptedSigningPresenter::answering(SigningFlowResult::Signed(vec![1])));
    let ui_queue = DispatchQueue::new("ui");
    let signer = DelegatedSigningWrapper::new(
        DelegationKind::Multisig,
        presenter.clone(),
        ui_queue.clone(),
        &SigningConfig::default(),
    );

    let result = signer.sign(b"call", &current_context()).await;
    ui_queue.flush().await;

    assert_eq!(result, Err(SigningError::NoKeys));
    assert!(presenter.flows().is_empty());
}

#[tokio::test]
async fn test_unsupported_contexts_are_rejected() {
    let presenter = Arc::new(ScriptedSigningPresenter::answering(SigningFlowResult::Signed(vec![1])));
    let signer = wrapper(DelegationKind::Proxy, presenter.clone(), &SigningConfig::default());

    let evm = signer
        .sign(b"tx", &SigningContext::EvmTransaction { chain_id: ChainId::new("moonbeam") })
        .await;
    let raw = signer.sign(b"bytes", &SigningContext::RawBytes).await;

    assert!(matches!(evm, Err(SigningError::UnsupportedContext(_))));
    assert!(matches!(raw, Err(SigningError::UnsupportedContext(_))));
    assert!(presenter.flows().is_empty());
}

#[tokio::test]
async fn test_delegation_kind_must_match() {
    let presenter = Arc::new(ScriptedSigningPresenter::answering(SigningFlowResult::Signed(vec![1])));
    let signer = wrapper(DelegationKind::Proxy, presenter.clone(), &SigningConfig::default());

    let result = signer.sign(b"call", &delegated_context(multisig_delegation(), true)).await;

    assert!(matches!(result, Err(SigningError::DelegationMismatch(_))));
    assert!(presenter.flows().is_empty());
}

#[tokio::test]
async fn test_cancelled_flow_reports_cancellation() {
    let presenter = Arc::new(ScriptedSigningPresenter::answering(SigningFlowResult::Cancelled));
    let signer = wrapper(DelegationKind::Multisig, presenter, &SigningConfig::default());

    let result = signer.sign(b"call", &delegated_context(multisig_delegation(), true)).await;

    assert_eq!(result, Err(SigningError::Cancelled));
    assert!(SigningError::Cancelled.is_cancellation());
}

#[tokio::test]
async fn test_dismissed_flow_closes_request() {
    let presenter = Arc::new(ScriptedSigningPresenter::silent());
    let ui_queue = DispatchQueue::new("ui");
    let signer = DelegatedSigningWrapper::new(
        DelegationKind::Proxy,
        presenter.clone(),
        ui_queue.clone(),
        &SigningConfig::default(),
    );

    let context = delegated_context(proxy_delegation(), true);
    let pending = tokio::spawn(async move { signer.sign(b"call", &context).await });

    while presenter.flows().is_empty() {
        tokio::task::yield_now().await;
    }
    ui_queue.flush().await;
    presenter.dismiss_all();

    assert_eq!(pending.await.unwrap(), Err(SigningError::FlowClosed));
    assert!(SigningError::FlowClosed.is_cancellation());
    assert!(!SigningError::NoKeys.is_cancellation());
}

#[tokio::test]
async fn test_unanswered_flow_times_out() {
    let presenter = Arc::new(ScriptedSigningPresenter::silent());
    let config = SigningConfig { approval_timeout_seconds: Some(1) };
    let signer = wrapper(DelegationKind::Proxy, presenter.clone(), &config);

    let result = signer.sign(b"call", &delegated_context(proxy_delegation(), true)).await;

    assert!(matches!(result, Err(SigningError::Timeout(_))));
    assert_eq!(presenter.flows(), vec![PresentedFlow::Proxy]);
}

#[test]
fn test_delegation_kind_matching() {
    assert!(DelegationKind::Proxy.matches(&proxy_delegation()));
    assert!(!DelegationKind::Proxy.matches(&multisig_delegation()));
    assert!(DelegationKind::Multisig.matches(&multisig_delegation()));

    let wallet = multisig_wallet("ms", 1, 2, 2, &[3]);
    let delegation = wallet.delegation(&ChainId::new("kusama")).unwrap();
    assert!(DelegationKind::Multisig.matches(delegation));
}
