use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use wallet_types::{ChainId, DiscoveredMultisig};

use super::mocks::{account, ids, multisig, FixedMultisigSource};
use crate::cache::{DelegateMap, DelegatedAccountsCache};
use crate::error::SyncError;
use crate::multisig::MultisigAccountsRepository;

fn universe() -> Vec<DiscoveredMultisig> {
    vec![
        multisig(100, 2, &[1, 2, 3]),
        multisig(101, 2, &[2, 4]),
        multisig(102, 1, &[3, 5]),
    ]
}

fn repository(source: Arc<FixedMultisigSource>) -> MultisigAccountsRepository {
    MultisigAccountsRepository::new(ChainId::new("polkadot"), source)
}

fn as_sets(map: DelegateMap<DiscoveredMultisig>) -> Vec<(u8, HashSet<DiscoveredMultisig>)> {
    let mut entries: Vec<(u8, HashSet<DiscoveredMultisig>)> = map
        .into_iter()
        .map(|(account_id, records)| (account_id.as_bytes()[0], records.into_iter().collect()))
        .collect();
    entries.sort_by_key(|(byte, _)| *byte);
    entries
}

#[tokio::test]
async fn test_fetch_groups_records_by_signatory() {
    let source = Arc::new(FixedMultisigSource::new(universe()));
    let repository = repository(source.clone());

    let result = repository.fetch_delegates(&ids(&[2, 9])).await.unwrap();

    assert_eq!(result.len(), 2);
    assert_eq!(result[&account(2)].len(), 2);
    assert!(result[&account(9)].is_empty());
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cached_ids_skip_the_network() {
    let source = Arc::new(FixedMultisigSource::new(universe()));
    let repository = repository(source.clone());

    repository.fetch_delegates(&ids(&[1, 2])).await.unwrap();
    let again = repository.fetch_delegates(&ids(&[1])).await.unwrap();

    assert_eq!(again.len(), 1);
    assert_eq!(again[&account(1)], vec![multisig(100, 2, &[1, 2, 3])]);
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_only_uncached_ids_are_requested() {
    let source = Arc::new(FixedMultisigSource::new(universe()));
    let repository = repository(source.clone());

    repository.fetch_delegates(&ids(&[1, 2])).await.unwrap();
    let result = repository.fetch_delegates(&ids(&[2, 3])).await.unwrap();

    let requested = source.requested.lock().unwrap().clone();
    assert_eq!(requested, vec![ids(&[1, 2]), ids(&[3])]);
    assert_eq!(result.len(), 2);
    assert_eq!(result[&account(3)].len(), 2);
}

#[tokio::test]
async fn test_overlapping_fetches_match_single_fetch() {
    let split_source = Arc::new(FixedMultisigSource::new(universe()));
    let split = repository(split_source);
    split.fetch_delegates(&ids(&[1, 2])).await.unwrap();
    split.fetch_delegates(&ids(&[2, 3])).await.unwrap();

    let single_source = Arc::new(FixedMultisigSource::new(universe()));
    let single = repository(single_source);
    single.fetch_delegates(&ids(&[1, 2, 3])).await.unwrap();

    assert_eq!(as_sets(split.cached()), as_sets(single.cached()));
}

#[tokio::test]
async fn test_failed_fetch_leaves_cache_untouched() {
    let source = Arc::new(FixedMultisigSource::new(universe()));
    let repository = repository(source.clone());
    repository.fetch_delegates(&ids(&[1])).await.unwrap();
    let before = repository.cached();

    source.fail.store(true, Ordering::SeqCst);
    let result = repository.fetch_delegates(&ids(&[1, 4])).await;

    assert!(matches!(result, Err(SyncError::HttpError(_))));
    assert_eq!(repository.cached(), before);

    // The failed id is still uncached and is fetched once the source recovers
    source.fail.store(false, Ordering::SeqCst);
    let recovered = repository.fetch_delegates(&ids(&[4])).await.unwrap();
    assert_eq!(recovered[&account(4)], vec![multisig(101, 2, &[2, 4])]);
}

#[test]
fn test_merge_is_a_union() {
    let cache = DelegatedAccountsCache::new();
    let first = multisig(100, 2, &[1, 2]);
    let second = multisig(101, 2, &[1, 3]);

    cache.merge(&ids(&[1]), &[first.clone()]);
    let merged = cache.merge(&ids(&[1]), &[second.clone(), first.clone()]);

    assert_eq!(merged[&account(1)], vec![first, second]);
}

#[test]
fn test_merging_same_result_twice_is_harmless() {
    let cache = DelegatedAccountsCache::new();
    let fetched = universe();

    cache.merge(&ids(&[2, 3]), &fetched);
    let once = cache.snapshot();
    cache.merge(&ids(&[2, 3]), &fetched);

    assert_eq!(cache.snapshot(), once);
}
