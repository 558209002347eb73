use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use docket_core::{derive_key, CaseId, EntityIdType, LeaseHandle};
use docket_lock::{DistributedLock, InMemoryKvStore, LockAttempt};
use proptest::prelude::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquires_have_exactly_one_winner() {
    let lock = DistributedLock::new(Arc::new(InMemoryKvStore::new()));
    let key = derive_key(CaseId::nil(), ["doc-1", "doc-2"], "model", "CaseSummary@v1", None);

    let mut handles = Vec::new();
    for _ in 0..32 {
        let lock = lock.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            lock.acquire(&key, Duration::from_secs(30)).await.unwrap()
        }));
    }

    let mut winners = 0;
    let mut busy = 0;
    for handle in handles {
        match handle.await.unwrap() {
            LockAttempt::Acquired(_) => winners += 1,
            LockAttempt::Busy { remaining } => {
                assert!(remaining.is_some());
                busy += 1;
            }
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(busy, 31);
}

#[tokio::test]
async fn distinct_keys_do_not_contend() {
    let lock = DistributedLock::new(Arc::new(InMemoryKvStore::new()));
    for seed in ["a", "b", "c"] {
        let key = derive_key(CaseId::nil(), [seed], "model", "CaseSummary@v1", None);
        assert!(lock
            .acquire(&key, Duration::from_secs(30))
            .await
            .unwrap()
            .is_acquired());
    }
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every successful acquisition hands out a token never seen before.
    #[test]
    fn tokens_are_unique_across_cycles(cycles in 1usize..24, seed in "[a-z]{1,8}") {
        let tokens = block_on(async {
            let lock = DistributedLock::new(Arc::new(InMemoryKvStore::new()));
            let key = derive_key(CaseId::nil(), [seed.as_str()], "model", "CaseSummary@v1", None);
            let mut tokens = Vec::new();
            for _ in 0..cycles {
                let LockAttempt::Acquired(lease) =
                    lock.acquire(&key, Duration::from_secs(30)).await.unwrap()
                else {
                    panic!("released lock should be free");
                };
                tokens.push(lease.token().to_string());
                assert!(lock.release(&lease.into_handle()).await.unwrap());
            }
            tokens
        });
        let distinct: HashSet<_> = tokens.iter().collect();
        prop_assert_eq!(distinct.len(), tokens.len());
    }

    /// Only the current owner's token can extend or release the lock.
    #[test]
    fn only_the_owner_can_extend_or_release(forged in "[a-z0-9]{1,36}") {
        let (extended, released, owner_released) = block_on(async {
            let kv = Arc::new(InMemoryKvStore::new());
            let lock = DistributedLock::new(kv.clone());
            let key = derive_key(CaseId::nil(), ["doc"], "model", "CaseSummary@v1", None);
            let LockAttempt::Acquired(lease) =
                lock.acquire(&key, Duration::from_secs(30)).await.unwrap()
            else {
                panic!("lock should be free");
            };
            let stranger = LeaseHandle {
                lock_key: key.lock_key(),
                token: forged.clone(),
            };
            let extended = lock.extend(&stranger, Duration::from_secs(60)).await.unwrap();
            let released = lock.release(&stranger).await.unwrap();
            let owner_released = lock.release(&lease.into_handle()).await.unwrap();
            (extended, released, owner_released)
        });
        // Owner tokens are hyphenated UUIDs, so an unhyphenated string never matches.
        prop_assert!(!extended);
        prop_assert!(!released);
        prop_assert!(owner_released);
    }
}
