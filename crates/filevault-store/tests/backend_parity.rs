//! The same behavioural checks run against both store backends.

use std::sync::Arc;

use filevault_core::{CipherAlgorithm, FileId, FileKey, PrincipalId, WrapAlgorithm, WrappedKey};
use filevault_perms::{AccessLevel, Grant, ShareToken};
use filevault_store::{
    BlobLocator, Envelope, EnvelopeStore, MemoryStore, PrincipalRecord, PutMode, PutResult,
    SealedFile, Sealing, SqliteStore, Store, StoreError,
};

fn sealed_file(owner: PrincipalId) -> SealedFile {
    SealedFile {
        id: FileId::new(),
        owner_id: owner,
        blob: BlobLocator::generate(),
        sealing: Some(Sealing {
            algorithm: CipherAlgorithm::Aes256Gcm,
            nonce: [3; 16],
            tag: [4; 16],
        }),
        plaintext_size: 11,
        stored_size: 43,
        key_epoch: 0,
        created_at: 100,
        updated_at: 100,
    }
}

fn envelope(file_id: FileId, recipient_id: PrincipalId, byte: u8) -> Envelope {
    envelope_at(file_id, recipient_id, byte, 0)
}

fn envelope_at(file_id: FileId, recipient_id: PrincipalId, byte: u8, key_epoch: u32) -> Envelope {
    Envelope {
        file_id,
        recipient_id,
        wrapped_key: WrappedKey::from_bytes(vec![byte; 16]),
        algorithm: WrapAlgorithm::RsaOaepSha256,
        key_epoch,
        created_at: 100,
    }
}

/// `file` after one key change under a fresh blob.
fn resealed(file: &SealedFile) -> SealedFile {
    SealedFile {
        blob: BlobLocator::generate(),
        key_epoch: file.key_epoch + 1,
        updated_at: file.updated_at + 1,
        ..file.clone()
    }
}

fn public_grant(file_id: FileId, owner: PrincipalId, token: &ShareToken, now: i64) -> Grant {
    Grant::public(
        file_id,
        owner,
        token.hash(),
        Some(token.wrap_file_key(&FileKey::generate(), &file_id).unwrap()),
        AccessLevel::Download,
        None,
        now,
    )
}

async fn seed<S: Store>(store: &S) -> (PrincipalId, PrincipalId, SealedFile) {
    let owner = PrincipalId::new();
    let bob = PrincipalId::new();
    for id in [owner, bob] {
        store
            .insert_principal(&PrincipalRecord::without_keys(id, 0))
            .await
            .unwrap();
    }

    let file = sealed_file(owner);
    store
        .commit_sealed_file(&file, Some(&envelope(file.id, owner, 0)))
        .await
        .unwrap();
    (owner, bob, file)
}

async fn concurrent_grants_leave_one_envelope<S: Store + 'static>(store: Arc<S>) {
    let (owner, bob, file) = seed(store.as_ref()).await;
    let file_id = file.id;

    let mut handles = Vec::new();
    for i in 0..8u8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let grant = Grant::private(file_id, owner, bob, AccessLevel::Download, None, 100);
            store
                .issue_private_grant(&grant, Some(&envelope(file_id, bob, i)), 0)
                .await
                .unwrap()
        }));
    }

    let mut inserted = 0;
    for handle in handles {
        if handle.await.unwrap() == PutResult::Inserted {
            inserted += 1;
        }
    }

    assert_eq!(inserted, 1);
    assert_eq!(store.list_envelopes(&file.id).await.unwrap().len(), 2);
    assert_eq!(store.list_grants_for_file(&file.id).await.unwrap().len(), 1);
}

async fn duplicate_insert_is_rejected<S: Store>(store: &S) {
    let (_, bob, file) = seed(store).await;

    let first = store
        .put_envelope(&envelope(file.id, bob, 1), PutMode::Insert)
        .await
        .unwrap();
    let second = store
        .put_envelope(&envelope(file.id, bob, 2), PutMode::Insert)
        .await
        .unwrap();

    assert_eq!(first, PutResult::Inserted);
    assert_eq!(second, PutResult::AlreadyExists);
    let kept = store.get_envelope(&file.id, &bob).await.unwrap().unwrap();
    assert_eq!(kept.wrapped_key.as_bytes(), &[1; 16]);
}

async fn delete_file_cascades<S: Store>(store: &S) {
    let (owner, bob, file) = seed(store).await;
    let grant = Grant::private(file.id, owner, bob, AccessLevel::Edit, None, 100);
    store
        .issue_private_grant(&grant, Some(&envelope(file.id, bob, 5)), 0)
        .await
        .unwrap();

    let deleted = store.delete_file(&file.id).await.unwrap();
    assert_eq!(deleted.map(|f| f.id), Some(file.id));

    assert!(store.get_file(&file.id).await.unwrap().is_none());
    assert!(store.get_grant(&grant.id).await.unwrap().is_none());
    assert!(store.get_envelope(&file.id, &bob).await.unwrap().is_none());
    assert!(store.get_envelope(&file.id, &owner).await.unwrap().is_none());
    assert!(store.list_grants_for_recipient(&bob).await.unwrap().is_empty());
    assert!(store.list_grants_for_owner(&owner).await.unwrap().is_empty());
    assert!(store.delete_file(&file.id).await.unwrap().is_none());
}

async fn revoke_removes_envelope<S: Store>(store: &S) {
    let (owner, bob, file) = seed(store).await;
    let grant = Grant::private(file.id, owner, bob, AccessLevel::Download, None, 100);
    store
        .issue_private_grant(&grant, Some(&envelope(file.id, bob, 5)), 0)
        .await
        .unwrap();

    let removed = store.delete_grant(&grant.id).await.unwrap();
    assert_eq!(removed, Some(grant.clone()));
    assert!(store.get_envelope(&file.id, &bob).await.unwrap().is_none());
    assert!(store.get_envelope(&file.id, &owner).await.unwrap().is_some());
    assert!(store.delete_grant(&grant.id).await.unwrap().is_none());
}

async fn grants_require_known_file_and_recipient<S: Store>(store: &S) {
    let (owner, _, file) = seed(store).await;

    let stranger = PrincipalId::new();
    let grant = Grant::private(file.id, owner, stranger, AccessLevel::View, None, 100);
    assert!(store
        .issue_private_grant(&grant, Some(&envelope(file.id, stranger, 1)), 0)
        .await
        .is_err());

    let ghost = FileId::new();
    let grant = Grant::private(ghost, owner, owner, AccessLevel::View, None, 100);
    assert!(store
        .issue_private_grant(&grant, Some(&envelope(ghost, owner, 1)), 0)
        .await
        .is_err());
}

async fn owner_listing_spans_files<S: Store>(store: &S) {
    let (owner, bob, file) = seed(store).await;
    let second = sealed_file(owner);
    store
        .commit_sealed_file(&second, Some(&envelope(second.id, owner, 0)))
        .await
        .unwrap();

    let private = Grant::private(file.id, owner, bob, AccessLevel::View, None, 100);
    store
        .issue_private_grant(&private, Some(&envelope(file.id, bob, 1)), 0)
        .await
        .unwrap();
    let public = public_grant(second.id, owner, &ShareToken::generate(), 101);
    store.insert_public_grant(&public, 0).await.unwrap();

    let owned = store.list_grants_for_owner(&owner).await.unwrap();
    assert_eq!(owned, vec![private.clone(), public.clone()]);
    assert!(store.list_grants_for_owner(&bob).await.unwrap().is_empty());

    store.delete_grant(&private.id).await.unwrap();
    assert_eq!(store.list_grants_for_owner(&owner).await.unwrap(), vec![public]);
}

async fn token_lookup_follows_grant<S: Store>(store: &S) {
    let (owner, _, file) = seed(store).await;
    let token = ShareToken::generate();
    let grant = Grant {
        expires_at: Some(50),
        ..public_grant(file.id, owner, &token, 100)
    };
    store.insert_public_grant(&grant, 0).await.unwrap();

    // Found whatever its expiry.
    let found = store.find_grant_by_token(&token.hash()).await.unwrap();
    assert_eq!(found, Some(grant.clone()));
    assert!(store
        .find_grant_by_token(&ShareToken::generate().hash())
        .await
        .unwrap()
        .is_none());

    store.delete_grant(&grant.id).await.unwrap();
    assert!(store.find_grant_by_token(&token.hash()).await.unwrap().is_none());
}

async fn stale_epoch_writes_are_refused<S: Store>(store: &S) {
    let (owner, bob, file) = seed(store).await;

    let first = resealed(&file);
    store
        .commit_reseal(&first, Some(&envelope_at(file.id, owner, 1, 1)), 0)
        .await
        .unwrap();

    // A second key change prepared against the same starting epoch.
    let second = resealed(&file);
    let err = store
        .commit_reseal(&second, Some(&envelope_at(file.id, owner, 2, 1)), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::StaleKeyEpoch { found: 1, .. }));
    assert_eq!(store.get_file(&file.id).await.unwrap(), Some(first));

    // A grant wrapped under the superseded key.
    let grant = Grant::private(file.id, owner, bob, AccessLevel::Download, None, 100);
    let err = store
        .issue_private_grant(&grant, Some(&envelope_at(file.id, bob, 3, 0)), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::StaleKeyEpoch { .. }));
    assert!(store.get_envelope(&file.id, &bob).await.unwrap().is_none());
    assert!(store.get_grant(&grant.id).await.unwrap().is_none());

    let public = public_grant(file.id, owner, &ShareToken::generate(), 100);
    let err = store.insert_public_grant(&public, 0).await.unwrap_err();
    assert!(matches!(err, StoreError::StaleKeyEpoch { .. }));

    let err = store
        .put_envelope(&envelope_at(file.id, bob, 4, 0), PutMode::Insert)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::StaleKeyEpoch { .. }));

    // Prepared under the current epoch, the grant goes through.
    assert_eq!(
        store
            .issue_private_grant(&grant, Some(&envelope_at(file.id, bob, 5, 1)), 1)
            .await
            .unwrap(),
        PutResult::Inserted
    );
}

async fn plaintext_files_share_without_keys<S: Store>(store: &S) {
    let (owner, bob, _) = seed(store).await;
    let plain = SealedFile {
        sealing: None,
        stored_size: 11,
        ..sealed_file(owner)
    };
    store.commit_sealed_file(&plain, None).await.unwrap();

    let grant = Grant::private(plain.id, owner, bob, AccessLevel::Download, None, 100);
    assert!(store
        .issue_private_grant(&grant, Some(&envelope(plain.id, bob, 1)), 0)
        .await
        .is_err());
    assert_eq!(
        store.issue_private_grant(&grant, None, 0).await.unwrap(),
        PutResult::Inserted
    );
    let again = Grant::private(plain.id, owner, bob, AccessLevel::View, None, 101);
    assert_eq!(
        store.issue_private_grant(&again, None, 0).await.unwrap(),
        PutResult::AlreadyExists
    );
    assert!(store.get_envelope(&plain.id, &bob).await.unwrap().is_none());

    let token = ShareToken::generate();
    let keyless = Grant::public(
        plain.id,
        owner,
        token.hash(),
        None,
        AccessLevel::View,
        None,
        100,
    );
    store.insert_public_grant(&keyless, 0).await.unwrap();

    let keyed = public_grant(plain.id, owner, &ShareToken::generate(), 100);
    assert!(matches!(
        store.insert_public_grant(&keyed, 0).await,
        Err(StoreError::InvalidData(_))
    ));
    assert_eq!(store.list_grants_for_file(&plain.id).await.unwrap().len(), 2);
}

macro_rules! backend_tests {
    ($module:ident, $make:expr) => {
        mod $module {
            use super::*;

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn concurrent_grants() {
                concurrent_grants_leave_one_envelope(Arc::new($make)).await;
            }

            #[tokio::test]
            async fn duplicate_insert() {
                duplicate_insert_is_rejected(&$make).await;
            }

            #[tokio::test]
            async fn cascade() {
                delete_file_cascades(&$make).await;
            }

            #[tokio::test]
            async fn revoke() {
                revoke_removes_envelope(&$make).await;
            }

            #[tokio::test]
            async fn referential_checks() {
                grants_require_known_file_and_recipient(&$make).await;
            }

            #[tokio::test]
            async fn owner_listing() {
                owner_listing_spans_files(&$make).await;
            }

            #[tokio::test]
            async fn token_lookup() {
                token_lookup_follows_grant(&$make).await;
            }

            #[tokio::test]
            async fn stale_epoch() {
                stale_epoch_writes_are_refused(&$make).await;
            }

            #[tokio::test]
            async fn plaintext_grants() {
                plaintext_files_share_without_keys(&$make).await;
            }
        }
    };
}

backend_tests!(memory, MemoryStore::new());
backend_tests!(sqlite, SqliteStore::open_memory().unwrap());
