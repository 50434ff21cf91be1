//! Tampered ciphertext and partially failed writes.

use bytes::Bytes;

use filevault::store::{BlobStore, Store};
use filevault::{AccessLevel, VaultError};
use filevault_testkit::TestFixture;

#[tokio::test]
async fn flipped_ciphertext_byte_is_detected() {
    let fixture = TestFixture::new();
    let [alice, bob] = <[_; 2]>::try_from(fixture.register_many(&["alice", "bob"]).await).unwrap();
    let vault = &fixture.vault;
    let file = vault.seal_upload(&alice.id, b"do not alter").await.unwrap();
    vault
        .grant_access(&alice.caller(), &file.id, &bob.id, AccessLevel::Download, None)
        .await
        .unwrap();

    let mut blob = vault.blobs().get(&file.blob).await.unwrap().to_vec();
    let last = blob.len() - 1;
    blob[last] ^= 0x01;
    vault.blobs().replace(&file.blob, Bytes::from(blob)).unwrap();

    for caller in [alice.caller(), bob.caller()] {
        let err = vault.fetch(&caller, &file.id, None).await.unwrap_err();
        assert!(matches!(err, VaultError::CorruptOrTampered(id) if id == file.id));
    }
}

#[tokio::test]
async fn blob_header_must_match_record() {
    let fixture = TestFixture::new();
    let alice = fixture.register("alice").await;
    let vault = &fixture.vault;
    let file = vault.seal_upload(&alice.id, b"header check").await.unwrap();

    let mut blob = vault.blobs().get(&file.blob).await.unwrap().to_vec();
    blob[0] ^= 0xff;
    vault.blobs().replace(&file.blob, Bytes::from(blob)).unwrap();

    let err = vault.fetch(&alice.caller(), &file.id, None).await.unwrap_err();
    assert!(matches!(err, VaultError::CorruptOrTampered(_)));
}

#[tokio::test]
async fn truncated_or_missing_blob_is_corrupt() {
    let fixture = TestFixture::new();
    let alice = fixture.register("alice").await;
    let vault = &fixture.vault;
    let file = vault.seal_upload(&alice.id, b"short").await.unwrap();

    vault
        .blobs()
        .replace(&file.blob, Bytes::from_static(&[0u8; 8]))
        .unwrap();
    assert!(matches!(
        vault.fetch(&alice.caller(), &file.id, None).await,
        Err(VaultError::CorruptOrTampered(_))
    ));

    vault.blobs().delete(&file.blob).await.unwrap();
    assert!(matches!(
        vault.fetch(&alice.caller(), &file.id, None).await,
        Err(VaultError::CorruptOrTampered(_))
    ));
}

#[tokio::test]
async fn failed_commit_removes_uploaded_ciphertext() {
    let fixture = TestFixture::new();
    let alice = fixture.register("alice").await;
    let vault = &fixture.vault;

    vault.store().fail_writes(true);
    let err = vault.seal_upload(&alice.id, b"never recorded").await.unwrap_err();
    assert!(matches!(err, VaultError::OrphanWriteFailure { .. }));
    assert!(vault.blobs().is_empty());

    let err = vault.upload_plain(&alice.id, b"never recorded").await.unwrap_err();
    assert!(matches!(err, VaultError::OrphanWriteFailure { .. }));
    assert!(vault.blobs().is_empty());

    vault.store().fail_writes(false);
    let file = vault.seal_upload(&alice.id, b"recorded").await.unwrap();
    assert_eq!(vault.blobs().len(), 1);
    assert!(vault.store().get_file(&file.id).await.unwrap().is_some());
}

#[tokio::test]
async fn failed_blob_write_leaves_no_record() {
    let fixture = TestFixture::new();
    let alice = fixture.register("alice").await;
    let vault = &fixture.vault;

    vault.blobs().fail_puts(true);
    let err = vault.seal_upload(&alice.id, b"nowhere to go").await.unwrap_err();
    assert!(matches!(err, VaultError::Store(_)));
    assert!(vault.blobs().is_empty());

    let activity = vault
        .store()
        .list_activity(&filevault::store::ActivityFilter {
            principal_id: Some(alice.id),
            file_id: None,
        })
        .await
        .unwrap();
    // Registration only.
    assert_eq!(activity.len(), 1);
}

#[tokio::test]
async fn failed_reseal_commit_keeps_old_key() {
    let fixture = TestFixture::new();
    let [alice, bob] = <[_; 2]>::try_from(fixture.register_many(&["alice", "bob"]).await).unwrap();
    let vault = &fixture.vault;
    let file = vault.seal_upload(&alice.id, b"stable").await.unwrap();
    vault
        .grant_access(&alice.caller(), &file.id, &bob.id, AccessLevel::Download, None)
        .await
        .unwrap();

    vault.store().fail_writes(true);
    let err = vault.reseal(&alice.caller(), &file.id).await.unwrap_err();
    assert!(matches!(err, VaultError::OrphanWriteFailure { file_id, .. } if file_id == file.id));
    vault.store().fail_writes(false);

    // The new ciphertext was removed; the old one still serves everyone.
    assert_eq!(vault.blobs().len(), 1);
    let current = vault.store().get_file(&file.id).await.unwrap().unwrap();
    assert_eq!(current, file);
    for caller in [alice.caller(), bob.caller()] {
        let bytes = vault.fetch(&caller, &file.id, None).await.unwrap();
        assert_eq!(&bytes[..], b"stable");
    }
}
