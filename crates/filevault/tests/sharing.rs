//! Private grants, public links, expiry and revocation.

use filevault::core::{now_millis, PrincipalId};
use filevault::perms::DenyReason;
use filevault::store::{ActivityAction, EnvelopeStore, PrincipalRecord, Store};
use filevault::{AccessDecision, AccessLevel, Caller, GrantUpdate, ShareToken, VaultError};
use filevault_testkit::{test_config, TestFixture};

#[tokio::test]
async fn upload_share_fetch_revoke() {
    let fixture = TestFixture::new();
    let [alice, bob] = <[_; 2]>::try_from(fixture.register_many(&["alice", "bob"]).await).unwrap();
    let vault = &fixture.vault;

    let file = vault.seal_upload(&alice.id, b"hello bob").await.unwrap();
    assert_eq!(file.owner_id, alice.id);
    assert_eq!(file.plaintext_size, 9);
    assert_eq!(file.key_epoch, 0);

    let grant = vault
        .grant_access(&alice.caller(), &file.id, &bob.id, AccessLevel::Download, None)
        .await
        .unwrap();
    assert_eq!(grant.recipient(), Some(&bob.id));

    let bytes = vault.fetch(&bob.caller(), &file.id, None).await.unwrap();
    assert_eq!(&bytes[..], b"hello bob");

    let envelopes = vault.list_envelopes(&alice.identified(), &file.id).await.unwrap();
    let holders: Vec<_> = envelopes.iter().map(|e| e.recipient_id).collect();
    assert_eq!(holders, vec![alice.id, bob.id]);

    vault.revoke(&alice.identified(), &grant.id).await.unwrap();

    let err = vault.fetch(&bob.caller(), &file.id, None).await.unwrap_err();
    assert!(matches!(err, VaultError::AccessDenied));
    assert!(vault.store().get_envelope(&file.id, &bob.id).await.unwrap().is_none());

    // Owner unaffected.
    let bytes = vault.fetch(&alice.caller(), &file.id, None).await.unwrap();
    assert_eq!(&bytes[..], b"hello bob");
}

#[tokio::test]
async fn grant_requires_recipient_key() {
    let fixture = TestFixture::new();
    let alice = fixture.register("alice").await;
    let vault = &fixture.vault;

    let carol = PrincipalId::new();
    vault
        .store()
        .insert_principal(&PrincipalRecord::without_keys(carol, now_millis()))
        .await
        .unwrap();

    let file = vault.seal_upload(&alice.id, b"secret").await.unwrap();
    let err = vault
        .grant_access(&alice.caller(), &file.id, &carol, AccessLevel::Download, None)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::RecipientKeyMissing(id) if id == carol));

    assert!(vault.list_grants(&alice.identified(), &file.id).await.unwrap().is_empty());
    assert_eq!(vault.list_envelopes(&alice.identified(), &file.id).await.unwrap().len(), 1);

    let stranger = PrincipalId::new();
    let err = vault
        .grant_access(&alice.caller(), &file.id, &stranger, AccessLevel::View, None)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::RecipientNotFound(id) if id == stranger));
}

#[tokio::test]
async fn grant_rejects_self_share_and_duplicates() {
    let fixture = TestFixture::new();
    let [alice, bob] = <[_; 2]>::try_from(fixture.register_many(&["alice", "bob"]).await).unwrap();
    let vault = &fixture.vault;
    let file = vault.seal_upload(&alice.id, b"x").await.unwrap();

    let err = vault
        .grant_access(&alice.caller(), &file.id, &alice.id, AccessLevel::Edit, None)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::SelfShare));

    vault
        .grant_access(&alice.caller(), &file.id, &bob.id, AccessLevel::Edit, None)
        .await
        .unwrap();
    let err = vault
        .grant_access(&alice.caller(), &file.id, &bob.id, AccessLevel::Download, None)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::DuplicateGrant));
    assert_eq!(vault.list_grants(&alice.identified(), &file.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn only_owner_can_share() {
    let fixture = TestFixture::new();
    let [alice, bob, carol] =
        <[_; 3]>::try_from(fixture.register_many(&["alice", "bob", "carol"]).await).unwrap();
    let vault = &fixture.vault;
    let file = vault.seal_upload(&alice.id, b"x").await.unwrap();
    vault
        .grant_access(&alice.caller(), &file.id, &bob.id, AccessLevel::Edit, None)
        .await
        .unwrap();

    let err = vault
        .grant_access(&bob.caller(), &file.id, &carol.id, AccessLevel::Edit, None)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::AccessDenied));

    let err = vault
        .create_public_link(&bob.caller(), &file.id, AccessLevel::Download, None)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::AccessDenied));

    assert!(matches!(
        vault.list_grants(&bob.identified(), &file.id).await,
        Err(VaultError::AccessDenied)
    ));
}

#[tokio::test]
async fn view_grant_releases_metadata_only() {
    let fixture = TestFixture::new();
    let [alice, bob] = <[_; 2]>::try_from(fixture.register_many(&["alice", "bob"]).await).unwrap();
    let vault = &fixture.vault;
    let file = vault.seal_upload(&alice.id, b"look, don't touch").await.unwrap();

    let grant = vault
        .grant_access(&alice.caller(), &file.id, &bob.id, AccessLevel::View, None)
        .await
        .unwrap();

    let decision = vault.access(&bob.caller(), &file.id, None).await.unwrap();
    assert_eq!(
        decision,
        AccessDecision::PrivateGrant {
            grant_id: grant.id,
            level: AccessLevel::View
        }
    );

    let err = vault.fetch(&bob.caller(), &file.id, None).await.unwrap_err();
    assert!(matches!(err, VaultError::AccessDenied));

    // Upgrading the level releases the bytes.
    vault
        .update_grant(
            &alice.identified(),
            &grant.id,
            GrantUpdate::default().access_level(AccessLevel::Download),
        )
        .await
        .unwrap();
    let bytes = vault.fetch(&bob.caller(), &file.id, None).await.unwrap();
    assert_eq!(&bytes[..], b"look, don't touch");
}

#[tokio::test]
async fn expired_grant_is_denied() {
    let fixture = TestFixture::with_config(filevault::VaultConfig {
        require_future_expiry: false,
        ..test_config()
    });
    let [alice, bob] = <[_; 2]>::try_from(fixture.register_many(&["alice", "bob"]).await).unwrap();
    let vault = &fixture.vault;
    let file = vault.seal_upload(&alice.id, b"stale").await.unwrap();

    let past = now_millis() - 60_000;
    vault
        .grant_access(&alice.caller(), &file.id, &bob.id, AccessLevel::Download, Some(past))
        .await
        .unwrap();

    let err = vault.fetch(&bob.caller(), &file.id, None).await.unwrap_err();
    assert!(matches!(err, VaultError::AccessDenied));

    // The reason is not revealed.
    let decision = vault.access(&bob.caller(), &file.id, None).await.unwrap();
    assert_eq!(decision, AccessDecision::Denied(DenyReason::NoGrant));

    assert!(vault.received_grants(&bob.identified()).await.unwrap().is_empty());
}

#[tokio::test]
async fn expiry_must_be_in_future() {
    let fixture = TestFixture::new();
    let [alice, bob] = <[_; 2]>::try_from(fixture.register_many(&["alice", "bob"]).await).unwrap();
    let vault = &fixture.vault;
    let file = vault.seal_upload(&alice.id, b"x").await.unwrap();

    let err = vault
        .grant_access(
            &alice.caller(),
            &file.id,
            &bob.id,
            AccessLevel::Download,
            Some(now_millis() - 1),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::InvalidExpiry));

    let future = now_millis() + 3_600_000;
    let grant = vault
        .grant_access(&alice.caller(), &file.id, &bob.id, AccessLevel::Download, Some(future))
        .await
        .unwrap();
    assert_eq!(grant.expires_at, Some(future));

    let received = vault.received_grants(&bob.identified()).await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].id, grant.id);

    let err = vault
        .update_grant(
            &alice.identified(),
            &grant.id,
            GrantUpdate::default().expires_at(Some(0)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::InvalidExpiry));

    let cleared = vault
        .update_grant(&alice.identified(), &grant.id, GrantUpdate::default().expires_at(None))
        .await
        .unwrap();
    assert_eq!(cleared.expires_at, None);
}

#[tokio::test]
async fn wrong_passphrase_is_access_denied() {
    let fixture = TestFixture::new();
    let [alice, bob] = <[_; 2]>::try_from(fixture.register_many(&["alice", "bob"]).await).unwrap();
    let vault = &fixture.vault;
    let file = vault.seal_upload(&alice.id, b"x").await.unwrap();

    let err = vault
        .fetch(&alice.with_wrong_passphrase(), &file.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::AccessDenied));

    let err = vault
        .grant_access(
            &alice.with_wrong_passphrase(),
            &file.id,
            &bob.id,
            AccessLevel::Download,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::AccessDenied));
    assert!(vault.list_grants(&alice.identified(), &file.id).await.unwrap().is_empty());

    // Identity alone cannot unwrap.
    let err = vault.fetch(&alice.identified(), &file.id, None).await.unwrap_err();
    assert!(matches!(err, VaultError::AccessDenied));
}

#[tokio::test]
async fn unknown_file_reads_as_denied() {
    let fixture = TestFixture::new();
    let alice = fixture.register("alice").await;
    let vault = &fixture.vault;
    let ghost = filevault::FileId::new();

    assert!(matches!(
        vault.fetch(&alice.caller(), &ghost, None).await,
        Err(VaultError::AccessDenied)
    ));
    assert!(matches!(
        vault.delete_file(&alice.identified(), &ghost).await,
        Err(VaultError::AccessDenied)
    ));
    assert_eq!(
        vault.access(&alice.caller(), &ghost, None).await.unwrap(),
        AccessDecision::Denied(DenyReason::NoGrant)
    );
}

#[tokio::test]
async fn public_link_lifecycle() {
    let fixture = TestFixture::new();
    let alice = fixture.register("alice").await;
    let vault = &fixture.vault;
    let file = vault.seal_upload(&alice.id, b"for everyone").await.unwrap();

    let (grant, token) = vault
        .create_public_link(&alice.caller(), &file.id, AccessLevel::Download, None)
        .await
        .unwrap();
    assert!(grant.is_public());
    assert_eq!(grant.token_hash(), Some(&token.hash()));

    // The token survives a round trip through its URL form.
    let presented = ShareToken::parse(&token.to_url_safe()).unwrap();
    let bytes = vault
        .fetch(&Caller::anonymous(), &file.id, Some(&presented))
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"for everyone");

    let wrong = ShareToken::generate();
    assert!(matches!(
        vault.fetch(&Caller::anonymous(), &file.id, Some(&wrong)).await,
        Err(VaultError::AccessDenied)
    ));
    assert!(matches!(
        vault.fetch(&Caller::anonymous(), &file.id, None).await,
        Err(VaultError::AccessDenied)
    ));

    vault.revoke(&alice.identified(), &grant.id).await.unwrap();
    assert!(matches!(
        vault.fetch(&Caller::anonymous(), &file.id, Some(&presented)).await,
        Err(VaultError::AccessDenied)
    ));
}

#[tokio::test]
async fn public_view_link_does_not_release_bytes() {
    let fixture = TestFixture::new();
    let alice = fixture.register("alice").await;
    let vault = &fixture.vault;
    let file = vault.seal_upload(&alice.id, b"preview").await.unwrap();

    let (grant, token) = vault
        .create_public_link(&alice.caller(), &file.id, AccessLevel::View, None)
        .await
        .unwrap();

    let decision = vault
        .access(&Caller::anonymous(), &file.id, Some(&token))
        .await
        .unwrap();
    assert_eq!(
        decision,
        AccessDecision::PublicGrant {
            grant_id: grant.id,
            level: AccessLevel::View
        }
    );
    assert!(matches!(
        vault.fetch(&Caller::anonymous(), &file.id, Some(&token)).await,
        Err(VaultError::AccessDenied)
    ));
}

#[tokio::test]
async fn token_for_one_file_does_not_open_another() {
    let fixture = TestFixture::new();
    let alice = fixture.register("alice").await;
    let vault = &fixture.vault;
    let first = vault.seal_upload(&alice.id, b"first").await.unwrap();
    let second = vault.seal_upload(&alice.id, b"second").await.unwrap();

    let (_, token) = vault
        .create_public_link(&alice.caller(), &first.id, AccessLevel::Download, None)
        .await
        .unwrap();

    assert!(matches!(
        vault.fetch(&Caller::anonymous(), &second.id, Some(&token)).await,
        Err(VaultError::AccessDenied)
    ));
}

#[tokio::test]
async fn public_link_resolves_from_token_alone() {
    let fixture = TestFixture::new();
    let alice = fixture.register("alice").await;
    let vault = &fixture.vault;
    let file = vault.seal_upload(&alice.id, b"by token").await.unwrap();

    let expires_at = now_millis() + 60_000;
    let (view, view_token) = vault
        .create_public_link(&alice.caller(), &file.id, AccessLevel::View, Some(expires_at))
        .await
        .unwrap();

    let share = vault.public_share(&view_token).await.unwrap();
    assert_eq!(share.grant_id, view.id);
    assert_eq!(share.file_id, file.id);
    assert_eq!(share.access_level, AccessLevel::View);
    assert_eq!(share.expires_at, Some(expires_at));
    assert_eq!(share.plaintext_size, 8);
    assert!(share.is_encrypted);
    assert!(matches!(
        vault.fetch_shared(&view_token).await,
        Err(VaultError::AccessDenied)
    ));

    let (_, download_token) = vault
        .create_public_link(&alice.caller(), &file.id, AccessLevel::Download, None)
        .await
        .unwrap();
    let bytes = vault.fetch_shared(&download_token).await.unwrap();
    assert_eq!(&bytes[..], b"by token");

    let unknown = ShareToken::generate();
    assert!(matches!(
        vault.public_share(&unknown).await,
        Err(VaultError::AccessDenied)
    ));
    assert!(matches!(
        vault.fetch_shared(&unknown).await,
        Err(VaultError::AccessDenied)
    ));

    vault.revoke(&alice.identified(), &view.id).await.unwrap();
    assert!(matches!(
        vault.public_share(&view_token).await,
        Err(VaultError::AccessDenied)
    ));

    let anonymous_views = vault
        .file_activity(&alice.identified(), &file.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.action == ActivityAction::ShareAccess && r.principal_id.is_none())
        .count();
    assert_eq!(anonymous_views, 1);
}

#[tokio::test]
async fn expired_token_does_not_resolve() {
    let fixture = TestFixture::with_config(filevault::VaultConfig {
        require_future_expiry: false,
        ..test_config()
    });
    let alice = fixture.register("alice").await;
    let vault = &fixture.vault;
    let file = vault.seal_upload(&alice.id, b"gone").await.unwrap();

    let (grant, token) = vault
        .create_public_link(
            &alice.caller(),
            &file.id,
            AccessLevel::Download,
            Some(now_millis() - 1),
        )
        .await
        .unwrap();

    // Still stored, no longer honored.
    let stored = vault.store().find_grant_by_token(&token.hash()).await.unwrap();
    assert_eq!(stored.map(|g| g.id), Some(grant.id));
    assert!(matches!(
        vault.public_share(&token).await,
        Err(VaultError::AccessDenied)
    ));
    assert!(matches!(
        vault.fetch_shared(&token).await,
        Err(VaultError::AccessDenied)
    ));
}

#[tokio::test]
async fn owned_grants_span_files() {
    let fixture = TestFixture::new();
    let [alice, bob, carol] =
        <[_; 3]>::try_from(fixture.register_many(&["alice", "bob", "carol"]).await).unwrap();
    let vault = &fixture.vault;

    let sealed = vault.seal_upload(&alice.id, b"sealed").await.unwrap();
    let plain = vault.upload_plain(&alice.id, b"plain").await.unwrap();

    let first = vault
        .grant_access(&alice.caller(), &sealed.id, &bob.id, AccessLevel::Download, None)
        .await
        .unwrap();
    let (second, _) = vault
        .create_public_link(&alice.identified(), &plain.id, AccessLevel::View, None)
        .await
        .unwrap();
    let third = vault
        .grant_access(&alice.identified(), &plain.id, &carol.id, AccessLevel::Edit, None)
        .await
        .unwrap();

    let owned: Vec<_> = vault
        .owned_grants(&alice.identified())
        .await
        .unwrap()
        .into_iter()
        .map(|g| g.id)
        .collect();
    assert_eq!(owned, vec![first.id, second.id, third.id]);

    assert!(vault.owned_grants(&bob.identified()).await.unwrap().is_empty());
    assert!(matches!(
        vault.owned_grants(&Caller::anonymous()).await,
        Err(VaultError::AccessDenied)
    ));

    vault.revoke(&alice.identified(), &first.id).await.unwrap();
    assert_eq!(vault.owned_grants(&alice.identified()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn delete_file_removes_everything() {
    let fixture = TestFixture::new();
    let [alice, bob] = <[_; 2]>::try_from(fixture.register_many(&["alice", "bob"]).await).unwrap();
    let vault = &fixture.vault;
    let file = vault.seal_upload(&alice.id, b"gone soon").await.unwrap();
    let grant = vault
        .grant_access(&alice.caller(), &file.id, &bob.id, AccessLevel::Download, None)
        .await
        .unwrap();

    assert!(matches!(
        vault.delete_file(&bob.identified(), &file.id).await,
        Err(VaultError::AccessDenied)
    ));

    vault.delete_file(&alice.identified(), &file.id).await.unwrap();
    assert!(vault.blobs().is_empty());
    assert!(vault.store().get_grant(&grant.id).await.unwrap().is_none());
    assert!(vault.received_grants(&bob.identified()).await.unwrap().is_empty());
    assert!(matches!(
        vault.fetch(&alice.caller(), &file.id, None).await,
        Err(VaultError::AccessDenied)
    ));
}

#[tokio::test]
async fn registration_is_once_only() {
    let fixture = TestFixture::new();
    let alice = fixture.register("alice").await;

    let err = fixture
        .vault
        .register_principal(alice.id, &alice.passphrase)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::AlreadyRegistered(id) if id == alice.id));

    // A principal known without keys can register later.
    let dave = PrincipalId::new();
    fixture
        .vault
        .store()
        .insert_principal(&PrincipalRecord::without_keys(dave, now_millis()))
        .await
        .unwrap();
    fixture
        .vault
        .register_principal(dave, &filevault::Passphrase::new("dave"))
        .await
        .unwrap();
    let record = fixture.vault.store().get_principal(&dave).await.unwrap().unwrap();
    assert!(record.has_keys());
}

#[tokio::test]
async fn unregistered_owner_cannot_upload() {
    let fixture = TestFixture::new();
    let nobody = PrincipalId::new();
    let err = fixture.vault.seal_upload(&nobody, b"x").await.unwrap_err();
    assert!(matches!(err, VaultError::PrincipalNotFound(id) if id == nobody));
    assert!(fixture.vault.blobs().is_empty());
}

#[tokio::test]
async fn activity_is_recorded() {
    let fixture = TestFixture::new();
    let [alice, bob] = <[_; 2]>::try_from(fixture.register_many(&["alice", "bob"]).await).unwrap();
    let vault = &fixture.vault;
    let file = vault.seal_upload(&alice.id, b"audited").await.unwrap();
    let grant = vault
        .grant_access(&alice.caller(), &file.id, &bob.id, AccessLevel::Download, None)
        .await
        .unwrap();
    vault.fetch(&bob.caller(), &file.id, None).await.unwrap();
    vault.revoke(&alice.identified(), &grant.id).await.unwrap();

    let actions: Vec<_> = vault
        .file_activity(&alice.identified(), &file.id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            ActivityAction::Upload,
            ActivityAction::ShareCreate,
            ActivityAction::ShareDownload,
            ActivityAction::ShareDelete,
        ]
    );

    let quiet = TestFixture::with_config(filevault::VaultConfig {
        record_activity: false,
        ..test_config()
    });
    let carol = quiet.register("carol").await;
    let file = quiet.vault.seal_upload(&carol.id, b"quiet").await.unwrap();
    assert!(quiet
        .vault
        .file_activity(&carol.identified(), &file.id)
        .await
        .unwrap()
        .is_empty());
}
