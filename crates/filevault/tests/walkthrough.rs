//! End-to-end walkthrough with logging enabled.

use filevault::store::{ActivityAction, ActivityFilter, Store};
use filevault::{AccessLevel, Caller, GrantUpdate};
use filevault_testkit::TestFixture;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[tokio::test]
async fn owner_shares_rotates_and_cleans_up() -> anyhow::Result<()> {
    init_tracing();
    let fixture = TestFixture::new();
    let alice = fixture.register("alice").await;
    let bob = fixture.register("bob").await;
    let vault = &fixture.vault;

    let file = vault.seal_upload(&alice.id, b"meeting notes").await?;
    let grant = vault
        .grant_access(&alice.caller(), &file.id, &bob.id, AccessLevel::View, None)
        .await?;
    let (link, token) = vault
        .create_public_link(&alice.caller(), &file.id, AccessLevel::Download, None)
        .await?;

    assert!(vault.access(&bob.caller(), &file.id, None).await?.is_allowed());
    vault
        .update_grant(
            &alice.identified(),
            &grant.id,
            GrantUpdate::default().access_level(AccessLevel::Edit),
        )
        .await?;
    assert_eq!(&vault.fetch(&bob.caller(), &file.id, None).await?[..], b"meeting notes");
    assert_eq!(
        &vault.fetch(&Caller::anonymous(), &file.id, Some(&token)).await?[..],
        b"meeting notes"
    );

    vault.reseal(&alice.caller(), &file.id).await?;
    vault.revoke(&alice.identified(), &link.id).await?;
    vault.delete_file(&alice.identified(), &file.id).await?;

    let actions: Vec<_> = vault
        .store()
        .list_activity(&ActivityFilter {
            principal_id: None,
            file_id: Some(file.id),
        })
        .await?
        .into_iter()
        .map(|r| r.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            ActivityAction::Upload,
            ActivityAction::ShareCreate,
            ActivityAction::ShareCreate,
            ActivityAction::ShareAccess,
            ActivityAction::ShareUpdate,
            ActivityAction::ShareDownload,
            ActivityAction::ShareDownload,
            ActivityAction::Encrypt,
            ActivityAction::ShareDelete,
            ActivityAction::Delete,
        ]
    );

    Ok(())
}
