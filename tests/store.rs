// Data store behavior: authorization, idempotent joins, cascades, webhooks

use tempfile::TempDir;

use skillvesta::core::{current_time_millis, Address, TxHash};
use skillvesta::error::AppError;
use skillvesta::store::database::DataStore;
use skillvesta::store::models::{
    BillingCadence, GroupSettingsUpdate, RawAdministrator, Visibility,
};

fn addr(n: u8) -> Address {
    Address::parse(&format!("0x{:040x}", n)).unwrap()
}

async fn test_store() -> (TempDir, DataStore) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
    let store = DataStore::new(&url, 64).await.unwrap();
    store.init().await.unwrap();
    (dir, store)
}

#[tokio::test]
async fn test_create_group_defaults() {
    let (_dir, store) = test_store().await;
    let owner = addr(1);

    let group = store
        .create_group(&owner, "Indie Hackers", Some("Ship together"))
        .await
        .unwrap();

    assert_eq!(group.price, 0.0);
    assert_eq!(group.member_count, 1);
    assert_eq!(group.billing_cadence, BillingCadence::Free);
    // Platform subscription window opens for roughly 30 days.
    let ends_on = group.ends_on.unwrap();
    let now = current_time_millis();
    assert!(ends_on > now + 29 * 86_400_000 && ends_on < now + 31 * 86_400_000);

    // The owner is already a member.
    let members = store.get_members(group.id).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].wallet_address, owner);
}

#[tokio::test]
async fn test_name_and_description_limits() {
    let (_dir, store) = test_store().await;
    let owner = addr(1);
    let group = store.create_group(&owner, "Club", None).await.unwrap();

    let long_name = "x".repeat(61);
    assert!(store
        .update_group_name(group.id, &owner, &long_name)
        .await
        .is_err());

    let long_description = "y".repeat(40_001);
    assert!(store
        .update_group_description(group.id, &owner, &long_description)
        .await
        .is_err());

    store
        .update_group_name(group.id, &owner, "Renamed Club")
        .await
        .unwrap();
    let group = store.require_group(group.id).await.unwrap();
    assert_eq!(group.name, "Renamed Club");
}

#[tokio::test]
async fn test_non_owner_mutations_rejected() {
    let (_dir, store) = test_store().await;
    let owner = addr(1);
    let intruder = addr(2);
    let group = store.create_group(&owner, "Club", None).await.unwrap();
    store.ensure_user(&intruder).await.unwrap();

    let err = store
        .update_group_name(group.id, &intruder, "Hostile Takeover")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let err = store.delete_group(group.id, &intruder).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let err = store
        .create_course(group.id, &intruder, "Course", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[tokio::test]
async fn test_join_is_idempotent() {
    let (_dir, store) = test_store().await;
    let owner = addr(1);
    let member = addr(2);
    let group = store.create_group(&owner, "Club", None).await.unwrap();

    store
        .join_group(group.id, &member, None, false, None)
        .await
        .unwrap();
    let expiry = current_time_millis() + 86_400_000;
    store
        .join_group(
            group.id,
            &member,
            Some(&TxHash("0xbeef".to_string())),
            true,
            Some(expiry),
        )
        .await
        .unwrap();

    // Rejoining refreshed the record instead of duplicating it.
    let group = store.require_group(group.id).await.unwrap();
    assert_eq!(group.member_count, 2);

    let membership = store
        .get_membership(group.id, &member)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(membership.has_active_pass, Some(true));
    assert_eq!(membership.join_tx_hash.as_deref(), Some("0xbeef"));
    assert_eq!(membership.pass_expires_at, Some(expiry));
}

#[tokio::test]
async fn test_owner_cannot_leave() {
    let (_dir, store) = test_store().await;
    let owner = addr(1);
    let group = store.create_group(&owner, "Club", None).await.unwrap();

    let err = store.leave_group(group.id, &owner, None).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_leave_keeps_pass_cache() {
    let (_dir, store) = test_store().await;
    let owner = addr(1);
    let member = addr(2);
    let group = store.create_group(&owner, "Club", None).await.unwrap();

    let expiry = current_time_millis() + 86_400_000;
    store
        .join_group(group.id, &member, None, true, Some(expiry))
        .await
        .unwrap();
    store
        .leave_group(group.id, &member, Some(expiry))
        .await
        .unwrap();

    assert!(store
        .get_membership(group.id, &member)
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        store.get_cached_pass_expiry(group.id, &member).await.unwrap(),
        Some(expiry)
    );

    let group = store.require_group(group.id).await.unwrap();
    assert_eq!(group.member_count, 1);
}

#[tokio::test]
async fn test_settings_update_reconciles_and_stores_admins() {
    let (_dir, store) = test_store().await;
    let owner = addr(1);
    let group = store.create_group(&owner, "Club", None).await.unwrap();

    let update = GroupSettingsUpdate {
        visibility: Visibility::Public,
        billing_cadence: BillingCadence::Monthly,
        price: 49.0,
        tags: vec![" DeFi ".to_string(), "defi".to_string(), "trading".to_string()],
        administrators: vec![RawAdministrator {
            wallet_address: addr(3).to_string(),
            share_bps: 2_500,
        }],
        ..Default::default()
    };

    let (group, collaborators) = store
        .update_group_settings(group.id, &owner, &update)
        .await
        .unwrap();

    // Paid cadence overrides the requested public visibility.
    assert_eq!(group.visibility, Visibility::Private);
    assert_eq!(group.tags, vec!["defi".to_string(), "trading".to_string()]);
    assert_eq!(collaborators.len(), 1);

    let admins = store.administrators(group.id).await.unwrap();
    assert_eq!(admins.len(), 1);
    assert_eq!(admins[0].wallet_address, addr(3));
    assert_eq!(admins[0].share_bps, 2_500);
}

#[tokio::test]
async fn test_subscription_webhook_normalizes_seconds() {
    let (_dir, store) = test_store().await;
    let owner = addr(1);
    let group = store.create_group(&owner, "Club", None).await.unwrap();

    // Billing providers send second-based epochs.
    let ends_secs = current_time_millis() / 1000 + 86_400;
    store
        .update_subscription(group.id, "sub_123", ends_secs)
        .await
        .unwrap();

    let group = store.require_group(group.id).await.unwrap();
    assert_eq!(group.subscription_id.as_deref(), Some("sub_123"));
    assert_eq!(group.ends_on, Some(ends_secs * 1000));

    let later = (current_time_millis() / 1000 + 2 * 86_400) * 1000;
    store
        .update_subscription_by_id("sub_123", later)
        .await
        .unwrap();
    let group = store.require_group(group.id).await.unwrap();
    assert_eq!(group.ends_on, Some(later));

    assert!(store
        .update_subscription_by_id("sub_missing", later)
        .await
        .is_err());
}

#[tokio::test]
async fn test_subscription_webhook_rejects_out_of_range_epochs() {
    let (_dir, store) = test_store().await;
    let owner = addr(1);
    let group = store.create_group(&owner, "Club", None).await.unwrap();

    for bad in [0, -1, i64::MIN] {
        let err = store
            .update_subscription(group.id, "sub_123", bad)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)), "ends_on = {}", bad);
    }

    // An extreme but positive epoch is stored without wrapping.
    store
        .update_subscription(group.id, "sub_123", i64::MAX)
        .await
        .unwrap();
    let group = store.require_group(group.id).await.unwrap();
    assert_eq!(group.ends_on, Some(i64::MAX));
}

#[tokio::test]
async fn test_classroom_hierarchy_and_cascade() {
    let (_dir, store) = test_store().await;
    let owner = addr(1);
    let group = store.create_group(&owner, "Club", None).await.unwrap();

    let course = store
        .create_course(group.id, &owner, "Rust 101", None, None)
        .await
        .unwrap();
    let module_a = store
        .create_module(course.id, &owner, "Basics")
        .await
        .unwrap();
    let module_b = store
        .create_module(course.id, &owner, "Ownership")
        .await
        .unwrap();
    assert_eq!(module_a.position, 0);
    assert_eq!(module_b.position, 1);

    store
        .create_lesson(module_a.id, &owner, "Hello", None, None)
        .await
        .unwrap();
    store
        .create_lesson(module_a.id, &owner, "Types", None, None)
        .await
        .unwrap();

    let lessons = store.list_lessons(module_a.id).await.unwrap();
    assert_eq!(lessons.len(), 2);
    assert_eq!(lessons[1].position, 1);

    store.delete_course(course.id, &owner).await.unwrap();
    assert!(store.list_modules(course.id).await.unwrap().is_empty());
    assert!(store.list_lessons(module_a.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_feed_membership_and_delete_rules() {
    let (_dir, store) = test_store().await;
    let owner = addr(1);
    let member = addr(2);
    let outsider = addr(3);
    let group = store.create_group(&owner, "Club", None).await.unwrap();
    store
        .join_group(group.id, &member, None, false, None)
        .await
        .unwrap();
    store.ensure_user(&outsider).await.unwrap();

    let err = store
        .create_post(group.id, &outsider, "let me in")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let post = store
        .create_post(group.id, &member, "gm everyone")
        .await
        .unwrap();
    store
        .create_comment(post.id, &owner, "welcome")
        .await
        .unwrap();

    // A different member cannot delete someone else's post.
    let other_member = addr(4);
    store
        .join_group(group.id, &other_member, None, false, None)
        .await
        .unwrap();
    let err = store.delete_post(post.id, &other_member).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    // The group owner can, and comments go with it.
    store.delete_post(post.id, &owner).await.unwrap();
    assert!(store.list_posts(group.id).await.unwrap().is_empty());
    assert!(store.list_comments(post.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_group_cascades() {
    let (_dir, store) = test_store().await;
    let owner = addr(1);
    let member = addr(2);
    let group = store.create_group(&owner, "Club", None).await.unwrap();
    store
        .join_group(group.id, &member, None, false, None)
        .await
        .unwrap();

    let course = store
        .create_course(group.id, &owner, "Rust 101", None, None)
        .await
        .unwrap();
    let module = store
        .create_module(course.id, &owner, "Basics")
        .await
        .unwrap();
    store
        .create_lesson(module.id, &owner, "Hello", None, None)
        .await
        .unwrap();
    let post = store
        .create_post(group.id, &owner, "first post")
        .await
        .unwrap();

    store.delete_group(group.id, &owner).await.unwrap();

    assert!(store.get_group(group.id).await.unwrap().is_none());
    assert!(store.list_courses(group.id).await.unwrap().is_empty());
    assert!(store.list_posts(group.id).await.unwrap().is_empty());
    assert!(store.list_comments(post.id).await.unwrap().is_empty());
    assert!(store
        .get_membership(group.id, &member)
        .await
        .unwrap()
        .is_none());
    assert!(store.list_groups_for_member(&member).await.unwrap().is_empty());
}
