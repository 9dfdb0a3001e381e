use std::sync::Arc;

use capsule_core::{CapsuleStatus, FixedClock, Owner};
use capsule_store::{
    db, CapsuleStore, CreateCapsule, NewCapsule, NewOwner, SqliteCapsuleStore, StoreError,
    UpdateCapsule,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;

fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

/// 2026-03-10 12:00 UTC.
fn now() -> DateTime<Utc> {
    ts(2026, 3, 10, 12, 0)
}

fn store_at(tz: Tz, at: DateTime<Utc>) -> SqliteCapsuleStore {
    let conn = db::open_in_memory().unwrap();
    SqliteCapsuleStore::new(conn, tz, Arc::new(FixedClock(at)))
}

async fn owner(store: &SqliteCapsuleStore) -> Owner {
    store
        .create_owner(NewOwner {
            name: "Ada".into(),
            email: "ada@example.com".into(),
            timezone: String::new(),
        })
        .await
        .unwrap()
}

fn fixture(owner_id: i64, title: &str, due_at: DateTime<Utc>, created_at: DateTime<Utc>) -> NewCapsule {
    NewCapsule {
        owner_id,
        title: title.into(),
        message: format!("{title} body"),
        due_at,
        delivery_method: "email".into(),
        category: None,
        mood: None,
        image_url: None,
        created_at,
    }
}

fn create_input(due_date: &str) -> CreateCapsule {
    CreateCapsule {
        title: "Hello future".into(),
        message: "Remember this".into(),
        due_date: due_date.into(),
        delivery_method: "email".into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn due_today_is_pending_only_and_oldest_created_first() {
    let store = store_at(Tz::UTC, now());
    let owner = owner(&store).await;

    // Inserted out of creation order on purpose.
    let b = store
        .insert_capsule(fixture(owner.id, "B", ts(2026, 3, 10, 15, 0), ts(2026, 1, 1, 10, 0)))
        .await
        .unwrap();
    let a = store
        .insert_capsule(fixture(owner.id, "A", ts(2026, 3, 10, 0, 0), ts(2026, 1, 1, 9, 0)))
        .await
        .unwrap();
    store
        .insert_capsule(fixture(owner.id, "tomorrow", ts(2026, 3, 11, 0, 0), ts(2026, 1, 1, 8, 0)))
        .await
        .unwrap();
    store
        .insert_capsule(fixture(
            owner.id,
            "yesterday",
            ts(2026, 3, 9, 23, 59),
            ts(2026, 1, 1, 8, 0),
        ))
        .await
        .unwrap();

    let due = store.find_due_today().await.unwrap();
    let ids: Vec<_> = due.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![a.id, b.id]);
    assert!(due.iter().all(|c| c.is_pending()));
}

#[tokio::test]
async fn sent_and_canceled_capsules_are_never_due() {
    let store = store_at(Tz::UTC, now());
    let owner = owner(&store).await;
    let sent = store
        .insert_capsule(fixture(owner.id, "sent", ts(2026, 3, 10, 6, 0), ts(2026, 1, 1, 9, 0)))
        .await
        .unwrap();
    let canceled = store
        .insert_capsule(fixture(owner.id, "gone", ts(2026, 3, 10, 7, 0), ts(2026, 1, 1, 9, 0)))
        .await
        .unwrap();

    store.mark_sent(sent.id).await.unwrap();
    store.cancel_capsule(canceled.id, owner.id).await.unwrap();

    assert!(store.find_due_today().await.unwrap().is_empty());

    let sent = store.get_capsule(sent.id, owner.id).await.unwrap();
    assert_eq!(sent.status, CapsuleStatus::Sent { at: now() });
    assert_eq!(sent.sent_at(), Some(now()));
    let canceled = store.get_capsule(canceled.id, owner.id).await.unwrap();
    assert_eq!(canceled.status, CapsuleStatus::Canceled);
    assert_eq!(canceled.sent_at(), None);
}

#[tokio::test]
async fn mark_sent_requires_pending() {
    let store = store_at(Tz::UTC, now());
    let owner = owner(&store).await;
    let capsule = store
        .insert_capsule(fixture(owner.id, "once", ts(2026, 3, 10, 6, 0), ts(2026, 1, 1, 9, 0)))
        .await
        .unwrap();

    store.mark_sent(capsule.id).await.unwrap();
    let err = store.mark_sent(capsule.id).await.unwrap_err();
    assert!(err.is_not_found(), "got {err:?}");

    let after = store.get_capsule(capsule.id, owner.id).await.unwrap();
    assert_eq!(after.sent_at(), Some(now()));
}

#[tokio::test]
async fn mark_sent_unknown_id_is_not_found() {
    let store = store_at(Tz::UTC, now());
    assert!(store.mark_sent(999).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn missing_owner_is_not_found() {
    let store = store_at(Tz::UTC, now());
    match store.get_owner(42).await {
        Err(StoreError::NotFound { entity, id }) => {
            assert_eq!(entity, "owner");
            assert_eq!(id, 42);
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn due_today_window_follows_store_timezone() {
    // 20:00 UTC on the 10th is 03:00 on the 11th in Jakarta.
    let store = store_at(chrono_tz::Asia::Jakarta, ts(2026, 3, 10, 20, 0));
    let owner = owner(&store).await;
    let inside = store
        .insert_capsule(fixture(owner.id, "inside", ts(2026, 3, 10, 18, 0), ts(2026, 1, 1, 9, 0)))
        .await
        .unwrap();
    store
        .insert_capsule(fixture(owner.id, "before", ts(2026, 3, 10, 16, 0), ts(2026, 1, 1, 9, 0)))
        .await
        .unwrap();

    let due = store.find_due_today().await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, inside.id);
}

#[tokio::test]
async fn create_rejects_malformed_and_past_dates() {
    let store = store_at(Tz::UTC, now());
    let owner = owner(&store).await;

    match store.create_capsule(owner.id, create_input("10/03/2026")).await {
        Err(StoreError::Validation(msg)) => {
            assert_eq!(msg, "invalid due date format, use YYYY-MM-DD")
        }
        other => panic!("expected Validation, got {other:?}"),
    }
    match store.create_capsule(owner.id, create_input("2026-03-09")).await {
        Err(StoreError::Validation(msg)) => assert_eq!(msg, "due date must be in the future"),
        other => panic!("expected Validation, got {other:?}"),
    }
}

#[tokio::test]
async fn create_same_day_is_pushed_ten_minutes_ahead() {
    let store = store_at(Tz::UTC, now());
    let owner = owner(&store).await;

    let today = store
        .create_capsule(owner.id, create_input("2026-03-10"))
        .await
        .unwrap();
    assert_eq!(today.due_at, now() + Duration::minutes(10));
    assert!(today.is_pending());

    let later = store
        .create_capsule(owner.id, create_input("2026-04-01"))
        .await
        .unwrap();
    assert_eq!(later.due_at, ts(2026, 4, 1, 0, 0));
    assert_eq!(later.created_at, now());
}

#[tokio::test]
async fn create_requires_fields_and_an_existing_owner() {
    let store = store_at(Tz::UTC, now());
    let owner = owner(&store).await;

    let mut blank = create_input("2026-04-01");
    blank.title = "  ".into();
    assert!(matches!(
        store.create_capsule(owner.id, blank).await,
        Err(StoreError::Validation(_))
    ));

    let err = store
        .create_capsule(owner.id + 1, create_input("2026-04-01"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn empty_optional_fields_are_stored_as_absent() {
    let store = store_at(Tz::UTC, now());
    let owner = owner(&store).await;
    let mut input = create_input("2026-04-01");
    input.category = Some(String::new());
    input.mood = Some("hopeful".into());

    let capsule = store.create_capsule(owner.id, input).await.unwrap();
    assert_eq!(capsule.category, None);
    assert_eq!(capsule.mood.as_deref(), Some("hopeful"));
    assert_eq!(capsule.image_url, None);
}

#[tokio::test]
async fn update_keeps_absent_fields() {
    let store = store_at(Tz::UTC, now());
    let owner = owner(&store).await;
    let capsule = store
        .create_capsule(owner.id, create_input("2026-04-01"))
        .await
        .unwrap();

    let updated = store
        .update_capsule(
            capsule.id,
            owner.id,
            UpdateCapsule {
                title: Some("Renamed".into()),
                message: Some(String::new()),
                due_date: Some("2026-05-01".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.title, "Renamed");
    assert_eq!(updated.message, capsule.message);
    assert_eq!(updated.due_at, ts(2026, 5, 1, 0, 0));
    assert_eq!(updated.delivery_method, "email");
}

#[tokio::test]
async fn terminal_capsules_cannot_be_edited_or_canceled() {
    let store = store_at(Tz::UTC, now());
    let owner = owner(&store).await;
    let capsule = store
        .insert_capsule(fixture(owner.id, "done", ts(2026, 3, 10, 6, 0), ts(2026, 1, 1, 9, 0)))
        .await
        .unwrap();
    store.mark_sent(capsule.id).await.unwrap();

    let err = store
        .update_capsule(capsule.id, owner.id, UpdateCapsule::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidState { ref status, .. } if status == "sent"));

    let err = store.cancel_capsule(capsule.id, owner.id).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidState { .. }));
}

#[tokio::test]
async fn capsules_are_scoped_to_their_owner() {
    let store = store_at(Tz::UTC, now());
    let ada = owner(&store).await;
    let bob = store
        .create_owner(NewOwner {
            name: "Bob".into(),
            email: "bob@example.com".into(),
            timezone: "Europe/Berlin".into(),
        })
        .await
        .unwrap();
    assert_eq!(ada.timezone, "UTC");
    assert_eq!(bob.timezone, "Europe/Berlin");

    let capsule = store
        .create_capsule(ada.id, create_input("2026-04-01"))
        .await
        .unwrap();
    assert!(store
        .get_capsule(capsule.id, bob.id)
        .await
        .unwrap_err()
        .is_not_found());
    assert!(store
        .cancel_capsule(capsule.id, bob.id)
        .await
        .unwrap_err()
        .is_not_found());
    assert!(store.list_capsules(bob.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn list_includes_every_status_by_due_date() {
    let store = store_at(Tz::UTC, now());
    let owner = owner(&store).await;
    let late = store
        .create_capsule(owner.id, create_input("2026-06-01"))
        .await
        .unwrap();
    let early = store
        .create_capsule(owner.id, create_input("2026-04-01"))
        .await
        .unwrap();
    store.cancel_capsule(late.id, owner.id).await.unwrap();

    let listed = store.list_capsules(owner.id).await.unwrap();
    let ids: Vec<_> = listed.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![early.id, late.id]);
    assert_eq!(listed[1].status, CapsuleStatus::Canceled);
}

#[tokio::test]
async fn owner_requires_name_and_email() {
    let store = store_at(Tz::UTC, now());
    let err = store
        .create_owner(NewOwner {
            name: "Ada".into(),
            email: "not-an-address".into(),
            timezone: String::new(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}
