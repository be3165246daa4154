//! Store behaviour: idempotent delivery, quota windows, history and
//! filter round-trips against an in-memory database.

mod common;

use common::{filter, memory_db, seed_user, tender};
use tender_sniper::model::{NotificationSource, PurchaseStage, TenderKind, Tier};

#[tokio::test]
async fn filter_round_trips_through_storage() {
    let db = memory_db().await;
    let user_id = seed_user(&db, 100, Tier::Basic).await;

    let mut f = filter(&["компьютер", "ноутбук"]);
    f.user_id = user_id;
    f.exclude_keywords = vec!["б/у".into()];
    f.price_min = Some(100_000.0);
    f.price_max = Some(5_000_000.0);
    f.regions = vec!["Москва".into()];
    f.tender_kinds = vec![TenderKind::Goods];
    f.purchase_stage = PurchaseStage::Archive;
    f.okpd2_codes = vec!["26.20".into()];
    f.min_deadline_days = Some(3);
    f.publication_days = Some(14);

    let filter_id = db.create_filter(&f).await.unwrap();
    let loaded = db.get_filter(filter_id).await.unwrap().expect("filter exists");

    assert_eq!(loaded.keywords, vec!["компьютер", "ноутбук"]);
    assert_eq!(loaded.exclude_keywords, vec!["б/у"]);
    assert_eq!(loaded.price_min, Some(100_000.0));
    assert_eq!(loaded.regions, vec!["Москва"]);
    assert_eq!(loaded.tender_kinds, vec![TenderKind::Goods]);
    assert_eq!(loaded.purchase_stage, PurchaseStage::Archive);
    assert_eq!(loaded.min_deadline_days, Some(3));
    assert_eq!(loaded.publication_days, Some(14));
    assert!(loaded.is_active);
}

#[tokio::test]
async fn deactivated_filters_leave_the_work_list() {
    let db = memory_db().await;
    let user_id = seed_user(&db, 101, Tier::Basic).await;
    let mut f = filter(&["сервер"]);
    f.user_id = user_id;
    let filter_id = db.create_filter(&f).await.unwrap();

    assert_eq!(db.get_all_active_filters().await.unwrap().len(), 1);
    db.deactivate_filter(filter_id).await.unwrap();
    assert!(db.get_all_active_filters().await.unwrap().is_empty());
    // Soft-deactivation: the row survives.
    assert!(db.get_filter(filter_id).await.unwrap().is_some());
}

#[tokio::test]
async fn duplicate_delivery_is_a_silent_noop() {
    let db = memory_db().await;
    let user_id = seed_user(&db, 102, Tier::Basic).await;
    let t = tender("0100", "Поставка компьютеров");

    let first = db
        .record_delivered(
            user_id,
            1,
            "IT",
            &t,
            72,
            &["компьютер".into()],
            NotificationSource::Automonitoring,
            Some(555),
        )
        .await
        .unwrap();
    assert!(first.is_some());

    let second = db
        .record_delivered(
            user_id,
            1,
            "IT",
            &t,
            72,
            &["компьютер".into()],
            NotificationSource::Automonitoring,
            Some(556),
        )
        .await
        .unwrap();
    assert!(second.is_none(), "duplicate insert must be ignored");

    // Exactly one row and exactly one counter increment.
    let listed = db.list_user_tenders(user_id, 10).await.unwrap();
    assert_eq!(listed.len(), 1);
    let user = db.get_user(user_id).await.unwrap().unwrap();
    assert_eq!(user.notifications_sent_today, 1);
}

#[tokio::test]
async fn concurrent_deliveries_produce_one_row() {
    let db = memory_db().await;
    let user_id = seed_user(&db, 103, Tier::Basic).await;
    let t = tender("0200", "Поставка серверов");

    let (a, b) = tokio::join!(
        db.record_delivered(
            user_id,
            1,
            "IT",
            &t,
            80,
            &[],
            NotificationSource::Automonitoring,
            None,
        ),
        db.record_delivered(
            user_id,
            1,
            "IT",
            &t,
            80,
            &[],
            NotificationSource::Automonitoring,
            None,
        ),
    );

    let inserted = [a.unwrap(), b.unwrap()]
        .iter()
        .filter(|r| r.is_some())
        .count();
    assert_eq!(inserted, 1, "exactly one of two concurrent inserts wins");
    assert_eq!(db.list_user_tenders(user_id, 10).await.unwrap().len(), 1);
    let user = db.get_user(user_id).await.unwrap().unwrap();
    assert_eq!(user.notifications_sent_today, 1);
}

#[tokio::test]
async fn quota_window_enforces_daily_cap() {
    let db = memory_db().await;
    let user_id = seed_user(&db, 104, Tier::Trial).await;

    // First check opens the window.
    assert!(db.has_quota(user_id, 2).await.unwrap());

    for i in 0..2 {
        db.record_delivered(
            user_id,
            1,
            "IT",
            &tender(&format!("03{:02}", i), "Поставка ПК"),
            70,
            &[],
            NotificationSource::Automonitoring,
            None,
        )
        .await
        .unwrap();
    }

    assert!(
        !db.has_quota(user_id, 2).await.unwrap(),
        "third delivery within the window must be blocked"
    );
    // A larger cap still has headroom.
    assert!(db.has_quota(user_id, 3).await.unwrap());
}

#[tokio::test]
async fn clear_history_reports_removed_rows() {
    let db = memory_db().await;
    let user_id = seed_user(&db, 105, Tier::Basic).await;

    for i in 0..3 {
        db.record_delivered(
            user_id,
            1,
            "IT",
            &tender(&format!("04{:02}", i), "Поставка ПК"),
            70,
            &[],
            NotificationSource::InstantSearch,
            None,
        )
        .await
        .unwrap();
    }

    assert_eq!(db.clear_history(user_id, None).await.unwrap(), 3);
    assert!(db.list_user_tenders(user_id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn notifications_list_most_recent_first() {
    let db = memory_db().await;
    let user_id = seed_user(&db, 106, Tier::Basic).await;

    for i in 0..3 {
        db.record_delivered(
            user_id,
            1,
            "IT",
            &tender(&format!("05{:02}", i), &format!("Тендер {}", i)),
            70,
            &[],
            NotificationSource::Automonitoring,
            None,
        )
        .await
        .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let listed = db.list_user_tenders(user_id, 2).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].tender_number, "0502");
    assert_eq!(listed[1].tender_number, "0501");
}

#[tokio::test]
async fn tender_cache_hits_only_on_identical_content() {
    let db = memory_db().await;
    let t = tender("0600", "Поставка компьютеров");
    let hash = t.content_hash();

    assert!(!db.is_tender_processed(&t.number, &hash).await.unwrap());
    db.mark_tender_processed(&t.number, &hash).await.unwrap();
    assert!(db.is_tender_processed(&t.number, &hash).await.unwrap());

    // Changed content means a different hash and a cache miss.
    let mut changed = t.clone();
    changed.price = Some(1.0);
    assert!(!db
        .is_tender_processed(&changed.number, &changed.content_hash())
        .await
        .unwrap());
}

#[tokio::test]
async fn user_upsert_updates_tier_in_place() {
    let db = memory_db().await;
    let first = db.upsert_user(200, Some("u"), Tier::Trial).await.unwrap();
    let second = db.upsert_user(200, Some("u"), Tier::Premium).await.unwrap();
    assert_eq!(first, second);

    let user = db.get_user_by_external_id(200).await.unwrap().unwrap();
    assert_eq!(user.tier, Tier::Premium);
    assert!(user.monitoring_enabled);
}
