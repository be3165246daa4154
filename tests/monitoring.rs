//! End-to-end monitoring cycles over fake collaborators and an
//! in-memory store.

mod common;

use chrono::{Duration, Utc};
use std::sync::Arc;

use common::{filter, matcher, memory_db, seed_user, tender, FakeChat, FakePortal};
use tender_sniper::ai::relevance::RelevanceChecker;
use tender_sniper::dictionaries::Dictionaries;
use tender_sniper::error::SendOutcome;
use tender_sniper::model::{NotificationSource, PurchaseStage, Tender, Tier};
use tender_sniper::monitor::{MonitorConfig, MonitoringLoop};
use tender_sniper::notify::Notifier;
use tender_sniper::search::InstantSearch;
use tender_sniper::store::Db;

fn monitoring(db: &Db, portal: Arc<FakePortal>, chat: Arc<FakeChat>) -> MonitoringLoop {
    let search = Arc::new(InstantSearch::new(
        portal,
        matcher(),
        Arc::new(RelevanceChecker::new(None)),
        Arc::new(Dictionaries::embedded()),
    ));
    MonitoringLoop::new(
        db.clone(),
        search,
        Arc::new(Notifier::new(chat)),
        None,
        MonitorConfig {
            poll_interval: std::time::Duration::from_secs(300),
            worker_pool: 4,
            spreadsheet_id: None,
        },
    )
}

fn strong_tender(number: &str) -> Tender {
    let mut t = tender(number, "Поставка компьютеров");
    t.price = Some(2_500_000.0);
    t.customer_region = Some("Москва".into());
    t
}

async fn seed_filter(db: &Db, user_id: i64) -> i64 {
    let mut f = filter(&["компьютер"]);
    f.user_id = user_id;
    f.regions = vec!["Москва".into()];
    f.price_min = Some(100_000.0);
    f.price_max = Some(5_000_000.0);
    db.create_filter(&f).await.unwrap()
}

#[tokio::test]
async fn matching_tender_is_delivered_once() {
    let db = memory_db().await;
    let user_id = seed_user(&db, 1001, Tier::Basic).await;
    seed_filter(&db, user_id).await;

    let portal = FakePortal::with_tenders(vec![strong_tender("1")]);
    let chat = FakeChat::ok();
    let monitor = monitoring(&db, portal, Arc::clone(&chat));

    monitor.poll_cycle().await;

    let messages = chat.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, 1001);
    assert!(messages[0].1.contains("Новый тендер"));

    assert!(db.is_already_notified(user_id, "1").await.unwrap());
    let user = db.get_user(user_id).await.unwrap().unwrap();
    assert_eq!(user.notifications_sent_today, 1);

    // The same tender in the next cycle is a no-op.
    monitor.poll_cycle().await;
    assert_eq!(chat.messages().len(), 1);
    let user = db.get_user(user_id).await.unwrap().unwrap();
    assert_eq!(user.notifications_sent_today, 1);
}

#[tokio::test]
async fn low_scores_are_not_delivered() {
    let db = memory_db().await;
    let user_id = seed_user(&db, 1002, Tier::Basic).await;
    let mut f = filter(&["компьютер", "сервер", "ноутбук", "коммутатор"]);
    f.user_id = user_id;
    db.create_filter(&f).await.unwrap();

    // One keyword of four, no price band: lands well under 60.
    let portal = FakePortal::with_tenders(vec![tender("2", "Поставка компьютеров")]);
    let chat = FakeChat::ok();
    let monitor = monitoring(&db, portal, Arc::clone(&chat));

    monitor.poll_cycle().await;
    assert!(chat.messages().is_empty());
    assert!(!db.is_already_notified(user_id, "2").await.unwrap());
}

#[tokio::test]
async fn quota_exhaustion_sends_one_notice_and_no_rows() {
    let db = memory_db().await;
    let user_id = seed_user(&db, 1003, Tier::Trial).await;
    seed_filter(&db, user_id).await;

    // Open the window, then burn the whole trial allowance.
    assert!(db
        .has_quota(user_id, Tier::Trial.daily_notifications_limit())
        .await
        .unwrap());
    for i in 0..Tier::Trial.daily_notifications_limit() {
        db.record_delivered(
            user_id,
            1,
            "IT",
            &tender(&format!("old{}", i), "Старый тендер"),
            70,
            &[],
            NotificationSource::Automonitoring,
            None,
        )
        .await
        .unwrap();
    }

    let portal = FakePortal::with_tenders(vec![strong_tender("900")]);
    let chat = FakeChat::ok();
    let monitor = monitoring(&db, portal, Arc::clone(&chat));

    monitor.poll_cycle().await;

    let messages = chat.messages();
    assert_eq!(messages.len(), 1, "exactly one quota notice");
    assert!(messages[0].1.contains("лимит"));
    assert!(!db.is_already_notified(user_id, "900").await.unwrap());

    // A second cycle in the same window stays silent.
    monitor.poll_cycle().await;
    assert_eq!(chat.messages().len(), 1);
}

#[tokio::test]
async fn blocked_user_gets_monitoring_disabled() {
    let db = memory_db().await;
    let user_id = seed_user(&db, 1004, Tier::Basic).await;
    seed_filter(&db, user_id).await;

    let portal = FakePortal::with_tenders(vec![strong_tender("3")]);
    let chat = FakeChat::ok();
    chat.script(vec![SendOutcome::UserBlocked]);
    let monitor = monitoring(&db, portal, Arc::clone(&chat));

    monitor.poll_cycle().await;

    let user = db.get_user(user_id).await.unwrap().unwrap();
    assert!(!user.monitoring_enabled);
    assert!(!db.is_already_notified(user_id, "3").await.unwrap());

    // Next cycle skips the user entirely.
    monitor.poll_cycle().await;
    assert!(chat.messages().is_empty());
}

#[tokio::test]
async fn archive_filter_delivers_expired_tenders() {
    let db = memory_db().await;
    let user_id = seed_user(&db, 1005, Tier::Basic).await;
    let mut f = filter(&["компьютер"]);
    f.user_id = user_id;
    f.purchase_stage = PurchaseStage::Archive;
    f.price_min = Some(100_000.0);
    f.price_max = Some(5_000_000.0);
    db.create_filter(&f).await.unwrap();

    let mut expired = strong_tender("4");
    expired.submission_deadline = Some((Utc::now() - Duration::days(3)).naive_utc());
    let portal = FakePortal::with_tenders(vec![expired]);
    let chat = FakeChat::ok();
    let monitor = monitoring(&db, portal, Arc::clone(&chat));

    monitor.poll_cycle().await;

    assert_eq!(chat.messages().len(), 1);
    assert!(db.is_already_notified(user_id, "4").await.unwrap());
}

#[tokio::test]
async fn any_stage_filter_delivers_expired_tenders_too() {
    let db = memory_db().await;
    let user_id = seed_user(&db, 1008, Tier::Basic).await;
    let mut f = filter(&["компьютер"]);
    f.user_id = user_id;
    f.purchase_stage = PurchaseStage::Any;
    f.price_min = Some(100_000.0);
    f.price_max = Some(5_000_000.0);
    db.create_filter(&f).await.unwrap();

    // One closed and one live notice; `any` spans both.
    let mut expired = strong_tender("6");
    expired.submission_deadline = Some((Utc::now() - Duration::days(3)).naive_utc());
    let live = strong_tender("7");
    let portal = FakePortal::with_tenders(vec![expired, live]);
    let chat = FakeChat::ok();
    let monitor = monitoring(&db, portal, Arc::clone(&chat));

    monitor.poll_cycle().await;

    assert_eq!(chat.messages().len(), 2);
    assert!(db.is_already_notified(user_id, "6").await.unwrap());
    assert!(db.is_already_notified(user_id, "7").await.unwrap());
}

#[tokio::test]
async fn repeated_transient_failures_pause_user_for_cycle() {
    let db = memory_db().await;
    let user_id = seed_user(&db, 1006, Tier::Basic).await;
    seed_filter(&db, user_id).await;

    let portal = FakePortal::with_tenders(vec![
        strong_tender("10"),
        strong_tender("11"),
        strong_tender("12"),
        strong_tender("13"),
    ]);
    let chat = FakeChat::ok();
    // Three tenders' worth of exhausted retries (3 attempts each).
    chat.script(vec![SendOutcome::Transient; 9]);
    let monitor = monitoring(&db, portal, Arc::clone(&chat));

    monitor.poll_cycle().await;
    assert!(
        chat.messages().is_empty(),
        "nothing delivered while the channel flaps"
    );
    let user = db.get_user(user_id).await.unwrap().unwrap();
    assert_eq!(user.notifications_sent_today, 0);
    assert!(user.monitoring_enabled, "transient trouble must not disable the user");

    // The script is drained: next cycle delivers normally.
    monitor.poll_cycle().await;
    assert!(!chat.messages().is_empty());
}

#[tokio::test]
async fn inactive_monitoring_flag_skips_user() {
    let db = memory_db().await;
    let user_id = seed_user(&db, 1007, Tier::Basic).await;
    seed_filter(&db, user_id).await;
    db.set_monitoring_enabled(user_id, false).await.unwrap();

    let portal = FakePortal::with_tenders(vec![strong_tender("5")]);
    let chat = FakeChat::ok();
    let monitor = monitoring(&db, Arc::clone(&portal), Arc::clone(&chat));

    monitor.poll_cycle().await;
    assert!(chat.messages().is_empty());
    assert_eq!(*portal.search_calls.lock().unwrap(), 0, "no portal traffic for paused users");
}
