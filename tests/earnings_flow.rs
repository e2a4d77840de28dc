mod common;

use std::sync::Arc;

use chrono::Utc;
use pretty_assertions::assert_eq;

use common::*;
use points_ledger::domain::{self, earnings::earnings_stats_at, EarningsResult};
use points_ledger::models::{
    ChangeType, DownloaderType, EarningsQuery, EarningsSource, EarningsStatus, PointsMeta, Pricing,
};
use points_ledger::{EarningsPolicy, LedgerStore, MemoryStore};

fn policy() -> EarningsPolicy {
    EarningsPolicy::default()
}

#[tokio::test]
async fn test_award_paid_download_credits_uploader() {
    let store = seeded_store().await;
    seed_download(&store, "d1", DOWNLOADER, "r1", Pricing::PaidPoints(50)).await;

    let award = domain::award_earnings(&store, "d1", &policy()).await.unwrap();

    assert_eq!(award.earnings_points, 50);
    assert_eq!(award.earnings_source, EarningsSource::NormalDownload);
    assert_eq!(award.uploader_id, UPLOADER);
    assert_eq!(award.balance.points_balance, 50);
    assert_eq!(award.balance.points_total, 50);

    let record = domain::get_earnings_by_download(&store, "d1").await.unwrap().unwrap();
    assert_eq!(record.status, EarningsStatus::Awarded);
    assert_eq!(record.downloader_id, DOWNLOADER);
    assert!(domain::has_earnings_awarded(&store, "d1").await.unwrap());

    let ledger = store.ledger_for(UPLOADER).await;
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].change_type, ChangeType::Earn.as_str());
    assert_eq!(ledger[0].source, "work_downloaded");
    assert_eq!(ledger[0].source_id.as_deref(), Some("d1"));
    assert_eq!(ledger[0].record_id, award.balance.record_id);
    assert_ledger_consistent(&store, UPLOADER, 0).await;
}

#[tokio::test]
async fn test_award_sources_by_pricing_and_downloader() {
    let store = seeded_store().await;
    seed_download(&store, "d-free-vip", VIP_DOWNLOADER, "free", Pricing::Free).await;
    seed_download(&store, "d-paid-vip", VIP_DOWNLOADER, "paid", Pricing::PaidPoints(20)).await;
    seed_download(&store, "d-vip-only", DOWNLOADER, "vip", Pricing::VipOnly).await;

    let free = domain::award_earnings(&store, "d-free-vip", &policy()).await.unwrap();
    assert_eq!((free.earnings_points, free.earnings_source), (2, EarningsSource::VipDownload));

    let paid = domain::award_earnings(&store, "d-paid-vip", &policy()).await.unwrap();
    assert_eq!(
        (paid.earnings_points, paid.earnings_source),
        (20, EarningsSource::PlatformSubsidy)
    );

    let vip_only = domain::award_earnings(&store, "d-vip-only", &policy()).await.unwrap();
    assert_eq!(
        (vip_only.earnings_points, vip_only.earnings_source),
        (10, EarningsSource::PlatformSubsidy)
    );

    assert_eq!(vip_only.balance.points_balance, 32);
    assert_ledger_consistent(&store, UPLOADER, 0).await;
}

#[tokio::test]
async fn test_award_is_idempotent_per_download() {
    let store = seeded_store().await;
    seed_download(&store, "d1", DOWNLOADER, "r1", Pricing::PaidPoints(30)).await;

    domain::award_earnings(&store, "d1", &policy()).await.unwrap();
    let err = domain::award_earnings(&store, "d1", &policy()).await.unwrap_err();

    assert_eq!(err.code(), "DUPLICATE_EARNINGS");
    assert_eq!(store.earnings_records().await.len(), 1);
    let uploader = store.get_user(UPLOADER).await.unwrap().unwrap();
    assert_eq!(uploader.points_balance, 30);
}

#[tokio::test]
async fn test_concurrent_awards_credit_once() {
    let store = Arc::new(seeded_store().await);
    seed_download(&store, "d1", DOWNLOADER, "r1", Pricing::PaidPoints(40)).await;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                domain::award_earnings(store.as_ref(), "d1", &EarningsPolicy::default()).await
            })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert_eq!(e.code(), "DUPLICATE_EARNINGS"),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(store.earnings_records().await.len(), 1);
    let uploader = store.get_user(UPLOADER).await.unwrap().unwrap();
    assert_eq!(uploader.points_balance, 40);
    assert_eq!(store.ledger_for(UPLOADER).await.len(), 1);
}

#[tokio::test]
async fn test_self_download_earns_nothing() {
    let store = seeded_store().await;
    seed_download(&store, "d1", UPLOADER, "r1", Pricing::PaidPoints(50)).await;

    let err = domain::award_earnings(&store, "d1", &policy()).await.unwrap_err();

    assert_eq!(err.code(), "SELF_DOWNLOAD");
    assert!(store.earnings_records().await.is_empty());
    assert!(!domain::has_earnings_awarded(&store, "d1").await.unwrap());
}

#[tokio::test]
async fn test_award_missing_download_and_resource() {
    let store = seeded_store().await;
    store.insert_download(download("orphan", DOWNLOADER, "gone")).await;

    let err = domain::award_earnings(&store, "nope", &policy()).await.unwrap_err();
    assert_eq!(err.code(), "DOWNLOAD_NOT_FOUND");

    let err = domain::award_earnings(&store, "orphan", &policy()).await.unwrap_err();
    assert_eq!(err.code(), "RESOURCE_NOT_FOUND");
    assert!(!domain::has_earnings_awarded(&store, "nope").await.unwrap());
}

#[tokio::test]
async fn test_award_failure_leaves_no_partial_state() {
    let store = seeded_store().await;
    seed_download(&store, "d1", DOWNLOADER, "r1", Pricing::PaidPoints(25)).await;

    store.set_fail_writes(true);
    let result = domain::award_earnings(&store, "d1", &policy()).await;
    let wire = EarningsResult::from(result);
    assert!(!wire.success);
    assert_eq!(wire.error_code.as_deref(), Some("AWARD_FAILED"));
    assert!(store.earnings_records().await.is_empty());
    assert!(store.ledger_for(UPLOADER).await.is_empty());

    store.set_fail_writes(false);
    let award = domain::award_earnings(&store, "d1", &policy()).await.unwrap();
    assert_eq!(award.balance.points_balance, 25);
}

#[tokio::test]
async fn test_award_with_missing_uploader_fails() {
    let store = MemoryStore::new();
    store.insert_user(user(DOWNLOADER, 0, 0)).await;
    seed_download(&store, "d1", DOWNLOADER, "r1", Pricing::Free).await;

    let err = domain::award_earnings(&store, "d1", &policy()).await.unwrap_err();

    assert_eq!(err.code(), "AWARD_FAILED");
    assert!(store.earnings_records().await.is_empty());
    assert!(!domain::has_earnings_awarded(&store, "d1").await.unwrap());
}

#[tokio::test]
async fn test_freeze_and_unfreeze_keep_balance() {
    let store = seeded_store().await;
    seed_download(&store, "d1", DOWNLOADER, "r1", Pricing::PaidPoints(10)).await;
    store.insert_download(download("d2", VIP_DOWNLOADER, "r1")).await;
    domain::award_earnings(&store, "d1", &policy()).await.unwrap();
    domain::award_earnings(&store, "d2", &policy()).await.unwrap();

    assert_eq!(domain::freeze_earnings(&store, "r1", "copyright claim").await.unwrap(), 2);
    assert_eq!(domain::freeze_earnings(&store, "r1", "copyright claim").await.unwrap(), 0);
    assert!(store
        .earnings_records()
        .await
        .iter()
        .all(|r| r.status == EarningsStatus::Frozen));
    let uploader = store.get_user(UPLOADER).await.unwrap().unwrap();
    assert_eq!(uploader.points_balance, 20);

    assert_eq!(domain::unfreeze_earnings(&store, "r1", "reviewer").await.unwrap(), 2);
    assert!(store
        .earnings_records()
        .await
        .iter()
        .all(|r| r.status == EarningsStatus::Awarded));
    assert_eq!(domain::unfreeze_earnings(&store, "r1", "reviewer").await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancel_claws_back_frozen_earnings() {
    let store = seeded_store().await;
    seed_download(&store, "d1", DOWNLOADER, "r1", Pricing::PaidPoints(50)).await;
    domain::award_earnings(&store, "d1", &policy()).await.unwrap();

    // Nothing frozen yet
    let outcome = domain::cancel_earnings(&store, "r1", "fraud").await.unwrap();
    assert_eq!(outcome.cancelled, 0);

    domain::freeze_earnings(&store, "r1", "fraud").await.unwrap();
    let outcome = domain::cancel_earnings(&store, "r1", "fraud").await.unwrap();

    assert_eq!(outcome.cancelled, 1);
    assert_eq!(outcome.total_points, 50);
    assert_eq!(outcome.uploader_id.as_deref(), Some(UPLOADER));
    assert_eq!(outcome.clawed_back, 50);
    assert_eq!(outcome.shortfall, 0);

    let uploader = store.get_user(UPLOADER).await.unwrap().unwrap();
    assert_eq!(uploader.points_balance, 0);
    assert_eq!(uploader.points_total, 50);

    let ledger = store.ledger_for(UPLOADER).await;
    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger[1].points_change, -50);
    assert_eq!(ledger[1].source, "earnings_cancelled");
    assert_ledger_consistent(&store, UPLOADER, 0).await;

    // Cancelled is terminal
    assert_eq!(domain::unfreeze_earnings(&store, "r1", "reviewer").await.unwrap(), 0);
    assert_eq!(domain::freeze_earnings(&store, "r1", "again").await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancel_records_shortfall_when_points_were_spent() {
    let store = seeded_store().await;
    seed_download(&store, "d1", DOWNLOADER, "r1", Pricing::PaidPoints(50)).await;
    domain::award_earnings(&store, "d1", &policy()).await.unwrap();
    domain::deduct_points(
        &store,
        UPLOADER,
        30,
        PointsMeta::new(ChangeType::Consume, "resource_download"),
    )
    .await
    .unwrap();

    domain::freeze_earnings(&store, "r1", "fraud").await.unwrap();
    let outcome = domain::cancel_earnings(&store, "r1", "fraud").await.unwrap();

    assert_eq!(outcome.total_points, 50);
    assert_eq!(outcome.clawed_back, 20);
    assert_eq!(outcome.shortfall, 30);

    let uploader = store.get_user(UPLOADER).await.unwrap().unwrap();
    assert_eq!(uploader.points_balance, 0);

    let ledger = store.ledger_for(UPLOADER).await;
    let shortfall = ledger.last().unwrap();
    assert_eq!(shortfall.change_type, ChangeType::ClawbackShortfall.as_str());
    assert_eq!(shortfall.points_change, 0);
    assert_eq!(shortfall.points_balance, 0);
    assert_ledger_consistent(&store, UPLOADER, 0).await;
}

#[tokio::test]
async fn test_earnings_history_and_stats() {
    let store = seeded_store().await;
    seed_download(&store, "d1", DOWNLOADER, "r1", Pricing::PaidPoints(15)).await;
    seed_download(&store, "d2", VIP_DOWNLOADER, "r2", Pricing::VipOnly).await;
    seed_download(&store, "d3", DOWNLOADER, "r3", Pricing::Free).await;
    for id in ["d1", "d2", "d3"] {
        domain::award_earnings(&store, id, &policy()).await.unwrap();
    }
    domain::freeze_earnings(&store, "r3", "review").await.unwrap();
    domain::soft_delete_resource(&store, "r2").await.unwrap();

    let page = domain::get_earnings_history(&store, UPLOADER, &EarningsQuery::default())
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.page_size, 20);
    // Newest first
    assert_eq!(page.list[0].resource_id, "r3");
    assert_eq!(page.list[0].status, EarningsStatus::Frozen);

    let deleted = page.list.iter().find(|item| item.resource_id == "r2").unwrap();
    assert!(deleted.resource_deleted);
    assert_eq!(deleted.resource_url, None);
    assert_eq!(deleted.downloader_type, DownloaderType::Vip);

    let live = page.list.iter().find(|item| item.resource_id == "r1").unwrap();
    assert_eq!(live.resource_url.as_deref(), Some("/resource/r1"));
    assert_eq!(live.resource_title, "Resource r1");

    let frozen_only = EarningsQuery {
        status: Some(EarningsStatus::Frozen),
        ..Default::default()
    };
    let page = domain::get_earnings_history(&store, UPLOADER, &frozen_only).await.unwrap();
    assert_eq!(page.total, 1);

    let stats = earnings_stats_at(&store, UPLOADER, Utc::now()).await.unwrap();
    assert_eq!(stats.total_earnings, 25);
    assert_eq!(stats.total_downloads, 2);
    assert_eq!(stats.month_earnings, 25);
    assert_eq!(stats.month_downloads, 2);

    let next_year = Utc::now() + chrono::Duration::days(400);
    let stats = earnings_stats_at(&store, UPLOADER, next_year).await.unwrap();
    assert_eq!(stats.total_earnings, 25);
    assert_eq!(stats.month_earnings, 0);
}

#[tokio::test]
async fn test_history_far_past_the_last_page_is_empty() {
    let store = seeded_store().await;
    seed_download(&store, "d1", DOWNLOADER, "r1", Pricing::PaidPoints(15)).await;
    domain::award_earnings(&store, "d1", &policy()).await.unwrap();

    let query = EarningsQuery {
        page_num: Some(i64::MAX),
        page_size: Some(100),
        ..Default::default()
    };
    let page = domain::get_earnings_history(&store, UPLOADER, &query).await.unwrap();

    assert_eq!(page.total, 1);
    assert_eq!(page.page_num, i64::MAX);
    assert!(page.list.is_empty());

    let history = domain::get_pricing_history(&store, "r1", Some(i64::MAX), None)
        .await
        .unwrap();
    assert!(history.list.is_empty());
}

#[tokio::test]
async fn test_award_refuses_non_positive_earnings() {
    let store = seeded_store().await;
    seed_download(&store, "d-free", VIP_DOWNLOADER, "free", Pricing::Free).await;
    seed_download(&store, "d-vip", DOWNLOADER, "vip", Pricing::VipOnly).await;
    let policy = EarningsPolicy {
        free_reward: 0,
        vip_only_reward: -10,
        ..EarningsPolicy::default()
    };

    for download_id in ["d-free", "d-vip"] {
        let err = domain::award_earnings(&store, download_id, &policy).await.unwrap_err();
        assert_eq!(err.code(), "AWARD_FAILED");
        assert!(!domain::has_earnings_awarded(&store, download_id).await.unwrap());
    }

    assert!(store.earnings_records().await.is_empty());
    assert!(store.ledger_for(UPLOADER).await.is_empty());
    let uploader = store.get_user(UPLOADER).await.unwrap().unwrap();
    assert_eq!(uploader.points_balance, 0);
}
