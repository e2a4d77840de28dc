mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;

use common::*;
use points_ledger::domain;
use points_ledger::models::{ChangeType, PointsMeta, PointsRecordQuery};
use points_ledger::LedgerStore;

fn task_reward() -> PointsMeta {
    PointsMeta::new(ChangeType::Task, "daily_task").with_description("每日签到")
}

fn download_spend(resource_id: &str) -> PointsMeta {
    PointsMeta::new(ChangeType::Consume, "resource_download").with_source_id(resource_id)
}

#[tokio::test]
async fn test_add_points_raises_total_and_level() {
    let store = seeded_store().await;

    let snapshot = domain::add_points(&store, UPLOADER, 499, task_reward()).await.unwrap();
    assert_eq!(snapshot.points_balance, 499);
    assert_eq!(snapshot.user_level, 1);

    let snapshot = domain::add_points(&store, UPLOADER, 1, task_reward()).await.unwrap();
    assert_eq!(snapshot.points_total, 500);
    assert_eq!(snapshot.user_level, 2);

    let account = store.get_user(UPLOADER).await.unwrap().unwrap();
    assert_eq!(account.user_level, 2);
    assert_ledger_consistent(&store, UPLOADER, 0).await;
}

#[tokio::test]
async fn test_add_points_rejects_non_positive_amounts() {
    let store = seeded_store().await;

    for points in [0, -5] {
        let err = domain::add_points(&store, UPLOADER, points, task_reward()).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_POINTS");
        assert_eq!(err.to_string(), format!("无效的积分变动值: {}", points));
    }
    let err = domain::add_points(&store, "ghost", 10, task_reward()).await.unwrap_err();
    assert_eq!(err.code(), "USER_NOT_FOUND");
    assert_eq!(err.to_string(), "用户不存在");
    assert!(store.ledger_for(UPLOADER).await.is_empty());
}

#[tokio::test]
async fn test_deduct_points_keeps_total_and_level() {
    let store = seeded_store().await;
    domain::add_points(&store, UPLOADER, 600, task_reward()).await.unwrap();

    let snapshot = domain::deduct_points(&store, UPLOADER, 550, download_spend("r1"))
        .await
        .unwrap();

    assert_eq!(snapshot.points_balance, 50);
    assert_eq!(snapshot.points_total, 600);
    assert_eq!(snapshot.user_level, 2);

    let ledger = store.ledger_for(UPLOADER).await;
    assert_eq!(ledger[1].points_change, -550);
    assert_eq!(ledger[1].change_type, "consume");
    assert_eq!(ledger[1].source_id.as_deref(), Some("r1"));
    assert_ledger_consistent(&store, UPLOADER, 0).await;
}

#[tokio::test]
async fn test_deduct_points_insufficient_balance() {
    let store = seeded_store().await;

    let err = domain::deduct_points(&store, DOWNLOADER, 101, download_spend("r1"))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "INSUFFICIENT_POINTS");
    assert_eq!(err.to_string(), "积分不足，当前余额100，需要101");
    let account = store.get_user(DOWNLOADER).await.unwrap().unwrap();
    assert_eq!(account.points_balance, 100);
    assert!(store.ledger_for(DOWNLOADER).await.is_empty());

    // Spending the exact balance is allowed
    let snapshot = domain::deduct_points(&store, DOWNLOADER, 100, download_spend("r1"))
        .await
        .unwrap();
    assert_eq!(snapshot.points_balance, 0);
}

#[tokio::test]
async fn test_adjust_user_points_signed_changes() {
    let store = seeded_store().await;

    let snapshot = domain::adjust_user_points(&store, DOWNLOADER, 50, "活动奖励补发", "admin-1")
        .await
        .unwrap();
    assert_eq!(snapshot.points_balance, 150);
    assert_eq!(snapshot.points_total, 150);

    let snapshot = domain::adjust_user_points(&store, DOWNLOADER, -120, "误发积分回收", "admin-1")
        .await
        .unwrap();
    assert_eq!(snapshot.points_balance, 30);
    assert_eq!(snapshot.points_total, 150);

    let err = domain::adjust_user_points(&store, DOWNLOADER, -31, "误发积分回收", "admin-1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NEGATIVE_BALANCE");

    let err = domain::adjust_user_points(&store, DOWNLOADER, 0, "无效调整测试", "admin-1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_POINTS");

    let ledger = store.ledger_for(DOWNLOADER).await;
    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger[0].change_type, "admin_add");
    assert_eq!(ledger[1].change_type, "admin_deduct");
    assert_ledger_consistent(&store, DOWNLOADER, 100).await;
}

#[tokio::test]
async fn test_get_user_points_info() {
    let store = seeded_store().await;
    domain::add_points(&store, UPLOADER, 2100, task_reward()).await.unwrap();

    let info = domain::get_user_points_info(&store, UPLOADER).await.unwrap();

    assert_eq!(info.points_balance, 2100);
    assert_eq!(info.user_level, 3);
    assert_eq!(info.level_name, "LV3 中级");
    assert_eq!(info.level_discount, dec!(0.10));
    assert_eq!(info.level_privileges.len(), 2);
    assert_eq!(info.next_level_points, Some(2900));

    let err = domain::get_user_points_info(&store, "ghost").await.unwrap_err();
    assert_eq!(err.code(), "USER_NOT_FOUND");
}

#[tokio::test]
async fn test_get_points_records_filters_and_pages() {
    let store = seeded_store().await;
    for _ in 0..3 {
        domain::add_points(&store, UPLOADER, 10, task_reward()).await.unwrap();
    }
    domain::deduct_points(&store, UPLOADER, 5, download_spend("r1")).await.unwrap();

    let page = domain::get_points_records(&store, UPLOADER, &PointsRecordQuery::default())
        .await
        .unwrap();
    assert_eq!(page.total, 4);
    // Newest first
    assert_eq!(page.list[0].points_change, -5);
    assert_eq!(page.list[0].points_balance, 25);

    let only_tasks = PointsRecordQuery {
        change_type: Some("task".to_string()),
        ..Default::default()
    };
    let page = domain::get_points_records(&store, UPLOADER, &only_tasks).await.unwrap();
    assert_eq!(page.total, 3);
    assert!(page.list.iter().all(|r| r.change_type == "task"));

    let second_page = PointsRecordQuery {
        page_num: Some(2),
        page_size: Some(3),
        ..Default::default()
    };
    let page = domain::get_points_records(&store, UPLOADER, &second_page).await.unwrap();
    assert_eq!(page.total, 4);
    assert_eq!(page.page_num, 2);
    assert_eq!(page.list.len(), 1);
    assert_eq!(page.list[0].points_balance, 10);
}

#[tokio::test]
async fn test_credits_that_overflow_are_rejected() {
    let store = seeded_store().await;

    let err = domain::add_points(&store, DOWNLOADER, i64::MAX, task_reward())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_POINTS");

    let err = domain::adjust_user_points(&store, DOWNLOADER, i64::MAX, "活动奖励补发", "admin-1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_POINTS");

    // Spending can never underflow; it is simply insufficient
    let err = domain::deduct_points(&store, DOWNLOADER, i64::MAX, download_spend("r1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_POINTS");

    let account = store.get_user(DOWNLOADER).await.unwrap().unwrap();
    assert_eq!(account.points_balance, 100);
    assert_eq!(account.points_total, 100);
    assert!(store.ledger_for(DOWNLOADER).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deducts_never_overspend() {
    let store = Arc::new(seeded_store().await);

    let handles: Vec<_> = (0..30)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                domain::deduct_points(store.as_ref(), DOWNLOADER, 5, download_spend(&format!("r{}", i)))
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert_eq!(e.code(), "INSUFFICIENT_POINTS"),
        }
    }

    assert_eq!(succeeded, 20);
    let account = store.get_user(DOWNLOADER).await.unwrap().unwrap();
    assert_eq!(account.points_balance, 0);
    assert_eq!(store.ledger_for(DOWNLOADER).await.len(), 20);
    assert_ledger_consistent(&store, DOWNLOADER, 100).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interleaved_adds_and_deducts_lose_no_updates() {
    let store = Arc::new(seeded_store().await);

    let adds: Vec<_> = (0..10)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                domain::add_points(store.as_ref(), DOWNLOADER, 10, task_reward()).await
            })
        })
        .collect();
    let deducts: Vec<_> = (0..40)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                domain::deduct_points(store.as_ref(), DOWNLOADER, 5, download_spend(&format!("r{}", i)))
                    .await
            })
        })
        .collect();

    for handle in adds {
        handle.await.unwrap().unwrap();
    }
    let mut deducted = 0;
    for handle in deducts {
        match handle.await.unwrap() {
            Ok(_) => deducted += 1,
            Err(e) => assert_eq!(e.code(), "INSUFFICIENT_POINTS"),
        }
    }

    let account = store.get_user(DOWNLOADER).await.unwrap().unwrap();
    assert_eq!(account.points_balance, 100 + 10 * 10 - 5 * deducted);
    assert_eq!(account.points_total, 200);

    let ledger = store.ledger_for(DOWNLOADER).await;
    assert_eq!(ledger.len() as i64, 10 + deducted);
    assert!(ledger.iter().all(|r| r.points_balance >= 0));
    assert!(ledger
        .windows(2)
        .all(|w| w[1].points_balance == w[0].points_balance + w[1].points_change));
    assert_ledger_consistent(&store, DOWNLOADER, 100).await;
}
