mod common;

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use uuid::Uuid;

use common::*;
use points_ledger::domain::{self, adjustments::revoke_adjustment_at, AdminAdjustment};
use points_ledger::models::AdjustmentType;
use points_ledger::{AdjustmentPolicy, LedgerStore};

const ADMIN: &str = "admin-1";

fn request(target: &str, adjustment_type: AdjustmentType, points: i64) -> AdminAdjustment {
    AdminAdjustment {
        admin_id: ADMIN.to_string(),
        target_user_id: target.to_string(),
        adjustment_type,
        points,
        reason: "客服补偿积分".to_string(),
    }
}

#[tokio::test]
async fn test_apply_adjustment_writes_log_and_ledger() {
    let store = seeded_store().await;
    let policy = AdjustmentPolicy::default();

    let log = domain::apply_adjustment(&store, request(DOWNLOADER, AdjustmentType::Gift, 40), &policy)
        .await
        .unwrap();

    assert_eq!(log.points_change, 40);
    assert_eq!(log.points_before, 100);
    assert_eq!(log.points_after, 140);
    assert!(!log.is_revoked);

    let ledger = store.ledger_for(DOWNLOADER).await;
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].change_type, "admin_gift");
    assert_eq!(ledger[0].source, "admin_adjustment");
    assert_eq!(
        ledger[0].description.as_deref(),
        Some("管理员增加积分: 客服补偿积分")
    );

    let fetched = domain::get_adjustment(&store, log.log_id).await.unwrap();
    assert_eq!(fetched, log);
}

#[tokio::test]
async fn test_apply_adjustment_deduct() {
    let store = seeded_store().await;
    let policy = AdjustmentPolicy::default();

    let log = domain::apply_adjustment(&store, request(DOWNLOADER, AdjustmentType::Deduct, 60), &policy)
        .await
        .unwrap();
    assert_eq!(log.points_change, -60);
    assert_eq!(log.points_after, 40);

    let account = store.get_user(DOWNLOADER).await.unwrap().unwrap();
    assert_eq!(account.points_total, 100);

    let err = domain::apply_adjustment(&store, request(DOWNLOADER, AdjustmentType::Deduct, 41), &policy)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_POINTS");
    assert_ledger_consistent(&store, DOWNLOADER, 100).await;
}

#[tokio::test]
async fn test_apply_adjustment_validation() {
    let store = seeded_store().await;
    let policy = AdjustmentPolicy::default();

    let err = domain::apply_adjustment(&store, request(DOWNLOADER, AdjustmentType::Add, 10_001), &policy)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "EXCEED_LIMIT");

    let err = domain::apply_adjustment(&store, request(DOWNLOADER, AdjustmentType::Add, 0), &policy)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_POINTS");

    let mut short_reason = request(DOWNLOADER, AdjustmentType::Add, 10);
    short_reason.reason = "补偿".to_string();
    let err = domain::apply_adjustment(&store, short_reason, &policy).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_REASON");

    let err = domain::apply_adjustment(&store, request("ghost", AdjustmentType::Add, 10), &policy)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "USER_NOT_FOUND");

    // The limit is inclusive
    domain::apply_adjustment(&store, request(DOWNLOADER, AdjustmentType::Add, 10_000), &policy)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_batch_gift_reports_per_user_failures() {
    let store = seeded_store().await;
    let policy = AdjustmentPolicy::default();
    let users = vec![
        DOWNLOADER.to_string(),
        "ghost".to_string(),
        VIP_DOWNLOADER.to_string(),
    ];

    let result = domain::batch_gift_points(&store, ADMIN, &users, 25, "节日活动赠送", &policy)
        .await
        .unwrap();

    assert_eq!(result.total_users, 3);
    assert_eq!(result.success_count, 2);
    assert_eq!(result.failed_count, 1);
    assert_eq!(result.failed_users[0].user_id, "ghost");
    assert_eq!(result.failed_users[0].code, "USER_NOT_FOUND");

    for user_id in [DOWNLOADER, VIP_DOWNLOADER] {
        let account = store.get_user(user_id).await.unwrap().unwrap();
        assert_eq!(account.points_balance, 125);
        let ledger = store.ledger_for(user_id).await;
        assert_eq!(ledger[0].change_type, "admin_batch_gift");
    }
}

#[tokio::test]
async fn test_batch_gift_rejects_bad_input_up_front() {
    let store = seeded_store().await;
    let policy = AdjustmentPolicy::default();
    let users = vec![DOWNLOADER.to_string()];

    let err = domain::batch_gift_points(&store, ADMIN, &users, 0, "节日活动赠送", &policy)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_POINTS");

    let err = domain::batch_gift_points(&store, ADMIN, &users, 10, "", &policy)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_REASON");
    assert!(store.ledger_for(DOWNLOADER).await.is_empty());
}

#[tokio::test]
async fn test_revoke_adjustment_restores_balance_once() {
    let store = seeded_store().await;
    let policy = AdjustmentPolicy::default();
    let log = domain::apply_adjustment(&store, request(DOWNLOADER, AdjustmentType::Add, 30), &policy)
        .await
        .unwrap();

    let revoked = domain::revoke_adjustment(&store, log.log_id, "admin-2", "重复发放", &policy)
        .await
        .unwrap();

    assert!(revoked.is_revoked);
    assert_eq!(revoked.revoked_by.as_deref(), Some("admin-2"));
    assert_eq!(revoked.revoke_reason.as_deref(), Some("重复发放"));

    let account = store.get_user(DOWNLOADER).await.unwrap().unwrap();
    assert_eq!(account.points_balance, 100);
    // Revoking does not lower the lifetime total
    assert_eq!(account.points_total, 130);

    let ledger = store.ledger_for(DOWNLOADER).await;
    assert_eq!(ledger[1].change_type, "admin_revoke");
    assert_eq!(ledger[1].points_change, -30);
    assert_ledger_consistent(&store, DOWNLOADER, 100).await;

    let err = domain::revoke_adjustment(&store, log.log_id, "admin-2", "重复发放", &policy)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ALREADY_REVOKED");
}

#[tokio::test]
async fn test_revoke_deduction_gives_points_back() {
    let store = seeded_store().await;
    let policy = AdjustmentPolicy::default();
    let log = domain::apply_adjustment(&store, request(DOWNLOADER, AdjustmentType::Deduct, 70), &policy)
        .await
        .unwrap();

    domain::revoke_adjustment(&store, log.log_id, ADMIN, "误扣积分", &policy)
        .await
        .unwrap();

    let account = store.get_user(DOWNLOADER).await.unwrap().unwrap();
    assert_eq!(account.points_balance, 100);
}

#[tokio::test]
async fn test_revoke_fails_when_points_were_spent() {
    let store = seeded_store().await;
    let policy = AdjustmentPolicy::default();
    let log = domain::apply_adjustment(&store, request(UPLOADER, AdjustmentType::Gift, 50), &policy)
        .await
        .unwrap();
    domain::apply_adjustment(&store, request(UPLOADER, AdjustmentType::Deduct, 40), &policy)
        .await
        .unwrap();

    let err = domain::revoke_adjustment(&store, log.log_id, ADMIN, "重复发放", &policy)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "POINTS_CONSUMED");
    let stored = domain::get_adjustment(&store, log.log_id).await.unwrap();
    assert!(!stored.is_revoked);
}

#[tokio::test]
async fn test_revoke_window_and_missing_log() {
    let store = seeded_store().await;
    let policy = AdjustmentPolicy::default();
    let log = domain::apply_adjustment(&store, request(DOWNLOADER, AdjustmentType::Add, 30), &policy)
        .await
        .unwrap();

    let later = Utc::now() + Duration::hours(25);
    let err = revoke_adjustment_at(&store, log.log_id, ADMIN, "重复发放", &policy, later)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "REVOKE_WINDOW_EXPIRED");

    let err = domain::revoke_adjustment(&store, log.log_id, ADMIN, "  ", &policy)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_REASON");

    let err = domain::revoke_adjustment(&store, Uuid::new_v4(), ADMIN, "重复发放", &policy)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "LOG_NOT_FOUND");

    let err = domain::get_adjustment(&store, Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.code(), "LOG_NOT_FOUND");
}
