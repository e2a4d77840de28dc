#![allow(dead_code)]

use chrono::Utc;
use points_ledger::models::{DownloadEvent, Pricing, Resource, UserAccount};
use points_ledger::MemoryStore;

pub const UPLOADER: &str = "uploader-1";
pub const DOWNLOADER: &str = "downloader-1";
pub const VIP_DOWNLOADER: &str = "vip-1";

pub fn user(user_id: &str, vip_level: i16, balance: i64) -> UserAccount {
    UserAccount {
        user_id: user_id.to_string(),
        vip_level,
        points_balance: balance,
        points_total: balance,
        user_level: 1,
    }
}

pub fn resource(resource_id: &str, uploader_id: &str, pricing: Pricing) -> Resource {
    let now = Utc::now();
    Resource {
        resource_id: resource_id.to_string(),
        uploader_id: Some(uploader_id.to_string()),
        title: format!("Resource {}", resource_id),
        pricing_type: pricing.pricing_type().code(),
        points_cost: pricing.points_cost(),
        is_deleted: false,
        created_at: now,
        updated_at: now,
    }
}

pub fn download(download_id: &str, downloader_id: &str, resource_id: &str) -> DownloadEvent {
    DownloadEvent {
        download_id: download_id.to_string(),
        downloader_id: Some(downloader_id.to_string()),
        resource_id: Some(resource_id.to_string()),
        earnings_awarded: false,
        created_at: Utc::now(),
    }
}

/// Store with one uploader, a normal and a VIP downloader
pub async fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert_user(user(UPLOADER, 0, 0)).await;
    store.insert_user(user(DOWNLOADER, 0, 100)).await;
    store.insert_user(user(VIP_DOWNLOADER, 1, 100)).await;
    store
}

/// Seed a resource plus one download of it
pub async fn seed_download(
    store: &MemoryStore,
    download_id: &str,
    downloader_id: &str,
    resource_id: &str,
    pricing: Pricing,
) {
    store.insert_resource(resource(resource_id, UPLOADER, pricing)).await;
    store
        .insert_download(download(download_id, downloader_id, resource_id))
        .await;
}

/// The running-sum invariant: the latest ledger balance equals the sum of
/// all changes on top of the seeded opening balance
pub async fn assert_ledger_consistent(store: &MemoryStore, user_id: &str, opening_balance: i64) {
    let ledger = store.ledger_for(user_id).await;
    let sum: i64 = ledger.iter().map(|r| r.points_change).sum();
    let expected = opening_balance + sum;

    if let Some(last) = ledger.last() {
        assert_eq!(last.points_balance, expected, "ledger of {} is inconsistent", user_id);
    }
    let account = points_ledger::LedgerStore::get_user(store, user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.points_balance, expected);
}
