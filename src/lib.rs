pub mod config;
pub mod db;
pub mod domain;
pub mod models;
pub mod telemetry;

// Re-export commonly used types
pub use config::{AdjustmentPolicy, EarningsPolicy, LedgerConfig, PaidShare};

pub use db::{
    close_pool, create_pool, create_pool_from_env, health_check, run_migrations, with_retry,
    DatabaseError, LedgerStore, MemoryStore, PgStore,
};

pub use domain::DomainError;

pub use models::{
    BalanceSnapshot, EarningsRecord, EarningsSource, EarningsStatus, PointsRecord, Pricing,
    PricingType, UserAccount,
};

pub use telemetry::init_tracing;
