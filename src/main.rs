use clap::{Parser, Subcommand};
use dotenv::dotenv;
use eyre::{bail, Result};
use serde::Serialize;
use uuid::Uuid;

use points_ledger::domain::{self, AdminAdjustment, EarningsResult, SetPricing};
use points_ledger::models::{AdjustmentType, ChangeType, OperatorType, PointsMeta};
use points_ledger::{
    close_pool, create_pool_from_env, health_check, init_tracing, run_migrations, LedgerConfig,
    PgStore,
};

#[derive(Parser)]
#[command(name = "points-ledger", about = "Operator tool for the points and earnings ledger")]
struct Cli {
    /// Apply pending schema migrations before running the command
    #[arg(long, env = "POINTS_LEDGER_MIGRATE")]
    migrate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Award the uploader for a completed download
    Award {
        #[arg(long)]
        download_id: String,
    },
    /// Freeze the earnings of a resource under review
    Freeze {
        #[arg(long)]
        resource_id: String,
        #[arg(long)]
        reason: String,
    },
    /// Restore frozen earnings after review
    Unfreeze {
        #[arg(long)]
        resource_id: String,
        #[arg(long)]
        reviewer_id: String,
    },
    /// Cancel frozen earnings and claw the points back
    Cancel {
        #[arg(long)]
        resource_id: String,
        #[arg(long)]
        reason: String,
    },
    /// Change the pricing of a resource
    SetPricing {
        #[arg(long)]
        resource_id: String,
        /// 0 free, 1 paid points, 2 VIP only
        #[arg(long)]
        pricing_type: i16,
        #[arg(long, default_value = "0")]
        points_cost: String,
        #[arg(long)]
        operator_id: String,
        /// "uploader" or "auditor"
        #[arg(long, default_value = "uploader")]
        operator_type: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Apply a signed admin correction to a balance
    Adjust {
        #[arg(long)]
        user_id: String,
        #[arg(long, allow_negative_numbers = true)]
        points: i64,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        admin_id: String,
    },
    /// Credit points for a completed task
    Reward {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        points: i64,
        #[arg(long)]
        task_id: String,
    },
    /// Spend points on a resource download
    Spend {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        points: i64,
        #[arg(long)]
        resource_id: String,
    },
    /// Gift points to one user
    Gift {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        points: i64,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        admin_id: String,
        /// Confirms a second admin approved a large gift
        #[arg(long)]
        approved: bool,
    },
    /// Gift the same amount to many users
    BatchGift {
        #[arg(long, value_delimiter = ',')]
        user_ids: Vec<String>,
        #[arg(long)]
        points: i64,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        admin_id: String,
        #[arg(long)]
        approved: bool,
    },
    /// Undo an admin adjustment inside the revoke window
    Revoke {
        #[arg(long)]
        log_id: Uuid,
        #[arg(long)]
        admin_id: String,
        #[arg(long)]
        reason: String,
    },
    /// Show a user's balance and level
    Balance {
        #[arg(long)]
        user_id: String,
    },
    /// Show an uploader's earnings totals
    Stats {
        #[arg(long)]
        uploader_id: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Turn free-form cost input into a storable cost, accepting the adjusted
/// value when the input is a number outside the rules
fn parse_points_cost(raw: &str) -> Result<i64> {
    let validation = domain::validate_points_input(raw);
    if validation.valid {
        return Ok(raw.trim().parse::<f64>()? as i64);
    }
    match validation.adjusted_value {
        Some(adjusted) => Ok(adjusted),
        None => bail!(
            "invalid points cost {:?}: {}",
            raw,
            validation.error_message.unwrap_or_default()
        ),
    }
}

async fn run(store: &PgStore, config: &LedgerConfig, command: Command) -> Result<()> {
    match command {
        Command::Award { download_id } => {
            let result = domain::award_earnings(store, &download_id, &config.earnings).await;
            print_json(&EarningsResult::from(result))
        }
        Command::Freeze { resource_id, reason } => {
            let frozen = domain::freeze_earnings(store, &resource_id, &reason).await?;
            print_json(&serde_json::json!({ "frozen": frozen }))
        }
        Command::Unfreeze {
            resource_id,
            reviewer_id,
        } => {
            let restored = domain::unfreeze_earnings(store, &resource_id, &reviewer_id).await?;
            print_json(&serde_json::json!({ "unfrozen": restored }))
        }
        Command::Cancel { resource_id, reason } => {
            print_json(&domain::cancel_earnings(store, &resource_id, &reason).await?)
        }
        Command::SetPricing {
            resource_id,
            pricing_type,
            points_cost,
            operator_id,
            operator_type,
            reason,
        } => {
            let Some(operator_type) = OperatorType::parse(&operator_type) else {
                bail!("unknown operator type {:?}", operator_type);
            };
            let points_cost = if pricing_type == 1 {
                parse_points_cost(&points_cost)?
            } else {
                0
            };
            let log = domain::set_pricing(
                store,
                SetPricing {
                    resource_id,
                    pricing_type,
                    points_cost,
                    operator_id,
                    operator_type,
                    reason,
                },
            )
            .await?;
            print_json(&log)
        }
        Command::Adjust {
            user_id,
            points,
            reason,
            admin_id,
        } => {
            print_json(&domain::adjust_user_points(store, &user_id, points, &reason, &admin_id).await?)
        }
        Command::Reward {
            user_id,
            points,
            task_id,
        } => {
            let meta = PointsMeta::new(ChangeType::Task, "task").with_source_id(task_id);
            print_json(&domain::add_points(store, &user_id, points, meta).await?)
        }
        Command::Spend {
            user_id,
            points,
            resource_id,
        } => {
            let meta =
                PointsMeta::new(ChangeType::Consume, "resource_download").with_source_id(resource_id);
            print_json(&domain::deduct_points(store, &user_id, points, meta).await?)
        }
        Command::Gift {
            user_id,
            points,
            reason,
            admin_id,
            approved,
        } => {
            if !approved && domain::requires_approval(points, 1, &config.adjustments) {
                bail!("gift of {} points needs approval, rerun with --approved", points);
            }
            let request = AdminAdjustment {
                admin_id,
                target_user_id: user_id,
                adjustment_type: AdjustmentType::Gift,
                points,
                reason,
            };
            print_json(&domain::apply_adjustment(store, request, &config.adjustments).await?)
        }
        Command::BatchGift {
            user_ids,
            points,
            reason,
            admin_id,
            approved,
        } => {
            if !approved && domain::requires_approval(points, user_ids.len(), &config.adjustments) {
                bail!(
                    "batch gift to {} users needs approval, rerun with --approved",
                    user_ids.len()
                );
            }
            let result = domain::batch_gift_points(
                store,
                &admin_id,
                &user_ids,
                points,
                &reason,
                &config.adjustments,
            )
            .await?;
            print_json(&result)
        }
        Command::Revoke {
            log_id,
            admin_id,
            reason,
        } => {
            let log =
                domain::revoke_adjustment(store, log_id, &admin_id, &reason, &config.adjustments)
                    .await?;
            print_json(&log)
        }
        Command::Balance { user_id } => {
            print_json(&domain::get_user_points_info(store, &user_id).await?)
        }
        Command::Stats { uploader_id } => {
            print_json(&domain::get_earnings_stats(store, &uploader_id).await?)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = LedgerConfig::from_env();

    let pool = create_pool_from_env().await?;
    health_check(&pool).await?;
    if cli.migrate {
        run_migrations(&pool).await?;
    }

    let store = PgStore::new(pool.clone());
    let result = run(&store, &config, cli.command).await;

    close_pool(&pool).await;
    result
}
