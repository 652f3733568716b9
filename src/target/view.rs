//! Read-only view of what already exists on the target side.
//!
//! Loaded once per run; the pipeline consults it for pre-existing user
//! mappings, login/home-directory collision detection and the handful of
//! globally configured finance accounts.

use std::collections::{HashMap, HashSet};

use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::source::StoreError;

#[derive(Debug, Clone)]
pub struct ExistingUser {
    pub id: i64,
    pub login: String,
    pub has_room: bool,
    /// The user's finance account on the target side.
    pub finance_account: i64,
}

/// Database ids of the fixed counter-accounts the financial stage books
/// against.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub bank_account: i64,
    pub membership_fee_account: i64,
    pub dead_memberships_account: i64,
    pub allowance_account: i64,
}

#[derive(Debug)]
pub struct TargetView {
    pub users_by_login: HashMap<String, ExistingUser>,
    pub logins: HashSet<String>,
    pub home_directories: HashSet<String>,
    pub config: TargetConfig,
}

impl TargetView {
    pub async fn load(pool: &PgPool) -> Result<Self, StoreError> {
        let config = load_config(pool).await?;

        let mut users_by_login = HashMap::new();
        let mut logins = HashSet::new();
        let rows = sqlx::query(
            "SELECT id, login, room_id IS NOT NULL AS has_room, account_id \
             FROM \"user\"",
        )
        .fetch_all(pool)
        .await?;
        for row in &rows {
            let user = ExistingUser {
                id: row.try_get::<i32, _>("id")?.into(),
                login: row.try_get("login")?,
                has_room: row.try_get("has_room")?,
                finance_account: row.try_get::<i32, _>("account_id")?.into(),
            };
            logins.insert(user.login.clone());
            users_by_login.insert(user.login.clone(), user);
        }

        let mut home_directories = HashSet::new();
        let rows = sqlx::query("SELECT home_directory FROM unix_account")
            .fetch_all(pool)
            .await?;
        for row in &rows {
            home_directories.insert(row.try_get("home_directory")?);
        }

        Ok(Self {
            users_by_login,
            logins,
            home_directories,
            config,
        })
    }

    /// Empty view with placeholder config ids, for tests and dry runs against
    /// a source-only environment.
    pub fn unconnected() -> Self {
        Self {
            users_by_login: HashMap::new(),
            logins: HashSet::new(),
            home_directories: HashSet::new(),
            config: TargetConfig {
                bank_account: 1,
                membership_fee_account: 2,
                dead_memberships_account: 3,
                allowance_account: 4,
            },
        }
    }
}

async fn load_config(pool: &PgPool) -> Result<TargetConfig, StoreError> {
    let row = sqlx::query(
        "SELECT bank_account_id, membership_fee_account_id, \
                dead_memberships_account_id, allowance_account_id \
         FROM config",
    )
    .fetch_one(pool)
    .await?;
    Ok(TargetConfig {
        bank_account: row.try_get::<i32, _>("bank_account_id")?.into(),
        membership_fee_account: row.try_get::<i32, _>("membership_fee_account_id")?.into(),
        dead_memberships_account: row.try_get::<i32, _>("dead_memberships_account_id")?.into(),
        allowance_account: row.try_get::<i32, _>("allowance_account_id")?.into(),
    })
}
