//! Staleness check and forced refresh of the legacy directory view.
//!
//! The legacy side mirrors its directory service into `imp_abe_ldap_matview`;
//! `imp_last_ldap_refresh` records when that happened. The binary consults
//! this before a run, the pipeline itself never does.

use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::info;

use crate::source::StoreError;

const LAST_REFRESH_TABLE: &str = "imp_last_ldap_refresh";
const REFRESH_FUNCTION: &str = "imp_refresh_abe_ldap";

pub async fn last_refresh(pool: &PgPool) -> Result<DateTime<Utc>, StoreError> {
    let row = sqlx::query(&format!("SELECT * FROM {LAST_REFRESH_TABLE}"))
        .fetch_one(pool)
        .await?;
    Ok(row.try_get(0)?)
}

/// The view counts as stale once the last refresh is more than a day old.
pub async fn view_is_stale(pool: &PgPool, now: DateTime<Utc>) -> Result<bool, StoreError> {
    Ok(is_stale(last_refresh(pool).await?, now))
}

fn is_stale(last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - last > Duration::days(1)
}

pub async fn refresh_view(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query(&format!("SELECT * FROM {REFRESH_FUNCTION}()"))
        .execute(pool)
        .await?;
    info!(event = "directory_view_refreshed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn staleness_threshold_is_one_day() {
        let now = Utc.with_ymd_and_hms(2021, 6, 15, 12, 0, 0).unwrap();
        assert!(!is_stale(now - Duration::hours(23), now));
        assert!(!is_stale(now - Duration::days(1), now));
        assert!(is_stale(now - Duration::days(1) - Duration::seconds(1), now));
    }
}
