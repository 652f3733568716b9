//! Snapshots the legacy schema into memory.
//!
//! Amount columns are selected as text (`amount::text`) and parsed into
//! cents; inet/cidr columns likewise come over as text so the pipeline
//! carries no driver-specific types.

use sqlx::postgres::PgPool;
use sqlx::Row;

use super::{
    parse_amount_cents, SourceAccess, SourceAccount, SourceBuilding, SourceDirectoryEntry,
    SourceExternalResidence, SourceFeeEntry, SourceSnapshot, SourceStatementLine, SourceSubnet,
    SourceSwitch, StoreError,
};

pub async fn load_snapshot(pool: &PgPool) -> Result<SourceSnapshot, StoreError> {
    Ok(SourceSnapshot {
        buildings: load_buildings(pool).await?,
        switches: load_switches(pool).await?,
        accesses: load_accesses(pool).await?,
        accounts: load_accounts(pool).await?,
        statement_lines: load_statement_lines(pool).await?,
        fees: load_fees(pool).await?,
        subnets: load_subnets(pool).await?,
        external_residences: load_external_residences(pool).await?,
    })
}

async fn load_buildings(pool: &PgPool) -> Result<Vec<SourceBuilding>, StoreError> {
    let rows = sqlx::query(
        "SELECT trim(short_name) AS short_name, trim(street) AS street, \
                trim(number) AS number, trim(zip_code) AS zip_code \
         FROM imp_buildings ORDER BY short_name",
    )
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            Ok(SourceBuilding {
                short_name: row.try_get("short_name")?,
                street: row.try_get("street")?,
                number: row.try_get("number")?,
                zip_code: row.try_get("zip_code")?,
            })
        })
        .collect()
}

async fn load_switches(pool: &PgPool) -> Result<Vec<SourceSwitch>, StoreError> {
    let rows = sqlx::query(
        "SELECT trim(name) AS name, trim(building) AS building, level, \
                trim(room_number) AS room_number, mgmt_ip::text AS mgmt_ip \
         FROM imp_switch ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            Ok(SourceSwitch {
                name: row.try_get("name")?,
                building: row.try_get("building")?,
                level: row.try_get("level")?,
                room_number: row.try_get("room_number")?,
                management_ip: row.try_get("mgmt_ip")?,
            })
        })
        .collect()
}

async fn load_accesses(pool: &PgPool) -> Result<Vec<SourceAccess>, StoreError> {
    let rows = sqlx::query(
        "SELECT id, trim(building) AS building, trim(floor) AS floor, trim(flat) AS flat, \
                trim(room) AS room, trim(switch) AS switch, trim(port) AS port \
         FROM imp_access ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            Ok(SourceAccess {
                id: row.try_get::<i32, _>("id")?.into(),
                building: row.try_get("building")?,
                floor: row.try_get("floor")?,
                flat: row.try_get("flat")?,
                room: row.try_get("room")?,
                switch: row.try_get("switch")?,
                port: row.try_get("port")?,
            })
        })
        .collect()
}

async fn load_accounts(pool: &PgPool) -> Result<Vec<SourceAccount>, StoreError> {
    let rows = sqlx::query(
        "SELECT trim(a.account) AS account, trim(a.name) AS name, \
                coalesce(a.system_account, false) AS system_account, \
                trim(a.pycroft_login) AS target_login, \
                a.entry_date, a.date_of_birth, a.access AS access_id, \
                trim(p.mail) AS mail, \
                l.uidnumber, l.gidnumber, trim(l.homedirectory) AS homedirectory \
         FROM imp_account a \
         LEFT JOIN account_property p ON p.account = a.account \
         LEFT JOIN imp_abe_ldap_matview l ON l.uid = a.account \
         ORDER BY a.account",
    )
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            let uid_number: Option<i64> = row.try_get::<Option<i32>, _>("uidnumber")?.map(i64::from);
            let directory_entry = match uid_number {
                Some(uid_number) => Some(SourceDirectoryEntry {
                    uid_number,
                    gid_number: row
                        .try_get::<Option<i32>, _>("gidnumber")?
                        .map(i64::from)
                        .unwrap_or(100),
                    home_directory: row
                        .try_get::<Option<String>, _>("homedirectory")?
                        .unwrap_or_default(),
                }),
                None => None,
            };
            Ok(SourceAccount {
                account: row.try_get("account")?,
                name: row.try_get("name")?,
                system_account: row.try_get("system_account")?,
                target_login: row.try_get("target_login")?,
                entry_date: row.try_get("entry_date")?,
                date_of_birth: row.try_get("date_of_birth")?,
                access_id: row.try_get::<Option<i32>, _>("access_id")?.map(i64::from),
                mail: row.try_get("mail")?,
                directory_entry,
            })
        })
        .collect()
}

async fn load_statement_lines(pool: &PgPool) -> Result<Vec<SourceStatementLine>, StoreError> {
    let rows = sqlx::query(
        "SELECT id, (timestamp AT TIME ZONE 'UTC') AS timestamp, \
                amount::text AS amount, trim(purpose) AS purpose, \
                trim(payer) AS payer, trim(account) AS account, trim(name) AS name \
         FROM account_statement_log ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            let raw_amount: String = row.try_get("amount")?;
            let amount_cents =
                parse_amount_cents(&raw_amount).map_err(|detail| StoreError::Malformed {
                    table: "account_statement_log",
                    column: "amount",
                    detail,
                })?;
            Ok(SourceStatementLine {
                id: row.try_get::<i32, _>("id")?.into(),
                timestamp: row.try_get("timestamp")?,
                amount_cents,
                purpose: row
                    .try_get::<Option<String>, _>("purpose")?
                    .unwrap_or_default(),
                payer: row.try_get::<Option<String>, _>("payer")?.unwrap_or_default(),
                account: row.try_get("account")?,
                name: row.try_get("name")?,
            })
        })
        .collect()
}

async fn load_fees(pool: &PgPool) -> Result<Vec<SourceFeeEntry>, StoreError> {
    let rows = sqlx::query(
        "SELECT r.fee AS fee_id, trim(r.account) AS account, f.amount::text AS amount, \
                trim(f.description) AS description, \
                (f.timestamp AT TIME ZONE 'UTC') AS timestamp \
         FROM account_fee_relation r \
         JOIN fee_info f ON f.id = r.fee \
         ORDER BY r.account, r.fee",
    )
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            let raw_amount: String = row.try_get("amount")?;
            let amount_cents =
                parse_amount_cents(&raw_amount).map_err(|detail| StoreError::Malformed {
                    table: "fee_info",
                    column: "amount",
                    detail,
                })?;
            Ok(SourceFeeEntry {
                fee_id: row.try_get::<i32, _>("fee_id")?.into(),
                account: row.try_get("account")?,
                amount_cents,
                description: row.try_get("description")?,
                timestamp: row.try_get("timestamp")?,
            })
        })
        .collect()
}

async fn load_subnets(pool: &PgPool) -> Result<Vec<SourceSubnet>, StoreError> {
    let rows = sqlx::query(
        "SELECT id, trim(description) AS description, subnet::text AS subnet, \
                gateway::text AS gateway, vlan_id \
         FROM subnet ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            Ok(SourceSubnet {
                id: row.try_get::<i32, _>("id")?.into(),
                description: row.try_get("description")?,
                cidr: row.try_get("subnet")?,
                gateway: row.try_get("gateway")?,
                vlan_id: row.try_get("vlan_id")?,
            })
        })
        .collect()
}

async fn load_external_residences(
    pool: &PgPool,
) -> Result<Vec<SourceExternalResidence>, StoreError> {
    let rows = sqlx::query(
        "SELECT trim(account) AS account, trim(street) AS street, trim(zip) AS zip, \
                trim(residence) AS residence \
         FROM imp_external_residence ORDER BY account",
    )
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            Ok(SourceExternalResidence {
                account: row.try_get("account")?,
                street: row.try_get("street")?,
                zip: row.try_get("zip")?,
                residence: row.try_get("residence")?,
            })
        })
        .collect()
}
