//! Caller-side persistence of the flushed output buffer.
//!
//! The pipeline never writes; after it returns, `persist_objects` inserts
//! everything inside one transaction, parents before children, remapping
//! run-local ids to database ids as the rows come back. Dry runs instead go
//! through `write_object_dump`.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;

use sqlx::postgres::PgPool;
use sqlx::Row;
use thiserror::Error;
use tracing::info;

use crate::importer::{ObjectRegistry, StagingError};

use super::{AccountRef, EntityKind, TargetEntity, Transaction, UserRef};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error("unresolved reference to run-local id {id} while writing a {kind}")]
    Unresolved { kind: EntityKind, id: u32 },
}

#[derive(Debug, Default)]
pub struct PersistReport {
    pub written: BTreeMap<EntityKind, usize>,
}

/// Insert order: referenced tables first. Entities of equal rank keep their
/// pipeline order.
fn persist_rank(kind: EntityKind) -> u16 {
    match kind {
        EntityKind::Site => 0,
        EntityKind::Address => 10,
        EntityKind::Subnet => 10,
        EntityKind::Building => 20,
        EntityKind::Room => 30,
        EntityKind::Host => 40,
        EntityKind::Switch => 50,
        EntityKind::SwitchPort => 60,
        EntityKind::PatchPort => 70,
        EntityKind::RoomLogEntry => 70,
        EntityKind::FinanceAccount => 80,
        EntityKind::User => 90,
        EntityKind::UnixAccount => 100,
        EntityKind::UserRoomAttachment => 100,
        EntityKind::Membership => 100,
        EntityKind::Transaction => 110,
        EntityKind::BankAccountActivity => 120,
    }
}

/// Remaps run-local ids to database ids. A single id space is shared by all
/// entity kinds, so one map suffices.
#[derive(Default)]
struct DbIds {
    map: HashMap<u32, i64>,
}

impl DbIds {
    fn record(&mut self, run_id: u32, db_id: i64) {
        self.map.insert(run_id, db_id);
    }

    fn resolve(&self, kind: EntityKind, run_id: u32) -> Result<i64, PersistError> {
        self.map
            .get(&run_id)
            .copied()
            .ok_or(PersistError::Unresolved { kind, id: run_id })
    }

    fn account(&self, reference: AccountRef) -> Result<i64, PersistError> {
        match reference {
            AccountRef::Created(id) => self.resolve(EntityKind::FinanceAccount, id.0),
            AccountRef::Existing(id) => Ok(id),
        }
    }

    fn user(&self, reference: UserRef) -> Result<i64, PersistError> {
        match reference {
            UserRef::Created(id) => self.resolve(EntityKind::User, id.0),
            UserRef::Existing(id) => Ok(id),
        }
    }
}

pub async fn persist_objects(
    pool: &PgPool,
    objects: &ObjectRegistry,
) -> Result<PersistReport, PersistError> {
    let mut ordered: Vec<&TargetEntity> = objects.iter()?.collect();
    ordered.sort_by_key(|entity| persist_rank(entity.kind()));

    let mut tx = pool.begin().await?;
    let mut ids = DbIds::default();
    let mut report = PersistReport::default();

    for entity in ordered {
        write_entity(&mut tx, &mut ids, entity).await?;
        *report.written.entry(entity.kind()).or_insert(0) += 1;
    }

    tx.commit().await?;
    info!(
        event = "persist_done",
        objects = objects.len(),
        kinds = report.written.len(),
    );
    Ok(report)
}

async fn write_entity(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ids: &mut DbIds,
    entity: &TargetEntity,
) -> Result<(), PersistError> {
    match entity {
        TargetEntity::Site(site) => {
            let row = sqlx::query("INSERT INTO site (name) VALUES ($1) RETURNING id")
                .bind(&site.name)
                .fetch_one(&mut **tx)
                .await?;
            ids.record(site.id.0, row.try_get::<i32, _>("id")?.into());
        }
        TargetEntity::Address(address) => {
            let row = sqlx::query(
                "INSERT INTO address (street, number, addition, zip_code, city, state, country) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
            )
            .bind(&address.street)
            .bind(&address.number)
            .bind(&address.addition)
            .bind(&address.zip_code)
            .bind(&address.city)
            .bind(&address.state)
            .bind(&address.country)
            .fetch_one(&mut **tx)
            .await?;
            ids.record(address.id.0, row.try_get::<i32, _>("id")?.into());
        }
        TargetEntity::Subnet(subnet) => {
            let row = sqlx::query(
                "INSERT INTO subnet (description, cidr, gateway, vlan_id) \
                 VALUES ($1, $2::cidr, $3::inet, $4) RETURNING id",
            )
            .bind(&subnet.description)
            .bind(&subnet.cidr)
            .bind(&subnet.gateway)
            .bind(subnet.vlan_id)
            .fetch_one(&mut **tx)
            .await?;
            ids.record(subnet.id.0, row.try_get::<i32, _>("id")?.into());
        }
        TargetEntity::Building(building) => {
            let site = ids.resolve(EntityKind::Site, building.site.0)?;
            let row = sqlx::query(
                "INSERT INTO building (site_id, short_name, street, number) \
                 VALUES ($1, $2, $3, $4) RETURNING id",
            )
            .bind(site)
            .bind(&building.short_name)
            .bind(&building.street)
            .bind(&building.number)
            .fetch_one(&mut **tx)
            .await?;
            ids.record(building.id.0, row.try_get::<i32, _>("id")?.into());
        }
        TargetEntity::Room(room) => {
            let building = ids.resolve(EntityKind::Building, room.building.0)?;
            let address = ids.resolve(EntityKind::Address, room.address.0)?;
            let row = sqlx::query(
                "INSERT INTO room (building_id, level, number, inhabitable, address_id) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING id",
            )
            .bind(building)
            .bind(room.level)
            .bind(&room.number)
            .bind(room.inhabitable)
            .bind(address)
            .fetch_one(&mut **tx)
            .await?;
            ids.record(room.id.0, row.try_get::<i32, _>("id")?.into());
        }
        TargetEntity::Host(host) => {
            let room = ids.resolve(EntityKind::Room, host.room.0)?;
            let row = sqlx::query(
                "INSERT INTO host (name, room_id) VALUES ($1, $2) RETURNING id",
            )
            .bind(&host.name)
            .bind(room)
            .fetch_one(&mut **tx)
            .await?;
            ids.record(host.id.0, row.try_get::<i32, _>("id")?.into());
        }
        TargetEntity::Switch(switch) => {
            let host = ids.resolve(EntityKind::Host, switch.host.0)?;
            let row = sqlx::query(
                "INSERT INTO switch (host_id, name, management_ip) \
                 VALUES ($1, $2, $3::inet) RETURNING host_id",
            )
            .bind(host)
            .bind(&switch.name)
            .bind(&switch.management_ip)
            .fetch_one(&mut **tx)
            .await?;
            ids.record(switch.id.0, row.try_get::<i32, _>("host_id")?.into());
        }
        TargetEntity::SwitchPort(port) => {
            let switch = ids.resolve(EntityKind::Switch, port.switch.0)?;
            let row = sqlx::query(
                "INSERT INTO switch_port (switch_id, name) VALUES ($1, $2) RETURNING id",
            )
            .bind(switch)
            .bind(&port.name)
            .fetch_one(&mut **tx)
            .await?;
            ids.record(port.id.0, row.try_get::<i32, _>("id")?.into());
        }
        TargetEntity::PatchPort(port) => {
            let room = ids.resolve(EntityKind::Room, port.room.0)?;
            let switch_port = ids.resolve(EntityKind::SwitchPort, port.switch_port.0)?;
            sqlx::query(
                "INSERT INTO patch_port (name, room_id, switch_port_id) VALUES ($1, $2, $3)",
            )
            .bind(&port.name)
            .bind(room)
            .bind(switch_port)
            .execute(&mut **tx)
            .await?;
        }
        TargetEntity::RoomLogEntry(entry) => {
            let room = ids.resolve(EntityKind::Room, entry.room.0)?;
            sqlx::query(
                "INSERT INTO room_log_entry (room_id, message, created_at) VALUES ($1, $2, $3)",
            )
            .bind(room)
            .bind(&entry.message)
            .bind(entry.created_at)
            .execute(&mut **tx)
            .await?;
        }
        TargetEntity::FinanceAccount(account) => {
            let kind = match account.kind {
                super::FinanceAccountKind::UserAsset => "user_asset",
                super::FinanceAccountKind::LegacyPlaceholder => "legacy_placeholder",
            };
            let row = sqlx::query(
                "INSERT INTO account (name, type) VALUES ($1, $2) RETURNING id",
            )
            .bind(&account.name)
            .bind(kind)
            .fetch_one(&mut **tx)
            .await?;
            ids.record(account.id.0, row.try_get::<i32, _>("id")?.into());
        }
        TargetEntity::User(user) => {
            let account = ids.resolve(EntityKind::FinanceAccount, user.account.0)?;
            let room = match user.room {
                Some(room) => Some(ids.resolve(EntityKind::Room, room.0)?),
                None => None,
            };
            let address = match user.address {
                Some(address) => Some(ids.resolve(EntityKind::Address, address.0)?),
                None => None,
            };
            let row = sqlx::query(
                "INSERT INTO \"user\" (login, name, email, registered_at, birthdate, \
                                       room_id, address_id, account_id) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING id",
            )
            .bind(&user.login)
            .bind(&user.name)
            .bind(&user.email)
            .bind(user.registered_at)
            .bind(user.birthdate)
            .bind(room)
            .bind(address)
            .bind(account)
            .fetch_one(&mut **tx)
            .await?;
            ids.record(user.id.0, row.try_get::<i32, _>("id")?.into());
        }
        TargetEntity::UnixAccount(unix) => {
            let user = ids.resolve(EntityKind::User, unix.user.0)?;
            sqlx::query(
                "INSERT INTO unix_account (user_id, uid, gid, home_directory, login_shell) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(user)
            .bind(unix.uid)
            .bind(unix.gid)
            .bind(&unix.home_directory)
            .bind(&unix.login_shell)
            .execute(&mut **tx)
            .await?;
        }
        TargetEntity::UserRoomAttachment(attachment) => {
            let room = ids.resolve(EntityKind::Room, attachment.room.0)?;
            let address = ids.resolve(EntityKind::Address, attachment.address.0)?;
            sqlx::query("UPDATE \"user\" SET room_id = $1, address_id = $2 WHERE id = $3")
                .bind(room)
                .bind(address)
                .bind(attachment.user)
                .execute(&mut **tx)
                .await?;
        }
        TargetEntity::Membership(membership) => {
            let user = ids.user(membership.user)?;
            sqlx::query(
                "INSERT INTO membership (user_id, group_name, starts_at, ends_at) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(user)
            .bind(&membership.group)
            .bind(membership.starts_at)
            .bind(membership.ends_at)
            .execute(&mut **tx)
            .await?;
        }
        TargetEntity::Transaction(transaction) => {
            write_transaction(tx, ids, transaction).await?;
        }
        TargetEntity::BankAccountActivity(activity) => {
            let split = match activity.split {
                Some(id) => Some(ids.resolve(EntityKind::BankAccountActivity, id.0)?),
                None => None,
            };
            sqlx::query(
                "INSERT INTO bank_account_activity \
                 (bank_account_id, amount, reference, other_name, posted_on, split_id) \
                 VALUES ($1, $2 / 100.0, $3, $4, $5, $6)",
            )
            .bind(activity.bank_account)
            .bind(activity.amount_cents)
            .bind(&activity.reference)
            .bind(&activity.other_name)
            .bind(activity.posted_on)
            .bind(split)
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}

async fn write_transaction(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ids: &mut DbIds,
    transaction: &Transaction,
) -> Result<(), PersistError> {
    let row = sqlx::query(
        "INSERT INTO transaction (description, valid_on, posted_at) \
         VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(&transaction.description)
    .bind(transaction.valid_on)
    .bind(transaction.posted_at)
    .fetch_one(&mut **tx)
    .await?;
    let db_id: i64 = row.try_get::<i32, _>("id")?.into();
    ids.record(transaction.id.0, db_id);

    for split in transaction.splits() {
        let account = ids.account(split.account)?;
        let row = sqlx::query(
            "INSERT INTO split (transaction_id, account_id, amount) \
             VALUES ($1, $2, $3 / 100.0) RETURNING id",
        )
        .bind(db_id)
        .bind(account)
        .bind(split.amount_cents)
        .fetch_one(&mut **tx)
        .await?;
        ids.record(split.id.0, row.try_get::<i32, _>("id")?.into());
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum DumpError {
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error("failed to write dump: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize object: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Writes every committed object as one json line, for dry-run inspection.
pub fn write_object_dump(path: &Path, objects: &ObjectRegistry) -> Result<usize, DumpError> {
    let file = std::fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);
    let mut written = 0usize;
    for entity in objects.iter()? {
        serde_json::to_writer(&mut writer, entity)?;
        writer.write_all(b"\n")?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}
