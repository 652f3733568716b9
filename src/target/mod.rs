//! In-memory representation of the entities written to the new schema.
//!
//! The pipeline constructs these from legacy records; persistence happens
//! afterwards (see [`persist`]). Entities reference each other through
//! run-local typed ids minted by [`IdMint`], which [`persist`] later remaps
//! to database ids.

pub mod persist;
pub mod view;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;

macro_rules! entity_id {
    ($($name:ident),+ $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
            pub struct $name(pub u32);

            impl From<u32> for $name {
                fn from(raw: u32) -> Self {
                    Self(raw)
                }
            }
        )+
    };
}

entity_id!(
    SiteId,
    BuildingId,
    AddressId,
    SubnetId,
    RoomId,
    HostId,
    SwitchId,
    SwitchPortId,
    PatchPortId,
    RoomLogEntryId,
    UserId,
    UnixAccountId,
    FinanceAccountId,
    TransactionId,
    SplitId,
    BankActivityId,
    MembershipId,
);

/// Mints run-local ids. A single counter is shared across all kinds so an id
/// value never repeats within one run, which makes log lines unambiguous.
#[derive(Debug, Default)]
pub struct IdMint {
    next: u32,
}

impl IdMint {
    pub fn mint<I: From<u32>>(&mut self) -> I {
        self.next += 1;
        I::from(self.next)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Site {
    pub id: SiteId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Building {
    pub id: BuildingId,
    pub site: SiteId,
    pub short_name: String,
    pub street: String,
    pub number: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Address {
    pub id: AddressId,
    pub street: String,
    pub number: String,
    pub addition: Option<String>,
    pub zip_code: String,
    pub city: String,
    pub state: Option<String>,
    pub country: String,
}

impl Address {
    /// Field-wise equality ignoring the run-local id, used for deduplication.
    pub fn same_place(&self, other: &Address) -> bool {
        self.street == other.street
            && self.number == other.number
            && self.addition == other.addition
            && self.zip_code == other.zip_code
            && self.city == other.city
            && self.state == other.state
            && self.country == other.country
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Subnet {
    pub id: SubnetId,
    pub description: Option<String>,
    pub cidr: String,
    pub gateway: Option<String>,
    pub vlan_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Room {
    pub id: RoomId,
    pub building: BuildingId,
    pub level: i32,
    pub number: String,
    pub inhabitable: bool,
    pub address: AddressId,
}

#[derive(Debug, Clone, Serialize)]
pub struct Host {
    pub id: HostId,
    pub name: String,
    pub room: RoomId,
}

#[derive(Debug, Clone, Serialize)]
pub struct Switch {
    pub id: SwitchId,
    pub host: HostId,
    pub name: String,
    pub management_ip: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwitchPort {
    pub id: SwitchPortId,
    pub switch: SwitchId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatchPort {
    pub id: PatchPortId,
    pub name: String,
    pub room: RoomId,
    pub switch_port: SwitchPortId,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomLogEntry {
    pub id: RoomLogEntryId,
    pub room: RoomId,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Reference to a user that may have been created this run or may already
/// exist in the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "origin", content = "id", rename_all = "snake_case")]
pub enum UserRef {
    Created(UserId),
    Existing(i64),
}

/// Same split for finance accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "origin", content = "id", rename_all = "snake_case")]
pub enum AccountRef {
    Created(FinanceAccountId),
    Existing(i64),
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: UserId,
    pub login: String,
    pub name: String,
    pub email: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub birthdate: Option<NaiveDate>,
    pub room: Option<RoomId>,
    pub address: Option<AddressId>,
    pub account: FinanceAccountId,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnixAccount {
    pub id: UnixAccountId,
    pub user: UserId,
    pub uid: i64,
    pub gid: i64,
    pub home_directory: String,
    pub login_shell: String,
}

/// Deferred relationship: attach a room produced this run to a user that
/// already exists in the target database and has none.
#[derive(Debug, Clone, Serialize)]
pub struct UserRoomAttachment {
    pub user: i64,
    pub room: RoomId,
    pub address: AddressId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinanceAccountKind {
    UserAsset,
    LegacyPlaceholder,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinanceAccount {
    pub id: FinanceAccountId,
    pub name: String,
    pub kind: FinanceAccountKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct Split {
    pub id: SplitId,
    pub account: AccountRef,
    pub amount_cents: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("unbalanced transaction {description:?}: {a} + {b} != 0")]
    Unbalanced { description: String, a: i64, b: i64 },
    #[error("transaction {description:?} books both splits against the same account")]
    SingleAccount { description: String },
}

/// A double-entry transaction. Constructed only through [`Transaction::balanced`],
/// so every instance has exactly two splits with inverse amounts across two
/// distinct accounts.
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub description: String,
    pub valid_on: NaiveDate,
    pub posted_at: DateTime<Utc>,
    splits: [Split; 2],
}

impl Transaction {
    pub fn balanced(
        ids: &mut IdMint,
        description: String,
        valid_on: NaiveDate,
        posted_at: DateTime<Utc>,
        debit: (AccountRef, i64),
        credit: (AccountRef, i64),
    ) -> Result<Self, TransactionError> {
        if debit.1 + credit.1 != 0 {
            return Err(TransactionError::Unbalanced {
                description,
                a: debit.1,
                b: credit.1,
            });
        }
        if debit.0 == credit.0 {
            return Err(TransactionError::SingleAccount { description });
        }
        Ok(Self {
            id: ids.mint(),
            description,
            valid_on,
            posted_at,
            splits: [
                Split {
                    id: ids.mint(),
                    account: debit.0,
                    amount_cents: debit.1,
                },
                Split {
                    id: ids.mint(),
                    account: credit.0,
                    amount_cents: credit.1,
                },
            ],
        })
    }

    pub fn splits(&self) -> &[Split; 2] {
        &self.splits
    }

    /// The split booked against `account`, if any.
    pub fn split_for(&self, account: AccountRef) -> Option<&Split> {
        self.splits.iter().find(|split| split.account == account)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BankAccountActivity {
    pub id: BankActivityId,
    /// Database id of the fixed bank account all statement lines run against.
    pub bank_account: i64,
    pub amount_cents: i64,
    pub reference: String,
    pub other_name: String,
    pub posted_on: NaiveDate,
    /// Bank-side split of the transaction this activity was booked with.
    pub split: Option<SplitId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Membership {
    pub id: MembershipId,
    pub user: UserRef,
    pub group: String,
    pub starts_at: NaiveDate,
    pub ends_at: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Site,
    Building,
    Address,
    Subnet,
    Room,
    Host,
    Switch,
    SwitchPort,
    PatchPort,
    RoomLogEntry,
    User,
    UnixAccount,
    UserRoomAttachment,
    FinanceAccount,
    Transaction,
    BankAccountActivity,
    Membership,
}

impl EntityKind {
    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Site => "Site",
            EntityKind::Building => "Building",
            EntityKind::Address => "Address",
            EntityKind::Subnet => "Subnet",
            EntityKind::Room => "Room",
            EntityKind::Host => "Host",
            EntityKind::Switch => "Switch",
            EntityKind::SwitchPort => "SwitchPort",
            EntityKind::PatchPort => "PatchPort",
            EntityKind::RoomLogEntry => "RoomLogEntry",
            EntityKind::User => "User",
            EntityKind::UnixAccount => "UnixAccount",
            EntityKind::UserRoomAttachment => "UserRoomAttachment",
            EntityKind::FinanceAccount => "FinanceAccount",
            EntityKind::Transaction => "Transaction",
            EntityKind::BankAccountActivity => "BankAccountActivity",
            EntityKind::Membership => "Membership",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum TargetEntity {
    Site(Site),
    Building(Building),
    Address(Address),
    Subnet(Subnet),
    Room(Room),
    Host(Host),
    Switch(Switch),
    SwitchPort(SwitchPort),
    PatchPort(PatchPort),
    RoomLogEntry(RoomLogEntry),
    User(User),
    UnixAccount(UnixAccount),
    UserRoomAttachment(UserRoomAttachment),
    FinanceAccount(FinanceAccount),
    Transaction(Transaction),
    BankAccountActivity(BankAccountActivity),
    Membership(Membership),
}

impl TargetEntity {
    pub fn kind(&self) -> EntityKind {
        match self {
            TargetEntity::Site(_) => EntityKind::Site,
            TargetEntity::Building(_) => EntityKind::Building,
            TargetEntity::Address(_) => EntityKind::Address,
            TargetEntity::Subnet(_) => EntityKind::Subnet,
            TargetEntity::Room(_) => EntityKind::Room,
            TargetEntity::Host(_) => EntityKind::Host,
            TargetEntity::Switch(_) => EntityKind::Switch,
            TargetEntity::SwitchPort(_) => EntityKind::SwitchPort,
            TargetEntity::PatchPort(_) => EntityKind::PatchPort,
            TargetEntity::RoomLogEntry(_) => EntityKind::RoomLogEntry,
            TargetEntity::User(_) => EntityKind::User,
            TargetEntity::UnixAccount(_) => EntityKind::UnixAccount,
            TargetEntity::UserRoomAttachment(_) => EntityKind::UserRoomAttachment,
            TargetEntity::FinanceAccount(_) => EntityKind::FinanceAccount,
            TargetEntity::Transaction(_) => EntityKind::Transaction,
            TargetEntity::BankAccountActivity(_) => EntityKind::BankAccountActivity,
            TargetEntity::Membership(_) => EntityKind::Membership,
        }
    }
}

/// Per-kind counts for log summaries, ordered for reproducible output.
pub fn count_kinds<'a, I>(entities: I) -> BTreeMap<EntityKind, usize>
where
    I: IntoIterator<Item = &'a TargetEntity>,
{
    let mut counts = BTreeMap::new();
    for entity in entities {
        *counts.entry(entity.kind()).or_insert(0) += 1;
    }
    counts
}

/// Renders `{Building: 5, Room: 12}`-style summaries for stage logs.
pub fn kind_summary(counts: &BTreeMap<EntityKind, usize>) -> String {
    let parts: Vec<String> = counts
        .iter()
        .map(|(kind, count)| format!("{kind}: {count}"))
        .collect();
    parts.join(", ")
}
