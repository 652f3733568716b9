//! Per-run context and the cross-stage lookup store.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::source::SourceSnapshot;
use crate::target::view::{TargetConfig, TargetView};
use crate::target::{
    AccountRef, AddressId, BuildingId, FinanceAccountId, IdMint, RoomId, SiteId, SubnetId,
    SwitchId, UserRef,
};

use super::error::ImportError;
use super::stages::membership::FeeMonth;

/// Immutable per-run context handed to every stage.
///
/// `now` is captured exactly once at construction, so every entity created in
/// one run shares a single logical creation time.
pub struct Context {
    pub source: SourceSnapshot,
    pub target: TargetView,
    pub now: DateTime<Utc>,
}

impl Context {
    pub fn new(source: SourceSnapshot, target: TargetView) -> Self {
        Self::with_now(source, target, Utc::now())
    }

    pub fn with_now(source: SourceSnapshot, target: TargetView, now: DateTime<Utc>) -> Self {
        Self {
            source,
            target,
            now,
        }
    }

    pub fn config(&self) -> &TargetConfig {
        &self.target.config
    }
}

/// Building entry carrying the fields later stages need to derive addresses.
#[derive(Debug, Clone)]
pub struct BuildingHandle {
    pub id: BuildingId,
    pub street: String,
    pub number: String,
    pub zip_code: String,
}

/// A room together with its address, as registered per access record.
#[derive(Debug, Clone, Copy)]
pub struct RoomHandle {
    pub room: RoomId,
    pub address: AddressId,
}

/// A user together with its finance account.
#[derive(Debug, Clone, Copy)]
pub struct UserHandle {
    pub user: UserRef,
    pub finance_account: AccountRef,
}

/// The shared identity/lookup store.
///
/// Every mapping is append-only for the duration of a run; registering the
/// same key twice means two stages disagree about ownership of that key and
/// is reported as a structural error.
#[derive(Default)]
pub struct IntermediateData {
    pub ids: IdMint,
    site: Option<SiteId>,
    buildings: HashMap<String, BuildingHandle>,
    access_rooms: HashMap<i64, RoomHandle>,
    switches: HashMap<String, SwitchId>,
    users: HashMap<String, UserHandle>,
    external_addresses: HashMap<String, AddressId>,
    deleted_accounts: HashMap<String, FinanceAccountId>,
    // BTreeMap so membership construction iterates deterministically.
    fee_months: BTreeMap<String, Vec<FeeMonth>>,
    subnets: HashMap<String, SubnetId>,
}

fn insert_unique<V>(
    map: &mut HashMap<String, V>,
    name: &'static str,
    key: &str,
    value: V,
) -> Result<(), ImportError> {
    if map.contains_key(key) {
        return Err(ImportError::DuplicateLookupKey {
            map: name,
            key: key.to_string(),
        });
    }
    map.insert(key.to_string(), value);
    Ok(())
}

impl IntermediateData {
    pub fn set_site(&mut self, site: SiteId) -> Result<(), ImportError> {
        if self.site.is_some() {
            return Err(ImportError::DuplicateLookupKey {
                map: "site",
                key: "site".to_string(),
            });
        }
        self.site = Some(site);
        Ok(())
    }

    pub fn site(&self) -> Result<SiteId, ImportError> {
        self.site.ok_or(ImportError::LookupMissing {
            map: "site",
            key: String::new(),
        })
    }

    pub fn insert_building(
        &mut self,
        short_name: &str,
        handle: BuildingHandle,
    ) -> Result<(), ImportError> {
        insert_unique(&mut self.buildings, "buildings", short_name, handle)
    }

    pub fn building(&self, short_name: &str) -> Option<&BuildingHandle> {
        self.buildings.get(short_name)
    }

    pub fn insert_access_room(
        &mut self,
        access_id: i64,
        handle: RoomHandle,
    ) -> Result<(), ImportError> {
        if self.access_rooms.contains_key(&access_id) {
            return Err(ImportError::DuplicateLookupKey {
                map: "access_rooms",
                key: access_id.to_string(),
            });
        }
        self.access_rooms.insert(access_id, handle);
        Ok(())
    }

    pub fn access_room(&self, access_id: i64) -> Option<RoomHandle> {
        self.access_rooms.get(&access_id).copied()
    }

    pub fn insert_switch(&mut self, name: &str, switch: SwitchId) -> Result<(), ImportError> {
        insert_unique(&mut self.switches, "switches", name, switch)
    }

    pub fn switch(&self, name: &str) -> Option<SwitchId> {
        self.switches.get(name).copied()
    }

    pub fn insert_user(&mut self, account: &str, handle: UserHandle) -> Result<(), ImportError> {
        insert_unique(&mut self.users, "users", account, handle)
    }

    pub fn user(&self, account: &str) -> Option<UserHandle> {
        self.users.get(account).copied()
    }

    pub fn insert_external_address(
        &mut self,
        account: &str,
        address: AddressId,
    ) -> Result<(), ImportError> {
        insert_unique(
            &mut self.external_addresses,
            "external_addresses",
            account,
            address,
        )
    }

    pub fn external_address(&self, account: &str) -> Option<AddressId> {
        self.external_addresses.get(account).copied()
    }

    pub fn insert_deleted_account(
        &mut self,
        statement_name: &str,
        account: FinanceAccountId,
    ) -> Result<(), ImportError> {
        insert_unique(
            &mut self.deleted_accounts,
            "deleted_accounts",
            statement_name,
            account,
        )
    }

    pub fn deleted_account(&self, statement_name: &str) -> Option<FinanceAccountId> {
        self.deleted_accounts.get(statement_name).copied()
    }

    /// Months are accumulated, not unique; one account books many fee months.
    pub fn record_fee_month(&mut self, account: &str, month: FeeMonth) {
        self.fee_months
            .entry(account.to_string())
            .or_default()
            .push(month);
    }

    pub fn fee_months(&self) -> &BTreeMap<String, Vec<FeeMonth>> {
        &self.fee_months
    }

    pub fn insert_subnet(&mut self, cidr: &str, subnet: SubnetId) -> Result<(), ImportError> {
        insert_unique(&mut self.subnets, "subnets", cidr, subnet)
    }

    pub fn subnet(&self, cidr: &str) -> Option<SubnetId> {
        self.subnets.get(cidr).copied()
    }
}
