//! The transformation stages and their registration.
//!
//! Wiring is fixed here at registration time; `build_registry` is the single
//! place that decides which stages exist and how they order.

pub mod finance;
pub mod identity;
pub mod membership;
pub mod structure;
pub mod topology;

use crate::target::EntityKind;

use super::registry::{RegistryError, Stage, TranslationRegistry};

/// City and country every generated address falls into; the legacy schema
/// never stored either because it only ever covered one site.
pub(crate) const DEFAULT_CITY: &str = "Dresden";
pub(crate) const DEFAULT_COUNTRY: &str = "Germany";

pub fn build_registry() -> Result<TranslationRegistry, RegistryError> {
    let mut registry = TranslationRegistry::new();
    registry.register(Stage {
        name: "add_site",
        provides: &[EntityKind::Site],
        requires: &[],
        run: structure::add_site,
    })?;
    registry.register(Stage {
        name: "translate_buildings",
        provides: &[EntityKind::Building],
        requires: &["add_site"],
        run: structure::translate_buildings,
    })?;
    registry.register(Stage {
        name: "translate_subnets",
        provides: &[EntityKind::Subnet],
        requires: &[],
        run: structure::translate_subnets,
    })?;
    registry.register(Stage {
        name: "translate_topology",
        provides: &[
            EntityKind::Room,
            EntityKind::Address,
            EntityKind::Host,
            EntityKind::Switch,
            EntityKind::SwitchPort,
            EntityKind::PatchPort,
            EntityKind::RoomLogEntry,
        ],
        requires: &["translate_buildings"],
        run: topology::translate_topology,
    })?;
    registry.register(Stage {
        name: "translate_identity",
        provides: &[
            EntityKind::User,
            EntityKind::UnixAccount,
            EntityKind::FinanceAccount,
            EntityKind::Address,
            EntityKind::UserRoomAttachment,
        ],
        requires: &["translate_topology"],
        run: identity::translate_identity,
    })?;
    registry.register(Stage {
        name: "translate_finance",
        provides: &[
            EntityKind::Transaction,
            EntityKind::BankAccountActivity,
            EntityKind::FinanceAccount,
        ],
        requires: &["translate_identity"],
        run: finance::translate_finance,
    })?;
    registry.register(Stage {
        name: "translate_memberships",
        provides: &[EntityKind::Membership],
        requires: &["translate_finance"],
        run: membership::translate_memberships,
    })?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_and_orders() {
        let registry = build_registry().unwrap();
        let order = registry.execution_order().unwrap();
        let names: Vec<&str> = order.iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "add_site",
                "translate_buildings",
                "translate_subnets",
                "translate_topology",
                "translate_identity",
                "translate_finance",
                "translate_memberships",
            ]
        );
    }
}
