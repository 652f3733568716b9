//! Topology reconciliation: rebuilds site → building → room and switch/port
//! wiring from the flat legacy access records.

use tracing::{error, info, warn};

use crate::importer::abort_on_errors;
use crate::importer::context::{BuildingHandle, Context, IntermediateData, RoomHandle};
use crate::importer::error::ImportError;
use crate::target::{
    Address, AddressId, Host, IdMint, PatchPort, Room, RoomLogEntry, Switch, SwitchPort,
    TargetEntity,
};

use super::{DEFAULT_CITY, DEFAULT_COUNTRY};

const STAGE: &str = "translate_topology";

/// Stage-local address pool. Every address generated in this stage is
/// deduplicated against the ones generated before it, by field-wise equality.
#[derive(Default)]
struct AddressBook {
    created: Vec<Address>,
}

impl AddressBook {
    /// Returns the id of an equal existing address or mints a new one.
    ///
    /// Finding more than one equal address means the pool itself already
    /// contains duplicates, which this method rules out; treat it as a
    /// data-integrity violation and fail.
    fn resolve(
        &mut self,
        ids: &mut IdMint,
        candidate: Address,
        context: &str,
    ) -> Result<AddressId, ImportError> {
        let matches: Vec<&Address> = self
            .created
            .iter()
            .filter(|existing| existing.same_place(&candidate))
            .collect();
        match matches.len() {
            0 => {
                let id = ids.mint();
                self.created.push(Address { id, ..candidate });
                Ok(id)
            }
            1 => Ok(matches[0].id),
            n => Err(ImportError::AddressInvariant {
                context: context.to_string(),
                matches: n,
            }),
        }
    }

    fn into_entities(self) -> impl Iterator<Item = TargetEntity> {
        self.created.into_iter().map(TargetEntity::Address)
    }
}

fn building_address(building: &BuildingHandle, addition: String) -> Address {
    Address {
        id: AddressId(0), // replaced on resolve
        street: building.street.clone(),
        number: building.number.clone(),
        addition: Some(addition),
        zip_code: building.zip_code.clone(),
        city: DEFAULT_CITY.to_string(),
        state: None,
        country: DEFAULT_COUNTRY.to_string(),
    }
}

pub fn translate_topology(
    ctx: &Context,
    data: &mut IntermediateData,
) -> Result<Vec<TargetEntity>, ImportError> {
    let mut objs = Vec::new();
    let mut addresses = AddressBook::default();
    let mut errors = 0usize;

    // Switches first: every switch gets a non-inhabitable room and a host.
    for switch in &ctx.source.switches {
        let Some(building) = data.building(&switch.building).cloned() else {
            error!(
                event = "switch_without_building",
                switch = %switch.name,
                building = %switch.building,
            );
            errors += 1;
            continue;
        };
        let address = addresses.resolve(
            &mut data.ids,
            building_address(&building, switch.room_number.clone()),
            &format!("switch {}", switch.name),
        )?;
        let room = Room {
            id: data.ids.mint(),
            building: building.id,
            level: switch.level,
            number: switch.room_number.clone(),
            inhabitable: false,
            address,
        };
        let host = Host {
            id: data.ids.mint(),
            name: format!("switch {}", switch.name),
            room: room.id,
        };
        let new_switch = Switch {
            id: data.ids.mint(),
            host: host.id,
            name: switch.name.clone(),
            management_ip: switch.management_ip.clone(),
        };
        data.insert_switch(&switch.name, new_switch.id)?;
        objs.push(TargetEntity::Room(room));
        objs.push(TargetEntity::Host(host));
        objs.push(TargetEntity::Switch(new_switch));
    }

    let mut unpatched_rooms = 0usize;
    let mut unpatched_ports = 0usize;

    for access in &ctx.source.accesses {
        // Port and room construction are independent attempts; the four
        // combinations of their outcomes decide what gets wired.
        let port = match (&access.switch, &access.port) {
            (Some(switch_name), Some(port_name)) => match data.switch(switch_name) {
                Some(switch) => {
                    let switch_port = SwitchPort {
                        id: data.ids.mint(),
                        switch,
                        name: port_name.clone(),
                    };
                    let id = switch_port.id;
                    objs.push(TargetEntity::SwitchPort(switch_port));
                    Some(id)
                }
                None => {
                    // A named-but-missing switch is always an inconsistency.
                    error!(
                        event = "access_names_unknown_switch",
                        access = access.id,
                        switch = %switch_name,
                    );
                    errors += 1;
                    None
                }
            },
            _ => None,
        };

        let room = match &access.building {
            Some(short_name) => match data.building(short_name).cloned() {
                Some(building) => {
                    match build_room(data, &mut addresses, access, &building)? {
                        Some(room) => {
                            let handle = RoomHandle {
                                room: room.id,
                                address: room.address,
                            };
                            objs.push(TargetEntity::Room(room));
                            Some(handle)
                        }
                        None => None,
                    }
                }
                None => {
                    error!(
                        event = "access_names_unknown_building",
                        access = access.id,
                        building = %short_name,
                    );
                    errors += 1;
                    None
                }
            },
            None => None,
        };

        match (room, port) {
            (Some(room), Some(switch_port)) => {
                let patch_port = PatchPort {
                    id: data.ids.mint(),
                    name: access.port.clone().unwrap_or_default(),
                    room: room.room,
                    switch_port,
                };
                let log_entry = RoomLogEntry {
                    id: data.ids.mint(),
                    room: room.room,
                    message: format!("created from legacy access record {}", access.id),
                    created_at: ctx.now,
                };
                data.insert_access_room(access.id, room)?;
                objs.push(TargetEntity::PatchPort(patch_port));
                objs.push(TargetEntity::RoomLogEntry(log_entry));
            }
            (Some(_), None) => unpatched_rooms += 1,
            (None, Some(_)) => unpatched_ports += 1,
            (None, None) => {
                error!(event = "access_without_room_or_port", access = access.id);
                errors += 1;
            }
        }
    }

    info!(
        event = "topology_summary",
        unpatched_rooms,
        unpatched_ports,
    );
    abort_on_errors(STAGE, errors)?;

    objs.extend(addresses.into_entities());
    Ok(objs)
}

/// Builds the inhabitable room for an access record. A floor that does not
/// parse as an integer is an isolated data defect: warn and skip the room,
/// do not count it towards the abort check.
fn build_room(
    data: &mut IntermediateData,
    addresses: &mut AddressBook,
    access: &crate::source::SourceAccess,
    building: &BuildingHandle,
) -> Result<Option<Room>, ImportError> {
    let raw_floor = access.floor.as_deref().unwrap_or("");
    let level: i32 = match raw_floor.trim().parse() {
        Ok(level) => level,
        Err(_) => {
            warn!(
                event = "access_floor_unparseable",
                access = access.id,
                floor = %raw_floor,
            );
            return Ok(None);
        }
    };
    let number = format!(
        "{}{}",
        access.flat.as_deref().unwrap_or(""),
        access.room.as_deref().unwrap_or(""),
    );
    let address = addresses.resolve(
        &mut data.ids,
        building_address(building, number.clone()),
        &format!("access {}", access.id),
    )?;
    Ok(Some(Room {
        id: data.ids.mint(),
        building: building.id,
        level,
        number,
        inhabitable: true,
        address,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SourceAccess, SourceBuilding, SourceSnapshot, SourceSwitch};
    use crate::target::view::TargetView;
    use crate::target::EntityKind;
    use chrono::Utc;

    fn building() -> SourceBuilding {
        SourceBuilding {
            short_name: "46".into(),
            street: "Hochschulstraße".into(),
            number: "46".into(),
            zip_code: "01069".into(),
        }
    }

    fn switch() -> SourceSwitch {
        SourceSwitch {
            name: "access46".into(),
            building: "46".into(),
            level: 0,
            room_number: "K01".into(),
            management_ip: "10.0.0.1".into(),
        }
    }

    fn access(id: i64) -> SourceAccess {
        SourceAccess {
            id,
            building: Some("46".into()),
            floor: Some("3".into()),
            flat: Some("01".into()),
            room: Some("a".into()),
            switch: Some("access46".into()),
            port: Some("A13".into()),
        }
    }

    fn prepared(source: SourceSnapshot) -> (Context, IntermediateData) {
        let ctx = Context::with_now(source, TargetView::unconnected(), Utc::now());
        let mut data = IntermediateData::default();
        super::super::structure::add_site(&ctx, &mut data).unwrap();
        super::super::structure::translate_buildings(&ctx, &mut data).unwrap();
        (ctx, data)
    }

    fn count(objs: &[TargetEntity], kind: EntityKind) -> usize {
        objs.iter().filter(|o| o.kind() == kind).count()
    }

    #[test]
    fn patched_access_produces_full_wiring() {
        let source = SourceSnapshot {
            buildings: vec![building()],
            switches: vec![switch()],
            accesses: vec![access(1)],
            ..Default::default()
        };
        let (ctx, mut data) = prepared(source);
        let objs = translate_topology(&ctx, &mut data).unwrap();
        assert_eq!(count(&objs, EntityKind::Room), 2); // switch room + access room
        assert_eq!(count(&objs, EntityKind::Switch), 1);
        assert_eq!(count(&objs, EntityKind::SwitchPort), 1);
        assert_eq!(count(&objs, EntityKind::PatchPort), 1);
        assert_eq!(count(&objs, EntityKind::RoomLogEntry), 1);
        assert!(data.access_room(1).is_some());
    }

    #[test]
    fn unparseable_floor_skips_room_without_aborting() {
        let mut bad_access = access(1);
        bad_access.floor = Some("N/A".into());
        let source = SourceSnapshot {
            buildings: vec![building()],
            switches: vec![switch()],
            accesses: vec![bad_access],
            ..Default::default()
        };
        let (ctx, mut data) = prepared(source);
        let objs = translate_topology(&ctx, &mut data).unwrap();
        // The switch room still exists; the access room does not.
        assert_eq!(count(&objs, EntityKind::Room), 1);
        assert_eq!(count(&objs, EntityKind::PatchPort), 0);
        assert!(data.access_room(1).is_none());
    }

    #[test]
    fn unknown_switch_aborts_at_stage_end() {
        let mut bad_access = access(1);
        bad_access.switch = Some("no-such-switch".into());
        let source = SourceSnapshot {
            buildings: vec![building()],
            switches: vec![switch()],
            accesses: vec![bad_access],
            ..Default::default()
        };
        let (ctx, mut data) = prepared(source);
        let err = translate_topology(&ctx, &mut data).unwrap_err();
        assert!(matches!(err, ImportError::Aborted { errors: 1, .. }));
    }

    #[test]
    fn switch_without_building_counts_as_error() {
        let mut lone_switch = switch();
        lone_switch.building = "99".into();
        let source = SourceSnapshot {
            buildings: vec![building()],
            switches: vec![lone_switch],
            ..Default::default()
        };
        let (ctx, mut data) = prepared(source);
        let err = translate_topology(&ctx, &mut data).unwrap_err();
        assert!(matches!(err, ImportError::Aborted { errors: 1, .. }));
    }

    #[test]
    fn equal_addresses_are_deduplicated() {
        // Two accesses into the same flat and room share one address.
        let mut second = access(2);
        second.port = Some("A14".into());
        let source = SourceSnapshot {
            buildings: vec![building()],
            switches: vec![switch()],
            accesses: vec![access(1), second],
            ..Default::default()
        };
        let (ctx, mut data) = prepared(source);
        let objs = translate_topology(&ctx, &mut data).unwrap();
        // One for the switch room, one shared by both access rooms.
        assert_eq!(count(&objs, EntityKind::Address), 2);
    }

    #[test]
    fn address_pool_rejects_multiple_duplicates() {
        let mut book = AddressBook::default();
        let mut ids = IdMint::default();
        let candidate = || Address {
            id: AddressId(0),
            street: "Hochschulstraße".into(),
            number: "46".into(),
            addition: Some("301".into()),
            zip_code: "01069".into(),
            city: DEFAULT_CITY.into(),
            state: None,
            country: DEFAULT_COUNTRY.into(),
        };
        // Seed the pool with a duplicate pair, as a corrupted run would.
        book.created.push(Address {
            id: ids.mint(),
            ..candidate()
        });
        book.created.push(Address {
            id: ids.mint(),
            ..candidate()
        });
        let err = book
            .resolve(&mut ids, candidate(), "access 1")
            .unwrap_err();
        assert!(matches!(
            err,
            ImportError::AddressInvariant { matches: 2, .. }
        ));
    }
}
