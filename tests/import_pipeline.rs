//! End-to-end pipeline runs against in-memory snapshots.

use chrono::{NaiveDate, TimeZone, Utc};

use hss_importer::importer::{do_import, Context, ImportError};
use hss_importer::source::{
    SourceAccess, SourceAccount, SourceBuilding, SourceDirectoryEntry, SourceFeeEntry,
    SourceSnapshot, SourceStatementLine, SourceSubnet, SourceSwitch,
};
use hss_importer::target::view::TargetView;
use hss_importer::target::{AccountRef, EntityKind, TargetEntity, UserRef};

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

fn account(name: &str, access_id: Option<i64>) -> SourceAccount {
    SourceAccount {
        account: name.to_string(),
        name: format!("Member {name}"),
        system_account: false,
        target_login: None,
        entry_date: NaiveDate::from_ymd_opt(2018, 10, 1),
        date_of_birth: None,
        access_id,
        mail: Some(format!("{name}@example.org")),
        directory_entry: Some(SourceDirectoryEntry {
            uid_number: 1234,
            gid_number: 100,
            home_directory: format!("/home/{name}"),
        }),
    }
}

fn full_snapshot() -> SourceSnapshot {
    SourceSnapshot {
        buildings: vec![building()],
        switches: vec![switch()],
        accesses: vec![access(1)],
        accounts: vec![account("tester", Some(1))],
        statement_lines: vec![SourceStatementLine {
            id: 1,
            timestamp: Utc.with_ymd_and_hms(2020, 2, 3, 10, 0, 0).unwrap(),
            amount_cents: 350,
            purpose: "Mitgliedsbeitrag".into(),
            payer: "Member tester".into(),
            account: Some("tester".into()),
            name: None,
        }],
        fees: vec![
            SourceFeeEntry {
                fee_id: 1,
                account: "tester".into(),
                amount_cents: 350,
                description: "Mitgliedsbeitrag 2020-01".into(),
                timestamp: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            },
            SourceFeeEntry {
                fee_id: 2,
                account: "tester".into(),
                amount_cents: 350,
                description: "Mitgliedsbeitrag 2020-02".into(),
                timestamp: Utc.with_ymd_and_hms(2020, 2, 1, 0, 0, 0).unwrap(),
            },
        ],
        subnets: vec![SourceSubnet {
            id: 1,
            description: Some("members".into()),
            cidr: "141.30.226.0/24".into(),
            gateway: Some("141.30.226.1".into()),
            vlan_id: Some(226),
        }],
        ..Default::default()
    }
}

fn run(source: SourceSnapshot) -> Result<Vec<TargetEntity>, ImportError> {
    let ctx = Context::new(source, TargetView::unconnected());
    let objects = do_import(&ctx)?;
    Ok(objects.into_committed().unwrap())
}

fn count(objs: &[TargetEntity], kind: EntityKind) -> usize {
    objs.iter().filter(|o| o.kind() == kind).count()
}

#[test]
fn full_scenario_wires_everything_together() {
    let objs = run(full_snapshot()).unwrap();

    assert_eq!(count(&objs, EntityKind::Site), 1);
    assert_eq!(count(&objs, EntityKind::Building), 1);
    assert_eq!(count(&objs, EntityKind::Subnet), 1);
    // Switch room plus access room.
    assert_eq!(count(&objs, EntityKind::Room), 2);
    assert_eq!(count(&objs, EntityKind::Switch), 1);
    assert_eq!(count(&objs, EntityKind::SwitchPort), 1);
    assert_eq!(count(&objs, EntityKind::PatchPort), 1);
    assert_eq!(count(&objs, EntityKind::User), 1);
    assert_eq!(count(&objs, EntityKind::UnixAccount), 1);
    // Only the user's own asset account; nothing was placeholder-booked.
    assert_eq!(count(&objs, EntityKind::FinanceAccount), 1);

    // The user sits in the room the patch port is wired into.
    let user = objs
        .iter()
        .find_map(|o| match o {
            TargetEntity::User(u) => Some(u),
            _ => None,
        })
        .unwrap();
    let patch_port = objs
        .iter()
        .find_map(|o| match o {
            TargetEntity::PatchPort(p) => Some(p),
            _ => None,
        })
        .unwrap();
    assert_eq!(user.login, "tester");
    assert_eq!(user.room, Some(patch_port.room));

    // One statement transaction, two fee transactions, all two-split balanced.
    let transactions: Vec<_> = objs
        .iter()
        .filter_map(|o| match o {
            TargetEntity::Transaction(t) => Some(t),
            _ => None,
        })
        .collect();
    assert_eq!(transactions.len(), 3);
    for tx in &transactions {
        let [a, b] = tx.splits();
        assert_eq!(a.amount_cents + b.amount_cents, 0);
        assert_ne!(a.account, b.account);
    }
    let activity = objs
        .iter()
        .find_map(|o| match o {
            TargetEntity::BankAccountActivity(a) => Some(a),
            _ => None,
        })
        .unwrap();
    // Attached to a bank-side split of one of the transactions.
    let bank = AccountRef::Existing(activity.bank_account);
    let bank_splits: Vec<_> = transactions
        .iter()
        .filter_map(|t| t.split_for(bank))
        .map(|s| s.id)
        .collect();
    assert!(activity.split.is_some_and(|id| bank_splits.contains(&id)));

    // Two consecutive fee months, the later one current: one open membership.
    let memberships: Vec<_> = objs
        .iter()
        .filter_map(|o| match o {
            TargetEntity::Membership(m) => Some(m),
            _ => None,
        })
        .collect();
    assert_eq!(memberships.len(), 1);
    assert_eq!(
        memberships[0].starts_at,
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
    );
    assert_eq!(memberships[0].ends_at, None);
    assert_eq!(memberships[0].user, UserRef::Created(user.id));
}

#[test]
fn unparseable_floor_skips_the_room_but_completes() {
    let mut source = full_snapshot();
    source.accesses[0].floor = Some("N/A".into());
    // Without a room the account is skipped, so its bookings must go too.
    source.accounts.clear();
    source.statement_lines.clear();
    source.fees.clear();

    let objs = run(source).unwrap();
    // Only the switch room survives, nothing inhabitable.
    assert_eq!(count(&objs, EntityKind::Room), 1);
    assert_eq!(count(&objs, EntityKind::PatchPort), 0);
    assert_eq!(count(&objs, EntityKind::User), 0);
}

#[test]
fn login_collisions_complete_with_suffixed_logins() {
    let mut source = full_snapshot();
    source.accesses.push(access(2));
    source.statement_lines.clear();
    source.fees.clear();
    // Both names sanitize to "tester".
    source.accounts = vec![account("Tester", Some(1)), account("tester", Some(2))];

    let objs = run(source).unwrap();
    let logins: Vec<&str> = objs
        .iter()
        .filter_map(|o| match o {
            TargetEntity::User(u) => Some(u.login.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(logins, vec!["tester", "tester-hss"]);
}

#[test]
fn unknown_switch_reference_aborts_the_run() {
    let mut source = full_snapshot();
    source.accesses[0].switch = Some("no-such-switch".into());
    let err = run(source).unwrap_err();
    assert!(matches!(
        err,
        ImportError::Aborted {
            stage: "translate_topology",
            errors: 1,
        }
    ));
}
