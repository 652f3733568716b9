//! Identity reconciliation: legacy accounts become target users.
//!
//! Three cases per account: fresh account with a topology room (the common
//! case), account explicitly mapped to an already-migrated user, and account
//! with neither room nor mapping (skipped with a warning).

use std::collections::HashSet;

use chrono::NaiveTime;
use tracing::{debug, error, warn};

use crate::importer::abort_on_errors;
use crate::importer::context::{Context, IntermediateData, UserHandle};
use crate::importer::error::ImportError;
use crate::source::SourceAccount;
use crate::target::{
    AccountRef, Address, AddressId, FinanceAccount, FinanceAccountKind, TargetEntity, UnixAccount,
    User, UserRef, UserRoomAttachment,
};

use super::DEFAULT_COUNTRY;

const STAGE: &str = "translate_identity";

/// Prefix glued onto logins that would otherwise start with a digit.
pub(crate) const LOGIN_PREFIX: &str = "hss-user-";
/// Suffix resolving login and home-directory collisions against the target.
pub(crate) const COLLISION_SUFFIX: &str = "-hss";
/// Legacy uids are moved into a reserved range on the target side.
pub(crate) const UID_OFFSET: i64 = 10000;
/// Known-broken legacy account, skipped by policy rather than migrated.
pub(crate) const POISON_ACCOUNT: &str = "hss-tmp";

const LOGIN_SHELL: &str = "/bin/bash";
const MAX_LOGIN_LEN: usize = 22;

/// Turns a legacy account name into a target-legal login. Idempotent.
pub fn sanitize_login(raw: &str) -> String {
    let mut login = raw.to_lowercase().replace('_', "-");
    if login.starts_with(|c: char| c.is_ascii_digit()) {
        login.insert_str(0, LOGIN_PREFIX);
    }
    login.trim_end_matches(['.', '-']).to_string()
}

/// Repairs a mail address with a dot directly before the `@`, which the
/// target side rejects; the dot becomes an underscore.
pub fn repair_email(raw: &str) -> String {
    raw.replace(".@", "_@")
}

/// Target-side login constraint, checked before a user row is built.
pub fn valid_login(login: &str) -> bool {
    let Some(first) = login.chars().next() else {
        return false;
    };
    first.is_ascii_lowercase()
        && login.len() <= MAX_LOGIN_LEN
        && !login.ends_with(['.', '-'])
        && login
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-')
}

pub fn translate_identity(
    ctx: &Context,
    data: &mut IntermediateData,
) -> Result<Vec<TargetEntity>, ImportError> {
    let mut objs = Vec::new();
    let mut errors = 0usize;
    let mut minted_logins: HashSet<String> = HashSet::new();
    let mut minted_homes: HashSet<String> = HashSet::new();

    for account in &ctx.source.accounts {
        if account.system_account {
            debug!(event = "system_account_skipped", account = %account.account);
            continue;
        }
        if account.account == POISON_ACCOUNT {
            warn!(
                event = "poison_account_skipped",
                account = %account.account,
            );
            continue;
        }

        // Case 2: already mapped to an existing target user.
        if let Some(target_login) = &account.target_login {
            match ctx.target.users_by_login.get(target_login) {
                Some(existing) => {
                    data.insert_user(
                        &account.account,
                        UserHandle {
                            user: UserRef::Existing(existing.id),
                            finance_account: AccountRef::Existing(existing.finance_account),
                        },
                    )?;
                    if !existing.has_room {
                        if let Some(room) =
                            account.access_id.and_then(|id| data.access_room(id))
                        {
                            objs.push(TargetEntity::UserRoomAttachment(UserRoomAttachment {
                                user: existing.id,
                                room: room.room,
                                address: room.address,
                            }));
                        }
                    }
                }
                None => {
                    error!(
                        event = "mapped_user_missing",
                        account = %account.account,
                        login = %target_login,
                    );
                    errors += 1;
                }
            }
            continue;
        }

        let room = account.access_id.and_then(|id| data.access_room(id));
        let address = match room {
            Some(room) => Some(room.address),
            None => external_address(ctx, data, account, &mut objs)?,
        };
        // Case 3: nothing to hang the user onto.
        if address.is_none() {
            warn!(
                event = "account_without_room_or_mapping",
                account = %account.account,
            );
            continue;
        }

        // Case 1: build the user, its finance account, and maybe a unix account.
        let mut login = sanitize_login(&account.account);
        if ctx.target.logins.contains(&login) || minted_logins.contains(&login) {
            login.push_str(COLLISION_SUFFIX);
        }
        if ctx.target.logins.contains(&login) || minted_logins.contains(&login) {
            error!(event = "login_collision_unresolvable", login = %login);
            errors += 1;
            continue;
        }
        if !valid_login(&login) {
            error!(
                event = "login_rejected",
                account = %account.account,
                login = %login,
            );
            errors += 1;
            continue;
        }
        minted_logins.insert(login.clone());

        let finance_account = FinanceAccount {
            id: data.ids.mint(),
            name: format!("user account {login}"),
            kind: FinanceAccountKind::UserAsset,
        };
        let registered_at = account
            .entry_date
            .map(|date| date.and_time(NaiveTime::MIN).and_utc())
            .unwrap_or(ctx.now);
        let user = User {
            id: data.ids.mint(),
            login,
            name: account.name.clone(),
            email: account.mail.as_deref().map(repair_email),
            registered_at,
            birthdate: account.date_of_birth,
            room: room.map(|r| r.room),
            address,
            account: finance_account.id,
        };

        if let Some(directory) = &account.directory_entry {
            let mut home = directory.home_directory.clone();
            if ctx.target.home_directories.contains(&home) || minted_homes.contains(&home) {
                home.push_str(COLLISION_SUFFIX);
            }
            if ctx.target.home_directories.contains(&home) || minted_homes.contains(&home) {
                error!(event = "home_collision_unresolvable", home = %home);
                errors += 1;
            } else {
                minted_homes.insert(home.clone());
                objs.push(TargetEntity::UnixAccount(UnixAccount {
                    id: data.ids.mint(),
                    user: user.id,
                    uid: directory.uid_number + UID_OFFSET,
                    gid: directory.gid_number,
                    home_directory: home,
                    login_shell: LOGIN_SHELL.to_string(),
                }));
            }
        }

        data.insert_user(
            &account.account,
            UserHandle {
                user: UserRef::Created(user.id),
                finance_account: AccountRef::Created(finance_account.id),
            },
        )?;
        objs.push(TargetEntity::User(user));
        objs.push(TargetEntity::FinanceAccount(finance_account));
    }

    abort_on_errors(STAGE, errors)?;
    Ok(objs)
}

/// Accounts without a topology room may still carry an external residence;
/// its address substitutes for the room address.
fn external_address(
    ctx: &Context,
    data: &mut IntermediateData,
    account: &SourceAccount,
    objs: &mut Vec<TargetEntity>,
) -> Result<Option<AddressId>, ImportError> {
    if let Some(existing) = data.external_address(&account.account) {
        return Ok(Some(existing));
    }
    let Some(residence) = ctx.source.residence(&account.account) else {
        return Ok(None);
    };
    let address = Address {
        id: data.ids.mint(),
        street: residence.street.clone(),
        number: String::new(),
        addition: None,
        zip_code: residence.zip.clone(),
        city: residence.residence.clone(),
        state: None,
        country: DEFAULT_COUNTRY.to_string(),
    };
    data.insert_external_address(&account.account, address.id)?;
    let id = address.id;
    objs.push(TargetEntity::Address(address));
    Ok(Some(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::context::RoomHandle;
    use crate::source::{SourceDirectoryEntry, SourceExternalResidence, SourceSnapshot};
    use crate::target::view::{ExistingUser, TargetView};
    use crate::target::{AddressId, EntityKind, RoomId};
    use chrono::Utc;

    fn account(name: &str, access_id: Option<i64>) -> SourceAccount {
        SourceAccount {
            account: name.to_string(),
            name: format!("Member {name}"),
            system_account: false,
            target_login: None,
            entry_date: None,
            date_of_birth: None,
            access_id,
            mail: None,
            directory_entry: None,
        }
    }

    fn context_with(accounts: Vec<SourceAccount>) -> (Context, IntermediateData) {
        let source = SourceSnapshot {
            accounts,
            ..Default::default()
        };
        let ctx = Context::with_now(source, TargetView::unconnected(), Utc::now());
        let mut data = IntermediateData::default();
        data.insert_access_room(
            1,
            RoomHandle {
                room: RoomId(100),
                address: AddressId(101),
            },
        )
        .unwrap();
        (ctx, data)
    }

    fn count(objs: &[TargetEntity], kind: EntityKind) -> usize {
        objs.iter().filter(|o| o.kind() == kind).count()
    }

    #[test]
    fn sanitize_login_concrete_cases() {
        assert_eq!(sanitize_login("55_user"), "hss-user-55-user");
        assert_eq!(sanitize_login("username-"), "username");
        assert_eq!(sanitize_login("test-user.bar.-"), "test-user.bar");
    }

    #[test]
    fn sanitize_login_is_idempotent() {
        for raw in ["55_user", "username-", "test-user.bar.-", "Plain_Name"] {
            let once = sanitize_login(raw);
            assert_eq!(sanitize_login(&once), once);
        }
    }

    #[test]
    fn repair_email_concrete_cases() {
        assert_eq!(repair_email("user.@foo.bar"), "user_@foo.bar");
        assert_eq!(repair_email("user._@foo.bar"), "user._@foo.bar");
        assert_eq!(repair_email("nor_mal.user@foo.bar"), "nor_mal.user@foo.bar");
    }

    #[test]
    fn login_validation() {
        assert!(valid_login("hss-user-55-user"));
        assert!(valid_login("a"));
        assert!(!valid_login(""));
        assert!(!valid_login("5user"));
        assert!(!valid_login("user-"));
        assert!(!valid_login("user name"));
        assert!(!valid_login("a-very-long-login-name-exceeding-the-limit"));
    }

    #[test]
    fn fresh_account_produces_user_and_finance_account() {
        let (ctx, mut data) = context_with(vec![account("tester", Some(1))]);
        let objs = translate_identity(&ctx, &mut data).unwrap();
        assert_eq!(count(&objs, EntityKind::User), 1);
        assert_eq!(count(&objs, EntityKind::FinanceAccount), 1);
        let handle = data.user("tester").unwrap();
        assert!(matches!(handle.user, UserRef::Created(_)));
    }

    #[test]
    fn colliding_logins_get_the_suffix() {
        // Both sanitize to "user-a".
        let (ctx, mut data) = context_with(vec![
            account("user_a", Some(1)),
            account("User_A", Some(1)),
        ]);
        // Second account needs its own room registration to not be skipped.
        let objs = translate_identity(&ctx, &mut data).unwrap();
        let logins: Vec<&str> = objs
            .iter()
            .filter_map(|o| match o {
                TargetEntity::User(u) => Some(u.login.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(logins, vec!["user-a", "user-a-hss"]);
    }

    #[test]
    fn poison_account_is_skipped() {
        let (ctx, mut data) = context_with(vec![account(POISON_ACCOUNT, Some(1))]);
        let objs = translate_identity(&ctx, &mut data).unwrap();
        assert!(objs.is_empty());
        assert!(data.user(POISON_ACCOUNT).is_none());
    }

    #[test]
    fn account_without_room_or_mapping_is_skipped() {
        let (ctx, mut data) = context_with(vec![account("roomless", None)]);
        let objs = translate_identity(&ctx, &mut data).unwrap();
        assert!(objs.is_empty());
        assert!(data.user("roomless").is_none());
    }

    #[test]
    fn external_residence_substitutes_for_a_room() {
        let mut acc = account("external", None);
        acc.mail = Some("user.@foo.bar".into());
        let source = SourceSnapshot {
            accounts: vec![acc],
            external_residences: vec![SourceExternalResidence {
                account: "external".into(),
                street: "Nöthnitzer Straße 46".into(),
                zip: "01187".into(),
                residence: "Dresden".into(),
            }],
            ..Default::default()
        };
        let ctx = Context::with_now(source, TargetView::unconnected(), Utc::now());
        let mut data = IntermediateData::default();
        let objs = translate_identity(&ctx, &mut data).unwrap();
        assert_eq!(count(&objs, EntityKind::User), 1);
        assert_eq!(count(&objs, EntityKind::Address), 1);
        let user = objs.iter().find_map(|o| match o {
            TargetEntity::User(u) => Some(u),
            _ => None,
        });
        let user = user.unwrap();
        assert!(user.room.is_none());
        assert!(user.address.is_some());
        assert_eq!(user.email.as_deref(), Some("user_@foo.bar"));
    }

    #[test]
    fn mapped_account_attaches_room_to_existing_user() {
        let mut acc = account("oldtimer", Some(1));
        acc.target_login = Some("old-login".into());
        let source = SourceSnapshot {
            accounts: vec![acc],
            ..Default::default()
        };
        let mut target = TargetView::unconnected();
        target.logins.insert("old-login".into());
        target.users_by_login.insert(
            "old-login".into(),
            ExistingUser {
                id: 77,
                login: "old-login".into(),
                has_room: false,
                finance_account: 88,
            },
        );
        let ctx = Context::with_now(source, target, Utc::now());
        let mut data = IntermediateData::default();
        data.insert_access_room(
            1,
            RoomHandle {
                room: RoomId(100),
                address: AddressId(101),
            },
        )
        .unwrap();
        let objs = translate_identity(&ctx, &mut data).unwrap();
        assert_eq!(count(&objs, EntityKind::User), 0);
        assert_eq!(count(&objs, EntityKind::UserRoomAttachment), 1);
        let handle = data.user("oldtimer").unwrap();
        assert!(matches!(handle.user, UserRef::Existing(77)));
        assert!(matches!(handle.finance_account, AccountRef::Existing(88)));
    }

    #[test]
    fn mapped_account_without_target_user_aborts() {
        let mut acc = account("ghost", Some(1));
        acc.target_login = Some("nobody".into());
        let (ctx, mut data) = context_with(vec![acc]);
        let err = translate_identity(&ctx, &mut data).unwrap_err();
        assert!(matches!(err, ImportError::Aborted { errors: 1, .. }));
    }

    #[test]
    fn home_directory_collision_does_not_rename_login() {
        let mut acc = account("tester", Some(1));
        acc.directory_entry = Some(SourceDirectoryEntry {
            uid_number: 1234,
            gid_number: 100,
            home_directory: "/home/tester".into(),
        });
        let source = SourceSnapshot {
            accounts: vec![acc],
            ..Default::default()
        };
        let mut target = TargetView::unconnected();
        target.home_directories.insert("/home/tester".into());
        let ctx = Context::with_now(source, target, Utc::now());
        let mut data = IntermediateData::default();
        data.insert_access_room(
            1,
            RoomHandle {
                room: RoomId(100),
                address: AddressId(101),
            },
        )
        .unwrap();
        let objs = translate_identity(&ctx, &mut data).unwrap();
        let user = objs
            .iter()
            .find_map(|o| match o {
                TargetEntity::User(u) => Some(u),
                _ => None,
            })
            .unwrap();
        assert_eq!(user.login, "tester");
        let unix = objs
            .iter()
            .find_map(|o| match o {
                TargetEntity::UnixAccount(u) => Some(u),
                _ => None,
            })
            .unwrap();
        assert_eq!(unix.home_directory, "/home/tester-hss");
        assert_eq!(unix.uid, 1234 + UID_OFFSET);
    }
}
