//! Financial reconstruction: bank statement log lines and fee relations
//! become balanced double-entry transactions.
//!
//! Neither legacy source is double-entry on its own. Statement lines balance
//! against the fixed bank account; fees balance against the configured
//! revenue accounts. Lines whose account is long gone balance against a
//! per-name placeholder account, which a second transaction nets to zero
//! into the dead-memberships revenue account.

use tracing::{error, warn};

use crate::importer::abort_on_errors;
use crate::importer::context::{Context, IntermediateData};
use crate::importer::error::ImportError;
use crate::source::SourceStatementLine;
use crate::target::{
    AccountRef, BankAccountActivity, FinanceAccount, FinanceAccountKind, TargetEntity, Transaction,
};

use super::membership::FeeMonth;

const STAGE: &str = "translate_finance";

pub(crate) const MEMBERSHIP_FEE_PREFIX: &str = "Mitgliedsbeitrag";
pub(crate) const ALLOWANCE_PREFIX: &str = "Aufwandsentschädigung";

#[derive(Debug, PartialEq, Eq)]
enum FeeKind {
    MembershipFee(FeeMonth),
    Allowance,
    /// Everything else is treated as a further membership-type compensation.
    OtherCompensation,
}

fn classify_fee(description: &str) -> Result<FeeKind, String> {
    if let Some(rest) = description.strip_prefix(MEMBERSHIP_FEE_PREFIX) {
        let month = FeeMonth::parse(rest.trim())?;
        Ok(FeeKind::MembershipFee(month))
    } else if description.starts_with(ALLOWANCE_PREFIX) {
        Ok(FeeKind::Allowance)
    } else {
        Ok(FeeKind::OtherCompensation)
    }
}

pub fn translate_finance(
    ctx: &Context,
    data: &mut IntermediateData,
) -> Result<Vec<TargetEntity>, ImportError> {
    let mut objs = Vec::new();
    let mut errors = 0usize;
    let bank = AccountRef::Existing(ctx.config().bank_account);

    for line in &ctx.source.statement_lines {
        let mut activity = BankAccountActivity {
            id: data.ids.mint(),
            bank_account: ctx.config().bank_account,
            amount_cents: line.amount_cents,
            reference: line.purpose.clone(),
            other_name: line.payer.clone(),
            posted_on: line.timestamp.date_naive(),
            split: None,
        };

        let user = line.account.as_deref().and_then(|account| data.user(account));
        match user {
            Some(handle) => {
                let tx = Transaction::balanced(
                    &mut data.ids,
                    statement_description(line),
                    line.timestamp.date_naive(),
                    ctx.now,
                    (handle.finance_account, -line.amount_cents),
                    (bank, line.amount_cents),
                )?;
                activity.split = tx.split_for(bank).map(|s| s.id);
                objs.push(TargetEntity::Transaction(tx));
            }
            None => match line.name.as_deref() {
                Some(name) => {
                    let placeholder = match data.deleted_account(name) {
                        Some(existing) => existing,
                        None => {
                            let account = FinanceAccount {
                                id: data.ids.mint(),
                                name: format!("deleted account {name}"),
                                kind: FinanceAccountKind::LegacyPlaceholder,
                            };
                            data.insert_deleted_account(name, account.id)?;
                            let id = account.id;
                            objs.push(TargetEntity::FinanceAccount(account));
                            id
                        }
                    };
                    let placeholder = AccountRef::Created(placeholder);
                    let tx = Transaction::balanced(
                        &mut data.ids,
                        statement_description(line),
                        line.timestamp.date_naive(),
                        ctx.now,
                        (placeholder, -line.amount_cents),
                        (bank, line.amount_cents),
                    )?;
                    activity.split = tx.split_for(bank).map(|s| s.id);
                    // The departed member holds no value; net the placeholder
                    // to zero against dead-memberships revenue.
                    let netting = Transaction::balanced(
                        &mut data.ids,
                        format!("dead membership {name}"),
                        line.timestamp.date_naive(),
                        ctx.now,
                        (placeholder, line.amount_cents),
                        (
                            AccountRef::Existing(ctx.config().dead_memberships_account),
                            -line.amount_cents,
                        ),
                    )?;
                    objs.push(TargetEntity::Transaction(tx));
                    objs.push(TargetEntity::Transaction(netting));
                }
                None => {
                    warn!(
                        event = "unmatched_statement_line",
                        line = line.id,
                        payer = %line.payer,
                    );
                }
            },
        }
        objs.push(TargetEntity::BankAccountActivity(activity));
    }

    for fee in &ctx.source.fees {
        let Some(handle) = data.user(&fee.account) else {
            error!(
                event = "fee_for_unknown_account",
                fee = fee.fee_id,
                account = %fee.account,
            );
            errors += 1;
            continue;
        };
        let kind = match classify_fee(&fee.description) {
            Ok(kind) => kind,
            Err(detail) => {
                error!(
                    event = "fee_description_malformed",
                    fee = fee.fee_id,
                    description = %fee.description,
                    detail = %detail,
                );
                errors += 1;
                continue;
            }
        };
        let counter = match &kind {
            FeeKind::MembershipFee(month) => {
                data.record_fee_month(&fee.account, *month);
                ctx.config().membership_fee_account
            }
            FeeKind::Allowance => ctx.config().allowance_account,
            FeeKind::OtherCompensation => ctx.config().membership_fee_account,
        };
        let tx = Transaction::balanced(
            &mut data.ids,
            fee.description.clone(),
            fee.timestamp.date_naive(),
            ctx.now,
            (handle.finance_account, fee.amount_cents),
            (AccountRef::Existing(counter), -fee.amount_cents),
        )?;
        objs.push(TargetEntity::Transaction(tx));
    }

    abort_on_errors(STAGE, errors)?;
    Ok(objs)
}

fn statement_description(line: &SourceStatementLine) -> String {
    if line.purpose.is_empty() {
        format!("statement line {}", line.id)
    } else {
        line.purpose.clone()
    }
}
