//! Deterministic monthly planning-graph generation.
//!
//! One pass over calendar months: cash flow, an annual December settlement
//! through the withdrawal sequencer, then monthly compounding growth, with
//! one ledger entry emitted per month. The pass is strictly sequential and
//! all-or-nothing: a failure aborts the run with no partial graph.

use std::collections::BTreeMap;

use chrono::{Datelike, Months, NaiveDate};
use tracing::{debug, info};

use super::error::{EngineError, Result};
use super::types::{
    AccountBalances, BucketKind, CashStream, HouseholdProfile, IncomeFacts, Person,
    PlanningGraphEntry, Scenario,
};
use super::withdrawal::{TOLERANCE, optimize_withdrawals};

/// Horizon when the primary person has no birth date.
const FALLBACK_HORIZON_MONTHS: u32 = 360;

/// Generates the full monthly ledger for a scenario.
///
/// `as_of` anchors the projection start and the inflation base; it is an
/// explicit parameter so regeneration is deterministic and testable.
pub fn generate_planning_graph(
    scenario: &Scenario,
    as_of: NaiveDate,
) -> Result<Vec<PlanningGraphEntry>> {
    validate_scenario(scenario)?;

    let start = first_of_month(as_of);
    let end = horizon_end(scenario, start);
    let monthly_inflation = monthly_rate(scenario.assumptions.inflation_rate);
    let monthly_growth = monthly_rate(scenario.assumptions.portfolio_return);

    let mut balances = AccountBalances::from_accounts(&scenario.accounts);
    let mut entries = Vec::new();
    let mut year_income = 0.0;
    let mut year_expense = 0.0;

    let mut date = start;
    let mut month_index: u32 = 0;
    while date <= end {
        let income = monthly_stream_total(&scenario.income_streams, date);
        let expense =
            monthly_stream_total(&scenario.expense_streams, date) * inflation_factor(monthly_inflation, month_index);
        year_income += income;
        year_expense += expense;

        let mut withdrawals: BTreeMap<BucketKind, f64> = BTreeMap::new();
        let mut roth_conversion = 0.0;
        let mut federal_tax = 0.0;
        let mut state_tax = 0.0;
        let mut irmaa = 0.0;
        let mut niit = 0.0;
        let mut total_tax = 0.0;
        let mut notes = String::new();

        if date.month() == scenario.assumptions.settlement_month {
            let facts = IncomeFacts {
                ordinary_income: year_income,
                ..IncomeFacts::default()
            };
            let profile = household_profile(scenario, date);
            let plan = optimize_withdrawals(
                &balances,
                year_expense,
                &facts,
                &scenario.assumptions.withdrawal,
                &profile,
            )
            .map_err(|err| EngineError::ProjectionAborted {
                scenario_id: scenario.id.clone(),
                month_index,
                message: err.to_string(),
            })?;

            for (&bucket, &amount) in &plan.gross_withdrawals {
                let taken = balances.withdraw(bucket, amount);
                withdrawals.insert(bucket, taken);
            }
            roth_conversion = balances.convert_to_roth(plan.roth_conversion);
            federal_tax = plan.tax.federal_tax;
            state_tax = plan.tax.state_tax;
            irmaa = plan.tax.irmaa.total_annual;
            niit = plan.tax.niit;
            total_tax = plan.tax.total_tax;

            notes.push_str("annual settlement");
            if plan.shortfall {
                notes.push_str("; shortfall: balances below required withdrawal");
            }
            if plan.approximate {
                notes.push_str("; approximate: withdrawal solve hit iteration cap");
            }
            if roth_conversion > 0.0 {
                notes.push_str("; roth conversion");
            }
            // Cash on hand for the year: stream income plus withdrawal
            // proceeds, less spending and the settled tax.
            let taken_total: f64 = withdrawals.values().sum();
            let surplus = year_income + taken_total - year_expense - plan.tax.total_tax;
            // Residue within the solver's dollar tolerance is not a surplus.
            if surplus > TOLERANCE {
                balances.deposit(BucketKind::Taxable, surplus);
                notes.push_str("; surplus swept to taxable");
            }

            debug!(
                scenario = %scenario.id,
                month_index,
                total_tax,
                gross = plan.total_gross,
                "settlement applied"
            );
            year_income = 0.0;
            year_expense = 0.0;
        }

        balances.apply_growth(monthly_growth);

        entries.push(PlanningGraphEntry {
            month_index,
            date,
            balances: balances.snapshot(),
            income_total: income,
            expense_total: expense,
            withdrawals,
            roth_conversion,
            federal_tax,
            state_tax,
            irmaa,
            niit,
            total_tax,
            primary_age: scenario.primary().and_then(|p| floor_age(p, date)),
            spouse_age: scenario.spouse().and_then(|p| floor_age(p, date)),
            notes,
        });

        date = next_month(date, scenario, month_index)?;
        month_index += 1;
    }

    info!(scenario = %scenario.id, months = entries.len(), "planning graph generated");
    Ok(entries)
}

fn validate_scenario(scenario: &Scenario) -> Result<()> {
    for account in &scenario.accounts {
        if !account.balance.is_finite() || account.balance < 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "scenario {}: account balance must be non-negative",
                scenario.id
            )));
        }
    }
    for stream in scenario
        .income_streams
        .iter()
        .chain(scenario.expense_streams.iter())
    {
        if !stream.amount.is_finite() || stream.amount < 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "scenario {}: stream {:?} amount must be non-negative",
                scenario.id, stream.name
            )));
        }
        if let (Some(start), Some(end)) = (stream.start_date, stream.end_date) {
            if end < start {
                return Err(EngineError::InvalidInput(format!(
                    "scenario {}: stream {:?} ends before it starts",
                    scenario.id, stream.name
                )));
            }
        }
    }
    let assumptions = &scenario.assumptions;
    if !(1..=12).contains(&assumptions.settlement_month) {
        return Err(EngineError::InvalidInput(format!(
            "scenario {}: settlement month must be 1-12",
            scenario.id
        )));
    }
    for (label, rate) in [
        ("inflationRate", assumptions.inflation_rate),
        ("portfolioReturn", assumptions.portfolio_return),
    ] {
        if !rate.is_finite() || rate <= -1.0 {
            return Err(EngineError::InvalidInput(format!(
                "scenario {}: {label} must be a finite rate above -100%",
                scenario.id
            )));
        }
    }
    Ok(())
}

/// Annual rate to the equivalent monthly compounding rate.
fn monthly_rate(annual_rate: f64) -> f64 {
    (1.0 + annual_rate).powf(1.0 / 12.0) - 1.0
}

fn inflation_factor(monthly_inflation: f64, month_index: u32) -> f64 {
    (1.0 + monthly_inflation).powi(month_index as i32)
}

fn monthly_stream_total(streams: &[CashStream], date: NaiveDate) -> f64 {
    streams
        .iter()
        .filter(|stream| stream.active_on(date))
        .map(|stream| stream.frequency.monthly_amount(stream.amount))
        .sum()
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    // Day 1 always exists for a valid year/month.
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
}

/// Projection end: the month of the primary person's 100th birthday, or a
/// fixed fallback horizon when no birth date is known.
fn horizon_end(scenario: &Scenario, start: NaiveDate) -> NaiveDate {
    let fallback = start
        .checked_add_months(Months::new(FALLBACK_HORIZON_MONTHS))
        .unwrap_or(start);
    let Some(birth_date) = scenario.primary().and_then(|p| p.birth_date) else {
        return fallback;
    };
    birth_date
        .checked_add_months(Months::new(1_200))
        .map(first_of_month)
        .map(|end| end.max(start))
        .unwrap_or(fallback)
}

fn next_month(date: NaiveDate, scenario: &Scenario, month_index: u32) -> Result<NaiveDate> {
    date.checked_add_months(Months::new(1))
        .ok_or_else(|| EngineError::ProjectionAborted {
            scenario_id: scenario.id.clone(),
            month_index,
            message: "date overflow advancing to next month".to_string(),
        })
}

/// Standard floor-age convention against the current month's date.
fn floor_age(person: &Person, on: NaiveDate) -> Option<u32> {
    let birth = person.birth_date?;
    if on < birth {
        return Some(0);
    }
    let mut age = on.year() - birth.year();
    if (on.month(), on.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    Some(age.max(0) as u32)
}

fn household_profile(scenario: &Scenario, on: NaiveDate) -> HouseholdProfile {
    HouseholdProfile {
        state: scenario.assumptions.state.clone(),
        filing_status: scenario.assumptions.filing_status,
        tax_year: scenario.assumptions.tax_year,
        primary_age: scenario
            .primary()
            .and_then(|p| floor_age(p, on))
            .unwrap_or(0),
        spouse_age: scenario.spouse().and_then(|p| floor_age(p, on)),
    }
}
