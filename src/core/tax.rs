//! Stacked-income tax calculator: federal ordinary brackets, capital-gains
//! stacking, state tax, IRMAA, and NIIT.
//!
//! Pure and total over validated non-negative input: business edge cases
//! (zero income, under-65 filers) never error.

use super::error::Result;
use super::policy::{BracketSchedule, StateTaxRule, TaxPolicy};
use super::types::{FilingStatus, HouseholdProfile, IncomeFacts, IrmaaSurcharge, TaxResult};

/// Computes the full tax liability breakdown for one tax year.
pub fn calculate_tax(facts: &IncomeFacts, profile: &HouseholdProfile) -> Result<TaxResult> {
    facts.validate()?;
    let policy = TaxPolicy::for_year(profile.tax_year);

    let taxable_ss = taxable_social_security(facts, profile.filing_status, &policy);
    let agi =
        facts.ordinary_income + facts.long_term_gains + facts.qualified_dividends + taxable_ss;
    // MAGI feeds Medicare income tests only; it never reduces taxable income.
    let magi = agi + facts.municipal_bond_interest + facts.roth_distributions;

    let deduction = policy.standard_deduction(profile.filing_status);
    let taxable_income = (agi - deduction).max(0.0);

    // The deduction offsets ordinary income first, so preferential income
    // retains its full width on top of the stack.
    let preferential = (facts.long_term_gains + facts.qualified_dividends).min(taxable_income);
    let ordinary_taxable = taxable_income - preferential;

    let ordinary_brackets = policy.ordinary_brackets(profile.filing_status);
    let gains_brackets = policy.capital_gains_brackets(profile.filing_status);
    let federal_tax = bracket_tax(ordinary_taxable, ordinary_brackets)
        + stacked_gains_tax(ordinary_taxable, preferential, gains_brackets);

    let state_tax = state_tax(taxable_income, &profile.state, &policy);
    let irmaa = irmaa_surcharge(magi, profile, &policy);
    let niit = net_investment_income_tax(facts, magi, profile.filing_status, &policy);

    let total_tax = federal_tax + state_tax + irmaa.total_annual + niit;
    let effective_rate = if agi > 0.0 {
        (total_tax / agi).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let marginal_rate = marginal_ordinary_rate(agi, ordinary_taxable, deduction, ordinary_brackets);

    Ok(TaxResult {
        agi,
        magi,
        taxable_income,
        federal_tax,
        state_tax,
        irmaa,
        niit,
        total_tax,
        effective_rate,
        marginal_rate,
    })
}

/// Taxable portion of Social Security under the provisional-income rules.
fn taxable_social_security(facts: &IncomeFacts, status: FilingStatus, policy: &TaxPolicy) -> f64 {
    let ss = facts.social_security;
    if ss <= 0.0 {
        return 0.0;
    }

    let other_income =
        facts.ordinary_income + facts.long_term_gains + facts.qualified_dividends;
    let provisional = other_income + facts.municipal_bond_interest + 0.5 * ss;
    let (base, upper) = policy.ss_thresholds(status);

    if provisional <= base {
        0.0
    } else if provisional <= upper {
        (0.5 * (provisional - base)).min(0.5 * ss)
    } else {
        let lower_band = (0.5 * (upper - base)).min(0.5 * ss);
        (0.85 * (provisional - upper) + lower_band).min(0.85 * ss)
    }
}

/// Bottom-up progressive tax over `(upper_bound, rate)` brackets.
fn bracket_tax(amount: f64, brackets: BracketSchedule) -> f64 {
    let mut tax = 0.0;
    let mut lower = 0.0;
    for &(upper, rate) in brackets {
        if amount <= lower {
            break;
        }
        tax += (amount.min(upper) - lower) * rate;
        lower = upper;
    }
    tax
}

/// Tax on preferential income stacked on top of ordinary income: gains are
/// taxed at the capital-gains rate for the slice of total taxable income
/// they occupy, above the ordinary-income baseline.
fn stacked_gains_tax(ordinary_taxable: f64, gains: f64, brackets: BracketSchedule) -> f64 {
    if gains <= 0.0 {
        return 0.0;
    }
    bracket_tax(ordinary_taxable + gains, brackets) - bracket_tax(ordinary_taxable, brackets)
}

fn state_tax(taxable_income: f64, state: &str, policy: &TaxPolicy) -> f64 {
    match policy.state_rule(state) {
        StateTaxRule::NoTax => 0.0,
        StateTaxRule::Flat(rate) => taxable_income * rate,
        StateTaxRule::Brackets(brackets) => bracket_tax(taxable_income, brackets),
    }
}

/// Medicare surcharge from the MAGI tier table. Zero unless at least one
/// filer is 65+. Current-year MAGI stands in for the statutory two-year
/// lookback; that choice is part of the policy contract.
fn irmaa_surcharge(magi: f64, profile: &HouseholdProfile, policy: &TaxPolicy) -> IrmaaSurcharge {
    let enrolled = profile.medicare_enrolled();
    if enrolled == 0 {
        return IrmaaSurcharge::default();
    }

    let tiers = policy.irmaa_tiers(profile.filing_status);
    let tier = tiers
        .iter()
        .position(|row| magi <= row.magi_cap)
        .unwrap_or(tiers.len() - 1);
    let row = &tiers[tier];

    let monthly = row.part_b_monthly + row.part_d_monthly;
    IrmaaSurcharge {
        tier,
        part_b_monthly: row.part_b_monthly,
        part_d_monthly: row.part_d_monthly,
        total_annual: monthly * 12.0 * enrolled as f64,
    }
}

/// 3.8% on the lesser of net investment income and the MAGI excess over the
/// filing-status threshold.
fn net_investment_income_tax(
    facts: &IncomeFacts,
    magi: f64,
    status: FilingStatus,
    policy: &TaxPolicy,
) -> f64 {
    let threshold = policy.niit_threshold(status);
    if magi <= threshold {
        return 0.0;
    }
    let investment_income = facts.long_term_gains + facts.qualified_dividends;
    policy.niit_rate * investment_income.min(magi - threshold)
}

/// Federal rate on the next dollar of ordinary income. Zero while the
/// standard deduction still has headroom.
fn marginal_ordinary_rate(
    agi: f64,
    ordinary_taxable: f64,
    deduction: f64,
    brackets: BracketSchedule,
) -> f64 {
    if agi < deduction {
        return 0.0;
    }
    brackets
        .iter()
        .find(|(upper, _)| ordinary_taxable < *upper)
        .map(|&(_, rate)| rate)
        .unwrap_or_else(|| brackets.last().map(|&(_, rate)| rate).unwrap_or(0.0))
}

/// Headroom to the top of the ordinary bracket the next dollar of ordinary
/// income would land in. Used to cap Roth conversions. Infinite in the top
/// bracket.
pub fn ordinary_bracket_headroom(facts: &IncomeFacts, profile: &HouseholdProfile) -> f64 {
    let policy = TaxPolicy::for_year(profile.tax_year);
    let taxable_ss = taxable_social_security(facts, profile.filing_status, &policy);
    let agi =
        facts.ordinary_income + facts.long_term_gains + facts.qualified_dividends + taxable_ss;
    let taxable_income = (agi - policy.standard_deduction(profile.filing_status)).max(0.0);
    let preferential = (facts.long_term_gains + facts.qualified_dividends).min(taxable_income);
    let ordinary_taxable = taxable_income - preferential;

    policy
        .ordinary_brackets(profile.filing_status)
        .iter()
        .find(|(upper, _)| ordinary_taxable < *upper)
        .map(|&(upper, _)| upper - ordinary_taxable)
        .unwrap_or(f64::INFINITY)
}
