//! Withdrawal sequencing: turn a net-of-tax spending target into gross
//! withdrawals per bucket.
//!
//! Drawing from tax-deferred buckets creates ordinary income and therefore
//! more tax, which raises the required gross amount. The circularity is
//! solved as a bounded fixed-point iteration with a dollar tolerance rather
//! than recursion, so termination is guaranteed.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use super::error::Result;
use super::tax::{calculate_tax, ordinary_bracket_headroom};
use super::types::{
    AccountBalances, BucketKind, HouseholdProfile, IncomeFacts, TaxTreatment, WithdrawalOptions,
    WithdrawalOrder, WithdrawalPlan,
};

/// Convergence tolerance on the gross-withdrawal estimate, in dollars.
pub(crate) const TOLERANCE: f64 = 1.0;
/// Cap on fixed-point iterations; hitting it flags the plan approximate.
const MAX_ITERATIONS: u32 = 25;

/// Solves for the withdrawals needed to cover `target_spending` net of tax,
/// beyond the cash provided by `other_income`.
///
/// Insufficient balances are an expected planning outcome: the plan drains
/// every reachable bucket and sets `shortfall` instead of failing.
pub fn optimize_withdrawals(
    balances: &AccountBalances,
    target_spending: f64,
    other_income: &IncomeFacts,
    options: &WithdrawalOptions,
    profile: &HouseholdProfile,
) -> Result<WithdrawalPlan> {
    other_income.validate()?;
    let base_facts = apply_offsets(other_income, options);

    let other_cash = other_income.cash_total();
    let spending_gap = (target_spending.max(0.0) - other_cash).max(0.0);
    let sequence = bucket_sequence(options);

    // Tax is owed on other income even when it covers the whole target, so
    // the required gross is never just the gap.
    let base_tax = calculate_tax(&base_facts, profile)?;
    let mut gross_estimate = spending_gap + base_tax.total_tax;
    let mut iterations = 0;
    let mut converged = gross_estimate == 0.0;

    while iterations < MAX_ITERATIONS && !converged {
        iterations += 1;
        let allocation = allocate(balances, gross_estimate, &sequence);
        let tax = calculate_tax(&facts_with_deferred(&base_facts, &allocation), profile)?;
        let required = spending_gap + tax.total_tax;
        trace!(iteration = iterations, gross_estimate, required, "withdrawal solve step");

        if (required - gross_estimate).abs() <= TOLERANCE {
            gross_estimate = required;
            converged = true;
        } else {
            gross_estimate = required;
        }
    }

    let gross_withdrawals = allocate(balances, gross_estimate, &sequence);
    let total_gross: f64 = gross_withdrawals.values().sum();
    let shortfall = total_gross + TOLERANCE < gross_estimate;
    if !converged {
        debug!(iterations, gross_estimate, "withdrawal solve hit iteration cap");
    }

    // Reported tax must match the reported withdrawals, so recompute from
    // the final allocation before layering on any Roth conversion.
    let mut final_facts = facts_with_deferred(&base_facts, &gross_withdrawals);
    let deferred_withdrawn = final_facts.ordinary_income - base_facts.ordinary_income;
    let roth_conversion = roth_conversion_amount(
        balances,
        deferred_withdrawn,
        &final_facts,
        options,
        profile,
    );
    final_facts.ordinary_income += roth_conversion;
    let tax = calculate_tax(&final_facts, profile)?;

    let net_spending_achieved = other_cash + total_gross - tax.total_tax;

    Ok(WithdrawalPlan {
        gross_withdrawals,
        roth_conversion,
        tax,
        total_gross,
        net_spending_achieved,
        shortfall,
        approximate: !converged,
        iterations,
    })
}

/// Charitable giving offsets ordinary income; harvested losses offset
/// long-term gains. Both floor at zero and apply before the solve.
fn apply_offsets(facts: &IncomeFacts, options: &WithdrawalOptions) -> IncomeFacts {
    let mut adjusted = facts.clone();
    adjusted.ordinary_income =
        (adjusted.ordinary_income - options.charitable_giving.max(0.0)).max(0.0);
    adjusted.long_term_gains =
        (adjusted.long_term_gains - options.tax_loss_harvesting.max(0.0)).max(0.0);
    adjusted
}

/// Bucket priority for allocation. Tax-free buckets move to the back when
/// Roth withdrawals are disallowed, so they are only reached once every
/// other bucket is exhausted.
fn bucket_sequence(options: &WithdrawalOptions) -> Vec<BucketKind> {
    let treatments: [TaxTreatment; 3] = match options.order {
        WithdrawalOrder::TaxableFirst => [
            TaxTreatment::Taxable,
            TaxTreatment::TaxDeferred,
            TaxTreatment::TaxFree,
        ],
        WithdrawalOrder::TaxDeferredFirst => [
            TaxTreatment::TaxDeferred,
            TaxTreatment::Taxable,
            TaxTreatment::TaxFree,
        ],
        WithdrawalOrder::TaxFreeFirst => [
            TaxTreatment::TaxFree,
            TaxTreatment::Taxable,
            TaxTreatment::TaxDeferred,
        ],
    };

    let mut sequence: Vec<BucketKind> = Vec::with_capacity(BucketKind::ALL.len());
    for treatment in treatments {
        if treatment == TaxTreatment::TaxFree && !options.allow_roth_withdrawals {
            continue;
        }
        sequence.extend(
            BucketKind::ALL
                .iter()
                .copied()
                .filter(|bucket| bucket.treatment() == treatment),
        );
    }
    if !options.allow_roth_withdrawals {
        // Last resort only.
        sequence.extend(
            BucketKind::ALL
                .iter()
                .copied()
                .filter(|bucket| bucket.treatment() == TaxTreatment::TaxFree),
        );
    }
    sequence
}

/// Greedy allocation of `gross` across buckets in priority order, capped by
/// each bucket's balance.
fn allocate(
    balances: &AccountBalances,
    gross: f64,
    sequence: &[BucketKind],
) -> BTreeMap<BucketKind, f64> {
    let mut out = BTreeMap::new();
    let mut remaining = gross;
    for &bucket in sequence {
        if remaining <= 0.0 {
            break;
        }
        let take = balances.balance(bucket).min(remaining);
        if take > 0.0 {
            out.insert(bucket, take);
            remaining -= take;
        }
    }
    out
}

fn facts_with_deferred(
    base: &IncomeFacts,
    allocation: &BTreeMap<BucketKind, f64>,
) -> IncomeFacts {
    let deferred: f64 = allocation
        .iter()
        .filter(|(bucket, _)| bucket.treatment() == TaxTreatment::TaxDeferred)
        .map(|(_, amount)| amount)
        .sum();
    let mut facts = base.clone();
    facts.ordinary_income += deferred;
    facts
}

/// Roth conversion bounded by the configured budget, the residual
/// tax-deferred balance, and the remaining ordinary bracket headroom.
fn roth_conversion_amount(
    balances: &AccountBalances,
    deferred_withdrawn: f64,
    facts_after_withdrawal: &IncomeFacts,
    options: &WithdrawalOptions,
    profile: &HouseholdProfile,
) -> f64 {
    let budget = options.roth_conversion_budget.max(0.0);
    if budget <= 0.0 {
        return 0.0;
    }
    let deferred_remaining =
        (balances.total_for(TaxTreatment::TaxDeferred) - deferred_withdrawn).max(0.0);
    let headroom = ordinary_bracket_headroom(facts_after_withdrawal, profile);
    budget.min(deferred_remaining).min(headroom).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FilingStatus;
    use proptest::prelude::*;

    fn profile() -> HouseholdProfile {
        HouseholdProfile {
            state: "AZ".to_string(),
            filing_status: FilingStatus::MarriedJoint,
            tax_year: 2024,
            primary_age: 66,
            spouse_age: Some(64),
        }
    }

    fn balances(taxable: f64, deferred: f64, roth: f64) -> AccountBalances {
        let mut out = AccountBalances::new();
        out.deposit(BucketKind::Taxable, taxable);
        out.deposit(BucketKind::TraditionalIra, deferred);
        out.deposit(BucketKind::RothIra, roth);
        out
    }

    #[test]
    fn taxable_balance_covers_target_without_gross_up() {
        let plan = optimize_withdrawals(
            &balances(200_000.0, 0.0, 0.0),
            60_000.0,
            &IncomeFacts::default(),
            &WithdrawalOptions::default(),
            &profile(),
        )
        .expect("solve succeeds");

        assert!(!plan.shortfall);
        assert!(!plan.approximate);
        // Taxable withdrawals create no income in this model, so the gross
        // equals the gap.
        assert!((plan.total_gross - 60_000.0).abs() <= TOLERANCE);
        assert_eq!(plan.gross_withdrawals.len(), 1);
        assert!(plan.gross_withdrawals.contains_key(&BucketKind::Taxable));
    }

    #[test]
    fn deferred_withdrawals_gross_up_for_taxes_and_converge() {
        let plan = optimize_withdrawals(
            &balances(0.0, 1_000_000.0, 0.0),
            80_000.0,
            &IncomeFacts::default(),
            &WithdrawalOptions::default(),
            &profile(),
        )
        .expect("solve succeeds");

        assert!(!plan.shortfall);
        assert!(!plan.approximate);
        assert!(plan.iterations <= MAX_ITERATIONS);
        assert!(plan.total_gross > 80_000.0);
        // Everything comes out of the deferred bucket.
        assert_eq!(plan.deferred_gross(), plan.total_gross);
        // Net of the computed tax, the plan covers the target within the
        // solver tolerance.
        assert!((plan.net_spending_achieved - 80_000.0).abs() <= 2.0 * TOLERANCE);
    }

    #[test]
    fn other_income_reduces_the_required_gross() {
        let other = IncomeFacts {
            social_security: 40_000.0,
            ..IncomeFacts::default()
        };
        let with_income = optimize_withdrawals(
            &balances(500_000.0, 0.0, 0.0),
            60_000.0,
            &other,
            &WithdrawalOptions::default(),
            &profile(),
        )
        .unwrap();
        let without_income = optimize_withdrawals(
            &balances(500_000.0, 0.0, 0.0),
            60_000.0,
            &IncomeFacts::default(),
            &WithdrawalOptions::default(),
            &profile(),
        )
        .unwrap();
        assert!(with_income.total_gross < without_income.total_gross);
    }

    #[test]
    fn tax_on_other_income_is_withdrawn_even_with_a_zero_gap() {
        // 24k of wages covers the 23k target before tax, but not after.
        let single = HouseholdProfile {
            state: "AZ".to_string(),
            filing_status: FilingStatus::Single,
            tax_year: 2024,
            primary_age: 55,
            spouse_age: None,
        };
        let other = IncomeFacts {
            ordinary_income: 24_000.0,
            ..IncomeFacts::default()
        };
        let plan = optimize_withdrawals(
            &balances(500_000.0, 0.0, 0.0),
            23_000.0,
            &other,
            &WithdrawalOptions::default(),
            &single,
        )
        .expect("solve succeeds");

        assert!(!plan.shortfall);
        // Taxable 9,400 -> federal 940 + AZ 235.
        assert!((plan.tax.total_tax - 1_175.0).abs() < 0.01);
        assert!((plan.total_gross - 1_175.0).abs() <= TOLERANCE);
        assert!(plan.net_spending_achieved >= 23_000.0);
    }

    #[test]
    fn insufficient_balances_produce_a_shortfall_plan() {
        let plan = optimize_withdrawals(
            &balances(10_000.0, 5_000.0, 2_000.0),
            100_000.0,
            &IncomeFacts::default(),
            &WithdrawalOptions::default(),
            &profile(),
        )
        .expect("shortfall is not an error");

        assert!(plan.shortfall);
        // Everything reachable is drained.
        assert!((plan.total_gross - 17_000.0).abs() < 1e-6);
    }

    #[test]
    fn roth_buckets_stay_untouched_when_disallowed_and_unneeded() {
        let options = WithdrawalOptions {
            allow_roth_withdrawals: false,
            ..WithdrawalOptions::default()
        };
        let plan = optimize_withdrawals(
            &balances(100_000.0, 100_000.0, 50_000.0),
            40_000.0,
            &IncomeFacts::default(),
            &options,
            &profile(),
        )
        .unwrap();
        assert!(!plan.gross_withdrawals.contains_key(&BucketKind::RothIra));
    }

    #[test]
    fn roth_buckets_are_last_resort_when_disallowed() {
        let options = WithdrawalOptions {
            allow_roth_withdrawals: false,
            ..WithdrawalOptions::default()
        };
        let plan = optimize_withdrawals(
            &balances(5_000.0, 0.0, 100_000.0),
            30_000.0,
            &IncomeFacts::default(),
            &options,
            &profile(),
        )
        .unwrap();
        assert!(!plan.shortfall);
        assert!(plan.gross_withdrawals[&BucketKind::RothIra] > 0.0);
    }

    #[test]
    fn conversion_respects_budget_and_bracket_headroom() {
        let options = WithdrawalOptions {
            roth_conversion_budget: 500_000.0,
            ..WithdrawalOptions::default()
        };
        let plan = optimize_withdrawals(
            &balances(200_000.0, 300_000.0, 0.0),
            50_000.0,
            &IncomeFacts::default(),
            &options,
            &profile(),
        )
        .unwrap();

        assert!(plan.roth_conversion > 0.0);
        // Headroom-capped well below both the budget and the deferred pot.
        assert!(plan.roth_conversion < 300_000.0);
        // Conversion income is ordinary income in the final tax result.
        assert!(plan.tax.agi >= plan.roth_conversion);
    }

    #[test]
    fn no_conversion_without_budget() {
        let plan = optimize_withdrawals(
            &balances(200_000.0, 300_000.0, 0.0),
            50_000.0,
            &IncomeFacts::default(),
            &WithdrawalOptions::default(),
            &profile(),
        )
        .unwrap();
        assert_eq!(plan.roth_conversion, 0.0);
    }

    #[test]
    fn offsets_reduce_tax_before_the_solve() {
        let other = IncomeFacts {
            ordinary_income: 90_000.0,
            ..IncomeFacts::default()
        };
        let with_offsets = optimize_withdrawals(
            &balances(0.0, 500_000.0, 0.0),
            120_000.0,
            &other,
            &WithdrawalOptions {
                charitable_giving: 20_000.0,
                ..WithdrawalOptions::default()
            },
            &profile(),
        )
        .unwrap();
        let without_offsets = optimize_withdrawals(
            &balances(0.0, 500_000.0, 0.0),
            120_000.0,
            &other,
            &WithdrawalOptions::default(),
            &profile(),
        )
        .unwrap();
        assert!(with_offsets.tax.total_tax < without_offsets.tax.total_tax);
        assert!(with_offsets.total_gross < without_offsets.total_gross);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_gross_withdrawal_monotonic_in_target(
            target_lo in 0u32..150_000,
            bump in 0u32..100_000,
            taxable in 0u32..300_000,
            deferred in 0u32..300_000,
        ) {
            let pots = balances(taxable as f64, deferred as f64, 50_000.0);
            let lo = optimize_withdrawals(
                &pots,
                target_lo as f64,
                &IncomeFacts::default(),
                &WithdrawalOptions::default(),
                &profile(),
            ).unwrap();
            let hi = optimize_withdrawals(
                &pots,
                (target_lo + bump) as f64,
                &IncomeFacts::default(),
                &WithdrawalOptions::default(),
                &profile(),
            ).unwrap();
            prop_assert!(hi.total_gross + 1e-6 >= lo.total_gross);
        }

        #[test]
        fn prop_withdrawals_never_exceed_balances(
            target in 0u32..500_000,
            taxable in 0u32..200_000,
            deferred in 0u32..200_000,
            roth in 0u32..200_000,
        ) {
            let pots = balances(taxable as f64, deferred as f64, roth as f64);
            let plan = optimize_withdrawals(
                &pots,
                target as f64,
                &IncomeFacts::default(),
                &WithdrawalOptions::default(),
                &profile(),
            ).unwrap();
            for (bucket, amount) in &plan.gross_withdrawals {
                prop_assert!(*amount <= pots.balance(*bucket) + 1e-9);
                prop_assert!(*amount >= 0.0);
            }
            prop_assert!(plan.total_gross <= pots.total() + 1e-9);
        }
    }
}
