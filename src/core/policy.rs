//! Tax-year policy tables: bracket thresholds, deductions, IRMAA tiers,
//! NIIT thresholds, and state rules, represented as data rather than inline
//! constants. Tables are versioned by tax year; a year with no table set
//! resolves to the nearest known year.

use tracing::debug;

use super::types::FilingStatus;

/// `(upper_bound, rate)` rows, bottom-up; the last row is unbounded.
pub type BracketSchedule = &'static [(f64, f64)];

/// One IRMAA tier: households with MAGI at or below `magi_cap` pay the
/// listed monthly Part B / Part D surcharges per enrolled filer.
#[derive(Copy, Clone, Debug)]
pub struct IrmaaTier {
    pub magi_cap: f64,
    pub part_b_monthly: f64,
    pub part_d_monthly: f64,
}

#[derive(Copy, Clone, Debug)]
pub enum StateTaxRule {
    NoTax,
    Flat(f64),
    Brackets(BracketSchedule),
}

const NO_BRACKET_TOP: f64 = f64::INFINITY;

// Federal ordinary-income brackets, 2024.
const ORDINARY_2024_SINGLE: BracketSchedule = &[
    (11_600.0, 0.10),
    (47_150.0, 0.12),
    (100_525.0, 0.22),
    (191_950.0, 0.24),
    (243_725.0, 0.32),
    (609_350.0, 0.35),
    (NO_BRACKET_TOP, 0.37),
];

const ORDINARY_2024_JOINT: BracketSchedule = &[
    (23_200.0, 0.10),
    (94_300.0, 0.12),
    (201_050.0, 0.22),
    (383_900.0, 0.24),
    (487_450.0, 0.32),
    (731_200.0, 0.35),
    (NO_BRACKET_TOP, 0.37),
];

const ORDINARY_2024_SEPARATE: BracketSchedule = &[
    (11_600.0, 0.10),
    (47_150.0, 0.12),
    (100_525.0, 0.22),
    (191_950.0, 0.24),
    (243_725.0, 0.32),
    (365_600.0, 0.35),
    (NO_BRACKET_TOP, 0.37),
];

const ORDINARY_2024_HEAD: BracketSchedule = &[
    (16_550.0, 0.10),
    (63_100.0, 0.12),
    (100_500.0, 0.22),
    (191_950.0, 0.24),
    (243_700.0, 0.32),
    (609_350.0, 0.35),
    (NO_BRACKET_TOP, 0.37),
];

// Long-term capital gains / qualified dividend brackets, 2024. Evaluated
// against total taxable income so gains stack on top of ordinary income.
const GAINS_2024_SINGLE: BracketSchedule = &[
    (47_025.0, 0.0),
    (518_900.0, 0.15),
    (NO_BRACKET_TOP, 0.20),
];

const GAINS_2024_JOINT: BracketSchedule = &[
    (94_050.0, 0.0),
    (583_750.0, 0.15),
    (NO_BRACKET_TOP, 0.20),
];

const GAINS_2024_SEPARATE: BracketSchedule = &[
    (47_025.0, 0.0),
    (291_850.0, 0.15),
    (NO_BRACKET_TOP, 0.20),
];

const GAINS_2024_HEAD: BracketSchedule = &[
    (63_000.0, 0.0),
    (551_350.0, 0.15),
    (NO_BRACKET_TOP, 0.20),
];

// Medicare IRMAA tiers, 2024. Married-separate uses the single-table
// thresholds as a simplification.
const IRMAA_2024_SINGLE: &[IrmaaTier] = &[
    IrmaaTier {
        magi_cap: 103_000.0,
        part_b_monthly: 0.0,
        part_d_monthly: 0.0,
    },
    IrmaaTier {
        magi_cap: 129_000.0,
        part_b_monthly: 69.90,
        part_d_monthly: 12.90,
    },
    IrmaaTier {
        magi_cap: 161_000.0,
        part_b_monthly: 174.70,
        part_d_monthly: 33.30,
    },
    IrmaaTier {
        magi_cap: 193_000.0,
        part_b_monthly: 279.50,
        part_d_monthly: 53.80,
    },
    IrmaaTier {
        magi_cap: 500_000.0,
        part_b_monthly: 384.30,
        part_d_monthly: 74.20,
    },
    IrmaaTier {
        magi_cap: NO_BRACKET_TOP,
        part_b_monthly: 419.30,
        part_d_monthly: 81.00,
    },
];

const IRMAA_2024_JOINT: &[IrmaaTier] = &[
    IrmaaTier {
        magi_cap: 206_000.0,
        part_b_monthly: 0.0,
        part_d_monthly: 0.0,
    },
    IrmaaTier {
        magi_cap: 258_000.0,
        part_b_monthly: 69.90,
        part_d_monthly: 12.90,
    },
    IrmaaTier {
        magi_cap: 322_000.0,
        part_b_monthly: 174.70,
        part_d_monthly: 33.30,
    },
    IrmaaTier {
        magi_cap: 386_000.0,
        part_b_monthly: 279.50,
        part_d_monthly: 53.80,
    },
    IrmaaTier {
        magi_cap: 750_000.0,
        part_b_monthly: 384.30,
        part_d_monthly: 74.20,
    },
    IrmaaTier {
        magi_cap: NO_BRACKET_TOP,
        part_b_monthly: 419.30,
        part_d_monthly: 81.00,
    },
];

// California brackets (single-filer schedule applied to all statuses).
const CA_BRACKETS: BracketSchedule = &[
    (10_412.0, 0.01),
    (24_684.0, 0.02),
    (38_959.0, 0.04),
    (54_081.0, 0.06),
    (68_350.0, 0.08),
    (349_137.0, 0.093),
    (418_961.0, 0.103),
    (698_271.0, 0.113),
    (NO_BRACKET_TOP, 0.123),
];

// New York brackets (single-filer schedule applied to all statuses).
const NY_BRACKETS: BracketSchedule = &[
    (8_500.0, 0.04),
    (11_700.0, 0.045),
    (13_900.0, 0.0525),
    (80_650.0, 0.055),
    (215_400.0, 0.06),
    (1_077_550.0, 0.0685),
    (NO_BRACKET_TOP, 0.0965),
];

const KNOWN_YEARS: &[i32] = &[2024];

/// Policy constants for one tax year.
#[derive(Copy, Clone, Debug)]
pub struct TaxPolicy {
    pub year: i32,
    pub niit_rate: f64,
}

impl TaxPolicy {
    /// Resolves `year` to the nearest year with a known table set.
    pub fn for_year(year: i32) -> Self {
        let resolved = KNOWN_YEARS
            .iter()
            .copied()
            .min_by_key(|known| (known - year).abs())
            .unwrap_or(2024);
        if resolved != year {
            debug!(requested = year, resolved, "no bracket tables for requested tax year");
        }
        Self {
            year: resolved,
            niit_rate: 0.038,
        }
    }

    pub fn ordinary_brackets(&self, status: FilingStatus) -> BracketSchedule {
        match status {
            FilingStatus::Single => ORDINARY_2024_SINGLE,
            FilingStatus::MarriedJoint => ORDINARY_2024_JOINT,
            FilingStatus::MarriedSeparate => ORDINARY_2024_SEPARATE,
            FilingStatus::HeadOfHousehold => ORDINARY_2024_HEAD,
        }
    }

    pub fn capital_gains_brackets(&self, status: FilingStatus) -> BracketSchedule {
        match status {
            FilingStatus::Single => GAINS_2024_SINGLE,
            FilingStatus::MarriedJoint => GAINS_2024_JOINT,
            FilingStatus::MarriedSeparate => GAINS_2024_SEPARATE,
            FilingStatus::HeadOfHousehold => GAINS_2024_HEAD,
        }
    }

    pub fn standard_deduction(&self, status: FilingStatus) -> f64 {
        match status {
            FilingStatus::Single | FilingStatus::MarriedSeparate => 14_600.0,
            FilingStatus::MarriedJoint => 29_200.0,
            FilingStatus::HeadOfHousehold => 21_900.0,
        }
    }

    /// Social Security provisional-income thresholds `(base, upper)`.
    pub fn ss_thresholds(&self, status: FilingStatus) -> (f64, f64) {
        match status {
            FilingStatus::MarriedJoint => (32_000.0, 44_000.0),
            _ => (25_000.0, 34_000.0),
        }
    }

    pub fn irmaa_tiers(&self, status: FilingStatus) -> &'static [IrmaaTier] {
        match status {
            FilingStatus::MarriedJoint => IRMAA_2024_JOINT,
            _ => IRMAA_2024_SINGLE,
        }
    }

    pub fn niit_threshold(&self, status: FilingStatus) -> f64 {
        match status {
            FilingStatus::Single | FilingStatus::HeadOfHousehold => 200_000.0,
            FilingStatus::MarriedJoint => 250_000.0,
            FilingStatus::MarriedSeparate => 125_000.0,
        }
    }

    /// State income tax rule by two-letter code. Unknown codes fall back to
    /// `NoTax`.
    pub fn state_rule(&self, state: &str) -> StateTaxRule {
        match state.to_ascii_uppercase().as_str() {
            "AZ" => StateTaxRule::Flat(0.025),
            "CO" => StateTaxRule::Flat(0.044),
            "GA" => StateTaxRule::Flat(0.0549),
            "IL" => StateTaxRule::Flat(0.0495),
            "IN" => StateTaxRule::Flat(0.0305),
            "MA" => StateTaxRule::Flat(0.05),
            "MI" => StateTaxRule::Flat(0.0425),
            "NC" => StateTaxRule::Flat(0.045),
            "PA" => StateTaxRule::Flat(0.0307),
            "UT" => StateTaxRule::Flat(0.0465),
            "CA" => StateTaxRule::Brackets(CA_BRACKETS),
            "NY" => StateTaxRule::Brackets(NY_BRACKETS),
            "AK" | "FL" | "NH" | "NV" | "SD" | "TN" | "TX" | "WA" | "WY" => StateTaxRule::NoTax,
            other => {
                debug!(state = other, "unknown state code, assuming no income tax");
                StateTaxRule::NoTax
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_schedule_is_well_formed(schedule: BracketSchedule) {
        let mut prev_upper = 0.0;
        for &(upper, rate) in schedule {
            assert!(upper > prev_upper, "bracket bounds must increase");
            assert!((0.0..=1.0).contains(&rate));
            prev_upper = upper;
        }
        assert_eq!(schedule.last().unwrap().0, f64::INFINITY);
    }

    #[test]
    fn bracket_schedules_are_well_formed() {
        let policy = TaxPolicy::for_year(2024);
        for status in [
            FilingStatus::Single,
            FilingStatus::MarriedJoint,
            FilingStatus::MarriedSeparate,
            FilingStatus::HeadOfHousehold,
        ] {
            assert_schedule_is_well_formed(policy.ordinary_brackets(status));
            assert_schedule_is_well_formed(policy.capital_gains_brackets(status));
        }
        assert_schedule_is_well_formed(CA_BRACKETS);
        assert_schedule_is_well_formed(NY_BRACKETS);
    }

    #[test]
    fn irmaa_tiers_are_monotonic() {
        let policy = TaxPolicy::for_year(2024);
        for status in [FilingStatus::Single, FilingStatus::MarriedJoint] {
            let tiers = policy.irmaa_tiers(status);
            let mut prev_cap = 0.0;
            let mut prev_b = -1.0;
            for tier in tiers {
                assert!(tier.magi_cap > prev_cap);
                assert!(tier.part_b_monthly >= prev_b);
                prev_cap = tier.magi_cap;
                prev_b = tier.part_b_monthly;
            }
            assert_eq!(tiers.first().unwrap().part_b_monthly, 0.0);
        }
    }

    #[test]
    fn unknown_years_resolve_to_nearest_table_set() {
        assert_eq!(TaxPolicy::for_year(2019).year, 2024);
        assert_eq!(TaxPolicy::for_year(2024).year, 2024);
        assert_eq!(TaxPolicy::for_year(2031).year, 2024);
    }

    #[test]
    fn unknown_state_is_treated_as_no_tax() {
        let policy = TaxPolicy::for_year(2024);
        assert!(matches!(policy.state_rule("ZZ"), StateTaxRule::NoTax));
        assert!(matches!(policy.state_rule("az"), StateTaxRule::Flat(_)));
    }
}
