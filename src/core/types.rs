use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::error::{EngineError, Result};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilingStatus {
    Single,
    #[serde(alias = "marriedJoint", alias = "married_joint")]
    MarriedJoint,
    #[serde(alias = "marriedSeparate", alias = "married_separate")]
    MarriedSeparate,
    #[serde(alias = "headOfHousehold", alias = "head_of_household")]
    HeadOfHousehold,
}

/// Tax treatment of an account bucket.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaxTreatment {
    Taxable,
    TaxDeferred,
    TaxFree,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BucketKind {
    Taxable,
    TraditionalIra,
    Traditional401k,
    RothIra,
    Roth401k,
}

impl BucketKind {
    pub const ALL: [BucketKind; 5] = [
        BucketKind::Taxable,
        BucketKind::TraditionalIra,
        BucketKind::Traditional401k,
        BucketKind::RothIra,
        BucketKind::Roth401k,
    ];

    pub fn treatment(self) -> TaxTreatment {
        match self {
            BucketKind::Taxable => TaxTreatment::Taxable,
            BucketKind::TraditionalIra | BucketKind::Traditional401k => TaxTreatment::TaxDeferred,
            BucketKind::RothIra | BucketKind::Roth401k => TaxTreatment::TaxFree,
        }
    }
}

/// Immutable per-tax-year household facts.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseholdProfile {
    pub state: String,
    pub filing_status: FilingStatus,
    pub tax_year: i32,
    pub primary_age: u32,
    /// Absent for a single filer; never zero-defaulted.
    pub spouse_age: Option<u32>,
}

impl HouseholdProfile {
    /// Number of filers 65 or older, i.e. Medicare-enrolled for IRMAA.
    pub fn medicare_enrolled(&self) -> u32 {
        let mut count = 0;
        if self.primary_age >= 65 {
            count += 1;
        }
        if self.spouse_age.is_some_and(|age| age >= 65) {
            count += 1;
        }
        count
    }
}

/// Income facts for one tax year. All amounts are non-negative dollars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IncomeFacts {
    pub ordinary_income: f64,
    pub long_term_gains: f64,
    pub qualified_dividends: f64,
    pub social_security: f64,
    /// Tax-free but counted toward MAGI for Medicare income tests.
    pub roth_distributions: f64,
    /// Tax-exempt interest; counted toward MAGI and provisional income.
    pub municipal_bond_interest: f64,
}

impl IncomeFacts {
    pub fn validate(&self) -> Result<()> {
        for (label, value) in [
            ("ordinaryIncome", self.ordinary_income),
            ("longTermGains", self.long_term_gains),
            ("qualifiedDividends", self.qualified_dividends),
            ("socialSecurity", self.social_security),
            ("rothDistributions", self.roth_distributions),
            ("municipalBondInterest", self.municipal_bond_interest),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::InvalidInput(format!(
                    "{label} must be a non-negative finite amount, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Cash received during the year, regardless of tax character.
    pub fn cash_total(&self) -> f64 {
        self.ordinary_income
            + self.long_term_gains
            + self.qualified_dividends
            + self.social_security
            + self.roth_distributions
            + self.municipal_bond_interest
    }
}

/// Itemized IRMAA surcharge. `tier` 0 means no surcharge.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IrmaaSurcharge {
    pub tier: usize,
    pub part_b_monthly: f64,
    pub part_d_monthly: f64,
    pub total_annual: f64,
}

/// Derived tax liability breakdown; recomputed per query, never persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxResult {
    pub agi: f64,
    pub magi: f64,
    pub taxable_income: f64,
    pub federal_tax: f64,
    pub state_tax: f64,
    pub irmaa: IrmaaSurcharge,
    pub niit: f64,
    pub total_tax: f64,
    pub effective_rate: f64,
    pub marginal_rate: f64,
}

/// Balances by bucket. Mutations only happen through the methods here:
/// growth, withdrawal, deposit, or Roth conversion.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AccountBalances {
    balances: BTreeMap<BucketKind, f64>,
}

impl AccountBalances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_accounts(accounts: &[Account]) -> Self {
        let mut out = Self::new();
        for account in accounts {
            out.deposit(account.bucket, account.balance.max(0.0));
        }
        out
    }

    pub fn balance(&self, bucket: BucketKind) -> f64 {
        self.balances.get(&bucket).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.balances.values().sum()
    }

    pub fn total_for(&self, treatment: TaxTreatment) -> f64 {
        self.balances
            .iter()
            .filter(|(bucket, _)| bucket.treatment() == treatment)
            .map(|(_, balance)| balance)
            .sum()
    }

    pub fn deposit(&mut self, bucket: BucketKind, amount: f64) {
        if amount > 0.0 {
            *self.balances.entry(bucket).or_insert(0.0) += amount;
        }
    }

    /// Withdraws up to `amount`, capped by the bucket balance; returns the
    /// amount actually withdrawn.
    pub fn withdraw(&mut self, bucket: BucketKind, amount: f64) -> f64 {
        if amount <= 0.0 {
            return 0.0;
        }
        let entry = self.balances.entry(bucket).or_insert(0.0);
        let taken = entry.min(amount);
        *entry -= taken;
        taken
    }

    /// Moves up to `amount` from tax-deferred buckets (IRA first, then 401k)
    /// into the Roth IRA. Returns the amount actually converted.
    pub fn convert_to_roth(&mut self, amount: f64) -> f64 {
        let mut remaining = amount.max(0.0);
        let mut converted = 0.0;
        for bucket in [BucketKind::TraditionalIra, BucketKind::Traditional401k] {
            if remaining <= 0.0 {
                break;
            }
            let taken = self.withdraw(bucket, remaining);
            remaining -= taken;
            converted += taken;
        }
        self.deposit(BucketKind::RothIra, converted);
        converted
    }

    pub fn apply_growth(&mut self, periodic_rate: f64) {
        for balance in self.balances.values_mut() {
            *balance = (*balance * (1.0 + periodic_rate)).max(0.0);
        }
    }

    pub fn snapshot(&self) -> BTreeMap<BucketKind, f64> {
        self.balances.clone()
    }
}

/// Bucket withdrawal priority. Tax-free buckets always sit behind the
/// `allow_roth_withdrawals` gate regardless of the chosen order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WithdrawalOrder {
    #[serde(alias = "taxableFirst", alias = "taxable_first")]
    TaxableFirst,
    #[serde(alias = "taxDeferredFirst", alias = "tax_deferred_first")]
    TaxDeferredFirst,
    #[serde(alias = "taxFreeFirst", alias = "tax_free_first")]
    TaxFreeFirst,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WithdrawalOptions {
    pub order: WithdrawalOrder,
    pub allow_roth_withdrawals: bool,
    pub roth_conversion_budget: f64,
    /// Charitable giving reduces taxable ordinary income before the solve.
    pub charitable_giving: f64,
    /// Harvested losses reduce taxable long-term gains before the solve.
    pub tax_loss_harvesting: f64,
}

impl Default for WithdrawalOptions {
    fn default() -> Self {
        Self {
            order: WithdrawalOrder::TaxableFirst,
            allow_roth_withdrawals: true,
            roth_conversion_budget: 0.0,
            charitable_giving: 0.0,
            tax_loss_harvesting: 0.0,
        }
    }
}

/// Outcome of one annual withdrawal solve.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalPlan {
    pub gross_withdrawals: BTreeMap<BucketKind, f64>,
    pub roth_conversion: f64,
    pub tax: TaxResult,
    pub total_gross: f64,
    pub net_spending_achieved: f64,
    /// Set when available balances could not cover the required gross amount.
    pub shortfall: bool,
    /// Set when the fixed-point solve hit its iteration cap.
    pub approximate: bool,
    pub iterations: u32,
}

impl WithdrawalPlan {
    pub fn deferred_gross(&self) -> f64 {
        self.gross_withdrawals
            .iter()
            .filter(|(bucket, _)| bucket.treatment() == TaxTreatment::TaxDeferred)
            .map(|(_, amount)| amount)
            .sum()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Relationship {
    Primary,
    Spouse,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub name: String,
    pub relationship: Relationship,
    pub birth_date: Option<NaiveDate>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub bucket: BucketKind,
    pub balance: f64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Frequency {
    Monthly,
    Annual,
}

impl Frequency {
    pub fn monthly_amount(self, amount: f64) -> f64 {
        match self {
            Frequency::Monthly => amount,
            Frequency::Annual => amount / 12.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashStream {
    pub name: String,
    pub amount: f64,
    pub frequency: Frequency,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl CashStream {
    pub fn active_on(&self, date: NaiveDate) -> bool {
        self.start_date.is_none_or(|start| start <= date)
            && self.end_date.is_none_or(|end| date <= end)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assumptions {
    pub state: String,
    pub filing_status: FilingStatus,
    pub tax_year: i32,
    /// Annual inflation applied to expense streams.
    pub inflation_rate: f64,
    /// Annual portfolio return, compounded monthly in the projection.
    pub portfolio_return: f64,
    /// Calendar month (1-12) in which withdrawals and taxes settle.
    #[serde(default = "default_settlement_month")]
    pub settlement_month: u32,
    #[serde(default)]
    pub withdrawal: WithdrawalOptions,
}

fn default_settlement_month() -> u32 {
    12
}

/// Goals are carried through the scenario for collaborators; the projection
/// core does not consume them directly.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub name: String,
    pub amount: f64,
    #[serde(default)]
    pub target_date: Option<NaiveDate>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub id: String,
    pub people: Vec<Person>,
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub income_streams: Vec<CashStream>,
    #[serde(default)]
    pub expense_streams: Vec<CashStream>,
    #[serde(default)]
    pub goals: Vec<Goal>,
    pub assumptions: Assumptions,
}

impl Scenario {
    pub fn primary(&self) -> Option<&Person> {
        self.people
            .iter()
            .find(|p| p.relationship == Relationship::Primary)
            .or_else(|| self.people.first())
    }

    pub fn spouse(&self) -> Option<&Person> {
        self.people
            .iter()
            .find(|p| p.relationship == Relationship::Spouse)
    }
}

/// One row of the planning graph. Tax and withdrawal fields are zero outside
/// the settlement month.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningGraphEntry {
    pub month_index: u32,
    pub date: NaiveDate,
    pub balances: BTreeMap<BucketKind, f64>,
    pub income_total: f64,
    pub expense_total: f64,
    pub withdrawals: BTreeMap<BucketKind, f64>,
    pub roth_conversion: f64,
    pub federal_tax: f64,
    pub state_tax: f64,
    pub irmaa: f64,
    pub niit: f64,
    pub total_tax: f64,
    pub primary_age: Option<u32>,
    pub spouse_age: Option<u32>,
    pub notes: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloRequest {
    pub initial_value: f64,
    pub expected_return: f64,
    pub volatility: f64,
    pub years: u32,
    #[serde(default)]
    pub annual_contribution: f64,
    #[serde(default)]
    pub annual_withdrawal: f64,
    pub num_simulations: u32,
    #[serde(default)]
    pub seed: u64,
    /// Number of representative paths to retain for charting.
    #[serde(default)]
    pub sample_paths: u32,
    /// Overall wall-clock cap; paths not started by the deadline are dropped
    /// and the summary is flagged partial.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

impl MonteCarloRequest {
    pub fn validate(&self) -> Result<()> {
        if !self.initial_value.is_finite() || self.initial_value <= 0.0 {
            return Err(EngineError::InvalidInput(
                "initialValue must be positive".to_string(),
            ));
        }
        if !self.expected_return.is_finite() || self.expected_return < 0.0 {
            return Err(EngineError::InvalidInput(
                "expectedReturn must be non-negative".to_string(),
            ));
        }
        if !self.volatility.is_finite() || !(0.0..=1.0).contains(&self.volatility) {
            return Err(EngineError::InvalidInput(
                "volatility must be within [0, 1]".to_string(),
            ));
        }
        if !(1..=100).contains(&self.years) {
            return Err(EngineError::InvalidInput(
                "years must be within [1, 100]".to_string(),
            ));
        }
        if !(100..=50_000).contains(&self.num_simulations) {
            return Err(EngineError::InvalidInput(
                "numSimulations must be within [100, 50000]".to_string(),
            ));
        }
        for (label, value) in [
            ("annualContribution", self.annual_contribution),
            ("annualWithdrawal", self.annual_withdrawal),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::InvalidInput(format!(
                    "{label} must be non-negative"
                )));
            }
        }
        Ok(())
    }
}

/// Aggregate Monte Carlo outcome. `success_rate` is on a 0-1 scale and
/// counts paths whose balance never reached zero.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloSummary {
    pub num_paths: u32,
    pub requested_paths: u32,
    pub success_rate: f64,
    pub median_final_value: f64,
    pub percentile5: f64,
    pub percentile10: f64,
    pub percentile90: f64,
    pub percentile95: f64,
    pub median_first_failure_year: Option<u32>,
    pub max_shortfall: f64,
    pub execution_time_ms: u64,
    pub partial: bool,
    pub sample_paths: Vec<Vec<f64>>,
}
