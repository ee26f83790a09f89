mod error;
mod monte_carlo;
mod policy;
mod projection;
mod tax;
mod withdrawal;

pub mod types;

pub use error::{EngineError, Result};
pub use monte_carlo::run_monte_carlo;
pub use policy::TaxPolicy;
pub use projection::generate_planning_graph;
pub use tax::{calculate_tax, ordinary_bracket_headroom};
pub use withdrawal::optimize_withdrawals;
pub use types::{
    Account, AccountBalances, Assumptions, BucketKind, CashStream, FilingStatus, Frequency,
    Goal, HouseholdProfile, IncomeFacts, IrmaaSurcharge, MonteCarloRequest, MonteCarloSummary,
    Person, PlanningGraphEntry, Relationship, Scenario, TaxResult, TaxTreatment, WithdrawalOptions,
    WithdrawalOrder, WithdrawalPlan,
};
