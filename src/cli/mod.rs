//! Command-line surface for the projection engine.

use std::fs;
use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use crate::core::{
    self, FilingStatus, HouseholdProfile, IncomeFacts, MonteCarloRequest, Result, Scenario,
};

#[derive(Debug, Parser)]
#[command(name = "glidepath", about = "Retirement cash-flow projection engine")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate the monthly planning graph for a scenario file.
    Project {
        /// Path to a scenario JSON file.
        scenario: PathBuf,
        /// Projection start date, YYYY-MM-DD.
        #[arg(long)]
        as_of: NaiveDate,
    },
    /// Run a Monte Carlo portfolio simulation.
    Simulate {
        #[arg(long)]
        initial_value: f64,
        #[arg(long)]
        expected_return: f64,
        #[arg(long)]
        volatility: f64,
        #[arg(long)]
        years: u32,
        #[arg(long, default_value_t = 0.0)]
        annual_contribution: f64,
        #[arg(long, default_value_t = 0.0)]
        annual_withdrawal: f64,
        #[arg(long, default_value_t = 5_000)]
        simulations: u32,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value_t = 0)]
        sample_paths: u32,
        #[arg(long)]
        deadline_ms: Option<u64>,
    },
    /// Compute a single-year tax breakdown for a what-if household.
    Tax {
        #[arg(long)]
        state: String,
        #[arg(long, value_enum)]
        filing_status: CliFilingStatus,
        #[arg(long, default_value_t = 2024)]
        tax_year: i32,
        #[arg(long)]
        age: u32,
        #[arg(long)]
        spouse_age: Option<u32>,
        #[arg(long, default_value_t = 0.0)]
        ordinary: f64,
        #[arg(long, default_value_t = 0.0)]
        capital_gains: f64,
        #[arg(long, default_value_t = 0.0)]
        qualified_dividends: f64,
        #[arg(long, default_value_t = 0.0)]
        social_security: f64,
        #[arg(long, default_value_t = 0.0)]
        municipal_interest: f64,
        #[arg(long, default_value_t = 0.0)]
        roth_distributions: f64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliFilingStatus {
    Single,
    MarriedJoint,
    MarriedSeparate,
    HeadOfHousehold,
}

impl From<CliFilingStatus> for FilingStatus {
    fn from(value: CliFilingStatus) -> Self {
        match value {
            CliFilingStatus::Single => FilingStatus::Single,
            CliFilingStatus::MarriedJoint => FilingStatus::MarriedJoint,
            CliFilingStatus::MarriedSeparate => FilingStatus::MarriedSeparate,
            CliFilingStatus::HeadOfHousehold => FilingStatus::HeadOfHousehold,
        }
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Project { scenario, as_of } => {
            let raw = fs::read_to_string(&scenario)?;
            let scenario: Scenario = serde_json::from_str(&raw)?;
            info!(scenario = %scenario.id, %as_of, "projecting");
            let graph = core::generate_planning_graph(&scenario, as_of)?;
            println!("{}", serde_json::to_string_pretty(&graph)?);
        }
        Command::Simulate {
            initial_value,
            expected_return,
            volatility,
            years,
            annual_contribution,
            annual_withdrawal,
            simulations,
            seed,
            sample_paths,
            deadline_ms,
        } => {
            let request = MonteCarloRequest {
                initial_value,
                expected_return,
                volatility,
                years,
                annual_contribution,
                annual_withdrawal,
                num_simulations: simulations,
                seed,
                sample_paths,
                deadline_ms,
            };
            let summary = core::run_monte_carlo(&request)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Tax {
            state,
            filing_status,
            tax_year,
            age,
            spouse_age,
            ordinary,
            capital_gains,
            qualified_dividends,
            social_security,
            municipal_interest,
            roth_distributions,
        } => {
            let profile = HouseholdProfile {
                state,
                filing_status: filing_status.into(),
                tax_year,
                primary_age: age,
                spouse_age,
            };
            let facts = IncomeFacts {
                ordinary_income: ordinary,
                long_term_gains: capital_gains,
                qualified_dividends,
                social_security,
                municipal_bond_interest: municipal_interest,
                roth_distributions,
            };
            let result = core::calculate_tax(&facts, &profile)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn simulate_args_parse() {
        let cli = Cli::parse_from([
            "glidepath",
            "simulate",
            "--initial-value",
            "1000000",
            "--expected-return",
            "0.07",
            "--volatility",
            "0.15",
            "--years",
            "30",
            "--seed",
            "42",
        ]);
        match cli.command {
            Command::Simulate {
                initial_value,
                years,
                seed,
                simulations,
                ..
            } => {
                assert_eq!(initial_value, 1_000_000.0);
                assert_eq!(years, 30);
                assert_eq!(seed, 42);
                assert_eq!(simulations, 5_000);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn tax_args_parse_with_filing_status() {
        let cli = Cli::parse_from([
            "glidepath",
            "tax",
            "--state",
            "AZ",
            "--filing-status",
            "married-joint",
            "--age",
            "60",
            "--ordinary",
            "100000",
        ]);
        match cli.command {
            Command::Tax {
                state,
                filing_status,
                age,
                ordinary,
                ..
            } => {
                assert_eq!(state, "AZ");
                assert!(matches!(filing_status, CliFilingStatus::MarriedJoint));
                assert_eq!(age, 60);
                assert_eq!(ordinary, 100_000.0);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
