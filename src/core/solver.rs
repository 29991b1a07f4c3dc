use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use super::stats::round_to;
use super::types::{
    GoalSpec, InvestorProfile, Projection, ProjectionInput, Scenario, ScenarioParameters,
    ScenarioTimelines, StatsArchive,
};

/// Projections beyond 100 years are reported as unreachable.
pub const MAX_MONTHS: u32 = 1200;
const RATE_EPSILON: f64 = 1e-12;
const LOG_EPSILON: f64 = 1e-9;

#[derive(Error, Copy, Clone, Debug, PartialEq)]
pub enum DomainError {
    #[error("logarithm argument {0} is not positive")]
    NonPositiveLogArgument(f64),
    #[error("closed-form result is not finite")]
    NonFinite,
}

/// Years for `initial_investment`, compounding monthly at the effective rate
/// of `annual_return_rate` with `monthly_contribution` added after interest
/// each month, to reach `target_amount`.
///
/// The annuity formula is tried first; month-by-month iteration only runs when
/// the formula leaves its domain.
pub fn project_goal_timeline(input: &ProjectionInput) -> Projection {
    if let Some(outcome) = trivial_outcome(input) {
        return outcome;
    }
    if input.annual_return_rate <= 0.0 {
        return linear_projection(input);
    }

    let monthly_rate = effective_monthly_rate(input.annual_return_rate);
    if monthly_rate.abs() < RATE_EPSILON {
        return linear_projection(input);
    }

    match closed_form_months(input, monthly_rate) {
        Ok(months) => projection_from_months(months),
        Err(err) => {
            debug!(%err, "closed-form projection failed; iterating month by month");
            iterate_months(input, monthly_rate)
        }
    }
}

/// Brute-force month-by-month accumulation of the same savings model.
pub fn project_by_iteration(input: &ProjectionInput) -> Projection {
    if let Some(outcome) = trivial_outcome(input) {
        return outcome;
    }
    let monthly_rate = effective_monthly_rate(input.annual_return_rate.max(-1.0));
    iterate_months(input, monthly_rate)
}

fn trivial_outcome(input: &ProjectionInput) -> Option<Projection> {
    let ProjectionInput {
        target_amount,
        initial_investment,
        monthly_contribution,
        annual_return_rate,
    } = *input;

    if ![
        target_amount,
        initial_investment,
        monthly_contribution,
        annual_return_rate,
    ]
    .iter()
    .all(|v| v.is_finite())
    {
        return Some(Projection::Unreachable);
    }
    if monthly_contribution <= 0.0 && initial_investment < target_amount {
        return Some(Projection::Unreachable);
    }
    if target_amount <= initial_investment {
        return Some(Projection::Years(0.0));
    }
    None
}

pub fn effective_monthly_rate(annual_return_rate: f64) -> f64 {
    (1.0 + annual_return_rate).powf(1.0 / 12.0) - 1.0
}

/// Plain savings without growth. Not bounded by the iteration horizon.
fn linear_projection(input: &ProjectionInput) -> Projection {
    let years =
        (input.target_amount - input.initial_investment) / (input.monthly_contribution * 12.0);
    if !years.is_finite() {
        return Projection::Unreachable;
    }
    Projection::Years(round_to(years, 1))
}

/// Inverts `FV = PV(1+r)^n + PMT((1+r)^n - 1)/r` for `n`.
pub fn closed_form_months(input: &ProjectionInput, monthly_rate: f64) -> Result<f64, DomainError> {
    let grown_target =
        input.target_amount * monthly_rate + input.monthly_contribution + LOG_EPSILON;
    let grown_start =
        input.initial_investment * monthly_rate + input.monthly_contribution + LOG_EPSILON;
    if grown_target <= 0.0 {
        return Err(DomainError::NonPositiveLogArgument(grown_target));
    }
    if grown_start <= 0.0 {
        return Err(DomainError::NonPositiveLogArgument(grown_start));
    }

    let months = (grown_target.ln() - grown_start.ln()) / monthly_rate.ln_1p();
    if !months.is_finite() {
        return Err(DomainError::NonFinite);
    }
    Ok(months.max(0.0))
}

fn iterate_months(input: &ProjectionInput, monthly_rate: f64) -> Projection {
    let mut balance = input.initial_investment;
    let mut months = 0;
    while balance < input.target_amount {
        balance += balance * monthly_rate + input.monthly_contribution;
        months += 1;
        if months > MAX_MONTHS {
            return Projection::Unreachable;
        }
    }
    Projection::Years(round_to(f64::from(months) / 12.0, 1))
}

fn projection_from_months(months: f64) -> Projection {
    if !months.is_finite() || months > f64::from(MAX_MONTHS) {
        return Projection::Unreachable;
    }
    Projection::Years(round_to(months / 12.0, 1))
}

/// Projects every goal under every scenario, using the scenario's equity
/// return as the growth assumption and the profile's surplus as the monthly
/// contribution.
pub fn project_scenarios(
    profile: &InvestorProfile,
    goals: &[GoalSpec],
    scenarios: &[Scenario],
) -> ScenarioTimelines {
    let monthly_contribution = profile.monthly_savings();
    let initial_investment = profile.invested_assets();

    scenarios
        .iter()
        .map(|scenario| {
            let annual_return_rate = scenario.parameters.avg_equity_return / 100.0;
            let timelines: BTreeMap<String, Projection> = goals
                .iter()
                .map(|goal| {
                    let projection = project_goal_timeline(&ProjectionInput {
                        target_amount: goal.target_amount,
                        initial_investment,
                        monthly_contribution,
                        annual_return_rate,
                    });
                    debug!(
                        scenario = scenario.name.as_str(),
                        goal = goal.name.as_str(),
                        %projection,
                        "projected goal"
                    );
                    (goal.name.clone(), projection)
                })
                .collect();
            (scenario.name.clone(), timelines)
        })
        .collect()
}

/// Allocation-weighted `avg_annual_return_percent` as a fraction. Weights are
/// renormalized over allocated assets that have a finite annualized return.
pub fn blended_annual_return(
    stats: &StatsArchive,
    allocation: &BTreeMap<String, f64>,
) -> Option<f64> {
    let (weighted, total) = allocation
        .iter()
        .filter(|(_, weight)| weight.is_finite() && **weight > 0.0)
        .filter_map(|(asset, weight)| {
            stats
                .statistics(asset)
                .and_then(|s| s.avg_annual_return_percent)
                .map(|percent| (percent / 100.0 * weight, *weight))
        })
        .fold((0.0, 0.0), |(sum, total), (value, weight)| {
            (sum + value, total + weight)
        });
    (total > 0.0).then(|| weighted / total)
}

/// A scenario whose equity return is the blended historical return.
pub fn historical_scenario(
    name: &str,
    stats: &StatsArchive,
    allocation: &BTreeMap<String, f64>,
) -> Option<Scenario> {
    let blended = blended_annual_return(stats, allocation)?;
    Some(Scenario {
        name: name.to_string(),
        narrative: None,
        parameters: ScenarioParameters {
            avg_equity_return: round_to(blended * 100.0, 2),
            avg_bond_return: 0.0,
            avg_inflation: 0.0,
        },
    })
}

/// Balances and cash flows must be finite and non-negative.
pub fn validate_profile(profile: &InvestorProfile) -> Result<(), String> {
    let fields = [
        ("monthly_income", profile.monthly_income),
        ("monthly_expenses", profile.monthly_expenses),
        ("assets.cash_equivalents", profile.assets.cash_equivalents),
        ("assets.equity_investments", profile.assets.equity_investments),
        ("assets.other_investments", profile.assets.other_investments),
        ("liabilities.high_interest_debt", profile.liabilities.high_interest_debt),
        ("liabilities.loans_emi", profile.liabilities.loans_emi),
    ];
    for (name, value) in fields {
        if !value.is_finite() || value < 0.0 {
            return Err(format!("profile {name} must be >= 0"));
        }
    }
    Ok(())
}

pub fn validate_goals(goals: &[GoalSpec]) -> Result<(), String> {
    for goal in goals {
        if goal.name.trim().is_empty() {
            return Err("goal name must not be empty".to_string());
        }
        if !goal.target_amount.is_finite() || goal.target_amount <= 0.0 {
            return Err(format!("goal '{}': target_amount must be > 0", goal.name));
        }
        if goal.timeline_years == 0 {
            return Err(format!("goal '{}': timeline_years must be > 0", goal.name));
        }
    }
    Ok(())
}
