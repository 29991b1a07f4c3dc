use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// One row of a raw archive as it appears on disk. Both fields stay untyped
/// until cleaning so a malformed row can be dropped instead of failing the load.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    #[serde(default)]
    pub date: serde_json::Value,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl From<PricePoint> for RawObservation {
    fn from(point: PricePoint) -> Self {
        Self {
            date: serde_json::Value::String(point.date.format(DATE_FORMAT).to_string()),
            value: serde_json::Value::from(point.value),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMarketArchive {
    #[serde(default)]
    pub market_trends: BTreeMap<String, Vec<RawObservation>>,
}

/// Date-ordered, date-unique prices for one asset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AssetSeries {
    points: Vec<PricePoint>,
}

impl AssetSeries {
    /// Builds a series from points in any order. Non-finite and non-positive
    /// values are discarded; for repeated dates the later point wins.
    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = PricePoint>,
    {
        let mut by_date = BTreeMap::new();
        for point in points {
            if point.value.is_finite() && point.value > 0.0 {
                by_date.insert(point.date, point.value);
            }
        }
        Self {
            points: by_date
                .into_iter()
                .map(|(date, value)| PricePoint { date, value })
                .collect(),
        }
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.value)
    }
}

/// Annualized metrics are `None` when they overflow the `f64` range, which
/// happens for very steep series observed over a few days.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetStatistics {
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub last_price: f64,
    pub num_observations: usize,
    pub cagr_percent: Option<f64>,
    pub avg_annual_return_percent: Option<f64>,
    pub annual_volatility_percent: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    pub max_drawdown_percent: f64,
    pub max_drawdown_date: NaiveDate,
    pub best_year_return_percent: Option<f64>,
    pub worst_year_return_percent: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmptyRecord {}

/// Per-asset entry of the statistics archive. Assets with fewer than two
/// usable observations serialize as `{}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssetSummary {
    Computed(AssetStatistics),
    Insufficient(EmptyRecord),
}

impl AssetSummary {
    pub fn statistics(&self) -> Option<&AssetStatistics> {
        match self {
            AssetSummary::Computed(stats) => Some(stats),
            AssetSummary::Insufficient(_) => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationMatrix {
    cells: BTreeMap<String, BTreeMap<String, Option<f64>>>,
}

impl CorrelationMatrix {
    pub(crate) fn set_symmetric(&mut self, a: &str, b: &str, value: Option<f64>) {
        self.cells
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string(), value);
        self.cells
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string(), value);
    }

    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        self.cells.get(a).and_then(|row| row.get(b)).copied().flatten()
    }

    pub fn assets(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub generated_on: DateTime<Utc>,
    pub source_file: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatsArchive {
    pub metadata: ArchiveMetadata,
    pub asset_stats: BTreeMap<String, AssetSummary>,
    pub correlations: CorrelationMatrix,
}

impl StatsArchive {
    pub fn statistics(&self, asset: &str) -> Option<&AssetStatistics> {
        self.asset_stats.get(asset).and_then(AssetSummary::statistics)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CrashEvent {
    pub date: NaiveDate,
    pub severity: f64,
    pub duration_days: usize,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VolatilityEvent {
    pub date: NaiveDate,
    pub multiplier: f64,
    pub duration_days: usize,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct MarketEvents {
    pub crash: Option<CrashEvent>,
    pub volatility: Option<VolatilityEvent>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PathSpec {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_value: f64,
    pub drift: f64,
    pub volatility: f64,
    pub events: MarketEvents,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AssetClassProfile {
    pub name: &'static str,
    pub drift: f64,
    pub volatility: f64,
    pub initial_value: f64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ProjectionInput {
    pub target_amount: f64,
    pub initial_investment: f64,
    pub monthly_contribution: f64,
    pub annual_return_rate: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    Years(f64),
    Unreachable,
}

impl Projection {
    pub fn years(self) -> Option<f64> {
        match self {
            Projection::Years(years) => Some(years),
            Projection::Unreachable => None,
        }
    }

    pub fn is_unreachable(self) -> bool {
        matches!(self, Projection::Unreachable)
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Projection::Years(years) => write!(f, "{years:.1} years"),
            Projection::Unreachable => f.write_str("More than 100 years"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GoalSpec {
    pub name: String,
    pub target_amount: f64,
    pub timeline_years: u32,
}

/// Monthly cash flow plus the balance sheet, in the nested `assets` /
/// `liabilities` layout of a user profile. Unrelated profile keys are ignored.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InvestorProfile {
    pub monthly_income: f64,
    pub monthly_expenses: f64,
    pub assets: Assets,
    pub liabilities: Liabilities,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Assets {
    pub cash_equivalents: f64,
    pub equity_investments: f64,
    #[serde(default)]
    pub other_investments: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Liabilities {
    #[serde(default)]
    pub high_interest_debt: f64,
    pub loans_emi: f64,
}

impl InvestorProfile {
    pub fn monthly_savings(&self) -> f64 {
        self.monthly_income - self.monthly_expenses - self.liabilities.loans_emi
    }

    pub fn invested_assets(&self) -> f64 {
        self.assets.equity_investments + self.assets.other_investments
    }
}

/// Annual figures in percent, e.g. `9.0` for nine percent.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioParameters {
    pub avg_equity_return: f64,
    #[serde(default)]
    pub avg_bond_return: f64,
    #[serde(default)]
    pub avg_inflation: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    pub parameters: ScenarioParameters,
}

pub type ScenarioTimelines = BTreeMap<String, BTreeMap<String, Projection>>;
