mod generator;
mod solver;
mod stats;
mod types;

pub use generator::{
    DEFAULT_ASSET_CLASSES, DEFAULT_CRASH_DURATION_DAYS, DEFAULT_CRASH_SEVERITY,
    DEFAULT_HISTORY_DAYS, DEFAULT_VOLATILITY_DURATION_DAYS, DEFAULT_VOLATILITY_INCREASE,
    TRADING_DAYS_PER_YEAR, business_days, default_events, generate_market, generate_path,
    history_start, nearest_index,
};
pub use solver::{
    DomainError, MAX_MONTHS, blended_annual_return, closed_form_months, effective_monthly_rate,
    historical_scenario, project_by_iteration, project_goal_timeline, project_scenarios,
    validate_goals, validate_profile,
};
pub use stats::{
    RISK_FREE_RATE, analyze_series, build_stats_archive, clean_series, correlation_matrix,
    daily_returns, parse_observation,
};
pub use types::{
    ArchiveMetadata, AssetClassProfile, AssetSeries, AssetStatistics, AssetSummary, Assets,
    CorrelationMatrix, CrashEvent, DATE_FORMAT, EmptyRecord, GoalSpec, InvestorProfile,
    Liabilities, MarketEvents, PathSpec, PricePoint, Projection, ProjectionInput,
    RawMarketArchive, RawObservation, Scenario, ScenarioParameters, ScenarioTimelines,
    StatsArchive, VolatilityEvent,
};
