mod archive;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use archive::{load_raw_archive, load_stats_archive, write_json_atomic};

use crate::core::{
    CrashEvent, DATE_FORMAT, DEFAULT_ASSET_CLASSES, DEFAULT_CRASH_DURATION_DAYS,
    DEFAULT_CRASH_SEVERITY, DEFAULT_HISTORY_DAYS, DEFAULT_VOLATILITY_DURATION_DAYS,
    DEFAULT_VOLATILITY_INCREASE, GoalSpec, InvestorProfile, MarketEvents, Projection,
    ProjectionInput, Scenario, ScenarioTimelines, VolatilityEvent, blended_annual_return,
    build_stats_archive, generate_market, historical_scenario, history_start,
    project_goal_timeline, project_scenarios, validate_goals, validate_profile,
};
use crate::error::{Error, Result};

pub const HISTORICAL_SCENARIO_NAME: &str = "Historical Blend";

#[derive(Parser, Debug)]
#[command(
    name = "finpilot",
    about = "Synthetic market history, risk statistics and goal timeline projections"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Enable debug logging (overridden by RUST_LOG)")]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Simulate the default asset classes and write a raw market archive.
    Generate(GenerateArgs),
    /// Derive per-asset statistics and correlations from a raw market archive.
    Analyze(AnalyzeArgs),
    /// Project the years needed to reach a single target amount.
    Project(ProjectArgs),
    /// Project every goal of a plan under every scenario.
    Scenarios(ScenariosArgs),
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    #[arg(long, default_value = "market_trends.json")]
    pub out: PathBuf,
    #[arg(long, help = "Seed for reproducible archives; omitted means OS entropy")]
    pub seed: Option<u64>,
    #[arg(
        long,
        default_value_t = DEFAULT_HISTORY_DAYS,
        help = "Calendar days of history ending at --end-date"
    )]
    pub history_days: u64,
    #[arg(long, help = "Last simulated day (YYYY-MM-DD), defaults to today")]
    pub end_date: Option<String>,
    #[arg(long, default_value = "2020-03-01")]
    pub crash_date: String,
    #[arg(
        long,
        default_value_t = DEFAULT_CRASH_SEVERITY,
        allow_hyphen_values = true,
        help = "Total log-return of the crash ramp, e.g. -0.35"
    )]
    pub crash_severity: f64,
    #[arg(long, default_value_t = DEFAULT_CRASH_DURATION_DAYS)]
    pub crash_duration_days: usize,
    #[arg(long, default_value = "2025-01-01")]
    pub volatility_date: String,
    #[arg(
        long,
        default_value_t = DEFAULT_VOLATILITY_INCREASE,
        help = "Relative volatility increase during the regime, e.g. 0.5 for +50%"
    )]
    pub volatility_increase: f64,
    #[arg(long, default_value_t = DEFAULT_VOLATILITY_DURATION_DAYS)]
    pub volatility_duration_days: usize,
    #[arg(long, help = "Simulate plain GBM paths without crash or volatility events")]
    pub no_events: bool,
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    #[arg(long, short = 'i', default_value = "market_trends.json")]
    pub infile: PathBuf,
    #[arg(long, short = 'o', default_value = "market_stats.json")]
    pub outfile: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    #[arg(long)]
    pub target_amount: f64,
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub initial_investment: f64,
    #[arg(long, allow_hyphen_values = true)]
    pub monthly_contribution: f64,
    #[arg(
        long,
        allow_hyphen_values = true,
        help = "Expected annual return in percent, e.g. 8"
    )]
    pub annual_return: Option<f64>,
    #[arg(long, help = "Statistics archive used to blend historical returns")]
    pub stats: Option<PathBuf>,
    #[arg(long, help = "Asset weights for the blend, e.g. equities=0.6,bonds=0.4")]
    pub allocation: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ScenariosArgs {
    #[arg(long)]
    pub plan: PathBuf,
    #[arg(long, help = "Statistics archive; adds a historical scenario from the plan allocation")]
    pub stats: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
struct GenerationPlan {
    start: NaiveDate,
    end: NaiveDate,
    events: MarketEvents,
    seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
enum ReturnSource {
    Fixed(f64),
    Blended {
        stats: PathBuf,
        allocation: BTreeMap<String, f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlanFile {
    pub profile: InvestorProfile,
    #[serde(default)]
    pub goals: Vec<GoalSpec>,
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
    #[serde(default)]
    pub allocation: BTreeMap<String, f64>,
}

#[derive(Debug, Serialize)]
struct ScenarioReport<'a> {
    monthly_contribution: f64,
    initial_investment: f64,
    projected_goal_timeline_years: &'a ScenarioTimelines,
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Generate(args) => run_generate(&args),
        Command::Analyze(args) => run_analyze(&args),
        Command::Project(args) => run_project(&args).map(|projection| {
            println!("Projected goal timeline: {projection}");
        }),
        Command::Scenarios(args) => run_scenarios(&args),
    }
}

fn run_generate(args: &GenerateArgs) -> Result<()> {
    let plan = build_generation(args, Local::now().date_naive()).map_err(Error::InvalidInput)?;
    info!(
        start = %plan.start,
        end = %plan.end,
        assets = DEFAULT_ASSET_CLASSES.len(),
        "generating market trends"
    );
    let archive = generate_market(
        &DEFAULT_ASSET_CLASSES,
        plan.start,
        plan.end,
        plan.events,
        plan.seed,
    )?;
    write_json_atomic(&args.out, &archive)?;
    info!(path = %args.out.display(), "wrote raw market archive");
    Ok(())
}

fn run_analyze(args: &AnalyzeArgs) -> Result<()> {
    let raw = load_raw_archive(&args.infile)?;
    info!(assets = raw.market_trends.len(), "analyzing market trends");
    let archive = build_stats_archive(&raw, &args.infile.display().to_string(), Utc::now());
    for (asset, summary) in &archive.asset_stats {
        match summary.statistics() {
            None => warn!(asset = asset.as_str(), "fewer than two usable observations"),
            Some(stats) if stats.avg_annual_return_percent.is_none() => {
                warn!(asset = asset.as_str(), "annualized return overflowed; stored as null")
            }
            Some(_) => {}
        }
    }
    write_json_atomic(&args.outfile, &archive)?;
    info!(
        path = %args.outfile.display(),
        assets = archive.asset_stats.len(),
        "wrote statistics archive"
    );
    Ok(())
}

fn run_project(args: &ProjectArgs) -> Result<Projection> {
    let annual_return_rate = match build_return_source(args).map_err(Error::InvalidInput)? {
        ReturnSource::Fixed(rate) => rate,
        ReturnSource::Blended { stats, allocation } => {
            let archive = load_stats_archive(&stats)?;
            blended_annual_return(&archive, &allocation).ok_or_else(|| {
                Error::InvalidInput(
                    "--allocation has no assets with statistics in --stats".to_string(),
                )
            })?
        }
    };
    let input = ProjectionInput {
        target_amount: args.target_amount,
        initial_investment: args.initial_investment,
        monthly_contribution: args.monthly_contribution,
        annual_return_rate,
    };
    validate_projection_input(&input).map_err(Error::InvalidInput)?;
    Ok(project_goal_timeline(&input))
}

fn run_scenarios(args: &ScenariosArgs) -> Result<()> {
    let plan = load_plan(&args.plan)?;
    let stats = args.stats.as_deref().map(load_stats_archive).transpose()?;
    let timelines = plan_timelines(&plan, stats.as_ref())?;
    let report = ScenarioReport {
        monthly_contribution: plan.profile.monthly_savings(),
        initial_investment: plan.profile.invested_assets(),
        projected_goal_timeline_years: &timelines,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn load_plan(path: &Path) -> Result<PlanFile> {
    if !path.exists() {
        return Err(Error::InvalidInput(format!(
            "--plan file {} does not exist",
            path.display()
        )));
    }
    let plan: PlanFile = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    validate_profile(&plan.profile).map_err(Error::InvalidInput)?;
    validate_goals(&plan.goals).map_err(Error::InvalidInput)?;
    Ok(plan)
}

fn plan_timelines(
    plan: &PlanFile,
    stats: Option<&crate::core::StatsArchive>,
) -> Result<ScenarioTimelines> {
    let mut scenarios = plan.scenarios.clone();
    if let Some(stats) = stats {
        match historical_scenario(HISTORICAL_SCENARIO_NAME, stats, &plan.allocation) {
            Some(scenario) => scenarios.push(scenario),
            None => warn!("plan allocation has no assets with statistics; no historical scenario"),
        }
    }
    if scenarios.is_empty() {
        return Err(Error::InvalidInput(
            "plan has no scenarios and no historical blend".to_string(),
        ));
    }
    info!(
        goals = plan.goals.len(),
        scenarios = scenarios.len(),
        "projecting goal timelines"
    );
    Ok(project_scenarios(&plan.profile, &plan.goals, &scenarios))
}

fn build_generation(
    args: &GenerateArgs,
    today: NaiveDate,
) -> std::result::Result<GenerationPlan, String> {
    let end = match &args.end_date {
        Some(text) => parse_date_arg("--end-date", text)?,
        None => today,
    };
    if args.history_days == 0 {
        return Err("--history-days must be > 0".to_string());
    }

    let events = if args.no_events {
        MarketEvents::default()
    } else {
        if !args.crash_severity.is_finite() || args.crash_severity >= 0.0 {
            return Err("--crash-severity must be < 0".to_string());
        }
        if !args.volatility_increase.is_finite() || args.volatility_increase <= -1.0 {
            return Err("--volatility-increase must be > -1".to_string());
        }
        MarketEvents {
            crash: Some(CrashEvent {
                date: parse_date_arg("--crash-date", &args.crash_date)?,
                severity: args.crash_severity,
                duration_days: args.crash_duration_days,
            }),
            volatility: Some(VolatilityEvent {
                date: parse_date_arg("--volatility-date", &args.volatility_date)?,
                multiplier: args.volatility_increase,
                duration_days: args.volatility_duration_days,
            }),
        }
    };

    Ok(GenerationPlan {
        start: history_start(end, args.history_days),
        end,
        events,
        seed: args.seed,
    })
}

fn build_return_source(args: &ProjectArgs) -> std::result::Result<ReturnSource, String> {
    match (args.annual_return, &args.stats, &args.allocation) {
        (Some(_), Some(_), _) => {
            Err("--annual-return and --stats are mutually exclusive".to_string())
        }
        (Some(percent), None, _) => {
            if !percent.is_finite() {
                return Err("--annual-return must be finite".to_string());
            }
            Ok(ReturnSource::Fixed(percent / 100.0))
        }
        (None, Some(stats), Some(allocation)) => Ok(ReturnSource::Blended {
            stats: stats.clone(),
            allocation: parse_allocation(allocation)?,
        }),
        (None, Some(_), None) => Err("--stats requires --allocation".to_string()),
        (None, None, _) => Err("either --annual-return or --stats is required".to_string()),
    }
}

fn validate_projection_input(input: &ProjectionInput) -> std::result::Result<(), String> {
    if !input.target_amount.is_finite() || input.target_amount <= 0.0 {
        return Err("--target-amount must be > 0".to_string());
    }
    if !input.initial_investment.is_finite() || input.initial_investment < 0.0 {
        return Err("--initial-investment must be >= 0".to_string());
    }
    if !input.monthly_contribution.is_finite() {
        return Err("--monthly-contribution must be finite".to_string());
    }
    Ok(())
}

/// Parses `asset=weight` pairs separated by commas.
fn parse_allocation(text: &str) -> std::result::Result<BTreeMap<String, f64>, String> {
    let mut allocation = BTreeMap::new();
    for entry in text.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((asset, weight)) = entry.split_once('=') else {
            return Err(format!("--allocation entry '{entry}' must look like asset=weight"));
        };
        let weight: f64 = weight
            .trim()
            .parse()
            .map_err(|_| format!("--allocation weight for '{}' is not a number", asset.trim()))?;
        if !weight.is_finite() || weight < 0.0 {
            return Err(format!("--allocation weight for '{}' must be >= 0", asset.trim()));
        }
        allocation.insert(asset.trim().to_string(), weight);
    }
    if allocation.is_empty() {
        return Err("--allocation must name at least one asset".to_string());
    }
    Ok(allocation)
}

fn parse_date_arg(flag: &str, text: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)
        .map_err(|e| format!("{flag} must be a YYYY-MM-DD date: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Assets, AssetSummary};
    use serde_json::json;
    use tempfile::tempdir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("finpilot").chain(args.iter().copied()))
            .expect("valid command line")
    }

    fn generate_args(args: &[&str]) -> GenerateArgs {
        let mut full = vec!["generate"];
        full.extend_from_slice(args);
        match parse(&full).command {
            Command::Generate(args) => args,
            other => panic!("expected generate, got {other:?}"),
        }
    }

    fn project_args(args: &[&str]) -> ProjectArgs {
        let mut full = vec!["project"];
        full.extend_from_slice(args);
        match parse(&full).command {
            Command::Project(args) => args,
            other => panic!("expected project, got {other:?}"),
        }
    }

    #[test]
    fn build_generation_defaults_to_ten_years_with_both_events() {
        let plan = build_generation(&generate_args(&[]), date(2025, 6, 30)).expect("plan");
        assert_eq!(plan.end, date(2025, 6, 30));
        assert_eq!(plan.start, history_start(date(2025, 6, 30), 3650));
        assert_eq!(plan.seed, None);

        let crash = plan.events.crash.expect("crash");
        assert_eq!(crash.date, date(2020, 3, 1));
        assert_eq!(crash.duration_days, 30);
        let regime = plan.events.volatility.expect("volatility");
        assert_eq!(regime.date, date(2025, 1, 1));
        assert_eq!(regime.duration_days, 90);
    }

    #[test]
    fn build_generation_accepts_negative_severity_and_disables_events() {
        let args = generate_args(&["--crash-severity", "-0.5", "--seed", "7"]);
        let plan = build_generation(&args, date(2025, 1, 1)).expect("plan");
        assert_eq!(plan.events.crash.map(|c| c.severity), Some(-0.5));
        assert_eq!(plan.seed, Some(7));

        let args = generate_args(&["--no-events"]);
        let plan = build_generation(&args, date(2025, 1, 1)).expect("plan");
        assert_eq!(plan.events, MarketEvents::default());
    }

    #[test]
    fn build_generation_rejects_invalid_arguments() {
        let err = build_generation(&generate_args(&["--crash-severity", "0.2"]), date(2025, 1, 1))
            .expect_err("must reject");
        assert!(err.contains("--crash-severity"));

        let err = build_generation(&generate_args(&["--end-date", "31/12/2024"]), date(2025, 1, 1))
            .expect_err("must reject");
        assert!(err.contains("--end-date"));

        let err = build_generation(&generate_args(&["--history-days", "0"]), date(2025, 1, 1))
            .expect_err("must reject");
        assert!(err.contains("--history-days"));
    }

    #[test]
    fn parse_allocation_reads_weights_and_rejects_garbage() {
        let allocation = parse_allocation("equities=0.6, bonds = 0.4").expect("allocation");
        assert_eq!(allocation.len(), 2);
        assert_eq!(allocation["bonds"], 0.4);

        assert!(parse_allocation("equities").is_err());
        assert!(parse_allocation("equities=lots").is_err());
        assert!(parse_allocation("equities=-1").is_err());
        assert!(parse_allocation(" , ").is_err());
    }

    #[test]
    fn build_return_source_requires_exactly_one_source() {
        let args = project_args(&[
            "--target-amount",
            "100000",
            "--monthly-contribution",
            "1000",
            "--annual-return",
            "8",
        ]);
        assert_eq!(build_return_source(&args), Ok(ReturnSource::Fixed(0.08)));

        let args = project_args(&["--target-amount", "1", "--monthly-contribution", "1"]);
        let err = build_return_source(&args).expect_err("must reject");
        assert!(err.contains("--annual-return"));

        let args = project_args(&[
            "--target-amount",
            "1",
            "--monthly-contribution",
            "1",
            "--stats",
            "market_stats.json",
        ]);
        let err = build_return_source(&args).expect_err("must reject");
        assert!(err.contains("--allocation"));
    }

    #[test]
    fn project_command_uses_closed_form_projection() {
        let args = project_args(&[
            "--target-amount",
            "100000",
            "--monthly-contribution",
            "1000",
            "--annual-return",
            "8",
        ]);
        let projection = run_project(&args).expect("projection");
        let years = projection.years().expect("finite");
        assert!((6.2..=6.5).contains(&years));

        let args = project_args(&[
            "--target-amount",
            "100000",
            "--initial-investment",
            "-5",
            "--monthly-contribution",
            "1000",
            "--annual-return",
            "8",
        ]);
        let err = run_project(&args).expect_err("must reject");
        assert!(err.to_string().contains("--initial-investment"));
    }

    #[test]
    fn plan_profile_reads_nested_assets_and_liabilities() {
        let plan: PlanFile = serde_json::from_value(json!({
            "profile": {
                "name": "Asha",
                "age": 34,
                "monthly_income": 120000,
                "monthly_expenses": 60000,
                "assets": {
                    "cash_equivalents": 80000,
                    "equity_investments": 250000,
                    "other_investments": 50000
                },
                "liabilities": {"high_interest_debt": 0, "loans_emi": 10000},
                "risk_profile_answers": [2, 3, 1]
            },
            "goals": [{"name": "House", "target_amount": 4000000, "timeline_years": 8}],
            "scenarios": [{
                "name": "The Neutral Scenario",
                "narrative": "A mixed economy.",
                "parameters": {
                    "avg_equity_return": 9.0,
                    "avg_bond_return": 6.5,
                    "avg_inflation": 6.0
                }
            }],
            "allocation": {"equities": 0.7, "bonds": 0.3}
        }))
        .expect("plan");

        assert_eq!(plan.profile.monthly_savings(), 50_000.0);
        assert_eq!(plan.profile.invested_assets(), 300_000.0);
        let timelines = plan_timelines(&plan, None).expect("timelines");
        let expected = project_goal_timeline(&ProjectionInput {
            target_amount: 4_000_000.0,
            initial_investment: 300_000.0,
            monthly_contribution: 50_000.0,
            annual_return_rate: 0.09,
        });
        assert_eq!(timelines["The Neutral Scenario"]["House"], expected);
    }

    #[test]
    fn plan_profile_with_flat_balances_is_rejected() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("plan.json");
        let flat = json!({
            "profile": {
                "monthly_income": 120000,
                "monthly_expenses": 60000,
                "loans_emi": 10000,
                "equity_investments": 250000
            },
            "goals": [{"name": "House", "target_amount": 4000000, "timeline_years": 8}]
        });
        std::fs::write(&path, flat.to_string()).expect("write plan");

        let err = load_plan(&path).expect_err("must reject");
        assert!(matches!(err, Error::Json(_)));
        assert!(err.to_string().contains("assets"));
    }

    #[test]
    fn plan_profile_with_negative_balance_is_rejected() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("plan.json");
        let plan = json!({
            "profile": {
                "monthly_income": 120000,
                "monthly_expenses": 60000,
                "assets": {"cash_equivalents": 0, "equity_investments": -5},
                "liabilities": {"loans_emi": 0}
            },
            "goals": []
        });
        std::fs::write(&path, plan.to_string()).expect("write plan");

        let err = load_plan(&path).expect_err("must reject");
        assert!(err.to_string().contains("assets.equity_investments"));
    }

    #[test]
    fn generate_analyze_and_project_pipeline_round_trips_through_archives() {
        let temp = tempdir().expect("tempdir");
        let raw_path = temp.path().join("market_trends.json");
        let stats_path = temp.path().join("market_stats.json");

        let mut generate = generate_args(&["--seed", "42", "--end-date", "2025-06-30"]);
        generate.out = raw_path.clone();
        run_generate(&generate).expect("generate");

        run_analyze(&AnalyzeArgs {
            infile: raw_path.clone(),
            outfile: stats_path.clone(),
        })
        .expect("analyze");

        let stats = load_stats_archive(&stats_path).expect("stats");
        assert_eq!(stats.asset_stats.len(), DEFAULT_ASSET_CLASSES.len());
        for profile in DEFAULT_ASSET_CLASSES {
            let summary = &stats.asset_stats[profile.name];
            assert!(matches!(summary, AssetSummary::Computed(_)));
            assert_eq!(stats.correlations.get(profile.name, profile.name), Some(1.0));
        }
        assert_eq!(
            stats.correlations.get("equities", "bonds"),
            stats.correlations.get("bonds", "equities")
        );
        assert_eq!(stats.metadata.source_file, raw_path.display().to_string());

        let plan = PlanFile {
            profile: InvestorProfile {
                monthly_income: 10_000.0,
                monthly_expenses: 6_000.0,
                assets: Assets {
                    equity_investments: 20_000.0,
                    ..Assets::default()
                },
                ..InvestorProfile::default()
            },
            goals: vec![GoalSpec {
                name: "Emergency fund".to_string(),
                target_amount: 60_000.0,
                timeline_years: 3,
            }],
            scenarios: Vec::new(),
            allocation: [("equities".to_string(), 0.5), ("bonds".to_string(), 0.5)]
                .into_iter()
                .collect(),
        };
        let timelines = plan_timelines(&plan, Some(&stats)).expect("timelines");
        assert!(timelines.contains_key(HISTORICAL_SCENARIO_NAME));
    }

    #[test]
    fn analyze_without_raw_archive_is_fatal_and_actionable() {
        let temp = tempdir().expect("tempdir");
        let err = run_analyze(&AnalyzeArgs {
            infile: temp.path().join("missing.json"),
            outfile: temp.path().join("market_stats.json"),
        })
        .expect_err("must fail");
        assert!(err.to_string().contains("finpilot generate"));
        assert!(!temp.path().join("market_stats.json").exists());
    }
}
