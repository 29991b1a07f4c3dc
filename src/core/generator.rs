use chrono::{Datelike, Days, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use tracing::{debug, warn};

use super::stats::round_to;
use super::types::{
    AssetClassProfile, CrashEvent, MarketEvents, PathSpec, PricePoint, RawMarketArchive,
    VolatilityEvent,
};
use crate::error::{Error, Result};

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const DT: f64 = 1.0 / TRADING_DAYS_PER_YEAR;

pub const DEFAULT_ASSET_CLASSES: [AssetClassProfile; 4] = [
    AssetClassProfile {
        name: "equities",
        drift: 0.12,
        volatility: 0.22,
        initial_value: 100.0,
    },
    AssetClassProfile {
        name: "bonds",
        drift: 0.07,
        volatility: 0.08,
        initial_value: 100.0,
    },
    AssetClassProfile {
        name: "crypto",
        drift: 0.35,
        volatility: 0.80,
        initial_value: 100.0,
    },
    AssetClassProfile {
        name: "commodities",
        drift: 0.05,
        volatility: 0.15,
        initial_value: 100.0,
    },
];

pub const DEFAULT_HISTORY_DAYS: u64 = 10 * 365;
pub const DEFAULT_CRASH_SEVERITY: f64 = -0.35;
pub const DEFAULT_CRASH_DURATION_DAYS: usize = 30;
pub const DEFAULT_VOLATILITY_INCREASE: f64 = 0.5;
pub const DEFAULT_VOLATILITY_DURATION_DAYS: usize = 90;

/// The regime events every default asset class is simulated with: a crash in
/// early March 2020 and a volatility spike from the start of 2025.
pub fn default_events() -> MarketEvents {
    MarketEvents {
        crash: NaiveDate::from_ymd_opt(2020, 3, 1).map(|date| CrashEvent {
            date,
            severity: DEFAULT_CRASH_SEVERITY,
            duration_days: DEFAULT_CRASH_DURATION_DAYS,
        }),
        volatility: NaiveDate::from_ymd_opt(2025, 1, 1).map(|date| VolatilityEvent {
            date,
            multiplier: DEFAULT_VOLATILITY_INCREASE,
            duration_days: DEFAULT_VOLATILITY_DURATION_DAYS,
        }),
    }
}

/// Start of a `days`-long window ending at `end`, clamped to the earliest
/// representable date.
pub fn history_start(end: NaiveDate, days: u64) -> NaiveDate {
    end.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN)
}

/// Simulates every profile over `[start, end]` with the same events. With a
/// seed the archive is reproducible; each asset gets its own derived stream.
pub fn generate_market(
    profiles: &[AssetClassProfile],
    start: NaiveDate,
    end: NaiveDate,
    events: MarketEvents,
    seed: Option<u64>,
) -> Result<RawMarketArchive> {
    let mut archive = RawMarketArchive::default();
    for (index, profile) in profiles.iter().enumerate() {
        let spec = PathSpec {
            start_date: start,
            end_date: end,
            initial_value: profile.initial_value,
            drift: profile.drift,
            volatility: profile.volatility,
            events,
        };
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(derive_seed(seed, index as u64)),
            None => StdRng::from_os_rng(),
        };
        let path = generate_path(&spec, &mut rng)?;
        debug!(asset = profile.name, points = path.len(), "simulated asset path");
        archive.market_trends.insert(
            profile.name.to_string(),
            path.into_iter().map(Into::into).collect(),
        );
    }
    Ok(archive)
}

/// Geometric Brownian motion over the business days of `spec`, with the
/// optional crash and volatility overlays applied to the log-returns.
pub fn generate_path<R: Rng + ?Sized>(spec: &PathSpec, rng: &mut R) -> Result<Vec<PricePoint>> {
    validate_spec(spec)?;

    let dates = business_days(spec.start_date, spec.end_date);
    let mut returns = draw_log_returns(spec.drift, spec.volatility, dates.len(), rng);

    if let Some(crash) = spec.events.crash {
        if !apply_crash(&mut returns, &dates, crash, spec.volatility, rng) {
            warn!(date = %crash.date, "crash window does not fit the series; skipped");
        }
    }
    if let Some(event) = spec.events.volatility {
        apply_volatility_regime(&mut returns, &dates, event, spec.drift, spec.volatility, rng);
    }

    Ok(dates
        .into_iter()
        .zip(price_path(spec.initial_value, &returns))
        .map(|(date, value)| PricePoint { date, value })
        .collect())
}

fn validate_spec(spec: &PathSpec) -> Result<()> {
    if !spec.initial_value.is_finite() || spec.initial_value <= 0.0 {
        return Err(Error::InvalidInput("initial value must be > 0".to_string()));
    }
    if !spec.drift.is_finite() {
        return Err(Error::InvalidInput("drift must be finite".to_string()));
    }
    if !spec.volatility.is_finite() || spec.volatility < 0.0 {
        return Err(Error::InvalidInput("volatility must be >= 0".to_string()));
    }
    if spec.end_date < spec.start_date {
        return Err(Error::InvalidInput(
            "end date must not precede start date".to_string(),
        ));
    }
    if let Some(crash) = spec.events.crash {
        if !crash.severity.is_finite() || crash.severity >= 0.0 {
            return Err(Error::InvalidInput("crash severity must be < 0".to_string()));
        }
    }
    if let Some(event) = spec.events.volatility {
        if !event.multiplier.is_finite() || event.multiplier <= -1.0 {
            return Err(Error::InvalidInput(
                "volatility multiplier must be > -1".to_string(),
            ));
        }
    }
    Ok(())
}

pub fn business_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|date| *date <= end)
        .filter(|date| !matches!(date.weekday(), Weekday::Sat | Weekday::Sun))
        .collect()
}

/// Index of the date closest to `target`; ties go to the earlier day.
pub fn nearest_index(dates: &[NaiveDate], target: NaiveDate) -> Option<usize> {
    if dates.is_empty() {
        return None;
    }
    let upper = dates.partition_point(|date| *date < target);
    if upper == 0 {
        return Some(0);
    }
    if upper == dates.len() {
        return Some(dates.len() - 1);
    }
    let before = target - dates[upper - 1];
    let after = dates[upper] - target;
    Some(if after < before { upper } else { upper - 1 })
}

fn draw_log_returns<R: Rng + ?Sized>(
    drift: f64,
    volatility: f64,
    count: usize,
    rng: &mut R,
) -> Vec<f64> {
    let mean = drift * DT;
    let std_dev = volatility * DT.sqrt();
    (0..count)
        .map(|_| {
            let z: f64 = StandardNormal.sample(&mut *rng);
            mean + std_dev * z
        })
        .collect()
}

/// Returns whether the crash was applied. A window that would run past the
/// last day leaves the returns and the random stream untouched.
fn apply_crash<R: Rng + ?Sized>(
    returns: &mut [f64],
    dates: &[NaiveDate],
    crash: CrashEvent,
    volatility: f64,
    rng: &mut R,
) -> bool {
    let Some(start) = nearest_index(dates, crash.date) else {
        return false;
    };
    let duration = crash.duration_days;
    if duration == 0 || start + duration > returns.len() {
        return false;
    }

    let noise_std = volatility * 0.5;
    for (offset, slot) in returns[start..start + duration].iter_mut().enumerate() {
        let ramp = if duration > 1 {
            crash.severity * offset as f64 / (duration - 1) as f64
        } else {
            0.0
        };
        let z: f64 = StandardNormal.sample(&mut *rng);
        let noise = noise_std * z;
        *slot = ramp / duration as f64 + noise;
    }
    true
}

fn apply_volatility_regime<R: Rng + ?Sized>(
    returns: &mut [f64],
    dates: &[NaiveDate],
    event: VolatilityEvent,
    drift: f64,
    volatility: f64,
    rng: &mut R,
) {
    let Some(start) = nearest_index(dates, event.date) else {
        return;
    };
    let end = (start + event.duration_days).min(returns.len());
    let regime = draw_log_returns(drift, volatility * (1.0 + event.multiplier), end - start, rng);
    returns[start..end].copy_from_slice(&regime);
}

fn price_path(initial_value: f64, log_returns: &[f64]) -> Vec<f64> {
    log_returns
        .iter()
        .scan(0.0, |cumulative, r| {
            *cumulative += r;
            Some(round_to(initial_value * cumulative.exp(), 2))
        })
        .collect()
}

fn derive_seed(base_seed: u64, stream: u64) -> u64 {
    splitmix64(base_seed ^ stream.rotate_left(32))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
