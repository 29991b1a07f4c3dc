use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use super::generator::TRADING_DAYS_PER_YEAR;
use super::types::{
    ArchiveMetadata, AssetSeries, AssetStatistics, AssetSummary, CorrelationMatrix, DATE_FORMAT,
    EmptyRecord, PricePoint, RawMarketArchive, RawObservation, StatsArchive,
};

pub const RISK_FREE_RATE: f64 = 0.035;
const DAYS_PER_YEAR: f64 = 365.25;

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    let scaled = value * factor;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / factor
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Runs per-asset statistics and the joint correlation matrix over one raw
/// archive.
pub fn build_stats_archive(
    raw: &RawMarketArchive,
    source_file: &str,
    generated_on: DateTime<Utc>,
) -> StatsArchive {
    let cleaned: BTreeMap<String, AssetSeries> = raw
        .market_trends
        .iter()
        .map(|(asset, rows)| {
            let series = clean_series(rows);
            if series.len() < rows.len() {
                warn!(
                    asset = asset.as_str(),
                    dropped = rows.len() - series.len(),
                    "dropped malformed or duplicate rows"
                );
            }
            debug!(
                asset = asset.as_str(),
                rows = rows.len(),
                kept = series.len(),
                "cleaned series"
            );
            (asset.clone(), series)
        })
        .collect();

    let asset_stats = cleaned
        .iter()
        .map(|(asset, series)| (asset.clone(), analyze_series(series)))
        .collect();

    StatsArchive {
        metadata: ArchiveMetadata {
            generated_on,
            source_file: source_file.to_string(),
        },
        asset_stats,
        correlations: correlation_matrix(&cleaned),
    }
}

pub fn clean_series(rows: &[RawObservation]) -> AssetSeries {
    AssetSeries::from_points(rows.iter().filter_map(parse_observation))
}

pub fn parse_observation(row: &RawObservation) -> Option<PricePoint> {
    Some(PricePoint {
        date: parse_date(&row.date)?,
        value: parse_value(&row.value)?,
    })
}

fn parse_date(value: &Value) -> Option<NaiveDate> {
    let text = value.as_str()?.trim();
    if let Ok(date) = NaiveDate::parse_from_str(text, DATE_FORMAT) {
        return Some(date);
    }
    if let Ok(stamp) = DateTime::parse_from_rfc3339(text) {
        return Some(stamp.date_naive());
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|stamp| stamp.date())
}

fn parse_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn analyze_series(series: &AssetSeries) -> AssetSummary {
    let points = series.points();
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return AssetSummary::Insufficient(EmptyRecord::default());
    };
    if points.len() < 2 {
        return AssetSummary::Insufficient(EmptyRecord::default());
    }

    let values: Vec<f64> = series.values().collect();
    let returns = daily_returns(&values);
    let annualized_return = (1.0 + mean(&returns)).powf(TRADING_DAYS_PER_YEAR) - 1.0;
    let annual_volatility = sample_std_dev(&returns) * TRADING_DAYS_PER_YEAR.sqrt();

    let days = (last.date - first.date).num_days() as f64;
    let years = (days / DAYS_PER_YEAR).max(1.0 / DAYS_PER_YEAR);
    let cagr = (last.value / first.value).powf(1.0 / years) - 1.0;

    let sharpe = finite(annualized_return)
        .zip(finite(annual_volatility).filter(|vol| *vol > 0.0))
        .and_then(|(ret, vol)| finite((ret - RISK_FREE_RATE) / vol));
    let (drawdown, drawdown_date) = max_drawdown(points);

    let yearly = yearly_returns(points);
    let best_year = yearly.iter().copied().reduce(f64::max).and_then(finite);
    let worst_year = yearly.iter().copied().reduce(f64::min).and_then(finite);

    AssetSummary::Computed(AssetStatistics {
        first_date: first.date,
        last_date: last.date,
        last_price: round_to(last.value, 2),
        num_observations: points.len(),
        cagr_percent: finite(cagr * 100.0).map(|v| round_to(v, 2)),
        avg_annual_return_percent: finite(annualized_return * 100.0).map(|v| round_to(v, 2)),
        annual_volatility_percent: finite(annual_volatility * 100.0).map(|v| round_to(v, 2)),
        sharpe_ratio: sharpe.map(|s| round_to(s, 3)),
        max_drawdown_percent: fraction_to_percent(drawdown),
        max_drawdown_date: drawdown_date,
        best_year_return_percent: best_year.map(fraction_to_percent),
        worst_year_return_percent: worst_year.map(fraction_to_percent),
    })
}

fn fraction_to_percent(fraction: f64) -> f64 {
    round_to(round_to(fraction, 4) * 100.0, 2)
}

pub fn daily_returns(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation; zero when fewer than two values exist.
fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() as f64 - 1.0);
    variance.sqrt()
}

/// Deepest decline from the running peak and the first day it was reached.
/// `points` must be non-empty.
fn max_drawdown(points: &[PricePoint]) -> (f64, NaiveDate) {
    let mut peak = points[0].value;
    let mut worst = (0.0, points[0].date);
    for point in points {
        peak = peak.max(point.value);
        let drawdown = point.value / peak - 1.0;
        if drawdown < worst.0 {
            worst = (drawdown, point.date);
        }
    }
    worst
}

/// Year-over-year change of each calendar year's last observation. Years
/// without observations are skipped rather than padded with a 0% return.
fn yearly_returns(points: &[PricePoint]) -> Vec<f64> {
    let mut closes = BTreeMap::new();
    for point in points {
        closes.insert(point.date.year(), point.value);
    }
    let closes: Vec<f64> = closes.into_values().collect();
    daily_returns(&closes)
}

/// Pairwise-complete Pearson correlation of daily returns after an outer join
/// on date. A return exists only where the asset has prices on both the row
/// and the previous joined row.
pub fn correlation_matrix(series: &BTreeMap<String, AssetSeries>) -> CorrelationMatrix {
    let mut matrix = CorrelationMatrix::default();
    let names: Vec<&str> = series.keys().map(String::as_str).collect();
    let width = names.len();
    if width == 0 {
        return matrix;
    }

    let mut joined: BTreeMap<NaiveDate, Vec<Option<f64>>> = BTreeMap::new();
    for (column, asset) in series.values().enumerate() {
        for point in asset.points() {
            joined.entry(point.date).or_insert_with(|| vec![None; width])[column] =
                Some(point.value);
        }
    }

    let rows: Vec<&Vec<Option<f64>>> = joined.values().collect();
    let returns: Vec<Vec<Option<f64>>> = rows
        .windows(2)
        .map(|pair| {
            (0..width)
                .map(|column| match (pair[0][column], pair[1][column]) {
                    (Some(prev), Some(cur)) => Some(cur / prev - 1.0),
                    _ => None,
                })
                .collect::<Vec<_>>()
        })
        .filter(|row| row.iter().any(Option::is_some))
        .collect();

    for i in 0..width {
        for j in i..width {
            let (xs, ys): (Vec<f64>, Vec<f64>) = returns
                .iter()
                .filter_map(|row| Some((row[i]?, row[j]?)))
                .unzip();
            let value = pearson(&xs, &ys).map(|r| if i == j { 1.0 } else { round_to(r, 4) });
            matrix.set_symmetric(names[i], names[j], value);
        }
    }
    matrix
}

fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() < 2 || xs.len() != ys.len() {
        return None;
    }
    let mean_x = mean(xs);
    let mean_y = mean(ys);
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    let std_x = var_x.sqrt();
    let std_y = var_y.sqrt();
    if std_x < f64::EPSILON || std_y < f64::EPSILON {
        return None;
    }
    Some((cov / (std_x * std_y)).clamp(-1.0, 1.0))
}
