//! Derived metrics over daily history: relative momentum, 52-week range and the
//! benchmark trend inputs of the regime gate.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use super::models::{Bar, ClosePoint};

/// Lookbacks (rows) of the relative strength changes and their weights.
const RS_LOOKBACKS: [(usize, f64); 3] = [(5, 3.0), (20, 2.0), (63, 1.0)];

/// Relative-strength row for one trading day present in both series.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RelativeStrengthRow {
    pub date: NaiveDate,
    pub sector_close: f64,
    pub benchmark_close: f64,
    pub rs: f64,
    pub rs_5d: Option<f64>,
    pub rs_20d: Option<f64>,
    pub rs_63d: Option<f64>,
}

impl RelativeStrengthRow {
    /// `(3 * rs5 + 2 * rs20 + rs63) / 6`, with missing changes counted as zero.
    pub fn rel_mom(&self) -> f64 {
        let changes = [self.rs_5d, self.rs_20d, self.rs_63d];
        let weighted: f64 = changes
            .iter()
            .zip(RS_LOOKBACKS)
            .map(|(change, (_, weight))| change.unwrap_or(0.0) * weight)
            .sum();
        weighted / 6.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MomentumStrength {
    Strong,
    ModerateStrong,
    Neutral,
    ModerateWeak,
    Weak,
}

impl MomentumStrength {
    pub fn from_rel_mom(rel_mom: f64) -> Self {
        if rel_mom > 0.05 {
            Self::Strong
        } else if rel_mom > 0.02 {
            Self::ModerateStrong
        } else if rel_mom > -0.02 {
            Self::Neutral
        } else if rel_mom > -0.05 {
            Self::ModerateWeak
        } else {
            Self::Weak
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Strong => "strong, clearly outperforming the benchmark",
            Self::ModerateStrong => "moderately strong, slightly outperforming the benchmark",
            Self::Neutral => "neutral, moving with the benchmark",
            Self::ModerateWeak => "moderately weak, slightly underperforming the benchmark",
            Self::Weak => "weak, clearly underperforming the benchmark",
        }
    }
}

/// Latest relative momentum of a symbol against a benchmark.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelativeMomentum {
    pub symbol: String,
    pub benchmark: String,
    pub date: NaiveDate,
    pub sector_price: f64,
    pub benchmark_price: f64,
    pub rs: f64,
    pub rs_5d: Option<f64>,
    pub rs_20d: Option<f64>,
    pub rs_63d: Option<f64>,
    pub rel_mom: Option<f64>,
    pub strength: Option<MomentumStrength>,
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

fn pct_change(values: &[f64], index: usize, periods: usize) -> Option<f64> {
    let previous = *values.get(index.checked_sub(periods)?)?;
    if previous == 0.0 {
        return None;
    }
    finite(values[index] / previous - 1.0)
}

/// Joins both series on date and computes RS and its 5/20/63-row changes.
pub fn relative_strength(
    sector: &[ClosePoint],
    benchmark: &[ClosePoint],
) -> Vec<RelativeStrengthRow> {
    let benchmark_by_date: BTreeMap<NaiveDate, f64> =
        benchmark.iter().map(|point| (point.date, point.close)).collect();

    let mut joined: Vec<(NaiveDate, f64, f64)> = sector
        .iter()
        .filter_map(|point| {
            benchmark_by_date
                .get(&point.date)
                .map(|bench| (point.date, point.close, *bench))
        })
        .collect();
    joined.sort_by_key(|(date, _, _)| *date);

    let ratios: Vec<f64> = joined.iter().map(|(_, sector, bench)| sector / bench).collect();

    joined
        .iter()
        .enumerate()
        .map(|(index, (date, sector_close, benchmark_close))| RelativeStrengthRow {
            date: *date,
            sector_close: *sector_close,
            benchmark_close: *benchmark_close,
            rs: ratios[index],
            rs_5d: pct_change(&ratios, index, RS_LOOKBACKS[0].0),
            rs_20d: pct_change(&ratios, index, RS_LOOKBACKS[1].0),
            rs_63d: pct_change(&ratios, index, RS_LOOKBACKS[2].0),
        })
        .collect()
}

/// Relative momentum on the latest common date, `None` if the series never overlap.
pub fn analyze_relative_momentum(
    symbol: &str,
    benchmark: &str,
    sector_closes: &[ClosePoint],
    benchmark_closes: &[ClosePoint],
) -> Option<RelativeMomentum> {
    let rows = relative_strength(sector_closes, benchmark_closes);
    let latest = rows.last()?;
    let rel_mom = finite(latest.rel_mom());

    Some(RelativeMomentum {
        symbol: symbol.to_string(),
        benchmark: benchmark.to_string(),
        date: latest.date,
        sector_price: latest.sector_close,
        benchmark_price: latest.benchmark_close,
        rs: latest.rs,
        rs_5d: latest.rs_5d,
        rs_20d: latest.rs_20d,
        rs_63d: latest.rs_63d,
        rel_mom,
        strength: rel_mom.map(MomentumStrength::from_rel_mom),
    })
}

/// Sorts by relative momentum, strongest first; results without a value go last.
pub fn rank_by_momentum(results: &mut [RelativeMomentum]) {
    results.sort_by(|a, b| match (a.rel_mom, b.rel_mom) {
        (Some(a), Some(b)) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

/// 52-week high/low and the distance of the latest close from each.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FiftyTwoWeekRange {
    pub symbol: String,
    pub high_52w: f64,
    pub low_52w: f64,
    pub current: f64,
    /// Percent below the high (negative or zero).
    pub pct_from_high: f64,
    /// Percent above the low.
    pub pct_from_low: f64,
}

pub fn fifty_two_week_range(symbol: &str, bars: &[Bar]) -> Option<FiftyTwoWeekRange> {
    let current = bars.last()?.close;
    let high = bars.iter().map(|bar| bar.high).fold(f64::NEG_INFINITY, f64::max);
    let low = bars.iter().map(|bar| bar.low).fold(f64::INFINITY, f64::min);

    Some(FiftyTwoWeekRange {
        symbol: symbol.to_string(),
        high_52w: high,
        low_52w: low,
        current,
        pct_from_high: (current - high) / high * 100.0,
        pct_from_low: (current - low) / low * 100.0,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmaReading {
    pub period: usize,
    pub value: Option<f64>,
    pub price_above: Option<bool>,
}

/// Benchmark price against its moving averages.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkTrend {
    pub symbol: String,
    pub price: f64,
    pub smas: Vec<SmaReading>,
    /// Average daily change of the 20-day SMA over its last 5 values.
    pub sma20_slope: Option<f64>,
    pub return_20d: Option<f64>,
}

impl BenchmarkTrend {
    pub fn sma(&self, period: usize) -> Option<&SmaReading> {
        self.smas.iter().find(|reading| reading.period == period)
    }
}

/// Mean of the `period` closes ending at `end` (inclusive).
fn sma_at(closes: &[f64], end: usize, period: usize) -> Option<f64> {
    if period == 0 || end + 1 < period || end >= closes.len() {
        return None;
    }
    let window = &closes[end + 1 - period..=end];
    Some(window.iter().sum::<f64>() / period as f64)
}

pub fn benchmark_trend(symbol: &str, bars: &[Bar], periods: &[usize]) -> Option<BenchmarkTrend> {
    let closes: Vec<f64> = bars.iter().map(|bar| bar.close).collect();
    let last = closes.len().checked_sub(1)?;
    let price = closes[last];

    let smas = periods
        .iter()
        .map(|&period| {
            let value = sma_at(&closes, last, period);
            SmaReading {
                period,
                value,
                price_above: value.map(|sma| price > sma),
            }
        })
        .collect();

    let sma20_slope = if closes.len() >= 25 {
        match (sma_at(&closes, last, 20), sma_at(&closes, last - 4, 20)) {
            (Some(now), Some(before)) => Some((now - before) / 5.0),
            _ => None,
        }
    } else {
        None
    };

    let return_20d = if closes.len() >= 21 {
        let base = closes[last - 20];
        (base != 0.0).then(|| (price - base) / base)
    } else {
        None
    };

    Some(BenchmarkTrend {
        symbol: symbol.to_string(),
        price,
        smas,
        sma20_slope,
        return_20d,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset)
    }

    fn closes(values: &[f64]) -> Vec<ClosePoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, close)| ClosePoint {
                date: day(i as i64),
                close: *close,
            })
            .collect()
    }

    fn bars(values: &[f64]) -> Vec<Bar> {
        values
            .iter()
            .enumerate()
            .map(|(i, close)| Bar {
                date: day(i as i64),
                open: *close,
                high: close + 1.0,
                low: close - 1.0,
                close: *close,
                volume: 1000.0,
            })
            .collect()
    }

    #[test]
    fn test_strength_buckets() {
        assert_eq!(MomentumStrength::from_rel_mom(0.06), MomentumStrength::Strong);
        assert_eq!(MomentumStrength::from_rel_mom(0.05), MomentumStrength::ModerateStrong);
        assert_eq!(MomentumStrength::from_rel_mom(0.0), MomentumStrength::Neutral);
        assert_eq!(MomentumStrength::from_rel_mom(-0.02), MomentumStrength::ModerateWeak);
        assert_eq!(MomentumStrength::from_rel_mom(-0.05), MomentumStrength::Weak);
    }

    #[test]
    fn test_relative_strength_inner_joins_on_date() {
        let sector = closes(&[10.0, 11.0, 12.0]);
        let mut benchmark = closes(&[100.0, 100.0, 100.0]);
        benchmark.remove(1);

        let rows = relative_strength(&sector, &benchmark);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, day(0));
        assert_eq!(rows[1].date, day(2));
        assert!((rows[1].rs - 0.12).abs() < 1e-12);
    }

    #[test]
    fn test_rel_mom_treats_missing_changes_as_zero() {
        // Sector gains 1% a day, benchmark flat: only the 5-row change exists
        let values: Vec<f64> = (0..10).map(|i| 100.0 * 1.01_f64.powi(i)).collect();
        let sector = closes(&values);
        let benchmark = closes(&[50.0; 10]);

        let result = analyze_relative_momentum("XLK", "SPY", &sector, &benchmark).unwrap();

        let rs_5d = result.rs_5d.unwrap();
        assert!((rs_5d - (1.01_f64.powi(5) - 1.0)).abs() < 1e-12);
        assert!(result.rs_20d.is_none());
        assert!(result.rs_63d.is_none());
        assert!((result.rel_mom.unwrap() - rs_5d * 3.0 / 6.0).abs() < 1e-12);
        assert_eq!(result.strength, Some(MomentumStrength::ModerateStrong));
        assert_eq!(result.date, day(9));
    }

    #[test]
    fn test_no_overlap_yields_none() {
        let sector = closes(&[1.0, 2.0]);
        let benchmark: Vec<ClosePoint> = Vec::new();
        assert!(analyze_relative_momentum("XLE", "SPY", &sector, &benchmark).is_none());
    }

    #[test]
    fn test_rank_by_momentum() {
        let template = analyze_relative_momentum("A", "SPY", &closes(&[1.0]), &closes(&[1.0])).unwrap();
        let mut results: Vec<RelativeMomentum> = [Some(0.01), None, Some(0.08), Some(-0.03)]
            .into_iter()
            .enumerate()
            .map(|(i, rel_mom)| RelativeMomentum {
                symbol: format!("S{}", i),
                rel_mom,
                ..template.clone()
            })
            .collect();

        rank_by_momentum(&mut results);

        let order: Vec<_> = results.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(order, vec!["S2", "S0", "S3", "S1"]);
    }

    #[test]
    fn test_fifty_two_week_range() {
        let range = fifty_two_week_range("NVDA", &bars(&[100.0, 150.0, 120.0])).unwrap();

        assert_eq!(range.high_52w, 151.0);
        assert_eq!(range.low_52w, 99.0);
        assert_eq!(range.current, 120.0);
        assert!((range.pct_from_high - (120.0 - 151.0) / 151.0 * 100.0).abs() < 1e-12);
        assert!(fifty_two_week_range("NVDA", &[]).is_none());
    }

    #[test]
    fn test_benchmark_trend_on_linear_series() {
        // close = 100 + i, so SMA20 grows by 1 per day
        let values: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let trend = benchmark_trend("SPY", &bars(&values), &[20, 50]).unwrap();

        assert_eq!(trend.price, 129.0);
        let sma20 = trend.sma(20).unwrap();
        assert_eq!(sma20.value, Some(119.5));
        assert_eq!(sma20.price_above, Some(true));
        let sma50 = trend.sma(50).unwrap();
        assert_eq!(sma50.value, None);
        assert_eq!(sma50.price_above, None);

        assert!((trend.sma20_slope.unwrap() - 0.8).abs() < 1e-12);
        assert!((trend.return_20d.unwrap() - 20.0 / 109.0).abs() < 1e-12);
    }

    #[test]
    fn test_benchmark_trend_short_history() {
        let trend = benchmark_trend("SPY", &bars(&[100.0; 10]), &[20]).unwrap();
        assert!(trend.sma20_slope.is_none());
        assert!(trend.return_20d.is_none());
        assert!(benchmark_trend("SPY", &[], &[20]).is_none());
    }
}
