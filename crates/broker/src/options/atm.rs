//! At-the-money selection.

use std::collections::HashMap;

use super::models::{OptionContract, OptionType, SnapshotRecord};

/// Delta of an at-the-money call.
const ATM_DELTA: f64 = 0.5;

/// IVs at or below this are fractions and get scaled to percent.
const FRACTION_IV_CEILING: f64 = 1.5;

/// Scales a fractional IV (`0.24`) to percent (`24.0`); percent values pass through.
pub fn normalize_iv(iv: f64) -> f64 {
    if iv <= FRACTION_IV_CEILING {
        iv * 100.0
    } else {
        iv
    }
}

/// IV (percent) of the call whose delta is closest to 0.5.
///
/// Puts and contracts without both delta and IV are ignored. On a tie the first
/// contract in `contracts` wins.
pub fn pick_atm_iv(
    contracts: &[OptionContract],
    snapshots: &HashMap<String, SnapshotRecord>,
) -> Option<f64> {
    let mut best: Option<(f64, f64)> = None;

    for contract in contracts {
        if contract.option_type != OptionType::Call {
            continue;
        }
        let Some(snapshot) = snapshots.get(&contract.code) else {
            continue;
        };
        let (Some(delta), Some(iv)) = (snapshot.delta, snapshot.implied_volatility) else {
            continue;
        };

        let diff = (delta - ATM_DELTA).abs();
        if best.map_or(true, |(best_diff, _)| diff < best_diff) {
            best = Some((diff, iv));
        }
    }

    best.map(|(_, iv)| normalize_iv(iv))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract(code: &str, option_type: OptionType) -> OptionContract {
        OptionContract {
            code: code.to_string(),
            option_type,
            expiry: "2024-02-16".to_string(),
        }
    }

    fn snapshot(code: &str, delta: Option<f64>, iv: Option<f64>) -> (String, SnapshotRecord) {
        (
            code.to_string(),
            SnapshotRecord {
                code: code.to_string(),
                delta,
                implied_volatility: iv,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_normalize_iv() {
        assert_eq!(normalize_iv(0.25), 25.0);
        assert_eq!(normalize_iv(1.5), 150.0);
        assert_eq!(normalize_iv(24.0), 24.0);
    }

    #[test]
    fn test_picks_call_closest_to_half_delta() {
        let contracts = vec![
            contract("C1", OptionType::Call),
            contract("C2", OptionType::Call),
            contract("P1", OptionType::Put),
        ];
        let snapshots: HashMap<_, _> = [
            snapshot("C1", Some(0.70), Some(0.20)),
            snapshot("C2", Some(0.48), Some(0.25)),
            snapshot("P1", Some(-0.50), Some(0.90)),
        ]
        .into_iter()
        .collect();

        assert_eq!(pick_atm_iv(&contracts, &snapshots), Some(25.0));
    }

    #[test]
    fn test_tie_keeps_first_contract() {
        let contracts = vec![contract("C1", OptionType::Call), contract("C2", OptionType::Call)];
        let snapshots: HashMap<_, _> = [
            snapshot("C1", Some(0.45), Some(22.0)),
            snapshot("C2", Some(0.55), Some(28.0)),
        ]
        .into_iter()
        .collect();

        assert_eq!(pick_atm_iv(&contracts, &snapshots), Some(22.0));
    }

    #[test]
    fn test_incomplete_snapshots_are_skipped() {
        let contracts = vec![
            contract("C1", OptionType::Call),
            contract("C2", OptionType::Call),
            contract("C3", OptionType::Call),
        ];
        let snapshots: HashMap<_, _> = [
            snapshot("C1", None, Some(0.3)),
            snapshot("C2", Some(0.5), None),
        ]
        .into_iter()
        .collect();

        assert_eq!(pick_atm_iv(&contracts, &snapshots), None);
    }

    #[test]
    fn test_puts_only_yield_nothing() {
        let contracts = vec![contract("P1", OptionType::Put)];
        let snapshots: HashMap<_, _> = [snapshot("P1", Some(-0.5), Some(0.3))].into_iter().collect();

        assert_eq!(pick_atm_iv(&contracts, &snapshots), None);
    }
}
