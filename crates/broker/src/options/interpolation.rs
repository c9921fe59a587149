//! IV term-structure interpolation.
//!
//! Interpolates in variance space: with `v = (iv / 100)^2`, the variance at the
//! target horizon is linear between the two bracketing expirations. Outside the
//! range of observed expirations the nearest point is returned unchanged; there
//! is no extrapolation.

use super::models::DtePoint;

/// Horizons (days) reported in an [`IvTermResult`](super::IvTermResult).
pub const TARGET_HORIZONS: [u32; 4] = [7, 30, 60, 90];

/// IV (percent) at `target` days from points sorted by ascending `dte`.
pub fn interpolate_iv(points: &[DtePoint], target: u32) -> Option<f64> {
    match points {
        [] => return None,
        [only] => return Some(only.atm_iv),
        _ => {}
    }

    let mut lower: Option<DtePoint> = None;
    let mut upper: Option<DtePoint> = None;
    for point in points {
        if point.dte == target {
            return Some(point.atm_iv);
        }
        if point.dte < target {
            lower = Some(*point);
        } else {
            upper = Some(*point);
            break;
        }
    }

    match (lower, upper) {
        (Some(low), Some(high)) => {
            if low.dte == high.dte {
                return Some(low.atm_iv);
            }
            let low_var = (low.atm_iv / 100.0).powi(2);
            let high_var = (high.atm_iv / 100.0).powi(2);
            let weight = f64::from(target - low.dte) / f64::from(high.dte - low.dte);
            let variance = low_var + (high_var - low_var) * weight;
            Some(variance.sqrt() * 100.0)
        }
        (Some(nearest), None) | (None, Some(nearest)) => Some(nearest.atm_iv),
        (None, None) => None,
    }
}

/// IVs at every [`TARGET_HORIZONS`] entry, in order.
pub fn term_structure(points: &[DtePoint]) -> [Option<f64>; 4] {
    TARGET_HORIZONS.map(|target| interpolate_iv(points, target))
}
