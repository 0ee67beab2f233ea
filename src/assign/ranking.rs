use std::cmp::Ordering;

use crate::geo::haversine_km;
use crate::models::driver::{Driver, GeoPoint};

/// Orders the eligible drivers for an offer: nearest to the pickup
/// anchor first when both locations are known, ties broken by lowest
/// rejection count, then by longest idle time. Drivers without a live
/// location sort after located ones.
pub fn rank_candidates(drivers: Vec<Driver>, anchor: Option<&GeoPoint>) -> Vec<Driver> {
    let mut candidates: Vec<Driver> = drivers
        .into_iter()
        .filter(|d| d.is_available && d.current_order_id.is_none())
        .collect();

    candidates.sort_by(|a, b| {
        compare_proximity(proximity(a, anchor), proximity(b, anchor))
            .then_with(|| a.rejected_orders_count.cmp(&b.rejected_orders_count))
            .then_with(|| a.updated_at.cmp(&b.updated_at))
    });

    candidates
}

fn proximity(driver: &Driver, anchor: Option<&GeoPoint>) -> Option<f64> {
    match (driver.location.as_ref(), anchor) {
        (Some(location), Some(target)) => Some(haversine_km(location, target)),
        _ => None,
    }
}

fn compare_proximity(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
