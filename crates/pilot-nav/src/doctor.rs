use anyhow::Result;

use crate::RouteCfg;

pub fn check_route(route: &RouteCfg) -> Result<()> {
    let steps = route.steps();
    anyhow::ensure!((1..=10_000).contains(&steps), "route.steps should be 1..10000, got {}", steps);
    anyhow::ensure!(route.pace().as_millis() <= 10_000, "route.pace_ms too large");
    anyhow::ensure!(route.waypoints.len() >= 2, "route.waypoints must have >= 2 points");
    for (i, w) in route.waypoints.iter().enumerate() {
        anyhow::ensure!(w.is_valid(), "route.waypoints[{}] out of range: {}", i, w);
    }
    Ok(())
}
