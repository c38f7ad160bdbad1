//! Fuel gauge arithmetic. Levels are liters and always stay within
//! `[0, capacity]`; nothing here fails.

/// Liters burned driving `km` at the given efficiency.
pub fn liters_for(km: f64, km_per_liter: f64) -> f64 {
    if km <= 0.0 {
        return 0.0;
    }
    km / km_per_liter.max(f64::EPSILON)
}

/// Gauge after driving `km`.
pub fn deplete(level: f64, km: f64, km_per_liter: f64) -> f64 {
    (level - liters_for(km, km_per_liter)).max(0.0)
}

/// Gauge after a refuel. A full tank ignores the liters figure.
pub fn refuel(level: f64, capacity: f64, liters_added: f64, full_tank: bool) -> f64 {
    let capacity = capacity.max(0.0);
    if full_tank {
        return capacity;
    }
    (level + liters_added.max(0.0)).clamp(0.0, capacity)
}

/// Distance left on the current gauge.
pub fn estimated_range_km(level: f64, km_per_liter: f64) -> f64 {
    level.max(0.0) * km_per_liter.max(0.0)
}

/// Gauge as a share of the tank, 0.0 to 1.0.
pub fn fill_ratio(level: f64, capacity: f64) -> f64 {
    if capacity <= 0.0 {
        return 0.0;
    }
    (level / capacity).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_deplete_by_efficiency() {
        assert_relative_eq!(deplete(40.0, 25.0, 10.0), 37.5);
    }

    #[test]
    fn test_deplete_saturates_at_empty() {
        assert_eq!(deplete(2.0, 1000.0, 10.0), 0.0);
    }

    #[test]
    fn test_full_tank_ignores_liters() {
        assert_eq!(refuel(3.0, 50.0, 0.0, true), 50.0);
        assert_eq!(refuel(49.0, 50.0, 80.0, true), 50.0);
    }

    #[test]
    fn test_partial_refuel_clamps_to_capacity() {
        assert_relative_eq!(refuel(10.0, 50.0, 15.0, false), 25.0);
        assert_eq!(refuel(45.0, 50.0, 15.0, false), 50.0);
    }

    #[test]
    fn test_level_stays_in_bounds() {
        let capacity = 50.0;
        let mut level = 20.0;
        for step in 0..200 {
            if step % 3 == 0 {
                level = refuel(level, capacity, step as f64, false);
            } else {
                level = deplete(level, step as f64 * 7.0, 9.0);
            }
            assert!((0.0..=capacity).contains(&level));
        }
    }

    #[test]
    fn test_range_and_ratio() {
        assert_relative_eq!(estimated_range_km(20.0, 12.0), 240.0);
        assert_relative_eq!(fill_ratio(12.5, 50.0), 0.25);
        assert_eq!(fill_ratio(10.0, 0.0), 0.0);
    }
}
