//! Agronomic formulas behind the service RPCs.
//!
//! Every function here is pure and total: no validation, no I/O. Callers
//! decide how to treat inputs the formulas cannot make sense of.

/// Hectares in one acre.
pub const HECTARES_PER_ACRE: f64 = 0.404686;

/// Nitrogen uptake rate in kgN per hectare per day.
pub const NITROGEN_UPTAKE_KG_PER_HA_DAY: f64 = 2.5;

/// Length of the growing season the fertilizer estimate covers.
pub const SEASON_DAYS: f64 = 90.0;

/// Factor applied to a moisture reading to get the watering level in mm.
pub const WATERING_FACTOR: f64 = 1.5;

/// Total nitrogen (kg) a field of `acres` needs over the season.
pub fn fertilizer_nitrogen_kg(acres: f64) -> f64 {
    let hectares = acres * HECTARES_PER_ACRE;
    hectares * NITROGEN_UPTAKE_KG_PER_HA_DAY * SEASON_DAYS
}

/// Gravimetric soil moisture: `(wet - dry) / dry * 100`.
///
/// Returns `None` when `dry` is zero; the caller should drop that sample.
pub fn moisture_percentage(wet: f64, dry: f64) -> Option<f64> {
    if dry == 0.0 {
        return None;
    }
    Some((wet - dry) / dry * 100.0)
}

/// Recommended watering level (mm) for a moisture reading.
pub fn recommended_level(moisture: f64) -> f64 {
    moisture * WATERING_FACTOR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fertilizer_matches_formula() {
        for acres in [0.0, 1.0, 2.5, 10.0, 1234.5] {
            assert_eq!(
                fertilizer_nitrogen_kg(acres),
                acres * 0.404686 * 2.5 * 90.0
            );
        }
    }

    #[test]
    fn fertilizer_keeps_negative_input() {
        assert!(fertilizer_nitrogen_kg(-1.0) < 0.0);
    }

    #[test]
    fn moisture_rejects_zero_dry_weight() {
        assert_eq!(moisture_percentage(10.0, 0.0), None);
        assert_eq!(moisture_percentage(0.0, -0.0), None);
    }

    #[test]
    fn moisture_percentage_exact() {
        assert_eq!(moisture_percentage(110.0, 100.0), Some(10.0));
        assert_eq!(moisture_percentage(120.0, 100.0), Some(20.0));
        assert_eq!(
            moisture_percentage(7.0, 3.0),
            Some((7.0 - 3.0) / 3.0 * 100.0)
        );
    }

    #[test]
    fn watering_scales_linearly() {
        assert_eq!(recommended_level(10.0), 15.0);
        assert_eq!(recommended_level(20.0), 30.0);
        assert_eq!(recommended_level(0.0), 0.0);
    }
}
