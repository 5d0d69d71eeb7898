//! Energy expenditure model
//!
//! `kcal = weight × METs(speed) × hours × 1.05`, with METs taken from a
//! speed-bucketed table. A fixed per-kilometer rate is kept as an
//! alternative for devices without a body-weight profile.

/// Speed bucket upper bounds (km/h) and their METs values
const METS_TABLE: [(f64, f64); 3] = [(6.0, 3.5), (8.0, 7.0), (10.0, 9.0)];
const METS_TOP: f64 = 11.0;
const CALORIE_CORRECTION: f64 = 1.05;

/// Default rate for the fixed-rate model (kcal per kilometer)
pub const DEFAULT_FIXED_RATE_KCAL_PER_KM: f64 = 60.0;

/// METs for a given speed in km/h
pub fn mets(speed_kmh: f64) -> f64 {
    METS_TABLE
        .iter()
        .find(|(bound, _)| speed_kmh < *bound)
        .map(|(_, mets)| *mets)
        .unwrap_or(METS_TOP)
}

/// METs-based calories, rounded to whole kcal. Zero if any input is non-positive.
pub fn mets_calories(distance_meters: f64, duration_seconds: u32, weight_kg: u32) -> u32 {
    if !(distance_meters > 0.0) || duration_seconds == 0 || weight_kg == 0 {
        return 0;
    }
    let hours = f64::from(duration_seconds) / 3600.0;
    let speed_kmh = (distance_meters / 1000.0) / hours;
    let kcal = f64::from(weight_kg) * mets(speed_kmh) * hours * CALORIE_CORRECTION;
    kcal.round() as u32
}

/// Calorie model, selected once at engine construction
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalorieModel {
    /// Weight-aware METs table
    Mets,
    /// Weight-independent rate, truncated to whole kcal
    FixedRate { kcal_per_km: f64 },
}

impl Default for CalorieModel {
    fn default() -> Self {
        CalorieModel::Mets
    }
}

impl CalorieModel {
    pub fn calories(&self, distance_meters: f64, duration_seconds: u32, weight_kg: u32) -> u32 {
        match *self {
            CalorieModel::Mets => mets_calories(distance_meters, duration_seconds, weight_kg),
            CalorieModel::FixedRate { kcal_per_km } => {
                if !(distance_meters > 0.0) || !(kcal_per_km > 0.0) {
                    return 0;
                }
                (distance_meters / 1000.0 * kcal_per_km) as u32
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CalorieModel::Mets => "mets",
            CalorieModel::FixedRate { .. } => "fixed_rate",
        }
    }
}
