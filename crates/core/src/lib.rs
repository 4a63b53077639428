//! Core units, constants, and shared numerics for the mission analysis workspace.
//!
//! Station quantities inside the analysis graph use scaled units so that every
//! coupled unknown is of order one:
//!
//! | quantity | unit |
//! |---|---|
//! | distance `x` | 1e6 m |
//! | altitude `h` | km |
//! | speed `v` | 1e2 m/s |
//! | wing area `S` | 1e2 m² |
//! | fuel weight, thrust | 1e6 N |
//! | aircraft weight `ac_w` | kN |
//! | specific fuel consumption | 1e-6 1/s |

pub mod linalg;

/// Physical constants expressed in SI units (unless stated otherwise).
pub mod constants {
    /// Standard gravity at Earth's surface (m/s²).
    pub const G0: f64 = 9.80665;
    /// Kilometres per nautical mile.
    pub const KM_PER_NMI: f64 = 1.852;
    /// Seconds per hour.
    pub const SECONDS_PER_HOUR: f64 = 3_600.0;
    /// Weight of one passenger with baggage allowance (N).
    pub const PASSENGER_WEIGHT_N: f64 = 84.0 * 9.81;
    /// Sea-level standard density (kg/m³).
    pub const RHO_SL: f64 = 1.225;
    /// Sea-level standard temperature (K).
    pub const T_SL: f64 = 288.15;
    /// Specific gas constant of dry air (J/(kg·K)).
    pub const R_AIR: f64 = 287.053;
    /// Ratio of specific heats for air.
    pub const GAMMA_AIR: f64 = 1.4;
}

/// Basic unit conversion helpers between engineering and scaled graph units.
pub mod units {
    use super::constants::{G0, KM_PER_NMI};

    /// Convert nautical miles to the graph distance unit (1e6 m).
    #[inline]
    pub fn nmi_to_mm(v: f64) -> f64 {
        v * KM_PER_NMI / 1_000.0
    }

    /// Convert the graph distance unit (1e6 m) to nautical miles.
    #[inline]
    pub fn mm_to_nmi(v: f64) -> f64 {
        v * 1_000.0 / KM_PER_NMI
    }

    /// Convert kilonewtons to the graph force unit (1e6 N).
    #[inline]
    pub fn kn_to_mn(v: f64) -> f64 {
        v / 1_000.0
    }

    /// Convert a weight in the graph force unit (1e6 N) to a mass in kilograms.
    #[inline]
    pub fn mn_to_kg(v: f64) -> f64 {
        v * 1.0e6 / G0
    }

    /// Convert the graph speed unit (1e2 m/s) to metres per second.
    #[inline]
    pub fn hms_to_ms(v: f64) -> f64 {
        v * 100.0
    }
}
