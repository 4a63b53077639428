//! International Standard Atmosphere up to 20 km and the systems that evaluate it
//! along the flight profile.

use mission_core::constants::{GAMMA_AIR, R_AIR, RHO_SL, T_SL};
use mission_graph::SystemError;
use thiserror::Error;

pub mod systems;

pub use systems::{Density, Speed, Temperature};

/// Tropopause altitude (km).
pub const TROPOPAUSE_KM: f64 = 11.0;
/// Temperature lapse rate in the troposphere (K/km).
pub const LAPSE_RATE_K_PER_KM: f64 = 6.5;
/// Isothermal stratosphere temperature (K).
pub const T_STRATOSPHERE: f64 = 216.65;
/// Density at the tropopause (kg/m³).
pub const RHO_TROPOPAUSE: f64 = 0.36392;
/// Density scale height above the tropopause (m).
pub const SCALE_HEIGHT_M: f64 = 6341.62;
/// Exponent of the tropospheric density–temperature relation.
pub const DENSITY_EXPONENT: f64 = 4.2559;
/// Altitude range the model accepts (km).
pub const ALTITUDE_RANGE_KM: (f64, f64) = (-1.0, 20.0);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AtmosphereError {
    #[error("altitude {0:.3} km lies outside the atmosphere model range")]
    AltitudeOutOfRange(f64),
    #[error("temperature {0:.3} K is not physical")]
    NonPositiveTemperature(f64),
}

impl From<AtmosphereError> for SystemError {
    fn from(err: AtmosphereError) -> Self {
        SystemError::Domain(err.to_string())
    }
}

/// Atmospheric properties at one altitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtmosphereState {
    pub temperature_k: f64,
    pub density_kg_m3: f64,
    pub speed_of_sound_m_s: f64,
}

fn check_altitude(h_km: f64) -> Result<(), AtmosphereError> {
    let (low, high) = ALTITUDE_RANGE_KM;
    if !(low..=high).contains(&h_km) {
        return Err(AtmosphereError::AltitudeOutOfRange(h_km));
    }
    Ok(())
}

/// Static temperature (K) and its altitude derivative (K/km).
pub fn temperature(h_km: f64) -> Result<(f64, f64), AtmosphereError> {
    check_altitude(h_km)?;
    if h_km <= TROPOPAUSE_KM {
        Ok((T_SL - LAPSE_RATE_K_PER_KM * h_km, -LAPSE_RATE_K_PER_KM))
    } else {
        Ok((T_STRATOSPHERE, 0.0))
    }
}

/// Density (kg/m³) with its derivatives with respect to altitude (per km) and temperature (per K).
pub fn density(h_km: f64, temperature_k: f64) -> Result<(f64, f64, f64), AtmosphereError> {
    check_altitude(h_km)?;
    if temperature_k <= 0.0 {
        return Err(AtmosphereError::NonPositiveTemperature(temperature_k));
    }
    if h_km <= TROPOPAUSE_KM {
        let rho = RHO_SL * (temperature_k / T_SL).powf(DENSITY_EXPONENT);
        Ok((rho, 0.0, DENSITY_EXPONENT * rho / temperature_k))
    } else {
        let k = 1_000.0 / SCALE_HEIGHT_M;
        let rho = RHO_TROPOPAUSE * (-(h_km - TROPOPAUSE_KM) * k).exp();
        Ok((rho, -k * rho, 0.0))
    }
}

/// Speed of sound (m/s).
pub fn speed_of_sound(temperature_k: f64) -> Result<f64, AtmosphereError> {
    if temperature_k <= 0.0 {
        return Err(AtmosphereError::NonPositiveTemperature(temperature_k));
    }
    Ok((GAMMA_AIR * R_AIR * temperature_k).sqrt())
}

/// Full standard-atmosphere state at an altitude in km.
pub fn standard_atmosphere(h_km: f64) -> Result<AtmosphereState, AtmosphereError> {
    let (temperature_k, _) = temperature(h_km)?;
    let (density_kg_m3, _, _) = density(h_km, temperature_k)?;
    Ok(AtmosphereState {
        temperature_k,
        density_kg_m3,
        speed_of_sound_m_s: speed_of_sound(temperature_k)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn sea_level_matches_standard_values() {
        let state = standard_atmosphere(0.0).unwrap();
        assert_relative_eq!(state.temperature_k, 288.15);
        assert_relative_eq!(state.density_kg_m3, 1.225);
        assert_relative_eq!(state.speed_of_sound_m_s, 340.3, epsilon = 0.1);
    }

    #[test]
    fn density_is_continuous_at_the_tropopause() {
        let below = standard_atmosphere(TROPOPAUSE_KM).unwrap();
        let above = standard_atmosphere(TROPOPAUSE_KM + 1e-9).unwrap();
        assert_relative_eq!(below.density_kg_m3, above.density_kg_m3, epsilon = 1e-4);
    }

    #[test]
    fn rejects_altitudes_outside_model() {
        assert!(matches!(
            standard_atmosphere(25.0),
            Err(AtmosphereError::AltitudeOutOfRange(_))
        ));
        assert!(standard_atmosphere(-2.0).is_err());
    }
}
