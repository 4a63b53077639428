//! Parametric transport-wing aerodynamics used to populate surrogate tables.
//!
//! Angles are in degrees at the interface and radians inside the formulas.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Coefficients of the parametric lift, drag and pitching-moment model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurrogateModel {
    /// Wing aspect ratio used for the lift-curve slope.
    pub aspect_ratio: f64,
    /// Airfoil efficiency in the Helmbold slope.
    pub kappa: f64,
    pub cl0: f64,
    /// Tail-incidence lift derivative (per rad).
    pub cl_eta: f64,
    pub cm0: f64,
    pub cm_alpha: f64,
    pub cm_eta: f64,
    /// Zero-lift drag at sea level.
    pub cd0: f64,
    /// Skin-friction growth with altitude (per km).
    pub cd0_altitude: f64,
    pub cd_alpha2: f64,
    pub cd_eta2: f64,
    pub mach_critical: f64,
    pub wave_drag_factor: f64,
}

impl Default for SurrogateModel {
    fn default() -> Self {
        Self {
            aspect_ratio: 9.0,
            kappa: 0.95,
            cl0: 0.2,
            cl_eta: 0.3,
            cm0: 0.02,
            cm_alpha: -0.8,
            cm_eta: -1.5,
            cd0: 0.016,
            cd0_altitude: 1.5e-4,
            cd_alpha2: 0.05,
            cd_eta2: 0.02,
            mach_critical: 0.8,
            wave_drag_factor: 20.0,
        }
    }
}

impl SurrogateModel {
    /// Lift-curve slope (per rad) from the Helmbold equation with Prandtl–Glauert compressibility.
    pub fn lift_slope(&self, mach: f64) -> f64 {
        let beta = (1.0 - mach * mach).max(1.0e-4).sqrt();
        let a = self.aspect_ratio;
        let term = a * beta / self.kappa;
        2.0 * PI * a / (2.0 + (4.0 + term * term).sqrt())
    }

    pub fn lift(&self, mach: f64, _h_km: f64, alpha_deg: f64, eta_deg: f64) -> f64 {
        self.cl0 + self.lift_slope(mach) * alpha_deg.to_radians() + self.cl_eta * eta_deg.to_radians()
    }

    /// Parasite, wave and trim drag. Induced drag is added by the drag system.
    pub fn drag(&self, mach: f64, h_km: f64, alpha_deg: f64, eta_deg: f64) -> f64 {
        let alpha = alpha_deg.to_radians();
        let eta = eta_deg.to_radians();
        let excess = (mach - self.mach_critical).max(0.0);
        self.cd0
            + self.cd0_altitude * h_km
            + self.wave_drag_factor * excess.powi(4)
            + self.cd_alpha2 * alpha * alpha
            + self.cd_eta2 * eta * eta
    }

    pub fn moment(&self, _mach: f64, _h_km: f64, alpha_deg: f64, eta_deg: f64) -> f64 {
        self.cm0 + self.cm_alpha * alpha_deg.to_radians() + self.cm_eta * eta_deg.to_radians()
    }
}

/// Sample grid of a surrogate table: Mach, altitude (km), α (deg), η (deg).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub mach: Vec<f64>,
    pub altitude: Vec<f64>,
    pub alpha: Vec<f64>,
    pub eta: Vec<f64>,
}

fn steps(start: f64, end: f64, step: f64) -> Vec<f64> {
    let n = ((end - start) / step).round() as usize;
    (0..=n).map(|i| start + step * i as f64).collect()
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            mach: steps(0.1, 0.95, 0.05),
            altitude: steps(-1.0, 16.0, 1.0),
            alpha: steps(-10.0, 15.0, 2.5),
            eta: steps(-10.0, 10.0, 2.5),
        }
    }
}
