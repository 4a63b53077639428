//! Initial control points for a mission leg.

use std::f64::consts::PI;
use std::sync::Arc;

use mission_aero::SurrogateTable;
use mission_atmosphere::standard_atmosphere;
use mission_config::{AircraftParams, Discretization, LegConfig};
use mission_core::linalg::linspace;
use mission_core::units::nmi_to_mm;
use mission_graph::NewtonSettings;
use nalgebra::DVector;

use crate::SegmentError;
use crate::segment::{Segment, SegmentConfig};

/// Control points and settings for one leg, before assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct LegPlan {
    pub name: String,
    pub num_elem: usize,
    /// Cosine-spaced abscissas over the leg (1e6 m).
    pub x_pts: Vec<f64>,
    /// `h_c · sin(π x / x_R)` (km).
    pub h_pt: Vec<f64>,
    pub mach_pt: Vec<f64>,
    /// Cruise Mach converted at each control point's altitude (1e2 m/s).
    pub v_pt: Vec<f64>,
    pub pax: f64,
    /// Per-station altitude target the control points are fitted to, if requested.
    pub fit_target: Option<DVector<f64>>,
    pub velocity_specified: bool,
}

impl LegPlan {
    pub fn new(leg: &LegConfig, discretization: &Discretization) -> Result<Self, SegmentError> {
        leg.validate()
            .map_err(|err| SegmentError::Configuration(err.to_string()))?;
        let num_cp = discretization.num_cp;
        let x_range = nmi_to_mm(leg.range_nmi);
        let hc = leg.cruise_altitude_km;

        let x_pts: Vec<f64> = linspace(0.0, 1.0, num_cp)
            .into_iter()
            .map(|t| x_range * (1.0 - (t * PI).cos()) / 2.0)
            .collect();
        let h_pt: Vec<f64> = x_pts.iter().map(|x| hc * (PI * x / x_range).sin()).collect();
        let v_pt = h_pt
            .iter()
            .map(|&h| {
                standard_atmosphere(h)
                    .map(|state| leg.mach * state.speed_of_sound_m_s / 100.0)
                    .map_err(|err| SegmentError::Configuration(err.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let fit_target = leg.fit_profile.then(|| {
            let stations = linspace(0.0, 1.0, discretization.num_elem + 1);
            DVector::from_iterator(stations.len(), stations.into_iter().map(|t| hc * (PI * t).sin()))
        });

        Ok(Self {
            name: leg.label(),
            num_elem: discretization.num_elem,
            x_pts,
            h_pt,
            mach_pt: vec![leg.mach; num_cp],
            v_pt,
            pax: leg.pax,
            fit_target,
            velocity_specified: leg.velocity_specified,
        })
    }

    /// Assemble the segment and install the initial boundary values.
    pub fn assemble(
        &self,
        params: AircraftParams,
        table: Arc<SurrogateTable>,
        newton: NewtonSettings,
    ) -> Result<Segment, SegmentError> {
        let mut config = SegmentConfig::new(self.num_elem, self.x_pts.clone(), params);
        config.newton = newton;
        config.velocity_specified = self.velocity_specified;
        let mut segment = Segment::new(config, table)?;
        segment.set_mach_pt(&self.mach_pt)?;
        segment.set_v_pt(&self.v_pt)?;
        segment.set_pax(self.pax)?;
        match &self.fit_target {
            Some(target) => {
                segment.set_init_h_pt(target)?;
            }
            None => segment.set_h_pt(&self.h_pt)?,
        }
        Ok(segment)
    }
}
