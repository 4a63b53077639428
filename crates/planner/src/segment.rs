//! One mission leg assembled into a fixed graph.
//!
//! Execution order: boundary values, the four spline systems, the atmosphere
//! chain, the coupled equilibrium group, then the functionals. The coupled
//! group solves for angle of attack and trim incidence; the thrust
//! coefficient and fuel weight it feeds back to the equilibrium systems are
//! torn automatically.

use std::sync::Arc;

use mission_aero::{Drag, Lift, Moment, SurrogateTable};
use mission_atmosphere::{Density, Speed, Temperature, standard_atmosphere};
use mission_config::AircraftParams;
use mission_core::linalg::LinearSettings;
use mission_graph::{
    CoupledGroup, DerivativeMode, Graph, IndependentVars, NewtonSettings, PartialCheck, RunReport,
    System, Workflow, total_derivatives,
};
use mission_performance::{BlockTime, CLTarget, CTTarget, FuelBurn, FuelWeight};
use mission_propulsion::{EngineModel, Sfc, Tau, ThrustBound, ThrustMargin};
use mission_splines::{MachSpline, SplineEval, SplineOperators, fit_control_points};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::SegmentError;

/// Name of the system holding the boundary inputs.
pub const PARAMS: &str = "params";
/// Name of the coupled equilibrium group.
pub const COUPLED_GROUP: &str = "coupled";

const DEFAULT_MACH: f64 = 0.82;

/// Ports of `params` a caller may write before the first run.
pub const BOUNDARY_INPUTS: [&str; 10] = [
    "h_pt", "M_pt", "v_pt", "S", "ac_w", "thrust_sl", "SFCSL", "AR", "e", "pax_flt",
];

/// Readable outputs after a run, by short name.
pub const BOUNDARY_OUTPUTS: [(&str, &str); 6] = [
    ("fuelburn", "fuel_burn.fuelburn"),
    ("time", "block_time.time"),
    ("Tmin", "tmin.Tmin"),
    ("Tmax", "tmax.Tmax"),
    ("h", "h_spline.h"),
    ("gamma", "gamma_spline.gamma"),
];

const CONNECTIONS: &[(&str, &[&str])] = &[
    ("params.x_pt", &["x_spline.x_pt"]),
    ("params.h_pt", &["h_spline.h_pt", "gamma_spline.h_pt"]),
    ("params.M_pt", &["mach_spline.M_pt"]),
    ("params.v_pt", &["mach_spline.v_pt"]),
    ("params.S", &["cl_target.S", "ct_target.S", "fuel_weight.S", "tau.S"]),
    ("params.ac_w", &["cl_target.ac_w", "ct_target.ac_w"]),
    ("params.pax_flt", &["cl_target.pax_flt", "ct_target.pax_flt"]),
    ("params.thrust_sl", &["tau.thrust_sl"]),
    ("params.SFCSL", &["sfc.SFCSL"]),
    ("params.AR", &["drag.AR"]),
    ("params.e", &["drag.e"]),
    ("x_spline.x", &["fuel_weight.x", "block_time.x"]),
    (
        "h_spline.h",
        &["sfc.h", "temp.h", "rho.h", "lift.h", "moment.h", "drag.h", "tau.h"],
    ),
    ("mach_spline.M", &["speed.M", "lift.M", "moment.M", "drag.M"]),
    ("mach_spline.v_spline", &["speed.v_spline"]),
    (
        "gamma_spline.gamma",
        &["cl_target.gamma", "ct_target.gamma", "fuel_weight.gamma", "block_time.gamma"],
    ),
    ("sfc.SFC", &["fuel_weight.SFC"]),
    ("temp.temp", &["rho.temp", "speed.temp"]),
    ("rho.rho", &["cl_target.rho", "ct_target.rho", "fuel_weight.rho", "tau.rho"]),
    (
        "speed.v",
        &["cl_target.v", "ct_target.v", "fuel_weight.v", "tau.v", "block_time.v"],
    ),
    ("cl_target.CL", &["lift.CL_tar"]),
    (
        "lift.alpha",
        &["cl_target.alpha", "moment.alpha", "drag.alpha", "ct_target.alpha"],
    ),
    ("moment.eta", &["lift.eta", "drag.eta"]),
    ("drag.CD", &["ct_target.CD"]),
    (
        "ct_target.CT_tar",
        &["cl_target.CT_tar", "fuel_weight.CT_tar", "tau.CT_tar"],
    ),
    (
        "fuel_weight.fuel_w",
        &["cl_target.fuel_w", "ct_target.fuel_w", "fuel_burn.fuel_w"],
    ),
    ("tau.tau", &["tmin.tau", "tmax.tau"]),
];

/// Everything a segment is assembled from, apart from the shared surrogate.
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    pub num_elem: usize,
    /// Control-point abscissas (1e6 m), strictly increasing.
    pub x_pts: Vec<f64>,
    pub params: AircraftParams,
    pub newton: NewtonSettings,
    /// Take the airspeed from the velocity spline instead of Mach.
    pub velocity_specified: bool,
    pub engine: EngineModel,
    /// Settings of the least-squares altitude fit.
    pub fit: LinearSettings,
}

impl SegmentConfig {
    pub fn new(num_elem: usize, x_pts: Vec<f64>, params: AircraftParams) -> Self {
        Self {
            num_elem,
            x_pts,
            params,
            newton: NewtonSettings::default(),
            velocity_specified: false,
            engine: EngineModel::default(),
            fit: LinearSettings::default(),
        }
    }
}

/// Per-station results of a run, in solver units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StationProfile {
    #[serde(with = "crate::wire::floats")]
    pub x: Vec<f64>,
    #[serde(with = "crate::wire::floats")]
    pub h: Vec<f64>,
    #[serde(with = "crate::wire::floats")]
    pub gamma: Vec<f64>,
    #[serde(with = "crate::wire::floats")]
    pub mach: Vec<f64>,
    #[serde(with = "crate::wire::floats")]
    pub v: Vec<f64>,
    #[serde(with = "crate::wire::floats")]
    pub alpha: Vec<f64>,
    #[serde(with = "crate::wire::floats")]
    pub eta: Vec<f64>,
    #[serde(with = "crate::wire::floats")]
    pub cl: Vec<f64>,
    #[serde(with = "crate::wire::floats")]
    pub cd: Vec<f64>,
    #[serde(with = "crate::wire::floats")]
    pub ct: Vec<f64>,
    #[serde(with = "crate::wire::floats")]
    pub tau: Vec<f64>,
    #[serde(with = "crate::wire::floats")]
    pub fuel_w: Vec<f64>,
    #[serde(with = "crate::wire::floats")]
    pub fuel_rate: Vec<f64>,
}

/// An assembled mission leg.
#[derive(Debug)]
pub struct Segment {
    graph: Graph,
    workflow: Workflow,
    ops: SplineOperators,
    fit: LinearSettings,
    frozen: bool,
}

impl Segment {
    pub fn new(config: SegmentConfig, table: Arc<SurrogateTable>) -> Result<Self, SegmentError> {
        config
            .params
            .validate()
            .map_err(|err| SegmentError::Configuration(err.to_string()))?;
        let ops = SplineOperators::new(config.num_elem, &config.x_pts)
            .map_err(|err| SegmentError::Configuration(err.to_string()))?;
        let n = ops.num_stations();
        let num_cp = ops.num_cp();
        let params = config.params;

        let sea_level_sound_speed = standard_atmosphere(0.0)
            .map(|state| state.speed_of_sound_m_s)
            .map_err(|err| SegmentError::Configuration(err.to_string()))?;
        let boundary = IndependentVars::new(PARAMS)
            .with("x_pt", DVector::from_column_slice(&config.x_pts))
            .with("h_pt", DVector::zeros(num_cp))
            .with("M_pt", DVector::from_element(num_cp, DEFAULT_MACH))
            .with(
                "v_pt",
                DVector::from_element(num_cp, DEFAULT_MACH * sea_level_sound_speed / 100.0),
            )
            .with_scalar("S", params.wing_area)
            .with_scalar("ac_w", params.ac_w)
            .with_scalar("thrust_sl", params.thrust_sl)
            .with_scalar("SFCSL", params.sfc_sl)
            .with_scalar("AR", params.aspect_ratio)
            .with_scalar("e", params.oswald)
            .with_scalar("pax_flt", 0.0);

        let upstream: Vec<Box<dyn System>> = vec![
            Box::new(boundary),
            Box::new(SplineEval::position(&ops)),
            Box::new(SplineEval::altitude(&ops)),
            Box::new(MachSpline::new(&ops)),
            Box::new(SplineEval::flight_path_angle(&ops)),
            Box::new(Sfc::new(n, config.engine)),
            Box::new(Temperature::new(n)),
            Box::new(Density::new(n)),
            Box::new(Speed::new(n, config.velocity_specified)),
        ];
        let coupled: Vec<Box<dyn System>> = vec![
            Box::new(CLTarget::new(n)),
            Box::new(Lift::new(n, Arc::clone(&table))),
            Box::new(Moment::new(n, Arc::clone(&table))),
            Box::new(Drag::new(n, Arc::clone(&table))),
            Box::new(CTTarget::new(n)),
            Box::new(FuelWeight::new(n)),
        ];
        let downstream: Vec<Box<dyn System>> = vec![
            Box::new(Tau::new(n, config.engine)),
            Box::new(ThrustMargin::new(n, ThrustBound::Min)),
            Box::new(ThrustMargin::new(n, ThrustBound::Max)),
            Box::new(FuelBurn::new(n)),
            Box::new(BlockTime::new(n)),
        ];

        let mut graph = Graph::new();
        let mut add_all = |systems: Vec<Box<dyn System>>| {
            systems
                .into_iter()
                .map(|system| graph.add_system(system))
                .collect::<Result<Vec<_>, _>>()
        };
        let upstream = add_all(upstream)?;
        let members = add_all(coupled)?;
        let downstream = add_all(downstream)?;

        for (source, targets) in CONNECTIONS {
            for target in *targets {
                graph.connect(source, target)?;
            }
        }
        let unconnected = graph.list_unconnected_inputs();
        if !unconnected.is_empty() {
            return Err(SegmentError::Configuration(format!(
                "unconnected inputs: {}",
                unconnected.join(", ")
            )));
        }

        let group = CoupledGroup::new(COUPLED_GROUP, &mut graph, members, config.newton)?;
        debug!(
            tears = ?group.tear_sources(&graph),
            unknowns = group.size(),
            "segment assembled"
        );
        let mut workflow = Workflow::new();
        for node in upstream {
            workflow.push_system(node);
        }
        workflow.push_group(group);
        for node in downstream {
            workflow.push_system(node);
        }

        Ok(Self {
            graph,
            workflow,
            ops,
            fit: config.fit,
            frozen: false,
        })
    }

    pub fn num_elem(&self) -> usize {
        self.ops.num_stations() - 1
    }

    pub fn num_cp(&self) -> usize {
        self.ops.num_cp()
    }

    pub fn x_pts(&self) -> &[f64] {
        self.ops.x_pts()
    }

    pub fn operators(&self) -> &SplineOperators {
        &self.ops
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Whether boundary inputs are locked by a previous run.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Unlock the boundary inputs for another run, keeping the converged
    /// state as the starting point.
    pub fn reopen(&mut self) {
        self.frozen = false;
    }

    /// Write one boundary input.
    pub fn set_boundary(&mut self, port: &str, value: DVector<f64>) -> Result<(), SegmentError> {
        if self.frozen {
            return Err(SegmentError::Frozen(port.to_string()));
        }
        if !BOUNDARY_INPUTS.contains(&port) {
            return Err(SegmentError::Configuration(format!(
                "`{port}` is not a boundary input"
            )));
        }
        let path = format!("{PARAMS}.{port}");
        let expected = self.graph.value(&path)?.len();
        if value.len() != expected {
            return Err(SegmentError::Configuration(format!(
                "`{port}` takes {expected} values, got {}",
                value.len()
            )));
        }
        self.graph.set_value(&path, value)?;
        Ok(())
    }

    pub fn set_scalar(&mut self, port: &str, value: f64) -> Result<(), SegmentError> {
        self.set_boundary(port, DVector::from_element(1, value))
    }

    pub fn set_h_pt(&mut self, h_pt: &[f64]) -> Result<(), SegmentError> {
        self.set_boundary("h_pt", DVector::from_column_slice(h_pt))
    }

    pub fn set_mach_pt(&mut self, mach_pt: &[f64]) -> Result<(), SegmentError> {
        self.set_boundary("M_pt", DVector::from_column_slice(mach_pt))
    }

    pub fn set_v_pt(&mut self, v_pt: &[f64]) -> Result<(), SegmentError> {
        self.set_boundary("v_pt", DVector::from_column_slice(v_pt))
    }

    pub fn set_pax(&mut self, pax: f64) -> Result<(), SegmentError> {
        self.set_scalar("pax_flt", pax)
    }

    pub fn set_params(&mut self, params: &AircraftParams) -> Result<(), SegmentError> {
        params
            .validate()
            .map_err(|err| SegmentError::Configuration(err.to_string()))?;
        for (port, value) in params.entries() {
            self.set_scalar(port, value)?;
        }
        Ok(())
    }

    /// Fit the altitude control points to a per-station target profile and
    /// install them. Returns the fitted control points.
    pub fn set_init_h_pt(&mut self, target: &DVector<f64>) -> Result<DVector<f64>, SegmentError> {
        if self.frozen {
            return Err(SegmentError::Frozen("h_pt".into()));
        }
        let h_pt = fit_control_points(self.ops.value(), target, &self.fit)
            .map_err(|err| SegmentError::Configuration(err.to_string()))?;
        self.set_boundary("h_pt", h_pt.clone())?;
        Ok(h_pt)
    }

    /// One pass of the top workflow. Boundary inputs are read-only afterwards.
    pub fn run(&mut self) -> Result<RunReport, SegmentError> {
        self.frozen = true;
        Ok(self.workflow.run(&mut self.graph)?)
    }

    /// Value of any port by `system.port` path.
    pub fn value(&self, path: &str) -> Result<&DVector<f64>, SegmentError> {
        Ok(self.graph.value(path)?)
    }

    /// Boundary output by short name (`fuelburn`, `time`, `Tmin`, `Tmax`, `h`, `gamma`).
    pub fn output(&self, name: &str) -> Result<&DVector<f64>, SegmentError> {
        let path = BOUNDARY_OUTPUTS
            .iter()
            .find(|(short, _)| *short == name)
            .map(|(_, path)| *path)
            .ok_or_else(|| SegmentError::Configuration(format!("`{name}` is not a boundary output")))?;
        self.value(path)
    }

    pub fn fuelburn(&self) -> Result<f64, SegmentError> {
        Ok(self.graph.scalar("fuel_burn.fuelburn")?)
    }

    /// Block time (h).
    pub fn block_time(&self) -> Result<f64, SegmentError> {
        Ok(self.graph.scalar("block_time.time")?)
    }

    pub fn thrust_margins(&self) -> Result<(f64, f64), SegmentError> {
        Ok((self.graph.scalar("tmin.Tmin")?, self.graph.scalar("tmax.Tmax")?))
    }

    pub fn station_profile(&self) -> Result<StationProfile, SegmentError> {
        let get = |path: &str| -> Result<Vec<f64>, SegmentError> {
            Ok(self.graph.value(path)?.as_slice().to_vec())
        };
        Ok(StationProfile {
            x: get("x_spline.x")?,
            h: get("h_spline.h")?,
            gamma: get("gamma_spline.gamma")?,
            mach: get("mach_spline.M")?,
            v: get("speed.v")?,
            alpha: get("lift.alpha")?,
            eta: get("moment.eta")?,
            cl: get("cl_target.CL")?,
            cd: get("drag.CD")?,
            ct: get("ct_target.CT_tar")?,
            tau: get("tau.tau")?,
            fuel_w: get("fuel_weight.fuel_w")?,
            fuel_rate: get("fuel_weight.fuel_rate")?,
        })
    }

    /// Total derivatives at the current point; call after [`Segment::run`].
    pub fn total_derivatives(
        &self,
        of: &[&str],
        wrt: &[&str],
        mode: DerivativeMode,
    ) -> Result<DMatrix<f64>, SegmentError> {
        Ok(total_derivatives(&self.graph, &self.workflow, of, wrt, mode)?)
    }

    /// Gradient of fuel burn with respect to the altitude control points.
    pub fn fuelburn_gradient(&self) -> Result<DVector<f64>, SegmentError> {
        let jac = self.total_derivatives(
            &["fuel_burn.fuelburn"],
            &["params.h_pt"],
            DerivativeMode::Adjoint,
        )?;
        Ok(jac.row(0).transpose())
    }

    /// Analytic-versus-finite-difference comparison for every system.
    pub fn check_partials(&self) -> Result<Vec<(String, PartialCheck)>, SegmentError> {
        let mut checks = Vec::new();
        for node in 0..self.graph.len() {
            let name = self.graph.system_name(node).to_string();
            for check in self.graph.check_partials(node)? {
                checks.push((name.clone(), check));
            }
        }
        Ok(checks)
    }

    pub fn list_unconnected_inputs(&self) -> Vec<String> {
        self.graph.list_unconnected_inputs()
    }
}
