use std::sync::Arc;

use approx::assert_relative_eq;
use mission_analysis::aero::SurrogateTable;
use mission_analysis::common::linalg::trapezoid;
use mission_analysis::config::{AircraftParams, Discretization, LegConfig};
use mission_analysis::graph::{DerivativeMode, NewtonSettings};
use mission_analysis::planner::{LegPlan, Segment, SegmentError};
use nalgebra::DVector;

fn table() -> Arc<SurrogateTable> {
    Arc::new(SurrogateTable::standard().expect("standard table"))
}

fn segment(range_nmi: f64, num_elem: usize) -> Segment {
    let plan = LegPlan::new(
        &LegConfig::new(range_nmi),
        &Discretization {
            num_elem,
            num_cp: 6,
        },
    )
    .expect("leg plan");
    plan.assemble(AircraftParams::crm(), table(), NewtonSettings::default())
        .expect("segment")
}

#[test]
fn assembled_segment_has_every_input_connected() {
    let seg = segment(5000.0, 20);
    assert!(seg.list_unconnected_inputs().is_empty());
    assert_eq!(seg.num_elem(), 20);
    assert_eq!(seg.num_cp(), 6);
}

#[test]
fn spline_operator_reproduces_control_points() {
    let seg = segment(5000.0, 20);
    let ops = seg.operators();
    let at_cp = ops.value_at(ops.x_pts());
    let h_pt = seg.value("params.h_pt").unwrap().clone();
    let reproduced = &at_cp * &h_pt;
    assert_relative_eq!(reproduced, h_pt, epsilon = 1e-10);
}

#[test]
fn leg_converges_with_physical_outputs() {
    let mut seg = segment(5000.0, 20);
    let report = seg.run().unwrap();
    assert!(report.converged(), "{:?}", report.warnings());

    let fuelburn = seg.fuelburn().unwrap();
    assert!(fuelburn > 0.0 && fuelburn.is_finite());
    let profile = seg.station_profile().unwrap();
    assert_eq!(profile.x.len(), 21);
    assert_relative_eq!(*profile.fuel_w.last().unwrap(), 0.0, epsilon = 1e-14);
    assert!(profile.tau.iter().all(|t| t.is_finite()));

    let integrated = trapezoid(&profile.x, &profile.fuel_rate);
    assert!(fuelburn <= integrated + 1e-9 * integrated.abs().max(1.0));
    assert_relative_eq!(fuelburn, integrated, max_relative = 1e-9);

    let time = seg.block_time().unwrap();
    assert!(time > 5.0 && time < 20.0, "block time {time} h");
    let (tmin, tmax) = seg.thrust_margins().unwrap();
    assert!(tmin.is_finite() && tmax.is_finite());
}

#[test]
fn boundary_inputs_are_read_only_after_a_run() {
    let mut seg = segment(5000.0, 20);
    seg.run().unwrap();
    assert!(seg.is_frozen());
    assert!(matches!(seg.set_pax(100.0), Err(SegmentError::Frozen(_))));
    seg.reopen();
    seg.set_pax(100.0).unwrap();
    assert!(matches!(
        seg.set_boundary("x_pt", DVector::zeros(6)),
        Err(SegmentError::Configuration(_))
    ));
    assert!(matches!(
        seg.set_boundary("h_pt", DVector::zeros(3)),
        Err(SegmentError::Configuration(_))
    ));
}

#[test]
fn rerunning_unchanged_inputs_gives_the_same_fuel_burn() {
    let mut seg = segment(5000.0, 20);
    seg.run().unwrap();
    let first = seg.fuelburn().unwrap();
    let second_report = seg.run().unwrap();
    assert!(second_report.converged());
    assert_relative_eq!(seg.fuelburn().unwrap(), first, max_relative = 1e-8);
}

#[test]
fn passengers_increase_fuel_burn() {
    let mut empty = segment(5000.0, 20);
    empty.run().unwrap();
    let mut loaded = segment(5000.0, 20);
    loaded.set_pax(300.0).unwrap();
    loaded.run().unwrap();
    assert!(loaded.fuelburn().unwrap() > empty.fuelburn().unwrap());
}

#[test]
fn refining_the_mesh_changes_fuel_burn_by_under_two_percent() {
    let mut coarse = segment(7000.0, 20);
    coarse.run().unwrap();
    let mut fine = segment(7000.0, 40);
    fine.run().unwrap();
    let (a, b) = (coarse.fuelburn().unwrap(), fine.fuelburn().unwrap());
    assert!((a - b).abs() / b < 0.02, "coarse {a}, fine {b}");
}

#[test]
fn forward_and_adjoint_gradients_agree() {
    let mut seg = segment(5000.0, 20);
    seg.run().unwrap();
    let of = ["fuel_burn.fuelburn", "block_time.time"];
    let wrt = ["params.h_pt", "params.ac_w"];
    let forward = seg.total_derivatives(&of, &wrt, DerivativeMode::Forward).unwrap();
    let adjoint = seg.total_derivatives(&of, &wrt, DerivativeMode::Adjoint).unwrap();
    assert_eq!(forward.shape(), (2, 7));
    let scale = forward.amax().max(1e-12);
    assert!((&forward - &adjoint).amax() / scale < 1e-6);

    let gradient = seg.fuelburn_gradient().unwrap();
    assert_relative_eq!(gradient, adjoint.row(0).transpose().rows(0, 6).into_owned(), epsilon = 1e-12);
    // Heavier aircraft burn more fuel.
    assert!(forward[(0, 6)] > 0.0);
}

#[test]
fn analytic_partials_match_finite_differences() {
    let mut seg = segment(5000.0, 10);
    seg.run().unwrap();
    // The surrogate systems interpolate a table, so only smooth systems are held to FD accuracy.
    let checks = seg.check_partials().unwrap();
    assert!(checks.iter().any(|(system, _)| system == "fuel_weight"));
    for (system, check) in checks {
        if matches!(system.as_str(), "lift" | "moment" | "drag") {
            continue;
        }
        assert!(
            check.max_rel_error < 1e-4 || check.max_abs_error < 1e-8,
            "{system}: d{}/d{} off by {:e}",
            check.of,
            check.wrt,
            check.max_rel_error
        );
    }
}

#[test]
fn fitted_altitude_follows_the_target_profile() {
    let mut leg = LegConfig::new(5000.0);
    leg.fit_profile = true;
    let discretization = Discretization {
        num_elem: 20,
        num_cp: 8,
    };
    let plan = LegPlan::new(&leg, &discretization).unwrap();
    let mut seg = plan
        .assemble(AircraftParams::crm(), table(), NewtonSettings::default())
        .unwrap();
    let target = plan.fit_target.clone().unwrap();
    let h = seg.operators().value().as_ref() * seg.value("params.h_pt").unwrap();
    assert!((&h - &target).amax() < 0.05);
    assert!(matches!(seg.run(), Ok(_)));
    assert!(matches!(seg.set_init_h_pt(&target), Err(SegmentError::Frozen(_))));
}

#[test]
fn missing_thrust_is_a_domain_error_of_the_throttle_system() {
    let mut params = AircraftParams::crm();
    params.thrust_sl = 0.5;
    let plan = LegPlan::new(&LegConfig::new(5000.0), &Discretization::default()).unwrap();
    let mut seg = plan.assemble(params, table(), NewtonSettings::default()).unwrap();
    match seg.run() {
        Err(SegmentError::Domain { system, .. }) => assert_eq!(system, "tau"),
        other => panic!("expected a domain error, got {other:?}"),
    }
}

#[test]
fn invalid_parameters_fail_assembly() {
    let mut params = AircraftParams::crm();
    params.wing_area = -1.0;
    let plan = LegPlan::new(&LegConfig::new(5000.0), &Discretization::default()).unwrap();
    assert!(matches!(
        plan.assemble(params, table(), NewtonSettings::default()),
        Err(SegmentError::Configuration(_))
    ));
}
