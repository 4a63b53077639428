use std::sync::Arc;

use approx::assert_relative_eq;
use mission_analysis::aero::SurrogateTable;
use mission_analysis::common::linalg::trapezoid;
use mission_analysis::config::{
    AircraftParams, Discretization, ExecutionConfig, ExecutionMode, LegConfig, MissionConfig,
    PartitionConfig, ReductionConfig, SolverConfig, SurrogateConfig,
};
use mission_analysis::planner::{
    Collective, LegStatus, LocalCluster, MissionReport, Partition, ReductionRule,
    build_multipoint, run_mission,
};

fn mission(mode: ExecutionMode) -> MissionConfig {
    MissionConfig {
        aircraft: AircraftParams::crm(),
        discretization: Discretization {
            num_elem: 20,
            num_cp: 6,
        },
        solver: SolverConfig::default(),
        surrogate: SurrogateConfig::default(),
        execution: ExecutionConfig {
            mode,
            ..ExecutionConfig::default()
        },
        legs: [9000.0, 7000.0, 5000.0]
            .into_iter()
            .map(LegConfig::new)
            .collect(),
    }
}

fn assert_same_fuel_burns(a: &MissionReport, b: &MissionReport) {
    assert_eq!(a.legs.len(), b.legs.len());
    for (x, y) in a.legs.iter().zip(&b.legs) {
        assert_eq!(x.name, y.name);
        assert_relative_eq!(
            x.fuelburn().unwrap(),
            y.fuelburn().unwrap(),
            max_relative = 1e-12
        );
    }
}

#[test]
fn three_legs_produce_three_ordered_results() {
    let report = run_mission(&mission(ExecutionMode::Serial)).unwrap();
    assert_eq!(report.legs.len(), 3);
    assert!(report.all_converged());
    let names: Vec<&str> = report.legs.iter().map(|leg| leg.name.as_str()).collect();
    assert_eq!(names, ["9000nmi", "7000nmi", "5000nmi"]);

    for leg in &report.legs {
        assert_eq!(leg.status, LegStatus::Converged);
        let profile = leg.profile.as_ref().unwrap();
        let integrated = trapezoid(&profile.x, &profile.fuel_rate);
        let fuelburn = leg.fuelburn().unwrap();
        assert!(fuelburn > 0.0);
        assert!(fuelburn <= integrated + 1e-9 * integrated.abs().max(1.0));
    }
    let burns: Vec<f64> = report.fuel_burns().into_iter().flatten().collect();
    assert!(burns[0] > burns[1] && burns[1] > burns[2]);
    assert_relative_eq!(report.total_fuel_burn(), burns.iter().sum::<f64>());
}

#[test]
fn parallel_matches_serial() {
    let serial = run_mission(&mission(ExecutionMode::Serial)).unwrap();
    let mut config = mission(ExecutionMode::Parallel);
    config.execution.threads = Some(3);
    let parallel = run_mission(&config).unwrap();
    assert_same_fuel_burns(&serial, &parallel);
}

#[test]
fn distributed_owner_reduction_matches_serial() {
    let serial = run_mission(&mission(ExecutionMode::Serial)).unwrap();
    let mut config = mission(ExecutionMode::Distributed);
    config.execution.ranks = 2;
    config.execution.partition = PartitionConfig::RoundRobin;
    config.execution.reduction = ReductionConfig::Owner;
    let distributed = run_mission(&config).unwrap();
    assert_same_fuel_burns(&serial, &distributed);
    let ranks: Vec<usize> = distributed.legs.iter().map(|leg| leg.rank).collect();
    assert_eq!(ranks, [0, 1, 0]);
}

#[test]
fn replicated_max_reduction_matches_serial() {
    let serial = run_mission(&mission(ExecutionMode::Serial)).unwrap();
    let mut config = mission(ExecutionMode::Distributed);
    config.execution.ranks = 3;
    config.execution.partition = PartitionConfig::Replicated;
    config.execution.reduction = ReductionConfig::Max;
    let distributed = run_mission(&config).unwrap();
    assert_same_fuel_burns(&serial, &distributed);
}

#[test]
fn all_to_all_reduction_reaches_every_rank() {
    let config = mission(ExecutionMode::Distributed);
    let table = Arc::new(SurrogateTable::standard().unwrap());
    let results = LocalCluster::new(2).run(|comm| {
        let mut multipoint = build_multipoint(&config, &table).expect("multipoint");
        multipoint.run_distributed(
            comm,
            Partition::RoundRobin,
            ReductionRule::Owner,
            Collective::AllToAll,
        )
    });
    let reports: Vec<MissionReport> = results
        .into_iter()
        .map(|result| result.unwrap().expect("every rank receives the reduction"))
        .collect();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0], reports[1]);
    assert_eq!(reports[0].legs.len(), 3);
}

#[test]
fn a_failing_leg_does_not_abort_the_others() {
    let mut config = mission(ExecutionMode::Serial);
    // No thrust is left above 14 km.
    config.legs[2].cruise_altitude_km = 15.0;
    let report = run_mission(&config).unwrap();
    assert_eq!(report.legs.len(), 3);
    assert!(report.legs[..2].iter().all(|leg| leg.is_converged()));
    assert!(matches!(report.legs[2].status, LegStatus::Failed { .. }));
    assert!(report.legs[2].fuelburn().is_none());
    assert!(!report.all_converged());
}

#[test]
fn legs_out_of_newton_iterations_still_report_in_every_mode() {
    let capped = |mode| {
        let mut config = mission(mode);
        config.solver.max_iteration = 1;
        config.solver.damping = 0.5;
        config.execution.ranks = 2;
        config
    };
    let serial = run_mission(&capped(ExecutionMode::Serial)).unwrap();
    let distributed = run_mission(&capped(ExecutionMode::Distributed)).unwrap();

    for report in [&serial, &distributed] {
        assert_eq!(report.legs.len(), 3);
        assert!(!report.all_converged());
        for leg in &report.legs {
            let residual_norm = match leg.status {
                LegStatus::NotConverged { residual_norm } => residual_norm,
                ref other => panic!("{}: expected a non-converged leg, got {other:?}", leg.name),
            };
            assert!(residual_norm > SolverConfig::default().atol, "{}", leg.name);
            let metrics = leg.metrics.expect("best-effort metrics");
            assert_eq!(metrics.newton_iterations, 1);
            assert_eq!(metrics.residual_norm, residual_norm);
            assert!(metrics.fuelburn.is_finite());
            assert_eq!(leg.profile.as_ref().expect("profile").x.len(), 21);
        }
    }
    assert_same_fuel_burns(&serial, &distributed);
    let norms = |report: &MissionReport| -> Vec<f64> {
        report.legs.iter().map(|leg| leg.metrics.unwrap().residual_norm).collect()
    };
    assert_eq!(norms(&serial), norms(&distributed));
}
