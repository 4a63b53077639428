use std::fs;
use std::path::Path;

use mission_analysis::config::{
    AircraftParams, ConfigError, ExecutionMode, PartitionConfig, ReductionConfig, load_mission,
    load_params,
};

fn bundled(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("configs").join(name)
}

#[test]
fn bundled_mission_resolves_its_parameter_file() {
    let mission = load_mission(bundled("crm_mission.toml")).unwrap();
    assert_eq!(mission.aircraft, AircraftParams::crm());
    assert_eq!(mission.discretization.num_elem, 50);
    assert_eq!(mission.discretization.num_cp, 10);
    assert_eq!(mission.solver.max_iteration, 15);
    assert_eq!(mission.execution.mode, ExecutionMode::Serial);
    assert_eq!(mission.execution.partition, PartitionConfig::RoundRobin);
    assert_eq!(mission.execution.reduction, ReductionConfig::Owner);
    let ranges: Vec<f64> = mission.legs.iter().map(|leg| leg.range_nmi).collect();
    assert_eq!(ranges, [9000.0, 7000.0, 5000.0]);
}

#[test]
fn yaml_mission_with_inline_aircraft() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mission.yaml");
    fs::write(
        &path,
        "aircraft: {S: 4.278, ac_w: 2061.8, thrust_sl: 1.02, SFCSL: 87.85, AR: 8.68, e: 0.8}\n\
         execution: {mode: distributed, ranks: 3, reduction: max}\n\
         legs:\n  - {range_nmi: 3000, pax: 250, fit_profile: true}\n",
    )
    .unwrap();
    let mission = load_mission(&path).unwrap();
    assert_eq!(mission.execution.mode, ExecutionMode::Distributed);
    assert_eq!(mission.execution.ranks, 3);
    assert_eq!(mission.execution.reduction, ReductionConfig::Max);
    assert_eq!(mission.legs[0].pax, 250.0);
    assert!(mission.legs[0].fit_profile);
    assert_eq!(mission.legs[0].mach, 0.82);
    assert_eq!(mission.solver.linear.max_iter, 600);
}

#[test]
fn missing_parameter_key_is_reported_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("params.toml");
    fs::write(&path, "S = 4.278\nac_w = 2061.8\nthrust_sl = 1.02\nAR = 8.68\ne = 0.8\n").unwrap();
    match load_params(&path) {
        Err(ConfigError::MissingParameter(key)) => assert_eq!(key, "SFCSL"),
        other => panic!("expected a missing parameter, got {other:?}"),
    }
}

#[test]
fn parameter_source_must_be_unambiguous() {
    let dir = tempfile::tempdir().unwrap();
    fs::copy(bundled("crm_params.toml"), dir.path().join("crm_params.toml")).unwrap();

    let both = dir.path().join("both.toml");
    fs::write(
        &both,
        "params_file = \"crm_params.toml\"\n\
         [aircraft]\nS = 4.278\nac_w = 2061.8\nthrust_sl = 1.02\nSFCSL = 87.85\nAR = 8.68\ne = 0.8\n\
         [[legs]]\nrange_nmi = 1000.0\n",
    )
    .unwrap();
    assert!(matches!(load_mission(&both), Err(ConfigError::Invalid(_))));

    let neither = dir.path().join("neither.toml");
    fs::write(&neither, "[[legs]]\nrange_nmi = 1000.0\n").unwrap();
    assert!(matches!(load_mission(&neither), Err(ConfigError::Invalid(_))));
}

#[test]
fn invalid_values_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    fs::copy(bundled("crm_params.toml"), dir.path().join("crm_params.toml")).unwrap();
    let cases = [
        "[[legs]]\nrange_nmi = -5.0\n",
        "[[legs]]\nrange_nmi = 1000.0\nmach = 1.2\n",
        "[solver]\ndamping = 0.0\n[[legs]]\nrange_nmi = 1000.0\n",
        "[discretization]\nnum_cp = 1\n[[legs]]\nrange_nmi = 1000.0\n",
        "[execution]\nranks = 0\n[[legs]]\nrange_nmi = 1000.0\n",
        "",
    ];
    for (i, body) in cases.iter().enumerate() {
        let path = dir.path().join(format!("case{i}.toml"));
        fs::write(&path, format!("params_file = \"crm_params.toml\"\n{body}")).unwrap();
        assert!(
            matches!(load_mission(&path), Err(ConfigError::Invalid(_))),
            "case {i} should be rejected"
        );
    }
}

#[test]
fn unreadable_files_surface_io_errors() {
    assert!(matches!(
        load_mission("does/not/exist.toml"),
        Err(ConfigError::Io(_))
    ));
}
