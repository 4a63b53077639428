use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn write_mission(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("short.toml");
    fs::write(
        &path,
        "[aircraft]\nS = 4.278\nac_w = 2061.8\nthrust_sl = 1.02\nSFCSL = 87.85\nAR = 8.68\ne = 0.8\n\
         [discretization]\nnum_elem = 10\nnum_cp = 5\n\
         [[legs]]\nname = \"hop\"\nrange_nmi = 2000.0\n\
         [[legs]]\nname = \"cross\"\nrange_nmi = 4000.0\n",
    )
    .expect("mission file");
    path
}

#[test]
fn mission_writes_summary_profile_and_report() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_mission(dir.path());
    let summary = dir.path().join("out/summary.csv");
    let profile = dir.path().join("out/profile.csv");
    let report = dir.path().join("out/report.json");

    Command::cargo_bin("mission")
        .expect("mission bin")
        .args([
            "--config",
            config.to_str().unwrap(),
            "--mode",
            "distributed",
            "--ranks",
            "2",
            "--summary",
            summary.to_str().unwrap(),
            "--profile",
            profile.to_str().unwrap(),
            "--report",
            report.to_str().unwrap(),
        ])
        .assert()
        .success();

    let summary = fs::read_to_string(summary).expect("summary");
    let rows: Vec<&str> = summary.lines().collect();
    assert_eq!(rows.len(), 3);
    assert!(rows[0].starts_with("leg,status,fuelburn_mn"));
    assert!(rows[1].starts_with("hop,converged,"));
    assert!(rows[2].starts_with("cross,converged,"));

    let profile = fs::read_to_string(profile).expect("profile");
    assert_eq!(profile.lines().count(), 1 + 2 * 11);

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(report).expect("report")).unwrap();
    assert_eq!(report["mode"], "distributed");
    assert_eq!(report["legs"].as_array().unwrap().len(), 2);
}

#[test]
fn summary_goes_to_stdout_by_default() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_mission(dir.path());
    Command::cargo_bin("mission")
        .expect("mission bin")
        .args(["--config", config.to_str().unwrap(), "--mode", "parallel"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hop,converged"))
        .stdout(predicate::str::contains("cross,converged"));
}

#[test]
fn missing_config_fails_cleanly() {
    Command::cargo_bin("mission")
        .expect("mission bin")
        .args(["--config", "no/such/mission.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read configuration"));
}

#[test]
fn profile_plot_renders_png() {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv_path = dir.path().join("profile.csv");
    let png_path = dir.path().join("profile.png");
    let mut rows = String::from(mission_analysis::export::profile::HEADER);
    rows.push('\n');
    for (leg, hc) in [("a", 10.0), ("b", 9.0)] {
        for i in 0..=10 {
            let t = i as f64 / 10.0;
            let h = hc * (std::f64::consts::PI * t).sin();
            rows.push_str(&format!(
                "{leg},{i},{:.3},{h:.6},0,0.82,240,2,0,0.5,0.02,0.03,0.5,1000,0.5\n",
                t * 3000.0
            ));
        }
    }
    fs::write(&csv_path, rows).expect("csv");

    Command::cargo_bin("profile_plot")
        .expect("profile_plot bin")
        .args([
            "--input",
            csv_path.to_str().unwrap(),
            "--output",
            png_path.to_str().unwrap(),
            "--width",
            "400",
            "--height",
            "300",
        ])
        .assert()
        .success();

    let metadata = fs::metadata(png_path).expect("png metadata");
    assert!(metadata.len() > 0, "PNG output should not be empty");
}
