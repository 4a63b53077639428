//! Export helpers for CSV and JSON artifacts.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Create a writer for the target path, handling stdout (`-`) by convention.
pub fn writer_for_path(path: &Path) -> io::Result<Box<dyn Write>> {
    if path == Path::new("-") {
        return Ok(Box::new(BufWriter::new(io::stdout())));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path)?;
    Ok(Box::new(BufWriter::new(file)))
}

fn status_label(status: &mission_planner::LegStatus) -> &'static str {
    use mission_planner::LegStatus;
    match status {
        LegStatus::Converged => "converged",
        LegStatus::NotConverged { .. } => "not_converged",
        LegStatus::Failed { .. } => "failed",
    }
}

/// One row per leg.
pub mod summary {
    use std::io::{self, Write};

    use mission_core::units::mn_to_kg;
    use mission_planner::{LegResult, MissionReport};

    pub const HEADER: &str = "leg,status,fuelburn_mn,fuelburn_kg,block_time_h,tmin,tmax,newton_iterations,residual_norm,rank";

    pub fn write_header(writer: &mut dyn Write) -> io::Result<()> {
        writeln!(writer, "{}", HEADER)
    }

    /// Legs without metrics keep their row with empty numeric fields.
    pub fn write_leg(writer: &mut dyn Write, leg: &LegResult) -> io::Result<()> {
        let status = super::status_label(&leg.status);
        match &leg.metrics {
            Some(m) => writeln!(
                writer,
                "{},{},{:.9},{:.3},{:.6},{:.6},{:.6},{},{:.3e},{}",
                leg.name,
                status,
                m.fuelburn,
                mn_to_kg(m.fuelburn),
                m.block_time,
                m.tmin,
                m.tmax,
                m.newton_iterations,
                m.residual_norm,
                leg.rank,
            ),
            None => writeln!(writer, "{},{},,,,,,,,{}", leg.name, status, leg.rank),
        }
    }

    pub fn write_report(writer: &mut dyn Write, report: &MissionReport) -> io::Result<()> {
        write_header(writer)?;
        report.legs.iter().try_for_each(|leg| write_leg(writer, leg))
    }
}

/// One row per station per leg, converted to engineering units.
pub mod profile {
    use std::io::{self, Write};

    use mission_core::units::{hms_to_ms, mm_to_nmi, mn_to_kg};
    use mission_planner::{MissionReport, StationProfile};

    pub const HEADER: &str = "leg,station,range_nmi,h_km,gamma_rad,mach,v_m_s,alpha_deg,eta_deg,cl,cd,ct,tau,fuel_kg,fuel_rate";

    pub fn write_header(writer: &mut dyn Write) -> io::Result<()> {
        writeln!(writer, "{}", HEADER)
    }

    pub fn write_profile(writer: &mut dyn Write, leg: &str, p: &StationProfile) -> io::Result<()> {
        for i in 0..p.x.len() {
            let at = |column: &[f64]| column.get(i).copied().unwrap_or(f64::NAN);
            writeln!(
                writer,
                "{},{},{:.3},{:.6},{:.6},{:.4},{:.3},{:.4},{:.4},{:.6},{:.6},{:.6},{:.6},{:.1},{:.6e}",
                leg,
                i,
                mm_to_nmi(at(&p.x)),
                at(&p.h),
                at(&p.gamma),
                at(&p.mach),
                hms_to_ms(at(&p.v)),
                at(&p.alpha),
                at(&p.eta),
                at(&p.cl),
                at(&p.cd),
                at(&p.ct),
                at(&p.tau),
                mn_to_kg(at(&p.fuel_w)),
                at(&p.fuel_rate),
            )?;
        }
        Ok(())
    }

    /// Legs that failed before producing a profile are skipped.
    pub fn write_report(writer: &mut dyn Write, report: &MissionReport) -> io::Result<()> {
        write_header(writer)?;
        for leg in &report.legs {
            if let Some(profile) = &leg.profile {
                write_profile(writer, &leg.name, profile)?;
            }
        }
        Ok(())
    }
}

/// Whole-mission JSON document.
pub mod report {
    use std::io::{self, Write};
    use std::path::Path;

    use mission_core::units::mn_to_kg;
    use mission_planner::{LegResult, MissionReport};
    use serde::Serialize;
    use serde_json::to_writer_pretty;

    #[derive(Debug, Serialize)]
    pub struct Metadata<'a> {
        pub mission: &'a str,
        pub mode: &'a str,
        pub ranks: usize,
    }

    #[derive(Serialize)]
    struct Document<'a> {
        generated_at: String,
        mission: &'a str,
        mode: &'a str,
        ranks: usize,
        all_converged: bool,
        total_fuel_burn_mn: f64,
        total_fuel_burn_kg: f64,
        legs: &'a [LegResult],
    }

    pub fn write_report(
        path: &Path,
        meta: &Metadata<'_>,
        report: &MissionReport,
    ) -> io::Result<()> {
        let total = report.total_fuel_burn();
        let document = Document {
            generated_at: chrono::Utc::now().to_rfc3339(),
            mission: meta.mission,
            mode: meta.mode,
            ranks: meta.ranks,
            all_converged: report.all_converged(),
            total_fuel_burn_mn: total,
            total_fuel_burn_kg: mn_to_kg(total),
            legs: &report.legs,
        };
        let mut writer = super::writer_for_path(path)?;
        to_writer_pretty(&mut writer, &document)?;
        writeln!(writer)?;
        writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mission_planner::{LegMetrics, LegResult, LegStatus, MissionReport, StationProfile};

    fn sample_report() -> MissionReport {
        let profile = StationProfile {
            x: vec![0.0, 1.852],
            h: vec![0.0, 10.0],
            gamma: vec![0.05, 0.0],
            mach: vec![0.82, 0.82],
            v: vec![2.78, 2.43],
            alpha: vec![2.0, 3.0],
            eta: vec![0.0, 0.1],
            cl: vec![0.5, 0.5],
            cd: vec![0.02, 0.02],
            ct: vec![0.03, 0.02],
            tau: vec![0.5, 0.4],
            fuel_w: vec![0.98, 0.0],
            fuel_rate: vec![0.5, 0.5],
        };
        MissionReport {
            legs: vec![
                LegResult {
                    index: 0,
                    name: "long".into(),
                    rank: 0,
                    status: LegStatus::Converged,
                    metrics: Some(LegMetrics {
                        fuelburn: 0.98,
                        block_time: 2.1,
                        tmin: -0.1,
                        tmax: -0.2,
                        newton_iterations: 4,
                        residual_norm: 1e-11,
                    }),
                    profile: Some(profile),
                },
                LegResult {
                    index: 1,
                    name: "short".into(),
                    rank: 1,
                    status: LegStatus::Failed {
                        reason: "no thrust".into(),
                    },
                    metrics: None,
                    profile: None,
                },
            ],
        }
    }

    #[test]
    fn summary_keeps_failed_legs() {
        let mut buf = Vec::new();
        summary::write_report(&mut buf, &sample_report()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], summary::HEADER);
        assert!(lines[1].starts_with("long,converged,0.980000000,"));
        assert_eq!(lines[2], "short,failed,,,,,,,,1");
    }

    #[test]
    fn profile_rows_cover_every_station() {
        let mut buf = Vec::new();
        profile::write_report(&mut buf, &sample_report()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("long,1,1000.000,10.000000,"));
        let columns = profile::HEADER.split(',').count();
        assert!(lines[1..].iter().all(|l| l.split(',').count() == columns));
    }

    #[test]
    fn json_report_is_timestamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/report.json");
        let meta = report::Metadata {
            mission: "test",
            mode: "serial",
            ranks: 1,
        };
        report::write_report(&path, &meta, &sample_report()).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(value["generated_at"].as_str().unwrap().contains('T'));
        assert_eq!(value["legs"].as_array().unwrap().len(), 2);
        assert_eq!(value["all_converged"], false);
    }
}
