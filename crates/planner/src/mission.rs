//! From a resolved mission configuration to a reduced report.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use mission_aero::SurrogateTable;
use mission_config::{
    ExecutionMode, MissionConfig, PartitionConfig, ReductionConfig, SolverConfig, SurrogateConfig,
};
use mission_core::linalg::LinearSettings;
use mission_graph::NewtonSettings;
use tracing::{info, warn};

use crate::comm::{Communicator, LocalCluster};
use crate::leg::LegPlan;
use crate::multipoint::{Collective, MissionReport, Multipoint, Partition, ReductionRule};
use crate::{PlannerError, SegmentError};

/// Load the configured surrogate table, or generate the standard one.
pub fn load_surrogate(config: &SurrogateConfig) -> Result<Arc<SurrogateTable>, PlannerError> {
    let table = match &config.table {
        Some(path) => {
            info!(path = %path.display(), "loading surrogate table");
            SurrogateTable::load(path)?
        }
        None => SurrogateTable::standard()?,
    };
    if let Some(path) = &config.save {
        table.save(path)?;
        info!(path = %path.display(), "saved surrogate table");
    }
    Ok(Arc::new(table))
}

pub fn newton_settings(solver: &SolverConfig) -> NewtonSettings {
    NewtonSettings {
        atol: solver.atol,
        rtol: solver.rtol,
        max_iteration: solver.max_iteration,
        damping: solver.damping,
        linear: LinearSettings {
            atol: solver.linear.atol,
            rtol: solver.linear.rtol,
            max_iter: solver.linear.max_iter,
            restart: solver.linear.restart,
        },
    }
}

impl From<PartitionConfig> for Partition {
    fn from(config: PartitionConfig) -> Self {
        match config {
            PartitionConfig::RoundRobin => Partition::RoundRobin,
            PartitionConfig::Replicated => Partition::Replicated,
        }
    }
}

impl From<ReductionConfig> for ReductionRule {
    fn from(config: ReductionConfig) -> Self {
        match config {
            ReductionConfig::Owner => ReductionRule::Owner,
            ReductionConfig::Max => ReductionRule::Max,
        }
    }
}

/// Assemble one segment per leg, in configuration order.
pub fn build_multipoint(
    mission: &MissionConfig,
    table: &Arc<SurrogateTable>,
) -> Result<Multipoint, SegmentError> {
    let newton = newton_settings(&mission.solver);
    let mut multipoint = Multipoint::new();
    for leg in &mission.legs {
        let plan = LegPlan::new(leg, &mission.discretization)?;
        let segment = plan.assemble(mission.aircraft, Arc::clone(table), newton)?;
        multipoint.push(plan.name, segment);
    }
    Ok(multipoint)
}

/// Run every leg of the mission with the configured execution mode.
pub fn run_mission(mission: &MissionConfig) -> Result<MissionReport, PlannerError> {
    let started = Instant::now();
    let table = load_surrogate(&mission.surrogate)?;
    let execution = mission.execution;

    let report = match execution.mode {
        ExecutionMode::Serial => build_multipoint(mission, &table)?.run_serial(),
        ExecutionMode::Parallel => {
            build_multipoint(mission, &table)?.run_parallel(execution.threads)?
        }
        ExecutionMode::Distributed => {
            // Every rank holds its own copy of the legs.
            let ranks = (0..execution.ranks)
                .map(|_| build_multipoint(mission, &table).map(Mutex::new))
                .collect::<Result<Vec<_>, _>>()?;
            let partition = Partition::from(execution.partition);
            let rule = ReductionRule::from(execution.reduction);
            let results = LocalCluster::new(execution.ranks).run(|comm| {
                let mut multipoint = ranks[comm.rank()]
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                multipoint.run_distributed(comm, partition, rule, Collective::AllToOne { root: 0 })
            });
            let mut report = None;
            for result in results {
                if let Some(root_report) = result? {
                    report = Some(root_report);
                }
            }
            report.ok_or(PlannerError::NoReport)?
        }
    };

    let unconverged = report.legs.iter().filter(|leg| !leg.is_converged()).count();
    if unconverged > 0 {
        warn!(unconverged, "some legs did not converge");
    }
    info!(
        legs = report.legs.len(),
        total_fuel_burn = report.total_fuel_burn(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "mission complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solver_config_maps_onto_newton_settings() {
        let settings = newton_settings(&SolverConfig::default());
        assert_eq!(settings, NewtonSettings::default());
    }

    #[test]
    fn config_enums_map_onto_execution_choices() {
        assert_eq!(Partition::from(PartitionConfig::Replicated), Partition::Replicated);
        assert_eq!(ReductionRule::from(ReductionConfig::Max), ReductionRule::Max);
        assert_eq!(ReductionRule::from(ReductionConfig::default()), ReductionRule::Owner);
    }
}
