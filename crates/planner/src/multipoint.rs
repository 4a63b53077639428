//! Multipoint execution: independent segments run serially, on a thread
//! pool, or partitioned over communicator ranks, then reduced to one result
//! per leg.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::comm::{CommError, Communicator};
use crate::segment::{Segment, StationProfile};
use crate::PlannerError;

/// Relative difference above which duplicated leg results count as disagreeing.
pub const AGREEMENT_RTOL: f64 = 1e-8;

/// How legs are assigned to ranks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Partition {
    /// Leg `i` runs on rank `i % size`.
    #[default]
    RoundRobin,
    /// Every rank runs every leg.
    Replicated,
}

impl Partition {
    pub fn owns(&self, leg: usize, rank: usize, size: usize) -> bool {
        match self {
            Partition::RoundRobin => leg % size.max(1) == rank,
            Partition::Replicated => true,
        }
    }
}

/// How copies of the same leg from different ranks are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReductionRule {
    /// The copy from the lowest rank; disagreeing copies are reported.
    #[default]
    Owner,
    /// The copy with the largest fuel burn.
    Max,
}

/// Whether a distributed run reduces to one rank or to all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collective {
    AllToOne { root: usize },
    AllToAll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LegStatus {
    Converged,
    /// Out of Newton iterations; values are the best state reached.
    NotConverged {
        #[serde(with = "crate::wire::float")]
        residual_norm: f64,
    },
    Failed { reason: String },
}

/// Scalar outputs of a finished leg.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LegMetrics {
    /// Fuel burned (1e6 N).
    #[serde(with = "crate::wire::float")]
    pub fuelburn: f64,
    /// Block time (h).
    #[serde(with = "crate::wire::float")]
    pub block_time: f64,
    #[serde(with = "crate::wire::float")]
    pub tmin: f64,
    #[serde(with = "crate::wire::float")]
    pub tmax: f64,
    pub newton_iterations: usize,
    #[serde(with = "crate::wire::float")]
    pub residual_norm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegResult {
    pub index: usize,
    pub name: String,
    /// Rank that computed this copy.
    pub rank: usize,
    pub status: LegStatus,
    pub metrics: Option<LegMetrics>,
    pub profile: Option<StationProfile>,
}

impl LegResult {
    pub fn fuelburn(&self) -> Option<f64> {
        self.metrics.map(|m| m.fuelburn)
    }

    pub fn is_converged(&self) -> bool {
        self.status == LegStatus::Converged
    }

    fn missing(index: usize, name: String) -> Self {
        Self {
            index,
            name,
            rank: 0,
            status: LegStatus::Failed {
                reason: "no rank computed this leg".into(),
            },
            metrics: None,
            profile: None,
        }
    }
}

/// One result per leg, in leg order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionReport {
    pub legs: Vec<LegResult>,
}

impl MissionReport {
    pub fn fuel_burns(&self) -> Vec<Option<f64>> {
        self.legs.iter().map(LegResult::fuelburn).collect()
    }

    /// Sum over legs that produced a value.
    pub fn total_fuel_burn(&self) -> f64 {
        self.fuel_burns().into_iter().flatten().sum()
    }

    pub fn all_converged(&self) -> bool {
        self.legs.iter().all(LegResult::is_converged)
    }
}

/// A named segment awaiting execution.
#[derive(Debug)]
pub struct Leg {
    pub name: String,
    pub segment: Segment,
}

/// Ordered, independent legs. Segments share only the read-only surrogate.
#[derive(Debug, Default)]
pub struct Multipoint {
    legs: Vec<Leg>,
}

impl Multipoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, segment: Segment) {
        self.legs.push(Leg {
            name: name.into(),
            segment,
        });
    }

    pub fn len(&self) -> usize {
        self.legs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.legs.is_empty()
    }

    pub fn legs(&self) -> &[Leg] {
        &self.legs
    }

    pub fn segment_mut(&mut self, index: usize) -> Option<&mut Segment> {
        self.legs.get_mut(index).map(|leg| &mut leg.segment)
    }

    /// Run every leg in order on the calling thread.
    pub fn run_serial(&mut self) -> MissionReport {
        let legs = self
            .legs
            .iter_mut()
            .enumerate()
            .map(|(index, leg)| run_leg(index, 0, leg))
            .collect();
        MissionReport { legs }
    }

    /// Run legs concurrently on a rayon pool with `threads` workers (all cores when `None`).
    pub fn run_parallel(&mut self, threads: Option<usize>) -> Result<MissionReport, PlannerError> {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(n) = threads {
            builder = builder.num_threads(n);
        }
        let pool = builder
            .build()
            .map_err(|err| PlannerError::ThreadPool(err.to_string()))?;
        let legs: Vec<LegResult> = pool.install(|| {
            self.legs
                .par_iter_mut()
                .enumerate()
                .map(|(index, leg)| run_leg(index, 0, leg))
                .collect()
        });
        Ok(MissionReport { legs })
    }

    /// Run the legs this rank owns, exchange results and reduce them.
    /// Returns `None` on ranks that do not receive the reduction.
    pub fn run_distributed<C: Communicator>(
        &mut self,
        comm: &C,
        partition: Partition,
        rule: ReductionRule,
        collective: Collective,
    ) -> Result<Option<MissionReport>, CommError> {
        let (rank, size) = (comm.rank(), comm.size());
        let local: Vec<LegResult> = self
            .legs
            .iter_mut()
            .enumerate()
            .filter(|(index, _)| partition.owns(*index, rank, size))
            .map(|(index, leg)| run_leg(index, rank, leg))
            .collect();

        let gathered = match collective {
            Collective::AllToAll => Some(comm.all_gather(&local)?),
            Collective::AllToOne { root } => comm.gather(root, &local)?,
        };
        let names: Vec<String> = self.legs.iter().map(|leg| leg.name.clone()).collect();
        Ok(gathered.map(|copies| reduce(&names, copies.into_iter().flatten(), rule)))
    }
}

fn run_leg(index: usize, rank: usize, leg: &mut Leg) -> LegResult {
    let outcome = leg.segment.run().and_then(|report| {
        let (tmin, tmax) = leg.segment.thrust_margins()?;
        let metrics = LegMetrics {
            fuelburn: leg.segment.fuelburn()?,
            block_time: leg.segment.block_time()?,
            tmin,
            tmax,
            newton_iterations: report.newton.iter().map(|r| r.iterations).sum(),
            residual_norm: report.residual_norm(),
        };
        Ok((report, metrics, leg.segment.station_profile()?))
    });
    match outcome {
        Ok((report, metrics, profile)) => {
            let status = if report.converged() {
                LegStatus::Converged
            } else {
                for warning in report.warnings() {
                    warn!(leg = %leg.name, rank, "{warning}");
                }
                LegStatus::NotConverged {
                    residual_norm: metrics.residual_norm,
                }
            };
            info!(
                leg = %leg.name,
                rank,
                fuelburn = metrics.fuelburn,
                block_time = metrics.block_time,
                iterations = metrics.newton_iterations,
                "leg finished"
            );
            LegResult {
                index,
                name: leg.name.clone(),
                rank,
                status,
                metrics: Some(metrics),
                profile: Some(profile),
            }
        }
        Err(err) => {
            warn!(leg = %leg.name, rank, error = %err, "leg failed");
            LegResult {
                index,
                name: leg.name.clone(),
                rank,
                status: LegStatus::Failed {
                    reason: err.to_string(),
                },
                metrics: None,
                profile: None,
            }
        }
    }
}

/// Combine every copy of every leg into one result per leg, in leg order.
/// The outcome does not depend on the order copies arrive in.
pub fn reduce(
    names: &[String],
    copies: impl IntoIterator<Item = LegResult>,
    rule: ReductionRule,
) -> MissionReport {
    let mut by_leg: Vec<Vec<LegResult>> = vec![Vec::new(); names.len()];
    for copy in copies {
        if let Some(slot) = by_leg.get_mut(copy.index) {
            slot.push(copy);
        }
    }
    let legs = by_leg
        .into_iter()
        .zip(names)
        .enumerate()
        .map(|(index, (mut copies, name))| {
            copies.sort_by_key(|copy| copy.rank);
            reduce_leg(copies, rule).unwrap_or_else(|| LegResult::missing(index, name.clone()))
        })
        .collect();
    MissionReport { legs }
}

fn reduce_leg(copies: Vec<LegResult>, rule: ReductionRule) -> Option<LegResult> {
    let first = copies.first()?;
    let (name, owner) = (first.name.clone(), first.rank);
    let mut valued: Vec<&LegResult> = copies.iter().filter(|c| c.fuelburn().is_some()).collect();
    if valued.is_empty() {
        return copies.into_iter().next();
    }
    match rule {
        ReductionRule::Owner => {
            let chosen = valued[0];
            let reference = chosen.fuelburn().unwrap_or_default();
            for other in &valued[1..] {
                let value = other.fuelburn().unwrap_or_default();
                let scale = reference.abs().max(value.abs()).max(1.0);
                if (value - reference).abs() > AGREEMENT_RTOL * scale {
                    warn!(
                        leg = %name,
                        owner,
                        rank = other.rank,
                        owner_value = reference,
                        value,
                        "duplicated leg results disagree"
                    );
                }
            }
            Some(chosen.clone())
        }
        ReductionRule::Max => {
            valued.sort_by(|a, b| {
                let (x, y) = (a.fuelburn().unwrap_or_default(), b.fuelburn().unwrap_or_default());
                y.total_cmp(&x).then(a.rank.cmp(&b.rank))
            });
            Some(valued[0].clone())
        }
    }
}
