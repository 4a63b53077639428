//! Tabulated aerodynamic coefficients over (Mach, altitude, α, η) with
//! multilinear interpolation.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::AeroError;
use crate::model::{GridSpec, SurrogateModel};

/// Which coefficient to look up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coefficient {
    Lift,
    Drag,
    Moment,
}

/// Value and gradient with respect to (Mach, altitude, α, η).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub value: f64,
    pub gradient: [f64; 4],
}

/// Precomputed CL, CD and CM samples. Shared read-only between segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurrogateTable {
    /// Sample counts along each axis.
    pub nums: [usize; 4],
    pub grid: GridSpec,
    pub cl: Vec<f64>,
    pub cd: Vec<f64>,
    pub cm: Vec<f64>,
}

const AXES: [&str; 4] = ["mach", "altitude", "alpha", "eta"];

impl SurrogateTable {
    /// Sample a parametric model on a grid.
    pub fn generate(model: &SurrogateModel, grid: GridSpec) -> Result<Self, AeroError> {
        let nums = [
            grid.mach.len(),
            grid.altitude.len(),
            grid.alpha.len(),
            grid.eta.len(),
        ];
        let total = nums.iter().product();
        let mut cl = Vec::with_capacity(total);
        let mut cd = Vec::with_capacity(total);
        let mut cm = Vec::with_capacity(total);
        for &m in &grid.mach {
            for &h in &grid.altitude {
                for &a in &grid.alpha {
                    for &e in &grid.eta {
                        cl.push(model.lift(m, h, a, e));
                        cd.push(model.drag(m, h, a, e));
                        cm.push(model.moment(m, h, a, e));
                    }
                }
            }
        }
        let table = Self {
            nums,
            grid,
            cl,
            cd,
            cm,
        };
        table.validate()?;
        Ok(table)
    }

    /// Default grid sampled from the default model.
    pub fn standard() -> Result<Self, AeroError> {
        Self::generate(&SurrogateModel::default(), GridSpec::default())
    }

    pub fn validate(&self) -> Result<(), AeroError> {
        let axes = [
            &self.grid.mach,
            &self.grid.altitude,
            &self.grid.alpha,
            &self.grid.eta,
        ];
        for ((axis, values), &n) in AXES.iter().zip(axes).zip(&self.nums) {
            if values.len() != n {
                return Err(AeroError::Grid(format!(
                    "{axis} axis has {} samples, expected {n}",
                    values.len()
                )));
            }
            if n < 2 {
                return Err(AeroError::Grid(format!("{axis} axis needs two samples")));
            }
            if values.windows(2).any(|w| w[1] <= w[0]) {
                return Err(AeroError::Grid(format!("{axis} axis must increase")));
            }
        }
        let total: usize = self.nums.iter().product();
        for (name, data) in [("CL", &self.cl), ("CD", &self.cd), ("CM", &self.cm)] {
            if data.len() != total {
                return Err(AeroError::Grid(format!(
                    "{name} has {} samples, expected {total}",
                    data.len()
                )));
            }
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, AeroError> {
        let file = File::open(path)?;
        let table: Self = serde_json::from_reader(BufReader::new(file))?;
        table.validate()?;
        Ok(table)
    }

    pub fn save(&self, path: &Path) -> Result<(), AeroError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    fn data(&self, coefficient: Coefficient) -> &[f64] {
        match coefficient {
            Coefficient::Lift => &self.cl,
            Coefficient::Drag => &self.cd,
            Coefficient::Moment => &self.cm,
        }
    }

    /// Interpolate a coefficient. Mach and altitude must lie inside the grid;
    /// α and η extrapolate linearly from the edge cells.
    pub fn sample(
        &self,
        coefficient: Coefficient,
        mach: f64,
        h_km: f64,
        alpha_deg: f64,
        eta_deg: f64,
    ) -> Result<Sample, AeroError> {
        let point = [mach, h_km, alpha_deg, eta_deg];
        let axes = [
            &self.grid.mach,
            &self.grid.altitude,
            &self.grid.alpha,
            &self.grid.eta,
        ];
        let mut cell = [0usize; 4];
        let mut t = [0.0; 4];
        let mut width = [0.0; 4];
        for d in 0..4 {
            let values = axes[d];
            let x = point[d];
            let (lo, hi) = (values[0], values[values.len() - 1]);
            if !x.is_finite() || (d < 2 && !(lo..=hi).contains(&x)) {
                return Err(AeroError::OutOfRange {
                    axis: AXES[d],
                    value: x,
                });
            }
            let i = values
                .partition_point(|&v| v <= x)
                .saturating_sub(1)
                .min(values.len() - 2);
            cell[d] = i;
            width[d] = values[i + 1] - values[i];
            t[d] = (x - values[i]) / width[d];
        }

        let data = self.data(coefficient);
        let [_, nh, na, ne] = self.nums;
        let mut value = 0.0;
        let mut gradient = [0.0; 4];
        for corner in 0..16usize {
            let bit = |d: usize| (corner >> (3 - d)) & 1;
            let index = (((cell[0] + bit(0)) * nh + cell[1] + bit(1)) * na + cell[2] + bit(2)) * ne
                + cell[3]
                + bit(3);
            let f = data[index];
            let weights: [f64; 4] =
                std::array::from_fn(|d| if bit(d) == 1 { t[d] } else { 1.0 - t[d] });
            value += f * weights.iter().product::<f64>();
            for d in 0..4 {
                let sign = if bit(d) == 1 { 1.0 } else { -1.0 };
                let others: f64 = (0..4).filter(|&k| k != d).map(|k| weights[k]).product();
                gradient[d] += f * sign * others / width[d];
            }
        }
        Ok(Sample { value, gradient })
    }
}
