//! Linear operators mapping control-point ordinates to station values.
//!
//! The profile between control points is the natural cubic spline through
//! `(x_pts[i], cp[i])`. Because that spline is linear in the ordinates, the
//! map from control points to values (or slopes) at fixed stations is a
//! constant matrix, assembled here one basis column at a time.

use std::sync::Arc;

use mission_core::linalg::linspace;
use nalgebra::{DMatrix, DVector};

use crate::SplineError;

/// Slope conversion from km per 1e6 m to a dimensionless gradient.
pub const SLOPE_SCALE: f64 = 1.0e-3;

/// Station abscissas and the two operators shared by a segment's spline systems.
#[derive(Debug, Clone)]
pub struct SplineOperators {
    x_pts: Vec<f64>,
    stations: DVector<f64>,
    value: Arc<DMatrix<f64>>,
    slope: Arc<DMatrix<f64>>,
}

impl SplineOperators {
    /// Build operators for `num_elem + 1` uniformly spaced stations spanning the control points.
    pub fn new(num_elem: usize, x_pts: &[f64]) -> Result<Self, SplineError> {
        if num_elem == 0 {
            return Err(SplineError::NoElements);
        }
        if x_pts.len() < 2 {
            return Err(SplineError::TooFewControlPoints(x_pts.len()));
        }
        if let Some(i) = x_pts.windows(2).position(|w| !(w[1] > w[0])) {
            return Err(SplineError::NotIncreasing(i + 1));
        }
        let first = x_pts[0];
        let last = x_pts[x_pts.len() - 1];
        let stations = DVector::from_vec(linspace(first, last, num_elem + 1));

        let num_cp = x_pts.len();
        let mut value = DMatrix::zeros(num_elem + 1, num_cp);
        let mut slope = DMatrix::zeros(num_elem + 1, num_cp);
        for j in 0..num_cp {
            let mut basis = vec![0.0; num_cp];
            basis[j] = 1.0;
            let spline = NaturalCubic::new(x_pts, &basis);
            for (i, &x) in stations.iter().enumerate() {
                let (v, dv) = spline.eval(x);
                value[(i, j)] = v;
                slope[(i, j)] = dv * SLOPE_SCALE;
            }
        }

        Ok(Self {
            x_pts: x_pts.to_vec(),
            stations,
            value: Arc::new(value),
            slope: Arc::new(slope),
        })
    }

    pub fn num_cp(&self) -> usize {
        self.x_pts.len()
    }

    pub fn num_stations(&self) -> usize {
        self.stations.len()
    }

    pub fn x_pts(&self) -> &[f64] {
        &self.x_pts
    }

    pub fn stations(&self) -> &DVector<f64> {
        &self.stations
    }

    /// Station values from control-point ordinates.
    pub fn value(&self) -> &Arc<DMatrix<f64>> {
        &self.value
    }

    /// Station slopes (scaled by [`SLOPE_SCALE`]) from control-point ordinates.
    pub fn slope(&self) -> &Arc<DMatrix<f64>> {
        &self.slope
    }

    /// Value operator evaluated at arbitrary abscissas inside the span.
    pub fn value_at(&self, xs: &[f64]) -> DMatrix<f64> {
        let num_cp = self.num_cp();
        let mut op = DMatrix::zeros(xs.len(), num_cp);
        for j in 0..num_cp {
            let mut basis = vec![0.0; num_cp];
            basis[j] = 1.0;
            let spline = NaturalCubic::new(&self.x_pts, &basis);
            for (i, &x) in xs.iter().enumerate() {
                op[(i, j)] = spline.eval(x).0;
            }
        }
        op
    }
}

struct NaturalCubic<'a> {
    x: &'a [f64],
    y: &'a [f64],
    m: Vec<f64>,
}

impl<'a> NaturalCubic<'a> {
    fn new(x: &'a [f64], y: &'a [f64]) -> Self {
        let n = x.len();
        let mut m = vec![0.0; n];
        if n > 2 {
            // Interior second derivatives from the tridiagonal continuity system.
            let k = n - 2;
            let mut sub = vec![0.0; k];
            let mut diag = vec![0.0; k];
            let mut sup = vec![0.0; k];
            let mut rhs = vec![0.0; k];
            for i in 1..n - 1 {
                let h0 = x[i] - x[i - 1];
                let h1 = x[i + 1] - x[i];
                sub[i - 1] = h0;
                diag[i - 1] = 2.0 * (h0 + h1);
                sup[i - 1] = h1;
                rhs[i - 1] = 6.0 * ((y[i + 1] - y[i]) / h1 - (y[i] - y[i - 1]) / h0);
            }
            let interior = thomas(&sub, &diag, &sup, &rhs);
            m[1..n - 1].copy_from_slice(&interior);
        }
        Self { x, y, m }
    }

    /// Value and first derivative at `t`; outside the span the end cubics are extended.
    fn eval(&self, t: f64) -> (f64, f64) {
        let n = self.x.len();
        let i = match self.x.iter().rposition(|&xi| xi <= t) {
            Some(i) => i.min(n - 2),
            None => 0,
        };
        let (x0, x1) = (self.x[i], self.x[i + 1]);
        let (y0, y1) = (self.y[i], self.y[i + 1]);
        let (m0, m1) = (self.m[i], self.m[i + 1]);
        let h = x1 - x0;
        let a = x1 - t;
        let b = t - x0;
        let c0 = y0 / h - m0 * h / 6.0;
        let c1 = y1 / h - m1 * h / 6.0;
        let value = m0 * a.powi(3) / (6.0 * h) + m1 * b.powi(3) / (6.0 * h) + c0 * a + c1 * b;
        let slope = -m0 * a * a / (2.0 * h) + m1 * b * b / (2.0 * h) - c0 + c1;
        (value, slope)
    }
}

/// Tridiagonal solve; `sub[0]` and `sup[last]` are ignored.
fn thomas(sub: &[f64], diag: &[f64], sup: &[f64], rhs: &[f64]) -> Vec<f64> {
    let n = diag.len();
    let mut c = vec![0.0; n];
    let mut d = vec![0.0; n];
    c[0] = sup[0] / diag[0];
    d[0] = rhs[0] / diag[0];
    for i in 1..n {
        let denom = diag[i] - sub[i] * c[i - 1];
        c[i] = sup[i] / denom;
        d[i] = (rhs[i] - sub[i] * d[i - 1]) / denom;
    }
    let mut out = vec![0.0; n];
    out[n - 1] = d[n - 1];
    for i in (0..n - 1).rev() {
        out[i] = d[i] - c[i] * out[i + 1];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn reproduces_linear_profiles_exactly() {
        let x_pts = [0.0, 0.5, 1.7, 3.0];
        let ops = SplineOperators::new(12, &x_pts).unwrap();
        let cp = DVector::from_iterator(4, x_pts.iter().map(|x| 2.0 * x - 1.0));
        let h = ops.value().as_ref() * &cp;
        let g = ops.slope().as_ref() * &cp;
        for (i, x) in ops.stations().iter().enumerate() {
            assert_relative_eq!(h[i], 2.0 * x - 1.0, epsilon = 1e-12);
            assert_relative_eq!(g[i], 2.0 * SLOPE_SCALE, epsilon = 1e-12);
        }
    }

    #[test]
    fn rejects_non_monotonic_points() {
        assert!(matches!(
            SplineOperators::new(10, &[0.0, 1.0, 1.0]),
            Err(SplineError::NotIncreasing(2))
        ));
        assert!(matches!(
            SplineOperators::new(10, &[0.0]),
            Err(SplineError::TooFewControlPoints(1))
        ));
    }
}
