//! Dense linear algebra shared by the solver and spline crates.
//!
//! The Krylov solver is matrix-free: callers hand it a closure applying the
//! operator, so the same routine serves assembled matrices, Newton Jacobians
//! built from chained partial derivatives, and their transposes.

use std::convert::Infallible;

use nalgebra::{DMatrix, DVector};

/// Convergence controls for the restarted GMRES solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearSettings {
    pub atol: f64,
    pub rtol: f64,
    pub max_iter: usize,
    pub restart: usize,
}

impl Default for LinearSettings {
    fn default() -> Self {
        Self {
            atol: 1.0e-20,
            rtol: 1.0e-10,
            max_iter: 200,
            restart: 100,
        }
    }
}

/// Outcome of a linear solve. `x` is the best iterate even when `converged` is false.
#[derive(Debug, Clone)]
pub struct LinearSolution {
    pub x: DVector<f64>,
    pub residual_norm: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Solve `A x = b` with restarted GMRES, where `apply` evaluates `A v`.
///
/// Stops once `‖b − A x‖ ≤ max(atol, rtol·‖b‖)` or after `max_iter` operator
/// applications. Running out of budget is not an error; the caller inspects
/// [`LinearSolution::converged`].
pub fn gmres<F, E>(
    b: &DVector<f64>,
    x0: Option<&DVector<f64>>,
    settings: &LinearSettings,
    mut apply: F,
) -> Result<LinearSolution, E>
where
    F: FnMut(&DVector<f64>) -> Result<DVector<f64>, E>,
{
    let n = b.len();
    let mut x = x0.cloned().unwrap_or_else(|| DVector::zeros(n));
    let b_norm = b.norm();
    if n == 0 || b_norm == 0.0 {
        return Ok(LinearSolution {
            x: DVector::zeros(n),
            residual_norm: 0.0,
            iterations: 0,
            converged: true,
        });
    }

    let tol = settings.atol.max(settings.rtol * b_norm);
    let mut r = b - apply(&x)?;
    let mut beta = r.norm();
    let mut total = 0usize;

    while beta > tol && total < settings.max_iter {
        let m = settings.restart.max(1).min(settings.max_iter - total);
        let mut basis: Vec<DVector<f64>> = Vec::with_capacity(m + 1);
        basis.push(&r / beta);
        let mut h = DMatrix::<f64>::zeros(m + 1, m);
        let mut cs = vec![0.0; m];
        let mut sn = vec![0.0; m];
        let mut g = DVector::<f64>::zeros(m + 1);
        g[0] = beta;
        let mut used = 0usize;

        for k in 0..m {
            let mut w = apply(&basis[k])?;
            total += 1;
            for (i, v) in basis.iter().enumerate().take(k + 1) {
                let hik = w.dot(v);
                h[(i, k)] = hik;
                w.axpy(-hik, v, 1.0);
            }
            let h_next = w.norm();
            h[(k + 1, k)] = h_next;

            for i in 0..k {
                let upper = cs[i] * h[(i, k)] + sn[i] * h[(i + 1, k)];
                let lower = -sn[i] * h[(i, k)] + cs[i] * h[(i + 1, k)];
                h[(i, k)] = upper;
                h[(i + 1, k)] = lower;
            }
            let (c, s) = givens(h[(k, k)], h[(k + 1, k)]);
            cs[k] = c;
            sn[k] = s;
            h[(k, k)] = c * h[(k, k)] + s * h[(k + 1, k)];
            h[(k + 1, k)] = 0.0;
            g[k + 1] = -s * g[k];
            g[k] *= c;
            used = k + 1;

            let breakdown = h_next <= f64::EPSILON * beta;
            if g[k + 1].abs() <= tol || breakdown || total >= settings.max_iter {
                break;
            }
            basis.push(w / h_next);
        }

        let y = back_substitute(&h, &g, used);
        for (i, yi) in y.iter().enumerate() {
            x.axpy(*yi, &basis[i], 1.0);
        }

        r = b - apply(&x)?;
        let previous = beta;
        beta = r.norm();
        if beta >= previous * (1.0 - 1.0e-12) {
            // Stagnated restart cycle.
            break;
        }
    }

    Ok(LinearSolution {
        x,
        residual_norm: beta,
        iterations: total,
        converged: beta <= tol,
    })
}

/// GMRES against an assembled matrix.
pub fn gmres_dense(
    a: &DMatrix<f64>,
    b: &DVector<f64>,
    settings: &LinearSettings,
) -> LinearSolution {
    let Ok(solution) = gmres(b, None, settings, |v| Ok::<_, Infallible>(a * v));
    solution
}

fn givens(a: f64, b: f64) -> (f64, f64) {
    if b == 0.0 {
        (1.0, 0.0)
    } else {
        let r = a.hypot(b);
        (a / r, b / r)
    }
}

fn back_substitute(h: &DMatrix<f64>, g: &DVector<f64>, k: usize) -> Vec<f64> {
    let mut y = vec![0.0; k];
    for i in (0..k).rev() {
        let mut acc = g[i];
        for j in (i + 1)..k {
            acc -= h[(i, j)] * y[j];
        }
        let pivot = h[(i, i)];
        y[i] = if pivot.abs() > f64::MIN_POSITIVE {
            acc / pivot
        } else {
            0.0
        };
    }
    y
}

/// `n` evenly spaced samples on `[start, end]`.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => (0..n)
            .map(|i| start + (end - start) * i as f64 / (n - 1) as f64)
            .collect(),
    }
}

/// Trapezoidal integral of `y` over the abscissas `x`.
pub fn trapezoid(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| 0.5 * (ys[0] + ys[1]) * (xs[1] - xs[0]))
        .sum()
}

/// Kreisselmeier–Steinhauser aggregate: a smooth upper bound on `max(values)`.
pub fn ks_max(values: &[f64], rho: f64) -> f64 {
    let peak = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !peak.is_finite() {
        return peak;
    }
    let sum: f64 = values.iter().map(|v| (rho * (v - peak)).exp()).sum();
    peak + sum.ln() / rho
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn gmres_solves_nonsymmetric_system() {
        let a = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.0, -2.0, 5.0, 1.0, 0.5, 0.0, 3.0]);
        let expected = DVector::from_vec(vec![1.0, -2.0, 0.5]);
        let b = &a * &expected;
        let solution = gmres_dense(&a, &b, &LinearSettings::default());
        assert!(solution.converged);
        for i in 0..3 {
            assert_relative_eq!(solution.x[i], expected[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn gmres_reports_budget_exhaustion() {
        let n = 30;
        let a = DMatrix::from_fn(n, n, |i, j| if i == j { 1.0 + i as f64 } else { 0.3 });
        let b = DVector::from_element(n, 1.0);
        let settings = LinearSettings {
            max_iter: 2,
            restart: 2,
            ..LinearSettings::default()
        };
        let solution = gmres_dense(&a, &b, &settings);
        assert!(!solution.converged);
        assert_eq!(solution.iterations, 2);
        assert!(solution.residual_norm < b.norm());
    }

    #[test]
    fn ks_bounds_the_maximum() {
        let values = [0.1, 0.4, -0.2];
        let ks = ks_max(&values, 50.0);
        assert!(ks >= 0.4);
        assert!(ks < 0.4 + 0.05);
    }

    #[test]
    fn trapezoid_integrates_linear_exactly() {
        let x = linspace(0.0, 2.0, 5);
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v + 1.0).collect();
        assert_relative_eq!(trapezoid(&x, &y), 8.0, epsilon = 1e-12);
    }
}
