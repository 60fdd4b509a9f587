use itertools::Itertools;
use nalgebra::{DMatrix, DVector};

use crate::{
    constraint::ImplicitConstraint,
    misc::{orthogonal_complement, orthonormalize, FloatingPoint},
    solve::SolveContext,
};

/// Residual threshold below which constraint gradient axes are treated as
/// linearly dependent.
const DEPENDENCY_EPSILON: f64 = 1e-10;

/// Certify that the zero set inside the current box contains no closed loop
/// and no tangential or singular structure, so that it consists of disjoint
/// monotone arcs crossing the box.
///
/// The certificate: take each constraint's gradient cone, complete the cone
/// axes with a mutual orthogonal direction, and solve the resulting linear
/// system for every combination of extreme cone angles. If every solution
/// stays strictly inside the unit ball, no curve tangent can become
/// orthogonal to the completed direction anywhere in the box, which rules
/// out loops.
///
/// Returns `false` whenever the certificate cannot be established; the caller
/// then subdivides further.
pub fn loop_free<T, C>(constraints: &[C], ctx: &mut SolveContext<T>) -> bool
where
    T: FloatingPoint,
    C: ImplicitConstraint<T>,
{
    let epsilon = T::from_f64(DEPENDENCY_EPSILON).unwrap();
    let Some(cones) = constraints
        .iter()
        .map(|c| c.normal_cone())
        .collect::<Option<Vec<_>>>()
    else {
        return false;
    };
    if cones.is_empty() {
        return false;
    }
    let dimension = cones[0].axis.len();
    let axes = cones.iter().map(|c| c.axis.clone()).collect_vec();

    if orthonormalize(&axes, epsilon).is_none() {
        return false;
    }
    let Some(tangent) = orthogonal_complement(&axes, epsilon, |attempt| ctx.probe(dimension, attempt))
    else {
        return false;
    };

    let matrix = DMatrix::from_fn(dimension, dimension, |row, col| {
        if row < axes.len() {
            axes[row][col]
        } else {
            tangent[col]
        }
    });
    let qr = matrix.qr();

    for mask in 0..(1usize << axes.len()) {
        let rhs = DVector::from_fn(dimension, |row, _| {
            if row < cones.len() {
                if mask >> row & 1 == 1 {
                    cones[row].cos_half_angle
                } else {
                    -cones[row].cos_half_angle
                }
            } else {
                T::zero()
            }
        });
        match qr.solve(&rhs) {
            Some(solution) if solution.norm_squared() < T::one() => {}
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        solve::{SolveContext, SolverOptions},
        spline::{KnotVector, MultivariateSpline},
    };

    fn parabola() -> MultivariateSpline<f64> {
        MultivariateSpline::try_new(
            vec![2, 1],
            vec![
                KnotVector::new(vec![0., 0., 0., 1., 1., 1.]),
                KnotVector::new(vec![0., 0., 1., 1.]),
            ],
            vec![-0.5, 0.5, -0.5, 0.5, 0.5, 1.5],
        )
        .unwrap()
    }

    fn centered_circle() -> MultivariateSpline<f64> {
        // (x - 0.5)^2 + (y - 0.5)^2 - 0.16 on the unit square
        let a = [0.25, -0.25, 0.25];
        let mut coefficients = Vec::new();
        for ai in a {
            for aj in a {
                coefficients.push(ai + aj - 0.16);
            }
        }
        MultivariateSpline::try_new(
            vec![2, 2],
            vec![
                KnotVector::new(vec![0., 0., 0., 1., 1., 1.]),
                KnotVector::new(vec![0., 0., 0., 1., 1., 1.]),
            ],
            coefficients,
        )
        .unwrap()
    }

    #[test]
    fn monotone_arc_is_certified() {
        let mut ctx = SolveContext::new(SolverOptions::default());
        assert!(loop_free(&[parabola()], &mut ctx));
    }

    #[test]
    fn closed_loop_is_rejected() {
        // the gradient turns full circle, so no cone exists
        let mut ctx = SolveContext::new(SolverOptions::default());
        assert!(!loop_free(&[centered_circle()], &mut ctx));
    }
}
