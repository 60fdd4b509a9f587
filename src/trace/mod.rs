use itertools::Itertools;
use log::trace;
use nalgebra::{DMatrix, DVector};

use crate::{
    constraint::ImplicitConstraint,
    domain::DomainBox,
    misc::{orthogonal_complement, FloatingPoint},
    polyline::{Polyline, TracePoint},
    solve::SolveContext,
};

const MAX_CORRECTOR_ITERATIONS: usize = 32;
const TANGENT_EPSILON: f64 = 1e-10;

/// March along the zero curve from `start` to `end` by predictor-corrector
/// steps: predict along the tangent (the direction orthogonal to every
/// constraint gradient), then pull the prediction back onto the curve with a
/// damped Newton correction constrained to the plane orthogonal to the step.
///
/// The caller guarantees via the topology certificate that a single monotone
/// arc connects the two points, so any breakdown (singular jacobian, stalled
/// correction) degrades gracefully to cutting straight to `end`.
pub fn trace_curve<T, C>(
    constraints: &[C],
    domain: &DomainBox<T>,
    start: &TracePoint<T>,
    end: &TracePoint<T>,
    ctx: &mut SolveContext<T>,
) -> Polyline<T>
where
    T: FloatingPoint,
    C: ImplicitConstraint<T>,
{
    let step = ctx.options().step;
    let numeric_tolerance = ctx.options().numeric_tolerance;
    let tangent_epsilon = T::from_f64(TANGENT_EPSILON).unwrap();
    let dimension = domain.dim();

    let target = end.coords().clone();
    let mut current = start.coords().clone();
    let mut points = vec![start.clone()];

    let mut control = &target - &current;
    let control_norm = control.norm();
    if control_norm <= numeric_tolerance {
        points.push(end.clone());
        let mut polyline = Polyline::new(points);
        polyline.dedup(numeric_tolerance);
        return polyline;
    }
    control /= control_norm;

    for _ in 0..ctx.options().max_trace_steps {
        if (&current - &target).norm() <= step {
            break;
        }

        let gradients = constraints.iter().map(|c| c.gradient(&current)).collect_vec();
        let Some(mut tangent) =
            orthogonal_complement(&gradients, tangent_epsilon, |attempt| {
                ctx.probe(dimension, attempt)
            })
        else {
            trace!("degenerate tangent, cutting to the target");
            break;
        };
        if tangent.dot(&control) < T::zero() {
            tangent = -tangent;
        }

        let mut candidate = &current + &tangent * step;
        if !domain.contains(&candidate, numeric_tolerance) {
            candidate = domain.clip_segment(&current, &candidate);
        }
        let Some(corrected) = correct_onto_curve(constraints, domain, &candidate, &tangent, ctx)
        else {
            trace!("correction failed, cutting to the target");
            break;
        };

        let advance = (&corrected - &current).norm();
        if advance <= numeric_tolerance {
            break;
        }
        control = (&corrected - &current) / advance;
        current = corrected;
        points.push(TracePoint::new(current.clone()));
    }

    points.push(end.clone());
    let mut polyline = Polyline::new(points);
    polyline.dedup(numeric_tolerance);
    polyline
}

/// Newton iteration solving `f_i = 0` together with `tangent . delta = 0`,
/// with step halving whenever a full step fails to reduce the residual or
/// leaves the domain box.
fn correct_onto_curve<T, C>(
    constraints: &[C],
    domain: &DomainBox<T>,
    candidate: &DVector<T>,
    tangent: &DVector<T>,
    ctx: &SolveContext<T>,
) -> Option<DVector<T>>
where
    T: FloatingPoint,
    C: ImplicitConstraint<T>,
{
    let numeric_tolerance = ctx.options().numeric_tolerance;
    let dimension = candidate.len();
    let half = T::from_f64(0.5).unwrap();
    let mut point = candidate.clone();

    for _ in 0..MAX_CORRECTOR_ITERATIONS {
        let residuals = DVector::from_fn(constraints.len(), |i, _| constraints[i].eval(&point));
        let worst = residuals.iter().fold(T::zero(), |m, r| m.max(r.abs()));
        if worst < numeric_tolerance {
            return Some(domain.clamp_point(&point));
        }

        let gradients = constraints.iter().map(|c| c.gradient(&point)).collect_vec();
        let matrix = DMatrix::from_fn(dimension, dimension, |row, col| {
            if row < gradients.len() {
                gradients[row][col]
            } else {
                tangent[col]
            }
        });
        let rhs = DVector::from_fn(dimension, |row, _| {
            if row < residuals.len() {
                -residuals[row]
            } else {
                T::zero()
            }
        });
        let mut delta = matrix.qr().solve(&rhs)?;

        let total = residuals.iter().fold(T::zero(), |m, r| m + r.abs());
        let mut accepted = false;
        for _ in 0..4 {
            let next = &point + &delta;
            let next_total = constraints
                .iter()
                .fold(T::zero(), |m, c| m + c.eval(&next).abs());
            if next_total < total && domain.contains(&next, numeric_tolerance) {
                point = next;
                accepted = true;
                break;
            }
            delta *= half;
        }
        if !accepted {
            return None;
        }
    }
    None
}
