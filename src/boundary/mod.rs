use itertools::Itertools;
use log::trace;
use nalgebra::{DMatrix, DVector};

use crate::{
    constraint::ImplicitConstraint,
    domain::DomainBox,
    misc::FloatingPoint,
    polyline::TracePoint,
    solve::SolveContext,
};

const MAX_NEWTON_ITERATIONS: usize = 32;

/// Find the isolated zeros of the constraint system on the hyperplane
/// `axis = value`, returned as full-dimensional points on that hyperplane.
///
/// Restricting the D constraints of a (D+1)-dimensional system to the
/// hyperplane yields a square system with isolated roots; those are located
/// by exclusion-based subdivision followed by a Newton polish.
pub fn solve_on_hyperplane<T, C>(
    constraints: &[C],
    axis: usize,
    value: T,
    ctx: &mut SolveContext<T>,
) -> anyhow::Result<Vec<TracePoint<T>>>
where
    T: FloatingPoint,
    C: ImplicitConstraint<T>,
{
    let restricted: Vec<C> = constraints
        .iter()
        .map(|c| c.try_restrict(axis, value))
        .try_collect()?;

    let mut roots: Vec<DVector<T>> = Vec::new();
    collect_roots(&restricted, 0, ctx, &mut roots)?;
    trace!(
        "hyperplane axis {} = {:?}: {} root(s)",
        axis,
        value.to_f64(),
        roots.len()
    );

    Ok(roots
        .into_iter()
        .map(|root| {
            let coords = DVector::from_fn(root.len() + 1, |i, _| {
                if i < axis {
                    root[i]
                } else if i == axis {
                    value
                } else {
                    root[i - 1]
                }
            });
            TracePoint::new(coords)
        })
        .collect())
}

fn collect_roots<T, C>(
    constraints: &[C],
    depth: usize,
    ctx: &mut SolveContext<T>,
    roots: &mut Vec<DVector<T>>,
) -> anyhow::Result<()>
where
    T: FloatingPoint,
    C: ImplicitConstraint<T>,
{
    let numeric_tolerance = ctx.options().numeric_tolerance;
    let subdivision_tolerance = ctx.options().subdivision_tolerance;
    if constraints
        .iter()
        .any(|c| c.has_constant_sign(numeric_tolerance))
    {
        return Ok(());
    }

    let domain = constraints[0].domain();
    if domain.max_side() <= subdivision_tolerance || depth >= ctx.options().max_depth {
        if let Some(root) = polish_root(constraints, &domain, ctx) {
            // adjacent boxes polish one root to the same point up to Newton
            // accuracy; keep the fuse radius well below the box size so
            // crossings the subdivision itself separated stay distinct
            let merge = subdivision_tolerance * T::from_f64(0.1).unwrap();
            if roots.iter().all(|r| (r - &root).norm() > merge) {
                roots.push(root);
            }
        }
        return Ok(());
    }

    let axis = domain.longest_axis();
    let t = ctx.split_value(&domain, axis, depth);
    let halves: Vec<(C, C)> = constraints
        .iter()
        .map(|c| c.try_subdivide(axis, t))
        .try_collect()?;
    let (left, right): (Vec<C>, Vec<C>) = halves.into_iter().unzip();
    collect_roots(&left, depth + 1, ctx, roots)?;
    collect_roots(&right, depth + 1, ctx, roots)
}

/// Newton refinement from the box center; `None` when the iteration stalls,
/// hits a singular jacobian, or wanders far from the box.
fn polish_root<T, C>(
    constraints: &[C],
    domain: &DomainBox<T>,
    ctx: &SolveContext<T>,
) -> Option<DVector<T>>
where
    T: FloatingPoint,
    C: ImplicitConstraint<T>,
{
    let numeric_tolerance = ctx.options().numeric_tolerance;
    let subdivision_tolerance = ctx.options().subdivision_tolerance;
    let center = domain.center();
    let dimension = center.len();
    let mut point = center.clone();

    for _ in 0..MAX_NEWTON_ITERATIONS {
        let residuals = DVector::from_fn(constraints.len(), |i, _| constraints[i].eval(&point));
        let worst = residuals.iter().fold(T::zero(), |m, r| m.max(r.abs()));
        if worst < numeric_tolerance {
            if domain.contains(&point, subdivision_tolerance) {
                return Some(domain.clamp_point(&point));
            }
            return None;
        }

        let gradients = constraints.iter().map(|c| c.gradient(&point)).collect_vec();
        let jacobian = DMatrix::from_fn(constraints.len(), dimension, |i, j| gradients[i][j]);
        let delta = jacobian.qr().solve(&(-residuals))?;
        point += delta;
        if (&point - &center).norm() > subdivision_tolerance * T::from_f64(4.0).unwrap() {
            return None;
        }
    }
    None
}
