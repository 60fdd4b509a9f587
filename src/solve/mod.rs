use itertools::Itertools;
use log::debug;
use nalgebra::DVector;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    boundary::solve_on_hyperplane,
    constraint::ImplicitConstraint,
    domain::DomainBox,
    misc::FloatingPoint,
    polyline::{Polyline, TracePoint},
    stitch::stitch_across,
    topology::loop_free,
    trace::trace_curve,
};

/// Default relative offset applied to subdivision split planes, keeping them
/// away from axis-aligned features of the zero set.
pub const SPLIT_PERTURBATION: f64 = 1.3e-2;

/// Tuning knobs for the curve solver.
#[derive(Clone, Debug)]
pub struct SolverOptions<T: FloatingPoint> {
    /// Target spacing between consecutive traced points.
    pub step: T,
    /// Boxes smaller than this stop subdividing and collapse to their center.
    pub subdivision_tolerance: T,
    /// Residual threshold for root polishing and curve correction.
    pub numeric_tolerance: T,
    /// Merge collapsed-box endpoints under a widened tolerance when stitching.
    pub relaxed_midpoint_merge: bool,
    /// Seed for randomized probe directions; `None` uses coordinate axes.
    pub seed: Option<u64>,
    /// Hard cap on subdivision recursion depth.
    pub max_depth: usize,
    /// Relative split plane offset, see [`SPLIT_PERTURBATION`].
    pub split_perturbation: T,
    /// Hard cap on predictor-corrector steps per traced arc.
    pub max_trace_steps: usize,
}

impl<T: FloatingPoint> Default for SolverOptions<T> {
    fn default() -> Self {
        Self {
            step: T::from_f64(0.1).unwrap(),
            subdivision_tolerance: T::from_f64(1e-2).unwrap(),
            numeric_tolerance: T::from_f64(1e-8).unwrap(),
            relaxed_midpoint_merge: true,
            seed: None,
            max_depth: 48,
            split_perturbation: T::from_f64(SPLIT_PERTURBATION).unwrap(),
            max_trace_steps: 4096,
        }
    }
}

/// Per-solve state: the options plus the probe direction source.
pub struct SolveContext<T: FloatingPoint> {
    options: SolverOptions<T>,
    rng: Option<StdRng>,
}

impl<T: FloatingPoint> SolveContext<T> {
    pub fn new(options: SolverOptions<T>) -> Self {
        let rng = options.seed.map(StdRng::seed_from_u64);
        Self { options, rng }
    }

    pub fn options(&self) -> &SolverOptions<T> {
        &self.options
    }

    /// A direction to try when completing a vector set to a full basis.
    /// Seeded solves draw random directions; unseeded solves cycle through
    /// the coordinate axes, which is deterministic and almost always
    /// sufficient.
    pub fn probe(&mut self, dimension: usize, attempt: usize) -> DVector<T> {
        match &mut self.rng {
            Some(rng) => DVector::from_fn(dimension, |_, _| {
                T::from_f64(rng.random_range(-1.0..1.0)).unwrap()
            }),
            None => {
                let mut e = DVector::zeros(dimension);
                e[attempt % dimension] = T::one();
                e
            }
        }
    }

    /// Where to place the splitting hyperplane on `axis`: near the middle,
    /// nudged by a depth-dependent offset so that repeated splits never pile
    /// up on the same parameter and axis-aligned curve features are missed
    /// with probability zero in practice.
    pub fn split_value(&self, domain: &DomainBox<T>, axis: usize, depth: usize) -> T {
        let (min, max) = domain.axis_interval(axis);
        let length = max - min;
        let mid = (min + max) * T::from_f64(0.5).unwrap();
        let sign = if (depth + axis) % 2 == 0 {
            T::one()
        } else {
            -T::one()
        };
        let scale = T::from_usize(1 + depth % 3).unwrap();
        mid + length * self.options.split_perturbation * scale * sign
    }
}

/// Extracts the one-dimensional zero set of `D - 1` scalar constraints over a
/// shared `D`-dimensional parameter box as polylines.
pub struct Solver<T: FloatingPoint, C: ImplicitConstraint<T>> {
    constraints: Vec<C>,
    phantom: std::marker::PhantomData<T>,
}

impl<T, C> Solver<T, C>
where
    T: FloatingPoint,
    C: ImplicitConstraint<T> + Clone,
{
    /// The system must be square-minus-one: `D - 1` constraints over a common
    /// `D`-dimensional domain, `D >= 2`.
    pub fn try_new(constraints: Vec<C>) -> anyhow::Result<Self> {
        anyhow::ensure!(!constraints.is_empty(), "no constraints given");
        let domain = constraints[0].domain();
        let dimension = domain.dim();
        anyhow::ensure!(
            dimension >= 2,
            "the parameter domain must be at least two-dimensional"
        );
        anyhow::ensure!(
            constraints.len() == dimension - 1,
            "expected {} constraints for a {}-dimensional domain, got {}",
            dimension - 1,
            dimension,
            constraints.len()
        );
        let tolerance = T::default_epsilon().sqrt();
        for c in &constraints[1..] {
            anyhow::ensure!(
                c.domain().approx_eq(&domain, tolerance),
                "constraints are defined over different domains"
            );
        }
        Ok(Self {
            constraints,
            phantom: std::marker::PhantomData,
        })
    }

    pub fn solve(&self, options: SolverOptions<T>) -> anyhow::Result<Vec<Polyline<T>>> {
        anyhow::ensure!(options.step > T::zero(), "step must be positive");
        anyhow::ensure!(
            options.subdivision_tolerance > T::zero()
                && options.numeric_tolerance > T::zero(),
            "tolerances must be positive"
        );
        anyhow::ensure!(
            options.numeric_tolerance < options.subdivision_tolerance,
            "the numeric tolerance must be tighter than the subdivision tolerance"
        );
        anyhow::ensure!(
            options.split_perturbation.abs() < T::from_f64(0.1).unwrap(),
            "the split perturbation must stay near the box middle"
        );

        let mut ctx = SolveContext::new(options);
        let polylines = solve_region(self.constraints.clone(), &mut ctx)?;
        Ok(polylines.into_iter().filter(|p| !p.is_empty()).collect())
    }
}

/// Split away every parameter location where some constraint is less than C1,
/// then run the subdivision solver on each smooth piece.
fn solve_region<T, C>(
    constraints: Vec<C>,
    ctx: &mut SolveContext<T>,
) -> anyhow::Result<Vec<Polyline<T>>>
where
    T: FloatingPoint,
    C: ImplicitConstraint<T> + Clone,
{
    if let Some((axis, t)) = constraints.iter().find_map(|c| c.c1_discontinuity()) {
        debug!("splitting at a C1 discontinuity, axis {} at {:?}", axis, t.to_f64());
        let halves: Vec<(C, C)> = constraints
            .iter()
            .map(|c| c.try_subdivide(axis, t))
            .try_collect()?;
        let (left, right): (Vec<C>, Vec<C>) = halves.into_iter().unzip();
        let left_polylines = solve_region(left, ctx)?;
        let right_polylines = solve_region(right, ctx)?;
        return Ok(stitch_across(
            left_polylines,
            right_polylines,
            axis,
            t,
            ctx.options(),
        ));
    }

    let domain = constraints[0].domain();
    let merge = ctx.options().numeric_tolerance * T::from_f64(10.0).unwrap();
    let mut boundary: Vec<TracePoint<T>> = Vec::new();
    for axis in 0..domain.dim() {
        let (min, max) = domain.axis_interval(axis);
        for value in [min, max] {
            for point in solve_on_hyperplane(&constraints, axis, value, ctx)? {
                // a crossing in a box corner shows up on two faces
                if boundary.iter().all(|p| p.distance_to(&point) > merge) {
                    boundary.push(point);
                }
            }
        }
    }
    debug!(
        "smooth region with {} boundary crossing(s)",
        boundary.len()
    );
    solve_box(constraints, boundary, 0, ctx)
}

/// Recursive subdivision: exclude, collapse, trace, or split.
fn solve_box<T, C>(
    constraints: Vec<C>,
    boundary: Vec<TracePoint<T>>,
    depth: usize,
    ctx: &mut SolveContext<T>,
) -> anyhow::Result<Vec<Polyline<T>>>
where
    T: FloatingPoint,
    C: ImplicitConstraint<T> + Clone,
{
    let numeric_tolerance = ctx.options().numeric_tolerance;
    if constraints
        .iter()
        .any(|c| c.has_constant_sign(numeric_tolerance))
    {
        return Ok(vec![]);
    }

    let domain = constraints[0].domain();
    if domain.max_side() <= ctx.options().subdivision_tolerance
        || depth >= ctx.options().max_depth
    {
        // unresolved sub-tolerance feature; stand in with the center
        return Ok(vec![Polyline::singleton(TracePoint::subdivision_midpoint(
            domain.center(),
        ))]);
    }

    if boundary.len() <= 2 && loop_free(&constraints, ctx) {
        return Ok(match boundary.len() {
            0 => vec![],
            1 => vec![Polyline::singleton(boundary.into_iter().next().unwrap())],
            _ => {
                let polyline =
                    trace_curve(&constraints, &domain, &boundary[0], &boundary[1], ctx);
                vec![polyline]
            }
        });
    }

    let axis = domain.longest_axis();
    let t = ctx.split_value(&domain, axis, depth);
    debug!(
        "depth {}: splitting axis {} at {:?} with {} boundary point(s)",
        depth,
        axis,
        t.to_f64(),
        boundary.len()
    );
    let halves: Vec<(C, C)> = constraints
        .iter()
        .map(|c| c.try_subdivide(axis, t))
        .try_collect()?;
    let (left, right): (Vec<C>, Vec<C>) = halves.into_iter().unzip();

    let internal = solve_on_hyperplane(&constraints, axis, t, ctx)?;
    let (mut left_boundary, mut right_boundary): (Vec<_>, Vec<_>) = boundary
        .into_iter()
        .partition(|p| p.coords()[axis] <= t);
    left_boundary.extend(internal.iter().cloned());
    right_boundary.extend(internal);

    let left_polylines = solve_box(left, left_boundary, depth + 1, ctx)?;
    let right_polylines = solve_box(right, right_boundary, depth + 1, ctx)?;
    Ok(stitch_across(
        left_polylines,
        right_polylines,
        axis,
        t,
        ctx.options(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spline::{KnotVector, MultivariateSpline};

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

    #[test]
    fn constraint_count_must_match_the_dimension() {
        let r = Solver::try_new(vec![parabola(), parabola()]);
        assert!(r.is_err());
        assert!(Solver::try_new(Vec::<MultivariateSpline<f64>>::new()).is_err());
    }

    #[test]
    fn options_are_validated() {
        let solver = Solver::try_new(vec![parabola()]).unwrap();
        let bad = SolverOptions {
            numeric_tolerance: 1.0,
            ..SolverOptions::default()
        };
        assert!(solver.solve(bad).is_err());
    }

    #[test]
    fn split_values_stay_inside_and_vary_with_depth() {
        let ctx = SolveContext::new(SolverOptions::<f64>::default());
        let domain = parabola().domain();
        let mut seen = Vec::new();
        for depth in 0..6 {
            let t = ctx.split_value(&domain, 0, depth);
            assert!(t > 0.4 && t < 0.6);
            seen.push(t);
        }
        assert!(seen.iter().any(|t| *t != seen[0]));
    }

    #[test]
    fn unseeded_probes_cycle_the_axes() {
        let mut ctx = SolveContext::new(SolverOptions::<f64>::default());
        let e0 = ctx.probe(3, 0);
        let e1 = ctx.probe(3, 1);
        assert_eq!(e0[0], 1.0);
        assert_eq!(e1[1], 1.0);
        assert_eq!(ctx.probe(3, 3), e0);
    }
}
