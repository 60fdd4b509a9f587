pub mod knots;

pub use knots::*;

use itertools::Itertools;
use nalgebra::DVector;

use crate::{
    constraint::{ImplicitConstraint, NormalCone},
    domain::DomainBox,
    misc::FloatingPoint,
};

/// A scalar tensor-product B-spline function of N parameters.
///
/// Coefficients are stored flattened in row-major order: axis 0 varies
/// slowest, the last axis fastest. Knot vectors are clamped per axis.
#[derive(Clone, Debug)]
pub struct MultivariateSpline<T: FloatingPoint> {
    degrees: Vec<usize>,
    knots: Vec<KnotVector<T>>,
    lengths: Vec<usize>,
    coefficients: Vec<T>,
}

impl<T: FloatingPoint> MultivariateSpline<T> {
    pub fn try_new(
        degrees: Vec<usize>,
        knots: Vec<KnotVector<T>>,
        coefficients: Vec<T>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(!degrees.is_empty(), "spline needs at least one parameter");
        anyhow::ensure!(
            degrees.len() == knots.len(),
            "got {} degrees but {} knot vectors",
            degrees.len(),
            knots.len()
        );
        let mut lengths = Vec::with_capacity(degrees.len());
        for (axis, (degree, kv)) in degrees.iter().zip(knots.iter()).enumerate() {
            anyhow::ensure!(
                kv.is_non_decreasing(),
                "knot vector on axis {} is not non-decreasing",
                axis
            );
            anyhow::ensure!(
                kv.is_clamped(*degree),
                "knot vector on axis {} is not clamped for degree {}",
                axis,
                degree
            );
            anyhow::ensure!(
                kv.len() > 2 * degree + 1,
                "knot vector on axis {} is too short",
                axis
            );
            lengths.push(kv.len() - degree - 1);
        }
        let expected: usize = lengths.iter().product();
        anyhow::ensure!(
            expected == coefficients.len(),
            "expected {} coefficients, got {}",
            expected,
            coefficients.len()
        );
        Ok(Self {
            degrees,
            knots,
            lengths,
            coefficients,
        })
    }

    pub fn dim(&self) -> usize {
        self.degrees.len()
    }

    pub fn degrees(&self) -> &[usize] {
        &self.degrees
    }

    pub fn knots(&self) -> &[KnotVector<T>] {
        &self.knots
    }

    pub fn coefficients(&self) -> &[T] {
        &self.coefficients
    }

    fn knot_epsilon() -> T {
        T::default_epsilon().sqrt()
    }

    /// Tensor layout around one axis: (outer block count, axis length, inner
    /// block size).
    fn axis_layout(&self, axis: usize) -> (usize, usize, usize) {
        let outer = self.lengths[..axis].iter().product();
        let inner = self.lengths[axis + 1..].iter().product();
        (outer, self.lengths[axis], inner)
    }

    fn strides(&self) -> Vec<usize> {
        let dim = self.dim();
        let mut strides = vec![1; dim];
        for a in (0..dim.saturating_sub(1)).rev() {
            strides[a] = strides[a + 1] * self.lengths[a + 1];
        }
        strides
    }

    fn spans_and_weights(&self, point: &DVector<T>) -> (Vec<usize>, Vec<Vec<T>>) {
        let mut spans = Vec::with_capacity(self.dim());
        let mut weights = Vec::with_capacity(self.dim());
        for a in 0..self.dim() {
            let degree = self.degrees[a];
            let (min, max) = self.knots[a].domain(degree);
            let u = point[a].clamp(min, max);
            let span = self.knots[a].find_span(self.lengths[a] - 1, degree, u);
            weights.push(self.knots[a].basis_functions(span, u, degree));
            spans.push(span);
        }
        (spans, weights)
    }

    /// Contract the coefficient tensor with one weight vector per axis over
    /// the local support at `spans`.
    fn contract(&self, spans: &[usize], weights: &[&[T]]) -> T {
        let dim = self.dim();
        let strides = self.strides();
        let mut index = vec![0usize; dim];
        let mut sum = T::zero();
        'outer: loop {
            let mut w = T::one();
            let mut offset = 0usize;
            for a in 0..dim {
                w *= weights[a][index[a]];
                offset += (spans[a] - self.degrees[a] + index[a]) * strides[a];
            }
            sum += w * self.coefficients[offset];

            let mut a = dim;
            while a > 0 {
                a -= 1;
                index[a] += 1;
                if index[a] <= self.degrees[a] {
                    continue 'outer;
                }
                index[a] = 0;
            }
            break;
        }
        sum
    }

    pub fn eval_at(&self, point: &DVector<T>) -> T {
        let (spans, weights) = self.spans_and_weights(point);
        let refs = weights.iter().map(|w| w.as_slice()).collect_vec();
        self.contract(&spans, &refs)
    }

    pub fn gradient_at(&self, point: &DVector<T>) -> DVector<T> {
        let (spans, weights) = self.spans_and_weights(point);
        let mut derivatives = Vec::with_capacity(self.dim());
        for a in 0..self.dim() {
            let degree = self.degrees[a];
            let (min, max) = self.knots[a].domain(degree);
            let u = point[a].clamp(min, max);
            derivatives.push(self.knots[a].basis_derivatives(spans[a], u, degree));
        }
        DVector::from_fn(self.dim(), |component, _| {
            let refs = (0..self.dim())
                .map(|a| {
                    if a == component {
                        derivatives[a].as_slice()
                    } else {
                        weights[a].as_slice()
                    }
                })
                .collect_vec();
            self.contract(&spans, &refs)
        })
    }

    /// Insert `t` once into the knot vector of `axis`, applying Boehm's rule
    /// to every coefficient strand along that axis.
    fn insert_knot(&mut self, axis: usize, t: T) {
        let p = self.degrees[axis];
        let (outer, len, inner) = self.axis_layout(axis);
        let n = len - 1;
        let span = self.knots[axis].find_span(n, p, t);
        let eps = T::default_epsilon();

        let mut alphas = Vec::with_capacity(p);
        for i in span - p + 1..=span {
            let den = self.knots[axis][i + p] - self.knots[axis][i];
            alphas.push(if den > eps {
                (t - self.knots[axis][i]) / den
            } else {
                T::zero()
            });
        }

        let old = &self.coefficients;
        let mut refined = vec![T::zero(); outer * (len + 1) * inner];
        for o in 0..outer {
            for j in 0..=len {
                for b in 0..inner {
                    let dst = (o * (len + 1) + j) * inner + b;
                    refined[dst] = if j + p <= span {
                        old[(o * len + j) * inner + b]
                    } else if j > span {
                        old[(o * len + j - 1) * inner + b]
                    } else {
                        let alpha = alphas[j - (span - p + 1)];
                        let a = old[(o * len + j) * inner + b];
                        let prev = old[(o * len + j - 1) * inner + b];
                        a * alpha + prev * (T::one() - alpha)
                    };
                }
            }
        }

        self.coefficients = refined;
        self.lengths[axis] = len + 1;
        self.knots[axis].insert(t);
    }

    /// Copy the coefficient block with axis indices in `range` along `axis`.
    fn slice_axis(&self, axis: usize, range: std::ops::Range<usize>) -> Vec<T> {
        let (outer, len, inner) = self.axis_layout(axis);
        let mut out = Vec::with_capacity(outer * range.len() * inner);
        for o in 0..outer {
            for j in range.clone() {
                let start = (o * len + j) * inner;
                out.extend_from_slice(&self.coefficients[start..start + inner]);
            }
        }
        out
    }
}

impl<T: FloatingPoint> ImplicitConstraint<T> for MultivariateSpline<T> {
    fn domain(&self) -> DomainBox<T> {
        let dim = self.dim();
        let mut min = DVector::zeros(dim);
        let mut max = DVector::zeros(dim);
        for a in 0..dim {
            let (lo, hi) = self.knots[a].domain(self.degrees[a]);
            min[a] = lo;
            max[a] = hi;
        }
        // knot vectors are validated at construction
        DomainBox::try_new(min, max).expect("invalid knot domain")
    }

    fn eval(&self, point: &DVector<T>) -> T {
        self.eval_at(point)
    }

    fn gradient(&self, point: &DVector<T>) -> DVector<T> {
        self.gradient_at(point)
    }

    fn try_subdivide(&self, axis: usize, t: T) -> anyhow::Result<(Self, Self)> {
        anyhow::ensure!(axis < self.dim(), "axis {} out of range", axis);
        let p = self.degrees[axis];
        let (min, max) = self.knots[axis].domain(p);
        let eps = Self::knot_epsilon();
        anyhow::ensure!(
            t > min + eps && t < max - eps,
            "split parameter lies outside the domain interior"
        );

        let mut refined = self.clone();
        let multiplicity = refined.knots[axis].multiplicity_at(t, eps);
        for _ in 0..(p + 1).saturating_sub(multiplicity) {
            refined.insert_knot(axis, t);
        }

        let seam = refined.knots[axis]
            .iter()
            .position(|k| (*k - t).abs() <= eps)
            .expect("inserted knot not found");
        let len = refined.lengths[axis];

        let left = Self::try_new(
            self.degrees.clone(),
            {
                let mut ks = refined.knots.clone();
                ks[axis] = refined.knots[axis].take_range(0..seam + p + 1);
                ks
            },
            refined.slice_axis(axis, 0..seam),
        )?;
        let right = Self::try_new(
            self.degrees.clone(),
            {
                let mut ks = refined.knots.clone();
                ks[axis] = refined.knots[axis].take_range(seam..refined.knots[axis].len());
                ks
            },
            refined.slice_axis(axis, seam..len),
        )?;
        Ok((left, right))
    }

    fn try_restrict(&self, axis: usize, t: T) -> anyhow::Result<Self> {
        anyhow::ensure!(axis < self.dim(), "axis {} out of range", axis);
        anyhow::ensure!(self.dim() >= 2, "cannot restrict a univariate function");
        let p = self.degrees[axis];
        let (min, max) = self.knots[axis].domain(p);
        let u = t.clamp(min, max);
        let span = self.knots[axis].find_span(self.lengths[axis] - 1, p, u);
        let basis = self.knots[axis].basis_functions(span, u, p);

        let (outer, len, inner) = self.axis_layout(axis);
        let mut coefficients = vec![T::zero(); outer * inner];
        for o in 0..outer {
            for b in 0..inner {
                let mut sum = T::zero();
                for (k, w) in basis.iter().enumerate() {
                    sum += *w * self.coefficients[(o * len + span - p + k) * inner + b];
                }
                coefficients[o * inner + b] = sum;
            }
        }

        let degrees = self
            .degrees
            .iter()
            .enumerate()
            .filter(|(a, _)| *a != axis)
            .map(|(_, d)| *d)
            .collect_vec();
        let knots = self
            .knots
            .iter()
            .enumerate()
            .filter(|(a, _)| *a != axis)
            .map(|(_, k)| k.clone())
            .collect_vec();
        Self::try_new(degrees, knots, coefficients)
    }

    fn c1_discontinuity(&self) -> Option<(usize, T)> {
        let eps = Self::knot_epsilon();
        for a in 0..self.dim() {
            let p = self.degrees[a];
            if p == 0 {
                continue;
            }
            let (min, max) = self.knots[a].domain(p);
            for (knot, multiplicity) in self.knots[a].multiplicities() {
                if knot > min + eps && knot < max - eps && multiplicity >= p {
                    return Some((a, knot));
                }
            }
        }
        None
    }

    fn normal_cone(&self) -> Option<NormalCone<T>> {
        let dim = self.dim();
        if dim >= usize::BITS as usize - 1 {
            return None;
        }
        let eps = T::from_f64(1e-12).unwrap();
        let mut lo = DVector::zeros(dim);
        let mut hi = DVector::zeros(dim);
        for a in 0..dim {
            let (l, h) = self.derivative_coefficient_range(a);
            lo[a] = l;
            hi[a] = h;
        }

        let center = (&lo + &hi) * T::from_f64(0.5).unwrap();
        let center_norm = center.norm();
        if center_norm < eps {
            return None;
        }
        let axis = center / center_norm;

        // the gradient lies in the coefficient box; the box sits inside the
        // cone iff every corner does
        let mut cos_half_angle = T::one();
        for mask in 0..(1usize << dim) {
            let corner = DVector::from_fn(dim, |a, _| {
                if mask >> a & 1 == 1 {
                    hi[a]
                } else {
                    lo[a]
                }
            });
            let norm = corner.norm();
            if norm < eps {
                return None;
            }
            let c = axis.dot(&corner) / norm;
            if c <= eps {
                // spread reaches a half space; useless for topology
                return None;
            }
            cos_half_angle = cos_half_angle.min(c);
        }
        Some(NormalCone {
            axis,
            cos_half_angle,
        })
    }

    fn has_constant_sign(&self, tolerance: T) -> bool {
        let mut min = self.coefficients[0];
        let mut max = min;
        for c in &self.coefficients[1..] {
            min = min.min(*c);
            max = max.max(*c);
        }
        min > tolerance || max < -tolerance
    }
}

impl<T: FloatingPoint> MultivariateSpline<T> {
    /// Range of the partial-derivative spline coefficients along `axis`;
    /// bounds the corresponding gradient component over the whole domain.
    fn derivative_coefficient_range(&self, axis: usize) -> (T, T) {
        let p = self.degrees[axis];
        let (outer, len, inner) = self.axis_layout(axis);
        if p == 0 || len < 2 {
            return (T::zero(), T::zero());
        }
        let eps = T::default_epsilon();
        let scale = T::from_usize(p).unwrap();
        let mut lo = T::max_value().unwrap();
        let mut hi = -lo;
        let mut any = false;
        for o in 0..outer {
            for b in 0..inner {
                for i in 0..len - 1 {
                    let den = self.knots[axis][i + p + 1] - self.knots[axis][i + 1];
                    if den <= eps {
                        continue;
                    }
                    let d = scale
                        * (self.coefficients[(o * len + i + 1) * inner + b]
                            - self.coefficients[(o * len + i) * inner + b])
                        / den;
                    lo = lo.min(d);
                    hi = hi.max(d);
                    any = true;
                }
            }
        }
        if any {
            (lo, hi)
        } else {
            (T::zero(), T::zero())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// f(x, y) = x^2 + y - 0.5 over [0,1]^2 as a Bezier patch.
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

    fn p2(x: f64, y: f64) -> DVector<f64> {
        DVector::from_vec(vec![x, y])
    }

    #[test]
    fn eval_matches_analytic() {
        let f = parabola();
        for (x, y) in [(0.0, 0.0), (0.3, 0.7), (0.5, 0.25), (1.0, 1.0)] {
            assert_relative_eq!(f.eval_at(&p2(x, y)), x * x + y - 0.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn gradient_matches_analytic() {
        let f = parabola();
        for (x, y) in [(0.1, 0.9), (0.5, 0.5), (0.8, 0.2)] {
            let g = f.gradient_at(&p2(x, y));
            assert_relative_eq!(g[0], 2.0 * x, epsilon = 1e-12);
            assert_relative_eq!(g[1], 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn subdivision_preserves_values() {
        let f = parabola();
        let (left, right) = f.try_subdivide(0, 0.37).unwrap();
        assert_eq!(left.domain().axis_interval(0), (0.0, 0.37));
        assert_eq!(right.domain().axis_interval(0), (0.37, 1.0));
        for (x, y) in [(0.1, 0.4), (0.36, 0.9)] {
            assert_relative_eq!(left.eval_at(&p2(x, y)), f.eval_at(&p2(x, y)), epsilon = 1e-12);
        }
        for (x, y) in [(0.38, 0.1), (0.9, 0.6)] {
            assert_relative_eq!(right.eval_at(&p2(x, y)), f.eval_at(&p2(x, y)), epsilon = 1e-12);
        }
    }

    #[test]
    fn restriction_fixes_one_axis() {
        let f = parabola();
        let g = f.try_restrict(0, 0.6).unwrap();
        assert_eq!(g.dim(), 1);
        for y in [0.0, 0.4, 1.0] {
            let p = DVector::from_vec(vec![y]);
            assert_relative_eq!(g.eval_at(&p), 0.36 + y - 0.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn c1_discontinuity_at_double_knot() {
        let smooth = parabola();
        assert!(smooth.c1_discontinuity().is_none());

        let kinked = MultivariateSpline::try_new(
            vec![2],
            vec![KnotVector::new(vec![0., 0., 0., 0.5, 0.5, 1., 1., 1.])],
            vec![0., 1., 2., 1., 0.],
        )
        .unwrap();
        let (axis, t) = kinked.c1_discontinuity().unwrap();
        assert_eq!(axis, 0);
        assert_relative_eq!(t, 0.5);
    }

    #[test]
    fn normal_cone_bounds_the_gradient() {
        let f = parabola();
        let cone = f.normal_cone().unwrap();
        // gradient spread of (2x, 1) over the unit square
        for (x, y) in [(0.0, 0.5), (0.5, 0.1), (1.0, 0.9)] {
            let g = f.gradient_at(&p2(x, y)).normalize();
            assert!(cone.axis.dot(&g) >= cone.cos_half_angle - 1e-12);
        }
        assert!(cone.cos_half_angle > 0.5 && cone.cos_half_angle < 1.0);
    }

    #[test]
    fn constant_sign_detection() {
        let f = parabola();
        assert!(!f.has_constant_sign(1e-12));
        let positive = MultivariateSpline::try_new(
            vec![1],
            vec![KnotVector::new(vec![0., 0., 1., 1.])],
            vec![0.5, 1.5],
        )
        .unwrap();
        assert!(positive.has_constant_sign(1e-12));
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let r = MultivariateSpline::try_new(
            vec![2],
            vec![KnotVector::new(vec![0., 0., 0., 1., 1., 1.])],
            vec![0., 1.],
        );
        assert!(r.is_err());
    }
}
