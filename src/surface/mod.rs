use itertools::Itertools;
use nalgebra::{Vector3, Vector4};

use crate::{misc::FloatingPoint, spline::KnotVector, spline::MultivariateSpline};

/// A rational tensor-product surface patch with homogeneous control points
/// `(w x, w y, w z, w)`. The outer control point index runs along `u`.
#[derive(Clone, Debug)]
pub struct SurfacePatch<T: FloatingPoint> {
    u_degree: usize,
    v_degree: usize,
    u_knots: KnotVector<T>,
    v_knots: KnotVector<T>,
    control_points: Vec<Vec<Vector4<T>>>,
}

impl<T: FloatingPoint> SurfacePatch<T> {
    pub fn try_new(
        u_degree: usize,
        v_degree: usize,
        u_knots: KnotVector<T>,
        v_knots: KnotVector<T>,
        control_points: Vec<Vec<Vector4<T>>>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            u_knots.is_non_decreasing() && u_knots.is_clamped(u_degree),
            "u knot vector is not a clamped non-decreasing sequence"
        );
        anyhow::ensure!(
            v_knots.is_non_decreasing() && v_knots.is_clamped(v_degree),
            "v knot vector is not a clamped non-decreasing sequence"
        );
        let nu = control_points.len();
        anyhow::ensure!(nu > 0, "empty control net");
        let nv = control_points[0].len();
        anyhow::ensure!(
            control_points.iter().all(|row| row.len() == nv),
            "control net rows have uneven lengths"
        );
        anyhow::ensure!(
            nu + u_degree + 1 == u_knots.len(),
            "expected {} control rows for the u knots, got {}",
            u_knots.len() - u_degree - 1,
            nu
        );
        anyhow::ensure!(
            nv + v_degree + 1 == v_knots.len(),
            "expected {} control columns for the v knots, got {}",
            v_knots.len() - v_degree - 1,
            nv
        );
        anyhow::ensure!(
            control_points
                .iter()
                .flatten()
                .all(|p| p.w > T::default_epsilon()),
            "control point weights must be positive"
        );
        Ok(Self {
            u_degree,
            v_degree,
            u_knots,
            v_knots,
            control_points,
        })
    }

    pub fn u_knots(&self) -> &KnotVector<T> {
        &self.u_knots
    }

    pub fn v_knots(&self) -> &KnotVector<T> {
        &self.v_knots
    }

    fn counts(&self) -> (usize, usize) {
        (self.control_points.len(), self.control_points[0].len())
    }

    /// Evaluate the dehomogenized surface point.
    pub fn point_at(&self, u: T, v: T) -> Vector3<T> {
        let (nu, nv) = self.counts();
        let (umin, umax) = self.u_knots.domain(self.u_degree);
        let (vmin, vmax) = self.v_knots.domain(self.v_degree);
        let u = u.clamp(umin, umax);
        let v = v.clamp(vmin, vmax);
        let u_span = self.u_knots.find_span(nu - 1, self.u_degree, u);
        let v_span = self.v_knots.find_span(nv - 1, self.v_degree, v);
        let u_basis = self.u_knots.basis_functions(u_span, u, self.u_degree);
        let v_basis = self.v_knots.basis_functions(v_span, v, self.v_degree);

        let mut h = Vector4::zeros();
        for (a, bu) in u_basis.iter().enumerate() {
            for (b, bv) in v_basis.iter().enumerate() {
                let p = &self.control_points[u_span - self.u_degree + a][v_span - self.v_degree + b];
                h += p * (*bu * *bv);
            }
        }
        Vector3::new(h.x / h.w, h.y / h.w, h.z / h.w)
    }
}

/// Promote the intersection of two rational patches `A(u, v)` and `B(s, t)`
/// into three scalar B-spline constraints over `(u, v, s, t)`.
///
/// With homogeneous coordinates `A = (a_x, a_y, a_z, w_a)` the equation
/// `A / w_a = B / w_b` clears denominators into the polynomial system
/// `a_k w_b - b_k w_a = 0`; products of splines in disjoint variables
/// multiply coefficient-wise, so the promotion is exact.
pub fn surface_intersection_constraints<T: FloatingPoint>(
    a: &SurfacePatch<T>,
    b: &SurfacePatch<T>,
) -> anyhow::Result<Vec<MultivariateSpline<T>>> {
    let degrees = vec![a.u_degree, a.v_degree, b.u_degree, b.v_degree];
    let knots = vec![
        a.u_knots.clone(),
        a.v_knots.clone(),
        b.u_knots.clone(),
        b.v_knots.clone(),
    ];
    let (nua, nva) = a.counts();
    let (nub, nvb) = b.counts();

    (0..3)
        .map(|component| {
            let mut coefficients = Vec::with_capacity(nua * nva * nub * nvb);
            for i in 0..nua {
                for j in 0..nva {
                    let pa = &a.control_points[i][j];
                    for l in 0..nub {
                        for m in 0..nvb {
                            let pb = &b.control_points[l][m];
                            coefficients.push(pa[component] * pb.w - pb[component] * pa.w);
                        }
                    }
                }
            }
            MultivariateSpline::try_new(degrees.clone(), knots.clone(), coefficients)
        })
        .try_collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::ImplicitConstraint;
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    fn bilinear(points: [[Vector3<f64>; 2]; 2], weights: [[f64; 2]; 2]) -> SurfacePatch<f64> {
        let control_points = (0..2)
            .map(|i| {
                (0..2)
                    .map(|j| {
                        let w = weights[i][j];
                        let p = points[i][j] * w;
                        Vector4::new(p.x, p.y, p.z, w)
                    })
                    .collect()
            })
            .collect();
        SurfacePatch::try_new(
            1,
            1,
            KnotVector::new(vec![0., 0., 1., 1.]),
            KnotVector::new(vec![0., 0., 1., 1.]),
            control_points,
        )
        .unwrap()
    }

    #[test]
    fn promoted_constraints_vanish_exactly_on_coincident_points() {
        // z = 0 plane and a tilted plane z = x - 0.5
        let a = bilinear(
            [
                [Vector3::new(0., 0., 0.), Vector3::new(0., 1., 0.)],
                [Vector3::new(1., 0., 0.), Vector3::new(1., 1., 0.)],
            ],
            [[1.0; 2]; 2],
        );
        let b = bilinear(
            [
                [Vector3::new(0., 0., -0.5), Vector3::new(0., 1., -0.5)],
                [Vector3::new(1., 0., 0.5), Vector3::new(1., 1., 0.5)],
            ],
            [[1.0; 2]; 2],
        );
        let constraints = surface_intersection_constraints(&a, &b).unwrap();
        assert_eq!(constraints.len(), 3);
        assert_eq!(constraints[0].dim(), 4);

        // A(0.5, v) == B(0.5, v) on the intersection line x = 0.5, z = 0
        for v in [0.0, 0.3, 1.0] {
            let q = DVector::from_vec(vec![0.5, v, 0.5, v]);
            for c in &constraints {
                assert_relative_eq!(c.eval(&q), 0.0, epsilon = 1e-12);
            }
        }
        // and they separate distinct points
        let off = DVector::from_vec(vec![0.1, 0.5, 0.9, 0.5]);
        assert!(constraints.iter().any(|c| c.eval(&off).abs() > 1e-3));
    }

    #[test]
    fn promotion_respects_rational_weights() {
        let a = bilinear(
            [
                [Vector3::new(0., 0., 1.), Vector3::new(0., 1., 1.)],
                [Vector3::new(1., 0., 1.), Vector3::new(1., 1., 1.)],
            ],
            [[1.0, 2.0], [0.5, 1.0]],
        );
        let b = bilinear(
            [
                [Vector3::new(0., 0., 0.), Vector3::new(0., 1., 0.)],
                [Vector3::new(1., 0., 0.), Vector3::new(1., 1., 0.)],
            ],
            [[1.0; 2]; 2],
        );
        let constraints = surface_intersection_constraints(&a, &b).unwrap();
        // at any parameter pair the constraint equals the cross-multiplied
        // homogeneous difference, which for these planes is w_a w_b (z_a - z_b)
        let q = DVector::from_vec(vec![0.25, 0.75, 0.5, 0.5]);
        let pa = a.point_at(0.25, 0.75);
        let pb = b.point_at(0.5, 0.5);
        let z = constraints[2].eval(&q);
        assert!(z.abs() > 1e-6);
        assert_eq!((pa.z - pb.z > 0.0), (z > 0.0));
    }
}
