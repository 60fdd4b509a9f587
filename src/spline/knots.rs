use std::ops::Index;

use crate::misc::FloatingPoint;

/// Clamped knot vector for one parameter axis.
#[derive(Clone, Debug, PartialEq)]
pub struct KnotVector<T> {
    knots: Vec<T>,
}

impl<T: FloatingPoint> KnotVector<T> {
    pub fn new(knots: Vec<T>) -> Self {
        Self { knots }
    }

    pub fn len(&self) -> usize {
        self.knots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.knots.is_empty()
    }

    pub fn first(&self) -> T {
        self.knots[0]
    }

    pub fn last(&self) -> T {
        self.knots[self.knots.len() - 1]
    }

    pub fn as_slice(&self) -> &[T] {
        &self.knots
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.knots.iter()
    }

    pub fn is_non_decreasing(&self) -> bool {
        self.knots.windows(2).all(|w| w[0] <= w[1])
    }

    /// Get the domain of the knot vector by degree
    pub fn domain(&self, degree: usize) -> (T, T) {
        (
            self.knots[degree],
            self.knots[self.knots.len() - 1 - degree],
        )
    }

    /// `clamped` means the first and last knots have a multiplicity greater
    /// than the degree.
    pub fn is_clamped(&self, degree: usize) -> bool {
        let n = self.knots.len();
        if n < 2 * (degree + 1) {
            return false;
        }
        let eps = T::default_epsilon();
        (0..=degree).all(|i| {
            (self.knots[i] - self.knots[0]).abs() <= eps
                && (self.knots[n - 1 - i] - self.knots[n - 1]).abs() <= eps
        })
    }

    /// Find the knot span index by binary search
    pub fn find_span(&self, n: usize, degree: usize, u: T) -> usize {
        if u > self.knots[n + 1] - T::default_epsilon() {
            return n;
        }
        if u < self.knots[degree] + T::default_epsilon() {
            return degree;
        }

        let mut low = degree;
        let mut high = n + 1;
        let mut mid = (low + high) / 2;
        while u < self.knots[mid] || self.knots[mid + 1] <= u {
            if u < self.knots[mid] {
                high = mid;
            } else {
                low = mid;
            }
            let next = (low + high) / 2;
            if mid == next {
                break;
            }
            mid = next;
        }
        mid
    }

    /// Compute the non-vanishing basis functions (NURBS book, A2.2)
    pub fn basis_functions(&self, knot_span_index: usize, u: T, degree: usize) -> Vec<T> {
        let mut basis_functions = vec![T::zero(); degree + 1];
        let mut left = vec![T::zero(); degree + 1];
        let mut right = vec![T::zero(); degree + 1];

        basis_functions[0] = T::one();

        for j in 1..=degree {
            left[j] = u - self.knots[knot_span_index + 1 - j];
            right[j] = self.knots[knot_span_index + j] - u;
            let mut saved = T::zero();

            for r in 0..j {
                let temp = basis_functions[r] / (right[r + 1] + left[j - r]);
                basis_functions[r] = saved + right[r + 1] * temp;
                saved = left[j - r] * temp;
            }

            basis_functions[j] = saved;
        }

        basis_functions
    }

    /// First derivatives of the non-vanishing basis functions, from the
    /// lower-degree basis.
    pub fn basis_derivatives(&self, knot_span_index: usize, u: T, degree: usize) -> Vec<T> {
        if degree == 0 {
            return vec![T::zero()];
        }
        let eps = T::default_epsilon();
        let lower = self.basis_functions(knot_span_index, u, degree - 1);
        let p = T::from_usize(degree).unwrap();
        let mut derivatives = vec![T::zero(); degree + 1];
        for j in 0..=degree {
            let i = knot_span_index - degree + j;
            let mut d = T::zero();
            if j >= 1 {
                let den = self.knots[i + degree] - self.knots[i];
                if den > eps {
                    d += lower[j - 1] / den;
                }
            }
            if j <= degree - 1 {
                let den = self.knots[i + degree + 1] - self.knots[i + 1];
                if den > eps {
                    d -= lower[j] / den;
                }
            }
            derivatives[j] = d * p;
        }
        derivatives
    }

    /// Distinct knots and their multiplicities, in order.
    pub fn multiplicities(&self) -> Vec<(T, usize)> {
        let eps = T::default_epsilon();
        let mut result: Vec<(T, usize)> = Vec::new();
        for knot in &self.knots {
            match result.last_mut() {
                Some((value, count)) if (*knot - *value).abs() <= eps => *count += 1,
                _ => result.push((*knot, 1)),
            }
        }
        result
    }

    /// Multiplicity of `t` within `epsilon`.
    pub fn multiplicity_at(&self, t: T, epsilon: T) -> usize {
        self.knots.iter().filter(|k| (**k - t).abs() <= epsilon).count()
    }

    /// Insert `t` once, keeping the vector sorted, and return its index.
    pub fn insert(&mut self, t: T) -> usize {
        let idx = self
            .knots
            .iter()
            .rposition(|k| *k <= t)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.knots.insert(idx, t);
        idx
    }

    pub fn take_range(&self, range: std::ops::Range<usize>) -> Self {
        Self {
            knots: self.knots[range].to_vec(),
        }
    }
}

impl<T: FloatingPoint> Index<usize> for KnotVector<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        &self.knots[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bezier_quadratic() -> KnotVector<f64> {
        KnotVector::new(vec![0., 0., 0., 1., 1., 1.])
    }

    #[test]
    fn span_search() {
        let knots = KnotVector::new(vec![0., 0., 0., 1., 2., 3., 3., 3.]);
        assert_eq!(knots.find_span(4, 2, 2.5), 4);
        assert_eq!(knots.find_span(4, 2, 0.0), 2);
        assert_eq!(knots.find_span(4, 2, 3.0), 4);
    }

    #[test]
    fn basis_partition_of_unity() {
        let knots = KnotVector::new(vec![0., 0., 0., 0.5, 1., 1., 1.]);
        for u in [0.0, 0.2, 0.5, 0.7, 1.0] {
            let span = knots.find_span(3, 2, u);
            let basis = knots.basis_functions(span, u, 2);
            let sum: f64 = basis.iter().sum();
            assert!((sum - 1.0).abs() < 1e-12, "sum {} at {}", sum, u);
        }
    }

    #[test]
    fn bernstein_derivatives_at_ends() {
        let knots = bezier_quadratic();
        let d = knots.basis_derivatives(2, 0.0, 2);
        assert!((d[0] + 2.0).abs() < 1e-12);
        assert!((d[1] - 2.0).abs() < 1e-12);
        assert!(d[2].abs() < 1e-12);
        // derivatives always sum to zero
        for u in [0.1, 0.5, 0.9] {
            let d = knots.basis_derivatives(2, u, 2);
            let sum: f64 = d.iter().sum();
            assert!(sum.abs() < 1e-12);
        }
    }

    #[test]
    fn multiplicity_scan() {
        let knots = KnotVector::new(vec![0., 0., 0., 0.5, 0.5, 1., 1., 1.]);
        let m = knots.multiplicities();
        assert_eq!(m.len(), 3);
        assert_eq!(m[1], (0.5, 2));
        assert_eq!(knots.multiplicity_at(0.5, 1e-12), 2);
    }
}
