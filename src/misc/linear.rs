use nalgebra::DVector;

use crate::misc::FloatingPoint;

/// Subtract from `v` its projections onto a set of orthonormal vectors.
pub fn project_out<T: FloatingPoint>(v: &DVector<T>, basis: &[DVector<T>]) -> DVector<T> {
    let mut residual = v.clone();
    for b in basis {
        let d = residual.dot(b);
        residual -= b * d;
    }
    residual
}

/// Orthonormalize a set of vectors by Gram-Schmidt.
/// Returns `None` if the vectors are linearly dependent, i.e. a residual's
/// length falls below `epsilon` during the process.
pub fn orthonormalize<T: FloatingPoint>(
    vectors: &[DVector<T>],
    epsilon: T,
) -> Option<Vec<DVector<T>>> {
    let mut basis: Vec<DVector<T>> = Vec::with_capacity(vectors.len());
    for v in vectors {
        let residual = project_out(v, &basis);
        let norm = residual.norm();
        if norm < epsilon {
            return None;
        }
        basis.push(residual / norm);
    }
    Some(basis)
}

/// Unit vector orthogonal to all of `vectors` (a generalized cross product of
/// n-1 vectors in n-space), completed by Gram-Schmidt against probe vectors.
/// Probes are retried until one leaves a non-degenerate residual.
pub fn orthogonal_complement<T, F>(
    vectors: &[DVector<T>],
    epsilon: T,
    mut probe: F,
) -> Option<DVector<T>>
where
    T: FloatingPoint,
    F: FnMut(usize) -> DVector<T>,
{
    let basis = orthonormalize(vectors, epsilon)?;
    let dimension = vectors.first()?.len();
    for attempt in 0..dimension + 4 {
        let residual = project_out(&probe(attempt), &basis);
        let norm = residual.norm();
        if norm > epsilon {
            return Some(residual / norm);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complement_of_two_vectors_in_three_space() {
        let vectors = vec![
            DVector::from_vec(vec![1.0, 0.0, 0.0]),
            DVector::from_vec(vec![0.0, 1.0, 0.0]),
        ];
        let c = orthogonal_complement(&vectors, 1e-10, |k| {
            let mut e = DVector::<f64>::zeros(3);
            e[k % 3] = 1.0;
            e
        })
        .unwrap();
        assert!((c[2].abs() - 1.0).abs() < 1e-12);
        assert!(c[0].abs() < 1e-12 && c[1].abs() < 1e-12);
    }

    #[test]
    fn dependent_vectors_are_rejected() {
        let vectors = vec![
            DVector::from_vec(vec![1.0, 1.0]),
            DVector::from_vec(vec![2.0, 2.0]),
        ];
        assert!(orthonormalize(&vectors, 1e-10).is_none());
    }
}
