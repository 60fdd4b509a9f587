use nalgebra::DVector;

use crate::misc::FloatingPoint;

/// An axis-aligned parameter box in D space, one `[min, max]` interval per
/// axis. Boxes are never mutated; subdivision replaces a box by two children
/// sharing one splitting hyperplane.
#[derive(Clone, Debug)]
pub struct DomainBox<T: FloatingPoint> {
    min: DVector<T>,
    max: DVector<T>,
}

impl<T: FloatingPoint> DomainBox<T> {
    pub fn try_new(min: DVector<T>, max: DVector<T>) -> anyhow::Result<Self> {
        anyhow::ensure!(min.len() == max.len(), "min and max dimensions differ");
        anyhow::ensure!(!min.is_empty(), "empty domain box");
        for i in 0..min.len() {
            anyhow::ensure!(min[i] <= max[i], "inverted interval on axis {}", i);
        }
        Ok(Self { min, max })
    }

    pub fn dim(&self) -> usize {
        self.min.len()
    }

    pub fn min(&self) -> &DVector<T> {
        &self.min
    }

    pub fn max(&self) -> &DVector<T> {
        &self.max
    }

    pub fn axis_interval(&self, axis: usize) -> (T, T) {
        (self.min[axis], self.max[axis])
    }

    pub fn size(&self) -> DVector<T> {
        &self.max - &self.min
    }

    pub fn center(&self) -> DVector<T> {
        (&self.min + &self.max) * T::from_f64(0.5).unwrap()
    }

    /// Axis with the largest side length.
    pub fn longest_axis(&self) -> usize {
        let size = self.size();
        let mut axis = 0;
        for i in 1..size.len() {
            if size[i] > size[axis] {
                axis = i;
            }
        }
        axis
    }

    /// Largest side length.
    pub fn max_side(&self) -> T {
        let size = self.size();
        let mut side = size[0];
        for i in 1..size.len() {
            side = side.max(size[i]);
        }
        side
    }

    pub fn contains(&self, point: &DVector<T>, margin: T) -> bool {
        (0..self.dim())
            .all(|i| self.min[i] - margin <= point[i] && point[i] <= self.max[i] + margin)
    }

    pub fn clamp_point(&self, point: &DVector<T>) -> DVector<T> {
        DVector::from_fn(self.dim(), |i, _| point[i].clamp(self.min[i], self.max[i]))
    }

    /// Split along one axis at parameter `t`, producing the two child boxes.
    pub fn split(&self, axis: usize, t: T) -> (Self, Self) {
        let mut left_max = self.max.clone();
        left_max[axis] = t;
        let mut right_min = self.min.clone();
        right_min[axis] = t;
        (
            Self {
                min: self.min.clone(),
                max: left_max,
            },
            Self {
                min: right_min,
                max: self.max.clone(),
            },
        )
    }

    /// Clip the segment `from -> to` against the box faces, returning the
    /// exact boundary crossing. `from` must lie inside the box.
    pub fn clip_segment(&self, from: &DVector<T>, to: &DVector<T>) -> DVector<T> {
        let eps = T::from_f64(1e-15).unwrap();
        let mut alpha = T::one();
        for i in 0..self.dim() {
            let d = to[i] - from[i];
            if d > eps {
                alpha = alpha.min((self.max[i] - from[i]) / d);
            } else if d < -eps {
                alpha = alpha.min((self.min[i] - from[i]) / d);
            }
        }
        let alpha = alpha.clamp(T::zero(), T::one());
        from + (to - from) * alpha
    }

    pub fn approx_eq(&self, other: &Self, tolerance: T) -> bool {
        self.dim() == other.dim()
            && (0..self.dim()).all(|i| {
                (self.min[i] - other.min[i]).abs() <= tolerance
                    && (self.max[i] - other.max[i]).abs() <= tolerance
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> DomainBox<f64> {
        DomainBox::try_new(DVector::zeros(2), DVector::from_element(2, 1.0)).unwrap()
    }

    #[test]
    fn split_shares_the_hyperplane() {
        let b = unit_box();
        let (l, r) = b.split(0, 0.4);
        assert_eq!(l.axis_interval(0), (0.0, 0.4));
        assert_eq!(r.axis_interval(0), (0.4, 1.0));
        assert_eq!(l.axis_interval(1), (0.0, 1.0));
    }

    #[test]
    fn longest_axis_and_max_side() {
        let b = DomainBox::try_new(
            DVector::from_vec(vec![0.0, 0.0, 0.0]),
            DVector::from_vec(vec![1.0, 3.0, 2.0]),
        )
        .unwrap();
        assert_eq!(b.longest_axis(), 1);
        assert_eq!(b.max_side(), 3.0);
    }

    #[test]
    fn clip_segment_hits_the_face() {
        let b = unit_box();
        let from = DVector::from_vec(vec![0.5, 0.5]);
        let to = DVector::from_vec(vec![1.5, 0.5]);
        let hit = b.clip_segment(&from, &to);
        assert!((hit[0] - 1.0).abs() < 1e-12);
        assert!((hit[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn inverted_interval_is_rejected() {
        let r = DomainBox::try_new(
            DVector::from_vec(vec![1.0, 0.0]),
            DVector::from_vec(vec![0.0, 1.0]),
        );
        assert!(r.is_err());
    }
}
