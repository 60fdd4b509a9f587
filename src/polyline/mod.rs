use nalgebra::DVector;

use crate::misc::FloatingPoint;

/// A point in parameter space traced on (or near) the zero set.
/// `midpoint` marks a point produced by collapsing a sub-tolerance box to its
/// center; such points are later compared and merged under a widened
/// tolerance.
#[derive(Clone, Debug, PartialEq)]
pub struct TracePoint<T: FloatingPoint> {
    coords: DVector<T>,
    midpoint: bool,
}

impl<T: FloatingPoint> TracePoint<T> {
    pub fn new(coords: DVector<T>) -> Self {
        Self {
            coords,
            midpoint: false,
        }
    }

    /// A stand-in point for an unresolved sub-tolerance feature.
    pub fn subdivision_midpoint(coords: DVector<T>) -> Self {
        Self {
            coords,
            midpoint: true,
        }
    }

    pub fn coords(&self) -> &DVector<T> {
        &self.coords
    }

    pub fn is_midpoint(&self) -> bool {
        self.midpoint
    }

    pub fn distance_to(&self, other: &Self) -> T {
        (&self.coords - &other.coords).norm()
    }
}

/// An ordered point sequence approximating one connected branch of the traced
/// curve.
#[derive(Clone, Debug, PartialEq)]
pub struct Polyline<T: FloatingPoint> {
    points: Vec<TracePoint<T>>,
}

impl<T: FloatingPoint> Polyline<T> {
    pub fn new(points: Vec<TracePoint<T>>) -> Self {
        Self { points }
    }

    pub fn singleton(point: TracePoint<T>) -> Self {
        Self {
            points: vec![point],
        }
    }

    pub fn points(&self) -> &[TracePoint<T>] {
        &self.points
    }

    pub fn into_points(self) -> Vec<TracePoint<T>> {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&TracePoint<T>> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&TracePoint<T>> {
        self.points.last()
    }

    pub fn push(&mut self, point: TracePoint<T>) {
        self.points.push(point);
    }

    pub fn reverse(&mut self) {
        self.points.reverse();
    }

    /// A polyline is closed once its two ends coincide within tolerance.
    pub fn is_closed(&self, tolerance: T) -> bool {
        match (self.first(), self.last()) {
            (Some(a), Some(b)) => self.len() > 2 && a.distance_to(b) <= tolerance,
            _ => false,
        }
    }

    /// Concatenate, dropping the duplicated shared point at the junction.
    pub fn extend_dropping_first(&mut self, other: Polyline<T>) {
        self.points.extend(other.points.into_iter().skip(1));
    }

    /// Remove consecutive points closer than `tolerance`.
    pub fn dedup(&mut self, tolerance: T) {
        self.points.dedup_by(|a, b| a.distance_to(b) <= tolerance);
    }
}
