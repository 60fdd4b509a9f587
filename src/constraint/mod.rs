use nalgebra::DVector;

use crate::{domain::DomainBox, misc::FloatingPoint};

/// An axis and half-angle bound containing a constraint's gradient direction
/// over an entire domain box.
#[derive(Clone, Debug)]
pub struct NormalCone<T: FloatingPoint> {
    pub axis: DVector<T>,
    pub cos_half_angle: T,
}

/// A scalar implicit constraint bound to one domain box.
///
/// The curve solver consumes constraints exclusively through this interface;
/// [`crate::spline::MultivariateSpline`] is the tensor-product B-spline
/// implementation used in practice.
pub trait ImplicitConstraint<T: FloatingPoint>: Sized {
    /// Parameter box the constraint is defined over.
    fn domain(&self) -> DomainBox<T>;

    /// Evaluate the scalar constraint at a parameter point.
    fn eval(&self, point: &DVector<T>) -> T;

    /// Gradient of the constraint at a parameter point.
    fn gradient(&self, point: &DVector<T>) -> DVector<T>;

    /// Split into two constraints whose domains are the two halves of the
    /// current domain along `axis` at parameter `t`.
    fn try_subdivide(&self, axis: usize, t: T) -> anyhow::Result<(Self, Self)>;

    /// Restrict to the hyperplane `axis = t`, producing a constraint over one
    /// fewer parameter.
    fn try_restrict(&self, axis: usize, t: T) -> anyhow::Result<Self>;

    /// First parameter location, strictly inside the domain, where the
    /// representation is less than C1 continuous.
    fn c1_discontinuity(&self) -> Option<(usize, T)>;

    /// Bounding cone of the gradient direction over the whole domain, or
    /// `None` if it is undefined or too wide to be useful.
    fn normal_cone(&self) -> Option<NormalCone<T>>;

    /// True if the representation proves the constraint keeps one strict sign
    /// over the whole domain, i.e. the box contains no zero.
    fn has_constant_sign(&self, tolerance: T) -> bool;
}
