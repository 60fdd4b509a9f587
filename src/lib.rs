#![allow(clippy::needless_range_loop)]

mod boundary;
mod constraint;
mod domain;
mod misc;
mod polyline;
mod solve;
mod spline;
mod stitch;
mod surface;
mod topology;
mod trace;

pub mod prelude {
    pub use crate::boundary::*;
    pub use crate::constraint::*;
    pub use crate::domain::*;
    pub use crate::misc::*;
    pub use crate::polyline::*;
    pub use crate::solve::*;
    pub use crate::spline::*;
    pub use crate::stitch::*;
    pub use crate::surface::*;
    pub use crate::topology::*;
    pub use crate::trace::*;
}
