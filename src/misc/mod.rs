pub mod floating_point;
pub mod linear;

pub use floating_point::*;
pub use linear::*;
