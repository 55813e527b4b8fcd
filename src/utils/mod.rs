//! Various utilities functions and types

mod geometry;
mod sequence;

pub use self::geometry::{Buffer, Coordinate, Physical, Point, Rectangle, Size, Transform};
pub use self::sequence::{Sequence, WRAP_THRESHOLD};
