use std::fmt;
use std::marker::PhantomData;
use std::ops::{Add, Sub};

/// Type-level marker for the physical coordinate space of the outputs
#[derive(Debug)]
pub struct Physical;

/// Type-level marker for the buffer coordinate space
#[derive(Debug)]
pub struct Buffer;

/// Integer type usable as a coordinate of [`Point`], [`Size`] and [`Rectangle`]
pub trait Coordinate:
    Add<Output = Self> + Sub<Output = Self> + PartialOrd + Default + Copy + fmt::Debug
{
    /// Zero in this type
    const ZERO: Self;
    /// Addition clamped to the numeric bounds
    fn saturating_add(self, other: Self) -> Self;
    /// Subtraction clamped to the numeric bounds
    fn saturating_sub(self, other: Self) -> Self;
}

macro_rules! coordinate {
    ($($ty:ty),*) => {
        $(
            impl Coordinate for $ty {
                const ZERO: $ty = 0;

                #[inline]
                fn saturating_add(self, other: Self) -> Self {
                    <$ty>::saturating_add(self, other)
                }

                #[inline]
                fn saturating_sub(self, other: Self) -> Self {
                    <$ty>::saturating_sub(self, other)
                }
            }
        )*
    };
}

coordinate!(i32, i64);

// Derives would require the coordinate space marker to implement these traits too.
macro_rules! tagged {
    ($name:ident { $($field:ident),* }) => {
        impl<N: Copy, Kind> Clone for $name<N, Kind> {
            #[inline]
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<N: Copy, Kind> Copy for $name<N, Kind> {}

        impl<N: PartialEq, Kind> PartialEq for $name<N, Kind> {
            #[inline]
            fn eq(&self, other: &Self) -> bool {
                true $(&& self.$field == other.$field)*
            }
        }

        impl<N: Eq, Kind> Eq for $name<N, Kind> {}

        impl<N: fmt::Debug, Kind> fmt::Debug for $name<N, Kind> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    $(.field(stringify!($field), &self.$field))*
                    .finish()
            }
        }
    };
}

/// A location in the coordinate space `Kind`
pub struct Point<N, Kind> {
    /// horizontal coordinate
    pub x: N,
    /// vertical coordinate
    pub y: N,
    _kind: PhantomData<Kind>,
}

tagged!(Point { x, y });

impl<N: Default, Kind> Default for Point<N, Kind> {
    fn default() -> Self {
        (N::default(), N::default()).into()
    }
}

impl<N, Kind> From<(N, N)> for Point<N, Kind> {
    #[inline]
    fn from((x, y): (N, N)) -> Self {
        Point {
            x,
            y,
            _kind: PhantomData,
        }
    }
}

impl<N: Coordinate, Kind> Sub for Point<N, Kind> {
    type Output = Point<N, Kind>;

    #[inline]
    fn sub(self, other: Self) -> Self {
        (self.x.saturating_sub(other.x), self.y.saturating_sub(other.y)).into()
    }
}

/// Dimensions in the coordinate space `Kind`
pub struct Size<N, Kind> {
    /// width
    pub w: N,
    /// height
    pub h: N,
    _kind: PhantomData<Kind>,
}

tagged!(Size { w, h });

impl<N: Default, Kind> Default for Size<N, Kind> {
    fn default() -> Self {
        Size {
            w: N::default(),
            h: N::default(),
            _kind: PhantomData,
        }
    }
}

impl<N: Coordinate, Kind> From<(N, N)> for Size<N, Kind> {
    #[inline]
    fn from((w, h): (N, N)) -> Self {
        debug_assert!(w >= N::ZERO && h >= N::ZERO, "negative size: {:?}", (w, h));
        Size {
            w,
            h,
            _kind: PhantomData,
        }
    }
}

impl<N: Coordinate, Kind> Size<N, Kind> {
    /// Returns true if the width or height is zero
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.w == N::ZERO || self.h == N::ZERO
    }
}

/// An axis-aligned rectangle in the coordinate space `Kind`
pub struct Rectangle<N, Kind> {
    /// Top-left corner
    pub loc: Point<N, Kind>,
    /// Dimensions
    pub size: Size<N, Kind>,
}

tagged!(Rectangle { loc, size });

impl<N: Default, Kind> Default for Rectangle<N, Kind> {
    fn default() -> Self {
        Rectangle {
            loc: Point::default(),
            size: Size::default(),
        }
    }
}

impl<N: Coordinate, Kind> Rectangle<N, Kind> {
    /// Create a rectangle from its top-left corner and dimensions
    #[inline]
    pub fn new(loc: Point<N, Kind>, size: Size<N, Kind>) -> Self {
        Rectangle { loc, size }
    }

    /// Create a rectangle of the given dimensions at the origin
    #[inline]
    pub fn from_size(size: Size<N, Kind>) -> Self {
        Rectangle::new((N::ZERO, N::ZERO).into(), size)
    }

    /// Returns true if the rectangle covers no area
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size.is_empty()
    }

    /// Smallest rectangle containing every non-empty rectangle of `rects`.
    ///
    /// Empty if there is none.
    pub fn bounding_box(rects: impl IntoIterator<Item = Rectangle<N, Kind>>) -> Self {
        let mut extents: Option<(N, N, N, N)> = None;
        for rect in rects.into_iter().filter(|rect| !rect.is_empty()) {
            let (x1, y1) = (rect.loc.x, rect.loc.y);
            let (x2, y2) = (x1.saturating_add(rect.size.w), y1.saturating_add(rect.size.h));
            extents = Some(match extents {
                None => (x1, y1, x2, y2),
                Some((ax1, ay1, ax2, ay2)) => (
                    if x1 < ax1 { x1 } else { ax1 },
                    if y1 < ay1 { y1 } else { ay1 },
                    if x2 > ax2 { x2 } else { ax2 },
                    if y2 > ay2 { y2 } else { ay2 },
                ),
            });
        }

        match extents {
            Some((x1, y1, x2, y2)) => Rectangle::new((x1, y1).into(), (x2 - x1, y2 - y1).into()),
            None => Rectangle::default(),
        }
    }

    /// Express this rectangle relative to the given origin
    #[inline]
    pub fn relative_to(self, origin: impl Into<Point<N, Kind>>) -> Self {
        Rectangle::new(self.loc - origin.into(), self.size)
    }
}

/// Possible transformations of an output's scanout
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub enum Transform {
    /// Identity transformation (plane is unaltered when applied)
    #[default]
    Normal,
    /// Plane is rotated by 90 degrees
    _90,
    /// Plane is rotated by 180 degrees
    _180,
    /// Plane is rotated by 270 degrees
    _270,
    /// Plane is flipped vertically
    Flipped,
    /// Plane is flipped vertically and rotated by 90 degrees
    Flipped90,
    /// Plane is flipped vertically and rotated by 180 degrees
    Flipped180,
    /// Plane is flipped vertically and rotated by 270 degrees
    Flipped270,
}

impl Transform {
    /// Returns true if the transformation rotates contents by 90, 180 or 270 degrees.
    ///
    /// A plain mirror does not count as rotation.
    #[inline]
    pub fn is_rotated(&self) -> bool {
        !matches!(self, Transform::Normal | Transform::Flipped)
    }
}
