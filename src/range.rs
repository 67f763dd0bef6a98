//! Fixed-dimensionality extents ([`Range`]) and coordinates ([`Id`]).
//!
//! Both types wrap an array of `N` integers with `N` between 1 and 3; any other
//! dimensionality fails to compile once the type is used. Storage order across
//! the crate is row-major with dimension 0 as the slowest-varying axis, see [`Range::linear`].

use std::ops::{Add, Div, Index, IndexMut, Mul, Rem, Sub};

use derive_more::{Deref, Display};
use itertools::Itertools;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("dimension error: expected {expected} elements, found {found}")]
    Dimension { expected: usize, found: usize },
    #[error("index error: dimension {index} is out of bounds for {dims} dimensions")]
    OutOfBounds { index: usize, dims: usize },
    #[error("range error: element {index} is negative ({value})")]
    Negative { index: usize, value: isize },
}

struct Dims<const N: usize>;

impl<const N: usize> Dims<N> {
    const VALID: () = assert!(N >= 1 && N <= 3, "dimensions are between 1 and 3");
}

/// An `N`-dimensional extent. Used as the size of index spaces and buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deref, Display)]
#[display("[{}]", _0.iter().format(", "))]
pub struct Range<const N: usize>([usize; N]);

/// An `N`-dimensional coordinate. Signed, so that offsets and deltas can be negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deref, Display)]
#[display("[{}]", _0.iter().format(", "))]
pub struct Id<const N: usize>([isize; N]);

macro_rules! impl_index_vec {
    ($name:ident, $elem:ty) => {
        impl<const N: usize> $name<N> {
            /// Number of dimensions.
            pub const DIMENSIONS: usize = N;

            #[inline]
            pub const fn new(value: [$elem; N]) -> Self {
                let () = Dims::<N>::VALID;
                Self(value)
            }

            /// Creates a value from a runtime sequence.
            ///
            /// # Panics
            /// Panics if the length of `value` is not `N`.
            #[inline]
            pub fn from_slice(value: &[$elem]) -> Self {
                match Self::try_from(value) {
                    Ok(value) => value,
                    Err(err) => panic!("{err}"),
                }
            }

            #[inline]
            pub const fn to_array(self) -> [$elem; N] {
                self.0
            }

            /// Returns the element of dimension `index`.
            ///
            /// # Panics
            /// Panics if `index` is not smaller than `N`.
            #[inline]
            pub fn get(&self, index: usize) -> $elem {
                self[index]
            }

            #[inline]
            pub fn try_get(&self, index: usize) -> Result<$elem, IndexError> {
                self.0
                    .get(index)
                    .copied()
                    .ok_or(IndexError::OutOfBounds { index, dims: N })
            }
        }

        impl<const N: usize> Default for $name<N> {
            #[inline]
            fn default() -> Self {
                Self::new([0; N])
            }
        }

        impl<const N: usize> From<[$elem; N]> for $name<N> {
            #[inline]
            fn from(value: [$elem; N]) -> Self {
                Self::new(value)
            }
        }

        impl<const N: usize> From<$name<N>> for [$elem; N] {
            #[inline]
            fn from(value: $name<N>) -> Self {
                value.0
            }
        }

        impl<const N: usize> TryFrom<&[$elem]> for $name<N> {
            type Error = IndexError;

            #[inline]
            fn try_from(value: &[$elem]) -> Result<Self, Self::Error> {
                let array = <[$elem; N]>::try_from(value).map_err(|_| IndexError::Dimension {
                    expected: N,
                    found: value.len(),
                })?;
                Ok(Self::new(array))
            }
        }

        impl<const N: usize> TryFrom<Vec<$elem>> for $name<N> {
            type Error = IndexError;

            #[inline]
            fn try_from(value: Vec<$elem>) -> Result<Self, Self::Error> {
                Self::try_from(value.as_slice())
            }
        }

        impl<const N: usize> Index<usize> for $name<N> {
            type Output = $elem;

            #[inline]
            fn index(&self, index: usize) -> &Self::Output {
                assert!(index < N, "dimension {index} is out of bounds for {N} dimensions");
                &self.0[index]
            }
        }

        impl<const N: usize> IndexMut<usize> for $name<N> {
            #[inline]
            fn index_mut(&mut self, index: usize) -> &mut Self::Output {
                assert!(index < N, "dimension {index} is out of bounds for {N} dimensions");
                &mut self.0[index]
            }
        }

        impl From<$elem> for $name<1> {
            #[inline]
            fn from(x: $elem) -> Self {
                Self::new([x])
            }
        }

        impl_index_vec!(@tuple $name, 2, (x: $elem, y: $elem));
        impl_index_vec!(@tuple $name, 3, (x: $elem, y: $elem, z: $elem));
    };
    (@tuple $name:ident, $n:literal, ($($x:ident: $t:ty),+)) => {
        impl From<($($t),+)> for $name<$n> {
            #[inline]
            fn from(($($x),+): ($($t),+)) -> Self {
                Self::new([$($x),+])
            }
        }
    };
}

impl_index_vec!(Range, usize);
impl_index_vec!(Id, isize);

/// Applies `f` on each pair of elements.
#[inline]
fn zip_with<A: Copy, B: Copy, C, const N: usize>(
    a: [A; N],
    b: [B; N],
    f: impl Fn(A, B) -> C,
) -> [C; N] {
    std::array::from_fn(|index| f(a[index], b[index]))
}

impl<const N: usize> Range<N> {
    /// Total number of points in the index space, the product of all extents.
    #[inline]
    pub fn size(&self) -> usize {
        self.0.iter().product()
    }

    /// Returns `true` if any dimension has a zero extent.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.contains(&0)
    }

    /// Returns `true` if `id` lies in `[0, self)` on every dimension.
    #[inline]
    pub fn contains(&self, id: Id<N>) -> bool {
        self.0
            .iter()
            .zip(id.0.iter())
            .all(|(&extent, &x)| x >= 0 && (x as usize) < extent)
    }

    /// Row-major linear offset of `id`, dimension 0 varying slowest.
    /// Returns `None` if `id` is outside of the range.
    #[inline]
    pub fn linear(&self, id: Id<N>) -> Option<usize> {
        if !self.contains(id) {
            return None;
        }
        Some(
            self.0
                .iter()
                .zip(id.0.iter())
                .fold(0, |offset, (&extent, &x)| offset * extent + x as usize),
        )
    }

    /// Inverse of [`Range::linear`].
    ///
    /// # Panics
    /// Panics if `offset` is not smaller than [`Range::size`].
    #[inline]
    pub fn delinear(&self, offset: usize) -> Id<N> {
        assert!(
            offset < self.size(),
            "offset {offset} is out of bounds for range {self}"
        );
        let mut id = [0; N];
        let mut rest = offset;
        for (x, &extent) in id.iter_mut().zip(self.0.iter()).rev() {
            *x = (rest % extent) as isize;
            rest /= extent;
        }
        Id::new(id)
    }
}

impl<const N: usize> Add for Range<N> {
    type Output = Range<N>;

    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Self::new(zip_with(self.0, rhs.0, |a, b| a + b))
    }
}

impl<const N: usize> Mul for Range<N> {
    type Output = Range<N>;

    #[inline]
    fn mul(self, rhs: Self) -> Self::Output {
        Self::new(zip_with(self.0, rhs.0, |a, b| a * b))
    }
}

/// Element-wise division rounding up, the number of `rhs` tiles covering `self`.
///
/// # Panics
/// Panics if any element of `rhs` is zero.
impl<const N: usize> Div for Range<N> {
    type Output = Range<N>;

    #[inline]
    fn div(self, rhs: Self) -> Self::Output {
        assert!(
            !rhs.is_empty(),
            "division of range {self} by zero-extent range {rhs}"
        );
        Self::new(zip_with(self.0, rhs.0, usize::div_ceil))
    }
}

impl<const N: usize> From<Range<N>> for Id<N> {
    #[inline]
    fn from(value: Range<N>) -> Self {
        Self::new(value.0.map(|x| x as isize))
    }
}

impl<const N: usize> TryFrom<[isize; N]> for Range<N> {
    type Error = IndexError;

    #[inline]
    fn try_from(value: [isize; N]) -> Result<Self, Self::Error> {
        if let Some((index, &value)) = value.iter().find_position(|&&x| x < 0) {
            return Err(IndexError::Negative { index, value });
        }
        Ok(Self::new(value.map(|x| x as usize)))
    }
}

impl<const N: usize> TryFrom<Id<N>> for Range<N> {
    type Error = IndexError;

    #[inline]
    fn try_from(value: Id<N>) -> Result<Self, Self::Error> {
        Self::try_from(value.0)
    }
}

impl<const N: usize> Add for Id<N> {
    type Output = Id<N>;

    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Self::new(zip_with(self.0, rhs.0, |a, b| a + b))
    }
}

impl<const N: usize> Add<Range<N>> for Id<N> {
    type Output = Id<N>;

    #[inline]
    fn add(self, rhs: Range<N>) -> Self::Output {
        self + Id::from(rhs)
    }
}

impl<const N: usize> Sub for Id<N> {
    type Output = Id<N>;

    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(zip_with(self.0, rhs.0, |a, b| a - b))
    }
}

impl<const N: usize> Sub<Range<N>> for Id<N> {
    type Output = Id<N>;

    #[inline]
    fn sub(self, rhs: Range<N>) -> Self::Output {
        self - Id::from(rhs)
    }
}

impl<const N: usize> Mul<Range<N>> for Id<N> {
    type Output = Id<N>;

    #[inline]
    fn mul(self, rhs: Range<N>) -> Self::Output {
        Self::new(zip_with(self.0, rhs.0, |a, b| a * b as isize))
    }
}

/// Element-wise floor division, mapping a global coordinate to its tile coordinate.
///
/// # Panics
/// Panics if any element of `rhs` is zero.
impl<const N: usize> Div<Range<N>> for Id<N> {
    type Output = Id<N>;

    #[inline]
    fn div(self, rhs: Range<N>) -> Self::Output {
        assert!(
            !rhs.is_empty(),
            "division of id {self} by zero-extent range {rhs}"
        );
        Self::new(zip_with(self.0, rhs.0, |a, b| a.div_euclid(b as isize)))
    }
}

/// Element-wise euclidean remainder, mapping a global coordinate into its tile.
///
/// # Panics
/// Panics if any element of `rhs` is zero.
impl<const N: usize> Rem<Range<N>> for Id<N> {
    type Output = Id<N>;

    #[inline]
    fn rem(self, rhs: Range<N>) -> Self::Output {
        assert!(
            !rhs.is_empty(),
            "remainder of id {self} by zero-extent range {rhs}"
        );
        Self::new(zip_with(self.0, rhs.0, |a, b| a.rem_euclid(b as isize)))
    }
}

/// Creates a [`Range`] from its extents, e.g. `range![4, 2]`.
#[macro_export]
macro_rules! range {
    ($($x:expr),+ $(,)?) => {
        $crate::range::Range::new([$($x),+])
    };
}

/// Creates an [`Id`] from its coordinates, e.g. `id![1, -1]`.
#[macro_export]
macro_rules! id {
    ($($x:expr),+ $(,)?) => {
        $crate::range::Id::new([$($x),+])
    };
}

#[cfg(feature = "serde")]
mod serde_impl {
    use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};

    use super::{Id, Range};

    macro_rules! impl_serde {
        ($name:ident, $elem:ty) => {
            impl<const N: usize> Serialize for $name<N> {
                fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                    serializer.collect_seq(self.0.iter())
                }
            }

            impl<'de, const N: usize> Deserialize<'de> for $name<N> {
                fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                    let value = Vec::<$elem>::deserialize(deserializer)?;
                    Self::try_from(value).map_err(D::Error::custom)
                }
            }
        };
    }

    impl_serde!(Range, usize);
    impl_serde!(Id, isize);

    #[cfg(test)]
    mod tests {
        use std::error::Error;

        use crate::{
            nd_range::NDRange,
            range::{Id, Range},
        };

        #[test]
        fn test_serde() -> Result<(), Box<dyn Error>> {
            let r = NDRange::<2>::with_offset([8, 4], [2, 2], [1, -1]);
            let json = serde_json::to_string(&r)?;
            assert_eq!(
                json,
                r#"{"global_range":[8,4],"local_range":[2,2],"offset":[1,-1]}"#
            );
            assert_eq!(serde_json::from_str::<NDRange<2>>(&json)?, r);

            assert!(serde_json::from_str::<Range<2>>("[1,2,3]").is_err());
            assert!(serde_json::from_str::<Id<3>>("[1,2,3]").is_ok());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use itertools::Itertools;

    use super::{Id, IndexError, Range};

    #[test]
    fn test_ceil_div() {
        for _ in 0..256 {
            let a: [usize; 3] = std::array::from_fn(|_| fastrand::usize(1..100));
            let b: [usize; 3] = std::array::from_fn(|_| fastrand::usize(1..20));
            let c = Range::new(a) / Range::new(b);
            for i in 0..3 {
                let expected = (a[i] as f64 / b[i] as f64).ceil() as usize;
                assert_eq!(c[i], expected, "{a:?} / {b:?}");
            }
        }
        assert_eq!(range![4, 4] / range![2, 2], range![2, 2]);
        assert_eq!(range![5] / range![2], range![3]);
    }

    #[test]
    #[should_panic(expected = "zero-extent")]
    fn test_div_by_zero() {
        let _ = range![4, 4] / range![2, 0];
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(range![1, 2, 3] + range![3, 2, 1], range![4, 4, 4]);
        assert_eq!(range![1, 2, 3] * range![3, 2, 1], range![3, 4, 3]);
        assert_eq!(id![5, 7] / range![2, 3], id![2, 2]);
        assert_eq!(id![5, 7] % range![2, 3], id![1, 1]);
        assert_eq!(id![-1, 0] / range![2, 3], id![-1, 0]);
        assert_eq!(id![-1, 0] % range![2, 3], id![1, 0]);
        assert_eq!(id![1, 2] * range![2, 3] + id![1, 1], id![3, 7]);
        assert_eq!(id![1, 2] - id![2, 2], id![-1, 0]);
    }

    #[test]
    fn test_dimension_mismatch() {
        for len in 0..=4 {
            let values = vec![1; len];
            assert_eq!(Range::<1>::try_from(values.clone()).is_ok(), len == 1);
            assert_eq!(Range::<2>::try_from(values.clone()).is_ok(), len == 2);
            assert_eq!(Range::<3>::try_from(values).is_ok(), len == 3);
        }

        assert_eq!(Range::<2>::try_from(vec![2, 3]), Ok(range![2, 3]));
        assert_eq!(
            Id::<3>::try_from(&[1isize, 2][..]),
            Err(IndexError::Dimension {
                expected: 3,
                found: 2
            })
        );
    }

    #[test]
    #[should_panic(expected = "expected 2 elements, found 3")]
    fn test_from_slice_panics() {
        let _ = Range::<2>::from_slice(&[1, 2, 3]);
    }

    #[test]
    fn test_get() -> Result<(), Box<dyn Error>> {
        let r = range![4, 5, 6];
        assert_eq!(r.get(1), 5);
        assert_eq!(r.try_get(2)?, 6);
        assert_eq!(r.try_get(3), Err(IndexError::OutOfBounds { index: 3, dims: 3 }));

        let mut i = id![0, 0];
        i[1] = -3;
        assert_eq!(i, id![0, -3]);
        Ok(())
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_index_out_of_bounds() {
        let r = range![4, 5];
        let _ = r[2];
    }

    #[test]
    fn test_signed_conversion() {
        assert_eq!(Range::try_from(id![1, 2]), Ok(range![1, 2]));
        assert_eq!(
            Range::try_from([3isize, -2, 1]),
            Err(IndexError::Negative {
                index: 1,
                value: -2
            })
        );
        assert_eq!(Id::from(range![7]), id![7]);
    }

    #[test]
    fn test_linear() {
        let r = range![2, 3, 4];
        let ids = itertools::iproduct!(0..2, 0..3, 0..4)
            .map(|(x, y, z)| id![x, y, z])
            .collect_vec();
        for (offset, &id) in ids.iter().enumerate() {
            assert_eq!(r.linear(id), Some(offset));
            assert_eq!(r.delinear(offset), id);
        }
        assert_eq!(r.linear(id![2, 0, 0]), None);
        assert_eq!(r.linear(id![0, -1, 0]), None);
        assert_eq!(r.size(), 24);
        assert!(range![3, 0].is_empty());
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Range::<1>::from(5), range![5]);
        assert_eq!(Range::<2>::from((2, 3)), range![2, 3]);
        assert_eq!(Id::<3>::from((1, -2, 3)), id![1, -2, 3]);
        assert_eq!(<[usize; 2]>::from(range![6, 7]), [6, 7]);
        assert_eq!(range![1, 2, 3].to_string(), "[1, 2, 3]");
        assert_eq!(Id::<2>::default(), id![0, 0]);
    }
}
