//! Read-only dataset views and clustering parameters

use std::fmt::Debug;
use std::ops::{Add, Mul, Sub};

use bytemuck::Pod;
use serde::Serialize;

use crate::error::{MlError, MlResult};

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Floating-point element types accepted by the clustering primitives
///
/// Implemented for `f32` and `f64` only.
pub trait DataType:
    Pod
    + Debug
    + Send
    + Sync
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + sealed::Sealed
    + 'static
{
    /// Type name used in logs and reports
    const NAME: &'static str;

    fn zero() -> Self;

    fn from_f64(value: f64) -> Self;
}

impl DataType for f32 {
    const NAME: &'static str = "f32";

    fn zero() -> Self {
        0.0
    }

    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl DataType for f64 {
    const NAME: &'static str = "f64";

    fn zero() -> Self {
        0.0
    }

    fn from_f64(value: f64) -> Self {
        value
    }
}

/// Squared Euclidean distance between two rows
#[inline]
pub fn squared_euclidean<T: DataType>(a: &[T], b: &[T]) -> T {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).fold(T::zero(), |acc, (&x, &y)| {
        let d = x - y;
        acc + d * d
    })
}

/// Shape of a dataset, used to pick sub-algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DatasetShape {
    pub n_rows: usize,
    pub n_cols: usize,
    pub element_bytes: usize,
}

/// Row-major matrix of `n_rows` points with `n_cols` features
#[derive(Debug, Clone, Copy)]
pub struct DatasetView<'a, T: DataType> {
    data: &'a [T],
    n_rows: usize,
    n_cols: usize,
}

impl<'a, T: DataType> DatasetView<'a, T> {
    /// Wrap `data`, checking it holds exactly `n_rows * n_cols` elements
    pub fn new(data: &'a [T], n_rows: usize, n_cols: usize) -> MlResult<Self> {
        let expected = n_rows.checked_mul(n_cols).ok_or_else(|| {
            MlError::InvalidInput(format!("{} x {} overflows usize", n_rows, n_cols))
        })?;
        if data.len() != expected {
            return Err(MlError::InvalidInput(format!(
                "input has {} elements, expected {} x {} = {}",
                data.len(),
                n_rows,
                n_cols,
                expected
            )));
        }
        Ok(Self {
            data,
            n_rows,
            n_cols,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn data(&self) -> &'a [T] {
        self.data
    }

    /// Row `i`
    ///
    /// # Panics
    ///
    /// If `i >= n_rows`.
    #[inline]
    pub fn row(&self, i: usize) -> &'a [T] {
        &self.data[i * self.n_cols..(i + 1) * self.n_cols]
    }

    pub fn shape(&self) -> DatasetShape {
        DatasetShape {
            n_rows: self.n_rows,
            n_cols: self.n_cols,
            element_bytes: std::mem::size_of::<T>(),
        }
    }
}

/// Density thresholds for DBSCAN
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DensityParams<T: DataType> {
    /// Neighbourhood radius
    pub eps: T,
    /// Minimum neighbourhood size (the point itself included) of a core point
    pub min_pts: usize,
}

impl<T: DataType> DensityParams<T> {
    pub fn new(eps: T, min_pts: usize) -> Self {
        Self { eps, min_pts }
    }

    /// Squared radius; rows are neighbours iff their squared distance is at most this
    pub fn eps_squared(&self) -> T {
        self.eps * self.eps
    }
}
