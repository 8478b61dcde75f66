//! Borrowed, strided windows over caller-owned buffers.
//!
//! A view never owns its storage. It records extents, per-axis element
//! strides and a base offset, and is validated once at construction so the
//! kernels can index without further bounds bookkeeping.

use smallvec::SmallVec;

use crate::{Result, ScanError, Shape};

type Strides = SmallVec<[usize; 4]>;

/// Checks that every addressable index of `(dims, strides, offset)` lands
/// inside a buffer of `len` elements.
fn check_layout(len: usize, dims: &[usize], strides: &[usize], offset: usize) -> Result<()> {
    if dims.len() != strides.len() {
        return Err(ScanError::InvalidShape(format!(
            "rank mismatch: {} dims but {} strides",
            dims.len(),
            strides.len()
        )));
    }
    if dims.iter().any(|&d| d == 0) {
        // Nothing is addressable; only the base has to be sane.
        if offset > len {
            return Err(ScanError::InvalidShape(format!(
                "offset {offset} past end of buffer of {len} elements"
            )));
        }
        return Ok(());
    }
    let mut last = offset;
    for (&d, &s) in dims.iter().zip(strides) {
        last = (d - 1)
            .checked_mul(s)
            .and_then(|span| last.checked_add(span))
            .ok_or_else(|| ScanError::InvalidShape("view extent overflows usize".into()))?;
    }
    if last >= len {
        return Err(ScanError::InvalidShape(format!(
            "view {dims:?} with strides {strides:?} at offset {offset} reaches element {last}, \
             buffer holds {len}"
        )));
    }
    Ok(())
}

/// True when the layout provably never aliases two indices to one element.
///
/// Axes are visited by increasing stride; each stride must clear everything
/// the smaller axes can reach. The test is conservative: some interleaved
/// layouts that never alias (dims `[3, 2]` with strides `[2, 3]`) fail it.
fn is_non_overlapping(dims: &[usize], strides: &[usize]) -> bool {
    let mut axes: SmallVec<[(usize, usize); 4]> = dims
        .iter()
        .zip(strides)
        .filter(|&(&d, _)| d > 1)
        .map(|(&d, &s)| (s, d))
        .collect();
    axes.sort_unstable();
    let mut reach = 0usize;
    for (s, d) in axes {
        if s <= reach {
            return false;
        }
        reach += (d - 1) * s;
    }
    true
}

#[inline]
fn flat_index(offset: usize, strides: &[usize], idx: &[usize]) -> usize {
    debug_assert_eq!(strides.len(), idx.len());
    idx.iter().zip(strides).fold(offset, |acc, (&i, &s)| acc + i * s)
}

/// Read-only strided window.
#[derive(Clone, Debug)]
pub struct StridedView<'a, T> {
    data: &'a [T],
    shape: Shape,
    strides: Strides,
    offset: usize,
}

impl<'a, T: Copy> StridedView<'a, T> {
    /// Densely packed row-major view over the start of `data`.
    pub fn contiguous(data: &'a [T], dims: &[usize]) -> Result<Self> {
        let shape = Shape::new(dims);
        let strides = shape.contiguous_strides();
        check_layout(data.len(), dims, &strides, 0)?;
        Ok(Self { data, shape, strides, offset: 0 })
    }

    pub fn with_strides(
        data: &'a [T],
        dims: &[usize],
        strides: &[usize],
        offset: usize,
    ) -> Result<Self> {
        check_layout(data.len(), dims, strides, offset)?;
        Ok(Self {
            data,
            shape: Shape::new(dims),
            strides: SmallVec::from_slice(strides),
            offset,
        })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Fails with `InvalidShape` naming `name` unless the extents match.
    pub fn expect_dims(&self, name: &str, expected: &[usize]) -> Result<()> {
        if self.dims() != expected {
            return Err(ScanError::shape_mismatch(name, expected, self.dims()));
        }
        Ok(())
    }

    #[inline]
    pub fn get(&self, idx: &[usize]) -> T {
        self.data[flat_index(self.offset, &self.strides, idx)]
    }

    #[inline]
    pub fn get1(&self, i: usize) -> T {
        self.data[self.offset + i * self.strides[0]]
    }

    #[inline]
    pub fn get2(&self, i: usize, j: usize) -> T {
        self.data[self.offset + i * self.strides[0] + j * self.strides[1]]
    }

    #[inline]
    pub fn get3(&self, i: usize, j: usize, k: usize) -> T {
        self.data[self.offset + i * self.strides[0] + j * self.strides[1] + k * self.strides[2]]
    }

    #[inline]
    pub fn get4(&self, i: usize, j: usize, k: usize, l: usize) -> T {
        self.data[self.offset
            + i * self.strides[0]
            + j * self.strides[1]
            + k * self.strides[2]
            + l * self.strides[3]]
    }

    /// Row-major copy of every element in the view.
    pub fn to_vec(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.shape.numel());
        if self.shape.is_empty() {
            return out;
        }
        let ndim = self.shape.ndim();
        let mut idx: SmallVec<[usize; 4]> = SmallVec::from_elem(0, ndim);
        loop {
            out.push(self.get(&idx));
            // Odometer increment over the last axis first.
            let mut axis = ndim;
            loop {
                if axis == 0 {
                    return out;
                }
                axis -= 1;
                idx[axis] += 1;
                if idx[axis] < self.shape.dims()[axis] {
                    break;
                }
                idx[axis] = 0;
            }
        }
    }
}

/// Writable strided window. Construction rejects layouts where two indices
/// may alias one element, so accumulation through the view is well defined.
/// Interleaved layouts that cannot be proven alias-free are rejected too.
pub struct StridedViewMut<'a, T> {
    data: &'a mut [T],
    shape: Shape,
    strides: Strides,
    offset: usize,
}

impl<'a, T: Copy> StridedViewMut<'a, T> {
    pub fn contiguous(data: &'a mut [T], dims: &[usize]) -> Result<Self> {
        let shape = Shape::new(dims);
        let strides = shape.contiguous_strides();
        check_layout(data.len(), dims, &strides, 0)?;
        Ok(Self { data, shape, strides, offset: 0 })
    }

    pub fn with_strides(
        data: &'a mut [T],
        dims: &[usize],
        strides: &[usize],
        offset: usize,
    ) -> Result<Self> {
        check_layout(data.len(), dims, strides, offset)?;
        if !is_non_overlapping(dims, strides) {
            return Err(ScanError::InvalidShape(format!(
                "writable view {dims:?} with strides {strides:?} aliases elements"
            )));
        }
        Ok(Self {
            data,
            shape: Shape::new(dims),
            strides: SmallVec::from_slice(strides),
            offset,
        })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn expect_dims(&self, name: &str, expected: &[usize]) -> Result<()> {
        if self.dims() != expected {
            return Err(ScanError::shape_mismatch(name, expected, self.dims()));
        }
        Ok(())
    }

    /// Reborrow as a read-only view.
    pub fn as_view(&self) -> StridedView<'_, T> {
        StridedView {
            data: &*self.data,
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            offset: self.offset,
        }
    }

    #[inline]
    fn slot(&mut self, idx: &[usize]) -> &mut T {
        &mut self.data[flat_index(self.offset, &self.strides, idx)]
    }

    #[inline]
    pub fn get(&self, idx: &[usize]) -> T {
        self.data[flat_index(self.offset, &self.strides, idx)]
    }

    #[inline]
    pub fn set(&mut self, idx: &[usize], value: T) {
        *self.slot(idx) = value;
    }

    #[inline]
    pub fn set3(&mut self, i: usize, j: usize, k: usize, value: T) {
        *self.slot(&[i, j, k]) = value;
    }

    pub fn fill(&mut self, value: T) {
        if self.shape.is_empty() {
            return;
        }
        let ndim = self.shape.ndim();
        let mut idx: SmallVec<[usize; 4]> = SmallVec::from_elem(0, ndim);
        loop {
            self.set(&idx, value);
            let mut axis = ndim;
            loop {
                if axis == 0 {
                    return;
                }
                axis -= 1;
                idx[axis] += 1;
                if idx[axis] < self.shape.dims()[axis] {
                    break;
                }
                idx[axis] = 0;
            }
        }
    }
}

impl<T: Copy + std::ops::Add<Output = T>> StridedViewMut<'_, T> {
    /// `view[idx] += value`.
    #[inline]
    pub fn add(&mut self, idx: &[usize], value: T) {
        let slot = self.slot(idx);
        *slot = *slot + value;
    }

    #[inline]
    pub fn add1(&mut self, i: usize, value: T) {
        self.add(&[i], value);
    }

    #[inline]
    pub fn add2(&mut self, i: usize, j: usize, value: T) {
        self.add(&[i, j], value);
    }

    #[inline]
    pub fn add3(&mut self, i: usize, j: usize, k: usize, value: T) {
        self.add(&[i, j, k], value);
    }

    #[inline]
    pub fn add4(&mut self, i: usize, j: usize, k: usize, l: usize, value: T) {
        self.add(&[i, j, k, l], value);
    }
}
