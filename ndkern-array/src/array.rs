//! The array container: a memory block, an element dtype and a strided layout.

use core::fmt;
use core::mem::MaybeUninit;

use itertools::Itertools;
use ndkern_core::arrmeta::{Arrmeta, MetaSlot, dims_arrmeta};
use ndkern_core::assign::{ErrorMode, assign_single};
use ndkern_core::memblock::MemoryBlock;
use ndkern_core::shape::{axis_perm_from_strides, contiguous_strides, element_count, strides_with_perm};
use ndkern_core::types::{BuiltinScalar, DType, FixedDim};
use ndkern_core::{Error, Result};

/// A strided array of runtime-typed elements.
///
/// Cloning an array shares its memory block, as views do; writes through one handle are
/// visible through every handle on the same block.
#[derive(Clone)]
pub struct NdArray {
    pub(crate) tp: DType,
    pub(crate) meta: Arrmeta,
    pub(crate) shape: Vec<usize>,
    pub(crate) strides: Vec<isize>,
    pub(crate) block: MemoryBlock,
    pub(crate) offset: isize,
}

impl NdArray {
    /// A zero-filled, row-major array of `shape` with elements of type `tp`.
    ///
    /// Fixed dimensions of `tp` are appended to `shape`: `empty(&[2], "3 * int32")` has shape
    /// `[2, 3]` and element type `int32`.
    pub fn empty(shape: &[usize], tp: DType) -> Result<Self> {
        let shape = shape.iter().copied().chain(tp.shape()).collect_vec();
        let strides = contiguous_strides(&shape, tp.dtype().data_size());
        Self::with_strides(shape, strides, tp.dtype().clone())
    }

    fn with_strides(shape: Vec<usize>, strides: Vec<isize>, tp: DType) -> Result<Self> {
        if tp.is_symbolic() {
            return Err(Error::Unsupported(format!(
                "cannot allocate elements of symbolic type {tp}"
            )));
        }
        let meta = tp.arrmeta_default()?;
        let size = element_count(&shape) * tp.data_size();
        let block = MemoryBlock::zeroed(size, tp.data_alignment())?;
        Ok(Self {
            tp,
            meta,
            shape,
            strides,
            block,
            offset: 0,
        })
    }

    /// A new array with the shape and element type of `self`, laid out with the same axis order.
    pub fn empty_like(&self) -> Result<Self> {
        let perm = axis_perm_from_strides(&[&self.strides]);
        let strides = strides_with_perm(&self.shape, &perm, self.tp.data_size());
        Self::with_strides(self.shape.clone(), strides, self.tp.clone())
    }

    /// A row-major array holding `data`.
    pub fn from_vec<T: BuiltinScalar>(shape: &[usize], data: Vec<T>) -> Result<Self> {
        if element_count(shape) != data.len() {
            return Err(Error::Shape(format!(
                "{} values cannot fill shape {shape:?}",
                data.len()
            )));
        }
        let arr = Self::empty(shape, DType::of::<T>())?;
        // SAFETY: the block is aligned for `T` and holds exactly `data.len()` elements.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), arr.data_ptr().cast::<T>(), data.len());
        }
        Ok(arr)
    }

    /// A zero-dimensional array holding `value`.
    pub fn from_scalar<T: BuiltinScalar>(value: T) -> Result<Self> {
        Self::from_vec(&[], vec![value])
    }

    /// The elements in row-major order, converted to `T` with the environment's error mode.
    pub fn to_vec<T: BuiltinScalar>(&self) -> Result<Vec<T>> {
        let mut out = Self::empty(&self.shape, DType::of::<T>())?;
        out.assign(self)?;
        let n = out.len();
        let mut values = Vec::with_capacity(n);
        // SAFETY: `out` is a row-major array of `n` initialised `T`s.
        unsafe {
            core::ptr::copy_nonoverlapping(out.data_ptr().cast::<T>(), values.as_mut_ptr(), n);
            values.set_len(n);
        }
        Ok(values)
    }

    /// The element at `index`, converted to `T` under `ErrorMode::Fractional`.
    pub fn get<T: BuiltinScalar>(&self, index: &[usize]) -> Result<T> {
        let ptr = self.element_ptr(index)?;
        let mut out = MaybeUninit::<T>::uninit();
        // SAFETY: `ptr` addresses an element of `self`, `out` has room for one `T`.
        unsafe {
            assign_single(
                &DType::of::<T>(),
                &[],
                out.as_mut_ptr().cast(),
                &self.tp,
                &self.meta,
                ptr,
                ErrorMode::Fractional,
            )?;
            Ok(out.assume_init())
        }
    }

    fn element_ptr(&self, index: &[usize]) -> Result<*const u8> {
        if index.len() != self.shape.len() || index.iter().zip(&self.shape).any(|(&i, &n)| i >= n) {
            return Err(Error::Shape(format!(
                "index {index:?} is out of bounds for shape {:?}",
                self.shape
            )));
        }
        let off: isize = index
            .iter()
            .zip(&self.strides)
            .map(|(&i, &s)| i as isize * s)
            .sum();
        Ok(self.data_ptr().wrapping_offset(off).cast_const())
    }

    /// Element type.
    pub fn tp(&self) -> &DType {
        &self.tp
    }

    /// Arrmeta of one element.
    pub fn meta(&self) -> &[MetaSlot] {
        &self.meta
    }

    /// Extent of each axis.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Byte strides, outermost axis first.
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    /// Number of axes.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        element_count(&self.shape)
    }

    /// Whether any axis has length zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The memory block holding the elements.
    pub fn block(&self) -> &MemoryBlock {
        &self.block
    }

    /// Address of the element at index zero.
    pub fn data_ptr(&self) -> *mut u8 {
        self.block.as_ptr().wrapping_offset(self.offset)
    }

    /// The whole array as one dtype, dimensions included.
    pub fn array_type(&self) -> DType {
        FixedDim::make_nd(&self.shape, self.tp.clone())
    }

    /// Arrmeta of [`NdArray::array_type`].
    pub fn array_meta(&self) -> Arrmeta {
        let mut meta = dims_arrmeta(&self.shape, &self.strides);
        meta.extend(self.meta.iter().cloned());
        meta
    }

    /// Whether the layout is row-major and gap free.
    pub fn is_contiguous(&self) -> bool {
        self.is_empty()
            || self
                .shape
                .iter()
                .zip(&self.strides)
                .zip(contiguous_strides(&self.shape, self.tp.data_size()))
                .all(|((&n, &s), c)| n <= 1 || s == c)
    }

    fn fmt_axis(&self, f: &mut fmt::Formatter<'_>, axis: usize, ptr: *const u8) -> fmt::Result {
        if axis == self.shape.len() {
            // SAFETY: `ptr` addresses an element of `self`.
            return f.write_str(&unsafe { self.tp.format_data(&self.meta, ptr) });
        }
        f.write_str("[")?;
        for i in 0..self.shape[axis] {
            if i > 0 {
                f.write_str(", ")?;
            }
            self.fmt_axis(f, axis + 1, ptr.wrapping_offset(i as isize * self.strides[axis]))?;
        }
        f.write_str("]")
    }
}

impl fmt::Debug for NdArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NdArray({}, ", self.array_type())?;
        self.fmt_axis(f, 0, self.data_ptr().cast_const())?;
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_and_access() -> anyhow::Result<()> {
        let a = NdArray::from_vec(&[2, 3], vec![1i32, 2, 3, 4, 5, 6])?;
        assert_eq!(a.strides(), &[12, 4]);
        assert_eq!(a.get::<i32>(&[1, 2])?, 6);
        assert_eq!(a.get::<f64>(&[0, 1])?, 2.0);
        assert!(a.get::<i32>(&[2, 0]).is_err());
        assert_eq!(a.to_vec::<i64>()?, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(format!("{a:?}"), "NdArray(2 * 3 * int32, [[1, 2, 3], [4, 5, 6]])");
        assert!(NdArray::from_vec(&[4], vec![1u8, 2]).is_err());
        Ok(())
    }

    #[test]
    fn dimensions_of_the_element_type_extend_the_shape() -> anyhow::Result<()> {
        let a = NdArray::empty(&[2], DType::parse("3 * float32")?)?;
        assert_eq!(a.shape(), &[2, 3]);
        assert_eq!(a.tp(), &DType::FLOAT32);
        assert!(a.is_contiguous());
        assert!(NdArray::empty(&[2], DType::parse("T")?).is_err());
        Ok(())
    }

    #[test]
    fn empty_like_keeps_axis_order() -> anyhow::Result<()> {
        let a = NdArray::from_vec(&[2, 3], vec![0u16; 6])?.permute_axes(&[1, 0])?;
        assert_eq!(a.strides(), &[2, 6]);
        let b = a.empty_like()?;
        assert_eq!(b.shape(), &[3, 2]);
        assert_eq!(b.strides(), &[2, 6]);
        assert!(!b.block().same_block(a.block()));
        Ok(())
    }

    #[test]
    fn zero_dimensional_arrays() -> anyhow::Result<()> {
        let a = NdArray::from_scalar(2.5f64)?;
        assert_eq!(a.ndim(), 0);
        assert_eq!(a.len(), 1);
        assert_eq!(a.get::<f64>(&[])?, 2.5);
        assert_eq!(format!("{a:?}"), "NdArray(float64, 2.5)");
        Ok(())
    }
}
