//! Tensor API.
//!
//! Tensors are the inputs and outputs of neural networks. A tensor is an N-dimensional array with
//! a dynamic shape. The networks used here consume and produce either `f32` tensors or 8-bit
//! quantized `u8` tensors, so [`Tensor`] is generic over its [`Element`] type, and [`AnyTensor`]
//! carries either kind across the [`Engine`](super::Engine) boundary.

use std::fmt;

use itertools::zip_eq;
use tinyvec::TinyVec;

/// Element types a [`Tensor`] can store.
pub trait Element: Copy + Default + fmt::Debug + Send + Sync + 'static {
    const TYPE: ElementType;

    #[doc(hidden)]
    fn downcast(tensor: &AnyTensor) -> Option<&Tensor<Self>>;
}

impl Element for f32 {
    const TYPE: ElementType = ElementType::F32;

    fn downcast(tensor: &AnyTensor) -> Option<&Tensor<Self>> {
        match tensor {
            AnyTensor::F32(t) => Some(t),
            AnyTensor::U8(_) => None,
        }
    }
}

impl Element for u8 {
    const TYPE: ElementType = ElementType::U8;

    fn downcast(tensor: &AnyTensor) -> Option<&Tensor<Self>> {
        match tensor {
            AnyTensor::U8(t) => Some(t),
            AnyTensor::F32(_) => None,
        }
    }
}

/// The element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    F32,
    U8,
}

#[derive(Clone, PartialEq, Eq)]
struct Layout(TinyVec<[usize; 8]>);

impl Layout {
    fn from_shape(shape: &[usize]) -> Self {
        let mut vec = TinyVec::from(shape);
        vec.extend(shape.iter().map(|_| 0));

        // compute strides
        let mut stride = 1;
        for (out, size) in zip_eq(
            vec[shape.len()..].iter_mut().rev(),
            shape.iter().copied().rev(),
        ) {
            *out = stride;
            stride *= size;
        }

        Self(vec)
    }

    fn shape(&self) -> &[usize] {
        &self.0[..self.0.len() / 2]
    }

    fn elements(&self) -> usize {
        self.shape().iter().product()
    }

    fn strides(&self) -> &[usize] {
        &self.0[self.0.len() / 2..]
    }

    fn remove_prefix(&self, num: usize) -> Layout {
        assert!(num <= self.shape().len());

        let mut vec = TinyVec::with_capacity(2 * (self.shape().len() - num));
        vec.extend(self.shape()[num..].iter().copied());
        vec.extend(self.strides()[num..].iter().copied());
        Layout(vec)
    }
}

impl fmt::Debug for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.shape()).finish()
    }
}

/// A dynamically shaped tensor.
///
/// # Construction
///
/// A tensor can either be created via the provided `From` impls (from singular values and
/// 1-dimensional arrays and slices), or by calling one of the `from_*` constructor methods.
///
/// # Data Access
///
/// [`Tensor::index`] creates a [`TensorView`] that refers to a suffix of the tensor's dimensions.
/// The data in 1-dimensional tensors and views can be accessed via `as_slice`, and the value of
/// 0-dimensional ones via `as_singular`. [`Tensor::as_raw_data`] returns all elements in row-major
/// order regardless of shape.
///
/// Indexing methods panic on misuse. Code processing untrusted network outputs should check
/// [`Tensor::shape`] first.
#[derive(Clone, PartialEq)]
pub struct Tensor<T: Element = f32> {
    layout: Layout,
    data: Box<[T]>,
}

/// A borrowed view into a [`Tensor`].
#[derive(Clone)]
pub struct TensorView<'a, T: Element = f32> {
    layout: Layout,
    data: &'a [T],
}

impl<T: Element> Tensor<T> {
    /// Creates an `N`-dimensional tensor of the given shape by calling `f` for each element.
    ///
    /// This will invoke `f` with successive indices to fill, starting with `[0, ..., 0, 0]`, then
    /// `[0, ..., 0, 1]` and so on.
    pub fn from_array_shape_fn<const N: usize, F: FnMut([usize; N]) -> T>(
        shape: [usize; N],
        mut f: F,
    ) -> Self {
        let layout = Layout::from_shape(&shape);
        let mut data = Vec::with_capacity(layout.elements());
        let mut index = [0; N];
        if layout.elements() > 0 {
            loop {
                data.push(f(index));
                if !advance(&mut index, &shape) {
                    break;
                }
            }
        }
        Self {
            layout,
            data: data.into_boxed_slice(),
        }
    }

    /// Creates a tensor of the given shape from a row-major list of elements.
    ///
    /// Returns an error if the number of elements doesn't match `shape`.
    pub fn from_vec(shape: &[usize], data: Vec<T>) -> anyhow::Result<Self> {
        let layout = Layout::from_shape(shape);
        if data.len() != layout.elements() {
            anyhow::bail!(
                "{} elements can not form a tensor of shape {:?}",
                data.len(),
                shape
            );
        }
        Ok(Self {
            layout,
            data: data.into_boxed_slice(),
        })
    }

    /// Creates a tensor of the given shape by pulling elements from an iterator.
    ///
    /// # Panics
    ///
    /// `iter` must yield exactly as many elements as specified by `shape` (by multiplying all of
    /// its entries), otherwise this method will panic.
    #[track_caller]
    pub fn from_iter<I: IntoIterator<Item = T>>(shape: &[usize], iter: I) -> Self {
        let layout = Layout::from_shape(shape);
        let data: Box<_> = iter.into_iter().collect();
        assert_eq!(data.len(), layout.elements());
        Self { layout, data }
    }

    /// Returns the element type of this tensor.
    pub fn element_type(&self) -> ElementType {
        T::TYPE
    }

    /// Returns all elements of the tensor in row-major order.
    pub fn as_raw_data(&self) -> &[T] {
        &self.data
    }

    /// Returns the shape of this tensor.
    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    /// Returns the number of dimensions of this tensor.
    pub fn rank(&self) -> usize {
        self.shape().len()
    }

    /// Indexes a prefix of the tensor's dimensions with `indices`.
    ///
    /// Indexing a tensor of shape `[2, 3, 4, 5]` with `[a, b]` returns a view of shape `[4, 5]`,
    /// while indexing it with 4 indices returns a 0-dimensional view (a single value).
    ///
    /// # Panics
    ///
    /// This method will panic if `indices` has more entries than `self` has dimensions, or if any
    /// index is out of bounds.
    #[track_caller]
    pub fn index<const N: usize>(&self, indices: [usize; N]) -> TensorView<'_, T> {
        self.view().index(indices)
    }

    /// Returns a view of the whole tensor.
    pub fn view(&self) -> TensorView<'_, T> {
        TensorView {
            layout: self.layout.clone(),
            data: &self.data,
        }
    }

    /// Iterates over the outermost dimension of this tensor.
    ///
    /// # Panics
    ///
    /// `self` must have at least one dimension, otherwise this method will panic.
    #[track_caller]
    pub fn iter(&self) -> impl Iterator<Item = TensorView<'_, T>> {
        assert!(
            self.rank() > 0,
            "attempted to iterate over 0-dimensional tensor"
        );
        (0..self.shape()[0]).map(|index| self.index([index]))
    }

    /// Returns the values stored in a 1-dimensional tensor as a slice.
    ///
    /// # Panics
    ///
    /// `self` must have exactly 1 dimension, otherwise this method panics.
    #[track_caller]
    pub fn as_slice(&self) -> &[T] {
        assert_eq!(
            self.rank(),
            1,
            "attempted to access tensor of shape {:?} as slice",
            self.shape()
        );
        &self.data
    }

    /// Returns the value stored in a 0-dimensional tensor.
    ///
    /// # Panics
    ///
    /// `self` must have exactly 0 dimensions, otherwise this method will panic.
    #[track_caller]
    pub fn as_singular(&self) -> T {
        assert_eq!(
            self.rank(),
            0,
            "attempted to access tensor of shape {:?} as singular element",
            self.shape(),
        );
        self.data[0]
    }
}

/// Advances a row-major index. Returns `false` once all indices have been visited.
fn advance(index: &mut [usize], shape: &[usize]) -> bool {
    for (i, len) in zip_eq(index.iter_mut(), shape).rev() {
        if *i + 1 < *len {
            *i += 1;
            return true;
        }
        *i = 0;
    }
    false
}

impl From<f32> for Tensor {
    fn from(value: f32) -> Self {
        Tensor::from_array_shape_fn([], |[]| value)
    }
}

impl<'a, T: Element> From<&'a [T]> for Tensor<T> {
    fn from(slice: &'a [T]) -> Self {
        Tensor::from_array_shape_fn([slice.len()], |[i]| slice[i])
    }
}

impl<T: Element, const N: usize> From<[T; N]> for Tensor<T> {
    fn from(arr: [T; N]) -> Self {
        Tensor::from_array_shape_fn([N], |[i]| arr[i])
    }
}

impl<'d, T: Element> TensorView<'d, T> {
    /// Returns the shape of this tensor view.
    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    /// Returns the number of dimensions of this tensor view.
    pub fn rank(&self) -> usize {
        self.shape().len()
    }

    /// Indexes a prefix of the tensor view's dimensions with `indices`.
    ///
    /// # Panics
    ///
    /// This method will panic if `indices` has more entries than `self` has dimensions, or if any
    /// index is out of bounds.
    #[track_caller]
    pub fn index<const N: usize>(&self, indices: [usize; N]) -> TensorView<'d, T> {
        assert!(
            N <= self.rank(),
            "attempted to index tensor of shape {:?} with {:?}",
            self.shape(),
            indices
        );
        let mut data = self.data;
        for ((&length, &stride), &index) in self
            .layout
            .shape()
            .iter()
            .zip(self.layout.strides())
            .zip(&indices)
        {
            assert!(
                index < length,
                "attempted to index tensor of shape {:?} with {:?}",
                self.shape(),
                indices
            );
            data = &data[index * stride..(index + 1) * stride];
        }
        TensorView {
            layout: self.layout.remove_prefix(N),
            data,
        }
    }

    /// Iterates over the outermost dimension of this tensor view.
    ///
    /// # Panics
    ///
    /// `self` must have at least one dimension, otherwise this method will panic.
    #[track_caller]
    pub fn iter(&self) -> impl Iterator<Item = TensorView<'d, T>> + '_ {
        assert!(
            self.rank() > 0,
            "attempted to iterate over 0-dimensional tensor view"
        );
        (0..self.shape()[0]).map(|index| self.index([index]))
    }

    /// Returns the values stored in a 1-dimensional view as a slice.
    ///
    /// # Panics
    ///
    /// `self` must have exactly 1 dimension, otherwise this method panics.
    #[track_caller]
    pub fn as_slice(&self) -> &'d [T] {
        assert_eq!(
            self.rank(),
            1,
            "attempted to access tensor view of shape {:?} as slice",
            self.shape()
        );
        self.data
    }

    /// Returns the value stored in a 0-dimensional view.
    ///
    /// # Panics
    ///
    /// `self` must have exactly 0 dimensions, otherwise this method will panic.
    #[track_caller]
    pub fn as_singular(&self) -> T {
        assert_eq!(
            self.rank(),
            0,
            "attempted to access view of shape {:?} as singular element",
            self.shape(),
        );
        self.data[0]
    }
}

impl<T: Element> fmt::Debug for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("type", &T::TYPE)
            .field("shape", &self.layout)
            .finish()
    }
}

impl<T: Element> fmt::Debug for TensorView<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorView")
            .field("type", &T::TYPE)
            .field("shape", &self.layout)
            .finish()
    }
}

/// A tensor of any supported element type.
#[derive(Clone, PartialEq)]
pub enum AnyTensor {
    F32(Tensor<f32>),
    U8(Tensor<u8>),
}

impl AnyTensor {
    pub fn shape(&self) -> &[usize] {
        match self {
            AnyTensor::F32(t) => t.shape(),
            AnyTensor::U8(t) => t.shape(),
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            AnyTensor::F32(_) => ElementType::F32,
            AnyTensor::U8(_) => ElementType::U8,
        }
    }

    /// Returns the tensor if its elements are of type `T`.
    pub fn downcast<T: Element>(&self) -> Option<&Tensor<T>> {
        T::downcast(self)
    }
}

impl From<Tensor<f32>> for AnyTensor {
    fn from(t: Tensor<f32>) -> Self {
        AnyTensor::F32(t)
    }
}

impl From<Tensor<u8>> for AnyTensor {
    fn from(t: Tensor<u8>) -> Self {
        AnyTensor::U8(t)
    }
}

impl fmt::Debug for AnyTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnyTensor::F32(t) => t.fmt(f),
            AnyTensor::U8(t) => t.fmt(f),
        }
    }
}
