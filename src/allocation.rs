//! Host side compute buffers and their device mirrors.
//!
//! An [`Allocation`] pairs a flat buffer of [`Vec4f`] records with an
//! [`Array`](crate::array::Array) shaped to hold exactly those records. The two are
//! only synchronised at [`Allocation::push`] and [`Allocation::pull`].

use std::fmt;

use bytemuck::{Pod, Zeroable};

use crate::array::Array;
use crate::context::Context;
use crate::errors::{AllocationError, ExecutionError, ProgramError, TransferError};
use crate::program::Program;

/// One four channel float record, laid out like a texel of the device texture.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vec4f {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Vec4f {
    pub const ZERO: Vec4f = Vec4f::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Vec4f {
        Vec4f { r, g, b, a }
    }

    /// A record holding `value` in the red channel, the others zeroed.
    pub const fn scalar(value: f32) -> Vec4f {
        Vec4f::new(value, 0.0, 0.0, 0.0)
    }
}

impl From<[f32; 4]> for Vec4f {
    fn from([r, g, b, a]: [f32; 4]) -> Vec4f {
        Vec4f { r, g, b, a }
    }
}

impl From<Vec4f> for [f32; 4] {
    fn from(v: Vec4f) -> [f32; 4] {
        [v.r, v.g, v.b, v.a]
    }
}

/// Width and height of a device texture, in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shape {
    pub width: u32,
    pub height: u32,
}

impl Shape {
    pub const fn new(width: u32, height: u32) -> Shape {
        Shape { width, height }
    }

    /// Number of texels.
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Factors `length` into the exact 2D shape closest to a square.
///
/// Candidate row counts `x = 1, 2, ...` are scanned while `x <= length / x`; the last
/// exact divisor wins. The smaller factor is the width, so a prime length gives
/// `1 x length`.
///
/// # Errors
/// - [`AllocationError::InvalidLength`] if `length` is zero
/// - [`AllocationError::DimensionTooLarge`] if a side doesn't fit in a `u32`
pub fn factorize(length: usize) -> Result<Shape, AllocationError> {
    if length == 0 {
        return Err(AllocationError::InvalidLength);
    }

    let mut best = 1;
    let mut x = 1;
    while x <= length / x {
        if length % x == 0 {
            best = x;
        }
        x += 1;
    }

    let width = u32::try_from(best);
    let height = u32::try_from(length / best);
    match (width, height) {
        (Ok(width), Ok(height)) => Ok(Shape::new(width, height)),
        _ => Err(AllocationError::DimensionTooLarge {
            length,
            width: width.unwrap_or(u32::MAX),
            height: height.unwrap_or(u32::MAX),
            max: u32::MAX,
        }),
    }
}

/// The user facing compute buffer.
///
/// It owns the host records and the device array mirroring them. The array is
/// registered in the [`Context`] under the allocation's name, which is also the name
/// kernels use to read it.
pub struct Allocation {
    data: Vec<Vec4f>,
    shape: Shape,
    array: Array,
}

impl Allocation {
    /// Creates an allocation of `length` zeroed records and its device array.
    ///
    /// # Arguments
    /// * - `ctx` - the context the array registers into
    /// * - `name` - the identifier kernels use for this array, unique in `ctx`
    /// * - `length` - number of records, must be positive
    ///
    /// # Errors
    /// The length and the derived shape are validated before any device resource
    /// is created. A name clash is reported as [`AllocationError::Registry`].
    pub fn new(
        ctx: &mut Context,
        name: &str,
        length: usize,
    ) -> Result<Allocation, AllocationError> {
        let shape = factorize(length)?;
        let max = ctx.bindings().limits().max_texture_dimension_2d;
        if shape.width > max || shape.height > max {
            return Err(AllocationError::DimensionTooLarge {
                length,
                width: shape.width,
                height: shape.height,
                max,
            });
        }

        let array = Array::new(ctx, name, shape.width, shape.height)?;
        tracing::debug!(name, length, %shape, "allocation created");
        Ok(Allocation {
            data: vec![Vec4f::ZERO; length],
            shape,
            array,
        })
    }

    pub fn name(&self) -> &str {
        self.array.name()
    }

    /// Logical length, in records.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn width(&self) -> u32 {
        self.shape.width
    }

    pub fn height(&self) -> u32 {
        self.shape.height
    }

    pub fn array(&self) -> &Array {
        &self.array
    }

    pub fn data(&self) -> &[Vec4f] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [Vec4f] {
        &mut self.data
    }

    /// Uploads the whole host buffer into the device texture.
    #[tracing::instrument(skip_all, fields(name = self.name()))]
    pub fn push(&self, ctx: &Context) -> Result<(), TransferError> {
        self.array
            .storage()
            .texture
            .upload(ctx.bindings(), &self.data)
    }

    /// Reads the whole device texture back into the host buffer.
    #[tracing::instrument(skip_all, fields(name = self.name()))]
    pub fn pull(&mut self, ctx: &Context) -> Result<(), TransferError> {
        let storage = self.array.storage();
        storage.texture.readback(ctx.bindings(), &mut self.data)
    }

    /// Builds a program writing into this allocation. See [`Program::build`].
    pub fn make(&self, ctx: &Context, kernel: &str) -> Result<Program, ProgramError> {
        Program::build(ctx, &self.array, kernel)
    }

    /// Runs a program built for this allocation. See [`crate::engine::run`].
    pub fn run(&self, ctx: &Context, program: &Program) -> Result<(), ExecutionError> {
        crate::engine::run(ctx, &self.array, program)
    }

    /// Builds `kernel` and runs it once into this allocation.
    pub fn run_source(&self, ctx: &Context, kernel: &str) -> Result<(), ExecutionError> {
        let program = self.make(ctx, kernel)?;
        self.run(ctx, &program)
    }

    /// Exchanges device storage with `other`. Host buffers are left untouched.
    pub fn swap(&self, other: &Allocation) -> Result<(), ExecutionError> {
        self.array.swap(&other.array)
    }
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("name", &self.name())
            .field("shape", &self.shape)
            .field("len", &self.data.len())
            .finish()
    }
}
