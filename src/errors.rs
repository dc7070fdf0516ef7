//! This module contains all the specific error implementation for the crate
//!
//! Every concern has its own enum so callers can match on what went wrong
//! without string inspection. Operations spanning more than one concern convert
//! through `#[from]`.

use thiserror::Error;

use crate::coding::BuildStep;

/// Errors raised while acquiring the device.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("no gpu adapter available for backends {0:?}")]
    NoAdapter(wgpu::Backends),
    #[error("device request refused: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
    #[error("adapter {adapter} can't render into {format:?} textures")]
    MissingCapability {
        adapter: String,
        format: wgpu::TextureFormat,
    },
}

/// Errors raised by the array registry of a [`crate::context::Context`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("array name {0:?} is not a valid kernel identifier")]
    InvalidName(String),
    #[error("array name {0:?} is reserved by the kernel prologue")]
    ReservedName(String),
    #[error("array name {0:?} is already registered")]
    DuplicateName(String),
    #[error("array name {name:?} collides with the uniforms of array {other:?}")]
    UniformCollision { name: String, other: String },
    #[error("array {0:?} is not registered in this context")]
    UnknownArray(String),
}

/// Errors raised while creating an [`crate::allocation::Allocation`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("allocation length must be positive")]
    InvalidLength,
    #[error("length {length} factors into {width}x{height}, the device allows {max} per side")]
    DimensionTooLarge {
        length: usize,
        width: u32,
        height: u32,
        max: u32,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors raised while turning a kernel body into a [`crate::program::Program`].
#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("could not build kernel ({step}): {log}")]
    Build { step: BuildStep, log: String },
    #[error("kernel for {destination:?} needs {requested} {resource}, the device allows {max}")]
    TooManyBindings {
        destination: String,
        resource: &'static str,
        requested: u32,
        max: u32,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors raised while executing a kernel or exchanging device storage.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("render target {0:?} has no attached texture")]
    NoAttachment(String),
    #[error("program was built for {expected:?}, can't run it into {found:?}")]
    ProgramTargetMismatch { expected: String, found: String },
    #[error("array {0:?} was released before the kernel ran")]
    ArrayReleased(String),
    #[error("can't swap {left:?} ({left_shape}) with {right:?} ({right_shape}): shapes differ")]
    ShapeMismatch {
        left: String,
        left_shape: crate::allocation::Shape,
        right: String,
        right_shape: crate::allocation::Shape,
    },
    #[error(transparent)]
    Program(#[from] ProgramError),
}

/// Errors raised while moving texels between host and device.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("buffer holds {found} texels, texture {width}x{height} needs {}", .width * .height)]
    LengthMismatch { found: usize, width: u32, height: u32 },
    #[error("mapping the readback buffer failed: {0}")]
    Map(#[from] wgpu::BufferAsyncError),
    #[error("readback channel closed before the buffer was mapped")]
    ChannelClosed,
}
