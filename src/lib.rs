/*!
This crate aim is to leverage the GPU for general purpose calculations through the graphics pipeline.

Data lives in float textures, one four channel texel per record, and calculations are
fragment kernels drawn over a full screen quad: every texel of the destination runs the kernel once.
The kernel reads any other array of the session by name and commits the value of its own texel.

The crate is built on [`wgpu`], and the pieces stack up as follows:
- [`interface::GraphicsBindings`] resolves the device once, at session start
- [`context::Context`] owns the bindings and the ordered registry of named arrays
- [`allocation::Allocation`] is a host buffer of [`allocation::Vec4f`] mirrored by a device [`array::Array`]
- [`program::Program`] is a linked kernel for one destination, run by [`engine::run`]

```no_run
use texel_calc::prelude::*;

# fn main() -> Result<(), Box<dyn std::error::Error>> {
let bindings = pollster::block_on(GraphicsBindings::new(BindingsConfig::default()))?;
let mut ctx = Context::new(bindings);

let mut a = Allocation::new(&mut ctx, "A", 4)?;
let mut b = Allocation::new(&mut ctx, "B", 4)?;
let mut c = Allocation::new(&mut ctx, "C", 4)?;
a.data_mut().copy_from_slice(&[Vec4f::scalar(1.0); 4]);
b.data_mut().copy_from_slice(&[Vec4f::scalar(2.0); 4]);
a.push(&ctx)?;
b.push(&ctx)?;

c.run_source(&ctx, texel_calc::kernel! {
    fn kernel() { commit(read(A) + read(B)); }
})?;
c.pull(&ctx)?;
assert_eq!(c.data()[0].r, 3.0);
# Ok(())
# }
```

Data only moves between host and device on [`allocation::Allocation::push`] and
[`allocation::Allocation::pull`]. Iterative schemes keep everything on the device and
exchange storage with [`array::Array::swap`] between runs.
*/

pub mod allocation;
pub mod array;
pub mod coding;
pub mod context;
pub mod engine;
pub mod errors;
pub mod interface;
pub mod program;
pub mod target;
pub mod texture;

#[cfg(test)]
mod tests;

pub mod prelude {
    pub use crate::allocation::{factorize, Allocation, Shape, Vec4f};
    pub use crate::array::Array;
    pub use crate::coding::Shader;
    pub use crate::context::Context;
    pub use crate::errors::{
        AllocationError, ExecutionError, ProgramError, RegistryError, SetupError, TransferError,
    };
    pub use crate::interface::{BindingsConfig, GraphicsBindings};
    pub use crate::program::Program;
}
