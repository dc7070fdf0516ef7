//! Named device arrays.
//!
//! An [`Array`] is a texture plus a render target attached to it, registered in a
//! [`Context`] under a name kernels use to refer to it.

use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::allocation::Shape;
use crate::context::Context;
use crate::errors::{ExecutionError, RegistryError};
use crate::target::{RenderTarget, TargetId};
use crate::texture::{TextureId, TextureResource};

/// Device side of an array. The target is declared first so it is released before
/// the texture it is attached to.
pub(crate) struct DeviceStorage {
    pub(crate) target: RenderTarget,
    pub(crate) texture: TextureResource,
}

/// One named compute buffer on the device.
///
/// Arrays are not `Clone`: their device handles are unique, and two owners would
/// alias the same storage.
pub struct Array {
    name: String,
    index: usize,
    shape: Shape,
    storage: Rc<RefCell<DeviceStorage>>,
}

impl Array {
    /// Creates a `width` x `height` array and registers it in `ctx`.
    ///
    /// The name is validated before any device resource is created.
    pub fn new(
        ctx: &mut Context,
        name: &str,
        width: u32,
        height: u32,
    ) -> Result<Array, RegistryError> {
        ctx.registry().check_name(name)?;

        let shape = Shape::new(width, height);
        let bindings = ctx.bindings();
        let texture = TextureResource::new(bindings, name, shape);
        let target = RenderTarget::new(bindings, name, Some(&texture));
        let storage = Rc::new(RefCell::new(DeviceStorage { target, texture }));

        let index = ctx
            .registry_mut()
            .register(name, shape, Rc::downgrade(&storage))?;
        tracing::debug!(name, index, %shape, "array registered");

        Ok(Array {
            name: name.to_string(),
            index,
            shape,
            storage,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registration index in the owning context.
    pub fn index(&self) -> usize {
        self.index
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

    /// The device texture currently backing this array.
    pub fn texture_id(&self) -> TextureId {
        self.storage().texture.id()
    }

    /// The render target currently backing this array.
    pub fn target_id(&self) -> TargetId {
        self.storage().target.id()
    }

    /// Detaches the render target from the texture. Kernels can't run into the array
    /// until [`Array::reattach`]; it can still be read and transferred.
    pub fn detach(&self) -> Option<TextureId> {
        let detached = self.storage.borrow_mut().target.detach();
        tracing::debug!(name = %self.name, "render target detached");
        detached
    }

    /// Points the render target back at the array's current texture.
    pub fn reattach(&self, ctx: &Context) {
        let mut storage = self.storage.borrow_mut();
        let DeviceStorage { target, texture } = &mut *storage;
        target.attach(ctx.bindings(), texture);
    }

    pub(crate) fn storage(&self) -> Ref<'_, DeviceStorage> {
        self.storage.borrow()
    }

    /// Declarations of every registered array as seen by a kernel writing here,
    /// followed by the context's utility source.
    pub fn tex_decls(&self, ctx: &Context) -> Result<String, RegistryError> {
        ctx.tex_decls(&self.name)
    }

    /// Exchanges device storage with `other` without copying texels.
    ///
    /// Names and registration slots stay where they are, so a kernel reading `A`
    /// afterwards reads what was `B`'s texture. Swapping an array with itself does
    /// nothing.
    pub fn swap(&self, other: &Array) -> Result<(), ExecutionError> {
        if Rc::ptr_eq(&self.storage, &other.storage) {
            return Ok(());
        }
        if self.shape != other.shape {
            return Err(ExecutionError::ShapeMismatch {
                left: self.name.clone(),
                left_shape: self.shape,
                right: other.name.clone(),
                right_shape: other.shape,
            });
        }
        self.storage.swap(&other.storage);
        tracing::debug!(left = %self.name, right = %other.name, "device storage swapped");
        Ok(())
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("shape", &self.shape)
            .finish()
    }
}
