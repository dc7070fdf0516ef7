//! The session wide registry of arrays.
//!
//! A [`Context`] owns the device bindings, the ordered list of every array created in
//! it and a utility source appended to every kernel. Registration order is binding
//! order: it decides which texture unit each input gets.

use std::cell::{OnceCell, RefCell};
use std::rc::{Rc, Weak};

use crate::allocation::Shape;
use crate::array::DeviceStorage;
use crate::coding::{texture_declarations, RESERVED_NAMES, RESERVED_PREFIX};
use crate::engine::BindingPlan;
use crate::errors::{ExecutionError, RegistryError};
use crate::interface::GraphicsBindings;
use crate::texture::TextureResource;

// Keywords, reserved words and predeclared types of WGSL. A global named after one of
// them fails to compile, and every array is declared in every kernel.
const WGSL_RESERVED: &[&str] = &[
    // keywords
    "alias", "break", "case", "const", "const_assert", "continue", "continuing", "default",
    "diagnostic", "discard", "else", "enable", "false", "fn", "for", "if", "let", "loop",
    "override", "requires", "return", "struct", "switch", "true", "var", "while",
    // reserved words
    "NULL", "Self", "abstract", "active", "alignas", "alignof", "as", "asm", "asm_fragment",
    "async", "attribute", "auto", "await", "become", "binding_array", "cast", "catch", "class",
    "co_await", "co_return", "co_yield", "coherent", "column_major", "common", "compile",
    "compile_fragment", "concept", "const_cast", "consteval", "constexpr", "constinit", "crate",
    "debugger", "decltype", "delete", "demote", "demote_to_helper", "do", "dynamic_cast",
    "enum", "explicit", "export", "extends", "extern", "external", "fallthrough", "filter",
    "final", "finally", "friend", "from", "fxgroup", "get", "goto", "groupshared", "highp",
    "impl", "implements", "import", "inline", "instanceof", "interface", "layout", "lowp",
    "macro", "macro_rules", "match", "mediump", "meta", "mod", "module", "move", "mut",
    "mutable", "namespace", "new", "nil", "noexcept", "noinline", "nointerpolation",
    "noperspective", "null", "nullptr", "of", "operator", "package", "packoffset",
    "partition", "pass", "patch", "pixelfragment", "precise", "precision", "premerge", "priv",
    "protected", "pub", "public", "readonly", "ref", "regardless", "register",
    "reinterpret_cast", "require", "resource", "restrict", "self", "set", "shared", "sizeof",
    "smooth", "snorm", "static", "static_assert", "static_cast", "std", "subroutine", "super",
    "target", "template", "this", "thread_local", "throw", "trait", "try", "type", "typedef",
    "typeid", "typename", "typeof", "union", "unless", "unorm", "unsafe", "unsized", "use",
    "using", "varying", "virtual", "volatile", "wgsl", "where", "with", "writeonly", "yield",
    // predeclared types and type generators
    "array", "atomic", "bitcast", "bool", "f16", "f32", "i32", "u32", "ptr", "sampler",
    "sampler_comparison", "vec2", "vec3", "vec4", "mat2x2", "mat2x3", "mat2x4", "mat3x2",
    "mat3x3", "mat3x4", "mat4x2", "mat4x3", "mat4x4", "texture_1d", "texture_2d",
    "texture_2d_array", "texture_3d", "texture_cube", "texture_cube_array",
    "texture_multisampled_2d", "texture_depth_2d", "texture_depth_2d_array",
    "texture_depth_cube", "texture_depth_cube_array", "texture_depth_multisampled_2d",
    "texture_external", "texture_storage_1d", "texture_storage_2d",
    "texture_storage_2d_array", "texture_storage_3d",
    // address spaces and access modes
    "function", "private", "workgroup", "uniform", "storage", "handle", "read_write", "write",
];

/// Predeclared aliases such as `vec4f` or `mat3x2h`.
fn is_type_alias(name: &str) -> bool {
    let scalar = |c: u8| matches!(c, b'i' | b'u' | b'f' | b'h');
    let float = |c: u8| matches!(c, b'f' | b'h');
    let size = |c: u8| matches!(c, b'2'..=b'4');
    match name.as_bytes() {
        [b'v', b'e', b'c', n, t] => size(*n) && scalar(*t),
        [b'm', b'a', b't', c, b'x', r, t] => size(*c) && size(*r) && float(*t),
        _ => false,
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name != "_"
        && !name.starts_with("__")
}

fn scale_name(name: &str) -> String {
    format!("{name}Scale")
}

/// One registered array.
pub(crate) struct Registration {
    pub(crate) name: String,
    pub(crate) shape: Shape,
    pub(crate) storage: Weak<RefCell<DeviceStorage>>,
}

/// Append only, ordered list of arrays.
#[derive(Default)]
pub struct Registry {
    entries: Vec<Registration>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    pub fn shape_of(&self, name: &str) -> Option<Shape> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.shape)
    }

    /// Checks that `name` can be registered: a plain identifier, not reserved, and
    /// clear of every existing name and `<name>Scale` uniform.
    pub fn check_name(&self, name: &str) -> Result<(), RegistryError> {
        if !is_identifier(name) {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        if RESERVED_NAMES.contains(&name)
            || WGSL_RESERVED.contains(&name)
            || is_type_alias(name)
            || name.starts_with(RESERVED_PREFIX)
        {
            return Err(RegistryError::ReservedName(name.to_string()));
        }
        for existing in self.names() {
            if existing == name {
                return Err(RegistryError::DuplicateName(name.to_string()));
            }
            if scale_name(existing) == name || scale_name(name) == existing {
                return Err(RegistryError::UniformCollision {
                    name: name.to_string(),
                    other: existing.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Appends an array, returning its registration index.
    pub(crate) fn register(
        &mut self,
        name: &str,
        shape: Shape,
        storage: Weak<RefCell<DeviceStorage>>,
    ) -> Result<usize, RegistryError> {
        self.check_name(name)?;
        self.entries.push(Registration {
            name: name.to_string(),
            shape,
            storage,
        });
        Ok(self.entries.len() - 1)
    }

    /// Texture unit assignment for a kernel writing into `destination`.
    ///
    /// Arrays already released by their owner are left out: they are neither declared
    /// nor given a texture unit.
    pub fn binding_plan(&self, destination: &str) -> Result<BindingPlan, RegistryError> {
        let index = self
            .index_of(destination)
            .ok_or_else(|| RegistryError::UnknownArray(destination.to_string()))?;
        let live = self
            .entries
            .iter()
            .enumerate()
            .filter(|(i, e)| *i == index || e.storage.strong_count() > 0)
            .map(|(i, e)| (i, e.name.as_str()));
        Ok(BindingPlan::from_registered(live, index))
    }

    /// Device storage of the array at `index`, if its owner still holds it.
    pub(crate) fn resolve(
        &self,
        index: usize,
    ) -> Result<Rc<RefCell<DeviceStorage>>, ExecutionError> {
        let entry = self
            .entries
            .get(index)
            .ok_or_else(|| ExecutionError::ArrayReleased(format!("#{index}")))?;
        entry
            .storage
            .upgrade()
            .ok_or_else(|| ExecutionError::ArrayReleased(entry.name.clone()))
    }
}

/// Process wide state of a compute session.
pub struct Context {
    bindings: GraphicsBindings,
    registry: Registry,
    utils: String,
    // bound in place of released arrays a program declares but never reads
    placeholder: OnceCell<TextureResource>,
}

impl Context {
    /// Creates a context on already resolved bindings.
    pub fn new(bindings: GraphicsBindings) -> Context {
        Context {
            bindings,
            registry: Registry::new(),
            utils: String::new(),
            placeholder: OnceCell::new(),
        }
    }

    pub fn bindings(&self) -> &GraphicsBindings {
        &self.bindings
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// A 1x1 texture created on first use.
    pub(crate) fn placeholder(&self) -> &TextureResource {
        self.placeholder.get_or_init(|| {
            TextureResource::new(&self.bindings, "texel-calc placeholder", Shape::new(1, 1))
        })
    }

    /// Source appended to every kernel after the array declarations.
    pub fn utils(&self) -> &str {
        &self.utils
    }

    pub fn set_utils(&mut self, utils: impl Into<String>) {
        self.utils = utils.into();
    }

    pub fn append_utils(&mut self, utils: &str) {
        self.utils.push_str(utils);
    }

    pub fn array_names(&self) -> Vec<&str> {
        self.registry.names().collect()
    }

    /// The declaration block a kernel writing into `destination` is compiled with.
    pub fn tex_decls(&self, destination: &str) -> Result<String, RegistryError> {
        let plan = self.registry.binding_plan(destination)?;
        Ok(texture_declarations(&plan, &self.utils))
    }
}
