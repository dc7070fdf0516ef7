//! Kernel source synthesis.
//!
//! A kernel is WGSL text written against two primitives, `read(array)` and
//! `commit(value)`, plus the sampling coordinate `pos`. The fragment module handed to
//! the device is always laid out the same way:
//!
//! 1. the fixed [`KERNEL_PROLOGUE`], holding the primitives and the entry point,
//! 2. one texture and one `<name>Scale` uniform per registered array, in registration
//!    order, followed by the context's shared utility source,
//! 3. the user body, verbatim. It must define `fn kernel()`.
//!
//! The vertex stage is a separate, fixed module ([`VERTEX_STAGE`]).

use std::fmt;
use std::fmt::Write as _;
use std::path::Path;

use crate::engine::{BindingPlan, Role};

/// Entry point of [`VERTEX_STAGE`].
pub const VERTEX_ENTRY: &str = "gpgpu_vertex";
/// Entry point of [`KERNEL_PROLOGUE`].
pub const FRAGMENT_ENTRY: &str = "gpgpu_fragment";

/// Bind group holding input textures, binding = texture unit.
pub const INPUT_GROUP: u32 = 0;
/// Bind group holding the `<name>Scale` uniforms, binding = registration index.
pub const SCALE_GROUP: u32 = 1;
/// Bind group holding the destination's `locationScale` uniform at binding 0.
pub const LOCATION_GROUP: u32 = 2;

/// Maximum length of a build diagnostic kept in errors and logs.
pub const MAX_LOG_LENGTH: usize = 10000;

/// Maps a full screen quad (4 vertex triangle strip, no vertex buffer) to the
/// normalized sampling coordinate `pos`. Texel row 0 is the top row.
pub const VERTEX_STAGE: &str = r#"
struct GpgpuVarying {
    @builtin(position) position: vec4<f32>,
    @location(0) pos: vec2<f32>,
}

@vertex
fn gpgpu_vertex(@builtin(vertex_index) index: u32) -> GpgpuVarying {
    let corner = vec2<f32>(f32(index & 1u), f32(index >> 1u));
    var result: GpgpuVarying;
    result.position = vec4<f32>(corner * 2.0 - 1.0, 0.0, 1.0);
    result.pos = vec2<f32>(corner.x, 1.0 - corner.y);
    return result;
}
"#;

/// Primitives every kernel body is written against.
///
/// A pixel whose `kernel()` never calls `commit` is discarded and keeps its previous
/// value.
pub const KERNEL_PROLOGUE: &str = r#"
@group(2) @binding(0) var<uniform> locationScale: vec4<f32>;

var<private> pos: vec2<f32>;
var<private> gpgpu_out: vec4<f32>;
var<private> gpgpu_committed: bool = false;

fn read(m: texture_2d<f32>) -> vec4<f32> {
    let size = vec2<i32>(textureDimensions(m));
    let texel = clamp(vec2<i32>(pos * vec2<f32>(size)), vec2<i32>(0), size - vec2<i32>(1));
    return textureLoad(m, texel, 0);
}

fn commit(d: vec4<f32>) {
    gpgpu_out = d;
    gpgpu_committed = true;
}

@fragment
fn gpgpu_fragment(@location(0) coord: vec2<f32>) -> @location(0) vec4<f32> {
    pos = coord;
    kernel();
    if !gpgpu_committed {
        discard;
    }
    return gpgpu_out;
}
"#;

/// Identifiers owned by the prologue, which arrays may not be named after.
pub const RESERVED_NAMES: &[&str] = &["read", "commit", "kernel", "pos", "locationScale"];
/// Prefix of the prologue's private identifiers.
pub const RESERVED_PREFIX: &str = "gpgpu_";

/// Builds the declaration block for `plan`: per array a texture and its scale uniform,
/// in registration order, then `utils`.
///
/// Input arrays are declared at their texture unit. The destination is declared too,
/// one past the last unit, where the pipeline layout has no slot: a kernel that reads
/// its own destination fails to link.
pub fn texture_declarations(plan: &BindingPlan, utils: &str) -> String {
    let mut decls = String::new();
    for entry in plan.entries() {
        let texture_binding = match entry.role {
            Role::Input { unit } => unit,
            Role::Destination => plan.input_count(),
        };
        let _ = writeln!(
            decls,
            "@group({INPUT_GROUP}) @binding({texture_binding}) var {name}: texture_2d<f32>;",
            name = entry.name
        );
        let _ = writeln!(
            decls,
            "@group({SCALE_GROUP}) @binding({index}) var<uniform> {name}Scale: vec2<f32>;",
            index = entry.index,
            name = entry.name
        );
    }
    decls.push_str(utils);
    decls
}

/// Whether `source` uses `name` as a whole identifier. Comments count too.
pub fn mentions(source: &str, name: &str) -> bool {
    source
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .any(|word| word == name)
}

/// Cuts `log` down to [`MAX_LOG_LENGTH`] characters.
pub(crate) fn bounded_log(mut log: String) -> String {
    if let Some((cut, _)) = log.char_indices().nth(MAX_LOG_LENGTH) {
        log.truncate(cut);
    }
    log
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// The step of a program build that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStep {
    Compile(ShaderStage),
    Link,
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStep::Compile(stage) => write!(f, "{stage} compile"),
            BuildStep::Link => f.write_str("link"),
        }
    }
}

/// Turns kernel tokens into kernel source text.
///
/// ```
/// let body = texel_calc::kernel! {
///     fn kernel() { commit(read(A) + read(B)); }
/// };
/// assert!(body.starts_with("fn kernel()"));
/// ```
#[macro_export]
macro_rules! kernel {
    ($($body:tt)*) => {
        stringify!($($body)*)
    };
}

/// WGSL source text, held verbatim.
///
/// Nothing is parsed or checked here. Errors surface when a [`crate::program::Program`]
/// is built, where the device compiler sees the full module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shader {
    content: String,
}

impl Shader {
    pub fn from_content(content: &str) -> Self {
        Shader {
            content: content.to_string(),
        }
    }

    /// Loads a kernel kept in its own `.wgsl` file.
    pub fn from_file_path(path_to_module: impl AsRef<Path>) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path_to_module)?;
        Ok(Shader { content })
    }

    /// The fixed vertex stage shared by every program.
    pub fn vertex_stage() -> Self {
        Shader::from_content(VERTEX_STAGE)
    }

    /// The fragment stage for a kernel: prologue, then `decls`, then `body`.
    pub fn kernel(decls: &str, body: &str) -> Self {
        let mut content =
            String::with_capacity(KERNEL_PROLOGUE.len() + decls.len() + body.len() + 1);
        content.push_str(KERNEL_PROLOGUE);
        content.push_str(decls);
        content.push('\n');
        content.push_str(body);
        Shader { content }
    }

    /// Replaces every occurrence of `from` with `to`.
    ///
    /// Kernel templates can carry placeholder tokens that are not WGSL and get filled
    /// in once the values are known. The result is not checked.
    ///
    /// # Examples
    /// ```
    /// use texel_calc::coding::Shader;
    /// let mut shader = Shader::from_content("fn kernel() { commit(read(A) * €factor); }");
    /// shader.replace("€factor", "0.5");
    /// assert_eq!(shader.get_content(), "fn kernel() { commit(read(A) * 0.5); }");
    /// ```
    pub fn replace(&mut self, from: &str, to: &str) {
        self.content = self.content.replace(from, to);
    }

    pub fn get_content(&self) -> &str {
        &self.content
    }
}
