//! Compiled kernels.
//!
//! A [`Program`] is the render pipeline for one kernel body writing into one
//! destination array. Building it freezes the binding plan: arrays registered later
//! are not visible to it.

use std::fmt;

use crate::array::Array;
use crate::coding::{
    bounded_log, mentions, texture_declarations, BuildStep, Shader, ShaderStage,
    FRAGMENT_ENTRY, VERTEX_ENTRY,
};
use crate::context::Context;
use crate::engine::BindingPlan;
use crate::errors::ProgramError;
use crate::texture::TexelFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u64);

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "program#{}", self.0)
    }
}

fn fragment_visible(binding: u32, ty: wgpu::BindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty,
        count: None,
    }
}

const INPUT_TEXTURE: wgpu::BindingType = wgpu::BindingType::Texture {
    sample_type: wgpu::TextureSampleType::Float { filterable: false },
    view_dimension: wgpu::TextureViewDimension::D2,
    multisampled: false,
};

const UNIFORM: wgpu::BindingType = wgpu::BindingType::Buffer {
    ty: wgpu::BufferBindingType::Uniform,
    has_dynamic_offset: false,
    min_binding_size: None,
};

/// A linked kernel, reusable for any number of runs into its destination.
pub struct Program {
    id: ProgramId,
    destination: String,
    plan: BindingPlan,
    // per plan entry, whether the kernel body or the utils name the array
    mentioned: Vec<bool>,
    layouts: [wgpu::BindGroupLayout; 3],
    pipeline: wgpu::RenderPipeline,
    fragment_source: Shader,
}

impl Program {
    /// Compiles and links `kernel` for runs into `destination`.
    ///
    /// The fragment module is the prologue, the declarations of every array currently
    /// in `ctx` and the context utilities, then `kernel`, which must define
    /// `fn kernel()`. Each stage is compiled in its own validation scope, so a failure
    /// names the step that broke. The diagnostic is logged and returned, cut to
    /// [`crate::coding::MAX_LOG_LENGTH`].
    ///
    /// # Errors
    /// - [`ProgramError::Registry`] if `destination` is not registered in `ctx`
    /// - [`ProgramError::TooManyBindings`] if the context outgrows the device limits
    /// - [`ProgramError::Build`] if a stage fails to compile or the pipeline to link,
    ///   reading the destination itself included
    #[tracing::instrument(skip_all, fields(destination = destination.name()))]
    pub fn build(
        ctx: &Context,
        destination: &Array,
        kernel: &str,
    ) -> Result<Program, ProgramError> {
        let bindings = ctx.bindings();
        let plan = ctx.registry().binding_plan(destination.name())?;
        check_limits(&plan, destination.name(), &bindings.limits())?;

        let mentioned = plan
            .entries()
            .iter()
            .map(|entry| {
                let scale = format!("{}Scale", entry.name);
                [kernel, ctx.utils()]
                    .iter()
                    .any(|source| mentions(source, &entry.name) || mentions(source, &scale))
            })
            .collect();

        let decls = texture_declarations(&plan, ctx.utils());
        let fragment_source = Shader::kernel(&decls, kernel);
        let label = format!("{} kernel", destination.name());

        let vertex_source = Shader::vertex_stage();
        let (vertex, error) =
            bindings.capture_validation(|| bindings.get_shader_module(&label, &vertex_source));
        fail_on(error, BuildStep::Compile(ShaderStage::Vertex), &vertex_source)?;
        let (fragment, error) =
            bindings.capture_validation(|| bindings.get_shader_module(&label, &fragment_source));
        fail_on(error, BuildStep::Compile(ShaderStage::Fragment), &fragment_source)?;

        let input_entries: Vec<_> = plan
            .inputs()
            .map(|(_, unit)| fragment_visible(unit, INPUT_TEXTURE))
            .collect();
        let scale_entries: Vec<_> = plan
            .entries()
            .iter()
            .map(|entry| fragment_visible(entry.index as u32, UNIFORM))
            .collect();
        let layouts = [
            bindings.get_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("texel-calc inputs"),
                entries: &input_entries,
            }),
            bindings.get_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("texel-calc scales"),
                entries: &scale_entries,
            }),
            bindings.get_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("texel-calc location"),
                entries: &[fragment_visible(0, UNIFORM)],
            }),
        ];
        let pipeline_layout = bindings.get_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&label),
            bind_group_layouts: &[&layouts[0], &layouts[1], &layouts[2]],
            push_constant_ranges: &[],
        });

        let (pipeline, error) = bindings.capture_validation(|| {
            bindings
                .device()
                .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(&label),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &vertex,
                        entry_point: VERTEX_ENTRY,
                        buffers: &[],
                    },
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleStrip,
                        ..Default::default()
                    },
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    fragment: Some(wgpu::FragmentState {
                        module: &fragment,
                        entry_point: FRAGMENT_ENTRY,
                        targets: &[Some(wgpu::ColorTargetState {
                            format: TexelFormat::Rgba32Float.to_wgpu(),
                            blend: None,
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                    }),
                    multiview: None,
                })
        });
        fail_on(error, BuildStep::Link, &fragment_source)?;

        let id = ProgramId(bindings.next_handle());
        tracing::debug!(%id, inputs = plan.input_count(), "program linked");

        Ok(Program {
            id,
            destination: destination.name().to_string(),
            plan,
            mentioned,
            layouts,
            pipeline,
            fragment_source,
        })
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    /// Name of the array this program writes into.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// The binding plan frozen at build time.
    pub fn plan(&self) -> &BindingPlan {
        &self.plan
    }

    /// The complete fragment source handed to the device.
    pub fn fragment_source(&self) -> &Shader {
        &self.fragment_source
    }

    /// Whether the source names the array at `position` of the plan.
    pub(crate) fn mentions(&self, position: usize) -> bool {
        self.mentioned.get(position).copied().unwrap_or(true)
    }

    pub(crate) fn pipeline(&self) -> &wgpu::RenderPipeline {
        &self.pipeline
    }

    pub(crate) fn layouts(&self) -> &[wgpu::BindGroupLayout; 3] {
        &self.layouts
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("plan", &self.plan)
            .finish()
    }
}

fn fail_on(
    error: Option<String>,
    step: BuildStep,
    source: &Shader,
) -> Result<(), ProgramError> {
    match error {
        None => Ok(()),
        Some(log) => {
            let log = bounded_log(log);
            tracing::error!(%step, source = source.get_content(), "{log}");
            Err(ProgramError::Build { step, log })
        }
    }
}

fn check_limits(
    plan: &BindingPlan,
    destination: &str,
    limits: &wgpu::Limits,
) -> Result<(), ProgramError> {
    let textures = plan.input_count();
    if textures > limits.max_sampled_textures_per_shader_stage {
        return Err(ProgramError::TooManyBindings {
            destination: destination.to_string(),
            resource: "input textures",
            requested: textures,
            max: limits.max_sampled_textures_per_shader_stage,
        });
    }
    // one scale per array plus the location uniform
    let uniforms = plan.entries().len() as u32 + 1;
    if uniforms > limits.max_uniform_buffers_per_shader_stage {
        return Err(ProgramError::TooManyBindings {
            destination: destination.to_string(),
            resource: "uniform buffers",
            requested: uniforms,
            max: limits.max_uniform_buffers_per_shader_stage,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_count_every_registered_array() {
        let names: Vec<String> = (0..12).map(|i| format!("a{i}")).collect();
        let plan = BindingPlan::for_destination(names.iter().map(String::as_str), 0);
        let limits = wgpu::Limits::default();
        assert!(matches!(
            check_limits(&plan, "a0", &limits),
            Err(ProgramError::TooManyBindings {
                resource: "uniform buffers",
                requested: 13,
                max: 12,
                ..
            })
        ));

        let plan = BindingPlan::for_destination(["A", "B", "C"], 2);
        assert!(check_limits(&plan, "C", &limits).is_ok());
    }

    #[test]
    fn texture_limit_ignores_the_destination() {
        let names: Vec<String> = (0..5).map(|i| format!("a{i}")).collect();
        let plan = BindingPlan::for_destination(names.iter().map(String::as_str), 4);
        let limits = wgpu::Limits {
            max_sampled_textures_per_shader_stage: 4,
            ..wgpu::Limits::default()
        };
        assert!(check_limits(&plan, "a4", &limits).is_ok());

        let limits = wgpu::Limits {
            max_sampled_textures_per_shader_stage: 3,
            ..limits
        };
        assert!(matches!(
            check_limits(&plan, "a4", &limits),
            Err(ProgramError::TooManyBindings {
                resource: "input textures",
                requested: 4,
                ..
            })
        ));
    }

    #[test]
    fn failures_keep_the_step_and_a_bounded_log() {
        let source = Shader::from_content("fn kernel() {}");
        assert!(fail_on(None, BuildStep::Link, &source).is_ok());
        let err = fail_on(Some("x".repeat(20_000)), BuildStep::Link, &source).unwrap_err();
        match err {
            ProgramError::Build { step, log } => {
                assert_eq!(step, BuildStep::Link);
                assert_eq!(log.len(), crate::coding::MAX_LOG_LENGTH);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
