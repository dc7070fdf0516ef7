//! Kernel execution.
//!
//! Running a kernel is one draw. Before it, every registered array other than the
//! destination is bound as an input texture on the next free texture unit, and every
//! array, destination included, gets its `<name>Scale` uniform. The destination is
//! never bound as an input, so a kernel can't read the texture it is writing.

use std::cell::Ref;

use crate::array::{Array, DeviceStorage};
use crate::context::Context;
use crate::errors::ExecutionError;
use crate::program::Program;
use crate::texture::TextureResource;

/// What a registered array is to one kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Read through the texture bound on `unit`.
    Input { unit: u32 },
    /// Written by the kernel; only its scale uniform is bound.
    Destination,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub name: String,
    /// Registration index, also the binding of the scale uniform.
    pub index: usize,
    pub role: Role,
}

/// Texture unit assignment for one destination, in registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingPlan {
    entries: Vec<PlanEntry>,
    input_count: u32,
}

impl BindingPlan {
    /// Walks `names` in order with a unit counter starting at 0. Every array but the
    /// one at `destination` takes the current unit and advances the counter.
    pub fn for_destination<'a>(
        names: impl IntoIterator<Item = &'a str>,
        destination: usize,
    ) -> BindingPlan {
        BindingPlan::from_registered(names.into_iter().enumerate(), destination)
    }

    /// Same as [`BindingPlan::for_destination`] over `(registration index, name)`
    /// pairs, which may skip indices.
    pub fn from_registered<'a>(
        registered: impl IntoIterator<Item = (usize, &'a str)>,
        destination: usize,
    ) -> BindingPlan {
        let mut unit = 0;
        let entries = registered
            .into_iter()
            .map(|(index, name)| {
                let role = if index == destination {
                    Role::Destination
                } else {
                    unit += 1;
                    Role::Input { unit: unit - 1 }
                };
                PlanEntry {
                    name: name.to_string(),
                    index,
                    role,
                }
            })
            .collect();

        BindingPlan {
            entries,
            input_count: unit,
        }
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    /// Number of arrays bound as input textures.
    pub fn input_count(&self) -> u32 {
        self.input_count
    }

    /// Input entries with their texture unit, in unit order.
    pub fn inputs(&self) -> impl Iterator<Item = (&PlanEntry, u32)> + '_ {
        self.entries.iter().filter_map(|entry| match entry.role {
            Role::Input { unit } => Some((entry, unit)),
            Role::Destination => None,
        })
    }

    pub fn destination(&self) -> Option<&PlanEntry> {
        self.entries
            .iter()
            .find(|entry| entry.role == Role::Destination)
    }
}

/// Runs `program` once into `destination`.
///
/// The program must have been built for `destination`. Every array it declares is
/// resolved through the context registry at its current storage, so a run after
/// [`Array::swap`] reads and writes the exchanged textures. A declared array released
/// since the build only fails the run if the kernel source names it; otherwise a
/// placeholder is bound in its place.
#[tracing::instrument(
    skip_all,
    fields(destination = destination.name(), program = %program.id())
)]
pub fn run(
    ctx: &Context,
    destination: &Array,
    program: &Program,
) -> Result<(), ExecutionError> {
    if program.destination() != destination.name() {
        return Err(ExecutionError::ProgramTargetMismatch {
            expected: program.destination().to_string(),
            found: destination.name().to_string(),
        });
    }

    let plan = program.plan();
    let mut live = Vec::with_capacity(plan.entries().len());
    for (position, entry) in plan.entries().iter().enumerate() {
        match ctx.registry().resolve(entry.index) {
            Ok(storage) => live.push(Some(storage)),
            Err(err) if program.mentions(position) => return Err(err),
            Err(_) => {
                tracing::debug!(array = %entry.name, "released, placeholder bound");
                live.push(None);
            }
        }
    }
    let storages: Vec<Option<Ref<'_, DeviceStorage>>> = live
        .iter()
        .map(|s| s.as_ref().map(|s| s.borrow()))
        .collect();
    let placeholder = ctx.placeholder();
    let textures: Vec<&TextureResource> = storages
        .iter()
        .map(|s| s.as_ref().map_or(placeholder, |s| &s.texture))
        .collect();

    let device = ctx.bindings().device();
    let [input_layout, scale_layout, location_layout] = program.layouts();

    let views: Vec<(u32, wgpu::TextureView)> = plan
        .entries()
        .iter()
        .zip(&textures)
        .filter_map(|(entry, texture)| match entry.role {
            Role::Input { unit } => {
                tracing::debug!(array = %entry.name, unit, "input bound");
                Some((unit, texture.view()))
            }
            Role::Destination => None,
        })
        .collect();
    let input_entries: Vec<wgpu::BindGroupEntry<'_>> = views
        .iter()
        .map(|(unit, view)| wgpu::BindGroupEntry {
            binding: *unit,
            resource: wgpu::BindingResource::TextureView(view),
        })
        .collect();

    let scale_entries: Vec<wgpu::BindGroupEntry<'_>> = plan
        .entries()
        .iter()
        .zip(&textures)
        .map(|(entry, texture)| wgpu::BindGroupEntry {
            binding: entry.index as u32,
            resource: texture.scale_buffer().as_entire_binding(),
        })
        .collect();

    let storage = destination.storage();
    let target = &storage.target;

    // Indexed by bind group slot.
    let bind_groups = [
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texel-calc inputs"),
            layout: input_layout,
            entries: &input_entries,
        }),
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texel-calc scales"),
            layout: scale_layout,
            entries: &scale_entries,
        }),
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texel-calc location"),
            layout: location_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: target.location_buffer().as_entire_binding(),
            }],
        }),
    ];

    target.draw(ctx.bindings(), program.pipeline(), &bind_groups)
}
