//! Render targets: where a kernel's output goes.
//!
//! A [`RenderTarget`] directs the fragment stage into one attached texture and issues
//! the single full screen draw that runs a kernel once per destination pixel.

use std::fmt;

use crate::allocation::Shape;
use crate::errors::ExecutionError;
use crate::interface::GraphicsBindings;
use crate::texture::{TextureId, TextureResource};

/// Vertices of the triangle strip covering the whole target.
const FULLSCREEN_QUAD_VERTICES: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u64);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target#{}", self.0)
    }
}

/// Non owning link to the texture a target writes into.
struct Attachment {
    texture: TextureId,
    shape: Shape,
    view: wgpu::TextureView,
}

pub struct RenderTarget {
    id: TargetId,
    label: String,
    attachment: Option<Attachment>,
    // (width, height, 0, 0) of the attachment, exposed to kernels as `locationScale`
    location: wgpu::Buffer,
}

impl RenderTarget {
    pub fn new(
        bindings: &GraphicsBindings,
        label: &str,
        texture: Option<&TextureResource>,
    ) -> RenderTarget {
        let location = bindings.get_buffer_init(
            &format!("{label} location"),
            bytemuck::cast_slice(&[0.0f32; 4]),
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        );
        let mut target = RenderTarget {
            id: TargetId(bindings.next_handle()),
            label: label.to_string(),
            attachment: None,
            location,
        };
        if let Some(texture) = texture {
            target.attach(bindings, texture);
        }
        target
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    /// Directs output into `texture`, replacing any previous attachment.
    pub fn attach(&mut self, bindings: &GraphicsBindings, texture: &TextureResource) {
        let shape = texture.shape();
        let location = [shape.width as f32, shape.height as f32, 0.0, 0.0];
        bindings
            .queue()
            .write_buffer(&self.location, 0, bytemuck::cast_slice(&location));
        self.attachment = Some(Attachment {
            texture: texture.id(),
            shape,
            view: texture.view(),
        });
    }

    /// Leaves the target unusable until the next [`RenderTarget::attach`].
    pub fn detach(&mut self) -> Option<TextureId> {
        self.attachment.take().map(|a| a.texture)
    }

    pub fn attached(&self) -> Option<TextureId> {
        self.attachment.as_ref().map(|a| a.texture)
    }

    pub fn shape(&self) -> Option<Shape> {
        self.attachment.as_ref().map(|a| a.shape)
    }

    pub(crate) fn location_buffer(&self) -> &wgpu::Buffer {
        &self.location
    }

    /// Draws one full screen quad with `pipeline` into the attached texture.
    ///
    /// The viewport covers the attachment exactly, so the fragment stage runs once per
    /// texel. Existing contents are loaded first: pixels the kernel discards keep
    /// their value.
    pub(crate) fn draw(
        &self,
        bindings: &GraphicsBindings,
        pipeline: &wgpu::RenderPipeline,
        bind_groups: &[wgpu::BindGroup],
    ) -> Result<(), ExecutionError> {
        let attachment = self
            .attachment
            .as_ref()
            .ok_or_else(|| ExecutionError::NoAttachment(self.label.clone()))?;

        let mut encoder = bindings.get_command_encoder(Some(&self.label));
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(&self.label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &attachment.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_viewport(
                0.0,
                0.0,
                attachment.shape.width as f32,
                attachment.shape.height as f32,
                0.0,
                1.0,
            );
            pass.set_pipeline(pipeline);
            for (index, group) in bind_groups.iter().enumerate() {
                pass.set_bind_group(index as u32, group, &[]);
            }
            pass.draw(0..FULLSCREEN_QUAD_VERTICES, 0..1);
        }
        bindings.submit_and_wait(Some(encoder.finish()));

        tracing::trace!(target_id = %self.id, texture = %attachment.texture, "quad drawn");
        Ok(())
    }
}
