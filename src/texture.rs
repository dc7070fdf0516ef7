//! Float textures living on the device.
//!
//! A [`TextureResource`] is a fixed size grid of four channel float texels. It is only
//! ever written whole (upload, or as a render attachment) and read whole (readback).

use std::fmt;

use crate::allocation::{Shape, Vec4f};
use crate::errors::TransferError;
use crate::interface::GraphicsBindings;

/// Texel layouts understood by the crate, resolved to the device format only at the
/// boundary with [`wgpu`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexelFormat {
    /// Four 32 bit float channels (r, g, b, a), 16 bytes per texel. Renderable, not
    /// filterable: kernels fetch exact texels.
    Rgba32Float,
}

impl TexelFormat {
    pub fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            TexelFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        }
    }

    pub fn bytes_per_texel(self) -> u32 {
        match self {
            TexelFormat::Rgba32Float => 16,
        }
    }
}

/// Identity of a device texture. Stable across [`crate::array::Array::swap`], which moves
/// textures between arrays instead of copying them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "texture#{}", self.0)
    }
}

/// Rows of a texture copy must be padded to [`wgpu::COPY_BYTES_PER_ROW_ALIGNMENT`].
pub(crate) fn padded_bytes_per_row(width: u32, format: TexelFormat) -> u32 {
    let unpadded = width * format.bytes_per_texel();
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Owns a 2D float texture and the uniform holding its reciprocal size.
///
/// The scale uniform is `(1 / width, 1 / height, 0, 0)` and never changes, since the
/// texture size is fixed at creation.
pub struct TextureResource {
    id: TextureId,
    shape: Shape,
    format: TexelFormat,
    texture: wgpu::Texture,
    scale: wgpu::Buffer,
}

impl TextureResource {
    /// Creates a zero filled texture of `shape`.
    pub fn new(bindings: &GraphicsBindings, label: &str, shape: Shape) -> TextureResource {
        let format = TexelFormat::Rgba32Float;
        let texture = bindings.device().create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: shape.extent(),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: format.to_wgpu(),
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let reciprocal = [
            1.0 / shape.width as f32,
            1.0 / shape.height as f32,
            0.0,
            0.0,
        ];
        let scale = bindings.get_buffer_init(
            &format!("{label}Scale"),
            bytemuck::cast_slice(&reciprocal),
            wgpu::BufferUsages::UNIFORM,
        );

        let id = TextureId(bindings.next_handle());
        tracing::debug!(%id, %shape, label, "texture created");

        TextureResource {
            id,
            shape,
            format,
            texture,
            scale,
        }
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn format(&self) -> TexelFormat {
        self.format
    }

    pub(crate) fn view(&self) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor::default())
    }

    pub(crate) fn scale_buffer(&self) -> &wgpu::Buffer {
        &self.scale
    }

    fn texel_count(&self) -> usize {
        self.shape.len()
    }

    fn check_len(&self, found: usize) -> Result<(), TransferError> {
        if found != self.texel_count() {
            return Err(TransferError::LengthMismatch {
                found,
                width: self.shape.width,
                height: self.shape.height,
            });
        }
        Ok(())
    }

    /// Replaces the whole texture with `texels`, row major, and blocks until the
    /// device has consumed the data.
    pub fn upload(
        &self,
        bindings: &GraphicsBindings,
        texels: &[Vec4f],
    ) -> Result<(), TransferError> {
        self.check_len(texels.len())?;
        bindings.queue().write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(texels),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(self.shape.width * self.format.bytes_per_texel()),
                rows_per_image: Some(self.shape.height),
            },
            self.shape.extent(),
        );
        bindings.submit_and_wait(std::iter::empty());
        Ok(())
    }

    /// Copies the whole texture into `out`, row major. Blocks until the copy is mapped.
    pub fn readback(
        &self,
        bindings: &GraphicsBindings,
        out: &mut [Vec4f],
    ) -> Result<(), TransferError> {
        self.check_len(out.len())?;

        let row_bytes = (self.shape.width * self.format.bytes_per_texel()) as usize;
        let padded_row = padded_bytes_per_row(self.shape.width, self.format);
        let staging = bindings.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("texel-calc readback"),
            size: padded_row as u64 * self.shape.height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = bindings.get_command_encoder(Some("texel-calc readback"));
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(self.shape.height),
                },
            },
            self.shape.extent(),
        );

        bindings.queue().submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        bindings.submit_and_wait(std::iter::empty());

        match pollster::block_on(receiver.receive()) {
            Some(result) => result?,
            None => return Err(TransferError::ChannelClosed),
        }

        {
            let mapped = slice.get_mapped_range();
            let out_bytes: &mut [u8] = bytemuck::cast_slice_mut(out);
            for (row, chunk) in out_bytes.chunks_exact_mut(row_bytes).enumerate() {
                let start = row * padded_row as usize;
                chunk.copy_from_slice(&mapped[start..start + row_bytes]);
            }
        }
        staging.unmap();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_padded_to_copy_alignment() {
        assert_eq!(padded_bytes_per_row(1, TexelFormat::Rgba32Float), 256);
        assert_eq!(padded_bytes_per_row(16, TexelFormat::Rgba32Float), 256);
        assert_eq!(padded_bytes_per_row(17, TexelFormat::Rgba32Float), 512);
    }

    #[test]
    fn format_resolves_at_the_boundary() {
        assert_eq!(
            TexelFormat::Rgba32Float.to_wgpu(),
            wgpu::TextureFormat::Rgba32Float
        );
        assert_eq!(
            TexelFormat::Rgba32Float.bytes_per_texel() as usize,
            std::mem::size_of::<Vec4f>()
        );
    }
}
