//! This module contains the code to interface with the GPU device.
//!
//! It's responsible of resolving the device once, at session start, and of handing it
//! to every other component as a plain reference. Nothing in the crate reaches the
//! device through global state.

use std::borrow::Cow;
use std::cell::Cell;

use wgpu::util::DeviceExt;

use crate::coding::Shader;
use crate::errors::SetupError;
use crate::texture::TexelFormat;

/// Settings used to pick and open the device.
///
/// The default honours the `WGPU_BACKEND` environment variable and asks the adapter
/// for its full limits, which matters for contexts holding many arrays: every array
/// costs one uniform slot per kernel.
#[derive(Debug, Clone)]
pub struct BindingsConfig {
    pub label: Option<String>,
    pub backends: wgpu::Backends,
    pub power_preference: wgpu::PowerPreference,
    pub force_fallback_adapter: bool,
    /// Request `adapter.limits()` instead of [`wgpu::Limits::default`].
    pub adapter_limits: bool,
}

impl Default for BindingsConfig {
    fn default() -> Self {
        BindingsConfig {
            label: Some("texel-calc".to_string()),
            backends: wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::all()),
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            adapter_limits: true,
        }
    }
}

/// Contains all the functions to interact with the GPU device in the machine.
///
/// A [`GraphicsBindings`] is resolved once with [`GraphicsBindings::new`] and then passed by
/// reference into textures, render targets and program builders. It also hands out the
/// numeric handles that identify device storage, so that exchanging storage between
/// arrays can be observed without reading pixels back.
pub struct GraphicsBindings {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    label: Option<String>,
    next_handle: Cell<u64>,
}

impl GraphicsBindings {
    /// This function sets up the connection with the GPU.
    ///
    /// To use it simply write
    /// ```no_run
    /// use texel_calc::interface::{BindingsConfig, GraphicsBindings};
    ///
    /// let config = BindingsConfig::default();
    /// let bindings = pollster::block_on(GraphicsBindings::new(config)).unwrap();
    /// ```
    /// It's an async function.
    ///
    /// # Errors
    /// - if no adapter is found for the configured backends
    /// - if the adapter can't render into four channel float textures
    /// - if the device refuses the requested limits
    pub async fn new(config: BindingsConfig) -> Result<GraphicsBindings, SetupError> {
        let adapter = GraphicsBindings::find_adapter(&config)
            .await
            .ok_or(SetupError::NoAdapter(config.backends))?;
        let info = adapter.get_info();

        let format = TexelFormat::Rgba32Float.to_wgpu();
        let features = adapter.get_texture_format_features(format);
        if !features
            .allowed_usages
            .contains(wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING)
        {
            return Err(SetupError::MissingCapability {
                adapter: info.name,
                format,
            });
        }

        let limits = if config.adapter_limits {
            adapter.limits()
        } else {
            wgpu::Limits::default()
        };

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: config.label.as_deref(),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits,
                },
                None,
            )
            .await?;

        tracing::info!(
            adapter = %info.name,
            backend = ?info.backend,
            "graphics bindings resolved"
        );

        Ok(GraphicsBindings {
            adapter,
            device,
            queue,
            label: config.label,
            next_handle: Cell::new(1),
        })
    }

    /// Finds the adapter matching the configuration, for [`GraphicsBindings::new`].
    async fn find_adapter(config: &BindingsConfig) -> Option<wgpu::Adapter> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: config.backends,
            ..Default::default()
        });

        instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power_preference,
                compatible_surface: None,
                force_fallback_adapter: config.force_fallback_adapter,
            })
            .await
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    /// The limits the device was opened with.
    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Hands out the next resource handle. Handles are never reused within a session.
    pub(crate) fn next_handle(&self) -> u64 {
        let handle = self.next_handle.get();
        self.next_handle.set(handle + 1);
        handle
    }

    /// This methods gives a Buffer initialised with `contents`
    pub(crate) fn get_buffer_init(
        &self,
        label: &str,
        contents: &[u8],
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            })
    }

    /// This method compiles the [`Shader`] into a module of this device.
    ///
    /// Note the method doesn't take ownership of the shader, so the same source can be
    /// compiled again on another device.
    pub(crate) fn get_shader_module(&self, label: &str, shader: &Shader) -> wgpu::ShaderModule {
        self.device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(shader.get_content())),
            })
    }

    pub(crate) fn get_bind_group_layout(
        &self,
        layout_descriptor: &wgpu::BindGroupLayoutDescriptor,
    ) -> wgpu::BindGroupLayout {
        self.device.create_bind_group_layout(layout_descriptor)
    }

    pub(crate) fn get_pipeline_layout(
        &self,
        pipeline_layout_descriptor: &wgpu::PipelineLayoutDescriptor,
    ) -> wgpu::PipelineLayout {
        self.device
            .create_pipeline_layout(pipeline_layout_descriptor)
    }

    pub(crate) fn get_command_encoder(&self, label: Option<&str>) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label })
    }

    /// Submits the command buffers and blocks until the device is idle.
    pub(crate) fn submit_and_wait<I: IntoIterator<Item = wgpu::CommandBuffer>>(
        &self,
        command_buffers: I,
    ) {
        self.queue.submit(command_buffers);
        let _ = self.device.poll(wgpu::Maintain::Wait);
    }

    /// Runs `f` inside a validation error scope.
    ///
    /// Returns the value produced by `f` along with the message of the first
    /// validation error raised while it ran, if any.
    pub(crate) fn capture_validation<T>(&self, f: impl FnOnce() -> T) -> (T, Option<String>) {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let error = pollster::block_on(self.device.pop_error_scope());
        (value, error.map(|e| e.to_string()))
    }
}
