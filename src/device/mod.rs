//! WGPU-accelerated engine: context acquisition and kernel compilation.
//!
//! Every [`DeviceContext`] owns its own device, queue and compiled
//! [`KernelSet`]; nothing is process-global, so two networks never share GPU
//! state. WGSL sources are embedded at compile time and pass a sanity check
//! before shader-module creation.
//!
//! WGSL has no portable `f64`, so all kernels compute in `f32` and host
//! `f64` values convert at the buffer boundary. The context still probes
//! whether the adapter could do 64-bit math and reports it as [`Precision`].

pub mod net;

use briny::prelude::*;

const FEED_FORWARD: &str = include_str!("shaders/feed_forward.wgsl");
const OUTPUT_GRADIENT: &str = include_str!("shaders/output_gradient.wgsl");
const HIDDEN_GRADIENT: &str = include_str!("shaders/hidden_gradient.wgsl");
const UPDATE_MOMENTUM: &str = include_str!("shaders/update_momentum.wgsl");
const UPDATE_ADAM: &str = include_str!("shaders/update_adam.wgsl");

/// Threads per workgroup, shared by every kernel.
pub(crate) const WORKGROUP_SIZE: u32 = 64;

/// How the accelerator path can fail.
#[derive(Debug)]
pub enum DeviceError {
    /// No adapter could be acquired.
    Adapter(wgpu::RequestAdapterError),
    /// The adapter refused to hand out a device.
    Device(wgpu::RequestDeviceError),
    /// A kernel source failed the pre-compilation sanity check.
    Shader(&'static str),
    /// A staging-buffer readback failed after dispatch.
    Readback(String),
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceError::Adapter(e) => write!(f, "adapter error: {e}"),
            DeviceError::Device(e) => write!(f, "device error: {e}"),
            DeviceError::Shader(label) => write!(f, "shader '{label}' failed validation"),
            DeviceError::Readback(msg) => write!(f, "readback error: {msg}"),
        }
    }
}

impl std::error::Error for DeviceError {}

/// The widest float the adapter could compute with. Kernels always run in
/// `f32`; [`Precision::Double`] only records that the hardware had the
/// capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Single,
    Double,
}

/// Owns the WGPU device and queue used for this network's dispatches.
pub struct DeviceContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub precision: Precision,
}

impl DeviceContext {
    /// Selects the default adapter and creates a device + queue.
    ///
    /// Uses `pollster::block_on` to wait out WGPU's async acquisition. The
    /// `SHADER_F64` feature is probed but never requested; it only decides
    /// what [`Precision`] to report.
    pub fn new() -> Result<Self, DeviceError> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                .map_err(DeviceError::Adapter)?;

        let precision = if adapter.features().contains(wgpu::Features::SHADER_F64) {
            Precision::Double
        } else {
            Precision::Single
        };

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("ffnet"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .map_err(DeviceError::Device)?;

        if precision == Precision::Single {
            log::info!("adapter has no 64-bit shader support, values quantize to f32 on upload");
        }

        Ok(Self {
            device,
            queue,
            precision,
        })
    }

    /// Whether a context can be acquired right now.
    pub fn available() -> bool {
        Self::new().is_ok()
    }
}

/// Wrapper for WGSL source so it can only reach shader-module creation
/// through validation.
struct WgslSource<'a>(&'a str);

impl<'a> Validate for WgslSource<'a> {
    fn validate(&self) -> Result<(), ValidationError> {
        let src = self.0;
        if src.len() > 65536 || !src.contains("fn main") {
            return Err(ValidationError);
        }
        if src.contains("import") || src.contains("#include") {
            return Err(ValidationError);
        }
        Ok(())
    }
}

fn load_shader(
    device: &wgpu::Device,
    label: &'static str,
    source: &str,
) -> Result<wgpu::ShaderModule, DeviceError> {
    WgslSource(source)
        .validate()
        .map_err(|_| DeviceError::Shader(label))?;

    Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    }))
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// A compiled compute pipeline plus the layout its bind groups follow.
pub(crate) struct Kernel {
    pub layout: wgpu::BindGroupLayout,
    pub pipeline: wgpu::ComputePipeline,
}

fn build_kernel(
    device: &wgpu::Device,
    label: &'static str,
    source: &str,
    entries: &[wgpu::BindGroupLayoutEntry],
) -> Result<Kernel, DeviceError> {
    let module = load_shader(device, label, source)?;
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries,
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: &module,
        entry_point: Some("main"),
        cache: None,
        compilation_options: wgpu::PipelineCompilationOptions::default(),
    });
    Ok(Kernel { layout, pipeline })
}

/// The five compute pipelines a network needs, compiled once per context.
pub(crate) struct KernelSet {
    pub feed_forward: Kernel,
    pub output_gradient: Kernel,
    pub hidden_gradient: Kernel,
    pub update_momentum: Kernel,
    pub update_adam: Kernel,
}

impl KernelSet {
    pub fn compile(device: &wgpu::Device) -> Result<Self, DeviceError> {
        // dims, inputs, weights, outputs
        let feed_forward = build_kernel(
            device,
            "feed_forward",
            FEED_FORWARD,
            &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
            ],
        )?;
        // dims, outputs, targets, gradients
        let output_gradient = build_kernel(
            device,
            "output_gradient",
            OUTPUT_GRADIENT,
            &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
            ],
        )?;
        // dims, next dims, outputs, next weights, next gradients, gradients
        let hidden_gradient = build_kernel(
            device,
            "hidden_gradient",
            HIDDEN_GRADIENT,
            &[
                uniform_entry(0),
                uniform_entry(1),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, true),
                storage_entry(5, false),
            ],
        )?;
        // params, inputs, gradients, weights, delta
        let update_momentum = build_kernel(
            device,
            "update_momentum",
            UPDATE_MOMENTUM,
            &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
                storage_entry(4, false),
            ],
        )?;
        // params, inputs, gradients, weights, m, v
        let update_adam = build_kernel(
            device,
            "update_adam",
            UPDATE_ADAM,
            &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
                storage_entry(4, false),
                storage_entry(5, false),
            ],
        )?;

        Ok(KernelSet {
            feed_forward,
            output_gradient,
            hidden_gradient,
            update_momentum,
            update_adam,
        })
    }
}

pub(crate) fn as_bytes<T: Copy>(data: &[T]) -> &[u8] {
    let len = std::mem::size_of_val(data);
    unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, len) }
}

pub(crate) fn bytes_to_f32_slice(data: &[u8]) -> Result<&[f32], DeviceError> {
    use std::mem::{align_of, size_of};

    if data.as_ptr() as usize % align_of::<f32>() != 0 {
        return Err(DeviceError::Readback("unaligned buffer".into()));
    }
    if data.len() % size_of::<f32>() != 0 {
        return Err(DeviceError::Readback(
            "buffer length is not a multiple of f32".into(),
        ));
    }

    let len = data.len() / size_of::<f32>();
    let ptr = data.as_ptr() as *const f32;
    unsafe { Ok(std::slice::from_raw_parts(ptr, len)) }
}
