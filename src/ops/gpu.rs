//! GPU-accelerated tensor kernels using WGPU.
//!
//! Kernels are generated WGSL: the scalar operator tag of a `map`, `zip` or
//! `reduce` call is lowered to a WGSL expression and spliced into a fixed
//! kernel template. Compiled pipelines are cached by source.
//!
//! The GPU computes in `f32` over packed copies of the operands. Every entry
//! point returns `None` when it cannot run (no adapter, strided or broadcast
//! operands, no `f32` lowering for the operator, or more work than a single
//! dispatch) and the dispatch layer then falls back to the CPU. Selection
//! operators (`Max`, comparisons) always fall back so that equality masks
//! against the `f64` inputs stay exact.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use briny::prelude::*;
use wgpu::util::DeviceExt;

use super::{BinaryOp, ReduceOp, UnaryOp};
use crate::data::TensorData;
use crate::layout::Layout;

const WORKGROUP: u32 = 64;
const MAX_WORKGROUPS: u32 = 65_535;

const PARAMS: &str = "struct Params { len: u32, reduce_len: u32, inner: u32, pad: u32 }
@group(0) @binding(0) var<uniform> params: Params;
";

/// Holds the WGPU device and queue used for executing compute pipelines.
pub struct GpuContext {
    /// The actual GPU device.
    pub device: wgpu::Device,
    /// The submission queue of the device.
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Selects the default adapter and creates a device + queue.
    ///
    /// # Errors
    /// [`crate::Error::Backend`] if no adapter or device can be acquired.
    pub fn new() -> crate::Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                .map_err(|e| crate::Error::Backend(format!("adapter: {e}")))?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("minitorch"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .map_err(|e| crate::Error::Backend(format!("device: {e}")))?;

        Ok(Self { device, queue })
    }
}

/// Generated WGSL source, checked before compilation.
pub struct WgslSource<'a>(pub &'a str);

impl Validate for WgslSource<'_> {
    fn validate(&self) -> Result<(), ValidationError> {
        let src = self.0;
        if src.len() > 65536 || !src.contains("fn main") {
            return Err(ValidationError);
        }
        // generated expressions must not smuggle in extra declarations
        if src.matches("fn ").count() != 1 || src.contains("#include") {
            return Err(ValidationError);
        }
        Ok(())
    }
}

lazy_static::lazy_static! {
    static ref GPU_CONTEXT: Option<GpuContext> = match GpuContext::new() {
        Ok(ctx) => Some(ctx),
        Err(err) => {
            tracing::warn!(%err, "gpu backend unavailable, kernels will run on the cpu");
            None
        }
    };
    static ref PIPELINES: Mutex<HashMap<String, Arc<wgpu::ComputePipeline>>> =
        Mutex::new(HashMap::new());
}

/// Whether a GPU device could be initialised.
pub fn is_available() -> bool {
    GPU_CONTEXT.is_some()
}

fn literal(c: f64) -> Option<String> {
    let c = c as f32;
    c.is_finite().then(|| format!("f32({c})"))
}

fn unary_expr(op: UnaryOp) -> Option<String> {
    Some(match op {
        UnaryOp::Id => "x".into(),
        UnaryOp::Neg => "-x".into(),
        UnaryOp::Inv => "1.0 / x".into(),
        UnaryOp::Sigmoid => "1.0 / (1.0 + exp(-x))".into(),
        UnaryOp::Relu => "max(x, 0.0)".into(),
        UnaryOp::Log => "log(x + 1e-6)".into(),
        UnaryOp::Exp => "exp(x)".into(),
        UnaryOp::Tanh => "tanh(x)".into(),
        UnaryOp::AddScalar(c) => format!("x + {}", literal(c)?),
        UnaryOp::MulScalar(c) => format!("x * {}", literal(c)?),
        // WGSL `pow` is undefined for negative bases
        UnaryOp::PowScalar(_) => return None,
    })
}

fn binary_expr(op: BinaryOp) -> Option<&'static str> {
    Some(match op {
        BinaryOp::Add => "x + y",
        BinaryOp::Sub => "x - y",
        BinaryOp::Mul => "x * y",
        BinaryOp::Div => "x / y",
        BinaryOp::ReluBack => "select(0.0, y, x > 0.0)",
        BinaryOp::LogBack => "y / (x + 1e-6)",
        BinaryOp::InvBack => "-y / (x * x)",
        BinaryOp::Max | BinaryOp::Lt | BinaryOp::Eq | BinaryOp::IsClose => return None,
    })
}

fn reduce_expr(op: ReduceOp) -> Option<(&'static str, &'static str)> {
    match op {
        ReduceOp::Sum => Some(("0.0", "acc + v")),
        ReduceOp::Mul => Some(("1.0", "acc * v")),
        ReduceOp::Max => None,
    }
}

fn map_source(expr: &str) -> String {
    format!(
        "{PARAMS}@group(0) @binding(1) var<storage, read> a: array<f32>;
@group(0) @binding(2) var<storage, read_write> out: array<f32>;
@compute @workgroup_size({WORKGROUP})
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let i = gid.x;
    if (i >= params.len) {{ return; }}
    let x = a[i];
    out[i] = {expr};
}}
"
    )
}

fn zip_source(expr: &str) -> String {
    format!(
        "{PARAMS}@group(0) @binding(1) var<storage, read> a: array<f32>;
@group(0) @binding(2) var<storage, read> b: array<f32>;
@group(0) @binding(3) var<storage, read_write> out: array<f32>;
@compute @workgroup_size({WORKGROUP})
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let i = gid.x;
    if (i >= params.len) {{ return; }}
    let x = a[i];
    let y = b[i];
    out[i] = {expr};
}}
"
    )
}

fn reduce_source(identity: &str, combine: &str) -> String {
    format!(
        "{PARAMS}@group(0) @binding(1) var<storage, read> a: array<f32>;
@group(0) @binding(2) var<storage, read_write> out: array<f32>;
@compute @workgroup_size({WORKGROUP})
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let o = gid.x;
    if (o >= params.len) {{ return; }}
    let outer = o / params.inner;
    let i = o % params.inner;
    let base = outer * params.reduce_len * params.inner + i;
    var acc: f32 = {identity};
    for (var j: u32 = 0u; j < params.reduce_len; j = j + 1u) {{
        let v = a[base + j * params.inner];
        acc = {combine};
    }}
    out[o] = acc;
}}
"
    )
}

fn pipeline(ctx: &GpuContext, source: &str) -> Option<Arc<wgpu::ComputePipeline>> {
    let mut cache = PIPELINES.lock().ok()?;
    if let Some(p) = cache.get(source) {
        return Some(Arc::clone(p));
    }
    if WgslSource(source).validate().is_err() {
        tracing::warn!("rejected generated shader");
        return None;
    }
    let module = ctx.device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("minitorch_kernel"),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let p = Arc::new(ctx.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("minitorch_pipeline"),
        layout: None,
        module: &module,
        entry_point: Some("main"),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    }));
    cache.insert(source.to_owned(), Arc::clone(&p));
    Some(p)
}

fn to_bytes(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|&x| (x as f32).to_le_bytes()).collect()
}

/// Launches `source` over `out_len` invocations and reads back `out_len` floats.
fn run(source: &str, inputs: &[&[f64]], out_len: usize, params: [u32; 4]) -> Option<Vec<f64>> {
    let ctx = GPU_CONTEXT.as_ref()?;
    let groups = u32::try_from(out_len).ok()?.div_ceil(WORKGROUP);
    if out_len == 0 || groups > MAX_WORKGROUPS || inputs.iter().any(|i| i.is_empty()) {
        return None;
    }
    let pipeline = pipeline(ctx, source)?;
    let device = &ctx.device;

    let param_bytes: Vec<u8> = params.iter().flat_map(|p| p.to_le_bytes()).collect();
    let param_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("params"),
        contents: &param_bytes,
        usage: wgpu::BufferUsages::UNIFORM,
    });
    let input_bufs: Vec<wgpu::Buffer> = inputs
        .iter()
        .map(|values| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("input"),
                contents: &to_bytes(values),
                usage: wgpu::BufferUsages::STORAGE,
            })
        })
        .collect();
    let byte_len = (out_len * 4) as u64;
    let output_buf = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("output"),
        size: byte_len,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    });

    let mut entries = vec![wgpu::BindGroupEntry {
        binding: 0,
        resource: param_buf.as_entire_binding(),
    }];
    for (i, buf) in input_bufs.iter().enumerate() {
        entries.push(wgpu::BindGroupEntry {
            binding: i as u32 + 1,
            resource: buf.as_entire_binding(),
        });
    }
    entries.push(wgpu::BindGroupEntry {
        binding: input_bufs.len() as u32 + 1,
        resource: output_buf.as_entire_binding(),
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("kernel_bind_group"),
        layout: &pipeline.get_bind_group_layout(0),
        entries: &entries,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("kernel_encoder"),
    });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("kernel_pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(groups, 1, 1);
    }

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("staging"),
        size: byte_len,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    encoder.copy_buffer_to_buffer(&output_buf, 0, &staging, 0, byte_len);
    ctx.queue.submit(Some(encoder.finish()));

    staging.slice(..).map_async(wgpu::MapMode::Read, |_| {});
    device.poll(wgpu::PollType::Wait).ok()?;

    let out = {
        let view = staging.slice(..).get_mapped_range();
        view.chunks_exact(4)
            .map(|b| f64::from(f32::from_le_bytes([b[0], b[1], b[2], b[3]])))
            .collect()
    };
    staging.unmap();
    Some(out)
}

fn packed(shape: &[usize], out: Vec<f64>) -> TensorData {
    TensorData::from_parts(out.into(), Layout::contiguous(shape.to_vec()))
}

/// GPU `map`; `None` if the operand is strided or the operator has no lowering.
pub fn map(op: UnaryOp, a: &TensorData) -> Option<TensorData> {
    if !a.is_packed() {
        return None;
    }
    let source = map_source(&unary_expr(op)?);
    let len = u32::try_from(a.size()).ok()?;
    let out = run(&source, &[a.storage()], a.size(), [len, 0, 1, 0])?;
    Some(packed(a.shape(), out))
}

/// GPU `zip`; only same-shape packed operands are handled.
pub fn zip(op: BinaryOp, a: &TensorData, b: &TensorData, out_shape: &[usize]) -> Option<TensorData> {
    if !(a.is_packed() && b.is_packed() && a.shape() == out_shape && b.shape() == out_shape) {
        return None;
    }
    let source = zip_source(binary_expr(op)?);
    let len = u32::try_from(a.size()).ok()?;
    let out = run(&source, &[a.storage(), b.storage()], a.size(), [len, 0, 1, 0])?;
    Some(packed(out_shape, out))
}

/// GPU `reduce` over a packed operand.
pub fn reduce(op: ReduceOp, a: &TensorData, dim: usize) -> Option<TensorData> {
    if !a.is_packed() {
        return None;
    }
    let (identity, combine) = reduce_expr(op)?;
    let out_shape = super::reduced_shape(a.shape(), dim);
    let out_len: usize = out_shape.iter().product();
    let inner: usize = a.shape()[dim + 1..].iter().product();
    let params = [
        u32::try_from(out_len).ok()?,
        u32::try_from(a.shape()[dim]).ok()?,
        u32::try_from(inner.max(1)).ok()?,
        0,
    ];
    let out = run(&reduce_source(identity, combine), &[a.storage()], out_len, params)?;
    Some(packed(&out_shape, out))
}
