//! wgpu driver
//!
//! Realizes the [`Driver`] trait on a wgpu device. State objects the trait
//! hands out map onto wgpu as follows: programs are validated shader module
//! pairs, samplers are real sampler objects, depth/stencil states are kept
//! as descriptor data and folded into the render pipeline at draw time. The
//! pipeline itself is cached per (program, state, target format) combination
//! since wgpu bakes all fixed-function state into it.
//!
//! The destination-read barrier is a texture-to-texture copy into each
//! target's shadow copy, which is what the pixel stage's `rt_copy` binding
//! samples.

use anyhow::Context as _;
use hashbrown::HashMap;
use tracing::{debug, info};

use crate::blend::{BlendFactor, BlendOp, HwBlend};
use crate::driver::{
    Driver, DriverError, RawDepthStencil, RawProgram, RawSampler, Stage, TargetId, TargetSet,
    Topology,
};
use crate::selector::{ColorMaskSelector, DepthStencilSelector, SamplerSelector};
use crate::uniforms::{PsConstants, VsConstants};

/// Vertex layout shared by every program: position, uv, color, fog.
pub const VERTEX_STRIDE: u64 = 40;

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 4] = [
    wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32x3,
        offset: 0,
        shader_location: 0,
    },
    wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32x2,
        offset: 12,
        shader_location: 1,
    },
    wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32x4,
        offset: 20,
        shader_location: 2,
    },
    wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32,
        offset: 36,
        shader_location: 3,
    },
];

struct ProgramRecord {
    vs: wgpu::ShaderModule,
    fs: wgpu::ShaderModule,
}

struct ColorTargetRecord {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    /// Shadow copy read by destination-dependent permutations.
    copy: wgpu::Texture,
    copy_view: wgpu::TextureView,
    format: wgpu::TextureFormat,
    size: (u32, u32),
}

struct DepthTargetRecord {
    view: wgpu::TextureView,
}

/// Everything that feeds pipeline creation, minus the blend constant (set on
/// the pass, so it never forces a new pipeline).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: u32,
    depth_stencil: u32,
    blend: Option<(BlendOp, BlendFactor, BlendFactor)>,
    color_mask: u32,
    format: wgpu::TextureFormat,
    has_depth: bool,
    topology: Topology,
}

#[derive(Default)]
struct BoundState {
    program: Option<RawProgram>,
    sampler: Option<RawSampler>,
    depth_stencil: Option<RawDepthStencil>,
    targets: Option<TargetSet>,
    texture: Option<TargetId>,
    color_mask: ColorMaskSelector,
    blend: Option<HwBlend>,
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,

    programs: Vec<ProgramRecord>,
    samplers: Vec<wgpu::Sampler>,
    depth_states: Vec<DepthStencilSelector>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,

    color_targets: HashMap<TargetId, ColorTargetRecord>,
    depth_targets: HashMap<TargetId, DepthTargetRecord>,

    bound: BoundState,

    vertex_buffer: wgpu::Buffer,
    vertex_capacity: u64,
    vertex_len: u64,
    vs_uniforms: wgpu::Buffer,
    ps_uniforms: wgpu::Buffer,

    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,

    fallback_view: wgpu::TextureView,
    fallback_sampler: wgpu::Sampler,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("texture_layout"),
            entries: &[
                texture_entry(0),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                texture_entry(2),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("tfx_pipeline_layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        let vertex_capacity = 64 * 1024;
        let vertex_buffer = Self::make_vertex_buffer(&device, vertex_capacity);

        let vs_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("vs_uniforms"),
            size: std::mem::size_of::<VsConstants>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let ps_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ps_uniforms"),
            size: std::mem::size_of::<PsConstants>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // 1x1 white placeholder for draws with no source texture.
        let fallback = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("fallback_texture"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &fallback,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[255u8; 4],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        let fallback_view = fallback.create_view(&wgpu::TextureViewDescriptor::default());
        let fallback_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("fallback_sampler"),
            ..Default::default()
        });

        info!("wgpu driver initialized");

        Self {
            device,
            queue,
            programs: Vec::new(),
            samplers: Vec::new(),
            depth_states: Vec::new(),
            pipelines: HashMap::new(),
            color_targets: HashMap::new(),
            depth_targets: HashMap::new(),
            bound: BoundState::default(),
            vertex_buffer,
            vertex_capacity,
            vertex_len: 0,
            vs_uniforms,
            ps_uniforms,
            uniform_layout,
            texture_layout,
            pipeline_layout,
            fallback_view,
            fallback_sampler,
        }
    }

    /// Request an adapter and device suitable for this driver.
    pub async fn request(instance: &wgpu::Instance) -> anyhow::Result<(wgpu::Device, wgpu::Queue)> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("no suitable graphics adapter")?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("gsforge_device"),
                required_features: wgpu::Features::empty(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .context("device request failed")?;

        Ok((device, queue))
    }

    /// Register a color target the engine can draw to and sample from. The
    /// shadow copy for destination reads is allocated alongside.
    pub fn register_color_target(
        &mut self,
        id: TargetId,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) {
        let descriptor = wgpu::TextureDescriptor {
            label: Some("color_target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        };
        let texture = self.device.create_texture(&descriptor);
        let copy = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("color_target_copy"),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            ..descriptor
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let copy_view = copy.create_view(&wgpu::TextureViewDescriptor::default());
        self.color_targets.insert(
            id,
            ColorTargetRecord {
                texture,
                view,
                copy,
                copy_view,
                format,
                size: (width, height),
            },
        );
    }

    pub fn register_depth_target(&mut self, id: TargetId, width: u32, height: u32) {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth_target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Depth24PlusStencil8,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.depth_targets.insert(id, DepthTargetRecord { view });
    }

    pub fn unregister_target(&mut self, id: TargetId) {
        self.color_targets.remove(&id);
        self.depth_targets.remove(&id);
    }

    fn make_vertex_buffer(device: &wgpu::Device, capacity: u64) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tfx_vertices"),
            size: capacity,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn state(msg: &str) -> DriverError {
        DriverError::State(msg.to_string())
    }

    fn map_factor(factor: BlendFactor) -> wgpu::BlendFactor {
        match factor {
            BlendFactor::Zero => wgpu::BlendFactor::Zero,
            BlendFactor::One => wgpu::BlendFactor::One,
            BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
            BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
            BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
            BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
            BlendFactor::Constant => wgpu::BlendFactor::Constant,
            BlendFactor::OneMinusConstant => wgpu::BlendFactor::OneMinusConstant,
            BlendFactor::Dst => wgpu::BlendFactor::Dst,
        }
    }

    fn map_op(op: BlendOp) -> wgpu::BlendOperation {
        match op {
            BlendOp::Add => wgpu::BlendOperation::Add,
            BlendOp::Subtract => wgpu::BlendOperation::Subtract,
            BlendOp::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
        }
    }

    fn map_topology(topology: Topology) -> wgpu::PrimitiveTopology {
        match topology {
            Topology::Points => wgpu::PrimitiveTopology::PointList,
            Topology::Lines => wgpu::PrimitiveTopology::LineList,
            Topology::Triangles => wgpu::PrimitiveTopology::TriangleList,
        }
    }

    fn color_writes(mask: ColorMaskSelector) -> wgpu::ColorWrites {
        let mut writes = wgpu::ColorWrites::empty();
        if mask.wr() {
            writes |= wgpu::ColorWrites::RED;
        }
        if mask.wg() {
            writes |= wgpu::ColorWrites::GREEN;
        }
        if mask.wb() {
            writes |= wgpu::ColorWrites::BLUE;
        }
        if mask.wa() {
            writes |= wgpu::ColorWrites::ALPHA;
        }
        writes
    }

    fn depth_stencil_state(sel: DepthStencilSelector) -> wgpu::DepthStencilState {
        let compare = match sel.ztst() {
            0 => wgpu::CompareFunction::Never,
            1 => wgpu::CompareFunction::Always,
            2 => wgpu::CompareFunction::GreaterEqual,
            _ => wgpu::CompareFunction::Greater,
        };
        // Destination-alpha test via the stencil unit: pixels that passed the
        // priming pass carry reference 1.
        let stencil_face = wgpu::StencilFaceState {
            compare: if sel.date() {
                wgpu::CompareFunction::Equal
            } else {
                wgpu::CompareFunction::Always
            },
            fail_op: wgpu::StencilOperation::Keep,
            depth_fail_op: wgpu::StencilOperation::Keep,
            pass_op: if sel.date_one() {
                wgpu::StencilOperation::Zero
            } else {
                wgpu::StencilOperation::Keep
            },
        };
        wgpu::DepthStencilState {
            format: wgpu::TextureFormat::Depth24PlusStencil8,
            depth_write_enabled: sel.zwe(),
            depth_compare: compare,
            stencil: wgpu::StencilState {
                front: stencil_face,
                back: stencil_face,
                read_mask: 0xff,
                write_mask: 0xff,
            },
            bias: wgpu::DepthBiasState::default(),
        }
    }

    fn pipeline_for(&mut self, key: PipelineKey) -> Result<&wgpu::RenderPipeline, DriverError> {
        if !self.pipelines.contains_key(&key) {
            let program = self
                .programs
                .get(key.program as usize)
                .ok_or_else(|| Self::state("unknown program id"))?;
            let blend = key.blend.map(|(op, src, dst)| wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: Self::map_factor(src),
                    dst_factor: Self::map_factor(dst),
                    operation: Self::map_op(op),
                },
                alpha: wgpu::BlendComponent::REPLACE,
            });
            let depth_stencil = if key.has_depth {
                let sel = *self
                    .depth_states
                    .get(key.depth_stencil as usize)
                    .ok_or_else(|| Self::state("unknown depth/stencil id"))?;
                Some(Self::depth_stencil_state(sel))
            } else {
                None
            };

            let pipeline = self
                .device
                .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some("tfx_pipeline"),
                    layout: Some(&self.pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &program.vs,
                        entry_point: Some("vs"),
                        compilation_options: Default::default(),
                        buffers: &[wgpu::VertexBufferLayout {
                            array_stride: VERTEX_STRIDE,
                            step_mode: wgpu::VertexStepMode::Vertex,
                            attributes: &VERTEX_ATTRIBUTES,
                        }],
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &program.fs,
                        entry_point: Some("fs"),
                        compilation_options: Default::default(),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: key.format,
                            blend,
                            write_mask: Self::color_writes(ColorMaskSelector::from_raw(
                                key.color_mask,
                            )),
                        })],
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: Self::map_topology(key.topology),
                        strip_index_format: None,
                        front_face: wgpu::FrontFace::Ccw,
                        cull_mode: None,
                        unclipped_depth: false,
                        polygon_mode: wgpu::PolygonMode::Fill,
                        conservative: false,
                    },
                    depth_stencil,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                });
            debug!(pipelines = self.pipelines.len() + 1, "created render pipeline");
            self.pipelines.insert(key, pipeline);
        }
        Ok(&self.pipelines[&key])
    }
}

impl Driver for WgpuDevice {
    fn compile_program(
        &mut self,
        vs_source: &str,
        ps_source: &str,
    ) -> Result<RawProgram, DriverError> {
        // Validate up front so a bad permutation surfaces as a compile error
        // instead of a device loss inside create_shader_module.
        for (label, source) in [("vertex", vs_source), ("pixel", ps_source)] {
            let module = naga::front::wgsl::parse_str(source)
                .map_err(|e| DriverError::Compile(format!("{label}: {}", e.emit_to_string(source))))?;
            naga::valid::Validator::new(
                naga::valid::ValidationFlags::all(),
                naga::valid::Capabilities::all(),
            )
            .validate(&module)
            .map_err(|e| DriverError::Compile(format!("{label}: {e:?}")))?;
        }

        let vs = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("tfx_vs"),
                source: wgpu::ShaderSource::Wgsl(vs_source.into()),
            });
        let fs = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("tfx_fs"),
                source: wgpu::ShaderSource::Wgsl(ps_source.into()),
            });

        let id = self.programs.len() as u32;
        self.programs.push(ProgramRecord { vs, fs });
        Ok(RawProgram(id))
    }

    fn create_sampler(&mut self, sel: SamplerSelector) -> Result<RawSampler, DriverError> {
        let address = |wrap: bool| {
            if wrap {
                wgpu::AddressMode::Repeat
            } else {
                wgpu::AddressMode::ClampToEdge
            }
        };
        let filter = if sel.biln() {
            wgpu::FilterMode::Linear
        } else {
            wgpu::FilterMode::Nearest
        };
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("tfx_sampler"),
            address_mode_u: address(sel.tau()),
            address_mode_v: address(sel.tav()),
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: if sel.triln() != 0 {
                wgpu::FilterMode::Linear
            } else {
                wgpu::FilterMode::Nearest
            },
            lod_min_clamp: 0.0,
            lod_max_clamp: 32.0,
            compare: None,
            anisotropy_clamp: if sel.aniso() { 16 } else { 1 },
            border_color: None,
        });

        let id = self.samplers.len() as u32;
        self.samplers.push(sampler);
        Ok(RawSampler(id))
    }

    fn create_depth_stencil(
        &mut self,
        sel: DepthStencilSelector,
    ) -> Result<RawDepthStencil, DriverError> {
        // Realized inside the pipeline; only the selector is retained.
        let id = self.depth_states.len() as u32;
        self.depth_states.push(sel);
        Ok(RawDepthStencil(id))
    }

    fn bind_program(&mut self, program: RawProgram) -> Result<(), DriverError> {
        self.bound.program = Some(program);
        Ok(())
    }

    fn bind_sampler(&mut self, sampler: RawSampler) -> Result<(), DriverError> {
        self.bound.sampler = Some(sampler);
        Ok(())
    }

    fn bind_depth_stencil(&mut self, dss: RawDepthStencil) -> Result<(), DriverError> {
        self.bound.depth_stencil = Some(dss);
        Ok(())
    }

    fn bind_render_target(&mut self, targets: TargetSet) -> Result<(), DriverError> {
        if !self.color_targets.contains_key(&targets.color) {
            return Err(Self::state("unregistered color target"));
        }
        if let Some(depth) = targets.depth {
            if !self.depth_targets.contains_key(&depth) {
                return Err(Self::state("unregistered depth target"));
            }
        }
        self.bound.targets = Some(targets);
        Ok(())
    }

    fn bind_texture(&mut self, texture: TargetId) -> Result<(), DriverError> {
        if !self.color_targets.contains_key(&texture) {
            return Err(Self::state("unregistered source texture"));
        }
        self.bound.texture = Some(texture);
        Ok(())
    }

    fn bind_color_mask(&mut self, mask: ColorMaskSelector) -> Result<(), DriverError> {
        self.bound.color_mask = mask;
        Ok(())
    }

    fn bind_blend(&mut self, blend: Option<HwBlend>) -> Result<(), DriverError> {
        self.bound.blend = blend;
        Ok(())
    }

    fn upload_uniforms(&mut self, stage: Stage, bytes: &[u8]) -> Result<(), DriverError> {
        let buffer = match stage {
            Stage::Vertex => &self.vs_uniforms,
            Stage::Pixel => &self.ps_uniforms,
        };
        if bytes.len() as u64 != buffer.size() {
            return Err(Self::state("uniform block size mismatch"));
        }
        self.queue.write_buffer(buffer, 0, bytes);
        Ok(())
    }

    fn upload_vertices(&mut self, bytes: &[u8]) -> Result<(), DriverError> {
        let needed = bytes.len() as u64;
        if needed > self.vertex_capacity {
            self.vertex_capacity = needed.next_power_of_two();
            self.vertex_buffer = Self::make_vertex_buffer(&self.device, self.vertex_capacity);
            debug!(capacity = self.vertex_capacity, "grew vertex buffer");
        }
        if !bytes.is_empty() {
            self.queue.write_buffer(&self.vertex_buffer, 0, bytes);
        }
        self.vertex_len = needed;
        Ok(())
    }

    fn texture_barrier(&mut self) -> Result<(), DriverError> {
        let targets = self
            .bound
            .targets
            .ok_or_else(|| Self::state("barrier without a bound render target"))?;
        let record = self
            .color_targets
            .get(&targets.color)
            .ok_or_else(|| Self::state("unregistered color target"))?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("texture_barrier"),
            });
        encoder.copy_texture_to_texture(
            record.texture.as_image_copy(),
            record.copy.as_image_copy(),
            wgpu::Extent3d {
                width: record.size.0,
                height: record.size.1,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit([encoder.finish()]);
        Ok(())
    }

    fn draw(&mut self, first: u32, count: u32, topology: Topology) -> Result<(), DriverError> {
        let program = self
            .bound
            .program
            .ok_or_else(|| Self::state("draw without a bound program"))?;
        let dss = self
            .bound
            .depth_stencil
            .ok_or_else(|| Self::state("draw without a bound depth/stencil state"))?;
        let targets = self
            .bound
            .targets
            .ok_or_else(|| Self::state("draw without a bound render target"))?;
        let format = self
            .color_targets
            .get(&targets.color)
            .ok_or_else(|| Self::state("unregistered color target"))?
            .format;

        let key = PipelineKey {
            program: program.0,
            depth_stencil: dss.0,
            blend: self.bound.blend.map(|b| (b.op, b.src, b.dst)),
            color_mask: self.bound.color_mask.raw(),
            format,
            has_depth: targets.depth.is_some(),
            topology,
        };
        let pipeline = self.pipeline_for(key)?.clone();

        let target = &self.color_targets[&targets.color];
        let uniform_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform_group"),
            layout: &self.uniform_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.vs_uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.ps_uniforms.as_entire_binding(),
                },
            ],
        });

        let source_view = self
            .bound
            .texture
            .and_then(|id| self.color_targets.get(&id))
            .map(|r| &r.view)
            .unwrap_or(&self.fallback_view);
        let sampler = self
            .bound
            .sampler
            .and_then(|s| self.samplers.get(s.0 as usize))
            .unwrap_or(&self.fallback_sampler);
        let texture_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texture_group"),
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&target.copy_view),
                },
            ],
        });

        let blend_constant = self.bound.blend.map(|b| b.constant as f64).unwrap_or(1.0);
        let color_view = &target.view;
        let depth_view = targets
            .depth
            .and_then(|id| self.depth_targets.get(&id))
            .map(|r| &r.view);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("tfx_draw"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("tfx_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color_view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: depth_view.map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        }),
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &uniform_group, &[]);
            pass.set_bind_group(1, &texture_group, &[]);
            pass.set_vertex_buffer(0, self.vertex_buffer.slice(..self.vertex_len));
            pass.set_blend_constant(wgpu::Color {
                r: blend_constant,
                g: blend_constant,
                b: blend_constant,
                a: blend_constant,
            });
            pass.set_stencil_reference(1);
            pass.draw(first..first + count, 0..1);
        }
        self.queue.submit([encoder.finish()]);
        Ok(())
    }

    fn release_all(&mut self) {
        self.programs.clear();
        self.samplers.clear();
        self.depth_states.clear();
        self.pipelines.clear();
        self.bound = BoundState::default();
        debug!("released all driver objects");
    }
}
