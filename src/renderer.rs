// Renderer module for folio3d

use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};
use log::{debug, info, warn};
use thiserror::Error;
use wgpu::util::DeviceExt;
use wgpu::{Adapter, Buffer, Instance, RenderPipeline};
use winit::{dpi::PhysicalSize, event_loop::EventLoop, window::Window, window::WindowBuilder};

use crate::config::WindowConfig;
use crate::lighting::LightRig;
use crate::scene::{MaterialId, NodeId, PointLight, Scene};

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
/// Dynamic uniform offsets must be multiples of this.
const OBJECT_STRIDE: u64 = 256;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),
    #[error("failed to create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),
    #[error("no compatible GPU adapter")]
    NoAdapter,
    #[error("failed to open GPU device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error("surface supports no formats on this adapter")]
    NoSurfaceFormat,
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 3],
    normal: [f32; 3],
}

/// Per-frame camera and lighting block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SceneUniforms {
    view_proj: [[f32; 4]; 4],
    camera_pos: [f32; 4],
    ambient: [f32; 4],
    sun_dir: [f32; 4],
    sun_color: [f32; 4],
    spot_pos: [f32; 4],
    spot_dir: [f32; 4],
    spot_color: [f32; 4],
    spot_params: [f32; 4],
    lamp_pos: [f32; 4],
    lamp_color: [f32; 4],
    lamp_params: [f32; 4],
}

impl SceneUniforms {
    pub fn new(view_proj: Mat4, camera_pos: Vec3, lights: &LightRig, lamp: Option<(Vec3, &PointLight)>) -> Self {
        let sun_dir = (-lights.sun.position).normalize_or_zero();
        let spot = &lights.window;
        let spot_dir = (spot.target - spot.position).normalize_or_zero();
        let inner = spot.angle * (1.0 - spot.penumbra);
        let (lamp_pos, lamp_color, lamp_params) = match lamp {
            Some((position, light)) => (
                position.extend(1.0),
                light.color.extend(light.intensity),
                Vec4::new(light.distance, light.decay, 0.0, 0.0),
            ),
            None => (Vec4::ZERO, Vec4::ZERO, Vec4::ZERO),
        };

        Self {
            view_proj: view_proj.to_cols_array_2d(),
            camera_pos: camera_pos.extend(1.0).to_array(),
            ambient: (lights.ambient.color * lights.ambient.intensity).extend(0.0).to_array(),
            sun_dir: sun_dir.extend(0.0).to_array(),
            sun_color: (lights.sun.color * lights.sun.intensity).extend(0.0).to_array(),
            spot_pos: spot.position.extend(1.0).to_array(),
            spot_dir: spot_dir.extend(0.0).to_array(),
            spot_color: (spot.color * spot.intensity).extend(0.0).to_array(),
            spot_params: [spot.angle.cos(), inner.cos(), spot.distance, spot.decay],
            lamp_pos: lamp_pos.to_array(),
            lamp_color: lamp_color.to_array(),
            lamp_params: lamp_params.to_array(),
        }
    }
}

/// Per-draw transform and material block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ObjectUniforms {
    model: [[f32; 4]; 4],
    normal: [[f32; 4]; 4],
    base_color: [f32; 4],
    emissive: [f32; 4],
}

impl ObjectUniforms {
    pub fn new(model: Mat4, base_color: Vec4, emissive: Vec3, emissive_intensity: f32) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            normal: model.inverse().transpose().to_cols_array_2d(),
            base_color: base_color.to_array(),
            emissive: (emissive * emissive_intensity).extend(0.0).to_array(),
        }
    }
}

/// What the renderer needs besides the scene graph.
pub struct FrameView<'a> {
    pub view_proj: Mat4,
    pub camera_pos: Vec3,
    pub lights: &'a LightRig,
    pub lamp: Option<(Vec3, &'a PointLight)>,
}

struct GpuMesh {
    node: NodeId,
    material: MaterialId,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
}

pub struct Renderer {
    _instance: Instance,
    adapter: Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: wgpu::Surface<'static>,
    window: Arc<Window>,
    config: wgpu::SurfaceConfiguration,
    pipeline: RenderPipeline,
    double_sided_pipeline: RenderPipeline,
    scene_buffer: Buffer,
    scene_bind_group: wgpu::BindGroup,
    object_layout: wgpu::BindGroupLayout,
    object_buffer: Buffer,
    object_bind_group: wgpu::BindGroup,
    object_capacity: u64,
    depth_view: wgpu::TextureView,
    meshes: Vec<GpuMesh>,
}

fn create_depth_view(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Depth Texture"),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

fn create_object_buffer(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    capacity: u64,
) -> (Buffer, wgpu::BindGroup) {
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Object Uniform Buffer"),
        size: OBJECT_STRIDE * capacity.max(1),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Object Bind Group"),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &buffer,
                offset: 0,
                size: wgpu::BufferSize::new(std::mem::size_of::<ObjectUniforms>() as u64),
            }),
        }],
    });
    (buffer, bind_group)
}

impl Renderer {
    pub async fn new(event_loop: &EventLoop<()>, window_config: &WindowConfig) -> Result<Self, RendererError> {
        let window = Arc::new(
            WindowBuilder::new()
                .with_title(&window_config.title)
                .with_inner_size(PhysicalSize::new(window_config.width, window_config.height))
                .build(event_loop)?,
        );

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance.create_surface(window.clone())?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RendererError::NoAdapter)?;
        info!("Using adapter {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Renderer Device"),
                    required_features: wgpu::Features::default(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or(RendererError::NoSurfaceFormat)?;

        let size = window.inner_size();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: surface_caps
                .present_modes
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo),
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Scene Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shader.wgsl").into()),
        });

        let vertex_buffer_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
            ],
        };

        let scene_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Scene Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let object_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Object Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<ObjectUniforms>() as u64),
                },
                count: None,
            }],
        });

        let render_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Render Pipeline Layout"),
            bind_group_layouts: &[&scene_layout, &object_layout],
            push_constant_ranges: &[],
        });

        let make_pipeline = |label: &str, cull_mode: Option<wgpu::Face>| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&render_pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader_module,
                    entry_point: "vs_main",
                    buffers: &[vertex_buffer_layout.clone()],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader_module,
                    entry_point: "fs_main",
                    targets: &[Some(wgpu::ColorTargetState {
                        format: surface_format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode,
                    unclipped_depth: false,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    conservative: false,
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview: None,
            })
        };
        let pipeline = make_pipeline("Scene Pipeline", Some(wgpu::Face::Back));
        let double_sided_pipeline = make_pipeline("Double Sided Pipeline", None);

        let initial: SceneUniforms = bytemuck::Zeroable::zeroed();
        let scene_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Scene Uniform Buffer"),
            contents: bytemuck::bytes_of(&initial),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let scene_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Scene Bind Group"),
            layout: &scene_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: scene_buffer.as_entire_binding(),
            }],
        });

        let object_capacity = 64;
        let (object_buffer, object_bind_group) = create_object_buffer(&device, &object_layout, object_capacity);
        let depth_view = create_depth_view(&device, config.width, config.height);

        Ok(Self {
            _instance: instance,
            adapter,
            device,
            queue,
            surface,
            window,
            config,
            pipeline,
            double_sided_pipeline,
            scene_buffer,
            scene_bind_group,
            object_layout,
            object_buffer,
            object_bind_group,
            object_capacity,
            depth_view,
            meshes: Vec::new(),
        })
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        PhysicalSize::new(self.config.width, self.config.height)
    }

    /// Create GPU buffers for every mesh node, replacing any previous upload.
    pub fn upload_scene(&mut self, scene: &Scene) {
        self.meshes.clear();
        for node in scene.mesh_nodes() {
            let Some(mesh) = scene.node(node).and_then(|n| n.mesh).and_then(|m| scene.mesh(m)) else {
                continue;
            };
            if mesh.indices.is_empty() {
                continue;
            }
            let vertices: Vec<Vertex> = mesh
                .positions
                .iter()
                .enumerate()
                .map(|(i, p)| Vertex {
                    position: p.to_array(),
                    normal: mesh.normals.get(i).copied().unwrap_or(Vec3::Y).to_array(),
                })
                .collect();

            let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Vertex Buffer"),
                contents: bytemuck::cast_slice(&vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
            let index_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Index Buffer"),
                contents: bytemuck::cast_slice(&mesh.indices),
                usage: wgpu::BufferUsages::INDEX,
            });
            self.meshes.push(GpuMesh {
                node,
                material: mesh.material,
                vertex_buffer,
                index_buffer,
                index_count: mesh.indices.len() as u32,
            });
        }

        let needed = self.meshes.len() as u64;
        if needed > self.object_capacity {
            self.object_capacity = needed.next_power_of_two();
            let (buffer, bind_group) = create_object_buffer(&self.device, &self.object_layout, self.object_capacity);
            self.object_buffer = buffer;
            self.object_bind_group = bind_group;
        }
        debug!("Uploaded {} meshes", self.meshes.len());
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.device, &self.config);
        self.depth_view = create_depth_view(&self.device, new_size.width, new_size.height);
    }

    fn reconfigure(&mut self) {
        let caps = self.surface.get_capabilities(&self.adapter);
        if caps.formats.contains(&self.config.format) {
            self.surface.configure(&self.device, &self.config);
        }
    }

    /// Draw the scene, then let `overlay` record its own pass on the same frame.
    pub fn render<F>(&mut self, scene: &Scene, view: &FrameView<'_>, overlay: F)
    where
        F: FnOnce(&wgpu::Device, &wgpu::Queue, &mut wgpu::CommandEncoder, &wgpu::TextureView),
    {
        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.reconfigure();
                return;
            }
            Err(err) => {
                warn!("Skipping frame: {err}");
                return;
            }
        };

        let uniforms = SceneUniforms::new(view.view_proj, view.camera_pos, view.lights, view.lamp);
        self.queue
            .write_buffer(&self.scene_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        let mut objects = vec![0u8; (OBJECT_STRIDE as usize) * self.meshes.len()];
        for (i, mesh) in self.meshes.iter().enumerate() {
            let material = scene.material(mesh.material);
            let block = ObjectUniforms::new(
                scene.world_matrix(mesh.node),
                material.map_or(Vec4::ONE, |m| m.base_color),
                material.map_or(Vec3::ZERO, |m| m.emissive),
                material.map_or(0.0, |m| m.emissive_intensity),
            );
            let start = i * OBJECT_STRIDE as usize;
            let bytes = bytemuck::bytes_of(&block);
            objects[start..start + bytes.len()].copy_from_slice(bytes);
        }
        if !objects.is_empty() {
            self.queue.write_buffer(&self.object_buffer, 0, &objects);
        }

        let target = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Render Encoder"),
        });

        {
            let bg = view.lights.background;
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Scene Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: bg.x as f64,
                            g: bg.y as f64,
                            b: bg.z as f64,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            render_pass.set_bind_group(0, &self.scene_bind_group, &[]);
            for (i, mesh) in self.meshes.iter().enumerate() {
                let double_sided = scene.material(mesh.material).is_some_and(|m| m.double_sided);
                render_pass.set_pipeline(if double_sided {
                    &self.double_sided_pipeline
                } else {
                    &self.pipeline
                });
                let offset = (i as u64 * OBJECT_STRIDE) as u32;
                render_pass.set_bind_group(1, &self.object_bind_group, &[offset]);
                render_pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                render_pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                render_pass.draw_indexed(0..mesh.index_count, 0, 0..1);
            }
        }

        overlay(&self.device, &self.queue, &mut encoder, &target);

        self.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LightingPreset, WindowLightConfig};
    use approx::assert_relative_eq;

    #[test]
    fn uniform_blocks_fit_gpu_layout() {
        assert_eq!(std::mem::size_of::<SceneUniforms>() % 16, 0);
        assert!(std::mem::size_of::<ObjectUniforms>() as u64 <= OBJECT_STRIDE);
    }

    #[test]
    fn scene_uniforms_premultiply_intensity() {
        let rig = LightRig::from_preset(&LightingPreset::day(), &WindowLightConfig::default());
        let u = SceneUniforms::new(Mat4::IDENTITY, Vec3::ZERO, &rig, None);
        assert_relative_eq!(u.ambient[0], rig.ambient.color.x * 2.05, epsilon = 1e-5);
        // The sun shines from its position toward the origin.
        assert!(u.sun_dir[1] < 0.0);
        assert_eq!(u.lamp_color, [0.0; 4]);
        assert!(u.spot_params[0] < u.spot_params[1]);
    }

    #[test]
    fn lamp_light_is_packed() {
        let rig = LightRig::from_preset(&LightingPreset::night(), &WindowLightConfig::default());
        let light = PointLight {
            node: NodeId(0),
            color: Vec3::new(1.0, 0.9, 0.5),
            intensity: 3.0,
            distance: 5.0,
            decay: 2.0,
        };
        let u = SceneUniforms::new(Mat4::IDENTITY, Vec3::ZERO, &rig, Some((Vec3::X, &light)));
        assert_eq!(u.lamp_pos, [1.0, 0.0, 0.0, 1.0]);
        assert_relative_eq!(u.lamp_color[3], 3.0);
        assert_relative_eq!(u.lamp_params[0], 5.0);
    }

    #[test]
    fn object_emissive_includes_intensity() {
        let block = ObjectUniforms::new(Mat4::IDENTITY, Vec4::ONE, Vec3::new(1.0, 0.5, 0.0), 3.0);
        assert_eq!(block.emissive, [3.0, 1.5, 0.0, 0.0]);
        assert_eq!(block.normal, Mat4::IDENTITY.to_cols_array_2d());
    }
}
