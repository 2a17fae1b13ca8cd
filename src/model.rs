use crate::error::{RenderError, RenderResult};
use crate::gpu;
use crate::renderer::Renderer;
use ash::vk;
use glam::{Mat4, Quat, Vec3, Vec4};
use std::path::Path;

/// Interleaved vertex layout shared by every primitive.
#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv0: [f32; 2],
    pub joints0: [u16; 4],
    pub weights0: [f32; 4],
}

fn as_bytes<T: Copy>(slice: &[T]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(slice.as_ptr().cast::<u8>(), std::mem::size_of_val(slice))
    }
}

/// Index data decoded once at load into one of the two widths the device
/// binds directly. 8-bit source indices are widened to 16 bits here so the
/// draw path never has to special-case them.
pub enum IndexData {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexData {
    pub fn from_u8(indices: impl IntoIterator<Item = u8>) -> IndexData {
        IndexData::U16(indices.into_iter().map(u16::from).collect())
    }

    pub fn len(&self) -> usize {
        match self {
            IndexData::U16(v) => v.len(),
            IndexData::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index_type(&self) -> vk::IndexType {
        match self {
            IndexData::U16(_) => vk::IndexType::UINT16,
            IndexData::U32(_) => vk::IndexType::UINT32,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            IndexData::U16(v) => as_bytes(v),
            IndexData::U32(v) => as_bytes(v),
        }
    }
}

/// One draw call's worth of geometry inside the model's shared buffers.
pub struct Primitive {
    pub first_index: u32,
    pub index_count: u32,
    pub material: Option<usize>,
}

pub struct Mesh {
    pub primitives: Vec<Primitive>,
}

pub struct Material {
    pub name: Option<String>,
    pub base_color_factor: [f32; 4],
}

/// Scene-graph node stored in a flat arena. Parents and children refer to
/// each other by arena index, never by pointer.
pub struct Node {
    pub name: Option<String>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub mesh: Option<usize>,
    pub skin: Option<usize>,
}

impl Node {
    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

/// A skin's joints, its inverse bind matrices, and one host-visible
/// joint-matrix buffer per frame slot so an in-flight frame never reads
/// matrices the next frame is writing.
pub struct Skin {
    pub name: Option<String>,
    pub joints: Vec<usize>,
    pub inverse_bind_matrices: Vec<Mat4>,
    pub joint_buffers: Vec<gpu::DeviceBuffer>,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Interpolation {
    Step,
    Linear,
}

pub struct AnimationSampler {
    pub interpolation: Interpolation,
    /// Keyframe timestamps, seconds, ascending.
    pub inputs: Vec<f32>,
    /// One value per timestamp. Rotations are quaternion xyzw; vectors use
    /// xyz and leave w zero.
    pub outputs: Vec<Vec4>,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ChannelPath {
    Translation,
    Rotation,
    Scale,
}

pub struct AnimationChannel {
    pub path: ChannelPath,
    pub node: usize,
    pub sampler: usize,
}

pub struct Animation {
    pub name: Option<String>,
    pub samplers: Vec<AnimationSampler>,
    pub channels: Vec<AnimationChannel>,
    pub start: f32,
    pub end: f32,
    pub current_time: f32,
}

/// Locates the keyframe segment containing `t` and the normalized mix
/// factor inside it. Returns `None` when there are fewer than two
/// keyframes or `t` lies outside the track.
pub fn keyframe_segment(inputs: &[f32], t: f32) -> Option<(usize, f32)> {
    if inputs.len() < 2 {
        return None;
    }
    for i in 0..inputs.len() - 1 {
        if t >= inputs[i] && t <= inputs[i + 1] {
            let span = inputs[i + 1] - inputs[i];
            let factor = if span > 0.0 { (t - inputs[i]) / span } else { 0.0 };
            return Some((i, factor));
        }
    }
    None
}

impl AnimationSampler {
    fn sample_vec3(&self, t: f32) -> Option<Vec3> {
        let (i, factor) = keyframe_segment(&self.inputs, t)?;
        let a = self.outputs.get(i)?.truncate();
        let b = self.outputs.get(i + 1)?.truncate();
        Some(match self.interpolation {
            Interpolation::Step => a,
            Interpolation::Linear => a.lerp(b, factor),
        })
    }

    fn sample_quat(&self, t: f32) -> Option<Quat> {
        let (i, factor) = keyframe_segment(&self.inputs, t)?;
        let a = Quat::from_vec4(*self.outputs.get(i)?).normalize();
        let b = Quat::from_vec4(*self.outputs.get(i + 1)?).normalize();
        Some(match self.interpolation {
            Interpolation::Step => a,
            Interpolation::Linear => a.slerp(b, factor).normalize(),
        })
    }
}

/// A loaded glTF scene: flat node arena, geometry uploaded to device-local
/// buffers, skins with per-slot joint buffers, and keyframe animations
/// sampled on the host.
pub struct Model {
    pub nodes: Vec<Node>,
    pub roots: Vec<usize>,
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
    pub skins: Vec<Skin>,
    pub animations: Vec<Animation>,
    pub vertex_buffer: gpu::DeviceBuffer,
    pub index_buffer: gpu::DeviceBuffer,
    pub indices: IndexData,
    pub active_animation: Option<usize>,
}

impl Model {
    pub fn load(path: impl AsRef<Path>, renderer: &mut Renderer) -> RenderResult<Model> {
        let (document, buffers, _images) = gltf::import(path.as_ref())?;

        let materials = document
            .materials()
            .map(|m| Material {
                name: m.name().map(str::to_string),
                base_color_factor: m.pbr_metallic_roughness().base_color_factor(),
            })
            .collect();

        let (meshes, vertices, indices) = load_meshes(&document, &buffers)?;
        let (nodes, roots) = load_nodes(&document)?;
        let skins = load_skins(&document, &buffers, renderer)?;
        let animations = load_animations(&document, &buffers)?;

        if vertices.is_empty() || indices.is_empty() {
            return Err(RenderError::InvalidScene("model has no geometry"));
        }

        let vertex_bytes = as_bytes(&vertices);
        let vertex_buffer = gpu::DeviceBuffer::new_gpu_only(
            "model vertices",
            vertex_bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            renderer.device().clone(),
            renderer.allocator().clone(),
        )?;
        renderer.upload(vertex_bytes, &vertex_buffer)?;

        let index_buffer = gpu::DeviceBuffer::new_gpu_only(
            "model indices",
            indices.as_bytes().len() as vk::DeviceSize,
            vk::BufferUsageFlags::INDEX_BUFFER,
            renderer.device().clone(),
            renderer.allocator().clone(),
        )?;
        renderer.upload(indices.as_bytes(), &index_buffer)?;

        log::info!(
            "loaded model: {} nodes, {} meshes, {} skins, {} animations",
            nodes.len(),
            meshes.len(),
            skins.len(),
            animations.len()
        );

        Ok(Model {
            nodes,
            roots,
            meshes,
            materials,
            skins,
            animations,
            vertex_buffer,
            index_buffer,
            indices,
            active_animation: if document.animations().len() > 0 {
                Some(0)
            } else {
                None
            },
        })
    }

    /// World matrix of `node`, composed root-down through the arena.
    pub fn global_transform(&self, node: usize) -> Mat4 {
        let mut matrix = self.nodes[node].local_matrix();
        let mut parent = self.nodes[node].parent;
        while let Some(p) = parent {
            matrix = self.nodes[p].local_matrix() * matrix;
            parent = self.nodes[p].parent;
        }
        matrix
    }

    /// Advances the active animation by `dt` seconds, looping at the end,
    /// and applies its channels to the node arena.
    pub fn update_animation(&mut self, dt: f32) {
        let Some(index) = self.active_animation else {
            return;
        };
        let animation = &mut self.animations[index];
        animation.current_time += dt;
        if animation.current_time > animation.end {
            animation.current_time =
                animation.start + (animation.current_time - animation.end) % (animation.end - animation.start).max(f32::EPSILON);
        }
        let t = animation.current_time;

        for channel in animation.channels.iter() {
            let sampler = &animation.samplers[channel.sampler];
            let node = &mut self.nodes[channel.node];
            match channel.path {
                ChannelPath::Translation => {
                    if let Some(v) = sampler.sample_vec3(t) {
                        node.translation = v;
                    }
                }
                ChannelPath::Scale => {
                    if let Some(v) = sampler.sample_vec3(t) {
                        node.scale = v;
                    }
                }
                ChannelPath::Rotation => {
                    if let Some(q) = sampler.sample_quat(t) {
                        node.rotation = q;
                    }
                }
            }
        }
    }

    /// Recomputes every skin's joint matrices and writes them into the
    /// joint buffer owned by `slot`. Call once per frame after
    /// `update_animation`, with the renderer's active slot.
    pub fn update_joints(&mut self, slot: usize) {
        for node_index in 0..self.nodes.len() {
            let Some(skin_index) = self.nodes[node_index].skin else {
                continue;
            };
            let inverse_root = self.global_transform(node_index).inverse();

            let matrices: Vec<Mat4> = self.skins[skin_index]
                .joints
                .iter()
                .zip(self.skins[skin_index].inverse_bind_matrices.iter())
                .map(|(&joint, &ibm)| inverse_root * self.global_transform(joint) * ibm)
                .collect();

            let skin = &mut self.skins[skin_index];
            if !skin.joint_buffers[slot].write(0, as_bytes(&matrices)) {
                log::warn!("joint matrix write overflowed skin buffer, skipping");
            }
        }
    }
}

fn load_meshes(
    document: &gltf::Document,
    buffers: &[gltf::buffer::Data],
) -> RenderResult<(Vec<Mesh>, Vec<Vertex>, IndexData)> {
    let mut meshes = Vec::new();
    let mut vertices: Vec<Vertex> = Vec::new();
    let mut indices_u32: Vec<u32> = Vec::new();
    let mut widest_index = 0u32;

    for mesh in document.meshes() {
        let mut primitives = Vec::new();
        for primitive in mesh.primitives() {
            let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));

            let vertex_base = vertices.len() as u32;
            let positions = reader
                .read_positions()
                .ok_or(RenderError::InvalidScene("primitive without positions"))?;
            for position in positions {
                vertices.push(Vertex {
                    position,
                    ..Vertex::default()
                });
            }
            if let Some(normals) = reader.read_normals() {
                for (i, normal) in normals.enumerate() {
                    vertices[vertex_base as usize + i].normal = normal;
                }
            }
            if let Some(gltf::mesh::util::ReadTexCoords::F32(uvs)) = reader.read_tex_coords(0) {
                for (i, uv) in uvs.enumerate() {
                    vertices[vertex_base as usize + i].uv0 = uv;
                }
            }
            if let Some(joints) = reader.read_joints(0) {
                for (i, joint) in joints.into_u16().enumerate() {
                    vertices[vertex_base as usize + i].joints0 = joint;
                }
            }
            if let Some(weights) = reader.read_weights(0) {
                for (i, weight) in weights.into_f32().enumerate() {
                    vertices[vertex_base as usize + i].weights0 = weight;
                }
            }

            let first_index = indices_u32.len() as u32;
            match reader.read_indices() {
                Some(read) => {
                    for index in read.into_u32() {
                        let index = vertex_base + index;
                        widest_index = widest_index.max(index);
                        indices_u32.push(index);
                    }
                }
                // Unindexed primitive: synthesize a trivial index run.
                None => {
                    let count = vertices.len() as u32 - vertex_base;
                    for i in 0..count {
                        let index = vertex_base + i;
                        widest_index = widest_index.max(index);
                        indices_u32.push(index);
                    }
                }
            }

            primitives.push(Primitive {
                first_index,
                index_count: indices_u32.len() as u32 - first_index,
                material: primitive.material().index(),
            });
        }
        meshes.push(Mesh { primitives });
    }

    // Everything fits in 16 bits often enough to be worth the narrower
    // bind; the width is fixed here, once, for the whole model.
    let indices = if widest_index <= u16::MAX as u32 {
        IndexData::U16(indices_u32.into_iter().map(|i| i as u16).collect())
    } else {
        IndexData::U32(indices_u32)
    };

    Ok((meshes, vertices, indices))
}

fn load_nodes(document: &gltf::Document) -> RenderResult<(Vec<Node>, Vec<usize>)> {
    let mut nodes: Vec<Node> = document
        .nodes()
        .map(|node| {
            let (translation, rotation, scale) = node.transform().decomposed();
            Node {
                name: node.name().map(str::to_string),
                parent: None,
                children: node.children().map(|c| c.index()).collect(),
                translation: Vec3::from(translation),
                rotation: Quat::from_array(rotation),
                scale: Vec3::from(scale),
                mesh: node.mesh().map(|m| m.index()),
                skin: node.skin().map(|s| s.index()),
            }
        })
        .collect();

    for index in 0..nodes.len() {
        let children = nodes[index].children.clone();
        for child in children {
            if child >= nodes.len() {
                return Err(RenderError::InvalidScene("node child index out of range"));
            }
            nodes[child].parent = Some(index);
        }
    }

    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or(RenderError::InvalidScene("model has no scene"))?;
    let roots = scene.nodes().map(|n| n.index()).collect();

    Ok((nodes, roots))
}

fn load_skins(
    document: &gltf::Document,
    buffers: &[gltf::buffer::Data],
    renderer: &mut Renderer,
) -> RenderResult<Vec<Skin>> {
    let mut skins = Vec::new();
    for skin in document.skins() {
        let joints: Vec<usize> = skin.joints().map(|j| j.index()).collect();
        if joints.is_empty() {
            return Err(RenderError::InvalidScene("skin without joints"));
        }

        let reader = skin.reader(|buffer| Some(&buffers[buffer.index()]));
        let inverse_bind_matrices: Vec<Mat4> = match reader.read_inverse_bind_matrices() {
            Some(iter) => iter.map(|m| Mat4::from_cols_array_2d(&m)).collect(),
            None => vec![Mat4::IDENTITY; joints.len()],
        };
        if inverse_bind_matrices.len() != joints.len() {
            return Err(RenderError::InvalidScene(
                "inverse bind matrix count does not match joint count",
            ));
        }

        let buffer_size = (joints.len() * std::mem::size_of::<Mat4>()) as vk::DeviceSize;
        let mut joint_buffers = Vec::with_capacity(gpu::NUM_IN_FLIGHT_FRAMES);
        for _ in 0..gpu::NUM_IN_FLIGHT_FRAMES {
            joint_buffers.push(gpu::DeviceBuffer::new_host_visible(
                "skin joints",
                buffer_size,
                vk::BufferUsageFlags::STORAGE_BUFFER,
                renderer.device().clone(),
                renderer.allocator().clone(),
            )?);
        }

        skins.push(Skin {
            name: skin.name().map(str::to_string),
            joints,
            inverse_bind_matrices,
            joint_buffers,
        });
    }
    Ok(skins)
}

fn load_animations(
    document: &gltf::Document,
    buffers: &[gltf::buffer::Data],
) -> RenderResult<Vec<Animation>> {
    let mut animations = Vec::new();
    for animation in document.animations() {
        let mut samplers = Vec::new();
        let mut start = f32::MAX;
        let mut end = f32::MIN;

        for channel in animation.channels() {
            let reader = channel.reader(|buffer| Some(&buffers[buffer.index()]));
            let inputs: Vec<f32> = reader
                .read_inputs()
                .ok_or(RenderError::InvalidScene("animation sampler without inputs"))?
                .collect();
            if let (Some(&first), Some(&last)) = (inputs.first(), inputs.last()) {
                start = start.min(first);
                end = end.max(last);
            }

            let outputs: Vec<Vec4> = match reader
                .read_outputs()
                .ok_or(RenderError::InvalidScene("animation sampler without outputs"))?
            {
                gltf::animation::util::ReadOutputs::Translations(iter) => {
                    iter.map(|v| Vec3::from(v).extend(0.0)).collect()
                }
                gltf::animation::util::ReadOutputs::Scales(iter) => {
                    iter.map(|v| Vec3::from(v).extend(0.0)).collect()
                }
                gltf::animation::util::ReadOutputs::Rotations(iter) => {
                    iter.into_f32().map(Vec4::from).collect()
                }
                gltf::animation::util::ReadOutputs::MorphTargetWeights(_) => {
                    return Err(RenderError::InvalidScene(
                        "morph target animation is not supported",
                    ));
                }
            };

            let interpolation = match channel.sampler().interpolation() {
                gltf::animation::Interpolation::Step => Interpolation::Step,
                gltf::animation::Interpolation::Linear => Interpolation::Linear,
                gltf::animation::Interpolation::CubicSpline => {
                    log::warn!("cubic spline sampler downgraded to linear");
                    Interpolation::Linear
                }
            };
            samplers.push(AnimationSampler {
                interpolation,
                inputs,
                outputs,
            });
            // One sampler record per channel keeps the pairing index-free.
        }

        let channels = animation
            .channels()
            .enumerate()
            .map(|(i, channel)| {
                let path = match channel.target().property() {
                    gltf::animation::Property::Translation => Some(ChannelPath::Translation),
                    gltf::animation::Property::Rotation => Some(ChannelPath::Rotation),
                    gltf::animation::Property::Scale => Some(ChannelPath::Scale),
                    gltf::animation::Property::MorphTargetWeights => None,
                };
                path.map(|path| AnimationChannel {
                    path,
                    node: channel.target().node().index(),
                    sampler: i,
                })
            })
            .flatten()
            .collect();

        animations.push(Animation {
            name: animation.name().map(str::to_string),
            samplers,
            channels,
            start: if start == f32::MAX { 0.0 } else { start },
            end: if end == f32::MIN { 0.0 } else { end },
            current_time: 0.0,
        });
    }
    Ok(animations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_node() -> Node {
        Node {
            name: None,
            parent: None,
            children: Vec::new(),
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            mesh: None,
            skin: None,
        }
    }

    fn arena_global(nodes: &[Node], index: usize) -> Mat4 {
        let mut matrix = nodes[index].local_matrix();
        let mut parent = nodes[index].parent;
        while let Some(p) = parent {
            matrix = nodes[p].local_matrix() * matrix;
            parent = nodes[p].parent;
        }
        matrix
    }

    #[test]
    fn u8_indices_widen_to_u16() {
        let indices = IndexData::from_u8([0u8, 1, 2, 255]);
        match indices {
            IndexData::U16(ref v) => assert_eq!(v, &[0u16, 1, 2, 255]),
            IndexData::U32(_) => panic!("u8 input must decode as the 16-bit variant"),
        }
        assert_eq!(indices.index_type(), vk::IndexType::UINT16);
        assert_eq!(indices.len(), 4);
    }

    #[test]
    fn index_bytes_match_width() {
        let narrow = IndexData::U16(vec![1, 2, 3]);
        let wide = IndexData::U32(vec![1, 2, 3]);
        assert_eq!(narrow.as_bytes().len(), 6);
        assert_eq!(wide.as_bytes().len(), 12);
        assert_eq!(wide.index_type(), vk::IndexType::UINT32);
    }

    #[test]
    fn arena_parent_links_compose_transforms() {
        let mut parent = bare_node();
        parent.translation = Vec3::new(0.0, 2.0, 0.0);
        parent.children.push(1);
        let mut child = bare_node();
        child.parent = Some(0);
        child.translation = Vec3::new(1.0, 0.0, 0.0);
        let nodes = vec![parent, child];

        let world = arena_global(&nodes, 1);
        let origin = world.transform_point3(Vec3::ZERO);
        assert!((origin - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn keyframe_segment_selects_and_normalizes() {
        let inputs = [0.0f32, 1.0, 3.0];
        let (i, f) = keyframe_segment(&inputs, 0.5).unwrap();
        assert_eq!(i, 0);
        assert!((f - 0.5).abs() < 1e-6);
        let (i, f) = keyframe_segment(&inputs, 2.0).unwrap();
        assert_eq!(i, 1);
        assert!((f - 0.5).abs() < 1e-6);
        assert!(keyframe_segment(&inputs, 4.0).is_none());
        assert!(keyframe_segment(&inputs[..1], 0.0).is_none());
    }

    #[test]
    fn linear_sampler_interpolates_translation() {
        let sampler = AnimationSampler {
            interpolation: Interpolation::Linear,
            inputs: vec![0.0, 2.0],
            outputs: vec![Vec4::ZERO, Vec4::new(4.0, 0.0, 0.0, 0.0)],
        };
        let v = sampler.sample_vec3(1.0).unwrap();
        assert!((v - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn step_sampler_holds_previous_key() {
        let sampler = AnimationSampler {
            interpolation: Interpolation::Step,
            inputs: vec![0.0, 2.0],
            outputs: vec![Vec4::new(1.0, 1.0, 1.0, 0.0), Vec4::new(9.0, 9.0, 9.0, 0.0)],
        };
        let v = sampler.sample_vec3(1.9).unwrap();
        assert!((v - Vec3::ONE).length() < 1e-6);
    }

    #[test]
    fn rotation_sampler_slerps_between_keys() {
        let a = Quat::IDENTITY;
        let b = Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
        let sampler = AnimationSampler {
            interpolation: Interpolation::Linear,
            inputs: vec![0.0, 1.0],
            outputs: vec![Vec4::from(a.to_array()), Vec4::from(b.to_array())],
        };
        let q = sampler.sample_quat(0.5).unwrap();
        let expected = Quat::from_rotation_y(std::f32::consts::FRAC_PI_4);
        assert!(q.angle_between(expected) < 1e-4);
    }

    #[test]
    fn joint_matrix_identity_when_pose_matches_bind() {
        // Joint at its bind pose: inverse(root) * global(joint) * ibm == I.
        let mut root = bare_node();
        root.children.push(1);
        let mut joint = bare_node();
        joint.parent = Some(0);
        joint.translation = Vec3::new(0.0, 3.0, 0.0);
        let nodes = vec![root, joint];

        let global_joint = arena_global(&nodes, 1);
        let ibm = global_joint.inverse();
        let inverse_root = arena_global(&nodes, 0).inverse();
        let joint_matrix = inverse_root * global_joint * ibm;

        let got = joint_matrix.to_cols_array();
        let want = Mat4::IDENTITY.to_cols_array();
        for (g, w) in got.iter().zip(want.iter()) {
            assert!((g - w).abs() < 1e-5);
        }
    }
}
