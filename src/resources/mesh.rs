//! Mesh data structures and generation
//!
//! Generators produce counter-clockwise front faces with outward normals
//! and tangents along +U.

use std::f32::consts::{PI, TAU};

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::backend::traits::*;
use crate::backend::types::*;

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Bounds of a point set; an empty set gives a degenerate box at the origin.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut points = points.into_iter();
        let Some(first) = points.next() else {
            return Self {
                min: Vec3::ZERO,
                max: Vec3::ZERO,
            };
        };
        points.fold(
            Self {
                min: first,
                max: first,
            },
            |aabb, p| Self {
                min: aabb.min.min(p),
                max: aabb.max.max(p),
            },
        )
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Box enclosing this one after `transform`
    pub fn transformed(&self, transform: &Mat4) -> Self {
        Self::from_points(self.corners().map(|c| transform.transform_point3(c)))
    }
}

/// CPU-side mesh: vertices, triangle-list indices and bounds
#[derive(Debug, Clone)]
pub struct MeshData {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(name: &str, vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self {
            name: name.to_string(),
            vertices,
            indices,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(self.vertices.iter().map(|v| v.position))
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Unit cube centered at the origin, four vertices per face
    pub fn cube() -> Self {
        let faces = [
            (Vec3::Z, Vec3::X),
            (Vec3::NEG_Z, Vec3::NEG_X),
            (Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_X, Vec3::Z),
            (Vec3::Y, Vec3::X),
            (Vec3::NEG_Y, Vec3::X),
        ];
        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);

        for (normal, u) in faces {
            let v = normal.cross(u);
            let base = vertices.len() as u32;
            for (s, t) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                vertices.push(Vertex {
                    position: (normal + u * s + v * t) * 0.5,
                    normal,
                    uv: Vec2::new((s + 1.0) * 0.5, 1.0 - (t + 1.0) * 0.5),
                    tangent: u.extend(1.0),
                });
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self::new("cube", vertices, indices)
    }

    /// UV sphere of radius 0.5
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let segments = segments.max(3);
        let rings = rings.max(2);
        let mut vertices = Vec::with_capacity(((segments + 1) * (rings + 1)) as usize);
        let mut indices = Vec::with_capacity((segments * rings * 6) as usize);

        for ring in 0..=rings {
            let phi = ring as f32 / rings as f32 * PI;
            for segment in 0..=segments {
                let theta = segment as f32 / segments as f32 * TAU;
                let normal = Vec3::new(phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin());
                vertices.push(Vertex {
                    position: normal * 0.5,
                    normal,
                    uv: Vec2::new(
                        segment as f32 / segments as f32,
                        ring as f32 / rings as f32,
                    ),
                    tangent: Vec4::new(-theta.sin(), 0.0, theta.cos(), 1.0),
                });
            }
        }

        let stride = segments + 1;
        for ring in 0..rings {
            for segment in 0..segments {
                let a = ring * stride + segment;
                let below = a + stride;
                // Pole rows collapse one triangle of each quad to zero area
                if ring != 0 {
                    indices.extend_from_slice(&[a, a + 1, below]);
                }
                if ring != rings - 1 {
                    indices.extend_from_slice(&[a + 1, below + 1, below]);
                }
            }
        }

        Self::new("sphere", vertices, indices)
    }

    /// Plane on XZ facing +Y
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let subdivisions = subdivisions.max(1);
        let stride = subdivisions + 1;
        let mut vertices = Vec::with_capacity((stride * stride) as usize);
        let mut indices = Vec::with_capacity((subdivisions * subdivisions * 6) as usize);

        for z in 0..=subdivisions {
            for x in 0..=subdivisions {
                let u = x as f32 / subdivisions as f32;
                let v = z as f32 / subdivisions as f32;
                vertices.push(Vertex {
                    position: Vec3::new((u - 0.5) * width, 0.0, (v - 0.5) * depth),
                    normal: Vec3::Y,
                    uv: Vec2::new(u, v),
                    tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
                });
            }
        }

        for z in 0..subdivisions {
            for x in 0..subdivisions {
                let a = z * stride + x;
                let next = a + stride;
                indices.extend_from_slice(&[a, next, a + 1, a + 1, next, next + 1]);
            }
        }

        Self::new("plane", vertices, indices)
    }

    /// Capped cylinder along Y, centered at the origin
    pub fn cylinder(radius: f32, height: f32, segments: u32) -> Self {
        let segments = segments.max(3);
        let half = height * 0.5;
        let mut vertices = Vec::with_capacity((4 * segments + 6) as usize);
        let mut indices = Vec::with_capacity((12 * segments) as usize);

        // Side: a top and bottom vertex per column
        for i in 0..=segments {
            let u = i as f32 / segments as f32;
            let (sin, cos) = (u * TAU).sin_cos();
            let normal = Vec3::new(cos, 0.0, sin);
            let tangent = Vec4::new(-sin, 0.0, cos, 1.0);
            for (y, v) in [(half, 0.0), (-half, 1.0)] {
                vertices.push(Vertex {
                    position: Vec3::new(cos * radius, y, sin * radius),
                    normal,
                    uv: Vec2::new(u, v),
                    tangent,
                });
            }
        }
        for i in 0..segments {
            let top = i * 2;
            let (bottom, next_top, next_bottom) = (top + 1, top + 2, top + 3);
            indices.extend_from_slice(&[top, next_top, bottom, next_top, next_bottom, bottom]);
        }

        push_cap(&mut vertices, &mut indices, radius, half, segments, true);
        push_cap(&mut vertices, &mut indices, radius, -half, segments, false);
        Self::new("cylinder", vertices, indices)
    }

    /// Cone along Y with its apex at `+height / 2` and a capped base
    pub fn cone(radius: f32, height: f32, segments: u32) -> Self {
        let segments = segments.max(3);
        let half = height * 0.5;
        let slope = if height > 0.0 { radius / height } else { 0.0 };
        let mut vertices = Vec::with_capacity((3 * segments + 4) as usize);
        let mut indices = Vec::with_capacity((6 * segments) as usize);

        // Apex duplicated per column so each side face gets its own normal
        for i in 0..=segments {
            let u = i as f32 / segments as f32;
            let (sin, cos) = (u * TAU).sin_cos();
            let normal = Vec3::new(cos, slope, sin).normalize();
            let tangent = Vec4::new(-sin, 0.0, cos, 1.0);
            vertices.push(Vertex {
                position: Vec3::new(0.0, half, 0.0),
                normal,
                uv: Vec2::new(u, 0.0),
                tangent,
            });
            vertices.push(Vertex {
                position: Vec3::new(cos * radius, -half, sin * radius),
                normal,
                uv: Vec2::new(u, 1.0),
                tangent,
            });
        }
        for i in 0..segments {
            let apex = i * 2;
            indices.extend_from_slice(&[apex, apex + 3, apex + 1]);
        }

        push_cap(&mut vertices, &mut indices, radius, -half, segments, false);
        Self::new("cone", vertices, indices)
    }

    /// Torus around +Y
    pub fn torus(major_radius: f32, minor_radius: f32, major_segments: u32, minor_segments: u32) -> Self {
        let major_segments = major_segments.max(3);
        let minor_segments = minor_segments.max(3);
        let stride = minor_segments + 1;
        let mut vertices = Vec::with_capacity(((major_segments + 1) * stride) as usize);
        let mut indices = Vec::with_capacity((major_segments * minor_segments * 6) as usize);

        for i in 0..=major_segments {
            let theta = i as f32 / major_segments as f32 * TAU;
            let (sin_t, cos_t) = theta.sin_cos();
            for j in 0..=minor_segments {
                let phi = j as f32 / minor_segments as f32 * TAU;
                let (sin_p, cos_p) = phi.sin_cos();
                let ring = major_radius + minor_radius * cos_p;
                vertices.push(Vertex {
                    position: Vec3::new(ring * cos_t, minor_radius * sin_p, ring * sin_t),
                    normal: Vec3::new(cos_p * cos_t, sin_p, cos_p * sin_t),
                    uv: Vec2::new(
                        i as f32 / major_segments as f32,
                        j as f32 / minor_segments as f32,
                    ),
                    tangent: Vec4::new(-sin_t, 0.0, cos_t, 1.0),
                });
            }
        }

        for i in 0..major_segments {
            for j in 0..minor_segments {
                let a = i * stride + j;
                let around = a + stride;
                indices.extend_from_slice(&[a, a + 1, around, a + 1, around + 1, around]);
            }
        }

        Self::new("torus", vertices, indices)
    }
}

/// Disc at height `y` facing +Y (`up`) or -Y, fanned around its center
fn push_cap(
    vertices: &mut Vec<Vertex>,
    indices: &mut Vec<u32>,
    radius: f32,
    y: f32,
    segments: u32,
    up: bool,
) {
    let normal = if up { Vec3::Y } else { Vec3::NEG_Y };
    let center = vertices.len() as u32;
    vertices.push(Vertex {
        position: Vec3::new(0.0, y, 0.0),
        normal,
        uv: Vec2::splat(0.5),
        tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
    });
    for i in 0..=segments {
        let (sin, cos) = (i as f32 / segments as f32 * TAU).sin_cos();
        vertices.push(Vertex {
            position: Vec3::new(cos * radius, y, sin * radius),
            normal,
            uv: Vec2::new(cos * 0.5 + 0.5, sin * 0.5 + 0.5),
            tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
        });
    }
    for i in 0..segments {
        let (rim, next) = (center + 1 + i, center + 2 + i);
        if up {
            indices.extend_from_slice(&[center, next, rim]);
        } else {
            indices.extend_from_slice(&[center, rim, next]);
        }
    }
}

/// Mesh uploaded to device-local buffers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpuMesh {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
    pub bounds: Aabb,
}

impl GpuMesh {
    pub fn upload(backend: &mut dyn GraphicsBackend, mesh: &MeshData) -> BackendResult<Self> {
        if mesh.vertices.is_empty() || mesh.indices.is_empty() {
            return Err(BackendError::BufferCreationFailed(format!(
                "mesh '{}' has no geometry",
                mesh.name
            )));
        }

        let vertex_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{}_vertices", mesh.name)),
                size: mesh.vertex_bytes().len() as u64,
                usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
                location: MemoryLocation::GpuOnly,
            },
            mesh.vertex_bytes(),
        )?;
        let index_buffer = match backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{}_indices", mesh.name)),
                size: mesh.index_bytes().len() as u64,
                usage: BufferUsage::INDEX | BufferUsage::COPY_DST,
                location: MemoryLocation::GpuOnly,
            },
            mesh.index_bytes(),
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                backend.destroy_buffer(vertex_buffer);
                return Err(e);
            }
        };

        log::debug!(
            "Uploaded mesh '{}': {} vertices, {} triangles",
            mesh.name,
            mesh.vertex_count(),
            mesh.triangle_count()
        );
        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.index_count() as u32,
            bounds: mesh.bounds(),
        })
    }

    pub fn destroy(self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_buffer(self.vertex_buffer);
        backend.destroy_buffer(self.index_buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;

    /// Every triangle's geometric normal agrees with its vertex normals.
    fn assert_outward_ccw(mesh: &MeshData) {
        for tri in mesh.indices.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| mesh.vertices[i as usize]);
            let face = (b.position - a.position).cross(c.position - a.position);
            if face.length_squared() < 1e-12 {
                continue;
            }
            let normal = a.normal + b.normal + c.normal;
            assert!(face.dot(normal) > 0.0, "{} has a clockwise triangle {:?}", mesh.name, tri);
        }
    }

    #[test]
    fn test_cube() {
        let cube = MeshData::cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.triangle_count(), 12);
        assert_eq!(cube.bounds().min, Vec3::splat(-0.5));
        assert_eq!(cube.bounds().max, Vec3::splat(0.5));
        assert_outward_ccw(&cube);
    }

    #[test]
    fn test_generators_wind_counter_clockwise() {
        for mesh in [
            MeshData::sphere(16, 8),
            MeshData::plane(4.0, 2.0, 3),
            MeshData::torus(1.0, 0.25, 24, 12),
            MeshData::cylinder(0.5, 2.0, 16),
            MeshData::cone(0.5, 1.0, 16),
        ] {
            assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertex_count()));
            assert_eq!(mesh.index_count() % 3, 0);
            assert_outward_ccw(&mesh);
        }
    }

    #[test]
    fn test_torus_bounds() {
        let torus = MeshData::torus(1.0, 0.25, 32, 16);
        let bounds = torus.bounds();
        assert!((bounds.max.x - 1.25).abs() < 1e-4);
        assert!((bounds.max.y - 0.25).abs() < 1e-4);
        assert!((bounds.min.z + 1.25).abs() < 1e-2);
    }

    #[test]
    fn test_cylinder() {
        let cylinder = MeshData::cylinder(0.5, 2.0, 16);
        // Side columns plus two fans with a center each
        assert_eq!(cylinder.vertex_count(), 2 * 17 + 2 * 18);
        assert_eq!(cylinder.triangle_count(), 16 * 2 + 16 * 2);
        let bounds = cylinder.bounds();
        assert!((bounds.max.x - 0.5).abs() < 1e-5);
        assert!((bounds.min.z + 0.5).abs() < 1e-5);
        assert_eq!(bounds.max.y, 1.0);
        assert_eq!(bounds.min.y, -1.0);
    }

    #[test]
    fn test_cone() {
        let cone = MeshData::cone(1.0, 2.0, 8);
        assert_eq!(cone.vertex_count(), 2 * 9 + 10);
        assert_eq!(cone.triangle_count(), 8 + 8);
        let bounds = cone.bounds();
        assert_eq!(bounds.max.y, 1.0);
        assert_eq!(bounds.min.y, -1.0);
        assert!((bounds.max.x - 1.0).abs() < 1e-5);
        // Side normals lean up by the radius over height slope
        let side = cone.vertices[1].normal;
        assert!((side - Vec3::new(1.0, 0.5, 0.0).normalize()).length() < 1e-5);
    }

    #[test]
    fn test_aabb_transformed() {
        let aabb = MeshData::cube().bounds();
        let moved = aabb.transformed(&Mat4::from_scale_rotation_translation(
            Vec3::splat(2.0),
            glam::Quat::IDENTITY,
            Vec3::new(0.0, 1.0, 0.0),
        ));
        assert_eq!(moved.min, Vec3::new(-1.0, 0.0, -1.0));
        assert_eq!(moved.center(), Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(moved.half_extents(), Vec3::ONE);
    }

    #[test]
    fn test_upload_creates_device_buffers() {
        let mut backend = DummyBackend::new();
        let mesh = MeshData::cube();
        let gpu = GpuMesh::upload(&mut backend, &mesh).unwrap();
        assert_eq!(gpu.index_count, 36);
        assert_eq!(
            backend.buffer_contents(gpu.index_buffer).unwrap(),
            mesh.index_bytes()
        );
        gpu.destroy(&mut backend);
        assert_eq!(backend.live_resources().buffers, 0);
    }

    #[test]
    fn test_empty_mesh_is_rejected() {
        let mut backend = DummyBackend::new();
        let empty = MeshData::new("empty", Vec::new(), Vec::new());
        assert!(matches!(
            GpuMesh::upload(&mut backend, &empty),
            Err(BackendError::BufferCreationFailed(_))
        ));
        assert_eq!(backend.live_resources().buffers, 0);
    }
}
