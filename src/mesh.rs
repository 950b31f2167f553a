// Mesh data: vertex layout, the built-in triangle, OBJ loading
//
// One interleaved vertex stream (position + normal) and one u32 index
// stream. OBJ files are loaded through tobj with a single index so the
// positions and normals line up.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use std::io::BufRead;
use std::path::Path;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl Vertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(std::mem::size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            // Position (location 0)
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(0)
                .build(),
            // Normal (location 1)
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(std::mem::size_of::<[f32; 3]>() as u32)
                .build(),
        ]
    }
}

#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    /// The fixed triangle drawn when no mesh file is configured,
    /// counter-clockwise seen from +Z.
    pub fn triangle() -> Self {
        let normal = [0.0, 0.0, 1.0];
        Self {
            vertices: vec![
                Vertex { position: [0.0, 0.5, 0.0], normal },
                Vertex { position: [-0.5, -0.5, 0.0], normal },
                Vertex { position: [0.5, -0.5, 0.0], normal },
            ],
            indices: vec![0, 1, 2],
        }
    }

    pub fn load_obj(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open mesh {:?}", path))?;
        let mut reader = std::io::BufReader::new(file);
        let mesh = Self::parse_obj(&mut reader).with_context(|| format!("Failed to load mesh {:?}", path))?;

        log::info!(
            "Loaded mesh {:?}: {} vertices, {} triangles",
            path,
            mesh.vertices.len(),
            mesh.indices.len() / 3
        );
        Ok(mesh)
    }

    /// Parse OBJ text, merging every model in the file into one mesh.
    /// Materials are ignored.
    pub fn parse_obj(reader: &mut impl BufRead) -> Result<Self> {
        let (models, _materials) = tobj::load_obj_buf(
            reader,
            &tobj::LoadOptions {
                single_index: true,
                triangulate: true,
                ..Default::default()
            },
            |_| Ok(Default::default()),
        )?;

        let mut mesh = Mesh::default();

        for model in &models {
            let source = &model.mesh;
            let base = mesh.vertices.len() as u32;
            let vertex_count = source.positions.len() / 3;
            let has_normals = source.normals.len() == source.positions.len();

            for i in 0..vertex_count {
                let position = [
                    source.positions[3 * i],
                    source.positions[3 * i + 1],
                    source.positions[3 * i + 2],
                ];
                let normal = if has_normals {
                    [
                        source.normals[3 * i],
                        source.normals[3 * i + 1],
                        source.normals[3 * i + 2],
                    ]
                } else {
                    [0.0; 3]
                };
                mesh.vertices.push(Vertex { position, normal });
            }

            let first_index = mesh.indices.len();
            mesh.indices.extend(source.indices.iter().map(|&i| base + i));

            if !has_normals {
                accumulate_face_normals(&mut mesh.vertices, &mesh.indices[first_index..]);
            }
        }

        if mesh.indices.is_empty() {
            anyhow::bail!("Mesh contains no triangles");
        }

        Ok(mesh)
    }

    /// Radius of the bounding sphere around the origin, used to frame the camera
    pub fn bounding_radius(&self) -> f32 {
        self.vertices
            .iter()
            .map(|v| Vec3::from(v.position).length())
            .fold(0.0, f32::max)
    }
}

/// Area-weighted face normals summed onto shared vertices, then normalised.
fn accumulate_face_normals(vertices: &mut [Vertex], indices: &[u32]) {
    for triangle in indices.chunks_exact(3) {
        let [a, b, c] = [triangle[0], triangle[1], triangle[2]].map(|i| i as usize);
        let pa = Vec3::from(vertices[a].position);
        let pb = Vec3::from(vertices[b].position);
        let pc = Vec3::from(vertices[c].position);
        let face = (pb - pa).cross(pc - pa);

        for i in [a, b, c] {
            let n = Vec3::from(vertices[i].normal) + face;
            vertices[i].normal = n.into();
        }
    }

    for i in indices.iter().map(|&i| i as usize) {
        let n = Vec3::from(vertices[i].normal).normalize_or_zero();
        vertices[i].normal = n.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const QUAD_WITH_NORMALS: &str = "\
o quad
v -1.0 -1.0 0.0
v 1.0 -1.0 0.0
v 1.0 1.0 0.0
v -1.0 1.0 0.0
vn 0.0 0.0 1.0
f 1//1 2//1 3//1 4//1
";

    const TRIANGLE_NO_NORMALS: &str = "\
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 0.0 1.0 0.0
f 1 2 3
";

    #[test]
    fn vertex_layout_matches_attributes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 24);
        assert_eq!(Vertex::binding_description().stride, 24);

        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[1].location, 1);
    }

    #[test]
    fn builtin_triangle_is_one_triangle() {
        let mesh = Mesh::triangle();
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.indices, vec![0, 1, 2]);
    }

    #[test]
    fn quad_is_triangulated() {
        let mesh = Mesh::parse_obj(&mut Cursor::new(QUAD_WITH_NORMALS)).unwrap();

        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices.len(), 6);
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
        assert!(mesh.vertices.iter().all(|v| v.normal == [0.0, 0.0, 1.0]));
    }

    #[test]
    fn missing_normals_are_generated_from_faces() {
        let mesh = Mesh::parse_obj(&mut Cursor::new(TRIANGLE_NO_NORMALS)).unwrap();

        assert_eq!(mesh.indices.len(), 3);
        for vertex in &mesh.vertices {
            let n = Vec3::from(vertex.normal);
            assert!((n - Vec3::Z).length() < 1e-6, "normal was {:?}", n);
        }
    }

    #[test]
    fn multiple_objects_are_merged_with_offset_indices() {
        let source = format!("o first\n{}o second\n{}", TRIANGLE_NO_NORMALS, "\
v 0.0 0.0 1.0
v 1.0 0.0 1.0
v 0.0 1.0 1.0
f 4 5 6
");
        let mesh = Mesh::parse_obj(&mut Cursor::new(source)).unwrap();

        assert_eq!(mesh.vertices.len(), 6);
        assert_eq!(mesh.indices.len(), 6);
        let max = *mesh.indices.iter().max().unwrap();
        assert_eq!(max, 5);
    }

    #[test]
    fn empty_obj_is_rejected() {
        assert!(Mesh::parse_obj(&mut Cursor::new("# nothing here\n")).is_err());
    }

    #[test]
    fn bounding_radius_covers_farthest_vertex() {
        let mesh = Mesh::parse_obj(&mut Cursor::new(QUAD_WITH_NORMALS)).unwrap();
        assert!((mesh.bounding_radius() - 2.0_f32.sqrt()).abs() < 1e-6);
    }
}
