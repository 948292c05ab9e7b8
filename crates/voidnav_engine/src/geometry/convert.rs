//! Конвертация rapier коллайдеров в triangle meshes
//!
//! Поддерживаются shapes, имеющие осмысленную проходимую поверхность:
//! ball, cuboid, cylinder, convex polyhedron, trimesh, heightfield.
//! Остальные (сегменты, полилинии, compound и т.д.) пропускаются с warning.

use bevy::prelude::*;
use bevy_rapier3d::prelude::{Collider, ColliderView};

use crate::logger::log_warning;

/// Треугольная сетка коллайдера в мировых координатах
#[derive(Debug, Clone)]
pub struct ColliderTriMesh {
    pub positions: Vec<Vec3>,
    pub indices: Vec<u32>,
    pub aabb_min: Vec3,
    pub aabb_max: Vec3,
}

impl ColliderTriMesh {
    pub fn intersects_aabb(&self, min: Vec3, max: Vec3) -> bool {
        self.aabb_min.x <= max.x
            && self.aabb_max.x >= min.x
            && self.aabb_min.y <= max.y
            && self.aabb_max.y >= min.y
            && self.aabb_min.z <= max.z
            && self.aabb_max.z >= min.z
    }
}

/// Конвертирует shape коллайдера в мировую треугольную сетку.
/// Transform запекается в вершины: кэш инвалидируется по позиции,
/// так что сетка пересоздаётся при перемещении
pub fn collider_to_trimesh(
    collider: &Collider,
    translation: Vec3,
    rotation: Quat,
) -> Option<ColliderTriMesh> {
    let (raw_vertices, raw_triangles) = match collider.as_typed_shape() {
        ColliderView::Ball(ball) => ball.raw.to_trimesh(8, 8),
        ColliderView::Cuboid(cuboid) => cuboid.raw.to_trimesh(),
        ColliderView::Cylinder(cylinder) => cylinder.raw.to_trimesh(12),
        ColliderView::ConvexPolyhedron(polyhedron) => polyhedron.raw.to_trimesh(),
        ColliderView::HeightField(heightfield) => heightfield.raw.to_trimesh(),
        ColliderView::TriMesh(trimesh) => {
            (trimesh.raw.vertices().to_vec(), trimesh.indices().to_vec())
        }
        _ => {
            log_warning(&format!(
                "Unsupported collider shape {:?}, исключён из navmesh",
                collider.raw.shape_type()
            ));
            return None;
        }
    };

    if raw_vertices.is_empty() || raw_triangles.is_empty() {
        return None;
    }

    let mut positions = Vec::with_capacity(raw_vertices.len());
    let mut aabb_min = Vec3::splat(f32::INFINITY);
    let mut aabb_max = Vec3::splat(f32::NEG_INFINITY);

    for point in &raw_vertices {
        let world = rotation * Vec3::new(point.x, point.y, point.z) + translation;
        aabb_min = aabb_min.min(world);
        aabb_max = aabb_max.max(world);
        positions.push(world);
    }

    let mut indices = Vec::with_capacity(raw_triangles.len() * 3);
    for triangle in &raw_triangles {
        indices.extend_from_slice(triangle);
    }

    Some(ColliderTriMesh {
        positions,
        indices,
        aabb_min,
        aabb_max,
    })
}
