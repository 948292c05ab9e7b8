//! Geometry sampler: сбор треугольной геометрии вокруг observer'а
//!
//! Конвертация collider → trimesh мемоизируется по entity коллайдера и
//! инвалидируется по позиции: переместился — пересоздали сетку с новым
//! transform'ом. Сенсоры исключаются. Стоимость тика масштабируется числом
//! ближайших коллайдеров — дальние отсекаются по AABB против observer-бокса.

pub mod convert;

use std::collections::HashMap;
use std::sync::Arc;

use bevy::prelude::*;
use bevy_rapier3d::prelude::Collider;

pub use convert::{collider_to_trimesh, ColliderTriMesh};

/// Кэш-запись одного коллайдера. `mesh == None` мемоизирует неподдерживаемый
/// shape — warning уходит один раз на (ре)генерацию, а не каждый тик
#[derive(Debug)]
pub struct CachedColliderMesh {
    pub last_position: Vec3,
    pub mesh: Option<Arc<ColliderTriMesh>>,
}

#[derive(Resource, Default)]
pub struct ColliderMeshCache {
    entries: HashMap<Entity, CachedColliderMesh>,
}

/// Сетка, попавшая в радиус интереса на этом тике
pub struct SampledMesh {
    pub entity: Entity,
    /// Позиция коллайдера на момент сэмплирования (для diff'а в refresh)
    pub position: Vec3,
    pub mesh: Arc<ColliderTriMesh>,
}

/// Результат сэмплирования за один тик
pub struct SampledGeometry {
    /// Сетки в радиусе интереса (включая статичные)
    pub meshes: Vec<SampledMesh>,
    /// Коллайдеры, исчезнувшие с прошлого тика, с их последними AABB —
    /// их тайлы тоже нужно перестроить
    pub removed: Vec<(Entity, Vec3, Vec3)>,
}

impl ColliderMeshCache {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Обходит все активные не-sensor коллайдеры, обновляет кэш и возвращает
    /// сетки, чей AABB пересекает бокс со стороной 2*radius вокруг observer'а.
    ///
    /// Позиция в кэше обновляется на каждом вызове независимо от включения,
    /// так что повторные тики сходятся к актуальной геометрии и для
    /// отсечённых коллайдеров.
    pub fn collect_nearby<'a>(
        &mut self,
        colliders: impl Iterator<Item = (Entity, &'a Collider, &'a GlobalTransform, bool)>,
        observer: Vec3,
        radius: f32,
    ) -> SampledGeometry {
        let box_min = observer - Vec3::splat(radius);
        let box_max = observer + Vec3::splat(radius);

        let mut meshes = Vec::new();
        let mut seen: Vec<Entity> = Vec::new();

        for (entity, collider, global_transform, is_sensor) in colliders {
            if is_sensor {
                continue;
            }
            seen.push(entity);

            let transform = global_transform.compute_transform();
            let position = transform.translation;

            let needs_regen = match self.entries.get(&entity) {
                Some(entry) => entry.last_position != position,
                None => true,
            };

            if needs_regen {
                let mesh = collider_to_trimesh(collider, position, transform.rotation);
                self.entries.insert(
                    entity,
                    CachedColliderMesh {
                        last_position: position,
                        mesh: mesh.map(Arc::new),
                    },
                );
            }

            let Some(entry) = self.entries.get_mut(&entity) else {
                continue;
            };
            entry.last_position = position;

            if let Some(mesh) = entry.mesh.as_ref() {
                if mesh.intersects_aabb(box_min, box_max) {
                    meshes.push(SampledMesh {
                        entity,
                        position,
                        mesh: mesh.clone(),
                    });
                }
            }
        }

        // Коллайдеры, пропавшие из мира: их последняя геометрия — dirty
        let mut removed = Vec::new();
        if seen.len() != self.entries.len() {
            let seen_set: std::collections::HashSet<Entity> = seen.iter().copied().collect();
            self.entries.retain(|entity, entry| {
                if seen_set.contains(entity) {
                    return true;
                }
                if let Some(mesh) = entry.mesh.as_ref() {
                    removed.push((*entity, mesh.aabb_min, mesh.aabb_max));
                }
                false
            });
        }

        SampledGeometry { meshes, removed }
    }
}

/// Сшивает выбранные сетки в единые position/index буферы
/// (индексы смещаются на базу каждой сетки)
pub fn flatten_meshes<'a>(
    meshes: impl IntoIterator<Item = &'a SampledMesh>,
) -> (Vec<f32>, Vec<u32>) {
    let mut positions = Vec::new();
    let mut indices = Vec::new();

    for sampled in meshes {
        let base = (positions.len() / 3) as u32;
        for p in &sampled.mesh.positions {
            positions.extend_from_slice(&[p.x, p.y, p.z]);
        }
        for i in &sampled.mesh.indices {
            indices.push(base + i);
        }
    }

    (positions, indices)
}
