//! Change detector / refresh loop
//!
//! Периодический тик на driving thread: сэмплируем геометрию вокруг
//! observer'а, диффим позиции против прошлого тика, собираем dirty-регион,
//! маппим его в тайлы и отправляем по job'у на тайл. Если ничего не
//! двигалось — тик выходит сразу после диффа, это штатный steady-state.
//!
//! Суспензии только две: submit job'а (fire-and-forget) и выгребание
//! результатов. Driving thread никогда не ждёт сборку.

use std::collections::HashMap;

use bevy::prelude::*;
use bevy_rapier3d::prelude::{Collider, Sensor};

use crate::builder::BuildJob;
use crate::config::NavMeshSettings;
use crate::dispatch::BuildDispatcher;
use crate::geometry::{flatten_meshes, ColliderMeshCache, SampledMesh};
use crate::grid::TileGrid;
use crate::logger::{log, log_error, log_warning};
use crate::mesh::{NavMeshHandle, NavMeshUpdated};

/// Точка интереса (камера/игрок): геометрия сэмплируется вокруг неё
#[derive(Component, Debug, Default)]
pub struct NavMeshObserver;

/// Запрос полной пересборки: все тайлы под известной геометрией становятся
/// dirty на ближайшем тике
#[derive(Event, Debug, Default)]
pub struct NavMeshRebuildRequest;

#[derive(Resource)]
pub struct RefreshTimer(pub Timer);

/// Позиции сэмплированных сеток на прошлом тике (отдельно от кэша сэмплера:
/// кэш перезаписывает позицию каждый вызов, дифф должен видеть прошлый тик)
#[derive(Resource, Default)]
pub struct RefreshState {
    last_positions: HashMap<Entity, Vec3>,
}

fn union_aabb(acc: Option<(Vec3, Vec3)>, min: Vec3, max: Vec3) -> Option<(Vec3, Vec3)> {
    match acc {
        Some((a, b)) => Some((a.min(min), b.max(max))),
        None => Some((min, max)),
    }
}

/// Основной тик refresh-лупа
#[allow(clippy::too_many_arguments)]
pub fn refresh_navmesh(
    time: Res<Time>,
    mut timer: ResMut<RefreshTimer>,
    settings: Res<NavMeshSettings>,
    grid: Res<TileGrid>,
    mut cache: ResMut<ColliderMeshCache>,
    mut state: ResMut<RefreshState>,
    mut dispatcher: ResMut<BuildDispatcher>,
    mut rebuild_requests: EventReader<NavMeshRebuildRequest>,
    observers: Query<&GlobalTransform, With<NavMeshObserver>>,
    colliders: Query<(Entity, &Collider, &GlobalTransform, Option<&Sensor>)>,
) {
    timer.0.tick(time.delta());
    let full_rebuild = !rebuild_requests.is_empty();
    rebuild_requests.clear();

    if !timer.0.just_finished() && !full_rebuild {
        return;
    }

    let Some(observer) = observers.iter().next() else {
        // Некого обслуживать — без точки интереса не сэмплируем
        return;
    };
    let observer_pos = observer.translation();

    let sampled = cache.collect_nearby(
        colliders
            .iter()
            .map(|(e, c, t, sensor)| (e, c, t, sensor.is_some())),
        observer_pos,
        settings.observer_radius,
    );

    // Дифф позиций: dirty-регион накрывает только изменившиеся сетки
    let mut dirty: Option<(Vec3, Vec3)> = None;

    for m in &sampled.meshes {
        if full_rebuild {
            dirty = union_aabb(dirty, m.mesh.aabb_min, m.mesh.aabb_max);
            state.last_positions.insert(m.entity, m.position);
            continue;
        }
        if state.last_positions.get(&m.entity) == Some(&m.position) {
            continue;
        }
        dirty = union_aabb(dirty, m.mesh.aabb_min, m.mesh.aabb_max);
        state.last_positions.insert(m.entity, m.position);
    }

    for (entity, aabb_min, aabb_max) in &sampled.removed {
        dirty = union_aabb(dirty, *aabb_min, *aabb_max);
        state.last_positions.remove(entity);
    }

    // Steady state: ничего не двигалось — ничего не строим
    let Some((dirty_min, dirty_max)) = dirty else {
        return;
    };

    let tiles = grid.bounds_to_tiles(dirty_min, dirty_max);
    if tiles.is_empty() {
        return;
    }
    log(&format!(
        "navmesh refresh: {} dirty tiles, bounds {:?}..{:?}",
        tiles.len(),
        dirty_min,
        dirty_max
    ));

    // В dirty-тайлы должна попасть и НЕ изменившаяся геометрия внутри региона,
    // иначе пересобранный тайл потеряет соседнюю статику
    let intersecting: Vec<&SampledMesh> = sampled
        .meshes
        .iter()
        .filter(|m| m.mesh.intersects_aabb(dirty_min, dirty_max))
        .collect();

    let (positions, indices) = flatten_meshes(intersecting.iter().copied());

    for tile in tiles {
        let (tile_bounds_min, tile_bounds_max) = grid.tile_bounds(tile);
        let generation = dispatcher.next_generation();
        // Буферы копируются на каждый job: воркер владеет своим снапшотом,
        // наши буферы остаются свободны для следующего тайла
        dispatcher.submit(BuildJob {
            tile,
            generation,
            tile_bounds_min,
            tile_bounds_max,
            config: settings.clone(),
            positions: positions.clone(),
            indices: indices.clone(),
        });
    }
}

/// Применение готовых результатов к store (driving thread, один writer)
pub fn apply_build_results(
    mut dispatcher: ResMut<BuildDispatcher>,
    handles: Query<&NavMeshHandle>,
    mut updates: EventWriter<NavMeshUpdated>,
) {
    let results = dispatcher.drain_results();
    if results.is_empty() {
        return;
    }

    let Some(handle) = handles.iter().next() else {
        log_warning(&format!(
            "{} build results dropped: navmesh entity отсутствует",
            results.len()
        ));
        return;
    };

    match handle.0.write() {
        Ok(mut mesh) => {
            for result in results {
                if let Some(event) = mesh.apply_tile(result) {
                    updates.write(event);
                }
            }
        }
        Err(e) => log_error(&format!("navmesh store lock poisoned: {}", e)),
    }
}
