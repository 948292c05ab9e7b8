//! Интеграционные тесты движка: полный цикл
//! collider → refresh tick → worker build → apply → path query

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use bevy::prelude::*;
use bevy_rapier3d::prelude::Collider;
use voidnav_engine::{
    create_headless_app, BuildDispatcher, NavMeshHandle, NavMeshObserver, NavMeshRebuildRequest,
    NavMeshSettings, TileCoord, TiledNavMesh,
};

/// 10x10 грид тайлов по 4 метра, refresh каждый кадр
fn test_settings() -> NavMeshSettings {
    NavMeshSettings {
        cell_size: 0.2,
        cell_height: 0.2,
        tile_size_cells: 20,
        min_region_area: 1.0,
        refresh_period: 0.0,
        world_bounds_min: [0.0, -5.0, 0.0],
        world_bounds_max: [40.0, 5.0, 40.0],
        ..Default::default()
    }
}

fn store_handle(app: &mut App) -> Arc<RwLock<TiledNavMesh>> {
    let mut query = app.world_mut().query::<&NavMeshHandle>();
    let handle = query
        .iter(app.world())
        .next()
        .expect("navmesh entity должен существовать после Startup");
    handle.0.clone()
}

fn submitted(app: &App) -> u64 {
    app.world().resource::<BuildDispatcher>().submitted()
}

/// Крутит app.update() пока версия меша не дойдёт до `version` (с дедлайном)
fn wait_for_version(app: &mut App, store: &Arc<RwLock<TiledNavMesh>>, version: u64) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while store.read().unwrap().version() < version {
        assert!(
            Instant::now() < deadline,
            "build не завершился за отведённое время"
        );
        app.update();
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_end_to_end_single_tile_build_and_path() {
    let mut app = create_headless_app(test_settings());

    // Observer рядом с боксом, бокс целиком внутри тайла (3,4)
    app.world_mut().spawn((
        NavMeshObserver,
        GlobalTransform::from(Transform::from_xyz(14.0, 2.0, 18.0)),
    ));
    app.world_mut().spawn((
        Collider::cuboid(1.0, 0.5, 1.0),
        GlobalTransform::from(Transform::from_xyz(14.0, 0.0, 18.0)),
    ));

    // Первый тик: ровно один job — для тайла (3,4)
    app.update();
    assert_eq!(submitted(&app), 1, "ожидался ровно один build job");

    let store = store_handle(&mut app);
    wait_for_version(&mut app, &store, 1);

    {
        let mesh = store.read().unwrap();
        let tiles: Vec<TileCoord> = mesh.tile_coords().collect();
        assert_eq!(tiles, vec![TileCoord::new(3, 4)]);
        assert!(!mesh.tile(TileCoord::new(3, 4)).unwrap().is_empty());
    }

    // Путь по верхней грани бокса внутри того же тайла
    let from = Vec3::new(13.4, 0.6, 17.4);
    let to = Vec3::new(14.6, 0.6, 18.6);
    let result = app
        .world()
        .resource::<voidnav_engine::Navigation>()
        .find_path(from, to);

    assert!(result.success, "путь по построенному тайлу не найден");
    assert!(!result.path.is_empty());
    assert!(
        result.path[0].distance(from) < 0.3,
        "первая точка пути далеко от старта: {:?}",
        result.path[0]
    );
    assert!(result.path.last().unwrap().distance(to) < 0.3);
}

#[test]
fn test_steady_state_submits_nothing() {
    let mut app = create_headless_app(test_settings());

    app.world_mut().spawn((
        NavMeshObserver,
        GlobalTransform::from(Transform::from_xyz(14.0, 2.0, 18.0)),
    ));
    let box_entity = app
        .world_mut()
        .spawn((
            Collider::cuboid(1.0, 0.5, 1.0),
            GlobalTransform::from(Transform::from_xyz(14.0, 0.0, 18.0)),
        ))
        .id();

    app.update();
    let after_first_tick = submitted(&app);
    assert!(after_first_tick > 0);

    // Ничего не двигалось — тики не порождают job'ов
    for _ in 0..5 {
        app.update();
    }
    assert_eq!(submitted(&app), after_first_tick);

    // Переместили бокс — следующий тик снова строит
    app.world_mut()
        .entity_mut(box_entity)
        .insert(GlobalTransform::from(Transform::from_xyz(18.0, 0.0, 18.0)));
    app.update();
    assert!(
        submitted(&app) > after_first_tick,
        "перемещение коллайдера не вызвало rebuild"
    );
}

#[test]
fn test_query_on_empty_mesh_degrades_gracefully() {
    let mut app = create_headless_app(test_settings());
    app.update();

    let navigation = app.world().resource::<voidnav_engine::Navigation>();
    // Меш создан, но тайлов нет — запросы не паникуют
    assert!(navigation.find_closest_point(Vec3::new(1.0, 0.0, 1.0)).is_none());
    let result = navigation.find_path(Vec3::ZERO, Vec3::new(1.0, 0.0, 1.0));
    assert!(!result.success);
    assert!(result.path.is_empty());
}

#[test]
fn test_rebuild_request_resubmits_known_geometry() {
    let mut app = create_headless_app(test_settings());

    app.world_mut().spawn((
        NavMeshObserver,
        GlobalTransform::from(Transform::from_xyz(14.0, 2.0, 18.0)),
    ));
    app.world_mut().spawn((
        Collider::cuboid(1.0, 0.5, 1.0),
        GlobalTransform::from(Transform::from_xyz(14.0, 0.0, 18.0)),
    ));

    app.update();
    let after_first_tick = submitted(&app);

    app.world_mut().send_event(NavMeshRebuildRequest);
    app.update();
    assert!(
        submitted(&app) > after_first_tick,
        "полная пересборка не отправила job'ы"
    );
}

#[test]
fn test_navmesh_entity_removal_unbinds_query() {
    let mut app = create_headless_app(test_settings());
    app.update();

    let entity = {
        let mut query = app.world_mut().query::<(Entity, &NavMeshHandle)>();
        query.iter(app.world()).next().unwrap().0
    };
    app.world_mut().despawn(entity);
    app.update();

    let navigation = app.world().resource::<voidnav_engine::Navigation>();
    assert!(!navigation.has_query());
    // Запросы после удаления navmesh entity — мягкий отказ
    assert!(!navigation.find_path(Vec3::ZERO, Vec3::ONE).success);
    assert!(navigation.find_closest_point(Vec3::ZERO).is_none());
}
