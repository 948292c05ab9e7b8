//! VOIDNAV Engine
//!
//! Dynamic tiled navigation mesh на Bevy 0.16 + Rapier.
//!
//! Движок инкрементально выводит walkable-граф из физической сцены:
//! - мир разбит на тайлы фиксированного размера;
//! - change detector раз в период сэмплирует коллайдеры вокруг observer'а
//!   и перестраивает только тайлы под изменившейся геометрией;
//! - сборка тайлов уходит в worker pool (round robin), результаты
//!   применяются асинхронно на driving thread;
//! - gameplay ходит в `Navigation` за путями и ближайшими точками.
//!
//! Мутация store однопоточная by construction: воркеры возвращают
//! результаты, пишет только driving thread внутри apply.

use std::sync::{Arc, RwLock};

use bevy::prelude::*;

// Публичные модули
pub mod agent;
pub mod builder;
pub mod config;
pub mod dispatch;
pub mod geometry;
pub mod grid;
pub mod logger;
pub mod mesh;
pub mod query;
pub mod refresh;

// Re-export основных типов
pub use agent::NavAgent;
pub use builder::{build_tile, BuildJob, TileBuildResult, TileMeshData};
pub use config::NavMeshSettings;
pub use dispatch::BuildDispatcher;
pub use geometry::{ColliderMeshCache, ColliderTriMesh};
pub use grid::{TileCoord, TileGrid};
pub use logger::{
    init_logger, log, log_error, log_info, log_warning, set_log_level, set_logger, LogLevel,
    LogPrinter,
};
pub use mesh::{NavMeshHandle, NavMeshUpdated, TiledNavMesh};
pub use query::{Navigation, NavMeshQuery, PathResult};
pub use refresh::{NavMeshObserver, NavMeshRebuildRequest, RefreshTimer};

/// Главный plugin движка
///
/// Порядок систем в Update (chain, детерминированный внутри кадра):
/// 1. bind/unbind_navmesh_queries — привязка query handle к navmesh entity
/// 2. refresh_navmesh — change detection + submit job'ов
/// 3. apply_build_results — применение готовых тайлов + события
/// 4. nav_agent_follow — repath и steering агентов
pub struct NavigationPlugin;

impl Plugin for NavigationPlugin {
    fn build(&self, app: &mut App) {
        logger::init_logger();

        app.init_resource::<NavMeshSettings>()
            .init_resource::<Navigation>()
            .init_resource::<ColliderMeshCache>()
            .init_resource::<refresh::RefreshState>()
            .add_event::<NavMeshUpdated>()
            .add_event::<NavMeshRebuildRequest>()
            .add_systems(Startup, setup_navmesh)
            .add_systems(
                Update,
                (
                    query::bind_navmesh_queries,
                    query::unbind_navmesh_queries,
                    refresh::refresh_navmesh.run_if(resource_exists::<BuildDispatcher>),
                    refresh::apply_build_results.run_if(resource_exists::<BuildDispatcher>),
                    agent::nav_agent_follow,
                )
                    .chain(),
            );
    }
}

/// Создаёт tiled navmesh entity и инфраструктуру движка.
/// Невалидный конфиг не роняет приложение — движок просто не поднимается
fn setup_navmesh(mut commands: Commands, settings: Res<NavMeshSettings>) {
    if let Err(e) = settings.validate() {
        logger::log_error(&format!("NavMeshSettings невалидны, движок отключён: {}", e));
        return;
    }

    commands.insert_resource(TileGrid::from_settings(&settings));
    commands.insert_resource(BuildDispatcher::new(settings.worker_count()));
    commands.insert_resource(RefreshTimer(Timer::from_seconds(
        settings.refresh_period,
        TimerMode::Repeating,
    )));

    let store = Arc::new(RwLock::new(TiledNavMesh::new(&settings)));
    commands.spawn(NavMeshHandle(store));

    logger::log_info(&format!(
        "navmesh initialized: tile {}m, {} workers",
        settings.tile_world_size(),
        settings.worker_count()
    ));
}

/// Minimal Bevy App для headless использования движка (и тестов)
pub fn create_headless_app(settings: NavMeshSettings) -> App {
    let mut app = App::new();
    app.add_plugins(MinimalPlugins)
        .insert_resource(settings)
        .add_plugins(NavigationPlugin);
    app
}
