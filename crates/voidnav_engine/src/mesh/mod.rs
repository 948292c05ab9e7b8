//! Tiled navigation mesh store
//!
//! Владеет полигональными данными по тайлам. Мутация — только на driving
//! thread внутри `apply_tile` (воркеры возвращают результаты, в store не
//! пишут), поэтому вся запись однопоточная by construction.
//!
//! Инварианты:
//! - максимум один полигональный датасет на координату: перед установкой
//!   нового результата существующий тайл снимается (remove-then-add);
//! - version монотонно растёт, +1 на каждый применённый результат;
//! - результат с generation старше уже применённого для этой координаты
//!   отбрасывается (защита от out-of-order прихода из worker pool).

pub mod events;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bevy::prelude::*;

use crate::builder::{TileBuildResult, TileMeshData};
use crate::config::NavMeshSettings;
use crate::grid::{TileCoord, TileGrid};
use crate::logger::{log, log_error};

pub use events::NavMeshUpdated;

/// Компонент на navmesh entity: общий указатель на store.
/// Query service подписан на появление/удаление этого компонента
#[derive(Component, Clone)]
pub struct NavMeshHandle(pub Arc<RwLock<TiledNavMesh>>);

pub struct TiledNavMesh {
    grid: TileGrid,
    tiles: HashMap<TileCoord, TileMeshData>,
    /// Последняя применённая generation по координате
    generations: HashMap<TileCoord, u64>,
    version: u64,
    max_tiles: usize,
    origin: Vec3,
    cell_size: f32,
    cell_height: f32,
}

impl TiledNavMesh {
    pub fn new(settings: &NavMeshSettings) -> Self {
        Self {
            grid: TileGrid::from_settings(settings),
            tiles: HashMap::new(),
            generations: HashMap::new(),
            version: 0,
            max_tiles: settings.max_tiles,
            origin: settings.world_min(),
            cell_size: settings.cell_size,
            cell_height: settings.cell_height,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn tile(&self, coord: TileCoord) -> Option<&TileMeshData> {
        self.tiles.get(&coord)
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn tile_coords(&self) -> impl Iterator<Item = TileCoord> + '_ {
        self.tiles.keys().copied()
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Грид-координата вершины в квантизации сборки тайлов.
    /// Вершины store уже выровнены по cell-гриду, round восстанавливает
    /// целочисленный ключ точно — этим матчатся граничные рёбра соседей
    pub fn quantize(&self, v: Vec3) -> IVec3 {
        IVec3::new(
            ((v.x - self.origin.x) / self.cell_size).round() as i32,
            ((v.y - self.origin.y) / self.cell_height).round() as i32,
            ((v.z - self.origin.z) / self.cell_size).round() as i32,
        )
    }

    /// Применяет результат сборки тайла. Возвращает событие для подписчиков,
    /// либо None если результат отброшен (failure или устаревшая generation).
    ///
    /// Провал вставки при переполнении max_tiles оставляет координату пустой —
    /// видимая дыра на месте бывшего тайла. Это принятая деградация
    /// synchronous worker-driven замены, не скрываем
    pub fn apply_tile(&mut self, result: TileBuildResult) -> Option<NavMeshUpdated> {
        let tile = result.tile;

        if let Some(applied) = self.generations.get(&tile) {
            if result.generation < *applied {
                log(&format!(
                    "drop stale build result for tile ({}, {}): gen {} < applied {}",
                    tile.x, tile.y, result.generation, applied
                ));
                return None;
            }
        }

        let Some(data) = result.data else {
            // Сборка провалилась: прежний тайл остаётся авторитетным
            log_error(&format!(
                "Failed to build tile ({}, {}): {}",
                tile.x,
                tile.y,
                result.error.as_deref().unwrap_or("unknown")
            ));
            return None;
        };

        self.tiles.remove(&tile);
        self.generations.insert(tile, result.generation);

        if self.tiles.len() >= self.max_tiles {
            log_error(&format!(
                "Failed to add tile ({}, {}) to nav mesh: max tiles ({}) exceeded",
                tile.x, tile.y, self.max_tiles
            ));
        } else {
            self.tiles.insert(tile, data);
        }

        self.version += 1;
        Some(NavMeshUpdated {
            version: self.version,
            tile,
        })
    }
}
