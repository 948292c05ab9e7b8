//! Конфигурация навигационного движка
//!
//! Один resource со всеми настройками: грид-константы, generation параметры,
//! worker pool, refresh период. Все поля имеют defaults — при десериализации
//! опущенные опции заполняются автоматически (`#[serde(default)]`).
//!
//! ВАЖНО: грид-константы (cell_size, tile_size_cells, bounds) фиксируются при
//! создании меша — квантизация координат полигонов зависит от них. Смена
//! после старта требует пересоздания navmesh entity.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// Настройки dynamic tiled navmesh
#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavMeshSettings {
    /// Размер воксельной ячейки по X/Z (метры). Меньше = точнее и дороже
    pub cell_size: f32,
    /// Размер ячейки по Y (метры), квантизация высот
    pub cell_height: f32,
    /// Сторона тайла в ячейках. Больше = меньше тайлов на апдейт,
    /// но дороже каждый rebuild
    pub tile_size_cells: u32,
    /// Глобальный лимит тайлов в меше
    pub max_tiles: usize,
    /// Размер worker pool. 0 = hardware concurrency (минимум 3)
    pub workers: usize,
    /// Период refresh-тика change detector'а (секунды)
    pub refresh_period: f32,

    /// Максимальный проходимый уклон (градусы от горизонтали)
    pub walkable_slope_angle: f32,
    /// Максимальный перешагиваемый подъём (метры)
    pub walkable_climb: f32,
    /// Радиус агента (метры) — border padding при сборке тайла
    pub walkable_radius: f32,
    /// Высота агента (метры)
    pub walkable_height: f32,
    /// Минимальная площадь региона (в ячейках) — мелкие острова отбрасываются
    pub min_region_area: f32,
    /// Порог слияния регионов (в ячейках)
    pub merge_region_area: f32,

    /// Радиус сбора геометрии вокруг observer'а (метры).
    /// Ограничивает стоимость тика числом БЛИЖАЙШИХ коллайдеров, а не всех
    pub observer_radius: f32,
    /// Half-extents поиска ближайшего полигона в query (метры)
    pub query_half_extents: [f32; 3],

    /// Мировые границы navmesh (тайлы вне границ не существуют)
    pub world_bounds_min: [f32; 3],
    pub world_bounds_max: [f32; 3],
}

impl Default for NavMeshSettings {
    fn default() -> Self {
        Self {
            cell_size: 0.2,
            cell_height: 0.2,
            tile_size_cells: 200,
            max_tiles: 512,
            workers: 0,
            refresh_period: 0.1,

            walkable_slope_angle: 89.0,
            walkable_climb: 1.0,
            walkable_radius: 0.5,
            walkable_height: 1.0,
            min_region_area: 8.0,
            merge_region_area: 1.0,

            observer_radius: 100.0,
            query_half_extents: [2.0, 4.0, 2.0],

            world_bounds_min: [-5000.0, -1000.0, -5000.0],
            world_bounds_max: [5000.0, 1000.0, 5000.0],
        }
    }
}

impl NavMeshSettings {
    /// Мировой размер тайла по X/Z
    pub fn tile_world_size(&self) -> f32 {
        self.cell_size * self.tile_size_cells as f32
    }

    pub fn world_min(&self) -> Vec3 {
        Vec3::from_array(self.world_bounds_min)
    }

    pub fn world_max(&self) -> Vec3 {
        Vec3::from_array(self.world_bounds_max)
    }

    pub fn query_extents(&self) -> Vec3 {
        Vec3::from_array(self.query_half_extents)
    }

    /// Фактический размер worker pool
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(3)
            .max(3)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.cell_size <= 0.0 || self.cell_height <= 0.0 {
            return Err(format!(
                "cell_size/cell_height должны быть > 0 (cs={}, ch={})",
                self.cell_size, self.cell_height
            ));
        }
        if self.tile_size_cells == 0 {
            return Err("tile_size_cells должен быть > 0".into());
        }
        if self.max_tiles == 0 {
            return Err("max_tiles должен быть > 0".into());
        }
        if self.refresh_period < 0.0 {
            return Err("refresh_period не может быть отрицательным".into());
        }
        let min = self.world_min();
        let max = self.world_max();
        if min.x >= max.x || min.y >= max.y || min.z >= max.z {
            return Err(format!("world bounds вырождены: {:?}..{:?}", min, max));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let settings = NavMeshSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.tile_world_size(), 40.0);
    }

    #[test]
    fn test_worker_count_minimum() {
        let settings = NavMeshSettings::default();
        // 0 = auto, но никогда меньше 3
        assert!(settings.worker_count() >= 3);

        let fixed = NavMeshSettings {
            workers: 2,
            ..Default::default()
        };
        assert_eq!(fixed.worker_count(), 2);
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let settings = NavMeshSettings {
            world_bounds_min: [10.0, 0.0, 0.0],
            world_bounds_max: [-10.0, 1.0, 1.0],
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_serde_defaults_for_omitted_fields() {
        // Опущенные поля берутся из Default
        let json = r#"{ "cell_size": 0.5, "tile_size_cells": 40 }"#;
        let settings: NavMeshSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.cell_size, 0.5);
        assert_eq!(settings.tile_world_size(), 20.0);
        assert_eq!(settings.max_tiles, 512);
    }
}
