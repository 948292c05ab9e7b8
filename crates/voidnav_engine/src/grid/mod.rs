//! Tile grid: отображение мировых координат в тайлы и обратно
//!
//! Грид фиксируется при создании движка: origin = world_bounds_min,
//! размер тайла = tile_size_cells * cell_size. Все функции чистые —
//! одинаковый вход всегда даёт одинаковый выход.

use bevy::prelude::*;

use crate::config::NavMeshSettings;

/// Грид-координата тайла (x, y по горизонтальным осям X/Z мира)
pub type TileCoord = IVec2;

#[derive(Resource, Debug, Clone)]
pub struct TileGrid {
    origin: Vec3,
    world_max: Vec3,
    tile_world_size: f32,
    /// Число тайлов по X/Z — тайлы вне этого диапазона не существуют
    tiles_x: i32,
    tiles_z: i32,
}

impl TileGrid {
    pub fn from_settings(settings: &NavMeshSettings) -> Self {
        let origin = settings.world_min();
        let world_max = settings.world_max();
        let tile_world_size = settings.tile_world_size();

        let tiles_x = ((world_max.x - origin.x) / tile_world_size).ceil() as i32;
        let tiles_z = ((world_max.z - origin.z) / tile_world_size).ceil() as i32;

        Self {
            origin,
            world_max,
            tile_world_size,
            tiles_x: tiles_x.max(1),
            tiles_z: tiles_z.max(1),
        }
    }

    pub fn tile_world_size(&self) -> f32 {
        self.tile_world_size
    }

    pub fn tile_count(&self) -> (i32, i32) {
        (self.tiles_x, self.tiles_z)
    }

    /// Тайл, содержащий мировую позицию (без клампа к гриду)
    pub fn world_to_tile(&self, position: Vec3) -> TileCoord {
        let x = ((position.x - self.origin.x) / self.tile_world_size).floor() as i32;
        let y = ((position.z - self.origin.z) / self.tile_world_size).floor() as i32;
        TileCoord::new(x, y)
    }

    /// Мировые границы тайла. По Y тайл занимает весь вертикальный
    /// диапазон мира — высоты режутся уже внутри сборки тайла
    pub fn tile_bounds(&self, coord: TileCoord) -> (Vec3, Vec3) {
        let min = Vec3::new(
            self.origin.x + coord.x as f32 * self.tile_world_size,
            self.origin.y,
            self.origin.z + coord.y as f32 * self.tile_world_size,
        );
        let max = Vec3::new(
            min.x + self.tile_world_size,
            self.world_max.y,
            min.z + self.tile_world_size,
        );
        (min, max)
    }

    pub fn contains(&self, coord: TileCoord) -> bool {
        coord.x >= 0 && coord.y >= 0 && coord.x < self.tiles_x && coord.y < self.tiles_z
    }

    /// Все тайлы, пересекающие AABB (row-major, без дублей).
    /// Диапазон кламплен к гриду: геометрия за world bounds затрагивает
    /// только существующие тайлы
    pub fn bounds_to_tiles(&self, min: Vec3, max: Vec3) -> Vec<TileCoord> {
        let lo = self.world_to_tile(min);
        let hi = self.world_to_tile(max);

        let x0 = lo.x.max(0);
        let y0 = lo.y.max(0);
        let x1 = hi.x.min(self.tiles_x - 1);
        let y1 = hi.y.min(self.tiles_z - 1);

        let mut tiles = Vec::new();
        for y in y0..=y1 {
            for x in x0..=x1 {
                tiles.push(TileCoord::new(x, y));
            }
        }
        tiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_10x10() -> TileGrid {
        // 10x10 тайлов по 4 метра
        let settings = NavMeshSettings {
            cell_size: 0.2,
            tile_size_cells: 20,
            world_bounds_min: [0.0, -5.0, 0.0],
            world_bounds_max: [40.0, 5.0, 40.0],
            ..Default::default()
        };
        TileGrid::from_settings(&settings)
    }

    #[test]
    fn test_world_to_tile_deterministic() {
        let grid = grid_10x10();
        let p = Vec3::new(14.3, 0.0, 18.7);
        assert_eq!(grid.world_to_tile(p), grid.world_to_tile(p));
        assert_eq!(grid.world_to_tile(p), TileCoord::new(3, 4));
    }

    #[test]
    fn test_tile_bounds_roundtrip() {
        let grid = grid_10x10();
        let coord = TileCoord::new(3, 4);
        let (min, max) = grid.tile_bounds(coord);
        assert_eq!(min.x, 12.0);
        assert_eq!(min.z, 16.0);
        assert_eq!(max.x, 16.0);
        assert_eq!(max.z, 20.0);
        // Центр тайла маппится обратно в тот же тайл
        let center = (min + max) / 2.0;
        assert_eq!(grid.world_to_tile(center), coord);
    }

    #[test]
    fn test_bounds_to_tiles_degenerate_point() {
        let grid = grid_10x10();
        let p = Vec3::new(5.0, 0.0, 5.0);
        let tiles = grid.bounds_to_tiles(p, p);
        assert_eq!(tiles, vec![TileCoord::new(1, 1)]);
    }

    #[test]
    fn test_bounds_to_tiles_spanning_boundary() {
        let grid = grid_10x10();
        // Бокс ровно на границе x=4 между тайлами 0 и 1 — включаются оба
        let tiles = grid.bounds_to_tiles(Vec3::new(3.0, 0.0, 1.0), Vec3::new(4.0, 0.0, 1.0));
        assert_eq!(tiles, vec![TileCoord::new(0, 0), TileCoord::new(1, 0)]);
    }

    #[test]
    fn test_bounds_to_tiles_multi_row_no_duplicates() {
        let grid = grid_10x10();
        let tiles = grid.bounds_to_tiles(Vec3::new(1.0, 0.0, 1.0), Vec3::new(9.0, 0.0, 9.0));
        // 3x3 блока, row-major
        assert_eq!(tiles.len(), 9);
        let mut dedup = tiles.clone();
        dedup.sort_by_key(|t| (t.y, t.x));
        dedup.dedup();
        assert_eq!(dedup.len(), 9);
        assert_eq!(tiles[0], TileCoord::new(0, 0));
        assert_eq!(tiles[8], TileCoord::new(2, 2));
    }

    #[test]
    fn test_bounds_to_tiles_clamped_to_world() {
        let grid = grid_10x10();
        // Бокс далеко за пределами мира затрагивает только существующие тайлы
        let tiles = grid.bounds_to_tiles(Vec3::new(-100.0, 0.0, -100.0), Vec3::new(100.0, 0.0, 2.0));
        assert_eq!(tiles.len(), 10);
        assert!(tiles.iter().all(|t| grid.contains(*t)));
    }
}
