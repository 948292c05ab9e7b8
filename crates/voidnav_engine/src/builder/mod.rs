//! Сборка полигональных данных одного тайла
//!
//! `build_tile` — чистая функция: job на входе, результат на выходе, никакого
//! разделяемого состояния. Гоняется на worker-потоках, поэтому job полностью
//! самодостаточен (буферы скопированы при submit).
//!
//! Пайплайн упрощённый, планарный: отбор проходимых треугольников по уклону,
//! клип к границам тайла, сварка вершин с квантизацией по cell-гриду,
//! смежность по общим рёбрам, отбраковка мелких островов. Квантизация
//! привязана к origin мира, так что граничные рёбра соседних тайлов дают
//! одинаковые ключи — это основа cross-tile связности в query.

use std::collections::HashMap;

use bevy::prelude::*;

use crate::config::NavMeshSettings;
use crate::grid::TileCoord;

/// Самодостаточный юнит работы: один rebuild одного тайла
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub tile: TileCoord,
    /// Generation на момент submit — store отбрасывает устаревшие результаты
    pub generation: u64,
    pub tile_bounds_min: Vec3,
    pub tile_bounds_max: Vec3,
    /// Снапшот конфига генерации (включая world bounds — origin квантизации)
    pub config: NavMeshSettings,
    /// Сшитые позиции (x,y,z подряд), скопированы при submit
    pub positions: Vec<f32>,
    pub indices: Vec<u32>,
}

/// Результат сборки. `data == None` — сборка провалилась (malformed вход);
/// пустой `TileMeshData` — валидный результат "в тайле нет проходимых
/// поверхностей" (геометрия уехала — тайл очищается)
#[derive(Debug)]
pub struct TileBuildResult {
    pub tile: TileCoord,
    pub generation: u64,
    pub data: Option<TileMeshData>,
    pub error: Option<String>,
}

impl TileBuildResult {
    pub fn success(&self) -> bool {
        self.data.is_some()
    }
}

/// Ключ ребра в квантизованных грид-координатах (endpoints отсортированы)
pub type EdgeKey = (IVec3, IVec3);

/// Полигональные данные одного тайла
#[derive(Debug, Clone, Default)]
pub struct TileMeshData {
    /// Сваренные вершины (мировые координаты после квантизации)
    pub vertices: Vec<Vec3>,
    pub triangles: Vec<[u32; 3]>,
    /// Сосед через каждое ребро треугольника (внутри тайла)
    pub neighbours: Vec<[Option<u32>; 3]>,
    /// Рёбра без внутреннего соседа — кандидаты на связь с соседним тайлом
    pub border_edges: HashMap<EdgeKey, u32>,
}

impl TileMeshData {
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }
}

pub fn edge_key(a: IVec3, b: IVec3) -> EdgeKey {
    if a.to_array() <= b.to_array() {
        (a, b)
    } else {
        (b, a)
    }
}

/// Собирает полигональные данные тайла из геометрического снапшота
pub fn build_tile(job: &BuildJob) -> TileBuildResult {
    let failure = |error: String| TileBuildResult {
        tile: job.tile,
        generation: job.generation,
        data: None,
        error: Some(error),
    };

    if job.positions.len() % 3 != 0 || job.indices.len() % 3 != 0 {
        return failure(format!(
            "malformed buffers: {} position floats, {} indices",
            job.positions.len(),
            job.indices.len()
        ));
    }
    let vertex_count = (job.positions.len() / 3) as u32;
    if let Some(bad) = job.indices.iter().find(|i| **i >= vertex_count) {
        return failure(format!("index {} вне буфера ({} вершин)", bad, vertex_count));
    }

    let config = &job.config;
    let origin = config.world_min();
    let cs = config.cell_size;
    let ch = config.cell_height;
    let walkable_min_ny = config.walkable_slope_angle.to_radians().cos();

    // Border padding: геометрия собирается с запасом на радиус агента,
    // полигоны затем режутся к точным границам тайла
    let pad = config.walkable_radius.max(cs);
    let gather_min = job.tile_bounds_min - Vec3::new(pad, 0.0, pad);
    let gather_max = job.tile_bounds_max + Vec3::new(pad, 0.0, pad);

    let vertex_at = |index: u32| {
        let i = index as usize * 3;
        Vec3::new(job.positions[i], job.positions[i + 1], job.positions[i + 2])
    };

    let quantize = |v: Vec3| {
        IVec3::new(
            ((v.x - origin.x) / cs).round() as i32,
            ((v.y - origin.y) / ch).round() as i32,
            ((v.z - origin.z) / cs).round() as i32,
        )
    };
    let dequantize = |q: IVec3| {
        origin + Vec3::new(q.x as f32 * cs, q.y as f32 * ch, q.z as f32 * cs)
    };

    let mut weld: HashMap<IVec3, u32> = HashMap::new();
    let mut quantized: Vec<IVec3> = Vec::new();
    let mut triangles: Vec<[u32; 3]> = Vec::new();

    for triangle in job.indices.chunks_exact(3) {
        let a = vertex_at(triangle[0]);
        let b = vertex_at(triangle[1]);
        let c = vertex_at(triangle[2]);

        // Фильтр по уклону: нормаль должна смотреть вверх достаточно круто.
        // Отсекает и стены, и потолки (n.y <= 0)
        let normal = (b - a).cross(c - a);
        let len = normal.length();
        if len < 1e-9 || normal.y / len < walkable_min_ny {
            continue;
        }

        let tri_min = a.min(b).min(c);
        let tri_max = a.max(b).max(c);
        if tri_min.x > gather_max.x
            || tri_max.x < gather_min.x
            || tri_min.z > gather_max.z
            || tri_max.z < gather_min.z
            || tri_min.y > gather_max.y
            || tri_max.y < gather_min.y
        {
            continue;
        }

        // Клип к точным XZ-границам тайла: соседние тайлы режут один и тот же
        // исходный треугольник одной и той же плоскостью — граничные вершины
        // совпадают и свариваются в одинаковые ключи
        let clipped = clip_to_tile(
            vec![a, b, c],
            job.tile_bounds_min,
            job.tile_bounds_max,
        );
        if clipped.len() < 3 {
            continue;
        }

        // Квантизация + удаление схлопнувшихся вершин
        let mut poly: Vec<IVec3> = Vec::with_capacity(clipped.len());
        for v in clipped {
            let q = quantize(v);
            if poly.last() != Some(&q) {
                poly.push(q);
            }
        }
        while poly.len() > 1 && poly.first() == poly.last() {
            poly.pop();
        }
        if poly.len() < 3 {
            continue;
        }

        let ids: Vec<u32> = poly
            .iter()
            .map(|q| {
                *weld.entry(*q).or_insert_with(|| {
                    quantized.push(*q);
                    (quantized.len() - 1) as u32
                })
            })
            .collect();

        // Fan-триангуляция клипнутого полигона
        for i in 1..ids.len() - 1 {
            let tri = [ids[0], ids[i], ids[i + 1]];
            if tri[0] == tri[1] || tri[1] == tri[2] || tri[0] == tri[2] {
                continue;
            }
            // Вырожденные в проекции XZ треугольники бесполезны для навигации
            let qa = quantized[tri[0] as usize];
            let qb = quantized[tri[1] as usize];
            let qc = quantized[tri[2] as usize];
            let area2 = (qb.x - qa.x) as i64 * (qc.z - qa.z) as i64
                - (qc.x - qa.x) as i64 * (qb.z - qa.z) as i64;
            if area2 == 0 {
                continue;
            }
            triangles.push(tri);
        }
    }

    // Отбраковка мелких островов по площади региона
    let triangles = prune_small_regions(triangles, &quantized, config);

    // Компактизация вершин после отбраковки + финальная смежность
    let mut remap: HashMap<u32, u32> = HashMap::new();
    let mut vertices: Vec<Vec3> = Vec::new();
    let mut final_quantized: Vec<IVec3> = Vec::new();
    let mut final_triangles: Vec<[u32; 3]> = Vec::with_capacity(triangles.len());

    for tri in &triangles {
        let mapped = tri.map(|old| {
            *remap.entry(old).or_insert_with(|| {
                let q = quantized[old as usize];
                final_quantized.push(q);
                vertices.push(dequantize(q));
                (vertices.len() - 1) as u32
            })
        });
        final_triangles.push(mapped);
    }

    let (neighbours, border_edges) = compute_adjacency(&final_triangles, &final_quantized);

    TileBuildResult {
        tile: job.tile,
        generation: job.generation,
        data: Some(TileMeshData {
            vertices,
            triangles: final_triangles,
            neighbours,
            border_edges,
        }),
        error: None,
    }
}

/// Sutherland–Hodgman клип полигона к четырём XZ-плоскостям тайла
fn clip_to_tile(mut poly: Vec<Vec3>, min: Vec3, max: Vec3) -> Vec<Vec3> {
    let planes: [(Vec3, f32); 4] = [
        (Vec3::X, -min.x),
        (Vec3::NEG_X, max.x),
        (Vec3::Z, -min.z),
        (Vec3::NEG_Z, max.z),
    ];

    for (normal, offset) in planes {
        if poly.is_empty() {
            break;
        }
        let mut clipped = Vec::with_capacity(poly.len() + 1);
        for i in 0..poly.len() {
            let current = poly[i];
            let next = poly[(i + 1) % poly.len()];
            let d0 = normal.dot(current) + offset;
            let d1 = normal.dot(next) + offset;

            if d0 >= 0.0 {
                clipped.push(current);
            }
            if (d0 >= 0.0) != (d1 >= 0.0) {
                let t = d0 / (d0 - d1);
                clipped.push(current.lerp(next, t));
            }
        }
        poly = clipped;
    }
    poly
}

/// Связные компоненты по смежности; компоненты с площадью меньше
/// min_region_area (в ячейках) отбрасываются
fn prune_small_regions(
    triangles: Vec<[u32; 3]>,
    quantized: &[IVec3],
    config: &NavMeshSettings,
) -> Vec<[u32; 3]> {
    if triangles.is_empty() || config.min_region_area <= 0.0 {
        return triangles;
    }

    let (neighbours, _) = compute_adjacency(&triangles, quantized);

    let mut component = vec![usize::MAX; triangles.len()];
    let mut areas: Vec<f64> = Vec::new();

    for start in 0..triangles.len() {
        if component[start] != usize::MAX {
            continue;
        }
        let id = areas.len();
        areas.push(0.0);
        let mut stack = vec![start];
        component[start] = id;

        while let Some(t) = stack.pop() {
            let [a, b, c] = triangles[t];
            let qa = quantized[a as usize];
            let qb = quantized[b as usize];
            let qc = quantized[c as usize];
            // Площадь в ячейках: координаты уже в cell-гриде
            let area2 = ((qb.x - qa.x) as i64 * (qc.z - qa.z) as i64
                - (qc.x - qa.x) as i64 * (qb.z - qa.z) as i64)
                .unsigned_abs();
            areas[id] += area2 as f64 / 2.0;

            for neighbour in neighbours[t].iter().flatten() {
                let n = *neighbour as usize;
                if component[n] == usize::MAX {
                    component[n] = id;
                    stack.push(n);
                }
            }
        }
    }

    let threshold = config.min_region_area as f64;
    triangles
        .into_iter()
        .enumerate()
        .filter(|(i, _)| areas[component[*i]] >= threshold)
        .map(|(_, tri)| tri)
        .collect()
}

/// Смежность по общим рёбрам + таблица граничных рёбер.
/// Ребро ровно с двумя треугольниками линкует их; ровно с одним — граница
fn compute_adjacency(
    triangles: &[[u32; 3]],
    quantized: &[IVec3],
) -> (Vec<[Option<u32>; 3]>, HashMap<EdgeKey, u32>) {
    let mut edge_map: HashMap<(u32, u32), Vec<(u32, usize)>> = HashMap::new();
    for (t, tri) in triangles.iter().enumerate() {
        for e in 0..3 {
            let a = tri[e];
            let b = tri[(e + 1) % 3];
            let key = if a < b { (a, b) } else { (b, a) };
            edge_map.entry(key).or_default().push((t as u32, e));
        }
    }

    let mut neighbours = vec![[None, None, None]; triangles.len()];
    let mut border_edges = HashMap::new();

    for ((a, b), users) in edge_map {
        match users.as_slice() {
            [(t0, e0), (t1, e1)] => {
                neighbours[*t0 as usize][*e0] = Some(*t1);
                neighbours[*t1 as usize][*e1] = Some(*t0);
            }
            [(t0, _)] => {
                let key = edge_key(quantized[a as usize], quantized[b as usize]);
                border_edges.insert(key, *t0);
            }
            // Немногообразная геометрия (3+ треугольника на ребро) не линкуется
            _ => {}
        }
    }

    (neighbours, border_edges)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> NavMeshSettings {
        NavMeshSettings {
            cell_size: 0.2,
            cell_height: 0.2,
            tile_size_cells: 20,
            min_region_area: 8.0,
            world_bounds_min: [0.0, -5.0, 0.0],
            world_bounds_max: [40.0, 5.0, 40.0],
            ..Default::default()
        }
    }

    fn quad(x0: f32, z0: f32, x1: f32, z1: f32, y: f32) -> (Vec<f32>, Vec<u32>) {
        let positions = vec![
            x0, y, z0, //
            x1, y, z0, //
            x1, y, z1, //
            x0, y, z1,
        ];
        // CCW при взгляде сверху — нормаль вверх
        let indices = vec![0, 2, 1, 0, 3, 2];
        (positions, indices)
    }

    fn job_for_tile(tile: TileCoord, positions: Vec<f32>, indices: Vec<u32>) -> BuildJob {
        let config = test_config();
        let tws = config.tile_world_size();
        let min = Vec3::new(tile.x as f32 * tws, -5.0, tile.y as f32 * tws);
        BuildJob {
            tile,
            generation: 1,
            tile_bounds_min: min,
            tile_bounds_max: min + Vec3::new(tws, 10.0, tws),
            config,
            positions,
            indices,
        }
    }

    #[test]
    fn test_flat_quad_is_walkable() {
        let (positions, indices) = quad(13.0, 17.0, 15.0, 19.0, 0.5);
        let result = build_tile(&job_for_tile(TileCoord::new(3, 4), positions, indices));

        assert!(result.success());
        let data = result.data.unwrap();
        assert_eq!(data.triangles.len(), 2);
        // Два треугольника квада связаны через диагональ
        let linked: usize = data
            .neighbours
            .iter()
            .map(|n| n.iter().flatten().count())
            .sum();
        assert_eq!(linked, 2);
    }

    #[test]
    fn test_vertical_wall_filtered() {
        // Квад в плоскости XY — стена, нормаль горизонтальна
        let positions = vec![
            13.0, 0.0, 17.0, //
            15.0, 0.0, 17.0, //
            15.0, 2.0, 17.0, //
            13.0, 2.0, 17.0,
        ];
        let indices = vec![0, 1, 2, 0, 2, 3];
        let result = build_tile(&job_for_tile(TileCoord::new(3, 4), positions, indices));

        assert!(result.success());
        assert!(result.data.unwrap().is_empty());
    }

    #[test]
    fn test_empty_geometry_is_success() {
        let result = build_tile(&job_for_tile(TileCoord::new(0, 0), vec![], vec![]));
        assert!(result.success());
        assert!(result.data.unwrap().is_empty());
    }

    #[test]
    fn test_malformed_indices_fail() {
        let (positions, mut indices) = quad(1.0, 1.0, 3.0, 3.0, 0.0);
        indices[0] = 99;
        let result = build_tile(&job_for_tile(TileCoord::new(0, 0), positions, indices));

        assert!(!result.success());
        assert!(result.error.is_some());
    }

    #[test]
    fn test_spanning_quad_clipped_to_tile() {
        // Квад 2..6 по X пересекает границу тайлов 0|1 (x=4)
        let (positions, indices) = quad(2.0, 1.0, 6.0, 3.0, 0.0);
        let result = build_tile(&job_for_tile(TileCoord::new(0, 0), positions, indices));

        let data = result.data.unwrap();
        assert!(!data.is_empty());
        // Все вершины в пределах тайла (+ допуск на квантизацию)
        for v in &data.vertices {
            assert!(v.x >= -0.11 && v.x <= 4.11, "вершина {} вне тайла", v.x);
        }
    }

    #[test]
    fn test_border_edges_match_across_tiles() {
        let (positions, indices) = quad(2.0, 1.0, 6.0, 3.0, 0.0);
        let left = build_tile(&job_for_tile(
            TileCoord::new(0, 0),
            positions.clone(),
            indices.clone(),
        ));
        let right = build_tile(&job_for_tile(TileCoord::new(1, 0), positions, indices));

        let left_data = left.data.unwrap();
        let right_data = right.data.unwrap();
        // Общая граница x=4: хотя бы одно ребро с одинаковым ключом в обоих тайлах
        let shared = left_data
            .border_edges
            .keys()
            .filter(|k| right_data.border_edges.contains_key(*k))
            .count();
        assert!(shared > 0, "граничные рёбра соседних тайлов не совпали");
    }

    #[test]
    fn test_small_island_pruned() {
        // Большой квад + крошечный островок в стороне
        let (mut positions, mut indices) = quad(13.0, 17.0, 15.0, 19.0, 0.5);
        let base = (positions.len() / 3) as u32;
        positions.extend_from_slice(&[
            12.1, 0.5, 16.1, //
            12.3, 0.5, 16.1, //
            12.3, 0.5, 16.3,
        ]);
        indices.extend_from_slice(&[base, base + 2, base + 1]);

        let result = build_tile(&job_for_tile(TileCoord::new(3, 4), positions, indices));
        let data = result.data.unwrap();
        // Островок 0.02 м² == 0.5 ячейки < min_region_area — отброшен
        assert_eq!(data.triangles.len(), 2);
    }
}
