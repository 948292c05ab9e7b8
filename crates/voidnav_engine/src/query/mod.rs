//! Path query service
//!
//! `Navigation` — resource для gameplay-кода: find_path / find_closest_point.
//! Держит лениво перестраиваемый `NavMeshQuery` handle на текущий store;
//! handle перевязывается при (пере)создании или удалении navmesh entity
//! (подписка на Added / RemovedComponents). Все запросы деградируют мягко:
//! нет меша — warning и пустой результат, никаких паник и блокировок тика.
//!
//! Поиск пути: A* по треугольникам тайлов. Внутри тайла — смежность из
//! сборки; через границу тайлов — совпадение квантизованных ключей граничных
//! рёбер. Waypoint'ы — середины порталов между треугольниками.

use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, RwLock};

use bevy::prelude::*;

use crate::builder::{edge_key, TileMeshData};
use crate::config::NavMeshSettings;
use crate::grid::TileCoord;
use crate::logger::{log_error, log_warning};
use crate::mesh::{NavMeshHandle, TiledNavMesh};

/// Результат поиска пути. При неуспехе path пуст
#[derive(Debug, Clone, Default)]
pub struct PathResult {
    pub success: bool,
    pub path: Vec<Vec3>,
}

impl PathResult {
    fn failure() -> Self {
        Self::default()
    }
}

/// Query handle, привязанный к конкретному экземпляру store
pub struct NavMeshQuery {
    mesh: Arc<RwLock<TiledNavMesh>>,
    half_extents: Vec3,
}

/// Сервис навигации для gameplay-потребителей
#[derive(Resource, Default)]
pub struct Navigation {
    query: Option<NavMeshQuery>,
    bound_entity: Option<Entity>,
}

impl Navigation {
    pub fn has_query(&self) -> bool {
        self.query.is_some()
    }

    /// Ищет путь между двумя точками
    pub fn find_path(&self, start: Vec3, end: Vec3) -> PathResult {
        let Some(query) = self.query.as_ref() else {
            log_warning("NavMesh has not been generated yet");
            return PathResult::failure();
        };
        let result = query.compute_path(start, end);
        if !result.success {
            log_warning(&format!("Failed to generate path {:?} -> {:?}", start, end));
        }
        result
    }

    /// Ближайшая точка на navmesh. None если меш пуст или не создан
    pub fn find_closest_point(&self, position: Vec3) -> Option<Vec3> {
        let Some(query) = self.query.as_ref() else {
            log_warning("NavMesh has not been generated yet");
            return None;
        };
        query.find_closest_point(position)
    }
}

/// Привязка query handle к появившемуся navmesh entity
pub fn bind_navmesh_queries(
    settings: Res<NavMeshSettings>,
    mut navigation: ResMut<Navigation>,
    added: Query<(Entity, &NavMeshHandle), Added<NavMeshHandle>>,
) {
    for (entity, handle) in added.iter() {
        navigation.query = Some(NavMeshQuery::new(handle.0.clone(), settings.query_extents()));
        navigation.bound_entity = Some(entity);
    }
}

/// Сброс (и перевязка, если есть другой) при удалении navmesh entity
pub fn unbind_navmesh_queries(
    settings: Res<NavMeshSettings>,
    mut navigation: ResMut<Navigation>,
    mut removed: RemovedComponents<NavMeshHandle>,
    remaining: Query<(Entity, &NavMeshHandle)>,
) {
    for entity in removed.read() {
        if navigation.bound_entity != Some(entity) {
            continue;
        }
        navigation.query = None;
        navigation.bound_entity = None;

        if let Some((other, handle)) = remaining.iter().next() {
            navigation.query =
                Some(NavMeshQuery::new(handle.0.clone(), settings.query_extents()));
            navigation.bound_entity = Some(other);
        }
    }
}

/// Узел поиска: (тайл, индекс треугольника)
type SearchNode = (TileCoord, u32);

struct OpenEntry {
    f: f32,
    at: Vec3,
    node: SearchNode,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.f == other.f
    }
}
impl Eq for OpenEntry {}
impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Min-heap по f (BinaryHeap — max-heap, сравнение перевёрнуто)
        other.f.total_cmp(&self.f)
    }
}

impl NavMeshQuery {
    pub fn new(mesh: Arc<RwLock<TiledNavMesh>>, half_extents: Vec3) -> Self {
        Self { mesh, half_extents }
    }

    pub fn compute_path(&self, from: Vec3, to: Vec3) -> PathResult {
        let mesh = match self.mesh.read() {
            Ok(mesh) => mesh,
            Err(e) => {
                log_error(&format!("navmesh store lock poisoned: {}", e));
                return PathResult::failure();
            }
        };

        let Some((start_node, start_point)) = nearest_triangle(&mesh, from, self.half_extents)
        else {
            return PathResult::failure();
        };
        let Some((end_node, end_point)) = nearest_triangle(&mesh, to, self.half_extents) else {
            return PathResult::failure();
        };

        if start_node == end_node {
            return PathResult {
                success: true,
                path: vec![start_point, end_point],
            };
        }

        // A* по треугольникам; стоимость — расстояние между точками входа
        let mut open = BinaryHeap::new();
        let mut g_score: HashMap<SearchNode, f32> = HashMap::new();
        let mut came_from: HashMap<SearchNode, (SearchNode, Vec3)> = HashMap::new();

        g_score.insert(start_node, 0.0);
        open.push(OpenEntry {
            f: start_point.distance(to),
            at: start_point,
            node: start_node,
        });

        let mut found = false;
        while let Some(current) = open.pop() {
            if current.node == end_node {
                found = true;
                break;
            }
            let current_g = g_score.get(&current.node).copied().unwrap_or(f32::INFINITY);

            for (neighbour, portal) in node_neighbours(&mesh, current.node) {
                let tentative = current_g + current.at.distance(portal);
                if tentative < g_score.get(&neighbour).copied().unwrap_or(f32::INFINITY) {
                    g_score.insert(neighbour, tentative);
                    came_from.insert(neighbour, (current.node, portal));
                    open.push(OpenEntry {
                        f: tentative + portal.distance(to),
                        at: portal,
                        node: neighbour,
                    });
                }
            }
        }

        if !found {
            return PathResult::failure();
        }

        // Восстановление: середины порталов между start и end
        let mut portals = Vec::new();
        let mut node = end_node;
        while node != start_node {
            let Some((previous, portal)) = came_from.get(&node) else {
                return PathResult::failure();
            };
            portals.push(*portal);
            node = *previous;
        }
        portals.reverse();

        let mut path = Vec::with_capacity(portals.len() + 2);
        path.push(start_point);
        path.extend(portals);
        path.push(end_point);

        PathResult {
            success: true,
            path,
        }
    }

    pub fn find_closest_point(&self, point: Vec3) -> Option<Vec3> {
        let mesh = self.mesh.read().ok()?;

        let mut best: Option<(f32, Vec3)> = None;
        for coord in mesh.tile_coords().collect::<Vec<_>>() {
            let Some(data) = mesh.tile(coord) else { continue };
            for tri in 0..data.triangles.len() {
                let (a, b, c) = triangle_vertices(data, tri as u32);
                let candidate = closest_point_on_triangle(point, a, b, c);
                let d2 = candidate.distance_squared(point);
                if best.map(|(bd, _)| d2 < bd).unwrap_or(true) {
                    best = Some((d2, candidate));
                }
            }
        }
        best.map(|(_, p)| p)
    }
}

fn triangle_vertices(data: &TileMeshData, tri: u32) -> (Vec3, Vec3, Vec3) {
    let [a, b, c] = data.triangles[tri as usize];
    (
        data.vertices[a as usize],
        data.vertices[b as usize],
        data.vertices[c as usize],
    )
}

/// Ближайший треугольник в пределах half_extents от точки
fn nearest_triangle(
    mesh: &TiledNavMesh,
    point: Vec3,
    half_extents: Vec3,
) -> Option<(SearchNode, Vec3)> {
    let candidates = mesh
        .grid()
        .bounds_to_tiles(point - half_extents, point + half_extents);

    let mut best: Option<(f32, SearchNode, Vec3)> = None;
    for coord in candidates {
        let Some(data) = mesh.tile(coord) else { continue };
        for tri in 0..data.triangles.len() {
            let (a, b, c) = triangle_vertices(data, tri as u32);
            let candidate = closest_point_on_triangle(point, a, b, c);
            let delta = (candidate - point).abs();
            if delta.x > half_extents.x || delta.y > half_extents.y || delta.z > half_extents.z {
                continue;
            }
            let d2 = candidate.distance_squared(point);
            if best.map(|(bd, _, _)| d2 < bd).unwrap_or(true) {
                best = Some((d2, (coord, tri as u32), candidate));
            }
        }
    }
    best.map(|(_, node, p)| (node, p))
}

/// Соседи узла: внутритайловая смежность + граничные рёбра соседних тайлов
fn node_neighbours(mesh: &TiledNavMesh, node: SearchNode) -> Vec<(SearchNode, Vec3)> {
    let (coord, tri) = node;
    let Some(data) = mesh.tile(coord) else {
        return Vec::new();
    };

    let mut result = Vec::new();
    let triangle = data.triangles[tri as usize];
    let (tile_min, tile_max) = mesh.grid().tile_bounds(coord);
    // После квантизации вершина может отстоять от границы на полклетки
    let eps = mesh.cell_size() * 0.51;

    for e in 0..3 {
        let a = data.vertices[triangle[e] as usize];
        let b = data.vertices[triangle[(e + 1) % 3] as usize];
        let portal = (a + b) / 2.0;

        if let Some(neighbour) = data.neighbours[tri as usize][e] {
            result.push(((coord, neighbour), portal));
            continue;
        }

        // Ребро без внутреннего соседа: ищем пару в соседнем тайле по ключу
        let key = edge_key(mesh.quantize(a), mesh.quantize(b));
        let mut candidates: [Option<TileCoord>; 4] = [None; 4];
        if (a.x - tile_min.x).abs() < eps && (b.x - tile_min.x).abs() < eps {
            candidates[0] = Some(coord - IVec2::X);
        }
        if (a.x - tile_max.x).abs() < eps && (b.x - tile_max.x).abs() < eps {
            candidates[1] = Some(coord + IVec2::X);
        }
        if (a.z - tile_min.z).abs() < eps && (b.z - tile_min.z).abs() < eps {
            candidates[2] = Some(coord - IVec2::Y);
        }
        if (a.z - tile_max.z).abs() < eps && (b.z - tile_max.z).abs() < eps {
            candidates[3] = Some(coord + IVec2::Y);
        }

        for neighbour_coord in candidates.into_iter().flatten() {
            if let Some(other) = mesh.tile(neighbour_coord) {
                if let Some(other_tri) = other.border_edges.get(&key) {
                    result.push(((neighbour_coord, *other_tri), portal));
                }
            }
        }
    }

    result
}

/// Ближайшая точка на треугольнике (Ericson, Real-Time Collision Detection)
fn closest_point_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;

    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}
