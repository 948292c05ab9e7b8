//! Nav agent: follow-поведение поверх query service
//!
//! Агент кэширует путь к цели и не пересчитывает его каждый кадр: repath
//! только когда цель ушла от конца пути дальше порога, путь кончился или
//! меш обновился. Выход — направление движения; применение к физике/
//! character controller'у — забота gameplay-кода.

use bevy::prelude::*;

use crate::mesh::NavMeshUpdated;
use crate::query::Navigation;

#[derive(Component, Debug)]
pub struct NavAgent {
    /// Цель следования. None — агент стоит
    pub follow: Option<Entity>,
    /// Порог смещения цели, после которого путь считается устаревшим (метры)
    pub repath_threshold: f32,
    /// Радиус достижения waypoint'а (метры)
    pub waypoint_tolerance: f32,
    /// Выход: нормализованное направление к следующему waypoint'у
    pub desired_direction: Vec3,

    path: Vec<Vec3>,
    next_waypoint: usize,
}

impl Default for NavAgent {
    fn default() -> Self {
        Self {
            follow: None,
            repath_threshold: 0.1,
            waypoint_tolerance: 0.25,
            desired_direction: Vec3::ZERO,
            path: Vec::new(),
            next_waypoint: 0,
        }
    }
}

impl NavAgent {
    pub fn following(target: Entity) -> Self {
        Self {
            follow: Some(target),
            ..Default::default()
        }
    }

    pub fn path(&self) -> &[Vec3] {
        &self.path
    }

    /// Путь валиден, пока он есть и цель не ушла от его конца
    fn path_valid(&self, target: Vec3) -> bool {
        match self.path.last() {
            Some(end) => end.distance(target) <= self.repath_threshold,
            None => false,
        }
    }

    fn set_path(&mut self, path: Vec<Vec3>) {
        self.path = path;
        self.next_waypoint = 0;
    }

    fn clear(&mut self) {
        self.path.clear();
        self.next_waypoint = 0;
        self.desired_direction = Vec3::ZERO;
    }

    /// Продвигает waypoint и обновляет направление движения
    fn steer(&mut self, position: Vec3) {
        while self.next_waypoint < self.path.len()
            && position.distance(self.path[self.next_waypoint]) < self.waypoint_tolerance
        {
            self.next_waypoint += 1;
        }

        self.desired_direction = match self.path.get(self.next_waypoint) {
            Some(next) => (*next - position).normalize_or_zero(),
            None => Vec3::ZERO,
        };
    }
}

/// Система следования: repath по необходимости + steering
pub fn nav_agent_follow(
    navigation: Res<Navigation>,
    mut mesh_updates: EventReader<NavMeshUpdated>,
    mut agents: Query<(&GlobalTransform, &mut NavAgent)>,
    targets: Query<&GlobalTransform>,
) {
    // Обновление меша инвалидирует закэшированные пути
    let mesh_changed = !mesh_updates.is_empty();
    mesh_updates.clear();

    for (transform, mut agent) in agents.iter_mut() {
        let Some(follow) = agent.follow else {
            agent.clear();
            continue;
        };
        let Ok(target_transform) = targets.get(follow) else {
            // Цель despawn'улась
            agent.follow = None;
            agent.clear();
            continue;
        };

        let position = transform.translation();
        let target = target_transform.translation();

        if mesh_changed || !agent.path_valid(target) {
            if navigation.has_query() {
                let result = navigation.find_path(position, target);
                if result.success && !result.path.is_empty() {
                    agent.set_path(result.path);
                }
                // При неуспехе старый путь остаётся — лучше идти по устаревшему,
                // чем стоять
            }
        }

        agent.steer(position);
    }
}
