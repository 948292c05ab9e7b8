//! События navmesh для подписчиков (gameplay, дебаг, repath агентов)

use bevy::prelude::*;

use crate::grid::TileCoord;

/// Тайл применён к мешу. version строго растёт — потребители детектят
/// "меш изменился с моего последнего query" сравнением версий
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavMeshUpdated {
    pub version: u64,
    pub tile: TileCoord,
}
