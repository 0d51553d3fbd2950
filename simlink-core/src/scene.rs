//! Scene sub-state mirrored from the simulation.
//!
//! Waypoints, layers, exploded view and camera are owned by the simulation;
//! this is the client's last known copy, fed by the router and saved with
//! the rest of the session.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::protocol::{CameraUpdate, LayerEntry, LayerGroup};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Waypoint {
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ExplosionState {
    /// 0..=100
    pub value: f64,
    pub animating: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SceneState {
    pub waypoints: Vec<Waypoint>,
    pub active_waypoint: Option<usize>,
    pub layers: Vec<LayerEntry>,
    pub hierarchy: Vec<LayerGroup>,
    pub explosion: ExplosionState,
    pub camera: CameraUpdate,
}

impl SceneState {
    pub fn set_waypoints(&mut self, names: Vec<String>) {
        self.waypoints = names
            .into_iter()
            .map(|name| Waypoint {
                name,
                active: false,
            })
            .collect();
        self.active_waypoint = None;
    }

    /// Mark waypoint `index` active or inactive. Only one is active at a time.
    pub fn update_waypoint(&mut self, index: usize, active: bool) {
        if index >= self.waypoints.len() {
            warn!(index, known = self.waypoints.len(), "update for unknown waypoint");
            return;
        }
        if active {
            for (i, wp) in self.waypoints.iter_mut().enumerate() {
                wp.active = i == index;
            }
            self.active_waypoint = Some(index);
        } else {
            self.waypoints[index].active = false;
            if self.active_waypoint == Some(index) {
                self.active_waypoint = None;
            }
        }
    }

    pub fn set_layers(&mut self, layers: Vec<LayerEntry>) {
        debug!(count = layers.len(), "layers");
        self.layers = layers;
    }

    pub fn set_hierarchy(&mut self, groups: Vec<LayerGroup>) {
        debug!(count = groups.len(), "layer hierarchy");
        self.hierarchy = groups;
    }

    pub fn set_explosion(&mut self, value: f64, animating: bool) {
        self.explosion = ExplosionState {
            value: value.clamp(0.0, 100.0),
            animating,
        };
    }

    pub fn set_camera(&mut self, camera: CameraUpdate) {
        self.camera = camera;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_active_waypoint() {
        let mut scene = SceneState::default();
        scene.set_waypoints(vec!["Gate".into(), "Trench".into(), "Meter".into()]);

        scene.update_waypoint(1, true);
        scene.update_waypoint(2, true);
        assert_eq!(scene.active_waypoint, Some(2));
        assert!(!scene.waypoints[1].active);

        scene.update_waypoint(2, false);
        assert_eq!(scene.active_waypoint, None);

        scene.update_waypoint(9, true);
        assert_eq!(scene.active_waypoint, None);
    }

    #[test]
    fn explosion_is_clamped() {
        let mut scene = SceneState::default();
        scene.set_explosion(140.0, true);
        assert_eq!(scene.explosion.value, 100.0);
        assert!(scene.explosion.animating);
    }
}
