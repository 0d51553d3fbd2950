//! Typed payloads for messages received from the simulation.
//!
//! [`Payload::parse`] is total: every topic/data pair produces a value.
//! Topics without a dedicated parser land in [`Payload::Generic`] with
//! their raw tokens so diagnostics can still show them.

use serde::{Deserialize, Serialize};

use super::{coerce_bool, coerce_f64, coerce_text, coerce_usize, tokens, topics};

/// Prefix marking a child entry in a `hierarchical_list` payload.
const CHILD_PREFIX: char = '>';

/// Separator between a layer name and its visibility flag.
const VISIBILITY_SEPARATOR: char = '=';

// ── Payload types ────────────────────────────────────────────────

/// `training_progress:progress%:taskName:phase:currentTask:totalTasks:isActive`
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub progress: f64,
    pub task_name: String,
    pub phase: String,
    pub current_task: usize,
    pub total_tasks: usize,
    pub is_active: bool,
}

/// `camera_update:mode:perspective:distance:isTransitioning`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraUpdate {
    pub mode: String,
    pub perspective: String,
    pub distance: f64,
    pub transitioning: bool,
}

/// A single toggleable layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerEntry {
    pub name: String,
    pub visible: bool,
}

/// A parent layer with its children, from `hierarchical_list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerGroup {
    pub parent: LayerEntry,
    pub children: Vec<LayerEntry>,
}

// ── Payload ──────────────────────────────────────────────────────

/// Topic-specific parse of a message's data string.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    TrainingProgress(ProgressUpdate),
    ToolChange {
        tool: String,
    },
    /// `task_completed:taskId[:nextIndex]`
    TaskCompleted {
        task_id: String,
        next_index: Option<usize>,
    },
    /// `task_start:Tool[:Pipe]`
    TaskStart {
        tool: String,
        pipe: Option<String>,
    },
    QuestionRequest {
        question_id: String,
    },
    TrainingComplete,
    WaypointList {
        names: Vec<String>,
    },
    WaypointUpdate {
        index: usize,
        active: bool,
    },
    LayerList {
        layers: Vec<LayerEntry>,
    },
    HierarchicalList {
        groups: Vec<LayerGroup>,
    },
    ExplosionUpdate {
        value: f64,
        animating: bool,
    },
    CameraUpdate(CameraUpdate),
    /// Any other topic, exposed as raw tokens.
    Generic {
        tokens: Vec<String>,
    },
}

impl Payload {
    /// Parse `data` according to `topic`.
    pub fn parse(topic: &str, data: &str) -> Self {
        let toks = tokens(data);
        let at = |i: usize| toks.get(i).copied();

        match topic {
            topics::TRAINING_PROGRESS => Payload::TrainingProgress(ProgressUpdate {
                progress: coerce_f64(at(0)).clamp(0.0, 100.0),
                task_name: coerce_text(at(1)).unwrap_or_default(),
                phase: coerce_text(at(2)).unwrap_or_default(),
                current_task: coerce_usize(at(3)),
                total_tasks: coerce_usize(at(4)),
                is_active: coerce_bool(at(5)),
            }),
            topics::TOOL_CHANGE => Payload::ToolChange {
                tool: coerce_text(at(0)).unwrap_or_default(),
            },
            topics::TASK_COMPLETED => Payload::TaskCompleted {
                task_id: coerce_text(at(0)).unwrap_or_default(),
                next_index: at(1)
                    .map(str::trim)
                    .and_then(|t| t.parse::<usize>().ok()),
            },
            topics::TASK_START => Payload::TaskStart {
                tool: coerce_text(at(0)).unwrap_or_default(),
                pipe: coerce_text(at(1)),
            },
            topics::QUESTION_REQUEST => Payload::QuestionRequest {
                question_id: coerce_text(at(0)).unwrap_or_default(),
            },
            topics::TRAINING_COMPLETE => Payload::TrainingComplete,
            topics::WAYPOINT_LIST => Payload::WaypointList {
                names: toks.iter().filter_map(|t| coerce_text(Some(*t))).collect(),
            },
            topics::WAYPOINT_UPDATE => Payload::WaypointUpdate {
                index: coerce_usize(at(0)),
                active: coerce_bool(at(1)),
            },
            topics::LAYER_LIST => Payload::LayerList {
                layers: toks.iter().filter_map(|t| parse_layer(t)).collect(),
            },
            topics::HIERARCHICAL_LIST => Payload::HierarchicalList {
                groups: parse_hierarchy(&toks),
            },
            topics::EXPLOSION_UPDATE => Payload::ExplosionUpdate {
                value: coerce_f64(at(0)).clamp(0.0, 100.0),
                animating: coerce_bool(at(1)),
            },
            topics::CAMERA_UPDATE => Payload::CameraUpdate(CameraUpdate {
                mode: coerce_text(at(0)).unwrap_or_default(),
                perspective: coerce_text(at(1)).unwrap_or_default(),
                distance: coerce_f64(at(2)),
                transitioning: coerce_bool(at(3)),
            }),
            _ => Payload::Generic {
                tokens: toks.iter().map(|t| t.to_string()).collect(),
            },
        }
    }
}

/// `Name` or `Name=bool`; visibility defaults to `true`.
fn parse_layer(token: &str) -> Option<LayerEntry> {
    let (name, visible) = match token.split_once(VISIBILITY_SEPARATOR) {
        Some((name, flag)) => (name, coerce_bool(Some(flag))),
        None => (token, true),
    };
    coerce_text(Some(name)).map(|name| LayerEntry { name, visible })
}

fn parse_hierarchy(toks: &[&str]) -> Vec<LayerGroup> {
    let mut groups: Vec<LayerGroup> = Vec::new();
    for tok in toks {
        match tok.strip_prefix(CHILD_PREFIX) {
            Some(child) => {
                // Orphan children (before any parent) are dropped.
                if let (Some(group), Some(entry)) = (groups.last_mut(), parse_layer(child)) {
                    group.children.push(entry);
                }
            }
            None => {
                if let Some(parent) = parse_layer(tok) {
                    groups.push(LayerGroup {
                        parent,
                        children: Vec::new(),
                    });
                }
            }
        }
    }
    groups
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode;

    #[test]
    fn training_progress_fields() {
        let msg = decode("training_progress:42:Shovel:excavation:2:6:true").unwrap();
        let Payload::TrainingProgress(p) = msg.payload else {
            panic!("expected TrainingProgress");
        };
        assert_eq!(p.progress, 42.0);
        assert_eq!(p.task_name, "Shovel");
        assert_eq!(p.phase, "excavation");
        assert_eq!(p.current_task, 2);
        assert_eq!(p.total_tasks, 6);
        assert!(p.is_active);
    }

    #[test]
    fn training_progress_tolerates_garbage() {
        let Payload::TrainingProgress(p) = Payload::parse("training_progress", "lots:x") else {
            panic!("expected TrainingProgress");
        };
        assert_eq!(p.progress, 0.0);
        assert_eq!(p.task_name, "x");
        assert_eq!(p.current_task, 0);
        assert!(!p.is_active);
    }

    #[test]
    fn progress_is_clamped() {
        let Payload::TrainingProgress(p) = Payload::parse("training_progress", "250:a:b:0:6:true")
        else {
            panic!("expected TrainingProgress");
        };
        assert_eq!(p.progress, 100.0);
    }

    #[test]
    fn task_completed_with_and_without_index() {
        assert_eq!(
            Payload::parse("task_completed", "excavation"),
            Payload::TaskCompleted {
                task_id: "excavation".into(),
                next_index: None
            }
        );
        assert_eq!(
            Payload::parse("task_completed", "excavation:3"),
            Payload::TaskCompleted {
                task_id: "excavation".into(),
                next_index: Some(3)
            }
        );
    }

    #[test]
    fn task_start_optional_pipe() {
        assert_eq!(
            Payload::parse("task_start", "Wrench:P-110"),
            Payload::TaskStart {
                tool: "Wrench".into(),
                pipe: Some("P-110".into())
            }
        );
        assert_eq!(
            Payload::parse("task_start", "Shovel"),
            Payload::TaskStart {
                tool: "Shovel".into(),
                pipe: None
            }
        );
    }

    #[test]
    fn layer_list_visibility() {
        let Payload::LayerList { layers } = Payload::parse("layer_list", "Soil=false:Pipes:Gauge=true")
        else {
            panic!("expected LayerList");
        };
        assert_eq!(layers.len(), 3);
        assert!(!layers[0].visible);
        assert!(layers[1].visible);
        assert_eq!(layers[2].name, "Gauge");
    }

    #[test]
    fn hierarchical_list_attaches_children() {
        let Payload::HierarchicalList { groups } =
            Payload::parse("hierarchical_list", ">Orphan:Pipes:>Main=false:>Branch:Soil")
        else {
            panic!("expected HierarchicalList");
        };
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].parent.name, "Pipes");
        assert_eq!(groups[0].children.len(), 2);
        assert!(!groups[0].children[0].visible);
        assert!(groups[1].children.is_empty());
    }

    #[test]
    fn explosion_and_camera() {
        assert_eq!(
            Payload::parse("explosion_update", "55.5:true"),
            Payload::ExplosionUpdate {
                value: 55.5,
                animating: true
            }
        );
        let Payload::CameraUpdate(c) = Payload::parse("camera_update", "orbit:top:12.5:false")
        else {
            panic!("expected CameraUpdate");
        };
        assert_eq!(c.mode, "orbit");
        assert_eq!(c.perspective, "top");
        assert_eq!(c.distance, 12.5);
        assert!(!c.transitioning);
    }

    #[test]
    fn unknown_topic_is_generic() {
        assert_eq!(
            Payload::parse("weather_report", "rain:12"),
            Payload::Generic {
                tokens: vec!["rain".into(), "12".into()]
            }
        );
    }
}
