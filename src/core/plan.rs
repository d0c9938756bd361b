use std::collections::VecDeque;

use hashbrown::{HashMap, HashSet};

use crate::{
    core::subtask::SubTask,
    operation::{Operation, OperationKind},
    sensor::Reading,
    types::Target,
};

/// Declarative description of one conditional fan-out edge.
#[derive(Debug, Clone, Copy)]
pub struct SubTaskTemplate {
    /// Write performed.
    pub target: Target,
    /// Prerequisite targets. Prerequisites that do not apply are ignored.
    pub depends_on: &'static [Target],
    /// Whether the target applies to a given operation.
    pub applies: fn(&Operation) -> bool,
}

/// Template validation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// A target is listed twice.
    #[error("duplicate target {0}")]
    DuplicateTarget(Target),
    /// A dependency names a target missing from the template set.
    #[error("{target} depends on undeclared {dependency}")]
    UnknownDependency {
        /// Dependent target.
        target: Target,
        /// Missing prerequisite.
        dependency: Target,
    },
    /// The dependency graph is not acyclic.
    #[error("dependency cycle through {0:?}")]
    Cycle(Vec<Target>),
}

fn always(_: &Operation) -> bool {
    true
}

fn has_temperature(op: &Operation) -> bool {
    op.reading().is_some_and(|r| r.temperature.is_some())
}

fn low_battery(op: &Operation) -> bool {
    op.reading().is_some_and(Reading::is_low_battery)
}

/// CreateSensor: identity row, then metadata document, then search entry.
pub const CREATE_SENSOR: &[SubTaskTemplate] = &[
    SubTaskTemplate {
        target: Target::SensorRow,
        depends_on: &[],
        applies: always,
    },
    SubTaskTemplate {
        target: Target::SensorDocument,
        depends_on: &[Target::SensorRow],
        applies: always,
    },
    SubTaskTemplate {
        target: Target::SearchEntry,
        depends_on: &[Target::SensorDocument],
        applies: always,
    },
];

/// RecordReading: both lookups run first. Every write waits for the identity
/// row, so a reading for an unknown sensor touches no store. The type-count
/// rollup also waits for the metadata lookup that yields the sensor type.
pub const RECORD_READING: &[SubTaskTemplate] = &[
    SubTaskTemplate {
        target: Target::SensorLookup,
        depends_on: &[],
        applies: always,
    },
    SubTaskTemplate {
        target: Target::MetadataLookup,
        depends_on: &[],
        applies: always,
    },
    SubTaskTemplate {
        target: Target::LatestReading,
        depends_on: &[Target::SensorLookup],
        applies: always,
    },
    SubTaskTemplate {
        target: Target::ReadingSeries,
        depends_on: &[Target::SensorLookup],
        applies: always,
    },
    SubTaskTemplate {
        target: Target::TemperatureRollup,
        depends_on: &[Target::SensorLookup],
        applies: has_temperature,
    },
    SubTaskTemplate {
        target: Target::LowBatteryRollup,
        depends_on: &[Target::SensorLookup],
        applies: low_battery,
    },
    SubTaskTemplate {
        target: Target::TypeCountRollup,
        depends_on: &[Target::SensorLookup, Target::MetadataLookup],
        applies: always,
    },
];

/// DeleteSensor: the identity row goes first so a missing sensor aborts
/// everything else before any store is touched.
pub const DELETE_SENSOR: &[SubTaskTemplate] = &[
    SubTaskTemplate {
        target: Target::SensorRow,
        depends_on: &[],
        applies: always,
    },
    SubTaskTemplate {
        target: Target::SensorDocument,
        depends_on: &[Target::SensorRow],
        applies: always,
    },
    SubTaskTemplate {
        target: Target::SearchEntry,
        depends_on: &[Target::SensorRow],
        applies: always,
    },
    SubTaskTemplate {
        target: Target::LatestReading,
        depends_on: &[Target::SensorRow],
        applies: always,
    },
];

/// Template set for an operation kind.
pub fn templates_for(kind: OperationKind) -> &'static [SubTaskTemplate] {
    match kind {
        OperationKind::CreateSensor => CREATE_SENSOR,
        OperationKind::RecordReading => RECORD_READING,
        OperationKind::DeleteSensor => DELETE_SENSOR,
    }
}

/// Expands an operation into its applicable pending sub-tasks.
pub fn build_subtasks(op: &Operation) -> Vec<SubTask> {
    let templates = templates_for(op.kind());
    let applicable: HashSet<Target> = templates
        .iter()
        .filter(|t| (t.applies)(op))
        .map(|t| t.target)
        .collect();

    templates
        .iter()
        .filter(|t| applicable.contains(&t.target))
        .map(|t| {
            let deps = t
                .depends_on
                .iter()
                .copied()
                .filter(|d| applicable.contains(d))
                .collect();
            SubTask::new(op.operation_id.clone(), t.target, deps)
        })
        .collect()
}

/// Checks a template set forms a DAG over unique targets.
///
/// Returns targets in a valid dispatch order.
pub fn validate_templates(templates: &[SubTaskTemplate]) -> Result<Vec<Target>, PlanError> {
    let mut indegree: HashMap<Target, usize> = HashMap::new();
    for t in templates {
        if indegree.insert(t.target, t.depends_on.len()).is_some() {
            return Err(PlanError::DuplicateTarget(t.target));
        }
    }

    let mut dependents: HashMap<Target, Vec<Target>> = HashMap::new();
    for t in templates {
        for dep in t.depends_on {
            if !indegree.contains_key(dep) {
                return Err(PlanError::UnknownDependency {
                    target: t.target,
                    dependency: *dep,
                });
            }
            dependents.entry(*dep).or_default().push(t.target);
        }
    }

    let mut queue: VecDeque<Target> = templates
        .iter()
        .filter(|t| t.depends_on.is_empty())
        .map(|t| t.target)
        .collect();
    let mut order = Vec::with_capacity(templates.len());

    while let Some(target) = queue.pop_front() {
        order.push(target);
        for next in dependents.get(&target).into_iter().flatten() {
            if let Some(deg) = indegree.get_mut(next) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(*next);
                }
            }
        }
    }

    if order.len() != templates.len() {
        let stuck = templates
            .iter()
            .map(|t| t.target)
            .filter(|t| !order.contains(t))
            .collect();
        return Err(PlanError::Cycle(stuck));
    }
    Ok(order)
}
