//! Task-type to specialization routing.

use std::collections::HashMap;

use crate::dispatch::task::TaskType;
use crate::pool::Specialization;

/// Deterministic, stateless mapping from task type to the specialization
/// required to run it. Unmapped types fail closed to the configured default
/// rather than erroring, so dispatch never blocks on a routing gap.
#[derive(Debug, Clone)]
pub struct SpecializationRouter {
    routes: HashMap<TaskType, Specialization>,
    default: Specialization,
}

impl SpecializationRouter {
    /// The standard routing table.
    pub fn standard() -> Self {
        Self::new(
            [
                (TaskType::CodeFix, Specialization::CodeFixer),
                (TaskType::DependencyResolve, Specialization::CodeFixer),
                (TaskType::FeatureGenerate, Specialization::FeatureGenerator),
                (TaskType::SecurityScan, Specialization::SecurityAuditor),
                (TaskType::HealthCheck, Specialization::PerformanceTuner),
                (TaskType::SystemUpdate, Specialization::PerformanceTuner),
            ],
            Specialization::CodeFixer,
        )
    }

    /// Build a router from an explicit table and default.
    pub fn new(
        routes: impl IntoIterator<Item = (TaskType, Specialization)>,
        default: Specialization,
    ) -> Self {
        Self {
            routes: routes.into_iter().collect(),
            default,
        }
    }

    /// Resolve the specialization required for a task type.
    pub fn route(&self, task_type: TaskType) -> Specialization {
        self.routes.get(&task_type).copied().unwrap_or(self.default)
    }
}

impl Default for SpecializationRouter {
    fn default() -> Self {
        Self::standard()
    }
}
