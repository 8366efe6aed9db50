// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use parking_lot::Mutex;

use tidal_core::plan::{ContainerType, ScheduledTaskGroup};

use crate::executor::ExecutorMetadata;

use super::SchedulingPolicy;

struct ExecutorOccupancy {
    metadata: ExecutorMetadata,
    running: HashSet<String>,
}

impl ExecutorOccupancy {
    fn has_free_capacity(&self) -> bool {
        self.running.len() < self.metadata.capacity
    }
}

/// Capacity-based placement over labeled executors.
///
/// Stages annotated as transient run on transient executors only, and
/// reserved stages on reserved executors only. Unannotated stages prefer
/// transient executors to maximize opportunistic use of that capacity,
/// falling back to reserved ones. Among eligible executors the least loaded
/// wins, with a stable tie-break by executor id.
pub struct CapacitySchedulingPolicy {
    executors: Mutex<HashMap<String, ExecutorOccupancy>>,
}

impl CapacitySchedulingPolicy {
    /// Creates a policy with an empty executor pool.
    pub fn new() -> Self {
        Self {
            executors: Mutex::new(HashMap::new()),
        }
    }

    fn select(
        executors: &HashMap<String, ExecutorOccupancy>,
        container_type: ContainerType,
    ) -> Option<String> {
        executors
            .values()
            .filter(|occupancy| occupancy.metadata.container_type == container_type)
            .filter(|occupancy| occupancy.has_free_capacity())
            .min_by_key(|occupancy| (occupancy.running.len(), occupancy.metadata.id.clone()))
            .map(|occupancy| occupancy.metadata.id.clone())
    }
}

impl Default for CapacitySchedulingPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulingPolicy for CapacitySchedulingPolicy {
    fn schedule_task_group(&self, scheduled: &ScheduledTaskGroup) -> Option<String> {
        let mut executors = self.executors.lock();

        let chosen = match scheduled.container_type {
            ContainerType::Transient => Self::select(&executors, ContainerType::Transient),
            ContainerType::Reserved => Self::select(&executors, ContainerType::Reserved),
            ContainerType::None => Self::select(&executors, ContainerType::Transient)
                .or_else(|| Self::select(&executors, ContainerType::Reserved))
                .or_else(|| Self::select(&executors, ContainerType::None)),
        };

        if let Some(executor_id) = &chosen {
            executors
                .get_mut(executor_id)
                .unwrap()
                .running
                .insert(scheduled.task_group.id.clone());
            debug!(
                "Placed {} on executor {executor_id}",
                scheduled.task_group.id
            );
        }
        chosen
    }

    fn on_executor_added(&self, metadata: ExecutorMetadata) {
        let mut executors = self.executors.lock();
        debug!(
            "Executor {} joined with capacity {} ({:?})",
            metadata.id, metadata.capacity, metadata.container_type
        );
        executors.insert(
            metadata.id.clone(),
            ExecutorOccupancy {
                metadata,
                running: HashSet::new(),
            },
        );
    }

    fn on_executor_removed(&self, executor_id: &str) -> HashSet<String> {
        let mut executors = self.executors.lock();
        match executors.remove(executor_id) {
            Some(occupancy) => occupancy.running,
            None => {
                warn!("Tried to remove unknown executor {executor_id}");
                HashSet::new()
            }
        }
    }

    fn on_task_group_execution_complete(&self, executor_id: &str, task_group_id: &str) {
        let mut executors = self.executors.lock();
        if let Some(occupancy) = executors.get_mut(executor_id) {
            occupancy.running.remove(task_group_id);
        }
    }

    fn on_task_group_execution_failed(&self, executor_id: &str, task_group_id: &str) {
        let mut executors = self.executors.lock();
        if let Some(occupancy) = executors.get_mut(executor_id) {
            occupancy.running.remove(task_group_id);
        } else {
            // The executor-removed path already reclaimed the whole cohort.
            debug!("Executor {executor_id} already gone when releasing {task_group_id}");
        }
    }

    fn running_task_groups(&self) -> HashSet<String> {
        self.executors
            .lock()
            .values()
            .flat_map(|occupancy| occupancy.running.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use tidal_core::id::IdAllocator;
    use tidal_core::plan::{PhysicalPlan, PhysicalPlanBuilder};

    fn plan_with_container(container_type: ContainerType) -> PhysicalPlan {
        let ids = Arc::new(IdAllocator::new(0));
        let mut builder = PhysicalPlanBuilder::new(ids);
        builder.add_stage(0, container_type, 3);
        builder.build().unwrap()
    }

    fn scheduled(plan: &PhysicalPlan, index: usize) -> ScheduledTaskGroup {
        let stage = &plan.stage_dag().stages()[0];
        ScheduledTaskGroup {
            plan_id: plan.id().to_string(),
            task_group: stage.task_groups[index].clone(),
            incoming_edges: vec![],
            outgoing_edges: vec![],
            schedule_group_index: stage.schedule_group_index,
            container_type: stage.container_type,
            attempt_idx: 1,
        }
    }

    fn executor(id: &str, capacity: usize, container_type: ContainerType) -> ExecutorMetadata {
        ExecutorMetadata {
            id: id.to_string(),
            capacity,
            container_type,
        }
    }

    #[test]
    fn reserved_stage_only_runs_on_reserved_executors() {
        let policy = CapacitySchedulingPolicy::new();
        policy.on_executor_added(executor("transient-a", 4, ContainerType::Transient));

        let plan = plan_with_container(ContainerType::Reserved);
        assert_eq!(None, policy.schedule_task_group(&scheduled(&plan, 0)));

        policy.on_executor_added(executor("reserved-a", 4, ContainerType::Reserved));
        assert_eq!(
            Some("reserved-a".to_string()),
            policy.schedule_task_group(&scheduled(&plan, 0))
        );
    }

    #[test]
    fn unannotated_stage_prefers_transient_then_falls_back() {
        let policy = CapacitySchedulingPolicy::new();
        policy.on_executor_added(executor("reserved-a", 4, ContainerType::Reserved));
        policy.on_executor_added(executor("transient-a", 1, ContainerType::Transient));

        let plan = plan_with_container(ContainerType::None);
        assert_eq!(
            Some("transient-a".to_string()),
            policy.schedule_task_group(&scheduled(&plan, 0))
        );
        // Transient capacity is exhausted now.
        assert_eq!(
            Some("reserved-a".to_string()),
            policy.schedule_task_group(&scheduled(&plan, 1))
        );
    }

    #[test]
    fn least_loaded_wins_with_stable_tie_break() {
        let policy = CapacitySchedulingPolicy::new();
        policy.on_executor_added(executor("exec-b", 2, ContainerType::Transient));
        policy.on_executor_added(executor("exec-a", 2, ContainerType::Transient));

        let plan = plan_with_container(ContainerType::Transient);
        // Equal load: the smaller id wins.
        assert_eq!(
            Some("exec-a".to_string()),
            policy.schedule_task_group(&scheduled(&plan, 0))
        );
        // exec-a now carries one task group, so exec-b is least loaded.
        assert_eq!(
            Some("exec-b".to_string()),
            policy.schedule_task_group(&scheduled(&plan, 1))
        );
    }

    #[test]
    fn capacity_exhaustion_returns_none() {
        let policy = CapacitySchedulingPolicy::new();
        policy.on_executor_added(executor("exec-a", 1, ContainerType::Transient));

        let plan = plan_with_container(ContainerType::Transient);
        assert!(policy.schedule_task_group(&scheduled(&plan, 0)).is_some());
        assert_eq!(None, policy.schedule_task_group(&scheduled(&plan, 1)));
    }

    #[test]
    fn completion_releases_the_slot() {
        let policy = CapacitySchedulingPolicy::new();
        policy.on_executor_added(executor("exec-a", 1, ContainerType::Transient));

        let plan = plan_with_container(ContainerType::Transient);
        let first = scheduled(&plan, 0);
        assert!(policy.schedule_task_group(&first).is_some());
        assert_eq!(1, policy.running_task_groups().len());

        policy.on_task_group_execution_complete("exec-a", &first.task_group.id);
        assert!(policy.running_task_groups().is_empty());
        assert!(policy.schedule_task_group(&scheduled(&plan, 1)).is_some());
    }

    #[test]
    fn removal_returns_the_running_cohort() {
        let policy = CapacitySchedulingPolicy::new();
        policy.on_executor_added(executor("exec-a", 2, ContainerType::Transient));

        let plan = plan_with_container(ContainerType::Transient);
        let first = scheduled(&plan, 0);
        let second = scheduled(&plan, 1);
        policy.schedule_task_group(&first).unwrap();
        policy.schedule_task_group(&second).unwrap();

        let evicted = policy.on_executor_removed("exec-a");
        assert_eq!(2, evicted.len());
        assert!(evicted.contains(&first.task_group.id));
        assert!(evicted.contains(&second.task_group.id));
        assert!(policy.running_task_groups().is_empty());
        // Releasing against the removed executor is a no-op.
        policy.on_task_group_execution_failed("exec-a", &first.task_group.id);
    }
}
