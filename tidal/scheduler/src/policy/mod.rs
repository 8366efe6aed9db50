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

//! Scheduling policies for placing task groups onto executors.

mod capacity;

pub use capacity::CapacitySchedulingPolicy;

use std::collections::HashSet;

use tidal_core::plan::ScheduledTaskGroup;

use crate::executor::ExecutorMetadata;

/// Chooses a destination executor for a task group and tracks executor occupancy.
///
/// A task group in EXECUTING is accounted against exactly one executor here;
/// the selection in [`schedule_task_group`](Self::schedule_task_group) records
/// the assignment atomically, and the completion/failure callbacks release it.
pub trait SchedulingPolicy: Send + Sync {
    /// Selects an executor for the task group and records the assignment.
    ///
    /// Returns `None` when no eligible executor has free capacity; the caller
    /// retries once the pool or the occupancy changes.
    fn schedule_task_group(&self, scheduled: &ScheduledTaskGroup) -> Option<String>;

    /// A new executor joined the pool.
    fn on_executor_added(&self, metadata: ExecutorMetadata);

    /// An executor left the pool. Returns the task groups that were running
    /// on it and must be re-executed.
    fn on_executor_removed(&self, executor_id: &str) -> HashSet<String>;

    /// A task group finished on the executor; its slot is released.
    fn on_task_group_execution_complete(&self, executor_id: &str, task_group_id: &str);

    /// A task group failed on the executor; its slot is released.
    fn on_task_group_execution_failed(&self, executor_id: &str, task_group_id: &str);

    /// The task groups currently accounted as running, across all executors.
    fn running_task_groups(&self) -> HashSet<String>;
}
