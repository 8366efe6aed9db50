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

use super::stage::{ContainerType, PhysicalStageEdge};

/// What a task does when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// An ordinary compute task.
    Regular,
    /// A barrier that parks its task group ON_HOLD so the collected metrics
    /// can drive dynamic optimization of the remaining plan.
    MetricCollectionBarrier,
}

/// A single task, mapped back to the IR vertex it was compiled from.
#[derive(Debug, Clone)]
pub struct Task {
    /// Task id.
    pub id: String,
    /// The originating IR vertex.
    pub ir_vertex_id: String,
    /// Regular or metric collection barrier.
    pub kind: TaskKind,
}

/// The smallest unit the scheduler dispatches to an executor.
#[derive(Debug, Clone)]
pub struct TaskGroup {
    /// Task group id.
    pub id: String,
    /// The stage this task group belongs to.
    pub stage_id: String,
    /// The tasks of this group.
    pub tasks: Vec<Task>,
}

impl TaskGroup {
    /// Finds the metric collection barrier among the given held task ids, if any.
    pub fn barrier_vertex_among(&self, held_task_ids: &[String]) -> Option<&str> {
        self.tasks
            .iter()
            .find(|task| {
                task.kind == TaskKind::MetricCollectionBarrier
                    && held_task_ids.iter().any(|held| *held == task.id)
            })
            .map(|task| task.ir_vertex_id.as_str())
    }
}

/// The message handed to an executor to launch a task group.
///
/// Handed by value; a replacement of the plan after dispatch does not modify
/// task groups already launched.
#[derive(Debug, Clone)]
pub struct ScheduledTaskGroup {
    /// The plan this task group was scheduled under.
    pub plan_id: String,
    /// The task group to execute.
    pub task_group: TaskGroup,
    /// Edges into the owning stage.
    pub incoming_edges: Vec<PhysicalStageEdge>,
    /// Edges out of the owning stage.
    pub outgoing_edges: Vec<PhysicalStageEdge>,
    /// Schedule group of the owning stage; dispatch order follows it.
    pub schedule_group_index: usize,
    /// Placement annotation of the owning stage.
    pub container_type: ContainerType,
    /// The stage attempt this launch belongs to.
    pub attempt_idx: usize,
}
