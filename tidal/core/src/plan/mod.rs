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

//! The physical execution plan handed from the compiler to the runtime.
//!
//! A plan is a DAG of [`PhysicalStage`]s connected by [`PhysicalStageEdge`]s.
//! It is immutable except by full replacement during dynamic optimization.

mod builder;
mod dag;
mod stage;
mod task;

pub use builder::PhysicalPlanBuilder;
pub use dag::StageDag;
pub use stage::{ContainerType, DataFlowModel, PhysicalStage, PhysicalStageEdge};
pub use task::{ScheduledTaskGroup, Task, TaskGroup, TaskKind};

use crate::error::{Result, TidalError};

/// A compiled physical execution plan for a single batch job.
#[derive(Debug, Clone)]
pub struct PhysicalPlan {
    id: String,
    stage_dag: StageDag,
}

impl PhysicalPlan {
    /// Creates a plan over the given stage DAG.
    pub fn new(id: String, stage_dag: StageDag) -> Self {
        Self { id, stage_dag }
    }

    /// The plan id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The DAG of physical stages.
    pub fn stage_dag(&self) -> &StageDag {
        &self.stage_dag
    }

    /// Looks up a task group anywhere in the plan.
    pub fn task_group(&self, task_group_id: &str) -> Result<&TaskGroup> {
        self.stage_dag
            .stages()
            .iter()
            .flat_map(|stage| stage.task_groups.iter())
            .find(|task_group| task_group.id == task_group_id)
            .ok_or_else(|| {
                TidalError::Internal(format!(
                    "task group {task_group_id} does not exist in plan {}",
                    self.id
                ))
            })
    }

    /// The minimum schedule group index over all stages; the first cohort to run.
    pub fn initial_schedule_group(&self) -> Result<usize> {
        self.stage_dag
            .stages()
            .iter()
            .map(|stage| stage.schedule_group_index)
            .min()
            .ok_or_else(|| {
                TidalError::Internal(format!("plan {} has no stages", self.id))
            })
    }
}
