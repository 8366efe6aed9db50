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

use std::sync::Arc;

use crate::error::Result;
use crate::id::IdAllocator;

use super::stage::{ContainerType, DataFlowModel, PhysicalStage, PhysicalStageEdge};
use super::task::{Task, TaskGroup, TaskKind};
use super::{PhysicalPlan, StageDag};

/// Assembles a [`PhysicalPlan`] stage by stage.
///
/// This is the runtime-side stand-in for the compiler: ids come from the
/// allocator handed in, and stages are wired with explicit edges.
pub struct PhysicalPlanBuilder {
    ids: Arc<IdAllocator>,
    plan_id: String,
    stages: Vec<PhysicalStage>,
    edges: Vec<PhysicalStageEdge>,
}

impl PhysicalPlanBuilder {
    /// Creates a builder allocating ids from the given allocator.
    pub fn new(ids: Arc<IdAllocator>) -> Self {
        let plan_id = ids.plan_id();
        Self {
            ids,
            plan_id,
            stages: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Adds a stage of `num_task_groups` single-task groups and returns its id.
    pub fn add_stage(
        &mut self,
        schedule_group_index: usize,
        container_type: ContainerType,
        num_task_groups: usize,
    ) -> String {
        self.add_stage_inner(schedule_group_index, container_type, num_task_groups, false)
    }

    /// Adds a stage whose last task group carries a metric collection barrier task.
    pub fn add_barrier_stage(
        &mut self,
        schedule_group_index: usize,
        container_type: ContainerType,
        num_task_groups: usize,
    ) -> String {
        self.add_stage_inner(schedule_group_index, container_type, num_task_groups, true)
    }

    fn add_stage_inner(
        &mut self,
        schedule_group_index: usize,
        container_type: ContainerType,
        num_task_groups: usize,
        with_barrier: bool,
    ) -> String {
        let stage_id = self.ids.stage_id();
        let task_groups = (0..num_task_groups)
            .map(|index| {
                let mut tasks = vec![Task {
                    id: self.ids.task_id(),
                    ir_vertex_id: self.ids.vertex_id(),
                    kind: TaskKind::Regular,
                }];
                if with_barrier && index == num_task_groups - 1 {
                    tasks.push(Task {
                        id: self.ids.task_id(),
                        ir_vertex_id: self.ids.vertex_id(),
                        kind: TaskKind::MetricCollectionBarrier,
                    });
                }
                TaskGroup {
                    id: self.ids.task_group_id(),
                    stage_id: stage_id.clone(),
                    tasks,
                }
            })
            .collect();
        self.stages.push(PhysicalStage {
            id: stage_id.clone(),
            schedule_group_index,
            container_type,
            task_groups,
        });
        stage_id
    }

    /// Connects two stages.
    pub fn connect(&mut self, src_stage_id: &str, dst_stage_id: &str, data_flow: DataFlowModel) {
        self.edges.push(PhysicalStageEdge {
            id: self.ids.stage_edge_id(),
            src_stage_id: src_stage_id.to_string(),
            dst_stage_id: dst_stage_id.to_string(),
            data_flow,
        });
    }

    /// Validates the graph and produces the plan.
    pub fn build(self) -> Result<PhysicalPlan> {
        let dag = StageDag::new(self.stages, self.edges)?;
        Ok(PhysicalPlan::new(self.plan_id, dag))
    }
}
