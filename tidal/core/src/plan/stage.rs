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

use super::task::TaskGroup;

/// The executor class a stage is annotated to run on.
///
/// Transient executors are opportunistic capacity that can disappear at any
/// time; reserved executors are stable. Unannotated stages may run on either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContainerType {
    /// No placement constraint.
    #[default]
    None,
    /// Must run on a transient executor.
    Transient,
    /// Must run on a reserved executor.
    Reserved,
}

/// How data moves across a stage edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFlowModel {
    /// The producer pushes to a consumer scheduled in the same schedule group;
    /// the consumer must be scheduled first.
    Push,
    /// The consumer pulls committed blocks after the producer completes.
    Pull,
}

/// A stage in the physical plan: a set of task groups scheduled together.
#[derive(Debug, Clone)]
pub struct PhysicalStage {
    /// Stage id.
    pub id: String,
    /// Stages with the same index are scheduled together; lower indices run first.
    pub schedule_group_index: usize,
    /// Placement annotation consumed by the scheduling policy.
    pub container_type: ContainerType,
    /// The task groups of this stage, in partition order.
    pub task_groups: Vec<TaskGroup>,
}

/// An edge between two stages of the physical plan.
#[derive(Debug, Clone)]
pub struct PhysicalStageEdge {
    /// Edge id.
    pub id: String,
    /// The producer stage.
    pub src_stage_id: String,
    /// The consumer stage.
    pub dst_stage_id: String,
    /// Push or pull.
    pub data_flow: DataFlowModel,
}
