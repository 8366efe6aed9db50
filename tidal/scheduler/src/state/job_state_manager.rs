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

use std::collections::HashMap;

use log::{debug, info};
use parking_lot::Mutex;

use tidal_core::error::{Result, TidalError};
use tidal_core::plan::PhysicalPlan;
use tidal_core::state::{JobState, StageState, TaskGroupState};

struct StageStatus {
    state: StageState,
    attempt: usize,
    task_group_ids: Vec<String>,
}

struct TaskGroupStatus {
    state: TaskGroupState,
    stage_id: String,
}

struct Inner {
    job_state: JobState,
    stages: HashMap<String, StageStatus>,
    task_groups: HashMap<String, TaskGroupStatus>,
}

/// The authoritative state store for a job, its stages, and its task groups.
///
/// The manager is the sole authority on state transitions; every requested
/// edge is validated against the state machines in `tidal_core::state` and an
/// illegal edge fails with [`TidalError::IllegalStateTransition`]. Stage and
/// job completion propagate automatically: a task group reaching COMPLETE
/// completes its stage once every sibling is COMPLETE, and the last stage to
/// complete completes the job. A recoverable or unrecoverable task group
/// failure likewise marks the owning stage, and an unrecoverable one fails
/// the job.
///
/// Internally synchronized; safe for concurrent use by the event-handling
/// thread and the dispatcher.
pub struct JobStateManager {
    job_id: String,
    inner: Mutex<Inner>,
}

impl JobStateManager {
    /// Creates a manager with every entity of the plan in READY.
    pub fn new(job_id: impl Into<String>, plan: &PhysicalPlan) -> Self {
        let mut inner = Inner {
            job_state: JobState::Ready,
            stages: HashMap::new(),
            task_groups: HashMap::new(),
        };
        Self::register_plan(&mut inner, plan);
        Self {
            job_id: job_id.into(),
            inner: Mutex::new(inner),
        }
    }

    fn register_plan(inner: &mut Inner, plan: &PhysicalPlan) {
        for stage in plan.stage_dag().stages() {
            let task_group_ids: Vec<String> = stage
                .task_groups
                .iter()
                .map(|task_group| task_group.id.clone())
                .collect();
            for task_group_id in &task_group_ids {
                inner
                    .task_groups
                    .entry(task_group_id.clone())
                    .or_insert_with(|| TaskGroupStatus {
                        state: TaskGroupState::Ready,
                        stage_id: stage.id.clone(),
                    });
            }
            inner
                .stages
                .entry(stage.id.clone())
                .or_insert_with(|| StageStatus {
                    state: StageState::Ready,
                    attempt: 0,
                    task_group_ids: task_group_ids.clone(),
                })
                .task_group_ids = task_group_ids.clone();
        }
    }

    /// Absorbs a replaced physical plan after dynamic optimization.
    ///
    /// Entities already known keep their states and attempt counts; entities
    /// introduced by the new plan start in READY.
    pub fn on_plan_updated(&self, plan: &PhysicalPlan) {
        let mut inner = self.inner.lock();
        Self::register_plan(&mut inner, plan);
    }

    /// The id of the job this manager tracks.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Applies a stage state transition, validating its legality.
    ///
    /// Entering EXECUTING increments the stage's attempt count and moves a
    /// READY job to EXECUTING. A stage reaching COMPLETE completes the job
    /// once every stage is COMPLETE.
    pub fn on_stage_state_changed(&self, stage_id: &str, new_state: StageState) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::transition_stage(&mut inner, &self.job_id, stage_id, new_state)
    }

    fn transition_stage(
        inner: &mut Inner,
        job_id: &str,
        stage_id: &str,
        new_state: StageState,
    ) -> Result<()> {
        let current = inner
            .stages
            .get(stage_id)
            .ok_or_else(|| TidalError::Internal(format!("unknown stage {stage_id}")))?
            .state;
        if !current.can_transition_to(new_state) {
            return Err(TidalError::IllegalStateTransition(format!(
                "stage {stage_id} cannot move from {current} to {new_state}"
            )));
        }

        info!("Stage {stage_id}: {current} -> {new_state}");
        {
            let status = inner.stages.get_mut(stage_id).unwrap();
            status.state = new_state;
            if new_state == StageState::Executing {
                status.attempt += 1;
            }
        }

        match new_state {
            StageState::Executing => {
                if inner.job_state == JobState::Ready {
                    Self::transition_job(inner, job_id, JobState::Executing)?;
                }
            }
            StageState::Complete => {
                let all_complete = inner
                    .stages
                    .values()
                    .all(|status| status.state == StageState::Complete);
                if all_complete {
                    Self::transition_job(inner, job_id, JobState::Complete)?;
                }
            }
            StageState::FailedUnrecoverable => {
                Self::transition_job(inner, job_id, JobState::Failed)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn transition_job(inner: &mut Inner, job_id: &str, new_state: JobState) -> Result<()> {
        let current = inner.job_state;
        if !current.can_transition_to(new_state) {
            return Err(TidalError::IllegalStateTransition(format!(
                "job {job_id} cannot move from {current} to {new_state}"
            )));
        }
        info!("Job {job_id}: {current} -> {new_state}");
        inner.job_state = new_state;
        Ok(())
    }

    /// Applies a task group state transition, validating its legality, and
    /// propagates stage-level consequences.
    pub fn on_task_group_state_changed(
        &self,
        task_group_id: &str,
        new_state: TaskGroupState,
    ) -> Result<()> {
        let mut inner = self.inner.lock();

        let (current, stage_id) = {
            let status = inner.task_groups.get(task_group_id).ok_or_else(|| {
                TidalError::Internal(format!("task group {task_group_id} does not exist"))
            })?;
            (status.state, status.stage_id.clone())
        };
        if !current.can_transition_to(new_state) {
            return Err(TidalError::IllegalStateTransition(format!(
                "task group {task_group_id} cannot move from {current} to {new_state}"
            )));
        }

        debug!("TaskGroup {task_group_id}: {current} -> {new_state}");
        inner.task_groups.get_mut(task_group_id).unwrap().state = new_state;

        match new_state {
            TaskGroupState::Complete => {
                let all_complete = inner.stages[&stage_id]
                    .task_group_ids
                    .iter()
                    .all(|id| inner.task_groups[id].state == TaskGroupState::Complete);
                if all_complete {
                    Self::transition_stage(
                        &mut inner,
                        &self.job_id,
                        &stage_id,
                        StageState::Complete,
                    )?;
                }
            }
            TaskGroupState::FailedRecoverable => {
                if inner.stages[&stage_id].state != StageState::FailedRecoverable {
                    Self::transition_stage(
                        &mut inner,
                        &self.job_id,
                        &stage_id,
                        StageState::FailedRecoverable,
                    )?;
                }
            }
            TaskGroupState::FailedUnrecoverable => {
                Self::transition_stage(
                    &mut inner,
                    &self.job_id,
                    &stage_id,
                    StageState::FailedUnrecoverable,
                )?;
            }
            _ => {}
        }
        Ok(())
    }

    /// True iff no task group of the stage remains incomplete.
    ///
    /// A task group parked ON_HOLD counts as complete here: its results are
    /// in and only the dynamic-optimization round trip is outstanding. The
    /// stage's own state machine still moves to COMPLETE only once every
    /// task group is strictly COMPLETE.
    pub fn check_stage_completion(&self, stage_id: &str) -> bool {
        let inner = self.inner.lock();
        match inner.stages.get(stage_id) {
            Some(status) => status.task_group_ids.iter().all(|id| {
                matches!(
                    inner.task_groups[id].state,
                    TaskGroupState::Complete | TaskGroupState::OnHold
                )
            }),
            None => false,
        }
    }

    /// True once the job state is terminal (COMPLETE or FAILED).
    pub fn check_job_termination(&self) -> bool {
        self.inner.lock().job_state.is_terminal()
    }

    /// The current job state.
    pub fn get_job_state(&self) -> JobState {
        self.inner.lock().job_state
    }

    /// The attempt count of a stage; 0 until it first enters EXECUTING.
    pub fn get_attempt_count_for_stage(&self, stage_id: &str) -> Result<usize> {
        let inner = self.inner.lock();
        inner
            .stages
            .get(stage_id)
            .map(|status| status.attempt)
            .ok_or_else(|| TidalError::Internal(format!("unknown stage {stage_id}")))
    }

    /// The current state of a stage.
    pub fn get_stage_state(&self, stage_id: &str) -> Result<StageState> {
        let inner = self.inner.lock();
        inner
            .stages
            .get(stage_id)
            .map(|status| status.state)
            .ok_or_else(|| TidalError::Internal(format!("unknown stage {stage_id}")))
    }

    /// The current state of a task group.
    pub fn get_task_group_state(&self, task_group_id: &str) -> Result<TaskGroupState> {
        let inner = self.inner.lock();
        inner
            .task_groups
            .get(task_group_id)
            .map(|status| status.state)
            .ok_or_else(|| {
                TidalError::Internal(format!("task group {task_group_id} does not exist"))
            })
    }

    /// The stage a task group belongs to.
    pub fn stage_of_task_group(&self, task_group_id: &str) -> Result<String> {
        let inner = self.inner.lock();
        inner
            .task_groups
            .get(task_group_id)
            .map(|status| status.stage_id.clone())
            .ok_or_else(|| {
                TidalError::Internal(format!("task group {task_group_id} does not exist"))
            })
    }

    /// The task groups of a stage currently in the given state.
    pub fn task_groups_of_stage_in(
        &self,
        stage_id: &str,
        state: TaskGroupState,
    ) -> Result<Vec<String>> {
        let inner = self.inner.lock();
        let status = inner
            .stages
            .get(stage_id)
            .ok_or_else(|| TidalError::Internal(format!("unknown stage {stage_id}")))?;
        Ok(status
            .task_group_ids
            .iter()
            .filter(|id| inner.task_groups[*id].state == state)
            .cloned()
            .collect())
    }

    /// The task groups currently in EXECUTING, across the whole job.
    pub fn executing_task_groups(&self) -> Vec<String> {
        let inner = self.inner.lock();
        inner
            .task_groups
            .iter()
            .filter(|(_, status)| status.state == TaskGroupState::Executing)
            .map(|(id, _)| id.clone())
            .collect()
    }
}
