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

//! The batch single-job scheduler orchestrating stages and recovery.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::{debug, info};
use tokio::sync::Mutex;

use tidal_core::error::{Result, TidalError};
use tidal_core::event_loop::EventSender;
use tidal_core::plan::{PhysicalPlan, PhysicalStage, ScheduledTaskGroup};
use tidal_core::state::{RecoverableFailureCause, StageState, TaskGroupState};

use crate::block_manager::BlockManagerMaster;
use crate::event::SchedulerEvent;
use crate::executor::{ExecutorClient, ExecutorMetadata, ExecutorRegistry};
use crate::policy::SchedulingPolicy;
use crate::queue::PendingTaskGroupQueue;
use crate::runner::{SchedulerRunner, SchedulingSignal};
use crate::state::JobStateManager;

/// Sentinel attempt index for task groups re-injected after an executor was
/// lost; it bypasses the late-message guard.
const SCHEDULE_ATTEMPT_ON_CONTAINER_FAILURE: usize = usize::MAX;

struct ScheduledJob {
    plan: PhysicalPlan,
    state: Arc<JobStateManager>,
    initial_schedule_group: usize,
}

/// Receives a single compiled [`PhysicalPlan`] and schedules its task groups.
///
/// Stages are dispatched cohort by cohort in schedule-group order, children
/// first within a cohort. Task-group state changes reported by executors
/// drive stage completion, recovery from the recoverable failure causes, and
/// the dynamic-optimization round trip through the job-wide event bus. The
/// policy by which task groups are placed is dependent on the
/// [`SchedulingPolicy`] implementation.
///
/// Event handlers are serialized over a single mutex on the mutable job
/// fields; the dispatcher runs independently and never takes that mutex.
pub struct BatchSingleJobScheduler {
    policy: Arc<dyn SchedulingPolicy>,
    runner: Arc<SchedulerRunner>,
    pending: Arc<PendingTaskGroupQueue>,
    block_manager: Arc<dyn BlockManagerMaster>,
    executors: ExecutorRegistry,
    event_sender: EventSender<SchedulerEvent>,
    inner: Mutex<Option<ScheduledJob>>,
}

impl BatchSingleJobScheduler {
    /// Wires the scheduler to its collaborators.
    pub fn new(
        policy: Arc<dyn SchedulingPolicy>,
        runner: Arc<SchedulerRunner>,
        pending: Arc<PendingTaskGroupQueue>,
        block_manager: Arc<dyn BlockManagerMaster>,
        executors: ExecutorRegistry,
        event_sender: EventSender<SchedulerEvent>,
    ) -> Self {
        Self {
            policy,
            runner,
            pending,
            block_manager,
            executors,
            event_sender,
            inner: Mutex::new(None),
        }
    }

    /// Receives a job to schedule and dispatches its root stages.
    pub async fn schedule_job(
        &self,
        plan: PhysicalPlan,
        state_manager: Arc<JobStateManager>,
    ) -> Result<()> {
        let mut guard = self.inner.lock().await;
        if guard.is_some() {
            return Err(TidalError::Internal(
                "a job is already scheduled on this scheduler".to_string(),
            ));
        }

        info!("Job to schedule: {}", plan.id());
        self.runner.schedule_job(state_manager.clone());
        self.pending.on_job_scheduled(&plan);
        let initial_schedule_group = plan.initial_schedule_group()?;

        *guard = Some(ScheduledJob {
            plan,
            state: state_manager,
            initial_schedule_group,
        });
        self.schedule_root_stages(guard.as_ref().unwrap())
    }

    /// The id of the job currently scheduled.
    pub async fn job_id(&self) -> Result<String> {
        let guard = self.inner.lock().await;
        guard
            .as_ref()
            .map(|job| job.state.job_id().to_string())
            .ok_or_else(|| TidalError::Internal("no job has been scheduled".to_string()))
    }

    /// Ingests a task-group state change reported by an executor.
    pub async fn on_task_group_state_changed(
        &self,
        executor_id: &str,
        task_group_id: &str,
        new_state: TaskGroupState,
        attempt_idx: usize,
        tasks_on_hold: Option<Vec<String>>,
        failure_cause: Option<RecoverableFailureCause>,
    ) -> Result<()> {
        let guard = self.inner.lock().await;
        let job = guard
            .as_ref()
            .ok_or_else(|| TidalError::Internal("no job has been scheduled".to_string()))?;

        let result = self
            .handle_task_group_state_changed(
                job,
                executor_id,
                task_group_id,
                new_state,
                attempt_idx,
                tasks_on_hold,
                failure_cause,
            )
            .await;
        self.check_termination(job);
        result
    }

    /// Replaces the plan after dynamic optimization.
    ///
    /// What has already been executed is not modified by the new plan. If
    /// `task_info` names the task group that completed the optimization
    /// barrier, a completion is synthesized for it.
    pub async fn update_job(
        &self,
        job_id: &str,
        new_plan: PhysicalPlan,
        task_info: Option<(String, String)>,
    ) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let job = guard
            .as_mut()
            .ok_or_else(|| TidalError::Internal("no job has been scheduled".to_string()))?;

        info!("Updating job {job_id} with plan {}", new_plan.id());
        job.plan = new_plan;
        job.state.on_plan_updated(&job.plan);
        self.pending.on_plan_updated(&job.plan);

        let job = guard.as_ref().unwrap();
        if let Some((executor_id, task_group_id)) = task_info {
            job.state
                .on_task_group_state_changed(&task_group_id, TaskGroupState::Complete)?;
            self.on_task_group_execution_complete(job, &executor_id, &task_group_id, true)?;
        }
        self.check_termination(job);
        Ok(())
    }

    /// A new executor joined the pool.
    pub fn on_executor_added(&self, metadata: ExecutorMetadata, client: Arc<dyn ExecutorClient>) {
        info!("Executor {} added", metadata.id);
        self.executors.register(&metadata.id, client);
        self.policy.on_executor_added(metadata);
        self.runner.signal(SchedulingSignal::ExecutorPoolChanged);
    }

    /// An executor left the pool; its running task groups and the task groups
    /// whose blocks it held are re-injected as recoverable failures.
    pub async fn on_executor_removed(&self, executor_id: &str) -> Result<()> {
        let guard = self.inner.lock().await;
        let job = guard
            .as_ref()
            .ok_or_else(|| TidalError::Internal("no job has been scheduled".to_string()))?;

        self.executors.remove(executor_id);

        let mut task_groups_to_reexecute = BTreeSet::new();
        // Task groups for lost blocks.
        task_groups_to_reexecute.extend(self.block_manager.remove_worker(executor_id));
        // Task groups executing on the removed executor.
        task_groups_to_reexecute.extend(self.policy.on_executor_removed(executor_id));

        info!("Executor {executor_id} removed, re-executing {task_groups_to_reexecute:?}");
        for task_group_id in &task_groups_to_reexecute {
            self.handle_task_group_state_changed(
                job,
                executor_id,
                task_group_id,
                TaskGroupState::FailedRecoverable,
                SCHEDULE_ATTEMPT_ON_CONTAINER_FAILURE,
                None,
                Some(RecoverableFailureCause::ContainerFailure),
            )
            .await?;
        }

        if let Some(first) = task_groups_to_reexecute.iter().next() {
            // The stage of one of the failed task groups is the starting
            // point to look for the next stage to schedule.
            let stage_id = job.state.stage_of_task_group(first)?;
            self.schedule_next_stage(job, &stage_id)?;
        }
        self.runner.signal(SchedulingSignal::ExecutorPoolChanged);
        Ok(())
    }

    /// Closes the pending queue and the dispatcher's signal channel.
    pub fn terminate(&self) {
        self.pending.close();
        self.runner.terminate();
    }

    fn check_termination(&self, job: &ScheduledJob) {
        if job.state.check_job_termination() {
            info!(
                "Job {} has terminated with state {}",
                job.state.job_id(),
                job.state.get_job_state()
            );
            self.terminate();
        }
    }

    async fn handle_task_group_state_changed(
        &self,
        job: &ScheduledJob,
        executor_id: &str,
        task_group_id: &str,
        new_state: TaskGroupState,
        attempt_idx: usize,
        tasks_on_hold: Option<Vec<String>>,
        failure_cause: Option<RecoverableFailureCause>,
    ) -> Result<()> {
        match new_state {
            TaskGroupState::Complete => {
                job.state
                    .on_task_group_state_changed(task_group_id, new_state)?;
                self.on_task_group_execution_complete(job, executor_id, task_group_id, false)
            }
            TaskGroupState::OnHold => {
                job.state
                    .on_task_group_state_changed(task_group_id, new_state)?;
                self.on_task_group_execution_on_hold(job, executor_id, task_group_id, tasks_on_hold)
                    .await
            }
            TaskGroupState::FailedRecoverable => {
                let cause = failure_cause.ok_or_else(|| {
                    TidalError::UnknownFailureCause(format!(
                        "{task_group_id} failed recoverably without a cause"
                    ))
                })?;
                self.on_task_group_execution_failed_recoverable(
                    job,
                    executor_id,
                    task_group_id,
                    attempt_idx,
                    cause,
                )
            }
            TaskGroupState::FailedUnrecoverable => {
                job.state
                    .on_task_group_state_changed(task_group_id, new_state)?;
                Err(TidalError::UnrecoverableFailure(format!(
                    "the job failed on task group {task_group_id} in executor {executor_id}"
                )))
            }
            TaskGroupState::Ready | TaskGroupState::Executing => {
                Err(TidalError::IllegalStateTransition(format!(
                    "the states READY/EXECUTING cannot be notified, got {new_state} for {task_group_id}"
                )))
            }
        }
    }

    /// Action after task group execution has been completed.
    ///
    /// `is_on_hold_to_complete` marks completions synthesized after an
    /// ON_HOLD round trip, whose executor slot was already released.
    fn on_task_group_execution_complete(
        &self,
        job: &ScheduledJob,
        executor_id: &str,
        task_group_id: &str,
        is_on_hold_to_complete: bool,
    ) -> Result<()> {
        debug!("{task_group_id} completed in {executor_id}");
        if !is_on_hold_to_complete {
            self.policy
                .on_task_group_execution_complete(executor_id, task_group_id);
            self.runner.signal(SchedulingSignal::ExecutorPoolChanged);
        }

        let stage_id = job.state.stage_of_task_group(task_group_id)?;
        if job.state.check_stage_completion(&stage_id) && !job.state.check_job_termination() {
            self.schedule_next_stage(job, &stage_id)?;
        }
        Ok(())
    }

    /// Action after a task group was put on hold at a metric collection barrier.
    async fn on_task_group_execution_on_hold(
        &self,
        job: &ScheduledJob,
        executor_id: &str,
        task_group_id: &str,
        tasks_on_hold: Option<Vec<String>>,
    ) -> Result<()> {
        info!("{task_group_id} put on hold in {executor_id}");
        self.policy
            .on_task_group_execution_complete(executor_id, task_group_id);
        self.runner.signal(SchedulingSignal::ExecutorPoolChanged);

        let stage_id = job.state.stage_of_task_group(task_group_id)?;
        if job.state.check_stage_completion(&stage_id) {
            let task_group = job.plan.task_group(task_group_id)?;
            let held = tasks_on_hold.unwrap_or_default();
            let barrier_vertex = task_group.barrier_vertex_among(&held).ok_or_else(|| {
                TidalError::SchedulingFault(format!(
                    "ON_HOLD reported for {task_group_id} by tasks other than a metric collection barrier"
                ))
            })?;
            // The collected metrics now drive dynamic optimization of the
            // remaining plan.
            self.event_sender
                .post_event(SchedulerEvent::DynamicOptimization {
                    plan: job.plan.clone(),
                    metric_collection_barrier_vertex: barrier_vertex.to_string(),
                    executor_id: executor_id.to_string(),
                    task_group_id: task_group_id.to_string(),
                })
                .await
        } else {
            self.on_task_group_execution_complete(job, executor_id, task_group_id, true)
        }
    }

    fn on_task_group_execution_failed_recoverable(
        &self,
        job: &ScheduledJob,
        executor_id: &str,
        task_group_id: &str,
        attempt_idx: usize,
        failure_cause: RecoverableFailureCause,
    ) -> Result<()> {
        info!("{task_group_id} failed in {executor_id} by {failure_cause}");

        let stage_id = job.state.stage_of_task_group(task_group_id)?;
        let attempt_for_stage = job.state.get_attempt_count_for_stage(&stage_id)?;

        match failure_cause {
            // The task group must be re-executed, and the incomplete task
            // groups of the belonging stage must be rescheduled.
            RecoverableFailureCause::InputReadFailure => {
                if attempt_idx < attempt_for_stage {
                    info!(
                        "{task_group_id} state change to failed_recoverable arrived late, we will ignore this"
                    );
                    return Ok(());
                }
                if attempt_idx > attempt_for_stage {
                    return Err(TidalError::SchedulingFault(format!(
                        "the attempt index {attempt_idx} of {task_group_id} is greater than \
                         attempt {attempt_for_stage} of its stage"
                    )));
                }

                self.policy
                    .on_task_group_execution_failed(executor_id, task_group_id);
                self.runner.signal(SchedulingSignal::ExecutorPoolChanged);
                job.state
                    .on_task_group_state_changed(task_group_id, TaskGroupState::FailedRecoverable)?;

                info!("All task groups of {stage_id} will be made failed_recoverable");
                info!("Removing task groups for {stage_id} before they are scheduled to an executor");
                self.pending.remove_task_groups_and_descendants(&stage_id);
                let stage = job.plan.stage_dag().stage(&stage_id)?;
                for task_group in &stage.task_groups {
                    let state = job.state.get_task_group_state(&task_group.id)?;
                    if state != TaskGroupState::Complete {
                        if state != TaskGroupState::FailedRecoverable {
                            job.state.on_task_group_state_changed(
                                &task_group.id,
                                TaskGroupState::FailedRecoverable,
                            )?;
                        }
                        self.block_manager.on_producer_task_group_failed(&task_group.id);
                    }
                }

                // The stage has become failed_recoverable; a good point to
                // start searching for another stage to schedule.
                self.schedule_next_stage(job, &stage_id)
            }
            // The task group executed successfully but there is something
            // wrong with the output store.
            RecoverableFailureCause::OutputWriteFailure => {
                self.policy
                    .on_task_group_execution_failed(executor_id, task_group_id);
                self.runner.signal(SchedulingSignal::ExecutorPoolChanged);
                job.state
                    .on_task_group_state_changed(task_group_id, TaskGroupState::FailedRecoverable)?;

                info!("Only the failed task group {task_group_id} will be retried");
                self.block_manager.on_producer_task_group_failed(task_group_id);
                self.schedule_next_stage(job, &stage_id)
            }
            RecoverableFailureCause::ContainerFailure => {
                self.policy
                    .on_task_group_execution_failed(executor_id, task_group_id);
                if job.state.get_task_group_state(task_group_id)?
                    != TaskGroupState::FailedRecoverable
                {
                    job.state
                        .on_task_group_state_changed(task_group_id, TaskGroupState::FailedRecoverable)?;
                }
                info!("Only the failed task group {task_group_id} will be retried");
                Ok(())
            }
        }
    }

    fn schedule_root_stages(&self, job: &ScheduledJob) -> Result<()> {
        let mut root_stages: Vec<&PhysicalStage> = job
            .plan
            .stage_dag()
            .topological_sort()
            .into_iter()
            .filter(|stage| stage.schedule_group_index == job.initial_schedule_group)
            .collect();
        root_stages.reverse();
        for stage in root_stages {
            self.schedule_stage(job, stage)?;
        }
        Ok(())
    }

    /// Schedules the next stage to execute after a stage completion or failure.
    fn schedule_next_stage(&self, job: &ScheduledJob, from_stage_id: &str) -> Result<()> {
        let from_stage = job.plan.stage_dag().stage(from_stage_id)?;
        let next_stages =
            self.select_next_stages_to_schedule(job, from_stage.schedule_group_index)?;

        match next_stages {
            Some(stages) => {
                info!(
                    "Scheduling: ScheduleGroup {}",
                    stages[0].schedule_group_index
                );
                for stage in stages {
                    self.schedule_stage(job, stage)?;
                }
                Ok(())
            }
            None => {
                info!("Skipping this round as the next schedulable stages have already been scheduled");
                Ok(())
            }
        }
    }

    /// Selects the stages to schedule, in the order they must be enqueued.
    ///
    /// Recurses from the given schedule group towards the initial one so that
    /// failed_recoverable stages of the earliest schedule group take
    /// priority. Returns `None` when nothing is schedulable right now, and
    /// the next schedule group's stages in reverse topological order
    /// (children first) once the current group has completed.
    fn select_next_stages_to_schedule<'a>(
        &self,
        job: &'a ScheduledJob,
        current_schedule_group: usize,
    ) -> Result<Option<Vec<&'a PhysicalStage>>> {
        if current_schedule_group > job.initial_schedule_group {
            let ancestors =
                self.select_next_stages_to_schedule(job, current_schedule_group - 1)?;
            if ancestors.is_some() {
                return Ok(ancestors);
            }
        }

        // All previous schedule groups are complete; check the current one.
        let current_group: Vec<&PhysicalStage> = job
            .plan
            .stage_dag()
            .topological_sort()
            .into_iter()
            .filter(|stage| stage.schedule_group_index == current_schedule_group)
            .collect();

        let mut stages_to_schedule = Vec::new();
        let mut all_stages_complete = true;
        for stage in current_group {
            match job.state.get_stage_state(&stage.id)? {
                StageState::FailedRecoverable => {
                    stages_to_schedule.push(stage);
                    all_stages_complete = false;
                }
                StageState::Ready | StageState::Executing => {
                    all_stages_complete = false;
                }
                _ => {}
            }
        }
        if !all_stages_complete {
            info!("There are remaining stages in schedule group {current_schedule_group}");
            return Ok(if stages_to_schedule.is_empty() {
                None
            } else {
                Some(stages_to_schedule)
            });
        }

        // Ready to move onto the next schedule group.
        let mut stages_to_schedule = Vec::new();
        for stage in job.plan.stage_dag().topological_sort() {
            if stage.schedule_group_index != current_schedule_group + 1 {
                continue;
            }
            let stage_state = job.state.get_stage_state(&stage.id)?;
            if stage_state != StageState::Executing && stage_state != StageState::Complete {
                stages_to_schedule.push(stage);
            }
        }
        if stages_to_schedule.is_empty() {
            debug!(
                "ScheduleGroup {}: already executing/complete, so we skip this",
                current_schedule_group + 1
            );
            return Ok(None);
        }

        // Stages in one schedule group are mutually independent or connected
        // by a push edge, so children must be scheduled first.
        stages_to_schedule.reverse();
        Ok(Some(stages_to_schedule))
    }

    /// Enqueues the schedulable task groups of the stage for dispatch.
    fn schedule_stage(&self, job: &ScheduledJob, stage: &PhysicalStage) -> Result<()> {
        let incoming_edges: Vec<_> = job
            .plan
            .stage_dag()
            .incoming_edges_of(&stage.id)
            .into_iter()
            .cloned()
            .collect();
        let outgoing_edges: Vec<_> = job
            .plan
            .stage_dag()
            .outgoing_edges_of(&stage.id)
            .into_iter()
            .cloned()
            .collect();
        let stage_state = job.state.get_stage_state(&stage.id)?;

        let mut task_groups_to_schedule = Vec::new();
        for task_group in &stage.task_groups {
            match job.state.get_task_group_state(&task_group.id)? {
                TaskGroupState::Complete | TaskGroupState::Executing => {
                    info!("Skipping {} because its outputs are safe", task_group.id);
                }
                TaskGroupState::Ready => {
                    // The stage's other task groups failed recoverably, but
                    // this one is still in the queue awaiting dispatch.
                    if stage_state == StageState::FailedRecoverable {
                        info!(
                            "Skipping {} because it is already in the queue, but just hasn't been scheduled yet",
                            task_group.id
                        );
                    } else {
                        info!("Scheduling {}", task_group.id);
                        task_groups_to_schedule.push(task_group);
                    }
                }
                TaskGroupState::FailedRecoverable => {
                    info!("Re-scheduling {} for failure recovery", task_group.id);
                    job.state
                        .on_task_group_state_changed(&task_group.id, TaskGroupState::Ready)?;
                    task_groups_to_schedule.push(task_group);
                }
                TaskGroupState::OnHold => {
                    // Resumes through the dynamic-optimization path.
                }
                TaskGroupState::FailedUnrecoverable => {
                    return Err(TidalError::SchedulingFault(format!(
                        "detected a FAILED_UNRECOVERABLE task group {}",
                        task_group.id
                    )));
                }
            }
        }

        if stage_state == StageState::FailedRecoverable {
            job.state.on_stage_state_changed(&stage.id, StageState::Ready)?;
        }
        // The attempt index is only updated when the stage enters EXECUTING.
        job.state
            .on_stage_state_changed(&stage.id, StageState::Executing)?;
        let attempt_idx = job.state.get_attempt_count_for_stage(&stage.id)?;
        info!("Scheduling stage {} with attempt {attempt_idx}", stage.id);

        for task_group in task_groups_to_schedule {
            self.block_manager
                .on_producer_task_group_scheduled(&task_group.id);
            debug!("Enqueuing {}", task_group.id);
            self.pending.enqueue(ScheduledTaskGroup {
                plan_id: job.plan.id().to_string(),
                task_group: task_group.clone(),
                incoming_edges: incoming_edges.clone(),
                outgoing_edges: outgoing_edges.clone(),
                schedule_group_index: stage.schedule_group_index,
                container_type: stage.container_type,
                attempt_idx,
            })?;
            self.runner.signal(SchedulingSignal::TaskGroupAvailable);
        }
        Ok(())
    }
}
