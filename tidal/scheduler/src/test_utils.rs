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

//! Common assets used by the scheduler tests.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use tidal_core::error::{Result, TidalError};
use tidal_core::event_loop::{EventAction, EventLoop, EventSender};
use tidal_core::id::IdAllocator;
use tidal_core::plan::{ContainerType, PhysicalPlan, ScheduledTaskGroup};
use tidal_core::queue::ClosableQueue;
use tidal_core::state::TaskGroupState;

use crate::batch_scheduler::BatchSingleJobScheduler;
use crate::block_manager::BlockManagerMaster;
use crate::config::{create_scheduling_policy, SchedulerConfig};
use crate::event::{SchedulerEvent, UpdatePhysicalPlanEventHandler};
use crate::executor::{ExecutorClient, ExecutorMetadata, ExecutorRegistry};
use crate::policy::SchedulingPolicy;
use crate::queue::PendingTaskGroupQueue;
use crate::runner::SchedulerRunner;
use crate::state::JobStateManager;

/// An executor client that records every launch instead of running anything.
pub struct MockExecutor {
    /// The executor id this mock registers under.
    pub id: String,
    launches: Mutex<Vec<ScheduledTaskGroup>>,
}

impl MockExecutor {
    /// Creates a mock executor with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            launches: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the launches received so far, in order.
    pub fn launches(&self) -> Vec<ScheduledTaskGroup> {
        self.launches.lock().clone()
    }
}

#[async_trait]
impl ExecutorClient for MockExecutor {
    async fn launch_task_group(&self, scheduled: ScheduledTaskGroup) -> Result<()> {
        self.launches.lock().push(scheduled);
        Ok(())
    }
}

/// A block manager master double that records notifications and can be
/// scripted with block locations lost on executor removal.
#[derive(Default)]
pub struct ScriptedBlockManagerMaster {
    scheduled: Mutex<Vec<String>>,
    failed: Mutex<Vec<String>>,
    lost_blocks: Mutex<HashMap<String, HashSet<String>>>,
}

impl ScriptedBlockManagerMaster {
    /// Declares which producers lose their blocks when the executor is removed.
    pub fn set_lost_blocks(&self, executor_id: &str, task_group_ids: HashSet<String>) {
        self.lost_blocks
            .lock()
            .insert(executor_id.to_string(), task_group_ids);
    }

    /// Producers notified as scheduled, in order.
    pub fn scheduled(&self) -> Vec<String> {
        self.scheduled.lock().clone()
    }

    /// Producers notified as failed, in order.
    pub fn failed(&self) -> Vec<String> {
        self.failed.lock().clone()
    }
}

impl BlockManagerMaster for ScriptedBlockManagerMaster {
    fn on_producer_task_group_scheduled(&self, task_group_id: &str) {
        self.scheduled.lock().push(task_group_id.to_string());
    }

    fn on_producer_task_group_failed(&self, task_group_id: &str) {
        self.failed.lock().push(task_group_id.to_string());
    }

    fn remove_worker(&self, executor_id: &str) -> HashSet<String> {
        self.lost_blocks
            .lock()
            .remove(executor_id)
            .unwrap_or_default()
    }
}

/// Records published dynamic-optimization events before delegating plan
/// updates to the real handler.
pub struct RecordingEventAction {
    inner: Arc<UpdatePhysicalPlanEventHandler>,
    optimizations: Mutex<Vec<String>>,
}

impl RecordingEventAction {
    /// Wraps the given plan update handler.
    pub fn new(inner: Arc<UpdatePhysicalPlanEventHandler>) -> Self {
        Self {
            inner,
            optimizations: Mutex::new(Vec::new()),
        }
    }

    /// The barrier vertices of the optimization events observed so far.
    pub fn optimizations(&self) -> Vec<String> {
        self.optimizations.lock().clone()
    }
}

#[async_trait]
impl EventAction<SchedulerEvent> for RecordingEventAction {
    fn on_start(&self) {
        self.inner.on_start();
    }

    fn on_stop(&self) {
        self.inner.on_stop();
    }

    async fn on_receive(
        &self,
        event: SchedulerEvent,
        tx_event: &EventSender<SchedulerEvent>,
    ) -> Result<()> {
        if let SchedulerEvent::DynamicOptimization {
            metric_collection_barrier_vertex,
            ..
        } = &event
        {
            self.optimizations
                .lock()
                .push(metric_collection_barrier_vertex.clone());
        }
        self.inner.on_receive(event, tx_event).await
    }

    fn on_error(&self, error: TidalError) {
        self.inner.on_error(error);
    }
}

/// A fully wired scheduler over mock executors and a scripted block manager.
pub struct SchedulerTest {
    /// The scheduler under test.
    pub scheduler: Arc<BatchSingleJobScheduler>,
    /// Id allocator shared with plan fixtures.
    pub ids: Arc<IdAllocator>,
    /// The scripted block manager master.
    pub block_manager: Arc<ScriptedBlockManagerMaster>,
    /// The placement policy, for occupancy assertions.
    pub policy: Arc<dyn SchedulingPolicy>,
    /// Sender onto the job-wide event bus.
    pub event_sender: EventSender<SchedulerEvent>,
    /// Observer of published optimization events.
    pub recording: Arc<RecordingEventAction>,
    event_loop: EventLoop<SchedulerEvent>,
}

impl SchedulerTest {
    /// Wires a scheduler, runner, queues and event loop with the defaults.
    pub fn new() -> Result<Self> {
        let _ = env_logger::try_init();

        let config = SchedulerConfig::default();
        let policy = create_scheduling_policy(&config);
        let pending = Arc::new(PendingTaskGroupQueue::new());
        let signals = Arc::new(ClosableQueue::new());
        let executors = ExecutorRegistry::new();
        let runner = Arc::new(SchedulerRunner::new(
            pending.clone(),
            policy.clone(),
            executors.clone(),
            signals,
        ));

        let handler = Arc::new(UpdatePhysicalPlanEventHandler::new());
        let recording = Arc::new(RecordingEventAction::new(handler.clone()));
        let mut event_loop: EventLoop<SchedulerEvent> = EventLoop::new(
            "scheduler-events".to_string(),
            config.event_loop_buffer_size,
            recording.clone(),
        );
        event_loop.start()?;
        let event_sender = event_loop.get_sender()?;

        let block_manager = Arc::new(ScriptedBlockManagerMaster::default());
        let scheduler = Arc::new(BatchSingleJobScheduler::new(
            policy.clone(),
            runner,
            pending,
            block_manager.clone(),
            executors,
            event_sender.clone(),
        ));
        handler.bind(scheduler.clone());

        Ok(Self {
            scheduler,
            ids: Arc::new(IdAllocator::new(0)),
            block_manager,
            policy,
            event_sender,
            recording,
            event_loop,
        })
    }

    /// Registers a mock executor with the scheduler.
    pub fn add_executor(
        &self,
        id: &str,
        capacity: usize,
        container_type: ContainerType,
    ) -> Arc<MockExecutor> {
        let executor = Arc::new(MockExecutor::new(id));
        self.scheduler.on_executor_added(
            ExecutorMetadata {
                id: id.to_string(),
                capacity,
                container_type,
            },
            executor.clone(),
        );
        executor
    }

    /// Submits the plan under a fresh state manager and returns the manager.
    pub async fn submit(&self, plan: PhysicalPlan) -> Result<Arc<JobStateManager>> {
        let state = Arc::new(JobStateManager::new("job-0", &plan));
        self.scheduler.schedule_job(plan, state.clone()).await?;
        Ok(state)
    }

    /// Waits until the mock executor has received at least `count` launches.
    pub async fn await_launches(
        &self,
        executor: &MockExecutor,
        count: usize,
    ) -> Result<Vec<ScheduledTaskGroup>> {
        let reached = await_condition(Duration::from_millis(10), 500, || {
            futures::future::ready(Ok(executor.launches().len() >= count))
        })
        .await?;
        let launches = executor.launches();
        if !reached {
            return Err(TidalError::Internal(format!(
                "expected {count} launches on {} but saw {}",
                executor.id,
                launches.len()
            )));
        }
        Ok(launches)
    }

    /// Reports a COMPLETE state change for a launched task group.
    pub async fn complete(&self, executor_id: &str, scheduled: &ScheduledTaskGroup) -> Result<()> {
        self.scheduler
            .on_task_group_state_changed(
                executor_id,
                &scheduled.task_group.id,
                TaskGroupState::Complete,
                scheduled.attempt_idx,
                None,
                None,
            )
            .await
    }
}

impl Drop for SchedulerTest {
    fn drop(&mut self) {
        self.scheduler.terminate();
        self.event_loop.stop();
    }
}

/// Polls `cond` every `interval` until it holds or `max_iterations` passes.
pub async fn await_condition<Fut, F>(
    interval: Duration,
    max_iterations: usize,
    cond: F,
) -> Result<bool>
where
    Fut: Future<Output = Result<bool>>,
    F: Fn() -> Fut,
{
    for _ in 0..max_iterations {
        if cond().await? {
            return Ok(true);
        }
        tokio::time::sleep(interval).await;
    }
    Ok(false)
}
