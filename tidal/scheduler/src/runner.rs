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

//! The dispatcher loop marrying pending work to executor capacity.

use std::sync::Arc;

use log::{debug, info, warn};

use tidal_core::queue::ClosableQueue;
use tidal_core::state::TaskGroupState;

use crate::executor::ExecutorRegistry;
use crate::policy::SchedulingPolicy;
use crate::queue::PendingTaskGroupQueue;
use crate::state::JobStateManager;

/// Why the dispatcher should retry placing the head of the pending queue.
#[derive(Debug, Clone, Copy)]
pub enum SchedulingSignal {
    /// A task group was enqueued.
    TaskGroupAvailable,
    /// An executor joined or left, or a slot was released.
    ExecutorPoolChanged,
}

/// The long-running dispatcher for one job.
///
/// The loop peeks the head of the pending queue, asks the policy for a
/// destination and, if one is found, claims the head, transitions it to
/// EXECUTING and issues the launch RPC. When no executor is eligible it
/// releases the head (cooperative yield) and parks on the signal channel
/// until the queue or the executor pool changes. It terminates when the job
/// reaches a terminal state or the pending queue is closed.
///
/// The runner never takes the scheduler's mutex; it only touches the pending
/// queue, the policy and the state manager, each internally synchronized.
pub struct SchedulerRunner {
    pending: Arc<PendingTaskGroupQueue>,
    policy: Arc<dyn SchedulingPolicy>,
    executors: ExecutorRegistry,
    signals: Arc<ClosableQueue<SchedulingSignal>>,
}

impl SchedulerRunner {
    /// Creates a runner over the given queue, policy and executor pool.
    pub fn new(
        pending: Arc<PendingTaskGroupQueue>,
        policy: Arc<dyn SchedulingPolicy>,
        executors: ExecutorRegistry,
        signals: Arc<ClosableQueue<SchedulingSignal>>,
    ) -> Self {
        Self {
            pending,
            policy,
            executors,
            signals,
        }
    }

    /// Binds the runner to the submitted job's state manager and spawns the
    /// dispatch loop.
    pub fn schedule_job(&self, state_manager: Arc<JobStateManager>) {
        let pending = self.pending.clone();
        let policy = self.policy.clone();
        let executors = self.executors.clone();
        let signals = self.signals.clone();
        tokio::spawn(async move {
            info!("Starting the scheduler runner for {}", state_manager.job_id());
            Self::run_loop(pending, policy, executors, signals, state_manager).await;
        });
    }

    async fn run_loop(
        pending: Arc<PendingTaskGroupQueue>,
        policy: Arc<dyn SchedulingPolicy>,
        executors: ExecutorRegistry,
        signals: Arc<ClosableQueue<SchedulingSignal>>,
        state_manager: Arc<JobStateManager>,
    ) {
        loop {
            let head = match pending.peek().await {
                Some(head) => head,
                // Queue closed and drained: shutdown.
                None => break,
            };
            if state_manager.check_job_termination() {
                break;
            }

            let executor_id = match policy.schedule_task_group(&head) {
                Some(executor_id) => executor_id,
                None => {
                    debug!(
                        "No eligible executor for {}, waiting for the pool or the queue to change",
                        head.task_group.id
                    );
                    if signals.take().await.is_none() {
                        break;
                    }
                    continue;
                }
            };

            let scheduled = match pending.dequeue_if_head(&head.task_group.id) {
                Some(scheduled) => scheduled,
                None => {
                    // Recovery removed the head between peek and claim.
                    debug!(
                        "{} was removed before dispatch, releasing its slot on {executor_id}",
                        head.task_group.id
                    );
                    policy.on_task_group_execution_failed(&executor_id, &head.task_group.id);
                    continue;
                }
            };

            let task_group_id = scheduled.task_group.id.clone();
            let client = match executors.get(&executor_id) {
                Some(client) => client,
                None => {
                    warn!(
                        "Executor {executor_id} disappeared before {task_group_id} was launched"
                    );
                    policy.on_task_group_execution_failed(&executor_id, &task_group_id);
                    if let Err(e) = pending.enqueue(scheduled) {
                        debug!("Dropping {task_group_id} during shutdown: {e}");
                    }
                    continue;
                }
            };

            if let Err(e) =
                state_manager.on_task_group_state_changed(&task_group_id, TaskGroupState::Executing)
            {
                // A concurrent recovery superseded this queue entry.
                debug!("Skipping dispatch of {task_group_id}: {e}");
                policy.on_task_group_execution_failed(&executor_id, &task_group_id);
                continue;
            }
            info!("Launching {task_group_id} on executor {executor_id}");
            if let Err(e) = client.launch_task_group(scheduled).await {
                // The executor side will surface this as a container failure
                // through executor removal.
                warn!("Launch RPC for {task_group_id} to {executor_id} failed: {e}");
            }
        }
        info!("The scheduler runner has terminated");
    }

    /// Wakes the dispatcher after a queue or executor-pool change.
    pub fn signal(&self, signal: SchedulingSignal) {
        // Shutdown may already have closed the channel.
        let _ = self.signals.put(signal);
    }

    /// Closes the signal channel, releasing a parked dispatcher.
    pub fn terminate(&self) {
        self.signals.close();
    }
}
