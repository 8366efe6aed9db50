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

//! The pending task group queue feeding the dispatcher.

use std::collections::{HashMap, HashSet, VecDeque};

use log::debug;
use parking_lot::Mutex;
use tokio::sync::Notify;

use tidal_core::error::{Result, TidalError};
use tidal_core::plan::{PhysicalPlan, ScheduledTaskGroup};

struct PendingInner {
    queue: VecDeque<ScheduledTaskGroup>,
    /// Stage id -> downstream stage ids, rebuilt whenever the plan changes.
    descendants: HashMap<String, HashSet<String>>,
    closed: bool,
}

/// Ordered collection of task groups awaiting dispatch.
///
/// Enqueue preserves schedule-group ordering: a task group of an earlier
/// schedule group is always ahead of a later one, and within a group the
/// enqueue order is preserved. Recovery removes not-yet-dispatched work for
/// a stage and its descendants in one sweep.
pub struct PendingTaskGroupQueue {
    inner: Mutex<PendingInner>,
    notify: Notify,
}

impl Default for PendingTaskGroupQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTaskGroupQueue {
    /// Creates an empty, open queue bound to no plan.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PendingInner {
                queue: VecDeque::new(),
                descendants: HashMap::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Binds the queue to a freshly submitted plan.
    pub fn on_job_scheduled(&self, plan: &PhysicalPlan) {
        let mut inner = self.inner.lock();
        inner.queue.clear();
        inner.closed = false;
        inner.descendants = Self::index_descendants(plan);
    }

    /// Refreshes the descendant index after the plan was replaced, keeping
    /// the queued work.
    pub fn on_plan_updated(&self, plan: &PhysicalPlan) {
        let mut inner = self.inner.lock();
        inner.descendants = Self::index_descendants(plan);
    }

    fn index_descendants(plan: &PhysicalPlan) -> HashMap<String, HashSet<String>> {
        plan.stage_dag()
            .stages()
            .iter()
            .map(|stage| (stage.id.clone(), plan.stage_dag().descendants_of(&stage.id)))
            .collect()
    }

    /// Appends a task group, keeping earlier schedule groups ahead.
    pub fn enqueue(&self, scheduled: ScheduledTaskGroup) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(TidalError::QueueClosed(format!(
                    "cannot enqueue {} after shutdown",
                    scheduled.task_group.id
                )));
            }
            let position = inner
                .queue
                .iter()
                .position(|queued| queued.schedule_group_index > scheduled.schedule_group_index)
                .unwrap_or(inner.queue.len());
            inner.queue.insert(position, scheduled);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Retrieves and removes the head, waiting if necessary.
    ///
    /// Returns `None` once the queue is empty and closed.
    pub async fn dequeue(&self) -> Option<ScheduledTaskGroup> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(scheduled) = inner.queue.pop_front() {
                    if !inner.queue.is_empty() {
                        // At most one wakeup is buffered, so pass it on.
                        self.notify.notify_one();
                    }
                    return Some(scheduled);
                }
                if inner.closed {
                    self.notify.notify_one();
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Retrieves, but does not remove, the head, waiting if necessary.
    ///
    /// Returns `None` once the queue is empty and closed.
    pub async fn peek(&self) -> Option<ScheduledTaskGroup> {
        loop {
            let notified = self.notify.notified();
            {
                let inner = self.inner.lock();
                if let Some(scheduled) = inner.queue.front() {
                    self.notify.notify_one();
                    return Some(scheduled.clone());
                }
                if inner.closed {
                    self.notify.notify_one();
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Removes and returns the head iff it is still the given task group.
    ///
    /// Recovery may remove a peeked head before the dispatcher claims it;
    /// the conditional pop makes the claim race-free.
    pub fn dequeue_if_head(&self, task_group_id: &str) -> Option<ScheduledTaskGroup> {
        let mut inner = self.inner.lock();
        if inner
            .queue
            .front()
            .is_some_and(|head| head.task_group.id == task_group_id)
        {
            inner.queue.pop_front()
        } else {
            None
        }
    }

    /// Removes every not-yet-dispatched task group belonging to the stage or
    /// any downstream stage. Returns the removed task group ids.
    pub fn remove_task_groups_and_descendants(&self, stage_id: &str) -> Vec<String> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let mut doomed: HashSet<&str> = HashSet::new();
        doomed.insert(stage_id);
        if let Some(descendants) = inner.descendants.get(stage_id) {
            doomed.extend(descendants.iter().map(|id| id.as_str()));
        }

        let mut removed = Vec::new();
        inner.queue.retain(|queued| {
            if doomed.contains(queued.task_group.stage_id.as_str()) {
                removed.push(queued.task_group.id.clone());
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            debug!("Removed {removed:?} from the pending queue for stage {stage_id}");
        }
        removed
    }

    /// Closes the queue, waking the dispatcher so it can observe shutdown.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Number of task groups awaiting dispatch.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Returns true if no task group awaits dispatch.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use tidal_core::id::IdAllocator;
    use tidal_core::plan::{ContainerType, DataFlowModel, PhysicalPlanBuilder};

    fn linear_plan() -> (PhysicalPlan, Vec<String>) {
        let ids = Arc::new(IdAllocator::new(0));
        let mut builder = PhysicalPlanBuilder::new(ids);
        let s0 = builder.add_stage(0, ContainerType::None, 2);
        let s1 = builder.add_stage(1, ContainerType::None, 2);
        let s2 = builder.add_stage(2, ContainerType::None, 1);
        builder.connect(&s0, &s1, DataFlowModel::Pull);
        builder.connect(&s1, &s2, DataFlowModel::Pull);
        let plan = builder.build().unwrap();
        (plan, vec![s0, s1, s2])
    }

    fn scheduled_of(plan: &PhysicalPlan, stage_id: &str, index: usize) -> ScheduledTaskGroup {
        let stage = plan.stage_dag().stage(stage_id).unwrap();
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

    #[tokio::test]
    async fn earlier_schedule_groups_jump_ahead() {
        let (plan, stages) = linear_plan();
        let queue = PendingTaskGroupQueue::new();
        queue.on_job_scheduled(&plan);

        queue.enqueue(scheduled_of(&plan, &stages[1], 0)).unwrap();
        queue.enqueue(scheduled_of(&plan, &stages[2], 0)).unwrap();
        // A recovered stage of schedule group 0 must be dispatched first.
        queue.enqueue(scheduled_of(&plan, &stages[0], 0)).unwrap();
        queue.enqueue(scheduled_of(&plan, &stages[0], 1)).unwrap();

        let order: Vec<usize> = vec![
            queue.dequeue().await.unwrap().schedule_group_index,
            queue.dequeue().await.unwrap().schedule_group_index,
            queue.dequeue().await.unwrap().schedule_group_index,
            queue.dequeue().await.unwrap().schedule_group_index,
        ];
        assert_eq!(vec![0, 0, 1, 2], order);
    }

    #[tokio::test]
    async fn removal_covers_stage_and_descendants() {
        let (plan, stages) = linear_plan();
        let queue = PendingTaskGroupQueue::new();
        queue.on_job_scheduled(&plan);

        queue.enqueue(scheduled_of(&plan, &stages[0], 0)).unwrap();
        queue.enqueue(scheduled_of(&plan, &stages[1], 0)).unwrap();
        queue.enqueue(scheduled_of(&plan, &stages[2], 0)).unwrap();

        let removed = queue.remove_task_groups_and_descendants(&stages[1]);
        assert_eq!(2, removed.len());
        assert_eq!(1, queue.len());
        // Only the upstream stage's task group survives.
        let head = queue.dequeue().await.unwrap();
        assert_eq!(stages[0], head.task_group.stage_id);
    }

    #[tokio::test]
    async fn dequeue_if_head_rejects_a_stale_claim() {
        let (plan, stages) = linear_plan();
        let queue = PendingTaskGroupQueue::new();
        queue.on_job_scheduled(&plan);

        queue.enqueue(scheduled_of(&plan, &stages[0], 0)).unwrap();
        queue.enqueue(scheduled_of(&plan, &stages[0], 1)).unwrap();

        let head = queue.peek().await.unwrap();
        // Recovery sweeps the head away before the dispatcher claims it.
        queue.remove_task_groups_and_descendants(&stages[0]);
        assert!(queue.dequeue_if_head(&head.task_group.id).is_none());
    }

    #[tokio::test]
    async fn close_unblocks_and_rejects_enqueue() {
        let (plan, stages) = linear_plan();
        let queue = Arc::new(PendingTaskGroupQueue::new());
        queue.on_job_scheduled(&plan);

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.close();
        assert!(waiter.await.unwrap().is_none());

        let result = queue.enqueue(scheduled_of(&plan, &stages[0], 0));
        assert!(matches!(result, Err(TidalError::QueueClosed(_))));
    }
}
