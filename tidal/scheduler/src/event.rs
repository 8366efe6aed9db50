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

//! Scheduler events published on and consumed from the job-wide bus.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info};
use parking_lot::RwLock;

use tidal_core::error::{Result, TidalError};
use tidal_core::event_loop::{EventAction, EventSender};
use tidal_core::plan::PhysicalPlan;

use crate::batch_scheduler::BatchSingleJobScheduler;

/// Events exchanged on the job-wide bus.
#[derive(Clone)]
pub enum SchedulerEvent {
    /// A metric collection barrier finished ON_HOLD and completed its stage;
    /// the optimizer may now rewrite the remaining plan.
    DynamicOptimization {
        /// The plan as it stood when the barrier parked.
        plan: PhysicalPlan,
        /// The IR vertex of the barrier that collected the metrics.
        metric_collection_barrier_vertex: String,
        /// The executor that parked the barrier task group.
        executor_id: String,
        /// The parked task group.
        task_group_id: String,
    },
    /// The optimizer produced a rewritten plan for the running job.
    UpdatePhysicalPlan {
        /// The replacement plan.
        new_plan: PhysicalPlan,
        /// The (executor, task group) completing the optimization barrier,
        /// if one is parked ON_HOLD.
        task_info: Option<(String, String)>,
    },
}

impl SchedulerEvent {
    /// A short, static name for logging and metrics.
    pub fn event_type(&self) -> &'static str {
        match self {
            SchedulerEvent::DynamicOptimization { .. } => "DynamicOptimization",
            SchedulerEvent::UpdatePhysicalPlan { .. } => "UpdatePhysicalPlan",
        }
    }
}

impl Debug for SchedulerEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerEvent::DynamicOptimization {
                metric_collection_barrier_vertex,
                task_group_id,
                ..
            } => write!(
                f,
                "DynamicOptimization({metric_collection_barrier_vertex}, {task_group_id})"
            ),
            SchedulerEvent::UpdatePhysicalPlan { new_plan, .. } => {
                write!(f, "UpdatePhysicalPlan({})", new_plan.id())
            }
        }
    }
}

/// Applies [`SchedulerEvent::UpdatePhysicalPlan`] events to the scheduler.
///
/// The handler and the scheduler reference each other, so initialization is
/// two-step: construct both, then call [`bind`](Self::bind) to point the
/// handler at the scheduler before starting the event loop.
pub struct UpdatePhysicalPlanEventHandler {
    scheduler: RwLock<Option<Arc<BatchSingleJobScheduler>>>,
}

impl UpdatePhysicalPlanEventHandler {
    /// Creates an unbound handler.
    pub fn new() -> Self {
        Self {
            scheduler: RwLock::new(None),
        }
    }

    /// Points the handler at the scheduler it updates.
    pub fn bind(&self, scheduler: Arc<BatchSingleJobScheduler>) {
        *self.scheduler.write() = Some(scheduler);
    }
}

impl Default for UpdatePhysicalPlanEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventAction<SchedulerEvent> for UpdatePhysicalPlanEventHandler {
    fn on_start(&self) {
        info!("Starting the physical plan update handler");
    }

    fn on_stop(&self) {
        info!("Stopping the physical plan update handler");
    }

    async fn on_receive(
        &self,
        event: SchedulerEvent,
        _tx_event: &EventSender<SchedulerEvent>,
    ) -> Result<()> {
        match event {
            SchedulerEvent::UpdatePhysicalPlan {
                new_plan,
                task_info,
            } => {
                let scheduler = self.scheduler.read().clone().ok_or_else(|| {
                    TidalError::Internal(
                        "the plan update handler has not been bound to a scheduler".to_string(),
                    )
                })?;
                let job_id = scheduler.job_id().await?;
                scheduler.update_job(&job_id, new_plan, task_info).await
            }
            // Consumed by the optimizer, which is outside the scheduler.
            other => {
                debug!("Ignoring {other:?}");
                Ok(())
            }
        }
    }

    fn on_error(&self, error: TidalError) {
        error!("Error received by the plan update handler: {error}");
    }
}
