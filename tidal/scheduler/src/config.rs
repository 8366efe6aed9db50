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

//! Tidal scheduler specific configuration

use std::fmt;
use std::sync::Arc;

use crate::policy::{CapacitySchedulingPolicy, SchedulingPolicy};

/// Which scheduling policy implementation places task groups onto executors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPlacementPolicy {
    /// Capacity-based placement over labeled executors: transient stages on
    /// transient executors, reserved stages on reserved executors, and
    /// unannotated stages on transient capacity first.
    CapacityLabel,
}

impl fmt::Display for TaskPlacementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskPlacementPolicy::CapacityLabel => write!(f, "capacity-label"),
        }
    }
}

/// Configuration for the Tidal scheduler of a single batch job.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// The event loop buffer size. For a system of high throughput, a larger
    /// value like 1000000 is recommended.
    pub event_loop_buffer_size: usize,
    /// The task placement policy used by the scheduler runner.
    pub placement_policy: TaskPlacementPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            event_loop_buffer_size: 10000,
            placement_policy: TaskPlacementPolicy::CapacityLabel,
        }
    }
}

impl SchedulerConfig {
    /// Overrides the event loop buffer size.
    pub fn with_event_loop_buffer_size(mut self, buffer_size: usize) -> Self {
        self.event_loop_buffer_size = buffer_size;
        self
    }

    /// Overrides the task placement policy.
    pub fn with_placement_policy(mut self, policy: TaskPlacementPolicy) -> Self {
        self.placement_policy = policy;
        self
    }
}

/// Instantiates the scheduling policy selected by the configuration.
pub fn create_scheduling_policy(config: &SchedulerConfig) -> Arc<dyn SchedulingPolicy> {
    match config.placement_policy {
        TaskPlacementPolicy::CapacityLabel => Arc::new(CapacitySchedulingPolicy::new()),
    }
}
