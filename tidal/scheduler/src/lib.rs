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

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// The batch single-job scheduler orchestrating stages and recovery.
pub mod batch_scheduler;
/// The block manager master collaborator contract.
pub mod block_manager;
/// Scheduler configuration options.
pub mod config;
/// Scheduler events published on and consumed from the job-wide bus.
pub mod event;
/// Executor client contract and registry.
pub mod executor;
/// Scheduling policies for placing task groups onto executors.
pub mod policy;
/// The pending task group queue feeding the dispatcher.
pub mod queue;
/// The dispatcher loop marrying pending work to executor capacity.
pub mod runner;
/// Job, stage and task group state management.
pub mod state;

/// Test utilities for scheduler testing.
#[cfg(test)]
pub mod test_utils;

pub use batch_scheduler::BatchSingleJobScheduler;
