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

//! The block manager master collaborator contract.

use std::collections::HashSet;

/// Master-side bookkeeping of data blocks produced by task groups.
///
/// The scheduler informs the block manager master when a producer task group
/// is scheduled or failed, and consults it on executor removal to learn which
/// producers lost their committed blocks and must be re-executed.
pub trait BlockManagerMaster: Send + Sync {
    /// A producer task group has been enqueued for dispatch.
    fn on_producer_task_group_scheduled(&self, task_group_id: &str);

    /// A producer task group failed; its blocks are no longer trustworthy.
    fn on_producer_task_group_failed(&self, task_group_id: &str);

    /// An executor left the cluster. Returns the ids of task groups whose
    /// blocks were held only on that executor and are now lost.
    fn remove_worker(&self, executor_id: &str) -> HashSet<String>;
}
