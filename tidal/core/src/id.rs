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

//! Seeded id allocation for runtime entities.
//!
//! Ids are allocated from an explicit, seeded counter so that every
//! component that names entities is handed its allocator instead of
//! reaching for process-wide state.

use std::sync::atomic::{AtomicU64, Ordering};

/// Allocates unique, human-readable ids for plans, stages, task groups and tasks.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Creates an allocator whose first id uses the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            next: AtomicU64::new(seed),
        }
    }

    fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Allocates a physical plan id.
    pub fn plan_id(&self) -> String {
        format!("Plan-{}", self.next())
    }

    /// Allocates a physical stage id.
    pub fn stage_id(&self) -> String {
        format!("Stage-{}", self.next())
    }

    /// Allocates a stage edge id.
    pub fn stage_edge_id(&self) -> String {
        format!("StageEdge-{}", self.next())
    }

    /// Allocates a task group id.
    pub fn task_group_id(&self) -> String {
        format!("TaskGroup-{}", self.next())
    }

    /// Allocates a task id.
    pub fn task_id(&self) -> String {
        format!("Task-{}", self.next())
    }

    /// Allocates an IR vertex id.
    pub fn vertex_id(&self) -> String {
        format!("Vertex-{}", self.next())
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sequential_from_seed() {
        let ids = IdAllocator::new(7);
        assert_eq!("Plan-7", ids.plan_id());
        assert_eq!("Stage-8", ids.stage_id());
        assert_eq!("TaskGroup-9", ids.task_group_id());
        assert_eq!("Task-10", ids.task_id());
    }
}
