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

//! Executor client contract and registry.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use tidal_core::error::Result;
use tidal_core::plan::{ContainerType, ScheduledTaskGroup};

/// Handle for issuing control RPCs to one remote executor.
#[async_trait]
pub trait ExecutorClient: Send + Sync {
    /// Instructs the executor to launch the given task group.
    async fn launch_task_group(&self, scheduled: ScheduledTaskGroup) -> Result<()>;
}

/// What the resource substrate reported about an executor when it joined.
#[derive(Debug, Clone)]
pub struct ExecutorMetadata {
    /// Executor id.
    pub id: String,
    /// How many task groups the executor runs concurrently.
    pub capacity: usize,
    /// Transient or reserved, per the resource substrate's label.
    pub container_type: ContainerType,
}

/// Client handles for the executors currently in the pool.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    clients: Arc<DashMap<String, Arc<dyn ExecutorClient>>>,
}

impl ExecutorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the client handle for a newly added executor.
    pub fn register(&self, executor_id: &str, client: Arc<dyn ExecutorClient>) {
        self.clients.insert(executor_id.to_owned(), client);
    }

    /// Drops the client handle of a removed executor.
    pub fn remove(&self, executor_id: &str) {
        self.clients.remove(executor_id);
    }

    /// Looks up the client handle for an executor, if it is still registered.
    pub fn get(&self, executor_id: &str) -> Option<Arc<dyn ExecutorClient>> {
        self.clients.get(executor_id).map(|entry| entry.clone())
    }
}
