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

//! Tidal error types

use std::{
    error::Error,
    fmt::{Display, Formatter},
    result,
};

/// Result type alias for Tidal operations.
pub type Result<T> = result::Result<T, TidalError>;

/// Tidal error types for distributed dataflow execution.
#[derive(Debug)]
pub enum TidalError {
    /// A requested state-machine edge does not exist. Protocol bug; fatal to the job.
    IllegalStateTransition(String),
    /// Received a state value outside the enumeration.
    UnknownExecutionState(String),
    /// A scheduling protocol violation, e.g. an attempt index greater than
    /// the stage's current attempt.
    SchedulingFault(String),
    /// Received a failure cause outside the enumeration.
    UnknownFailureCause(String),
    /// An executor reported an unrecoverable task-group failure.
    UnrecoverableFailure(String),
    /// An element was offered to a queue whose input end has been closed.
    QueueClosed(String),
    /// Internal error indicating a bug or unexpected state.
    Internal(String),
    /// General error with a descriptive message.
    General(String),
}

#[allow(clippy::from_over_into)]
impl<T> Into<Result<T>> for TidalError {
    fn into(self) -> Result<T> {
        Err(self)
    }
}

/// Creates a general Tidal error from a string message.
pub fn tidal_error(message: &str) -> TidalError {
    TidalError::General(message.to_owned())
}

impl From<String> for TidalError {
    fn from(e: String) -> Self {
        TidalError::General(e)
    }
}

impl Display for TidalError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            TidalError::IllegalStateTransition(desc) => {
                write!(f, "Illegal state transition: {desc}")
            }
            TidalError::UnknownExecutionState(desc) => {
                write!(f, "Unknown execution state: {desc}")
            }
            TidalError::SchedulingFault(desc) => write!(f, "Scheduling fault: {desc}"),
            TidalError::UnknownFailureCause(desc) => {
                write!(f, "Unknown failure cause: {desc}")
            }
            TidalError::UnrecoverableFailure(desc) => {
                write!(f, "Unrecoverable failure: {desc}")
            }
            TidalError::QueueClosed(desc) => write!(f, "Queue closed: {desc}"),
            TidalError::Internal(desc) => write!(f, "Internal Tidal error: {desc}"),
            TidalError::General(desc) => write!(f, "General error: {desc}"),
        }
    }
}

impl Error for TidalError {}
