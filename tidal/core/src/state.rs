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

//! Execution state machines for jobs, stages and task groups.
//!
//! Each entity carries one of these machines:
//!
//! ```text
//! Job:       READY → EXECUTING → {COMPLETE | FAILED}
//! Stage:     READY → EXECUTING → {COMPLETE | FAILED_RECOVERABLE | FAILED_UNRECOVERABLE}
//!            FAILED_RECOVERABLE → READY on reschedule
//! TaskGroup: READY → EXECUTING → {COMPLETE | ON_HOLD | FAILED_RECOVERABLE | FAILED_UNRECOVERABLE}
//!            ON_HOLD → COMPLETE on resume; FAILED_RECOVERABLE → READY on reschedule
//! ```
//!
//! A COMPLETE stage or task group may fall back to FAILED_RECOVERABLE when the
//! executor holding its output blocks is removed from the cluster.

use std::fmt::{Display, Formatter};

use crate::error::{Result, TidalError};

/// State of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Submitted, not yet executing.
    Ready,
    /// At least one stage has been dispatched.
    Executing,
    /// Every stage completed.
    Complete,
    /// A stage failed unrecoverably.
    Failed,
}

impl JobState {
    /// Returns true if the requested edge exists in the job state machine.
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Ready, JobState::Executing)
                | (JobState::Executing, JobState::Complete)
                | (JobState::Executing, JobState::Failed)
        )
    }

    /// Returns true for COMPLETE and FAILED.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Complete | JobState::Failed)
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobState::Ready => "READY",
            JobState::Executing => "EXECUTING",
            JobState::Complete => "COMPLETE",
            JobState::Failed => "FAILED",
        };
        write!(f, "{name}")
    }
}

/// State of a physical stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageState {
    /// Not yet dispatched.
    Ready,
    /// Task groups of this stage are being dispatched or executed.
    Executing,
    /// Every task group completed.
    Complete,
    /// At least one task group failed recoverably; the stage will be rescheduled.
    FailedRecoverable,
    /// The stage failed and cannot be retried.
    FailedUnrecoverable,
}

impl StageState {
    /// Returns true if the requested edge exists in the stage state machine.
    pub fn can_transition_to(self, next: StageState) -> bool {
        matches!(
            (self, next),
            (StageState::Ready, StageState::Executing)
                | (StageState::Executing, StageState::Complete)
                | (StageState::Executing, StageState::FailedRecoverable)
                | (StageState::Executing, StageState::FailedUnrecoverable)
                | (StageState::Complete, StageState::FailedRecoverable)
                | (StageState::FailedRecoverable, StageState::Ready)
                | (StageState::FailedRecoverable, StageState::FailedUnrecoverable)
        )
    }
}

impl Display for StageState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StageState::Ready => "READY",
            StageState::Executing => "EXECUTING",
            StageState::Complete => "COMPLETE",
            StageState::FailedRecoverable => "FAILED_RECOVERABLE",
            StageState::FailedUnrecoverable => "FAILED_UNRECOVERABLE",
        };
        write!(f, "{name}")
    }
}

/// State of a task group, the smallest scheduling unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskGroupState {
    /// Enqueued or about to be enqueued, not yet dispatched.
    Ready,
    /// Launched on an executor.
    Executing,
    /// Finished and its output blocks are committed.
    Complete,
    /// Parked at a metric collection barrier, awaiting dynamic optimization.
    OnHold,
    /// Failed but eligible for re-execution.
    FailedRecoverable,
    /// Failed with no recovery path.
    FailedUnrecoverable,
}

impl TaskGroupState {
    /// Returns true if the requested edge exists in the task group state machine.
    pub fn can_transition_to(self, next: TaskGroupState) -> bool {
        matches!(
            (self, next),
            (TaskGroupState::Ready, TaskGroupState::Executing)
                | (TaskGroupState::Ready, TaskGroupState::FailedRecoverable)
                | (TaskGroupState::Executing, TaskGroupState::Complete)
                | (TaskGroupState::Executing, TaskGroupState::OnHold)
                | (TaskGroupState::Executing, TaskGroupState::FailedRecoverable)
                | (TaskGroupState::Executing, TaskGroupState::FailedUnrecoverable)
                | (TaskGroupState::Complete, TaskGroupState::FailedRecoverable)
                | (TaskGroupState::OnHold, TaskGroupState::Complete)
                | (TaskGroupState::OnHold, TaskGroupState::FailedRecoverable)
                | (TaskGroupState::FailedRecoverable, TaskGroupState::Ready)
        )
    }

    /// Decodes a wire state code received from an executor.
    pub fn from_code(code: i32) -> Result<TaskGroupState> {
        match code {
            0 => Ok(TaskGroupState::Ready),
            1 => Ok(TaskGroupState::Executing),
            2 => Ok(TaskGroupState::Complete),
            3 => Ok(TaskGroupState::OnHold),
            4 => Ok(TaskGroupState::FailedRecoverable),
            5 => Ok(TaskGroupState::FailedUnrecoverable),
            unknown => Err(TidalError::UnknownExecutionState(format!(
                "this task group state code is unknown: {unknown}"
            ))),
        }
    }
}

impl Display for TaskGroupState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskGroupState::Ready => "READY",
            TaskGroupState::Executing => "EXECUTING",
            TaskGroupState::Complete => "COMPLETE",
            TaskGroupState::OnHold => "ON_HOLD",
            TaskGroupState::FailedRecoverable => "FAILED_RECOVERABLE",
            TaskGroupState::FailedUnrecoverable => "FAILED_UNRECOVERABLE",
        };
        write!(f, "{name}")
    }
}

/// Why a task group failed recoverably.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoverableFailureCause {
    /// The task group could not read its input blocks; the whole stage must be redone.
    InputReadFailure,
    /// Execution succeeded but the output store failed; only this task group is retried.
    OutputWriteFailure,
    /// The executor container was lost.
    ContainerFailure,
}

impl RecoverableFailureCause {
    /// Decodes a wire failure-cause code received from an executor.
    pub fn from_code(code: i32) -> Result<RecoverableFailureCause> {
        match code {
            0 => Ok(RecoverableFailureCause::InputReadFailure),
            1 => Ok(RecoverableFailureCause::OutputWriteFailure),
            2 => Ok(RecoverableFailureCause::ContainerFailure),
            unknown => Err(TidalError::UnknownFailureCause(format!(
                "unknown cause code: {unknown}"
            ))),
        }
    }
}

impl Display for RecoverableFailureCause {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecoverableFailureCause::InputReadFailure => "INPUT_READ_FAILURE",
            RecoverableFailureCause::OutputWriteFailure => "OUTPUT_WRITE_FAILURE",
            RecoverableFailureCause::ContainerFailure => "CONTAINER_FAILURE",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_edges() {
        assert!(JobState::Ready.can_transition_to(JobState::Executing));
        assert!(JobState::Executing.can_transition_to(JobState::Complete));
        assert!(JobState::Executing.can_transition_to(JobState::Failed));
        assert!(!JobState::Ready.can_transition_to(JobState::Complete));
        assert!(!JobState::Complete.can_transition_to(JobState::Executing));
    }

    #[test]
    fn stage_edges() {
        assert!(StageState::FailedRecoverable.can_transition_to(StageState::Ready));
        assert!(StageState::Complete.can_transition_to(StageState::FailedRecoverable));
        assert!(!StageState::Complete.can_transition_to(StageState::Executing));
        assert!(!StageState::Ready.can_transition_to(StageState::Complete));
    }

    #[test]
    fn task_group_edges() {
        assert!(TaskGroupState::OnHold.can_transition_to(TaskGroupState::Complete));
        assert!(TaskGroupState::Ready.can_transition_to(TaskGroupState::FailedRecoverable));
        assert!(TaskGroupState::Complete.can_transition_to(TaskGroupState::FailedRecoverable));
        assert!(!TaskGroupState::OnHold.can_transition_to(TaskGroupState::Executing));
        assert!(!TaskGroupState::FailedUnrecoverable.can_transition_to(TaskGroupState::Ready));
    }

    #[test]
    fn wire_codes_round_trip() {
        assert_eq!(TaskGroupState::OnHold, TaskGroupState::from_code(3).unwrap());
        assert!(matches!(
            TaskGroupState::from_code(42),
            Err(TidalError::UnknownExecutionState(_))
        ));
        assert_eq!(
            RecoverableFailureCause::ContainerFailure,
            RecoverableFailureCause::from_code(2).unwrap()
        );
        assert!(matches!(
            RecoverableFailureCause::from_code(-1),
            Err(TidalError::UnknownFailureCause(_))
        ));
    }
}
