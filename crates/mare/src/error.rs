// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Error kinds (spec §7). Hand-written `Display`/`core::error::Error` impls
//! with `#[track_caller]` location capture, matching the teacher's
//! `error.rs` style (`SpawnError`/`Closed`) rather than reaching for
//! `thiserror`, which appears nowhere in the teacher's dependency tree.

use std::fmt;
use std::panic::Location;

/// Misuse errors (spec §7 "Misuse"): invalid handle, launching a destroyed
/// task, circular dependency, zero-size SDF channel, SDF cycle without a
/// delay. Thrown synchronously from the offending call.
#[derive(Debug)]
pub struct ApiError {
    kind: ApiErrorKind,
    message: String,
    location: &'static Location<'static>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ApiErrorKind {
    InvalidHandle,
    TaskDestroyed,
    CircularDependency,
    ZeroSizeChannel,
    CycleWithoutDelay,
    GroupCanceled,
}

impl ApiError {
    #[track_caller]
    fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub fn invalid_handle(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::InvalidHandle, message)
    }

    #[track_caller]
    pub fn task_destroyed(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::TaskDestroyed, message)
    }

    #[track_caller]
    pub fn circular_dependency(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::CircularDependency, message)
    }

    #[track_caller]
    pub fn zero_size_channel(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::ZeroSizeChannel, message)
    }

    #[track_caller]
    pub fn cycle_without_delay(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::CycleWithoutDelay, message)
    }

    #[track_caller]
    pub fn group_canceled(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::GroupCanceled, message)
    }

    pub fn kind(&self) -> ApiErrorKind {
        self.kind
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} at {}:{}:{}: {}",
            self.kind,
            self.location.file(),
            self.location.line(),
            self.location.column(),
            self.message
        )
    }
}

impl std::error::Error for ApiError {}

/// Storage errors (spec §7 "Storage"): allocation of a per-task/per-
/// scheduler/per-thread key fails.
#[derive(Debug)]
pub struct StorageError {
    message: String,
    location: &'static Location<'static>,
}

impl StorageError {
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: Location::caller(),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "storage error at {}:{}:{}: {}",
            self.location.file(),
            self.location.line(),
            self.location.column(),
            self.message
        )
    }
}

impl std::error::Error for StorageError {}

/// Resource errors (spec §7 "Resource"): pool creation fails, fork detected
/// while the pool is live. Process-terminating with a diagnostic rather than
/// recoverable — callers of `init` get a `Result`, but anything detected
/// after `init` already succeeded (e.g. a post-fork child) aborts.
#[derive(Debug)]
pub struct ResourceError {
    message: String,
}

impl ResourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource error: {}", self.message)
    }
}

impl std::error::Error for ResourceError {}

/// The cooperative-cancellation sentinel thrown by `abort_on_cancel`. The
/// worker loop's `catch_unwind` recognizes this exact payload type and
/// converts it into `CANCELED` bookkeeping without surfacing it as a task
/// failure; any other panic payload is stored and re-thrown from the first
/// `wait_for` caller.
#[derive(Debug)]
pub struct AbortTaskPanic;

impl fmt::Display for AbortTaskPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("task aborted via abort_on_cancel")
    }
}

impl std::error::Error for AbortTaskPanic {}

/// Stored in a group's first-failure slot when a member task panics (spec
/// §7 "Groups accumulate exceptions from members"). The group doesn't get
/// the member's own panic payload back — that one is rethrown from that
/// task's own `wait_for(task)` — only the fact that a member failed and
/// which one.
#[derive(Debug)]
pub struct GroupMemberFailed {
    pub task_id: crate::task::TaskId,
}

impl fmt::Display for GroupMemberFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "member task {:?} failed", self.task_id)
    }
}

impl std::error::Error for GroupMemberFailed {}
