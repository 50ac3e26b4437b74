// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy surfaced by the hot-swap orchestrator.

use thiserror::Error;

use crate::boot::BootError;
use crate::image::ImageError;
use crate::manifest::{Rejection, Resource};
use crate::slot::{Bank, SlotError};

/// Why a committed-looking update was turned into a rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackCause {
    /// The bank write returned an error.
    WriteFailed,
    /// The bank write took longer than `write_budget_ms`.
    WriteBudgetExceeded,
    /// The written bank failed re-validation.
    IntegrityCheckFailed,
}

/// Hot-swap engine error.
#[derive(Debug, Error)]
pub enum SwapError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("malformed agent image: {0}")]
    MalformedImage(&'static str),
    #[error("agent image truncated at offset {offset}: need {needed} bytes, {available} available")]
    IncompleteImage { offset: usize, needed: usize, available: usize },
    #[error("bundle hash does not match manifest")]
    HashMismatch,
    #[error("manifest signature rejected")]
    BadSignature,
    #[error("{resource:?} footprint {declared} exceeds budget {limit}")]
    OverBudget { resource: Resource, declared: u32, limit: u32 },
    #[error("bundle of {size} bytes exceeds bank capacity {max}")]
    InsufficientMemory { size: usize, max: usize },
    #[error("an update is already in progress")]
    UpdateInProgress,
    #[error("no update staged")]
    NothingStaged,
    #[error("update rolled back: {0:?}")]
    RolledBack(RollbackCause),
    #[error("bank {0} does not hold a valid agent")]
    NoRollbackTarget(Bank),
    #[error("boot verification failed: {0}")]
    BootVerificationFailed(#[from] BootError),
    #[error(transparent)]
    Slot(SlotError),
}

impl From<ImageError> for SwapError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::Empty => SwapError::InvalidParameter("empty bundle"),
            ImageError::Malformed(reason) => SwapError::MalformedImage(reason),
            ImageError::Incomplete { offset, needed, available } => {
                SwapError::IncompleteImage { offset, needed, available }
            }
        }
    }
}

impl From<Rejection> for SwapError {
    fn from(err: Rejection) -> Self {
        match err {
            Rejection::HashMismatch => SwapError::HashMismatch,
            Rejection::BadSignature => SwapError::BadSignature,
            Rejection::OverBudget { resource, declared, limit } => {
                SwapError::OverBudget { resource, declared, limit }
            }
        }
    }
}

impl From<SlotError> for SwapError {
    fn from(err: SlotError) -> Self {
        match err {
            SlotError::InvalidParameter(reason) => SwapError::InvalidParameter(reason),
            SlotError::InsufficientMemory { size, max } => {
                SwapError::InsufficientMemory { size, max }
            }
            other => SwapError::Slot(other),
        }
    }
}
