//! Check registry.
//!
//! Checks are plain functions of a [`HarnessContext`], kept in registration
//! order. Ids must be unique; categories are free-form grouping tags.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::HarnessContext;
use crate::model::CheckOutcome;
use crate::{HarnessError, Result};

/// Why a check could not return an outcome.
#[derive(Debug, Error)]
pub enum CheckError {
    /// The check ran and the property does not hold; recorded as FAIL.
    #[error("{0}")]
    Failed(String),
    /// Something the check needs is absent; recorded as UNKNOWN.
    #[error("missing infrastructure: {0}")]
    MissingInfrastructure(String),
    /// A fixture could not be read; aborts the session.
    #[error("fixture '{path}' unreadable: {detail}")]
    Fixture { path: String, detail: String },
}

impl CheckError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn missing(msg: impl Into<String>) -> Self {
        Self::MissingInfrastructure(msg.into())
    }
}

pub type CheckFn =
    Box<dyn Fn(&mut HarnessContext) -> std::result::Result<CheckOutcome, CheckError>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSpec {
    pub id: String,
    pub category: String,
    pub title: String,
}

pub struct RegisteredCheck {
    pub spec: CheckSpec,
    pub run: CheckFn,
}

impl fmt::Debug for RegisteredCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredCheck")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct CheckRegistry {
    checks: Vec<RegisteredCheck>,
}

impl CheckRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// [`HarnessError::InvalidCheckId`] for empty or whitespace-bearing ids,
    /// [`HarnessError::DuplicateCheck`] if `id` is already registered.
    pub fn register<F>(
        &mut self,
        id: impl Into<String>,
        category: impl Into<String>,
        title: impl Into<String>,
        check: F,
    ) -> Result<()>
    where
        F: Fn(&mut HarnessContext) -> std::result::Result<CheckOutcome, CheckError> + 'static,
    {
        let id = id.into();
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(HarnessError::InvalidCheckId { id });
        }
        if self.contains(&id) {
            return Err(HarnessError::DuplicateCheck { id });
        }
        self.checks.push(RegisteredCheck {
            spec: CheckSpec {
                id,
                category: category.into(),
                title: title.into(),
            },
            run: Box::new(check),
        });
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.checks.iter().any(|c| c.spec.id == id)
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredCheck> {
        self.checks.iter()
    }

    pub fn specs(&self) -> Vec<CheckSpec> {
        self.checks.iter().map(|c| c.spec.clone()).collect()
    }
}
