//! Lookup-or-create
//!
//! Every idempotent step of the setup pipeline has the same shape: list the
//! candidates, pick the one that satisfies the requirement, create it only if
//! none does. `probe` is the read-only half, reused by validation.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use tracing::{debug, info};

/// What an ensure step did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnsureAction {
    Reused,
    Created,
}

impl fmt::Display for EnsureAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnsureAction::Reused => write!(f, "reused"),
            EnsureAction::Created => write!(f, "created"),
        }
    }
}

/// A resource together with how it was obtained
#[derive(Debug, Clone, Serialize)]
pub struct Ensured<T> {
    pub resource: T,
    pub action: EnsureAction,
}

impl<T> Ensured<T> {
    pub fn created(&self) -> bool {
        self.action == EnsureAction::Created
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Ensured<U> {
        Ensured {
            resource: f(self.resource),
            action: self.action,
        }
    }
}

/// Look for an existing resource without mutating anything
pub async fn probe<T, L, S>(kind: &str, lookup: L, select: S) -> Result<Option<T>>
where
    L: Future<Output = Result<Vec<T>>>,
    S: FnOnce(Vec<T>) -> Option<T>,
{
    let candidates = lookup.await?;
    debug!("{} candidate(s) for {}", candidates.len(), kind);
    Ok(select(candidates))
}

/// Reuse the selected existing resource, or create one.
///
/// Lookup errors propagate unchanged and `create` is never called for them.
pub async fn ensure<T, L, S, C, F>(kind: &str, lookup: L, select: S, create: C) -> Result<Ensured<T>>
where
    L: Future<Output = Result<Vec<T>>>,
    S: FnOnce(Vec<T>) -> Option<T>,
    C: FnOnce() -> F,
    F: Future<Output = Result<T>>,
{
    if let Some(resource) = probe(kind, lookup, select).await? {
        debug!("Reusing existing {}", kind);
        return Ok(Ensured {
            resource,
            action: EnsureAction::Reused,
        });
    }

    info!("No suitable {} found, creating one", kind);
    let resource = create().await?;
    Ok(Ensured {
        resource,
        action: EnsureAction::Created,
    })
}

/// Adapt a single-resource getter to a list-shaped lookup.
///
/// A not-found error means "no candidates"; any other error propagates.
pub async fn lookup_one<T, F>(get: F) -> Result<Vec<T>>
where
    F: Future<Output = Result<T>>,
{
    match get.await {
        Ok(resource) => Ok(vec![resource]),
        Err(e) if e.is_not_found() => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Selector returning the first candidate matching `predicate`
pub fn first_matching<T>(predicate: impl Fn(&T) -> bool) -> impl FnOnce(Vec<T>) -> Option<T> {
    move |candidates| candidates.into_iter().find(|c| predicate(c))
}

/// Turn an absent resource into a named `RequirementUnmet` error
pub fn require<T>(found: Option<T>, requirement: impl Into<String>) -> Result<T> {
    found.ok_or_else(|| Error::RequirementUnmet {
        requirement: requirement.into(),
    })
}
