//! Authoritative lifecycle state of every deployment.
//!
//! Records are written by the pipeline and read by status queries and
//! stream sessions. Reads take a shared lock and copy the record out, so
//! readers never hold the lock across an `.await`.

use crate::deployment::{DeploymentId, DeploymentRecord};
use deployd_sdk::objects::DeploymentStatus;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info};

/// Errors returned by [`DeploymentStatusStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("deployment {0} already exists")]
    AlreadyExists(DeploymentId),

    #[error("deployment {0} not found")]
    NotFound(DeploymentId),
}

/// Shared map of deployment id to [`DeploymentRecord`].
///
/// Cheap to clone; all clones see the same records.
#[derive(Clone, Default)]
pub struct DeploymentStatusStore {
    records: Arc<RwLock<HashMap<DeploymentId, DeploymentRecord>>>,
}

impl DeploymentStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new `Running` record stamped with the current time.
    pub fn create(&self, id: DeploymentId) -> Result<DeploymentRecord, StoreError> {
        let mut records = self.write();
        if records.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }
        let record = DeploymentRecord::new(id.clone());
        records.insert(id, record.clone());
        debug!(deployment_id = %record.id, "Deployment record created");
        Ok(record)
    }

    /// Move a deployment to a terminal status.
    ///
    /// Returns `Ok(false)` without touching the record when it is already
    /// terminal or when `status` is not terminal, so a late writer can
    /// never overwrite the first outcome.
    pub fn transition(
        &self,
        id: &DeploymentId,
        status: DeploymentStatus,
        error: Option<String>,
    ) -> Result<bool, StoreError> {
        let mut records = self.write();
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        if record.is_terminal() || !status.is_terminal() {
            debug!(
                deployment_id = %id,
                current = %record.status,
                requested = %status,
                "Ignoring status transition"
            );
            return Ok(false);
        }

        record.status = status;
        record.end_time = Some(OffsetDateTime::now_utc());
        record.error = error;
        info!(deployment_id = %id, %status, "Deployment reached terminal status");
        Ok(true)
    }

    /// Snapshot of the record for `id`.
    pub fn get(&self, id: &str) -> Result<DeploymentRecord, StoreError> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(DeploymentId::from(id)))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<DeploymentId, DeploymentRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<DeploymentId, DeploymentRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }
}
