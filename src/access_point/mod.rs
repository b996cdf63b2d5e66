//! Access-point lifecycle manager.
//!
//! Orchestrates create/wait/delete/wait for the mount targets binding a
//! share into a VPC or subnet. Creation and deletion are idempotent:
//! creation first re-checks for an existing access point with the same
//! (share, VPC-or-subnet) key, and deletion treats an absent or
//! already-tearing-down target as success. All backend calls pass the same
//! classification gate — only errors marked retriable are re-issued, with a
//! doubling backoff capped at the configured ceiling.

use std::future::Future;
use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::session::{
    AccessPoint, AccessPointRequest, AccessPointStatus, FileShareSession, SessionError, Share,
    ShareStatus,
};
use thiserror::Error;

/// Errors raised while driving an access point through its lifecycle.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AccessPointError {
    /// Non-retriable backend failure, surfaced as-is.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Raised when the attempt budget is exhausted on transient failures.
    #[error("{operation} failed after retries: {source}")]
    RetriesExhausted {
        /// Operation that was being retried.
        operation: String,
        /// Last transient error observed.
        source: SessionError,
    },
    /// Raised when an access point never reaches the stable status within
    /// the attempt budget.
    #[error("access point {access_point_id} on share {share_id} did not become stable")]
    StatusTimeout {
        /// Share owning the access point.
        share_id: String,
        /// Access point being waited on.
        access_point_id: String,
    },
    /// Raised when the backend reports the access point as failed.
    #[error("access point {access_point_id} on share {share_id} entered the failed state")]
    CreateFailed {
        /// Share owning the access point.
        share_id: String,
        /// Access point that failed.
        access_point_id: String,
    },
    /// Raised when an access point is still visible after the deletion
    /// attempt budget.
    #[error("access point {access_point_id} on share {share_id} still present after deletion")]
    Residual {
        /// Share owning the access point.
        share_id: String,
        /// Access point that refused to disappear.
        access_point_id: String,
    },
    /// Raised when a share cannot be deleted because several live access
    /// points exist and it is ambiguous which to clean up.
    #[error(
        "share {share_id} has {} live access points in VPCs [{}]; delete them first",
        vpc_ids.len(),
        vpc_ids.join(", ")
    )]
    MultipleAccessPoints {
        /// Share that refused deletion.
        share_id: String,
        /// Owning VPC id of every live access point.
        vpc_ids: Vec<String>,
    },
    /// Raised when a share never reaches the stable status within the
    /// attempt budget.
    #[error("share {share_id} did not become stable")]
    ShareNotStable {
        /// Share being waited on.
        share_id: String,
    },
    /// Raised when the backend reports the share as failed.
    #[error("share {share_id} entered the failed state")]
    ShareFailed {
        /// Share that failed.
        share_id: String,
    },
}

/// Drives access-point create/wait/delete/wait against the backend session.
#[derive(Clone)]
pub struct AccessPointManager {
    session: Arc<dyn FileShareSession>,
    retry: RetryPolicy,
}

impl AccessPointManager {
    /// Creates a manager over the given session with the process retry
    /// policy.
    #[must_use]
    pub fn new(session: Arc<dyn FileShareSession>, retry: RetryPolicy) -> Self {
        Self { session, retry }
    }

    /// Runs a backend call under the classification gate: transient errors
    /// are retried with doubling backoff up to the attempt ceiling, all
    /// others are surfaced immediately.
    ///
    /// # Errors
    ///
    /// Returns [`AccessPointError::Session`] for non-retriable failures and
    /// [`AccessPointError::RetriesExhausted`] when the budget runs out.
    pub async fn with_retries<T, F, Fut>(
        &self,
        operation: &str,
        mut call: F,
    ) -> Result<T, AccessPointError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, SessionError>> + Send,
    {
        let mut last: Option<SessionError> = None;
        for attempt in 0..self.retry.max_attempts {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retriable() => {
                    warn!(operation, attempt, error = %err, "transient backend error, retrying");
                    last = Some(err);
                }
                Err(err) => return Err(AccessPointError::Session(err)),
            }
            if attempt + 1 < self.retry.max_attempts {
                sleep(self.retry.gap_for(attempt)).await;
            }
        }
        Err(AccessPointError::RetriesExhausted {
            operation: operation.to_owned(),
            source: last.unwrap_or_else(|| SessionError::retriable("no attempts executed")),
        })
    }

    /// Creates the access point binding `share_id` into the requested
    /// VPC/subnet, or returns the existing one unchanged.
    ///
    /// A creation that lands in `pending` is waited on, never re-issued.
    ///
    /// # Errors
    ///
    /// Returns [`AccessPointError`] when creation fails, the backend
    /// reports a terminal failure, or the wait budget is exhausted.
    pub async fn ensure(
        &self,
        share_id: &str,
        request: &AccessPointRequest,
    ) -> Result<AccessPoint, AccessPointError> {
        if let Some(existing) = self.find_existing(share_id, request).await? {
            debug!(share_id, access_point_id = %existing.id, "reusing existing access point");
            if existing.status == AccessPointStatus::Stable {
                return Ok(existing);
            }
            if existing.status == AccessPointStatus::Pending {
                return self.wait_until_stable(share_id, &existing.id).await;
            }
            // Deleting/deleted/failed records do not satisfy the request;
            // fall through and create a fresh access point.
        }

        let created = self
            .with_retries("create access point", || {
                self.session.create_access_point(share_id, request)
            })
            .await?;
        info!(share_id, access_point_id = %created.id, "access point created");
        if created.status == AccessPointStatus::Stable {
            return Ok(created);
        }
        self.wait_until_stable(share_id, &created.id).await
    }

    /// Looks up an access point for the (share, VPC-or-subnet) key of the
    /// request. The subnet is the dedup key when given, the VPC otherwise.
    async fn find_existing(
        &self,
        share_id: &str,
        request: &AccessPointRequest,
    ) -> Result<Option<AccessPoint>, AccessPointError> {
        let existing = self
            .with_retries("list access points", || {
                self.session.list_access_points(share_id)
            })
            .await?;
        let matched = existing.into_iter().find(|candidate| {
            if request.subnet_id.is_some() {
                candidate.subnet_id == request.subnet_id
            } else {
                candidate.vpc_id == request.vpc_id
            }
        });
        Ok(matched)
    }

    /// Polls until the access point reports `stable`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessPointError::CreateFailed`] on a terminal failure and
    /// [`AccessPointError::StatusTimeout`] when the attempt budget runs
    /// out.
    pub async fn wait_until_stable(
        &self,
        share_id: &str,
        access_point_id: &str,
    ) -> Result<AccessPoint, AccessPointError> {
        for attempt in 0..self.retry.max_attempts {
            match self.session.get_access_point(share_id, access_point_id).await {
                Ok(access_point) => match access_point.status {
                    AccessPointStatus::Stable => return Ok(access_point),
                    AccessPointStatus::Failed => {
                        return Err(AccessPointError::CreateFailed {
                            share_id: share_id.to_owned(),
                            access_point_id: access_point_id.to_owned(),
                        });
                    }
                    _ => {}
                },
                Err(err) if err.is_retriable() => {
                    warn!(share_id, access_point_id, error = %err, "poll failed, retrying");
                }
                Err(err) => return Err(AccessPointError::Session(err)),
            }
            if attempt + 1 < self.retry.max_attempts {
                sleep(self.retry.gap_for(attempt)).await;
            }
        }
        Err(AccessPointError::StatusTimeout {
            share_id: share_id.to_owned(),
            access_point_id: access_point_id.to_owned(),
        })
    }

    /// Deletes an access point. An absent target, or one already in
    /// teardown, is success without another delete call.
    ///
    /// # Errors
    ///
    /// Returns [`AccessPointError`] when the backend rejects the deletion.
    pub async fn remove(
        &self,
        share_id: &str,
        access_point_id: &str,
    ) -> Result<(), AccessPointError> {
        let lookup = self
            .with_retries("get access point", || {
                self.session.get_access_point(share_id, access_point_id)
            })
            .await;
        match lookup {
            Err(AccessPointError::Session(err)) if err.is_not_found() => {
                debug!(share_id, access_point_id, "access point already absent");
                return Ok(());
            }
            Err(other) => return Err(other),
            Ok(existing)
                if matches!(
                    existing.status,
                    AccessPointStatus::Deleting | AccessPointStatus::Deleted
                ) =>
            {
                debug!(share_id, access_point_id, "access point already tearing down");
                return Ok(());
            }
            Ok(_) => {}
        }

        self.with_retries("delete access point", || {
            self.session.delete_access_point(share_id, access_point_id)
        })
        .await?;
        info!(share_id, access_point_id, "access point deletion issued");
        Ok(())
    }

    /// Polls until a lookup of the access point reports not-found.
    ///
    /// A not-found outcome is success; any other lookup error is fatal
    /// without further retry, because deletion must not be blindly retried
    /// against unknown error classes.
    ///
    /// # Errors
    ///
    /// Returns [`AccessPointError::Residual`] when the target is still
    /// visible after the attempt budget.
    pub async fn wait_until_gone(
        &self,
        share_id: &str,
        access_point_id: &str,
    ) -> Result<(), AccessPointError> {
        for attempt in 0..self.retry.max_attempts {
            match self.session.get_access_point(share_id, access_point_id).await {
                Err(err) if err.is_not_found() => return Ok(()),
                Err(err) => return Err(AccessPointError::Session(err)),
                Ok(_) => {
                    if attempt + 1 < self.retry.max_attempts {
                        sleep(self.retry.gap_for(attempt)).await;
                    }
                }
            }
        }
        Err(AccessPointError::Residual {
            share_id: share_id.to_owned(),
            access_point_id: access_point_id.to_owned(),
        })
    }

    /// Lists the live (pending or stable) access points of a share.
    ///
    /// # Errors
    ///
    /// Returns [`AccessPointError`] when the listing fails.
    pub async fn live_access_points(
        &self,
        share_id: &str,
    ) -> Result<Vec<AccessPoint>, AccessPointError> {
        let all = self
            .with_retries("list access points", || {
                self.session.list_access_points(share_id)
            })
            .await?;
        Ok(all
            .into_iter()
            .filter(|access_point| access_point.status.is_live())
            .collect())
    }

    /// Refuses share deletion while several live access points exist, since
    /// it is ambiguous which one to clean up. The error names the owning
    /// VPC of every live access point.
    ///
    /// # Errors
    ///
    /// Returns [`AccessPointError::MultipleAccessPoints`] on ambiguity.
    pub async fn ensure_share_deletable(&self, share_id: &str) -> Result<(), AccessPointError> {
        let live = self.live_access_points(share_id).await?;
        if live.len() > 1 {
            let vpc_ids = live
                .iter()
                .map(|access_point| {
                    access_point
                        .vpc_id
                        .clone()
                        .unwrap_or_else(|| String::from("<unknown>"))
                })
                .collect();
            return Err(AccessPointError::MultipleAccessPoints {
                share_id: share_id.to_owned(),
                vpc_ids,
            });
        }
        Ok(())
    }

    /// Polls until the share reports `stable`; access points may only be
    /// created on stable shares.
    ///
    /// # Errors
    ///
    /// Returns [`AccessPointError::ShareFailed`] on a terminal failure and
    /// [`AccessPointError::ShareNotStable`] when the budget runs out.
    pub async fn wait_share_stable(&self, share_id: &str) -> Result<Share, AccessPointError> {
        for attempt in 0..self.retry.max_attempts {
            match self.session.get_share(share_id).await {
                Ok(share) => match share.status {
                    ShareStatus::Stable => return Ok(share),
                    ShareStatus::Failed => {
                        return Err(AccessPointError::ShareFailed {
                            share_id: share_id.to_owned(),
                        });
                    }
                    _ => {}
                },
                Err(err) if err.is_retriable() => {
                    warn!(share_id, error = %err, "share poll failed, retrying");
                }
                Err(err) => return Err(AccessPointError::Session(err)),
            }
            if attempt + 1 < self.retry.max_attempts {
                sleep(self.retry.gap_for(attempt)).await;
            }
        }
        Err(AccessPointError::ShareNotStable {
            share_id: share_id.to_owned(),
        })
    }
}
