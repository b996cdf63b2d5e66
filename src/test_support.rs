//! In-memory fakes for exercising the driver without a cloud backend or a
//! real host.
//!
//! [`FakeSession`] plays the file-storage control plane: records live in
//! memory, failures and status transitions are scripted per operation, and
//! every call is counted so tests can assert idempotency. [`FakeMount`]
//! plays the host mount table the same way.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::mount::{FsUsage, HostMount, MountError};
use crate::params::VolumeSpec;
use crate::session::{
    AccessPoint, AccessPointRequest, AccessPointStatus, CODE_START_TOKEN_NOT_FOUND,
    FileShareSession, SessionError, SessionErrorKind, Share, ShareFilter, ShareList, ShareStatus,
};

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Default)]
struct SessionState {
    shares: Vec<Share>,
    access_points: Vec<(String, AccessPoint)>,
    share_status_script: VecDeque<ShareStatus>,
    access_point_status_script: VecDeque<AccessPointStatus>,
    failures: HashMap<&'static str, VecDeque<SessionError>>,
    calls: HashMap<&'static str, u32>,
    next_id: u32,
    retain_deleted_access_points: bool,
    last_list_limit: Option<u32>,
}

impl SessionState {
    /// Next generated share id, skipping any id a test has seeded.
    fn next_share_id(&mut self) -> String {
        loop {
            self.next_id += 1;
            let id = format!("share-{}", self.next_id);
            if !self.shares.iter().any(|share| share.id == id) {
                return id;
            }
        }
    }

    /// Next generated access-point id, skipping any id a test has seeded.
    fn next_access_point_id(&mut self) -> String {
        loop {
            self.next_id += 1;
            let id = format!("ap-{}", self.next_id);
            if !self
                .access_points
                .iter()
                .any(|(_, access_point)| access_point.id == id)
            {
                return id;
            }
        }
    }
}

/// Scripted in-memory stand-in for the file-storage control plane.
#[derive(Default)]
pub struct FakeSession {
    state: Mutex<SessionState>,
}

impl FakeSession {
    /// Creates an empty fake.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a share record.
    pub fn push_share(&self, share: Share) {
        locked(&self.state).shares.push(share);
    }

    /// Seeds an access-point record on a share.
    pub fn push_access_point(&self, share_id: &str, access_point: AccessPoint) {
        locked(&self.state)
            .access_points
            .push((share_id.to_owned(), access_point));
    }

    /// Queues an error returned by the next call to `operation`.
    pub fn fail_next(&self, operation: &'static str, error: SessionError) {
        locked(&self.state)
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Queues statuses returned by successive `get_share` calls; the stored
    /// record is updated as each status is consumed.
    pub fn script_share_statuses(&self, statuses: &[ShareStatus]) {
        locked(&self.state)
            .share_status_script
            .extend(statuses.iter().copied());
    }

    /// Queues statuses returned by successive `get_access_point` calls.
    pub fn script_access_point_statuses(&self, statuses: &[AccessPointStatus]) {
        locked(&self.state)
            .access_point_status_script
            .extend(statuses.iter().copied());
    }

    /// Keeps deleted access points visible as `Deleting` instead of
    /// removing their records, so teardown waits can be exercised.
    pub fn retain_deleted_access_points(&self) {
        locked(&self.state).retain_deleted_access_points = true;
    }

    /// Page size received by the most recent `list_shares` call.
    #[must_use]
    pub fn last_list_limit(&self) -> Option<u32> {
        locked(&self.state).last_list_limit
    }

    /// Number of completed calls to `operation` (failures included).
    #[must_use]
    pub fn calls(&self, operation: &'static str) -> u32 {
        locked(&self.state).calls.get(operation).copied().unwrap_or(0)
    }

    /// Snapshot of the share records.
    #[must_use]
    pub fn shares(&self) -> Vec<Share> {
        locked(&self.state).shares.clone()
    }

    /// Snapshot of the access-point records of a share.
    #[must_use]
    pub fn access_points(&self, share_id: &str) -> Vec<AccessPoint> {
        locked(&self.state)
            .access_points
            .iter()
            .filter(|(owner, _)| owner == share_id)
            .map(|(_, access_point)| access_point.clone())
            .collect()
    }

    fn begin(&self, operation: &'static str) -> Result<(), SessionError> {
        let mut state = locked(&self.state);
        *state.calls.entry(operation).or_insert(0) += 1;
        if let Some(queue) = state.failures.get_mut(operation)
            && let Some(error) = queue.pop_front()
        {
            return Err(error);
        }
        Ok(())
    }
}

#[async_trait]
impl FileShareSession for FakeSession {
    async fn create_share(&self, spec: &VolumeSpec) -> Result<Share, SessionError> {
        self.begin("create_share")?;
        let mut state = locked(&self.state);
        let id = state.next_share_id();
        let share = Share {
            crn: format!("crn:{id}"),
            id,
            name: spec.name.clone(),
            capacity_gib: spec.capacity_gib,
            status: ShareStatus::Pending,
            zone: spec.zone.clone(),
        };
        state.shares.push(share.clone());
        Ok(share)
    }

    async fn get_share(&self, share_id: &str) -> Result<Share, SessionError> {
        self.begin("get_share")?;
        let mut state = locked(&self.state);
        let scripted = state.share_status_script.pop_front();
        let share = state
            .shares
            .iter_mut()
            .find(|share| share.id == share_id)
            .ok_or_else(|| SessionError::not_found(format!("share {share_id} not found")))?;
        if let Some(status) = scripted {
            share.status = status;
        }
        Ok(share.clone())
    }

    async fn get_share_by_name(&self, name: &str) -> Result<Share, SessionError> {
        self.begin("get_share_by_name")?;
        let state = locked(&self.state);
        state
            .shares
            .iter()
            .find(|share| share.name == name)
            .cloned()
            .ok_or_else(|| SessionError::not_found(format!("share named {name} not found")))
    }

    async fn delete_share(&self, share_id: &str) -> Result<(), SessionError> {
        self.begin("delete_share")?;
        let mut state = locked(&self.state);
        let before = state.shares.len();
        state.shares.retain(|share| share.id != share_id);
        if state.shares.len() == before {
            return Err(SessionError::not_found(format!(
                "share {share_id} not found"
            )));
        }
        Ok(())
    }

    async fn list_shares(&self, filter: &ShareFilter) -> Result<ShareList, SessionError> {
        self.begin("list_shares")?;
        let mut state = locked(&self.state);
        state.last_list_limit = Some(filter.limit);
        let matching: Vec<Share> = state.shares.clone();
        let offset = match filter.start.as_deref() {
            None => 0,
            Some(token) => token.parse::<usize>().map_err(|_| {
                SessionError::new(
                    SessionErrorKind::Invalid,
                    CODE_START_TOKEN_NOT_FOUND,
                    format!("unknown start token {token}"),
                )
            })?,
        };
        if offset > matching.len() {
            return Err(SessionError::new(
                SessionErrorKind::Invalid,
                CODE_START_TOKEN_NOT_FOUND,
                format!("unknown start token {offset}"),
            ));
        }
        let limit = if filter.limit == 0 {
            matching.len()
        } else {
            usize::try_from(filter.limit).unwrap_or(usize::MAX)
        };
        let page: Vec<Share> = matching.iter().skip(offset).take(limit).cloned().collect();
        let consumed = offset.saturating_add(page.len());
        let next_token = (consumed < matching.len()).then(|| consumed.to_string());
        Ok(ShareList {
            shares: page,
            next_token,
        })
    }

    async fn create_access_point(
        &self,
        share_id: &str,
        request: &AccessPointRequest,
    ) -> Result<AccessPoint, SessionError> {
        self.begin("create_access_point")?;
        let mut state = locked(&self.state);
        let id = state.next_access_point_id();
        let access_point = AccessPoint {
            mount_path: Some(format!("fs.example.net:/export/{id}")),
            id,
            status: AccessPointStatus::Pending,
            vpc_id: request.vpc_id.clone(),
            subnet_id: request.subnet_id.clone(),
        };
        state
            .access_points
            .push((share_id.to_owned(), access_point.clone()));
        Ok(access_point)
    }

    async fn get_access_point(
        &self,
        share_id: &str,
        access_point_id: &str,
    ) -> Result<AccessPoint, SessionError> {
        self.begin("get_access_point")?;
        let mut state = locked(&self.state);
        let scripted = state.access_point_status_script.pop_front();
        let found = state
            .access_points
            .iter_mut()
            .find(|(owner, access_point)| owner == share_id && access_point.id == access_point_id);
        let Some((_, access_point)) = found else {
            return Err(SessionError::not_found(format!(
                "access point {access_point_id} not found"
            )));
        };
        if let Some(status) = scripted {
            access_point.status = status;
        }
        Ok(access_point.clone())
    }

    async fn list_access_points(&self, share_id: &str) -> Result<Vec<AccessPoint>, SessionError> {
        self.begin("list_access_points")?;
        Ok(self.access_points(share_id))
    }

    async fn delete_access_point(
        &self,
        share_id: &str,
        access_point_id: &str,
    ) -> Result<(), SessionError> {
        self.begin("delete_access_point")?;
        let mut state = locked(&self.state);
        if state.retain_deleted_access_points {
            let found = state.access_points.iter_mut().find(|(owner, access_point)| {
                owner == share_id && access_point.id == access_point_id
            });
            let Some((_, access_point)) = found else {
                return Err(SessionError::not_found(format!(
                    "access point {access_point_id} not found"
                )));
            };
            access_point.status = AccessPointStatus::Deleting;
            return Ok(());
        }
        let before = state.access_points.len();
        state
            .access_points
            .retain(|(owner, access_point)| owner != share_id || access_point.id != access_point_id);
        if state.access_points.len() == before {
            return Err(SessionError::not_found(format!(
                "access point {access_point_id} not found"
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
struct MountState {
    mounted: HashSet<PathBuf>,
    dirs: HashSet<PathBuf>,
    mount_failures: VecDeque<MountError>,
    unmount_failures: VecDeque<MountError>,
    mount_leaves_mount_on_failure: bool,
    stuck_after_unmount: bool,
    usage: FsUsage,
    mount_calls: u32,
    unmount_calls: u32,
}

/// In-memory stand-in for the host mount table.
#[derive(Default)]
pub struct FakeMount {
    state: Mutex<MountState>,
}

impl FakeMount {
    /// Creates an empty fake host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a path as an existing directory.
    pub fn add_dir(&self, path: &Path) {
        locked(&self.state).dirs.insert(path.to_owned());
    }

    /// Marks a path as already mounted (its directory exists too).
    pub fn add_mount(&self, path: &Path) {
        let mut state = locked(&self.state);
        state.dirs.insert(path.to_owned());
        state.mounted.insert(path.to_owned());
    }

    /// Queues an error for the next `mount` call.
    pub fn fail_next_mount(&self, error: MountError) {
        locked(&self.state).mount_failures.push_back(error);
    }

    /// Queues an error for the next `unmount` call.
    pub fn fail_next_unmount(&self, error: MountError) {
        locked(&self.state).unmount_failures.push_back(error);
    }

    /// Makes a failing `mount` call leave the target mounted anyway, as a
    /// half-completed mount does.
    pub fn set_mount_leaves_mount_on_failure(&self) {
        locked(&self.state).mount_leaves_mount_on_failure = true;
    }

    /// Makes unmount succeed without clearing the mount, so stuck-mount
    /// detection can be exercised.
    pub fn set_stuck_after_unmount(&self) {
        locked(&self.state).stuck_after_unmount = true;
    }

    /// Sets the usage figures reported by `fs_usage`.
    pub fn set_usage(&self, usage: FsUsage) {
        locked(&self.state).usage = usage;
    }

    /// Number of `mount` calls observed.
    #[must_use]
    pub fn mount_calls(&self) -> u32 {
        locked(&self.state).mount_calls
    }

    /// Number of `unmount` calls observed.
    #[must_use]
    pub fn unmount_calls(&self) -> u32 {
        locked(&self.state).unmount_calls
    }

    /// Whether the path is currently recorded as a directory.
    #[must_use]
    pub fn has_dir(&self, path: &Path) -> bool {
        locked(&self.state).dirs.contains(path)
    }

    /// Whether the path is currently recorded as mounted.
    #[must_use]
    pub fn has_mount(&self, path: &Path) -> bool {
        locked(&self.state).mounted.contains(path)
    }
}

#[async_trait]
impl HostMount for FakeMount {
    async fn is_mount_point(&self, path: &Path) -> Result<bool, MountError> {
        Ok(locked(&self.state).mounted.contains(path))
    }

    async fn make_dir(&self, path: &Path) -> Result<(), MountError> {
        locked(&self.state).dirs.insert(path.to_owned());
        Ok(())
    }

    async fn mount(
        &self,
        _source: &str,
        target: &Path,
        _fs_type: &str,
        _options: &[String],
    ) -> Result<(), MountError> {
        let mut state = locked(&self.state);
        state.mount_calls += 1;
        if let Some(error) = state.mount_failures.pop_front() {
            if state.mount_leaves_mount_on_failure {
                state.mounted.insert(target.to_owned());
            }
            return Err(error);
        }
        state.mounted.insert(target.to_owned());
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<(), MountError> {
        let mut state = locked(&self.state);
        state.unmount_calls += 1;
        if let Some(error) = state.unmount_failures.pop_front() {
            return Err(error);
        }
        if !state.stuck_after_unmount {
            state.mounted.remove(target);
        }
        Ok(())
    }

    async fn remove_dir(&self, path: &Path) -> Result<(), MountError> {
        locked(&self.state).dirs.remove(path);
        Ok(())
    }

    async fn path_exists(&self, path: &Path) -> Result<bool, MountError> {
        let state = locked(&self.state);
        Ok(state.dirs.contains(path) || state.mounted.contains(path))
    }

    async fn fs_usage(&self, _path: &Path) -> Result<FsUsage, MountError> {
        Ok(locked(&self.state).usage)
    }
}
