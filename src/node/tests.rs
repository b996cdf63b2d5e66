//! Node-service behaviour tests against the in-memory host fake.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::mount::{FsUsage, MountError};
use crate::rpc::RpcErrorCode;
use crate::test_support::FakeMount;
use crate::types::{AccessMode, NodePublishVolumeRequest, VolumeCapability};

use super::*;

struct FakeProvider {
    calls: AtomicU32,
}

impl FakeProvider {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl MetadataProvider for FakeProvider {
    async fn fetch(&self) -> Result<NodeMetadata, MetadataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(NodeMetadata {
            worker_id: String::from("worker-1"),
            zone: String::from("z1"),
            region: String::from("r1"),
        })
    }
}

fn service(host: &Arc<FakeMount>) -> NodeService {
    NodeService::new(
        Arc::clone(host) as Arc<dyn HostMount>,
        Arc::new(FakeProvider::new()),
    )
}

fn publish_request(target: &str) -> NodePublishVolumeRequest {
    NodePublishVolumeRequest {
        volume_id: String::from("share-1:ap-1"),
        target_path: target.to_owned(),
        volume_capability: Some(VolumeCapability {
            access_mode: AccessMode::ReadWriteMany,
            mount_flags: vec![String::from("hard")],
        }),
        volume_context: HashMap::from([(
            CONTEXT_SERVER_PATH.to_owned(),
            String::from("fs.example.net:/export/x"),
        )]),
        readonly: false,
    }
}

#[tokio::test]
async fn publish_mounts_the_share_at_the_target() {
    let host = Arc::new(FakeMount::new());
    let service = service(&host);
    match service.publish_volume(&publish_request("/var/lib/pods/v1")).await {
        Ok(()) => {}
        Err(err) => panic!("publish failed: {err}"),
    }
    assert!(host.has_mount(Path::new("/var/lib/pods/v1")));
    assert_eq!(host.mount_calls(), 1);
}

#[tokio::test]
async fn publishing_an_already_mounted_target_is_a_no_op() {
    let host = Arc::new(FakeMount::new());
    host.add_mount(Path::new("/var/lib/pods/v1"));
    let service = service(&host);
    match service.publish_volume(&publish_request("/var/lib/pods/v1")).await {
        Ok(()) => {}
        Err(err) => panic!("publish failed: {err}"),
    }
    assert_eq!(host.mount_calls(), 0);
}

#[tokio::test]
async fn publish_rejects_a_request_without_capability() {
    let host = Arc::new(FakeMount::new());
    let service = service(&host);
    let mut request = publish_request("/var/lib/pods/v1");
    request.volume_capability = None;
    let result = service.publish_volume(&request).await;
    assert!(matches!(result, Err(error) if error.code == RpcErrorCode::InvalidArgument));
}

#[tokio::test]
async fn publish_rejects_a_request_without_server_path() {
    let host = Arc::new(FakeMount::new());
    let service = service(&host);
    let mut request = publish_request("/var/lib/pods/v1");
    request.volume_context.clear();
    let result = service.publish_volume(&request).await;
    assert!(matches!(result, Err(error) if error.code == RpcErrorCode::InvalidArgument));
}

#[tokio::test]
async fn publish_rejects_a_malformed_volume_id() {
    let host = Arc::new(FakeMount::new());
    let service = service(&host);
    let mut request = publish_request("/var/lib/pods/v1");
    request.volume_id = String::from("no-separator");
    let result = service.publish_volume(&request).await;
    assert!(matches!(result, Err(error) if error.code == RpcErrorCode::InvalidArgument));
}

#[tokio::test]
async fn a_failed_mount_removes_the_created_directory() {
    let host = Arc::new(FakeMount::new());
    host.fail_next_mount(MountError::Operation {
        operation: String::from("mount"),
        path: String::from("/var/lib/pods/v1"),
        message: String::from("connection refused"),
    });
    let service = service(&host);
    let result = service.publish_volume(&publish_request("/var/lib/pods/v1")).await;
    assert!(matches!(result, Err(error) if error.code == RpcErrorCode::Internal));
    assert!(!host.has_dir(Path::new("/var/lib/pods/v1")));
}

#[tokio::test]
async fn a_half_completed_mount_is_unmounted_before_rollback() {
    let host = Arc::new(FakeMount::new());
    host.set_mount_leaves_mount_on_failure();
    host.fail_next_mount(MountError::Operation {
        operation: String::from("mount"),
        path: String::from("/var/lib/pods/v1"),
        message: String::from("timed out"),
    });
    let service = service(&host);
    let result = service.publish_volume(&publish_request("/var/lib/pods/v1")).await;
    assert!(matches!(result, Err(error) if error.code == RpcErrorCode::Internal));
    assert_eq!(host.unmount_calls(), 1);
    assert!(!host.has_mount(Path::new("/var/lib/pods/v1")));
    assert!(!host.has_dir(Path::new("/var/lib/pods/v1")));
}

#[tokio::test]
async fn a_mount_that_survives_unmount_is_reported_stuck() {
    let host = Arc::new(FakeMount::new());
    host.set_mount_leaves_mount_on_failure();
    host.set_stuck_after_unmount();
    host.fail_next_mount(MountError::Operation {
        operation: String::from("mount"),
        path: String::from("/var/lib/pods/v1"),
        message: String::from("timed out"),
    });
    let service = service(&host);
    let result = service.publish_volume(&publish_request("/var/lib/pods/v1")).await;
    let Err(error) = result else {
        panic!("expected stuck-mount error");
    };
    assert_eq!(error.code, RpcErrorCode::Internal);
    assert!(error.message.contains("stuck"));
}

#[tokio::test]
async fn unpublish_unmounts_and_removes_the_target() {
    let host = Arc::new(FakeMount::new());
    host.add_mount(Path::new("/var/lib/pods/v1"));
    let service = service(&host);
    match service.unpublish_volume("share-1:ap-1", "/var/lib/pods/v1").await {
        Ok(()) => {}
        Err(err) => panic!("unpublish failed: {err}"),
    }
    assert!(!host.has_mount(Path::new("/var/lib/pods/v1")));
    assert!(!host.has_dir(Path::new("/var/lib/pods/v1")));
}

#[tokio::test]
async fn unpublishing_an_absent_target_is_success() {
    let host = Arc::new(FakeMount::new());
    let service = service(&host);
    match service.unpublish_volume("share-1:ap-1", "/var/lib/pods/gone").await {
        Ok(()) => {}
        Err(err) => panic!("unpublish failed: {err}"),
    }
    assert_eq!(host.unmount_calls(), 0);
}

#[tokio::test]
async fn node_info_caches_the_metadata_lookup() {
    let host = Arc::new(FakeMount::new());
    let provider = Arc::new(FakeProvider::new());
    let service = NodeService::new(
        Arc::clone(&host) as Arc<dyn HostMount>,
        Arc::clone(&provider) as Arc<dyn MetadataProvider>,
    );

    let first = match service.node_info().await {
        Ok(info) => info,
        Err(err) => panic!("node info failed: {err}"),
    };
    let second = match service.node_info().await {
        Ok(info) => info,
        Err(err) => panic!("node info failed: {err}"),
    };
    assert_eq!(first, second);
    assert_eq!(first.node_id, "worker-1");
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert!(first.max_volumes_per_node == LOW_VOLUME_CAP
        || first.max_volumes_per_node == HIGH_VOLUME_CAP);
}

#[test]
fn volume_cap_depends_on_the_core_threshold() {
    assert_eq!(volume_cap(1), LOW_VOLUME_CAP);
    assert_eq!(volume_cap(3), LOW_VOLUME_CAP);
    assert_eq!(volume_cap(4), HIGH_VOLUME_CAP);
    assert_eq!(volume_cap(64), HIGH_VOLUME_CAP);
}

#[tokio::test]
async fn volume_stats_distinguishes_a_missing_path() {
    let host = Arc::new(FakeMount::new());
    let service = service(&host);
    let result = service.volume_stats("share-1:ap-1", "/var/lib/pods/gone").await;
    assert!(matches!(result, Err(error) if error.code == RpcErrorCode::NotFound));
}

#[tokio::test]
async fn volume_stats_reports_byte_and_inode_usage() {
    let host = Arc::new(FakeMount::new());
    host.add_mount(Path::new("/var/lib/pods/v1"));
    host.set_usage(FsUsage {
        total_bytes: 100,
        used_bytes: 40,
        available_bytes: 60,
        total_inodes: 10,
        used_inodes: 4,
        available_inodes: 6,
    });
    let service = service(&host);
    let usage = match service.volume_stats("share-1:ap-1", "/var/lib/pods/v1").await {
        Ok(usage) => usage,
        Err(err) => panic!("stats failed: {err}"),
    };
    assert_eq!(usage.total_bytes, 100);
    assert_eq!(usage.available_inodes, 6);
}
