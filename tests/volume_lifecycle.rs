//! End-to-end volume lifecycle: provision through the controller, publish
//! and unpublish through the node service, then tear down.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use vpcfile_csi::controller::CONTEXT_SERVER_PATH;
use vpcfile_csi::node::{MetadataError, MetadataProvider, NodeMetadata};
use vpcfile_csi::test_support::{FakeMount, FakeSession};
use vpcfile_csi::types::{AccessMode, CreateVolumeRequest, NodePublishVolumeRequest, VolumeCapability};
use vpcfile_csi::{
    AccessPointStatus, ControllerService, DriverConfig, FileShareSession, HostMount, NodeService,
    ShareStatus, SubnetRegistry,
};

struct StaticMetadata;

#[async_trait]
impl MetadataProvider for StaticMetadata {
    async fn fetch(&self) -> Result<NodeMetadata, MetadataError> {
        Ok(NodeMetadata {
            worker_id: String::from("worker-1"),
            zone: String::from("us-south-1"),
            region: String::from("us-south"),
        })
    }
}

fn driver_config() -> DriverConfig {
    DriverConfig {
        cluster_id: String::from("cluster-1"),
        default_resource_group: Some(String::from("rg-default")),
        vpc_id: Some(String::from("vpc-1")),
        subnet_ids: None,
        retry_attempts: 4,
        retry_initial_gap_secs: 0,
        retry_gap_ceiling_secs: 0,
    }
}

fn controller(session: &Arc<FakeSession>) -> ControllerService {
    match ControllerService::new(
        Arc::clone(session) as Arc<dyn FileShareSession>,
        driver_config(),
        Arc::new(SubnetRegistry::new(Vec::new())),
    ) {
        Ok(service) => service,
        Err(err) => panic!("controller construction failed: {err}"),
    }
}

fn create_request() -> CreateVolumeRequest {
    CreateVolumeRequest {
        name: String::from("pvc-lifecycle"),
        capacity_range: None,
        volume_capabilities: vec![VolumeCapability {
            access_mode: AccessMode::ReadWriteMany,
            mount_flags: Vec::new(),
        }],
        parameters: HashMap::from([
            (String::from("zone"), String::from("us-south-1")),
            (String::from("region"), String::from("us-south")),
        ]),
        secrets: HashMap::new(),
        accessibility_requirements: Vec::new(),
    }
}

#[tokio::test]
async fn provision_publish_unpublish_and_delete() {
    let session = Arc::new(FakeSession::new());
    session.script_share_statuses(&[ShareStatus::Pending, ShareStatus::Stable]);
    session.script_access_point_statuses(&[AccessPointStatus::Pending, AccessPointStatus::Stable]);
    let controller = controller(&session);

    let volume = match controller.create_volume(&create_request()).await {
        Ok(volume) => volume,
        Err(err) => panic!("create failed: {err}"),
    };
    let server_path = match volume.volume_context.get(CONTEXT_SERVER_PATH) {
        Some(path) => path.clone(),
        None => panic!("volume context lacks the server path"),
    };

    let host = Arc::new(FakeMount::new());
    let node = NodeService::new(Arc::clone(&host) as Arc<dyn HostMount>, Arc::new(StaticMetadata));
    let publish = NodePublishVolumeRequest {
        volume_id: volume.volume_id.clone(),
        target_path: String::from("/var/lib/pods/pvc-lifecycle"),
        volume_capability: Some(VolumeCapability {
            access_mode: AccessMode::ReadWriteMany,
            mount_flags: Vec::new(),
        }),
        volume_context: HashMap::from([(CONTEXT_SERVER_PATH.to_owned(), server_path)]),
        readonly: false,
    };
    match node.publish_volume(&publish).await {
        Ok(()) => {}
        Err(err) => panic!("publish failed: {err}"),
    }
    assert!(host.has_mount(Path::new("/var/lib/pods/pvc-lifecycle")));

    match node
        .unpublish_volume(&volume.volume_id, "/var/lib/pods/pvc-lifecycle")
        .await
    {
        Ok(()) => {}
        Err(err) => panic!("unpublish failed: {err}"),
    }
    assert!(!host.has_mount(Path::new("/var/lib/pods/pvc-lifecycle")));

    match controller.delete_volume(&volume.volume_id).await {
        Ok(()) => {}
        Err(err) => panic!("delete failed: {err}"),
    }
    assert!(session.shares().is_empty());
}

#[tokio::test]
async fn repeating_every_step_is_idempotent() {
    let session = Arc::new(FakeSession::new());
    session.script_share_statuses(&[ShareStatus::Stable]);
    session.script_access_point_statuses(&[AccessPointStatus::Stable]);
    let controller = controller(&session);

    let first = match controller.create_volume(&create_request()).await {
        Ok(volume) => volume,
        Err(err) => panic!("create failed: {err}"),
    };
    let second = match controller.create_volume(&create_request()).await {
        Ok(volume) => volume,
        Err(err) => panic!("repeat create failed: {err}"),
    };
    assert_eq!(first.volume_id, second.volume_id);
    assert_eq!(session.calls("create_share"), 1);
    assert_eq!(session.calls("create_access_point"), 1);

    match controller.delete_volume(&first.volume_id).await {
        Ok(()) => {}
        Err(err) => panic!("delete failed: {err}"),
    }
    // Deleting what is already gone must also succeed.
    match controller.delete_volume(&first.volume_id).await {
        Ok(()) => {}
        Err(err) => panic!("repeat delete failed: {err}"),
    }
    assert_eq!(session.calls("delete_share"), 1);
}
