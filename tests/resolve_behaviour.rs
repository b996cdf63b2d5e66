//! Parameter resolution observed through the controller's responses.

use std::collections::HashMap;
use std::sync::Arc;

use vpcfile_csi::controller::{CONTEXT_IOPS, CONTEXT_TAGS, CONTEXT_ZONE};
use vpcfile_csi::rpc::RpcErrorCode;
use vpcfile_csi::test_support::FakeSession;
use vpcfile_csi::types::{
    AccessMode, CapacityRange, CreateVolumeRequest, Topology, VolumeCapability,
};
use vpcfile_csi::{
    AccessPointStatus, ControllerService, DriverConfig, FileShareSession, GIB, ShareStatus,
    SubnetRegistry,
};

fn driver_config() -> DriverConfig {
    DriverConfig {
        cluster_id: String::from("cluster-1"),
        default_resource_group: Some(String::from("rg-default")),
        vpc_id: Some(String::from("vpc-1")),
        subnet_ids: Some(String::from("sub-seeded")),
        retry_attempts: 4,
        retry_initial_gap_secs: 0,
        retry_gap_ceiling_secs: 0,
    }
}

fn controller(session: &Arc<FakeSession>) -> ControllerService {
    match ControllerService::new(
        Arc::clone(session) as Arc<dyn FileShareSession>,
        driver_config(),
        Arc::new(SubnetRegistry::new(vec![String::from("sub-seeded")])),
    ) {
        Ok(service) => service,
        Err(err) => panic!("controller construction failed: {err}"),
    }
}

fn ready_session() -> Arc<FakeSession> {
    let session = Arc::new(FakeSession::new());
    session.script_share_statuses(&[ShareStatus::Stable]);
    session.script_access_point_statuses(&[AccessPointStatus::Stable]);
    session
}

fn request_with(parameters: &[(&str, &str)]) -> CreateVolumeRequest {
    CreateVolumeRequest {
        name: String::from("pvc-resolve"),
        capacity_range: None,
        volume_capabilities: vec![VolumeCapability {
            access_mode: AccessMode::ReadWriteMany,
            mount_flags: Vec::new(),
        }],
        parameters: parameters
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect(),
        secrets: HashMap::new(),
        accessibility_requirements: Vec::new(),
    }
}

#[tokio::test]
async fn requested_capacity_rounds_up_to_whole_gib() {
    let session = ready_session();
    let controller = controller(&session);
    let mut request = request_with(&[("zone", "z1"), ("region", "r1")]);
    request.capacity_range = Some(CapacityRange {
        required_bytes: 20 * GIB + 1,
        limit_bytes: 0,
    });

    let volume = match controller.create_volume(&request).await {
        Ok(volume) => volume,
        Err(err) => panic!("create failed: {err}"),
    };
    assert_eq!(volume.capacity_bytes, 21 * GIB);
}

#[tokio::test]
async fn tags_and_iops_flow_into_the_volume_context() {
    let session = ready_session();
    let controller = controller(&session);
    let request = request_with(&[
        ("zone", "z1"),
        ("region", "r1"),
        ("profile", "dp2"),
        ("iops", "1000"),
        ("tags", "team:storage,env:dev"),
    ]);

    let volume = match controller.create_volume(&request).await {
        Ok(volume) => volume,
        Err(err) => panic!("create failed: {err}"),
    };
    assert_eq!(
        volume.volume_context.get(CONTEXT_IOPS),
        Some(&String::from("1000"))
    );
    assert_eq!(
        volume.volume_context.get(CONTEXT_TAGS),
        Some(&String::from("team:storage,env:dev"))
    );
}

#[tokio::test]
async fn vpc_access_control_mode_adds_the_zone_label() {
    let session = ready_session();
    let controller = controller(&session);
    let request = request_with(&[("zone", "z1"), ("region", "r1"), ("isENIEnabled", "false")]);

    let volume = match controller.create_volume(&request).await {
        Ok(volume) => volume,
        Err(err) => panic!("create failed: {err}"),
    };
    assert_eq!(
        volume.volume_context.get(CONTEXT_ZONE),
        Some(&String::from("z1"))
    );
}

#[tokio::test]
async fn placement_falls_back_to_preferred_topology() {
    let session = ready_session();
    let controller = controller(&session);
    let mut request = request_with(&[]);
    request.accessibility_requirements = vec![Topology::zone_region("us-south-2", "us-south")];

    let volume = match controller.create_volume(&request).await {
        Ok(volume) => volume,
        Err(err) => panic!("create failed: {err}"),
    };
    let shares = session.shares();
    assert_eq!(shares.len(), 1);
    assert_eq!(
        shares.first().map(|share| share.zone.as_str()),
        Some("us-south-2")
    );
    assert_eq!(volume.accessible_topology.len(), 1);
}

#[tokio::test]
async fn unknown_parameters_never_reach_the_backend() {
    let session = Arc::new(FakeSession::new());
    let controller = controller(&session);
    let request = request_with(&[("zone", "z1"), ("region", "r1"), ("bogus", "x")]);

    let result = controller.create_volume(&request).await;
    let Err(error) = result else {
        panic!("expected an argument error, got {result:?}");
    };
    assert_eq!(error.code, RpcErrorCode::InvalidArgument);
    assert!(error.message.contains("bogus"));
    assert_eq!(session.calls("create_share"), 0);
}
