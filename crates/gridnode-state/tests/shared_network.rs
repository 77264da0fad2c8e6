//! A container in one deployment using a network owned by another deployment of the same twin.

use gridnode_state::StateStore;
use gridnode_types::zos::{self, CONTAINER_TYPE, NETWORK_TYPE};
use gridnode_types::{Deployment, ResultState, Workload, WorkloadId, WorkloadResult};
use serde_json::json;

fn network_deployment() -> Deployment {
    let mut net = Workload::new(
        "shared_net",
        NETWORK_TYPE,
        json!({
            "ip_range": "10.7.0.0/16",
            "subnet": "10.7.3.0/24",
            "wireguard_private_key": "secret",
            "wireguard_listen_port": 3011,
        }),
    );
    net.result = WorkloadResult {
        created: 100,
        state: ResultState::Ok,
        ..Default::default()
    };
    Deployment {
        twin_id: 4,
        contract_id: 40,
        workloads: vec![net],
        ..Default::default()
    }
}

fn container_deployment() -> Deployment {
    Deployment {
        twin_id: 4,
        contract_id: 41,
        workloads: vec![Workload::new(
            "app",
            CONTAINER_TYPE,
            json!({
                "flist": "https://hub.grid.tf/app.flist",
                "network": { "network": "shared_net" },
                "capacity": { "cpu": 1, "memory": 268435456 },
            }),
        )],
        ..Default::default()
    }
}

#[test]
fn container_resolves_network_from_sibling_deployment() {
    let registry = zos::default_registry();
    let store = StateStore::open_in_memory(registry.clone()).unwrap();
    store.create(&network_deployment()).unwrap();

    let containers = container_deployment();
    // On its own the deployment does not see the network.
    assert!(containers.valid(&registry).is_err());
    containers
        .valid_with(&registry, &store.scope(&containers))
        .unwrap();
}

#[test]
fn network_must_be_ready_across_deployments() {
    let registry = zos::default_registry();
    let store = StateStore::open_in_memory(registry.clone()).unwrap();
    store.create(&network_deployment()).unwrap();

    let id = WorkloadId::new(4, 40, "shared_net").unwrap();
    store
        .set_workload_result(
            &id,
            WorkloadResult {
                created: 101,
                state: ResultState::Error,
                error: "wireguard failed".into(),
                ..Default::default()
            },
        )
        .unwrap();

    let containers = container_deployment();
    let err = containers
        .valid_with(&registry, &store.scope(&containers))
        .unwrap_err();
    assert!(err.to_string().contains("not ready"), "{err}");
}
