mod common;

use common::{TestWorld, CLUSTER, PVM_CLUSTER};
use gwm_core::{
    audit::{AuditAction, AuditResource},
    config::GwmConfig,
    dry_run::RefreshBehavior,
    error::GwmError,
    jobs::{Dispatch, JobOperation},
    types::{MigrationMode, NodeRole},
    validation::{
        messages, EvacuateInput, EvacuationTarget, Field, MigrateInput, NodeOperationRequest,
        RoleChangeInput,
    },
};
use pretty_assertions::assert_eq;
use std::time::Duration;

const NODE: &str = "node2.example.com";

fn role(value: &str) -> RoleChangeInput {
    RoleChangeInput {
        role: Some(value.into()),
        force: false,
    }
}

#[tokio::test]
async fn test_role_change_requires_admin() {
    let world = TestWorld::new();
    let migrator = world.user("migrator").await;
    let coordinator = world.node_coordinator(&GwmConfig::default());

    let result = coordinator
        .change_role(&migrator, CLUSTER, NODE, &role("drained"))
        .await;

    assert!(matches!(result, Err(GwmError::AuthorizationError { .. })));
    assert!(world.jobs.submitted().await.is_empty());
    assert!(world.audit.events().await.is_empty());
}

#[tokio::test]
async fn test_role_change_by_migrator_when_relaxed() {
    let world = TestWorld::new();
    let migrator = world.user("migrator").await;
    let config = GwmConfig::builder()
        .role_change_requires_admin(false)
        .build()
        .unwrap();
    let coordinator = world.node_coordinator(&config);

    let dispatch = coordinator
        .change_role(&migrator, CLUSTER, NODE, &role("offline"))
        .await
        .unwrap();
    assert!(dispatch.is_submitted());
}

#[tokio::test]
async fn test_unauthorized_input_is_never_validated() {
    let world = TestWorld::new();
    let mallory = world.user("mallory").await;
    let coordinator = world.node_coordinator(&GwmConfig::default());

    // Invalid input still yields the authorization failure
    let result = coordinator
        .change_role(&mallory, CLUSTER, NODE, &role("master"))
        .await;
    assert!(matches!(result, Err(GwmError::AuthorizationError { .. })));

    let result = coordinator
        .evacuate(&mallory, CLUSTER, NODE, &EvacuateInput::default())
        .await;
    assert!(matches!(result, Err(GwmError::AuthorizationError { .. })));
}

#[tokio::test]
async fn test_role_change_submits_one_job() {
    let world = TestWorld::new();
    let admin = world.user("clusteradmin").await;
    let coordinator = world.node_coordinator(&GwmConfig::default());

    let input = RoleChangeInput {
        role: Some("drained".into()),
        force: true,
    };
    let dispatch = coordinator
        .change_role(&admin, CLUSTER, NODE, &input)
        .await
        .unwrap();

    match dispatch {
        Dispatch::Submitted { cleaned, outcome } => {
            assert_eq!(
                cleaned,
                Some(NodeOperationRequest::RoleChange {
                    new_role: NodeRole::Drained,
                    force: true,
                })
            );
            assert!(outcome.status_known());
        }
        Dispatch::Rejected(result) => panic!("rejected: {}", result.errors),
    }

    assert_eq!(
        world.jobs.submitted().await,
        vec![JobOperation::SetNodeRole {
            cluster: CLUSTER,
            node: NODE.into(),
            role: NodeRole::Drained,
            force: true,
        }]
    );

    let events = world.audit.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, AuditAction::NodeRoleChange);
    assert_eq!(
        events[0].resource,
        AuditResource::Node {
            cluster: CLUSTER,
            hostname: NODE.into(),
        }
    );
}

#[tokio::test]
async fn test_role_choices() {
    let world = TestWorld::new();
    let admin = world.user("clusteradmin").await;
    let coordinator = world.node_coordinator(&GwmConfig::default());

    let form = coordinator
        .role_form_initial(&admin, CLUSTER, "node1.example.com")
        .await
        .unwrap();
    assert_eq!(form.current, NodeRole::Master);
    assert!(!form.choices.contains(&NodeRole::Master));

    let test_cases = vec![
        ("master", messages::not_a_choice("master")),
        ("leader", messages::not_a_choice("leader")),
        ("", messages::REQUIRED.to_string()),
    ];
    for (value, expected) in test_cases {
        let dispatch = coordinator
            .change_role(&admin, CLUSTER, NODE, &role(value))
            .await
            .unwrap();
        assert_eq!(
            dispatch.errors().unwrap().messages(Field::Role),
            vec![expected.as_str()],
            "{:?}",
            value
        );
    }
    assert!(world.jobs.submitted().await.is_empty());
}

#[tokio::test]
async fn test_node_migrate() {
    let world = TestWorld::new();
    let migrator = world.user("migrator").await;
    let coordinator = world.node_coordinator(&GwmConfig::default());

    let input = MigrateInput {
        mode: Some("non-live".into()),
        cleanup: true,
    };
    let dispatch = coordinator
        .migrate(&migrator, CLUSTER, NODE, &input)
        .await
        .unwrap();
    assert!(dispatch.is_submitted());
    assert_eq!(
        world.jobs.submitted().await,
        vec![JobOperation::MigrateNode {
            cluster: CLUSTER,
            node: NODE.into(),
            mode: MigrationMode::NonLive,
            cleanup: true,
        }]
    );
    assert_eq!(world.audit.actions().await, vec![AuditAction::NodeMigrate]);

    let dispatch = coordinator
        .migrate(&migrator, CLUSTER, NODE, &MigrateInput::default())
        .await
        .unwrap();
    assert_eq!(
        dispatch.errors().unwrap().messages(Field::Mode),
        vec![messages::REQUIRED]
    );
}

#[tokio::test]
async fn test_evacuate_needs_exactly_one_target() {
    let world = TestWorld::new();
    let admin = world.user("clusteradmin").await;
    let coordinator = world.node_coordinator(&GwmConfig::default());

    let test_cases = vec![
        (
            EvacuateInput {
                iallocator: true,
                iallocator_hostname: Some("hail".into()),
                node: Some("node3.example.com".into()),
            },
            messages::EVACUATE_BOTH,
        ),
        (EvacuateInput::default(), messages::EVACUATE_NEITHER),
    ];
    for (input, expected) in test_cases {
        let dispatch = coordinator
            .evacuate(&admin, CLUSTER, NODE, &input)
            .await
            .unwrap();
        let errors = dispatch.errors().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.messages(Field::NonField), vec![expected]);
    }
    assert!(world.jobs.submitted().await.is_empty());
}

#[tokio::test]
async fn test_evacuate_targets() {
    let world = TestWorld::new();
    let admin = world.user("clusteradmin").await;
    let coordinator = world.node_coordinator(&GwmConfig::default());

    let automatic = EvacuateInput {
        iallocator: true,
        ..Default::default()
    };
    let dispatch = coordinator
        .evacuate(&admin, CLUSTER, NODE, &automatic)
        .await
        .unwrap();
    assert_eq!(
        dispatch.outcome().and_then(|o| o.info.clone()).unwrap().summary,
        vec!["Evacuate node node2.example.com using allocator hail"]
    );

    let explicit = EvacuateInput {
        node: Some("node3.example.com".into()),
        ..Default::default()
    };
    let dispatch = coordinator
        .evacuate(&admin, CLUSTER, NODE, &explicit)
        .await
        .unwrap();
    assert!(dispatch.is_submitted());

    let to_self = EvacuateInput {
        node: Some(NODE.into()),
        ..Default::default()
    };
    let dispatch = coordinator
        .evacuate(&admin, CLUSTER, NODE, &to_self)
        .await
        .unwrap();
    assert_eq!(
        dispatch.errors().unwrap().messages(Field::Node),
        vec![messages::not_a_choice(NODE)]
    );

    let targets: Vec<EvacuationTarget> = world
        .jobs
        .submitted()
        .await
        .into_iter()
        .filter_map(|op| match op {
            JobOperation::EvacuateNode { target, .. } => Some(target),
            _ => None,
        })
        .collect();
    assert_eq!(
        targets,
        vec![
            EvacuationTarget::AutoAllocate("hail".into()),
            EvacuationTarget::ExplicitNode("node3.example.com".into()),
        ]
    );
}

#[tokio::test]
async fn test_evacuate_without_allocator() {
    let world = TestWorld::new();
    let root = world.user("root").await;
    let coordinator = world.node_coordinator(&GwmConfig::default());

    let form = coordinator
        .evacuate_form(&root, PVM_CLUSTER, "xen2.example.com")
        .await
        .unwrap();
    assert!(!form.iallocator);
    assert_eq!(form.node_choices, vec!["xen1.example.com".to_string()]);

    let input = EvacuateInput {
        iallocator: true,
        ..Default::default()
    };
    let dispatch = coordinator
        .evacuate(&root, PVM_CLUSTER, "xen2.example.com", &input)
        .await
        .unwrap();
    assert_eq!(
        dispatch.errors().unwrap().messages(Field::Iallocator),
        vec![messages::NO_IALLOCATOR]
    );
}

#[tokio::test]
async fn test_unknown_node() {
    let world = TestWorld::new();
    let admin = world.user("clusteradmin").await;
    let coordinator = world.node_coordinator(&GwmConfig::default());

    let result = coordinator
        .change_role(&admin, CLUSTER, "node9.example.com", &role("drained"))
        .await;
    assert!(matches!(result, Err(GwmError::NotFound { .. })));
}

#[tokio::test]
async fn test_refresh_failure_after_submit() {
    let world = TestWorld::with_jobs(RefreshBehavior::FailRefresh);
    let admin = world.user("clusteradmin").await;
    let config = GwmConfig::builder()
        .refresh_timeout(Duration::from_secs(1))
        .build()
        .unwrap();
    let coordinator = world.node_coordinator(&config);

    let result = coordinator
        .change_role(&admin, CLUSTER, NODE, &role("drained"))
        .await;
    assert!(matches!(result, Err(GwmError::Transport { .. })));
    // Already accepted by the cluster, nothing to roll back
    assert_eq!(world.jobs.submitted().await.len(), 1);
    assert!(world.audit.events().await.is_empty());
}
