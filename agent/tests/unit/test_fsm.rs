//! Deployment lifecycle tests

use chrono::Utc;
use tokio_test::{assert_err, assert_ok};

use ansigent::deploy::fsm::{transition, DeploymentEvent, DeploymentStatus};
use ansigent::errors::DeployError;
use ansigent::models::deployment::Deployment;

use crate::common::new_deployment;

fn completed_iff_terminal(deployment: &Deployment) {
    assert_eq!(
        deployment.completed_at.is_some(),
        deployment.status.is_terminal(),
        "completed_at must be set exactly when {:?} is terminal",
        deployment.status
    );
}

#[test]
fn test_fsm_success_flow() {
    let running = assert_ok!(transition(DeploymentStatus::Pending, DeploymentEvent::Start));
    assert_eq!(running, DeploymentStatus::Running);

    let done = assert_ok!(transition(running, DeploymentEvent::Exit(0)));
    assert_eq!(done, DeploymentStatus::Success);
    assert_err!(transition(done, DeploymentEvent::Start));
}

#[test]
fn test_status_round_trips_through_strings() {
    for status in [
        DeploymentStatus::Pending,
        DeploymentStatus::Running,
        DeploymentStatus::Success,
        DeploymentStatus::Failed,
    ] {
        assert_eq!(status.to_string().parse::<DeploymentStatus>().unwrap(), status);
    }
    assert_err!("finished".parse::<DeploymentStatus>());
}

#[test]
fn test_record_lifecycle_keeps_completion_invariant() {
    let mut deployment = Deployment::new(new_deployment(&["web-1"]));
    completed_iff_terminal(&deployment);
    assert!(deployment.exit_code.is_none());

    deployment.start(Utc::now()).unwrap();
    completed_iff_terminal(&deployment);
    assert!(deployment.started_at.is_some());

    deployment.complete(2, "boom".to_string(), Utc::now()).unwrap();
    completed_iff_terminal(&deployment);
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert_eq!(deployment.exit_code, Some(2));
}

#[test]
fn test_record_never_leaves_a_terminal_status() {
    let mut deployment = Deployment::new(new_deployment(&["web-1"]));
    deployment.start(Utc::now()).unwrap();
    deployment.complete(0, "ok".to_string(), Utc::now()).unwrap();
    let snapshot = deployment.clone();

    assert!(matches!(
        deployment.start(Utc::now()),
        Err(DeployError::InvalidTransition(_))
    ));
    assert_err!(deployment.complete(1, "again".to_string(), Utc::now()));
    assert_err!(deployment.abort("late".to_string(), Utc::now()));
    assert_err!(deployment.fail_infrastructure("late".to_string(), Utc::now()));

    assert_eq!(deployment, snapshot);
}

#[test]
fn test_aborted_record_is_terminal_without_exit_code() {
    let mut deployment = Deployment::new(new_deployment(&["web-1"]));
    deployment.start(Utc::now()).unwrap();
    deployment.abort("No playbook".to_string(), Utc::now()).unwrap();

    completed_iff_terminal(&deployment);
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert_eq!(deployment.exit_code, None);
    assert_eq!(deployment.command_output.as_deref(), Some("No playbook"));

    let mut pending = Deployment::new(new_deployment(&["web-1"]));
    assert_err!(pending.abort("early".to_string(), Utc::now()));
    pending
        .fail_infrastructure("worker lost".to_string(), Utc::now())
        .unwrap();
    completed_iff_terminal(&pending);
    assert_eq!(pending.exit_code, None);
}
