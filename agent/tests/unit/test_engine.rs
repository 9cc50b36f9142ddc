//! Execution engine tests against a scripted `ansible-playbook`
#![cfg(unix)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::json;

use ansigent::deploy::engine::Outcome;
use ansigent::deploy::fsm::DeploymentStatus;
use ansigent::errors::DeployError;
use ansigent::models::catalog::Environment;
use ansigent::models::deployment::Deployment;
use ansigent::storage::deployments::DeploymentStore;

use crate::common::{host, leftover_files, template, Fixture, TEMPLATE_ID};

// inventory is $2; prints whether the host's key file exists while running
const KEY_CHECK: &str = r#"
key=$(sed -n 's/.*ansible_ssh_private_key_file="\([^"]*\)".*/\1/p' "$2")
echo "PLAY [all]"
if [ -f "$key" ]; then echo "key present"; fi
echo "ok=1 failed=0"
"#;

fn assert_terminal_shape(deployment: &Deployment) {
    assert!(deployment.status.is_terminal());
    assert!(deployment.completed_at.is_some());
    assert!(deployment.started_at.is_some());
}

#[tokio::test]
async fn test_successful_run_records_output_and_cleans_scratch() {
    let fixture = Fixture::with_script(KEY_CHECK).with_single_host();
    let deployment = fixture.pending(&["web-1"]).await;

    let outcome = fixture.engine.execute(&deployment.id).await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Completed {
            status: DeploymentStatus::Success,
            exit_code: 0
        }
    );

    let record = fixture.store.get(&deployment.id).await.unwrap();
    assert_terminal_shape(&record);
    assert_eq!(record.status, DeploymentStatus::Success);
    assert_eq!(record.exit_code, Some(0));
    assert_eq!(
        record.command_output.as_deref(),
        Some("PLAY [all]\nkey present\nok=1 failed=0\n")
    );

    let input = record.command_input.unwrap();
    assert!(input.starts_with("=== Command ===\n"));
    assert!(input.contains("=== Inventory File ("));
    assert!(input.contains("[all]\nweb-1.example.com ansible_port=22 ansible_user=deploy"));
    assert!(input.contains("=== Playbook File ("));
    assert!(input.contains("- hosts: all\n  tasks: []\n"));
    assert!(!input.contains("secret"));

    assert!(leftover_files(&fixture.scratch_dir(), &deployment.id).is_empty());
}

#[tokio::test]
async fn test_non_zero_exit_is_a_failed_outcome() {
    let fixture = Fixture::with_script("echo 'fatal: unreachable'; exit 4").with_single_host();
    let deployment = fixture.pending(&["web-1"]).await;

    let outcome = fixture.engine.execute(&deployment.id).await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Completed {
            status: DeploymentStatus::Failed,
            exit_code: 4
        }
    );

    let record = fixture.store.get(&deployment.id).await.unwrap();
    assert_terminal_shape(&record);
    assert_eq!(record.exit_code, Some(4));
    assert_eq!(record.command_output.as_deref(), Some("fatal: unreachable\n"));
    assert!(leftover_files(&fixture.scratch_dir(), &deployment.id).is_empty());
}

#[tokio::test]
async fn test_process_killed_mid_stream_keeps_partial_output() {
    let fixture = Fixture::with_script("echo 'TASK [one]'; kill -9 $$; echo never").with_single_host();
    let deployment = fixture.pending(&["web-1"]).await;

    let outcome = fixture.engine.execute(&deployment.id).await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Completed {
            status: DeploymentStatus::Failed,
            exit_code: 137
        }
    );

    let record = fixture.store.get(&deployment.id).await.unwrap();
    assert_terminal_shape(&record);
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert_eq!(record.command_output.as_deref(), Some("TASK [one]\n"));
    assert!(leftover_files(&fixture.scratch_dir(), &deployment.id).is_empty());
}

#[tokio::test]
async fn test_terminal_deployment_is_not_run_again() {
    let tmp = tempfile::tempdir().unwrap();
    let counter = tmp.path().join("runs");
    let fixture = Fixture::with_script(&format!("echo run >> '{}'", counter.display()))
        .with_single_host();
    let deployment = fixture.pending(&["web-1"]).await;

    fixture.engine.execute(&deployment.id).await.unwrap();
    let first = fixture.store.get(&deployment.id).await.unwrap();

    let again = fixture.engine.execute(&deployment.id).await.unwrap();
    assert_eq!(again, Outcome::Skipped(DeploymentStatus::Success));

    assert_eq!(std::fs::read_to_string(&counter).unwrap(), "run\n");
    assert_eq!(fixture.store.get(&deployment.id).await.unwrap(), first);
}

#[tokio::test]
async fn test_missing_playbook_aborts_before_spawn() {
    let tmp = tempfile::tempdir().unwrap();
    let marker = tmp.path().join("spawned");
    let fixture = Fixture::with_script(&format!("touch '{}'", marker.display()));
    fixture.catalog.put_host(host("web-1", true, None));
    fixture.catalog.put_template(template(
        Some(""),
        Some(PathBuf::from("/no/such/playbook.yml")),
    ));
    let deployment = fixture.pending(&["web-1"]).await;

    let err = fixture.engine.execute(&deployment.id).await.unwrap_err();
    assert!(matches!(err, DeployError::NoPlaybook(ref id) if id == TEMPLATE_ID));
    assert!(!marker.exists());

    let record = fixture.store.get(&deployment.id).await.unwrap();
    assert_terminal_shape(&record);
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert_eq!(record.exit_code, None);
    assert!(record
        .command_output
        .unwrap()
        .contains("No playbook content or valid playbook path found"));
    // the inventory was already written
    assert!(leftover_files(&fixture.scratch_dir(), &deployment.id).is_empty());
}

#[tokio::test]
async fn test_no_resolved_hosts_fails_the_deployment() {
    let fixture = Fixture::with_script("exit 0").with_single_host();
    let deployment = fixture.pending(&["retired-host"]).await;

    let err = fixture.engine.execute(&deployment.id).await.unwrap_err();
    assert!(matches!(err, DeployError::NoTargets(_)));

    let record = fixture.store.get(&deployment.id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert!(record.completed_at.is_some());
    assert!(record.command_input.is_none());
}

#[tokio::test]
async fn test_all_targets_render_only_active_hosts() {
    let fixture = Fixture::with_script(r#"grep -c ansible_port "$2""#);
    for (id, active) in [("a", true), ("b", true), ("c", true), ("d", false)] {
        fixture.catalog.put_host(host(id, active, None));
    }
    fixture.catalog.put_template(template(Some("- hosts: all\n"), None));
    let deployment = fixture.pending(&["all"]).await;

    fixture.engine.execute(&deployment.id).await.unwrap();

    let record = fixture.store.get(&deployment.id).await.unwrap();
    assert_eq!(record.command_output.as_deref(), Some("3\n"));
    assert!(!record.command_input.unwrap().contains("d.example.com"));
}

#[tokio::test]
async fn test_template_edits_before_execution_are_used() {
    let fixture = Fixture::with_script(r#"cat "$3""#).with_single_host();
    let deployment = fixture.pending(&["web-1"]).await;

    fixture
        .catalog
        .put_template(template(Some("- hosts: edited\n"), None));
    fixture.engine.execute(&deployment.id).await.unwrap();

    let record = fixture.store.get(&deployment.id).await.unwrap();
    assert_eq!(record.command_output.as_deref(), Some("- hosts: edited\n"));
}

#[tokio::test]
async fn test_extra_vars_and_environment_reach_the_process_intact() {
    let fixture = Fixture::with_script(r#"printf '%s|%s\n' "$DEPLOY_STAGE" "$5""#).with_single_host();

    let mut tpl = template(Some("- hosts: all\n"), None);
    let mut extra = BTreeMap::new();
    extra.insert("cmd".to_string(), json!("\"; rm -rf / #"));
    extra.insert("quote".to_string(), json!("it's $(id)"));
    tpl.extra_vars = Some(extra.clone());
    fixture.catalog.put_template(tpl);

    let mut variables = BTreeMap::new();
    variables.insert("DEPLOY_STAGE".to_string(), "prod; echo pwned".to_string());
    fixture.catalog.put_environment(Environment {
        id: "env-prod".to_string(),
        name: "production".to_string(),
        variables,
        is_active: true,
    });

    let mut inputs = crate::common::new_deployment(&["web-1"]);
    inputs.environment_id = Some("env-prod".to_string());
    let deployment = Deployment::new(inputs);
    fixture.store.insert(&deployment).await.unwrap();

    let outcome = fixture.engine.execute(&deployment.id).await.unwrap();
    assert!(matches!(
        outcome,
        Outcome::Completed {
            status: DeploymentStatus::Success,
            ..
        }
    ));

    let record = fixture.store.get(&deployment.id).await.unwrap();
    let output = record.command_output.unwrap();
    let (stage, vars) = output.trim_end().split_once('|').unwrap();
    assert_eq!(stage, "prod; echo pwned");
    let decoded: BTreeMap<String, serde_json::Value> = serde_json::from_str(vars).unwrap();
    assert_eq!(decoded, extra);

    // environment values are masked in the audit trail
    let input = record.command_input.unwrap();
    assert!(input.contains("DEPLOY_STAGE=***"));
    assert!(!input.contains("pwned"));
}

#[tokio::test]
async fn test_spawn_failure_is_recorded() {
    let tmp = tempfile::tempdir().unwrap();
    let fixture = Fixture::build(
        tmp,
        "ansible-playbook".to_string(),
        "/no/such/shell".to_string(),
    )
    .with_single_host();
    let deployment = fixture.pending(&["web-1"]).await;

    let err = fixture.engine.execute(&deployment.id).await.unwrap_err();
    assert!(matches!(err, DeployError::ProcessSpawn(_)));

    let record = fixture.store.get(&deployment.id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert_eq!(record.exit_code, None);
    assert!(record.command_input.is_some());
    assert!(leftover_files(&fixture.scratch_dir(), &deployment.id).is_empty());
}

#[tokio::test]
async fn test_failure_hook() {
    let fixture = Fixture::with_script("exit 0").with_single_host();
    let deployment = fixture.pending(&["web-1"]).await;

    fixture
        .engine
        .on_failure(&deployment.id, "worker lost")
        .await
        .unwrap();
    let record = fixture.store.get(&deployment.id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert_eq!(record.command_output.as_deref(), Some("worker lost"));
    assert!(record.completed_at.is_some());
    assert_eq!(record.exit_code, None);

    // terminal records are left alone
    fixture
        .engine
        .on_failure(&deployment.id, "second failure")
        .await
        .unwrap();
    let again = fixture.store.get(&deployment.id).await.unwrap();
    assert_eq!(again, record);

    // and never run
    let outcome = fixture.engine.execute(&deployment.id).await.unwrap();
    assert_eq!(outcome, Outcome::Skipped(DeploymentStatus::Failed));
}

#[tokio::test]
async fn test_concurrent_attempts_do_not_share_scratch_files() {
    let fixture = Fixture::with_script(r#"sleep 0.2; cat "$3""#);
    fixture.catalog.put_host(host("web-1", true, None));
    fixture.catalog.put_template(template(Some("- hosts: all\n"), None));

    let a = fixture.pending(&["web-1"]).await;
    let b = fixture.pending(&["web-1"]).await;

    let (ra, rb) = tokio::join!(
        fixture.engine.execute(&a.id),
        fixture.engine.execute(&b.id)
    );
    assert!(matches!(ra.unwrap(), Outcome::Completed { exit_code: 0, .. }));
    assert!(matches!(rb.unwrap(), Outcome::Completed { exit_code: 0, .. }));

    for id in [&a.id, &b.id] {
        let record = fixture.store.get(id).await.unwrap();
        assert_eq!(record.command_output.as_deref(), Some("- hosts: all\n"));
        assert!(record.command_input.unwrap().contains(&format!("inventory_{}.ini", id)));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_output_is_persisted_while_the_process_runs() {
    let tmp = tempfile::tempdir().unwrap();
    let release = tmp.path().join("release");
    let fixture = Fixture::with_script(&format!(
        "echo 'TASK [one]'\nwhile [ ! -f '{}' ]; do sleep 0.05; done\necho 'TASK [two]'",
        release.display()
    ))
    .with_single_host();
    let deployment = fixture.pending(&["web-1"]).await;

    let engine = fixture.engine.clone();
    let id = deployment.id.clone();
    let run = tokio::spawn(async move { engine.execute(&id).await });

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    loop {
        let record = fixture.store.get(&deployment.id).await.unwrap();
        if record.command_output.is_some() {
            assert_eq!(record.status, DeploymentStatus::Running);
            assert_eq!(record.command_output.as_deref(), Some("TASK [one]\n"));
            assert!(record.completed_at.is_none());
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "no output while running");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    std::fs::write(&release, "").unwrap();
    let outcome = run.await.unwrap().unwrap();
    assert!(matches!(outcome, Outcome::Completed { exit_code: 0, .. }));

    let record = fixture.store.get(&deployment.id).await.unwrap();
    assert_eq!(
        record.command_output.as_deref(),
        Some("TASK [one]\nTASK [two]\n")
    );
}

#[tokio::test]
async fn test_host_fields_that_inject_inventory_variables_abort_before_spawn() {
    let tmp = tempfile::tempdir().unwrap();
    let marker = tmp.path().join("spawned");
    let fixture = Fixture::with_script(&format!("touch '{}'", marker.display()));
    let mut bad = host("web-1", true, None);
    bad.username = "deploy ansible_connection=local".to_string();
    fixture.catalog.put_host(bad);
    fixture.catalog.put_template(template(Some("- hosts: all\n"), None));
    let deployment = fixture.pending(&["web-1"]).await;

    let err = fixture.engine.execute(&deployment.id).await.unwrap_err();
    assert!(matches!(err, DeployError::InvalidCommand(_)));
    assert!(!marker.exists());

    let record = fixture.store.get(&deployment.id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert!(record.command_input.is_none());
    assert!(leftover_files(&fixture.scratch_dir(), &deployment.id).is_empty());
}
