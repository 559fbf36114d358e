use netwarden::executor::CommandExecutor;
use netwarden::registry::DeviceRegistry;
use netwarden::request::CommandRequest;
use netwarden::result::{ExecutionStatus, LineOutcome};
use netwarden::safety::{ACCESS_PATH_RULE, EMPTY_CHANGE_SET_RULE, MANAGEMENT_INTERFACE_RULE};
use netwarden::session::{ScriptedProvider, SessionManager, SessionTimeouts};
use std::sync::Arc;
use std::time::Duration;

const REGISTRY: &str = include_str!("fixtures/lab_registry.json");
const SCRIPTS: &str = include_str!("fixtures/lab_scripts.json");

fn lab() -> (CommandExecutor<ScriptedProvider>, Arc<ScriptedProvider>) {
    lab_with(SessionTimeouts::default(), false)
}

fn lab_with(
    timeouts: SessionTimeouts,
    pooled: bool,
) -> (CommandExecutor<ScriptedProvider>, Arc<ScriptedProvider>) {
    let registry = DeviceRegistry::from_json_str(REGISTRY).expect("load registry");
    let provider = Arc::new(ScriptedProvider::from_json_str(SCRIPTS).expect("load scripts"));
    let mut sessions = SessionManager::new(Arc::clone(&provider)).with_timeouts(timeouts);
    if pooled {
        sessions = sessions.pooled();
    }
    (CommandExecutor::new(Arc::new(registry), sessions), provider)
}

fn lines(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn unknown_device_is_reported_without_any_session() {
    let (executor, provider) = lab();

    let read = executor.execute_read("core9", "show version").await;
    assert_eq!(read.status, ExecutionStatus::DeviceNotFound);
    assert!(read.detail.as_deref().unwrap_or("").contains("core9"));

    let config = executor
        .execute_config("core9", &lines(&["hostname core9"]))
        .await;
    assert_eq!(config.status, ExecutionStatus::DeviceNotFound);

    assert_eq!(provider.stats().open_attempts, 0);
}

#[tokio::test]
async fn read_returns_device_output() {
    let (executor, provider) = lab();

    let result = executor
        .execute_read("router", "show ip interface brief")
        .await;

    assert_eq!(result.status, ExecutionStatus::Success, "{}", result.summary());
    assert!(result.output.contains("GigabitEthernet0/0     172.16.1.189"));
    let stats = provider.stats();
    assert_eq!(
        stats.commands,
        vec![(
            "172.16.1.189".to_string(),
            "show ip interface brief".to_string()
        )]
    );
    assert_eq!(stats.opened, 1);
    assert_eq!(stats.closed, 1);
}

#[tokio::test]
async fn device_names_are_case_insensitive() {
    let (executor, _) = lab();
    let result = executor.execute_read("ROUTER", "show clock").await;
    assert!(result.is_success());
}

#[tokio::test]
async fn management_shutdown_is_rejected_before_connecting() {
    let (executor, provider) = lab();

    let result = executor
        .execute_config(
            "router",
            &lines(&["interface GigabitEthernet0/0", "shutdown"]),
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::PolicyRejected);
    assert_eq!(result.matched_rule.as_deref(), Some(MANAGEMENT_INTERFACE_RULE));
    assert!(result.output.is_empty());
    assert!(
        result
            .detail
            .as_deref()
            .unwrap_or("")
            .contains("nothing was sent")
    );
    assert_eq!(provider.stats().open_attempts, 0);
}

#[tokio::test]
async fn access_path_removal_is_rejected_before_connecting() {
    let (executor, provider) = lab();

    let result = executor
        .execute_config("switch1", &lines(&["line vty 0 15", "transport input telnet"]))
        .await;

    assert_eq!(result.status, ExecutionStatus::PolicyRejected);
    assert_eq!(result.matched_rule.as_deref(), Some(ACCESS_PATH_RULE));
    assert_eq!(provider.stats().open_attempts, 0);
}

#[tokio::test]
async fn empty_change_set_is_rejected_before_connecting() {
    let (executor, provider) = lab();

    let result = executor.execute_config("router", &[]).await;
    assert_eq!(result.status, ExecutionStatus::PolicyRejected);
    assert_eq!(result.matched_rule.as_deref(), Some(EMPTY_CHANGE_SET_RULE));
    assert_eq!(provider.stats().open_attempts, 0);
}

#[tokio::test]
async fn dry_run_matches_execution_and_is_repeatable() {
    let (executor, provider) = lab();
    let change = lines(&["interface Gi0/0", "shutdown"]);

    let first = executor.validate("router", &change).expect("known device");
    let second = executor.validate("router", &change).expect("known device");
    assert_eq!(first, second);
    assert!(!first.allowed);
    assert!(executor.validate("nope", &change).is_none());
    assert_eq!(provider.stats().open_attempts, 0);
}

#[tokio::test]
async fn auth_failure_carries_no_output() {
    let (executor, provider) = lab();

    let result = executor.execute_read("switch2", "show version").await;

    assert_eq!(result.status, ExecutionStatus::AuthFailed);
    assert!(result.output.is_empty());
    assert!(
        result
            .detail
            .as_deref()
            .unwrap_or("")
            .contains("password authentication failed")
    );
    assert!(!result.is_retryable());
    assert_eq!(provider.stats().closed, 0);
}

#[tokio::test]
async fn unreachable_device_is_connect_failed_and_retryable() {
    let (executor, _) = lab();

    let result = executor.execute_read("offline", "show clock").await;
    assert_eq!(result.status, ExecutionStatus::ConnectFailed);
    assert!(result.is_retryable());
}

#[tokio::test]
async fn partial_configuration_lists_every_line() {
    let (executor, provider) = lab();

    let result = executor
        .execute_config(
            "router",
            &lines(&["interface Loopback1", "ip address 10.1.1.1", "no shutdown"]),
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::PartialFailure, "{}", result.summary());
    assert_eq!(result.lines.len(), 3);
    assert_eq!(result.lines[0].outcome, LineOutcome::Applied);
    assert_eq!(
        result.lines[1].outcome,
        LineOutcome::Failed {
            message: "% Incomplete command.".to_string()
        }
    );
    assert_eq!(result.lines[2].outcome, LineOutcome::NotAttempted);
    assert_eq!(provider.stats().config_sets.len(), 1);
    assert_eq!(provider.stats().closed, 1);
}

#[tokio::test]
async fn first_line_rejection_applies_nothing() {
    let (executor, _) = lab();

    let result = executor
        .execute_config("router", &lines(&["router bgp", "neighbor 10.0.0.2 remote-as 65001"]))
        .await;

    assert_eq!(result.status, ExecutionStatus::TransportError);
    assert_eq!(result.applied_lines().count(), 0);
    assert_eq!(result.lines[1].outcome, LineOutcome::NotAttempted);
}

#[tokio::test]
async fn full_configuration_succeeds() {
    let (executor, _) = lab();

    let result = executor
        .execute_config(
            "router",
            &lines(&["interface Loopback1", "description lab", "no shutdown"]),
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.applied_lines().count(), 3);
}

#[tokio::test]
async fn rejected_read_keeps_device_output() {
    let (executor, _) = lab();

    let result = executor.execute_read("router", "show ip bgp summry").await;

    assert_eq!(result.status, ExecutionStatus::TransportError);
    assert!(result.output.contains("% Invalid input detected"));
}

#[tokio::test]
async fn lost_transport_mid_configuration_is_partial() {
    let (executor, _) = lab();

    let result = executor
        .execute_config(
            "flaky",
            &lines(&["hostname flaky", "ntp server 10.0.0.9", "ntp server 10.0.0.10"]),
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::PartialFailure);
    assert!(matches!(
        result.lines[1].outcome,
        LineOutcome::Failed { ref message } if message.contains("disconnect")
    ));
}

#[tokio::test]
async fn connect_deadline_is_connect_failed() {
    let (executor, provider) = lab_with(
        SessionTimeouts {
            connect: Duration::from_millis(100),
            ..SessionTimeouts::default()
        },
        false,
    );

    let result = executor.execute_read("edge", "show clock").await;

    assert_eq!(result.status, ExecutionStatus::ConnectFailed);
    let stats = provider.stats();
    assert_eq!(stats.open_attempts, 1);
    assert_eq!(stats.opened, 0);
    assert_eq!(stats.closed, 0);
}

#[tokio::test]
async fn command_deadline_is_transport_error_and_session_is_aborted() {
    let (executor, provider) = lab_with(
        SessionTimeouts {
            command: Duration::from_millis(50),
            ..SessionTimeouts::default()
        },
        false,
    );

    let result = executor.execute_read("switch1", "show vlan brief").await;

    assert_eq!(result.status, ExecutionStatus::TransportError);
    let stats = provider.stats();
    assert_eq!(stats.aborted, 1);
    assert_eq!(stats.closed, 1);
}

#[tokio::test]
async fn every_opened_session_is_closed_whatever_the_outcome() {
    let (executor, provider) = lab_with(
        SessionTimeouts {
            connect: Duration::from_millis(100),
            command: Duration::from_millis(50),
            ..SessionTimeouts::default()
        },
        false,
    );

    executor.execute_read("router", "show clock").await;
    executor.execute_read("router", "show ip bgp summry").await;
    executor.execute_read("switch1", "show vlan brief").await;
    executor.execute_read("switch2", "show clock").await;
    executor.execute_read("edge", "show clock").await;
    executor.execute_read("offline", "show clock").await;
    executor
        .execute_config("router", &lines(&["interface Loopback1", "ip address 10.1.1.1"]))
        .await;
    executor
        .execute_config("flaky", &lines(&["hostname flaky", "ntp server 10.0.0.9"]))
        .await;
    executor
        .execute_config("router", &lines(&["interface Gi0/0", "shutdown"]))
        .await;

    let stats = provider.stats();
    assert_eq!(stats.opened, 5);
    assert_eq!(stats.closed, stats.opened);
}

#[tokio::test]
async fn different_devices_run_in_parallel() {
    let (executor, _) = lab();

    let started = tokio::time::Instant::now();
    let (vlan, clock) = tokio::join!(
        executor.execute_read("switch1", "show vlan brief"),
        executor.execute_read("dist", "show clock"),
    );
    let elapsed = started.elapsed();

    assert!(vlan.is_success());
    assert!(clock.is_success());
    assert!(elapsed < Duration::from_millis(380), "took {elapsed:?}");
}

#[tokio::test]
async fn pooled_sessions_are_reused_across_calls() {
    let (executor, provider) = lab_with(SessionTimeouts::default(), true);

    for _ in 0..3 {
        let result = executor.execute_read("router", "show clock").await;
        assert!(result.is_success());
    }
    assert_eq!(provider.stats().opened, 1);
    assert_eq!(provider.stats().closed, 0);

    executor.shutdown().await;
    assert_eq!(provider.stats().closed, 1);
}

#[tokio::test]
async fn typed_requests_dispatch_by_kind() {
    let (executor, provider) = lab();

    let read: CommandRequest = serde_json::from_str(
        r#"{ "device_name": "router", "kind": "read_only", "payload": "show clock" }"#,
    )
    .expect("read request");
    assert!(executor.execute(&read).await.is_success());

    let config = CommandRequest::config("router", ["interface Gi0/0", "shutdown"]);
    let result = executor.execute(&config).await;
    assert_eq!(result.status, ExecutionStatus::PolicyRejected);
    assert_eq!(provider.stats().opened, 1);
}

#[tokio::test]
async fn results_serialize_for_the_caller() {
    let (executor, _) = lab();

    let result = executor
        .execute_config("router", &lines(&["interface Gi0/0", "shutdown"]))
        .await;
    let json = serde_json::to_value(&result).expect("serialize");

    assert_eq!(json["status"], "policy_rejected");
    assert_eq!(json["kind"], "configuration");
    assert_eq!(json["matched_rule"], MANAGEMENT_INTERFACE_RULE);
}

#[tokio::test]
async fn abbreviated_access_path_removal_is_rejected_before_connecting() {
    let (executor, provider) = lab();

    for change in [
        &["lin vty 0 4", "transport in none"][..],
        &["line vty 0 4", "no logi"][..],
        &["no usern netops"][..],
    ] {
        let result = executor.execute_config("switch1", &lines(change)).await;
        assert_eq!(result.status, ExecutionStatus::PolicyRejected, "{change:?}");
        assert_eq!(result.matched_rule.as_deref(), Some(ACCESS_PATH_RULE));
    }
    assert_eq!(provider.stats().open_attempts, 0);
}

#[tokio::test]
async fn interfaces_are_protected_when_no_management_interface_is_registered() {
    let (executor, provider) = lab();

    let result = executor
        .execute_config("switch1", &lines(&["interface GigabitEthernet0/0", "shutdown"]))
        .await;

    assert_eq!(result.status, ExecutionStatus::PolicyRejected);
    assert_eq!(result.matched_rule.as_deref(), Some(MANAGEMENT_INTERFACE_RULE));
    assert_eq!(provider.stats().open_attempts, 0);
}

#[tokio::test]
async fn missing_prompt_after_authentication_is_transport_error() {
    let (executor, provider) = lab_with(
        SessionTimeouts {
            prepare: Duration::from_millis(100),
            ..SessionTimeouts::default()
        },
        false,
    );

    let result = executor.execute_read("stuck", "show clock").await;

    assert_eq!(result.status, ExecutionStatus::TransportError, "{}", result.summary());
    assert!(result.detail.as_deref().unwrap_or("").contains("100 ms"));
    let stats = provider.stats();
    assert_eq!(stats.opened, 1);
    assert_eq!(stats.aborted, 1);
    assert_eq!(stats.closed, 1);
    assert!(stats.commands.is_empty());
}

#[tokio::test]
async fn failure_before_configuration_mode_leaves_state_known() {
    let (executor, provider) = lab();

    let result = executor
        .execute_config("gated", &lines(&["hostname gated", "ntp server 10.0.0.9"]))
        .await;

    assert_eq!(result.status, ExecutionStatus::TransportError);
    let detail = result.detail.as_deref().unwrap_or("");
    assert!(detail.contains("Access denied"), "{detail}");
    assert!(!detail.contains("unknown"), "{detail}");
    assert_eq!(result.lines.len(), 2);
    assert!(
        result
            .lines
            .iter()
            .all(|line| line.outcome == LineOutcome::NotAttempted)
    );
    assert!(provider.stats().config_sets.is_empty());
    assert_eq!(provider.stats().closed, 1);
}

#[tokio::test]
async fn configuration_deadline_leaves_state_unknown() {
    let (executor, _) = lab_with(
        SessionTimeouts {
            command: Duration::from_millis(50),
            ..SessionTimeouts::default()
        },
        false,
    );

    let result = executor
        .execute_config("switch1", &lines(&["hostname sw1"]))
        .await;

    assert_eq!(result.status, ExecutionStatus::TransportError);
    assert!(result.detail.as_deref().unwrap_or("").contains("unknown"));
}

#[tokio::test]
async fn concurrent_calls_to_one_device_use_separate_sessions() {
    let (executor, provider) = lab();

    let started = tokio::time::Instant::now();
    let (first, second) = tokio::join!(
        executor.execute_read("dist", "show clock"),
        executor.execute_read("dist", "show clock"),
    );
    let elapsed = started.elapsed();

    assert!(first.is_success());
    assert!(second.is_success());
    let stats = provider.stats();
    assert_eq!(stats.opened, 2);
    assert_eq!(stats.closed, 2);
    assert!(elapsed < Duration::from_millis(380), "took {elapsed:?}");
}

#[tokio::test]
async fn slow_graceful_close_falls_back_to_abort() {
    let (executor, provider) = lab_with(
        SessionTimeouts {
            close: Duration::from_millis(50),
            ..SessionTimeouts::default()
        },
        false,
    );

    let started = tokio::time::Instant::now();
    let result = executor.execute_read("sluggish", "show clock").await;

    assert!(result.is_success());
    assert!(started.elapsed() < Duration::from_millis(400));
    let stats = provider.stats();
    assert_eq!(stats.closed, 1);
    assert_eq!(stats.aborted, 1);
}
