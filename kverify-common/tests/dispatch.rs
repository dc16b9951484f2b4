//! Dispatcher behaviour against the in-memory transport and local `sh`.

use kverify_common::testing::init_global_test_logging;
use kverify_common::{
    InstanceIdentity, MockTransport, OutputSink, State, TransportError, Verifier, VerifierConfig,
    VerifierError,
};
use std::time::Duration;

#[ctor::ctor]
fn setup() {
    init_global_test_logging();
}

fn instance() -> InstanceIdentity {
    InstanceIdentity::new("i1", "ubuntu", "default")
}

fn state() -> State {
    State::new()
        .with("hostname", "10.0.0.4")
        .with("foo", "bar")
}

// ===========================================================================
// Remote mode
// ===========================================================================

#[tokio::test]
async fn test_remote_scripts_share_one_connection() {
    let transport = MockTransport::new();
    let config = VerifierConfig {
        patterns: vec![
            "/tmp/kitchen/spec/base_spec.rb".into(),
            "/tmp/kitchen/spec/web_spec.rb".into(),
        ],
        remove_default_path: true,
        ..Default::default()
    };
    let verifier = Verifier::new(config, instance(), transport.clone())
        .unwrap()
        .with_live_stream(OutputSink::discard());

    verifier.call(&state()).await.unwrap();

    assert_eq!(transport.connect_count(), 1);
    assert_eq!(transport.close_count(), 1);
    assert_eq!(transport.connected_states(), vec![state()]);

    let executed = transport.executed();
    assert_eq!(executed.len(), 2);
    assert!(executed[0].contains("gem list -i bundler"));
    assert!(!executed[0].contains("rspec"));
    assert!(executed[1].contains("-P /tmp/kitchen/spec/base_spec.rb || exit $?"));
    assert!(executed[1].ends_with("rm -rf /tmp/kitchen"));
}

#[tokio::test]
async fn test_runner_failure_maps_to_action_failed() {
    let transport = MockTransport::new();
    transport.push_exit(0, "", "");
    transport.push_exit(
        1,
        "Failures:\n  1) Package nginx should be installed\n1 example, 1 failure",
        "",
    );
    let (sink, captured) = OutputSink::capture();
    let verifier = Verifier::new(VerifierConfig::default(), instance(), transport.clone())
        .unwrap()
        .with_live_stream(sink);

    let err = verifier.call(&state()).await.unwrap_err();

    assert!(err.is_action_failure());
    assert_eq!(
        captured.contents(),
        "Failures:\n  1) Package nginx should be installed\n1 example, 1 failure\n"
    );
    let cause = std::error::Error::source(&err).unwrap();
    assert!(matches!(
        cause.downcast_ref::<TransportError>(),
        Some(TransportError::CommandFailed { exit_code: 1, stdout, .. })
            if stdout.contains("1 example, 1 failure")
    ));
    assert_eq!(err.to_string(), "Action #verify failed for <i1>.");
    assert_eq!(transport.executed().len(), 2);
    assert_eq!(transport.close_count(), 1);
    assert_eq!(transport.open_connections(), 0);
}

#[tokio::test]
async fn test_session_error_is_not_an_action_failure() {
    let transport = MockTransport::new();
    transport.push_result(Err(TransportError::Session("master exited".into())));
    let verifier = Verifier::new(VerifierConfig::default(), instance(), transport.clone())
        .unwrap()
        .with_live_stream(OutputSink::discard());

    let err = verifier.call(&state()).await.unwrap_err();

    assert!(matches!(err, VerifierError::Transport(TransportError::Session(_))));
    assert_eq!(transport.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_during_sleep_never_connects() {
    let transport = MockTransport::new();
    let config = VerifierConfig {
        sleep: 30,
        ..Default::default()
    };
    let verifier = Verifier::new(config, instance(), transport.clone())
        .unwrap()
        .with_live_stream(OutputSink::discard());

    let cancelled = tokio::time::timeout(Duration::from_secs(5), verifier.call(&state())).await;

    assert!(cancelled.is_err());
    assert_eq!(transport.connect_count(), 0);
    assert_eq!(transport.open_connections(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sleep_precedes_connect() {
    let transport = MockTransport::new();
    let (sink, captured) = OutputSink::capture();
    let config = VerifierConfig {
        sleep: 2,
        ..Default::default()
    };
    let verifier = Verifier::new(config, instance(), transport.clone())
        .unwrap()
        .with_live_stream(sink);

    let start = tokio::time::Instant::now();
    verifier.call(&state()).await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(2));
    assert!(captured.contents().starts_with("..\n"));
    assert_eq!(transport.connect_count(), 1);
}

// ===========================================================================
// Local mode
// ===========================================================================

#[cfg(unix)]
#[tokio::test]
async fn test_local_mode_sees_projected_environment() {
    let (sink, captured) = OutputSink::capture();
    let config = VerifierConfig {
        remote_exec: false,
        command: Some(
            "printf '%s %s %s %s\\n' \"$KITCHEN_INSTANCE\" \"$KITCHEN_PLATFORM\" \"$KITCHEN_SUITE\" \"$KITCHEN_FOO\""
                .into(),
        ),
        ..Default::default()
    };
    let transport = MockTransport::new();
    let verifier = Verifier::new(config, instance(), transport.clone())
        .unwrap()
        .with_live_stream(sink);

    verifier.call(&state()).await.unwrap();

    assert_eq!(captured.contents(), "i1 ubuntu default bar\n");
    assert_eq!(transport.connect_count(), 0);
    assert!(verifier.config().shellout_opts.environment.is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_local_mode_nonzero_exit_is_action_failed() {
    let config = VerifierConfig {
        remote_exec: false,
        command: Some("echo checking; exit 3".into()),
        ..Default::default()
    };
    let verifier = Verifier::new(config, instance(), MockTransport::new())
        .unwrap()
        .with_live_stream(OutputSink::discard());

    let err = verifier.call(&state()).await.unwrap_err();

    assert_eq!(err.to_string(), "Action #verify failed for <i1>.");
    let cause = std::error::Error::source(&err).unwrap().to_string();
    assert!(cause.contains("received '3'"), "{cause}");
    assert!(cause.contains("STDOUT: checking"), "{cause}");
}

#[cfg(unix)]
#[tokio::test]
async fn test_legacy_local_mode_runs_command_and_returns_none() {
    let (sink, captured) = OutputSink::capture();
    let config = VerifierConfig {
        remote_exec: false,
        serverspec_command: Some("echo legacy".into()),
        ..Default::default()
    };
    let verifier = Verifier::new(config, instance(), MockTransport::new())
        .unwrap()
        .with_live_stream(sink);

    assert_eq!(verifier.setup_command(&state()).await.unwrap(), None);
    assert_eq!(verifier.run_command(&state()).await.unwrap(), None);
    assert_eq!(captured.contents(), "legacy\nlegacy\n");
}
