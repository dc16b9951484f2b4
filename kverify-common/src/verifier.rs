//! The verify dispatcher.
//!
//! Remote mode installs Ruby, Bundler and Serverspec and runs the RSpec
//! patterns over one transport connection. Local mode runs the configured
//! command on this machine with the instance projected into `KITCHEN_*`
//! variables.

use crate::config::VerifierConfig;
use crate::environment::project_into;
use crate::error::VerifierError;
use crate::installer::InstallerBuilder;
use crate::output::OutputSink;
use crate::runner::RunnerBuilder;
use crate::script::Script;
use crate::shellout::{ShellOut, ShellOutOptions};
use crate::state::{InstanceIdentity, State};
use crate::transport::{Connection, Transport, TransportError};
use crate::util::mask_sensitive_command;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct Verifier<T: Transport> {
    config: VerifierConfig,
    instance: InstanceIdentity,
    transport: T,
    live: OutputSink,
}

impl<T: Transport> Verifier<T> {
    /// Validate the configuration and build a dispatcher writing live output
    /// to stdout.
    pub fn new(
        config: VerifierConfig,
        instance: InstanceIdentity,
        transport: T,
    ) -> Result<Self, VerifierError> {
        config.validate()?;
        Ok(Self {
            config,
            instance,
            transport,
            live: OutputSink::stdout(),
        })
    }

    /// Send progress and command output to `sink` instead of stdout.
    #[must_use]
    pub fn with_live_stream(mut self, sink: OutputSink) -> Self {
        self.live = sink;
        self
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn instance(&self) -> &InstanceIdentity {
        &self.instance
    }

    pub fn install_script(&self) -> Result<Script, VerifierError> {
        InstallerBuilder::new(&self.config).build()
    }

    pub fn runner_script(&self) -> Script {
        RunnerBuilder::new(&self.config).build()
    }

    /// Local shell-out options for `state`; the configured options are not
    /// modified.
    pub fn projected_options(&self, state: &State) -> ShellOutOptions {
        project_into(&self.config.shellout_opts, &self.instance, state)
    }

    /// Run verification against the instance.
    pub async fn call(&self, state: &State) -> Result<(), VerifierError> {
        info!(
            "[serverspec] Verify on instance={} with {} state entries",
            self.instance,
            state.len()
        );
        self.sleep_if_set().await?;

        if self.config.remote_exec {
            self.verify_remote(state).await?;
        } else {
            self.shellout(state).await?;
        }

        info!("[serverspec] Verify completed for {}", self.instance);
        Ok(())
    }

    /// Legacy entry point: the install script in remote mode; in local mode
    /// the command is run and nothing is returned.
    pub async fn setup_command(&self, state: &State) -> Result<Option<String>, VerifierError> {
        self.sleep_if_set().await?;
        if self.config.remote_exec {
            Ok(Some(self.install_script()?.render()))
        } else {
            self.shellout(state).await?;
            Ok(None)
        }
    }

    /// Legacy entry point: the runner script in remote mode; in local mode
    /// the command is run and nothing is returned.
    pub async fn run_command(&self, state: &State) -> Result<Option<String>, VerifierError> {
        self.sleep_if_set().await?;
        if self.config.remote_exec {
            Ok(Some(self.runner_script().render()))
        } else {
            self.shellout(state).await?;
            Ok(None)
        }
    }

    async fn sleep_if_set(&self) -> Result<(), VerifierError> {
        if self.config.sleep == 0 {
            return Ok(());
        }
        debug!("Sleeping {}s before verify", self.config.sleep);
        for _ in 0..self.config.sleep {
            self.live.write_str(".")?;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        self.live.write_line("")?;
        Ok(())
    }

    async fn verify_remote(&self, state: &State) -> Result<(), VerifierError> {
        // Both scripts are generated first so a bad gemfile never opens a
        // connection.
        let install = self.install_script()?.render();
        let runner = self.runner_script().render();
        debug!("Install script:\n{}", mask_sensitive_command(&install));
        debug!("Runner script:\n{}", mask_sensitive_command(&runner));

        let mut connection = self.transport.connect(state).await?;
        let outcome = self.execute_all(&mut connection, [install.as_str(), runner.as_str()]).await;
        let closed = connection.close().await;

        match (outcome, closed) {
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!("Failed to close connection after error: {}", close_err);
                }
                Err(self.remote_failure(e))
            }
            (Ok(()), Err(close_err)) => Err(close_err.into()),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    async fn execute_all<C: Connection>(
        &self,
        connection: &mut C,
        scripts: [&str; 2],
    ) -> Result<(), TransportError> {
        for script in scripts {
            match connection.execute(script).await {
                Ok(output) => self.forward(&output.stdout, &output.stderr)?,
                Err(error) => {
                    if let TransportError::CommandFailed { stdout, stderr, .. } = &error {
                        self.forward(stdout, stderr)?;
                    }
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    /// Copy remote output to the live sink, stdout first.
    fn forward(&self, stdout: &str, stderr: &str) -> std::io::Result<()> {
        for text in [stdout, stderr] {
            if text.is_empty() {
                continue;
            }
            self.live.write_str(text)?;
            if !text.ends_with('\n') {
                self.live.write_str("\n")?;
            }
        }
        Ok(())
    }

    fn remote_failure(&self, error: TransportError) -> VerifierError {
        match error {
            TransportError::CommandFailed { .. } | TransportError::Terminated => {
                VerifierError::action_failed(self.instance.to_string(), error)
            }
            other => other.into(),
        }
    }

    async fn shellout(&self, state: &State) -> Result<(), VerifierError> {
        let command = self.config.local_command().ok_or_else(|| {
            VerifierError::Config(crate::config::ConfigError::Invalid {
                field: "command",
                reason: "local mode needs `command` or `serverspec_command`".to_string(),
            })
        })?;

        let result = ShellOut::new(command, self.projected_options(state))
            .run(&self.live)
            .await?;
        result
            .error()
            .map_err(|failed| VerifierError::action_failed(self.instance.to_string(), failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    fn instance() -> InstanceIdentity {
        InstanceIdentity::new("default-ubuntu", "ubuntu", "default")
    }

    fn verifier(config: VerifierConfig, transport: MockTransport) -> Verifier<MockTransport> {
        Verifier::new(config, instance(), transport)
            .unwrap()
            .with_live_stream(OutputSink::discard())
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = VerifierConfig {
            default_path: "relative".into(),
            ..Default::default()
        };
        let err = Verifier::new(config, instance(), MockTransport::new()).err().unwrap();
        assert!(matches!(err, VerifierError::Config(_)));
    }

    #[tokio::test]
    async fn test_remote_executes_install_then_runner() {
        let transport = MockTransport::new();
        let config = VerifierConfig {
            patterns: vec!["spec/a_spec.rb".into()],
            ..Default::default()
        };
        let v = verifier(config, transport.clone());
        v.call(&State::new().with("hostname", "h")).await.unwrap();

        let executed = transport.executed();
        assert_eq!(executed.len(), 2);
        assert_eq!(executed[0], v.install_script().unwrap().render());
        assert_eq!(executed[1], v.runner_script().render());
        assert_eq!(transport.close_count(), 1);
        assert_eq!(transport.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_remote_install_failure_skips_runner_and_closes() {
        let transport = MockTransport::new();
        transport.push_exit(1, "", "ERROR: Default path '/tmp/kitchen' does not exist");
        let v = verifier(VerifierConfig::default(), transport.clone());

        let err = v.call(&State::new()).await.unwrap_err();
        assert!(err.is_action_failure());
        assert_eq!(err.to_string(), "Action #verify failed for <default-ubuntu>.");
        assert_eq!(transport.executed().len(), 1);
        assert_eq!(transport.close_count(), 1);
        assert_eq!(transport.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_is_transport_error() {
        let transport = MockTransport::new();
        transport.fail_connect("no route to host");
        let v = verifier(VerifierConfig::default(), transport.clone());

        let err = v.call(&State::new()).await.unwrap_err();
        assert!(matches!(err, VerifierError::Transport(TransportError::Connect { .. })));
        assert!(transport.executed().is_empty());
    }

    #[tokio::test]
    async fn test_bad_gemfile_never_connects() {
        let transport = MockTransport::new();
        let config = VerifierConfig {
            gemfile: Some("/nonexistent/kverify/Gemfile".into()),
            ..Default::default()
        };
        let v = verifier(config, transport.clone());

        let err = v.call(&State::new()).await.unwrap_err();
        assert!(matches!(err, VerifierError::Manifest { .. }));
        assert_eq!(transport.connected_states().len(), 0);
    }

    #[tokio::test]
    async fn test_remote_stdout_forwarded_to_sink() {
        let transport = MockTransport::new();
        transport.push_exit(0, "installing\n", "");
        transport.push_exit(0, "2 examples, 0 failures\n", "");
        let (sink, captured) = OutputSink::capture();
        let v = Verifier::new(VerifierConfig::default(), instance(), transport)
            .unwrap()
            .with_live_stream(sink);

        v.call(&State::new()).await.unwrap();
        assert_eq!(captured.contents(), "installing\n2 examples, 0 failures\n");
    }

    #[tokio::test]
    async fn test_remote_stderr_forwarded_after_stdout() {
        let transport = MockTransport::new();
        transport.push_exit(0, "", "gem: warning");
        transport.push_exit(0, "1 example, 0 failures\n", "deprecated flag\n");
        let (sink, captured) = OutputSink::capture();
        let v = Verifier::new(VerifierConfig::default(), instance(), transport)
            .unwrap()
            .with_live_stream(sink);

        v.call(&State::new()).await.unwrap();
        assert_eq!(
            captured.contents(),
            "gem: warning\n1 example, 0 failures\ndeprecated flag\n"
        );
    }

    #[tokio::test]
    async fn test_legacy_commands_remote_return_scripts() {
        let transport = MockTransport::new();
        let config = VerifierConfig {
            serverspec_command: Some("rspec spec".into()),
            ..Default::default()
        };
        let v = verifier(config, transport.clone());

        let setup = v.setup_command(&State::new()).await.unwrap();
        let run = v.run_command(&State::new()).await.unwrap();
        assert_eq!(setup, Some(v.install_script().unwrap().render()));
        assert_eq!(run.as_deref(), Some("rspec spec"));
        assert_eq!(transport.connect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_writes_one_dot_per_second() {
        let (sink, captured) = OutputSink::capture();
        let config = VerifierConfig {
            sleep: 3,
            ..Default::default()
        };
        let v = Verifier::new(config, instance(), MockTransport::new())
            .unwrap()
            .with_live_stream(sink);

        let start = tokio::time::Instant::now();
        v.sleep_if_set().await.unwrap();
        assert_eq!(captured.contents(), "...\n");
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[test]
    fn test_projected_options_leave_config_untouched() {
        let v = verifier(VerifierConfig::default(), MockTransport::new());
        let options = v.projected_options(&State::new().with("hostname", "10.1.1.1"));

        assert_eq!(options.environment["KITCHEN_HOSTNAME"], "10.1.1.1");
        assert_eq!(options.environment["KITCHEN_INSTANCE"], "default-ubuntu");
        assert!(v.config().shellout_opts.environment.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_mode_failure_names_instance() {
        let config = VerifierConfig {
            remote_exec: false,
            command: Some("exit 3".into()),
            ..Default::default()
        };
        let v = verifier(config, MockTransport::new());

        let err = v.call(&State::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Action #verify failed for <default-ubuntu>.");
        let source = std::error::Error::source(&err).unwrap().to_string();
        assert!(source.contains("'3'"), "{source}");
    }
}
