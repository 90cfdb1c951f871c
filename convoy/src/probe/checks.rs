//! Built-in probe checks.

use super::Probe;
use crate::runner::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Ready when a TCP port accepts connections.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    component: String,
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl TcpProbe {
    /// Creates a TCP probe.
    #[must_use]
    pub fn new(component: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            component: component.into(),
            host: host.into(),
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets the per-check connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Probe for TcpProbe {
    fn component(&self) -> &str {
        &self.component
    }

    async fn check(&self) -> Result<(), String> {
        let address = format!("{}:{}", self.host, self.port);
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(format!("{address}: {e}")),
            Err(_) => Err(format!("{address}: connect timed out")),
        }
    }
}

/// Ready when an HTTP endpoint answers 2xx.
#[cfg(feature = "http-probe")]
#[derive(Debug, Clone)]
pub struct HttpProbe {
    component: String,
    url: String,
    client: reqwest::Client,
}

#[cfg(feature = "http-probe")]
impl HttpProbe {
    /// Creates an HTTP probe with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        component: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, crate::errors::ConvoyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| crate::errors::ConvoyError::Config(format!("http client: {e}")))?;
        Ok(Self {
            component: component.into(),
            url: url.into(),
            client,
        })
    }
}

#[cfg(feature = "http-probe")]
#[async_trait]
impl Probe for HttpProbe {
    fn component(&self) -> &str {
        &self.component
    }

    async fn check(&self) -> Result<(), String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| format!("{}: {e}", self.url))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(format!("{}: HTTP {}", self.url, status.as_u16()))
        }
    }
}

/// Ready when a command exits zero.
#[derive(Clone)]
pub struct CommandProbe {
    component: String,
    command: CommandSpec,
    runner: Arc<dyn CommandRunner>,
}

impl CommandProbe {
    /// Creates a command probe.
    #[must_use]
    pub fn new(
        component: impl Into<String>,
        command: CommandSpec,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            component: component.into(),
            command,
            runner,
        }
    }
}

impl std::fmt::Debug for CommandProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandProbe")
            .field("component", &self.component)
            .field("command", &self.command.display())
            .finish()
    }
}

#[async_trait]
impl Probe for CommandProbe {
    fn component(&self) -> &str {
        &self.component
    }

    async fn check(&self) -> Result<(), String> {
        let output = self.runner.run(&self.command).await.map_err(|e| e.to_string())?;
        if output.succeeded() {
            Ok(())
        } else {
            let stderr = output.stderr.trim();
            Err(match output.exit_code {
                Some(code) if stderr.is_empty() => format!("exit code {code}"),
                Some(code) => format!("exit code {code}: {stderr}"),
                None => "terminated without exit code".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutput, ProcessRunner};
    use crate::testing::ScriptedRunner;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_probe_ready_when_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = TcpProbe::new("kafka", "127.0.0.1", port);
        assert_eq!(probe.component(), "kafka");
        assert!(probe.check().await.is_ok());
    }

    #[tokio::test]
    async fn test_tcp_probe_not_ready_when_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = TcpProbe::new("kafka", "127.0.0.1", port)
            .with_connect_timeout(Duration::from_millis(200));
        assert!(probe.check().await.is_err());
    }

    #[tokio::test]
    async fn test_command_probe_reports_exit_code() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push("clickhouse-client", CommandOutput::failure(210, "Connection refused"));
        runner.push("clickhouse-client", CommandOutput::success("1"));

        let probe = CommandProbe::new(
            "clickhouse",
            CommandSpec::from_argv(["clickhouse-client", "--query", "SELECT 1"]),
            runner.clone(),
        );

        let err = probe.check().await.unwrap_err();
        assert_eq!(err, "exit code 210: Connection refused");
        assert!(probe.check().await.is_ok());
    }

    #[tokio::test]
    async fn test_command_probe_with_real_process() {
        let probe = CommandProbe::new("shell", CommandSpec::from_argv(["true"]), Arc::new(ProcessRunner));
        assert!(probe.check().await.is_ok());
    }
}
