use super::*;

/// Connects to RouterOS over `async-ssh2-tokio`.
#[derive(Debug, Clone, Default)]
pub struct RouterOsConnector {
    security: ConnectionSecurityOptions,
}

impl RouterOsConnector {
    pub fn new(security: ConnectionSecurityOptions) -> Self {
        Self { security }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(ConnectionSecurityOptions::from_settings(settings))
    }
}

/// One authenticated SSH client; every command opens its own exec channel.
pub struct SshSession {
    client: Client,
    router_id: String,
    timeout: Duration,
}

impl Connector for RouterOsConnector {
    type Transport = SshSession;

    async fn connect(
        &self,
        target: &SshTarget,
        credential: &DecryptedCredential,
    ) -> Result<SshSession, ProvisionError> {
        // AuthMethod owns a plain String copy of the secret that async-ssh2-tokio
        // drops without zeroing; only the executor's own copy is wiped.
        let auth = match credential {
            DecryptedCredential::PrivateKey(_) => AuthMethod::with_key(credential.expose(), None),
            DecryptedCredential::Password(_) => AuthMethod::with_password(credential.expose()),
        };
        let config = Config {
            preferred: self.security.preferred(),
            inactivity_timeout: Some(target.timeout),
            ..Default::default()
        };
        let connect = Client::connect_with_config(
            (target.host.clone(), target.port),
            &target.username,
            auth,
            self.security.server_check.clone(),
            config,
        );
        let client = match tokio::time::timeout(target.timeout, connect).await {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => {
                return Err(ProvisionError::Connect {
                    router_id: target.router_id.clone(),
                    host: format!("{}:{}", target.host, target.port),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(ProvisionError::Timeout {
                    router_id: target.router_id.clone(),
                    operation: "connect".to_string(),
                    seconds: target.timeout.as_secs(),
                });
            }
        };
        debug!(
            router_id = target.router_id.as_str(),
            auth = format!("{:?}", credential.kind()).as_str();
            "{}@{}:{} authenticated",
            target.username,
            target.host,
            target.port
        );
        Ok(SshSession {
            client,
            router_id: target.router_id.clone(),
            timeout: target.timeout,
        })
    }
}

impl Transport for SshSession {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, ProvisionError> {
        match tokio::time::timeout(self.timeout, self.client.execute(command)).await {
            Ok(Ok(result)) => Ok(CommandOutput {
                stdout: result.stdout,
                stderr: result.stderr,
                exit_status: result.exit_status,
            }),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ProvisionError::Timeout {
                router_id: self.router_id.clone(),
                operation: preview(command),
                seconds: self.timeout.as_secs(),
            }),
        }
    }

    fn is_connected(&self) -> bool {
        !self.client.is_closed()
    }

    async fn close(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("ssh disconnect for {} reported: {e}", self.router_id);
        }
    }
}
