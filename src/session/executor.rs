use super::*;

/// One authenticated session against one router.
///
/// `Uninitialized -> Connected -> {Executing, Idle} -> Disconnected`. The
/// credential is decrypted once in [`SshExecutor::new`]; [`disconnect`]
/// zeroes it and the executor cannot reconnect afterwards.
///
/// The zeroing covers the executor's copy. The production connector hands
/// `async-ssh2-tokio` an `AuthMethod` built from the secret per connect, and
/// that library does not zero its copy on drop.
///
/// [`disconnect`]: SshExecutor::disconnect
pub struct SshExecutor<C: Connector> {
    connector: Arc<C>,
    target: SshTarget,
    credential: Option<DecryptedCredential>,
    transport: Option<C::Transport>,
    state: SessionState,
    upload_chunk_bytes: usize,
}

impl<C: Connector> SshExecutor<C> {
    /// Decrypts the router's credential, preferring the SSH key.
    pub fn new(
        router: &Router,
        vault: &CredentialVault,
        connector: Arc<C>,
        settings: &Settings,
    ) -> Result<Self, ProvisionError> {
        let credential = vault.resolve(router)?;
        debug!(
            router_id = router.id.as_str(),
            auth = format!("{:?}", credential.kind()).as_str();
            "executor ready"
        );
        Ok(Self {
            connector,
            target: SshTarget::for_router(router, settings.ssh_timeout()),
            credential: Some(credential),
            transport: None,
            state: SessionState::Uninitialized,
            upload_chunk_bytes: settings.upload_chunk_bytes.max(64),
        })
    }

    pub fn router_id(&self) -> &str {
        &self.target.router_id
    }

    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a decrypted credential is still held.
    pub fn holds_credential(&self) -> bool {
        self.credential.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_connected)
    }

    /// Opens the session; a no-op when already connected.
    pub async fn connect(&mut self) -> Result<(), ProvisionError> {
        if self.is_connected() {
            return Ok(());
        }
        let credential = self.credential.as_ref().ok_or_else(|| CredentialError::Destroyed {
            router_id: self.target.router_id.clone(),
        })?;
        let started = Instant::now();
        let result = self.connector.connect(&self.target, credential).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(transport) => {
                self.transport = Some(transport);
                self.state = SessionState::Connected;
                info!(
                    router_id = self.target.router_id.as_str(),
                    operation = "connect",
                    duration_ms = duration_ms,
                    success = true;
                    "connected to {}:{}",
                    self.target.host,
                    self.target.port
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    router_id = self.target.router_id.as_str(),
                    operation = "connect",
                    duration_ms = duration_ms,
                    success = false;
                    "connect to {}:{} failed: {e}",
                    self.target.host,
                    self.target.port
                );
                Err(e)
            }
        }
    }

    /// Runs one command, connecting first if needed.
    ///
    /// RouterOS reports many errors on stdout with a zero exit status; those
    /// are returned as [`ProvisionError::CommandFailed`].
    pub async fn exec(&mut self, command: &str) -> Result<CommandOutput, ProvisionError> {
        self.connect().await?;
        let Some(transport) = self.transport.as_mut() else {
            return Err(ProvisionError::SessionClosed(self.target.router_id.clone()));
        };
        self.state = SessionState::Executing;
        let started = Instant::now();
        let result = transport.exec(command).await;
        self.state = SessionState::Idle;
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = result.and_then(|output| {
            let reported = device_error(&output.stdout).or_else(|| device_error(&output.stderr));
            match reported {
                Some(reason) => Err(ProvisionError::CommandFailed {
                    router_id: self.target.router_id.clone(),
                    command: preview(command),
                    reason,
                }),
                None if output.exit_status != 0 => Err(ProvisionError::CommandFailed {
                    router_id: self.target.router_id.clone(),
                    command: preview(command),
                    reason: format!("exit status {}", output.exit_status),
                }),
                None => Ok(output),
            }
        });
        debug!(
            router_id = self.target.router_id.as_str(),
            operation = "exec",
            duration_ms = duration_ms,
            success = result.is_ok();
            "{}",
            preview(command)
        );
        if let Ok(output) = &result {
            trace!("{} <- {}", self.target.router_id, output.stdout);
        }
        result
    }

    /// Runs every command in order; a failure does not stop the batch.
    ///
    /// Returns one entry per command, `None` where it failed.
    pub async fn exec_batch(&mut self, commands: &[String]) -> Vec<Option<CommandOutput>> {
        self.run_batch(commands).await.0
    }

    /// Batch body shared with the retry primitive: results plus the failures.
    pub(super) async fn run_batch(
        &mut self,
        commands: &[String],
    ) -> (Vec<Option<CommandOutput>>, Vec<(usize, ProvisionError)>) {
        let mut results = Vec::with_capacity(commands.len());
        let mut failures = Vec::new();
        let mut reconnected = false;
        let mut dead: Option<String> = None;

        for (index, command) in commands.iter().enumerate() {
            if let Some(reason) = &dead {
                results.push(None);
                failures.push((
                    index,
                    ProvisionError::SessionClosed(format!("{}: {reason}", self.target.router_id)),
                ));
                continue;
            }
            let mut outcome = self.exec(command).await;
            let retry_once = !reconnected && outcome.as_ref().is_err_and(is_transport_failure);
            if retry_once {
                reconnected = true;
                if let Err(e) = &outcome {
                    warn!(
                        router_id = self.target.router_id.as_str(),
                        operation = "reconnect";
                        "transport error on command {index}, reconnecting: {e}"
                    );
                }
                self.close_transport().await;
                outcome = match self.connect().await {
                    Ok(()) => self.exec(command).await,
                    Err(connect_err) => {
                        dead = Some(connect_err.to_string());
                        Err(connect_err)
                    }
                };
            }
            match outcome {
                Ok(output) => results.push(Some(output)),
                Err(e) => {
                    results.push(None);
                    failures.push((index, e));
                }
            }
        }
        (results, failures)
    }

    /// Writes `content` to `file_name` on the device in line-aligned chunks.
    pub async fn upload_file(&mut self, file_name: &str, content: &str) -> Result<(), ProvisionError> {
        let started = Instant::now();
        let quoted = escape(file_name);
        self.delete_file(file_name).await;
        self.exec(&format!("/file add name=\"{quoted}\" contents=\"\"")).await?;
        let chunks = split_chunks(content, self.upload_chunk_bytes);
        for chunk in &chunks {
            self.exec(&format!(
                "/file set [find where name=\"{quoted}\"] contents=([/file get [find where name=\"{quoted}\"] contents] . \"{}\")",
                escape(chunk)
            ))
            .await?;
        }
        info!(
            router_id = self.target.router_id.as_str(),
            operation = "upload_file",
            duration_ms = started.elapsed().as_millis() as u64,
            success = true;
            "uploaded {file_name} ({} bytes, {} chunks)",
            content.len(),
            chunks.len()
        );
        Ok(())
    }

    /// Runs `/import` on an uploaded file and returns the device output.
    pub async fn import_file(&mut self, file_name: &str) -> Result<String, ProvisionError> {
        let output = self
            .exec(&format!("/import file-name=\"{}\" verbose=no", escape(file_name)))
            .await?;
        info!(
            router_id = self.target.router_id.as_str(),
            operation = "import_file";
            "imported {file_name}"
        );
        Ok(output.stdout)
    }

    /// Removes a device file; absence and errors are tolerated.
    pub async fn delete_file(&mut self, file_name: &str) {
        let command = format!(
            ":do {{ /file remove [find where name=\"{}\"] }} on-error={{}}",
            escape(file_name)
        );
        if let Err(e) = self.exec(&command).await {
            warn!(
                router_id = self.target.router_id.as_str(),
                operation = "delete_file";
                "could not delete {file_name}: {e}"
            );
        }
    }

    /// Drops the transport but keeps the credential for a reconnect.
    pub(super) async fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        if self.state != SessionState::Uninitialized {
            self.state = SessionState::Idle;
        }
    }

    /// Closes the session and zeroes the executor's decrypted credential.
    pub async fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        // SecretString zeroes its buffer on drop
        self.credential = None;
        self.state = SessionState::Disconnected;
        debug!(router_id = self.target.router_id.as_str(); "disconnected, credential destroyed");
    }
}

impl<C: Connector> Drop for SshExecutor<C> {
    fn drop(&mut self) {
        if self.credential.take().is_some() {
            debug!(router_id = self.target.router_id.as_str(); "executor dropped without disconnect");
        }
    }
}

fn is_transport_failure(err: &ProvisionError) -> bool {
    matches!(
        err,
        ProvisionError::SessionClosed(_)
            | ProvisionError::Timeout { .. }
            | ProvisionError::Ssh2Error(_)
            | ProvisionError::RusshError(_)
    )
}

/// Splits on line boundaries; single lines longer than `max` are cut.
pub(crate) fn split_chunks(content: &str, max: usize) -> Vec<String> {
    let max = max.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in content.split_inclusive('\n') {
        if !current.is_empty() && current.len() + line.len() > max {
            chunks.push(std::mem::take(&mut current));
        }
        if line.len() <= max {
            current.push_str(line);
            continue;
        }
        let mut piece = String::new();
        for c in line.chars() {
            if piece.len() + c.len_utf8() > max {
                chunks.push(std::mem::take(&mut piece));
            }
            piece.push(c);
        }
        current = piece;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_follow_line_boundaries() {
        let content = "line-one\nline-two\nline-three\n";
        let chunks = split_chunks(content, 20);
        assert_eq!(chunks, vec!["line-one\nline-two\n", "line-three\n"]);
        assert_eq!(chunks.concat(), content);
    }

    #[test]
    fn oversized_lines_are_cut() {
        let content = "abcdefghij\nxy";
        let chunks = split_chunks(content, 4);
        assert!(chunks.iter().all(|c| c.len() <= 4));
        assert_eq!(chunks.concat(), content);
    }
}
