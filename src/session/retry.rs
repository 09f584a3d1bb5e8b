use super::*;

/// Attempts and exponential backoff for [`SshExecutor::exec_batch_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Result of the retry primitive. Failures are values, never errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BatchOutcome {
    pub success: bool,
    /// Attempt that succeeded, or the number of attempts made.
    pub attempt: u32,
    /// Per-command results of the last attempt; `None` marks a failure.
    pub results: Vec<Option<CommandOutput>>,
    /// Indexes of the commands that failed in the last attempt.
    pub failed_commands: Vec<usize>,
    pub error: Option<String>,
    /// Sleeps taken between attempts.
    pub backoff: Vec<Duration>,
    pub message: String,
}

/// Confirms on the live session that a deployment took effect.
pub trait DeployValidator<C: Connector>: Send + Sync {
    fn validate<'a>(&'a self, executor: &'a mut SshExecutor<C>) -> BoxFuture<'a, Result<(), ProvisionError>>;
}

/// Checks that every object a script creates exists on the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpectedObjects {
    objects: Vec<ObjectRef>,
}

impl ExpectedObjects {
    pub fn new(objects: Vec<ObjectRef>) -> Self {
        Self { objects }
    }

    pub fn objects(&self) -> &[ObjectRef] {
        &self.objects
    }
}

impl<C: Connector> DeployValidator<C> for ExpectedObjects {
    fn validate<'a>(&'a self, executor: &'a mut SshExecutor<C>) -> BoxFuture<'a, Result<(), ProvisionError>> {
        Box::pin(async move {
            for object in &self.objects {
                let output = executor.exec(&object.count_command()).await?;
                let count = output.stdout.trim().parse::<u32>().unwrap_or(0);
                if count == 0 {
                    return Err(ProvisionError::DeployValidation {
                        router_id: executor.router_id().to_string(),
                        reason: format!("{} {}={} missing after deploy", object.path, object.key, object.name),
                    });
                }
            }
            Ok(())
        })
    }
}

/// What one attempt pushes to the device.
enum Payload<'a> {
    Inline(&'a [String]),
    File { name: &'a str, content: &'a str },
}

impl<C: Connector> SshExecutor<C> {
    /// Runs `commands` on a fresh session per attempt until the batch has no
    /// failures and `validator` (if any) passes.
    ///
    /// Attempt `n` failing waits `base_delay * 2^(n-1)` before attempt `n + 1`.
    /// Never returns an error; exhaustion is reported in the [`BatchOutcome`].
    pub async fn exec_batch_with_retry(
        &mut self,
        commands: &[String],
        policy: &RetryPolicy,
        validator: Option<&dyn DeployValidator<C>>,
    ) -> BatchOutcome {
        self.retry(Payload::Inline(commands), policy, validator).await
    }

    /// Upload, `/import` and delete `file_name` with the same retry rules.
    pub async fn deploy_file_with_retry(
        &mut self,
        file_name: &str,
        content: &str,
        policy: &RetryPolicy,
        validator: Option<&dyn DeployValidator<C>>,
    ) -> BatchOutcome {
        self.retry(Payload::File { name: file_name, content }, policy, validator)
            .await
    }

    async fn retry(
        &mut self,
        payload: Payload<'_>,
        policy: &RetryPolicy,
        validator: Option<&dyn DeployValidator<C>>,
    ) -> BatchOutcome {
        let max = policy.max_retries.max(1);
        let started = Instant::now();
        let mut backoff = Vec::new();
        let mut results = Vec::new();
        let mut failed_commands = Vec::new();
        let mut last_error = String::new();
        let mut attempt = 0;

        while attempt < max {
            attempt += 1;
            // never reuse a session that may be wedged mid-command
            self.close_transport().await;

            let failure = match self.connect().await {
                Err(e) => {
                    results.clear();
                    failed_commands.clear();
                    Some(e)
                }
                Ok(()) => {
                    let (r, failures) = self.run_payload(&payload).await;
                    results = r;
                    failed_commands = failures.iter().map(|(i, _)| *i).collect();
                    match failures.into_iter().last() {
                        Some((index, e)) => Some(ProvisionError::DeployFailed {
                            router_id: self.router_id().to_string(),
                            attempts: attempt,
                            reason: format!("{} command(s) failed, last at {index}: {e}", failed_commands.len()),
                        }),
                        None => match validator {
                            Some(v) => v.validate(self).await.err(),
                            None => None,
                        },
                    }
                }
            };

            let Some(err) = failure else {
                info!(
                    router_id = self.router_id(),
                    operation = "deploy",
                    attempt = attempt,
                    duration_ms = started.elapsed().as_millis() as u64,
                    success = true;
                    "deployment succeeded"
                );
                return BatchOutcome {
                    success: true,
                    attempt,
                    results,
                    failed_commands,
                    error: None,
                    backoff,
                    message: format!("succeeded on attempt {attempt}"),
                };
            };

            last_error = err.to_string();
            warn!(
                router_id = self.router_id(),
                operation = "deploy",
                attempt = attempt,
                success = false;
                "attempt {attempt}/{max} failed: {last_error}"
            );
            self.close_transport().await;
            if matches!(err.kind(), crate::error::ErrorKind::Credential) {
                break;
            }
            if attempt < max {
                let delay = policy.delay_after(attempt);
                backoff.push(delay);
                tokio::time::sleep(delay).await;
            }
        }

        error!(
            router_id = self.router_id(),
            operation = "deploy",
            attempt = attempt,
            duration_ms = started.elapsed().as_millis() as u64,
            success = false;
            "deployment failed: {last_error}"
        );
        BatchOutcome {
            success: false,
            attempt,
            results,
            failed_commands,
            message: format!("execution failed after {attempt} attempts: {last_error}"),
            error: Some(last_error),
            backoff,
        }
    }

    async fn run_payload(
        &mut self,
        payload: &Payload<'_>,
    ) -> (Vec<Option<CommandOutput>>, Vec<(usize, ProvisionError)>) {
        match payload {
            Payload::Inline(commands) => self.run_batch(commands).await,
            Payload::File { name, content } => {
                let imported = match self.upload_file(name, content).await {
                    Ok(()) => self.import_file(name).await,
                    Err(e) => Err(e),
                };
                self.delete_file(name).await;
                match imported {
                    Ok(stdout) => (vec![Some(CommandOutput::ok(stdout))], Vec::new()),
                    Err(e) => (vec![None], vec![(0, e)]),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_retries: 4,
            base_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_secs(1));
        assert_eq!(policy.delay_after(3), Duration::from_secs(2));
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let policy = RetryPolicy::default();
        assert!(policy.delay_after(u32::MAX) >= policy.delay_after(16));
    }
}
