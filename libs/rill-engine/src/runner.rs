use std::sync::Arc;
use std::time::Duration;

use rill_api::batch::BatchPolicy;
use rill_api::error::{ErrorKind, WriteError};
use rill_api::message::{Message, MessageBatch};
use rill_api::output::BatchOutput;
use rill_api::registry::BuiltOutput;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Delay between connect attempts.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Drives one batch output: connect, batch incoming messages, write with
/// bounded parallelism, close.
pub struct OutputRunner {
    name: String,
    output: Arc<dyn BatchOutput>,
    policy: BatchPolicy,
    max_in_flight: usize,
    rx: mpsc::Receiver<Message>,
    token: CancellationToken,
}

impl OutputRunner {
    pub fn new(
        name: impl Into<String>,
        built: BuiltOutput,
        rx: mpsc::Receiver<Message>,
        token: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            output: built.output,
            policy: built.batch_policy,
            max_in_flight: built.max_in_flight.max(1),
            rx,
            token,
        }
    }

    /// Run until the channel is closed and drained, or the token is
    /// cancelled. The output is closed in both cases.
    pub async fn run(mut self) {
        if connect(&self.name, self.output.as_ref(), &self.token).await {
            self.pump().await;
        }
        if let Err(e) = self.output.close().await {
            tracing::warn!(output = %self.name, error = %e, "close error");
        }
        tracing::info!(output = %self.name, "output stopped");
    }

    async fn pump(&mut self) {
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();
        let mut batch = MessageBatch::new();
        let mut bytes = 0usize;
        let mut deadline: Option<Instant> = None;

        loop {
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = self.token.cancelled() => break,
                msg = self.rx.recv() => match msg {
                    Some(msg) => {
                        if batch.is_empty() {
                            deadline = self.policy.period.map(|p| Instant::now() + p);
                        }
                        bytes += msg.size_hint();
                        batch.push(msg);
                        if self.policy.is_full(batch.len(), bytes) {
                            self.flush(&mut batch, &semaphore, &mut tasks).await;
                            bytes = 0;
                            deadline = None;
                        }
                    }
                    None => break,
                },
                _ = timer => {
                    self.flush(&mut batch, &semaphore, &mut tasks).await;
                    bytes = 0;
                    deadline = None;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(output = %self.name, error = %e, "write task failed");
                    }
                }
            }
        }

        if !batch.is_empty() {
            if self.token.is_cancelled() {
                tracing::warn!(output = %self.name, dropped = batch.len(), "cancelled with unwritten messages");
            } else {
                self.flush(&mut batch, &semaphore, &mut tasks).await;
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(output = %self.name, error = %e, "write task failed");
            }
        }
    }

    /// Hand the accumulated batch to a write task once a slot is free.
    async fn flush(
        &self,
        batch: &mut MessageBatch,
        semaphore: &Arc<Semaphore>,
        tasks: &mut JoinSet<()>,
    ) {
        if batch.is_empty() {
            return;
        }
        let batch = std::mem::take(batch);
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            return;
        };

        let output = self.output.clone();
        let token = self.token.clone();
        let name = self.name.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let result = match output.write_batch(&batch, &token).await {
                Err(WriteError::Batch(e)) if e.kind == ErrorKind::NotConnected => {
                    tracing::warn!(output = %name, error = %e, "output not connected, reconnecting");
                    if connect(&name, output.as_ref(), &token).await {
                        output.write_batch(&batch, &token).await
                    } else {
                        Err(WriteError::Batch(e))
                    }
                }
                other => other,
            };
            let reconnect = matches!(&result, Err(e) if e.is_not_connected());
            match result {
                Ok(()) => {
                    tracing::debug!(output = %name, messages = batch.len(), "batch written");
                }
                Err(WriteError::Batch(e)) => {
                    tracing::error!(output = %name, messages = batch.len(), error = %e, "batch failed");
                }
                Err(WriteError::Partial(errors)) => {
                    for (index, e) in errors.iter() {
                        tracing::error!(output = %name, index, error = %e, "message failed");
                    }
                    tracing::warn!(
                        output = %name,
                        failed = errors.len(),
                        messages = batch.len(),
                        "batch partially written"
                    );
                }
            }
            if reconnect && !token.is_cancelled() {
                tracing::warn!(output = %name, "output lost its connection, reconnecting");
                connect(&name, output.as_ref(), &token).await;
            }
        });
    }
}

/// Connect, retrying until success. `false` when cancelled first.
async fn connect(name: &str, output: &dyn BatchOutput, token: &CancellationToken) -> bool {
    loop {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return false,
            r = output.connect(token) => r,
        };
        match result {
            Ok(()) => {
                tracing::info!(output = %name, "output connected");
                return true;
            }
            Err(e) => {
                tracing::warn!(
                    output = %name,
                    error = %e,
                    retry_in = ?CONNECT_RETRY_DELAY,
                    "connect failed"
                );
            }
        }
        tokio::select! {
            _ = token.cancelled() => return false,
            _ = tokio::time::sleep(CONNECT_RETRY_DELAY) => {}
        }
    }
}
