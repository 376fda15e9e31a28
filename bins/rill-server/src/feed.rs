use std::future::Future;

use rill_api::message::Message;
use rill_engine::Engine;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Why [`feed`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEnd {
    Eof,
    ReadError,
    Shutdown,
}

/// Dispatch every non-empty line of `input` until EOF or `shutdown`
/// resolves. `shutdown` also interrupts a dispatch waiting on a full
/// output buffer.
pub async fn feed<R, S>(engine: &Engine, input: R, shutdown: S) -> FeedEnd
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    let mut lines = input.lines();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = &mut shutdown => return FeedEnd::Shutdown,
        };
        match line {
            Ok(Some(line)) if line.is_empty() => {}
            Ok(Some(line)) => {
                tokio::select! {
                    _ = engine.dispatch(Message::new(line)) => {}
                    _ = &mut shutdown => {
                        tracing::warn!("shutdown while outputs were full, pending line dropped");
                        return FeedEnd::Shutdown;
                    }
                }
            }
            Ok(None) => return FeedEnd::Eof,
            Err(e) => {
                tracing::error!(error = %e, "failed to read input");
                return FeedEnd::ReadError;
            }
        }
    }
}
