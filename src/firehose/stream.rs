// Relay connection: dial, read frames, hand commits to the worker pool.
//
// Connecting → Streaming → Draining → Closed. Streaming ends on shutdown, on
// an error frame, or on a transport error; the last two are returned as
// errors. Draining closes the socket and the worker queues.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::output::terminal;
use crate::pipeline::workers::WorkerPool;
use crate::stats::{Counter, Counters};

use super::frames::{decode_frame, Frame};

/// Time workers get to finish queued commits once the stream stops.
pub const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Upper bound on sending the websocket close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Streaming,
    Draining,
    Closed,
}

/// What the reader should do after one message.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

pub struct FirehoseStream {
    relay_url: String,
    state: StreamState,
    counters: Arc<Counters>,
    shutdown: watch::Receiver<bool>,
    drain_grace: Duration,
}

impl FirehoseStream {
    pub fn new(relay_url: &str, counters: Arc<Counters>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            relay_url: relay_url.to_string(),
            state: StreamState::Connecting,
            counters,
            shutdown,
            drain_grace: DRAIN_GRACE,
        }
    }

    /// Override how long workers get to finish once streaming stops.
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    fn transition(&mut self, next: StreamState) {
        debug!(from = ?self.state, to = ?next, "Stream state");
        self.state = next;
    }

    /// Run the stream to completion, feeding commits to `pool`.
    pub async fn run(&mut self, pool: WorkerPool) -> Result<()> {
        self.transition(StreamState::Connecting);
        terminal::dialing(&self.relay_url);
        let (mut ws, _) = match tokio_tungstenite::connect_async(self.relay_url.as_str()).await {
            Ok(conn) => conn,
            Err(e) => {
                self.transition(StreamState::Closed);
                return Err(e).with_context(|| format!("dial failure: {}", self.relay_url));
            }
        };

        terminal::stream_started();
        self.transition(StreamState::Streaming);

        // Cloned so the wait can run alongside `handle_message`, which borrows self.
        let mut shutdown = self.shutdown.clone();
        let result = loop {
            let message = tokio::select! {
                () = stopped(&mut shutdown) => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                message = ws.next() => message,
            };

            match message {
                Some(Ok(Message::Binary(data))) => {
                    // Submitting waits for queue space; shutdown must not wait with it.
                    let flow = tokio::select! {
                        () = stopped(&mut shutdown) => {
                            info!("Shutdown requested while a worker queue was full");
                            break Ok(());
                        }
                        flow = self.handle_message(&data, &pool) => flow,
                    };
                    match flow {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Stop) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(frame = ?frame, "Relay closed the connection");
                    break Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e).context("websocket read error"),
                None => {
                    info!("Relay stream ended");
                    break Ok(());
                }
            }
        };

        self.transition(StreamState::Draining);
        match tokio::time::timeout(CLOSE_TIMEOUT, ws.close(None)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Websocket close failed"),
            Err(_) => debug!("Websocket close timed out"),
        }
        pool.close(self.drain_grace).await;

        self.transition(StreamState::Closed);
        terminal::stream_exited();
        result
    }

    /// Decode one binary message and act on it.
    ///
    /// Undecodable frames are logged and skipped. An error frame is fatal.
    pub async fn handle_message(&self, data: &[u8], pool: &WorkerPool) -> Result<Flow> {
        self.counters.incr(Counter::MessagesReceived);

        let frame = match decode_frame(data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, bytes = data.len(), "Skipping undecodable frame");
                return Ok(Flow::Continue);
            }
        };

        match frame {
            Frame::Commit(commit) => {
                if let Err(e) = pool.submit(commit).await {
                    warn!(error = %e, "Worker queue closed, stopping stream");
                    return Ok(Flow::Stop);
                }
            }
            Frame::Error(err) => {
                anyhow::bail!(
                    "error frame: {}: {}",
                    err.error,
                    err.message.as_deref().unwrap_or_default()
                );
            }
            Frame::Unknown(kind) => {
                debug!(kind = %kind, "Ignoring unknown frame type");
            }
            other => match other.to_json() {
                Some(Ok(json)) => terminal::print_frame(other.label(), &json),
                Some(Err(e)) => warn!(label = other.label(), error = %e, "Failed to render frame"),
                None => {}
            },
        }
        Ok(Flow::Continue)
    }
}

/// Resolves once shutdown is flagged or its sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firehose::frames::{encode_frame, ErrorFrame, Info};
    use crate::output::Emitter;
    use crate::pipeline::dispatch::{DispatchOptions, Dispatcher};

    fn pool(counters: &Arc<Counters>) -> WorkerPool {
        let (tx, _rx) = watch::channel(false);
        let dispatcher = Arc::new(Dispatcher::new(
            DispatchOptions::default(),
            None,
            None,
            counters.clone(),
        ));
        let emitter = Arc::new(Emitter::new(None, counters.clone(), None, Arc::new(tx)));
        WorkerPool::spawn(1, dispatcher, emitter)
    }

    fn stream(counters: &Arc<Counters>) -> FirehoseStream {
        let (_tx, rx) = watch::channel(false);
        FirehoseStream::new("wss://relay.invalid", counters.clone(), rx)
    }

    #[tokio::test]
    async fn error_frame_is_fatal() {
        let counters = Arc::new(Counters::new());
        let frame = encode_frame(
            -1,
            None,
            &ErrorFrame {
                error: "ConsumerTooSlow".to_string(),
                message: Some("slow".to_string()),
            },
        );
        let err = stream(&counters)
            .handle_message(&frame, &pool(&counters))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ConsumerTooSlow"));
    }

    #[tokio::test]
    async fn informational_frames_continue() {
        let counters = Arc::new(Counters::new());
        let frame = encode_frame(
            1,
            Some("#info"),
            &Info {
                name: "OutdatedCursor".to_string(),
                message: None,
            },
        );
        let flow = stream(&counters)
            .handle_message(&frame, &pool(&counters))
            .await
            .unwrap();
        assert_eq!(flow, Flow::Continue);
        assert_eq!(counters.get(Counter::MessagesReceived), 1);
    }

    #[tokio::test]
    async fn garbage_is_skipped() {
        let counters = Arc::new(Counters::new());
        let flow = stream(&counters)
            .handle_message(&[0xff, 0xff], &pool(&counters))
            .await
            .unwrap();
        assert_eq!(flow, Flow::Continue);
    }

    #[tokio::test]
    async fn dial_failure_closes() {
        let counters = Arc::new(Counters::new());
        let mut s = stream(&counters);
        assert_eq!(s.state(), StreamState::Connecting);
        let err = s.run(pool(&counters)).await.unwrap_err();
        assert!(err.to_string().contains("dial failure"));
        assert_eq!(s.state(), StreamState::Closed);
    }
}
