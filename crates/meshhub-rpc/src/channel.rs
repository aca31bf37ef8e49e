//! The multiplexed RPC channel: one duplex byte stream, many concurrent
//! calls in both directions.
//!
//! Frames are JSON inside length-delimited chunks. A single writer task
//! serializes all outbound frames onto the stream; the read loop routes
//! replies to their pending calls by correlation id and dispatches inbound
//! calls on their own tasks, so no call blocks another.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use meshhub_core::Frame;

use crate::errors::CallError;
use crate::registry::MethodRegistry;

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<Result<Value, CallError>>>>;

struct ChannelInner {
    next_id: AtomicU64,
    pending: PendingMap,
    out_tx: mpsc::Sender<Frame>,
    closed: CancellationToken,
}

/// Constructor for a channel over a duplex byte stream.
pub struct RpcChannel;

impl RpcChannel {
    /// Wrap a stream, returning the call handle and the driver to spawn.
    ///
    /// `max_frame_bytes` bounds a single frame; `buffer` is the outbound
    /// queue depth shared by calls, replies, and notifications.
    pub fn new<S>(stream: S, max_frame_bytes: usize, buffer: usize) -> (ChannelHandle, ChannelDriver<S>)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(max_frame_bytes)
            .new_codec();
        let framed = Framed::new(stream, codec);
        let (out_tx, out_rx) = mpsc::channel(buffer);
        let inner = Arc::new(ChannelInner {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            out_tx,
            closed: CancellationToken::new(),
        });
        (
            ChannelHandle {
                inner: inner.clone(),
            },
            ChannelDriver {
                framed,
                out_rx,
                inner,
            },
        )
    }
}

/// Cloneable handle for issuing calls on a channel.
#[derive(Clone)]
pub struct ChannelHandle {
    inner: Arc<ChannelInner>,
}

impl ChannelHandle {
    /// Issue a call and await its reply.
    ///
    /// Any number of calls may be outstanding at once; replies are matched
    /// by correlation id regardless of arrival order.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, CallError> {
        if self.inner.closed.is_cancelled() {
            return Err(CallError::Closed);
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let _ = self.inner.pending.lock().insert(id, tx);

        let frame = Frame::Call {
            id,
            method: method.to_owned(),
            args,
        };
        if self.inner.out_tx.send(frame).await.is_err() {
            let _ = self.inner.pending.lock().remove(&id);
            return Err(CallError::Closed);
        }

        // Race the reply against teardown: a call registered while the
        // driver is draining would otherwise wait forever.
        let mut rx = rx;
        tokio::select! {
            biased;
            outcome = &mut rx => match outcome {
                Ok(outcome) => outcome,
                Err(_) => Err(CallError::Closed),
            },
            () = self.inner.closed.cancelled() => {
                let _ = self.inner.pending.lock().remove(&id);
                Err(CallError::Closed)
            }
        }
    }

    /// Issue a call raced against an independent timer.
    ///
    /// On timeout the wait is abandoned but the remote operation is not
    /// cancelled; its eventual reply is discarded on arrival. The timer is
    /// dropped on either outcome.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        args: Vec<Value>,
        limit: Duration,
    ) -> Result<Value, CallError> {
        match tokio::time::timeout(limit, self.call(method, args)).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => Err(CallError::TimedOut),
        }
    }

    /// Fire-and-forget call: no reply is awaited, a late reply is dropped.
    ///
    /// Returns `false` when the outbound queue is full or the channel is
    /// closed. Safe to invoke from synchronous code.
    pub fn notify(&self, method: &str, args: Vec<Value>) -> bool {
        if self.inner.closed.is_cancelled() {
            return false;
        }
        let frame = Frame::Call {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            method: method.to_owned(),
            args,
        };
        if self.inner.out_tx.try_send(frame).is_ok() {
            true
        } else {
            warn!(method, "dropping notification (outbound queue full or closed)");
            false
        }
    }

    /// Tear the channel down. Idempotent.
    pub fn close(&self) {
        self.inner.closed.cancel();
    }

    /// Whether the channel has been torn down.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Resolves once the channel is torn down (stream end, error, or
    /// explicit close).
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await;
    }

    /// Number of calls still awaiting a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

/// Owns the stream halves; `run` must be spawned for the channel to make
/// progress.
pub struct ChannelDriver<S> {
    framed: Framed<S, LengthDelimitedCodec>,
    out_rx: mpsc::Receiver<Frame>,
    inner: Arc<ChannelInner>,
}

impl<S> ChannelDriver<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Pump frames until the stream ends, errors, or the channel is closed.
    ///
    /// Inbound calls dispatch through `registry` with `ctx`, each on its own
    /// task. On teardown every pending call is rejected with
    /// [`CallError::Closed`].
    pub async fn run<C>(self, registry: Arc<MethodRegistry<C>>, ctx: Arc<C>)
    where
        C: Send + Sync + 'static,
    {
        let Self {
            framed,
            mut out_rx,
            inner,
        } = self;
        let (mut sink, mut frames) = framed.split();

        // Writer: sole owner of the sink, serializing all outbound frames.
        let write_cancel = inner.closed.clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = out_rx.recv() => {
                        let Some(frame) = frame else { break };
                        let encoded = match serde_json::to_vec(&frame) {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                warn!(error = %e, "failed to encode frame");
                                continue;
                            }
                        };
                        if sink.send(Bytes::from(encoded)).await.is_err() {
                            break;
                        }
                    }
                    () = write_cancel.cancelled() => break,
                }
            }
            let _ = sink.close().await;
        });

        loop {
            tokio::select! {
                frame = frames.next() => {
                    match frame {
                        Some(Ok(bytes)) => match serde_json::from_slice::<Frame>(&bytes) {
                            Ok(Frame::Call { id, method, args }) => {
                                let registry = registry.clone();
                                let ctx = ctx.clone();
                                let out = inner.out_tx.clone();
                                drop(tokio::spawn(async move {
                                    let reply = match registry.dispatch(&method, args, &ctx).await {
                                        Ok(value) => Frame::reply_ok(id, value),
                                        Err(err) => Frame::reply_err(id, err.to_string()),
                                    };
                                    let _ = out.send(reply).await;
                                }));
                            }
                            Ok(Frame::Reply { id, result, error }) => {
                                let waiter = inner.pending.lock().remove(&id);
                                if let Some(tx) = waiter {
                                    let outcome = match error {
                                        Some(message) => Err(CallError::Remote(message)),
                                        None => Ok(result.unwrap_or(Value::Null)),
                                    };
                                    // The caller may have timed out and gone away.
                                    let _ = tx.send(outcome);
                                } else {
                                    debug!(id, "discarding reply with no pending call");
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "unparseable frame, closing channel");
                                break;
                            }
                        },
                        Some(Err(e)) => {
                            debug!(error = %e, "stream error");
                            break;
                        }
                        None => break,
                    }
                }
                () = inner.closed.cancelled() => break,
            }
        }

        inner.closed.cancel();
        let rejected: Vec<_> = {
            let mut pending = inner.pending.lock();
            pending.drain().collect()
        };
        for (_, tx) in rejected {
            let _ = tx.send(Err(CallError::Closed));
        }
        let _ = writer.await;
    }
}
