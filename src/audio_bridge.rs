//! UDP transport between the pipeline threads and the network.
//!
//! Sockets live on the tokio runtime. The blocking pipeline side talks to
//! them through a tokio mpsc channel (outgoing) or a [`BoundedFrameQueue`]
//! (incoming), so audio threads never await.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::audio::{BoundedFrameQueue, CaptureSource, Frame, PlaybackSink};

/// Largest datagram accepted by [`UdpReceiver`].
const MAX_DATAGRAM: usize = 2048;
/// How often a blocked receiver or source rechecks for shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);
/// Frames buffered between [`UdpSink`] and [`UdpSender`].
const SEND_CHANNEL_CAPACITY: usize = 100;

/// Async task that drains encoded frames into a UDP socket.
pub struct UdpSender {
    socket: UdpSocket,
    target: SocketAddr,
    rx: mpsc::Receiver<Bytes>,
}

impl UdpSender {
    /// Bind `bind` and pair the sender with a [`UdpSink`] for the pipeline.
    pub async fn bind(bind: &str, target: &str) -> Result<(Self, UdpSink)> {
        let socket = UdpSocket::bind(bind)
            .await
            .with_context(|| format!("Failed to bind UDP socket {}", bind))?;
        let target = tokio::net::lookup_host(target)
            .await?
            .next()
            .with_context(|| format!("Cannot resolve UDP target {}", target))?;
        let (tx, rx) = mpsc::channel(SEND_CHANNEL_CAPACITY);
        log::info!("UDP sender {} -> {}", socket.local_addr()?, target);
        Ok((Self { socket, target, rx }, UdpSink { tx }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Send until every [`UdpSink`] has been dropped.
    pub async fn run(mut self) -> Result<()> {
        let mut sent = 0u64;
        while let Some(frame) = self.rx.recv().await {
            if let Err(e) = self.socket.send_to(&frame, self.target).await {
                log::warn!("UDP send to {} failed: {}", self.target, e);
                continue;
            }
            sent += 1;
        }
        log::info!("UDP sender closed after {} datagrams", sent);
        Ok(())
    }
}

/// [`PlaybackSink`] handing frames to a [`UdpSender`] task.
pub struct UdpSink {
    tx: mpsc::Sender<Bytes>,
}

impl PlaybackSink for UdpSink {
    fn name(&self) -> &str {
        "udp"
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.tx
            .blocking_send(Bytes::copy_from_slice(data))
            .map_err(|_| anyhow::anyhow!("UDP sender task has stopped"))
    }
}

/// Async task offering received datagrams into a frame queue.
pub struct UdpReceiver {
    socket: UdpSocket,
    queue: Arc<BoundedFrameQueue<Frame>>,
}

impl UdpReceiver {
    pub async fn bind(bind: &str, queue: Arc<BoundedFrameQueue<Frame>>) -> Result<Self> {
        let socket = UdpSocket::bind(bind)
            .await
            .with_context(|| format!("Failed to bind UDP socket {}", bind))?;
        log::info!("UDP receiver listening on {}", socket.local_addr()?);
        Ok(Self { socket, queue })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive until the queue is shut down.
    pub async fn run(self) -> Result<()> {
        let mut buf = [0u8; MAX_DATAGRAM];
        while !self.queue.is_shutdown() {
            let recv = tokio::time::timeout(SHUTDOWN_POLL, self.socket.recv_from(&mut buf)).await;
            let Ok(result) = recv else {
                continue;
            };
            let len = match result {
                Ok((len, _)) => len,
                Err(e) if is_transient(&e) => {
                    log::warn!("UDP receive error, continuing: {}", e);
                    continue;
                }
                Err(e) => {
                    // Ends the stream for the pipeline reading this queue.
                    self.queue.shutdown();
                    return Err(e).context("UDP receive failed");
                }
            };
            if len > 0 {
                self.queue.offer(Frame::new(Bytes::copy_from_slice(&buf[..len])));
            }
        }
        log::info!("UDP receiver stopped, {} datagrams dropped", self.queue.dropped());
        Ok(())
    }
}

/// A spawned [`UdpReceiver`] together with the queue it fills.
pub struct UdpInput {
    queue: Arc<BoundedFrameQueue<Frame>>,
    local_addr: SocketAddr,
    task: tokio::task::JoinHandle<Result<()>>,
}

impl UdpInput {
    /// Bind `bind` and start receiving into a queue of `capacity` frames.
    pub async fn spawn(bind: &str, capacity: usize) -> Result<Self> {
        let queue = Arc::new(BoundedFrameQueue::new("udp-in", capacity));
        let receiver = UdpReceiver::bind(bind, queue.clone()).await?;
        let local_addr = receiver.local_addr()?;
        let task = tokio::spawn(receiver.run());
        Ok(Self {
            queue,
            local_addr,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Capture source reading this input's queue.
    pub fn source(&self) -> QueueSource {
        QueueSource::new(self.queue.clone())
    }

    /// Shut the queue down and wait for the receiver task to exit.
    pub async fn close(self) -> Result<()> {
        self.queue.shutdown();
        let result = self.task.await?;
        if let Err(e) = &result {
            log::error!("UDP receiver error: {:#}", e);
        }
        result
    }
}

/// Socket errors a receive loop survives, e.g. ICMP port unreachable
/// surfacing as a reset.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

/// [`CaptureSource`] reading frames a network task offers into a queue.
///
/// The stream ends when the queue is shut down.
pub struct QueueSource {
    queue: Arc<BoundedFrameQueue<Frame>>,
}

impl QueueSource {
    pub fn new(queue: Arc<BoundedFrameQueue<Frame>>) -> Self {
        Self { queue }
    }
}

impl CaptureSource for QueueSource {
    fn name(&self) -> &str {
        self.queue.name()
    }

    fn read(&mut self) -> Result<Option<Bytes>> {
        match self.queue.take_timeout(SHUTDOWN_POLL) {
            Some(frame) => Ok(Some(frame.into_bytes())),
            None if self.queue.is_shutdown() => Ok(self.queue.poll().map(Frame::into_bytes)),
            None => Ok(Some(Bytes::new())),
        }
    }
}
