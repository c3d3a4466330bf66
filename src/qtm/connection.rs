//! Async RT client.
//!
//! A background reader task owns the socket's read half and demultiplexes
//! incoming packets: command/XML/error packets resolve pending commands in the
//! order they were sent, event packets go to an event queue, and data packets
//! go to the frame stream when one is active.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use super::frame::DataFrame;
use super::packet::{self, Packet, PacketType};
use super::{DEFAULT_PORT, DEFAULT_VERSION, QtmError, QtmEvent, QtmResult};

/// Frames buffered between the reader task and the consumer.
const FRAME_QUEUE_CAPACITY: usize = 512;

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub version: String,
    pub connect_timeout: Duration,
    /// How long a command waits for its reply
    pub reply_timeout: Duration,
    pub max_retry_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            version: DEFAULT_VERSION.to_string(),
            connect_timeout: Duration::from_secs(5),
            reply_timeout: Duration::from_secs(30),
            max_retry_attempts: 3,
            retry_base_delay_ms: 250,
        }
    }
}

#[derive(Debug)]
enum Reply {
    Ok(String),
    Rejected(String),
}

type PendingReplies = Arc<StdMutex<VecDeque<oneshot::Sender<Reply>>>>;
type FrameSink = Arc<StdMutex<Option<mpsc::Sender<DataFrame>>>>;

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct QtmConnection {
    writer: Mutex<OwnedWriteHalf>,
    pending: PendingReplies,
    /// Set once the reader task has stopped; replies can no longer arrive
    closed: Arc<AtomicBool>,
    frame_sink: FrameSink,
    events: Mutex<mpsc::UnboundedReceiver<QtmEvent>>,
    reader: JoinHandle<()>,
    reply_timeout: Duration,
}

impl QtmConnection {
    /// Open the TCP connection, consume the welcome message and negotiate the
    /// protocol version.
    pub async fn connect(options: &ConnectOptions) -> QtmResult<Self> {
        let addr = format!("{}:{}", options.host, options.port);
        debug!("Connecting to QTM at {}", addr);

        let stream = timeout(options.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| QtmError::Timeout(format!("connecting to {}", addr)))??;
        stream.set_nodelay(true)?;
        let (mut read_half, write_half) = stream.into_split();

        let welcome = timeout(options.reply_timeout, packet::read_packet(&mut read_half))
            .await
            .map_err(|_| QtmError::Timeout("waiting for QTM welcome message".to_string()))??;
        if welcome.kind != PacketType::Command {
            return Err(QtmError::Protocol(format!(
                "expected welcome command, got {:?} packet",
                welcome.kind
            )));
        }
        debug!("QTM says: {}", welcome.text());

        let pending: PendingReplies = Arc::new(StdMutex::new(VecDeque::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let frame_sink: FrameSink = Arc::new(StdMutex::new(None));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(
            read_half,
            pending.clone(),
            closed.clone(),
            frame_sink.clone(),
            event_tx,
        ));

        let connection = Self {
            writer: Mutex::new(write_half),
            pending,
            closed,
            frame_sink,
            events: Mutex::new(event_rx),
            reader,
            reply_timeout: options.reply_timeout,
        };

        let command = format!("Version {}", options.version);
        let reply = connection.command(&command).await?;
        if !reply.starts_with("Version set to") {
            return Err(QtmError::UnexpectedReply { command, reply });
        }

        info!("Connected to QTM at {} (protocol {})", addr, options.version);
        Ok(connection)
    }

    /// Send a command string and wait for its reply text.
    pub async fn command(&self, text: &str) -> QtmResult<String> {
        self.request(text, Packet::command(text)).await
    }

    pub async fn take_control(&self, password: &str) -> QtmResult<()> {
        let packet = if password.is_empty() {
            Packet::command("TakeControl")
        } else {
            Packet::command(&format!("TakeControl {}", password))
        };
        // Password stays out of error messages and logs
        let reply = self.request("TakeControl", packet).await?;
        if !reply.contains("master") {
            return Err(QtmError::UnexpectedReply {
                command: "TakeControl".to_string(),
                reply,
            });
        }
        info!("Took control of QTM");
        Ok(())
    }

    pub async fn release_control(&self) -> QtmResult<()> {
        self.command("ReleaseControl").await.map(|_| ())
    }

    /// Create a new measurement.
    pub async fn new_measurement(&self) -> QtmResult<()> {
        self.command("New").await.map(|_| ())
    }

    /// Close the current measurement.
    pub async fn close_measurement(&self) -> QtmResult<()> {
        self.command("Close").await.map(|_| ())
    }

    pub async fn start(&self) -> QtmResult<()> {
        self.command("Start").await.map(|_| ())
    }

    pub async fn stop(&self) -> QtmResult<()> {
        self.command("Stop").await.map(|_| ())
    }

    pub async fn save(&self, filename: &str, overwrite: bool) -> QtmResult<String> {
        let command = if overwrite {
            format!("Save {} Overwrite", filename)
        } else {
            format!("Save {}", filename)
        };
        let reply = self.command(&command).await?;
        if !reply.starts_with("Measurement saved") {
            return Err(QtmError::UnexpectedReply { command, reply });
        }
        Ok(reply)
    }

    /// Insert a labelled event into the running capture.
    pub async fn set_qtm_event(&self, label: &str) -> QtmResult<()> {
        let command = format!("SetQTMEvent {}", label);
        let reply = self.command(&command).await?;
        if !reply.contains("Event set") {
            return Err(QtmError::UnexpectedReply { command, reply });
        }
        Ok(())
    }

    pub async fn send_xml(&self, xml: &str) -> QtmResult<()> {
        self.request("XML settings", Packet::xml(xml)).await.map(|_| ())
    }

    /// `GetParameters` for the given components; returns the XML document.
    pub async fn get_parameters(&self, components: &[&str]) -> QtmResult<String> {
        self.command(&format!("GetParameters {}", components.join(" ")))
            .await
    }

    /// Start streaming frames. QTM does not reply to this command; frames are
    /// delivered on the returned channel until [`Self::stream_frames_stop`].
    pub async fn stream_frames(
        &self,
        frames: &str,
        components: &[&str],
    ) -> QtmResult<mpsc::Receiver<DataFrame>> {
        let (tx, rx) = mpsc::channel(FRAME_QUEUE_CAPACITY);
        *lock(&self.frame_sink) = Some(tx);

        let command = format!("StreamFrames {} {}", frames, components.join(" "));
        debug!("-> {}", command);
        if let Err(e) = self.transmit(&Packet::command(&command), None).await {
            lock(&self.frame_sink).take();
            return Err(e);
        }
        Ok(rx)
    }

    /// Stop streaming and close the frame channel.
    pub async fn stream_frames_stop(&self) -> QtmResult<()> {
        let result = self
            .transmit(&Packet::command("StreamFrames Stop"), None)
            .await;
        lock(&self.frame_sink).take();
        result
    }

    /// Wait for the next event, or the next event equal to `target`.
    ///
    /// Events that arrived since the last call are considered first.
    pub async fn await_event(
        &self,
        target: Option<QtmEvent>,
        wait: Duration,
    ) -> QtmResult<QtmEvent> {
        let deadline = Instant::now() + wait;
        let mut events = self.events.lock().await;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, events.recv()).await {
                Err(_) => {
                    let what = match target {
                        Some(event) => format!("waiting for {:?}", event),
                        None => "waiting for a QTM event".to_string(),
                    };
                    return Err(QtmError::Timeout(what));
                }
                Ok(None) => return Err(QtmError::Disconnected),
                Ok(Some(event)) => {
                    if target.is_none_or(|t| t == event) {
                        return Ok(event);
                    }
                    debug!(?event, "Skipping event");
                }
            }
        }
    }

    /// Shut down the write half and stop the reader task.
    pub async fn disconnect(self) -> QtmResult<()> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }

    async fn request(&self, description: &str, packet: Packet) -> QtmResult<String> {
        debug!("-> {}", description);
        let (tx, rx) = oneshot::channel();
        self.transmit(&packet, Some(tx)).await?;

        match timeout(self.reply_timeout, rx).await {
            Err(_) => Err(QtmError::Timeout(format!(
                "waiting for reply to '{}'",
                description
            ))),
            Ok(Err(_)) => Err(QtmError::Disconnected),
            Ok(Ok(Reply::Ok(text))) => {
                debug!("<- {}", text);
                Ok(text)
            }
            Ok(Ok(Reply::Rejected(message))) => Err(QtmError::Command {
                command: description.to_string(),
                message,
            }),
        }
    }

    /// Replies are matched in send order, so the reply slot is queued while the
    /// writer lock is held. Once the reader has stopped the packet is still
    /// written, but the reply slot is dropped and the caller sees
    /// [`QtmError::Disconnected`] instead of waiting out the reply timeout.
    async fn transmit(
        &self,
        packet: &Packet,
        reply: Option<oneshot::Sender<Reply>>,
    ) -> QtmResult<()> {
        let mut writer = self.writer.lock().await;
        let mut queued = false;
        if let Some(tx) = reply {
            let mut pending = lock(&self.pending);
            if !self.closed.load(Ordering::SeqCst) {
                pending.push_back(tx);
                queued = true;
            }
        }
        if let Err(e) = packet::write_packet(&mut *writer, packet).await {
            if queued {
                lock(&self.pending).pop_back();
            }
            return Err(e);
        }
        Ok(())
    }
}

impl Drop for QtmConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    pending: PendingReplies,
    closed: Arc<AtomicBool>,
    frame_sink: FrameSink,
    events: mpsc::UnboundedSender<QtmEvent>,
) {
    loop {
        let packet = match packet::read_packet(&mut reader).await {
            Ok(packet) => packet,
            Err(QtmError::Disconnected) => {
                debug!("QTM closed the connection");
                break;
            }
            Err(e) => {
                warn!("QTM read error: {}", e);
                break;
            }
        };

        match packet.kind {
            PacketType::Command | PacketType::Xml => resolve(&pending, Reply::Ok(packet.text())),
            PacketType::Error => resolve(&pending, Reply::Rejected(packet.text())),
            PacketType::Event => {
                match packet.payload.first().copied().and_then(QtmEvent::from_byte) {
                    Some(event) => {
                        debug!(?event, "QTM event");
                        let _ = events.send(event);
                    }
                    None => warn!("Unknown QTM event payload {:?}", packet.payload),
                }
            }
            PacketType::Data => {
                let sink = lock(&frame_sink).clone();
                if let Some(sink) = sink {
                    match DataFrame::parse(&packet.payload) {
                        Ok(frame) => {
                            if let Err(mpsc::error::TrySendError::Full(frame)) = sink.try_send(frame) {
                                warn!("Frame queue full, dropping frame {}", frame.frame_number);
                            }
                        }
                        Err(e) => warn!("Dropping malformed data packet: {}", e),
                    }
                }
            }
            PacketType::NoMoreData => debug!("QTM has no more data"),
            other => debug!("Ignoring {:?} packet", other),
        }
    }

    // Dropping the reply senders fails every waiting command with Disconnected
    {
        let mut waiting = lock(&pending);
        closed.store(true, Ordering::SeqCst);
        waiting.clear();
    }
    lock(&frame_sink).take();
}

fn resolve(pending: &PendingReplies, reply: Reply) {
    match lock(pending).pop_front() {
        Some(tx) => {
            let _ = tx.send(reply);
        }
        None => debug!("Unsolicited reply: {:?}", reply),
    }
}

/// Connect with jittered back-off between attempts.
pub async fn connect_with_retry(options: &ConnectOptions) -> QtmResult<QtmConnection> {
    let attempts = options.max_retry_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let jitter = fastrand::u64(0..50);
            let delay = Duration::from_millis(
                options.retry_base_delay_ms * u64::from(attempt) + jitter,
            );
            info!("Retrying QTM connection in {:?}...", delay);
            tokio::time::sleep(delay).await;
        }

        match QtmConnection::connect(options).await {
            Ok(connection) => {
                if attempt > 0 {
                    info!("Connected to QTM on attempt {}", attempt + 1);
                }
                return Ok(connection);
            }
            Err(e) => {
                warn!("QTM connection attempt {} failed: {}", attempt + 1, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or(QtmError::Disconnected))
}
