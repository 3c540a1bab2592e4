//! Drinkers: the kettle-side handle, its bounded outbound mailbox, and the
//! per-connection agent that turns inbound frames into kettle commands.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use brew_core::{Command, DrinkRequest, DrinkerId, KettleError, ProtocolError, Response};
use brew_telemetry::metrics::MAILBOX_DROPS_TOTAL;

use crate::kettle::KettleHandle;

/// Sent back when an inbound frame cannot be decoded.
pub const PARSE_ERROR: &str = "Could not parse request";

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MailboxError {
    #[error("mailbox full")]
    Full,
    #[error("mailbox closed")]
    Closed,
}

impl MailboxError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Closed => "closed",
        }
    }
}

/// Producer side of a drinker's outbound queue.
///
/// Sends never block. Once [`Mailbox::close`] has been called every send is
/// refused and the paired [`MailboxReceiver`] drains what is left, then ends.
#[derive(Clone, Debug)]
pub struct Mailbox {
    tx: mpsc::Sender<Arc<String>>,
    closed: CancellationToken,
}

/// Consumer side, owned by the connection's writer task.
#[derive(Debug)]
pub struct MailboxReceiver {
    rx: mpsc::Receiver<Arc<String>>,
    closed: CancellationToken,
}

/// Create a bounded mailbox pair.
pub fn mailbox(capacity: usize) -> (Mailbox, MailboxReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let closed = CancellationToken::new();
    (
        Mailbox {
            tx,
            closed: closed.clone(),
        },
        MailboxReceiver { rx, closed },
    )
}

impl Mailbox {
    pub fn try_send(&self, message: Arc<String>) -> Result<(), MailboxError> {
        if self.closed.is_cancelled() {
            return Err(MailboxError::Closed);
        }
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => MailboxError::Full,
            mpsc::error::TrySendError::Closed(_) => MailboxError::Closed,
        })
    }

    /// Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }
}

impl MailboxReceiver {
    /// Next queued message. `None` once the mailbox is closed and drained.
    pub async fn recv(&mut self) -> Option<Arc<String>> {
        tokio::select! {
            biased;
            msg = self.rx.recv() => msg,
            _ = self.closed.cancelled() => self.rx.try_recv().ok(),
        }
    }

    /// Next message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Arc<String>> {
        self.rx.try_recv().ok()
    }
}

/// The kettle's view of one connected drinker. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Drinker {
    id: DrinkerId,
    name: Arc<str>,
    mailbox: Mailbox,
}

impl Drinker {
    /// New drinker with a fresh id and a mailbox of `capacity` messages.
    pub fn new(name: impl Into<Arc<str>>, capacity: usize) -> (Self, MailboxReceiver) {
        let (mailbox, rx) = mailbox(capacity);
        (
            Self {
                id: DrinkerId::new(),
                name: name.into(),
                mailbox,
            },
            rx,
        )
    }

    pub fn id(&self) -> &DrinkerId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Queue an already-serialized message.
    pub fn deliver(&self, message: Arc<String>) -> Result<(), MailboxError> {
        self.mailbox.try_send(message)
    }

    /// Queue an acknowledgement for this drinker only. Returns `false` if it was dropped.
    pub fn send_response(&self, response: &Response) -> bool {
        let json = match response.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(drinker_id = %self.id, error = %e, "failed to encode response");
                return false;
            }
        };
        match self.deliver(Arc::new(json)) {
            Ok(()) => true,
            Err(e) => {
                warn!(drinker_id = %self.id, reason = e.kind(), "dropping response");
                counter!(MAILBOX_DROPS_TOTAL, "kind" => "response").increment(1);
                false
            }
        }
    }
}

/// Per-connection actor owning the inbound path.
pub struct DrinkerAgent {
    drinker: Drinker,
    kettle: KettleHandle,
}

impl DrinkerAgent {
    pub fn new(drinker: Drinker, kettle: KettleHandle) -> Self {
        Self { drinker, kettle }
    }

    pub fn drinker(&self) -> &Drinker {
        &self.drinker
    }

    pub fn kettle(&self) -> &KettleHandle {
        &self.kettle
    }

    /// Decode one text frame and forward it.
    ///
    /// Undecodable frames are answered with [`PARSE_ERROR`] and otherwise
    /// ignored. An `Err` means the kettle is gone and the connection should end.
    pub async fn handle_frame(&self, text: &str) -> Result<(), KettleError> {
        self.dispatch(Command::parse(text)).await
    }

    /// Binary frames are accepted when they carry UTF-8 JSON.
    pub async fn handle_bytes(&self, data: &[u8]) -> Result<(), KettleError> {
        self.dispatch(Command::from_bytes(data)).await
    }

    async fn dispatch(&self, decoded: Result<Command, ProtocolError>) -> Result<(), KettleError> {
        match decoded {
            Ok(command) => self.handle_command(command).await,
            Err(e) => {
                debug!(drinker_id = %self.drinker.id, error = %e, "unparseable frame");
                let _ = self.drinker.send_response(&Response::error(PARSE_ERROR));
                Ok(())
            }
        }
    }

    pub async fn handle_command(&self, command: Command) -> Result<(), KettleError> {
        let id = self.drinker.id.clone();
        debug!(drinker_id = %id, method = command.method(), "command received");
        match command {
            Command::Offer => self.kettle.offer(id).await,
            Command::Request(frame) => {
                self.kettle
                    .request(DrinkRequest {
                        drinker_id: id,
                        drinker_name: self.drinker.name.to_string(),
                        request: frame,
                    })
                    .await
            }
            Command::Completion => self.kettle.round_completed(id).await,
            Command::Unknown(method) => {
                info!(drinker_id = %id, method = %method, "ignoring unknown method");
                Ok(())
            }
        }
    }

    /// Deregister from the kettle.
    pub async fn leave(&self) -> Result<(), KettleError> {
        self.kettle.deregister(self.drinker.id.clone()).await
    }
}
