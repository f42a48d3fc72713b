//! Session actor
//!
//! The [`SessionActor`] is the owning context for a [`SessionManager`]. It
//! runs as one task that selects over UI commands and transport events, so
//! every transcript mutation happens sequentially in the order it was
//! received. The UI talks to it through a cloneable [`SessionHandle`] and
//! reads changes from the [`TranscriptUpdate`] broadcast stream.

use std::sync::Arc;

use confab_core::{PeerId, PeerIdentity, ResourceHandle, SessionState, TransferId, Transport};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use confab_logging::PeerContextGuard;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::config::SessionConfig;
use crate::entry::TranscriptEntry;
use crate::error::{SendError, SessionError, SessionResult, TrackerError};
use crate::manager::{SessionManager, TranscriptUpdate};
use crate::store::{FsResourceStore, ResourceStore};
use crate::tracker::TransferSubscription;

type Reply<T> = oneshot::Sender<T>;

/// Requests the UI sends to the actor
enum SessionCommand {
    SendText {
        text: String,
        reply: Reply<Result<TranscriptEntry, SendError>>,
    },
    SendResource {
        resource: ResourceHandle,
        reply: Reply<Result<TranscriptEntry, SendError>>,
    },
    Connect {
        peer: PeerIdentity,
        reply: Reply<SessionResult<()>>,
    },
    Disconnect {
        peer: PeerId,
        reply: Reply<SessionResult<()>>,
    },
    CancelTransfer {
        transfer_id: TransferId,
        reply: Reply<SessionResult<()>>,
    },
    WatchTransfer {
        transfer_id: TransferId,
        reply: Reply<Result<TransferSubscription, TrackerError>>,
    },
    Transcript {
        reply: Reply<Vec<TranscriptEntry>>,
    },
    ConnectedPeers {
        reply: Reply<Vec<PeerIdentity>>,
    },
    PeerState {
        peer: PeerId,
        reply: Reply<SessionState>,
    },
    Shutdown,
}

/// Handle for talking to a running [`SessionActor`]
#[derive(Clone)]
pub struct SessionHandle {
    local: PeerIdentity,
    commands: mpsc::Sender<SessionCommand>,
    updates: broadcast::Sender<TranscriptUpdate>,
}

impl SessionHandle {
    /// Our identity
    pub fn local_identity(&self) -> &PeerIdentity {
        &self.local
    }

    /// Subscribe to transcript changes
    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptUpdate> {
        self.updates.subscribe()
    }

    /// Send a text message to every connected peer
    pub async fn send_text(&self, text: impl Into<String>) -> SessionResult<TranscriptEntry> {
        let text = text.into();
        Ok(self
            .request(|reply| SessionCommand::SendText { text, reply })
            .await??)
    }

    /// Send a resource to every connected peer
    pub async fn send_resource(&self, resource: ResourceHandle) -> SessionResult<TranscriptEntry> {
        Ok(self
            .request(|reply| SessionCommand::SendResource { resource, reply })
            .await??)
    }

    /// Connect to a discovered peer
    pub async fn connect(&self, peer: PeerIdentity) -> SessionResult<()> {
        self.request(|reply| SessionCommand::Connect { peer, reply })
            .await?
    }

    /// Disconnect from a peer
    pub async fn disconnect(&self, peer: PeerId) -> SessionResult<()> {
        self.request(|reply| SessionCommand::Disconnect { peer, reply })
            .await?
    }

    /// Cancel an in-flight transfer
    pub async fn cancel_transfer(&self, transfer_id: TransferId) -> SessionResult<()> {
        self.request(|reply| SessionCommand::CancelTransfer { transfer_id, reply })
            .await?
    }

    /// Observe progress of a tracked transfer
    pub async fn watch_transfer(&self, transfer_id: TransferId) -> SessionResult<TransferSubscription> {
        Ok(self
            .request(|reply| SessionCommand::WatchTransfer { transfer_id, reply })
            .await??)
    }

    /// Snapshot of the transcript
    pub async fn transcript(&self) -> SessionResult<Vec<TranscriptEntry>> {
        self.request(|reply| SessionCommand::Transcript { reply })
            .await
    }

    /// Peers whose session is established
    pub async fn connected_peers(&self) -> SessionResult<Vec<PeerIdentity>> {
        self.request(|reply| SessionCommand::ConnectedPeers { reply })
            .await
    }

    /// Current state of a peer
    pub async fn peer_state(&self, peer: PeerId) -> SessionResult<SessionState> {
        self.request(|reply| SessionCommand::PeerState { peer, reply })
            .await
    }

    /// Stop the actor
    ///
    /// Commands already queued are handled first.
    pub async fn shutdown(&self) -> SessionResult<()> {
        self.commands
            .send(SessionCommand::Shutdown)
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Check if the actor is still running
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> SessionResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }
}

/// Task owning the session state
pub struct SessionActor {
    manager: SessionManager,
    transport: Arc<dyn Transport>,
    commands: mpsc::Receiver<SessionCommand>,
}

impl SessionActor {
    /// Spawn an actor that stores received resources on disk
    ///
    /// Resources land in `config.resource_dir`.
    pub async fn start(
        transport: Arc<dyn Transport>,
        config: &SessionConfig,
    ) -> SessionResult<(SessionHandle, JoinHandle<()>)> {
        let store = FsResourceStore::new(&config.resource_dir).await?;
        Ok(Self::spawn(transport, Arc::new(store), config))
    }

    /// Spawn an actor as a background task
    pub fn spawn(
        transport: Arc<dyn Transport>,
        store: Arc<dyn ResourceStore>,
        config: &SessionConfig,
    ) -> (SessionHandle, JoinHandle<()>) {
        let manager = SessionManager::with_update_capacity(
            transport.clone(),
            store,
            config.update_channel_capacity,
        );
        let (command_tx, command_rx) = mpsc::channel(config.command_channel_capacity.max(1));

        let handle = SessionHandle {
            local: manager.local_identity().clone(),
            commands: command_tx,
            updates: manager.update_sender(),
        };
        let actor = Self {
            manager,
            transport,
            commands: command_rx,
        };

        let span = session_span(&handle.local);
        let task = tokio::spawn(
            async move {
                actor.run().await;
            }
            .instrument(span),
        );
        (handle, task)
    }

    /// Run the actor loop until shutdown, handle drop or transport close
    async fn run(mut self) {
        info!(peer = %self.manager.local_identity(), "Session actor started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => {
                        info!("Session actor shutting down");
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                },
                event = self.transport.recv() => match event {
                    Ok(event) => {
                        let kind = event.kind();
                        if let Err(e) = self.manager.handle_event(event).await {
                            warn!(kind, error = %e, "Failed to handle transport event");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Transport closed");
                        break;
                    }
                },
            }
        }

        debug!(entries = self.manager.transcript().count(), "Session actor stopped");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        // A dropped reply receiver only means the caller stopped waiting
        match command {
            SessionCommand::SendText { text, reply } => {
                let _ = reply.send(self.manager.send_text(&text).await);
            }
            SessionCommand::SendResource { resource, reply } => {
                let _ = reply.send(self.manager.send_resource(resource).await);
            }
            SessionCommand::Connect { peer, reply } => {
                let _ = reply.send(self.manager.connect(peer).await);
            }
            SessionCommand::Disconnect { peer, reply } => {
                let _ = reply.send(self.manager.disconnect(&peer).await);
            }
            SessionCommand::CancelTransfer { transfer_id, reply } => {
                let _ = reply.send(self.manager.cancel_transfer(transfer_id).await);
            }
            SessionCommand::WatchTransfer { transfer_id, reply } => {
                let _ = reply.send(self.manager.watch_transfer(transfer_id));
            }
            SessionCommand::Transcript { reply } => {
                let _ = reply.send(self.manager.transcript().snapshot());
            }
            SessionCommand::ConnectedPeers { reply } => {
                let _ = reply.send(self.manager.connected_peers());
            }
            SessionCommand::PeerState { peer, reply } => {
                let _ = reply.send(self.manager.peer_state(&peer));
            }
            SessionCommand::Shutdown => {}
        }
    }
}

/// Span for everything the actor logs, tagged with the local peer
fn session_span(local: &PeerIdentity) -> Span {
    let _context = PeerContextGuard::new(local);
    info_span!("session", peer = %local)
}
