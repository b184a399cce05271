//! Interactive shell sessions.
//!
//! [`InteractiveSession`] walks a channel through the pty and shell
//! negotiation and then hands it to a driver task that owns the channel
//! for its remaining lifetime. The public API talks to the driver over
//! queues, so writes, resizes and reads never contend for the channel.

use std::{
    io::Cursor,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
};

use async_trait::async_trait;
use cw_types::TerminalGeometry;
use russh::{client, Channel, ChannelMsg, Pty};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::SharedSessionHandle;
use crate::{
    error::SshCoreError,
    terminal::{interactive_pty_modes, DEFAULT_TERM},
};

type Result<T> = crate::SshResult<T>;

/// Lifecycle of an interactive session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShellState {
    Idle,
    ChannelOpen,
    PtyNegotiated,
    ShellRunning,
    Closed,
}

impl ShellState {
    fn name(self) -> &'static str {
        match self {
            ShellState::Idle => "idle",
            ShellState::ChannelOpen => "channel-open",
            ShellState::PtyNegotiated => "pty-negotiated",
            ShellState::ShellRunning => "shell-running",
            ShellState::Closed => "closed",
        }
    }
}

/// Something the channel produced while the shell was running.
#[derive(Debug)]
pub enum ShellEvent {
    Data(Vec<u8>),
    Error(String),
}

/// Transport seam for interactive sessions.
#[async_trait]
pub trait ShellSession: Send + Sync {
    type Channel: ShellChannel + Send + 'static;

    async fn open_shell_channel(&self) -> Result<Self::Channel>;

    async fn disconnect(&self);
}

/// Channel operations an interactive session needs.
#[async_trait]
pub trait ShellChannel {
    async fn request_pty(
        &self,
        term: &str,
        geometry: TerminalGeometry,
        modes: &[(Pty, u32)],
    ) -> Result<()>;

    async fn request_shell(&self) -> Result<()>;

    async fn window_change(&self, geometry: TerminalGeometry) -> Result<()>;

    async fn data(&self, bytes: &[u8]) -> Result<()>;

    /// Next event from the server, or `None` once the channel is done.
    async fn wait(&mut self) -> Option<ShellEvent>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl<H> ShellSession for SharedSessionHandle<H>
where
    H: client::Handler + Send + Sync,
{
    type Channel = Channel<client::Msg>;

    async fn open_shell_channel(&self) -> Result<Self::Channel> {
        Ok(self.as_ref().channel_open_session().await?)
    }

    async fn disconnect(&self) {
        super::disconnect(self.as_ref()).await;
    }
}

#[async_trait]
impl ShellChannel for Channel<client::Msg> {
    async fn request_pty(
        &self,
        term: &str,
        geometry: TerminalGeometry,
        modes: &[(Pty, u32)],
    ) -> Result<()> {
        Channel::request_pty(
            self,
            true,
            term,
            geometry.columns,
            geometry.rows,
            geometry.pixel_width,
            geometry.pixel_height,
            modes,
        )
        .await?;
        Ok(())
    }

    async fn request_shell(&self) -> Result<()> {
        Channel::request_shell(self, true).await?;
        Ok(())
    }

    async fn window_change(&self, geometry: TerminalGeometry) -> Result<()> {
        Channel::window_change(
            self,
            geometry.columns,
            geometry.rows,
            geometry.pixel_width,
            geometry.pixel_height,
        )
        .await?;
        Ok(())
    }

    async fn data(&self, bytes: &[u8]) -> Result<()> {
        let mut cursor = Cursor::new(bytes.to_vec());
        Channel::data(self, &mut cursor).await?;
        Ok(())
    }

    async fn wait(&mut self) -> Option<ShellEvent> {
        loop {
            match Channel::wait(self).await? {
                ChannelMsg::Data { data } => return Some(ShellEvent::Data(data.to_vec())),
                ChannelMsg::ExtendedData { data, .. } => {
                    return Some(ShellEvent::Data(data.to_vec()))
                }
                ChannelMsg::Close | ChannelMsg::Eof => return None,
                _ => {}
            }
        }
    }

    async fn close(&self) -> Result<()> {
        Channel::close(self).await?;
        Ok(())
    }
}

enum ChannelCommand {
    Data(Vec<u8>),
    WindowChange(TerminalGeometry),
    Close,
}

enum OutputEvent {
    Chunk(String),
    ReadError(String),
}

struct ShellShared {
    state: StdMutex<ShellState>,
    closed: AtomicBool,
}

impl ShellShared {
    fn new() -> Self {
        Self { state: StdMutex::new(ShellState::Idle), closed: AtomicBool::new(false) }
    }

    fn state(&self) -> ShellState {
        *self.state.lock().expect("shell state lock poisoned")
    }

    fn set_state(&self, state: ShellState) {
        *self.state.lock().expect("shell state lock poisoned") = state;
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Flip the closed flag. True for the caller that flipped it.
    fn begin_close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }
}

/// An interactive remote shell over one SSH channel.
pub struct InteractiveSession<S>
where
    S: ShellSession,
{
    session: S,
    shared: Arc<ShellShared>,
    commands: Option<UnboundedSender<ChannelCommand>>,
    output: Arc<tokio::sync::Mutex<Option<UnboundedReceiver<OutputEvent>>>>,
    geometry: StdMutex<Option<TerminalGeometry>>,
    disconnect_on_close: bool,
    session_released: AtomicBool,
}

impl<S> InteractiveSession<S>
where
    S: ShellSession,
{
    pub fn new(session: S) -> Self {
        Self {
            session,
            shared: Arc::new(ShellShared::new()),
            commands: None,
            output: Arc::new(tokio::sync::Mutex::new(None)),
            geometry: StdMutex::new(None),
            disconnect_on_close: false,
            session_released: AtomicBool::new(false),
        }
    }

    /// Also disconnect the underlying session when this shell closes.
    pub fn disconnect_session_on_close(mut self, enabled: bool) -> Self {
        self.disconnect_on_close = enabled;
        self
    }

    pub fn state(&self) -> ShellState {
        self.shared.state()
    }

    pub fn geometry(&self) -> Option<TerminalGeometry> {
        *self.geometry.lock().expect("geometry lock poisoned")
    }

    /// Open a channel, negotiate a pty of `rows` by `columns` cells, and
    /// start the remote shell. Any failure closes the channel and leaves
    /// the session closed.
    pub async fn invoke_shell(&mut self, rows: u16, columns: u16) -> Result<()> {
        let state = self.shared.state();
        if state != ShellState::Idle {
            return Err(SshCoreError::InvalidState {
                operation: "invoke shell",
                state: state.name(),
            });
        }

        let channel = self
            .session
            .open_shell_channel()
            .await
            .map_err(|err| SshCoreError::ChannelOpenFailed(err.to_string()))?;
        self.shared.set_state(ShellState::ChannelOpen);

        let geometry = TerminalGeometry::from_cells(rows, columns);
        if let Err(err) = channel
            .request_pty(DEFAULT_TERM, geometry, &interactive_pty_modes())
            .await
        {
            self.abort_invoke(channel).await;
            return Err(SshCoreError::PtyRequestFailed(err.to_string()));
        }
        self.shared.set_state(ShellState::PtyNegotiated);

        if let Err(err) = channel.request_shell().await {
            self.abort_invoke(channel).await;
            return Err(SshCoreError::ShellStartFailed(err.to_string()));
        }

        *self.geometry.lock().expect("geometry lock poisoned") = Some(geometry);
        self.shared.set_state(ShellState::ShellRunning);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        self.commands = Some(command_tx);
        *self.output.lock().await = Some(output_rx);
        tokio::spawn(drive_channel(channel, command_rx, output_tx, self.shared.clone()));
        Ok(())
    }

    async fn abort_invoke(&self, channel: S::Channel) {
        if let Err(err) = channel.close().await {
            debug!(?err, "failed to close channel after setup error");
        }
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.set_state(ShellState::Closed);
    }

    /// Queue raw bytes for the remote shell.
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        if self.shared.is_closed() {
            return Err(SshCoreError::SessionClosed);
        }
        let Some(commands) = &self.commands else {
            return Err(SshCoreError::InvalidState {
                operation: "send data",
                state: self.shared.state().name(),
            });
        };
        if commands.send(ChannelCommand::Data(bytes.to_vec())).is_err() {
            // Driver is gone; the channel went away underneath us.
            self.shared.closed.store(true, Ordering::SeqCst);
            return Err(SshCoreError::SessionClosed);
        }
        Ok(())
    }

    /// Report a new terminal size to the server.
    pub fn resize_pty(&self, rows: u16, columns: u16) -> Result<()> {
        let state = self.shared.state();
        if state != ShellState::ShellRunning {
            return Err(SshCoreError::InvalidState {
                operation: "resize pty",
                state: state.name(),
            });
        }
        let Some(commands) = &self.commands else {
            return Err(SshCoreError::SessionClosed);
        };
        let geometry = TerminalGeometry::from_cells(rows, columns);
        *self.geometry.lock().expect("geometry lock poisoned") = Some(geometry);
        if commands.send(ChannelCommand::WindowChange(geometry)).is_err() {
            self.shared.closed.store(true, Ordering::SeqCst);
            return Err(SshCoreError::SessionClosed);
        }
        Ok(())
    }

    /// Stream shell output as lossy UTF-8 chunks until the channel ends
    /// or `cancel` fires. A read error is yielded as its message text and
    /// then ends the stream.
    pub fn receive(&self, cancel: CancellationToken) -> UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let output = self.output.clone();
        tokio::spawn(async move {
            let mut slot = output.lock().await;
            let Some(events) = slot.as_mut() else {
                return;
            };
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = events.recv() => match event {
                        Some(OutputEvent::Chunk(text)) => {
                            if tx.send(text).is_err() {
                                return;
                            }
                        }
                        Some(OutputEvent::ReadError(message)) => {
                            let _ = tx.send(message);
                            return;
                        }
                        None => return,
                    },
                }
            }
        });
        rx
    }

    /// Close the shell. Safe to call any number of times; only the first
    /// call tears anything down.
    ///
    /// The session release runs on its own once-flag: the shell may
    /// already be closed by a driver-observed EOF, and the opted-in
    /// disconnect still has to happen exactly once.
    pub async fn close(&self) -> Result<()> {
        if self.shared.begin_close() {
            self.shared.set_state(ShellState::Closed);
            if let Some(commands) = &self.commands {
                let _ = commands.send(ChannelCommand::Close);
            }
        }
        if self.disconnect_on_close && !self.session_released.swap(true, Ordering::SeqCst) {
            self.session.disconnect().await;
        }
        Ok(())
    }
}

/// Owns the channel after negotiation: applies queued commands and pumps
/// server output until either side finishes.
async fn drive_channel<C>(
    mut channel: C,
    mut commands: UnboundedReceiver<ChannelCommand>,
    output: UnboundedSender<OutputEvent>,
    shared: Arc<ShellShared>,
) where
    C: ShellChannel + Send,
{
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(ChannelCommand::Data(bytes)) => {
                    if let Err(err) = channel.data(&bytes).await {
                        warn!(?err, "shell write failed");
                        break;
                    }
                }
                Some(ChannelCommand::WindowChange(geometry)) => {
                    if let Err(err) = channel.window_change(geometry).await {
                        warn!(?err, "window change failed");
                    }
                }
                Some(ChannelCommand::Close) | None => break,
            },
            event = channel.wait() => match event {
                Some(ShellEvent::Data(bytes)) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    let _ = output.send(OutputEvent::Chunk(text));
                }
                Some(ShellEvent::Error(message)) => {
                    let _ = output.send(OutputEvent::ReadError(message));
                    break;
                }
                None => break,
            },
        }
    }
    if let Err(err) = channel.close().await {
        debug!(?err, "shell channel close failed");
    }
    shared.closed.store(true, Ordering::SeqCst);
    shared.set_state(ShellState::Closed);
}

#[cfg(test)]
#[path = "interactive_tests.rs"]
mod tests;
