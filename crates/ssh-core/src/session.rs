//! Session-level operations: one-shot commands and interactive shells.

use std::sync::Arc;

use russh::{
    client::{self, Handle},
    ChannelMsg, Disconnect,
};

mod interactive;

pub use interactive::{
    InteractiveSession, ShellChannel, ShellEvent, ShellSession, ShellState,
};

type Result<T> = crate::SshResult<T>;

pub type SessionHandle<H> = Handle<H>;
pub type SharedSessionHandle<H> = Arc<Handle<H>>;

/// Captured result of a one-shot remote command.
#[derive(Clone, Debug, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: Option<u32>,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Run `command` on the server and capture its output.
pub async fn run_command<H>(session: &SessionHandle<H>, command: &str) -> Result<CommandOutput>
where
    H: client::Handler + Send,
{
    let mut channel = session.channel_open_session().await?;
    channel.exec(true, command.as_bytes()).await?;

    let mut output = CommandOutput::default();
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => output.stdout.extend_from_slice(&data),
            ChannelMsg::ExtendedData { data, .. } => output.stderr.extend_from_slice(&data),
            ChannelMsg::ExitStatus { exit_status } => output.exit_status = Some(exit_status),
            ChannelMsg::Close | ChannelMsg::Eof => break,
            _ => {}
        }
    }

    channel.close().await?;
    Ok(output)
}

/// Politely end the SSH connection.
pub async fn disconnect<H>(session: &SessionHandle<H>)
where
    H: client::Handler + Send,
{
    let _ = session.disconnect(Disconnect::ByApplication, "", "").await;
}
