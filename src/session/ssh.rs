use async_ssh2_tokio::Config;
use async_ssh2_tokio::client::{AuthMethod, Client};
use async_trait::async_trait;
use log::{debug, trace};
use russh::ChannelMsg;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};

use super::prompt::{self, IGNORE_START_LINE, PromptKind};
use super::security::ConnectionSecurityOptions;
use super::{ConfigSetReport, LineFailure, SessionProvider};
use crate::config::DEFAULT_INACTIVITY_TIMEOUT;
use crate::error::ConnectError;
use crate::registry::DeviceProfile;

/// Time given to `exit` before the connection is dropped.
const EXIT_GRACE: Duration = Duration::from_millis(100);

/// Live interactive shell on one device.
pub struct SshHandle {
    endpoint: String,
    client: Option<Client>,
    sender: Sender<String>,
    recv: Receiver<String>,
    mode: PromptKind,
}

impl SshHandle {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_connected(&self) -> bool {
        self.client.as_ref().is_some_and(|c| !c.is_closed())
    }
}

/// Decodes the valid UTF-8 prefix of `pending`.
///
/// A multi-byte character split across packets stays in `pending` until the
/// rest of it arrives. Bytes that can never be valid are replaced.
fn drain_utf8(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(text) => {
            let text = text.to_string();
            pending.clear();
            text
        }
        Err(err) if err.error_len().is_none() => {
            let tail = pending.split_off(err.valid_up_to());
            let text = String::from_utf8_lossy(pending).into_owned();
            *pending = tail;
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            text
        }
    }
}

/// Output of one round trip to the shell.
struct Exchange {
    output: String,
    prompt: PromptKind,
    rejected: bool,
}

/// SSH provider for IOS-style devices.
///
/// `open` connects, authenticates and starts a PTY shell. `prepare` waits for
/// the first prompt, enters privileged mode with the profile's enable secret
/// when the login lands in user mode, and disables paging.
///
/// Shell exchanges carry no deadline of their own: the session manager bounds
/// preparation and every command with [`SessionTimeouts`](super::SessionTimeouts).
#[derive(Debug, Clone)]
pub struct SshSessionProvider {
    security: ConnectionSecurityOptions,
    inactivity_timeout: Duration,
}

impl Default for SshSessionProvider {
    fn default() -> Self {
        Self::new(ConnectionSecurityOptions::default())
    }
}

impl SshSessionProvider {
    pub fn new(security: ConnectionSecurityOptions) -> Self {
        Self {
            security,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
        }
    }

    /// Idle time after which the SSH layer drops the connection.
    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    pub fn security(&self) -> &ConnectionSecurityOptions {
        &self.security
    }

    async fn connect(&self, profile: &DeviceProfile) -> Result<Client, ConnectError> {
        let config = Config {
            preferred: self.security.preferred(),
            inactivity_timeout: Some(self.inactivity_timeout),
            ..Default::default()
        };

        Client::connect_with_config(
            (profile.address().to_string(), profile.port()),
            profile.username(),
            AuthMethod::with_password(profile.password().expose()),
            self.security.server_check.clone(),
            config,
        )
        .await
        .map_err(|err| match err {
            async_ssh2_tokio::Error::PasswordWrong | async_ssh2_tokio::Error::KeyAuthFailed => {
                ConnectError::AuthFailed(err.to_string())
            }
            other => ConnectError::ConnectFailed(other.to_string()),
        })
    }

    /// Sends `text` and collects output until the next prompt.
    ///
    /// Pager markers are answered. A `Password:` prompt ends the exchange so
    /// the caller can decide what to send.
    async fn exchange(
        handle: &mut SshHandle,
        text: &str,
        timeout: Option<Duration>,
    ) -> Result<Exchange, ConnectError> {
        while handle.recv.try_recv().is_ok() {}
        handle.sender.send(format!("{text}\n")).await?;
        Self::read_until_prompt(handle, text, timeout).await
    }

    /// Collects output until a prompt shows up, for at most `timeout` when given.
    async fn read_until_prompt(
        handle: &mut SshHandle,
        echoed: &str,
        timeout: Option<Duration>,
    ) -> Result<Exchange, ConnectError> {
        let mut raw = String::new();
        let mut line_buffer = String::new();
        let mut rejected = false;

        let wait = async {
            loop {
                let Some(data) = handle.recv.recv().await else {
                    return Err(ConnectError::ChannelDisconnectError);
                };
                trace!("{:?}", data);
                line_buffer.push_str(&data);

                while let Some(newline_pos) = line_buffer.find('\n') {
                    let line: String = line_buffer.drain(..=newline_pos).collect();
                    let line = IGNORE_START_LINE.replace(&line, "").into_owned();
                    if prompt::is_error_line(line.trim_end()) {
                        rejected = true;
                    }
                    raw.push_str(&line);
                }

                if line_buffer.is_empty() {
                    continue;
                }
                match prompt::classify(&line_buffer) {
                    Some(PromptKind::More) => {
                        line_buffer.clear();
                        handle.sender.send(" ".to_string()).await?;
                    }
                    Some(kind) => {
                        raw.push_str(&line_buffer);
                        return Ok(kind);
                    }
                    None => {}
                }
            }
        };
        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await,
            None => Ok(wait.await),
        };

        match result {
            Ok(Ok(kind)) => {
                handle.mode = kind;
                Ok(Exchange {
                    output: prompt::strip_echo_and_prompt(echoed, &raw),
                    prompt: kind,
                    rejected,
                })
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ConnectError::ExecTimeout(raw)),
        }
    }

    /// Moves a fresh shell to the privileged prompt and turns paging off.
    async fn enter_privileged(
        handle: &mut SshHandle,
        profile: &DeviceProfile,
    ) -> Result<(), ConnectError> {
        if handle.mode == PromptKind::User {
            let Some(secret) = profile.enable_secret() else {
                debug!("{} stays in user mode: no enable secret", handle.endpoint);
                return Ok(());
            };
            let asked = Self::exchange(handle, "enable", None).await?;
            let landed = if asked.prompt == PromptKind::Password {
                handle.sender.send(format!("{}\n", secret.expose())).await?;
                Self::read_until_prompt(handle, "", None).await?.prompt
            } else {
                asked.prompt
            };
            if landed != PromptKind::Privileged {
                return Err(ConnectError::EnableRejected(format!(
                    "{} did not reach privileged mode",
                    handle.endpoint
                )));
            }
        }
        Self::exchange(handle, "terminal length 0", None).await?;
        Ok(())
    }

    async fn enter_config_mode(handle: &mut SshHandle) -> Result<(), ConnectError> {
        let entered = Self::exchange(handle, "configure terminal", None).await?;
        if entered.rejected || entered.prompt != PromptKind::Config {
            return Err(ConnectError::CommandRejected(format!(
                "configure terminal: {}",
                entered.output.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionProvider for SshSessionProvider {
    type Handle = SshHandle;

    async fn open(&self, profile: &DeviceProfile) -> Result<Self::Handle, ConnectError> {
        let endpoint = profile.endpoint();
        let client = self.connect(profile).await?;
        debug!("{} TCP connection successful", endpoint);

        let mut channel = client.get_channel().await?;
        channel
            .request_pty(false, "xterm", 800, 600, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;
        debug!("{} Shell request successful", endpoint);

        let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
        let (sender_to_user, receiver_from_shell) = mpsc::channel::<String>(256);

        let io_endpoint = endpoint.clone();
        tokio::spawn(async move {
            let mut pending = Vec::new();
            loop {
                tokio::select! {
                    data = receiver_from_user.recv() => {
                        let Some(data) = data else {
                            break;
                        };
                        if let Err(e) = channel.data(data.as_bytes()).await {
                            debug!("{} Failed to send data to shell: {:?}", io_endpoint, e);
                            break;
                        }
                    },
                    Some(msg) = channel.wait() => {
                        match msg {
                            ChannelMsg::Data { ref data } => {
                                pending.extend_from_slice(data);
                                let text = drain_utf8(&mut pending);
                                if !text.is_empty() && sender_to_user.send(text).await.is_err() {
                                    debug!("{} Shell output receiver dropped", io_endpoint);
                                    break;
                                }
                            }
                            ChannelMsg::ExitStatus { exit_status } => {
                                debug!("{} Shell exited with status {}", io_endpoint, exit_status);
                                let _ = channel.eof().await;
                                break;
                            }
                            ChannelMsg::Eof => {
                                debug!("{} Shell sent EOF", io_endpoint);
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
            debug!("{} SSH I/O task ended", io_endpoint);
        });

        Ok(SshHandle {
            endpoint,
            client: Some(client),
            sender: sender_to_shell,
            recv: receiver_from_shell,
            mode: PromptKind::User,
        })
    }

    async fn prepare(
        &self,
        handle: &mut Self::Handle,
        profile: &DeviceProfile,
    ) -> Result<(), ConnectError> {
        let initial = Self::read_until_prompt(handle, "", None).await?;
        debug!("{} initial prompt {:?}", handle.endpoint, initial.prompt);
        Self::enter_privileged(handle, profile).await
    }

    async fn run_command(
        &self,
        handle: &mut Self::Handle,
        command: &str,
    ) -> Result<String, ConnectError> {
        if !handle.is_connected() {
            return Err(ConnectError::ConnectClosedError);
        }
        let exchange = Self::exchange(handle, command, None).await?;
        if exchange.rejected {
            return Err(ConnectError::CommandRejected(exchange.output));
        }
        Ok(exchange.output)
    }

    async fn run_config_set(
        &self,
        handle: &mut Self::Handle,
        lines: &[String],
    ) -> Result<ConfigSetReport, ConnectError> {
        if !handle.is_connected() {
            return Err(ConnectError::ConnectClosedError);
        }
        Self::enter_config_mode(handle).await?;

        let mut report = ConfigSetReport::default();
        let mut transport_lost = false;
        for (index, line) in lines.iter().enumerate() {
            let text = line.trim();
            if text.is_empty() || text.starts_with('!') {
                report.outputs.push(String::new());
                continue;
            }
            // A line such as `end` can leave configuration mode mid-set.
            if handle.mode != PromptKind::Config
                && let Err(err) = Self::enter_config_mode(handle).await
            {
                report.failure = Some(LineFailure {
                    index,
                    message: err.to_string(),
                });
                break;
            }
            match Self::exchange(handle, text, None).await {
                Ok(exchange) if exchange.rejected => {
                    report.failure = Some(LineFailure {
                        index,
                        message: exchange.output.trim().to_string(),
                    });
                    break;
                }
                Ok(exchange) => report.outputs.push(exchange.output),
                Err(err) => {
                    transport_lost = true;
                    report.failure = Some(LineFailure {
                        index,
                        message: err.to_string(),
                    });
                    break;
                }
            }
        }

        if !transport_lost
            && handle.mode == PromptKind::Config
            && let Err(err) = Self::exchange(handle, "end", None).await
        {
            debug!("{} leaving configuration mode failed: {}", handle.endpoint, err);
        }
        Ok(report)
    }

    async fn is_alive(&self, handle: &mut Self::Handle) -> bool {
        handle.is_connected() && !handle.sender.is_closed()
    }

    async fn close(&self, handle: &mut Self::Handle) {
        let Some(client) = handle.client.take() else {
            return;
        };
        debug!("Closing SSH session to {}", handle.endpoint);
        handle.recv.close();
        if !client.is_closed() {
            if let Err(e) = handle.sender.send("exit\n".to_string()).await {
                debug!("Failed to send exit command: {:?}", e);
            }
            tokio::time::sleep(EXIT_GRACE).await;
        }
        // The connection is torn down when the client drops.
        drop(client);
    }

    async fn abort(&self, handle: &mut Self::Handle) {
        handle.recv.close();
        // Dropping the client tears the connection down without the exit dialogue.
        if handle.client.take().is_some() {
            debug!("Aborted SSH session to {}", handle.endpoint);
        }
    }
}
