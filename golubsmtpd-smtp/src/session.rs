//! SMTP session state machine.
//!
//! One session per connection, processing one command at a time. A session
//! owns the in-construction [`Message`] until a publish succeeds; from then
//! on the queue side owns it and the session only reports the outcome.

use std::{sync::Arc, time::Duration};

use golubsmtpd_common::{
    auth::{self, Authenticator},
    config::Config,
    Signal,
};
use golubsmtpd_delivery::RecipientClass;
use golubsmtpd_queue::MessageQueue;
use golubsmtpd_spool::{ingest_body, Message, Spool};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::broadcast,
};
use tracing::{debug, error, info, warn};

use crate::{
    command::{Command, ParseError},
    connection::Connection,
    email::{validate_hello_hostname, EmailValidator},
    error::SessionError,
    rcpt::RcptValidator,
    status::Status,
};

/// Deadline for one authenticator credential check.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Connected,
    Greeted,
    Authenticated,
    MailFrom,
    RcptTo,
    Data,
    Closed,
}

/// Shared collaborators handed to every session.
#[derive(Debug)]
pub struct SessionContext {
    pub config: Arc<Config>,
    pub spool: Spool,
    pub queue: Arc<MessageQueue>,
    pub validator: Arc<RcptValidator>,
    pub email: EmailValidator,
    pub authenticator: Arc<dyn Authenticator>,
}

pub struct Session<Stream> {
    context: Arc<SessionContext>,
    connection: Connection<Stream>,
    client_ip: String,

    state: State,
    client_hello_hostname: String,
    authenticated: bool,
    username: Option<String>,

    /// Message being built during the current mail transaction.
    message: Option<Message>,
}

impl<Stream> Session<Stream>
where
    Stream: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: Stream, client_ip: String, context: Arc<SessionContext>) -> Self {
        Self {
            context,
            connection: Connection::new(stream),
            client_ip,
            state: State::Connected,
            client_hello_hostname: String::new(),
            authenticated: false,
            username: None,
            message: None,
        }
    }

    fn hostname(&self) -> &str {
        &self.context.config.server.hostname
    }

    fn read_timeout(&self) -> Duration {
        self.context.config.server.read_timeout()
    }

    fn write_timeout(&self) -> Duration {
        self.context.config.server.write_timeout()
    }

    async fn send(&mut self, line: &str) -> Result<(), SessionError> {
        debug!(response = %line, client_ip = %self.client_ip, "sending response");
        let deadline = self.write_timeout();
        self.connection.send_line(line, deadline).await
    }

    async fn reply(&mut self, status: Status, text: &str) -> Result<(), SessionError> {
        let line = status.reply(text);
        self.send(&line).await
    }

    /// Run the session to completion.
    pub async fn serve(
        mut self,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), SessionError> {
        info!(client_ip = %self.client_ip, "starting SMTP session");

        let greeting = format!("220 {} ESMTP Service ready", self.hostname());
        self.send(&greeting).await?;

        while self.state != State::Closed {
            let deadline = self.read_timeout();
            let line = tokio::select! {
                _ = shutdown.recv() => {
                    let bye = format!(
                        "421 {} Service not available, closing transmission channel",
                        self.hostname()
                    );
                    let _ = self.send(&bye).await;
                    break;
                }
                line = self.connection.read_line(deadline) => line,
            };

            let line = match line {
                Ok(line) => line,
                Err(SessionError::ConnectionClosed) => {
                    debug!(client_ip = %self.client_ip, "client disconnected");
                    break;
                }
                Err(SessionError::LineTooLong) => {
                    let _ = self.reply(Status::SyntaxError, "Line too long").await;
                    break;
                }
                Err(err) => {
                    warn!(client_ip = %self.client_ip, %err, "session read failed");
                    return Err(err);
                }
            };

            debug!(command = %line, client_ip = %self.client_ip, "received command");
            self.process_command(&line, &mut shutdown).await?;
        }

        info!(
            client_ip = %self.client_ip,
            username = self.username.as_deref().unwrap_or(""),
            "session finished"
        );
        Ok(())
    }

    async fn process_command(
        &mut self,
        line: &str,
        shutdown: &mut broadcast::Receiver<Signal>,
    ) -> Result<(), SessionError> {
        let command = match Command::try_from(line) {
            Ok(command) => command,
            Err(ParseError::Empty) => return self.reply(Status::SyntaxError, "").await,
            Err(ParseError::Unknown(_)) => {
                return self.reply(Status::NotImplemented, "").await;
            }
            Err(ParseError::Param(message)) => {
                return self.reply(Status::ParamError, message).await;
            }
        };

        match command {
            Command::Helo(host) => self.handle_hello(&host, false).await,
            Command::Ehlo(host) => self.handle_hello(&host, true).await,
            Command::AuthPlain(initial) => self.handle_auth_plain(initial).await,
            Command::AuthLogin => self.handle_auth_login().await,
            Command::MailFrom(raw) => self.handle_mail(&raw).await,
            Command::RcptTo(raw) => self.handle_rcpt(&raw).await,
            Command::Data => self.handle_data(shutdown).await,
            Command::Rset => {
                self.reset_transaction();
                self.reply(Status::Ok, "Reset state").await
            }
            Command::Noop => self.reply(Status::Ok, "").await,
            Command::Quit => {
                self.state = State::Closed;
                self.reply(Status::GoodBye, "").await
            }
        }
    }

    async fn handle_hello(&mut self, host: &str, extended: bool) -> Result<(), SessionError> {
        if !validate_hello_hostname(host) {
            return self.reply(Status::ParamError, "Invalid hostname").await;
        }

        self.client_hello_hostname = host.to_string();
        self.message = None;
        self.state = if self.authenticated {
            State::Authenticated
        } else {
            State::Greeted
        };

        if extended {
            let first = format!(
                "250-{} Hello {} [{}]",
                self.hostname(),
                self.client_hello_hostname,
                self.client_ip
            );
            self.send(&first).await?;
            self.send("250-AUTH PLAIN LOGIN").await?;
            self.send("250 HELP").await
        } else {
            let reply = format!(
                "250 {} Hello {} [{}]",
                self.hostname(),
                self.client_hello_hostname,
                self.client_ip
            );
            self.send(&reply).await
        }
    }

    async fn handle_auth_plain(
        &mut self,
        initial: Option<String>,
    ) -> Result<(), SessionError> {
        if let Some(rejection) = self.auth_sequence_error() {
            return self.reply(Status::BadSequence, rejection).await;
        }

        let credentials = match initial {
            Some(credentials) => credentials,
            None => {
                self.send("334 ").await?;
                let deadline = self.read_timeout();
                self.connection.read_line(deadline).await?
            }
        };

        if credentials == "*" {
            return self.reply(Status::AuthFailed, "Authentication cancelled").await;
        }

        match auth::decode_plain(&credentials) {
            Ok((username, password)) => self.authenticate_user(&username, &password).await,
            Err(err) => {
                debug!(%err, client_ip = %self.client_ip, "AUTH PLAIN decode failed");
                self.reply(Status::AuthFailed, "Authentication failed").await
            }
        }
    }

    async fn handle_auth_login(&mut self) -> Result<(), SessionError> {
        if let Some(rejection) = self.auth_sequence_error() {
            return self.reply(Status::BadSequence, rejection).await;
        }

        let username = match self.auth_login_prompt("Username:").await? {
            Some(value) => value,
            None => return Ok(()),
        };
        let password = match self.auth_login_prompt("Password:").await? {
            Some(value) => value,
            None => return Ok(()),
        };

        self.authenticate_user(&username, &password).await
    }

    /// One `334` challenge/response exchange. `None` means a reply has
    /// already been written (cancellation or decode failure).
    async fn auth_login_prompt(&mut self, prompt: &str) -> Result<Option<String>, SessionError> {
        let challenge = format!("334 {}", auth::encode_base64(prompt));
        self.send(&challenge).await?;

        let deadline = self.read_timeout();
        let line = self.connection.read_line(deadline).await?;
        if line == "*" {
            self.reply(Status::AuthFailed, "Authentication cancelled").await?;
            return Ok(None);
        }

        match auth::decode_base64(&line) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                debug!(%err, client_ip = %self.client_ip, "AUTH LOGIN decode failed");
                self.reply(Status::AuthFailed, "Authentication failed").await?;
                Ok(None)
            }
        }
    }

    fn auth_sequence_error(&self) -> Option<&'static str> {
        if self.authenticated {
            Some("Already authenticated")
        } else if self.state != State::Greeted {
            Some("EHLO/HELO required before AUTH")
        } else {
            None
        }
    }

    async fn authenticate_user(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<(), SessionError> {
        let context = Arc::clone(&self.context);
        let result = tokio::time::timeout(
            AUTH_TIMEOUT,
            context.authenticator.authenticate(username, password),
        )
        .await;

        match result {
            Ok(result) if result.success => {
                self.authenticated = true;
                self.username = Some(result.username);
                self.state = State::Authenticated;
                info!(username, client_ip = %self.client_ip, "authentication successful");
                self.reply(Status::AuthSuccess, "Authentication successful").await
            }
            Ok(result) => {
                warn!(
                    username,
                    client_ip = %self.client_ip,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "authentication failed"
                );
                self.reply(Status::AuthFailed, "Authentication failed").await
            }
            Err(_) => {
                warn!(username, client_ip = %self.client_ip, "authentication timeout");
                self.reply(Status::AuthFailed, "Authentication failed").await
            }
        }
    }

    async fn handle_mail(&mut self, raw: &str) -> Result<(), SessionError> {
        if !matches!(self.state, State::Greeted | State::Authenticated) {
            return self
                .reply(Status::BadSequence, "EHLO/HELO required before MAIL")
                .await;
        }

        let context = Arc::clone(&self.context);
        let sender = match context.email.parse_mail_from(raw).await {
            Ok(sender) => sender,
            Err(err) => {
                debug!(%err, client_ip = %self.client_ip, "MAIL FROM validation failed");
                return self.reply(Status::ParamError, &err.to_string()).await;
            }
        };

        let mut message = Message::new(&self.client_ip, &self.client_hello_hostname);
        if let Some(sender) = sender {
            message.from = sender.full;
        }

        info!(
            sender = %message.from,
            id = %message.id,
            client_ip = %self.client_ip,
            "MAIL FROM accepted"
        );
        self.message = Some(message);
        self.state = State::MailFrom;
        self.reply(Status::Ok, "Sender accepted").await
    }

    async fn handle_rcpt(&mut self, raw: &str) -> Result<(), SessionError> {
        if !matches!(self.state, State::MailFrom | State::RcptTo) {
            return self
                .reply(Status::BadSequence, "MAIL FROM required before RCPT TO")
                .await;
        }

        let context = Arc::clone(&self.context);
        let max_recipients = context.config.server.max_recipients;
        let total = self.message.as_ref().map_or(0, Message::total_recipients);
        if max_recipients > 0 && total >= max_recipients {
            return self
                .reply(Status::ExceededStorage, "Too many recipients")
                .await;
        }

        let address = match context.email.parse_rcpt_to(raw).await {
            Ok(address) => address,
            Err(err) => {
                debug!(%err, client_ip = %self.client_ip, "RCPT TO validation failed");
                return self.reply(Status::ParamError, &err.to_string()).await;
            }
        };

        let class = context.validator.classify(&address.domain);
        match class {
            RecipientClass::Local
            | RecipientClass::Virtual => {
                if !context.validator.is_valid(&address.full, class).await {
                    debug!(
                        recipient = %address.full,
                        %class,
                        client_ip = %self.client_ip,
                        "recipient validation failed"
                    );
                    return self.reply(Status::MailboxUnavailable, "User unknown").await;
                }

                let Some(message) = self.message.as_mut() else {
                    return self.reply(Status::BadSequence, "").await;
                };
                let set = if class == RecipientClass::Local {
                    &mut message.local_recipients
                } else {
                    &mut message.virtual_recipients
                };
                if !set.insert(address.full.clone()) {
                    debug!(recipient = %address.full, "duplicate recipient ignored");
                }
            }
            RecipientClass::Relay => {
                let Some(message) = self.message.as_mut() else {
                    return self.reply(Status::BadSequence, "").await;
                };
                if !message.relay_recipients.insert(address.full.clone()) {
                    debug!(recipient = %address.full, "duplicate relay recipient ignored");
                }
            }
            RecipientClass::External => {
                debug!(
                    recipient = %address.full,
                    domain = %address.domain,
                    client_ip = %self.client_ip,
                    "external domain not permitted"
                );
                return self
                    .reply(Status::TransactionFailed, "Relay not permitted")
                    .await;
            }
        }

        self.state = State::RcptTo;
        info!(
            recipient = %address.full,
            %class,
            total_recipients = self.message.as_ref().map_or(0, Message::total_recipients),
            client_ip = %self.client_ip,
            "RCPT TO accepted"
        );
        self.reply(Status::Ok, "Recipient accepted").await
    }

    async fn handle_data(
        &mut self,
        shutdown: &mut broadcast::Receiver<Signal>,
    ) -> Result<(), SessionError> {
        if self.state != State::RcptTo {
            return self
                .reply(Status::BadSequence, "RCPT TO required before DATA")
                .await;
        }
        if self.message.as_ref().map_or(0, Message::total_recipients) == 0 {
            return self.reply(Status::BadSequence, "No recipients specified").await;
        }

        self.state = State::Data;
        self.reply(Status::StartMailInput, "").await?;

        let Some(mut message) = self.message.take() else {
            return self.reply(Status::BadSequence, "").await;
        };

        let context = Arc::clone(&self.context);
        let prelude = self.trace_headers(&message);
        let max_message_size = context.config.server.max_message_size;
        let read_timeout = self.read_timeout();

        let streamed = ingest_body(
            &context.spool,
            &message,
            prelude.as_bytes(),
            &mut self.connection,
            max_message_size,
            read_timeout,
            shutdown,
        )
        .await;

        let total_size = match streamed {
            Ok(total) => total,
            Err(err) => {
                error!(
                    %err,
                    id = %message.id,
                    client_ip = %self.client_ip,
                    "error storing message data"
                );
                self.reset_transaction();
                return self.reply(Status::LocalError, "Error storing message").await;
            }
        };

        message.total_size = total_size;
        let id = message.id.clone();
        info!(
            sender = %message.from,
            total_recipients = message.total_recipients(),
            size = total_size,
            %id,
            client_ip = %self.client_ip,
            "message received and stored"
        );

        // Best effort: the body is already durable in incoming/, so a
        // full or closed queue must not fail the SMTP transaction.
        if let Err(err) = context.queue.publish(message).await {
            error!(%err, %id, "error publishing message to queue");
        }

        self.reset_transaction();
        self.reply(Status::Ok, "Message accepted for delivery").await
    }

    /// `Received:` and `GolubSMTPd-Message-ID:` headers prepended to every
    /// stored body.
    fn trace_headers(&self, message: &Message) -> String {
        let timestamp = chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S UTC");
        format!(
            "Received: from {} by {}; {}\r\nGolubSMTPd-Message-ID: {}\r\n",
            self.client_ip,
            self.hostname(),
            timestamp,
            message.id
        )
    }

    /// Drop the current transaction, keeping authentication state.
    fn reset_transaction(&mut self) {
        self.message = None;
        self.state = if self.authenticated {
            State::Authenticated
        } else if self.state == State::Connected {
            State::Connected
        } else {
            State::Greeted
        };
    }
}
