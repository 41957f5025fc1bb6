use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::directory::{
    ClientDetail, ClientJoined, ClientKind, ClientSummary, Directory, DirectoryError,
    ERR_EMPTY_RESULT, ServerGroup, SessionId, parse_group_ids,
};

use super::codec::{
    CLIENT_ENTER_VIEW, Notification, ParseError, QueryCommand, QueryStatus, Record, field,
    numeric_field, parse_records,
};

/// Maximum bytes per reply line. Client listings on busy servers are long.
const MAX_LINE_LENGTH: usize = 1024 * 1024;
/// First line the server sends after accepting a query connection.
const BANNER: &str = "TS3";

type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Read a line from the query connection, capped at MAX_LINE_LENGTH bytes.
/// Returns Ok(0) on EOF, Ok(n) on success, Err on I/O error or line too long.
async fn read_bounded_line<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    buf: &mut String,
) -> std::io::Result<usize> {
    let mut bytes = Vec::new();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            // EOF; a partial line without a newline is still delivered
            break;
        }
        if let Some(pos) = available.iter().position(|&b| b == b'\n') {
            bytes.extend_from_slice(&available[..=pos]);
            reader.consume(pos + 1);
            break;
        }
        let len = available.len();
        bytes.extend_from_slice(available);
        reader.consume(len);
        if bytes.len() > MAX_LINE_LENGTH {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "query line exceeds maximum length",
            ));
        }
    }
    buf.push_str(&String::from_utf8_lossy(&bytes));
    Ok(bytes.len())
}

/// A ServerQuery connection.
///
/// A background task owns the read half: status and data lines go to the
/// reply queue consumed by [`QueryClient::execute`], join notifications are
/// decoded and pushed onto the join queue handed out by `subscribe_joins`.
pub struct QueryClient {
    peer: String,
    writer: BoxedWriter,
    replies: mpsc::UnboundedReceiver<String>,
    joins: Option<mpsc::UnboundedReceiver<ClientJoined>>,
    reader: JoinHandle<()>,
    response_timeout: Duration,
}

impl QueryClient {
    /// Open a TCP connection to `addr` (`host:port`) and wait for the banner.
    pub async fn connect(addr: &str, response_timeout: Duration) -> Result<Self, DirectoryError> {
        let stream = tokio::time::timeout(response_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| DirectoryError::Timeout {
                command: "connect".into(),
            })??;
        let client = Self::from_stream(stream, addr.to_string(), response_timeout).await?;
        info!(peer = %client.peer, "Connected to query interface");
        Ok(client)
    }

    /// Wrap an established stream (plain TCP, or an in-memory pipe in tests).
    pub async fn from_stream<S>(
        stream: S,
        peer: String,
        response_timeout: Duration,
    ) -> Result<Self, DirectoryError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (reply_tx, replies) = mpsc::unbounded_channel();
        let (join_tx, joins) = mpsc::unbounded_channel();

        let reader_peer = peer.clone();
        let reader = tokio::spawn(async move {
            read_loop(BufReader::new(reader), reply_tx, join_tx).await;
            debug!(peer = %reader_peer, "query reader stopped");
        });

        let mut client = QueryClient {
            peer,
            writer: Box::new(writer),
            replies,
            joins: Some(joins),
            reader,
            response_timeout,
        };
        client.read_banner().await?;
        Ok(client)
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// The banner is `TS3` followed by a free-form welcome line.
    async fn read_banner(&mut self) -> Result<(), DirectoryError> {
        let first = self.next_reply("banner").await?;
        if first != BANNER {
            return Err(DirectoryError::Protocol(format!(
                "unexpected banner from {}: {}",
                self.peer, first
            )));
        }
        let welcome = self.next_reply("banner").await?;
        debug!(peer = %self.peer, %welcome, "query banner received");
        Ok(())
    }

    async fn next_reply(&mut self, command: &str) -> Result<String, DirectoryError> {
        match tokio::time::timeout(self.response_timeout, self.replies.recv()).await {
            Err(_) => Err(DirectoryError::Timeout {
                command: command.to_string(),
            }),
            Ok(None) => Err(DirectoryError::Disconnected),
            Ok(Some(line)) => Ok(line),
        }
    }

    /// Send one command and collect its data records up to the status line.
    pub async fn execute(&mut self, command: &QueryCommand) -> Result<Vec<Record>, DirectoryError> {
        debug!(peer = %self.peer, command = %command.name, "sending query command");

        let data = format!("{}\n", command.format());
        self.writer.write_all(data.as_bytes()).await?;
        self.writer.flush().await?;

        let mut records = Vec::new();
        loop {
            let line = self.next_reply(&command.name).await?;
            if !QueryStatus::is_status_line(&line) {
                records.extend(parse_records(&line));
                continue;
            }

            let status = QueryStatus::parse(&line)?;
            if status.is_ok() {
                return Ok(records);
            }
            if status.id == ERR_EMPTY_RESULT {
                return Ok(Vec::new());
            }
            return Err(DirectoryError::Query {
                command: command.name.clone(),
                id: status.id,
                message: status.message,
            });
        }
    }

    /// Say goodbye. Failures are irrelevant at this point.
    pub async fn quit(mut self) {
        if let Err(e) = self.execute(&QueryCommand::new("quit")).await {
            debug!(peer = %self.peer, error = %e, "quit not acknowledged");
        }
    }
}

impl Drop for QueryClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: BufReader<R>,
    replies: mpsc::UnboundedSender<String>,
    joins: mpsc::UnboundedSender<ClientJoined>,
) {
    let mut line_buf = String::new();
    loop {
        line_buf.clear();
        match read_bounded_line(&mut reader, &mut line_buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "query connection read failed");
                break;
            }
        }

        // Lines end in "\n\r", so the \r lands at the start of the next line
        let line = line_buf.trim_matches(['\r', '\n']);
        if line.is_empty() {
            continue;
        }

        if Notification::is_notification(line) {
            dispatch_notification(line, &joins);
            continue;
        }

        if replies.send(line.to_string()).is_err() {
            break;
        }
    }
}

fn dispatch_notification(line: &str, joins: &mpsc::UnboundedSender<ClientJoined>) {
    let notification = match Notification::parse(line) {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "malformed notification");
            return;
        }
    };

    if notification.event != CLIENT_ENTER_VIEW {
        debug!(event = %notification.event, "ignoring notification");
        return;
    }

    for record in &notification.records {
        match client_joined(record) {
            Ok(joined) => {
                // Nobody subscribed; nothing to do
                let _ = joins.send(joined);
            }
            Err(e) => warn!(error = %e, "malformed client join notification"),
        }
    }
}

fn client_joined(record: &Record) -> Result<ClientJoined, ParseError> {
    Ok(ClientJoined {
        session_id: numeric_field(record, "clid")?,
        unique_id: field(record, "client_unique_identifier")?.to_string(),
        nickname: field(record, "client_nickname")?.to_string(),
        kind: ClientKind::from_code(record.get("client_type").map_or("0", String::as_str)),
        group_ids: parse_group_ids(record.get("client_servergroups").map_or("", String::as_str)),
    })
}

fn server_group(record: &Record) -> Result<ServerGroup, ParseError> {
    Ok(ServerGroup {
        id: numeric_field(record, "sgid")?,
        name: field(record, "name")?.to_string(),
    })
}

fn client_summary(record: &Record) -> Result<ClientSummary, ParseError> {
    Ok(ClientSummary {
        session_id: numeric_field(record, "clid")?,
        nickname: field(record, "client_nickname")?.to_string(),
        kind: ClientKind::from_code(field(record, "client_type")?),
    })
}

fn client_detail(record: &Record) -> Result<ClientDetail, ParseError> {
    Ok(ClientDetail {
        unique_id: field(record, "client_unique_identifier")?.to_string(),
        group_ids: parse_group_ids(field(record, "client_servergroups")?),
    })
}

impl Directory for QueryClient {
    async fn login(&mut self, username: &str, password: &str) -> Result<(), DirectoryError> {
        let cmd = QueryCommand::new("login")
            .arg("client_login_name", username)
            .arg("client_login_password", password);
        self.execute(&cmd).await?;
        Ok(())
    }

    async fn select_virtual_server(&mut self, server_id: u32) -> Result<(), DirectoryError> {
        self.execute(&QueryCommand::new("use").arg("sid", server_id))
            .await?;
        Ok(())
    }

    async fn keep_alive(&mut self) -> Result<(), DirectoryError> {
        self.execute(&QueryCommand::new("whoami")).await?;
        Ok(())
    }

    async fn list_groups(&mut self) -> Result<Vec<ServerGroup>, DirectoryError> {
        let records = self.execute(&QueryCommand::new("servergrouplist")).await?;
        Ok(records
            .iter()
            .map(server_group)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn list_clients(&mut self) -> Result<Vec<ClientSummary>, DirectoryError> {
        let records = self.execute(&QueryCommand::new("clientlist")).await?;
        Ok(records
            .iter()
            .map(client_summary)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn client_detail(&mut self, session_id: SessionId) -> Result<ClientDetail, DirectoryError> {
        let records = self
            .execute(&QueryCommand::new("clientinfo").arg("clid", session_id))
            .await?;
        let record = records
            .first()
            .ok_or_else(|| DirectoryError::Protocol("empty clientinfo reply".into()))?;
        Ok(client_detail(record)?)
    }

    async fn poke(&mut self, session_id: SessionId, text: &str) -> Result<(), DirectoryError> {
        let cmd = QueryCommand::new("clientpoke")
            .arg("clid", session_id)
            .arg("msg", text);
        self.execute(&cmd).await?;
        Ok(())
    }

    async fn send_private_message(
        &mut self,
        session_id: SessionId,
        text: &str,
    ) -> Result<(), DirectoryError> {
        // targetmode 1 = a single client
        let cmd = QueryCommand::new("sendtextmessage")
            .arg("targetmode", 1)
            .arg("target", session_id)
            .arg("msg", text);
        self.execute(&cmd).await?;
        Ok(())
    }

    async fn subscribe_joins(
        &mut self,
    ) -> Result<mpsc::UnboundedReceiver<ClientJoined>, DirectoryError> {
        let joins = self
            .joins
            .take()
            .ok_or_else(|| DirectoryError::Protocol("already subscribed to joins".into()))?;
        self.execute(&QueryCommand::new("servernotifyregister").arg("event", "server"))
            .await?;
        Ok(joins)
    }
}
