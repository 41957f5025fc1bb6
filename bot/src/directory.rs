use std::collections::BTreeSet;
use std::future::Future;

use thiserror::Error;
use tokio::sync::mpsc;

/// Per-connection client id (`clid`). Only valid while the client stays connected.
pub type SessionId = u32;

/// Server group id (`sgid`).
pub type GroupId = u32;

/// Server answered "invalid clientID": the client left before we reached it.
pub const ERR_INVALID_CLIENT_ID: u32 = 512;

/// Server answered "database empty result set".
pub const ERR_EMPTY_RESULT: u32 = 1281;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerGroup {
    pub id: GroupId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    /// A regular voice client.
    Voice,
    /// Another query connection (bots, admin tools).
    Query,
}

impl ClientKind {
    pub fn from_code(code: &str) -> Self {
        if code == "1" {
            ClientKind::Query
        } else {
            ClientKind::Voice
        }
    }
}

/// One entry of the connected-client listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSummary {
    pub session_id: SessionId,
    pub nickname: String,
    pub kind: ClientKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDetail {
    pub unique_id: String,
    pub group_ids: BTreeSet<GroupId>,
}

/// A client-join notification, decoded by the directory's event reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientJoined {
    pub session_id: SessionId,
    pub unique_id: String,
    pub nickname: String,
    pub kind: ClientKind,
    pub group_ids: BTreeSet<GroupId>,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for reply to `{command}`")]
    Timeout { command: String },

    #[error("`{command}` failed with error {id}: {message}")]
    Query {
        command: String,
        id: u32,
        message: String,
    },

    #[error("malformed reply: {0}")]
    Protocol(String),

    #[error("connection closed by server")]
    Disconnected,
}

impl DirectoryError {
    pub fn is_client_gone(&self) -> bool {
        matches!(
            self,
            DirectoryError::Query {
                id: ERR_INVALID_CLIENT_ID,
                ..
            }
        )
    }
}

/// Parse a comma-delimited group list such as `"6,8,12"`. Entries that are
/// not numbers are dropped.
pub fn parse_group_ids(raw: &str) -> BTreeSet<GroupId> {
    raw.split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

/// The voice server's query interface, as far as the notifier needs it.
/// Every call is one request/response round trip on a single connection.
pub trait Directory {
    fn login(
        &mut self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<(), DirectoryError>>;

    fn select_virtual_server(
        &mut self,
        server_id: u32,
    ) -> impl Future<Output = Result<(), DirectoryError>>;

    /// Cheap identity call used to detect a dead connection.
    fn keep_alive(&mut self) -> impl Future<Output = Result<(), DirectoryError>>;

    fn list_groups(&mut self) -> impl Future<Output = Result<Vec<ServerGroup>, DirectoryError>>;

    fn list_clients(
        &mut self,
    ) -> impl Future<Output = Result<Vec<ClientSummary>, DirectoryError>>;

    fn client_detail(
        &mut self,
        session_id: SessionId,
    ) -> impl Future<Output = Result<ClientDetail, DirectoryError>>;

    fn poke(
        &mut self,
        session_id: SessionId,
        text: &str,
    ) -> impl Future<Output = Result<(), DirectoryError>>;

    fn send_private_message(
        &mut self,
        session_id: SessionId,
        text: &str,
    ) -> impl Future<Output = Result<(), DirectoryError>>;

    /// Register for join notifications. Joins are produced onto the returned
    /// queue by whatever task reads the connection.
    fn subscribe_joins(
        &mut self,
    ) -> impl Future<Output = Result<mpsc::UnboundedReceiver<ClientJoined>, DirectoryError>>;
}
