//! In-memory directory used by the notifier tests.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;

use crate::directory::{
    ClientDetail, ClientJoined, ClientKind, ClientSummary, Directory, DirectoryError,
    ERR_INVALID_CLIENT_ID, GroupId, ServerGroup, SessionId,
};

pub fn client(session_id: SessionId, nickname: &str, kind: ClientKind) -> ClientSummary {
    ClientSummary {
        session_id,
        nickname: nickname.into(),
        kind,
    }
}

pub fn joined(
    session_id: SessionId,
    nickname: &str,
    unique_id: &str,
    groups: &[GroupId],
) -> ClientJoined {
    ClientJoined {
        session_id,
        unique_id: unique_id.into(),
        nickname: nickname.into(),
        kind: ClientKind::Voice,
        group_ids: groups.iter().copied().collect(),
    }
}

fn client_gone(command: &str) -> DirectoryError {
    DirectoryError::Query {
        command: command.into(),
        id: ERR_INVALID_CLIENT_ID,
        message: "invalid clientID".into(),
    }
}

#[derive(Default)]
pub struct FakeDirectory {
    pub groups: Vec<ServerGroup>,
    pub clients: Vec<ClientSummary>,
    pub details: HashMap<SessionId, ClientDetail>,
    /// Sessions that disconnect right before being messaged.
    pub gone_on_send: HashSet<SessionId>,
    pub joins: Option<mpsc::UnboundedReceiver<ClientJoined>>,
    pub fail_login: bool,
    pub fail_listing: bool,
    pub fail_keep_alive: bool,
    pub fail_sends: bool,

    pub logins: Vec<(String, String)>,
    pub selected_server: Option<u32>,
    pub keep_alives: usize,
    pub list_calls: usize,
    pub detail_calls: Vec<SessionId>,
    pub pokes: Vec<(SessionId, String)>,
    pub private_messages: Vec<(SessionId, String)>,
}

impl FakeDirectory {
    pub fn with_groups(groups: &[(GroupId, &str)]) -> Self {
        FakeDirectory {
            groups: groups
                .iter()
                .map(|&(id, name)| ServerGroup {
                    id,
                    name: name.into(),
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn add_client(
        &mut self,
        session_id: SessionId,
        nickname: &str,
        unique_id: &str,
        groups: &[GroupId],
    ) {
        self.clients
            .push(client(session_id, nickname, ClientKind::Voice));
        self.details.insert(
            session_id,
            ClientDetail {
                unique_id: unique_id.into(),
                group_ids: groups.iter().copied().collect(),
            },
        );
    }

    pub fn poked(&self) -> Vec<SessionId> {
        self.pokes.iter().map(|(id, _)| *id).collect()
    }

    fn check_send(&self, session_id: SessionId, command: &str) -> Result<(), DirectoryError> {
        if self.fail_sends {
            return Err(DirectoryError::Disconnected);
        }
        if self.gone_on_send.contains(&session_id) {
            return Err(client_gone(command));
        }
        Ok(())
    }
}

impl Directory for FakeDirectory {
    async fn login(&mut self, username: &str, password: &str) -> Result<(), DirectoryError> {
        if self.fail_login {
            return Err(DirectoryError::Query {
                command: "login".into(),
                id: 520,
                message: "invalid loginname or password".into(),
            });
        }
        self.logins.push((username.into(), password.into()));
        Ok(())
    }

    async fn select_virtual_server(&mut self, server_id: u32) -> Result<(), DirectoryError> {
        self.selected_server = Some(server_id);
        Ok(())
    }

    async fn keep_alive(&mut self) -> Result<(), DirectoryError> {
        if self.fail_keep_alive {
            return Err(DirectoryError::Disconnected);
        }
        self.keep_alives += 1;
        Ok(())
    }

    async fn list_groups(&mut self) -> Result<Vec<ServerGroup>, DirectoryError> {
        Ok(self.groups.clone())
    }

    async fn list_clients(&mut self) -> Result<Vec<ClientSummary>, DirectoryError> {
        if self.fail_listing {
            return Err(DirectoryError::Disconnected);
        }
        self.list_calls += 1;
        Ok(self.clients.clone())
    }

    async fn client_detail(&mut self, session_id: SessionId) -> Result<ClientDetail, DirectoryError> {
        self.detail_calls.push(session_id);
        self.details
            .get(&session_id)
            .cloned()
            .ok_or_else(|| client_gone("clientinfo"))
    }

    async fn poke(&mut self, session_id: SessionId, text: &str) -> Result<(), DirectoryError> {
        self.check_send(session_id, "clientpoke")?;
        self.pokes.push((session_id, text.into()));
        Ok(())
    }

    async fn send_private_message(
        &mut self,
        session_id: SessionId,
        text: &str,
    ) -> Result<(), DirectoryError> {
        self.check_send(session_id, "sendtextmessage")?;
        self.private_messages.push((session_id, text.into()));
        Ok(())
    }

    async fn subscribe_joins(
        &mut self,
    ) -> Result<mpsc::UnboundedReceiver<ClientJoined>, DirectoryError> {
        self.joins
            .take()
            .ok_or_else(|| DirectoryError::Protocol("already subscribed to joins".into()))
    }
}
