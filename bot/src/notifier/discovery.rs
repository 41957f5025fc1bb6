use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::directory::{
    ClientJoined, ClientKind, Directory, DirectoryError, GroupId, SessionId,
};

use super::targets::Blacklist;

/// A connected client that might need notifying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub session_id: SessionId,
    pub unique_id: String,
    pub nickname: String,
    pub group_ids: BTreeSet<GroupId>,
}

impl From<ClientJoined> for Candidate {
    fn from(joined: ClientJoined) -> Self {
        Candidate {
            session_id: joined.session_id,
            unique_id: joined.unique_id,
            nickname: joined.nickname,
            group_ids: joined.group_ids,
        }
    }
}

/// Produces candidates for the notifier, one batch per call.
/// Implementations pace themselves and return early (possibly empty) once
/// `cancel` fires.
pub trait CandidateSource {
    fn next_batch<D: Directory>(
        &mut self,
        directory: &mut D,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Vec<Candidate>, DirectoryError>>;
}

/// Sleep for `duration` unless cancelled first. Returns false when cancelled.
pub async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Push discovery: drains the join queue fed by the directory's event reader.
/// Group membership comes with the event, so no extra round trip is needed.
pub struct EventDiscovery {
    joins: mpsc::UnboundedReceiver<ClientJoined>,
    blacklist: Blacklist,
    tick: Duration,
    keep_alive_every: Duration,
    last_keep_alive: Instant,
}

impl EventDiscovery {
    pub fn new(
        joins: mpsc::UnboundedReceiver<ClientJoined>,
        blacklist: Blacklist,
        tick: Duration,
        keep_alive_every: Duration,
    ) -> Self {
        Self {
            joins,
            blacklist,
            tick,
            keep_alive_every,
            last_keep_alive: Instant::now(),
        }
    }

    fn accept(&self, joined: ClientJoined) -> Option<Candidate> {
        debug!(
            nickname = %joined.nickname,
            unique_id = %joined.unique_id,
            groups = ?joined.group_ids,
            "Client joined"
        );
        if joined.kind != ClientKind::Voice {
            return None;
        }
        if self.blacklist.contains(&joined.nickname) {
            debug!(nickname = %joined.nickname, "Ignoring blacklisted client");
            return None;
        }
        Some(joined.into())
    }
}

impl CandidateSource for EventDiscovery {
    async fn next_batch<D: Directory>(
        &mut self,
        directory: &mut D,
        cancel: &CancellationToken,
    ) -> Result<Vec<Candidate>, DirectoryError> {
        if self.last_keep_alive.elapsed() >= self.keep_alive_every {
            directory.keep_alive().await?;
            self.last_keep_alive = Instant::now();
        }

        let mut batch = Vec::new();
        loop {
            match self.joins.try_recv() {
                Ok(joined) => batch.extend(self.accept(joined)),
                Err(TryRecvError::Empty) => break,
                // The reader task is gone, so the connection is too
                Err(TryRecvError::Disconnected) => return Err(DirectoryError::Disconnected),
            }
        }

        if batch.is_empty() {
            pause(cancel, self.tick).await;
        }
        Ok(batch)
    }
}

/// Pull discovery: re-lists all clients each round and fetches group
/// membership for clients it has not inspected yet.
///
/// A session id is inspected at most once per process, even if the client's
/// groups change later.
pub struct PollingDiscovery {
    blacklist: Blacklist,
    interval: Duration,
    detail_delay: Duration,
    checked: HashSet<SessionId>,
    primed: bool,
}

impl PollingDiscovery {
    pub fn new(blacklist: Blacklist, interval: Duration, detail_delay: Duration) -> Self {
        Self {
            blacklist,
            interval,
            detail_delay,
            checked: HashSet::new(),
            primed: false,
        }
    }

    pub fn is_checked(&self, session_id: SessionId) -> bool {
        self.checked.contains(&session_id)
    }
}

impl CandidateSource for PollingDiscovery {
    async fn next_batch<D: Directory>(
        &mut self,
        directory: &mut D,
        cancel: &CancellationToken,
    ) -> Result<Vec<Candidate>, DirectoryError> {
        // The first round runs immediately
        if self.primed && !pause(cancel, self.interval).await {
            return Ok(Vec::new());
        }
        self.primed = true;

        let unchecked: Vec<_> = directory
            .list_clients()
            .await?
            .into_iter()
            .filter(|c| c.kind == ClientKind::Voice)
            .filter(|c| !self.blacklist.contains(&c.nickname))
            .filter(|c| !self.checked.contains(&c.session_id))
            .collect();

        if !unchecked.is_empty() {
            info!(count = unchecked.len(), "Inspecting new clients");
        }

        let mut batch = Vec::new();
        for (i, client) in unchecked.into_iter().enumerate() {
            if i > 0 && !pause(cancel, self.detail_delay).await {
                break;
            }

            // Marked before the fetch so a failure is not retried next round
            self.checked.insert(client.session_id);

            match directory.client_detail(client.session_id).await {
                Ok(detail) => batch.push(Candidate {
                    session_id: client.session_id,
                    unique_id: detail.unique_id,
                    nickname: client.nickname,
                    group_ids: detail.group_ids,
                }),
                Err(e) if e.is_client_gone() => {
                    debug!(session_id = client.session_id, "Client left before inspection");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(batch)
    }
}
