use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Delivery;
use crate::directory::{Directory, DirectoryError};

use super::discovery::{Candidate, CandidateSource};
use super::notified::{NotifiedSet, Recorded};
use super::targets::{Blacklist, TargetGroups};

/// What happened to a single candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    AlreadyNotified,
    Blacklisted,
    NotTargeted,
    Notified(Recorded),
    /// The client disconnected before the message went out. Not recorded,
    /// so it is notified on its next visit.
    ClientGone,
}

/// The poll-dedupe-notify loop. Sole owner and writer of the notified set.
pub struct Notifier {
    message: String,
    delivery: Delivery,
    targets: TargetGroups,
    blacklist: Blacklist,
    notified: NotifiedSet,
}

impl Notifier {
    pub fn new(
        message: String,
        delivery: Delivery,
        targets: TargetGroups,
        blacklist: Blacklist,
        notified: NotifiedSet,
    ) -> Self {
        Self {
            message,
            delivery,
            targets,
            blacklist,
            notified,
        }
    }

    pub fn notified(&self) -> &NotifiedSet {
        &self.notified
    }

    /// Run until `cancel` fires. Directory failures end the run.
    pub async fn run<D, S>(
        &mut self,
        directory: &mut D,
        source: &mut S,
        cancel: &CancellationToken,
    ) -> Result<(), DirectoryError>
    where
        D: Directory,
        S: CandidateSource,
    {
        info!(
            targets = ?self.targets.ids().collect::<Vec<_>>(),
            already_notified = self.notified.len(),
            "Notifier started"
        );

        while !cancel.is_cancelled() {
            let batch = source.next_batch(directory, cancel).await?;
            for candidate in &batch {
                if cancel.is_cancelled() {
                    break;
                }
                self.handle(directory, candidate).await?;
            }
        }

        info!("Notifier stopped");
        Ok(())
    }

    /// Decide on one candidate and notify it if it qualifies. The id is
    /// recorded only after the send succeeded.
    pub async fn handle<D: Directory>(
        &mut self,
        directory: &mut D,
        candidate: &Candidate,
    ) -> Result<Outcome, DirectoryError> {
        if self.notified.contains(&candidate.unique_id) {
            debug!(unique_id = %candidate.unique_id, "Already notified");
            return Ok(Outcome::AlreadyNotified);
        }
        if self.blacklist.contains(&candidate.nickname) {
            return Ok(Outcome::Blacklisted);
        }
        if !self.targets.matches(&candidate.group_ids) {
            return Ok(Outcome::NotTargeted);
        }

        info!(
            nickname = %candidate.nickname,
            unique_id = %candidate.unique_id,
            "Messaging client"
        );

        let sent = match self.delivery {
            Delivery::Poke => directory.poke(candidate.session_id, &self.message).await,
            Delivery::PrivateMessage => {
                directory
                    .send_private_message(candidate.session_id, &self.message)
                    .await
            }
        };

        match sent {
            Ok(()) => {}
            Err(e) if e.is_client_gone() => {
                warn!(
                    unique_id = %candidate.unique_id,
                    "Client left before it could be messaged"
                );
                return Ok(Outcome::ClientGone);
            }
            Err(e) => return Err(e),
        }

        let recorded = self.notified.record(&candidate.unique_id).await;
        Ok(Outcome::Notified(recorded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::testing::FakeDirectory;
    use std::collections::BTreeSet;

    fn candidate(session_id: u32, nickname: &str, unique_id: &str, groups: &[u32]) -> Candidate {
        Candidate {
            session_id,
            unique_id: unique_id.into(),
            nickname: nickname.into(),
            group_ids: groups.iter().copied().collect::<BTreeSet<_>>(),
        }
    }

    fn notifier(delivery: Delivery) -> Notifier {
        Notifier::new(
            "Outfit Wars".into(),
            delivery,
            [12, 45].into_iter().collect(),
            Blacklist::new(["Vanguard Radio"]),
            NotifiedSet::in_memory(),
        )
    }

    #[tokio::test]
    async fn test_target_member_is_poked_once() {
        let mut dir = FakeDirectory::default();
        let mut n = notifier(Delivery::Poke);
        let a = candidate(5, "alice", "A=", &[3, 45]);

        assert_eq!(
            n.handle(&mut dir, &a).await.unwrap(),
            Outcome::Notified(Recorded::MemoryOnly)
        );
        assert_eq!(
            n.handle(&mut dir, &a).await.unwrap(),
            Outcome::AlreadyNotified
        );
        assert_eq!(dir.pokes, vec![(5, "Outfit Wars".to_string())]);
    }

    #[tokio::test]
    async fn test_same_identity_new_session_is_not_notified_again() {
        let mut dir = FakeDirectory::default();
        let mut n = notifier(Delivery::Poke);
        n.handle(&mut dir, &candidate(5, "alice", "A=", &[45]))
            .await
            .unwrap();
        let outcome = n
            .handle(&mut dir, &candidate(99, "alice", "A=", &[45]))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::AlreadyNotified);
        assert_eq!(dir.poked(), vec![5]);
    }

    #[tokio::test]
    async fn test_blacklisted_name_is_never_messaged() {
        let mut dir = FakeDirectory::default();
        let mut n = notifier(Delivery::Poke);
        let outcome = n
            .handle(&mut dir, &candidate(3, "Vanguard Radio", "V=", &[12]))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Blacklisted);
        assert!(dir.pokes.is_empty());
        assert!(!n.notified().contains("V="));
    }

    #[tokio::test]
    async fn test_non_member_is_ignored() {
        let mut dir = FakeDirectory::default();
        let mut n = notifier(Delivery::Poke);
        let outcome = n
            .handle(&mut dir, &candidate(4, "dave", "D=", &[7]))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::NotTargeted);
        assert!(dir.pokes.is_empty());
    }

    #[tokio::test]
    async fn test_private_message_delivery() {
        let mut dir = FakeDirectory::default();
        let mut n = notifier(Delivery::PrivateMessage);
        n.handle(&mut dir, &candidate(5, "alice", "A=", &[12]))
            .await
            .unwrap();
        assert!(dir.pokes.is_empty());
        assert_eq!(dir.private_messages, vec![(5, "Outfit Wars".to_string())]);
    }

    #[tokio::test]
    async fn test_departed_client_is_not_recorded() {
        let mut dir = FakeDirectory::default();
        dir.gone_on_send.insert(5);
        let mut n = notifier(Delivery::Poke);
        let outcome = n
            .handle(&mut dir, &candidate(5, "alice", "A=", &[12]))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::ClientGone);
        assert!(!n.notified().contains("A="));
    }

    #[tokio::test]
    async fn test_failed_send_propagates_and_is_not_recorded() {
        let mut dir = FakeDirectory {
            fail_sends: true,
            ..Default::default()
        };
        let mut n = notifier(Delivery::Poke);
        let result = n
            .handle(&mut dir, &candidate(5, "alice", "A=", &[12]))
            .await;
        assert!(matches!(result, Err(DirectoryError::Disconnected)));
        assert!(!n.notified().contains("A="));
    }

    #[tokio::test]
    async fn test_empty_target_set_notifies_nobody() {
        let mut dir = FakeDirectory::default();
        let mut n = Notifier::new(
            "hi".into(),
            Delivery::Poke,
            TargetGroups::default(),
            Blacklist::default(),
            NotifiedSet::in_memory(),
        );
        let outcome = n
            .handle(&mut dir, &candidate(5, "alice", "A=", &[12]))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::NotTargeted);
    }
}
