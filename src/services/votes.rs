use std::sync::Arc;

use tracing::debug;

use crate::auth::Caller;
use crate::error::{RepoResultExt, ServiceError, ServiceResult};
use crate::models::*;
use crate::repo::{RepoError, Repo};
use crate::services::ensure_active;
use crate::visibility::can_view;

/// Attempts before a lost same-user race is reported as `Conflict`.
const MAX_ATTEMPTS: u32 = 3;

/// One upvote per user per target. The membership row and the count on the
/// target change together inside `VoteRepo::record_vote`.
#[derive(Clone)]
pub struct VoteLedger {
    repo: Arc<dyn Repo>,
}

impl VoteLedger {
    pub fn new(repo: Arc<dyn Repo>) -> Self {
        Self { repo }
    }

    /// Add the caller's vote, or take it back if they already hold one.
    pub async fn toggle_upvote(&self, caller: &Caller, target: VoteTarget) -> ServiceResult<VoteTally> {
        ensure_active(caller)?;
        self.check_target(caller, target).await?;
        for attempt in 1..=MAX_ATTEMPTS {
            let voted = self.repo.has_voted(caller.user_id, target).await?;
            let change = if voted { VoteChange::Retract } else { VoteChange::Cast };
            match self.apply(caller, target, change).await {
                Ok(votes) => return Ok(VoteTally { target, votes, voted: !voted }),
                Err(ServiceError::Conflict) => debug!(attempt, ?target, "vote raced, retrying"),
                Err(e) => return Err(e),
            }
        }
        Err(ServiceError::Conflict)
    }

    /// Undo a prior upvote. Without one there is nothing to undo.
    pub async fn downvote(&self, caller: &Caller, target: VoteTarget) -> ServiceResult<VoteTally> {
        ensure_active(caller)?;
        self.check_target(caller, target).await?;
        for attempt in 1..=MAX_ATTEMPTS {
            if !self.repo.has_voted(caller.user_id, target).await? {
                return Err(ServiceError::InvalidState("must upvote before downvote".into()));
            }
            match self.apply(caller, target, VoteChange::Retract).await {
                Ok(votes) => return Ok(VoteTally { target, votes, voted: false }),
                Err(ServiceError::Conflict) => debug!(attempt, ?target, "downvote raced, retrying"),
                Err(e) => return Err(e),
            }
        }
        Err(ServiceError::Conflict)
    }

    /// Current count and whether `caller` holds a vote. Content under a
    /// question the caller cannot see is reported as missing.
    pub async fn tally(&self, caller: Option<&Caller>, target: VoteTarget) -> ServiceResult<VoteTally> {
        let (question_id, answer_votes) = match target.kind {
            ContentKind::Question => (target.id, None),
            ContentKind::Answer => {
                let a = self.repo.get_answer(target.id).await.or_missing(EntityKind::Answer, target.id)?;
                (a.question_id, Some(a.votes))
            }
        };
        let q = self.repo.get_question(question_id).await.or_missing(EntityKind::Question, question_id)?;
        if !can_view(&q, caller) {
            return Err(ServiceError::NotFound(target.kind.into(), target.id));
        }
        let votes = answer_votes.unwrap_or(q.votes);
        let voted = match caller {
            Some(c) => self.repo.has_voted(c.user_id, target).await?,
            None => false,
        };
        Ok(VoteTally { target, votes, voted })
    }

    async fn apply(&self, caller: &Caller, target: VoteTarget, change: VoteChange) -> ServiceResult<i64> {
        match self.repo.record_vote(caller.user_id, target, change).await {
            Ok(votes) => {
                let kind = EntityKind::from(target.kind).as_str();
                let dir = match change {
                    VoteChange::Cast => "cast",
                    VoteChange::Retract => "retract",
                };
                metrics::increment_counter!("askboard_votes_total", "kind" => kind, "change" => dir);
                Ok(votes)
            }
            Err(RepoError::NotFound) => Err(ServiceError::NotFound(target.kind.into(), target.id)),
            Err(e) => Err(e.into()),
        }
    }

    /// The target must exist and, for questions (or an answer's parent),
    /// be visible to the voter.
    async fn check_target(&self, caller: &Caller, target: VoteTarget) -> ServiceResult<()> {
        let question_id = match target.kind {
            ContentKind::Question => target.id,
            ContentKind::Answer => {
                self.repo.get_answer(target.id).await.or_missing(EntityKind::Answer, target.id)?.question_id
            }
        };
        let q = self.repo.get_question(question_id).await.or_missing(EntityKind::Question, question_id)?;
        if !can_view(&q, Some(caller)) {
            return Err(ServiceError::NotFound(EntityKind::Question, question_id));
        }
        Ok(())
    }
}
