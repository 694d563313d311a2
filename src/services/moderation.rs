use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::auth::{Caller, Role};
use crate::error::{RepoResultExt, ServiceResult};
use crate::models::*;
use crate::repo::Repo;
use crate::require_role;
use crate::services::{AuditLog, NotificationService};
use crate::visibility::Visibility;

/// Approval flag a new question starts with.
pub fn initial_approval(role: Role) -> bool {
    role.is_staff()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ModerationAction {
    Approve,
    Reject,
    Lock,
    Unlock,
    Pin,
    Unpin,
}

impl ModerationAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ModerationAction::Approve => "approve",
            ModerationAction::Reject => "reject",
            ModerationAction::Lock => "lock",
            ModerationAction::Unlock => "unlock",
            ModerationAction::Pin => "pin",
            ModerationAction::Unpin => "unpin",
        }
    }

    fn flags(self) -> FlagUpdate {
        match self {
            ModerationAction::Approve => FlagUpdate { approved: Some(true), ..Default::default() },
            ModerationAction::Reject => FlagUpdate { approved: Some(false), ..Default::default() },
            ModerationAction::Lock => FlagUpdate { locked: Some(true), ..Default::default() },
            ModerationAction::Unlock => FlagUpdate { locked: Some(false), ..Default::default() },
            ModerationAction::Pin => FlagUpdate { pinned: Some(true), ..Default::default() },
            ModerationAction::Unpin => FlagUpdate { pinned: Some(false), ..Default::default() },
        }
    }

    fn activity(self) -> ActivityAction {
        match self {
            ModerationAction::Approve => ActivityAction::ApproveQuestion,
            ModerationAction::Reject => ActivityAction::RejectQuestion,
            ModerationAction::Lock => ActivityAction::LockQuestion,
            ModerationAction::Unlock => ActivityAction::UnlockQuestion,
            ModerationAction::Pin => ActivityAction::PinQuestion,
            ModerationAction::Unpin => ActivityAction::UnpinQuestion,
        }
    }

    /// Authors hear about approval, rejection and locking only.
    fn notice(self, q: &Question) -> Option<NotificationDraft> {
        let (kind, message) = match self {
            ModerationAction::Approve => ("QUESTION_APPROVED", format!("Your question \"{}\" has been approved", q.title)),
            ModerationAction::Reject => ("QUESTION_REJECTED", format!("Your question \"{}\" was not approved", q.title)),
            ModerationAction::Lock => ("QUESTION_LOCKED", format!("Your question \"{}\" has been locked", q.title)),
            _ => return None,
        };
        Some(NotificationDraft::new(kind, message).link(format!("/questions/{}", q.id)))
    }
}

/// Staff transitions over the three independent question flags.
#[derive(Clone)]
pub struct Moderation {
    repo: Arc<dyn Repo>,
    audit: AuditLog,
    notifier: NotificationService,
}

impl Moderation {
    pub fn new(repo: Arc<dyn Repo>, audit: AuditLog, notifier: NotificationService) -> Self {
        Self { repo, audit, notifier }
    }

    /// Apply one transition. Re-applying a transition whose target value is
    /// already in place changes nothing and records nothing.
    pub async fn apply(&self, caller: &Caller, id: Id, action: ModerationAction) -> ServiceResult<Question> {
        require_role!(caller, Role::Manager | Role::Admin);
        let current = self.repo.get_question(id).await.or_missing(EntityKind::Question, id)?;
        let flags = action.flags();
        if flags.is_satisfied_by(&current) {
            debug!(question_id = id, action = action.as_str(), "moderation no-op");
            return Ok(current);
        }
        let updated = self.repo.update_flags(id, flags).await.or_missing(EntityKind::Question, id)?;
        info!(question_id = id, action = action.as_str(), moderator = caller.user_id, "question moderated");
        metrics::increment_counter!("askboard_moderation_actions_total", "action" => action.as_str());

        self.audit
            .record(
                NewActivity::new(action.activity())
                    .by(caller)
                    .on(EntityKind::Question, id)
                    .details(format!("{} question \"{}\"", action.as_str(), updated.title)),
            )
            .await;
        if updated.author_id != caller.user_id {
            if let Some(draft) = action.notice(&updated) {
                self.notifier.emit(Some(caller.user_id), updated.author_id, draft).await;
            }
        }
        Ok(updated)
    }

    pub async fn approve(&self, caller: &Caller, id: Id) -> ServiceResult<Question> {
        self.apply(caller, id, ModerationAction::Approve).await
    }

    pub async fn reject(&self, caller: &Caller, id: Id) -> ServiceResult<Question> {
        self.apply(caller, id, ModerationAction::Reject).await
    }

    pub async fn lock(&self, caller: &Caller, id: Id) -> ServiceResult<Question> {
        self.apply(caller, id, ModerationAction::Lock).await
    }

    pub async fn unlock(&self, caller: &Caller, id: Id) -> ServiceResult<Question> {
        self.apply(caller, id, ModerationAction::Unlock).await
    }

    pub async fn pin(&self, caller: &Caller, id: Id) -> ServiceResult<Question> {
        self.apply(caller, id, ModerationAction::Pin).await
    }

    pub async fn unpin(&self, caller: &Caller, id: Id) -> ServiceResult<Question> {
        self.apply(caller, id, ModerationAction::Unpin).await
    }

    pub async fn toggle_lock(&self, caller: &Caller, id: Id) -> ServiceResult<Question> {
        require_role!(caller, Role::Manager | Role::Admin);
        let q = self.repo.get_question(id).await.or_missing(EntityKind::Question, id)?;
        let action = if q.is_locked { ModerationAction::Unlock } else { ModerationAction::Lock };
        self.apply(caller, id, action).await
    }

    pub async fn toggle_pin(&self, caller: &Caller, id: Id) -> ServiceResult<Question> {
        require_role!(caller, Role::Manager | Role::Admin);
        let q = self.repo.get_question(id).await.or_missing(EntityKind::Question, id)?;
        let action = if q.is_pinned { ModerationAction::Unpin } else { ModerationAction::Pin };
        self.apply(caller, id, action).await
    }

    /// Questions awaiting approval, for the moderation queue.
    pub async fn pending(&self, caller: &Caller, page: &PageRequest) -> ServiceResult<Page<Question>> {
        require_role!(caller, Role::Manager | Role::Admin);
        let query = QuestionQuery { approved: Some(false), ..Default::default() };
        Ok(self.repo.list_questions(Visibility::Unrestricted, &query, page).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_staff_start_approved() {
        assert!(!initial_approval(Role::User));
        assert!(initial_approval(Role::Manager));
        assert!(initial_approval(Role::Admin));
    }

    #[test]
    fn each_action_touches_one_flag() {
        for action in [
            ModerationAction::Approve,
            ModerationAction::Reject,
            ModerationAction::Lock,
            ModerationAction::Unlock,
            ModerationAction::Pin,
            ModerationAction::Unpin,
        ] {
            let f = action.flags();
            let touched = [f.approved, f.locked, f.pinned].iter().filter(|v| v.is_some()).count();
            assert_eq!(touched, 1, "{action:?}");
        }
    }
}
