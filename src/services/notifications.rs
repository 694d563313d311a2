use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::auth::{Caller, Role};
use crate::error::{RepoResultExt, ServiceError, ServiceResult};
use crate::models::*;
use crate::repo::{RepoError, Repo};
use crate::require_role;
use crate::services::AuditLog;

#[derive(Clone)]
pub struct NotificationService {
    repo: Arc<dyn Repo>,
    audit: AuditLog,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct BatchDeleteOutcome {
    pub deleted: Vec<Id>,
    /// Missing ids and rows the caller may not delete.
    pub skipped: Vec<Id>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NotificationTotals {
    pub total: u64,
    pub unread: u64,
}

impl NotificationService {
    pub fn new(repo: Arc<dyn Repo>, audit: AuditLog) -> Self {
        Self { repo, audit }
    }

    /// Side-effect notification raised by another operation (a moderation
    /// decision, a new answer). Failure is logged; the triggering operation
    /// has already committed.
    pub async fn emit(&self, sender: Option<Id>, user_id: Id, draft: NotificationDraft) {
        let row = NotificationInsert { user_id, sender_id: sender, draft };
        match self.repo.insert_notifications(vec![row]).await {
            Ok(_) => metrics::increment_counter!("askboard_notifications_total", "fanout" => "event"),
            Err(e) => warn!(user_id, error = %e, "failed to deliver notification"),
        }
    }

    /// Direct message from staff to one user.
    pub async fn notify_user(&self, sender: &Caller, user_id: Id, draft: NotificationDraft) -> ServiceResult<Notification> {
        require_role!(sender, Role::Manager | Role::Admin);
        self.repo.get_user(user_id).await.or_missing(EntityKind::User, user_id)?;
        let row = NotificationInsert { user_id, sender_id: Some(sender.user_id), draft };
        let mut created = self.repo.insert_notifications(vec![row]).await?;
        let n = created.pop().ok_or_else(|| ServiceError::Storage("insert returned no row".into()))?;
        metrics::increment_counter!("askboard_notifications_total", "fanout" => "direct");
        self.audit
            .record(
                NewActivity::new(ActivityAction::SendNotification)
                    .by(sender)
                    .on(EntityKind::Notification, n.id)
                    .details(format!("sent '{}' to user {}", n.kind, user_id)),
            )
            .await;
        Ok(n)
    }

    /// One row per user currently holding `role`. Returns the number created;
    /// zero recipients is not an error.
    pub async fn notify_by_role(&self, caller: &Caller, role: Role, draft: NotificationDraft) -> ServiceResult<u64> {
        require_role!(caller, Role::Manager | Role::Admin);
        let recipients = self.repo.list_users(Some(role)).await?;
        self.fan_out(caller, recipients, draft, &format!("role {role}")).await
    }

    pub async fn notify_all_users(&self, caller: &Caller, draft: NotificationDraft) -> ServiceResult<u64> {
        require_role!(caller, Role::Manager | Role::Admin);
        let recipients = self.repo.list_users(None).await?;
        self.fan_out(caller, recipients, draft, "all users").await
    }

    async fn fan_out(&self, caller: &Caller, recipients: Vec<User>, draft: NotificationDraft, audience: &str) -> ServiceResult<u64> {
        if recipients.is_empty() {
            debug!(audience, "broadcast has no recipients");
            return Ok(0);
        }
        let rows: Vec<_> = recipients
            .into_iter()
            .map(|u| NotificationInsert { user_id: u.id, sender_id: Some(caller.user_id), draft: draft.clone() })
            .collect();
        let sent = self.repo.insert_notifications(rows).await?.len() as u64;
        metrics::counter!("askboard_notifications_total", sent, "fanout" => "broadcast");
        self.audit
            .record(
                NewActivity::new(ActivityAction::SendNotification)
                    .by(caller)
                    .details(format!("broadcast '{}' to {audience}: {sent} recipients", draft.kind)),
            )
            .await;
        Ok(sent)
    }

    pub async fn list_mine(&self, caller: &Caller, unread_only: bool) -> ServiceResult<Vec<Notification>> {
        Ok(self.repo.list_notifications_for(caller.user_id, unread_only).await?)
    }

    pub async fn unread_count(&self, caller: &Caller) -> ServiceResult<u64> {
        Ok(self.repo.count_notifications(true, Some(caller.user_id)).await?)
    }

    pub async fn mark_as_read(&self, caller: &Caller, id: Id) -> ServiceResult<Notification> {
        let n = self.repo.get_notification(id).await.or_missing(EntityKind::Notification, id)?;
        if n.user_id != caller.user_id && !caller.is_staff() {
            return Err(ServiceError::Forbidden("not your notification".into()));
        }
        if n.is_read {
            return Ok(n);
        }
        self.repo.mark_read(id).await.or_missing(EntityKind::Notification, id)
    }

    pub async fn mark_all_as_read(&self, caller: &Caller) -> ServiceResult<u64> {
        Ok(self.repo.mark_all_read(caller.user_id).await?)
    }

    /// Owner or staff may delete, except that only admins may delete a
    /// notification sent by an admin.
    pub async fn delete(&self, caller: &Caller, id: Id) -> ServiceResult<()> {
        let n = self.repo.get_notification(id).await.or_missing(EntityKind::Notification, id)?;
        self.authorize_delete(caller, &n).await?;
        self.repo.delete_notification(id).await.or_missing(EntityKind::Notification, id)?;
        self.audit
            .record(
                NewActivity::new(ActivityAction::DeleteNotification)
                    .by(caller)
                    .on(EntityKind::Notification, id),
            )
            .await;
        Ok(())
    }

    pub async fn delete_batch(&self, caller: &Caller, ids: &[Id]) -> ServiceResult<BatchDeleteOutcome> {
        let mut outcome = BatchDeleteOutcome::default();
        for &id in ids {
            match self.delete(caller, id).await {
                Ok(()) => outcome.deleted.push(id),
                Err(ServiceError::NotFound(..)) | Err(ServiceError::Forbidden(_)) => outcome.skipped.push(id),
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }

    async fn authorize_delete(&self, caller: &Caller, n: &Notification) -> ServiceResult<()> {
        if n.user_id != caller.user_id && !caller.is_staff() {
            return Err(ServiceError::Forbidden("not your notification".into()));
        }
        if caller.is_admin() {
            return Ok(());
        }
        let Some(sender_id) = n.sender_id else { return Ok(()) };
        let sender_role = match self.repo.get_user(sender_id).await {
            Ok(u) => Some(u.role),
            Err(RepoError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        if sender_role == Some(Role::Admin) {
            return Err(ServiceError::Forbidden("notifications sent by an admin can only be deleted by an admin".into()));
        }
        Ok(())
    }

    pub async fn list_all(&self, caller: &Caller, page: &PageRequest) -> ServiceResult<Page<Notification>> {
        require_role!(caller, Role::Manager | Role::Admin);
        Ok(self.repo.list_notifications(page).await?)
    }

    pub async fn totals(&self, caller: &Caller) -> ServiceResult<NotificationTotals> {
        require_role!(caller, Role::Manager | Role::Admin);
        Ok(NotificationTotals {
            total: self.repo.count_notifications(false, None).await?,
            unread: self.repo.count_notifications(true, None).await?,
        })
    }
}
