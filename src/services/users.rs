use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;

use crate::auth::{Caller, Role};
use crate::error::{RepoResultExt, ServiceError, ServiceResult};
use crate::models::*;
use crate::repo::{RepoError, Repo};
use crate::require_role;
use crate::services::{require_text, AuditLog, NotificationService};

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct BanRequest {
    /// Absent for a permanent ban.
    pub until: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

/// Account records: caller resolution plus the admin-only ban and role
/// operations.
#[derive(Clone)]
pub struct UserAdmin {
    repo: Arc<dyn Repo>,
    audit: AuditLog,
    notifier: NotificationService,
}

impl UserAdmin {
    pub fn new(repo: Arc<dyn Repo>, audit: AuditLog, notifier: NotificationService) -> Self {
        Self { repo, audit, notifier }
    }

    /// Build the acting identity from the stored record, so role changes and
    /// bans apply to tokens issued before them.
    pub async fn resolve_caller(&self, user_id: Id, ip: Option<String>) -> ServiceResult<Caller> {
        let user = self.repo.get_user(user_id).await.or_missing(EntityKind::User, user_id)?;
        Ok(Caller {
            user_id: user.id,
            role: user.role,
            ip,
            banned: user.ban_active(Utc::now()),
        })
    }

    pub async fn get(&self, id: Id) -> ServiceResult<User> {
        self.repo.get_user(id).await.or_missing(EntityKind::User, id)
    }

    /// Create an account record. Accounts come from the identity provider;
    /// this is its entry point and the bootstrap path.
    pub async fn provision(&self, new: NewUser) -> ServiceResult<User> {
        let username = require_text("username", &new.username, 50)?;
        let email = require_text("email", &new.email, 255)?;
        match self.repo.create_user(NewUser { username: username.clone(), email, role: new.role }).await {
            Ok(u) => {
                info!(user_id = u.id, %username, role = %u.role, "user provisioned");
                Ok(u)
            }
            Err(RepoError::Conflict) => Err(ServiceError::Validation(format!("username '{username}' is taken"))),
            Err(e) => Err(e.into()),
        }
    }

    /// Find by username or provision; used to seed the bootstrap admin.
    pub async fn ensure(&self, new: NewUser) -> ServiceResult<User> {
        if let Some(u) = self.repo.find_user_by_username(&new.username).await? {
            return Ok(u);
        }
        self.provision(new).await
    }

    pub async fn list(&self, caller: &Caller, role: Option<Role>) -> ServiceResult<Vec<User>> {
        require_role!(caller, Role::Manager | Role::Admin);
        Ok(self.repo.list_users(role).await?)
    }

    pub async fn ban(&self, caller: &Caller, user_id: Id, req: BanRequest) -> ServiceResult<User> {
        require_role!(caller, Role::Admin);
        if user_id == caller.user_id {
            return Err(ServiceError::InvalidState("cannot ban yourself".into()));
        }
        if let Some(until) = req.until {
            if until <= Utc::now() {
                return Err(ServiceError::Validation("ban expiry must be in the future".into()));
            }
        }
        self.repo.get_user(user_id).await.or_missing(EntityKind::User, user_id)?;
        let reason = req.reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        let user = self
            .repo
            .update_ban(user_id, BanState { is_banned: true, banned_until: req.until, ban_reason: reason.clone() })
            .await
            .or_missing(EntityKind::User, user_id)?;
        let term = match req.until {
            Some(until) => format!("until {}", until.to_rfc3339()),
            None => "permanently".into(),
        };
        info!(user_id, by = caller.user_id, %term, "user banned");
        self.audit
            .record(
                NewActivity::new(ActivityAction::BanUser)
                    .by(caller)
                    .on(EntityKind::User, user_id)
                    .details(format!("banned {} {term}: {}", user.username, reason.as_deref().unwrap_or("no reason given"))),
            )
            .await;
        let message = match &reason {
            Some(r) => format!("Your account has been banned {term}. Reason: {r}"),
            None => format!("Your account has been banned {term}"),
        };
        self.notifier.emit(Some(caller.user_id), user_id, NotificationDraft::new("ACCOUNT_BANNED", message)).await;
        Ok(user)
    }

    pub async fn unban(&self, caller: &Caller, user_id: Id) -> ServiceResult<User> {
        require_role!(caller, Role::Admin);
        let current = self.repo.get_user(user_id).await.or_missing(EntityKind::User, user_id)?;
        if !current.is_banned {
            return Ok(current);
        }
        let user = self
            .repo
            .update_ban(user_id, BanState { is_banned: false, banned_until: None, ban_reason: None })
            .await
            .or_missing(EntityKind::User, user_id)?;
        info!(user_id, by = caller.user_id, "user unbanned");
        self.audit
            .record(
                NewActivity::new(ActivityAction::UnbanUser)
                    .by(caller)
                    .on(EntityKind::User, user_id)
                    .details(format!("unbanned {}", user.username)),
            )
            .await;
        self.notifier
            .emit(Some(caller.user_id), user_id, NotificationDraft::new("ACCOUNT_UNBANNED", "Your account ban has been lifted"))
            .await;
        Ok(user)
    }

    /// Remove an account and the content it owns. Refused while the user
    /// is recorded as the resolver of a report, so closed reports keep
    /// their moderator.
    pub async fn delete(&self, caller: &Caller, user_id: Id) -> ServiceResult<()> {
        require_role!(caller, Role::Admin);
        if user_id == caller.user_id {
            return Err(ServiceError::InvalidState("cannot delete yourself".into()));
        }
        let user = self.repo.get_user(user_id).await.or_missing(EntityKind::User, user_id)?;
        match self.repo.delete_user(user_id).await {
            Ok(()) => {}
            Err(RepoError::Conflict) => {
                return Err(ServiceError::InvalidState(format!("{} has resolved reports", user.username)))
            }
            Err(RepoError::NotFound) => return Err(ServiceError::NotFound(EntityKind::User, user_id)),
            Err(e) => return Err(e.into()),
        }
        info!(user_id, by = caller.user_id, "user deleted");
        self.audit
            .record(
                NewActivity::new(ActivityAction::DeleteUser)
                    .by(caller)
                    .on(EntityKind::User, user_id)
                    .details(format!("deleted {} ({})", user.username, user.role)),
            )
            .await;
        Ok(())
    }

    pub async fn change_role(&self, caller: &Caller, user_id: Id, role: Role) -> ServiceResult<User> {
        require_role!(caller, Role::Admin);
        if user_id == caller.user_id {
            return Err(ServiceError::InvalidState("cannot change your own role".into()));
        }
        let current = self.repo.get_user(user_id).await.or_missing(EntityKind::User, user_id)?;
        if current.role == role {
            return Ok(current);
        }
        let user = self.repo.update_role(user_id, role).await.or_missing(EntityKind::User, user_id)?;
        info!(user_id, from = %current.role, to = %role, "role changed");
        self.audit
            .record(
                NewActivity::new(ActivityAction::ChangeRole)
                    .by(caller)
                    .on(EntityKind::User, user_id)
                    .details(format!("{}: {} -> {}", user.username, current.role, role)),
            )
            .await;
        self.notifier
            .emit(Some(caller.user_id), user_id, NotificationDraft::new("ROLE_CHANGED", format!("Your role is now {role}")))
            .await;
        Ok(user)
    }
}
