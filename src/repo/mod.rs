use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::*;
use crate::visibility::Visibility;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create_user(&self, new: NewUser) -> RepoResult<User>;
    async fn get_user(&self, id: Id) -> RepoResult<User>;
    async fn find_user_by_username(&self, username: &str) -> RepoResult<Option<User>>;
    /// All users, or only those holding `role`. Used by the notification fan-out.
    async fn list_users(&self, role: Option<Role>) -> RepoResult<Vec<User>>;
    async fn update_ban(&self, id: Id, ban: BanState) -> RepoResult<User>;
    async fn update_role(&self, id: Id, role: Role) -> RepoResult<User>;
    async fn count_users(&self, banned_only: bool) -> RepoResult<u64>;
    /// Removes the account with what it owns: authored questions (with their
    /// answers) and answers, cast votes (counts adjusted), filed reports and
    /// received notifications. Notifications it sent lose their sender; audit
    /// rows are kept. `Conflict` while the user is the resolver of any report.
    async fn delete_user(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait QuestionRepo: Send + Sync {
    /// Inserts the question and bumps the usage count of each tag.
    async fn create_question(&self, new: QuestionInsert) -> RepoResult<Question>;
    async fn get_question(&self, id: Id) -> RepoResult<Question>;
    async fn list_questions(&self, vis: Visibility, query: &QuestionQuery, page: &PageRequest) -> RepoResult<Page<Question>>;
    /// Replaces title and body; `Some(tags)` swaps the tag set and moves the
    /// usage counts with it.
    async fn update_question(&self, id: Id, update: QuestionUpdate) -> RepoResult<Question>;
    async fn update_flags(&self, id: Id, flags: FlagUpdate) -> RepoResult<Question>;
    async fn increment_views(&self, id: Id) -> RepoResult<Question>;
    /// Deletes the question with its answers, votes and tag memberships,
    /// decrementing tag counts.
    async fn delete_question(&self, id: Id) -> RepoResult<()>;
    async fn count_questions(&self, approved: Option<bool>) -> RepoResult<u64>;
    async fn list_tags(&self) -> RepoResult<Vec<Tag>>;
}

#[async_trait]
pub trait AnswerRepo: Send + Sync {
    /// Inserts the answer and increments the parent's `answer_count`.
    async fn create_answer(&self, new: AnswerInsert) -> RepoResult<Answer>;
    async fn get_answer(&self, id: Id) -> RepoResult<Answer>;
    /// Accepted answer first, then by votes, then newest.
    async fn list_answers(&self, question_id: Id) -> RepoResult<Vec<Answer>>;
    /// Marks `answer_id` accepted and clears any previous acceptance on the
    /// same question in one step.
    async fn accept_answer(&self, question_id: Id, answer_id: Id) -> RepoResult<Answer>;
    async fn update_answer(&self, id: Id, body: String) -> RepoResult<Answer>;
    /// Deletes the answer, decrementing the parent's `answer_count` and
    /// clearing the parent's accepted reference when it pointed here.
    async fn delete_answer(&self, id: Id) -> RepoResult<Answer>;
    async fn count_answers(&self) -> RepoResult<u64>;
}

/// Membership relation keyed by `(user, kind, id)`.
#[async_trait]
pub trait VoteRepo: Send + Sync {
    async fn has_voted(&self, user_id: Id, target: VoteTarget) -> RepoResult<bool>;
    /// Applies the membership change and the matching count delta atomically,
    /// returning the new count. `Conflict` when casting an existing vote or
    /// retracting a missing one; `NotFound` when the target does not exist.
    async fn record_vote(&self, user_id: Id, target: VoteTarget, change: VoteChange) -> RepoResult<i64>;
}

#[async_trait]
pub trait ReportRepo: Send + Sync {
    async fn create_report(&self, new: ReportInsert) -> RepoResult<Report>;
    async fn get_report(&self, id: Id) -> RepoResult<Report>;
    async fn list_reports(&self, status: Option<ReportStatus>, reporter: Option<Id>, page: &PageRequest) -> RepoResult<Page<Report>>;
    /// Only applies while the report is still PENDING; `Conflict` otherwise.
    async fn close_report(&self, id: Id, closure: ReportClosure) -> RepoResult<Report>;
    async fn count_reports(&self, status: Option<ReportStatus>) -> RepoResult<u64>;
    async fn delete_report(&self, id: Id) -> RepoResult<Report>;
}

#[async_trait]
pub trait NotificationRepo: Send + Sync {
    async fn insert_notifications(&self, rows: Vec<NotificationInsert>) -> RepoResult<Vec<Notification>>;
    async fn get_notification(&self, id: Id) -> RepoResult<Notification>;
    /// Newest first.
    async fn list_notifications_for(&self, user_id: Id, unread_only: bool) -> RepoResult<Vec<Notification>>;
    async fn list_notifications(&self, page: &PageRequest) -> RepoResult<Page<Notification>>;
    async fn mark_read(&self, id: Id) -> RepoResult<Notification>;
    async fn mark_all_read(&self, user_id: Id) -> RepoResult<u64>;
    async fn delete_notification(&self, id: Id) -> RepoResult<()>;
    async fn count_notifications(&self, unread_only: bool, user_id: Option<Id>) -> RepoResult<u64>;
}

/// Append-only: there is deliberately no update method.
#[async_trait]
pub trait ActivityLogRepo: Send + Sync {
    async fn append_activity(&self, entry: NewActivity) -> RepoResult<ActivityLog>;
    /// Newest first.
    async fn search_activity(&self, filter: &ActivityFilter, page: &PageRequest) -> RepoResult<Page<ActivityLog>>;
    async fn purge_activity_before(&self, cutoff: DateTime<Utc>) -> RepoResult<u64>;
    async fn count_activity(&self, action: Option<ActivityAction>, since: Option<DateTime<Utc>>) -> RepoResult<u64>;
}

pub trait Repo: UserRepo + QuestionRepo + AnswerRepo + VoteRepo + ReportRepo + NotificationRepo + ActivityLogRepo {}

impl<T> Repo for T where T: UserRepo + QuestionRepo + AnswerRepo + VoteRepo + ReportRepo + NotificationRepo + ActivityLogRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem;

#[cfg(feature = "postgres-store")]
pub mod pg;
