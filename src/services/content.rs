use std::sync::Arc;

use tracing::info;

use crate::auth::Caller;
use crate::error::{RepoResultExt, ServiceError, ServiceResult};
use crate::models::*;
use crate::repo::Repo;
use crate::services::moderation::initial_approval;
use crate::services::{ensure_active, require_text, AuditLog, NotificationService};
use crate::visibility::{can_view, Visibility};

const MAX_TITLE: usize = 300;
const MAX_BODY: usize = 30_000;
const MAX_TAGS: usize = 5;

/// Question and answer lifecycle outside of moderation.
#[derive(Clone)]
pub struct ContentService {
    repo: Arc<dyn Repo>,
    audit: AuditLog,
    notifier: NotificationService,
}

fn checked_tags(raw: &[String]) -> ServiceResult<Vec<String>> {
    let tags = normalize_tags(raw);
    if tags.len() > MAX_TAGS {
        return Err(ServiceError::Validation(format!("at most {MAX_TAGS} tags")));
    }
    Ok(tags)
}

/// Closed questions stay frozen for their authors; staff may still edit.
fn ensure_editable(caller: &Caller, q: &Question) -> ServiceResult<()> {
    if q.is_locked && !caller.is_staff() {
        return Err(ServiceError::InvalidState("question is locked".into()));
    }
    Ok(())
}

fn owner_or_staff(caller: &Caller, owner: Id, what: &str) -> ServiceResult<()> {
    if caller.user_id != owner && !caller.is_staff() {
        return Err(ServiceError::Forbidden(format!("only the author or a moderator may {what}")));
    }
    Ok(())
}

impl ContentService {
    pub fn new(repo: Arc<dyn Repo>, audit: AuditLog, notifier: NotificationService) -> Self {
        Self { repo, audit, notifier }
    }

    pub async fn create_question(&self, caller: &Caller, new: NewQuestion) -> ServiceResult<Question> {
        ensure_active(caller)?;
        let title = require_text("title", &new.title, MAX_TITLE)?;
        let body = require_text("body", &new.body, MAX_BODY)?;
        let tags = checked_tags(&new.tags)?;
        let q = self
            .repo
            .create_question(QuestionInsert {
                author_id: caller.user_id,
                title,
                body,
                tags,
                is_approved: initial_approval(caller.role),
            })
            .await
            .or_missing(EntityKind::User, caller.user_id)?;
        info!(question_id = q.id, author = caller.user_id, approved = q.is_approved, "question created");
        self.audit
            .record(
                NewActivity::new(ActivityAction::CreateQuestion)
                    .by(caller)
                    .on(EntityKind::Question, q.id)
                    .details(format!("created question \"{}\"", q.title)),
            )
            .await;
        Ok(q)
    }

    /// Detail view: counts a view. Hidden questions are reported as missing.
    pub async fn view_question(&self, viewer: Option<&Caller>, id: Id) -> ServiceResult<Question> {
        let q = self.get_visible(viewer, id).await?;
        self.repo.increment_views(q.id).await.or_missing(EntityKind::Question, id)
    }

    pub async fn get_visible(&self, viewer: Option<&Caller>, id: Id) -> ServiceResult<Question> {
        let q = self.repo.get_question(id).await.or_missing(EntityKind::Question, id)?;
        if !can_view(&q, viewer) {
            return Err(ServiceError::NotFound(EntityKind::Question, id));
        }
        Ok(q)
    }

    pub async fn list_questions(&self, viewer: Option<&Caller>, query: &QuestionQuery, page: &PageRequest) -> ServiceResult<Page<Question>> {
        Ok(self.repo.list_questions(Visibility::for_viewer(viewer), query, page).await?)
    }

    /// Author or staff edit. Tags are replaced only when a non-empty list is
    /// given; an empty or absent list keeps the current ones.
    pub async fn update_question(&self, caller: &Caller, id: Id, edit: QuestionEdit) -> ServiceResult<Question> {
        ensure_active(caller)?;
        let q = self.get_visible(Some(caller), id).await?;
        owner_or_staff(caller, q.author_id, "edit this question")?;
        ensure_editable(caller, &q)?;
        let title = require_text("title", &edit.title, MAX_TITLE)?;
        let body = require_text("body", &edit.body, MAX_BODY)?;
        let tags = match edit.tags.as_deref().map(checked_tags).transpose()? {
            Some(t) if !t.is_empty() => Some(t),
            _ => None,
        };
        let updated = self
            .repo
            .update_question(id, QuestionUpdate { title, body, tags })
            .await
            .or_missing(EntityKind::Question, id)?;
        info!(question_id = id, by = caller.user_id, "question edited");
        self.audit
            .record(
                NewActivity::new(ActivityAction::EditQuestion)
                    .by(caller)
                    .on(EntityKind::Question, id)
                    .details(format!("edited question \"{}\"", updated.title)),
            )
            .await;
        Ok(updated)
    }

    pub async fn delete_question(&self, caller: &Caller, id: Id) -> ServiceResult<()> {
        let q = self.repo.get_question(id).await.or_missing(EntityKind::Question, id)?;
        owner_or_staff(caller, q.author_id, "delete this question")?;
        self.repo.delete_question(id).await.or_missing(EntityKind::Question, id)?;
        info!(question_id = id, by = caller.user_id, "question deleted");
        self.audit
            .record(
                NewActivity::new(ActivityAction::DeleteQuestion)
                    .by(caller)
                    .on(EntityKind::Question, id)
                    .details(format!("deleted question \"{}\"", q.title)),
            )
            .await;
        Ok(())
    }

    pub async fn list_tags(&self) -> ServiceResult<Vec<Tag>> {
        Ok(self.repo.list_tags().await?)
    }

    pub async fn create_answer(&self, caller: &Caller, question_id: Id, new: NewAnswer) -> ServiceResult<Answer> {
        ensure_active(caller)?;
        let body = require_text("body", &new.body, MAX_BODY)?;
        let q = self.get_visible(Some(caller), question_id).await?;
        if q.is_locked {
            return Err(ServiceError::InvalidState("question is locked".into()));
        }
        let answer = self
            .repo
            .create_answer(AnswerInsert { question_id, author_id: caller.user_id, body })
            .await
            .or_missing(EntityKind::Question, question_id)?;
        self.audit
            .record(
                NewActivity::new(ActivityAction::CreateAnswer)
                    .by(caller)
                    .on(EntityKind::Answer, answer.id)
                    .details(format!("answered question {question_id}")),
            )
            .await;
        if q.author_id != caller.user_id {
            let draft = NotificationDraft::new("NEW_ANSWER", format!("Your question \"{}\" has a new answer", q.title))
                .link(format!("/questions/{question_id}#answer-{}", answer.id));
            self.notifier.emit(Some(caller.user_id), q.author_id, draft).await;
        }
        Ok(answer)
    }

    pub async fn list_answers(&self, viewer: Option<&Caller>, question_id: Id) -> ServiceResult<Vec<Answer>> {
        self.get_visible(viewer, question_id).await?;
        Ok(self.repo.list_answers(question_id).await?)
    }

    /// Accepting clears any earlier acceptance on the same question.
    pub async fn accept_answer(&self, caller: &Caller, question_id: Id, answer_id: Id) -> ServiceResult<Answer> {
        let q = self.repo.get_question(question_id).await.or_missing(EntityKind::Question, question_id)?;
        owner_or_staff(caller, q.author_id, "accept an answer")?;
        let answer = self.repo.get_answer(answer_id).await.or_missing(EntityKind::Answer, answer_id)?;
        if answer.question_id != question_id {
            return Err(ServiceError::Validation(format!("answer {answer_id} does not belong to question {question_id}")));
        }
        if answer.is_accepted {
            return Ok(answer);
        }
        let accepted = self.repo.accept_answer(question_id, answer_id).await.or_missing(EntityKind::Answer, answer_id)?;
        self.audit
            .record(
                NewActivity::new(ActivityAction::AcceptAnswer)
                    .by(caller)
                    .on(EntityKind::Answer, answer_id)
                    .details(format!("accepted on question {question_id}")),
            )
            .await;
        if accepted.author_id != caller.user_id {
            let draft = NotificationDraft::new("ANSWER_ACCEPTED", format!("Your answer to \"{}\" was accepted", q.title))
                .link(format!("/questions/{question_id}#answer-{answer_id}"));
            self.notifier.emit(Some(caller.user_id), accepted.author_id, draft).await;
        }
        Ok(accepted)
    }

    pub async fn update_answer(&self, caller: &Caller, id: Id, edit: AnswerEdit) -> ServiceResult<Answer> {
        ensure_active(caller)?;
        let answer = self.repo.get_answer(id).await.or_missing(EntityKind::Answer, id)?;
        let q = self.get_visible(Some(caller), answer.question_id).await?;
        owner_or_staff(caller, answer.author_id, "edit this answer")?;
        ensure_editable(caller, &q)?;
        let body = require_text("body", &edit.body, MAX_BODY)?;
        let updated = self.repo.update_answer(id, body).await.or_missing(EntityKind::Answer, id)?;
        self.audit
            .record(
                NewActivity::new(ActivityAction::EditAnswer)
                    .by(caller)
                    .on(EntityKind::Answer, id)
                    .details(format!("edited answer on question {}", answer.question_id)),
            )
            .await;
        Ok(updated)
    }

    pub async fn delete_answer(&self, caller: &Caller, id: Id) -> ServiceResult<()> {
        let answer = self.repo.get_answer(id).await.or_missing(EntityKind::Answer, id)?;
        owner_or_staff(caller, answer.author_id, "delete this answer")?;
        self.repo.delete_answer(id).await.or_missing(EntityKind::Answer, id)?;
        self.audit
            .record(
                NewActivity::new(ActivityAction::DeleteAnswer)
                    .by(caller)
                    .on(EntityKind::Answer, id)
                    .details(format!("deleted answer on question {}", answer.question_id)),
            )
            .await;
        Ok(())
    }
}
