#![cfg(feature = "inmem-store")]

mod common;

use askboard::error::ServiceError;
use askboard::models::*;
use askboard::repo::{ActivityLogRepo, AnswerRepo, QuestionRepo};
use askboard::services::Remediation;
use common::Fixture;

fn report_on(kind: ContentKind, id: Id) -> NewReport {
    NewReport { entity_type: kind, entity_id: id, reason: "spam".into(), description: Some("  link farm  ".into()) }
}

#[tokio::test]
async fn resolving_a_question_report_hides_the_question() {
    let f = Fixture::new().await;
    let q = f.approved_question(&f.alice, "Buy cheap watches").await;
    let report = f.svc.reports.create_report(&f.bob, report_on(ContentKind::Question, q.id)).await.unwrap();
    assert_eq!(report.status, ReportStatus::Pending);
    assert_eq!(report.description.as_deref(), Some("link farm"));

    let outcome = f.svc.reports.resolve(&f.manager, report.id, "removed spam").await.unwrap();
    assert_eq!(outcome.remediation, Remediation::QuestionHidden);
    assert_eq!(outcome.report.status, ReportStatus::Resolved);
    assert_eq!(outcome.report.resolved_by, Some(f.manager.user_id));
    assert_eq!(outcome.report.resolution.as_deref(), Some("removed spam"));
    assert!(outcome.report.resolved_at.is_some());

    let hidden = f.repo.get_question(q.id).await.unwrap();
    assert!(hidden.is_locked && !hidden.is_approved);
    assert!(f.svc.content.get_visible(Some(&f.bob), q.id).await.is_err());

    let inbox = f.svc.notifications.list_mine(&f.bob, true).await.unwrap();
    assert!(inbox.iter().any(|n| n.kind == "REPORT_UPDATE"));
}

#[tokio::test]
async fn a_closed_report_cannot_be_closed_again() {
    let f = Fixture::new().await;
    let q = f.approved_question(&f.alice, "Questionable").await;
    let report = f.svc.reports.create_report(&f.bob, report_on(ContentKind::Question, q.id)).await.unwrap();
    f.svc.reports.resolve(&f.manager, report.id, "handled").await.unwrap();

    // approve again so a second remediation would be observable
    f.svc.moderation.approve(&f.manager, q.id).await.unwrap();
    f.svc.moderation.unlock(&f.manager, q.id).await.unwrap();

    let err = f.svc.reports.resolve(&f.admin, report.id, "again").await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)), "{err:?}");
    let err = f.svc.reports.reject(&f.admin, report.id, "changed my mind").await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));

    let q = f.repo.get_question(q.id).await.unwrap();
    assert!(q.is_approved && !q.is_locked);
    let stored = f.svc.reports.get(&f.admin, report.id).await.unwrap();
    assert_eq!(stored.resolution.as_deref(), Some("handled"));
    assert_eq!(f.repo.count_activity(Some(ActivityAction::ResolveReport), None).await.unwrap(), 1);
}

#[tokio::test]
async fn resolving_an_answer_report_deletes_the_answer() {
    let f = Fixture::new().await;
    let q = f.approved_question(&f.alice, "Serde tips").await;
    let a = f.answer_by(&f.bob, q.id, "visit my site").await;
    assert_eq!(f.repo.get_question(q.id).await.unwrap().answer_count, 1);

    let report = f.svc.reports.create_report(&f.alice, report_on(ContentKind::Answer, a.id)).await.unwrap();
    let outcome = f.svc.reports.resolve(&f.admin, report.id, "spam answer").await.unwrap();
    assert_eq!(outcome.remediation, Remediation::AnswerDeleted);

    assert!(f.repo.get_answer(a.id).await.is_err());
    assert_eq!(f.repo.get_question(q.id).await.unwrap().answer_count, 0);
}

#[tokio::test]
async fn rejecting_leaves_content_alone() {
    let f = Fixture::new().await;
    let q = f.approved_question(&f.alice, "Perfectly fine").await;
    let report = f.svc.reports.create_report(&f.bob, report_on(ContentKind::Question, q.id)).await.unwrap();

    let closed = f.svc.reports.reject(&f.manager, report.id, "not spam").await.unwrap();
    assert_eq!(closed.status, ReportStatus::Rejected);
    let q = f.repo.get_question(q.id).await.unwrap();
    assert!(q.is_approved && !q.is_locked);

    let counts = f.svc.reports.counts(&f.manager).await.unwrap();
    assert_eq!((counts.pending, counts.resolved, counts.rejected, counts.total), (0, 0, 1, 1));
}

#[tokio::test]
async fn vanished_content_still_resolves() {
    let f = Fixture::new().await;
    let q = f.approved_question(&f.alice, "Short lived").await;
    let a = f.answer_by(&f.bob, q.id, "gone soon").await;
    let report = f.svc.reports.create_report(&f.alice, report_on(ContentKind::Answer, a.id)).await.unwrap();
    f.svc.content.delete_answer(&f.bob, a.id).await.unwrap();

    let outcome = f.svc.reports.resolve(&f.manager, report.id, "already gone").await.unwrap();
    assert_eq!(outcome.remediation, Remediation::TargetMissing);
    assert_eq!(outcome.report.status, ReportStatus::Resolved);
}

#[tokio::test]
async fn only_staff_close_reports() {
    let f = Fixture::new().await;
    let q = f.approved_question(&f.alice, "Reported").await;
    let report = f.svc.reports.create_report(&f.bob, report_on(ContentKind::Question, q.id)).await.unwrap();

    for result in [
        f.svc.reports.resolve(&f.bob, report.id, "mine").await.map(|r| r.report),
        f.svc.reports.reject(&f.alice, report.id, "nope").await,
    ] {
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));
    }
    assert!(matches!(f.svc.reports.list(&f.bob, None, &PageRequest::default()).await, Err(ServiceError::Forbidden(_))));

    // reporters see their own reports, nobody else's
    assert_eq!(f.svc.reports.get(&f.bob, report.id).await.unwrap().id, report.id);
    assert!(matches!(f.svc.reports.get(&f.alice, report.id).await, Err(ServiceError::Forbidden(_))));
    assert_eq!(f.svc.reports.my_reports(&f.bob, &PageRequest::default()).await.unwrap().total_elements, 1);
}

#[tokio::test]
async fn reports_need_a_visible_target_and_a_reason() {
    let f = Fixture::new().await;
    let err = f.svc.reports.create_report(&f.bob, report_on(ContentKind::Question, 404)).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(EntityKind::Question, 404)));
    let err = f.svc.reports.create_report(&f.bob, report_on(ContentKind::Answer, 404)).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(EntityKind::Answer, 404)));

    let pending = f.question_by(&f.alice, "Unapproved").await;
    let err = f.svc.reports.create_report(&f.bob, report_on(ContentKind::Question, pending.id)).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(..)));

    let q = f.approved_question(&f.alice, "Visible").await;
    let mut blank = report_on(ContentKind::Question, q.id);
    blank.reason = "   ".into();
    assert!(matches!(f.svc.reports.create_report(&f.bob, blank).await, Err(ServiceError::Validation(_))));
}

#[tokio::test]
async fn a_removed_question_still_resolves() {
    let f = Fixture::new().await;
    let q = f.approved_question(&f.alice, "Deleted by its author").await;
    let report = f.svc.reports.create_report(&f.bob, report_on(ContentKind::Question, q.id)).await.unwrap();
    f.svc.content.delete_question(&f.alice, q.id).await.unwrap();

    let outcome = f.svc.reports.resolve(&f.manager, report.id, "nothing left").await.unwrap();
    assert_eq!(outcome.remediation, Remediation::TargetMissing);
    assert_eq!(outcome.report.status, ReportStatus::Resolved);
    assert_eq!(f.repo.count_activity(Some(ActivityAction::ResolveReport), None).await.unwrap(), 1);
}

#[tokio::test]
async fn answers_under_hidden_questions_cannot_be_reported() {
    let f = Fixture::new().await;
    let q = f.approved_question(&f.alice, "Soon locked").await;
    let a = f.answer_by(&f.bob, q.id, "an answer").await;
    f.svc.moderation.lock(&f.manager, q.id).await.unwrap();

    let err = f.svc.reports.create_report(&f.bob, report_on(ContentKind::Answer, a.id)).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(EntityKind::Answer, id) if id == a.id), "{err:?}");
    // the question's author still sees it
    f.svc.reports.create_report(&f.alice, report_on(ContentKind::Answer, a.id)).await.unwrap();
}

#[tokio::test]
async fn staff_delete_reports_in_any_state() {
    let f = Fixture::new().await;
    let q = f.approved_question(&f.alice, "Twice reported").await;
    let open = f.svc.reports.create_report(&f.bob, report_on(ContentKind::Question, q.id)).await.unwrap();
    let closed = f.svc.reports.create_report(&f.bob, report_on(ContentKind::Question, q.id)).await.unwrap();
    f.svc.reports.reject(&f.manager, closed.id, "duplicate").await.unwrap();

    let err = f.svc.reports.delete(&f.bob, open.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)), "{err:?}");
    assert!(f.svc.reports.get(&f.bob, open.id).await.is_ok());

    f.svc.reports.delete(&f.manager, open.id).await.unwrap();
    f.svc.reports.delete(&f.admin, closed.id).await.unwrap();
    assert!(matches!(f.svc.reports.get(&f.admin, open.id).await, Err(ServiceError::NotFound(EntityKind::Report, _))));
    assert!(matches!(f.svc.reports.delete(&f.admin, open.id).await, Err(ServiceError::NotFound(EntityKind::Report, _))));

    // the reported question is untouched
    assert!(f.repo.get_question(q.id).await.unwrap().is_approved);
    assert_eq!(f.svc.reports.counts(&f.admin).await.unwrap().total, 0);
    assert_eq!(f.repo.count_activity(Some(ActivityAction::DeleteReport), None).await.unwrap(), 2);
}
