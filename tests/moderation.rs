#![cfg(feature = "inmem-store")]

mod common;

use askboard::error::ServiceError;
use askboard::models::*;
use askboard::repo::ActivityLogRepo;
use askboard::services::ModerationAction;
use common::Fixture;

#[tokio::test]
async fn approval_depends_on_author_role() {
    let f = Fixture::new().await;
    assert!(!f.question_by(&f.alice, "From a user").await.is_approved);
    assert!(f.question_by(&f.manager, "From a manager").await.is_approved);
    assert!(f.question_by(&f.admin, "From an admin").await.is_approved);
}

#[tokio::test]
async fn authorization_is_checked_before_existence() {
    let f = Fixture::new().await;
    let err = f.svc.moderation.approve(&f.alice, 999).await.unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)), "{err:?}");

    let err = f.svc.moderation.approve(&f.manager, 999).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(EntityKind::Question, 999)));
}

#[tokio::test]
async fn repeated_approval_is_recorded_once() {
    let f = Fixture::new().await;
    let q = f.question_by(&f.alice, "Needs approval").await;

    let first = f.svc.moderation.approve(&f.manager, q.id).await.unwrap();
    let second = f.svc.moderation.approve(&f.admin, q.id).await.unwrap();
    assert!(first.is_approved && second.is_approved);
    assert_eq!(f.repo.count_activity(Some(ActivityAction::ApproveQuestion), None).await.unwrap(), 1);

    let inbox = f.svc.notifications.list_mine(&f.alice, false).await.unwrap();
    let approved: Vec<_> = inbox.iter().filter(|n| n.kind == "QUESTION_APPROVED").collect();
    assert_eq!(approved.len(), 1);
    assert_eq!(approved[0].sender_id, Some(f.manager.user_id));
    assert_eq!(approved[0].link.as_deref(), Some(format!("/questions/{}", q.id).as_str()));
}

#[tokio::test]
async fn unapproved_questions_are_hidden_from_other_users() {
    let f = Fixture::new().await;
    let q = f.question_by(&f.alice, "Hidden for now").await;
    let page = PageRequest::default();
    let query = QuestionQuery::default();

    let err = f.svc.content.get_visible(Some(&f.bob), q.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(..)));
    assert!(f.svc.content.get_visible(None, q.id).await.is_err());
    assert!(f.svc.content.get_visible(Some(&f.alice), q.id).await.is_ok());
    assert!(f.svc.content.get_visible(Some(&f.manager), q.id).await.is_ok());

    let listed = f.svc.content.list_questions(Some(&f.bob), &query, &page).await.unwrap();
    assert_eq!(listed.total_elements, 0);

    let queue = f.svc.moderation.pending(&f.manager, &page).await.unwrap();
    assert_eq!(queue.items.iter().map(|q| q.id).collect::<Vec<_>>(), vec![q.id]);
    assert!(matches!(f.svc.moderation.pending(&f.bob, &page).await, Err(ServiceError::Forbidden(_))));

    f.svc.moderation.approve(&f.manager, q.id).await.unwrap();
    let listed = f.svc.content.list_questions(Some(&f.bob), &query, &page).await.unwrap();
    assert_eq!(listed.total_elements, 1);
}

#[tokio::test]
async fn locked_questions_are_hidden_and_refuse_answers() {
    let f = Fixture::new().await;
    let q = f.approved_question(&f.alice, "Going to be locked").await;

    let locked = f.svc.moderation.toggle_lock(&f.manager, q.id).await.unwrap();
    assert!(locked.is_locked);
    assert!(f.svc.content.get_visible(Some(&f.bob), q.id).await.is_err());

    let err = f
        .svc
        .content
        .create_answer(&f.alice, q.id, NewAnswer { body: "late answer".into() })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));

    let unlocked = f.svc.moderation.toggle_lock(&f.manager, q.id).await.unwrap();
    assert!(!unlocked.is_locked);
    assert!(f.svc.content.get_visible(Some(&f.bob), q.id).await.is_ok());

    let kinds: Vec<_> = f
        .svc
        .notifications
        .list_mine(&f.alice, false)
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.kind)
        .collect();
    assert!(kinds.contains(&"QUESTION_LOCKED".to_string()));
}

#[tokio::test]
async fn pinned_questions_list_first() {
    let f = Fixture::new().await;
    let older = f.approved_question(&f.alice, "Older").await;
    let newer = f.approved_question(&f.bob, "Newer").await;
    let query = QuestionQuery::default();
    let page = PageRequest::default();

    let ids = |p: Page<Question>| p.items.into_iter().map(|q| q.id).collect::<Vec<_>>();
    let listed = f.svc.content.list_questions(None, &query, &page).await.unwrap();
    assert_eq!(ids(listed), vec![newer.id, older.id]);

    f.svc.moderation.apply(&f.admin, older.id, ModerationAction::Pin).await.unwrap();
    let listed = f.svc.content.list_questions(None, &query, &page).await.unwrap();
    assert_eq!(ids(listed), vec![older.id, newer.id]);

    let unpinned = f.svc.moderation.toggle_pin(&f.admin, older.id).await.unwrap();
    assert!(!unpinned.is_pinned);
}

#[tokio::test]
async fn moderating_your_own_question_sends_nothing() {
    let f = Fixture::new().await;
    let q = f.question_by(&f.manager, "Staff question").await;
    f.svc.moderation.lock(&f.manager, q.id).await.unwrap();
    assert_eq!(f.svc.notifications.unread_count(&f.manager).await.unwrap(), 0);

    let rejected = f.svc.moderation.reject(&f.admin, q.id).await.unwrap();
    assert!(!rejected.is_approved);
    assert_eq!(f.svc.notifications.unread_count(&f.manager).await.unwrap(), 1);
}
