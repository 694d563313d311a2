#![cfg(feature = "inmem-store")]

mod common;

use askboard::error::ServiceError;
use askboard::models::*;
use askboard::repo::{ActivityLogRepo, AnswerRepo, QuestionRepo, ReportRepo, UserRepo, VoteRepo};
use common::Fixture;

#[tokio::test]
async fn deleting_a_user_takes_their_content_with_them() {
    let f = Fixture::new().await;
    let alices = f.approved_question(&f.alice, "Alice asks").await;
    let reply_to_alice = f.answer_by(&f.bob, alices.id, "bob replies").await;
    let bobs = f.approved_question(&f.bob, "Bob asks").await;
    let alice_answer = f.answer_by(&f.alice, bobs.id, "alice replies").await;
    let staff_answer = f.answer_by(&f.manager, bobs.id, "staff reply").await;
    f.svc.content.accept_answer(&f.bob, bobs.id, alice_answer.id).await.unwrap();
    f.svc.votes.toggle_upvote(&f.alice, VoteTarget::question(bobs.id)).await.unwrap();
    f.svc.votes.toggle_upvote(&f.alice, VoteTarget::answer(staff_answer.id)).await.unwrap();
    let report = f
        .svc
        .reports
        .create_report(&f.alice, NewReport { entity_type: ContentKind::Answer, entity_id: staff_answer.id, reason: "off topic".into(), description: None })
        .await
        .unwrap();
    let audit_before = f.repo.count_activity(None, None).await.unwrap();

    f.svc.users.delete(&f.admin, f.alice.user_id).await.unwrap();

    assert!(matches!(f.svc.users.get(f.alice.user_id).await, Err(ServiceError::NotFound(EntityKind::User, _))));
    assert!(f.repo.get_question(alices.id).await.is_err());
    assert!(f.repo.get_answer(reply_to_alice.id).await.is_err());
    assert!(f.repo.get_answer(alice_answer.id).await.is_err());
    assert!(f.repo.get_report(report.id).await.is_err());

    let bobs = f.repo.get_question(bobs.id).await.unwrap();
    assert_eq!((bobs.votes, bobs.answer_count, bobs.accepted_answer_id), (0, 1, None));
    assert_eq!(f.repo.get_answer(staff_answer.id).await.unwrap().votes, 0);
    assert!(!f.repo.has_voted(f.alice.user_id, VoteTarget::question(bobs.id)).await.unwrap());

    // audit history stays, plus the deletion itself
    assert_eq!(f.repo.count_activity(None, None).await.unwrap(), audit_before + 1);
    assert_eq!(f.repo.count_activity(Some(ActivityAction::DeleteUser), None).await.unwrap(), 1);
}

#[tokio::test]
async fn resolvers_cannot_be_deleted() {
    let f = Fixture::new().await;
    let q = f.approved_question(&f.alice, "Reported once").await;
    let report = f
        .svc
        .reports
        .create_report(&f.bob, NewReport { entity_type: ContentKind::Question, entity_id: q.id, reason: "spam".into(), description: None })
        .await
        .unwrap();
    f.svc.reports.reject(&f.manager, report.id, "fine").await.unwrap();

    let err = f.svc.users.delete(&f.admin, f.manager.user_id).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)), "{err:?}");
    assert!(f.svc.users.get(f.manager.user_id).await.is_ok());
    assert_eq!(f.repo.get_report(report.id).await.unwrap().resolved_by, Some(f.manager.user_id));

    // the reporter, on the other hand, can go and takes the report along
    f.svc.users.delete(&f.admin, f.bob.user_id).await.unwrap();
    assert!(f.repo.get_report(report.id).await.is_err());
}

#[tokio::test]
async fn deleting_a_sender_keeps_the_notification() {
    let f = Fixture::new().await;
    let sent = f.svc.notifications.notify_user(&f.manager, f.bob.user_id, NotificationDraft::new("SYSTEM", "welcome")).await.unwrap();
    assert_eq!(sent.sender_id, Some(f.manager.user_id));

    f.svc.users.delete(&f.admin, f.manager.user_id).await.unwrap();
    let inbox = f.svc.notifications.list_mine(&f.bob, false).await.unwrap();
    let kept = inbox.iter().find(|n| n.id == sent.id).unwrap();
    assert_eq!(kept.sender_id, None);
}

#[tokio::test]
async fn only_admins_delete_and_never_themselves() {
    let f = Fixture::new().await;
    let err = f.svc.users.delete(&f.manager, f.bob.user_id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)), "{err:?}");
    let err = f.svc.users.delete(&f.alice, 424242).await.unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)), "{err:?}");

    let err = f.svc.users.delete(&f.admin, f.admin.user_id).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)), "{err:?}");
    let err = f.svc.users.delete(&f.admin, 424242).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(EntityKind::User, 424242)));

    assert_eq!(f.repo.count_users(false).await.unwrap(), 4);
}
