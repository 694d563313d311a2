#![cfg(feature = "inmem-store")]

mod common;

use askboard::error::ServiceError;
use askboard::models::*;
use askboard::repo::NotificationRepo;
use common::Fixture;

fn notice(text: &str) -> NotificationDraft {
    NotificationDraft::new("ANNOUNCEMENT", text)
}

#[tokio::test]
async fn admin_sent_notifications_are_admin_deletable_only() {
    let f = Fixture::new().await;
    let n = f.svc.notifications.notify_user(&f.admin, f.alice.user_id, notice("from the admin")).await.unwrap();
    assert_eq!(n.sender_id, Some(f.admin.user_id));

    let err = f.svc.notifications.delete(&f.manager, n.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)), "{err:?}");
    let err = f.svc.notifications.delete(&f.alice, n.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));
    assert!(f.repo.get_notification(n.id).await.is_ok());

    f.svc.notifications.delete(&f.admin, n.id).await.unwrap();
    assert!(f.repo.get_notification(n.id).await.is_err());
}

#[tokio::test]
async fn owners_delete_their_own_notifications() {
    let f = Fixture::new().await;
    let n = f.svc.notifications.notify_user(&f.manager, f.alice.user_id, notice("from a manager")).await.unwrap();

    let err = f.svc.notifications.delete(&f.bob, n.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));
    f.svc.notifications.delete(&f.alice, n.id).await.unwrap();

    let err = f.svc.notifications.delete(&f.alice, n.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(EntityKind::Notification, _)));
}

#[tokio::test]
async fn direct_messages_need_staff_and_a_recipient() {
    let f = Fixture::new().await;
    let err = f.svc.notifications.notify_user(&f.alice, f.bob.user_id, notice("hi")).await.unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));
    let err = f.svc.notifications.notify_user(&f.manager, 4_242, notice("hi")).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(EntityKind::User, 4_242)));
}

#[tokio::test]
async fn broadcasts_reach_each_recipient_once() {
    let f = Fixture::new().await;
    let sent = f.svc.notifications.notify_by_role(&f.manager, Role::User, notice("users only")).await.unwrap();
    assert_eq!(sent, 2);
    assert_eq!(f.svc.notifications.unread_count(&f.alice).await.unwrap(), 1);
    assert_eq!(f.svc.notifications.unread_count(&f.admin).await.unwrap(), 0);

    let sent = f.svc.notifications.notify_all_users(&f.admin, notice("everyone")).await.unwrap();
    assert_eq!(sent, 4);
    assert_eq!(f.svc.notifications.unread_count(&f.bob).await.unwrap(), 2);

    let err = f.svc.notifications.notify_all_users(&f.bob, notice("spam")).await.unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    let totals = f.svc.notifications.totals(&f.admin).await.unwrap();
    assert_eq!((totals.total, totals.unread), (6, 6));
}

#[tokio::test]
async fn broadcast_to_an_empty_role_sends_nothing() {
    let f = Fixture::new().await;
    f.svc.users.change_role(&f.admin, f.manager.user_id, Role::User).await.unwrap();
    let sent = f.svc.notifications.notify_by_role(&f.admin, Role::Manager, notice("nobody")).await.unwrap();
    assert_eq!(sent, 0);
}

#[tokio::test]
async fn read_state_tracking() {
    let f = Fixture::new().await;
    let first = f.svc.notifications.notify_user(&f.manager, f.bob.user_id, notice("one")).await.unwrap();
    f.svc.notifications.notify_user(&f.manager, f.bob.user_id, notice("two")).await.unwrap();
    f.svc.notifications.notify_user(&f.manager, f.bob.user_id, notice("three")).await.unwrap();

    let mine = f.svc.notifications.list_mine(&f.bob, false).await.unwrap();
    assert_eq!(mine.iter().map(|n| n.message.as_str()).collect::<Vec<_>>(), vec!["three", "two", "one"]);

    let read = f.svc.notifications.mark_as_read(&f.bob, first.id).await.unwrap();
    assert!(read.is_read);
    // idempotent
    assert!(f.svc.notifications.mark_as_read(&f.bob, first.id).await.unwrap().is_read);
    assert_eq!(f.svc.notifications.unread_count(&f.bob).await.unwrap(), 2);
    assert!(matches!(
        f.svc.notifications.mark_as_read(&f.alice, first.id).await,
        Err(ServiceError::Forbidden(_))
    ));

    assert_eq!(f.svc.notifications.mark_all_as_read(&f.bob).await.unwrap(), 2);
    assert_eq!(f.svc.notifications.unread_count(&f.bob).await.unwrap(), 0);
    assert!(f.svc.notifications.list_mine(&f.bob, true).await.unwrap().is_empty());
}

#[tokio::test]
async fn batch_delete_reports_what_was_skipped() {
    let f = Fixture::new().await;
    let own = f.svc.notifications.notify_user(&f.manager, f.alice.user_id, notice("mine")).await.unwrap();
    let from_admin = f.svc.notifications.notify_user(&f.admin, f.alice.user_id, notice("admin")).await.unwrap();
    let someone_else = f.svc.notifications.notify_user(&f.manager, f.bob.user_id, notice("bob's")).await.unwrap();

    let outcome = f
        .svc
        .notifications
        .delete_batch(&f.alice, &[own.id, from_admin.id, someone_else.id, 9_999])
        .await
        .unwrap();
    assert_eq!(outcome.deleted, vec![own.id]);
    assert_eq!(outcome.skipped, vec![from_admin.id, someone_else.id, 9_999]);
}

#[tokio::test]
async fn new_answers_notify_the_question_author() {
    let f = Fixture::new().await;
    let q = f.approved_question(&f.alice, "Who answers?").await;
    let a = f.answer_by(&f.bob, q.id, "I do").await;
    f.answer_by(&f.alice, q.id, "answering myself").await;

    let kinds: Vec<_> = f
        .svc
        .notifications
        .list_mine(&f.alice, false)
        .await
        .unwrap()
        .into_iter()
        .filter(|n| n.kind == "NEW_ANSWER")
        .collect();
    assert_eq!(kinds.len(), 1);
    assert_eq!(kinds[0].sender_id, Some(f.bob.user_id));

    f.svc.content.accept_answer(&f.alice, q.id, a.id).await.unwrap();
    let bobs = f.svc.notifications.list_mine(&f.bob, true).await.unwrap();
    assert!(bobs.iter().any(|n| n.kind == "ANSWER_ACCEPTED"));
}
