#![cfg(feature = "inmem-store")]

mod common;

use std::time::Duration;

use askboard::error::ServiceError;
use askboard::models::*;
use common::Fixture;

#[tokio::test]
async fn operations_leave_a_searchable_trail() {
    let f = Fixture::new().await;
    let q = f.question_by(&f.alice, "Audit me").await;
    f.svc.moderation.approve(&f.manager, q.id).await.unwrap();
    f.svc.moderation.lock(&f.manager, q.id).await.unwrap();
    let page = PageRequest::default();

    let all = f.svc.audit.search(&f.manager, &ActivityFilter::default(), &page).await.unwrap();
    let actions: Vec<_> = all.items.iter().map(|l| l.action).collect();
    assert_eq!(
        actions,
        vec![ActivityAction::LockQuestion, ActivityAction::ApproveQuestion, ActivityAction::CreateQuestion]
    );

    let by_manager = ActivityFilter { user_id: Some(f.manager.user_id), ..Default::default() };
    assert_eq!(f.svc.audit.search(&f.admin, &by_manager, &page).await.unwrap().total_elements, 2);

    let on_question = ActivityFilter {
        entity_type: Some(EntityKind::Question),
        search: Some("AUDIT ME".into()),
        ..Default::default()
    };
    let hits = f.svc.audit.search(&f.admin, &on_question, &page).await.unwrap();
    assert_eq!(hits.total_elements, 3);
    assert!(hits.items.iter().all(|l| l.entity_id == Some(q.id)));

    let only_locks = ActivityFilter { action: Some(ActivityAction::LockQuestion), ..Default::default() };
    assert_eq!(f.svc.audit.search(&f.admin, &only_locks, &page).await.unwrap().total_elements, 1);
    assert_eq!(f.svc.audit.count_by_action(&f.admin, ActivityAction::ApproveQuestion).await.unwrap(), 1);

    let err = f.svc.audit.search(&f.alice, &ActivityFilter::default(), &page).await.unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));
}

#[tokio::test]
async fn caller_ip_is_recorded() {
    let f = Fixture::new().await;
    let alice = f.alice.clone().with_ip("203.0.113.7");
    f.question_by(&alice, "From an address").await;

    let logs = f.svc.audit.search(&f.admin, &ActivityFilter::default(), &PageRequest::default()).await.unwrap();
    assert_eq!(logs.items[0].ip_address.as_deref(), Some("203.0.113.7"));
    assert_eq!(logs.items[0].user_id, Some(alice.user_id));
}

#[tokio::test]
async fn purge_respects_retention_and_leaves_a_marker() {
    let f = Fixture::new().await;
    f.question_by(&f.alice, "One").await;
    f.question_by(&f.bob, "Two").await;

    assert_eq!(f.svc.audit.purge(&f.admin, 90).await.unwrap(), 0);
    assert!(matches!(f.svc.audit.purge(&f.manager, 0).await, Err(ServiceError::Forbidden(_))));

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(f.svc.audit.purge_older_than(0).await.unwrap(), 2);

    let counts = f.svc.audit.counts(&f.admin).await.unwrap();
    assert_eq!((counts.total, counts.today), (1, 1));
    let left = f.svc.audit.search(&f.admin, &ActivityFilter::default(), &PageRequest::default()).await.unwrap();
    assert_eq!(left.items[0].action, ActivityAction::PurgeActivityLog);
    assert_eq!(left.items[0].user_id, None);
}

#[tokio::test]
async fn csv_export_is_admin_only() {
    let f = Fixture::new().await;
    f.question_by(&f.alice, "Commas, \"quotes\" and all").await;

    let err = f.svc.audit.export_csv(&f.manager, &ActivityFilter::default()).await.unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    let csv = f.svc.audit.export_csv(&f.admin, &ActivityFilter::default()).await.unwrap();
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("id,user_id,action,entity_type,entity_id,details,ip_address,created_at"));
    let row = lines.next().unwrap();
    assert!(row.contains("CREATE_QUESTION,QUESTION"));
    assert!(row.contains("\"created question \"\"Commas, \"\"quotes\"\" and all\"\"\""));
    assert_eq!(lines.next(), None);
}

#[tokio::test]
async fn dashboard_summarises_the_store() {
    let f = Fixture::new().await;
    let q = f.approved_question(&f.alice, "Counted").await;
    f.question_by(&f.bob, "Waiting").await;
    f.answer_by(&f.bob, q.id, "an answer").await;

    let stats = f.svc.dashboard.stats(&f.manager).await.unwrap();
    assert_eq!((stats.questions_total, stats.questions_pending, stats.questions_approved), (2, 1, 1));
    assert_eq!(stats.answers_total, 1);
    assert_eq!((stats.users_total, stats.users_banned), (4, 0));
    assert!(matches!(f.svc.dashboard.stats(&f.alice).await, Err(ServiceError::Forbidden(_))));
}
