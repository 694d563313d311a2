#![allow(dead_code)]

use std::sync::Arc;

use askboard::auth::Caller;
use askboard::models::*;
use askboard::repo::inmem::InMemRepo;
use askboard::Services;

/// Fresh in-memory store with one account per role plus two plain users.
pub struct Fixture {
    pub repo: Arc<InMemRepo>,
    pub svc: Services,
    pub admin: Caller,
    pub manager: Caller,
    pub alice: Caller,
    pub bob: Caller,
}

impl Fixture {
    pub async fn new() -> Self {
        let repo = Arc::new(InMemRepo::new());
        let svc = Services::new(repo.clone());
        let admin = user(&svc, "admin", Role::Admin).await;
        let manager = user(&svc, "manager", Role::Manager).await;
        let alice = user(&svc, "alice", Role::User).await;
        let bob = user(&svc, "bob", Role::User).await;
        Self { repo, svc, admin, manager, alice, bob }
    }

    /// Re-read a caller so ban and role changes show up.
    pub async fn refresh(&self, c: &Caller) -> Caller {
        self.svc.users.resolve_caller(c.user_id, None).await.unwrap()
    }

    pub async fn question_by(&self, author: &Caller, title: &str) -> Question {
        self.svc
            .content
            .create_question(author, NewQuestion { title: title.into(), body: format!("{title} body"), tags: vec![] })
            .await
            .unwrap()
    }

    /// A question by `author` that moderators have approved.
    pub async fn approved_question(&self, author: &Caller, title: &str) -> Question {
        let q = self.question_by(author, title).await;
        self.svc.moderation.approve(&self.manager, q.id).await.unwrap()
    }

    pub async fn answer_by(&self, author: &Caller, question_id: Id, body: &str) -> Answer {
        self.svc
            .content
            .create_answer(author, question_id, NewAnswer { body: body.into() })
            .await
            .unwrap()
    }
}

async fn user(svc: &Services, name: &str, role: Role) -> Caller {
    let u = svc
        .users
        .provision(NewUser { username: name.into(), email: format!("{name}@example.com"), role })
        .await
        .unwrap();
    svc.users.resolve_caller(u.id, None).await.unwrap()
}
