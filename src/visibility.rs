//! Who may see a question.
//!
//! A question is visible to anonymous and USER-role viewers only while it is
//! approved and not locked; its author always sees it; managers and admins see
//! everything. Every listing and detail path goes through [`Visibility`]: the
//! in-memory backend calls [`Visibility::admits`], the Postgres backend renders
//! the same enum into a `WHERE` clause.

use crate::auth::Caller;
use crate::models::{Id, Question};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Staff: both gates bypassed.
    Unrestricted,
    /// Approved-and-unlocked content, plus the viewer's own questions.
    Public { viewer: Option<Id> },
}

impl Visibility {
    pub fn for_viewer(viewer: Option<&Caller>) -> Self {
        match viewer {
            Some(c) if c.is_staff() => Visibility::Unrestricted,
            Some(c) => Visibility::Public { viewer: Some(c.user_id) },
            None => Visibility::Public { viewer: None },
        }
    }

    pub fn admits(&self, q: &Question) -> bool {
        match *self {
            Visibility::Unrestricted => true,
            Visibility::Public { viewer } => {
                (q.is_approved && !q.is_locked) || viewer == Some(q.author_id)
            }
        }
    }
}

pub fn can_view(q: &Question, viewer: Option<&Caller>) -> bool {
    Visibility::for_viewer(viewer).admits(q)
}
