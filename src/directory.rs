use dashmap::DashMap;

use crate::model::{Actor, Role, UserId};

/// Read-only view of the user records owned by the identity service.
pub trait Directory: Send + Sync {
    fn user(&self, id: &UserId) -> Option<Actor>;

    /// Active, approved users holding `role`.
    fn members(&self, role: Role) -> Vec<UserId>;
}

/// Process-local directory, fed by whoever owns the user records.
#[derive(Default)]
pub struct InMemoryDirectory {
    users: DashMap<UserId, Actor>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, actor: Actor) {
        self.users.insert(actor.id, actor);
    }

    pub fn remove(&self, id: &UserId) {
        self.users.remove(id);
    }
}

impl Directory for InMemoryDirectory {
    fn user(&self, id: &UserId) -> Option<Actor> {
        self.users.get(id).map(|e| e.value().clone())
    }

    fn members(&self, role: Role) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self
            .users
            .iter()
            .filter(|e| e.role == role && e.is_active_and_approved())
            .map(|e| *e.key())
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AccountStatus;
    use crate::review::ReviewStatus;
    use ulid::Ulid;

    #[test]
    fn members_skips_inactive_and_unapproved() {
        let dir = InMemoryDirectory::new();
        let admin = Actor::new(Ulid::new(), Role::Admin);
        let mut inactive = Actor::new(Ulid::new(), Role::Admin);
        inactive.account_status = AccountStatus::Inactive;
        let mut pending = Actor::new(Ulid::new(), Role::Admin);
        pending.approval_status = ReviewStatus::Pending;
        let student = Actor::new(Ulid::new(), Role::Student);
        for a in [&admin, &inactive, &pending, &student] {
            dir.upsert(a.clone());
        }

        assert_eq!(dir.members(Role::Admin), vec![admin.id]);
        assert_eq!(dir.members(Role::Student), vec![student.id]);
        assert!(dir.members(Role::Faculty).is_empty());
    }

    #[test]
    fn upsert_replaces_role() {
        let dir = InMemoryDirectory::new();
        let mut user = Actor::new(Ulid::new(), Role::Student);
        dir.upsert(user.clone());
        user.role = Role::Faculty;
        dir.upsert(user.clone());
        assert_eq!(dir.user(&user.id).map(|u| u.role), Some(Role::Faculty));
        dir.remove(&user.id);
        assert!(dir.user(&user.id).is_none());
    }
}
