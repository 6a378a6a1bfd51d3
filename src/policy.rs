use dashmap::{DashMap, DashSet};
use ulid::Ulid;

/// Approval authorization seam, resolved by the Person/Project collaborator.
///
/// An approver qualifies when they are the project's designated manager or
/// hold an administrative capability; the collaborator decides which. The
/// engine itself only adds the self-approval check on top.
pub trait ApprovalPolicy: Send + Sync {
    fn can_approve_timesheets(&self, approver_id: Ulid, project_id: Ulid) -> bool;
}

/// Policy backed by explicit manager assignments plus an admin set. Suitable
/// for embedders without a live permission system, and for tests.
#[derive(Default)]
pub struct StaticApprovalPolicy {
    managers: DashMap<Ulid, Ulid>,
    admins: DashSet<Ulid>,
}

impl StaticApprovalPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_manager(&self, project_id: Ulid, manager_id: Ulid) {
        self.managers.insert(project_id, manager_id);
    }

    pub fn grant_admin(&self, person_id: Ulid) {
        self.admins.insert(person_id);
    }

    pub fn revoke_admin(&self, person_id: Ulid) {
        self.admins.remove(&person_id);
    }
}

impl ApprovalPolicy for StaticApprovalPolicy {
    fn can_approve_timesheets(&self, approver_id: Ulid, project_id: Ulid) -> bool {
        self.admins.contains(&approver_id)
            || self
                .managers
                .get(&project_id)
                .is_some_and(|m| *m.value() == approver_id)
    }
}
