//! The approval state machine shared by bookings and every request type.
//!
//! ```text
//! PENDING ──approve──▶ APPROVED ──cancel──▶ CANCELLED
//!    │                                        ▲
//!    ├──reject───▶ REJECTED                   │
//!    └──cancel────────────────────────────────┘
//! ```
//!
//! A workflow plugs in a [`ReviewPolicy`]: who may decide, and whether a
//! rejection needs a reason. The transition rules themselves live here once.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::MAX_REASON_LEN;
use crate::model::{Actor, ApprovalType, ResourceProposal, Role, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ReviewStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ReviewStatus::Rejected | ReviewStatus::Cancelled)
    }

    /// Pending and approved bookings hold capacity.
    pub fn is_active(self) -> bool {
        matches!(self, ReviewStatus::Pending | ReviewStatus::Approved)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatus::Pending => "PENDING",
            ReviewStatus::Approved => "APPROVED",
            ReviewStatus::Rejected => "REJECTED",
            ReviewStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status plus who moved it there and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub status: ReviewStatus,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<UserId>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub cancelled_by: Option<UserId>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

impl ReviewRecord {
    pub fn pending() -> Self {
        Self {
            status: ReviewStatus::Pending,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            cancelled_by: None,
            cancelled_at: None,
            cancellation_reason: None,
        }
    }

    /// Born approved (auto-approval at admission).
    pub fn approved(by: UserId, at: DateTime<Utc>) -> Self {
        Self {
            status: ReviewStatus::Approved,
            approved_by: Some(by),
            approved_at: Some(at),
            ..Self::pending()
        }
    }
}

/// Answer of an authority predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    Granted,
    Denied(&'static str),
    /// The subject never needs a manual decision.
    AlreadyDecided,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject { reason: String },
}

impl Decision {
    pub fn reject(reason: impl Into<String>) -> Self {
        Decision::Reject { reason: reason.into() }
    }

    pub fn target(&self) -> ReviewStatus {
        match self {
            Decision::Approve => ReviewStatus::Approved,
            Decision::Reject { .. } => ReviewStatus::Rejected,
        }
    }
}

/// One workflow's rules: an authority predicate over the reviewer and a
/// workflow-specific subject, plus whether rejections need a reason.
pub struct ReviewPolicy<S: ?Sized> {
    pub authority: fn(&Actor, &S) -> Authority,
    pub reason_required: bool,
}

impl<S: ?Sized> ReviewPolicy<S> {
    /// Decide a pending record. Returns the new record; the input is never
    /// modified, so a failed decision leaves the caller's copy untouched.
    pub fn decide(
        &self,
        entity_id: Ulid,
        record: &ReviewRecord,
        subject: &S,
        reviewer: &Actor,
        decision: &Decision,
        now: DateTime<Utc>,
    ) -> Result<ReviewRecord, EngineError> {
        let authority = (self.authority)(reviewer, subject);
        if authority == Authority::AlreadyDecided {
            return Err(EngineError::AlreadyDecided(entity_id));
        }
        if record.status != ReviewStatus::Pending {
            return Err(EngineError::InvalidStateTransition {
                from: record.status,
                to: decision.target(),
            });
        }
        if let Authority::Denied(why) = authority {
            return Err(EngineError::NotAuthorized(why));
        }

        let mut next = record.clone();
        match decision {
            Decision::Approve => {
                next.status = ReviewStatus::Approved;
                next.approved_by = Some(reviewer.id);
                next.approved_at = Some(now);
            }
            Decision::Reject { reason } => {
                let reason = reason.trim();
                if self.reason_required && reason.is_empty() {
                    return Err(EngineError::ReasonRequired("rejection reason"));
                }
                if reason.len() > MAX_REASON_LEN {
                    return Err(EngineError::LimitExceeded("rejection reason too long"));
                }
                next.status = ReviewStatus::Rejected;
                next.rejected_by = Some(reviewer.id);
                next.rejected_at = Some(now);
                next.rejection_reason = (!reason.is_empty()).then(|| reason.to_string());
            }
        }
        Ok(next)
    }
}

/// Withdraw a pending or approved record. `permitted` is the caller's
/// ownership/admin check; a reason is always required.
pub fn cancel(
    record: &ReviewRecord,
    permitted: bool,
    actor: &Actor,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<ReviewRecord, EngineError> {
    if !record.status.is_active() {
        return Err(EngineError::InvalidStateTransition {
            from: record.status,
            to: ReviewStatus::Cancelled,
        });
    }
    if !permitted {
        return Err(EngineError::NotAuthorized("only the owner or an admin may cancel"));
    }
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(EngineError::ReasonRequired("cancellation reason"));
    }
    if reason.len() > MAX_REASON_LEN {
        return Err(EngineError::LimitExceeded("cancellation reason too long"));
    }
    let mut next = record.clone();
    next.status = ReviewStatus::Cancelled;
    next.cancelled_by = Some(actor.id);
    next.cancelled_at = Some(now);
    next.cancellation_reason = Some(reason.to_string());
    Ok(next)
}

// ── Workflow policies ────────────────────────────────────────────

/// What a booking review needs to know about the booked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingSubject {
    /// Snapshot taken at admission.
    pub approval_type: ApprovalType,
    pub managed_by: UserId,
}

fn booking_authority(reviewer: &Actor, subject: &BookingSubject) -> Authority {
    match subject.approval_type {
        ApprovalType::AutoApprove => Authority::AlreadyDecided,
        ApprovalType::StaffApprove if reviewer.id == subject.managed_by => Authority::Granted,
        ApprovalType::StaffApprove => Authority::Denied("only the resource manager can review this booking"),
        ApprovalType::AdminApprove if reviewer.is_admin() => Authority::Granted,
        ApprovalType::AdminApprove => Authority::Denied("only admins can review this booking"),
    }
}

/// Subject: the role the registrant signed up with.
fn registration_authority(reviewer: &Actor, registrant_role: &Role) -> Authority {
    match reviewer.role {
        Role::Admin => Authority::Granted,
        Role::Faculty if *registrant_role == Role::Student => Authority::Granted,
        Role::Faculty => Authority::Denied("faculty can only review student registrations"),
        _ => Authority::Denied("faculty or admin access required"),
    }
}

/// Subject: the role being requested.
fn role_change_authority(reviewer: &Actor, requested_role: &Role) -> Authority {
    match (reviewer.role, requested_role) {
        (Role::Admin, _) => Authority::Granted,
        (Role::Faculty, Role::Student) => Authority::Granted,
        (Role::Faculty, _) => Authority::Denied("only admins can approve changes to this role"),
        _ => Authority::Denied("faculty or admin access required"),
    }
}

fn resource_addition_authority(reviewer: &Actor, _proposal: &ResourceProposal) -> Authority {
    if reviewer.is_admin() {
        Authority::Granted
    } else {
        Authority::Denied("admin access required")
    }
}

pub const BOOKING_POLICY: ReviewPolicy<BookingSubject> = ReviewPolicy {
    authority: booking_authority,
    reason_required: true,
};

pub const REGISTRATION_POLICY: ReviewPolicy<Role> = ReviewPolicy {
    authority: registration_authority,
    reason_required: true,
};

pub const ROLE_CHANGE_POLICY: ReviewPolicy<Role> = ReviewPolicy {
    authority: role_change_authority,
    reason_required: true,
};

pub const RESOURCE_ADDITION_POLICY: ReviewPolicy<ResourceProposal> = ReviewPolicy {
    authority: resource_addition_authority,
    reason_required: true,
};

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(role: Role) -> Actor {
        Actor::new(Ulid::new(), role)
    }

    fn staff_subject(manager: UserId) -> BookingSubject {
        BookingSubject {
            approval_type: ApprovalType::StaffApprove,
            managed_by: manager,
        }
    }

    #[test]
    fn manager_approves_staff_booking() {
        let manager = actor(Role::Staff);
        let now = Utc::now();
        let next = BOOKING_POLICY
            .decide(
                Ulid::new(),
                &ReviewRecord::pending(),
                &staff_subject(manager.id),
                &manager,
                &Decision::Approve,
                now,
            )
            .unwrap();
        assert_eq!(next.status, ReviewStatus::Approved);
        assert_eq!(next.approved_by, Some(manager.id));
        assert_eq!(next.approved_at, Some(now));
    }

    #[test]
    fn other_staff_cannot_approve() {
        let manager = actor(Role::Staff);
        let other = actor(Role::Staff);
        let err = BOOKING_POLICY
            .decide(
                Ulid::new(),
                &ReviewRecord::pending(),
                &staff_subject(manager.id),
                &other,
                &Decision::Approve,
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::NotAuthorized(_)));
    }

    #[test]
    fn admin_is_not_implicitly_a_manager() {
        let manager = actor(Role::Staff);
        let admin = actor(Role::Admin);
        let err = BOOKING_POLICY
            .decide(
                Ulid::new(),
                &ReviewRecord::pending(),
                &staff_subject(manager.id),
                &admin,
                &Decision::Approve,
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::NotAuthorized(_)));
    }

    #[test]
    fn admin_approve_requires_admin() {
        let subject = BookingSubject {
            approval_type: ApprovalType::AdminApprove,
            managed_by: Ulid::new(),
        };
        let faculty = actor(Role::Faculty);
        let admin = actor(Role::Admin);
        let record = ReviewRecord::pending();
        assert!(
            BOOKING_POLICY
                .decide(Ulid::new(), &record, &subject, &faculty, &Decision::Approve, Utc::now())
                .is_err()
        );
        assert!(
            BOOKING_POLICY
                .decide(Ulid::new(), &record, &subject, &admin, &Decision::Approve, Utc::now())
                .is_ok()
        );
    }

    #[test]
    fn auto_approve_is_already_decided() {
        let subject = BookingSubject {
            approval_type: ApprovalType::AutoApprove,
            managed_by: Ulid::new(),
        };
        let id = Ulid::new();
        let err = BOOKING_POLICY
            .decide(id, &ReviewRecord::pending(), &subject, &actor(Role::Admin), &Decision::Approve, Utc::now())
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyDecided(got) if got == id));
    }

    #[test]
    fn decide_from_non_pending_is_state_error() {
        let manager = actor(Role::Staff);
        let approved = ReviewRecord::approved(manager.id, Utc::now());
        let err = BOOKING_POLICY
            .decide(
                Ulid::new(),
                &approved,
                &staff_subject(manager.id),
                &manager,
                &Decision::reject("late"),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidStateTransition {
                from: ReviewStatus::Approved,
                to: ReviewStatus::Rejected
            }
        ));
    }

    #[test]
    fn state_is_checked_before_authority() {
        let manager = actor(Role::Staff);
        let stranger = actor(Role::Student);
        let mut rejected = ReviewRecord::pending();
        rejected.status = ReviewStatus::Rejected;
        let err = BOOKING_POLICY
            .decide(
                Ulid::new(),
                &rejected,
                &staff_subject(manager.id),
                &stranger,
                &Decision::Approve,
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition { .. }));
    }

    #[test]
    fn rejection_needs_reason_when_required() {
        let manager = actor(Role::Staff);
        let err = BOOKING_POLICY
            .decide(
                Ulid::new(),
                &ReviewRecord::pending(),
                &staff_subject(manager.id),
                &manager,
                &Decision::reject("   "),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::ReasonRequired(_)));

        let lenient: ReviewPolicy<BookingSubject> = ReviewPolicy {
            authority: booking_authority,
            reason_required: false,
        };
        let next = lenient
            .decide(
                Ulid::new(),
                &ReviewRecord::pending(),
                &staff_subject(manager.id),
                &manager,
                &Decision::reject(""),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(next.status, ReviewStatus::Rejected);
        assert_eq!(next.rejection_reason, None);
    }

    #[test]
    fn rejection_records_reviewer_and_trimmed_reason() {
        let manager = actor(Role::Staff);
        let next = BOOKING_POLICY
            .decide(
                Ulid::new(),
                &ReviewRecord::pending(),
                &staff_subject(manager.id),
                &manager,
                &Decision::reject("  room under maintenance "),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(next.rejected_by, Some(manager.id));
        assert_eq!(next.rejection_reason.as_deref(), Some("room under maintenance"));
        assert_eq!(next.approved_by, None);
    }

    #[test]
    fn cancel_from_approved() {
        let owner = actor(Role::Student);
        let record = ReviewRecord::approved(owner.id, Utc::now());
        let next = cancel(&record, true, &owner, "plans changed", Utc::now()).unwrap();
        assert_eq!(next.status, ReviewStatus::Cancelled);
        assert_eq!(next.cancelled_by, Some(owner.id));
        // Approval trail is kept.
        assert_eq!(next.approved_by, Some(owner.id));
    }

    #[test]
    fn cancel_terminal_is_state_error() {
        let owner = actor(Role::Student);
        for status in [ReviewStatus::Rejected, ReviewStatus::Cancelled] {
            let mut record = ReviewRecord::pending();
            record.status = status;
            let err = cancel(&record, true, &owner, "again", Utc::now()).unwrap_err();
            assert!(matches!(err, EngineError::InvalidStateTransition { from, .. } if from == status));
        }
    }

    #[test]
    fn cancel_requires_permission_and_reason() {
        let owner = actor(Role::Student);
        let record = ReviewRecord::pending();
        assert!(matches!(
            cancel(&record, false, &owner, "x", Utc::now()),
            Err(EngineError::NotAuthorized(_))
        ));
        assert!(matches!(
            cancel(&record, true, &owner, "", Utc::now()),
            Err(EngineError::ReasonRequired(_))
        ));
    }

    #[test]
    fn registration_rules() {
        let faculty = actor(Role::Faculty);
        let admin = actor(Role::Admin);
        let staff = actor(Role::Staff);
        assert_eq!(registration_authority(&faculty, &Role::Student), Authority::Granted);
        assert!(matches!(registration_authority(&faculty, &Role::Staff), Authority::Denied(_)));
        assert_eq!(registration_authority(&admin, &Role::Faculty), Authority::Granted);
        assert!(matches!(registration_authority(&staff, &Role::Student), Authority::Denied(_)));
    }

    #[test]
    fn role_change_rules() {
        let faculty = actor(Role::Faculty);
        let admin = actor(Role::Admin);
        assert_eq!(role_change_authority(&faculty, &Role::Student), Authority::Granted);
        assert!(matches!(role_change_authority(&faculty, &Role::Staff), Authority::Denied(_)));
        assert_eq!(role_change_authority(&admin, &Role::Faculty), Authority::Granted);
        assert!(matches!(
            role_change_authority(&actor(Role::Student), &Role::Student),
            Authority::Denied(_)
        ));
    }

    #[test]
    fn status_helpers() {
        assert!(ReviewStatus::Pending.is_active());
        assert!(ReviewStatus::Approved.is_active());
        assert!(!ReviewStatus::Approved.is_terminal());
        assert!(ReviewStatus::Rejected.is_terminal());
        assert!(ReviewStatus::Cancelled.is_terminal());
        assert_eq!(ReviewStatus::Cancelled.to_string(), "CANCELLED");
    }
}
