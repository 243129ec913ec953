use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::review::{ReviewRecord, ReviewStatus};

pub type UserId = Ulid;
pub type ResourceId = Ulid;
pub type BookingId = Ulid;
pub type RequestId = Ulid;

// ── Identity context ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Student,
    Faculty,
    Staff,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "STUDENT",
            Role::Faculty => "FACULTY",
            Role::Staff => "STAFF",
            Role::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Inactive,
}

/// The resolved caller. Authentication happens upstream; the core trusts this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
    pub account_status: AccountStatus,
    pub approval_status: ReviewStatus,
}

impl Actor {
    /// An active, approved user with the given role.
    pub fn new(id: UserId, role: Role) -> Self {
        Self {
            id,
            role,
            account_status: AccountStatus::Active,
            approval_status: ReviewStatus::Approved,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_active_and_approved(&self) -> bool {
        self.account_status == AccountStatus::Active
            && self.approval_status == ReviewStatus::Approved
    }
}

// ── Resources ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    Lab,
    Classroom,
    EventHall,
    Equipment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Available,
    Unavailable,
}

/// Who has to sign off on a booking before it counts as approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalType {
    AutoApprove,
    StaffApprove,
    AdminApprove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    pub kind: ResourceKind,
    /// Seat count. Zero for non-seated items.
    pub capacity: u32,
    /// Units that can be booked concurrently for one slot. Always >= 1.
    pub total_quantity: u32,
    pub location: Option<String>,
    pub description: Option<String>,
    pub status: ResourceStatus,
    pub approval_type: ApprovalType,
    pub managed_by: UserId,
    pub created_at: DateTime<Utc>,
    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Resource {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Exists, not deleted, and marked available.
    pub fn accepts_bookings(&self) -> bool {
        !self.is_deleted() && self.status == ResourceStatus::Available
    }
}

/// Attributes for a new resource; id, timestamps and status are assigned by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewResource {
    pub name: String,
    pub kind: ResourceKind,
    pub capacity: u32,
    pub total_quantity: u32,
    pub location: Option<String>,
    pub description: Option<String>,
    pub approval_type: ApprovalType,
    pub managed_by: UserId,
}

/// Partial update. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcePatch {
    pub name: Option<String>,
    pub capacity: Option<u32>,
    pub total_quantity: Option<u32>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub status: Option<ResourceStatus>,
    pub approval_type: Option<ApprovalType>,
    pub managed_by: Option<UserId>,
}

// ── Schedules ────────────────────────────────────────────────────

/// Opening hours for one weekday. `day_of_week` is 0 = Monday .. 6 = Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_working: bool,
}

/// Per-resource weekly schedule, kept sorted by `day_of_week`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    entries: Vec<ScheduleEntry>,
}

impl WeeklySchedule {
    /// Build a full week. Requires exactly one entry for each day 0..=6,
    /// each with `start_time < end_time`.
    pub fn from_entries(mut entries: Vec<ScheduleEntry>) -> Result<Self, String> {
        if entries.len() != 7 {
            return Err(format!("expected 7 schedule entries, got {}", entries.len()));
        }
        entries.sort_by_key(|e| e.day_of_week);
        for (expected, entry) in entries.iter().enumerate() {
            if entry.day_of_week as usize != expected {
                return Err(format!("invalid or duplicate day_of_week {}", entry.day_of_week));
            }
            if entry.start_time >= entry.end_time {
                return Err(format!(
                    "day {}: start {} is not before end {}",
                    entry.day_of_week, entry.start_time, entry.end_time
                ));
            }
        }
        Ok(Self { entries })
    }

    /// A schedule that may be missing days. Only used where an incomplete
    /// week must be represented (e.g. legacy data); lookups treat gaps as closed.
    pub fn partial(mut entries: Vec<ScheduleEntry>) -> Self {
        entries.sort_by_key(|e| e.day_of_week);
        entries.dedup_by_key(|e| e.day_of_week);
        Self { entries }
    }

    pub fn entry(&self, day_of_week: u8) -> Option<&ScheduleEntry> {
        self.entries
            .binary_search_by_key(&day_of_week, |e| e.day_of_week)
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }
}

// ── Calendar overrides ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideKind {
    Holiday,
    WorkingDay,
}

/// Campus-wide exception for one date. Beats every per-resource schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarOverride {
    pub date: NaiveDate,
    pub kind: OverrideKind,
    pub description: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

// ── Bookings ─────────────────────────────────────────────────────

/// Caller input for `Engine::admit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub resource_id: ResourceId,
    pub booking_date: NaiveDate,
    pub start_time: NaiveTime,
    pub quantity: u32,
    pub is_special_request: bool,
    pub special_request_reason: Option<String>,
}

impl BookingRequest {
    /// Plain (non-special) request for one unit.
    pub fn new(resource_id: ResourceId, booking_date: NaiveDate, start_time: NaiveTime) -> Self {
        Self {
            resource_id,
            booking_date,
            start_time,
            quantity: 1,
            is_special_request: false,
            special_request_reason: None,
        }
    }

    pub fn quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn special(mut self, reason: impl Into<String>) -> Self {
        self.is_special_request = true;
        self.special_request_reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub user_id: UserId,
    pub resource_id: ResourceId,
    pub booking_date: NaiveDate,
    pub start_time: NaiveTime,
    /// Always `start_time + 1h`.
    pub end_time: NaiveTime,
    pub quantity_requested: u32,
    pub is_special_request: bool,
    pub special_request_reason: Option<String>,
    /// The resource's approval type when the booking was admitted.
    pub approval_type: ApprovalType,
    pub review: ReviewRecord,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn status(&self) -> ReviewStatus {
        self.review.status
    }

    /// Counts against capacity.
    pub fn is_active(&self) -> bool {
        self.review.status.is_active()
    }
}

/// Admin listing filter. Every `Some` field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub resource_id: Option<ResourceId>,
    pub user_id: Option<UserId>,
    pub status: Option<ReviewStatus>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl BookingFilter {
    pub fn matches(&self, b: &Booking) -> bool {
        self.resource_id.is_none_or(|r| r == b.resource_id)
            && self.user_id.is_none_or(|u| u == b.user_id)
            && self.status.is_none_or(|s| s == b.status())
            && self.date_from.is_none_or(|d| b.booking_date >= d)
            && self.date_to.is_none_or(|d| b.booking_date <= d)
    }
}

// ── Availability ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
    Available,
    FullyBooked,
    NonWorking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub total_quantity: u32,
    pub booked_quantity: u32,
    pub available_quantity: u32,
    pub status: SlotStatus,
}

// ── Review requests ──────────────────────────────────────────────

/// A resource a staff member would like added to the catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProposal {
    pub name: String,
    pub kind: ResourceKind,
    pub capacity: u32,
    pub total_quantity: u32,
    pub location: Option<String>,
    pub description: Option<String>,
    pub approval_type: ApprovalType,
    pub justification: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    Registration {
        role: Role,
    },
    RoleChange {
        current_role: Role,
        requested_role: Role,
    },
    ResourceAddition {
        proposal: ResourceProposal,
    },
}

impl RequestKind {
    pub fn entity_type(&self) -> &'static str {
        match self {
            RequestKind::Registration { .. } => "user",
            RequestKind::RoleChange { .. } => "role_change_request",
            RequestKind::ResourceAddition { .. } => "resource_request",
        }
    }
}

/// Registration, role-change or resource-addition request awaiting review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub id: RequestId,
    /// The registering user, or the user who filed the request.
    pub requested_by: UserId,
    pub kind: RequestKind,
    pub review: ReviewRecord,
    /// Set when an approved resource addition produced a resource.
    pub created_resource: Option<ResourceId>,
    pub created_at: DateTime<Utc>,
}

impl ReviewRequest {
    pub fn status(&self) -> ReviewStatus {
        self.review.status
    }
}

// ── Journal records ──────────────────────────────────────────────

/// Everything that changes state is one of these. Flat, replayable, and the
/// only thing written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        resource: Resource,
        schedule: WeeklySchedule,
    },
    /// Attribute change or soft delete (`deleted_at` set).
    ResourceUpdated {
        resource: Resource,
    },
    ScheduleReplaced {
        resource_id: ResourceId,
        schedule: WeeklySchedule,
    },
    OverrideAdded {
        calendar_override: CalendarOverride,
    },
    OverrideRemoved {
        date: NaiveDate,
    },
    BookingAdmitted {
        booking: Booking,
    },
    BookingReviewed {
        id: BookingId,
        resource_id: ResourceId,
        review: ReviewRecord,
    },
    RequestFiled {
        request: ReviewRequest,
    },
    /// A request decision. An approved resource addition carries the resource
    /// it creates so both land in one record.
    RequestReviewed {
        id: RequestId,
        review: ReviewRecord,
        created: Option<(Resource, WeeklySchedule)>,
    },
    /// Soft delete together with the auto-cancellations it causes.
    ResourceDeleted {
        resource: Resource,
        cancelled: Vec<(BookingId, ReviewRecord)>,
    },
}

impl Event {
    /// The resource whose state this event mutates, if it targets one.
    pub fn resource_id(&self) -> Option<ResourceId> {
        match self {
            Event::ResourceUpdated { resource } | Event::ResourceDeleted { resource, .. } => Some(resource.id),
            Event::ScheduleReplaced { resource_id, .. }
            | Event::BookingReviewed { resource_id, .. } => Some(*resource_id),
            Event::BookingAdmitted { booking } => Some(booking.resource_id),
            Event::ResourceCreated { .. }
            | Event::OverrideAdded { .. }
            | Event::OverrideRemoved { .. }
            | Event::RequestFiled { .. }
            | Event::RequestReviewed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn week() -> Vec<ScheduleEntry> {
        (0..7)
            .map(|d| ScheduleEntry {
                day_of_week: d,
                start_time: t(8, 0),
                end_time: t(19, 0),
                is_working: d < 5,
            })
            .collect()
    }

    #[test]
    fn schedule_requires_seven_distinct_days() {
        assert!(WeeklySchedule::from_entries(week()).is_ok());

        let mut short = week();
        short.pop();
        assert!(WeeklySchedule::from_entries(short).is_err());

        let mut dup = week();
        dup[6].day_of_week = 5;
        assert!(WeeklySchedule::from_entries(dup).is_err());
    }

    #[test]
    fn schedule_rejects_inverted_hours() {
        let mut entries = week();
        entries[2].start_time = t(19, 0);
        entries[2].end_time = t(8, 0);
        let err = WeeklySchedule::from_entries(entries).unwrap_err();
        assert!(err.contains("day 2"));
    }

    #[test]
    fn schedule_entries_sorted_regardless_of_input_order() {
        let mut entries = week();
        entries.reverse();
        let schedule = WeeklySchedule::from_entries(entries).unwrap();
        let days: Vec<u8> = schedule.entries().iter().map(|e| e.day_of_week).collect();
        assert_eq!(days, vec![0, 1, 2, 3, 4, 5, 6]);
        assert!(schedule.entry(6).is_some_and(|e| !e.is_working));
    }

    #[test]
    fn partial_schedule_has_gaps() {
        let schedule = WeeklySchedule::partial(vec![week()[0]]);
        assert!(schedule.entry(0).is_some());
        assert!(schedule.entry(1).is_none());
    }

    #[test]
    fn booking_filter_matches_all_set_fields() {
        let rid = Ulid::new();
        let uid = Ulid::new();
        let date = NaiveDate::from_ymd_opt(2030, 3, 4).unwrap();
        let booking = Booking {
            id: Ulid::new(),
            user_id: uid,
            resource_id: rid,
            booking_date: date,
            start_time: t(9, 0),
            end_time: t(10, 0),
            quantity_requested: 1,
            is_special_request: false,
            special_request_reason: None,
            approval_type: ApprovalType::AutoApprove,
            review: ReviewRecord::pending(),
            created_at: Utc::now(),
        };

        assert!(BookingFilter::default().matches(&booking));
        let f = BookingFilter {
            resource_id: Some(rid),
            status: Some(ReviewStatus::Pending),
            date_from: Some(date),
            date_to: Some(date),
            ..Default::default()
        };
        assert!(f.matches(&booking));
        let other_user = BookingFilter {
            user_id: Some(Ulid::new()),
            ..Default::default()
        };
        assert!(!other_user.matches(&booking));
        let later = BookingFilter {
            date_from: date.succ_opt(),
            ..Default::default()
        };
        assert!(!later.matches(&booking));
    }

    #[test]
    fn event_journal_encoding_roundtrip() {
        let event = Event::OverrideAdded {
            calendar_override: CalendarOverride {
                date: NaiveDate::from_ymd_opt(2030, 12, 25).unwrap(),
                kind: OverrideKind::Holiday,
                description: Some("Winter break".into()),
                created_by: Ulid::new(),
                created_at: Utc::now(),
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
