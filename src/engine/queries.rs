use chrono::NaiveDate;

use crate::model::*;
use crate::review::{
    Authority, RESOURCE_ADDITION_POLICY, REGISTRATION_POLICY, ROLE_CHANGE_POLICY, ReviewStatus,
};

use super::{Engine, EngineError, SharedRequest, SharedResourceState};

fn by_slot(a: &Booking, b: &Booking) -> std::cmp::Ordering {
    (a.booking_date, a.start_time, a.id).cmp(&(b.booking_date, b.start_time, b.id))
}

impl Engine {
    // Snapshot the Arcs first so no DashMap shard guard is held across an await.
    fn all_resources(&self) -> Vec<SharedResourceState> {
        self.resources.iter().map(|e| e.value().clone()).collect()
    }

    fn all_requests(&self) -> Vec<SharedRequest> {
        self.requests.iter().map(|e| e.value().clone()).collect()
    }

    async fn collect_bookings(&self, mut keep: impl FnMut(&Resource, &Booking) -> bool) -> Vec<Booking> {
        let mut out = Vec::new();
        for rs in self.all_resources() {
            let guard = rs.read().await;
            out.extend(guard.bookings().filter(|&b| keep(&guard.resource, b)).cloned());
        }
        out.sort_by(by_slot);
        out
    }

    // ── Resources & calendar ─────────────────────────────────

    /// A live (not soft-deleted) resource.
    pub async fn resource(&self, id: ResourceId) -> Result<Resource, EngineError> {
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        if guard.resource.is_deleted() {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard.resource.clone())
    }

    /// Live resources ordered by name.
    pub async fn list_resources(&self) -> Vec<Resource> {
        let mut out = Vec::new();
        for rs in self.all_resources() {
            let guard = rs.read().await;
            if !guard.resource.is_deleted() {
                out.push(guard.resource.clone());
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    pub async fn weekly_schedule(&self, id: ResourceId) -> Result<WeeklySchedule, EngineError> {
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        if guard.resource.is_deleted() {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard.schedule.clone())
    }

    /// Overrides in date order, optionally bounded (inclusive).
    pub async fn calendar_overrides(&self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Vec<CalendarOverride> {
        self.overrides
            .read()
            .await
            .values()
            .filter(|o| from.is_none_or(|f| o.date >= f) && to.is_none_or(|t| o.date <= t))
            .cloned()
            .collect()
    }

    // ── Bookings ─────────────────────────────────────────────

    /// One booking, visible to its owner, the resource manager and admins.
    pub async fn booking(&self, viewer: &Actor, id: BookingId) -> Result<Booking, EngineError> {
        let resource_id = self
            .booking_index
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        let booking = guard.get(&id).ok_or(EngineError::NotFound(id))?;
        if booking.user_id != viewer.id && guard.resource.managed_by != viewer.id && !viewer.is_admin() {
            return Err(EngineError::NotAuthorized("not your booking"));
        }
        Ok(booking.clone())
    }

    /// A user's pending and approved bookings from today on.
    pub async fn user_bookings(&self, user_id: UserId) -> Vec<Booking> {
        let today = self.today();
        self.collect_bookings(|_, b| b.user_id == user_id && b.is_active() && b.booking_date >= today)
            .await
    }

    /// Pending bookings this reviewer may decide: every one for admins, the
    /// staff-approved bookings of managed resources for staff.
    pub async fn pending_bookings_for(&self, reviewer: &Actor) -> Vec<Booking> {
        let is_admin = reviewer.is_admin();
        self.collect_bookings(|resource, b| {
            b.status() == ReviewStatus::Pending
                && (is_admin
                    || (b.approval_type == ApprovalType::StaffApprove && resource.managed_by == reviewer.id))
        })
        .await
    }

    pub async fn list_bookings(&self, admin: &Actor, filter: &BookingFilter) -> Result<Vec<Booking>, EngineError> {
        if !admin.is_admin() {
            return Err(EngineError::NotAuthorized("admin access required"));
        }
        if let Some(resource_id) = filter.resource_id {
            let rs = self
                .get_resource(&resource_id)
                .ok_or(EngineError::NotFound(resource_id))?;
            let guard = rs.read().await;
            let mut out: Vec<Booking> = guard.bookings().filter(|b| filter.matches(b)).cloned().collect();
            out.sort_by(by_slot);
            return Ok(out);
        }
        Ok(self.collect_bookings(|_, b| filter.matches(b)).await)
    }

    // ── Requests ─────────────────────────────────────────────

    pub async fn request(&self, id: RequestId) -> Result<ReviewRequest, EngineError> {
        let shared = self.get_request(&id).ok_or(EngineError::NotFound(id))?;
        let request = shared.lock().await;
        Ok(request.clone())
    }

    /// Pending requests the reviewer has authority over, newest first.
    pub async fn pending_requests_for(&self, reviewer: &Actor) -> Vec<ReviewRequest> {
        let mut out = Vec::new();
        for shared in self.all_requests() {
            let request = shared.lock().await;
            if request.status() != ReviewStatus::Pending {
                continue;
            }
            let authority = match &request.kind {
                RequestKind::Registration { role } => (REGISTRATION_POLICY.authority)(reviewer, role),
                RequestKind::RoleChange { requested_role, .. } => (ROLE_CHANGE_POLICY.authority)(reviewer, requested_role),
                RequestKind::ResourceAddition { proposal } => (RESOURCE_ADDITION_POLICY.authority)(reviewer, proposal),
            };
            if authority == Authority::Granted {
                out.push(request.clone());
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }

    /// Everything a user has filed, newest first.
    pub async fn requests_by(&self, user_id: UserId) -> Vec<ReviewRequest> {
        let mut out = Vec::new();
        for shared in self.all_requests() {
            let request = shared.lock().await;
            if request.requested_by == user_id {
                out.push(request.clone());
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }
}
