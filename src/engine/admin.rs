use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;
use tracing::info;
use ulid::Ulid;

use crate::audit::AuditEntry;
use crate::limits::*;
use crate::model::*;
use crate::notify::{MessageType, Notification, Recipient};
use crate::observability::TRANSITIONS_TOTAL;
use crate::review::{self, ReviewStatus};

use super::{snapshot, Effects, Engine, EngineError};

pub(super) const RESOURCE_REMOVED_REASON: &str = "Resource removed by administrator";

fn require_admin(actor: &Actor) -> Result<(), EngineError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(EngineError::NotAuthorized("admin access required"))
    }
}

/// Shape checks shared by direct creation, updates and addition requests.
pub(super) fn validate_resource_fields(
    name: &str,
    total_quantity: u32,
    location: Option<&str>,
    description: Option<&str>,
) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidInput("resource name must not be empty".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("resource name too long"));
    }
    if total_quantity == 0 {
        return Err(EngineError::InvalidInput("total_quantity must be at least 1".into()));
    }
    if total_quantity > MAX_TOTAL_QUANTITY {
        return Err(EngineError::LimitExceeded("total_quantity too large"));
    }
    if location.is_some_and(|l| l.len() > MAX_LOCATION_LEN) {
        return Err(EngineError::LimitExceeded("location too long"));
    }
    if description.is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN) {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    Ok(())
}

pub(super) fn build_resource(attrs: NewResource, now: DateTime<Utc>) -> Resource {
    Resource {
        id: Ulid::new(),
        name: attrs.name.trim().to_string(),
        kind: attrs.kind,
        capacity: attrs.capacity,
        total_quantity: attrs.total_quantity,
        location: attrs.location,
        description: attrs.description,
        status: ResourceStatus::Available,
        approval_type: attrs.approval_type,
        managed_by: attrs.managed_by,
        created_at: now,
        deleted_at: None,
    }
}

impl Engine {
    /// Create a resource seeded with the configured default weekly schedule.
    pub async fn create_resource(&self, admin: &Actor, attrs: NewResource) -> Result<Resource, EngineError> {
        require_admin(admin)?;
        validate_resource_fields(
            &attrs.name,
            attrs.total_quantity,
            attrs.location.as_deref(),
            attrs.description.as_deref(),
        )?;
        let gate = self.gate.read().await;
        if self.resources.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }

        let resource = build_resource(attrs, self.now());
        let schedule = self.config.default_schedule.seed();
        let event = Event::ResourceCreated {
            resource: resource.clone(),
            schedule: schedule.clone(),
        };
        self.journal_append(&event).await?;
        self.insert_resource(resource.clone(), schedule);
        info!(resource = %resource.id, name = %resource.name, "resource created");

        let mut effects = Effects::default();
        effects.audit(
            AuditEntry::new(Some(admin.id), "RESOURCE_CREATED", "resource", resource.id)
                .new_state(snapshot(&resource)),
        );
        drop(gate);
        self.dispatch(effects).await;
        Ok(resource)
    }

    /// Patch resource attributes. Admins may change anything; the managing
    /// staff member may change everything except the manager.
    pub async fn update_resource(
        &self,
        actor: &Actor,
        resource_id: ResourceId,
        patch: ResourcePatch,
    ) -> Result<Resource, EngineError> {
        let gate = self.gate.read().await;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = rs.write().await;
        if guard.resource.is_deleted() {
            return Err(EngineError::NotFound(resource_id));
        }
        let is_manager = actor.role == Role::Staff && guard.resource.managed_by == actor.id;
        if !actor.is_admin() && !is_manager {
            return Err(EngineError::NotAuthorized("only admins or the resource manager can edit this resource"));
        }
        if patch.managed_by.is_some() && !actor.is_admin() {
            return Err(EngineError::NotAuthorized("only admins can reassign a resource"));
        }

        let previous = guard.resource.clone();
        let mut next = previous.clone();
        if let Some(name) = patch.name {
            next.name = name.trim().to_string();
        }
        if let Some(capacity) = patch.capacity {
            next.capacity = capacity;
        }
        if let Some(total_quantity) = patch.total_quantity {
            next.total_quantity = total_quantity;
        }
        if let Some(location) = patch.location {
            next.location = Some(location);
        }
        if let Some(description) = patch.description {
            next.description = Some(description);
        }
        if let Some(status) = patch.status {
            next.status = status;
        }
        if let Some(approval_type) = patch.approval_type {
            next.approval_type = approval_type;
        }
        if let Some(managed_by) = patch.managed_by {
            next.managed_by = managed_by;
        }
        validate_resource_fields(
            &next.name,
            next.total_quantity,
            next.location.as_deref(),
            next.description.as_deref(),
        )?;

        let event = Event::ResourceUpdated { resource: next.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);
        info!(resource = %resource_id, "resource updated");

        let mut effects = Effects::default();
        effects.audit(
            AuditEntry::new(Some(actor.id), "RESOURCE_UPDATED", "resource", resource_id)
                .previous(snapshot(&previous))
                .new_state(snapshot(&next)),
        );
        drop(gate);
        self.dispatch(effects).await;
        Ok(next)
    }

    /// Soft-delete a resource. Its pending and approved bookings from today
    /// on are cancelled and their owners told. Returns the cancelled ids.
    pub async fn delete_resource(&self, admin: &Actor, resource_id: ResourceId) -> Result<Vec<BookingId>, EngineError> {
        require_admin(admin)?;
        let gate = self.gate.read().await;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = rs.write().await;
        if guard.resource.is_deleted() {
            return Err(EngineError::NotFound(resource_id));
        }

        let now = self.now();
        let doomed: Vec<(BookingId, UserId, NaiveDate, _)> = guard
            .active_from(self.today())
            .into_iter()
            .map(|b| (b.id, b.user_id, b.booking_date, b.review.clone()))
            .collect();

        let mut effects = Effects::default();
        let mut cancelled = Vec::with_capacity(doomed.len());
        for (booking_id, owner, date, record) in doomed {
            let review = review::cancel(&record, true, admin, RESOURCE_REMOVED_REASON, now)?;
            cancelled.push((booking_id, review));

            effects.notify(
                Notification::new(
                    Recipient::User(owner),
                    MessageType::BookingAutoCancelled,
                    "Booking Auto-Cancelled",
                    format!(
                        "Your booking for {} on {date} has been cancelled because the resource was removed by administrator.",
                        guard.resource.name
                    ),
                )
                .about("booking", booking_id),
            );
            effects.audit(
                AuditEntry::new(Some(admin.id), "BOOKING_AUTO_CANCELLED", "booking", booking_id)
                    .previous(json!({ "status": record.status }))
                    .new_state(json!({ "status": ReviewStatus::Cancelled }))
                    .metadata(json!({ "reason": RESOURCE_REMOVED_REASON })),
            );
        }

        let ids: Vec<BookingId> = cancelled.iter().map(|(id, _)| *id).collect();
        let mut removed = guard.resource.clone();
        removed.deleted_at = Some(now);
        // One record: either every cancellation and the delete land, or none.
        let event = Event::ResourceDeleted {
            resource: removed,
            cancelled,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(TRANSITIONS_TOTAL, "to" => ReviewStatus::Cancelled.as_str()).increment(ids.len() as u64);
        drop(guard);
        info!(resource = %resource_id, cancelled = ids.len(), "resource deleted");

        effects.audit(
            AuditEntry::new(Some(admin.id), "RESOURCE_DELETED", "resource", resource_id)
                .metadata(json!({ "cancelled_bookings_count": ids.len() })),
        );
        drop(gate);
        self.dispatch(effects).await;
        Ok(ids)
    }

    /// Replace all seven weekly entries at once.
    pub async fn replace_schedule(
        &self,
        admin: &Actor,
        resource_id: ResourceId,
        entries: Vec<ScheduleEntry>,
    ) -> Result<WeeklySchedule, EngineError> {
        require_admin(admin)?;
        let schedule = WeeklySchedule::from_entries(entries).map_err(EngineError::InvalidInput)?;
        let gate = self.gate.read().await;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = rs.write().await;
        if guard.resource.is_deleted() {
            return Err(EngineError::NotFound(resource_id));
        }
        let previous = guard.schedule.clone();
        let event = Event::ScheduleReplaced {
            resource_id,
            schedule: schedule.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);
        info!(resource = %resource_id, "weekly schedule replaced");

        let mut effects = Effects::default();
        effects.audit(
            AuditEntry::new(Some(admin.id), "SCHEDULE_UPDATED", "resource", resource_id)
                .previous(snapshot(&previous))
                .new_state(snapshot(&schedule)),
        );
        drop(gate);
        self.dispatch(effects).await;
        Ok(schedule)
    }

    /// Declare a campus-wide holiday or extra working day.
    pub async fn add_calendar_override(
        &self,
        admin: &Actor,
        date: NaiveDate,
        kind: OverrideKind,
        description: Option<String>,
    ) -> Result<CalendarOverride, EngineError> {
        require_admin(admin)?;
        if description.as_ref().is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN) {
            return Err(EngineError::LimitExceeded("description too long"));
        }
        let gate = self.gate.read().await;
        let mut overrides = self.overrides.write().await;
        if overrides.contains_key(&date) {
            return Err(EngineError::AlreadyExists(format!("calendar override on {date}")));
        }
        let calendar_override = CalendarOverride {
            date,
            kind,
            description,
            created_by: admin.id,
            created_at: self.now(),
        };
        self.journal_append(&Event::OverrideAdded {
            calendar_override: calendar_override.clone(),
        })
        .await?;
        overrides.insert(date, calendar_override.clone());
        drop(overrides);
        info!(%date, ?kind, "calendar override added");

        let mut effects = Effects::default();
        effects.audit(
            AuditEntry::new(Some(admin.id), "CALENDAR_OVERRIDE_CREATED", "calendar_override", date)
                .new_state(snapshot(&calendar_override)),
        );
        drop(gate);
        self.dispatch(effects).await;
        Ok(calendar_override)
    }

    pub async fn remove_calendar_override(&self, admin: &Actor, date: NaiveDate) -> Result<CalendarOverride, EngineError> {
        require_admin(admin)?;
        let gate = self.gate.read().await;
        let mut overrides = self.overrides.write().await;
        if !overrides.contains_key(&date) {
            return Err(EngineError::OverrideNotFound(date));
        }
        self.journal_append(&Event::OverrideRemoved { date }).await?;
        let removed = overrides.remove(&date).ok_or(EngineError::OverrideNotFound(date))?;
        drop(overrides);
        info!(%date, "calendar override removed");

        let mut effects = Effects::default();
        effects.audit(
            AuditEntry::new(Some(admin.id), "CALENDAR_OVERRIDE_DELETED", "calendar_override", date)
                .previous(snapshot(&removed)),
        );
        drop(gate);
        self.dispatch(effects).await;
        Ok(removed)
    }
}
