use std::time::Instant;

use chrono::{TimeDelta, Timelike};
use tracing::{debug, info};
use ulid::Ulid;

use crate::audit::AuditEntry;
use crate::calendar;
use crate::limits::*;
use crate::model::*;
use crate::notify::{MessageType, Notification, Recipient};
use crate::observability::{ADMISSIONS_TOTAL, ADMISSION_DURATION_SECONDS, ADMISSION_REJECTIONS_TOTAL};
use crate::review::{ReviewRecord, ReviewStatus};

use super::{snapshot, Effects, Engine, EngineError};

impl Engine {
    /// Admit a booking for one hourly slot.
    ///
    /// Every check runs under the resource's write lock, so the capacity
    /// tally and the journal write are atomic against other admissions for
    /// the same resource. Notifications and audit go out after the lock is
    /// released and never affect the result.
    pub async fn admit(&self, user: &Actor, request: BookingRequest) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.admit_inner(user, request).await;
        metrics::histogram!(ADMISSION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        match &result {
            Ok(booking) => {
                let status = match booking.status() {
                    ReviewStatus::Approved => "approved",
                    _ => "pending",
                };
                metrics::counter!(ADMISSIONS_TOTAL, "status" => status).increment(1);
            }
            Err(e) => {
                debug!(user = %user.id, "admission refused: {e}");
                metrics::counter!(ADMISSIONS_TOTAL, "status" => "rejected").increment(1);
                metrics::counter!(ADMISSION_REJECTIONS_TOTAL, "reason" => e.label()).increment(1);
            }
        }
        result
    }

    async fn admit_inner(&self, user: &Actor, request: BookingRequest) -> Result<Booking, EngineError> {
        let BookingRequest {
            resource_id,
            booking_date,
            start_time,
            quantity,
            is_special_request,
            special_request_reason,
        } = request;

        if user.role == Role::Staff {
            return Err(EngineError::NotAuthorized("staff members cannot create bookings"));
        }

        let gate = self.gate.read().await;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::ResourceUnavailable(resource_id))?;
        let mut guard = rs.write().await;

        if !guard.resource.accepts_bookings() {
            return Err(EngineError::ResourceUnavailable(resource_id));
        }
        if start_time.minute() != 0 || start_time.second() != 0 || start_time.nanosecond() != 0 {
            return Err(EngineError::InvalidSlotAlignment(start_time));
        }
        if booking_date < self.today() {
            return Err(EngineError::PastDateNotAllowed(booking_date));
        }
        let (end_time, wrapped) = start_time.overflowing_add_signed(TimeDelta::hours(1));
        if wrapped != 0 {
            return Err(EngineError::InvalidInput("slot would cross midnight".into()));
        }
        if quantity == 0 {
            return Err(EngineError::InvalidQuantity);
        }
        if quantity > MAX_QUANTITY_PER_BOOKING {
            return Err(EngineError::LimitExceeded("quantity too large"));
        }

        let day = {
            let overrides = self.overrides.read().await;
            calendar::resolve(
                &guard.schedule,
                overrides.get(&booking_date),
                booking_date,
                self.config.default_schedule.hours(),
            )
        };
        if !day.is_working && !is_special_request {
            return Err(EngineError::NonWorkingDayRequiresSpecialRequest(booking_date));
        }
        let special_request_reason = if is_special_request {
            let reason = special_request_reason
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .ok_or(EngineError::SpecialRequestReasonRequired)?;
            if reason.len() > MAX_REASON_LEN {
                return Err(EngineError::LimitExceeded("special request reason too long"));
            }
            Some(reason.to_string())
        } else {
            None
        };
        if guard.booking_count() >= MAX_BOOKINGS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many bookings on resource"));
        }

        let total = guard.resource.total_quantity;
        let booked = guard.sum_active_quantity(booking_date, start_time);
        if booked.saturating_add(quantity) > total {
            return Err(EngineError::CapacityExceeded {
                requested: quantity,
                available: total.saturating_sub(booked),
                total,
            });
        }

        let now = self.now();
        let approval_type = guard.resource.approval_type;
        let review = match approval_type {
            ApprovalType::AutoApprove => ReviewRecord::approved(user.id, now),
            ApprovalType::StaffApprove | ApprovalType::AdminApprove => ReviewRecord::pending(),
        };
        let booking = Booking {
            id: Ulid::new(),
            user_id: user.id,
            resource_id,
            booking_date,
            start_time,
            end_time,
            quantity_requested: quantity,
            is_special_request,
            special_request_reason,
            approval_type,
            review,
            created_at: now,
        };

        let event = Event::BookingAdmitted {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let resource_name = guard.resource.name.clone();
        let managed_by = guard.resource.managed_by;
        drop(guard);
        drop(gate);

        info!(
            booking = %booking.id,
            resource = %resource_id,
            date = %booking_date,
            start = %start_time,
            quantity,
            status = %booking.status(),
            "booking admitted"
        );

        let mut effects = Effects::default();
        effects.audit(
            AuditEntry::new(Some(user.id), "BOOKING_CREATED", "booking", booking.id).new_state(snapshot(&booking)),
        );
        match approval_type {
            ApprovalType::AutoApprove => effects.notify(
                Notification::new(
                    Recipient::User(user.id),
                    MessageType::BookingApproved,
                    "Booking Approved",
                    format!("Your booking for {resource_name} on {booking_date} has been auto-approved."),
                )
                .about("booking", booking.id),
            ),
            ApprovalType::StaffApprove | ApprovalType::AdminApprove => {
                let recipient = if approval_type == ApprovalType::StaffApprove {
                    Recipient::User(managed_by)
                } else {
                    Recipient::Role(Role::Admin)
                };
                effects.notify(
                    Notification::new(
                        recipient,
                        MessageType::BookingPending,
                        "New Booking Request",
                        format!("A booking for {resource_name} on {booking_date} at {start_time} awaits approval."),
                    )
                    .about("booking", booking.id),
                );
            }
        }
        self.dispatch(effects).await;

        Ok(booking)
    }
}
