use serde_json::json;
use tokio::sync::OwnedRwLockWriteGuard;
use tracing::info;

use crate::audit::AuditEntry;
use crate::model::*;
use crate::notify::{MessageType, Notification, Recipient};
use crate::observability::TRANSITIONS_TOTAL;
use crate::review::{self, BOOKING_POLICY, BookingSubject, Decision, ReviewStatus};

use super::{Effects, Engine, EngineError, ResourceState};

impl Engine {
    /// Lookup booking → resource, acquire the resource's write lock.
    async fn resolve_booking_write(
        &self,
        booking_id: &BookingId,
    ) -> Result<OwnedRwLockWriteGuard<ResourceState>, EngineError> {
        let resource_id = self
            .booking_index
            .get(booking_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(*booking_id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        Ok(rs.write_owned().await)
    }

    pub async fn approve_booking(&self, reviewer: &Actor, booking_id: BookingId) -> Result<Booking, EngineError> {
        self.review_booking(reviewer, booking_id, Decision::Approve).await
    }

    pub async fn reject_booking(
        &self,
        reviewer: &Actor,
        booking_id: BookingId,
        reason: &str,
    ) -> Result<Booking, EngineError> {
        self.review_booking(reviewer, booking_id, Decision::reject(reason)).await
    }

    /// Approve or reject a pending booking. Authority follows the approval
    /// type captured when the booking was admitted.
    pub async fn review_booking(
        &self,
        reviewer: &Actor,
        booking_id: BookingId,
        decision: Decision,
    ) -> Result<Booking, EngineError> {
        let gate = self.gate.read().await;
        let mut guard = self.resolve_booking_write(&booking_id).await?;
        let booking = guard.get(&booking_id).ok_or(EngineError::NotFound(booking_id))?;
        let subject = BookingSubject {
            approval_type: booking.approval_type,
            managed_by: guard.resource.managed_by,
        };
        let previous = booking.status();
        let next = BOOKING_POLICY.decide(booking_id, &booking.review, &subject, reviewer, &decision, self.now())?;

        let event = Event::BookingReviewed {
            id: booking_id,
            resource_id: guard.resource.id,
            review: next,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let booking = guard.get(&booking_id).cloned().ok_or(EngineError::NotFound(booking_id))?;
        let resource_name = guard.resource.name.clone();
        drop(guard);

        let to = booking.status();
        info!(booking = %booking_id, reviewer = %reviewer.id, %to, "booking reviewed");
        metrics::counter!(TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);

        let mut effects = Effects::default();
        let (action, message_type, title, body) = match &decision {
            Decision::Approve => (
                "BOOKING_APPROVED",
                MessageType::BookingApproved,
                "Booking Approved",
                format!(
                    "Your booking for {resource_name} on {} {}-{} has been approved.",
                    booking.booking_date, booking.start_time, booking.end_time
                ),
            ),
            Decision::Reject { .. } => (
                "BOOKING_REJECTED",
                MessageType::BookingRejected,
                "Booking Rejected",
                format!(
                    "Your booking for {resource_name} on {} was rejected. Reason: {}",
                    booking.booking_date,
                    booking.review.rejection_reason.as_deref().unwrap_or_default()
                ),
            ),
        };
        effects.audit(
            AuditEntry::new(Some(reviewer.id), action, "booking", booking_id)
                .previous(json!({ "status": previous }))
                .new_state(json!({ "status": to })),
        );
        effects.notify(
            Notification::new(Recipient::User(booking.user_id), message_type, title, body).about("booking", booking_id),
        );
        drop(gate);
        self.dispatch(effects).await;

        Ok(booking)
    }

    /// Withdraw a pending or approved booking. Allowed for the owner or an
    /// admin; frees the slot's capacity immediately.
    pub async fn cancel_booking(&self, actor: &Actor, booking_id: BookingId, reason: &str) -> Result<Booking, EngineError> {
        let gate = self.gate.read().await;
        let mut guard = self.resolve_booking_write(&booking_id).await?;
        let booking = guard.get(&booking_id).ok_or(EngineError::NotFound(booking_id))?;
        let permitted = booking.user_id == actor.id || actor.is_admin();
        let previous = booking.status();
        let next = review::cancel(&booking.review, permitted, actor, reason, self.now())?;

        let event = Event::BookingReviewed {
            id: booking_id,
            resource_id: guard.resource.id,
            review: next,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let booking = guard.get(&booking_id).cloned().ok_or(EngineError::NotFound(booking_id))?;
        let resource_name = guard.resource.name.clone();
        drop(guard);

        info!(booking = %booking_id, actor = %actor.id, "booking cancelled");
        metrics::counter!(TRANSITIONS_TOTAL, "to" => ReviewStatus::Cancelled.as_str()).increment(1);

        let reason = booking.review.cancellation_reason.clone().unwrap_or_default();
        let mut effects = Effects::default();
        effects.audit(
            AuditEntry::new(Some(actor.id), "BOOKING_CANCELLED", "booking", booking_id)
                .previous(json!({ "status": previous }))
                .new_state(json!({ "status": ReviewStatus::Cancelled }))
                .metadata(json!({ "reason": reason })),
        );
        effects.notify(
            Notification::new(
                Recipient::User(booking.user_id),
                MessageType::BookingCancelled,
                "Booking Cancelled",
                format!(
                    "Booking for {resource_name} on {} cancelled. Reason: {reason}",
                    booking.booking_date
                ),
            )
            .about("booking", booking_id),
        );
        drop(gate);
        self.dispatch(effects).await;

        Ok(booking)
    }
}
