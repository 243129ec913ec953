use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tokio::sync::RwLock;

use crate::model::*;
use crate::review::ReviewRecord;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

/// One resource with its schedule and booking ledger. Everything a capacity
/// decision reads lives behind the same lock.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub resource: Resource,
    pub schedule: WeeklySchedule,
    bookings: HashMap<BookingId, Booking>,
    /// (date, start) → bookings in that slot, any status.
    slots: BTreeMap<(NaiveDate, NaiveTime), Vec<BookingId>>,
}

impl ResourceState {
    pub fn new(resource: Resource, schedule: WeeklySchedule) -> Self {
        Self {
            resource,
            schedule,
            bookings: HashMap::new(),
            slots: BTreeMap::new(),
        }
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    pub fn get(&self, id: &BookingId) -> Option<&Booking> {
        self.bookings.get(id)
    }

    pub fn bookings(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.values()
    }

    /// Units held by pending and approved bookings for one exact slot.
    pub fn sum_active_quantity(&self, date: NaiveDate, start: NaiveTime) -> u32 {
        self.slots
            .get(&(date, start))
            .into_iter()
            .flatten()
            .filter_map(|id| self.bookings.get(id))
            .filter(|b| b.is_active())
            .map(|b| b.quantity_requested)
            .sum()
    }

    /// Active units per start time on `date`. Slots with nothing active are absent.
    pub fn booked_on(&self, date: NaiveDate) -> BTreeMap<NaiveTime, u32> {
        let lo = (date, NaiveTime::MIN);
        let mut out = BTreeMap::new();
        for ((d, start), ids) in self.slots.range(lo..) {
            if *d != date {
                break;
            }
            let qty: u32 = ids
                .iter()
                .filter_map(|id| self.bookings.get(id))
                .filter(|b| b.is_active())
                .map(|b| b.quantity_requested)
                .sum();
            if qty > 0 {
                out.insert(*start, qty);
            }
        }
        out
    }

    /// Active bookings dated `from` or later, in slot order.
    pub fn active_from(&self, from: NaiveDate) -> Vec<&Booking> {
        self.slots
            .range((from, NaiveTime::MIN)..)
            .flat_map(|(_, ids)| ids.iter())
            .filter_map(|id| self.bookings.get(id))
            .filter(|b| b.is_active())
            .collect()
    }

    pub fn insert(&mut self, booking: Booking) {
        self.slots
            .entry((booking.booking_date, booking.start_time))
            .or_default()
            .push(booking.id);
        self.bookings.insert(booking.id, booking);
    }

    /// Replace a booking's review record. Returns false if the id is unknown.
    pub fn set_review(&mut self, id: &BookingId, review: ReviewRecord) -> bool {
        match self.bookings.get_mut(id) {
            Some(b) => {
                b.review = review;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::ReviewStatus;
    use chrono::Utc;
    use ulid::Ulid;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 3, day).unwrap()
    }

    fn t(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn state() -> ResourceState {
        let resource = Resource {
            id: Ulid::new(),
            name: "Lab 1".into(),
            kind: ResourceKind::Lab,
            capacity: 30,
            total_quantity: 5,
            location: None,
            description: None,
            status: ResourceStatus::Available,
            approval_type: ApprovalType::AutoApprove,
            managed_by: Ulid::new(),
            created_at: Utc::now(),
            deleted_at: None,
        };
        ResourceState::new(resource, WeeklySchedule::partial(vec![]))
    }

    fn booking(rs: &ResourceState, date: NaiveDate, hour: u32, qty: u32) -> Booking {
        Booking {
            id: Ulid::new(),
            user_id: Ulid::new(),
            resource_id: rs.resource.id,
            booking_date: date,
            start_time: t(hour),
            end_time: t(hour + 1),
            quantity_requested: qty,
            is_special_request: false,
            special_request_reason: None,
            approval_type: rs.resource.approval_type,
            review: ReviewRecord::pending(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn sum_counts_only_active_in_exact_slot() {
        let mut rs = state();
        let a = booking(&rs, d(4), 9, 2);
        let b = booking(&rs, d(4), 9, 1);
        let other_hour = booking(&rs, d(4), 10, 3);
        let other_day = booking(&rs, d(5), 9, 4);
        let b_id = b.id;
        for x in [a, b, other_hour, other_day] {
            rs.insert(x);
        }
        assert_eq!(rs.sum_active_quantity(d(4), t(9)), 3);

        let mut cancelled = ReviewRecord::pending();
        cancelled.status = ReviewStatus::Cancelled;
        assert!(rs.set_review(&b_id, cancelled));
        assert_eq!(rs.sum_active_quantity(d(4), t(9)), 2);
        assert_eq!(rs.sum_active_quantity(d(4), t(11)), 0);
    }

    #[test]
    fn booked_on_groups_by_start_for_one_day() {
        let mut rs = state();
        for (day, hour, qty) in [(3, 9, 1), (4, 9, 2), (4, 9, 1), (4, 13, 1), (5, 8, 5)] {
            let b = booking(&rs, d(day), hour, qty);
            rs.insert(b);
        }
        let booked = rs.booked_on(d(4));
        assert_eq!(booked.len(), 2);
        assert_eq!(booked[&t(9)], 3);
        assert_eq!(booked[&t(13)], 1);
    }

    #[test]
    fn active_from_skips_past_and_inactive() {
        let mut rs = state();
        let past = booking(&rs, d(1), 9, 1);
        let future = booking(&rs, d(10), 9, 1);
        let mut rejected = booking(&rs, d(11), 9, 1);
        rejected.review.status = ReviewStatus::Rejected;
        let future_id = future.id;
        for x in [past, future, rejected] {
            rs.insert(x);
        }
        let ids: Vec<_> = rs.active_from(d(4)).iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![future_id]);
    }

    #[test]
    fn set_review_unknown_id() {
        let mut rs = state();
        assert!(!rs.set_review(&Ulid::new(), ReviewRecord::pending()));
    }
}
