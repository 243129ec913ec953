use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime, TimeDelta};

use crate::calendar::{self, DayHours};
use crate::model::*;

use super::{Engine, EngineError, ResourceState};

/// Hourly slot grid for one resource on one date.
///
/// Holds the resolved hours and a per-slot booked tally taken under the
/// resource's read lock. [`Availability::slots`] walks the grid lazily and
/// can be called any number of times with identical results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub resource_id: ResourceId,
    pub date: NaiveDate,
    pub is_working_day: bool,
    pub total_quantity: u32,
    hours: DayHours,
    booked: BTreeMap<NaiveTime, u32>,
}

impl Availability {
    pub fn compute(
        rs: &ResourceState,
        calendar_override: Option<&CalendarOverride>,
        date: NaiveDate,
        fallback: DayHours,
    ) -> Self {
        let day = calendar::resolve(&rs.schedule, calendar_override, date, fallback);
        let (hours, booked) = if day.is_working {
            (day.hours(), rs.booked_on(date))
        } else {
            (fallback, BTreeMap::new())
        };
        Self {
            resource_id: rs.resource.id,
            date,
            is_working_day: day.is_working,
            total_quantity: rs.resource.total_quantity,
            hours,
            booked,
        }
    }

    pub fn hours(&self) -> DayHours {
        self.hours
    }

    pub fn slots(&self) -> Slots<'_> {
        Slots {
            availability: self,
            next: Some(self.hours.start),
        }
    }

    fn slot_at(&self, start: NaiveTime, end: NaiveTime) -> Slot {
        if !self.is_working_day {
            return Slot {
                start,
                end,
                total_quantity: self.total_quantity,
                booked_quantity: 0,
                available_quantity: 0,
                status: SlotStatus::NonWorking,
            };
        }
        let booked = self.booked.get(&start).copied().unwrap_or(0);
        let available = self.total_quantity.saturating_sub(booked);
        Slot {
            start,
            end,
            total_quantity: self.total_quantity,
            booked_quantity: booked,
            available_quantity: available,
            status: if available > 0 {
                SlotStatus::Available
            } else {
                SlotStatus::FullyBooked
            },
        }
    }
}

/// Iterator over whole-hour slots. A trailing partial hour is dropped.
pub struct Slots<'a> {
    availability: &'a Availability,
    next: Option<NaiveTime>,
}

impl Iterator for Slots<'_> {
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        let start = self.next?;
        let (end, wrapped) = start.overflowing_add_signed(TimeDelta::hours(1));
        if wrapped != 0 || end > self.availability.hours.end {
            self.next = None;
            return None;
        }
        self.next = Some(end);
        Some(self.availability.slot_at(start, end))
    }
}

impl Engine {
    /// Slot grid for `date`. Recomputed on every call.
    pub async fn availability(&self, resource_id: ResourceId, date: NaiveDate) -> Result<Availability, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        if guard.resource.is_deleted() {
            return Err(EngineError::NotFound(resource_id));
        }
        let overrides = self.overrides.read().await;
        Ok(Availability::compute(
            &guard,
            overrides.get(&date),
            date,
            self.config.default_schedule.hours(),
        ))
    }
}
