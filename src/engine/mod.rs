mod admin;
mod admission;
mod availability;
mod error;
mod ledger;
mod queries;
mod requests;
mod transitions;

pub use availability::{Availability, Slots};
pub use error::{EngineError, ErrorKind};
pub use ledger::{ResourceState, SharedResourceState};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::audit::{AuditEntry, AuditSink};
use crate::config::EngineConfig;
use crate::journal::{Journal, JournalWriter};
use crate::model::*;
use crate::notify::{Notification, NotificationSink};
use crate::observability::{RESOURCES_LOADED, SIDE_EFFECT_FAILURES_TOTAL};

/// Collaborators the engine hands side effects to.
#[derive(Clone)]
pub struct Sinks {
    pub notifications: Arc<dyn NotificationSink>,
    pub audit: Arc<dyn AuditSink>,
}

/// Side effects gathered while a lock is held, dispatched once it is released.
#[derive(Default)]
pub(super) struct Effects {
    notifications: Vec<Notification>,
    audit: Vec<AuditEntry>,
}

impl Effects {
    pub(super) fn notify(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    pub(super) fn audit(&mut self, entry: AuditEntry) {
        self.audit.push(entry);
    }
}

pub(super) type SharedRequest = Arc<Mutex<ReviewRequest>>;

pub struct Engine {
    pub(super) resources: DashMap<ResourceId, SharedResourceState>,
    /// Reverse lookup: booking id → resource id.
    pub(super) booking_index: DashMap<BookingId, ResourceId>,
    /// Global, date-keyed. Lock order: resource before overrides.
    pub(super) overrides: RwLock<BTreeMap<NaiveDate, CalendarOverride>>,
    pub(super) requests: DashMap<RequestId, SharedRequest>,
    /// Held shared by mutations, exclusively by compaction.
    pub(super) gate: RwLock<()>,
    journal: JournalWriter,
    sinks: Sinks,
    pub(super) config: EngineConfig,
}

/// Apply a resource-scoped event (no locking, caller holds the lock).
fn apply_to_resource(rs: &mut ResourceState, event: &Event, booking_index: &DashMap<BookingId, ResourceId>) {
    match event {
        Event::ResourceUpdated { resource } => rs.resource = resource.clone(),
        Event::ScheduleReplaced { schedule, .. } => rs.schedule = schedule.clone(),
        Event::BookingAdmitted { booking } => {
            booking_index.insert(booking.id, booking.resource_id);
            rs.insert(booking.clone());
        }
        Event::BookingReviewed { id, review, .. } => {
            rs.set_review(id, review.clone());
        }
        Event::ResourceDeleted { resource, cancelled } => {
            for (id, review) in cancelled {
                rs.set_review(id, review.clone());
            }
            rs.resource = resource.clone();
        }
        // Engine-level events are handled by the caller.
        Event::ResourceCreated { .. }
        | Event::OverrideAdded { .. }
        | Event::OverrideRemoved { .. }
        | Event::RequestFiled { .. }
        | Event::RequestReviewed { .. } => {}
    }
}

fn apply_request_review(request: &mut ReviewRequest, event: &Event) {
    if let Event::RequestReviewed { review, created, .. } = event {
        request.review = review.clone();
        request.created_resource = created.as_ref().map(|(r, _)| r.id);
    }
}

pub(super) fn snapshot<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

impl Engine {
    /// Open the journal under `config.data_dir`, replay it, and start the
    /// group-commit writer. Must be called inside a Tokio runtime.
    pub fn open(config: EngineConfig, sinks: Sinks) -> Result<Self, EngineError> {
        std::fs::create_dir_all(&config.data_dir)?;
        let path = config.journal_path();
        let events = Journal::replay(&path)?;
        let mut journal = Journal::open(&path)?;
        // Rewrite the intact prefix so appends never land behind a torn tail.
        if !events.is_empty() {
            journal.compact(&events)?;
        }
        let journal = JournalWriter::spawn(journal);

        let booking_index = DashMap::new();
        let mut states: HashMap<ResourceId, ResourceState> = HashMap::new();
        let mut overrides = BTreeMap::new();
        let mut requests: HashMap<RequestId, ReviewRequest> = HashMap::new();

        for event in &events {
            match event {
                Event::ResourceCreated { resource, schedule } => {
                    states.insert(resource.id, ResourceState::new(resource.clone(), schedule.clone()));
                }
                Event::OverrideAdded { calendar_override } => {
                    overrides.insert(calendar_override.date, calendar_override.clone());
                }
                Event::OverrideRemoved { date } => {
                    overrides.remove(date);
                }
                Event::RequestFiled { request } => {
                    requests.insert(request.id, request.clone());
                }
                Event::RequestReviewed { id, created, .. } => {
                    if let Some(request) = requests.get_mut(id) {
                        apply_request_review(request, event);
                    }
                    if let Some((resource, schedule)) = created {
                        states.insert(resource.id, ResourceState::new(resource.clone(), schedule.clone()));
                    }
                }
                other => {
                    if let Some(resource_id) = other.resource_id()
                        && let Some(rs) = states.get_mut(&resource_id)
                    {
                        apply_to_resource(rs, other, &booking_index);
                    }
                }
            }
        }

        info!(
            events = events.len(),
            resources = states.len(),
            bookings = booking_index.len(),
            requests = requests.len(),
            "journal replayed from {}",
            path.display()
        );
        metrics::gauge!(RESOURCES_LOADED).set(states.len() as f64);

        Ok(Self {
            resources: states
                .into_iter()
                .map(|(id, rs)| (id, Arc::new(RwLock::new(rs))))
                .collect(),
            booking_index,
            overrides: RwLock::new(overrides),
            requests: requests
                .into_iter()
                .map(|(id, r)| (id, Arc::new(Mutex::new(r))))
                .collect(),
            gate: RwLock::new(()),
            journal,
            sinks,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(super) fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Bookings dated before this are in the past.
    pub(super) fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }

    pub(super) fn get_resource(&self, id: &ResourceId) -> Option<SharedResourceState> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    pub(super) fn get_request(&self, id: &RequestId) -> Option<SharedRequest> {
        self.requests.get(id).map(|e| e.value().clone())
    }

    pub(super) async fn journal_append(&self, event: &Event) -> Result<(), EngineError> {
        self.journal
            .append(event)
            .await
            .map_err(|e| EngineError::JournalError(e.to_string()))
    }

    /// Journal-append then apply. Nothing changes if the append fails.
    pub(super) async fn persist_and_apply(&self, rs: &mut ResourceState, event: &Event) -> Result<(), EngineError> {
        self.journal_append(event).await?;
        apply_to_resource(rs, event, &self.booking_index);
        Ok(())
    }

    pub(super) async fn persist_request(&self, request: &mut ReviewRequest, event: &Event) -> Result<(), EngineError> {
        self.journal_append(event).await?;
        apply_request_review(request, event);
        if let Event::RequestReviewed {
            created: Some((resource, schedule)),
            ..
        } = event
        {
            self.insert_resource(resource.clone(), schedule.clone());
        }
        Ok(())
    }

    pub(super) fn insert_resource(&self, resource: Resource, schedule: WeeklySchedule) {
        self.resources
            .insert(resource.id, Arc::new(RwLock::new(ResourceState::new(resource, schedule))));
        metrics::gauge!(RESOURCES_LOADED).set(self.resources.len() as f64);
    }

    /// Hand collected side effects to the sinks. Failures are logged and
    /// counted, never returned.
    pub(super) async fn dispatch(&self, effects: Effects) {
        for notification in effects.notifications {
            let message_type = notification.message_type;
            if let Err(e) = self.sinks.notifications.notify(notification).await {
                warn!(?message_type, "notification dropped: {e}");
                metrics::counter!(SIDE_EFFECT_FAILURES_TOTAL, "sink" => "notification").increment(1);
            }
        }
        for entry in effects.audit {
            let action = entry.action;
            if let Err(e) = self.sinks.audit.record(entry).await {
                warn!(action, "audit entry dropped: {e}");
                metrics::counter!(SIDE_EFFECT_FAILURES_TOTAL, "sink" => "audit").increment(1);
            }
        }
    }

    // ── Journal maintenance ──────────────────────────────────

    /// Rewrite the journal as the minimal event sequence for current state.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let _exclusive = self.gate.write().await;
        let mut events = Vec::new();

        let mut resource_ids: Vec<ResourceId> = self.resources.iter().map(|e| *e.key()).collect();
        resource_ids.sort();
        for id in resource_ids {
            let Some(rs) = self.get_resource(&id) else { continue };
            let guard = rs.read().await;
            events.push(Event::ResourceCreated {
                resource: guard.resource.clone(),
                schedule: guard.schedule.clone(),
            });
            let mut bookings: Vec<&Booking> = guard.bookings().collect();
            bookings.sort_by_key(|b| b.id);
            for booking in bookings {
                events.push(Event::BookingAdmitted {
                    booking: booking.clone(),
                });
            }
        }

        for calendar_override in self.overrides.read().await.values() {
            events.push(Event::OverrideAdded {
                calendar_override: calendar_override.clone(),
            });
        }

        let mut request_ids: Vec<RequestId> = self.requests.iter().map(|e| *e.key()).collect();
        request_ids.sort();
        for id in request_ids {
            if let Some(request) = self.get_request(&id) {
                events.push(Event::RequestFiled {
                    request: request.lock().await.clone(),
                });
            }
        }

        let count = events.len();
        self.journal
            .compact(events)
            .await
            .map_err(|e| EngineError::JournalError(e.to_string()))?;
        info!(events = count, "journal compacted");
        Ok(())
    }

    /// Compact once the configured number of appends has accumulated.
    /// Returns whether compaction ran.
    pub async fn compact_if_needed(&self) -> Result<bool, EngineError> {
        if self.journal.appends_since_compact().await < self.config.compact_threshold {
            return Ok(false);
        }
        self.compact_journal().await?;
        Ok(true)
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        self.journal.appends_since_compact().await
    }

    #[cfg(test)]
    pub(super) async fn fail_next_journal_appends(&self, count: u32) {
        self.journal.fail_next_appends(count).await;
    }
}
