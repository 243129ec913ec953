use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;
use tracing::info;
use ulid::Ulid;

use crate::audit::AuditEntry;
use crate::limits::*;
use crate::model::*;
use crate::notify::{MessageType, Notification, Recipient};
use crate::observability::TRANSITIONS_TOTAL;
use crate::review::{
    Decision, RESOURCE_ADDITION_POLICY, REGISTRATION_POLICY, ROLE_CHANGE_POLICY, ReviewRecord, ReviewStatus,
};

use super::admin::{build_resource, validate_resource_fields};
use super::{snapshot, Effects, Engine, EngineError};

/// Faculty review student matters; everything else goes to admins.
fn reviewers_for(role: Role) -> Recipient {
    if role == Role::Student {
        Recipient::Role(Role::Faculty)
    } else {
        Recipient::Role(Role::Admin)
    }
}

impl Engine {
    async fn file(&self, requested_by: UserId, kind: RequestKind) -> Result<ReviewRequest, EngineError> {
        if self.requests.len() >= MAX_REQUESTS {
            return Err(EngineError::LimitExceeded("too many requests"));
        }
        let request = ReviewRequest {
            id: Ulid::new(),
            requested_by,
            kind,
            review: ReviewRecord::pending(),
            created_resource: None,
            created_at: self.now(),
        };
        self.journal_append(&Event::RequestFiled {
            request: request.clone(),
        })
        .await?;
        self.requests.insert(request.id, Arc::new(Mutex::new(request.clone())));
        info!(request = %request.id, kind = request.kind.entity_type(), "request filed");
        Ok(request)
    }

    /// Queue a newly registered user for approval. Self-service, so there is
    /// no acting user.
    pub async fn file_registration(&self, user_id: UserId, role: Role) -> Result<ReviewRequest, EngineError> {
        if role == Role::Admin {
            return Err(EngineError::InvalidInput("cannot register as admin".into()));
        }
        let gate = self.gate.read().await;
        let request = self.file(user_id, RequestKind::Registration { role }).await?;

        let mut effects = Effects::default();
        effects.audit(
            AuditEntry::new(None, "USER_REGISTERED", "user", user_id).new_state(json!({ "role": role })),
        );
        effects.notify(
            Notification::new(
                reviewers_for(role),
                MessageType::RegistrationRequested,
                "New User Registration",
                format!("A new {role} registration requires approval."),
            )
            .about("user", user_id),
        );
        drop(gate);
        self.dispatch(effects).await;
        Ok(request)
    }

    pub async fn request_role_change(&self, user: &Actor, requested_role: Role) -> Result<ReviewRequest, EngineError> {
        if user.is_admin() {
            return Err(EngineError::NotAuthorized("admins cannot request role changes"));
        }
        if requested_role == Role::Admin {
            return Err(EngineError::InvalidInput("admin role cannot be requested".into()));
        }
        if requested_role == user.role {
            return Err(EngineError::InvalidInput(
                "requested role cannot be the same as current role".into(),
            ));
        }
        let gate = self.gate.read().await;
        let request = self
            .file(
                user.id,
                RequestKind::RoleChange {
                    current_role: user.role,
                    requested_role,
                },
            )
            .await?;

        let mut effects = Effects::default();
        effects.audit(
            AuditEntry::new(Some(user.id), "ROLE_CHANGE_REQUESTED", "role_change_request", request.id)
                .new_state(json!({ "current_role": user.role, "requested_role": requested_role })),
        );
        effects.notify(
            Notification::new(
                reviewers_for(requested_role),
                MessageType::RoleChangeRequested,
                "Role Change Request",
                format!("A {} requests a change to {requested_role}.", user.role),
            )
            .about("role_change_request", request.id),
        );
        drop(gate);
        self.dispatch(effects).await;
        Ok(request)
    }

    /// Staff propose a new resource; an admin decides.
    pub async fn request_resource_addition(
        &self,
        user: &Actor,
        mut proposal: ResourceProposal,
    ) -> Result<ReviewRequest, EngineError> {
        if user.role != Role::Staff {
            return Err(EngineError::NotAuthorized("staff access required"));
        }
        validate_resource_fields(
            &proposal.name,
            proposal.total_quantity,
            proposal.location.as_deref(),
            proposal.description.as_deref(),
        )?;
        proposal.justification = proposal.justification.trim().to_string();
        if proposal.justification.is_empty() {
            return Err(EngineError::ReasonRequired("justification"));
        }
        if proposal.justification.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("justification too long"));
        }
        let gate = self.gate.read().await;
        let request = self.file(user.id, RequestKind::ResourceAddition { proposal }).await?;

        let mut effects = Effects::default();
        effects.audit(
            AuditEntry::new(Some(user.id), "RESOURCE_REQUEST_CREATED", "resource_request", request.id)
                .new_state(snapshot(&request)),
        );
        drop(gate);
        self.dispatch(effects).await;
        Ok(request)
    }

    /// Approve or reject any pending request. An approved resource addition
    /// creates the resource in the same journal record.
    pub async fn decide_request(
        &self,
        reviewer: &Actor,
        request_id: RequestId,
        decision: Decision,
    ) -> Result<ReviewRequest, EngineError> {
        let gate = self.gate.read().await;
        let shared = self
            .get_request(&request_id)
            .ok_or(EngineError::NotFound(request_id))?;
        let mut request = shared.lock().await;
        let now = self.now();

        let (review, created) = match &request.kind {
            RequestKind::Registration { role } => (
                REGISTRATION_POLICY.decide(request_id, &request.review, role, reviewer, &decision, now)?,
                None,
            ),
            RequestKind::RoleChange { requested_role, .. } => (
                ROLE_CHANGE_POLICY.decide(request_id, &request.review, requested_role, reviewer, &decision, now)?,
                None,
            ),
            RequestKind::ResourceAddition { proposal } => {
                let review =
                    RESOURCE_ADDITION_POLICY.decide(request_id, &request.review, proposal, reviewer, &decision, now)?;
                let created = if review.status == ReviewStatus::Approved {
                    if self.resources.len() >= MAX_RESOURCES {
                        return Err(EngineError::LimitExceeded("too many resources"));
                    }
                    let resource = build_resource(
                        NewResource {
                            name: proposal.name.clone(),
                            kind: proposal.kind,
                            capacity: proposal.capacity,
                            total_quantity: proposal.total_quantity,
                            location: proposal.location.clone(),
                            description: proposal.description.clone(),
                            approval_type: proposal.approval_type,
                            managed_by: request.requested_by,
                        },
                        now,
                    );
                    Some((resource, self.config.default_schedule.seed()))
                } else {
                    None
                };
                (review, created)
            }
        };

        let event = Event::RequestReviewed {
            id: request_id,
            review,
            created,
        };
        self.persist_request(&mut request, &event).await?;
        let decided = request.clone();
        drop(request);

        let to = decided.status();
        info!(request = %request_id, reviewer = %reviewer.id, %to, "request decided");
        metrics::counter!(TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);

        let mut effects = Effects::default();
        self.request_decision_effects(&mut effects, reviewer, &decided);
        drop(gate);
        self.dispatch(effects).await;
        Ok(decided)
    }

    fn request_decision_effects(&self, effects: &mut Effects, reviewer: &Actor, request: &ReviewRequest) {
        let approved = request.status() == ReviewStatus::Approved;
        let reason = request.review.rejection_reason.as_deref().unwrap_or_default();
        let requester = Recipient::User(request.requested_by);

        match &request.kind {
            RequestKind::Registration { .. } => {
                let (action, message_type, title, body) = if approved {
                    (
                        "REGISTRATION_APPROVED",
                        MessageType::RegistrationApproved,
                        "Registration Approved",
                        "Your registration has been approved. You can now access the system.".to_string(),
                    )
                } else {
                    (
                        "REGISTRATION_REJECTED",
                        MessageType::RegistrationRejected,
                        "Registration Rejected",
                        format!("Your registration was rejected. Reason: {reason}"),
                    )
                };
                effects.audit(
                    AuditEntry::new(Some(reviewer.id), action, "user", request.requested_by)
                        .metadata(json!({ "request_id": request.id.to_string() })),
                );
                effects.notify(Notification::new(requester, message_type, title, body).about("user", request.requested_by));
            }
            RequestKind::RoleChange {
                current_role,
                requested_role,
            } => {
                if approved {
                    effects.audit(
                        AuditEntry::new(Some(reviewer.id), "ROLE_CHANGE_APPROVED", "user", request.requested_by)
                            .previous(json!({ "role": current_role }))
                            .new_state(json!({ "role": requested_role }))
                            .metadata(json!({ "request_id": request.id.to_string() })),
                    );
                    effects.notify(
                        Notification::new(
                            requester,
                            MessageType::RoleChangeApproved,
                            "Role Change Approved",
                            format!("Your role has been changed to {requested_role}."),
                        )
                        .about("role_change_request", request.id),
                    );
                } else {
                    effects.audit(AuditEntry::new(
                        Some(reviewer.id),
                        "ROLE_CHANGE_REJECTED",
                        "role_change_request",
                        request.id,
                    ));
                    effects.notify(
                        Notification::new(
                            requester,
                            MessageType::RoleChangeRejected,
                            "Role Change Rejected",
                            format!("Your role change request to {requested_role} was rejected. Reason: {reason}"),
                        )
                        .about("role_change_request", request.id),
                    );
                }
            }
            RequestKind::ResourceAddition { proposal } => {
                if approved {
                    let mut entry =
                        AuditEntry::new(Some(reviewer.id), "RESOURCE_REQUEST_APPROVED", "resource_request", request.id);
                    if let Some(created) = request.created_resource {
                        entry = entry.metadata(json!({ "created_resource_id": created.to_string() }));
                    }
                    effects.audit(entry);
                    effects.notify(
                        Notification::new(
                            requester,
                            MessageType::ResourceRequestApproved,
                            "Resource Request Approved",
                            format!("Your request to add resource '{}' has been approved.", proposal.name),
                        )
                        .about("resource_request", request.id),
                    );
                } else {
                    effects.audit(AuditEntry::new(
                        Some(reviewer.id),
                        "RESOURCE_REQUEST_REJECTED",
                        "resource_request",
                        request.id,
                    ));
                    effects.notify(
                        Notification::new(
                            requester,
                            MessageType::ResourceRequestRejected,
                            "Resource Request Rejected",
                            format!(
                                "Your request to add resource '{}' was rejected. Reason: {reason}",
                                proposal.name
                            ),
                        )
                        .about("resource_request", request.id),
                    );
                }
            }
        }
    }
}
