//! Push-event handler: persist the event, derive its enrichment jobs.
//!
//! Deliberately does not deduplicate the jobs it enqueues. Two deliveries of
//! the same event queue the same enrichment twice; the fetch guard and the
//! idempotent savers absorb the duplicate work, which is cheaper than
//! queue-side uniqueness.

use crate::actor::{ActorKind, classify, split_full_name};
use crate::error::Result;
use crate::github::EventData;
use crate::jobs::{Job, JobEnvelope, JobQueue};
use crate::models::PushEventRecord;
use crate::store::{EventStore, NewPushEvent};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct EventHandler {
    events: Arc<dyn EventStore>,
    queue: Arc<dyn JobQueue>,
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandler").finish()
    }
}

impl EventHandler {
    pub fn new(events: Arc<dyn EventStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { events, queue }
    }

    /// Store the event (idempotently) and enqueue enrichment: always the
    /// repository, plus the actor when it classifies as a user or an
    /// organization.
    pub async fn handle(&self, raw: &str) -> Result<PushEventRecord> {
        let data: EventData = serde_json::from_str(raw)?;

        let payload = data.payload.as_ref();
        let new_event = NewPushEvent {
            id: data.id.clone(),
            actor_id: data.actor.as_ref().and_then(|a| a.id),
            repository_id: payload
                .and_then(|p| p.repository_id)
                .or_else(|| data.repo.as_ref().and_then(|r| r.id)),
            push_id: payload.and_then(|p| p.push_id),
            git_ref: payload.and_then(|p| p.r#ref.clone()),
            head: payload.and_then(|p| p.head.clone()),
            before: payload.and_then(|p| p.before.clone()),
            raw: raw.to_string(),
        };

        let (record, created) = self.events.find_or_create(new_event).await?;
        if created {
            debug!(id = %record.id, "stored push event");
        } else {
            debug!(id = %record.id, "push event already stored, row unchanged");
        }

        self.enqueue_enrichment(&data).await?;
        Ok(record)
    }

    async fn enqueue_enrichment(&self, data: &EventData) -> Result<()> {
        match data.repo_full_name() {
            Some(full_name) => match split_full_name(full_name) {
                Some((owner, name)) => {
                    self.queue
                        .enqueue(JobEnvelope::new(Job::FetchRepo {
                            owner: owner.to_string(),
                            name: name.to_string(),
                        }))
                        .await?;
                }
                None => {
                    warn!(event = %data.id, full_name, "malformed repository name, skipping repository fetch");
                }
            },
            None => {
                warn!(event = %data.id, "event carries no repository name, skipping repository fetch");
            }
        }

        let kind = classify(data.actor_url());
        match kind {
            ActorKind::User => {
                if let Some(login) = data.actor_login() {
                    self.queue
                        .enqueue(JobEnvelope::new(Job::FetchUser {
                            login: login.to_string(),
                        }))
                        .await?;
                }
            }
            ActorKind::Organization => {
                if let Some(login) = data.actor_login() {
                    self.queue
                        .enqueue(JobEnvelope::new(Job::FetchOrg {
                            login: login.to_string(),
                        }))
                        .await?;
                }
            }
            ActorKind::Bot | ActorKind::Unknown | ActorKind::Absent => {
                info!(
                    event = %data.id,
                    actor_kind = ?kind,
                    actor = ?data.actor_login(),
                    "skipping actor enrichment"
                );
            }
        }

        Ok(())
    }
}
