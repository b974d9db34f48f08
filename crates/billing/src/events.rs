//! Billing event log
//!
//! Append-only record of completed billing transitions. Writers treat the log
//! as fire-and-forget: a failed write is logged and never undoes the
//! transition it describes.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingEventType {
    PlanUpgraded,
}

impl BillingEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingEventType::PlanUpgraded => "plan_upgraded",
        }
    }
}

impl std::fmt::Display for BillingEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    User,
    System,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::User => "user",
            ActorType::System => "system",
        }
    }
}

/// A single event ready to be written
#[derive(Debug, Clone, Serialize)]
pub struct BillingEvent {
    pub id: Uuid,
    pub org_id: Uuid,
    pub event_type: BillingEventType,
    pub data: serde_json::Value,
    pub actor_id: Option<Uuid>,
    pub actor_type: ActorType,
    pub created_at: OffsetDateTime,
}

pub struct BillingEventBuilder {
    org_id: Uuid,
    event_type: BillingEventType,
    data: serde_json::Value,
    actor_id: Option<Uuid>,
    actor_type: ActorType,
}

impl BillingEventBuilder {
    pub fn new(org_id: Uuid, event_type: BillingEventType) -> Self {
        Self {
            org_id,
            event_type,
            data: serde_json::Value::Null,
            actor_id: None,
            actor_type: ActorType::System,
        }
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Attribute the event to a user if one is known, else to the system
    pub fn actor_opt(mut self, actor_id: Option<Uuid>, actor_type: ActorType) -> Self {
        match actor_id {
            Some(id) => {
                self.actor_id = Some(id);
                self.actor_type = actor_type;
            }
            None => {
                self.actor_id = None;
                self.actor_type = ActorType::System;
            }
        }
        self
    }

    pub fn build(self) -> BillingEvent {
        BillingEvent {
            id: Uuid::new_v4(),
            org_id: self.org_id,
            event_type: self.event_type,
            data: self.data,
            actor_id: self.actor_id,
            actor_type: self.actor_type,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

#[async_trait]
pub trait BillingEventSink: Send + Sync {
    async fn log_event(&self, event: BillingEventBuilder) -> BillingResult<Uuid>;
}

/// Writes events to the `billing_events` table
#[derive(Clone)]
pub struct BillingEventLogger {
    pool: PgPool,
}

impl BillingEventLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingEventSink for BillingEventLogger {
    async fn log_event(&self, event: BillingEventBuilder) -> BillingResult<Uuid> {
        let event = event.build();

        sqlx::query(
            r#"
            INSERT INTO billing_events
                (id, org_id, event_type, event_data, actor_id, actor_type, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id)
        .bind(event.org_id)
        .bind(event.event_type.as_str())
        .bind(&event.data)
        .bind(event.actor_id)
        .bind(event.actor_type.as_str())
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        tracing::debug!(
            event_id = %event.id,
            org_id = %event.org_id,
            event_type = %event.event_type,
            "Logged billing event"
        );

        Ok(event.id)
    }
}
