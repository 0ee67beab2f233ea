use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::GeoPoint;

/// Coarse order status, a projection of [`OrderPhase`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    InProgress,
    Delivered,
    Cancelled,
}

/// Fine-grained position of an order in its fulfillment pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OrderPhase {
    Pending,
    Accepted,
    Preparing,
    ReadyForPickup,
    AssignedDriver,
    DriverAccepted,
    PickedUp,
    Delivering,
    Delivered,
    Rejected,
    Cancelled,
}

impl OrderPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderPhase::Delivered | OrderPhase::Rejected | OrderPhase::Cancelled
        )
    }

    pub fn coarse(self) -> OrderStatus {
        match self {
            OrderPhase::Pending => OrderStatus::Pending,
            OrderPhase::Delivered => OrderStatus::Delivered,
            OrderPhase::Rejected | OrderPhase::Cancelled => OrderStatus::Cancelled,
            _ => OrderStatus::InProgress,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Fulfillment {
    Pickup,
    Delivery,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    pub name: String,
    pub quantity: u32,
    /// Unit price in cents, snapshotted at checkout.
    pub unit_price: i64,
    /// Line total in cents; authoritative, never recomputed from catalog state.
    pub line_total: i64,
    pub customizations: Vec<String>,
    pub special_instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub street: String,
    pub city: String,
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: String,
    pub restaurant_id: String,
    pub driver_id: Option<String>,
    pub driver_name: Option<String>,
    pub items: Vec<OrderItem>,
    pub subtotal: i64,
    pub tip: i64,
    pub delivery_fee: i64,
    pub total: i64,
    pub fulfillment: Fulfillment,
    pub payment_method: String,
    pub address: Option<DeliveryAddress>,
    pub status: OrderStatus,
    pub phase: OrderPhase,
    pub accepted_at: Option<DateTime<Utc>>,
    pub ready_at: Option<DateTime<Utc>>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub driver_accepted_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivering_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Checkout payload: everything an order needs except lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDraft {
    pub customer_id: String,
    pub restaurant_id: String,
    pub items: Vec<OrderItem>,
    pub subtotal: i64,
    pub tip: i64,
    pub delivery_fee: i64,
    pub total: i64,
    pub fulfillment: Fulfillment,
    pub payment_method: String,
    pub address: Option<DeliveryAddress>,
}

impl Order {
    pub fn from_draft(draft: OrderDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id: draft.customer_id,
            restaurant_id: draft.restaurant_id,
            driver_id: None,
            driver_name: None,
            items: draft.items,
            subtotal: draft.subtotal,
            tip: draft.tip,
            delivery_fee: draft.delivery_fee,
            total: draft.total,
            fulfillment: draft.fulfillment,
            payment_method: draft.payment_method,
            address: draft.address,
            status: OrderStatus::Pending,
            phase: OrderPhase::Pending,
            accepted_at: None,
            ready_at: None,
            assigned_at: None,
            driver_accepted_at: None,
            picked_up_at: None,
            delivering_at: None,
            delivered_at: None,
            rejected_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Records the timestamp for the phase being entered.
    pub fn stamp_phase(&mut self, phase: OrderPhase, now: DateTime<Utc>) {
        match phase {
            OrderPhase::Accepted => self.accepted_at = Some(now),
            OrderPhase::ReadyForPickup => self.ready_at = Some(now),
            OrderPhase::AssignedDriver => self.assigned_at = Some(now),
            OrderPhase::DriverAccepted => self.driver_accepted_at = Some(now),
            OrderPhase::PickedUp => self.picked_up_at = Some(now),
            OrderPhase::Delivering => self.delivering_at = Some(now),
            OrderPhase::Delivered => self.delivered_at = Some(now),
            OrderPhase::Rejected => self.rejected_at = Some(now),
            OrderPhase::Cancelled => self.cancelled_at = Some(now),
            OrderPhase::Pending | OrderPhase::Preparing => {}
        }
    }
}

/// An order placed for the future; converted 1:1 into an [`Order`] at
/// activation and then deleted, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledOrder {
    pub id: Uuid,
    pub scheduled_for: DateTime<Utc>,
    pub draft: OrderDraft,
    pub created_at: DateTime<Utc>,
}
