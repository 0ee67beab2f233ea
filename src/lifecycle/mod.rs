pub mod table;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::driver::Driver;
use crate::models::order::{Order, OrderDraft, OrderPhase};
use crate::models::user::Actor;
use crate::notify::Dispatcher;
use crate::observability::metrics::Metrics;
use crate::store::{ns, StoreService};

/// Re-read budget when a conditional write loses a race and the
/// decision is replayed against the fresh phase.
const RECONCILE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct OrderEvent {
    pub order_id: Uuid,
    pub phase: OrderPhase,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Owns valid order transitions, their side effects and conflict
/// resolution between concurrently connected actors. All collaborators
/// are injected; the machine holds no global state of its own.
#[derive(Clone)]
pub struct LifecycleMachine {
    store: StoreService,
    dispatcher: Dispatcher,
    events_tx: broadcast::Sender<OrderEvent>,
    assign_tx: mpsc::Sender<Uuid>,
    metrics: Metrics,
}

impl LifecycleMachine {
    pub fn new(
        store: StoreService,
        dispatcher: Dispatcher,
        events_tx: broadcast::Sender<OrderEvent>,
        assign_tx: mpsc::Sender<Uuid>,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            dispatcher,
            events_tx,
            assign_tx,
            metrics,
        }
    }

    pub fn store(&self) -> &StoreService {
        &self.store
    }

    /// Accepts a checkout. The pricing fields are a snapshot: the total
    /// invariant is checked once here and never re-derived afterwards.
    pub async fn create_order(
        &self,
        draft: OrderDraft,
        payment_completed: bool,
    ) -> Result<Order, CoreError> {
        if !payment_completed {
            return Err(CoreError::BadRequest(
                "payment has not completed".to_string(),
            ));
        }
        if draft.items.is_empty() {
            return Err(CoreError::BadRequest("order has no items".to_string()));
        }
        let expected = draft.subtotal + draft.tip + draft.delivery_fee;
        if draft.total != expected {
            return Err(CoreError::TotalMismatch {
                expected,
                actual: draft.total,
            });
        }
        if draft.fulfillment == crate::models::order::Fulfillment::Delivery
            && draft.address.is_none()
        {
            return Err(CoreError::BadRequest(
                "delivery orders require an address".to_string(),
            ));
        }

        let order = Order::from_draft(draft, Utc::now());
        let id = order.id.to_string();
        self.store
            .put_if_version(ns::ORDERS, &id, &order, None)
            .await?;

        self.bump_phase_metric(OrderPhase::Pending);
        self.publish_event(&order, Actor::Customer);
        self.spawn_notify(order.id, order.restaurant_id.clone(), OrderPhase::Pending);

        info!(order_id = %order.id, customer_id = %order.customer_id, "order created");
        Ok(order)
    }

    /// Applies one transition on behalf of `actor`. Re-applying the
    /// current phase is a no-op success: no write, no notification.
    pub async fn transition(
        &self,
        order_id: Uuid,
        actor: Actor,
        target: OrderPhase,
    ) -> Result<Order, CoreError> {
        let id = order_id.to_string();
        let mut attempt = 0u32;

        let order = loop {
            let Some(found) = self.store.get::<Order>(ns::ORDERS, &id).await? else {
                return Err(CoreError::OrderNotFound(order_id));
            };
            let mut order = found.value;

            if order.phase == target {
                return Ok(order);
            }
            table::check(actor, order.phase, target)?;

            let now = Utc::now();
            order.phase = target;
            order.status = target.coarse();
            order.stamp_phase(target, now);
            order.updated_at = now;

            match self
                .store
                .put_if_version(ns::ORDERS, &id, &order, Some(found.version))
                .await
            {
                Ok(_) => break order,
                Err(CoreError::Conflict(_)) if attempt < RECONCILE_ATTEMPTS => {
                    attempt += 1;
                    continue;
                }
                Err(err) => return Err(err),
            }
        };

        self.bump_phase_metric(target);
        self.after_commit(&order, actor, target).await;

        info!(order_id = %order.id, ?actor, phase = ?target, "order transitioned");
        Ok(order)
    }

    /// Claims a `ReadyForPickup` order for `driver`. The conditional
    /// write guarantees at most one claimer wins; losers see `Conflict`.
    pub async fn assign_driver(&self, order_id: Uuid, driver: &Driver) -> Result<Order, CoreError> {
        let id = order_id.to_string();
        let Some(found) = self.store.get::<Order>(ns::ORDERS, &id).await? else {
            return Err(CoreError::OrderNotFound(order_id));
        };
        let mut order = found.value;

        if order.phase == OrderPhase::AssignedDriver
            && order.driver_id.as_deref() == Some(driver.id.as_str())
        {
            return Ok(order);
        }
        if order.phase != OrderPhase::ReadyForPickup || order.driver_id.is_some() {
            return Err(CoreError::Conflict(format!(
                "order {order_id} already claimed"
            )));
        }

        let now = Utc::now();
        order.phase = OrderPhase::AssignedDriver;
        order.status = OrderPhase::AssignedDriver.coarse();
        order.driver_id = Some(driver.id.clone());
        order.driver_name = Some(driver.name.clone());
        order.stamp_phase(OrderPhase::AssignedDriver, now);
        order.updated_at = now;

        self.store
            .put_if_version(ns::ORDERS, &id, &order, Some(found.version))
            .await?;

        self.bump_phase_metric(OrderPhase::AssignedDriver);
        self.publish_event(&order, Actor::Driver);
        self.spawn_notify(
            order.id,
            order.customer_id.clone(),
            OrderPhase::AssignedDriver,
        );

        info!(order_id = %order.id, driver_id = %driver.id, "driver assigned");
        Ok(order)
    }

    /// Driver rejection: revert the order first, in one conditional
    /// write; the driver record is only touched once the revert landed,
    /// so a failure half-way never leaves the order undeliverable.
    pub async fn reject_assignment(
        &self,
        order_id: Uuid,
        driver_id: &str,
    ) -> Result<Order, CoreError> {
        let id = order_id.to_string();
        let mut attempt = 0u32;

        let order = loop {
            let Some(found) = self.store.get::<Order>(ns::ORDERS, &id).await? else {
                return Err(CoreError::OrderNotFound(order_id));
            };
            let mut order = found.value;

            if order.driver_id.as_deref() != Some(driver_id) {
                return Err(CoreError::Conflict(format!(
                    "order {order_id} is not held by driver {driver_id}"
                )));
            }
            if !matches!(
                order.phase,
                OrderPhase::AssignedDriver | OrderPhase::DriverAccepted
            ) {
                return Err(CoreError::InvalidTransition {
                    from: order.phase,
                    to: OrderPhase::ReadyForPickup,
                });
            }

            order.phase = OrderPhase::ReadyForPickup;
            order.status = OrderPhase::ReadyForPickup.coarse();
            order.driver_id = None;
            order.driver_name = None;
            order.assigned_at = None;
            order.driver_accepted_at = None;
            order.updated_at = Utc::now();

            match self
                .store
                .put_if_version(ns::ORDERS, &id, &order, Some(found.version))
                .await
            {
                Ok(_) => break order,
                Err(CoreError::Conflict(_)) if attempt < RECONCILE_ATTEMPTS => {
                    attempt += 1;
                    continue;
                }
                Err(err) => return Err(err),
            }
        };

        self.enqueue_for_assignment(order_id).await;

        self.update_driver(driver_id, |d| {
            d.is_available = true;
            d.current_order_id = None;
            d.rejected_orders_count += 1;
        })
        .await?;

        self.publish_event(&order, Actor::Driver);

        info!(order_id = %order.id, driver_id, "assignment rejected; order re-offered");
        Ok(order)
    }

    /// Read-modify-write on a driver record with bounded re-reads when
    /// the driver client writes concurrently.
    pub async fn update_driver<F>(&self, driver_id: &str, apply: F) -> Result<Driver, CoreError>
    where
        F: Fn(&mut Driver),
    {
        let mut attempt = 0u32;
        loop {
            let Some(found) = self.store.get::<Driver>(ns::DRIVERS, driver_id).await? else {
                return Err(CoreError::NotFound(format!("driver {driver_id}")));
            };
            let mut driver = found.value;
            apply(&mut driver);
            driver.updated_at = Utc::now();

            match self
                .store
                .put_if_version(ns::DRIVERS, driver_id, &driver, Some(found.version))
                .await
            {
                Ok(_) => return Ok(driver),
                Err(CoreError::Conflict(_)) if attempt < RECONCILE_ATTEMPTS => {
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn enqueue_for_assignment(&self, order_id: Uuid) {
        if self.assign_tx.send(order_id).await.is_ok() {
            self.metrics.orders_awaiting_driver.inc();
        } else {
            error!(order_id = %order_id, "assignment queue closed; order not queued");
        }
    }

    async fn after_commit(&self, order: &Order, actor: Actor, target: OrderPhase) {
        match target {
            OrderPhase::ReadyForPickup => {
                self.enqueue_for_assignment(order.id).await;
            }
            OrderPhase::Delivered => {
                if let Some(driver_id) = order.driver_id.clone() {
                    let released = self
                        .update_driver(&driver_id, |d| {
                            d.is_available = true;
                            d.current_order_id = None;
                            d.deliveries_completed += 1;
                        })
                        .await;
                    if let Err(err) = released {
                        error!(order_id = %order.id, driver_id = %driver_id, error = %err, "failed to release driver after delivery");
                    }
                }
            }
            OrderPhase::Cancelled => {
                if let Some(driver_id) = order.driver_id.clone() {
                    let released = self
                        .update_driver(&driver_id, |d| {
                            d.is_available = true;
                            d.current_order_id = None;
                        })
                        .await;
                    if let Err(err) = released {
                        error!(order_id = %order.id, driver_id = %driver_id, error = %err, "failed to release driver after cancellation");
                    }
                }
            }
            _ => {}
        }

        if let Some(recipient) = counterpart(order, actor) {
            self.spawn_notify(order.id, recipient, target);
        }
        self.publish_event(order, actor);
    }

    fn publish_event(&self, order: &Order, actor: Actor) {
        let _ = self.events_tx.send(OrderEvent {
            order_id: order.id,
            phase: order.phase,
            actor,
            occurred_at: order.updated_at,
        });
    }

    fn bump_phase_metric(&self, phase: OrderPhase) {
        let label = format!("{phase:?}");
        self.metrics
            .transitions_total
            .with_label_values(&[label.as_str()])
            .inc();
    }

    fn spawn_notify(&self, order_id: Uuid, recipient: String, phase: OrderPhase) {
        let dispatcher = self.dispatcher.clone();
        let (title, body) = template(phase);
        let data = json!({ "orderId": order_id, "phase": phase });

        tokio::spawn(async move {
            let sent = dispatcher
                .notify(Some(order_id), &recipient, title, body, data)
                .await;
            if let Err(err) = sent {
                warn!(order_id = %order_id, recipient = %recipient, error = %err, "notification dropped");
            }
        });
    }
}

/// The party to inform about a transition: the customer for
/// restaurant/driver/admin-originated edges; for customer-originated
/// edges the attached driver, or the restaurant before handoff.
fn counterpart(order: &Order, actor: Actor) -> Option<String> {
    match actor {
        Actor::Restaurant | Actor::Driver | Actor::Admin => Some(order.customer_id.clone()),
        Actor::Customer => order
            .driver_id
            .clone()
            .or_else(|| Some(order.restaurant_id.clone())),
    }
}

fn template(phase: OrderPhase) -> (&'static str, &'static str) {
    match phase {
        OrderPhase::Pending => ("New Order Received", "You have a new order waiting."),
        OrderPhase::Accepted => ("Order Accepted!", "The restaurant has accepted your order."),
        OrderPhase::Preparing => ("Order Update", "Your order is being prepared."),
        OrderPhase::ReadyForPickup => (
            "Order Update",
            "Your order is ready and waiting for a driver.",
        ),
        OrderPhase::AssignedDriver => (
            "Driver Assigned",
            "A driver has been assigned to your order.",
        ),
        OrderPhase::DriverAccepted => (
            "Driver On The Way",
            "Your driver is heading to the restaurant.",
        ),
        OrderPhase::PickedUp => ("Order Picked Up", "Your order has been picked up."),
        OrderPhase::Delivering => ("Out For Delivery", "Your order is on its way."),
        OrderPhase::Delivered => ("Order Delivered", "Enjoy your meal!"),
        OrderPhase::Rejected => (
            "Order Rejected",
            "The restaurant could not take your order.",
        ),
        OrderPhase::Cancelled => ("Order Cancelled", "The order has been cancelled."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_with(driver: Option<&str>) -> Order {
        let draft = OrderDraft {
            customer_id: "cust-1".to_string(),
            restaurant_id: "rest-1".to_string(),
            items: Vec::new(),
            subtotal: 0,
            tip: 0,
            delivery_fee: 0,
            total: 0,
            fulfillment: crate::models::order::Fulfillment::Pickup,
            payment_method: "card".to_string(),
            address: None,
        };
        let mut order = Order::from_draft(draft, Utc::now());
        order.driver_id = driver.map(str::to_string);
        order
    }

    #[test]
    fn counterpart_of_restaurant_edge_is_customer() {
        let order = order_with(None);
        assert_eq!(
            counterpart(&order, Actor::Restaurant).as_deref(),
            Some("cust-1")
        );
        assert_eq!(counterpart(&order, Actor::Admin).as_deref(), Some("cust-1"));
    }

    #[test]
    fn counterpart_of_customer_edge_prefers_attached_driver() {
        let order = order_with(Some("drv-9"));
        assert_eq!(
            counterpart(&order, Actor::Customer).as_deref(),
            Some("drv-9")
        );

        let unassigned = order_with(None);
        assert_eq!(
            counterpart(&unassigned, Actor::Customer).as_deref(),
            Some("rest-1")
        );
    }
}
