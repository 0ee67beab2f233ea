pub mod ranking;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::driver::Driver;
use crate::models::order::{Order, OrderPhase};
use crate::state::AppState;
use crate::store::ns;

/// Consumes the queue of orders needing a driver and offers each to the
/// best-ranked candidate. Claims go through a conditional write, so two
/// coordinators (or a coordinator racing a self-assigning driver) agree
/// on a single winner.
pub async fn run_coordinator(state: Arc<AppState>, mut order_rx: mpsc::Receiver<Uuid>) {
    info!("assignment coordinator started");

    while let Some(order_id) = order_rx.recv().await {
        state.metrics.orders_awaiting_driver.dec();

        let start = Instant::now();
        match try_assign(&state, order_id).await {
            Ok(()) => {
                let elapsed = start.elapsed().as_secs_f64();
                state
                    .metrics
                    .assignment_latency_seconds
                    .with_label_values(&["success"])
                    .observe(elapsed);
                state
                    .metrics
                    .assignments_total
                    .with_label_values(&["success"])
                    .inc();
            }
            Err(err) => {
                let elapsed = start.elapsed().as_secs_f64();
                state
                    .metrics
                    .assignment_latency_seconds
                    .with_label_values(&["error"])
                    .observe(elapsed);
                state
                    .metrics
                    .assignments_total
                    .with_label_values(&["error"])
                    .inc();
                error!(order_id = %order_id, error = %err, "failed to process assignment");
            }
        }
    }

    warn!("assignment coordinator stopped: queue channel closed");
}

async fn try_assign(state: &Arc<AppState>, order_id: Uuid) -> Result<(), CoreError> {
    let id = order_id.to_string();
    let Some(found) = state.store.get::<Order>(ns::ORDERS, &id).await? else {
        warn!(order_id = %order_id, "queued order no longer exists");
        return Ok(());
    };
    let order = found.value;

    // stale queue entry: the order moved on while it sat in the queue
    if order.phase != OrderPhase::ReadyForPickup || order.driver_id.is_some() {
        return Ok(());
    }

    let drivers: Vec<Driver> = state
        .store
        .list::<Driver>(ns::DRIVERS)
        .await?
        .into_iter()
        .map(|(_, versioned)| versioned.value)
        .collect();

    let anchor = order.address.as_ref().and_then(|a| a.location);
    let ranked = ranking::rank_candidates(drivers, anchor.as_ref());

    if ranked.is_empty() {
        warn!(order_id = %order_id, "no eligible drivers; re-queueing order");
        sleep(Duration::from_millis(250)).await;
        state.lifecycle.enqueue_for_assignment(order_id).await;
        return Ok(());
    }

    for candidate in &ranked {
        match state.lifecycle.assign_driver(order_id, candidate).await {
            Ok(_) => {
                state
                    .lifecycle
                    .update_driver(&candidate.id, |d| {
                        d.is_available = false;
                        d.current_order_id = Some(order_id);
                    })
                    .await?;
                return Ok(());
            }
            Err(CoreError::Conflict(_)) => {
                info!(order_id = %order_id, "order claimed elsewhere");
                return Ok(());
            }
            Err(err) => return Err(err),
        }
    }

    Ok(())
}

/// Periodic sweep over live orders: fills the denormalization gap where
/// the phase reads `AssignedDriver` but the driver linkage never
/// landed, and detects order/driver records that disagree.
pub async fn run_reconciliation(state: Arc<AppState>, every: Duration) {
    info!("reconciliation sweep started");
    let mut ticker = tokio::time::interval(every);

    loop {
        ticker.tick().await;
        if let Err(err) = reconcile_once(&state).await {
            error!(error = %err, "reconciliation sweep failed");
        }
    }
}

pub async fn reconcile_once(state: &AppState) -> Result<(), CoreError> {
    let orders = state.store.list::<Order>(ns::ORDERS).await?;

    for (id, versioned) in orders {
        let order = versioned.value;
        if order.phase.is_terminal() {
            continue;
        }

        if order.phase == OrderPhase::AssignedDriver && order.driver_id.is_none() {
            if let Err(err) = fill_assignment_gap(state, &id, versioned.version, order).await {
                warn!(order_id = %id, error = %err, "failed to repair driver-less assignment");
            }
            continue;
        }

        if let Some(driver_id) = &order.driver_id {
            let driver = state.store.get::<Driver>(ns::DRIVERS, driver_id).await?;
            let agrees = driver
                .as_ref()
                .map_or(false, |d| d.value.current_order_id == Some(order.id));
            if !agrees {
                state.metrics.inconsistent_assignments_total.inc();
                let drift = CoreError::InconsistentAssignment(format!(
                    "order {id} names driver {driver_id} but the driver record disagrees"
                ));
                warn!(order_id = %id, driver_id = %driver_id, error = %drift, "assignment drift detected");
            }
        }
    }

    Ok(())
}

async fn fill_assignment_gap(
    state: &AppState,
    id: &str,
    version: u64,
    mut order: Order,
) -> Result<(), CoreError> {
    let drivers: Vec<Driver> = state
        .store
        .list::<Driver>(ns::DRIVERS)
        .await?
        .into_iter()
        .map(|(_, versioned)| versioned.value)
        .collect();

    let anchor = order.address.as_ref().and_then(|a| a.location);
    let ranked = ranking::rank_candidates(drivers, anchor.as_ref());
    let Some(candidate) = ranked.first() else {
        return Err(CoreError::DriverUnavailable);
    };

    let now = Utc::now();
    order.driver_id = Some(candidate.id.clone());
    order.driver_name = Some(candidate.name.clone());
    if order.assigned_at.is_none() {
        order.assigned_at = Some(now);
    }
    order.updated_at = now;

    // racing repairers serialize on the version check
    state
        .store
        .put_if_version(ns::ORDERS, id, &order, Some(version))
        .await?;

    state
        .lifecycle
        .update_driver(&candidate.id, |d| {
            d.is_available = false;
            d.current_order_id = Some(order.id);
        })
        .await?;

    info!(order_id = %id, driver_id = %candidate.id, "repaired driver-less assignment");
    Ok(())
}
