use std::sync::Arc;

use chrono::Utc;
use tokio::time::Duration;
use tracing::{error, info};

use crate::error::CoreError;
use crate::models::order::ScheduledOrder;
use crate::state::AppState;
use crate::store::ns;

/// Recurring sweep that promotes due scheduled orders into the live
/// lifecycle. Safe to run from several processes at once: the
/// delete-first claim makes activation exactly-once even though the
/// scan itself is at-least-once.
pub async fn run_activator(state: Arc<AppState>, every: Duration) {
    info!("scheduled order activator started");
    let mut ticker = tokio::time::interval(every);

    loop {
        ticker.tick().await;
        match activate_due(&state).await {
            Ok(0) => {}
            Ok(count) => info!(count, "scheduled orders activated"),
            Err(err) => error!(error = %err, "activation sweep failed"),
        }
    }
}

pub async fn activate_due(state: &AppState) -> Result<usize, CoreError> {
    let now = Utc::now();
    let due: Vec<String> = state
        .store
        .list::<ScheduledOrder>(ns::SCHEDULED_ORDERS)
        .await?
        .into_iter()
        .filter(|(_, versioned)| versioned.value.scheduled_for <= now)
        .map(|(id, _)| id)
        .collect();

    let mut activated = 0usize;
    for id in due {
        // delete first: only the sweep that receives the payload
        // converts it, concurrent sweeps see None and move on
        let removed = state
            .store
            .remove::<ScheduledOrder>(ns::SCHEDULED_ORDERS, &id)
            .await?;
        let Some(scheduled) = removed else {
            continue;
        };

        match state.lifecycle.create_order(scheduled.draft, true).await {
            Ok(order) => {
                activated += 1;
                state
                    .metrics
                    .activations_total
                    .with_label_values(&["success"])
                    .inc();
                info!(scheduled_id = %id, order_id = %order.id, "scheduled order activated");
            }
            Err(err) => {
                state
                    .metrics
                    .activations_total
                    .with_label_values(&["error"])
                    .inc();
                error!(scheduled_id = %id, error = %err, "failed to activate scheduled order; draft dropped");
            }
        }
    }

    Ok(activated)
}
