//! Stop sequencing
//!
//! Pure order arithmetic for the optimizer: partition a tour's stops into
//! the frozen prefix (terminal statuses, relative order retained) and the
//! pending candidates, and merge an optimized pending order back after the
//! prefix. Manual reordering bypasses all of this and goes straight through
//! `TourService::reorder_stops` with whatever order the dispatcher supplies.

use uuid::Uuid;

use crate::db::models::{Stop, StopStatus};

/// Split stops into (frozen, pending), both in current visiting order.
///
/// Frozen covers every terminal status: completed and skipped per the
/// optimizer contract, plus rescheduled, which is equally immovable.
pub fn partition(stops: &[Stop]) -> (Vec<&Stop>, Vec<&Stop>) {
    let mut frozen = Vec::new();
    let mut pending = Vec::new();

    for stop in stops {
        if stop.status == StopStatus::Pending {
            pending.push(stop);
        } else {
            frozen.push(stop);
        }
    }

    (frozen, pending)
}

/// Frozen prefix followed by the newly ordered pending IDs
pub fn merge_order(frozen: &[&Stop], pending_order: &[Uuid]) -> Vec<Uuid> {
    let mut order: Vec<Uuid> = frozen.iter().map(|s| s.id).collect();
    order.extend_from_slice(pending_order);
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Priority;
    use chrono::Utc;

    fn stop_with(status: StopStatus, sort_order: i64) -> Stop {
        Stop {
            id: Uuid::new_v4(),
            tour_id: Uuid::new_v4(),
            customer_id: None,
            customer_name: format!("Stop {}", sort_order),
            street: None,
            postal_code: None,
            city: None,
            phone: None,
            latitude: None,
            longitude: None,
            package_count: 1,
            cash_amount: 0.0,
            cash_collected: false,
            cash_collected_amount: None,
            cash_notes: None,
            priority: Priority::Normal,
            stop_notes: None,
            sort_order,
            status,
            completed_at: None,
            completed_latitude: None,
            completed_longitude: None,
            rescheduled_to: None,
            rescheduled_reason: None,
            added_by: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn partition_keeps_relative_order() {
        let stops = vec![
            stop_with(StopStatus::Completed, 0),
            stop_with(StopStatus::Pending, 1),
            stop_with(StopStatus::Skipped, 2),
            stop_with(StopStatus::Pending, 3),
            stop_with(StopStatus::Rescheduled, 4),
        ];

        let (frozen, pending) = partition(&stops);
        assert_eq!(frozen.len(), 3);
        assert_eq!(pending.len(), 2);

        let frozen_orders: Vec<_> = frozen.iter().map(|s| s.sort_order).collect();
        assert_eq!(frozen_orders, [0, 2, 4]);
        let pending_orders: Vec<_> = pending.iter().map(|s| s.sort_order).collect();
        assert_eq!(pending_orders, [1, 3]);
    }

    #[test]
    fn merge_places_pending_after_frozen() {
        let stops = vec![
            stop_with(StopStatus::Completed, 0),
            stop_with(StopStatus::Pending, 1),
            stop_with(StopStatus::Pending, 2),
        ];
        let (frozen, pending) = partition(&stops);

        // Optimizer reversed the pending pair
        let new_pending = vec![pending[1].id, pending[0].id];
        let order = merge_order(&frozen, &new_pending);

        assert_eq!(order, vec![stops[0].id, stops[2].id, stops[1].id]);
    }

    #[test]
    fn all_pending_merges_to_pending_order() {
        let stops = vec![
            stop_with(StopStatus::Pending, 0),
            stop_with(StopStatus::Pending, 1),
        ];
        let (frozen, pending) = partition(&stops);
        assert!(frozen.is_empty());

        let order = merge_order(&frozen, &[pending[1].id, pending[0].id]);
        assert_eq!(order, vec![stops[1].id, stops[0].id]);
    }
}
