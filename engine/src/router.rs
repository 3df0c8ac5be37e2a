//! Order router
//!
//! Registry of venue adapters plus the active-order index. Every submit
//! passes the risk gate with a reference price (the order's own price, or
//! the last recorded tick for that venue and symbol). Venue round-trips run
//! outside the router lock.

use crate::risk::RiskEngine;
use crate::venue::VenueAdapter;
use common::error::EngineError;
use common::types::{Order, OrderId, OrderStatus, OrderUpdate};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

struct ActiveOrder {
    order: Order,
    venue: String,
}

#[derive(Default)]
struct RouterBook {
    venues: FxHashMap<String, Arc<dyn VenueAdapter>>,
    orders: FxHashMap<OrderId, ActiveOrder>,
    by_venue: FxHashMap<String, FxHashSet<OrderId>>,
    marks: FxHashMap<(String, String), f64>,
}

/// Thread-safe router in front of the venue adapters
pub struct OrderRouter {
    book: Mutex<RouterBook>,
    risk: Arc<RiskEngine>,
}

impl OrderRouter {
    /// Build a router over a shared risk engine
    #[must_use]
    pub fn new(risk: Arc<RiskEngine>) -> Self {
        Self {
            book: Mutex::new(RouterBook::default()),
            risk,
        }
    }

    /// Register an adapter under its venue name
    pub fn register_venue(&self, name: impl Into<String>, adapter: Arc<dyn VenueAdapter>) {
        let name = name.into();
        info!(venue = %name, "venue registered");
        self.book.lock().venues.insert(name, adapter);
    }

    /// Remove a venue; its active orders are dropped from the index.
    /// Returns the adapter so the caller can disconnect it.
    pub fn unregister_venue(&self, name: &str) -> Option<Arc<dyn VenueAdapter>> {
        let mut book = self.book.lock();
        let adapter = book.venues.remove(name);
        if adapter.is_some() {
            if let Some(ids) = book.by_venue.remove(name) {
                if !ids.is_empty() {
                    warn!(venue = %name, orphaned = ids.len(), "dropping active orders of unregistered venue");
                }
                for id in ids {
                    book.orders.remove(&id);
                }
            }
            info!(venue = %name, "venue unregistered");
        }
        adapter
    }

    /// Look up a registered adapter
    #[must_use]
    pub fn venue(&self, name: &str) -> Option<Arc<dyn VenueAdapter>> {
        self.book.lock().venues.get(name).cloned()
    }

    /// Names of all registered venues
    #[must_use]
    pub fn venues(&self) -> Vec<String> {
        self.book.lock().venues.keys().cloned().collect()
    }

    /// Record the last tick for a (venue, symbol); the reference-price
    /// source for market orders
    pub fn record_mark(&self, venue: &str, symbol: &str, price: f64) {
        self.book
            .lock()
            .marks
            .insert((venue.to_string(), symbol.to_string()), price);
    }

    /// Validate, risk-check and submit an order to a venue
    ///
    /// The order is recorded in the active index only after the adapter
    /// accepted it; adapter failures propagate and record nothing.
    pub fn submit(&self, order: Order, venue: &str) -> Result<OrderId, EngineError> {
        order.validate().map_err(EngineError::InvalidOrder)?;

        let (adapter, mark) = {
            let book = self.book.lock();
            let adapter = book
                .venues
                .get(venue)
                .cloned()
                .ok_or_else(|| EngineError::UnknownVenue(venue.to_string()))?;
            let mark = book
                .marks
                .get(&(venue.to_string(), order.symbol.clone()))
                .copied();
            (adapter, mark)
        };

        let reference_price = order.price.or(mark).ok_or_else(|| {
            EngineError::InvalidOrder(format!(
                "no reference price for {} on {venue}",
                order.symbol
            ))
        })?;

        self.risk
            .admit(&order, reference_price)
            .map_err(EngineError::RiskRejected)?;

        let order_id = adapter.submit_order(&order)?;
        let mut book = self.book.lock();
        book.by_venue
            .entry(venue.to_string())
            .or_default()
            .insert(order_id.clone());
        book.orders.insert(
            order_id.clone(),
            ActiveOrder {
                order,
                venue: venue.to_string(),
            },
        );
        debug!(venue, order_id = %order_id, "order recorded");
        Ok(order_id)
    }

    /// Cancel a tracked order; removed from the index on success
    pub fn cancel(&self, order_id: &OrderId, venue: &str) -> Result<(), EngineError> {
        let adapter = self
            .venue(venue)
            .ok_or_else(|| EngineError::UnknownVenue(venue.to_string()))?;
        if !self.book.lock().orders.contains_key(order_id) {
            return Err(EngineError::UnknownOrder(order_id.clone()));
        }
        adapter.cancel_order(order_id)?;
        self.remove(order_id);
        debug!(venue, order_id = %order_id, "order cancelled");
        Ok(())
    }

    /// Query order status on the venue
    pub fn status(&self, order_id: &OrderId, venue: &str) -> Result<OrderStatus, EngineError> {
        let adapter = self
            .venue(venue)
            .ok_or_else(|| EngineError::UnknownVenue(venue.to_string()))?;
        adapter.order_status(order_id)
    }

    /// Snapshot of active orders, optionally filtered by venue
    #[must_use]
    pub fn active_orders(&self, venue: Option<&str>) -> Vec<(OrderId, Order, String)> {
        let book = self.book.lock();
        book.orders
            .iter()
            .filter(|(_, active)| venue.map_or(true, |v| active.venue == v))
            .map(|(id, active)| (id.clone(), active.order.clone(), active.venue.clone()))
            .collect()
    }

    /// Fold an order update into the index; terminal updates drop the
    /// order before they are re-dispatched
    pub fn on_order_update(&self, update: &OrderUpdate) {
        if update.status.is_terminal() {
            self.remove(&update.order_id);
        }
    }

    fn remove(&self, order_id: &OrderId) {
        let mut book = self.book.lock();
        if let Some(active) = book.orders.remove(order_id) {
            if let Some(ids) = book.by_venue.get_mut(&active.venue) {
                ids.remove(order_id);
            }
        }
    }
}
