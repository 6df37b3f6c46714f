//! Optimistic quantity changes with rollback.
//!
//! Each product has an explicit state machine:
//!
//! ```text
//! Idle(confirmed) --change--> Pending(confirmed, target) --ok--> Idle(target)
//!                                                       \--err--> Idle(confirmed)
//! ```
//!
//! The displayed quantity jumps to the target immediately; the confirmed
//! quantity only moves when the server says so. Per product, at most one
//! mutation is in flight:
//!
//! - a change to the same target joins the in-flight task;
//! - a change to a different target is queued, and the most recent queued
//!   target is sent once the in-flight call settles ("latest wins").
//!
//! Every change bumps a per-product generation. A response for a superseded
//! generation still updates the confirmed quantity (it is server truth) but
//! never overwrites what the user is currently looking at.

mod signal;
mod stock;

pub use signal::CartSignal;
pub use stock::StockCeilings;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cartsync_core::{Cart, CartItemId, ProductId};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};

use crate::cart::{CartService, CartUpdate};
use crate::config::CartClientConfig;
use crate::error::CartError;

/// Signals buffered per subscriber before old ones are dropped.
const SIGNAL_CAPACITY: usize = 64;

// =============================================================================
// Backend
// =============================================================================

/// Cart operations the controller drives.
///
/// Implemented by [`CartService`]; tests substitute a scripted backend.
pub trait CartMutations: Send + Sync + 'static {
    /// Add `quantity` units of a product that has no cart line yet.
    fn add_product(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> impl Future<Output = Result<CartUpdate, CartError>> + Send;

    /// Set a cart line's quantity (at least 1).
    fn update_item(
        &self,
        item_id: CartItemId,
        quantity: u32,
    ) -> impl Future<Output = Result<CartUpdate, CartError>> + Send;

    /// Remove a cart line.
    fn remove_item(
        &self,
        item_id: CartItemId,
    ) -> impl Future<Output = Result<CartUpdate, CartError>> + Send;

    /// Read the current cart.
    fn current_cart(&self) -> impl Future<Output = Result<Cart, CartError>> + Send;
}

impl CartMutations for CartService {
    fn add_product(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> impl Future<Output = Result<CartUpdate, CartError>> + Send {
        Self::add_product(self, product_id, quantity)
    }

    fn update_item(
        &self,
        item_id: CartItemId,
        quantity: u32,
    ) -> impl Future<Output = Result<CartUpdate, CartError>> + Send {
        Self::update_item(self, item_id, quantity)
    }

    fn remove_item(
        &self,
        item_id: CartItemId,
    ) -> impl Future<Output = Result<CartUpdate, CartError>> + Send {
        Self::remove_item(self, item_id)
    }

    fn current_cart(&self) -> impl Future<Output = Result<Cart, CartError>> + Send {
        self.get_current()
    }
}

// =============================================================================
// Public State
// =============================================================================

/// Outcome of [`OptimisticController::change_quantity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityChange {
    /// The server confirmed this quantity.
    Confirmed(u32),
    /// Another change is in flight; this target is sent once it settles
    /// unless a later change replaces it.
    Queued { target: u32 },
}

/// Snapshot of one product's optimistic state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OptimisticEntry {
    /// Quantity last confirmed by the server.
    pub confirmed_quantity: u32,
    /// Quantity the user sees.
    pub displayed_quantity: u32,
    /// Target of the mutation in flight, if any.
    pub in_flight: Option<u32>,
    /// Cart line holding the product, when known.
    pub item_id: Option<CartItemId>,
}

/// State machine position of one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Idle { confirmed: u32 },
    Pending { confirmed: u32, target: u32 },
}

// =============================================================================
// Internal State
// =============================================================================

type SharedChange = Shared<BoxFuture<'static, Result<QuantityChange, CartError>>>;

struct InFlight {
    target: u32,
    task: SharedChange,
}

#[derive(Default)]
struct Entry {
    confirmed: u32,
    displayed: u32,
    item_id: Option<CartItemId>,
    generation: u64,
    /// Most recent target requested while a call was in flight.
    latest: Option<u32>,
    in_flight: Option<InFlight>,
}

impl Entry {
    fn snapshot(&self) -> OptimisticEntry {
        OptimisticEntry {
            confirmed_quantity: self.confirmed,
            displayed_quantity: self.displayed,
            in_flight: self.in_flight.as_ref().map(|f| f.target),
            item_id: self.item_id,
        }
    }

    fn rollback(&mut self) {
        self.in_flight = None;
        self.latest = None;
        self.displayed = self.confirmed;
    }
}

/// What the drive loop does after a call settles.
enum Next {
    FollowUp(u32),
    Done(Result<QuantityChange, CartError>),
}

// =============================================================================
// OptimisticController
// =============================================================================

/// Per-product optimistic quantity controller.
///
/// Cheaply cloneable; clones share state, stock ceilings, and signals.
pub struct OptimisticController<B> {
    inner: Arc<ControllerInner<B>>,
}

impl<B> Clone for OptimisticController<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ControllerInner<B> {
    backend: B,
    entries: Mutex<HashMap<ProductId, Entry>>,
    stock: StockCeilings,
    signals: broadcast::Sender<CartSignal>,
}

impl<B: CartMutations> OptimisticController<B> {
    /// Create a controller over a backend.
    #[must_use]
    pub fn new(backend: B, config: &CartClientConfig) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            inner: Arc::new(ControllerInner {
                backend,
                entries: Mutex::new(HashMap::new()),
                stock: StockCeilings::new(config.stock_ttl),
                signals,
            }),
        }
    }

    /// The backend this controller drives.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Known stock ceilings.
    #[must_use]
    pub fn stock(&self) -> &StockCeilings {
        &self.inner.stock
    }

    /// Subscribe to user-facing signals.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CartSignal> {
        self.inner.signals.subscribe()
    }

    /// Record that `available` units of a product are in stock.
    pub async fn set_stock(&self, product_id: ProductId, available: u32) {
        self.inner.stock.set(product_id, available).await;
    }

    /// Current state of a product. Unknown products are idle at 0.
    #[must_use]
    pub fn snapshot(&self, product_id: ProductId) -> OptimisticEntry {
        self.inner
            .lock()
            .get(&product_id)
            .map(Entry::snapshot)
            .unwrap_or_default()
    }

    /// State machine position of a product.
    #[must_use]
    pub fn state(&self, product_id: ProductId) -> EntryState {
        let entry = self.snapshot(product_id);
        match entry.in_flight {
            Some(target) => EntryState::Pending {
                confirmed: entry.confirmed_quantity,
                target,
            },
            None => EntryState::Idle {
                confirmed: entry.confirmed_quantity,
            },
        }
    }

    /// Align idle products with a cart read from the server.
    ///
    /// Products absent from the cart go to 0. Products with a change in
    /// flight are left alone; their own settlement is authoritative.
    pub fn sync_from_cart(&self, cart: &Cart) {
        let mut entries = self.inner.lock();
        for item in &cart.items {
            entries.entry(item.product.id).or_default();
        }

        for (product_id, entry) in entries.iter_mut() {
            if entry.in_flight.is_some() {
                continue;
            }
            let line = cart.item_for_product(*product_id);
            entry.confirmed = line.map_or(0, |item| item.quantity);
            entry.displayed = entry.confirmed;
            entry.item_id = line.map(|item| item.id);
        }
    }

    /// Read the cart from the server and align idle products with it.
    ///
    /// # Errors
    ///
    /// Returns the backend's error; local state is left untouched.
    pub async fn refresh(&self) -> Result<Cart, CartError> {
        let cart = self.inner.backend.current_cart().await?;
        self.sync_from_cart(&cart);
        Ok(cart)
    }

    /// Change a product's quantity optimistically.
    ///
    /// The displayed quantity moves to `target` at once. A target of 0
    /// removes the line; a product without a line is added.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` without any network call if `target`
    /// is negative or exceeds the known stock ceiling. Otherwise returns the
    /// classified error of the failed call, after rolling back.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn change_quantity(
        &self,
        product_id: ProductId,
        target: i64,
    ) -> Result<QuantityChange, CartError> {
        if target < 0 {
            return Err(CartError::invalid("quantity", "must not be negative"));
        }
        let target = u32::try_from(target)
            .map_err(|_| CartError::invalid("quantity", "is too large"))?;

        if let Some(available) = self.inner.stock.exceeded_by(product_id, target).await {
            warn!(requested = target, available, "Quantity exceeds available stock");
            self.inner.emit(CartSignal::StockCeiling {
                product_id,
                requested: target,
                available,
            });
            return Err(CartError::invalid(
                "quantity",
                format!("only {available} in stock"),
            ));
        }

        let task = {
            let mut entries = self.inner.lock();
            let entry = entries.entry(product_id).or_default();
            entry.displayed = target;
            entry.generation += 1;

            let in_flight = entry
                .in_flight
                .as_ref()
                .map(|f| (f.target, f.task.clone()));

            match in_flight {
                Some((in_flight_target, task)) if in_flight_target == target => {
                    debug!(target, "Joining in-flight change");
                    entry.latest = None;
                    task
                }
                Some((in_flight_target, _)) => {
                    debug!(target, in_flight_target, "Queueing change behind in-flight call");
                    entry.latest = Some(target);
                    return Ok(QuantityChange::Queued { target });
                }
                None if entry.confirmed == target => {
                    return Ok(QuantityChange::Confirmed(target));
                }
                None => {
                    let task = ControllerInner::start(&self.inner, product_id, target);
                    entry.in_flight = Some(InFlight {
                        target,
                        task: task.clone(),
                    });
                    task
                }
            }
        };

        task.await
    }
}

impl<B: CartMutations> ControllerInner<B> {
    fn lock(&self) -> MutexGuard<'_, HashMap<ProductId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, signal: CartSignal) {
        // No subscribers is fine.
        let _ = self.signals.send(signal);
    }

    /// Spawn the drive loop for a product and return a joinable handle.
    ///
    /// Spawned so that the change settles even if every caller stops
    /// waiting for it.
    fn start(self: &Arc<Self>, product_id: ProductId, target: u32) -> SharedChange {
        let handle = tokio::spawn(Arc::clone(self).drive(product_id, target));
        let inner = Arc::clone(self);

        async move {
            handle.await.unwrap_or_else(|e| {
                if let Some(entry) = inner.lock().get_mut(&product_id) {
                    entry.rollback();
                }
                Err(CartError::Server {
                    status: 0,
                    message: format!("quantity change task failed: {e}"),
                })
            })
        }
        .boxed()
        .shared()
    }

    /// Send `target`, then any follow-up the user asked for meanwhile.
    async fn drive(
        self: Arc<Self>,
        product_id: ProductId,
        mut target: u32,
    ) -> Result<QuantityChange, CartError> {
        loop {
            let (generation, item_id, confirmed) = {
                let mut entries = self.lock();
                let entry = entries.entry(product_id).or_default();
                (entry.generation, entry.item_id, entry.confirmed)
            };

            let result = self.dispatch(product_id, item_id, confirmed, target).await;

            match self.settle(product_id, generation, target, result) {
                Next::FollowUp(next) => {
                    debug!(from = target, to = next, "Sending latest requested quantity");
                    target = next;
                }
                Next::Done(outcome) => return outcome,
            }
        }
    }

    /// Issue the single call that moves a product from its committed state
    /// to `target`. Returns the cart line now holding the product.
    async fn dispatch(
        &self,
        product_id: ProductId,
        item_id: Option<CartItemId>,
        confirmed: u32,
        target: u32,
    ) -> Result<Option<CartItemId>, CartError> {
        let item_id = match item_id {
            Some(id) => Some(id),
            None if confirmed > 0 => self.find_item(product_id).await?,
            None => None,
        };

        let update = match (item_id, target) {
            (Some(id), 0) => {
                self.backend.remove_item(id).await?;
                return Ok(None);
            }
            (Some(id), quantity) => self.backend.update_item(id, quantity).await?,
            (None, 0) => return Ok(None),
            (None, quantity) => self.backend.add_product(product_id, quantity).await?,
        };

        if let Some(cart) = &update.cart {
            return Ok(cart.item_for_product(product_id).map(|item| item.id).or(item_id));
        }
        if item_id.is_some() {
            return Ok(item_id);
        }

        // Added, but the response carried no cart to learn the line from.
        match self.find_item(product_id).await {
            Ok(found) => Ok(found),
            Err(e) => {
                warn!(error = %e, "Could not resolve cart line after add");
                Ok(None)
            }
        }
    }

    async fn find_item(&self, product_id: ProductId) -> Result<Option<CartItemId>, CartError> {
        let cart = self.backend.current_cart().await?;
        Ok(cart.item_for_product(product_id).map(|item| item.id))
    }

    /// Apply a settled call to the product's state.
    fn settle(
        &self,
        product_id: ProductId,
        generation: u64,
        target: u32,
        result: Result<Option<CartItemId>, CartError>,
    ) -> Next {
        let mut signals = Vec::new();

        let next = {
            let mut entries = self.lock();
            let entry = entries.entry(product_id).or_default();

            match result {
                Ok(item_id) => {
                    entry.confirmed = target;
                    entry.item_id = item_id;
                    signals.push(CartSignal::Confirmed {
                        product_id,
                        quantity: target,
                    });

                    match entry.latest.take() {
                        Some(latest) if latest != target => {
                            if let Some(in_flight) = entry.in_flight.as_mut() {
                                in_flight.target = latest;
                            }
                            Next::FollowUp(latest)
                        }
                        _ => {
                            entry.in_flight = None;
                            if entry.generation == generation {
                                entry.displayed = target;
                            } else {
                                debug!(generation, current = entry.generation, "Superseded response");
                            }
                            Next::Done(Ok(QuantityChange::Confirmed(target)))
                        }
                    }
                }
                Err(e) => {
                    signals.push(CartSignal::for_failure(product_id, &e));

                    // A throttled product sends nothing more until the user acts again.
                    let throttled = matches!(e, CartError::Throttled { .. });
                    match entry.latest.take() {
                        Some(latest) if latest != entry.confirmed && !throttled => {
                            warn!(error = %e, target, latest, "Change failed, sending latest instead");
                            if let Some(in_flight) = entry.in_flight.as_mut() {
                                in_flight.target = latest;
                            }
                            Next::FollowUp(latest)
                        }
                        _ => {
                            warn!(
                                error = %e,
                                target,
                                confirmed = entry.confirmed,
                                "Change failed, rolling back"
                            );
                            entry.rollback();
                            Next::Done(Err(e))
                        }
                    }
                }
            }
        };

        for signal in signals {
            self.emit(signal);
        }
        next
    }
}
