//! Storefront - cart, checkout, order admin and booking over HTTP

use anyhow::Result;
use axum::{extract::{Path, Query, State}, http::{header, StatusCode}, response::IntoResponse, routing::{get, post, put}, Json, Router};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront::config::{Config, PaymentProvider};
use storefront::domain::aggregates::{
    Appointment, BookingDraft, BookingError, BookingFlow, BookingReference, CartError, CartLine, CheckoutError,
    CheckoutSession, ContactDetails, Order, OrderError, OrderStatus, PaymentMethod, PaymentStatus, Product,
    Service, ShippingMethod, StaffMember,
};
use storefront::domain::value_objects::{LineItemKey, Quantity};
use storefront::payment::{PaymentGateway, SimulatedGateway, StripeGateway};
use storefront::services::{
    csv_filename, export_csv, BookingDesk, CardConfirmation, Catalog, CartStore, CheckoutOutcome, CheckoutService, EventBus,
    OrderFilter, OrderSort, OrderStats, OrderStore, RecencyWindow, SortDirection, SortKey, StaffSlots,
};
use storefront::storage::{keys, FileStore, MemoryStore, SharedStore};
use storefront::{format_price, StorefrontError};

type ApiError = (StatusCode, String);
type Sessions = Arc<Mutex<HashMap<String, Arc<Mutex<CheckoutSession>>>>>;

#[derive(Clone)]
pub struct AppState {
    store: SharedStore,
    bus: EventBus,
    catalog: Arc<Catalog>,
    orders: Arc<Mutex<OrderStore>>,
    sessions: Sessions,
    checkout: Arc<CheckoutService>,
    booking: Arc<BookingDesk>,
    currency_symbol: String,
}

impl AppState {
    fn new(store: SharedStore, gateway: Arc<dyn PaymentGateway>, config: &Config) -> Self {
        let bus = EventBus::default();
        Self {
            catalog: Arc::new(Catalog::load(store.as_ref())),
            orders: Arc::new(Mutex::new(OrderStore::open(store.clone(), bus.clone()))),
            sessions: Arc::default(),
            checkout: Arc::new(CheckoutService::new(
                gateway, config.currency.as_str(), config.currency_symbol.as_str(),
                config.payment_return_url.as_str(), bus.clone(),
            )),
            booking: Arc::new(BookingDesk::open(store.clone(), config.booking_submit_delay, bus.clone())),
            currency_symbol: config.currency_symbol.clone(),
            store,
            bus,
        }
    }

    fn cart(&self, session: &str) -> CartStore {
        CartStore::open(self.store.clone(), keys::session_cart(session), self.bus.clone())
    }

    async fn session(&self, id: &str) -> Result<Arc<Mutex<CheckoutSession>>, ApiError> {
        self.sessions.lock().await.get(id).cloned().ok_or((StatusCode::NOT_FOUND, format!("No checkout session {id}")))
    }

    /// Requests the card intent as soon as the session sits on the payment step with card selected.
    /// A failure stays on the session as a retryable error.
    async fn prepare_payment(&self, id: &str, session: &mut CheckoutSession) {
        if session.needs_payment_intent() {
            let _ = self.checkout.request_payment_intent(session, &self.cart(id)).await;
        }
    }

    /// A completed session is discarded; the placed order is in the response.
    async fn settle(&self, id: &str, outcome: CheckoutOutcome) -> Json<CheckoutOutcome> {
        if matches!(outcome, CheckoutOutcome::Completed(_)) {
            self.sessions.lock().await.remove(id);
        }
        Json(outcome)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = Config::from_env()?;

    let store: SharedStore = match &config.data_dir {
        Some(dir) => Arc::new(FileStore::open(dir.clone())?),
        None => {
            warn!("STOREFRONT_DATA_DIR not set, state is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };
    let gateway: Arc<dyn PaymentGateway> = match &config.payment {
        PaymentProvider::Simulated => Arc::new(SimulatedGateway::new()),
        PaymentProvider::Stripe { secret_key } => Arc::new(StripeGateway::new(secret_key.as_str())),
    };
    let app = router(AppState::new(store, gateway, &config));

    tracing::info!("Storefront listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "storefront"})) }))
        .route("/api/v1/products", get(list_products))
        .route("/api/v1/products/:slug", get(get_product))
        .route("/api/v1/cart/:session", get(get_cart).post(add_to_cart).delete(clear_cart))
        .route("/api/v1/cart/:session/items/:product_id", put(update_cart_item).delete(remove_cart_item))
        .route("/api/v1/checkout/:session", get(get_checkout).post(start_checkout))
        .route("/api/v1/checkout/:session/information", post(submit_information))
        .route("/api/v1/checkout/:session/shipping", post(submit_shipping).put(select_shipping))
        .route("/api/v1/checkout/:session/payment-method", put(select_payment_method))
        .route("/api/v1/checkout/:session/payment-intent", post(request_payment_intent))
        .route("/api/v1/checkout/:session/payment", post(submit_payment))
        .route("/api/v1/checkout/:session/confirm", post(confirm_payment))
        .route("/api/v1/checkout/:session/back", post(checkout_back))
        .route("/api/v1/admin/orders", get(list_orders))
        .route("/api/v1/admin/orders/stats", get(order_stats))
        .route("/api/v1/admin/orders/export.csv", get(export_orders))
        .route("/api/v1/admin/orders/:id", get(get_order).delete(delete_order))
        .route("/api/v1/admin/orders/:id/status", put(update_order_status))
        .route("/api/v1/admin/orders/:id/payment-status", put(update_payment_status))
        .route("/api/v1/booking/catalog", get(booking_catalog))
        .route("/api/v1/booking/slots", get(booking_slots))
        .route("/api/v1/bookings", post(create_booking))
        .layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(state)
}

fn fail<E: Into<StorefrontError>>(e: E) -> ApiError {
    let e = e.into();
    let status = match &e {
        StorefrontError::ProductNotFound(_) | StorefrontError::Order(OrderError::NotFound(_)) => StatusCode::NOT_FOUND,
        StorefrontError::Booking(BookingError::UnknownService(_) | BookingError::UnknownStaff(_)) => StatusCode::NOT_FOUND,
        StorefrontError::Quantity(_) | StorefrontError::Cart(_) => StatusCode::UNPROCESSABLE_ENTITY,
        StorefrontError::Checkout(CheckoutError::Validation(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        StorefrontError::Order(OrderError::NoItems | OrderError::TotalMismatch { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
        StorefrontError::Booking(BookingError::IncompleteStep(_) | BookingError::WrongStep(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        StorefrontError::Checkout(CheckoutError::PaymentFailed(_)) | StorefrontError::Payment(_) => StatusCode::BAD_GATEWAY,
        StorefrontError::Checkout(_) | StorefrontError::Order(_) | StorefrontError::Booking(_) => StatusCode::CONFLICT,
        StorefrontError::Storage(_) | StorefrontError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() { warn!(error = %e, "request failed"); }
    (status, e.to_string())
}

// =============================================================================
// Catalog
// =============================================================================

async fn list_products(State(s): State<AppState>) -> Json<Vec<Product>> {
    Json(s.catalog.products().to_vec())
}

async fn get_product(State(s): State<AppState>, Path(slug): Path<String>) -> Result<Json<Product>, ApiError> {
    s.catalog.find_by_slug(&slug).or_else(|| s.catalog.find(&slug)).cloned().map(Json)
        .ok_or_else(|| fail(StorefrontError::ProductNotFound(slug)))
}

// =============================================================================
// Cart
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView { pub lines: Vec<CartLine>, pub item_count: u32, pub subtotal: Decimal, pub subtotal_display: String }

impl CartView {
    fn of(cart: &CartStore, symbol: &str) -> Self {
        Self { lines: cart.lines().to_vec(), item_count: cart.item_count(), subtotal: cart.subtotal(), subtotal_display: format_price(cart.subtotal(), symbol) }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartRequest { pub product_id: String, pub variant_id: Option<String>, pub quantity: Option<u32> }

#[derive(Debug, Deserialize)] pub struct VariantParam { pub variant: Option<String> }
#[derive(Debug, Deserialize)] pub struct QuantityRequest { pub quantity: u32 }

async fn get_cart(State(s): State<AppState>, Path(session): Path<String>) -> Json<CartView> {
    Json(CartView::of(&s.cart(&session), &s.currency_symbol))
}

async fn add_to_cart(State(s): State<AppState>, Path(session): Path<String>, Json(r): Json<AddToCartRequest>) -> Result<(StatusCode, Json<CartView>), ApiError> {
    let product = s.catalog.find(&r.product_id).cloned().ok_or_else(|| fail(StorefrontError::ProductNotFound(r.product_id.clone())))?;
    let variant = match &r.variant_id {
        Some(id) => Some(product.variant(id).cloned().ok_or_else(|| fail(CartError::UnknownVariant { product_id: product.id.clone(), variant_id: id.clone() }))?),
        None => None,
    };
    let quantity = Quantity::new(r.quantity.unwrap_or(1)).map_err(fail)?;
    let mut cart = s.cart(&session);
    cart.add_item(product, quantity, variant).map_err(fail)?;
    Ok((StatusCode::CREATED, Json(CartView::of(&cart, &s.currency_symbol))))
}

async fn update_cart_item(State(s): State<AppState>, Path((session, product_id)): Path<(String, String)>, Query(v): Query<VariantParam>, Json(r): Json<QuantityRequest>) -> Result<Json<CartView>, ApiError> {
    let mut cart = s.cart(&session);
    if !cart.update_quantity(&LineItemKey::new(product_id, v.variant.as_deref()), r.quantity) {
        return Err((StatusCode::NOT_FOUND, "Cart line not found".to_string()));
    }
    Ok(Json(CartView::of(&cart, &s.currency_symbol)))
}

async fn remove_cart_item(State(s): State<AppState>, Path((session, product_id)): Path<(String, String)>, Query(v): Query<VariantParam>) -> Json<CartView> {
    let mut cart = s.cart(&session);
    cart.remove_item(&LineItemKey::new(product_id, v.variant.as_deref()));
    Json(CartView::of(&cart, &s.currency_symbol))
}

async fn clear_cart(State(s): State<AppState>, Path(session): Path<String>) -> StatusCode {
    s.cart(&session).clear();
    StatusCode::NO_CONTENT
}

// =============================================================================
// Checkout
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutView {
    #[serde(flatten)]
    pub session: CheckoutSession,
    pub shipping_cost: Decimal,
    pub total: Decimal,
    pub total_display: String,
    pub payment_ready: bool,
}

impl AppState {
    fn checkout_view(&self, session: &CheckoutSession) -> CheckoutView {
        let (total, payment_ready) = self.checkout.payment_ready(session);
        CheckoutView {
            session: session.clone(), shipping_cost: session.shipping_cost(), total,
            total_display: format_price(total, &self.currency_symbol), payment_ready,
        }
    }
}

#[derive(Debug, Deserialize)] #[serde(rename_all = "camelCase")] pub struct ShippingRequest { pub shipping_method: ShippingMethod }
#[derive(Debug, Deserialize)] #[serde(rename_all = "camelCase")] pub struct PaymentMethodRequest { pub payment_method: PaymentMethod }

async fn start_checkout(State(s): State<AppState>, Path(id): Path<String>) -> Result<(StatusCode, Json<CheckoutView>), ApiError> {
    let session = s.checkout.start(&s.cart(&id)).map_err(fail)?;
    let view = s.checkout_view(&session);
    s.sessions.lock().await.insert(id, Arc::new(Mutex::new(session)));
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_checkout(State(s): State<AppState>, Path(id): Path<String>) -> Result<Json<CheckoutView>, ApiError> {
    let session = s.session(&id).await?;
    let mut session = session.lock().await;
    session.sync_subtotal(s.cart(&id).subtotal());
    Ok(Json(s.checkout_view(&session)))
}

async fn submit_information(State(s): State<AppState>, Path(id): Path<String>, Json(r): Json<ContactDetails>) -> Result<Json<CheckoutView>, ApiError> {
    let session = s.session(&id).await?;
    let mut session = session.lock().await;
    session.submit_information(r).map_err(fail)?;
    s.bus.publish(session.take_events());
    Ok(Json(s.checkout_view(&session)))
}

async fn submit_shipping(State(s): State<AppState>, Path(id): Path<String>, Json(r): Json<ShippingRequest>) -> Result<Json<CheckoutView>, ApiError> {
    let session = s.session(&id).await?;
    let mut session = session.lock().await;
    session.submit_shipping(r.shipping_method).map_err(fail)?;
    s.bus.publish(session.take_events());
    s.prepare_payment(&id, &mut session).await;
    Ok(Json(s.checkout_view(&session)))
}

async fn select_shipping(State(s): State<AppState>, Path(id): Path<String>, Json(r): Json<ShippingRequest>) -> Result<Json<CheckoutView>, ApiError> {
    let session = s.session(&id).await?;
    let mut session = session.lock().await;
    session.select_shipping_method(r.shipping_method).map_err(fail)?;
    s.prepare_payment(&id, &mut session).await;
    Ok(Json(s.checkout_view(&session)))
}

async fn select_payment_method(State(s): State<AppState>, Path(id): Path<String>, Json(r): Json<PaymentMethodRequest>) -> Result<Json<CheckoutView>, ApiError> {
    let session = s.session(&id).await?;
    let mut session = session.lock().await;
    session.select_payment_method(r.payment_method).map_err(fail)?;
    s.prepare_payment(&id, &mut session).await;
    Ok(Json(s.checkout_view(&session)))
}

async fn request_payment_intent(State(s): State<AppState>, Path(id): Path<String>) -> Result<Json<CheckoutView>, ApiError> {
    let session = s.session(&id).await?;
    let mut session = session.lock().await;
    s.checkout.request_payment_intent(&mut session, &s.cart(&id)).await.map_err(fail)?;
    Ok(Json(s.checkout_view(&session)))
}

async fn submit_payment(State(s): State<AppState>, Path(id): Path<String>) -> Result<Json<CheckoutOutcome>, ApiError> {
    let session = s.session(&id).await?;
    let mut session = session.lock().await;
    let mut cart = s.cart(&id);
    let outcome = {
        let mut orders = s.orders.lock().await;
        s.checkout.submit_payment(&mut session, &mut cart, &mut orders).map_err(fail)?
    };
    let response = s.settle(&id, outcome).await;
    Ok(response)
}

async fn confirm_payment(State(s): State<AppState>, Path(id): Path<String>) -> Result<Json<CheckoutOutcome>, ApiError> {
    let session = s.session(&id).await?;
    let mut session = session.lock().await;
    let mut cart = s.cart(&id);
    let outcome = match s.checkout.confirm_with_provider(&mut session, &cart).await.map_err(fail)? {
        CardConfirmation::Paid(proof) => {
            let mut orders = s.orders.lock().await;
            s.checkout.complete_card_payment(&mut session, &mut cart, &mut orders, proof).map_err(fail)?
        }
        CardConfirmation::Redirect { url } => CheckoutOutcome::Redirect { url },
    };
    let response = s.settle(&id, outcome).await;
    Ok(response)
}

async fn checkout_back(State(s): State<AppState>, Path(id): Path<String>) -> Result<Json<CheckoutView>, ApiError> {
    let session = s.session(&id).await?;
    let mut session = session.lock().await;
    session.back().map_err(fail)?;
    s.bus.publish(session.take_events());
    Ok(Json(s.checkout_view(&session)))
}

// =============================================================================
// Admin orders
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderQuery {
    pub search: Option<String>,
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub window: Option<RecencyWindow>,
    pub sort_by: Option<SortKey>,
    pub direction: Option<SortDirection>,
}

impl OrderQuery {
    fn filter(&self) -> OrderFilter {
        OrderFilter { search: self.search.clone(), status: self.status, payment_status: self.payment_status, window: self.window }
    }
    fn sort(&self) -> OrderSort {
        OrderSort { by: self.sort_by.unwrap_or_default(), direction: self.direction.unwrap_or_default() }
    }
}

#[derive(Debug, Serialize)] pub struct OrderList { pub data: Vec<Order>, pub total: usize, pub stats: OrderStats }
#[derive(Debug, Deserialize)] pub struct StatusRequest { pub status: OrderStatus }
#[derive(Debug, Deserialize)] pub struct PaymentStatusRequest { pub status: PaymentStatus }

async fn list_orders(State(s): State<AppState>, Query(q): Query<OrderQuery>) -> Json<OrderList> {
    let orders = s.orders.lock().await;
    let view = orders.query(&q.filter(), q.sort(), Utc::now());
    let stats = OrderStats::of(view.iter().copied());
    Json(OrderList { total: view.len(), data: view.into_iter().cloned().collect(), stats })
}

async fn order_stats(State(s): State<AppState>) -> Json<OrderStats> {
    let orders = s.orders.lock().await;
    Json(orders.stats())
}

async fn export_orders(State(s): State<AppState>, Query(q): Query<OrderQuery>) -> impl IntoResponse {
    let orders = s.orders.lock().await;
    let csv = export_csv(orders.query(&q.filter(), q.sort(), Utc::now()));
    let disposition = format!("attachment; filename=\"{}\"", csv_filename(Utc::now().date_naive()));
    ([(header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()), (header::CONTENT_DISPOSITION, disposition)], csv)
}

async fn get_order(State(s): State<AppState>, Path(id): Path<String>) -> Result<Json<Order>, ApiError> {
    let orders = s.orders.lock().await;
    orders.get(&id).cloned().map(Json).ok_or_else(|| fail(OrderError::NotFound(id.clone())))
}

async fn update_order_status(State(s): State<AppState>, Path(id): Path<String>, Json(r): Json<StatusRequest>) -> Result<Json<Order>, ApiError> {
    let mut orders = s.orders.lock().await;
    orders.set_status(&id, r.status).cloned().map(Json).map_err(fail)
}

async fn update_payment_status(State(s): State<AppState>, Path(id): Path<String>, Json(r): Json<PaymentStatusRequest>) -> Result<Json<Order>, ApiError> {
    let mut orders = s.orders.lock().await;
    orders.set_payment_status(&id, r.status).cloned().map(Json).map_err(fail)
}

async fn delete_order(State(s): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    s.orders.lock().await.delete(&id).map_err(fail)?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Booking
// =============================================================================

#[derive(Debug, Serialize)] pub struct BookingCatalog { pub services: Vec<Service>, pub staff: Vec<StaffMember> }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotQuery { pub service_id: String, pub staff_id: Option<String>, pub date: NaiveDate }

#[derive(Debug, Serialize)] pub struct BookingConfirmation { pub reference: BookingReference, pub appointment: Appointment }

async fn booking_catalog(State(s): State<AppState>) -> Json<BookingCatalog> {
    Json(BookingCatalog { services: s.booking.services().to_vec(), staff: s.booking.staff().to_vec() })
}

async fn booking_slots(State(s): State<AppState>, Query(q): Query<SlotQuery>) -> Result<Json<Vec<StaffSlots>>, ApiError> {
    s.booking.available_slots(&q.service_id, q.staff_id.as_deref(), q.date).await.map(Json).map_err(fail)
}

async fn create_booking(State(s): State<AppState>, Json(draft): Json<BookingDraft>) -> Result<(StatusCode, Json<BookingConfirmation>), ApiError> {
    let mut flow = BookingFlow::from_draft(draft);
    let appointment = s.booking.submit(&mut flow).await.map_err(fail)?;
    Ok((StatusCode::CREATED, Json(BookingConfirmation { reference: appointment.reference.clone(), appointment })))
}
