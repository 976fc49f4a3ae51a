//! Doubles and fixtures shared by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use galley_sdk::objects::{CreateOrderRequest, CustomerContact, LineItemRequest};
use rust_decimal::Decimal;
use smallvec::smallvec;
use time::OffsetDateTime;

use crate::broadcast::EventBroadcaster;
use crate::catalog::{AddOnEntry, MemoryCatalog, MenuEntry};
use crate::config::{EnginePolicy, PolicyStore, TenantConfig, TenantDirectory};
use crate::entities::order::{LineItem, Order, OrderStatus};
use crate::entities::payment::{GatewayOperation, PaymentAttempt, PaymentMethod, PaymentState};
use crate::entities::{Actor, Identity, OrderId, PaymentId, TenantId};
use crate::payments::PaymentService;
use crate::payments::gateway::{
    AuthorizeRequest, DeviceCheckoutRequest, DeviceStatus, GatewayError, PaymentGateway,
};
use crate::service::OrderService;
use crate::store::MemoryStore;

pub const TAX_RATE: &str = "0.08";

pub fn dec(value: &str) -> Decimal {
    value.parse().unwrap()
}

pub fn tenant() -> TenantId {
    TenantId::generate()
}

pub fn identity(tenant_id: TenantId) -> Identity {
    Identity::new(tenant_id, Actor::new("staff-1"))
}

/// A `new` order for two burgers, stored at `version`.
pub fn order(tenant_id: TenantId, version: i64) -> Order {
    let mut order = Order {
        id: OrderId::generate(),
        tenant_id,
        status: OrderStatus::New,
        items: vec![LineItem {
            menu_item_id: "burger".into(),
            name: "Burger".to_string(),
            quantity: 2,
            unit_price: dec("12.50"),
            add_ons: smallvec![],
        }],
        customer: CustomerContact::default(),
        tax_rate: dec(TAX_RATE),
        subtotal: Decimal::ZERO,
        tax: Decimal::ZERO,
        tip: Decimal::ZERO,
        total: Decimal::ZERO,
        version,
        created_at: OffsetDateTime::now_utc(),
        fire_at: None,
        audit_log: Vec::new(),
    };
    order.recompute_totals().unwrap();
    order
}

pub fn cash_attempt(order: &Order) -> PaymentAttempt {
    let now = OffsetDateTime::now_utc();
    PaymentAttempt {
        id: PaymentId::generate(),
        tenant_id: order.tenant_id,
        order_id: order.id,
        method: PaymentMethod::Cash,
        amount: order.total,
        state: PaymentState::AwaitingCash,
        idempotency_key: uuid::Uuid::now_v7().to_string(),
        attempt_count: 1,
        last_error: None,
        gateway_reference: None,
        source_token: None,
        device_id: None,
        history: VecDeque::new(),
        version: 1,
        created_at: now,
        updated_at: now,
    }
}

/// Burger 12.50 (cheese 1.25, bacon 2.00), fries 4.00, soda 2.25 and an
/// unavailable special.
pub fn catalog(tenant_id: TenantId) -> MemoryCatalog {
    let catalog = MemoryCatalog::new();
    let entry = |name: &str, price: &str, available: bool, add_ons: &[(&str, &str, &str)]| {
        MenuEntry {
            name: name.to_string(),
            price: dec(price),
            available,
            add_ons: add_ons
                .iter()
                .map(|(id, name, price)| {
                    (
                        (*id).into(),
                        AddOnEntry {
                            name: name.to_string(),
                            price: dec(price),
                        },
                    )
                })
                .collect(),
        }
    };
    catalog.insert(
        tenant_id,
        "burger",
        entry(
            "Burger",
            "12.50",
            true,
            &[("cheese", "Cheese", "1.25"), ("bacon", "Bacon", "2.00")],
        ),
    );
    catalog.insert(tenant_id, "fries", entry("Fries", "4.00", true, &[]));
    catalog.insert(tenant_id, "soda", entry("Soda", "2.25", true, &[]));
    catalog.insert(tenant_id, "special", entry("Special", "30.00", false, &[]));
    catalog
}

pub fn line(menu_item_id: &str, quantity: u32, add_ons: &[&str]) -> LineItemRequest {
    LineItemRequest {
        menu_item_id: menu_item_id.into(),
        quantity,
        add_ons: add_ons.iter().map(|a| (*a).into()).collect(),
    }
}

pub fn create_request(items: Vec<LineItemRequest>) -> CreateOrderRequest {
    CreateOrderRequest {
        items,
        customer: CustomerContact::default(),
        tip: None,
        fire_at: None,
    }
}

/// How the scripted gateway answers one call.
#[derive(Debug, Clone)]
pub enum Script {
    Succeed,
    Fail(GatewayError),
    /// Never answers; the caller's timeout fires.
    Hang,
    /// Performs the operation, then never answers.
    SucceedThenHang,
}

#[derive(Default)]
struct GatewayState {
    scripts: HashMap<GatewayOperation, VecDeque<Script>>,
    device_statuses: VecDeque<Result<DeviceStatus, GatewayError>>,
    /// Idempotency key to authorization reference.
    authorizations: HashMap<String, String>,
    captured: HashSet<String>,
    checkouts: HashMap<String, String>,
    cancelled: Vec<String>,
    calls: HashMap<GatewayOperation, usize>,
    next_reference: u32,
}

impl GatewayState {
    fn next_script(&mut self, operation: GatewayOperation) -> Script {
        *self.calls.entry(operation).or_default() += 1;
        self.scripts
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Script::Succeed)
    }

    fn reference(&mut self, prefix: &str) -> String {
        self.next_reference += 1;
        format!("{prefix}_{}", self.next_reference)
    }
}

/// In-memory gateway that deduplicates by idempotency key like a real one.
#[derive(Default)]
pub struct ScriptedGateway {
    state: Mutex<GatewayState>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, operation: GatewayOperation, script: Script) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .entry(operation)
            .or_default()
            .push_back(script);
    }

    pub fn push_device_status(&self, status: Result<DeviceStatus, GatewayError>) {
        self.state.lock().unwrap().device_statuses.push_back(status);
    }

    /// Distinct authorizations, i.e. holds placed on the card.
    pub fn authorizations(&self) -> usize {
        self.state.lock().unwrap().authorizations.len()
    }

    /// Distinct captures, i.e. actual charges.
    pub fn charges(&self) -> usize {
        self.state.lock().unwrap().captured.len()
    }

    /// Distinct device checkouts opened on the terminal.
    pub fn checkouts(&self) -> usize {
        self.state.lock().unwrap().checkouts.len()
    }

    pub fn calls(&self, operation: GatewayOperation) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(&operation)
            .copied()
            .unwrap_or_default()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled.clone()
    }

    async fn answer<T>(script: Script, value: T) -> Result<T, GatewayError> {
        match script {
            Script::Succeed => Ok(value),
            Script::Fail(e) => Err(e),
            Script::Hang | Script::SucceedThenHang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn authorize(&self, request: &AuthorizeRequest) -> Result<String, GatewayError> {
        let (script, reference) = {
            let mut state = self.state.lock().unwrap();
            let script = state.next_script(GatewayOperation::Authorize);
            let reference = match script {
                Script::Succeed | Script::SucceedThenHang => {
                    let existing = state.authorizations.get(&request.idempotency_key).cloned();
                    let reference = existing.unwrap_or_else(|| state.reference("auth"));
                    state
                        .authorizations
                        .insert(request.idempotency_key.clone(), reference.clone());
                    reference
                }
                _ => String::new(),
            };
            (script, reference)
        };
        Self::answer(script, reference).await
    }

    async fn capture(
        &self,
        reference: &str,
        _idempotency_key: &str,
        _amount: Decimal,
    ) -> Result<(), GatewayError> {
        let script = {
            let mut state = self.state.lock().unwrap();
            let script = state.next_script(GatewayOperation::Capture);
            if matches!(script, Script::Succeed | Script::SucceedThenHang) {
                state.captured.insert(reference.to_string());
            }
            script
        };
        Self::answer(script, ()).await
    }

    async fn cancel(&self, reference: &str) -> Result<(), GatewayError> {
        let script = {
            let mut state = self.state.lock().unwrap();
            let script = state.next_script(GatewayOperation::Cancel);
            if matches!(script, Script::Succeed | Script::SucceedThenHang) {
                state.cancelled.push(reference.to_string());
            }
            script
        };
        Self::answer(script, ()).await
    }

    async fn start_device_checkout(
        &self,
        request: &DeviceCheckoutRequest,
    ) -> Result<String, GatewayError> {
        let (script, reference) = {
            let mut state = self.state.lock().unwrap();
            let script = state.next_script(GatewayOperation::DeviceCheckout);
            let existing = state.checkouts.get(&request.idempotency_key).cloned();
            let reference = existing.unwrap_or_else(|| state.reference("chk"));
            state
                .checkouts
                .insert(request.idempotency_key.clone(), reference.clone());
            (script, reference)
        };
        Self::answer(script, reference).await
    }

    async fn device_status(&self, _reference: &str) -> Result<DeviceStatus, GatewayError> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(GatewayOperation::DeviceStatus).or_default() += 1;
        state
            .device_statuses
            .pop_front()
            .unwrap_or(Ok(DeviceStatus::Waiting))
    }
}

/// Every engine component wired to in-memory doubles.
pub struct Harness {
    pub tenant_id: TenantId,
    pub identity: Identity,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<ScriptedGateway>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub policy: PolicyStore<EnginePolicy>,
    pub tenants: PolicyStore<TenantDirectory>,
    pub payments: PaymentService,
    pub service: OrderService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(EnginePolicy::default())
    }

    pub fn with_policy(policy: EnginePolicy) -> Self {
        let tenant_id = tenant();
        let policy = PolicyStore::new(policy);
        let tenants = PolicyStore::new(TenantDirectory::from_iter([TenantConfig::new(
            tenant_id,
            "Harbor Grill".to_string(),
            b"secret".to_vec(),
            dec(TAX_RATE),
        )]));
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(ScriptedGateway::new());
        let broadcaster = Arc::new(EventBroadcaster::new(policy.clone()));
        let payments = PaymentService::new(
            store.clone(),
            gateway.clone(),
            broadcaster.clone(),
            policy.clone(),
        );
        let service = OrderService::new(
            store.clone(),
            Arc::new(catalog(tenant_id)),
            payments.clone(),
            broadcaster.clone(),
            tenants.clone(),
        );
        Self {
            tenant_id,
            identity: identity(tenant_id),
            store,
            gateway,
            broadcaster,
            policy,
            tenants,
            payments,
            service,
        }
    }

    /// A stored `new` order for two burgers (25.00 + 2.00 tax).
    pub async fn order(&self) -> Order {
        self.service
            .create_order(&self.identity, create_request(vec![line("burger", 2, &[])]))
            .await
            .unwrap()
    }
}

/// Let spawned tasks run while the paused clock moves forward by `by`.
pub async fn advance(by: Duration) {
    let step = Duration::from_millis(500);
    let mut elapsed = Duration::ZERO;
    while elapsed < by {
        tokio::time::sleep(step).await;
        elapsed += step;
    }
}
