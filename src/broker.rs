//! Broker facade and dispatch workers
//!
//! `Broker` owns one [`OrderEngine`] behind a mutex and a set of tokio
//! workers:
//! - creation worker: drains creation requests and binds returned tickets
//! - cancellation worker: cancels orders or closes positions
//! - event worker: applies streaming transactions in delivery order and
//!   runs reconciliation requests between events
//! - tick worker: forwards live ticks to the owner
//!
//! The engine lock is never held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BrokerConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::oms::{Command, CreateRequest, Notification, Order, OrderEngine, OrderRequest, Position};
use crate::reconcile::ReconcileReport;
use crate::terminal::{LiveTick, Terminal};
use crate::types::{OrderId, OrderStatus, Side, Symbol, Ticket};

type CreateQueue = mpsc::UnboundedReceiver<Option<CreateRequest>>;
type CancelQueue = mpsc::UnboundedReceiver<Option<OrderId>>;

/// Requests handled by the event worker between two transactions
enum Control {
    Reconcile(oneshot::Sender<BrokerResult<ReconcileReport>>),
    Shutdown,
}

/// State shared by the broker and its workers
struct Shared<T> {
    terminal: Arc<T>,
    engine: Mutex<OrderEngine>,
    create_tx: mpsc::UnboundedSender<Option<CreateRequest>>,
    cancel_tx: mpsc::UnboundedSender<Option<OrderId>>,
}

impl<T: Terminal> Shared<T> {
    fn engine(&self) -> MutexGuard<'_, OrderEngine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` under the engine lock, then dispatch the commands it produced
    fn with_engine<R>(self: &Arc<Self>, f: impl FnOnce(&mut OrderEngine) -> R) -> R {
        let (result, commands) = {
            let mut engine = self.engine();
            let result = f(&mut engine);
            (result, engine.take_commands())
        };
        self.dispatch(commands);
        result
    }

    fn dispatch(self: &Arc<Self>, commands: Vec<Command>) {
        for command in commands {
            match command {
                Command::Create(request) => {
                    if self.create_tx.send(Some(request)).is_err() {
                        warn!("Creation queue closed, request dropped");
                    }
                }
                Command::Cancel(id) => {
                    if self.cancel_tx.send(Some(id)).is_err() {
                        warn!(id, "Cancellation queue closed, request dropped");
                    }
                }
                Command::RefreshBalance => match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        let shared = Arc::clone(self);
                        handle.spawn(async move {
                            if let Err(e) = shared.refresh_balance().await {
                                shared.with_engine(|engine| engine.alert(e));
                            }
                        });
                    }
                    Err(_) => debug!("No runtime, balance refresh skipped"),
                },
            }
        }
    }

    async fn refresh_balance(self: &Arc<Self>) -> BrokerResult<()> {
        let balance = self.terminal.fetch_balance().await?;
        debug!(balance = balance.balance, equity = balance.equity, "Balance updated");
        self.engine().set_balance(balance);
        Ok(())
    }

    /// Fetch a snapshot and replay it under the engine lock
    async fn reconcile(self: &Arc<Self>) -> BrokerResult<ReconcileReport> {
        let positions = self.terminal.fetch_positions().await?;
        let orders = self.terminal.fetch_orders().await?;
        Ok(self.with_engine(|engine| engine.reconcile(&positions, &orders)))
    }
}

/// Order entry and state queries for the owning strategy
pub struct Broker<T: Terminal> {
    shared: Arc<Shared<T>>,
    config: BrokerConfig,
    create_rx: Option<CreateQueue>,
    cancel_rx: Option<CancelQueue>,
    control_tx: Option<mpsc::UnboundedSender<Control>>,
    tick_rx: Mutex<mpsc::UnboundedReceiver<LiveTick>>,
    tick_tx: mpsc::UnboundedSender<LiveTick>,
    workers: Vec<JoinHandle<()>>,
    tick_worker: Option<JoinHandle<()>>,
}

impl<T: Terminal> Broker<T> {
    pub fn new(terminal: Arc<T>, config: BrokerConfig) -> Self {
        let (create_tx, create_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();

        Self {
            shared: Arc::new(Shared {
                terminal,
                engine: Mutex::new(OrderEngine::new(config.commission_multiplier)),
                create_tx,
                cancel_tx,
            }),
            config,
            create_rx: Some(create_rx),
            cancel_rx: Some(cancel_rx),
            control_tx: None,
            tick_rx: Mutex::new(tick_rx),
            tick_tx,
            workers: Vec::new(),
            tick_worker: None,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Check the account, load the balance, optionally rebuild from the
    /// terminal and start the workers
    ///
    /// Returns the reconciliation report when a rebuild ran.
    pub async fn start(&mut self) -> BrokerResult<Option<ReconcileReport>> {
        if self.create_rx.is_none() || self.cancel_rx.is_none() {
            warn!("Broker already started");
            return Ok(None);
        }

        self.shared.terminal.check_account().await?;
        self.shared.refresh_balance().await?;

        let report = if self.config.rebuild {
            Some(self.shared.reconcile().await?)
        } else {
            None
        };

        let (Some(create_rx), Some(cancel_rx)) = (self.create_rx.take(), self.cancel_rx.take())
        else {
            return Ok(report);
        };
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        self.control_tx = Some(control_tx);

        self.workers.push(tokio::spawn(create_worker(
            Arc::clone(&self.shared),
            create_rx,
        )));
        self.workers.push(tokio::spawn(cancel_worker(
            Arc::clone(&self.shared),
            cancel_rx,
        )));
        self.workers.push(tokio::spawn(event_worker(
            Arc::clone(&self.shared),
            control_rx,
        )));
        self.tick_worker = Some(tokio::spawn(tick_worker(
            Arc::clone(&self.shared),
            self.tick_tx.clone(),
        )));

        info!(rebuild = self.config.rebuild, "Broker started");
        Ok(report)
    }

    /// Re-run reconciliation after the transport reconnected
    ///
    /// The rebuild is serialized with the event stream when the event worker
    /// is running.
    pub async fn reconnect(&self) -> BrokerResult<ReconcileReport> {
        self.shared.terminal.check_account().await?;

        if let Some(control) = &self.control_tx {
            let (reply_tx, reply_rx) = oneshot::channel();
            if control.send(Control::Reconcile(reply_tx)).is_ok() {
                if let Ok(result) = reply_rx.await {
                    return result;
                }
            }
            debug!("Event worker gone, reconciling directly");
        }
        self.shared.reconcile().await
    }

    /// Close the queues and wait for the workers to finish
    pub async fn stop(&mut self) {
        let _ = self.shared.create_tx.send(None);
        let _ = self.shared.cancel_tx.send(None);
        if let Some(control) = self.control_tx.take() {
            let _ = control.send(Control::Shutdown);
        }
        if let Some(tick_worker) = self.tick_worker.take() {
            tick_worker.abort();
        }
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                error!("Worker ended abnormally: {}", e);
            }
        }
        info!("Broker stopped");
    }

    pub fn buy(&self, request: OrderRequest) -> BrokerResult<Order> {
        self.submit_order(Side::Buy, request)
    }

    pub fn sell(&self, request: OrderRequest) -> BrokerResult<Order> {
        self.submit_order(Side::Sell, request)
    }

    fn submit_order(&self, side: Side, request: OrderRequest) -> BrokerResult<Order> {
        self.shared
            .with_engine(|engine| engine.create_order(side, request))
    }

    /// Request cancellation; unknown and finished orders are ignored
    pub fn cancel(&self, id: OrderId) {
        self.shared.with_engine(|engine| engine.request_cancel(id));
    }

    pub fn poll_notification(&self) -> Option<Notification> {
        self.shared.engine().next_notification()
    }

    /// Mark a processing boundary in the notification queue
    pub fn mark_boundary(&self) {
        self.shared.engine().mark_boundary();
    }

    /// Drain transport, protocol and consistency alerts
    pub fn take_alerts(&self) -> Vec<BrokerError> {
        self.shared.engine().take_alerts()
    }

    pub fn poll_tick(&self) -> Option<LiveTick> {
        self.tick_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_recv()
            .ok()
    }

    pub fn position(&self, symbol: &Symbol) -> Position {
        self.shared.engine().position(symbol)
    }

    pub fn open_positions(&self) -> Vec<(Symbol, Position)> {
        self.shared.engine().open_positions()
    }

    /// Cash balance as last reported by the terminal
    pub fn cash(&self) -> f64 {
        self.shared.engine().balance().balance
    }

    /// Account equity as last reported by the terminal
    pub fn value(&self) -> f64 {
        self.shared.engine().balance().equity
    }

    pub fn order(&self, id: OrderId) -> Option<Order> {
        self.shared.engine().order(id).cloned()
    }

    pub fn order_status(&self, id: OrderId) -> Option<OrderStatus> {
        self.shared.engine().order(id).map(|o| o.status)
    }

    /// Ticket the terminal assigned to `id`, once the creation reply arrived
    pub fn ticket(&self, id: OrderId) -> Option<Ticket> {
        self.shared.engine().ticket(id)
    }
}

async fn create_worker<T: Terminal>(shared: Arc<Shared<T>>, mut queue: CreateQueue) {
    while let Some(Some(create)) = queue.recv().await {
        let id = create.id;
        match shared.terminal.create_order(&create.request).await {
            Ok(reply) if !reply.error => match reply.order {
                Some(ticket) => {
                    shared.with_engine(|engine| engine.bind_ticket(id, ticket, create.remote_type))
                }
                None => shared.with_engine(|engine| {
                    engine.creation_failed(
                        id,
                        BrokerError::Protocol {
                            id,
                            description: "reply carries no ticket".to_string(),
                        },
                    )
                }),
            },
            Ok(reply) => shared.with_engine(|engine| {
                engine.creation_failed(
                    id,
                    BrokerError::Protocol {
                        id,
                        description: reply.description,
                    },
                )
            }),
            Err(e) => shared.with_engine(|engine| engine.creation_failed(id, e.into())),
        }
    }
    debug!("Creation worker stopped");
}

async fn cancel_worker<T: Terminal>(shared: Arc<Shared<T>>, mut queue: CancelQueue) {
    while let Some(Some(id)) = queue.recv().await {
        let target = shared.engine().cancel_target(id);
        let Some(target) = target else {
            debug!(id, "Cannot cancel order without a ticket");
            continue;
        };

        let result = if target.close_position {
            shared
                .terminal
                .close_position(target.ticket, &target.symbol)
                .await
        } else {
            shared
                .terminal
                .cancel_order(target.ticket, &target.symbol)
                .await
        };

        let failure = match result {
            Ok(reply) if !reply.error => None,
            Ok(reply) => Some(reply.description),
            Err(e) => Some(e.to_string()),
        };
        shared.with_engine(|engine| match failure {
            None => engine.cancel_sent(&target),
            Some(reason) => engine.alert(BrokerError::CancelFailed {
                id,
                ticket: target.ticket,
                reason,
            }),
        });
    }
    debug!("Cancellation worker stopped");
}

async fn event_worker<T: Terminal>(
    shared: Arc<Shared<T>>,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    loop {
        tokio::select! {
            biased;

            request = control.recv() => match request {
                Some(Control::Reconcile(reply)) => {
                    let result = shared.reconcile().await;
                    if let Err(e) = &result {
                        warn!("Reconciliation failed: {}", e);
                    }
                    let _ = reply.send(result);
                }
                Some(Control::Shutdown) | None => break,
            },

            event = shared.terminal.next_event() => match event {
                Some(Ok(event)) => shared.with_engine(|engine| engine.apply_transaction(&event)),
                Some(Err(e)) => shared.with_engine(|engine| engine.alert(e.into())),
                None => {
                    info!("Event stream closed");
                    break;
                }
            },
        }
    }
    debug!("Event worker stopped");
}

async fn tick_worker<T: Terminal>(shared: Arc<Shared<T>>, ticks: mpsc::UnboundedSender<LiveTick>) {
    while let Some(tick) = shared.terminal.next_tick().await {
        match tick {
            Ok(tick) => {
                if ticks.send(tick).is_err() {
                    break;
                }
            }
            Err(e) => shared.with_engine(|engine| engine.alert(e.into())),
        }
    }
    debug!("Tick worker stopped");
}
