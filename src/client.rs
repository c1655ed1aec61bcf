//! Realtime client tying the registry, scheduler, tracker and transport
//! together.

use crate::connection::ConnectionTracker;
use crate::error::{RealtimeError, Result};
use crate::handlers::{deliver_change, guarded, ErrorHandler};
use crate::reconnect::{ReconnectPolicy, ReconnectScheduler, ScheduleDecision};
use crate::signal::{ChannelMessage, Signal};
use crate::subscriptions::{SubscriptionConfig, SubscriptionInfo, SubscriptionRegistry};
use crate::timer::{ThreadTimer, Timer, TimerFire, TimerToken};
use crate::transport::{ChannelBinding, ChannelSink, SystemSink, Transport};
use crate::types::{
    ChangeEvent, ChannelStatus, ConnectionState, ListenerId, SubscriptionId, SubscriptionStatus,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How often an idle dispatcher thread checks for a stop request.
const DISPATCH_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Client configuration.
#[derive(Clone, Debug)]
pub struct RealtimeConfig {
    /// Backoff for per-subscription reconnection.
    pub reconnect: ReconnectPolicy,

    /// Debounce window of the global sweep (None = `reconnect.base_delay`).
    pub sweep_delay: Option<Duration>,

    /// Prefix for transport channel names.
    /// Default: "realtime"
    pub channel_prefix: String,

    /// Schema used when a subscription does not name one.
    /// Default: "public"
    pub default_schema: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            sweep_delay: None,
            channel_prefix: "realtime".to_string(),
            default_schema: "public".to_string(),
        }
    }
}

impl RealtimeConfig {
    pub fn sweep_delay(&self) -> Duration {
        self.sweep_delay.unwrap_or(self.reconnect.base_delay)
    }
}

/// Everything guarded by the client's state lock.
struct ClientState {
    registry: SubscriptionRegistry,
    scheduler: ReconnectScheduler,
}

/// The realtime subscription layer.
///
/// Provides a unified interface for:
/// - Subscribing to data-change events with at most one channel per identity
/// - Tracking transport-wide connection state
/// - Recovering failed subscriptions with bounded backoff
///
/// Transport and timer activity arrives as [`Signal`]s in a single inbox.
/// Drive it with [`spawn_dispatcher`](Self::spawn_dispatcher) in an
/// application, or with [`process_pending`](Self::process_pending) from a
/// test. Use one driver at a time so per-channel signal order is kept.
/// Caller handlers are never invoked while internal locks are held, so they
/// may call back into the client.
pub struct RealtimeClient {
    config: RealtimeConfig,
    transport: Arc<dyn Transport>,
    timer: Arc<dyn Timer>,
    state: Mutex<ClientState>,
    tracker: ConnectionTracker,
    inbox_tx: Sender<Signal>,
    inbox_rx: Receiver<Signal>,
    next_token: AtomicU64,
}

impl RealtimeClient {
    /// Create a client and open the transport's system channel.
    pub fn new(
        config: RealtimeConfig,
        transport: Arc<dyn Transport>,
        timer: Arc<dyn Timer>,
    ) -> Result<Arc<Self>> {
        let (inbox_tx, inbox_rx) = unbounded();
        transport.open_system_channel(SystemSink::new(inbox_tx.clone()))?;

        let scheduler = ReconnectScheduler::new(config.reconnect.clone());

        Ok(Arc::new(Self {
            config,
            transport,
            timer,
            state: Mutex::new(ClientState {
                registry: SubscriptionRegistry::new(),
                scheduler,
            }),
            tracker: ConnectionTracker::new(),
            inbox_tx,
            inbox_rx,
            next_token: AtomicU64::new(1),
        }))
    }

    /// Create a client backed by a [`ThreadTimer`].
    pub fn with_thread_timer(
        config: RealtimeConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>> {
        let timer = Arc::new(ThreadTimer::start()?);
        Self::new(config, transport, timer)
    }

    // --- Subscriptions ---

    /// Subscribe to changes described by `config`.
    ///
    /// Returns the subscription identity. If the identity is already
    /// registered the existing one is returned and no channel is opened.
    /// Only an invalid configuration is an error; transport failures are
    /// reported through `on_error` and the subscription's status.
    pub fn subscribe(&self, config: SubscriptionConfig) -> Result<SubscriptionId> {
        config.validate()?;

        let id = config.identity();
        let binding = config.binding(&self.config.default_schema);

        let generation = {
            let mut state = self.state.lock();
            match state.registry.insert_pending(id.clone(), config) {
                Some(generation) => generation,
                None => {
                    tracing::warn!(subscription = %id, "already subscribed; reusing existing subscription");
                    return Ok(id);
                }
            }
        };

        tracing::debug!(subscription = %id, generation, "opening channel");
        self.open_channel(&id, generation, &binding);
        Ok(id)
    }

    /// Remove a subscription and release its channel.
    ///
    /// Returns false for an unknown identity. A reconnection timer that
    /// fires afterwards finds no entry and does nothing.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        let entry = {
            let mut state = self.state.lock();
            let Some(entry) = state.registry.remove(id) else {
                return false;
            };
            if let Some(token) = state.scheduler.forget(id) {
                self.timer.cancel(token);
            }
            entry
        };

        if let Some(handle) = entry.channel {
            self.transport.close_channel(handle);
        }
        tracing::info!(subscription = %id, "unsubscribed");
        true
    }

    /// Remove every subscription. Returns how many were removed.
    pub fn unsubscribe_all(&self) -> usize {
        let entries = {
            let mut state = self.state.lock();
            for token in state.scheduler.forget_all() {
                self.timer.cancel(token);
            }
            state.registry.drain()
        };

        let count = entries.len();
        for handle in entries.iter().filter_map(|e| e.channel) {
            self.transport.close_channel(handle);
        }
        if count > 0 {
            tracing::info!(count, "unsubscribed all subscriptions");
        }
        count
    }

    pub fn get_status(&self, id: &SubscriptionId) -> Option<SubscriptionStatus> {
        self.state.lock().registry.status(id)
    }

    /// Last channel or open failure, cleared once the channel subscribes.
    pub fn last_error(&self, id: &SubscriptionId) -> Option<RealtimeError> {
        self.state
            .lock()
            .registry
            .get(id)
            .and_then(|e| e.last_error.clone())
    }

    /// Reconnection attempts made since the last successful subscription.
    pub fn reconnect_attempts(&self, id: &SubscriptionId) -> u32 {
        self.state.lock().scheduler.attempts(id)
    }

    pub fn subscription_info(&self, id: &SubscriptionId) -> Option<SubscriptionInfo> {
        let state = self.state.lock();
        let attempts = state.scheduler.attempts(id);
        let retry_delay = state.scheduler.pending_delay(id);
        state.registry.get(id).map(|e| e.info(attempts, retry_delay))
    }

    /// Snapshot of every subscription, sorted by identity.
    pub fn list_subscriptions(&self) -> Vec<SubscriptionInfo> {
        let state = self.state.lock();
        let mut infos: Vec<SubscriptionInfo> = state
            .registry
            .iter()
            .map(|e| {
                e.info(
                    state.scheduler.attempts(&e.id),
                    state.scheduler.pending_delay(&e.id),
                )
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().registry.len()
    }

    // --- Connection state ---

    pub fn get_connection_state(&self) -> ConnectionState {
        self.tracker.current()
    }

    /// Register a listener. It is invoked right away with the current state.
    pub fn add_connection_state_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.tracker.add_listener(Arc::new(listener))
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn remove_connection_state_listener(&self, id: ListenerId) -> bool {
        self.tracker.remove_listener(id)
    }

    /// Re-arm the debounced sweep over every subscription in `ERROR`.
    pub fn attempt_reconnect_all(&self) {
        let mut state = self.state.lock();
        let token = self.next_token();
        if let Some(previous) = state.scheduler.arm_sweep(token) {
            self.timer.cancel(previous);
        }
        let delay = self.config.sweep_delay();
        tracing::debug!(delay_ms = delay.as_millis() as u64, "reconnection sweep armed");
        self.arm(token, delay, Signal::SweepDue { token });
    }

    // --- Event loop ---

    /// Handle every signal already in the inbox. Returns how many.
    pub fn process_pending(&self) -> usize {
        let mut handled = 0;
        while let Ok(signal) = self.inbox_rx.try_recv() {
            self.handle_signal(signal);
            handled += 1;
        }
        handled
    }

    /// Wait up to `timeout` for one signal and handle it.
    pub fn process_next(&self, timeout: Duration) -> bool {
        match self.inbox_rx.recv_timeout(timeout) {
            Ok(signal) => {
                self.handle_signal(signal);
                true
            }
            Err(_) => false,
        }
    }

    /// Run the event loop on a dedicated thread.
    pub fn spawn_dispatcher(self: &Arc<Self>) -> Result<Dispatcher> {
        let client = Arc::clone(self);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("realtime-dispatch".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::Acquire) {
                    client.process_next(DISPATCH_POLL_INTERVAL);
                }
            })
            .map_err(|e| RealtimeError::Thread(e.to_string()))?;

        Ok(Dispatcher {
            stop,
            handle: Some(handle),
        })
    }

    /// Handle one signal.
    pub fn handle_signal(&self, signal: Signal) {
        match signal {
            Signal::Channel {
                id,
                generation,
                message: ChannelMessage::Status(status),
            } => self.on_channel_status(&id, generation, status),
            Signal::Channel {
                id,
                generation,
                message: ChannelMessage::Change(event),
            } => self.on_channel_change(&id, generation, &event),
            Signal::System(raw) => self.on_system_status(&raw),
            Signal::ReconnectDue { id, token } => self.on_reconnect_due(&id, token),
            Signal::SweepDue { token } => self.on_sweep_due(token),
        }
    }

    fn on_channel_status(&self, id: &SubscriptionId, generation: u64, status: ChannelStatus) {
        if status.is_failure() {
            tracing::warn!(subscription = %id, %status, "channel failed");
            self.fail(id, generation, RealtimeError::Channel(status));
            return;
        }

        let mut state = self.state.lock();
        if !state.registry.mark_subscribed(id, generation) {
            tracing::debug!(subscription = %id, generation, "ignoring status from stale channel");
            return;
        }
        if let Some(token) = state.scheduler.reset(id) {
            self.timer.cancel(token);
        }
        tracing::info!(subscription = %id, "subscribed");
    }

    fn on_channel_change(&self, id: &SubscriptionId, generation: u64, event: &ChangeEvent) {
        let (on_change, on_error) = {
            let state = self.state.lock();
            match state.registry.get(id) {
                Some(entry) if entry.generation == generation => (
                    entry.config.on_change.clone(),
                    entry.config.on_error.clone(),
                ),
                _ => {
                    tracing::debug!(subscription = %id, generation, "dropping change from stale channel");
                    return;
                }
            }
        };

        let Some(on_change) = on_change else {
            return;
        };
        if let Err(error) = deliver_change(&on_change, event) {
            tracing::error!(subscription = %id, table = %event.table, "change handler failed: {}", error);
            if let Some(on_error) = on_error {
                notify_error(&on_error, id, &error);
            }
        }
    }

    fn on_system_status(&self, raw: &str) {
        if let Some(next) = self.tracker.apply_raw(raw) {
            if next.is_degraded() {
                self.attempt_reconnect_all();
            }
        }
    }

    fn on_reconnect_due(&self, id: &SubscriptionId, token: TimerToken) {
        let (generation, old, config, attempt) = {
            let mut state = self.state.lock();
            match state.registry.status(id) {
                Some(SubscriptionStatus::Error) => {}
                Some(status) => {
                    tracing::debug!(subscription = %id, %status, "reconnection no longer needed");
                    return;
                }
                None => {
                    tracing::debug!(subscription = %id, "reconnection timer fired after unsubscribe");
                    return;
                }
            }
            let Some(attempt) = state.scheduler.take_due(id, token) else {
                tracing::debug!(subscription = %id, ?token, "ignoring superseded reconnection timer");
                return;
            };
            let Some((generation, old, config)) = state.registry.begin_replacement(id) else {
                return;
            };
            (generation, old, config, attempt)
        };

        if let Some(handle) = old {
            self.transport.close_channel(handle);
        }

        tracing::info!(subscription = %id, attempt, "reopening channel");
        let binding = config.binding(&self.config.default_schema);
        if self.open_channel(id, generation, &binding) {
            if let Some(on_reconnect) = config.on_reconnect {
                if let Err(panic) = guarded(|| on_reconnect(id, attempt)) {
                    tracing::error!(subscription = %id, "reconnect handler failed: {}", panic);
                }
            }
        }
    }

    fn on_sweep_due(&self, token: TimerToken) {
        let mut state = self.state.lock();
        if !state.scheduler.take_sweep(token) {
            return;
        }

        let failed = state.registry.ids_with_status(SubscriptionStatus::Error);
        tracing::info!(count = failed.len(), "reconnection sweep");
        for id in &failed {
            self.schedule_reconnect(&mut state, id);
        }
    }

    // --- Helpers ---

    /// Open a channel for `generation` of `id` and attach it.
    ///
    /// A transport failure is handled like `CHANNEL_ERROR`. Returns whether
    /// the new channel is now serving the subscription.
    fn open_channel(&self, id: &SubscriptionId, generation: u64, binding: &ChannelBinding) -> bool {
        let name = format!("{}:{}", self.config.channel_prefix, id);
        let sink = ChannelSink::new(id.clone(), generation, self.inbox_tx.clone());

        match self.transport.open_channel(&name, binding, sink) {
            Ok(handle) => {
                let attached = self.state.lock().registry.attach_channel(id, generation, handle);
                if !attached {
                    tracing::debug!(subscription = %id, "subscription changed while channel was opening; closing it");
                    self.transport.close_channel(handle);
                }
                attached
            }
            Err(error) => {
                tracing::warn!(subscription = %id, "failed to open channel: {}", error);
                self.fail(id, generation, error);
                false
            }
        }
    }

    /// Move `id` to `ERROR`, schedule a reconnection, then tell `on_error`.
    fn fail(&self, id: &SubscriptionId, generation: u64, error: RealtimeError) {
        let on_error = {
            let mut state = self.state.lock();
            if !state.registry.mark_error(id, generation, error.clone()) {
                tracing::debug!(subscription = %id, generation, "ignoring failure of stale channel");
                return;
            }
            let on_error: Option<ErrorHandler> =
                state.registry.get(id).and_then(|e| e.config.on_error.clone());
            self.schedule_reconnect(&mut state, id);
            on_error
        };

        if let Some(on_error) = on_error {
            notify_error(&on_error, id, &error);
        }
    }

    fn schedule_reconnect(&self, state: &mut ClientState, id: &SubscriptionId) {
        let token = self.next_token();
        match state.scheduler.schedule(id, token) {
            ScheduleDecision::Scheduled { delay, .. } => self.arm(
                token,
                delay,
                Signal::ReconnectDue {
                    id: id.clone(),
                    token,
                },
            ),
            ScheduleDecision::Exhausted { attempts } => {
                state.registry.mark_exhausted(id, attempts);
            }
            ScheduleDecision::GaveUp => {
                let attempts = state.scheduler.attempts(id);
                state.registry.mark_exhausted(id, attempts);
            }
            ScheduleDecision::AlreadyPending => {}
        }
    }

    fn arm(&self, token: TimerToken, delay: Duration, signal: Signal) {
        self.timer
            .schedule(token, delay, TimerFire::new(signal, self.inbox_tx.clone()));
    }

    fn next_token(&self) -> TimerToken {
        TimerToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }
}

fn notify_error(on_error: &ErrorHandler, id: &SubscriptionId, error: &RealtimeError) {
    if let Err(panic) = guarded(|| on_error(id, error)) {
        tracing::error!(subscription = %id, "error handler failed: {}", panic);
    }
}

/// Handle to a running dispatcher thread. Stops the thread on drop.
pub struct Dispatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Stop the thread and wait for it to exit. Fails if the thread died
    /// from a panic.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Release);
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| {
                tracing::error!("dispatcher thread panicked");
                RealtimeError::Thread("dispatcher thread panicked".to_string())
            }),
            None => Ok(()),
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
