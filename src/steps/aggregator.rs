use std::{num::NonZeroU32, sync::Arc};

use anyhow::Result;
use chrono::{Local, NaiveDate, Utc};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use uuid::Uuid;

use crate::{
    analytics::{self, StepSummary},
    connectors::{Connector, ConnectorSet, DeviceStream, RedirectConnector, StepConnector},
    db::{DailyStepRecord, UserGoalSettings},
    error::{ConnectorError, TrackerError},
    models::{StepReading, StepSource},
    settings::AggregatorConfig,
    store::StepStore,
};

use super::{
    events::{AggregatorEvent, StepSnapshot},
    state::{AggregatorState, ConnectionState, PendingRedirect},
};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "stride::steps";

use crate::{log_debug, log_error, log_info, log_warn};

const EVENT_CAPACITY: usize = 64;

type Attempt = JoinHandle<Result<StepReading, ConnectorError>>;

/// Calendar day used as the record key, taken from the local wall clock at write time.
fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Reconciles readings from every source into one daily count for a user session.
///
/// The in-memory count always shows the last reported value. The store keeps the
/// day's maximum. Cloning is cheap; all clones share one session.
#[derive(Clone)]
pub struct StepAggregator {
    user_id: Arc<str>,
    state: Arc<Mutex<AggregatorState>>,
    store: Arc<dyn StepStore>,
    connectors: Arc<ConnectorSet>,
    config: AggregatorConfig,
    events: broadcast::Sender<AggregatorEvent>,
    writes: TaskTracker,
    cancel: CancellationToken,
    background: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl StepAggregator {
    /// Starts a session: loads the goal and today's record, then spawns the
    /// background sync loop and the device stream listener.
    pub async fn start(
        user_id: impl Into<String>,
        store: Arc<dyn StepStore>,
        connectors: ConnectorSet,
        config: AggregatorConfig,
    ) -> Self {
        let user_id: Arc<str> = Arc::from(user_id.into());

        let goal = match store.get_goal_settings(&user_id).await {
            Ok(Some(settings)) => settings.daily_step_goal,
            Ok(None) => config.default_goal,
            Err(err) => {
                log_warn!("failed to load step goal for {}: {err:#}", user_id);
                config.default_goal
            }
        };

        let mut state = AggregatorState::new(goal);
        match store.get_daily_record(&user_id, today()).await {
            Ok(Some(record)) => {
                state.current_steps = record.step_count;
                state.last_source = Some(record.last_source);
            }
            Ok(None) => {}
            Err(err) => log_warn!("failed to load today's steps for {}: {err:#}", user_id),
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let device_stream = connectors.device_stream();

        let aggregator = Self {
            user_id,
            state: Arc::new(Mutex::new(state)),
            store,
            connectors: Arc::new(connectors),
            config,
            events,
            writes: TaskTracker::new(),
            cancel: CancellationToken::new(),
            background: Arc::new(Mutex::new(Vec::new())),
        };

        {
            let mut background = aggregator.background.lock().await;
            background.push(aggregator.spawn_sync_loop());
            if let Some(stream) = device_stream {
                background.push(aggregator.spawn_device_listener(stream));
            }
        }

        log_info!(
            "step session started for {} (goal {}, sync every {}s)",
            aggregator.user_id,
            goal,
            aggregator.config.sync_interval.as_secs()
        );

        aggregator
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AggregatorEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> StepSnapshot {
        let state = self.state.lock().await.clone();
        StepSnapshot {
            user_id: self.user_id.to_string(),
            date: today(),
            goal_progress: state.goal_progress(),
            state,
        }
    }

    pub async fn current_steps(&self) -> u64 {
        self.state.lock().await.current_steps
    }

    pub async fn connection(&self, source: StepSource) -> ConnectionState {
        self.state.lock().await.connection(source)
    }

    pub async fn is_degraded(&self) -> bool {
        self.state.lock().await.degraded
    }

    /// Shows `reading` immediately and persists the day's maximum in the background.
    /// Persistence failures are reported through a notice, never to the caller.
    pub async fn report_reading(&self, reading: StepReading) {
        self.state.lock().await.apply_reading(&reading);
        self.after_reading(reading);
    }

    /// Manual entry works in every state, including degraded.
    pub async fn update_manually(&self, steps: u64) {
        self.report_reading(StepReading::manual(steps)).await;
    }

    pub async fn update_daily_goal(&self, goal: NonZeroU32) {
        self.state.lock().await.daily_goal = goal;
        self.emit(AggregatorEvent::GoalChanged { goal });

        let settings = UserGoalSettings::new(self.user_id.as_ref(), goal);
        match self.store.save_goal_settings(&settings).await {
            Ok(()) => log_info!("daily goal for {} set to {}", self.user_id, goal),
            Err(err) => {
                self.report_failure(
                    TrackerError::PersistenceFailure {
                        source: None,
                        detail: format!("{err:#}"),
                    },
                    false,
                )
                .await
            }
        }
    }

    /// Tries to activate one source. Returns `false` without trying once any
    /// earlier connection has failed this session.
    pub async fn connect_source(&self, source: StepSource) -> bool {
        let Some(connector) = self.connectors.get(source).cloned() else {
            log_warn!("no connector registered for {}", source);
            return false;
        };

        if self.is_degraded().await {
            log_info!(
                "not connecting {}: automatic tracking is off for this session",
                source
            );
            return false;
        }

        match connector {
            Connector::Polled(connector) => self.connect_polled(connector).await,
            Connector::Redirect(connector) => self.launch_redirect(connector).await,
        }
    }

    /// Resumes a redirect connector from its callback route.
    pub async fn complete_redirect(&self, source: StepSource, code: &str, state_token: &str) -> bool {
        let Some(Connector::Redirect(connector)) = self.connectors.get(source).cloned() else {
            log_warn!("{} is not a redirect connector", source);
            return false;
        };

        let generation = {
            let mut state = self.state.lock().await;
            match state.take_pending_redirect(source) {
                Some(pending)
                    if pending.token == state_token && state.accepts(source, pending.generation) =>
                {
                    pending.generation
                }
                Some(_) => {
                    log_warn!("{} callback does not match the pending authorization", source);
                    state.mark_disconnected(source);
                    drop(state);
                    self.emit(AggregatorEvent::ConnectionChanged {
                        source,
                        state: ConnectionState::Disconnected,
                    });
                    return false;
                }
                None => {
                    log_warn!("no pending {} authorization to complete", source);
                    return false;
                }
            }
        };

        let code = code.to_string();
        let attempt = tokio::spawn(async move { connector.complete(&code).await });
        self.settle_attempt(source, generation, attempt).await
    }

    pub async fn history(&self, days: u32) -> Result<Vec<DailyStepRecord>> {
        let (from, to) = analytics::trailing_range(today(), days);
        self.store.list_daily_records(&self.user_id, from, to).await
    }

    pub async fn summary(&self, days: u32) -> Result<StepSummary> {
        let (from, to) = analytics::trailing_range(today(), days);
        let records = self.store.list_daily_records(&self.user_id, from, to).await?;
        let goal = self.state.lock().await.daily_goal;
        Ok(analytics::summarize(&records, goal, from, to))
    }

    /// Waits for every persistence write started so far.
    pub async fn flush(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }

    /// Ends the session: stops background work and drains pending writes.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let handles: Vec<_> = self.background.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    log_error!("background task for {} failed: {err}", self.user_id);
                }
            }
        }

        self.flush().await;
        log_info!("step session ended for {}", self.user_id);
    }

    async fn connect_polled(&self, connector: Arc<dyn StepConnector>) -> bool {
        let source = connector.source();

        if !connector.is_available() {
            self.report_failure(TrackerError::PermissionDenied { source }, false)
                .await;
            return false;
        }

        let Some(generation) = self.begin_connect(source).await else {
            return false;
        };

        let attempt = tokio::spawn(async move { connector.fetch_today().await });
        self.settle_attempt(source, generation, attempt).await
    }

    async fn launch_redirect(&self, connector: Arc<dyn RedirectConnector>) -> bool {
        let source = connector.source();
        let Some(generation) = self.begin_connect(source).await else {
            return false;
        };

        let token = Uuid::new_v4().to_string();
        match connector.authorization_url(&token) {
            Ok(url) => {
                self.state
                    .lock()
                    .await
                    .set_pending_redirect(source, PendingRedirect { token, generation });
                log_info!("handing {} authorization to the browser", source);
                self.emit(AggregatorEvent::RedirectRequested { source, url });
                true
            }
            Err(err) => {
                self.report_failure(TrackerError::from_connector(source, err), true)
                    .await;
                false
            }
        }
    }

    async fn begin_connect(&self, source: StepSource) -> Option<u64> {
        let generation = self.state.lock().await.begin_connect(source)?;
        self.emit(AggregatorEvent::ConnectionChanged {
            source,
            state: ConnectionState::Connecting,
        });
        Some(generation)
    }

    /// Waits for a connector call within the connect timeout. A call that misses
    /// the deadline keeps running; its result is routed through the generation guard.
    async fn settle_attempt(&self, source: StepSource, generation: u64, mut attempt: Attempt) -> bool {
        let timeout = self.config.connect_timeout;

        let error = match time::timeout(timeout, &mut attempt).await {
            Ok(Ok(Ok(reading))) => return self.deliver(source, generation, reading).await,
            Ok(Ok(Err(err))) => TrackerError::from_connector(source, err),
            Ok(Err(join_err)) => TrackerError::ConnectorFailed {
                source,
                detail: join_err.to_string(),
            },
            Err(_) => {
                self.report_failure(TrackerError::Timeout { source, after: timeout }, true)
                    .await;
                self.watch_late_result(source, generation, attempt);
                return false;
            }
        };

        self.report_failure(error, true).await;
        false
    }

    fn watch_late_result(&self, source: StepSource, generation: u64, attempt: Attempt) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                joined = attempt => {
                    if let Ok(Ok(reading)) = joined {
                        this.deliver(source, generation, reading).await;
                    }
                }
                _ = this.cancel.cancelled() => {}
            }
        });
    }

    /// Applies a connector's reading if its attempt is still the current one.
    async fn deliver(&self, source: StepSource, generation: u64, reading: StepReading) -> bool {
        {
            let mut state = self.state.lock().await;
            if !state.accepts(source, generation) {
                log_info!(
                    "discarding {} steps from stale {} attempt {}",
                    reading.step_count,
                    source,
                    generation
                );
                return false;
            }
            state.apply_reading(&reading);
            state.mark_connected(source);
        }

        log_info!("{} connected with {} steps", source, reading.step_count);
        self.emit(AggregatorEvent::ConnectionChanged {
            source,
            state: ConnectionState::Connected,
        });
        self.after_reading(reading);
        true
    }

    async fn apply_device_reading(&self, reading: StepReading) {
        {
            let mut state = self.state.lock().await;
            if state.degraded || state.connection(StepSource::Device) != ConnectionState::Connected {
                log_debug!("device reading {} ignored while disconnected", reading.step_count);
                return;
            }
            state.apply_reading(&reading);
        }
        self.after_reading(reading);
    }

    fn after_reading(&self, reading: StepReading) {
        self.emit(AggregatorEvent::StepsChanged {
            steps: reading.step_count,
            source: reading.source,
        });
        self.spawn_persist(reading.step_count, reading.source);
    }

    fn spawn_persist(&self, steps: u64, source: StepSource) {
        let this = self.clone();
        self.writes.spawn(async move { this.persist(steps, source).await });
    }

    async fn persist(&self, steps: u64, source: StepSource) {
        let date = today();
        match self
            .store
            .upsert_daily_max(&self.user_id, date, steps, source, Utc::now())
            .await
        {
            Ok(record) => log_debug!(
                "wrote {} steps for {} on {}; record holds {}",
                steps,
                self.user_id,
                date,
                record.step_count
            ),
            Err(err) => {
                self.report_failure(
                    TrackerError::PersistenceFailure {
                        source: Some(source),
                        detail: format!("{err:#}"),
                    },
                    false,
                )
                .await
            }
        }
    }

    /// Logs `error`, disconnects the affected source and shows the session's one
    /// notice. `strike` puts the whole aggregator into degraded mode.
    async fn report_failure(&self, error: TrackerError, strike: bool) {
        log_warn!("{}", error);

        let (changed, notify) = {
            let mut state = self.state.lock().await;
            let before = state.connections().clone();
            if strike {
                state.enter_degraded();
            } else if let Some(source) = error.source() {
                state.mark_disconnected(source);
            }

            let changed: Vec<(StepSource, ConnectionState)> = state
                .connections()
                .iter()
                .filter(|&(source, now)| before.get(source) != Some(now))
                .map(|(source, now)| (*source, *now))
                .collect();
            (changed, state.claim_notice())
        };

        for (source, state) in changed {
            self.emit(AggregatorEvent::ConnectionChanged { source, state });
        }
        if notify {
            self.emit(AggregatorEvent::Notice {
                kind: error.kind(),
                message: error.user_message(),
            });
        }
    }

    fn emit(&self, event: AggregatorEvent) {
        // No subscribers is fine; the UI may not be listening yet.
        let _ = self.events.send(event);
    }

    fn spawn_sync_loop(&self) -> JoinHandle<()> {
        let this = self.clone();
        let period = self.config.sync_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let (steps, source) = {
                            let state = this.state.lock().await;
                            (state.current_steps, state.last_source)
                        };
                        if steps > 0 {
                            log_debug!("background sync of {} steps", steps);
                            this.spawn_persist(steps, source.unwrap_or(StepSource::Manual));
                        }
                    }
                    _ = this.cancel.cancelled() => break,
                }
            }
        })
    }

    fn spawn_device_listener(&self, mut stream: DeviceStream) -> JoinHandle<()> {
        let this = self.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = stream.changed() => {
                        if changed.is_err() {
                            log_info!("device stream closed");
                            break;
                        }
                        let reading = stream.borrow_and_update().clone();
                        if let Some(reading) = reading {
                            this.apply_device_reading(reading).await;
                        }
                    }
                    _ = this.cancel.cancelled() => break,
                }
            }
        })
    }
}
