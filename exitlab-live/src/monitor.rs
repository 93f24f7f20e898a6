//! Live position monitor.
//!
//! One task owns every tracked `Position` and polls the broker on a fixed
//! interval. Each poll first reconciles local state against the broker's
//! view (broker wins), then feeds the current price through the lifecycle as
//! a one-price bar. Broker actions a transition requires are executed in
//! order, and the new position state is committed only after all of them are
//! confirmed; otherwise the transition is dropped and re-evaluated next poll.
//!
//! A second task scans for new signals and hands accepted positions over an
//! mpsc channel, so a slow broker never stalls signal detection.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use exitlab_core::domain::{Bar, Position, UnitKind, FRACTION_EPSILON};
use exitlab_core::{ExitEngine, LifecycleError, Transition};

use crate::broker::{Broker, BrokerError, BrokerPosition, Ticket};
use crate::config::LiveConfig;
use crate::retry::{RetryExhausted, RetryPolicy};
use crate::signal_source::SignalSource;
use crate::sink::{Alert, AlertSink, TradeSink};

/// Single-writer handle on the trade sink.
pub type SharedTradeSink = Arc<Mutex<dyn TradeSink>>;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Broker(#[from] RetryExhausted),

    #[error("position limit of {limit} reached")]
    CapacityReached { limit: usize },

    #[error("ticket {0} is already tracked")]
    DuplicateTicket(Ticket),

    #[error("monitor task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),
}

/// What one poll did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollReport {
    /// Positions fed a fresh price.
    pub ticks: usize,
    /// Exit events executed at the broker and committed.
    pub exits: usize,
    /// External fills recorded from reconciliation.
    pub reconciled: usize,
    /// Transitions dropped because a broker action failed.
    pub discarded: usize,
    /// Positions dropped after an invariant violation.
    pub aborted: usize,
    /// Tickets that reached CLOSED this poll.
    pub closed: Vec<Ticket>,
}

#[derive(Debug)]
struct Tracked {
    position: Position,
    last_price: f64,
    /// Stop level last confirmed at the broker.
    broker_stop: f64,
}

pub struct Monitor {
    engine: ExitEngine,
    config: LiveConfig,
    retry: RetryPolicy,
    broker: Arc<dyn Broker>,
    sink: SharedTradeSink,
    alerts: Arc<dyn AlertSink>,
    tracked: BTreeMap<Ticket, Tracked>,
}

impl Monitor {
    pub fn new(
        engine: ExitEngine,
        config: LiveConfig,
        broker: Arc<dyn Broker>,
        sink: SharedTradeSink,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            engine,
            retry: RetryPolicy::from_config(&config),
            config,
            broker,
            sink,
            alerts,
            tracked: BTreeMap::new(),
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    pub fn position(&self, ticket: Ticket) -> Option<&Position> {
        self.tracked.get(&ticket).map(|t| &t.position)
    }

    fn ensure_capacity(&self) -> Result<(), MonitorError> {
        let limit = self.config.max_tracked_positions();
        if self.tracked.len() >= limit {
            return Err(MonitorError::CapacityReached { limit });
        }
        Ok(())
    }

    /// Place the entry for an accepted position and start tracking it.
    pub async fn admit(&mut self, position: Position) -> Result<Ticket, MonitorError> {
        self.ensure_capacity()?;

        // Entries are not idempotent: one attempt only.
        let entry_policy = self.retry.single_attempt();
        let broker = Arc::clone(&self.broker);
        let signal = position.signal().clone();
        let stop = position.current_stop();
        let ticket = match entry_policy
            .run("open_position", || broker.open_position(&signal, stop))
            .await
        {
            Ok(ticket) => ticket,
            Err(err) => {
                error!(error = %err, "entry not placed");
                self.alerts
                    .send(Alert::BrokerFailure {
                        ticket: None,
                        detail: err.to_string(),
                    })
                    .await;
                return Err(err.into());
            }
        };

        self.track(ticket, position)?;
        Ok(ticket)
    }

    /// Start tracking a position that is already open at the broker.
    pub fn track(&mut self, ticket: Ticket, position: Position) -> Result<(), MonitorError> {
        self.ensure_capacity()?;
        if self.tracked.contains_key(&ticket) {
            return Err(MonitorError::DuplicateTicket(ticket));
        }
        info!(
            ticket,
            direction = %position.direction(),
            regime = %position.signal().regime,
            entry = position.entry_price(),
            stop = position.current_stop(),
            "tracking position"
        );
        let last_price = position.entry_price();
        let broker_stop = position.current_stop();
        self.tracked.insert(
            ticket,
            Tracked {
                position,
                last_price,
                broker_stop,
            },
        );
        Ok(())
    }

    /// Reconcile and advance every tracked position once.
    ///
    /// A failed position read leaves all local state untouched.
    pub async fn poll_once(&mut self) -> Result<PollReport, MonitorError> {
        let broker = Arc::clone(&self.broker);
        let snapshot = match self.retry.run("open_positions", || broker.open_positions()).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!(error = %err, "poll skipped");
                self.alerts
                    .send(Alert::BrokerFailure {
                        ticket: None,
                        detail: err.to_string(),
                    })
                    .await;
                return Err(err.into());
            }
        };

        let quotes: HashMap<Ticket, BrokerPosition> =
            snapshot.into_iter().map(|p| (p.ticket, p)).collect();
        let mut report = PollReport::default();

        let tickets: Vec<Ticket> = self.tracked.keys().copied().collect();
        for ticket in tickets {
            let Some(tracked) = self.tracked.remove(&ticket) else {
                continue;
            };
            match quotes.get(&ticket) {
                None => self.close_external(ticket, tracked, &mut report).await,
                Some(quote) => {
                    if let Some(tracked) = self.manage(ticket, tracked, quote, &mut report).await {
                        self.tracked.insert(ticket, tracked);
                    }
                }
            }
        }

        for ticket in quotes.keys().filter(|t| !self.tracked.contains_key(t)) {
            if !report.closed.contains(ticket) {
                debug!(ticket, "broker position not managed here");
            }
        }

        Ok(report)
    }

    /// The broker no longer lists the ticket: close the remainder as EXTERNAL
    /// at the last price we saw.
    async fn close_external(
        &self,
        ticket: Ticket,
        mut tracked: Tracked,
        report: &mut PollReport,
    ) {
        let position = &mut tracked.position;
        let remaining = position.remaining_fraction();
        let ts = Utc::now().max(position.last_update());
        warn!(
            ticket,
            remaining,
            price = tracked.last_price,
            "position closed at broker"
        );
        match position.apply_external(remaining, tracked.last_price, ts) {
            Ok(event) => {
                report.reconciled += 1;
                self.alerts.send(Alert::Exit { ticket, event }).await;
            }
            Err(err) => {
                self.abort(ticket, err, report).await;
                return;
            }
        }
        self.finish(ticket, tracked, report).await;
    }

    async fn manage(
        &self,
        ticket: Ticket,
        mut tracked: Tracked,
        quote: &BrokerPosition,
        report: &mut PollReport,
    ) -> Option<Tracked> {
        let local = tracked.position.remaining_fraction();
        if quote.size_fraction < local - FRACTION_EPSILON {
            let fraction = local - quote.size_fraction;
            let ts = quote.quoted_at.max(tracked.position.last_update());
            warn!(
                ticket,
                local,
                broker = quote.size_fraction,
                "broker size below local remaining, recording external partial"
            );
            match tracked
                .position
                .apply_external(fraction, quote.current_price, ts)
            {
                Ok(event) => {
                    report.reconciled += 1;
                    self.alerts.send(Alert::Exit { ticket, event }).await;
                }
                Err(err) => {
                    self.abort(ticket, err, report).await;
                    return None;
                }
            }
            if tracked.position.is_closed() {
                self.finish(ticket, tracked, report).await;
                return None;
            }
        } else if quote.size_fraction > local + FRACTION_EPSILON {
            warn!(
                ticket,
                local,
                broker = quote.size_fraction,
                "broker size above local remaining, leaving local state"
            );
            self.alerts
                .send(Alert::SizeMismatch {
                    ticket,
                    local,
                    broker: quote.size_fraction,
                })
                .await;
        }

        self.sync_stop(ticket, &mut tracked).await;

        tracked.last_price = quote.current_price;
        if quote.quoted_at <= tracked.position.last_update() {
            debug!(ticket, quoted_at = %quote.quoted_at, "stale quote");
            return Some(tracked);
        }

        let bar = Bar::tick(quote.quoted_at, quote.current_price);
        let (next, transition) = match self.engine.preview(&tracked.position, &bar) {
            Ok(result) => result,
            Err(err) => {
                self.abort(ticket, err, report).await;
                return None;
            }
        };
        report.ticks += 1;

        let remaining = tracked.position.remaining_fraction();
        if let Err(err) = self.execute(ticket, remaining, &transition).await {
            error!(ticket, error = %err, "transition discarded");
            self.alerts
                .send(Alert::BrokerFailure {
                    ticket: Some(ticket),
                    detail: err.to_string(),
                })
                .await;
            report.discarded += 1;
            return Some(tracked);
        }

        tracked.position = next;
        if let Some(stop) = transition.stop_moved_to {
            debug!(ticket, stop, "stop moved");
            tracked.broker_stop = stop;
        }
        for event in transition.events {
            info!(
                ticket,
                kind = %event.kind,
                fraction = event.fraction,
                price = event.price,
                pnl = event.pnl,
                "exit executed"
            );
            report.exits += 1;
            self.alerts.send(Alert::Exit { ticket, event }).await;
        }

        if tracked.position.is_closed() {
            self.finish(ticket, tracked, report).await;
            return None;
        }
        Some(tracked)
    }

    /// Send the local stop to the broker if it differs from the last one
    /// confirmed there. Reconciliation can tighten the stop (an external
    /// partial covering TP1 arms breakeven) without any transition.
    async fn sync_stop(&self, ticket: Ticket, tracked: &mut Tracked) {
        let stop = tracked.position.current_stop();
        if stop == tracked.broker_stop || tracked.position.is_closed() {
            return;
        }
        let broker = &self.broker;
        match self
            .retry
            .run("modify_stop", || broker.modify_stop(ticket, stop))
            .await
        {
            Ok(()) => {
                info!(ticket, from = tracked.broker_stop, to = stop, "broker stop updated");
                tracked.broker_stop = stop;
            }
            Err(err) => {
                // Left unconfirmed; the next poll tries again.
                error!(ticket, stop, error = %err, "broker stop not updated");
                self.alerts
                    .send(Alert::BrokerFailure {
                        ticket: Some(ticket),
                        detail: err.to_string(),
                    })
                    .await;
            }
        }
    }

    /// Broker side of a transition: fills in event order, then the stop.
    ///
    /// `remaining` is the local open fraction before the transition.
    async fn execute(
        &self,
        ticket: Ticket,
        remaining: f64,
        transition: &Transition,
    ) -> Result<(), RetryExhausted> {
        let mut expected = remaining;
        for event in &transition.events {
            expected = (expected - event.fraction).max(0.0);
            self.close_confirmed(ticket, event.fraction, expected).await?;
        }
        if let Some(stop) = transition.stop_moved_to {
            let broker = &self.broker;
            self.retry
                .run("modify_stop", || broker.modify_stop(ticket, stop))
                .await?;
        }
        Ok(())
    }

    /// Close `fraction` of the position, leaving `expected_after` open.
    ///
    /// A timed-out close may still have filled, so it is never resent blindly:
    /// the broker size is read first, and only a position still above
    /// `expected_after` is closed again. If that read fails too, the close is
    /// given up and the next poll reconciles whatever happened.
    async fn close_confirmed(
        &self,
        ticket: Ticket,
        fraction: f64,
        expected_after: f64,
    ) -> Result<(), RetryExhausted> {
        let attempt = self.retry.single_attempt();
        let broker = &self.broker;
        let mut trials = 0;
        loop {
            trials += 1;
            let err = match attempt
                .run("close_fraction", || broker.close_fraction(ticket, fraction))
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) => RetryExhausted { trials, ..err },
            };

            if matches!(err.source, BrokerError::Timeout(_)) {
                match self.close_landed(ticket, expected_after).await {
                    Some(true) => {
                        warn!(ticket, fraction, "close timed out but filled at broker");
                        return Ok(());
                    }
                    Some(false) => {}
                    None => return Err(err),
                }
            }

            if !err.source.is_transient() || trials >= self.retry.max_trials() {
                return Err(err);
            }
            let delay = self.retry.backoff(trials);
            warn!(ticket, trials, ?delay, error = %err.source, "close failed, retrying");
            time::sleep(delay).await;
        }
    }

    /// Whether the broker already shows at most `expected_after` open.
    /// `None` when the broker cannot be read.
    async fn close_landed(&self, ticket: Ticket, expected_after: f64) -> Option<bool> {
        let broker = &self.broker;
        let positions = self
            .retry
            .run("open_positions", || broker.open_positions())
            .await
            .ok()?;
        let landed = positions
            .iter()
            .find(|p| p.ticket == ticket)
            .map_or(true, |p| p.size_fraction <= expected_after + FRACTION_EPSILON);
        Some(landed)
    }

    async fn finish(&self, ticket: Ticket, tracked: Tracked, report: &mut PollReport) {
        report.closed.push(ticket);
        let Some(trade) = tracked.position.to_closed_trade() else {
            return;
        };
        info!(
            ticket,
            reason = %trade.exit_reason,
            pnl = trade.total_pnl,
            "position closed"
        );
        let recorded = self.sink.lock().await.record(ticket, &trade).await;
        if let Err(err) = recorded {
            error!(ticket, error = %err, "closed trade not persisted");
            self.alerts
                .send(Alert::SinkFailure {
                    ticket,
                    detail: err.to_string(),
                })
                .await;
        }
    }

    async fn abort(&self, ticket: Ticket, err: LifecycleError, report: &mut PollReport) {
        error!(ticket, error = %err, "position aborted");
        report.aborted += 1;
        self.alerts
            .send(Alert::PositionAborted {
                ticket,
                detail: err.to_string(),
            })
            .await;
    }

    /// Start the poll loop and the signal scanner.
    pub fn spawn<S>(self, source: S) -> MonitorHandle
    where
        S: SignalSource + 'static,
    {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (signal_tx, signal_rx) = mpsc::channel(self.config.signal_queue_capacity());
        let shutdown_timeout = self.config.shutdown_timeout();

        let scanner = tokio::spawn(run_scanner(
            self.engine.clone(),
            self.config.unit_kind(),
            self.config.scan_interval(),
            source,
            signal_tx,
            shutdown_tx.subscribe(),
        ));
        let poller = tokio::spawn(self.run(signal_rx, shutdown_tx.subscribe()));

        MonitorHandle {
            shutdown_tx,
            tasks: vec![scanner, poller],
            shutdown_timeout,
        }
    }

    async fn run(
        mut self,
        mut signals: mpsc::Receiver<Position>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut ticker = time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            poll = ?self.config.poll_interval(),
            max_positions = self.config.max_tracked_positions(),
            "monitor started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!(tracked = self.tracked.len(), "monitor stopping");
                    return;
                }
                Some(position) = signals.recv() => {
                    if let Err(err) = self.admit(position).await {
                        warn!(error = %err, "signal refused");
                    }
                }
                _ = ticker.tick() => {
                    match self.poll_once().await {
                        Ok(report) if report != PollReport::default() => {
                            debug!(?report, "poll complete");
                        }
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "poll failed"),
                    }
                }
            }
        }
    }
}

async fn run_scanner<S: SignalSource>(
    engine: ExitEngine,
    unit_kind: UnitKind,
    interval: Duration,
    mut source: S,
    signals: mpsc::Sender<Position>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => return,
            _ = ticker.tick() => {}
        }
        let scanned = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => return,
            scanned = source.scan() => scanned,
        };

        let candidates = match scanned {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(error = %err, "scan failed");
                continue;
            }
        };

        for candidate in candidates {
            match engine.accept(candidate.input, &candidate.history, unit_kind) {
                Ok(position) => {
                    info!(
                        entry = %position.opened_at(),
                        regime = %position.signal().regime,
                        "signal accepted"
                    );
                    if signals.send(position).await.is_err() {
                        return;
                    }
                }
                Err(rejection) => {
                    warn!(entry = %rejection.entry_timestamp, reason = %rejection.reason, "signal rejected");
                }
            }
        }
    }
}

/// Owner of the running monitor tasks.
pub struct MonitorHandle {
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl MonitorHandle {
    /// Stop polling and scanning. In-flight broker calls finish or time out;
    /// tasks still running after the shutdown timeout are aborted.
    pub async fn shutdown(mut self) -> Result<(), MonitorError> {
        let _ = self.shutdown_tx.send(());
        let joined = time::timeout(
            self.shutdown_timeout,
            futures::future::join_all(self.tasks.iter_mut()),
        )
        .await;

        let Ok(joined) = joined else {
            for task in &self.tasks {
                task.abort();
            }
            warn!(timeout = ?self.shutdown_timeout, "monitor tasks aborted");
            return Err(MonitorError::ShutdownTimeout(self.shutdown_timeout));
        };
        for result in joined {
            result?;
        }
        info!("monitor shut down");
        Ok(())
    }
}
