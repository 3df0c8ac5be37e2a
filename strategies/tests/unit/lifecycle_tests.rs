//! Lifecycle shell and manager tests against a live core with the
//! simulated venue

use common::config::{DispatcherConfig, RiskLimits, StrategySettings};
use common::events::{Event, EventKind, SystemEvent};
use common::types::{MarketData, Order, OrderId, OrderStatus, Side, StrategyState};
use engine::{ExecutionCore, SimVenue, VenueAdapter};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strategies::{StrategyContext, StrategyHandle, StrategyLogic, StrategyManager};

fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[derive(Clone, Default)]
struct ProbeState {
    ticks: Arc<AtomicUsize>,
    orders: Arc<Mutex<Vec<OrderId>>>,
}

/// Configurable probe logic for shell behavior tests
struct Probe {
    state: ProbeState,
    fail_ticks: bool,
    order_on_first_tick: Option<Order>,
    venue: String,
}

impl Probe {
    fn passive(state: ProbeState) -> Self {
        Self {
            state,
            fail_ticks: false,
            order_on_first_tick: None,
            venue: "sim".to_string(),
        }
    }

    fn failing(state: ProbeState) -> Self {
        Self {
            fail_ticks: true,
            ..Self::passive(state)
        }
    }

    fn ordering(state: ProbeState, order: Order) -> Self {
        Self {
            order_on_first_tick: Some(order),
            ..Self::passive(state)
        }
    }
}

impl StrategyLogic for Probe {
    fn on_initialize(&mut self, _ctx: &StrategyContext) -> anyhow::Result<()> {
        Ok(())
    }
    fn on_start(&mut self, _ctx: &StrategyContext) -> anyhow::Result<()> {
        Ok(())
    }
    fn on_stop(&mut self, _ctx: &StrategyContext) -> anyhow::Result<()> {
        Ok(())
    }
    fn on_market_data(&mut self, ctx: &StrategyContext, _data: &MarketData) -> anyhow::Result<()> {
        let tick = self.state.ticks.fetch_add(1, Ordering::SeqCst);
        if self.fail_ticks {
            anyhow::bail!("probe tick failure");
        }
        if tick == 0 {
            if let Some(order) = self.order_on_first_tick.take() {
                let order_id = ctx.submit(order, &self.venue)?;
                self.state.orders.lock().push(order_id);
            }
        }
        Ok(())
    }
}

fn setup() -> (Arc<ExecutionCore>, Arc<SimVenue>) {
    let core = ExecutionCore::new(&DispatcherConfig::default(), RiskLimits::default());
    let venue = Arc::new(SimVenue::new("sim", 100_000.0));
    core.register_venue(venue.clone());
    core.start().expect("core starts");
    (core, venue)
}

fn settings() -> StrategySettings {
    StrategySettings {
        symbols: vec!["BTCUSDT".to_string()],
        venues: vec!["sim".to_string()],
        params: Default::default(),
    }
}

#[test]
fn illegal_transitions_are_rejected() {
    let (core, _venue) = setup();
    let state = ProbeState::default();
    let handle = StrategyHandle::new("probe", settings(), &core, Box::new(Probe::passive(state)));

    assert_eq!(handle.state(), StrategyState::Created);
    assert!(handle.start().is_err(), "start before initialize");
    assert!(handle.stop().is_err(), "stop before running");
    assert!(handle.cleanup().is_err(), "cleanup before terminal");

    handle.initialize().unwrap();
    assert_eq!(handle.state(), StrategyState::Initialized);
    assert!(handle.initialize().is_err(), "double initialize");

    handle.start().unwrap();
    assert_eq!(handle.state(), StrategyState::Running);
    assert!(handle.start().is_err(), "double start");

    handle.stop().unwrap();
    assert_eq!(handle.state(), StrategyState::Stopped);
    // Two stops equal one: the second is an invalid transition, state holds
    assert!(handle.stop().is_err());
    assert_eq!(handle.state(), StrategyState::Stopped);

    handle.cleanup().unwrap();
    // A stopped strategy can go around again
    handle.initialize().unwrap();
    assert_eq!(handle.state(), StrategyState::Initialized);
    core.stop();
}

#[test]
fn running_strategy_receives_subscribed_ticks() {
    let (core, venue) = setup();
    let state = ProbeState::default();
    let handle = StrategyHandle::new(
        "probe",
        settings(),
        &core,
        Box::new(Probe::passive(state.clone())),
    );
    handle.initialize().unwrap();
    handle.start().unwrap();
    assert_eq!(venue.subscribed_symbols(), vec!["BTCUSDT".to_string()]);

    venue.push_tick("BTCUSDT", 50_000.0, 49_990.0, 50_010.0);
    venue.push_tick("BTCUSDT", 50_100.0, 50_090.0, 50_110.0);
    assert!(wait_until(
        || state.ticks.load(Ordering::SeqCst) == 2,
        Duration::from_secs(2)
    ));

    handle.stop().unwrap();
    assert!(venue.subscribed_symbols().is_empty(), "stop unsubscribes");

    // Ticks after stop are not delivered
    venue.push_tick("BTCUSDT", 50_200.0, 50_190.0, 50_210.0);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(state.ticks.load(Ordering::SeqCst), 2);
    core.stop();
}

#[test]
fn hook_failure_faults_and_publishes() {
    let (core, venue) = setup();
    let faulted = Arc::new(AtomicUsize::new(0));
    let sink = faulted.clone();
    core.subscribe_events(
        EventKind::System,
        Arc::new(move |event: &Event| {
            if matches!(event, Event::System(SystemEvent::StrategyFaulted { .. })) {
                sink.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }),
    );

    let state = ProbeState::default();
    let handle = StrategyHandle::new(
        "probe",
        settings(),
        &core,
        Box::new(Probe::failing(state.clone())),
    );
    handle.initialize().unwrap();
    handle.start().unwrap();

    venue.push_tick("BTCUSDT", 50_000.0, 49_990.0, 50_010.0);
    assert!(wait_until(
        || handle.state() == StrategyState::Error,
        Duration::from_secs(2)
    ));
    assert!(wait_until(
        || faulted.load(Ordering::SeqCst) == 1,
        Duration::from_secs(2)
    ));

    // The faulted strategy no longer receives events
    venue.push_tick("BTCUSDT", 50_100.0, 50_090.0, 50_110.0);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(state.ticks.load(Ordering::SeqCst), 1);

    // ERROR is terminal for everything except cleanup
    assert!(handle.start().is_err());
    assert!(handle.initialize().is_err());
    handle.cleanup().unwrap();
    core.stop();
}

#[test]
fn fills_of_own_orders_move_positions() {
    let (core, venue) = setup();
    let state = ProbeState::default();
    let handle = StrategyHandle::new(
        "probe",
        settings(),
        &core,
        Box::new(Probe::ordering(
            state.clone(),
            Order::market("BTCUSDT", Side::Buy, 0.1),
        )),
    );
    handle.initialize().unwrap();
    handle.start().unwrap();

    venue.push_tick("BTCUSDT", 50_000.0, 49_990.0, 50_010.0);
    assert!(wait_until(
        || {
            handle
                .positions()
                .iter()
                .any(|p| p.symbol == "BTCUSDT" && (p.volume - 0.1).abs() < 1e-12)
        },
        Duration::from_secs(2)
    ));
    let position = handle
        .positions()
        .into_iter()
        .find(|p| p.symbol == "BTCUSDT")
        .unwrap();
    assert!((position.average_price - 50_000.0).abs() < 1e-9);

    handle.stop().unwrap();
    core.stop();
}

#[test]
fn stop_cancels_resting_orders() {
    let (core, venue) = setup();
    let state = ProbeState::default();
    // A deep bid that can never fill during the test
    let handle = StrategyHandle::new(
        "probe",
        settings(),
        &core,
        Box::new(Probe::ordering(
            state.clone(),
            Order::limit("BTCUSDT", Side::Buy, 10_000.0, 0.1),
        )),
    );
    handle.initialize().unwrap();
    handle.start().unwrap();

    venue.push_tick("BTCUSDT", 50_000.0, 49_990.0, 50_010.0);
    assert!(wait_until(
        || !state.orders.lock().is_empty(),
        Duration::from_secs(2)
    ));
    let order_id = state.orders.lock()[0].clone();
    assert_eq!(venue.order_status(&order_id).unwrap(), OrderStatus::Pending);

    handle.stop().unwrap();
    assert_eq!(
        venue.order_status(&order_id).unwrap(),
        OrderStatus::Cancelled,
        "stop cancels locally-tracked orders"
    );
    core.stop();
}

#[test]
fn manager_drives_the_group() {
    let (core, _venue) = setup();
    let manager = StrategyManager::new();
    for name in ["alpha", "beta"] {
        let handle = StrategyHandle::new(
            name,
            settings(),
            &core,
            Box::new(Probe::passive(ProbeState::default())),
        );
        manager.register(handle);
    }
    let mut names = manager.names();
    names.sort();
    assert_eq!(names, vec!["alpha".to_string(), "beta".to_string()]);

    manager.start_all();
    assert_eq!(manager.status("alpha"), Some(StrategyState::Running));
    assert_eq!(manager.status("beta"), Some(StrategyState::Running));

    manager.stop_all();
    assert_eq!(manager.status("alpha"), Some(StrategyState::Stopped));
    assert_eq!(manager.status("beta"), Some(StrategyState::Stopped));

    manager.unregister("alpha");
    assert_eq!(manager.status("alpha"), None);
    core.stop();
}
