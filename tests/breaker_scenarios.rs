use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;
use tripwire::prelude::*;
use tripwire::{BroadcastHandler, FnHandler, ManualClock, MemoryHandler};

const QUOTE: OperationId = OperationId::from_static("PriceFeed::quote");
const SYMBOLS: OperationId = OperationId::from_static("PriceFeed::symbols");
const SUBSCRIBE: OperationId = OperationId::from_static("StreamingFeed::subscribe");

#[derive(Debug, Clone, PartialEq)]
enum FeedError {
    Timeout,
    UnknownSymbol(String),
    Open(BreakerOpen),
}

impl From<BreakerOpen> for FeedError {
    fn from(open: BreakerOpen) -> Self {
        FeedError::Open(open)
    }
}

impl ClassifyFailure for FeedError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            FeedError::Timeout => FailureKind::from_static("Timeout"),
            FeedError::UnknownSymbol(_) => FailureKind::from_static("UnknownSymbol"),
            FeedError::Open(_) => FailureKind::from_static("BreakerOpen"),
        }
    }
}

trait PriceFeed {
    fn quote(&self, symbol: &str) -> Result<f64, FeedError>;
    fn symbols(&self) -> Result<Vec<String>, FeedError>;
}

trait StreamingFeed: PriceFeed {
    fn subscribe(&self, symbol: &str) -> Result<u64, FeedError>;
}

/// Feed whose health is toggled by the test.
#[derive(Debug, Default)]
struct FlakyFeed {
    down: Mutex<bool>,
    calls: AtomicUsize,
}

impl FlakyFeed {
    fn set_down(&self, down: bool) {
        *self.down.lock().unwrap() = down;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer<T>(&self, value: T) -> Result<T, FeedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.down.lock().unwrap() {
            Err(FeedError::Timeout)
        } else {
            Ok(value)
        }
    }
}

impl Protectable for FlakyFeed {}

impl PriceFeed for FlakyFeed {
    fn quote(&self, symbol: &str) -> Result<f64, FeedError> {
        if symbol == "???" {
            self.calls.fetch_add(1, Ordering::SeqCst);
            return Err(FeedError::UnknownSymbol(symbol.to_owned()));
        }
        self.answer(101.5)
    }

    fn symbols(&self) -> Result<Vec<String>, FeedError> {
        self.answer(vec!["ACME".to_owned()])
    }
}

impl StreamingFeed for FlakyFeed {
    fn subscribe(&self, _symbol: &str) -> Result<u64, FeedError> {
        self.answer(7)
    }
}

impl<T: PriceFeed, P: BreakerPolicy + ?Sized> PriceFeed for Breaker<T, P> {
    fn quote(&self, symbol: &str) -> Result<f64, FeedError> {
        self.invoke(&QUOTE, |feed| feed.quote(symbol))
    }

    fn symbols(&self) -> Result<Vec<String>, FeedError> {
        self.invoke(&SYMBOLS, |feed| feed.symbols())
    }
}

impl<T: StreamingFeed, P: BreakerPolicy + ?Sized> StreamingFeed for Breaker<T, P> {
    fn subscribe(&self, symbol: &str) -> Result<u64, FeedError> {
        self.invoke(&SUBSCRIBE, |feed| feed.subscribe(symbol))
    }
}

fn price_feed() -> CapabilityDescriptor {
    CapabilityDescriptor::interface("PriceFeed")
        .operation(OperationDecl::guarded(QUOTE, ["Timeout"]))
        .operation(OperationDecl::new(SYMBOLS))
}

fn streaming_feed() -> CapabilityDescriptor {
    CapabilityDescriptor::interface("StreamingFeed")
        .extends(price_feed())
        .operation(OperationDecl::guarded(SUBSCRIBE, ["Timeout"]))
}

fn clocked_policy(
    threshold: u32,
    cooldown_secs: u64,
    window_secs: u64,
) -> (Arc<WindowedPolicy>, ManualClock, Arc<MemoryHandler>) {
    let clock = ManualClock::starting_at(1_000_000);
    let memory = Arc::new(MemoryHandler::new());
    let policy = WindowedPolicy::new(threshold, cooldown_secs, window_secs)
        .expect("valid policy")
        .with_clock(clock.clone());
    policy.attach_handler(memory.clone());
    (Arc::new(policy), clock, memory)
}

fn transitions(memory: &MemoryHandler) -> Vec<(CircuitState, CircuitState)> {
    memory.events().iter().map(|change| (change.old(), change.new_state())).collect()
}

#[test]
fn wrapped_feed_trips_probes_and_recovers() {
    let (policy, clock, memory) = clocked_policy(2, 5, 10);
    let feed = tripwire::wrap(FlakyFeed::default(), &price_feed(), policy.clone()).unwrap();

    feed.target().set_down(true);
    assert_eq!(feed.quote("ACME"), Err(FeedError::Timeout));
    assert_eq!(feed.state(), CircuitState::Closed);

    clock.advance(Duration::from_secs(1));
    assert_eq!(feed.quote("ACME"), Err(FeedError::Timeout));
    assert_eq!(feed.state(), CircuitState::Open);

    // cooling down: target untouched
    clock.advance(Duration::from_secs(2));
    assert!(matches!(feed.quote("ACME"), Err(FeedError::Open(_))));
    assert_eq!(feed.target().calls(), 2);

    // reset due: the probe goes through and its success closes the breaker
    clock.advance(Duration::from_secs(4));
    feed.target().set_down(false);
    assert_eq!(feed.quote("ACME"), Ok(101.5));
    assert_eq!(feed.state(), CircuitState::Closed);

    assert_eq!(
        transitions(&memory),
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
}

#[test]
fn failed_probe_reopens() {
    let (policy, clock, memory) = clocked_policy(1, 5, 10);
    let feed = tripwire::wrap(FlakyFeed::default(), &price_feed(), policy.clone()).unwrap();

    feed.target().set_down(true);
    let _ = feed.quote("ACME");
    clock.advance(Duration::from_secs(5));
    assert_eq!(feed.quote("ACME"), Err(FeedError::Timeout));
    assert_eq!(feed.state(), CircuitState::Open);
    assert_eq!(policy.tripped_at(), Some(1_005_000));
    assert_eq!(
        transitions(&memory),
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Open),
        ]
    );
}

#[test]
fn spaced_out_failures_never_trip() {
    let (policy, clock, memory) = clocked_policy(2, 5, 10);
    let feed = tripwire::wrap(FlakyFeed::default(), &price_feed(), policy.clone()).unwrap();
    feed.target().set_down(true);

    for _ in 0..5 {
        assert_eq!(feed.quote("ACME"), Err(FeedError::Timeout));
        clock.advance(Duration::from_secs(11));
    }
    assert_eq!(feed.state(), CircuitState::Closed);
    assert_eq!(policy.failure_count(), 1);
    assert!(memory.is_empty());
}

#[test]
fn domain_errors_and_unmonitored_operations_pass_untouched() {
    let (policy, _clock, memory) = clocked_policy(1, 5, 10);
    let feed = tripwire::wrap(FlakyFeed::default(), &price_feed(), policy.clone()).unwrap();

    assert_eq!(feed.quote("???"), Err(FeedError::UnknownSymbol("???".into())));
    assert_eq!(feed.state(), CircuitState::Closed);

    feed.target().set_down(true);
    assert_eq!(feed.symbols(), Err(FeedError::Timeout));
    assert_eq!(feed.state(), CircuitState::Closed);
    assert_eq!(policy.failure_count(), 0);

    // trip through the monitored operation, unmonitored still delegates
    let _ = feed.quote("ACME");
    assert_eq!(feed.state(), CircuitState::Open);
    feed.target().set_down(false);
    assert_eq!(feed.symbols(), Ok(vec!["ACME".to_owned()]));
    assert_eq!(feed.state(), CircuitState::Open);
    assert_eq!(memory.len(), 1);
}

#[test]
fn inherited_capability_shares_one_policy() {
    let (policy, _clock, _memory) = clocked_policy(2, 5, 10);
    let feed = tripwire::wrap(FlakyFeed::default(), &streaming_feed(), policy.clone()).unwrap();
    feed.target().set_down(true);

    assert_eq!(feed.subscribe("ACME"), Err(FeedError::Timeout));
    assert_eq!(feed.quote("ACME"), Err(FeedError::Timeout));
    assert_eq!(feed.state(), CircuitState::Open);
    assert!(matches!(feed.subscribe("ACME"), Err(FeedError::Open(_))));
    assert!(matches!(feed.quote("ACME"), Err(FeedError::Open(_))));
}

#[test]
fn breakers_sharing_a_policy_trip_together() {
    let (policy, _clock, _memory) = clocked_policy(2, 5, 10);
    let a = tripwire::wrap(FlakyFeed::default(), &price_feed(), policy.clone()).unwrap();
    let b = tripwire::wrap(FlakyFeed::default(), &price_feed(), policy.clone()).unwrap();
    a.target().set_down(true);
    b.target().set_down(true);

    let _ = a.quote("ACME");
    let _ = b.quote("ACME");
    assert!(matches!(a.quote("ACME"), Err(FeedError::Open(_))));
    assert!(matches!(b.quote("ACME"), Err(FeedError::Open(_))));
}

#[test]
fn dynamic_policy_behind_trait_object() {
    let policy: Arc<dyn BreakerPolicy> = Arc::new(WindowedPolicy::new(1, 5, 10).unwrap());
    let feed = tripwire::wrap(FlakyFeed::default(), &price_feed(), policy).unwrap();
    feed.target().set_down(true);
    let _ = feed.quote("ACME");
    assert!(matches!(feed.quote("ACME"), Err(FeedError::Open(_))));
}

#[test]
fn manual_reset_reopens_traffic() {
    let (policy, _clock, memory) = clocked_policy(1, 600, 10);
    let feed = tripwire::wrap(FlakyFeed::default(), &price_feed(), policy.clone()).unwrap();
    feed.target().set_down(true);
    let _ = feed.quote("ACME");
    assert_eq!(feed.state(), CircuitState::Open);

    policy.reset();
    feed.target().set_down(false);
    assert_eq!(feed.quote("ACME"), Ok(101.5));
    assert_eq!(memory.last().map(|c| c.operation().cloned()), Some(None));
}

#[tokio::test]
async fn broadcast_handler_streams_transitions() {
    let (policy, clock, _memory) = clocked_policy(1, 5, 10);
    let broadcast = Arc::new(BroadcastHandler::new(16));
    let mut rx = broadcast.subscribe();
    policy.attach_handler(broadcast.clone());

    let feed = tripwire::wrap(FlakyFeed::default(), &price_feed(), policy.clone()).unwrap();
    feed.target().set_down(true);
    let _ = feed.quote("ACME");
    clock.advance(Duration::from_secs(5));
    assert!(policy.should_attempt_reset());

    let first = rx.recv().await.unwrap();
    assert_eq!(first.new_state(), CircuitState::Open);
    assert_eq!(first.operation(), Some(&QUOTE));
    let second = rx.recv().await.unwrap();
    assert_eq!(second.new_state(), CircuitState::HalfOpen);
    assert_eq!(broadcast.dropped_count(), 0);
}

#[derive(Clone)]
struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedGuard;
    fn make_writer(&'a self) -> Self::Writer {
        SharedGuard(self.0.clone())
    }
}

struct SharedGuard(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn transitions_and_rejected_wraps_are_logged() {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
        .with_target(true)
        .with_ansi(false)
        .without_time()
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let (policy, _clock, _memory) = clocked_policy(1, 5, 10);
    policy.attach_handler(Arc::new(FnHandler::new(|_change: &StateChange| Err("sink down".into()))));
    let feed = tripwire::wrap(FlakyFeed::default(), &price_feed(), policy.clone()).unwrap();
    feed.target().set_down(true);
    let _ = feed.quote("ACME");

    let err = tripwire::wrap(feed, &price_feed(), policy).unwrap_err();
    assert_eq!(err.reason(), WrappingErrorReason::AlreadyWrapped);

    let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("tripwire::policy"), "transition logged under policy target");
    assert!(logs.contains("circuit breaker moving to OPEN"));
    assert!(logs.contains("sink down"), "handler failure logged");
    assert!(logs.contains("already wrapped"), "wrap rejection logged");
}
