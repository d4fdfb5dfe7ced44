//! End-to-end behaviour of the work queue through its public API.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::time::{Duration, Instant};

use ferry_worker::{
    ManualClock, Payload, QueueStats, Request, RequestHandler, RequestId, Response,
    ResponseHandler, ThreadPool, WorkQueue, WorkQueueConfig,
};

const WAIT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = ferry_infra::init_telemetry(Some("ferry=debug"), false);
}

fn config(threads: usize) -> WorkQueueConfig {
    WorkQueueConfig {
        worker_thread_count: threads,
        response_processing_time_limit_ms: 0,
        thread_name_prefix: "ferry-test".to_string(),
        ..WorkQueueConfig::default()
    }
}

/// Poll `process_responses` until `done` holds or the wait expires.
fn drain_until(queue: &WorkQueue, done: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for responses");
        queue.process_responses();
        std::thread::yield_now();
    }
}

/// Fails until `succeed_on` calls have been made, counting every call.
struct Flaky {
    calls: AtomicUsize,
    succeed_on: usize,
}

impl Flaky {
    fn new(succeed_on: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            succeed_on,
        })
    }
}

impl RequestHandler for Flaky {
    fn handle_request(&self, request: &Arc<Request>) -> Option<Response> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call >= self.succeed_on {
            Some(Response::success(request.clone(), Payload::new(call)))
        } else {
            Some(Response::failure(request.clone(), "not yet"))
        }
    }
}

/// Replies with a fixed tag so tests can tell handlers apart.
struct Tag(&'static str);

impl RequestHandler for Tag {
    fn handle_request(&self, request: &Arc<Request>) -> Option<Response> {
        Some(Response::success(request.clone(), Payload::new(self.0)))
    }
}

#[derive(Default)]
struct Collect {
    responses: Mutex<Vec<Response>>,
}

impl Collect {
    fn len(&self) -> usize {
        self.responses.lock().len()
    }
}

impl ResponseHandler for Collect {
    fn handle_response(&self, response: &Response) {
        self.responses.lock().push(response.clone());
    }
}

#[test]
fn request_ids_are_strictly_increasing() {
    init_logging();
    let queue = WorkQueue::new(config(1));
    let channel = queue.get_channel("ids");

    let ids: Vec<RequestId> = (0..50)
        .map(|_| queue.add_request(channel, 0, Payload::empty(), 0, false))
        .collect();
    assert!(ids.iter().all(|id| !id.is_rejected()));
    assert!(ids.windows(2).all(|w| w[0].as_u32() < w[1].as_u32()));
}

#[test]
fn closed_queue_rejects_without_side_effects() {
    init_logging();
    let queue = WorkQueue::new(config(1));
    queue.set_requests_accepted(false);

    let id = queue.add_request(0, 0, Payload::new(1u32), 0, false);
    assert_eq!(id, RequestId::REJECTED);
    assert_eq!(queue.stats(), QueueStats::default());

    queue.set_requests_accepted(true);
    assert_eq!(queue.add_request(0, 0, Payload::empty(), 0, false).as_u32(), 1);
}

#[test]
fn retries_are_exhausted_then_failure_is_delivered() {
    init_logging();
    let queue = WorkQueue::new(config(1));
    let channel = queue.get_channel("flaky");
    let handler = Flaky::new(usize::MAX);
    let collect = Arc::new(Collect::default());
    queue.add_request_handler(channel, handler.clone());
    queue.add_response_handler(channel, collect.clone());
    queue.startup(true).unwrap();

    let id = queue.add_request(channel, 0, Payload::empty(), 3, false);
    drain_until(&queue, || collect.len() == 1);

    assert_eq!(handler.calls.load(Ordering::SeqCst), 4);
    let responses = collect.responses.lock();
    assert_eq!(responses[0].request().id(), id);
    assert!(!responses[0].succeeded());
    assert_eq!(responses[0].messages(), "not yet");
}

#[test]
fn retry_keeps_request_id_until_success() {
    init_logging();
    let queue = WorkQueue::new(config(2));
    let channel = queue.get_channel("eventually");
    let handler = Flaky::new(3);
    let collect = Arc::new(Collect::default());
    queue.add_request_handler(channel, handler.clone());
    queue.add_response_handler(channel, collect.clone());
    queue.startup(true).unwrap();

    let id = queue.add_request(channel, 0, Payload::empty(), 5, false);
    drain_until(&queue, || collect.len() == 1);

    let responses = collect.responses.lock();
    assert!(responses[0].succeeded());
    assert_eq!(responses[0].request().id(), id);
    assert_eq!(responses[0].request().retry_count(), 3);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn later_handler_gets_first_refusal() {
    init_logging();
    let queue = WorkQueue::inline(config(1));
    let channel = queue.get_channel("precedence");
    let collect = Arc::new(Collect::default());
    let first: Arc<dyn RequestHandler> = Arc::new(Tag("first"));
    let second: Arc<dyn RequestHandler> = Arc::new(Tag("second"));
    queue.add_request_handler(channel, first);
    queue.add_request_handler(channel, second.clone());
    queue.add_response_handler(channel, collect.clone());

    queue.add_request(channel, 0, Payload::empty(), 0, false);
    queue.remove_request_handler(channel, &second);
    queue.add_request(channel, 0, Payload::empty(), 0, false);

    let tags: Vec<&str> = collect
        .responses
        .lock()
        .iter()
        .map(|r| *r.data().downcast_ref::<&str>().unwrap())
        .collect();
    assert_eq!(tags, vec!["second", "first"]);
}

#[test]
fn abort_clears_payload_but_still_delivers() {
    init_logging();
    let queue = WorkQueue::new(config(1));
    let channel = queue.get_channel("abort");
    let collect = Arc::new(Collect::default());
    queue.add_request_handler(channel, Arc::new(Tag("result")));
    queue.add_response_handler(channel, collect.clone());
    queue.startup(true).unwrap();

    let id = queue.add_request(channel, 0, Payload::empty(), 0, false);
    let deadline = Instant::now() + WAIT;
    while queue.stats().awaiting_delivery == 0 {
        assert!(Instant::now() < deadline, "request never completed");
        std::thread::yield_now();
    }

    queue.abort_request(id);
    assert_eq!(queue.process_responses(), 1);

    let responses = collect.responses.lock();
    assert_eq!(responses.len(), 1);
    assert!(responses[0].data().is_empty());
    assert!(responses[0].request().aborted());
}

#[test]
fn abort_pending_by_channel_leaves_other_channels() {
    init_logging();
    let queue = WorkQueue::new(config(1));
    let (a, b) = (queue.get_channel("a"), queue.get_channel("b"));
    let collect = Arc::new(Collect::default());
    for channel in [a, b] {
        queue.add_request_handler(channel, Arc::new(Tag("data")));
        queue.add_response_handler(channel, collect.clone());
    }
    queue.set_paused(true);
    queue.startup(true).unwrap();

    queue.add_request(a, 0, Payload::empty(), 0, false);
    queue.add_request(b, 0, Payload::empty(), 0, false);
    queue.abort_pending_requests_by_channel(a);
    queue.set_paused(false);

    drain_until(&queue, || collect.len() == 2);
    for response in collect.responses.lock().iter() {
        assert_eq!(response.data().is_empty(), response.channel() == a);
    }
}

#[test]
fn synchronous_round_trip_leaves_queues_empty() {
    init_logging();
    let queue = WorkQueue::new(config(1));
    let channel = queue.get_channel("sync");
    let collect = Arc::new(Collect::default());
    queue.add_request_handler(channel, Arc::new(Tag("now")));
    queue.add_response_handler(channel, collect.clone());
    queue.startup(true).unwrap();

    let id = queue.add_request(channel, 0, Payload::empty(), 0, true);
    assert_eq!(collect.len(), 1);
    assert_eq!(collect.responses.lock()[0].request().id(), id);
    assert_eq!(queue.stats(), QueueStats::default());
}

#[test]
fn draining_is_time_boxed() {
    init_logging();
    let clock = Arc::new(ManualClock::new(1_000));
    let queue = WorkQueue::with_parts(
        WorkQueueConfig {
            response_processing_time_limit_ms: 8,
            ..config(1)
        },
        Box::new(ThreadPool::new("ferry-test")),
        clock.clone(),
    );
    let channel = queue.get_channel("budget");

    struct Slow {
        clock: Arc<ManualClock>,
        seen: AtomicUsize,
    }
    impl ResponseHandler for Slow {
        fn handle_response(&self, _response: &Response) {
            self.seen.fetch_add(1, Ordering::SeqCst);
            self.clock.advance(20);
        }
    }
    let slow = Arc::new(Slow {
        clock: clock.clone(),
        seen: AtomicUsize::new(0),
    });
    queue.add_request_handler(channel, Arc::new(Tag("x")));
    queue.add_response_handler(channel, slow.clone());

    for _ in 0..4 {
        queue.add_request(channel, 0, Payload::empty(), 0, false);
    }
    let worker = queue.worker_handle();
    while worker.process_next_request() {}

    assert_eq!(queue.process_responses(), 1);
    assert_eq!(queue.stats().awaiting_delivery, 3);
    assert_eq!(queue.process_responses(), 1);
    assert_eq!(slow.seen.load(Ordering::SeqCst), 2);
}

#[test]
fn channel_names_resolve_consistently() {
    let queue = WorkQueue::inline(config(1));
    let foo = queue.get_channel("foo");
    let bar = queue.get_channel("bar");
    assert_ne!(foo, bar);
    assert_eq!(queue.get_channel("foo"), foo);
    assert_eq!(queue.channels().name_of(bar).as_deref(), Some("bar"));
}

#[test]
fn many_workers_process_concurrently() {
    init_logging();
    const WORKERS: usize = 4;

    struct Rendezvous {
        barrier: Barrier,
    }
    impl RequestHandler for Rendezvous {
        fn handle_request(&self, request: &Arc<Request>) -> Option<Response> {
            self.barrier.wait();
            Some(Response::success(request.clone(), Payload::empty()))
        }
    }

    let queue = WorkQueue::new(config(WORKERS));
    let channel = queue.get_channel("parallel");
    let collect = Arc::new(Collect::default());
    queue.add_request_handler(
        channel,
        Arc::new(Rendezvous {
            barrier: Barrier::new(WORKERS),
        }),
    );
    queue.add_response_handler(channel, collect.clone());
    queue.startup(true).unwrap();

    for _ in 0..WORKERS {
        queue.add_request(channel, 0, Payload::empty(), 0, false);
    }
    // Only completes if all workers were inside the handler at once.
    drain_until(&queue, || collect.len() == WORKERS);
}

#[test]
fn removed_handler_finishes_in_flight_call() {
    init_logging();

    struct Gate {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }
    impl RequestHandler for Gate {
        fn handle_request(&self, request: &Arc<Request>) -> Option<Response> {
            let _ = self.entered.lock().send(());
            let _ = self.release.lock().recv_timeout(WAIT);
            Some(Response::success(request.clone(), Payload::new("late")))
        }
    }

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let handler: Arc<dyn RequestHandler> = Arc::new(Gate {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });

    let queue = WorkQueue::new(config(1));
    let channel = queue.get_channel("removal");
    let collect = Arc::new(Collect::default());
    queue.add_request_handler(channel, handler.clone());
    queue.add_response_handler(channel, collect.clone());
    queue.startup(true).unwrap();

    queue.add_request(channel, 0, Payload::empty(), 0, false);
    entered_rx.recv_timeout(WAIT).unwrap();
    assert!(queue.remove_request_handler(channel, &handler));
    release_tx.send(()).unwrap();

    drain_until(&queue, || collect.len() == 1);
    assert_eq!(
        collect.responses.lock()[0].data().downcast_ref::<&str>(),
        Some(&"late")
    );
}

#[test]
fn shutdown_rejects_and_keeps_queued_responses() {
    init_logging();
    let queue = WorkQueue::new(config(2));
    let channel = queue.get_channel("shutdown");
    let collect = Arc::new(Collect::default());
    queue.add_request_handler(channel, Arc::new(Tag("kept")));
    queue.add_response_handler(channel, collect.clone());
    queue.startup(true).unwrap();

    queue.add_request(channel, 0, Payload::empty(), 0, false);
    let deadline = Instant::now() + WAIT;
    while queue.stats().awaiting_delivery == 0 {
        assert!(Instant::now() < deadline, "request never completed");
        std::thread::yield_now();
    }

    queue.shutdown();
    assert!(queue.is_shutting_down());
    assert!(!queue.is_running());
    assert!(queue
        .add_request(channel, 0, Payload::empty(), 0, false)
        .is_rejected());

    assert_eq!(queue.process_responses(), 1);
    let responses = collect.responses.lock();
    assert!(responses[0].request().aborted());
    assert!(responses[0].data().is_empty());
}

#[test]
fn startup_without_force_is_a_no_op_when_running() {
    let queue = WorkQueue::new(config(1));
    queue.startup(false).unwrap();
    queue.startup(false).unwrap();
    queue.startup(true).unwrap();
    assert!(queue.is_running());
}

#[test]
fn restart_delivers_aborted_responses_for_queued_work() {
    init_logging();
    let queue = WorkQueue::new(config(1));
    let channel = queue.get_channel("restart");
    let collect = Arc::new(Collect::default());
    queue.add_request_handler(channel, Arc::new(Tag("stale")));
    queue.add_response_handler(channel, collect.clone());
    queue.set_paused(true);
    queue.startup(true).unwrap();

    let ids: Vec<RequestId> = (0..3)
        .map(|_| queue.add_request(channel, 0, Payload::empty(), 0, false))
        .collect();
    queue.startup(true).unwrap();
    queue.set_paused(false);

    drain_until(&queue, || collect.len() == 3);
    let responses = collect.responses.lock();
    for (response, id) in responses.iter().zip(&ids) {
        assert_eq!(response.request().id(), *id);
        assert!(response.request().aborted());
        assert!(response.data().is_empty());
    }
}

#[test]
fn retry_survives_closing_to_new_requests() {
    init_logging();

    struct FailOnceGated {
        calls: AtomicUsize,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }
    impl RequestHandler for FailOnceGated {
        fn handle_request(&self, request: &Arc<Request>) -> Option<Response> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                let _ = self.entered.lock().send(());
                let _ = self.release.lock().recv_timeout(WAIT);
                return Some(Response::failure(request.clone(), "first attempt"));
            }
            Some(Response::success(request.clone(), Payload::new("second")))
        }
    }

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let handler = Arc::new(FailOnceGated {
        calls: AtomicUsize::new(0),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });

    let queue = WorkQueue::new(config(1));
    let channel = queue.get_channel("gated");
    let collect = Arc::new(Collect::default());
    queue.add_request_handler(channel, handler.clone());
    queue.add_response_handler(channel, collect.clone());
    queue.startup(true).unwrap();

    let id = queue.add_request(channel, 0, Payload::empty(), 1, false);
    entered_rx.recv_timeout(WAIT).unwrap();
    queue.set_requests_accepted(false);
    release_tx.send(()).unwrap();

    drain_until(&queue, || collect.len() == 1);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    let responses = collect.responses.lock();
    assert_eq!(responses[0].request().id(), id);
    assert!(responses[0].succeeded());
    assert!(queue
        .add_request(channel, 0, Payload::empty(), 0, false)
        .is_rejected());
}

#[test]
fn abort_requests_by_channel_reaches_only_that_channel() {
    init_logging();
    let queue = WorkQueue::new(config(1));
    let (a, b) = (queue.get_channel("left"), queue.get_channel("right"));
    let collect = Arc::new(Collect::default());
    for channel in [a, b] {
        queue.add_request_handler(channel, Arc::new(Tag("data")));
        queue.add_response_handler(channel, collect.clone());
    }
    queue.set_paused(true);
    queue.startup(true).unwrap();

    for channel in [a, b, a] {
        queue.add_request(channel, 0, Payload::empty(), 0, false);
    }
    queue.abort_requests_by_channel(a);
    queue.set_paused(false);

    drain_until(&queue, || collect.len() == 3);
    for response in collect.responses.lock().iter() {
        let on_a = response.channel() == a;
        assert_eq!(response.request().aborted(), on_a);
        assert_eq!(response.data().is_empty(), on_a);
    }
}

#[test]
fn abort_all_requests_clears_every_payload() {
    init_logging();
    let queue = WorkQueue::new(config(2));
    let (a, b) = (queue.get_channel("one"), queue.get_channel("two"));
    let collect = Arc::new(Collect::default());
    for channel in [a, b] {
        queue.add_request_handler(channel, Arc::new(Tag("data")));
        queue.add_response_handler(channel, collect.clone());
    }
    queue.set_paused(true);
    queue.startup(true).unwrap();

    for channel in [a, b, a, b] {
        queue.add_request(channel, 0, Payload::empty(), 0, false);
    }
    queue.abort_all_requests();
    queue.set_paused(false);

    drain_until(&queue, || collect.len() == 4);
    assert!(collect
        .responses
        .lock()
        .iter()
        .all(|r| r.request().aborted() && r.data().is_empty()));
}
