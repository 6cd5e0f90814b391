use std::collections::HashMap;

use rama::{
    graceful::Shutdown,
    http::{Body, service::web::response::IntoResponse as _},
    service::service_fn,
};
use tokio::time::sleep;

use crate::routing::CircuitState;

use super::*;

fn ok_client() -> impl Service<Request, Output = Response, Error = BoxError> {
    service_fn(async |_req: Request| Ok::<_, BoxError>(Response::new(Body::empty())))
}

fn single_target() -> TargetPool {
    TargetPool::single("http://127.0.0.1:8080".parse().unwrap()).unwrap()
}

fn new_dispatcher(
    client: impl Service<Request, Output = Response, Error = BoxError>,
    cfg: DispatcherConfig,
    pool: TargetPool,
) -> (Shutdown, Dispatcher) {
    let shutdown = Shutdown::new(std::future::pending::<()>());
    let dispatcher = Dispatcher::new(shutdown.guard(), client, cfg, pool);
    (shutdown, dispatcher)
}

#[tokio::test(start_paused = true)]
async fn test_start_rejects_invalid_rate() {
    let (_shutdown, dispatcher) =
        new_dispatcher(ok_client(), DispatcherConfig::default(), single_target());

    for rps in [0, -5, DEFAULT_MAX_RPS as i64 + 1, i64::MAX] {
        let err = dispatcher.start(rps).unwrap_err();
        assert_eq!(err.rps, rps);
        assert_eq!(err.max_rps, DEFAULT_MAX_RPS);
    }

    let status = dispatcher.status();
    assert!(!status.running);
    assert_eq!(status.target_rps, 0);

    assert!(dispatcher.start(DEFAULT_MAX_RPS as i64).is_ok());
    dispatcher.stop();
}

#[tokio::test(start_paused = true)]
#[tracing_test::traced_test]
async fn test_start_same_rate_is_noop_and_new_rate_replaces_schedule() {
    let (_shutdown, dispatcher) =
        new_dispatcher(ok_client(), DispatcherConfig::default(), single_target());

    let plan = dispatcher.start(50).unwrap();
    assert_eq!(plan.requests_per_tick, 1);
    assert!(logs_contain("traffic dispatcher started"));

    let generation = dispatcher.inner.schedule.lock().unwrap().generation;
    assert_eq!(dispatcher.start(50).unwrap(), plan);
    assert_eq!(
        dispatcher.inner.schedule.lock().unwrap().generation,
        generation
    );

    let plan = dispatcher.start(1_000).unwrap();
    assert_eq!(plan.requests_per_tick, 5);
    let status = dispatcher.status();
    assert!(status.running);
    assert_eq!(status.target_rps, 1_000);
    assert_eq!(status.plan, Some(plan));
    assert_ne!(
        dispatcher.inner.schedule.lock().unwrap().generation,
        generation
    );

    dispatcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_actual_rate_tracks_target() {
    let (_shutdown, dispatcher) =
        new_dispatcher(ok_client(), DispatcherConfig::default(), single_target());

    for rps in [200, 1_000, 5_000] {
        dispatcher.reset_stats();
        dispatcher.start(rps).unwrap();
        sleep(Duration::from_secs(5)).await;

        let status = dispatcher.status();
        let target = rps as f64;
        assert!(
            (status.actual_rps - target).abs() <= target * 0.1,
            "rps = {rps}, status = {status:?}"
        );
        assert_eq!(status.stats.succeeded, status.stats.total);
    }

    dispatcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_sub_millisecond_tick_interval_keeps_target_rate() {
    let (_shutdown, dispatcher) = new_dispatcher(
        ok_client(),
        DispatcherConfig {
            tick_interval: Duration::from_micros(500),
            ..Default::default()
        },
        single_target(),
    );

    let plan = dispatcher.start(1_000).unwrap();
    assert_eq!(plan.tick_interval, pacing::MIN_TICK_INTERVAL);
    sleep(Duration::from_secs(5)).await;

    let status = dispatcher.status();
    assert!(
        (status.actual_rps - 1_000.).abs() <= 100.,
        "status = {status:?}"
    );

    dispatcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent_and_quiesces() {
    let (_shutdown, dispatcher) =
        new_dispatcher(ok_client(), DispatcherConfig::default(), single_target());

    dispatcher.start(1_000).unwrap();
    sleep(Duration::from_millis(500)).await;

    let first = dispatcher.stop();
    let second = dispatcher.stop();
    assert!(first.total > 0);
    assert!(second.total >= first.total);

    let status = dispatcher.status();
    assert!(!status.running);
    assert_eq!(status.target_rps, 0);
    assert_eq!(status.plan, None);

    // let in-flight requests settle
    sleep(Duration::from_millis(50)).await;
    let settled = dispatcher.status().stats;
    assert_eq!(settled.in_flight, 0);

    sleep(Duration::from_secs(2)).await;
    let later = dispatcher.status().stats;
    assert_eq!(later.total, settled.total);
    assert_eq!(later.succeeded, settled.succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_reset_stats() {
    let (_shutdown, dispatcher) =
        new_dispatcher(ok_client(), DispatcherConfig::default(), single_target());

    dispatcher.start(400).unwrap();
    sleep(Duration::from_millis(300)).await;
    assert!(dispatcher.status().stats.total > 0);

    let stats = dispatcher.reset_stats();
    assert_eq!(stats.total, 0);
    assert_eq!(stats.succeeded, 0);
    assert_eq!(stats.uptime, 0.);
    assert!(dispatcher.is_running());

    sleep(Duration::from_secs(1)).await;
    let status = dispatcher.status();
    assert!(status.stats.total > 0);
    assert_eq!(status.stats.uptime, 1.);

    dispatcher.stop();
    let stats = dispatcher.reset_stats();
    assert_eq!(stats.total, 0);
    assert_eq!(stats.uptime, 0.);
    assert_eq!(dispatcher.status().actual_rps, 0.);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_are_counted_separately() {
    let client = service_fn(async |_req: Request| {
        sleep(Duration::from_secs(10)).await;
        Ok::<_, BoxError>(Response::new(Body::empty()))
    });
    let cfg = DispatcherConfig {
        request_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let (_shutdown, dispatcher) = new_dispatcher(client, cfg, single_target());

    dispatcher.start(200).unwrap();
    sleep(Duration::from_secs(1)).await;
    dispatcher.stop();
    sleep(Duration::from_millis(200)).await;

    let stats = dispatcher.status().stats;
    assert!(stats.total > 0);
    assert_eq!(stats.timeouts, stats.total);
    assert_eq!(stats.succeeded, 0);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.success_rate, 0.);
}

#[tokio::test(start_paused = true)]
async fn test_error_status_and_transport_error_count_as_failed() {
    let client = service_fn(async |req: Request| {
        if req.uri().path() == "/users" {
            Err(BoxError::from("connection refused"))
        } else {
            Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    });
    let (_shutdown, dispatcher) =
        new_dispatcher(client, DispatcherConfig::default(), single_target());

    dispatcher.start(200).unwrap();
    sleep(Duration::from_millis(500)).await;
    dispatcher.stop();
    sleep(Duration::from_millis(50)).await;

    let stats = dispatcher.status().stats;
    assert!(stats.total > 0);
    assert_eq!(stats.failed, stats.total);
    assert_eq!(stats.timeouts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_pool_saturation_is_observable() {
    let client = service_fn(async |_req: Request| {
        sleep(Duration::from_millis(50)).await;
        Ok::<_, BoxError>(Response::new(Body::empty()))
    });
    let cfg = DispatcherConfig {
        max_connections: 1,
        ..Default::default()
    };
    let (_shutdown, dispatcher) = new_dispatcher(client, cfg, single_target());

    dispatcher.start(200).unwrap();
    sleep(Duration::from_millis(500)).await;
    let status = dispatcher.status();
    dispatcher.stop();

    assert!(status.stats.pool_saturated > 0, "status = {status:?}");
    assert!(status.stats.in_flight > 1, "status = {status:?}");
    // one slot, 50ms per request
    assert!(status.stats.succeeded <= 11, "status = {status:?}");
}

#[tokio::test(start_paused = true)]
async fn test_no_eligible_target_counts_as_failed() {
    let (_shutdown, dispatcher) =
        new_dispatcher(ok_client(), DispatcherConfig::default(), single_target());

    let view = dispatcher
        .update_backend(&BackendUpdate {
            id: pool::DEFAULT_TARGET_ID.to_owned(),
            circuit_state: Some(CircuitState::Open),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(view.effective_weight, 0.);

    dispatcher.start(200).unwrap();
    sleep(Duration::from_millis(200)).await;
    dispatcher.stop();

    let stats = dispatcher.status().stats;
    assert!(stats.total > 0);
    assert_eq!(stats.failed, stats.total);
}

#[tokio::test(start_paused = true)]
async fn test_update_unknown_backend() {
    let (_shutdown, dispatcher) =
        new_dispatcher(ok_client(), DispatcherConfig::default(), single_target());

    let err = dispatcher
        .update_backend(&BackendUpdate {
            id: "nope".to_owned(),
            weight: Some(10),
            ..Default::default()
        })
        .unwrap_err();
    assert_eq!(err.0.as_str(), "nope");
    assert_eq!(dispatcher.backends()[0].weight, 100);
}

#[tokio::test(start_paused = true)]
async fn test_traffic_is_spread_over_pool_by_weight() {
    let hits: Arc<Mutex<HashMap<String, u64>>> = Default::default();
    let client = service_fn({
        let hits = hits.clone();
        move |req: Request| {
            let hits = hits.clone();
            async move {
                let host = req.uri().host().unwrap_or_default().to_owned();
                *hits.lock().entry(host).or_default() += 1;
                Ok::<_, BoxError>(Response::new(Body::empty()))
            }
        }
    });

    let pool = TargetPool::try_new([
        "heavy=http://heavy:8080,75".parse().unwrap(),
        "light=http://light:8080,25".parse().unwrap(),
        "down=http://down:8080,100".parse().unwrap(),
    ])
    .unwrap();
    let (_shutdown, dispatcher) = new_dispatcher(client, DispatcherConfig::default(), pool);
    dispatcher
        .update_backend(&BackendUpdate {
            id: "down".to_owned(),
            circuit_state: Some(CircuitState::Open),
            ..Default::default()
        })
        .unwrap();

    dispatcher.start(2_000).unwrap();
    sleep(Duration::from_secs(2)).await;
    dispatcher.stop();
    sleep(Duration::from_millis(50)).await;

    let hits = hits.lock();
    assert_eq!(hits.get("down"), None);
    let heavy = hits.get("heavy").copied().unwrap_or_default() as f64;
    let light = hits.get("light").copied().unwrap_or_default() as f64;
    let share = heavy / (heavy + light);
    assert!((share - 0.75).abs() < 0.05, "heavy share = {share}");
}
