//! End-to-end scenarios for the render engine, driven by the deterministic
//! stub backend.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pagelight::backend::stub::{Gate, StubBackend};
use pagelight::{
    ClipRect, Engine, EngineConfig, PageRequest, ReadMode, RenderError, RenderReply, Rotation,
};

type Replies = Arc<Mutex<Vec<RenderReply>>>;

fn replies() -> Replies {
    Arc::new(Mutex::new(Vec::new()))
}

fn recording(sink: &Replies) -> impl FnOnce(RenderReply) + Send + 'static {
    let sink = Arc::clone(sink);
    move |reply| sink.lock().unwrap().push(reply)
}

/// Pump deliveries on this thread (standing in for the UI thread) until
/// `want` replies have arrived.
fn pump_until(engine: &Engine, sink: &Replies, want: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        engine.poll_deliveries();
        if sink.lock().unwrap().len() >= want {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {want} replies, got {}",
            sink.lock().unwrap().len()
        );
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn engine_with(backend: &StubBackend, config: EngineConfig) -> Engine {
    Engine::new(config, Arc::new(backend.clone()))
}

fn open(engine: &Engine, path: &str) {
    engine.set_document(Path::new(path)).unwrap();
}

#[test]
fn coalesce_burst_rasterizes_once() {
    let gate = Gate::closed();
    let backend = StubBackend::with_gate(8, gate.clone());
    let engine = engine_with(&backend, EngineConfig::default());
    open(&engine, "/pagelight-a.pdf");

    let sink = replies();
    for _ in 0..20 {
        engine.request_render(PageRequest::new(2, 1.5), recording(&sink));
    }
    gate.release();
    pump_until(&engine, &sink, 20);

    assert_eq!(backend.raster_calls(), 1);
    let got = sink.lock().unwrap();
    let first = got[0].outcome.as_ref().unwrap();
    for reply in got.iter() {
        let artifact = reply.outcome.as_ref().unwrap();
        assert_eq!(artifact.pixels, first.pixels);
    }
}

#[test]
fn lru_evicts_oldest_entry() {
    let backend = StubBackend::new(10);
    let engine = engine_with(
        &backend,
        EngineConfig {
            cache_entries: 2,
            ..EngineConfig::default()
        },
    );
    open(&engine, "/pagelight-a.pdf");

    let sink = replies();
    for page in [1, 2, 3] {
        let want = sink.lock().unwrap().len() + 1;
        engine.request_render(PageRequest::new(page, 0.2), recording(&sink));
        pump_until(&engine, &sink, want);
    }

    assert!(!engine.is_cached(&PageRequest::new(1, 0.2)));
    assert!(engine.is_cached(&PageRequest::new(2, 0.2)));
    assert!(engine.is_cached(&PageRequest::new(3, 0.2)));

    // Page 3 is most recently used, so one more render evicts page 2.
    engine.request_render(PageRequest::new(4, 0.2), recording(&sink));
    pump_until(&engine, &sink, 4);
    assert!(!engine.is_cached(&PageRequest::new(2, 0.2)));
    assert!(engine.is_cached(&PageRequest::new(3, 0.2)));
}

#[test]
fn document_swap_cancels_in_flight_work() {
    let gate = Gate::closed();
    let backend = StubBackend::with_gate(16, gate.clone());
    let engine = engine_with(&backend, EngineConfig::default());
    open(&engine, "/pagelight-a.pdf");

    let sink = replies();
    for page in 0..10 {
        engine.request_render(PageRequest::new(page, 0.2), recording(&sink));
    }

    // Two workers sit blocked in rasterize; release them once the swap
    // barrier is waiting on its acknowledgement.
    let unblock = {
        let gate = gate.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            gate.release();
        })
    };
    engine.set_document(Path::new("/pagelight-b.pdf")).unwrap();
    unblock.join().unwrap();

    pump_until(&engine, &sink, 10);
    let got = sink.lock().unwrap();
    assert_eq!(got.len(), 10);
    for reply in got.iter() {
        assert_eq!(reply.outcome.as_ref().unwrap_err(), &RenderError::Cancelled);
    }
    assert_eq!(engine.cache_len(), 0);
}

#[test]
fn filter_modes_cache_independently() {
    let backend = StubBackend::new(4);
    let engine = engine_with(&backend, EngineConfig::default());
    open(&engine, "/pagelight-a.pdf");

    let sink = replies();
    engine.request_render(PageRequest::new(1, 0.2), recording(&sink));
    pump_until(&engine, &sink, 1);
    engine.request_render(
        PageRequest::new(1, 0.2).with_mode(ReadMode::Dark),
        recording(&sink),
    );
    pump_until(&engine, &sink, 2);

    assert_eq!(backend.raster_calls(), 2);
    assert_eq!(engine.cache_len(), 2);

    let got = sink.lock().unwrap();
    let plain = got[0].outcome.as_ref().unwrap();
    let dark = got[1].outcome.as_ref().unwrap();
    assert_eq!(plain.pixels.len(), dark.pixels.len());
    for (p, d) in plain.pixels.iter().zip(dark.pixels.iter()) {
        assert_eq!(*p, !*d);
    }
}

#[test]
fn backend_failure_does_not_poison_the_key() {
    let backend = StubBackend::new(8);
    let engine = engine_with(&backend, EngineConfig::default());
    open(&engine, "/pagelight-a.pdf");

    backend.fail_page(3);
    let sink = replies();
    engine.request_render(PageRequest::new(3, 0.2), recording(&sink));
    pump_until(&engine, &sink, 1);

    assert!(matches!(
        sink.lock().unwrap()[0].outcome.as_ref().unwrap_err(),
        RenderError::BackendFailure { .. }
    ));
    assert!(!engine.is_cached(&PageRequest::new(3, 0.2)));

    backend.clear_failures();
    engine.request_render(PageRequest::new(3, 0.2), recording(&sink));
    pump_until(&engine, &sink, 2);
    assert!(sink.lock().unwrap()[1].outcome.is_ok());
    assert!(engine.is_cached(&PageRequest::new(3, 0.2)));
}

#[test]
fn near_equal_zooms_share_one_rasterization() {
    let backend = StubBackend::new(4);
    let engine = engine_with(&backend, EngineConfig::default());
    open(&engine, "/pagelight-a.pdf");

    let sink = replies();
    engine.request_render(PageRequest::new(0, 1.0), recording(&sink));
    pump_until(&engine, &sink, 1);
    engine.request_render(PageRequest::new(0, 1.0004), recording(&sink));
    pump_until(&engine, &sink, 2);

    assert_eq!(backend.raster_calls(), 1);
    assert_eq!(engine.cache_len(), 1);
    let got = sink.lock().unwrap();
    assert_eq!(
        got[0].outcome.as_ref().unwrap().pixels,
        got[1].outcome.as_ref().unwrap().pixels
    );
}

#[test]
fn clear_queue_drops_pending_but_not_running() {
    let gate = Gate::closed();
    let backend = StubBackend::with_gate(16, gate.clone());
    let engine = engine_with(&backend, EngineConfig::default());
    open(&engine, "/pagelight-a.pdf");

    let sink = replies();
    for page in 0..5 {
        engine.request_render(PageRequest::new(page, 0.2), recording(&sink));
    }
    // Give both workers time to pick up and block on the gate.
    std::thread::sleep(Duration::from_millis(50));
    let dropped = engine.clear_queue();
    assert_eq!(dropped, 3);

    gate.release();
    pump_until(&engine, &sink, 5);

    let got = sink.lock().unwrap();
    let ok = got.iter().filter(|r| r.outcome.is_ok()).count();
    let cancelled = got
        .iter()
        .filter(|r| r.outcome.as_ref().err() == Some(&RenderError::Cancelled))
        .count();
    assert_eq!(ok, 2);
    assert_eq!(cancelled, 3);
    assert_eq!(backend.raster_calls(), 2);
}

#[test]
fn rotation_and_clip_are_distinct_cache_rows() {
    let backend = StubBackend::new(4);
    let engine = engine_with(&backend, EngineConfig::default());
    open(&engine, "/pagelight-a.pdf");

    let sink = replies();
    engine.request_render(PageRequest::new(0, 1.0), recording(&sink));
    engine.request_render(
        PageRequest::new(0, 1.0).rotated(Rotation::R90),
        recording(&sink),
    );
    engine.request_render(
        PageRequest::new(0, 1.0).clipped(ClipRect::new(0.0, 0.0, 100.0, 50.0).unwrap()),
        recording(&sink),
    );
    pump_until(&engine, &sink, 3);

    assert_eq!(engine.cache_len(), 3);
    let got = sink.lock().unwrap();
    let full = got
        .iter()
        .find(|r| r.request.rotation == Rotation::R0 && r.request.clip.is_none())
        .unwrap()
        .outcome
        .as_ref()
        .unwrap();
    let turned = got
        .iter()
        .find(|r| r.request.rotation == Rotation::R90)
        .unwrap()
        .outcome
        .as_ref()
        .unwrap();
    let clipped = got
        .iter()
        .find(|r| r.request.clip.is_some())
        .unwrap()
        .outcome
        .as_ref()
        .unwrap();

    assert_eq!(full.width, turned.height);
    assert_eq!(full.height, turned.width);
    assert_eq!(clipped.width, 100);
    assert_eq!(clipped.height, 50);
}

#[test]
fn coalesced_callbacks_fire_in_insertion_order() {
    let gate = Gate::closed();
    let backend = StubBackend::with_gate(4, gate.clone());
    let engine = engine_with(&backend, EngineConfig::default());
    open(&engine, "/pagelight-a.pdf");

    let order = Arc::new(Mutex::new(Vec::new()));
    let sink = replies();
    for i in 0..8usize {
        let order = Arc::clone(&order);
        let sink = Arc::clone(&sink);
        engine.request_render(PageRequest::new(0, 1.0), move |reply| {
            order.lock().unwrap().push(i);
            sink.lock().unwrap().push(reply);
        });
    }
    gate.release();
    pump_until(&engine, &sink, 8);

    assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
}
