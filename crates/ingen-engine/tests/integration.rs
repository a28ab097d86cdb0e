//! End-to-end engine tests: build graphs through the event pipeline,
//! drive cycles the way a host driver would, and check the audio.

use std::f32::consts::TAU;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};
use ingen_api::atom::uris;
use ingen_api::{keys, Atom, ClientMessage, Path, Properties, Status};
use ingen_engine::{ClientId, Engine, EngineOptions, SequenceEvent};

const BLOCK: u32 = 64;
const RATE: u32 = 48000;
const TIMEOUT: Duration = Duration::from_secs(5);

fn engine() -> Engine {
    Engine::new(EngineOptions {
        sample_rate: RATE,
        block_size: BLOCK,
        n_threads: 2,
        queue_size: 64,
        trace: false,
        max_events_per_cycle: 32,
    })
}

fn engine_with_client() -> (Engine, ClientId, Receiver<ClientMessage>) {
    let e = engine();
    let (tx, rx) = unbounded();
    let id = e.register_client(tx);
    (e, id, rx)
}

fn p(s: &str) -> Path {
    Path::parse(s).unwrap()
}

fn put_block(e: &Engine, client: Option<ClientId>, path: &str, plugin: &str, polyphonic: bool) {
    let mut props = Properties::new();
    props.set(keys::TYPE, Atom::Uri(uris::BLOCK.to_owned()));
    props.set(keys::PLUGIN, Atom::Uri(plugin.to_owned()));
    props.set(keys::POLYPHONIC, Atom::Bool(polyphonic));
    assert!(e.message(client, 1, ClientMessage::Put { path: p(path), properties: props }));
}

fn put_graph(e: &Engine, path: &str, polyphony: i32) {
    let mut props = Properties::new();
    props.set(keys::TYPE, Atom::Uri(uris::GRAPH.to_owned()));
    props.set(keys::POLYPHONY, Atom::Int(polyphony));
    assert!(e.message(None, 1, ClientMessage::Put { path: p(path), properties: props }));
}

fn put_port(e: &Engine, path: &str, type_uri: &str, port_class: &str) {
    let mut props = Properties::new();
    props.set(keys::TYPE, Atom::Uri(type_uri.to_owned()));
    props.set(keys::PORT_TYPE, Atom::Uri(port_class.to_owned()));
    assert!(e.message(None, 1, ClientMessage::Put { path: p(path), properties: props }));
}

fn connect(e: &Engine, client: Option<ClientId>, tail: &str, head: &str) {
    assert!(e.message(
        client,
        2,
        ClientMessage::Connect {
            tail: p(tail),
            head: p(head),
        }
    ));
}

fn set_value(e: &Engine, path: &str, value: f32) {
    assert!(e.message(
        None,
        3,
        ClientMessage::SetProperty {
            subject: p(path),
            key: keys::VALUE.to_owned(),
            value: Atom::Float(value),
        }
    ));
}

fn settle(e: &Engine) {
    assert!(e.sync(TIMEOUT), "events did not settle");
}

/// Waits for the next `Response` on the stream, skipping broadcasts.
fn next_response(rx: &Receiver<ClientMessage>) -> (i32, Status) {
    let deadline = std::time::Instant::now() + TIMEOUT;
    while std::time::Instant::now() < deadline {
        if let Ok(msg) = rx.recv_timeout(Duration::from_millis(100)) {
            if let ClientMessage::Response { id, status, .. } = msg {
                return (id, status);
            }
        }
    }
    panic!("no response before timeout");
}

fn saw_error(rx: &Receiver<ClientMessage>) -> bool {
    while let Ok(msg) = rx.try_recv() {
        if matches!(msg, ClientMessage::Error { .. }) {
            return true;
        }
    }
    false
}

// ── End-to-end scenarios ─────────────────────────────────────────────────

#[test]
fn sine_through_gain_produces_expected_samples() {
    let e = engine();
    put_block(&e, None, "/osc", "ingen:osc", false);
    put_block(&e, None, "/gain", "ingen:gain", false);
    connect(&e, None, "/osc/o", "/gain/i");
    set_value(&e, "/gain/gain", 0.5);
    settle(&e);

    e.activate(RATE, BLOCK).unwrap();
    e.run(BLOCK, None);

    let gain = e.block(&p("/gain")).unwrap();
    let out = gain.port("o").unwrap();
    let samples = out.buffer(0).get().samples().to_vec();
    for (k, &s) in samples.iter().enumerate() {
        let expected = 0.5 * (TAU * 440.0 * (k as f32) / RATE as f32).sin();
        assert!(
            (s - expected).abs() < 1e-5,
            "frame {}: got {}, expected {}",
            k,
            s,
            expected
        );
    }
}

#[test]
fn independent_chains_schedule_in_parallel() {
    let e = engine();
    put_block(&e, None, "/a", "ingen:osc", false);
    put_block(&e, None, "/b", "ingen:gain", false);
    put_block(&e, None, "/c", "ingen:osc", false);
    put_block(&e, None, "/d", "ingen:gain", false);
    connect(&e, None, "/a/o", "/b/i");
    connect(&e, None, "/c/o", "/d/i");
    settle(&e);

    assert_eq!(
        e.dump_graph(&p("/")).unwrap(),
        "(compiled-graph / (par (seq a b) (seq c d)))"
    );
}

#[test]
fn feedback_loop_is_rejected_with_a_warning() {
    let (e, client, rx) = engine_with_client();
    put_block(&e, None, "/a", "ingen:gain", false);
    put_block(&e, None, "/b", "ingen:gain", false);
    connect(&e, Some(client), "/a/o", "/b/i");
    connect(&e, Some(client), "/b/o", "/a/i");
    settle(&e);

    // Both connects succeed structurally.
    assert_eq!(next_response(&rx).1, Status::Success);
    assert_eq!(next_response(&rx).1, Status::Success);
    // ... but the graph compiles to a no-op and a warning goes out.
    assert!(saw_error(&rx), "expected a feedback warning");
    assert_eq!(e.dump_graph(&p("/")).unwrap(), "(compiled-graph / (seq))");

    // Removing one arc restores a runnable graph.
    assert!(e.message(
        None,
        4,
        ClientMessage::Disconnect {
            tail: p("/b/o"),
            head: p("/a/i"),
        }
    ));
    settle(&e);
    assert_eq!(e.dump_graph(&p("/")).unwrap(), "(compiled-graph / (seq a b))");
}

#[test]
fn self_loop_is_rejected() {
    let (e, client, rx) = engine_with_client();
    put_block(&e, None, "/a", "ingen:gain", false);
    connect(&e, Some(client), "/a/o", "/a/i");
    settle(&e);

    assert_eq!(next_response(&rx).1, Status::Success);
    assert!(saw_error(&rx));
    assert_eq!(e.dump_graph(&p("/")).unwrap(), "(compiled-graph / (seq))");
}

#[test]
fn polyphonic_note_block_steals_oldest_voice() {
    let e = engine();
    put_graph(&e, "/sub", 2);
    put_block(&e, None, "/sub/n", "ingen:note", true);
    settle(&e);

    let n = e.block(&p("/sub/n")).unwrap();
    let input = n.port("input").unwrap();
    let buf = input.buffer(0);
    assert!(buf.get_mut().append_event(SequenceEvent::midi(0, &[0x90, 60, 100]).unwrap()));
    assert!(buf.get_mut().append_event(SequenceEvent::midi(10, &[0x90, 62, 100]).unwrap()));
    assert!(buf.get_mut().append_event(SequenceEvent::midi(20, &[0x90, 64, 100]).unwrap()));

    e.activate(RATE, BLOCK).unwrap();
    e.run(BLOCK, None);

    let gate = n.port("gate").unwrap();
    let trigger = n.port("trigger").unwrap();
    let freq = n.port("frequency").unwrap();
    let last = (BLOCK - 1) as usize;

    // Both voices end the cycle sounding.
    assert_eq!(gate.buffer(0).get().samples()[last], 1.0);
    assert_eq!(gate.buffer(1).get().samples()[last], 1.0);

    // Voice 0 took note 60, then was stolen by 64; voice 1 holds 62.
    assert_eq!(trigger.buffer(0).get().samples()[0], 1.0);
    assert_eq!(trigger.buffer(1).get().samples()[10], 1.0);
    assert_eq!(trigger.buffer(0).get().samples()[20], 1.0);

    let freq_of = |note: i32| 440.0 * (((note - 57) as f32) / 12.0).exp2();
    assert!((freq.buffer(0).get().samples()[last] - freq_of(64)).abs() < 0.01);
    assert!((freq.buffer(1).get().samples()[last] - freq_of(62)).abs() < 0.01);
}

#[test]
fn move_across_parents_is_rejected() {
    let (e, client, rx) = engine_with_client();
    put_graph(&e, "/a", 1);
    put_graph(&e, "/b", 1);
    put_block(&e, None, "/a/x", "ingen:gain", false);
    settle(&e);

    assert!(e.message(
        Some(client),
        9,
        ClientMessage::Move {
            from: p("/a/x"),
            to: p("/b/x"),
        }
    ));
    settle(&e);

    // Skip the create responses (ids 1), find ours.
    loop {
        let (id, status) = next_response(&rx);
        if id == 9 {
            assert_eq!(status, Status::ParentDiffers);
            break;
        }
    }
    assert!(e.block(&p("/a/x")).is_some(), "graph must be unchanged");
    assert!(e.block(&p("/b/x")).is_none());
}

#[test]
fn connect_takes_effect_at_a_cycle_boundary() {
    let e = engine();
    put_block(&e, None, "/osc", "ingen:osc", false);
    put_block(&e, None, "/gain", "ingen:gain", false);
    settle(&e);

    e.activate(RATE, BLOCK).unwrap();

    // Cycle 0: nothing connected, the gain output is silent.
    e.run(BLOCK, None);
    let gain = e.block(&p("/gain")).unwrap();
    let out = gain.port("o").unwrap();
    assert!(out.buffer(0).get().samples().iter().all(|&s| s == 0.0));

    // The arc is prepared off-thread, then installed at the next
    // cycle's start: every sample of cycle 1 sees the complete arc.
    connect(&e, None, "/osc/o", "/gain/i");
    assert!(e.flush_pre(TIMEOUT));
    e.run(BLOCK, None);

    let samples = out.buffer(0).get().samples().to_vec();
    for (k, &s) in samples.iter().enumerate() {
        let t = (BLOCK as usize + k) as f32;
        let expected = (TAU * 440.0 * t / RATE as f32).sin();
        assert!(
            (s - expected).abs() < 1e-4,
            "frame {}: got {}, expected {}",
            k,
            s,
            expected
        );
    }
}

// ── Graph boundary ports ─────────────────────────────────────────────────

#[test]
fn audio_flows_through_root_boundary_ports() {
    let e = engine();
    put_port(&e, "/in", uris::INPUT_PORT, uris::AUDIO_PORT);
    put_port(&e, "/out", uris::OUTPUT_PORT, uris::AUDIO_PORT);
    put_block(&e, None, "/g", "ingen:gain", false);
    connect(&e, None, "/in", "/g/i");
    connect(&e, None, "/g/o", "/out");
    set_value(&e, "/g/gain", 2.0);
    settle(&e);

    e.activate(RATE, BLOCK).unwrap();

    let root = e.root_block();
    let input = root.port("in").unwrap();
    input.buffer(0).get_mut().set_from(0.25, 0);

    e.run(BLOCK, None);

    let out = root.port("out").unwrap();
    assert!(out
        .buffer(0)
        .get()
        .samples()
        .iter()
        .all(|&s| (s - 0.5).abs() < 1e-6));
}

// ── Laws ─────────────────────────────────────────────────────────────────

#[test]
fn connect_then_disconnect_is_identity() {
    let e = engine();
    put_block(&e, None, "/a", "ingen:osc", false);
    put_block(&e, None, "/b", "ingen:gain", false);
    settle(&e);
    let before = e.dump_graph(&p("/")).unwrap();

    connect(&e, None, "/a/o", "/b/i");
    settle(&e);
    assert_ne!(e.dump_graph(&p("/")).unwrap(), before);

    assert!(e.message(
        None,
        5,
        ClientMessage::Disconnect {
            tail: p("/a/o"),
            head: p("/b/i"),
        }
    ));
    settle(&e);
    assert_eq!(e.dump_graph(&p("/")).unwrap(), before);
}

#[test]
fn move_there_and_back_is_identity() {
    let e = engine();
    put_block(&e, None, "/x", "ingen:gain", false);
    settle(&e);

    assert!(e.message(None, 6, ClientMessage::Move { from: p("/x"), to: p("/y") }));
    settle(&e);
    assert!(e.block(&p("/x")).is_none());
    assert!(e.block(&p("/y")).is_some());

    assert!(e.message(None, 7, ClientMessage::Move { from: p("/y"), to: p("/x") }));
    settle(&e);
    assert!(e.block(&p("/x")).is_some());
    assert!(e.block(&p("/y")).is_none());
}

#[test]
fn copy_preserves_port_values_and_inner_arcs() {
    let e = engine();
    put_graph(&e, "/sub", 1);
    put_block(&e, None, "/sub/a", "ingen:osc", false);
    put_block(&e, None, "/sub/b", "ingen:gain", false);
    connect(&e, None, "/sub/a/o", "/sub/b/i");
    set_value(&e, "/sub/b/gain", 0.7);
    settle(&e);

    assert!(e.message(None, 8, ClientMessage::Copy { from: p("/sub"), to: p("/sub2") }));
    settle(&e);

    let copy = e.block(&p("/sub2")).unwrap();
    assert!(copy.is_graph());
    let b = e.block(&p("/sub2/b")).unwrap();
    assert_eq!(b.port("gain").unwrap().control_value(), 0.7);
    assert_eq!(
        e.dump_graph(&p("/sub2")).unwrap(),
        "(compiled-graph /sub2 (seq a b))"
    );
}

#[test]
fn undo_and_redo_replay_connections() {
    let e = engine();
    put_block(&e, None, "/a", "ingen:osc", false);
    put_block(&e, None, "/b", "ingen:gain", false);
    settle(&e);
    let unconnected = e.dump_graph(&p("/")).unwrap();

    connect(&e, None, "/a/o", "/b/i");
    settle(&e);
    let connected = e.dump_graph(&p("/")).unwrap();

    assert!(e.message(None, 10, ClientMessage::Undo));
    settle(&e);
    assert_eq!(e.dump_graph(&p("/")).unwrap(), unconnected);

    assert!(e.message(None, 11, ClientMessage::Redo));
    settle(&e);
    assert_eq!(e.dump_graph(&p("/")).unwrap(), connected);
}

// ── Events and edge cases ────────────────────────────────────────────────

#[test]
fn empty_graph_runs_as_no_op() {
    let e = engine();
    e.activate(RATE, BLOCK).unwrap();
    e.run(BLOCK, None);
    e.run(BLOCK, None);
    assert_eq!(e.cycle(), 2);
    assert_eq!(e.frame(), u64::from(BLOCK) * 2);
}

#[test]
fn single_block_compiles_to_single_task() {
    let e = engine();
    put_block(&e, None, "/solo", "ingen:gain", false);
    settle(&e);
    assert_eq!(e.dump_graph(&p("/")).unwrap(), "(compiled-graph / solo)");
}

#[test]
fn disconnect_all_severs_every_arc() {
    let e = engine();
    put_block(&e, None, "/src", "ingen:osc", false);
    put_block(&e, None, "/g1", "ingen:gain", false);
    put_block(&e, None, "/g2", "ingen:gain", false);
    connect(&e, None, "/src/o", "/g1/i");
    connect(&e, None, "/src/o", "/g2/i");
    settle(&e);

    assert!(e.message(
        None,
        12,
        ClientMessage::DisconnectAll {
            parent: p("/"),
            path: p("/src"),
        }
    ));
    settle(&e);
    assert_eq!(
        e.dump_graph(&p("/")).unwrap(),
        "(compiled-graph / (par src g1 g2))"
    );
}

#[test]
fn delete_removes_block_and_silences_dependants() {
    let e = engine();
    put_block(&e, None, "/osc", "ingen:osc", false);
    put_block(&e, None, "/gain", "ingen:gain", false);
    connect(&e, None, "/osc/o", "/gain/i");
    settle(&e);

    e.activate(RATE, BLOCK).unwrap();
    e.run(BLOCK, None);

    assert!(e.message(None, 13, ClientMessage::Del { path: p("/osc") }));
    assert!(e.flush_pre(TIMEOUT));
    e.run(BLOCK, None);
    e.run(BLOCK, None);
    settle(&e);

    assert!(e.block(&p("/osc")).is_none());
    assert_eq!(e.dump_graph(&p("/")).unwrap(), "(compiled-graph / gain)");
    let gain = e.block(&p("/gain")).unwrap();
    assert!(gain
        .port("o")
        .unwrap()
        .buffer(0)
        .get()
        .samples()
        .iter()
        .all(|&s| s == 0.0));
}

#[test]
fn duplicate_paths_are_rejected() {
    let (e, client, rx) = engine_with_client();
    put_block(&e, Some(client), "/dup", "ingen:gain", false);
    settle(&e);
    assert_eq!(next_response(&rx).1, Status::Success);

    put_block(&e, Some(client), "/dup", "ingen:gain", false);
    settle(&e);
    assert_eq!(next_response(&rx).1, Status::Exists);
}

#[test]
fn unknown_plugin_is_not_found() {
    let (e, client, rx) = engine_with_client();
    put_block(&e, Some(client), "/x", "ingen:warp_drive", false);
    settle(&e);
    assert_eq!(next_response(&rx).1, Status::NotFound);
}

#[test]
fn sequence_ports_refuse_audio_connections() {
    let (e, client, rx) = engine_with_client();
    put_block(&e, None, "/n", "ingen:note", false);
    put_block(&e, None, "/g", "ingen:gain", false);
    settle(&e);

    assert!(e.message(
        Some(client),
        14,
        ClientMessage::Connect {
            tail: p("/g/o"),
            head: p("/n/input"),
        }
    ));
    settle(&e);
    loop {
        let (id, status) = next_response(&rx);
        if id == 14 {
            assert_eq!(status, Status::TypeMismatch);
            break;
        }
    }
}

#[test]
fn get_describes_the_graph_to_one_client() {
    let (e, client, rx) = engine_with_client();
    put_block(&e, None, "/osc", "ingen:osc", false);
    settle(&e);
    while rx.try_recv().is_ok() {}

    assert!(e.message(Some(client), 15, ClientMessage::Get { path: p("/osc") }));
    settle(&e);

    let mut saw_put = false;
    let deadline = std::time::Instant::now() + TIMEOUT;
    while std::time::Instant::now() < deadline {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(ClientMessage::Put { path, properties }) if path.as_str() == "/osc" => {
                assert_eq!(
                    properties.get(keys::PLUGIN),
                    Some(&Atom::Uri("ingen:osc".to_owned()))
                );
                saw_put = true;
            }
            Ok(ClientMessage::Response { id: 15, status, .. }) => {
                assert_eq!(status, Status::Success);
                break;
            }
            Ok(_) => {}
            Err(_) => {}
        }
    }
    assert!(saw_put, "expected a Put describing /osc");
}

#[test]
fn broadcasting_port_reports_activity() {
    let (e, _client, rx) = engine_with_client();
    put_block(&e, None, "/osc", "ingen:osc", false);
    settle(&e);
    assert!(e.message(
        None,
        16,
        ClientMessage::SetProperty {
            subject: p("/osc/o"),
            key: keys::BROADCAST.to_owned(),
            value: Atom::Bool(true),
        }
    ));
    settle(&e);
    while rx.try_recv().is_ok() {}

    e.activate(RATE, BLOCK).unwrap();
    e.run(BLOCK, None);
    settle(&e);

    let deadline = std::time::Instant::now() + TIMEOUT;
    let mut peak = None;
    while peak.is_none() && std::time::Instant::now() < deadline {
        if let Ok(ClientMessage::SetProperty { subject, key, value }) =
            rx.recv_timeout(Duration::from_millis(100))
        {
            if subject.as_str() == "/osc/o" && key == "ingen:activity" {
                peak = value.as_float();
            }
        }
    }
    let peak = peak.expect("expected a peak notification");
    assert!(peak > 0.1 && peak <= 1.0, "peak {}", peak);
}
