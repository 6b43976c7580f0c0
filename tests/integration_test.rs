use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use nodedsp::nodes::Mailbox;
use nodedsp::{
    AnalyzerOptions, AudioFrame, AudioSettings, EngineError, Graph, InputAttribute, InputSettings, MemoryBackend,
    Node, NodeContext, NodeError, NodeId, NodeKind, NodeRegistry, OutputAttribute, OutputSettings, SampleFormat,
    Scheduler, SchedulerState, SpectrumBoard, SpectrumView, TickContext,
};
use parking_lot::Mutex;
use serde_json::{json, Value};

fn settings(in_channels: u16, out_channels: u16) -> AudioSettings {
    AudioSettings {
        input: InputSettings {
            channels: in_channels,
            rate: 48_000,
            chunk_size: 1024,
            ..InputSettings::default()
        },
        output: OutputSettings {
            channels: out_channels,
            rate: 48_000,
            ..OutputSettings::default()
        },
        ..AudioSettings::default()
    }
}

fn context(settings: AudioSettings) -> (MemoryBackend, NodeContext) {
    let backend = MemoryBackend::new();
    let ctx = NodeContext::new(settings, Arc::new(backend.clone()), SpectrumBoard::new());
    (backend, ctx)
}

fn create(graph: &mut Graph, registry: &NodeRegistry, ctx: &NodeContext, key: &str, name: &str) -> NodeId {
    let node = registry.create(key, name, &Value::Null, ctx).unwrap();
    graph.add_node(node)
}

fn pattern(len: usize) -> Vec<f32> {
    (0..len).map(|i| (i % 200) as f32 / 100.0 - 1.0).collect()
}

/// Publishes a fixed frame on each output every tick.
struct Script {
    frames: Vec<Vec<f32>>,
}

impl Node for Script {
    fn kind(&self) -> NodeKind {
        NodeKind::Custom
    }

    fn name(&self) -> &str {
        "script"
    }

    fn output_labels(&self) -> Vec<String> {
        (0..self.frames.len()).map(|i| format!("Out {i}")).collect()
    }

    fn process(&mut self, _: &TickContext, _: &mut [InputAttribute], outputs: &mut [OutputAttribute]) -> Result<(), NodeError> {
        for (output, samples) in outputs.iter_mut().zip(&self.frames) {
            output.set_data(AudioFrame::new(samples.clone(), 48_000, samples.len()));
        }
        Ok(())
    }
}

/// Records every frame it receives, per input.
struct Recorder {
    inputs: usize,
    seen: Arc<Mutex<Vec<(usize, Vec<f32>)>>>,
}

impl Node for Recorder {
    fn kind(&self) -> NodeKind {
        NodeKind::Custom
    }

    fn name(&self) -> &str {
        "recorder"
    }

    fn input_labels(&self) -> Vec<String> {
        nodedsp::channel_labels(self.inputs)
    }

    fn process(&mut self, _: &TickContext, inputs: &mut [InputAttribute], _: &mut [OutputAttribute]) -> Result<(), NodeError> {
        let mut seen = self.seen.lock();
        for (i, input) in inputs.iter_mut().enumerate() {
            if let Some(frame) = input.get_data() {
                seen.push((i, frame.samples.clone()));
            }
        }
        Ok(())
    }
}

/// Fails on odd calls, either by returning an error or by panicking.
struct Flaky {
    panics: bool,
    calls: Arc<AtomicUsize>,
}

impl Node for Flaky {
    fn kind(&self) -> NodeKind {
        NodeKind::Custom
    }

    fn name(&self) -> &str {
        "flaky"
    }

    fn output_labels(&self) -> Vec<String> {
        vec!["Out".into()]
    }

    fn process(&mut self, _: &TickContext, _: &mut [InputAttribute], outputs: &mut [OutputAttribute]) -> Result<(), NodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call % 2 == 1 {
            if self.panics {
                panic!("flaky node gave up on call {call}");
            }
            return Err(NodeError::Other(format!("call {call} failed")));
        }
        outputs[0].set_data(AudioFrame::new(vec![call as f32], 48_000, 1));
        Ok(())
    }
}

#[test]
fn mono_passthrough_end_to_end() {
    let (backend, ctx) = context(settings(1, 1));
    let registry = NodeRegistry::with_defaults();
    let mut graph = Graph::new();
    let ain = create(&mut graph, &registry, &ctx, "AIN", "in");
    let aout = create(&mut graph, &registry, &ctx, "AOUT", "out");
    graph.connect(ain.output(0), aout.input(0)).unwrap();

    let input = pattern(1024);
    backend.feed(&input);
    let report = graph.tick();

    assert_eq!(report.processed, 2);
    assert_eq!(report.faults, 0);
    assert_eq!(backend.played(), input);
}

#[test]
fn mono_to_stereo_duplicates_every_sample() {
    let (backend, ctx) = context(settings(1, 2));
    let registry = NodeRegistry::with_defaults();
    let mut graph = Graph::new();
    let ain = create(&mut graph, &registry, &ctx, "AIN", "in");
    let aout = create(&mut graph, &registry, &ctx, "AOUT", "out");
    graph.connect(ain.output(0), aout.input(0)).unwrap();

    let input = pattern(1024);
    backend.feed(&input);
    graph.tick();

    let played = backend.played();
    assert_eq!(played.len(), 2048);
    for (i, frame) in played.chunks_exact(2).enumerate() {
        assert_eq!(frame[0], input[i]);
        assert_eq!(frame[1], input[i]);
    }
}

#[test]
fn sink_has_one_input_per_output_channel() {
    let (_backend, ctx) = context(settings(2, 1));
    let registry = NodeRegistry::with_defaults();
    let mut graph = Graph::new();
    let ain = create(&mut graph, &registry, &ctx, "AIN", "in");
    let aout = create(&mut graph, &registry, &ctx, "AOUT", "out");

    graph.connect(ain.output(0), aout.input(0)).unwrap();
    assert!(matches!(
        graph.connect(ain.output(1), aout.input(1)),
        Err(EngineError::NoSuchAttribute { ordinal: 1, .. })
    ));
}

#[test]
fn padded_region_contributes_zero() {
    let (backend, ctx) = context(settings(2, 2));
    let registry = NodeRegistry::with_defaults();
    let mut graph = Graph::new();
    let script = graph.add(Script {
        frames: vec![vec![0.5, 0.5, 0.5, 0.5], vec![0.25, 0.25]],
    });
    let aout = create(&mut graph, &registry, &ctx, "AOUT", "out");
    graph.connect(script.output(0), aout.input(0)).unwrap();
    graph.connect(script.output(1), aout.input(1)).unwrap();

    graph.tick();

    let played = backend.played();
    assert_eq!(played, vec![0.5, 0.25, 0.5, 0.25, 0.5, 0.0, 0.5, 0.0]);
    // right channel past its own length
    assert_eq!(played[5], 0.0);
    assert_eq!(played[7], 0.0);
}

#[test]
fn sink_without_input_writes_nothing() {
    let (backend, ctx) = context(settings(1, 2));
    let registry = NodeRegistry::with_defaults();
    let mut graph = Graph::new();
    create(&mut graph, &registry, &ctx, "AOUT", "out");

    graph.tick();
    graph.tick();

    assert!(backend.played().is_empty());
}

#[test]
fn int16_output_is_quantized() {
    let mut settings = settings(1, 1);
    settings.output.format = SampleFormat::Int16;
    let (backend, ctx) = context(settings);
    let registry = NodeRegistry::with_defaults();
    let mut graph = Graph::new();
    let ain = create(&mut graph, &registry, &ctx, "AIN", "in");
    let aout = create(&mut graph, &registry, &ctx, "AOUT", "out");
    graph.connect(ain.output(0), aout.input(0)).unwrap();

    backend.feed(&[0.5, 0.123_456_79, -1.0]);
    graph.tick();

    let played = backend.played();
    assert_eq!(played[0], 0.5);
    assert_eq!(played[2], -1.0);
    assert_ne!(played[1], 0.123_456_79);
    assert_relative_eq!(played[1], 0.123_456_79, epsilon = 1.0 / 32_768.0);
}

#[test]
fn source_publishes_one_frame_per_channel() {
    let (backend, ctx) = context(settings(3, 2));
    let registry = NodeRegistry::with_defaults();
    let mut graph = Graph::new();
    let ain = create(&mut graph, &registry, &ctx, "AIN", "in");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = graph.add(Recorder {
        inputs: 3,
        seen: Arc::clone(&seen),
    });
    for ch in 0..3 {
        graph.connect(ain.output(ch), recorder.input(ch)).unwrap();
    }
    assert_eq!(graph.outputs(ain).unwrap().len(), 3);
    assert_eq!(graph.outputs(ain).unwrap()[2].info().label, "Channel 2");

    // 4 whole frames and one stray sample
    backend.feed(&[0.0, 1.0, 2.0, 0.1, 1.1, 2.1, 0.2, 1.2, 2.2, 0.3, 1.3, 2.3, 9.9]);
    graph.tick();

    let seen = seen.lock();
    assert_eq!(
        *seen,
        vec![
            (0, vec![0.0, 0.1, 0.2, 0.3]),
            (1, vec![1.0, 1.1, 1.2, 1.3]),
            (2, vec![2.0, 2.1, 2.2, 2.3]),
        ]
    );
}

#[test]
fn fan_out_delivers_to_every_input() {
    let mut graph = Graph::new();
    let script = graph.add(Script {
        frames: vec![vec![1.0, 2.0]],
    });
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = graph.add(Recorder {
        inputs: 2,
        seen: Arc::clone(&seen),
    });
    graph.connect(script.output(0), recorder.input(0)).unwrap();
    graph.connect(script.output(0), recorder.input(1)).unwrap();

    graph.tick();

    assert_eq!(*seen.lock(), vec![(0, vec![1.0, 2.0]), (1, vec![1.0, 2.0])]);
}

#[test]
fn connect_rejects_bad_endpoints() {
    let mut graph = Graph::new();
    let script = graph.add(Script {
        frames: vec![vec![0.0]],
    });
    let recorder = graph.add(Recorder {
        inputs: 1,
        seen: Arc::default(),
    });

    graph.connect(script.output(0), recorder.input(0)).unwrap();
    assert!(matches!(
        graph.connect(script.output(0), recorder.input(0)),
        Err(EngineError::InputOccupied { ordinal: 0, .. })
    ));
    assert!(matches!(
        graph.connect(script.output(1), recorder.input(0)),
        Err(EngineError::NoSuchAttribute { ordinal: 1, .. })
    ));

    assert_eq!(graph.disconnect(recorder.input(0)), Some(script.output(0)));
    assert_eq!(graph.incoming(recorder.input(0)), None);
    graph.remove_node(script).unwrap();
    assert!(matches!(
        graph.connect(script.output(0), recorder.input(0)),
        Err(EngineError::NodeNotFound(_))
    ));
}

#[test]
fn failing_node_is_retried_and_does_not_stop_the_tick() {
    for panics in [false, true] {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut graph = Graph::new();
        let flaky = graph.add(Flaky {
            panics,
            calls: Arc::clone(&calls),
        });
        let script = graph.add(Script {
            frames: vec![vec![7.0]],
        });
        let recorder = graph.add(Recorder {
            inputs: 2,
            seen: Arc::clone(&seen),
        });
        graph.connect(flaky.output(0), recorder.input(0)).unwrap();
        graph.connect(script.output(0), recorder.input(1)).unwrap();

        let reports: Vec<_> = (0..4).map(|_| graph.tick()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(reports.iter().map(|r| r.faults).collect::<Vec<_>>(), vec![0, 1, 0, 1]);
        assert!(reports.iter().all(|r| r.processed == 3));
        assert_eq!(graph.len(), 3);

        let seen = seen.lock();
        let from_flaky: Vec<_> = seen.iter().filter(|(i, _)| *i == 0).map(|(_, s)| s[0]).collect();
        let from_script = seen.iter().filter(|(i, _)| *i == 1).count();
        assert_eq!(from_flaky, vec![0.0, 2.0]);
        assert_eq!(from_script, 4);
    }
}

#[test]
fn registry_rejects_unknown_keys() {
    let (_backend, ctx) = context(settings(1, 1));
    let registry = NodeRegistry::with_defaults();

    assert_eq!(registry.keys(), vec!["AIN", "AOUT", "STV"]);
    assert!(matches!(
        registry.create("ECHO", "echo", &Value::Null, &ctx),
        Err(EngineError::UnknownNodeType(key)) if key == "ECHO"
    ));
}

#[test]
fn registry_accepts_custom_constructors() {
    let (_backend, ctx) = context(settings(1, 1));
    let mut registry = NodeRegistry::with_defaults();
    registry.register("CONST", |_name, payload, _ctx| {
        let level = payload.get("level").and_then(Value::as_f64).unwrap_or(0.0) as f32;
        Ok(Box::new(Script {
            frames: vec![vec![level; 4]],
        }) as Box<dyn Node>)
    });

    let node = registry.create("CONST", "dc", &json!({ "level": 0.5 }), &ctx).unwrap();
    assert_eq!(node.kind(), NodeKind::Custom);
    assert_eq!(node.output_labels(), vec!["Out 0".to_owned()]);
}

#[test]
fn device_and_settings_errors_surface_at_construction() {
    let registry = NodeRegistry::with_defaults();

    let mut bad_device = settings(1, 1);
    bad_device.input.device = 3;
    let (backend, ctx) = context(bad_device);
    assert!(matches!(
        registry.create("AIN", "in", &Value::Null, &ctx),
        Err(EngineError::DeviceUnavailable { index: 3, .. })
    ));
    assert_eq!(backend.open_streams(), 0);

    let mut bad_rate = settings(1, 1);
    bad_rate.output.rate = 1_000;
    let (_backend, ctx) = context(bad_rate);
    assert!(matches!(
        registry.create("AOUT", "out", &Value::Null, &ctx),
        Err(EngineError::InvalidSetting { field: "rate", .. })
    ));

    let (_backend, ctx) = context(settings(1, 1));
    assert!(matches!(
        registry.create("STV", "fft", &json!({ "smoothing": 2.0 }), &ctx),
        Err(EngineError::InvalidOptions(_))
    ));
}

#[test]
fn teardown_closes_every_stream() {
    let (backend, ctx) = context(settings(2, 2));
    let registry = NodeRegistry::with_defaults();
    let mut graph = Graph::new();
    let ain = create(&mut graph, &registry, &ctx, "AIN", "in");
    let aout = create(&mut graph, &registry, &ctx, "AOUT", "out");
    create(&mut graph, &registry, &ctx, "AOUT", "monitor");
    graph.connect(ain.output(0), aout.input(0)).unwrap();
    assert_eq!(backend.open_streams(), 3);

    graph.remove_node(aout).unwrap();
    assert_eq!(backend.open_streams(), 2);
    assert_eq!(graph.incoming(aout.input(0)), None);

    graph.teardown().unwrap();
    assert_eq!(backend.open_streams(), 0);
    assert!(graph.is_empty());
}

#[test]
fn scheduler_transitions() {
    let mut scheduler = Scheduler::new(Graph::new());
    assert_eq!(scheduler.state(), SchedulerState::Idle);
    assert!(matches!(
        scheduler.stop(),
        Err(EngineError::InvalidTransition { action: "stop", state: SchedulerState::Idle })
    ));

    scheduler.start().unwrap();
    assert!(matches!(
        scheduler.start(),
        Err(EngineError::InvalidTransition { action: "start", state: SchedulerState::Running })
    ));

    scheduler.stop().unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert!(scheduler.start().is_err());
    assert!(scheduler.stop().is_err());
}

#[test]
fn scheduler_runs_the_graph_until_stopped() {
    let (backend, ctx) = context(settings(1, 1));
    let registry = NodeRegistry::with_defaults();
    let mut graph = Graph::new();
    let ain = create(&mut graph, &registry, &ctx, "AIN", "in");
    let aout = create(&mut graph, &registry, &ctx, "AOUT", "out");
    graph.connect(ain.output(0), aout.input(0)).unwrap();

    let input = pattern(4096);
    backend.feed(&input);

    let mut scheduler = Scheduler::new(graph);
    scheduler.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while backend.played().len() < input.len() && Instant::now() < deadline {
        sleep(Duration::from_millis(5));
    }
    scheduler.stop().unwrap();

    assert_eq!(backend.played(), input);
    let stats = scheduler.stats();
    assert!(stats.ticks >= 4);
    assert_eq!(stats.faults, 0);

    // stopped means no more ticks
    let ticks = scheduler.graph().ticks();
    sleep(Duration::from_millis(20));
    assert_eq!(scheduler.graph().ticks(), ticks);

    scheduler.shutdown().unwrap();
    assert_eq!(backend.open_streams(), 0);
}

#[test]
fn scheduler_counts_absorbed_faults() {
    let mut graph = Graph::new();
    graph.add(Flaky {
        panics: false,
        calls: Arc::default(),
    });
    let scheduler = Scheduler::new(graph);

    for _ in 0..6 {
        scheduler.run_tick();
    }

    let stats = scheduler.stats();
    assert_eq!(stats.ticks, 6);
    assert_eq!(stats.faults, 3);
}

#[test]
fn mailbox_keeps_only_the_newest() {
    let mailbox = Mailbox::new();
    for i in 0..10 {
        mailbox.deposit(i);
    }
    assert_eq!(mailbox.claim(), Some(9));
    assert!(mailbox.is_empty());
    assert_eq!(mailbox.claim(), None);
}

#[test]
fn analyzer_publishes_a_spectrum() {
    let (backend, ctx) = context(settings(1, 1));
    let registry = NodeRegistry::with_defaults();
    let mut graph = Graph::new();
    let ain = create(&mut graph, &registry, &ctx, "AIN", "in");
    let stv = graph.add_node(
        registry
            .create("STV", "spectrum", &json!({ "buffer_duration": 0.05 }), &ctx)
            .unwrap(),
    );
    graph.connect(ain.output(0), stv.input(0)).unwrap();

    // 1 kHz lands exactly on a bin of the 2400-sample buffer (20 Hz per bin)
    let tone: Vec<f32> = (0..4096)
        .map(|i| (core::f32::consts::TAU * 1_000.0 * i as f32 / 48_000.0).sin())
        .collect();
    backend.feed(&tone);

    assert!(ctx.board.named("spectrum").is_empty());
    let deadline = Instant::now() + Duration::from_secs(5);
    let spectrum = loop {
        graph.tick();
        if let Some((_, spectrum)) = ctx.board.named("spectrum").pop() {
            if spectrum.len() == 1200 {
                break spectrum;
            }
        }
        assert!(Instant::now() < deadline, "no spectrum published");
        sleep(Duration::from_millis(30));
    };

    assert_eq!(spectrum.sample_rate, 48_000);
    assert_relative_eq!(spectrum.frequencies[1], 20.0);
    assert!(spectrum.magnitudes_db.iter().all(|db| (-120.0..=10.0).contains(db)));
    let (freq, _) = spectrum.peak().unwrap();
    assert_relative_eq!(freq, 1_000.0, epsilon = 20.0);

    graph.teardown().unwrap();
    assert!(ctx.board.named("spectrum").is_empty());
    assert!(ctx.board.keys().is_empty());
}

#[test]
fn same_named_analyzers_keep_separate_spectra() {
    let (backend, ctx) = context(settings(1, 1));
    let options = AnalyzerOptions {
        buffer_duration: 0.05,
        ..AnalyzerOptions::default()
    };
    let mut graph = Graph::new();
    let ain = create(&mut graph, &NodeRegistry::with_defaults(), &ctx, "AIN", "in");
    let first = SpectrumView::new("Spectrum", options, ctx.board.clone());
    let second = SpectrumView::new("Spectrum", options, ctx.board.clone());
    let (first_key, second_key) = (first.series_key().to_owned(), second.series_key().to_owned());
    assert_ne!(first_key, second_key);

    let first = graph.add(first);
    let second = graph.add(second);
    graph.connect(ain.output(0), first.input(0)).unwrap();
    graph.connect(ain.output(0), second.input(0)).unwrap();

    backend.feed(&pattern(16_384));
    let deadline = Instant::now() + Duration::from_secs(5);
    while ctx.board.latest(&first_key).is_none() || ctx.board.latest(&second_key).is_none() {
        graph.tick();
        assert!(Instant::now() < deadline, "both analyzers should publish");
        sleep(Duration::from_millis(30));
    }
    assert_eq!(ctx.board.named("Spectrum").len(), 2);

    graph.remove_node(first).unwrap();
    assert!(ctx.board.latest(&first_key).is_none());
    assert!(ctx.board.latest(&second_key).is_some());

    graph.teardown().unwrap();
    assert!(ctx.board.keys().is_empty());
}
