//! Live monitor: input device -> output device, with a spectrum of the first channel.
//!
//! Usage: `nodedsp [settings.json]`. Press Enter to stop.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use nodedsp::{
    AnalyzerOptions, AudioSettings, CpalBackend, EngineError, Graph, NodeContext, NodeRegistry, Scheduler,
    SpectrumBoard, SpectrumView,
};
use tracing_subscriber::EnvFilter;

const REPORT_INTERVAL: Duration = Duration::from_millis(500);

fn main() -> Result<(), EngineError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .ok();

    let settings = match std::env::args().nth(1) {
        Some(path) => AudioSettings::from_path(path)?,
        None => AudioSettings::default(),
    };
    settings.validate()?;

    for device in CpalBackend::list_inputs() {
        tracing::info!(index = device.index, name = %device.name, channels = device.max_input_channels, "input device");
    }
    for device in CpalBackend::list_outputs() {
        tracing::info!(index = device.index, name = %device.name, channels = device.max_output_channels, "output device");
    }

    let board = SpectrumBoard::new();
    let ctx = NodeContext::new(settings.clone(), Arc::new(CpalBackend::new()), board.clone());
    let registry = NodeRegistry::with_defaults();
    let none = serde_json::Value::Null;

    let mut graph = Graph::new();
    let source = graph.add_node(registry.create("AIN", "Audio In", &none, &ctx)?);
    let sink = graph.add_node(registry.create("AOUT", "Audio Out", &none, &ctx)?);
    let view = SpectrumView::new("Spectrum", AnalyzerOptions::default(), board.clone());
    let series = view.series_key().to_owned();
    let spectrum = graph.add(view);

    let routed = settings.input.channels.min(settings.output.channels) as usize;
    for ch in 0..routed {
        graph.connect(source.output(ch), sink.input(ch))?;
    }
    graph.connect(source.output(0), spectrum.input(0))?;

    let mut scheduler = Scheduler::new(graph);
    scheduler.start()?;
    tracing::info!("running, press Enter to stop");

    let (enter_tx, enter_rx) = bounded::<()>(1);
    std::thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        let _ = enter_tx.send(());
    });

    loop {
        match enter_rx.recv_timeout(REPORT_INTERVAL) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        let stats = scheduler.stats();
        let peak = board.latest(&series).and_then(|s| s.peak());
        match peak {
            Some((freq, db)) => tracing::info!(
                tick_ms = stats.last_tick.as_secs_f64() * 1e3,
                ticks = stats.ticks,
                faults = stats.faults,
                peak_hz = freq,
                peak_db = db,
                "status"
            ),
            None => tracing::info!(
                tick_ms = stats.last_tick.as_secs_f64() * 1e3,
                ticks = stats.ticks,
                faults = stats.faults,
                "status"
            ),
        }
    }

    scheduler.shutdown()
}
