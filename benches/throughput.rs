use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use sketchlog::{
    action::{
        Action, HistoryState, ImportAction, LineOptions, LinePoint, LineTool, StrokeAction,
    },
    core::log::ActionLog,
    engine::{
        history::HistoryEngine,
        render::{RenderError, RenderTarget},
    },
    serial::{decode_state, encode_state},
    types::Color,
};

#[derive(Default)]
struct CountingCanvas {
    replayed: usize,
}

impl RenderTarget for CountingCanvas {
    fn clear_all_layers(&mut self) {
        self.replayed = 0;
    }

    fn replay_stroke(&mut self, stroke: &StrokeAction) -> Result<(), RenderError> {
        self.replayed += stroke.sample_count();
        Ok(())
    }

    fn load_image_as_base_layer(&mut self, _image: &ImportAction) -> Result<(), RenderError> {
        Ok(())
    }

    fn force_redraw_composite(&mut self) {}
}

fn stroke(i: u64, samples: usize) -> Action {
    Action::Stroke(StrokeAction::Line {
        tool: LineTool::Brush,
        points: (0..samples)
            .map(|s| LinePoint::with_pressure(s as f32, i as f32, 0.5))
            .collect(),
        options: LineOptions {
            color: Color::rgb((i % 255) as u8, 0, 0),
            opacity: 1.0,
            diameter: 4.0,
        },
    })
}

fn bench_appends(c: &mut Criterion) {
    c.bench_function("log_append_50k", |b| {
        b.iter(|| {
            let mut log = ActionLog::new();
            for i in 0..50_000u64 {
                let _ = log.append(stroke(i, 2));
            }
        });
    });
}

fn bench_undo_redo(c: &mut Criterion) {
    let mut group = c.benchmark_group("undo_redo_replay");

    for n in [10usize, 100usize, 1000usize] {
        let mut engine = HistoryEngine::new(CountingCanvas::default());
        for i in 0..n as u64 {
            engine.add(stroke(i, 16));
        }
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                engine.undo();
                engine.redo();
            });
        });
    }

    group.finish();
}

fn bench_state_codec(c: &mut Criterion) {
    let mut log = ActionLog::new();
    for i in 0..5_000u64 {
        log.append(stroke(i, 32));
    }
    let state: HistoryState = log.snapshot();

    c.bench_function("state_encode_decode_5k", |b| {
        b.iter(|| {
            let plain = encode_state(&state);
            let _ = decode_state(plain);
        });
    });
}

criterion_group!(benches, bench_appends, bench_undo_redo, bench_state_codec);
criterion_main!(benches);
