#![allow(dead_code)]

use std::time::Duration;

use sketchlog::{
    action::{
        Action, ImportAction, LineOptions, LinePoint, LineTool, SoftOptions, SoftPoint, SoftTool,
        StrokeAction,
    },
    engine::render::{RenderError, RenderTarget},
    persist::{memory::MemoryStore, KvStore, PersistResult},
    runtime::{
        client::PersistenceClient,
        config::PersistConfig,
        protocol::{ResponseKind, WorkerRequest, WorkerResponse},
        worker::WorkerChannels,
    },
    types::{Color, ToolTag},
};
use tokio::sync::mpsc;

/// Color that the recording canvas refuses to replay.
pub const POISON: Color = Color::rgb(1, 2, 3);

/// What a stroke left on the canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct Mark {
    pub tool: ToolTag,
    pub color: Color,
    pub samples: usize,
}

/// Canvas double that records the visible result of every replay.
#[derive(Debug, Default)]
pub struct RecordingCanvas {
    pub base: Option<String>,
    pub marks: Vec<Mark>,
    pub clears: usize,
    pub composites: usize,
    pub commits: usize,
    pub pick: Option<Color>,
}

impl RecordingCanvas {
    pub fn visible(&self) -> (Option<String>, Vec<Mark>) {
        (self.base.clone(), self.marks.clone())
    }

    pub fn is_blank(&self) -> bool {
        self.base.is_none() && self.marks.is_empty()
    }
}

impl RenderTarget for RecordingCanvas {
    fn clear_all_layers(&mut self) {
        self.base = None;
        self.marks.clear();
        self.clears += 1;
    }

    fn replay_stroke(&mut self, stroke: &StrokeAction) -> Result<(), RenderError> {
        if stroke.color() == POISON {
            return Err(RenderError::Replay("poisoned stroke".to_string()));
        }
        self.marks.push(Mark {
            tool: stroke.tool_tag(),
            color: stroke.color(),
            samples: stroke.sample_count(),
        });
        Ok(())
    }

    fn load_image_as_base_layer(&mut self, image: &ImportAction) -> Result<(), RenderError> {
        if image.image.is_none() {
            return Err(RenderError::MissingImage);
        }
        self.base = image.name.clone().or_else(|| Some("untitled".to_string()));
        Ok(())
    }

    fn force_redraw_composite(&mut self) {
        self.composites += 1;
    }

    fn commit_active_stroke_to_saved_layer(&mut self) {
        self.commits += 1;
    }

    fn sample_color(&self, _x: f32, _y: f32) -> Option<Color> {
        self.pick
    }
}

pub fn line_points(n: usize) -> Vec<LinePoint> {
    (0..n)
        .map(|i| LinePoint::new(i as f32 * 1.5, i as f32 * 2.0 + 0.25))
        .collect()
}

pub fn brush(color: Color, n: usize) -> Action {
    Action::Stroke(StrokeAction::Line {
        tool: LineTool::Brush,
        points: line_points(n),
        options: LineOptions {
            color,
            opacity: 0.8,
            diameter: 6.0,
        },
    })
}

pub fn eraser(n: usize) -> Action {
    Action::Stroke(StrokeAction::Line {
        tool: LineTool::Eraser,
        points: (0..n)
            .map(|i| LinePoint::with_pressure(i as f32, 10.0, 0.5))
            .collect(),
        options: LineOptions {
            color: Color::BLACK,
            opacity: 1.0,
            diameter: 12.0,
        },
    })
}

pub fn soft(tool: SoftTool, color: Color, n: usize) -> Action {
    Action::Stroke(StrokeAction::Soft {
        tool,
        points: (0..n)
            .map(|i| SoftPoint {
                x: 3.0 + i as f32,
                y: 4.0,
                radius: 5.5,
                hardness: 0.25,
                flow: 0.75,
            })
            .collect(),
        options: SoftOptions {
            color,
            opacity: 0.5,
            diameter: 11.0,
            hardness: 0.25,
            flow: 0.75,
        },
    })
}

pub fn import(name: &str) -> Action {
    Action::Import(ImportAction {
        name: Some(name.to_string()),
        image: Some("data:image/png;base64,iVBORw0KGgo=".to_string()),
    })
}

pub const RED: Color = Color::rgb(255, 0, 0);
pub const GREEN: Color = Color::rgb(0, 255, 0);
pub const BLUE: Color = Color::rgb(0, 0, 255);

/// Memory store with artificial latency on reads and writes.
pub struct SlowStore {
    pub inner: MemoryStore,
    pub read_delay: Duration,
    pub write_delay: Duration,
}

impl SlowStore {
    pub fn reads(inner: MemoryStore, delay: Duration) -> Self {
        Self {
            inner,
            read_delay: delay,
            write_delay: Duration::ZERO,
        }
    }

    pub fn writes(inner: MemoryStore, delay: Duration) -> Self {
        Self {
            inner,
            read_delay: Duration::ZERO,
            write_delay: delay,
        }
    }
}

impl KvStore for SlowStore {
    fn get(&self, key: &str) -> PersistResult<Option<Vec<u8>>> {
        std::thread::sleep(self.read_delay);
        self.inner.get(key)
    }

    fn get_all(&self) -> PersistResult<Vec<(String, Vec<u8>)>> {
        std::thread::sleep(self.read_delay);
        self.inner.get_all()
    }

    fn put(&mut self, key: &str, value: &[u8]) -> PersistResult<()> {
        std::thread::sleep(self.write_delay);
        self.inner.put(key, value)
    }

    fn delete(&mut self, key: &str) -> PersistResult<bool> {
        std::thread::sleep(self.write_delay);
        self.inner.delete(key)
    }

    fn clear(&mut self) -> PersistResult<()> {
        std::thread::sleep(self.write_delay);
        self.inner.clear()
    }
}

/// Hand-driven worker: announces readiness, then only reads requests when
/// the test asks, so the request queue can be filled on purpose.
pub struct StalledWorker {
    pub requests: mpsc::Receiver<WorkerRequest>,
    pub responses: mpsc::UnboundedSender<WorkerResponse>,
}

impl StalledWorker {
    pub fn connect(config: PersistConfig) -> (PersistenceClient, Self) {
        let (req_tx, req_rx) = mpsc::channel(config.request_queue_bound);
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        resp_tx
            .send(WorkerResponse::broadcast(ResponseKind::Ready, None, None))
            .unwrap();

        let channels = WorkerChannels {
            requests: req_tx,
            responses: resp_rx,
            join: tokio::spawn(async {}),
        };
        let client = PersistenceClient::connect(channels, config);
        (
            client,
            Self {
                requests: req_rx,
                responses: resp_tx,
            },
        )
    }

    /// Requests currently sitting in the queue, oldest first.
    pub fn drain(&mut self) -> Vec<WorkerRequest> {
        let mut out = Vec::new();
        while let Ok(req) = self.requests.try_recv() {
            out.push(req);
        }
        out
    }
}
