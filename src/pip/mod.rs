pub mod render;
pub mod video;

use crate::monitor::Monitor;
use crate::scheduler::{SchedulerError, Ticker};
use image::RgbaImage;
use render::{FrameView, Renderer};
use std::ops::RangeFrom;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use video::{DisplayQueue, FrameError, PixelBuffer, SampleBuilder};

/// One frame per second.
pub const FRAME_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipState {
    Idle,
    Generating,
}

/// Renders the selected metric at a fixed cadence and feeds the frames to a
/// display queue. Rendering happens on the tick; conversion and sample
/// wrapping run on a single worker so frame order is preserved.
pub struct PipController {
    monitor: Arc<Monitor>,
    renderer: Arc<dyn Renderer>,
    queue: Arc<Mutex<DisplayQueue>>,
    frames: mpsc::UnboundedSender<RgbaImage>,
    ticker: Mutex<Ticker>,
}

impl PipController {
    pub fn spawn(
        monitor: Arc<Monitor>,
        renderer: Arc<dyn Renderer>,
        retained_frames: usize,
    ) -> Result<Arc<Self>, SchedulerError> {
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        let queue = Arc::new(Mutex::new(DisplayQueue::new(retained_frames)));
        let (frames, rx) = mpsc::unbounded_channel();

        runtime.spawn(run_worker(rx, queue.clone(), monitor.clone()));

        Ok(Arc::new(Self {
            monitor,
            renderer,
            queue,
            frames,
            ticker: Mutex::new(Ticker::new()),
        }))
    }

    pub fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.lock_ticker().start(FRAME_PERIOD, move |_| {
            let weak = weak.clone();
            async move {
                if let Some(pip) = weak.upgrade() {
                    pip.produce_frame().await;
                }
            }
        })?;
        info!("генерация кадров PiP запущена");
        Ok(())
    }

    pub fn stop(&self) {
        let mut ticker = self.lock_ticker();
        if ticker.is_running() {
            ticker.stop();
            info!("генерация кадров PiP остановлена");
        }
    }

    pub fn state(&self) -> PipState {
        if self.lock_ticker().is_running() {
            PipState::Generating
        } else {
            PipState::Idle
        }
    }

    // Playback controls of the PiP surface.

    pub fn set_playing(self: &Arc<Self>, playing: bool) -> Result<(), SchedulerError> {
        if playing {
            self.start()
        } else {
            self.stop();
            Ok(())
        }
    }

    /// The stream only ever shows "now", so the range is unbounded.
    pub fn time_range(&self) -> RangeFrom<Duration> {
        Duration::ZERO..
    }

    pub fn is_playback_paused(&self) -> bool {
        self.state() == PipState::Idle
    }

    pub fn render_size_changed(&self, width: u32, height: u32) {
        info!(width, height, "изменился размер окна PiP");
    }

    pub fn skip_by(&self, interval: Duration) {
        debug!(?interval, "перемотка PiP игнорируется");
    }

    pub fn frames_enqueued(&self) -> u64 {
        self.lock_queue().enqueued_total()
    }

    pub fn latest_png(&self) -> Result<Option<Vec<u8>>, FrameError> {
        self.lock_queue().encode_latest_png()
    }

    async fn produce_frame(&self) {
        let settings = self.monitor.settings().get().await;
        let metric = settings.pip_metric;
        let snapshot = self.monitor.current_snapshot().await;
        let history = self.monitor.history(metric).await;
        let view = FrameView::build(metric, &snapshot, &history);

        match self.renderer.render(&view, settings.theme) {
            Ok(img) => {
                if self.frames.send(img).is_err() {
                    self.monitor.metrics().inc_pip_frame("dropped");
                    warn!("обработчик кадров PiP завершён, кадр пропущен");
                }
            }
            Err(err) => {
                self.monitor.metrics().inc_pip_frame("dropped");
                warn!(error = %err, "не удалось отрисовать кадр PiP");
            }
        }
    }

    fn lock_ticker(&self) -> MutexGuard<'_, Ticker> {
        self.ticker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_queue(&self) -> MutexGuard<'_, DisplayQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<RgbaImage>,
    queue: Arc<Mutex<DisplayQueue>>,
    monitor: Arc<Monitor>,
) {
    let mut builder = SampleBuilder::new(FRAME_PERIOD);
    while let Some(img) = rx.recv().await {
        let sample = PixelBuffer::from_image(&img).and_then(|buffer| builder.build(buffer));
        match sample {
            Ok(sample) => {
                let pts = sample.timing.pts;
                queue
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .enqueue(sample);
                monitor.metrics().inc_pip_frame("enqueued");
                debug!(?pts, "кадр PiP поставлен в очередь");
            }
            Err(err) => {
                monitor.metrics().inc_pip_frame("dropped");
                warn!(error = %err, "кадр PiP отброшен");
            }
        }
    }
    debug!("обработчик кадров PiP завершён");
}
