//! Audio sinks.
//! The generator only ever sees this narrow interface: open, write complete
//! i16 sample buffers, close. A sink is either the null sink (discards) or a
//! streaming PCM sink on top of cpal.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::misc;

/// Where the generator's samples go.
///
/// `write` is allowed to block, bounded by the duration of the buffer being
/// written. The sample rate must be known before `open` so the generator can
/// size its buffers and slope tables up front.
pub trait AudioSink {
    fn open(&mut self) -> Result<()>;
    fn write(&mut self, samples: &[i16]) -> Result<usize>;
    fn close(&mut self);

    fn sample_rate(&self) -> u32;

    fn min_buffer_samples(&self) -> usize {
        32
    }

    fn max_buffer_samples(&self) -> usize {
        8192
    }
}

/// Discards everything, counting what it discards.
pub struct NullSink {
    sample_rate: u32,
    open: bool,
    written: Arc<AtomicUsize>,
}

impl NullSink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            open: false,
            written: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A shared counter of samples written so far, for callers that want to
    /// watch the send path without a sound card.
    pub fn written(&self) -> Arc<AtomicUsize> {
        self.written.clone()
    }
}

impl AudioSink for NullSink {
    fn open(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize> {
        if !self.open {
            return Err(Error::Sink("null sink is not open".into()));
        }
        self.written.fetch_add(samples.len(), Ordering::SeqCst);
        Ok(samples.len())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// How many buffered samples `CpalSink::write` tolerates before it blocks.
const PENDING_HIGH_WATER: usize = 16 * 1024;

struct CpalShared {
    pending: Mutex<VecDeque<i16>>,
    cond: Condvar,
    shutdown: AtomicBool,
}

/// A streaming PCM sink on the default cpal host.
///
/// cpal pulls samples from a callback; the blocking `write` side feeds a
/// shared deque that the callback drains, duplicating each sample across the
/// device's channels. The stream itself lives on a dedicated thread.
pub struct CpalSink {
    device_name: String,
    sample_rate: u32,
    shared: Arc<CpalShared>,
    player: Option<JoinHandle<()>>,
}

impl CpalSink {
    /// Probe the output device now so the sample rate is known up front.
    /// `device` of `None` means the default output device; anything else is
    /// matched against the device list by string similarity.
    pub fn new(device: Option<&str>) -> Result<Self> {
        let (device, config) = pick_device(device)?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".into());
        debug!("audio sink on `{device_name}` at {} Hz", config.sample_rate().0);

        Ok(Self {
            device_name,
            sample_rate: config.sample_rate().0,
            shared: Arc::new(CpalShared {
                pending: Mutex::new(VecDeque::new()),
                cond: Condvar::new(),
                shutdown: AtomicBool::new(false),
            }),
            player: None,
        })
    }
}

fn pick_device(wanted: Option<&str>) -> Result<(cpal::Device, cpal::SupportedStreamConfig)> {
    let host = cpal::default_host();

    let device = match wanted {
        None | Some("default") => host
            .default_output_device()
            .ok_or_else(|| Error::Sink("no default output device".into()))?,
        Some(wanted) => {
            let wanted = wanted.to_lowercase();
            host.output_devices()
                .map_err(|e| Error::Sink(e.to_string()))?
                .map(|dev| {
                    let name = dev.name().unwrap_or_default().to_lowercase();
                    (misc::similarity(&name, &wanted), dev)
                })
                .reduce(|a, b| if a.0 > b.0 { a } else { b })
                .ok_or_else(|| Error::Sink("no output devices".into()))?
                .1
        }
    };

    let config = device
        .default_output_config()
        .map_err(|e| Error::Sink(e.to_string()))?;

    Ok((device, config))
}

impl AudioSink for CpalSink {
    fn open(&mut self) -> Result<()> {
        if self.player.is_some() {
            return Ok(());
        }

        self.shared.shutdown.store(false, Ordering::SeqCst);
        let shared = self.shared.clone();
        let wanted = self.device_name.clone();

        // The stream is not Send, so it lives and dies on its own thread.
        let (ready_tx, ready_rx) = mpsc::channel();
        let player = thread::Builder::new()
            .name("radio-morse-audio".into())
            .spawn(move || run_stream(shared, wanted, ready_tx))
            .map_err(|e| Error::Sink(e.to_string()))?;

        self.player = Some(player);
        ready_rx
            .recv()
            .map_err(|_| Error::Sink("audio thread died during setup".into()))?
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize> {
        if self.player.is_none() {
            return Err(Error::Sink("sink is not open".into()));
        }

        let mut pending = self.shared.pending.lock();
        while pending.len() > PENDING_HIGH_WATER {
            if self.shared.shutdown.load(Ordering::SeqCst) {
                return Err(Error::Sink("sink is shutting down".into()));
            }
            self.shared.cond.wait(&mut pending);
        }
        pending.extend(samples.iter().copied());

        Ok(samples.len())
    }

    fn close(&mut self) {
        // Let the buffered tail play out before tearing the stream down,
        // but never hang on a stream that stopped pulling.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        let mut pending = self.shared.pending.lock();
        while !pending.is_empty() {
            if self.shared.cond.wait_until(&mut pending, deadline).timed_out() {
                break;
            }
        }

        // Flag while still holding the lock: the stream-holder thread checks
        // it under the same lock, so the wakeup cannot fall between its
        // check and its wait.
        self.shared.shutdown.store(true, Ordering::SeqCst);
        drop(pending);
        self.shared.cond.notify_all();
        if let Some(player) = self.player.take() {
            let _ = player.join();
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Body of the stream-holder thread: build the stream, report readiness,
/// park until shutdown.
fn run_stream(shared: Arc<CpalShared>, wanted: String, ready_tx: mpsc::Sender<Result<()>>) {
    let (device, config) = match pick_device(Some(&wanted)) {
        Ok(picked) => picked,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let channels = config.channels() as usize;
    let callback_shared = shared.clone();
    let stream = device.build_output_stream(
        &config.into(),
        move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
            let mut pending = callback_shared.pending.lock();
            let mut last = 0.0;
            for (i, out) in data.iter_mut().enumerate() {
                if i % channels == 0 {
                    last = match pending.pop_front() {
                        Some(sample) => sample as f32 / i16::MAX as f32,
                        None => 0.0,
                    };
                }
                *out = last;
            }
            drop(pending);
            callback_shared.cond.notify_all();
        },
        move |err| warn!("audio stream error: {err}"),
        None,
    );

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(Error::Sink(e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(Error::Sink(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    // Hold the stream alive until close().
    let mut pending = shared.pending.lock();
    while !shared.shutdown.load(Ordering::SeqCst) {
        shared.cond.wait(&mut pending);
    }
}
