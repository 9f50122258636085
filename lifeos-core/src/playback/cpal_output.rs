//! Speaker output via cpal.
//!
//! The stream lives on a dedicated thread (cpal streams are `!Send`). Each
//! scheduled buffer is resampled to the device rate up front and handed to
//! the output callback as a *voice* with an absolute start frame. The
//! callback mixes active voices, advances a frame counter that serves as the
//! context clock, and reports finished voices over a bounded crossbeam
//! channel; the device thread forwards those to the async side. A finished
//! voice stays in the mix, silent, until its id fits in that channel.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{BufferId, InboundAudioBuffer, OutputContext, OutputDevice};
use crate::{
    audio::resample::convert_buffer,
    error::{LiveError, Result},
};

/// Voice list capacity and ended-queue depth.
const MAX_VOICES: usize = 64;

struct Voice {
    id: BufferId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Voices owned by the output callback.
struct Mixer {
    voices: Vec<Voice>,
}

impl Mixer {
    fn new() -> Self {
        Self {
            voices: Vec::with_capacity(MAX_VOICES),
        }
    }

    fn add(&mut self, voice: Voice) {
        self.voices.push(voice);
    }

    /// Sum of all voices at absolute frame `t`, clamped to [-1, 1].
    fn sample_at(&self, t: u64) -> f32 {
        let mut acc = 0.0f32;
        for voice in &self.voices {
            if t >= voice.start_frame {
                if let Some(s) = voice.samples.get((t - voice.start_frame) as usize) {
                    acc += s;
                }
            }
        }
        acc.clamp(-1.0, 1.0)
    }

    /// Report and drop every voice that has finished by frame `end`. Ids that
    /// do not fit in `done` stay queued here for the next call.
    fn retire(&mut self, end: u64, done: &Sender<BufferId>) {
        self.voices.retain(|voice| {
            if voice.end_frame() > end {
                return true;
            }
            match done.try_send(voice.id) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => false,
                Err(TrySendError::Full(_)) => true,
            }
        });
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.voices.len()
    }
}

/// The default (or a named) output device.
#[derive(Debug, Clone, Default)]
pub struct CpalOutput {
    preferred_device: Option<String>,
}

impl CpalOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(name: impl Into<String>) -> Self {
        Self {
            preferred_device: Some(name.into()),
        }
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    voices_rx: Receiver<Voice>,
    done_tx: Sender<BufferId>,
    clock: Arc<AtomicU64>,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    let mut mixer = Mixer::new();
    device.build_output_stream(
        config,
        move |data: &mut [T], _info| {
            while let Ok(voice) = voices_rx.try_recv() {
                mixer.add(voice);
            }

            let base = clock.load(Ordering::Relaxed);
            let frames = data.len() / channels;
            for (i, frame) in data.chunks_exact_mut(channels).enumerate() {
                let out = T::from_sample(mixer.sample_at(base + i as u64));
                frame.iter_mut().for_each(|o| *o = out);
            }

            let end = base + frames as u64;
            clock.store(end, Ordering::Relaxed);
            mixer.retire(end, &done_tx);
        },
        |err| error!("output stream error: {err}"),
        None,
    )
}

fn open_stream(
    preferred: Option<&str>,
    voices_rx: Receiver<Voice>,
    done_tx: Sender<BufferId>,
    clock: Arc<AtomicU64>,
) -> Result<(Stream, u32)> {
    let host = cpal::default_host();
    let preferred = preferred.and_then(|wanted| {
        host.output_devices()
            .ok()
            .and_then(|mut devices| devices.find(|d| d.name().map(|n| n == wanted).unwrap_or(false)))
    });
    let device = preferred
        .or_else(|| host.default_output_device())
        .ok_or(LiveError::NoDefaultOutputDevice)?;

    let supported = device
        .default_output_config()
        .map_err(|e| LiveError::AudioDevice(e.to_string()))?;
    let rate = supported.sample_rate().0;
    let config: StreamConfig = supported.config();
    info!(
        device = device.name().unwrap_or_default().as_str(),
        rate,
        channels = config.channels,
        "opening output device"
    );

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_output::<f32>(&device, &config, voices_rx, done_tx, clock),
        SampleFormat::I16 => build_output::<i16>(&device, &config, voices_rx, done_tx, clock),
        SampleFormat::U16 => build_output::<u16>(&device, &config, voices_rx, done_tx, clock),
        SampleFormat::I32 => build_output::<i32>(&device, &config, voices_rx, done_tx, clock),
        fmt => {
            return Err(LiveError::AudioStream(format!(
                "unsupported output sample format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| LiveError::AudioStream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| LiveError::AudioStream(e.to_string()))?;
    Ok((stream, rate))
}

impl OutputDevice for CpalOutput {
    fn open(
        &self,
        _sample_rate: u32,
        ended: mpsc::UnboundedSender<BufferId>,
    ) -> Result<Box<dyn OutputContext>> {
        let (voices_tx, voices_rx) = crossbeam_channel::unbounded::<Voice>();
        let (done_tx, done_rx) = crossbeam_channel::bounded::<BufferId>(MAX_VOICES);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();
        let clock = Arc::new(AtomicU64::new(0));

        let preferred = self.preferred_device.clone();
        let stream_clock = Arc::clone(&clock);
        let join = std::thread::Builder::new()
            .name("lifeos-speaker".into())
            .spawn(move || {
                let stream = match open_stream(preferred.as_deref(), voices_rx, done_tx, stream_clock)
                {
                    Ok((stream, rate)) => {
                        let _ = open_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };

                loop {
                    crossbeam_channel::select! {
                        recv(stop_rx) -> _ => break,
                        recv(done_rx) -> id => match id {
                            Ok(id) => {
                                let _ = ended.send(id);
                            }
                            Err(_) => break,
                        },
                    }
                }
                drop(stream);
                debug!("speaker released");
            })?;

        match open_rx.recv() {
            Ok(Ok(device_rate)) => Ok(Box::new(CpalOutputContext {
                voices_tx,
                clock,
                device_rate,
                device: Some((stop_tx, join)),
            })),
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => {
                let _ = join.join();
                Err(LiveError::AudioDevice(
                    "speaker thread exited before opening".into(),
                ))
            }
        }
    }
}

struct CpalOutputContext {
    voices_tx: Sender<Voice>,
    clock: Arc<AtomicU64>,
    device_rate: u32,
    device: Option<(Sender<()>, JoinHandle<()>)>,
}

impl OutputContext for CpalOutputContext {
    fn current_time(&self) -> f64 {
        self.clock.load(Ordering::Relaxed) as f64 / self.device_rate as f64
    }

    fn start_at(&mut self, id: BufferId, buffer: InboundAudioBuffer, when: f64) -> Result<()> {
        if self.device.is_none() {
            return Err(LiveError::AudioStream("output context closed".into()));
        }
        let rate = self.device_rate as f64;
        let start_frame = (when.max(0.0) * rate).round() as u64;
        let frames = (buffer.duration() * rate).round() as usize;
        let samples = convert_buffer(&buffer.samples, buffer.sample_rate, self.device_rate, frames);
        self.voices_tx
            .send(Voice {
                id,
                start_frame,
                samples,
            })
            .map_err(|_| LiveError::AudioStream("output stream is gone".into()))
    }

    fn close(&mut self) {
        if let Some((stop_tx, join)) = self.device.take() {
            let _ = stop_tx.send(());
            if join.join().is_err() {
                warn!("speaker thread panicked during shutdown");
            }
        }
    }
}

impl Drop for CpalOutputContext {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(id: BufferId, start_frame: u64, len: usize) -> Voice {
        Voice {
            id,
            start_frame,
            samples: vec![0.25; len],
        }
    }

    #[test]
    fn overlapping_voices_sum_and_clamp() {
        let mut mixer = Mixer::new();
        mixer.add(voice(1, 0, 10));
        mixer.add(voice(2, 5, 10));
        assert_eq!(mixer.sample_at(0), 0.25);
        assert_eq!(mixer.sample_at(7), 0.5);
        assert_eq!(mixer.sample_at(12), 0.25);
        assert_eq!(mixer.sample_at(15), 0.0);

        for id in 3..10 {
            mixer.add(voice(id, 0, 4));
        }
        assert_eq!(mixer.sample_at(0), 1.0);
    }

    #[test]
    fn full_ended_queue_keeps_voice_until_next_callback() {
        let (done_tx, done_rx) = crossbeam_channel::bounded::<BufferId>(1);
        let mut mixer = Mixer::new();
        mixer.add(voice(1, 0, 100));
        mixer.add(voice(2, 0, 200));
        mixer.add(voice(3, 400, 600));

        mixer.retire(512, &done_tx);
        assert_eq!(done_rx.try_recv().ok(), Some(1));
        assert!(done_rx.try_recv().is_err());
        assert_eq!(mixer.len(), 2, "voice 2 waits for room in the queue");
        assert_eq!(mixer.sample_at(300), 0.0, "a finished voice stays silent");

        mixer.retire(1_024, &done_tx);
        assert_eq!(done_rx.try_recv().ok(), Some(2));
        mixer.retire(1_024, &done_tx);
        assert_eq!(done_rx.try_recv().ok(), Some(3));
        assert_eq!(mixer.len(), 0);
    }

    #[test]
    fn disconnected_queue_drops_finished_voices() {
        let (done_tx, done_rx) = crossbeam_channel::bounded::<BufferId>(1);
        drop(done_rx);
        let mut mixer = Mixer::new();
        mixer.add(voice(1, 0, 10));
        mixer.retire(10, &done_tx);
        assert_eq!(mixer.len(), 0);
    }
}
