//! `VirtualOutput`: a manually clocked output device.
//!
//! Nothing is rendered. The clock only moves when the owner calls
//! [`VirtualOutput::advance_to`], which also fires ended notifications for
//! every buffer whose end time has been reached, in end-time order.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{BufferId, InboundAudioBuffer, OutputContext, OutputDevice};
use crate::error::{LiveError, Result};

/// One `start_at` call as seen by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct StartRecord {
    pub id: BufferId,
    pub when: f64,
    pub duration: f64,
    /// Clock reading at the moment of the call.
    pub requested_at: f64,
}

#[derive(Default)]
struct State {
    time: f64,
    pending: Vec<(BufferId, f64)>,
    starts: Vec<StartRecord>,
    ended: Option<mpsc::UnboundedSender<BufferId>>,
    closed: bool,
    opens: usize,
    fail_open: Option<String>,
}

#[derive(Clone, Default)]
pub struct VirtualOutput {
    state: Arc<Mutex<State>>,
}

impl VirtualOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `open` fails with an audio device error.
    pub fn failing(reason: &str) -> Self {
        let output = Self::new();
        output.state.lock().fail_open = Some(reason.to_string());
        output
    }

    /// Move the clock forward to `t` seconds and fire due ended events.
    /// Moving backwards is ignored.
    pub fn advance_to(&self, t: f64) {
        let mut state = self.state.lock();
        if t > state.time {
            state.time = t;
        }
        let now = state.time;

        let mut due: Vec<(BufferId, f64)> = Vec::new();
        state.pending.retain(|&(id, end)| {
            if end <= now + 1e-9 {
                due.push((id, end));
                false
            } else {
                true
            }
        });
        due.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        if let Some(tx) = state.ended.as_ref() {
            for (id, _) in due {
                let _ = tx.send(id);
            }
        }
    }

    pub fn now(&self) -> f64 {
        self.state.lock().time
    }

    pub fn starts(&self) -> Vec<StartRecord> {
        self.state.lock().starts.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opens
    }
}

impl OutputDevice for VirtualOutput {
    fn open(
        &self,
        _sample_rate: u32,
        ended: mpsc::UnboundedSender<BufferId>,
    ) -> Result<Box<dyn OutputContext>> {
        let mut state = self.state.lock();
        if let Some(reason) = state.fail_open.clone() {
            return Err(LiveError::AudioDevice(reason));
        }
        state.time = 0.0;
        state.pending.clear();
        state.starts.clear();
        state.ended = Some(ended);
        state.closed = false;
        state.opens += 1;
        Ok(Box::new(VirtualContext {
            state: Arc::clone(&self.state),
        }))
    }
}

struct VirtualContext {
    state: Arc<Mutex<State>>,
}

impl OutputContext for VirtualContext {
    fn current_time(&self) -> f64 {
        self.state.lock().time
    }

    fn start_at(&mut self, id: BufferId, buffer: InboundAudioBuffer, when: f64) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(LiveError::AudioStream("output context closed".into()));
        }
        let duration = buffer.duration();
        let requested_at = state.time;
        state.pending.push((id, when + duration));
        state.starts.push(StartRecord {
            id,
            when,
            duration,
            requested_at,
        });
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.pending.clear();
        state.ended = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ended_events_fire_in_end_order() {
        let output = VirtualOutput::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ctx = output.open(24_000, tx).expect("open");

        ctx.start_at(7, InboundAudioBuffer::new(vec![0.0; 24_000], 24_000), 0.0)
            .expect("start");
        ctx.start_at(3, InboundAudioBuffer::new(vec![0.0; 12_000], 24_000), 0.0)
            .expect("start");

        output.advance_to(0.4);
        assert!(rx.try_recv().is_err());
        output.advance_to(1.0);
        assert_eq!(rx.try_recv().ok(), Some(3));
        assert_eq!(rx.try_recv().ok(), Some(7));
    }

    #[test]
    fn closed_context_rejects_buffers() {
        let output = VirtualOutput::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut ctx = output.open(24_000, tx).expect("open");
        ctx.close();
        assert!(output.is_closed());
        assert!(ctx
            .start_at(0, InboundAudioBuffer::new(vec![0.0; 10], 24_000), 0.0)
            .is_err());
    }

    #[test]
    fn failing_output_never_opens() {
        let output = VirtualOutput::failing("no speakers");
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = output.open(24_000, tx).err().expect("should fail");
        assert!(err.is_device_error());
        assert_eq!(output.open_count(), 0);
    }
}
