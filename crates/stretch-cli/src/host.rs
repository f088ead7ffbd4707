//! Minimal stand-ins for the `AudioClock`/`TimerHost`/`VoiceFactory` seams
//! the engine needs a host to supply. A real host backs these with its
//! audio graph and event loop; this one backs them with `std::thread` so the
//! demo binary can drive a full playback session without any audio hardware.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use stretch_player::{AudioClock, GainCurve, TimerHandle, TimerHost, Voice, VoiceBuffer, VoiceFactory};

/// Wall-clock `AudioClock`, zeroed at construction.
pub struct WallClock {
    origin: Instant,
}

impl WallClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            origin: Instant::now(),
        })
    }
}

impl AudioClock for WallClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// `TimerHost` backed by detached `std::thread::sleep` timers. Each handle
/// owns a cancel flag the sleeping thread checks right before firing.
pub struct ThreadTimerHost {
    next_id: AtomicU64,
    flags: Mutex<HashMap<u64, Arc<AtomicBool>>>,
}

impl ThreadTimerHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            flags: Mutex::new(HashMap::new()),
        })
    }
}

impl TimerHost for ThreadTimerHost {
    fn schedule_once(&self, delay_ms: u64, callback: Box<dyn FnOnce() + Send>) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.flags.lock().unwrap().insert(id, Arc::clone(&cancel_flag));
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(delay_ms));
            if !cancel_flag.load(Ordering::Acquire) {
                callback();
            }
        });
        TimerHandle(id)
    }

    fn schedule_interval(&self, interval_ms: u64, callback: Box<dyn Fn() + Send>) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.flags.lock().unwrap().insert(id, Arc::clone(&cancel_flag));
        thread::spawn(move || loop {
            thread::sleep(Duration::from_millis(interval_ms));
            if cancel_flag.load(Ordering::Acquire) {
                return;
            }
            callback();
        });
        TimerHandle(id)
    }

    fn cancel(&self, handle: &TimerHandle) {
        if let Some(flag) = self.flags.lock().unwrap().get(&handle.0) {
            flag.store(true, Ordering::Release);
        }
    }
}

/// A voice that logs its gain automation and fires `onended` on its own
/// sleeping thread once the buffer would have finished playing, simulating
/// the audio-clock transition path without a real output device.
pub struct LoggingVoice {
    onended: Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>,
}

impl Voice for LoggingVoice {
    fn apply_gain_curve(&self, curve: GainCurve) {
        log::trace!("voice: gain curve {curve:?}");
    }

    fn stop(&self) {
        *self.onended.lock().unwrap() = None;
    }

    fn set_onended(&self, callback: Option<Box<dyn FnOnce() + Send>>) {
        *self.onended.lock().unwrap() = callback;
    }
}

pub struct LoggingVoiceFactory;

impl VoiceFactory for LoggingVoiceFactory {
    type Voice = LoggingVoice;

    fn create_voice(&self, buffer: &VoiceBuffer, offset_in_buffer: usize, start_time: f64) -> Self::Voice {
        let remaining_sec = buffer.duration_sec() - (offset_in_buffer as f64 / buffer.sample_rate as f64);
        log::debug!(
            "voice: scheduled at ctx_time={start_time:.3} offset={offset_in_buffer} remaining={remaining_sec:.3}s"
        );
        let onended: Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>> = Arc::new(Mutex::new(None));
        let onended_for_thread = Arc::clone(&onended);
        thread::spawn(move || {
            thread::sleep(Duration::from_secs_f64(remaining_sec.max(0.0)));
            if let Some(callback) = onended_for_thread.lock().unwrap().take() {
                callback();
            }
        });
        LoggingVoice { onended }
    }
}
