//! The Chunk Player (spec §4.5): gapless, crossfaded transitions between at
//! most two voices, via both an audio-clock `onended` path and a wall-clock
//! fallback timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::clock::{AudioClock, TimerHandle, TimerHost};
use crate::voice::{GainCurve, Voice, VoiceBuffer, VoiceFactory};

/// Absorbs main-thread jitter so the wall-clock fallback fires slightly
/// after the nominal transition point, never before it (spec §4.5).
const TRANSITION_TIMER_MARGIN_MS: u64 = 50;

#[derive(Debug, Clone, Copy)]
pub struct PlayerConfig {
    pub crossfade_sec: f64,
    pub lookahead_interval_ms: u64,
    pub lookahead_threshold_sec: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            crossfade_sec: 0.1,
            lookahead_interval_ms: 200,
            lookahead_threshold_sec: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

struct VoiceSlot<V> {
    voice: V,
    start_ctx_time: f64,
    start_offset_sec: f64,
    duration_sec: f64,
    ended_flag: Arc<AtomicBool>,
}

type OnTransition = Box<dyn FnMut() + 'static>;
type OnChunkEnded = Box<dyn FnMut() + 'static>;
type OnNeedNext = Box<dyn FnMut() + 'static>;

pub struct ChunkPlayer<C: AudioClock, F: VoiceFactory, T: TimerHost> {
    clock: Arc<C>,
    factory: Arc<F>,
    timers: Arc<T>,
    config: PlayerConfig,
    state: PlaybackState,
    current: Option<VoiceSlot<F::Voice>>,
    next: Option<VoiceSlot<F::Voice>>,
    frozen_position: Option<f64>,
    lookahead_timer: Option<TimerHandle>,
    lookahead_due: Option<Arc<AtomicBool>>,
    transition_timer: Option<TimerHandle>,
    transition_fired: Option<Arc<AtomicBool>>,
    disposed: bool,
    on_transition: OnTransition,
    on_chunk_ended: OnChunkEnded,
    on_need_next: OnNeedNext,
}

impl<C: AudioClock, F: VoiceFactory, T: TimerHost> ChunkPlayer<C, F, T> {
    pub fn new(
        clock: Arc<C>,
        factory: Arc<F>,
        timers: Arc<T>,
        config: PlayerConfig,
        on_transition: impl FnMut() + 'static,
        on_chunk_ended: impl FnMut() + 'static,
        on_need_next: impl FnMut() + 'static,
    ) -> Self {
        Self {
            clock,
            factory,
            timers,
            config,
            state: PlaybackState::Stopped,
            current: None,
            next: None,
            frozen_position: None,
            lookahead_timer: None,
            lookahead_due: None,
            transition_timer: None,
            transition_fired: None,
            disposed: false,
            on_transition: Box::new(on_transition),
            on_chunk_ended: Box::new(on_chunk_ended),
            on_need_next: Box::new(on_need_next),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.state == PlaybackState::Paused
    }

    pub fn has_next_scheduled(&self) -> bool {
        self.next.is_some()
    }

    /// The current voice's `(start_ctx_time, duration_sec)`, for callers
    /// that need to compute a nominal start time for the chunk after it
    /// (e.g. proactive scheduling, overlap-trim bookkeeping).
    pub fn current_voice_timing(&self) -> Option<(f64, f64)> {
        self.current
            .as_ref()
            .map(|slot| (slot.start_ctx_time, slot.duration_sec))
    }

    /// Seconds remaining in the current voice, or `None` if nothing is
    /// playing.
    pub fn remaining_in_current(&self) -> Option<f64> {
        self.current
            .as_ref()
            .map(|slot| slot.duration_sec - self.position())
    }

    /// `ctx.currentTime - playStartCtxTime + playStartOffset` while playing,
    /// the frozen pre-pause value while paused, 0 while stopped (spec
    /// §4.5 "Position query").
    pub fn position(&self) -> f64 {
        match self.state {
            PlaybackState::Stopped => 0.0,
            PlaybackState::Paused => self.frozen_position.unwrap_or(0.0),
            PlaybackState::Playing => self
                .current
                .as_ref()
                .map(|slot| self.clock.now() - slot.start_ctx_time + slot.start_offset_sec)
                .unwrap_or(0.0),
        }
    }

    pub fn play_chunk(
        &mut self,
        buffer: VoiceBuffer,
        start_ctx_time: f64,
        offset_in_buffer: usize,
        skip_fade_in: bool,
    ) {
        if self.disposed {
            return;
        }
        self.cancel_transition_timer();
        self.cancel_lookahead_timer();
        self.teardown_voice(VoiceSlotKind::Current);
        self.teardown_voice(VoiceSlotKind::Next);

        let offset_sec = offset_in_buffer as f64 / buffer.sample_rate as f64;
        let duration_sec = buffer.duration_sec();
        let voice = self
            .factory
            .create_voice(&buffer, offset_in_buffer, start_ctx_time);

        let ended_flag = Arc::new(AtomicBool::new(false));
        let flag_for_callback = Arc::clone(&ended_flag);
        voice.set_onended(Some(Box::new(move || {
            flag_for_callback.store(true, Ordering::Release);
        })));

        if self.config.crossfade_sec > 0.0 && !skip_fade_in {
            voice.apply_gain_curve(GainCurve::HannRamp {
                start_time: start_ctx_time,
                duration_sec: self.config.crossfade_sec,
                from: 0.0,
                to: 1.0,
            });
        } else {
            voice.apply_gain_curve(GainCurve::Constant(1.0));
        }

        self.current = Some(VoiceSlot {
            voice,
            start_ctx_time,
            start_offset_sec: offset_sec,
            duration_sec,
            ended_flag,
        });
        self.state = PlaybackState::Playing;
        self.frozen_position = None;
        self.start_lookahead_timer();
    }

    /// Idempotent: a lookahead call that fires while `next` is already
    /// scheduled is a no-op (spec §4.6 "must not re-schedule if `next` is
    /// already set").
    pub fn schedule_next(&mut self, buffer: VoiceBuffer, nominal_start_time: f64) {
        if self.disposed || self.next.is_some() || self.current.is_none() {
            return;
        }
        let crossfade = self.config.crossfade_sec;
        let next_start_time = nominal_start_time - crossfade;

        if let Some(current) = &self.current {
            current.voice.apply_gain_curve(GainCurve::HannRamp {
                start_time: next_start_time,
                duration_sec: crossfade,
                from: 1.0,
                to: 0.0,
            });
        }

        let voice = self.factory.create_voice(&buffer, 0, next_start_time);
        let ended_flag = Arc::new(AtomicBool::new(false));
        let flag_for_callback = Arc::clone(&ended_flag);
        voice.set_onended(Some(Box::new(move || {
            flag_for_callback.store(true, Ordering::Release);
        })));
        voice.apply_gain_curve(GainCurve::HannRamp {
            start_time: next_start_time,
            duration_sec: crossfade,
            from: 0.0,
            to: 1.0,
        });

        let duration_sec = buffer.duration_sec();
        self.next = Some(VoiceSlot {
            voice,
            start_ctx_time: next_start_time,
            start_offset_sec: 0.0,
            duration_sec,
            ended_flag,
        });

        self.cancel_transition_timer();
        let now = self.clock.now();
        let delay_ms = ((next_start_time - now).max(0.0) * 1000.0) as u64 + TRANSITION_TIMER_MARGIN_MS;
        let fired = Arc::new(AtomicBool::new(false));
        let fired_for_callback = Arc::clone(&fired);
        let handle = self
            .timers
            .schedule_once(delay_ms, Box::new(move || {
                fired_for_callback.store(true, Ordering::Release);
            }));
        self.transition_timer = Some(handle);
        self.transition_fired = Some(fired);
    }

    pub fn handle_seek(&mut self, buffer: VoiceBuffer, offset_in_buffer: usize) {
        if self.disposed {
            return;
        }
        self.cancel_transition_timer();
        self.teardown_voice(VoiceSlotKind::Next);
        let now = self.clock.now();
        self.play_chunk(buffer, now, offset_in_buffer, false);
    }

    /// Cancels both timers, stops both voices, and freezes the reported
    /// position at its pre-pause value. The player performs no restart on
    /// its own: resuming is the engine's job, via another `play_chunk` call
    /// (spec §4.5 "resume: the player itself performs no restart").
    pub fn pause(&mut self) {
        if self.disposed || self.state != PlaybackState::Playing {
            return;
        }
        self.frozen_position = Some(self.position());
        self.cancel_transition_timer();
        self.cancel_lookahead_timer();
        self.teardown_voice(VoiceSlotKind::Current);
        self.teardown_voice(VoiceSlotKind::Next);
        self.state = PlaybackState::Paused;
    }

    pub fn stop(&mut self) {
        if self.disposed {
            return;
        }
        self.cancel_transition_timer();
        self.cancel_lookahead_timer();
        self.teardown_voice(VoiceSlotKind::Current);
        self.teardown_voice(VoiceSlotKind::Next);
        self.state = PlaybackState::Stopped;
        self.frozen_position = None;
    }

    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.stop();
        self.disposed = true;
    }

    /// Drains the audio-clock and wall-clock transition signals. Called
    /// once per cooperative main-thread tick (spec §5).
    pub fn poll(&mut self) {
        if self.disposed {
            return;
        }

        if self.state == PlaybackState::Playing {
            let current_ended = self
                .current
                .as_ref()
                .map(|slot| slot.ended_flag.load(Ordering::Acquire))
                .unwrap_or(false);
            if current_ended {
                self.handle_current_ended();
                return;
            }
        }

        if let Some(fired) = &self.transition_fired {
            if fired.load(Ordering::Acquire) {
                self.transition_fired = None;
                self.transition_timer = None;
                if self.state == PlaybackState::Playing && self.next.is_some() {
                    self.promote_next_and_notify();
                }
            }
        }

        self.poll_lookahead();
    }

    fn poll_lookahead(&mut self) {
        let due = match &self.lookahead_due {
            Some(flag) => flag.swap(false, Ordering::AcqRel),
            None => false,
        };
        if !due || self.state != PlaybackState::Playing || self.next.is_some() {
            return;
        }
        let Some(current) = &self.current else {
            return;
        };
        let remaining = current.duration_sec - self.position();
        if remaining < self.config.lookahead_threshold_sec {
            (self.on_need_next)();
        }
    }

    /// Audio-clock path: the current voice's end-of-buffer event fired.
    fn handle_current_ended(&mut self) {
        let next_buffer_present = self.next.is_some();
        if next_buffer_present {
            self.cancel_transition_timer();
            self.promote_next_and_notify();
        } else {
            (self.on_chunk_ended)();
        }
    }

    fn promote_next_and_notify(&mut self) {
        let Some(next) = self.next.take() else {
            return;
        };
        self.teardown_voice(VoiceSlotKind::Current);
        self.current = Some(next);
        self.start_lookahead_timer();
        (self.on_transition)();
    }

    fn teardown_voice(&mut self, kind: VoiceSlotKind) {
        let slot = match kind {
            VoiceSlotKind::Current => self.current.take(),
            VoiceSlotKind::Next => self.next.take(),
        };
        if let Some(slot) = slot {
            slot.voice.set_onended(None);
            slot.voice.stop();
        }
    }

    fn start_lookahead_timer(&mut self) {
        self.cancel_lookahead_timer();
        let due = Arc::new(AtomicBool::new(false));
        let due_for_callback = Arc::clone(&due);
        let handle = self
            .timers
            .schedule_interval(self.config.lookahead_interval_ms, Box::new(move || {
                due_for_callback.store(true, Ordering::Release);
            }));
        self.lookahead_timer = Some(handle);
        self.lookahead_due = Some(due);
    }

    fn cancel_lookahead_timer(&mut self) {
        if let Some(handle) = self.lookahead_timer.take() {
            self.timers.cancel(&handle);
        }
        self.lookahead_due = None;
    }

    fn cancel_transition_timer(&mut self) {
        if let Some(handle) = self.transition_timer.take() {
            self.timers.cancel(&handle);
        }
        self.transition_fired = None;
    }
}

enum VoiceSlotKind {
    Current,
    Next,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;

    struct FakeClock {
        now: AtomicU64, // bits of an f64
    }

    impl FakeClock {
        fn new(start: f64) -> Self {
            Self {
                now: AtomicU64::new(start.to_bits()),
            }
        }

        fn set(&self, value: f64) {
            self.now.store(value.to_bits(), Ordering::Release);
        }
    }

    impl AudioClock for FakeClock {
        fn now(&self) -> f64 {
            f64::from_bits(self.now.load(Ordering::Acquire))
        }
    }

    struct FakeVoice {
        onended: Mutex<Option<Box<dyn FnOnce() + Send>>>,
        stopped: Arc<AtomicBool>,
        gain_log: Arc<Mutex<Vec<GainCurve>>>,
    }

    impl Voice for FakeVoice {
        fn apply_gain_curve(&self, curve: GainCurve) {
            self.gain_log.lock().unwrap().push(curve);
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::Release);
        }

        fn set_onended(&self, callback: Option<Box<dyn FnOnce() + Send>>) {
            *self.onended.lock().unwrap() = callback;
        }
    }

    struct FakeFactory {
        stopped_count: Arc<AtomicU64>,
    }

    impl VoiceFactory for FakeFactory {
        type Voice = FakeVoice;

        fn create_voice(
            &self,
            _buffer: &VoiceBuffer,
            _offset_in_buffer: usize,
            _start_time: f64,
        ) -> Self::Voice {
            FakeVoice {
                onended: Mutex::new(None),
                stopped: Arc::new(AtomicBool::new(false)),
                gain_log: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    struct FakeTimerHost {
        next_id: AtomicU64,
        once: Mutex<HashMap<u64, Box<dyn FnOnce() + Send>>>,
        repeating: Mutex<HashMap<u64, Box<dyn Fn() + Send>>>,
        cancelled: Mutex<std::collections::HashSet<u64>>,
    }

    impl FakeTimerHost {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                next_id: AtomicU64::new(1),
                once: Mutex::new(HashMap::new()),
                repeating: Mutex::new(HashMap::new()),
                cancelled: Mutex::new(std::collections::HashSet::new()),
            })
        }

        /// Simulate the wall clock reaching a one-shot timer's deadline.
        fn fire_once(&self, handle: TimerHandle) {
            if self.cancelled.lock().unwrap().contains(&handle.0) {
                return;
            }
            if let Some(callback) = self.once.lock().unwrap().remove(&handle.0) {
                callback();
            }
        }

        /// Simulate one tick of a recurring timer.
        fn fire_repeating(&self, handle: TimerHandle) {
            if self.cancelled.lock().unwrap().contains(&handle.0) {
                return;
            }
            if let Some(callback) = self.repeating.lock().unwrap().get(&handle.0) {
                callback();
            }
        }
    }

    impl TimerHost for FakeTimerHost {
        fn schedule_once(&self, _delay_ms: u64, callback: Box<dyn FnOnce() + Send>) -> TimerHandle {
            let id = self.next_id.fetch_add(1, Ordering::AcqRel);
            self.once.lock().unwrap().insert(id, callback);
            TimerHandle(id)
        }

        fn schedule_interval(
            &self,
            _interval_ms: u64,
            callback: Box<dyn Fn() + Send>,
        ) -> TimerHandle {
            let id = self.next_id.fetch_add(1, Ordering::AcqRel);
            self.repeating.lock().unwrap().insert(id, callback);
            TimerHandle(id)
        }

        fn cancel(&self, handle: &TimerHandle) {
            self.cancelled.lock().unwrap().insert(handle.0);
            self.once.lock().unwrap().remove(&handle.0);
            self.repeating.lock().unwrap().remove(&handle.0);
        }
    }

    fn make_buffer(frames: usize, sample_rate: u32) -> VoiceBuffer {
        VoiceBuffer::new(Arc::new(vec![vec![0.0; frames]]), sample_rate).unwrap()
    }

    type TestPlayer = ChunkPlayer<FakeClock, FakeFactory, FakeTimerHost>;

    fn make_player() -> (
        TestPlayer,
        Arc<FakeClock>,
        Arc<FakeTimerHost>,
        Arc<Mutex<Vec<&'static str>>>,
    ) {
        let clock = Arc::new(FakeClock::new(0.0));
        let factory = Arc::new(FakeFactory {
            stopped_count: Arc::new(AtomicU64::new(0)),
        });
        let timers = FakeTimerHost::new();
        let events = Arc::new(Mutex::new(Vec::new()));

        let events_t = Arc::clone(&events);
        let events_e = Arc::clone(&events);
        let events_n = Arc::clone(&events);
        let player = ChunkPlayer::new(
            Arc::clone(&clock),
            factory,
            Arc::clone(&timers),
            PlayerConfig::default(),
            move || events_t.lock().unwrap().push("transition"),
            move || events_e.lock().unwrap().push("ended"),
            move || events_n.lock().unwrap().push("need_next"),
        );
        (player, clock, timers, events)
    }

    #[test]
    fn play_chunk_starts_playing_with_fade_in() {
        let (mut player, _clock, _timers, _events) = make_player();
        let buffer = make_buffer(44100, 44100);
        player.play_chunk(buffer, 0.0, 0, false);
        assert!(player.is_playing());
        assert_eq!(player.position(), 0.0);
    }

    #[test]
    fn pause_freezes_position_and_resume_is_hosts_job() {
        let (mut player, clock, _timers, _events) = make_player();
        let buffer = make_buffer(44100, 44100);
        player.play_chunk(buffer, 0.0, 0, false);
        clock.set(2.5);
        player.pause();
        assert!(player.is_paused());
        assert_eq!(player.position(), 2.5);
        clock.set(9.0);
        // Position stays frozen while paused regardless of the clock.
        assert_eq!(player.position(), 2.5);
    }

    #[test]
    fn audio_clock_transition_promotes_next_without_double_transition() {
        let (mut player, _clock, _timers, events) = make_player();
        let first = make_buffer(44100, 44100);
        player.play_chunk(first, 0.0, 0, false);

        let second = make_buffer(44100, 44100);
        player.schedule_next(second, 1.0);
        assert!(player.has_next_scheduled());

        // Fire the audio-clock onended event for `current`.
        let callback = player
            .current
            .as_ref()
            .unwrap()
            .voice
            .onended
            .lock()
            .unwrap()
            .take()
            .unwrap();
        callback();
        player.poll();

        assert_eq!(*events.lock().unwrap(), vec!["transition"]);
        assert!(!player.has_next_scheduled());

        // The wall-clock path must now be inert: no second transition even
        // if its timer were to fire (it was cancelled by the promotion).
        player.poll();
        assert_eq!(*events.lock().unwrap(), vec!["transition"]);
    }

    #[test]
    fn wall_clock_fallback_promotes_when_timer_fires() {
        let (mut player, _clock, timers, events) = make_player();
        let first = make_buffer(44100, 44100);
        player.play_chunk(first, 0.0, 0, false);

        let second = make_buffer(44100, 44100);
        player.schedule_next(second, 1.0);
        let handle = player.transition_timer.expect("timer armed");

        timers.fire_once(handle);
        player.poll();

        assert_eq!(*events.lock().unwrap(), vec!["transition"]);
        assert!(!player.has_next_scheduled());
    }

    #[test]
    fn ended_without_next_fires_chunk_ended() {
        let (mut player, _clock, _timers, events) = make_player();
        let buffer = make_buffer(44100, 44100);
        player.play_chunk(buffer, 0.0, 0, false);

        let callback = player
            .current
            .as_ref()
            .unwrap()
            .voice
            .onended
            .lock()
            .unwrap()
            .take()
            .unwrap();
        callback();
        player.poll();

        assert_eq!(*events.lock().unwrap(), vec!["ended"]);
    }

    #[test]
    fn lookahead_fires_need_next_only_below_threshold() {
        let (mut player, clock, timers, events) = make_player();
        let buffer = make_buffer(44100 * 10, 44100); // 10s buffer
        player.play_chunk(buffer, 0.0, 0, false);
        let lookahead_handle = player.lookahead_timer.expect("lookahead armed");

        clock.set(1.0); // 9s remaining, above the 3s threshold
        timers.fire_repeating(lookahead_handle);
        player.poll();
        assert!(events.lock().unwrap().is_empty());

        clock.set(8.0); // 2s remaining, below threshold
        timers.fire_repeating(lookahead_handle);
        player.poll();
        assert_eq!(*events.lock().unwrap(), vec!["need_next"]);
    }

    #[test]
    fn schedule_next_is_idempotent_while_next_exists() {
        let (mut player, _clock, _timers, _events) = make_player();
        let first = make_buffer(44100, 44100);
        player.play_chunk(first, 0.0, 0, false);
        player.schedule_next(make_buffer(44100, 44100), 1.0);
        let first_handle = player.transition_timer;
        player.schedule_next(make_buffer(44100, 44100), 1.0);
        assert_eq!(player.transition_timer, first_handle);
    }

    #[test]
    fn dispose_is_idempotent_and_stops_voices() {
        let (mut player, _clock, _timers, _events) = make_player();
        let buffer = make_buffer(44100, 44100);
        player.play_chunk(buffer, 0.0, 0, false);
        player.dispose();
        player.dispose();
        assert!(!player.is_playing());
        assert_eq!(player.position(), 0.0);
    }
}
