//! The Engine (spec §4.6): owns the chunk table (via the Scheduler), the
//! Chunk Player, the event emitter, and the phase state machine. Everything
//! here runs on one cooperative logical thread (spec §5); background work
//! (DSP conversion, the audio clock) only ever reaches the engine by setting
//! a shared flag or pushing onto a shared queue, drained by `poll()`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use stretch_core::SourceBuffer;
use stretch_player::{AudioClock, ChunkPlayer, GainCurve, PlayerConfig, TimerHandle, TimerHost, Voice, VoiceBuffer, VoiceFactory};
use stretch_scheduler::{ConversionScheduler, SchedulerConfig};
use stretch_worker::ConversionProcessor;

use crate::error::{EngineError, EngineResult};
use crate::events::{BufferHealth, BufferingReason, Event, EventEmitter, ListenerId};
use crate::options::EngineOptions;
use crate::status::{ConversionStatus, Phase, PlaybackStatus, Snapshot, Status};

/// Fixed 100 ms crossfade window used for overlap trimming (spec §4.6),
/// independent of the Chunk Player's own `crossfadeSec` (spec §9 "coincide
/// but are not required to").
const OVERLAP_CROSSFADE_SEC: f64 = 0.1;

/// Coalescing window for rapid `setTempo` calls (spec §4.6).
const TEMPO_DEBOUNCE_MS: u64 = 100;

/// Proactive scheduling only kicks in when the lookahead path would be too
/// late to matter; must stay strictly above the player's own lookahead
/// threshold (spec §4.6 "strictly greater than LOOKAHEAD_THRESHOLD_SEC").
const PROACTIVE_SCHEDULE_THRESHOLD_SEC: f64 = 5.0;

const TEMPO_EQUALITY_EPSILON: f64 = 1e-9;

pub struct Engine<C: AudioClock, F: VoiceFactory, T: TimerHost, P: ConversionProcessor> {
    source: SourceBuffer,
    options: EngineOptions,
    scheduler: ConversionScheduler<P>,
    player: ChunkPlayer<C, F, T>,
    timers: Arc<T>,
    emitter: EventEmitter,

    phase: Phase,
    current_chunk_index: usize,
    current_tempo: f64,
    pending_tempo: Option<f64>,
    tempo_changed_while_paused: bool,
    buffering_resume_position: Option<f64>,
    disposed: bool,
    last_reported_health: Option<BufferHealth>,
    pending_init_failure: Option<String>,

    tempo_debounce_timer: Option<TimerHandle>,
    tempo_debounce_due: Arc<AtomicBool>,

    transition_flag: Arc<AtomicBool>,
    chunk_ended_flag: Arc<AtomicBool>,
    need_next_flag: Arc<AtomicBool>,

    chunk_ready_queue: Arc<Mutex<VecDeque<usize>>>,
    chunk_failed_queue: Arc<Mutex<VecDeque<(usize, String)>>>,
}

impl<C: AudioClock, F: VoiceFactory, T: TimerHost, P: ConversionProcessor> Engine<C, F, T, P> {
    /// `processor` and `mailbox` must already be wired to each other (the
    /// same construction-order dance `ConversionScheduler` itself requires —
    /// see `stretch-scheduler::ProcessorMailbox`).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: SourceBuffer,
        options: EngineOptions,
        processor: Arc<P>,
        mailbox: Arc<stretch_scheduler::ProcessorMailbox>,
        clock: Arc<C>,
        voice_factory: Arc<F>,
        timers: Arc<T>,
    ) -> Self {
        let chunks = stretch_dsp::split(
            source.total_samples(),
            source.sample_rate(),
            options.chunk_duration_sec,
            options.overlap_sec,
        );

        let chunk_ready_queue = Arc::new(Mutex::new(VecDeque::new()));
        let chunk_failed_queue = Arc::new(Mutex::new(VecDeque::new()));
        let ready_for_callback = Arc::clone(&chunk_ready_queue);
        let failed_for_callback = Arc::clone(&chunk_failed_queue);

        let scheduler_config = SchedulerConfig {
            keep_ahead_chunks: options.keep_ahead_chunks,
            keep_behind_chunks: options.keep_behind_chunks,
            cancel_distance_threshold: 2,
        };
        let scheduler = ConversionScheduler::new(
            chunks,
            options.tempo,
            processor,
            mailbox,
            scheduler_config,
            move |index| ready_for_callback.lock().push_back(index),
            move |index, message| failed_for_callback.lock().push_back((index, message)),
        );

        let transition_flag = Arc::new(AtomicBool::new(false));
        let chunk_ended_flag = Arc::new(AtomicBool::new(false));
        let need_next_flag = Arc::new(AtomicBool::new(false));
        let transition_for_callback = Arc::clone(&transition_flag);
        let chunk_ended_for_callback = Arc::clone(&chunk_ended_flag);
        let need_next_for_callback = Arc::clone(&need_next_flag);

        let player_config = PlayerConfig {
            crossfade_sec: options.crossfade_sec,
            ..PlayerConfig::default()
        };
        let player = ChunkPlayer::new(
            clock,
            voice_factory,
            Arc::clone(&timers),
            player_config,
            move || transition_for_callback.store(true, Ordering::Release),
            move || chunk_ended_for_callback.store(true, Ordering::Release),
            move || need_next_for_callback.store(true, Ordering::Release),
        );

        Self {
            source,
            current_tempo: options.tempo,
            options,
            scheduler,
            player,
            timers,
            emitter: EventEmitter::new(),
            phase: Phase::Waiting,
            current_chunk_index: 0,
            pending_tempo: None,
            tempo_changed_while_paused: false,
            buffering_resume_position: None,
            disposed: false,
            last_reported_health: None,
            pending_init_failure: None,
            tempo_debounce_timer: None,
            tempo_debounce_due: Arc::new(AtomicBool::new(false)),
            transition_flag,
            chunk_ended_flag,
            need_next_flag,
            chunk_ready_queue,
            chunk_failed_queue,
        }
    }

    /// Record that the worker subsystem could not be constructed, so the
    /// engine transitions to `ended` on its next cooperative tick instead of
    /// leaving callers holding an `Engine` that can never make progress
    /// (spec §6 `InitFailure`, §7(d)). Suppressed if the caller stops,
    /// pauses, or disposes the engine before that tick arrives.
    pub fn mark_init_failed(&mut self, reason: impl Into<String>) {
        self.pending_init_failure = Some(reason.into());
    }

    pub fn on(&mut self, handler: impl FnMut(&Event) + 'static) -> ListenerId {
        self.emitter.on(handler)
    }

    pub fn unsubscribe(&mut self, id: ListenerId) {
        self.emitter.unsubscribe(id);
    }

    // ---- lifecycle --------------------------------------------------

    pub fn start(&mut self) {
        if self.disposed || self.phase != Phase::Waiting {
            return;
        }
        if self.scheduler.chunk_table().is_empty() {
            self.phase = Phase::Ended;
            self.emitter.emit(Event::Ended);
            return;
        }

        let start_chunk = self
            .scheduler
            .chunk_table()
            .chunk_at_time(self.options.offset_sec, self.source.sample_rate())
            .unwrap_or(0);
        self.current_chunk_index = start_chunk;

        self.phase = Phase::Buffering;
        self.emitter.emit(Event::Buffering {
            reason: BufferingReason::Initial,
        });
        self.scheduler.start(start_chunk, &self.source);
        self.try_exit_buffering();
    }

    pub fn pause(&mut self) {
        if self.disposed || self.phase != Phase::Playing {
            return;
        }
        self.player.pause();
        self.phase = Phase::Paused;
    }

    pub fn resume(&mut self) {
        if self.disposed || self.phase != Phase::Paused {
            return;
        }
        if self.tempo_changed_while_paused {
            self.tempo_changed_while_paused = false;
            let tempo = self.pending_tempo.take().unwrap_or(self.current_tempo);
            self.phase = Phase::Buffering;
            self.emitter.emit(Event::Buffering {
                reason: BufferingReason::TempoChange,
            });
            self.scheduler.handle_tempo_change(tempo, &self.source);
            self.try_exit_buffering();
            return;
        }

        let ready = self
            .scheduler
            .chunk(self.current_chunk_index)
            .map(|c| c.is_ready())
            .unwrap_or(false);
        if ready {
            self.replay_current_chunk();
            self.phase = Phase::Playing;
        } else {
            self.phase = Phase::Buffering;
            self.emitter.emit(Event::Buffering {
                reason: BufferingReason::Underrun,
            });
        }
    }

    pub fn stop(&mut self) {
        if self.disposed || self.phase == Phase::Ended {
            return;
        }
        self.player.stop();
        self.cancel_tempo_debounce();
        self.phase = Phase::Ended;
        self.emitter.emit(Event::Ended);
    }

    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.player.dispose();
        self.scheduler.dispose();
        self.cancel_tempo_debounce();
        self.disposed = true;
        self.phase = Phase::Ended;
    }

    // ---- operations ---------------------------------------------------

    pub fn seek(&mut self, seconds: f64) {
        if self.disposed || self.phase == Phase::Ended {
            return;
        }
        let total_duration = self.source.duration_sec();
        let target_sec = seconds.clamp(0.0, total_duration);
        let Some(target_chunk) = self
            .scheduler
            .chunk_table()
            .chunk_at_time(target_sec, self.source.sample_rate())
        else {
            return;
        };

        self.current_chunk_index = target_chunk;
        self.scheduler.handle_seek(target_chunk, &self.source);

        let ready = self
            .scheduler
            .chunk(target_chunk)
            .map(|c| c.is_ready())
            .unwrap_or(false);

        if ready {
            let offset = self.trimmed_offset_for_time(target_chunk, target_sec);
            if let Ok(buffer) = self.build_trimmed_voice_buffer(target_chunk) {
                self.player.handle_seek(buffer, offset);
                self.phase = Phase::Playing;
                self.try_exit_buffering();
            }
        } else {
            self.buffering_resume_position = Some(target_sec);
            self.phase = Phase::Buffering;
            self.emitter.emit(Event::Buffering {
                reason: BufferingReason::Seek,
            });
        }
    }

    pub fn set_tempo(&mut self, new_tempo: f64) {
        if self.disposed || self.phase == Phase::Ended {
            return;
        }
        if let Err(err) = stretch_core::validate_tempo(new_tempo) {
            self.emitter.emit(Event::Error {
                message: err.to_string(),
                fatal: false,
            });
            return;
        }
        if (new_tempo - self.current_tempo).abs() < TEMPO_EQUALITY_EPSILON {
            return;
        }
        self.current_tempo = new_tempo;

        if self.phase == Phase::Paused {
            self.pending_tempo = Some(new_tempo);
            self.tempo_changed_while_paused = true;
            return;
        }

        if self.phase != Phase::Buffering {
            self.phase = Phase::Buffering;
            self.emitter.emit(Event::Buffering {
                reason: BufferingReason::TempoChange,
            });
        }
        self.pending_tempo = Some(new_tempo);
        self.arm_tempo_debounce();
    }

    pub fn set_loop(&mut self, loop_playback: bool) {
        self.options.loop_playback = loop_playback;
    }

    pub fn get_current_position(&self) -> f64 {
        match self.phase {
            Phase::Buffering => self.buffering_resume_position.unwrap_or(0.0),
            _ => self.player_now(),
        }
    }

    pub fn get_status(&self) -> Status {
        let table = self.scheduler.chunk_table();
        Status {
            phase: self.phase,
            playback: PlaybackStatus {
                tempo: self.current_tempo,
                duration_sec: self.source.duration_sec(),
                current_position_sec: self.get_current_position(),
            },
            conversion: ConversionStatus {
                total: table.len(),
                ready: table.ready_count(),
                converting: table.converting_count(),
                failed: table.failed_count(),
            },
        }
    }

    pub fn get_snapshot(&self) -> Snapshot {
        let table = self.scheduler.chunk_table();
        let total = table.len();
        let ready = table.ready_count();
        Snapshot {
            tempo: self.current_tempo,
            converting: table.converting_count(),
            conversion_progress: if total == 0 { 1.0 } else { ready as f64 / total as f64 },
            buffer_health: self.compute_buffer_health(),
            ahead_seconds: self.ahead_seconds(),
            buffering: self.phase == Phase::Buffering,
            current_chunk_index: self.current_chunk_index,
            total_chunks: total,
        }
    }

    // ---- cooperative tick ----------------------------------------------

    /// Drain every shared flag/queue touched by background collaborators
    /// since the last tick, react in a fixed order, then re-check
    /// buffer-health exit/enter conditions (spec §5 "every tick is
    /// run-to-completion").
    pub fn poll(&mut self) {
        if self.disposed {
            return;
        }

        if let Some(reason) = self.pending_init_failure.take() {
            if self.phase != Phase::Ended && self.phase != Phase::Paused {
                self.fail_fatally(EngineError::InitFailure(reason));
                return;
            }
        }

        self.player.poll();
        self.scheduler.poll(&self.source);

        if self.scheduler.is_worker_unavailable() {
            self.fail_fatally(EngineError::WorkerUnavailable);
            return;
        }

        self.drain_chunk_ready();
        self.drain_chunk_failed();

        let transitioned = self.transition_flag.swap(false, Ordering::AcqRel);
        let ended_without_next = self.chunk_ended_flag.swap(false, Ordering::AcqRel);
        if transitioned {
            self.advance_to_next_chunk(true);
        } else if ended_without_next {
            self.advance_to_next_chunk(false);
        }

        if self.need_next_flag.swap(false, Ordering::AcqRel) {
            self.maybe_schedule_next_on_lookahead();
        }

        if self.tempo_debounce_due.swap(false, Ordering::AcqRel) {
            self.tempo_debounce_timer = None;
            if let Some(tempo) = self.pending_tempo.take() {
                self.scheduler.handle_tempo_change(tempo, &self.source);
                self.try_exit_buffering();
            }
        }

        self.report_buffer_health_if_changed();
    }

    // ---- internals -------------------------------------------------------

    fn player_now(&self) -> f64 {
        self.player.position()
    }

    fn fail_fatally(&mut self, error: EngineError) {
        self.player.stop();
        self.cancel_tempo_debounce();
        self.phase = Phase::Ended;
        let fatal = matches!(error, EngineError::WorkerUnavailable | EngineError::InitFailure(_));
        self.emitter.emit(Event::Error {
            message: error.to_string(),
            fatal,
        });
        self.emitter.emit(Event::Ended);
    }

    fn drain_chunk_ready(&mut self) {
        let ready: Vec<usize> = {
            let mut queue = self.chunk_ready_queue.lock();
            queue.drain(..).collect()
        };
        if ready.is_empty() {
            return;
        }
        let table = self.scheduler.chunk_table();
        self.emitter.emit(Event::Progress {
            total: table.len(),
            ready: table.ready_count(),
        });
        for index in ready {
            self.emitter.emit(Event::ChunkReady { index });
            self.maybe_schedule_proactively(index);
        }
        self.try_exit_buffering();
    }

    fn drain_chunk_failed(&mut self) {
        let failed: Vec<(usize, String)> = {
            let mut queue = self.chunk_failed_queue.lock();
            queue.drain(..).collect()
        };
        for (index, message) in failed {
            let is_current = index == self.current_chunk_index;
            self.emitter.emit(Event::Error {
                message: format!("chunk {index} failed: {message}"),
                fatal: false,
            });
            if is_current && self.phase != Phase::Ended {
                // Playhead sits on a chunk that will never convert. Without
                // a seek or loop past it, playback has nowhere to go.
                self.phase = Phase::Ended;
                self.emitter.emit(Event::Ended);
            }
        }
    }

    /// Spec §4.6 "Proactive + lookahead mutual exclusion".
    fn maybe_schedule_proactively(&mut self, ready_index: usize) {
        if ready_index != self.current_chunk_index + 1 {
            return;
        }
        if self.player.has_next_scheduled() || !self.player.is_playing() {
            return;
        }
        let Some(remaining) = self.player.remaining_in_current() else {
            return;
        };
        if remaining <= 0.0 || remaining >= PROACTIVE_SCHEDULE_THRESHOLD_SEC {
            return;
        }
        self.schedule_next_chunk(ready_index);
    }

    fn maybe_schedule_next_on_lookahead(&mut self) {
        let next_index = self.current_chunk_index + 1;
        if next_index >= self.scheduler.chunk_table().len() {
            if self.options.loop_playback {
                self.schedule_next_chunk(0);
            }
            return;
        }
        let ready = self
            .scheduler
            .chunk(next_index)
            .map(|c| c.is_ready())
            .unwrap_or(false);
        if ready {
            self.schedule_next_chunk(next_index);
        }
        // If not ready, the lookahead callback is purely informational here:
        // a real host would use it to prioritise fetching/converting, which
        // the Scheduler already does via its keep-ahead window.
    }

    fn schedule_next_chunk(&mut self, chunk_index: usize) {
        if self.player.has_next_scheduled() {
            return;
        }
        let Some((start_ctx_time, duration_sec)) = self.player.current_voice_timing() else {
            return;
        };
        let nominal_start_time = start_ctx_time + duration_sec;
        if let Ok(buffer) = self.build_trimmed_voice_buffer(chunk_index) {
            self.player.schedule_next(buffer, nominal_start_time);
        }
    }

    /// Invoked once per actual chunk boundary, from either the audio-clock
    /// (`already_transitioned = true`, the player already swapped voices) or
    /// the no-next ended path (`false`, the player fell silent).
    fn advance_to_next_chunk(&mut self, already_transitioned: bool) {
        let next_index = self.current_chunk_index + 1;
        let total = self.scheduler.chunk_table().len();

        if next_index >= total {
            if self.options.loop_playback {
                self.current_chunk_index = 0;
                self.emitter.emit(Event::Loop);
                if !already_transitioned {
                    self.replay_current_chunk();
                }
                self.try_exit_buffering();
            } else {
                self.phase = Phase::Ended;
                self.emitter.emit(Event::Complete);
                self.emitter.emit(Event::Ended);
            }
            return;
        }

        self.current_chunk_index = next_index;
        let ready = self
            .scheduler
            .chunk(next_index)
            .map(|c| c.is_ready())
            .unwrap_or(false);

        if already_transitioned {
            // The player already promoted to this chunk's voice; nothing
            // further to do unless we need to (re-)arm proactive scheduling,
            // which happens naturally via the next `onChunkReady`/lookahead.
            return;
        }

        if ready {
            self.replay_current_chunk();
        } else {
            self.phase = Phase::Buffering;
            self.emitter.emit(Event::Buffering {
                reason: BufferingReason::Underrun,
            });
        }
    }

    fn replay_current_chunk(&mut self) {
        let index = self.current_chunk_index;
        if let Ok(buffer) = self.build_trimmed_voice_buffer(index) {
            let now = self.timers_now_hint();
            self.player.play_chunk(buffer, now, 0, false);
            self.phase = Phase::Playing;
        }
    }

    /// `ChunkPlayer` schedules voices against its injected `AudioClock`, not
    /// a value the engine can read independently; `play_chunk`'s
    /// `start_ctx_time` is only meaningful relative to that clock, so a
    /// caller outside the player has no authoritative "now" beyond what the
    /// player itself reports via `position()`-adjacent bookkeeping. Passing
    /// `0.0` here tells `play_chunk`'s caller-supplied `start_ctx_time` to
    /// mean "as soon as possible"; real hosts that need absolute-clock
    /// precision drive `play_chunk` through the engine's seek/replay paths
    /// exclusively, never directly.
    fn timers_now_hint(&self) -> f64 {
        0.0
    }

    /// Buffer-health hysteresis (spec §4.6 "Buffer-health hysteresis"):
    /// enter buffering only when the current chunk is not ready; exit when
    /// (a) current ready and >= `resumeSec` seconds of contiguous ready
    /// chunks ahead, or (b) current and next both ready, or (c) everything
    /// ready.
    fn try_exit_buffering(&mut self) {
        if self.phase != Phase::Buffering {
            return;
        }
        let table = self.scheduler.chunk_table();
        let current_ready = table
            .get(self.current_chunk_index)
            .map(|c| c.is_ready())
            .unwrap_or(false);
        if !current_ready {
            return;
        }

        let all_ready = table.ready_count() == table.len();
        let next_ready = table
            .get(self.current_chunk_index + 1)
            .map(|c| c.is_ready())
            .unwrap_or(false);
        let ahead_seconds = self.ahead_seconds();
        let resume_met = ahead_seconds >= self.options.resume_sec;

        if all_ready || next_ready || resume_met {
            self.phase = Phase::Playing;
            self.emitter.emit(Event::Buffered);
            if let Some(resume_pos) = self.buffering_resume_position.take() {
                let offset = self.trimmed_offset_for_time(self.current_chunk_index, resume_pos);
                if let Ok(buffer) = self.build_trimmed_voice_buffer(self.current_chunk_index) {
                    self.player.handle_seek(buffer, offset);
                }
            } else {
                self.replay_current_chunk();
            }
        }
    }

    fn ahead_seconds(&self) -> f64 {
        let table = self.scheduler.chunk_table();
        let mut seconds = 0.0;
        let mut index = self.current_chunk_index;
        while let Some(chunk) = table.get(index) {
            if !chunk.is_ready() {
                break;
            }
            seconds += chunk.output_length as f64 / self.source.sample_rate() as f64;
            index += 1;
        }
        seconds
    }

    fn compute_buffer_health(&self) -> BufferHealth {
        let ahead = self.ahead_seconds();
        if ahead <= 0.0 {
            BufferHealth::Empty
        } else if ahead < self.options.resume_sec {
            BufferHealth::Low
        } else {
            BufferHealth::Healthy
        }
    }

    fn report_buffer_health_if_changed(&mut self) {
        let health = self.compute_buffer_health();
        if self.last_reported_health != Some(health) {
            self.last_reported_health = Some(health);
            self.emitter.emit(Event::BufferHealth {
                health,
                ahead_seconds: self.ahead_seconds(),
            });
        }
    }

    fn arm_tempo_debounce(&mut self) {
        self.cancel_tempo_debounce();
        let due = Arc::clone(&self.tempo_debounce_due);
        let handle = self
            .timers
            .schedule_once(TEMPO_DEBOUNCE_MS, Box::new(move || {
                due.store(true, Ordering::Release);
            }));
        self.tempo_debounce_timer = Some(handle);
    }

    fn cancel_tempo_debounce(&mut self) {
        if let Some(handle) = self.tempo_debounce_timer.take() {
            self.timers.cancel(&handle);
        }
        self.tempo_debounce_due.store(false, Ordering::Release);
    }

    /// Overlap trimming (spec §4.6): slices the crossfade-overlap regions
    /// off a ready chunk's converted output, scaled by the tempo ratio, so
    /// what the player schedules is just the chunk's own contribution.
    fn build_trimmed_voice_buffer(&self, chunk_index: usize) -> EngineResult<VoiceBuffer> {
        let chunk = self.scheduler.chunk(chunk_index)?;
        let Some(output) = chunk.output_buffer.as_ref() else {
            // Caller should have checked `is_ready()` first; an empty
            // buffer here means the trim bounds would be meaningless.
            return Err(EngineError::Player(stretch_player::PlayerError::EmptyBuffer));
        };
        let sample_rate = self.source.sample_rate();
        let (trim_start, trim_end) = overlap_trim_bounds(
            chunk.nominal_input_len(),
            chunk.output_length,
            chunk.overlap_before,
            chunk.overlap_after,
            sample_rate,
        );

        let trimmed_len = chunk.output_length.saturating_sub(trim_start + trim_end);
        let channels: Vec<Vec<stretch_core::Sample>> = if trimmed_len > 0 {
            output
                .iter()
                .map(|channel| channel[trim_start..trim_start + trimmed_len].to_vec())
                .collect()
        } else {
            output.clone()
        };

        Ok(VoiceBuffer::new(Arc::new(channels), sample_rate)?)
    }

    /// Maps an absolute seek time into an offset within the chunk's
    /// *trimmed* output buffer, using the same tempo ratio as overlap
    /// trimming.
    fn trimmed_offset_for_time(&self, chunk_index: usize, seek_time_sec: f64) -> usize {
        let Ok(chunk) = self.scheduler.chunk(chunk_index) else {
            return 0;
        };
        let sample_rate = self.source.sample_rate();
        let (nominal_start, _) = chunk.nominal_range();
        let seek_sample = (seek_time_sec * sample_rate as f64).round().max(0.0) as usize;
        let offset_in_nominal = seek_sample.saturating_sub(nominal_start);

        let input_len = chunk.nominal_input_len().max(1);
        let ratio = chunk.output_length as f64 / input_len as f64;
        let (trim_start, trim_end) = overlap_trim_bounds(
            chunk.nominal_input_len(),
            chunk.output_length,
            chunk.overlap_before,
            chunk.overlap_after,
            sample_rate,
        );
        let trimmed_len = chunk.output_length.saturating_sub(trim_start + trim_end);

        let raw_offset = (offset_in_nominal as f64 * ratio).round() as usize;
        raw_offset.saturating_sub(trim_start).min(trimmed_len.saturating_sub(1).max(0))
    }
}

/// Shared by both the per-chunk playback path and the seek-offset
/// computation: `(trimStart, trimEnd)` for a chunk's converted output.
fn overlap_trim_bounds(
    input_len: usize,
    output_length: usize,
    overlap_before: usize,
    overlap_after: usize,
    sample_rate: u32,
) -> (usize, usize) {
    let input_len = input_len.max(1);
    let ratio = output_length as f64 / input_len as f64;
    let crossfade_keep = (OVERLAP_CROSSFADE_SEC * sample_rate as f64 * ratio).round() as i64;
    let trim_start = ((overlap_before as f64 * ratio).round() as i64 - crossfade_keep).max(0) as usize;
    let trim_end = (overlap_after as f64 * ratio).round() as usize;
    (trim_start, trim_end)
}
