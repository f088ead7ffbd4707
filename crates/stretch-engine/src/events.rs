//! The engine's event stream (spec §6 "Event stream", §9 "Event emitter").

/// Why the engine entered (or remains in) `buffering` (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferingReason {
    Initial,
    Underrun,
    Seek,
    TempoChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferHealth {
    Empty,
    Low,
    Healthy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Buffering { reason: BufferingReason },
    Buffered,
    Progress { total: usize, ready: usize },
    BufferHealth { health: BufferHealth, ahead_seconds: f64 },
    ChunkReady { index: usize },
    Complete,
    Loop,
    Ended,
    Error { message: String, fatal: bool },
}

/// Opaque id returned by `EventEmitter::on`; pass to `unsubscribe` to remove
/// the listener. Dropping the handle does nothing on its own — listeners
/// are removed explicitly, matching the spec's "each `on` returns an
/// unsubscribe [function]" rather than an RAII guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Multi-listener dispatcher for `Event` (spec §9 "Event emitter": "a finite
/// mapping from event tag to a set of listener closures; on dispatch it
/// iterates a snapshot of the set so that listeners unsubscribing during
/// dispatch do not perturb the iteration").
#[derive(Default)]
pub struct EventEmitter {
    next_id: u64,
    listeners: Vec<(ListenerId, Box<dyn FnMut(&Event)>)>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, handler: impl FnMut(&Event) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(handler)));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) {
        self.listeners.retain(|(existing, _)| *existing != id);
    }

    /// Dispatch to every listener registered as of the start of this call.
    /// New listeners registered by a handler mid-dispatch are not invoked
    /// for this event; listeners removed mid-dispatch are skipped via the
    /// id snapshot rather than by mutating `self.listeners` while iterating.
    pub fn emit(&mut self, event: Event) {
        let ids: Vec<ListenerId> = self.listeners.iter().map(|(id, _)| *id).collect();
        for id in ids {
            if let Some((_, handler)) = self.listeners.iter_mut().find(|(existing, _)| *existing == id) {
                handler(&event);
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}
