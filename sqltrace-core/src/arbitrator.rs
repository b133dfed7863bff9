//! Instance arbitration.
//!
//! Several independently configured collectors in one process may subscribe
//! to the same channel. The bus broadcasts every event to all of them, so
//! without arbitration each call would be reported once per collector.
//!
//! Per channel exactly one registered instance is `Active`; the rest are
//! `Standby`. Disposing the active instance promotes the oldest live standby
//! (lowest creation sequence). When the last instance leaves, the channel is
//! forgotten along with its correlation store.
//!
//! The arbitrator only holds `Weak` references to instances. State changes
//! happen under one lock per arbitrator, but that lock is taken on register
//! and dispose only. The per-event gate is a single atomic load.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::store::CorrelationStore;

/// Lifecycle state of one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceState {
    Unregistered,
    Active,
    Standby,
    Disposed,
}

impl InstanceState {
    fn as_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => InstanceState::Active,
            2 => InstanceState::Standby,
            3 => InstanceState::Disposed,
            _ => InstanceState::Unregistered,
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Unregistered => "unregistered",
            InstanceState::Active => "active",
            InstanceState::Standby => "standby",
            InstanceState::Disposed => "disposed",
        };
        f.write_str(s)
    }
}

/// An instance's membership in a channel.
#[derive(Debug)]
pub struct InstanceSlot {
    sequence: u64,
    channel: String,
    state: AtomicU8,
}

impl InstanceSlot {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn state(&self) -> InstanceState {
        InstanceState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == InstanceState::Active
    }

    fn set_state(&self, state: InstanceState) -> InstanceState {
        InstanceState::from_u8(self.state.swap(state.as_u8(), Ordering::AcqRel))
    }
}

/// What a new instance receives from [`Arbitrator::register`].
#[derive(Debug, Clone)]
pub struct Registration {
    pub slot: Arc<InstanceSlot>,
    /// Correlation store shared by every instance on the channel
    pub store: Arc<CorrelationStore>,
}

#[derive(Debug)]
struct ChannelScope {
    store: Arc<CorrelationStore>,
    /// Ordered by ascending sequence
    members: Vec<Weak<InstanceSlot>>,
}

impl ChannelScope {
    fn prune(&mut self) {
        self.members.retain(|member| {
            member
                .upgrade()
                .map(|slot| slot.state() != InstanceState::Disposed)
                .unwrap_or(false)
        });
    }

    fn active(&self) -> Option<Arc<InstanceSlot>> {
        self.members
            .iter()
            .filter_map(Weak::upgrade)
            .find(|slot| slot.is_active())
    }
}

#[derive(Debug, Default)]
struct ArbitratorInner {
    next_sequence: AtomicU64,
    channels: Mutex<HashMap<String, ChannelScope>>,
}

/// Chooses the one active instance per channel.
///
/// Cheap to clone; clones share state. Construct one per process (or one per
/// test) and hand it to every collector that should coordinate.
#[derive(Debug, Clone, Default)]
pub struct Arbitrator {
    inner: Arc<ArbitratorInner>,
}

impl Arbitrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join `channel`, becoming Active if nobody else is.
    pub fn register(&self, channel: &str) -> Registration {
        let mut channels = self.inner.channels.lock();
        let scope = channels
            .entry(channel.to_string())
            .or_insert_with(|| ChannelScope {
                store: Arc::new(CorrelationStore::new()),
                members: Vec::new(),
            });
        scope.prune();

        let sequence = self.inner.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let state = if scope.active().is_some() {
            InstanceState::Standby
        } else {
            InstanceState::Active
        };
        let slot = Arc::new(InstanceSlot {
            sequence,
            channel: channel.to_string(),
            state: AtomicU8::new(state.as_u8()),
        });
        scope.members.push(Arc::downgrade(&slot));

        info!(channel = %channel, sequence, state = %state, "collector instance registered");

        Registration {
            slot,
            store: Arc::clone(&scope.store),
        }
    }

    /// Leave the channel. Returns `false` if the slot was already disposed.
    ///
    /// Disposing the active instance promotes the oldest live standby. The
    /// successor turns Active before this slot turns Disposed, so every event
    /// finds at least one Active instance while the handover is under way.
    pub fn dispose(&self, slot: &Arc<InstanceSlot>) -> bool {
        let mut channels = self.inner.channels.lock();

        let previous = slot.state();
        if previous == InstanceState::Disposed {
            return false;
        }

        let Some(scope) = channels.get_mut(slot.channel()) else {
            slot.set_state(InstanceState::Disposed);
            return true;
        };
        scope
            .members
            .retain(|member| !std::ptr::eq(member.as_ptr(), Arc::as_ptr(slot)));
        scope.prune();

        if previous == InstanceState::Active {
            let promoted = scope
                .members
                .iter()
                .filter_map(Weak::upgrade)
                .find(|candidate| candidate.state() == InstanceState::Standby);
            match promoted {
                Some(next) => {
                    next.set_state(InstanceState::Active);
                    info!(
                        channel = %slot.channel(),
                        disposed = slot.sequence(),
                        promoted = next.sequence(),
                        "standby collector promoted to active"
                    );
                }
                None => debug!(channel = %slot.channel(), "no standby collector to promote"),
            }
        }
        slot.set_state(InstanceState::Disposed);

        if scope.members.is_empty() {
            let in_flight = scope.store.len();
            channels.remove(slot.channel());
            debug!(
                channel = %slot.channel(),
                in_flight,
                "last collector left channel; channel unregistered"
            );
        }
        true
    }

    /// Sequence number of the active instance on `channel`
    pub fn active_sequence(&self, channel: &str) -> Option<u64> {
        let channels = self.inner.channels.lock();
        channels
            .get(channel)
            .and_then(ChannelScope::active)
            .map(|slot| slot.sequence())
    }

    /// Number of live instances on `channel`
    pub fn member_count(&self, channel: &str) -> usize {
        let channels = self.inner.channels.lock();
        channels
            .get(channel)
            .map(|scope| {
                scope
                    .members
                    .iter()
                    .filter_map(Weak::upgrade)
                    .filter(|slot| slot.state() != InstanceState::Disposed)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn is_registered(&self, channel: &str) -> bool {
        self.inner.channels.lock().contains_key(channel)
    }
}
