use std::any::Any;
use std::fmt;

use crate::pal::{GnssPalEvent, WifiPalEvent, WwanPalEvent};
use crate::types::{InstanceId, TimerHandle};

/// Owned, type-erased event payload. Receivers downcast to the type documented for the event.
pub type EventData = Box<dyn Any + Send>;

/// Invoked exactly once with the event's type and payload after delivery or on drop.
pub type ReleaseCallback = Box<dyn FnOnce(u16, EventData) + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventTarget {
    /// Every nanoapp registered for the event type.
    Broadcast,
    Instance(InstanceId),
}

impl EventTarget {
    pub fn is_targeted_at(&self, instance_id: InstanceId) -> bool {
        matches!(self, EventTarget::Instance(id) if *id == instance_id)
    }
}

pub struct Event {
    pub event_type: u16,
    pub data: EventData,
    pub release: Option<ReleaseCallback>,
    pub sender: InstanceId,
    pub target: EventTarget,
}

impl Event {
    /// A system-sent event with no release callback.
    pub fn new<T: Any + Send>(event_type: u16, data: T, target: EventTarget) -> Self {
        Self {
            event_type,
            data: Box::new(data),
            release: None,
            sender: InstanceId::SYSTEM,
            target,
        }
    }

    pub fn broadcast<T: Any + Send>(event_type: u16, data: T) -> Self {
        Self::new(event_type, data, EventTarget::Broadcast)
    }

    pub fn targeted<T: Any + Send>(event_type: u16, data: T, target: InstanceId) -> Self {
        Self::new(event_type, data, EventTarget::Instance(target))
    }

    pub fn with_sender(mut self, sender: InstanceId) -> Self {
        self.sender = sender;
        self
    }

    pub fn with_release(mut self, release: ReleaseCallback) -> Self {
        self.release = Some(release);
        self
    }

    /// Consumes the event, handing its payload to the release callback if one was given.
    pub fn release(self) {
        if let Some(release) = self.release {
            release(self.event_type, self.data);
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("event_type", &format_args!("0x{:04x}", self.event_type))
            .field("sender", &self.sender)
            .field("target", &self.target)
            .field("has_release", &self.release.is_some())
            .finish()
    }
}

/// Identifies which internal component a system timer belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SystemTimerCallback {
    WifiScanRetry,
    WifiScanTimeout,
    WifiRangingTimeout,
    WwanCellInfoTimeout,
    GnssLocationSessionTimeout,
    GnssMeasurementSessionTimeout,
}

/// Work deferred onto the event loop thread.
///
/// Each variant carries the data its handler needs; the runtime routes it to that handler.
#[derive(Debug)]
pub enum SystemCallback {
    /// The hardware timer fired; process expired timers and re-arm.
    TimerPoolTick,
    /// A system-owned timer expired.
    SystemTimerExpired {
        handle: TimerHandle,
        callback: SystemTimerCallback,
    },
    Wifi(WifiPalEvent),
    Wwan(WwanPalEvent),
    Gnss(GnssPalEvent),
    /// Unload requested from outside the loop thread.
    UnloadNanoapp(InstanceId),
}

/// Tag used when logging deferred callbacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemCallbackType {
    TimerPoolTick,
    SystemTimer,
    WifiPal,
    WwanPal,
    GnssPal,
    NanoappUnload,
}

impl SystemCallback {
    pub fn callback_type(&self) -> SystemCallbackType {
        match self {
            SystemCallback::TimerPoolTick => SystemCallbackType::TimerPoolTick,
            SystemCallback::SystemTimerExpired { .. } => SystemCallbackType::SystemTimer,
            SystemCallback::Wifi(_) => SystemCallbackType::WifiPal,
            SystemCallback::Wwan(_) => SystemCallbackType::WwanPal,
            SystemCallback::Gnss(_) => SystemCallbackType::GnssPal,
            SystemCallback::UnloadNanoapp(_) => SystemCallbackType::NanoappUnload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn release_hands_back_type_and_payload() {
        let seen = Arc::new(AtomicU32::new(0));
        let seen_clone = seen.clone();
        let event = Event::targeted(0x8001, 41u32, InstanceId(3)).with_release(Box::new(
            move |event_type, data| {
                let value = data.downcast::<u32>().map(|v| *v).unwrap_or(0);
                seen_clone.store(event_type as u32 + value, Ordering::SeqCst);
            },
        ));
        event.release();
        assert_eq!(seen.load(Ordering::SeqCst), 0x8001 + 41);
    }

    #[test]
    fn targeting() {
        let event = Event::targeted(0x8001, (), InstanceId(3));
        assert!(event.target.is_targeted_at(InstanceId(3)));
        assert!(!event.target.is_targeted_at(InstanceId(4)));
        assert!(!EventTarget::Broadcast.is_targeted_at(InstanceId(3)));
    }
}
