//! Identifiers shared by every subsystem.

use std::fmt;

/// Runtime identifier of a loaded nanoapp, assigned at load time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u16);

impl InstanceId {
    /// Owner of system timers and sender of system events.
    pub const SYSTEM: Self = Self(0);
    /// Target meaning "every subscribed nanoapp".
    pub const BROADCAST: Self = Self(u16::MAX);
    pub const INVALID: Self = Self::BROADCAST;

    #[inline]
    pub fn is_system(self) -> bool {
        self == Self::SYSTEM
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of an active timer; unique among active timers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u32);

impl TimerHandle {
    pub const INVALID: Self = Self(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque correlation token a nanoapp attaches to a request and gets back with the result.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Cookie(pub u64);

impl Cookie {
    pub const NONE: Self = Self(0);
}

/// Payload of a [`event_type::TIMER`] event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerEvent {
    pub handle: TimerHandle,
    pub cookie: Cookie,
}

/// Payload of [`event_type::NANOAPP_STARTED`] and [`event_type::NANOAPP_STOPPED`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NanoappInfo {
    pub app_id: u64,
    pub instance_id: InstanceId,
}

/// 16-bit event type space.
pub mod event_type {
    pub const TIMER: u16 = 0x0002;
    pub const NANOAPP_STARTED: u16 = 0x0003;
    pub const NANOAPP_STOPPED: u16 = 0x0004;

    pub const WIFI_ASYNC_RESULT: u16 = 0x0300;
    pub const WIFI_SCAN_RESULT: u16 = 0x0301;
    pub const WIFI_RANGING_RESULT: u16 = 0x0302;

    pub const GNSS_ASYNC_RESULT: u16 = 0x0600;
    pub const GNSS_LOCATION: u16 = 0x0601;
    pub const GNSS_DATA: u16 = 0x0602;

    pub const WWAN_CELL_INFO_RESULT: u16 = 0x0700;

    /// Lowest value nanoapps may use for their own events.
    pub const FIRST_USER_VALUE: u16 = 0x8000;
}
