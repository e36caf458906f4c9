//! ## nanohub-core::nanoapp
//! **Loaded nanoapp records and the handler contract**

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;

use bitflags::bitflags;

use crate::runtime::NanoappApi;
use crate::types::InstanceId;

bitflags! {
    /// Resource families a nanoapp declared at build time.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct NanoappPermissions: u32 {
        const WIFI = 1 << 0;
        const GNSS = 1 << 1;
        const WWAN = 1 << 2;
    }
}

/// Entry points the runtime calls on the event loop thread.
///
/// Every call runs to completion; a handler must never block waiting for another event.
pub trait NanoappHandler: Send {
    /// Returns `false` to abort the load.
    fn start(&mut self, api: &mut NanoappApi<'_>) -> bool;

    fn handle_event(
        &mut self,
        api: &mut NanoappApi<'_>,
        sender: InstanceId,
        event_type: u16,
        data: &dyn Any,
    );

    fn end(&mut self, _api: &mut NanoappApi<'_>) {}
}

pub struct Nanoapp {
    app_id: u64,
    instance_id: InstanceId,
    permissions: NanoappPermissions,
    broadcast_subscriptions: BTreeSet<u16>,
    /// Taken out while one of the handler's entry points is running.
    handler: Option<Box<dyn NanoappHandler>>,
}

impl Nanoapp {
    pub(crate) fn new(
        app_id: u64,
        instance_id: InstanceId,
        permissions: NanoappPermissions,
        handler: Box<dyn NanoappHandler>,
    ) -> Self {
        Self {
            app_id,
            instance_id,
            permissions,
            broadcast_subscriptions: BTreeSet::new(),
            handler: Some(handler),
        }
    }

    pub fn app_id(&self) -> u64 {
        self.app_id
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn permissions(&self) -> NanoappPermissions {
        self.permissions
    }

    /// Checks a declared permission, logging the refusal.
    pub fn permit_permission_use(&self, permission: NanoappPermissions) -> bool {
        let permitted = self.permissions.contains(permission);
        if !permitted {
            tracing::warn!(
                app_id = format_args!("0x{:016x}", self.app_id),
                ?permission,
                "Nanoapp lacks permission"
            );
        }
        permitted
    }

    /// Returns `false` if already registered.
    pub fn register_for_broadcast_event(&mut self, event_type: u16) -> bool {
        self.broadcast_subscriptions.insert(event_type)
    }

    /// Returns `false` if not registered.
    pub fn unregister_for_broadcast_event(&mut self, event_type: u16) -> bool {
        self.broadcast_subscriptions.remove(&event_type)
    }

    pub fn is_registered_for_broadcast_event(&self, event_type: u16) -> bool {
        self.broadcast_subscriptions.contains(&event_type)
    }

    pub(crate) fn take_handler(&mut self) -> Option<Box<dyn NanoappHandler>> {
        self.handler.take()
    }

    pub(crate) fn restore_handler(&mut self, handler: Box<dyn NanoappHandler>) {
        self.handler = Some(handler);
    }
}

impl fmt::Debug for Nanoapp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nanoapp")
            .field("app_id", &format_args!("0x{:016x}", self.app_id))
            .field("instance_id", &self.instance_id)
            .field("permissions", &self.permissions)
            .field("broadcast_subscriptions", &self.broadcast_subscriptions)
            .finish()
    }
}
