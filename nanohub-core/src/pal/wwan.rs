use bitflags::bitflags;

use super::PalSystemApi;
use crate::events::{EventPoster, SystemCallback};
use crate::types::Cookie;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct WwanCapabilities: u32 {
        const GET_CELL_INFO = 1 << 0;
        const GET_CELL_NEIGHBOR_INFO = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellKind {
    Gsm,
    Cdma,
    Lte,
    Wcdma,
    TdScdma,
    Nr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellInfo {
    pub kind: CellKind,
    pub registered: bool,
    pub cell_id: u64,
    pub signal_dbm: i32,
}

/// Payload of [`crate::types::event_type::WWAN_CELL_INFO_RESULT`].
///
/// The PAL leaves `cookie` empty; the manager fills in the requester's cookie.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WwanCellInfoResult {
    pub error_code: u8,
    pub cookie: Cookie,
    pub cells: Vec<CellInfo>,
}

pub trait WwanPal: Send {
    fn open(&mut self, system: &PalSystemApi, callbacks: WwanPalCallbacks) -> bool;
    fn close(&mut self);
    fn capabilities(&self) -> WwanCapabilities;
    fn request_cell_info(&mut self) -> bool;
}

#[derive(Debug)]
pub enum WwanPalEvent {
    CellInfoResult(WwanCellInfoResult),
}

#[derive(Clone)]
pub struct WwanPalCallbacks {
    poster: EventPoster,
}

impl WwanPalCallbacks {
    pub(crate) fn new(poster: EventPoster) -> Self {
        Self { poster }
    }

    pub fn cell_info_result(&self, result: WwanCellInfoResult) {
        self.poster
            .defer_callback_or_die(SystemCallback::Wwan(WwanPalEvent::CellInfoResult(result)));
    }
}
