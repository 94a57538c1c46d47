//! In-use guard.

use std::{
    collections::HashSet,
    io::{Error, ErrorKind, Result},
    sync::{LazyLock, Mutex},
};

static IN_USE: LazyLock<Mutex<HashSet<(u8, u8)>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

/// Marks a device as having an open accessory channel for as long as it lives.
pub(crate) struct InUseGuard {
    bus: u8,
    address: u8,
}

impl InUseGuard {
    pub fn new(bus: u8, address: u8) -> Result<Self> {
        let mut in_use = IN_USE.lock().unwrap();

        if !in_use.insert((bus, address)) {
            return Err(Error::new(ErrorKind::ResourceBusy, "device is used by another accessory channel"));
        }

        Ok(Self { bus, address })
    }
}

impl Drop for InUseGuard {
    fn drop(&mut self) {
        let mut in_use = IN_USE.lock().unwrap();
        in_use.remove(&(self.bus, self.address));
    }
}
