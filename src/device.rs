use crate::cmd;
use crate::error::{NxtError, Result};
use crate::usb::{NxtConnection, UsbBackend, UsbDevice, UsbHandle};
use crate::{
    NXT_LEGO_PID, NXT_LEGO_USB_SERIAL_LEN, NXT_LEGO_USB_SERIAL_OUI, NXT_LEGO_VID, NXT_NXTOS_PID,
    NXT_SAMBA_PID, NXT_SAMBA_VID,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// The firmware an NXT is running, as told by its USB ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FirmwareKind {
    /// SAM7 boot assistant, the ROM bootloader.
    Samba,
    /// Official LEGO firmware.
    Lego,
    /// NxOS and other alternate firmwares.
    Nxtos,
}

struct UsbId {
    vendor_id: u16,
    product_id: u16,
    interface: u8,
}

impl FirmwareKind {
    pub const ALL: [FirmwareKind; 3] = [FirmwareKind::Samba, FirmwareKind::Lego, FirmwareKind::Nxtos];

    const fn usb_id(self) -> UsbId {
        match self {
            FirmwareKind::Samba => UsbId {
                vendor_id: NXT_SAMBA_VID,
                product_id: NXT_SAMBA_PID,
                interface: 1,
            },
            FirmwareKind::Lego => UsbId {
                vendor_id: NXT_LEGO_VID,
                product_id: NXT_LEGO_PID,
                interface: 0,
            },
            FirmwareKind::Nxtos => UsbId {
                vendor_id: NXT_LEGO_VID,
                product_id: NXT_NXTOS_PID,
                interface: 0,
            },
        }
    }

    /// Vendor and product id advertised by this firmware.
    pub const fn usb_ids(self) -> (u16, u16) {
        let id = self.usb_id();
        (id.vendor_id, id.product_id)
    }

    /// USB interface carrying the bulk endpoints.
    pub const fn interface(self) -> u8 {
        self.usb_id().interface
    }

    /// Maps USB ids to a firmware kind, `None` for anything that is not an NXT.
    pub fn classify(vendor_id: u16, product_id: u16) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|fw| fw.usb_ids() == (vendor_id, product_id))
    }
}

impl fmt::Display for FirmwareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FirmwareKind::Samba => "SAMBA",
            FirmwareKind::Lego => "LEGO",
            FirmwareKind::Nxtos => "NXTOS",
        })
    }
}

/// Discovery filters. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub firmware: Option<FirmwareKind>,
    pub serial: Option<String>,
    pub name: Option<String>,
}

impl Filter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn firmware(mut self, firmware: FirmwareKind) -> Self {
        self.firmware = Some(firmware);
        self
    }

    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// One recognised brick, as reported by [`Nxt::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceListing {
    pub connection: String,
    pub firmware: FirmwareKind,
    pub serial: Option<String>,
    pub name: Option<String>,
}

/// `usb.<bus>.<address>` identifier of a device.
pub fn connection_string<D: UsbDevice>(device: &D) -> String {
    format!("usb.{}.{}", device.bus_number(), device.address())
}

/// Rewrites a LEGO serial (`001653` OUI, 12 hex digits) as a colon separated
/// MAC address. Any other serial is returned as is.
pub fn serial_to_mac(serial: &str) -> String {
    if serial.len() != NXT_LEGO_USB_SERIAL_LEN
        || !serial.starts_with(NXT_LEGO_USB_SERIAL_OUI)
        || !serial.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return serial.to_owned();
    }

    (0..serial.len())
        .step_by(2)
        .map(|i| &serial[i..i + 2])
        .collect::<Vec<_>>()
        .join(":")
}

/// Reads the serial number string, opening the device only for the duration
/// of the read.
pub fn get_serial<D: UsbDevice>(device: &D) -> Result<String> {
    let handle = device.open()?;
    let serial = handle.read_serial_number()?;
    Ok(serial_to_mac(&serial))
}

fn classify_device<D: UsbDevice>(device: &D) -> Option<FirmwareKind> {
    let (vid, pid) = device.ids().ok()?;
    FirmwareKind::classify(vid, pid)
}

/// Discovery context over a USB backend.
#[derive(Debug)]
pub struct Nxt<B: UsbBackend> {
    backend: B,
}

impl Nxt<rusb::Context> {
    /// Creates a context on a fresh libusb context.
    pub fn init() -> Result<Self> {
        Ok(Nxt::new(rusb::Context::new()?))
    }
}

impl<B: UsbBackend> Nxt<B> {
    pub fn new(backend: B) -> Self {
        Nxt { backend }
    }

    /// Wraps an already known device in a connection, without opening it.
    pub fn connect(&mut self, device: B::Device) -> Result<NxtConnection<'_, B>> {
        let firmware = classify_device(&device).ok_or(NxtError::NotPresent)?;
        Ok(NxtConnection::new(device, firmware))
    }

    /// Brick name, queried with the DEVICE INFO command.
    ///
    /// Only LEGO firmware answers this, and the probe resets the brick USB
    /// connection, so it is refused for other firmwares.
    pub fn get_name(&mut self, device: &B::Device) -> Result<String> {
        match classify_device(device) {
            Some(FirmwareKind::Lego) => self.probe_name(device),
            Some(_) => Err(NxtError::NotSupported),
            None => Err(NxtError::NotPresent),
        }
    }

    fn probe_name(&mut self, device: &B::Device) -> Result<String> {
        // the connection closes when dropped, on every path out of here
        let mut conn = NxtConnection::<B>::new(device.clone(), FirmwareKind::Lego);
        conn.open()?;
        let info = cmd::get_device_info(&mut conn)?;
        Ok(info.name)
    }

    /// First device, in enumeration order, that passes every filter.
    ///
    /// A failing serial or name lookup skips the candidate. Returns
    /// [`NxtError::NotPresent`] when nothing matches.
    pub fn find(&mut self, filter: &Filter) -> Result<NxtConnection<'_, B>> {
        for device in self.backend.enumerate()? {
            let firmware = match classify_device(&device) {
                Some(fw) => fw,
                None => continue,
            };
            if filter.firmware.map_or(false, |want| want != firmware) {
                continue;
            }

            if let Some(want) = &filter.serial {
                match get_serial(&device) {
                    Ok(serial) if serial == *want => {}
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(connection = %connection_string(&device), "serial lookup failed: {}", e);
                        continue;
                    }
                }
            }

            if let Some(want) = &filter.name {
                if firmware != FirmwareKind::Lego {
                    continue;
                }
                match self.probe_name(&device) {
                    Ok(name) if name == *want => {}
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(connection = %connection_string(&device), "name lookup failed: {}", e);
                        continue;
                    }
                }
            }

            debug!(connection = %connection_string(&device), %firmware, "found NXT");
            return Ok(NxtConnection::new(device, firmware));
        }

        Err(NxtError::NotPresent)
    }

    /// Calls `visit` for every recognised device.
    ///
    /// Serial and name are only probed on LEGO firmware; a probe failure
    /// leaves the field empty.
    pub fn list<F>(&mut self, mut visit: F) -> Result<()>
    where
        F: FnMut(&DeviceListing),
    {
        for device in self.backend.enumerate()? {
            let firmware = match classify_device(&device) {
                Some(fw) => fw,
                None => continue,
            };

            let mut listing = DeviceListing {
                connection: connection_string(&device),
                firmware,
                serial: None,
                name: None,
            };
            if firmware == FirmwareKind::Lego {
                listing.serial = get_serial(&device).ok();
                listing.name = self.probe_name(&device).ok();
            }
            visit(&listing);
        }

        Ok(())
    }
}
