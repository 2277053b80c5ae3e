use crate::device::FirmwareKind;
use crate::error::{NxtError, Result};
use crate::{NXT_EP_IN, NXT_EP_OUT, NXT_USB_CONFIGURATION};

use rusb::UsbContext;
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::{debug, trace, warn};

// libusb reads a zero timeout as "wait forever"
const NO_TIMEOUT: Duration = Duration::ZERO;

/// Source of USB devices, usually a libusb context.
pub trait UsbBackend {
    type Device: UsbDevice;

    /// Snapshot of the devices currently attached.
    fn enumerate(&self) -> rusb::Result<Vec<Self::Device>>;
}

/// A device seen during enumeration, not necessarily opened.
pub trait UsbDevice: Clone {
    type Handle: UsbHandle;

    /// Vendor and product id from the device descriptor.
    fn ids(&self) -> rusb::Result<(u16, u16)>;
    fn bus_number(&self) -> u8;
    fn address(&self) -> u8;
    fn open(&self) -> rusb::Result<Self::Handle>;
}

/// An open device. Dropping the handle closes it.
pub trait UsbHandle {
    fn detach_kernel_driver(&mut self, iface: u8) -> rusb::Result<()>;
    fn reset(&mut self) -> rusb::Result<()>;
    fn set_active_configuration(&mut self, config: u8) -> rusb::Result<()>;
    fn claim_interface(&mut self, iface: u8) -> rusb::Result<()>;
    fn release_interface(&mut self, iface: u8) -> rusb::Result<()>;
    /// Serial number string descriptor, as ASCII.
    fn read_serial_number(&self) -> rusb::Result<String>;
    /// One bulk OUT transfer, returns the number of bytes actually sent.
    fn write_bulk(&self, endpoint: u8, buf: &[u8], timeout: Duration) -> rusb::Result<usize>;
    /// One bulk IN transfer, returns the number of bytes actually received.
    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize>;
}

impl<T: UsbContext> UsbBackend for T {
    type Device = rusb::Device<T>;

    fn enumerate(&self) -> rusb::Result<Vec<Self::Device>> {
        Ok(self.devices()?.iter().collect())
    }
}

impl<T: UsbContext> UsbDevice for rusb::Device<T> {
    type Handle = rusb::DeviceHandle<T>;

    fn ids(&self) -> rusb::Result<(u16, u16)> {
        let desc = self.device_descriptor()?;
        Ok((desc.vendor_id(), desc.product_id()))
    }

    fn bus_number(&self) -> u8 {
        rusb::Device::bus_number(self)
    }

    fn address(&self) -> u8 {
        rusb::Device::address(self)
    }

    fn open(&self) -> rusb::Result<Self::Handle> {
        rusb::Device::open(self)
    }
}

impl<T: UsbContext> UsbHandle for rusb::DeviceHandle<T> {
    fn detach_kernel_driver(&mut self, iface: u8) -> rusb::Result<()> {
        rusb::DeviceHandle::detach_kernel_driver(self, iface)
    }

    fn reset(&mut self) -> rusb::Result<()> {
        rusb::DeviceHandle::reset(self)
    }

    fn set_active_configuration(&mut self, config: u8) -> rusb::Result<()> {
        rusb::DeviceHandle::set_active_configuration(self, config)
    }

    fn claim_interface(&mut self, iface: u8) -> rusb::Result<()> {
        rusb::DeviceHandle::claim_interface(self, iface)
    }

    fn release_interface(&mut self, iface: u8) -> rusb::Result<()> {
        rusb::DeviceHandle::release_interface(self, iface)
    }

    fn read_serial_number(&self) -> rusb::Result<String> {
        let desc = self.device().device_descriptor()?;
        self.read_serial_number_string_ascii(&desc)
    }

    fn write_bulk(&self, endpoint: u8, buf: &[u8], timeout: Duration) -> rusb::Result<usize> {
        rusb::DeviceHandle::write_bulk(self, endpoint, buf, timeout)
    }

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize> {
        rusb::DeviceHandle::read_bulk(self, endpoint, buf, timeout)
    }
}

/// Byte pipe the protocol codecs talk through.
///
/// Both directions are all-or-nothing: `send` returns once every byte is
/// out, `recv` once `buf` is full.
pub trait Link {
    fn send(&mut self, buf: &[u8]) -> Result<()>;
    fn recv(&mut self, buf: &mut [u8]) -> Result<()>;
    fn close(&mut self);

    fn send_str(&mut self, s: &str) -> Result<()> {
        self.send(s.as_bytes())
    }
}

type HandleOf<B> = <<B as UsbBackend>::Device as UsbDevice>::Handle;

/// A matched NXT, optionally opened with its interface claimed.
///
/// The connection mutably borrows the [`Nxt`](crate::Nxt) context that found
/// it, so the context cannot enumerate again until the connection is gone.
pub struct NxtConnection<'a, B: UsbBackend> {
    device: Option<B::Device>,
    handle: Option<HandleOf<B>>,

    firmware: FirmwareKind,
    iface: u8,

    _context: PhantomData<&'a mut B>,
}

impl<B: UsbBackend> Drop for NxtConnection<'_, B> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<B: UsbBackend> fmt::Debug for NxtConnection<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NxtConnection")
            .field("firmware", &self.firmware)
            .field("iface", &self.iface)
            .field("open", &self.is_open())
            .finish()
    }
}

impl<'a, B: UsbBackend> NxtConnection<'a, B> {
    pub(crate) fn new(device: B::Device, firmware: FirmwareKind) -> Self {
        NxtConnection {
            device: Some(device),
            handle: None,

            firmware,
            iface: firmware.interface(),

            _context: PhantomData,
        }
    }

    /// Opens the device and claims its interface.
    pub fn open(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Err(NxtError::AlreadyOpen);
        }
        let device = self.device.as_ref().ok_or(NxtError::NotOpen)?;

        // an early return drops the handle, which closes it
        let mut handle = device.open()?;

        match handle.detach_kernel_driver(self.iface) {
            Ok(()) | Err(rusb::Error::NotSupported) | Err(rusb::Error::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        // LEGO firmware refuses a second connection without a reset.
        if self.firmware == FirmwareKind::Lego {
            match handle.reset() {
                Ok(()) | Err(rusb::Error::NotSupported) => {}
                Err(e) => return Err(e.into()),
            }
        }

        match handle.set_active_configuration(NXT_USB_CONFIGURATION) {
            Ok(()) | Err(rusb::Error::NotSupported) => {}
            Err(e) => return Err(e.into()),
        }

        handle.claim_interface(self.iface)?;
        debug!(
            bus = device.bus_number(),
            address = device.address(),
            iface = self.iface,
            firmware = %self.firmware,
            "claimed NXT interface"
        );

        self.handle = Some(handle);
        Ok(())
    }

    /// Releases the interface and forgets the device. Safe to call twice.
    pub fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            if let Err(e) = handle.release_interface(self.iface) {
                warn!("could not release interface {}: {}", self.iface, e);
            }
            debug!(iface = self.iface, "closed NXT connection");
        }
        self.device = None;
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn is_firmware(&self, firmware: FirmwareKind) -> bool {
        self.firmware == firmware
    }

    pub fn get_firmware(&self) -> FirmwareKind {
        self.firmware
    }

    pub fn get_interface(&self) -> u8 {
        self.iface
    }

    /// `usb.<bus>.<address>`, or `None` once closed.
    pub fn get_connection_string(&self) -> Option<String> {
        self.device.as_ref().map(crate::device::connection_string)
    }

    fn handle(&self) -> Result<&HandleOf<B>> {
        self.handle.as_ref().ok_or(NxtError::NotOpen)
    }
}

impl<B: UsbBackend> Link for NxtConnection<'_, B> {
    fn send(&mut self, mut buf: &[u8]) -> Result<()> {
        let handle = self.handle()?;
        while !buf.is_empty() {
            let len = handle.write_bulk(NXT_EP_OUT, buf, NO_TIMEOUT)?;
            trace!(len, left = buf.len() - len.min(buf.len()), "bulk out");
            if len == 0 {
                return Err(rusb::Error::Io.into());
            }
            buf = &buf[len.min(buf.len())..];
        }
        Ok(())
    }

    fn recv(&mut self, mut buf: &mut [u8]) -> Result<()> {
        let handle = self.handle()?;
        while !buf.is_empty() {
            let len = handle.read_bulk(NXT_EP_IN, buf, NO_TIMEOUT)?;
            trace!(len, left = buf.len() - len.min(buf.len()), "bulk in");
            if len == 0 {
                return Err(rusb::Error::Io.into());
            }
            let n = len.min(buf.len());
            buf = &mut std::mem::take(&mut buf)[n..];
        }
        Ok(())
    }

    fn close(&mut self) {
        NxtConnection::close(self)
    }
}
