//! In-memory USB bus and byte link for tests.

use crate::error::{NxtError, Result};
use crate::usb::{Link, UsbBackend, UsbDevice, UsbHandle};
use crate::{NXT_EP_IN, NXT_EP_OUT};

use std::cell::{RefCell, RefMut};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct DeviceState {
    pub bus: u8,
    pub address: u8,
    pub ids: (u16, u16),
    pub serial: Option<String>,
    pub descriptor_error: bool,

    pub open_error: Option<rusb::Error>,
    pub detach_error: Option<rusb::Error>,
    pub reset_error: Option<rusb::Error>,
    pub config_error: Option<rusb::Error>,
    pub claim_error: Option<rusb::Error>,
    pub transfer_error: Option<rusb::Error>,

    pub opens: usize,
    pub open_handles: usize,
    pub resets: usize,
    pub configuration: Option<u8>,
    pub claimed: Option<u8>,

    /// Upper bound of each successive bulk transfer, unbounded once empty.
    pub chunks: VecDeque<usize>,
    pub transfers: usize,
    pub reads: VecDeque<u8>,
    pub written: Vec<u8>,
}

#[derive(Debug, Clone)]
pub(crate) struct MockDevice(Rc<RefCell<DeviceState>>);

impl MockDevice {
    pub fn new(bus: u8, address: u8, vid: u16, pid: u16) -> Self {
        MockDevice(Rc::new(RefCell::new(DeviceState {
            bus,
            address,
            ids: (vid, pid),
            ..Default::default()
        })))
    }

    pub fn samba(bus: u8, address: u8) -> Self {
        Self::new(bus, address, 0x03EB, 0x6124)
    }

    pub fn lego(bus: u8, address: u8) -> Self {
        Self::new(bus, address, 0x0694, 0x0002)
    }

    pub fn nxtos(bus: u8, address: u8) -> Self {
        Self::new(bus, address, 0x0694, 0xFF00)
    }

    pub fn with_serial(self, serial: &str) -> Self {
        self.state().serial = Some(serial.to_owned());
        self
    }

    pub fn with_reads(self, bytes: &[u8]) -> Self {
        self.state().reads.extend(bytes.iter().copied());
        self
    }

    pub fn state(&self) -> RefMut<'_, DeviceState> {
        self.0.borrow_mut()
    }

    fn next_chunk(state: &mut DeviceState, wanted: usize) -> usize {
        state.transfers += 1;
        state.chunks.pop_front().unwrap_or(usize::MAX).min(wanted)
    }
}

impl UsbDevice for MockDevice {
    type Handle = MockHandle;

    fn ids(&self) -> rusb::Result<(u16, u16)> {
        let state = self.state();
        if state.descriptor_error {
            return Err(rusb::Error::Io);
        }
        Ok(state.ids)
    }

    fn bus_number(&self) -> u8 {
        self.state().bus
    }

    fn address(&self) -> u8 {
        self.state().address
    }

    fn open(&self) -> rusb::Result<MockHandle> {
        let mut state = self.state();
        if let Some(e) = state.open_error {
            return Err(e);
        }
        state.opens += 1;
        state.open_handles += 1;
        Ok(MockHandle {
            device: self.clone(),
        })
    }
}

#[derive(Debug)]
pub(crate) struct MockHandle {
    device: MockDevice,
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.device.state().open_handles -= 1;
    }
}

impl UsbHandle for MockHandle {
    fn detach_kernel_driver(&mut self, _iface: u8) -> rusb::Result<()> {
        self.device.state().detach_error.map_or(Ok(()), Err)
    }

    fn reset(&mut self) -> rusb::Result<()> {
        let mut state = self.device.state();
        state.resets += 1;
        state.reset_error.map_or(Ok(()), Err)
    }

    fn set_active_configuration(&mut self, config: u8) -> rusb::Result<()> {
        let mut state = self.device.state();
        if let Some(e) = state.config_error {
            return Err(e);
        }
        state.configuration = Some(config);
        Ok(())
    }

    fn claim_interface(&mut self, iface: u8) -> rusb::Result<()> {
        let mut state = self.device.state();
        if let Some(e) = state.claim_error {
            return Err(e);
        }
        state.claimed = Some(iface);
        Ok(())
    }

    fn release_interface(&mut self, iface: u8) -> rusb::Result<()> {
        let mut state = self.device.state();
        assert_eq!(state.claimed, Some(iface));
        state.claimed = None;
        Ok(())
    }

    fn read_serial_number(&self) -> rusb::Result<String> {
        self.device.state().serial.clone().ok_or(rusb::Error::InvalidParam)
    }

    fn write_bulk(&self, endpoint: u8, buf: &[u8], _timeout: Duration) -> rusb::Result<usize> {
        assert_eq!(endpoint, NXT_EP_OUT);
        let mut state = self.device.state();
        if let Some(e) = state.transfer_error {
            return Err(e);
        }
        let len = MockDevice::next_chunk(&mut state, buf.len());
        state.written.extend_from_slice(&buf[..len]);
        Ok(len)
    }

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], _timeout: Duration) -> rusb::Result<usize> {
        assert_eq!(endpoint, NXT_EP_IN);
        let mut state = self.device.state();
        if let Some(e) = state.transfer_error {
            return Err(e);
        }
        let len = MockDevice::next_chunk(&mut state, buf.len()).min(state.reads.len());
        for (dst, src) in buf.iter_mut().zip(state.reads.drain(..len)) {
            *dst = src;
        }
        Ok(len)
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockBus {
    pub devices: Vec<MockDevice>,
    pub enumerate_error: Option<rusb::Error>,
}

impl MockBus {
    pub fn with_devices(devices: Vec<MockDevice>) -> Self {
        MockBus {
            devices,
            enumerate_error: None,
        }
    }
}

impl UsbBackend for MockBus {
    type Device = MockDevice;

    fn enumerate(&self) -> rusb::Result<Vec<MockDevice>> {
        match self.enumerate_error {
            Some(e) => Err(e),
            None => Ok(self.devices.clone()),
        }
    }
}

/// Scripted byte link for codec tests.
#[derive(Debug)]
pub(crate) struct MockLink {
    pub reads: VecDeque<u8>,
    pub written: Vec<u8>,
    pub open: bool,
}

impl MockLink {
    pub fn new(reads: &[u8]) -> Self {
        MockLink {
            reads: reads.iter().copied().collect(),
            written: vec![],
            open: true,
        }
    }

    pub fn written_str(&self) -> &str {
        std::str::from_utf8(&self.written).expect("written bytes are not ascii")
    }
}

impl Link for MockLink {
    fn send(&mut self, buf: &[u8]) -> Result<()> {
        if !self.open {
            return Err(NxtError::NotOpen);
        }
        self.written.extend_from_slice(buf);
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<()> {
        if !self.open {
            return Err(NxtError::NotOpen);
        }
        if self.reads.len() < buf.len() {
            return Err(rusb::Error::Io.into());
        }
        let n = buf.len();
        for (dst, src) in buf.iter_mut().zip(self.reads.drain(..n)) {
            *dst = src;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }
}
