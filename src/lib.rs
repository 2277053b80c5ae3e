//! Discovering and talking to LEGO MINDSTORMS NXT bricks over USB.
//!
//! <br>
//!
//! An NXT shows up on USB in one of three ways. After a reset it runs the
//! SAM-BA monitor burnt in the AT91SAM7 ROM, which speaks a tiny ASCII
//! protocol that can peek and poke memory, upload a blob and jump to it.
//! Once a firmware runs, the official LEGO firmware (or an alternate one such
//! as NxOS) speaks the binary brick command protocol instead.
//!
//! This crate finds bricks, identifies them and speaks both protocols. It does
//! not parse firmware images nor ask the user before erasing anything; that
//! is left to the program using it.
//!
//! # Example
//!
//! Upload a program to RAM and run it.
//!
//! ```no_run
//! use nxtboot_rs::{FirmwareKind, Filter, Nxt, Samba, NXT_RAM_LOAD_ADDR};
//!
//! fn main() -> nxtboot_rs::Result<()> {
//!     let image = std::fs::read("beep.bin")?;
//!
//!     let mut nxt = Nxt::init()?;
//!     let mut conn = nxt.find(&Filter::any().firmware(FirmwareKind::Samba))?;
//!     conn.open()?;
//!
//!     let mut samba = Samba::handshake(&mut conn)?;
//!     samba.send_file(NXT_RAM_LOAD_ADDR, &image)?;
//!     samba.jump(NXT_RAM_LOAD_ADDR)?;
//!     Ok(())
//! }
//! ```
//!
//! List what is plugged in.
//!
//! ```no_run
//! use nxtboot_rs::Nxt;
//!
//! let mut nxt = Nxt::init().expect("could not initialize libusb");
//! nxt.list(|brick| {
//!     println!(
//!         "{:<11}  {:<8}  {:<17}  {}",
//!         brick.connection,
//!         brick.firmware,
//!         brick.serial.as_deref().unwrap_or("-"),
//!         brick.name.as_deref().unwrap_or("-"),
//!     )
//! })
//! .expect("failed to scan for bricks");
//! ```

/// Atmel USB Vendor ID, used by the SAM-BA monitor
pub const NXT_SAMBA_VID: u16 = 0x03EB;
/// SAM-BA USB Product ID
pub const NXT_SAMBA_PID: u16 = 0x6124;
/// LEGO USB Vendor ID
pub const NXT_LEGO_VID: u16 = 0x0694;
/// LEGO firmware USB Product ID
pub const NXT_LEGO_PID: u16 = 0x0002;
/// Alternate firmware (NxOS) USB Product ID
pub const NXT_NXTOS_PID: u16 = 0xFF00;

/// Bulk OUT endpoint
pub const NXT_EP_OUT: u8 = 0x01;
/// Bulk IN endpoint
pub const NXT_EP_IN: u8 = 0x82;
/// USB configuration selected on open
pub const NXT_USB_CONFIGURATION: u8 = 1;

/// LEGO OUI at the start of USB serial numbers
pub const NXT_LEGO_USB_SERIAL_OUI: &str = "001653";
/// Length of a LEGO USB serial number
pub const NXT_LEGO_USB_SERIAL_LEN: usize = 12;
/// Size of the name field in brick replies, terminator included
pub const NXT_NAME_SIZE: usize = 15;

/// Where programs are usually loaded in RAM
pub const NXT_RAM_LOAD_ADDR: u32 = 0x0020_2000;
/// Start of flash, where a flashed firmware boots from
pub const NXT_FLASH_BOOT_ADDR: u32 = 0x0010_0000;

/// Brick Command Module
pub mod cmd;
pub use cmd::{CommandType, DeviceInfo, Opcode, Status};

/// Device Discovery Module
pub mod device;
pub use device::{DeviceListing, Filter, FirmwareKind, Nxt};

/// Error Module
pub mod error;
pub use error::{NxtError, Result};

/// SAM-BA Bootloader Module
pub mod samba;
pub use samba::Samba;

/// USB Connection Module
pub mod usb;
pub use usb::{Link, NxtConnection, UsbBackend, UsbDevice, UsbHandle};

#[cfg(test)]
mod mock;
