use crate::error::{NxtError, Result};
use crate::usb::Link;

use tracing::{debug, trace};

/// What the SAM-BA monitor answers to `N#`.
pub const SAMBA_HANDSHAKE_ACK: [u8; 2] = *b"\n\r";

fn format_command2(cmd: char, addr: u32, word: u32) -> String {
    format!("{}{:08X},{:08X}#", cmd, addr, word)
}

fn format_command(cmd: char, addr: u32) -> String {
    format!("{}{:08X}#", cmd, addr)
}

/// SAM-BA session with a brick in bootloader mode.
///
/// A session only exists once the handshake went through. Values read back
/// from the device are little-endian on the wire.
#[derive(Debug)]
pub struct Samba<'l, L: Link> {
    link: &'l mut L,
}

impl<'l, L: Link> Samba<'l, L> {
    /// Puts the monitor in binary mode.
    ///
    /// On any failure the link is closed before the error is returned.
    pub fn handshake(link: &'l mut L) -> Result<Self> {
        let mut ack = [0u8; 2];
        let res = link.send_str("N#").and_then(|_| link.recv(&mut ack));

        if let Err(e) = res {
            link.close();
            return Err(e);
        }
        if ack != SAMBA_HANDSHAKE_ACK {
            debug!(?ack, "unexpected handshake answer");
            link.close();
            return Err(NxtError::HandshakeFailed);
        }

        Ok(Samba { link })
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        trace!(line, "samba command");
        self.link.send_str(line)
    }

    fn write_common(&mut self, cmd: char, addr: u32, word: u32) -> Result<()> {
        self.send_line(&format_command2(cmd, addr, word))
    }

    pub fn write_byte(&mut self, addr: u32, b: u8) -> Result<()> {
        self.write_common('O', addr, b.into())
    }

    pub fn write_halfword(&mut self, addr: u32, hw: u16) -> Result<()> {
        self.write_common('H', addr, hw.into())
    }

    pub fn write_word(&mut self, addr: u32, w: u32) -> Result<()> {
        self.write_common('W', addr, w)
    }

    fn read_common(&mut self, cmd: char, len: usize, addr: u32) -> Result<u32> {
        debug_assert!(len <= 4);
        self.send_line(&format_command2(cmd, addr, len as u32))?;

        let mut buf = [0u8; 4];
        self.link.recv(&mut buf[..len])?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_byte(&mut self, addr: u32) -> Result<u8> {
        Ok(self.read_common('o', 1, addr)? as u8)
    }

    pub fn read_halfword(&mut self, addr: u32) -> Result<u16> {
        Ok(self.read_common('h', 2, addr)? as u16)
    }

    pub fn read_word(&mut self, addr: u32) -> Result<u32> {
        self.read_common('w', 4, addr)
    }

    /// Copies `data` to device memory at `addr`. The monitor does not ack.
    pub fn send_file(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let len = u16::try_from(data.len()).map_err(|_| {
            NxtError::InvalidFirmware(format!("{} bytes is too big for one transfer", data.len()))
        })?;

        self.send_line(&format_command2('S', addr, len.into()))?;
        self.link.send(data)
    }

    /// Reads `len` bytes of device memory at `addr`.
    ///
    /// The monitor sends one byte more than asked for; it is kept at the end
    /// of the returned buffer.
    pub fn receive_file(&mut self, addr: u32, len: u16) -> Result<Vec<u8>> {
        let total = usize::from(len) + 1;
        let mut buf = Vec::new();
        buf.try_reserve_exact(total)
            .map_err(|_| NxtError::OutOfMemory)?;
        buf.resize(total, 0);

        self.send_line(&format_command2('R', addr, len.into()))?;
        self.link.recv(&mut buf)?;
        Ok(buf)
    }

    /// Starts execution at `addr`.
    pub fn jump(&mut self, addr: u32) -> Result<()> {
        self.send_line(&format_command('G', addr))
    }

    /// SAM-BA monitor version string.
    pub fn version(&mut self) -> Result<String> {
        self.send_line("V#")?;

        let mut buf = [0u8; 4];
        self.link.recv(&mut buf)?;
        if !buf.is_ascii() {
            return Err(NxtError::Protocol);
        }
        Ok(buf.iter().map(|&c| c as char).collect())
    }
}
