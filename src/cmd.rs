use serde::{Deserialize, Serialize};

use crate::error::{NxtError, Result};
use crate::usb::Link;
use crate::NXT_NAME_SIZE;

// see the LEGO MINDSTORMS NXT Bluetooth Developer Kit, appendix 1 and 2, for
// the command protocol; names follow the NXT firmware sources

/// Command type byte, first byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandType {
    Direct = 0x00,
    System = 0x01,
    Reply = 0x02,
    DirectNoReply = 0x80,
    SystemNoReply = 0x81,
}

/// Flag or'ed into the command type when the brick should not answer.
pub const REPLY_NOT_REQUIRED: u8 = 0x80;

/// Opcodes of the brick command protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    StartProgram = 0x00,
    StopProgram = 0x01,
    PlaySoundFile = 0x02,
    PlayTone = 0x03,
    SetOutState = 0x04,
    SetInMode = 0x05,
    GetOutState = 0x06,
    GetInVals = 0x07,
    ResetInVal = 0x08,
    MessageWrite = 0x09,
    ResetPosition = 0x0a,
    GetBattLvl = 0x0b,
    StopSound = 0x0c,
    KeepAlive = 0x0d,
    LsGetStatus = 0x0e,
    LsWrite = 0x0f,
    LsRead = 0x10,
    GetCurrProgram = 0x11,
    GetButtonState = 0x12,
    MessageRead = 0x13,
    DatalogRead = 0x19,
    DatalogSetTimes = 0x1a,
    BtGetContactCount = 0x1b,
    BtGetContactName = 0x1c,
    BtGetConnCount = 0x1d,
    BtGetConnName = 0x1e,
    SetProperty = 0x1f,
    GetProperty = 0x20,
    UpdateResetCount = 0x21,

    OpenRead = 0x80,
    OpenWrite = 0x81,
    Read = 0x82,
    Write = 0x83,
    Close = 0x84,
    Delete = 0x85,
    FindFirst = 0x86,
    FindNext = 0x87,
    Versions = 0x88,
    OpenWriteLinear = 0x89,
    OpenReadLinear = 0x8a,
    OpenWriteData = 0x8b,
    OpenAppendData = 0x8c,
    CropDataFile = 0x8d,
    FindFirstModule = 0x90,
    FindNextModule = 0x91,
    CloseModHandle = 0x92,
    IoMapRead = 0x94,
    IoMapWrite = 0x95,
    BootCmd = 0x97,
    SetBrickName = 0x98,
    BtGetAdr = 0x9a,
    DeviceInfo = 0x9b,
    DeleteUserFlash = 0xa0,
    PollCmdLen = 0xa1,
    PollCmd = 0xa2,
    RenameFile = 0xa3,
    BtFactoryReset = 0xa4,
}

impl Opcode {
    /// System commands live in the upper half of the opcode space.
    pub fn is_system(self) -> bool {
        (self as u8) & 0x80 != 0
    }
}

/// Status byte of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    NoErr = 0x00,
    CommPending = 0x20,
    MsgEmptyMailbox = 0x40,
    NoMoreHandles = 0x81,
    NoSpace = 0x82,
    NoMoreFiles = 0x83,
    EofExpected = 0x84,
    EndOfFile = 0x85,
    NotLinearFile = 0x86,
    FileNotFound = 0x87,
    HandleAlreadyClosed = 0x88,
    NoLinearSpace = 0x89,
    UndefinedError = 0x8a,
    FileIsBusy = 0x8b,
    NoWriteBuffers = 0x8c,
    AppendNotPossible = 0x8d,
    FileIsFull = 0x8e,
    FileExists = 0x8f,
    ModuleNotFound = 0x90,
    OutOfBoundary = 0x91,
    IllegalFileName = 0x92,
    IllegalHandle = 0x93,
    RcFailed = 0xbd,
    RcUnknownCmd = 0xbe,
    RcBadPacket = 0xbf,
    RcIllegalVal = 0xc0,
    CommBusErr = 0xdd,
    CommBufferFull = 0xde,
    CommChanInvalid = 0xdf,
    CommChanNotReady = 0xe0,
    NoProg = 0xec,
    InvalidSize = 0xed,
    InvalidQueue = 0xee,
    InvalidField = 0xef,
    InvalidPort = 0xf0,
    Mem = 0xfb,
    Arg = 0xff,
}

impl TryFrom<u8> for Status {
    type Error = ();

    fn try_from(x: u8) -> std::result::Result<Self, Self::Error> {
        use Status::*;
        Ok(match x {
            0x00 => NoErr,
            0x20 => CommPending,
            0x40 => MsgEmptyMailbox,
            0x81 => NoMoreHandles,
            0x82 => NoSpace,
            0x83 => NoMoreFiles,
            0x84 => EofExpected,
            0x85 => EndOfFile,
            0x86 => NotLinearFile,
            0x87 => FileNotFound,
            0x88 => HandleAlreadyClosed,
            0x89 => NoLinearSpace,
            0x8a => UndefinedError,
            0x8b => FileIsBusy,
            0x8c => NoWriteBuffers,
            0x8d => AppendNotPossible,
            0x8e => FileIsFull,
            0x8f => FileExists,
            0x90 => ModuleNotFound,
            0x91 => OutOfBoundary,
            0x92 => IllegalFileName,
            0x93 => IllegalHandle,
            0xbd => RcFailed,
            0xbe => RcUnknownCmd,
            0xbf => RcBadPacket,
            0xc0 => RcIllegalVal,
            0xdd => CommBusErr,
            0xde => CommBufferFull,
            0xdf => CommChanInvalid,
            0xe0 => CommChanNotReady,
            0xec => NoProg,
            0xed => InvalidSize,
            0xee => InvalidQueue,
            0xef => InvalidField,
            0xf0 => InvalidPort,
            0xfb => Mem,
            0xff => Arg,
            _ => return Err(()),
        })
    }
}

impl Status {
    pub fn message(self) -> &'static str {
        use Status::*;
        match self {
            NoErr => "Command status: no error",
            CommPending => "Command status: pending setup operation in progress",
            MsgEmptyMailbox => "Command status: specified mailbox contains no new messages",
            NoMoreHandles => "Command status: no more handles",
            NoSpace => "Command status: no space",
            NoMoreFiles => "Command status: no more files",
            EofExpected => "Command status: end of file expected",
            EndOfFile => "Command status: end of file",
            NotLinearFile => "Command status: not a linear file",
            FileNotFound => "Command status: file not found",
            HandleAlreadyClosed => "Command status: handle already closed",
            NoLinearSpace => "Command status: no linear space available",
            UndefinedError => "Command status: undefined error",
            FileIsBusy => "Command status: file is busy",
            NoWriteBuffers => "Command status: no write buffers",
            AppendNotPossible => "Command status: append not possible",
            FileIsFull => "Command status: file is full",
            FileExists => "Command status: file exists",
            ModuleNotFound => "Command status: module not found",
            OutOfBoundary => "Command status: out of boundary",
            IllegalFileName => "Command status: illegal file name",
            IllegalHandle => "Command status: illegal handle",
            RcFailed => "Command status: request failed (i.e. specified file not found)",
            RcUnknownCmd => "Command status: unknown command opcode",
            RcBadPacket => "Command status: clearly insane packet",
            RcIllegalVal => "Command status: data contains out-of-range values",
            CommBusErr => "Command status: something went wrong on the communications bus",
            CommBufferFull => "Command status: no room in comm buffer",
            CommChanInvalid => "Command status: specified channel/connection is not valid",
            CommChanNotReady => {
                "Command status: specified channel/connection not configured or busy"
            }
            NoProg => "Command status: no active program",
            InvalidSize => "Command status: illegal size specified",
            InvalidQueue => "Command status: illegal queue ID specified",
            InvalidField => "Command status: attempted to access invalid field of a structure",
            InvalidPort => "Command status: bad input or output port specified",
            Mem => "Command status: insufficient memory available",
            Arg => "Command status: bad arguments",
        }
    }
}

/// Human readable text for a status byte, known or not.
pub fn status_message(status: u8) -> &'static str {
    Status::try_from(status).map_or("Command status: unknown error", Status::message)
}

#[derive(Serialize, Debug, Clone)]
#[repr(C, packed)]
struct CommandHeader {
    kind: u8,
    opcode: u8,
}

#[derive(Deserialize, Debug, Clone)]
#[repr(C, packed)]
struct ReplyHeader {
    kind: u8,
    opcode: u8,
    status: u8,
}

const REPLY_HEADER_SIZE: usize = 3;

#[derive(Deserialize, Debug, Clone)]
struct DeviceInfoReply {
    name: [u8; NXT_NAME_SIZE],
    // 6 address bytes, the seventh is always 0
    bt_addr: [u8; 7],
    signal_strengths: [u8; 4],
    user_flash: u32,
}

const DEVICE_INFO_REPLY_SIZE: usize = REPLY_HEADER_SIZE + NXT_NAME_SIZE + 7 + 4 + 4;
const _: () = assert!(DEVICE_INFO_REPLY_SIZE == 33);

const BOOT_MAGIC: &[u8] = b"Let's dance: SAMBA\0";
const BOOT_ACK: &[u8] = b"Yes\0";

/// Answer to the DEVICE INFO system command.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Brick name.
    pub name: String,
    /// Bluetooth address, as `xx:xx:xx:xx:xx:xx`.
    pub serial: String,
    pub signal_strengths: [u8; 4],
    /// Free user flash, in bytes.
    pub user_flash: u32,
}

/// Builds a `[type][opcode][payload...]` frame.
pub fn command(kind: CommandType, opcode: Opcode, payload: &[u8]) -> Result<Vec<u8>> {
    let header = CommandHeader {
        kind: kind as u8,
        opcode: opcode as u8,
    };
    let mut frame = bincode::serialize(&header)?;
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Checks the reply header against the request and returns the payload.
///
/// The payload is only handed out when the status byte is zero.
pub fn parse_reply(reply: &[u8], opcode: Opcode) -> Result<&[u8]> {
    if reply.len() < REPLY_HEADER_SIZE {
        return Err(NxtError::Protocol);
    }
    let (header, payload) = reply.split_at(REPLY_HEADER_SIZE);
    let header: ReplyHeader = bincode::deserialize(header)?;

    if header.kind != CommandType::Reply as u8 || header.opcode != opcode as u8 {
        return Err(NxtError::Protocol);
    }
    if header.status != Status::NoErr as u8 {
        return Err(NxtError::Command(header.status));
    }
    Ok(payload)
}

// NUL terminated, printable up to the terminator
fn parse_string(field: &[u8]) -> Result<String> {
    for (i, &c) in field.iter().enumerate() {
        if c == 0 {
            return Ok(String::from_utf8_lossy(&field[..i]).into_owned());
        }
        if !(c == b' ' || c.is_ascii_graphic()) {
            return Err(NxtError::Protocol);
        }
    }
    Err(NxtError::Protocol)
}

fn parse_serial(addr: &[u8; 7]) -> String {
    addr[..6]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

fn transact<L: Link>(link: &mut L, opcode: Opcode, payload: &[u8], reply: &mut [u8]) -> Result<()> {
    let kind = if opcode.is_system() {
        CommandType::System
    } else {
        CommandType::Direct
    };
    link.send(&command(kind, opcode, payload)?)?;
    link.recv(reply)
}

/// Queries name, bluetooth address, signal strengths and free flash.
pub fn get_device_info<L: Link>(link: &mut L) -> Result<DeviceInfo> {
    let mut rsp = [0u8; DEVICE_INFO_REPLY_SIZE];
    transact(link, Opcode::DeviceInfo, &[], &mut rsp)?;

    let mut payload = parse_reply(&rsp, Opcode::DeviceInfo)?;
    let raw: DeviceInfoReply = bincode::deserialize_from(&mut payload)?;
    debug_assert!(payload.is_empty(), "device info reply not fully consumed");

    let DeviceInfoReply {
        name,
        bt_addr,
        signal_strengths,
        user_flash,
    } = raw;
    Ok(DeviceInfo {
        name: parse_string(&name)?,
        serial: parse_serial(&bt_addr),
        signal_strengths,
        user_flash,
    })
}

/// Asks LEGO firmware to reboot into the SAM-BA bootloader.
///
/// This erases the brick flash. Getting the user's consent is up to the
/// caller, as is waiting for the bootloader to show up on the bus.
pub fn boot<L: Link>(link: &mut L) -> Result<()> {
    let mut rsp = [0u8; REPLY_HEADER_SIZE + 4];
    transact(link, Opcode::BootCmd, BOOT_MAGIC, &mut rsp)?;

    if parse_reply(&rsp, Opcode::BootCmd)? != BOOT_ACK {
        return Err(NxtError::Protocol);
    }
    Ok(())
}
