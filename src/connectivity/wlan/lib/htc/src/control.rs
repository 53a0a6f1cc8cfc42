// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{error::FrameError, frame::EndpointId},
    bitfield::bitfield,
    num_derive::{FromPrimitive, ToPrimitive},
    num_traits::FromPrimitive,
    std::mem::size_of,
    zerocopy::{
        byteorder::{LittleEndian, U16, U32},
        AsBytes, FromBytes, LayoutVerified, Unaligned,
    },
};

/// Control messages always travel on endpoint 0.
pub const HTC_CONTROL_ENDPOINT: EndpointId = 0;

pub const HTC_MSG_READY_ID: u16 = 1;
pub const HTC_MSG_CONNECT_SERVICE_ID: u16 = 2;
pub const HTC_MSG_CONNECT_SERVICE_RESPONSE_ID: u16 = 3;
pub const HTC_MSG_SETUP_COMPLETE_ID: u16 = 4;
pub const HTC_MSG_SETUP_COMPLETE_EX_ID: u16 = 5;
pub const HTC_MSG_SEND_SUSPEND_COMPLETE: u16 = 6;
pub const HTC_MSG_NACK_SUSPEND: u16 = 7;
pub const HTC_MSG_WAKEUP_FROM_SUSPEND_ID: u16 = 8;

pub const HTC_MAX_CONTROL_MESSAGE_LENGTH: usize = 256;
pub const HTC_SERVICE_META_DATA_MAX_LENGTH: usize = 128;

pub const HTC_VERSION_2P0: u8 = 0x00;
pub const HTC_VERSION_2P1: u8 = 0x01;

// Service ids are (group << 8) | index.
pub const HTC_CTRL_RSVD_SVC: u16 = 0x0001;
pub const WMI_CONTROL_SVC: u16 = 0x0100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum ConnectStatus {
    Success = 0,
    NotFound = 1,
    Failed = 2,
    NoResources = 3,
    NoMoreEndpoints = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum CreditThreshold {
    OneFourth = 0,
    OneHalf = 1,
    ThreeFourths = 2,
    Unity = 3,
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct ConnectionFlags(u16);
    impl Debug;
    pub u8, threshold_level, set_threshold_level: 1, 0;
    pub bool, reduce_credit_dribble, set_reduce_credit_dribble: 2;
    pub bool, disable_credit_flow_ctrl, set_disable_credit_flow_ctrl: 3;
    pub bool, enable_htc_schedule, set_enable_htc_schedule: 4;
    pub u8, recv_alloc, set_recv_alloc: 15, 8;
}

impl ConnectionFlags {
    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn credit_threshold(&self) -> CreditThreshold {
        // Two bits always map onto one of the four levels.
        CreditThreshold::from_u8(self.threshold_level()).unwrap_or(CreditThreshold::OneFourth)
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct SetupFlags(u32);
    impl Debug;
    pub bool, enable_bundle_recv, set_enable_bundle_recv: 0;
    pub bool, disable_tx_credit_flow, set_disable_tx_credit_flow: 1;
}

impl SetupFlags {
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct UnknownMsg {
    pub message_id: U16<LittleEndian>,
    pub reserved: U16<LittleEndian>,
}

#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct ReadyMsg {
    pub message_id: U16<LittleEndian>,
    pub credit_count: U16<LittleEndian>,
    pub credit_size: U16<LittleEndian>,
    pub max_endpoints: u8,
    pub pad: u8,
}

#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct ReadyExMsg {
    pub version_2_0_info: ReadyMsg,
    pub htc_version: u8,
    pub max_msgs_per_htc_bundle: u8,
    /// Bits 11:0 hold the alternate data credit size, bits 15:12 are reserved.
    pub alt_data_credit_size: U16<LittleEndian>,
}

#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct ConnectServiceMsg {
    pub message_id: U16<LittleEndian>,
    pub service_id: U16<LittleEndian>,
    pub connection_flags: U16<LittleEndian>,
    pub service_meta_length: u8,
    /// Bit 0 is set when the host supports the v2 lookahead report.
    pub lookahead_flags: u8,
}

#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct ConnectServiceResponseMsg {
    pub message_id: U16<LittleEndian>,
    pub service_id: U16<LittleEndian>,
    pub status: u8,
    pub endpoint_id: u8,
    pub max_msg_size: U16<LittleEndian>,
    pub service_meta_length: u8,
    /// Bit 0 is set when the target supports the v2 lookahead report.
    pub lookahead_flags: u8,
    pub reserved: U16<LittleEndian>,
}

#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct SetupCompleteExMsg {
    pub message_id: U16<LittleEndian>,
    pub reserved: U16<LittleEndian>,
    pub setup_flags: U32<LittleEndian>,
    pub max_msgs_per_bundled_recv: u8,
    pub reserved2: [u8; 3],
}

const LOOKAHEAD_V2_BIT: u8 = 1 << 0;
const ALT_DATA_CREDIT_SIZE_MASK: u16 = 0x0FFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ready {
    pub credit_count: u16,
    pub credit_size: u16,
    pub max_endpoints: u8,
    /// Present when the target speaks the extended ready message.
    pub ext: Option<ReadyExt>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadyExt {
    pub htc_version: u8,
    pub max_msgs_per_htc_bundle: u8,
    pub alt_data_credit_size: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectService {
    pub service_id: u16,
    pub connection_flags: ConnectionFlags,
    pub lookahead_v2: bool,
    pub meta: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectServiceResponse {
    pub service_id: u16,
    pub status: u8,
    pub endpoint_id: EndpointId,
    pub max_msg_size: u16,
    pub lookahead_v2: bool,
    pub meta: Vec<u8>,
}

impl ConnectServiceResponse {
    /// Unknown status codes read as `Failed`.
    pub fn status(&self) -> ConnectStatus {
        ConnectStatus::from_u8(self.status).unwrap_or(ConnectStatus::Failed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetupCompleteEx {
    pub setup_flags: SetupFlags,
    pub max_msgs_per_bundled_recv: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlMessage {
    Ready(Ready),
    ConnectService(ConnectService),
    ConnectServiceResponse(ConnectServiceResponse),
    SetupComplete,
    SetupCompleteEx(SetupCompleteEx),
    SendSuspendComplete,
    NackSuspend,
    WakeupFromSuspend,
}

fn read_prefix<T: FromBytes + Unaligned + Copy>(bytes: &[u8]) -> Result<(T, &[u8]), FrameError> {
    LayoutVerified::<_, T>::new_unaligned_from_prefix(bytes)
        .map(|(msg, rest)| (*msg, rest))
        .ok_or(FrameError::TooShort { expected: size_of::<T>(), actual: bytes.len() })
}

fn read_meta(rest: &[u8], meta_len: u8) -> Result<Vec<u8>, FrameError> {
    let meta_len = usize::from(meta_len);
    if meta_len > HTC_SERVICE_META_DATA_MAX_LENGTH {
        return Err(FrameError::TooLong { len: meta_len, max: HTC_SERVICE_META_DATA_MAX_LENGTH });
    }
    rest.get(..meta_len)
        .map(|meta| meta.to_vec())
        .ok_or(FrameError::TooShort { expected: meta_len, actual: rest.len() })
}

fn check_meta(meta: &[u8]) -> Result<u8, FrameError> {
    if meta.len() > HTC_SERVICE_META_DATA_MAX_LENGTH {
        return Err(FrameError::TooLong { len: meta.len(), max: HTC_SERVICE_META_DATA_MAX_LENGTH });
    }
    Ok(meta.len() as u8)
}

impl ControlMessage {
    pub fn message_id(&self) -> u16 {
        match self {
            ControlMessage::Ready(_) => HTC_MSG_READY_ID,
            ControlMessage::ConnectService(_) => HTC_MSG_CONNECT_SERVICE_ID,
            ControlMessage::ConnectServiceResponse(_) => HTC_MSG_CONNECT_SERVICE_RESPONSE_ID,
            ControlMessage::SetupComplete => HTC_MSG_SETUP_COMPLETE_ID,
            ControlMessage::SetupCompleteEx(_) => HTC_MSG_SETUP_COMPLETE_EX_ID,
            ControlMessage::SendSuspendComplete => HTC_MSG_SEND_SUSPEND_COMPLETE,
            ControlMessage::NackSuspend => HTC_MSG_NACK_SUSPEND,
            ControlMessage::WakeupFromSuspend => HTC_MSG_WAKEUP_FROM_SUSPEND_ID,
        }
    }

    /// Parses the payload of a frame received on the control endpoint.
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() > HTC_MAX_CONTROL_MESSAGE_LENGTH {
            return Err(FrameError::TooLong {
                len: bytes.len(),
                max: HTC_MAX_CONTROL_MESSAGE_LENGTH,
            });
        }
        let message_id = match bytes {
            [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
            _ => return Err(FrameError::TooShort { expected: 2, actual: bytes.len() }),
        };
        match message_id {
            HTC_MSG_READY_ID => {
                if bytes.len() >= size_of::<ReadyExMsg>() {
                    let (msg, _) = read_prefix::<ReadyExMsg>(bytes)?;
                    let mut ready = ready_from_msg(&msg.version_2_0_info);
                    ready.ext = Some(ReadyExt {
                        htc_version: msg.htc_version,
                        max_msgs_per_htc_bundle: msg.max_msgs_per_htc_bundle,
                        alt_data_credit_size: msg.alt_data_credit_size.get()
                            & ALT_DATA_CREDIT_SIZE_MASK,
                    });
                    Ok(ControlMessage::Ready(ready))
                } else {
                    let (msg, _) = read_prefix::<ReadyMsg>(bytes)?;
                    Ok(ControlMessage::Ready(ready_from_msg(&msg)))
                }
            }
            HTC_MSG_CONNECT_SERVICE_ID => {
                let (msg, rest) = read_prefix::<ConnectServiceMsg>(bytes)?;
                Ok(ControlMessage::ConnectService(ConnectService {
                    service_id: msg.service_id.get(),
                    connection_flags: ConnectionFlags::from_bits(msg.connection_flags.get()),
                    lookahead_v2: msg.lookahead_flags & LOOKAHEAD_V2_BIT != 0,
                    meta: read_meta(rest, msg.service_meta_length)?,
                }))
            }
            HTC_MSG_CONNECT_SERVICE_RESPONSE_ID => {
                let (msg, rest) = read_prefix::<ConnectServiceResponseMsg>(bytes)?;
                Ok(ControlMessage::ConnectServiceResponse(ConnectServiceResponse {
                    service_id: msg.service_id.get(),
                    status: msg.status,
                    endpoint_id: msg.endpoint_id,
                    max_msg_size: msg.max_msg_size.get(),
                    lookahead_v2: msg.lookahead_flags & LOOKAHEAD_V2_BIT != 0,
                    meta: read_meta(rest, msg.service_meta_length)?,
                }))
            }
            HTC_MSG_SETUP_COMPLETE_ID => {
                read_prefix::<UnknownMsg>(bytes)?;
                Ok(ControlMessage::SetupComplete)
            }
            HTC_MSG_SETUP_COMPLETE_EX_ID => {
                let (msg, _) = read_prefix::<SetupCompleteExMsg>(bytes)?;
                Ok(ControlMessage::SetupCompleteEx(SetupCompleteEx {
                    setup_flags: SetupFlags::from_bits(msg.setup_flags.get()),
                    max_msgs_per_bundled_recv: msg.max_msgs_per_bundled_recv,
                }))
            }
            HTC_MSG_SEND_SUSPEND_COMPLETE => Ok(ControlMessage::SendSuspendComplete),
            HTC_MSG_NACK_SUSPEND => Ok(ControlMessage::NackSuspend),
            HTC_MSG_WAKEUP_FROM_SUSPEND_ID => Ok(ControlMessage::WakeupFromSuspend),
            other => Err(FrameError::UnknownMessageId(other)),
        }
    }

    /// Appends the wire form of the message to `buf`.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<(), FrameError> {
        let start = buf.len();
        let message_id = U16::new(self.message_id());
        match self {
            ControlMessage::Ready(ready) => {
                let version_2_0_info = ReadyMsg {
                    message_id,
                    credit_count: U16::new(ready.credit_count),
                    credit_size: U16::new(ready.credit_size),
                    max_endpoints: ready.max_endpoints,
                    pad: 0,
                };
                match ready.ext {
                    Some(ext) => buf.extend_from_slice(
                        ReadyExMsg {
                            version_2_0_info,
                            htc_version: ext.htc_version,
                            max_msgs_per_htc_bundle: ext.max_msgs_per_htc_bundle,
                            alt_data_credit_size: U16::new(
                                ext.alt_data_credit_size & ALT_DATA_CREDIT_SIZE_MASK,
                            ),
                        }
                        .as_bytes(),
                    ),
                    None => buf.extend_from_slice(version_2_0_info.as_bytes()),
                }
            }
            ControlMessage::ConnectService(req) => {
                let msg = ConnectServiceMsg {
                    message_id,
                    service_id: U16::new(req.service_id),
                    connection_flags: U16::new(req.connection_flags.bits()),
                    service_meta_length: check_meta(&req.meta[..])?,
                    lookahead_flags: if req.lookahead_v2 { LOOKAHEAD_V2_BIT } else { 0 },
                };
                buf.extend_from_slice(msg.as_bytes());
                buf.extend_from_slice(&req.meta[..]);
            }
            ControlMessage::ConnectServiceResponse(resp) => {
                let msg = ConnectServiceResponseMsg {
                    message_id,
                    service_id: U16::new(resp.service_id),
                    status: resp.status,
                    endpoint_id: resp.endpoint_id,
                    max_msg_size: U16::new(resp.max_msg_size),
                    service_meta_length: check_meta(&resp.meta[..])?,
                    lookahead_flags: if resp.lookahead_v2 { LOOKAHEAD_V2_BIT } else { 0 },
                    reserved: U16::new(0),
                };
                buf.extend_from_slice(msg.as_bytes());
                buf.extend_from_slice(&resp.meta[..]);
            }
            ControlMessage::SetupCompleteEx(setup) => {
                let msg = SetupCompleteExMsg {
                    message_id,
                    reserved: U16::new(0),
                    setup_flags: U32::new(setup.setup_flags.bits()),
                    max_msgs_per_bundled_recv: setup.max_msgs_per_bundled_recv,
                    reserved2: [0; 3],
                };
                buf.extend_from_slice(msg.as_bytes());
            }
            ControlMessage::SetupComplete
            | ControlMessage::SendSuspendComplete
            | ControlMessage::NackSuspend
            | ControlMessage::WakeupFromSuspend => {
                buf.extend_from_slice(UnknownMsg { message_id, reserved: U16::new(0) }.as_bytes());
            }
        }
        debug_assert!(buf.len() - start <= HTC_MAX_CONTROL_MESSAGE_LENGTH);
        Ok(())
    }
}

fn ready_from_msg(msg: &ReadyMsg) -> Ready {
    Ready {
        credit_count: msg.credit_count.get(),
        credit_size: msg.credit_size.get(),
        max_endpoints: msg.max_endpoints,
        ext: None,
    }
}
