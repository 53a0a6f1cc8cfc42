// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Wire format of firmware messages and their transport over an HTC endpoint.
//!
//! Every message starts with a 4 byte header naming the message and the vdev, followed by a
//! fixed-size body. Multi-byte fields are little endian.

use {
    crate::{command::CommandType, FwEvent, FwRequest, FwStatus, PeerStats, VdevId},
    anyhow::{format_err, Context as _, Error},
    log::{debug, info, warn},
    num_traits::FromPrimitive,
    std::mem::size_of,
    thiserror::Error,
    wlan_common::mac::{MacAddr, ReasonCode},
    wlan_htc::{
        control::{ConnectionFlags, ControlMessage, HTC_CONTROL_ENDPOINT},
        EndpointId, Htc, HtcError, SendStatus,
    },
    zerocopy::{
        byteorder::{LittleEndian, U16, U32},
        AsBytes, FromBytes, LayoutVerified, Unaligned,
    },
};

pub const FW_MSG_GET_PEER_STATS: u16 = 0x0001;
pub const FW_MSG_DISASSOC_REQ: u16 = 0x0002;
pub const FW_MSG_DEAUTH_REQ: u16 = 0x0003;
pub const FW_MSG_DISASSOC_CNF: u16 = 0x0004;
pub const FW_MSG_DEAUTH_CNF: u16 = 0x0005;
pub const FW_MSG_ROAM_SCAN_CONTROL: u16 = 0x0006;
pub const FW_MSG_OBSS_SCAN_IND: u16 = 0x0007;
pub const FW_MSG_ADD_TS: u16 = 0x0008;
pub const FW_MSG_DEL_TS: u16 = 0x0009;
pub const FW_MSG_SET_HW_MODE: u16 = 0x000A;
pub const FW_MSG_NSS_UPDATE: u16 = 0x000B;
pub const FW_MSG_SET_DUAL_MAC_CONFIG: u16 = 0x000C;
pub const FW_MSG_SET_ANTENNA_MODE: u16 = 0x000D;

// Messages from the target have the top bit set.
pub const FW_MSG_PEER_STATS: u16 = 0x8001;
pub const FW_MSG_DISASSOC_RSP: u16 = 0x8002;
pub const FW_MSG_DEAUTH_RSP: u16 = 0x8003;
pub const FW_MSG_DISASSOC_IND: u16 = 0x8004;
pub const FW_MSG_DEAUTH_IND: u16 = 0x8005;
pub const FW_MSG_DISCONNECT_DONE_IND: u16 = 0x8006;
pub const FW_MSG_SET_KEY_RSP: u16 = 0x8007;
pub const FW_MSG_COMMAND_RSP: u16 = 0x8008;

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum FwMsgError {
    #[error("buffer too short: expected {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("unknown firmware message id {0:#06x}")]
    UnknownMessageId(u16),
    #[error("unknown command type {0}")]
    UnknownCommandType(u8),
    #[error("parameter {0} out of range")]
    ParamOutOfRange(u32),
}

#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct FwMsgHdr {
    pub msg_id: U16<LittleEndian>,
    pub vdev_id: u8,
    pub reserved: u8,
}

/// Body of every message about a single peer.
#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct StationMsg {
    pub peer: MacAddr,
    pub bssid: MacAddr,
    pub reason_code: U16<LittleEndian>,
    pub status: U16<LittleEndian>,
}

#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct StatsReqMsg {
    pub request_id: U32<LittleEndian>,
    pub peer: MacAddr,
    pub reserved: U16<LittleEndian>,
}

#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct PeerStatsMsg {
    pub request_id: U32<LittleEndian>,
    pub peer: MacAddr,
    /// Two's complement dBm.
    pub rssi: u8,
    pub reserved: u8,
    pub tx_rate: U32<LittleEndian>,
    pub rx_rate: U32<LittleEndian>,
    pub rx_mc_bc_cnt: U32<LittleEndian>,
    pub rx_retry_cnt: U32<LittleEndian>,
}

#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct ParamMsg {
    pub param0: U32<LittleEndian>,
    pub param1: U32<LittleEndian>,
}

#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct CommandRspMsg {
    pub cmd_type: u8,
    pub reserved: u8,
    pub status: U16<LittleEndian>,
}

fn read_prefix<T: FromBytes + Unaligned + Copy>(bytes: &[u8]) -> Result<(T, &[u8]), FwMsgError> {
    LayoutVerified::<_, T>::new_unaligned_from_prefix(bytes)
        .map(|(msg, rest)| (*msg, rest))
        .ok_or(FwMsgError::TooShort { expected: size_of::<T>(), actual: bytes.len() })
}

fn read_body<T: FromBytes + Unaligned + Copy>(body: &[u8]) -> Result<T, FwMsgError> {
    read_prefix(body).map(|(msg, _)| msg)
}

fn write_msg<B: AsBytes>(buf: &mut Vec<u8>, msg_id: u16, vdev_id: VdevId, body: &B) {
    let hdr = FwMsgHdr { msg_id: U16::new(msg_id), vdev_id, reserved: 0 };
    buf.extend_from_slice(hdr.as_bytes());
    buf.extend_from_slice(body.as_bytes());
}

fn station(peer: MacAddr, bssid: MacAddr, reason_code: ReasonCode, status: FwStatus) -> StationMsg {
    StationMsg { peer, bssid, reason_code: U16::new(reason_code.0), status: U16::new(status.0) }
}

fn params(param0: u32, param1: u32) -> ParamMsg {
    ParamMsg { param0: U32::new(param0), param1: U32::new(param1) }
}

fn param_u8(param: U32<LittleEndian>) -> Result<u8, FwMsgError> {
    let value = param.get();
    u8::try_from(value).map_err(|_| FwMsgError::ParamOutOfRange(value))
}

const NO_ADDR: MacAddr = [0; 6];

impl FwRequest {
    pub fn vdev_id(&self) -> VdevId {
        match *self {
            FwRequest::GetPeerStats { vdev_id, .. }
            | FwRequest::DisassocReq { vdev_id, .. }
            | FwRequest::DeauthReq { vdev_id, .. }
            | FwRequest::DisassocCnf { vdev_id, .. }
            | FwRequest::DeauthCnf { vdev_id, .. }
            | FwRequest::RoamScanControl { vdev_id, .. }
            | FwRequest::ObssScanInd { vdev_id, .. }
            | FwRequest::AddTs { vdev_id, .. }
            | FwRequest::DelTs { vdev_id, .. }
            | FwRequest::SetHwMode { vdev_id, .. }
            | FwRequest::NssUpdate { vdev_id, .. }
            | FwRequest::SetDualMacConfig { vdev_id, .. }
            | FwRequest::SetAntennaMode { vdev_id, .. } => vdev_id,
        }
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        let vdev_id = self.vdev_id();
        match *self {
            FwRequest::GetPeerStats { request_id, peer, .. } => {
                let body =
                    StatsReqMsg { request_id: U32::new(request_id), peer, reserved: U16::new(0) };
                write_msg(buf, FW_MSG_GET_PEER_STATS, vdev_id, &body)
            }
            FwRequest::DisassocReq { peer, reason_code, .. } => write_msg(
                buf,
                FW_MSG_DISASSOC_REQ,
                vdev_id,
                &station(peer, NO_ADDR, reason_code, FwStatus::SUCCESS),
            ),
            FwRequest::DeauthReq { peer, reason_code, .. } => write_msg(
                buf,
                FW_MSG_DEAUTH_REQ,
                vdev_id,
                &station(peer, NO_ADDR, reason_code, FwStatus::SUCCESS),
            ),
            FwRequest::DisassocCnf { peer, status, .. } => write_msg(
                buf,
                FW_MSG_DISASSOC_CNF,
                vdev_id,
                &station(peer, NO_ADDR, ReasonCode(0), status),
            ),
            FwRequest::DeauthCnf { peer, status, .. } => write_msg(
                buf,
                FW_MSG_DEAUTH_CNF,
                vdev_id,
                &station(peer, NO_ADDR, ReasonCode(0), status),
            ),
            FwRequest::RoamScanControl { enable, .. } => {
                write_msg(buf, FW_MSG_ROAM_SCAN_CONTROL, vdev_id, &params(u32::from(enable), 0))
            }
            FwRequest::ObssScanInd { bssid, .. } => write_msg(
                buf,
                FW_MSG_OBSS_SCAN_IND,
                vdev_id,
                &station(NO_ADDR, bssid, ReasonCode(0), FwStatus::SUCCESS),
            ),
            FwRequest::AddTs { tsid, .. } => {
                write_msg(buf, FW_MSG_ADD_TS, vdev_id, &params(u32::from(tsid), 0))
            }
            FwRequest::DelTs { tsid, .. } => {
                write_msg(buf, FW_MSG_DEL_TS, vdev_id, &params(u32::from(tsid), 0))
            }
            FwRequest::SetHwMode { hw_mode_index, .. } => {
                write_msg(buf, FW_MSG_SET_HW_MODE, vdev_id, &params(hw_mode_index, 0))
            }
            FwRequest::NssUpdate { nss, .. } => {
                write_msg(buf, FW_MSG_NSS_UPDATE, vdev_id, &params(u32::from(nss), 0))
            }
            FwRequest::SetDualMacConfig { scan_config, fw_mode_config, .. } => write_msg(
                buf,
                FW_MSG_SET_DUAL_MAC_CONFIG,
                vdev_id,
                &params(scan_config, fw_mode_config),
            ),
            FwRequest::SetAntennaMode { num_rx_chains, num_tx_chains, .. } => write_msg(
                buf,
                FW_MSG_SET_ANTENNA_MODE,
                vdev_id,
                &params(u32::from(num_rx_chains), u32::from(num_tx_chains)),
            ),
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, FwMsgError> {
        let (hdr, body) = read_prefix::<FwMsgHdr>(bytes)?;
        let vdev_id = hdr.vdev_id;
        let req = match hdr.msg_id.get() {
            FW_MSG_GET_PEER_STATS => {
                let msg = read_body::<StatsReqMsg>(body)?;
                let request_id = msg.request_id.get();
                FwRequest::GetPeerStats { request_id, vdev_id, peer: msg.peer }
            }
            FW_MSG_DISASSOC_REQ => {
                let msg = read_body::<StationMsg>(body)?;
                FwRequest::DisassocReq {
                    vdev_id,
                    peer: msg.peer,
                    reason_code: ReasonCode(msg.reason_code.get()),
                }
            }
            FW_MSG_DEAUTH_REQ => {
                let msg = read_body::<StationMsg>(body)?;
                FwRequest::DeauthReq {
                    vdev_id,
                    peer: msg.peer,
                    reason_code: ReasonCode(msg.reason_code.get()),
                }
            }
            FW_MSG_DISASSOC_CNF => {
                let msg = read_body::<StationMsg>(body)?;
                let status = FwStatus(msg.status.get());
                FwRequest::DisassocCnf { vdev_id, peer: msg.peer, status }
            }
            FW_MSG_DEAUTH_CNF => {
                let msg = read_body::<StationMsg>(body)?;
                FwRequest::DeauthCnf { vdev_id, peer: msg.peer, status: FwStatus(msg.status.get()) }
            }
            FW_MSG_ROAM_SCAN_CONTROL => {
                let msg = read_body::<ParamMsg>(body)?;
                FwRequest::RoamScanControl { vdev_id, enable: msg.param0.get() != 0 }
            }
            FW_MSG_OBSS_SCAN_IND => {
                let msg = read_body::<StationMsg>(body)?;
                FwRequest::ObssScanInd { vdev_id, bssid: msg.bssid }
            }
            FW_MSG_ADD_TS => {
                let msg = read_body::<ParamMsg>(body)?;
                FwRequest::AddTs { vdev_id, tsid: param_u8(msg.param0)? }
            }
            FW_MSG_DEL_TS => {
                let msg = read_body::<ParamMsg>(body)?;
                FwRequest::DelTs { vdev_id, tsid: param_u8(msg.param0)? }
            }
            FW_MSG_SET_HW_MODE => {
                let msg = read_body::<ParamMsg>(body)?;
                FwRequest::SetHwMode { vdev_id, hw_mode_index: msg.param0.get() }
            }
            FW_MSG_NSS_UPDATE => {
                let msg = read_body::<ParamMsg>(body)?;
                FwRequest::NssUpdate { vdev_id, nss: param_u8(msg.param0)? }
            }
            FW_MSG_SET_DUAL_MAC_CONFIG => {
                let msg = read_body::<ParamMsg>(body)?;
                FwRequest::SetDualMacConfig {
                    vdev_id,
                    scan_config: msg.param0.get(),
                    fw_mode_config: msg.param1.get(),
                }
            }
            FW_MSG_SET_ANTENNA_MODE => {
                let msg = read_body::<ParamMsg>(body)?;
                FwRequest::SetAntennaMode {
                    vdev_id,
                    num_rx_chains: param_u8(msg.param0)?,
                    num_tx_chains: param_u8(msg.param1)?,
                }
            }
            other => return Err(FwMsgError::UnknownMessageId(other)),
        };
        Ok(req)
    }
}

impl FwEvent {
    pub fn vdev_id(&self) -> VdevId {
        match *self {
            FwEvent::PeerStats { vdev_id, .. }
            | FwEvent::DisassocRsp { vdev_id, .. }
            | FwEvent::DeauthRsp { vdev_id, .. }
            | FwEvent::DisassocInd { vdev_id, .. }
            | FwEvent::DeauthInd { vdev_id, .. }
            | FwEvent::DisconnectDoneInd { vdev_id, .. }
            | FwEvent::SetKeyRsp { vdev_id, .. }
            | FwEvent::CommandRsp { vdev_id, .. } => vdev_id,
        }
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        let vdev_id = self.vdev_id();
        match *self {
            FwEvent::PeerStats { request_id, peer, stats, .. } => {
                let body = PeerStatsMsg {
                    request_id: U32::new(request_id),
                    peer,
                    rssi: stats.rssi as u8,
                    reserved: 0,
                    tx_rate: U32::new(stats.tx_rate),
                    rx_rate: U32::new(stats.rx_rate),
                    rx_mc_bc_cnt: U32::new(stats.rx_mc_bc_cnt),
                    rx_retry_cnt: U32::new(stats.rx_retry_cnt),
                };
                write_msg(buf, FW_MSG_PEER_STATS, vdev_id, &body)
            }
            FwEvent::DisassocRsp { peer, status, .. } => write_msg(
                buf,
                FW_MSG_DISASSOC_RSP,
                vdev_id,
                &station(peer, NO_ADDR, ReasonCode(0), status),
            ),
            FwEvent::DeauthRsp { peer, status, .. } => write_msg(
                buf,
                FW_MSG_DEAUTH_RSP,
                vdev_id,
                &station(peer, NO_ADDR, ReasonCode(0), status),
            ),
            FwEvent::DisassocInd { peer, bssid, reason_code, .. } => write_msg(
                buf,
                FW_MSG_DISASSOC_IND,
                vdev_id,
                &station(peer, bssid, reason_code, FwStatus::SUCCESS),
            ),
            FwEvent::DeauthInd { peer, bssid, reason_code, .. } => write_msg(
                buf,
                FW_MSG_DEAUTH_IND,
                vdev_id,
                &station(peer, bssid, reason_code, FwStatus::SUCCESS),
            ),
            FwEvent::DisconnectDoneInd { peer, reason_code, .. } => write_msg(
                buf,
                FW_MSG_DISCONNECT_DONE_IND,
                vdev_id,
                &station(peer, NO_ADDR, reason_code, FwStatus::SUCCESS),
            ),
            FwEvent::SetKeyRsp { peer, status, .. } => write_msg(
                buf,
                FW_MSG_SET_KEY_RSP,
                vdev_id,
                &station(peer, NO_ADDR, ReasonCode(0), status),
            ),
            FwEvent::CommandRsp { cmd_type, status, .. } => {
                let body = CommandRspMsg {
                    cmd_type: cmd_type as u8,
                    reserved: 0,
                    status: U16::new(status.0),
                };
                write_msg(buf, FW_MSG_COMMAND_RSP, vdev_id, &body)
            }
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, FwMsgError> {
        let (hdr, body) = read_prefix::<FwMsgHdr>(bytes)?;
        let vdev_id = hdr.vdev_id;
        let event = match hdr.msg_id.get() {
            FW_MSG_PEER_STATS => {
                let msg = read_body::<PeerStatsMsg>(body)?;
                FwEvent::PeerStats {
                    request_id: msg.request_id.get(),
                    vdev_id,
                    peer: msg.peer,
                    stats: PeerStats {
                        rssi: msg.rssi as i8,
                        tx_rate: msg.tx_rate.get(),
                        rx_rate: msg.rx_rate.get(),
                        rx_mc_bc_cnt: msg.rx_mc_bc_cnt.get(),
                        rx_retry_cnt: msg.rx_retry_cnt.get(),
                    },
                }
            }
            FW_MSG_DISASSOC_RSP => {
                let msg = read_body::<StationMsg>(body)?;
                FwEvent::DisassocRsp { vdev_id, peer: msg.peer, status: FwStatus(msg.status.get()) }
            }
            FW_MSG_DEAUTH_RSP => {
                let msg = read_body::<StationMsg>(body)?;
                FwEvent::DeauthRsp { vdev_id, peer: msg.peer, status: FwStatus(msg.status.get()) }
            }
            FW_MSG_DISASSOC_IND => {
                let msg = read_body::<StationMsg>(body)?;
                FwEvent::DisassocInd {
                    vdev_id,
                    peer: msg.peer,
                    bssid: msg.bssid,
                    reason_code: ReasonCode(msg.reason_code.get()),
                }
            }
            FW_MSG_DEAUTH_IND => {
                let msg = read_body::<StationMsg>(body)?;
                FwEvent::DeauthInd {
                    vdev_id,
                    peer: msg.peer,
                    bssid: msg.bssid,
                    reason_code: ReasonCode(msg.reason_code.get()),
                }
            }
            FW_MSG_DISCONNECT_DONE_IND => {
                let msg = read_body::<StationMsg>(body)?;
                FwEvent::DisconnectDoneInd {
                    vdev_id,
                    peer: msg.peer,
                    reason_code: ReasonCode(msg.reason_code.get()),
                }
            }
            FW_MSG_SET_KEY_RSP => {
                let msg = read_body::<StationMsg>(body)?;
                FwEvent::SetKeyRsp { vdev_id, peer: msg.peer, status: FwStatus(msg.status.get()) }
            }
            FW_MSG_COMMAND_RSP => {
                let msg = read_body::<CommandRspMsg>(body)?;
                let cmd_type = CommandType::from_u8(msg.cmd_type)
                    .ok_or(FwMsgError::UnknownCommandType(msg.cmd_type))?;
                FwEvent::CommandRsp { vdev_id, cmd_type, status: FwStatus(msg.status.get()) }
            }
            other => return Err(FwMsgError::UnknownMessageId(other)),
        };
        Ok(event)
    }
}

/// Firmware messages carried on the HTC endpoint of one service. Drives the HTC handshake
/// for that service: connect once the target is ready, then complete setup.
pub struct FwLink {
    htc: Htc,
    service_id: u16,
    endpoint_id: Option<EndpointId>,
}

impl FwLink {
    pub fn new(htc: Htc, service_id: u16) -> Self {
        Self { htc, service_id, endpoint_id: None }
    }

    pub fn htc(&self) -> &Htc {
        &self.htc
    }

    /// The endpoint firmware messages travel on, once the service is connected.
    pub fn endpoint_id(&self) -> Option<EndpointId> {
        self.endpoint_id
    }

    pub fn send_request(&mut self, req: &FwRequest) -> Result<SendStatus, HtcError> {
        let endpoint_id = self.endpoint_id.ok_or(HtcError::NotReady)?;
        let mut buf = vec![];
        req.write(&mut buf);
        self.htc.send(endpoint_id, &buf[..])
    }

    /// Handles one frame from the target. Returns the firmware event it carries, if any.
    pub fn on_rx_frame(&mut self, bytes: &[u8]) -> Result<Option<FwEvent>, Error> {
        let rx = self.htc.process_rx(bytes).context("dropping malformed HTC frame")?;
        if rx.endpoint_id == HTC_CONTROL_ENDPOINT {
            let msg = ControlMessage::parse(&rx.payload[..])
                .context("dropping malformed HTC control message")?;
            self.on_control_message(&msg)?;
            return Ok(None);
        }
        if Some(rx.endpoint_id) != self.endpoint_id {
            debug!("ignoring frame for endpoint {}", rx.endpoint_id);
            return Ok(None);
        }
        if rx.payload.is_empty() {
            // Credit report only.
            return Ok(None);
        }
        let event = FwEvent::parse(&rx.payload[..])
            .map_err(|e| format_err!("dropping malformed firmware event: {}", e))?;
        Ok(Some(event))
    }

    fn on_control_message(&mut self, msg: &ControlMessage) -> Result<(), Error> {
        let endpoint_id = self.htc.on_control_message(msg)?;
        match msg {
            ControlMessage::Ready(_) => {
                self.endpoint_id = None;
                // Claim every credit the target offered; no other service shares the link.
                self.htc.connect_service(
                    self.service_id,
                    ConnectionFlags::from_bits(0),
                    false,
                    u32::MAX,
                )?;
            }
            ControlMessage::ConnectServiceResponse(resp) if resp.service_id == self.service_id => {
                self.endpoint_id = endpoint_id;
                info!("firmware messages on endpoint {:?}", endpoint_id);
                self.htc.setup_complete(None)?;
            }
            ControlMessage::ConnectServiceResponse(resp) => {
                warn!("connected unexpected service {:#06x}", resp.service_id)
            }
            _ => {}
        }
        Ok(())
    }
}
