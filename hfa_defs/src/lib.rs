// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Hardware definitions for the HFA (host fabric adapter) link-negotiation
//! and user-context interrupt core: status register identifiers, the frames
//! exchanged with the link partner during negotiation, and the partition-key,
//! freeze-reason, and user-event vocabulary shared with the rest of the
//! driver stack.

use bitfield_struct::bitfield;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Maximum number of logical sub-contexts that may share one hardware
/// receive context.
pub const MAX_SHARED_CTXTS: u16 = 16;

/// Number of entries in a port's partition-key table.
pub const PKEY_TABLE_SIZE: usize = 16;

/// Partition-key table index of the default key.
pub const DEFAULT_PKEY_IDX: usize = 0;
/// Partition-key table index of the limited management key.
pub const LIM_MGMT_PKEY_IDX: usize = 1;
/// Partition-key table index of the full management key. This slot is only
/// ever empty or [`FULL_MGMT_PKEY`].
pub const FULL_MGMT_PKEY_IDX: usize = 2;

/// The limited management partition key.
pub const LIM_MGMT_PKEY: u16 = 0x7fff;
/// The full management partition key, installed only when the link partner
/// allows this port to act as fabric manager.
pub const FULL_MGMT_PKEY: u16 = 0xffff;
/// Default partition key programmed in slot 0 at port bring-up.
pub const DEFAULT_PKEY: u16 = LIM_MGMT_PKEY;

/// Identifies a read-only link-partner status register, populated by the
/// link-training peer once negotiation completes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StatusReg(pub u16);

impl StatusReg {
    /// Node GUID of the link partner.
    pub const REMOTE_GUID: Self = Self(0x50);
    /// Node type of the link partner, see [`RemoteNodeTypeReg`].
    pub const REMOTE_NODE_TYPE: Self = Self(0x58);
    /// Port number on the link partner, see [`RemotePortReg`].
    pub const REMOTE_PORT_NUMBER: Self = Self(0x60);
    /// Fabric-manager security posture of the link partner, see
    /// [`RemoteFmSecurityReg`].
    pub const REMOTE_FM_SECURITY: Self = Self(0x68);
}

/// Identifies a configuration frame exchanged with the link partner during
/// link negotiation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConfigField(pub u8);

impl ConfigField {
    /// General link configuration advertised by the partner, see
    /// [`RemoteLniInfo`].
    pub const REMOTE_LNI_INFO: Self = Self(0x09);
    /// The partner's fabric credit parameters, see [`RemoteFabricFrame`].
    pub const VERIFY_CAP_REMOTE_FABRIC: Self = Self(0x0a);
    /// The partner's supported link widths.
    pub const VERIFY_CAP_REMOTE_LINK_WIDTH: Self = Self(0x0b);
}

/// Node type of a link partner.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NodeType(pub u8);

impl NodeType {
    /// A peer host adapter, i.e. a direct host-to-host link.
    pub const ADAPTER: Self = Self(0);
    /// A fabric switch.
    pub const SWITCH: Self = Self(1);
}

#[bitfield(u64)]
pub struct RemoteNodeTypeReg {
    #[bits(2)]
    pub node_type: u8,
    #[bits(62)]
    pub reserved: u64,
}

#[bitfield(u64)]
pub struct RemotePortReg {
    pub port: u8,
    #[bits(56)]
    pub reserved: u64,
}

#[bitfield(u64)]
pub struct RemoteFmSecurityReg {
    /// Set when the partner has fabric-manager security checks disabled.
    pub security_disabled: bool,
    #[bits(63)]
    pub reserved: u64,
}

/// General link configuration frame exchanged during negotiation.
#[bitfield(u32)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct RemoteLniInfo {
    #[bits(23)]
    pub reserved: u32,
    /// The partner permits this port to act as a fabric manager.
    pub mgmt_allowed: bool,
    pub reserved2: u8,
}

/// Fabric credit parameters advertised by the link partner in the
/// verify-capability exchange.
#[bitfield(u32)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct RemoteFabricFrame {
    /// Allocation unit for credit accounting.
    #[bits(3)]
    pub vau: u8,
    pub z: bool,
    /// Credit-return unit.
    #[bits(3)]
    pub vcu: u8,
    /// Initial credit allocation for virtual lane 15.
    #[bits(12)]
    pub vl15_init: u16,
    #[bits(13)]
    pub reserved: u16,
}

/// Active link widths, only valid once the link is fully up.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkWidths {
    /// Transmit width, a mask of `LINK_WIDTH_*` bits.
    pub tx: u16,
    /// Receive width, a mask of `LINK_WIDTH_*` bits.
    pub rx: u16,
}

pub const LINK_WIDTH_1X: u16 = 0x1;
pub const LINK_WIDTH_2X: u16 = 0x2;
pub const LINK_WIDTH_3X: u16 = 0x4;
pub const LINK_WIDTH_4X: u16 = 0x8;

/// Freeze was initiated by the driver rather than the hardware.
pub const FREEZE_SELF: u32 = 0x1;
/// Abort a freeze already in progress.
pub const FREEZE_ABORT: u32 = 0x2;
/// Freeze was caused by the physical link going down.
pub const FREEZE_LINK_DOWN: u32 = 0x10;

/// User-visible event bit: the physical link went down.
pub const UEVENT_LINKDOWN: u64 = 1 << 0;
/// User-visible event bit: the device went through freeze recovery.
pub const UEVENT_FROZEN: u64 = 1 << 1;

/// Reason a port is offline, cleared to [`LinkDownReason::NONE`] when the
/// link is healthy.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LinkDownReason(pub u8);

impl LinkDownReason {
    /// The link is not down.
    pub const NONE: Self = Self(0);
    /// The link bounced and is expected to recover.
    pub const TRANSIENT: Self = Self(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lni_info_mgmt_allowed_bit() {
        let frame = RemoteLniInfo::from(1 << 23);
        assert!(frame.mgmt_allowed());
        let frame = RemoteLniInfo::from(!(1u32 << 23));
        assert!(!frame.mgmt_allowed());
    }

    #[test]
    fn remote_fabric_frame_fields() {
        let frame = RemoteFabricFrame::new()
            .with_vau(3)
            .with_vcu(2)
            .with_vl15_init(1984);
        let raw: u32 = frame.into();
        let frame = RemoteFabricFrame::from(raw);
        assert_eq!(frame.vau(), 3);
        assert_eq!(frame.vcu(), 2);
        assert_eq!(frame.vl15_init(), 1984);
        assert!(!frame.z());
    }
}
