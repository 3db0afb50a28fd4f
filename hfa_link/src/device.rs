// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-device, per-port, and per-user-context state.

use crate::hal::LinkHardware;
use hfa_defs::LinkDownReason;
use hfa_defs::LinkWidths;
use hfa_defs::NodeType;
use hfa_defs::DEFAULT_PKEY;
use hfa_defs::DEFAULT_PKEY_IDX;
use hfa_defs::LIM_MGMT_PKEY;
use hfa_defs::LIM_MGMT_PKEY_IDX;
use hfa_defs::MAX_SHARED_CTXTS;
use hfa_defs::PKEY_TABLE_SIZE;
use parking_lot::Condvar;
use parking_lot::Mutex;
use parking_lot::RwLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU16;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use thiserror::Error;

/// Event flag: a consumer is blocked waiting for receive data.
pub const CTXT_WAITING_RCV: u32 = 1 << 0;
/// Event flag: a consumer is blocked waiting for an urgent condition.
pub const CTXT_WAITING_URG: u32 = 1 << 1;

/// Construction parameters for a [`Device`].
pub struct DeviceParams {
    /// Unit number identifying this adapter to upstream consumers.
    pub unit: u32,
    /// 1-based physical port number.
    pub port: u8,
    /// Skip the interrupt-driven verify-capability handshake and move
    /// directly to link up, synthesizing the negotiated values locally.
    pub quick_linkup: bool,
    /// What kind of silicon (or simulation of it) this device is.
    pub icode: Icode,
    /// This side's credit allocation unit, used as the remote value when the
    /// handshake is elided.
    pub vau: u8,
    /// This side's credit-return unit, likewise.
    pub vcu: u8,
    /// This side's initial virtual-lane-15 credit allocation, likewise.
    pub vl15_init: u16,
}

impl Default for DeviceParams {
    fn default() -> Self {
        Self {
            unit: 0,
            port: 1,
            quick_linkup: false,
            icode: Icode::Silicon,
            vau: 3,
            vcu: 0,
            vl15_init: 1984,
        }
    }
}

/// The implementation the device reports in its revision register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Icode {
    /// Production silicon.
    Silicon,
    /// FPGA emulation of the silicon.
    FpgaEmulation,
    /// Functional simulator, which elides link training entirely.
    FunctionalSimulator,
}

/// Kinds of events forwarded to the upstream fabric subsystem.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PortEventKind {
    /// The port encountered an error, e.g. the physical link went down.
    PortError,
    /// The port became active.
    PortActive,
}

/// An event forwarded to the upstream fabric subsystem.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PortEvent {
    /// Unit number of the originating device.
    pub unit: u32,
    /// 1-based port number.
    pub port: u8,
    /// What happened.
    pub kind: PortEventKind,
}

/// The upstream event consumer, e.g. the fabric/verbs subsystem.
///
/// Registering a listener is what marks the device's upstream registration
/// as complete; until then all events are dropped.
pub trait FabricListener: Send + Sync {
    /// Called on a port state change. Must tolerate spurious calls and must
    /// not block indefinitely.
    fn port_event(&self, event: PortEvent);

    /// Called after the partition-key table of `port` changed. Listeners
    /// distinguish a change on a still-down port from one on a live port by
    /// reading the port's link state.
    fn pkey_change(&self, unit: u32, port: u8);
}

/// One HFA device instance, generic over its hardware backend.
pub struct Device<T: LinkHardware> {
    pub(crate) hw: T,
    pub(crate) params: DeviceParams,
    pub(crate) listener: RwLock<Option<Arc<dyn FabricListener>>>,
    /// Guards the in-use bitmaps, event flags, and urgent counters of all
    /// user contexts on this device. Stands in for the interrupt-disabling
    /// spinlock of the hardware interrupt path: the dispatcher and the
    /// consumer wait path both hold it around every flag transition.
    pub(crate) uctxt_lock: Mutex<()>,
    pub(crate) port: Port,
}

impl<T: LinkHardware> Device<T> {
    /// Creates a device over `hw`.
    pub fn new(hw: T, params: DeviceParams) -> Self {
        let port = Port::new(params.port);
        Self {
            hw,
            params,
            listener: RwLock::new(None),
            uctxt_lock: Mutex::new(()),
            port,
        }
    }

    /// The device's physical port.
    pub fn port(&self) -> &Port {
        &self.port
    }

    /// Registers the upstream event consumer, completing upstream
    /// registration. Events raised before this point are dropped.
    pub fn register_listener(&self, listener: Arc<dyn FabricListener>) {
        *self.listener.write() = Some(listener);
    }
}

/// One physical link endpoint.
///
/// All fields are written by the link state controller only, which is
/// invoked serially per port; atomics publish them to concurrent readers.
pub struct Port {
    pub(crate) number: u8,
    pub(crate) linkup: AtomicBool,
    pub(crate) neighbor_guid: AtomicU64,
    pub(crate) neighbor_type: AtomicU8,
    pub(crate) neighbor_port_number: AtomicU8,
    pub(crate) neighbor_fm_security: AtomicBool,
    pub(crate) neighbor_normal: AtomicBool,
    pub(crate) mgmt_allowed: AtomicBool,
    pub(crate) offline_disabled_reason: AtomicU8,
    pub(crate) actual_vls_operational: AtomicU8,
    pub(crate) link_width_tx_active: AtomicU16,
    pub(crate) link_width_rx_active: AtomicU16,
    pub(crate) uevent_flags: AtomicU64,
    pub(crate) pkeys: Mutex<[u16; PKEY_TABLE_SIZE]>,
}

impl Port {
    fn new(number: u8) -> Self {
        let mut pkeys = [0; PKEY_TABLE_SIZE];
        pkeys[DEFAULT_PKEY_IDX] = DEFAULT_PKEY;
        pkeys[LIM_MGMT_PKEY_IDX] = LIM_MGMT_PKEY;
        Self {
            number,
            linkup: AtomicBool::new(false),
            neighbor_guid: AtomicU64::new(0),
            neighbor_type: AtomicU8::new(0),
            neighbor_port_number: AtomicU8::new(0),
            neighbor_fm_security: AtomicBool::new(false),
            neighbor_normal: AtomicBool::new(false),
            mgmt_allowed: AtomicBool::new(false),
            offline_disabled_reason: AtomicU8::new(LinkDownReason::TRANSIENT.0),
            actual_vls_operational: AtomicU8::new(0),
            link_width_tx_active: AtomicU16::new(0),
            link_width_rx_active: AtomicU16::new(0),
            uevent_flags: AtomicU64::new(0),
            pkeys: Mutex::new(pkeys),
        }
    }

    /// 1-based port number.
    pub fn number(&self) -> u8 {
        self.number
    }

    /// Whether the physical link is up.
    ///
    /// Acquire-ordered against the link-up transition: when this reads
    /// `true`, the management partition key (if any) is already in hardware.
    pub fn linkup(&self) -> bool {
        self.linkup.load(Ordering::Acquire)
    }

    /// GUID of the link partner.
    pub fn neighbor_guid(&self) -> u64 {
        self.neighbor_guid.load(Ordering::Relaxed)
    }

    /// Node type of the link partner.
    pub fn neighbor_type(&self) -> NodeType {
        NodeType(self.neighbor_type.load(Ordering::Relaxed))
    }

    /// Port number on the link partner.
    pub fn neighbor_port_number(&self) -> u8 {
        self.neighbor_port_number.load(Ordering::Relaxed)
    }

    /// Whether the partner has fabric-manager security checks disabled.
    pub fn neighbor_fm_security(&self) -> bool {
        self.neighbor_fm_security.load(Ordering::Relaxed)
    }

    /// Whether the neighbor is considered healthy.
    pub fn neighbor_normal(&self) -> bool {
        self.neighbor_normal.load(Ordering::Relaxed)
    }

    /// Whether the partner permits this port to act as fabric manager.
    pub fn mgmt_allowed(&self) -> bool {
        self.mgmt_allowed.load(Ordering::Relaxed)
    }

    /// Why the port is offline.
    pub fn offline_disabled_reason(&self) -> LinkDownReason {
        LinkDownReason(self.offline_disabled_reason.load(Ordering::Relaxed))
    }

    /// Count of currently operational virtual lanes.
    pub fn actual_vls_operational(&self) -> u8 {
        self.actual_vls_operational.load(Ordering::Relaxed)
    }

    /// Active link widths, recorded at the last link-up transition.
    pub fn link_widths(&self) -> LinkWidths {
        LinkWidths {
            tx: self.link_width_tx_active.load(Ordering::Relaxed),
            rx: self.link_width_rx_active.load(Ordering::Relaxed),
        }
    }

    /// A snapshot of the partition-key table.
    pub fn pkeys(&self) -> [u16; PKEY_TABLE_SIZE] {
        *self.pkeys.lock()
    }

    /// User-visible event bits, a mask of `UEVENT_*`.
    pub fn uevents(&self) -> u64 {
        self.uevent_flags.load(Ordering::Relaxed)
    }

    /// Clears and returns the user-visible event bits, modeling the
    /// user-space acknowledgment read.
    pub fn clear_uevents(&self) -> u64 {
        self.uevent_flags.swap(0, Ordering::Relaxed)
    }
}

/// One shared hardware receive context, referenced by up to
/// [`MAX_SHARED_CTXTS`] logical consumers.
pub struct UserContext {
    pub(crate) index: u16,
    pub(crate) in_use: AtomicU64,
    pub(crate) event_flags: AtomicU32,
    pub(crate) urgent: AtomicU32,
    pub(crate) wait: Condvar,
}

impl UserContext {
    /// Creates the state for hardware receive context `index`.
    pub fn new(index: u16) -> Self {
        Self {
            index,
            in_use: AtomicU64::new(0),
            event_flags: AtomicU32::new(0),
            urgent: AtomicU32::new(0),
            wait: Condvar::new(),
        }
    }

    /// The hardware receive context number.
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Whether any logical sub-context is currently in use.
    pub fn in_use(&self) -> bool {
        self.in_use.load(Ordering::Relaxed) != 0
    }

    /// Number of urgent events dispatched so far.
    pub fn urgent_count(&self) -> u32 {
        self.urgent.load(Ordering::Relaxed)
    }
}

/// Sub-context bookkeeping errors.
#[derive(Debug, Error)]
pub enum SubContextError {
    /// The sub-context index exceeds [`MAX_SHARED_CTXTS`].
    #[error("sub-context {0} out of range")]
    OutOfRange(u16),
    /// The sub-context is already claimed.
    #[error("sub-context {0} already in use")]
    InUse(u16),
    /// The sub-context is not claimed.
    #[error("sub-context {0} not in use")]
    NotInUse(u16),
}

impl<T: LinkHardware> Device<T> {
    /// Marks logical sub-context `sub` of `ctxt` as in use.
    pub fn claim_sub_context(
        &self,
        ctxt: &UserContext,
        sub: u16,
    ) -> Result<(), SubContextError> {
        if sub >= MAX_SHARED_CTXTS {
            return Err(SubContextError::OutOfRange(sub));
        }
        let _guard = self.uctxt_lock.lock();
        let bit = 1u64 << sub;
        let in_use = ctxt.in_use.load(Ordering::Relaxed);
        if in_use & bit != 0 {
            return Err(SubContextError::InUse(sub));
        }
        ctxt.in_use.store(in_use | bit, Ordering::Relaxed);
        Ok(())
    }

    /// Releases logical sub-context `sub` of `ctxt`.
    pub fn release_sub_context(
        &self,
        ctxt: &UserContext,
        sub: u16,
    ) -> Result<(), SubContextError> {
        if sub >= MAX_SHARED_CTXTS {
            return Err(SubContextError::OutOfRange(sub));
        }
        let _guard = self.uctxt_lock.lock();
        let bit = 1u64 << sub;
        let in_use = ctxt.in_use.load(Ordering::Relaxed);
        if in_use & bit == 0 {
            return Err(SubContextError::NotInUse(sub));
        }
        ctxt.in_use.store(in_use & !bit, Ordering::Relaxed);
        Ok(())
    }
}
