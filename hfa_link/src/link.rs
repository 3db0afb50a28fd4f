// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The link state controller and management permission negotiator.

use crate::device::Device;
use crate::device::Icode;
use crate::device::PortEvent;
use crate::device::PortEventKind;
use crate::hal::LinkHardware;
use hfa_defs::ConfigField;
use hfa_defs::LinkDownReason;
use hfa_defs::NodeType;
use hfa_defs::RemoteFmSecurityReg;
use hfa_defs::RemoteLniInfo;
use hfa_defs::RemoteNodeTypeReg;
use hfa_defs::RemotePortReg;
use hfa_defs::StatusReg;
use hfa_defs::FREEZE_LINK_DOWN;
use hfa_defs::FREEZE_SELF;
use hfa_defs::FULL_MGMT_PKEY;
use hfa_defs::FULL_MGMT_PKEY_IDX;
use hfa_defs::UEVENT_LINKDOWN;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Settle margin the hardware needs after signaling link up before it can be
/// trusted for further configuration.
const LINK_UP_DELAY: Duration = Duration::from_micros(500);

impl<T: LinkHardware> Device<T> {
    /// Finishes a link up or link down state change.
    ///
    /// A redundant notification (the requested state equals the recorded
    /// one) is a no-op. Must be called outside interrupt context, and
    /// serially per port: it busy-waits the hardware settle delay and
    /// performs blocking register access.
    pub fn handle_linkup_change(&self, linkup: bool) {
        if self.port.linkup.load(Ordering::Acquire) == linkup {
            // No change, nothing to do.
            return;
        }
        if linkup {
            self.link_went_up();
        } else {
            self.link_went_down();
        }
    }

    fn link_went_up(&self) {
        let port = &self.port;

        // Quick linkup and the functional simulator move directly to LinkUp
        // without the verify-capability interrupt or frames. Do the work
        // that handshake would have done, using this side's vAU, vCU, and
        // VL15 credit values for the remote ones; both sides must be using
        // the same values.
        if self.params.quick_linkup || self.params.icode == Icode::FunctionalSimulator {
            self.hw.set_credit_unit(self.params.vau);
            self.hw.set_vl15_credits(self.params.vl15_init);
            self.hw.assign_remote_credit_table(self.params.vcu);
        }

        let guid = self.hw.read_status(StatusReg::REMOTE_GUID);
        let node_type =
            RemoteNodeTypeReg::from(self.hw.read_status(StatusReg::REMOTE_NODE_TYPE)).node_type();
        let port_number =
            RemotePortReg::from(self.hw.read_status(StatusReg::REMOTE_PORT_NUMBER)).port();
        let fm_security = RemoteFmSecurityReg::from(
            self.hw.read_status(StatusReg::REMOTE_FM_SECURITY),
        )
        .security_disabled();
        port.neighbor_guid.store(guid, Ordering::Relaxed);
        port.neighbor_type.store(node_type, Ordering::Relaxed);
        port.neighbor_port_number.store(port_number, Ordering::Relaxed);
        port.neighbor_fm_security.store(fm_security, Ordering::Relaxed);
        tracing::info!(
            guid = format!("{guid:#x}"),
            node_type,
            port_number,
            "neighbor"
        );

        self.hw.settle(LINK_UP_DELAY);

        // The management-allowed information exchanged during negotiation is
        // available at this point. The full management pkey must reach
        // hardware while the port is still recorded down.
        self.set_mgmt_allowed();
        if port.mgmt_allowed.load(Ordering::Relaxed) {
            self.add_full_mgmt_pkey();
        }

        port.linkup.store(true, Ordering::Release);
        port.offline_disabled_reason
            .store(LinkDownReason::NONE.0, Ordering::Relaxed);

        // Link widths are not available until the link is fully up.
        let widths = self.hw.link_widths();
        port.link_width_tx_active.store(widths.tx, Ordering::Relaxed);
        port.link_width_rx_active.store(widths.rx, Ordering::Relaxed);
    }

    fn link_went_down(&self) {
        let port = &self.port;

        port.linkup.store(false, Ordering::Release);

        // Clear hardware details of the previous connection.
        port.actual_vls_operational.store(0, Ordering::Relaxed);
        self.hw.reset_link_credits();

        // Freeze after a link down to guarantee a clean egress.
        self.hw.start_freeze(FREEZE_SELF | FREEZE_LINK_DOWN);

        port.uevent_flags.fetch_or(UEVENT_LINKDOWN, Ordering::Relaxed);

        // If we are down, the neighbor is down.
        port.neighbor_normal.store(false, Ordering::Relaxed);

        self.signal_event(PortEventKind::PortError);
    }

    /// Decides whether this port may act as fabric manager.
    ///
    /// A direct host-to-host link allows it unconditionally; otherwise the
    /// partner advertises permission in its general link configuration.
    fn set_mgmt_allowed(&self) {
        let allowed = if self.port.neighbor_type() == NodeType::ADAPTER {
            true
        } else {
            RemoteLniInfo::from(self.hw.read_partner_config(ConfigField::REMOTE_LNI_INFO))
                .mgmt_allowed()
        };
        self.port.mgmt_allowed.store(allowed, Ordering::Relaxed);
    }

    /// Places the full management partition key in its table slot and pushes
    /// the table to hardware.
    ///
    /// Runs only while the port is still recorded down; listeners key off
    /// that to distinguish a bring-up pkey change from one on a live port.
    fn add_full_mgmt_pkey(&self) {
        let mut pkeys = self.port.pkeys.lock();
        // The slot should be empty or already hold the sentinel.
        let current = pkeys[FULL_MGMT_PKEY_IDX];
        if current != 0 && current != FULL_MGMT_PKEY {
            tracing::warn!(
                pkey = format!("{current:#x}"),
                "full management pkey slot already set, resetting"
            );
        }
        pkeys[FULL_MGMT_PKEY_IDX] = FULL_MGMT_PKEY;
        self.hw.set_pkey_table(&pkeys);
        drop(pkeys);

        if let Some(listener) = &*self.listener.read() {
            listener.pkey_change(self.params.unit, self.port.number);
        }
    }

    /// Forwards a port event to the upstream fabric subsystem.
    ///
    /// Dropped silently until a listener is registered; upstream
    /// registration completing is what makes events observable.
    pub fn signal_event(&self, kind: PortEventKind) {
        if let Some(listener) = &*self.listener.read() {
            listener.port_event(PortEvent {
                unit: self.params.unit,
                port: self.port.number,
                kind,
            });
        }
    }
}
