// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The hardware access surface this core needs from a device backend.

use hfa_defs::ConfigField;
use hfa_defs::LinkWidths;
use hfa_defs::StatusReg;
use hfa_defs::PKEY_TABLE_SIZE;
use std::time::Duration;
use std::time::Instant;

/// Register and configuration access for one HFA device.
///
/// All operations are synchronous and infallible; access failures are fatal
/// conditions handled outside this core. Reads of partner state are only
/// meaningful once the link-training firmware has signaled link up.
pub trait LinkHardware: Send + Sync {
    /// Reads a link-partner status register.
    fn read_status(&self, reg: StatusReg) -> u64;

    /// Reads a configuration frame exchanged with the link partner during
    /// negotiation.
    fn read_partner_config(&self, field: ConfigField) -> u32;

    /// Programs the credit allocation unit.
    fn set_credit_unit(&self, vau: u8);

    /// Programs the initial virtual-lane-15 credit allocation.
    fn set_vl15_credits(&self, vl15_init: u16);

    /// Installs the remote credit-mapping table derived from `vcu`.
    fn assign_remote_credit_table(&self, vcu: u8);

    /// Pushes the partition-key table to hardware. Blocking.
    fn set_pkey_table(&self, pkeys: &[u16; PKEY_TABLE_SIZE]);

    /// Resets outstanding link credit accounting.
    fn reset_link_credits(&self);

    /// Triggers freeze/recovery handling with a mask of `FREEZE_*` reasons.
    fn start_freeze(&self, reasons: u32);

    /// Queries the active link widths. Only valid while the link is up.
    fn link_widths(&self) -> LinkWidths;

    /// Enables or disables the receive-available interrupt for a user
    /// context.
    fn enable_rcv_interrupt(&self, ctxt: u16, enable: bool);

    /// Busy-waits for `delay`. The hardware needs a fixed settle margin
    /// after link up before it can be trusted for further configuration, so
    /// this must not yield or sleep coarsely; test backends stub it out.
    fn settle(&self, delay: Duration) {
        let start = Instant::now();
        while start.elapsed() < delay {
            std::hint::spin_loop();
        }
    }
}
