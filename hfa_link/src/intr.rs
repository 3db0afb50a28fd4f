// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Receive and urgent interrupt dispatch for shared user contexts, and the
//! consumer-side wait path it wakes.

use crate::device::Device;
use crate::device::UserContext;
use crate::device::CTXT_WAITING_RCV;
use crate::device::CTXT_WAITING_URG;
use crate::hal::LinkHardware;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

/// Atomically clears `bit` in `flags`, returning whether it was set.
fn test_and_clear(flags: &AtomicU32, bit: u32) -> bool {
    flags.fetch_and(!bit, Ordering::AcqRel) & bit != 0
}

impl<T: LinkHardware> Device<T> {
    /// Handles a receive or urgent interrupt for a user context: a consumer
    /// was waiting for a packet to arrive and didn't want to poll.
    ///
    /// Runs in interrupt context; does not block or allocate. An interrupt
    /// that finds neither waiting flag set was coalesced with a previous
    /// wakeup and is benign.
    pub fn handle_user_interrupt(&self, ctxt: &UserContext) {
        let _guard = self.uctxt_lock.lock();
        if ctxt.in_use.load(Ordering::Relaxed) == 0 {
            // Nobody has the context open; nothing to wake.
            return;
        }

        if test_and_clear(&ctxt.event_flags, CTXT_WAITING_RCV) {
            ctxt.wait.notify_all();
            // The woken consumer re-enables this once it has drained the
            // context; leaving it enabled here would storm.
            self.hw.enable_rcv_interrupt(ctxt.index, false);
        } else if test_and_clear(&ctxt.event_flags, CTXT_WAITING_URG) {
            ctxt.urgent.fetch_add(1, Ordering::Relaxed);
            ctxt.wait.notify_all();
        }
    }

    /// Blocks the caller until the dispatcher signals receive data for
    /// `ctxt`.
    ///
    /// Arms the receive-available interrupt before sleeping and tolerates
    /// spurious wakeups by re-checking the waiting flag.
    pub fn wait_for_receive(&self, ctxt: &UserContext) {
        let mut guard = self.uctxt_lock.lock();
        ctxt.event_flags.fetch_or(CTXT_WAITING_RCV, Ordering::AcqRel);
        self.hw.enable_rcv_interrupt(ctxt.index, true);
        while ctxt.event_flags.load(Ordering::Acquire) & CTXT_WAITING_RCV != 0 {
            ctxt.wait.wait(&mut guard);
        }
    }

    /// Blocks the caller until the dispatcher signals an urgent condition
    /// for `ctxt`.
    pub fn wait_for_urgent(&self, ctxt: &UserContext) {
        let mut guard = self.uctxt_lock.lock();
        ctxt.event_flags.fetch_or(CTXT_WAITING_URG, Ordering::AcqRel);
        while ctxt.event_flags.load(Ordering::Acquire) & CTXT_WAITING_URG != 0 {
            ctxt.wait.wait(&mut guard);
        }
    }
}
