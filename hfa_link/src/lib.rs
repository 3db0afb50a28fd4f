// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Link-state machine and user-context interrupt dispatch for HFA (host
//! fabric adapter) devices.
//!
//! This crate reacts to physical link up/down transitions reported by the
//! link-training firmware, negotiates fabric-management permission with the
//! link partner, and wakes consumers blocked on shared hardware receive
//! contexts. Hardware access goes through the narrow [`hal::LinkHardware`]
//! trait; everything below it (PCI, SerDes training, the management
//! protocol) belongs to other layers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod hal;

mod device;
mod intr;
mod link;

pub use device::Device;
pub use device::DeviceParams;
pub use device::FabricListener;
pub use device::Icode;
pub use device::Port;
pub use device::PortEvent;
pub use device::PortEventKind;
pub use device::SubContextError;
pub use device::UserContext;
pub use device::CTXT_WAITING_RCV;
pub use device::CTXT_WAITING_URG;
