// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Re-exports of the `tock-registers` bitfield machinery, so capsules depend
//! on `kernel::utilities::registers` rather than on `tock-registers` directly.

pub use tock_registers::fields::{Field, FieldValue};
pub use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
pub use tock_registers::registers::{InMemoryRegister, ReadOnly, ReadWrite, WriteOnly};
pub use tock_registers::{register_bitfields, register_structs};
pub use tock_registers::LocalRegisterCopy;
pub use tock_registers::RegisterLongName;
