// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Hardware Interface Layer (HIL) traits: the abstract capabilities
//! capsules consume from hardware, independent of any particular chip.

pub mod gpio;
pub mod rng;
pub mod time;
pub mod uart;
