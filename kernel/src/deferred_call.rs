// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Support for deferring work to the kernel's main loop.
//!
//! A capsule occasionally needs to invoke one of its own client callbacks
//! from a context that must not call back into the client synchronously
//! (e.g. to avoid re-entrancy when an operation completes "too fast", see
//! upstream issue #1496). [`DeferredCall::set`] marks such a callback as
//! pending; the kernel's main loop drains pending deferred calls between
//! interrupts by calling [`DeferredCallClient::handle_deferred_call`] on
//! each registered client via [`service_deferred_calls`].

use core::cell::Cell;

use crate::collections::list::{List, ListLink, ListNode};
use crate::utilities::cells::OptionalCell;

/// A ticket for one pending unit of deferred work, owned by the capsule that
/// may need to defer a callback.
pub struct DeferredCall {
    pending: Cell<bool>,
    client: OptionalCell<&'static dyn DeferredCallClient>,
    next: ListLink<'static, DeferredCall>,
}

impl DeferredCall {
    pub const fn new() -> DeferredCall {
        DeferredCall {
            pending: Cell::new(false),
            client: OptionalCell::empty(),
            next: ListLink::empty(),
        }
    }

    /// Marks this deferred call as pending. The kernel's main loop will
    /// invoke the owning client's callback on its next pass through
    /// [`service_deferred_calls`].
    pub fn set(&self) {
        self.pending.set(true);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.get()
    }

    /// Registers this deferred call (and its client) with the global queue
    /// serviced by [`service_deferred_calls`]. Must be called once the
    /// owning struct has a `'static` lifetime, typically right after
    /// `static_init!`.
    pub fn register(&'static self, client: &'static dyn DeferredCallClient) {
        self.client.set(client);
        DEFERRED_CALLS.push_head(self);
    }
}

impl Default for DeferredCall {
    fn default() -> Self {
        Self::new()
    }
}

impl ListNode<'static, DeferredCall> for DeferredCall {
    fn next(&'static self) -> &'static ListLink<'static, DeferredCall> {
        &self.next
    }
}

static DEFERRED_CALLS: List<'static, DeferredCall> = List::new();

/// Implemented by anything that owns a [`DeferredCall`] and wants to be
/// invoked when it fires.
pub trait DeferredCallClient {
    fn handle_deferred_call(&self);

    /// Registers `self`'s [`DeferredCall`] with the global queue. Must be
    /// called once, after the client has a `'static` lifetime (typically
    /// right after `static_init!`).
    fn register(&'static self);
}

/// Invokes [`DeferredCallClient::handle_deferred_call`] for every
/// registered client with a pending deferred call, clearing the pending
/// flag first so a client that immediately re-arms its own deferred call
/// is serviced again on the next pass rather than being skipped.
///
/// Called from the board's main loop between interrupt handling passes.
pub fn service_deferred_calls() -> bool {
    let mut serviced_any = false;
    DEFERRED_CALLS.iter().for_each(|dc| {
        if dc.pending.get() {
            dc.pending.set(false);
            dc.client.map(|client| client.handle_deferred_call());
            serviced_any = true;
        }
    });
    serviced_any
}
