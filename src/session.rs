//! Back-channel session state: the slot table and its sequencing counters.
//!
//! Our back channel keeps a small fixed-size slot table; the usable portion
//! starts at a single slot and grows only when the client raises its target
//! highest slot through CB_SEQUENCE replies.

use std::sync::{Arc, Mutex};

use crate::nfs4::SessionId;
use crate::transport::{CallbackSecurity, RpcChannel};

/// Capacity of the back-channel slot table (bits of the availability word).
pub const SLOT_TABLE_SIZE: usize = u32::BITS as usize;

struct SlotTable {
    /// Bit set means the slot is free. Slots above `highest` are kept free
    /// but are not handed out.
    avail: u32,
    /// Highest slot index currently usable, negotiated upward by the client.
    highest: u32,
    seq: [u32; SLOT_TABLE_SIZE],
}

/// One NFSv4.1+ session as the callback engine sees it.
pub struct Session {
    id: SessionId,
    /// RPC program number the client registered for its callback service.
    cb_program: u32,
    security: CallbackSecurity,
    slots: Mutex<SlotTable>,
    /// Connection the client bound to this session for server-initiated
    /// calls, if any.
    backchannel: Mutex<Option<Arc<dyn RpcChannel>>>,
}

impl Session {
    /// Creates a session with a single usable slot and every sequence
    /// counter at its initial value of 1.
    pub fn new(id: SessionId, cb_program: u32, security: CallbackSecurity) -> Self {
        Self {
            id,
            cb_program,
            security,
            slots: Mutex::new(SlotTable { avail: u32::MAX, highest: 0, seq: [1; SLOT_TABLE_SIZE] }),
            backchannel: Mutex::new(None),
        }
    }

    /// Records that the client bound `xprt` to this session for callbacks.
    pub fn bind_backchannel(&self, xprt: Arc<dyn RpcChannel>) {
        *self.backchannel.lock().unwrap() = Some(xprt);
    }

    /// The client-bound backchannel connection, if one exists.
    pub fn backchannel(&self) -> Option<Arc<dyn RpcChannel>> {
        self.backchannel.lock().unwrap().clone()
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn cb_program(&self) -> u32 {
        self.cb_program
    }

    pub fn security(&self) -> &CallbackSecurity {
        &self.security
    }

    /// Reserves the lowest free slot at or below the highest usable index.
    pub fn grab_slot(&self) -> Option<u32> {
        let mut slots = self.slots.lock().unwrap();
        let idx = slots.avail.trailing_zeros();
        if idx >= SLOT_TABLE_SIZE as u32 || idx > slots.highest {
            return None;
        }
        slots.avail &= !(1 << idx);
        Some(idx)
    }

    /// Returns a slot to the free pool. Waking the next waiter is the
    /// caller's business; the wait queue lives on the client.
    pub fn release_slot(&self, slot: u32) {
        let mut slots = self.slots.lock().unwrap();
        slots.avail |= 1 << slot;
    }

    /// Current sequence number for `slot`.
    pub fn seq_nr(&self, slot: u32) -> u32 {
        self.slots.lock().unwrap().seq[slot as usize]
    }

    /// Advances the sequence number for `slot` by exactly one.
    ///
    /// Called only after CB_SEQUENCE returned NFS4_OK for this slot with
    /// matching echoed fields; on any other outcome the slot state must not
    /// change (RFC 5661, 20.9.3).
    pub fn advance_seq(&self, slot: u32) {
        self.slots.lock().unwrap().seq[slot as usize] += 1;
    }

    /// Highest slot id to report in CB_SEQUENCE arguments: the highest
    /// currently reserved index, or the negotiated highest usable slot,
    /// whichever is greater.
    pub fn highest_slotid(&self) -> u32 {
        let slots = self.slots.lock().unwrap();
        let reserved = !slots.avail;
        let msb = if reserved == 0 { 0 } else { 31 - reserved.leading_zeros() };
        msb.max(slots.highest)
    }

    /// Applies the client's `csr_target_highest_slotid`.
    ///
    /// Growing the table resets the sequence numbers of the newly revealed
    /// slots to 1. There is some debate about whether the RFC requires this,
    /// but one major client expects it.
    pub fn update_target(&self, target: u32) {
        let mut slots = self.slots.lock().unwrap();
        if target == slots.highest {
            return;
        }
        let mut target = target;
        if target > slots.highest {
            target = target.min(SLOT_TABLE_SIZE as u32 - 1);
            for i in slots.highest + 1..=target {
                slots.seq[i as usize] = 1;
            }
        }
        slots.highest = target;
    }

    /// True if `slot` is currently free.
    pub fn slot_is_free(&self, slot: u32) -> bool {
        self.slots.lock().unwrap().avail & (1 << slot) != 0
    }
}
