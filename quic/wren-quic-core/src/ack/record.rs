// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use alloc::vec::Vec;

/// The fate of a sent packet, as observed by interested subsystems.
///
/// Stream buffers and loss notifiers hold a [`RecordHandle`] for packets
/// whose outcome they care about; the recovery engine marks the outcome when
/// the packet is acknowledged or declared lost.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckLostState {
    Pending,
    Acked,
    Lost,
}

/// A generational handle into a [`RecordArena`].
///
/// Handles stay valid after the slot is released; they resolve to `None`
/// instead of aliasing a reused slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecordHandle {
    index: u32,
    generation: u32,
}

#[derive(Clone, Debug)]
struct Slot {
    generation: u32,
    state: Option<AckLostState>,
}

/// Arena of ack/lost records with generational indices.
///
/// The observer owning the handle controls the slot's lifetime via
/// [`RecordArena::release`]; the recovery engine only marks outcomes and
/// never revives a released slot.
#[derive(Clone, Debug, Default)]
pub struct RecordArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl RecordArena {
    /// Allocates a record in the `Pending` state
    pub fn alloc(&mut self) -> RecordHandle {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.state = Some(AckLostState::Pending);
            RecordHandle {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                state: Some(AckLostState::Pending),
            });
            RecordHandle {
                index,
                generation: 0,
            }
        }
    }

    /// Resolves a handle; stale handles return `None`
    #[inline]
    pub fn get(&self, handle: RecordHandle) -> Option<AckLostState> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.state
    }

    #[inline]
    pub fn mark_acked(&mut self, handle: RecordHandle) {
        self.mark(handle, AckLostState::Acked);
    }

    #[inline]
    pub fn mark_lost(&mut self, handle: RecordHandle) {
        self.mark(handle, AckLostState::Lost);
    }

    fn mark(&mut self, handle: RecordHandle, state: AckLostState) {
        if let Some(slot) = self.slots.get_mut(handle.index as usize) {
            if slot.generation == handle.generation && slot.state.is_some() {
                slot.state = Some(state);
            }
        }
    }

    /// Releases the slot behind `handle`. Outstanding copies of the handle
    /// resolve to `None` afterwards.
    pub fn release(&mut self, handle: RecordHandle) {
        if let Some(slot) = self.slots.get_mut(handle.index as usize) {
            if slot.generation == handle.generation && slot.state.is_some() {
                slot.state = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(handle.index);
                self.live -= 1;
            }
        }
    }

    /// Number of live records
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
