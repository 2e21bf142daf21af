// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Cooperative round-robin selection over task slots
//! OWNERS: @kernel-sched-team
//! PUBLIC API: Scheduler (pick/set_current), Dispatch, SwitchPlan, ScheduleError
//! DEPENDS_ON: hal::Hart (performing a switch), task::TaskContext
//! INVARIANTS: Candidates are visited current+1, current+2, ... wrapping, current last;
//!             a plan always activates the next address space before swapping registers

use crate::hal::Hart;
use crate::task::TaskContext;

/// Round-robin cursor over a fixed number of slots.
#[derive(Debug)]
pub struct Scheduler {
    current: Option<usize>,
    slots: usize,
}

#[must_use = "scheduling errors must be handled"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    /// No slot is runnable; the kernel has nothing left to do.
    AllTasksFinished,
    /// A runnable slot has no page table.
    MissingAddressSpace(usize),
}

impl Scheduler {
    pub const fn new(slots: usize) -> Self {
        Self { current: None, slots }
    }

    /// Slot currently owning the CPU; `None` while the boot context runs.
    pub const fn current(&self) -> Option<usize> {
        self.current
    }

    /// Slots in the order they are considered for the next turn.
    pub fn candidates(&self) -> impl Iterator<Item = usize> {
        let start = self.current.map_or(0, |slot| slot + 1);
        let slots = self.slots;
        (0..slots).map(move |offset| (start + offset) % slots)
    }

    /// First runnable slot in round-robin order.
    pub fn pick(&self, runnable: impl Fn(usize) -> bool) -> Option<usize> {
        self.candidates().find(|&slot| runnable(slot))
    }

    pub fn set_current(&mut self, slot: usize) {
        debug_assert!(slot < self.slots);
        self.current = Some(slot);
    }
}

/// What the trap path must do after a scheduling decision.
#[must_use = "a dispatch decision must be carried out"]
#[derive(Debug)]
pub enum Dispatch {
    /// The caller is also the next task; return to it directly.
    Stay,
    Switch(SwitchPlan),
}

/// A pending context switch. Holds raw pointers into the task table, so it must be performed
/// before the table is touched again.
#[derive(Debug)]
pub struct SwitchPlan {
    pub prev: Option<usize>,
    pub next: usize,
    pub satp: usize,
    from: *mut TaskContext,
    to: *const TaskContext,
}

static_assertions::assert_not_impl_any!(SwitchPlan: Send, Sync);

impl SwitchPlan {
    pub(crate) fn new(
        prev: Option<usize>,
        next: usize,
        satp: usize,
        from: *mut TaskContext,
        to: *const TaskContext,
    ) -> Self {
        Self { prev, next, satp, from, to }
    }

    /// Installs the next address space, then swaps to its saved context. Returns when the
    /// previous task is switched back in.
    ///
    /// # Safety
    ///
    /// The task table the plan was built from must still be alive and unmodified, and no lock
    /// protecting it may be held.
    pub unsafe fn perform<H: Hart>(&self, hart: &H) {
        hart.activate(self.satp);
        // SAFETY: pointers reference task-table contexts, guaranteed live by the caller.
        unsafe { hart.switch(self.from, self.to) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::vec::Vec;

    #[test]
    fn idle_starts_from_slot_zero() {
        let sched = Scheduler::new(4);
        assert_eq!(sched.candidates().collect::<Vec<_>>(), [0, 1, 2, 3]);
        assert_eq!(sched.pick(|slot| slot >= 2), Some(2));
    }

    #[test]
    fn current_slot_is_considered_last() {
        let mut sched = Scheduler::new(4);
        sched.set_current(1);
        assert_eq!(sched.candidates().collect::<Vec<_>>(), [2, 3, 0, 1]);
        assert_eq!(sched.pick(|slot| slot == 1), Some(1));
        assert_eq!(sched.pick(|_| false), None);
    }

    #[test]
    fn runnable_slots_take_turns_in_ascending_order() {
        let runnable = [true, false, true, true];
        let mut sched = Scheduler::new(runnable.len());
        let mut order = Vec::new();
        for _ in 0..6 {
            let next = sched.pick(|slot| runnable[slot]).expect("runnable slot");
            sched.set_current(next);
            order.push(next);
        }
        assert_eq!(order, [0, 2, 3, 0, 2, 3]);
    }

    #[derive(Default)]
    struct RecordingHart {
        events: RefCell<Vec<&'static str>>,
        satp: RefCell<usize>,
    }

    impl Hart for RecordingHart {
        fn activate(&self, satp: usize) {
            *self.satp.borrow_mut() = satp;
            self.events.borrow_mut().push("activate");
        }

        unsafe fn switch(&self, _from: *mut TaskContext, _to: *const TaskContext) {
            self.events.borrow_mut().push("switch");
        }
    }

    #[test]
    fn address_space_is_installed_before_registers_swap() {
        let mut from = TaskContext::zeroed();
        let to = TaskContext::zeroed();
        let plan = SwitchPlan::new(Some(0), 1, 0x8000_0000_0008_0400, &mut from, &to);
        let hart = RecordingHart::default();
        // SAFETY: both contexts outlive the call and the recording hart never dereferences them.
        unsafe { plan.perform(&hart) };
        assert_eq!(*hart.events.borrow(), ["activate", "switch"]);
        assert_eq!(*hart.satp.borrow(), 0x8000_0000_0008_0400);
    }
}
