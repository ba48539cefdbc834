//! Register file.
//!
//! The machine has:
//! - 256 general registers `$0..$255`, 64 bits each
//! - a bank of 32 reserved 32-bit stack pointer slots (not used by any opcode)
//! - the instruction pointer, counted in 4-byte words
//!
//! Register values are kept big-endian at rest, whatever the host byte order.
//! Arithmetic happens in host order, so every use of a register crosses a
//! byte-order boundary: [`Registers::with_host_order`] is the one place that
//! crossing happens for instruction operands.

use serde::Serialize;

/// Number of general registers.
pub const REGISTER_COUNT: usize = 256;

/// Number of reserved stack pointer slots.
pub const STACK_POINTER_COUNT: usize = 32;

/// Register used by the TRAP string-write call as the string pointer.
pub const TRAP_POINTER_REGISTER: u8 = 255;

/// Encode a host-order value in the at-rest representation.
#[inline]
pub const fn to_stored(value: u64) -> u64 {
    value.to_be()
}

/// Decode an at-rest value into host order.
#[inline]
pub const fn from_stored(value: u64) -> u64 {
    u64::from_be(value)
}

/// A set of register indices, each present at most once.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterSet {
    bits: [u64; REGISTER_COUNT / 64],
}

impl RegisterSet {
    /// The empty set.
    pub const fn new() -> Self {
        Self { bits: [0; REGISTER_COUNT / 64] }
    }

    /// Build a set from possibly repeated indices.
    pub fn from_indices(indices: &[u8]) -> Self {
        let mut set = Self::new();
        for &index in indices {
            set.insert(index);
        }
        set
    }

    /// Add an index. Returns false if it was already present.
    pub fn insert(&mut self, index: u8) -> bool {
        let (word, bit) = (index as usize / 64, index as usize % 64);
        let fresh = self.bits[word] & (1 << bit) == 0;
        self.bits[word] |= 1 << bit;
        fresh
    }

    /// Membership test.
    pub fn contains(&self, index: u8) -> bool {
        self.bits[index as usize / 64] & (1 << (index as usize % 64)) != 0
    }

    /// Number of distinct indices.
    pub fn len(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// True if no index is present.
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&w| w == 0)
    }

    /// Distinct indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..REGISTER_COUNT).filter(move |&i| self.contains(i as u8))
    }
}

impl std::fmt::Debug for RegisterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// The register file.
#[derive(Clone, Serialize)]
pub struct Registers {
    /// General registers, big-endian at rest.
    slots: Vec<u64>,

    /// Reserved stack pointer bank. Kept for layout compatibility only.
    stack_pointers: [u32; STACK_POINTER_COUNT],

    /// Instruction pointer, in words.
    pub ip: u64,
}

impl Registers {
    /// Create a register file with every register zero and `ip = 0`.
    pub fn new() -> Self {
        Self {
            slots: vec![0; REGISTER_COUNT],
            stack_pointers: [0; STACK_POINTER_COUNT],
            ip: 0,
        }
    }

    /// Reset all registers and the instruction pointer to zero.
    pub fn reset(&mut self) {
        self.slots.fill(0);
        self.stack_pointers = [0; STACK_POINTER_COUNT];
        self.ip = 0;
    }

    /// Host-order value of `$index`.
    #[inline]
    pub fn get(&self, index: u8) -> u64 {
        from_stored(self.slots[index as usize])
    }

    /// Store a host-order value into `$index`.
    #[inline]
    pub fn set(&mut self, index: u8, value: u64) {
        self.slots[index as usize] = to_stored(value);
    }

    /// Raw at-rest (big-endian) contents of `$index`.
    #[inline]
    pub fn stored(&self, index: u8) -> u64 {
        self.slots[index as usize]
    }

    /// The reserved stack pointer bank.
    pub fn stack_pointers(&self) -> &[u32; STACK_POINTER_COUNT] {
        &self.stack_pointers
    }

    /// Run `f` with the registers named in `indices` converted to host order.
    ///
    /// Each distinct register is converted exactly once before `f` and back
    /// exactly once after, so operands that alias the same register are not
    /// double-swapped. `f` must only touch registers listed in `indices`;
    /// every other slot is still in its at-rest encoding while `f` runs.
    pub fn with_host_order<R>(&mut self, indices: &[u8], f: impl FnOnce(&mut [u64]) -> R) -> R {
        let touched = RegisterSet::from_indices(indices);

        for i in touched.iter() {
            self.slots[i] = from_stored(self.slots[i]);
        }

        let result = f(&mut self.slots);

        for i in touched.iter() {
            self.slots[i] = to_stored(self.slots[i]);
        }

        result
    }

    /// Advance the instruction pointer by one word. Returns the old value.
    pub fn advance_ip(&mut self) -> u64 {
        let old = self.ip;
        self.ip = self.ip.wrapping_add(1);
        old
    }

    /// Move the instruction pointer forward by `words`.
    pub fn branch_forward(&mut self, words: u16) {
        self.ip = self.ip.wrapping_add(words as u64);
    }

    /// Move the instruction pointer backward by `words`.
    pub fn branch_backward(&mut self, words: u16) {
        self.ip = self.ip.wrapping_sub(words as u64);
    }

    /// `(index, host value)` for every non-zero register.
    pub fn non_zero(&self) -> impl Iterator<Item = (u8, u64)> + '_ {
        (0..=u8::MAX)
            .map(|i| (i, self.get(i)))
            .filter(|&(_, v)| v != 0)
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let live: Vec<_> = self.non_zero().collect();
        f.debug_struct("Registers")
            .field("ip", &self.ip)
            .field("non_zero", &live)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_set_stores_big_endian() {
        let mut regs = Registers::new();
        regs.set(5, 0x0102_0304_0506_0708);

        assert_eq!(regs.stored(5).to_ne_bytes(), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(regs.get(5), 0x0102_0304_0506_0708);
    }

    #[test]
    fn test_register_set_dedups() {
        let set = RegisterSet::from_indices(&[7, 7, 7]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![7]);

        let set = RegisterSet::from_indices(&[255, 0, 64, 0]);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 64, 255]);
        assert!(RegisterSet::new().is_empty());
    }

    #[test]
    fn test_host_order_view_aliasing() {
        let mut regs = Registers::new();
        regs.set(3, 6);

        // $3 = $3 * $3 with every operand naming the same register
        regs.with_host_order(&[3, 3, 3], |r| r[3] = r[3].wrapping_mul(r[3]));

        assert_eq!(regs.get(3), 36);
    }

    #[test]
    fn test_host_order_view_restores_untouched_bytes() {
        let mut regs = Registers::new();
        regs.set(1, 0xDEAD_BEEF);
        let before = regs.stored(1);

        let seen = regs.with_host_order(&[1], |r| r[1]);

        assert_eq!(seen, 0xDEAD_BEEF);
        assert_eq!(regs.stored(1), before);
    }

    #[test]
    fn test_branching_ip() {
        let mut regs = Registers::new();
        regs.ip = 10;
        assert_eq!(regs.advance_ip(), 10);
        regs.branch_forward(5);
        assert_eq!(regs.ip, 16);
        regs.branch_backward(6);
        assert_eq!(regs.ip, 10);
    }

    #[test]
    fn test_stack_pointer_bank_is_reserved() {
        let regs = Registers::new();
        assert!(regs.stack_pointers().iter().all(|&sp| sp == 0));
    }

    proptest! {
        #[test]
        fn prop_swap_is_self_inverse(v in any::<u64>()) {
            prop_assert_eq!(from_stored(to_stored(v)), v);
            prop_assert_eq!(to_stored(from_stored(v)), v);
        }

        #[test]
        fn prop_set_get_roundtrip(index in any::<u8>(), v in any::<u64>()) {
            let mut regs = Registers::new();
            regs.set(index, v);
            prop_assert_eq!(regs.get(index), v);
            prop_assert_eq!(regs.stored(index), v.to_be());
        }
    }
}
