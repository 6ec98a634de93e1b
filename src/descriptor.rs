// Userspace AXI DMA (Scatter/Gather) Driver
// SPDX-License-Identifier: MIT

//! Scatter/Gather buffer descriptors and the descriptor ring.
//!
//! A buffer descriptor (BD) is a 16-word record the engine walks to find
//! the next transfer. BDs live at the base of the DMA-coherent arena, with
//! their payload buffers immediately after the last descriptor:
//!
//! ```text
//! [ BD 0 | BD 1 | ... | BD K-1 | payload 0 | payload 1 | ... | payload K-1 ]
//! ```
//!
//! The hardware reads the pointer, control and status words and writes the
//! status word back on completion, so those fields are only ever accessed
//! with volatile loads and stores. Descriptors must be 16-word aligned;
//! any other alignment has undefined results.

use crate::regs::{BdControl, BdStatus};
use std::ptr::{self, NonNull};

/// 64-byte Scatter/Gather buffer descriptor (non-multichannel mode).
#[derive(Debug)]
#[repr(C, align(64))]
pub struct SgDescriptor {
    /// Next descriptor pointer, low half.
    next_desc: u32,
    /// Next descriptor pointer, high half.
    next_desc_msb: u32,
    /// Payload buffer physical address, low half.
    buf_addr: u32,
    /// Payload buffer physical address, high half.
    buf_addr_msb: u32,
    reserved1: [u32; 2],
    /// Control word: transfer length plus SOF/EOF frame markers.
    control: u32,
    /// Status word: transferred length, error bits, COMPLETE.
    status: u32,
    /// User application fields, preserved as zero.
    app: [u32; 5],
    reserved2: [u32; 3],
}

const _: () = assert!(std::mem::size_of::<SgDescriptor>() == 64);
const _: () = assert!(std::mem::align_of::<SgDescriptor>() == 64);
const _: () = assert!(std::mem::offset_of!(SgDescriptor, control) == 0x18);
const _: () = assert!(std::mem::offset_of!(SgDescriptor, status) == 0x1c);
const _: () = assert!(std::mem::offset_of!(SgDescriptor, app) == 0x20);

impl SgDescriptor {
    /// Create a zeroed descriptor. Only useful for tests and staging;
    /// live descriptors are views into the coherent arena.
    pub const fn new() -> Self {
        Self {
            next_desc: 0,
            next_desc_msb: 0,
            buf_addr: 0,
            buf_addr_msb: 0,
            reserved1: [0; 2],
            control: 0,
            status: 0,
            app: [0; 5],
            reserved2: [0; 3],
        }
    }

    /// Point this descriptor at the next one in the chain.
    ///
    /// The high half is written first; it is zero on 32-bit targets.
    pub fn set_next_desc(&mut self, phys: u64) {
        unsafe {
            ptr::write_volatile(&mut self.next_desc_msb, (phys >> 32) as u32);
            ptr::write_volatile(&mut self.next_desc, phys as u32);
        }
    }

    /// Physical address of the next descriptor in the chain.
    pub fn next_desc(&self) -> u64 {
        let (high, low) = unsafe {
            (
                ptr::read_volatile(&self.next_desc_msb),
                ptr::read_volatile(&self.next_desc),
            )
        };
        (u64::from(high) << 32) | u64::from(low)
    }

    /// Point this descriptor at its payload buffer.
    pub fn set_buf_addr(&mut self, phys: u64) {
        unsafe {
            ptr::write_volatile(&mut self.buf_addr_msb, (phys >> 32) as u32);
            ptr::write_volatile(&mut self.buf_addr, phys as u32);
        }
    }

    /// Physical address of the payload buffer.
    pub fn buf_addr(&self) -> u64 {
        let (high, low) = unsafe {
            (
                ptr::read_volatile(&self.buf_addr_msb),
                ptr::read_volatile(&self.buf_addr),
            )
        };
        (u64::from(high) << 32) | u64::from(low)
    }

    /// Current control word.
    pub fn control(&self) -> BdControl {
        BdControl::from_bits_retain(unsafe { ptr::read_volatile(&self.control) })
    }

    /// OR flags into the control word.
    pub fn insert_control(&mut self, flags: BdControl) {
        let value = unsafe { ptr::read_volatile(&self.control) } | flags.bits();
        unsafe { ptr::write_volatile(&mut self.control, value) };
    }

    /// Replace the length field of the control word, leaving the frame
    /// markers untouched.
    pub fn set_buf_len(&mut self, len: usize) {
        let old = unsafe { ptr::read_volatile(&self.control) };
        let value = (old & !BdControl::BUF_LEN.bits()) | (len as u32 & BdControl::BUF_LEN.bits());
        unsafe { ptr::write_volatile(&mut self.control, value) };
    }

    /// Length field of the control word.
    pub fn buf_len(&self) -> usize {
        (unsafe { ptr::read_volatile(&self.control) } & BdControl::BUF_LEN.bits()) as usize
    }

    /// Current status word.
    pub fn status(&self) -> BdStatus {
        BdStatus::from_bits_retain(unsafe { ptr::read_volatile(&self.status) })
    }

    /// Whether the hardware has marked this descriptor complete.
    pub fn is_complete(&self) -> bool {
        self.status().contains(BdStatus::COMPLETE)
    }

    /// Set the COMPLETE flag.
    pub fn set_complete(&mut self) {
        let value = unsafe { ptr::read_volatile(&self.status) } | BdStatus::COMPLETE.bits();
        unsafe { ptr::write_volatile(&mut self.status, value) };
    }

    /// Clear the given status flags.
    pub fn clear_status_flags(&mut self, flags: BdStatus) {
        let value = unsafe { ptr::read_volatile(&self.status) } & !flags.bits();
        unsafe { ptr::write_volatile(&mut self.status, value) };
    }

    /// Zero the whole status word.
    pub fn clear_status(&mut self) {
        unsafe { ptr::write_volatile(&mut self.status, 0) };
    }

    /// Bytes the hardware actually transferred through this descriptor.
    pub fn transferred_bytes(&self) -> usize {
        (self.status() & BdStatus::XFER_BYTES).bits() as usize
    }

    /// Whether the hardware flagged a DMA error on this descriptor.
    pub fn has_dma_error(&self) -> bool {
        self.status().intersects(BdStatus::DMA_ERRORS)
    }

    /// Zero the reserved and user-application words; the hardware and the
    /// core both expect them clear.
    fn clear_soft_words(&mut self) {
        let words = self
            .reserved1
            .iter_mut()
            .chain(self.app.iter_mut())
            .chain(self.reserved2.iter_mut());
        for word in words {
            unsafe { ptr::write_volatile(word, 0) };
        }
    }
}

impl Default for SgDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-size circular array of descriptors carved from the arena head.
///
/// The ring is a typed view over device-shared memory: it bundles the
/// descriptor base pointer with the descriptor count and yields
/// descriptors by index.
#[derive(Debug)]
pub struct DescriptorRing {
    base: NonNull<SgDescriptor>,
    count: usize,
}

// SAFETY: the ring is a view over a mapping owned by the channel that
// created it; the single-threaded-per-channel model means at most one
// thread touches it.
unsafe impl Send for DescriptorRing {}

impl DescriptorRing {
    /// Build a ring view over `count` descriptors starting at `base`.
    ///
    /// # Safety
    ///
    /// `base` must be 64-byte aligned and point to at least
    /// `count * 64` bytes that stay mapped for the ring's lifetime.
    pub unsafe fn from_raw(base: NonNull<u8>, count: usize) -> Self {
        Self {
            base: base.cast(),
            count,
        }
    }

    /// Carve as many descriptor/buffer pairs as fit in an arena of
    /// `arena_len` bytes. Returns `None` when not even one pair fits.
    ///
    /// # Safety
    ///
    /// `base` must satisfy the requirements of [`DescriptorRing::from_raw`]
    /// for the resulting count.
    pub unsafe fn carve(base: NonNull<u8>, arena_len: usize, buffer_size: usize) -> Option<Self> {
        let count = arena_len / (std::mem::size_of::<SgDescriptor>() + buffer_size);
        if count == 0 {
            return None;
        }
        Some(Self::from_raw(base, count))
    }

    /// Number of descriptors in the ring.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Bytes occupied by the descriptor table; payload buffers start at
    /// this offset from the arena base.
    pub fn table_bytes(&self) -> usize {
        self.count * std::mem::size_of::<SgDescriptor>()
    }

    /// Index following `index`, wrapping at the end of the ring.
    pub fn next_index(&self, index: usize) -> usize {
        (index + 1) % self.count
    }

    /// Descriptor at `index`.
    ///
    /// # Panics
    ///
    /// Panics when `index` is out of range.
    pub fn get(&self, index: usize) -> &SgDescriptor {
        assert!(index < self.count);
        unsafe { &*self.base.as_ptr().add(index) }
    }

    /// Mutable descriptor at `index`.
    ///
    /// # Panics
    ///
    /// Panics when `index` is out of range.
    pub fn get_mut(&mut self, index: usize) -> &mut SgDescriptor {
        assert!(index < self.count);
        unsafe { &mut *self.base.as_ptr().add(index) }
    }

    /// Ring position of a descriptor reference obtained from this ring.
    pub fn index_of(&self, bd: &SgDescriptor) -> usize {
        let offset = (bd as *const SgDescriptor as usize) - (self.base.as_ptr() as usize);
        offset / std::mem::size_of::<SgDescriptor>()
    }

    fn as_mut_slice(&mut self) -> &mut [SgDescriptor] {
        unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr(), self.count) }
    }

    /// Write the chain defaults into every descriptor: next pointers
    /// closing the ring, payload addresses laid out after the table,
    /// `control.len = buffer_size`, status and app words zeroed.
    pub fn link(&mut self, arena_phys: u64, buffer_size: usize) {
        let count = self.count;
        let table_bytes = self.table_bytes() as u64;
        let bd_size = std::mem::size_of::<SgDescriptor>() as u64;

        for (i, bd) in self.as_mut_slice().iter_mut().enumerate() {
            let next = (i + 1) % count;
            bd.set_next_desc(arena_phys + next as u64 * bd_size);
            bd.set_buf_addr(arena_phys + table_bytes + (i * buffer_size) as u64);
            unsafe { ptr::write_volatile(&mut bd.control, 0) };
            bd.set_buf_len(buffer_size);
            bd.clear_status();
            bd.clear_soft_words();
        }
    }

    /// Prepare a transmit (MM2S) ring: every packet occupies exactly one
    /// buffer, and COMPLETE is pre-set so the first acquisition does not
    /// wait for a hardware completion that will never come.
    pub fn prime_transmit(&mut self) {
        for bd in self.as_mut_slice() {
            bd.insert_control(BdControl::SOF | BdControl::EOF);
            bd.set_complete();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BD_SIZE: usize = std::mem::size_of::<SgDescriptor>();

    fn backing(count: usize) -> Vec<SgDescriptor> {
        (0..count).map(|_| SgDescriptor::new()).collect()
    }

    fn ring_over(bds: &mut [SgDescriptor]) -> DescriptorRing {
        let base = NonNull::new(bds.as_mut_ptr()).unwrap();
        unsafe { DescriptorRing::from_raw(base.cast(), bds.len()) }
    }

    #[test]
    fn descriptor_size_and_alignment() {
        assert_eq!(std::mem::size_of::<SgDescriptor>(), 64);
        assert_eq!(std::mem::align_of::<SgDescriptor>(), 64);
    }

    #[test]
    fn carve_counts_pairs() {
        let mut bds = backing(8);
        let base = NonNull::new(bds.as_mut_ptr()).unwrap().cast();

        // 4 pairs of (64-byte BD + 192-byte buffer) fit in 1024 bytes.
        let ring = unsafe { DescriptorRing::carve(base, 1024, 192) }.unwrap();
        assert_eq!(ring.count(), 4);

        // Exactly one pair.
        let ring = unsafe { DescriptorRing::carve(base, BD_SIZE + 192, 192) }.unwrap();
        assert_eq!(ring.count(), 1);

        // One byte short of a pair.
        assert!(unsafe { DescriptorRing::carve(base, BD_SIZE + 191, 192) }.is_none());
    }

    #[test]
    fn link_lays_out_chain_and_buffers() {
        const K: usize = 4;
        const BUF: usize = 256;
        const PHYS: u64 = 0x1e00_0000;

        let mut bds = backing(K);
        let mut ring = ring_over(&mut bds);
        ring.link(PHYS, BUF);

        for i in 0..K {
            let bd = ring.get(i);
            assert_eq!(
                bd.next_desc(),
                PHYS + (((i + 1) % K) * BD_SIZE) as u64,
                "chain must close through descriptor {i}"
            );
            assert_eq!(bd.buf_addr(), PHYS + (K * BD_SIZE) as u64 + (i * BUF) as u64);
            assert_eq!(bd.buf_len(), BUF);
            assert_eq!(bd.status().bits(), 0);
        }

        // Last descriptor wraps to the first.
        assert_eq!(ring.get(K - 1).next_desc(), PHYS);
    }

    #[test]
    fn single_descriptor_ring_points_at_itself() {
        let mut bds = backing(1);
        let mut ring = ring_over(&mut bds);
        ring.link(0x4000_0000, 512);

        assert_eq!(ring.get(0).next_desc(), 0x4000_0000);
        assert_eq!(ring.next_index(0), 0);
    }

    #[test]
    fn prime_transmit_marks_all_complete() {
        let mut bds = backing(3);
        let mut ring = ring_over(&mut bds);
        ring.link(0x1000, 64);
        ring.prime_transmit();

        for i in 0..3 {
            let bd = ring.get(i);
            assert!(bd.is_complete());
            assert!(bd.control().contains(BdControl::SOF | BdControl::EOF));
            assert_eq!(bd.buf_len(), 64, "priming must not disturb the length field");
        }
    }

    #[test]
    fn set_buf_len_replaces_field() {
        let mut bd = SgDescriptor::new();
        bd.set_buf_len(0x1000);
        bd.insert_control(BdControl::SOF | BdControl::EOF);
        bd.set_buf_len(6);

        assert_eq!(bd.buf_len(), 6, "most recent length must win");
        assert!(bd.control().contains(BdControl::SOF | BdControl::EOF));
    }

    #[test]
    fn complete_flag_round_trip() {
        let mut bd = SgDescriptor::new();
        assert!(!bd.is_complete());
        bd.set_complete();
        assert!(bd.is_complete());
        bd.clear_status_flags(BdStatus::COMPLETE | BdStatus::DMA_ERRORS);
        assert!(!bd.is_complete());
    }

    #[test]
    fn transferred_bytes_masks_flags() {
        let mut bd = SgDescriptor::new();
        unsafe {
            ptr::write_volatile(
                &mut bd.status,
                BdStatus::COMPLETE.bits() | BdStatus::RXEOF.bits() | 1500,
            );
        }
        assert_eq!(bd.transferred_bytes(), 1500);
        assert!(!bd.has_dma_error());

        unsafe { ptr::write_volatile(&mut bd.status, BdStatus::DMA_DEC_ERR.bits() | 8) };
        assert!(bd.has_dma_error());
    }

    #[test]
    fn index_round_trip() {
        let mut bds = backing(5);
        let ring = ring_over(&mut bds);
        for i in 0..5 {
            assert_eq!(ring.index_of(ring.get(i)), i);
        }
        assert_eq!(ring.next_index(4), 0);
    }
}
