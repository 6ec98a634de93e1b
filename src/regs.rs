// Userspace AXI DMA (Scatter/Gather) Driver
// SPDX-License-Identifier: MIT

//! AXI DMA register map and bitfield definitions.
//!
//! The layouts match the Scatter/Gather register space of the AXI DMA IP:
//! one register block per channel (MM2S at 0x00, S2MM at 0x30) with the
//! SG_CTL word in between at 0x2C. All registers are 32 bits wide; the
//! 64-bit descriptor pointers are split into low/high halves, and the
//! low-half write of a tail pointer is what commits a descriptor fetch.

use bitflags::bitflags;
use std::ptr;

bitflags! {
    /// DMA control register (DMACR) flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DmaControl: u32 {
        /// Run/Stop. Set to start the channel, clear to request a halt.
        const RS = 1 << 0;
        /// Soft reset of the whole engine; self-clearing.
        const RESET = 1 << 2;
        /// Keyhole operation (fixed-address bursts).
        const KEYHOLE = 1 << 3;
        /// Re-walk the BD ring forever without new tail writes.
        const CYCLIC_BD_EN = 1 << 4;
        /// Interrupt on complete.
        const IOC_IRQ_EN = 1 << 12;
        /// Delay interrupt.
        const DLY_IRQ_EN = 1 << 13;
        /// Error interrupt.
        const ERR_IRQ_EN = 1 << 14;
        const ALL_IRQ_EN = Self::IOC_IRQ_EN.bits() | Self::DLY_IRQ_EN.bits() | Self::ERR_IRQ_EN.bits();
        /// Interrupt threshold field (number of completed BDs per IRQ).
        const IRQ_THRESH = 0xff << 16;
        /// Interrupt delay field.
        const IRQ_DELAY = 0xff << 24;
    }
}

bitflags! {
    /// DMA status register (DMASR) flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DmaStatus: u32 {
        const HALTED = 1 << 0;
        const IDLE = 1 << 1;
        /// Scatter/Gather engine included in the synthesized core.
        const SG_INCLD = 1 << 3;
        const DMA_INT_ERR = 1 << 4;
        const DMA_SLV_ERR = 1 << 5;
        const DMA_DEC_ERR = 1 << 6;
        const DMA_ERRORS = Self::DMA_INT_ERR.bits() | Self::DMA_SLV_ERR.bits() | Self::DMA_DEC_ERR.bits();
        const SG_INT_ERR = 1 << 8;
        const SG_SLV_ERR = 1 << 9;
        const SG_DEC_ERR = 1 << 10;
        const SG_ERRORS = Self::SG_INT_ERR.bits() | Self::SG_SLV_ERR.bits() | Self::SG_DEC_ERR.bits();
        const ALL_ERRORS = Self::DMA_ERRORS.bits() | Self::SG_ERRORS.bits();
        /// Interrupt-request bits; write 1 to clear.
        const IOC_IRQ = 1 << 12;
        const DLY_IRQ = 1 << 13;
        const ERR_IRQ = 1 << 14;
        const ALL_IRQS = Self::IOC_IRQ.bits() | Self::DLY_IRQ.bits() | Self::ERR_IRQ.bits();
    }
}

bitflags! {
    /// Buffer descriptor control word flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BdControl: u32 {
        /// Bytes to transfer.
        const BUF_LEN = 0x3fff_ffff;
        /// End of frame.
        const EOF = 1 << 26;
        /// Start of frame.
        const SOF = 1 << 27;
    }
}

bitflags! {
    /// Buffer descriptor status word flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BdStatus: u32 {
        /// Bytes actually transferred.
        const XFER_BYTES = 0x03ff_ffff;
        const RXEOF = 1 << 26;
        const RXSOF = 1 << 27;
        const DMA_INT_ERR = 1 << 28;
        const DMA_SLV_ERR = 1 << 29;
        const DMA_DEC_ERR = 1 << 30;
        const DMA_ERRORS = Self::DMA_INT_ERR.bits() | Self::DMA_SLV_ERR.bits() | Self::DMA_DEC_ERR.bits();
        const COMPLETE = 1 << 31;
    }
}

/// Largest value the BD control length field can carry.
pub const SG_MAX_BUF_LEN: usize = BdControl::BUF_LEN.bits() as usize;

/// Scatter/Gather register block of one channel.
#[repr(C)]
pub struct SgRegisters {
    /// DMA control register.
    pub control: u32,
    /// DMA status register.
    pub status: u32,
    /// Current descriptor pointer, low 32 bits.
    pub current_desc_low: u32,
    /// Current descriptor pointer, high 32 bits.
    pub current_desc_high: u32,
    /// Tail descriptor pointer, low 32 bits. Write order: high then low;
    /// the low write triggers the fetch.
    pub tail_desc_low: u32,
    /// Tail descriptor pointer, high 32 bits.
    pub tail_desc_high: u32,
}

/// Full Scatter/Gather AXI DMA register window.
#[repr(C)]
pub struct MemoryMap {
    /// MM2S (host to device) channel registers.
    pub mm2s: SgRegisters,
    _reserved: [u32; 5],
    /// Scatter/Gather user and cache control.
    pub sg_ctl: u32,
    /// S2MM (device to host) channel registers.
    pub s2mm: SgRegisters,
}

const _: () = assert!(std::mem::size_of::<SgRegisters>() == 0x18);
const _: () = assert!(std::mem::offset_of!(MemoryMap, sg_ctl) == 0x2c);
const _: () = assert!(std::mem::offset_of!(MemoryMap, s2mm) == 0x30);

/// Volatile read of a 32-bit register.
///
/// # Safety
///
/// `reg` must point to a mapped, readable device register.
#[inline]
pub unsafe fn reg_read(reg: *const u32) -> u32 {
    ptr::read_volatile(reg)
}

/// Volatile write of a 32-bit register.
///
/// # Safety
///
/// `reg` must point to a mapped, writable device register.
#[inline]
pub unsafe fn reg_write(reg: *mut u32, value: u32) {
    ptr::write_volatile(reg, value);
}

/// Volatile read-modify-write setting `bits`.
///
/// # Safety
///
/// Same requirements as [`reg_read`] and [`reg_write`].
#[inline]
pub unsafe fn reg_set(reg: *mut u32, bits: u32) {
    reg_write(reg, reg_read(reg) | bits);
}

/// Volatile read-modify-write clearing `bits`.
///
/// # Safety
///
/// Same requirements as [`reg_read`] and [`reg_write`].
#[inline]
pub unsafe fn reg_clear(reg: *mut u32, bits: u32) {
    reg_write(reg, reg_read(reg) & !bits);
}

/// Volatile check that all of `bits` are set.
///
/// # Safety
///
/// Same requirements as [`reg_read`].
#[inline]
pub unsafe fn reg_check(reg: *const u32, bits: u32) -> bool {
    (reg_read(reg) & bits) == bits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_block_layout() {
        assert_eq!(std::mem::offset_of!(SgRegisters, status), 0x04);
        assert_eq!(std::mem::offset_of!(SgRegisters, current_desc_low), 0x08);
        assert_eq!(std::mem::offset_of!(SgRegisters, tail_desc_low), 0x10);
        assert_eq!(std::mem::offset_of!(SgRegisters, tail_desc_high), 0x14);
        assert_eq!(std::mem::offset_of!(MemoryMap, sg_ctl), 0x2c);
        assert_eq!(std::mem::offset_of!(MemoryMap, s2mm), 0x30);
    }

    #[test]
    fn control_flag_values() {
        assert_eq!(DmaControl::RS.bits(), 1);
        assert_eq!(DmaControl::RESET.bits(), 1 << 2);
        assert_eq!(DmaControl::CYCLIC_BD_EN.bits(), 1 << 4);
        assert_eq!(DmaControl::IOC_IRQ_EN.bits(), 1 << 12);
        assert_eq!(DmaControl::ERR_IRQ_EN.bits(), 1 << 14);
        assert_eq!(DmaControl::IRQ_THRESH.bits(), 0x00ff_0000);
    }

    #[test]
    fn status_flag_values() {
        assert_eq!(DmaStatus::HALTED.bits(), 1);
        assert_eq!(DmaStatus::SG_INCLD.bits(), 1 << 3);
        assert_eq!(DmaStatus::ALL_IRQS.bits(), 0x7000);
        assert_eq!(DmaStatus::DMA_ERRORS.bits(), 0x70);
        assert_eq!(DmaStatus::SG_ERRORS.bits(), 0x700);
    }

    #[test]
    fn bd_field_masks() {
        assert_eq!(BdControl::BUF_LEN.bits(), 0x3fff_ffff);
        assert_eq!(BdStatus::XFER_BYTES.bits(), 0x03ff_ffff);
        assert_eq!(BdStatus::COMPLETE.bits(), 0x8000_0000);
        assert_eq!(BdStatus::DMA_ERRORS.bits(), 0x7000_0000);
    }

    #[test]
    fn rmw_helpers() {
        let mut word = 0u32;
        unsafe {
            reg_set(&mut word, DmaControl::RS.bits() | DmaControl::IOC_IRQ_EN.bits());
            assert!(reg_check(&word, DmaControl::RS.bits()));
            reg_clear(&mut word, DmaControl::RS.bits());
            assert!(!reg_check(&word, DmaControl::RS.bits()));
            assert!(reg_check(&word, DmaControl::IOC_IRQ_EN.bits()));
        }
    }
}
