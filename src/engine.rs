// Userspace AXI DMA (Scatter/Gather) Driver
// SPDX-License-Identifier: MIT

//! AXI DMA engine controller.
//!
//! [`DmaEngine`] owns one channel of the engine: its register mirror, its
//! UIO interrupt fd, the coherent arena, and the descriptor ring carved
//! from it. It implements the MMIO control protocol (reset, start in
//! normal or cyclic mode, stop, interrupt clean/poll, per-descriptor
//! transfer control) with the barrier discipline the hardware requires:
//!
//! - descriptor/payload stores are ordered before the MMIO store that
//!   hands them to the engine (store fence before the tail-low commit);
//! - a COMPLETE flag observed set is followed by a full fence before any
//!   transfer length or payload byte is read;
//! - 64-bit split registers are written high half first; the low-half
//!   write is the architectural commit.
//!
//! A channel is single-threaded; two channels (one per direction) may run
//! in different threads because they own disjoint register mirrors, UIO
//! devices and arenas.

use crate::descriptor::{DescriptorRing, SgDescriptor};
use crate::error::{AxiDmaError, DmaResult};
use crate::fence;
use crate::regs::{
    reg_check, reg_clear, reg_read, reg_set, reg_write, BdControl, BdStatus, DmaControl,
    DmaStatus, MemoryMap, SgRegisters, SG_MAX_BUF_LEN,
};
use crate::udmabuf::UdmaBuf;
use crate::uio::UioDevice;
use std::ptr::{addr_of, addr_of_mut, NonNull};

/// AXI4 bus width in bytes; buffer addresses must be bus-width aligned
/// when the Data Realignment Engine is not in use.
const AXI_BUS_WIDTH: usize = 8;

/// Spin iterations allowed for reset and halt to take effect.
const SPIN_BUDGET: u32 = 128;

/// Operational mode of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaMode {
    /// The engine stops at the tail descriptor; each transfer requires a
    /// tail-pointer write.
    Normal,
    /// The engine re-walks the ring forever without application
    /// participation.
    Cyclic,
}

/// Transfer direction of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host memory to fabric stream (MM2S).
    MemToDev,
    /// Fabric stream to host memory (S2MM).
    DevToMem,
}

/// Outcome of waiting for a completion interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// An interrupt arrived and was consumed.
    Ready,
    /// The requested interval elapsed without an interrupt.
    TimedOut,
}

/// One channel of the Scatter/Gather AXI DMA engine.
pub struct DmaEngine {
    udmabuf: UdmaBuf,
    uio: UioDevice,
    mode: DmaMode,
    direction: Direction,
    buffer_size: usize,
    regs: NonNull<MemoryMap>,
    ring: DescriptorRing,
    payload_base: NonNull<u8>,
}

// SAFETY: the register window, arena and fd are exclusively owned by this
// engine; a full-duplex setup uses two engines over disjoint devices.
unsafe impl Send for DmaEngine {}

impl DmaEngine {
    /// Take ownership of the collaborators and bring the channel to the
    /// ready state: map the register window, verify the Scatter/Gather
    /// block is present, and lay out the descriptor ring over the arena.
    ///
    /// `buffer_size` is rounded up to the AXI bus width. The engine is
    /// laid out but not started; call [`DmaEngine::start`].
    ///
    /// # Errors
    ///
    /// - [`AxiDmaError::BufferTooLarge`] when the rounded size exceeds the
    ///   30-bit BD length field;
    /// - [`AxiDmaError::MmapFailed`] when the register window cannot be
    ///   mapped;
    /// - [`AxiDmaError::SgNotPresent`] when the core was synthesized
    ///   without the Scatter/Gather engine;
    /// - [`AxiDmaError::ArenaTooSmall`] when not even one descriptor plus
    ///   buffer pair fits in the arena.
    pub fn new(
        udmabuf: UdmaBuf,
        mut uio: UioDevice,
        mode: DmaMode,
        direction: Direction,
        buffer_size: usize,
    ) -> DmaResult<Self> {
        let buffer_size = validate_buffer_size(buffer_size)?;

        let regs: NonNull<MemoryMap> = uio.map_registers()?.cast();

        let status = unsafe {
            match direction {
                Direction::MemToDev => addr_of!((*regs.as_ptr()).mm2s.status),
                Direction::DevToMem => addr_of!((*regs.as_ptr()).s2mm.status),
            }
        };
        if !unsafe { reg_check(status, DmaStatus::SG_INCLD.bits()) } {
            return Err(AxiDmaError::SgNotPresent);
        }

        // Descriptors sit at the base of the arena, buffers right after
        // the last descriptor.
        let mut ring = unsafe { DescriptorRing::carve(udmabuf.virt(), udmabuf.len(), buffer_size) }
            .ok_or(AxiDmaError::ArenaTooSmall {
                arena: udmabuf.len(),
                buffer_size,
            })?;

        ring.link(udmabuf.phys_addr(), buffer_size);
        if direction == Direction::MemToDev {
            ring.prime_transmit();
        }

        let payload_base =
            unsafe { NonNull::new_unchecked(udmabuf.virt().as_ptr().add(ring.table_bytes())) };

        log::info!(
            "AXI DMA uio{} ready: {:?}/{:?}, {} buffers of {} bytes at {:#x}",
            uio.number(),
            mode,
            direction,
            ring.count(),
            buffer_size,
            udmabuf.phys_addr(),
        );

        Ok(Self {
            udmabuf,
            uio,
            mode,
            direction,
            buffer_size,
            regs,
            ring,
            payload_base,
        })
    }

    /// Start the channel in its configured mode. Both paths begin with a
    /// soft reset to run from a known state.
    pub fn start(&mut self) -> DmaResult<()> {
        match self.mode {
            DmaMode::Normal => self.start_normal(),
            DmaMode::Cyclic => self.start_cyclic(),
        }
    }

    /// Soft-reset the whole engine and wait for the bit to self-clear.
    ///
    /// Either control mirror resets both channels; the MM2S one is used.
    pub fn reset(&mut self) -> DmaResult<()> {
        let control = unsafe { addr_of_mut!((*self.regs.as_ptr()).mm2s.control) };
        unsafe { reg_set(control, DmaControl::RESET.bits()) };

        let mut spins = SPIN_BUDGET;
        while unsafe { reg_check(control, DmaControl::RESET.bits()) } {
            spins -= 1;
            if spins == 0 {
                return Err(AxiDmaError::ResetTimeout);
            }
            std::hint::spin_loop();
        }

        fence::dmb_sy();
        Ok(())
    }

    /// Stop the ongoing operation: clear the run bit and wait for HALTED.
    pub fn stop(&mut self) -> DmaResult<()> {
        let channel = self.channel();
        unsafe { reg_clear(addr_of_mut!((*channel).control), DmaControl::RS.bits()) };

        let status = unsafe { addr_of!((*channel).status) };
        let mut spins = SPIN_BUDGET;
        while !unsafe { reg_check(status, DmaStatus::HALTED.bits()) } {
            spins -= 1;
            if spins == 0 {
                return Err(AxiDmaError::HaltTimeout);
            }
            std::hint::spin_loop();
        }

        fence::dmb_sy();
        Ok(())
    }

    fn start_normal(&mut self) -> DmaResult<()> {
        self.reset()?;

        let channel = self.channel();
        let first_desc = self.udmabuf.phys_addr();

        unsafe {
            let control = addr_of_mut!((*channel).control);
            reg_set(
                control,
                (DmaControl::IOC_IRQ_EN | DmaControl::ERR_IRQ_EN).bits(),
            );
            set_irq_threshold(control, 1);

            reg_write(
                addr_of_mut!((*channel).current_desc_high),
                (first_desc >> 32) as u32,
            );
            reg_write(addr_of_mut!((*channel).current_desc_low), first_desc as u32);

            // Run, but leave the tail unwritten: the engine stays idle
            // until the first transfer commits a tail pointer.
            reg_set(control, DmaControl::RS.bits());
        }

        Ok(())
    }

    fn start_cyclic(&mut self) -> DmaResult<()> {
        self.reset()?;

        // Cyclic operation is receive-side only: always the S2MM mirror.
        let channel = unsafe { addr_of_mut!((*self.regs.as_ptr()).s2mm) };
        let first_desc = self.udmabuf.phys_addr();

        unsafe {
            let control = addr_of_mut!((*channel).control);
            reg_set(
                control,
                (DmaControl::CYCLIC_BD_EN | DmaControl::IOC_IRQ_EN | DmaControl::ERR_IRQ_EN)
                    .bits(),
            );
            set_irq_threshold(control, 1);

            reg_write(
                addr_of_mut!((*channel).current_desc_high),
                (first_desc >> 32) as u32,
            );
            reg_write(addr_of_mut!((*channel).current_desc_low), first_desc as u32);

            reg_set(control, DmaControl::RS.bits());

            reg_write(addr_of_mut!((*channel).tail_desc_high), 0);
        }

        // Interrupts stay masked until poll_interrupt unmasks them, so
        // the first unmask edge is meaningful.
        self.uio.irq_mask()?;

        fence::dmb_st();

        // The tail value is ignored in cyclic mode; only the write edge
        // triggers the first BD fetch. A value outside the chain is
        // recommended.
        unsafe {
            reg_write(addr_of_mut!((*channel).tail_desc_low), 0xffff_ffff);
        }

        Ok(())
    }

    /// Clear the completion and error interrupt-request bits.
    ///
    /// The DMASR interrupt bits are write-1-to-clear.
    pub fn clean_interrupt(&mut self) {
        let channel = self.channel();
        unsafe {
            reg_write(
                addr_of_mut!((*channel).status),
                (DmaStatus::IOC_IRQ | DmaStatus::ERR_IRQ).bits(),
            );
        }
        fence::dmb_st();
    }

    /// Unmask the channel interrupt and wait up to `timeout_ms`
    /// milliseconds for it to fire (-1 blocks indefinitely, 0 returns
    /// immediately).
    ///
    /// Signal interruptions restart the wait with the same timeout, so an
    /// interruption storm can exceed the nominal budget; callers that
    /// need a strict deadline must re-check a clock themselves.
    pub fn poll_interrupt(&mut self, timeout_ms: i32) -> DmaResult<PollStatus> {
        self.uio.irq_unmask()?;

        let mut fds = libc::pollfd {
            fd: self.uio.fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        loop {
            let rc = unsafe { libc::poll(&mut fds, 1, timeout_ms) };

            if rc < 0 {
                let err = std::io::Error::last_os_error();
                match err.raw_os_error() {
                    // Pretend no time has elapsed.
                    Some(libc::EINTR) | Some(libc::EAGAIN) => continue,
                    _ => return Err(err.into()),
                }
            }

            if rc == 0 {
                fence::dmb_sy();
                return Ok(PollStatus::TimedOut);
            }

            // The fd just polled readable, so this returns immediately.
            self.uio.irq_consume()?;

            // No speculative use of post-interrupt state.
            fence::dmb_sy();
            return Ok(PollStatus::Ready);
        }
    }

    /// Hand descriptor `index` to the engine for a transmit of `len`
    /// bytes.
    ///
    /// The descriptor is re-armed (frame markers, length, cleared
    /// completion/error bits) and the MM2S tail pointer is committed:
    /// high half, store fence, low half. Everything written to the
    /// payload before this call is visible to the engine.
    pub fn transfer_buffer(&mut self, index: usize, len: usize) -> DmaResult<()> {
        if len > self.buffer_size {
            return Err(AxiDmaError::PayloadTooLarge {
                len,
                capacity: self.buffer_size,
            });
        }

        let bd = self.ring.get_mut(index);
        bd.insert_control(BdControl::SOF | BdControl::EOF);
        bd.set_buf_len(len);
        bd.clear_status_flags(BdStatus::COMPLETE | BdStatus::DMA_ERRORS);

        let tail =
            self.udmabuf.phys_addr() + (index * std::mem::size_of::<SgDescriptor>()) as u64;

        unsafe {
            let mm2s = addr_of_mut!((*self.regs.as_ptr()).mm2s);
            reg_write(addr_of_mut!((*mm2s).tail_desc_high), (tail >> 32) as u32);
            fence::dmb_st();
            // The commit point: the engine fetches up to this descriptor.
            reg_write(addr_of_mut!((*mm2s).tail_desc_low), tail as u32);
        }

        Ok(())
    }

    /// Whether the hardware has completed descriptor `index`.
    pub fn is_buffer_complete(&self, index: usize) -> bool {
        let complete = self.ring.get(index).is_complete();
        if complete {
            fence::dmb_sy();
        }
        complete
    }

    /// Clear the COMPLETE flag of descriptor `index` so the next pass can
    /// be detected.
    pub fn clear_complete_flag(&mut self, index: usize) {
        self.ring.get_mut(index).clear_status_flags(BdStatus::COMPLETE);
        fence::dmb_st();
    }

    /// Bytes the hardware transferred through descriptor `index`.
    pub fn buffer_len(&self, index: usize) -> usize {
        let len = self.ring.get(index).transferred_bytes();
        fence::dmb_sy();
        len
    }

    /// Raw status word of descriptor `index`, for error inspection after
    /// a completed transfer.
    pub fn descriptor_status(&self, index: usize) -> BdStatus {
        self.ring.get(index).status()
    }

    /// Virtual address of the payload buffer behind descriptor `index`.
    pub fn virt_buffer_ptr(&self, index: usize) -> NonNull<u8> {
        // In bounds: the ring was carved so that every payload lies
        // wholly inside the arena mapping.
        unsafe {
            NonNull::new_unchecked(self.payload_base.as_ptr().add(index * self.buffer_size))
        }
    }

    /// Number of descriptor/buffer pairs in the ring.
    pub fn buffer_count(&self) -> usize {
        self.ring.count()
    }

    /// Usable size of each buffer in bytes (after bus-width rounding).
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Configured direction of this channel.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Configured mode of this channel.
    pub fn mode(&self) -> DmaMode {
        self.mode
    }

    /// Register block of the configured direction.
    fn channel(&self) -> *mut SgRegisters {
        unsafe {
            match self.direction {
                Direction::MemToDev => addr_of_mut!((*self.regs.as_ptr()).mm2s),
                Direction::DevToMem => addr_of_mut!((*self.regs.as_ptr()).s2mm),
            }
        }
    }
}

impl Drop for DmaEngine {
    fn drop(&mut self) {
        if self.reset().is_err() {
            log::warn!("AXI DMA reset on drop timed out");
        }
    }
}

/// Replace the IRQ threshold field (completed BDs per interrupt).
///
/// # Safety
///
/// `control` must point to a mapped DMACR register.
unsafe fn set_irq_threshold(control: *mut u32, threshold: u32) {
    let value = (reg_read(control) & !DmaControl::IRQ_THRESH.bits())
        | ((threshold << 16) & DmaControl::IRQ_THRESH.bits());
    reg_write(control, value);
}

/// Round the requested buffer size to the bus width and check it fits the
/// BD length field.
fn validate_buffer_size(requested: usize) -> DmaResult<usize> {
    if requested == 0 {
        return Err(AxiDmaError::InvalidArgument(
            "buffer size must be non-zero".into(),
        ));
    }

    let rounded = match requested % AXI_BUS_WIDTH {
        0 => requested,
        rem => requested + AXI_BUS_WIDTH - rem,
    };

    if rounded > SG_MAX_BUF_LEN {
        return Err(AxiDmaError::BufferTooLarge {
            requested: rounded,
            max: SG_MAX_BUF_LEN,
        });
    }

    Ok(rounded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_size_rounds_to_bus_width() {
        assert_eq!(validate_buffer_size(6).unwrap(), 8);
        assert_eq!(validate_buffer_size(8).unwrap(), 8);
        assert_eq!(validate_buffer_size(9).unwrap(), 16);
        assert_eq!(validate_buffer_size(256 << 10).unwrap(), 256 << 10);
    }

    #[test]
    fn zero_buffer_size_is_rejected() {
        assert!(matches!(
            validate_buffer_size(0),
            Err(AxiDmaError::InvalidArgument(_))
        ));
    }

    #[test]
    fn oversized_buffer_is_rejected() {
        // The largest representable length, already bus-width aligned.
        assert_eq!(validate_buffer_size(0x3fff_fff8).unwrap(), 0x3fff_fff8);

        // Rounding pushes the field over its maximum.
        assert!(matches!(
            validate_buffer_size(0x3fff_fffa),
            Err(AxiDmaError::BufferTooLarge { .. })
        ));
        assert!(matches!(
            validate_buffer_size(0x4000_0000),
            Err(AxiDmaError::BufferTooLarge { .. })
        ));
    }

    #[test]
    fn irq_threshold_replaces_field() {
        let mut control = DmaControl::RS.bits() | DmaControl::IOC_IRQ_EN.bits() | (0x40 << 16);
        unsafe { set_irq_threshold(&mut control, 1) };
        assert_eq!(control & DmaControl::IRQ_THRESH.bits(), 1 << 16);
        assert!(control & DmaControl::RS.bits() != 0);
        assert!(control & DmaControl::IOC_IRQ_EN.bits() != 0);
    }
}
