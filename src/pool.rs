// Userspace AXI DMA (Scatter/Gather) Driver
// SPDX-License-Identifier: MIT

//! Buffer-pool façade over one DMA channel.
//!
//! [`AxiDma`] wraps a [`DmaEngine`] and hands the descriptor ring to the
//! application as a pool of fixed-size buffers:
//!
//! - mem-to-dev: [`AxiDma::get_buffer`], fill the slice, set the payload
//!   length, [`AxiDma::submit_buffer`];
//! - dev-to-mem: [`AxiDma::get_buffer`], read the received bytes,
//!   [`AxiDma::mark_reusable`].
//!
//! Buffers must be returned in the order they were acquired; submitting
//! out of order corrupts the ring walk at the hardware level and is not
//! detected. In normal mode the pool bounds the number of outstanding
//! acquisitions to the ring size and reports
//! [`AxiDmaError::PoolExhausted`] past it.

use crate::engine::{Direction, DmaEngine, DmaMode, PollStatus};
use crate::error::{AxiDmaError, DmaResult};
use crate::regs::BdStatus;
use crate::udmabuf::UdmaBuf;
use crate::uio::UioDevice;
use std::ptr::NonNull;

/// Everything needed to construct a DMA channel.
#[derive(Debug, Clone)]
pub struct DmaConfig {
    /// u-dma-buf region name; the node is `/dev/<name>`.
    pub udmabuf_name: String,
    /// Bytes of the region to use; 0 uses everything past the offset.
    pub udmabuf_size: usize,
    /// Page-aligned offset into the region.
    pub udmabuf_offset: usize,
    /// UIO device name as found in `/sys/class/uio/uio<N>/name`.
    pub uio_name: String,
    /// Operational mode.
    pub mode: DmaMode,
    /// Transfer direction.
    pub direction: Direction,
    /// Size of each buffer in bytes (rounded up to the bus width).
    pub buffer_size: usize,
}

/// A buffer slot on loan from the pool.
///
/// The handle aliases the channel's coherent arena; it must be returned
/// to the pool that minted it (via [`AxiDma::submit_buffer`] or
/// [`AxiDma::mark_reusable`]) and must not outlive the pool.
#[derive(Debug)]
pub struct DmaBuffer {
    index: usize,
    data: NonNull<u8>,
    capacity: usize,
    length: usize,
}

// SAFETY: the handle points into a mapping owned by the channel; the
// single-thread-per-channel model applies.
unsafe impl Send for DmaBuffer {}

impl DmaBuffer {
    /// Received (dev-to-mem) or staged (mem-to-dev) bytes.
    pub fn data(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.length) }
    }

    /// Writable view of the whole buffer, for staging a payload.
    pub fn data_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr(), self.capacity) }
    }

    /// Number of payload bytes in the buffer.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether the buffer carries no payload.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Maximum number of bytes the buffer can carry.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Set the number of bytes to be sent.
    ///
    /// # Errors
    ///
    /// Fails when `len` exceeds the buffer's capacity.
    pub fn set_payload(&mut self, len: usize) -> DmaResult<()> {
        if len > self.capacity {
            return Err(AxiDmaError::PayloadTooLarge {
                len,
                capacity: self.capacity,
            });
        }
        self.length = len;
        Ok(())
    }
}

/// Cursor and availability accounting over the ring of slots.
///
/// Acquisition walks the ring in order; in limited mode (normal, one-shot
/// transfers) the count of unreturned slots is bounded by the ring size.
#[derive(Debug)]
struct SlotRing {
    count: usize,
    next: usize,
    available: usize,
    limited: bool,
}

impl SlotRing {
    fn new(count: usize, limited: bool) -> Self {
        Self {
            count,
            next: 0,
            available: count,
            limited,
        }
    }

    /// True when no further slot may be handed out before a release.
    fn empty(&self) -> bool {
        self.limited && self.available == 0
    }

    /// Slot the next acquisition will return.
    fn next(&self) -> usize {
        self.next
    }

    /// Account for a handed-out slot and advance the cursor.
    fn acquire(&mut self) -> usize {
        let index = self.next;
        self.next = (self.next + 1) % self.count;
        if self.limited {
            self.available -= 1;
        }
        index
    }

    /// Account for a returned slot.
    fn release(&mut self) {
        if self.limited {
            self.available += 1;
        }
    }
}

/// One DMA channel presented as a pool of transfer buffers.
pub struct AxiDma {
    engine: DmaEngine,
    slots: SlotRing,
}

impl AxiDma {
    /// Open the named u-dma-buf and UIO devices, lay out the descriptor
    /// ring, and start the engine in the configured mode.
    ///
    /// # Errors
    ///
    /// Any collaborator or engine construction failure; see
    /// [`AxiDmaError`].
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use uaxidma::{AxiDma, Direction, DmaConfig, DmaMode};
    ///
    /// let mut dma = AxiDma::new(DmaConfig {
    ///     udmabuf_name: "udmabuf0".into(),
    ///     udmabuf_size: 0,
    ///     udmabuf_offset: 0,
    ///     uio_name: "axidma_rx".into(),
    ///     mode: DmaMode::Cyclic,
    ///     direction: Direction::DevToMem,
    ///     buffer_size: 256 << 10,
    /// })?;
    ///
    /// let buf = dma.get_buffer(1000)?;
    /// println!("received {} bytes", buf.len());
    /// dma.mark_reusable(buf)?;
    /// # Ok::<(), uaxidma::AxiDmaError>(())
    /// ```
    pub fn new(config: DmaConfig) -> DmaResult<Self> {
        let udmabuf = UdmaBuf::open(
            &config.udmabuf_name,
            config.udmabuf_size,
            config.udmabuf_offset,
        )?;
        let uio = UioDevice::open(&config.uio_name)?;

        let mut engine = DmaEngine::new(
            udmabuf,
            uio,
            config.mode,
            config.direction,
            config.buffer_size,
        )?;
        engine.start()?;

        // Back-pressure only applies to one-shot operation: cyclic mode
        // recycles slots without submission, so the pool never empties.
        let limited = engine.mode() == DmaMode::Normal;
        let slots = SlotRing::new(engine.buffer_count(), limited);

        Ok(Self { engine, slots })
    }

    /// Acquire the next buffer from the pool, waiting up to `timeout_ms`
    /// milliseconds for a completion (-1 blocks indefinitely, 0 does not
    /// block).
    ///
    /// For dev-to-mem channels the returned buffer carries the bytes the
    /// fabric wrote; for mem-to-dev it is an empty buffer ready for
    /// staging.
    ///
    /// # Errors
    ///
    /// - [`AxiDmaError::PoolExhausted`] when every slot is acquired and
    ///   unsubmitted (recoverable: submit one first);
    /// - [`AxiDmaError::Timeout`] when no completion interrupt arrived in
    ///   time (recoverable);
    /// - [`AxiDmaError::Io`] for unrecoverable poll/read failures.
    pub fn get_buffer(&mut self, timeout_ms: i32) -> DmaResult<DmaBuffer> {
        if self.slots.empty() {
            return Err(AxiDmaError::PoolExhausted);
        }

        // Stale interrupts must be cleared before checking for
        // completion; an interrupt firing between the check and the poll
        // must not be masked by a stale one consumed here.
        self.engine.clean_interrupt();

        let index = self.slots.next();

        // In cyclic mode any number of buffers may have completed between
        // calls; only wait when the slot is still in flight.
        if !self.engine.is_buffer_complete(index) {
            match self.engine.poll_interrupt(timeout_ms)? {
                PollStatus::Ready => {}
                PollStatus::TimedOut => return Err(AxiDmaError::Timeout),
            }
        }

        let length = match self.engine.direction() {
            Direction::DevToMem => self.engine.buffer_len(index),
            Direction::MemToDev => 0,
        };

        let buffer = DmaBuffer {
            index,
            data: self.engine.virt_buffer_ptr(index),
            capacity: self.engine.buffer_size(),
            length,
        };

        self.slots.acquire();

        Ok(buffer)
    }

    /// Submit a staged buffer for transmission to the device endpoint.
    ///
    /// Mem-to-dev channels only. Buffers must be submitted in acquisition
    /// order.
    pub fn submit_buffer(&mut self, buffer: DmaBuffer) -> DmaResult<()> {
        if self.engine.direction() != Direction::MemToDev {
            return Err(AxiDmaError::WrongDirection {
                expected: "mem-to-dev",
            });
        }

        self.engine.transfer_buffer(buffer.index, buffer.length)?;
        self.slots.release();
        Ok(())
    }

    /// Return a drained buffer to the ring without disturbing the cyclic
    /// run.
    ///
    /// Dev-to-mem channels only. Buffers must be returned in acquisition
    /// order.
    pub fn mark_reusable(&mut self, buffer: DmaBuffer) -> DmaResult<()> {
        if self.engine.direction() != Direction::DevToMem {
            return Err(AxiDmaError::WrongDirection {
                expected: "dev-to-mem",
            });
        }

        self.engine.clear_complete_flag(buffer.index);
        self.slots.release();
        Ok(())
    }

    /// Hardware status word of a buffer's descriptor, for inspecting the
    /// DMA error bits after a completed transfer.
    pub fn buffer_status(&self, buffer: &DmaBuffer) -> BdStatus {
        self.engine.descriptor_status(buffer.index)
    }

    /// Number of buffers in the pool.
    pub fn buffer_count(&self) -> usize {
        self.engine.buffer_count()
    }

    /// Usable size of each buffer in bytes.
    pub fn buffer_size(&self) -> usize {
        self.engine.buffer_size()
    }

    /// The underlying engine, for channel-level control (stop, reset).
    pub fn engine_mut(&mut self) -> &mut DmaEngine {
        &mut self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limited_ring_applies_back_pressure() {
        let mut slots = SlotRing::new(2, true);

        assert!(!slots.empty());
        assert_eq!(slots.acquire(), 0);
        assert_eq!(slots.acquire(), 1);

        // Third acquisition without an intervening release must fail.
        assert!(slots.empty());

        slots.release();
        assert!(!slots.empty());
        assert_eq!(slots.acquire(), 0);
    }

    #[test]
    fn cursor_wraps_around_the_ring() {
        let mut slots = SlotRing::new(3, true);
        let mut touched = Vec::new();

        for _ in 0..10 {
            touched.push(slots.acquire());
            slots.release();
        }

        assert_eq!(touched, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn unlimited_ring_never_empties() {
        let mut slots = SlotRing::new(1, false);

        for _ in 0..100 {
            assert!(!slots.empty());
            assert_eq!(slots.acquire(), 0);
        }
    }

    #[test]
    fn payload_cannot_exceed_capacity() {
        let mut backing = [0u8; 32];
        let mut buffer = DmaBuffer {
            index: 0,
            data: NonNull::new(backing.as_mut_ptr()).unwrap(),
            capacity: backing.len(),
            length: 0,
        };

        assert!(buffer.set_payload(32).is_ok());
        assert_eq!(buffer.len(), 32);

        assert!(matches!(
            buffer.set_payload(33),
            Err(AxiDmaError::PayloadTooLarge { len: 33, capacity: 32 })
        ));
        assert_eq!(buffer.len(), 32, "failed resize must not change the length");
    }

    #[test]
    fn staged_bytes_are_visible_through_data() {
        let mut backing = [0u8; 16];
        let mut buffer = DmaBuffer {
            index: 0,
            data: NonNull::new(backing.as_mut_ptr()).unwrap(),
            capacity: backing.len(),
            length: 0,
        };

        buffer.data_mut()[..6].copy_from_slice(&[4, 8, 15, 16, 23, 42]);
        buffer.set_payload(6).unwrap();

        assert_eq!(buffer.data(), &[4, 8, 15, 16, 23, 42]);
    }
}
