// Userspace AXI DMA (Scatter/Gather) Driver
// SPDX-License-Identifier: MIT

//! # Userspace AXI DMA Scatter/Gather Driver
//!
//! This crate drives the Scatter/Gather AXI DMA engine from user space on
//! Linux, using two kernel facilities:
//!
//! - **UIO** exposes the engine's register window and interrupt line as
//!   `/dev/uio<N>`;
//! - **u-dma-buf** exports a physically contiguous, DMA-coherent buffer
//!   as `/dev/<name>` with its physical address in sysfs.
//!
//! The coherent buffer is carved into a ring of 64-byte buffer
//! descriptors followed by fixed-size payload buffers. Applications see
//! the ring as a buffer pool:
//!
//! | Direction | Mode | Flow |
//! |-----------|--------|------|
//! | mem-to-dev (MM2S) | normal | `get_buffer` → fill → `set_payload` → `submit_buffer` |
//! | dev-to-mem (S2MM) | cyclic | `get_buffer` → read → `mark_reusable` |
//!
//! Completion is interrupt driven: `get_buffer` sleeps in `poll(2)` on the
//! UIO fd until the hardware marks the next descriptor complete, with the
//! usual poll timeout semantics (-1 blocks, 0 is non-blocking).
//!
//! ## Example
//!
//! ```rust,no_run
//! use uaxidma::{AxiDma, Direction, DmaConfig, DmaMode};
//!
//! fn main() -> Result<(), uaxidma::AxiDmaError> {
//!     let mut dma = AxiDma::new(DmaConfig {
//!         udmabuf_name: "udmabuf1".into(),
//!         udmabuf_size: 0,
//!         udmabuf_offset: 0,
//!         uio_name: "axidma_tx".into(),
//!         mode: DmaMode::Normal,
//!         direction: Direction::MemToDev,
//!         buffer_size: 256 << 10,
//!     })?;
//!
//!     let mut buf = dma.get_buffer(1000)?;
//!     buf.data_mut()[..5].copy_from_slice(b"hello");
//!     buf.set_payload(5)?;
//!     dma.submit_buffer(buf)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Requirements
//!
//! - A device tree exposing the AXI DMA through `uio_pdrv_genirq` and a
//!   u-dma-buf region large enough for at least one descriptor plus one
//!   buffer.
//! - One channel (one direction) per `AxiDma` instance. A full-duplex
//!   setup uses two instances over disjoint UIO devices and u-dma-buf
//!   regions; they may live in different threads.

// Module declarations
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod fence;
pub mod pool;
pub mod regs;
pub mod udmabuf;
pub mod uio;

// Re-exports for convenient access
pub use descriptor::{DescriptorRing, SgDescriptor};
pub use engine::{Direction, DmaEngine, DmaMode, PollStatus};
pub use error::{AxiDmaError, DmaResult};
pub use pool::{AxiDma, DmaBuffer, DmaConfig};
pub use regs::{BdControl, BdStatus, DmaControl, DmaStatus};
pub use udmabuf::UdmaBuf;
pub use uio::UioDevice;
