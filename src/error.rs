// Userspace AXI DMA (Scatter/Gather) Driver
// SPDX-License-Identifier: MIT

//! Error types for DMA channel operations.

use thiserror::Error;

/// Errors that can occur while constructing or operating a DMA channel.
#[derive(Debug, Error)]
pub enum AxiDmaError {
    /// No UIO device with the requested name was found.
    #[error("no UIO device named {0:?} found under /sys/class/uio")]
    DeviceNotFound(String),

    /// A sysfs attribute of a collaborator device could not be parsed.
    #[error("invalid sysfs attribute {path}: {reason}")]
    InvalidAttribute { path: String, reason: String },

    /// Memory mapping failed.
    #[error("mmap failed: {0}")]
    MmapFailed(String),

    /// Requested per-buffer size exceeds the 30-bit BD length field.
    #[error("buffer size {requested:#x} exceeds the BD length field maximum {max:#x}")]
    BufferTooLarge { requested: usize, max: usize },

    /// The coherent arena cannot hold a single descriptor/buffer pair.
    #[error("u-dma-buf region of {arena} bytes cannot hold one descriptor plus one {buffer_size}-byte buffer")]
    ArenaTooSmall { arena: usize, buffer_size: usize },

    /// The engine was synthesized without the Scatter/Gather block.
    #[error("AXI DMA reports no Scatter/Gather engine (SGIncld not set)")]
    SgNotPresent,

    /// Soft reset did not self-clear within the spin budget.
    #[error("AXI DMA reset did not complete")]
    ResetTimeout,

    /// The channel did not report HALTED within the spin budget after the
    /// run bit was cleared.
    #[error("AXI DMA did not halt")]
    HaltTimeout,

    /// All buffers are acquired and unsubmitted; submit one first.
    /// The EAGAIN of this API: fully recoverable.
    #[error("buffer pool exhausted: submit an outstanding buffer first")]
    PoolExhausted,

    /// No completion interrupt arrived within the requested interval.
    /// Fully recoverable.
    #[error("timed out waiting for a completion interrupt")]
    Timeout,

    /// Payload length exceeds the slot capacity.
    #[error("payload of {len} bytes exceeds buffer capacity of {capacity}")]
    PayloadTooLarge { len: usize, capacity: usize },

    /// A direction-specific operation was called on a channel configured
    /// for the opposite direction.
    #[error("operation only valid for {expected} channels")]
    WrongDirection { expected: &'static str },

    /// Invalid argument provided.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error from system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for DMA operations.
pub type DmaResult<T> = Result<T, AxiDmaError>;
