// Userspace AXI DMA (Scatter/Gather) Driver
// SPDX-License-Identifier: MIT

//! One-shot transmit demo: send a small payload to the fabric.
//!
//! Run with: `cargo run --example async_tx`

use uaxidma::{AxiDma, AxiDmaError, Direction, DmaConfig, DmaMode};

const SECRET: [u8; 6] = [4, 8, 15, 16, 23, 42];

fn main() {
    env_logger::init();

    let mut dma = match AxiDma::new(DmaConfig {
        udmabuf_name: "udmabuf1".into(),
        udmabuf_size: 0,
        udmabuf_offset: 0,
        uio_name: "axidma_tx".into(),
        mode: DmaMode::Normal,
        direction: Direction::MemToDev,
        buffer_size: 256 << 10,
    }) {
        Ok(dma) => dma,
        Err(e) => {
            eprintln!("failed to open the transmit channel: {e}");
            return;
        }
    };

    match dma.get_buffer(1000) {
        Ok(mut buf) => {
            buf.data_mut()[..SECRET.len()].copy_from_slice(&SECRET);
            if let Err(e) = buf.set_payload(SECRET.len()) {
                eprintln!("internal error: {e}");
                return;
            }
            if let Err(e) = dma.submit_buffer(buf) {
                eprintln!("submit failed: {e}");
                return;
            }
            println!("sent {} bytes", SECRET.len());
        }
        Err(AxiDmaError::Timeout) => eprintln!("acquisition timed out"),
        Err(e) => eprintln!("internal error: {e}"),
    }
}
