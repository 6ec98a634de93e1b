// Userspace AXI DMA (Scatter/Gather) Driver
// SPDX-License-Identifier: MIT

//! Cyclic receive demo: print every packet the fabric produces.
//!
//! Run with: `cargo run --example cyclic_rx`

use uaxidma::{AxiDma, AxiDmaError, Direction, DmaConfig, DmaMode};

fn main() {
    env_logger::init();

    let mut dma = match AxiDma::new(DmaConfig {
        udmabuf_name: "udmabuf0".into(),
        udmabuf_size: 0,
        udmabuf_offset: 0,
        uio_name: "axidma_rx".into(),
        mode: DmaMode::Cyclic,
        direction: Direction::DevToMem,
        buffer_size: 256 << 10,
    }) {
        Ok(dma) => dma,
        Err(e) => {
            eprintln!("failed to open the receive channel: {e}");
            return;
        }
    };

    loop {
        match dma.get_buffer(1000) {
            Ok(buf) => {
                for (i, byte) in buf.data().iter().enumerate() {
                    println!("{i}: {byte}");
                }
                if let Err(e) = dma.mark_reusable(buf) {
                    eprintln!("internal error: {e}");
                    return;
                }
            }
            Err(AxiDmaError::Timeout) => eprintln!("acquisition timed out"),
            Err(e) => {
                eprintln!("internal error: {e}");
                return;
            }
        }
    }
}
