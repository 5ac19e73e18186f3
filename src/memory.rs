use log::debug;

use crate::{
    config::{CpuConfig, MemoryConfig},
    storage::{MemOpKind, MemoryElement, MemoryOperation, MemoryReply, WordStyle},
};

/// One word of backing storage, tagged with its absolute address.
#[derive(Debug, Clone)]
pub struct MemoryCell {
    pub address: u64,
    pub content: u64,
    pub style: WordStyle,
}

/// Flat word-addressed main memory over a single page window. Terminates
/// the hierarchy: every request that reaches it is served outright.
#[derive(Debug)]
pub struct MainMemory {
    cells: Vec<MemoryCell>,
    word_bytes: u32,
    page_size: u64,
    page_base_address: u64,
    access_time_single: f64,
    access_time_burst: f64,

    accesses_single: u64,
    accesses_burst: u64,
}

impl MainMemory {
    pub fn new(cfg: &MemoryConfig, cpu: &CpuConfig) -> Self {
        let mut memory = Self {
            cells: Vec::new(),
            word_bytes: cpu.word_width / 8,
            page_size: cfg.page_size,
            page_base_address: cfg.page_base_address,
            access_time_single: cfg.access_time_single,
            access_time_burst: cfg.access_time_burst,
            accesses_single: 0,
            accesses_burst: 0,
        };
        memory.flush();
        debug!(
            "memory: {} words backing page {:#x}..{:#x}",
            memory.cells.len(),
            memory.page_base_address,
            memory.page_base_address + memory.page_size
        );
        memory
    }

    /// Serve a word burst. The first word costs `access_time_single`,
    /// every following word `access_time_burst`.
    pub fn process_request(&mut self, op: &MemoryOperation, reply: &mut MemoryReply) {
        let word_bytes = self.word_bytes as u64;
        let end = op.address + op.num_words as u64 * word_bytes;
        if op.address < self.page_base_address || end > self.page_base_address + self.page_size {
            panic!(
                "memory access at {:#x} ({} words) outside the page window",
                op.address, op.num_words
            );
        }

        let index = ((op.address - self.page_base_address) / word_bytes) as usize;
        match op.kind {
            MemOpKind::Load => {
                for i in 0..op.num_words {
                    let cell = &mut self.cells[index + i];
                    reply.data[i] = cell.content;
                    cell.style = if i == 0 { WordStyle::LoadSingle } else { WordStyle::LoadBurst };
                }
            }
            MemOpKind::Store => {
                for i in 0..op.num_words {
                    let cell = &mut self.cells[index + i];
                    cell.content = op.data[i];
                    cell.style = if i == 0 { WordStyle::StoreSingle } else { WordStyle::StoreBurst };
                }
            }
        }

        reply.total_time += self.access_time_single + self.access_time_burst * (op.num_words - 1) as f64;
        self.accesses_single += 1;
        self.accesses_burst += (op.num_words - 1) as u64;
    }

    /// The word stored at an absolute address.
    pub fn word(&self, address: u64) -> u64 {
        self.cells[((address - self.page_base_address) / self.word_bytes as u64) as usize].content
    }

    pub fn cells(&self) -> &[MemoryCell] {
        &self.cells
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn page_base_address(&self) -> u64 {
        self.page_base_address
    }

    pub fn accesses_single(&self) -> u64 {
        self.accesses_single
    }

    pub fn accesses_burst(&self) -> u64 {
        self.accesses_burst
    }
}

impl MemoryElement for MainMemory {
    /// Regenerate the initialization pattern (each word holds its own
    /// index) and zero the statistics.
    fn flush(&mut self) {
        let words = self.page_size / self.word_bytes as u64;
        self.cells = (0..words)
            .map(|i| MemoryCell {
                address: self.page_base_address + i * self.word_bytes as u64,
                content: i,
                style: WordStyle::None,
            })
            .collect();
        self.accesses_single = 0;
        self.accesses_burst = 0;
    }

    fn clear_style(&mut self) {
        for cell in &mut self.cells {
            cell.style = WordStyle::None;
        }
    }
}
