use rand::rngs::StdRng;

use crate::{cache::Cache, memory::MainMemory};

/// Kind of a memory operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOpKind {
    Load,
    Store,
}

/// Which stream an access belongs to. Only relevant to split caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Instruction,
    Data,
}

/// A single request traveling down the hierarchy. Trace entries are
/// operations with `num_words = 1`; line fills and dirty write-backs are
/// operations spanning a whole cache line.
#[derive(Debug, Clone)]
pub struct MemoryOperation {
    pub kind: MemOpKind,
    pub address: u64,
    pub stream: Stream,
    /// Words to write. Empty for loads.
    pub data: Vec<u64>,
    pub num_words: usize,
    pub breakpoint: bool,
}

impl MemoryOperation {
    pub fn load(address: u64, stream: Stream, num_words: usize) -> Self {
        Self {
            kind: MemOpKind::Load,
            address,
            stream,
            data: Vec::new(),
            num_words,
            breakpoint: false,
        }
    }

    pub fn store(address: u64, stream: Stream, data: Vec<u64>) -> Self {
        Self {
            kind: MemOpKind::Store,
            address,
            stream,
            num_words: data.len(),
            data,
            breakpoint: false,
        }
    }
}

/// Accumulator for one top-level operation: the loaded words and the
/// summed latency of every level visited.
#[derive(Debug)]
pub struct MemoryReply {
    pub data: Vec<u64>,
    /// Seconds, accumulated across all levels visited.
    pub total_time: f64,
}

impl MemoryReply {
    pub fn new(num_words: usize) -> Self {
        Self {
            data: vec![0; num_words],
            total_time: 0.0,
        }
    }
}

/// Presentation tag on a cache line, cleared before every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessStyle {
    #[default]
    None,
    Hit,
    Miss,
}

/// Presentation tag on a memory word, cleared before every step. The
/// first word of a burst is tagged differently from the words after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordStyle {
    #[default]
    None,
    LoadSingle,
    LoadBurst,
    StoreSingle,
    StoreBurst,
}

/// Driver state threaded through the recursion: the current cycle (for
/// stamping line metadata) and the simulation PRNG (for RAND replacement).
pub struct AccessContext<'a> {
    pub cycle: i64,
    pub rng: &'a mut StdRng,
}

/// Capabilities shared by every element of the hierarchy.
pub trait MemoryElement {
    /// Return the element to its post-construction state.
    fn flush(&mut self);

    /// Clear all presentation tags.
    fn clear_style(&mut self);
}

/// The part of the hierarchy below some level: zero or more caches
/// followed by main memory. The driver owns the elements; this is a
/// borrowed view used for forwarding requests.
pub struct Downstream<'a> {
    pub caches: &'a mut [Cache],
    pub memory: &'a mut MainMemory,
}

impl Downstream<'_> {
    /// Hand the request to the first element of this chain. Caches peel
    /// themselves off the front; an empty chain is main memory itself.
    pub fn dispatch(&mut self, op: &MemoryOperation, reply: &mut MemoryReply, ctx: &mut AccessContext) {
        match self.caches.split_first_mut() {
            Some((head, rest)) => {
                let next = Downstream {
                    caches: rest,
                    memory: &mut *self.memory,
                };
                head.process_request(op, reply, next, ctx);
            }
            None => self.memory.process_request(op, reply),
        }
    }
}
