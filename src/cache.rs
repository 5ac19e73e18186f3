use log::debug;
use serde::{Deserialize, Serialize};
use rand::Rng;

use crate::{
    config::{CacheLevelConfig, CpuConfig},
    storage::{
        AccessContext, AccessStyle, Downstream, MemOpKind, MemoryElement, MemoryOperation,
        MemoryReply, Stream,
    },
    Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WritePolicy {
    #[serde(rename = "wt")]
    WriteThrough,
    #[serde(rename = "wb")]
    WriteBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplacementPolicy {
    #[serde(rename = "lru")]
    Lru,
    #[serde(rename = "lfu")]
    Lfu,
    #[serde(rename = "rand")]
    Rand,
    #[serde(rename = "fifo")]
    Fifo,
}

/// Access counters of one cache level. Every request entering the level
/// counts as exactly one access and exactly one hit or miss.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub accesses: u64,
    pub hits: u64,
    pub misses: u64,
}

/// A cache line. `set` and `way` restate the line's position for display
/// purposes. The access counters use -1 as the "never accessed" sentinel;
/// while `valid` is false none of the other fields are meaningful.
#[derive(Debug, Clone)]
pub struct CacheLine {
    pub tag: u64,
    pub set: u32,
    pub way: u32,
    pub content: Vec<u64>,
    pub first_access: i64,
    pub last_access: i64,
    pub number_accesses: i64,
    pub valid: bool,
    pub dirty: bool,
    pub style: AccessStyle,
}

impl CacheLine {
    fn new(index: u32, ways: u32, line_size_words: usize) -> Self {
        Self {
            tag: 0,
            set: index / ways,
            way: index % ways,
            content: vec![0; line_size_words],
            first_access: -1,
            last_access: -1,
            number_accesses: -1,
            valid: false,
            dirty: false,
            style: AccessStyle::None,
        }
    }
}

/// Bit layout of an address for one cache geometry: `tag | set | offset`,
/// MSB to LSB.
#[derive(Debug, Clone, Copy)]
pub struct AddressLayout {
    offset_bits: u32,
    set_bits: u32,
    word_bytes: u32,
}

impl AddressLayout {
    fn new(line_size: u64, sets: u32, word_bytes: u32) -> Self {
        Self {
            offset_bits: line_size.ilog2(),
            set_bits: sets.ilog2(),
            word_bytes,
        }
    }

    pub fn tag(&self, address: u64) -> u64 {
        address >> (self.set_bits + self.offset_bits)
    }

    pub fn set(&self, address: u64) -> u64 {
        (address >> self.offset_bits) & ((1 << self.set_bits) - 1)
    }

    pub fn offset(&self, address: u64) -> u64 {
        address & ((1 << self.offset_bits) - 1)
    }

    /// Reconstruct the base address of the line holding `tag` in `set`.
    pub fn base_address(&self, tag: u64, set: u64) -> u64 {
        (tag << (self.set_bits + self.offset_bits)) | (set << self.offset_bits)
    }

    /// Index of the addressed word inside its line.
    pub fn word_index(&self, address: u64) -> usize {
        (self.offset(address) / self.word_bytes as u64) as usize
    }

    fn line_base(&self, address: u64) -> u64 {
        address & !((1u64 << self.offset_bits) - 1)
    }
}

/// One set-associative cache level. When the cache is split, instruction
/// and data accesses go to separate line arrays, each holding half the
/// sets; a unified cache keeps everything in the data array.
#[derive(Debug)]
pub struct Cache {
    level: u8,
    size: u64,
    line_size: u64,
    line_size_words: usize,
    sets: u32,
    ways: u32,
    access_time: f64,
    is_split: bool,
    policy_write: WritePolicy,
    policy_replacement: ReplacementPolicy,
    layout: AddressLayout,

    data: Vec<CacheLine>,
    inst: Option<Vec<CacheLine>>,

    stats: CacheStats,
}

impl Cache {
    /// Build a level from its validated configuration. `level` is the
    /// 1-based position in the hierarchy, used for diagnostics.
    pub fn new(cfg: &CacheLevelConfig, cpu: &CpuConfig, level: u8) -> Result<Self> {
        if !cfg.size.is_power_of_two() || !cfg.line_size.is_power_of_two() {
            return Err(format!("L{level}: size and line_size must be powers of two").into());
        }
        if !(cfg.associativity as u64).is_power_of_two() {
            return Err(format!("L{level}: associativity must be a power of two").into());
        }
        let word_bytes = cpu.word_width / 8;
        if cfg.line_size < word_bytes as u64 {
            return Err(format!("L{level}: a line must hold at least one word").into());
        }

        let line_size_words = (cfg.line_size / word_bytes as u64) as usize;
        let mut sets = (cfg.size / cfg.line_size / cfg.associativity as u64) as u32;
        if cfg.separated {
            sets /= 2;
        }
        if sets == 0 {
            return Err(format!("L{level}: split cache needs at least two sets").into());
        }
        if !sets.is_power_of_two() {
            return Err(format!("L{level}: geometry must yield a power-of-two set count").into());
        }

        let ways = cfg.associativity;
        let lines = sets * ways;
        let build = |n: u32| -> Vec<CacheLine> {
            (0..n).map(|i| CacheLine::new(i, ways, line_size_words)).collect()
        };

        debug!(
            "L{level}: {} sets x {} ways, {}-byte lines{}",
            sets,
            ways,
            cfg.line_size,
            if cfg.separated { ", split I/D" } else { "" }
        );

        Ok(Self {
            level,
            size: cfg.size,
            line_size: cfg.line_size,
            line_size_words,
            sets,
            ways,
            access_time: cfg.access_time,
            is_split: cfg.separated,
            policy_write: cfg.write_policy,
            policy_replacement: cfg.replacement_policy,
            layout: AddressLayout::new(cfg.line_size, sets, word_bytes),
            data: build(lines),
            inst: cfg.separated.then(|| build(lines)),
            stats: CacheStats::default(),
        })
    }

    /// Serve one request, recursing into `next` on a miss or when the
    /// write policy forwards stores.
    pub fn process_request(
        &mut self,
        op: &MemoryOperation,
        reply: &mut MemoryReply,
        mut next: Downstream<'_>,
        ctx: &mut AccessContext,
    ) {
        reply.total_time += self.access_time;
        self.stats.accesses += 1;

        let layout = self.layout;
        let word_index = layout.word_index(op.address);
        if word_index + op.num_words > self.line_size_words {
            panic!(
                "L{}: access at {:#x} ({} words) spans a cache line boundary",
                self.level, op.address, op.num_words
            );
        }

        let tag = layout.tag(op.address);
        let set = layout.set(op.address) as u32;
        let ways = self.ways;
        let access_time = self.access_time;
        let policy = self.policy_replacement;
        let line_size_words = self.line_size_words;
        let level = self.level;

        // A split cache steers instruction fetches to their own array.
        let lines: &mut Vec<CacheLine> = if self.is_split && op.stream == Stream::Instruction {
            self.inst.as_mut().expect("split cache has an instruction array")
        } else {
            &mut self.data
        };

        match op.kind {
            MemOpKind::Load => {
                let (way, hit) = match lookup(lines, set, ways, tag) {
                    Some(way) => {
                        self.stats.hits += 1;
                        (way, true)
                    }
                    None => {
                        self.stats.misses += 1;
                        debug!("L{level}: load miss at {:#x}", op.address);
                        let way = fill_line(
                            lines, set, tag, op, layout, ways, line_size_words, policy, &mut next,
                            reply, ctx, level,
                        );
                        // the post-fill re-lookup is charged like a fresh probe
                        reply.total_time += access_time;
                        (way, false)
                    }
                };
                let line = &mut lines[line_index(set, way, ways)];
                reply.data[..op.num_words]
                    .copy_from_slice(&line.content[word_index..word_index + op.num_words]);
                touch(line, ctx.cycle, if hit { AccessStyle::Hit } else { AccessStyle::Miss });
            }
            MemOpKind::Store => match self.policy_write {
                WritePolicy::WriteThrough => {
                    // a write-through store always counts as a hit, even on
                    // a tag miss, and never allocates
                    self.stats.hits += 1;
                    if let Some(way) = lookup(lines, set, ways, tag) {
                        let line = &mut lines[line_index(set, way, ways)];
                        line.content[word_index..word_index + op.num_words]
                            .copy_from_slice(&op.data[..op.num_words]);
                        touch(line, ctx.cycle, AccessStyle::Hit);
                    }
                    next.dispatch(op, reply, ctx);
                }
                WritePolicy::WriteBack => {
                    let (way, hit) = match lookup(lines, set, ways, tag) {
                        Some(way) => {
                            self.stats.hits += 1;
                            (way, true)
                        }
                        None => {
                            // write-allocate: fetch the line, then store into it
                            self.stats.misses += 1;
                            debug!("L{level}: store miss at {:#x}", op.address);
                            let way = fill_line(
                                lines, set, tag, op, layout, ways, line_size_words, policy,
                                &mut next, reply, ctx, level,
                            );
                            reply.total_time += access_time;
                            (way, false)
                        }
                    };
                    let line = &mut lines[line_index(set, way, ways)];
                    line.content[word_index..word_index + op.num_words]
                        .copy_from_slice(&op.data[..op.num_words]);
                    line.dirty = true;
                    touch(line, ctx.cycle, if hit { AccessStyle::Hit } else { AccessStyle::Miss });
                }
            },
        }
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn is_split(&self) -> bool {
        self.is_split
    }

    pub fn data_lines(&self) -> &[CacheLine] {
        &self.data
    }

    pub fn inst_lines(&self) -> Option<&[CacheLine]> {
        self.inst.as_deref()
    }

    /// Total number of lines, summed over both arrays when split.
    pub fn num_lines(&self) -> u32 {
        (self.data.len() + self.inst.as_ref().map_or(0, Vec::len)) as u32
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn line_size(&self) -> u64 {
        self.line_size
    }

    pub fn line_size_words(&self) -> usize {
        self.line_size_words
    }

    pub fn sets(&self) -> u32 {
        self.sets
    }

    pub fn ways(&self) -> u32 {
        self.ways
    }

    pub fn access_time(&self) -> f64 {
        self.access_time
    }

    pub fn write_policy(&self) -> WritePolicy {
        self.policy_write
    }

    pub fn replacement_policy(&self) -> ReplacementPolicy {
        self.policy_replacement
    }

    pub fn layout(&self) -> AddressLayout {
        self.layout
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Whether the line covering `address` is resident in the array
    /// serving `stream`.
    pub fn contains(&self, address: u64, stream: Stream) -> bool {
        let lines = if self.is_split && stream == Stream::Instruction {
            match &self.inst {
                Some(inst) => inst,
                None => return false,
            }
        } else {
            &self.data
        };
        let set = self.layout.set(address) as u32;
        lookup(lines, set, self.ways, self.layout.tag(address)).is_some()
    }
}

impl MemoryElement for Cache {
    fn flush(&mut self) {
        self.stats = CacheStats::default();
        flush_lines(&mut self.data, self.ways);
        if let Some(inst) = &mut self.inst {
            flush_lines(inst, self.ways);
        }
    }

    fn clear_style(&mut self) {
        for line in &mut self.data {
            line.style = AccessStyle::None;
        }
        if let Some(inst) = &mut self.inst {
            for line in inst {
                line.style = AccessStyle::None;
            }
        }
    }
}

fn line_index(set: u32, way: u32, ways: u32) -> usize {
    (set * ways + way) as usize
}

/// Scan the set for a valid line with a matching tag.
fn lookup(lines: &[CacheLine], set: u32, ways: u32, tag: u64) -> Option<u32> {
    (0..ways).find(|&way| {
        let line = &lines[line_index(set, way, ways)];
        line.valid && line.tag == tag
    })
}

/// Pick the way a new line will be installed in. Invalid ways take
/// precedence, lowest index first; otherwise the configured policy scans
/// the set's metadata with a lowest-index tie-break.
fn select_victim(
    lines: &[CacheLine],
    set: u32,
    ways: u32,
    policy: ReplacementPolicy,
    ctx: &mut AccessContext,
) -> u32 {
    if let Some(way) = (0..ways).find(|&way| !lines[line_index(set, way, ways)].valid) {
        return way;
    }

    match policy {
        ReplacementPolicy::Rand => ctx.rng.gen_range(0..ways),
        ReplacementPolicy::Lru | ReplacementPolicy::Lfu | ReplacementPolicy::Fifo => {
            let key = |way: u32| {
                let line = &lines[line_index(set, way, ways)];
                match policy {
                    ReplacementPolicy::Lru => line.last_access,
                    ReplacementPolicy::Lfu => line.number_accesses,
                    ReplacementPolicy::Fifo => line.first_access,
                    ReplacementPolicy::Rand => unreachable!(),
                }
            };
            let mut victim = 0;
            for way in 1..ways {
                if key(way) < key(victim) {
                    victim = way;
                }
            }
            victim
        }
    }
}

/// Handle a miss: fetch the whole line from the next level, evict a
/// victim (writing it back first when dirty), and install the fetched
/// words. Returns the way the line landed in.
#[allow(clippy::too_many_arguments)]
fn fill_line(
    lines: &mut [CacheLine],
    set: u32,
    tag: u64,
    op: &MemoryOperation,
    layout: AddressLayout,
    ways: u32,
    line_size_words: usize,
    policy: ReplacementPolicy,
    next: &mut Downstream<'_>,
    reply: &mut MemoryReply,
    ctx: &mut AccessContext,
    level: u8,
) -> u32 {
    // fetch the full line, preserving the stream flag of the request
    let fetch = MemoryOperation::load(layout.line_base(op.address), op.stream, line_size_words);
    let mut fetched = MemoryReply::new(line_size_words);
    next.dispatch(&fetch, &mut fetched, ctx);
    reply.total_time += fetched.total_time;

    let way = select_victim(lines, set, ways, policy, ctx);
    let line = &mut lines[line_index(set, way, ways)];

    if line.valid && line.dirty {
        // write the victim back before overwriting it
        let back = MemoryOperation::store(
            layout.base_address(line.tag, set as u64),
            op.stream,
            line.content.clone(),
        );
        debug!("L{level}: evicting dirty line {:#x}", back.address);
        let mut back_reply = MemoryReply::new(0);
        next.dispatch(&back, &mut back_reply, ctx);
        reply.total_time += back_reply.total_time;
    }

    line.content.copy_from_slice(&fetched.data);
    line.tag = tag;
    line.valid = true;
    line.dirty = false;
    line.first_access = ctx.cycle;
    line.number_accesses = 0;
    way
}

/// Per-line bookkeeping after a request touched the line.
fn touch(line: &mut CacheLine, cycle: i64, style: AccessStyle) {
    line.number_accesses += 1;
    line.last_access = cycle;
    line.style = style;
}

fn flush_lines(lines: &mut [CacheLine], ways: u32) {
    for (index, line) in lines.iter_mut().enumerate() {
        line.tag = 0;
        line.set = index as u32 / ways;
        line.way = index as u32 % ways;
        line.content.fill(0);
        line.first_access = -1;
        line.last_access = -1;
        line.number_accesses = -1;
        line.valid = false;
        line.dirty = false;
        line.style = AccessStyle::None;
    }
}
