use log::{debug, error};
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;

use crate::{
    cache::Cache,
    config::Config,
    memory::MainMemory,
    storage::{AccessContext, Downstream, MemOpKind, MemoryElement, MemoryOperation, MemoryReply},
    trace::Trace,
    Result,
};

/// The simulation driver. Owns the configuration, the trace, the cache
/// chain and main memory, and replays one operation per cycle against the
/// head of the hierarchy.
pub struct Simulator {
    config: Config,
    operations: Vec<MemoryOperation>,
    caches: Vec<Cache>,
    memory: MainMemory,
    cycle: usize,
    total_access_time: f64,
    rng: StdRng,
}

impl Simulator {
    /// Build the hierarchy described by `config` and take ownership of the
    /// trace. Trace addresses are checked against the memory page window
    /// here so that replay itself cannot fail.
    pub fn new(config: Config, trace: Trace) -> Result<Simulator> {
        let operations = trace.into_operations();

        let word_bytes = (config.cpu.word_width / 8) as u64;
        let window_start = config.memory.page_base_address;
        let window_end = window_start + config.memory.page_size;
        for (index, op) in operations.iter().enumerate() {
            let end = op.address + op.num_words as u64 * word_bytes;
            if op.address < window_start || end > window_end {
                let msg = format!(
                    "operation {}: address {:#x} is outside the memory page window",
                    index + 1,
                    op.address
                );
                error!("{msg}");
                return Err(msg.into());
            }
        }

        let memory = MainMemory::new(&config.memory, &config.cpu);
        let mut caches = Vec::with_capacity(config.caches.len());
        for (index, level) in config.caches.iter().enumerate() {
            caches.push(Cache::new(level, &config.cpu, (index + 1) as u8)?);
        }
        let rng = StdRng::seed_from_u64(config.cpu.rand_seed);

        Ok(Simulator {
            config,
            operations,
            caches,
            memory,
            cycle: 0,
            total_access_time: 0.0,
            rng,
        })
    }

    /// Execute the operation at the current cycle. Does nothing once the
    /// trace is exhausted.
    pub fn single_step(&mut self) {
        if self.cycle >= self.operations.len() {
            return;
        }
        self.clear_all_styles();

        let op = &self.operations[self.cycle];
        match op.kind {
            MemOpKind::Load => debug!("cycle {}: CPU requests a load at {:#x}", self.cycle, op.address),
            MemOpKind::Store => {
                debug!("cycle {}: CPU stores {} at {:#x}", self.cycle, op.data[0], op.address)
            }
        }

        let mut reply = MemoryReply::new(op.num_words);
        let mut ctx = AccessContext {
            cycle: self.cycle as i64,
            rng: &mut self.rng,
        };
        let mut head = Downstream {
            caches: &mut self.caches,
            memory: &mut self.memory,
        };
        head.dispatch(op, &mut reply, &mut ctx);

        match op.kind {
            MemOpKind::Load => debug!(
                "cycle {}: load finished, got {} in {:.3e} s",
                self.cycle, reply.data[0], reply.total_time
            ),
            MemOpKind::Store => {
                debug!("cycle {}: store finished in {:.3e} s", self.cycle, reply.total_time)
            }
        }

        self.total_access_time += reply.total_time;
        self.cycle += 1;
    }

    /// Run until the trace ends. With `stop_on_breakpoint`, stop right
    /// after executing an operation whose breakpoint flag is set.
    pub fn step_all(&mut self, stop_on_breakpoint: bool) {
        while self.cycle < self.operations.len() {
            let breakpoint = self.operations[self.cycle].breakpoint;
            self.single_step();
            if stop_on_breakpoint && breakpoint {
                break;
            }
        }
    }

    /// Return every component to its post-construction state and rewind
    /// the trace. The PRNG is re-seeded so a replay is identical.
    pub fn reset(&mut self) {
        self.cycle = 0;
        self.total_access_time = 0.0;
        self.rng = StdRng::seed_from_u64(self.config.cpu.rand_seed);
        self.memory.flush();
        for cache in &mut self.caches {
            cache.flush();
        }
    }

    fn clear_all_styles(&mut self) {
        self.memory.clear_style();
        for cache in &mut self.caches {
            cache.clear_style();
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn operations(&self) -> &[MemoryOperation] {
        &self.operations
    }

    pub fn memory(&self) -> &MainMemory {
        &self.memory
    }

    /// Cache by 0-based level index (0 is L1).
    pub fn cache(&self, level: usize) -> &Cache {
        &self.caches[level]
    }

    pub fn caches(&self) -> &[Cache] {
        &self.caches
    }

    pub fn num_operations(&self) -> usize {
        self.operations.len()
    }

    pub fn num_caches(&self) -> usize {
        self.caches.len()
    }

    /// Address width in bits.
    pub fn address_width(&self) -> u32 {
        self.config.cpu.address_width
    }

    /// Word width in bits.
    pub fn word_width(&self) -> u32 {
        self.config.cpu.word_width
    }

    /// Cumulative latency of every executed operation, in seconds.
    pub fn total_access_time(&self) -> f64 {
        self.total_access_time
    }

    pub fn cycle(&self) -> usize {
        self.cycle
    }

    /// Snapshot of the execution statistics.
    pub fn statistics(&self) -> StatsReport {
        let caches = self
            .caches
            .iter()
            .map(|cache| {
                let stats = cache.stats();
                let rate = |part: u64| {
                    if stats.accesses == 0 {
                        0.0
                    } else {
                        part as f64 / stats.accesses as f64 * 100.0
                    }
                };
                CacheReport {
                    level: cache.level(),
                    accesses: stats.accesses,
                    hits: stats.hits,
                    misses: stats.misses,
                    hit_rate: rate(stats.hits),
                    miss_rate: rate(stats.misses),
                }
            })
            .collect();

        StatsReport {
            cycles: self.cycle,
            total_access_time: self.total_access_time,
            average_access_time: if self.cycle == 0 {
                0.0
            } else {
                self.total_access_time / self.cycle as f64
            },
            caches,
            memory: MemoryReport {
                accesses: self.memory.accesses_single() + self.memory.accesses_burst(),
                accesses_single: self.memory.accesses_single(),
                accesses_burst: self.memory.accesses_burst(),
            },
        }
    }

    /// Print the execution statistics to stdout.
    pub fn print_statistics(&self) {
        let report = self.statistics();

        println!("\n------ Statistics ------\n");
        println!("CPU:");
        println!("\tExecuted operations: {}", report.cycles);
        println!("\tTotal access time (s): {:.4e}", report.total_access_time);
        println!("\tAverage memory access time (s): {:.4e}", report.average_access_time);

        for cache in &report.caches {
            println!("\nCache L{}:", cache.level);
            println!("\tTotal accesses: {}", cache.accesses);
            println!("\tHits: {}", cache.hits);
            println!("\tMisses: {}", cache.misses);
            println!("\tHit rate: {:.1}%", cache.hit_rate);
            println!("\tMiss rate: {:.1}%", cache.miss_rate);
        }

        println!("\nMemory:");
        println!("\tTotal accesses: {}", report.memory.accesses);
        println!("\tFirst word accesses: {}", report.memory.accesses_single);
        println!("\tBurst accesses: {}", report.memory.accesses_burst);
    }
}

#[derive(Debug, Serialize)]
pub struct CacheReport {
    pub level: u8,
    pub accesses: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct MemoryReport {
    pub accesses: u64,
    pub accesses_single: u64,
    pub accesses_burst: u64,
}

#[derive(Debug, Serialize)]
pub struct StatsReport {
    pub cycles: usize,
    pub total_access_time: f64,
    pub average_access_time: f64,
    pub caches: Vec<CacheReport>,
    pub memory: MemoryReport,
}
