//! End-to-end tests replaying small traces against full hierarchies.

use memhier::cache::{ReplacementPolicy, WritePolicy};
use memhier::config::{CacheLevelConfig, Config, CpuConfig, MemoryConfig};
use memhier::simulator::Simulator;
use memhier::storage::Stream;
use memhier::trace::Trace;

/// 32-bit machine, 4 KiB page at 0x1000, 10 ns + 2 ns/word memory.
fn config_with(caches: Vec<CacheLevelConfig>) -> Config {
    Config {
        cpu: CpuConfig {
            address_width: 32,
            word_width: 32,
            rand_seed: 1,
        },
        memory: MemoryConfig {
            size: 1 << 20,
            page_size: 4096,
            page_base_address: 0x1000,
            access_time_single: 10e-9,
            access_time_burst: 2e-9,
        },
        caches,
        warnings: 0,
    }
}

fn level(
    size: u64,
    ways: u32,
    write_policy: WritePolicy,
    replacement_policy: ReplacementPolicy,
    access_time: f64,
) -> CacheLevelConfig {
    CacheLevelConfig {
        line_size: 16,
        size,
        associativity: ways,
        write_policy,
        replacement_policy,
        separated: false,
        access_time,
    }
}

/// 128 B, 2-way, 16-byte lines: 4 sets, 1 ns.
fn l1(write_policy: WritePolicy, replacement_policy: ReplacementPolicy) -> CacheLevelConfig {
    level(128, 2, write_policy, replacement_policy, 1e-9)
}

fn sim(caches: Vec<CacheLevelConfig>, trace: &str) -> Simulator {
    Simulator::new(config_with(caches), Trace::parse(trace).unwrap()).unwrap()
}

/// A cold miss followed by a hit on the same address.
#[test]
fn cold_miss_then_hit() {
    let mut sim = sim(
        vec![l1(WritePolicy::WriteBack, ReplacementPolicy::Lru)],
        "L 0x1000 D\nL 0x1000 D\n",
    );
    sim.step_all(false);

    let stats = sim.cache(0).stats();
    assert_eq!(stats.accesses, 2);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);

    assert!(sim.cache(0).contains(0x1000, Stream::Data));
    assert!(!sim.cache(0).data_lines().iter().any(|line| line.dirty));

    // miss: 1 ns probe + (10 + 3*2) ns line fetch + 1 ns re-probe; hit: 1 ns
    assert!((sim.total_access_time() - 19e-9).abs() < 1e-13);

    assert_eq!(sim.memory().accesses_single(), 1);
    assert_eq!(sim.memory().accesses_burst(), 3);
}

/// A hit-only operation costs exactly the L1 access time.
#[test]
fn hit_costs_one_probe() {
    let mut sim = sim(
        vec![l1(WritePolicy::WriteBack, ReplacementPolicy::Lru)],
        "L 0x1000 D\nL 0x1000 D\n",
    );
    sim.single_step();
    let after_miss = sim.total_access_time();
    sim.single_step();
    assert!((sim.total_access_time() - after_miss - 1e-9).abs() < 1e-13);
}

/// Three stores to the same set force a dirty eviction that lands in memory.
#[test]
fn write_back_reaches_memory_on_eviction() {
    let mut sim = sim(
        vec![l1(WritePolicy::WriteBack, ReplacementPolicy::Lru)],
        "S 0x1000 D 42\nS 0x1040 D 7\nS 0x1080 D 9\n",
    );
    sim.step_all(false);

    let stats = sim.cache(0).stats();
    assert_eq!(stats.accesses, 3);
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 3);

    // 0x1000 was the least recently used line and got written back
    assert_eq!(sim.memory().word(0x1000), 42);
    assert!(!sim.cache(0).contains(0x1000, Stream::Data));
    // the survivors are still dirty in L1, memory keeps its fill pattern
    assert!(sim.cache(0).contains(0x1040, Stream::Data));
    assert_eq!(sim.memory().word(0x1040), 16);
    assert!(sim.cache(0).contains(0x1080, Stream::Data));
}

/// LRU keeps a re-accessed line; FIFO evicts the first-installed one
/// regardless of later hits.
#[test]
fn lru_and_fifo_tie_break() {
    let trace = "L 0x1000 D\nL 0x1040 D\nL 0x1000 D\nL 0x1080 D\nL 0x1000 D\n";

    let mut lru = sim(vec![l1(WritePolicy::WriteBack, ReplacementPolicy::Lru)], trace);
    lru.step_all(false);
    // the re-accessed 0x1000 survives, so the final load hits
    assert_eq!(lru.cache(0).stats().misses, 3);
    assert_eq!(lru.cache(0).stats().hits, 2);
    assert!(lru.cache(0).contains(0x1000, Stream::Data));

    let mut fifo = sim(vec![l1(WritePolicy::WriteBack, ReplacementPolicy::Fifo)], trace);
    fifo.step_all(false);
    // 0x1000 went in first and is evicted despite the intervening hit
    assert_eq!(fifo.cache(0).stats().misses, 4);
    assert_eq!(fifo.cache(0).stats().hits, 1);
}

/// LFU evicts the way with the fewest accesses.
#[test]
fn lfu_evicts_least_used() {
    let mut sim = sim(
        vec![l1(WritePolicy::WriteBack, ReplacementPolicy::Lfu)],
        "L 0x1000 D\nL 0x1000 D\nL 0x1040 D\nL 0x1080 D\nL 0x1000 D\n",
    );
    sim.step_all(false);

    assert!(sim.cache(0).contains(0x1000, Stream::Data));
    assert!(sim.cache(0).contains(0x1080, Stream::Data));
    assert!(!sim.cache(0).contains(0x1040, Stream::Data));
    assert_eq!(sim.cache(0).stats().misses, 3);
    assert_eq!(sim.cache(0).stats().hits, 2);
}

/// RAND replacement is driven by the seeded PRNG: two runs of the same
/// configuration are identical.
#[test]
fn rand_replacement_is_deterministic() {
    let trace = "L 0x1000 D\nL 0x1040 D\nL 0x1080 D\nL 0x10c0 D\nL 0x1000 D\nL 0x1040 D\n";
    let run = || {
        let mut sim = sim(vec![l1(WritePolicy::WriteBack, ReplacementPolicy::Rand)], trace);
        sim.step_all(false);
        (sim.cache(0).stats().hits, sim.cache(0).stats().misses)
    };
    assert_eq!(run(), run());
}

/// A split cache keeps instruction and data streams apart.
#[test]
fn split_cache_separates_streams() {
    let mut config = l1(WritePolicy::WriteBack, ReplacementPolicy::Lru);
    config.separated = true;
    let mut sim = sim(vec![config], "L 0x1000 I\nL 0x1000 D\n");

    sim.single_step();
    assert!(sim.cache(0).contains(0x1000, Stream::Instruction));
    assert!(!sim.cache(0).contains(0x1000, Stream::Data));

    sim.single_step();
    assert!(sim.cache(0).contains(0x1000, Stream::Data));

    let stats = sim.cache(0).stats();
    assert_eq!(stats.accesses, 2);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hits, 0);
    assert_eq!(sim.cache(0).inst_lines().unwrap().iter().filter(|l| l.valid).count(), 1);
    assert_eq!(sim.cache(0).data_lines().iter().filter(|l| l.valid).count(), 1);
}

/// Write-through stores are visible in memory immediately and count as
/// hits even when the line is absent.
#[test]
fn write_through_is_immediately_visible() {
    let mut sim = sim(
        vec![l1(WritePolicy::WriteThrough, ReplacementPolicy::Lru)],
        "S 0x1000 D 5\n",
    );
    sim.step_all(false);

    assert_eq!(sim.memory().word(0x1000), 5);
    // store-as-hit convention, and no allocation on a store miss
    let stats = sim.cache(0).stats();
    assert_eq!(stats.accesses, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 0);
    assert!(!sim.cache(0).contains(0x1000, Stream::Data));
}

/// A write-through store to a resident line updates it in place without
/// marking it dirty.
#[test]
fn write_through_never_dirties_lines() {
    let mut sim = sim(
        vec![l1(WritePolicy::WriteThrough, ReplacementPolicy::Lru)],
        "L 0x1000 D\nS 0x1000 D 5\nL 0x1000 D\n",
    );
    sim.step_all(false);

    assert_eq!(sim.memory().word(0x1000), 5);
    assert!(sim.cache(0).contains(0x1000, Stream::Data));
    assert!(!sim.cache(0).data_lines().iter().any(|line| line.dirty));

    let stats = sim.cache(0).stats();
    assert_eq!(stats.accesses, 3);
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
}

/// Reset returns the whole simulator to its post-construction state and a
/// replay reproduces the first run exactly.
#[test]
fn reset_then_replay_is_identical() {
    let mut sim = sim(
        vec![l1(WritePolicy::WriteBack, ReplacementPolicy::Lru)],
        "L 0x1000 D\nS 0x1000 D 3\nL 0x1040 D\n",
    );
    sim.step_all(false);

    let stats = sim.cache(0).stats();
    let total = sim.total_access_time();
    let memory_singles = sim.memory().accesses_single();

    sim.reset();
    assert_eq!(sim.cycle(), 0);
    assert_eq!(sim.total_access_time(), 0.0);
    assert_eq!(sim.cache(0).stats().accesses, 0);
    assert!(sim.cache(0).data_lines().iter().all(|line| !line.valid));
    assert_eq!(sim.memory().accesses_single(), 0);
    // memory is back to its fill pattern
    assert_eq!(sim.memory().word(0x1000), 0);
    assert_eq!(sim.memory().word(0x1044), 17);

    sim.step_all(false);
    let replay = sim.cache(0).stats();
    assert_eq!(replay.accesses, stats.accesses);
    assert_eq!(replay.hits, stats.hits);
    assert_eq!(replay.misses, stats.misses);
    assert!((sim.total_access_time() - total).abs() < 1e-13);
    assert_eq!(sim.memory().accesses_single(), memory_singles);
}

/// accesses == hits + misses at every level, stores included.
#[test]
fn conservation_across_two_levels() {
    let caches = vec![
        l1(WritePolicy::WriteBack, ReplacementPolicy::Lru),
        level(256, 2, WritePolicy::WriteBack, ReplacementPolicy::Lru, 3e-9),
    ];
    let mut sim = sim(
        caches,
        "L 0x1000 D\nS 0x1040 D 1\nL 0x1080 D\nS 0x1000 D 2\nL 0x10c0 D\nL 0x1100 D\nS 0x1140 D 3\nL 0x1000 D\n",
    );
    sim.step_all(false);

    for level in 0..sim.num_caches() {
        let stats = sim.cache(level).stats();
        assert_eq!(stats.accesses, stats.hits + stats.misses, "level {level}");
    }
}

/// Two consecutive loads of the same address: the second adds no miss at
/// any level.
#[test]
fn repeated_load_misses_nowhere() {
    let caches = vec![
        l1(WritePolicy::WriteBack, ReplacementPolicy::Lru),
        level(256, 2, WritePolicy::WriteBack, ReplacementPolicy::Lru, 3e-9),
    ];
    let mut sim = sim(caches, "L 0x1000 D\nL 0x1000 D\n");
    sim.step_all(false);

    assert_eq!(sim.cache(0).stats().misses, 1);
    assert_eq!(sim.cache(0).stats().hits, 1);
    // the fill was L2's only traffic
    assert_eq!(sim.cache(1).stats().accesses, 1);
    assert_eq!(sim.cache(1).stats().misses, 1);
}

/// A dirty line evicted from L1 lands in L2; a dirty line evicted from L2
/// lands in memory.
#[test]
fn dirty_evictions_cascade_down() {
    // direct-mapped L1 (2 sets) over direct-mapped L2 (4 sets): a stride
    // of 0x40 collides in both
    let caches = vec![
        level(32, 1, WritePolicy::WriteBack, ReplacementPolicy::Lru, 1e-9),
        level(64, 1, WritePolicy::WriteBack, ReplacementPolicy::Lru, 3e-9),
    ];
    let mut sim = sim(caches, "S 0x1000 D 42\nS 0x1040 D 7\nS 0x1080 D 9\n");
    sim.step_all(false);

    // 0x1000 was pushed out of L1 into L2, then out of L2 into memory
    assert_eq!(sim.memory().word(0x1000), 42);
    // 0x1040 made it to L2 and is still dirty there
    assert!(sim.cache(1).contains(0x1040, Stream::Data));
    assert_eq!(sim.memory().word(0x1040), 16);
    // 0x1080 is freshly dirty in L1
    assert!(sim.cache(0).contains(0x1080, Stream::Data));
}

/// With no caches configured the head of the hierarchy is main memory.
#[test]
fn memory_only_hierarchy() {
    let mut sim = sim(vec![], "L 0x1000 D\nS 0x1004 D 3\n");
    sim.step_all(false);

    assert_eq!(sim.num_caches(), 0);
    assert_eq!(sim.memory().word(0x1004), 3);
    assert_eq!(sim.memory().accesses_single(), 2);
    assert_eq!(sim.memory().accesses_burst(), 0);
    // two single-word accesses at 10 ns each
    assert!((sim.total_access_time() - 20e-9).abs() < 1e-13);
}

/// step_all honors breakpoints only when asked to.
#[test]
fn breakpoints_stop_step_all() {
    let trace = "L 0x1000 D\n!L 0x1040 D\nL 0x1080 D\n";
    let mut sim = sim(vec![l1(WritePolicy::WriteBack, ReplacementPolicy::Lru)], trace);

    sim.step_all(true);
    assert_eq!(sim.cycle(), 2);
    sim.step_all(true);
    assert_eq!(sim.cycle(), 3);

    // stepping past the end is a no-op
    sim.single_step();
    assert_eq!(sim.cycle(), 3);
}

/// Trace addresses outside the memory page window are rejected up front.
#[test]
fn out_of_window_trace_is_rejected() {
    let config = config_with(vec![l1(WritePolicy::WriteBack, ReplacementPolicy::Lru)]);
    let trace = Trace::parse("L 0x800 D\n").unwrap();
    assert!(Simulator::new(config, trace).is_err());
}

/// The statistics report mirrors the counters.
#[test]
fn statistics_report() {
    let mut sim = sim(
        vec![l1(WritePolicy::WriteBack, ReplacementPolicy::Lru)],
        "L 0x1000 D\nL 0x1000 D\n",
    );
    sim.step_all(false);

    let report = sim.statistics();
    assert_eq!(report.cycles, 2);
    assert_eq!(report.caches.len(), 1);
    assert_eq!(report.caches[0].level, 1);
    assert_eq!(report.caches[0].accesses, 2);
    assert!((report.caches[0].hit_rate - 50.0).abs() < 1e-9);
    assert_eq!(report.memory.accesses, 4);
    assert_eq!(report.memory.accesses_single, 1);
    assert_eq!(report.memory.accesses_burst, 3);

    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"hit_rate\":50.0"));
}
