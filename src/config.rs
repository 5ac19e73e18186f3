use std::{fs, path::Path};

use log::{error, warn};
use serde::Serialize;

use crate::cache::{ReplacementPolicy, WritePolicy};
use crate::Result;

/// Hard cap on the number of `[cacheN]` sections.
pub const MAX_CACHE_LEVELS: usize = 8;

// Accepted keys per section kind.
const CPU_KEYS: &[&str] = &["address_width", "word_width", "rand_seed"];
const MEMORY_KEYS: &[&str] = &[
    "size",
    "access_time_1",
    "access_time_burst",
    "page_size",
    "page_base_address",
];
const CACHE_KEYS: &[&str] = &[
    "line_size",
    "size",
    "associativity",
    "write_policy",
    "replacement_policy",
    "separated",
    "access_time",
];

#[derive(Debug, Clone, Serialize)]
pub struct CpuConfig {
    /// Address width in bits.
    pub address_width: u32,
    /// Word width in bits.
    pub word_width: u32,
    pub rand_seed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryConfig {
    /// Total memory size in bytes.
    pub size: u64,
    /// Size of the simulated page window in bytes.
    pub page_size: u64,
    pub page_base_address: u64,
    /// Seconds for the first word of a burst.
    pub access_time_single: f64,
    /// Seconds for each subsequent word.
    pub access_time_burst: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheLevelConfig {
    pub line_size: u64,
    pub size: u64,
    /// Ways per set. `F` in the file resolves to the number of lines.
    pub associativity: u32,
    pub write_policy: WritePolicy,
    pub replacement_policy: ReplacementPolicy,
    pub separated: bool,
    /// Seconds per access to this level.
    pub access_time: f64,
}

/// The immutable machine description produced by the loader. Caches are
/// ordered L1 first.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub cpu: CpuConfig,
    pub memory: MemoryConfig,
    pub caches: Vec<CacheLevelConfig>,
    /// Number of non-fatal validation findings.
    pub warnings: u32,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let text = fs::read_to_string(&path)
            .map_err(|e| format!("cannot open configuration file {}: {e}", path.as_ref().display()))?;
        Self::parse(&text)
    }

    /// Parse and validate a configuration. All fatal findings are logged
    /// before the loader gives up, so a user sees every problem at once.
    pub fn parse(text: &str) -> Result<Config> {
        let mut diag = Diagnostics::default();
        let sections = read_sections(text, &mut diag);

        // Section census: [cpu] and [memory] are mandatory, caches are
        // numbered [cache1]..[cacheN] and N caps the level count.
        let mut levels = 0usize;
        for (name, _) in &sections {
            match name.as_str() {
                "cpu" | "memory" => {}
                other => match cache_section_number(other) {
                    Some(n) => levels = levels.max(n),
                    None => diag.error(format!("unknown section [{other}]")),
                },
            }
        }
        if levels > MAX_CACHE_LEVELS {
            diag.error(format!("at most {MAX_CACHE_LEVELS} cache levels may be configured"));
        }

        for (name, section) in &sections {
            let valid: &[&str] = match name.as_str() {
                "cpu" => CPU_KEYS,
                "memory" => MEMORY_KEYS,
                _ => CACHE_KEYS,
            };
            for (key, _) in &section.keys {
                if !valid.contains(&key.as_str()) {
                    diag.error(format!("unknown key {key} in section [{name}]"));
                }
            }
        }

        let find = |wanted: &str| sections.iter().find(|(n, _)| n == wanted).map(|(_, s)| s);

        let cpu_section = find("cpu");
        if cpu_section.is_none() {
            diag.error("missing mandatory section [cpu]".to_string());
        }
        let memory_section = find("memory");
        if memory_section.is_none() {
            diag.error("missing mandatory section [memory]".to_string());
        }

        // Field extraction. The placeholder defaults never escape: the
        // error gate below fires before they could be used.
        let cpu = CpuConfig {
            address_width: field(cpu_section, "cpu", "address_width", parse_int, &mut diag)
                .unwrap_or(0) as u32,
            word_width: field(cpu_section, "cpu", "word_width", parse_int, &mut diag).unwrap_or(0)
                as u32,
            rand_seed: field(cpu_section, "cpu", "rand_seed", parse_int, &mut diag).unwrap_or(0),
        };

        let memory = MemoryConfig {
            size: field(memory_section, "memory", "size", parse_size, &mut diag).unwrap_or(0),
            page_size: field(memory_section, "memory", "page_size", parse_size, &mut diag)
                .unwrap_or(0),
            page_base_address: field(
                memory_section,
                "memory",
                "page_base_address",
                parse_address,
                &mut diag,
            )
            .unwrap_or(0),
            access_time_single: field(memory_section, "memory", "access_time_1", parse_time, &mut diag)
                .unwrap_or(0.0),
            access_time_burst: field(
                memory_section,
                "memory",
                "access_time_burst",
                parse_time,
                &mut diag,
            )
            .unwrap_or(0.0),
        };

        let mut raw_caches = Vec::with_capacity(levels);
        for n in 1..=levels.min(MAX_CACHE_LEVELS) {
            let name = format!("cache{n}");
            let section = find(&name);
            if section.is_none() {
                diag.error(format!("missing mandatory section [{name}]"));
            }
            raw_caches.push(RawCache {
                line_size: field(section, &name, "line_size", parse_size, &mut diag).unwrap_or(0),
                size: field(section, &name, "size", parse_size, &mut diag).unwrap_or(0),
                associativity: field(section, &name, "associativity", parse_associativity, &mut diag)
                    .unwrap_or(Associativity::Ways(0)),
                write_policy: field(section, &name, "write_policy", parse_write_policy, &mut diag)
                    .unwrap_or(WritePolicy::WriteBack),
                replacement_policy: field(
                    section,
                    &name,
                    "replacement_policy",
                    parse_replacement_policy,
                    &mut diag,
                )
                .unwrap_or(ReplacementPolicy::Lru),
                separated: field(section, &name, "separated", parse_bool, &mut diag).unwrap_or(false),
                access_time: field(section, &name, "access_time", parse_time, &mut diag)
                    .unwrap_or(0.0),
            });
        }

        if diag.errors > 0 {
            return Err(format!("configuration contains {} error(s)", diag.errors).into());
        }

        // Semantic validation over complete values.
        let caches = validate(&cpu, &memory, raw_caches, &mut diag);
        if diag.errors > 0 {
            return Err(format!("configuration contains {} error(s)", diag.errors).into());
        }

        Ok(Config {
            cpu,
            memory,
            caches,
            warnings: diag.warnings,
        })
    }
}

struct RawCache {
    line_size: u64,
    size: u64,
    associativity: Associativity,
    write_policy: WritePolicy,
    replacement_policy: ReplacementPolicy,
    separated: bool,
    access_time: f64,
}

fn validate(
    cpu: &CpuConfig,
    memory: &MemoryConfig,
    raw_caches: Vec<RawCache>,
    diag: &mut Diagnostics,
) -> Vec<CacheLevelConfig> {
    if !cpu.address_width.is_power_of_two() || cpu.address_width > 64 {
        diag.error("cpu:address_width must be a power of two up to 64".to_string());
    }
    if !cpu.word_width.is_power_of_two() || !(8..=64).contains(&cpu.word_width) {
        diag.error("cpu:word_width must be a power of two between 8 and 64".to_string());
    }
    let word_bytes = (cpu.word_width / 8).max(1) as u64;

    if cpu.address_width < 64 && memory.size > 1u64 << cpu.address_width {
        diag.warning(format!(
            "memory:size is too big for a {} bit machine",
            cpu.address_width
        ));
    }
    if !memory.page_size.is_power_of_two() {
        diag.error("memory:page_size must be a power of two".to_string());
    } else if memory.size % memory.page_size != 0 {
        diag.error("memory:size must be a multiple of memory:page_size".to_string());
    }
    if memory.page_size > 0 && memory.page_base_address % memory.page_size != 0 {
        diag.error("memory:page_base_address must be aligned to memory:page_size".to_string());
    }
    if memory.page_base_address >= memory.size {
        diag.error("memory:page_base_address is out of range".to_string());
    }

    let mut caches = Vec::with_capacity(raw_caches.len());
    for (i, raw) in raw_caches.into_iter().enumerate() {
        let name = format!("cache{}", i + 1);

        if !raw.line_size.is_power_of_two() {
            diag.error(format!("{name}:line_size must be a power of two"));
        }
        if raw.line_size < word_bytes {
            diag.error(format!("{name}:line_size must hold at least one word"));
        }
        if raw.line_size == 0 || raw.size % raw.line_size != 0 {
            diag.error(format!("{name}:size must be a multiple of {name}:line_size"));
        }

        let mut num_lines = if raw.line_size > 0 { raw.size / raw.line_size } else { 0 };
        if raw.separated {
            num_lines /= 2;
            if num_lines == 0 {
                diag.error(format!("{name}: a split cache needs at least two lines"));
            }
        }

        let ways = match raw.associativity {
            Associativity::Full => num_lines,
            Associativity::Ways(ways) => {
                if !ways.is_power_of_two() {
                    diag.error(format!("{name}:associativity must be a power of two"));
                } else if ways > num_lines {
                    diag.error(format!(
                        "{name}:associativity cannot be bigger than the number of lines"
                    ));
                }
                ways
            }
        };
        if ways > 0 && num_lines > 0 {
            let sets = num_lines / ways;
            if sets > 0 && !sets.is_power_of_two() {
                diag.error(format!("{name}: geometry must yield a power-of-two set count"));
            }
        }

        caches.push(CacheLevelConfig {
            line_size: raw.line_size,
            size: raw.size,
            associativity: ways as u32,
            write_policy: raw.write_policy,
            replacement_policy: raw.replacement_policy,
            separated: raw.separated,
            access_time: raw.access_time,
        });
    }

    // line fills travel whole lines between levels, so the sizes must agree
    if caches.windows(2).any(|pair| pair[0].line_size != pair[1].line_size) {
        diag.error("all caches must have the same line_size".to_string());
    }

    caches
}

#[derive(Debug, Default)]
struct Diagnostics {
    errors: u32,
    warnings: u32,
}

impl Diagnostics {
    fn error(&mut self, msg: String) {
        error!("{msg}");
        self.errors += 1;
    }

    fn warning(&mut self, msg: String) {
        warn!("{msg}");
        self.warnings += 1;
    }
}

#[derive(Debug, Default)]
struct Section {
    keys: Vec<(String, String)>,
}

impl Section {
    fn get(&self, key: &str) -> Option<&str> {
        self.keys.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// Split the file into named sections of key=value pairs. `#` and `;`
/// start comments; duplicate sections merge.
fn read_sections(text: &str, diag: &mut Diagnostics) -> Vec<(String, Section)> {
    let mut sections: Vec<(String, Section)> = Vec::new();
    let mut current = None;

    for (number, raw) in text.lines().enumerate() {
        let line = raw
            .split(['#', ';'])
            .next()
            .unwrap_or("")
            .trim();
        if line.is_empty() {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim().to_ascii_lowercase();
            let index = sections
                .iter()
                .position(|(n, _)| *n == name)
                .unwrap_or_else(|| {
                    sections.push((name.clone(), Section::default()));
                    sections.len() - 1
                });
            current = Some(index);
        } else if let Some((key, value)) = line.split_once('=') {
            match current {
                Some(index) => sections[index]
                    .1
                    .keys
                    .push((key.trim().to_ascii_lowercase(), value.trim().to_string())),
                None => diag.error(format!("line {}: key outside of any section", number + 1)),
            }
        } else {
            diag.error(format!(
                "line {}: expected `[section]` or `key = value`",
                number + 1
            ));
        }
    }

    sections
}

/// `cacheN` with N >= 1, anything else is unknown.
fn cache_section_number(name: &str) -> Option<usize> {
    let digits = name.strip_prefix("cache")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|&n| n >= 1)
}

/// Fetch and parse one key, logging a diagnostic when it is missing or
/// malformed. A missing *section* stays silent here: it is reported once
/// at the section level.
fn field<T>(
    section: Option<&Section>,
    section_name: &str,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
    diag: &mut Diagnostics,
) -> Option<T> {
    let section = section?;
    match section.get(key) {
        None => {
            diag.error(format!("missing mandatory key {section_name}:{key}"));
            None
        }
        Some(value) => match parse(value) {
            Some(parsed) => Some(parsed),
            None => {
                diag.error(format!("{section_name}:{key} value is not valid"));
                None
            }
        },
    }
}

/// Byte count with an optional base-2 `K`/`M`/`G` suffix, case insensitive.
fn parse_size(s: &str) -> Option<u64> {
    let (digits, multiplier) = match s.chars().last()? {
        'k' | 'K' => (&s[..s.len() - 1], 1u64 << 10),
        'm' | 'M' => (&s[..s.len() - 1], 1u64 << 20),
        'g' | 'G' => (&s[..s.len() - 1], 1u64 << 30),
        _ => (s, 1),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u64>().ok()?.checked_mul(multiplier)
}

fn parse_int(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Duration in seconds: an integer mantissa with an optional `m`/`u`/`n`/`p`
/// (milli/micro/nano/pico) suffix.
fn parse_time(s: &str) -> Option<f64> {
    let (digits, scale) = match s.chars().last()? {
        'm' => (&s[..s.len() - 1], 1e-3),
        'u' => (&s[..s.len() - 1], 1e-6),
        'n' => (&s[..s.len() - 1], 1e-9),
        'p' => (&s[..s.len() - 1], 1e-12),
        _ => (s, 1.0),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(digits.parse::<u64>().ok()? as f64 * scale)
}

/// `0x`-prefixed hexadecimal address.
fn parse_address(s: &str) -> Option<u64> {
    let hex = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    if hex.is_empty() {
        return None;
    }
    u64::from_str_radix(hex, 16).ok()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" => Some(true),
        "0" | "no" | "false" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
enum Associativity {
    Ways(u64),
    /// `F`: fully associative, one set spanning every line.
    Full,
}

fn parse_associativity(s: &str) -> Option<Associativity> {
    if s == "F" {
        Some(Associativity::Full)
    } else {
        parse_int(s).map(Associativity::Ways)
    }
}

fn parse_write_policy(s: &str) -> Option<WritePolicy> {
    match s {
        "wt" => Some(WritePolicy::WriteThrough),
        "wb" => Some(WritePolicy::WriteBack),
        _ => None,
    }
}

fn parse_replacement_policy(s: &str) -> Option<ReplacementPolicy> {
    match s {
        "lru" => Some(ReplacementPolicy::Lru),
        "lfu" => Some(ReplacementPolicy::Lfu),
        "rand" => Some(ReplacementPolicy::Rand),
        "fifo" => Some(ReplacementPolicy::Fifo),
        _ => None,
    }
}
