use std::{fs, path::Path};

use log::error;

use crate::storage::{MemOpKind, MemoryOperation, Stream};
use crate::Result;

/// An ordered trace of memory operations, replayed one per cycle.
#[derive(Debug)]
pub struct Trace {
    ops: Vec<MemoryOperation>,
}

impl Trace {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Trace> {
        let text = fs::read_to_string(&path)
            .map_err(|e| format!("cannot open trace file {}: {e}", path.as_ref().display()))?;
        Self::parse(&text)
    }

    /// Parse a trace. Every malformed line is reported with its line
    /// number; any error makes the whole trace unusable.
    pub fn parse(text: &str) -> Result<Trace> {
        let mut ops = Vec::new();
        let mut errors = 0u32;

        for (number, raw) in text.lines().enumerate() {
            // comments run to the end of the line, tabs count as spaces
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            match parse_line(line) {
                Ok(op) => ops.push(op),
                Err(msg) => {
                    error!("trace line {}: {msg}", number + 1);
                    errors += 1;
                }
            }
        }

        if errors > 0 {
            return Err(format!("trace contains {errors} error(s)").into());
        }
        Ok(Trace { ops })
    }

    pub fn operations(&self) -> &[MemoryOperation] {
        &self.ops
    }

    pub fn into_operations(self) -> Vec<MemoryOperation> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// One operation per line: `[!] L|S <0xaddress> I|D [payload]`. The
/// leading `!` marks a breakpoint. Every access is exactly one word.
fn parse_line(line: &str) -> std::result::Result<MemoryOperation, String> {
    let mut line = line;
    let breakpoint = line.starts_with('!');
    if breakpoint {
        line = &line[1..];
    }

    let mut kind = None;
    let mut address = None;
    let mut stream = None;
    let mut payload = None;

    for (index, field) in line.split_whitespace().enumerate() {
        match index {
            0 => {
                kind = Some(match field {
                    "L" => MemOpKind::Load,
                    "S" => MemOpKind::Store,
                    _ => return Err("memory operation must be load (L) or store (S)".to_string()),
                });
            }
            1 => {
                let hex = field
                    .strip_prefix("0x")
                    .or_else(|| field.strip_prefix("0X"))
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| "invalid or non hexadecimal address".to_string())?;
                address = Some(
                    u64::from_str_radix(hex, 16)
                        .map_err(|_| "invalid or non hexadecimal address".to_string())?,
                );
            }
            2 => {
                stream = Some(match field {
                    "I" => {
                        if kind == Some(MemOpKind::Store) {
                            return Err("cannot store (S) an instruction (I)".to_string());
                        }
                        Stream::Instruction
                    }
                    "D" => Stream::Data,
                    _ => return Err("stream must be instruction (I) or data (D)".to_string()),
                });
            }
            3 => {
                if kind == Some(MemOpKind::Load) {
                    return Err("the data field is not allowed in load (L) operations".to_string());
                }
                if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
                    return Err("invalid data".to_string());
                }
                payload = Some(field.parse::<u64>().map_err(|_| "invalid data".to_string())?);
            }
            _ => return Err("too many fields".to_string()),
        }
    }

    let (Some(kind), Some(address), Some(stream)) = (kind, address, stream) else {
        return Err("too few fields".to_string());
    };

    let mut op = match kind {
        MemOpKind::Load => MemoryOperation::load(address, stream, 1),
        // a store with no payload writes 0
        MemOpKind::Store => MemoryOperation::store(address, stream, vec![payload.unwrap_or(0)]),
    };
    op.breakpoint = breakpoint;
    Ok(op)
}
