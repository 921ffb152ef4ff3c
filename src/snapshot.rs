// SPDX-License-Identifier: GPL-2.0
//
// One parsed sample of the kernel's interrupt counter table
// (/proc/interrupts or a file in the same format).

use std::path::Path;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use log::debug;

/// Column labels carry this prefix in the header line ("CPU0", "CPU12").
const CPU_TAG: &str = "CPU";

#[derive(Debug, Clone)]
pub struct RawRow {
    /// Leading token with the trailing ':' stripped. Usually an IRQ
    /// number, but pseudo-rows like "NMI" or "ERR" keep their name.
    pub id: String,
    /// One count per header column, in header order.
    pub counts: Vec<u64>,
    /// Whatever trails the counts, rejoined with single spaces.
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    /// CPU ids decoded from the header, in column order.
    pub cpus: Vec<usize>,
    pub rows: Vec<RawRow>,
}

impl Snapshot {
    pub fn read(path: &Path, include_all_rows: bool) -> Result<Snapshot> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        Self::parse(&text, include_all_rows)
            .with_context(|| format!("Failed to parse {:?}", path))
    }

    /// Parse one counter table. Row acceptance: numeric row ids only,
    /// unless @include_all_rows also admits the pseudo-rows (NMI, LOC,
    /// ERR, ...). A row with fewer count fields than header columns is
    /// skipped, not a cycle failure. A count field that fails to parse
    /// as an integer counts as missing, so a malformed-but-full row is
    /// skipped the same way.
    pub fn parse(text: &str, include_all_rows: bool) -> Result<Snapshot> {
        let mut lines = text.lines();
        let header = loop {
            match lines.next() {
                Some(l) if !l.trim().is_empty() => break l,
                Some(_) => continue,
                None => bail!("Empty counter table"),
            }
        };

        let mut cpus = Vec::new();
        for tok in header.split_whitespace() {
            let id = tok
                .strip_prefix(CPU_TAG)
                .and_then(|n| n.parse::<usize>().ok());
            match id {
                Some(id) => cpus.push(id),
                None => bail!("Bad header column {:?}", tok),
            }
        }
        if cpus.is_empty() {
            bail!("Header lists no CPU columns");
        }

        let mut rows = Vec::new();
        for line in lines {
            let mut toks = line.split_whitespace();
            let Some(first) = toks.next() else {
                continue;
            };
            let id = first.trim_end_matches(':');

            if !include_all_rows && id.parse::<u64>().is_err() {
                continue;
            }

            let mut counts = Vec::with_capacity(cpus.len());
            let mut short = false;
            for _ in 0..cpus.len() {
                match toks.next().and_then(|t| t.parse::<u64>().ok()) {
                    Some(v) => counts.push(v),
                    None => {
                        short = true;
                        break;
                    }
                }
            }
            if short {
                debug!("snapshot: skipping short row {:?}", id);
                continue;
            }

            rows.push(RawRow {
                id: id.to_string(),
                counts,
                label: toks.collect::<Vec<_>>().join(" "),
            });
        }

        Ok(Snapshot { cpus, rows })
    }
}
