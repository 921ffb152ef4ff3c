// SPDX-License-Identifier: GPL-2.0
//
// Turns a raw snapshot into per-row totals and per-node sums, paired
// with the previous cycle's values so the view layer can work in
// deltas. Pure given its inputs; the only carried state is the
// `previous` map, owned by the sample loop.

use std::collections::BTreeMap;

use crate::snapshot::Snapshot;
use crate::topology::Topology;

fn sub_or_zero(curr: u64, prev: u64) -> u64 {
    curr.checked_sub(prev).unwrap_or(0)
}

/// One cycle's worth of counts for a single IRQ row.
#[derive(Debug, Clone, Default)]
pub struct CpuCounts {
    pub total: u64,
    pub per_cpu: BTreeMap<usize, u64>,
    pub per_node: BTreeMap<usize, u64>,
}

#[derive(Debug, Clone)]
pub struct IrqStat {
    pub id: String,
    pub label: String,
    pub cur: CpuCounts,
    pub prev: CpuCounts,
}

impl IrqStat {
    pub fn total_delta(&self) -> u64 {
        sub_or_zero(self.cur.total, self.prev.total)
    }

    pub fn node_delta(&self, node: usize) -> u64 {
        let cur = self.cur.per_node.get(&node).copied().unwrap_or(0);
        let prev = self.prev.per_node.get(&node).copied().unwrap_or(0);
        sub_or_zero(cur, prev)
    }

    pub fn cpu_delta(&self, cpu: usize) -> u64 {
        let cur = self.cur.per_cpu.get(&cpu).copied().unwrap_or(0);
        let prev = self.prev.per_cpu.get(&cpu).copied().unwrap_or(0);
        sub_or_zero(cur, prev)
    }
}

/// Combine @snap with the prior cycle's counts. Output preserves
/// snapshot row order, which later acts as the stable-sort tiebreak.
/// Rows new this cycle get a zero-filled previous; rows absent from
/// @snap are dropped on the floor.
pub fn aggregate(
    snap: &Snapshot,
    topo: &Topology,
    previous: &BTreeMap<String, CpuCounts>,
) -> Vec<IrqStat> {
    snap.rows
        .iter()
        .map(|row| {
            let mut cur = CpuCounts::default();
            for node in topo.nodes().keys() {
                cur.per_node.insert(*node, 0);
            }
            for (i, cpu) in snap.cpus.iter().enumerate() {
                let count = row.counts[i];
                cur.total += count;
                cur.per_cpu.insert(*cpu, count);
                if let Some(node) = topo.node_of(*cpu) {
                    *cur.per_node.entry(node).or_insert(0) += count;
                }
            }

            IrqStat {
                id: row.id.clone(),
                label: row.label.clone(),
                prev: previous.get(&row.id).cloned().unwrap_or_default(),
                cur,
            }
        })
        .collect()
}

/// Build the next cycle's `previous` map from this cycle's rows.
pub fn carry(rows: &[IrqStat]) -> BTreeMap<String, CpuCounts> {
    rows.iter()
        .map(|r| (r.id.clone(), r.cur.clone()))
        .collect()
}
