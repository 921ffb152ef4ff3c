// SPDX-License-Identifier: GPL-2.0
//
// NUMA topology resolution. The node <-> CPU mapping is sourced either
// from `numactl --hardware` or from a static text blob in the same
// format, and is rebuilt lazily whenever a counter snapshot mentions a
// CPU we have never seen (hotplug / late enable).

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Command;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use log::debug;
use log::info;
use sscanf::sscanf;

/// Where the node/CPU listing comes from.
#[derive(Debug, Clone)]
pub enum TopologySource {
    /// Invoke `numactl --hardware` and scan its stdout.
    Numactl,
    /// Read a static file containing `node <id> cpus: ...` lines.
    File(PathBuf),
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    node_cpus: BTreeMap<usize, Vec<usize>>,
    cpu_node: BTreeMap<usize, usize>,
}

impl Topology {
    /// Resolve the topology from @source. Failure is fatal to the
    /// monitor: without node membership the per-node columns are
    /// meaningless.
    pub fn resolve(source: &TopologySource) -> Result<Topology> {
        let text = match source {
            TopologySource::Numactl => {
                let out = match Command::new("numactl").arg("--hardware").output() {
                    Ok(out) => out,
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        bail!("numactl is not installed")
                    }
                    Err(e) => return Err(e).context("Failed to run numactl --hardware"),
                };
                if !out.status.success() {
                    bail!("numactl --hardware exited with {}", out.status);
                }
                String::from_utf8(out.stdout).context("numactl output is not UTF-8")?
            }
            TopologySource::File(path) => match std::fs::read_to_string(path) {
                Ok(text) => text,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    bail!("topology file {:?} not found", path)
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to read {:?}", path))
                }
            },
        };

        let topo = Self::parse(&text)?;
        for (node, cpus) in topo.node_cpus.iter() {
            info!(
                "NODE[{:02}] cpus= [{}]",
                node,
                cpus.iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            );
        }
        Ok(topo)
    }

    /// Scan `node <id> cpus: <id> <id> ...` lines. A node listing zero
    /// CPUs is legal and still gets an entry so its column renders.
    /// Lines of any other shape are ignored.
    pub fn parse(text: &str) -> Result<Topology> {
        let mut node_cpus = BTreeMap::new();
        let mut cpu_node = BTreeMap::new();

        for line in text.lines() {
            let line = line.trim();
            let Some((head, rest)) = line.split_once(':') else {
                continue;
            };
            let node = match sscanf!(head.trim(), "node {usize} cpus") {
                Ok(node) => node,
                Err(_) => {
                    debug!("topology: ignoring line {:?}", line);
                    continue;
                }
            };

            let mut cpus = Vec::new();
            for tok in rest.split_whitespace() {
                let cpu = tok
                    .parse::<usize>()
                    .with_context(|| format!("Bad CPU id {:?} on node {} line", tok, node))?;
                if let Some(prev) = cpu_node.insert(cpu, node) {
                    bail!("CPU {} listed under both node {} and node {}", cpu, prev, node);
                }
                cpus.push(cpu);
            }
            node_cpus.insert(node, cpus);
        }

        if node_cpus.is_empty() {
            bail!("No 'node <id> cpus:' lines found in topology source");
        }

        Ok(Topology { node_cpus, cpu_node })
    }

    /// Node ids in ascending order with their CPU lists, in
    /// source-declared CPU order.
    pub fn nodes(&self) -> &BTreeMap<usize, Vec<usize>> {
        &self.node_cpus
    }

    pub fn has_node(&self, node: usize) -> bool {
        self.node_cpus.contains_key(&node)
    }

    pub fn node_of(&self, cpu: usize) -> Option<usize> {
        self.cpu_node.get(&cpu).copied()
    }

    pub fn has_cpu(&self, cpu: usize) -> bool {
        self.cpu_node.contains_key(&cpu)
    }
}
