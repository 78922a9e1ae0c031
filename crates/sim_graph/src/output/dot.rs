//! DOT graph writer.
//!
//! Verbosity selects how much detail is rendered:
//!
//! - `>= 2`: component types alongside names
//! - `>= 4`: subcomponents as dotted satellites
//! - `>= 6`: ports as record fields, edges attached to ports
//! - `>= 8`: link names and latencies on edges
//! - `>= 10`: components clustered by (rank, thread)

use std::fmt::Write as _;

use sim_model::{RankInfo, SparseVectorMap};

use crate::component::ConfigComponent;
use crate::graph::ConfigGraph;
use crate::link::ConfigLink;

/// Render the graph in DOT form.
#[must_use]
pub fn write_dot(graph: &ConfigGraph, world: RankInfo, verbosity: u32) -> String {
    let mut out = String::new();
    out.push_str("graph \"simulation\" {\noverlap=scale;\nsplines=spline;\n");

    if verbosity >= 10 {
        out.push_str("newrank = true;\n");
        out.push_str("node [shape=record];\n");
        for rank in 0..world.rank {
            let _ = writeln!(out, "subgraph cluster_{rank} {{");
            let _ = writeln!(out, "label=\"Rank {rank}\";");
            for thread in 0..world.thread {
                let _ = writeln!(out, "subgraph cluster_{rank}_{thread} {{");
                let _ = writeln!(out, "label=\"Thread {thread}\";");
                for comp in graph.components().iter() {
                    if comp.rank == RankInfo::new(rank, thread) {
                        write_component(&mut out, comp, graph.links(), verbosity, None);
                    }
                }
                out.push_str("};\n");
            }
            out.push_str("};\n");
        }
    } else {
        out.push_str("node [shape=record];\ngraph [style=invis];\n\n");
        for comp in graph.components().iter() {
            let _ = writeln!(out, "subgraph cluster_{} {{", comp.id.raw());
            write_component(&mut out, comp, graph.links(), verbosity, None);
            out.push_str("}\n\n");
        }
    }

    out.push('\n');
    for l in graph.links().iter() {
        write_link(&mut out, l, graph, verbosity);
    }
    out.push_str("\n}\n");
    out
}

fn write_component(
    out: &mut String,
    comp: &ConfigComponent,
    links: &SparseVectorMap<ConfigLink>,
    verbosity: u32,
    parent: Option<&ConfigComponent>,
) {
    let color = if parent.is_some() { "color=gray," } else { "" };
    let _ = write!(out, "{} [{}label=\"{{<main> ", comp.id.raw(), color);
    if verbosity >= 2 {
        let _ = write!(out, "{}\\n{}", comp.name, comp.kind);
    } else {
        let _ = write!(out, "{}", comp.name);
    }

    if verbosity >= 6 {
        let mut remaining = comp.links.len();
        if remaining != 0 {
            out.push_str(" |\n");
        }
        for &lid in &comp.links {
            let Some(link) = links.get(lid) else { continue };
            let side = usize::from(link.ends[0].component != Some(comp.id));
            let port = &link.ends[side].port;
            let _ = write!(out, "<{port}> Port: {port}");
            if remaining > 1 {
                out.push_str(" |\n");
            }
            remaining -= 1;
        }
    }
    out.push_str("}\"];\n\n");

    if let Some(parent) = parent {
        let _ = writeln!(
            out,
            "{}:\"main\" -- {}:\"main\" [style=dotted];\n",
            comp.id.raw(),
            parent.id.raw()
        );
    }

    if verbosity >= 4 {
        for sub in &comp.subcomponents {
            write_component(out, sub, links, verbosity, Some(comp));
        }
    }
}

fn node_of(link: &ConfigLink, side: usize) -> u64 {
    link.ends[side].component.map_or(0, sim_model::ids::ComponentId::raw)
}

fn write_link(out: &mut String, link: &ConfigLink, graph: &ConfigGraph, verbosity: u32) {
    let min_side = usize::from(link.ends[0].latency.cycles() > link.ends[1].latency.cycles());
    if verbosity >= 8 {
        let _ = writeln!(
            out,
            "{}:\"{}\" -- {}:\"{}\" [label=\"{}\\n{}\"]; ",
            node_of(link, 0),
            link.ends[0].port,
            node_of(link, 1),
            link.ends[1].port,
            link.name,
            link.latency_display(min_side, graph.time_base()),
        );
    } else if verbosity >= 6 {
        let _ = writeln!(
            out,
            "{}:\"{}\" -- {}:\"{}\"",
            node_of(link, 0),
            link.ends[0].port,
            node_of(link, 1),
            link.ends[1].port,
        );
    } else {
        let _ = writeln!(out, "{} -- {}", node_of(link, 0), node_of(link, 1));
    }
}
