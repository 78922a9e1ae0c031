//! JSON model reader.
//!
//! Builds a [`ConfigGraph`] from a JSON model description with sections
//! `program_options`, `shared_params`, `statistics_options`,
//! `statistics_group`, `components` (recursive `subcomponents`), and
//! `links`. `shared_params`/`global_params` and
//! `params_shared_sets`/`params_global_sets` are accepted as aliases of the
//! same concepts.

use std::collections::BTreeMap;

use serde_json::Value;
use sim_model::ids::{ComponentId, LinkId};
use sim_model::Params;

use crate::error::GraphError;
use crate::graph::ConfigGraph;

/// Result of loading a model: the graph plus the program options the file
/// carried for the front end.
#[derive(Debug, Default)]
pub struct LoadedModel {
    /// The populated configuration graph.
    pub graph: ConfigGraph,
    /// `program_options` key/value pairs.
    pub program_options: BTreeMap<String, String>,
}

/// Parse a JSON model description.
///
/// # Errors
///
/// [`GraphError::Model`] for malformed or missing sections; builder errors
/// are propagated as-is.
pub fn load_json_model(text: &str) -> Result<LoadedModel, GraphError> {
    let root: Value =
        serde_json::from_str(text).map_err(|e| GraphError::Model(format!("invalid JSON: {e}")))?;

    let mut model = LoadedModel::default();

    if let Some(options) = root.get("program_options").and_then(Value::as_object) {
        for (k, v) in options {
            model
                .program_options
                .insert(k.clone(), value_to_string(v));
        }
    }

    discover_shared_params(&mut model.graph, &root);
    discover_components(&mut model.graph, &root)?;
    discover_links(&mut model.graph, &root)?;
    discover_statistics(&mut model.graph, &root)?;

    Ok(model)
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn str_field<'a>(obj: &'a Value, key: &str, what: &str) -> Result<&'a str, GraphError> {
    obj.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| GraphError::Model(format!("missing '{key}' in {what}")))
}

fn discover_shared_params(graph: &mut ConfigGraph, root: &Value) {
    for section in ["shared_params", "global_params"] {
        if let Some(sets) = root.get(section).and_then(Value::as_object) {
            for (set_name, params) in sets {
                if let Some(map) = params.as_object() {
                    for (k, v) in map {
                        graph.add_shared_param(set_name, k, &value_to_string(v));
                    }
                }
            }
        }
    }
}

fn apply_params(graph: &mut ConfigGraph, id: ComponentId, obj: &Value) -> Result<(), GraphError> {
    if let Some(params) = obj.get("params").and_then(Value::as_object) {
        let comp = graph
            .find_component_mut(id)
            .ok_or(GraphError::UnknownComponent(id))?;
        for (k, v) in params {
            comp.add_parameter(k, &value_to_string(v), false);
        }
    }
    for alias in ["params_shared_sets", "params_global_sets"] {
        if let Some(sets) = obj.get(alias).and_then(Value::as_array) {
            let comp = graph
                .find_component_mut(id)
                .ok_or(GraphError::UnknownComponent(id))?;
            for set in sets {
                if let Some(name) = set.as_str() {
                    comp.params.subscribe_shared_set(name);
                }
            }
        }
    }
    Ok(())
}

fn apply_statistics(graph: &mut ConfigGraph, id: ComponentId, obj: &Value) -> Result<(), GraphError> {
    let Some(stats) = obj.get("statistics").and_then(Value::as_array) else {
        return Ok(());
    };
    for stat in stats {
        let name = str_field(stat, "name", "statistic")?;
        let mut params = Params::new();
        if let Some(map) = stat.get("params").and_then(Value::as_object) {
            for (k, v) in map {
                params.insert(k, &value_to_string(v), true);
            }
        }
        graph.enable_statistic(id, name, &params, false)?;
    }
    Ok(())
}

fn discover_subcomponents(
    graph: &mut ConfigGraph,
    parent: ComponentId,
    obj: &Value,
) -> Result<(), GraphError> {
    let Some(subs) = obj.get("subcomponents").and_then(Value::as_array) else {
        return Ok(());
    };
    for sub in subs {
        let slot_name = str_field(sub, "slot_name", "subcomponent")?;
        let kind = str_field(sub, "type", "subcomponent")?;
        let slot_number = sub
            .get("slot_number")
            .and_then(Value::as_i64)
            .ok_or_else(|| GraphError::Model("missing 'slot_number' in subcomponent".to_string()))?;

        let sid = graph.add_subcomponent(parent, slot_name, kind, slot_number as i32)?;
        apply_params(graph, sid, sub)?;
        apply_statistics(graph, sid, sub)?;
        discover_subcomponents(graph, sid, sub)?;
    }
    Ok(())
}

fn discover_components(graph: &mut ConfigGraph, root: &Value) -> Result<(), GraphError> {
    let comps = root
        .get("components")
        .and_then(Value::as_array)
        .ok_or_else(|| GraphError::Model("no 'components' section".to_string()))?;

    for comp in comps {
        let name = str_field(comp, "name", "component")?;
        let kind = str_field(comp, "type", "component")?;
        let id = graph.add_component(name, kind)?;

        apply_params(graph, id, comp)?;

        if let Some(partition) = comp.get("partition").and_then(Value::as_object) {
            let rank = partition.get("rank").and_then(Value::as_u64).unwrap_or(0) as u32;
            let thread = partition.get("thread").and_then(Value::as_u64).unwrap_or(0) as u32;
            if let Some(c) = graph.find_component_mut(id) {
                c.set_rank(sim_model::RankInfo::new(rank, thread));
            }
        }

        apply_statistics(graph, id, comp)?;
        discover_subcomponents(graph, id, comp)?;
    }
    Ok(())
}

fn discover_links(graph: &mut ConfigGraph, root: &Value) -> Result<(), GraphError> {
    let links = root
        .get("links")
        .and_then(Value::as_array)
        .ok_or_else(|| GraphError::Model("no 'links' section".to_string()))?;

    let mut by_name: BTreeMap<String, LinkId> = BTreeMap::new();
    for link in links {
        let name = str_field(link, "name", "link")?;
        let no_cut = link.get("noCut").and_then(Value::as_bool).unwrap_or(false);

        let id = match by_name.get(name) {
            Some(&id) => id,
            None => {
                let id = graph.create_link(name, None);
                by_name.insert(name.to_string(), id);
                id
            }
        };
        if no_cut {
            graph.set_link_no_cut(id)?;
        }

        for side in ["left", "right"] {
            let Some(end) = link.get(side) else {
                return Err(GraphError::Model(format!(
                    "missing '{side}' side of link {name}"
                )));
            };
            // A side may instead name the remote (rank, thread) of a
            // non-local link in a parallel load.
            if let Some(rank) = end.get("rank").and_then(Value::as_u64) {
                let thread = end.get("thread").and_then(Value::as_u64).unwrap_or(0);
                graph.add_nonlocal_link(id, rank as u32, thread as u32)?;
                continue;
            }
            let comp_name = str_field(end, "component", &format!("{side} side of link {name}"))?;
            let port = str_field(end, "port", &format!("{side} side of link {name}"))?;
            let latency = str_field(end, "latency", &format!("{side} side of link {name}"))?;
            let comp = graph
                .find_component_by_name(comp_name)
                .ok_or_else(|| GraphError::UnknownComponentName(comp_name.to_string()))?
                .id;
            graph.add_link(comp, id, port, Some(latency))?;
        }
    }
    Ok(())
}

fn discover_statistics(graph: &mut ConfigGraph, root: &Value) -> Result<(), GraphError> {
    if let Some(options) = root.get("statistics_options") {
        if let Some(level) = options.get("statisticLoadLevel").and_then(Value::as_u64) {
            graph.set_statistic_load_level(level as u8);
        }
        if let Some(output) = options.get("statisticOutput").and_then(Value::as_str) {
            graph.set_statistic_output(output);
        }
        if let Some(params) = options.get("params").and_then(Value::as_object) {
            for (k, v) in params {
                graph.add_statistic_output_parameter(k, &value_to_string(v));
            }
        }
    }

    let Some(groups) = root.get("statistics_group").and_then(Value::as_array) else {
        return Ok(());
    };
    for group in groups {
        let name = str_field(group, "name", "statistics group")?.to_string();

        if let Some(freq) = group.get("frequency").and_then(Value::as_str) {
            graph.stat_group_mut(&name).set_frequency(freq)?;
        }

        if let Some(output) = group.get("output") {
            let kind = str_field(output, "type", "statistics group output")?;
            let mut cfg = crate::stats::ConfigStatOutput::new(kind);
            if let Some(params) = output.get("params").and_then(Value::as_object) {
                for (k, v) in params {
                    cfg.add_parameter(k, &value_to_string(v));
                }
            }
            let outputs = &mut graph.stats_config_mut().outputs;
            outputs.push(cfg);
            let slot = outputs.len() - 1;
            graph.stat_group_mut(&name).set_output(slot);
        }

        if let Some(stats) = group.get("statistics").and_then(Value::as_array) {
            for stat in stats {
                let stat_name = str_field(stat, "name", "statistics group statistic")?;
                let mut params = Params::new();
                if let Some(map) = stat.get("params").and_then(Value::as_object) {
                    for (k, v) in map {
                        params.insert(k, &value_to_string(v), true);
                    }
                }
                graph.stat_group_mut(&name).add_statistic(stat_name, &params)?;
            }
        }

        if let Some(members) = group.get("components").and_then(Value::as_array) {
            for member in members {
                let comp_name = member
                    .as_str()
                    .ok_or_else(|| GraphError::Model("group member must be a name".to_string()))?;
                let id = graph
                    .find_component_by_name(comp_name)
                    .ok_or_else(|| GraphError::UnknownComponentName(comp_name.to_string()))?
                    .id;
                graph.stat_group_mut(&name).add_component(id);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"{
        "program_options": { "stop-at": "100us", "timebase": "1ps" },
        "shared_params": { "memory": { "mem.size": "4GiB" } },
        "components": [
            {
                "name": "cpu0",
                "type": "proc.core",
                "params": { "clock": "2GHz" },
                "params_shared_sets": ["memory"],
                "partition": { "rank": 0, "thread": 0 },
                "subcomponents": [
                    {
                        "slot_name": "l1cache",
                        "type": "mem.cache",
                        "slot_number": 0,
                        "params": { "size": "32KiB" }
                    }
                ]
            },
            {
                "name": "cpu1",
                "type": "proc.core",
                "partition": { "rank": 1, "thread": 0 },
                "statistics": [ { "name": "cycles", "params": { "rate": "1ms" } } ]
            }
        ],
        "links": [
            {
                "name": "bus",
                "left":  { "component": "cpu0", "port": "east", "latency": "10ns" },
                "right": { "component": "cpu1", "port": "west", "latency": "10ns" }
            },
            {
                "name": "offnode",
                "left":  { "component": "cpu1", "port": "north", "latency": "50ns" },
                "right": { "rank": 2, "thread": 1 }
            }
        ],
        "statistics_options": { "statisticLoadLevel": 4, "statisticOutput": "stat.output.csv" }
    }"#;

    #[test]
    fn test_load_model_components_and_params() {
        let model = load_json_model(MODEL).unwrap();
        let g = &model.graph;

        assert_eq!(model.program_options.get("stop-at").unwrap(), "100us");
        assert_eq!(g.num_components(), 2);

        let cpu0 = g.find_component_by_name("cpu0").unwrap();
        assert_eq!(cpu0.kind, "proc.core");
        assert_eq!(cpu0.params.get("clock").as_deref(), Some("2GHz"));
        // Shared set subscription resolves through the process registry.
        assert_eq!(cpu0.params.get("mem.size").as_deref(), Some("4GiB"));

        let l1 = g.find_component_by_name("cpu0:l1cache").unwrap();
        assert_eq!(l1.kind, "mem.cache");
        assert_eq!(l1.params.get("size").as_deref(), Some("32KiB"));
    }

    #[test]
    fn test_load_model_links() {
        let model = load_json_model(MODEL).unwrap();
        let g = &model.graph;

        let cpu0 = g.find_component_by_name("cpu0").unwrap();
        assert_eq!(cpu0.links.len(), 1);

        let bus = g.links().get(cpu0.links[0]).unwrap();
        assert_eq!(bus.name, "bus");
        assert_eq!(bus.connection_count(), 2);

        // The off-node link is non-local with the remote placement recorded.
        let nonlocal = g.links().iter().find(|l| l.name == "offnode").unwrap();
        assert!(nonlocal.is_nonlocal());
        assert_eq!(nonlocal.remote.unwrap(), sim_model::RankInfo::new(2, 1));
    }

    #[test]
    fn test_load_model_statistics() {
        let model = load_json_model(MODEL).unwrap();
        let g = &model.graph;
        assert_eq!(g.stats_config().load_level, 4);
        assert_eq!(g.stats_config().outputs[0].kind, "stat.output.csv");

        let cpu1 = g.find_component_by_name("cpu1").unwrap();
        assert!(cpu1.enabled_stat_names.contains_key("cycles"));
    }

    #[test]
    fn test_missing_sections_rejected() {
        assert!(load_json_model("{}").is_err());
        assert!(load_json_model("not json").is_err());
    }
}
