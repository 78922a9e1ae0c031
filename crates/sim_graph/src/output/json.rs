//! JSON graph writer.
//!
//! Emits the same schema the JSON model reader consumes, so a dumped graph
//! can be loaded back. Shared-set subscriptions are written under
//! `params_shared_sets`; the reader also accepts the older
//! `params_global_sets` spelling.

use serde_json::{json, Map, Value};

use crate::component::ConfigComponent;
use crate::error::GraphError;
use crate::graph::ConfigGraph;

/// Render the graph as a JSON model description.
///
/// # Errors
///
/// [`GraphError::Model`] when serialization fails.
pub fn write_json(
    graph: &ConfigGraph,
    program_options: &std::collections::BTreeMap<String, String>,
) -> Result<String, GraphError> {
    let mut root = Map::new();

    if !program_options.is_empty() {
        root.insert(
            "program_options".to_string(),
            Value::Object(
                program_options
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        );
    }

    root.insert(
        "components".to_string(),
        Value::Array(graph.components().iter().map(component_value).collect()),
    );

    let mut links = Vec::new();
    for l in graph.links().iter() {
        let mut obj = Map::new();
        obj.insert("name".to_string(), Value::String(l.name.clone()));
        if l.no_cut {
            obj.insert("noCut".to_string(), Value::Bool(true));
        }
        for (side, key) in ["left", "right"].iter().enumerate() {
            let value = match l.ends[side].component {
                Some(id) => {
                    let name = graph
                        .components()
                        .get(id.parent())
                        .and_then(|top| top.full_name_of(id))
                        .unwrap_or_default();
                    json!({
                        "component": name,
                        "port": &l.ends[side].port,
                        "latency": l.latency_display(side, graph.time_base()),
                    })
                }
                None => match l.remote {
                    Some(remote) => json!({ "rank": remote.rank, "thread": remote.thread }),
                    None => Value::Null,
                },
            };
            obj.insert((*key).to_string(), value);
        }
        links.push(Value::Object(obj));
    }
    root.insert("links".to_string(), Value::Array(links));

    let stats = graph.stats_config();
    root.insert(
        "statistics_options".to_string(),
        json!({
            "statisticLoadLevel": stats.load_level,
            "statisticOutput": &stats.outputs[0].kind,
            "params": params_value(&stats.outputs[0].params),
        }),
    );

    if !stats.groups.is_empty() {
        let mut groups = Vec::new();
        for group in stats.groups.values() {
            let members: Vec<Value> = group
                .components
                .iter()
                .filter_map(|&id| graph.find_component(id))
                .map(|c| Value::String(c.name.clone()))
                .collect();
            let stat_list: Vec<Value> = group
                .stats
                .iter()
                .map(|(name, params)| json!({ "name": name, "params": params_value(params) }))
                .collect();
            let mut obj = Map::new();
            obj.insert("name".to_string(), Value::String(group.name.clone()));
            if let Some(freq) = group.output_frequency {
                obj.insert(
                    "frequency".to_string(),
                    Value::String(freq.to_string_best_si()),
                );
            }
            if group.output_id != 0 {
                let out = &stats.outputs[group.output_id];
                obj.insert(
                    "output".to_string(),
                    json!({ "type": &out.kind, "params": params_value(&out.params) }),
                );
            }
            obj.insert("statistics".to_string(), Value::Array(stat_list));
            obj.insert("components".to_string(), Value::Array(members));
            groups.push(Value::Object(obj));
        }
        root.insert("statistics_group".to_string(), Value::Array(groups));
    }

    serde_json::to_string_pretty(&Value::Object(root))
        .map_err(|e| GraphError::Model(format!("JSON writer failed: {e}")))
}

fn params_value(params: &sim_model::Params) -> Value {
    Value::Object(
        params
            .local_keys()
            .into_iter()
            .filter_map(|k| params.get(&k).map(|v| (k, Value::String(v))))
            .collect(),
    )
}

fn component_value(comp: &ConfigComponent) -> Value {
    let mut obj = Map::new();
    obj.insert("name".to_string(), Value::String(comp.name.clone()));
    obj.insert("type".to_string(), Value::String(comp.kind.clone()));

    let params = params_value(&comp.params);
    if !params.as_object().is_some_and(Map::is_empty) {
        obj.insert("params".to_string(), params);
    }
    let sets = comp.params.subscribed_shared_sets();
    if !sets.is_empty() {
        obj.insert(
            "params_shared_sets".to_string(),
            Value::Array(sets.iter().map(|s| Value::String(s.clone())).collect()),
        );
    }
    if comp.rank.is_assigned() {
        obj.insert(
            "partition".to_string(),
            json!({ "rank": comp.rank.rank, "thread": comp.rank.thread }),
        );
    }
    if !comp.enabled_stat_names.is_empty() {
        obj.insert(
            "statistics".to_string(),
            Value::Array(
                comp.enabled_stat_names
                    .keys()
                    .map(|name| json!({ "name": name }))
                    .collect(),
            ),
        );
    }
    if !comp.subcomponents.is_empty() {
        obj.insert(
            "subcomponents".to_string(),
            Value::Array(comp.subcomponents.iter().map(subcomponent_value).collect()),
        );
    }
    Value::Object(obj)
}

fn subcomponent_value(sub: &ConfigComponent) -> Value {
    let mut obj = Map::new();
    obj.insert("slot_name".to_string(), Value::String(sub.name.clone()));
    obj.insert("type".to_string(), Value::String(sub.kind.clone()));
    obj.insert("slot_number".to_string(), json!(sub.slot_num));
    let params = params_value(&sub.params);
    if !params.as_object().is_some_and(Map::is_empty) {
        obj.insert("params".to_string(), params);
    }
    let sets = sub.params.subscribed_shared_sets();
    if !sets.is_empty() {
        obj.insert(
            "params_shared_sets".to_string(),
            Value::Array(sets.iter().map(|s| Value::String(s.clone())).collect()),
        );
    }
    if !sub.subcomponents.is_empty() {
        obj.insert(
            "subcomponents".to_string(),
            Value::Array(sub.subcomponents.iter().map(subcomponent_value).collect()),
        );
    }
    Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::load_json_model;

    #[test]
    fn test_written_graph_loads_back() {
        let mut g = ConfigGraph::new();
        let c0 = g.add_component("alpha", "t.a").unwrap();
        let c1 = g.add_component("beta", "t.b").unwrap();
        g.find_component_mut(c0)
            .unwrap()
            .add_parameter("clock", "1GHz", true);
        g.find_component_mut(c0)
            .unwrap()
            .set_rank(sim_model::RankInfo::new(0, 0));
        g.find_component_mut(c1)
            .unwrap()
            .set_rank(sim_model::RankInfo::new(0, 0));
        g.add_subcomponent(c0, "cache", "t.c", 0).unwrap();
        let l = g.create_link("wire", Some("5ns"));
        g.add_link(c0, l, "out", None).unwrap();
        g.add_link(c1, l, "in", None).unwrap();

        let text = write_json(&g, &std::collections::BTreeMap::new()).unwrap();
        let reloaded = load_json_model(&text).unwrap();
        assert_eq!(reloaded.graph.num_components(), 2);
        assert!(reloaded.graph.find_component_by_name("alpha:cache").is_some());
        let link = reloaded.graph.links().iter().next().unwrap();
        assert_eq!(link.name, "wire");
        assert_eq!(link.connection_count(), 2);
    }
}
