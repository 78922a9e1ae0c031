//! XML graph writer.
//!
//! Components render as `<component id name type>` with nested `<param/>`
//! records; links as `<link id name left right leftport rightport/>`.

use std::fmt::Write as _;

use crate::graph::ConfigGraph;

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Render the graph as XML.
#[must_use]
pub fn write_xml(graph: &ConfigGraph) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" ?>\n");
    out.push_str("<component id=\"root\" name=\"root\">\n");
    out.push_str("   <component id=\"system\" name=\"system\">\n");

    for comp in graph.components().iter() {
        let _ = writeln!(
            out,
            "      <component id=\"system.{}\" name=\"{}\" type=\"{}\">",
            escape(&comp.name),
            escape(&comp.name),
            escape(&comp.kind)
        );
        for key in comp.params.keys() {
            let value = comp.params.get(&key).unwrap_or_default();
            let _ = writeln!(
                out,
                "         <param name=\"{}\" value=\"{}\"/>",
                escape(&key),
                escape(&value)
            );
        }
        out.push_str("      </component>\n");
    }

    for l in graph.links().iter() {
        let end_name = |side: usize| -> String {
            l.ends[side]
                .component
                .and_then(|id| graph.find_component(id.parent()))
                .map_or_else(String::new, |c| c.name.clone())
        };
        let _ = writeln!(
            out,
            "      <link id=\"{name}\" name=\"{name}\"\n         left=\"{left}\" right=\"{right}\"\n         leftport=\"{lp}\" rightport=\"{rp}\"/>",
            name = escape(&l.name),
            left = escape(&end_name(0)),
            right = escape(&end_name(1)),
            lp = escape(&l.ends[0].port),
            rp = escape(&l.ends[1].port),
        );
    }

    out.push_str("   </component>\n");
    out.push_str("</component>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xml_contains_components_and_links() {
        let mut g = ConfigGraph::new();
        let c0 = g.add_component("n0", "t.x").unwrap();
        let c1 = g.add_component("n1", "t.y").unwrap();
        g.find_component_mut(c0)
            .unwrap()
            .add_parameter("freq", "1GHz", true);
        let l = g.create_link("wire", Some("1ns"));
        g.add_link(c0, l, "a", None).unwrap();
        g.add_link(c1, l, "b", None).unwrap();

        let xml = write_xml(&g);
        assert!(xml.contains("<component id=\"system.n0\" name=\"n0\" type=\"t.x\">"));
        assert!(xml.contains("<param name=\"freq\" value=\"1GHz\"/>"));
        assert!(xml.contains("left=\"n0\" right=\"n1\""));
        assert!(xml.contains("leftport=\"a\" rightport=\"b\""));
    }
}
