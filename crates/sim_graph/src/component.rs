//! Component configuration.
//!
//! A [`ConfigComponent`] is one vertex of the configuration graph. A
//! top-level component owns its whole subcomponent tree inline, along with
//! every statistic enabled anywhere in that tree; subcomponents record only
//! the statistic name → id binding and delegate storage to the owner. There
//! is no back-pointer to the graph - operations that need cross-references
//! go through [`ConfigGraph`](crate::graph::ConfigGraph) by id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sim_model::ids::{ComponentId, LinkId, StatisticId};
use sim_model::svmap::MapKey;
use sim_model::{Params, RankInfo};

use crate::error::GraphError;
use crate::stats::ConfigStatistic;

/// Statistic load level before any explicit assignment.
pub const STAT_LOAD_LEVEL_UNINITIALIZED: u8 = 0xFF;

/// A port module attached to one port of a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigPortModule {
    /// Module type (`library.class`).
    pub kind: String,
    /// Module parameters.
    pub params: Params,
}

impl ConfigPortModule {
    /// Create a port module config.
    #[must_use]
    pub fn new(kind: &str, params: Params) -> Self {
        Self {
            kind: kind.to_string(),
            params,
        }
    }
}

/// Configuration of one component or subcomponent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigComponent {
    /// Unique id; subcomponents share their parent's low bits.
    pub id: ComponentId,
    /// Component name, or slot name for a subcomponent.
    pub name: String,
    /// Slot number; meaningful only for subcomponents.
    pub slot_num: i32,
    /// Component type (`library.class`).
    pub kind: String,
    /// Partitioning weight.
    pub weight: f64,
    /// Assigned placement.
    pub rank: RankInfo,
    /// Links attached to this component.
    pub links: Vec<LinkId>,
    /// Component parameters.
    pub params: Params,
    /// Statistic load level.
    pub stat_load_level: u8,
    /// Port name → modules loaded on that port, in load order.
    pub port_modules: BTreeMap<String, Vec<ConfigPortModule>>,
    /// Explicitly enabled statistic names and their ids.
    pub enabled_stat_names: BTreeMap<String, StatisticId>,
    /// Whether every statistic of this (sub)component is enabled.
    pub enabled_all_stats: bool,
    /// Shared configuration used when all statistics are enabled.
    pub all_stat_config: ConfigStatistic,
    /// Owned subcomponents.
    pub subcomponents: Vec<ConfigComponent>,
    /// Topology coordinates, padded to at least three dimensions.
    pub coords: Vec<f64>,
    /// Next subcomponent index; used by the top-level component only.
    pub(crate) next_sub_id: u16,
    /// Next statistic counter; used by the top-level component only.
    pub(crate) next_stat_id: u16,
    /// Statistic configurations, owned by the top-level component only.
    pub(crate) statistics: BTreeMap<StatisticId, ConfigStatistic>,
}

impl ConfigComponent {
    /// Create a new top-level component.
    #[must_use]
    pub fn new(id: ComponentId, name: &str, kind: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            slot_num: 0,
            kind: kind.to_string(),
            weight: 1.0,
            rank: RankInfo::default(),
            links: Vec::new(),
            params: Params::new(),
            stat_load_level: STAT_LOAD_LEVEL_UNINITIALIZED,
            port_modules: BTreeMap::new(),
            enabled_stat_names: BTreeMap::new(),
            enabled_all_stats: false,
            all_stat_config: ConfigStatistic::default(),
            subcomponents: Vec::new(),
            coords: vec![0.0; 3],
            next_sub_id: 1,
            next_stat_id: 1,
            statistics: BTreeMap::new(),
        }
    }

    fn new_sub(id: ComponentId, name: &str, slot: i32, kind: &str, weight: f64, rank: RankInfo) -> Self {
        Self {
            id,
            name: name.to_string(),
            slot_num: slot,
            kind: kind.to_string(),
            weight,
            rank,
            ..Self::new(id, name, kind)
        }
    }

    /// Returns `true` if this is a top-level component.
    #[must_use]
    pub fn is_top_level(&self) -> bool {
        self.id.is_top_level()
    }

    /// Assign a placement to this component and all its subcomponents.
    pub fn set_rank(&mut self, rank: RankInfo) {
        self.rank = rank;
        for sub in &mut self.subcomponents {
            sub.set_rank(rank);
        }
    }

    /// Assign a partition weight to this component and all subcomponents.
    pub fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
        for sub in &mut self.subcomponents {
            sub.set_weight(weight);
        }
    }

    /// Set topology coordinates, padding with zeros to three dimensions.
    pub fn set_coordinates(&mut self, coords: Vec<f64>) {
        self.coords = coords;
        while self.coords.len() < 3 {
            self.coords.push(0.0);
        }
    }

    /// Add a parameter to this component.
    pub fn add_parameter(&mut self, key: &str, value: &str, overwrite: bool) {
        self.params.insert(key, value, overwrite);
    }

    /// Load a port module onto `port`. Returns its index in the port's
    /// module list.
    pub fn add_port_module(&mut self, port: &str, kind: &str, params: Params) -> usize {
        let list = self.port_modules.entry(port.to_string()).or_default();
        list.push(ConfigPortModule::new(kind, params));
        list.len() - 1
    }

    /// Set the statistic load level, optionally for the whole subtree.
    pub fn set_stat_load_level(&mut self, level: u8, recursively: bool) {
        self.stat_load_level = level;
        if recursively {
            for sub in &mut self.subcomponents {
                sub.set_stat_load_level(level, true);
            }
        }
    }

    /// All link ids attached to this component and its subcomponents.
    #[must_use]
    pub fn all_links(&self) -> Vec<LinkId> {
        let mut out = self.links.clone();
        for sub in &self.subcomponents {
            out.extend(sub.all_links());
        }
        out
    }

    /// Rewrite every link id in the tree. Used when graphs from different
    /// ranks merge and link ids must be re-keyed.
    pub fn remap_links(&mut self, f: &dyn Fn(LinkId) -> LinkId) {
        for id in &mut self.links {
            *id = f(*id);
        }
        for sub in &mut self.subcomponents {
            sub.remap_links(f);
        }
    }

    /// Collect every link id in the tree and clear the link lists. Used
    /// when splitting graphs.
    pub fn clear_all_links(&mut self) -> Vec<LinkId> {
        let mut out = std::mem::take(&mut self.links);
        for sub in &mut self.subcomponents {
            out.extend(sub.clear_all_links());
        }
        out
    }

    // -----------------------------------------------------------------------
    // Tree navigation (valid on any node; allocation only on the top level)
    // -----------------------------------------------------------------------

    /// Find a node of this tree by id (including this node itself).
    #[must_use]
    pub fn find_node(&self, id: ComponentId) -> Option<&ConfigComponent> {
        if self.id == id {
            return Some(self);
        }
        self.subcomponents.iter().find_map(|s| s.find_node(id))
    }

    /// Find a node of this tree by id, mutably.
    pub fn find_node_mut(&mut self, id: ComponentId) -> Option<&mut ConfigComponent> {
        if self.id == id {
            return Some(self);
        }
        self.subcomponents
            .iter_mut()
            .find_map(|s| s.find_node_mut(id))
    }

    /// Resolve a subcomponent by hierarchical name (`slot[num]:rest`); a
    /// missing `[num]` means slot 0.
    #[must_use]
    pub fn find_subcomponent_by_name(&self, name: &str) -> Option<&ConfigComponent> {
        let (head, rest) = match name.split_once(':') {
            Some((h, r)) => (h, Some(r)),
            None => (name, None),
        };
        let (slot_name, slot_num) = match head.split_once('[') {
            Some((n, idx)) => (n, idx.strip_suffix(']')?.parse::<i32>().ok()?),
            None => (head, 0),
        };
        let sub = self
            .subcomponents
            .iter()
            .find(|s| s.name == slot_name && s.slot_num == slot_num)?;
        match rest {
            None => Some(sub),
            Some(rest) => sub.find_subcomponent_by_name(rest),
        }
    }

    /// The full hierarchical name of a node in this tree
    /// (`top:slot[num]:slot[num]`), or `None` if the id is not in the tree.
    #[must_use]
    pub fn full_name_of(&self, id: ComponentId) -> Option<String> {
        if self.id == id {
            return Some(self.name.clone());
        }
        for sub in &self.subcomponents {
            if let Some(tail) = sub.sub_path(id) {
                return Some(format!("{}:{tail}", self.name));
            }
        }
        None
    }

    /// Rendered path of `id` within a subcomponent subtree, each segment in
    /// `slot[num]` form.
    fn sub_path(&self, id: ComponentId) -> Option<String> {
        let own = format!("{}[{}]", self.name, self.slot_num);
        if self.id == id {
            return Some(own);
        }
        for sub in &self.subcomponents {
            if let Some(tail) = sub.sub_path(id) {
                return Some(format!("{own}:{tail}"));
            }
        }
        None
    }

    // -----------------------------------------------------------------------
    // Operations valid only on the top-level component
    // -----------------------------------------------------------------------

    /// Add a subcomponent in `slot[slot_num]` of node `parent` (which may be
    /// this component or any node in its tree).
    ///
    /// # Errors
    ///
    /// [`GraphError::UnknownComponent`] if `parent` is not in this tree;
    /// [`GraphError::DuplicateSubComponent`] if the (name, slot) pair is
    /// already filled.
    pub fn add_subcomponent(
        &mut self,
        parent: ComponentId,
        name: &str,
        kind: &str,
        slot_num: i32,
    ) -> Result<ComponentId, GraphError> {
        debug_assert!(self.is_top_level());
        {
            let parent_node = self
                .find_node(parent)
                .ok_or(GraphError::UnknownComponent(parent))?;
            if parent_node
                .subcomponents
                .iter()
                .any(|s| s.name == name && s.slot_num == slot_num)
            {
                return Err(GraphError::DuplicateSubComponent {
                    name: name.to_string(),
                    slot: slot_num,
                });
            }
        }
        let sub_index = self.next_sub_id;
        self.next_sub_id += 1;
        let sid = ComponentId::subcomponent(self.id, sub_index);

        let parent_node = self
            .find_node_mut(parent)
            .ok_or(GraphError::UnknownComponent(parent))?;
        let (weight, rank) = (parent_node.weight, parent_node.rank);
        parent_node
            .subcomponents
            .push(ConfigComponent::new_sub(sid, name, slot_num, kind, weight, rank));
        Ok(sid)
    }

    fn alloc_statistic_id(&mut self) -> StatisticId {
        debug_assert!(self.is_top_level());
        let counter = self.next_stat_id;
        self.next_stat_id += 1;
        StatisticId::new(self.id, counter)
    }

    /// Enable a named statistic on node `target` (and its subtree when
    /// `recursively`). Repeated enables of the same name on the same node
    /// share one backing statistic.
    ///
    /// # Errors
    ///
    /// [`GraphError::UnknownComponent`] if `target` is not in this tree.
    pub fn enable_statistic(
        &mut self,
        target: ComponentId,
        stat_name: &str,
        params: &Params,
        recursively: bool,
    ) -> Result<StatisticId, GraphError> {
        debug_assert!(self.is_top_level());
        if recursively {
            let children: Vec<ComponentId> = self
                .find_node(target)
                .ok_or(GraphError::UnknownComponent(target))?
                .subcomponents
                .iter()
                .map(|s| s.id)
                .collect();
            for child in children {
                self.enable_statistic(child, stat_name, params, true)?;
            }
        }

        let existing = self
            .find_node(target)
            .ok_or(GraphError::UnknownComponent(target))?
            .enabled_stat_names
            .get(stat_name)
            .copied();
        let sid = match existing {
            Some(sid) => sid,
            None => {
                let sid = self.alloc_statistic_id();
                if let Some(node) = self.find_node_mut(target) {
                    node.enabled_stat_names.insert(stat_name.to_string(), sid);
                }
                sid
            }
        };
        let cfg = self
            .statistics
            .entry(sid)
            .or_insert_with(|| ConfigStatistic::new(sid, stat_name));
        cfg.params.merge(params);
        Ok(sid)
    }

    /// Enable every statistic of node `target` (and subtree when
    /// `recursively`) through the shared enable-all configuration.
    ///
    /// # Errors
    ///
    /// [`GraphError::UnknownComponent`] if `target` is not in this tree.
    pub fn enable_all_statistics(
        &mut self,
        target: ComponentId,
        params: &Params,
        recursively: bool,
    ) -> Result<(), GraphError> {
        let node = self
            .find_node_mut(target)
            .ok_or(GraphError::UnknownComponent(target))?;
        node.enabled_all_stats = true;
        node.all_stat_config.id = StatisticId::ALL;
        node.all_stat_config.params.merge(params);
        if recursively {
            let children: Vec<ComponentId> = node.subcomponents.iter().map(|s| s.id).collect();
            for child in children {
                self.enable_all_statistics(child, params, true)?;
            }
        }
        Ok(())
    }

    /// Create an anonymous statistic owned by this component.
    pub fn create_statistic(&mut self) -> StatisticId {
        let sid = self.alloc_statistic_id();
        self.statistics.insert(sid, ConfigStatistic::new_unnamed(sid));
        sid
    }

    /// Bind an existing statistic id to a statistic name on node `target`,
    /// sharing one backing instance between the enable sites.
    ///
    /// # Errors
    ///
    /// [`GraphError::UnknownStatistic`] if `sid` does not exist on this
    /// component; [`GraphError::UnknownComponent`] if `target` is not in
    /// this tree.
    pub fn reuse_statistic(
        &mut self,
        target: ComponentId,
        stat_name: &str,
        sid: StatisticId,
    ) -> Result<(), GraphError> {
        let stat = self
            .statistics
            .get_mut(&sid)
            .ok_or(GraphError::UnknownStatistic(sid))?;
        stat.shared = true;
        let node = self
            .find_node_mut(target)
            .ok_or(GraphError::UnknownComponent(target))?;
        node.enabled_stat_names.insert(stat_name.to_string(), sid);
        Ok(())
    }

    /// Add one parameter to the named statistic on node `target` (and
    /// subtree when `recursively`).
    ///
    /// # Errors
    ///
    /// [`GraphError::UnknownComponent`] when the target is missing. An
    /// unknown statistic name is ignored on nodes that never enabled it.
    pub fn add_statistic_parameter(
        &mut self,
        target: ComponentId,
        stat_name: &str,
        key: &str,
        value: &str,
        recursively: bool,
    ) -> Result<(), GraphError> {
        if recursively {
            let children: Vec<ComponentId> = self
                .find_node(target)
                .ok_or(GraphError::UnknownComponent(target))?
                .subcomponents
                .iter()
                .map(|s| s.id)
                .collect();
            for child in children {
                self.add_statistic_parameter(child, stat_name, key, value, true)?;
            }
        }
        let sid = self
            .find_node(target)
            .ok_or(GraphError::UnknownComponent(target))?
            .enabled_stat_names
            .get(stat_name)
            .copied();
        if let Some(sid) = sid {
            if let Some(stat) = self.statistics.get_mut(&sid) {
                stat.params.insert(key, value, true);
            }
        }
        Ok(())
    }

    /// Look up an enabled statistic by name on node `target`.
    #[must_use]
    pub fn find_statistic_by_name(&self, target: ComponentId, name: &str) -> Option<&ConfigStatistic> {
        let sid = *self.find_node(target)?.enabled_stat_names.get(name)?;
        self.statistics.get(&sid)
    }

    /// Look up a statistic configuration by id.
    #[must_use]
    pub fn find_statistic(&self, sid: StatisticId) -> Option<&ConfigStatistic> {
        self.statistics.get(&sid)
    }

    /// All statistic configurations owned by this component.
    #[must_use]
    pub fn statistics(&self) -> &BTreeMap<StatisticId, ConfigStatistic> {
        &self.statistics
    }

    /// Render this component and its subtree for status output.
    #[must_use]
    pub fn format_tree(&self, indent: usize) -> String {
        use std::fmt::Write as _;
        let pad = " ".repeat(indent);
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{pad}Component {} (id = {}) type = {} weight = {} rank = {}",
            self.name, self.id, self.kind, self.weight, self.rank
        );
        if !self.links.is_empty() {
            let ids: Vec<String> = self.links.iter().map(ToString::to_string).collect();
            let _ = writeln!(out, "{pad}  links: {}", ids.join(" "));
        }
        let params = self.params.format_all(&format!("{pad}    "));
        if !params.is_empty() {
            let _ = writeln!(out, "{pad}  params:");
            out.push_str(&params);
        }
        for sub in &self.subcomponents {
            out.push_str(&sub.format_tree(indent + 2));
        }
        out
    }
}

impl MapKey for ConfigComponent {
    type Key = ComponentId;
    fn key(&self) -> ComponentId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn top() -> ConfigComponent {
        ConfigComponent::new(ComponentId::top_level(0), "cpu", "proc.core")
    }

    #[test]
    fn test_add_subcomponent_allocates_under_top_level() {
        let mut c = top();
        let s1 = c.add_subcomponent(c.id, "l1cache", "mem.cache", 0).unwrap();
        assert_eq!(s1.parent(), c.id);
        assert!(!s1.is_top_level());

        // Nested subcomponents still allocate from the top-level counter.
        let s2 = c.add_subcomponent(s1, "mshr", "mem.mshr", 0).unwrap();
        assert_eq!(s2.parent(), c.id);
        assert_ne!(s1, s2);
    }

    #[test]
    fn test_duplicate_slot_rejected() {
        let mut c = top();
        c.add_subcomponent(c.id, "l1cache", "mem.cache", 0).unwrap();
        let err = c.add_subcomponent(c.id, "l1cache", "mem.cache", 0);
        assert!(matches!(err, Err(GraphError::DuplicateSubComponent { .. })));
        // A different slot number is fine.
        assert!(c.add_subcomponent(c.id, "l1cache", "mem.cache", 1).is_ok());
    }

    #[test]
    fn test_set_rank_cascades() {
        let mut c = top();
        let s = c.add_subcomponent(c.id, "sub", "x.y", 0).unwrap();
        c.set_rank(RankInfo::new(1, 1));
        assert_eq!(c.find_node(s).unwrap().rank, RankInfo::new(1, 1));
    }

    #[test]
    fn test_enable_statistic_owned_by_top_level() {
        let mut c = top();
        let s = c.add_subcomponent(c.id, "sub", "x.y", 0).unwrap();
        let params = Params::from_pairs([("rate", "1ms")]);
        let sid = c.enable_statistic(s, "hits", &params, false).unwrap();

        // Stored on the top level, named on the subcomponent.
        assert!(c.find_statistic(sid).is_some());
        assert_eq!(
            c.find_node(s).unwrap().enabled_stat_names.get("hits"),
            Some(&sid)
        );

        // Re-enabling shares the same id.
        let sid2 = c.enable_statistic(s, "hits", &params, false).unwrap();
        assert_eq!(sid, sid2);
    }

    #[test]
    fn test_reuse_statistic_marks_shared() {
        let mut c = top();
        let s = c.add_subcomponent(c.id, "sub", "x.y", 0).unwrap();
        let sid = c
            .enable_statistic(c.id, "hits", &Params::new(), false)
            .unwrap();
        c.reuse_statistic(s, "hits", sid).unwrap();
        assert!(c.find_statistic(sid).unwrap().shared);
        assert_eq!(
            c.find_node(s).unwrap().enabled_stat_names.get("hits"),
            Some(&sid)
        );
    }

    #[test]
    fn test_find_subcomponent_by_name() {
        let mut c = top();
        let s = c.add_subcomponent(c.id, "cache", "mem.cache", 2).unwrap();
        let nested = c.add_subcomponent(s, "mshr", "mem.mshr", 0).unwrap();

        assert_eq!(c.find_subcomponent_by_name("cache[2]").unwrap().id, s);
        assert_eq!(c.find_subcomponent_by_name("cache[2]:mshr").unwrap().id, nested);
        assert!(c.find_subcomponent_by_name("cache").is_none()); // slot 0 empty
    }

    #[test]
    fn test_coordinates_padded() {
        let mut c = top();
        c.set_coordinates(vec![1.0]);
        assert_eq!(c.coords, vec![1.0, 0.0, 0.0]);
    }
}
