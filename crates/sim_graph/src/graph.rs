//! The configuration graph.
//!
//! [`ConfigGraph`] owns every component tree and link of the model, plus the
//! statistics configuration. Model descriptions populate it through the
//! builder API; it is then validated, partitioned, split per rank, and
//! finally handed to elaboration.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use sim_model::ids::{ComponentId, LinkId, StatisticId};
use sim_model::time::{SimTime, TimeBase, MAX_SIM_TIME};
use sim_model::{namecheck, Params, RankInfo, SparseVectorMap};

use crate::component::ConfigComponent;
use crate::error::GraphError;
use crate::link::{self, ConfigLink, LinkLatency, LinkOrder};
use crate::partition::{PartitionComponent, PartitionGraph, PartitionLink};
use crate::registry::ElementRegistry;
use crate::stats::{ConfigStatGroup, StatsConfig};

/// Per-category cap on invalid-name warnings.
const MAX_INVALID_NAME_PRINTS: usize = 10;

static BAD_COMP_NAME_COUNT: AtomicUsize = AtomicUsize::new(0);
static BAD_LINK_NAME_COUNT: AtomicUsize = AtomicUsize::new(0);

fn warn_invalid_name(name: &str, what: &'static str, counter: &AtomicUsize) {
    let seen = counter.fetch_add(1, Ordering::Relaxed);
    if seen < MAX_INVALID_NAME_PRINTS {
        tracing::warn!(name, "{what} name is not valid");
    } else if seen == MAX_INVALID_NAME_PRINTS {
        tracing::warn!(
            limit = MAX_INVALID_NAME_PRINTS,
            "number of invalid {what} names exceeds limit, suppressing further warnings"
        );
    }
}

/// State carried forward from a checkpoint into a restarted graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartState {
    /// (rank, thread) world size of the checkpointed run.
    pub ranks: RankInfo,
    /// Simulated time at checkpoint.
    pub current_sim_cycle: SimTime,
    /// Scheduler priority at checkpoint.
    pub current_priority: i32,
    /// Minimum cross-rank partition latency of the checkpointed run.
    pub min_part: SimTime,
    /// Time base the checkpointed latencies were resolved against.
    pub min_part_timebase: Option<TimeBase>,
    /// Highest event id issued before the checkpoint.
    pub max_event_id: u64,
    /// Element library names needed to reload plugins.
    pub lib_names: BTreeSet<String>,
    /// Serialized shared-object manager blob.
    pub shared_objects: Vec<u8>,
    /// Serialized statistics configuration blob.
    pub stats_config: Vec<u8>,
}

impl Default for RestartState {
    fn default() -> Self {
        Self {
            ranks: RankInfo::default(),
            current_sim_cycle: 0,
            current_priority: 0,
            min_part: MAX_SIM_TIME,
            min_part_timebase: None,
            max_event_id: 0,
            lib_names: BTreeSet::new(),
            shared_objects: Vec::new(),
            stats_config: Vec::new(),
        }
    }
}

/// A graph of components and links.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigGraph {
    links: SparseVectorMap<ConfigLink>,
    comps: SparseVectorMap<ConfigComponent>,
    stats_config: StatsConfig,
    time_base: Option<TimeBase>,
    /// Restart-only state; present when this graph was loaded from a
    /// checkpoint.
    pub restart: Option<RestartState>,

    #[serde(skip)]
    comps_by_name: BTreeMap<String, ComponentId>,
    #[serde(skip)]
    next_component_index: u32,
}

impl ConfigGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Builder API
    // -----------------------------------------------------------------------

    /// Create a new top-level component.
    ///
    /// # Errors
    ///
    /// [`GraphError::DuplicateComponentName`] when the name is taken.
    pub fn add_component(&mut self, name: &str, kind: &str) -> Result<ComponentId, GraphError> {
        if !namecheck::is_component_name_valid(name) {
            warn_invalid_name(name, "component", &BAD_COMP_NAME_COUNT);
        }
        if self.comps_by_name.contains_key(name) {
            return Err(GraphError::DuplicateComponentName {
                name: name.to_string(),
            });
        }
        let id = ComponentId::top_level(self.next_component_index);
        self.next_component_index += 1;
        self.comps.insert(ConfigComponent::new(id, name, kind));
        self.comps_by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Add a subcomponent under `parent` (a component or subcomponent id).
    ///
    /// # Errors
    ///
    /// Propagates unknown-parent and duplicate-slot errors.
    pub fn add_subcomponent(
        &mut self,
        parent: ComponentId,
        name: &str,
        kind: &str,
        slot_num: i32,
    ) -> Result<ComponentId, GraphError> {
        if !namecheck::is_slot_name_valid(name) {
            warn_invalid_name(name, "slot", &BAD_COMP_NAME_COUNT);
        }
        let top = self
            .comps
            .get_mut(parent.parent())
            .ok_or(GraphError::UnknownComponent(parent))?;
        top.add_subcomponent(parent, name, kind, slot_num)
    }

    /// Create a link, optionally recording a latency for both sides.
    ///
    /// The name is not checked for uniqueness: a duplicate name will
    /// self-rectify because link attachment goes by id, not name.
    pub fn create_link(&mut self, name: &str, latency: Option<&str>) -> LinkId {
        if !namecheck::is_link_name_valid(name) {
            warn_invalid_name(name, "link", &BAD_LINK_NAME_COUNT);
        }
        let id = LinkId(self.links.len() as u32);
        let mut link = ConfigLink::new(id, name);
        if let Some(lat) = latency {
            let idx = link::latency_index(lat);
            link.ends[0].latency = LinkLatency::Pending(idx);
            link.ends[1].latency = LinkLatency::Pending(idx);
        }
        self.links.insert(link);
        id
    }

    /// Attach a link to a component port.
    ///
    /// A `None` latency means use the one recorded at link creation.
    ///
    /// # Errors
    ///
    /// Over-connection, conflicting non-local state, or a missing latency.
    pub fn add_link(
        &mut self,
        comp_id: ComponentId,
        link_id: LinkId,
        port: &str,
        latency: Option<&str>,
    ) -> Result<(), GraphError> {
        let link = self
            .links
            .get_mut(link_id)
            .ok_or(GraphError::UnknownLink(link_id))?;

        let count = link.connection_count();
        if count >= 2 {
            return Err(GraphError::LinkOverConnected {
                name: link.name.clone(),
            });
        }
        if count == 1 && link.is_nonlocal() {
            return Err(GraphError::LinkNonLocalConflict {
                name: link.name.clone(),
            });
        }
        if latency.is_none() && !link.ends[0].latency.is_set() {
            return Err(GraphError::LinkWithoutLatency {
                name: link.name.clone(),
            });
        }

        let index = count as usize;
        link.order = LinkOrder::Building(count + 1);
        link.ends[index].component = Some(comp_id);
        link.ends[index].port = port.to_string();
        if let Some(lat) = latency {
            link.ends[index].latency = LinkLatency::Pending(link::latency_index(lat));
        }

        // The link joins the component's list unless it is already there,
        // which can only happen when both ends attach to the same component.
        let already_listed = index == 1 && link.ends[0].component == Some(comp_id);
        if !already_listed {
            let comp = self
                .find_component_mut(comp_id)
                .ok_or(GraphError::UnknownComponent(comp_id))?;
            comp.links.push(link_id);
        }
        Ok(())
    }

    /// Record the remote (rank, thread) for a link whose other side lives on
    /// another partition of a parallel load.
    ///
    /// # Errors
    ///
    /// [`GraphError::LinkBadNonLocal`] when already non-local or already
    /// fully connected.
    pub fn add_nonlocal_link(&mut self, link_id: LinkId, rank: u32, thread: u32) -> Result<(), GraphError> {
        let link = self
            .links
            .get_mut(link_id)
            .ok_or(GraphError::UnknownLink(link_id))?;
        if link.is_nonlocal() || link.connection_count() == 2 {
            return Err(GraphError::LinkBadNonLocal {
                name: link.name.clone(),
            });
        }
        link.remote = Some(RankInfo::new(rank, thread));
        Ok(())
    }

    /// Forbid the partitioner from cutting this link.
    ///
    /// # Errors
    ///
    /// [`GraphError::UnknownLink`] for an unknown id.
    pub fn set_link_no_cut(&mut self, link_id: LinkId) -> Result<(), GraphError> {
        let link = self
            .links
            .get_mut(link_id)
            .ok_or(GraphError::UnknownLink(link_id))?;
        link.no_cut = true;
        Ok(())
    }

    /// Publish a key/value pair into a process-wide shared parameter set.
    pub fn add_shared_param(&mut self, set: &str, key: &str, value: &str) {
        sim_model::params::insert_shared(set, key, value, true);
    }

    /// Set the default statistic output backend.
    pub fn set_statistic_output(&mut self, kind: &str) {
        self.stats_config.outputs[0].kind = kind.to_string();
    }

    /// Replace the default statistic output's parameters.
    pub fn set_statistic_output_params(&mut self, params: Params) {
        self.stats_config.outputs[0].params = params;
    }

    /// Add one parameter to the default statistic output.
    pub fn add_statistic_output_parameter(&mut self, key: &str, value: &str) {
        self.stats_config.outputs[0].params.insert(key, value, true);
    }

    /// Set the statistic system load level.
    pub fn set_statistic_load_level(&mut self, level: u8) {
        self.stats_config.load_level = level;
    }

    /// The statistic group with this name, created on first use.
    pub fn stat_group_mut(&mut self, name: &str) -> &mut ConfigStatGroup {
        self.stats_config
            .groups
            .entry(name.to_string())
            .or_insert_with(|| ConfigStatGroup::new(name))
    }

    /// The statistics configuration.
    #[must_use]
    pub fn stats_config(&self) -> &StatsConfig {
        &self.stats_config
    }

    /// The statistics configuration, mutably.
    pub fn stats_config_mut(&mut self) -> &mut StatsConfig {
        &mut self.stats_config
    }

    /// Enable a named statistic on a component or subcomponent.
    ///
    /// # Errors
    ///
    /// Propagates unknown-component errors.
    pub fn enable_statistic(
        &mut self,
        comp: ComponentId,
        stat_name: &str,
        params: &Params,
        recursively: bool,
    ) -> Result<StatisticId, GraphError> {
        let top = self
            .comps
            .get_mut(comp.parent())
            .ok_or(GraphError::UnknownComponent(comp))?;
        top.enable_statistic(comp, stat_name, params, recursively)
    }

    /// Enable every statistic of a component or subcomponent.
    ///
    /// # Errors
    ///
    /// Propagates unknown-component errors.
    pub fn enable_all_statistics(
        &mut self,
        comp: ComponentId,
        params: &Params,
        recursively: bool,
    ) -> Result<(), GraphError> {
        let top = self
            .comps
            .get_mut(comp.parent())
            .ok_or(GraphError::UnknownComponent(comp))?;
        top.enable_all_statistics(comp, params, recursively)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The link map.
    #[must_use]
    pub fn links(&self) -> &SparseVectorMap<ConfigLink> {
        &self.links
    }

    /// The component map (top-level components).
    #[must_use]
    pub fn components(&self) -> &SparseVectorMap<ConfigComponent> {
        &self.comps
    }

    /// The component map, mutably.
    pub fn components_mut(&mut self) -> &mut SparseVectorMap<ConfigComponent> {
        &mut self.comps
    }

    /// Number of top-level components.
    #[must_use]
    pub fn num_components(&self) -> usize {
        self.comps.len()
    }

    /// Number of top-level components placed on the given rank.
    #[must_use]
    pub fn num_components_in_rank(&self, rank: u32) -> usize {
        self.comps.iter().filter(|c| c.rank.rank == rank).count()
    }

    /// Returns `true` if at least one component is placed at `rank`.
    #[must_use]
    pub fn contains_component_in_rank(&self, rank: RankInfo) -> bool {
        self.comps.iter().any(|c| c.rank == rank)
    }

    /// Assign every component (and its subcomponents) to one placement.
    pub fn set_component_ranks(&mut self, rank: RankInfo) {
        for comp in self.comps.iter_mut() {
            comp.set_rank(rank);
        }
    }

    /// Returns `true` if the id resolves to a component or subcomponent.
    #[must_use]
    pub fn contains_component(&self, id: ComponentId) -> bool {
        self.find_component(id).is_some()
    }

    /// Find a component or subcomponent by id.
    #[must_use]
    pub fn find_component(&self, id: ComponentId) -> Option<&ConfigComponent> {
        self.comps.get(id.parent()).and_then(|c| c.find_node(id))
    }

    /// Find a component or subcomponent by id, mutably.
    pub fn find_component_mut(&mut self, id: ComponentId) -> Option<&mut ConfigComponent> {
        self.comps
            .get_mut(id.parent())
            .and_then(|c| c.find_node_mut(id))
    }

    /// Find a component by (possibly hierarchical) name:
    /// `comp` or `comp:slot[num]:…`.
    #[must_use]
    pub fn find_component_by_name(&self, name: &str) -> Option<&ConfigComponent> {
        let (head, rest) = match name.split_once(':') {
            Some((h, r)) => (h, Some(r)),
            None => (name, None),
        };
        let id = *self.comps_by_name.get(head)?;
        let comp = self.comps.get(id)?;
        match rest {
            None => Some(comp),
            Some(rest) => comp.find_subcomponent_by_name(rest),
        }
    }

    /// Find a statistic configuration by id.
    #[must_use]
    pub fn find_statistic(&self, sid: StatisticId) -> Option<&crate::stats::ConfigStatistic> {
        self.comps.get(sid.component())?.find_statistic(sid)
    }

    /// Rebuild the name index and the id counter after deserialization.
    pub fn rebuild_name_index(&mut self) {
        self.comps_by_name = self
            .comps
            .iter()
            .map(|c| (c.name.clone(), c.id))
            .collect();
        self.next_component_index = self
            .comps
            .iter()
            .map(|c| c.id.raw() as u32 + 1)
            .max()
            .unwrap_or(0);
    }

    /// The time base latencies were resolved against, once cleanup ran.
    #[must_use]
    pub fn time_base(&self) -> Option<&TimeBase> {
        self.time_base.as_ref()
    }

    // -----------------------------------------------------------------------
    // Post-construction finalization and validation
    // -----------------------------------------------------------------------

    /// Finalize the graph after model construction.
    ///
    /// Resolves every pending latency index to a cycle count, assigns the
    /// deterministic delivery-order tags (alphabetically by link name,
    /// counting from 1, identical on every rank holding the same graph),
    /// and force-registers group statistics on each member component.
    ///
    /// # Errors
    ///
    /// Propagates latency-parse failures and unknown group members.
    pub fn post_creation_cleanup(&mut self, tb: &TimeBase) -> Result<(), GraphError> {
        let resolved = link::resolve_latency_vector(tb)?;
        for l in self.links.iter_mut() {
            l.resolve_latencies(&resolved);
        }
        self.time_base = Some(tb.clone());

        // Delivery order goes alphabetically by name; the sort key is not
        // otherwise observable.
        let mut by_name: Vec<(String, LinkId)> = self
            .links
            .iter()
            .map(|l| (l.name.clone(), l.id))
            .collect();
        by_name.sort();
        for (tag, (_, id)) in by_name.into_iter().enumerate() {
            if let Some(l) = self.links.get_mut(id) {
                l.order = LinkOrder::Final(tag as u32 + 1);
            }
        }

        // Group statistics are enabled on every member component so the
        // elaboration sees them like any other enabled statistic.
        let groups: Vec<(Vec<ComponentId>, Vec<(String, Params)>)> = self
            .stats_config
            .groups
            .values()
            .map(|g| {
                (
                    g.components.clone(),
                    g.stats.iter().map(|(n, p)| (n.clone(), p.clone())).collect(),
                )
            })
            .collect();
        for (members, stats) in groups {
            for comp in members {
                if self.contains_component(comp) {
                    for (name, params) in &stats {
                        self.enable_statistic(comp, name, params, false)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Check for errors that cannot be detected during construction:
    /// unused links, dangling links, unknown ports, and ports used by two
    /// different links.
    ///
    /// Each problem is reported through the log; the returned error carries
    /// the count.
    ///
    /// # Errors
    ///
    /// [`GraphError::StructuralErrors`] when any problem was found.
    pub fn check_structural_errors(&self, registry: &ElementRegistry) -> Result<(), GraphError> {
        let mut problems = 0usize;

        for l in self.links.iter() {
            if l.connection_count() == 0 || l.ends[0].component.is_none() {
                tracing::warn!(link = l.name, "found unused link");
                problems += 1;
            } else if l.ends[1].component.is_none() && !l.is_nonlocal() {
                let owner = l.ends[0]
                    .component
                    .and_then(|id| self.find_component(id))
                    .map_or_else(String::new, |c| c.name.clone());
                tracing::warn!(
                    link = l.name,
                    component = owner,
                    "found dangling link, connected on one side only"
                );
                problems += 1;
            }
        }

        for comp in self.comps.iter() {
            problems += self.check_ports_of(comp, registry);
        }

        // Statistic groups must only name statistics their member types
        // declare.
        for group in self.stats_config.groups.values() {
            let lookup =
                |id| self.find_component(id).map(|c| (c.name.clone(), c.kind.clone()));
            if let Err(e) = group.verify(&lookup, registry) {
                tracing::warn!(group = group.name, error = %e, "statistic group failed verification");
                problems += 1;
            }
        }

        if problems > 0 {
            return Err(GraphError::StructuralErrors { count: problems });
        }
        Ok(())
    }

    fn check_ports_of(&self, comp: &ConfigComponent, registry: &ElementRegistry) -> usize {
        let mut problems = 0usize;
        let mut ports: BTreeMap<String, LinkId> = BTreeMap::new();

        for &lid in &comp.links {
            let Some(l) = self.links.get(lid) else { continue };
            for end in &l.ends {
                if end.component != Some(comp.id) {
                    continue;
                }
                if !registry.is_port_valid(&comp.kind, &end.port) {
                    tracing::warn!(
                        port = end.port,
                        component = comp.name,
                        kind = comp.kind,
                        "attempting to connect to unknown port"
                    );
                    problems += 1;
                }
                match ports.insert(end.port.clone(), lid) {
                    // A second appearance is only legal as the loopback of
                    // the same link.
                    Some(prev) if prev != lid => {
                        let prev_name = self.links.get(prev).map_or_else(String::new, |p| p.name.clone());
                        tracing::warn!(
                            port = end.port,
                            component = comp.name,
                            first = prev_name,
                            second = l.name,
                            "port connected to two links"
                        );
                        problems += 1;
                    }
                    _ => {}
                }
            }
        }

        for sub in &comp.subcomponents {
            problems += self.check_ports_of(sub, registry);
        }
        problems
    }

    /// Verify placements against the world size and set each link's
    /// cross-rank / cross-thread flags.
    ///
    /// # Errors
    ///
    /// [`GraphError::BadRank`] for an unassigned or out-of-range component.
    pub fn check_ranks(&mut self, world: RankInfo) -> Result<(), GraphError> {
        for comp in self.comps.iter() {
            if !comp.rank.is_assigned() || !world.in_range(&comp.rank) {
                return Err(GraphError::BadRank {
                    component: comp.name.clone(),
                    rank: comp.rank,
                });
            }
        }

        let ranks: BTreeMap<ComponentId, RankInfo> =
            self.comps.iter().map(|c| (c.id, c.rank)).collect();
        for l in self.links.iter_mut() {
            let Some(c0) = l.ends[0].component else { continue };
            let Some(&r0) = ranks.get(&c0.parent()) else { continue };
            let r1 = match l.remote {
                Some(remote) => remote,
                None => match l.ends[1].component.and_then(|c| ranks.get(&c.parent())) {
                    Some(&r) => r,
                    None => continue,
                },
            };
            if r0.rank != r1.rank {
                l.cross_rank = true;
            } else if r0.thread != r1.thread {
                l.cross_thread = true;
            }
        }
        Ok(())
    }

    /// Minimum over cross-rank links of their minimum latency. When no
    /// components remain locally (a restart without repartitioning), the
    /// checkpointed value is used.
    #[must_use]
    pub fn minimum_partition_latency(&self) -> SimTime {
        if self.num_components() == 0 {
            return self
                .restart
                .as_ref()
                .map_or(MAX_SIM_TIME, |r| r.min_part);
        }
        self.links
            .iter()
            .filter(|l| l.cross_rank)
            .map(ConfigLink::min_latency)
            .min()
            .unwrap_or(MAX_SIM_TIME)
    }

    // -----------------------------------------------------------------------
    // Splitting
    // -----------------------------------------------------------------------

    /// Split this graph between two disjoint rank sets.
    ///
    /// Afterwards this graph holds only the components and links of
    /// `orig_ranks`; the returned graph (if `new_ranks` is nonempty) holds
    /// those of `new_ranks`. Entities on neither set are dropped. A link
    /// spanning the two sets becomes non-local on each side, its local end
    /// at index 0 and the remote (rank, thread) recorded explicitly.
    ///
    /// # Errors
    ///
    /// Propagates filter failures.
    pub fn split_graph(
        &mut self,
        orig_ranks: &BTreeSet<u32>,
        new_ranks: &BTreeSet<u32>,
    ) -> Result<Option<ConfigGraph>, GraphError> {
        let mut ngraph = if new_ranks.is_empty() {
            None
        } else {
            let mut g = ConfigGraph::new();
            g.restart = self.restart.clone();
            g.time_base = self.time_base.clone();
            g.stats_config.outputs = self.stats_config.outputs.clone();
            g.stats_config.load_level = self.stats_config.load_level;
            g.next_component_index = self.next_component_index;
            Some(g)
        };

        // Links first: endpoint ranks are still readable from the unsplit
        // component map.
        let unassigned = RankInfo::new(RankInfo::UNASSIGNED, RankInfo::UNASSIGNED);
        let ranks_of: BTreeMap<ComponentId, RankInfo> =
            self.comps.iter().map(|c| (c.id, c.rank)).collect();
        let mut moved_links: Vec<ConfigLink> = Vec::new();

        let mut links = std::mem::take(&mut self.links);
        links.filter(|mut l| {
            let r = [
                l.ends[0]
                    .component
                    .and_then(|c| ranks_of.get(&c.parent()).copied())
                    .unwrap_or(unassigned),
                if l.is_nonlocal() {
                    // The remote side of an already-nonlocal link belongs to
                    // neither set.
                    unassigned
                } else {
                    l.ends[1]
                        .component
                        .and_then(|c| ranks_of.get(&c.parent()).copied())
                        .unwrap_or(unassigned)
                },
            ];
            let c0_in_orig = orig_ranks.contains(&r[0].rank);
            let c1_in_orig = orig_ranks.contains(&r[1].rank);
            let c0_in_new = new_ranks.contains(&r[0].rank);
            let c1_in_new = new_ranks.contains(&r[1].rank);

            let flag = u8::from(c0_in_orig | c1_in_orig) | (u8::from(c0_in_new | c1_in_new) << 1);
            match flag {
                0 => None,
                1 => {
                    // Stays in the original graph.
                    if !l.is_nonlocal() && (c0_in_orig ^ c1_in_orig) {
                        let local = usize::from(!c0_in_orig);
                        l.set_nonlocal(local, r[(local + 1) % 2]);
                    }
                    Some(l)
                }
                2 => {
                    // Moves to the new graph.
                    if !l.is_nonlocal() && (c0_in_new ^ c1_in_new) {
                        let local = usize::from(!c0_in_new);
                        l.set_nonlocal(local, r[(local + 1) % 2]);
                    }
                    moved_links.push(l);
                    None
                }
                _ => {
                    // Spans both sets; reachable only when the model used
                    // ghost endpoints for a cross-partition link. Each graph
                    // keeps a copy pointing at the other side.
                    let mut copy = l.clone();
                    if c0_in_new {
                        l.set_nonlocal(1, r[0]);
                        copy.set_nonlocal(0, r[1]);
                    } else {
                        l.set_nonlocal(0, r[1]);
                        copy.set_nonlocal(1, r[0]);
                    }
                    moved_links.push(copy);
                    Some(l)
                }
            }
        })?;
        self.links = links;

        if let Some(g) = ngraph.as_mut() {
            for l in moved_links {
                g.links.insert(l);
            }
        }

        // Components after links: all cross-partition information now lives
        // in the links, so moving a component carries no extra bookkeeping.
        let mut moved_comps: Vec<ConfigComponent> = Vec::new();
        let mut comps = std::mem::take(&mut self.comps);
        comps.filter(|c| {
            if orig_ranks.contains(&c.rank.rank) {
                Some(c)
            } else {
                if new_ranks.contains(&c.rank.rank) {
                    moved_comps.push(c);
                }
                None
            }
        })?;
        self.comps = comps;
        if let Some(g) = ngraph.as_mut() {
            for c in moved_comps {
                g.comps.insert(c);
            }
            g.rebuild_name_index();
        }
        self.rebuild_name_index();

        // Route statistic groups: copy those with members in the new graph,
        // drop those with no members left here. Rank 0 keeps every group so
        // checkpointing (which only writes groups from rank 0) stays whole.
        let orig_has_zero = orig_ranks.contains(&0);
        let new_has_zero = new_ranks.contains(&0);
        let groups = std::mem::take(&mut self.stats_config.groups);
        for (name, group) in groups {
            let in_new = new_has_zero
                || ngraph
                    .as_ref()
                    .is_some_and(|g| group.components.iter().any(|&id| g.contains_component(id)));
            let in_orig =
                orig_has_zero || group.components.iter().any(|&id| self.contains_component(id));
            if in_new {
                if let Some(g) = ngraph.as_mut() {
                    g.stats_config.groups.insert(name.clone(), group.clone());
                }
            }
            if in_orig {
                self.stats_config.groups.insert(name, group);
            }
        }

        Ok(ngraph)
    }

    /// Fold another rank's graph into this one, used by the serial-collapse
    /// restart path.
    ///
    /// Link ids are unique per rank only, so the absorbed links are re-keyed
    /// past this graph's highest id (component link lists follow). Halves of
    /// a formerly cross-rank link stay non-local; they pair by name at
    /// elaboration like any parallel load.
    pub fn absorb(&mut self, mut other: ConfigGraph) {
        let offset = self
            .links
            .iter()
            .map(|l| l.id.raw() + 1)
            .max()
            .unwrap_or(0);
        for mut link in other.links.take_all() {
            link.id = LinkId(link.id.raw() + offset);
            self.links.insert(link);
        }
        for mut comp in other.comps.take_all() {
            comp.remap_links(&|id| LinkId(id.raw() + offset));
            self.comps.insert(comp);
        }
        self.rebuild_name_index();
    }

    /// Discard everything but the given rank.
    ///
    /// # Errors
    ///
    /// Propagates filter failures.
    pub fn reduce_to_single_rank(&mut self, rank: u32) -> Result<(), GraphError> {
        let keep: BTreeSet<u32> = [rank].into();
        self.split_graph(&keep, &BTreeSet::new())?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Partition graph projections
    // -----------------------------------------------------------------------

    /// The 1:1 projection: one partition vertex per top-level component.
    #[must_use]
    pub fn partition_graph(&self) -> PartitionGraph {
        let mut graph = PartitionGraph::new();

        for comp in self.comps.iter() {
            let mut pc = PartitionComponent::new(comp.id);
            pc.weight = comp.weight;
            pc.rank = comp.rank;
            pc.group.insert(comp.id);
            graph.components_mut().insert(pc);
        }

        for l in self.links.iter() {
            let (Some(c0), Some(c1)) = (l.ends[0].component, l.ends[1].component) else {
                continue;
            };
            graph.links_mut().insert(PartitionLink::from(l));
            for comp in [c0.parent(), c1.parent()] {
                if let Some(pc) = graph.components_mut().get_mut(comp) {
                    pc.links.push(l.id);
                }
            }
        }
        graph
    }

    /// The collapsed projection: each maximal no-cut-connected subgraph
    /// becomes one partition vertex with summed weight.
    #[must_use]
    pub fn collapsed_partition_graph(&self) -> PartitionGraph {
        let mut graph = PartitionGraph::new();
        let mut visited: HashSet<ComponentId> = HashSet::new();
        let mut interior_links: BTreeSet<LinkId> = BTreeSet::new();

        for comp in self.comps.iter() {
            if visited.contains(&comp.id) {
                continue;
            }
            let mut group = BTreeSet::new();
            self.connected_no_cut_comps(comp.id, &mut group);
            visited.extend(group.iter().copied());

            let id = ComponentId::top_level(graph.num_components() as u32);
            let mut pc = PartitionComponent::new(id);
            for &member in &group {
                let Some(mc) = self.comps.get(member) else { continue };
                pc.weight += mc.weight;
                pc.group.insert(member);

                for lid in mc.all_links() {
                    let Some(l) = self.links.get(lid) else { continue };
                    let (Some(c0), Some(c1)) = (l.ends[0].component, l.ends[1].component) else {
                        continue;
                    };
                    if group.contains(&c0.parent()) && group.contains(&c1.parent()) {
                        interior_links.insert(lid);
                    } else {
                        pc.links.push(lid);
                    }
                }
            }
            graph.components_mut().insert(pc);
        }

        for l in self.links.iter() {
            if interior_links.contains(&l.id) {
                continue;
            }
            if l.ends[0].component.is_none() || l.ends[1].component.is_none() {
                continue;
            }
            graph.links_mut().insert(PartitionLink::from(l));
        }

        // Edges still name member components; retarget them at the group
        // vertices.
        let vertex_ids: Vec<ComponentId> = graph.components().iter().map(|pc| pc.id).collect();
        for vid in vertex_ids {
            let (members, link_ids) = {
                let pc = &graph.components()[vid];
                let members: Vec<ComponentId> = pc.group.iter().copied().collect();
                (members, pc.links.clone())
            };
            for lid in link_ids {
                if let Some(pl) = graph.links_mut().get_mut(lid) {
                    for side in 0..2 {
                        if members.contains(&pl.components[side]) {
                            pl.components[side] = vid;
                        }
                    }
                }
            }
        }
        graph
    }

    /// Copy the rank assignment of each partition vertex back onto its
    /// member components.
    pub fn annotate_ranks(&mut self, pgraph: &PartitionGraph) {
        for pc in pgraph.components().iter() {
            for &member in pc.group.iter() {
                if let Some(comp) = self.comps.get_mut(member) {
                    comp.set_rank(pc.rank);
                }
            }
        }
    }

    /// Depth-first search following only no-cut links, collecting the
    /// connected set of top-level component ids.
    pub fn connected_no_cut_comps(&self, start: ComponentId, group: &mut BTreeSet<ComponentId>) {
        let top = start.parent();
        group.insert(top);
        let Some(comp) = self.comps.get(top) else { return };
        for lid in comp.all_links() {
            let Some(l) = self.links.get(lid) else { continue };
            if !l.no_cut {
                continue;
            }
            let (Some(c0), Some(c1)) = (l.ends[0].component, l.ends[1].component) else {
                continue;
            };
            let other = if c0.parent() == top { c1.parent() } else { c0.parent() };
            if !group.contains(&other) {
                self.connected_no_cut_comps(other, group);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timebase() -> TimeBase {
        TimeBase::new("1ps").unwrap()
    }

    /// Build a ring c0-c1-c2-c3-c0 with 10ns links.
    fn ring() -> (ConfigGraph, Vec<ComponentId>, Vec<LinkId>) {
        let mut g = ConfigGraph::new();
        let comps: Vec<ComponentId> = (0..4)
            .map(|i| g.add_component(&format!("c{i}"), "test.node").unwrap())
            .collect();
        let mut links = Vec::new();
        for i in 0..4 {
            let l = g.create_link(&format!("ring{i}"), Some("10ns"));
            g.add_link(comps[i], l, "right", None).unwrap();
            g.add_link(comps[(i + 1) % 4], l, "left", None).unwrap();
            links.push(l);
        }
        (g, comps, links)
    }

    #[test]
    fn test_duplicate_component_name_rejected() {
        let mut g = ConfigGraph::new();
        g.add_component("a", "t").unwrap();
        let err = g.add_component("a", "t");
        assert!(matches!(err, Err(GraphError::DuplicateComponentName { .. })));
    }

    #[test]
    fn test_link_latency_resolution() {
        let mut g = ConfigGraph::new();
        let c0 = g.add_component("c0", "t").unwrap();
        let c1 = g.add_component("c1", "t").unwrap();
        let l = g.create_link("L", Some("10ns"));
        g.add_link(c0, l, "p0", None).unwrap();
        g.add_link(c1, l, "p1", Some("20ns")).unwrap();
        g.post_creation_cleanup(&timebase()).unwrap();

        let link = g.links().get(l).unwrap();
        assert_eq!(link.ends[0].latency.cycles(), 10_000);
        assert_eq!(link.ends[1].latency.cycles(), 20_000);
        assert_eq!(link.min_latency(), 10_000);
    }

    #[test]
    fn test_link_without_latency_rejected() {
        let mut g = ConfigGraph::new();
        let c0 = g.add_component("c0", "t").unwrap();
        let l = g.create_link("L", None);
        let err = g.add_link(c0, l, "p0", None);
        assert!(matches!(err, Err(GraphError::LinkWithoutLatency { .. })));
    }

    #[test]
    fn test_link_over_connection_rejected() {
        let mut g = ConfigGraph::new();
        let c0 = g.add_component("c0", "t").unwrap();
        let c1 = g.add_component("c1", "t").unwrap();
        let c2 = g.add_component("c2", "t").unwrap();
        let l = g.create_link("L", Some("1ns"));
        g.add_link(c0, l, "p", None).unwrap();
        g.add_link(c1, l, "p", None).unwrap();
        let err = g.add_link(c2, l, "p", None);
        assert!(matches!(err, Err(GraphError::LinkOverConnected { .. })));
    }

    #[test]
    fn test_order_tags_assigned_alphabetically() {
        let mut g = ConfigGraph::new();
        let c0 = g.add_component("c0", "t").unwrap();
        let c1 = g.add_component("c1", "t").unwrap();
        // Created out of alphabetical order on purpose.
        let lb = g.create_link("beta", Some("1ns"));
        let la = g.create_link("alpha", Some("1ns"));
        for l in [la, lb] {
            g.add_link(c0, l, &format!("p{}", l.raw()), None).unwrap();
            g.add_link(c1, l, &format!("q{}", l.raw()), None).unwrap();
        }
        g.post_creation_cleanup(&timebase()).unwrap();
        assert_eq!(g.links().get(la).unwrap().order_tag(), 1);
        assert_eq!(g.links().get(lb).unwrap().order_tag(), 2);
    }

    #[test]
    fn test_link_component_cross_reference_invariant() {
        let (g, comps, _) = ring();
        // Every fully-connected link resolves both endpoints, and each
        // endpoint lists the link.
        for l in g.links().iter() {
            assert_eq!(l.connection_count(), 2);
            for end in &l.ends {
                let comp = g.find_component(end.component.unwrap()).unwrap();
                assert!(comp.links.contains(&l.id));
            }
        }
        // And every link id on a component resolves to a link naming it.
        for &c in &comps {
            let comp = g.find_component(c).unwrap();
            for &lid in &comp.links {
                let l = g.links().get(lid).unwrap();
                assert!(l.ends.iter().any(|e| e.component == Some(c)));
            }
        }
    }

    #[test]
    fn test_loopback_listed_once() {
        let mut g = ConfigGraph::new();
        let c0 = g.add_component("c0", "t").unwrap();
        let l = g.create_link("loop", Some("1ns"));
        g.add_link(c0, l, "out", None).unwrap();
        g.add_link(c0, l, "in", None).unwrap();
        assert_eq!(g.find_component(c0).unwrap().links, vec![l]);
    }

    #[test]
    fn test_structural_errors_detect_dangling_and_unused() {
        let mut g = ConfigGraph::new();
        let c0 = g.add_component("c0", "t").unwrap();
        let _unused = g.create_link("unused", Some("1ns"));
        let dangling = g.create_link("dangling", Some("1ns"));
        g.add_link(c0, dangling, "p", None).unwrap();

        let err = g.check_structural_errors(&ElementRegistry::new());
        assert!(matches!(err, Err(GraphError::StructuralErrors { count: 2 })));
    }

    #[test]
    fn test_structural_errors_port_reuse() {
        let mut g = ConfigGraph::new();
        let c0 = g.add_component("c0", "t").unwrap();
        let c1 = g.add_component("c1", "t").unwrap();
        let l1 = g.create_link("l1", Some("1ns"));
        let l2 = g.create_link("l2", Some("1ns"));
        g.add_link(c0, l1, "p", None).unwrap();
        g.add_link(c1, l1, "a", None).unwrap();
        g.add_link(c0, l2, "p", None).unwrap();
        g.add_link(c1, l2, "b", None).unwrap();

        let err = g.check_structural_errors(&ElementRegistry::new());
        assert!(matches!(err, Err(GraphError::StructuralErrors { .. })));
    }

    #[test]
    fn test_check_ranks_flags_cross_links() {
        let (mut g, comps, links) = ring();
        g.post_creation_cleanup(&timebase()).unwrap();
        for (i, &c) in comps.iter().enumerate() {
            let rank = if i < 2 { 0 } else { 1 };
            g.find_component_mut(c).unwrap().set_rank(RankInfo::new(rank, 0));
        }
        g.check_ranks(RankInfo::new(2, 1)).unwrap();

        // ring1 (c1-c2) and ring3 (c3-c0) cross ranks.
        assert!(g.links().get(links[1]).unwrap().cross_rank);
        assert!(g.links().get(links[3]).unwrap().cross_rank);
        assert!(!g.links().get(links[0]).unwrap().cross_rank);
        assert!(!g.links().get(links[2]).unwrap().cross_rank);
    }

    #[test]
    fn test_minimum_partition_latency() {
        let (mut g, comps, _) = ring();
        g.post_creation_cleanup(&timebase()).unwrap();
        for (i, &c) in comps.iter().enumerate() {
            g.find_component_mut(c)
                .unwrap()
                .set_rank(RankInfo::new(u32::from(i >= 2), 0));
        }
        g.check_ranks(RankInfo::new(2, 1)).unwrap();
        assert_eq!(g.minimum_partition_latency(), 10_000);
    }

    #[test]
    fn test_split_graph_ring() {
        let (mut g, comps, _) = ring();
        g.post_creation_cleanup(&timebase()).unwrap();
        for (i, &c) in comps.iter().enumerate() {
            g.find_component_mut(c)
                .unwrap()
                .set_rank(RankInfo::new(u32::from(i >= 2), 0));
        }
        g.check_ranks(RankInfo::new(2, 1)).unwrap();

        let orig: BTreeSet<u32> = [0].into();
        let new: BTreeSet<u32> = [1].into();
        let other = g.split_graph(&orig, &new).unwrap().unwrap();

        // Origin holds c0, c1; new graph holds c2, c3.
        assert_eq!(g.num_components(), 2);
        assert!(g.contains_component(comps[0]));
        assert!(g.contains_component(comps[1]));
        assert_eq!(other.num_components(), 2);
        assert!(other.contains_component(comps[2]));
        assert!(other.contains_component(comps[3]));

        // No link lost: 3 links per side, the two cut links present on both.
        assert_eq!(g.links().len(), 3);
        assert_eq!(other.links().len(), 3);

        let g_nonlocal: Vec<&ConfigLink> =
            g.links().iter().filter(|l| l.is_nonlocal()).collect();
        assert_eq!(g_nonlocal.len(), 2);
        for l in g_nonlocal {
            assert_eq!(l.remote.unwrap().rank, 1);
            assert!(l.ends[0].component.is_some());
            assert!(l.ends[1].component.is_none());
        }
        let o_nonlocal: Vec<&ConfigLink> =
            other.links().iter().filter(|l| l.is_nonlocal()).collect();
        assert_eq!(o_nonlocal.len(), 2);
        for l in o_nonlocal {
            assert_eq!(l.remote.unwrap().rank, 0);
        }
    }

    #[test]
    fn test_split_drops_unlisted_ranks() {
        let (mut g, comps, _) = ring();
        g.post_creation_cleanup(&timebase()).unwrap();
        for (i, &c) in comps.iter().enumerate() {
            g.find_component_mut(c)
                .unwrap()
                .set_rank(RankInfo::new(i as u32, 0));
        }
        g.check_ranks(RankInfo::new(4, 1)).unwrap();
        g.reduce_to_single_rank(0).unwrap();
        assert_eq!(g.num_components(), 1);
        assert!(g.contains_component(comps[0]));
    }

    #[test]
    fn test_collapsed_partition_graph_groups_no_cut() {
        let (mut g, _, links) = ring();
        g.post_creation_cleanup(&timebase()).unwrap();
        // Forbid cutting c0-c1; the collapsed graph has 3 vertices.
        g.set_link_no_cut(links[0]).unwrap();
        let pg = g.collapsed_partition_graph();
        assert_eq!(pg.num_components(), 3);

        let grouped = pg
            .components()
            .iter()
            .find(|pc| pc.group.len() == 2)
            .unwrap();
        assert!((grouped.weight - 2.0).abs() < f64::EPSILON);
        // The interior no-cut link disappears from the projection.
        assert!(pg.links().get(links[0]).is_none());
    }

    #[test]
    fn test_graph_serialization_roundtrip() {
        let (mut g, comps, _) = ring();
        g.post_creation_cleanup(&timebase()).unwrap();
        let bytes = rmp_serde::to_vec_named(&g).unwrap();
        let mut restored: ConfigGraph = rmp_serde::from_slice(&bytes).unwrap();
        restored.rebuild_name_index();

        assert_eq!(restored.num_components(), 4);
        assert_eq!(restored.links().len(), 4);
        assert_eq!(restored.find_component_by_name("c2").unwrap().id, comps[2]);
        // A post-restore add_component must not collide with existing ids.
        let extra = restored.add_component("c4", "t").unwrap();
        assert!(comps.iter().all(|&c| c != extra));
    }
}
