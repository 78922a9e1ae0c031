//! Statistic configuration: individual statistics, groups, and outputs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sim_model::ids::{ComponentId, StatisticId};
use sim_model::time::UnitValue;
use sim_model::Params;

use crate::error::GraphError;
use crate::registry::ElementRegistry;

/// Default statistic output backend bound to slot 0.
pub const DEFAULT_STAT_OUTPUT: &str = "stat.output.console";

/// Configuration of one enabled statistic.
///
/// Identity is the [`StatisticId`]; a `shared` statistic allows multiple
/// enable sites to reference one backing instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigStatistic {
    /// Unique id of this statistic.
    pub id: StatisticId,
    /// Statistic name (empty for anonymously created statistics).
    pub name: String,
    /// Statistic parameters.
    pub params: Params,
    /// Whether several enable sites share this instance.
    pub shared: bool,
}

impl ConfigStatistic {
    /// Create a named statistic configuration.
    #[must_use]
    pub fn new(id: StatisticId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            params: Params::new(),
            shared: false,
        }
    }

    /// Create an anonymous statistic configuration.
    #[must_use]
    pub fn new_unnamed(id: StatisticId) -> Self {
        Self::new(id, "")
    }

    /// Add a parameter.
    pub fn add_parameter(&mut self, key: &str, value: &str, overwrite: bool) {
        self.params.insert(key, value, overwrite);
    }
}

impl Default for ConfigStatistic {
    fn default() -> Self {
        Self::new(StatisticId::NULL, "")
    }
}

/// A named group of statistics gathered from a set of components and routed
/// to one output at a fixed frequency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConfigStatGroup {
    /// Group name.
    pub name: String,
    /// Member statistic name → parameters.
    pub stats: BTreeMap<String, Params>,
    /// Member component ids.
    pub components: Vec<ComponentId>,
    /// Index of the bound output in the stats config's output vector.
    pub output_id: usize,
    /// Output frequency; zero until set.
    pub output_frequency: Option<UnitValue>,
}

impl ConfigStatGroup {
    /// Create an empty group bound to the default output.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Add a member component (deduplicated).
    pub fn add_component(&mut self, id: ComponentId) {
        if !self.components.contains(&id) {
            self.components.push(id);
        }
    }

    /// Add a member statistic with its parameters.
    ///
    /// If no frequency has been set yet, the statistic's `rate` parameter
    /// (default `0ns`) seeds it.
    ///
    /// # Errors
    ///
    /// Propagates a malformed `rate` parameter.
    pub fn add_statistic(&mut self, name: &str, params: &Params) -> Result<(), GraphError> {
        self.stats.insert(name.to_string(), params.clone());
        if self.output_frequency.is_none() {
            let rate: String = params.find("rate", "0ns".to_string())?;
            // A rate of zero leaves the frequency unset.
            if let Ok(freq) = rate.parse::<UnitValue>() {
                if freq.value != 0.0 {
                    self.set_frequency(&rate)?;
                }
            }
        }
        Ok(())
    }

    /// Bind this group to an output slot.
    pub fn set_output(&mut self, id: usize) {
        self.output_id = id;
    }

    /// Set the output frequency. The value must carry seconds or hertz.
    ///
    /// # Errors
    ///
    /// [`GraphError::InvalidFrequency`] for any other unit.
    pub fn set_frequency(&mut self, freq: &str) -> Result<(), GraphError> {
        let uv: UnitValue = freq.parse().map_err(|_| GraphError::InvalidFrequency {
            value: freq.to_string(),
        })?;
        if uv.has_units("s") || uv.has_units("hz") {
            self.output_frequency = Some(uv);
            Ok(())
        } else {
            Err(GraphError::InvalidFrequency {
                value: freq.to_string(),
            })
        }
    }

    /// Check that every member component supports every statistic in the
    /// group.
    ///
    /// # Errors
    ///
    /// [`GraphError::UnknownComponent`] for a missing member;
    /// [`GraphError::UnsupportedStatistic`] when a member's type does not
    /// declare one of the group's statistics.
    pub fn verify(
        &self,
        components: &dyn Fn(ComponentId) -> Option<(String, String)>,
        registry: &ElementRegistry,
    ) -> Result<(), GraphError> {
        for &id in &self.components {
            let (name, kind) = components(id).ok_or(GraphError::UnknownComponent(id))?;
            for stat in self.stats.keys() {
                if registry.statistic_enable_level(&kind, stat).is_none() {
                    return Err(GraphError::UnsupportedStatistic {
                        component: name,
                        statistic: stat.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A statistic output backend configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigStatOutput {
    /// Output type (`library.class`).
    pub kind: String,
    /// Output parameters.
    pub params: Params,
}

impl ConfigStatOutput {
    /// Create an output configuration.
    #[must_use]
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            params: Params::new(),
        }
    }

    /// Add a parameter.
    pub fn add_parameter(&mut self, key: &str, value: &str) {
        self.params.insert(key, value, true);
    }
}

/// The statistics configuration carried by a graph: groups, outputs (entry 0
/// is the default), and the load level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Statistic groups by name.
    pub groups: BTreeMap<String, ConfigStatGroup>,
    /// Output backends; entry 0 is the default output.
    pub outputs: Vec<ConfigStatOutput>,
    /// Statistic system load level.
    pub load_level: u8,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            groups: BTreeMap::new(),
            outputs: vec![ConfigStatOutput::new(DEFAULT_STAT_OUTPUT)],
            load_level: 0,
        }
    }
}
