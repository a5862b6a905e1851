//! Path-accumulated tool catalog.
//!
//! Walking root → current node, each node's catalog is merged in. The
//! configured strategy decides name collisions: `Override` lets deeper
//! nodes shadow shallower ones, `Append` treats a collision as a
//! configuration mistake.

use trellis_domain::config::ToolMergeStrategy;
use trellis_domain::error::{Error, Result};
use trellis_domain::{ToolDefinition, ToolSpec, ToolStatus};

pub struct ToolRegistry {
    strategy: ToolMergeStrategy,
    tools: Vec<ToolSpec>,
}

impl ToolRegistry {
    pub fn new(strategy: ToolMergeStrategy) -> Self {
        Self {
            strategy,
            tools: Vec::new(),
        }
    }

    /// Merge one node's catalog into the accumulated set.
    pub fn merge(&mut self, tools: &[ToolSpec]) -> Result<()> {
        for tool in tools {
            match self.tools.iter().position(|t| t.name == tool.name) {
                Some(i) => match self.strategy {
                    ToolMergeStrategy::Override => {
                        self.tools[i] = tool.clone();
                    }
                    ToolMergeStrategy::Append => {
                        return Err(Error::Config(format!(
                            "tool {:?} declared twice on the path (append strategy)",
                            tool.name
                        )));
                    }
                },
                None => self.tools.push(tool.clone()),
            }
        }
        Ok(())
    }

    /// Visible tools, i.e. everything a provider request may carry.
    /// Hidden tools never leave this registry.
    pub fn visible(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.iter().filter(|t| t.is_visible())
    }

    /// Provider-facing definitions of the visible tools.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.visible().map(ToolSpec::definition).collect()
    }

    /// Every accumulated tool, hidden ones included (diagnostics only).
    pub fn all(&self) -> &[ToolSpec] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn is_usable(&self, name: &str) -> bool {
        self.check_usable(name).is_ok()
    }

    /// Gate an execution request with a typed error.
    pub fn check_usable(&self, name: &str) -> Result<()> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::ToolUnknown(name.to_owned()))?;
        match tool.status {
            ToolStatus::Active => Ok(()),
            ToolStatus::Hidden => Err(Error::ToolHidden(name.to_owned())),
            ToolStatus::TemporaryDisabled => Err(Error::ToolDisabled {
                name: name.to_owned(),
                reason: tool
                    .disable_reason
                    .clone()
                    .unwrap_or_else(|| "temporarily disabled".into()),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
