//! Tool-name registry. Tooling (git, shell sandboxing, file I/O, knowledge
//! search) is out of scope for the core (spec §1): nodes only see which
//! tool names exist and a short description, never an execution path.

use std::collections::HashMap;

/// Static metadata about a tool an agent may be permitted to call.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
}

/// A named collection of tools available to agents, keyed by name.
#[derive(Default, Debug)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: ToolSpec) -> Option<ToolSpec> {
        self.tools.insert(spec.name.clone(), spec)
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_list() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolSpec {
            name: "shell".into(),
            description: "run a sandboxed shell command".into(),
        });
        assert_eq!(registry.list(), vec!["shell"]);
        assert!(registry.get("shell").is_some());
        assert!(registry.get("git").is_none());
    }
}
