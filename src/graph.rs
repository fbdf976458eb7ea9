//! Resource graph construction and synthesis.
//!
//! A [`StackBuilder`] is the in-memory description of one stack. Each
//! [`declare`](StackBuilder::declare) appends a node and returns a
//! [`Handle`]; any attribute reference inside the node's config becomes a
//! dependency edge back to the referenced node. Nothing is resolved while the
//! stack is being built: handles only hand out lazy [`AttrRef`]s.
//!
//! ## Rules
//!
//! - A reference must point at a node already declared in the same stack.
//!   References into other stacks are rejected; stacks are self-contained.
//! - Explicit edges ([`depends_on`](StackBuilder::depends_on)) may be added
//!   between any two declared nodes of the stack.
//! - [`synth`](StackBuilder::synth) sorts the nodes topologically. A cycle
//!   aborts synthesis and no partial stack is returned.
//!
//! ## Synthesized form
//!
//! A [`SynthesizedStack`] lists resources in dependency order and renders to
//! a Terraform JSON document ([`SynthesizedStack::to_json`]). The order is
//! also recorded in the document's `//` metadata block so the engine-side
//! ordering contract can be checked against what was emitted.

use crate::outputs::{Availability, OutputValue, SynthesizedOutput};
use crate::resource::{Block, ResourceKind, is_valid_name};
use crate::value::{AttrRef, Config, RefTarget, Value};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Invalid resource name '{0}'")]
    InvalidName(String),
    #[error("{address} is declared twice in stack {stack}")]
    DuplicateResource { stack: String, address: String },
    #[error("{from} references {to}, which is not declared in stack {stack}")]
    UnknownReference {
        stack: String,
        from: String,
        to: String,
    },
    #[error("{from} in stack {stack} references {to} from stack {other}")]
    CrossStack {
        stack: String,
        from: String,
        to: String,
        other: String,
    },
    #[error("Dependency cycle in stack {stack} through {address}")]
    Cycle { stack: String, address: String },
    #[error("Output {name} is declared twice in stack {stack}")]
    DuplicateOutput { stack: String, name: String },
}

/// Token for a declared node. Cheap to clone; hands out attribute references.
///
/// A handle belongs to the builder that issued it, not to the stack name:
/// two builders with the same name never accept each other's handles.
#[derive(Debug, Clone)]
pub struct Handle {
    stack: Arc<str>,
    index: usize,
    kind: ResourceKind,
    name: String,
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.stack, &other.stack) && self.index == other.index
    }
}

impl Eq for Handle {}

impl Handle {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    pub fn address(&self) -> String {
        self.kind.address(&self.name)
    }

    /// Lazy reference to an attribute of this node.
    pub fn attr(&self, attribute: &str) -> AttrRef {
        AttrRef::to_handle(self.clone(), attribute)
    }

    pub fn arn(&self) -> AttrRef {
        self.attr("arn")
    }

    pub fn id(&self) -> AttrRef {
        self.attr("id")
    }
}

#[derive(Debug)]
struct Node {
    kind: ResourceKind,
    name: String,
    config: Config,
    /// Implicit and explicit dependencies, by node index.
    depends_on: BTreeSet<usize>,
    /// Explicit dependencies only; rendered as `depends_on`.
    explicit: BTreeSet<usize>,
}

impl Node {
    fn address(&self) -> String {
        self.kind.address(&self.name)
    }
}

#[derive(Debug, Clone)]
struct ProviderBlock {
    source: String,
    config: Config,
}

/// The in-memory description of one stack under construction.
#[derive(Debug)]
pub struct StackBuilder {
    name: Arc<str>,
    providers: BTreeMap<String, ProviderBlock>,
    nodes: Vec<Node>,
    by_address: HashMap<String, usize>,
    outputs: Vec<(String, Availability<Value>)>,
}

impl StackBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            providers: BTreeMap::new(),
            nodes: Vec::new(),
            by_address: HashMap::new(),
            outputs: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Configure a provider (e.g. `aws` from `hashicorp/aws`).
    pub fn provider(&mut self, name: &str, source: &str, config: Config) {
        self.providers.insert(
            name.to_string(),
            ProviderBlock {
                source: source.to_string(),
                config,
            },
        );
    }

    /// Append a node. Every reference in `config` must resolve to a node
    /// already declared in this stack.
    pub fn declare(
        &mut self,
        kind: ResourceKind,
        name: &str,
        config: Config,
    ) -> Result<Handle, GraphError> {
        if !is_valid_name(name) {
            return Err(GraphError::InvalidName(name.to_string()));
        }
        let address = kind.address(name);
        if self.by_address.contains_key(&address) {
            return Err(GraphError::DuplicateResource {
                stack: self.name.to_string(),
                address,
            });
        }

        let mut depends_on = BTreeSet::new();
        for r in config.refs() {
            depends_on.insert(self.resolve_ref(&address, r)?);
        }

        tracing::debug!(stack = %self.name, %address, deps = depends_on.len(), "declared");

        let index = self.nodes.len();
        self.nodes.push(Node {
            kind,
            name: name.to_string(),
            config,
            depends_on,
            explicit: BTreeSet::new(),
        });
        self.by_address.insert(address, index);

        Ok(Handle {
            stack: Arc::clone(&self.name),
            index,
            kind,
            name: name.to_string(),
        })
    }

    /// Add an explicit edge: `dependent` is created after `dependency`.
    pub fn depends_on(&mut self, dependent: &Handle, dependency: &Handle) -> Result<(), GraphError> {
        let from = self.check_handle("depends_on", dependent)?;
        let to = self.check_handle(&dependent.address(), dependency)?;
        let node = &mut self.nodes[from];
        node.depends_on.insert(to);
        node.explicit.insert(to);
        Ok(())
    }

    /// Whether `handle` was returned by this stack.
    pub fn contains(&self, handle: &Handle) -> bool {
        self.check_handle("", handle).is_ok()
    }

    /// Verify that `handle` belongs to this stack, naming `from` in errors.
    pub fn check_handle(&self, from: &str, handle: &Handle) -> Result<usize, GraphError> {
        if !Arc::ptr_eq(&handle.stack, &self.name) {
            return Err(GraphError::CrossStack {
                stack: self.name.to_string(),
                from: from.to_string(),
                to: handle.address(),
                other: handle.stack.to_string(),
            });
        }
        match self.nodes.get(handle.index) {
            Some(node) if node.kind == handle.kind && node.name == handle.name => Ok(handle.index),
            _ => Err(self.unknown(from, handle.address())),
        }
    }

    /// Register a stack output. References inside an available value follow
    /// the same rules as resource config.
    pub fn output(&mut self, name: &str, value: Availability<Value>) -> Result<(), GraphError> {
        if self.outputs.iter().any(|(n, _)| n == name) {
            return Err(GraphError::DuplicateOutput {
                stack: self.name.to_string(),
                name: name.to_string(),
            });
        }
        if let Availability::Available(v) = &value {
            let from = format!("output.{name}");
            for r in v.refs() {
                self.resolve_ref(&from, r)?;
            }
        }
        self.outputs.push((name.to_string(), value));
        Ok(())
    }

    fn resolve_ref(&self, from: &str, r: &AttrRef) -> Result<usize, GraphError> {
        match r.target() {
            RefTarget::Handle(h) => self.check_handle(from, h),
            RefTarget::Named { kind, name } => {
                let address = kind.address(name);
                self.by_address
                    .get(&address)
                    .copied()
                    .ok_or_else(|| self.unknown(from, address))
            }
        }
    }

    fn unknown(&self, from: &str, to: String) -> GraphError {
        GraphError::UnknownReference {
            stack: self.name.to_string(),
            from: from.to_string(),
            to,
        }
    }

    /// Validate the graph and emit resources in dependency order.
    ///
    /// Consumes the builder: a synthesized stack is immutable.
    pub fn synth(self) -> Result<SynthesizedStack, GraphError> {
        let stack = self.name.to_string();

        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(self.nodes.len(), 0);
        let indices: Vec<NodeIndex> = (0..self.nodes.len()).map(|i| graph.add_node(i)).collect();
        for (i, node) in self.nodes.iter().enumerate() {
            if node.depends_on.contains(&i) {
                return Err(GraphError::Cycle {
                    stack,
                    address: node.address(),
                });
            }
            for &dep in &node.depends_on {
                graph.add_edge(indices[dep], indices[i], ());
            }
        }

        let sorted = toposort(&graph, None).map_err(|cycle| GraphError::Cycle {
            stack: stack.clone(),
            address: self.nodes[graph[cycle.node_id()]].address(),
        })?;

        let resources: Vec<SynthesizedResource> = sorted
            .into_iter()
            .map(|ix| {
                let node = &self.nodes[graph[ix]];
                let mut body = node.config.render();
                if !node.explicit.is_empty() {
                    let explicit: Vec<String> =
                        node.explicit.iter().map(|&d| self.nodes[d].address()).collect();
                    body["depends_on"] = json!(explicit);
                }
                SynthesizedResource {
                    kind: node.kind,
                    name: node.name.clone(),
                    address: node.address(),
                    config: node.config.clone(),
                    body,
                    depends_on: node
                        .depends_on
                        .iter()
                        .map(|&d| self.nodes[d].address())
                        .collect(),
                }
            })
            .collect();

        let outputs = self
            .outputs
            .into_iter()
            .map(|(name, value)| SynthesizedOutput {
                name,
                value: match value {
                    Availability::Available(v) => OutputValue::Available(v.render()),
                    Availability::Unavailable => OutputValue::Unavailable,
                },
            })
            .collect();

        tracing::info!(stack = %stack, resources = resources.len(), "stack synthesized");

        Ok(SynthesizedStack {
            name: stack,
            providers: self.providers,
            resources,
            outputs,
        })
    }
}

/// One node of a synthesized stack.
#[derive(Debug, Clone)]
pub struct SynthesizedResource {
    pub kind: ResourceKind,
    pub name: String,
    pub address: String,
    config: Config,
    /// Rendered provider configuration.
    pub body: serde_json::Value,
    /// Addresses this node depends on, implicit and explicit.
    pub depends_on: Vec<String>,
}

/// An attribute value after validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// Set literally in the node's config.
    Known(serde_json::Value),
    /// Produced by the provisioning engine; carried as an expression.
    Deferred(String),
}

/// A validated stack with resources in creation order.
#[derive(Debug, Clone)]
pub struct SynthesizedStack {
    pub name: String,
    providers: BTreeMap<String, ProviderBlock>,
    pub resources: Vec<SynthesizedResource>,
    pub outputs: Vec<SynthesizedOutput>,
}

impl SynthesizedStack {
    /// Resource addresses in creation order.
    pub fn order(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.address.as_str()).collect()
    }

    pub fn position(&self, address: &str) -> Option<usize> {
        self.resources.iter().position(|r| r.address == address)
    }

    pub fn resource(&self, address: &str) -> Option<&SynthesizedResource> {
        self.resources.iter().find(|r| r.address == address)
    }

    /// Resolve an attribute of a node in this stack.
    pub fn resolve(&self, handle: &Handle, attribute: &str) -> Result<Resolved, GraphError> {
        let address = handle.address();
        let resource = match self.resource(&address) {
            Some(r) if handle.stack() == self.name => r,
            Some(_) => {
                return Err(GraphError::CrossStack {
                    stack: self.name.clone(),
                    from: "resolve".to_string(),
                    to: address,
                    other: handle.stack().to_string(),
                });
            }
            None => {
                return Err(GraphError::UnknownReference {
                    stack: self.name.clone(),
                    from: "resolve".to_string(),
                    to: address,
                });
            }
        };
        Ok(match resource.config.get(attribute).and_then(Value::as_literal) {
            Some(v) => Resolved::Known(v.clone()),
            None => Resolved::Deferred(handle.attr(attribute).expression()),
        })
    }

    /// Look up an output by name.
    pub fn output(&self, name: &str) -> Option<&OutputValue> {
        self.outputs.iter().find(|o| o.name == name).map(|o| &o.value)
    }

    /// Render as a Terraform JSON configuration document.
    pub fn to_json(&self) -> serde_json::Value {
        let mut resource = serde_json::Map::new();
        let mut data = serde_json::Map::new();
        for r in &self.resources {
            let block = match r.kind.block() {
                Block::Resource => &mut resource,
                Block::Data => &mut data,
            };
            let by_type = block
                .entry(r.kind.type_name())
                .or_insert_with(|| json!({}));
            by_type[r.name.as_str()] = r.body.clone();
        }

        let mut required = serde_json::Map::new();
        let mut provider = serde_json::Map::new();
        for (name, p) in &self.providers {
            required.insert(name.clone(), json!({ "source": p.source }));
            provider.insert(name.clone(), json!([p.config.render()]));
        }
        // Providers used without an explicit block still have to be installed.
        for r in &self.resources {
            let name = r.kind.provider();
            if !required.contains_key(name) {
                required.insert(name.to_string(), json!({ "source": format!("hashicorp/{name}") }));
            }
        }

        let mut doc = json!({
            "//": {
                "metadata": {
                    "stackName": self.name,
                    "order": self.order(),
                }
            },
            "terraform": { "required_providers": required },
            "provider": provider,
            "resource": resource,
        });
        if !data.is_empty() {
            doc["data"] = serde_json::Value::Object(data);
        }
        if !self.outputs.is_empty() {
            let outputs: serde_json::Map<String, serde_json::Value> = self
                .outputs
                .iter()
                .map(|o| (o.name.clone(), json!({ "value": o.value.to_json() })))
                .collect();
            doc["output"] = serde_json::Value::Object(outputs);
        }
        doc
    }
}
