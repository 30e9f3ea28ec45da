//! Module dependency resolver: builds the producer/consumer graph over a
//! set of `ModuleDescriptor`s, detects cycles, and produces a deterministic
//! layered load order.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use recon_core::module::CONSUMES_ALL;
use recon_core::ModuleDescriptor;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolverStatus {
    Resolved,
    MissingProvider,
    Circular,
}

/// Outcome of `DependencyResolver::resolve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub status: ResolverStatus,
    /// Flat load order, topologically consistent, empty when `Circular`.
    pub load_order: Vec<String>,
    /// Modules grouped by round; modules in the same layer may run in parallel.
    pub layers: Vec<Vec<String>>,
    /// Every simple cycle detected (each a sequence of module names).
    pub cycles: Vec<Vec<String>>,
    /// consumer name -> event types it consumes for which no producer exists.
    pub missing_providers: BTreeMap<String, Vec<String>>,
}

/// Directed producer -> consumer graph built from a set of module
/// descriptors, plus the queries the orchestrator and operators need.
pub struct DependencyResolver {
    modules: HashMap<String, ModuleDescriptor>,
    /// consumer -> set of producers it depends on (direct edges).
    edges_in: HashMap<String, BTreeSet<String>>,
    /// producer -> set of consumers depending on it (direct edges).
    edges_out: HashMap<String, BTreeSet<String>>,
    producers_by_type: HashMap<String, BTreeSet<String>>,
    consumers_by_type: HashMap<String, BTreeSet<String>>,
}

impl DependencyResolver {
    pub fn new(descriptors: impl IntoIterator<Item = ModuleDescriptor>) -> Self {
        let modules: HashMap<String, ModuleDescriptor> = descriptors
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();

        let mut producers_by_type: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (name, d) in &modules {
            for t in &d.produces {
                producers_by_type.entry(t.clone()).or_default().insert(name.clone());
            }
        }

        let mut edges_in: HashMap<String, BTreeSet<String>> =
            modules.keys().map(|n| (n.clone(), BTreeSet::new())).collect();
        let mut edges_out: HashMap<String, BTreeSet<String>> =
            modules.keys().map(|n| (n.clone(), BTreeSet::new())).collect();
        let mut consumers_by_type: HashMap<String, BTreeSet<String>> = HashMap::new();

        for (consumer_name, d) in &modules {
            let all_consumed: Vec<&String> = d.consumes.iter().chain(d.optional_consumes.iter()).collect();
            for t in all_consumed {
                if t == CONSUMES_ALL {
                    // Wildcard: an edge from every other producing module.
                    for producer_name in modules.keys() {
                        if producer_name == consumer_name {
                            continue;
                        }
                        if !modules[producer_name].produces.is_empty() {
                            edges_in.get_mut(consumer_name).unwrap().insert(producer_name.clone());
                            edges_out.get_mut(producer_name).unwrap().insert(consumer_name.clone());
                        }
                    }
                    continue;
                }
                consumers_by_type.entry(t.clone()).or_default().insert(consumer_name.clone());
                if let Some(producers) = producers_by_type.get(t) {
                    for producer_name in producers {
                        if producer_name == consumer_name {
                            continue; // self-loops dropped
                        }
                        edges_in.get_mut(consumer_name).unwrap().insert(producer_name.clone());
                        edges_out.get_mut(producer_name).unwrap().insert(consumer_name.clone());
                    }
                }
            }
        }

        Self {
            modules,
            edges_in,
            edges_out,
            producers_by_type,
            consumers_by_type,
        }
    }

    fn missing_providers(&self) -> BTreeMap<String, Vec<String>> {
        let mut missing = BTreeMap::new();
        for (name, d) in &self.modules {
            let mut absent = Vec::new();
            for t in &d.consumes {
                if t == CONSUMES_ALL {
                    continue;
                }
                if !self.producers_by_type.contains_key(t) {
                    absent.push(t.clone());
                }
            }
            // optional_consumes never contributes to missing-provider detection.
            if !absent.is_empty() {
                absent.sort();
                missing.insert(name.clone(), absent);
            }
        }
        missing
    }

    /// Three-color DFS cycle detection, iterative over an explicit stack so
    /// deep graphs can't blow the call stack. Returns every simple cycle
    /// found (a back-edge to a gray node reconstructs the cycle from the
    /// current path).
    fn detect_cycles(&self) -> Vec<Vec<String>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut color: HashMap<String, Color> =
            self.modules.keys().map(|n| (n.clone(), Color::White)).collect();
        let mut cycles = Vec::new();

        let mut names: Vec<String> = self.modules.keys().cloned().collect();
        names.sort();

        for start in &names {
            if color[start] != Color::White {
                continue;
            }
            let mut path: Vec<String> = Vec::new();
            // Explicit stack of (node, next-child-index-to-visit).
            let mut frontier: Vec<(String, usize)> = vec![(start.clone(), 0)];
            color.insert(start.clone(), Color::Gray);
            path.push(start.clone());

            while let Some((node, idx)) = frontier.pop() {
                let children: Vec<&String> = self.edges_out.get(&node).into_iter().flatten().collect();
                if idx >= children.len() {
                    color.insert(node.clone(), Color::Black);
                    path.pop();
                    continue;
                }
                // Re-push this frame with the next index to resume later.
                frontier.push((node.clone(), idx + 1));
                let child = children[idx].clone();
                match color.get(&child).copied().unwrap_or(Color::White) {
                    Color::White => {
                        color.insert(child.clone(), Color::Gray);
                        path.push(child.clone());
                        frontier.push((child, 0));
                    }
                    Color::Gray => {
                        // Back edge: reconstruct the cycle from `path`.
                        if let Some(pos) = path.iter().position(|n| n == &child) {
                            let mut cycle: Vec<String> = path[pos..].to_vec();
                            cycle.push(child);
                            cycles.push(cycle);
                        }
                    }
                    Color::Black => {}
                }
            }
        }

        cycles
    }

    /// Run the resolver: cycle detection first, then (if acyclic) a
    /// level-synchronized Kahn's topological sort into layers.
    pub fn resolve(&self) -> Resolution {
        let cycles = self.detect_cycles();
        let missing = self.missing_providers();

        if !cycles.is_empty() {
            return Resolution {
                status: ResolverStatus::Circular,
                load_order: Vec::new(),
                layers: Vec::new(),
                cycles,
                missing_providers: missing,
            };
        }

        let mut in_degree: HashMap<String, usize> = self
            .modules
            .keys()
            .map(|n| (n.clone(), self.edges_in.get(n).map(|s| s.len()).unwrap_or(0)))
            .collect();

        let mut layers: Vec<Vec<String>> = Vec::new();
        let mut load_order: Vec<String> = Vec::new();
        let mut frontier: Vec<String> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(n, _)| n.clone())
            .collect();
        frontier.sort();

        let mut remaining: HashSet<String> = self.modules.keys().cloned().collect();

        while !frontier.is_empty() {
            for n in &frontier {
                remaining.remove(n);
            }
            load_order.extend(frontier.iter().cloned());
            layers.push(frontier.clone());

            let mut next: BTreeSet<String> = BTreeSet::new();
            for n in &frontier {
                for consumer in self.edges_out.get(n).into_iter().flatten() {
                    if let Some(deg) = in_degree.get_mut(consumer) {
                        *deg -= 1;
                        if *deg == 0 && remaining.contains(consumer) {
                            next.insert(consumer.clone());
                        }
                    }
                }
            }
            frontier = next.into_iter().collect();
        }

        let status = if missing.is_empty() {
            ResolverStatus::Resolved
        } else {
            ResolverStatus::MissingProvider
        };

        Resolution {
            status,
            load_order,
            layers,
            cycles,
            missing_providers: missing,
        }
    }

    pub fn get_producers(&self, event_type: &str) -> Vec<String> {
        self.producers_by_type
            .get(event_type)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_consumers(&self, event_type: &str) -> Vec<String> {
        self.consumers_by_type
            .get(event_type)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Direct producers this module depends on.
    pub fn get_dependencies(&self, module: &str) -> Vec<String> {
        self.edges_in.get(module).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    /// Direct consumers depending on this module.
    pub fn get_dependents(&self, module: &str) -> Vec<String> {
        self.edges_out.get(module).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    /// Transitive dependents reachable downstream from `module` (BFS).
    pub fn get_impact(&self, module: &str) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(module.to_string());

        while let Some(node) = queue.pop_front() {
            for dependent in self.edges_out.get(&node).into_iter().flatten() {
                if seen.insert(dependent.clone()) {
                    queue.push_back(dependent.clone());
                }
            }
        }

        let mut result: Vec<String> = seen.into_iter().collect();
        result.sort();
        result
    }

    /// Longest chain of dependencies ending at `module`. Memoized recursive
    /// search, guarded against revisiting a module already on the current
    /// path so a latent cycle cannot recurse forever.
    pub fn get_critical_path(&self, module: &str) -> Vec<String> {
        let mut memo: HashMap<String, Vec<String>> = HashMap::new();
        self.longest_chain(module, &mut Vec::new(), &mut memo)
    }

    fn longest_chain(
        &self,
        module: &str,
        on_path: &mut Vec<String>,
        memo: &mut HashMap<String, Vec<String>>,
    ) -> Vec<String> {
        if let Some(cached) = memo.get(module) {
            return cached.clone();
        }
        if on_path.contains(&module.to_string()) {
            return Vec::new();
        }
        on_path.push(module.to_string());

        let mut best: Vec<String> = Vec::new();
        for dep in self.edges_in.get(module).into_iter().flatten() {
            let chain = self.longest_chain(dep, on_path, memo);
            if chain.len() > best.len() {
                best = chain;
            }
        }

        on_path.pop();
        let mut path = best;
        path.push(module.to_string());
        memo.insert(module.to_string(), path.clone());
        path
    }
}
