//! Spatial Index: the town's location hierarchy (town → building → room → object).
//!
//! Locations form a forest: every node optionally names a parent, there may be
//! several roots, and the parent chain never cycles. The index also tracks
//! where each agent currently stands so runtimes can ask "who is near me?".
//!
//! All queries take `&self`; the world shares the index behind a
//! `parking_lot::RwLock` so perception reads run concurrently while moves and
//! structural edits take the write lock.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TownError};
use crate::types::{AgentId, Position, SpatialId};

/// Level of a node in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialKind {
    /// A whole town.
    Town,
    /// A building inside a town.
    Building,
    /// A room inside a building.
    Room,
    /// An object inside a room (bed, counter, desk).
    Object,
}

/// A named location in the hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialNode {
    /// Unique id.
    pub id: SpatialId,
    /// Human-readable name.
    pub name: String,
    /// Hierarchy level.
    #[serde(rename = "type")]
    pub kind: SpatialKind,
    /// Containing node, absent for roots.
    #[serde(default, rename = "parentId", alias = "parent_id")]
    pub parent_id: Option<SpatialId>,
    /// Where the node sits, if it has a fixed spot.
    #[serde(default)]
    pub position: Option<Position>,
}

impl SpatialNode {
    /// Convenience constructor.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: SpatialKind,
        parent_id: Option<&str>,
        position: Option<Position>,
    ) -> Self {
        Self {
            id: SpatialId::new(id),
            name: name.into(),
            kind,
            parent_id: parent_id.map(SpatialId::from),
            position,
        }
    }
}

/// Hierarchical registry of locations plus agent occupancy.
#[derive(Debug, Clone, Default)]
pub struct SpatialIndex {
    nodes: HashMap<SpatialId, SpatialNode>,
    children: HashMap<SpatialId, BTreeSet<SpatialId>>,
    occupants: BTreeMap<AgentId, Position>,
}

impl SpatialIndex {
    /// Build an index from a set of nodes, validating the forest invariant.
    ///
    /// # Errors
    /// Returns [`TownError::MalformedHierarchy`] naming the first offending
    /// node on duplicate ids, dangling parents or cycles.
    pub fn build(nodes: impl IntoIterator<Item = SpatialNode>) -> Result<Self> {
        let mut index = Self::default();
        for node in nodes {
            if index.nodes.contains_key(&node.id) {
                return Err(TownError::MalformedHierarchy {
                    node: node.id,
                    reason: "duplicate id".to_string(),
                });
            }
            index.nodes.insert(node.id.clone(), node);
        }

        // Deterministic order so the reported offender is stable.
        let mut ids: Vec<&SpatialId> = index.nodes.keys().collect();
        ids.sort();
        for id in ids {
            index.check_chain(id)?;
        }

        let mut children: HashMap<SpatialId, BTreeSet<SpatialId>> = HashMap::new();
        for node in index.nodes.values() {
            if let Some(parent) = &node.parent_id {
                children.entry(parent.clone()).or_default().insert(node.id.clone());
            }
        }
        index.children = children;
        debug!(nodes = index.nodes.len(), "spatial index built");
        Ok(index)
    }

    /// Walk the parent chain of `id`, failing on a dangling parent or a cycle.
    fn check_chain(&self, id: &SpatialId) -> Result<()> {
        let mut seen = BTreeSet::new();
        let mut current = id;
        loop {
            if !seen.insert(current) {
                return Err(TownError::MalformedHierarchy {
                    node: id.clone(),
                    reason: format!("parent chain cycles back through {current}"),
                });
            }
            let node = self.nodes.get(current).ok_or_else(|| TownError::MalformedHierarchy {
                node: current.clone(),
                reason: "node does not exist".to_string(),
            })?;
            match &node.parent_id {
                None => return Ok(()),
                Some(parent) if !self.nodes.contains_key(parent) => {
                    return Err(TownError::MalformedHierarchy {
                        node: current.clone(),
                        reason: format!("parent {parent} does not exist"),
                    });
                }
                Some(parent) => current = parent,
            }
        }
    }

    /// Number of location nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the index has no location nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node.
    ///
    /// # Errors
    /// Returns [`TownError::NotFound`] for unknown ids.
    pub fn resolve(&self, id: &SpatialId) -> Result<&SpatialNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| TownError::not_found("location", id))
    }

    /// The chain from `id` (inclusive) up to its root.
    ///
    /// # Errors
    /// Returns [`TownError::NotFound`] for unknown ids.
    pub fn ancestors(&self, id: &SpatialId) -> Result<Vec<SpatialId>> {
        let mut chain = vec![self.resolve(id)?.id.clone()];
        let mut current = id;
        // Acyclicity is guaranteed by construction, so this terminates.
        while let Some(parent) = self.nodes.get(current).and_then(|n| n.parent_id.as_ref()) {
            chain.push(parent.clone());
            current = parent;
        }
        Ok(chain)
    }

    /// Direct children of `id`.
    ///
    /// # Errors
    /// Returns [`TownError::NotFound`] for unknown ids.
    pub fn children(&self, id: &SpatialId) -> Result<BTreeSet<SpatialId>> {
        self.resolve(id)?;
        Ok(self.children.get(id).cloned().unwrap_or_default())
    }

    /// Every node below `id`, breadth-first, in id order per level.
    ///
    /// # Errors
    /// Returns [`TownError::NotFound`] for unknown ids.
    pub fn descendants(&self, id: &SpatialId) -> Result<Vec<SpatialId>> {
        self.resolve(id)?;
        let mut out = Vec::new();
        let mut frontier = vec![id.clone()];
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for node in &frontier {
                if let Some(kids) = self.children.get(node) {
                    next.extend(kids.iter().cloned());
                }
            }
            out.extend(next.iter().cloned());
            frontier = next;
        }
        Ok(out)
    }

    /// True iff `ancestor` appears in `ancestors(id)`. An unknown `ancestor`
    /// is simply not in the chain.
    ///
    /// # Errors
    /// Returns [`TownError::NotFound`] if `id` is unknown.
    pub fn is_within(&self, id: &SpatialId, ancestor: &SpatialId) -> Result<bool> {
        Ok(self.ancestors(id)?.contains(ancestor))
    }

    /// Nodes without a parent, in id order.
    #[must_use]
    pub fn roots(&self) -> Vec<SpatialId> {
        let mut roots: Vec<SpatialId> = self
            .nodes
            .values()
            .filter(|n| n.parent_id.is_none())
            .map(|n| n.id.clone())
            .collect();
        roots.sort();
        roots
    }

    /// The node's own position, or the closest ancestor's.
    ///
    /// # Errors
    /// Returns [`TownError::NotFound`] for unknown ids.
    pub fn effective_position(&self, id: &SpatialId) -> Result<Option<Position>> {
        Ok(self
            .ancestors(id)?
            .iter()
            .find_map(|a| self.nodes.get(a).and_then(|n| n.position)))
    }

    /// Positioned nodes within `radius` of `at`, nearest first (ties by id).
    #[must_use]
    pub fn nodes_within(&self, at: &Position, radius: f32) -> Vec<&SpatialNode> {
        let mut hits: Vec<(f32, &SpatialNode)> = self
            .nodes
            .values()
            .filter_map(|n| n.position.map(|p| (p.distance(at), n)))
            .filter(|(d, _)| *d <= radius)
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        hits.into_iter().map(|(_, n)| n).collect()
    }

    /// Position lookup: the nearest positioned node to `at`, preferring the
    /// deepest node when several are equally close.
    #[must_use]
    pub fn locate(&self, at: &Position) -> Option<&SpatialNode> {
        self.nodes
            .values()
            .filter_map(|n| n.position.map(|p| (p.distance(at), n)))
            .min_by(|a, b| {
                a.0.total_cmp(&b.0)
                    .then_with(|| self.depth(&b.1.id).cmp(&self.depth(&a.1.id)))
                    .then_with(|| a.1.id.cmp(&b.1.id))
            })
            .map(|(_, n)| n)
    }

    fn depth(&self, id: &SpatialId) -> usize {
        self.ancestors(id).map(|a| a.len()).unwrap_or(0)
    }

    // --- structural mutation ---

    /// Insert a new node under an existing parent (or as a root).
    ///
    /// # Errors
    /// Returns [`TownError::MalformedHierarchy`] on duplicate ids or a missing
    /// parent. The index is unchanged on error.
    pub fn insert(&mut self, node: SpatialNode) -> Result<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(TownError::MalformedHierarchy {
                node: node.id,
                reason: "duplicate id".to_string(),
            });
        }
        if let Some(parent) = &node.parent_id {
            if !self.nodes.contains_key(parent) {
                return Err(TownError::MalformedHierarchy {
                    node: node.id.clone(),
                    reason: format!("parent {parent} does not exist"),
                });
            }
            self.children.entry(parent.clone()).or_default().insert(node.id.clone());
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Re-parent `id` under `new_parent` (or make it a root).
    ///
    /// # Errors
    /// Returns [`TownError::NotFound`] for an unknown node and
    /// [`TownError::MalformedHierarchy`] if the move would create a cycle or
    /// dangle. The index is unchanged on error.
    pub fn move_node(&mut self, id: &SpatialId, new_parent: Option<&SpatialId>) -> Result<()> {
        self.resolve(id)?;
        if let Some(parent) = new_parent {
            if !self.nodes.contains_key(parent) {
                return Err(TownError::MalformedHierarchy {
                    node: id.clone(),
                    reason: format!("parent {parent} does not exist"),
                });
            }
            if self.ancestors(parent)?.contains(id) {
                return Err(TownError::MalformedHierarchy {
                    node: id.clone(),
                    reason: format!("moving under {parent} would create a cycle"),
                });
            }
        }

        let old_parent = self.nodes.get(id).and_then(|n| n.parent_id.clone());
        if let Some(old) = old_parent {
            if let Some(set) = self.children.get_mut(&old) {
                set.remove(id);
            }
        }
        if let Some(parent) = new_parent {
            self.children.entry(parent.clone()).or_default().insert(id.clone());
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent_id = new_parent.cloned();
        }
        Ok(())
    }

    // --- agent occupancy ---

    /// Record where an agent stands.
    pub fn place_agent(&mut self, agent: AgentId, position: Position) {
        self.occupants.insert(agent, position);
    }

    /// Forget an agent (it left the simulation).
    pub fn remove_agent(&mut self, agent: &AgentId) -> Option<Position> {
        self.occupants.remove(agent)
    }

    /// Where an agent stands, if placed.
    #[must_use]
    pub fn agent_position(&self, agent: &AgentId) -> Option<Position> {
        self.occupants.get(agent).copied()
    }

    /// Agents within `radius` of `at`, nearest first (ties by id).
    #[must_use]
    pub fn agents_within(&self, at: &Position, radius: f32) -> Vec<(AgentId, f32)> {
        let mut hits: Vec<(AgentId, f32)> = self
            .occupants
            .iter()
            .map(|(id, p)| (id.clone(), p.distance(at)))
            .filter(|(_, d)| *d <= radius)
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn town() -> SpatialIndex {
        SpatialIndex::build(vec![
            SpatialNode::new("ville", "Ville", SpatialKind::Town, None, Some(Position::new(0.0, 0.0))),
            SpatialNode::new("cafe", "Cafe", SpatialKind::Building, Some("ville"), Some(Position::new(10.0, 0.0))),
            SpatialNode::new("cafe.kitchen", "Kitchen", SpatialKind::Room, Some("cafe"), None),
            SpatialNode::new("cafe.stove", "Stove", SpatialKind::Object, Some("cafe.kitchen"), Some(Position::new(11.0, 1.0))),
            SpatialNode::new("farm", "Farm", SpatialKind::Town, None, Some(Position::new(100.0, 100.0))),
        ])
        .expect("valid forest")
    }

    #[test]
    fn ancestors_run_to_root() {
        let index = town();
        let chain = index.ancestors(&"cafe.stove".into()).expect("known");
        let names: Vec<&str> = chain.iter().map(SpatialId::as_str).collect();
        assert_eq!(names, ["cafe.stove", "cafe.kitchen", "cafe", "ville"]);
        assert!(index.resolve(chain.last().expect("non-empty")).expect("known").parent_id.is_none());
    }

    #[test]
    fn is_within_follows_the_chain() {
        let index = town();
        assert!(index.is_within(&"cafe.stove".into(), &"ville".into()).expect("known"));
        assert!(index.is_within(&"cafe".into(), &"cafe".into()).expect("known"));
        assert!(!index.is_within(&"cafe".into(), &"farm".into()).expect("known"));
        assert!(index.is_within(&"nowhere".into(), &"ville".into()).is_err());
        assert!(!index.is_within(&"cafe.stove".into(), &"nowhere".into()).expect("known id"));
    }

    #[test]
    fn children_and_roots() {
        let index = town();
        let kids = index.children(&"ville".into()).expect("known");
        assert_eq!(kids.into_iter().collect::<Vec<_>>(), vec![SpatialId::from("cafe")]);
        assert_eq!(index.roots(), vec![SpatialId::from("farm"), SpatialId::from("ville")]);
        assert_eq!(index.descendants(&"cafe".into()).expect("known").len(), 2);
    }

    #[test]
    fn missing_parent_is_rejected() {
        let err = SpatialIndex::build(vec![SpatialNode::new(
            "room",
            "Room",
            SpatialKind::Room,
            Some("ghost"),
            None,
        )]);
        assert!(matches!(err, Err(TownError::MalformedHierarchy { node, .. }) if node.as_str() == "room"));
    }

    #[test]
    fn cycle_is_rejected() {
        let err = SpatialIndex::build(vec![
            SpatialNode::new("a", "A", SpatialKind::Room, Some("b"), None),
            SpatialNode::new("b", "B", SpatialKind::Room, Some("a"), None),
        ]);
        assert!(matches!(err, Err(TownError::MalformedHierarchy { .. })));
    }

    #[test]
    fn move_that_would_cycle_leaves_index_untouched() {
        let mut index = town();
        let err = index.move_node(&"cafe".into(), Some(&"cafe.stove".into()));
        assert!(matches!(err, Err(TownError::MalformedHierarchy { .. })));
        assert_eq!(
            index.resolve(&"cafe".into()).expect("known").parent_id,
            Some(SpatialId::from("ville"))
        );

        index.move_node(&"cafe".into(), Some(&"farm".into())).expect("valid move");
        assert!(index.is_within(&"cafe.stove".into(), &"farm".into()).expect("known"));
        assert!(index.children(&"ville".into()).expect("known").is_empty());
    }

    #[test]
    fn insert_requires_parent() {
        let mut index = town();
        assert!(index
            .insert(SpatialNode::new("x", "X", SpatialKind::Object, Some("ghost"), None))
            .is_err());
        index
            .insert(SpatialNode::new("cafe.table", "Table", SpatialKind::Object, Some("cafe.kitchen"), None))
            .expect("valid insert");
        assert!(index.children(&"cafe.kitchen".into()).expect("known").contains(&"cafe.table".into()));
    }

    #[test]
    fn position_queries() {
        let mut index = town();
        assert_eq!(
            index.effective_position(&"cafe.kitchen".into()).expect("known"),
            Some(Position::new(10.0, 0.0))
        );
        let near = index.nodes_within(&Position::new(10.0, 0.0), 2.0);
        assert_eq!(near[0].id.as_str(), "cafe");
        assert_eq!(near.len(), 2);
        assert_eq!(index.locate(&Position::new(11.0, 0.9)).map(|n| n.id.as_str()), Some("cafe.stove"));

        index.place_agent("A1".into(), Position::new(9.0, 0.0));
        index.place_agent("A2".into(), Position::new(50.0, 0.0));
        let agents = index.agents_within(&Position::new(10.0, 0.0), 5.0);
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].0.as_str(), "A1");
    }
}
