//! Cross-cluster graph merging.
//!
//! A node that straddles two clusters shows up once per fragment under the
//! same label. The first copy (lowest fragment, then declaration order)
//! absorbs the connections of the copies in later fragments, which are then
//! dropped. Copies within the same fragment are left alone. Copies must
//! agree on address and node kind, otherwise two unrelated nodes ended up
//! with the same label and the merge is refused.

use super::types::{ClusterFragment, Node};
use super::validation::TopologyError;
use log::{debug, info};
use std::collections::HashMap;

/// Collapse same-label nodes across fragments.
///
/// Connection lists are concatenated without de-duplication. Each fragment's
/// node list is rebuilt rather than edited in place. Returns the number of
/// copies that were absorbed; a second call on the result returns 0 and
/// changes nothing. Fragments are untouched when an error is returned.
pub fn merge_clusters_to_network(fragments: &mut [ClusterFragment]) -> Result<usize, TopologyError> {
    check_copies_agree(fragments)?;

    // label -> (fragment, position in that fragment's rebuilt list)
    let mut owners: HashMap<String, (usize, usize)> = HashMap::new();
    let mut rebuilt: Vec<Vec<Node>> = Vec::with_capacity(fragments.len());
    let mut absorbed = 0;

    for (fragment_index, fragment) in fragments.iter_mut().enumerate() {
        let nodes = std::mem::take(&mut fragment.nodes);
        let mut kept: Vec<Node> = Vec::with_capacity(nodes.len());

        for node in nodes {
            match owners.get(&node.label) {
                Some(&(owner_fragment, owner_position)) if owner_fragment != fragment_index => {
                    debug!(
                        "merging node {} of cluster {} into cluster {} ({} connections)",
                        node.label,
                        fragment_index,
                        owner_fragment,
                        node.connections.len()
                    );
                    rebuilt[owner_fragment][owner_position]
                        .connections
                        .extend(node.connections);
                    absorbed += 1;
                }
                _ => {
                    owners
                        .entry(node.label.clone())
                        .or_insert((fragment_index, kept.len()));
                    kept.push(node);
                }
            }
        }
        rebuilt.push(kept);
    }

    for (fragment, nodes) in fragments.iter_mut().zip(rebuilt) {
        fragment.nodes = nodes;
    }

    info!("Merged {} cross-cluster node copies", absorbed);
    Ok(absorbed)
}

/// Every cross-fragment copy of a label must match its first occurrence
fn check_copies_agree(fragments: &[ClusterFragment]) -> Result<(), TopologyError> {
    let mut first_seen: HashMap<&str, (usize, &Node)> = HashMap::new();
    for (fragment_index, fragment) in fragments.iter().enumerate() {
        for node in &fragment.nodes {
            let (owner_fragment, owner) = *first_seen
                .entry(node.label.as_str())
                .or_insert((fragment_index, node));
            if owner_fragment == fragment_index {
                continue;
            }
            if owner.testbed_ip != node.testbed_ip || owner.kind() != node.kind() {
                return Err(TopologyError::ConflictingCopies {
                    label: node.label.clone(),
                    first_cluster: fragments[owner_fragment].cluster_ip,
                    first: owner.testbed_ip,
                    second_cluster: fragment.cluster_ip,
                    second: node.testbed_ip,
                });
            }
        }
    }
    Ok(())
}

/// The fully allocated and merged network, in cluster order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedTopology {
    fragments: Vec<ClusterFragment>,
    absorbed: usize,
}

impl MergedTopology {
    pub fn merge(mut fragments: Vec<ClusterFragment>) -> Result<Self, TopologyError> {
        let absorbed = merge_clusters_to_network(&mut fragments)?;
        Ok(Self {
            fragments,
            absorbed,
        })
    }

    pub fn fragments(&self) -> &[ClusterFragment] {
        &self.fragments
    }

    /// Every node, clusters first, then declaration order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.fragments.iter().flat_map(|fragment| fragment.nodes.iter())
    }

    pub fn find(&self, label: &str) -> Option<&Node> {
        self.nodes().find(|node| node.label == label)
    }

    pub fn node_count(&self) -> usize {
        self.fragments.iter().map(|fragment| fragment.nodes.len()).sum()
    }

    /// Number of copies collapsed while merging
    pub fn absorbed(&self) -> usize {
        self.absorbed
    }

    pub fn into_fragments(self) -> Vec<ClusterFragment> {
        self.fragments
    }
}
