//! High-bandwidth memory detection.
//!
//! On Linux, on-package HBM (MCDRAM on Xeon Phi, HBM on Sapphire Rapids
//! Max) is exposed as memory-only NUMA nodes: nodes that own memory but no
//! CPUs. Those nodes are what the high-bandwidth tier binds its pages to.

use std::fs;
use std::path::Path;

use libc::c_ulong;

const NODE_ROOT: &str = "/sys/devices/system/node";

const WORD_BITS: u32 = c_ulong::BITS;

/// A set of NUMA nodes in the kernel's `nodemask` layout: one bit per node,
/// packed into native `unsigned long` words.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeMask {
    words: Vec<c_ulong>,
}

impl NodeMask {
    /// Mask with exactly the given nodes set.
    pub fn from_nodes(nodes: impl IntoIterator<Item = u32>) -> Self {
        let mut words: Vec<c_ulong> = Vec::new();
        for node in nodes {
            let word = (node / WORD_BITS) as usize;
            if words.len() <= word {
                words.resize(word + 1, 0);
            }
            words[word] |= 1 << (node % WORD_BITS);
        }
        Self { words }
    }

    /// Whether no node is set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Whether `node` is set.
    pub fn contains(&self, node: u32) -> bool {
        self.words
            .get((node / WORD_BITS) as usize)
            .is_some_and(|w| w & (1 << (node % WORD_BITS)) != 0)
    }

    /// The set nodes in ascending order.
    pub fn nodes(&self) -> Vec<u32> {
        let bits = self.words.len() as u32 * WORD_BITS;
        (0..bits).filter(|&n| self.contains(n)).collect()
    }

    /// The packed words, as passed to `mbind`.
    pub fn words(&self) -> &[c_ulong] {
        &self.words
    }

    /// The `maxnode` argument for `mbind`.
    ///
    /// The kernel reads `maxnode - 1` bits, so this is one more than the
    /// number of bits held.
    pub fn max_node(&self) -> c_ulong {
        (self.words.len() as c_ulong) * c_ulong::from(WORD_BITS) + 1
    }
}

/// NUMA node ids that have memory but no CPUs.
///
/// Returns an empty list on platforms without the sysfs node hierarchy.
pub fn high_bandwidth_nodes() -> Vec<u32> {
    nodes_under(Path::new(NODE_ROOT))
}

/// The high-bandwidth nodes of the running node as a [`NodeMask`].
pub fn high_bandwidth_mask() -> NodeMask {
    NodeMask::from_nodes(high_bandwidth_nodes())
}

/// Whether the running node has high-bandwidth memory.
pub fn available() -> bool {
    !high_bandwidth_nodes().is_empty()
}

fn nodes_under(root: &Path) -> Vec<u32> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    let mut nodes: Vec<u32> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name();
            let id = name.to_str()?.strip_prefix("node")?.parse::<u32>().ok()?;
            let cpus = fs::read_to_string(entry.path().join("cpulist")).ok()?;
            cpus.trim().is_empty().then_some(id)
        })
        .collect();
    nodes.sort_unstable();
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_root(tag: &str) -> std::path::PathBuf {
        let root = std::env::temp_dir().join(format!("tierarray-hbw-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        root
    }

    fn fake_node(root: &Path, name: &str, cpulist: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("cpulist"), cpulist).unwrap();
    }

    #[test]
    fn memory_only_nodes_are_high_bandwidth() {
        let root = fake_root("nodes");
        fake_node(&root, "node0", "0-63\n");
        fake_node(&root, "node1", "64-127\n");
        fake_node(&root, "node3", "\n");
        fake_node(&root, "node2", "\n");
        fs::create_dir_all(root.join("power")).unwrap();
        assert_eq!(nodes_under(&root), vec![2, 3]);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn mask_built_from_sysfs_selects_only_hbm_nodes() {
        let root = fake_root("mask");
        fake_node(&root, "node0", "0-55\n");
        fake_node(&root, "node1", "56-111\n");
        fake_node(&root, "node4", "\n");
        fake_node(&root, "node5", "\n");
        let mask = NodeMask::from_nodes(nodes_under(&root));
        fs::remove_dir_all(&root).unwrap();

        assert_eq!(mask.words(), &[0b11_0000]);
        assert_eq!(mask.max_node(), c_ulong::from(WORD_BITS) + 1);
        assert!(mask.contains(4) && mask.contains(5));
        assert!(!mask.contains(0) && !mask.contains(1));
        assert_eq!(mask.nodes(), vec![4, 5]);
    }

    #[test]
    fn high_node_ids_spill_into_later_words() {
        let high = WORD_BITS + 3;
        let mask = NodeMask::from_nodes([1, high]);
        assert_eq!(mask.words().len(), 2);
        assert_eq!(mask.nodes(), vec![1, high]);
    }

    #[test]
    fn missing_hierarchy_means_no_hbm() {
        assert!(nodes_under(Path::new("/nonexistent/tierarray/node")).is_empty());
        assert!(NodeMask::default().is_empty());
        assert!(NodeMask::from_nodes([]).is_empty());
    }
}
