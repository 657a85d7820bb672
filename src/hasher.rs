//! Dependency graph digests.
//!
//! [`GraphHasher`] computes a stable SHA-256 digest of a
//! [`DependencyGraph`]. Two runs over the same sources yield the same digest
//! whatever toolchain compiled them, so the digest identifies the shape of a
//! build in logs and in the final [`Artifact`](crate::pipeline::Artifact).
//!
//! # Examples
//!
//! ```
//! use fabline::deps::{analyze, scan_source, IgnoreSet};
//! use fabline::hasher::GraphHasher;
//!
//! let units = vec![scan_source("main.f90".into(), "program main\nend program\n")];
//! let graph = analyze(&units, &IgnoreSet::default(), "main").expect("graph");
//! assert_eq!(GraphHasher::hash(&graph).len(), 64);
//! ```

use crate::deps::DependencyGraph;
use camino::Utf8Path;
use sha2::{Digest, Sha256};

/// Computes stable digests for [`DependencyGraph`]s.
pub struct GraphHasher;

impl GraphHasher {
    /// Calculate the hex digest of `graph`.
    #[must_use]
    pub fn hash(graph: &DependencyGraph) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"root");
        Self::update_path(&mut hasher, graph.root());
        for unit in graph.units() {
            hasher.update(b"unit");
            Self::update_path(&mut hasher, unit);
            let deps = graph.dependencies(unit);
            hasher.update(format!("{}:", deps.len()).as_bytes());
            for dep in deps {
                Self::update_path(&mut hasher, dep);
            }
        }
        format!("{:x}", hasher.finalize())
    }

    fn update_path(hasher: &mut Sha256, path: &Utf8Path) {
        Self::update_with_len(hasher, path.as_str().as_bytes());
    }

    fn update_with_len(hasher: &mut Sha256, bytes: &[u8]) {
        let len = bytes.len();
        hasher.update(format!("{len}:").as_bytes());
        hasher.update(bytes);
    }
}
