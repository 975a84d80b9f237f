//! Configuration hashing for change detection.
//!
//! A cluster's hash covers every field the reconciler acts on, so an
//! unchanged hash lets `plan` skip the describe round trip.

use sha2::{Digest, Sha256};

use super::spec::{ClusterSpec, DeployConfig};

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire manifest.
    #[must_use]
    pub fn hash_config(&self, config: &DeployConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.provider.region.as_bytes());
        for cluster in &config.clusters {
            hasher.update(self.hash_cluster(cluster).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single cluster spec.
    #[must_use]
    pub fn hash_cluster(&self, cluster: &ClusterSpec) -> String {
        let mut hasher = Sha256::new();

        // Fields are separated so that ("ab", "c") and ("a", "bc") differ
        let mut field = |value: &[u8]| {
            hasher.update(value);
            hasher.update([0u8]);
        };

        field(cluster.name.as_bytes());
        field(cluster.db_type.trim().as_bytes());
        field(cluster.db_version.trim().as_bytes());
        field(cluster.db_node_class.as_bytes());
        field(cluster.zone().unwrap_or_default().as_bytes());
        field(cluster.vswitch().unwrap_or_default().as_bytes());

        field(cluster.pay_type.to_string().as_bytes());
        field(cluster.renewal_status.to_string().as_bytes());
        field(&[u8::from(cluster.auto_renew)]);
        field(&cluster.auto_renew_period.to_be_bytes());
        field(&cluster.period.to_be_bytes());

        // BTreeSet iterates in order
        match cluster.effective_security_ips() {
            Some(ips) => {
                for ip in ips {
                    field(ip.as_bytes());
                }
            }
            None => field(b"-"),
        }

        field(cluster.maintain_time.as_deref().unwrap_or("-").as_bytes());
        field(cluster.description.as_deref().unwrap_or("-").as_bytes());

        // Parameters (sorted by name for determinism)
        let mut parameters: Vec<_> = cluster.parameters.iter().collect();
        parameters.sort_by(|a, b| a.name.cmp(&b.name));
        for parameter in parameters {
            field(parameter.name.as_bytes());
            field(parameter.value.as_bytes());
        }
        field(cluster.effective_time.to_string().as_bytes());

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}
