//! Pairwise-cosine clustering of included memories
//!
//! Optional assembly step: memories whose embeddings are mutually
//! similar collapse into a cluster represented by their highest-ranked
//! member. Greedy over the ranked order, so output is deterministic.

use mempack_search::cosine_similarity;

/// Minimum members for a group to count as a cluster.
pub const MIN_CLUSTER_SIZE: usize = 2;

/// One formed cluster, members in ranked order, representative first.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub member_ids: Vec<String>,
    pub avg_similarity: f64,
}

impl Cluster {
    pub fn representative(&self) -> &str {
        &self.member_ids[0]
    }

    pub fn size(&self) -> usize {
        self.member_ids.len()
    }
}

/// Group items whose pairwise similarities all exceed `threshold`.
///
/// `items` must be in ranked order; each unassigned item seeds a group
/// and absorbs later items similar to every current member. Groups
/// below [`MIN_CLUSTER_SIZE`] dissolve. At most `max_clusters` are
/// returned.
pub fn cluster_by_similarity(
    items: &[(String, Vec<f32>)],
    threshold: f64,
    max_clusters: usize,
) -> Vec<Cluster> {
    let mut assigned = vec![false; items.len()];
    let mut clusters = Vec::new();

    for seed in 0..items.len() {
        if clusters.len() >= max_clusters {
            break;
        }
        if assigned[seed] {
            continue;
        }

        let mut member_indexes = vec![seed];
        let mut similarity_sum = 0.0;
        let mut pair_count = 0usize;

        for candidate in seed + 1..items.len() {
            if assigned[candidate] {
                continue;
            }
            let sims: Vec<f64> = member_indexes
                .iter()
                .map(|&m| cosine_similarity(&items[m].1, &items[candidate].1))
                .collect();
            if sims.iter().all(|s| *s > threshold) {
                similarity_sum += sims.iter().sum::<f64>();
                pair_count += sims.len();
                member_indexes.push(candidate);
            }
        }

        if member_indexes.len() >= MIN_CLUSTER_SIZE {
            for &index in &member_indexes {
                assigned[index] = true;
            }
            clusters.push(Cluster {
                member_ids: member_indexes
                    .iter()
                    .map(|&i| items[i].0.clone())
                    .collect(),
                avg_similarity: similarity_sum / pair_count as f64,
            });
        }
    }

    clusters
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(x: f32, y: f32) -> Vec<f32> {
        let norm = (x * x + y * y).sqrt();
        vec![x / norm, y / norm]
    }

    #[test]
    fn test_similar_items_cluster() {
        let items = vec![
            ("M-a".to_string(), unit(1.0, 0.0)),
            ("M-b".to_string(), unit(0.99, 0.05)),
            ("M-c".to_string(), unit(0.0, 1.0)),
        ];
        let clusters = cluster_by_similarity(&items, 0.75, 10);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].member_ids, vec!["M-a", "M-b"]);
        assert_eq!(clusters[0].representative(), "M-a");
        assert!(clusters[0].avg_similarity > 0.75);
    }

    #[test]
    fn test_dissimilar_items_do_not_cluster() {
        let items = vec![
            ("M-a".to_string(), unit(1.0, 0.0)),
            ("M-b".to_string(), unit(0.0, 1.0)),
        ];
        assert!(cluster_by_similarity(&items, 0.75, 10).is_empty());
    }

    #[test]
    fn test_all_pairs_must_agree() {
        // b is similar to both a and c, but a and c are not similar to
        // each other; c must not join a's cluster through b
        let items = vec![
            ("M-a".to_string(), unit(1.0, 0.0)),
            ("M-b".to_string(), unit(0.8, 0.6)),
            ("M-c".to_string(), unit(0.0, 1.0)),
        ];
        let clusters = cluster_by_similarity(&items, 0.75, 10);
        for cluster in &clusters {
            assert!(!cluster.member_ids.contains(&"M-c".to_string()));
        }
    }

    #[test]
    fn test_cluster_cap() {
        let mut items = Vec::new();
        for group in 0..5 {
            let angle = group as f32;
            items.push((format!("M-{group}a"), unit(angle.cos(), angle.sin())));
            items.push((format!("M-{group}b"), unit(angle.cos(), angle.sin())));
        }
        let clusters = cluster_by_similarity(&items, 0.75, 2);
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn test_deterministic() {
        let items = vec![
            ("M-a".to_string(), unit(1.0, 0.0)),
            ("M-b".to_string(), unit(0.98, 0.1)),
            ("M-c".to_string(), unit(0.97, 0.12)),
        ];
        let a = cluster_by_similarity(&items, 0.75, 10);
        let b = cluster_by_similarity(&items, 0.75, 10);
        assert_eq!(a, b);
    }
}
