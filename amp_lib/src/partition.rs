//! The clustering state of the denoiser: an arena of clusters and, for each
//! unique sequence, the index of the cluster that holds it.

/// One cluster of unique sequences around a center.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Index of the unique sequence taken as the true sequence.
    pub center: usize,
    /// Sum of member abundances.
    pub reads: u64,
    pub n_uniques: usize,
    /// Abundance p-value of the center when it was split off. 0 for the first cluster.
    pub birth_pvalue: f64,
    /// Reads of the center expected as errors when it was split off.
    pub birth_expected: f64,
}

/// Every unique sequence belongs to exactly one cluster at all times.
#[derive(Debug, Clone)]
pub struct Partition {
    abundances: Vec<u64>,
    clusters: Vec<Cluster>,
    assignment: Vec<usize>,
    is_center: Vec<bool>,
}

impl Partition {
    /// One cluster centered on `center` that holds every sequence.
    /// With no sequences the partition has no clusters.
    pub fn new(abundances: Vec<u64>, center: usize) -> Partition {
        let n = abundances.len();
        let mut is_center = vec![false; n];
        let clusters = if n == 0 {
            Vec::new()
        } else {
            is_center[center] = true;
            vec![Cluster {
                center,
                reads: abundances.iter().sum(),
                n_uniques: n,
                birth_pvalue: 0.0,
                birth_expected: 0.0,
            }]
        };
        Partition {
            abundances,
            clusters,
            assignment: vec![0; n],
            is_center,
        }
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    pub fn assignment(&self) -> &[usize] {
        &self.assignment
    }

    pub fn cluster_of(&self, unique: usize) -> usize {
        self.assignment[unique]
    }

    pub fn is_center(&self, unique: usize) -> bool {
        self.is_center[unique]
    }

    /// Move a unique sequence to another cluster. Centers never move.
    pub fn assign(&mut self, unique: usize, cluster: usize) {
        let old = self.assignment[unique];
        if old == cluster || self.is_center[unique] {
            return;
        }
        let a = self.abundances[unique];
        self.clusters[old].reads -= a;
        self.clusters[old].n_uniques -= 1;
        self.clusters[cluster].reads += a;
        self.clusters[cluster].n_uniques += 1;
        self.assignment[unique] = cluster;
    }

    /// Split `center` off into a new cluster of its own and return the new index.
    pub fn add_cluster(&mut self, center: usize, birth_pvalue: f64, birth_expected: f64) -> usize {
        assert!(!self.is_center[center], "sequence {center} is already a center");
        let idx = self.clusters.len();
        self.clusters.push(Cluster {
            center,
            reads: 0,
            n_uniques: 0,
            birth_pvalue,
            birth_expected,
        });
        self.assign(center, idx);
        self.is_center[center] = true;
        idx
    }

    /// Unique sequences of one cluster, in index order.
    pub fn members(&self, cluster: usize) -> impl Iterator<Item = usize> + '_ {
        self.assignment
            .iter()
            .enumerate()
            .filter(move |&(_, &c)| c == cluster)
            .map(|(u, _)| u)
    }
}
