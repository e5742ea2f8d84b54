//! Fraction of Common Contacts: similarity matrix and greedy clustering.
//!
//! Models are identified by their 1-based position in the list handed to
//! [`calculate_pairwise_matrix`]. For a pair `(i, j)`:
//!
//! - `fcc   = |Ci ∩ Cj| / |Ci|`
//! - `fcc_v = |Ci ∩ Cj| / |Cj|`
//!
//! `j` is a neighbor of `i` when `fcc >= cutoff` and
//! `fcc_v >= cutoff * strictness`, and the reverse holds symmetrically.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::io::{BufRead, BufReader};
use std::path::Path;

use dockflow_core::Result;

/// Contacts of one model, one entry per non-empty line of its contact file.
pub type ContactSet = BTreeSet<String>;

/// One line of the similarity matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatrixEntry {
    pub first: usize,
    pub second: usize,
    pub fcc: f64,
    pub fcc_v: f64,
}

/// A model of the clustering pool and the models it considers close.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub id: usize,
    pub neighbors: BTreeSet<usize>,
}

/// A cluster built around its centre. `members` includes the centre.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    /// 1-based, in creation order.
    pub id: usize,
    pub center: usize,
    pub members: Vec<usize>,
}

/// Read contact files in order.
pub fn parse_contact_files<P: AsRef<Path>>(files: &[P]) -> Result<Vec<ContactSet>> {
    files.iter().map(|f| parse_contact_file(f.as_ref())).collect()
}

pub fn parse_contact_file(path: &Path) -> Result<ContactSet> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut contacts = ContactSet::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            contacts.insert(line.to_string());
        }
    }
    Ok(contacts)
}

fn fraction(common: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        common as f64 / total as f64
    }
}

/// Upper-triangle similarity matrix, `first < second`, 1-based ids.
pub fn calculate_pairwise_matrix(contacts: &[ContactSet]) -> Vec<MatrixEntry> {
    let mut matrix = Vec::with_capacity(contacts.len() * contacts.len().saturating_sub(1) / 2);
    for (i, a) in contacts.iter().enumerate() {
        for (j, b) in contacts.iter().enumerate().skip(i + 1) {
            let common = a.intersection(b).count();
            matrix.push(MatrixEntry {
                first: i + 1,
                second: j + 1,
                fcc: fraction(common, a.len()),
                fcc_v: fraction(common, b.len()),
            });
        }
    }
    matrix
}

/// Text form of the matrix: `id1 id2 fcc fcc_v` with 2 and 3 decimals.
pub fn format_matrix(matrix: &[MatrixEntry]) -> String {
    let mut out = String::new();
    for entry in matrix {
        let _ = writeln!(
            out,
            "{} {} {:.2} {:.3}",
            entry.first, entry.second, entry.fcc, entry.fcc_v
        );
    }
    out
}

pub fn write_matrix(path: &Path, matrix: &[MatrixEntry]) -> Result<()> {
    std::fs::write(path, format_matrix(matrix))?;
    Ok(())
}

/// Build the clustering pool from matrix lines.
///
/// Every id appearing in a line becomes an element, with or without
/// neighbors. Malformed lines are skipped.
pub fn read_matrix(text: &str, cutoff: f64, strictness: f64) -> BTreeMap<usize, Element> {
    let mut pool: BTreeMap<usize, Element> = BTreeMap::new();
    let reverse_cutoff = cutoff * strictness;

    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [first, second, fcc, fcc_v] = fields[..] else {
            continue;
        };
        let (Ok(first), Ok(second), Ok(fcc), Ok(fcc_v)) = (
            first.parse::<usize>(),
            second.parse::<usize>(),
            fcc.parse::<f64>(),
            fcc_v.parse::<f64>(),
        ) else {
            continue;
        };

        pool.entry(first).or_insert_with(|| Element {
            id: first,
            ..Element::default()
        });
        pool.entry(second).or_insert_with(|| Element {
            id: second,
            ..Element::default()
        });

        if fcc >= cutoff && fcc_v >= reverse_cutoff {
            if let Some(element) = pool.get_mut(&first) {
                element.neighbors.insert(second);
            }
        }
        if fcc_v >= cutoff && fcc >= reverse_cutoff {
            if let Some(element) = pool.get_mut(&second) {
                element.neighbors.insert(first);
            }
        }
    }
    pool
}

pub fn read_matrix_file(path: &Path, cutoff: f64, strictness: f64) -> Result<BTreeMap<usize, Element>> {
    let text = std::fs::read_to_string(path)?;
    Ok(read_matrix(&text, cutoff, strictness))
}

/// Greedy clustering.
///
/// The element with the most remaining neighbors (lowest id on ties) becomes
/// a centre and takes all of them; members leave the pool. Stops when the best
/// candidate would give fewer than `threshold` members, centre included.
/// Returns the clusters and the ids left unclustered, ascending.
pub fn cluster_elements(
    mut pool: BTreeMap<usize, Element>,
    threshold: usize,
) -> (Vec<Cluster>, Vec<usize>) {
    let mut clusters = Vec::new();

    loop {
        let best = pool
            .values()
            .max_by(|a, b| {
                a.neighbors
                    .len()
                    .cmp(&b.neighbors.len())
                    .then_with(|| b.id.cmp(&a.id))
            })
            .map(|e| (e.id, e.neighbors.len()));

        let Some((center, neighbors)) = best else {
            break;
        };
        if neighbors + 1 < threshold.max(1) {
            break;
        }

        let mut members = vec![center];
        if let Some(element) = pool.remove(&center) {
            members.extend(element.neighbors.iter().copied());
        }
        for member in &members[1..] {
            pool.remove(member);
        }
        for element in pool.values_mut() {
            element.neighbors.retain(|id| !members.contains(id));
        }

        clusters.push(Cluster {
            id: clusters.len() + 1,
            center,
            members,
        });
    }

    let unclustered = pool.into_keys().collect();
    (clusters, unclustered)
}

/// Classic `cluster.out` text, one `Cluster N -> members` line per cluster.
pub fn format_clusters(clusters: &[Cluster]) -> String {
    let mut out = String::new();
    for cluster in clusters {
        let members: Vec<String> = cluster.members.iter().map(usize::to_string).collect();
        let _ = writeln!(out, "Cluster {} -> {} ", cluster.id, members.join(" "));
    }
    out
}
