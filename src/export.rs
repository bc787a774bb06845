
//! Writers for every persisted artifact: the association matrix (`.npy`), labels,
//! categories and presence CSVs, cluster categories and per-cluster sketches.
//!
//! Each artifact is written to a temporary file next to its destination and renamed
//! into place once complete, so a failed write never leaves a partial file behind.

use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::Array2;
use ndarray_npy::WriteNpyExt;
use tempfile::NamedTempFile;

use crate::association::{AssociationMatrix, PresenceMatrix};
use crate::classify::PangenomeRank;
use crate::cluster::ClusterAssignment;
use crate::presence::PresenceStore;
use crate::sketch::{FracMinHash, ItemHash, ScaledSketch, SketchRecord, write_sketch_records};

pub const UNCLASSIFIED: &str = "unclassified";
pub const UNCLUSTERED: &str = "unclustered";

/// Write a file through `write`, replacing `path` only if every write succeeds.
pub fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)
        .context(format!("Failed to create temporary file in {}", dir.display()))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        write(&mut writer)?;
        writer.flush()?;
    }

    tmp.persist(path)
        .context(format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Dense square matrix in numpy `.npy` format.
pub fn write_npy_matrix<A: ndarray_npy::WritableElement>(path: &Path, matrix: &Array2<A>) -> Result<()> {
    write_atomically(path, |writer| {
        matrix.write_npy(writer)?;
        Ok(())
    })
}

pub fn category_name(rank: Option<PangenomeRank>) -> &'static str {
    rank.map_or(UNCLASSIFIED, PangenomeRank::name)
}

/// `sort_order,label,category` with one row per association matrix row.
pub fn write_labels_csv(path: &Path, matrix: &AssociationMatrix, store: &PresenceStore) -> Result<()> {
    write_atomically(path, |writer| {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(["sort_order", "label", "category"])?;
        for (sort_order, hash) in matrix.hashes.iter().enumerate() {
            csv_writer.write_record([
                sort_order.to_string(),
                hash.to_string(),
                category_name(store.category_of(*hash)).to_string(),
            ])?;
        }
        csv_writer.flush()?;
        Ok(())
    })
}

/// Dense CSV of the association matrix with hashes as the header row.
pub fn write_compare_csv(path: &Path, matrix: &AssociationMatrix) -> Result<()> {
    write_atomically(path, |writer| {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(matrix.hashes.iter().map(|h| h.to_string()))?;
        for row in matrix.similarity.rows() {
            csv_writer.write_record(row.iter().map(|v| v.to_string()))?;
        }
        csv_writer.flush()?;
        Ok(())
    })
}

/// `label,category` for classified hashes, in the order given. Returns rows written.
pub fn write_categories_csv<I>(path: &Path, hashes: I, store: &PresenceStore) -> Result<usize>
where
    I: IntoIterator<Item = ItemHash>,
{
    let mut n_written = 0;
    write_atomically(path, |writer| {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(["label", "category"])?;
        for hash in hashes {
            if let Some(rank) = store.category_of(hash) {
                csv_writer.write_record([hash.to_string(), rank.name().to_string()])?;
                n_written += 1;
            }
        }
        csv_writer.flush()?;
        Ok(())
    })?;

    Ok(n_written)
}

/// `label,category` with a `default` category for every included sample.
pub fn write_sample_categories_csv(path: &Path, samples: &[String]) -> Result<()> {
    write_atomically(path, |writer| {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(["label", "category"])?;
        for sample in samples {
            csv_writer.write_record([sample.as_str(), "default"])?;
        }
        csv_writer.flush()?;
        Ok(())
    })
}

/// One name per line.
pub fn write_name_list(path: &Path, names: &[String]) -> Result<()> {
    write_atomically(path, |writer| {
        for name in names {
            writeln!(writer, "{name}")?;
        }
        Ok(())
    })
}

/// Ranktable `hashval,pangenome_classification` with integer ranks.
pub fn write_ranktable_csv(path: &Path, categories: &BTreeMap<ItemHash, PangenomeRank>) -> Result<()> {
    write_atomically(path, |writer| {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(["hashval", "pangenome_classification"])?;
        for (hash, rank) in categories {
            csv_writer.write_record([hash.to_string(), rank.rank().to_string()])?;
        }
        csv_writer.flush()?;
        Ok(())
    })
}

/// Sparse `query_name,match_name,presence` rows, one per observed (sample, hash) pair.
pub fn write_presence_csv(path: &Path, store: &PresenceStore) -> Result<usize> {
    let mut n_written = 0;
    write_atomically(path, |writer| {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(["query_name", "match_name", "presence"])?;
        for (hash, samples) in store.presence() {
            let hash = hash.to_string();
            for sample in samples {
                csv_writer.write_record([sample.as_str(), hash.as_str(), "1"])?;
                n_written += 1;
            }
        }
        csv_writer.flush()?;
        Ok(())
    })?;

    Ok(n_written)
}

/// Dense presence matrix as `.npy`, with row and column labels alongside.
pub fn write_presence_matrix(path: &Path, matrix: &PresenceMatrix) -> Result<()> {
    write_npy_matrix(path, &matrix.presence)?;

    let rows_path = with_suffix(path, ".rows.txt");
    write_atomically(&rows_path, |writer| {
        for sample in &matrix.samples {
            writeln!(writer, "{sample}")?;
        }
        Ok(())
    })?;

    let cols_path = with_suffix(path, ".cols.txt");
    write_atomically(&cols_path, |writer| {
        for hash in &matrix.hashes {
            writeln!(writer, "{hash}")?;
        }
        Ok(())
    })
}

/// `label,category[,cluster]` with `cluster {id}` or `unclustered` per hash.
pub fn write_cluster_categories_csv(
    path: &Path,
    assignment: &ClusterAssignment,
    with_cluster_column: bool,
) -> Result<()> {
    write_atomically(path, |writer| {
        let mut csv_writer = csv::Writer::from_writer(writer);
        if with_cluster_column {
            csv_writer.write_record(["label", "category", "cluster"])?;
        } else {
            csv_writer.write_record(["label", "category"])?;
        }

        for (hash, cluster) in assignment.labelled_hashes() {
            let category = match cluster {
                Some(id) => format!("cluster {id}"),
                None => UNCLUSTERED.to_string(),
            };

            if with_cluster_column {
                let id = cluster.map_or(-1, |id| id as i64);
                csv_writer.write_record([hash.to_string(), category, id.to_string()])?;
            } else {
                csv_writer.write_record([hash.to_string(), category])?;
            }
        }
        csv_writer.flush()?;
        Ok(())
    })
}

/// One sketch file per cluster, `<prefix>.cluster_<n>.sig.json`.
pub fn write_cluster_sketches(
    prefix: &str,
    assignment: &ClusterAssignment,
    store: &PresenceStore,
) -> Result<Vec<PathBuf>> {
    let template = FracMinHash::new(store.k_size(), store.scaled());

    let mut paths = Vec::with_capacity(assignment.num_clusters());
    for (cluster_n, members) in assignment.clusters.iter().enumerate() {
        let mut sketch = template.copy_and_clear();
        sketch.add_many(members.iter().copied());

        let name = format!("cluster_{cluster_n}");
        let path = PathBuf::from(format!("{prefix}.{name}.sig.json"));
        let records = [SketchRecord::from_sketch(&name, &sketch)];
        write_atomically(&path, |writer| write_sketch_records(writer, &records))?;
        paths.push(path);
    }

    Ok(paths)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Path of the labels CSV written alongside an association matrix.
pub fn labels_path(matrix_path: &Path) -> PathBuf {
    with_suffix(matrix_path, ".labels.csv")
}

/// Path of the dense presence matrix written alongside a presence CSV.
pub fn dense_matrix_path(presence_path: &Path) -> PathBuf {
    with_suffix(presence_path, ".matrix.npy")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::{build_association_matrix, build_presence_matrix};
    use crate::presence::CategoryMap;
    use crate::presence::tests::store_from;
    use crate::sketch::load_sketch_file;
    use std::collections::BTreeSet;
    use std::fs::read_to_string;
    use tempfile::tempdir;

    fn classified_store() -> PresenceStore {
        store_from(&[(10, &["a", "b"]), (20, &["a"]), (30, &["a", "b", "c"])])
            .with_categories(CategoryMap::from([
                (10, PangenomeRank::Shell),
                (30, PangenomeRank::CentralCore),
            ]))
            .unwrap()
    }

    #[test]
    fn test_labels_and_categories_csv() {
        let dir = tempdir().unwrap();
        let store = classified_store();
        let matrix = build_association_matrix(&store).unwrap();

        let labels = labels_path(&dir.path().join("assoc.npy"));
        assert!(labels.to_string_lossy().ends_with("assoc.npy.labels.csv"));
        write_labels_csv(&labels, &matrix, &store).unwrap();
        assert_eq!(
            read_to_string(&labels).unwrap(),
            "sort_order,label,category\n0,10,shell\n1,20,unclassified\n2,30,central core\n"
        );

        let categories = dir.path().join("categories.csv");
        let n = write_categories_csv(&categories, store.hashes(), &store).unwrap();
        assert_eq!(n, 2);
        assert_eq!(
            read_to_string(&categories).unwrap(),
            "label,category\n10,shell\n30,central core\n"
        );
    }

    #[test]
    fn test_presence_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("presence.csv");
        let n = write_presence_csv(&path, &classified_store()).unwrap();

        assert_eq!(n, 6);
        let text = read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("query_name,match_name,presence"));
        assert_eq!(lines.next(), Some("a,10,1"));
        assert_eq!(lines.next(), Some("b,10,1"));
        assert!(text.lines().skip(1).all(|l| l.ends_with(",1")));
    }

    #[test]
    fn test_sample_categories_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("samples.csv");
        write_sample_categories_csv(&path, &["s1".to_string(), "s2".to_string()]).unwrap();
        assert_eq!(read_to_string(&path).unwrap(), "label,category\ns1,default\ns2,default\n");
    }

    #[test]
    fn test_ranktable_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ranks.csv");
        write_ranktable_csv(&path, classified_store().categories()).unwrap();
        assert_eq!(
            read_to_string(&path).unwrap(),
            "hashval,pangenome_classification\n10,3\n30,1\n"
        );
    }

    #[test]
    fn test_compare_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("compare.csv");
        let store = store_from(&[(1, &["a"]), (2, &["a", "b"])]);
        write_compare_csv(&path, &build_association_matrix(&store).unwrap()).unwrap();
        assert_eq!(read_to_string(&path).unwrap(), "1,2\n1,0.5\n0.5,1\n");
    }

    #[test]
    fn test_cluster_categories_csv() {
        let dir = tempdir().unwrap();
        let assignment = ClusterAssignment {
            clusters: vec![BTreeSet::from([1, 2]), BTreeSet::from([5])],
            unclustered: BTreeSet::from([9]),
        };

        let path = dir.path().join("clusters.csv");
        write_cluster_categories_csv(&path, &assignment, false).unwrap();
        assert_eq!(
            read_to_string(&path).unwrap(),
            "label,category\n1,cluster 0\n2,cluster 0\n5,cluster 1\n9,unclustered\n"
        );

        write_cluster_categories_csv(&path, &assignment, true).unwrap();
        let text = read_to_string(&path).unwrap();
        assert!(text.starts_with("label,category,cluster\n1,cluster 0,0\n"));
        assert!(text.ends_with("9,unclustered,-1\n"));
    }

    #[test]
    fn test_all_unclustered_csv() {
        let dir = tempdir().unwrap();
        let assignment = ClusterAssignment {
            clusters: vec![],
            unclustered: BTreeSet::from([10, 20, 30]),
        };
        let path = dir.path().join("clusters.csv");
        write_cluster_categories_csv(&path, &assignment, false).unwrap();
        assert_eq!(
            read_to_string(&path).unwrap(),
            "label,category\n10,unclustered\n20,unclustered\n30,unclustered\n"
        );
    }

    #[test]
    fn test_cluster_sketches() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("store.bin").to_string_lossy().to_string();
        let store = classified_store();
        let assignment = ClusterAssignment {
            clusters: vec![BTreeSet::from([10, 30]), BTreeSet::from([20])],
            unclustered: BTreeSet::new(),
        };

        let paths = write_cluster_sketches(&prefix, &assignment, &store).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths[1].to_string_lossy().ends_with("store.bin.cluster_1.sig.json"));

        let records = load_sketch_file(&paths[0]).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "cluster_0");
        assert_eq!(records[0].ksize, 21);
        assert_eq!(records[0].scaled, 1);
        assert_eq!(records[0].hashes, vec![10, 30]);
    }

    #[test]
    fn test_npy_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("assoc.npy");
        let matrix = build_association_matrix(&classified_store()).unwrap();
        write_npy_matrix(&path, &matrix.similarity).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..6], b"\x93NUMPY");
        // 9 f64 values follow the header
        assert!(bytes.len() > 9 * 8);

        let presence_path = dense_matrix_path(&dir.path().join("presence.csv"));
        write_presence_matrix(&presence_path, &build_presence_matrix(&classified_store())).unwrap();
        assert_eq!(
            read_to_string(dir.path().join("presence.csv.matrix.npy.rows.txt")).unwrap(),
            "a\nb\nc\n"
        );
    }

    #[test]
    fn test_name_list() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keep.txt");
        write_name_list(&path, &["SRR1".to_string(), "SRR2".to_string()]).unwrap();
        assert_eq!(read_to_string(&path).unwrap(), "SRR1\nSRR2\n");

        write_name_list(&path, &[]).unwrap();
        assert_eq!(read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_failed_write_leaves_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.csv");
        let result = write_atomically(&path, |writer| {
            writer.write_all(b"half")?;
            anyhow::bail!("interrupted")
        });
        assert!(result.is_err());
        assert!(!path.exists());
    }
}
