//! The list of samples to process and their FASTQ files.

use anyhow::{ensure, Context, Result};
use fxhash::FxHashSet;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// One sample: a name and its forward and reverse FASTQ files.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Sample {
    pub sample: String,
    pub forward: PathBuf,
    pub reverse: PathBuf,
}

impl Sample {
    pub fn fastqs(&self) -> [PathBuf; 2] {
        [self.forward.clone(), self.reverse.clone()]
    }
}

/// Read a tab-separated sheet with the header `sample forward reverse`.
/// Lines starting with `#` are ignored. Relative paths are taken relative
/// to the directory holding the sheet.
pub fn read_sample_sheet(path: &Path) -> Result<Vec<Sample>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| path.display().to_string())?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));

    let mut seen = FxHashSet::default();
    let mut samples = Vec::new();
    for (i, record) in reader.deserialize::<Sample>().enumerate() {
        let mut sample =
            record.with_context(|| format!("{}: record {}", path.display(), i + 1))?;
        ensure!(
            !sample.sample.is_empty(),
            "{}: record {} has an empty sample name",
            path.display(),
            i + 1
        );
        ensure!(
            seen.insert(sample.sample.clone()),
            "{}: sample {} is listed more than once",
            path.display(),
            sample.sample
        );
        sample.forward = base.join(&sample.forward);
        sample.reverse = base.join(&sample.reverse);
        samples.push(sample);
    }
    ensure!(!samples.is_empty(), "{} lists no samples", path.display());
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_read_sheet() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("samples.tsv");
        fs::write(
            &path,
            "sample\tforward\treverse\n# control\nS1\tS1_R1.fq.gz\tS1_R2.fq.gz\nS2\t/data/a.fq\t/data/b.fq\n",
        )
        .unwrap();
        let samples = read_sample_sheet(&path).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].sample, "S1");
        assert_eq!(samples[0].forward, dir.path().join("S1_R1.fq.gz"));
        assert_eq!(samples[1].fastqs(), [PathBuf::from("/data/a.fq"), PathBuf::from("/data/b.fq")]);
    }

    #[test]
    fn test_duplicate_and_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("samples.tsv");
        fs::write(&path, "sample\tforward\treverse\nS1\ta\tb\nS1\tc\td\n").unwrap();
        assert!(read_sample_sheet(&path).is_err());
        fs::write(&path, "sample\tforward\treverse\n").unwrap();
        assert!(read_sample_sheet(&path).is_err());
        assert!(read_sample_sheet(&dir.path().join("missing.tsv")).is_err());
    }
}
