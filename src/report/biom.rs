use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::Utc;

use log::info;
use serde::Serialize;

use crate::{
    config::ReportConfig, error::ReportError, record::Record, reference::ReferencePart, Result,
};

use super::ReportWriter;

const FORMAT: &str = "Biological Observation Matrix 1.0.0";
const FORMAT_URL: &str = "http://biom-format.org";

/// UTC creation date of the table
const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Observation counts collected by one worker thread
#[derive(Debug, Default, Clone)]
pub struct BiomSplit {
    counts: HashMap<String, u64>,
}
impl BiomSplit {
    pub fn counts(&self) -> &HashMap<String, u64> {
        &self.counts
    }
}

#[derive(Serialize)]
struct Entry {
    id: String,
    metadata: Option<()>,
}

#[derive(Serialize)]
struct BiomTable<'a> {
    id: Option<&'a str>,
    format: &'a str,
    format_url: &'a str,
    #[serde(rename = "type")]
    table_type: &'a str,
    generated_by: String,
    date: String,
    rows: Vec<Entry>,
    columns: Vec<Entry>,
    matrix_type: &'a str,
    matrix_element_type: &'a str,
    shape: [usize; 2],
    data: Vec<[u64; 3]>,
}

/// BIOM 1.0 observation table of the input sample
///
/// A read is counted once, for the target of its primary (first) alignment, while the
/// reference part holding that alignment is loaded. The table is written by
/// [`merge`](ReportWriter::merge).
pub struct BiomReport {
    path: PathBuf,
    sample_id: String,
    splits: Vec<BiomSplit>,
}
impl BiomReport {
    pub fn open(config: &ReportConfig) -> Result<Self> {
        let mut name = config.aligned_prefix.clone().into_os_string();
        if let Some(pid) = config.pid_suffix() {
            name.push(format!("_{pid}"));
        }
        name.push(".biom");
        let sample_id = config.files[0]
            .file_name()
            .and_then(|name| name.to_str())
            .map_or("sample", |name| name.split('.').next().unwrap_or(name))
            .to_string();
        Ok(Self {
            path: name.into(),
            sample_id,
            splits: vec![BiomSplit::default(); config.num_splits()],
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append<P: ReferencePart>(split: &mut BiomSplit, part: &P, record: &Record) {
        if let Some(primary) = record.hits.first() {
            if primary.is_on(part.index_num(), part.part()) {
                *split
                    .counts
                    .entry(part.target_id(primary.ref_num).to_string())
                    .or_default() += 1;
            }
        }
    }

    /// Sums the counts of the first `num_splits` splits, sorted by target
    fn totals(&self, num_splits: usize) -> BTreeMap<&str, u64> {
        let mut totals = BTreeMap::new();
        for split in &self.splits[..num_splits] {
            for (target, count) in &split.counts {
                *totals.entry(target.as_str()).or_default() += count;
            }
        }
        totals
    }
}
impl ReportWriter for BiomReport {
    type Split = BiomSplit;

    fn name(&self) -> &'static str {
        "biom"
    }

    fn splits_mut(&mut self) -> &mut [BiomSplit] {
        &mut self.splits
    }

    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }

    fn merge(&mut self, num_splits: usize) -> Result<()> {
        if num_splits == 0 || num_splits > self.splits.len() {
            return Err(ReportError::ThreadOutOfRange(num_splits, self.splits.len()).into());
        }
        let totals = self.totals(num_splits);
        let table = BiomTable {
            id: None,
            format: FORMAT,
            format_url: FORMAT_URL,
            table_type: "OTU table",
            generated_by: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            date: Utc::now().format(DATE_FORMAT).to_string(),
            shape: [totals.len(), 1],
            data: totals
                .values()
                .enumerate()
                .map(|(row, &count)| [row as u64, 0, count])
                .collect(),
            rows: totals
                .keys()
                .map(|target| Entry {
                    id: (*target).to_string(),
                    metadata: None,
                })
                .collect(),
            columns: vec![Entry {
                id: self.sample_id.clone(),
                metadata: None,
            }],
            matrix_type: "sparse",
            matrix_element_type: "int",
        };

        let file = File::create(&self.path).map_err(|source| ReportError::Open {
            path: self.path.clone(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &table)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        info!(
            "wrote {} observations to {}",
            totals.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        record::AlignmentHit,
        reference::{InMemoryPart, Target},
    };

    #[test]
    fn test_biom_table() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = ReportConfig::builder()
            .files(["sampleA.fq.gz"])
            .aligned_prefix(dir.path().join("aligned"))
            .threads(2)
            .build()?;
        let part = InMemoryPart::new(
            0,
            0,
            ["t0", "t1"]
                .iter()
                .map(|id| Target {
                    id: (*id).into(),
                    sequence: Vec::new(),
                })
                .collect(),
        );
        let hit = |index_num, ref_num| AlignmentHit {
            index_num,
            ref_num,
            ..AlignmentHit::default()
        };

        let mut report = BiomReport::open(&config)?;
        let mut record = Record::new("r".into(), b"A".to_vec(), Vec::new(), 0, 0);
        for (split, hits) in [
            (0, vec![hit(0, 1)]),
            (1, vec![hit(0, 1), hit(0, 0)]),
            (1, vec![hit(0, 0)]),
            (0, vec![hit(1, 0), hit(0, 0)]),
            (0, vec![]),
        ] {
            record.hits = hits;
            BiomReport::append(&mut report.splits_mut()[split], &part, &record);
        }
        assert_eq!(report.splits_mut()[0].counts().get("t1"), Some(&1));
        assert_eq!(report.splits_mut()[1].counts().len(), 2);
        report.finalize()?;
        report.merge(2)?;

        assert_eq!(report.path(), dir.path().join("aligned.biom"));
        let json: serde_json::Value = serde_json::from_reader(File::open(report.path())?)?;
        assert_eq!(json["format"], FORMAT);
        assert_eq!(json["type"], "OTU table");
        assert_eq!(json["shape"], serde_json::json!([2, 1]));
        assert_eq!(json["rows"][0]["id"], "t0");
        assert_eq!(json["columns"][0]["id"], "sampleA");
        assert_eq!(json["data"], serde_json::json!([[0, 0, 1], [1, 0, 2]]));
        let date = json["date"].as_str().unwrap_or_default();
        assert!(chrono::NaiveDateTime::parse_from_str(date, DATE_FORMAT).is_ok());
        Ok(())
    }
}
