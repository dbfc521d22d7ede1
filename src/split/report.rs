//! Split report: what ended up in each bucket.
//!
//! Mirrors the other report types: a plain serializable struct with a
//! human-readable `Display`.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::{Bucket, SplitPercentages, SplitPlan};
use crate::label::ClassId;

/// File counts of one bucket.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BucketSummary {
    /// Number of image/label pairs.
    pub files: usize,
    /// Files without any box.
    pub background: usize,
    /// Per class, the number of files containing it.
    pub classes: BTreeMap<ClassId, usize>,
}

/// Summary of a stratified split.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SplitReport {
    pub seed: u64,
    pub percentages: SplitPercentages,
    pub train: BucketSummary,
    pub val: BucketSummary,
    pub test: BucketSummary,
}

impl SplitReport {
    pub(crate) fn from_plan(
        plan: &SplitPlan,
        files: &[Vec<ClassId>],
        percentages: SplitPercentages,
        seed: u64,
    ) -> Self {
        let summarize = |indices: &[usize]| {
            let mut summary = BucketSummary {
                files: indices.len(),
                ..Default::default()
            };
            for &i in indices {
                if files[i].is_empty() {
                    summary.background += 1;
                }
                for class_id in &files[i] {
                    *summary.classes.entry(*class_id).or_insert(0) += 1;
                }
            }
            summary
        };

        Self {
            seed,
            percentages,
            train: summarize(plan.bucket(Bucket::Train)),
            val: summarize(plan.bucket(Bucket::Val)),
            test: summarize(plan.bucket(Bucket::Test)),
        }
    }

    pub fn bucket(&self, bucket: Bucket) -> &BucketSummary {
        match bucket {
            Bucket::Train => &self.train,
            Bucket::Val => &self.val,
            Bucket::Test => &self.test,
        }
    }

    pub fn total_files(&self) -> usize {
        self.train.files + self.val.files + self.test.files
    }
}

impl fmt::Display for SplitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Stratified split of {} file(s) ({} train/val/test, seed {}):",
            self.total_files(),
            self.percentages,
            self.seed
        )?;

        for bucket in Bucket::ALL {
            let summary = self.bucket(bucket);
            write!(f, "  {:<5} {:>5} file(s)", bucket.as_str(), summary.files)?;
            if !summary.classes.is_empty() {
                let classes: Vec<String> = summary
                    .classes
                    .iter()
                    .map(|(class_id, count)| format!("{}: {}", class_id, count))
                    .collect();
                write!(f, "  [{}]", classes.join(", "))?;
            }
            if summary.background > 0 {
                write!(f, "  ({} background)", summary.background)?;
            }
            writeln!(f)?;
        }

        Ok(())
    }
}
