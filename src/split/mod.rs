//! Label-stratified train/val/test splitting of staged files.
//!
//! Label files are the ground truth: each file contributes the set of class
//! ids it mentions. A class that occurs in exactly one file cannot be
//! stratified, in which case the splitter returns
//! [`SplitOutcome::Infeasible`] and the caller falls back to a flat,
//! unsplit dataset.
//!
//! Splitting happens in two stages: `test%` is split off everything, then
//! the remainder is divided into val and train with `val% / (100 - test%)`.
//! Each stage shuffles every stratum with a seeded RNG and slices it
//! proportionally, so a given seed always yields the same partition.

mod report;

pub use report::{BucketSummary, SplitReport};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use walkdir::WalkDir;

use crate::error::YololabelError;
use crate::image_io::{has_extension, list_source_images};
use crate::label::{parse_label_file, ClassId};
use crate::staging::LABEL_EXTENSION;

/// Seed used when the caller does not pick one.
pub const DEFAULT_SEED: u64 = 42;

/// Train/val/test percentages summing to exactly 100.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SplitPercentages {
    train: u32,
    val: u32,
    test: u32,
}

impl SplitPercentages {
    /// Validates and builds the percentages. Nothing touches the disk before this.
    pub fn new(train: u32, val: u32, test: u32) -> Result<Self, YololabelError> {
        let in_range = train <= 100 && val <= 100 && test <= 100;
        if !in_range || train + val + test != 100 {
            return Err(YololabelError::PercentageMismatch { train, val, test });
        }
        Ok(Self { train, val, test })
    }

    pub fn train(&self) -> u32 {
        self.train
    }

    pub fn val(&self) -> u32 {
        self.val
    }

    pub fn test(&self) -> u32 {
        self.test
    }
}

impl Default for SplitPercentages {
    fn default() -> Self {
        Self {
            train: 70,
            val: 15,
            test: 15,
        }
    }
}

impl fmt::Display for SplitPercentages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.train, self.val, self.test)
    }
}

/// One of the three output subsets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Train,
    Val,
    Test,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [Bucket::Train, Bucket::Val, Bucket::Test];

    /// Directory name of the bucket in the dataset layout.
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Train => "train",
            Bucket::Val => "val",
            Bucket::Test => "test",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An image and the label file sharing its stem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedPair {
    pub stem: String,
    pub image: PathBuf,
    pub label: PathBuf,
}

/// Which stage of the split detected the unsplittable class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitStage {
    /// Splitting test off the whole set.
    Test,
    /// Dividing the remainder into val and train.
    Validation,
}

/// Why a stratified split could not be produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Infeasible {
    pub class_id: ClassId,
    pub stage: SplitStage,
}

impl fmt::Display for Infeasible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            SplitStage::Test => write!(
                f,
                "class {} appears in only one labelled file; stratified splitting is impossible",
                self.class_id
            ),
            SplitStage::Validation => write!(
                f,
                "class {} is left in only one file after the test split; val/train cannot be stratified",
                self.class_id
            ),
        }
    }
}

/// Indices into the input file list, one vector per bucket.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SplitPlan {
    pub train: Vec<usize>,
    pub val: Vec<usize>,
    pub test: Vec<usize>,
}

impl SplitPlan {
    pub fn bucket(&self, bucket: Bucket) -> &[usize] {
        match bucket {
            Bucket::Train => &self.train,
            Bucket::Val => &self.val,
            Bucket::Test => &self.test,
        }
    }

    pub fn len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Staged pairs assigned to buckets.
#[derive(Clone, Debug)]
pub struct Partition {
    pub train: Vec<StagedPair>,
    pub val: Vec<StagedPair>,
    pub test: Vec<StagedPair>,
    pub report: SplitReport,
}

impl Partition {
    pub fn bucket(&self, bucket: Bucket) -> &[StagedPair] {
        match bucket {
            Bucket::Train => &self.train,
            Bucket::Val => &self.val,
            Bucket::Test => &self.test,
        }
    }

    /// Every pair with the bucket it was assigned to.
    pub fn iter(&self) -> impl Iterator<Item = (Bucket, &StagedPair)> {
        Bucket::ALL
            .into_iter()
            .flat_map(move |bucket| self.bucket(bucket).iter().map(move |pair| (bucket, pair)))
    }

    pub fn len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of one splitter invocation.
#[derive(Clone, Debug)]
pub enum SplitOutcome {
    Split(Partition),
    /// No partition; `pairs` holds every staged pair for the flat fallback.
    Infeasible {
        reason: Infeasible,
        pairs: Vec<StagedPair>,
    },
}

/// Split tuning beyond the percentages.
#[derive(Clone, Copy, Debug)]
pub struct SplitOptions {
    pub seed: u64,
    /// Report a class left with a single file after the test split as
    /// infeasible instead of keeping that file in train.
    pub strict_second_stage: bool,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            strict_second_stage: false,
        }
    }
}

/// Computes stratified partitions of staged image/label pairs.
#[derive(Clone, Copy, Debug)]
pub struct DatasetSplitter {
    percentages: SplitPercentages,
    options: SplitOptions,
}

impl DatasetSplitter {
    pub fn new(percentages: SplitPercentages, options: SplitOptions) -> Self {
        Self {
            percentages,
            options,
        }
    }

    /// Pairs the staged files, reads their classes and plans the split.
    ///
    /// Errors (unpaired files, unreadable labels) are raised before the
    /// caller moves anything.
    pub fn split(
        &self,
        images: &[PathBuf],
        labels: &[PathBuf],
    ) -> Result<SplitOutcome, YololabelError> {
        let pairs = pair_staged_files(images, labels)?;
        let files = pairs
            .iter()
            .map(|pair| read_label_classes(&pair.label))
            .collect::<Result<Vec<_>, _>>()?;

        match plan_split(&files, self.percentages, self.options) {
            Ok(plan) => {
                let report = SplitReport::from_plan(&plan, &files, self.percentages, self.options.seed);
                let take = |indices: &[usize]| -> Vec<StagedPair> {
                    indices.iter().map(|&i| pairs[i].clone()).collect()
                };
                log::info!(
                    "stratified split: {} train, {} val, {} test",
                    plan.train.len(),
                    plan.val.len(),
                    plan.test.len()
                );
                Ok(SplitOutcome::Split(Partition {
                    train: take(&plan.train),
                    val: take(&plan.val),
                    test: take(&plan.test),
                    report,
                }))
            }
            Err(reason) => {
                log::warn!("{}", reason);
                Ok(SplitOutcome::Infeasible { reason, pairs })
            }
        }
    }
}

/// Plans a split over in-memory class lists (one entry per file, distinct
/// classes in encounter order).
pub fn plan_split(
    files: &[Vec<ClassId>],
    percentages: SplitPercentages,
    options: SplitOptions,
) -> Result<SplitPlan, Infeasible> {
    let all: Vec<usize> = (0..files.len()).collect();

    let frequency = class_frequencies(files, &all);
    if let Some(class_id) = singleton_class(&frequency) {
        return Err(Infeasible {
            class_id,
            stage: SplitStage::Test,
        });
    }

    let strata: Vec<Option<ClassId>> = files
        .iter()
        .map(|classes| representative_label(classes, &frequency))
        .collect();

    let mut rng = StdRng::seed_from_u64(options.seed);

    let test_target = proportional_count(all.len(), percentages.test, 100);
    let (mut test, rest) = stratified_take(&all, &strata, test_target, &mut rng);

    let val_share = percentages.val;
    let remainder_share = 100 - percentages.test;
    let (mut val, mut train) = if val_share == 0 || rest.is_empty() {
        (Vec::new(), rest)
    } else if val_share == remainder_share {
        (rest, Vec::new())
    } else {
        let rest_frequency = class_frequencies(files, &rest);
        let singles: BTreeSet<ClassId> = rest_frequency
            .iter()
            .filter(|(_, count)| **count == 1)
            .map(|(class_id, _)| *class_id)
            .collect();

        if options.strict_second_stage {
            if let Some(&class_id) = singles.iter().next() {
                return Err(Infeasible {
                    class_id,
                    stage: SplitStage::Validation,
                });
            }
        }

        // A class reduced to one file already has its other occurrences in
        // test; keep the last one in train.
        let (pinned, free): (Vec<usize>, Vec<usize>) = rest
            .iter()
            .copied()
            .partition(|&i| files[i].iter().any(|class_id| singles.contains(class_id)));

        let val_target =
            proportional_count(rest.len(), val_share, remainder_share).min(free.len());
        let (val, mut train) = stratified_take(&free, &strata, val_target, &mut rng);
        train.extend(pinned);
        (val, train)
    };

    train.sort_unstable();
    val.sort_unstable();
    test.sort_unstable();

    Ok(SplitPlan { train, val, test })
}

/// Per-class count of files containing the class at least once.
fn class_frequencies(files: &[Vec<ClassId>], members: &[usize]) -> BTreeMap<ClassId, usize> {
    let mut frequency = BTreeMap::new();
    for &i in members {
        let distinct: BTreeSet<ClassId> = files[i].iter().copied().collect();
        for class_id in distinct {
            *frequency.entry(class_id).or_insert(0) += 1;
        }
    }
    frequency
}

fn singleton_class(frequency: &BTreeMap<ClassId, usize>) -> Option<ClassId> {
    frequency
        .iter()
        .find(|(_, count)| **count == 1)
        .map(|(class_id, _)| *class_id)
}

/// The rarest class of a file, ties going to the first one written.
/// Files without boxes get `None`, their own background stratum.
fn representative_label(
    classes: &[ClassId],
    frequency: &BTreeMap<ClassId, usize>,
) -> Option<ClassId> {
    classes
        .iter()
        .min_by_key(|class_id| frequency.get(class_id).copied().unwrap_or(0))
        .copied()
}

/// `round(total * numerator / denominator)` in integer arithmetic.
fn proportional_count(total: usize, numerator: u32, denominator: u32) -> usize {
    if denominator == 0 {
        return 0;
    }
    let numerator = numerator as usize;
    let denominator = denominator as usize;
    (total * numerator + denominator / 2) / denominator
}

/// Draws `target` members, spread over strata in proportion to their size.
///
/// Each stratum gets the floor of its exact share; the leftover slots go to
/// the strata with the largest fractional remainders. Returns
/// `(taken, kept)`.
fn stratified_take(
    members: &[usize],
    strata: &[Option<ClassId>],
    target: usize,
    rng: &mut StdRng,
) -> (Vec<usize>, Vec<usize>) {
    if target == 0 {
        return (Vec::new(), members.to_vec());
    }
    if target >= members.len() {
        return (members.to_vec(), Vec::new());
    }

    let mut groups: BTreeMap<Option<ClassId>, Vec<usize>> = BTreeMap::new();
    for &i in members {
        groups.entry(strata[i]).or_default().push(i);
    }

    let total = members.len();
    let mut quotas: Vec<(usize, usize)> = Vec::with_capacity(groups.len());
    let mut assigned = 0;
    for group in groups.values() {
        let exact = group.len() * target;
        let quota = exact / total;
        quotas.push((quota, exact % total));
        assigned += quota;
    }

    let mut order: Vec<usize> = (0..quotas.len()).collect();
    order.sort_by(|&a, &b| quotas[b].1.cmp(&quotas[a].1).then(a.cmp(&b)));
    let sizes: Vec<usize> = groups.values().map(Vec::len).collect();
    for g in order {
        if assigned == target {
            break;
        }
        if quotas[g].0 < sizes[g] {
            quotas[g].0 += 1;
            assigned += 1;
        }
    }

    let mut taken = Vec::with_capacity(target);
    let mut kept = Vec::with_capacity(total - target);
    for (mut group, (quota, _)) in groups.into_values().zip(quotas) {
        group.shuffle(rng);
        let rest = group.split_off(quota);
        taken.extend(group);
        kept.extend(rest);
    }

    (taken, kept)
}

/// Reads the distinct class ids of a label file in encounter order.
pub fn read_label_classes(path: &Path) -> Result<Vec<ClassId>, YololabelError> {
    let content = fs::read_to_string(path).map_err(YololabelError::Io)?;
    let records = parse_label_file(&content, path)?;

    let mut classes = Vec::new();
    for record in records {
        if !classes.contains(&record.class_id) {
            classes.push(record.class_id);
        }
    }
    Ok(classes)
}

/// Lists the images and label files of a flat `images/` + `labels/` folder.
pub fn collect_flat_dataset(root: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>), YololabelError> {
    let images = list_source_images(&root.join("images"))?;

    let labels_dir = root.join("labels");
    let mut labels = Vec::new();
    for entry in WalkDir::new(&labels_dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|source| {
            YololabelError::Io(
                source
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory traversal failed")),
            )
        })?;
        if entry.file_type().is_file() && has_extension(entry.path(), &[LABEL_EXTENSION]) {
            labels.push(entry.into_path());
        }
    }
    labels.sort();

    Ok((images, labels))
}

/// Matches image files to label files by stem.
pub fn pair_staged_files(
    images: &[PathBuf],
    labels: &[PathBuf],
) -> Result<Vec<StagedPair>, YololabelError> {
    let mut labels_by_stem: HashMap<String, &PathBuf> = HashMap::new();
    for label in labels {
        let stem = stem_of(label);
        if let Some(previous) = labels_by_stem.insert(stem.clone(), label) {
            return Err(YololabelError::DuplicateStem {
                stem,
                first: previous.clone(),
                second: label.clone(),
            });
        }
    }

    let mut seen_images: HashMap<String, &PathBuf> = HashMap::new();
    let mut pairs = Vec::with_capacity(images.len());
    for image in images {
        let stem = stem_of(image);
        if let Some(previous) = seen_images.insert(stem.clone(), image) {
            return Err(YololabelError::DuplicateStem {
                stem,
                first: previous.clone(),
                second: image.clone(),
            });
        }

        let label = labels_by_stem
            .remove(&stem)
            .ok_or_else(|| YololabelError::UnpairedFile {
                path: image.clone(),
                missing: "label",
            })?;

        pairs.push(StagedPair {
            stem,
            image: image.clone(),
            label: label.clone(),
        });
    }

    if let Some(orphan) = labels_by_stem.into_values().min() {
        return Err(YololabelError::UnpairedFile {
            path: orphan.clone(),
            missing: "image",
        });
    }

    pairs.sort_by(|a, b| a.stem.cmp(&b.stem));
    Ok(pairs)
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
