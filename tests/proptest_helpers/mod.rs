#![allow(dead_code)]

use std::collections::BTreeMap;

use proptest::prelude::*;
use proptest::strategy::BoxedStrategy;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};
use yololabel::label::{BoundingBox, ClassId};
use yololabel::split::SplitPercentages;

/// Tolerance for denormalized coordinates written with six decimals.
pub fn eps_yolo(image_w: u32, image_h: u32) -> f64 {
    image_w.max(image_h) as f64 * 1e-6
}

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

/// Image dimensions from 1x1 up to 4096x4096.
pub fn arb_image_size() -> BoxedStrategy<(u32, u32)> {
    (1u32..=4096, 1u32..=4096).boxed()
}

/// A box with positive area lying inside a `width x height` image.
///
/// Requires `width >= 2` and `height >= 2`.
pub fn arb_bbox_within(width: u32, height: u32, classes: u32) -> BoxedStrategy<BoundingBox> {
    let w = width as i32;
    let h = height as i32;
    (0..w - 1, 0..h - 1, 0..classes.max(1))
        .prop_flat_map(move |(x1, y1, class_id)| {
            (x1 + 1..=w, y1 + 1..=h)
                .prop_map(move |(x2, y2)| BoundingBox::from_corners(x1, y1, x2, y2, class_id))
        })
        .boxed()
}

/// Valid train/val/test percentages.
pub fn arb_percentages() -> BoxedStrategy<SplitPercentages> {
    (0u32..=100)
        .prop_flat_map(|train| (Just(train), 0u32..=(100 - train)))
        .prop_map(|(train, val)| {
            SplitPercentages::new(train, val, 100 - train - val).expect("valid percentages")
        })
        .boxed()
}

/// Per-file distinct class lists; empty lists are background files.
pub fn arb_class_lists(max_files: usize, max_classes: u32) -> BoxedStrategy<Vec<Vec<ClassId>>> {
    prop::collection::vec(
        prop::collection::btree_set(0..max_classes.max(1), 0..=3),
        0..=max_files,
    )
    .prop_map(|files| {
        files
            .into_iter()
            .map(|classes| classes.into_iter().map(ClassId).collect())
            .collect()
    })
    .boxed()
}

/// Like [`arb_class_lists`], but every class appears in at least two files.
pub fn arb_feasible_class_lists(
    max_files: usize,
    max_classes: u32,
) -> BoxedStrategy<Vec<Vec<ClassId>>> {
    arb_class_lists(max_files, max_classes)
        .prop_map(|mut files| {
            let singles: Vec<Vec<ClassId>> = files
                .iter()
                .filter(|classes| {
                    classes
                        .iter()
                        .any(|class_id| class_frequency(&files, *class_id) == 1)
                })
                .cloned()
                .collect();
            files.extend(singles);
            files
        })
        .boxed()
}

pub fn class_frequency(files: &[Vec<ClassId>], class_id: ClassId) -> usize {
    files
        .iter()
        .filter(|classes| classes.contains(&class_id))
        .count()
}

pub fn class_frequencies(files: &[Vec<ClassId>]) -> BTreeMap<ClassId, usize> {
    let mut frequency = BTreeMap::new();
    for classes in files {
        for class_id in classes {
            *frequency.entry(*class_id).or_insert(0) += 1;
        }
    }
    frequency
}
