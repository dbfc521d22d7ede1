mod common;

use std::fs;
use std::path::{Path, PathBuf};

use common::{file_names, image_folder, label_classes, write_file, CAT_DOG_TAXONOMY};
use yololabel::image_io::Resolution;
use yololabel::label::{BoundingBox, LabelTaxonomy};
use yololabel::session::{
    Advance, AnnotationSession, DatasetConfig, DatasetOutcome, SessionConfig, SessionState,
    SessionSummary,
};
use yololabel::split::{SplitPercentages, SplitStage};
use yololabel::staging::STAGING_MARKER;
use yololabel::YololabelError;

fn taxonomy() -> LabelTaxonomy {
    LabelTaxonomy::from_json_str(CAT_DOG_TAXONOMY).expect("parse taxonomy")
}

fn small() -> Resolution {
    Resolution::new(64, 48).expect("resolution")
}

fn dataset_config(dest: &Path, train: u32, val: u32, test: u32) -> SessionConfig {
    SessionConfig {
        resolution: small(),
        dataset: Some(DatasetConfig::new(
            dest,
            SplitPercentages::new(train, val, test).expect("percentages"),
        )),
    }
}

/// Annotates each image with one box of the given class (or none), then
/// returns the summary produced by the last advance.
fn annotate_all(session: &mut AnnotationSession, classes: &[Option<u32>]) -> SessionSummary {
    for (i, class) in classes.iter().enumerate() {
        if let Some(class) = class {
            session
                .record_box(BoundingBox::from_corners(4, 4, 40, 30, *class))
                .expect("record box");
        }
        match session.advance().expect("advance") {
            Advance::Next(_) => assert!(i + 1 < classes.len()),
            Advance::Finished(summary) => {
                assert_eq!(i + 1, classes.len());
                return summary;
            }
        }
    }
    panic!("session never finished");
}

fn bucket_files(dest: &Path, bucket: &str) -> (Vec<String>, Vec<String>) {
    (
        file_names(&dest.join(bucket).join("images")),
        file_names(&dest.join(bucket).join("labels")),
    )
}

#[test]
fn cat_dog_dataset_is_split_and_staging_removed() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let images = image_folder(
        temp.path(),
        "raw",
        &["cat1.bmp", "cat2.bmp", "dog1.bmp", "dog2.bmp"],
    );
    let dest = temp.path().join("dataset");

    let mut session =
        AnnotationSession::new(images, taxonomy(), dataset_config(&dest, 50, 25, 25))
            .expect("session");
    assert!(session.is_dataset_mode());
    let summary = annotate_all(&mut session, &[Some(0), Some(0), Some(1), Some(1)]);
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(summary.annotated, 4);
    assert_eq!(summary.boxes, 4);

    let DatasetOutcome::Split {
        report, manifest, ..
    } = &summary.outcome
    else {
        panic!("expected a stratified split, got {:?}", summary.outcome);
    };
    assert_eq!(report.total_files(), 4);
    assert_eq!(
        (report.train.files, report.val.files, report.test.files),
        (2, 1, 1)
    );

    let mut total = 0;
    for bucket in ["train", "val", "test"] {
        let (images, labels) = bucket_files(&dest, bucket);
        assert_eq!(images.len(), labels.len());
        total += images.len();
    }
    assert_eq!(total, 4);

    let (train_images, train_labels) = bucket_files(&dest, "train");
    assert!(!train_images.is_empty());
    let mut train_classes: Vec<u32> = train_labels
        .iter()
        .flat_map(|name| label_classes(&dest.join("train/labels").join(name)))
        .collect();
    train_classes.sort_unstable();
    train_classes.dedup();
    assert_eq!(train_classes, vec![0, 1]);

    let manifest = manifest.as_ref().expect("manifest written");
    let yaml = fs::read_to_string(manifest).expect("read manifest");
    assert!(yaml.contains("train: train/images"));
    assert!(yaml.contains("Cat"));

    assert!(!temp.path().join("raw/tmp").exists());
}

#[test]
fn singleton_class_falls_back_to_flat_dataset() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let images = image_folder(temp.path(), "raw", &["a.bmp", "b.bmp", "c.bmp"]);
    let dest = temp.path().join("dataset");

    let mut session =
        AnnotationSession::new(images, taxonomy(), dataset_config(&dest, 70, 15, 15))
            .expect("session");
    let summary = annotate_all(&mut session, &[Some(0), Some(0), Some(1)]);

    let DatasetOutcome::Fallback { reason, files, .. } = &summary.outcome else {
        panic!("expected the fallback, got {:?}", summary.outcome);
    };
    assert_eq!(reason.class_id.as_u32(), 1);
    assert_eq!(reason.stage, SplitStage::Test);
    assert_eq!(*files, 3);

    assert_eq!(file_names(&dest.join("images")), ["a.bmp", "b.bmp", "c.bmp"]);
    assert_eq!(file_names(&dest.join("labels")), ["a.txt", "b.txt", "c.txt"]);
    assert!(!dest.join("train").exists());
    assert!(!dest.join("dataset.yaml").exists());
    assert!(!temp.path().join("raw/tmp").exists());
}

#[test]
fn discarded_images_are_never_staged() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let images = image_folder(
        temp.path(),
        "raw",
        &["a.bmp", "b.bmp", "bad.bmp", "c.bmp", "d.bmp"],
    );
    let dest = temp.path().join("dataset");

    let mut session =
        AnnotationSession::new(images, taxonomy(), dataset_config(&dest, 50, 0, 50))
            .expect("session");
    for (name, class) in [("a", 0), ("b", 0)] {
        assert!(session.current_image().unwrap().ends_with(format!("{name}.bmp")));
        session
            .record_box(BoundingBox::from_corners(1, 1, 20, 20, class))
            .unwrap();
        session.advance().unwrap();
    }
    session
        .record_box(BoundingBox::from_corners(1, 1, 20, 20, 1))
        .unwrap();
    session.discard_current().unwrap();
    session
        .record_box(BoundingBox::from_corners(1, 1, 20, 20, 1))
        .unwrap();
    session.advance().unwrap();
    session
        .record_box(BoundingBox::from_corners(1, 1, 20, 20, 1))
        .unwrap();
    let Advance::Finished(summary) = session.advance().unwrap() else {
        panic!("expected the session to finish");
    };
    assert_eq!(summary.discarded, 1);
    assert_eq!(summary.annotated, 4);
    assert!(matches!(summary.outcome, DatasetOutcome::Split { .. }));

    let mut all_images = Vec::new();
    for bucket in ["train", "val", "test"] {
        all_images.extend(bucket_files(&dest, bucket).0);
    }
    all_images.sort();
    assert_eq!(all_images, ["a.bmp", "b.bmp", "c.bmp", "d.bmp"]);
    assert!(bucket_files(&dest, "val").0.is_empty());
}

#[test]
fn advance_after_close_is_rejected() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let images = image_folder(temp.path(), "raw", &["a.bmp", "b.bmp"]);
    let dest = temp.path().join("dataset");

    let mut session =
        AnnotationSession::new(images, taxonomy(), dataset_config(&dest, 50, 0, 50))
            .expect("session");
    annotate_all(&mut session, &[Some(0), Some(0)]);

    let before = file_names(&dest.join("train/images"));
    assert!(matches!(session.advance(), Err(YololabelError::SessionClosed)));
    assert!(matches!(
        session.discard_current(),
        Err(YololabelError::SessionClosed)
    ));
    assert_eq!(file_names(&dest.join("train/images")), before);
}

#[test]
fn stale_staging_from_an_earlier_run_is_cleared() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let images = image_folder(temp.path(), "raw", &["a.bmp", "b.bmp"]);
    common::write_bmp(&temp.path().join("raw/tmp/images/ghost.bmp"), 8, 8);
    write_file(&temp.path().join("raw/tmp/labels/ghost.txt"), "1 0.5 0.5 0.1 0.1\n");
    write_file(&temp.path().join("raw/tmp").join(STAGING_MARKER), "");
    let dest = temp.path().join("dataset");

    let mut session =
        AnnotationSession::new(images, taxonomy(), dataset_config(&dest, 50, 0, 50))
            .expect("session");
    let summary = annotate_all(&mut session, &[Some(0), Some(0)]);

    assert!(matches!(summary.outcome, DatasetOutcome::Split { .. }));
    for bucket in ["train", "val", "test"] {
        assert!(!bucket_files(&dest, bucket).0.contains(&"ghost.bmp".to_string()));
    }
    assert!(!temp.path().join("raw/tmp").exists());
}

#[test]
fn user_files_in_the_staging_folder_survive_a_session() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let images = image_folder(
        temp.path(),
        "raw",
        &["cat1.bmp", "cat2.bmp", "dog1.bmp", "dog2.bmp"],
    );
    let notes = temp.path().join("raw/tmp/notes.txt");
    write_file(&notes, "shopping list\n");
    let dest = temp.path().join("dataset");

    let mut session =
        AnnotationSession::new(images, taxonomy(), dataset_config(&dest, 50, 25, 25))
            .expect("session");
    let summary = annotate_all(&mut session, &[Some(0), Some(0), Some(1), Some(1)]);

    let DatasetOutcome::Split { report, .. } = &summary.outcome else {
        panic!("expected a stratified split, got {:?}", summary.outcome);
    };
    assert_eq!(report.total_files(), 4);
    assert_eq!(fs::read_to_string(&notes).unwrap(), "shopping list\n");
    assert_eq!(file_names(&temp.path().join("raw/tmp")), vec!["notes.txt".to_string()]);
}

#[test]
fn unmarked_staging_content_is_refused_untouched() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let images = image_folder(temp.path(), "raw", &["a.bmp"]);
    let holiday = temp.path().join("raw/tmp/images/holiday.bmp");
    common::write_bmp(&holiday, 8, 8);
    let dest = temp.path().join("dataset");

    let err = AnnotationSession::new(images, taxonomy(), dataset_config(&dest, 50, 0, 50))
        .unwrap_err();
    assert!(matches!(err, YololabelError::StagingIo { .. }));
    assert!(holiday.is_file());
}

#[test]
fn staging_equal_to_destination_is_rejected_up_front() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let images = image_folder(temp.path(), "raw", &["a.bmp", "b.bmp"]);
    let dest = temp.path().join("dataset");
    write_file(&dest.join("train/labels/keep.txt"), "0 0.5 0.5 0.1 0.1\n");

    let mut config = dataset_config(&dest, 50, 0, 50);
    if let Some(dataset) = config.dataset.as_mut() {
        dataset.staging_root = Some(dest.clone());
    }

    let err = AnnotationSession::new(images, taxonomy(), config).unwrap_err();
    assert!(matches!(err, YololabelError::StagingOverlap { .. }));
    assert!(dest.join("train/labels/keep.txt").is_file());
    assert!(!dest.join(STAGING_MARKER).exists());
}

#[test]
fn custom_staging_root_is_used_and_removed() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let images = image_folder(temp.path(), "raw", &["a.bmp", "b.bmp"]);
    let dest = temp.path().join("dataset");
    let staging = temp.path().join("scratch");

    let mut config = dataset_config(&dest, 50, 0, 50);
    if let Some(dataset) = config.dataset.as_mut() {
        dataset.staging_root = Some(staging.clone());
        dataset.write_manifest = false;
    }

    let mut session = AnnotationSession::new(images, taxonomy(), config).expect("session");
    session
        .record_box(BoundingBox::from_corners(1, 1, 20, 20, 0))
        .unwrap();
    session.advance().unwrap();
    assert!(staging.join("images/a.bmp").is_file());
    assert!(staging.join("labels/a.txt").is_file());
    assert!(!temp.path().join("raw/tmp").exists());

    session
        .record_box(BoundingBox::from_corners(1, 1, 20, 20, 0))
        .unwrap();
    let Advance::Finished(summary) = session.advance().unwrap() else {
        panic!("expected the session to finish");
    };
    let DatasetOutcome::Split { manifest, .. } = summary.outcome else {
        panic!("expected a split");
    };
    assert!(manifest.is_none());
    assert!(!staging.exists());
}

#[test]
fn non_dataset_mode_saves_next_to_the_source_folder() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let images = image_folder(temp.path(), "raw", &["a.bmp", "b.bmp", "c.bmp"]);
    let config = SessionConfig {
        resolution: small(),
        dataset: None,
    };

    let mut session = AnnotationSession::new(images, taxonomy(), config).expect("session");
    assert!(!session.is_dataset_mode());

    session
        .record_box(BoundingBox::from_corners(16, 12, 48, 36, 1))
        .unwrap();
    session.advance().unwrap();
    session.discard_current().unwrap();
    let Advance::Finished(summary) = session.advance().unwrap() else {
        panic!("expected the session to finish");
    };

    let images_dir = temp.path().join("scaled_images");
    let labels_dir = temp.path().join("labels");
    let DatasetOutcome::Saved {
        images_dir: saved_images,
        labels_dir: saved_labels,
    } = &summary.outcome
    else {
        panic!("expected the permanent save, got {:?}", summary.outcome);
    };
    assert_eq!(saved_images, &images_dir);
    assert_eq!(saved_labels, &labels_dir);

    assert_eq!(file_names(&images_dir), ["a.bmp", "c.bmp"]);
    assert_eq!(file_names(&labels_dir), ["a.txt", "c.txt"]);
    assert_eq!(
        fs::read_to_string(labels_dir.join("a.txt")).unwrap(),
        "1 0.500000 0.500000 0.500000 0.500000\n"
    );
    assert_eq!(fs::read_to_string(labels_dir.join("c.txt")).unwrap(), "");
    assert_eq!(
        image::image_dimensions(images_dir.join("a.bmp")).unwrap(),
        (64, 48)
    );
    assert!(!temp.path().join("raw/tmp").exists());
}

#[test]
fn unreadable_image_can_be_discarded() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let mut images = image_folder(temp.path(), "raw", &["a.bmp"]);
    let broken: PathBuf = write_file(&temp.path().join("raw/broken.bmp"), "not an image");
    images.insert(0, broken);

    let mut session = AnnotationSession::new(
        images,
        taxonomy(),
        SessionConfig {
            resolution: small(),
            dataset: None,
        },
    )
    .expect("session");

    assert!(matches!(
        session.advance(),
        Err(YololabelError::Image { .. })
    ));
    assert!(matches!(session.discard_current(), Ok(Advance::Next(_))));
    assert!(matches!(session.advance(), Ok(Advance::Finished(_))));
}
