mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst};
use std::thread;
use std::time::Duration;

use common::{dataset_file, read, write_jpeg, write_json, write_png, RecordingProgress};
use yoloprep::conversion::run_tasks_on_pool;
use yoloprep::utils::create_io_thread_pool;
use yoloprep::{
    discover_tasks, process_dataset, process_dataset_with_cancel, ClassMap, NoProgress,
    PipelineConfig, PrepError, ProgressSink, SourcePair, Subset, Task, TaskStatus,
};

fn config(sources: Vec<PathBuf>, out: &Path, classes: &[&str]) -> PipelineConfig {
    let mut config = PipelineConfig::new(sources, out.to_path_buf(), classes).unwrap();
    config.train_ratio = 1.0;
    config.val_ratio = 0.0;
    config.seed = Some(42);
    config
}

const RECT_X: &str = r#"{"labels": [{"name": "x", "x1": 10, "y1": 10, "x2": 30, "y2": 20}]}"#;

#[test]
fn test_end_to_end_copy_mode() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_jpeg(&src.path().join("a.jpg"), 100, 50);
    write_json(&src.path().join("a.json"), RECT_X);

    let mut cfg = config(vec![src.path().to_path_buf()], out.path(), &["x"]);
    cfg.process_images = false;
    let report = process_dataset(&cfg, &NoProgress).unwrap();

    assert_eq!(report.stats.total_tasks, 1);
    assert_eq!(report.stats.converted, 1);

    let copied = dataset_file(out.path(), "images", "train", "a.jpg");
    assert_eq!(fs::read(&copied).unwrap(), fs::read(src.path().join("a.jpg")).unwrap());
    assert_eq!(
        read(&dataset_file(out.path(), "labels", "train", "a.txt")),
        "0 0.200000 0.300000 0.200000 0.200000"
    );

    let yaml = read(&out.path().join("data.yaml"));
    assert!(yaml.contains("train: images/train"));
    assert!(yaml.contains("test: images/test"));
    assert!(yaml.contains("0: x"));

    for kind in ["images", "labels"] {
        for subset in ["train", "val", "test"] {
            assert!(out.path().join(kind).join(subset).is_dir());
        }
    }
}

#[test]
fn test_processing_mode_forces_jpeg() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_png(&src.path().join("p.png"), 100, 50);
    write_json(&src.path().join("p.json"), RECT_X);

    let cfg = config(vec![src.path().to_path_buf()], out.path(), &["x"]);
    process_dataset(&cfg, &NoProgress).unwrap();

    let jpg = dataset_file(out.path(), "images", "train", "p.jpg");
    assert!(!dataset_file(out.path(), "images", "train", "p.png").exists());
    let decoded = image::open(&jpg).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (100, 50));
    assert_eq!(
        read(&dataset_file(out.path(), "labels", "train", "p.txt")),
        "0 0.200000 0.300000 0.200000 0.200000"
    );
}

fn run_isolation_scenario(process_images: bool) {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_jpeg(&src.path().join("t1.jpg"), 100, 50);
    fs::write(src.path().join("t2.jpg"), b"definitely not an image").unwrap();
    write_jpeg(&src.path().join("t3.jpg"), 100, 50);
    for name in ["t1", "t2", "t3"] {
        write_json(&src.path().join(format!("{}.json", name)), RECT_X);
    }

    let mut cfg = config(vec![src.path().to_path_buf()], out.path(), &["x"]);
    cfg.process_images = process_images;
    let progress = RecordingProgress::default();
    let report = process_dataset(&cfg, &progress).unwrap();

    assert_eq!(report.stats.total_tasks, 3);
    assert_eq!(report.stats.converted, 2);
    assert_eq!(report.stats.skipped, 1);

    for name in ["t1", "t3"] {
        assert!(dataset_file(out.path(), "images", "train", &format!("{}.jpg", name)).exists());
        assert_eq!(
            read(&dataset_file(out.path(), "labels", "train", &format!("{}.txt", name))),
            "0 0.200000 0.300000 0.200000 0.200000"
        );
    }
    assert!(!dataset_file(out.path(), "images", "train", "t2.jpg").exists());
    assert!(!dataset_file(out.path(), "labels", "train", "t2.txt").exists());

    let skipped = report
        .outcomes
        .iter()
        .find(|o| o.task.image_path.ends_with("t2.jpg"))
        .unwrap();
    assert!(matches!(skipped.status, TaskStatus::Skipped(_)));

    let reports = progress.reports.into_inner().unwrap();
    assert_eq!(reports.len(), 3);
    assert!(reports.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(reports.last(), Some(&(3, 3)));
    assert!(out.path().join("data.yaml").exists());
}

#[test]
fn test_undecodable_image_is_isolated_when_processing() {
    run_isolation_scenario(true);
}

#[test]
fn test_undecodable_image_is_isolated_when_copying() {
    run_isolation_scenario(false);
}

#[test]
fn test_malformed_annotation_keeps_image() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_jpeg(&src.path().join("a.jpg"), 40, 40);
    write_json(&src.path().join("a.json"), "{ broken");

    let mut cfg = config(vec![src.path().to_path_buf()], out.path(), &["x"]);
    cfg.process_images = false;
    let report = process_dataset(&cfg, &NoProgress).unwrap();

    assert_eq!(report.stats.failed, 1);
    assert!(matches!(
        report.outcomes[0].status,
        TaskStatus::Failed(PrepError::AnnotationParse { .. })
    ));
    assert!(dataset_file(out.path(), "images", "train", "a.jpg").exists());
    assert!(!dataset_file(out.path(), "labels", "train", "a.txt").exists());
}

#[test]
fn test_unmatched_labels_still_write_empty_label_file() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_jpeg(&src.path().join("a.jpg"), 40, 40);
    write_json(
        &src.path().join("a.json"),
        r#"{"shapes": [{"label": "other", "points": [[1, 1], [5, 5]]}]}"#,
    );
    write_jpeg(&src.path().join("b.jpg"), 40, 40);

    let mut cfg = config(vec![src.path().to_path_buf()], out.path(), &["x"]);
    cfg.process_images = false;
    let report = process_dataset(&cfg, &NoProgress).unwrap();

    assert_eq!(report.stats.converted, 1);
    assert_eq!(report.stats.image_only, 1);
    assert_eq!(read(&dataset_file(out.path(), "labels", "train", "a.txt")), "");
    assert!(dataset_file(out.path(), "images", "train", "b.jpg").exists());
    assert!(!dataset_file(out.path(), "labels", "train", "b.txt").exists());
}

#[test]
fn test_split_across_subsets_and_sources() {
    let src_a = tempfile::tempdir().unwrap();
    let src_b = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    for i in 0..6 {
        write_jpeg(&src_a.path().join(format!("a{}.jpg", i)), 16, 16);
        write_jpeg(&src_b.path().join(format!("b{}.JPG", i)), 16, 16);
    }
    fs::write(src_a.path().join("notes.txt"), "ignored").unwrap();

    let missing = src_a.path().join("does-not-exist");
    let mut cfg = config(
        vec![src_a.path().to_path_buf(), missing, src_b.path().to_path_buf()],
        out.path(),
        &["x"],
    );
    cfg.process_images = false;
    cfg.train_ratio = 0.5;
    cfg.val_ratio = 0.25;
    let report = process_dataset(&cfg, &NoProgress).unwrap();

    assert_eq!(report.stats.total_tasks, 12);
    let count = |subset: &str| fs::read_dir(out.path().join("images").join(subset)).unwrap().count();
    assert_eq!(count("train"), 6);
    assert_eq!(count("val"), 3);
    assert_eq!(count("test"), 3);
}

#[test]
fn test_discovery_pairs_sibling_json() {
    let src = tempfile::tempdir().unwrap();
    write_jpeg(&src.path().join("img.v2.jpeg"), 8, 8);
    write_png(&src.path().join("b.PNG"), 8, 8);
    fs::create_dir(src.path().join("nested.jpg")).unwrap();

    let pairs = discover_tasks(&[src.path().to_path_buf()]);
    assert_eq!(pairs.len(), 2);
    let jpeg = pairs.iter().find(|p| p.image_path.ends_with("img.v2.jpeg")).unwrap();
    assert_eq!(jpeg.annotation_path, src.path().join("img.v2.json"));
}

#[test]
fn test_no_images_creates_nothing() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let root = out.path().join("dataset");

    let cfg = config(vec![src.path().to_path_buf()], &root, &["x"]);
    let report = process_dataset(&cfg, &NoProgress).unwrap();

    assert!(report.outcomes.is_empty());
    assert!(!root.exists());
}

#[test]
fn test_output_scaffolding_failure_is_fatal() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_jpeg(&src.path().join("a.jpg"), 8, 8);
    let blocker = out.path().join("file");
    fs::write(&blocker, "not a directory").unwrap();

    let cfg = config(vec![src.path().to_path_buf()], &blocker, &["x"]);
    let err = process_dataset(&cfg, &NoProgress).unwrap_err();
    assert!(matches!(err, PrepError::DirectoryCreation { .. }));
    assert!(err.is_fatal());
}

#[test]
fn test_cancelled_run_skips_tasks() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_jpeg(&src.path().join("a.jpg"), 8, 8);
    write_jpeg(&src.path().join("b.jpg"), 8, 8);

    let cfg = config(vec![src.path().to_path_buf()], out.path(), &["x"]);
    let report = process_dataset_with_cancel(&cfg, &NoProgress, &AtomicBool::new(true)).unwrap();

    assert_eq!(report.stats.skipped, 2);
    assert!(report
        .outcomes
        .iter()
        .all(|o| matches!(o.status, TaskStatus::Skipped(PrepError::Cancelled))));
    assert_eq!(fs::read_dir(out.path().join("images/train")).unwrap().count(), 0);
    assert!(out.path().join("data.yaml").exists());
}

#[test]
fn test_clean_removes_previous_output() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_jpeg(&src.path().join("a.jpg"), 8, 8);
    fs::create_dir_all(out.path().join("images/train")).unwrap();
    fs::write(out.path().join("images/train/stale.jpg"), "old").unwrap();

    let mut cfg = config(vec![src.path().to_path_buf()], out.path(), &["x"]);
    cfg.process_images = false;
    cfg.clean_output = true;
    process_dataset(&cfg, &NoProgress).unwrap();

    assert!(!out.path().join("images/train/stale.jpg").exists());
    assert!(out.path().join("images/train/a.jpg").exists());
}

#[test]
fn test_invalid_config_aborts_before_any_output() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_jpeg(&src.path().join("a.jpg"), 8, 8);
    let root = out.path().join("dataset");

    let mut cfg = config(vec![src.path().to_path_buf()], &root, &["x"]);
    cfg.class_map = ClassMap::default();
    let err = process_dataset(&cfg, &NoProgress).unwrap_err();
    assert!(matches!(err, PrepError::Config(_)));
    assert!(err.is_fatal());

    let mut cfg = config(vec![src.path().to_path_buf()], &root, &["x"]);
    cfg.source_dirs.clear();
    assert!(matches!(process_dataset(&cfg, &NoProgress), Err(PrepError::Config(_))));

    assert!(!root.exists());
}

#[test]
fn test_label_write_failure_is_isolated() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    for name in ["a", "b"] {
        write_jpeg(&src.path().join(format!("{}.jpg", name)), 100, 50);
        write_json(&src.path().join(format!("{}.json", name)), RECT_X);
    }
    // A directory where a's label file should go makes that write fail.
    fs::create_dir_all(out.path().join("labels/train/a.txt")).unwrap();

    let mut cfg = config(vec![src.path().to_path_buf()], out.path(), &["x"]);
    cfg.process_images = false;
    let report = process_dataset(&cfg, &NoProgress).unwrap();

    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.converted, 1);
    let index_of = |name: &str| {
        report
            .outcomes
            .iter()
            .position(|o| o.task.image_path.ends_with(name))
            .unwrap()
    };
    let (a, b) = (index_of("a.jpg"), index_of("b.jpg"));
    assert!(matches!(
        report.outcomes[a].status,
        TaskStatus::Failed(PrepError::Write { .. })
    ));
    assert!(matches!(report.outcomes[b].status, TaskStatus::Converted { boxes: 1 }));
    assert_eq!(
        read(&dataset_file(out.path(), "labels", "train", "b.txt")),
        "0 0.200000 0.300000 0.200000 0.200000"
    );
    assert!(out.path().join("data.yaml").exists());
}

fn dummy_tasks(n: usize) -> Vec<Task> {
    (0..n)
        .map(|i| {
            Task::new(
                SourcePair {
                    image_path: PathBuf::from(format!("img{}.jpg", i)),
                    annotation_path: PathBuf::from(format!("img{}.json", i)),
                },
                Subset::Train,
            )
        })
        .collect()
}

#[test]
fn test_panicking_task_fails_alone_within_worker_limit() {
    let workers = 2;
    let pool = create_io_thread_pool(workers).unwrap();
    let tasks = dummy_tasks(12);
    let in_flight = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);
    let progress = RecordingProgress::default();

    let outcomes = run_tasks_on_pool(&tasks, &pool, &progress, |task| {
        let now = in_flight.fetch_add(1, SeqCst) + 1;
        peak.fetch_max(now, SeqCst);
        thread::sleep(Duration::from_millis(10));
        in_flight.fetch_sub(1, SeqCst);
        if task.image_path.ends_with("img5.jpg") {
            panic!("boom on {}", task.image_path.display());
        }
        TaskStatus::ImageOnly
    });

    assert_eq!(outcomes.len(), 12);
    assert!(peak.load(SeqCst) <= workers);
    assert!(peak.load(SeqCst) >= 1);
    for outcome in &outcomes {
        if outcome.task.image_path.ends_with("img5.jpg") {
            match &outcome.status {
                TaskStatus::Failed(PrepError::TaskPanicked(msg)) => {
                    assert_eq!(msg, "boom on img5.jpg")
                }
                other => panic!("unexpected status {:?}", other),
            }
        } else {
            assert!(matches!(outcome.status, TaskStatus::ImageOnly));
        }
    }

    let reports = progress.reports.into_inner().unwrap();
    assert_eq!(reports.len(), 12);
    assert_eq!(reports.last(), Some(&(12, 12)));
}

struct PanickingProgress;

impl ProgressSink for PanickingProgress {
    fn report(&self, _completed: usize, _total: usize) {
        panic!("sink failure");
    }
}

#[test]
fn test_panicking_progress_sink_does_not_abort_batch() {
    let pool = create_io_thread_pool(2).unwrap();
    let tasks = dummy_tasks(4);

    let outcomes = run_tasks_on_pool(&tasks, &pool, &PanickingProgress, |_| TaskStatus::ImageOnly);

    assert_eq!(outcomes.len(), 4);
    assert!(outcomes.iter().all(|o| matches!(o.status, TaskStatus::ImageOnly)));
}
