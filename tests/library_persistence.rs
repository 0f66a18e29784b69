/// Template library and vocabulary across consecutive runs
use console_log_analyzer::config::{Config, Context};
use console_log_analyzer::pipeline::Pipeline;
use console_log_analyzer::template_library::{event_id_of, TemplateLibrary};
use console_log_analyzer::vocabulary::{Vocabulary, EMPTY_SLOT, UNKNOWN_EVENT_ID};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const LIB_SIZE: usize = 50;

fn write_log(dir: &Path, name: &str, bodies: &[&str]) -> PathBuf {
    let text: String = bodies
        .iter()
        .enumerate()
        .map(|(i, body)| format!("[20190719-08:58:{:02}.000] {}\n", i, body))
        .collect();
    let path = dir.join(name);
    fs::write(&path, text).unwrap();
    path
}

fn config(dir: &Path, training: bool) -> Config {
    Config::new()
        .with_training(training)
        .with_lib_size(LIB_SIZE)
        .with_data_dir(dir.join("data"))
}

fn vocabulary(dir: &Path) -> Vocabulary {
    Vocabulary::load(&dir.join("data").join("stidle"))
        .unwrap()
        .expect("vocabulary written by training")
}

#[test]
fn test_vocabulary_slots_are_stable() {
    let dir = TempDir::new().unwrap();
    let trainer = Pipeline::new(config(dir.path(), true)).unwrap();

    let first = write_log(dir.path(), "first.log", &["a b 1", "a b 2", "link up on CH1"]);
    trainer.run_file(&first).unwrap();
    let before = vocabulary(dir.path());
    assert_eq!(before.template_count(), 2);

    let second = write_log(dir.path(), "second.log", &["a b 7", "reset cause 9"]);
    let report = trainer.run_file(&second).unwrap();
    println!("{:?}", report);
    assert_eq!(report.new_templates, 1);
    assert_eq!(report.vocabulary_inserted, 1);

    let after = vocabulary(dir.path());
    assert_eq!(after.len(), LIB_SIZE);
    assert_eq!(after.ids()[LIB_SIZE - 1], UNKNOWN_EVENT_ID);
    for (slot, id) in before.ids().iter().enumerate() {
        if id != EMPTY_SLOT {
            assert_eq!(&after.ids()[slot], id, "slot {} moved", slot);
        }
    }
    let reset = after.position(&event_id_of("reset cause <*>")).unwrap();
    assert_eq!(before.ids()[reset], EMPTY_SLOT);

    // previous library and vocabulary text are kept
    assert!(dir.path().join("data").join("template_lib.csv.old").exists());
    assert!(dir.path().join("data").join("stidle.txt.old").exists());
}

#[test]
fn test_updated_template_keeps_its_slot() {
    let dir = TempDir::new().unwrap();
    let trainer = Pipeline::new(config(dir.path(), true)).unwrap();

    let first = write_log(dir.path(), "first.log", &["set mode alpha on"]);
    trainer.run_file(&first).unwrap();
    let old = event_id_of("set mode alpha on");
    let slot = vocabulary(dir.path()).position(&old).unwrap();

    let second = write_log(dir.path(), "second.log", &["set mode beta on"]);
    let report = trainer.run_file(&second).unwrap();
    assert_eq!(report.updated_templates, 1);
    assert_eq!(report.vocabulary_replaced, 1);

    let vocab = vocabulary(dir.path());
    assert_eq!(vocab.position(&event_id_of("set mode <*> on")), Some(slot));
    assert_eq!(vocab.position(&old), None);

    let library = TemplateLibrary::load(&dir.path().join("data").join("template_lib.csv")).unwrap();
    assert_eq!(library.entries()[0].event_id_old, old);
    assert_eq!(library.entries()[0].template, "set mode <*> on");
}

#[test]
fn test_prediction_leaves_library_alone() {
    let dir = TempDir::new().unwrap();
    let trainer = Pipeline::new(config(dir.path(), true)).unwrap();
    let train = write_log(dir.path(), "train.log", &["a b 1", "a b 2"]);
    trainer.run_file(&train).unwrap();

    let library_path = dir.path().join("data").join("template_lib.csv");
    let library_before = fs::read_to_string(&library_path).unwrap();

    let predictor = Pipeline::new(config(dir.path(), false).with_context(Context::Loglizer)).unwrap();
    let logs = vec![
        write_log(dir.path(), "p1.log", &["a b 5", "totally new event here"]),
        write_log(dir.path(), "p2.log", &["a b 6"]),
    ];
    let results = predictor.run_files(&logs);

    let reports: Vec<_> = results.into_iter().map(|(_, r)| r.unwrap()).collect();
    assert_eq!(reports[0].unknown_events, 1);
    assert_eq!(reports[1].unknown_events, 0);
    assert!(!reports[0].library_written);
    assert_eq!(fs::read_to_string(&library_path).unwrap(), library_before);

    let structured = fs::read_to_string(dir.path().join("data").join("p1_structured.csv")).unwrap();
    assert!(structured.lines().next().unwrap().ends_with(",LineIdInRaw"));
}

#[test]
fn test_prediction_requires_recognized_log() {
    let dir = TempDir::new().unwrap();
    let trainer = Pipeline::new(config(dir.path(), true)).unwrap();
    let train = write_log(dir.path(), "train.log", &["a b 1"]);
    trainer.run_file(&train).unwrap();

    let other = dir.path().join("other.log");
    fs::write(&other, "Jul 19 08:58:23 host sshd: accepted key\n").unwrap();

    let predictor = Pipeline::new(config(dir.path(), false).with_context(Context::DeepLog)).unwrap();
    let err = predictor.run_file(&other).unwrap_err();
    assert!(err.to_string().contains("not recognized"));
}

#[test]
fn test_full_vocabulary_keeps_previous_library() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data");
    let trainer = Pipeline::new(config(dir.path(), true)).unwrap();
    let first = write_log(dir.path(), "first.log", &["a b 1"]);
    trainer.run_file(&first).unwrap();

    let library_path = data.join("template_lib.csv");
    let library_before = fs::read_to_string(&library_path).unwrap();
    fs::remove_file(data.join("stidle.bin")).unwrap();
    fs::remove_file(data.join("stidle.txt")).unwrap();

    // three templates cannot fit into one usable slot
    let small = Pipeline::new(config(dir.path(), true).with_lib_size(2)).unwrap();
    let second = write_log(dir.path(), "second.log", &["a b 2", "link up now", "reset cause 9"]);
    let err = small.run_file(&second).unwrap_err();
    println!("{}", err);
    assert!(err.to_string().contains("Vocabulary is full"));

    assert_eq!(fs::read_to_string(&library_path).unwrap(), library_before);
    assert!(!data.join("template_lib.csv.old").exists());
    assert!(Vocabulary::load(&data.join("stidle")).unwrap().is_none());
}

#[test]
fn test_missing_vocabulary_rebuilt_from_unchanged_library() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data");
    let trainer = Pipeline::new(config(dir.path(), true)).unwrap();
    let log = write_log(dir.path(), "train.log", &["a b 1", "a b 2"]);
    trainer.run_file(&log).unwrap();

    fs::remove_file(data.join("stidle.bin")).unwrap();
    fs::remove_file(data.join("stidle.txt")).unwrap();

    let report = trainer.run_file(&log).unwrap();
    println!("{:?}", report);
    assert!(!report.library_written);
    assert_eq!(report.vocabulary_inserted, 1);

    let vocab = vocabulary(dir.path());
    assert_eq!(vocab.len(), LIB_SIZE);
    assert!(vocab.position(&event_id_of("a b <*>")).is_some());
}
