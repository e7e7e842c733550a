use runbook::sequence::Sequence;
use runbook::step::{Step, StepType};
use runbook::store::{SequenceStore, StoreError};
use tempfile::tempdir;

fn sequence(label: &str) -> Sequence {
    let mut seq = Sequence::new(label);
    seq.push_back(Step::new(StepType::Action).with_script("x = 1"));
    seq
}

#[test]
fn stores_and_loads_by_label() {
    let tmp = tempdir().expect("tempdir");
    let store = SequenceStore::new(tmp.path().join("sequences")).expect("open store");

    let original = sequence("morning check");
    store.store(&original).expect("store");
    let reloaded = store.load("morning check").expect("load");

    assert_eq!(reloaded, original);
}

#[test]
fn lists_sequence_directories_sorted() {
    let tmp = tempdir().expect("tempdir");
    let store = SequenceStore::new(tmp.path()).expect("open store");

    store.store(&sequence("beta")).expect("store beta");
    store.store(&sequence("alpha")).expect("store alpha");

    let paths = store.sequence_paths().expect("list");
    let labels: Vec<String> = paths
        .iter()
        .map(|p| p.file_name().expect("name").to_string_lossy().into_owned())
        .collect();
    assert_eq!(labels, vec!["alpha".to_string(), "beta".to_string()]);
}

#[test]
fn rename_moves_the_directory() {
    let tmp = tempdir().expect("tempdir");
    let store = SequenceStore::new(tmp.path()).expect("open store");

    store.store(&sequence("draft")).expect("store");
    let renamed = store.rename("draft", "final: v1").expect("rename");

    assert_eq!(renamed.label(), "final: v1");
    assert!(matches!(
        store.load("draft"),
        Err(StoreError::MissingSequence { .. })
    ));
    let reloaded = store.load("final: v1").expect("load renamed");
    assert_eq!(reloaded.label(), "final: v1");
}

#[test]
fn remove_deletes_the_sequence() {
    let tmp = tempdir().expect("tempdir");
    let store = SequenceStore::new(tmp.path()).expect("open store");

    store.store(&sequence("ephemeral")).expect("store");
    store.remove("ephemeral").expect("remove");

    assert!(store.sequence_paths().expect("list").is_empty());
    assert!(store.load("ephemeral").is_err());
}
