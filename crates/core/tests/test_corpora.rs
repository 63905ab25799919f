//! Corpus loading through the public entry points

mod common;

use instruct_ner_core::datasets::{load_test, load_train_eval, DatasetName, DatasetOptions};
use instruct_ner_core::Error;

#[test]
fn test_conll_train_eval() {
    let dir = tempfile::tempdir().unwrap();
    common::write_conll(dir.path());

    let (train, eval) = load_train_eval(DatasetName::Conll2003, &DatasetOptions::new(dir.path())).unwrap();
    assert_eq!(train.len(), 3);
    assert_eq!(eval.len(), 1);

    let first = &train[0];
    assert_eq!(first.input, "EU rejects German call to boycott British lamb .");
    assert_eq!(first.raw_entities["ORG"], vec!["EU"]);
    assert_eq!(first.raw_entities["MISC"], vec!["German", "British"]);
    assert!(first.raw_entities["PER"].is_empty());
    assert!(first.source.starts_with("### Task: "));
    assert!(first.source.ends_with("### Answer: "));
    assert!(first.output.contains("MISC: German, British\n"));

    assert_eq!(train[1].raw_entities["PER"], vec!["Peter Blackburn"]);
    assert_eq!(eval[0].raw_entities["ORG"], vec!["LEICESTERSHIRE"]);
}

#[test]
fn test_conll_max_instances() {
    let dir = tempfile::tempdir().unwrap();
    common::write_conll(dir.path());

    let options = DatasetOptions::new(dir.path()).with_max_instances(Some(2));
    let (train, _) = load_train_eval(DatasetName::Conll2003, &options).unwrap();
    assert_eq!(train.len(), 2);
}

#[test]
fn test_rudrec_split_is_seeded_and_disjoint() {
    let dir = tempfile::tempdir().unwrap();
    let options = common::rudrec_options(dir.path()).with_test_size(0.5);

    let (train, eval) = load_train_eval(DatasetName::Rudrec, &options).unwrap();
    assert_eq!(train.len(), 2);
    assert_eq!(eval.len(), 2);
    for record in &eval {
        assert!(train.iter().all(|t| t.id != record.id));
        assert!(record.source.starts_with("### Задание: "));
    }

    let test = load_test(DatasetName::Rudrec, &options).unwrap();
    let eval_ids: Vec<_> = eval.iter().map(|r| r.id.clone()).collect();
    let test_ids: Vec<_> = test.iter().map(|r| r.id.clone()).collect();
    assert_eq!(eval_ids, test_ids);
}

#[test]
fn test_rudrec_entities_grouped() {
    let dir = tempfile::tempdir().unwrap();
    let options = common::rudrec_options(dir.path()).with_test_size(0.25);

    let (train, eval) = load_train_eval(DatasetName::Rudrec, &options).unwrap();
    let all: Vec<_> = train.iter().chain(eval.iter()).collect();
    let record = all.iter().find(|r| r.id == "a_0").unwrap();
    assert_eq!(record.raw_entities.len(), 6);
    assert_eq!(record.raw_entities["Drugname"], vec!["Нурофен"]);
    assert_eq!(record.raw_entities["DI"], vec!["головной боли"]);
}

#[test]
fn test_missing_files_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    for name in DatasetName::ALL {
        let result = load_test(name, &DatasetOptions::new(dir.path().join("absent")));
        assert!(matches!(result, Err(Error::NotFound(_))), "{} should be NotFound", name);
    }
}
