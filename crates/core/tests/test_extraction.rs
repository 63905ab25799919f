//! Generated answers parsed back and scored

mod common;

use instruct_ner_core::datasets::{load_train_eval, DatasetName, DatasetOptions};
use instruct_ner_core::ner::{calculate_metrics, extract_classes, PromptTemplate};

#[test]
fn test_reference_answers_parse_back() {
    let dir = tempfile::tempdir().unwrap();
    common::write_conll(dir.path());
    let (train, _) = load_train_eval(DatasetName::Conll2003, &DatasetOptions::new(dir.path())).unwrap();

    let types = DatasetName::Conll2003.entity_types(false);
    let separator = PromptTemplate::english().answer_separator();
    for record in &train {
        let generated = format!("{}{}</s>", record.source, record.output);
        let extracted = extract_classes(&generated, types, &separator);
        assert_eq!(extracted, record.raw_entities, "record {}", record.id);
    }
}

#[test]
fn test_perfect_predictions_score_one() {
    let dir = tempfile::tempdir().unwrap();
    common::write_conll(dir.path());
    let (train, _) = load_train_eval(DatasetName::Conll2003, &DatasetOptions::new(dir.path())).unwrap();

    let types = DatasetName::Conll2003.entity_types(false);
    let report = calculate_metrics(train.iter().map(|r| (&r.raw_entities, &r.raw_entities)), types);
    assert_eq!(report.num_records, 3);
    assert!((report.micro_f1 - 1.0).abs() < 1e-9);
    assert_eq!(report.per_type["MISC"].support, 2);
}

#[test]
fn test_noisy_generation() {
    let types = ["Drugname", "ADR"];
    let generated = "### Задание: найди\n### Вход: текст\n### Ответ: Drugname: нурофен,  , аспирин \nADR: тошнота</s><unk>";
    let extracted = extract_classes(generated, &types, "Ответ: ");
    assert_eq!(extracted["Drugname"], vec!["нурофен", "аспирин"]);
    assert_eq!(extracted["ADR"], vec!["тошнота"]);

    let target = extract_classes("Ответ: Drugname: нурофен\nADR: тошнота, зуд\n", &types, "Ответ: ");
    let report = calculate_metrics([(&extracted, &target)], &types);
    // 2 tp, 1 fp, 1 fn
    assert!((report.micro_precision - 2.0 / 3.0).abs() < 1e-9);
    assert!((report.micro_recall - 2.0 / 3.0).abs() < 1e-9);
}
