//! Entity tagsets and task descriptions for each corpus

/// RuDReC drug-review entity types
pub const RUDREC_ENTITY_TYPES: &[&str] = &["Drugname", "Drugclass", "Drugform", "DI", "ADR", "Finding"];

/// NEREL entity types
pub const NEREL_ENTITY_TYPES: &[&str] = &[
    "AGE",
    "AWARD",
    "CITY",
    "COUNTRY",
    "CRIME",
    "DATE",
    "DISEASE",
    "DISTRICT",
    "EVENT",
    "FACILITY",
    "FAMILY",
    "IDEOLOGY",
    "LANGUAGE",
    "LAW",
    "LOCATION",
    "MONEY",
    "NATIONALITY",
    "NUMBER",
    "ORDINAL",
    "ORGANIZATION",
    "PENALTY",
    "PERCENT",
    "PERSON",
    "PRODUCT",
    "PROFESSION",
    "RELIGION",
    "STATE_OR_PROVINCE",
    "TIME",
    "WORK_OF_ART",
];

/// NEREL-BIO entity types
pub const NEREL_BIO_ENTITY_TYPES: &[&str] = &[
    "ACTIVITY",
    "ADMINISTRATION_ROUTE",
    "ANATOMY",
    "CHEM",
    "DEVICE",
    "DISO",
    "FINDING",
    "FOOD",
    "GENE",
    "HEALTH_CARE_ACTIVITY",
    "INJURY_POISONING",
    "LABPROC",
    "LIVB",
    "MEDPROC",
    "MENTALPROC",
    "PHYS",
    "SCIPROC",
    "AGE",
    "CITY",
    "COUNTRY",
    "DATE",
    "DISTRICT",
    "FAMILY",
    "LOCATION",
    "MONEY",
    "NATIONALITY",
    "NUMBER",
    "ORDINAL",
    "ORGANIZATION",
    "PERCENT",
    "PERSON",
    "PRODUCT",
    "PROFESSION",
    "STATE_OR_PROVINCE",
    "TIME",
];

/// CoNLL-2003 entity types
pub const CONLL2003_ENTITY_TYPES: &[&str] = &["PER", "ORG", "LOC", "MISC"];

/// MultiCoNER II fine-grained types with their coarse group
const MULTICONER_TAXONOMY: &[(&str, &str)] = &[
    ("Facility", "Location"),
    ("OtherLOC", "Location"),
    ("HumanSettlement", "Location"),
    ("Station", "Location"),
    ("VisualWork", "CreativeWork"),
    ("MusicalWork", "CreativeWork"),
    ("WrittenWork", "CreativeWork"),
    ("ArtWork", "CreativeWork"),
    ("Software", "CreativeWork"),
    ("OtherCW", "CreativeWork"),
    ("MusicalGRP", "Group"),
    ("PublicCorp", "Group"),
    ("PrivateCorp", "Group"),
    ("OtherCorp", "Group"),
    ("AerospaceManufacturer", "Group"),
    ("SportsGRP", "Group"),
    ("CarManufacturer", "Group"),
    ("TechCORP", "Group"),
    ("ORG", "Group"),
    ("Scientist", "Person"),
    ("Artist", "Person"),
    ("Athlete", "Person"),
    ("Politician", "Person"),
    ("Cleric", "Person"),
    ("SportsManager", "Person"),
    ("OtherPER", "Person"),
    ("Clothing", "Product"),
    ("Vehicle", "Product"),
    ("Food", "Product"),
    ("Drink", "Product"),
    ("OtherPROD", "Product"),
    ("Medication/Vaccine", "Medical"),
    ("MedicalProcedure", "Medical"),
    ("AnatomicalStructure", "Medical"),
    ("Symptom", "Medical"),
    ("Disease", "Medical"),
];

/// MultiCoNER II fine-grained entity types
pub const MULTICONER_ENTITY_TYPES: &[&str] = &[
    "Facility",
    "OtherLOC",
    "HumanSettlement",
    "Station",
    "VisualWork",
    "MusicalWork",
    "WrittenWork",
    "ArtWork",
    "Software",
    "OtherCW",
    "MusicalGRP",
    "PublicCorp",
    "PrivateCorp",
    "OtherCorp",
    "AerospaceManufacturer",
    "SportsGRP",
    "CarManufacturer",
    "TechCORP",
    "ORG",
    "Scientist",
    "Artist",
    "Athlete",
    "Politician",
    "Cleric",
    "SportsManager",
    "OtherPER",
    "Clothing",
    "Vehicle",
    "Food",
    "Drink",
    "OtherPROD",
    "Medication/Vaccine",
    "MedicalProcedure",
    "AnatomicalStructure",
    "Symptom",
    "Disease",
];

/// MultiCoNER II coarse entity types
pub const MULTICONER_COARSE_ENTITY_TYPES: &[&str] =
    &["Location", "CreativeWork", "Group", "Person", "Product", "Medical"];

/// Map a fine MultiCoNER type to its coarse group
pub fn multiconer_coarse_type(fine: &str) -> Option<&'static str> {
    MULTICONER_TAXONOMY
        .iter()
        .find(|(f, _)| *f == fine)
        .map(|(_, coarse)| *coarse)
}

/// Russian task description listing the entity types
pub fn russian_instruction(domain: &str, entity_types: &[&str]) -> String {
    format!(
        "Ты решаешь задачу NER. Извлеки из {} именованные сущности следующих типов: {}.",
        domain,
        entity_types.join(", ")
    )
}

/// English task description listing the entity types
pub fn english_instruction(entity_types: &[&str]) -> String {
    format!(
        "You are solving the NER problem. Extract from the text named entities of the following types: {}.",
        entity_types.join(", ")
    )
}
