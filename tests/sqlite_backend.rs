use slotmatch::{match_backend, Backend, Database, MatchError, PairKey, SelectOptions};

#[test]
fn data_survives_reopening_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pairs.sqlite");

    {
        let db = Database::open(&path).unwrap();
        db.add_availability("ann", "mon 10:00").unwrap();
        db.add_availability("bob", "mon 10:00").unwrap();
        db.add_availability("cat", "tue 14:00").unwrap();
        db.add_subject("dan").unwrap();
    }

    let db = Database::open(&path).unwrap();
    assert_eq!(db.get_subjects().unwrap(), vec!["ann", "bob", "cat", "dan"]);
    assert_eq!(db.get_availability().unwrap().len(), 3);
}

#[test]
fn pipeline_runs_against_the_record_store() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("pairs.sqlite")).unwrap();
    for (subject, slot) in [
        ("ann", "mon"),
        ("bob", "mon"),
        ("cat", "mon"),
        ("cat", "tue"),
        ("dan", "tue"),
        ("eve", "wed"),
    ] {
        db.add_availability(subject, slot).unwrap();
    }
    db.add_exclusion("dan", "cat").unwrap();

    let report = match_backend(&db, None, &SelectOptions::default()).unwrap();
    assert_eq!(report.candidate_count, 3);

    let keys: Vec<_> = report
        .selection
        .matches
        .iter()
        .map(|m| m.key.clone())
        .collect();
    assert_eq!(
        keys,
        vec![PairKey::new("ann".to_owned(), "bob".to_owned()).unwrap()]
    );
    assert_eq!(report.selection.matches[0].slots, vec!["mon"]);
    assert_eq!(report.unmatched(), vec!["cat", "dan", "eve"]);
}

#[test]
fn self_exclusion_is_refused() {
    let db = Database::in_memory().unwrap();
    assert!(matches!(
        db.add_exclusion("ann", "ann"),
        Err(MatchError::Validation(_))
    ));
    assert!(db.get_exclusions().unwrap().is_empty());
}
