use std::io;

use dmv_em::train::DmvOptions;
use dmv_em::{Checkpoint, CorpusBuilder, DmvModel, ROOT_TAG};

fn trained_model(options: DmvOptions) -> (DmvModel, dmv_em::Corpus) {
    let mut builder = CorpusBuilder::new();
    builder
        .append_with_words(&[("the", "DET"), ("dog", "NOUN"), ("barks", "VERB")])
        .unwrap();
    builder
        .append_with_words(&[("dogs", "NOUN"), ("bark", "VERB"), ("loudly", "ADV")])
        .unwrap();
    let corpus = builder.build().unwrap();
    let mut model = DmvModel::from_corpus(&corpus, options).unwrap();
    model.init_param(corpus.sentences()).unwrap();
    model.train(corpus.sentences(), 1, 2).unwrap();
    (model, corpus)
}

#[test]
fn test_save_load_round_trip() {
    let mut options = DmvOptions::default();
    options.set_use_lex(true);
    let (model, corpus) = trained_model(options.clone());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grammar.dmv");
    model.save(&path).unwrap();
    assert!(path.exists());
    // The temporary file is renamed away
    assert!(!dir.path().join("grammar.dmv.tmp").exists());

    let loaded = DmvModel::load(&path, options).unwrap();
    assert_eq!(loaded.tag_index(), model.tag_index());
    assert_eq!(loaded.params().trans(), model.params().trans());
    assert_eq!(loaded.params().decision(), model.params().decision());
    assert_eq!(loaded.params().lex(), model.params().lex());
    assert!(!loaded.params().is_initial());

    // A restored model keeps training
    let mut loaded = loaded;
    let mut counters = loaded.new_counters();
    let result = loaded.em_e(corpus.sentences(), &mut counters).unwrap();
    assert!(result.log_likelihood.is_finite());
    loaded.em_m(&counters).unwrap();
}

#[test]
fn test_checkpoint_metadata() {
    let (model, _) = trained_model(DmvOptions::default());
    let temp_file = tempfile::NamedTempFile::new().unwrap();
    model.save(temp_file.path()).unwrap();

    let data = std::fs::read(temp_file.path()).unwrap();
    let checkpoint = Checkpoint::new(&data).unwrap();
    assert_eq!(checkpoint.num_tags(), 5);
    assert_eq!(checkpoint.cvalency(), 2);
    assert_eq!(checkpoint.dvalency(), 2);
    assert_eq!(checkpoint.vocab_size(), None);
    assert_eq!(checkpoint.to_tag(0), Some(ROOT_TAG));
    assert_eq!(checkpoint.to_tag_id("VERB"), Some(3));
    assert_eq!(checkpoint.to_tag(4), Some("ADV"));
    assert_eq!(checkpoint.to_tag(5), None);

    let mut dump = Vec::new();
    checkpoint.dump(&mut dump).unwrap();
    let dump = String::from_utf8(dump).unwrap();
    assert!(dump.contains("num_tags: 5"));
    assert!(dump.contains("NOUN"));
}

#[test]
fn test_load_rejects_mismatched_options() {
    let (model, _) = trained_model(DmvOptions::default());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grammar.dmv");
    model.save(&path).unwrap();

    let mut options = DmvOptions::default();
    options.set_c_valency(1).unwrap();
    let err = DmvModel::load(&path, options).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

    let mut options = DmvOptions::default();
    options.set_use_lex(true);
    assert!(DmvModel::load(&path, options).is_err());
}

#[test]
fn test_corrupted_checkpoint() {
    let (model, _) = trained_model(DmvOptions::default());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grammar.dmv");
    model.save(&path).unwrap();
    let data = std::fs::read(&path).unwrap();

    let mut bad_magic = data.clone();
    bad_magic[0] = b'x';
    let err = Checkpoint::new(&bad_magic).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidData);

    let truncated = &data[..data.len() - 8];
    assert!(Checkpoint::new(truncated).is_err());

    std::fs::write(&path, &data[..40]).unwrap();
    let err = DmvModel::load(&path, DmvOptions::default()).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidData);

    let missing = dir.path().join("missing.dmv");
    let err = DmvModel::load(&missing, DmvOptions::default()).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
}
