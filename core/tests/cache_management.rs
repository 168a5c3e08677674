// core/tests/cache_management.rs
//
// Integration tests for ModelCache loading, saving and recovery.
//
// Tests cover:
// - model kinds chosen per class and file header
// - atomic saves with `.bak` rotation
// - a failed save leaves the previous file intact and the model modified
// - broken file naming and recovery from the backup
// - load errors disable saving
// - one shared instance per id across threads

use std::fs;
use std::sync::Arc;
use std::thread;

use wordpredict_core::{ModelCache, ModelError, ModelKind, NGramModel};

fn cache(dir: &std::path::Path) -> ModelCache {
    ModelCache::new(dir.join("system"), dir.join("user"))
}

fn write_system_model(dir: &std::path::Path, name: &str, model: &NGramModel) {
    let system = dir.join("system");
    fs::create_dir_all(&system).unwrap();
    model.save(system.join(format!("{name}.lm"))).unwrap();
}

#[test]
fn system_models_follow_the_file_order() {
    let dir = tempfile::tempdir().unwrap();

    let mut unigram = NGramModel::unigram();
    unigram.learn_tokens(&["whale"], true);
    write_system_model(dir.path(), "uni", &unigram);

    let mut bigram = NGramModel::dynamic(2);
    bigram.learn_tokens(&["white", "whale"], true);
    write_system_model(dir.path(), "en", &bigram);

    let cache = cache(dir.path());
    let uni = cache.get_model("lm:system:uni").unwrap();
    assert_eq!(uni.read().kind(), ModelKind::Unigram);

    // "lm" alone is canonicalized to lm:system:en
    let en = cache.get_model("lm").unwrap();
    assert_eq!(en.read().kind(), ModelKind::Dynamic);
    assert_eq!(en.read().order(), 2);
    assert_eq!(en.read().get_ngram_count(&["white", "whale"]), 1);

    assert!(cache.get_model("lm:system:missing").is_none());
    assert_eq!(cache.find_available_model_names("system"), vec!["en", "uni"]);
}

#[test]
fn user_models_are_saved_with_backup() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache(dir.path());
    let filename = cache.get_filename("lm:user:en").unwrap();

    let model = cache.get_model("lm:user:en").unwrap();
    assert_eq!(model.read().kind(), ModelKind::Cached);
    assert!(!cache.save_model(&model, "lm:user:en").unwrap());

    model.write().learn_tokens(&["first", "text"], true);
    assert!(cache.save_model(&model, "lm:user:en").unwrap());
    assert!(filename.exists());
    assert!(!model.read().is_modified());
    let first = fs::read_to_string(&filename).unwrap();

    model.write().learn_tokens(&["second"], true);
    cache.save_models();
    let backup = ModelCache::get_backup_filename(&filename);
    assert_eq!(fs::read_to_string(&backup).unwrap(), first);

    let reloaded = ModelCache::new(dir.path().join("system"), dir.path().join("user"));
    let model = reloaded.get_model("lm:user:en").unwrap();
    assert_eq!(model.read().lookup_word("second"), 1);
    assert_eq!(reloaded.find_available_model_names("user"), vec!["en"]);
}

#[test]
fn mem_models_are_never_written() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache(dir.path());
    let model = cache.get_model("lm:mem:scratch").unwrap();
    model.write().learn_tokens(&["nothing", "saved"], true);

    assert!(cache.get_filename("lm:mem:scratch").is_none());
    assert!(!cache.save_model(&model, "lm:mem:scratch").unwrap());
    cache.save_models();
    assert!(!dir.path().join("user").exists());
}

#[test]
fn interrupted_save_keeps_the_original() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache(dir.path());
    let filename = cache.get_filename("lm:user:en").unwrap();
    let backup = ModelCache::get_backup_filename(&filename);

    let model = cache.get_model("lm:user:en").unwrap();
    model.write().learn_tokens(&["intact", "words"], true);
    assert!(cache.save_model(&model, "lm:user:en").unwrap());
    let original = fs::read_to_string(&filename).unwrap();

    // the backup can't be written, so the save stops before replacing
    model.write().learn_tokens(&["newer"], true);
    fs::create_dir(&backup).unwrap();
    let err = cache.save_model(&model, "lm:user:en").unwrap_err();
    assert!(matches!(err, ModelError::ModelSaveError { .. }), "{err}");

    assert_eq!(fs::read_to_string(&filename).unwrap(), original);
    assert!(model.read().is_modified());
    let mut names: Vec<String> = fs::read_dir(filename.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["en.lm", "en.lm.bak"]);

    // the next save goes through
    fs::remove_dir(&backup).unwrap();
    assert!(cache.save_model(&model, "lm:user:en").unwrap());
    assert_eq!(fs::read_to_string(&backup).unwrap(), original);
    let mut loaded = NGramModel::cached(3);
    loaded.load(&filename).unwrap();
    assert_eq!(loaded.lookup_word("intact"), 1);
    assert_eq!(loaded.lookup_word("newer"), 1);
}

#[test]
fn failed_save_stays_modified() {
    let dir = tempfile::tempdir().unwrap();
    // user "directory" is a plain file
    let user = dir.path().join("user");
    fs::write(&user, "not a directory").unwrap();
    let cache = ModelCache::new(dir.path().join("system"), &user);

    let model = cache.get_model("lm:user:en").unwrap();
    model.write().learn_tokens(&["pending"], true);

    let err = cache.save_model(&model, "lm:user:en").unwrap_err();
    assert!(matches!(err, ModelError::ModelSaveError { .. }), "{err}");
    assert!(model.read().is_modified());
}

#[test]
fn broken_filenames_count_up() {
    let dir = tempfile::tempdir().unwrap();
    let filename = dir.path().join("en.lm");

    for expected in ["_001", "_002", "_003"] {
        let broken = ModelCache::get_broken_filename(&filename);
        let name = broken.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("en.lm.broken-"), "{name}");
        assert!(name.ends_with(expected), "{name}");
        fs::write(&broken, "").unwrap();
    }
}

#[test]
fn corrupt_user_model_is_recovered_from_backup() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache(dir.path());
    let filename = cache.get_filename("lm:user:en").unwrap();

    let model = cache.get_model("lm:user:en").unwrap();
    model.write().learn_tokens(&["backed", "up"], true);
    cache.save_models();
    model.write().learn_tokens(&["later"], true);
    cache.save_models();
    fs::write(&filename, "\n\\data\\\nngram 1=3\n\n\\1-grams:\n1 <unk>\n").unwrap();

    let cache = ModelCache::new(dir.path().join("system"), dir.path().join("user"));
    let model = cache.get_model("lm:user:en").unwrap();
    assert!(model.read().load_error());
    let errors = cache.load_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "lm:user:en");

    // learning still works, but nothing is written over the broken file
    model.write().learn_tokens(&["lost"], true);
    let err = cache.save_model(&model, "lm:user:en").unwrap_err();
    assert!(matches!(err, ModelError::ModelLoadError { .. }));
    cache.save_models();

    cache.recover_model("lm:user:en").unwrap();
    let broken: Vec<_> = fs::read_dir(dir.path().join("user"))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().contains(".broken-"))
        .collect();
    assert_eq!(broken.len(), 1);

    let model = cache.get_model("lm:user:en").unwrap();
    assert!(!model.read().load_error());
    assert_eq!(model.read().lookup_word("backed"), 1);
    assert_eq!(model.read().lookup_word("later"), 0);
    assert!(cache.load_errors().is_empty());
}

#[test]
fn concurrent_access_shares_one_instance() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(cache(dir.path()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get_model("lm:user:en").unwrap())
        })
        .collect();
    let models: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for model in &models[1..] {
        assert!(Arc::ptr_eq(&models[0], model));
    }
}

#[test]
fn unknown_ids_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache(dir.path());
    assert!(cache.get_model("xx:user:en").is_none());
    assert!(matches!(
        cache.load_model("lm:nowhere:en"),
        Err(ModelError::UnknownLmid { component: "class", .. })
    ));
}
