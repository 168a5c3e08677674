// core/tests/autosave.rs
//
// Background saving of modified user models.
//
// Tests cover:
// - the first tick saves dirty user models
// - nothing more is written before the interval has passed
// - the engine starts and stops its scheduler

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use wordpredict_core::{AutoSaveScheduler, Config, ModelCache, PredictionEngine};

fn wait_for(path: &Path, timeout: Duration) -> bool {
    let started = Instant::now();
    while started.elapsed() < timeout {
        if path.exists() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    path.exists()
}

#[test]
fn dirty_models_are_saved_on_the_first_tick() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(ModelCache::new(dir.path().join("system"), dir.path().join("user")));
    let filename = cache.get_filename("lm:user:en").unwrap();

    let model = cache.get_model("lm:user:en").unwrap();
    model.write().learn_tokens(&["saved", "soon"], true);

    let mut scheduler = AutoSaveScheduler::with_timing(
        Arc::clone(&cache),
        Duration::from_millis(20),
        Duration::from_secs(3600),
    );
    assert!(wait_for(&filename, Duration::from_secs(10)));
    assert!(!model.read().is_modified());
    let first = fs::read_to_string(&filename).unwrap();

    // the interval hasn't passed yet
    model.write().learn_tokens(&["not", "yet"], true);
    thread::sleep(Duration::from_millis(200));
    scheduler.stop();
    assert_eq!(fs::read_to_string(&filename).unwrap(), first);
    assert!(model.read().is_modified());
}

#[test]
fn engine_runs_the_scheduler_until_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let engine = PredictionEngine::new(Config {
        system_model_dir: dir.path().join("system"),
        user_model_dir: dir.path().join("user"),
        auto_save_interval_secs: 1,
        auto_save_tick_secs: 1,
        ..Config::default()
    });
    engine.set_models(&["lm:user:en"], &["lm:user:en"], &[]).unwrap();
    engine.learn_text("written in the background", true).unwrap();

    let filename = dir.path().join("user").join("en.lm");
    assert!(wait_for(&filename, Duration::from_secs(10)));

    let started = Instant::now();
    engine.cleanup().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
}
