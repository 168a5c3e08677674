//! Lazily loading, shared cache of language models keyed by model id.
//!
//! Model ids have the form `type:class:name`; missing fields default to
//! `lm:system:en`. Classes:
//! - `system`: read-only model from the system model directory;
//! - `user`: learning model from the user model directory, saved back;
//! - `mem`: in-memory scratch model without a file.
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::error::ModelError;
use crate::lmfile::read_order;
use crate::ngram::NGramModel;
use crate::Config;

/// A cached model. Predictions take the read lock, learning the write lock.
pub type SharedModel = Arc<RwLock<NGramModel>>;

pub const MODEL_EXTENSION: &str = "lm";

const DEFAULT_LMID: [&str; 3] = ["lm", "system", "en"];

/// Model class of a model id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelClass {
    System,
    User,
    Mem,
}

impl ModelClass {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(ModelClass::System),
            "user" => Some(ModelClass::User),
            "mem" => Some(ModelClass::Mem),
            _ => None,
        }
    }
}

pub struct ModelCache {
    system_dir: PathBuf,
    user_dir: PathBuf,
    models: Mutex<AHashMap<String, SharedModel>>,
}

impl ModelCache {
    pub fn new(system_dir: impl Into<PathBuf>, user_dir: impl Into<PathBuf>) -> Self {
        Self {
            system_dir: system_dir.into(),
            user_dir: user_dir.into(),
            models: Mutex::new(AHashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.system_model_dir, &config.user_model_dir)
    }

    pub fn system_dir(&self) -> &Path {
        &self.system_dir
    }

    pub fn user_dir(&self) -> &Path {
        &self.user_dir
    }

    /// Drop all cached models without saving.
    pub fn clear(&self) {
        self.models.lock().clear();
    }

    /// Cached model for `lmid`, loading it on first use.
    ///
    /// `None` if the id is invalid or a system model file is missing.
    pub fn get_model(&self, lmid: &str) -> Option<SharedModel> {
        let lmid = Self::canonicalize_lmid(lmid);
        if let Some(model) = self.models.lock().get(&lmid) {
            return Some(Arc::clone(model));
        }

        // load without holding the table lock
        let model = match self.load_model(&lmid) {
            Ok(model) => model,
            Err(e @ ModelError::ModelNotFound { .. }) => {
                warn!("{}, skipping", e);
                return None;
            }
            Err(e) => {
                error!("{}", e);
                return None;
            }
        };

        // another thread may have been faster, keep its instance
        let mut models = self.models.lock();
        let model = models
            .entry(lmid)
            .or_insert_with(|| Arc::new(RwLock::new(model)));
        Some(Arc::clone(model))
    }

    /// Models for `lmids` in order, skipping unavailable ones.
    pub fn get_models<S: AsRef<str>>(&self, lmids: &[S]) -> Vec<SharedModel> {
        lmids
            .iter()
            .filter_map(|lmid| self.get_model(lmid.as_ref()))
            .collect()
    }

    /// Create and load the model for a canonical `lmid`.
    ///
    /// Malformed files don't fail; the model comes back empty and in the
    /// load-error state.
    pub fn load_model(&self, lmid: &str) -> Result<NGramModel, ModelError> {
        let [type_, class, _name] = Self::split_lmid(lmid);
        if type_ != "lm" {
            return Err(ModelError::UnknownLmid {
                lmid: lmid.to_string(),
                component: "type",
                value: type_,
            });
        }
        let Some(class) = ModelClass::parse(&class) else {
            return Err(ModelError::UnknownLmid {
                lmid: lmid.to_string(),
                component: "class",
                value: class,
            });
        };

        let filename = self.get_filename(lmid);
        let mut model = match class {
            ModelClass::System => {
                let order = filename.as_deref().and_then(|f| read_order(f));
                if order == Some(1) {
                    NGramModel::unigram()
                } else {
                    NGramModel::dynamic(order.unwrap_or(3))
                }
            }
            ModelClass::User => NGramModel::cached(3),
            ModelClass::Mem => NGramModel::dynamic(3),
        };

        let Some(filename) = filename else {
            return Ok(model);
        };
        if !filename.exists() {
            if class == ModelClass::System {
                return Err(ModelError::ModelNotFound {
                    lmid: lmid.to_string(),
                    path: filename,
                });
            }
            debug!("no file for '{}' yet, starting empty", lmid);
            return Ok(model);
        }

        info!("loading language model '{}'", filename.display());
        if let Err(e) = model.load(&filename) {
            let message = format!(
                "failed to load language model '{}': {}",
                filename.display(),
                e
            );
            error!("{}", message);
            if class == ModelClass::User {
                error!("saving word suggestions disabled to prevent further data loss");
            }
            model.set_load_error(message);
        }
        Ok(model)
    }

    /// `(lmid, message)` for every cached model that failed to load.
    pub fn load_errors(&self) -> Vec<(String, String)> {
        let mut errors: Vec<(String, String)> = self
            .entries()
            .into_iter()
            .filter_map(|(lmid, model)| {
                let model = model.read();
                if model.load_error() {
                    Some((lmid, model.load_error_message().to_string()))
                } else {
                    None
                }
            })
            .collect();
        errors.sort();
        errors
    }

    fn entries(&self) -> Vec<(String, SharedModel)> {
        self.models
            .lock()
            .iter()
            .map(|(lmid, model)| (lmid.clone(), Arc::clone(model)))
            .collect()
    }

    /// Save all modified user models. Failures are logged and left for the
    /// next call.
    pub fn save_models(&self) {
        for (lmid, model) in self.entries() {
            if !Self::is_user_lmid(&lmid) {
                continue;
            }
            match self.save_model(&model, &lmid) {
                Ok(_) => {}
                Err(e @ ModelError::ModelLoadError { .. }) => {
                    warn!("not saving modified language model: {}", e)
                }
                Err(e) => warn!("{}", e),
            }
        }
    }

    /// Write `model` to its file if it was modified.
    ///
    /// The data goes to a temporary file in the same directory first; the
    /// previous file is copied to `<file>.bak` and the temporary file is
    /// renamed over it. A failed or interrupted save leaves the existing
    /// file as it was and the model modified.
    ///
    /// # Returns
    /// `true` if a file was written.
    pub fn save_model(&self, model: &SharedModel, lmid: &str) -> Result<bool, ModelError> {
        let lmid = Self::canonicalize_lmid(lmid);
        let Some(filename) = self.get_filename(&lmid) else {
            return Ok(false);
        };

        let guard = model.read();
        if !guard.is_modified() {
            return Ok(false);
        }
        if guard.load_error() {
            return Err(ModelError::ModelLoadError {
                lmid,
                message: guard.load_error_message().to_string(),
            });
        }

        info!("saving language model '{}'", filename.display());
        let save_error = |source: std::io::Error| ModelError::ModelSaveError {
            path: filename.clone(),
            source,
        };

        let dir = filename
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir).map_err(save_error)?;

        // learning is blocked while serializing, so nothing slips past the flag
        guard.set_modified(false);
        let temp = write_temp_file(&guard, &dir);
        drop(guard);

        let result = temp.and_then(|temp| {
            if filename.exists() {
                fs::copy(&filename, Self::get_backup_filename(&filename))?;
            }
            temp.persist(&filename).map_err(|e| e.error)?;
            Ok(())
        });

        if let Err(e) = result {
            model.read().set_modified(true);
            return Err(save_error(e));
        }
        Ok(true)
    }

    /// Move a corrupt model file aside and fall back to its backup.
    ///
    /// The broken file gets its [`get_broken_filename`](Self::get_broken_filename)
    /// name and a copy of `<file>.bak` takes its place when present. The cache
    /// entry is dropped so the next access reloads the model.
    pub fn recover_model(&self, lmid: &str) -> Result<(), ModelError> {
        let lmid = Self::canonicalize_lmid(lmid);
        let Some(filename) = self.get_filename(&lmid) else {
            return Ok(());
        };

        if filename.exists() {
            let broken = Self::get_broken_filename(&filename);
            info!(
                "moving broken language model '{}' to '{}'",
                filename.display(),
                broken.display()
            );
            fs::rename(&filename, &broken)?;
        }

        let backup = Self::get_backup_filename(&filename);
        if backup.exists() {
            info!("restoring language model from '{}'", backup.display());
            fs::copy(&backup, &filename)?;
        }

        self.models.lock().remove(&lmid);
        Ok(())
    }

    /// Names of the `.lm` files of `class`, sorted.
    pub fn find_available_model_names(&self, class: &str) -> Vec<String> {
        let dir = if class == "system" {
            &self.system_dir
        } else {
            &self.user_dir
        };

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "failed to find language models in '{}': {}",
                    dir.display(),
                    e
                );
                return Vec::new();
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().map_or(false, |ext| ext == MODEL_EXTENSION))
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        names
    }

    /// Fill in missing or empty fields: `"lm:user"` becomes `"lm:user:en"`
    /// and `"lm::de"` becomes `"lm:system:de"`.
    pub fn canonicalize_lmid(lmid: &str) -> String {
        Self::split_lmid(lmid).join(":")
    }

    pub fn split_lmid(lmid: &str) -> [String; 3] {
        let mut fields = DEFAULT_LMID.map(str::to_string);
        for (i, field) in lmid.split(':').take(3).enumerate() {
            if !field.is_empty() {
                fields[i] = field.to_string();
            }
        }
        fields
    }

    pub fn is_user_lmid(lmid: &str) -> bool {
        let [_, class, _] = Self::split_lmid(lmid);
        class == "user"
    }

    /// File of `lmid`, `None` for in-memory models.
    pub fn get_filename(&self, lmid: &str) -> Option<PathBuf> {
        let [type_, class, name] = Self::split_lmid(lmid);
        let dir = match ModelClass::parse(&class) {
            Some(ModelClass::Mem) => return None,
            Some(ModelClass::System) => &self.system_dir,
            _ => &self.user_dir,
        };
        Some(dir.join(format!("{name}.{type_}")))
    }

    pub fn get_backup_filename(filename: &Path) -> PathBuf {
        append_to_path(filename, ".bak")
    }

    /// `<file>.broken-<date>_<NNN>` with the first unused counter.
    pub fn get_broken_filename(filename: &Path) -> PathBuf {
        let date = chrono::Local::now().format("%Y-%m-%d");
        let mut count = 1;
        loop {
            let candidate = append_to_path(filename, &format!(".broken-{date}_{count:03}"));
            if !candidate.exists() {
                return candidate;
            }
            count += 1;
        }
    }
}

fn write_temp_file(model: &NGramModel, dir: &Path) -> std::io::Result<NamedTempFile> {
    let mut temp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        model.write_lm(&mut writer)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    Ok(temp)
}

fn append_to_path(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}
