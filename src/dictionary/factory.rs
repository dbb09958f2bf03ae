//! The process-wide validator factory.
//!
//! Validators are expensive to build and immutable once built, so they are
//! loaded once per process and shared as `Arc<Validator>`. The factory
//! resolves logical dictionary names through a resource registry
//! ([`add_file_resource`]) and a set of data directories, probing
//! `<name>`, `<name>.dic` and `<name>.dic.gz`; gzip is detected by magic
//! bytes and decompressed transparently. The single mutex is held across
//! lookup-and-insert, so concurrent first requests load only once.

use std::env;
use std::fs;
use std::io::{BufReader, Cursor};
use std::path::PathBuf;
use std::sync::Arc;

use flate2::read::GzDecoder;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use tracing::trace;

use super::{Validator, parse_dictionary};
use crate::base::{fold_name, verbosity};
use crate::error::{Error, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

static FACTORY: Lazy<Mutex<ValidatorFactory>> = Lazy::new(|| Mutex::new(ValidatorFactory::new()));

/// Get (loading on first request) the validator for a logical dictionary
/// name.
pub fn validator_for(name: &str) -> Result<Arc<Validator>> {
    FACTORY.lock().get(name)
}

/// Register a filesystem path for a logical dictionary name, ahead of any
/// data-directory probing.
pub fn add_file_resource(name: &str, path: impl Into<PathBuf>) {
    FACTORY.lock().resources.insert(fold_name(name), path.into());
}

/// Add a directory to probe for `<name>.dic` / `<name>.dic.gz` files.
pub fn add_data_directory(path: impl Into<PathBuf>) {
    FACTORY.lock().data_dirs.push(path.into());
}

/// The registry behind [`validator_for`].
pub struct ValidatorFactory {
    validators: Vec<(SmolStr, Arc<Validator>)>,
    resources: FxHashMap<SmolStr, PathBuf>,
    data_dirs: Vec<PathBuf>,
}

impl ValidatorFactory {
    fn new() -> Self {
        let mut data_dirs = Vec::new();
        if let Ok(dirs) = env::var("CIFKIT_DATA") {
            data_dirs.extend(env::split_paths(&dirs));
        }
        Self {
            validators: Vec::new(),
            resources: FxHashMap::default(),
            data_dirs,
        }
    }

    fn get(&mut self, name: &str) -> Result<Arc<Validator>> {
        let key = fold_name(name);
        if let Some((_, validator)) = self.validators.iter().find(|(n, _)| *n == key) {
            return Ok(validator.clone());
        }

        let bytes = self.locate(name)?;
        if verbosity() >= 5 {
            trace!(dictionary = name, bytes = bytes.len(), "loading dictionary");
        }

        let validator = if bytes.starts_with(&GZIP_MAGIC) {
            let reader = BufReader::new(GzDecoder::new(Cursor::new(bytes)));
            parse_dictionary(name, reader)?
        } else {
            parse_dictionary(name, Cursor::new(bytes))?
        };

        let validator = Arc::new(validator);
        self.validators.push((key, validator.clone()));
        Ok(validator)
    }

    /// Resolve a name to raw bytes: the resource registry first, then the
    /// data directories with the `.dic`/`.dic.gz` suffix dance.
    fn locate(&self, name: &str) -> Result<Vec<u8>> {
        let key = fold_name(name);
        if let Some(path) = self.resources.get(key.as_str()) {
            return Ok(fs::read(path)?);
        }
        let with_dic = format!("{name}.dic");
        if let Some(path) = self.resources.get(fold_name(&with_dic).as_str()) {
            return Ok(fs::read(path)?);
        }

        let mut candidates: Vec<PathBuf> = Vec::new();
        for dir in &self.data_dirs {
            candidates.push(dir.join(name));
            if !name.ends_with(".dic") {
                candidates.push(dir.join(&with_dic));
                candidates.push(dir.join(format!("{name}.dic.gz")));
            } else {
                candidates.push(dir.join(format!("{name}.gz")));
            }
        }

        for candidate in candidates {
            if candidate.is_file() {
                return Ok(fs::read(candidate)?);
            }
        }

        Err(Error::dictionary(format!(
            "dictionary not found or defined: {name}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DICT: &str = r#"data_fact_test.dic
loop_
_item_type_list.code
_item_type_list.primitive_code
_item_type_list.construct
code char '[A-Za-z0-9_]+'

save_thing
_category.id thing
loop_
_category_key.name '_thing.id'
save_

save__thing.id
_item.name '_thing.id'
_item.category_id thing
_item.mandatory_code yes
_item_type.code code
save_

_dictionary.title fact_test
_dictionary.version 1.0
"#;

    #[test]
    fn test_resource_lookup_and_caching() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fact_test.dic");
        fs::write(&path, DICT).unwrap();

        add_file_resource("fact_test", &path);
        let a = validator_for("fact_test").unwrap();
        let b = validator_for("FACT_TEST").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.validator_for_category("thing").is_some());
    }

    #[test]
    fn test_data_directory_probing_with_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fact_probe.dic.gz");
        let file = fs::File::create(&path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder
            .write_all(DICT.replace("fact_test", "fact_probe").as_bytes())
            .unwrap();
        encoder.finish().unwrap();

        add_data_directory(dir.path());
        let validator = validator_for("fact_probe").unwrap();
        assert_eq!(validator.name(), "fact_probe");
    }

    #[test]
    fn test_unknown_dictionary_is_an_error() {
        let err = validator_for("no_such_dictionary_anywhere").unwrap_err();
        assert!(matches!(err, Error::Dictionary(_)));
    }
}
