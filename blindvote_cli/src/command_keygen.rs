use crate::{fail, FileStore};
use blindvote::{Config, KeyManager};
use rand::rngs::OsRng;
use std::path::Path;

pub fn command_keygen(_matches: &clap::ArgMatches, data_dir: &Path, config: &Config) {
    let store = FileStore::open(data_dir).unwrap_or_else(|e| fail("keygen", e));
    let keys = KeyManager::load_or_generate(&store, config, &mut OsRng)
        .unwrap_or_else(|e| fail("keygen", e));

    match serde_json::to_string_pretty(&keys.public_params()) {
        Ok(json) => println!("{}", json),
        Err(e) => fail("keygen", e),
    }
}
