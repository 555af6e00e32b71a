use crate::{fail, FileStore};
use blindvote::{EligibilityLedger, Error};
use std::path::Path;

pub fn command_voted(_matches: &clap::ArgMatches, data_dir: &Path) {
    for voter_id in voted_list(data_dir).unwrap_or_else(|e| fail("voted", e)) {
        println!("{}", voter_id);
    }
}

/// Voters on the roster who have received a signature
pub fn voted_list(data_dir: &Path) -> Result<Vec<String>, Error> {
    let store = FileStore::open_read_only(data_dir);
    Ok(EligibilityLedger::load(&store)?.voted())
}
