use crate::{fail, FileStore};
use blindvote::{BallotLedger, ElectionResults, EligibilityLedger, Error};
use std::path::Path;

pub fn command_results(_matches: &clap::ArgMatches, data_dir: &Path) {
    let results = load_results(data_dir).unwrap_or_else(|e| fail("results", e));
    match serde_json::to_string_pretty(&results) {
        Ok(json) => println!("{}", json),
        Err(e) => fail("results", e),
    }
}

/// Tally the election stored in `data_dir`
pub fn load_results(data_dir: &Path) -> Result<ElectionResults, Error> {
    let store = FileStore::open_read_only(data_dir);
    let eligibility = EligibilityLedger::load(&store)?;
    let ballots = BallotLedger::load(&store)?;
    let candidates = store.load_candidates()?;
    Ok(ElectionResults::collect(&eligibility, &ballots, &candidates))
}
