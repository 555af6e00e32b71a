use crate::{fail, FileStore};
use blindvote::*;
use log::{info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::path::Path;

pub fn command_simulate(matches: &clap::ArgMatches, data_dir: &Path, mut config: Config) {
    let voters = matches.get_one::<usize>("voters").copied().unwrap_or(0);
    let labels: Vec<String> = matches
        .get_many::<String>("candidates")
        .map(|labels| labels.map(|l| l.trim().to_owned()).collect())
        .unwrap_or_default();

    if let Some(scheme) = matches.get_one::<String>("scheme") {
        config.scheme = scheme.parse().unwrap_or_else(|e| fail("simulate", e));
    }
    let mut rng = match matches.get_one::<u64>("seed") {
        Some(seed) => ChaCha20Rng::seed_from_u64(*seed),
        None => ChaCha20Rng::from_entropy(),
    };

    let results = simulate(data_dir, &config, voters, &labels, &mut rng)
        .unwrap_or_else(|e| fail("simulate", e));

    match serde_json::to_string_pretty(&results) {
        Ok(json) => println!("{}", json),
        Err(e) => fail("simulate", e),
    }
}

/// Run an election in `data_dir`: every rostered voter who has not yet been
/// signed for picks a random candidate and goes through the whole protocol.
pub fn simulate(
    data_dir: &Path,
    config: &Config,
    voters: usize,
    labels: &[String],
    rng: &mut ChaCha20Rng,
) -> Result<ElectionResults, Error> {
    if voters == 0 {
        return Err(Error::InvalidParameter("at least one voter is required".to_owned()));
    }
    let candidates = CandidateList::from_labels(labels.iter().cloned())?;
    if candidates.is_empty() {
        return Err(Error::InvalidParameter("at least one candidate is required".to_owned()));
    }

    let store = FileStore::open(data_dir)?;
    let roster: Vec<String> = (1..=voters).map(|i| format!("voter{}", i)).collect();
    store.save_roster(&roster)?;
    store.save_candidates(&candidates)?;

    let keys = KeyManager::load_or_generate(&store, config, rng)?;
    let service = VotingService::new(config, keys, candidates, store)?;

    let mut cast = 0;
    for voter_id in &roster {
        if !service.is_eligible(voter_id) {
            warn!("{} already received a signature, skipping", voter_id);
            continue;
        }
        let candidate_id = rng.gen_range(1..=service.candidates().len() as u32);
        cast_one(&service, voter_id, candidate_id, rng)?;
        cast += 1;
    }
    info!("simulation cast {} ballots", cast);

    Ok(service.results())
}

fn cast_one(
    service: &VotingService<FileStore>,
    voter_id: &str,
    candidate_id: u32,
    rng: &mut ChaCha20Rng,
) -> Result<(), Error> {
    let session_id = uuid::Builder::from_random_bytes(rng.gen())
        .into_uuid()
        .to_string();

    let mut voter = VoterExchange::new(service.public_params().clone(), rng)?;
    let signer_public = service.begin_exchange_with_rng(&session_id, voter.public_value(), rng)?;
    voter.complete(&signer_public)?;

    let message = BallotMessage::random(candidate_id, rng);
    let (blinded, unblinder) = voter.blind(service.candidates(), message)?;
    let request = voter.sign_request(voter_id, &session_id, blinded)?;
    let blind_signature = service.sign_ballot(&request)?;
    let signature = voter.unblind(&unblinder, &blind_signature)?;

    service.cast_ballot(candidate_id, signature)
}
