use crate::domain::team::{Team, TeamConfig};
use crate::error::{PaymentError, Result};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Parses and validates a JSON array of team configurations.
///
/// Fails on the first invalid team or on a repeated slug.
pub fn load_teams<R: Read>(source: R) -> Result<Vec<Team>> {
    let configs: Vec<TeamConfig> = serde_json::from_reader(source)?;
    let mut seen = HashSet::new();
    let mut teams = Vec::with_capacity(configs.len());
    for config in configs {
        if !seen.insert(config.slug.clone()) {
            return Err(PaymentError::ValidationFailed(format!(
                "team {} is defined twice",
                config.slug
            )));
        }
        teams.push(Team::try_from(config)?);
    }
    Ok(teams)
}

pub fn load_teams_file<P: AsRef<Path>>(path: P) -> Result<Vec<Team>> {
    let file = File::open(path)?;
    load_teams(BufReader::new(file))
}
