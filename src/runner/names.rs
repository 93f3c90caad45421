use rand::seq::SliceRandom;

const ADJECTIVES: &[&str] = &[
    "admiring", "bold", "brave", "calm", "clever", "dazzling", "eager", "elastic",
    "fervent", "focused", "gallant", "happy", "jolly", "keen", "lucid", "modest",
    "nifty", "optimistic", "peaceful", "quirky", "relaxed", "serene", "sharp",
    "stoic", "tender", "trusting", "vibrant", "wizardly", "youthful", "zealous",
];

const NAMES: &[&str] = &[
    "agnesi", "babbage", "bardeen", "curie", "dijkstra", "euclid", "fermat",
    "goldberg", "hopper", "hypatia", "kepler", "knuth", "lamport", "liskov",
    "lovelace", "mccarthy", "noether", "pascal", "ritchie", "shannon", "thompson",
    "torvalds", "turing", "wirth", "wozniak",
];

/// A readable `adjective_name` pair, e.g. `happy_turing`.
pub fn random_name() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("quiet");
    let name = NAMES.choose(&mut rng).copied().unwrap_or("bench");
    format!("{adjective}_{name}")
}

/// Container name for a coordinator: `<prefix>_<adjective>_<name>`.
pub fn coordinator_name(prefix: &str) -> String {
    format!("{prefix}_{}", random_name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::validate_version;

    #[test]
    fn random_names_are_valid_job_names() {
        for _ in 0..50 {
            let name = random_name();
            assert!(validate_version(&name).is_ok(), "{name}");
            assert_eq!(name.matches('_').count(), 1);
        }
    }

    #[test]
    fn coordinator_names_are_prefixed() {
        let name = coordinator_name("bencher");
        assert!(name.starts_with("bencher_"));
        assert_eq!(name.matches('_').count(), 2);
    }
}
