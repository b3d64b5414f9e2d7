use rand::Rng;
use std::path::Path;

/// Reads this agent's stable name from `<data_path>/name`; generates and
/// persists an 8-hex-char random identity if the file is missing or
/// unreadable as UTF-8.
pub fn load_or_create_name(data_path: &str) -> String {
    let path = Path::new(data_path).join("name");
    if let Ok(existing) = std::fs::read_to_string(&path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let name: String = {
        let mut rng = rand::thread_rng();
        (0..8).map(|_| format!("{:x}", rng.gen_range(0..16u8))).collect()
    };

    if let Err(e) = std::fs::create_dir_all(data_path) {
        tracing::warn!(error = %e, "could not create data path for identity file");
    }
    if let Err(e) = std::fs::write(&path, &name) {
        tracing::warn!(error = %e, "could not persist agent identity");
    }
    name
}
