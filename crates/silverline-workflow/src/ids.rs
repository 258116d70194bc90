use chrono::Utc;

/// Run ids sort by creation date and are safe as path components.
pub fn new_run_id() -> String {
    let date = Utc::now().format("%Y%m%d").to_string();
    let short = short_id();
    format!("{date}-{short}")
}

fn short_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id.chars().take(12).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_path_safe() {
        let a = new_run_id();
        let b = new_run_id();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }
}
