use crate::db::store::Store;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DELAY_SETTINGS_KEY: &str = "delay_settings";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelaySettings {
    #[serde(rename = "type", default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_value")]
    pub value: f64,
    #[serde(default = "default_value")]
    pub min_delay: f64,
    #[serde(default = "default_max")]
    pub max_delay: f64,
}

fn default_mode() -> String {
    "fixed".to_string()
}

fn default_value() -> f64 {
    1.0
}

fn default_max() -> f64 {
    5.0
}

/// Inter-send pause for one task. A `random` shared document draws uniformly
/// in [min_delay, max_delay]; `fixed`, an absent document, or an unreadable
/// one all fall back to the task's own delay.
pub fn resolve(store: &Store, task_delay: f64, rng: &mut impl Rng) -> Duration {
    let settings = match store.get_setting(DELAY_SETTINGS_KEY) {
        Ok(Some(value)) => serde_json::from_value::<DelaySettings>(value).ok(),
        Ok(None) => None,
        Err(e) => {
            eprintln!("delay settings unreadable, using task delay: {e:#}");
            None
        }
    };

    let seconds = match settings {
        Some(settings) if settings.mode == "random" => {
            let lo = settings.min_delay.min(settings.max_delay);
            let hi = settings.min_delay.max(settings.max_delay);
            if hi > lo { rng.gen_range(lo..=hi) } else { lo }
        }
        _ => task_delay,
    };

    Duration::from_secs_f64(seconds.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn absent_document_uses_task_delay() {
        let tmp = tempdir().unwrap();
        let store = Store::open(&tmp.path().join("state.db")).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(resolve(&store, 2.5, &mut rng), Duration::from_secs_f64(2.5));
    }

    #[test]
    fn random_document_draws_within_bounds() {
        let tmp = tempdir().unwrap();
        let store = Store::open(&tmp.path().join("state.db")).unwrap();
        store
            .set_setting(
                DELAY_SETTINGS_KEY,
                &json!({"type": "random", "min_delay": 2.0, "max_delay": 4.0}),
            )
            .unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..20 {
            let pause = resolve(&store, 99.0, &mut rng);
            assert!(pause >= Duration::from_secs(2) && pause <= Duration::from_secs(4));
        }
    }

    #[test]
    fn fixed_document_still_prefers_task_delay() {
        let tmp = tempdir().unwrap();
        let store = Store::open(&tmp.path().join("state.db")).unwrap();
        store
            .set_setting(DELAY_SETTINGS_KEY, &json!({"type": "fixed", "value": 9.0}))
            .unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(resolve(&store, 1.0, &mut rng), Duration::from_secs(1));
    }
}
