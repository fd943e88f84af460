use crate::db::{AbVariant, CampaignConfig, RotationStep, store::Store};
use anyhow::{Result, bail};
use rand::Rng;

/// Maps a recipient index to a template id. Resolved once per campaign
/// start, before any task is queued.
#[derive(Debug, Clone)]
pub enum SelectionStrategy {
    Single(String),
    Rotation(Vec<String>),
    Weighted(Vec<AbVariant>),
}

/// Resolve the strategy a campaign configuration implies, validating every
/// referenced template. Precedence: rotation over A/B over single template.
pub fn resolve_strategy(store: &Store, config: &CampaignConfig) -> Result<SelectionStrategy> {
    if let Some(steps) = config.rotation_steps.as_deref()
        && !steps.is_empty()
    {
        for step in steps {
            if store.get_template(&step.template_id)?.is_none() {
                bail!("rotation template {} not found", step.template_id);
            }
        }
        let sequence = expand_rotation(steps);
        if sequence.is_empty() {
            bail!("rotation steps expand to an empty sequence");
        }
        return Ok(SelectionStrategy::Rotation(sequence));
    }

    if let Some(test_id) = config.ab_test_id.as_deref() {
        if !store.ab_test_exists(test_id)? {
            bail!("A/B test {test_id} not found");
        }
        let variants = store.ab_variants(test_id)?;
        if variants.is_empty() {
            bail!("A/B test {test_id} has no variants");
        }
        return Ok(SelectionStrategy::Weighted(variants));
    }

    if let Some(template_id) = config.template_id.as_deref() {
        if store.get_template(template_id)?.is_none() {
            bail!("message template {template_id} not found");
        }
        return Ok(SelectionStrategy::Single(template_id.to_string()));
    }

    bail!("campaign config must provide template_id, ab_test_id, or rotation_steps")
}

/// `[(A,2),(B,1)]` becomes `A,A,B`; recipient `i` gets `sequence[i % len]`.
pub fn expand_rotation(steps: &[RotationStep]) -> Vec<String> {
    let mut sequence = Vec::new();
    for step in steps {
        for _ in 0..step.count {
            sequence.push(step.template_id.clone());
        }
    }
    sequence
}

pub fn select_template(
    strategy: &SelectionStrategy,
    index: usize,
    rng: &mut impl Rng,
) -> String {
    match strategy {
        SelectionStrategy::Single(template_id) => template_id.clone(),
        SelectionStrategy::Rotation(sequence) => sequence[index % sequence.len()].clone(),
        SelectionStrategy::Weighted(variants) => weighted_pick(variants, rng),
    }
}

/// Proportional random selection: draw r in [0, total weight), pick the
/// first variant whose cumulative weight (inclusive) reaches it.
fn weighted_pick(variants: &[AbVariant], rng: &mut impl Rng) -> String {
    let total: i64 = variants.iter().map(|v| v.weight.max(0)).sum();
    if total <= 0 {
        return variants[0].template_id.clone();
    }
    let r = rng.gen_range(0.0..total as f64);
    let mut upto = 0.0;
    for variant in variants {
        if upto + variant.weight.max(0) as f64 >= r {
            return variant.template_id.clone();
        }
        upto += variant.weight.max(0) as f64;
    }
    variants[variants.len() - 1].template_id.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn steps(spec: &[(&str, u32)]) -> Vec<RotationStep> {
        spec.iter()
            .map(|(id, count)| RotationStep {
                template_id: id.to_string(),
                count: *count,
            })
            .collect()
    }

    #[test]
    fn rotation_cycles_in_list_order() {
        let strategy = SelectionStrategy::Rotation(expand_rotation(&steps(&[("A", 2), ("B", 1)])));
        let mut rng = StdRng::seed_from_u64(0);
        let picks: Vec<String> = (0..6)
            .map(|i| select_template(&strategy, i, &mut rng))
            .collect();
        assert_eq!(picks, vec!["A", "A", "B", "A", "A", "B"]);
    }

    #[test]
    fn even_weights_converge_on_even_split() {
        let variants = vec![
            AbVariant {
                template_id: "X".to_string(),
                weight: 50,
            },
            AbVariant {
                template_id: "Y".to_string(),
                weight: 50,
            },
        ];
        let strategy = SelectionStrategy::Weighted(variants);
        let mut rng = StdRng::seed_from_u64(7);
        let mut x = 0usize;
        for i in 0..2_000 {
            if select_template(&strategy, i, &mut rng) == "X" {
                x += 1;
            }
        }
        assert!((900..=1100).contains(&x), "X drawn {x} times");
        assert!((900..=1100).contains(&(2_000 - x)));
    }

    #[test]
    fn zero_weight_variant_is_effectively_never_drawn() {
        // the weight-0 head is only reachable on an exact 0.0 draw
        let variants = vec![
            AbVariant {
                template_id: "X".to_string(),
                weight: 0,
            },
            AbVariant {
                template_id: "Y".to_string(),
                weight: 100,
            },
        ];
        let strategy = SelectionStrategy::Weighted(variants);
        let mut rng = StdRng::seed_from_u64(1);
        for i in 0..200 {
            assert_eq!(select_template(&strategy, i, &mut rng), "Y");
        }
    }

    #[test]
    fn all_zero_weights_fall_back_to_first_variant() {
        let variants = vec![
            AbVariant {
                template_id: "X".to_string(),
                weight: 0,
            },
            AbVariant {
                template_id: "Y".to_string(),
                weight: 0,
            },
        ];
        let strategy = SelectionStrategy::Weighted(variants);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(select_template(&strategy, 0, &mut rng), "X");
    }
}
