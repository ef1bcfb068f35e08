//! Variant container selection
//!
//! A declared variant is named `<base>.<variant>`. A request for any container
//! whose base (text before the first `.`) matches is redirected to the declared
//! variant whose variant tag ranks highest in the active list. When no declared
//! variant is active, the first declared one is used and a warning is logged.

/// Storage name to open for `name`
pub fn remap_variant<'a>(name: &'a str, declared: &'a [String], active: &[String]) -> &'a str {
    let base = base_of(name);

    let mut best: Option<(usize, &'a str)> = None;
    let mut fallback: Option<&'a str> = None;

    for candidate in declared {
        let mut parts = candidate.split('.');
        let candidate_base = parts.next().unwrap_or_default();
        if candidate_base != base {
            continue;
        }
        let tag = parts.next().unwrap_or_default();

        match active.iter().position(|a| a == tag) {
            Some(rank) => {
                if best.map_or(true, |(best_rank, _)| rank < best_rank) {
                    best = Some((rank, candidate.as_str()));
                }
            }
            None => {
                if fallback.is_none() {
                    fallback = Some(candidate.as_str());
                }
            }
        }
    }

    if let Some((_, chosen)) = best {
        return chosen;
    }
    if let Some(chosen) = fallback {
        tracing::warn!(
            container = %name,
            variant = %chosen,
            "ambiguous variant chosen because no active variant matched"
        );
        return chosen;
    }
    name
}

fn base_of(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}
