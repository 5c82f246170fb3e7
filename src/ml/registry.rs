// ============================================================
// Layer 5 — Substitute Class Registry
// ============================================================
// Maps the --substitute-class name to a feed-forward
// architecture. The name is part of the checkpoint folder,
// so renaming an entry orphans its checkpoints.

use crate::domain::error::DataError;
use crate::ml::model::SubstituteConfig;

/// (name, hidden layer widths)
const SUBSTITUTES: &[(&str, &[usize])] = &[
    ("FFLinear",   &[]),
    ("FFShallow",  &[1024]),
    ("FFMedium",   &[1024, 1024]),
    ("FFDeep",     &[2048, 1024, 1024]),
    ("FFWide",     &[4096]),
];

/// Every registered class name, in registry order.
pub fn substitute_names() -> Vec<&'static str> {
    SUBSTITUTES.iter().map(|(name, _)| *name).collect()
}

/// Hidden widths of `name`, or an error listing the valid names.
pub fn hidden_widths(name: &str) -> Result<&'static [usize], DataError> {
    SUBSTITUTES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, hidden)| *hidden)
        .ok_or_else(|| {
            DataError::InvalidConfig(format!(
                "unknown substitute class `{name}`; valid names: {}",
                substitute_names().join(", ")
            ))
        })
}

/// Network config for `name`, sized for the flattened batch widths.
pub fn substitute_config(
    name:         &str,
    in_features:  usize,
    out_features: usize,
) -> Result<SubstituteConfig, DataError> {
    let hidden = hidden_widths(name)?.to_vec();
    Ok(SubstituteConfig::new(in_features, out_features, hidden))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_class_resolves() {
        let cfg = substitute_config("FFMedium", 640, 320).unwrap();
        assert_eq!(cfg.in_features, 640);
        assert_eq!(cfg.out_features, 320);
        assert_eq!(cfg.hidden, vec![1024, 1024]);
    }

    #[test]
    fn test_unknown_class_lists_valid_names() {
        let err = hidden_widths("FFHuge").unwrap_err().to_string();
        assert!(err.contains("unknown substitute class `FFHuge`"));
        for name in substitute_names() {
            assert!(err.contains(name));
        }
    }

    #[test]
    fn test_names_are_unique() {
        let mut names = substitute_names();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), SUBSTITUTES.len());
    }
}
