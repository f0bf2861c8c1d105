use unicode_normalization::UnicodeNormalization;

/// Convert a name into a URL slug.
///
/// Accents are folded to ASCII, characters other than letters, digits,
/// underscores, hyphens and whitespace are dropped, and runs of whitespace or
/// hyphens become a single `-`.
pub fn slugify(name: &str) -> String {
    let folded: String = name
        .nfkd()
        .filter(char::is_ascii)
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect::<String>()
        .to_lowercase();

    folded
        .split(|c: char| c == '-' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
        .trim_matches('_')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_basic() {
        assert_eq!(slugify("Investment"), "investment");
        assert_eq!(slugify("COO Investment"), "coo-investment");
        assert_eq!(slugify("  Digital,  Data & Technology "), "digital-data-technology");
    }

    #[test]
    fn test_slugify_folds_accents() {
        assert_eq!(slugify("Équipe Général"), "equipe-general");
    }

    #[test]
    fn test_slugify_collapses_hyphens() {
        assert_eq!(slugify("Trade -- Policy"), "trade-policy");
        assert_eq!(slugify("!!!"), "");
    }
}
