//! Name normalization and fuzzy matching used by entity resolution.

use std::sync::OnceLock;

use regex::Regex;

use crate::defaults::FALLBACK_PROJECT_SLUG;

/// Mail domains that never identify an organization.
const PUBLIC_MAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "outlook.com",
    "hotmail.com",
    "live.com",
    "yahoo.com",
    "icloud.com",
    "me.com",
    "proton.me",
    "protonmail.com",
    "fastmail.com",
    "aol.com",
];

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\w.+-]+@[\w-]+\.[\w.-]+").expect("valid email regex"))
}

/// Lowercase, keep letters, digits and spaces, collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized edit-distance similarity in `[0, 1]` over normalized names.
pub fn similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (normalize_name(a), normalize_name(b));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(&a, &b)
}

/// URL-safe identifier for a project name.
pub fn slugify(name: &str) -> String {
    let slug = normalize_name(name).replace(' ', "-");
    if slug.is_empty() {
        FALLBACK_PROJECT_SLUG.to_string()
    } else {
        slug
    }
}

/// Best candidate scoring at or above `threshold`.
///
/// Ties keep the earliest candidate, so a stable candidate order gives a
/// stable answer.
pub fn best_match<'a, T, F>(
    reference: &str,
    candidates: &'a [T],
    threshold: f64,
    name_of: F,
) -> Option<(&'a T, f64)>
where
    F: Fn(&T) -> &str,
{
    let mut best: Option<(&T, f64)> = None;
    for candidate in candidates {
        let score = similarity(reference, name_of(candidate));
        if score < threshold {
            continue;
        }
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }
    best
}

/// Name and address parsed from a mail-style sender header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderIdentity {
    pub name: String,
    pub email: Option<String>,
    pub organization: Option<String>,
}

/// Parse `"Name" <email>`, `Name <email>` or a bare address.
///
/// Without a display name the local part of the address is title-cased
/// (`sarah.chen@x.io` → `Sarah Chen`).
pub fn parse_sender(header: &str) -> Option<SenderIdentity> {
    let header = header.trim();
    if header.is_empty() {
        return None;
    }

    let email = email_regex()
        .find(header)
        .map(|m| m.as_str().trim_end_matches('.').to_lowercase());

    let display = match header.find('<') {
        Some(idx) => header[..idx].trim().trim_matches('"').trim().to_string(),
        None if email.is_none() => header.trim_matches('"').to_string(),
        None => String::new(),
    };

    let name = if !display.is_empty() {
        display
    } else {
        let local = email.as_deref()?.split('@').next()?;
        title_case(&local.replace(['.', '_', '-', '+'], " "))
    };

    if name.trim().is_empty() {
        return None;
    }

    let organization = email.as_deref().and_then(organization_from_email);

    Some(SenderIdentity {
        name,
        email,
        organization,
    })
}

/// Organization name derived from a non-public mail domain.
pub fn organization_from_email(email: &str) -> Option<String> {
    let domain = email.rsplit('@').next()?.to_lowercase();
    if PUBLIC_MAIL_DOMAINS.contains(&domain.as_str()) {
        return None;
    }
    let label = domain.split('.').next()?;
    if label.is_empty() {
        return None;
    }
    Some(title_case(label))
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Sarah   CHEN "), "sarah chen");
        assert_eq!(normalize_name("O'Brien, Pat"), "o brien pat");
        assert_eq!(normalize_name("!!!"), "");
    }

    #[test]
    fn test_similar_names_clear_threshold() {
        assert!(similarity("Sara Chen", "Sarah Chen") >= 0.8);
    }

    #[test]
    fn test_unrelated_names_do_not_match() {
        assert!(similarity("Unrelated Person", "Sarah Chen") < 0.8);
    }

    #[test]
    fn test_similarity_ignores_case_and_punctuation() {
        assert_eq!(similarity("sarah chen", "SARAH, CHEN"), 1.0);
    }

    #[test]
    fn test_similarity_empty_is_zero() {
        assert_eq!(similarity("", "Sarah"), 0.0);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Q3 Launch Plan"), "q3-launch-plan");
        assert_eq!(slugify("  Apollo!! "), "apollo");
    }

    #[test]
    fn test_slugify_all_special_chars_falls_back() {
        assert_eq!(slugify("!!!"), "unnamed-project");
        assert_eq!(slugify(""), "unnamed-project");
    }

    #[test]
    fn test_best_match_picks_highest_score() {
        let names = vec!["Sarah Chen".to_string(), "Sara Chen".to_string()];
        let (hit, score) = best_match("Sara Chen", &names, 0.8, |n| n.as_str()).unwrap();
        assert_eq!(hit, "Sara Chen");
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_best_match_is_stable_on_ties() {
        let names = vec!["Ana".to_string(), "ana".to_string()];
        let (hit, _) = best_match("ANA", &names, 0.8, |n| n.as_str()).unwrap();
        assert_eq!(hit, "Ana");
    }

    #[test]
    fn test_best_match_none_below_threshold() {
        let names = vec!["Sarah Chen".to_string()];
        assert!(best_match("Unrelated Person", &names, 0.8, |n| n.as_str()).is_none());
    }

    #[test]
    fn test_parse_sender_quoted_display_name() {
        let id = parse_sender("\"Sarah Chen\" <Sarah.Chen@Acme.io>").unwrap();
        assert_eq!(id.name, "Sarah Chen");
        assert_eq!(id.email.as_deref(), Some("sarah.chen@acme.io"));
        assert_eq!(id.organization.as_deref(), Some("Acme"));
    }

    #[test]
    fn test_parse_sender_bare_address() {
        let id = parse_sender("sarah.chen@gmail.com").unwrap();
        assert_eq!(id.name, "Sarah Chen");
        assert_eq!(id.organization, None);
    }

    #[test]
    fn test_parse_sender_name_only() {
        let id = parse_sender("Sarah Chen").unwrap();
        assert_eq!(id.name, "Sarah Chen");
        assert_eq!(id.email, None);
    }

    #[test]
    fn test_parse_sender_empty() {
        assert!(parse_sender("   ").is_none());
    }
}
