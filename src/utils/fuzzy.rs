// Approximate string scoring used to match noisy OCR text against label
// and value vocabularies. Scores are integers in 0..=100.

use std::collections::BTreeSet;
use strsim::normalized_levenshtein;

/// Lowercase, turn every non-alphanumeric character into a space and
/// collapse runs of whitespace.
pub fn full_process(text: &str) -> String {
    let mapped: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Plain similarity of two strings.
pub fn ratio(a: &str, b: &str) -> u32 {
    if a.is_empty() && b.is_empty() {
        return 100;
    }
    (normalized_levenshtein(a, b) * 100.0).round() as u32
}

/// Best similarity of the shorter string against every same-length window
/// of the longer one. Tolerates extra text around a label.
pub fn partial_ratio(a: &str, b: &str) -> u32 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let (short, long) = if a_chars.len() <= b_chars.len() {
        (a_chars, b_chars)
    } else {
        (b_chars, a_chars)
    };

    if short.is_empty() {
        return 0;
    }
    if short.len() == long.len() {
        return ratio(a, b);
    }

    let short_str: String = short.iter().collect();
    let mut best = 0;
    for start in 0..=(long.len() - short.len()) {
        let window: String = long[start..start + short.len()].iter().collect();
        let score = ratio(&short_str, &window);
        if score > best {
            best = score;
            if best == 100 {
                break;
            }
        }
    }
    best
}

/// Similarity over token sets: a string whose tokens are a subset of the
/// other's scores 100.
pub fn token_set_ratio(a: &str, b: &str) -> u32 {
    let a_processed = full_process(a);
    let b_processed = full_process(b);
    let tokens_a: BTreeSet<&str> = a_processed.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b_processed.split_whitespace().collect();

    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0;
    }

    let intersection: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let diff_ab: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let diff_ba: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();

    let sorted_inter = intersection.join(" ");
    let combined_ab = join_nonempty(&sorted_inter, &diff_ab.join(" "));
    let combined_ba = join_nonempty(&sorted_inter, &diff_ba.join(" "));

    let mut best = ratio(&combined_ab, &combined_ba);
    if !sorted_inter.is_empty() {
        best = best
            .max(ratio(&sorted_inter, &combined_ab))
            .max(ratio(&sorted_inter, &combined_ba));
    }
    best
}

fn join_nonempty(left: &str, right: &str) -> String {
    match (left.is_empty(), right.is_empty()) {
        (true, _) => right.to_string(),
        (_, true) => left.to_string(),
        _ => format!("{} {}", left, right),
    }
}

/// Best scoring choice for `query` after normalising both sides.
/// Ties keep the earliest choice.
pub fn extract_one<'a, S, F>(query: &str, choices: &'a [S], scorer: F) -> Option<(&'a S, u32)>
where
    S: AsRef<str>,
    F: Fn(&str, &str) -> u32,
{
    let processed_query = full_process(query);
    if processed_query.is_empty() {
        return None;
    }

    let mut best: Option<(&'a S, u32)> = None;
    for choice in choices {
        let score = scorer(&processed_query, &full_process(choice.as_ref()));
        match best {
            Some((_, best_score)) if best_score >= score => {}
            _ => best = Some((choice, score)),
        }
    }
    best
}

/// Similarity in 0.0..=1.0 over letters only, for short anchor words.
pub fn letter_similarity(a: &str, b: &str) -> f64 {
    sequence_ratio(&letters_only(a), &letters_only(b))
}

/// Ratcliff/Obershelp similarity in 0.0..=1.0: twice the characters in
/// matching blocks over the combined length.
pub fn sequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

// Longest common block, then recurse on both sides of it.
fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (mut best_len, mut best_a, mut best_b) = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    for i in 0..a.len() {
        let mut current = vec![0usize; b.len() + 1];
        for j in 0..b.len() {
            if a[i] == b[j] {
                current[j + 1] = prev[j] + 1;
                if current[j + 1] > best_len {
                    best_len = current[j + 1];
                    best_a = i + 1 - best_len;
                    best_b = j + 1 - best_len;
                }
            }
        }
        prev = current;
    }

    if best_len == 0 {
        return 0;
    }
    best_len
        + matching_chars(&a[..best_a], &b[..best_b])
        + matching_chars(&a[best_a + best_len..], &b[best_b + best_len..])
}

/// Lowercased ASCII letters of `text`.
pub fn letters_only(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_process_strips_punctuation() {
        assert_eq!(full_process("  Tempat/Tgl  Lahir : "), "tempat tgl lahir");
        assert_eq!(full_process("::"), "");
    }

    #[test]
    fn test_ratio_identical_and_disjoint() {
        assert_eq!(ratio("nama", "nama"), 100);
        assert_eq!(ratio("abc", "xyz"), 0);
        assert_eq!(ratio("kitten", "sitting"), 57);
    }

    #[test]
    fn test_partial_ratio_finds_truncated_label() {
        assert_eq!(partial_ratio("gama", "agama"), 100);
        assert_eq!(partial_ratio("nama budi santoso", "nama"), 100);
        assert!(partial_ratio("3171020101990001", "nik") < 50);
    }

    #[test]
    fn test_partial_ratio_empty_is_zero() {
        assert_eq!(partial_ratio("", "nama"), 0);
    }

    #[test]
    fn test_token_set_ratio_subset() {
        assert_eq!(token_set_ratio("BELUM KAWIN", "KAWIN"), 100);
        assert_eq!(token_set_ratio("islam", "ISLAM"), 100);
        assert!(token_set_ratio("PEREMPUAN", "LAKI-LAKI") < 50);
    }

    #[test]
    fn test_extract_one_prefers_first_on_tie() {
        let choices = vec!["Nama".to_string(), "Nama".to_string(), "Agama".to_string()];
        let (choice, score) = extract_one("Nama :", &choices, partial_ratio).unwrap();
        assert_eq!(choice, "Nama");
        assert_eq!(score, 100);
        assert!(extract_one("::", &choices, partial_ratio).is_none());
    }

    #[test]
    fn test_letter_similarity_ignores_symbols() {
        assert!((letter_similarity("Gol. Darah", "goldarah") - 1.0).abs() < f64::EPSILON);
        assert!(letter_similarity("Alamrrat", "Alamat") > 0.7);
    }

    #[test]
    fn test_sequence_ratio_matching_blocks() {
        assert!((sequence_ratio("jakarta", "jalan") - 0.5).abs() < 1e-9);
        assert!((sequence_ratio("abcd", "abcd") - 1.0).abs() < 1e-9);
        assert_eq!(sequence_ratio("abc", "xyz"), 0.0);
        assert_eq!(sequence_ratio("", ""), 1.0);
    }
}
