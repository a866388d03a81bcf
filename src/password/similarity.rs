//! Edit distance and longest common substring, compared case-insensitively.

fn chars(input: &str) -> Vec<char> {
    input.to_lowercase().chars().collect()
}

#[must_use]
pub fn levenshtein(left: &str, right: &str) -> usize {
    let left = chars(left);
    let right = chars(right);
    if left.is_empty() {
        return right.len();
    }
    let mut previous: Vec<usize> = (0..=right.len()).collect();
    let mut current = vec![0; right.len() + 1];
    for (i, lc) in left.iter().enumerate() {
        current[0] = i + 1;
        for (j, rc) in right.iter().enumerate() {
            let substitution = previous[j] + usize::from(lc != rc);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[right.len()]
}

#[must_use]
pub fn longest_common_substring(left: &str, right: &str) -> usize {
    let left = chars(left);
    let right = chars(right);
    let mut best = 0;
    let mut previous = vec![0; right.len() + 1];
    for lc in &left {
        let mut current = vec![0; right.len() + 1];
        for (j, rc) in right.iter().enumerate() {
            if lc == rc {
                current[j + 1] = previous[j] + 1;
                best = best.max(current[j + 1]);
            }
        }
        previous = current;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distances() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("Alice", "alice"), 0);
    }

    #[test]
    fn substrings() {
        assert_eq!(longest_common_substring("alice@example.com", "alice1234"), 5);
        assert_eq!(longest_common_substring("abc", "xyz"), 0);
        assert_eq!(longest_common_substring("Hello", "yellow"), 4);
    }
}
